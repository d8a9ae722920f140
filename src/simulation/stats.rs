//! Per-node aggregate counters and the simulation-wide report returned from
//! `Runtime::run`.

use std::collections::{HashMap, HashSet};

use crate::runtime::SimDuration;
use crate::simulation::loss_oracle::{LossCause, ALL_LOSS_CAUSES};
use crate::simulation::notification::NodeId;

#[derive(Debug, Clone)]
pub struct NodeStats {
    pub node_id: NodeId,
    pub packets_sent: u64,
    pub packets_delivered: u64,
    pub packets_lost_by_cause: HashMap<LossCause, u64>,
    pub cumulative_tx_time: SimDuration,
    pub cumulative_lost_time: SimDuration,
    pub cumulative_air_time: SimDuration,
    pub time_in_nav: SimDuration,
    pub total_delay_secs: f64,
    pub delivered_for_delay_avg: u64,
    pub hidden_nodes: HashSet<NodeId>,
    /// Count of `LossCause::SpatialReuseIgnored` events: frames this node
    /// ignored for NAV/interference purposes under OBSS-PD spatial reuse.
    /// Deliberately outside `packets_lost_by_cause` — it is not a loss and
    /// must not perturb `conserves_frames`.
    pub spatial_reuse_ignored: u64,
}

impl NodeStats {
    pub fn new(node_id: NodeId) -> Self {
        let mut packets_lost_by_cause = HashMap::new();
        for cause in ALL_LOSS_CAUSES {
            packets_lost_by_cause.insert(cause, 0);
        }
        NodeStats {
            node_id,
            packets_sent: 0,
            packets_delivered: 0,
            packets_lost_by_cause,
            cumulative_tx_time: SimDuration::ZERO,
            cumulative_lost_time: SimDuration::ZERO,
            cumulative_air_time: SimDuration::ZERO,
            time_in_nav: SimDuration::ZERO,
            total_delay_secs: 0.0,
            delivered_for_delay_avg: 0,
            hidden_nodes: HashSet::new(),
            spatial_reuse_ignored: 0,
        }
    }

    pub fn record_loss(&mut self, cause: LossCause) {
        *self.packets_lost_by_cause.entry(cause).or_insert(0) += 1;
    }

    pub fn packets_lost_total(&self) -> u64 {
        self.packets_lost_by_cause.values().sum()
    }

    /// Conservation of frames: sent = delivered + sum(lost by cause).
    pub fn conserves_frames(&self) -> bool {
        self.packets_sent == self.packets_delivered + self.packets_lost_total()
    }

    pub fn average_delay_secs(&self) -> f64 {
        if self.delivered_for_delay_avg == 0 {
            0.0
        } else {
            self.total_delay_secs / self.delivered_for_delay_avg as f64
        }
    }

    pub fn airtime_utilization(&self, sim_duration: SimDuration) -> f64 {
        if sim_duration.as_nanos() == 0 {
            0.0
        } else {
            self.cumulative_air_time.as_secs_f64() / sim_duration.as_secs_f64()
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimulationReport {
    pub sim_duration: SimDuration,
    pub per_node: Vec<NodeStats>,
}

impl SimulationReport {
    pub fn log_summary(&self) {
        for stats in &self.per_node {
            log::info!(
                "node {}: sent={} delivered={} lost={} avg_delay={:.6}s airtime_util={:.3} hidden={:?}",
                stats.node_id,
                stats.packets_sent,
                stats.packets_delivered,
                stats.packets_lost_total(),
                stats.average_delay_secs(),
                stats.airtime_utilization(self.sim_duration),
                stats.hidden_nodes,
            );
            for cause in ALL_LOSS_CAUSES {
                let count = stats.packets_lost_by_cause.get(&cause).copied().unwrap_or(0);
                if count > 0 {
                    log::info!("  {:?}: {}", cause, count);
                }
            }
            if stats.spatial_reuse_ignored > 0 {
                log::info!("  {:?}: {}", LossCause::SpatialReuseIgnored, stats.spatial_reuse_ignored);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conservation_holds_after_recording_losses_and_deliveries() {
        let mut stats = NodeStats::new(0);
        stats.packets_sent = 5;
        stats.packets_delivered = 3;
        stats.record_loss(LossCause::Per);
        stats.record_loss(LossCause::PureCollision);
        assert!(stats.conserves_frames());
    }
}
