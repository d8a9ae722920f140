//! Per-node aggregate received power bookkeeping.

use std::collections::HashMap;

use crate::runtime::{SimDuration, SimInstant};
use crate::simulation::config::AdjacentChannelModel;
use crate::simulation::notification::{ChannelIdx, NodeId, Notification};

const POWER_FLOOR_PW: f64 = 1e-6;

/// Per-subchannel aggregate power plus the bookkeeping needed for PIFS and
/// SINR. Owned one instance per node.
pub struct ChannelPowerModel {
    power: Vec<f64>,
    free_since: Vec<SimInstant>,
    /// Power contributed at this node by each currently in-flight neighbour
    /// transmission that overlaps the primary channel, keyed by source node.
    inflight: HashMap<NodeId, f64>,
}

impl ChannelPowerModel {
    pub fn new(num_channels: usize, start: SimInstant) -> Self {
        ChannelPowerModel {
            power: vec![0.0; num_channels],
            free_since: vec![start; num_channels],
            inflight: HashMap::new(),
        }
    }

    fn floor(v: f64) -> f64 {
        if v < POWER_FLOOR_PW {
            0.0
        } else {
            v
        }
    }

    /// Per-channel contribution of `received_pw` given `notification`'s
    /// channel range and the adjacent-channel leakage model.
    fn contributions(received_pw: f64, notification: &Notification, model: AdjacentChannelModel, num_channels: usize) -> Vec<f64> {
        let mut out = vec![0.0; num_channels];
        let left = notification.left_channel as usize;
        let right = notification.right_channel as usize;
        for (c, slot) in out.iter_mut().enumerate() {
            if c >= left && c <= right {
                *slot = received_pw;
            }
        }
        match model {
            AdjacentChannelModel::None => {}
            AdjacentChannelModel::Boundary => {
                for c in 0..num_channels {
                    if c >= left && c <= right {
                        continue;
                    }
                    let dist = if c < left { left - c } else { c - right };
                    let atten_db = 20.0 * dist as f64;
                    out[c] = received_pw * 10f64.powf(-atten_db / 10.0);
                }
            }
            AdjacentChannelModel::Extreme => {
                for c in 0..num_channels {
                    if c >= left && c <= right {
                        continue;
                    }
                    let mut sum = 0.0;
                    for inside in left..=right {
                        let dist = if c < inside { inside - c } else { c - inside };
                        let atten_db = 20.0 * dist as f64;
                        sum += received_pw * 10f64.powf(-atten_db / 10.0);
                    }
                    out[c] = sum;
                }
            }
        }
        out.iter_mut().for_each(|v| *v = Self::floor(*v));
        out
    }

    /// Add `received_pw`'s per-channel contribution from `notification`,
    /// tracking the total attributed to `notification.source` if it overlaps
    /// the primary channel.
    pub fn on_start(&mut self, now: SimInstant, notification: &Notification, received_pw: f64, model: AdjacentChannelModel, primary_channel: ChannelIdx) -> Vec<f64> {
        let contrib = Self::contributions(received_pw, notification, model, self.power.len());
        for (c, &delta) in contrib.iter().enumerate() {
            self.power[c] += delta;
        }
        if notification.left_channel <= primary_channel && primary_channel <= notification.right_channel {
            *self.inflight.entry(notification.source).or_insert(0.0) += contrib[primary_channel as usize];
        }
        let _ = now;
        contrib
    }

    /// Subtract the exact contribution recorded at `on_start` time; never
    /// recomputed from scratch.
    pub fn on_finish(&mut self, now: SimInstant, notification: &Notification, contrib: &[f64], primary_channel: ChannelIdx) {
        for (c, &delta) in contrib.iter().enumerate() {
            self.power[c] = Self::floor((self.power[c] - delta).max(0.0));
            if self.power[c] == 0.0 {
                self.free_since[c] = now;
            }
        }
        if notification.left_channel <= primary_channel && primary_channel <= notification.right_channel {
            if let Some(v) = self.inflight.get_mut(&notification.source) {
                *v -= contrib[primary_channel as usize];
                if *v <= POWER_FLOOR_PW {
                    self.inflight.remove(&notification.source);
                }
            }
        }
    }

    pub fn is_busy(&self, channel: ChannelIdx, pd_threshold_pw: f64, now: SimInstant, primary_channel: ChannelIdx, pifs: SimDuration, pifs_activated: bool) -> bool {
        let c = channel as usize;
        let busy = self.power[c] >= pd_threshold_pw;
        if !busy {
            return false;
        }
        if pifs_activated && channel != primary_channel {
            return now.saturating_duration_since(self.free_since[c]) >= pifs;
        }
        true
    }

    /// Maximum interference over `range`, with the source-of-interest's own
    /// contribution subtracted out so the remainder is pure interference.
    pub fn max_interference(&self, range: std::ops::RangeInclusive<ChannelIdx>, source_of_interest: NodeId) -> f64 {
        let own = self.inflight.get(&source_of_interest).copied().unwrap_or(0.0);
        range
            .map(|c| (self.power[c as usize] - own).max(0.0))
            .fold(0.0, f64::max)
    }

    pub fn power_of_interest(&self, source_of_interest: NodeId) -> f64 {
        self.inflight.get(&source_of_interest).copied().unwrap_or(0.0)
    }

    pub fn sinr(power_of_interest: f64, noise_floor_pw: f64, max_interference: f64) -> f64 {
        power_of_interest / (noise_floor_pw + max_interference)
    }

    pub fn total_power(&self) -> f64 {
        self.power.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::notification::PacketType;

    fn notif(source: NodeId, left: u8, right: u8) -> Notification {
        Notification {
            source,
            packet_type: PacketType::Data,
            destination: 99,
            packet_id: 1,
            left_channel: left,
            right_channel: right,
            duration: SimDuration::from_micros(100),
            tx_power_pw: 1.0,
            tx_pos: (0.0, 0.0, 0.0),
            mcs: 0,
            nav: SimDuration::ZERO,
            bss_color: None,
            srg: None,
        }
    }

    #[test]
    fn zero_sum_after_matched_start_finish() {
        let mut model = ChannelPowerModel::new(4, SimInstant::ZERO);
        let n = notif(1, 0, 1);
        let contrib = model.on_start(SimInstant::ZERO, &n, 1000.0, AdjacentChannelModel::None, 0);
        assert!(model.total_power() > 0.0);
        model.on_finish(SimInstant(100_000), &n, &contrib, 0);
        assert_eq!(model.total_power(), 0.0);
    }

    #[test]
    fn boundary_leakage_decays_with_distance() {
        let mut model = ChannelPowerModel::new(4, SimInstant::ZERO);
        let n = notif(1, 1, 1);
        let contrib = model.on_start(SimInstant::ZERO, &n, 1_000_000.0, AdjacentChannelModel::Boundary, 1);
        // channel 1 is in-range and gets the full contribution; 0 and 2 are
        // one channel away and equal; 3 is two away and strictly smaller.
        assert!(contrib[1] > contrib[0]);
        assert_eq!(contrib[0], contrib[2]);
        assert!(contrib[3] < contrib[0]);
    }
}
