//! The per-node carrier-sense state machine: sensing, backoff, the
//! RTS/CTS/DATA/ACK exchange, NAV, and the counters that feed
//! [`crate::simulation::stats::NodeStats`].

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand_distr::{Distribution, Exp};

use crate::runtime::{Component, Context, SimDuration, SimInstant};
use crate::simulation::bonding::select_tx_channels;
use crate::simulation::channel_power::ChannelPowerModel;
use crate::simulation::config::{AdjacentChannelModel, BackoffDistribution, BackoffType, CaptureEffectModel, ChannelBondingModel, ConfigPatch, NodeConfig, PathLossModelId, SystemConfig};
use crate::simulation::loss_oracle::{decide, LossCause, OracleInputs, ReceiverStateAtStart};
use crate::simulation::mcs::{frame_duration, min_sinr, PHY_PREAMBLE_SECS};
use crate::simulation::notification::{ChannelIdx, Nack, NodeId, Notification, PacketId, PacketType, SimEvent};
use crate::simulation::path_loss::{dbm_to_mw, mw_to_dbm, mw_to_pw, pw_to_mw, received_power_pw};
use crate::simulation::stats::NodeStats;
use crate::simulation::traffic::TrafficGenerator;

pub const PORT_START_TX: &str = "onSomeNodeStartTx";
pub const PORT_FINISH_TX: &str = "onSomeNodeFinishTx";
pub const PORT_NACK: &str = "onNackReceived";

const TIMER_BACKOFF: &str = "backoff";
const TIMER_TX_END: &str = "tx_end";
const TIMER_WAIT: &str = "wait";
const TIMER_NAV: &str = "nav";
const TIMER_ARRIVAL: &str = "arrival";
const TIMER_DEFERRED_EMIT: &str = "deferred_emit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Sensing,
    TxRts,
    TxCts,
    TxData,
    TxAck,
    RxRts,
    RxCts,
    RxData,
    RxAck,
    WaitCts,
    WaitData,
    WaitAck,
    Nav,
    Sleep,
}

#[derive(Debug, Clone)]
struct Frame {
    destination: NodeId,
    packet_id: PacketId,
    packet_type: PacketType,
    left: ChannelIdx,
    right: ChannelIdx,
    mcs: u8,
    tx_power_pw: f64,
}

/// A response this node owes a peer, deferred so it fires from a fresh
/// top-level dispatch instead of synchronously inside the `FinishTx`
/// activation that decided it — see `SimEvent::DeferredEmit`.
enum DeferredEmit {
    Respond {
        state: NodeState,
        packet_type: PacketType,
        destination: NodeId,
        left: ChannelIdx,
        right: ChannelIdx,
        duration: SimDuration,
        nav: SimDuration,
    },
    Nack {
        to: NodeId,
        packet_id: PacketId,
        cause: LossCause,
        interferer: Option<NodeId>,
        original_packet_type: PacketType,
    },
}

/// A neighbour's currently in-flight notification, kept so `on_finish_tx`
/// can subtract the exact per-channel delta `on_start_tx` added (the
/// zero-sum invariant) without recomputing from scratch.
struct InflightTx {
    notification: Notification,
    contrib: Vec<f64>,
}

pub struct Node {
    id: NodeId,
    pos: (f64, f64, f64),
    peer_id: NodeId,
    positions: HashMap<NodeId, (f64, f64, f64)>,

    min_channel: ChannelIdx,
    max_channel: ChannelIdx,
    primary_channel: ChannelIdx,
    cw_min: u32,
    cw_stage_max: u32,
    cw: u32,
    retry_limit: u32,
    tx_power_default_pw: f64,
    tx_power_default_dbm: f64,
    tx_power_max_dbm: f64,
    pd_threshold_pw: f64,
    tx_gain_db: f64,
    rx_gain_db: f64,
    bonding_model: ChannelBondingModel,
    default_mcs: u8,
    central_frequency_ghz: f64,
    bo_lambda: f64,
    bss_color: Option<u8>,
    spatial_reuse_enabled: bool,
    obss_pd_min_dbm: f64,
    obss_pd_max_dbm: f64,

    num_channels: u8,
    path_loss_model: PathLossModelId,
    adjacent_channel_model: AdjacentChannelModel,
    noise_floor_pw: f64,
    capture_effect_model: CaptureEffectModel,
    capture_effect_threshold_pw: f64,
    constant_per: f64,
    sifs: SimDuration,
    phy_preamble: SimDuration,
    pifs: SimDuration,
    pifs_activated: bool,
    slot_time: SimDuration,
    backoff_distribution: BackoffDistribution,
    backoff_type: BackoffType,
    cw_adaptation: bool,
    rts_bits: u32,
    cts_bits: u32,
    ack_bits: u32,
    aggregation_count: u32,

    state: NodeState,
    channel_power: ChannelPowerModel,
    inflight: HashMap<(NodeId, PacketId), InflightTx>,

    backoff_due: Option<SimInstant>,
    backoff_remaining: Option<SimDuration>,
    retry_count: u32,

    tx_frame: Option<Frame>,
    pending_emit: Option<DeferredEmit>,
    rx_source_of_interest: Option<NodeId>,
    rx_packet_id: Option<PacketId>,
    nav_bss_color: Option<Option<u8>>,
    nav_entered_at: Option<SimInstant>,
    /// Duration of the most recent DATA frame this node transmitted; charged
    /// to `cumulative_lost_time` if that attempt's ACK is ultimately judged
    /// lost or never arrives.
    last_data_duration: SimDuration,
    /// Set when this node begins a fresh RTS/CTS/DATA/ACK attempt (at its own
    /// RTS transmission); cleared and turned into a delay sample on success.
    attempt_start: Option<SimInstant>,

    next_packet_id: PacketId,
    traffic: TrafficGenerator,
    stats: NodeStats,
}

impl Node {
    pub fn new(cfg: &NodeConfig, sys: &SystemConfig, positions: HashMap<NodeId, (f64, f64, f64)>) -> Self {
        Node {
            id: cfg.id,
            pos: (cfg.x, cfg.y, cfg.z),
            peer_id: cfg.peer_id,
            positions,
            min_channel: cfg.min_channel_allowed,
            max_channel: cfg.max_channel_allowed,
            primary_channel: cfg.primary_channel,
            cw_min: cfg.cw_min,
            cw_stage_max: cfg.cw_stage_max,
            cw: cfg.cw_min,
            retry_limit: cfg.retry_limit,
            tx_power_default_pw: mw_to_pw(dbm_to_mw(cfg.tx_power_default_dbm)),
            tx_power_default_dbm: cfg.tx_power_default_dbm,
            tx_power_max_dbm: cfg.tx_power_max_dbm,
            pd_threshold_pw: mw_to_pw(dbm_to_mw(cfg.pd_threshold_default_dbm)),
            tx_gain_db: cfg.tx_gain_db,
            rx_gain_db: cfg.rx_gain_db,
            bonding_model: cfg.channel_bonding_model,
            default_mcs: cfg.default_mcs,
            central_frequency_ghz: cfg.central_frequency_ghz,
            bo_lambda: cfg.bo_lambda,
            bss_color: cfg.bss_color,
            spatial_reuse_enabled: cfg.spatial_reuse_enabled,
            obss_pd_min_dbm: cfg.obss_pd_min_dbm.unwrap_or(-82.0),
            obss_pd_max_dbm: cfg.obss_pd_max_dbm.unwrap_or(-62.0),

            num_channels: sys.num_channels,
            path_loss_model: sys.path_loss_model,
            adjacent_channel_model: sys.adjacent_channel_model,
            noise_floor_pw: mw_to_pw(dbm_to_mw(sys.noise_floor_dbm)),
            capture_effect_model: sys.capture_effect_model,
            capture_effect_threshold_pw: mw_to_pw(dbm_to_mw(sys.capture_effect_threshold_db)),
            constant_per: sys.constant_per,
            sifs: SimDuration::from_secs_f64(sys.sifs),
            phy_preamble: SimDuration::from_secs_f64(PHY_PREAMBLE_SECS),
            pifs: SimDuration::from_secs_f64(sys.pifs),
            pifs_activated: sys.pifs_activated,
            slot_time: SimDuration::from_secs_f64(sys.slot_time),
            backoff_distribution: sys.backoff_distribution,
            backoff_type: sys.backoff_type,
            cw_adaptation: sys.cw_adaptation,
            rts_bits: sys.rts_bits,
            cts_bits: sys.cts_bits,
            ack_bits: sys.ack_bits,
            aggregation_count: sys.aggregation_count,

            state: NodeState::Sensing,
            channel_power: ChannelPowerModel::new(sys.num_channels as usize, SimInstant::ZERO),
            inflight: HashMap::new(),

            backoff_due: None,
            backoff_remaining: None,
            retry_count: 0,

            tx_frame: None,
            pending_emit: None,
            rx_source_of_interest: None,
            rx_packet_id: None,
            nav_bss_color: None,
            nav_entered_at: None,
            last_data_duration: SimDuration::ZERO,
            attempt_start: None,

            next_packet_id: 0,
            traffic: TrafficGenerator::new(sys.traffic_model),
            stats: NodeStats::new(cfg.id),
        }
    }

    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    /// Apply a single configuration patch from an external policy (agent,
    /// central controller) between runs. Takes effect on the next
    /// transmission attempt this node makes; does not touch anything
    /// currently in flight. This is the only mutation surface this crate
    /// exposes outside the event loop itself.
    pub fn apply_config_update(&mut self, patch: ConfigPatch) {
        match patch {
            ConfigPatch::PrimaryChannel(c) => self.primary_channel = c,
            ConfigPatch::TxPowerDbm(dbm) => {
                self.tx_power_default_pw = mw_to_pw(dbm_to_mw(dbm));
                self.tx_power_default_dbm = dbm;
            }
            ConfigPatch::PdThresholdDbm(dbm) => self.pd_threshold_pw = mw_to_pw(dbm_to_mw(dbm)),
            ConfigPatch::ChannelBondingModel(model) => self.bonding_model = model,
        }
    }

    fn distance_to(&self, other: NodeId) -> f64 {
        let p = self.positions.get(&other).copied().unwrap_or(self.pos);
        let dx = self.pos.0 - p.0;
        let dy = self.pos.1 - p.1;
        let dz = self.pos.2 - p.2;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    fn free_channels(&self, now: SimInstant) -> Vec<bool> {
        (0..self.num_channels)
            .map(|c| !self.channel_power.is_busy(c, self.pd_threshold_pw, now, self.primary_channel, self.pifs, self.pifs_activated))
            .collect()
    }

    fn sample_backoff(&self, rng: &mut StdRng) -> SimDuration {
        let slots = match self.backoff_distribution {
            BackoffDistribution::Deterministic => (self.cw / 2).max(1) as f64,
            BackoffDistribution::Exponential => {
                let exp = Exp::new(self.bo_lambda.max(1e-6)).expect("bo_lambda must be positive");
                exp.sample(rng).min((self.cw.max(1) * 2) as f64)
            }
        };
        SimDuration::from_secs_f64(slots * self.slot_time.as_secs_f64())
    }

    fn arm_backoff(&mut self, ctx: &mut Context<'_, SimEvent>) {
        let delay = self.sample_backoff(ctx.rng());
        self.backoff_due = Some(ctx.now() + delay);
        self.backoff_remaining = None;
        ctx.set_timer(TIMER_BACKOFF, delay, SimEvent::BackoffExpiry);
    }

    /// The instant at which this node's carrier sense is considered to have
    /// observed the current medium state. `Continuous` backoff reacts to the
    /// exact event time; `Slotted` backoff only registers a state change at
    /// slot-time boundaries, so the freeze point is rounded down to the last
    /// boundary before `now`.
    fn sensed_now(&self, now: SimInstant) -> SimInstant {
        match self.backoff_type {
            BackoffType::Continuous => now,
            BackoffType::Slotted => {
                let slot_ns = self.slot_time.as_nanos().max(1);
                SimInstant((now.0 / slot_ns) * slot_ns)
            }
        }
    }

    fn freeze_backoff_if_armed(&mut self, ctx: &mut Context<'_, SimEvent>) {
        if let Some(due) = self.backoff_due.take() {
            let remaining = due.saturating_duration_since(self.sensed_now(ctx.now()));
            self.backoff_remaining = Some(remaining);
            ctx.cancel_timer(TIMER_BACKOFF);
        }
    }

    fn maybe_resume_backoff(&mut self, ctx: &mut Context<'_, SimEvent>) {
        if self.state != NodeState::Sensing {
            return;
        }
        if self.channel_power.is_busy(self.primary_channel, self.pd_threshold_pw, ctx.now(), self.primary_channel, self.pifs, self.pifs_activated) {
            return;
        }
        if let Some(remaining) = self.backoff_remaining.take() {
            self.backoff_due = Some(ctx.now() + remaining);
            ctx.set_timer(TIMER_BACKOFF, remaining, SimEvent::BackoffExpiry);
        }
    }

    fn next_mcs_min_sinr(&self) -> f64 {
        min_sinr(self.default_mcs)
    }

    /// Shared OBSS-PD spatial-reuse condition (§4.4.4): `bss_color` names a
    /// different BSS and `received_pw` sits below the OBSS-PD ceiling this
    /// node currently accepts. Used both to decide whether an overlapping
    /// frame can be ignored for NAV purposes and to find the frame whose
    /// presence curtails this node's own next transmit power.
    fn is_inter_bss_within_obss_pd(&self, bss_color: Option<u8>, received_pw: f64) -> bool {
        self.spatial_reuse_enabled && bss_color.is_some() && bss_color != self.bss_color && received_pw < mw_to_pw(dbm_to_mw(self.obss_pd_max_dbm))
    }

    /// Received power, in dBm, of the strongest currently in-flight frame
    /// this node is permitted to ignore under OBSS-PD spatial reuse, if any.
    fn active_obss_pd_dbm(&self) -> Option<f64> {
        self.inflight
            .values()
            .filter_map(|inflight| {
                let pw = self.channel_power.power_of_interest(inflight.notification.source);
                self.is_inter_bss_within_obss_pd(inflight.notification.bss_color, pw).then(|| mw_to_dbm(pw_to_mw(pw)))
            })
            .fold(None, |acc: Option<f64>, dbm| Some(acc.map_or(dbm, |a| a.max(dbm))))
    }

    /// `Pt_max = min(defaultMax, refPower - (currentOBSSPD - minOBSSPD))`
    /// (spec.md §4.4.4), applied only while a spatial-reuse opportunity is
    /// active; otherwise this node transmits at its configured default.
    fn curtailed_tx_power_pw(&self) -> f64 {
        match self.active_obss_pd_dbm() {
            Some(current_obss_pd_dbm) => {
                let capped_dbm = (self.tx_power_default_dbm - (current_obss_pd_dbm - self.obss_pd_min_dbm)).min(self.tx_power_max_dbm);
                mw_to_pw(dbm_to_mw(capped_dbm))
            }
            None => self.tx_power_default_pw,
        }
    }

    fn enter_tx(&mut self, state: NodeState, packet_type: PacketType, destination: NodeId, mcs: u8, left: ChannelIdx, right: ChannelIdx, duration: SimDuration, nav: SimDuration, ctx: &mut Context<'_, SimEvent>) {
        let packet_id = self.next_packet_id;
        self.next_packet_id += 1;
        self.state = state;
        let tx_power_pw = self.curtailed_tx_power_pw();
        self.tx_frame = Some(Frame {
            destination,
            packet_id,
            packet_type,
            left,
            right,
            mcs,
            tx_power_pw,
        });
        let notification = Notification {
            source: self.id,
            packet_type,
            destination,
            packet_id,
            left_channel: left,
            right_channel: right,
            duration,
            tx_power_pw,
            tx_pos: self.pos,
            mcs,
            nav,
            bss_color: self.bss_color,
            srg: None,
        };
        if packet_type == PacketType::Data {
            self.stats.packets_sent += 1;
            self.traffic.take_one();
            self.last_data_duration = duration;
        }
        self.stats.cumulative_tx_time = self.stats.cumulative_tx_time + duration;
        self.stats.cumulative_air_time = self.stats.cumulative_air_time + duration;
        ctx.emit(PORT_START_TX, SimEvent::StartTx(notification));
        ctx.set_timer(TIMER_TX_END, duration, SimEvent::TxEnd);
    }

    fn begin_transmission_attempt(&mut self, ctx: &mut Context<'_, SimEvent>) {
        let free = self.free_channels(ctx.now());
        match select_tx_channels(self.bonding_model, self.min_channel, self.max_channel, self.primary_channel, &free, ctx.rng()) {
            Some((left, right)) => {
                if self.attempt_start.is_none() {
                    self.attempt_start = Some(ctx.now());
                }
                let num_channels = (right - left + 1) as u32;
                let duration = frame_duration(self.phy_preamble, self.rts_bits, 0, 1, self.default_mcs, num_channels, SimDuration::ZERO);
                let nav = duration + self.sifs * 3;
                self.enter_tx(NodeState::TxRts, PacketType::Rts, self.peer_id, self.default_mcs, left, right, duration, nav, ctx);
            }
            None => self.arm_backoff(ctx),
        }
    }

    fn enter_wait(&mut self, state: NodeState, ctx: &mut Context<'_, SimEvent>) {
        self.state = state;
        ctx.set_timer(TIMER_WAIT, self.sifs * 4, SimEvent::WaitTimeout);
    }

    fn on_timeout_or_loss_retry(&mut self, ctx: &mut Context<'_, SimEvent>) {
        self.retry_count += 1;
        if self.retry_count > self.retry_limit {
            // Max-retries exceeded: give up on this packet rather than
            // retrying forever. No separate "dropped" stat bucket exists —
            // every attempt along the way was already attributed to its own
            // cause, so this is only a contention reset, not a new loss.
            self.retry_count = 0;
            self.cw = self.cw_min;
        } else if self.cw_adaptation {
            self.cw = (self.cw * 2).min(self.cw_min * (1 << self.cw_stage_max.min(16)));
        }
        self.state = NodeState::Sensing;
        self.arm_backoff(ctx);
    }

    fn on_success_reset_cw(&mut self) {
        if self.cw_adaptation {
            self.cw = self.cw_min;
        }
        self.retry_count = 0;
    }

    fn finish_inflight(&mut self, notification: &Notification, ctx: &mut Context<'_, SimEvent>) {
        if let Some(inflight) = self.inflight.remove(&(notification.source, notification.packet_id)) {
            self.channel_power.on_finish(ctx.now(), &inflight.notification, &inflight.contrib, self.primary_channel);
        }
    }

    fn oracle_inputs_for(&self, notification: &Notification, receiver_state: ReceiverStateAtStart) -> OracleInputs {
        let power_of_interest = self.channel_power.power_of_interest(notification.source);
        let range = notification.channel_range();
        let max_interference = self.channel_power.max_interference(range, notification.source);
        let sinr = ChannelPowerModel::sinr(power_of_interest, self.noise_floor_pw, max_interference);
        OracleInputs {
            power_of_interest_pw: power_of_interest,
            pd_threshold_pw: self.pd_threshold_pw,
            max_interference_pw: max_interference,
            sinr,
            capture_effect_model: self.capture_effect_model,
            capture_effect_threshold_pw: self.capture_effect_threshold_pw,
            min_sinr: self.next_mcs_min_sinr(),
            receiver_state,
            constant_per: self.constant_per,
        }
    }

    fn send_nack(&mut self, to: NodeId, packet_id: PacketId, cause: LossCause, interferer: Option<NodeId>, original_packet_type: PacketType, ctx: &mut Context<'_, SimEvent>) {
        ctx.emit(
            PORT_NACK,
            SimEvent::Nack(Nack {
                to,
                packet_id,
                cause,
                interferer,
                original_packet_type,
            }),
        );
    }

    fn state_to_packet_type(state: NodeState) -> Option<PacketType> {
        match state {
            NodeState::RxRts => Some(PacketType::Rts),
            NodeState::RxCts => Some(PacketType::Cts),
            NodeState::RxData => Some(PacketType::Data),
            NodeState::RxAck => Some(PacketType::Ack),
            _ => None,
        }
    }

    /// Conclude a failed reception of `frame_type` from `peer`. An ACK
    /// failure concludes this node's own DATA attempt, so it is recorded
    /// locally with full cw/retry-count adaptation; any other frame type
    /// belongs to the peer's attempt and is reported back via NACK instead,
    /// leaving this node's own backoff untouched by a failure that was not
    /// its own transmission's. `was_expected` is false when this node was
    /// never actually in the matching RX state (e.g. it was busy with
    /// unrelated TX/RX or in NAV) — the NACK still goes out, but this node's
    /// own state and backoff are left alone.
    fn fail_reception(&mut self, frame_type: PacketType, peer: NodeId, packet_id: PacketId, cause: LossCause, interferer: Option<NodeId>, was_expected: bool, ctx: &mut Context<'_, SimEvent>) {
        self.rx_source_of_interest = None;
        self.rx_packet_id = None;
        if frame_type == PacketType::Ack {
            if was_expected {
                self.stats.record_loss(cause);
                self.stats.cumulative_lost_time = self.stats.cumulative_lost_time + self.last_data_duration;
                self.attempt_start = None;
                self.on_timeout_or_loss_retry(ctx);
            }
        } else {
            // Deferred by a SIFS rather than emitted inline: `peer` is the
            // node whose own `FinishTx` dispatch is still on the call stack
            // that reached this point (full-mesh port wiring means an
            // inline `ctx.emit(PORT_NACK, ...)` here would target a
            // component slot the runtime has not yet given back).
            self.pending_emit = Some(DeferredEmit::Nack {
                to: peer,
                packet_id,
                cause,
                interferer,
                original_packet_type: frame_type,
            });
            ctx.set_timer(TIMER_DEFERRED_EMIT, self.sifs, SimEvent::DeferredEmit);
            if was_expected {
                self.state = NodeState::Sensing;
                self.arm_backoff(ctx);
            }
        }
    }

    /// Best guess at which neighbour's overlapping transmission dominates
    /// interference on the primary channel right now, excluding `exclude`
    /// (the frame actually under judgment).
    fn dominant_interferer(&self, exclude: NodeId) -> Option<NodeId> {
        self.inflight
            .values()
            .filter(|inflight| inflight.notification.source != exclude)
            .filter(|inflight| inflight.notification.left_channel <= self.primary_channel && self.primary_channel <= inflight.notification.right_channel)
            .max_by(|a, b| self.channel_power.power_of_interest(a.notification.source).total_cmp(&self.channel_power.power_of_interest(b.notification.source)))
            .map(|inflight| inflight.notification.source)
    }

    fn on_start_tx(&mut self, notification: Notification, ctx: &mut Context<'_, SimEvent>) {
        if notification.source == self.id {
            return;
        }
        let distance = self.distance_to(notification.source);
        let received_pw = received_power_pw(self.path_loss_model, distance, notification.tx_power_pw, self.tx_gain_db, self.rx_gain_db, self.central_frequency_ghz, ctx.rng());
        let contrib = self.channel_power.on_start(ctx.now(), &notification, received_pw, self.adjacent_channel_model, self.primary_channel);
        self.inflight.insert((notification.source, notification.packet_id), InflightTx { notification: notification.clone(), contrib });

        let overlaps_primary = notification.left_channel <= self.primary_channel && self.primary_channel <= notification.right_channel;
        let addressed_to_me = notification.destination == self.id;
        // OBSS-PD spatial reuse (11ax): an inter-BSS frame this node never
        // addresses and whose received power sits below the OBSS-PD ceiling
        // is ignored for NAV purposes entirely, letting this node keep
        // contending rather than deferring to a neighbouring BSS.
        let spatial_reuse_permits_ignore = self.is_inter_bss_within_obss_pd(notification.bss_color, received_pw);

        match self.state {
            NodeState::Sensing => {
                if overlaps_primary && self.channel_power.is_busy(self.primary_channel, self.pd_threshold_pw, ctx.now(), self.primary_channel, self.pifs, self.pifs_activated) {
                    self.freeze_backoff_if_armed(ctx);
                }
                if addressed_to_me && notification.packet_type == PacketType::Rts {
                    self.rx_source_of_interest = Some(notification.source);
                    self.rx_packet_id = Some(notification.packet_id);
                    self.state = NodeState::RxRts;
                } else if overlaps_primary && !addressed_to_me && notification.nav.as_nanos() > 0 {
                    if spatial_reuse_permits_ignore {
                        self.stats.spatial_reuse_ignored += 1;
                    } else {
                        self.state = NodeState::Nav;
                        self.nav_bss_color = Some(notification.bss_color);
                        self.nav_entered_at = Some(ctx.now());
                        ctx.cancel_timer(TIMER_BACKOFF);
                        ctx.set_timer(TIMER_NAV, notification.nav, SimEvent::NavExpiry);
                    }
                }
            }
            NodeState::WaitCts | NodeState::WaitData | NodeState::WaitAck => {
                let expects = match (self.state, notification.packet_type) {
                    (NodeState::WaitCts, PacketType::Cts) => true,
                    (NodeState::WaitData, PacketType::Data) => true,
                    (NodeState::WaitAck, PacketType::Ack) => true,
                    _ => false,
                };
                if expects && addressed_to_me {
                    self.rx_source_of_interest = Some(notification.source);
                    self.rx_packet_id = Some(notification.packet_id);
                    ctx.cancel_timer(TIMER_WAIT);
                    self.state = match self.state {
                        NodeState::WaitCts => NodeState::RxCts,
                        NodeState::WaitData => NodeState::RxData,
                        NodeState::WaitAck => NodeState::RxAck,
                        _ => unreachable!(),
                    };
                }
            }
            NodeState::Nav => {
                if overlaps_primary && notification.nav.as_nanos() > 0 {
                    if spatial_reuse_permits_ignore {
                        self.stats.spatial_reuse_ignored += 1;
                    } else {
                        let stronger = notification.nav > self.sifs;
                        if stronger {
                            self.nav_bss_color = Some(notification.bss_color);
                            ctx.set_timer(TIMER_NAV, notification.nav, SimEvent::NavExpiry);
                        }
                    }
                }
            }
            NodeState::RxRts | NodeState::RxCts | NodeState::RxData | NodeState::RxAck => {
                // A second, non-addressed signal arriving mid-reception can
                // already doom the frame we are receiving: judge capture
                // effect / SINR immediately rather than waiting for our own
                // reception to finish, per the RX-state interference rule.
                if overlaps_primary && notification.source != self.rx_source_of_interest.unwrap_or(self.id) {
                    let source_of_interest = self.rx_source_of_interest.unwrap_or(notification.source);
                    let power_of_interest = self.channel_power.power_of_interest(source_of_interest);
                    let range = self.primary_channel..=self.primary_channel;
                    let max_interference = self.channel_power.max_interference(range, source_of_interest);
                    let sinr = ChannelPowerModel::sinr(power_of_interest, self.noise_floor_pw, max_interference);
                    let cause = match self.capture_effect_model {
                        CaptureEffectModel::InterferenceThreshold if max_interference > self.capture_effect_threshold_pw => Some(LossCause::CaptureEffect),
                        CaptureEffectModel::MinimumSinr if sinr < self.next_mcs_min_sinr() => Some(LossCause::Sinr),
                        _ => None,
                    };
                    if let (Some(cause), Some(packet_id), Some(frame_type)) = (cause, self.rx_packet_id, Self::state_to_packet_type(self.state)) {
                        self.fail_reception(frame_type, source_of_interest, packet_id, cause, Some(notification.source), true, ctx);
                    }
                }
            }
            _ => {}
        }
    }

    fn on_finish_tx(&mut self, notification: Notification, ctx: &mut Context<'_, SimEvent>) {
        if notification.source == self.id {
            return;
        }
        self.finish_inflight(&notification, ctx);

        if notification.destination == self.id {
            let is_expected = self.rx_source_of_interest == Some(notification.source) && self.rx_packet_id == Some(notification.packet_id);
            let receiver_state = if is_expected {
                ReceiverStateAtStart::ExpectingThis
            } else if self.state == NodeState::Nav {
                let same_bss = self.nav_bss_color.flatten() == notification.bss_color;
                ReceiverStateAtStart::Nav { same_bss }
            } else if self.state == NodeState::Sensing {
                // Addressed frame finished while we were never mid-RX of
                // anything: purely a power-model collision, not a state
                // conflict (distinct from the RX/TX-busy "pure-collision"
                // case below).
                ReceiverStateAtStart::OverlapNoRxState
            } else {
                ReceiverStateAtStart::Busy
            };

            let inputs = self.oracle_inputs_for(&notification, receiver_state);
            let verdict = decide(&inputs, ctx.rng());
            self.rx_source_of_interest = None;
            self.rx_packet_id = None;

            match verdict {
                None => {
                    self.on_success_reset_cw();
                    self.advance_after_successful_rx(notification, ctx);
                }
                Some(cause) => {
                    let interferer = self.dominant_interferer(notification.source);
                    self.fail_reception(notification.packet_type, notification.source, notification.packet_id, cause, interferer, is_expected, ctx);
                }
            }
        }

        self.maybe_resume_backoff(ctx);
    }

    /// Arm the SIFS-deferred response to a frame this node just successfully
    /// received. The response's own `enter_tx` cannot run inline here: this
    /// call is still nested inside the sender's `on_tx_end` -> `FinishTx`
    /// dispatch (full-mesh wiring means its `ctx.emit(PORT_START_TX, ...)`
    /// would target that very component's still-held slot and panic). A
    /// `ctx.set_timer` instead schedules it to fire from a fresh top-level
    /// dispatch a SIFS later, which also restores the inter-frame spacing
    /// spec.md requires between RTS/CTS/DATA/ACK.
    fn defer_response(&mut self, state: NodeState, packet_type: PacketType, destination: NodeId, left: ChannelIdx, right: ChannelIdx, duration: SimDuration, nav: SimDuration, ctx: &mut Context<'_, SimEvent>) {
        self.pending_emit = Some(DeferredEmit::Respond {
            state,
            packet_type,
            destination,
            left,
            right,
            duration,
            nav,
        });
        ctx.set_timer(TIMER_DEFERRED_EMIT, self.sifs, SimEvent::DeferredEmit);
    }

    fn advance_after_successful_rx(&mut self, notification: Notification, ctx: &mut Context<'_, SimEvent>) {
        match notification.packet_type {
            PacketType::Rts => {
                let duration = frame_duration(self.phy_preamble, self.cts_bits, 0, 1, self.default_mcs, 1, SimDuration::ZERO);
                self.defer_response(NodeState::TxCts, PacketType::Cts, notification.source, notification.left_channel, notification.right_channel, duration, SimDuration::ZERO, ctx);
            }
            PacketType::Cts => {
                let num_channels = (notification.right_channel - notification.left_channel + 1) as u32;
                let duration = frame_duration(self.phy_preamble, 64, 12_000, self.aggregation_count, self.default_mcs, num_channels, SimDuration::ZERO);
                self.defer_response(NodeState::TxData, PacketType::Data, notification.source, notification.left_channel, notification.right_channel, duration, SimDuration::ZERO, ctx);
            }
            PacketType::Data => {
                let duration = frame_duration(self.phy_preamble, self.ack_bits, 0, 1, self.default_mcs, 1, SimDuration::ZERO);
                self.defer_response(NodeState::TxAck, PacketType::Ack, notification.source, notification.left_channel, notification.right_channel, duration, SimDuration::ZERO, ctx);
            }
            PacketType::Ack => {
                // Reaching here means this node's own DATA was acknowledged.
                self.stats.packets_delivered += 1;
                if let Some(start) = self.attempt_start.take() {
                    self.stats.total_delay_secs += ctx.now().saturating_duration_since(start).as_secs_f64();
                    self.stats.delivered_for_delay_avg += 1;
                }
                self.state = NodeState::Sensing;
                self.arm_backoff(ctx);
            }
        }
    }

    fn on_tx_end(&mut self, ctx: &mut Context<'_, SimEvent>) {
        let Some(frame) = self.tx_frame.take() else { return };
        let notification = Notification {
            source: self.id,
            packet_type: frame.packet_type,
            destination: frame.destination,
            packet_id: frame.packet_id,
            left_channel: frame.left,
            right_channel: frame.right,
            duration: SimDuration::ZERO,
            tx_power_pw: frame.tx_power_pw,
            tx_pos: self.pos,
            mcs: frame.mcs,
            nav: SimDuration::ZERO,
            bss_color: self.bss_color,
            srg: None,
        };
        ctx.emit(PORT_FINISH_TX, SimEvent::FinishTx(notification));
        match self.state {
            NodeState::TxRts => self.enter_wait(NodeState::WaitCts, ctx),
            NodeState::TxCts => self.enter_wait(NodeState::WaitData, ctx),
            NodeState::TxData => self.enter_wait(NodeState::WaitAck, ctx),
            NodeState::TxAck => {
                self.state = NodeState::Sensing;
                self.arm_backoff(ctx);
            }
            _ => {}
        }
    }

    fn on_wait_timeout(&mut self, ctx: &mut Context<'_, SimEvent>) {
        if !matches!(self.state, NodeState::WaitCts | NodeState::WaitData | NodeState::WaitAck) {
            return;
        }
        // Only a WaitAck timeout belongs to the node that owns this DATA
        // attempt's packets_sent count. WaitCts is the same sender's
        // earlier-stage channel-access retry (no stats impact); WaitData
        // belongs to the responder, who never counted this exchange as sent.
        if self.state == NodeState::WaitAck {
            self.stats.record_loss(LossCause::Per);
            self.stats.cumulative_lost_time = self.stats.cumulative_lost_time + self.last_data_duration;
            self.attempt_start = None;
        }
        self.on_timeout_or_loss_retry(ctx);
    }

    fn on_nav_expiry(&mut self, ctx: &mut Context<'_, SimEvent>) {
        if self.state != NodeState::Nav {
            return;
        }
        if let Some(start) = self.nav_entered_at.take() {
            self.stats.time_in_nav = self.stats.time_in_nav + ctx.now().saturating_duration_since(start);
        }
        self.nav_bss_color = None;
        self.state = NodeState::Sensing;
        self.arm_backoff(ctx);
    }

    fn on_nack(&mut self, nack: Nack, ctx: &mut Context<'_, SimEvent>) {
        if nack.to != self.id {
            return;
        }
        if nack.original_packet_type == PacketType::Data {
            self.stats.record_loss(nack.cause);
            self.stats.cumulative_lost_time = self.stats.cumulative_lost_time + self.last_data_duration;
            self.attempt_start = None;
        }
        // A collision-type NACK names the dominant interferer the receiver
        // saw. If we (the original sender) never sensed that neighbour
        // above our own packet-detect threshold, it was invisible to our
        // carrier sense even though it clobbered our frame at the receiver
        // — the textbook hidden-node relationship.
        if matches!(nack.cause, LossCause::PureCollision | LossCause::Interference) {
            if let Some(interferer) = nack.interferer {
                if self.channel_power.power_of_interest(interferer) < self.pd_threshold_pw {
                    self.stats.hidden_nodes.insert(interferer);
                }
            }
        }
        self.on_timeout_or_loss_retry(ctx);
    }

    fn on_deferred_emit(&mut self, ctx: &mut Context<'_, SimEvent>) {
        let Some(action) = self.pending_emit.take() else { return };
        match action {
            DeferredEmit::Respond { state, packet_type, destination, left, right, duration, nav } => {
                self.enter_tx(state, packet_type, destination, self.default_mcs, left, right, duration, nav, ctx);
            }
            DeferredEmit::Nack { to, packet_id, cause, interferer, original_packet_type } => {
                self.send_nack(to, packet_id, cause, interferer, original_packet_type, ctx);
            }
        }
    }

    fn on_backoff_expiry(&mut self, ctx: &mut Context<'_, SimEvent>) {
        if self.state != NodeState::Sensing {
            return;
        }
        self.backoff_due = None;
        if self.traffic.has_pending() {
            self.begin_transmission_attempt(ctx);
        }
        // Else: no data queued. Stay idle without a running backoff; a
        // Poisson arrival (`on_traffic_tick`) re-arms it once there is
        // something to send.
    }

    fn schedule_next_arrival(&mut self, ctx: &mut Context<'_, SimEvent>) {
        if let Some(gap) = self.traffic.next_arrival_gap(ctx.rng()) {
            ctx.set_timer(TIMER_ARRIVAL, gap, SimEvent::TrafficTick);
        }
    }

    fn on_traffic_tick(&mut self, ctx: &mut Context<'_, SimEvent>) {
        self.traffic.on_arrival();
        self.schedule_next_arrival(ctx);
        if self.state == NodeState::Sensing && self.backoff_due.is_none() && self.backoff_remaining.is_none() {
            self.arm_backoff(ctx);
        }
    }

    /// Kickoff fired once at `t = 0`: arms the initial backoff and, for a
    /// `Poisson` traffic model, schedules the first arrival.
    fn on_start(&mut self, ctx: &mut Context<'_, SimEvent>) {
        self.schedule_next_arrival(ctx);
        if self.traffic.has_pending() {
            self.arm_backoff(ctx);
        }
    }
}

impl Component<SimEvent> for Node {
    fn name(&self) -> &str {
        "node"
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }

    fn activate(&mut self, event: SimEvent, ctx: &mut Context<'_, SimEvent>) {
        match event {
            SimEvent::StartTx(n) => self.on_start_tx(n, ctx),
            SimEvent::FinishTx(n) => self.on_finish_tx(n, ctx),
            SimEvent::Nack(n) => self.on_nack(n, ctx),
            SimEvent::Start => self.on_start(ctx),
            SimEvent::BackoffExpiry => self.on_backoff_expiry(ctx),
            SimEvent::TxEnd => self.on_tx_end(ctx),
            SimEvent::WaitTimeout => self.on_wait_timeout(ctx),
            SimEvent::NavExpiry => self.on_nav_expiry(ctx),
            SimEvent::TrafficTick => self.on_traffic_tick(ctx),
            SimEvent::DeferredEmit => self.on_deferred_emit(ctx),
        }
    }
}
