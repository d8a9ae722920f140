//! The wire payload exchanged between nodes, and the domain event enum
//! dispatched through the runtime.

use crate::runtime::SimDuration;

pub type NodeId = usize;
pub type PacketId = u64;
pub type ChannelIdx = u8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Rts,
    Cts,
    Data,
    Ack,
}

/// Immutable once emitted. Carries everything a peer's channel-power model
/// and loss oracle need to account for this transmission.
#[derive(Debug, Clone)]
pub struct Notification {
    pub source: NodeId,
    pub packet_type: PacketType,
    pub destination: NodeId,
    pub packet_id: PacketId,
    pub left_channel: ChannelIdx,
    pub right_channel: ChannelIdx,
    pub duration: SimDuration,
    pub tx_power_pw: f64,
    pub tx_pos: (f64, f64, f64),
    pub mcs: u8,
    pub nav: SimDuration,
    pub bss_color: Option<u8>,
    pub srg: Option<u8>,
}

impl Notification {
    pub fn channel_range(&self) -> std::ops::RangeInclusive<ChannelIdx> {
        self.left_channel..=self.right_channel
    }
}

#[derive(Debug, Clone)]
pub struct Nack {
    pub to: NodeId,
    pub packet_id: PacketId,
    pub cause: crate::simulation::loss_oracle::LossCause,
    /// Best-guess identity of the neighbour whose overlapping transmission
    /// dominated interference at the judging receiver, when the cause was a
    /// collision rather than a single-link failure. Lets the original
    /// sender learn about a hidden-node relationship it cannot observe
    /// directly, since it never hears from the receiver except via NACK.
    pub interferer: Option<NodeId>,
    /// Type of the frame this NACK concerns. Only `Data` failures count
    /// against the recipient's packets-lost statistic: RTS/CTS failures are
    /// channel-access retries, and an ACK failure is recorded directly by
    /// the node that judged it (it already owns the packets-sent count) and
    /// never reaches `on_nack` at all.
    pub original_packet_type: PacketType,
}

/// The single payload type every component in a given `Runtime<SimEvent>`
/// shares. Ports carry `StartTx`/`FinishTx`/`Nack`; the rest are
/// self-addressed timer firings.
#[derive(Debug, Clone)]
pub enum SimEvent {
    StartTx(Notification),
    FinishTx(Notification),
    Nack(Nack),
    /// Self-addressed kickoff, scheduled once per node at `t = 0` by the
    /// runtime's setup code. Arms the initial backoff and, for a `Poisson`
    /// traffic model, the first arrival tick.
    Start,
    BackoffExpiry,
    TxEnd,
    WaitTimeout,
    NavExpiry,
    TrafficTick,
    /// Fires `self.sifs` after a reception this node must respond to (a CTS,
    /// DATA, ACK, or NACK) was decided, carrying out the response `enter_tx`
    /// or `send_nack` call that would otherwise have to run synchronously
    /// from inside the triggering frame's own `FinishTx` dispatch — and so
    /// reach back into a component still mid-activation (see `pending_emit`
    /// in `node.rs`).
    DeferredEmit,
}
