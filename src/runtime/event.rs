//! Event and identifier types for the runtime's priority queue.

use super::time::SimInstant;

pub type ComponentId = usize;

/// Stable handle to a scheduled event. Used by `cancel` and by timer slots to
/// recognize "this is the event I'm still waiting on" after a re-arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(pub(crate) u64);

/// A scheduled activation: fire `payload` at component `target` when
/// simulated time reaches `time`. `seq` is the monotonically increasing
/// insertion counter used to break ties between events scheduled for the
/// same instant — earliest `schedule` call wins (FIFO), matching the
/// ordering this crate documents for same-instant events.
pub struct Event<Ev> {
    pub id: EventId,
    pub time: SimInstant,
    pub seq: u64,
    pub target: ComponentId,
    pub payload: Ev,
}

impl<Ev> Event<Ev> {
    /// Ordering key: earlier time first, then earlier sequence number.
    pub fn order_key(&self) -> (SimInstant, u64) {
        (self.time, self.seq)
    }
}
