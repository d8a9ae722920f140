//! Pending-event storage strategies shared by the runtime.

use super::event::{ComponentId, Event, EventId};
use super::time::SimInstant;

/// A priority queue of scheduled events, ordered by `(time, seq)`.
///
/// Two implementations are provided: [`LinearQueue`], a simple sorted-vec
/// insertion queue, and [`CalendarQueue`], a bucketed structure that trades
/// insertion simplicity for amortized constant-time operation on workloads
/// with many pending events. Both give identical event traces for the same
/// sequence of `push`/`pop`/`cancel` calls; they differ only in performance.
pub trait EventQueue<Ev> {
    fn push(&mut self, event: Event<Ev>);

    /// Remove and return the event with the smallest `(time, seq)` key.
    fn pop(&mut self) -> Option<Event<Ev>>;

    /// Remove a previously pushed event by id, if it is still pending.
    fn cancel(&mut self, id: EventId) -> Option<Event<Ev>>;

    fn peek_time(&self) -> Option<SimInstant>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Straightforward sorted-insertion queue. O(n) push, O(1) pop from the
/// back (the vector is kept sorted in descending key order so the next
/// event to fire is always the last element).
#[derive(Default)]
pub struct LinearQueue<Ev> {
    events: Vec<Event<Ev>>,
}

impl<Ev> LinearQueue<Ev> {
    pub fn new() -> Self {
        LinearQueue { events: Vec::new() }
    }
}

impl<Ev> EventQueue<Ev> for LinearQueue<Ev> {
    fn push(&mut self, event: Event<Ev>) {
        let key = event.order_key();
        let pos = self
            .events
            .binary_search_by(|e| key.cmp(&e.order_key()))
            .unwrap_or_else(|p| p);
        self.events.insert(pos, event);
    }

    fn pop(&mut self) -> Option<Event<Ev>> {
        self.events.pop()
    }

    fn cancel(&mut self, id: EventId) -> Option<Event<Ev>> {
        let pos = self.events.iter().position(|e| e.id == id)?;
        Some(self.events.remove(pos))
    }

    fn peek_time(&self) -> Option<SimInstant> {
        self.events.last().map(|e| e.time)
    }

    fn len(&self) -> usize {
        self.events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::event::EventId;

    fn ev(id: u64, time: u64, seq: u64) -> Event<i32> {
        Event {
            id: EventId(id),
            time: SimInstant(time),
            seq,
            target: 0,
            payload: id as i32,
        }
    }

    #[test]
    fn pops_in_time_then_seq_order() {
        let mut q = LinearQueue::new();
        q.push(ev(1, 10, 0));
        q.push(ev(2, 5, 1));
        q.push(ev(3, 10, 2));
        q.push(ev(4, 5, 3));

        assert_eq!(q.pop().unwrap().id, EventId(2));
        assert_eq!(q.pop().unwrap().id, EventId(4));
        assert_eq!(q.pop().unwrap().id, EventId(1));
        assert_eq!(q.pop().unwrap().id, EventId(3));
        assert!(q.pop().is_none());
    }

    #[test]
    fn cancel_removes_pending_event() {
        let mut q = LinearQueue::new();
        q.push(ev(1, 10, 0));
        q.push(ev(2, 5, 1));
        assert!(q.cancel(EventId(1)).is_some());
        assert_eq!(q.len(), 1);
        assert_eq!(q.pop().unwrap().id, EventId(2));
    }
}
