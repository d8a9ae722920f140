//! Bucketed calendar queue.
//!
//! Events are hashed into a fixed ring of buckets by `time`, with each
//! bucket holding a short list kept in `(time, seq)` order. Popping sweeps
//! buckets starting at a cursor that advances one "day" (bucket width) at a
//! time; when the scan wraps all the way around without filling any bucket
//! with a strictly smaller instant, the earliest seen event across all
//! buckets is returned instead (the linear-scan fallback for sparse
//! queues). The bucket count is resized when occupancy drifts outside
//! `[n/2 - 2, 2n]`, and the bucket width is re-estimated from a sample of
//! up to 25 pending events each time that happens.

use super::event::{Event, EventId};
use super::queue::EventQueue;
use super::time::{Nanos, SimInstant};

const MAX_SAMPLE: usize = 25;
const MIN_BUCKETS: usize = 2;

pub struct CalendarQueue<Ev> {
    buckets: Vec<Vec<Event<Ev>>>,
    bucket_width: Nanos,
    cursor: usize,
    cursor_time: SimInstant,
    len: usize,
}

impl<Ev> CalendarQueue<Ev> {
    pub fn new() -> Self {
        CalendarQueue {
            buckets: vec![Vec::new(); MIN_BUCKETS],
            bucket_width: 1,
            cursor: 0,
            cursor_time: SimInstant::ZERO,
            len: 0,
        }
    }

    fn bucket_index(&self, time: SimInstant) -> usize {
        if self.bucket_width == 0 {
            return 0;
        }
        ((time.0 / self.bucket_width) as usize) % self.buckets.len()
    }

    /// Insert into the bucket for `event.time`, keeping the bucket sorted by
    /// `(time, seq)` so within-bucket pops stay in FIFO-at-equal-time order.
    fn insert_into_bucket(&mut self, event: Event<Ev>) {
        let idx = self.bucket_index(event.time);
        let key = event.order_key();
        let bucket = &mut self.buckets[idx];
        let pos = bucket
            .binary_search_by(|e| e.order_key().cmp(&key))
            .unwrap_or_else(|p| p);
        bucket.insert(pos, event);
    }

    fn resample_width(&self) -> Nanos {
        let mut sample: Vec<SimInstant> = self
            .buckets
            .iter()
            .flatten()
            .take(MAX_SAMPLE)
            .map(|e| e.time)
            .collect();
        if sample.len() < 2 {
            return self.bucket_width.max(1);
        }
        sample.sort_unstable();

        let gaps: Vec<u64> = sample.windows(2).map(|w| w[1].0.saturating_sub(w[0].0)).collect();
        if gaps.is_empty() {
            return self.bucket_width.max(1);
        }
        let mean: f64 = gaps.iter().sum::<u64>() as f64 / gaps.len() as f64;
        let below: Vec<u64> = gaps.iter().copied().filter(|&g| (g as f64) < 2.0 * mean).collect();
        let basis = if below.is_empty() {
            mean
        } else {
            below.iter().sum::<u64>() as f64 / below.len() as f64
        };
        ((basis * 3.0).round() as u64).max(1)
    }

    fn rebucket(&mut self, new_count: usize, new_width: Nanos) {
        let new_count = new_count.max(MIN_BUCKETS);
        let old: Vec<Event<Ev>> = self.buckets.drain(..).flatten().collect();
        self.buckets = (0..new_count).map(|_| Vec::new()).collect();
        self.bucket_width = new_width.max(1);
        self.cursor = 0;
        for e in old {
            self.insert_into_bucket(e);
        }
    }

    fn maybe_resize(&mut self) {
        let n = self.buckets.len();
        if self.len > 2 * n || (n > MIN_BUCKETS && self.len < n / 2 && self.len.saturating_sub(2) < n / 2) {
            let width = self.resample_width();
            let target = (self.len.max(1) * 2).max(MIN_BUCKETS);
            self.rebucket(target, width);
        }
    }
}

impl<Ev> Default for CalendarQueue<Ev> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Ev> EventQueue<Ev> for CalendarQueue<Ev> {
    fn push(&mut self, event: Event<Ev>) {
        self.insert_into_bucket(event);
        self.len += 1;
        self.maybe_resize();
    }

    fn pop(&mut self) -> Option<Event<Ev>> {
        if self.len == 0 {
            return None;
        }
        let n = self.buckets.len();
        for _ in 0..n {
            if let Some(event) = self.buckets[self.cursor].first() {
                if event.time < self.cursor_time + crate::runtime::time::SimDuration(self.bucket_width) {
                    let event = self.buckets[self.cursor].remove(0);
                    self.len -= 1;
                    self.maybe_resize();
                    return Some(event);
                }
            }
            self.cursor = (self.cursor + 1) % n;
            self.cursor_time = self.cursor_time + crate::runtime::time::SimDuration(self.bucket_width);
        }

        // Full sweep found nothing due in its own bucket's current day:
        // fall back to a direct linear scan for the global minimum.
        let (mut best_bucket, mut best_pos) = (0usize, 0usize);
        let mut best_key = None;
        for (bi, bucket) in self.buckets.iter().enumerate() {
            if let Some(e) = bucket.first() {
                let key = e.order_key();
                if best_key.map_or(true, |bk| key < bk) {
                    best_key = Some(key);
                    best_bucket = bi;
                    best_pos = 0;
                }
            }
        }
        let event = self.buckets[best_bucket].remove(best_pos);
        self.cursor = best_bucket;
        self.cursor_time = event.time;
        self.len -= 1;
        self.maybe_resize();
        Some(event)
    }

    fn cancel(&mut self, id: EventId) -> Option<Event<Ev>> {
        for bucket in &mut self.buckets {
            if let Some(pos) = bucket.iter().position(|e| e.id == id) {
                self.len -= 1;
                return Some(bucket.remove(pos));
            }
        }
        None
    }

    fn peek_time(&self) -> Option<SimInstant> {
        self.buckets.iter().flatten().map(|e| e.time).min()
    }

    fn len(&self) -> usize {
        self.len
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
        let mut q = CalendarQueue::new();
        q.push(ev(1, 10, 0));
        q.push(ev(2, 5, 1));
        q.push(ev(3, 10, 2));
        q.push(ev(4, 5, 3));

        let mut out = Vec::new();
        while let Some(e) = q.pop() {
            out.push(e.id);
        }
        assert_eq!(out, vec![EventId(2), EventId(4), EventId(1), EventId(3)]);
    }

    #[test]
    fn survives_resize_with_many_events() {
        let mut q = CalendarQueue::new();
        for i in 0..500u64 {
            q.push(ev(i, (i * 37) % 4000, i));
        }
        let mut last = SimInstant::ZERO;
        let mut count = 0;
        while let Some(e) = q.pop() {
            assert!(e.time >= last);
            last = e.time;
            count += 1;
        }
        assert_eq!(count, 500);
    }

    #[test]
    fn cancel_removes_pending_event() {
        let mut q = CalendarQueue::new();
        q.push(ev(1, 10, 0));
        q.push(ev(2, 5, 1));
        assert!(q.cancel(EventId(1)).is_some());
        assert_eq!(q.len(), 1);
        assert_eq!(q.pop().unwrap().id, EventId(2));
    }
}
