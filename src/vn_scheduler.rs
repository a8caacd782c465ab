//! Deterministic discrete-event timeline
//!
//! Events are ordered by time, ties broken by insertion order, so a run is
//! reproducible given the same inputs. Cancellation is lazy: a cancelled event
//! stays in the heap but is skipped when it reaches the front.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use hashbrown::HashSet;

use crate::vn_error::ScheduleError;
use crate::vn_interface::{NodeId, SimTime};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct EventHandle {
    order: u64,
}

#[derive(Debug)]
pub struct ScheduledEvent<P> {
    pub time: SimTime,
    /// Insertion order, unique per scheduler
    pub order: u64,
    pub target: NodeId,
    pub payload: P,
}

impl<P> ScheduledEvent<P> {
    pub fn handle(&self) -> EventHandle {
        EventHandle { order: self.order }
    }
}

impl<P> PartialEq for ScheduledEvent<P> {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.order == other.order
    }
}

impl<P> Eq for ScheduledEvent<P> {}

impl<P> PartialOrd for ScheduledEvent<P> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<P> Ord for ScheduledEvent<P> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest time first, then first scheduled)
        (other.time, other.order).cmp(&(self.time, self.order))
    }
}

pub struct Scheduler<P> {
    now: SimTime,
    next_order: u64,
    queue: BinaryHeap<ScheduledEvent<P>>,
    /// Orders of events that are neither fired nor cancelled
    pending: HashSet<u64>,
    processed: u64,
}

impl<P> Scheduler<P> {
    pub fn new() -> Self {
        Self {
            now: 0,
            next_order: 0,
            queue: BinaryHeap::new(),
            pending: HashSet::new(),
            processed: 0,
        }
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Number of events still waiting to fire
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn is_pending(&self, handle: EventHandle) -> bool {
        self.pending.contains(&handle.order)
    }

    /// Schedule `payload` for `target` after `delay` microseconds
    pub fn schedule(&mut self, delay: i64, target: NodeId, payload: P) -> Result<EventHandle, ScheduleError> {
        if delay < 0 {
            return Err(ScheduleError::InvalidSchedule {
                at: self.now as i128 + delay as i128,
                now: self.now,
            });
        }
        self.schedule_at(self.now.saturating_add(delay as u64), target, payload)
    }

    /// Schedule at an absolute time, which must not lie in the past
    pub fn schedule_at(&mut self, time: SimTime, target: NodeId, payload: P) -> Result<EventHandle, ScheduleError> {
        if time < self.now {
            return Err(ScheduleError::InvalidSchedule {
                at: time as i128,
                now: self.now,
            });
        }

        let order = self.next_order;
        self.next_order += 1;
        self.pending.insert(order);
        self.queue.push(ScheduledEvent {
            time,
            order,
            target,
            payload,
        });

        Ok(EventHandle { order })
    }

    /// Cancel a pending event. Returns false if it already fired or was cancelled.
    pub fn cancel(&mut self, handle: EventHandle) -> bool {
        self.pending.remove(&handle.order)
    }

    /// Pop the earliest pending event, unless it lies beyond `stop_time`
    pub fn pop_until(&mut self, stop_time: SimTime) -> Option<ScheduledEvent<P>> {
        loop {
            let front = self.queue.peek()?;

            if !self.pending.contains(&front.order) {
                self.queue.pop();
                continue;
            }

            if front.time > stop_time {
                return None;
            }

            let event = self.queue.pop()?;
            self.pending.remove(&event.order);
            self.now = event.time;
            self.processed += 1;
            return Some(event);
        }
    }

    /// Fire events in order until the queue is empty or the next one lies beyond
    /// `stop_time`. Events left behind are never invoked.
    ///
    /// Returns the number of events handled.
    pub fn run_until<F>(&mut self, stop_time: SimTime, mut handler: F) -> u64
    where
        F: FnMut(&mut Self, ScheduledEvent<P>),
    {
        let mut handled = 0;
        while let Some(event) = self.pop_until(stop_time) {
            handler(self, event);
            handled += 1;
        }
        self.now = self.now.max(stop_time);
        handled
    }
}

impl<P> Default for Scheduler<P> {
    fn default() -> Self {
        Self::new()
    }
}
