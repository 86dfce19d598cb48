//! # Summary
//!
//! Time-ordered scheduling of per-seqn retries.
//!
//! A `Trigger` records that seqn `seqn` should be poked at `at`. The manager
//! keeps two independent `Triggers` queues (fills and ticks) and polls them
//! from its own loop, so no retry ever owns a timer of its own.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

/// Ordered by fire time, then seqn.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Trigger {
    pub at: Instant,
    pub seqn: i64,
}

/// Min-heap of triggers.
#[derive(Clone, Debug, Default)]
pub struct Triggers(BinaryHeap<Reverse<Trigger>>);

impl Triggers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `seqn` to fire `delay` after `now`.
    pub fn schedule(&mut self, seqn: i64, now: Instant, delay: Duration) {
        self.0.push(Reverse(Trigger {
            at: now + delay,
            seqn,
        }));
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Earliest pending trigger.
    pub fn peek(&self) -> Option<Trigger> {
        self.0.peek().map(|Reverse(trigger)| *trigger)
    }

    /// Removes and returns the seqns of every trigger due at `now`, earliest first.
    pub fn pop_due(&mut self, now: Instant) -> Vec<i64> {
        let mut due = Vec::new();
        while let Some(trigger) = self.peek() {
            if trigger.at > now {
                break
            }
            self.0.pop();
            due.push(trigger.seqn);
        }
        due
    }

    /// Mean time remaining until pending triggers fire. Overdue triggers count as zero.
    pub fn average_delay(&self, now: Instant) -> Option<Duration> {
        if self.0.is_empty() {
            return None
        }
        let total: Duration = self.0
            .iter()
            .map(|Reverse(trigger)| trigger.at.saturating_duration_since(now))
            .sum();
        Some(total / self.0.len() as u32)
    }

    /// Pending triggers in firing order.
    pub fn sorted(&self) -> Vec<Trigger> {
        let mut triggers: Vec<Trigger> = self.0
            .iter()
            .map(|Reverse(trigger)| *trigger)
            .collect();
        triggers.sort();
        triggers
    }
}
