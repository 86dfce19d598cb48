//! # Summary
//!
//! Seqn-ordered packet queue. The manager only releases the lowest-seqn
//! packet once its seqn is inside the pipeline window, so everything for
//! later instances waits here. Packets for the same seqn leave in arrival
//! order.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::message::Packet;

#[derive(Clone, Debug)]
struct Queued {
    order: u64,
    packet: Packet,
}

impl Queued {
    fn key(&self) -> (i64, u64) {
        (self.packet.seqn, self.order)
    }
}

impl PartialEq for Queued {
    fn eq(&self, rhs: &Self) -> bool {
        self.key() == rhs.key()
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, rhs: &Self) -> Option<Ordering> {
        Some(self.cmp(rhs))
    }
}

impl Ord for Queued {
    fn cmp(&self, rhs: &Self) -> Ordering {
        self.key().cmp(&rhs.key())
    }
}

/// Min-heap of packets keyed by seqn.
#[derive(Clone, Debug, Default)]
pub struct Packets {
    heap: BinaryHeap<Reverse<Queued>>,
    counter: u64,
}

impl Packets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, packet: Packet) {
        self.counter += 1;
        self.heap.push(Reverse(Queued {
            order: self.counter,
            packet,
        }));
    }

    /// Seqn of the next packet to leave the queue.
    pub fn peek_seqn(&self) -> Option<i64> {
        self.heap.peek().map(|Reverse(queued)| queued.packet.seqn)
    }

    pub fn pop(&mut self) -> Option<Packet> {
        self.heap.pop().map(|Reverse(queued)| queued.packet)
    }

    /// Removes the next packet only if its seqn is below `limit`.
    pub fn pop_below(&mut self, limit: i64) -> Option<Packet> {
        match self.peek_seqn() {
        | Some(seqn) if seqn < limit => self.pop(),
        | _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
