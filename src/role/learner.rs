//! # Summary
//!
//! This module defines the `Learner` struct, which decides a seqn. Learners
//! count votes per round and settle on the first value that a quorum of
//! distinct acceptors voted for. A Learn from any peer settles it directly.

use std::collections::HashSet as Set;

use hashbrown::HashMap as Map;

use crate::message::Body;

/// Tallies votes for one seqn until some value reaches a quorum.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Learner {
    round: i64,
    quorum: usize,

    /// Vote count per value in `round`
    votes: Map<Vec<u8>, usize>,

    /// Acceptors that have voted in `round`
    voted: Set<usize>,

    /// Decided value. Sticky once set.
    value: Option<Vec<u8>>,
}

impl Learner {
    pub fn new(quorum: usize) -> Self {
        Learner {
            round: 1,
            quorum,
            votes: Map::default(),
            voted: Set::default(),
            value: None,
        }
    }

    pub fn done(&self) -> bool {
        self.value.is_some()
    }

    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    pub fn round(&self) -> i64 {
        self.round
    }

    /// Processes `body` sent by the acceptor at index `from`.
    ///
    /// Returns the message to broadcast, if any. Check `done` afterwards to
    /// find out whether this update decided the instance.
    pub fn update(&mut self, body: &Body, from: Option<usize>) -> Option<Body> {
        if self.done() {
            return None
        }
        match body {
        | Body::Learn { value } => {
            self.value = Some(value.clone());
            None
        }
        | Body::Vote { vrnd, value } => self.respond_vote(*vrnd, value, from),
        | Body::Nop
        | Body::Invite { .. }
        | Body::Rsvp { .. }
        | Body::Nominate { .. }
        | Body::Tick
        | Body::Propose { .. } => None,
        }
    }

    fn respond_vote(&mut self, vrnd: i64, value: &[u8], from: Option<usize>) -> Option<Body> {
        let from = from?;

        if vrnd < self.round {
            return None
        }

        if vrnd > self.round {
            self.round = vrnd;
            self.votes.clear();
            self.voted.clear();
        }

        if !self.voted.insert(from) {
            return None
        }

        let count = self.votes.entry(value.to_vec()).or_insert(0);
        *count += 1;
        if *count < self.quorum {
            return None
        }

        self.value = Some(value.to_vec());
        Some(Body::Learn { value: value.to_vec() })
    }
}
