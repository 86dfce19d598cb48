//! # Summary
//!
//! This module defines the `Coordinator` struct, the proposing side of an
//! instance. A coordinator owns a disjoint arithmetic sequence of rounds,
//! starting at `index + size` and stepping by `size`, so no two members of
//! the same acceptor set ever coordinate the same round.

use std::collections::HashSet as Set;

use crate::message::Body;

/// Proposes a value for one seqn and drives it to nomination.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Coordinator {
    /// Number of acceptors in this instance
    size: i64,

    /// Distinct rsvps needed to nominate
    quorum: usize,

    /// False for nodes outside the acceptor set, which never coordinate
    member: bool,

    /// Whether a local proposal has started the first round
    begun: bool,

    /// Value this node would like to see chosen
    target: Vec<u8>,

    /// Current round
    crnd: i64,

    /// Value nominated in the current round, once chosen
    cval: Option<Vec<u8>>,

    /// Acceptors that promised the current round
    rsvps: Set<usize>,

    /// Highest voted round reported by an rsvp
    vr: i64,

    /// Value voted in round `vr`
    vv: Vec<u8>,

    /// Highest round observed in any rsvp
    seen: i64,
}

/// Result of feeding one message to a coordinator.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Output {
    /// Message to broadcast, if any
    pub message: Option<Body>,

    /// Set when a new round was opened and a retry should be scheduled for it
    pub started: bool,
}

impl Coordinator {
    /// `index` is this node's position in the sorted acceptor set, if any.
    pub fn new(index: Option<usize>, size: usize, quorum: usize) -> Self {
        let size = size as i64;
        Coordinator {
            size,
            quorum,
            member: index.is_some(),
            begun: false,
            target: Vec::new(),
            crnd: index.map(|index| index as i64).unwrap_or(0) + size,
            cval: None,
            rsvps: Set::default(),
            vr: 0,
            vv: Vec::new(),
            seen: 0,
        }
    }

    pub fn begun(&self) -> bool {
        self.begun
    }

    pub fn crnd(&self) -> i64 {
        self.crnd
    }

    pub fn seen(&self) -> i64 {
        self.seen
    }

    pub fn cval(&self) -> Option<&[u8]> {
        self.cval.as_deref()
    }

    /// Processes `body` sent by the acceptor at index `from`.
    pub fn update(&mut self, body: &Body, from: Option<usize>) -> Output {
        match body {
        | Body::Propose { value } => self.respond_propose(value),
        | Body::Rsvp { crnd, vrnd, value } => self.respond_rsvp(*crnd, *vrnd, value, from),
        | Body::Tick => self.respond_tick(),
        | Body::Nop
        | Body::Invite { .. }
        | Body::Nominate { .. }
        | Body::Vote { .. }
        | Body::Learn { .. } => Output::default(),
        }
    }

    fn respond_propose(&mut self, value: &[u8]) -> Output {
        if self.begun {
            return Output::default()
        }
        if !self.member {
            debug!("not in the acceptor set; ignoring proposal");
            return Output::default()
        }
        self.begun = true;
        self.target = value.to_vec();
        self.reset();
        Output {
            message: Some(Body::Invite { crnd: self.crnd }),
            started: true,
        }
    }

    fn respond_rsvp(&mut self, crnd: i64, vrnd: i64, value: &[u8], from: Option<usize>) -> Output {
        if !self.begun || self.cval.is_some() {
            return Output::default()
        }

        self.seen = std::cmp::max(self.seen, crnd);

        if crnd != self.crnd {
            return Output::default()
        }

        let from = match from {
        | Some(from) => from,
        | None => return Output::default(),
        };

        if vrnd > self.vr {
            self.vr = vrnd;
            self.vv = value.to_vec();
        }

        self.rsvps.insert(from);
        if self.rsvps.len() < self.quorum {
            return Output::default()
        }

        let cval = if self.vr > 0 {
            self.vv.clone()
        } else {
            self.target.clone()
        };
        self.cval = Some(cval.clone());
        Output {
            message: Some(Body::Nominate { crnd: self.crnd, value: cval }),
            started: false,
        }
    }

    fn respond_tick(&mut self) -> Output {
        if !self.begun {
            return Output::default()
        }
        self.crnd += self.size;
        self.reset();
        Output {
            message: Some(Body::Invite { crnd: self.crnd }),
            started: true,
        }
    }

    fn reset(&mut self) {
        self.vr = 0;
        self.vv.clear();
        self.rsvps.clear();
        self.cval = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn propose(value: &str) -> Body {
        Body::Propose { value: value.as_bytes().to_vec() }
    }

    fn rsvp(crnd: i64, vrnd: i64, value: &str) -> Body {
        Body::Rsvp { crnd, vrnd, value: value.as_bytes().to_vec() }
    }

    fn nominate(crnd: i64, value: &str) -> Body {
        Body::Nominate { crnd, value: value.as_bytes().to_vec() }
    }

    #[test]
    fn round_is_seeded_by_index_and_size() {
        assert_eq!(Coordinator::new(Some(0), 3, 2).crnd(), 3);
        assert_eq!(Coordinator::new(Some(1), 3, 2).crnd(), 4);
        assert_eq!(Coordinator::new(Some(2), 3, 2).crnd(), 5);
    }

    #[test]
    fn propose_sends_invite_once() {
        let mut co = Coordinator::new(Some(1), 3, 2);
        let output = co.update(&propose("foo"), None);
        assert_eq!(output.message, Some(Body::Invite { crnd: 4 }));
        assert!(output.started);
        assert!(co.begun());
        assert_eq!(co.update(&propose("bar"), None), Output::default());
    }

    #[test]
    fn non_member_never_begins() {
        let mut co = Coordinator::new(None, 3, 2);
        assert_eq!(co.update(&propose("foo"), None), Output::default());
        assert!(!co.begun());
    }

    #[test]
    fn quorum_of_rsvps_nominates_target() {
        let mut co = Coordinator::new(Some(0), 3, 2);
        co.update(&propose("foo"), None);
        assert_eq!(co.update(&rsvp(3, 0, ""), Some(0)).message, None);
        assert_eq!(co.update(&rsvp(3, 0, ""), Some(1)).message, Some(nominate(3, "foo")));
        assert_eq!(co.cval(), Some(&b"foo"[..]));
        assert_eq!(co.update(&rsvp(3, 0, ""), Some(2)).message, None);
    }

    #[test]
    fn duplicate_rsvp_counts_once() {
        let mut co = Coordinator::new(Some(0), 3, 2);
        co.update(&propose("foo"), None);
        assert_eq!(co.update(&rsvp(3, 0, ""), Some(1)).message, None);
        assert_eq!(co.update(&rsvp(3, 0, ""), Some(1)).message, None);
        assert_eq!(co.cval(), None);
    }

    #[test]
    fn adopts_highest_voted_value() {
        let mut co = Coordinator::new(Some(0), 5, 3);
        co.update(&propose("foo"), None);
        co.update(&rsvp(5, 1, "low"), Some(0));
        co.update(&rsvp(5, 2, "high"), Some(1));
        let output = co.update(&rsvp(5, 0, ""), Some(2));
        assert_eq!(output.message, Some(nominate(5, "high")));
    }

    #[test]
    fn ignores_rsvps_for_other_rounds_but_tracks_seen() {
        let mut co = Coordinator::new(Some(0), 3, 1);
        co.update(&propose("foo"), None);
        assert_eq!(co.update(&rsvp(7, 0, ""), Some(1)).message, None);
        assert_eq!(co.seen(), 7);
        assert_eq!(co.cval(), None);
    }

    #[test]
    fn ignores_rsvps_before_proposal() {
        let mut co = Coordinator::new(Some(0), 1, 1);
        assert_eq!(co.update(&rsvp(1, 0, ""), Some(0)), Output::default());
        assert_eq!(co.seen(), 0);
    }

    #[test]
    fn ignores_rsvps_from_unknown_senders() {
        let mut co = Coordinator::new(Some(0), 1, 1);
        co.update(&propose("foo"), None);
        assert_eq!(co.update(&rsvp(1, 0, ""), None).message, None);
        assert_eq!(co.update(&rsvp(1, 0, ""), Some(0)).message, Some(nominate(1, "foo")));
    }

    #[test]
    fn tick_strictly_increases_round() {
        let mut co = Coordinator::new(Some(2), 3, 2);
        co.update(&propose("foo"), None);
        let mut rounds = vec![co.crnd()];
        for _ in 0..5 {
            let output = co.update(&Body::Tick, None);
            assert!(output.started);
            assert_eq!(output.message, Some(Body::Invite { crnd: co.crnd() }));
            rounds.push(co.crnd());
        }
        assert_eq!(rounds, vec![5, 8, 11, 14, 17, 20]);
    }

    #[test]
    fn tick_abandons_chosen_value() {
        let mut co = Coordinator::new(Some(0), 1, 1);
        co.update(&propose("foo"), None);
        co.update(&rsvp(1, 0, ""), Some(0));
        assert!(co.cval().is_some());
        co.update(&Body::Tick, None);
        assert_eq!(co.cval(), None);
        assert_eq!(co.update(&rsvp(2, 0, ""), Some(0)).message, Some(nominate(2, "foo")));
    }
}
