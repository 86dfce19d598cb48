//! # Summary
//!
//! This module defines the `Acceptor` struct, which acts as the instance's
//! distributed memory. Acceptors keep track of the highest round they have
//! promised and the last value they voted for.

use crate::message::Body;

/// Functions as distributed memory for one seqn.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Acceptor {
    /// Highest round promised
    rnd: i64,

    /// Round of the most recent vote, or zero if never voted
    vrnd: i64,

    /// Value of the most recent vote
    vval: Vec<u8>,
}

impl Acceptor {
    pub fn rnd(&self) -> i64 {
        self.rnd
    }

    pub fn vrnd(&self) -> i64 {
        self.vrnd
    }

    pub fn vval(&self) -> &[u8] {
        &self.vval
    }

    /// Responds to invitations with a promise and to nominations with a vote.
    pub fn update(&mut self, body: &Body) -> Option<Body> {
        match body {
        | Body::Invite { crnd } => {
            if *crnd <= self.rnd {
                return None
            }
            self.rnd = *crnd;
            Some(Body::Rsvp {
                crnd: *crnd,
                vrnd: self.vrnd,
                value: self.vval.clone(),
            })
        }
        | Body::Nominate { crnd, value } => {
            // Never vote twice in the same round, even if the nomination is replayed.
            if *crnd < self.rnd || *crnd == self.vrnd {
                return None
            }
            self.rnd = *crnd;
            self.vrnd = *crnd;
            self.vval = value.clone();
            Some(Body::Vote {
                vrnd: *crnd,
                value: value.clone(),
            })
        }
        | Body::Nop
        | Body::Rsvp { .. }
        | Body::Vote { .. }
        | Body::Tick
        | Body::Propose { .. }
        | Body::Learn { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invite(crnd: i64) -> Body {
        Body::Invite { crnd }
    }

    fn nominate(crnd: i64, value: &str) -> Body {
        Body::Nominate { crnd, value: value.as_bytes().to_vec() }
    }

    fn rsvp(crnd: i64, vrnd: i64, value: &str) -> Body {
        Body::Rsvp { crnd, vrnd, value: value.as_bytes().to_vec() }
    }

    fn vote(vrnd: i64, value: &str) -> Body {
        Body::Vote { vrnd, value: value.as_bytes().to_vec() }
    }

    #[test]
    fn ignores_old_messages() {
        let cases = vec![
            (invite(11), nominate(1, "v")),
            (nominate(11, "v"), invite(1)),
            (invite(11), invite(1)),
            (nominate(11, "v"), nominate(1, "v")),
        ];
        for (first, second) in cases {
            let mut acceptor = Acceptor::default();
            acceptor.update(&first);
            assert_eq!(acceptor.update(&second), None, "{:?} then {:?}", first, second);
        }
    }

    #[test]
    fn accepts_invite() {
        let mut acceptor = Acceptor::default();
        assert_eq!(acceptor.update(&invite(1)), Some(rsvp(1, 0, "")));
        assert_eq!(acceptor.rnd(), 1);
    }

    #[test]
    fn votes() {
        for value in &["foo", "bar"] {
            let mut acceptor = Acceptor::default();
            assert_eq!(acceptor.update(&nominate(1, value)), Some(vote(1, value)));
        }
    }

    #[test]
    fn votes_without_phase_one() {
        let mut acceptor = Acceptor::default();
        assert_eq!(acceptor.update(&nominate(2, "bar")), Some(vote(2, "bar")));
    }

    #[test]
    fn tracks_voted_round_and_value() {
        let mut acceptor = Acceptor::default();
        acceptor.update(&nominate(1, "v"));
        assert_eq!(acceptor.update(&invite(2)), Some(rsvp(2, 1, "v")));
        assert_eq!(acceptor.vrnd(), 1);
        assert_eq!(acceptor.vval(), b"v");
    }

    #[test]
    fn votes_only_once_per_round() {
        let mut acceptor = Acceptor::default();
        assert_eq!(acceptor.update(&nominate(1, "v")), Some(vote(1, "v")));
        assert_eq!(acceptor.update(&nominate(1, "v")), None);
        assert_eq!(acceptor.update(&nominate(1, "w")), None);
    }

    #[test]
    fn ignores_unrelated_commands() {
        let mut acceptor = Acceptor::default();
        assert_eq!(acceptor.update(&Body::Tick), None);
        assert_eq!(acceptor.update(&vote(1, "v")), None);
        assert_eq!(acceptor.update(&Body::Learn { value: vec![] }), None);
        assert_eq!(acceptor, Acceptor::default());
    }
}
