//! # Summary
//!
//! This module defines `Run`, a single Paxos instance deciding one seqn.
//!
//! A run bundles a coordinator, an acceptor, and a learner around a fixed
//! membership snapshot. Every packet for the run's seqn is fed to all three
//! roles in that order; whatever they emit is stamped with the seqn and
//! broadcast to every acceptor, including this node. When the learner
//! decides, the value is pushed to the store's apply sink. That is the only
//! way a value ever becomes committed.

use std::convert::TryFrom;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bimap::BiHashMap;
use rand::Rng;

use crate::internal::Tx;
use crate::message::{Body, Datagram, Packet};
use crate::role::{Acceptor, Coordinator, Learner};
use crate::store::Op;
use crate::trigger::Triggers;

/// Initial window for randomized round retries.
pub const INITIAL_BOUND: Duration = Duration::from_millis(1);

/// Number of acceptors that must agree out of `n`.
pub fn quorum(n: usize) -> usize {
    n / 2 + 1
}

/// One Paxos instance.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Run {
    seqn: i64,

    /// Id of this node
    id: String,

    /// Sorted acceptor ids for this seqn
    cals: Vec<String>,

    /// Acceptor addresses, parallel to `cals`
    addr: Vec<Option<SocketAddr>>,

    /// Acceptor index by address, for attributing inbound packets
    index: BiHashMap<usize, SocketAddr>,

    coordinator: Coordinator,
    acceptor: Acceptor,
    learner: Learner,

    /// Outbound transport sink
    #[derivative(Debug = "ignore")]
    out: Tx<Datagram>,

    /// Store apply sink
    #[derivative(Debug = "ignore")]
    ops: Tx<Op>,

    /// Current retry window
    bound: Duration,

    /// Retries scheduled so far
    ntick: u64,

    /// Whether a retry is pending in the tick queue
    sched: bool,

    /// Whether a local proposal reached this run
    prop: bool,
}

impl Run {
    pub fn new(
        seqn: i64,
        id: &str,
        cals: Vec<String>,
        addr: Vec<Option<SocketAddr>>,
        out: Tx<Datagram>,
        ops: Tx<Op>,
        bound: Duration,
    ) -> Self {
        let index = addr.iter()
            .enumerate()
            .filter_map(|(i, addr)| addr.map(|addr| (i, addr)))
            .collect();
        let self_index = cals.iter().position(|cal| cal == id);
        let quorum = quorum(cals.len());
        Run {
            seqn,
            id: id.to_string(),
            coordinator: Coordinator::new(self_index, cals.len(), quorum),
            acceptor: Acceptor::default(),
            learner: Learner::new(quorum),
            cals,
            addr,
            index,
            out,
            ops,
            bound,
            ntick: 0,
            sched: false,
            prop: false,
        }
    }

    pub fn seqn(&self) -> i64 {
        self.seqn
    }

    pub fn cals(&self) -> &[String] {
        &self.cals
    }

    pub fn addrs(&self) -> &[Option<SocketAddr>] {
        &self.addr
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn acceptor(&self) -> &Acceptor {
        &self.acceptor
    }

    pub fn learner(&self) -> &Learner {
        &self.learner
    }

    pub fn bound(&self) -> Duration {
        self.bound
    }

    pub fn done(&self) -> bool {
        self.learner.done()
    }

    pub fn quorum(&self) -> usize {
        quorum(self.cals.len())
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.cals.iter().position(|cal| cal == id)
    }

    pub fn index_of_addr(&self, addr: Option<SocketAddr>) -> Option<usize> {
        addr.and_then(|addr| self.index.get_by_right(&addr).copied())
    }

    /// Whether `id` is expected to propose at this seqn.
    pub fn is_leader(&self, id: &str) -> bool {
        match self.index_of(id) {
        | Some(index) => self.seqn.rem_euclid(self.cals.len() as i64) == index as i64,
        | None => false,
        }
    }

    /// Single-character summary for pipeline diagnostics.
    pub fn status(&self) -> char {
        if self.learner.done() {
            'X'
        } else if self.prop {
            'o'
        } else {
            '.'
        }
    }

    /// Feeds `packet`, sent by the acceptor at index `from`, through every role.
    pub fn update(&mut self, packet: &Packet, from: Option<usize>, ticks: &mut Triggers, now: Instant) {
        match &packet.body {
        | Body::Tick => {
            debug!("tick seqn={} wasteful={}", self.seqn, self.learner.done());
            self.sched = false;
        }
        | Body::Propose { .. } => self.prop = true,
        | _ => (),
        }

        let started = {
            let output = self.coordinator.update(&packet.body, from);
            self.broadcast(output.message);
            output.started
        };

        let vote = self.acceptor.update(&packet.body);
        self.broadcast(vote);

        let done = self.learner.done();
        let learn = self.learner.update(&packet.body, from);
        self.broadcast(learn);

        let contended = self.coordinator.seen() > self.coordinator.crnd();
        if (started || contended) && !self.sched && !self.learner.done() {
            self.schedule(ticks, now);
        }

        if !done {
            if let Some(value) = self.learner.value() {
                debug!("learn seqn={}", self.seqn);
                self.ops.send(Op {
                    seqn: self.seqn,
                    mutation: value.to_vec(),
                });
            }
        }
    }

    /// Schedules a randomized retry within the current bound, then doubles the bound.
    fn schedule(&mut self, ticks: &mut Triggers, now: Instant) {
        let bound = u64::try_from(self.bound.as_nanos()).unwrap_or(u64::MAX).max(1);
        let delay = Duration::from_nanos(rand::thread_rng().gen_range(0..bound));
        self.sched = true;
        self.ntick += 1;
        self.bound = self.bound.saturating_mul(2);
        debug!("sched tick={} seqn={} delay={:?}", self.ntick, self.seqn, delay);
        ticks.schedule(self.seqn, now, delay);
    }

    fn broadcast(&self, body: Option<Body>) {
        let body = match body {
        | Some(body) => body,
        | None => return,
        };
        let message = body.into_message(self.seqn);
        let data = match message.encode() {
        | Ok(data) => data,
        | Err(error) => {
            warn!("dropping {}: {}", message, error);
            return
        }
        };
        trace!("broadcasting {}", message);
        for addr in self.addr.iter().flatten() {
            self.out.send(Datagram {
                addr: *addr,
                data: data.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal;
    use crate::message::{Cmd, Message};

    fn addrs(n: usize) -> Vec<Option<SocketAddr>> {
        (0..n)
            .map(|i| Some(format!("10.0.0.{}:{}", i + 1, 9000 + i).parse().unwrap()))
            .collect()
    }

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| ((b'a' + i as u8) as char).to_string()).collect()
    }

    struct Fixture {
        run: Run,
        out: internal::Rx<Datagram>,
        ops: internal::Rx<Op>,
        ticks: Triggers,
    }

    fn fixture(seqn: i64, id: &str, n: usize) -> Fixture {
        let (out_rx, out_tx) = internal::new();
        let (ops_rx, ops_tx) = internal::new();
        Fixture {
            run: Run::new(seqn, id, ids(n), addrs(n), out_tx, ops_tx, Duration::from_millis(10)),
            out: out_rx,
            ops: ops_rx,
            ticks: Triggers::new(),
        }
    }

    impl Fixture {
        fn deliver(&mut self, body: Body, from: Option<usize>) {
            let packet = Packet::local(self.run.seqn(), body);
            self.run.update(&packet, from, &mut self.ticks, Instant::now());
        }

        fn sent(&mut self) -> Vec<(SocketAddr, Message)> {
            self.out
                .drain()
                .into_iter()
                .map(|datagram| (datagram.addr, Message::decode(&datagram.data).unwrap()))
                .collect()
        }
    }

    fn vote(vrnd: i64, value: &str) -> Body {
        Body::Vote { vrnd, value: value.as_bytes().to_vec() }
    }

    #[test]
    fn quorum_table() {
        let table: Vec<usize> = (1..=8).map(quorum).collect();
        assert_eq!(table, vec![1, 2, 2, 3, 3, 4, 4, 5]);
        assert_eq!(fixture(1, "a", 5).run.quorum(), 3);
    }

    #[test]
    fn leader_rotates_by_seqn() {
        let run = fixture(3, "a", 3).run;
        assert!(run.is_leader("a"));
        assert!(!run.is_leader("b"));
        assert!(!run.is_leader("c"));
        assert!(!run.is_leader("x"));
        assert!(fixture(4, "a", 3).run.is_leader("b"));
    }

    #[test]
    fn index_of_addr() {
        let run = fixture(1, "a", 3).run;
        assert_eq!(run.index_of_addr(addrs(3)[2]), Some(2));
        assert_eq!(run.index_of_addr(None), None);
        assert_eq!(run.index_of_addr(Some("9.9.9.9:9".parse().unwrap())), None);
    }

    #[test]
    fn vote_delivered() {
        let mut f = fixture(1, "a", 1);
        f.deliver(vote(1, "foo"), Some(0));
        assert!(f.run.done());
        assert_eq!(f.run.learner().value(), Some(&b"foo"[..]));
    }

    #[test]
    fn invite_delivered() {
        let mut f = fixture(1, "a", 2);
        f.deliver(Body::Invite { crnd: 1 }, Some(0));
        assert_eq!(f.run.acceptor().rnd(), 1);
    }

    #[test]
    fn propose_broadcasts_invite() {
        let mut f = fixture(0, "b", 2);
        f.deliver(Body::Propose { value: b"foo".to_vec() }, None);
        assert!(f.run.coordinator().begun());
        let sent = f.sent();
        let expected = Body::Invite { crnd: 3 }.into_message(0);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], (addrs(2)[0].unwrap(), expected.clone()));
        assert_eq!(sent[1], (addrs(2)[1].unwrap(), expected));
    }

    #[test]
    fn invite_broadcasts_rsvp() {
        let mut f = fixture(0, "a", 2);
        f.deliver(Body::Invite { crnd: 1 }, Some(0));
        let sent = f.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].1, Body::Rsvp { crnd: 1, vrnd: 0, value: vec![] }.into_message(0));
    }

    #[test]
    fn quorum_of_votes_broadcasts_learn_and_applies() {
        let mut f = fixture(1, "a", 3);
        f.deliver(vote(1, "foo"), Some(0));
        assert!(f.sent().is_empty());
        f.deliver(vote(1, "foo"), Some(1));
        let sent = f.sent();
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|(_, m)| m.cmd == Cmd::Learn && m.value.as_deref() == Some(&b"foo"[..])));
        assert_eq!(f.ops.drain(), vec![Op { seqn: 1, mutation: b"foo".to_vec() }]);
    }

    #[test]
    fn learn_applies_once() {
        let mut f = fixture(1, "a", 3);
        f.deliver(Body::Learn { value: b"foo".to_vec() }, None);
        f.deliver(Body::Learn { value: b"foo".to_vec() }, None);
        f.deliver(vote(1, "bar"), Some(0));
        assert_eq!(f.ops.drain(), vec![Op { seqn: 1, mutation: b"foo".to_vec() }]);
        assert!(f.sent().is_empty());
    }

    #[test]
    fn renominate_does_not_revote() {
        let mut f = fixture(1, "a", 3);
        let nominate = Body::Nominate { crnd: 4, value: b"foo".to_vec() };
        f.deliver(nominate.clone(), Some(1));
        assert_eq!(f.sent().len(), 3);
        f.deliver(nominate, Some(1));
        assert!(f.sent().is_empty());
    }

    #[test]
    fn propose_schedules_tick() {
        let mut f = fixture(1, "a", 1);
        f.deliver(Body::Propose { value: b"foo".to_vec() }, None);
        assert_eq!(f.ticks.len(), 1);
        assert_eq!(f.ticks.peek().unwrap().seqn, 1);
    }

    #[test]
    fn consecutive_ticks_double_bound() {
        let mut f = fixture(1, "a", 3);
        f.deliver(Body::Propose { value: b"foo".to_vec() }, None);
        assert_eq!(f.run.bound(), Duration::from_millis(20));
        f.deliver(Body::Tick, None);
        assert_eq!(f.run.bound(), Duration::from_millis(40));
        f.deliver(Body::Tick, None);
        assert_eq!(f.run.bound(), Duration::from_millis(80));
        assert_eq!(f.ticks.len(), 3);
    }

    #[test]
    fn bound_past_u64_nanos_keeps_long_delay() {
        let (_out_rx, out_tx) = internal::new();
        let (_ops_rx, ops_tx) = internal::new();
        // Exactly 2^64 ns, which wraps to zero as a u64.
        let bound = Duration::new(18_446_744_073, 709_551_616);
        let mut run = Run::new(1, "a", ids(3), addrs(3), out_tx, ops_tx, bound);
        let mut ticks = Triggers::new();
        let now = Instant::now();
        let propose = Packet::local(1, Body::Propose { value: b"foo".to_vec() });
        run.update(&propose, None, &mut ticks, now);
        assert_eq!(run.bound(), bound * 2);
        assert!(ticks.peek().unwrap().at > now + Duration::from_secs(1));
    }

    #[test]
    fn pending_retry_is_not_rescheduled() {
        let mut f = fixture(1, "a", 3);
        f.deliver(Body::Propose { value: b"foo".to_vec() }, None);
        f.deliver(Body::Rsvp { crnd: 99, vrnd: 0, value: vec![] }, Some(1));
        assert!(f.run.coordinator().seen() > f.run.coordinator().crnd());
        assert_eq!(f.ticks.len(), 1);
    }

    #[test]
    fn decided_run_stops_retrying() {
        let mut f = fixture(1, "a", 1);
        f.deliver(Body::Learn { value: b"foo".to_vec() }, None);
        f.deliver(Body::Propose { value: b"bar".to_vec() }, None);
        assert!(f.ticks.is_empty());
    }

    #[test]
    fn single_node_decides_its_proposal() {
        let mut f = fixture(7, "a", 1);
        f.deliver(Body::Propose { value: b"foo".to_vec() }, None);
        // Loop the node's own traffic back to it until it goes quiet.
        loop {
            let sent = f.out.drain();
            if sent.is_empty() {
                break
            }
            for datagram in sent {
                let packet = Packet::parse(&datagram).unwrap();
                let from = f.run.index_of_addr(packet.addr);
                f.run.update(&packet, from, &mut f.ticks, Instant::now());
            }
        }
        assert_eq!(f.run.learner().value(), Some(&b"foo"[..]));
        assert_eq!(f.ops.drain(), vec![Op { seqn: 7, mutation: b"foo".to_vec() }]);
    }
}
