//! # Summary
//!
//! This module defines the `Manager`, the single event loop that owns every
//! live `Run` for a node.
//!
//! The manager keeps exactly `alpha` instances in flight. Each commit at seqn
//! `n` retires the run for `n` and creates the run for `n + alpha`, using the
//! membership as of `n`. Inbound packets, local proposals, and due retries
//! all go through one seqn-ordered queue, and `pump` only releases packets
//! whose seqn is below `next`, the first seqn without a run.
//!
//! Packets for a seqn that has already been decided are answered with the
//! committed value once the store has it, so lagging peers catch up without
//! running another round.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use hashbrown::HashMap as Map;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::internal::{Rx, Tx};
use crate::message::{Body, Cmd, Datagram, Packet};
use crate::proposer::Leads;
use crate::queue::Packets;
use crate::run::Run;
use crate::shared::Shared;
use crate::stats::Stats;
use crate::store::{Event, Op, Store, NOP};
use crate::trigger::Triggers;

/// Local request to propose `value` at a seqn this node leads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Proposal {
    pub seqn: i64,
    pub value: Vec<u8>,
}

#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct Manager<S: Store> {
    /// Id of this node
    id: String,

    alpha: i64,
    fill_delay: Duration,
    initial_bound: Duration,

    #[derivative(Debug = "ignore")]
    store: S,

    /// Outbound transport sink, shared with every run
    #[derivative(Debug = "ignore")]
    out: Tx<Datagram>,

    /// Store apply sink, shared with every run
    #[derivative(Debug = "ignore")]
    ops: Tx<Op>,

    /// Seqns this node leads, consumed by the proposer
    #[derivative(Debug = "ignore")]
    leads: Leads,

    runs: Map<i64, Run>,

    /// Membership of the most recently opened run
    last: Option<(Vec<String>, Vec<Option<SocketAddr>>)>,

    /// Lowest seqn without a run
    next: i64,

    packets: Packets,
    fills: Triggers,
    ticks: Triggers,
    stats: Stats,

    #[derivative(Debug = "ignore")]
    shared: Shared,
}

impl<S: Store> Manager<S> {
    pub fn new(config: &Config, store: S, out: Tx<Datagram>, ops: Tx<Op>, leads: Leads) -> Self {
        Manager {
            id: config.id().to_string(),
            alpha: config.alpha(),
            fill_delay: config.fill_delay(),
            initial_bound: config.initial_bound(),
            store,
            out,
            ops,
            leads,
            runs: Map::default(),
            last: None,
            next: 0,
            packets: Packets::new(),
            fills: Triggers::new(),
            ticks: Triggers::new(),
            stats: Stats::default(),
            shared: Shared::new(),
        }
    }

    /// Publishes stats through `shared` instead of a private handle.
    pub fn with_shared(mut self, shared: Shared) -> Self {
        self.shared = shared;
        self
    }

    pub fn next(&self) -> i64 {
        self.next
    }

    pub fn get_run(&self, seqn: i64) -> Option<&Run> {
        self.runs.get(&seqn)
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn fills(&self) -> &Triggers {
        &self.fills
    }

    pub fn ticks(&self) -> &Triggers {
        &self.ticks
    }

    /// Retires the run decided by `event` and opens the run `alpha` seqns later.
    pub fn event(&mut self, event: &Event) {
        if self.runs.remove(&event.seqn).is_some() {
            debug!("del run {}", event.seqn);
        }
        self.add_run(event);
        self.stats.total_runs += 1;
    }

    fn add_run(&mut self, event: &Event) {
        let seqn = event.seqn + self.alpha;
        let mut cals = event.cluster.cals();
        let mut addr = event.cluster.addrs(&cals);

        if cals.is_empty() {
            match &self.last {
            | Some((previous_cals, previous_addr)) => {
                cals = previous_cals.clone();
                addr = previous_addr.clone();
            }
            | None => warn!("no acceptors known for seqn {}", seqn),
            }
        }
        self.last = Some((cals.clone(), addr.clone()));

        let run = Run::new(
            seqn,
            &self.id,
            cals,
            addr,
            self.out.clone(),
            self.ops.clone(),
            self.initial_bound,
        );

        if run.is_leader(&self.id) {
            debug!("pseqn {}", seqn);
            self.leads.push(seqn);
        }

        debug!("add run {}", seqn);
        self.runs.insert(seqn, run);
        self.next = seqn + 1;
    }

    /// Queues an inbound datagram. Invalid ones are dropped.
    pub fn receive(&mut self, datagram: &Datagram) {
        if let Some(packet) = Packet::parse(datagram) {
            trace!("recv {:?} seqn={} from {}", packet.cmd(), packet.seqn, datagram.addr);
            self.stats.total_recv[packet.cmd().index()] += 1;
            self.packets.push(packet);
        }
    }

    /// Queues a local proposal, and schedules no-op fills for the
    /// contiguous stretch of earlier seqns led by other nodes.
    pub fn propose(&mut self, proposal: Proposal, now: Instant) {
        info!("propose seqn={}", proposal.seqn);
        let mut seqn = proposal.seqn - 1;
        self.packets.push(Packet::local(proposal.seqn, Body::Propose { value: proposal.value }));
        while let Some(run) = self.runs.get(&seqn) {
            if run.is_leader(&self.id) {
                break
            }
            if !run.done() {
                self.fills.schedule(seqn, now, self.fill_delay);
            }
            seqn -= 1;
        }
    }

    /// Turns every due fill into a no-op proposal and every due retry into a tick.
    pub fn tick(&mut self, now: Instant) {
        let fills = self.fills.pop_due(now);
        for seqn in &fills {
            debug!("applying fill seqn={}", seqn);
            self.packets.push(Packet::local(*seqn, Body::Propose { value: NOP.to_vec() }));
        }
        if !fills.is_empty() {
            debug!("applied {} fills", fills.len());
        }
        self.stats.total_fills += fills.len() as u64;

        let ticks = self.ticks.pop_due(now);
        for seqn in &ticks {
            trace!("applying tick seqn={}", seqn);
            self.packets.push(Packet::local(*seqn, Body::Tick));
        }
        if !ticks.is_empty() {
            debug!("applied {} ticks", ticks.len());
        }
        self.stats.total_ticks += ticks.len() as u64;
    }

    /// Dispatches every queued packet whose seqn has a run.
    pub fn pump(&mut self, now: Instant) {
        while let Some(packet) = self.packets.pop_below(self.next) {
            match self.runs.get_mut(&packet.seqn) {
            | Some(run) if !run.done() => {
                let from = run.index_of_addr(packet.addr);
                run.update(&packet, from, &mut self.ticks, now);
            }
            | _ => send_learn(&self.store, &self.out, &packet),
            }
        }
    }

    /// One character per run in seqn order: `X` decided, `o` proposed locally, `.` idle.
    pub fn pipeline(&self) -> String {
        let mut seqns: Vec<i64> = self.runs.keys().copied().collect();
        seqns.sort_unstable();
        seqns.iter()
            .filter_map(|seqn| self.runs.get(seqn))
            .map(Run::status)
            .collect()
    }

    fn publish(&mut self) {
        self.stats.runs = self.runs.len();
        self.stats.wait_packets = self.packets.len();
        self.stats.wait_ticks = self.ticks.len();
        self.shared.publish(&self.stats);
    }

    /// Event loop. Runs until the store shuts down, then releases any
    /// proposer still waiting for a seqn.
    ///
    /// Fails only if the store has already discarded the seqn the manager
    /// needs next, since runs past that point can never be opened.
    pub async fn serve(
        mut self,
        def_rev: i64,
        inbound: Rx<Datagram>,
        props: Rx<Proposal>,
        tick_interval: Duration,
    ) -> Result<()> {
        let result = self.select(def_rev, inbound, props, tick_interval).await;
        self.publish();
        self.leads.close();
        result
    }

    async fn select(
        &mut self,
        def_rev: i64,
        mut inbound: Rx<Datagram>,
        mut props: Rx<Proposal>,
        tick_interval: Duration,
    ) -> Result<()> {
        let mut waiter = match self.store.wait(def_rev) {
        | Err(Error::Closed) => return Ok(()),
        | waiter => waiter?,
        };
        let mut ticker = tokio::time::interval(tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            self.publish();

            tokio::select! {
                committed = &mut waiter => {
                    let event = match committed {
                    | Ok(event) => event,
                    | Err(_) => break,
                    };
                    waiter = match self.store.wait(event.seqn + 1) {
                    | Err(Error::Closed) => break,
                    | waiter => waiter?,
                    };
                    debug!("event seqn={}", event.seqn);
                    self.event(&event);
                    debug!("runs: {}", self.pipeline());
                    let now = Instant::now();
                    debug!("avg tick delay: {:?}", self.ticks.average_delay(now));
                    debug!("avg fill delay: {:?}", self.fills.average_delay(now));
                }
                Some(datagram) = inbound.recv() => self.receive(&datagram),
                Some(proposal) = props.recv() => self.propose(proposal, Instant::now()),
                _ = ticker.tick() => self.tick(Instant::now()),
            }

            self.pump(Instant::now());
        }

        info!("store closed; {} stopping", self.id);
        Ok(())
    }
}

/// Answers an invitation for an already decided seqn with the committed value.
fn send_learn<S: Store>(store: &S, out: &Tx<Datagram>, packet: &Packet) {
    let addr = match (packet.cmd(), packet.addr) {
    | (Cmd::Invite, Some(addr)) => addr,
    | _ => return,
    };

    let waiter = match store.wait(packet.seqn) {
    | Ok(waiter) => waiter,
    | Err(error) => {
        warn!("cannot answer invite for seqn {} from {}: {}", packet.seqn, addr, error);
        return
    }
    };

    let out = out.clone();
    tokio::spawn(async move {
        let event = match waiter.await {
        | Ok(event) => event,
        | Err(_) => return,
        };
        let message = Body::Learn { value: event.mutation }.into_message(event.seqn);
        match Datagram::new(addr, &message) {
        | Ok(datagram) => out.send(datagram),
        | Err(error) => warn!("dropping {}: {}", message, error),
        }
    });
}
