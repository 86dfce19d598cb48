//! # Summary
//!
//! This module defines the interface the consensus engine needs from the
//! replicated store, and a small in-memory implementation of it.
//!
//! The engine only ever asks three things of a store: tell me when seqn `n`
//! is committed (`wait`), commit this learned value (`apply`), and tell me
//! who the acceptors were as of a given commit (`Event::cluster`).
//!
//! `MemStore` keeps a flat key map rather than a real hierarchical tree, and
//! understands just enough of its own mutation grammar to track membership:
//!
//! ```text
//! set:<path>=<body>
//! del:<path>
//! nop:
//! ```
//!
//! `/ctl/cal/<slot>` holds the id of the acceptor occupying `slot`, and
//! `/ctl/node/<id>/addr` holds that node's `ip:port`.

use std::collections::BTreeMap;
use std::collections::HashMap as Map;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::oneshot;

use crate::error::{Error, Result};

/// Mutation that leaves the store unchanged.
pub const NOP: &[u8] = b"nop:";

const CAL: &str = "/ctl/cal/";
const NODE: &str = "/ctl/node/";

pub fn encode_set(path: &str, body: &str) -> Vec<u8> {
    format!("set:{}={}", path, body).into_bytes()
}

pub fn encode_del(path: &str) -> Vec<u8> {
    format!("del:{}", path).into_bytes()
}

#[derive(Debug, PartialEq, Eq)]
enum Mutation<'a> {
    Set(&'a str, &'a str),
    Del(&'a str),
    Nop,
}

fn decode(mutation: &[u8]) -> Option<Mutation> {
    let mutation = std::str::from_utf8(mutation).ok()?;
    if mutation.as_bytes() == NOP {
        Some(Mutation::Nop)
    } else if let Some(rest) = mutation.strip_prefix("set:") {
        rest.split_once('=').map(|(path, body)| Mutation::Set(path, body))
    } else {
        mutation.strip_prefix("del:").map(Mutation::Del)
    }
}

/// Request to commit `mutation` at `seqn`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Op {
    pub seqn: i64,
    pub mutation: Vec<u8>,
}

/// Acceptor membership as of some commit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Cluster {
    /// Acceptor id per calibration slot
    cals: BTreeMap<String, String>,

    /// Advertised address per node id
    addrs: BTreeMap<String, String>,
}

impl Cluster {
    fn from_keys(keys: &BTreeMap<String, String>) -> Self {
        let mut cluster = Cluster::default();
        for (path, body) in keys {
            if let Some(slot) = path.strip_prefix(CAL) {
                cluster.cals.insert(slot.to_string(), body.clone());
            } else if let Some(id) = path.strip_prefix(NODE).and_then(|rest| rest.strip_suffix("/addr")) {
                cluster.addrs.insert(id.to_string(), body.clone());
            }
        }
        cluster
    }

    /// Sorted, deduplicated ids of every occupied slot.
    pub fn cals(&self) -> Vec<String> {
        let mut cals: Vec<String> = self.cals
            .values()
            .filter(|id| !id.is_empty())
            .cloned()
            .collect();
        cals.sort();
        cals.dedup();
        cals
    }

    /// Addresses parallel to `cals`. Unknown or unparsable addresses are `None`.
    pub fn addrs(&self, cals: &[String]) -> Vec<Option<SocketAddr>> {
        cals.iter()
            .map(|id| {
                let addr = self.addrs.get(id)?;
                match addr.parse() {
                | Ok(addr) => Some(addr),
                | Err(error) => {
                    warn!("bad address {:?} for {}: {}", addr, id, error);
                    None
                }
                }
            })
            .collect()
    }
}

/// A committed mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub seqn: i64,
    pub mutation: Vec<u8>,

    /// Membership after applying `mutation`
    pub cluster: Arc<Cluster>,
}

/// Resolves once the awaited seqn commits. Fails if the store shuts down first.
pub type Waiter = oneshot::Receiver<Event>;

/// Replicated log as seen by the consensus engine.
pub trait Store: Clone + Send + Sync + 'static {
    /// Subscribes to the commit at `seqn`.
    fn wait(&self, seqn: i64) -> Result<Waiter>;

    /// Offers a learned value. The first offer for a seqn wins.
    fn apply(&self, op: Op);

    /// Last committed seqn.
    fn head(&self) -> i64;
}

/// In-memory `Store`. Clones share the same log.
#[derive(Clone, Debug, Default)]
pub struct MemStore(Arc<RwLock<State>>);

#[derive(Debug)]
struct State {
    /// Last committed seqn
    head: i64,

    /// Lowest seqn still retained
    floor: i64,

    closed: bool,
    log: BTreeMap<i64, Event>,
    pending: BTreeMap<i64, Vec<u8>>,
    waiters: Map<i64, Vec<oneshot::Sender<Event>>>,
    keys: BTreeMap<String, String>,
    cluster: Arc<Cluster>,
}

impl Default for State {
    fn default() -> Self {
        let cluster = Arc::new(Cluster::default());
        let mut log = BTreeMap::new();
        log.insert(0, Event {
            seqn: 0,
            mutation: NOP.to_vec(),
            cluster: cluster.clone(),
        });
        State {
            head: 0,
            floor: 0,
            closed: false,
            log,
            pending: BTreeMap::new(),
            waiters: Map::default(),
            keys: BTreeMap::new(),
            cluster,
        }
    }
}

impl State {
    fn commit(&mut self, seqn: i64, mutation: Vec<u8>) {
        match decode(&mutation) {
        | Some(Mutation::Set(path, body)) => {
            self.keys.insert(path.to_string(), body.to_string());
            self.touch(path);
        }
        | Some(Mutation::Del(path)) => {
            self.keys.remove(path);
            self.touch(path);
        }
        | Some(Mutation::Nop) => (),
        | None => debug!("seqn {} carries an opaque mutation", seqn),
        }

        self.head = seqn;
        let event = Event {
            seqn,
            mutation,
            cluster: self.cluster.clone(),
        };
        for tx in self.waiters.remove(&seqn).unwrap_or_default() {
            tx.send(event.clone()).ok();
        }
        self.log.insert(seqn, event);
    }

    fn touch(&mut self, path: &str) {
        if path.starts_with(CAL) || path.starts_with(NODE) {
            self.cluster = Arc::new(Cluster::from_keys(&self.keys));
        }
    }
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<String> {
        self.0.read().keys.get(path).cloned()
    }

    /// Committed event at `seqn`, if still retained.
    pub fn event(&self, seqn: i64) -> Option<Event> {
        self.0.read().log.get(&seqn).cloned()
    }

    /// Membership as of the last commit.
    pub fn cluster(&self) -> Arc<Cluster> {
        self.0.read().cluster.clone()
    }

    /// Forgets every event below `seqn`.
    pub fn clean(&self, seqn: i64) {
        let mut state = self.0.write();
        if seqn <= state.floor {
            return
        }
        state.floor = seqn;
        state.log = state.log.split_off(&seqn);
    }

    /// Fails every outstanding and future subscription.
    pub fn close(&self) {
        let mut state = self.0.write();
        state.closed = true;
        state.waiters.clear();
    }

    /// Commits a static membership locally: one address and one calibration
    /// slot per member, followed by enough no-ops that a manager defined at
    /// the returned seqn owns every seqn after the seeded prefix.
    ///
    /// Every member of a static cluster must seed identically.
    pub fn seed(&self, members: &[(String, SocketAddr)], alpha: i64) -> i64 {
        let mut seqn = self.head();
        for (id, addr) in members {
            seqn += 1;
            self.apply(Op {
                seqn,
                mutation: encode_set(&format!("{}{}/addr", NODE, id), &addr.to_string()),
            });
        }
        for (slot, (id, _)) in members.iter().enumerate() {
            seqn += 1;
            self.apply(Op {
                seqn,
                mutation: encode_set(&format!("{}{}", CAL, slot), id),
            });
        }
        let def_rev = seqn;
        for _ in 1..alpha {
            seqn += 1;
            self.apply(Op { seqn, mutation: NOP.to_vec() });
        }
        def_rev
    }
}

impl Store for MemStore {
    fn wait(&self, seqn: i64) -> Result<Waiter> {
        let mut state = self.0.write();
        if state.closed {
            return Err(Error::Closed)
        }
        if seqn < state.floor {
            return Err(Error::TooLate { seqn, floor: state.floor })
        }
        let (tx, rx) = oneshot::channel();
        match state.log.get(&seqn).cloned() {
        | Some(event) => {
            tx.send(event).ok();
        }
        | None => state.waiters.entry(seqn).or_default().push(tx),
        }
        Ok(rx)
    }

    fn apply(&self, op: Op) {
        let mut state = self.0.write();
        if op.seqn <= state.head || state.pending.contains_key(&op.seqn) {
            trace!("ignoring duplicate op for seqn {}", op.seqn);
            return
        }
        state.pending.insert(op.seqn, op.mutation);
        loop {
            let next = state.head + 1;
            match state.pending.remove(&next) {
            | Some(mutation) => state.commit(next, mutation),
            | None => break,
            }
        }
    }

    fn head(&self) -> i64 {
        self.0.read().head
    }
}
