//! # Summary
//!
//! Client side of the engine. A proposal is only ever submitted at a seqn
//! this node leads, which the manager hands out as it opens runs. If some
//! other value wins that seqn, the proposer moves on to the next one it
//! leads and tries again.
//!
//! Led seqns wait in `Leads`, which only keeps the newest few. An idle node
//! keeps leading runs that others fill, so anything older than the pipeline
//! window has been decided already and is not worth proposing at.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{Error, Result};
use crate::internal::Tx;
use crate::manager::Proposal;
use crate::store::{encode_del, encode_set, Event, Store};

/// Backlog of seqns led by this node, oldest first, holding at most
/// `capacity` of them. Pushing past capacity forgets the oldest.
#[derive(Clone, Debug)]
pub struct Leads(Arc<Backlog>);

#[derive(Debug)]
struct Backlog {
    capacity: usize,
    seqns: Mutex<VecDeque<i64>>,
    notify: Notify,
    closed: AtomicBool,
}

impl Leads {
    pub fn new(capacity: usize) -> Self {
        Leads(Arc::new(Backlog {
            capacity: capacity.max(1),
            seqns: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }))
    }

    pub fn push(&self, seqn: i64) {
        let mut seqns = self.0.seqns.lock();
        seqns.push_back(seqn);
        while seqns.len() > self.0.capacity {
            if let Some(forgotten) = seqns.pop_front() {
                trace!("forgetting led seqn {}", forgotten);
            }
        }
        drop(seqns);
        self.0.notify.notify_one();
    }

    /// Wakes every waiter. Buffered seqns are still handed out, after
    /// which `next` resolves to `None`.
    pub fn close(&self) {
        self.0.closed.store(true, Ordering::SeqCst);
        self.0.notify.notify_waiters();
        self.0.notify.notify_one();
    }

    /// Takes the oldest buffered seqn, waiting for one if necessary.
    pub async fn next(&self) -> Option<i64> {
        loop {
            if let Some(seqn) = self.0.seqns.lock().pop_front() {
                return Some(seqn)
            }
            if self.0.closed.load(Ordering::SeqCst) {
                self.0.notify.notify_one();
                return None
            }
            self.0.notify.notified().await;
        }
    }

    /// Buffered seqns, oldest first.
    pub fn pending(&self) -> Vec<i64> {
        self.0.seqns.lock().iter().copied().collect()
    }
}

#[derive(Derivative)]
#[derivative(Clone(bound = ""), Debug(bound = ""))]
pub struct Proposer<S: Store> {
    /// Seqns led by this node, in order
    leads: Leads,

    props: Tx<Proposal>,

    #[derivative(Debug = "ignore")]
    store: S,
}

impl<S: Store> Proposer<S> {
    pub fn new(leads: Leads, props: Tx<Proposal>, store: S) -> Self {
        Proposer {
            leads,
            props,
            store,
        }
    }

    /// Resolves with the event that committed `value`.
    pub async fn propose(&self, value: Vec<u8>) -> Result<Event> {
        loop {
            let seqn = self.leads
                .next()
                .await
                .ok_or(Error::Closed)?;

            if seqn <= self.store.head() {
                trace!("seqn {} already committed; skipping", seqn);
                continue
            }

            let waiter = match self.store.wait(seqn) {
            | Ok(waiter) => waiter,
            | Err(Error::TooLate { .. }) => {
                trace!("seqn {} already discarded; skipping", seqn);
                continue
            }
            | Err(error) => return Err(error),
            };
            self.props
                .try_send(Proposal { seqn, value: value.clone() })
                .map_err(|_| Error::Closed)?;

            let event = waiter.await.map_err(|_| Error::Closed)?;
            if event.mutation == value {
                return Ok(event)
            }
            debug!("seqn {} decided another value; retrying", seqn);
        }
    }

    pub async fn set(&self, path: &str, body: &str) -> Result<Event> {
        self.propose(encode_set(path, body)).await
    }

    pub async fn del(&self, path: &str) -> Result<Event> {
        self.propose(encode_del(path)).await
    }
}
