use std::convert::TryFrom;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::Result;
use crate::internal;
use crate::manager::Manager;
use crate::proposer::{Leads, Proposer};
use crate::shared::Shared;
use crate::store::Store;
use crate::transport;

/// Default number of instances allowed in flight.
pub const DEFAULT_ALPHA: i64 = 50;

#[derive(Clone, Debug)]
pub struct Config {
    /// Unique node ID, as it appears under `/ctl/cal`
    id: String,

    /// Address for acceptor traffic
    addr: SocketAddr,

    /// Pipeline depth
    alpha: i64,

    /// Seqn at which this node's membership was defined.
    /// The node participates from `def_rev + alpha` on.
    def_rev: i64,

    /// Wait before proposing a no-op in another leader's stalled seqn
    fill_delay: Duration,

    /// How often pending retries are polled
    tick_interval: Duration,

    /// First retry window for a new run
    initial_bound: Duration,
}

impl Config {
    pub fn new(id: &str, addr: SocketAddr) -> Self {
        Config {
            id: id.to_string(),
            addr,
            alpha: DEFAULT_ALPHA,
            def_rev: 0,
            fill_delay: Duration::from_secs(5),
            tick_interval: Duration::from_millis(10),
            initial_bound: crate::run::INITIAL_BOUND,
        }
    }

    pub fn with_alpha(mut self, alpha: i64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_def_rev(mut self, def_rev: i64) -> Self {
        self.def_rev = def_rev;
        self
    }

    pub fn with_fill_delay(mut self, fill_delay: Duration) -> Self {
        self.fill_delay = fill_delay;
        self
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn with_initial_bound(mut self, initial_bound: Duration) -> Self {
        self.initial_bound = initial_bound;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn alpha(&self) -> i64 {
        self.alpha
    }

    pub fn def_rev(&self) -> i64 {
        self.def_rev
    }

    pub fn fill_delay(&self) -> Duration {
        self.fill_delay
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    pub fn initial_bound(&self) -> Duration {
        self.initial_bound
    }

    /// Number of led seqns worth holding for the proposer. No more than
    /// `alpha` runs are open at once.
    pub fn window(&self) -> usize {
        usize::try_from(self.alpha).unwrap_or(0).max(1)
    }

    /// Binds the acceptor socket and spawns the transport, the apply drain,
    /// and the manager onto the current runtime.
    pub async fn run<S: Store>(self, store: S) -> Result<Node<S>> {
        let socket = tokio::net::UdpSocket::bind(self.addr).await?;
        let local_addr = socket.local_addr()?;
        info!("{} listening on {}", self.id, local_addr);

        let (inbound_rx, inbound_tx) = internal::new();
        let (outbound_rx, outbound_tx) = internal::new();
        let (ops_rx, ops_tx) = internal::new();
        let (props_rx, props_tx) = internal::new();

        transport::spawn(socket, inbound_tx, outbound_rx);

        let drain = store.clone();
        tokio::spawn(async move {
            let mut ops_rx = ops_rx;
            while let Some(op) = ops_rx.recv().await {
                drain.apply(op);
            }
        });

        let leads = Leads::new(self.window());
        let shared = Shared::new();
        let manager = Manager::new(&self, store.clone(), outbound_tx, ops_tx, leads.clone())
            .with_shared(shared.clone());
        let def_rev = self.def_rev;
        let tick_interval = self.tick_interval;
        let id = self.id.clone();
        tokio::spawn(async move {
            match manager.serve(def_rev, inbound_rx, props_rx, tick_interval).await {
            | Ok(()) => info!("{} manager stopped", id),
            | Err(error) => error!("{} manager failed: {}", id, error),
            }
        });

        Ok(Node {
            proposer: Proposer::new(leads, props_tx, store),
            stats: shared,
            local_addr,
        })
    }
}

/// Handle to a running member.
#[derive(Derivative)]
#[derivative(Clone(bound = ""), Debug(bound = ""))]
pub struct Node<S: Store> {
    proposer: Proposer<S>,
    stats: Shared,
    local_addr: SocketAddr,
}

impl<S: Store> Node<S> {
    pub fn proposer(&self) -> &Proposer<S> {
        &self.proposer
    }

    pub fn stats(&self) -> &Shared {
        &self.stats
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}
