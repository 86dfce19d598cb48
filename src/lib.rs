#[macro_use] extern crate derivative;
#[macro_use] extern crate log;

mod config;
mod error;
mod manager;
mod proposer;
mod queue;
mod shared;
mod stats;
mod trigger;

pub mod internal;
pub mod message;
pub mod role;
pub mod run;
pub mod store;
pub mod transport;

pub use crate::config::{Config, Node, DEFAULT_ALPHA};
pub use crate::error::{Error, Result};
pub use crate::manager::{Manager, Proposal};
pub use crate::message::{Body, Cmd, Datagram, Message, Packet};
pub use crate::proposer::{Leads, Proposer};
pub use crate::queue::Packets;
pub use crate::run::Run;
pub use crate::shared::Shared;
pub use crate::stats::Stats;
pub use crate::store::{Cluster, Event, MemStore, Op, Store};
pub use crate::trigger::{Trigger, Triggers};
