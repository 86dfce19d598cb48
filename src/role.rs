//! # Summary
//!
//! This module contains the three roles that make up a single Paxos instance.
//!
//! Each role is a pure state machine: it consumes one validated `Body` at a
//! time and returns at most one `Body` to broadcast. None of them perform I/O;
//! the owning `Run` stamps outgoing bodies with its seqn and hands them to the
//! transport.

/// Promise and accept.
pub mod acceptor;

/// Round management and quorum counting.
pub mod coordinator;

/// Vote tally and decision.
pub mod learner;

pub use acceptor::Acceptor;
pub use coordinator::Coordinator;
pub use learner::Learner;
