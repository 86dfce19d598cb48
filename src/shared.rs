//! # Summary
//!
//! The manager owns its state outright and never shares it. What it does
//! publish is a `Stats` snapshot after every loop iteration, which readers on
//! other tasks pick up through this handle.
//! We wrap it with Arc<RwLock<T>> so any number of readers can hold a clone.

use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::stats::Stats;

/// Thread-safe handle to the latest published `Stats`.
#[derive(Clone, Debug, Default)]
pub struct Shared(Arc<RwLock<Stats>>);

impl Shared {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires a read lock on the latest snapshot.
    pub fn read(&self) -> RwLockReadGuard<Stats> {
        self.0.read()
    }

    /// Acquires a write lock on the snapshot.
    pub fn write(&self) -> RwLockWriteGuard<Stats> {
        self.0.write()
    }

    /// Copies out the latest snapshot.
    pub fn snapshot(&self) -> Stats {
        self.read().clone()
    }

    /// Replaces the snapshot.
    pub fn publish(&self, stats: &Stats) {
        self.write().clone_from(stats);
    }
}
