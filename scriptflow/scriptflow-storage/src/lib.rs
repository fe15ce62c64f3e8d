//! Storage and lifecycle layer for Scriptflow.
//!
//! This crate persists the content graph (SurrealDB or in-memory), enforces
//! the scope lifecycle of nodes, deep-copies subgraphs for fork and promote,
//! captures and restores snapshots of the official flow, and manages edit
//! leases.

pub mod batch;
pub mod connection;
pub mod copy;
pub mod engine;
pub mod graph_store;
pub mod locks;
pub mod schema;
pub mod scope;
pub mod snapshot;
pub mod surreal;

// In-memory backend (available in all builds for integration tests)
pub mod memory;

pub use batch::{BatchWarning, CopyStage, DeleteReport, ForkResult, PromoteResult, RestoreReport};
pub use connection::{ConnectionConfig, ConnectionMode};
pub use copy::{CopyTarget, DeepCopyEngine};
pub use engine::ContentGraphEngine;
pub use graph_store::{GraphStore, ResolvedEdges};
pub use locks::{EditLock, EditLockManager, LockAcquisition, LockStatistics};
pub use memory::{FaultPoint, InMemoryGraphBackend};
pub use snapshot::SnapshotManager;
pub use surreal::SurrealGraphBackend;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::batch::{BatchWarning, ForkResult, PromoteResult, RestoreReport};
    pub use crate::connection::{ConnectionConfig, ConnectionMode};
    pub use crate::engine::ContentGraphEngine;
    pub use crate::locks::{EditLock, LockAcquisition};
    pub use crate::memory::InMemoryGraphBackend;
    pub use crate::surreal::SurrealGraphBackend;
    pub use scriptflow_core::prelude::*;
}
