//! Core types and abstractions for the Scriptflow content graph engine.
//!
//! This crate provides the node model, identifiers, configuration, error
//! handling and the persistence trait shared by all Scriptflow components.

pub mod caller;
pub mod config;
pub mod error;
pub mod id;
pub mod traits;
pub mod types;

pub use caller::{Caller, Role};
pub use config::ScriptflowConfig;
pub use error::{ErrorKind, RestoreStage, Result, ScriptflowError};
pub use id::{NodeId, ProductId, SnapshotId, UserId};
pub use traits::GraphBackend;
pub use types::*;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::caller::{Caller, Role};
    pub use crate::config::ScriptflowConfig;
    pub use crate::error::{ErrorKind, Result, ScriptflowError};
    pub use crate::id::{NodeId, ProductId, SnapshotId, UserId};
    pub use crate::traits::GraphBackend;
    pub use crate::types::*;
}
