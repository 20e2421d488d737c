//! bricksync reconciliation agent.
//!
//! Periodically turns a flat snapshot of storage-cluster facts into typed
//! entity records, diffs status-bearing fields against the previously
//! published state, emits one alert per real transition, and republishes
//! every record into the shared store under a lease so that out-of-band
//! deletions surface as lease expiry.

pub mod aggregates;
pub mod alerts;
pub mod config;
pub mod context;
pub mod entities;
pub mod error;
pub mod events;
pub mod facts;
pub mod probe;
pub mod profiling;
pub mod publish;
pub mod sync;
pub mod transitions;

pub use config::AgentConfig;
pub use context::{AgentContext, NodeIdentity};
pub use error::{SyncError, SyncResult};
pub use sync::ReconciliationLoop;
