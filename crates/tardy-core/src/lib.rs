//! tardy-core library.
//!
//! Tracks which delinquency categories each position of a portfolio has
//! reached, and announces every transition exactly once even though the
//! source only ever shows the current snapshot.
//!
//! # Conventions
//!
//! - **Errors**: typed `thiserror` enums in the library, each mapped to an
//!   [`error::ErrorCode`]; `anyhow::Result` only at config/CLI edges.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod category;
pub mod config;
pub mod error;
pub mod event;
pub mod lock;
pub mod position;
pub mod reconcile;
pub mod registry;
pub mod sink;
pub mod source;
pub mod storage;
pub mod store;
pub mod transaction;

pub use category::Category;
pub use error::{ErrorCode, ReconcileError, SourceError, StoreError};
pub use event::{Event, EventKind, EventScope};
pub use position::{Position, PositionId, SaleInfo};
pub use reconcile::{Reconciler, RunOutcome, RunReport};
pub use registry::{Complement, Registry};
pub use sink::{EventSink, RecordingSink};
pub use source::{MemorySource, PositionSource};
pub use store::{MemoryStateStore, SqliteStateStore, StateStore, StateWrite};
pub use transaction::Transaction;
