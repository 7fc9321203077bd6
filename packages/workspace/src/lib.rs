//! Runs a notebook session: one task owns the state, applies operations in
//! arrival order, publishes snapshots and events, appends to the operation
//! log and hands evaluation work to a [`Runtime`].

pub mod config;
pub mod errors;
pub mod log;
pub mod runtime;
pub mod session;

pub use config::{SessionConfig, DEFAULT_CONFIG_NAME};
pub use errors::{ConfigError, LogError, SessionError};
pub use log::{read_events, OperationLog};
pub use runtime::{EchoRuntime, RecordingRuntime, Runtime, RuntimeCall};
pub use session::{OperationEvent, Replica, Session, SessionHandle, Snapshot};
