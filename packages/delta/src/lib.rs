//! # Quire Delta
//!
//! Text deltas for collaborative cell editing.
//!
//! A [`Delta`] is an ordered list of `retain`, `insert` and `delete`
//! operations. Two deltas authored concurrently against the same revision are
//! merged with [`Delta::transform`]; a run of sequential deltas collapses into
//! one with [`Delta::compose`].
//!
//! ## Usage
//!
//! ```rust
//! use quire_delta::{Delta, Priority};
//!
//! let server = Delta::new().insert("cats");
//! let client = Delta::new().insert("tea");
//!
//! // The client's edit, rebased over the one the server applied first
//! let rebased = server.transform(&client, Priority::Left);
//! assert_eq!(rebased, Delta::new().retain(4).insert("tea"));
//!
//! let text = rebased.apply(&server.apply("").unwrap()).unwrap();
//! assert_eq!(text, "catstea");
//! ```

mod delta;
mod iter;
mod op;

pub use delta::{Delta, DeltaError, Priority};
pub use op::{Op, OpKind};
