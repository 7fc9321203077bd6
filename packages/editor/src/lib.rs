//! # Quire Editor
//!
//! Session document engine for collaborative notebooks.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ delta: retain/insert/delete, compose, OT    │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ editor: Data (one immutable snapshot)       │
//! │  - Notebook: sections and cells             │
//! │  - Cell/section side tables                 │
//! │  - Evaluation chains, lanes and queues      │
//! │  - Operation reducer → (Data, [Action])     │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ workspace: single-writer session actor      │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Core Principles
//!
//! 1. **Pure reducer**: `apply` never mutates its receiver and never does I/O
//! 2. **Replicated log**: folding the same operations yields the same state
//! 3. **Actions, not callbacks**: side effects come back as a closed enum
//! 4. **Runtime callbacks are operations**: responses go through `apply` too
//!
//! ## Usage
//!
//! ```rust
//! use quire_editor::{Action, CellId, CellKind, Data, Operation, SectionId};
//!
//! let data = Data::new();
//! let (data, _) = data.apply(Operation::InsertSection { index: 0 }).unwrap();
//! let (data, _) = data
//!     .apply(Operation::InsertCell {
//!         section_id: SectionId(1),
//!         index: 0,
//!         kind: CellKind::Code,
//!     })
//!     .unwrap();
//!
//! let (_, actions) = data
//!     .apply(Operation::QueueCellEvaluation { cell_id: CellId(2) })
//!     .unwrap();
//! assert_eq!(
//!     actions,
//!     vec![Action::StartEvaluation {
//!         cell_id: CellId(2),
//!         section_id: SectionId(1)
//!     }]
//! );
//! ```

mod actions;
mod data;
mod errors;
mod evaluation;
mod ids;
mod notebook;
mod operation;
mod session;

pub use actions::Action;
pub use data::{
    CellInfo, Data, DeletedCell, DeletedSection, EvalInfo, EvaluationStatus, RuntimeHandle,
    SectionInfo, Validity,
};
pub use errors::{OperationError, RejectionKind};
pub use evaluation::{EvaluationMetadata, Lane};
pub use ids::{CellId, ClientId, SectionId};
pub use notebook::{merge_stdout, Cell, CellAttributes, CellKind, Notebook, Output, Section};
pub use operation::Operation;
pub use session::{EditSession, SyncState};

// Re-export delta types used in operations
pub use quire_delta::{Delta, Priority};
