//! # Actions
//!
//! Side effects requested by the reducer. The reducer never performs I/O;
//! whoever drives it pattern-matches these and executes them in order.

use crate::ids::{CellId, ClientId, SectionId};
use quire_delta::Delta;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Evaluate the cell's current source in its section's context
    StartEvaluation {
        cell_id: CellId,
        section_id: SectionId,
    },

    /// Interrupt whatever the section is evaluating
    StopEvaluation { section_id: SectionId },

    /// Release any evaluation context kept for the cell
    ForgetEvaluation {
        cell_id: CellId,
        section_id: SectionId,
    },

    /// Deliver a rebased delta to every client. The author treats it as an
    /// acknowledgement.
    BroadcastDelta {
        client_id: ClientId,
        cell_id: CellId,
        delta: Delta,
    },
}
