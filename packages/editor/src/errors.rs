//! Rejection reasons for operations

use crate::ids::{CellId, ClientId, SectionId};
use quire_delta::DeltaError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad class of a rejection, reported back to whoever issued the operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    /// The operation is not valid against the current state
    Validation,
    /// The operation references a revision the client must resynchronize past
    Conflict,
}

/// A rejected operation. State is never modified when one is returned.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OperationError {
    #[error("Section not found: {0}")]
    SectionNotFound(SectionId),

    #[error("Cell not found: {0}")]
    CellNotFound(CellId),

    #[error("Client not joined: {0}")]
    ClientNotFound(ClientId),

    #[error("Client already joined: {0}")]
    ClientAlreadyJoined(ClientId),

    #[error("The setup section cannot be modified this way")]
    SetupSectionProtected,

    #[error("The setup cell cannot be modified this way")]
    SetupCellProtected,

    #[error("Cell is not evaluable: {0}")]
    NotEvaluable(CellId),

    #[error("Cell is not a smart cell: {0}")]
    NotSmartCell(CellId),

    #[error("Cell is already evaluating or queued: {0}")]
    AlreadyEvaluating(CellId),

    #[error("Cell is not evaluating: {0}")]
    NotEvaluating(CellId),

    #[error("Cell has no evaluation to cancel: {0}")]
    NothingToCancel(CellId),

    #[error("Cell is queued or evaluating: {0}")]
    CellBusy(CellId),

    #[error("Section has queued or evaluating cells: {0}")]
    SectionBusy(SectionId),

    #[error("Invalid parent {parent_id} for {section_id}")]
    InvalidSectionParent {
        section_id: SectionId,
        parent_id: SectionId,
    },

    #[error("Moving {0} would place a branch before its parent")]
    InvalidSectionOrder(SectionId),

    #[error("Section has branching sections: {0}")]
    SectionHasBranches(SectionId),

    #[error("No section available to hold the cells")]
    NoTargetSection,

    #[error("Cell is not deleted: {0}")]
    CellNotDeleted(CellId),

    #[error("Section is not deleted: {0}")]
    SectionNotDeleted(SectionId),

    #[error("Delta does not fit the source of {cell_id}: {source}")]
    InvalidDelta {
        cell_id: CellId,
        #[source]
        source: DeltaError,
    },

    #[error("Revision {revision} of {cell_id} is ahead of the current revision {current}")]
    RevisionAhead {
        cell_id: CellId,
        revision: u64,
        current: u64,
    },

    #[error("Revision {revision} of {cell_id} is older than the retained history (from {oldest})")]
    RevisionPruned {
        cell_id: CellId,
        revision: u64,
        oldest: u64,
    },
}

impl OperationError {
    pub fn kind(&self) -> RejectionKind {
        match self {
            OperationError::RevisionAhead { .. } | OperationError::RevisionPruned { .. } => {
                RejectionKind::Conflict
            }
            _ => RejectionKind::Validation,
        }
    }
}
