//! # Runtime
//!
//! Where evaluations actually happen. The session calls into a [`Runtime`]
//! for every action the reducer emits; results come back as ordinary
//! operations submitted through the [`SessionHandle`] the runtime is given.

use crate::session::SessionHandle;
use quire_editor::{CellId, EvaluationMetadata, Operation, Output, SectionId};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

pub trait Runtime: Send + 'static {
    /// Begin evaluating a cell's source in its section's context
    fn evaluate(
        &mut self,
        session: &SessionHandle,
        cell_id: CellId,
        section_id: SectionId,
        source: &str,
    );

    /// Abort whatever the section is evaluating
    fn stop(&mut self, session: &SessionHandle, section_id: SectionId);

    /// Drop any state kept for a deleted cell
    fn forget(&mut self, session: &SessionHandle, cell_id: CellId, section_id: SectionId);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Evaluate {
        cell_id: CellId,
        section_id: SectionId,
        source: String,
    },
    Stop {
        section_id: SectionId,
    },
    Forget {
        cell_id: CellId,
        section_id: SectionId,
    },
}

/// Records calls without ever responding
#[derive(Debug, Clone, Default)]
pub struct RecordingRuntime {
    calls: Arc<Mutex<Vec<RuntimeCall>>>,
}

impl RecordingRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, call: RuntimeCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }
}

impl Runtime for RecordingRuntime {
    fn evaluate(
        &mut self,
        _: &SessionHandle,
        cell_id: CellId,
        section_id: SectionId,
        source: &str,
    ) {
        self.record(RuntimeCall::Evaluate {
            cell_id,
            section_id,
            source: source.to_string(),
        });
    }

    fn stop(&mut self, _: &SessionHandle, section_id: SectionId) {
        self.record(RuntimeCall::Stop { section_id });
    }

    fn forget(&mut self, _: &SessionHandle, cell_id: CellId, section_id: SectionId) {
        self.record(RuntimeCall::Forget {
            cell_id,
            section_id,
        });
    }
}

/// Responds to every evaluation with the cell's source as text output
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoRuntime;

impl Runtime for EchoRuntime {
    fn evaluate(&mut self, session: &SessionHandle, cell_id: CellId, _: SectionId, source: &str) {
        let session = session.clone();
        let operation = Operation::AddCellEvaluationResponse {
            cell_id,
            output: Output::Text {
                text: source.to_string(),
            },
            metadata: EvaluationMetadata::default(),
        };

        tokio::spawn(async move {
            // The evaluation may have been cancelled in the meantime
            if let Err(error) = session.submit(operation).await {
                debug!(cell = %cell_id, %error, "echo response dropped");
            }
        });
    }

    fn stop(&mut self, _: &SessionHandle, _: SectionId) {}

    fn forget(&mut self, _: &SessionHandle, _: CellId, _: SectionId) {}
}
