//! # Operations
//!
//! Every change to a session goes through [`Data::apply`], one operation at a
//! time. The operation is validated and applied to a private copy of the
//! state, so a rejection never leaves anything half-applied and the receiver
//! is never mutated.
//!
//! ## Categories
//!
//! - **Structure**: insert, delete, restore and move sections and cells
//! - **Collaborative text**: `apply_cell_delta`, `report_cell_revision`
//! - **Clients**: `client_join`, `client_leave`
//! - **Evaluation**: queueing, cancelling and runtime callbacks
//! - **Bookkeeping**: names, attributes, runtime, path and dirty flag
//!
//! ## Collaborative text
//!
//! A client submits a delta together with the revision it was authored
//! against. If other deltas were applied since, the incoming one is rebased
//! over their composition with [`Priority::Left`], so text that reached the
//! session first is placed first. Deltas stay in the cell's log until every
//! joined client has acknowledged them.

use crate::actions::Action;
use crate::data::{
    digest, Data, DeletedCell, DeletedSection, EvaluationStatus, RuntimeHandle, SectionInfo,
};
use crate::errors::OperationError;
use crate::evaluation::EvaluationMetadata;
use crate::ids::{CellId, ClientId, SectionId};
use crate::notebook::{Cell, CellAttributes, CellKind, Output, Section, DEFAULT_SECTION_NAME};
use quire_delta::{Delta, Priority};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    /// Insert an empty main-flow section (index clamped)
    InsertSection { index: usize },

    /// Insert an empty cell (index clamped)
    InsertCell {
        section_id: SectionId,
        index: usize,
        kind: CellKind,
    },

    /// Delete a section, either with its cells or moving them to the end of
    /// the previous section
    DeleteSection {
        section_id: SectionId,
        delete_cells: bool,
    },

    DeleteCell { cell_id: CellId },

    RestoreCell { cell_id: CellId },

    RestoreSection { section_id: SectionId },

    MoveCell {
        cell_id: CellId,
        section_id: SectionId,
        index: usize,
    },

    MoveSection { section_id: SectionId, index: usize },

    /// Turn a section into a branch of `parent_id`, or back into main flow
    SetSectionParent {
        section_id: SectionId,
        parent_id: Option<SectionId>,
    },

    ConvertSmartCell { cell_id: CellId },

    SetNotebookName { name: String },

    SetSectionName { section_id: SectionId, name: String },

    SetCellAttributes {
        cell_id: CellId,
        attributes: CellAttributes,
    },

    EraseOutputs,

    ClientJoin { client_id: ClientId },

    ClientLeave { client_id: ClientId },

    /// Apply a client's edit authored against `revision`
    ApplyCellDelta {
        client_id: ClientId,
        cell_id: CellId,
        delta: Delta,
        revision: u64,
    },

    /// Acknowledge that a client has incorporated `revision`
    ReportCellRevision {
        client_id: ClientId,
        cell_id: CellId,
        revision: u64,
    },

    QueueCellEvaluation { cell_id: CellId },

    CancelCellEvaluation { cell_id: CellId },

    AddCellEvaluationStdout { cell_id: CellId, text: String },

    AddCellEvaluationOutput { cell_id: CellId, output: Output },

    AddCellEvaluationResponse {
        cell_id: CellId,
        output: Output,
        #[serde(default)]
        metadata: EvaluationMetadata,
    },

    SetRuntime { runtime: Option<RuntimeHandle> },

    SetPath { path: Option<String> },

    MarkAsNotDirty,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::InsertSection { .. } => "insert_section",
            Operation::InsertCell { .. } => "insert_cell",
            Operation::DeleteSection { .. } => "delete_section",
            Operation::DeleteCell { .. } => "delete_cell",
            Operation::RestoreCell { .. } => "restore_cell",
            Operation::RestoreSection { .. } => "restore_section",
            Operation::MoveCell { .. } => "move_cell",
            Operation::MoveSection { .. } => "move_section",
            Operation::SetSectionParent { .. } => "set_section_parent",
            Operation::ConvertSmartCell { .. } => "convert_smart_cell",
            Operation::SetNotebookName { .. } => "set_notebook_name",
            Operation::SetSectionName { .. } => "set_section_name",
            Operation::SetCellAttributes { .. } => "set_cell_attributes",
            Operation::EraseOutputs => "erase_outputs",
            Operation::ClientJoin { .. } => "client_join",
            Operation::ClientLeave { .. } => "client_leave",
            Operation::ApplyCellDelta { .. } => "apply_cell_delta",
            Operation::ReportCellRevision { .. } => "report_cell_revision",
            Operation::QueueCellEvaluation { .. } => "queue_cell_evaluation",
            Operation::CancelCellEvaluation { .. } => "cancel_cell_evaluation",
            Operation::AddCellEvaluationStdout { .. } => "add_cell_evaluation_stdout",
            Operation::AddCellEvaluationOutput { .. } => "add_cell_evaluation_output",
            Operation::AddCellEvaluationResponse { .. } => "add_cell_evaluation_response",
            Operation::SetRuntime { .. } => "set_runtime",
            Operation::SetPath { .. } => "set_path",
            Operation::MarkAsNotDirty => "mark_as_not_dirty",
        }
    }
}

type Reduced = Result<Vec<Action>, OperationError>;

impl Data {
    /// Apply one operation, returning the next state and the actions to run
    pub fn apply(&self, operation: Operation) -> Result<(Data, Vec<Action>), OperationError> {
        let name = operation.name();
        let mut next = self.clone();

        match next.reduce(operation) {
            Ok(actions) => {
                debug!(operation = name, actions = actions.len(), "operation applied");
                Ok((next, actions))
            }
            Err(error) => {
                debug!(operation = name, %error, "operation rejected");
                Err(error)
            }
        }
    }

    /// Fold a sequence of operations from the default state
    pub fn replay(operations: impl IntoIterator<Item = Operation>) -> Result<Data, OperationError> {
        operations
            .into_iter()
            .try_fold(Data::new(), |data, operation| {
                data.apply(operation).map(|(next, _)| next)
            })
    }

    fn reduce(&mut self, operation: Operation) -> Reduced {
        match operation {
            Operation::InsertSection { index } => self.insert_section(index),
            Operation::InsertCell {
                section_id,
                index,
                kind,
            } => self.insert_cell(section_id, index, kind),
            Operation::DeleteSection {
                section_id,
                delete_cells,
            } => self.delete_section(section_id, delete_cells),
            Operation::DeleteCell { cell_id } => self.delete_cell(cell_id),
            Operation::RestoreCell { cell_id } => self.restore_cell(cell_id),
            Operation::RestoreSection { section_id } => self.restore_section(section_id),
            Operation::MoveCell {
                cell_id,
                section_id,
                index,
            } => self.move_cell(cell_id, section_id, index),
            Operation::MoveSection { section_id, index } => self.move_section(section_id, index),
            Operation::SetSectionParent {
                section_id,
                parent_id,
            } => self.set_section_parent(section_id, parent_id),
            Operation::ConvertSmartCell { cell_id } => self.convert_smart_cell(cell_id),
            Operation::SetNotebookName { name } => {
                self.notebook.name = name;
                self.dirty = true;
                Ok(vec![])
            }
            Operation::SetSectionName { section_id, name } => {
                let section = self
                    .notebook
                    .section_mut(section_id)
                    .ok_or(OperationError::SectionNotFound(section_id))?;
                section.name = name;
                self.dirty = true;
                Ok(vec![])
            }
            Operation::SetCellAttributes {
                cell_id,
                attributes,
            } => self.set_cell_attributes(cell_id, attributes),
            Operation::EraseOutputs => {
                for cell in self.notebook.cells_mut() {
                    cell.outputs.clear();
                }
                self.dirty = true;
                Ok(vec![])
            }
            Operation::ClientJoin { client_id } => self.client_join(client_id),
            Operation::ClientLeave { client_id } => self.client_leave(client_id),
            Operation::ApplyCellDelta {
                client_id,
                cell_id,
                delta,
                revision,
            } => self.apply_cell_delta(client_id, cell_id, delta, revision),
            Operation::ReportCellRevision {
                client_id,
                cell_id,
                revision,
            } => self.report_cell_revision(client_id, cell_id, revision),
            Operation::QueueCellEvaluation { cell_id } => {
                if self.evaluable(cell_id)? != EvaluationStatus::Ready {
                    return Err(OperationError::AlreadyEvaluating(cell_id));
                }
                Ok(self.queue_evaluation(cell_id))
            }
            Operation::CancelCellEvaluation { cell_id } => {
                if self.evaluable(cell_id)? == EvaluationStatus::Ready {
                    return Err(OperationError::NothingToCancel(cell_id));
                }
                Ok(self.cancel_evaluation(cell_id))
            }
            Operation::AddCellEvaluationStdout { cell_id, text } => {
                self.push_evaluation_output(cell_id, Output::Stdout { text })
            }
            Operation::AddCellEvaluationOutput { cell_id, output } => {
                self.push_evaluation_output(cell_id, output)
            }
            Operation::AddCellEvaluationResponse {
                cell_id,
                output,
                metadata,
            } => {
                self.require_evaluating(cell_id)?;
                self.dirty = true;
                Ok(self.finish_evaluation(cell_id, output, metadata))
            }
            Operation::SetRuntime { runtime } => {
                self.runtime = runtime;
                self.reset_evaluation();
                Ok(vec![])
            }
            Operation::SetPath { path } => {
                self.path = path;
                self.dirty = true;
                Ok(vec![])
            }
            Operation::MarkAsNotDirty => {
                self.dirty = false;
                Ok(vec![])
            }
        }
    }

    /// Evaluation status of an evaluable cell
    fn evaluable(&self, cell_id: CellId) -> Result<EvaluationStatus, OperationError> {
        let info = self
            .cell_infos
            .get(&cell_id)
            .ok_or(OperationError::CellNotFound(cell_id))?;
        info.evaluation_status()
            .ok_or(OperationError::NotEvaluable(cell_id))
    }

    fn require_evaluating(&self, cell_id: CellId) -> Result<(), OperationError> {
        match self.evaluable(cell_id)? {
            EvaluationStatus::Evaluating => Ok(()),
            _ => Err(OperationError::NotEvaluating(cell_id)),
        }
    }

    fn require_client(&self, client_id: &ClientId) -> Result<(), OperationError> {
        if self.clients.contains(client_id) {
            Ok(())
        } else {
            Err(OperationError::ClientNotFound(client_id.clone()))
        }
    }

    fn insert_section(&mut self, index: usize) -> Reduced {
        let id = SectionId(self.allocate_id());
        self.notebook
            .insert_section(index, Section::new(id, DEFAULT_SECTION_NAME));
        self.section_infos.insert(id, SectionInfo::default());
        self.dirty = true;
        Ok(vec![])
    }

    fn insert_cell(&mut self, section_id: SectionId, index: usize, kind: CellKind) -> Reduced {
        if section_id == SectionId::SETUP {
            return Err(OperationError::SetupSectionProtected);
        }
        if self.notebook.section(section_id).is_none() {
            return Err(OperationError::SectionNotFound(section_id));
        }

        let id = CellId(self.allocate_id());
        self.notebook.insert_cell(section_id, index, Cell::new(id, kind));
        self.track_cell(id);
        self.dirty = true;
        Ok(vec![])
    }

    fn delete_section(&mut self, section_id: SectionId, delete_cells: bool) -> Reduced {
        if section_id == SectionId::SETUP {
            return Err(OperationError::SetupSectionProtected);
        }
        let section = self
            .notebook
            .section(section_id)
            .cloned()
            .ok_or(OperationError::SectionNotFound(section_id))?;
        if !self.notebook.child_sections(section_id).is_empty() {
            return Err(OperationError::SectionHasBranches(section_id));
        }

        let target = if delete_cells || section.cell_ids.is_empty() {
            None
        } else {
            let index = self
                .notebook
                .section_index(section_id)
                .ok_or(OperationError::SectionNotFound(section_id))?;
            let previous = index
                .checked_sub(1)
                .and_then(|i| self.notebook.section_ids().get(i).copied())
                .ok_or(OperationError::NoTargetSection)?;
            Some(previous)
        };

        let before = self.evaluated_chains();
        let mut actions = Vec::new();
        for cell_id in &section.cell_ids {
            let was_evaluating =
                self.eval(*cell_id).map(|e| e.status) == Some(EvaluationStatus::Evaluating);
            actions.extend(self.release(*cell_id));
            if was_evaluating {
                self.dequeue_descendants(*cell_id);
            }
        }

        let mut cells = Vec::new();
        match target {
            Some(target) => {
                for cell_id in &section.cell_ids {
                    self.notebook.move_cell(*cell_id, target, usize::MAX);
                }
            }
            None => {
                for cell_id in &section.cell_ids {
                    if self.cell_infos.remove(cell_id).is_some_and(|i| i.eval.is_some()) {
                        actions.push(Action::ForgetEvaluation {
                            cell_id: *cell_id,
                            section_id,
                        });
                    }
                    if let Some((cell, _, _)) = self.notebook.remove_cell(*cell_id) {
                        cells.push(cell);
                    }
                }
            }
        }

        if let Some((mut removed, index)) = self.notebook.remove_section(section_id) {
            // Moved cells belong to the target section now
            removed.cell_ids = cells.iter().map(|cell| cell.id).collect();
            self.deleted_sections.insert(
                0,
                DeletedSection {
                    section: removed,
                    index,
                    cells,
                },
            );
        }
        self.section_infos.remove(&section_id);

        self.mark_changed_chains_stale(before);
        self.dirty = true;
        actions.extend(self.schedule());
        Ok(actions)
    }

    fn delete_cell(&mut self, cell_id: CellId) -> Reduced {
        if cell_id == CellId::SETUP {
            return Err(OperationError::SetupCellProtected);
        }
        let (cell, section) = self
            .notebook
            .cell_with_section(cell_id)
            .ok_or(OperationError::CellNotFound(cell_id))?;
        let evaluable = cell.is_evaluable();
        let section_id = section.id;

        let before = self.evaluated_chains();
        let was_evaluating =
            self.eval(cell_id).map(|e| e.status) == Some(EvaluationStatus::Evaluating);
        let mut actions: Vec<Action> = self.release(cell_id).into_iter().collect();
        if was_evaluating {
            self.dequeue_descendants(cell_id);
        }
        if evaluable {
            actions.push(Action::ForgetEvaluation {
                cell_id,
                section_id,
            });
        }

        if let Some((cell, section_id, index)) = self.notebook.remove_cell(cell_id) {
            self.deleted_cells.insert(
                0,
                DeletedCell {
                    cell,
                    section_id,
                    index,
                },
            );
        }
        self.cell_infos.remove(&cell_id);

        self.mark_changed_chains_stale(before);
        self.dirty = true;
        actions.extend(self.schedule());
        Ok(actions)
    }

    fn restore_cell(&mut self, cell_id: CellId) -> Reduced {
        let position = self
            .deleted_cells
            .iter()
            .position(|d| d.cell.id == cell_id)
            .ok_or(OperationError::CellNotDeleted(cell_id))?;

        let remembered = &self.deleted_cells[position];
        let (section_id, index) = if remembered.section_id != SectionId::SETUP
            && self.notebook.section(remembered.section_id).is_some()
        {
            (remembered.section_id, remembered.index)
        } else {
            let first = self
                .notebook
                .section_ids()
                .first()
                .copied()
                .ok_or(OperationError::NoTargetSection)?;
            (first, usize::MAX)
        };

        let before = self.evaluated_chains();
        let deleted = self.deleted_cells.remove(position);
        self.notebook.insert_cell(section_id, index, deleted.cell);
        self.track_cell(cell_id);

        self.mark_changed_chains_stale(before);
        self.dirty = true;
        Ok(vec![])
    }

    fn restore_section(&mut self, section_id: SectionId) -> Reduced {
        let position = self
            .deleted_sections
            .iter()
            .position(|d| d.section.id == section_id)
            .ok_or(OperationError::SectionNotDeleted(section_id))?;

        let before = self.evaluated_chains();
        let deleted = self.deleted_sections.remove(position);
        let mut section = deleted.section;
        section.cell_ids.clear();

        let index = self.notebook.insert_section(deleted.index, section);
        self.section_infos.insert(section_id, SectionInfo::default());
        for cell in deleted.cells {
            let cell_id = cell.id;
            self.notebook.insert_cell(section_id, usize::MAX, cell);
            self.track_cell(cell_id);
        }

        // The parent may have been deleted, moved after us or become a branch
        let parent_id = self.notebook.section(section_id).and_then(|s| s.parent_id);
        if let Some(parent_id) = parent_id {
            let valid = self
                .notebook
                .section_index(parent_id)
                .is_some_and(|p| p < index)
                && self
                    .notebook
                    .section(parent_id)
                    .is_some_and(|p| !p.is_branching());
            if !valid {
                if let Some(section) = self.notebook.section_mut(section_id) {
                    section.parent_id = None;
                }
            }
        }

        self.mark_changed_chains_stale(before);
        self.dirty = true;
        Ok(vec![])
    }

    fn move_cell(&mut self, cell_id: CellId, section_id: SectionId, index: usize) -> Reduced {
        if cell_id == CellId::SETUP {
            return Err(OperationError::SetupCellProtected);
        }
        if self.notebook.cell(cell_id).is_none() {
            return Err(OperationError::CellNotFound(cell_id));
        }
        if section_id == SectionId::SETUP {
            return Err(OperationError::SetupSectionProtected);
        }
        if self.notebook.section(section_id).is_none() {
            return Err(OperationError::SectionNotFound(section_id));
        }
        if matches!(
            self.eval(cell_id).map(|e| e.status),
            Some(EvaluationStatus::Queued | EvaluationStatus::Evaluating)
        ) {
            return Err(OperationError::CellBusy(cell_id));
        }

        let before = self.evaluated_chains();
        self.notebook.move_cell(cell_id, section_id, index);
        self.mark_changed_chains_stale(before);
        self.dirty = true;
        Ok(vec![])
    }

    fn move_section(&mut self, section_id: SectionId, index: usize) -> Reduced {
        if section_id == SectionId::SETUP {
            return Err(OperationError::SetupSectionProtected);
        }
        let from = self
            .notebook
            .section_index(section_id)
            .ok_or(OperationError::SectionNotFound(section_id))?;

        let mut order = self.notebook.section_ids().to_vec();
        order.remove(from);
        order.insert(index.min(order.len()), section_id);

        let position = |id: SectionId| order.iter().position(|s| *s == id);
        let misplaced = order.iter().any(|id| {
            self.notebook
                .section(*id)
                .and_then(|s| s.parent_id)
                .is_some_and(|parent| position(parent) > position(*id))
        });
        if misplaced {
            return Err(OperationError::InvalidSectionOrder(section_id));
        }

        let before = self.evaluated_chains();
        self.notebook.move_section(section_id, index);
        self.mark_changed_chains_stale(before);
        self.dirty = true;
        Ok(vec![])
    }

    fn set_section_parent(
        &mut self,
        section_id: SectionId,
        parent_id: Option<SectionId>,
    ) -> Reduced {
        if section_id == SectionId::SETUP {
            return Err(OperationError::SetupSectionProtected);
        }
        let index = self
            .notebook
            .section_index(section_id)
            .ok_or(OperationError::SectionNotFound(section_id))?;

        if let Some(parent_id) = parent_id {
            let parent = self
                .notebook
                .section(parent_id)
                .ok_or(OperationError::SectionNotFound(parent_id))?;
            let valid = parent_id != SectionId::SETUP
                && !parent.is_branching()
                && self
                    .notebook
                    .section_index(parent_id)
                    .is_some_and(|p| p < index);
            if !valid {
                return Err(OperationError::InvalidSectionParent {
                    section_id,
                    parent_id,
                });
            }
            if !self.notebook.child_sections(section_id).is_empty() {
                return Err(OperationError::SectionHasBranches(section_id));
            }
        }
        if !self
            .section_infos
            .get(&section_id)
            .map_or(true, SectionInfo::is_idle)
        {
            return Err(OperationError::SectionBusy(section_id));
        }

        let before = self.evaluated_chains();
        if let Some(section) = self.notebook.section_mut(section_id) {
            section.parent_id = parent_id;
        }
        self.mark_changed_chains_stale(before);
        self.dirty = true;
        Ok(vec![])
    }

    fn convert_smart_cell(&mut self, cell_id: CellId) -> Reduced {
        let cell = self
            .notebook
            .cell_mut(cell_id)
            .ok_or(OperationError::CellNotFound(cell_id))?;
        if !matches!(cell.kind, CellKind::Smart { .. }) {
            return Err(OperationError::NotSmartCell(cell_id));
        }

        cell.kind = CellKind::Code;
        self.dirty = true;
        Ok(vec![])
    }

    fn set_cell_attributes(&mut self, cell_id: CellId, attributes: CellAttributes) -> Reduced {
        self.evaluable(cell_id)?;
        if let Some(cell) = self.notebook.cell_mut(cell_id) {
            cell.attributes = attributes;
        }
        self.dirty = true;
        Ok(vec![])
    }

    fn client_join(&mut self, client_id: ClientId) -> Reduced {
        if self.clients.contains(&client_id) {
            return Err(OperationError::ClientAlreadyJoined(client_id));
        }

        for info in self.cell_infos.values_mut() {
            info.revision_by_client
                .insert(client_id.clone(), info.revision);
        }
        debug!(client = %client_id, "client joined");
        self.clients.insert(client_id);
        Ok(vec![])
    }

    fn client_leave(&mut self, client_id: ClientId) -> Reduced {
        self.require_client(&client_id)?;

        for info in self.cell_infos.values_mut() {
            info.revision_by_client.remove(&client_id);
            info.prune();
        }
        debug!(client = %client_id, "client left");
        self.clients.remove(&client_id);
        Ok(vec![])
    }

    fn apply_cell_delta(
        &mut self,
        client_id: ClientId,
        cell_id: CellId,
        delta: Delta,
        revision: u64,
    ) -> Reduced {
        self.require_client(&client_id)?;
        let info = self
            .cell_infos
            .get(&cell_id)
            .ok_or(OperationError::CellNotFound(cell_id))?;
        if revision > info.revision {
            return Err(OperationError::RevisionAhead {
                cell_id,
                revision,
                current: info.revision,
            });
        }
        if revision < info.oldest_revision() {
            return Err(OperationError::RevisionPruned {
                cell_id,
                revision,
                oldest: info.oldest_revision(),
            });
        }

        let unseen = (info.revision - revision) as usize;
        let rebased = info.deltas[info.deltas.len() - unseen..]
            .iter()
            .fold(Delta::new(), |history, d| history.compose(d))
            .transform(&delta, Priority::Left);

        let source = self
            .notebook
            .cell(cell_id)
            .map(|c| c.source.as_str())
            .ok_or(OperationError::CellNotFound(cell_id))?;
        let source = rebased
            .apply(source)
            .map_err(|source| OperationError::InvalidDelta { cell_id, source })?;

        let source_digest = digest(&source);
        if let Some(cell) = self.notebook.cell_mut(cell_id) {
            cell.source = source;
        }
        if let Some(info) = self.cell_infos.get_mut(&cell_id) {
            info.revision += 1;
            info.deltas.push(rebased.clone());
            info.source_digest = source_digest;
            info.revision_by_client
                .insert(client_id.clone(), info.revision);
            info.prune();
        }

        if !rebased.is_noop() {
            self.mark_descendants_stale(cell_id);
            self.dirty = true;
        }

        Ok(vec![Action::BroadcastDelta {
            client_id,
            cell_id,
            delta: rebased,
        }])
    }

    fn report_cell_revision(
        &mut self,
        client_id: ClientId,
        cell_id: CellId,
        revision: u64,
    ) -> Reduced {
        self.require_client(&client_id)?;
        let info = self
            .cell_infos
            .get_mut(&cell_id)
            .ok_or(OperationError::CellNotFound(cell_id))?;
        if revision > info.revision {
            return Err(OperationError::RevisionAhead {
                cell_id,
                revision,
                current: info.revision,
            });
        }

        let known = info.revision_by_client.entry(client_id).or_insert(0);
        *known = (*known).max(revision);
        info.prune();
        Ok(vec![])
    }

    fn push_evaluation_output(&mut self, cell_id: CellId, output: Output) -> Reduced {
        self.require_evaluating(cell_id)?;
        if let Some(cell) = self.notebook.cell_mut(cell_id) {
            cell.push_output(output);
        }
        self.dirty = true;
        Ok(vec![])
    }
}
