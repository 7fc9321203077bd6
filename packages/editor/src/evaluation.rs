//! # Evaluation Graph & Queue
//!
//! Dependency ordering between cells and the per-lane scheduler.
//!
//! ## Chains
//!
//! The main flow is the setup cell followed by the evaluable cells of every
//! main-flow section, in order. A branching section sees the main flow up to
//! and including its parent, then its own cells:
//!
//! ```text
//! setup ─ s1 ─ s2 ─ s3            main flow
//!          └─ b1                  branch of s1: setup, s1, b1
//! ```
//!
//! A cell's ancestors are the cells before it in its chain; its descendants
//! are every cell that has it as an ancestor.
//!
//! ## Lanes
//!
//! The whole main flow is one lane and each branching section is its own
//! lane. At most one cell evaluates per lane. A queued cell starts once its
//! lane is idle, it heads its section's queue, and none of its ancestors is
//! queued or evaluating.

use crate::actions::Action;
use crate::data::{Data, EvaluationStatus, Validity};
use crate::ids::{CellId, SectionId};
use crate::notebook::Output;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Unit of sequential evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Lane {
    Main,
    Branch(SectionId),
}

/// How an evaluation finished, as reported by the runtime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EvaluationMetadata {
    pub evaluation_time_ms: Option<u64>,
    /// The evaluation raised. Cells queued behind it are dropped.
    pub errored: bool,
}

impl Data {
    pub fn lane(&self, section_id: SectionId) -> Lane {
        match self.notebook.section(section_id).and_then(|s| s.parent_id) {
            Some(_) => Lane::Branch(section_id),
            None => Lane::Main,
        }
    }

    /// Evaluable cells of the whole main flow, setup first
    pub fn main_flow_chain(&self) -> Vec<CellId> {
        self.notebook
            .main_flow_section_ids()
            .into_iter()
            .flat_map(|id| self.notebook.evaluable_cell_ids(id))
            .collect()
    }

    /// Evaluation chain a section's cells belong to
    pub fn evaluation_chain(&self, section_id: SectionId) -> Vec<CellId> {
        let Some(section) = self.notebook.section(section_id) else {
            return Vec::new();
        };

        let Some(parent_id) = section.parent_id else {
            return self.main_flow_chain();
        };

        let mut chain = Vec::new();
        for id in self.notebook.main_flow_section_ids() {
            chain.extend(self.notebook.evaluable_cell_ids(id));
            if id == parent_id {
                break;
            }
        }
        chain.extend(self.notebook.evaluable_cell_ids(section_id));
        chain
    }

    /// Cells before `cell_id` in its chain, in chain order
    pub fn ancestors(&self, cell_id: CellId) -> Vec<CellId> {
        let Some(section_id) = self.notebook.section_of(cell_id) else {
            return Vec::new();
        };

        let mut chain = self.evaluation_chain(section_id);
        match chain.iter().position(|id| *id == cell_id) {
            Some(position) => {
                chain.truncate(position);
                chain
            }
            None => Vec::new(),
        }
    }

    /// Cells that have `cell_id` as an ancestor, main flow first
    pub fn descendants(&self, cell_id: CellId) -> Vec<CellId> {
        let mut chains = vec![self.main_flow_chain()];
        for section_id in self.notebook.section_ids() {
            if self.lane(*section_id) != Lane::Main {
                chains.push(self.evaluation_chain(*section_id));
            }
        }

        let mut seen = BTreeSet::new();
        let mut descendants = Vec::new();
        for chain in chains {
            if let Some(position) = chain.iter().position(|id| *id == cell_id) {
                for id in &chain[position + 1..] {
                    if seen.insert(*id) {
                        descendants.push(*id);
                    }
                }
            }
        }
        descendants
    }

    fn status(&self, cell_id: CellId) -> Option<EvaluationStatus> {
        self.eval(cell_id).map(|e| e.status)
    }

    fn is_lane_busy(&self, lane: Lane) -> bool {
        self.notebook.all_section_ids().any(|id| {
            self.lane(id) == lane
                && self
                    .section_infos
                    .get(&id)
                    .is_some_and(|info| info.evaluating_cell_id.is_some())
        })
    }

    pub(crate) fn mark_stale(&mut self, cell_ids: impl IntoIterator<Item = CellId>) {
        for id in cell_ids {
            if let Some(eval) = self.eval_mut(id) {
                if eval.validity == Validity::Evaluated {
                    eval.validity = Validity::Stale;
                }
            }
        }
    }

    pub(crate) fn mark_descendants_stale(&mut self, cell_id: CellId) {
        let descendants = self.descendants(cell_id);
        self.mark_stale(descendants);
    }

    /// Ancestors of every evaluated cell, to compare against after a
    /// structural change
    pub(crate) fn evaluated_chains(&self) -> BTreeMap<CellId, Vec<CellId>> {
        self.cell_infos
            .iter()
            .filter(|(_, info)| info.validity() == Some(Validity::Evaluated))
            .map(|(id, _)| (*id, self.ancestors(*id)))
            .collect()
    }

    /// Mark stale every evaluated cell whose ancestors changed
    pub(crate) fn mark_changed_chains_stale(&mut self, before: BTreeMap<CellId, Vec<CellId>>) {
        let changed: Vec<CellId> = before
            .into_iter()
            .filter(|(id, ancestors)| {
                self.cell_infos.contains_key(id) && self.ancestors(*id) != *ancestors
            })
            .map(|(id, _)| id)
            .collect();
        self.mark_stale(changed);
    }

    /// Queue a cell along with every ancestor it needs, then start whatever
    /// is eligible
    pub(crate) fn queue_evaluation(&mut self, cell_id: CellId) -> Vec<Action> {
        let prerequisites: Vec<CellId> = self
            .ancestors(cell_id)
            .into_iter()
            .filter(|id| self.needs_evaluation(*id))
            .collect();

        for id in prerequisites {
            self.enqueue(id);
        }
        self.enqueue(cell_id);

        self.schedule()
    }

    fn needs_evaluation(&self, cell_id: CellId) -> bool {
        let Some(eval) = self.eval(cell_id) else {
            return false;
        };
        let blank = self
            .notebook
            .cell(cell_id)
            .map_or(true, |c| c.source.trim().is_empty());

        eval.status == EvaluationStatus::Ready && eval.validity != Validity::Evaluated && !blank
    }

    fn enqueue(&mut self, cell_id: CellId) {
        let Some(section_id) = self.notebook.section_of(cell_id) else {
            return;
        };
        let order = self
            .notebook
            .section(section_id)
            .map(|s| s.cell_ids.clone())
            .unwrap_or_default();

        if let Some(eval) = self.eval_mut(cell_id) {
            eval.status = EvaluationStatus::Queued;
        }
        if let Some(info) = self.section_infos.get_mut(&section_id) {
            info.evaluation_queue.push(cell_id);
            info.evaluation_queue
                .sort_by_key(|id| order.iter().position(|c| c == id));
        }
    }

    fn dequeue(&mut self, cell_id: CellId) {
        if let Some(section_id) = self.notebook.section_of(cell_id) {
            if let Some(info) = self.section_infos.get_mut(&section_id) {
                info.evaluation_queue.retain(|id| *id != cell_id);
            }
        }
        if let Some(eval) = self.eval_mut(cell_id) {
            eval.status = EvaluationStatus::Ready;
        }
    }

    pub(crate) fn dequeue_descendants(&mut self, cell_id: CellId) {
        for id in self.descendants(cell_id) {
            if self.status(id) == Some(EvaluationStatus::Queued) {
                self.dequeue(id);
            }
        }
    }

    /// Take a cell out of evaluation without touching anything queued
    pub(crate) fn release(&mut self, cell_id: CellId) -> Option<Action> {
        match self.status(cell_id)? {
            EvaluationStatus::Ready => None,
            EvaluationStatus::Queued => {
                self.dequeue(cell_id);
                None
            }
            EvaluationStatus::Evaluating => {
                let section_id = self.notebook.section_of(cell_id)?;
                if let Some(info) = self.section_infos.get_mut(&section_id) {
                    info.evaluating_cell_id = None;
                }
                if let Some(eval) = self.eval_mut(cell_id) {
                    eval.status = EvaluationStatus::Ready;
                    eval.validity = Validity::Aborted;
                }
                debug!(%cell_id, %section_id, "evaluation aborted");
                Some(Action::StopEvaluation { section_id })
            }
        }
    }

    pub(crate) fn cancel_evaluation(&mut self, cell_id: CellId) -> Vec<Action> {
        let mut actions: Vec<Action> = self.release(cell_id).into_iter().collect();
        self.dequeue_descendants(cell_id);
        actions.extend(self.schedule());
        actions
    }

    pub(crate) fn finish_evaluation(
        &mut self,
        cell_id: CellId,
        output: Output,
        metadata: EvaluationMetadata,
    ) -> Vec<Action> {
        if let Some(section_id) = self.notebook.section_of(cell_id) {
            if let Some(info) = self.section_infos.get_mut(&section_id) {
                info.evaluating_cell_id = None;
            }
        }
        if let Some(cell) = self.notebook.cell_mut(cell_id) {
            cell.push_output(output);
        }
        if let Some(eval) = self.eval_mut(cell_id) {
            eval.status = EvaluationStatus::Ready;
            eval.validity = Validity::Evaluated;
            eval.evaluation_count += 1;
            eval.evaluation_time_ms = metadata.evaluation_time_ms;
        }
        debug!(%cell_id, errored = metadata.errored, "evaluation finished");

        if metadata.errored {
            self.dequeue_descendants(cell_id);
        } else {
            let reevaluate: Vec<CellId> = self
                .descendants(cell_id)
                .into_iter()
                .filter(|id| {
                    self.eval(*id).is_some_and(|e| {
                        e.validity == Validity::Stale && e.status == EvaluationStatus::Ready
                    }) && self
                        .notebook
                        .cell(*id)
                        .is_some_and(|c| c.attributes.reevaluate_automatically)
                })
                .collect();
            for id in reevaluate {
                self.enqueue(id);
            }
        }

        self.schedule()
    }

    /// Start every queued cell that is eligible
    pub(crate) fn schedule(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        let section_ids: Vec<SectionId> = self.notebook.all_section_ids().collect();

        for section_id in section_ids {
            let Some(head) = self
                .section_infos
                .get(&section_id)
                .and_then(|info| info.evaluation_queue.first().copied())
            else {
                continue;
            };

            if self.is_lane_busy(self.lane(section_id)) {
                continue;
            }

            let blocked = self.ancestors(head).into_iter().any(|id| {
                matches!(
                    self.status(id),
                    Some(EvaluationStatus::Queued | EvaluationStatus::Evaluating)
                )
            });
            if blocked {
                continue;
            }

            actions.push(self.start_evaluation(head, section_id));
        }

        actions
    }

    fn start_evaluation(&mut self, cell_id: CellId, section_id: SectionId) -> Action {
        if let Some(info) = self.section_infos.get_mut(&section_id) {
            info.evaluation_queue.retain(|id| *id != cell_id);
            info.evaluating_cell_id = Some(cell_id);
        }

        let source_digest = self.cell_infos.get(&cell_id).map(|i| i.source_digest);
        if let Some(eval) = self.eval_mut(cell_id) {
            eval.status = EvaluationStatus::Evaluating;
            eval.evaluation_digest = source_digest;
        }
        if let Some(cell) = self.notebook.cell_mut(cell_id) {
            cell.outputs.clear();
        }
        self.mark_descendants_stale(cell_id);

        debug!(%cell_id, %section_id, "evaluation started");
        Action::StartEvaluation {
            cell_id,
            section_id,
        }
    }

    /// Forget all evaluation state, as after attaching a new runtime
    pub(crate) fn reset_evaluation(&mut self) {
        for info in self.cell_infos.values_mut() {
            if let Some(eval) = info.eval.as_mut() {
                eval.status = EvaluationStatus::Ready;
                eval.validity = Validity::Fresh;
                eval.evaluation_digest = None;
            }
        }
        for info in self.section_infos.values_mut() {
            *info = Default::default();
        }
    }
}
