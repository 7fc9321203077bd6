//! # Session Data
//!
//! One immutable snapshot of a notebook session: the notebook itself plus the
//! side tables the engine keeps about it.
//!
//! ```text
//! Data
//!  ├─ notebook          sections and cells (persisted content)
//!  ├─ cell_infos        evaluation state + text revision log, per cell
//!  ├─ section_infos     running cell + evaluation queue, per section
//!  ├─ deleted_*         soft-deleted entities, most recent first
//!  ├─ clients           joined client ids
//!  └─ runtime           attached execution backend, if any
//! ```
//!
//! Side tables are never embedded in the notebook and always cover exactly
//! the live cells and sections.

use crate::ids::{CellId, ClientId, SectionId};
use crate::notebook::{Cell, Notebook, Section};
use quire_delta::Delta;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    Ready,
    Queued,
    Evaluating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Validity {
    /// Never evaluated since the runtime was attached
    Fresh,
    Evaluated,
    /// Evaluated, but an earlier cell in its chain changed since
    Stale,
    /// Evaluation was cancelled mid-way
    Aborted,
}

/// Evaluation state of an evaluable cell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalInfo {
    pub status: EvaluationStatus,
    pub validity: Validity,
    /// Digest of the source the last evaluation ran
    pub evaluation_digest: Option<u32>,
    pub evaluation_count: u64,
    pub evaluation_time_ms: Option<u64>,
}

impl Default for EvalInfo {
    fn default() -> Self {
        Self {
            status: EvaluationStatus::Ready,
            validity: Validity::Fresh,
            evaluation_digest: None,
            evaluation_count: 0,
            evaluation_time_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellInfo {
    pub revision: u64,
    /// Deltas not yet acknowledged by every client, oldest first. The last
    /// one produced `revision`.
    pub deltas: Vec<Delta>,
    /// Last revision each joined client is known to have incorporated
    pub revision_by_client: BTreeMap<ClientId, u64>,
    pub source_digest: u32,
    /// `None` for markdown cells
    pub eval: Option<EvalInfo>,
}

impl CellInfo {
    pub(crate) fn new<'a>(cell: &Cell, clients: impl IntoIterator<Item = &'a ClientId>) -> Self {
        Self {
            revision: 0,
            deltas: Vec::new(),
            revision_by_client: clients.into_iter().map(|c| (c.clone(), 0)).collect(),
            source_digest: digest(&cell.source),
            eval: cell.is_evaluable().then(EvalInfo::default),
        }
    }

    pub fn evaluation_status(&self) -> Option<EvaluationStatus> {
        self.eval.as_ref().map(|e| e.status)
    }

    pub fn validity(&self) -> Option<Validity> {
        self.eval.as_ref().map(|e| e.validity)
    }

    /// First revision a client may still base a delta on
    pub fn oldest_revision(&self) -> u64 {
        self.revision - self.deltas.len() as u64
    }

    /// Whether the source changed since the last evaluation
    pub fn is_source_changed(&self) -> bool {
        self.eval
            .as_ref()
            .and_then(|e| e.evaluation_digest)
            .is_some_and(|d| d != self.source_digest)
    }

    /// Drop deltas every joined client has acknowledged
    pub(crate) fn prune(&mut self) {
        let keep = match self.revision_by_client.values().min() {
            Some(min) => (self.revision - min) as usize,
            None => 0,
        };
        let drop = self.deltas.len().saturating_sub(keep);
        self.deltas.drain(..drop);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionInfo {
    pub evaluating_cell_id: Option<CellId>,
    /// Cells awaiting evaluation, in chain order
    pub evaluation_queue: Vec<CellId>,
}

impl SectionInfo {
    pub fn is_idle(&self) -> bool {
        self.evaluating_cell_id.is_none() && self.evaluation_queue.is_empty()
    }
}

/// Attached execution backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeHandle {
    pub name: String,
    pub connected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletedCell {
    pub cell: Cell,
    pub section_id: SectionId,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletedSection {
    pub section: Section,
    pub index: usize,
    /// Cells deleted along with the section, in section order
    pub cells: Vec<Cell>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Data {
    pub(crate) notebook: Notebook,
    pub(crate) cell_infos: BTreeMap<CellId, CellInfo>,
    pub(crate) section_infos: BTreeMap<SectionId, SectionInfo>,
    pub(crate) deleted_cells: Vec<DeletedCell>,
    pub(crate) deleted_sections: Vec<DeletedSection>,
    pub(crate) clients: BTreeSet<ClientId>,
    pub(crate) runtime: Option<RuntimeHandle>,
    pub(crate) path: Option<String>,
    pub(crate) dirty: bool,
    pub(crate) next_id: u64,
}

impl Default for Data {
    fn default() -> Self {
        Self::new()
    }
}

impl Data {
    /// Default state: a notebook holding only the setup section and cell
    pub fn new() -> Self {
        let notebook = Notebook::new();
        let clients = BTreeSet::new();
        let cell_infos = notebook
            .cells()
            .map(|cell| (cell.id, CellInfo::new(cell, &clients)))
            .collect();

        Self {
            notebook,
            cell_infos,
            section_infos: BTreeMap::from([(SectionId::SETUP, SectionInfo::default())]),
            deleted_cells: Vec::new(),
            deleted_sections: Vec::new(),
            clients,
            runtime: None,
            path: None,
            dirty: false,
            next_id: 1,
        }
    }

    pub fn notebook(&self) -> &Notebook {
        &self.notebook
    }

    pub fn cell_info(&self, id: CellId) -> Option<&CellInfo> {
        self.cell_infos.get(&id)
    }

    pub fn section_info(&self, id: SectionId) -> Option<&SectionInfo> {
        self.section_infos.get(&id)
    }

    pub fn deleted_cells(&self) -> &[DeletedCell] {
        &self.deleted_cells
    }

    pub fn deleted_sections(&self) -> &[DeletedSection] {
        &self.deleted_sections
    }

    pub fn clients(&self) -> &BTreeSet<ClientId> {
        &self.clients
    }

    pub fn runtime(&self) -> Option<&RuntimeHandle> {
        self.runtime.as_ref()
    }

    pub fn is_runtime_connected(&self) -> bool {
        self.runtime.as_ref().is_some_and(|r| r.connected)
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Source of a cell, if it exists
    pub fn source(&self, id: CellId) -> Option<&str> {
        self.notebook.cell(id).map(|c| c.source.as_str())
    }

    pub(crate) fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub(crate) fn eval_mut(&mut self, id: CellId) -> Option<&mut EvalInfo> {
        self.cell_infos.get_mut(&id).and_then(|i| i.eval.as_mut())
    }

    pub(crate) fn eval(&self, id: CellId) -> Option<&EvalInfo> {
        self.cell_infos.get(&id).and_then(|i| i.eval.as_ref())
    }

    /// Register a cell already inserted into the notebook
    pub(crate) fn track_cell(&mut self, id: CellId) {
        if let Some(cell) = self.notebook.cell(id) {
            let info = CellInfo::new(cell, &self.clients);
            self.cell_infos.insert(id, info);
        }
    }
}

pub(crate) fn digest(source: &str) -> u32 {
    crc32fast::hash(source.as_bytes())
}
