//! # Notebook
//!
//! The persisted document tree: sections holding ordered cells.
//!
//! Entities live in flat arenas keyed by id. Sections reference their cells
//! by id, branching sections reference their parent by id, and an owner index
//! maps every cell back to its section. Nothing holds a pointer to anything
//! else.
//!
//! The setup section is kept apart from the ordered list of regular sections:
//! it always comes first, always holds exactly one code cell, and section
//! indexes address the regular list only.

use crate::ids::{CellId, SectionId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const SETUP_SECTION_NAME: &str = "Setup";
pub const DEFAULT_SECTION_NAME: &str = "Section";
pub const DEFAULT_NOTEBOOK_NAME: &str = "Untitled notebook";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CellKind {
    Code,
    Markdown,
    /// Generated code cell, convertible to a plain code cell
    Smart { kind: String },
}

impl CellKind {
    pub fn is_evaluable(&self) -> bool {
        !matches!(self, CellKind::Markdown)
    }
}

/// Per-cell evaluation preferences
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CellAttributes {
    /// Queue the cell again whenever it goes stale after an evaluation
    pub reevaluate_automatically: bool,
    pub disable_formatting: bool,
}

/// Evaluation output. Opaque to the engine except for stdout merging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Output {
    Stdout { text: String },
    Text { text: String },
    Markdown { text: String },
    Error { message: String },
    Frame { outputs: Vec<Output> },
    Data { mime: String, payload: serde_json::Value },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub id: CellId,
    pub kind: CellKind,
    pub source: String,
    /// Oldest first
    pub outputs: Vec<Output>,
    pub attributes: CellAttributes,
}

impl Cell {
    pub fn new(id: CellId, kind: CellKind) -> Self {
        Self {
            id,
            kind,
            source: String::new(),
            outputs: Vec::new(),
            attributes: CellAttributes::default(),
        }
    }

    pub fn is_evaluable(&self) -> bool {
        self.kind.is_evaluable()
    }

    /// Append an output, coalescing consecutive stdout fragments
    pub(crate) fn push_output(&mut self, output: Output) {
        if let Output::Stdout { text } = &output {
            if let Some(Output::Stdout { text: existing }) = self.outputs.last_mut() {
                *existing = merge_stdout(existing, text);
                return;
            }
        }

        self.outputs.push(output);
    }
}

/// Concatenate stdout, letting a bare carriage return rewind the current line
///
/// A trailing `\r` is kept as-is until the next fragment shows whether it
/// starts a `\r\n` line break.
pub fn merge_stdout(existing: &str, addition: &str) -> String {
    let mut merged = String::with_capacity(existing.len() + addition.len());
    let mut chars = existing.chars().chain(addition.chars()).peekable();

    while let Some(c) = chars.next() {
        if c != '\r' {
            merged.push(c);
            continue;
        }

        match chars.peek() {
            Some('\n') => {}
            Some(_) => {
                let line_start = merged.rfind('\n').map_or(0, |i| i + 1);
                merged.truncate(line_start);
            }
            None => merged.push('\r'),
        }
    }

    merged
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: SectionId,
    pub name: String,
    /// Set for branching sections
    pub parent_id: Option<SectionId>,
    pub cell_ids: Vec<CellId>,
}

impl Section {
    pub fn new(id: SectionId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            parent_id: None,
            cell_ids: Vec::new(),
        }
    }

    pub fn is_branching(&self) -> bool {
        self.parent_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notebook {
    pub name: String,
    sections: BTreeMap<SectionId, Section>,
    /// Regular sections in display order, setup excluded
    section_order: Vec<SectionId>,
    cells: BTreeMap<CellId, Cell>,
    cell_sections: BTreeMap<CellId, SectionId>,
}

impl Default for Notebook {
    fn default() -> Self {
        Self::new()
    }
}

impl Notebook {
    /// Notebook holding only the setup section and its empty code cell
    pub fn new() -> Self {
        let mut setup = Section::new(SectionId::SETUP, SETUP_SECTION_NAME);
        setup.cell_ids.push(CellId::SETUP);

        Self {
            name: DEFAULT_NOTEBOOK_NAME.to_string(),
            sections: BTreeMap::from([(SectionId::SETUP, setup)]),
            section_order: Vec::new(),
            cells: BTreeMap::from([(CellId::SETUP, Cell::new(CellId::SETUP, CellKind::Code))]),
            cell_sections: BTreeMap::from([(CellId::SETUP, SectionId::SETUP)]),
        }
    }

    pub fn setup_section(&self) -> Option<&Section> {
        self.sections.get(&SectionId::SETUP)
    }

    pub fn section(&self, id: SectionId) -> Option<&Section> {
        self.sections.get(&id)
    }

    pub(crate) fn section_mut(&mut self, id: SectionId) -> Option<&mut Section> {
        self.sections.get_mut(&id)
    }

    pub fn cell(&self, id: CellId) -> Option<&Cell> {
        self.cells.get(&id)
    }

    pub(crate) fn cell_mut(&mut self, id: CellId) -> Option<&mut Cell> {
        self.cells.get_mut(&id)
    }

    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.cells.values()
    }

    pub(crate) fn cells_mut(&mut self) -> impl Iterator<Item = &mut Cell> {
        self.cells.values_mut()
    }

    /// Id of the section owning `cell_id`
    pub fn section_of(&self, cell_id: CellId) -> Option<SectionId> {
        self.cell_sections.get(&cell_id).copied()
    }

    pub fn cell_with_section(&self, cell_id: CellId) -> Option<(&Cell, &Section)> {
        let cell = self.cells.get(&cell_id)?;
        let section = self.sections.get(self.cell_sections.get(&cell_id)?)?;
        Some((cell, section))
    }

    /// Regular sections in display order
    pub fn section_ids(&self) -> &[SectionId] {
        &self.section_order
    }

    /// Setup followed by every regular section
    pub fn all_section_ids(&self) -> impl Iterator<Item = SectionId> + '_ {
        std::iter::once(SectionId::SETUP).chain(self.section_order.iter().copied())
    }

    /// Position of a regular section
    pub fn section_index(&self, id: SectionId) -> Option<usize> {
        self.section_order.iter().position(|s| *s == id)
    }

    /// Position of a cell within its section
    pub fn cell_index(&self, cell_id: CellId) -> Option<usize> {
        let section = self.sections.get(self.cell_sections.get(&cell_id)?)?;
        section.cell_ids.iter().position(|c| *c == cell_id)
    }

    /// Branching sections whose parent is `id`
    pub fn child_sections(&self, id: SectionId) -> Vec<SectionId> {
        self.section_order
            .iter()
            .copied()
            .filter(|s| self.sections.get(s).and_then(|s| s.parent_id) == Some(id))
            .collect()
    }

    /// Setup plus every regular section without a parent, in order
    pub fn main_flow_section_ids(&self) -> Vec<SectionId> {
        self.all_section_ids()
            .filter(|id| self.sections.get(id).is_some_and(|s| !s.is_branching()))
            .collect()
    }

    /// Evaluable cells of a section in order
    pub fn evaluable_cell_ids(&self, section_id: SectionId) -> Vec<CellId> {
        self.sections
            .get(&section_id)
            .map(|section| {
                section
                    .cell_ids
                    .iter()
                    .copied()
                    .filter(|id| self.cells.get(id).is_some_and(Cell::is_evaluable))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Insert a regular section at `index` (clamped), returning the index used
    pub(crate) fn insert_section(&mut self, index: usize, section: Section) -> usize {
        let index = index.min(self.section_order.len());
        self.section_order.insert(index, section.id);
        self.sections.insert(section.id, section);
        index
    }

    /// Remove an empty regular section, returning it with its former index
    pub(crate) fn remove_section(&mut self, id: SectionId) -> Option<(Section, usize)> {
        let index = self.section_index(id)?;
        let section = self.sections.remove(&id)?;
        self.section_order.remove(index);
        Some((section, index))
    }

    /// Insert a cell into a section at `index` (clamped), returning the index used
    pub(crate) fn insert_cell(
        &mut self,
        section_id: SectionId,
        index: usize,
        cell: Cell,
    ) -> Option<usize> {
        let section = self.sections.get_mut(&section_id)?;
        let index = index.min(section.cell_ids.len());
        section.cell_ids.insert(index, cell.id);
        self.cell_sections.insert(cell.id, section_id);
        self.cells.insert(cell.id, cell);
        Some(index)
    }

    /// Remove a cell, returning it with its former section and index
    pub(crate) fn remove_cell(&mut self, cell_id: CellId) -> Option<(Cell, SectionId, usize)> {
        let section_id = self.cell_sections.remove(&cell_id)?;
        let section = self.sections.get_mut(&section_id)?;
        let index = section.cell_ids.iter().position(|c| *c == cell_id)?;
        section.cell_ids.remove(index);
        let cell = self.cells.remove(&cell_id)?;
        Some((cell, section_id, index))
    }

    pub(crate) fn move_cell(&mut self, cell_id: CellId, section_id: SectionId, index: usize) {
        if !self.sections.contains_key(&section_id) {
            return;
        }
        if let Some((cell, _, _)) = self.remove_cell(cell_id) {
            self.insert_cell(section_id, index, cell);
        }
    }

    pub(crate) fn move_section(&mut self, id: SectionId, index: usize) {
        if let Some(from) = self.section_index(id) {
            self.section_order.remove(from);
            let index = index.min(self.section_order.len());
            self.section_order.insert(index, id);
        }
    }
}
