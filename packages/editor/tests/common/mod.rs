//! Shared fixtures for reducer tests

#![allow(dead_code)]

use quire_editor::{
    Action, CellId, CellKind, ClientId, Data, Delta, EvaluationMetadata, EvaluationStatus,
    Operation, Output, SectionId, Validity,
};

/// Apply an operation that is expected to succeed
pub fn apply(data: &Data, operation: Operation) -> (Data, Vec<Action>) {
    let name = operation.name();
    data.apply(operation)
        .unwrap_or_else(|error| panic!("{name} rejected: {error}"))
}

pub fn apply_ok(data: Data, operation: Operation) -> Data {
    apply(&data, operation).0
}

/// Replace a cell's source through a temporary client
pub fn write_source(data: Data, cell_id: CellId, text: &str) -> Data {
    let client_id = ClientId::from("fixture");
    let info = data.cell_info(cell_id).expect("cell exists");
    let revision = info.revision;
    let len = data.source(cell_id).unwrap_or_default().chars().count();

    let data = apply_ok(
        data,
        Operation::ClientJoin {
            client_id: client_id.clone(),
        },
    );
    let data = apply_ok(
        data,
        Operation::ApplyCellDelta {
            client_id: client_id.clone(),
            cell_id,
            delta: Delta::new().delete(len).insert(text),
            revision,
        },
    );
    apply_ok(data, Operation::ClientLeave { client_id })
}

pub struct Fixture {
    pub data: Data,
    pub sections: Vec<SectionId>,
    /// Code cells per section, each with a non-blank source
    pub cells: Vec<Vec<CellId>>,
}

/// Main-flow sections holding the given number of code cells each
pub fn fixture(layout: &[usize]) -> Fixture {
    let mut data = Data::new();
    let mut sections = Vec::new();
    let mut cells = Vec::new();

    for (index, count) in layout.iter().enumerate() {
        data = apply_ok(data, Operation::InsertSection { index });
        let section_id = *data.notebook().section_ids().last().expect("section inserted");
        sections.push(section_id);

        let mut section_cells = Vec::new();
        for position in 0..*count {
            data = apply_ok(
                data,
                Operation::InsertCell {
                    section_id,
                    index: position,
                    kind: CellKind::Code,
                },
            );
            let cell_id = *data
                .notebook()
                .section(section_id)
                .and_then(|s| s.cell_ids.last())
                .expect("cell inserted");
            data = write_source(data, cell_id, &format!("x{index}_{position} = {position}"));
            section_cells.push(cell_id);
        }
        cells.push(section_cells);
    }

    Fixture {
        data,
        sections,
        cells,
    }
}

pub fn queue(data: &Data, cell_id: CellId) -> (Data, Vec<Action>) {
    apply(data, Operation::QueueCellEvaluation { cell_id })
}

pub fn respond(data: &Data, cell_id: CellId) -> (Data, Vec<Action>) {
    apply(
        data,
        Operation::AddCellEvaluationResponse {
            cell_id,
            output: Output::Text {
                text: ":ok".to_string(),
            },
            metadata: EvaluationMetadata::default(),
        },
    )
}

pub fn start(cell_id: CellId, section_id: SectionId) -> Action {
    Action::StartEvaluation {
        cell_id,
        section_id,
    }
}

pub fn status(data: &Data, cell_id: CellId) -> EvaluationStatus {
    data.cell_info(cell_id)
        .and_then(|i| i.evaluation_status())
        .expect("evaluable cell")
}

pub fn validity(data: &Data, cell_id: CellId) -> Validity {
    data.cell_info(cell_id)
        .and_then(|i| i.validity())
        .expect("evaluable cell")
}

/// Queue and respond to each cell in turn
pub fn evaluate_all(mut data: Data, cell_ids: &[CellId]) -> Data {
    for cell_id in cell_ids {
        data = queue(&data, *cell_id).0;
        data = respond(&data, *cell_id).0;
    }
    data
}
