//! Evaluation queue and staleness tests
//!
//! This tests:
//! - Queue ordering per section and per lane
//! - Cancellation cascades
//! - Staleness propagation along chains
//! - Runtime callbacks (stdout, outputs, responses)

mod common;

use common::*;
use quire_editor::{
    Action, CellAttributes, CellId, CellKind, Data, EvaluationMetadata, EvaluationStatus,
    Operation, OperationError, Output, RuntimeHandle, SectionId, Validity,
};

#[test]
fn test_queue_cell_in_new_section_starts_it() {
    let data = Data::new();
    let (data, _) = apply(&data, Operation::InsertSection { index: 0 });
    let section_id = data.notebook().section_ids()[0];
    let (data, _) = apply(
        &data,
        Operation::InsertCell {
            section_id,
            index: 0,
            kind: CellKind::Code,
        },
    );
    let cell_id = data.notebook().section(section_id).unwrap().cell_ids[0];

    let (data, actions) = queue(&data, cell_id);

    assert_eq!(actions, vec![start(cell_id, section_id)]);
    assert_eq!(status(&data, cell_id), EvaluationStatus::Evaluating);
    assert_eq!(
        data.section_info(section_id).unwrap().evaluating_cell_id,
        Some(cell_id)
    );
}

#[test]
fn test_queue_runs_in_chain_order() {
    let Fixture {
        data,
        sections,
        cells,
    } = fixture(&[3]);
    let (s1, [c1, c2, c3]) = (sections[0], [cells[0][0], cells[0][1], cells[0][2]]);

    // Requesting the last cell pulls in its unevaluated ancestors first
    let (data, actions) = queue(&data, c3);
    assert_eq!(actions, vec![start(c1, s1)]);
    assert_eq!(status(&data, c2), EvaluationStatus::Queued);
    assert_eq!(status(&data, c3), EvaluationStatus::Queued);
    assert_eq!(data.section_info(s1).unwrap().evaluation_queue, vec![c2, c3]);

    let (data, actions) = respond(&data, c1);
    assert_eq!(actions, vec![start(c2, s1)]);

    let (data, actions) = respond(&data, c2);
    assert_eq!(actions, vec![start(c3, s1)]);

    let (data, actions) = respond(&data, c3);
    assert!(actions.is_empty());
    for cell in [c1, c2, c3] {
        assert_eq!(validity(&data, cell), Validity::Evaluated);
    }
    assert!(data.section_info(s1).unwrap().is_idle());
}

#[test]
fn test_queue_order_ignores_request_order() {
    let Fixture {
        data,
        sections,
        cells,
    } = fixture(&[3]);
    let (s1, [c1, c2, c3]) = (sections[0], [cells[0][0], cells[0][1], cells[0][2]]);

    let (data, _) = queue(&data, c2);
    let (data, actions) = queue(&data, c3);
    assert!(actions.is_empty());

    // Already queued as a prerequisite
    assert_eq!(
        data.apply(Operation::QueueCellEvaluation { cell_id: c1 }),
        Err(OperationError::AlreadyEvaluating(c1))
    );

    let mut order = vec![c1];
    let mut data = data;
    for cell in [c1, c2] {
        let (next, actions) = respond(&data, cell);
        for action in actions {
            if let Action::StartEvaluation { cell_id, .. } = action {
                order.push(cell_id);
            }
        }
        data = next;
    }

    assert_eq!(order, vec![c1, c2, c3]);
    assert_eq!(data.section_info(s1).unwrap().evaluating_cell_id, Some(c3));
}

#[test]
fn test_queue_skips_blank_and_evaluated_ancestors() {
    let Fixture { data, cells, .. } = fixture(&[3]);
    let (c1, c2, c3) = (cells[0][0], cells[0][1], cells[0][2]);

    let data = evaluate_all(data, &[c1]);
    let data = write_source(data, c2, "   ");

    let (data, actions) = queue(&data, c3);
    assert_eq!(actions.len(), 1);
    assert_eq!(status(&data, c2), EvaluationStatus::Ready);
    assert_eq!(status(&data, c3), EvaluationStatus::Evaluating);
}

#[test]
fn test_cancel_queued_cascades_to_dependents_only() {
    // setup, s1[c1], s2[c2, c4], branch of s1[c3]
    let Fixture {
        data,
        sections,
        cells,
    } = fixture(&[1, 2, 1]);
    let (s1, b) = (sections[0], sections[2]);
    let (c1, c2, c4, c3) = (cells[0][0], cells[1][0], cells[1][1], cells[2][0]);
    let data = apply_ok(
        data,
        Operation::SetSectionParent {
            section_id: b,
            parent_id: Some(s1),
        },
    );

    let (data, actions) = queue(&data, c4);
    assert_eq!(actions, vec![start(c1, s1)]);
    let (data, actions) = queue(&data, c3);
    assert!(actions.is_empty(), "c3 waits for its ancestor c1");

    let (data, actions) = apply(&data, Operation::CancelCellEvaluation { cell_id: c2 });
    assert!(actions.is_empty());
    assert_eq!(status(&data, c1), EvaluationStatus::Evaluating);
    assert_eq!(status(&data, c2), EvaluationStatus::Ready);
    assert_eq!(status(&data, c4), EvaluationStatus::Ready);
    assert_eq!(status(&data, c3), EvaluationStatus::Queued);

    let (data, actions) = respond(&data, c1);
    assert_eq!(actions, vec![start(c3, b)]);
    assert_eq!(validity(&data, c2), Validity::Fresh);
}

#[test]
fn test_cancel_evaluating_stops_section() {
    let Fixture {
        data,
        sections,
        cells,
    } = fixture(&[2]);
    let (s1, c1, c2) = (sections[0], cells[0][0], cells[0][1]);

    let (data, _) = queue(&data, c2);
    let (data, actions) = apply(&data, Operation::CancelCellEvaluation { cell_id: c1 });

    assert_eq!(actions, vec![Action::StopEvaluation { section_id: s1 }]);
    assert_eq!(status(&data, c1), EvaluationStatus::Ready);
    assert_eq!(validity(&data, c1), Validity::Aborted);
    assert_eq!(status(&data, c2), EvaluationStatus::Ready);
    assert!(data.section_info(s1).unwrap().is_idle());
}

#[test]
fn test_cancel_rejections() {
    let Fixture { data, cells, .. } = fixture(&[1]);
    let c1 = cells[0][0];

    assert_eq!(
        data.apply(Operation::CancelCellEvaluation { cell_id: c1 }),
        Err(OperationError::NothingToCancel(c1))
    );
    assert_eq!(
        data.apply(Operation::CancelCellEvaluation {
            cell_id: CellId(999)
        }),
        Err(OperationError::CellNotFound(CellId(999)))
    );
}

#[test]
fn test_queue_rejections() {
    let Fixture {
        data,
        sections,
        cells,
    } = fixture(&[1]);
    let c1 = cells[0][0];
    let (data, _) = apply(
        &data,
        Operation::InsertCell {
            section_id: sections[0],
            index: 1,
            kind: CellKind::Markdown,
        },
    );
    let markdown = data.notebook().section(sections[0]).unwrap().cell_ids[1];

    assert_eq!(
        data.apply(Operation::QueueCellEvaluation { cell_id: markdown }),
        Err(OperationError::NotEvaluable(markdown))
    );

    let (data, _) = queue(&data, c1);
    assert_eq!(
        data.apply(Operation::QueueCellEvaluation { cell_id: c1 }),
        Err(OperationError::AlreadyEvaluating(c1))
    );
}

#[test]
fn test_reevaluation_marks_descendants_stale() {
    let Fixture { data, cells, .. } = fixture(&[3]);
    let (c1, c2, c3) = (cells[0][0], cells[0][1], cells[0][2]);
    let data = evaluate_all(data, &[c1, c2]);

    let (data, _) = queue(&data, c1);

    assert_eq!(validity(&data, c2), Validity::Stale);
    assert_eq!(validity(&data, c3), Validity::Fresh, "never evaluated");
}

#[test]
fn test_edit_marks_descendants_stale() {
    let Fixture { data, cells, .. } = fixture(&[1, 1]);
    let (c1, c2) = (cells[0][0], cells[1][0]);
    let data = evaluate_all(data, &[c1, c2]);

    let data = write_source(data, c1, "x = 2");

    assert_eq!(validity(&data, c1), Validity::Evaluated);
    assert!(data.cell_info(c1).unwrap().is_source_changed());
    assert_eq!(validity(&data, c2), Validity::Stale);
}

#[test]
fn test_delete_marks_descendants_stale_and_forgets() {
    let Fixture {
        data,
        sections,
        cells,
    } = fixture(&[2]);
    let (s1, c1, c2) = (sections[0], cells[0][0], cells[0][1]);
    let data = evaluate_all(data, &[c1, c2]);

    let (data, actions) = apply(&data, Operation::DeleteCell { cell_id: c1 });

    assert_eq!(
        actions,
        vec![Action::ForgetEvaluation {
            cell_id: c1,
            section_id: s1
        }]
    );
    assert_eq!(validity(&data, c2), Validity::Stale);
}

#[test]
fn test_delete_evaluating_cell_stops_and_dequeues() {
    let Fixture {
        data,
        sections,
        cells,
    } = fixture(&[2]);
    let (s1, c1, c2) = (sections[0], cells[0][0], cells[0][1]);

    let (data, _) = queue(&data, c2);
    let (data, actions) = apply(&data, Operation::DeleteCell { cell_id: c1 });

    assert_eq!(
        actions,
        vec![
            Action::StopEvaluation { section_id: s1 },
            Action::ForgetEvaluation {
                cell_id: c1,
                section_id: s1
            },
        ]
    );
    assert_eq!(status(&data, c2), EvaluationStatus::Ready);
    assert!(data.section_info(s1).unwrap().is_idle());
}

#[test]
fn test_branches_evaluate_concurrently() {
    let Fixture {
        data,
        sections,
        cells,
    } = fixture(&[1, 1, 1]);
    let (s1, s2, b) = (sections[0], sections[1], sections[2]);
    let (c1, c2, c3) = (cells[0][0], cells[1][0], cells[2][0]);
    let data = apply_ok(
        data,
        Operation::SetSectionParent {
            section_id: b,
            parent_id: Some(s1),
        },
    );
    let data = evaluate_all(data, &[c1]);

    let (data, actions) = queue(&data, c2);
    assert_eq!(actions, vec![start(c2, s2)]);

    let (data, actions) = queue(&data, c3);
    assert_eq!(actions, vec![start(c3, b)]);
    assert_eq!(status(&data, c2), EvaluationStatus::Evaluating);
    assert_eq!(status(&data, c3), EvaluationStatus::Evaluating);
}

#[test]
fn test_main_flow_is_one_lane() {
    let Fixture {
        data,
        sections,
        cells,
    } = fixture(&[1, 1]);
    let (s1, s2) = (sections[0], sections[1]);
    let (c1, c2) = (cells[0][0], cells[1][0]);
    let data = evaluate_all(data, &[c1, c2]);

    let (data, actions) = queue(&data, c1);
    assert_eq!(actions, vec![start(c1, s1)]);

    // c2 is already evaluated, but the lane is busy
    let (data, actions) = queue(&data, c2);
    assert!(actions.is_empty());
    assert_eq!(status(&data, c2), EvaluationStatus::Queued);

    let (_, actions) = respond(&data, c1);
    assert_eq!(actions, vec![start(c2, s2)]);
}

#[test]
fn test_errored_response_drops_dependents() {
    let Fixture { data, cells, .. } = fixture(&[3]);
    let (c1, c2, c3) = (cells[0][0], cells[0][1], cells[0][2]);

    let (data, _) = queue(&data, c3);
    let (data, actions) = apply(
        &data,
        Operation::AddCellEvaluationResponse {
            cell_id: c1,
            output: Output::Error {
                message: "boom".to_string(),
            },
            metadata: EvaluationMetadata {
                evaluation_time_ms: Some(3),
                errored: true,
            },
        },
    );

    assert!(actions.is_empty());
    assert_eq!(status(&data, c2), EvaluationStatus::Ready);
    assert_eq!(status(&data, c3), EvaluationStatus::Ready);
    assert_eq!(validity(&data, c1), Validity::Evaluated);
}

#[test]
fn test_stale_cells_reevaluate_automatically() {
    let Fixture {
        data,
        sections,
        cells,
    } = fixture(&[2]);
    let (s1, c1, c2) = (sections[0], cells[0][0], cells[0][1]);
    let data = evaluate_all(data, &[c1, c2]);
    let data = apply_ok(
        data,
        Operation::SetCellAttributes {
            cell_id: c2,
            attributes: CellAttributes {
                reevaluate_automatically: true,
                ..Default::default()
            },
        },
    );

    let (data, _) = queue(&data, c1);
    assert_eq!(validity(&data, c2), Validity::Stale);

    let (_, actions) = respond(&data, c1);
    assert_eq!(actions, vec![start(c2, s1)]);
}

#[test]
fn test_outputs_and_metadata() {
    let Fixture { data, cells, .. } = fixture(&[1]);
    let c1 = cells[0][0];
    let data = evaluate_all(data, &[c1]);

    // Re-evaluation starts from a clean slate
    let (data, _) = queue(&data, c1);
    assert!(data.notebook().cell(c1).unwrap().outputs.is_empty());

    let data = apply_ok(
        data,
        Operation::AddCellEvaluationStdout {
            cell_id: c1,
            text: "loading 10%".to_string(),
        },
    );
    let data = apply_ok(
        data,
        Operation::AddCellEvaluationStdout {
            cell_id: c1,
            text: "\rloading 100%\n".to_string(),
        },
    );
    let data = apply_ok(
        data,
        Operation::AddCellEvaluationOutput {
            cell_id: c1,
            output: Output::Markdown {
                text: "# done".to_string(),
            },
        },
    );
    let data = apply_ok(
        data,
        Operation::AddCellEvaluationResponse {
            cell_id: c1,
            output: Output::Text {
                text: "42".to_string(),
            },
            metadata: EvaluationMetadata {
                evaluation_time_ms: Some(12),
                errored: false,
            },
        },
    );

    assert_eq!(
        data.notebook().cell(c1).unwrap().outputs,
        vec![
            Output::Stdout {
                text: "loading 100%\n".to_string()
            },
            Output::Markdown {
                text: "# done".to_string()
            },
            Output::Text {
                text: "42".to_string()
            },
        ]
    );
    let eval = data.cell_info(c1).unwrap().eval.clone().unwrap();
    assert_eq!(eval.evaluation_count, 2);
    assert_eq!(eval.evaluation_time_ms, Some(12));
    assert!(!data.cell_info(c1).unwrap().is_source_changed());

    assert_eq!(
        data.apply(Operation::AddCellEvaluationStdout {
            cell_id: c1,
            text: "late".to_string()
        }),
        Err(OperationError::NotEvaluating(c1))
    );
}

#[test]
fn test_new_runtime_resets_evaluation() {
    let Fixture {
        data,
        sections,
        cells,
    } = fixture(&[2]);
    let (s1, c1, c2) = (sections[0], cells[0][0], cells[0][1]);
    let data = evaluate_all(data, &[c1]);
    let (data, _) = queue(&data, c2);
    assert_eq!(status(&data, c2), EvaluationStatus::Evaluating);

    let (data, actions) = apply(
        &data,
        Operation::SetRuntime {
            runtime: Some(RuntimeHandle {
                name: "standalone".to_string(),
                connected: true,
            }),
        },
    );

    assert!(actions.is_empty());
    assert!(data.is_runtime_connected());
    for cell in [CellId::SETUP, c1, c2] {
        assert_eq!(status(&data, cell), EvaluationStatus::Ready);
        assert_eq!(validity(&data, cell), Validity::Fresh);
    }
    assert!(data.section_info(s1).unwrap().is_idle());
    assert!(data.section_info(SectionId::SETUP).unwrap().is_idle());
}
