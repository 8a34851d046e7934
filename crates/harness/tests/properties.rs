mod common;

use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use fieldgrid_core::{CellValue, EntityId, EntityType, FieldType, RowId};
use fieldgrid_engine::{Focus, GridEvent, Key, MenuTarget};
use fieldgrid_harness::TestGrid;
use fieldgrid_storage::ValueStore;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Click(usize, usize),
    Header(usize),
    Input(String),
    Press(Key),
    Blur,
    RightClick(usize),
    Outside,
    AddRow,
    DeleteRow(usize),
    DuplicateRow(usize),
    UndoLast,
    Flush,
    Refresh,
    Advance(u64),
}

fn arb_key() -> impl Strategy<Value = Key> {
    prop_oneof![
        Just(Key::Enter),
        Just(Key::Tab),
        Just(Key::ShiftTab),
        Just(Key::Escape),
    ]
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..8usize, 0..8usize).prop_map(|(r, c)| Op::Click(r, c)),
        1 => (0..8usize).prop_map(Op::Header),
        3 => "[a-z0-9 ]{0,6}".prop_map(Op::Input),
        3 => arb_key().prop_map(Op::Press),
        1 => Just(Op::Blur),
        1 => (0..8usize).prop_map(Op::RightClick),
        1 => Just(Op::Outside),
        2 => Just(Op::AddRow),
        2 => (0..8usize).prop_map(Op::DeleteRow),
        1 => (0..8usize).prop_map(Op::DuplicateRow),
        1 => Just(Op::UndoLast),
        2 => Just(Op::Flush),
        1 => Just(Op::Refresh),
        1 => (0..8000u64).prop_map(Op::Advance),
    ]
}

fn pick<T: Clone>(items: &[T], index: usize) -> Option<T> {
    if items.is_empty() {
        None
    } else {
        items.get(index % items.len()).cloned()
    }
}

fn run(grid: &mut TestGrid, op: Op) {
    let rows = grid.row_ids();
    let columns = grid.column_ids();
    match op {
        Op::Click(r, c) => {
            if let (Some(row), Some(column)) = (pick(&rows, r), pick(&columns, c)) {
                grid.click(row, &column);
            }
        }
        Op::Header(c) => {
            if let Some(column) = pick(&columns, c) {
                grid.event(GridEvent::HeaderDoubleClick(column));
            }
        }
        Op::Input(text) => {
            grid.type_text(&text);
        }
        Op::Press(key) => {
            grid.press(key);
        }
        Op::Blur => {
            grid.event(GridEvent::Blur);
        }
        Op::RightClick(r) => {
            if let Some(row) = pick(&rows, r) {
                grid.event(GridEvent::RightClick {
                    target: MenuTarget::Row(row),
                    x: 10,
                    y: 10,
                });
            }
        }
        Op::Outside => {
            grid.event(GridEvent::ClickOutside);
        }
        Op::AddRow => {
            let after = grid.reconciler.grid().selected_row().copied();
            let _ = grid.reconciler.add_row(after);
        }
        Op::DeleteRow(r) => {
            if let Some(row) = pick(&rows, r) {
                let _ = grid.delete_row(row);
            }
        }
        Op::DuplicateRow(r) => {
            if let Some(row) = pick(&rows, r) {
                let _ = grid.reconciler.duplicate_row(&row);
            }
        }
        Op::UndoLast => {
            grid.reconciler.undo_last_delete();
        }
        Op::Flush => {
            grid.flush();
        }
        Op::Refresh => grid.reconciler.refresh(),
        Op::Advance(ms) => grid.advance(Duration::from_millis(ms)),
    }
}

fn seeded_grid() -> Result<TestGrid, Box<dyn std::error::Error>> {
    let mut grid = TestGrid::new(EntityType::Shop)?;
    grid.seed_field("cf_note", "Note", FieldType::Text)?;
    grid.seed_row(&[("name", CellValue::from("A"))], &[])?;
    grid.seed_row(&[("name", CellValue::from("B"))], &[("cf_note", CellValue::from("n"))])?;
    grid.load();
    Ok(grid)
}

fn stored_ids(grid: &TestGrid) -> BTreeSet<EntityId> {
    grid.remote
        .with_store(|s| s.list_entities(EntityType::Shop))
        .map(|records| records.into_iter().map(|r| r.id).collect())
        .unwrap_or_default()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn grid_invariants_hold_under_random_interaction(ops in prop::collection::vec(arb_op(), 1..60)) {
        common::init_tracing();
        let mut grid = seeded_grid().map_err(|e| TestCaseError::fail(e.to_string()))?;
        let mut seen_pending: HashSet<RowId> = HashSet::new();
        let mut gone_pending: HashSet<RowId> = HashSet::new();

        for op in ops {
            run(&mut grid, op);
            let state = grid.reconciler.grid();

            prop_assert!(state.has_unique_row_ids());
            if let Focus::Cell { row, column, .. } = state.focus() {
                prop_assert!(state.row(row).is_some());
                prop_assert!(state.column(column).is_some());
            }

            let current: HashSet<RowId> = grid.row_ids().into_iter().collect();
            for id in current.iter().filter(|id| id.is_pending()) {
                prop_assert!(!gone_pending.contains(id), "temp id {} came back", id);
                seen_pending.insert(*id);
            }
            for id in &seen_pending {
                if !current.contains(id) {
                    gone_pending.insert(*id);
                }
            }
        }

        // Let every timer fire and every request land, then resync.
        grid.flush();
        grid.advance(Duration::from_secs(10));
        grid.flush();
        grid.advance(Duration::from_secs(10));
        grid.reconciler.refresh();
        grid.flush();

        prop_assert!(grid.reconciler.is_settled());
        let shown: BTreeSet<EntityId> = grid.row_ids().iter().filter_map(RowId::entity_id).collect();
        prop_assert_eq!(shown.len(), grid.row_ids().len());
        prop_assert_eq!(shown, stored_ids(&grid));
    }
}
