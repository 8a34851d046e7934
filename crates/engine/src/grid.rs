//! Grid state engine: rows, columns and the single editing cursor.
//!
//! Every transition is synchronous and runs to completion. Commits are not
//! sent anywhere from here; they come back to the caller as [`GridEffect`]s.

use std::collections::{BTreeMap, HashSet};

use fieldgrid_core::{CellValue, FieldType, RowId};

use crate::columns::{Align, GridColumn};
use crate::error::EngineError;
use crate::menu::{ContextMenu, MenuTarget};
use crate::render::StrategyTable;

static NULL: CellValue = CellValue::Null;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub id: RowId,
    pub values: BTreeMap<String, CellValue>,
}

impl Row {
    pub fn new(id: RowId) -> Self {
        Self {
            id,
            values: BTreeMap::new(),
        }
    }

    pub fn with_values(id: RowId, values: BTreeMap<String, CellValue>) -> Self {
        Self { id, values }
    }

    pub fn get(&self, column: &str) -> &CellValue {
        self.values.get(column).unwrap_or(&NULL)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Enter,
    Tab,
    ShiftTab,
    Escape,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GridEvent {
    CellClick { row: RowId, column: String },
    HeaderDoubleClick(String),
    Input(String),
    Key(Key),
    Blur,
    RightClick { target: MenuTarget, x: i32, y: i32 },
    ClickOutside,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Focus {
    Idle,
    Cell {
        row: RowId,
        column: String,
        draft: String,
        /// Display text the editor opened with.
        original: String,
        error: Option<String>,
    },
    Header {
        column: String,
        draft: String,
        original: String,
    },
    Menu(ContextMenu),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GridEffect {
    CellCommitted {
        row: RowId,
        column: String,
        previous: CellValue,
        value: CellValue,
    },
    HeaderCommitted {
        column: String,
        previous: String,
        name: String,
    },
    /// Live label change while the header editor is open. Not persisted.
    HeaderRenamed { column: String, name: String },
    Invalid {
        row: Option<RowId>,
        column: String,
        reason: String,
    },
}

/// Everything needed to put a deleted column back.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSnapshot {
    pub index: usize,
    pub column: GridColumn,
    pub values: Vec<(RowId, CellValue)>,
}

/// Current visible rows and columns, handed to exporters.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportView {
    pub columns: Vec<GridColumn>,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ResizeDrag {
    column: String,
    start_x: i32,
    start_width: u32,
}

enum Commit {
    Done(Option<GridEffect>),
    Rejected(GridEffect),
}

#[derive(Debug, Clone)]
pub struct GridState {
    rows: Vec<Row>,
    columns: Vec<GridColumn>,
    focus: Focus,
    selected_row: Option<RowId>,
    resize: Option<ResizeDrag>,
    min_column_width: u32,
}

impl GridState {
    pub fn new(columns: Vec<GridColumn>, min_column_width: u32) -> Self {
        Self {
            rows: Vec::new(),
            columns,
            focus: Focus::Idle,
            selected_row: None,
            resize: None,
            min_column_width,
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn columns(&self) -> &[GridColumn] {
        &self.columns
    }

    pub fn row(&self, id: &RowId) -> Option<&Row> {
        self.rows.iter().find(|r| r.id == *id)
    }

    pub fn row_index(&self, id: &RowId) -> Option<usize> {
        self.rows.iter().position(|r| r.id == *id)
    }

    pub fn column(&self, id: &str) -> Option<&GridColumn> {
        self.columns.iter().find(|c| c.id == id)
    }

    fn column_index(&self, id: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.id == id)
    }

    pub fn focus(&self) -> &Focus {
        &self.focus
    }

    pub fn editing_cell(&self) -> Option<(&RowId, &str)> {
        match &self.focus {
            Focus::Cell { row, column, .. } => Some((row, column)),
            _ => None,
        }
    }

    pub fn draft(&self) -> Option<&str> {
        match &self.focus {
            Focus::Cell { draft, .. } | Focus::Header { draft, .. } => Some(draft),
            _ => None,
        }
    }

    pub fn editing_header(&self) -> Option<&str> {
        match &self.focus {
            Focus::Header { column, .. } => Some(column),
            _ => None,
        }
    }

    pub fn context_menu(&self) -> Option<&ContextMenu> {
        match &self.focus {
            Focus::Menu(menu) => Some(menu),
            _ => None,
        }
    }

    pub fn selected_row(&self) -> Option<&RowId> {
        self.selected_row.as_ref()
    }

    pub fn has_unique_row_ids(&self) -> bool {
        let mut seen = HashSet::new();
        self.rows.iter().all(|r| seen.insert(r.id))
    }

    pub fn export_view(&self) -> ExportView {
        ExportView {
            columns: self.columns.clone(),
            rows: self.rows.clone(),
        }
    }

    // ========================================================================
    // Event dispatch
    // ========================================================================

    pub fn dispatch(&mut self, event: GridEvent, strategies: &StrategyTable) -> Vec<GridEffect> {
        let mut effects = Vec::new();
        match event {
            GridEvent::CellClick { row, column } => {
                if let Some((editing_row, editing_column)) = self.editing_cell()
                    && *editing_row == row
                    && editing_column == column
                {
                    return effects;
                }
                self.close(strategies, &mut effects);
                self.selected_row = self.row(&row).map(|r| r.id);
                self.start_cell_edit(row, &column);
            }
            GridEvent::HeaderDoubleClick(column) => {
                self.close(strategies, &mut effects);
                if let Some(col) = self.column(&column) {
                    let name = col.name.clone();
                    tracing::trace!(column = %column, "editing header");
                    self.focus = Focus::Header {
                        column,
                        draft: name.clone(),
                        original: name,
                    };
                }
            }
            GridEvent::Input(text) => match &mut self.focus {
                Focus::Cell { draft, error, .. } => {
                    *draft = text;
                    *error = None;
                }
                Focus::Header { column, draft, .. } => {
                    // Header renames show up immediately; persistence waits for commit.
                    let id = column.clone();
                    *draft = text.clone();
                    if let Some(col) = self.columns.iter_mut().find(|c| c.id == id) {
                        col.name = text.clone();
                    }
                    effects.push(GridEffect::HeaderRenamed {
                        column: id,
                        name: text,
                    });
                }
                _ => {}
            },
            GridEvent::Key(key) => self.on_key(key, strategies, &mut effects),
            GridEvent::Blur => {
                if matches!(self.focus, Focus::Cell { .. } | Focus::Header { .. }) {
                    self.close(strategies, &mut effects);
                }
            }
            GridEvent::RightClick { target, x, y } => {
                let valid = target.row().is_none_or(|r| self.row(r).is_some())
                    && target.column().is_none_or(|c| self.column(c).is_some());
                self.close(strategies, &mut effects);
                if valid {
                    if let Some(row) = target.row() {
                        self.selected_row = Some(*row);
                    }
                    self.focus = Focus::Menu(ContextMenu { target, x, y });
                }
            }
            GridEvent::ClickOutside => self.close(strategies, &mut effects),
        }
        effects
    }

    fn on_key(&mut self, key: Key, strategies: &StrategyTable, effects: &mut Vec<GridEffect>) {
        if key == Key::Escape {
            self.cancel();
            return;
        }
        let (row, column) = match &self.focus {
            Focus::Cell { row, column, .. } => (*row, column.clone()),
            Focus::Header { .. } => {
                effects.extend(self.commit_header());
                self.focus = Focus::Idle;
                return;
            }
            Focus::Idle | Focus::Menu(_) => return,
        };
        match self.commit_cell(strategies) {
            Commit::Rejected(effect) => {
                // Stay on the cell so the inline error can be fixed.
                if let (GridEffect::Invalid { reason, .. }, Focus::Cell { error, .. }) =
                    (&effect, &mut self.focus)
                {
                    *error = Some(reason.clone());
                }
                effects.push(effect);
                return;
            }
            Commit::Done(effect) => effects.extend(effect),
        }
        match key {
            Key::Enter => self.move_down(row, &column),
            Key::Tab => self.move_across(row, &column, true),
            Key::ShiftTab => self.move_across(row, &column, false),
            Key::Escape => {}
        }
    }

    /// Drops the open edit or menu without committing. A header edit puts
    /// the original label back.
    fn cancel(&mut self) {
        if let Focus::Header { column, original, .. } = &self.focus {
            let (id, original) = (column.clone(), original.clone());
            if let Some(col) = self.columns.iter_mut().find(|c| c.id == id) {
                col.name = original;
            }
        }
        self.focus = Focus::Idle;
    }

    /// Leaves whatever is open: cell and header edits are committed (an
    /// invalid cell draft is dropped), a menu is closed.
    fn close(&mut self, strategies: &StrategyTable, effects: &mut Vec<GridEffect>) {
        match self.focus {
            Focus::Idle | Focus::Menu(_) => {}
            Focus::Cell { .. } => match self.commit_cell(strategies) {
                Commit::Done(effect) => effects.extend(effect),
                Commit::Rejected(effect) => effects.push(effect),
            },
            Focus::Header { .. } => effects.extend(self.commit_header()),
        }
        self.focus = Focus::Idle;
    }

    fn start_cell_edit(&mut self, row: RowId, column: &str) {
        let Some(col) = self.column(column) else {
            return;
        };
        if !col.editable {
            return;
        }
        let Some(current) = self.row(&row).map(|r| r.get(column).display()) else {
            return;
        };
        tracing::trace!(row = %row, column = %column, "editing cell");
        self.focus = Focus::Cell {
            row,
            column: column.to_string(),
            draft: current.clone(),
            original: current,
            error: None,
        };
    }

    fn move_down(&mut self, row: RowId, column: &str) {
        self.focus = Focus::Idle;
        let next = self
            .row_index(&row)
            .and_then(|i| self.rows.get(i + 1))
            .map(|r| r.id);
        if let Some(next) = next {
            self.selected_row = Some(next);
            self.start_cell_edit(next, column);
        }
    }

    /// Moves to the next editable column in the same row, never wrapping.
    fn move_across(&mut self, row: RowId, column: &str, forward: bool) {
        self.focus = Focus::Idle;
        let Some(index) = self.column_index(column) else {
            return;
        };
        let target = if forward {
            self.columns[index + 1..].iter().find(|c| c.editable)
        } else {
            self.columns[..index].iter().rev().find(|c| c.editable)
        }
        .map(|c| c.id.clone());
        if let Some(target) = target {
            self.start_cell_edit(row, &target);
        }
    }

    fn commit_cell(&mut self, strategies: &StrategyTable) -> Commit {
        let Focus::Cell {
            row,
            column,
            draft,
            original,
            ..
        } = &self.focus
        else {
            return Commit::Done(None);
        };
        // Untouched text is never re-parsed, so a stored value the parser
        // would reshape or reject leaves the cell as it was.
        if draft == original {
            return Commit::Done(None);
        }
        let (row_id, column_id) = (*row, column.clone());

        // The row or column may have vanished under a refresh; drop the edit.
        let Some(col) = self.column(&column_id) else {
            tracing::debug!(row = %row_id, column = %column_id, "column disappeared while editing");
            return Commit::Done(None);
        };
        let value = match strategies.parse(col, draft) {
            Ok(value) => value,
            Err(e) => {
                return Commit::Rejected(GridEffect::Invalid {
                    row: Some(row_id),
                    column: column_id,
                    reason: e.to_string(),
                });
            }
        };
        let Some(target) = self.rows.iter_mut().find(|r| r.id == row_id) else {
            return Commit::Done(None);
        };
        let previous = target.get(&column_id).clone();
        if previous == value {
            return Commit::Done(None);
        }
        target.values.insert(column_id.clone(), value.clone());
        Commit::Done(Some(GridEffect::CellCommitted {
            row: row_id,
            column: column_id,
            previous,
            value,
        }))
    }

    fn commit_header(&mut self) -> Option<GridEffect> {
        let Focus::Header {
            column,
            draft,
            original,
        } = &self.focus
        else {
            return None;
        };
        let (id, name, original) = (column.clone(), draft.trim().to_string(), original.clone());
        let col = self.columns.iter_mut().find(|c| c.id == id)?;
        if name.is_empty() {
            col.name = original;
            return Some(GridEffect::Invalid {
                row: None,
                column: id,
                reason: "column name cannot be empty".into(),
            });
        }
        col.name = name.clone();
        (name != original).then_some(GridEffect::HeaderCommitted {
            column: id,
            previous: original,
            name,
        })
    }

    // ========================================================================
    // Row operations
    // ========================================================================

    /// Inserts a row after `after`, or at the end.
    pub fn insert_row(&mut self, row: Row, after: Option<&RowId>) -> Result<usize, EngineError> {
        if self.row(&row.id).is_some() {
            return Err(EngineError::DuplicateRow(row.id.to_string()));
        }
        let index = after
            .and_then(|id| self.row_index(id))
            .map_or(self.rows.len(), |i| i + 1);
        self.rows.insert(index, row);
        Ok(index)
    }

    /// Copies a row's editable values into a new row placed right after it.
    pub fn duplicate_row(&mut self, source: &RowId, new_id: RowId) -> Result<usize, EngineError> {
        let original = self
            .row(source)
            .ok_or_else(|| EngineError::RowNotFound(source.to_string()))?;
        let values = original
            .values
            .iter()
            .filter(|(key, _)| self.column(key).is_none_or(|c| c.editable))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        self.insert_row(Row::with_values(new_id, values), Some(source))
    }

    /// Removes a row and returns its position and contents. The cursor,
    /// menu and selection let go of it.
    pub fn remove_row(&mut self, id: &RowId) -> Option<(usize, Row)> {
        let index = self.row_index(id)?;
        let row = self.rows.remove(index);
        let touches = match &self.focus {
            Focus::Cell { row, .. } => row == id,
            Focus::Menu(menu) => menu.target.row() == Some(id),
            _ => false,
        };
        if touches {
            self.focus = Focus::Idle;
        }
        if self.selected_row.as_ref() == Some(id) {
            self.selected_row = None;
        }
        Some((index, row))
    }

    /// Puts a removed row back at its old position, clamped to the end.
    pub fn restore_row(&mut self, index: usize, row: Row) -> bool {
        if self.row(&row.id).is_some() {
            return false;
        }
        let index = index.min(self.rows.len());
        self.rows.insert(index, row);
        true
    }

    /// Puts a removed row back next to its nearest neighbour from `layout`
    /// that is still shown: after the closest one above it, else before the
    /// closest one below. Falls back to `index` when the row is not in the
    /// layout or none of its neighbours are left.
    pub fn restore_row_in(&mut self, layout: &[RowId], index: usize, row: Row) -> bool {
        let index = match layout.iter().position(|id| *id == row.id) {
            Some(pos) => layout[..pos]
                .iter()
                .rev()
                .find_map(|id| self.row_index(id))
                .map(|above| above + 1)
                .or_else(|| layout[pos + 1..].iter().find_map(|id| self.row_index(id)))
                .unwrap_or(index),
            None => index,
        };
        self.restore_row(index, row)
    }

    /// Swaps a row's identity in place, keeping position, cursor and selection.
    pub fn replace_row_id(&mut self, old: &RowId, new: RowId) -> bool {
        if self.row(&new).is_some() {
            return false;
        }
        let Some(row) = self.rows.iter_mut().find(|r| r.id == *old) else {
            return false;
        };
        row.id = new;
        match &mut self.focus {
            Focus::Cell { row, .. } if *row == *old => *row = new,
            Focus::Menu(menu) => match &mut menu.target {
                MenuTarget::Row(row) | MenuTarget::Cell { row, .. } if *row == *old => *row = new,
                _ => {}
            },
            _ => {}
        }
        if self.selected_row.as_ref() == Some(old) {
            self.selected_row = Some(new);
        }
        true
    }

    pub fn set_cell(&mut self, row: &RowId, column: &str, value: CellValue) -> bool {
        match self.rows.iter_mut().find(|r| r.id == *row) {
            Some(target) => {
                target.values.insert(column.to_string(), value);
                true
            }
            None => false,
        }
    }

    pub fn row_mut(&mut self, id: &RowId) -> Option<&mut Row> {
        self.rows.iter_mut().find(|r| r.id == *id)
    }

    /// Replaces the row set wholesale. The cursor is dropped if its row is gone.
    pub fn replace_rows(&mut self, rows: Vec<Row>) {
        self.rows = rows;
        self.revalidate();
    }

    // ========================================================================
    // Column operations
    // ========================================================================

    pub fn add_column(&mut self, column: GridColumn) -> Result<(), EngineError> {
        if self.column(&column.id).is_some() {
            return Err(EngineError::Validation {
                column: column.id.clone(),
                reason: "column already exists".into(),
            });
        }
        self.columns.push(column);
        Ok(())
    }

    /// Removes a column and its attribute from every row.
    pub fn remove_column(&mut self, id: &str) -> Option<ColumnSnapshot> {
        let index = self.column_index(id)?;
        let column = self.columns.remove(index);
        let values = self
            .rows
            .iter_mut()
            .filter_map(|row| row.values.remove(id).map(|v| (row.id, v)))
            .collect();
        self.revalidate();
        Some(ColumnSnapshot {
            index,
            column,
            values,
        })
    }

    pub fn restore_column(&mut self, snapshot: ColumnSnapshot) {
        if self.column(&snapshot.column.id).is_some() {
            return;
        }
        let index = snapshot.index.min(self.columns.len());
        let id = snapshot.column.id.clone();
        self.columns.insert(index, snapshot.column);
        for (row, value) in snapshot.values {
            if let Some(target) = self.rows.iter_mut().find(|r| r.id == row) {
                target.values.entry(id.clone()).or_insert(value);
            }
        }
    }

    pub fn rename_column(&mut self, id: &str, name: &str) -> Result<String, EngineError> {
        let column = self
            .columns
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| EngineError::ColumnNotFound(id.to_string()))?;
        Ok(std::mem::replace(&mut column.name, name.to_string()))
    }

    pub fn retype_column(&mut self, id: &str, column_type: FieldType) -> Result<FieldType, EngineError> {
        let column = self
            .columns
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| EngineError::ColumnNotFound(id.to_string()))?;
        if column.is_system {
            return Err(EngineError::SystemColumn(id.to_string()));
        }
        let previous = std::mem::replace(&mut column.column_type, column_type);
        column.align = Align::for_type(column_type);
        Ok(previous)
    }

    pub fn column_mut(&mut self, id: &str) -> Option<&mut GridColumn> {
        self.columns.iter_mut().find(|c| c.id == id)
    }

    /// Sets a width directly, bounded below by the minimum column width.
    pub fn resize_column(&mut self, id: &str, width: u32) -> Result<u32, EngineError> {
        let min = self.min_column_width;
        let column = self
            .columns
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| EngineError::ColumnNotFound(id.to_string()))?;
        column.width = width.max(min);
        Ok(column.width)
    }

    pub fn begin_resize(&mut self, id: &str, x: i32) -> bool {
        let Some(column) = self.column(id) else {
            return false;
        };
        self.resize = Some(ResizeDrag {
            column: id.to_string(),
            start_x: x,
            start_width: column.width,
        });
        true
    }

    /// Applies pointer movement to the column being dragged.
    pub fn drag_resize(&mut self, x: i32) -> Option<u32> {
        let drag = self.resize.clone()?;
        let width = (i64::from(drag.start_width) + i64::from(x) - i64::from(drag.start_x))
            .clamp(0, i64::from(u32::MAX)) as u32;
        self.resize_column(&drag.column, width).ok()
    }

    pub fn end_resize(&mut self) -> Option<(String, u32)> {
        let drag = self.resize.take()?;
        let width = self.column(&drag.column)?.width;
        Some((drag.column, width))
    }

    /// Replaces the column list (schema refresh). A cursor, menu or drag that
    /// points at a vanished column is dropped.
    pub fn replace_columns(&mut self, columns: Vec<GridColumn>) {
        if let Focus::Header { column, draft, .. } = &self.focus
            && let Some(next) = columns.iter().find(|c| c.id == *column)
        {
            // Keep an in-progress header edit visible over the fresh label.
            let (draft, id) = (draft.clone(), next.id.clone());
            self.columns = columns;
            if let Some(col) = self.columns.iter_mut().find(|c| c.id == id) {
                col.name = draft;
            }
        } else {
            self.columns = columns;
        }
        if let Some(drag) = &self.resize
            && self.column(&drag.column).is_none()
        {
            self.resize = None;
        }
        self.revalidate();
    }

    fn revalidate(&mut self) {
        let keep = match &self.focus {
            Focus::Idle => true,
            Focus::Cell { row, column, .. } => {
                self.row(row).is_some() && self.column(column).is_some()
            }
            Focus::Header { column, .. } => self.column(column).is_some(),
            Focus::Menu(menu) => {
                menu.target.row().is_none_or(|r| self.row(r).is_some())
                    && menu.target.column().is_none_or(|c| self.column(c).is_some())
            }
        };
        if !keep {
            tracing::trace!("cursor target vanished, returning to idle");
            self.focus = Focus::Idle;
        }
        if let Some(selected) = self.selected_row
            && self.row(&selected).is_none()
        {
            self.selected_row = None;
        }
    }

    pub fn close_menu(&mut self) {
        if matches!(self.focus, Focus::Menu(_)) {
            self.focus = Focus::Idle;
        }
    }
}
