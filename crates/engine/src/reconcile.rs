//! Mutation reconciler.
//!
//! Sits between the grid and the remote stores. Grid effects become
//! [`Request`]s in an outbox; whoever drives the reconciler executes them
//! and hands each outcome back through [`Reconciler::apply`]. Every
//! continuation re-reads the grid before touching it, since anything may
//! have happened while the request was out.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use fieldgrid_core::field_def::validate_custom_field_name;
use fieldgrid_core::{
    CellValue, DefinitionId, EntityId, EntityRecord, EntityType, FieldDefinition,
    FieldDefinitionPatch, FieldMap, FieldType, NewFieldDefinition, RowId, TempId,
};

use crate::columns::{
    GridColumn, SystemColumn, build_columns, carry_over_widths, next_display_order, system_columns,
};
use crate::config::GridConfig;
use crate::error::{EngineError, RemoteError};
use crate::grid::{ColumnSnapshot, ExportView, GridEffect, GridEvent, GridState, Row};
use crate::menu::{MenuAction, MenuTarget, ToolbarAction, menu_items};
use crate::overlay::{RefreshMerge, Ticket, Tracking};
use crate::render::{CellDisplay, EditorKind, StrategyTable};
use crate::undo::UndoManager;

// ============================================================================
// Requests and responses
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub ticket: Ticket,
    pub entity_type: EntityType,
    pub kind: RequestKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestKind {
    FetchFieldDefinitions,
    CreateFieldDefinition(NewFieldDefinition),
    UpdateFieldDefinition {
        id: DefinitionId,
        patch: FieldDefinitionPatch,
    },
    DeleteFieldDefinition(DefinitionId),
    FetchRows,
    CreateEntity {
        standard: FieldMap,
        custom: FieldMap,
    },
    UpdateEntity {
        id: EntityId,
        standard: Option<FieldMap>,
        custom: Option<FieldMap>,
    },
    UpsertFieldValues {
        id: EntityId,
        values: FieldMap,
    },
    DeleteEntity(EntityId),
}

impl RequestKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::FetchFieldDefinitions => "fetch_field_definitions",
            Self::CreateFieldDefinition(_) => "create_field_definition",
            Self::UpdateFieldDefinition { .. } => "update_field_definition",
            Self::DeleteFieldDefinition(_) => "delete_field_definition",
            Self::FetchRows => "fetch_rows",
            Self::CreateEntity { .. } => "create_entity",
            Self::UpdateEntity { .. } => "update_entity",
            Self::UpsertFieldValues { .. } => "upsert_field_values",
            Self::DeleteEntity(_) => "delete_entity",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    FieldDefinitions(Vec<FieldDefinition>),
    FieldDefinition(FieldDefinition),
    Rows(Vec<EntityRecord>),
    Entity(EntityRecord),
    Done,
}

fn unexpected(response: &Response) -> RemoteError {
    RemoteError::Transient(format!("unexpected response: {response:?}"))
}

impl Response {
    fn into_definitions(self) -> Result<Vec<FieldDefinition>, RemoteError> {
        match self {
            Self::FieldDefinitions(defs) => Ok(defs),
            other => Err(unexpected(&other)),
        }
    }

    fn into_definition(self) -> Result<FieldDefinition, RemoteError> {
        match self {
            Self::FieldDefinition(def) => Ok(def),
            other => Err(unexpected(&other)),
        }
    }

    fn into_rows(self) -> Result<Vec<EntityRecord>, RemoteError> {
        match self {
            Self::Rows(rows) => Ok(rows),
            other => Err(unexpected(&other)),
        }
    }

    fn into_entity(self) -> Result<EntityRecord, RemoteError> {
        match self {
            Self::Entity(record) => Ok(record),
            other => Err(unexpected(&other)),
        }
    }
}

/// Something the user should be told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Rejected input, shown inline. Nothing was applied.
    Invalid {
        row: Option<RowId>,
        column: Option<String>,
        reason: String,
    },
    /// A request failed; local state was rolled back.
    Failed { action: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuOutcome {
    Done,
    /// The caller should show its add-column form, then call
    /// [`Reconciler::toolbar`] with the result.
    AddColumnForm,
    Ignored,
}

/// State a response needs to be applied.
#[derive(Debug)]
enum Continuation {
    Definitions,
    Rows,
    CreateRow(TempId),
    CommitCells { entity_id: EntityId, values: FieldMap },
    DeleteRow(EntityId),
    /// Delete of a row that was removed locally while its create was in flight.
    CleanupRow(EntityId),
    CreateColumn(String),
    UpdateColumn {
        column: String,
        previous_name: Option<String>,
        previous_type: Option<FieldType>,
    },
    DeleteColumn(ColumnSnapshot),
    CleanupColumn(DefinitionId),
}

// ============================================================================
// Reconciler
// ============================================================================

pub struct Reconciler {
    entity_type: EntityType,
    config: GridConfig,
    templates: Vec<SystemColumn>,
    strategies: StrategyTable,
    definitions: Vec<FieldDefinition>,
    grid: GridState,
    tracking: Tracking,
    deletes: UndoManager,
    /// Custom columns whose definition create is in flight; `true` once
    /// the column was deleted locally.
    creating_columns: HashMap<String, bool>,
    next_ticket: Ticket,
    outbox: VecDeque<Request>,
    waiting: HashMap<Ticket, Continuation>,
    latest_rows: Ticket,
    latest_definitions: Ticket,
    notices: Vec<Notice>,
}

impl Reconciler {
    pub fn new(entity_type: EntityType, config: GridConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let templates = system_columns(entity_type);
        let columns = build_columns(&templates, &[], &config);
        Ok(Self {
            entity_type,
            grid: GridState::new(columns, config.min_column_width),
            deletes: UndoManager::new(config.undo_window(), config.tracking_clear_delay()),
            config,
            templates,
            strategies: StrategyTable::new(),
            definitions: Vec::new(),
            tracking: Tracking::new(),
            creating_columns: HashMap::new(),
            next_ticket: 1,
            outbox: VecDeque::new(),
            waiting: HashMap::new(),
            latest_rows: 0,
            latest_definitions: 0,
            notices: Vec::new(),
        })
    }

    pub fn with_strategies(mut self, strategies: StrategyTable) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn grid(&self) -> &GridState {
        &self.grid
    }

    pub fn definitions(&self) -> &[FieldDefinition] {
        &self.definitions
    }

    pub fn export_view(&self) -> ExportView {
        self.grid.export_view()
    }

    pub fn display(&self, row: &RowId, column: &str) -> Option<CellDisplay> {
        let row = self.grid.row(row)?;
        Some(self.strategies.render(self.grid.column(column), row.get(column)))
    }

    pub fn editor(&self, column: &str) -> Option<EditorKind> {
        self.grid.column(column).map(|c| self.strategies.editor(c))
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    pub fn take_requests(&mut self) -> Vec<Request> {
        self.outbox.drain(..).collect()
    }

    /// Requests issued and not yet applied.
    pub fn in_flight(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_settled(&self) -> bool {
        self.waiting.is_empty() && self.deletes.queued_len() == 0
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deletes.next_deadline()
    }

    fn issue(&mut self, kind: RequestKind, continuation: Continuation) -> Ticket {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        tracing::trace!(ticket, request = kind.name(), "queueing request");
        self.outbox.push_back(Request {
            ticket,
            entity_type: self.entity_type,
            kind,
        });
        self.waiting.insert(ticket, continuation);
        ticket
    }

    fn fail(&mut self, action: &'static str, error: &RemoteError) {
        tracing::warn!(action, error = %error, "request failed");
        self.notices.push(Notice::Failed {
            action,
            reason: error.to_string(),
        });
    }

    // ========================================================================
    // Loading
    // ========================================================================

    pub fn refresh(&mut self) {
        self.refresh_definitions();
        self.refresh_rows();
    }

    pub fn refresh_definitions(&mut self) {
        self.latest_definitions = self.issue(RequestKind::FetchFieldDefinitions, Continuation::Definitions);
    }

    pub fn refresh_rows(&mut self) {
        self.latest_rows = self.issue(RequestKind::FetchRows, Continuation::Rows);
    }

    fn on_definitions(&mut self, ticket: Ticket, result: Result<Response, RemoteError>) {
        let definitions = match result.and_then(Response::into_definitions) {
            Ok(defs) => defs,
            Err(e) => return self.fail("load columns", &e),
        };
        if ticket < self.latest_definitions {
            tracing::debug!(ticket, "ignoring superseded definition fetch");
            return;
        }
        self.definitions = definitions;
        self.rebuild_columns();
    }

    /// Recomputes columns from templates and the registry snapshot,
    /// keeping local widths, columns still being created and labels or
    /// types whose update is still in flight.
    fn rebuild_columns(&mut self) {
        let mut next = build_columns(&self.templates, &self.definitions, &self.config);
        for (index, column) in self.grid.columns().iter().enumerate() {
            if self.creating_columns.contains_key(&column.id) && !next.iter().any(|c| c.id == column.id) {
                next.insert(index.min(next.len()), column.clone());
            }
        }
        for continuation in self.waiting.values() {
            let Continuation::UpdateColumn {
                column,
                previous_name,
                previous_type,
            } = continuation
            else {
                continue;
            };
            let (Some(local), Some(target)) = (
                self.grid.column(column),
                next.iter_mut().find(|c| c.id == *column),
            ) else {
                continue;
            };
            if previous_name.is_some() {
                target.name = local.name.clone();
            }
            if previous_type.is_some() {
                target.column_type = local.column_type;
                target.align = local.align;
            }
        }
        for column in self.grid.columns() {
            if !next.iter().any(|c| c.id == column.id) {
                tracing::debug!(column = %column.id, "column no longer in schema");
            }
        }
        carry_over_widths(self.grid.columns(), &mut next);
        self.grid.replace_columns(next);
    }

    fn on_rows(&mut self, ticket: Ticket, result: Result<Response, RemoteError>) {
        let records = match result.and_then(Response::into_rows) {
            Ok(records) => records,
            Err(e) => return self.fail("load rows", &e),
        };
        if ticket < self.latest_rows {
            tracing::debug!(ticket, "ignoring superseded row fetch");
            return;
        }
        let server: Vec<(EntityId, FieldMap)> = records
            .into_iter()
            .filter(|r| r.entity_type == self.entity_type)
            .map(|r| (r.id, r.flatten()))
            .collect();
        for (id, values) in &server {
            if !self.tracking.touched_after(*id, ticket) {
                self.tracking.set_known(*id, values.clone());
            }
        }
        let merged = {
            let deletes = &self.deletes;
            let excluded = |id: EntityId| deletes.excludes(id);
            let merge = RefreshMerge {
                ticket,
                tracking: &self.tracking,
                excluded: &excluded,
                editing: self.grid.editing_cell().map(|(row, column)| (*row, column)),
            };
            merge.merge(self.grid.rows(), server)
        };
        tracing::debug!(rows = merged.len(), "merged row refresh");
        self.grid.replace_rows(merged);
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Feeds a UI event to the grid and turns its effects into requests.
    pub fn handle(&mut self, event: GridEvent) -> Vec<GridEffect> {
        let effects = self.grid.dispatch(event, &self.strategies);
        for effect in &effects {
            match effect {
                GridEffect::CellCommitted { row, column, .. } => self.commit_cell(*row, column),
                GridEffect::HeaderCommitted {
                    column,
                    previous,
                    ..
                } => self.persist_column(column, Some(previous.clone()), None),
                GridEffect::HeaderRenamed { .. } => {}
                GridEffect::Invalid { row, column, reason } => self.notices.push(Notice::Invalid {
                    row: *row,
                    column: Some(column.clone()),
                    reason: reason.clone(),
                }),
            }
        }
        effects
    }

    /// Runs a context-menu entry against the menu's current target.
    pub fn menu_action(&mut self, action: MenuAction, now: Instant) -> Result<MenuOutcome, EngineError> {
        let Some(menu) = self.grid.context_menu().cloned() else {
            return Ok(MenuOutcome::Ignored);
        };
        self.grid.close_menu();
        let offered = menu_items(&menu.target, menu.target.column().and_then(|c| self.grid.column(c)));
        if !offered.contains(&action) {
            tracing::debug!(action = ?action, "menu action not offered for target");
            return Ok(MenuOutcome::Ignored);
        }
        let target = menu.target;
        match (action, target) {
            (MenuAction::EditCell, MenuTarget::Cell { row, column }) => {
                self.handle(GridEvent::CellClick { row, column });
            }
            (MenuAction::ClearCell, MenuTarget::Cell { row, column }) => {
                self.set_cell(row, &column, CellValue::Null)?;
            }
            (MenuAction::AddRowBelow, MenuTarget::Row(row) | MenuTarget::Cell { row, .. }) => {
                self.add_row(Some(row))?;
            }
            (MenuAction::DuplicateRow, MenuTarget::Row(row) | MenuTarget::Cell { row, .. }) => {
                self.duplicate_row(&row)?;
            }
            (MenuAction::DeleteRow, MenuTarget::Row(row) | MenuTarget::Cell { row, .. }) => {
                self.delete_row(row, now)?;
            }
            (MenuAction::RenameColumn, MenuTarget::Column(column)) => {
                self.handle(GridEvent::HeaderDoubleClick(column));
            }
            (MenuAction::ChangeColumnType(field_type), MenuTarget::Column(column)) => {
                self.retype_column(&column, field_type)?;
            }
            (MenuAction::DeleteColumn, MenuTarget::Column(column)) => {
                self.delete_column(&column)?;
            }
            (MenuAction::AddColumn, _) => return Ok(MenuOutcome::AddColumnForm),
            _ => return Ok(MenuOutcome::Ignored),
        }
        Ok(MenuOutcome::Done)
    }

    pub fn toolbar(&mut self, action: ToolbarAction) -> Result<(), EngineError> {
        match action {
            ToolbarAction::AddRow => {
                self.add_row(None)?;
            }
            ToolbarAction::AddColumn {
                field_name,
                label,
                field_type,
                options,
            } => self.add_column(&field_name, &label, field_type, options)?,
            ToolbarAction::Refresh => self.refresh(),
        }
        Ok(())
    }

    // ========================================================================
    // Cells
    // ========================================================================

    /// Sets a cell outside the editor (menu clear, paste) and commits it.
    pub fn set_cell(&mut self, row: RowId, column: &str, value: CellValue) -> Result<(), EngineError> {
        let col = self
            .grid
            .column(column)
            .ok_or_else(|| EngineError::ColumnNotFound(column.to_string()))?;
        if !col.editable {
            return Err(EngineError::Validation {
                column: column.to_string(),
                reason: "column is read-only".into(),
            });
        }
        let current = self
            .grid
            .row(&row)
            .ok_or_else(|| EngineError::RowNotFound(row.to_string()))?
            .get(column);
        if *current == value {
            return Ok(());
        }
        self.grid.set_cell(&row, column, value);
        self.commit_cell(row, column);
        Ok(())
    }

    fn commit_cell(&mut self, row: RowId, column: &str) {
        match row {
            RowId::Pending(temp) => {
                // Sent once the row has a server id.
                self.tracking.mark_dirty(&temp, column);
            }
            RowId::Persisted(id) => self.send_cells(id, [column.to_string()]),
        }
    }

    /// Sends the current value of each column, skipping cells whose value
    /// the server already has or is about to have.
    fn send_cells(&mut self, entity_id: EntityId, columns: impl IntoIterator<Item = String>) {
        let Some(row) = self.grid.row(&RowId::Persisted(entity_id)) else {
            return;
        };
        let mut standard = FieldMap::new();
        let mut custom = FieldMap::new();
        for column in columns {
            let value = row.get(&column).clone();
            let unchanged = self
                .tracking
                .expected(entity_id, &column)
                .map_or(value.is_null(), |expected| *expected == value);
            if unchanged {
                tracing::trace!(entity = %entity_id, column = %column, "value unchanged, not sending");
                continue;
            }
            match self.grid.column(&column) {
                Some(col) if col.is_custom => {
                    custom.insert(column, value);
                }
                Some(col) if col.editable => {
                    standard.insert(column, value);
                }
                _ => tracing::warn!(column = %column, "commit for a column that is not editable"),
            }
        }
        if !custom.is_empty() {
            let kind = RequestKind::UpsertFieldValues {
                id: entity_id,
                values: custom.clone(),
            };
            self.send_commit(entity_id, kind, custom);
        }
        if !standard.is_empty() {
            let kind = RequestKind::UpdateEntity {
                id: entity_id,
                standard: Some(standard.clone()),
                custom: None,
            };
            self.send_commit(entity_id, kind, standard);
        }
    }

    fn send_commit(&mut self, entity_id: EntityId, kind: RequestKind, values: FieldMap) {
        let ticket = self.issue(
            kind,
            Continuation::CommitCells {
                entity_id,
                values: values.clone(),
            },
        );
        for (column, value) in values {
            self.tracking.send_cell(entity_id, &column, value, ticket);
        }
    }

    fn on_commit(
        &mut self,
        ticket: Ticket,
        entity_id: EntityId,
        values: FieldMap,
        result: Result<Response, RemoteError>,
    ) {
        match result {
            Ok(_) => {
                for (column, value) in values {
                    self.tracking.settle_cell(entity_id, &column, ticket);
                    self.tracking.record_known(entity_id, &column, value);
                }
            }
            Err(e) => {
                let row = RowId::Persisted(entity_id);
                for column in values.keys() {
                    // A newer commit for the cell supersedes this one.
                    if !self.tracking.settle_cell(entity_id, column, ticket) {
                        continue;
                    }
                    let good = self
                        .tracking
                        .known(entity_id)
                        .and_then(|known| known.get(column))
                        .cloned()
                        .unwrap_or_default();
                    self.grid.set_cell(&row, column, good);
                }
                if e.is_validation() {
                    self.notices.push(Notice::Invalid {
                        row: Some(row),
                        column: values.keys().next().cloned(),
                        reason: e.to_string(),
                    });
                } else {
                    self.fail("save cell", &e);
                    self.refresh_rows();
                }
            }
        }
    }

    // ========================================================================
    // Rows
    // ========================================================================

    /// Adds an empty row after `after` (or at the end) and requests its creation.
    pub fn add_row(&mut self, after: Option<RowId>) -> Result<RowId, EngineError> {
        let temp = TempId::new();
        let id = RowId::Pending(temp);
        self.grid.insert_row(Row::new(id), after.as_ref())?;
        self.create_row(temp, FieldMap::new());
        Ok(id)
    }

    pub fn duplicate_row(&mut self, source: &RowId) -> Result<RowId, EngineError> {
        let temp = TempId::new();
        let id = RowId::Pending(temp);
        self.grid.duplicate_row(source, id)?;
        let values = self.grid.row(&id).map(|r| r.values.clone()).unwrap_or_default();
        self.create_row(temp, values);
        Ok(id)
    }

    fn create_row(&mut self, temp: TempId, values: FieldMap) {
        let mut standard = FieldMap::new();
        let mut custom = FieldMap::new();
        for (key, value) in values {
            match self.grid.column(&key) {
                Some(col) if col.is_custom => {
                    custom.insert(key, value);
                }
                Some(col) if col.editable => {
                    standard.insert(key, value);
                }
                _ => {}
            }
        }
        self.tracking.begin_create(temp);
        self.issue(RequestKind::CreateEntity { standard, custom }, Continuation::CreateRow(temp));
    }

    fn on_create_row(&mut self, ticket: Ticket, temp: TempId, result: Result<Response, RemoteError>, now: Instant) {
        let clear_at = now + self.config.tracking_clear_delay();
        let pending = self.tracking.finish_create(temp, clear_at).unwrap_or_default();
        let temp_row = RowId::Pending(temp);
        let record = match result.and_then(Response::into_entity) {
            Ok(record) => record,
            Err(e) => {
                self.grid.remove_row(&temp_row);
                self.fail("add row", &e);
                self.refresh_rows();
                return;
            }
        };
        let id = record.id;
        let server = record.flatten();
        self.tracking.set_known(id, server.clone());
        self.tracking.touch(id, ticket);

        if pending.cancelled || self.grid.row(&temp_row).is_none() {
            tracing::debug!(entity = %id, "row removed before its create finished, deleting");
            self.deletes.mark_deleted(id, now);
            self.issue(RequestKind::DeleteEntity(id), Continuation::CleanupRow(id));
            return;
        }

        let persisted = RowId::Persisted(id);
        if self.grid.remove_row(&persisted).is_some() {
            tracing::debug!(entity = %id, "dropping refreshed copy of a just-created row");
        }
        self.grid.replace_row_id(&temp_row, persisted);
        for (column, value) in server {
            if !pending.dirty.contains(&column) {
                self.grid.set_cell(&persisted, &column, value);
            }
        }
        if !pending.dirty.is_empty() {
            self.send_cells(id, pending.dirty);
        }
    }

    /// Removes a row from view. Persisted rows are deleted remotely once the
    /// undo window closes; a row still being created is dropped outright.
    pub fn delete_row(&mut self, row: RowId, now: Instant) -> Result<(), EngineError> {
        let order: Vec<RowId> = self.grid.rows().iter().map(|r| r.id).collect();
        let (index, snapshot) = self
            .grid
            .remove_row(&row)
            .ok_or_else(|| EngineError::RowNotFound(row.to_string()))?;
        match row {
            RowId::Pending(temp) => {
                self.tracking.cancel_create(&temp);
            }
            RowId::Persisted(id) => {
                tracing::debug!(entity = %id, "row delete pending");
                self.deletes.push(id, index, snapshot, &order, now);
            }
        }
        Ok(())
    }

    /// Cancels a pending delete and puts the row back where it was.
    pub fn undo_delete(&mut self, entity_id: EntityId) -> bool {
        match self.deletes.cancel(entity_id) {
            Some(pending) => self
                .grid
                .restore_row_in(self.deletes.layout(), pending.index, pending.row),
            None => false,
        }
    }

    pub fn undo_last_delete(&mut self) -> Option<EntityId> {
        let pending = self.deletes.cancel_last()?;
        let id = pending.entity_id;
        self.grid
            .restore_row_in(self.deletes.layout(), pending.index, pending.row);
        Some(id)
    }

    pub fn is_delete_pending(&self, entity_id: EntityId) -> bool {
        self.deletes.is_queued(entity_id)
    }

    /// Fires delete timers that have expired and forgets ids past their
    /// safety delay.
    pub fn poll(&mut self, now: Instant) {
        for pending in self.deletes.take_due(now) {
            tracing::debug!(entity = %pending.entity_id, "undo window closed, deleting");
            self.issue(
                RequestKind::DeleteEntity(pending.entity_id),
                Continuation::DeleteRow(pending.entity_id),
            );
        }
        self.deletes.expire(now);
        self.tracking.expire(now);
    }

    fn on_delete_row(&mut self, entity_id: EntityId, result: Result<Response, RemoteError>, now: Instant) {
        match result {
            Ok(_) | Err(RemoteError::NotFound(_)) => {
                self.deletes.confirm(entity_id, now);
                self.tracking.forget(entity_id);
            }
            Err(e) => {
                if let Some(pending) = self.deletes.fail(entity_id) {
                    self.grid
                        .restore_row_in(self.deletes.layout(), pending.index, pending.row);
                }
                self.fail("delete row", &e);
                self.refresh_rows();
            }
        }
    }

    fn on_cleanup_row(&mut self, entity_id: EntityId, result: Result<Response, RemoteError>, now: Instant) {
        match result {
            Ok(_) | Err(RemoteError::NotFound(_)) => {
                self.deletes.mark_deleted(entity_id, now);
                self.tracking.forget(entity_id);
            }
            Err(e) => {
                self.fail("delete row", &e);
                self.refresh_rows();
            }
        }
    }

    // ========================================================================
    // Columns
    // ========================================================================

    /// Adds a custom column at the end and requests its field definition.
    pub fn add_column(
        &mut self,
        field_name: &str,
        label: &str,
        field_type: FieldType,
        options: Option<Vec<String>>,
    ) -> Result<(), EngineError> {
        let system_names = self.templates.iter().map(|t| t.id);
        let existing = self.grid.columns().iter().map(|c| c.id.as_str());
        if let Err(e) = validate_custom_field_name(
            self.entity_type,
            field_name,
            &self.config.custom_field_prefix,
            system_names,
            existing,
        ) {
            self.notices.push(Notice::Invalid {
                row: None,
                column: Some(field_name.to_string()),
                reason: e.to_string(),
            });
            return Err(e.into());
        }
        let label = match label.trim() {
            "" => field_name,
            trimmed => trimmed,
        };
        let order = next_display_order(self.grid.columns());
        let mut column =
            GridColumn::custom(field_name, label, field_type, self.config.default_column_width);
        column.options = options.clone();
        column.display_order = Some(order);
        self.grid.add_column(column)?;
        self.creating_columns.insert(field_name.to_string(), false);

        let mut def = NewFieldDefinition::custom(self.entity_type, field_name, label, field_type);
        def.field_options = options;
        def.display_order = Some(order);
        self.issue(
            RequestKind::CreateFieldDefinition(def),
            Continuation::CreateColumn(field_name.to_string()),
        );
        Ok(())
    }

    fn on_create_column(&mut self, column: String, result: Result<Response, RemoteError>) {
        let cancelled = self.creating_columns.remove(&column).unwrap_or(false);
        let def = match result.and_then(Response::into_definition) {
            Ok(def) => def,
            Err(e) => {
                self.grid.remove_column(&column);
                if e.is_validation() {
                    self.notices.push(Notice::Invalid {
                        row: None,
                        column: Some(column),
                        reason: e.to_string(),
                    });
                } else {
                    self.fail("add column", &e);
                    self.refresh_definitions();
                }
                return;
            }
        };
        self.definitions.retain(|d| d.id != def.id);
        self.definitions.push(def.clone());

        let Some(local) = self.grid.column_mut(&column).filter(|_| !cancelled) else {
            tracing::debug!(column = %column, "column removed before its create finished, deleting");
            self.issue(
                RequestKind::DeleteFieldDefinition(def.id),
                Continuation::CleanupColumn(def.id),
            );
            return;
        };
        local.definition_id = Some(def.id);
        local.display_order = Some(def.display_order);
        if def.field_options.is_some() {
            local.options = def.field_options.clone();
        }
        // Catch up on renames or retypes made while the create was out.
        let name = (local.name != def.field_label).then(|| local.name.clone());
        let retype = (local.column_type != def.field_type).then_some(local.column_type);
        if name.is_some() || retype.is_some() {
            let patch = FieldDefinitionPatch {
                field_label: name,
                field_type: retype,
                ..Default::default()
            };
            self.issue(
                RequestKind::UpdateFieldDefinition { id: def.id, patch },
                Continuation::UpdateColumn {
                    column,
                    previous_name: Some(def.field_label),
                    previous_type: Some(def.field_type),
                },
            );
        }
    }

    /// Renames a column locally and persists the label when it has a definition.
    pub fn rename_column(&mut self, column: &str, name: &str) -> Result<(), EngineError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::Validation {
                column: column.to_string(),
                reason: "column name cannot be empty".into(),
            });
        }
        let previous = self.grid.rename_column(column, name)?;
        if previous != name {
            self.persist_column(column, Some(previous), None);
        }
        Ok(())
    }

    pub fn retype_column(&mut self, column: &str, field_type: FieldType) -> Result<(), EngineError> {
        let previous = self.grid.retype_column(column, field_type)?;
        if previous != field_type {
            self.persist_column(column, None, Some(previous));
        }
        Ok(())
    }

    fn persist_column(&mut self, column: &str, previous_name: Option<String>, previous_type: Option<FieldType>) {
        let Some(col) = self.grid.column(column) else {
            return;
        };
        let Some(id) = col.definition_id else {
            if self.creating_columns.contains_key(column) {
                tracing::trace!(column = %column, "change will follow the pending create");
            } else {
                tracing::debug!(column = %column, "column has no definition, change stays local");
            }
            return;
        };
        let patch = FieldDefinitionPatch {
            field_label: previous_name.is_some().then(|| col.name.clone()),
            field_type: previous_type.map(|_| col.column_type),
            ..Default::default()
        };
        self.issue(
            RequestKind::UpdateFieldDefinition { id, patch },
            Continuation::UpdateColumn {
                column: column.to_string(),
                previous_name,
                previous_type,
            },
        );
    }

    fn on_update_column(
        &mut self,
        column: String,
        previous_name: Option<String>,
        previous_type: Option<FieldType>,
        result: Result<Response, RemoteError>,
    ) {
        match result.and_then(Response::into_definition) {
            Ok(def) => {
                self.definitions.retain(|d| d.id != def.id);
                self.definitions.push(def);
            }
            Err(e) => {
                if let Some(name) = previous_name {
                    let _ = self.grid.rename_column(&column, &name);
                }
                if let Some(field_type) = previous_type {
                    let _ = self.grid.retype_column(&column, field_type);
                }
                if e.is_validation() {
                    self.notices.push(Notice::Invalid {
                        row: None,
                        column: Some(column),
                        reason: e.to_string(),
                    });
                } else {
                    self.fail("update column", &e);
                    self.refresh_definitions();
                }
            }
        }
    }

    /// Removes a custom column and every row's value for it, then requests
    /// the definition delete. The server refuses while values exist; the
    /// column comes back in that case.
    pub fn delete_column(&mut self, column: &str) -> Result<(), EngineError> {
        let col = self
            .grid
            .column(column)
            .ok_or_else(|| EngineError::ColumnNotFound(column.to_string()))?;
        if !col.is_custom {
            return Err(EngineError::SystemColumn(column.to_string()));
        }
        let definition_id = col.definition_id;
        let Some(snapshot) = self.grid.remove_column(column) else {
            return Err(EngineError::ColumnNotFound(column.to_string()));
        };
        match definition_id {
            Some(id) => {
                self.issue(RequestKind::DeleteFieldDefinition(id), Continuation::DeleteColumn(snapshot));
            }
            None => {
                if let Some(cancelled) = self.creating_columns.get_mut(column) {
                    *cancelled = true;
                }
            }
        }
        Ok(())
    }

    fn on_delete_column(&mut self, snapshot: ColumnSnapshot, result: Result<Response, RemoteError>) {
        match result {
            Ok(_) | Err(RemoteError::NotFound(_)) => {
                self.definitions
                    .retain(|d| Some(d.id) != snapshot.column.definition_id);
                self.tracking.forget_column(&snapshot.column.id);
            }
            Err(e) => {
                tracing::info!(column = %snapshot.column.id, "restoring column after failed delete");
                self.grid.restore_column(snapshot);
                self.fail("delete column", &e);
                self.refresh();
            }
        }
    }

    fn on_cleanup_column(&mut self, id: DefinitionId, result: Result<Response, RemoteError>) {
        match result {
            Ok(_) | Err(RemoteError::NotFound(_)) => self.definitions.retain(|d| d.id != id),
            Err(e) => {
                self.fail("delete column", &e);
                self.refresh_definitions();
            }
        }
    }

    // ========================================================================
    // Resizing
    // ========================================================================

    pub fn begin_resize(&mut self, column: &str, x: i32) -> bool {
        self.grid.begin_resize(column, x)
    }

    pub fn drag_resize(&mut self, x: i32) -> Option<u32> {
        self.grid.drag_resize(x)
    }

    pub fn end_resize(&mut self) -> Option<(String, u32)> {
        self.grid.end_resize()
    }

    // ========================================================================
    // Responses
    // ========================================================================

    /// Applies the outcome of a request. Unknown tickets are ignored.
    pub fn apply(&mut self, ticket: Ticket, result: Result<Response, RemoteError>, now: Instant) {
        let Some(continuation) = self.waiting.remove(&ticket) else {
            tracing::warn!(ticket, "response for unknown request");
            return;
        };
        tracing::trace!(ticket, ok = result.is_ok(), "applying response");
        match continuation {
            Continuation::Definitions => self.on_definitions(ticket, result),
            Continuation::Rows => self.on_rows(ticket, result),
            Continuation::CreateRow(temp) => self.on_create_row(ticket, temp, result, now),
            Continuation::CommitCells { entity_id, values } => {
                self.on_commit(ticket, entity_id, values, result)
            }
            Continuation::DeleteRow(id) => self.on_delete_row(id, result, now),
            Continuation::CleanupRow(id) => self.on_cleanup_row(id, result, now),
            Continuation::CreateColumn(column) => self.on_create_column(column, result),
            Continuation::UpdateColumn {
                column,
                previous_name,
                previous_type,
            } => self.on_update_column(column, previous_name, previous_type, result),
            Continuation::DeleteColumn(snapshot) => self.on_delete_column(snapshot, result),
            Continuation::CleanupColumn(id) => self.on_cleanup_column(id, result),
        }
        self.deletes.expire(now);
        self.tracking.expire(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{Focus, Key};
    use std::time::Duration;

    fn shop_grid() -> Reconciler {
        Reconciler::new(EntityType::Shop, GridConfig::default()).unwrap()
    }

    fn record(id: i64, pairs: &[(&str, &str)]) -> EntityRecord {
        let mut record = EntityRecord::new(EntityId::new(id), EntityType::Shop);
        for (k, v) in pairs {
            if k.starts_with("cf_") {
                record.custom.insert(k.to_string(), CellValue::from(*v));
            } else {
                record.standard.insert(k.to_string(), CellValue::from(*v));
            }
        }
        record
    }

    /// Answers the initial load with the given rows.
    fn loaded(rows: Vec<EntityRecord>) -> Reconciler {
        let mut rec = shop_grid();
        rec.refresh();
        let now = Instant::now();
        for request in rec.take_requests() {
            let response = match request.kind {
                RequestKind::FetchFieldDefinitions => Response::FieldDefinitions(Vec::new()),
                RequestKind::FetchRows => Response::Rows(rows.clone()),
                other => panic!("unexpected {other:?}"),
            };
            rec.apply(request.ticket, Ok(response), now);
        }
        rec
    }

    fn persisted(id: i64) -> RowId {
        RowId::Persisted(EntityId::new(id))
    }

    fn edit(rec: &mut Reconciler, row: RowId, column: &str, text: &str, key: Key) {
        rec.handle(GridEvent::CellClick {
            row,
            column: column.into(),
        });
        rec.handle(GridEvent::Input(text.into()));
        rec.handle(GridEvent::Key(key));
    }

    #[test]
    fn commit_sends_one_update_and_skips_unchanged() {
        let mut rec = loaded(vec![record(1, &[("name", "Corner Shop")])]);
        edit(&mut rec, persisted(1), "phone", "555-0100", Key::Escape);
        assert!(rec.take_requests().is_empty());

        edit(&mut rec, persisted(1), "phone", "555-0100", Key::Enter);
        let requests = rec.take_requests();
        assert_eq!(requests.len(), 1);
        assert!(matches!(
            &requests[0].kind,
            RequestKind::UpdateEntity { standard: Some(values), custom: None, .. }
                if values.get("phone") == Some(&CellValue::from("555-0100"))
        ));

        // Same value again while the first is still in flight.
        rec.set_cell(persisted(1), "phone", CellValue::from("555-0100")).unwrap();
        edit(&mut rec, persisted(1), "phone", "555-0100", Key::Enter);
        assert!(rec.take_requests().is_empty());
    }

    #[test]
    fn failed_commit_restores_last_known_value() {
        let mut rec = loaded(vec![record(1, &[("name", "Corner Shop")])]);
        edit(&mut rec, persisted(1), "name", "Renamed", Key::Enter);
        let request = rec.take_requests().remove(0);
        rec.apply(
            request.ticket,
            Err(RemoteError::Transient("boom".into())),
            Instant::now(),
        );
        let row = rec.grid().row(&persisted(1)).unwrap();
        assert_eq!(row.get("name"), &CellValue::from("Corner Shop"));
        assert!(matches!(rec.take_notices().as_slice(), [Notice::Failed { action: "save cell", .. }]));
        assert!(rec
            .take_requests()
            .iter()
            .any(|r| r.kind == RequestKind::FetchRows));
    }

    #[test]
    fn pending_row_edits_follow_the_create() {
        let mut rec = loaded(Vec::new());
        let temp = rec.add_row(None).unwrap();
        let create = rec.take_requests().remove(0);
        edit(&mut rec, temp, "name", "New Shop", Key::Escape);
        edit(&mut rec, temp, "owner_name", "Ada", Key::Enter);
        assert!(rec.take_requests().is_empty());

        let mut created = record(5, &[]);
        created.standard.insert("status".into(), CellValue::from("active"));
        rec.apply(create.ticket, Ok(Response::Entity(created)), Instant::now());

        let row = rec.grid().row(&persisted(5)).unwrap();
        assert_eq!(row.get("owner_name"), &CellValue::from("Ada"));
        assert_eq!(row.get("status"), &CellValue::from("active"));
        assert!(rec.grid().row(&temp).is_none());

        let follow_up = rec.take_requests();
        assert_eq!(follow_up.len(), 1);
        assert!(matches!(
            &follow_up[0].kind,
            RequestKind::UpdateEntity { id, standard: Some(values), .. }
                if *id == EntityId::new(5) && values.len() == 1
        ));
    }

    #[test]
    fn delete_waits_for_the_undo_window() {
        let mut rec = loaded(vec![record(1, &[]), record(2, &[])]);
        let start = Instant::now();
        rec.delete_row(persisted(1), start).unwrap();
        assert_eq!(rec.grid().rows().len(), 1);

        rec.poll(start + Duration::from_millis(4_999));
        assert!(rec.take_requests().is_empty());
        assert_eq!(rec.next_deadline(), Some(start + Duration::from_secs(5)));

        rec.poll(start + Duration::from_secs(5));
        let requests = rec.take_requests();
        assert_eq!(requests[0].kind, RequestKind::DeleteEntity(EntityId::new(1)));
        assert!(!rec.undo_delete(EntityId::new(1)));
    }

    #[test]
    fn removing_a_row_mid_create_deletes_it_afterwards() {
        let mut rec = loaded(Vec::new());
        let now = Instant::now();
        let temp = rec.add_row(None).unwrap();
        let create = rec.take_requests().remove(0);
        rec.delete_row(temp, now).unwrap();

        rec.apply(create.ticket, Ok(Response::Entity(record(3, &[]))), now);
        assert!(rec.grid().rows().is_empty());
        let requests = rec.take_requests();
        assert_eq!(requests[0].kind, RequestKind::DeleteEntity(EntityId::new(3)));
    }

    #[test]
    fn promoted_temp_ids_are_forgotten_after_the_clear_delay() {
        let mut rec = loaded(Vec::new());
        let now = Instant::now();
        for n in 1..=3 {
            rec.add_row(None).unwrap();
            let create = rec.take_requests().remove(0);
            rec.apply(create.ticket, Ok(Response::Entity(record(n, &[]))), now);
        }
        assert_eq!(rec.grid().rows().len(), 3);
        assert_eq!(rec.tracking.retired_len(), 3);

        rec.poll(now + rec.config().tracking_clear_delay() / 2);
        assert_eq!(rec.tracking.retired_len(), 3);
        rec.poll(now + rec.config().tracking_clear_delay());
        assert_eq!(rec.tracking.retired_len(), 0);
        assert_eq!(rec.grid().rows().len(), 3);
    }

    #[test]
    fn undoing_adjacent_deletes_restores_order() {
        let rows = || vec![record(1, &[]), record(2, &[]), record(3, &[])];
        let order = |rec: &Reconciler| rec.grid().rows().iter().map(|r| r.id).collect::<Vec<_>>();
        let expected = vec![persisted(1), persisted(2), persisted(3)];
        let now = Instant::now();

        for (deletes, undos) in [([2, 1], [2, 1]), ([2, 1], [1, 2]), ([1, 2], [1, 2]), ([1, 2], [2, 1])] {
            let mut rec = loaded(rows());
            for id in deletes {
                rec.delete_row(persisted(id), now).unwrap();
            }
            for id in undos {
                assert!(rec.undo_delete(EntityId::new(id)));
            }
            assert_eq!(order(&rec), expected, "deleted {deletes:?}, undone {undos:?}");
        }

        let mut rec = loaded(rows());
        rec.delete_row(persisted(3), now).unwrap();
        rec.delete_row(persisted(2), now).unwrap();
        assert_eq!(rec.undo_last_delete(), Some(EntityId::new(2)));
        assert_eq!(rec.undo_last_delete(), Some(EntityId::new(3)));
        assert_eq!(order(&rec), expected);
    }

    #[test]
    fn system_column_rename_without_definition_stays_local() {
        let mut rec = loaded(Vec::new());
        rec.rename_column("phone", "Telephone").unwrap();
        assert_eq!(rec.grid().column("phone").unwrap().name, "Telephone");
        assert!(rec.take_requests().is_empty());
        assert!(matches!(
            rec.retype_column("phone", FieldType::Number),
            Err(EngineError::SystemColumn(_))
        ));
    }

    #[test]
    fn invalid_column_names_are_reported_inline() {
        let mut rec = loaded(Vec::new());
        assert!(rec.add_column("location", "Location", FieldType::Text, None).is_err());
        assert!(rec.add_column("cf_Bad", "Bad", FieldType::Text, None).is_err());
        assert_eq!(rec.take_notices().len(), 2);
        assert!(rec.take_requests().is_empty());
        assert!(rec.grid().column("location").is_none());
    }

    #[test]
    fn duplicate_name_from_server_removes_the_column() {
        let mut rec = loaded(Vec::new());
        rec.add_column("cf_floor", "Floor", FieldType::Number, None).unwrap();
        let request = rec.take_requests().remove(0);
        rec.apply(
            request.ticket,
            Err(RemoteError::DuplicateName("cf_floor".into())),
            Instant::now(),
        );
        assert!(rec.grid().column("cf_floor").is_none());
        assert!(matches!(rec.take_notices().as_slice(), [Notice::Invalid { .. }]));
        assert!(rec.take_requests().is_empty());
    }

    #[test]
    fn menu_actions_run_against_the_menu_target() {
        let mut rec = loaded(vec![record(1, &[("name", "A")])]);
        let now = Instant::now();
        rec.handle(GridEvent::RightClick {
            target: MenuTarget::Row(persisted(1)),
            x: 0,
            y: 0,
        });
        assert_eq!(rec.menu_action(MenuAction::DuplicateRow, now).unwrap(), MenuOutcome::Done);
        assert_eq!(rec.grid().rows().len(), 2);
        assert_eq!(rec.grid().focus(), &Focus::Idle);

        // No menu open any more.
        assert_eq!(rec.menu_action(MenuAction::DeleteRow, now).unwrap(), MenuOutcome::Ignored);

        rec.handle(GridEvent::RightClick {
            target: MenuTarget::Column("name".into()),
            x: 0,
            y: 0,
        });
        assert_eq!(rec.menu_action(MenuAction::DeleteColumn, now).unwrap(), MenuOutcome::Ignored);
        assert!(rec.grid().column("name").is_some());
    }
}
