use std::time::{Duration, Instant};

use fieldgrid_core::{
    CellValue, EntityId, EntityType, FieldDefinition, FieldMap, FieldType, NewFieldDefinition,
    RowId,
};
use fieldgrid_engine::{
    EngineError, GridConfig, GridEffect, GridEvent, Key, Notice, Reconciler, RemoteError, Request,
};
use fieldgrid_storage::{FieldDefinitionRegistry, ValueStore};

use crate::remote::LocalRemote;

/// A reconciler wired to a [`LocalRemote`] with a manual clock. Requests
/// are answered synchronously when [`TestGrid::flush`] runs, or one at a
/// time through [`TestGrid::take_requests`] and [`TestGrid::answer`].
pub struct TestGrid {
    pub reconciler: Reconciler,
    pub remote: LocalRemote,
    pub now: Instant,
}

impl TestGrid {
    pub fn new(entity_type: EntityType) -> Result<Self, Box<dyn std::error::Error>> {
        Self::with_config(entity_type, GridConfig::default())
    }

    pub fn with_config(
        entity_type: EntityType,
        config: GridConfig,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self {
            reconciler: Reconciler::new(entity_type, config)?,
            remote: LocalRemote::in_memory()?,
            now: Instant::now(),
        })
    }

    pub fn entity_type(&self) -> EntityType {
        self.reconciler.entity_type()
    }

    // ========================================================================
    // Server-side setup
    // ========================================================================

    /// Inserts a row straight into the store, as another client would.
    pub fn seed_row(
        &self,
        standard: &[(&str, CellValue)],
        custom: &[(&str, CellValue)],
    ) -> Result<EntityId, RemoteError> {
        let entity_type = self.entity_type();
        let standard: FieldMap = standard.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        let custom: FieldMap = custom.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        self.remote
            .with_store(|s| s.create_entity(entity_type, &standard, &custom))
            .map(|record| record.id)
    }

    pub fn seed_field(
        &self,
        field_name: &str,
        label: &str,
        field_type: FieldType,
    ) -> Result<FieldDefinition, RemoteError> {
        let def = NewFieldDefinition::custom(self.entity_type(), field_name, label, field_type);
        self.remote.with_store(|s| s.create_field_definition(&def))
    }

    pub fn stored_row(&self, id: EntityId) -> Result<Option<FieldMap>, RemoteError> {
        self.remote
            .with_store(|s| s.get_entity(id))
            .map(|record| record.map(|r| r.flatten()))
    }

    // ========================================================================
    // Driving the reconciler
    // ========================================================================

    /// Initial load: columns and rows.
    pub fn load(&mut self) -> usize {
        self.reconciler.refresh();
        self.flush()
    }

    /// Answers queued requests in order until none are left. Returns how
    /// many were answered.
    pub fn flush(&mut self) -> usize {
        let mut answered = 0;
        loop {
            let requests = self.reconciler.take_requests();
            if requests.is_empty() {
                return answered;
            }
            for request in requests {
                self.answer(request);
                answered += 1;
            }
        }
    }

    pub fn take_requests(&mut self) -> Vec<Request> {
        self.reconciler.take_requests()
    }

    pub fn answer(&mut self, request: Request) {
        let ticket = request.ticket;
        let result = self.remote.respond(request);
        self.reconciler.apply(ticket, result, self.now);
    }

    /// Moves the clock forward and fires whatever timers came due.
    pub fn advance(&mut self, by: Duration) {
        self.now += by;
        self.reconciler.poll(self.now);
    }

    pub fn event(&mut self, event: GridEvent) -> Vec<GridEffect> {
        self.reconciler.handle(event)
    }

    pub fn click(&mut self, row: RowId, column: &str) -> Vec<GridEffect> {
        self.event(GridEvent::CellClick {
            row,
            column: column.to_string(),
        })
    }

    pub fn type_text(&mut self, text: &str) -> Vec<GridEffect> {
        self.event(GridEvent::Input(text.to_string()))
    }

    pub fn press(&mut self, key: Key) -> Vec<GridEffect> {
        self.event(GridEvent::Key(key))
    }

    /// Click, type, then leave the cell with `key`.
    pub fn edit(&mut self, row: RowId, column: &str, text: &str, key: Key) -> Vec<GridEffect> {
        let mut effects = self.click(row, column);
        effects.extend(self.type_text(text));
        effects.extend(self.press(key));
        effects
    }

    pub fn delete_row(&mut self, row: RowId) -> Result<(), EngineError> {
        let now = self.now;
        self.reconciler.delete_row(row, now)
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    pub fn cell(&self, row: &RowId, column: &str) -> Option<CellValue> {
        self.reconciler.grid().row(row).map(|r| r.get(column).clone())
    }

    pub fn row_ids(&self) -> Vec<RowId> {
        self.reconciler.grid().rows().iter().map(|r| r.id).collect()
    }

    pub fn column_ids(&self) -> Vec<String> {
        self.reconciler
            .grid()
            .columns()
            .iter()
            .map(|c| c.id.clone())
            .collect()
    }

    pub fn notices(&mut self) -> Vec<Notice> {
        self.reconciler.take_notices()
    }
}
