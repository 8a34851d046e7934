//! Async driver: runs the reconciler's requests against a [`Remote`] and
//! fires its timers.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use fieldgrid_core::{
    DefinitionId, EntityId, EntityRecord, EntityType, FieldDefinition, FieldDefinitionPatch,
    FieldMap, FieldValueRecord, NewFieldDefinition,
};
use tokio::sync::mpsc;
use tokio::time;

use crate::error::RemoteError;
use crate::grid::{GridEffect, GridEvent};
use crate::reconcile::{Reconciler, Request, RequestKind, Response};

/// The field definition registry and value/entity store, as seen over the wire.
#[async_trait]
pub trait Remote: Send + Sync {
    async fn field_definitions(&self, entity_type: EntityType) -> Result<Vec<FieldDefinition>, RemoteError>;

    async fn create_field_definition(&self, def: NewFieldDefinition) -> Result<FieldDefinition, RemoteError>;

    async fn update_field_definition(
        &self,
        id: DefinitionId,
        patch: FieldDefinitionPatch,
    ) -> Result<FieldDefinition, RemoteError>;

    async fn delete_field_definition(&self, id: DefinitionId) -> Result<(), RemoteError>;

    async fn field_values(
        &self,
        entity_type: EntityType,
        entity_id: Option<EntityId>,
    ) -> Result<Vec<FieldValueRecord>, RemoteError>;

    async fn upsert_field_values(
        &self,
        entity_type: EntityType,
        entity_id: EntityId,
        values: FieldMap,
    ) -> Result<(), RemoteError>;

    async fn create_entity(
        &self,
        entity_type: EntityType,
        standard: FieldMap,
        custom: FieldMap,
    ) -> Result<EntityRecord, RemoteError>;

    async fn update_entity(
        &self,
        id: EntityId,
        standard: Option<FieldMap>,
        custom: Option<FieldMap>,
    ) -> Result<EntityRecord, RemoteError>;

    async fn delete_entity(&self, id: EntityId) -> Result<(), RemoteError>;

    async fn list_entities(&self, entity_type: EntityType) -> Result<Vec<EntityRecord>, RemoteError>;
}

/// Runs one request against the remote.
pub async fn execute<R: Remote + ?Sized>(remote: &R, request: Request) -> Result<Response, RemoteError> {
    let entity_type = request.entity_type;
    match request.kind {
        RequestKind::FetchFieldDefinitions => remote
            .field_definitions(entity_type)
            .await
            .map(Response::FieldDefinitions),
        RequestKind::CreateFieldDefinition(def) => remote
            .create_field_definition(def)
            .await
            .map(Response::FieldDefinition),
        RequestKind::UpdateFieldDefinition { id, patch } => remote
            .update_field_definition(id, patch)
            .await
            .map(Response::FieldDefinition),
        RequestKind::DeleteFieldDefinition(id) => {
            remote.delete_field_definition(id).await.map(|()| Response::Done)
        }
        RequestKind::FetchRows => remote.list_entities(entity_type).await.map(Response::Rows),
        RequestKind::CreateEntity { standard, custom } => remote
            .create_entity(entity_type, standard, custom)
            .await
            .map(Response::Entity),
        RequestKind::UpdateEntity {
            id,
            standard,
            custom,
        } => remote
            .update_entity(id, standard, custom)
            .await
            .map(Response::Entity),
        RequestKind::UpsertFieldValues { id, values } => remote
            .upsert_field_values(entity_type, id, values)
            .await
            .map(|()| Response::Done),
        RequestKind::DeleteEntity(id) => remote.delete_entity(id).await.map(|()| Response::Done),
    }
}

pub struct GridSession<R: Remote> {
    reconciler: Reconciler,
    remote: Arc<R>,
    last_refresh: Option<time::Instant>,
}

impl<R: Remote> GridSession<R> {
    pub fn new(reconciler: Reconciler, remote: Arc<R>) -> Self {
        Self {
            reconciler,
            remote,
            last_refresh: None,
        }
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn reconciler_mut(&mut self) -> &mut Reconciler {
        &mut self.reconciler
    }

    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    fn now() -> Instant {
        time::Instant::now().into_std()
    }

    /// Loads columns and rows.
    pub async fn load(&mut self) {
        self.reconciler.refresh();
        self.last_refresh = Some(time::Instant::now());
        self.flush().await;
    }

    pub async fn handle(&mut self, event: GridEvent) -> Vec<GridEffect> {
        let effects = self.reconciler.handle(event);
        self.flush().await;
        effects
    }

    /// Executes queued requests until the outbox is empty. Responses are
    /// applied in the order they arrive.
    pub async fn flush(&mut self) {
        loop {
            let requests = self.reconciler.take_requests();
            if requests.is_empty() {
                break;
            }
            for request in requests {
                let ticket = request.ticket;
                let name = request.kind.name();
                let result = execute(self.remote.as_ref(), request).await;
                if let Err(e) = &result {
                    tracing::debug!(ticket, request = name, error = %e, "remote call failed");
                }
                self.reconciler.apply(ticket, result, Self::now());
            }
        }
    }

    /// Fires due timers and, when the refresh interval has passed, a
    /// background refresh.
    pub async fn tick(&mut self) {
        let now = time::Instant::now();
        self.reconciler.poll(now.into_std());
        let interval = self.reconciler.config().refresh_interval();
        if self.last_refresh.is_none_or(|last| now.duration_since(last) >= interval) {
            tracing::trace!("background refresh");
            self.reconciler.refresh();
            self.last_refresh = Some(now);
        }
        self.flush().await;
    }

    fn next_wake(&self) -> time::Instant {
        let interval = self.reconciler.config().refresh_interval();
        let refresh = self
            .last_refresh
            .map_or_else(time::Instant::now, |last| last + interval);
        match self.reconciler.next_deadline() {
            Some(deadline) => refresh.min(time::Instant::from_std(deadline)),
            None => refresh,
        }
    }

    /// Processes UI events and timers until the event channel closes.
    pub async fn run(&mut self, mut events: mpsc::Receiver<GridEvent>) {
        if self.last_refresh.is_none() {
            self.load().await;
        }
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        self.handle(event).await;
                    }
                    None => break,
                },
                _ = time::sleep_until(self.next_wake()) => self.tick().await,
            }
        }
        tracing::debug!("event channel closed, session stopping");
    }
}
