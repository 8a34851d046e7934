use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use fieldgrid_core::{
    CoreError, DefinitionId, EntityId, EntityRecord, EntityType, FieldDefinition,
    FieldDefinitionPatch, FieldMap, FieldValueRecord, NewFieldDefinition,
};
use fieldgrid_engine::{Remote, RemoteError, Request, RequestKind, Response};
use fieldgrid_storage::{FieldDefinitionRegistry, SqliteStorage, StorageError, ValueStore};

/// One call received by [`LocalRemote`], with its payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    FieldDefinitions(EntityType),
    CreateFieldDefinition(NewFieldDefinition),
    UpdateFieldDefinition(DefinitionId, FieldDefinitionPatch),
    DeleteFieldDefinition(DefinitionId),
    FieldValues(EntityType, Option<EntityId>),
    UpsertFieldValues(EntityId, FieldMap),
    CreateEntity(FieldMap, FieldMap),
    UpdateEntity(EntityId, Option<FieldMap>, Option<FieldMap>),
    DeleteEntity(EntityId),
    ListEntities(EntityType),
}

impl Call {
    pub fn name(&self) -> &'static str {
        match self {
            Self::FieldDefinitions(_) => "field_definitions",
            Self::CreateFieldDefinition(_) => "create_field_definition",
            Self::UpdateFieldDefinition(..) => "update_field_definition",
            Self::DeleteFieldDefinition(_) => "delete_field_definition",
            Self::FieldValues(..) => "field_values",
            Self::UpsertFieldValues(..) => "upsert_field_values",
            Self::CreateEntity(..) => "create_entity",
            Self::UpdateEntity(..) => "update_entity",
            Self::DeleteEntity(_) => "delete_entity",
            Self::ListEntities(_) => "list_entities",
        }
    }
}

pub fn remote_error(e: StorageError) -> RemoteError {
    match e {
        StorageError::DuplicateName { name, .. } => RemoteError::DuplicateName(name),
        StorageError::InvalidName { name, reason } => {
            RemoteError::InvalidName(format!("{name}: {reason}"))
        }
        StorageError::Core(CoreError::DuplicateFieldName { name, .. }) => {
            RemoteError::DuplicateName(name)
        }
        StorageError::Core(CoreError::InvalidFieldName { name, reason }) => {
            RemoteError::InvalidName(format!("{name}: {reason}"))
        }
        StorageError::InUse { .. } => RemoteError::InUse,
        StorageError::NotFound(what) => RemoteError::NotFound(what),
        StorageError::MissingEntity(id) => RemoteError::NotFound(format!("entity {id}")),
        other => RemoteError::Transient(other.to_string()),
    }
}

/// The registry and value store served from an in-process SQLite database.
/// Records every call and can be told to fail the next call of a kind.
pub struct LocalRemote {
    store: Mutex<SqliteStorage>,
    calls: Mutex<Vec<Call>>,
    failures: Mutex<Vec<(&'static str, RemoteError)>>,
}

impl LocalRemote {
    pub fn new(store: SqliteStorage) -> Self {
        Self {
            store: Mutex::new(store),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
        }
    }

    pub fn in_memory() -> Result<Self, StorageError> {
        Ok(Self::new(SqliteStorage::open_in_memory()?))
    }

    pub fn open(path: &str) -> Result<Self, StorageError> {
        Ok(Self::new(SqliteStorage::open(path)?))
    }

    fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, RemoteError> {
        mutex
            .lock()
            .map_err(|_| RemoteError::Transient("local store lock poisoned".into()))
    }

    /// Direct access to the store, bypassing the call log.
    pub fn with_store<T>(
        &self,
        op: impl FnOnce(&mut SqliteStorage) -> Result<T, StorageError>,
    ) -> Result<T, RemoteError> {
        let mut store = Self::lock(&self.store)?;
        op(&mut *store).map_err(remote_error)
    }

    /// Makes the next call named `call` fail with `error`.
    pub fn fail_next(&self, call: &'static str, error: RemoteError) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push((call, error));
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn calls_named(&self, name: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.name() == name).collect()
    }

    pub fn clear_calls(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }

    fn run<T>(
        &self,
        call: Call,
        op: impl FnOnce(&mut SqliteStorage) -> Result<T, StorageError>,
    ) -> Result<T, RemoteError> {
        let name = call.name();
        Self::lock(&self.calls)?.push(call);
        {
            let mut failures = Self::lock(&self.failures)?;
            if let Some(index) = failures.iter().position(|(n, _)| *n == name) {
                let (_, error) = failures.remove(index);
                tracing::debug!(call = name, error = %error, "injected failure");
                return Err(error);
            }
        }
        self.with_store(op)
    }

    // ========================================================================
    // Synchronous contract
    // ========================================================================

    pub fn get_field_definitions(&self, entity_type: EntityType) -> Result<Vec<FieldDefinition>, RemoteError> {
        self.run(Call::FieldDefinitions(entity_type), |s| s.field_definitions(entity_type))
    }

    pub fn post_field_definition(&self, def: NewFieldDefinition) -> Result<FieldDefinition, RemoteError> {
        self.run(Call::CreateFieldDefinition(def.clone()), |s| s.create_field_definition(&def))
    }

    pub fn put_field_definition(
        &self,
        id: DefinitionId,
        patch: FieldDefinitionPatch,
    ) -> Result<FieldDefinition, RemoteError> {
        self.run(Call::UpdateFieldDefinition(id, patch.clone()), |s| {
            s.update_field_definition(id, &patch)
        })
    }

    pub fn remove_field_definition(&self, id: DefinitionId) -> Result<(), RemoteError> {
        self.run(Call::DeleteFieldDefinition(id), |s| s.delete_field_definition(id))
    }

    pub fn get_field_values(
        &self,
        entity_type: EntityType,
        entity_id: Option<EntityId>,
    ) -> Result<Vec<FieldValueRecord>, RemoteError> {
        self.run(Call::FieldValues(entity_type, entity_id), |s| {
            s.field_values(entity_type, entity_id)
        })
    }

    pub fn post_field_values(
        &self,
        entity_type: EntityType,
        entity_id: EntityId,
        values: FieldMap,
    ) -> Result<(), RemoteError> {
        self.run(Call::UpsertFieldValues(entity_id, values.clone()), |s| {
            s.upsert_field_values(entity_type, entity_id, &values)
        })
    }

    pub fn post_entity(
        &self,
        entity_type: EntityType,
        standard: FieldMap,
        custom: FieldMap,
    ) -> Result<EntityRecord, RemoteError> {
        self.run(Call::CreateEntity(standard.clone(), custom.clone()), |s| {
            s.create_entity(entity_type, &standard, &custom)
        })
    }

    pub fn put_entity(
        &self,
        id: EntityId,
        standard: Option<FieldMap>,
        custom: Option<FieldMap>,
    ) -> Result<EntityRecord, RemoteError> {
        self.run(Call::UpdateEntity(id, standard.clone(), custom.clone()), |s| {
            s.update_entity(id, standard.as_ref(), custom.as_ref())
        })
    }

    pub fn remove_entity(&self, id: EntityId) -> Result<(), RemoteError> {
        self.run(Call::DeleteEntity(id), |s| s.delete_entity(id))
    }

    pub fn get_entities(&self, entity_type: EntityType) -> Result<Vec<EntityRecord>, RemoteError> {
        self.run(Call::ListEntities(entity_type), |s| s.list_entities(entity_type))
    }

    /// Answers a reconciler request without an async runtime.
    pub fn respond(&self, request: Request) -> Result<Response, RemoteError> {
        let entity_type = request.entity_type;
        match request.kind {
            RequestKind::FetchFieldDefinitions => self
                .get_field_definitions(entity_type)
                .map(Response::FieldDefinitions),
            RequestKind::CreateFieldDefinition(def) => {
                self.post_field_definition(def).map(Response::FieldDefinition)
            }
            RequestKind::UpdateFieldDefinition { id, patch } => {
                self.put_field_definition(id, patch).map(Response::FieldDefinition)
            }
            RequestKind::DeleteFieldDefinition(id) => {
                self.remove_field_definition(id).map(|()| Response::Done)
            }
            RequestKind::FetchRows => self.get_entities(entity_type).map(Response::Rows),
            RequestKind::CreateEntity { standard, custom } => self
                .post_entity(entity_type, standard, custom)
                .map(Response::Entity),
            RequestKind::UpdateEntity {
                id,
                standard,
                custom,
            } => self.put_entity(id, standard, custom).map(Response::Entity),
            RequestKind::UpsertFieldValues { id, values } => self
                .post_field_values(entity_type, id, values)
                .map(|()| Response::Done),
            RequestKind::DeleteEntity(id) => self.remove_entity(id).map(|()| Response::Done),
        }
    }
}

#[async_trait]
impl Remote for LocalRemote {
    async fn field_definitions(&self, entity_type: EntityType) -> Result<Vec<FieldDefinition>, RemoteError> {
        self.get_field_definitions(entity_type)
    }

    async fn create_field_definition(&self, def: NewFieldDefinition) -> Result<FieldDefinition, RemoteError> {
        self.post_field_definition(def)
    }

    async fn update_field_definition(
        &self,
        id: DefinitionId,
        patch: FieldDefinitionPatch,
    ) -> Result<FieldDefinition, RemoteError> {
        self.put_field_definition(id, patch)
    }

    async fn delete_field_definition(&self, id: DefinitionId) -> Result<(), RemoteError> {
        self.remove_field_definition(id)
    }

    async fn field_values(
        &self,
        entity_type: EntityType,
        entity_id: Option<EntityId>,
    ) -> Result<Vec<FieldValueRecord>, RemoteError> {
        self.get_field_values(entity_type, entity_id)
    }

    async fn upsert_field_values(
        &self,
        entity_type: EntityType,
        entity_id: EntityId,
        values: FieldMap,
    ) -> Result<(), RemoteError> {
        self.post_field_values(entity_type, entity_id, values)
    }

    async fn create_entity(
        &self,
        entity_type: EntityType,
        standard: FieldMap,
        custom: FieldMap,
    ) -> Result<EntityRecord, RemoteError> {
        self.post_entity(entity_type, standard, custom)
    }

    async fn update_entity(
        &self,
        id: EntityId,
        standard: Option<FieldMap>,
        custom: Option<FieldMap>,
    ) -> Result<EntityRecord, RemoteError> {
        self.put_entity(id, standard, custom)
    }

    async fn delete_entity(&self, id: EntityId) -> Result<(), RemoteError> {
        self.remove_entity(id)
    }

    async fn list_entities(&self, entity_type: EntityType) -> Result<Vec<EntityRecord>, RemoteError> {
        self.get_entities(entity_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldgrid_core::{CellValue, FieldType};

    #[test]
    fn storage_errors_keep_their_category() -> Result<(), Box<dyn std::error::Error>> {
        let remote = LocalRemote::in_memory()?;
        let def = NewFieldDefinition::custom(EntityType::Shop, "cf_floor", "Floor", FieldType::Number);
        let created = remote.post_field_definition(def.clone())?;

        assert!(matches!(remote.post_field_definition(def), Err(RemoteError::DuplicateName(_))));
        let bad = NewFieldDefinition::custom(EntityType::Shop, "floor", "Floor", FieldType::Number);
        assert!(matches!(remote.post_field_definition(bad), Err(RemoteError::InvalidName(_))));

        let shop = remote.post_entity(EntityType::Shop, FieldMap::new(), FieldMap::new())?;
        let values = FieldMap::from([("cf_floor".to_string(), CellValue::Number(2.0))]);
        remote.post_field_values(EntityType::Shop, shop.id, values)?;
        assert_eq!(remote.remove_field_definition(created.id), Err(RemoteError::InUse));
        assert!(matches!(remote.remove_entity(EntityId::new(999)), Err(RemoteError::NotFound(_))));
        Ok(())
    }

    #[test]
    fn injected_failures_fire_once_and_are_logged() -> Result<(), Box<dyn std::error::Error>> {
        let remote = LocalRemote::in_memory()?;
        remote.fail_next("list_entities", RemoteError::Transient("offline".into()));
        assert!(remote.get_entities(EntityType::Shop).is_err());
        assert!(remote.get_entities(EntityType::Shop)?.is_empty());
        assert_eq!(remote.calls_named("list_entities").len(), 2);
        Ok(())
    }
}
