use fieldgrid_core::{
    DefinitionId, EntityId, EntityRecord, EntityType, FieldDefinition, FieldDefinitionPatch,
    FieldValueRecord, NewFieldDefinition,
};

use crate::error::StorageError;

pub use fieldgrid_core::FieldMap;

/// Catalog of fields per entity type.
pub trait FieldDefinitionRegistry {
    fn field_definitions(
        &self,
        entity_type: EntityType,
    ) -> Result<Vec<FieldDefinition>, StorageError>;

    /// Fails with `DuplicateName` or `InvalidName` when the name is rejected.
    fn create_field_definition(
        &mut self,
        def: &NewFieldDefinition,
    ) -> Result<FieldDefinition, StorageError>;

    fn update_field_definition(
        &mut self,
        id: DefinitionId,
        patch: &FieldDefinitionPatch,
    ) -> Result<FieldDefinition, StorageError>;

    /// Fails with `InUse` while non-null values reference the definition;
    /// stored values are never dropped as a side effect.
    fn delete_field_definition(&mut self, id: DefinitionId) -> Result<(), StorageError>;
}

/// Fixed-schema entity rows plus entity-attribute-value custom fields.
pub trait ValueStore {
    fn field_values(
        &self,
        entity_type: EntityType,
        entity_id: Option<EntityId>,
    ) -> Result<Vec<FieldValueRecord>, StorageError>;

    /// Upserts one value per named field. Names without an active definition
    /// are skipped.
    fn upsert_field_values(
        &mut self,
        entity_type: EntityType,
        entity_id: EntityId,
        values: &FieldMap,
    ) -> Result<(), StorageError>;

    fn create_entity(
        &mut self,
        entity_type: EntityType,
        standard: &FieldMap,
        custom: &FieldMap,
    ) -> Result<EntityRecord, StorageError>;

    fn update_entity(
        &mut self,
        id: EntityId,
        standard: Option<&FieldMap>,
        custom: Option<&FieldMap>,
    ) -> Result<EntityRecord, StorageError>;

    /// Deletes the entity and cascades its field values.
    fn delete_entity(&mut self, id: EntityId) -> Result<(), StorageError>;

    fn get_entity(&self, id: EntityId) -> Result<Option<EntityRecord>, StorageError>;

    /// All entities of a type in id order, custom values resolved by name.
    fn list_entities(&self, entity_type: EntityType) -> Result<Vec<EntityRecord>, StorageError>;
}
