use fieldgrid_core::{DefinitionId, EntityId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate field name {name:?} for {entity_type}")]
    DuplicateName { entity_type: String, name: String },

    #[error("invalid field name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    #[error("field definition {definition_id} still has {values} stored values")]
    InUse {
        definition_id: DefinitionId,
        values: usize,
    },

    #[error("entity {0} does not exist")]
    MissingEntity(EntityId),

    #[error("core error: {0}")]
    Core(#[from] fieldgrid_core::CoreError),
}
