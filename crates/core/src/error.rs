use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid field name {name:?}: {reason}")]
    InvalidFieldName { name: String, reason: String },

    #[error("duplicate field name {name:?} for {entity_type}")]
    DuplicateFieldName { entity_type: String, name: String },

    #[error("invalid {field_type} value {input:?}")]
    InvalidValue { field_type: String, input: String },

    #[error("unknown field type: {0}")]
    UnknownFieldType(String),

    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),

    #[error("invalid data: {0}")]
    InvalidData(String),
}
