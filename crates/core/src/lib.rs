pub mod cell_value;
pub mod entity;
pub mod error;
pub mod field_def;
pub mod ids;

pub use cell_value::CellValue;
pub use entity::{EntityRecord, EntityType, FieldMap, FieldValueRecord};
pub use error::CoreError;
pub use field_def::{FieldDefinition, FieldDefinitionPatch, FieldType, NewFieldDefinition};
pub use ids::*;
