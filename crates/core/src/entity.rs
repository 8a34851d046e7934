use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::cell_value::CellValue;
use crate::error::CoreError;
use crate::ids::{DefinitionId, EntityId, ValueId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Shop,
    License,
    LicenseCategory,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shop => "shop",
            Self::License => "license",
            Self::LicenseCategory => "license_category",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "shop" => Ok(Self::Shop),
            "license" => Ok(Self::License),
            "license_category" => Ok(Self::LicenseCategory),
            _ => Err(CoreError::UnknownEntityType(s.to_string())),
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attribute values keyed by field name.
pub type FieldMap = BTreeMap<String, CellValue>;

/// One entity-attribute-value triple for a custom field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldValueRecord {
    pub id: ValueId,
    pub field_definition_id: DefinitionId,
    pub entity_type: EntityType,
    pub entity_id: EntityId,
    pub value: CellValue,
}

/// A fixed-schema row plus its custom values, keyed by field name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: EntityId,
    pub entity_type: EntityType,
    pub standard: FieldMap,
    pub custom: FieldMap,
}

impl EntityRecord {
    pub fn new(id: EntityId, entity_type: EntityType) -> Self {
        Self {
            id,
            entity_type,
            standard: BTreeMap::new(),
            custom: BTreeMap::new(),
        }
    }

    /// Merges custom values into the standard attributes. A custom value never
    /// replaces a standard attribute of the same name.
    pub fn flatten(&self) -> FieldMap {
        let mut flat = self.standard.clone();
        for (name, value) in &self.custom {
            flat.entry(name.clone()).or_insert_with(|| value.clone());
        }
        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_keeps_standard_attributes_on_collision() {
        let mut record = EntityRecord::new(EntityId::new(1), EntityType::Shop);
        record.standard.insert("name".into(), "Corner Shop".into());
        record.custom.insert("name".into(), "shadow".into());
        record.custom.insert("cf_floor".into(), CellValue::Number(2.0));

        let flat = record.flatten();
        assert_eq!(flat.get("name"), Some(&CellValue::from("Corner Shop")));
        assert_eq!(flat.get("cf_floor"), Some(&CellValue::Number(2.0)));
        assert_eq!(flat.len(), 2);
    }

    #[test]
    fn entity_type_names_round_trip() {
        for entity_type in [EntityType::Shop, EntityType::License, EntityType::LicenseCategory] {
            assert_eq!(EntityType::parse(entity_type.as_str()).unwrap(), entity_type);
        }
    }
}
