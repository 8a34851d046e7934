use serde::{Deserialize, Serialize};
use std::fmt;

use crate::entity::EntityType;
use crate::error::CoreError;
use crate::ids::DefinitionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Number,
    Date,
    Select,
    Textarea,
}

impl FieldType {
    pub const ALL: [FieldType; 5] = [
        Self::Text,
        Self::Number,
        Self::Date,
        Self::Select,
        Self::Textarea,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Number => "number",
            Self::Date => "date",
            Self::Select => "select",
            Self::Textarea => "textarea",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "text" => Ok(Self::Text),
            "number" => Ok(Self::Number),
            "date" => Ok(Self::Date),
            "select" => Ok(Self::Select),
            "textarea" => Ok(Self::Textarea),
            _ => Err(CoreError::UnknownFieldType(s.to_string())),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub id: DefinitionId,
    pub entity_type: EntityType,
    pub field_name: String,
    pub field_label: String,
    pub field_type: FieldType,
    pub field_options: Option<Vec<String>>,
    pub display_order: i32,
    pub is_active: bool,
    pub is_system_field: bool,
    pub show_in_table: bool,
    pub show_in_form: bool,
}

/// Creation payload. The registry assigns the id, and a trailing
/// `display_order` when none is given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFieldDefinition {
    pub entity_type: EntityType,
    pub field_name: String,
    pub field_label: String,
    pub field_type: FieldType,
    pub field_options: Option<Vec<String>>,
    pub display_order: Option<i32>,
    pub is_system_field: bool,
}

impl NewFieldDefinition {
    pub fn custom(entity_type: EntityType, field_name: &str, label: &str, field_type: FieldType) -> Self {
        Self {
            entity_type,
            field_name: field_name.to_string(),
            field_label: label.to_string(),
            field_type,
            field_options: None,
            display_order: None,
            is_system_field: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinitionPatch {
    pub field_label: Option<String>,
    pub field_type: Option<FieldType>,
    pub field_options: Option<Vec<String>>,
    pub display_order: Option<i32>,
    pub is_active: Option<bool>,
}

impl FieldDefinitionPatch {
    pub fn label(label: &str) -> Self {
        Self {
            field_label: Some(label.to_string()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.field_label.is_none()
            && self.field_type.is_none()
            && self.field_options.is_none()
            && self.display_order.is_none()
            && self.is_active.is_none()
    }

    pub fn apply_to(&self, def: &mut FieldDefinition) {
        if let Some(label) = &self.field_label {
            def.field_label = label.clone();
        }
        if let Some(field_type) = self.field_type {
            def.field_type = field_type;
        }
        if let Some(options) = &self.field_options {
            def.field_options = Some(options.clone());
        }
        if let Some(order) = self.display_order {
            def.display_order = order;
        }
        if let Some(active) = self.is_active {
            def.is_active = active;
        }
    }
}

/// Checks a custom field name against the naming rules shared by the grid and
/// the registry: reserved prefix, a non-empty `[a-z0-9_]` remainder, no clash
/// with a system field, unique within the entity type.
pub fn validate_custom_field_name<'a>(
    entity_type: EntityType,
    name: &str,
    prefix: &str,
    system_names: impl IntoIterator<Item = &'a str>,
    existing: impl IntoIterator<Item = &'a str>,
) -> Result<(), CoreError> {
    let invalid = |reason: &str| CoreError::InvalidFieldName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let Some(rest) = name.strip_prefix(prefix) else {
        return Err(invalid(&format!("custom fields must start with {prefix:?}")));
    };
    if rest.is_empty() {
        return Err(invalid("name is empty after the prefix"));
    }
    if !rest
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(invalid("only lowercase letters, digits and '_' are allowed"));
    }
    if system_names.into_iter().any(|s| s == name) {
        return Err(invalid("name is reserved by a system field"));
    }
    if existing.into_iter().any(|s| s == name) {
        return Err(CoreError::DuplicateFieldName {
            entity_type: entity_type.as_str().to_string(),
            name: name.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_type_names_round_trip() {
        for field_type in FieldType::ALL {
            assert_eq!(FieldType::parse(field_type.as_str()).unwrap(), field_type);
        }
        assert!(FieldType::parse("checkbox").is_err());
    }

    #[test]
    fn custom_names_need_prefix_and_uniqueness() {
        let system = ["name", "status"];
        let existing = ["cf_owner"];
        let check = |name: &str| {
            validate_custom_field_name(EntityType::Shop, name, "cf_", system, existing)
        };

        assert!(check("cf_location").is_ok());
        assert!(matches!(check("location"), Err(CoreError::InvalidFieldName { .. })));
        assert!(matches!(check("cf_"), Err(CoreError::InvalidFieldName { .. })));
        assert!(matches!(check("cf_Bad Name"), Err(CoreError::InvalidFieldName { .. })));
        assert!(matches!(check("cf_owner"), Err(CoreError::DuplicateFieldName { .. })));
    }

    #[test]
    fn prefixed_system_name_is_rejected() {
        let result = validate_custom_field_name(EntityType::License, "cf_x", "cf_", ["cf_x"], std::iter::empty());
        assert!(matches!(result, Err(CoreError::InvalidFieldName { .. })));
    }
}
