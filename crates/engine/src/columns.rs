//! Column model: merges compiled-in system columns with the field
//! definitions fetched from the registry.

use std::collections::{HashMap, HashSet};

use fieldgrid_core::{DefinitionId, EntityType, FieldDefinition, FieldType};

use crate::config::GridConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Center,
    Right,
}

impl Align {
    pub fn for_type(field_type: FieldType) -> Self {
        match field_type {
            FieldType::Number => Self::Right,
            FieldType::Date => Self::Center,
            _ => Self::Left,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GridColumn {
    /// Attribute key in rows. Survives renames.
    pub id: String,
    pub name: String,
    pub width: u32,
    pub align: Align,
    pub column_type: FieldType,
    pub options: Option<Vec<String>>,
    pub is_custom: bool,
    pub is_system: bool,
    /// Registry id used to persist label/type changes. `None` for system
    /// columns with no backing definition and for custom columns whose
    /// creation has not been confirmed yet.
    pub definition_id: Option<DefinitionId>,
    pub display_order: Option<i32>,
    pub editable: bool,
    pub badge: bool,
    /// Name of a formatter in the strategy table that overrides the type default.
    pub formatter: Option<String>,
}

impl GridColumn {
    pub fn custom(id: &str, name: &str, column_type: FieldType, width: u32) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            width,
            align: Align::for_type(column_type),
            column_type,
            options: None,
            is_custom: true,
            is_system: false,
            definition_id: None,
            display_order: None,
            editable: true,
            badge: false,
            formatter: None,
        }
    }

    fn from_definition(def: &FieldDefinition, width: u32) -> Self {
        Self {
            options: def.field_options.clone(),
            definition_id: Some(def.id),
            display_order: Some(def.display_order),
            ..Self::custom(&def.field_name, &def.field_label, def.field_type, width)
        }
    }
}

/// A compiled-in column backed by a fixed entity attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemColumn {
    pub id: &'static str,
    pub name: &'static str,
    pub width: u32,
    pub column_type: FieldType,
    pub options: &'static [&'static str],
    pub editable: bool,
    pub badge: bool,
    pub formatter: Option<&'static str>,
}

impl SystemColumn {
    fn new(id: &'static str, name: &'static str, column_type: FieldType, width: u32) -> Self {
        Self {
            id,
            name,
            width,
            column_type,
            options: &[],
            editable: true,
            badge: false,
            formatter: None,
        }
    }

    fn badge(mut self, options: &'static [&'static str]) -> Self {
        self.options = options;
        self.badge = true;
        self
    }

    fn formatter(mut self, name: &'static str) -> Self {
        self.formatter = Some(name);
        self
    }

    fn read_only(mut self) -> Self {
        self.editable = false;
        self
    }

    fn to_column(&self) -> GridColumn {
        GridColumn {
            id: self.id.to_string(),
            name: self.name.to_string(),
            width: self.width,
            align: Align::for_type(self.column_type),
            column_type: self.column_type,
            options: (!self.options.is_empty())
                .then(|| self.options.iter().map(|o| o.to_string()).collect()),
            is_custom: false,
            is_system: true,
            definition_id: None,
            display_order: None,
            editable: self.editable,
            badge: self.badge,
            formatter: self.formatter.map(str::to_string),
        }
    }
}

pub const SHOP_STATUSES: &[&str] = &["active", "inactive", "suspended"];
pub const LICENSE_STATUSES: &[&str] = &["active", "pending", "expired", "revoked"];

/// Formatter names the default strategy table registers.
pub const SHOP_LINK: &str = "shop_link";
pub const CATEGORY_LINK: &str = "category_link";

pub fn system_columns(entity_type: EntityType) -> Vec<SystemColumn> {
    match entity_type {
        EntityType::Shop => vec![
            SystemColumn::new("name", "Shop Name", FieldType::Text, 200),
            SystemColumn::new("owner_name", "Owner", FieldType::Text, 160),
            SystemColumn::new("address", "Address", FieldType::Textarea, 240),
            SystemColumn::new("phone", "Phone", FieldType::Text, 130),
            SystemColumn::new("status", "Status", FieldType::Select, 110).badge(SHOP_STATUSES),
            SystemColumn::new("created_at", "Created", FieldType::Date, 120).read_only(),
        ],
        EntityType::License => vec![
            SystemColumn::new("license_number", "License No.", FieldType::Text, 140),
            SystemColumn::new("shop_id", "Shop", FieldType::Number, 180).formatter(SHOP_LINK),
            SystemColumn::new("category_id", "Category", FieldType::Number, 160)
                .formatter(CATEGORY_LINK),
            SystemColumn::new("issue_date", "Issued", FieldType::Date, 120),
            SystemColumn::new("expiry_date", "Expires", FieldType::Date, 120),
            SystemColumn::new("status", "Status", FieldType::Select, 110).badge(LICENSE_STATUSES),
        ],
        EntityType::LicenseCategory => vec![
            SystemColumn::new("name", "Category", FieldType::Text, 200),
            SystemColumn::new("description", "Description", FieldType::Textarea, 280),
            SystemColumn::new("fee", "Fee", FieldType::Number, 100),
        ],
    }
}

/// One system column of an entity type, without registry overrides.
pub fn system_column(entity_type: EntityType, id: &str) -> Option<GridColumn> {
    system_columns(entity_type)
        .iter()
        .find(|t| t.id == id)
        .map(SystemColumn::to_column)
}

/// Builds the ordered column list.
///
/// Definitions that are inactive or hidden from tables are dropped. A system
/// template takes label, order and registry id from a matching system
/// definition; a custom definition reusing a system column id is dropped.
/// Ordering is by `display_order`, template position when a system column
/// has no definition, then by id.
pub fn build_columns(
    templates: &[SystemColumn],
    definitions: &[FieldDefinition],
    config: &GridConfig,
) -> Vec<GridColumn> {
    let system_ids: HashSet<&str> = templates.iter().map(|t| t.id).collect();
    let by_name: HashMap<&str, &FieldDefinition> = definitions
        .iter()
        .map(|d| (d.field_name.as_str(), d))
        .collect();

    let mut keyed: Vec<(i64, GridColumn)> = Vec::new();

    for (position, template) in templates.iter().enumerate() {
        let mut column = template.to_column();
        match by_name.get(template.id) {
            Some(def) if def.is_system_field => {
                if !def.is_active || !def.show_in_table {
                    continue;
                }
                column.name = def.field_label.clone();
                column.definition_id = Some(def.id);
                column.display_order = Some(def.display_order);
                if def.field_options.is_some() {
                    column.options = def.field_options.clone();
                }
            }
            _ => {}
        }
        let order = column.display_order.map(i64::from).unwrap_or(position as i64);
        keyed.push((order, column));
    }

    for def in definitions {
        if !def.is_active || !def.show_in_table {
            continue;
        }
        if system_ids.contains(def.field_name.as_str()) {
            if !def.is_system_field {
                tracing::warn!(field = %def.field_name, "custom definition shadows a system column, ignoring");
            }
            continue;
        }
        if def.is_system_field {
            tracing::debug!(field = %def.field_name, "system definition without a compiled-in column");
        }
        let column = GridColumn::from_definition(def, config.default_column_width);
        keyed.push((i64::from(def.display_order), column));
    }

    keyed.sort_by(|(a_order, a), (b_order, b)| a_order.cmp(b_order).then_with(|| a.id.cmp(&b.id)));
    keyed.into_iter().map(|(_, column)| column).collect()
}

/// Order value that places a new column after every existing one.
pub fn next_display_order(columns: &[GridColumn]) -> i32 {
    columns
        .iter()
        .enumerate()
        .map(|(position, c)| c.display_order.unwrap_or(position as i32))
        .max()
        .map_or(0, |max| max + 1)
}

/// Keeps user-adjusted widths across a recomputation, matching columns by
/// registry id first and attribute key second.
pub fn carry_over_widths(previous: &[GridColumn], next: &mut [GridColumn]) {
    for column in next.iter_mut() {
        let old = previous
            .iter()
            .find(|p| p.definition_id.is_some() && p.definition_id == column.definition_id)
            .or_else(|| previous.iter().find(|p| p.id == column.id));
        if let Some(old) = old {
            column.width = old.width;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(id: i64, name: &str, order: i32) -> FieldDefinition {
        FieldDefinition {
            id: DefinitionId::new(id),
            entity_type: EntityType::Shop,
            field_name: name.to_string(),
            field_label: format!("Label {name}"),
            field_type: FieldType::Text,
            field_options: None,
            display_order: order,
            is_active: true,
            is_system_field: false,
            show_in_table: true,
            show_in_form: true,
        }
    }

    fn ids(columns: &[GridColumn]) -> Vec<&str> {
        columns.iter().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn templates_alone_keep_their_positions() {
        let columns = build_columns(&system_columns(EntityType::LicenseCategory), &[], &GridConfig::default());
        assert_eq!(ids(&columns), ["name", "description", "fee"]);
        assert!(columns.iter().all(|c| c.is_system && !c.is_custom));
        assert_eq!(columns[2].align, Align::Right);
    }

    #[test]
    fn system_definition_overrides_label_and_order() {
        let mut fee = def(7, "fee", -1);
        fee.is_system_field = true;
        fee.field_label = "Annual Fee".into();
        let columns = build_columns(&system_columns(EntityType::LicenseCategory), &[fee], &GridConfig::default());
        assert_eq!(ids(&columns), ["fee", "name", "description"]);
        assert_eq!(columns[0].name, "Annual Fee");
        assert_eq!(columns[0].definition_id, Some(DefinitionId::new(7)));
        assert!(columns[0].is_system);
    }

    #[test]
    fn custom_definitions_are_filtered_and_ordered() {
        let templates = system_columns(EntityType::LicenseCategory);
        let mut inactive = def(1, "cf_old", 10);
        inactive.is_active = false;
        let mut hidden = def(2, "cf_hidden", 10);
        hidden.show_in_table = false;
        let shadow = def(3, "name", 0);
        let defs = vec![def(4, "cf_b", 5), def(5, "cf_a", 5), inactive, hidden, shadow];

        let columns = build_columns(&templates, &defs, &GridConfig::default());
        assert_eq!(ids(&columns), ["name", "description", "fee", "cf_a", "cf_b"]);
        let name = &columns[0];
        assert_eq!(name.name, "Category");
        assert_eq!(name.definition_id, None);
        let custom = &columns[3];
        assert!(custom.is_custom && !custom.is_system);
        assert_eq!(custom.width, GridConfig::default().default_column_width);
    }

    #[test]
    fn next_order_is_trailing() {
        let templates = system_columns(EntityType::LicenseCategory);
        let columns = build_columns(&templates, &[def(1, "cf_x", 9)], &GridConfig::default());
        assert_eq!(next_display_order(&columns), 10);
        assert_eq!(next_display_order(&[]), 0);
    }

    #[test]
    fn widths_survive_rename_and_recompute() {
        let config = GridConfig::default();
        let templates = system_columns(EntityType::Shop);
        let mut before = build_columns(&templates, &[def(1, "cf_floor", 50)], &config);
        before.iter_mut().for_each(|c| c.width = 77);

        let mut renamed = def(1, "cf_floor", 50);
        renamed.field_label = "Storey".into();
        let mut after = build_columns(&templates, &[renamed], &config);
        carry_over_widths(&before, &mut after);
        assert!(after.iter().all(|c| c.width == 77));
        assert_eq!(after.last().map(|c| c.name.as_str()), Some("Storey"));
    }
}
