use std::collections::{BTreeMap, HashMap};

use rusqlite::{Connection, OptionalExtension};

use fieldgrid_core::{
    CellValue, CoreError, DefinitionId, EntityId, EntityRecord, EntityType, FieldDefinition,
    FieldDefinitionPatch, FieldType, FieldValueRecord, NewFieldDefinition, ValueId,
    field_def::validate_custom_field_name,
};

use crate::error::StorageError;
use crate::traits::{FieldDefinitionRegistry, FieldMap, ValueStore};

pub const DEFAULT_CUSTOM_PREFIX: &str = "cf_";

const DEFINITION_COLUMNS: &str = "definition_id, entity_type, field_name, field_label, field_type, field_options, display_order, is_active, is_system_field, show_in_table, show_in_form";

fn encode(value: &CellValue) -> Result<Vec<u8>, StorageError> {
    value
        .to_msgpack()
        .map_err(|e| StorageError::Serialization(e.to_string()))
}

fn decode(bytes: &[u8]) -> Result<CellValue, StorageError> {
    CellValue::from_msgpack(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Row image of `field_definitions`, decoded outside the rusqlite closure.
struct RawDefinition {
    id: i64,
    entity_type: String,
    field_name: String,
    field_label: String,
    field_type: String,
    field_options: Option<Vec<u8>>,
    display_order: i32,
    is_active: bool,
    is_system_field: bool,
    show_in_table: bool,
    show_in_form: bool,
}

fn raw_definition(row: &rusqlite::Row) -> rusqlite::Result<RawDefinition> {
    Ok(RawDefinition {
        id: row.get(0)?,
        entity_type: row.get(1)?,
        field_name: row.get(2)?,
        field_label: row.get(3)?,
        field_type: row.get(4)?,
        field_options: row.get(5)?,
        display_order: row.get(6)?,
        is_active: row.get(7)?,
        is_system_field: row.get(8)?,
        show_in_table: row.get(9)?,
        show_in_form: row.get(10)?,
    })
}

impl RawDefinition {
    fn into_definition(self) -> Result<FieldDefinition, StorageError> {
        let field_options = match self.field_options {
            Some(bytes) => Some(
                rmp_serde::from_slice::<Vec<String>>(&bytes)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?,
            ),
            None => None,
        };
        Ok(FieldDefinition {
            id: DefinitionId::new(self.id),
            entity_type: EntityType::parse(&self.entity_type)?,
            field_name: self.field_name,
            field_label: self.field_label,
            field_type: FieldType::parse(&self.field_type)?,
            field_options,
            display_order: self.display_order,
            is_active: self.is_active,
            is_system_field: self.is_system_field,
            show_in_table: self.show_in_table,
            show_in_form: self.show_in_form,
        })
    }
}

fn encode_options(options: &Option<Vec<String>>) -> Result<Option<Vec<u8>>, StorageError> {
    options
        .as_ref()
        .map(|o| rmp_serde::to_vec(o).map_err(|e| StorageError::Serialization(e.to_string())))
        .transpose()
}

fn write_standard(
    tx: &rusqlite::Transaction,
    entity_id: EntityId,
    standard: &FieldMap,
) -> Result<(), StorageError> {
    for (key, value) in standard {
        tx.execute(
            "INSERT INTO entity_fields (entity_id, field_key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(entity_id, field_key) DO UPDATE SET value = excluded.value",
            rusqlite::params![entity_id.get(), key, encode(value)?],
        )?;
    }
    Ok(())
}

fn write_custom(
    tx: &rusqlite::Transaction,
    definitions: &HashMap<String, FieldDefinition>,
    entity_type: EntityType,
    entity_id: EntityId,
    custom: &FieldMap,
) -> Result<(), StorageError> {
    for (name, value) in custom {
        let Some(def) = definitions.get(name) else {
            tracing::warn!(field = %name, %entity_type, entity = %entity_id, "skipping value for unknown field");
            continue;
        };
        tx.execute(
            "INSERT INTO field_values (field_definition_id, entity_type, entity_id, value) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(field_definition_id, entity_id) DO UPDATE SET value = excluded.value",
            rusqlite::params![def.id.get(), entity_type.as_str(), entity_id.get(), encode(value)?],
        )?;
    }
    Ok(())
}

pub struct SqliteStorage {
    conn: Connection,
    custom_prefix: String,
}

impl SqliteStorage {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self {
            conn,
            custom_prefix: DEFAULT_CUSTOM_PREFIX.to_string(),
        })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self {
            conn,
            custom_prefix: DEFAULT_CUSTOM_PREFIX.to_string(),
        })
    }

    pub fn with_custom_prefix(mut self, prefix: &str) -> Self {
        self.custom_prefix = prefix.to_string();
        self
    }

    pub fn custom_prefix(&self) -> &str {
        &self.custom_prefix
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    fn get_definition(&self, id: DefinitionId) -> Result<Option<FieldDefinition>, StorageError> {
        let raw = self
            .conn
            .query_row(
                &format!("SELECT {DEFINITION_COLUMNS} FROM field_definitions WHERE definition_id = ?1"),
                rusqlite::params![id.get()],
                raw_definition,
            )
            .optional()?;
        raw.map(RawDefinition::into_definition).transpose()
    }

    /// Active definitions of an entity type keyed by field name.
    fn active_definitions(
        &self,
        entity_type: EntityType,
    ) -> Result<HashMap<String, FieldDefinition>, StorageError> {
        Ok(self
            .field_definitions(entity_type)?
            .into_iter()
            .filter(|d| d.is_active)
            .map(|d| (d.field_name.clone(), d))
            .collect())
    }

    fn entity_type_of(&self, id: EntityId) -> Result<Option<EntityType>, StorageError> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT entity_type FROM entities WHERE entity_id = ?1",
                rusqlite::params![id.get()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw.map(|s| EntityType::parse(&s)).transpose()?)
    }

    fn stored_values(&self, id: DefinitionId) -> Result<Vec<CellValue>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM field_values WHERE field_definition_id = ?1")?;
        let rows = stmt
            .query_map(rusqlite::params![id.get()], |row| row.get::<_, Vec<u8>>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter().map(|bytes| decode(bytes)).collect()
    }
}

impl FieldDefinitionRegistry for SqliteStorage {
    fn field_definitions(
        &self,
        entity_type: EntityType,
    ) -> Result<Vec<FieldDefinition>, StorageError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {DEFINITION_COLUMNS} FROM field_definitions WHERE entity_type = ?1 ORDER BY display_order, field_name"
        ))?;
        let raws = stmt
            .query_map(rusqlite::params![entity_type.as_str()], raw_definition)?
            .collect::<Result<Vec<_>, _>>()?;
        raws.into_iter().map(RawDefinition::into_definition).collect()
    }

    fn create_field_definition(
        &mut self,
        def: &NewFieldDefinition,
    ) -> Result<FieldDefinition, StorageError> {
        let existing = self.field_definitions(def.entity_type)?;

        if def.is_system_field {
            if existing.iter().any(|d| d.field_name == def.field_name) {
                return Err(StorageError::DuplicateName {
                    entity_type: def.entity_type.as_str().to_string(),
                    name: def.field_name.clone(),
                });
            }
        } else {
            validate_custom_field_name(
                def.entity_type,
                &def.field_name,
                &self.custom_prefix,
                existing
                    .iter()
                    .filter(|d| d.is_system_field)
                    .map(|d| d.field_name.as_str()),
                existing.iter().map(|d| d.field_name.as_str()),
            )
            .map_err(|e| match e {
                CoreError::InvalidFieldName { name, reason } => {
                    StorageError::InvalidName { name, reason }
                }
                CoreError::DuplicateFieldName { entity_type, name } => {
                    StorageError::DuplicateName { entity_type, name }
                }
                other => StorageError::Core(other),
            })?;
        }

        let display_order = def.display_order.unwrap_or_else(|| {
            existing.iter().map(|d| d.display_order).max().unwrap_or(0) + 1
        });

        let result = self.conn.execute(
            "INSERT INTO field_definitions (entity_type, field_name, field_label, field_type, field_options, display_order, is_system_field) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                def.entity_type.as_str(),
                def.field_name,
                def.field_label,
                def.field_type.as_str(),
                encode_options(&def.field_options)?,
                display_order,
                def.is_system_field,
            ],
        );
        match result {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e) => {
                return Err(StorageError::DuplicateName {
                    entity_type: def.entity_type.as_str().to_string(),
                    name: def.field_name.clone(),
                });
            }
            Err(e) => return Err(StorageError::Sqlite(e)),
        }

        let id = DefinitionId::new(self.conn.last_insert_rowid());
        tracing::debug!(definition = %id, field = %def.field_name, entity_type = %def.entity_type, "created field definition");
        self.get_definition(id)?
            .ok_or_else(|| StorageError::NotFound(format!("field definition {id}")))
    }

    fn update_field_definition(
        &mut self,
        id: DefinitionId,
        patch: &FieldDefinitionPatch,
    ) -> Result<FieldDefinition, StorageError> {
        let mut def = self
            .get_definition(id)?
            .ok_or_else(|| StorageError::NotFound(format!("field definition {id}")))?;
        patch.apply_to(&mut def);
        self.conn.execute(
            "UPDATE field_definitions SET field_label = ?1, field_type = ?2, field_options = ?3, display_order = ?4, is_active = ?5 WHERE definition_id = ?6",
            rusqlite::params![
                def.field_label,
                def.field_type.as_str(),
                encode_options(&def.field_options)?,
                def.display_order,
                def.is_active,
                id.get(),
            ],
        )?;
        Ok(def)
    }

    fn delete_field_definition(&mut self, id: DefinitionId) -> Result<(), StorageError> {
        if self.get_definition(id)?.is_none() {
            return Err(StorageError::NotFound(format!("field definition {id}")));
        }
        let in_use = self
            .stored_values(id)?
            .iter()
            .filter(|v| !v.is_null())
            .count();
        if in_use > 0 {
            return Err(StorageError::InUse {
                definition_id: id,
                values: in_use,
            });
        }

        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM field_values WHERE field_definition_id = ?1",
            rusqlite::params![id.get()],
        )?;
        tx.execute(
            "DELETE FROM field_definitions WHERE definition_id = ?1",
            rusqlite::params![id.get()],
        )?;
        tx.commit()?;
        Ok(())
    }
}

impl ValueStore for SqliteStorage {
    fn field_values(
        &self,
        entity_type: EntityType,
        entity_id: Option<EntityId>,
    ) -> Result<Vec<FieldValueRecord>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT value_id, field_definition_id, entity_id, value FROM field_values
             WHERE entity_type = ?1 AND (?2 IS NULL OR entity_id = ?2)
             ORDER BY entity_id, field_definition_id",
        )?;
        let rows = stmt
            .query_map(
                rusqlite::params![entity_type.as_str(), entity_id.map(|id| id.get())],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                    ))
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(value_id, def_id, eid, bytes)| {
                Ok(FieldValueRecord {
                    id: ValueId::new(value_id),
                    field_definition_id: DefinitionId::new(def_id),
                    entity_type,
                    entity_id: EntityId::new(eid),
                    value: decode(&bytes)?,
                })
            })
            .collect()
    }

    fn upsert_field_values(
        &mut self,
        entity_type: EntityType,
        entity_id: EntityId,
        values: &FieldMap,
    ) -> Result<(), StorageError> {
        if self.entity_type_of(entity_id)?.is_none() {
            return Err(StorageError::MissingEntity(entity_id));
        }
        let definitions = self.active_definitions(entity_type)?;
        let tx = self.conn.transaction()?;
        write_custom(&tx, &definitions, entity_type, entity_id, values)?;
        tx.commit()?;
        Ok(())
    }

    fn create_entity(
        &mut self,
        entity_type: EntityType,
        standard: &FieldMap,
        custom: &FieldMap,
    ) -> Result<EntityRecord, StorageError> {
        let definitions = self.active_definitions(entity_type)?;
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO entities (entity_type) VALUES (?1)",
            rusqlite::params![entity_type.as_str()],
        )?;
        let entity_id = EntityId::new(tx.last_insert_rowid());
        write_standard(&tx, entity_id, standard)?;
        write_custom(&tx, &definitions, entity_type, entity_id, custom)?;
        tx.commit()?;

        self.get_entity(entity_id)?
            .ok_or(StorageError::MissingEntity(entity_id))
    }

    fn update_entity(
        &mut self,
        id: EntityId,
        standard: Option<&FieldMap>,
        custom: Option<&FieldMap>,
    ) -> Result<EntityRecord, StorageError> {
        let entity_type = self
            .entity_type_of(id)?
            .ok_or(StorageError::MissingEntity(id))?;
        let definitions = self.active_definitions(entity_type)?;
        let tx = self.conn.transaction()?;
        if let Some(standard) = standard {
            write_standard(&tx, id, standard)?;
        }
        if let Some(custom) = custom {
            write_custom(&tx, &definitions, entity_type, id, custom)?;
        }
        tx.commit()?;

        self.get_entity(id)?.ok_or(StorageError::MissingEntity(id))
    }

    fn delete_entity(&mut self, id: EntityId) -> Result<(), StorageError> {
        if self.entity_type_of(id)?.is_none() {
            return Err(StorageError::MissingEntity(id));
        }
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM field_values WHERE entity_id = ?1",
            rusqlite::params![id.get()],
        )?;
        tx.execute(
            "DELETE FROM entity_fields WHERE entity_id = ?1",
            rusqlite::params![id.get()],
        )?;
        tx.execute(
            "DELETE FROM entities WHERE entity_id = ?1",
            rusqlite::params![id.get()],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn get_entity(&self, id: EntityId) -> Result<Option<EntityRecord>, StorageError> {
        let Some(entity_type) = self.entity_type_of(id)? else {
            return Ok(None);
        };
        let mut record = EntityRecord::new(id, entity_type);

        let mut stmt = self
            .conn
            .prepare("SELECT field_key, value FROM entity_fields WHERE entity_id = ?1")?;
        let rows = stmt
            .query_map(rusqlite::params![id.get()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for (key, bytes) in rows {
            record.standard.insert(key, decode(&bytes)?);
        }

        let mut stmt = self.conn.prepare(
            "SELECT fd.field_name, fv.value FROM field_values fv
             JOIN field_definitions fd ON fd.definition_id = fv.field_definition_id
             WHERE fv.entity_id = ?1 AND fd.is_active = 1",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![id.get()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for (name, bytes) in rows {
            record.custom.insert(name, decode(&bytes)?);
        }

        Ok(Some(record))
    }

    fn list_entities(&self, entity_type: EntityType) -> Result<Vec<EntityRecord>, StorageError> {
        let mut records: BTreeMap<EntityId, EntityRecord> = BTreeMap::new();

        let mut stmt = self
            .conn
            .prepare("SELECT entity_id FROM entities WHERE entity_type = ?1 ORDER BY entity_id")?;
        let ids = stmt
            .query_map(rusqlite::params![entity_type.as_str()], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        for raw in ids {
            let id = EntityId::new(raw);
            records.insert(id, EntityRecord::new(id, entity_type));
        }

        let mut stmt = self.conn.prepare(
            "SELECT ef.entity_id, ef.field_key, ef.value FROM entity_fields ef
             JOIN entities e ON e.entity_id = ef.entity_id
             WHERE e.entity_type = ?1",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![entity_type.as_str()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for (raw, key, bytes) in rows {
            if let Some(record) = records.get_mut(&EntityId::new(raw)) {
                record.standard.insert(key, decode(&bytes)?);
            }
        }

        // Values of inactive or vanished definitions are left out.
        let mut stmt = self.conn.prepare(
            "SELECT fv.entity_id, fd.field_name, fv.value FROM field_values fv
             JOIN field_definitions fd ON fd.definition_id = fv.field_definition_id
             WHERE fv.entity_type = ?1 AND fd.is_active = 1",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![entity_type.as_str()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for (raw, name, bytes) in rows {
            if let Some(record) = records.get_mut(&EntityId::new(raw)) {
                record.custom.insert(name, decode(&bytes)?);
            }
        }

        Ok(records.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shop_fields(pairs: &[(&str, CellValue)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn create_definition_assigns_trailing_order() -> Result<(), StorageError> {
        let mut storage = SqliteStorage::open_in_memory()?;
        let first = storage.create_field_definition(&NewFieldDefinition::custom(
            EntityType::Shop,
            "cf_floor",
            "Floor",
            FieldType::Number,
        ))?;
        let second = storage.create_field_definition(&NewFieldDefinition::custom(
            EntityType::Shop,
            "cf_location",
            "Location",
            FieldType::Text,
        ))?;
        assert!(second.display_order > first.display_order);
        assert!(second.is_active && second.show_in_table);
        Ok(())
    }

    #[test]
    fn create_definition_rejects_bad_and_duplicate_names() -> Result<(), StorageError> {
        let mut storage = SqliteStorage::open_in_memory()?;
        storage.create_field_definition(&NewFieldDefinition::custom(
            EntityType::Shop,
            "cf_location",
            "Location",
            FieldType::Text,
        ))?;

        let dup = storage.create_field_definition(&NewFieldDefinition::custom(
            EntityType::Shop,
            "cf_location",
            "Again",
            FieldType::Text,
        ));
        assert!(matches!(dup, Err(StorageError::DuplicateName { .. })));

        let bad = storage.create_field_definition(&NewFieldDefinition::custom(
            EntityType::Shop,
            "location",
            "Location",
            FieldType::Text,
        ));
        assert!(matches!(bad, Err(StorageError::InvalidName { .. })));

        // Same name on another entity type is fine.
        storage.create_field_definition(&NewFieldDefinition::custom(
            EntityType::License,
            "cf_location",
            "Location",
            FieldType::Text,
        ))?;
        Ok(())
    }

    #[test]
    fn upsert_replaces_rather_than_appends() -> Result<(), StorageError> {
        let mut storage = SqliteStorage::open_in_memory()?;
        storage.create_field_definition(&NewFieldDefinition::custom(
            EntityType::Shop,
            "cf_location",
            "Location",
            FieldType::Text,
        ))?;
        let shop = storage.create_entity(
            EntityType::Shop,
            &shop_fields(&[("name", "Kiosk".into())]),
            &FieldMap::new(),
        )?;

        let values = shop_fields(&[("cf_location", "North".into()), ("cf_unknown", "x".into())]);
        storage.upsert_field_values(EntityType::Shop, shop.id, &values)?;
        storage.upsert_field_values(
            EntityType::Shop,
            shop.id,
            &shop_fields(&[("cf_location", "South".into())]),
        )?;

        let stored = storage.field_values(EntityType::Shop, Some(shop.id))?;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].value, CellValue::from("South"));
        Ok(())
    }

    #[test]
    fn delete_definition_in_use_keeps_values() -> Result<(), StorageError> {
        let mut storage = SqliteStorage::open_in_memory()?;
        let def = storage.create_field_definition(&NewFieldDefinition::custom(
            EntityType::Shop,
            "cf_location",
            "Location",
            FieldType::Text,
        ))?;
        let shop = storage.create_entity(
            EntityType::Shop,
            &FieldMap::new(),
            &shop_fields(&[("cf_location", "North".into())]),
        )?;

        let result = storage.delete_field_definition(def.id);
        assert!(matches!(result, Err(StorageError::InUse { values: 1, .. })));
        assert_eq!(storage.field_values(EntityType::Shop, Some(shop.id))?.len(), 1);

        storage.upsert_field_values(
            EntityType::Shop,
            shop.id,
            &shop_fields(&[("cf_location", CellValue::Null)]),
        )?;
        storage.delete_field_definition(def.id)?;
        assert!(storage.field_definitions(EntityType::Shop)?.is_empty());
        Ok(())
    }

    #[test]
    fn delete_entity_cascades_values_and_ids_are_not_reused() -> Result<(), StorageError> {
        let mut storage = SqliteStorage::open_in_memory()?;
        storage.create_field_definition(&NewFieldDefinition::custom(
            EntityType::Shop,
            "cf_location",
            "Location",
            FieldType::Text,
        ))?;
        let first = storage.create_entity(
            EntityType::Shop,
            &shop_fields(&[("name", "A".into())]),
            &shop_fields(&[("cf_location", "North".into())]),
        )?;
        storage.delete_entity(first.id)?;
        assert!(storage.get_entity(first.id)?.is_none());
        assert!(storage.field_values(EntityType::Shop, None)?.is_empty());

        let second = storage.create_entity(EntityType::Shop, &FieldMap::new(), &FieldMap::new())?;
        assert!(second.id > first.id);
        Ok(())
    }

    #[test]
    fn inactive_definitions_drop_out_of_records() -> Result<(), StorageError> {
        let mut storage = SqliteStorage::open_in_memory()?;
        let def = storage.create_field_definition(&NewFieldDefinition::custom(
            EntityType::License,
            "cf_zone",
            "Zone",
            FieldType::Select,
        ))?;
        let license = storage.create_entity(
            EntityType::License,
            &shop_fields(&[("license_number", "L-1".into())]),
            &shop_fields(&[("cf_zone", "B".into())]),
        )?;
        assert_eq!(license.custom.get("cf_zone"), Some(&CellValue::from("B")));

        let patch = FieldDefinitionPatch {
            is_active: Some(false),
            ..FieldDefinitionPatch::default()
        };
        storage.update_field_definition(def.id, &patch)?;

        let listed = storage.list_entities(EntityType::License)?;
        assert_eq!(listed.len(), 1);
        assert!(listed[0].custom.is_empty());
        assert_eq!(listed[0].standard.get("license_number"), Some(&CellValue::from("L-1")));
        Ok(())
    }

    #[test]
    fn file_backed_store_persists_definitions() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("grid.db");
        let path = path.to_str().ok_or("non-utf8 temp path")?;
        {
            let mut storage = SqliteStorage::open(path)?;
            storage.create_field_definition(&NewFieldDefinition::custom(
                EntityType::Shop,
                "cf_location",
                "Location",
                FieldType::Text,
            ))?;
        }
        let storage = SqliteStorage::open(path)?;
        let defs = storage.field_definitions(EntityType::Shop)?;
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].field_label, "Location");
        Ok(())
    }
}
