//! Local optimistic state layered over what the server last confirmed.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Instant;

use fieldgrid_core::{CellValue, EntityId, FieldMap, RowId, TempId};

use crate::grid::Row;

pub type Ticket = u64;

/// A locally added row whose create request is in flight.
#[derive(Debug, Clone, Default)]
pub struct PendingCreate {
    /// Columns edited after the create request went out.
    pub dirty: BTreeSet<String>,
    /// Removed locally before the server answered.
    pub cancelled: bool,
}

/// A cell commit the server has not acknowledged yet.
#[derive(Debug, Clone, PartialEq)]
pub struct InFlightCell {
    pub ticket: Ticket,
    pub value: CellValue,
}

#[derive(Debug, Default)]
pub struct Tracking {
    pending_creates: HashMap<TempId, PendingCreate>,
    /// Temp ids that were promoted or abandoned, with when they may be
    /// forgotten. Never handed out again.
    retired: HashMap<TempId, Instant>,
    in_flight: HashMap<(EntityId, String), InFlightCell>,
    /// Ticket of the newest local mutation per row.
    touched: HashMap<EntityId, Ticket>,
    /// Last values confirmed by the server.
    known: HashMap<EntityId, FieldMap>,
}

impl Tracking {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Pending creates
    // ========================================================================

    pub fn begin_create(&mut self, temp: TempId) {
        self.pending_creates.insert(temp, PendingCreate::default());
    }

    pub fn has_pending_creates(&self) -> bool {
        !self.pending_creates.is_empty()
    }

    pub fn mark_dirty(&mut self, temp: &TempId, column: &str) {
        if let Some(pending) = self.pending_creates.get_mut(temp) {
            pending.dirty.insert(column.to_string());
        }
    }

    pub fn cancel_create(&mut self, temp: &TempId) -> bool {
        match self.pending_creates.get_mut(temp) {
            Some(pending) => {
                pending.cancelled = true;
                true
            }
            None => false,
        }
    }

    /// Ends tracking for a temp id. It stays retired until `clear_at`.
    pub fn finish_create(&mut self, temp: TempId, clear_at: Instant) -> Option<PendingCreate> {
        self.retired.insert(temp, clear_at);
        self.pending_creates.remove(&temp)
    }

    pub fn is_retired(&self, temp: &TempId) -> bool {
        self.retired.contains_key(temp)
    }

    pub fn retired_len(&self) -> usize {
        self.retired.len()
    }

    pub fn expire(&mut self, now: Instant) {
        self.retired.retain(|_, clear_at| *clear_at > now);
    }

    // ========================================================================
    // Cell commits
    // ========================================================================

    /// Value the server will hold once everything sent so far lands.
    pub fn expected(&self, entity_id: EntityId, column: &str) -> Option<&CellValue> {
        self.in_flight
            .get(&(entity_id, column.to_string()))
            .map(|cell| &cell.value)
            .or_else(|| self.known.get(&entity_id).and_then(|values| values.get(column)))
    }

    pub fn send_cell(&mut self, entity_id: EntityId, column: &str, value: CellValue, ticket: Ticket) {
        self.in_flight
            .insert((entity_id, column.to_string()), InFlightCell { ticket, value });
        self.touch(entity_id, ticket);
    }

    /// Clears an in-flight marker if `ticket` is still the newest commit for
    /// the cell. Returns whether it was.
    pub fn settle_cell(&mut self, entity_id: EntityId, column: &str, ticket: Ticket) -> bool {
        let key = (entity_id, column.to_string());
        match self.in_flight.get(&key) {
            Some(cell) if cell.ticket == ticket => {
                self.in_flight.remove(&key);
                true
            }
            _ => false,
        }
    }

    pub fn is_in_flight(&self, entity_id: EntityId, column: &str) -> bool {
        self.in_flight.contains_key(&(entity_id, column.to_string()))
    }

    pub fn touch(&mut self, entity_id: EntityId, ticket: Ticket) {
        let last = self.touched.entry(entity_id).or_insert(ticket);
        *last = (*last).max(ticket);
    }

    /// Whether the row changed locally after `ticket` was issued.
    pub fn touched_after(&self, entity_id: EntityId, ticket: Ticket) -> bool {
        self.touched.get(&entity_id).is_some_and(|t| *t > ticket)
    }

    pub fn known(&self, entity_id: EntityId) -> Option<&FieldMap> {
        self.known.get(&entity_id)
    }

    pub fn set_known(&mut self, entity_id: EntityId, values: FieldMap) {
        self.known.insert(entity_id, values);
    }

    pub fn record_known(&mut self, entity_id: EntityId, column: &str, value: CellValue) {
        self.known
            .entry(entity_id)
            .or_default()
            .insert(column.to_string(), value);
    }

    pub fn forget(&mut self, entity_id: EntityId) {
        self.known.remove(&entity_id);
        self.touched.remove(&entity_id);
        self.in_flight.retain(|(id, _), _| *id != entity_id);
    }

    pub fn forget_column(&mut self, column: &str) {
        self.in_flight.retain(|(_, c), _| c != column);
        for values in self.known.values_mut() {
            values.remove(column);
        }
    }
}

/// Inputs for merging a row refresh into the local rows.
pub struct RefreshMerge<'a> {
    pub ticket: Ticket,
    pub tracking: &'a Tracking,
    pub excluded: &'a dyn Fn(EntityId) -> bool,
    pub editing: Option<(RowId, &'a str)>,
}

impl RefreshMerge<'_> {
    /// Server rows win, except: excluded ids are dropped, rows changed
    /// locally after the refresh was requested keep their values, in-flight
    /// and editing cells keep their local value, and local-only rows keep
    /// their positions. Unknown server rows are held back while a create is
    /// in flight so a just-created row cannot show up twice.
    pub fn merge(&self, local: &[Row], server: Vec<(EntityId, FieldMap)>) -> Vec<Row> {
        let creating = self.tracking.has_pending_creates();
        let mut seen = HashSet::new();

        let mut merged: Vec<Row> = Vec::with_capacity(server.len());
        for (entity_id, values) in server {
            if (self.excluded)(entity_id) || !seen.insert(entity_id) {
                continue;
            }
            let id = RowId::Persisted(entity_id);
            let current = local.iter().find(|r| r.id == id);
            match current {
                None if creating && self.tracking.known(entity_id).is_none() => {
                    tracing::debug!(entity = %entity_id, "holding back unknown row while a create is in flight");
                }
                None => merged.push(Row::with_values(id, values)),
                Some(row) if self.tracking.touched_after(entity_id, self.ticket) => {
                    merged.push(row.clone());
                }
                Some(row) => merged.push(self.overlay(row, values)),
            }
        }

        // Local rows the server did not return yet.
        for (index, row) in local.iter().enumerate() {
            if merged.iter().any(|m| m.id == row.id) {
                continue;
            }
            let keep = match row.id {
                RowId::Pending(temp) => !self.tracking.is_retired(&temp),
                RowId::Persisted(entity_id) => {
                    !(self.excluded)(entity_id) && self.tracking.touched_after(entity_id, self.ticket)
                }
            };
            if keep {
                merged.insert(index.min(merged.len()), row.clone());
            } else {
                tracing::debug!(row = %row.id, "row gone from server, dropping");
            }
        }
        merged
    }

    fn overlay(&self, local: &Row, server: FieldMap) -> Row {
        let mut row = Row::with_values(local.id, server);
        let Some(entity_id) = local.id.entity_id() else {
            return row;
        };
        for (column, value) in &local.values {
            let editing = self
                .editing
                .is_some_and(|(r, c)| r == local.id && c == column);
            if editing || self.tracking.is_in_flight(entity_id, column) {
                row.values.insert(column.clone(), value.clone());
            }
        }
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), CellValue::from(*v)))
            .collect()
    }

    fn persisted(id: i64, pairs: &[(&str, &str)]) -> Row {
        Row::with_values(RowId::Persisted(EntityId::new(id)), values(pairs))
    }

    #[test]
    fn expected_prefers_in_flight_over_known() {
        let mut tracking = Tracking::new();
        let id = EntityId::new(1);
        tracking.set_known(id, values(&[("name", "a")]));
        assert_eq!(tracking.expected(id, "name"), Some(&CellValue::from("a")));
        tracking.send_cell(id, "name", CellValue::from("b"), 4);
        assert_eq!(tracking.expected(id, "name"), Some(&CellValue::from("b")));
        assert!(!tracking.settle_cell(id, "name", 3));
        assert!(tracking.settle_cell(id, "name", 4));
        assert!(!tracking.is_in_flight(id, "name"));
    }

    #[test]
    fn merge_keeps_pending_rows_and_drops_excluded() {
        let tracking = Tracking::new();
        let pending = Row::new(RowId::pending());
        let local = vec![persisted(1, &[]), pending.clone(), persisted(2, &[])];
        let excluded = |id: EntityId| id == EntityId::new(2);
        let merge = RefreshMerge {
            ticket: 10,
            tracking: &tracking,
            excluded: &excluded,
            editing: None,
        };
        let server = vec![
            (EntityId::new(1), values(&[("name", "server")])),
            (EntityId::new(2), values(&[])),
        ];
        let merged = merge.merge(&local, server);
        let ids: Vec<RowId> = merged.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![RowId::Persisted(EntityId::new(1)), pending.id]);
        assert_eq!(merged[0].get("name"), &CellValue::from("server"));
    }

    #[test]
    fn merge_protects_editing_and_in_flight_cells() {
        let mut tracking = Tracking::new();
        let id = EntityId::new(1);
        tracking.send_cell(id, "phone", CellValue::from("555"), 3);
        let local = vec![persisted(1, &[("name", "typing"), ("phone", "555"), ("owner", "x")])];
        let excluded = |_: EntityId| false;
        let merge = RefreshMerge {
            ticket: 5,
            tracking: &tracking,
            excluded: &excluded,
            editing: Some((RowId::Persisted(id), "name")),
        };
        let server = vec![(id, values(&[("name", "old"), ("phone", "000"), ("owner", "y")]))];
        let merged = merge.merge(&local, server);
        let row = &merged[0];
        assert_eq!(row.get("name"), &CellValue::from("typing"));
        assert_eq!(row.get("phone"), &CellValue::from("555"));
        assert_eq!(row.get("owner"), &CellValue::from("y"));
    }

    #[test]
    fn merge_holds_back_unknown_rows_during_create() {
        let mut tracking = Tracking::new();
        let temp = TempId::new();
        tracking.begin_create(temp);
        let local = vec![Row::new(RowId::Pending(temp))];
        let excluded = |_: EntityId| false;
        let merge = RefreshMerge {
            ticket: 1,
            tracking: &tracking,
            excluded: &excluded,
            editing: None,
        };
        let merged = merge.merge(&local, vec![(EntityId::new(7), FieldMap::new())]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, RowId::Pending(temp));

        // Once retired, a stale copy of the temp row is not carried over.
        tracking.finish_create(temp, Instant::now());
        let merge = RefreshMerge {
            ticket: 2,
            tracking: &tracking,
            excluded: &excluded,
            editing: None,
        };
        let merged = merge.merge(&local, vec![(EntityId::new(7), FieldMap::new())]);
        assert_eq!(merged.iter().map(|r| r.id).collect::<Vec<_>>(), vec![RowId::Persisted(EntityId::new(7))]);
    }

    #[test]
    fn retired_temp_ids_are_forgotten_after_their_delay() {
        let mut tracking = Tracking::new();
        let now = Instant::now();
        let clear_at = now + std::time::Duration::from_secs(2);
        let (a, b) = (TempId::new(), TempId::new());
        tracking.begin_create(a);
        tracking.begin_create(b);
        assert!(tracking.finish_create(a, clear_at).is_some());
        assert!(tracking.finish_create(b, clear_at).is_some());
        assert_eq!(tracking.retired_len(), 2);

        tracking.expire(now);
        assert!(tracking.is_retired(&a));
        tracking.expire(clear_at);
        assert_eq!(tracking.retired_len(), 0);
        assert!(!tracking.has_pending_creates());
    }

    #[test]
    fn rows_touched_after_the_refresh_win() {
        let mut tracking = Tracking::new();
        let id = EntityId::new(1);
        tracking.touch(id, 9);
        let local = vec![persisted(1, &[("name", "new")])];
        let excluded = |_: EntityId| false;
        let merge = RefreshMerge {
            ticket: 5,
            tracking: &tracking,
            excluded: &excluded,
            editing: None,
        };
        let merged = merge.merge(&local, vec![(id, values(&[("name", "stale")]))]);
        assert_eq!(merged[0].get("name"), &CellValue::from("new"));
    }
}
