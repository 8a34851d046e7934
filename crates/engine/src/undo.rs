use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use fieldgrid_core::{EntityId, RowId};

use crate::grid::Row;

/// A row removed from view whose delete request has not been sent yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingDelete {
    pub entity_id: EntityId,
    /// Position the row had when it was deleted.
    pub index: usize,
    pub row: Row,
    pub deadline: Instant,
}

/// Deferred deletes with an undo window, plus the ids that stay filtered
/// out of refreshes until their request has resolved and a short safety
/// delay has passed.
pub struct UndoManager {
    queued: VecDeque<PendingDelete>,
    /// Delete request sent, waiting for the outcome.
    sending: HashMap<EntityId, PendingDelete>,
    /// Confirmed deleted; value is when the id may be forgotten.
    recently_deleted: HashMap<EntityId, Instant>,
    /// Row order as it was before any of the held deletes, so a restore can
    /// find its neighbours even when they were deleted too.
    layout: Vec<RowId>,
    window: Duration,
    clear_delay: Duration,
}

impl UndoManager {
    pub fn new(window: Duration, clear_delay: Duration) -> Self {
        Self {
            queued: VecDeque::new(),
            sending: HashMap::new(),
            recently_deleted: HashMap::new(),
            layout: Vec::new(),
            window,
            clear_delay,
        }
    }

    /// Queues a delete. `order` is the row order right before the row was
    /// taken out of view.
    pub fn push(&mut self, entity_id: EntityId, index: usize, row: Row, order: &[RowId], now: Instant) {
        self.relayout(order);
        self.queued.push_back(PendingDelete {
            entity_id,
            index,
            row,
            deadline: now + self.window,
        });
    }

    /// Cancels a queued delete. Deletes already sent cannot be undone.
    pub fn cancel(&mut self, entity_id: EntityId) -> Option<PendingDelete> {
        let index = self.queued.iter().position(|p| p.entity_id == entity_id)?;
        self.queued.remove(index)
    }

    /// Most recent queued delete, for a plain "undo" button.
    pub fn cancel_last(&mut self) -> Option<PendingDelete> {
        self.queued.pop_back()
    }

    /// Moves every delete whose window has closed to the sending set and
    /// returns them.
    pub fn take_due(&mut self, now: Instant) -> Vec<PendingDelete> {
        let (due, waiting): (Vec<_>, Vec<_>) =
            self.queued.drain(..).partition(|p| p.deadline <= now);
        self.queued = waiting.into();
        for pending in &due {
            self.sending.insert(pending.entity_id, pending.clone());
        }
        due
    }

    /// Delete request confirmed. The id stays excluded until the clear delay passes.
    pub fn confirm(&mut self, entity_id: EntityId, now: Instant) -> Option<PendingDelete> {
        self.recently_deleted.insert(entity_id, now + self.clear_delay);
        self.sending.remove(&entity_id)
    }

    /// Delete request failed; hands back the snapshot for restoring.
    pub fn fail(&mut self, entity_id: EntityId) -> Option<PendingDelete> {
        self.sending.remove(&entity_id)
    }

    /// Marks an id deleted without an undo window, e.g. a row removed while
    /// its create was still in flight.
    pub fn mark_deleted(&mut self, entity_id: EntityId, now: Instant) {
        self.recently_deleted.insert(entity_id, now + self.clear_delay);
    }

    pub fn layout(&self) -> &[RowId] {
        &self.layout
    }

    /// Rebuilds the layout from the visible `order`, splicing each held row
    /// back in after the nearest row that preceded it.
    fn relayout(&mut self, order: &[RowId]) {
        let mut next = order.to_vec();
        for (pos, id) in self.layout.iter().enumerate() {
            if next.contains(id) || !self.holds(id) {
                continue;
            }
            let at = self.layout[..pos]
                .iter()
                .rev()
                .find_map(|before| next.iter().position(|n| n == before))
                .map_or(0, |i| i + 1);
            next.insert(at, *id);
        }
        self.layout = next;
    }

    fn holds(&self, id: &RowId) -> bool {
        id.entity_id()
            .is_some_and(|e| self.is_queued(e) || self.sending.contains_key(&e))
    }

    pub fn expire(&mut self, now: Instant) {
        self.recently_deleted.retain(|_, clear_at| *clear_at > now);
    }

    /// Whether a refresh must leave this id out.
    pub fn excludes(&self, entity_id: EntityId) -> bool {
        self.queued.iter().any(|p| p.entity_id == entity_id)
            || self.sending.contains_key(&entity_id)
            || self.recently_deleted.contains_key(&entity_id)
    }

    pub fn is_queued(&self, entity_id: EntityId) -> bool {
        self.queued.iter().any(|p| p.entity_id == entity_id)
    }

    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        let deletes = self.queued.iter().map(|p| p.deadline);
        let clears = self.recently_deleted.values().copied();
        deletes.chain(clears).min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64) -> (EntityId, Row) {
        let id = EntityId::new(id);
        (id, Row::new(RowId::Persisted(id)))
    }

    fn manager() -> UndoManager {
        UndoManager::new(Duration::from_secs(5), Duration::from_secs(2))
    }

    #[test]
    fn cancel_before_deadline_returns_snapshot() {
        let mut undo = manager();
        let now = Instant::now();
        let (id, r) = row(1);
        undo.push(id, 3, r.clone(), &[], now);
        assert!(undo.excludes(id));

        let pending = undo.cancel(id).unwrap();
        assert_eq!(pending.index, 3);
        assert_eq!(pending.row, r);
        assert!(!undo.excludes(id));
        assert!(undo.take_due(now + Duration::from_secs(10)).is_empty());
    }

    #[test]
    fn due_deletes_stay_excluded_until_cleared() {
        let mut undo = manager();
        let now = Instant::now();
        let (a, ra) = row(1);
        let (b, rb) = row(2);
        undo.push(a, 0, ra, &[], now);
        undo.push(b, 1, rb, &[], now + Duration::from_secs(3));

        let due = undo.take_due(now + Duration::from_secs(5));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].entity_id, a);
        assert!(undo.cancel(a).is_none());
        assert_eq!(undo.queued_len(), 1);

        let confirmed_at = now + Duration::from_secs(6);
        assert!(undo.confirm(a, confirmed_at).is_some());
        assert!(undo.excludes(a));
        undo.expire(confirmed_at + Duration::from_secs(2));
        assert!(!undo.excludes(a));
    }

    #[test]
    fn next_deadline_covers_queue_and_clears() {
        let mut undo = manager();
        let now = Instant::now();
        assert_eq!(undo.next_deadline(), None);
        undo.mark_deleted(EntityId::new(9), now);
        assert_eq!(undo.next_deadline(), Some(now + Duration::from_secs(2)));
        let (id, r) = row(1);
        undo.push(id, 0, r, &[], now);
        assert_eq!(undo.next_deadline(), Some(now + Duration::from_secs(2)));
        assert_eq!(undo.cancel_last().map(|p| p.entity_id), Some(id));
    }

    #[test]
    fn layout_keeps_rows_deleted_earlier() {
        let mut undo = manager();
        let now = Instant::now();
        let ids: Vec<RowId> = (1..=3).map(|i| RowId::Persisted(EntityId::new(i))).collect();
        let (a, ra) = row(1);
        let (b, rb) = row(2);

        undo.push(a, 0, ra, &ids, now);
        undo.push(b, 0, rb, &ids[1..], now);
        assert_eq!(undo.layout(), ids.as_slice());

        // Once nothing is held, the next delete starts from the visible order.
        undo.cancel(a);
        undo.cancel(b);
        let (c, rc) = row(3);
        undo.push(c, 0, rc, &ids[2..], now);
        assert_eq!(undo.layout(), &ids[2..]);
    }
}
