//! Realised change table: pairs host-native identifiers with the stable
//! change identifiers the rest of the session knows them by.
//!
//! Entries live as long as the owning shadow document. Keeping a pairing after
//! its object is deleted is what lets an undo restore the same network identity.

use uuid::Uuid;

use crate::bimap::BiMap;

#[derive(Debug, Clone, Default)]
pub struct RealisedChangeTable {
    pairs: BiMap<Uuid, Uuid>,
}

impl RealisedChangeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pair `change_id` with `local_id`, replacing any pairing either had.
    pub fn add_pair(&mut self, change_id: Uuid, local_id: Uuid) {
        self.pairs.insert(change_id, local_id);
    }

    pub fn try_get_change_id(&self, local_id: Uuid) -> Option<Uuid> {
        self.pairs.get_by_right(&local_id).copied()
    }

    pub fn try_get_local_id(&self, change_id: Uuid) -> Option<Uuid> {
        self.pairs.get_by_left(&change_id).copied()
    }

    /// Stable id already paired with `local_id`, or a freshly minted one.
    ///
    /// The returned id is (re-)paired with `local_id` before returning.
    pub fn reconcile(&mut self, local_id: Uuid) -> Uuid {
        let change_id = self
            .try_get_change_id(local_id)
            .unwrap_or_else(Uuid::new_v4);
        self.add_pair(change_id, local_id);
        change_id
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn clear(&mut self) {
        self.pairs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconcile_mints_once() {
        let mut table = RealisedChangeTable::new();
        let local = Uuid::new_v4();

        let first = table.reconcile(local);
        let second = table.reconcile(local);

        assert_eq!(first, second);
        assert_eq!(table.try_get_local_id(first), Some(local));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_distinct_objects_get_distinct_ids() {
        let mut table = RealisedChangeTable::new();
        let a = table.reconcile(Uuid::new_v4());
        let b = table.reconcile(Uuid::new_v4());
        assert_ne!(a, b);
    }

    #[test]
    fn test_add_pair_last_write_wins() {
        let mut table = RealisedChangeTable::new();
        let change = Uuid::new_v4();
        let old_local = Uuid::new_v4();
        let new_local = Uuid::new_v4();

        table.add_pair(change, old_local);
        table.add_pair(change, new_local);

        assert_eq!(table.try_get_local_id(change), Some(new_local));
        assert_eq!(table.try_get_change_id(old_local), None);
        assert_eq!(table.try_get_change_id(new_local), Some(change));
    }

    #[test]
    fn test_unknown_lookups() {
        let table = RealisedChangeTable::new();
        assert!(table.is_empty());
        assert_eq!(table.try_get_change_id(Uuid::new_v4()), None);
        assert_eq!(table.try_get_local_id(Uuid::new_v4()), None);
    }
}
