use std::collections::HashMap;
use std::hash::Hash;

/// One-to-one map with O(1) lookup from either side.
///
/// Inserting a pair evicts any existing pairing of either value, so the map
/// stays a bijection.
#[derive(Debug, Clone)]
pub struct BiMap<L, R> {
    forward: HashMap<L, R>,
    reverse: HashMap<R, L>,
}

impl<L, R> BiMap<L, R>
where
    L: Eq + Hash + Clone,
    R: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            forward: HashMap::new(),
            reverse: HashMap::new(),
        }
    }

    pub fn insert(&mut self, left: L, right: R) {
        if let Some(old_right) = self.forward.remove(&left) {
            self.reverse.remove(&old_right);
        }
        if let Some(old_left) = self.reverse.remove(&right) {
            self.forward.remove(&old_left);
        }
        self.forward.insert(left.clone(), right.clone());
        self.reverse.insert(right, left);
    }

    pub fn get_by_left(&self, left: &L) -> Option<&R> {
        self.forward.get(left)
    }

    pub fn get_by_right(&self, right: &R) -> Option<&L> {
        self.reverse.get(right)
    }

    pub fn remove_by_left(&mut self, left: &L) -> Option<R> {
        let right = self.forward.remove(left)?;
        self.reverse.remove(&right);
        Some(right)
    }

    pub fn remove_by_right(&mut self, right: &R) -> Option<L> {
        let left = self.reverse.remove(right)?;
        self.forward.remove(&left);
        Some(left)
    }

    pub fn contains_left(&self, left: &L) -> bool {
        self.forward.contains_key(left)
    }

    pub fn contains_right(&self, right: &R) -> bool {
        self.reverse.contains_key(right)
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    pub fn clear(&mut self) {
        self.forward.clear();
        self.reverse.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&L, &R)> {
        self.forward.iter()
    }
}

impl<L, R> Default for BiMap<L, R>
where
    L: Eq + Hash + Clone,
    R: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_both_directions() {
        let mut map = BiMap::new();
        map.insert(1, "one");
        assert_eq!(map.get_by_left(&1), Some(&"one"));
        assert_eq!(map.get_by_right(&"one"), Some(&1));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_insert_overwrites_left() {
        let mut map = BiMap::new();
        map.insert(1, "one");
        map.insert(1, "uno");

        assert_eq!(map.get_by_left(&1), Some(&"uno"));
        assert!(!map.contains_right(&"one"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_insert_overwrites_right() {
        let mut map = BiMap::new();
        map.insert(1, "one");
        map.insert(2, "one");

        assert_eq!(map.get_by_right(&"one"), Some(&2));
        assert!(!map.contains_left(&1));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_remove_keeps_sides_in_step() {
        let mut map = BiMap::new();
        map.insert(1, "one");
        map.insert(2, "two");

        assert_eq!(map.remove_by_left(&1), Some("one"));
        assert!(!map.contains_right(&"one"));
        assert_eq!(map.remove_by_right(&"two"), Some(2));
        assert!(map.is_empty());
        assert_eq!(map.remove_by_left(&3), None);
    }
}
