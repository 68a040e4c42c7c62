//! Difference engine: flat, string-valued field deltas between two states of
//! an entity, and the inverse that applies a delta to a live entity.
//!
//! Keys are typed [`DeltaKey`]s; on the wire they encode as
//! `Old:Name`, `New:FullPath`, or, for user-scoped fields, `New:alice:IsVisible`.
//!
//! Values are compared as strings. An empty old value means "no prior value":
//! a field is in the delta when old is non-empty and differs, or old is empty
//! and new is not. Structural fields are always present.

use std::collections::BTreeMap;
use std::fmt;

use concord_core::layer::path_segments;
use concord_core::PATH_SEPARATOR;

/// Separator between the segments of an encoded key.
pub const KEY_DIVIDER: char = ':';

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Direction {
    Old,
    New,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Old => "Old",
            Direction::New => "New",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeltaKey {
    pub direction: Direction,
    /// Acting user for user-scoped fields.
    pub scope: Option<String>,
    pub field: String,
}

impl DeltaKey {
    pub fn new(direction: Direction, field: impl Into<String>, scope: Option<String>) -> Self {
        Self {
            direction,
            scope,
            field: field.into(),
        }
    }

    /// Unscoped `New` key.
    pub fn new_value(field: impl Into<String>) -> Self {
        Self::new(Direction::New, field, None)
    }

    /// Unscoped `Old` key.
    pub fn old_value(field: impl Into<String>) -> Self {
        Self::new(Direction::Old, field, None)
    }

    /// Parse the wire form. Returns `None` for keys this engine cannot read.
    pub fn parse(key: &str) -> Option<Self> {
        let (direction, rest) = key.split_once(KEY_DIVIDER)?;
        let direction = match direction {
            "Old" => Direction::Old,
            "New" => Direction::New,
            _ => return None,
        };
        // User names may contain the divider; field names may not.
        let (scope, field) = match rest.rsplit_once(KEY_DIVIDER) {
            Some((scope, field)) => (Some(scope.to_string()), field),
            None => (None, rest),
        };
        if field.is_empty() {
            return None;
        }
        Some(Self::new(direction, field, scope))
    }
}

impl fmt::Display for DeltaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{KEY_DIVIDER}", self.direction.as_str())?;
        if let Some(scope) = &self.scope {
            write!(f, "{scope}{KEY_DIVIDER}")?;
        }
        f.write_str(&self.field)
    }
}

/// A set of field changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    entries: BTreeMap<DeltaKey, String>,
}

impl Delta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: DeltaKey, value: impl Into<String>) {
        self.entries.insert(key, value.into());
    }

    pub fn get(&self, key: &DeltaKey) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &DeltaKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DeltaKey, &str)> {
        self.entries.iter().map(|(k, v)| (k, v.as_str()))
    }

    /// Fields present in the delta, deduplicated.
    pub fn fields(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = self.entries.keys().map(|k| k.field.as_str()).collect();
        fields.sort_unstable();
        fields.dedup();
        fields
    }

    /// Encode for a payload packet.
    pub fn to_updates(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    /// Decode from a payload packet, skipping keys that do not parse.
    pub fn from_updates(updates: &BTreeMap<String, String>) -> Self {
        let mut delta = Delta::new();
        for (key, value) in updates {
            match DeltaKey::parse(key) {
                Some(key) => delta.insert(key, value.clone()),
                None => log::debug!("Skipping unreadable delta key {key}"),
            }
        }
        delta
    }
}

pub type Getter<E> = fn(&E) -> String;
pub type Setter<E> = fn(&mut E, &str);

struct Field<E> {
    name: &'static str,
    get: Getter<E>,
    set: Option<Setter<E>>,
    user_scoped: bool,
    structural: bool,
}

/// Ordered set of observable fields of an entity type.
pub struct FieldRegistry<E> {
    fields: Vec<Field<E>>,
}

impl<E> FieldRegistry<E> {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    fn push(
        mut self,
        name: &'static str,
        get: Getter<E>,
        set: Option<Setter<E>>,
        user_scoped: bool,
        structural: bool,
    ) -> Self {
        self.fields.push(Field {
            name,
            get,
            set,
            user_scoped,
            structural,
        });
        self
    }

    /// A shared, read-write field.
    pub fn field(self, name: &'static str, get: Getter<E>, set: Setter<E>) -> Self {
        self.push(name, get, Some(set), false, false)
    }

    /// Published but never applied.
    pub fn read_only(self, name: &'static str, get: Getter<E>) -> Self {
        self.push(name, get, None, false, false)
    }

    /// Field whose value is local to each user.
    pub fn user_field(self, name: &'static str, get: Getter<E>, set: Setter<E>) -> Self {
        self.push(name, get, Some(set), true, false)
    }

    /// Identity field, always present in a delta.
    pub fn structural(self, name: &'static str, get: Getter<E>) -> Self {
        self.push(name, get, None, false, true)
    }

    fn find(&self, name: &str) -> Option<&Field<E>> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn is_user_scoped(&self, name: &str) -> bool {
        self.find(name).is_some_and(|f| f.user_scoped)
    }

    /// Key for `field` as written by `user`.
    pub fn key(&self, direction: Direction, field: &str, user: &str) -> DeltaKey {
        let scope = self.is_user_scoped(field).then(|| user.to_string());
        DeltaKey::new(direction, field, scope)
    }

    pub fn compute_delta(&self, old: &E, new: &E, user: &str) -> Delta {
        let mut delta = Delta::new();
        for field in &self.fields {
            let old_value = (field.get)(old);
            let new_value = (field.get)(new);
            if !field.structural && !is_different(&old_value, &new_value) {
                continue;
            }
            let scope = field.user_scoped.then(|| user.to_string());
            delta.insert(DeltaKey::new(Direction::Old, field.name, scope.clone()), old_value);
            delta.insert(DeltaKey::new(Direction::New, field.name, scope), new_value);
        }
        delta
    }

    /// Apply the `New` values of `delta` to `entity` as seen by `user`.
    ///
    /// Values scoped to another user, read-only fields and unknown fields are
    /// skipped. Returns the number of setters invoked.
    pub fn apply_delta(&self, entity: &mut E, delta: &Delta, user: &str) -> usize {
        let mut applied = 0;
        for (key, value) in delta.iter() {
            if key.direction != Direction::New {
                continue;
            }
            if key.scope.as_deref().is_some_and(|scope| scope != user) {
                continue;
            }
            let Some(set) = self.find(&key.field).and_then(|f| f.set) else {
                continue;
            };
            set(entity, value);
            applied += 1;
        }
        applied
    }
}

impl<E> Default for FieldRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

fn is_different(old: &str, new: &str) -> bool {
    if !old.is_empty() {
        return old != new;
    }
    !new.is_empty()
}

/// A tree of named entities addressed by full path.
pub trait Hierarchy {
    type Id: Copy + PartialEq;

    fn find_by_path(&self, path: &str) -> Option<Self::Id>;
    /// Create an entity named `name` under `parent` (root if `None`).
    fn create(&mut self, name: &str, parent: Option<Self::Id>) -> Option<Self::Id>;
    /// Move an existing entity under `parent` with leaf name `name`.
    fn place(&mut self, id: Self::Id, name: &str, parent: Option<Self::Id>) -> bool;
}

/// Walk `path` from the root, materializing missing intermediate entities.
///
/// The last segment is `leaf` when given (the entity being moved), otherwise
/// a newly created entity. Returns whatever lives at `path` afterwards.
pub fn relocate<H>(tree: &mut H, path: &str, leaf: Option<H::Id>) -> Option<H::Id>
where
    H: Hierarchy + ?Sized,
{
    let segments = path_segments(path);
    if segments.is_empty() {
        return None;
    }

    let mut previous: Option<H::Id> = None;
    for depth in 1..=segments.len() {
        let prefix = segments[..depth].join(PATH_SEPARATOR);
        let name = segments[depth - 1];
        let is_last = depth == segments.len();

        let resolved = match tree.find_by_path(&prefix) {
            Some(existing) => existing,
            None => match (is_last, leaf) {
                (true, Some(leaf)) => {
                    if !tree.place(leaf, name, previous) {
                        log::debug!("Could not place entity at {prefix}");
                        return None;
                    }
                    leaf
                }
                _ => tree.create(name, previous)?,
            },
        };
        previous = Some(resolved);
    }

    tree.find_by_path(&segments.join(PATH_SEPARATOR))
}
