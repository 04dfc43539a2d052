//! The hierarchical, path-addressable container filled by the parser and consumed by the
//! writer.
//!
//! A [`DataStore`] maps field names to [`StoreEntry`] values. A leaf ([`FieldEntry`]) keeps
//! the bytes captured from the buffer next to the decoded value; a repeated group keeps one
//! child `DataStore` per occurrence, in parse order.
//!
//! Paths are dotted and indexed, e.g. `entry_list[3].file_name_hash`. Getters treat a
//! missing or malformed path as absence; mutators create intermediate groups and children
//! as needed and reject malformed paths with [`CodecError::InvalidPath`].

pub(crate) mod path;
mod json;

use std::fmt;

use ahash::RandomState;
use hashbrown::HashMap as FastMap;

use crate::err::{CodecError, Result};
use crate::settings::DEFAULT_MAX_REPEAT_COUNT;
use path::{PathSegment, parse_path};

/// A decoded scalar.
#[derive(Debug, Clone)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Float(f32),
}

impl FieldValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Text(_) => "text",
            FieldValue::Integer(_) => "integer",
            FieldValue::Float(_) => "float",
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            FieldValue::Float(v) => Some(*v),
            _ => None,
        }
    }
}

// Floats compare by bit pattern, so a parsed NaN still equals itself.
impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FieldValue::Text(a), FieldValue::Text(b)) => a == b,
            (FieldValue::Integer(a), FieldValue::Integer(b)) => a == b,
            (FieldValue::Float(a), FieldValue::Float(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => write!(f, "{s:?}"),
            FieldValue::Integer(v) => write!(f, "{v}"),
            FieldValue::Float(v) => write!(f, "{v}"),
        }
    }
}

/// One atomic field: the captured bytes and/or the decoded value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldEntry {
    raw: Option<Vec<u8>>,
    value: Option<FieldValue>,
}

impl FieldEntry {
    pub fn new(raw: Option<Vec<u8>>, value: Option<FieldValue>) -> Self {
        FieldEntry { raw, value }
    }

    pub fn captured(raw: Vec<u8>, value: Option<FieldValue>) -> Self {
        FieldEntry {
            raw: Some(raw),
            value,
        }
    }

    pub fn raw(&self) -> Option<&[u8]> {
        self.raw.as_deref()
    }

    pub fn value(&self) -> Option<&FieldValue> {
        self.value.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_none() && self.value.is_none()
    }

    fn set_value(&mut self, value: FieldValue) {
        // The capture no longer describes the value.
        self.raw = None;
        self.value = Some(value);
    }

    fn set_raw(&mut self, raw: Vec<u8>) {
        self.value = None;
        self.raw = Some(raw);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreEntry {
    Field(FieldEntry),
    Repeated(Vec<DataStore>),
}

/// Hierarchical container of parsed or assembled field data.
#[derive(Clone, Default)]
pub struct DataStore {
    entries: Vec<(String, StoreEntry)>,
    index: FastMap<String, usize, RandomState>,
}

impl PartialEq for DataStore {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl fmt::Debug for DataStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(k, v)| (k, v)))
            .finish()
    }
}

fn invalid_path(path: &str, message: &'static str) -> CodecError {
    CodecError::InvalidPath {
        path: path.to_owned(),
        message,
    }
}

impl DataStore {
    pub fn new() -> Self {
        DataStore::default()
    }

    /// Number of top-level entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Top-level entry names, in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &StoreEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn entry(&self, name: &str) -> Option<&StoreEntry> {
        self.index.get(name).map(|&i| &self.entries[i].1)
    }

    fn entry_mut(&mut self, name: &str) -> Option<&mut StoreEntry> {
        match self.index.get(name) {
            Some(&i) => Some(&mut self.entries[i].1),
            None => None,
        }
    }

    fn entry_or_insert_with(
        &mut self,
        name: &str,
        make: impl FnOnce() -> StoreEntry,
    ) -> &mut StoreEntry {
        let i = match self.index.get(name) {
            Some(&i) => i,
            None => {
                self.entries.push((name.to_owned(), make()));
                let i = self.entries.len() - 1;
                self.index.insert(name.to_owned(), i);
                i
            }
        };
        &mut self.entries[i].1
    }

    /// Walk all segments but the last, which is returned alongside the store holding it.
    fn resolve_parent<'s, 'p>(
        &'s self,
        segments: &[PathSegment<'p>],
    ) -> Option<(&'s DataStore, PathSegment<'p>)> {
        let (last, parents) = segments.split_last()?;
        let mut current = self;
        for segment in parents {
            current = match (current.entry(segment.name)?, segment.index) {
                (StoreEntry::Repeated(children), Some(i)) => children.get(i)?,
                _ => return None,
            };
        }
        Some((current, *last))
    }

    /// Like `resolve_parent`, creating indexed children on the way.
    fn resolve_parent_mut<'p>(
        &mut self,
        path: &str,
        segments: &[PathSegment<'p>],
    ) -> Result<(&mut DataStore, PathSegment<'p>)> {
        let (last, parents) = segments
            .split_last()
            .ok_or_else(|| invalid_path(path, "path is empty"))?;

        let mut current = self;
        for segment in parents {
            let index = segment
                .index
                .ok_or_else(|| invalid_path(path, "intermediate segments must be indexed"))?;
            let children = match current
                .entry_or_insert_with(segment.name, || StoreEntry::Repeated(Vec::new()))
            {
                StoreEntry::Repeated(children) => children,
                StoreEntry::Field(_) => {
                    return Err(invalid_path(path, "segment refers to a scalar field"));
                }
            };
            if children.len() <= index {
                if index - children.len() >= DEFAULT_MAX_REPEAT_COUNT {
                    return Err(invalid_path(path, "index leaves too large a gap in its group"));
                }
                children.resize_with(index + 1, DataStore::new);
            }
            current = &mut children[index];
        }

        Ok((current, *last))
    }

    /// Look up a leaf.
    pub fn get_field(&self, path: &str) -> Option<&FieldEntry> {
        let segments = parse_path(path).ok()?;
        let (parent, last) = self.resolve_parent(&segments)?;
        if last.index.is_some() {
            return None;
        }
        match parent.entry(last.name)? {
            StoreEntry::Field(field) => Some(field),
            StoreEntry::Repeated(_) => None,
        }
    }

    pub fn get_value(&self, path: &str) -> Option<&FieldValue> {
        self.get_field(path)?.value()
    }

    pub fn get_text(&self, path: &str) -> Option<&str> {
        self.get_value(path)?.as_text()
    }

    pub fn get_integer(&self, path: &str) -> Option<i64> {
        self.get_value(path)?.as_integer()
    }

    pub fn get_float(&self, path: &str) -> Option<f32> {
        self.get_value(path)?.as_float()
    }

    pub fn get_raw_value(&self, path: &str) -> Option<&[u8]> {
        self.get_field(path)?.raw()
    }

    /// `true` if `path` names a leaf, a group or a group item.
    pub fn contains(&self, path: &str) -> bool {
        let Ok(segments) = parse_path(path) else {
            return false;
        };
        let Some((parent, last)) = self.resolve_parent(&segments) else {
            return false;
        };
        match (parent.entry(last.name), last.index) {
            (Some(StoreEntry::Repeated(children)), Some(i)) => i < children.len(),
            (Some(_), None) => true,
            _ => false,
        }
    }

    /// Children of a repeated group, in parse order. Empty if the group is absent.
    pub fn get_repeated_values(&self, group_path: &str) -> &[DataStore] {
        self.try_get_repeated(group_path).unwrap_or(&[])
    }

    /// Children of a repeated group, distinguishing an absent group from an empty one.
    pub fn try_get_repeated(&self, group_path: &str) -> Option<&[DataStore]> {
        let segments = parse_path(group_path).ok()?;
        let (parent, last) = self.resolve_parent(&segments)?;
        if last.index.is_some() {
            return None;
        }
        match parent.entry(last.name)? {
            StoreEntry::Repeated(children) => Some(children.as_slice()),
            StoreEntry::Field(_) => None,
        }
    }

    pub fn get_repeated_item(&self, group_path: &str, index: usize) -> Option<&DataStore> {
        self.get_repeated_values(group_path).get(index)
    }

    fn field_mut(&mut self, path: &str) -> Result<&mut FieldEntry> {
        let segments = parse_path(path).map_err(|message| invalid_path(path, message))?;
        let (parent, last) = self.resolve_parent_mut(path, &segments)?;
        if last.index.is_some() {
            return Err(invalid_path(path, "a scalar path cannot end with an index"));
        }
        match parent.entry_or_insert_with(last.name, || StoreEntry::Field(FieldEntry::default())) {
            StoreEntry::Field(field) => Ok(field),
            StoreEntry::Repeated(_) => Err(invalid_path(path, "path refers to a repeated group")),
        }
    }

    fn group_mut(&mut self, group_path: &str) -> Result<&mut Vec<DataStore>> {
        let segments =
            parse_path(group_path).map_err(|message| invalid_path(group_path, message))?;
        let (parent, last) = self.resolve_parent_mut(group_path, &segments)?;
        if last.index.is_some() {
            return Err(invalid_path(group_path, "a group path cannot end with an index"));
        }
        match parent.entry_or_insert_with(last.name, || StoreEntry::Repeated(Vec::new())) {
            StoreEntry::Repeated(children) => Ok(children),
            StoreEntry::Field(_) => Err(invalid_path(group_path, "path refers to a scalar field")),
        }
    }

    /// Store a captured field as-is. Used by the parser, which always has both halves.
    pub fn insert_field(&mut self, path: &str, field: FieldEntry) -> Result<()> {
        *self.field_mut(path)? = field;
        Ok(())
    }

    pub fn add_value(&mut self, path: &str, value: FieldValue) -> Result<()> {
        self.field_mut(path)?.set_value(value);
        Ok(())
    }

    pub fn add_text(&mut self, path: &str, value: impl Into<String>) -> Result<()> {
        self.add_value(path, FieldValue::Text(value.into()))
    }

    pub fn add_integer(&mut self, path: &str, value: i64) -> Result<()> {
        self.add_value(path, FieldValue::Integer(value))
    }

    pub fn add_float(&mut self, path: &str, value: f32) -> Result<()> {
        self.add_value(path, FieldValue::Float(value))
    }

    pub fn add_raw_value(&mut self, path: &str, raw: impl Into<Vec<u8>>) -> Result<()> {
        self.field_mut(path)?.set_raw(raw.into());
        Ok(())
    }

    fn repeated_field_path(group_path: &str, field_name: &str, index: usize) -> String {
        path::child_path(Some(&path::item_path(group_path, index)), field_name)
    }

    pub fn add_repeated_value(
        &mut self,
        group_path: &str,
        field_name: &str,
        index: usize,
        value: FieldValue,
    ) -> Result<()> {
        let path = Self::repeated_field_path(group_path, field_name, index);
        self.add_value(&path, value)
    }

    pub fn add_repeated_text(
        &mut self,
        group_path: &str,
        field_name: &str,
        index: usize,
        value: impl Into<String>,
    ) -> Result<()> {
        self.add_repeated_value(group_path, field_name, index, FieldValue::Text(value.into()))
    }

    pub fn add_repeated_integer(
        &mut self,
        group_path: &str,
        field_name: &str,
        index: usize,
        value: i64,
    ) -> Result<()> {
        self.add_repeated_value(group_path, field_name, index, FieldValue::Integer(value))
    }

    pub fn add_repeated_float(
        &mut self,
        group_path: &str,
        field_name: &str,
        index: usize,
        value: f32,
    ) -> Result<()> {
        self.add_repeated_value(group_path, field_name, index, FieldValue::Float(value))
    }

    pub fn add_repeated_raw_value(
        &mut self,
        group_path: &str,
        field_name: &str,
        index: usize,
        raw: impl Into<Vec<u8>>,
    ) -> Result<()> {
        let path = Self::repeated_field_path(group_path, field_name, index);
        self.add_raw_value(&path, raw)
    }

    /// Create the group if needed, leaving existing children untouched.
    pub fn ensure_repeated(&mut self, group_path: &str) -> Result<()> {
        self.group_mut(group_path).map(|_| ())
    }

    /// Append a child to a repeated group and return its index.
    pub fn push_repeated(&mut self, group_path: &str, child: DataStore) -> Result<usize> {
        let children = self.group_mut(group_path)?;
        children.push(child);
        Ok(children.len() - 1)
    }

    /// Remove one child of a repeated group; later children shift down.
    pub fn remove_repeated(&mut self, group_path: &str, index: usize) -> Result<Option<DataStore>> {
        let children = self.group_mut(group_path)?;
        if index < children.len() {
            Ok(Some(children.remove(index)))
        } else {
            Ok(None)
        }
    }

    /// Replace all children of a repeated group.
    pub fn set_repeated(&mut self, group_path: &str, children: Vec<DataStore>) -> Result<()> {
        *self.group_mut(group_path)? = children;
        Ok(())
    }

    /// Remove a top-level entry.
    pub fn remove(&mut self, name: &str) -> Option<StoreEntry> {
        let i = self.index.remove(name)?;
        let (_, entry) = self.entries.remove(i);
        for slot in self.index.values_mut() {
            if *slot > i {
                *slot -= 1;
            }
        }
        Some(entry)
    }

    /// Mutable access to a top-level entry.
    pub fn get_entry_mut(&mut self, name: &str) -> Option<&mut StoreEntry> {
        self.entry_mut(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_absence_is_not_an_error() {
        let store = DataStore::new();
        assert_eq!(store.get_text("tag"), None);
        assert_eq!(store.get_integer("entry_list[0].hash"), None);
        assert_eq!(store.get_raw_value("not a [valid path"), None);
        assert!(store.get_repeated_values("entry_list").is_empty());
        assert!(store.try_get_repeated("entry_list").is_none());
    }

    #[test]
    fn test_add_creates_intermediate_structure() {
        let mut store = DataStore::new();
        store.add_repeated_integer("entry_list", "hash", 2, 1589).unwrap();

        let children = store.get_repeated_values("entry_list");
        assert_eq!(children.len(), 3);
        assert!(children[0].is_empty());
        assert!(children[1].is_empty());
        assert_eq!(children[2].get_integer("hash"), Some(1589));
        assert_eq!(store.get_integer("entry_list[2].hash"), Some(1589));
    }

    #[test]
    fn test_nested_groups() {
        let mut store = DataStore::new();
        store.add_text("cameras[1].views[0].name", "far").unwrap();
        store.add_float("cameras[1].views[0].fov", 60.5).unwrap();

        assert_eq!(store.get_repeated_values("cameras").len(), 2);
        assert_eq!(store.get_repeated_values("cameras[1].views").len(), 1);
        assert_eq!(store.get_text("cameras[1].views[0].name"), Some("far"));
        assert_eq!(store.get_float("cameras[1].views[0].fov"), Some(60.5));
        assert!(store.contains("cameras[1]"));
        assert!(!store.contains("cameras[2]"));
    }

    #[test]
    fn test_typed_getters_do_not_coerce() {
        let mut store = DataStore::new();
        store.add_text("tag", "MAP4").unwrap();
        assert_eq!(store.get_integer("tag"), None);
        assert_eq!(store.get_text("tag"), Some("MAP4"));
    }

    #[test]
    fn test_setting_a_value_drops_the_stale_capture() {
        let mut store = DataStore::new();
        store
            .insert_field(
                "count",
                FieldEntry::captured(vec![0, 3], Some(FieldValue::Integer(3))),
            )
            .unwrap();
        store.add_integer("count", 2).unwrap();
        assert_eq!(store.get_raw_value("count"), None);
        assert_eq!(store.get_integer("count"), Some(2));

        store.add_raw_value("count", vec![0, 9]).unwrap();
        assert_eq!(store.get_integer("count"), None);
        assert_eq!(store.get_raw_value("count"), Some(&[0_u8, 9][..]));
    }

    #[test]
    fn test_rejects_conflicting_shapes() {
        let mut store = DataStore::new();
        store.add_integer("count", 1).unwrap();
        assert!(matches!(
            store.push_repeated("count", DataStore::new()),
            Err(CodecError::InvalidPath { .. })
        ));
        assert!(matches!(
            store.add_integer("count[0].x", 1),
            Err(CodecError::InvalidPath { .. })
        ));
        assert!(matches!(
            store.add_integer("group.x", 1),
            Err(CodecError::InvalidPath { .. })
        ));
        assert!(matches!(
            store.add_integer("list[0]", 1),
            Err(CodecError::InvalidPath { .. })
        ));
    }

    #[test]
    fn test_far_out_of_range_index_is_rejected() {
        let mut store = DataStore::new();
        for path in ["g[18446744073709551615].x", "g[4000000000].x"] {
            assert!(matches!(
                store.add_integer(path, 1),
                Err(CodecError::InvalidPath { .. })
            ));
        }
        assert!(store.get_repeated_values("g").is_empty());

        store.add_integer("g[2].x", 1).unwrap();
        assert_eq!(store.get_repeated_values("g").len(), 3);
        assert_eq!(store.get_integer("g[2].x"), Some(1));
    }

    #[test]
    fn test_structural_edits_preserve_order() {
        let mut store = DataStore::new();
        for hash in [10, 20, 30] {
            let mut child = DataStore::new();
            child.add_integer("hash", hash).unwrap();
            store.push_repeated("entries", child).unwrap();
        }

        let removed = store.remove_repeated("entries", 1).unwrap().unwrap();
        assert_eq!(removed.get_integer("hash"), Some(20));
        assert_eq!(store.remove_repeated("entries", 5).unwrap(), None);

        let hashes: Vec<i64> = store
            .get_repeated_values("entries")
            .iter()
            .filter_map(|c| c.get_integer("hash"))
            .collect();
        assert_eq!(hashes, vec![10, 30]);
    }

    #[test]
    fn test_remove_keeps_index_consistent() {
        let mut store = DataStore::new();
        store.add_integer("a", 1).unwrap();
        store.add_integer("b", 2).unwrap();
        store.add_integer("c", 3).unwrap();

        assert!(store.remove("a").is_some());
        assert_eq!(store.keys().collect::<Vec<_>>(), vec!["b", "c"]);
        assert_eq!(store.get_integer("c"), Some(3));
        store.add_integer("a", 4).unwrap();
        assert_eq!(store.keys().collect::<Vec<_>>(), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_nan_floats_compare_equal_to_themselves() {
        let mut a = DataStore::new();
        a.add_float("x", f32::NAN).unwrap();
        let b = a.clone();
        assert_eq!(a, b);
    }
}
