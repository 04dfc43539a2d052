//! Portable tree-text form of a [`DataStore`].
//!
//! ```text
//! {
//!   "tag": { "raw": "4d415034", "value": { "text": "MAP4" } },
//!   "entry_list": [
//!     { "hash": { "raw": "00000635", "value": { "integer": 1589 } } }
//!   ]
//! }
//! ```
//!
//! Leaves are objects with an optional hex `raw` capture and an optional single-key `value`
//! (`text`, `integer`, `float`, or `float_bits` for non-finite floats, which JSON numbers
//! cannot carry). Repeated groups are arrays of child objects.

use serde::de::Error as _;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value as JsonValue};

use super::path::{child_path, is_valid_name, item_path};
use super::{DataStore, FieldEntry, FieldValue, StoreEntry};
use crate::err::{CodecError, Result};

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            FieldValue::Text(s) => map.serialize_entry("text", s)?,
            FieldValue::Integer(v) => map.serialize_entry("integer", v)?,
            FieldValue::Float(v) if v.is_finite() => map.serialize_entry("float", v)?,
            FieldValue::Float(v) => map.serialize_entry("float_bits", &v.to_bits())?,
        }
        map.end()
    }
}

impl Serialize for FieldEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let len = usize::from(self.raw.is_some()) + usize::from(self.value.is_some());
        let mut map = serializer.serialize_map(Some(len))?;
        if let Some(raw) = &self.raw {
            map.serialize_entry("raw", &hex::encode(raw))?;
        }
        if let Some(value) = &self.value {
            map.serialize_entry("value", value)?;
        }
        map.end()
    }
}

struct Children<'a>(&'a [DataStore]);

impl Serialize for Children<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for child in self.0 {
            seq.serialize_element(child)?;
        }
        seq.end()
    }
}

impl Serialize for DataStore {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, entry) in &self.entries {
            match entry {
                StoreEntry::Field(field) => map.serialize_entry(name, field)?,
                StoreEntry::Repeated(children) => map.serialize_entry(name, &Children(children))?,
            }
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for DataStore {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = JsonValue::deserialize(deserializer)?;
        DataStore::from_json(&value).map_err(D::Error::custom)
    }
}

fn malformed(path: &str, message: impl Into<String>) -> CodecError {
    CodecError::StoreFormat {
        path: path.to_owned(),
        message: message.into(),
    }
}

fn value_from_json(path: &str, json: &JsonValue) -> Result<FieldValue> {
    let object = json
        .as_object()
        .filter(|o| o.len() == 1)
        .ok_or_else(|| malformed(path, "`value` must be an object with exactly one key"))?;

    let (kind, v) = object
        .iter()
        .next()
        .ok_or_else(|| malformed(path, "`value` is empty"))?;

    match kind.as_str() {
        "text" => v
            .as_str()
            .map(|s| FieldValue::Text(s.to_owned()))
            .ok_or_else(|| malformed(path, "`text` must be a string")),
        "integer" => v
            .as_i64()
            .map(FieldValue::Integer)
            .ok_or_else(|| malformed(path, "`integer` must be a signed 64-bit integer")),
        "float" => v
            .as_f64()
            .map(|f| FieldValue::Float(f as f32))
            .ok_or_else(|| malformed(path, "`float` must be a number")),
        "float_bits" => v
            .as_u64()
            .and_then(|bits| u32::try_from(bits).ok())
            .map(|bits| FieldValue::Float(f32::from_bits(bits)))
            .ok_or_else(|| malformed(path, "`float_bits` must be a 32-bit unsigned integer")),
        other => Err(malformed(path, format!("unknown value kind `{other}`"))),
    }
}

fn field_from_json(path: &str, object: &Map<String, JsonValue>) -> Result<FieldEntry> {
    let mut field = FieldEntry::default();
    for (key, v) in object {
        match key.as_str() {
            "raw" => {
                let text = v
                    .as_str()
                    .ok_or_else(|| malformed(path, "`raw` must be a hex string"))?;
                let bytes = hex::decode(text)
                    .map_err(|e| malformed(path, format!("`raw` is not valid hex: {e}")))?;
                field.raw = Some(bytes);
            }
            "value" => field.value = Some(value_from_json(path, v)?),
            other => return Err(malformed(path, format!("unexpected key `{other}`"))),
        }
    }
    Ok(field)
}

fn store_from_json(scope: Option<&str>, object: &Map<String, JsonValue>) -> Result<DataStore> {
    let mut store = DataStore::new();
    for (name, v) in object {
        let path = child_path(scope, name);
        if !is_valid_name(name) {
            return Err(malformed(&path, "invalid field name"));
        }

        let entry = match v {
            JsonValue::Object(leaf) => StoreEntry::Field(field_from_json(&path, leaf)?),
            JsonValue::Array(items) => {
                let mut children = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let item_scope = item_path(&path, i);
                    let item = item
                        .as_object()
                        .ok_or_else(|| malformed(&item_scope, "group items must be objects"))?;
                    children.push(store_from_json(Some(&item_scope), item)?);
                }
                StoreEntry::Repeated(children)
            }
            _ => return Err(malformed(&path, "entries must be objects or arrays")),
        };

        *store.entry_or_insert_with(name, || StoreEntry::Repeated(Vec::new())) = entry;
    }
    Ok(store)
}

impl DataStore {
    pub fn to_json(&self) -> Result<JsonValue> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn to_json_string(&self, pretty: bool) -> Result<String> {
        let text = if pretty {
            serde_json::to_string_pretty(self)?
        } else {
            serde_json::to_string(self)?
        };
        Ok(text)
    }

    pub fn from_json(json: &JsonValue) -> Result<DataStore> {
        let object = json
            .as_object()
            .ok_or_else(|| malformed("<root>", "the store must be a JSON object"))?;
        store_from_json(None, object)
    }

    pub fn from_json_str(text: &str) -> Result<DataStore> {
        let json: JsonValue = serde_json::from_str(text)?;
        DataStore::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sample_store() -> DataStore {
        let mut store = DataStore::new();
        store
            .insert_field(
                "tag",
                FieldEntry::captured(b"MAP4".to_vec(), Some(FieldValue::Text("MAP4".into()))),
            )
            .unwrap();
        store.add_repeated_integer("entry_list", "hash", 0, 1589).unwrap();
        store
            .add_repeated_raw_value("entry_list", "marker", 0, vec![0xff, 0xff])
            .unwrap();
        store.add_float("scale", 0.5).unwrap();
        store.add_float("broken", f32::NAN).unwrap();
        store
    }

    #[test]
    fn test_exports_tree_text() {
        let json = sample_store().to_json().unwrap();
        assert_eq!(
            json,
            json!({
                "tag": { "raw": "4d415034", "value": { "text": "MAP4" } },
                "entry_list": [
                    { "hash": { "value": { "integer": 1589 } }, "marker": { "raw": "ffff" } }
                ],
                "scale": { "value": { "float": 0.5 } },
                "broken": { "value": { "float_bits": f32::NAN.to_bits() } }
            })
        );
    }

    #[test]
    fn test_import_restores_an_equal_store() {
        let store = sample_store();
        let text = store.to_json_string(true).unwrap();
        let restored = DataStore::from_json_str(&text).unwrap();
        assert_eq!(restored, store);
        assert_eq!(
            restored.keys().collect::<Vec<_>>(),
            vec!["tag", "entry_list", "scale", "broken"]
        );
    }

    #[test]
    fn test_import_reports_the_offending_path() {
        let err = DataStore::from_json(&json!({
            "entry_list": [ { "hash": { "raw": "zz" } } ]
        }))
        .unwrap_err();

        match err {
            CodecError::StoreFormat { path, .. } => assert_eq!(path, "entry_list[0].hash"),
            other => panic!("unexpected error {other:?}"),
        }

        assert!(DataStore::from_json(&json!([1, 2])).is_err());
        assert!(DataStore::from_json(&json!({ "x": 5 })).is_err());
        assert!(DataStore::from_json(&json!({ "x": { "value": { "integer": "5" } } })).is_err());
        assert!(DataStore::from_json(&json!({ "x": { "bytes": "00" } })).is_err());
    }
}
