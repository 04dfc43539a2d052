//! Declarative field layouts.
//!
//! A structure spec is an ordered list of field descriptors; field order is byte order on
//! disk. Specs are usually loaded from JSON:
//!
//! ```json
//! [
//!   { "name": "tag", "kind": "Text", "size": 4 },
//!   { "name": "entry_count", "kind": "Integer", "size": 4, "reverse": true },
//!   { "name": "entry_list", "kind": "Repeater", "count": "=?entry_count?", "itemSpec": [
//!     { "name": "hash", "kind": "Integer", "size": 4, "reverse": true },
//!     { "name": "payload", "kind": "Raw", "size": "=?entry_count?*2" }
//!   ] },
//!   { "name": "tail", "kind": "Gap", "size": "remaining" }
//! ]
//! ```

use std::fmt;

use log::debug;
use serde::Deserialize;

use crate::err::{CodecError, Result};
use crate::formula::{Formula, looks_like_formula};
use crate::store::path::is_valid_name;

pub const REMAINING_KEYWORD: &str = "remaining";
pub const FLOAT_WIDTH: usize = 4;
pub const MAX_INTEGER_WIDTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum FieldKind {
    Text,
    Integer,
    FloatingPoint,
    #[serde(alias = "Gap")]
    Raw,
    Repeater,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::Text => "Text",
            FieldKind::Integer => "Integer",
            FieldKind::FloatingPoint => "FloatingPoint",
            FieldKind::Raw => "Raw",
            FieldKind::Repeater => "Repeater",
        };
        f.write_str(name)
    }
}

/// A field size or repeat count.
#[derive(Debug, Clone, PartialEq)]
pub enum Quantity {
    Literal(usize),
    Formula(Formula),
    /// Everything left in the buffer. Only valid as the size of the last top-level field.
    Remaining,
}

impl Quantity {
    pub fn formula(source: &str) -> Result<Quantity> {
        Formula::parse(source)
            .map(Quantity::Formula)
            .map_err(|e| CodecError::formula(source, None, e))
    }

    /// Lower bound in bytes, used to reject impossible repeat counts early.
    fn min_value(&self) -> usize {
        match self {
            Quantity::Literal(n) => *n,
            Quantity::Formula(_) | Quantity::Remaining => 0,
        }
    }
}

impl From<usize> for Quantity {
    fn from(n: usize) -> Self {
        Quantity::Literal(n)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quantity::Literal(n) => write!(f, "{n}"),
            Quantity::Formula(formula) => write!(f, "{formula}"),
            Quantity::Remaining => f.write_str(REMAINING_KEYWORD),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AtomicField {
    pub kind: FieldKind,
    pub size: Quantity,
    /// On-disk byte order is the reverse of the codec's big-endian packing.
    pub reverse: bool,
    /// Sign-extend narrow integers instead of zero-extending them.
    pub signed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RepeaterField {
    pub count: Quantity,
    pub item: Vec<FieldDescriptor>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldBody {
    Atomic(AtomicField),
    Repeater(RepeaterField),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub body: FieldBody,
}

impl FieldDescriptor {
    fn atomic(name: &str, kind: FieldKind, size: Quantity) -> Self {
        FieldDescriptor {
            name: name.to_owned(),
            body: FieldBody::Atomic(AtomicField {
                kind,
                size,
                reverse: false,
                signed: false,
            }),
        }
    }

    pub fn text(name: &str, size: impl Into<Quantity>) -> Self {
        Self::atomic(name, FieldKind::Text, size.into())
    }

    pub fn integer(name: &str, size: impl Into<Quantity>) -> Self {
        Self::atomic(name, FieldKind::Integer, size.into())
    }

    pub fn float(name: &str) -> Self {
        Self::atomic(name, FieldKind::FloatingPoint, Quantity::Literal(FLOAT_WIDTH))
    }

    pub fn raw(name: &str, size: impl Into<Quantity>) -> Self {
        Self::atomic(name, FieldKind::Raw, size.into())
    }

    pub fn repeater(name: &str, count: impl Into<Quantity>, item: Vec<FieldDescriptor>) -> Self {
        FieldDescriptor {
            name: name.to_owned(),
            body: FieldBody::Repeater(RepeaterField {
                count: count.into(),
                item,
            }),
        }
    }

    /// Mark an atomic field as stored in reversed (little-endian) byte order.
    pub fn reversed(mut self) -> Self {
        if let FieldBody::Atomic(atomic) = &mut self.body {
            atomic.reverse = true;
        }
        self
    }

    pub fn signed(mut self) -> Self {
        if let FieldBody::Atomic(atomic) = &mut self.body {
            atomic.signed = true;
        }
        self
    }

    pub fn kind(&self) -> FieldKind {
        match &self.body {
            FieldBody::Atomic(atomic) => atomic.kind,
            FieldBody::Repeater(_) => FieldKind::Repeater,
        }
    }

    fn min_size(&self) -> usize {
        match &self.body {
            FieldBody::Atomic(atomic) => atomic.size.min_value(),
            FieldBody::Repeater(repeater) => repeater
                .count
                .min_value()
                .saturating_mul(min_size(&repeater.item)),
        }
    }
}

/// Minimum number of bytes `fields` can occupy.
pub(crate) fn min_size(fields: &[FieldDescriptor]) -> usize {
    fields
        .iter()
        .fold(0_usize, |acc, f| acc.saturating_add(f.min_size()))
}

/// An ordered, validated field layout for one binary format.
#[derive(Debug, Clone, PartialEq)]
pub struct StructureSpec {
    name: String,
    fields: Vec<FieldDescriptor>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum QuantityDef {
    Number(i64),
    Text(String),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct FieldDef {
    name: String,
    kind: FieldKind,
    #[serde(default)]
    size: Option<QuantityDef>,
    #[serde(default)]
    count: Option<QuantityDef>,
    #[serde(default)]
    item_spec: Option<Vec<FieldDef>>,
    #[serde(default)]
    reverse: bool,
    #[serde(default)]
    signed: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SpecDef {
    Fields(Vec<FieldDef>),
    Named {
        #[serde(default)]
        name: Option<String>,
        fields: Vec<FieldDef>,
    },
}

fn quantity_from_def(spec_id: &str, path: &str, def: QuantityDef) -> Result<Quantity> {
    match def {
        QuantityDef::Number(n) => usize::try_from(n).map(Quantity::Literal).map_err(|_| {
            CodecError::invalid_spec(spec_id, format!("`{path}`: negative literal {n}"))
        }),
        QuantityDef::Text(text) => {
            let trimmed = text.trim();
            if trimmed.eq_ignore_ascii_case(REMAINING_KEYWORD) {
                Ok(Quantity::Remaining)
            } else if let Ok(n) = trimmed.parse::<usize>() {
                Ok(Quantity::Literal(n))
            } else if looks_like_formula(trimmed) {
                Formula::parse(trimmed).map(Quantity::Formula).map_err(|e| {
                    CodecError::invalid_spec(spec_id, format!("`{path}`: {e}"))
                })
            } else {
                Err(CodecError::invalid_spec(
                    spec_id,
                    format!("`{path}`: `{text}` is neither a number nor a formula"),
                ))
            }
        }
    }
}

fn field_from_def(spec_id: &str, scope: &str, def: FieldDef) -> Result<FieldDescriptor> {
    let path = if scope.is_empty() {
        def.name.clone()
    } else {
        format!("{scope}.{}", def.name)
    };
    let invalid = |message: &str| CodecError::invalid_spec(spec_id, format!("`{path}`: {message}"));

    match def.kind {
        FieldKind::Repeater => {
            if def.size.is_some() || def.reverse || def.signed {
                return Err(invalid("a Repeater takes `count` and `itemSpec` only"));
            }
            let count = def.count.ok_or_else(|| invalid("a Repeater needs a `count`"))?;
            let item = def
                .item_spec
                .ok_or_else(|| invalid("a Repeater needs an `itemSpec`"))?;
            let item = item
                .into_iter()
                .map(|f| field_from_def(spec_id, &format!("{path}[]"), f))
                .collect::<Result<Vec<_>>>()?;
            Ok(FieldDescriptor::repeater(
                &def.name,
                quantity_from_def(spec_id, &path, count)?,
                item,
            ))
        }
        kind => {
            if def.count.is_some() || def.item_spec.is_some() {
                return Err(invalid("`count` and `itemSpec` are only valid on a Repeater"));
            }
            let size = match (def.size, kind) {
                (Some(size), _) => quantity_from_def(spec_id, &path, size)?,
                (None, FieldKind::FloatingPoint) => Quantity::Literal(FLOAT_WIDTH),
                (None, _) => return Err(invalid("missing `size`")),
            };
            if def.signed && kind != FieldKind::Integer {
                return Err(invalid("`signed` is only valid on an Integer"));
            }
            if def.reverse && !matches!(kind, FieldKind::Integer | FieldKind::FloatingPoint) {
                return Err(invalid("`reverse` is only valid on an Integer or FloatingPoint"));
            }
            match (kind, &size) {
                (FieldKind::Integer, Quantity::Literal(n)) if !(1..=MAX_INTEGER_WIDTH).contains(n) => {
                    return Err(invalid("Integer fields are 1 to 8 bytes wide"));
                }
                (FieldKind::FloatingPoint, Quantity::Literal(n)) if *n != FLOAT_WIDTH => {
                    return Err(invalid("FloatingPoint fields are 4 bytes wide"));
                }
                (FieldKind::Raw, _) | (_, Quantity::Literal(_) | Quantity::Formula(_)) => {}
                (_, Quantity::Remaining) => {
                    return Err(invalid("only Raw fields may use `remaining`"));
                }
            }

            let mut field = FieldDescriptor::atomic(&def.name, kind, size);
            if def.reverse {
                field = field.reversed();
            }
            if def.signed {
                field = field.signed();
            }
            Ok(field)
        }
    }
}

fn validate_level(spec_id: &str, scope: &str, fields: &[FieldDescriptor], top_level: bool) -> Result<()> {
    let mut seen = hashbrown::HashSet::with_capacity(fields.len());
    for (i, field) in fields.iter().enumerate() {
        let path = if scope.is_empty() {
            field.name.clone()
        } else {
            format!("{scope}.{}", field.name)
        };

        if !is_valid_name(&field.name) {
            return Err(CodecError::invalid_spec(
                spec_id,
                format!("`{path}`: names must be non-empty and free of whitespace and `.[]?`"),
            ));
        }
        if !seen.insert(field.name.as_str()) {
            return Err(CodecError::invalid_spec(
                spec_id,
                format!("`{path}`: duplicate field name"),
            ));
        }

        match &field.body {
            FieldBody::Atomic(atomic) => {
                let is_last = top_level && i == fields.len() - 1;
                if atomic.size == Quantity::Remaining && !is_last {
                    return Err(CodecError::invalid_spec(
                        spec_id,
                        format!("`{path}`: `remaining` is only valid on the last top-level field"),
                    ));
                }
            }
            FieldBody::Repeater(repeater) => {
                if repeater.count == Quantity::Remaining {
                    return Err(CodecError::invalid_spec(
                        spec_id,
                        format!("`{path}`: a repeat count cannot be `remaining`"),
                    ));
                }
                validate_level(spec_id, &format!("{path}[]"), &repeater.item, false)?;
            }
        }
    }
    Ok(())
}

impl StructureSpec {
    /// Build a spec from descriptors, validating names and placement rules.
    pub fn new(name: impl Into<String>, fields: Vec<FieldDescriptor>) -> Result<Self> {
        let name = name.into();
        validate_level(&name, "", &fields, true)?;
        Ok(StructureSpec { name, fields })
    }

    pub fn from_json_str(spec_id: &str, text: &str) -> Result<Self> {
        let def: SpecDef = serde_json::from_str(text)
            .map_err(|e| CodecError::invalid_spec(spec_id, e.to_string()))?;

        let (name, fields) = match def {
            SpecDef::Fields(fields) => (spec_id.to_owned(), fields),
            SpecDef::Named { name, fields } => (name.unwrap_or_else(|| spec_id.to_owned()), fields),
        };

        let fields = fields
            .into_iter()
            .map(|f| field_from_def(spec_id, "", f))
            .collect::<Result<Vec<_>>>()?;

        validate_level(spec_id, "", &fields, true)?;
        debug!("Loaded structure spec `{}` ({} top-level fields)", name, fields.len());
        Ok(StructureSpec { name, fields })
    }

    pub fn from_json_slice(spec_id: &str, bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| CodecError::invalid_spec(spec_id, format!("spec is not UTF-8: {e}")))?;
        Self::from_json_str(spec_id, text)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Minimum number of bytes a buffer must have to satisfy this spec.
    pub fn min_size(&self) -> usize {
        min_size(&self.fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const BANK_MAP: &str = r#"[
        { "name": "tag", "kind": "Text", "size": 4 },
        { "name": "entry_count", "kind": "Integer", "size": 4, "reverse": true },
        { "name": "entry_list", "kind": "Repeater", "count": "=?entry_count?", "itemSpec": [
            { "name": "hash", "kind": "Integer", "size": "4", "reverse": true },
            { "name": "scale", "kind": "FloatingPoint" },
            { "name": "delta", "kind": "Integer", "size": 2, "signed": true }
        ] },
        { "name": "tail", "kind": "Gap", "size": "remaining" }
    ]"#;

    #[test]
    fn test_loads_json_spec() {
        let spec = StructureSpec::from_json_str("bank_map", BANK_MAP).unwrap();
        assert_eq!(spec.name(), "bank_map");

        let expected = vec![
            FieldDescriptor::text("tag", 4),
            FieldDescriptor::integer("entry_count", 4).reversed(),
            FieldDescriptor::repeater(
                "entry_list",
                Quantity::formula("=?entry_count?").unwrap(),
                vec![
                    FieldDescriptor::integer("hash", 4).reversed(),
                    FieldDescriptor::float("scale"),
                    FieldDescriptor::integer("delta", 2).signed(),
                ],
            ),
            FieldDescriptor::raw("tail", Quantity::Remaining),
        ];
        assert_eq!(spec.fields(), expected.as_slice());
        assert_eq!(spec.min_size(), 8);
    }

    #[test]
    fn test_accepts_named_object_form() {
        let spec = StructureSpec::from_json_str(
            "x",
            r#"{ "name": "camera", "fields": [ { "name": "count", "kind": "Integer", "size": 2 } ] }"#,
        )
        .unwrap();
        assert_eq!(spec.name(), "camera");
        assert_eq!(spec.fields().len(), 1);
    }

    fn assert_invalid(json: &str) {
        match StructureSpec::from_json_str("bad", json) {
            Err(CodecError::InvalidSpec { spec_id, .. }) => assert_eq!(spec_id, "bad"),
            other => panic!("expected InvalidSpec for {json}, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_malformed_specs() {
        assert_invalid("not json");
        assert_invalid(r#"[{ "name": "a", "kind": "Blob", "size": 1 }]"#);
        assert_invalid(r#"[{ "name": "a", "kind": "Text" }]"#);
        assert_invalid(r#"[{ "name": "a", "kind": "Integer", "size": 9 }]"#);
        assert_invalid(r#"[{ "name": "a", "kind": "Integer", "size": 0 }]"#);
        assert_invalid(r#"[{ "name": "a", "kind": "FloatingPoint", "size": 8 }]"#);
        assert_invalid(r#"[{ "name": "a", "kind": "Raw", "size": -1 }]"#);
        assert_invalid(r#"[{ "name": "a", "kind": "Raw", "size": "lots" }]"#);
        assert_invalid(r#"[{ "name": "a", "kind": "Raw", "size": "=?b" }]"#);
        assert_invalid(r#"[{ "name": "a.b", "kind": "Raw", "size": 1 }]"#);
        assert_invalid(r#"[{ "name": "a", "kind": "Raw", "size": 1 }, { "name": "a", "kind": "Raw", "size": 1 }]"#);
        assert_invalid(r#"[{ "name": "a", "kind": "Repeater", "count": 2 }]"#);
        assert_invalid(r#"[{ "name": "a", "kind": "Repeater", "itemSpec": [] }]"#);
        assert_invalid(r#"[{ "name": "a", "kind": "Raw", "size": 1, "count": 2 }]"#);
        assert_invalid(r#"[{ "name": "a", "kind": "Text", "size": 1, "signed": true }]"#);
        assert_invalid(r#"[{ "name": "a", "kind": "Raw", "size": 1, "colour": "red" }]"#);
        assert_invalid(r#"[{ "name": "a", "kind": "Text", "size": "remaining" }]"#);
        assert_invalid(
            r#"[{ "name": "a", "kind": "Raw", "size": "remaining" }, { "name": "b", "kind": "Raw", "size": 1 }]"#,
        );
        assert_invalid(
            r#"[{ "name": "g", "kind": "Repeater", "count": 1, "itemSpec": [{ "name": "a", "kind": "Raw", "size": "remaining" }] }]"#,
        );
    }

    #[test]
    fn test_builder_validation() {
        assert!(StructureSpec::new("ok", vec![FieldDescriptor::raw("a", 1)]).is_ok());
        assert!(
            StructureSpec::new(
                "dup",
                vec![FieldDescriptor::raw("a", 1), FieldDescriptor::text("a", 1)]
            )
            .is_err()
        );
        assert!(StructureSpec::new("bad name", vec![FieldDescriptor::raw("", 1)]).is_err());
    }

    #[test]
    fn test_min_size_accounts_for_literal_repeaters() {
        let spec = StructureSpec::new(
            "s",
            vec![
                FieldDescriptor::integer("n", 2),
                FieldDescriptor::repeater(
                    "items",
                    3,
                    vec![FieldDescriptor::integer("a", 4), FieldDescriptor::raw("b", Quantity::formula("?n?").unwrap())],
                ),
            ],
        )
        .unwrap();
        assert_eq!(spec.min_size(), 2 + 3 * 4);
    }
}
