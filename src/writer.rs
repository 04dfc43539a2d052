use log::{debug, trace};

use crate::err::{CodecError, FieldDecodeError, FieldEncodeError, Result};
use crate::formula::{Formula, resolve_pointer_path};
use crate::settings::CodecSettings;
use crate::store::DataStore;
use crate::store::path::{child_path, item_path, parse_path};
use crate::structure_spec::{
    AtomicField, FieldBody, FieldDescriptor, Quantity, RepeaterField, StructureSpec,
};
use crate::type_codec::{FieldContext, codec_for};

/// Upper bound on the output buffer reserved up front.
const MAX_PREALLOCATION: usize = 1 << 16;

/// Format-specific population of a [`DataStore`] from a domain object.
pub trait StructureWriter {
    type Input;

    fn fill_store(&self, input: &Self::Input) -> Result<DataStore>;

    fn write(
        &self,
        input: &Self::Input,
        spec: &StructureSpec,
        settings: &CodecSettings,
    ) -> Result<Vec<u8>> {
        let store = self.fill_store(input)?;
        write_structure(&store, spec, settings)
    }
}

/// Replay `spec` over `store`, emitting bytes in field order.
///
/// Count and length fields referenced by simple formulas are first updated on a private copy
/// of the store so they agree with the children and captures actually present. The caller's
/// store is never modified.
pub fn write_structure(
    store: &DataStore,
    spec: &StructureSpec,
    settings: &CodecSettings,
) -> Result<Vec<u8>> {
    debug!("Writing store with structure spec `{}`", spec.name());

    let mut working = store.clone();
    let mut levels = Vec::new();
    propagate_fields(&mut working, spec.fields(), None, &mut levels)?;

    let mut emitter = Emitter {
        out: Vec::with_capacity(spec.min_size().min(MAX_PREALLOCATION)),
        store: &working,
        settings,
    };
    emitter.emit_fields(spec.fields(), None)?;
    Ok(emitter.out)
}

/// One nesting level of the spec, used to find where a pointer's field is declared.
struct Level<'f> {
    scope: Option<String>,
    fields: &'f [FieldDescriptor],
}

fn propagate_fields<'f>(
    store: &mut DataStore,
    fields: &'f [FieldDescriptor],
    scope: Option<&str>,
    levels: &mut Vec<Level<'f>>,
) -> Result<()> {
    levels.push(Level {
        scope: scope.map(str::to_owned),
        fields,
    });

    for field in fields {
        let path = child_path(scope, &field.name);
        match &field.body {
            FieldBody::Atomic(atomic) => {
                let Quantity::Formula(formula) = &atomic.size else {
                    continue;
                };
                let raw_len = match store.get_field(&path) {
                    Some(entry) if entry.value().is_none() => entry.raw().map(<[u8]>::len),
                    _ => None,
                };
                if let Some(len) = raw_len {
                    derive_pointer(store, formula, len, scope, levels)?;
                }
            }
            FieldBody::Repeater(repeater) => {
                let children = store.get_repeated_values(&path).len();
                if let Quantity::Formula(formula) = &repeater.count {
                    derive_pointer(store, formula, children, scope, levels)?;
                }
                for i in 0..children {
                    let item_scope = item_path(&path, i);
                    propagate_fields(store, &repeater.item, Some(&item_scope), levels)?;
                }
            }
        }
    }

    levels.pop();
    Ok(())
}

/// Set the field `formula` points at so that the formula evaluates to `target`.
///
/// A pointer that already satisfies the formula is left alone, so a truncating `/` keeps
/// the parsed value.
fn derive_pointer(
    store: &mut DataStore,
    formula: &Formula,
    target: usize,
    scope: Option<&str>,
    levels: &[Level<'_>],
) -> Result<()> {
    let Ok(target) = i64::try_from(target) else {
        return Ok(());
    };
    if formula.evaluate(scope, store).ok() == Some(target) {
        return Ok(());
    }
    let Some((name, value)) = formula.solve_for(target) else {
        return Ok(());
    };

    let path = resolve_pointer_path(name, scope, store)
        .or_else(|| declared_path(levels, name))
        .or_else(|| parse_path(name).is_ok().then(|| name.to_owned()));
    let Some(path) = path else {
        return Ok(());
    };

    if store.get_integer(&path) != Some(value) {
        debug!("Deriving `{}` = {} from `{}`", path, value, formula);
        store.add_integer(&path, value)?;
    }
    Ok(())
}

fn declared_path(levels: &[Level<'_>], name: &str) -> Option<String> {
    levels
        .iter()
        .rev()
        .find(|level| {
            level
                .fields
                .iter()
                .any(|f| f.name == name && matches!(f.body, FieldBody::Atomic(_)))
        })
        .map(|level| child_path(level.scope.as_deref(), name))
}

struct Emitter<'st, 's> {
    out: Vec<u8>,
    store: &'st DataStore,
    settings: &'s CodecSettings,
}

impl Emitter<'_, '_> {
    fn emit_fields(&mut self, fields: &[FieldDescriptor], scope: Option<&str>) -> Result<()> {
        for field in fields {
            let path = child_path(scope, &field.name);
            match &field.body {
                FieldBody::Atomic(atomic) => self.emit_atomic(&path, scope, atomic)?,
                FieldBody::Repeater(repeater) => self.emit_repeater(&path, scope, repeater)?,
            }
        }
        Ok(())
    }

    fn resolve_size(&self, path: &str, scope: Option<&str>, size: &Quantity) -> Result<usize> {
        match size {
            Quantity::Literal(n) => Ok(*n),
            Quantity::Remaining => self
                .store
                .get_raw_value(path)
                .map(<[u8]>::len)
                .ok_or_else(|| CodecError::StoreKeyNotFound {
                    path: path.to_owned(),
                }),
            Quantity::Formula(formula) => {
                let value = formula.evaluate(scope, self.store)?;
                usize::try_from(value).map_err(|_| {
                    CodecError::field_encode(
                        path,
                        FieldDecodeError::NegativeLength { what: "size", value }.into(),
                    )
                })
            }
        }
    }

    fn emit_atomic(&mut self, path: &str, scope: Option<&str>, field: &AtomicField) -> Result<()> {
        let width = self.resolve_size(path, scope, &field.size)?;
        trace!("offset {}: `{}` ({}, {} bytes)", self.out.len(), path, field.kind, width);

        let entry = self
            .store
            .get_field(path)
            .filter(|entry| !entry.is_empty())
            .ok_or_else(|| CodecError::StoreKeyNotFound {
                path: path.to_owned(),
            })?;

        if let Some(value) = entry.value() {
            let codec = codec_for(field.kind).ok_or_else(|| {
                CodecError::field_encode(
                    path,
                    FieldEncodeError::KindMismatch {
                        declared: field.kind,
                        found: value.type_name(),
                    },
                )
            })?;
            let ctx = FieldContext {
                width,
                signed: field.signed,
                reverse: field.reverse,
                encoding: self.settings.get_text_encoding(),
            };
            let bytes = (codec.encode)(value, &ctx).map_err(|e| CodecError::field_encode(path, e))?;
            self.out.extend_from_slice(&bytes);
        } else if let Some(raw) = entry.raw() {
            if raw.len() != width {
                return Err(CodecError::field_encode(
                    path,
                    FieldEncodeError::RawLengthMismatch {
                        expected: width,
                        actual: raw.len(),
                    },
                ));
            }
            self.out.extend_from_slice(raw);
        }
        Ok(())
    }

    fn emit_repeater(
        &mut self,
        path: &str,
        scope: Option<&str>,
        repeater: &RepeaterField,
    ) -> Result<()> {
        let children = self.store.get_repeated_values(path).len();
        let resolved = match &repeater.count {
            // Beyond `i64::MAX` no group can match, so the clamp still reports a mismatch.
            Quantity::Literal(n) => i64::try_from(*n).unwrap_or(i64::MAX),
            Quantity::Formula(formula) => formula.evaluate(scope, self.store)?,
            Quantity::Remaining => children as i64,
        };
        if usize::try_from(resolved).ok() != Some(children) {
            return Err(CodecError::RepeatCountMismatch {
                path: path.to_owned(),
                resolved,
                children,
            });
        }

        debug!("offset {}: repeater `{}` with {} items", self.out.len(), path, children);
        for i in 0..children {
            let item_scope = item_path(path, i);
            self.emit_fields(&repeater.item, Some(&item_scope))?;
        }
        Ok(())
    }
}
