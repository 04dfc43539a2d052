use log::{Level, debug, log_enabled, trace, warn};

use crate::err::{CodecError, FieldDecodeError, Result};
use crate::settings::CodecSettings;
use crate::store::path::{child_path, item_path};
use crate::store::{DataStore, FieldEntry};
use crate::structure_spec::{
    AtomicField, FieldBody, FieldDescriptor, Quantity, RepeaterField, StructureSpec, min_size,
};
use crate::type_codec::{FieldContext, codec_for};
use crate::utils::{ByteCursor, bytes, format_hexdump};

/// Bytes shown on either side of a failing offset in debug logs.
const FAILURE_CONTEXT_RADIUS: usize = 48;

/// Format-specific conversion of a parsed store into a domain object.
///
/// Implementors only write [`StructureParser::generate`]; the byte-level work is done by
/// [`parse_structure`].
pub trait StructureParser {
    type Output;

    fn generate(&self, store: &DataStore) -> Result<Self::Output>;

    fn parse(
        &self,
        buffer: &[u8],
        spec: &StructureSpec,
        settings: &CodecSettings,
    ) -> Result<Self::Output> {
        let store = parse_structure(buffer, spec, settings)?;
        self.generate(&store)
    }
}

/// Walk `spec` over `buffer`, capturing every field into a fresh [`DataStore`].
///
/// Either the whole buffer is described or the call fails; a partially filled store is
/// never returned.
pub fn parse_structure(
    buffer: &[u8],
    spec: &StructureSpec,
    settings: &CodecSettings,
) -> Result<DataStore> {
    debug!(
        "Parsing {} bytes with structure spec `{}`",
        buffer.len(),
        spec.name()
    );

    let mut builder = StoreBuilder {
        cursor: ByteCursor::new(buffer),
        store: DataStore::new(),
        settings,
    };

    match builder.parse_all(spec.fields()) {
        Ok(()) => Ok(builder.store),
        Err(e) => {
            log_failure_context(buffer, &e);
            Err(e)
        }
    }
}

fn log_failure_context(buffer: &[u8], err: &CodecError) {
    if let CodecError::FieldDecode { offset, .. } = err {
        if log_enabled!(Level::Debug) {
            let (window, start) = bytes::window(buffer, *offset as usize, FAILURE_CONTEXT_RADIUS);
            debug!(
                "{}\nBytes around offset {}:\n{}",
                err,
                offset,
                format_hexdump(window, start)
            );
        }
    }
}

struct StoreBuilder<'a, 's> {
    cursor: ByteCursor<'a>,
    store: DataStore,
    settings: &'s CodecSettings,
}

impl StoreBuilder<'_, '_> {
    fn parse_all(&mut self, fields: &[FieldDescriptor]) -> Result<()> {
        self.parse_fields(fields, None)?;

        if !self.cursor.is_eof() {
            let remaining = self.cursor.remaining();
            if self.settings.should_reject_trailing_bytes() {
                return Err(CodecError::TrailingBytes {
                    offset: self.cursor.position(),
                    remaining,
                });
            }
            warn!(
                "offset {}: ignoring {} trailing bytes not described by the structure spec",
                self.cursor.position(),
                remaining
            );
        }
        Ok(())
    }

    fn parse_fields(&mut self, fields: &[FieldDescriptor], scope: Option<&str>) -> Result<()> {
        for field in fields {
            let path = child_path(scope, &field.name);
            match &field.body {
                FieldBody::Atomic(atomic) => self.parse_atomic(&path, scope, atomic)?,
                FieldBody::Repeater(repeater) => self.parse_repeater(&path, scope, repeater)?,
            }
        }
        Ok(())
    }

    /// Resolve a size or count to a non-negative number.
    fn resolve_quantity(
        &self,
        quantity: &Quantity,
        what: &'static str,
        path: &str,
        scope: Option<&str>,
    ) -> Result<usize> {
        match quantity {
            Quantity::Literal(n) => Ok(*n),
            Quantity::Remaining => Ok(self.cursor.remaining()),
            Quantity::Formula(formula) => {
                let value = formula.evaluate(scope, &self.store)?;
                usize::try_from(value).map_err(|_| {
                    CodecError::field_decode(
                        path,
                        self.cursor.position(),
                        FieldDecodeError::NegativeLength { what, value },
                    )
                })
            }
        }
    }

    fn parse_atomic(&mut self, path: &str, scope: Option<&str>, field: &AtomicField) -> Result<()> {
        let offset = self.cursor.position();
        let width = self.resolve_quantity(&field.size, "size", path, scope)?;
        trace!("offset {}: `{}` ({}, {} bytes)", offset, path, field.kind, width);

        let codec = codec_for(field.kind).ok_or_else(|| CodecError::InvalidSpec {
            spec_id: path.to_owned(),
            message: format!("{} is not an atomic kind", field.kind),
        })?;

        let raw = self
            .cursor
            .take_bytes(width, "field")
            .map_err(|e| CodecError::field_decode(path, offset, e))?;

        let ctx = FieldContext {
            width,
            signed: field.signed,
            reverse: field.reverse,
            encoding: self.settings.get_text_encoding(),
        };
        let value =
            (codec.decode)(raw, &ctx).map_err(|e| CodecError::field_decode(path, offset, e))?;

        self.store
            .insert_field(path, FieldEntry::captured(raw.to_vec(), value))
    }

    fn parse_repeater(
        &mut self,
        path: &str,
        scope: Option<&str>,
        repeater: &RepeaterField,
    ) -> Result<()> {
        let offset = self.cursor.position();
        let count = self.resolve_quantity(&repeater.count, "count", path, scope)?;

        let limit = self.settings.get_max_repeat_count();
        if count > limit {
            return Err(CodecError::field_decode(
                path,
                offset,
                FieldDecodeError::RepeatCountTooLarge { count, limit },
            ));
        }

        let need = count.saturating_mul(min_size(&repeater.item));
        let have = self.cursor.remaining();
        if need > have {
            return Err(CodecError::field_decode(
                path,
                offset,
                FieldDecodeError::RepeatCountUnsatisfiable { count, need, have },
            ));
        }

        debug!("offset {}: repeater `{}` with {} items", offset, path, count);
        self.store.ensure_repeated(path)?;
        for i in 0..count {
            self.store.push_repeated(path, DataStore::new())?;
            let item_scope = item_path(path, i);
            self.parse_fields(&repeater.item, Some(&item_scope))?;
        }
        Ok(())
    }
}
