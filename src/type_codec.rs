//! Scalar byte/value conversions.
//!
//! Integers are packed as 8 big-endian bytes and floats as 4 big-endian IEEE-754 bytes.
//! Narrower integer fields use the low-order bytes of the packing. Fields declared with
//! `reverse` are stored in the opposite byte order on disk.

use byteorder::{BigEndian, ByteOrder};
use encoding::{DecoderTrap, EncoderTrap, EncodingRef};

use crate::err::{FieldDecodeError, FieldEncodeError};
use crate::store::FieldValue;
use crate::structure_spec::{FLOAT_WIDTH, FieldKind, MAX_INTEGER_WIDTH};

pub type DecodeResult<T> = std::result::Result<T, FieldDecodeError>;
pub type EncodeResult<T> = std::result::Result<T, FieldEncodeError>;

/// Per-field parameters of a conversion.
#[derive(Clone, Copy)]
pub struct FieldContext {
    pub width: usize,
    pub signed: bool,
    pub reverse: bool,
    pub encoding: EncodingRef,
}

/// Encode/decode pair for one field kind.
pub struct ScalarCodec {
    pub kind: FieldKind,
    /// `None` for kinds that carry no decoded value.
    pub decode: fn(&[u8], &FieldContext) -> DecodeResult<Option<FieldValue>>,
    pub encode: fn(&FieldValue, &FieldContext) -> EncodeResult<Vec<u8>>,
}

static CODECS: [ScalarCodec; 4] = [
    ScalarCodec {
        kind: FieldKind::Text,
        decode: decode_text_field,
        encode: encode_text_field,
    },
    ScalarCodec {
        kind: FieldKind::Integer,
        decode: decode_integer_field,
        encode: encode_integer_field,
    },
    ScalarCodec {
        kind: FieldKind::FloatingPoint,
        decode: decode_float_field,
        encode: encode_float_field,
    },
    ScalarCodec {
        kind: FieldKind::Raw,
        decode: decode_raw_field,
        encode: encode_raw_field,
    },
];

/// Lookup the codec for an atomic kind. Repeaters have none.
pub fn codec_for(kind: FieldKind) -> Option<&'static ScalarCodec> {
    CODECS.iter().find(|codec| codec.kind == kind)
}

pub fn reverse_bytes(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().rev().copied().collect()
}

pub fn encode_integer(value: i64) -> [u8; 8] {
    let mut buf = [0; 8];
    BigEndian::write_i64(&mut buf, value);
    buf
}

pub fn decode_integer(bytes: &[u8]) -> DecodeResult<i64> {
    if bytes.len() != 8 {
        return Err(FieldDecodeError::WrongLength {
            kind: "integer",
            expected: 8,
            actual: bytes.len(),
        });
    }
    Ok(BigEndian::read_i64(bytes))
}

pub fn encode_float(value: f32) -> [u8; 4] {
    let mut buf = [0; 4];
    BigEndian::write_u32(&mut buf, value.to_bits());
    buf
}

pub fn decode_float(bytes: &[u8]) -> DecodeResult<f32> {
    if bytes.len() != FLOAT_WIDTH {
        return Err(FieldDecodeError::WrongLength {
            kind: "float",
            expected: FLOAT_WIDTH,
            actual: bytes.len(),
        });
    }
    Ok(f32::from_bits(BigEndian::read_u32(bytes)))
}

/// Decode NUL-padded text. Only trailing NULs are padding.
pub fn decode_text(bytes: &[u8], encoding: EncodingRef) -> DecodeResult<String> {
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    encoding
        .decode(&bytes[..end], DecoderTrap::Strict)
        .map_err(|message| FieldDecodeError::TextDecode {
            encoding: encoding.name(),
            message: message.into_owned(),
        })
}

/// Encode text into exactly `width` bytes, NUL-padded.
pub fn encode_text(text: &str, width: usize, encoding: EncodingRef) -> EncodeResult<Vec<u8>> {
    let mut bytes = encoding
        .encode(text, EncoderTrap::Strict)
        .map_err(|message| FieldEncodeError::TextEncode {
            encoding: encoding.name(),
            message: message.into_owned(),
        })?;
    if bytes.len() > width {
        return Err(FieldEncodeError::TextTooLong {
            width,
            actual: bytes.len(),
        });
    }
    bytes.resize(width, 0);
    Ok(bytes)
}

fn oriented<'a>(bytes: &'a [u8], ctx: &FieldContext) -> std::borrow::Cow<'a, [u8]> {
    if ctx.reverse {
        std::borrow::Cow::Owned(reverse_bytes(bytes))
    } else {
        std::borrow::Cow::Borrowed(bytes)
    }
}

fn check_length(kind: &'static str, bytes: &[u8], ctx: &FieldContext) -> DecodeResult<()> {
    if bytes.len() != ctx.width {
        return Err(FieldDecodeError::WrongLength {
            kind,
            expected: ctx.width,
            actual: bytes.len(),
        });
    }
    Ok(())
}

fn decode_text_field(bytes: &[u8], ctx: &FieldContext) -> DecodeResult<Option<FieldValue>> {
    check_length("text", bytes, ctx)?;
    decode_text(bytes, ctx.encoding).map(|s| Some(FieldValue::Text(s)))
}

fn encode_text_field(value: &FieldValue, ctx: &FieldContext) -> EncodeResult<Vec<u8>> {
    match value {
        FieldValue::Text(s) => encode_text(s, ctx.width, ctx.encoding),
        other => Err(kind_mismatch(FieldKind::Text, other)),
    }
}

fn decode_integer_field(bytes: &[u8], ctx: &FieldContext) -> DecodeResult<Option<FieldValue>> {
    if !(1..=MAX_INTEGER_WIDTH).contains(&ctx.width) {
        return Err(FieldDecodeError::UnsupportedIntegerWidth { width: ctx.width });
    }
    check_length("integer", bytes, ctx)?;

    let bytes = oriented(bytes, ctx);
    let negative = ctx.signed && bytes[0] & 0x80 != 0;
    let mut packed = if negative { [0xff; 8] } else { [0; 8] };
    packed[8 - ctx.width..].copy_from_slice(&bytes);

    decode_integer(&packed).map(|v| Some(FieldValue::Integer(v)))
}

fn integer_fits(value: i64, width: usize, signed: bool) -> bool {
    if width >= MAX_INTEGER_WIDTH {
        return true;
    }
    let bits = (width * 8) as u32;
    if signed {
        let bound = 1_i64 << (bits - 1);
        (-bound..bound).contains(&value)
    } else {
        (0..1_i64 << bits).contains(&value)
    }
}

fn encode_integer_field(value: &FieldValue, ctx: &FieldContext) -> EncodeResult<Vec<u8>> {
    let FieldValue::Integer(v) = value else {
        return Err(kind_mismatch(FieldKind::Integer, value));
    };
    if !(1..=MAX_INTEGER_WIDTH).contains(&ctx.width) {
        return Err(FieldDecodeError::UnsupportedIntegerWidth { width: ctx.width }.into());
    }
    if !integer_fits(*v, ctx.width, ctx.signed) {
        return Err(FieldEncodeError::IntegerOutOfRange {
            value: *v,
            width: ctx.width,
            signedness: if ctx.signed { "signed" } else { "unsigned" },
        });
    }

    let packed = encode_integer(*v);
    Ok(oriented(&packed[8 - ctx.width..], ctx).into_owned())
}

fn decode_float_field(bytes: &[u8], ctx: &FieldContext) -> DecodeResult<Option<FieldValue>> {
    check_length("float", bytes, ctx)?;
    decode_float(&oriented(bytes, ctx)).map(|v| Some(FieldValue::Float(v)))
}

fn encode_float_field(value: &FieldValue, ctx: &FieldContext) -> EncodeResult<Vec<u8>> {
    let FieldValue::Float(v) = value else {
        return Err(kind_mismatch(FieldKind::FloatingPoint, value));
    };
    if ctx.width != FLOAT_WIDTH {
        return Err(FieldDecodeError::WrongLength {
            kind: "float",
            expected: FLOAT_WIDTH,
            actual: ctx.width,
        }
        .into());
    }
    Ok(oriented(&encode_float(*v), ctx).into_owned())
}

fn decode_raw_field(bytes: &[u8], ctx: &FieldContext) -> DecodeResult<Option<FieldValue>> {
    check_length("raw", bytes, ctx)?;
    Ok(None)
}

fn encode_raw_field(value: &FieldValue, _ctx: &FieldContext) -> EncodeResult<Vec<u8>> {
    Err(kind_mismatch(FieldKind::Raw, value))
}

fn kind_mismatch(declared: FieldKind, found: &FieldValue) -> FieldEncodeError {
    FieldEncodeError::KindMismatch {
        declared,
        found: found.type_name(),
    }
}
