use thiserror::Error;

use crate::structure_spec::FieldKind;

pub type Result<T> = std::result::Result<T, CodecError>;

/// Errors produced by a scalar conversion in [`crate::type_codec`].
#[derive(Debug, Error, PartialEq)]
pub enum FieldDecodeError {
    #[error("{kind} requires {expected} bytes, got {actual}")]
    WrongLength {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("integer fields must be between 1 and 8 bytes wide, got {width}")]
    UnsupportedIntegerWidth { width: usize },

    #[error("failed to decode text (used encoding scheme {encoding}), caused by: {message}")]
    TextDecode {
        encoding: &'static str,
        message: String,
    },

    #[error("buffer too small for {what} at offset {offset} (need {need} bytes, have {have})")]
    Truncated {
        what: &'static str,
        offset: u64,
        need: usize,
        have: usize,
    },

    #[error("resolved {what} is negative ({value})")]
    NegativeLength { what: &'static str, value: i64 },

    #[error("repeat count {count} exceeds the configured limit of {limit}")]
    RepeatCountTooLarge { count: usize, limit: usize },

    #[error(
        "repeat count {count} needs at least {need} bytes but only {have} remain in the buffer"
    )]
    RepeatCountUnsatisfiable { count: usize, need: usize, have: usize },
}

/// Errors produced when a value cannot be packed into its field.
#[derive(Debug, Error, PartialEq)]
pub enum FieldEncodeError {
    #[error("text needs {actual} bytes but the field is {width} bytes wide")]
    TextTooLong { width: usize, actual: usize },

    #[error("failed to encode text (used encoding scheme {encoding}), caused by: {message}")]
    TextEncode {
        encoding: &'static str,
        message: String,
    },

    #[error("integer {value} does not fit into {width} {signedness} bytes")]
    IntegerOutOfRange {
        value: i64,
        width: usize,
        signedness: &'static str,
    },

    #[error("raw capture is {actual} bytes but the field resolves to {expected} bytes")]
    RawLengthMismatch { expected: usize, actual: usize },

    #[error("stored value is {found} but the field is declared as {declared}")]
    KindMismatch {
        declared: FieldKind,
        found: &'static str,
    },

    #[error(transparent)]
    Decode(#[from] FieldDecodeError),
}

/// Errors produced while evaluating a size or count formula.
#[derive(Debug, Error, PartialEq)]
pub enum FormulaError {
    #[error("pointer `{name}` does not reference any field in the store")]
    MissingPointer { name: String },

    #[error("pointer `{name}` references a field without an integer value")]
    NonIntegerPointer { name: String },

    #[error("unterminated pointer starting at position {position}")]
    UnterminatedPointer { position: usize },

    #[error("malformed expression `{expression}` at position {position}: {message}")]
    Malformed {
        expression: String,
        position: usize,
        message: &'static str,
    },

    #[error("expression `{expression}` divides by zero")]
    DivisionByZero { expression: String },

    #[error("expression `{expression}` does not produce a finite number")]
    NonFinite { expression: String },

    #[error("expression `{expression}` evaluates to {value}, outside the 64-bit integer range")]
    OutOfRange { expression: String, value: f64 },
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("structure spec `{spec_id}` could not be loaded: {message}")]
    SpecNotFound { spec_id: String, message: String },

    #[error("structure spec `{spec_id}` is malformed: {message}")]
    InvalidSpec { spec_id: String, message: String },

    #[error("offset {offset}: failed to decode field `{path}`, caused by: {source}")]
    FieldDecode {
        path: String,
        offset: u64,
        #[source]
        source: FieldDecodeError,
    },

    #[error("failed to encode field `{path}`, caused by: {source}")]
    FieldEncode {
        path: String,
        #[source]
        source: FieldEncodeError,
    },

    #[error("failed to resolve formula `{formula}`{}, caused by: {source}", scope_suffix(.scope))]
    FormulaResolution {
        formula: String,
        scope: Option<String>,
        #[source]
        source: FormulaError,
    },

    #[error("required field `{path}` has neither a decoded value nor a raw capture")]
    StoreKeyNotFound { path: String },

    #[error(
        "repeated group `{path}` holds {children} children but its count resolves to {resolved}"
    )]
    RepeatCountMismatch {
        path: String,
        resolved: i64,
        children: usize,
    },

    #[error("offset {offset}: {remaining} trailing bytes are not described by the structure spec")]
    TrailingBytes { offset: u64, remaining: usize },

    #[error("invalid store path `{path}`: {message}")]
    InvalidPath { path: String, message: &'static str },

    #[error("store export is malformed at `{path}`: {message}")]
    StoreFormat { path: String, message: String },

    #[error(transparent)]
    Cipher(#[from] crate::cipher::CipherError),

    #[error("An I/O error has occurred")]
    Io(#[from] std::io::Error),

    #[error("`serde_json` failed with error: {0}")]
    Json(#[from] serde_json::Error),
}

fn scope_suffix(scope: &Option<String>) -> String {
    match scope {
        Some(scope) => format!(" in scope `{scope}`"),
        None => String::new(),
    }
}

impl CodecError {
    pub(crate) fn field_decode(path: impl Into<String>, offset: u64, source: FieldDecodeError) -> Self {
        CodecError::FieldDecode {
            path: path.into(),
            offset,
            source,
        }
    }

    pub(crate) fn field_encode(path: impl Into<String>, source: FieldEncodeError) -> Self {
        CodecError::FieldEncode {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn formula(formula: &str, scope: Option<&str>, source: FormulaError) -> Self {
        CodecError::FormulaResolution {
            formula: formula.to_owned(),
            scope: scope.map(str::to_owned),
            source,
        }
    }

    pub(crate) fn invalid_spec(spec_id: &str, message: impl Into<String>) -> Self {
        CodecError::InvalidSpec {
            spec_id: spec_id.to_owned(),
            message: message.into(),
        }
    }
}
