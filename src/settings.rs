use encoding::EncodingRef;
use encoding::all::ISO_8859_1;
use std::fmt;

pub const DEFAULT_MAX_REPEAT_COUNT: usize = 1 << 20;

/// Knobs shared by every parse and write call.
///
/// Built with the usual consuming-builder pattern:
///
/// ```
/// use structcodec::CodecSettings;
///
/// let settings = CodecSettings::new()
///     .strict_trailing_bytes(true)
///     .max_repeat_count(4096);
/// assert!(settings.should_reject_trailing_bytes());
/// ```
#[derive(Clone)]
pub struct CodecSettings {
    text_encoding: EncodingRef,
    strict_trailing_bytes: bool,
    max_repeat_count: usize,
}

impl fmt::Debug for CodecSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecSettings")
            .field("text_encoding", &self.text_encoding.name())
            .field("strict_trailing_bytes", &self.strict_trailing_bytes)
            .field("max_repeat_count", &self.max_repeat_count)
            .finish()
    }
}

impl PartialEq for CodecSettings {
    fn eq(&self, other: &Self) -> bool {
        self.text_encoding.name() == other.text_encoding.name()
            && self.strict_trailing_bytes == other.strict_trailing_bytes
            && self.max_repeat_count == other.max_repeat_count
    }
}

impl Default for CodecSettings {
    fn default() -> Self {
        CodecSettings {
            text_encoding: ISO_8859_1,
            strict_trailing_bytes: false,
            max_repeat_count: DEFAULT_MAX_REPEAT_COUNT,
        }
    }
}

impl CodecSettings {
    pub fn new() -> Self {
        CodecSettings::default()
    }

    /// Single-byte character encoding used by `Text` fields.
    ///
    /// The default (ISO-8859-1) maps every byte to exactly one character, so any captured
    /// text field survives a decode/encode round trip.
    pub fn text_encoding(mut self, encoding: EncodingRef) -> Self {
        self.text_encoding = encoding;
        self
    }

    /// Reject buffers with bytes left over after the last declared field.
    pub fn strict_trailing_bytes(mut self, strict: bool) -> Self {
        self.strict_trailing_bytes = strict;
        self
    }

    /// Upper bound for a single repeater's resolved count.
    pub fn max_repeat_count(mut self, limit: usize) -> Self {
        self.max_repeat_count = limit;
        self
    }

    pub fn get_text_encoding(&self) -> EncodingRef {
        self.text_encoding
    }

    pub fn should_reject_trailing_bytes(&self) -> bool {
        self.strict_trailing_bytes
    }

    pub fn get_max_repeat_count(&self) -> usize {
        self.max_repeat_count
    }
}
