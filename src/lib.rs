#![deny(unused_must_use)]
#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod cipher;
mod codec;
pub mod err;
pub mod formula;
mod parser;
mod settings;
pub mod spec_resolver;
pub mod store;
pub mod structure_spec;
pub mod type_codec;
mod utils;
mod writer;

pub use cipher::{BlockCipher, CipherEnvelope, CipherError, CipherMode};
pub use codec::StructureCodec;
pub use err::{
    CodecError, FieldDecodeError, FieldEncodeError, FormulaError, Result,
};
pub use formula::{Formula, evaluate};
pub use parser::{StructureParser, parse_structure};
pub use settings::{CodecSettings, DEFAULT_MAX_REPEAT_COUNT};
pub use spec_resolver::{DirectorySpecResolver, InMemorySpecResolver, SpecResolver};
pub use store::{DataStore, FieldEntry, FieldValue, StoreEntry};
pub use structure_spec::{FieldDescriptor, FieldKind, Quantity, StructureSpec};
pub use utils::format_hexdump;
pub use writer::{StructureWriter, write_structure};

#[cfg(test)]
use std::sync::Once;

#[cfg(test)]
static LOGGER_INIT: Once = Once::new();

// Rust runs the tests concurrently, so unless we synchronize logging access
// it will crash when attempting to run `cargo test` with some logging facilities.
#[cfg(test)]
pub fn ensure_env_logger_initialized() {
    use std::io::Write;

    LOGGER_INIT.call_once(|| {
        let mut builder = env_logger::Builder::from_default_env();
        builder
            .format(|buf, record| writeln!(buf, "[{}] - {}", record.level(), record.args()))
            .init();
    });
}
