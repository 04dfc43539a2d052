use log::debug;

use crate::cipher::{BlockCipher, CipherEnvelope};
use crate::err::Result;
use crate::parser::{StructureParser, parse_structure};
use crate::settings::CodecSettings;
use crate::spec_resolver::SpecResolver;
use crate::store::DataStore;
use crate::structure_spec::StructureSpec;
use crate::writer::{StructureWriter, write_structure};

/// Entry point binding a spec resolver to a set of [`CodecSettings`].
///
/// ```
/// use structcodec::{InMemorySpecResolver, StructureCodec};
///
/// let resolver = InMemorySpecResolver::new().with_spec(
///     "header",
///     r#"[{ "name": "tag", "kind": "Text", "size": 4 }]"#,
/// );
/// let codec = StructureCodec::new(resolver);
///
/// let store = codec.parse(b"MAP4", "header").unwrap();
/// assert_eq!(store.get_text("tag"), Some("MAP4"));
/// assert_eq!(codec.write(&store, "header").unwrap(), b"MAP4");
/// ```
#[derive(Debug, Clone)]
pub struct StructureCodec<R> {
    resolver: R,
    settings: CodecSettings,
}

impl<R: SpecResolver> StructureCodec<R> {
    pub fn new(resolver: R) -> Self {
        StructureCodec {
            resolver,
            settings: CodecSettings::default(),
        }
    }

    pub fn with_configuration(mut self, settings: CodecSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &CodecSettings {
        &self.settings
    }

    pub fn load_spec(&self, spec_id: &str) -> Result<StructureSpec> {
        let contents = self.resolver.resolve(spec_id)?;
        StructureSpec::from_json_slice(spec_id, &contents)
    }

    pub fn parse(&self, bytes: &[u8], spec_id: &str) -> Result<DataStore> {
        let spec = self.load_spec(spec_id)?;
        parse_structure(bytes, &spec, &self.settings)
    }

    pub fn write(&self, store: &DataStore, spec_id: &str) -> Result<Vec<u8>> {
        let spec = self.load_spec(spec_id)?;
        write_structure(store, &spec, &self.settings)
    }

    pub fn parse_with<P: StructureParser>(
        &self,
        parser: &P,
        bytes: &[u8],
        spec_id: &str,
    ) -> Result<P::Output> {
        let spec = self.load_spec(spec_id)?;
        parser.parse(bytes, &spec, &self.settings)
    }

    pub fn write_with<W: StructureWriter>(
        &self,
        writer: &W,
        input: &W::Input,
        spec_id: &str,
    ) -> Result<Vec<u8>> {
        let spec = self.load_spec(spec_id)?;
        writer.write(input, &spec, &self.settings)
    }

    /// Decrypt, then parse. Misaligned input fails before the spec is even loaded.
    pub fn parse_encrypted<C: BlockCipher>(
        &self,
        bytes: &[u8],
        spec_id: &str,
        envelope: &CipherEnvelope<C>,
    ) -> Result<DataStore> {
        let plain = envelope.decrypt(bytes)?;
        debug!("Decrypted {} bytes ({:?})", plain.len(), envelope.mode());
        self.parse(&plain, spec_id)
    }

    pub fn write_encrypted<C: BlockCipher>(
        &self,
        store: &DataStore,
        spec_id: &str,
        envelope: &CipherEnvelope<C>,
    ) -> Result<Vec<u8>> {
        let plain = self.write(store, spec_id)?;
        Ok(envelope.encrypt(&plain)?)
    }
}
