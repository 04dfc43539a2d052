//! Injected capability mapping a spec id to the spec's JSON contents.

use std::path::{Path, PathBuf};

use ahash::RandomState;
use hashbrown::HashMap as FastMap;
use log::debug;

use crate::err::{CodecError, Result};

pub trait SpecResolver {
    /// Raw JSON bytes of the spec named `spec_id`.
    fn resolve(&self, spec_id: &str) -> Result<Vec<u8>>;
}

impl<F> SpecResolver for F
where
    F: Fn(&str) -> Result<Vec<u8>>,
{
    fn resolve(&self, spec_id: &str) -> Result<Vec<u8>> {
        self(spec_id)
    }
}

fn not_found(spec_id: &str, message: impl Into<String>) -> CodecError {
    CodecError::SpecNotFound {
        spec_id: spec_id.to_owned(),
        message: message.into(),
    }
}

/// Specs registered up front, e.g. compiled into the binary with `include_str!`.
#[derive(Debug, Default, Clone)]
pub struct InMemorySpecResolver {
    specs: FastMap<String, Vec<u8>, RandomState>,
}

impl InMemorySpecResolver {
    pub fn new() -> Self {
        InMemorySpecResolver::default()
    }

    pub fn with_spec(mut self, spec_id: &str, contents: impl Into<Vec<u8>>) -> Self {
        self.insert(spec_id, contents);
        self
    }

    pub fn insert(&mut self, spec_id: &str, contents: impl Into<Vec<u8>>) {
        self.specs.insert(spec_id.to_owned(), contents.into());
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

impl SpecResolver for InMemorySpecResolver {
    fn resolve(&self, spec_id: &str) -> Result<Vec<u8>> {
        self.specs
            .get(spec_id)
            .cloned()
            .ok_or_else(|| not_found(spec_id, "no spec registered under this id"))
    }
}

/// Loads `<root>/<spec_id>.json`.
#[derive(Debug, Clone)]
pub struct DirectorySpecResolver {
    root: PathBuf,
}

impl DirectorySpecResolver {
    pub fn new(root: impl AsRef<Path>) -> Self {
        DirectorySpecResolver {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn spec_path(&self, spec_id: &str) -> Result<PathBuf> {
        if spec_id.is_empty()
            || spec_id.contains(['/', '\\'])
            || spec_id.split('.').any(|part| part.is_empty())
        {
            return Err(not_found(spec_id, "spec ids may not contain path separators"));
        }
        Ok(self.root.join(format!("{spec_id}.json")))
    }
}

impl SpecResolver for DirectorySpecResolver {
    fn resolve(&self, spec_id: &str) -> Result<Vec<u8>> {
        let path = self.spec_path(spec_id)?;
        debug!("Resolving spec `{}` from {}", spec_id, path.display());
        std::fs::read(&path).map_err(|e| not_found(spec_id, format!("{}: {e}", path.display())))
    }
}
