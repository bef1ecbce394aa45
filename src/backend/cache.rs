//! Built-program cache, keyed by a blake3 digest of the kernel source and
//! configuration. One cache lives on each queue.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Program, ProgramSource};
use crate::error::Result;

#[derive(Default)]
pub(crate) struct ProgramCache {
    entries: Mutex<HashMap<blake3::Hash, Arc<dyn Program>>>,
}

impl ProgramCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn key(source: &ProgramSource) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(source.entry.as_bytes());
        hasher.update(&[0]);
        hasher.update(source.text.as_bytes());
        hasher.update(&[0]);
        let config = &source.config;
        hasher.update(&config.vector_width.to_le_bytes());
        hasher.update(&[config.unaligned_access as u8, config.uses_local_memory as u8]);
        for ext in &config.required_extensions {
            hasher.update(ext.as_bytes());
            hasher.update(&[0]);
        }
        hasher.finalize()
    }

    /// Return the cached program for `source`, building it on a miss.
    /// Failed builds are not cached.
    pub(crate) fn get_or_build(
        &self,
        source: &ProgramSource,
        build: impl FnOnce() -> Result<Arc<dyn Program>>,
    ) -> Result<Arc<dyn Program>> {
        let key = Self::key(source);
        let hex = key.to_hex();
        let short = &hex.as_str()[..8];
        if let Some(program) = self.entries.lock().get(&key) {
            tracing::debug!(entry = %source.entry, key = short, "program cache hit");
            return Ok(program.clone());
        }
        tracing::debug!(entry = %source.entry, key = short, "program cache miss, building");
        let program = build()?;
        self.entries.lock().insert(key, program.clone());
        Ok(program)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}
