//! Kernel configuration.
//!
//! A `KernelConfiguration` travels with the generated source to the
//! compiler. It is plain serializable data so collaborators can persist
//! or log it in whatever format they own.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hardware::Queue;
use crate::types::ScalarType;

/// Vector widths the kernel language has built-in vector types for.
pub const SUPPORTED_VECTOR_WIDTHS: [u32; 5] = [1, 2, 4, 8, 16];

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KernelConfiguration {
    /// Elements processed per work-item. 1 = scalar kernel.
    pub vector_width: u32,
    /// Access global arrays through `vloadN`/`vstoreN` instead of
    /// vector-typed pointers. Only meaningful when `vector_width > 1`.
    pub unaligned_access: bool,
    /// The kernel declares group-local memory.
    pub uses_local_memory: bool,
    /// Extensions enabled with `#pragma OPENCL EXTENSION`.
    pub required_extensions: Vec<String>,
}

impl Default for KernelConfiguration {
    fn default() -> Self {
        Self {
            vector_width: 1,
            unaligned_access: true,
            uses_local_memory: false,
            required_extensions: Vec::new(),
        }
    }
}

impl KernelConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Widest vectorization the queue prefers for `ty`.
    pub fn for_queue(queue: &Queue, ty: ScalarType) -> Self {
        Self::default().with_vector_width(queue.max_vector_width(ty))
    }

    pub fn with_vector_width(mut self, width: u32) -> Self {
        self.vector_width = width;
        self
    }

    pub fn with_unaligned_access(mut self, unaligned: bool) -> Self {
        self.unaligned_access = unaligned;
        self
    }

    pub fn with_local_memory(mut self, uses_local_memory: bool) -> Self {
        self.uses_local_memory = uses_local_memory;
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.add_extension(extension);
        self
    }

    /// Add an extension unless already present.
    pub fn add_extension(&mut self, extension: impl Into<String>) {
        let extension = extension.into();
        if !self.required_extensions.contains(&extension) {
            self.required_extensions.push(extension);
        }
    }

    pub fn is_vectorized(&self) -> bool {
        self.vector_width > 1
    }

    /// Global arrays are passed as vector-typed pointers.
    pub fn uses_vector_pointers(&self) -> bool {
        self.is_vectorized() && !self.unaligned_access
    }

    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_VECTOR_WIDTHS.contains(&self.vector_width) {
            return Err(Error::usage(format!(
                "vector width {} is not one of {:?}",
                self.vector_width, SUPPORTED_VECTOR_WIDTHS
            )));
        }
        Ok(())
    }

    /// Round `length` up to a whole number of vector slots.
    pub fn padded_length(&self, length: usize) -> usize {
        let w = self.vector_width.max(1) as usize;
        length.div_ceil(w) * w
    }

    /// Number of work-items needed to cover `length` elements.
    pub fn work_items(&self, length: usize) -> usize {
        self.padded_length(length) / self.vector_width.max(1) as usize
    }
}
