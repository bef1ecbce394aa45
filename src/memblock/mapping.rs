//! Host mapping of a block.

use parking_lot::Mutex;

use crate::backend::BufferRegion;
use crate::error::{Error, Result};
use crate::hardware::Queue;
use crate::types::{DeviceScalar, ScalarType, Value};

use super::ViewPin;

/// Host-visible contents of a mapped block.
///
/// Shared through `Arc`; the device mapping ends, and host edits are
/// published, when the last handle is dropped.
pub struct Mapping {
    queue: Queue,
    region: BufferRegion,
    scalar: ScalarType,
    contents: Mutex<Vec<u8>>,
    // Released after the unmap in `drop`.
    _pin: Option<ViewPin>,
}

impl Mapping {
    pub(super) fn new(
        queue: Queue,
        region: BufferRegion,
        scalar: ScalarType,
        contents: Vec<u8>,
        pin: Option<ViewPin>,
    ) -> Self {
        Self {
            queue,
            region,
            scalar,
            contents: Mutex::new(contents),
            _pin: pin,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.region.size / self.scalar.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn scalar_type(&self) -> ScalarType {
        self.scalar
    }

    fn check_type<T: DeviceScalar>(&self) -> Result<()> {
        if T::SCALAR != self.scalar {
            return Err(Error::usage(format!(
                "mapping holds {}, not {}",
                self.scalar,
                T::SCALAR
            )));
        }
        Ok(())
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.len() {
            return Err(Error::usage(format!(
                "index {} outside a mapping of {} elements",
                index,
                self.len()
            )));
        }
        Ok(())
    }

    pub fn to_vec<T: DeviceScalar>(&self) -> Result<Vec<T>> {
        self.check_type::<T>()?;
        Ok(bytemuck::pod_collect_to_vec(&self.contents.lock()[..]))
    }

    pub fn get<T: DeviceScalar>(&self, index: usize) -> Result<T> {
        self.check_type::<T>()?;
        self.check_index(index)?;
        let size = self.scalar.size();
        let contents = self.contents.lock();
        Ok(bytemuck::pod_read_unaligned(
            &contents[index * size..(index + 1) * size],
        ))
    }

    pub fn set<T: DeviceScalar>(&self, index: usize, value: T) -> Result<()> {
        self.check_type::<T>()?;
        self.check_index(index)?;
        let size = self.scalar.size();
        self.contents.lock()[index * size..(index + 1) * size]
            .copy_from_slice(bytemuck::bytes_of(&value));
        Ok(())
    }

    /// Untyped element access.
    pub fn value(&self, index: usize) -> Result<Value> {
        self.check_index(index)?;
        let size = self.scalar.size();
        let contents = self.contents.lock();
        Ok(Value::read_bytes(
            self.scalar,
            &contents[index * size..(index + 1) * size],
        ))
    }

    /// Overwrite every element.
    pub fn write<T: DeviceScalar>(&self, data: &[T]) -> Result<()> {
        self.check_type::<T>()?;
        if data.len() != self.len() {
            return Err(Error::SizeMismatch {
                context: "mapping write",
                left: self.len(),
                right: data.len(),
            });
        }
        self.contents
            .lock()
            .copy_from_slice(bytemuck::cast_slice(data));
        Ok(())
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        let contents = self.contents.get_mut();
        match self
            .queue
            .backend()
            .unmap(self.queue.id(), self.region, contents)
        {
            Ok(()) => tracing::debug!(buffer = self.region.buffer.0, "unmapped"),
            Err(e) => tracing::error!(buffer = self.region.buffer.0, error = %e, "unmap failed"),
        }
    }
}

impl std::fmt::Debug for Mapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mapping")
            .field("region", &self.region)
            .field("scalar", &self.scalar)
            .finish()
    }
}
