//! Device buffers.
//!
//! A `MemBlock` owns exactly one device buffer at a time, sized to the
//! element count plus padding up to the device alignment. A view
//! (`subvector`) owns nothing: it aliases its parent at an element offset
//! and resolves its region from the parent's *current* buffer on every
//! use, so it follows the parent through `swap_buffers`.
//!
//! Host access goes through transfers (`read`, `write`) or a memoized
//! mapping (`map`). Dropping an owned block releases its buffer.

mod mapping;

pub use mapping::Mapping;

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::backend::{BufferId, BufferRegion};
use crate::error::{Error, Result, Status};
use crate::hardware::Queue;
use crate::types::{DeviceScalar, ScalarType};

/// Bytes needed to round `count * elem_size` up to `alignment`, or `None`
/// when the allocation size does not fit in `usize`.
pub fn padding_bytes(count: usize, elem_size: usize, alignment: usize) -> Option<usize> {
    let raw = count.checked_mul(elem_size)?;
    if alignment <= 1 {
        return Some(0);
    }
    Some(raw.checked_next_multiple_of(alignment)? - raw)
}

enum Storage {
    Owned {
        buffer: Mutex<BufferId>,
        size: usize,
        /// Live mappings of views into this buffer.
        view_maps: Arc<AtomicUsize>,
    },
    View {
        parent: Arc<MemBlock>,
        offset: usize,
    },
}

/// Holds one count on the owning block's view-mapping counter.
pub(crate) struct ViewPin(Arc<AtomicUsize>);

impl ViewPin {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for ViewPin {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct MemBlock {
    queue: Queue,
    scalar: ScalarType,
    count: usize,
    storage: Storage,
    mapping: Mutex<Weak<Mapping>>,
}

impl MemBlock {
    /// Allocate `count` zeroed elements of `scalar` on `queue`'s device.
    pub fn allocate(count: usize, scalar: ScalarType, queue: &Queue) -> Result<Arc<Self>> {
        Self::create(count, scalar, queue, None)
    }

    /// Allocate and seed from `data` in a single transfer.
    pub fn allocate_with<T: DeviceScalar>(queue: &Queue, data: &[T]) -> Result<Arc<Self>> {
        Self::create(data.len(), T::SCALAR, queue, Some(bytemuck::cast_slice(data)))
    }

    fn create(
        count: usize,
        scalar: ScalarType,
        queue: &Queue,
        init: Option<&[u8]>,
    ) -> Result<Arc<Self>> {
        let size = padding_bytes(count, scalar.size(), queue.alignment())
            .and_then(|pad| pad.checked_add(count * scalar.size()))
            .ok_or_else(|| {
                Error::resource(
                    "create_buffer",
                    Status::INVALID_BUFFER_SIZE,
                    format!("{} elements of {} overflow the address space", count, scalar),
                )
            })?;
        let buffer = queue.backend().create_buffer(queue.device(), size, init)?;
        tracing::debug!(
            buffer = buffer.0,
            queue = %queue.id(),
            count,
            scalar = %scalar,
            size,
            "block allocated"
        );
        Ok(Arc::new(Self {
            queue: queue.clone(),
            scalar,
            count,
            storage: Storage::Owned {
                buffer: Mutex::new(buffer),
                size,
                view_maps: Arc::new(AtomicUsize::new(0)),
            },
            mapping: Mutex::new(Weak::new()),
        }))
    }

    /// A `count`-element view of `parent` starting at element `offset`.
    pub fn subvector(parent: &Arc<Self>, offset: usize, count: usize) -> Result<Arc<Self>> {
        if count == 0 || offset + count > parent.count {
            return Err(Error::usage(format!(
                "view {}..{} outside a block of {} elements",
                offset,
                offset + count,
                parent.count
            )));
        }
        Ok(Arc::new(Self {
            queue: parent.queue.clone(),
            scalar: parent.scalar,
            count,
            storage: Storage::View {
                parent: parent.clone(),
                offset,
            },
            mapping: Mutex::new(Weak::new()),
        }))
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn scalar_type(&self) -> ScalarType {
        self.scalar
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn is_view(&self) -> bool {
        matches!(self.storage, Storage::View { .. })
    }

    /// The block owning the buffer this block resolves to.
    fn owner(&self) -> &MemBlock {
        match &self.storage {
            Storage::Owned { .. } => self,
            Storage::View { parent, .. } => parent.owner(),
        }
    }

    /// Whether the bound region extends over allocation padding, so that
    /// vector accesses may run past the last element. True for owned
    /// blocks and for views ending where their parent's padding begins.
    pub fn has_tail_padding(&self) -> bool {
        match &self.storage {
            Storage::Owned { .. } => true,
            Storage::View { parent, offset } => {
                offset + self.count == parent.count && parent.has_tail_padding()
            }
        }
    }

    /// Element data size, without padding.
    pub fn data_size(&self) -> usize {
        self.count * self.scalar.size()
    }

    /// Allocated size of the owned buffer; for views, the bound region.
    pub fn padded_size(&self) -> usize {
        self.region().size
    }

    /// Region a kernel argument binds to. An owned block binds its whole
    /// allocation, padding included. A view binds exactly its elements,
    /// plus the parent's padding when it ends at the parent's end.
    pub fn region(&self) -> BufferRegion {
        match &self.storage {
            Storage::Owned { buffer, size, .. } => BufferRegion::whole(*buffer.lock(), *size),
            Storage::View { parent, offset } => {
                let outer = parent.region();
                let start = offset * self.scalar.size();
                let size = if offset + self.count == parent.count {
                    outer.size - start
                } else {
                    self.data_size()
                };
                BufferRegion {
                    buffer: outer.buffer,
                    offset: outer.offset + start,
                    size,
                }
            }
        }
    }

    /// Region holding exactly the elements.
    pub fn data_region(&self) -> BufferRegion {
        BufferRegion {
            size: self.data_size(),
            ..self.region()
        }
    }

    fn check_type<T: DeviceScalar>(&self) -> Result<()> {
        if T::SCALAR != self.scalar {
            return Err(Error::usage(format!(
                "block holds {}, not {}",
                self.scalar,
                T::SCALAR
            )));
        }
        Ok(())
    }

    /// Blocking device → host copy of all elements.
    pub fn read<T: DeviceScalar>(&self) -> Result<Vec<T>> {
        self.check_type::<T>()?;
        let mut bytes = vec![0u8; self.data_size()];
        self.queue
            .backend()
            .read(self.queue.id(), self.data_region(), &mut bytes)?;
        Ok(bytemuck::pod_collect_to_vec(&bytes))
    }

    /// Blocking host → device copy of all elements.
    pub fn write<T: DeviceScalar>(&self, data: &[T]) -> Result<()> {
        self.check_type::<T>()?;
        if data.len() != self.count {
            return Err(Error::SizeMismatch {
                context: "write",
                left: self.count,
                right: data.len(),
            });
        }
        self.queue
            .backend()
            .write(self.queue.id(), self.data_region(), bytemuck::cast_slice(data))
    }

    /// Host mapping of the elements. While any handle to the mapping is
    /// alive, further calls return the same mapping without device work.
    pub fn map(&self) -> Result<Arc<Mapping>> {
        let mut slot = self.mapping.lock();
        if let Some(mapping) = slot.upgrade() {
            tracing::trace!(queue = %self.queue.id(), "mapping reused");
            return Ok(mapping);
        }
        // Pin before resolving the region; swaps check pins under the buffer locks.
        let pin = match &self.owner().storage {
            Storage::Owned { view_maps, .. } if self.is_view() => Some(ViewPin::new(view_maps)),
            _ => None,
        };
        let region = self.data_region();
        let contents = self.queue.backend().map(self.queue.id(), region)?;
        tracing::debug!(queue = %self.queue.id(), buffer = region.buffer.0, size = region.size, "mapped");
        let mapping = Arc::new(Mapping::new(
            self.queue.clone(),
            region,
            self.scalar,
            contents,
            pin,
        ));
        *slot = Arc::downgrade(&mapping);
        Ok(mapping)
    }

    /// Whether a mapping of this block is currently alive.
    pub fn is_mapped(&self) -> bool {
        self.mapping.lock().strong_count() > 0
    }

    /// Whether a mapping of any view into this block's buffer is alive.
    pub fn has_mapped_views(&self) -> bool {
        match &self.owner().storage {
            Storage::Owned { view_maps, .. } => view_maps.load(Ordering::SeqCst) > 0,
            Storage::View { .. } => false,
        }
    }

    /// Exchange the device buffers of two owned blocks. No data moves.
    ///
    /// Both blocks must hold the same number of elements of the same type
    /// on the same queue. Neither block, nor any view into either, may be
    /// mapped.
    pub fn swap_buffers(&self, other: &MemBlock) -> Result<()> {
        if std::ptr::eq(self, other) {
            return Ok(());
        }
        let (
            Storage::Owned {
                buffer: mine,
                size: my_size,
                view_maps: my_views,
            },
            Storage::Owned {
                buffer: theirs,
                size: their_size,
                view_maps: their_views,
            },
        ) = (&self.storage, &other.storage)
        else {
            return Err(Error::usage("cannot swap the buffer of a view"));
        };
        if self.count != other.count || my_size != their_size {
            return Err(Error::SizeMismatch {
                context: "swap_buffers",
                left: self.count,
                right: other.count,
            });
        }
        if self.scalar != other.scalar {
            return Err(Error::usage(format!(
                "cannot swap {} and {} blocks",
                self.scalar, other.scalar
            )));
        }
        if !self.queue.same_as(&other.queue) {
            return Err(Error::DeviceMismatch {
                context: "swap_buffers",
                left: self.queue.to_string(),
                right: other.queue.to_string(),
            });
        }
        if self.is_mapped() || other.is_mapped() {
            return Err(Error::usage("cannot swap a mapped block"));
        }

        // Fixed lock order avoids deadlock with a concurrent reverse swap.
        let (first, second) = if (self as *const Self) < (other as *const Self) {
            (mine, theirs)
        } else {
            (theirs, mine)
        };
        let mut a = first.lock();
        let mut b = second.lock();
        if my_views.load(Ordering::SeqCst) > 0 || their_views.load(Ordering::SeqCst) > 0 {
            return Err(Error::usage("cannot swap a block while a view of it is mapped"));
        }
        std::mem::swap(&mut *a, &mut *b);
        tracing::debug!(queue = %self.queue.id(), a = a.0, b = b.0, "buffers swapped");
        Ok(())
    }
}

impl Drop for MemBlock {
    fn drop(&mut self) {
        if let Storage::Owned { buffer, .. } = &self.storage {
            let id = *buffer.lock();
            self.queue.backend().release_buffer(id);
            tracing::trace!(buffer = id.0, "block released");
        }
    }
}

impl fmt::Debug for MemBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("MemBlock");
        d.field("scalar", &self.scalar)
            .field("count", &self.count)
            .field("queue", &self.queue);
        match &self.storage {
            Storage::Owned { buffer, size, .. } => d.field("buffer", &*buffer.lock()).field("size", size),
            Storage::View { offset, .. } => d.field("view_offset", offset),
        };
        d.finish()
    }
}
