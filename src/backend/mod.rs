//! Backend — the kernel compiler/runtime collaborator.
//!
//! kernelc generates source text and owns buffer bookkeeping; everything
//! that touches an actual device goes through `Backend`. A backend wraps
//! one platform (a vendor driver, or the in-process reference device) and
//! answers for all of its devices and queues.
//!
//! Backends never see the element graph. They receive a `ProgramSource`
//! (text, configuration, ordered parameters, and the structured kernel IR
//! for hosts that execute without a source compiler) and plain buffer
//! regions.

pub(crate) mod cache;
pub mod reference;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::config::KernelConfiguration;
use crate::error::Result;
use crate::hardware::{DeviceInfo, QueueId};
use crate::kir;
use crate::types::Value;

pub use reference::{CommandCounts, ReferenceBackend};

/// Opaque device buffer handle issued by a backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

/// A byte range of a device buffer. Sub-range views are expressed as
/// regions of their parent's buffer rather than separate allocations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferRegion {
    pub buffer: BufferId,
    pub offset: usize,
    pub size: usize,
}

impl BufferRegion {
    pub fn whole(buffer: BufferId, size: usize) -> Self {
        Self {
            buffer,
            offset: 0,
            size,
        }
    }
}

/// One bound kernel argument, in parameter order.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ArgBinding {
    Buffer(BufferRegion),
    Scalar(Value),
}

/// Everything a backend needs to build one kernel.
#[derive(Clone, Debug)]
pub struct ProgramSource {
    /// Kernel entry-point name.
    pub entry: String,
    /// Complete kernel source text.
    pub text: String,
    pub config: KernelConfiguration,
    /// Structured form of the same kernel.
    pub ir: kir::Program,
}

/// A built, launchable kernel.
pub trait Program: Send + Sync + fmt::Debug {
    fn entry(&self) -> &str;

    fn config(&self) -> &KernelConfiguration;

    /// Lets a backend recover its own program type in `enqueue`.
    fn as_any(&self) -> &dyn Any;
}

/// Kernel compiler and device runtime for one platform.
///
/// Transfers, `map` and `finish` block until the device has completed
/// them. `enqueue` only submits work; ordering with later commands on the
/// same queue is the queue's responsibility.
pub trait Backend: Send + Sync + fmt::Debug {
    /// Platform name.
    fn name(&self) -> &str;

    /// Devices of this platform, index = device number.
    fn devices(&self) -> Vec<DeviceInfo>;

    /// Allocate `size` bytes on `device`, optionally seeded from `init`.
    fn create_buffer(&self, device: usize, size: usize, init: Option<&[u8]>) -> Result<BufferId>;

    /// Release a buffer. Releasing an unknown buffer is a no-op.
    fn release_buffer(&self, buffer: BufferId);

    fn write(&self, queue: QueueId, region: BufferRegion, data: &[u8]) -> Result<()>;

    fn read(&self, queue: QueueId, region: BufferRegion, out: &mut [u8]) -> Result<()>;

    /// Map a region for host access; returns the host-visible contents.
    fn map(&self, queue: QueueId, region: BufferRegion) -> Result<Vec<u8>>;

    /// End a mapping, publishing `contents` back to the device.
    fn unmap(&self, queue: QueueId, region: BufferRegion, contents: &[u8]) -> Result<()>;

    fn build(&self, device: usize, source: &ProgramSource) -> Result<Arc<dyn Program>>;

    /// Launch `work_items` instances of `program`.
    fn enqueue(
        &self,
        queue: QueueId,
        program: &dyn Program,
        args: &[ArgBinding],
        work_items: usize,
    ) -> Result<()>;

    /// Block until every command submitted to `queue` has completed.
    fn finish(&self, queue: QueueId) -> Result<()>;
}
