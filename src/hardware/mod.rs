//! Device directory and queues.
//!
//! A `Directory` wraps one backend (platform) and hands out `Queue`s. A
//! queue is the device affinity carried by elements and buffers: two
//! elements are device-compatible iff they hold the same queue, or one of
//! them holds none. Queue identity is handle identity, so two queues on
//! the same physical device are still distinct affinities.
//!
//! The capability queries consumed by padding, vectorization and
//! extension decisions are plain data on `Capabilities`, exposed through
//! `Queue` and the free functions at the bottom of this module.

pub mod gpu;

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backend::cache::ProgramCache;
use crate::backend::{Backend, Program, ProgramSource, ReferenceBackend};
use crate::error::{Error, Result, Status};
use crate::types::ScalarType;

// ─── Capabilities ──────────────────────────────────────────────────

/// Where group-local memory lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocalMemoryKind {
    /// On-chip scratchpad.
    Dedicated,
    /// Emulated in global memory.
    Shared,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceKind {
    DiscreteGpu,
    IntegratedGpu,
    Cpu,
    Accelerator,
    Other,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Required buffer alignment in bytes.
    pub alignment: usize,
    /// Preferred vector width for 32-bit element types.
    pub max_vector_width: u32,
    /// Preferred vector width for 64-bit element types.
    pub max_vector_width_64: u32,
    pub local_memory: LocalMemoryKind,
    /// Group-local memory per work-group, in bytes.
    pub local_memory_size: usize,
    pub max_work_group_size: usize,
    pub extensions: Vec<String>,
}

impl Capabilities {
    pub fn max_vector_width(&self, ty: ScalarType) -> u32 {
        if ty.is_64bit() {
            self.max_vector_width_64
        } else {
            self.max_vector_width
        }
    }

    pub fn supports(&self, extension: &str) -> bool {
        self.extensions.iter().any(|e| e == extension)
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            alignment: 128,
            max_vector_width: 4,
            max_vector_width_64: 2,
            local_memory: LocalMemoryKind::Dedicated,
            local_memory_size: 32 * 1024,
            max_work_group_size: 64,
            extensions: vec![
                "cl_khr_fp64".to_string(),
                "cl_khr_global_int32_base_atomics".to_string(),
                "cl_khr_local_int32_base_atomics".to_string(),
                "cl_khr_int64_base_atomics".to_string(),
            ],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub platform: String,
    pub name: String,
    pub kind: DeviceKind,
    pub capabilities: Capabilities,
}

// ─── Queues ────────────────────────────────────────────────────────

/// Numeric queue label, unique within one directory. Used in logs and
/// passed to the backend; identity comparisons use the `Queue` handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct QueueId(pub u32);

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q{}", self.0)
    }
}

struct QueueInner {
    id: QueueId,
    device: usize,
    info: DeviceInfo,
    backend: Arc<dyn Backend>,
    programs: ProgramCache,
}

/// In-order command queue on one device.
#[derive(Clone)]
pub struct Queue {
    inner: Arc<QueueInner>,
}

impl Queue {
    pub fn id(&self) -> QueueId {
        self.inner.id
    }

    /// Device number within the backend.
    pub fn device(&self) -> usize {
        self.inner.device
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.inner.info
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.inner.info.capabilities
    }

    pub fn alignment(&self) -> usize {
        self.capabilities().alignment
    }

    pub fn max_vector_width(&self, ty: ScalarType) -> u32 {
        self.capabilities().max_vector_width(ty)
    }

    pub fn local_memory_kind(&self) -> LocalMemoryKind {
        self.capabilities().local_memory
    }

    pub fn supports(&self, extension: &str) -> bool {
        self.capabilities().supports(extension)
    }

    pub(crate) fn backend(&self) -> &dyn Backend {
        self.inner.backend.as_ref()
    }

    /// Build a program, reusing an identical earlier build on this queue.
    pub(crate) fn build(&self, source: &ProgramSource) -> Result<Arc<dyn Program>> {
        self.inner.programs.get_or_build(source, || {
            self.inner.backend.build(self.inner.device, source)
        })
    }

    /// Number of distinct programs built on this queue.
    pub fn cached_programs(&self) -> usize {
        self.inner.programs.len()
    }

    /// Block until all submitted work has completed.
    pub fn finish(&self) -> Result<()> {
        self.inner.backend.finish(self.inner.id)
    }

    pub fn same_as(&self, other: &Queue) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for Queue {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl Eq for Queue {}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Queue({} on {})", self.inner.id, self.inner.info.name)
    }
}

impl fmt::Display for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.inner.id, self.inner.info.name)
    }
}

// ─── Directory ─────────────────────────────────────────────────────

/// Platform/device enumeration for one backend.
pub struct Directory {
    backend: Arc<dyn Backend>,
    next_queue: AtomicU32,
}

impl Directory {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            next_queue: AtomicU32::new(0),
        }
    }

    /// Directory over a single default reference device.
    pub fn reference() -> Self {
        Self::new(Arc::new(ReferenceBackend::new()))
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Distinct platform names, in device order.
    pub fn platforms(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for dev in self.backend.devices() {
            if !names.contains(&dev.platform) {
                names.push(dev.platform);
            }
        }
        names
    }

    pub fn devices(&self) -> Vec<DeviceInfo> {
        self.backend.devices()
    }

    /// Open a new queue on `device`.
    pub fn queue(&self, device: usize) -> Result<Queue> {
        let info = self.backend.devices().into_iter().nth(device).ok_or_else(|| {
            Error::resource(
                "create_queue",
                Status::DEVICE_NOT_FOUND,
                format!("platform '{}' has no device {}", self.backend.name(), device),
            )
        })?;
        let id = QueueId(self.next_queue.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(queue = %id, device, name = %info.name, "queue created");
        Ok(Queue {
            inner: Arc::new(QueueInner {
                id,
                device,
                info,
                backend: self.backend.clone(),
                programs: ProgramCache::new(),
            }),
        })
    }

    pub fn default_queue(&self) -> Result<Queue> {
        self.queue(0)
    }
}

// ─── Capability queries ────────────────────────────────────────────

pub fn alignment(queue: &Queue) -> usize {
    queue.alignment()
}

pub fn max_vector_width(queue: &Queue, ty: ScalarType) -> u32 {
    queue.max_vector_width(ty)
}

pub fn local_memory_kind(queue: &Queue) -> LocalMemoryKind {
    queue.local_memory_kind()
}

pub fn supports(queue: &Queue, extension: &str) -> bool {
    queue.supports(extension)
}
