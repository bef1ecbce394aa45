//! Reference backend — an in-process host device.
//!
//! Buffers live in host memory. Programs are not compiled from text:
//! `build` validates the request the way a driver would (vector width,
//! extensions, local memory) and keeps the structured IR, which `enqueue`
//! then interprets. Every command is counted so callers can observe the
//! device traffic an operation caused.

mod interp;

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{ArgBinding, Backend, BufferId, BufferRegion, Program, ProgramSource};
use crate::config::{KernelConfiguration, SUPPORTED_VECTOR_WIDTHS};
use crate::error::{Error, Result, Status};
use crate::hardware::{Capabilities, DeviceInfo, DeviceKind, QueueId};
use crate::kir::{self, SlotKind};

/// Platform name reported by the reference backend.
pub const PLATFORM: &str = "reference";

/// Commands issued to the reference device so far.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommandCounts {
    pub allocations: usize,
    pub releases: usize,
    pub writes: usize,
    pub reads: usize,
    pub maps: usize,
    pub unmaps: usize,
    pub builds: usize,
    pub launches: usize,
}

impl CommandCounts {
    /// Host↔device data transfers (writes, reads, maps and unmaps).
    pub fn transfers(&self) -> usize {
        self.writes + self.reads + self.maps + self.unmaps
    }
}

#[derive(Debug)]
pub(crate) struct DeviceBuffer {
    device: usize,
    bytes: Vec<u8>,
}

#[derive(Debug)]
struct ReferenceProgram {
    entry: String,
    config: KernelConfiguration,
    ir: kir::Program,
    group_size: usize,
}

impl Program for ReferenceProgram {
    fn entry(&self) -> &str {
        &self.entry
    }

    fn config(&self) -> &KernelConfiguration {
        &self.config
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct ReferenceBackend {
    devices: Vec<DeviceInfo>,
    memory: Mutex<HashMap<BufferId, DeviceBuffer>>,
    next_buffer: AtomicU64,
    counts: Mutex<CommandCounts>,
}

impl Default for ReferenceBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceBackend {
    /// One device with default capabilities.
    pub fn new() -> Self {
        Self::with_devices(vec![Self::default_device()])
    }

    pub fn with_devices(devices: Vec<DeviceInfo>) -> Self {
        Self {
            devices,
            memory: Mutex::new(HashMap::new()),
            next_buffer: AtomicU64::new(1),
            counts: Mutex::new(CommandCounts::default()),
        }
    }

    pub fn default_device() -> DeviceInfo {
        DeviceInfo {
            platform: PLATFORM.to_string(),
            name: "host".to_string(),
            kind: DeviceKind::Cpu,
            capabilities: Capabilities::default(),
        }
    }

    /// Snapshot of the command counters.
    pub fn counts(&self) -> CommandCounts {
        *self.counts.lock()
    }

    /// Buffers currently allocated.
    pub fn live_buffers(&self) -> usize {
        self.memory.lock().len()
    }

    fn device(&self, device: usize) -> Result<&DeviceInfo> {
        self.devices.get(device).ok_or_else(|| {
            Error::resource(
                "device",
                Status::DEVICE_NOT_FOUND,
                format!("no reference device {}", device),
            )
        })
    }

    /// Run `f` on the bytes of `region`, checking that it lies inside its buffer.
    fn with_region<T>(
        &self,
        operation: &'static str,
        region: BufferRegion,
        f: impl FnOnce(&mut [u8]) -> T,
    ) -> Result<T> {
        let mut memory = self.memory.lock();
        let buffer = memory.get_mut(&region.buffer).ok_or_else(|| {
            Error::resource(
                operation,
                Status::INVALID_MEM_OBJECT,
                format!("buffer {} does not exist", region.buffer.0),
            )
        })?;
        let end = region.offset + region.size;
        if end > buffer.bytes.len() {
            return Err(Error::resource(
                operation,
                Status::INVALID_VALUE,
                format!(
                    "region {}..{} exceeds buffer of {} bytes",
                    region.offset,
                    end,
                    buffer.bytes.len()
                ),
            ));
        }
        Ok(f(&mut buffer.bytes[region.offset..end]))
    }

    fn check_build(&self, info: &DeviceInfo, source: &ProgramSource) -> Result<()> {
        let config = &source.config;
        if !SUPPORTED_VECTOR_WIDTHS.contains(&config.vector_width) {
            return Err(Error::compile(
                "build",
                Status::BUILD_PROGRAM_FAILURE,
                format!("unsupported vector width {}", config.vector_width),
            ));
        }
        for ext in &config.required_extensions {
            if !info.capabilities.supports(ext) {
                return Err(Error::compile(
                    "build",
                    Status::BUILD_PROGRAM_FAILURE,
                    format!("extension {} is not supported by {}", ext, info.name),
                ));
            }
        }
        if source.ir.has_templates() {
            return Err(Error::compile(
                "build",
                Status::BUILD_PROGRAM_FAILURE,
                "template statements cannot run on the reference device",
            ));
        }
        let local_bytes: usize = source
            .ir
            .slots
            .iter()
            .map(|slot| match slot.kind {
                SlotKind::Local { capacity } => {
                    (capacity + config.vector_width as usize) * slot.scalar.size()
                }
                _ => 0,
            })
            .sum();
        if local_bytes > info.capabilities.local_memory_size {
            return Err(Error::resource(
                "build",
                Status::OUT_OF_RESOURCES,
                format!(
                    "kernel needs {} bytes of local memory, device has {}",
                    local_bytes, info.capabilities.local_memory_size
                ),
            ));
        }
        Ok(())
    }
}

impl Backend for ReferenceBackend {
    fn name(&self) -> &str {
        PLATFORM
    }

    fn devices(&self) -> Vec<DeviceInfo> {
        self.devices.clone()
    }

    fn create_buffer(&self, device: usize, size: usize, init: Option<&[u8]>) -> Result<BufferId> {
        self.device(device)?;
        if size == 0 {
            return Err(Error::resource(
                "create_buffer",
                Status::INVALID_BUFFER_SIZE,
                "buffer size must be non-zero",
            ));
        }
        let mut bytes = vec![0u8; size];
        if let Some(init) = init {
            if init.len() > size {
                return Err(Error::resource(
                    "create_buffer",
                    Status::INVALID_VALUE,
                    format!("{} bytes of data for a {} byte buffer", init.len(), size),
                ));
            }
            bytes[..init.len()].copy_from_slice(init);
        }
        let id = BufferId(self.next_buffer.fetch_add(1, Ordering::Relaxed));
        self.memory.lock().insert(id, DeviceBuffer { device, bytes });
        let mut counts = self.counts.lock();
        counts.allocations += 1;
        if init.is_some() {
            counts.writes += 1;
        }
        tracing::trace!(buffer = id.0, device, size, seeded = init.is_some(), "buffer created");
        Ok(id)
    }

    fn release_buffer(&self, buffer: BufferId) {
        if let Some(released) = self.memory.lock().remove(&buffer) {
            self.counts.lock().releases += 1;
            tracing::trace!(
                buffer = buffer.0,
                device = released.device,
                size = released.bytes.len(),
                "buffer released"
            );
        }
    }

    fn write(&self, queue: QueueId, region: BufferRegion, data: &[u8]) -> Result<()> {
        if data.len() != region.size {
            return Err(Error::resource(
                "write",
                Status::INVALID_VALUE,
                format!("{} bytes for a {} byte region", data.len(), region.size),
            ));
        }
        self.with_region("write", region, |bytes| bytes.copy_from_slice(data))?;
        self.counts.lock().writes += 1;
        tracing::trace!(queue = %queue, buffer = region.buffer.0, size = region.size, "write");
        Ok(())
    }

    fn read(&self, queue: QueueId, region: BufferRegion, out: &mut [u8]) -> Result<()> {
        if out.len() != region.size {
            return Err(Error::resource(
                "read",
                Status::INVALID_VALUE,
                format!("{} bytes for a {} byte region", out.len(), region.size),
            ));
        }
        self.with_region("read", region, |bytes| out.copy_from_slice(bytes))?;
        self.counts.lock().reads += 1;
        tracing::trace!(queue = %queue, buffer = region.buffer.0, size = region.size, "read");
        Ok(())
    }

    fn map(&self, queue: QueueId, region: BufferRegion) -> Result<Vec<u8>> {
        let contents = self
            .with_region("map", region, |bytes| bytes.to_vec())
            .map_err(|e| match e {
                Error::Resource { message, .. } => {
                    Error::resource("map", Status::MAP_FAILURE, message)
                }
                other => other,
            })?;
        self.counts.lock().maps += 1;
        tracing::trace!(queue = %queue, buffer = region.buffer.0, size = region.size, "map");
        Ok(contents)
    }

    fn unmap(&self, queue: QueueId, region: BufferRegion, contents: &[u8]) -> Result<()> {
        if contents.len() != region.size {
            return Err(Error::resource(
                "unmap",
                Status::INVALID_VALUE,
                format!("{} bytes for a {} byte mapping", contents.len(), region.size),
            ));
        }
        self.with_region("unmap", region, |bytes| bytes.copy_from_slice(contents))?;
        self.counts.lock().unmaps += 1;
        tracing::trace!(queue = %queue, buffer = region.buffer.0, "unmap");
        Ok(())
    }

    fn build(&self, device: usize, source: &ProgramSource) -> Result<Arc<dyn Program>> {
        let info = self.device(device)?;
        self.check_build(info, source)?;
        self.counts.lock().builds += 1;
        tracing::debug!(
            entry = %source.entry,
            device,
            params = source.ir.params.len(),
            statements = source.ir.body.len(),
            "program built"
        );
        Ok(Arc::new(ReferenceProgram {
            entry: source.entry.clone(),
            config: source.config.clone(),
            ir: source.ir.clone(),
            group_size: info.capabilities.max_work_group_size.max(1),
        }))
    }

    fn enqueue(
        &self,
        queue: QueueId,
        program: &dyn Program,
        args: &[ArgBinding],
        work_items: usize,
    ) -> Result<()> {
        let program = program
            .as_any()
            .downcast_ref::<ReferenceProgram>()
            .ok_or_else(|| {
                Error::resource(
                    "enqueue",
                    Status::INVALID_OPERATION,
                    format!("{} was not built by the reference backend", program.entry()),
                )
            })?;
        if work_items == 0 {
            return Err(Error::resource(
                "enqueue",
                Status::INVALID_WORK_GROUP_SIZE,
                "cannot launch zero work-items",
            ));
        }
        self.counts.lock().launches += 1;
        tracing::debug!(queue = %queue, entry = %program.entry, work_items, "launch");

        let launch = interp::Launch {
            program: &program.ir,
            args,
            width: program.config.vector_width as usize,
            group_size: program.group_size,
            work_items,
        };
        let mut memory = self.memory.lock();
        interp::run(&launch, &mut memory)
    }

    fn finish(&self, _queue: QueueId) -> Result<()> {
        // Commands complete before they return.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(ir: kir::Program, config: KernelConfiguration) -> ProgramSource {
        ProgramSource {
            entry: "k".to_string(),
            text: String::new(),
            config,
            ir,
        }
    }

    #[test]
    fn test_buffer_round_trip_counts_commands() {
        let backend = ReferenceBackend::new();
        let id = backend.create_buffer(0, 8, Some(&[1, 2, 3, 4])).unwrap();
        let q = QueueId(0);
        backend
            .write(q, BufferRegion { buffer: id, offset: 4, size: 4 }, &[5, 6, 7, 8])
            .unwrap();
        let mut out = [0u8; 8];
        backend.read(q, BufferRegion::whole(id, 8), &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4, 5, 6, 7, 8]);

        let counts = backend.counts();
        assert_eq!(counts.allocations, 1);
        assert_eq!(counts.writes, 2);
        assert_eq!(counts.reads, 1);

        backend.release_buffer(id);
        assert_eq!(backend.live_buffers(), 0);
        assert!(backend.read(q, BufferRegion::whole(id, 8), &mut out).is_err());
    }

    #[test]
    fn test_zero_size_buffer_rejected() {
        let backend = ReferenceBackend::new();
        let err = backend.create_buffer(0, 0, None).unwrap_err();
        assert_eq!(err.status(), Some(Status::INVALID_BUFFER_SIZE));
    }

    #[test]
    fn test_region_out_of_range() {
        let backend = ReferenceBackend::new();
        let id = backend.create_buffer(0, 4, None).unwrap();
        let err = backend
            .map(QueueId(0), BufferRegion { buffer: id, offset: 2, size: 4 })
            .unwrap_err();
        assert_eq!(err.status(), Some(Status::MAP_FAILURE));
    }

    #[test]
    fn test_missing_extension_fails_build() {
        let mut info = ReferenceBackend::default_device();
        info.capabilities.extensions.clear();
        let backend = ReferenceBackend::with_devices(vec![info]);
        let config = KernelConfiguration::default().with_extension("cl_khr_fp64");
        let err = backend
            .build(0, &source(kir::Program::default(), config))
            .unwrap_err();
        assert_eq!(err.status(), Some(Status::BUILD_PROGRAM_FAILURE));
        assert_eq!(backend.counts().builds, 0);
    }

    #[test]
    fn test_unknown_device() {
        let backend = ReferenceBackend::new();
        let err = backend
            .build(3, &source(kir::Program::default(), KernelConfiguration::default()))
            .unwrap_err();
        assert_eq!(err.status(), Some(Status::DEVICE_NOT_FOUND));
    }

    #[test]
    fn test_template_rejected() {
        let backend = ReferenceBackend::new();
        let ir = kir::Program {
            body: vec![kir::Node::Template("x".to_string())],
            ..Default::default()
        };
        let err = backend
            .build(0, &source(ir, KernelConfiguration::default()))
            .unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Compilation);
    }

    #[test]
    fn test_enqueue_writes_index() {
        let backend = ReferenceBackend::new();
        let id = backend.create_buffer(0, 16, None).unwrap();
        let ir = kir::Program {
            params: vec![kir::Param {
                kind: kir::ParamKind::Buffer,
                scalar: crate::types::ScalarType::Int32,
            }],
            slots: Vec::new(),
            body: vec![kir::Node::Binary(
                crate::element::BinaryOp::Assign,
                crate::types::ScalarType::Int32,
                Box::new(kir::Node::Buffer(0)),
                Box::new(kir::Node::Index),
            )],
        };
        let program = backend
            .build(0, &source(ir, KernelConfiguration::default()))
            .unwrap();
        backend
            .enqueue(
                QueueId(0),
                program.as_ref(),
                &[ArgBinding::Buffer(BufferRegion::whole(id, 16))],
                4,
            )
            .unwrap();
        let mut out = [0u8; 16];
        backend.read(QueueId(0), BufferRegion::whole(id, 16), &mut out).unwrap();
        let values: Vec<i32> = bytemuck::pod_collect_to_vec(&out[..]);
        assert_eq!(values, vec![0, 1, 2, 3]);

        // One element too many.
        let err = backend
            .enqueue(
                QueueId(0),
                program.as_ref(),
                &[ArgBinding::Buffer(BufferRegion::whole(id, 16))],
                5,
            )
            .unwrap_err();
        assert_eq!(err.status(), Some(Status::OUT_OF_RESOURCES));
    }
}
