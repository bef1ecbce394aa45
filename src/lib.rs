//! kernelc — host-side expression-graph compiler and device-resource
//! manager for GPU compute kernels.
//!
//! Applications build typed element graphs (`element`), group statements
//! into containers (`container`), compile them into kernels (`kernel`),
//! optionally fuse several kernels into one dispatch (`KernelMerger`), and
//! run them over device buffers (`memblock`) on queues opened through a
//! backend (`hardware`, `backend`).

pub mod backend;
pub mod config;
pub mod container;
pub mod element;
pub mod error;
pub mod hardware;
pub mod kernel;
pub mod kir;
pub mod memblock;
pub mod types;

pub use backend::{CommandCounts, ReferenceBackend};
pub use config::KernelConfiguration;
pub use container::ExpressionContainer;
pub use element::{BinaryOp, ElementId, Graph, HostScalar, TernaryOp, UnaryOp};
pub use error::{Error, ErrorCategory, Result, Status};
pub use hardware::{Directory, Queue};
pub use kernel::{Kernel, KernelArgument, KernelMerger};
pub use memblock::{Mapping, MemBlock};
pub use types::{DeviceScalar, ScalarType, Value};
