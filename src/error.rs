//! Error taxonomy shared by graph construction, compilation, buffer
//! management and kernel launches.
//!
//! Every failure is raised at the point of detection. Runtime-originated
//! failures keep the vendor status code and the name of the operation
//! that produced it.

use std::fmt;

/// Vendor status code reported by the kernel compiler/runtime.
///
/// Numbering follows the OpenCL status codes so that backends wrapping a
/// real driver can pass codes through untouched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Status(pub i32);

impl Status {
    pub const SUCCESS: Status = Status(0);
    pub const DEVICE_NOT_FOUND: Status = Status(-1);
    pub const MEM_OBJECT_ALLOCATION_FAILURE: Status = Status(-4);
    pub const OUT_OF_RESOURCES: Status = Status(-5);
    pub const BUILD_PROGRAM_FAILURE: Status = Status(-11);
    pub const MAP_FAILURE: Status = Status(-12);
    pub const INVALID_VALUE: Status = Status(-30);
    pub const INVALID_MEM_OBJECT: Status = Status(-38);
    pub const INVALID_KERNEL_ARGS: Status = Status(-52);
    pub const INVALID_WORK_GROUP_SIZE: Status = Status(-54);
    pub const INVALID_OPERATION: Status = Status(-59);
    pub const INVALID_BUFFER_SIZE: Status = Status(-61);

    /// Symbolic name of a known status code.
    pub fn name(self) -> Option<&'static str> {
        let name = match self.0 {
            0 => "CL_SUCCESS",
            -1 => "CL_DEVICE_NOT_FOUND",
            -4 => "CL_MEM_OBJECT_ALLOCATION_FAILURE",
            -5 => "CL_OUT_OF_RESOURCES",
            -11 => "CL_BUILD_PROGRAM_FAILURE",
            -12 => "CL_MAP_FAILURE",
            -30 => "CL_INVALID_VALUE",
            -38 => "CL_INVALID_MEM_OBJECT",
            -52 => "CL_INVALID_KERNEL_ARGS",
            -54 => "CL_INVALID_WORK_GROUP_SIZE",
            -59 => "CL_INVALID_OPERATION",
            -61 => "CL_INVALID_BUFFER_SIZE",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({})", self.0, name),
            None => write!(f, "{}", self.0),
        }
    }
}

/// Coarse classification of an [`Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Rejected while building the element graph, before any text exists.
    Construction,
    /// Rejected by the kernel compiler (source or configuration).
    Compilation,
    /// Buffer allocation, transfer, map/unmap or launch failure.
    Resource,
    /// API called out of order or with an invalid argument.
    Usage,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Operand lengths differ and neither is broadcastable.
    #[error("{context}: incompatible lengths {left} and {right}")]
    SizeMismatch {
        context: &'static str,
        left: usize,
        right: usize,
    },

    /// Operands are bound to different queues.
    #[error("{context}: operands belong to different devices ({left} vs {right})")]
    DeviceMismatch {
        context: &'static str,
        left: String,
        right: String,
    },

    /// Denominator is a literal zero.
    #[error("division by zero: denominator is the literal `{0}`")]
    DivisionByZero(String),

    /// A construct that is illegal in the requested position or configuration.
    #[error("forbidden construct: {0}")]
    Forbidden(String),

    /// The kernel compiler rejected the generated source or configuration.
    #[error("{operation} failed with status {status}: {message}")]
    Compile {
        operation: &'static str,
        status: Status,
        message: String,
    },

    /// A device resource operation failed.
    #[error("{operation} failed with status {status}: {message}")]
    Resource {
        operation: &'static str,
        status: Status,
        message: String,
    },

    #[error("usage error: {0}")]
    Usage(String),
}

impl Error {
    pub fn compile(operation: &'static str, status: Status, message: impl Into<String>) -> Self {
        Error::Compile {
            operation,
            status,
            message: message.into(),
        }
    }

    pub fn resource(operation: &'static str, status: Status, message: impl Into<String>) -> Self {
        Error::Resource {
            operation,
            status,
            message: message.into(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Error::Usage(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Error::Forbidden(message.into())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::SizeMismatch { .. }
            | Error::DeviceMismatch { .. }
            | Error::DivisionByZero(_)
            | Error::Forbidden(_) => ErrorCategory::Construction,
            Error::Compile { .. } => ErrorCategory::Compilation,
            Error::Resource { .. } => ErrorCategory::Resource,
            Error::Usage(_) => ErrorCategory::Usage,
        }
    }

    /// Vendor status code, for runtime-originated errors.
    pub fn status(&self) -> Option<Status> {
        match self {
            Error::Compile { status, .. } | Error::Resource { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
