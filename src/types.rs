//! Scalar types and host-side scalar values.
//!
//! `ScalarType` is the closed set of element types the kernel language
//! understands. `DeviceScalar` ties each tag to its host representation so
//! typed transfers stay generic; `Value` is the type-erased form used where
//! storage has no static type (constants, host-bound scalars, the
//! reference executor).

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ScalarType {
    Int32,
    UInt32,
    Float32,
    Float64,
    Int64,
}

impl ScalarType {
    pub const ALL: [ScalarType; 5] = [
        ScalarType::Int32,
        ScalarType::UInt32,
        ScalarType::Float32,
        ScalarType::Float64,
        ScalarType::Int64,
    ];

    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            ScalarType::Int32 | ScalarType::UInt32 | ScalarType::Float32 => 4,
            ScalarType::Float64 | ScalarType::Int64 => 8,
        }
    }

    /// Type name in the kernel language.
    pub fn kernel_name(self) -> &'static str {
        match self {
            ScalarType::Int32 => "int",
            ScalarType::UInt32 => "uint",
            ScalarType::Float32 => "float",
            ScalarType::Float64 => "double",
            ScalarType::Int64 => "long",
        }
    }

    /// Scalar name for width 1, vector name (`float4`) otherwise.
    pub fn vector_name(self, width: u32) -> String {
        if width <= 1 {
            self.kernel_name().to_string()
        } else {
            format!("{}{}", self.kernel_name(), width)
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, ScalarType::Float32 | ScalarType::Float64)
    }

    pub fn is_64bit(self) -> bool {
        self.size() == 8
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kernel_name())
    }
}

// ─── Values ────────────────────────────────────────────────────────

/// A scalar value tagged with its type.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value {
    Int32(i32),
    UInt32(u32),
    Float32(f32),
    Float64(f64),
    Int64(i64),
}

impl Value {
    pub fn zero(ty: ScalarType) -> Self {
        Value::from_i64(ty, 0)
    }

    pub fn scalar_type(&self) -> ScalarType {
        match self {
            Value::Int32(_) => ScalarType::Int32,
            Value::UInt32(_) => ScalarType::UInt32,
            Value::Float32(_) => ScalarType::Float32,
            Value::Float64(_) => ScalarType::Float64,
            Value::Int64(_) => ScalarType::Int64,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            Value::Int32(v) => v as f64,
            Value::UInt32(v) => v as f64,
            Value::Float32(v) => v as f64,
            Value::Float64(v) => v,
            Value::Int64(v) => v as f64,
        }
    }

    pub fn as_i64(&self) -> i64 {
        match *self {
            Value::Int32(v) => v as i64,
            Value::UInt32(v) => v as i64,
            Value::Float32(v) => v as i64,
            Value::Float64(v) => v as i64,
            Value::Int64(v) => v,
        }
    }

    /// Build a value of type `ty` from a float, truncating for integer types.
    pub fn from_f64(ty: ScalarType, v: f64) -> Self {
        match ty {
            ScalarType::Int32 => Value::Int32(v as i32),
            ScalarType::UInt32 => Value::UInt32(v as u32),
            ScalarType::Float32 => Value::Float32(v as f32),
            ScalarType::Float64 => Value::Float64(v),
            ScalarType::Int64 => Value::Int64(v as i64),
        }
    }

    /// Build a value of type `ty` from an integer, wrapping to the target width.
    pub fn from_i64(ty: ScalarType, v: i64) -> Self {
        match ty {
            ScalarType::Int32 => Value::Int32(v as i32),
            ScalarType::UInt32 => Value::UInt32(v as u32),
            ScalarType::Float32 => Value::Float32(v as f32),
            ScalarType::Float64 => Value::Float64(v as f64),
            ScalarType::Int64 => Value::Int64(v),
        }
    }

    /// Convert to `ty` with C conversion semantics.
    pub fn cast(self, ty: ScalarType) -> Self {
        if self.scalar_type() == ty {
            return self;
        }
        if self.scalar_type().is_float() {
            Value::from_f64(ty, self.as_f64())
        } else {
            Value::from_i64(ty, self.as_i64())
        }
    }

    pub fn is_truthy(&self) -> bool {
        match *self {
            Value::Float32(v) => v != 0.0,
            Value::Float64(v) => v != 0.0,
            _ => self.as_i64() != 0,
        }
    }

    /// Literal text in the kernel language.
    pub fn literal(&self) -> String {
        match *self {
            Value::Int32(v) if v < 0 => format!("({})", v),
            Value::Int32(v) => v.to_string(),
            Value::UInt32(v) => format!("{}u", v),
            Value::Int64(v) if v < 0 => format!("({}L)", v),
            Value::Int64(v) => format!("{}L", v),
            Value::Float32(v) => float_literal(v as f64, format!("{:?}", v), "f"),
            Value::Float64(v) => float_literal(v, format!("{:?}", v), ""),
        }
    }

    /// Decode one element of type `ty` from exactly `ty.size()` bytes.
    pub fn read_bytes(ty: ScalarType, bytes: &[u8]) -> Self {
        match ty {
            ScalarType::Int32 => Value::Int32(bytemuck::pod_read_unaligned(bytes)),
            ScalarType::UInt32 => Value::UInt32(bytemuck::pod_read_unaligned(bytes)),
            ScalarType::Float32 => Value::Float32(bytemuck::pod_read_unaligned(bytes)),
            ScalarType::Float64 => Value::Float64(bytemuck::pod_read_unaligned(bytes)),
            ScalarType::Int64 => Value::Int64(bytemuck::pod_read_unaligned(bytes)),
        }
    }

    /// Encode into exactly `self.scalar_type().size()` bytes.
    pub fn write_bytes(&self, out: &mut [u8]) {
        match self {
            Value::Int32(v) => out.copy_from_slice(bytemuck::bytes_of(v)),
            Value::UInt32(v) => out.copy_from_slice(bytemuck::bytes_of(v)),
            Value::Float32(v) => out.copy_from_slice(bytemuck::bytes_of(v)),
            Value::Float64(v) => out.copy_from_slice(bytemuck::bytes_of(v)),
            Value::Int64(v) => out.copy_from_slice(bytemuck::bytes_of(v)),
        }
    }
}

fn float_literal(v: f64, debug: String, suffix: &str) -> String {
    if v.is_nan() {
        "NAN".to_string()
    } else if v.is_infinite() {
        if v > 0.0 {
            "INFINITY".to_string()
        } else {
            "(-INFINITY)".to_string()
        }
    } else if v.is_sign_negative() && v != 0.0 {
        format!("({}{})", debug, suffix)
    } else {
        format!("{}{}", debug, suffix)
    }
}

// ─── Host types ────────────────────────────────────────────────────

/// Host representation of a device scalar type.
pub trait DeviceScalar: bytemuck::Pod + Send + Sync + 'static {
    const SCALAR: ScalarType;

    fn into_value(self) -> Value;

    /// Convert with C semantics if `v` has a different type.
    fn from_value(v: Value) -> Self;
}

macro_rules! device_scalar {
    ($ty:ty, $variant:ident) => {
        impl DeviceScalar for $ty {
            const SCALAR: ScalarType = ScalarType::$variant;

            fn into_value(self) -> Value {
                Value::$variant(self)
            }

            fn from_value(v: Value) -> Self {
                match v.cast(ScalarType::$variant) {
                    Value::$variant(x) => x,
                    _ => unreachable!("cast yields the requested variant"),
                }
            }
        }

        impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::$variant(v)
            }
        }
    };
}

device_scalar!(i32, Int32);
device_scalar!(u32, UInt32);
device_scalar!(f32, Float32);
device_scalar!(f64, Float64);
device_scalar!(i64, Int64);
