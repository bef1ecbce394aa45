//! KIR interpreter for the reference device.
//!
//! Work-groups run one after another. Inside a group, every top-level
//! statement is run by all work-items before the next one starts, which
//! gives top-level barriers their meaning. A work-item of a vectorized
//! kernel runs once per lane; lane `l` of item `i` owns array element
//! `i * width + l`. Group-local arrays are indexed the same way by the
//! item's position inside its group, which rebasing leaves alone.

use std::collections::HashMap;

use crate::backend::{ArgBinding, BufferId, BufferRegion};
use crate::element::{BinaryOp, TernaryOp, UnaryOp};
use crate::error::{Error, Result, Status};
use crate::kir::{Node, ParamKind, Program, SlotKind};
use crate::types::{ScalarType, Value};

use super::DeviceBuffer;

pub(super) struct Launch<'a> {
    pub program: &'a Program,
    pub args: &'a [ArgBinding],
    pub width: usize,
    pub group_size: usize,
    pub work_items: usize,
}

pub(super) fn run(launch: &Launch<'_>, memory: &mut HashMap<BufferId, DeviceBuffer>) -> Result<()> {
    check_args(launch, memory)?;
    let width = launch.width.max(1);
    let group_size = launch.group_size.max(1);
    let groups = launch.work_items.div_ceil(group_size);

    for group in 0..groups {
        let first = group * group_size;
        let last = (first + group_size).min(launch.work_items);
        let mut locals = local_storage(launch.program, width);
        let mut privates: Vec<Vec<Vec<Value>>> = (0..(last - first) * width)
            .map(|_| private_storage(launch.program))
            .collect();

        for stmt in &launch.program.body {
            for item in first..last {
                for lane in 0..width {
                    let frame = Frame {
                        index: item as i64,
                        local: (item - first) as i64,
                        lane: lane as i64,
                        group: group as i64,
                    };
                    let mut machine = Machine {
                        launch,
                        width: width as i64,
                        memory: &mut *memory,
                        locals: &mut locals,
                        privates: &mut privates[(item - first) * width + lane],
                    };
                    machine.eval(stmt, frame)?;
                }
            }
        }
    }
    Ok(())
}

fn check_args(launch: &Launch<'_>, memory: &HashMap<BufferId, DeviceBuffer>) -> Result<()> {
    let params = &launch.program.params;
    if launch.args.len() != params.len() {
        return Err(Error::resource(
            "enqueue",
            Status::INVALID_KERNEL_ARGS,
            format!("kernel takes {} arguments, {} bound", params.len(), launch.args.len()),
        ));
    }
    for (i, (param, arg)) in params.iter().zip(launch.args).enumerate() {
        match (param.kind, arg) {
            (ParamKind::Buffer, ArgBinding::Buffer(region)) => {
                let buffer = memory.get(&region.buffer).ok_or_else(|| {
                    Error::resource(
                        "enqueue",
                        Status::INVALID_MEM_OBJECT,
                        format!("argument {} refers to released buffer {}", i, region.buffer.0),
                    )
                })?;
                if region.offset + region.size > buffer.bytes.len() {
                    return Err(Error::resource(
                        "enqueue",
                        Status::INVALID_VALUE,
                        format!("argument {} region exceeds its buffer", i),
                    ));
                }
            }
            (ParamKind::Scalar, ArgBinding::Scalar(_)) => {}
            _ => {
                return Err(Error::resource(
                    "enqueue",
                    Status::INVALID_KERNEL_ARGS,
                    format!("argument {} has the wrong kind", i),
                ))
            }
        }
    }
    Ok(())
}

fn local_storage(program: &Program, width: usize) -> Vec<Vec<Value>> {
    program
        .slots
        .iter()
        .map(|slot| match slot.kind {
            SlotKind::Local { capacity } => vec![Value::zero(slot.scalar); capacity + width],
            _ => Vec::new(),
        })
        .collect()
}

fn private_storage(program: &Program) -> Vec<Vec<Value>> {
    program
        .slots
        .iter()
        .map(|slot| match slot.kind {
            SlotKind::PrivateArray { capacity } => vec![Value::zero(slot.scalar); capacity],
            SlotKind::Variable { init } => vec![init.cast(slot.scalar)],
            SlotKind::Counter => vec![Value::Int32(0)],
            SlotKind::Local { .. } => Vec::new(),
        })
        .collect()
}

// ─── Machine ───────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug)]
struct Frame {
    index: i64,
    local: i64,
    lane: i64,
    group: i64,
}

#[derive(Clone, Copy, Debug)]
enum Place {
    Buffer { param: usize, element: i64 },
    Local { slot: usize, element: i64 },
    Private { slot: usize, element: i64 },
}

struct Machine<'a> {
    launch: &'a Launch<'a>,
    width: i64,
    memory: &'a mut HashMap<BufferId, DeviceBuffer>,
    locals: &'a mut [Vec<Value>],
    privates: &'a mut [Vec<Value>],
}

fn out_of_bounds(what: &str, element: i64) -> Error {
    Error::resource(
        "enqueue",
        Status::OUT_OF_RESOURCES,
        format!("{} access at element {} is out of bounds", what, element),
    )
}

fn invalid(message: impl Into<String>) -> Error {
    Error::resource("enqueue", Status::INVALID_OPERATION, message)
}

impl Machine<'_> {
    fn element(&self, frame: Frame) -> i64 {
        frame.index * self.width + frame.lane
    }

    fn eval_body(&mut self, body: &[Node], frame: Frame) -> Result<()> {
        for stmt in body {
            self.eval(stmt, frame)?;
        }
        Ok(())
    }

    fn eval(&mut self, node: &Node, frame: Frame) -> Result<Value> {
        match node {
            Node::Const(v) => Ok(*v),
            Node::Index => Ok(Value::Int32(frame.index as i32)),
            Node::ExtendedIndex => Ok(Value::Int32(self.element(frame) as i32)),
            Node::GroupId => Ok(Value::Int32(frame.group as i32)),
            Node::Scalar(p) => match self.launch.args.get(*p) {
                Some(ArgBinding::Scalar(v)) => Ok(*v),
                _ => Err(invalid(format!("parameter {} is not a scalar", p))),
            },
            Node::Buffer(_) | Node::Slot(_) => {
                let place = self.place(node, frame)?;
                self.load(place)
            }
            Node::Unary(op, ty, a) => {
                let v = self.eval(a, frame)?;
                Ok(unary(*op, *ty, v))
            }
            Node::Binary(op, ty, a, b) => self.binary(*op, *ty, a, b, frame),
            Node::Ternary(op, ty, a, b, c) => self.ternary(*op, *ty, a, b, c, frame),
            Node::If {
                cond,
                then_body,
                else_body,
            } => {
                if self.eval(cond, frame)?.is_truthy() {
                    self.eval_body(then_body, frame)?;
                } else {
                    self.eval_body(else_body, frame)?;
                }
                Ok(Value::Int32(0))
            }
            Node::Loop {
                counter,
                start,
                end,
                body,
            } => {
                let counter = Place::Private {
                    slot: *counter,
                    element: 0,
                };
                let mut i = self.eval(start, frame)?.as_i64();
                while i < self.eval(end, frame)?.as_i64() {
                    self.store(counter, Value::Int32(i as i32))?;
                    self.eval_body(body, frame)?;
                    i += 1;
                }
                Ok(Value::Int32(0))
            }
            Node::Barrier => Ok(Value::Int32(0)),
            Node::Rebase { index, body } => {
                let index = self.eval(index, frame)?.as_i64();
                self.eval(body, Frame { index, ..frame })
            }
            Node::Template(_) => Err(Error::compile(
                "enqueue",
                Status::BUILD_PROGRAM_FAILURE,
                "template text cannot be executed on the reference device",
            )),
        }
    }

    fn place(&mut self, node: &Node, frame: Frame) -> Result<Place> {
        match node {
            Node::Buffer(p) => Ok(Place::Buffer {
                param: *p,
                element: self.element(frame),
            }),
            Node::Slot(s) => {
                let slot = self
                    .launch
                    .program
                    .slots
                    .get(*s)
                    .ok_or_else(|| invalid(format!("unknown slot {}", s)))?;
                Ok(match slot.kind {
                    SlotKind::Local { .. } => Place::Local {
                        slot: *s,
                        element: frame.local * self.width + frame.lane,
                    },
                    SlotKind::PrivateArray { .. } => Place::Private {
                        slot: *s,
                        element: self.element(frame),
                    },
                    SlotKind::Variable { .. } | SlotKind::Counter => Place::Private {
                        slot: *s,
                        element: 0,
                    },
                })
            }
            Node::Rebase { index, body } => {
                let index = self.eval(index, frame)?.as_i64();
                self.place(body, Frame { index, ..frame })
            }
            other => Err(invalid(format!("{} is not assignable", other))),
        }
    }

    fn buffer_param(&self, param: usize) -> Result<(BufferRegion, ScalarType)> {
        let scalar = self
            .launch
            .program
            .params
            .get(param)
            .map(|p| p.scalar)
            .ok_or_else(|| invalid(format!("unknown parameter {}", param)))?;
        match self.launch.args.get(param) {
            Some(ArgBinding::Buffer(region)) => Ok((*region, scalar)),
            _ => Err(invalid(format!("parameter {} is not a buffer", param))),
        }
    }

    /// Byte range of `element` inside the bound region of `param`.
    fn buffer_range(&self, param: usize, element: i64) -> Result<(BufferId, usize, ScalarType)> {
        let (region, scalar) = self.buffer_param(param)?;
        let size = scalar.size();
        if element < 0 || (element as usize + 1) * size > region.size {
            return Err(out_of_bounds("global", element));
        }
        Ok((region.buffer, region.offset + element as usize * size, scalar))
    }

    fn load(&self, place: Place) -> Result<Value> {
        match place {
            Place::Buffer { param, element } => {
                let (buffer, offset, scalar) = self.buffer_range(param, element)?;
                let bytes = &self
                    .memory
                    .get(&buffer)
                    .ok_or_else(|| invalid(format!("buffer {} was released", buffer.0)))?
                    .bytes;
                Ok(Value::read_bytes(scalar, &bytes[offset..offset + scalar.size()]))
            }
            Place::Local { slot, element } => slot_get(&*self.locals, slot, element, "local"),
            Place::Private { slot, element } => slot_get(&*self.privates, slot, element, "private"),
        }
    }

    fn store(&mut self, place: Place, value: Value) -> Result<()> {
        match place {
            Place::Buffer { param, element } => {
                let (buffer, offset, scalar) = self.buffer_range(param, element)?;
                let bytes = &mut self
                    .memory
                    .get_mut(&buffer)
                    .ok_or_else(|| invalid(format!("buffer {} was released", buffer.0)))?
                    .bytes;
                value
                    .cast(scalar)
                    .write_bytes(&mut bytes[offset..offset + scalar.size()]);
                Ok(())
            }
            Place::Local { slot, element } => {
                let scalar = self.slot_scalar(slot)?;
                slot_set(self.locals, slot, element, value.cast(scalar), "local")
            }
            Place::Private { slot, element } => {
                let scalar = self.slot_scalar(slot)?;
                slot_set(self.privates, slot, element, value.cast(scalar), "private")
            }
        }
    }

    fn slot_scalar(&self, slot: usize) -> Result<ScalarType> {
        self.launch
            .program
            .slots
            .get(slot)
            .map(|s| s.scalar)
            .ok_or_else(|| invalid(format!("unknown slot {}", slot)))
    }

    fn binary(
        &mut self,
        op: BinaryOp,
        ty: ScalarType,
        a: &Node,
        b: &Node,
        frame: Frame,
    ) -> Result<Value> {
        if op == BinaryOp::Assign {
            let place = self.place(a, frame)?;
            let value = self.eval(b, frame)?;
            self.store(place, value)?;
            return Ok(value);
        }
        if let Some(base) = op.compound_base() {
            let place = self.place(a, frame)?;
            let old = self.load(place)?;
            let value = self.eval(b, frame)?;
            let new = arith(base, ty, old, value)?;
            self.store(place, new)?;
            return Ok(new);
        }
        if op.is_atomic() {
            let place = self.place(a, frame)?;
            let old = self.load(place)?;
            let value = self.eval(b, frame)?;
            let new = match op.atomic_base() {
                Some(base) => arith(base, ty, old, value)?,
                None => value,
            };
            self.store(place, new)?;
            return Ok(old);
        }

        let x = self.eval(a, frame)?;
        match op {
            BinaryOp::And if !x.is_truthy() => return Ok(Value::Int32(0)),
            BinaryOp::Or if x.is_truthy() => return Ok(Value::Int32(1)),
            _ => {}
        }
        let y = self.eval(b, frame)?;
        arith(op, ty, x, y)
    }

    fn ternary(
        &mut self,
        op: TernaryOp,
        ty: ScalarType,
        a: &Node,
        b: &Node,
        c: &Node,
        frame: Frame,
    ) -> Result<Value> {
        match op {
            TernaryOp::Select => {
                let chosen = if self.eval(a, frame)?.is_truthy() { b } else { c };
                Ok(self.eval(chosen, frame)?.cast(ty))
            }
            TernaryOp::AtomicCmpXchg => {
                let place = self.place(a, frame)?;
                let old = self.load(place)?;
                let cmp = self.eval(b, frame)?;
                let value = self.eval(c, frame)?;
                if old.cast(ty) == cmp.cast(ty) {
                    self.store(place, value)?;
                }
                Ok(old)
            }
            TernaryOp::Mad | TernaryOp::Fma | TernaryOp::Clamp => {
                let x = self.eval(a, frame)?;
                let y = self.eval(b, frame)?;
                let z = self.eval(c, frame)?;
                let float = [x, y, z].iter().any(|v| v.scalar_type().is_float());
                Ok(match (op, float) {
                    (TernaryOp::Fma, true) => {
                        Value::from_f64(ty, x.as_f64().mul_add(y.as_f64(), z.as_f64()))
                    }
                    (TernaryOp::Clamp, true) => {
                        Value::from_f64(ty, x.as_f64().max(y.as_f64()).min(z.as_f64()))
                    }
                    (TernaryOp::Clamp, false) => {
                        Value::from_i64(ty, x.as_i64().max(y.as_i64()).min(z.as_i64()))
                    }
                    (_, true) => Value::from_f64(ty, x.as_f64() * y.as_f64() + z.as_f64()),
                    (_, false) => Value::from_i64(
                        ty,
                        x.as_i64().wrapping_mul(y.as_i64()).wrapping_add(z.as_i64()),
                    ),
                })
            }
        }
    }
}

fn slot_get(storage: &[Vec<Value>], slot: usize, element: i64, what: &str) -> Result<Value> {
    usize::try_from(element)
        .ok()
        .and_then(|e| storage.get(slot)?.get(e))
        .copied()
        .ok_or_else(|| out_of_bounds(what, element))
}

fn slot_set(
    storage: &mut [Vec<Value>],
    slot: usize,
    element: i64,
    value: Value,
    what: &str,
) -> Result<()> {
    let cell = usize::try_from(element)
        .ok()
        .and_then(|e| storage.get_mut(slot)?.get_mut(e))
        .ok_or_else(|| out_of_bounds(what, element))?;
    *cell = value;
    Ok(())
}

// ─── Arithmetic ────────────────────────────────────────────────────

fn unary(op: UnaryOp, ty: ScalarType, v: Value) -> Value {
    let float = v.scalar_type().is_float();
    let math = |f: fn(f64) -> f64| Value::from_f64(ty, f(v.as_f64()));
    match op {
        UnaryOp::Convert(target) => v.cast(target),
        UnaryOp::Not => Value::Int32(!v.is_truthy() as i32),
        UnaryOp::Neg if float => Value::from_f64(ty, -v.as_f64()),
        UnaryOp::Neg => Value::from_i64(ty, v.as_i64().wrapping_neg()),
        UnaryOp::Abs if float => math(f64::abs),
        UnaryOp::Abs => Value::from_i64(ty, v.as_i64().wrapping_abs()),
        UnaryOp::Sqrt => math(f64::sqrt),
        UnaryOp::Rsqrt => math(|x| 1.0 / x.sqrt()),
        UnaryOp::Exp => math(f64::exp),
        UnaryOp::Log => math(f64::ln),
        UnaryOp::Sin => math(f64::sin),
        UnaryOp::Cos => math(f64::cos),
        UnaryOp::Tan => math(f64::tan),
        UnaryOp::Floor => math(f64::floor),
        UnaryOp::Ceil => math(f64::ceil),
        UnaryOp::Round => math(f64::round),
    }
}

/// Binary arithmetic with kernel-language semantics: floats are computed
/// in double precision and rounded to `ty`; integers wrap.
fn arith(op: BinaryOp, ty: ScalarType, x: Value, y: Value) -> Result<Value> {
    let float = x.scalar_type().is_float() || y.scalar_type().is_float();
    if op.is_boolean() {
        let r = match op {
            BinaryOp::And => x.is_truthy() && y.is_truthy(),
            BinaryOp::Or => x.is_truthy() || y.is_truthy(),
            _ if float => compare(op, x.as_f64(), y.as_f64()),
            _ => compare(op, x.as_i64(), y.as_i64()),
        };
        return Ok(Value::Int32(r as i32));
    }

    if float {
        let (a, b) = (x.as_f64(), y.as_f64());
        let r = match op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Rem => a % b,
            BinaryOp::Min => a.min(b),
            BinaryOp::Max => a.max(b),
            BinaryOp::Pow => a.powf(b),
            BinaryOp::Atan2 => a.atan2(b),
            other => return Err(invalid(format!("{} is not arithmetic", other.name()))),
        };
        return Ok(Value::from_f64(ty, r));
    }

    let (a, b) = (x.as_i64(), y.as_i64());
    let r = match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::Div | BinaryOp::Rem if b == 0 => {
            return Err(invalid("integer division by zero"));
        }
        BinaryOp::Div => a.wrapping_div(b),
        BinaryOp::Rem => a.wrapping_rem(b),
        BinaryOp::Min => a.min(b),
        BinaryOp::Max => a.max(b),
        BinaryOp::Pow => (a as f64).powf(b as f64) as i64,
        BinaryOp::Atan2 => (a as f64).atan2(b as f64) as i64,
        other => return Err(invalid(format!("{} is not arithmetic", other.name()))),
    };
    Ok(Value::from_i64(ty, r))
}

fn compare<T: PartialOrd>(op: BinaryOp, a: T, b: T) -> bool {
    match op {
        BinaryOp::Eq => a == b,
        BinaryOp::Ne => a != b,
        BinaryOp::Lt => a < b,
        BinaryOp::Le => a <= b,
        BinaryOp::Gt => a > b,
        _ => a >= b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_arithmetic_wraps() {
        let r = arith(
            BinaryOp::Add,
            ScalarType::Int32,
            Value::Int32(i32::MAX),
            Value::Int32(1),
        )
        .unwrap();
        assert_eq!(r, Value::Int32(i32::MIN));
        let r = arith(BinaryOp::Sub, ScalarType::UInt32, Value::UInt32(0), Value::UInt32(1)).unwrap();
        assert_eq!(r, Value::UInt32(u32::MAX));
    }

    #[test]
    fn test_float_arithmetic_rounds_to_type() {
        let r = arith(
            BinaryOp::Div,
            ScalarType::Float32,
            Value::Float32(1.0),
            Value::Float32(3.0),
        )
        .unwrap();
        assert_eq!(r, Value::Float32(1.0f32 / 3.0f32));
    }

    #[test]
    fn test_comparisons_yield_int() {
        let r = arith(
            BinaryOp::Lt,
            ScalarType::Int32,
            Value::Float64(1.0),
            Value::Float64(2.0),
        )
        .unwrap();
        assert_eq!(r, Value::Int32(1));
    }

    #[test]
    fn test_integer_division_by_zero_is_reported() {
        let err = arith(BinaryOp::Div, ScalarType::Int32, Value::Int32(1), Value::Int32(0));
        assert!(err.is_err());
    }

    #[test]
    fn test_unary_functions() {
        assert_eq!(
            unary(UnaryOp::Sqrt, ScalarType::Float32, Value::Float32(9.0)),
            Value::Float32(3.0)
        );
        assert_eq!(
            unary(UnaryOp::Neg, ScalarType::Int32, Value::Int32(4)),
            Value::Int32(-4)
        );
        assert_eq!(
            unary(
                UnaryOp::Convert(ScalarType::Int32),
                ScalarType::Int32,
                Value::Float32(2.7)
            ),
            Value::Int32(2)
        );
    }
}
