//! Operator elements: unary, binary and ternary combinators.
//!
//! Every constructor checks that its operands are size- and
//! device-compatible and fails before creating a node. The result type
//! comes from a designated primary operand; comparisons and logical
//! operators yield `int`.

use super::{ElementId, ElementKind, Graph};
use crate::error::{Error, Result};
use crate::types::{ScalarType, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
    Abs,
    Sqrt,
    Rsqrt,
    Exp,
    Log,
    Sin,
    Cos,
    Tan,
    Floor,
    Ceil,
    Round,
    Convert(ScalarType),
}

impl UnaryOp {
    pub fn name(self) -> &'static str {
        match self {
            UnaryOp::Neg => "neg",
            UnaryOp::Not => "not",
            UnaryOp::Abs => "abs",
            UnaryOp::Sqrt => "sqrt",
            UnaryOp::Rsqrt => "rsqrt",
            UnaryOp::Exp => "exp",
            UnaryOp::Log => "log",
            UnaryOp::Sin => "sin",
            UnaryOp::Cos => "cos",
            UnaryOp::Tan => "tan",
            UnaryOp::Floor => "floor",
            UnaryOp::Ceil => "ceil",
            UnaryOp::Round => "round",
            UnaryOp::Convert(_) => "convert",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    // ── Arithmetic ──
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Min,
    Max,
    Pow,
    Atan2,

    // ── Comparison & logic ──
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,

    // ── Assignment ──
    Assign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,

    // ── Atomics (return the previous value) ──
    AtomicAdd,
    AtomicSub,
    AtomicXchg,
    AtomicMin,
    AtomicMax,
}

impl BinaryOp {
    pub fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Rem => "rem",
            BinaryOp::Min => "min",
            BinaryOp::Max => "max",
            BinaryOp::Pow => "pow",
            BinaryOp::Atan2 => "atan2",
            BinaryOp::Eq => "eq",
            BinaryOp::Ne => "ne",
            BinaryOp::Lt => "lt",
            BinaryOp::Le => "le",
            BinaryOp::Gt => "gt",
            BinaryOp::Ge => "ge",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Assign => "assign",
            BinaryOp::AddAssign => "add_assign",
            BinaryOp::SubAssign => "sub_assign",
            BinaryOp::MulAssign => "mul_assign",
            BinaryOp::DivAssign => "div_assign",
            BinaryOp::AtomicAdd => "atomic_add",
            BinaryOp::AtomicSub => "atomic_sub",
            BinaryOp::AtomicXchg => "atomic_xchg",
            BinaryOp::AtomicMin => "atomic_min",
            BinaryOp::AtomicMax => "atomic_max",
        }
    }

    /// Infix operator text, for operators written infix.
    pub fn symbol(self) -> Option<&'static str> {
        let s = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            _ => return None,
        };
        Some(s)
    }

    pub fn is_boolean(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::Ne
                | BinaryOp::Lt
                | BinaryOp::Le
                | BinaryOp::Gt
                | BinaryOp::Ge
                | BinaryOp::And
                | BinaryOp::Or
        )
    }

    pub fn is_assignment(self) -> bool {
        matches!(
            self,
            BinaryOp::Assign
                | BinaryOp::AddAssign
                | BinaryOp::SubAssign
                | BinaryOp::MulAssign
                | BinaryOp::DivAssign
        )
    }

    pub fn is_atomic(self) -> bool {
        matches!(
            self,
            BinaryOp::AtomicAdd
                | BinaryOp::AtomicSub
                | BinaryOp::AtomicXchg
                | BinaryOp::AtomicMin
                | BinaryOp::AtomicMax
        )
    }

    /// Arithmetic behind a compound assignment (`+=` → `+`).
    pub fn compound_base(self) -> Option<BinaryOp> {
        match self {
            BinaryOp::AddAssign => Some(BinaryOp::Add),
            BinaryOp::SubAssign => Some(BinaryOp::Sub),
            BinaryOp::MulAssign => Some(BinaryOp::Mul),
            BinaryOp::DivAssign => Some(BinaryOp::Div),
            _ => None,
        }
    }

    /// Arithmetic an atomic applies to the stored value, `None` for exchange.
    pub fn atomic_base(self) -> Option<BinaryOp> {
        match self {
            BinaryOp::AtomicAdd => Some(BinaryOp::Add),
            BinaryOp::AtomicSub => Some(BinaryOp::Sub),
            BinaryOp::AtomicMin => Some(BinaryOp::Min),
            BinaryOp::AtomicMax => Some(BinaryOp::Max),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TernaryOp {
    /// `cond ? a : b`
    Select,
    /// `a * b + c`
    Mad,
    Fma,
    Clamp,
    /// `atomic_cmpxchg(target, cmp, value)`
    AtomicCmpXchg,
}

impl TernaryOp {
    pub fn name(self) -> &'static str {
        match self {
            TernaryOp::Select => "select",
            TernaryOp::Mad => "mad",
            TernaryOp::Fma => "fma",
            TernaryOp::Clamp => "clamp",
            TernaryOp::AtomicCmpXchg => "atomic_cmpxchg",
        }
    }
}

// ─── Constructors ──────────────────────────────────────────────────

impl Graph {
    pub fn unary(&mut self, op: UnaryOp, a: ElementId) -> Result<ElementId> {
        let shape = self.shape_of(&[a], op.name())?;
        let scalar = match op {
            UnaryOp::Not => ScalarType::Int32,
            UnaryOp::Convert(ty) => ty,
            _ => self.get(a).scalar_type(),
        };
        Ok(self.push(ElementKind::Unary(op, a), scalar, shape, false))
    }

    pub fn binary(&mut self, op: BinaryOp, a: ElementId, b: ElementId) -> Result<ElementId> {
        let shape = self.shape_of(&[a, b], op.name())?;

        if op == BinaryOp::Div || op == BinaryOp::DivAssign {
            let den = self.get(b);
            if den.is_literal_zero() {
                return Err(Error::DivisionByZero(literal_text(den)));
            }
            if op == BinaryOp::Div && self.get(a).is_literal_zero() {
                // 0 / x folds to a zero with the quotient's length and device.
                let zero = Value::zero(self.get(a).scalar_type());
                return Ok(self.push(
                    ElementKind::Constant(zero),
                    zero.scalar_type(),
                    shape,
                    false,
                ));
            }
        }
        if op.is_assignment() || op.is_atomic() {
            self.check_target(op.name(), a)?;
        }
        if op.is_atomic() {
            self.check_atomic_target(op.name(), a)?;
        }

        let scalar = if op.is_boolean() {
            ScalarType::Int32
        } else {
            self.get(a).scalar_type()
        };
        Ok(self.push(ElementKind::Binary(op, a, b), scalar, shape, false))
    }

    pub fn ternary(
        &mut self,
        op: TernaryOp,
        a: ElementId,
        b: ElementId,
        c: ElementId,
    ) -> Result<ElementId> {
        let shape = self.shape_of(&[a, b, c], op.name())?;
        let primary = match op {
            TernaryOp::Select => b,
            _ => a,
        };
        if op == TernaryOp::AtomicCmpXchg {
            self.check_target(op.name(), a)?;
            self.check_atomic_target(op.name(), a)?;
        }
        let scalar = self.get(primary).scalar_type();
        Ok(self.push(ElementKind::Ternary(op, a, b, c), scalar, shape, false))
    }

    fn check_target(&self, context: &str, target: ElementId) -> Result<()> {
        if !self.get(target).writable() {
            return Err(Error::forbidden(format!(
                "{}: target {} is not writable",
                context, target
            )));
        }
        Ok(())
    }

    fn check_atomic_target(&self, context: &str, target: ElementId) -> Result<()> {
        if !self.is_array_target(target) {
            return Err(Error::forbidden(format!(
                "{}: target must be a global or local array",
                context
            )));
        }
        if self.get(target).scalar_type().is_float() {
            return Err(Error::forbidden(format!(
                "{}: atomics are only defined for integer types",
                context
            )));
        }
        Ok(())
    }

    fn is_array_target(&self, id: ElementId) -> bool {
        match self.kind(id) {
            ElementKind::Global(_) | ElementKind::SubRange(_) | ElementKind::LocalArray { .. } => {
                true
            }
            ElementKind::Excerpt { source, .. } => self.is_array_target(*source),
            _ => false,
        }
    }

    // ── Shorthands ──

    pub fn add(&mut self, a: ElementId, b: ElementId) -> Result<ElementId> {
        self.binary(BinaryOp::Add, a, b)
    }

    pub fn sub(&mut self, a: ElementId, b: ElementId) -> Result<ElementId> {
        self.binary(BinaryOp::Sub, a, b)
    }

    pub fn mul(&mut self, a: ElementId, b: ElementId) -> Result<ElementId> {
        self.binary(BinaryOp::Mul, a, b)
    }

    pub fn div(&mut self, a: ElementId, b: ElementId) -> Result<ElementId> {
        self.binary(BinaryOp::Div, a, b)
    }

    pub fn less(&mut self, a: ElementId, b: ElementId) -> Result<ElementId> {
        self.binary(BinaryOp::Lt, a, b)
    }

    pub fn assign(&mut self, target: ElementId, value: ElementId) -> Result<ElementId> {
        self.binary(BinaryOp::Assign, target, value)
    }

    pub fn add_assign(&mut self, target: ElementId, value: ElementId) -> Result<ElementId> {
        self.binary(BinaryOp::AddAssign, target, value)
    }

    pub fn atomic_add(&mut self, target: ElementId, value: ElementId) -> Result<ElementId> {
        self.binary(BinaryOp::AtomicAdd, target, value)
    }

    pub fn select(&mut self, cond: ElementId, a: ElementId, b: ElementId) -> Result<ElementId> {
        self.ternary(TernaryOp::Select, cond, a, b)
    }

    pub fn mad(&mut self, a: ElementId, b: ElementId, c: ElementId) -> Result<ElementId> {
        self.ternary(TernaryOp::Mad, a, b, c)
    }

    pub fn convert(&mut self, a: ElementId, ty: ScalarType) -> Result<ElementId> {
        self.unary(UnaryOp::Convert(ty), a)
    }
}

fn literal_text(el: &super::Element) -> String {
    match &el.kind {
        ElementKind::Constant(v) => v.literal(),
        _ => String::new(),
    }
}
