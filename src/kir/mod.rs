//! KIR — structured kernel IR.
//!
//! The same kernel that `setup()` emits as source text, as a tree.
//! Backends that hand text to a vendor compiler ignore it; backends that
//! execute on the host (the reference device) run it directly instead of
//! parsing the text back.
//!
//! Leaves refer to kernel parameters and in-kernel declarations by
//! position, so a `Program` is self-contained: parameter `i` is bound by
//! the `i`-th `ArgBinding` at launch.
//!
//! ```text
//! Graph ─→ Emitter   → String        (kernel source)
//!       └→ lower     → kir::Program  (host-executable form)
//! ```

mod lower;

pub use lower::lower;

use std::fmt;

use crate::element::{BinaryOp, TernaryOp, UnaryOp};
use crate::types::{ScalarType, Value};

// ─── Program ───────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    /// Global array (whole buffer or a sub-range of one).
    Buffer,
    /// Host scalar passed by value.
    Scalar,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Param {
    pub kind: ParamKind,
    pub scalar: ScalarType,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SlotKind {
    /// Group-shared array; storage is `capacity + vector_width` elements.
    Local { capacity: usize },
    /// Per work-item array.
    PrivateArray { capacity: usize },
    /// Per work-item variable with its initial value.
    Variable { init: Value },
    /// Loop counter, declared in its `for` header.
    Counter,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Slot {
    pub kind: SlotKind,
    pub scalar: ScalarType,
}

/// One kernel: parameters, declarations, and top-level statements.
#[derive(Clone, Debug, Default)]
pub struct Program {
    pub params: Vec<Param>,
    pub slots: Vec<Slot>,
    pub body: Vec<Node>,
}

impl Program {
    /// Whether any statement carries opaque template text.
    pub fn has_templates(&self) -> bool {
        let mut found = false;
        for node in &self.body {
            node.visit(&mut |n| found |= matches!(n, Node::Template(_)));
        }
        found
    }

    pub fn has_barriers(&self) -> bool {
        let mut found = false;
        for node in &self.body {
            node.visit(&mut |n| found |= matches!(n, Node::Barrier));
        }
        found
    }
}

// ─── Nodes ─────────────────────────────────────────────────────────

/// Expression or statement. Operator nodes carry their result type.
#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    // ── Leaves ──
    Const(Value),
    Index,
    ExtendedIndex,
    GroupId,
    /// Host scalar parameter.
    Scalar(usize),
    /// Global array parameter, addressed at the current index.
    Buffer(usize),
    /// Declared slot: array at the current index, or a variable.
    Slot(usize),

    // ── Operators ──
    Unary(UnaryOp, ScalarType, Box<Node>),
    Binary(BinaryOp, ScalarType, Box<Node>, Box<Node>),
    Ternary(TernaryOp, ScalarType, Box<Node>, Box<Node>, Box<Node>),

    // ── Control ──
    If {
        cond: Box<Node>,
        then_body: Vec<Node>,
        else_body: Vec<Node>,
    },
    Loop {
        counter: usize,
        start: Box<Node>,
        end: Box<Node>,
        body: Vec<Node>,
    },
    Barrier,

    // ── Rewrites ──
    /// Evaluate `body` with the work-item index replaced by `index`.
    Rebase { index: Box<Node>, body: Box<Node> },
    /// Free-form source text with no structured meaning.
    Template(String),
}

impl Node {
    /// Pre-order visit of this node and every node below it.
    pub fn visit(&self, f: &mut impl FnMut(&Node)) {
        f(self);
        match self {
            Node::Unary(_, _, a) => a.visit(f),
            Node::Binary(_, _, a, b) => {
                a.visit(f);
                b.visit(f);
            }
            Node::Ternary(_, _, a, b, c) => {
                a.visit(f);
                b.visit(f);
                c.visit(f);
            }
            Node::If {
                cond,
                then_body,
                else_body,
            } => {
                cond.visit(f);
                then_body.iter().for_each(|n| n.visit(f));
                else_body.iter().for_each(|n| n.visit(f));
            }
            Node::Loop {
                start, end, body, ..
            } => {
                start.visit(f);
                end.visit(f);
                body.iter().for_each(|n| n.visit(f));
            }
            Node::Rebase { index, body } => {
                index.visit(f);
                body.visit(f);
            }
            _ => {}
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Const(v) => write!(f, "{}", v.literal()),
            Node::Index => write!(f, "index"),
            Node::ExtendedIndex => write!(f, "xindex"),
            Node::GroupId => write!(f, "group"),
            Node::Scalar(p) => write!(f, "p{}", p),
            Node::Buffer(p) => write!(f, "p{}[]", p),
            Node::Slot(s) => write!(f, "s{}", s),
            Node::Unary(op, _, a) => write!(f, "{}({})", op.name(), a),
            Node::Binary(op, _, a, b) => write!(f, "{}({}, {})", op.name(), a, b),
            Node::Ternary(op, _, a, b, c) => write!(f, "{}({}, {}, {})", op.name(), a, b, c),
            Node::If {
                cond,
                then_body,
                else_body,
            } => write!(
                f,
                "if {} {{{} stmts}} else {{{} stmts}}",
                cond,
                then_body.len(),
                else_body.len()
            ),
            Node::Loop {
                counter,
                start,
                end,
                body,
            } => write!(f, "for s{} in {}..{} {{{} stmts}}", counter, start, end, body.len()),
            Node::Barrier => write!(f, "barrier"),
            Node::Rebase { index, body } => write!(f, "{}@[{}]", body, index),
            Node::Template(t) => write!(f, "template({:?})", t),
        }
    }
}
