//! Element graph — the compiler's IR.
//!
//! Elements live in a `Graph` arena and refer to each other by
//! `ElementId`. Every node carries a scalar type, a logical length (0 means
//! scalar/broadcastable), an optional device affinity (`Queue`) and a
//! writability flag. Operator constructors check size and device
//! compatibility of their operands and fail before any node is created.
//!
//! Leaves fall into three classes:
//! - kernel parameters: global arrays, sub-range views, host scalars;
//! - in-kernel declarations: group-local arrays, private arrays/variables;
//! - plain expressions: constants, indices, group id, loop counters.
//!
//! The class is a property of the leaf kind, never a runtime flag.

mod control;
pub(crate) mod emit;
mod leaf;
mod ops;
#[cfg(test)]
mod tests;

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::hardware::Queue;
use crate::memblock::MemBlock;
use crate::types::{ScalarType, Value};

pub use emit::{replace_token, Emitter, INDEX_TOKEN};
pub use leaf::HostScalar;
pub use ops::{BinaryOp, TernaryOp, UnaryOp};

/// Handle of an element inside its `Graph`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub(crate) u32);

impl ElementId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

// ─── Element kinds ─────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub(crate) enum ElementKind {
    // ── Expression leaves ──
    Constant(Value),
    Index,
    ExtendedIndex,
    GroupId,
    LoopCounter,

    // ── Parameter leaves ──
    HostScalar(Arc<HostScalar>),
    Global(Arc<MemBlock>),
    SubRange(Arc<MemBlock>),

    // ── Declared leaves ──
    LocalArray {
        capacity: usize,
    },
    PrivateArray {
        capacity: usize,
    },
    PrivateVariable {
        init: Option<Value>,
    },

    // ── Operators ──
    Unary(UnaryOp, ElementId),
    Binary(BinaryOp, ElementId, ElementId),
    Ternary(TernaryOp, ElementId, ElementId, ElementId),

    // ── Control structures ──
    If {
        cond: ElementId,
        then_body: Vec<ElementId>,
        else_body: Vec<ElementId>,
    },
    Loop {
        counter: ElementId,
        start: ElementId,
        end: ElementId,
        body: Vec<ElementId>,
    },
    Barrier,

    // ── Textual rewrites ──
    Excerpt {
        source: ElementId,
        filter: ElementId,
    },
    Parser {
        template: String,
        bindings: Vec<(ElementId, String)>,
    },
}

#[derive(Clone, Debug)]
pub struct Element {
    pub(crate) kind: ElementKind,
    scalar: ScalarType,
    length: usize,
    queue: Option<Queue>,
    writable: bool,
}

impl Element {
    pub fn scalar_type(&self) -> ScalarType {
        self.scalar
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn queue(&self) -> Option<&Queue> {
        self.queue.as_ref()
    }

    pub fn writable(&self) -> bool {
        self.writable
    }

    /// Passed to the kernel as a parameter.
    pub fn is_argument(&self) -> bool {
        matches!(
            self.kind,
            ElementKind::Global(_) | ElementKind::SubRange(_) | ElementKind::HostScalar(_)
        )
    }

    /// Declared inside the kernel body.
    pub fn is_local_declaration(&self) -> bool {
        matches!(
            self.kind,
            ElementKind::LocalArray { .. }
                | ElementKind::PrivateArray { .. }
                | ElementKind::PrivateVariable { .. }
        )
    }

    pub fn is_declarable(&self) -> bool {
        self.is_argument() || self.is_local_declaration()
    }

    /// Statement whose text is a block rather than an expression.
    pub fn is_control(&self) -> bool {
        matches!(self.kind, ElementKind::If { .. } | ElementKind::Loop { .. })
    }

    /// Literal zero, judged by the constant's emitted text.
    pub fn is_literal_zero(&self) -> bool {
        match &self.kind {
            ElementKind::Constant(v) => literal_is_zero(&v.literal()),
            _ => false,
        }
    }

    /// The device buffer behind a global array or view.
    pub fn block(&self) -> Option<&Arc<MemBlock>> {
        match &self.kind {
            ElementKind::Global(b) | ElementKind::SubRange(b) => Some(b),
            _ => None,
        }
    }

    pub fn host_scalar(&self) -> Option<&Arc<HostScalar>> {
        match &self.kind {
            ElementKind::HostScalar(s) => Some(s),
            _ => None,
        }
    }

    /// Direct operands and body statements, in emission order.
    pub(crate) fn children(&self) -> Vec<ElementId> {
        match &self.kind {
            ElementKind::Constant(_)
            | ElementKind::Index
            | ElementKind::ExtendedIndex
            | ElementKind::GroupId
            | ElementKind::LoopCounter
            | ElementKind::HostScalar(_)
            | ElementKind::Global(_)
            | ElementKind::SubRange(_)
            | ElementKind::LocalArray { .. }
            | ElementKind::PrivateArray { .. }
            | ElementKind::PrivateVariable { .. }
            | ElementKind::Barrier => Vec::new(),
            ElementKind::Unary(_, a) => vec![*a],
            ElementKind::Binary(_, a, b) => vec![*a, *b],
            ElementKind::Ternary(_, a, b, c) => vec![*a, *b, *c],
            ElementKind::If {
                cond,
                then_body,
                else_body,
            } => {
                let mut v = vec![*cond];
                v.extend(then_body);
                v.extend(else_body);
                v
            }
            ElementKind::Loop {
                counter,
                start,
                end,
                body,
            } => {
                let mut v = vec![*counter, *start, *end];
                v.extend(body);
                v
            }
            ElementKind::Excerpt { source, filter } => vec![*source, *filter],
            ElementKind::Parser { bindings, .. } => bindings.iter().map(|(e, _)| *e).collect(),
        }
    }
}

/// Whether a literal's text denotes zero (`0`, `0u`, `0.0f`, `(-0.0)`, ...).
pub(crate) fn literal_is_zero(text: &str) -> bool {
    let t = text.trim_start_matches('(').trim_end_matches(')');
    let t = t.trim_end_matches(['f', 'u', 'L']);
    match t.parse::<f64>() {
        Ok(v) => v == 0.0,
        Err(_) => false,
    }
}

// ─── Compatibility ─────────────────────────────────────────────────

/// Lengths agree, or one side is broadcastable.
pub fn size_compatible(a: usize, b: usize) -> bool {
    a == b || a == 0 || b == 0
}

/// Same queue, or one side has no affinity.
pub fn device_compatible(a: Option<&Queue>, b: Option<&Queue>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.same_as(b),
        _ => true,
    }
}

/// Accumulated length and device of a set of operands or statements.
#[derive(Clone, Debug, Default)]
pub struct Shape {
    pub length: usize,
    pub queue: Option<Queue>,
}

impl Shape {
    pub fn new(length: usize, queue: Option<Queue>) -> Self {
        Self { length, queue }
    }

    /// Fold `el` into this shape, or fail if it is incompatible.
    pub fn merge(&self, el: &Element, context: &'static str) -> Result<Shape> {
        if !size_compatible(self.length, el.length) {
            return Err(Error::SizeMismatch {
                context,
                left: self.length,
                right: el.length,
            });
        }
        self.merge_device(el, context)
            .map(|s| Shape::new(self.length.max(el.length), s.queue))
    }

    /// Fold only the device affinity of `el`; lengths are left alone.
    pub fn merge_device(&self, el: &Element, context: &'static str) -> Result<Shape> {
        if !device_compatible(self.queue.as_ref(), el.queue.as_ref()) {
            return Err(Error::DeviceMismatch {
                context,
                left: describe_queue(self.queue.as_ref()),
                right: describe_queue(el.queue.as_ref()),
            });
        }
        Ok(Shape::new(
            self.length,
            self.queue.clone().or_else(|| el.queue.clone()),
        ))
    }
}

fn describe_queue(q: Option<&Queue>) -> String {
    match q {
        Some(q) => q.to_string(),
        None => "none".to_string(),
    }
}

// ─── Leaf identity ─────────────────────────────────────────────────

/// Identity of a declarable leaf. Leaf elements that refer to the same
/// buffer or host scalar share one identity and become one parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LeafKey {
    Block(usize),
    Scalar(usize),
    Element(ElementId),
}

// ─── Graph ─────────────────────────────────────────────────────────

/// Arena owning every element built for one or more kernels.
#[derive(Clone, Debug, Default)]
pub struct Graph {
    elements: Vec<Element>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Look up an element. Ids are only issued by this graph.
    pub fn get(&self, id: ElementId) -> &Element {
        &self.elements[id.index()]
    }

    pub(crate) fn kind(&self, id: ElementId) -> &ElementKind {
        &self.get(id).kind
    }

    pub(crate) fn kind_mut(&mut self, id: ElementId) -> &mut ElementKind {
        &mut self.elements[id.index()].kind
    }

    pub(crate) fn set_shape(&mut self, id: ElementId, shape: Shape) {
        let el = &mut self.elements[id.index()];
        el.length = shape.length;
        el.queue = shape.queue;
    }

    pub(crate) fn push(
        &mut self,
        kind: ElementKind,
        scalar: ScalarType,
        shape: Shape,
        writable: bool,
    ) -> ElementId {
        let id = ElementId(self.elements.len() as u32);
        self.elements.push(Element {
            kind,
            scalar,
            length: shape.length,
            queue: shape.queue,
            writable,
        });
        id
    }

    /// Combined shape of `ids`, checked pairwise in order.
    pub(crate) fn shape_of(&self, ids: &[ElementId], context: &'static str) -> Result<Shape> {
        let mut shape = Shape::default();
        for &id in ids {
            shape = shape.merge(self.get(id), context)?;
        }
        Ok(shape)
    }

    pub fn leaf_key(&self, id: ElementId) -> Option<LeafKey> {
        match &self.get(id).kind {
            ElementKind::Global(b) | ElementKind::SubRange(b) => {
                Some(LeafKey::Block(Arc::as_ptr(b) as usize))
            }
            ElementKind::HostScalar(s) => Some(LeafKey::Scalar(Arc::as_ptr(s) as usize)),
            ElementKind::LocalArray { .. }
            | ElementKind::PrivateArray { .. }
            | ElementKind::PrivateVariable { .. }
            | ElementKind::LoopCounter => Some(LeafKey::Element(id)),
            _ => None,
        }
    }

    /// Sort the declarable leaves under `id` into the two buckets.
    ///
    /// Each direct child is either declarable (pushed to `arguments` or
    /// `declarations`) or visited recursively. Duplicates are allowed here;
    /// containers remove them at finalize.
    pub fn collect_into(
        &self,
        id: ElementId,
        arguments: &mut Vec<ElementId>,
        declarations: &mut Vec<ElementId>,
    ) {
        for child in self.get(id).children() {
            let el = self.get(child);
            if el.is_argument() {
                arguments.push(child);
            } else if el.is_local_declaration() {
                declarations.push(child);
            } else {
                self.collect_into(child, arguments, declarations);
            }
        }
    }

    /// Like `collect_into`, but also classifies `id` itself.
    pub fn classify(
        &self,
        id: ElementId,
        arguments: &mut Vec<ElementId>,
        declarations: &mut Vec<ElementId>,
    ) {
        let el = self.get(id);
        if el.is_argument() {
            arguments.push(id);
        } else if el.is_local_declaration() {
            declarations.push(id);
        } else {
            self.collect_into(id, arguments, declarations);
        }
    }

    /// Depth-first visit of `root` and everything reachable from it.
    pub fn walk(&self, root: ElementId, visit: &mut impl FnMut(ElementId, &Element)) {
        let el = self.get(root);
        visit(root, el);
        for child in el.children() {
            self.walk(child, visit);
        }
    }
}
