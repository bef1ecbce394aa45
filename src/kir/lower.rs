//! Element graph → KIR.

use std::collections::HashMap;

use super::{Node, Param, ParamKind, Program, Slot, SlotKind};
use crate::element::{ElementId, ElementKind, Graph, LeafKey};
use crate::error::{Error, Result};
use crate::types::Value;

/// Lower `statements` into a program whose parameters follow `arguments`
/// and whose first slots follow `declarations`. Loop counters get slots
/// after the declarations, in first-use order.
pub fn lower(
    graph: &Graph,
    arguments: &[ElementId],
    declarations: &[ElementId],
    statements: &[ElementId],
) -> Result<Program> {
    let mut lowering = Lowering {
        graph,
        params: HashMap::new(),
        slots: HashMap::new(),
        program: Program::default(),
    };
    for &arg in arguments {
        lowering.declare_param(arg)?;
    }
    for &decl in declarations {
        lowering.declare_slot(decl)?;
    }
    let mut body = Vec::with_capacity(statements.len());
    for &stmt in statements {
        body.push(lowering.node(stmt)?);
    }
    let mut program = lowering.program;
    program.body = body;
    Ok(program)
}

struct Lowering<'g> {
    graph: &'g Graph,
    params: HashMap<LeafKey, usize>,
    slots: HashMap<LeafKey, usize>,
    program: Program,
}

impl Lowering<'_> {
    fn key(&self, id: ElementId) -> Result<LeafKey> {
        self.graph
            .leaf_key(id)
            .ok_or_else(|| Error::usage(format!("{} is not a declarable leaf", id)))
    }

    fn declare_param(&mut self, id: ElementId) -> Result<()> {
        let key = self.key(id)?;
        let el = self.graph.get(id);
        let kind = match self.graph.kind(id) {
            ElementKind::Global(_) | ElementKind::SubRange(_) => ParamKind::Buffer,
            ElementKind::HostScalar(_) => ParamKind::Scalar,
            _ => return Err(Error::usage(format!("{} is not a kernel argument", id))),
        };
        if !self.params.contains_key(&key) {
            self.params.insert(key, self.program.params.len());
            self.program.params.push(Param {
                kind,
                scalar: el.scalar_type(),
            });
        }
        Ok(())
    }

    fn declare_slot(&mut self, id: ElementId) -> Result<usize> {
        let key = self.key(id)?;
        if let Some(&slot) = self.slots.get(&key) {
            return Ok(slot);
        }
        let el = self.graph.get(id);
        let scalar = el.scalar_type();
        let kind = match self.graph.kind(id) {
            ElementKind::LocalArray { capacity } => SlotKind::Local {
                capacity: *capacity,
            },
            ElementKind::PrivateArray { capacity } => SlotKind::PrivateArray {
                capacity: *capacity,
            },
            ElementKind::PrivateVariable { init } => SlotKind::Variable {
                init: init.unwrap_or_else(|| Value::zero(scalar)),
            },
            ElementKind::LoopCounter => SlotKind::Counter,
            _ => return Err(Error::usage(format!("{} is not declared in the kernel", id))),
        };
        let slot = self.program.slots.len();
        self.slots.insert(key, slot);
        self.program.slots.push(Slot { kind, scalar });
        Ok(slot)
    }

    fn param(&self, id: ElementId) -> Result<usize> {
        let key = self.key(id)?;
        self.params
            .get(&key)
            .copied()
            .ok_or_else(|| Error::usage(format!("argument {} was not collected", id)))
    }

    fn slot(&self, id: ElementId) -> Result<usize> {
        let key = self.key(id)?;
        self.slots
            .get(&key)
            .copied()
            .ok_or_else(|| Error::usage(format!("declaration {} was not collected", id)))
    }

    fn body(&mut self, ids: &[ElementId]) -> Result<Vec<Node>> {
        ids.iter().map(|&id| self.node(id)).collect()
    }

    fn boxed(&mut self, id: ElementId) -> Result<Box<Node>> {
        Ok(Box::new(self.node(id)?))
    }

    fn node(&mut self, id: ElementId) -> Result<Node> {
        let graph = self.graph;
        let el = graph.get(id);
        let ty = el.scalar_type();
        let node = match graph.kind(id) {
            ElementKind::Constant(v) => Node::Const(*v),
            ElementKind::Index => Node::Index,
            ElementKind::ExtendedIndex => Node::ExtendedIndex,
            ElementKind::GroupId => Node::GroupId,
            ElementKind::HostScalar(_) => Node::Scalar(self.param(id)?),
            ElementKind::Global(_) | ElementKind::SubRange(_) => Node::Buffer(self.param(id)?),
            ElementKind::LocalArray { .. }
            | ElementKind::PrivateArray { .. }
            | ElementKind::PrivateVariable { .. } => Node::Slot(self.slot(id)?),
            ElementKind::LoopCounter => Node::Slot(self.declare_slot(id)?),
            ElementKind::Unary(op, a) => Node::Unary(*op, ty, self.boxed(*a)?),
            ElementKind::Binary(op, a, b) => {
                Node::Binary(*op, ty, self.boxed(*a)?, self.boxed(*b)?)
            }
            ElementKind::Ternary(op, a, b, c) => {
                Node::Ternary(*op, ty, self.boxed(*a)?, self.boxed(*b)?, self.boxed(*c)?)
            }
            ElementKind::If {
                cond,
                then_body,
                else_body,
            } => Node::If {
                cond: self.boxed(*cond)?,
                then_body: self.body(then_body)?,
                else_body: self.body(else_body)?,
            },
            ElementKind::Loop {
                counter,
                start,
                end,
                body,
            } => Node::Loop {
                counter: self.declare_slot(*counter)?,
                start: self.boxed(*start)?,
                end: self.boxed(*end)?,
                body: self.body(body)?,
            },
            ElementKind::Barrier => Node::Barrier,
            ElementKind::Excerpt { source, filter } => Node::Rebase {
                index: self.boxed(*filter)?,
                body: self.boxed(*source)?,
            },
            ElementKind::Parser { template, .. } => Node::Template(template.clone()),
        };
        Ok(node)
    }
}
