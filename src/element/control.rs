//! Control structures and textual rewrite nodes.
//!
//! `If` and `Loop` own statement bodies that are appended after the node
//! is created. A node whose bodies are still empty takes part in graph
//! wiring but emits no text. Body statements run under the kernel's
//! iteration domain: each one must be size- and device-compatible with
//! the node, and the node takes on the merged length and device.
//!
//! `Excerpt` and `Parser` are late textual rewrites over emitted text.
//! They are not modeled as indirection in the graph. An excerpt has its
//! filter's length, which is how a body may run over another domain.

use super::{ElementId, ElementKind, Graph, Shape};
use crate::error::{Error, Result};
use crate::types::ScalarType;

impl Graph {
    /// `if (cond) { ... } else { ... }` with empty bodies.
    pub fn if_then(&mut self, cond: ElementId) -> Result<ElementId> {
        let shape = self.shape_of(&[cond], "if")?;
        Ok(self.push(
            ElementKind::If {
                cond,
                then_body: Vec::new(),
                else_body: Vec::new(),
            },
            ScalarType::Int32,
            shape,
            false,
        ))
    }

    /// `for (counter = start; counter < end; ++counter) { ... }`.
    /// Returns the loop node and its counter.
    pub fn for_range(&mut self, start: ElementId, end: ElementId) -> Result<(ElementId, ElementId)> {
        let shape = self.shape_of(&[start, end], "loop")?;
        let counter = self.loop_counter();
        let id = self.push(
            ElementKind::Loop {
                counter,
                start,
                end,
                body: Vec::new(),
            },
            ScalarType::Int32,
            shape,
            false,
        );
        Ok((id, counter))
    }

    /// Append to the then-branch of an `If`, or the body of a `Loop`.
    pub fn push_body(&mut self, ctrl: ElementId, stmt: ElementId) -> Result<()> {
        self.attach(ctrl, stmt)?;
        match self.kind_mut(ctrl) {
            ElementKind::If { then_body, .. } => then_body.push(stmt),
            ElementKind::Loop { body, .. } => body.push(stmt),
            _ => unreachable!("attach accepts only control nodes"),
        }
        Ok(())
    }

    /// Append to the else-branch of an `If`.
    pub fn push_else(&mut self, ctrl: ElementId, stmt: ElementId) -> Result<()> {
        if !matches!(self.kind(ctrl), ElementKind::If { .. }) {
            return Err(Error::usage(format!("{} has no else branch", ctrl)));
        }
        self.attach(ctrl, stmt)?;
        if let ElementKind::If { else_body, .. } = self.kind_mut(ctrl) {
            else_body.push(stmt);
        }
        Ok(())
    }

    fn attach(&mut self, ctrl: ElementId, stmt: ElementId) -> Result<()> {
        if !self.get(ctrl).is_control() {
            return Err(Error::usage(format!("{} is not a control structure", ctrl)));
        }
        if self.reaches(stmt, ctrl) {
            return Err(Error::forbidden(format!(
                "{} cannot be nested inside itself",
                ctrl
            )));
        }
        let ctrl_el = self.get(ctrl);
        let shape = Shape::new(ctrl_el.length(), ctrl_el.queue().cloned());
        let merged = shape.merge(self.get(stmt), "control body")?;
        self.set_shape(ctrl, merged);
        Ok(())
    }

    /// Merge `stmt` and every statement reachable through its control
    /// bodies into `shape`. Excerpts are not entered.
    ///
    /// Bodies may grow after their node was merged anywhere, so callers
    /// holding statements re-run this before compiling them.
    pub(crate) fn merge_statement(
        &self,
        stmt: ElementId,
        shape: Shape,
        context: &'static str,
    ) -> Result<Shape> {
        let mut shape = shape.merge(self.get(stmt), context)?;
        let bodies: Vec<ElementId> = match self.kind(stmt) {
            ElementKind::If {
                then_body,
                else_body,
                ..
            } => then_body.iter().chain(else_body).copied().collect(),
            ElementKind::Loop { body, .. } => body.clone(),
            _ => return Ok(shape),
        };
        for body_stmt in bodies {
            shape = self.merge_statement(body_stmt, shape, context)?;
        }
        Ok(shape)
    }

    fn reaches(&self, from: ElementId, target: ElementId) -> bool {
        let mut found = false;
        self.walk(from, &mut |id, _| found |= id == target);
        found
    }

    /// `source` with every index token replaced by `filter`'s text.
    ///
    /// Used for gathers (`a[f(index)]`) and to re-base merged kernels. The
    /// result has the filter's length.
    pub fn excerpt(&mut self, source: ElementId, filter: ElementId) -> Result<ElementId> {
        let src = self.get(source);
        let filter_el = self.get(filter);
        let shape = Shape::new(filter_el.length(), filter_el.queue().cloned())
            .merge_device(src, "excerpt")?;
        let scalar = src.scalar_type();
        let writable = src.writable();
        Ok(self.push(
            ElementKind::Excerpt { source, filter },
            scalar,
            shape,
            writable,
        ))
    }

    /// Free-form statement: every placeholder in `template` is replaced by
    /// the emitted text of its bound element.
    pub fn parser(&mut self, template: &str, bindings: &[(ElementId, &str)]) -> Result<ElementId> {
        let ids: Vec<ElementId> = bindings.iter().map(|(id, _)| *id).collect();
        let shape = self.shape_of(&ids, "parser")?;
        for (_, name) in bindings {
            if name.is_empty() {
                return Err(Error::usage("parser placeholder names must be non-empty"));
            }
        }
        let scalar = ids
            .first()
            .map(|&id| self.get(id).scalar_type())
            .unwrap_or(ScalarType::Int32);
        Ok(self.push(
            ElementKind::Parser {
                template: template.to_string(),
                bindings: bindings
                    .iter()
                    .map(|(id, name)| (*id, name.to_string()))
                    .collect(),
            },
            scalar,
            shape,
            false,
        ))
    }

    /// Work-group barrier over local memory.
    pub fn barrier(&mut self) -> ElementId {
        self.push(ElementKind::Barrier, ScalarType::Int32, Shape::default(), false)
    }
}
