//! Ordered statements that run under one iteration domain.
//!
//! The container accumulates a common length and device from its
//! statements and sorts the declarable leaves they reach into kernel
//! arguments and in-kernel declarations. Duplicates are tolerated while
//! statements are added and removed once, at `finalize`.

use std::collections::HashSet;

use crate::element::{ElementId, Graph, Shape};
use crate::error::{Error, Result};
use crate::hardware::Queue;

#[derive(Clone, Debug, Default)]
pub struct ExpressionContainer {
    statements: Vec<ElementId>,
    arguments: Vec<ElementId>,
    declarations: Vec<ElementId>,
    shape: Shape,
    fixed_length: bool,
    finalized: bool,
}

impl ExpressionContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Container whose length is fixed to `length` up front; statements
    /// must be size-compatible with it.
    pub fn with_length(length: usize) -> Self {
        Self {
            shape: Shape::new(length, None),
            fixed_length: true,
            ..Self::default()
        }
    }

    /// Append a statement. On error nothing changes.
    pub fn add_expression(&mut self, graph: &Graph, expr: ElementId) -> Result<()> {
        if self.finalized {
            return Err(Error::usage("container is finalized"));
        }
        let shape = self.shape.merge(graph.get(expr), "container")?;

        let mut arguments = Vec::new();
        let mut declarations = Vec::new();
        graph.classify(expr, &mut arguments, &mut declarations);

        self.shape = shape;
        self.statements.push(expr);
        self.arguments.extend(arguments);
        self.declarations.extend(declarations);
        Ok(())
    }

    /// Re-collect leaves from every statement (control bodies may have
    /// grown since they were added), re-check lengths and devices through
    /// every body and drop duplicate leaves, keeping first-encounter
    /// order. Idempotent.
    pub fn finalize(&mut self, graph: &Graph) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        let mut shape = Shape::new(self.shape.length, None);
        let mut arguments = Vec::new();
        let mut declarations = Vec::new();
        for &stmt in &self.statements {
            shape = graph.merge_statement(stmt, shape, "container")?;
            graph.classify(stmt, &mut arguments, &mut declarations);
        }
        if shape.queue.is_none() {
            shape.queue = self.shape.queue.clone();
        }

        self.arguments = dedup(graph, arguments);
        self.declarations = dedup(graph, declarations);
        self.shape = shape;
        self.finalized = true;
        tracing::trace!(
            statements = self.statements.len(),
            arguments = self.arguments.len(),
            declarations = self.declarations.len(),
            length = self.shape.length,
            "container finalized"
        );
        Ok(())
    }

    pub fn statements(&self) -> &[ElementId] {
        &self.statements
    }

    /// Kernel parameters, in parameter order once finalized.
    pub fn arguments(&self) -> &[ElementId] {
        &self.arguments
    }

    pub fn declarations(&self) -> &[ElementId] {
        &self.declarations
    }

    pub fn length(&self) -> usize {
        self.shape.length
    }

    pub fn queue(&self) -> Option<&Queue> {
        self.shape.queue.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn has_fixed_length(&self) -> bool {
        self.fixed_length
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }
}

fn dedup(graph: &Graph, ids: Vec<ElementId>) -> Vec<ElementId> {
    let mut seen = HashSet::new();
    ids.into_iter()
        .filter(|&id| match graph.leaf_key(id) {
            Some(key) => seen.insert(key),
            None => true,
        })
        .collect()
}
