//! Kernel fusion.
//!
//! Children are laid end to end over one iteration domain. `offsets[i]` is
//! the cumulative padded length of children `0..=i`; the dispatcher is a
//! tree of `if (index < bound)` statements over those offsets (in
//! work-item units), whose leaves hold each child's statements as excerpts
//! with the index re-based to the child's own origin. Excerpts take their
//! filter's length, so children of different lengths share one domain.

use super::Kernel;
use crate::config::KernelConfiguration;
use crate::container::ExpressionContainer;
use crate::element::{ElementId, Graph};
use crate::error::{Error, Result};

pub const MERGED_ENTRY: &str = "kernelc_merged";

#[derive(Debug, Default)]
pub struct KernelMerger {
    kernels: Vec<Kernel>,
    config: Option<KernelConfiguration>,
    offsets: Vec<usize>,
    merged: Option<Kernel>,
}

/// Per-setup state of the dispatcher build.
struct Dispatch<'a> {
    statements: Vec<&'a [ElementId]>,
    /// Cumulative offsets in work-item units.
    bounds: Vec<i32>,
    index: ElementId,
    /// Re-based index per child; the bare index for child 0.
    filters: Vec<ElementId>,
}

impl KernelMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile the merged kernel with `config` instead of the first
    /// child's configuration.
    pub fn with_config(config: KernelConfiguration) -> Self {
        Self {
            config: Some(config),
            ..Self::default()
        }
    }

    pub fn add_kernel(&mut self, kernel: Kernel) -> Result<()> {
        if self.is_built() {
            return Err(Error::usage("cannot add kernels to a merger after setup"));
        }
        self.kernels.push(kernel);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }

    /// Cumulative padded child lengths; empty before setup.
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    pub fn total_length(&self) -> usize {
        self.offsets.last().copied().unwrap_or(0)
    }

    /// The kernel `compute` launches, once set up.
    pub fn kernel(&self) -> Option<&Kernel> {
        match (&self.merged, self.kernels.as_slice()) {
            (Some(merged), _) => Some(merged),
            (None, [only]) if only.is_built() => Some(only),
            _ => None,
        }
    }

    pub fn is_built(&self) -> bool {
        self.kernel().is_some()
    }

    pub fn setup(&mut self, graph: &mut Graph) -> Result<()> {
        if self.is_built() {
            return Err(Error::usage("merger is already set up"));
        }
        if let Some(i) = self.kernels.iter().position(|k| k.container().is_empty()) {
            return Err(Error::usage(format!("merged kernel {} has no statements", i)));
        }
        let offsets: Vec<usize> = self
            .kernels
            .iter()
            .scan(0, |total, k| {
                *total += k.padded_length();
                Some(*total)
            })
            .collect();

        match self.kernels.as_mut_slice() {
            [] => return Err(Error::usage("no kernels to merge")),
            [only] => {
                only.setup(graph)?;
                self.offsets = offsets;
                return Ok(());
            }
            _ => {}
        }

        let config = match &self.config {
            Some(config) => config.clone(),
            None => self.kernels[0].config().clone(),
        };
        let width = config.vector_width.max(1) as usize;
        let bounds = offsets
            .iter()
            .map(|&offset| {
                if offset % width != 0 {
                    return Err(Error::usage(format!(
                        "merged offset {} is not a multiple of vector width {}",
                        offset, width
                    )));
                }
                i32::try_from(offset / width)
                    .map_err(|_| Error::usage(format!("merged offset {} overflows int", offset)))
            })
            .collect::<Result<Vec<_>>>()?;
        let total = offsets.last().copied().unwrap_or(0);

        tracing::debug!(
            children = self.kernels.len(),
            ?offsets,
            total,
            width,
            "merging kernels"
        );

        let index = graph.index();
        let mut filters = vec![index];
        for &bound in &bounds[..bounds.len() - 1] {
            let origin = graph.constant(bound);
            filters.push(graph.sub(index, origin)?);
        }
        let dispatch = Dispatch {
            statements: self
                .kernels
                .iter()
                .map(|k| k.container().statements())
                .collect(),
            bounds,
            index,
            filters,
        };
        let root = dispatch.build(graph, 0, self.kernels.len() - 1)?;

        let mut container = ExpressionContainer::with_length(total);
        container.add_expression(graph, root)?;
        let mut merged = Kernel::from_container(container, config).with_entry(MERGED_ENTRY);
        merged.setup(graph)?;

        self.offsets = offsets;
        self.merged = Some(merged);
        Ok(())
    }

    /// Launch the merged kernel once.
    pub fn compute(&self) -> Result<()> {
        self.kernel()
            .ok_or_else(|| Error::usage("compute called before merger setup"))?
            .compute()
    }
}

impl Dispatch<'_> {
    /// Conditional covering children `first..=last`; needs two or more.
    fn build(&self, graph: &mut Graph, first: usize, last: usize) -> Result<ElementId> {
        let split = if last - first <= 2 {
            first
        } else {
            first + (last - first) / 2
        };
        let bound = graph.constant(self.bounds[split]);
        let cond = graph.less(self.index, bound)?;
        let branch = graph.if_then(cond)?;
        for stmt in self.arm(graph, first, split)? {
            graph.push_body(branch, stmt)?;
        }
        for stmt in self.arm(graph, split + 1, last)? {
            graph.push_else(branch, stmt)?;
        }
        Ok(branch)
    }

    /// Statements of one branch: a single child re-based, or a nested
    /// conditional.
    fn arm(&self, graph: &mut Graph, first: usize, last: usize) -> Result<Vec<ElementId>> {
        if first < last {
            return Ok(vec![self.build(graph, first, last)?]);
        }
        let filter = self.filters[first];
        self.statements[first]
            .iter()
            .map(|&stmt| graph.excerpt(stmt, filter))
            .collect()
    }
}
