//! Kernels: compile a container into a launchable program and run it.
//!
//! `setup` finalizes the container, derives the effective configuration,
//! renders source text and a `kir::Program`, and builds both on the
//! container's queue. `compute` binds every argument's *current* buffer
//! region (or host-scalar value) and enqueues one work-item per vector
//! slot. A kernel is set up once.

mod merger;
mod source;
#[cfg(test)]
mod tests;

pub use merger::KernelMerger;

use std::sync::Arc;

use crate::backend::{ArgBinding, Program, ProgramSource};
use crate::config::KernelConfiguration;
use crate::container::ExpressionContainer;
use crate::element::{ElementId, ElementKind, Graph, HostScalar, TernaryOp};
use crate::error::{Error, Result};
use crate::hardware::Queue;
use crate::kir;
use crate::memblock::MemBlock;
use crate::types::ScalarType;

pub const DEFAULT_ENTRY: &str = "kernelc_main";

const FP64_EXTENSION: &str = "cl_khr_fp64";
const INT64_ATOMICS_EXTENSION: &str = "cl_khr_int64_base_atomics";

/// A bound kernel parameter.
#[derive(Clone, Debug)]
pub enum KernelArgument {
    Buffer(Arc<MemBlock>),
    Scalar(Arc<HostScalar>),
}

impl KernelArgument {
    fn binding(&self) -> ArgBinding {
        match self {
            KernelArgument::Buffer(block) => ArgBinding::Buffer(block.region()),
            KernelArgument::Scalar(scalar) => ArgBinding::Scalar(scalar.get()),
        }
    }
}

#[derive(Debug)]
struct Built {
    queue: Queue,
    program: Arc<dyn Program>,
    arguments: Vec<KernelArgument>,
    config: KernelConfiguration,
    source: String,
    length: usize,
}

#[derive(Debug)]
pub struct Kernel {
    entry: String,
    config: KernelConfiguration,
    container: ExpressionContainer,
    built: Option<Built>,
}

impl Kernel {
    pub fn new(config: KernelConfiguration) -> Self {
        Self::from_container(ExpressionContainer::new(), config)
    }

    pub fn from_container(container: ExpressionContainer, config: KernelConfiguration) -> Self {
        Self {
            entry: DEFAULT_ENTRY.to_string(),
            config,
            container,
            built: None,
        }
    }

    /// Rename the kernel entry point.
    pub fn with_entry(mut self, entry: impl Into<String>) -> Self {
        self.entry = entry.into();
        self
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Configuration as requested, before implied extensions are added.
    pub fn config(&self) -> &KernelConfiguration {
        &self.config
    }

    pub fn container(&self) -> &ExpressionContainer {
        &self.container
    }

    pub fn length(&self) -> usize {
        self.container.length()
    }

    /// Length rounded up to whole vector slots.
    pub fn padded_length(&self) -> usize {
        self.config.padded_length(self.container.length())
    }

    pub fn is_built(&self) -> bool {
        self.built.is_some()
    }

    pub fn add_expression(&mut self, graph: &Graph, expr: ElementId) -> Result<()> {
        if self.built.is_some() {
            return Err(Error::usage("cannot add statements to a kernel after setup"));
        }
        self.container.add_expression(graph, expr)
    }

    /// Generated source text, once set up.
    pub fn source(&self) -> Option<&str> {
        self.built.as_ref().map(|b| b.source.as_str())
    }

    /// Configuration the program was built with.
    pub fn effective_config(&self) -> Option<&KernelConfiguration> {
        self.built.as_ref().map(|b| &b.config)
    }

    /// Bound parameters in parameter order, once set up.
    pub fn arguments(&self) -> &[KernelArgument] {
        match &self.built {
            Some(b) => &b.arguments,
            None => &[],
        }
    }

    pub fn queue(&self) -> Option<&Queue> {
        self.built
            .as_ref()
            .map(|b| &b.queue)
            .or_else(|| self.container.queue())
    }

    pub fn setup(&mut self, graph: &Graph) -> Result<()> {
        if self.built.is_some() {
            return Err(Error::usage("kernel is already set up"));
        }
        if self.container.is_empty() {
            return Err(Error::usage("cannot set up a kernel without statements"));
        }
        self.container.finalize(graph)?;
        let queue = self
            .container
            .queue()
            .cloned()
            .ok_or_else(|| Error::usage("kernel statements touch no device"))?;
        let length = self.container.length();
        if length == 0 {
            return Err(Error::usage("kernel iteration length is zero"));
        }
        self.config.validate()?;

        let config = self.implied_config(graph);
        let text = source::render(graph, &self.container, &config, &self.entry)?;
        let ir = kir::lower(
            graph,
            self.container.arguments(),
            self.container.declarations(),
            self.container.statements(),
        )?;
        let arguments = self
            .container
            .arguments()
            .iter()
            .map(|&id| bound_argument(graph, id))
            .collect::<Result<Vec<_>>>()?;
        check_view_widths(&arguments, config.vector_width)?;

        tracing::debug!(
            entry = %self.entry,
            queue = %queue.id(),
            length,
            width = config.vector_width,
            params = arguments.len(),
            "kernel setup"
        );
        tracing::trace!(source = %text, "kernel source");

        let program = queue.build(&ProgramSource {
            entry: self.entry.clone(),
            text: text.clone(),
            config: config.clone(),
            ir,
        })?;
        self.built = Some(Built {
            queue,
            program,
            arguments,
            config,
            source: text,
            length,
        });
        Ok(())
    }

    /// Enqueue one launch. Returns once the launch is submitted.
    pub fn compute(&self) -> Result<()> {
        let built = self
            .built
            .as_ref()
            .ok_or_else(|| Error::usage("compute called before setup"))?;
        let bindings: Vec<ArgBinding> = built.arguments.iter().map(KernelArgument::binding).collect();
        let work_items = built.config.work_items(built.length);
        tracing::trace!(entry = %self.entry, work_items, "kernel enqueue");
        built.queue.backend().enqueue(
            built.queue.id(),
            built.program.as_ref(),
            &bindings,
            work_items,
        )
    }

    /// Requested configuration plus what the statements imply.
    fn implied_config(&self, graph: &Graph) -> KernelConfiguration {
        let mut config = self.config.clone();
        let mut fp64 = false;
        let mut int64_atomics = false;
        let mut local = false;
        for &stmt in self.container.statements() {
            graph.walk(stmt, &mut |_, el| {
                fp64 |= el.scalar_type() == ScalarType::Float64;
                local |= matches!(el.kind, ElementKind::LocalArray { .. });
                let target = match &el.kind {
                    ElementKind::Binary(op, target, _) if op.is_atomic() => Some(*target),
                    ElementKind::Ternary(TernaryOp::AtomicCmpXchg, target, _, _) => Some(*target),
                    _ => None,
                };
                if let Some(target) = target {
                    int64_atomics |= graph.get(target).scalar_type() == ScalarType::Int64;
                }
            });
        }
        if fp64 {
            config.add_extension(FP64_EXTENSION);
        }
        if int64_atomics {
            config.add_extension(INT64_ATOMICS_EXTENSION);
        }
        config.uses_local_memory |= local;
        config
    }
}

/// A view binds only its own elements, so vector accesses past its last
/// element need whole vectors, or padding behind it.
fn check_view_widths(arguments: &[KernelArgument], width: u32) -> Result<()> {
    let width = width.max(1) as usize;
    for arg in arguments {
        if let KernelArgument::Buffer(block) = arg {
            if block.count() % width != 0 && !block.has_tail_padding() {
                return Err(Error::usage(format!(
                    "view of {} elements is not a multiple of vector width {} and does not end its block",
                    block.count(),
                    width
                )));
            }
        }
    }
    Ok(())
}

fn bound_argument(graph: &Graph, id: ElementId) -> Result<KernelArgument> {
    let el = graph.get(id);
    if let Some(block) = el.block() {
        return Ok(KernelArgument::Buffer(block.clone()));
    }
    if let Some(scalar) = el.host_scalar() {
        return Ok(KernelArgument::Scalar(scalar.clone()));
    }
    Err(Error::usage(format!("{} is not a kernel parameter", id)))
}
