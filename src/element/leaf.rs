//! Leaf constructors.

use std::sync::Arc;

use parking_lot::Mutex;

use super::{ElementId, ElementKind, Graph, Shape};
use crate::error::{Error, Result};
use crate::memblock::MemBlock;
use crate::types::{ScalarType, Value};

/// A host-side scalar bound into kernels by reference.
///
/// The value is read when a kernel is launched, so updating it between
/// launches changes what the next `compute()` sees without rebuilding.
#[derive(Debug)]
pub struct HostScalar {
    scalar: ScalarType,
    value: Mutex<Value>,
}

impl HostScalar {
    pub fn new(value: impl Into<Value>) -> Arc<Self> {
        let value = value.into();
        Arc::new(Self {
            scalar: value.scalar_type(),
            value: Mutex::new(value),
        })
    }

    pub fn scalar_type(&self) -> ScalarType {
        self.scalar
    }

    pub fn get(&self) -> Value {
        *self.value.lock()
    }

    /// Store `value`, converted to this scalar's type.
    pub fn set(&self, value: impl Into<Value>) {
        *self.value.lock() = value.into().cast(self.scalar);
    }
}

impl Graph {
    pub fn constant(&mut self, value: impl Into<Value>) -> ElementId {
        let value = value.into();
        self.push(
            ElementKind::Constant(value),
            value.scalar_type(),
            Shape::default(),
            false,
        )
    }

    /// The global work-item index (one per vector slot when vectorized).
    pub fn index(&mut self) -> ElementId {
        self.push(ElementKind::Index, ScalarType::Int32, Shape::default(), false)
    }

    /// Per-element index: `index * width + lane` under vectorization.
    pub fn extended_index(&mut self) -> ElementId {
        self.push(
            ElementKind::ExtendedIndex,
            ScalarType::Int32,
            Shape::default(),
            false,
        )
    }

    pub fn group_id(&mut self) -> ElementId {
        self.push(ElementKind::GroupId, ScalarType::Int32, Shape::default(), false)
    }

    pub fn host_scalar(&mut self, scalar: &Arc<HostScalar>) -> ElementId {
        self.push(
            ElementKind::HostScalar(scalar.clone()),
            scalar.scalar_type(),
            Shape::default(),
            false,
        )
    }

    /// A device buffer. Views (see [`MemBlock::subvector`]) become
    /// sub-range leaves.
    pub fn global(&mut self, block: &Arc<MemBlock>) -> ElementId {
        let shape = Shape::new(block.count(), Some(block.queue().clone()));
        let kind = if block.is_view() {
            ElementKind::SubRange(block.clone())
        } else {
            ElementKind::Global(block.clone())
        };
        self.push(kind, block.scalar_type(), shape, true)
    }

    /// A `count`-element view of `parent` starting at element `offset`.
    pub fn subrange(
        &mut self,
        parent: &Arc<MemBlock>,
        offset: usize,
        count: usize,
    ) -> Result<ElementId> {
        let view = MemBlock::subvector(parent, offset, count)?;
        Ok(self.global(&view))
    }

    /// Group-local array of `capacity` elements, shared by a work-group.
    ///
    /// Accesses are indexed by the work-item's position inside its group
    /// (`get_local_id`), so every group sees the same slots. A group of
    /// `g` items at vector width `w` touches slots `0..g * w`.
    pub fn local_array(&mut self, scalar: ScalarType, capacity: usize) -> Result<ElementId> {
        if capacity == 0 {
            return Err(Error::forbidden("local array with zero capacity"));
        }
        Ok(self.push(
            ElementKind::LocalArray { capacity },
            scalar,
            Shape::default(),
            true,
        ))
    }

    /// Per-work-item array. Only legal in non-vectorized kernels.
    pub fn private_array(&mut self, scalar: ScalarType, capacity: usize) -> Result<ElementId> {
        if capacity == 0 {
            return Err(Error::forbidden("private array with zero capacity"));
        }
        Ok(self.push(
            ElementKind::PrivateArray { capacity },
            scalar,
            Shape::default(),
            true,
        ))
    }

    /// Per-work-item variable, zero-initialized.
    pub fn private_variable(&mut self, scalar: ScalarType) -> ElementId {
        self.push(
            ElementKind::PrivateVariable { init: None },
            scalar,
            Shape::default(),
            true,
        )
    }

    /// Per-work-item variable initialized to `init`.
    pub fn variable(&mut self, init: impl Into<Value>) -> ElementId {
        let init = init.into();
        self.push(
            ElementKind::PrivateVariable { init: Some(init) },
            init.scalar_type(),
            Shape::default(),
            true,
        )
    }

    pub(crate) fn loop_counter(&mut self) -> ElementId {
        self.push(
            ElementKind::LoopCounter,
            ScalarType::Int32,
            Shape::default(),
            false,
        )
    }
}
