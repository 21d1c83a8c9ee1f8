// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use anyhow::{anyhow, ensure};

use crate::compartment::{Compartment, Stored};
use crate::trap::{CallStack, Exception, Trap};
use crate::types::TableType;
use crate::values::Ref;
use crate::Extern;

/// A WebAssembly table: a vector of reference values of a single element
/// type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Table(pub(crate) Stored<TableData>);

#[derive(Debug)]
pub(crate) struct TableData {
    ty: TableType,
    elements: Vec<Ref>,
}

// ===== impl TableData =====

impl TableData {
    pub(crate) fn new(ty: TableType) -> crate::Result<Self> {
        ensure!(
            ty.element_type.is_reference(),
            "invalid table type `{ty}`: element type must be a reference type"
        );
        ensure!(
            ty.size.min <= ty.size.max,
            "invalid table type `{ty}`: min exceeds max"
        );
        ensure!(
            ty.size.min <= u64::from(u32::MAX),
            "invalid table type `{ty}`: min exceeds the index space"
        );

        let len = usize::try_from(ty.size.min)?;
        let mut elements = Vec::new();
        elements
            .try_reserve_exact(len)
            .map_err(|_| anyhow!("out of memory allocating {len} element table"))?;
        elements.resize(len, Ref::null(ty.element_type));

        Ok(Self { ty, elements })
    }

    pub(crate) fn ty(&self) -> TableType {
        self.ty
    }

    /// The current length in elements. Always within the type's constraints.
    pub(crate) fn size(&self) -> u64 {
        self.elements.len() as u64
    }

    pub(crate) fn get(&self, index: u64) -> Result<Ref, Trap> {
        usize::try_from(index)
            .ok()
            .and_then(|index| self.elements.get(index))
            .copied()
            .ok_or(Trap::TableOutOfBounds)
    }

    /// Stores `value` at `index`. Bounds are trap-checked; the value's type
    /// must already have been checked against the element type.
    pub(crate) fn set(&mut self, index: u64, value: Ref) -> Result<(), Trap> {
        debug_assert!(value.matches(self.ty.element_type));
        let slot = usize::try_from(index)
            .ok()
            .and_then(|index| self.elements.get_mut(index))
            .ok_or(Trap::TableOutOfBounds)?;
        *slot = value;
        Ok(())
    }

    /// Fills `[dst, dst+len)` with `value`, trapping without partial writes
    /// if the range is out of bounds.
    pub(crate) fn fill(&mut self, dst: u64, value: Ref, len: u64) -> Result<(), Trap> {
        let start = usize::try_from(dst).map_err(|_| Trap::TableOutOfBounds)?;
        let len = usize::try_from(len).map_err(|_| Trap::TableOutOfBounds)?;
        let end = start.checked_add(len).ok_or(Trap::TableOutOfBounds)?;
        let slots = self
            .elements
            .get_mut(start..end)
            .ok_or(Trap::TableOutOfBounds)?;
        slots.fill(value);
        Ok(())
    }

    /// Grows the table by `delta` elements initialized to `init`, returning
    /// the previous length, or `None` if growth would exceed the type's
    /// maximum. Shrinking is not possible.
    pub(crate) fn grow(&mut self, delta: u64, init: Ref) -> Option<u64> {
        let old_len = self.size();
        let new_len = old_len.checked_add(delta)?;
        if new_len > self.ty.size.max || new_len > u64::from(u32::MAX) {
            return None;
        }

        let new_len = usize::try_from(new_len).ok()?;
        self.elements
            .try_reserve_exact(new_len - self.elements.len())
            .ok()?;
        self.elements.resize(new_len, init);
        Some(old_len)
    }
}

// ===== impl Table =====

impl Table {
    /// The table's type.
    ///
    /// # Panics
    ///
    /// Panics if the handle does not denote a live table of `compartment`.
    pub fn ty(&self, compartment: &Compartment) -> TableType {
        compartment
            .lock()
            .tables
            .get(self.0)
            .expect("table is not a live object of this compartment")
            .ty()
    }

    /// The current length in elements.
    pub fn size(&self, compartment: &Compartment) -> u64 {
        compartment
            .lock()
            .tables
            .get(self.0)
            .expect("table is not a live object of this compartment")
            .size()
    }

    /// Loads the element at `index`, trapping when out of bounds.
    pub fn get(&self, compartment: &Compartment, index: u64) -> crate::Result<Ref> {
        let inner = compartment.lock();
        let data = inner
            .tables
            .get(self.0)
            .ok_or_else(|| anyhow!("table is not a live object of this compartment"))?;
        data.get(index)
            .map_err(|trap| Exception::from_trap(trap, CallStack::default()).into_error())
    }

    /// Stores `value` at `index`.
    ///
    /// The value's type is checked against the table's element type: a table
    /// of `anyfunc` rejects references that are not functions. The value must
    /// belong to the same compartment as the table.
    pub fn set(&self, compartment: &Compartment, index: u64, value: Ref) -> crate::Result<()> {
        ensure_same_compartment(compartment, &value)?;
        let mut inner = compartment.lock();
        let data = inner
            .tables
            .get_mut(self.0)
            .ok_or_else(|| anyhow!("table is not a live object of this compartment"))?;
        ensure!(
            value.matches(data.ty().element_type),
            "value of type {} does not match table element type {}",
            value.ty(),
            data.ty().element_type,
        );
        data.set(index, value)
            .map_err(|trap| Exception::from_trap(trap, CallStack::default()).into_error())
    }

    /// Grows the table by `delta` null-initialized elements, returning the
    /// previous length.
    pub fn grow(&self, compartment: &Compartment, delta: u64) -> crate::Result<u64> {
        let mut inner = compartment.lock();
        let data = inner
            .tables
            .get_mut(self.0)
            .ok_or_else(|| anyhow!("table is not a live object of this compartment"))?;
        let init = Ref::null(data.ty().element_type);
        data.grow(delta, init).ok_or_else(|| {
            anyhow!("table growth by {delta} elements exceeds limit `{}`", data.ty())
        })
    }

    pub(crate) fn comes_from(&self, compartment: &Compartment) -> bool {
        compartment.lock().tables.contains(self.0)
    }
}

pub(crate) fn ensure_same_compartment(compartment: &Compartment, value: &Ref) -> crate::Result<()> {
    let id = match value {
        Ref::Func(Some(f)) => Some(f.0.compartment),
        Ref::Any(Some(object)) => Some(match object {
            Extern::Func(f) => f.0.compartment,
            Extern::Table(t) => t.0.compartment,
            Extern::Memory(m) => m.0.compartment,
            Extern::Global(g) => g.0.compartment,
            Extern::Tag(t) => t.0.compartment,
        }),
        Ref::Func(None) | Ref::Any(None) => None,
    };
    if let Some(id) = id {
        ensure!(
            id == compartment.id(),
            "reference belongs to a different compartment"
        );
    }
    Ok(())
}
