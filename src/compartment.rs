// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The unit of object identity and sharing.
//!
//! Every runtime object (instance, function, table, memory, global, tag)
//! belongs to exactly one [`Compartment`]. Objects of one compartment never
//! appear as imports or table elements of another; compartments are
//! independently collectable.
//!
//! A single mutex serializes linking, instantiation, object mutation, and
//! collection within a compartment.

mod stored;

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

pub(crate) use stored::{SlotMap, Stored};

use anyhow::{bail, ensure};

use crate::func::FuncData;
use crate::global::GlobalData;
use crate::instance::InstanceData;
use crate::memory::MemoryData;
use crate::table::TableData;
use crate::tag::TagData;
use crate::types::{GlobalType, MemoryType, TableType, TagType};
use crate::values::Val;
use crate::{Extern, Global, Memory, Table, Tag};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub(crate) struct CompartmentId(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompartmentState {
    Active,
    Collecting,
}

/// An isolation unit owning a set of runtime objects.
#[derive(Clone)]
pub struct Compartment(Arc<CompartmentShared>);

struct CompartmentShared {
    id: CompartmentId,
    inner: Mutex<CompartmentInner>,
}

pub(crate) struct CompartmentInner {
    pub(crate) state: CompartmentState,
    /// The number of guest calls currently on some host thread's stack.
    /// Collection is refused while this is non-zero.
    pub(crate) active_guest_calls: usize,
    pub(crate) funcs: SlotMap<FuncData>,
    pub(crate) tables: SlotMap<TableData>,
    pub(crate) memories: SlotMap<MemoryData>,
    pub(crate) globals: SlotMap<GlobalData>,
    pub(crate) tags: SlotMap<TagData>,
    pub(crate) instances: SlotMap<InstanceData>,
}

// ===== impl Compartment =====

impl Default for Compartment {
    fn default() -> Self {
        Self::new()
    }
}

impl Compartment {
    pub fn new() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(0);
        let id = CompartmentId(NEXT_ID.fetch_add(1, Ordering::Relaxed));

        Self(Arc::new(CompartmentShared {
            id,
            inner: Mutex::new(CompartmentInner {
                state: CompartmentState::Active,
                active_guest_calls: 0,
                funcs: SlotMap::new(id),
                tables: SlotMap::new(id),
                memories: SlotMap::new(id),
                globals: SlotMap::new(id),
                tags: SlotMap::new(id),
                instances: SlotMap::new(id),
            }),
        }))
    }

    /// Two handles denote the same compartment iff they share identity.
    pub fn same(lhs: &Compartment, rhs: &Compartment) -> bool {
        Arc::ptr_eq(&lhs.0, &rhs.0)
    }

    pub(crate) fn id(&self) -> CompartmentId {
        self.0.id
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, CompartmentInner> {
        self.0.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Creates a memory owned by this compartment, zero-initialized at its
    /// minimum size. The new memory is rooted until released.
    pub fn create_memory(&self, ty: MemoryType) -> crate::Result<Memory> {
        let data = MemoryData::new(ty)?;
        let mut inner = self.lock();
        inner.ensure_active()?;
        Ok(Memory(inner.memories.alloc(data, true)))
    }

    /// Creates a table owned by this compartment, null-initialized at its
    /// minimum length. The new table is rooted until released.
    pub fn create_table(&self, ty: TableType) -> crate::Result<Table> {
        let data = TableData::new(ty)?;
        let mut inner = self.lock();
        inner.ensure_active()?;
        Ok(Table(inner.tables.alloc(data, true)))
    }

    /// Creates a global owned by this compartment holding `value`. The new
    /// global is rooted until released.
    pub fn create_global(&self, ty: GlobalType, value: Val) -> crate::Result<Global> {
        ensure!(
            value.matches(ty.content),
            "initial value of type {} does not match global type `{ty}`",
            value.ty(),
        );
        match value {
            Val::FuncRef(f) => crate::table::ensure_same_compartment(self, &crate::Ref::Func(f))?,
            Val::AnyRef(r) => crate::table::ensure_same_compartment(self, &crate::Ref::Any(r))?,
            _ => {}
        }
        let mut inner = self.lock();
        inner.ensure_active()?;
        Ok(Global(inner.globals.alloc(GlobalData::new(ty, value), true)))
    }

    /// Creates a fresh exception tag. Tags compare by identity: two tags
    /// never compare equal unless they are the same tag.
    pub fn create_tag(&self, ty: TagType) -> crate::Result<Tag> {
        let mut inner = self.lock();
        inner.ensure_active()?;
        Ok(Tag(inner.tags.alloc(TagData::new(ty), true)))
    }

    /// Drops the root the host holds on `object`, allowing the next
    /// collection to reclaim it if nothing else reaches it.
    pub fn release(&self, object: Extern) -> crate::Result<()> {
        let mut inner = self.lock();
        let unrooted = match object {
            Extern::Func(f) => inner.funcs.get_box_mut(f.0).map(|b| b.rooted = false),
            Extern::Table(t) => inner.tables.get_box_mut(t.0).map(|b| b.rooted = false),
            Extern::Memory(m) => inner.memories.get_box_mut(m.0).map(|b| b.rooted = false),
            Extern::Global(g) => inner.globals.get_box_mut(g.0).map(|b| b.rooted = false),
            Extern::Tag(t) => inner.tags.get_box_mut(t.0).map(|b| b.rooted = false),
        };
        if unrooted.is_none() {
            bail!("released object does not belong to this compartment");
        }
        Ok(())
    }

    /// The number of live runtime objects in this compartment.
    pub fn live_object_count(&self) -> usize {
        self.lock().live_object_count()
    }

    pub(crate) fn begin_guest_call(&self) {
        self.lock().active_guest_calls += 1;
    }

    pub(crate) fn end_guest_call(&self) {
        let mut inner = self.lock();
        debug_assert!(inner.active_guest_calls > 0);
        inner.active_guest_calls -= 1;
    }
}

impl fmt::Debug for Compartment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compartment")
            .field("id", &self.0.id.0)
            .finish_non_exhaustive()
    }
}

// ===== impl CompartmentInner =====

impl CompartmentInner {
    /// Object creation is rejected while a collection is in progress.
    pub(crate) fn ensure_active(&self) -> crate::Result<()> {
        ensure!(
            self.state == CompartmentState::Active,
            "compartment is collecting garbage"
        );
        Ok(())
    }

    /// The concrete type of `object`, or `None` if it is not a live object
    /// of this compartment.
    pub(crate) fn extern_type(&self, object: Extern) -> Option<crate::ExternType> {
        use crate::ExternType;
        match object {
            Extern::Func(f) => self.funcs.get(f.0).map(|data| ExternType::Func(data.ty)),
            Extern::Table(t) => self.tables.get(t.0).map(|data| ExternType::Table(data.ty())),
            Extern::Memory(m) => self.memories.get(m.0).map(|data| ExternType::Memory(data.ty())),
            Extern::Global(g) => self.globals.get(g.0).map(|data| ExternType::Global(data.ty())),
            Extern::Tag(t) => self.tags.get(t.0).map(|data| ExternType::Tag(data.ty())),
        }
    }

    pub(crate) fn live_object_count(&self) -> usize {
        self.funcs.len()
            + self.tables.len()
            + self.memories.len()
            + self.globals.len()
            + self.tags.len()
            + self.instances.len()
    }

    /// A snapshot of every live slot, for comparing compartment states.
    #[cfg(test)]
    pub(crate) fn census(&self) -> Vec<(char, u32, u32)> {
        let mut out = Vec::new();
        out.extend(self.funcs.iter().map(|(s, _)| ('f', s.index, s.generation)));
        out.extend(self.tables.iter().map(|(s, _)| ('t', s.index, s.generation)));
        out.extend(
            self.memories
                .iter()
                .map(|(s, _)| ('m', s.index, s.generation)),
        );
        out.extend(
            self.globals
                .iter()
                .map(|(s, _)| ('g', s.index, s.generation)),
        );
        out.extend(self.tags.iter().map(|(s, _)| ('e', s.index, s.generation)));
        out.extend(
            self.instances
                .iter()
                .map(|(s, _)| ('i', s.index, s.generation)),
        );
        out
    }
}
