// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::sync::Arc;

use anyhow::anyhow;
use cranelift_entity::PrimaryMap;
use wasmparser::collections::IndexMap;

use crate::compartment::{Compartment, Stored};
use crate::compile::CompiledModule;
use crate::indices::{FuncIndex, GlobalIndex, MemoryIndex, TableIndex, TagIndex};
use crate::{Extern, Func, Global, Memory, Table, Tag};

/// The runtime materialization of a module: owns the objects the module
/// defines and holds its exports.
///
/// An instance stays rooted in its compartment until explicitly
/// [released](Instance::release).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Instance(pub(crate) Stored<InstanceData>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InstanceState {
    /// Objects are being allocated; the instance is not yet observable.
    Allocating,
    /// The atomic publish point: the instance is registered and its exports
    /// are visible.
    Published,
    /// The start function has run.
    Started,
}

#[derive(Debug)]
pub(crate) struct InstanceData {
    pub compiled: Arc<CompiledModule>,
    pub debug_name: String,
    pub state: InstanceState,
    /// Every function of the module's index space: imported functions first,
    /// then the defined ones.
    pub functions: PrimaryMap<FuncIndex, Func>,
    pub tables: PrimaryMap<TableIndex, Table>,
    pub memories: PrimaryMap<MemoryIndex, Memory>,
    pub globals: PrimaryMap<GlobalIndex, Global>,
    pub tags: PrimaryMap<TagIndex, Tag>,
    /// Exports by name, populated at publish time.
    pub exports: IndexMap<String, Extern>,
}

// ===== impl Instance =====

impl Instance {
    /// Looks up an export by name; `None` if the instance exports no such
    /// name.
    pub fn export(&self, compartment: &Compartment, name: &str) -> Option<Extern> {
        compartment
            .lock()
            .instances
            .get(self.0)?
            .exports
            .get(name)
            .copied()
    }

    /// Attempts to get an exported [`Func`].
    pub fn func(&self, compartment: &Compartment, name: &str) -> Option<Func> {
        self.export(compartment, name)?.into_func()
    }

    /// Attempts to get an exported [`Table`].
    pub fn table(&self, compartment: &Compartment, name: &str) -> Option<Table> {
        self.export(compartment, name)?.into_table()
    }

    /// Attempts to get an exported [`Memory`].
    pub fn memory(&self, compartment: &Compartment, name: &str) -> Option<Memory> {
        self.export(compartment, name)?.into_memory()
    }

    /// Attempts to get an exported [`Global`].
    pub fn global(&self, compartment: &Compartment, name: &str) -> Option<Global> {
        self.export(compartment, name)?.into_global()
    }

    /// Attempts to get an exported [`Tag`].
    pub fn tag(&self, compartment: &Compartment, name: &str) -> Option<Tag> {
        self.export(compartment, name)?.into_tag()
    }

    /// The exports of this instance in declaration order.
    pub fn exports(&self, compartment: &Compartment) -> Vec<(String, Extern)> {
        compartment
            .lock()
            .instances
            .get(self.0)
            .map(|data| {
                data.exports
                    .iter()
                    .map(|(name, object)| (name.clone(), *object))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The debug name the instance was instantiated under.
    pub fn debug_name(&self, compartment: &Compartment) -> String {
        compartment
            .lock()
            .instances
            .get(self.0)
            .map(|data| data.debug_name.clone())
            .unwrap_or_default()
    }

    /// Drops the root that instantiation installed, allowing the next
    /// collection to reclaim the instance and everything only it reaches.
    pub fn release(&self, compartment: &Compartment) -> crate::Result<()> {
        let mut inner = compartment.lock();
        inner
            .instances
            .get_box_mut(self.0)
            .map(|boxed| boxed.rooted = false)
            .ok_or_else(|| anyhow!("instance is not a live object of this compartment"))
    }

    pub(crate) fn comes_from(&self, compartment: &Compartment) -> bool {
        compartment.lock().instances.contains(self.0)
    }
}
