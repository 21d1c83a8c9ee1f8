// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The compartment-scoped tracing collector.
//!
//! Runtime objects form cycles (a table holds a function whose instance owns
//! the table), so reclamation is mark and sweep rather than reference
//! counting. Roots are the objects the host still holds (created objects and
//! published instances until released). Collection happens stop-the-world
//! under the compartment mutex and is refused while guest code is on some
//! thread's stack.

use anyhow::ensure;

use crate::compartment::{Compartment, CompartmentInner, CompartmentState, SlotMap};
use crate::func::FuncKind;
use crate::instance::Instance;
use crate::values::{Ref, Val};
use crate::{Extern, Func, Global, Memory, Table, Tag};

#[derive(Clone, Copy)]
enum Traced {
    Func(Func),
    Table(Table),
    Memory(Memory),
    Global(Global),
    Tag(Tag),
    Instance(Instance),
}

impl From<Extern> for Traced {
    fn from(object: Extern) -> Self {
        match object {
            Extern::Func(f) => Traced::Func(f),
            Extern::Table(t) => Traced::Table(t),
            Extern::Memory(m) => Traced::Memory(m),
            Extern::Global(g) => Traced::Global(g),
            Extern::Tag(t) => Traced::Tag(t),
        }
    }
}

// ===== impl Compartment =====

impl Compartment {
    /// Collects every object of this compartment that is unreachable from a
    /// root, returning how many objects were released.
    ///
    /// Collection is safe only when no guest code is on the stack in this
    /// compartment; calling it during a guest call is an error.
    pub fn collect_garbage(&self) -> crate::Result<usize> {
        let mut inner = self.lock();
        ensure!(
            inner.active_guest_calls == 0,
            "cannot collect garbage while guest code is on the stack"
        );
        inner.state = CompartmentState::Collecting;

        // Mark phase: everything reachable from a rooted object.
        let mut worklist: Vec<Traced> = Vec::new();
        inner.push_roots(&mut worklist);
        while let Some(object) = worklist.pop() {
            if inner.mark(object) {
                inner.push_edges(object, &mut worklist);
            }
        }

        // Sweep phase: release everything unmarked, reset the mark bits.
        let freed = sweep(&mut inner.funcs)
            + sweep(&mut inner.tables)
            + sweep(&mut inner.memories)
            + sweep(&mut inner.globals)
            + sweep(&mut inner.tags)
            + sweep(&mut inner.instances);

        inner.state = CompartmentState::Active;
        tracing::debug!("collected {freed} unreachable objects");
        Ok(freed)
    }
}

fn sweep<T>(map: &mut SlotMap<T>) -> usize {
    let mut dead = Vec::new();
    for (stored, boxed) in map.iter_mut() {
        if boxed.marked {
            boxed.marked = false;
        } else {
            dead.push(stored);
        }
    }
    let freed = dead.len();
    for stored in dead {
        map.free(stored);
    }
    freed
}

// ===== impl CompartmentInner =====

impl CompartmentInner {
    fn push_roots(&self, worklist: &mut Vec<Traced>) {
        worklist.extend(
            self.funcs
                .iter()
                .filter(|(_, b)| b.rooted)
                .map(|(s, _)| Traced::Func(Func(s))),
        );
        worklist.extend(
            self.tables
                .iter()
                .filter(|(_, b)| b.rooted)
                .map(|(s, _)| Traced::Table(Table(s))),
        );
        worklist.extend(
            self.memories
                .iter()
                .filter(|(_, b)| b.rooted)
                .map(|(s, _)| Traced::Memory(Memory(s))),
        );
        worklist.extend(
            self.globals
                .iter()
                .filter(|(_, b)| b.rooted)
                .map(|(s, _)| Traced::Global(Global(s))),
        );
        worklist.extend(
            self.tags
                .iter()
                .filter(|(_, b)| b.rooted)
                .map(|(s, _)| Traced::Tag(Tag(s))),
        );
        worklist.extend(
            self.instances
                .iter()
                .filter(|(_, b)| b.rooted)
                .map(|(s, _)| Traced::Instance(Instance(s))),
        );
    }

    /// Sets the mark bit, returning whether the object was newly marked.
    fn mark(&mut self, object: Traced) -> bool {
        let marked = match object {
            Traced::Func(f) => self.funcs.get_box_mut(f.0).map(|b| &mut b.marked),
            Traced::Table(t) => self.tables.get_box_mut(t.0).map(|b| &mut b.marked),
            Traced::Memory(m) => self.memories.get_box_mut(m.0).map(|b| &mut b.marked),
            Traced::Global(g) => self.globals.get_box_mut(g.0).map(|b| &mut b.marked),
            Traced::Tag(t) => self.tags.get_box_mut(t.0).map(|b| &mut b.marked),
            Traced::Instance(i) => self.instances.get_box_mut(i.0).map(|b| &mut b.marked),
        };
        match marked {
            Some(marked) if !*marked => {
                *marked = true;
                true
            }
            _ => false,
        }
    }

    fn push_edges(&self, object: Traced, worklist: &mut Vec<Traced>) {
        match object {
            Traced::Func(f) => {
                if let Some(data) = self.funcs.get(f.0) {
                    if let FuncKind::Wasm { instance, .. } = data.kind {
                        worklist.push(Traced::Instance(instance));
                    }
                }
            }
            Traced::Table(t) => {
                if let Some(data) = self.tables.get(t.0) {
                    for index in 0..data.size() {
                        if let Ok(element) = data.get(index) {
                            push_ref(element, worklist);
                        }
                    }
                }
            }
            Traced::Global(g) => {
                if let Some(data) = self.globals.get(g.0) {
                    push_val(data.get(), worklist);
                }
            }
            Traced::Memory(_) | Traced::Tag(_) => {}
            Traced::Instance(i) => {
                if let Some(data) = self.instances.get(i.0) {
                    worklist.extend(data.functions.values().map(|f| Traced::Func(*f)));
                    worklist.extend(data.tables.values().map(|t| Traced::Table(*t)));
                    worklist.extend(data.memories.values().map(|m| Traced::Memory(*m)));
                    worklist.extend(data.globals.values().map(|g| Traced::Global(*g)));
                    worklist.extend(data.tags.values().map(|t| Traced::Tag(*t)));
                    worklist.extend(data.exports.values().map(|e| Traced::from(*e)));
                }
            }
        }
    }
}

fn push_ref(value: Ref, worklist: &mut Vec<Traced>) {
    match value {
        Ref::Func(Some(f)) => worklist.push(Traced::Func(f)),
        Ref::Any(Some(object)) => worklist.push(Traced::from(object)),
        Ref::Func(None) | Ref::Any(None) => {}
    }
}

fn push_val(value: Val, worklist: &mut Vec<Traced>) {
    match value {
        Val::FuncRef(Some(f)) => worklist.push(Traced::Func(f)),
        Val::AnyRef(Some(object)) => worklist.push(Traced::from(object)),
        _ => {}
    }
}
