// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use anyhow::{anyhow, ensure};

use crate::compartment::{Compartment, Stored};
use crate::table::ensure_same_compartment;
use crate::types::GlobalType;
use crate::values::{Ref, Val};

/// A WebAssembly global variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Global(pub(crate) Stored<GlobalData>);

#[derive(Debug)]
pub(crate) struct GlobalData {
    ty: GlobalType,
    value: Val,
}

// ===== impl GlobalData =====

impl GlobalData {
    pub(crate) fn new(ty: GlobalType, value: Val) -> Self {
        debug_assert!(value.matches(ty.content));
        Self { ty, value }
    }

    pub(crate) fn ty(&self) -> GlobalType {
        self.ty
    }

    pub(crate) fn get(&self) -> Val {
        self.value
    }

    /// Unchecked store, used by guest code whose writes were validated.
    pub(crate) fn set(&mut self, value: Val) {
        debug_assert!(value.matches(self.ty.content));
        self.value = value;
    }
}

// ===== impl Global =====

impl Global {
    /// The global's type.
    ///
    /// # Panics
    ///
    /// Panics if the handle does not denote a live global of `compartment`.
    pub fn ty(&self, compartment: &Compartment) -> GlobalType {
        compartment
            .lock()
            .globals
            .get(self.0)
            .expect("global is not a live object of this compartment")
            .ty()
    }

    pub fn get(&self, compartment: &Compartment) -> crate::Result<Val> {
        compartment
            .lock()
            .globals
            .get(self.0)
            .map(GlobalData::get)
            .ok_or_else(|| anyhow!("global is not a live object of this compartment"))
    }

    /// Stores `value`, failing if the global is immutable or the value does
    /// not match the content type.
    pub fn set(&self, compartment: &Compartment, value: Val) -> crate::Result<()> {
        if let Val::FuncRef(f) = value {
            ensure_same_compartment(compartment, &Ref::Func(f))?;
        }
        if let Val::AnyRef(r) = value {
            ensure_same_compartment(compartment, &Ref::Any(r))?;
        }
        let mut inner = compartment.lock();
        let data = inner
            .globals
            .get_mut(self.0)
            .ok_or_else(|| anyhow!("global is not a live object of this compartment"))?;
        ensure!(data.ty().is_mutable(), "immutable global cannot be set");
        ensure!(
            value.matches(data.ty().content),
            "value of type {} does not match global type `{}`",
            value.ty(),
            data.ty(),
        );
        data.set(value);
        Ok(())
    }

    pub(crate) fn comes_from(&self, compartment: &Compartment) -> bool {
        compartment.lock().globals.contains(self.0)
    }
}
