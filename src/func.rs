// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;
use std::sync::Arc;

use anyhow::ensure;

use crate::compartment::{Compartment, Stored};
use crate::indices::DefinedFuncIndex;
use crate::instance::Instance;
use crate::interp;
use crate::trap::Exception;
use crate::types::FuncType;
use crate::values::Val;

/// A WebAssembly function, either defined by an instantiated module or
/// provided by the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Func(pub(crate) Stored<FuncData>);

#[derive(Debug)]
pub(crate) struct FuncData {
    pub ty: FuncType,
    pub kind: FuncKind,
}

#[derive(Debug)]
pub(crate) enum FuncKind {
    /// A function defined by a module; the code lives in the instance's
    /// compiled module.
    Wasm {
        instance: Instance,
        def_index: DefinedFuncIndex,
    },
    /// A host-provided function.
    Host(Arc<HostFunc>),
}

/// How a callee expects to be entered, and whether faults inside it are
/// caught.
///
/// Only `Wasm` and the `Intrinsic` conventions participate in trap catching;
/// `C` callees are assumed trap-free.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallConvention {
    Wasm,
    Intrinsic,
    IntrinsicWithContextSwitch,
    C,
}

type HostFn = Box<dyn Fn(&Compartment, &[Val]) -> Result<Vec<Val>, Exception> + Send + Sync>;

pub(crate) struct HostFunc {
    pub ty: FuncType,
    pub convention: CallConvention,
    pub callee: HostFn,
}

impl fmt::Debug for HostFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunc")
            .field("ty", &self.ty)
            .field("convention", &self.convention)
            .finish_non_exhaustive()
    }
}

// ===== impl Func =====

impl Func {
    /// Wraps a host closure as a function owned by `compartment`.
    ///
    /// When invoked, the closure receives the compartment and the (already
    /// type-checked) argument values; an `Err` is delivered to the caller as
    /// an [`Exception`]. The new function is rooted until released.
    pub fn wrap_host(
        compartment: &Compartment,
        ty: FuncType,
        convention: CallConvention,
        callee: impl Fn(&Compartment, &[Val]) -> Result<Vec<Val>, Exception> + Send + Sync + 'static,
    ) -> crate::Result<Func> {
        ensure!(
            convention != CallConvention::Wasm,
            "host functions cannot use the `wasm` calling convention"
        );
        let data = FuncData {
            ty,
            kind: FuncKind::Host(Arc::new(HostFunc {
                ty,
                convention,
                callee: Box::new(callee),
            })),
        };
        let mut inner = compartment.lock();
        inner.ensure_active()?;
        Ok(Func(inner.funcs.alloc(data, true)))
    }

    /// The function's type.
    ///
    /// # Panics
    ///
    /// Panics if the handle does not denote a live function of `compartment`.
    pub fn ty(&self, compartment: &Compartment) -> FuncType {
        compartment
            .lock()
            .funcs
            .get(self.0)
            .expect("function is not a live object of this compartment")
            .ty
    }

    /// The function's calling convention.
    pub fn convention(&self, compartment: &Compartment) -> CallConvention {
        match &compartment
            .lock()
            .funcs
            .get(self.0)
            .expect("function is not a live object of this compartment")
            .kind
        {
            FuncKind::Wasm { .. } => CallConvention::Wasm,
            FuncKind::Host(host) => host.convention,
        }
    }

    /// Calls the function with the given arguments.
    ///
    /// Arguments are checked against the function's parameter types. Traps
    /// and guest exceptions surface as errors carrying an [`Exception`],
    /// recoverable with [`crate::catch_runtime_exceptions`].
    pub fn invoke(&self, compartment: &Compartment, args: &[Val]) -> crate::Result<Vec<Val>> {
        interp::invoke_func(compartment, *self, args)
    }

    pub(crate) fn comes_from(&self, compartment: &Compartment) -> bool {
        compartment.lock().funcs.contains(self.0)
    }
}
