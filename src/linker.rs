// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Import resolution.
//!
//! The linker walks a module's imports in declaration order, asks a
//! [`Resolver`] for each, and collects either a resolved-import vector or a
//! list of failures. It never mutates the module and never instantiates
//! anything; `link_module` is pure given a pure resolver.

use crate::compartment::Compartment;
use crate::func::CallConvention;
use crate::module::Module;
use crate::trap::{CallStack, Exception, Trap};
use crate::types::ExternType;
use crate::values::Val;
use crate::{Extern, Func};

/// A failure reported by a [`Resolver`].
#[derive(onlyerror::Error, Debug)]
pub enum ResolveError {
    /// The resolver knows no definition for the requested name.
    #[error("no such definition")]
    NotFound,
    /// The resolver tried to synthesize an object and failed.
    #[error("resolver failure: {0}")]
    Failed(String),
}

/// Maps `(module, name, type)` import requests to runtime objects.
///
/// Resolvers may hand out existing objects or synthesize new ones on demand;
/// whatever they return is still type-checked by the linker.
pub trait Resolver {
    fn resolve(
        &mut self,
        module: &str,
        name: &str,
        ty: &ExternType,
    ) -> Result<Extern, ResolveError>;
}

/// Why an individual import could not be linked.
#[derive(onlyerror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkErrorCause {
    #[error("missing import")]
    Missing,
    #[error("type mismatch")]
    TypeMismatch,
    #[error("object belongs to a different compartment")]
    CompartmentMismatch,
}

/// One unresolved or rejected import.
#[derive(Debug)]
pub struct MissingImport {
    pub module: String,
    pub name: String,
    pub ty: ExternType,
    pub cause: LinkErrorCause,
}

/// The outcome of [`link_module`].
#[derive(Debug, Default)]
pub struct LinkResult {
    /// Successfully resolved imports, in declaration order. Complete only
    /// when [`Self::is_success`].
    pub resolved_imports: Vec<Extern>,
    /// The imports that could not be resolved.
    pub missing_imports: Vec<MissingImport>,
}

// ===== impl LinkResult =====

impl LinkResult {
    pub fn is_success(&self) -> bool {
        self.missing_imports.is_empty()
    }
}

/// Resolves every import of `module` against `resolver`, type checking the
/// results.
///
/// A resolved object satisfies its request iff its concrete type is a
/// subtype of the declared import type and it belongs to `compartment`.
pub fn link_module(
    module: &Module,
    compartment: &Compartment,
    resolver: &mut dyn Resolver,
) -> LinkResult {
    let mut result = LinkResult::default();

    for import in &module.imports {
        match resolver.resolve(&import.module, &import.name, &import.ty) {
            Ok(object) => {
                if !object.comes_from(compartment) {
                    result.missing_imports.push(MissingImport {
                        module: import.module.clone(),
                        name: import.name.clone(),
                        ty: import.ty,
                        cause: LinkErrorCause::CompartmentMismatch,
                    });
                    continue;
                }
                let actual = object.ty(compartment);
                if !ExternType::is_subtype(&actual, &import.ty) {
                    tracing::debug!(
                        "import `{}::{}`: resolved {actual} is not a subtype of {}",
                        import.module,
                        import.name,
                        import.ty,
                    );
                    result.missing_imports.push(MissingImport {
                        module: import.module.clone(),
                        name: import.name.clone(),
                        ty: import.ty,
                        cause: LinkErrorCause::TypeMismatch,
                    });
                    continue;
                }
                result.resolved_imports.push(object);
            }
            Err(error) => {
                tracing::debug!(
                    "import `{}::{}` failed to resolve: {error}",
                    import.module,
                    import.name,
                );
                result.missing_imports.push(MissingImport {
                    module: import.module.clone(),
                    name: import.name.clone(),
                    ty: import.ty,
                    cause: LinkErrorCause::Missing,
                });
            }
        }
    }

    result
}

/// A resolver that fabricates an object satisfying every request: trap-only
/// functions, zero-initialized memories, tables and globals, and fresh tags.
///
/// Used by fuzzers to drive instantiation of arbitrary modules.
pub struct StubResolver {
    compartment: Compartment,
}

// ===== impl StubResolver =====

impl StubResolver {
    pub fn new(compartment: &Compartment) -> Self {
        Self {
            compartment: compartment.clone(),
        }
    }
}

impl Resolver for StubResolver {
    fn resolve(
        &mut self,
        _module: &str,
        name: &str,
        ty: &ExternType,
    ) -> Result<Extern, ResolveError> {
        tracing::trace!("stubbing import `{name}` of type {ty}");
        let stub = |error: anyhow::Error| ResolveError::Failed(error.to_string());

        match *ty {
            ExternType::Func(func_ty) => {
                // Calling the stub faults, as if its body were `unreachable`.
                Func::wrap_host(
                    &self.compartment,
                    func_ty,
                    CallConvention::Intrinsic,
                    |_, _| {
                        Err(Exception::from_trap(
                            Trap::UnreachableCodeReached,
                            CallStack::default(),
                        ))
                    },
                )
                .map(Extern::Func)
                .map_err(stub)
            }
            ExternType::Table(table_ty) => self
                .compartment
                .create_table(table_ty)
                .map(Extern::Table)
                .map_err(stub),
            ExternType::Memory(memory_ty) => self
                .compartment
                .create_memory(memory_ty)
                .map(Extern::Memory)
                .map_err(stub),
            ExternType::Global(global_ty) => {
                let value = Val::default_for(global_ty.content)
                    .ok_or_else(|| ResolveError::Failed("global type has no default".into()))?;
                self.compartment
                    .create_global(global_ty, value)
                    .map(Extern::Global)
                    .map_err(stub)
            }
            ExternType::Tag(tag_ty) => self
                .compartment
                .create_tag(tag_ty)
                .map(Extern::Tag)
                .map_err(stub),
        }
    }
}
