// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A compartmented WebAssembly runtime core.
//!
//! `wasmcell` turns a validated WebAssembly module into an instantiated,
//! callable, sandboxed unit of code and mediates its interaction with
//! host-provided imports. The pieces:
//!
//! - [`Module`]: the in-memory IR of a decoded module, produced by
//!   [`load_binary_module`] and checked by [`validate_module`].
//! - [`Compartment`]: the unit of object identity and sharing. All runtime
//!   objects live in exactly one compartment, and compartments are
//!   independently garbage collected.
//! - [`link_module`]: matches a module's imports against host-supplied
//!   objects through a [`Resolver`].
//! - [`instantiate_module`]: builds an [`Instance`] atomically, with rollback
//!   on failure.
//! - [`catch_runtime_exceptions`]: the scoped frame that delivers guest traps
//!   and thrown exceptions to the host as structured [`Exception`] values.

mod compartment;
mod compile;
mod const_expr;
mod func;
mod gc;
mod global;
mod indices;
mod instance;
mod instantiate;
mod interp;
mod linker;
mod memory;
mod module;
mod parser;
mod table;
mod tag;
mod trap;
mod type_registry;
mod types;
mod utils;
mod validate;
mod values;

use crate::utils::{enum_accessors, owned_enum_accessors};

pub type Result<T> = anyhow::Result<T>;

pub use compartment::Compartment;
pub use compile::{compile_module, CompileError, CompiledModule};
pub use const_expr::{ConstExpr, ConstExprEvaluator, ConstOp};
pub use func::{CallConvention, Func};
pub use global::Global;
pub use indices::{
    DataIndex, DefinedFuncIndex, DefinedGlobalIndex, DefinedMemoryIndex, DefinedTableIndex,
    DefinedTagIndex, ElemIndex, FuncIndex, GlobalIndex, MemoryIndex, TableIndex, TagIndex,
    TypeIndex,
};
pub use instance::Instance;
pub use instantiate::{instantiate_module, InstantiationError};
pub use linker::{
    link_module, LinkErrorCause, LinkResult, MissingImport, ResolveError, Resolver, StubResolver,
};
pub use memory::Memory;
pub use module::{
    DataSegment, ElementSegment, EntityIndex, FeatureSpec, FunctionBody, FunctionDef, Import,
    Module, Names, SegmentElements, WASM32_MAX_PAGES, WASM_PAGE_SIZE,
};
pub use parser::{load_binary_module, DecodeError};
pub use table::Table;
pub use tag::Tag;
pub use trap::{catch_runtime_exceptions, CallStack, Exception, Frame, Trap};
pub use types::{
    ExternType, FuncType, FuncTypeEncoding, GlobalType, MemoryType, Mutability, SizeConstraints,
    TableType, TagType, TypeTuple, ValType,
};
pub use validate::{validate_module, TextFileLocus, ValidationError};
pub use values::{Ref, Val};

// Reference values are pointer-width, and the type lattice promises at least
// eight bytes for them.
static_assertions::const_assert!(size_of::<usize>() >= 8);

/// A WebAssembly external value: any object that can be imported or exported
/// between modules.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Extern {
    Func(Func),
    Table(Table),
    Memory(Memory),
    Global(Global),
    Tag(Tag),
}

impl From<Func> for Extern {
    fn from(f: Func) -> Self {
        Extern::Func(f)
    }
}

impl From<Table> for Extern {
    fn from(t: Table) -> Self {
        Extern::Table(t)
    }
}

impl From<Memory> for Extern {
    fn from(m: Memory) -> Self {
        Extern::Memory(m)
    }
}

impl From<Global> for Extern {
    fn from(g: Global) -> Self {
        Extern::Global(g)
    }
}

impl From<Tag> for Extern {
    fn from(t: Tag) -> Self {
        Extern::Tag(t)
    }
}

impl Extern {
    /// The concrete type of the underlying object.
    ///
    /// # Panics
    ///
    /// Panics if the object is not a live object of `compartment`.
    pub fn ty(&self, compartment: &Compartment) -> ExternType {
        match self {
            Extern::Func(f) => ExternType::Func(f.ty(compartment)),
            Extern::Table(t) => ExternType::Table(t.ty(compartment)),
            Extern::Memory(m) => ExternType::Memory(m.ty(compartment)),
            Extern::Global(g) => ExternType::Global(g.ty(compartment)),
            Extern::Tag(t) => ExternType::Tag(t.ty(compartment)),
        }
    }

    /// Whether this object is a live object of `compartment`.
    pub fn comes_from(&self, compartment: &Compartment) -> bool {
        match self {
            Extern::Func(f) => f.comes_from(compartment),
            Extern::Table(t) => t.comes_from(compartment),
            Extern::Memory(m) => m.comes_from(compartment),
            Extern::Global(g) => g.comes_from(compartment),
            Extern::Tag(t) => t.comes_from(compartment),
        }
    }

    enum_accessors! {
        e
        (Func(&Func) is_func get_func unwrap_func e)
        (Table(&Table) is_table get_table unwrap_table e)
        (Memory(&Memory) is_memory get_memory unwrap_memory e)
        (Global(&Global) is_global get_global unwrap_global e)
        (Tag(&Tag) is_tag get_tag unwrap_tag e)
    }

    owned_enum_accessors! {
        e
        (Func(Func) into_func e)
        (Table(Table) into_table e)
        (Memory(Memory) into_memory e)
        (Global(Global) into_global e)
        (Tag(Tag) into_tag e)
    }
}
