// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The in-memory representation of a decoded module.
//!
//! A [`Module`] is plain data with no runtime identity: it can be decoded
//! from binary with [`crate::load_binary_module`], or built directly, and is
//! turned into something executable by [`crate::compile_module`].

use cranelift_entity::PrimaryMap;
use hashbrown::HashMap;
use wasmparser::collections::IndexMap;
use wasmparser::WasmFeatures;

use crate::const_expr::ConstExpr;
use crate::indices::{
    DefinedFuncIndex, DefinedGlobalIndex, DefinedMemoryIndex, DefinedTableIndex, DefinedTagIndex,
    FuncIndex, GlobalIndex, MemoryIndex, TableIndex, TagIndex, TypeIndex,
};
use crate::types::{ExternType, FuncType, GlobalType, MemoryType, TableType, TagType, ValType};

/// The number of bytes in a WebAssembly page.
pub const WASM_PAGE_SIZE: u64 = 0x10000;
/// The number of pages a 32-bit memory can have before running out of byte
/// index space.
pub const WASM32_MAX_PAGES: u64 = 1 << 16;

/// Caps and proposal toggles that bound what a module may contain.
///
/// The caps are enforced by [`crate::validate_module`]; the toggles select
/// the feature set the decoder accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureSpec {
    pub max_labels_per_function: usize,
    pub max_locals: usize,
    pub max_memory_pages: u64,
    pub max_table_elems: u64,
    pub reference_types: bool,
    pub exceptions: bool,
    pub extended_const: bool,
}

// ===== impl FeatureSpec =====

impl Default for FeatureSpec {
    fn default() -> Self {
        Self {
            max_labels_per_function: 1 << 20,
            max_locals: 1 << 16,
            max_memory_pages: WASM32_MAX_PAGES,
            max_table_elems: u32::MAX as u64,
            reference_types: true,
            exceptions: true,
            extended_const: true,
        }
    }
}

impl FeatureSpec {
    /// The `wasmparser` feature set matching this spec.
    pub fn wasm_features(&self) -> WasmFeatures {
        let mut features = WasmFeatures::MUTABLE_GLOBAL
            | WasmFeatures::MULTI_VALUE
            | WasmFeatures::SIGN_EXTENSION
            | WasmFeatures::SATURATING_FLOAT_TO_INT
            | WasmFeatures::FLOATS;
        if self.reference_types {
            features |= WasmFeatures::REFERENCE_TYPES;
        }
        if self.exceptions {
            features |= WasmFeatures::EXCEPTIONS | WasmFeatures::LEGACY_EXCEPTIONS;
        }
        if self.extended_const {
            features |= WasmFeatures::EXTENDED_CONST;
        }
        features
    }
}

/// A WebAssembly import request.
#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    /// The module or namespace being imported from.
    pub module: String,
    /// The name of the item being imported.
    pub name: String,
    /// The declared type of the import.
    pub ty: ExternType,
}

/// A function declaration; only the signature, the body lives in
/// [`Module::function_bodies`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FunctionDef {
    pub signature: TypeIndex,
}

/// The undecoded body of a defined function: its declared locals and the raw
/// operator bytes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionBody {
    pub locals: Vec<ValType>,
    pub bytes: Vec<u8>,
    /// Offset of the body in the original binary, for diagnostics.
    pub offset: usize,
}

/// An index into one of a module's entity spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityIndex {
    Function(FuncIndex),
    Table(TableIndex),
    Memory(MemoryIndex),
    Global(GlobalIndex),
    Tag(TagIndex),
}

/// The elements of an element segment.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentElements {
    /// A list of function indices.
    Functions(Box<[FuncIndex]>),
    /// A list of constant expressions.
    Expressions(Box<[ConstExpr]>),
}

// ===== impl SegmentElements =====

impl SegmentElements {
    pub fn len(&self) -> usize {
        match self {
            SegmentElements::Functions(f) => f.len(),
            SegmentElements::Expressions(e) => e.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An active table initializer.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementSegment {
    pub table_index: TableIndex,
    pub offset: ConstExpr,
    pub elements: SegmentElements,
}

/// An active memory initializer.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSegment {
    pub memory_index: MemoryIndex,
    pub offset: ConstExpr,
    pub data: Vec<u8>,
}

/// Disassembly names carried by a module's name section.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Names {
    pub module: Option<String>,
    pub functions: HashMap<FuncIndex, String>,
}

/// A decoded WebAssembly module.
#[derive(Debug, Default)]
pub struct Module {
    /// The name of this module, if the name section carried one.
    pub name: Option<String>,
    /// Caps and feature toggles this module was decoded under.
    pub feature_spec: FeatureSpec,
    /// The function types declared in the type section, interned.
    pub types: PrimaryMap<TypeIndex, FuncType>,
    /// Imports in declaration order.
    pub imports: Vec<Import>,
    /// Every function in the index space, imported functions first.
    pub functions: PrimaryMap<FuncIndex, FunctionDef>,
    /// Bodies of the defined functions.
    pub function_bodies: PrimaryMap<DefinedFuncIndex, FunctionBody>,
    /// Every table in the index space, imported tables first.
    pub tables: PrimaryMap<TableIndex, TableType>,
    /// Every memory in the index space, imported memories first.
    pub memories: PrimaryMap<MemoryIndex, MemoryType>,
    /// Every global in the index space, imported globals first.
    pub globals: PrimaryMap<GlobalIndex, GlobalType>,
    /// Initializer expressions for the defined globals.
    pub global_initializers: PrimaryMap<DefinedGlobalIndex, ConstExpr>,
    /// Every exception tag in the index space, imported tags first.
    pub tags: PrimaryMap<TagIndex, TagType>,
    /// The function to invoke once instantiation completes, if any.
    pub start: Option<FuncIndex>,
    /// Exports by name.
    pub exports: IndexMap<String, EntityIndex>,
    /// Active table initializers.
    pub element_segments: Vec<ElementSegment>,
    /// Active memory initializers.
    pub data_segments: Vec<DataSegment>,
    /// Disassembly names.
    pub names: Names,

    pub num_imported_functions: u32,
    pub num_imported_tables: u32,
    pub num_imported_memories: u32,
    pub num_imported_globals: u32,
    pub num_imported_tags: u32,
}

// ===== impl Module =====

impl Module {
    pub fn new(feature_spec: FeatureSpec) -> Self {
        Self {
            feature_spec,
            ..Self::default()
        }
    }

    /// The interned type of the function at `index`.
    pub fn func_type(&self, index: FuncIndex) -> FuncType {
        self.types[self.functions[index].signature]
    }

    #[inline]
    pub fn func_index(&self, index: DefinedFuncIndex) -> FuncIndex {
        FuncIndex::from_u32(self.num_imported_functions + index.as_u32())
    }

    #[inline]
    pub fn defined_func_index(&self, index: FuncIndex) -> Option<DefinedFuncIndex> {
        if self.is_imported_func(index) {
            None
        } else {
            Some(DefinedFuncIndex::from_u32(
                index.as_u32() - self.num_imported_functions,
            ))
        }
    }

    #[inline]
    pub fn is_imported_func(&self, index: FuncIndex) -> bool {
        index.as_u32() < self.num_imported_functions
    }

    #[inline]
    pub fn table_index(&self, index: DefinedTableIndex) -> TableIndex {
        TableIndex::from_u32(self.num_imported_tables + index.as_u32())
    }

    #[inline]
    pub fn defined_table_index(&self, index: TableIndex) -> Option<DefinedTableIndex> {
        if self.is_imported_table(index) {
            None
        } else {
            Some(DefinedTableIndex::from_u32(
                index.as_u32() - self.num_imported_tables,
            ))
        }
    }

    #[inline]
    pub fn is_imported_table(&self, index: TableIndex) -> bool {
        index.as_u32() < self.num_imported_tables
    }

    #[inline]
    pub fn memory_index(&self, index: DefinedMemoryIndex) -> MemoryIndex {
        MemoryIndex::from_u32(self.num_imported_memories + index.as_u32())
    }

    #[inline]
    pub fn defined_memory_index(&self, index: MemoryIndex) -> Option<DefinedMemoryIndex> {
        if self.is_imported_memory(index) {
            None
        } else {
            Some(DefinedMemoryIndex::from_u32(
                index.as_u32() - self.num_imported_memories,
            ))
        }
    }

    #[inline]
    pub fn is_imported_memory(&self, index: MemoryIndex) -> bool {
        index.as_u32() < self.num_imported_memories
    }

    #[inline]
    pub fn global_index(&self, index: DefinedGlobalIndex) -> GlobalIndex {
        GlobalIndex::from_u32(self.num_imported_globals + index.as_u32())
    }

    #[inline]
    pub fn defined_global_index(&self, index: GlobalIndex) -> Option<DefinedGlobalIndex> {
        if self.is_imported_global(index) {
            None
        } else {
            Some(DefinedGlobalIndex::from_u32(
                index.as_u32() - self.num_imported_globals,
            ))
        }
    }

    #[inline]
    pub fn is_imported_global(&self, index: GlobalIndex) -> bool {
        index.as_u32() < self.num_imported_globals
    }

    #[inline]
    pub fn tag_index(&self, index: DefinedTagIndex) -> TagIndex {
        TagIndex::from_u32(self.num_imported_tags + index.as_u32())
    }

    #[inline]
    pub fn defined_tag_index(&self, index: TagIndex) -> Option<DefinedTagIndex> {
        if self.is_imported_tag(index) {
            None
        } else {
            Some(DefinedTagIndex::from_u32(
                index.as_u32() - self.num_imported_tags,
            ))
        }
    }

    #[inline]
    pub fn is_imported_tag(&self, index: TagIndex) -> bool {
        index.as_u32() < self.num_imported_tags
    }

    pub fn num_functions(&self) -> u32 {
        u32::try_from(self.functions.len()).unwrap()
    }

    pub fn num_defined_functions(&self) -> u32 {
        self.num_functions() - self.num_imported_functions
    }

    pub fn num_tables(&self) -> u32 {
        u32::try_from(self.tables.len()).unwrap()
    }

    pub fn num_memories(&self) -> u32 {
        u32::try_from(self.memories.len()).unwrap()
    }

    pub fn num_globals(&self) -> u32 {
        u32::try_from(self.globals.len()).unwrap()
    }

    pub fn num_tags(&self) -> u32 {
        u32::try_from(self.tags.len()).unwrap()
    }

    /// The declared type of the entity at `index`.
    pub fn type_of(&self, index: EntityIndex) -> ExternType {
        match index {
            EntityIndex::Function(i) => ExternType::Func(self.func_type(i)),
            EntityIndex::Table(i) => ExternType::Table(self.tables[i]),
            EntityIndex::Memory(i) => ExternType::Memory(self.memories[i]),
            EntityIndex::Global(i) => ExternType::Global(self.globals[i]),
            EntityIndex::Tag(i) => ExternType::Tag(self.tags[i]),
        }
    }
}
