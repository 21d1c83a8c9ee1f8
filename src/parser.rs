// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The binary decoder: translates the output of `wasmparser` into the module
//! IR.
//!
//! Decoding also runs `wasmparser`'s structural and function-body validation
//! configured from the module's [`FeatureSpec`]; the IR-level checks that
//! `wasmparser` does not know about live in [`crate::validate_module`]. On
//! failure nothing is returned: a half-decoded module is never observable.

use core::fmt;

use wasmparser::{
    BinaryReader, CompositeInnerType, DataKind, ElementItems, ElementKind, ExternalKind,
    FuncValidatorAllocations, Name, NameSectionReader, Parser, Payload, TagKind, TypeRef,
    ValidPayload, Validator,
};

use crate::const_expr::ConstExpr;
use crate::indices::{FuncIndex, GlobalIndex, MemoryIndex, TableIndex, TagIndex, TypeIndex};
use crate::module::{
    DataSegment, ElementSegment, EntityIndex, FeatureSpec, FunctionBody, FunctionDef, Import,
    Module, SegmentElements,
};
use crate::types::{
    ExternType, FuncType, GlobalType, MemoryType, Mutability, SizeConstraints, TableType, TagType,
    TypeTuple, ValType,
};

/// A failure to decode a binary module.
#[derive(Debug, Clone)]
pub struct DecodeError {
    pub message: String,
    /// Byte offset in the input where decoding failed.
    pub offset: usize,
}

// ===== impl DecodeError =====

impl DecodeError {
    pub(crate) fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (at offset {:#x})", self.message, self.offset)
    }
}

impl std::error::Error for DecodeError {}

impl From<wasmparser::BinaryReaderError> for DecodeError {
    fn from(error: wasmparser::BinaryReaderError) -> Self {
        Self::new(error.message().to_string(), error.offset())
    }
}

/// Decodes (and byte-level validates) a binary module into IR.
///
/// On failure the error is returned without any partially decoded module
/// becoming observable.
pub fn load_binary_module(bytes: &[u8], feature_spec: FeatureSpec) -> Result<Module, DecodeError> {
    ModuleParser::new(feature_spec).parse(bytes)
}

struct ModuleParser {
    module: Module,
    validator: Validator,
}

// ===== impl ModuleParser =====

impl ModuleParser {
    fn new(feature_spec: FeatureSpec) -> Self {
        Self {
            validator: Validator::new_with_features(feature_spec.wasm_features()),
            module: Module::new(feature_spec),
        }
    }

    fn parse(mut self, bytes: &[u8]) -> Result<Module, DecodeError> {
        let mut allocs = FuncValidatorAllocations::default();

        for payload in Parser::new(0).parse_all(bytes) {
            let payload = payload?;
            match self.validator.payload(&payload)? {
                ValidPayload::Ok | ValidPayload::End(_) => {}
                ValidPayload::Parser(_) => {
                    return Err(DecodeError::new("nested modules are not supported", 0));
                }
                ValidPayload::Func(to_validate, body) => {
                    let mut func_validator = to_validate.into_validator(allocs);
                    func_validator.validate(&body)?;
                    allocs = func_validator.into_allocations();
                }
            }
            self.payload(bytes, payload)?;
        }

        tracing::trace!(
            "decoded module with {} functions, {} imports, {} exports",
            self.module.functions.len(),
            self.module.imports.len(),
            self.module.exports.len(),
        );
        Ok(self.module)
    }

    fn payload(&mut self, bytes: &[u8], payload: Payload<'_>) -> Result<(), DecodeError> {
        match payload {
            Payload::Version { .. }
            | Payload::CodeSectionStart { .. }
            | Payload::DataCountSection { .. }
            | Payload::End(_) => {}
            Payload::TypeSection(types) => {
                for rec_group in types {
                    for sub_type in rec_group?.into_types() {
                        let CompositeInnerType::Func(ref func_type) =
                            sub_type.composite_type.inner
                        else {
                            return Err(DecodeError::new(
                                "only function types are supported",
                                0,
                            ));
                        };
                        let ty = convert_func_type(func_type)?;
                        self.module.types.push(ty);
                    }
                }
            }
            Payload::ImportSection(imports) => {
                for import in imports {
                    let import = import?;
                    let ty = match import.ty {
                        TypeRef::Func(index) => {
                            self.module.num_imported_functions += 1;
                            let signature = TypeIndex::from_u32(index);
                            self.module.functions.push(FunctionDef { signature });
                            ExternType::Func(self.module.types[signature])
                        }
                        TypeRef::Table(ty) => {
                            self.module.num_imported_tables += 1;
                            let table = convert_table_type(&ty)?;
                            self.module.tables.push(table);
                            ExternType::Table(table)
                        }
                        TypeRef::Memory(ty) => {
                            self.module.num_imported_memories += 1;
                            let memory = convert_memory_type(&ty)?;
                            self.module.memories.push(memory);
                            ExternType::Memory(memory)
                        }
                        TypeRef::Global(ty) => {
                            self.module.num_imported_globals += 1;
                            let global = convert_global_type(&ty)?;
                            self.module.globals.push(global);
                            ExternType::Global(global)
                        }
                        TypeRef::Tag(ty) => {
                            self.module.num_imported_tags += 1;
                            let tag = self.convert_tag_type(&ty)?;
                            self.module.tags.push(tag);
                            ExternType::Tag(tag)
                        }
                    };

                    self.module.imports.push(Import {
                        module: import.module.to_string(),
                        name: import.name.to_string(),
                        ty,
                    });
                }
            }
            Payload::FunctionSection(functions) => {
                for index in functions {
                    let signature = TypeIndex::from_u32(index?);
                    self.module.functions.push(FunctionDef { signature });
                }
            }
            Payload::TableSection(tables) => {
                for table in tables {
                    let table = table?;
                    self.module.tables.push(convert_table_type(&table.ty)?);
                }
            }
            Payload::MemorySection(memories) => {
                for ty in memories {
                    self.module.memories.push(convert_memory_type(&ty?)?);
                }
            }
            Payload::TagSection(tags) => {
                for ty in tags {
                    let tag = self.convert_tag_type(&ty?)?;
                    self.module.tags.push(tag);
                }
            }
            Payload::GlobalSection(globals) => {
                for global in globals {
                    let global = global?;
                    self.module
                        .globals
                        .push(convert_global_type(&global.ty)?);
                    let init = ConstExpr::from_wasmparser(&global.init_expr)
                        .map_err(|e| DecodeError::new(e.to_string(), 0))?;
                    self.module.global_initializers.push(init);
                }
            }
            Payload::ExportSection(exports) => {
                for export in exports {
                    let export = export?;
                    let index = match export.kind {
                        ExternalKind::Func => {
                            let index = FuncIndex::from_u32(export.index);
                            self.module
                                .names
                                .functions
                                .entry(index)
                                .or_insert_with(|| export.name.to_string());
                            EntityIndex::Function(index)
                        }
                        ExternalKind::Table => {
                            EntityIndex::Table(TableIndex::from_u32(export.index))
                        }
                        ExternalKind::Memory => {
                            EntityIndex::Memory(MemoryIndex::from_u32(export.index))
                        }
                        ExternalKind::Global => {
                            EntityIndex::Global(GlobalIndex::from_u32(export.index))
                        }
                        ExternalKind::Tag => EntityIndex::Tag(TagIndex::from_u32(export.index)),
                    };
                    self.module.exports.insert(export.name.to_string(), index);
                }
            }
            Payload::StartSection { func, .. } => {
                self.module.start = Some(FuncIndex::from_u32(func));
            }
            Payload::ElementSection(elements) => {
                for element in elements {
                    let element = element?;
                    let items = match element.items {
                        ElementItems::Functions(funcs) => {
                            let mut out = Vec::with_capacity(funcs.count() as usize);
                            for func_index in funcs {
                                out.push(FuncIndex::from_u32(func_index?));
                            }
                            SegmentElements::Functions(out.into_boxed_slice())
                        }
                        ElementItems::Expressions(_, exprs) => {
                            let mut out = Vec::with_capacity(exprs.count() as usize);
                            for expr in exprs {
                                let expr = ConstExpr::from_wasmparser(&expr?)
                                    .map_err(|e| DecodeError::new(e.to_string(), 0))?;
                                out.push(expr);
                            }
                            SegmentElements::Expressions(out.into_boxed_slice())
                        }
                    };

                    match element.kind {
                        ElementKind::Active {
                            table_index,
                            offset_expr,
                        } => {
                            let offset = ConstExpr::from_wasmparser(&offset_expr)
                                .map_err(|e| DecodeError::new(e.to_string(), 0))?;
                            self.module.element_segments.push(ElementSegment {
                                table_index: TableIndex::from_u32(table_index.unwrap_or(0)),
                                offset,
                                elements: items,
                            });
                        }
                        // Declared segments only exist to make `ref.func`
                        // usable; there is nothing to copy at instantiation.
                        ElementKind::Declared => {}
                        ElementKind::Passive => {
                            return Err(DecodeError::new(
                                "passive element segments are not supported",
                                0,
                            ));
                        }
                    }
                }
            }
            Payload::DataSection(section) => {
                for entry in section {
                    let entry = entry?;
                    match entry.kind {
                        DataKind::Active {
                            memory_index,
                            offset_expr,
                        } => {
                            let offset = ConstExpr::from_wasmparser(&offset_expr)
                                .map_err(|e| DecodeError::new(e.to_string(), 0))?;
                            self.module.data_segments.push(DataSegment {
                                memory_index: MemoryIndex::from_u32(memory_index),
                                offset,
                                data: entry.data.to_vec(),
                            });
                        }
                        DataKind::Passive => {
                            return Err(DecodeError::new(
                                "passive data segments are not supported",
                                0,
                            ));
                        }
                    }
                }
            }
            Payload::CodeSectionEntry(body) => {
                let range = body.range();

                let mut locals = Vec::new();
                for declaration in body.get_locals_reader()? {
                    let (count, ty) = declaration?;
                    let ty = convert_val_type(&ty)?;
                    if locals.len() + count as usize > self.module.feature_spec.max_locals {
                        return Err(DecodeError::new(
                            format!(
                                "function declares more than {} locals",
                                self.module.feature_spec.max_locals
                            ),
                            range.start,
                        ));
                    }
                    locals.extend(core::iter::repeat(ty).take(count as usize));
                }

                let ops_start = body.get_operators_reader()?.original_position();
                self.module.function_bodies.push(FunctionBody {
                    locals,
                    bytes: bytes[ops_start..range.end].to_vec(),
                    offset: ops_start,
                });
            }
            Payload::CustomSection(section) => {
                if section.name() == "name" {
                    // Name subsections are best-effort: a malformed name
                    // section does not fail the module.
                    let reader =
                        NameSectionReader::new(BinaryReader::new(section.data(), section.data_offset()));
                    if let Err(error) = self.name_section(reader) {
                        tracing::debug!("ignoring malformed name section: {error}");
                    }
                } else {
                    tracing::trace!("ignoring custom section `{}`", section.name());
                }
            }
            other => {
                return Err(DecodeError::new(
                    format!("unsupported section: {other:?}"),
                    0,
                ));
            }
        }
        Ok(())
    }

    fn name_section(&mut self, reader: NameSectionReader<'_>) -> Result<(), DecodeError> {
        for subsection in reader {
            match subsection? {
                Name::Module { name, .. } => {
                    self.module.names.module = Some(name.to_string());
                    if self.module.name.is_none() {
                        self.module.name = Some(name.to_string());
                    }
                }
                Name::Function(names) => {
                    for naming in names {
                        let naming = naming?;
                        // Skip namings of functions that don't exist.
                        if naming.index < self.module.num_functions() {
                            self.module.names.functions.insert(
                                FuncIndex::from_u32(naming.index),
                                naming.name.to_string(),
                            );
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn convert_tag_type(&self, ty: &wasmparser::TagType) -> Result<TagType, DecodeError> {
        match ty.kind {
            TagKind::Exception => {
                let signature = TypeIndex::from_u32(ty.func_type_idx);
                let func_type = self.module.types[signature];
                Ok(TagType::new(func_type.params()))
            }
        }
    }
}

fn convert_val_type(ty: &wasmparser::ValType) -> Result<ValType, DecodeError> {
    match ty {
        wasmparser::ValType::I32 => Ok(ValType::I32),
        wasmparser::ValType::I64 => Ok(ValType::I64),
        wasmparser::ValType::F32 => Ok(ValType::F32),
        wasmparser::ValType::F64 => Ok(ValType::F64),
        wasmparser::ValType::V128 => Ok(ValType::V128),
        wasmparser::ValType::Ref(ref_type) => convert_ref_type(ref_type),
    }
}

fn convert_ref_type(ty: &wasmparser::RefType) -> Result<ValType, DecodeError> {
    use wasmparser::{AbstractHeapType, HeapType};

    match ty.heap_type() {
        HeapType::Abstract {
            ty: AbstractHeapType::Func,
            ..
        } => Ok(ValType::AnyFunc),
        HeapType::Abstract {
            ty: AbstractHeapType::Extern,
            ..
        } => Ok(ValType::AnyRef),
        other => Err(DecodeError::new(
            format!("unsupported reference type: {other:?}"),
            0,
        )),
    }
}

fn convert_func_type(ty: &wasmparser::FuncType) -> Result<FuncType, DecodeError> {
    let params = ty
        .params()
        .iter()
        .map(convert_val_type)
        .collect::<Result<Vec<_>, _>>()?;
    let results = ty
        .results()
        .iter()
        .map(convert_val_type)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(FuncType::new(
        TypeTuple::new(results),
        TypeTuple::new(params),
    ))
}

fn convert_table_type(ty: &wasmparser::TableType) -> Result<TableType, DecodeError> {
    if ty.table64 {
        return Err(DecodeError::new("64-bit tables are not supported", 0));
    }
    Ok(TableType::new(
        convert_ref_type(&ty.element_type)?,
        ty.shared,
        SizeConstraints::new(ty.initial, ty.maximum),
    ))
}

fn convert_memory_type(ty: &wasmparser::MemoryType) -> Result<MemoryType, DecodeError> {
    if ty.memory64 {
        return Err(DecodeError::new("64-bit memories are not supported", 0));
    }
    if ty.page_size_log2.is_some() {
        return Err(DecodeError::new("custom page sizes are not supported", 0));
    }
    Ok(MemoryType::new(
        ty.shared,
        SizeConstraints::new(ty.initial, ty.maximum),
    ))
}

fn convert_global_type(ty: &wasmparser::GlobalType) -> Result<GlobalType, DecodeError> {
    Ok(GlobalType::new(
        convert_val_type(&ty.content_type)?,
        if ty.mutable {
            Mutability::Var
        } else {
            Mutability::Const
        },
    ))
}
