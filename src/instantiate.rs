// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The instantiator.
//!
//! Builds a module instance atomically: type-checks the resolved imports,
//! allocates the objects the module defines (tags, then globals with their
//! initializers, then memories, tables and functions), copies element and
//! data segments with full pre-checks, publishes the instance, and finally
//! runs the start function.
//!
//! Every allocation goes on a rollback list. Any failure before the publish
//! point releases the allocations in reverse order, leaving the compartment
//! exactly as it was. A trapping start function is different: the instance
//! is already published and stays, but the trap is re-raised to the caller.

use std::sync::Arc;

use cranelift_entity::PrimaryMap;

use crate::compartment::{Compartment, CompartmentInner};
use crate::compile::CompiledModule;
use crate::const_expr::{ConstEvalContext, ConstExpr, ConstExprEvaluator};
use crate::func::{Func, FuncData, FuncKind};
use crate::global::GlobalData;
use crate::indices::{FuncIndex, GlobalIndex};
use crate::instance::{Instance, InstanceData, InstanceState};
use crate::memory::MemoryData;
use crate::module::{EntityIndex, SegmentElements, WASM_PAGE_SIZE};
use crate::table::TableData;
use crate::tag::TagData;
use crate::types::ExternType;
use crate::values::{Ref, Val};
use crate::{Extern, Global, Memory, Table, Tag};

/// A failure to instantiate a module. The compartment is left exactly as it
/// was before the call.
#[derive(onlyerror::Error, Debug)]
pub enum InstantiationError {
    /// The resolved-import vector does not match the module's import count.
    #[error("expected {0} resolved imports, got {1}")]
    ImportCountMismatch(usize, usize),
    /// An import's concrete type is not a subtype of the declared type.
    #[error("import {0} does not satisfy its declared type")]
    ImportTypeMismatch(usize),
    /// An import belongs to a different compartment.
    #[error("import {0} belongs to a different compartment")]
    CompartmentMismatch(usize),
    /// An element segment does not fit within its table.
    #[error("element segment {0} is out of bounds")]
    ElementSegmentOutOfBounds(usize),
    /// A data segment does not fit within its memory.
    #[error("data segment {0} is out of bounds")]
    DataSegmentOutOfBounds(usize),
    /// Evaluating a constant initializer failed.
    #[error("initializer evaluation failed: {0}")]
    Initializer(String),
    /// Allocating an owned object failed.
    #[error("object allocation failed: {0}")]
    Allocation(String),
}

enum Created {
    Instance(Instance),
    Tag(Tag),
    Global(Global),
    Memory(Memory),
    Table(Table),
    Func(Func),
}

/// Instantiates `compiled` in `compartment` with the given resolved imports.
///
/// On success the returned instance is published, rooted, and its start
/// function (if any) has run. Traps from the start function surface as
/// [`crate::Exception`] errors while the instance stays published; every
/// other failure rolls the compartment back and is an
/// [`InstantiationError`].
pub fn instantiate_module(
    compartment: &Compartment,
    compiled: &Arc<CompiledModule>,
    resolved_imports: Vec<Extern>,
    debug_name: &str,
) -> crate::Result<Instance> {
    let mut created = Vec::new();
    let mut inner = compartment.lock();
    inner.ensure_active()?;

    let instance = match build(&mut inner, compiled, &resolved_imports, debug_name, &mut created)
    {
        Ok(instance) => instance,
        Err(error) => {
            rollback(&mut inner, created);
            return Err(error.into());
        }
    };
    drop(inner);

    tracing::debug!(
        "instantiated `{debug_name}` with {} imports",
        resolved_imports.len()
    );

    // The start function observes the fully initialized, already published
    // instance; a trap here is re-raised but does not unpublish it.
    if let Some(start) = compiled.module.start {
        let func = compartment
            .lock()
            .instances
            .get(instance.0)
            .and_then(|data| data.functions.get(start).copied());
        if let Some(func) = func {
            tracing::trace!("running start function of `{debug_name}`");
            func.invoke(compartment, &[])?;
        }
        let mut inner = compartment.lock();
        if let Some(data) = inner.instances.get_mut(instance.0) {
            data.state = InstanceState::Started;
        }
    }

    Ok(instance)
}

fn build(
    inner: &mut CompartmentInner,
    compiled: &Arc<CompiledModule>,
    resolved_imports: &[Extern],
    debug_name: &str,
    created: &mut Vec<Created>,
) -> Result<Instance, InstantiationError> {
    let module = &compiled.module;

    // 1. Type check the imports against the declared import types.
    if resolved_imports.len() != module.imports.len() {
        return Err(InstantiationError::ImportCountMismatch(
            module.imports.len(),
            resolved_imports.len(),
        ));
    }
    for (index, (import, object)) in module.imports.iter().zip(resolved_imports).enumerate() {
        let Some(actual) = inner.extern_type(*object) else {
            return Err(InstantiationError::CompartmentMismatch(index));
        };
        if !ExternType::is_subtype(&actual, &import.ty) {
            return Err(InstantiationError::ImportTypeMismatch(index));
        }
    }

    // The instance itself is allocated first (unrooted, unpublished) so the
    // functions defined below can name it.
    let instance = Instance(inner.instances.alloc(
        InstanceData {
            compiled: compiled.clone(),
            debug_name: debug_name.to_string(),
            state: InstanceState::Allocating,
            functions: PrimaryMap::new(),
            tables: PrimaryMap::new(),
            memories: PrimaryMap::new(),
            globals: PrimaryMap::new(),
            tags: PrimaryMap::new(),
            exports: Default::default(),
        },
        false,
    ));
    created.push(Created::Instance(instance));

    // Distribute the imported objects into the instance's index spaces.
    let mut functions: PrimaryMap<_, Func> = PrimaryMap::new();
    let mut tables: PrimaryMap<_, Table> = PrimaryMap::new();
    let mut memories: PrimaryMap<_, Memory> = PrimaryMap::new();
    let mut globals: PrimaryMap<_, Global> = PrimaryMap::new();
    let mut tags: PrimaryMap<_, Tag> = PrimaryMap::new();
    for object in resolved_imports {
        match *object {
            Extern::Func(f) => {
                functions.push(f);
            }
            Extern::Table(t) => {
                tables.push(t);
            }
            Extern::Memory(m) => {
                memories.push(m);
            }
            Extern::Global(g) => {
                globals.push(g);
            }
            Extern::Tag(t) => {
                tags.push(t);
            }
        }
    }

    // 2a. Tags.
    for index in module.num_imported_tags..module.num_tags() {
        let ty = module.tags[crate::indices::TagIndex::from_u32(index)];
        let tag = Tag(inner.tags.alloc(TagData::new(ty), false));
        created.push(Created::Tag(tag));
        tags.push(tag);
    }

    // 2b/3. Globals, with initializers evaluated in declaration order
    // against the already-resolved imported globals.
    let mut global_values: PrimaryMap<GlobalIndex, Val> = PrimaryMap::new();
    for global in globals.values() {
        let value = inner
            .globals
            .get(global.0)
            .map(GlobalData::get)
            .ok_or_else(|| InstantiationError::Initializer("imported global vanished".into()))?;
        global_values.push(value);
    }
    let funcs_for_globals: PrimaryMap<FuncIndex, Option<Func>> = module
        .functions
        .keys()
        .map(|index| functions.get(index).copied())
        .collect();

    let mut const_eval = ConstExprEvaluator::default();
    for (defined_index, init) in module.global_initializers.iter() {
        let ty = module.globals[module.global_index(defined_index)];
        let ctx = ConstEvalContext {
            globals: &global_values,
            funcs: &funcs_for_globals,
        };
        let value = const_eval
            .eval(&ctx, init)
            .map_err(|e| InstantiationError::Initializer(e.to_string()))?;
        if !value.matches(ty.content) {
            return Err(InstantiationError::Initializer(format!(
                "initializer of type {} does not match `{ty}`",
                value.ty()
            )));
        }
        let global = Global(inner.globals.alloc(GlobalData::new(ty, value), false));
        created.push(Created::Global(global));
        globals.push(global);
        global_values.push(value);
    }

    // 2c. Memories.
    for index in module.num_imported_memories..module.num_memories() {
        let ty = module.memories[crate::indices::MemoryIndex::from_u32(index)];
        let data = MemoryData::new(ty)
            .map_err(|e| InstantiationError::Allocation(e.to_string()))?;
        let memory = Memory(inner.memories.alloc(data, false));
        created.push(Created::Memory(memory));
        memories.push(memory);
    }

    // 2d. Tables.
    for index in module.num_imported_tables..module.num_tables() {
        let ty = module.tables[crate::indices::TableIndex::from_u32(index)];
        let data =
            TableData::new(ty).map_err(|e| InstantiationError::Allocation(e.to_string()))?;
        let table = Table(inner.tables.alloc(data, false));
        created.push(Created::Table(table));
        tables.push(table);
    }

    // 2e. Functions.
    for index in module.num_imported_functions..module.num_functions() {
        let func_index = FuncIndex::from_u32(index);
        let def_index = module
            .defined_func_index(func_index)
            .expect("index is past the imported functions");
        let data = FuncData {
            ty: module.func_type(func_index),
            kind: FuncKind::Wasm {
                instance,
                def_index,
            },
        };
        let func = Func(inner.funcs.alloc(data, false));
        created.push(Created::Func(func));
        functions.push(func);
    }

    let funcs_for_segments: PrimaryMap<FuncIndex, Option<Func>> =
        functions.values().map(|func| Some(*func)).collect();

    // 4. Element segments: pre-check every (offset, length) pair before any
    // copy, so a failure mutates nothing.
    let mut element_copies = Vec::with_capacity(module.element_segments.len());
    for (index, segment) in module.element_segments.iter().enumerate() {
        let ctx = ConstEvalContext {
            globals: &global_values,
            funcs: &funcs_for_segments,
        };
        let offset = eval_offset(&mut const_eval, &ctx, &segment.offset)?;
        let table = *tables
            .get(segment.table_index)
            .ok_or(InstantiationError::ElementSegmentOutOfBounds(index))?;
        let table_size = inner
            .tables
            .get(table.0)
            .map(TableData::size)
            .ok_or(InstantiationError::ElementSegmentOutOfBounds(index))?;
        let element_type = inner
            .tables
            .get(table.0)
            .map(|data| data.ty().element_type)
            .ok_or(InstantiationError::ElementSegmentOutOfBounds(index))?;

        let end = offset
            .checked_add(segment.elements.len() as u64)
            .ok_or(InstantiationError::ElementSegmentOutOfBounds(index))?;
        if end > table_size {
            return Err(InstantiationError::ElementSegmentOutOfBounds(index));
        }

        let mut values = Vec::with_capacity(segment.elements.len());
        match &segment.elements {
            SegmentElements::Functions(funcs) => {
                for func_index in funcs.iter() {
                    let func = funcs_for_segments
                        .get(*func_index)
                        .copied()
                        .flatten()
                        .ok_or_else(|| {
                            InstantiationError::Initializer(
                                "element references an out-of-range function".into(),
                            )
                        })?;
                    values.push(Ref::Func(Some(func)));
                }
            }
            SegmentElements::Expressions(exprs) => {
                for expr in exprs.iter() {
                    let value = const_eval
                        .eval(&ctx, expr)
                        .map_err(|e| InstantiationError::Initializer(e.to_string()))?;
                    let value = match value {
                        Val::FuncRef(f) => Ref::Func(f),
                        Val::AnyRef(r) => Ref::Any(r),
                        other => {
                            return Err(InstantiationError::Initializer(format!(
                                "element evaluated to non-reference {}",
                                other.ty()
                            )))
                        }
                    };
                    if !value.matches(element_type) {
                        return Err(InstantiationError::Initializer(format!(
                            "element of type {} does not match table element type {element_type}",
                            value.ty()
                        )));
                    }
                    values.push(value);
                }
            }
        }
        element_copies.push((table, offset, values));
    }

    // 5. Data segments, same pre-check discipline.
    let mut data_copies = Vec::with_capacity(module.data_segments.len());
    for (index, segment) in module.data_segments.iter().enumerate() {
        let ctx = ConstEvalContext {
            globals: &global_values,
            funcs: &funcs_for_segments,
        };
        let offset = eval_offset(&mut const_eval, &ctx, &segment.offset)?;
        let memory = *memories
            .get(segment.memory_index)
            .ok_or(InstantiationError::DataSegmentOutOfBounds(index))?;
        let memory_bytes = inner
            .memories
            .get(memory.0)
            .map(|data| data.size() * WASM_PAGE_SIZE)
            .ok_or(InstantiationError::DataSegmentOutOfBounds(index))?;

        let end = offset
            .checked_add(segment.data.len() as u64)
            .ok_or(InstantiationError::DataSegmentOutOfBounds(index))?;
        if end > memory_bytes {
            return Err(InstantiationError::DataSegmentOutOfBounds(index));
        }
        data_copies.push((memory, offset, &segment.data));
    }

    // All checks passed: perform the copies.
    for (table, offset, values) in element_copies {
        let data = inner
            .tables
            .get_mut(table.0)
            .expect("table checked above");
        for (i, value) in values.into_iter().enumerate() {
            data.set(offset + i as u64, value)
                .expect("bounds checked above");
        }
    }
    for (memory, offset, bytes) in data_copies {
        let data = inner
            .memories
            .get_mut(memory.0)
            .expect("memory checked above");
        data.slice_mut(offset, bytes.len())
            .expect("bounds checked above")
            .copy_from_slice(bytes);
    }

    // 6. Publish: populate the exports map, mark the instance rooted.
    let mut exports = wasmparser::collections::IndexMap::default();
    for (name, entity) in &module.exports {
        let object = match *entity {
            EntityIndex::Function(i) => functions.get(i).copied().map(Extern::Func),
            EntityIndex::Table(i) => tables.get(i).copied().map(Extern::Table),
            EntityIndex::Memory(i) => memories.get(i).copied().map(Extern::Memory),
            EntityIndex::Global(i) => globals.get(i).copied().map(Extern::Global),
            EntityIndex::Tag(i) => tags.get(i).copied().map(Extern::Tag),
        }
        .ok_or_else(|| {
            InstantiationError::Initializer(format!(
                "export `{name}` references an out-of-range index"
            ))
        })?;
        exports.insert(name.clone(), object);
    }

    let boxed = inner
        .instances
        .get_box_mut(instance.0)
        .expect("instance allocated above");
    boxed.rooted = true;
    boxed.value.functions = functions;
    boxed.value.tables = tables;
    boxed.value.memories = memories;
    boxed.value.globals = globals;
    boxed.value.tags = tags;
    boxed.value.exports = exports;
    boxed.value.state = InstanceState::Published;

    Ok(instance)
}

fn eval_offset(
    const_eval: &mut ConstExprEvaluator,
    ctx: &ConstEvalContext<'_>,
    offset: &ConstExpr,
) -> Result<u64, InstantiationError> {
    match const_eval.eval(ctx, offset) {
        Ok(Val::I32(value)) => Ok(u64::from(value as u32)),
        Ok(other) => Err(InstantiationError::Initializer(format!(
            "segment offset evaluated to {}, expected i32",
            other.ty()
        ))),
        Err(error) => Err(InstantiationError::Initializer(error.to_string())),
    }
}

/// Releases everything `build` allocated, newest first; afterwards the set
/// of live objects in the compartment is exactly the pre-call set.
fn rollback(inner: &mut CompartmentInner, created: Vec<Created>) {
    tracing::debug!("instantiation failed, rolling back {} objects", created.len());
    for object in created.into_iter().rev() {
        match object {
            Created::Instance(i) => {
                inner.instances.free(i.0);
            }
            Created::Tag(t) => {
                inner.tags.free(t.0);
            }
            Created::Global(g) => {
                inner.globals.free(g.0);
            }
            Created::Memory(m) => {
                inner.memories.free(m.0);
            }
            Created::Table(t) => {
                inner.tables.free(t.0);
            }
            Created::Func(f) => {
                inner.funcs.free(f.0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cranelift_entity::PrimaryMap;

    use crate::compile::compile_module;
    use crate::const_expr::{ConstExpr, ConstOp};
    use crate::module::{ElementSegment, Module, SegmentElements};
    use crate::types::{SizeConstraints, TableType, ValType};
    use crate::{instantiate_module, Compartment, InstantiationError, TableIndex};

    /// A module with a table of size {1,1} and an element segment at offset
    /// 2 must fail instantiation, and the failed attempt must leave the
    /// compartment bit-identical to its pre-call state.
    #[test]
    fn rollback_is_complete() {
        let mut module = Module::default();
        module.tables.push(TableType::new(
            ValType::AnyFunc,
            false,
            SizeConstraints::new(1, Some(1)),
        ));
        module.element_segments.push(ElementSegment {
            table_index: TableIndex::from_u32(0),
            offset: ConstExpr::new([ConstOp::I32Const(2)]),
            elements: SegmentElements::Expressions(Box::new([ConstExpr::new([
                ConstOp::RefNull(ValType::AnyFunc),
            ])])),
        });
        let compiled = Arc::new(compile_module(module).unwrap());

        let compartment = Compartment::new();
        // Pre-existing state that must survive untouched.
        let _memory = compartment
            .create_memory(crate::MemoryType::new(false, SizeConstraints::new(1, Some(1))))
            .unwrap();
        let before = compartment.lock().census();

        let error = instantiate_module(&compartment, &compiled, Vec::new(), "rollback")
            .unwrap_err();
        assert!(matches!(
            error.downcast_ref::<InstantiationError>(),
            Some(InstantiationError::ElementSegmentOutOfBounds(0))
        ));

        let after = compartment.lock().census();
        assert_eq!(before, after);
    }

    /// Imported function handles are shared, not copied: the instance's
    /// function vector holds the identical object.
    #[test]
    fn imported_functions_preserve_identity() {
        use crate::types::{FuncType, TypeTuple};
        use crate::{CallConvention, Extern, Func};

        let mut module = Module::default();
        let ty = FuncType::new(TypeTuple::empty(), TypeTuple::empty());
        let signature = module.types.push(ty);
        module.functions.push(crate::module::FunctionDef { signature });
        module.num_imported_functions = 1;
        module.imports.push(crate::module::Import {
            module: "env".into(),
            name: "f".into(),
            ty: crate::ExternType::Func(ty),
        });
        let compiled = Arc::new(compile_module(module).unwrap());

        let compartment = Compartment::new();
        let func =
            Func::wrap_host(&compartment, ty, CallConvention::Intrinsic, |_, _| Ok(vec![]))
                .unwrap();
        let instance = instantiate_module(
            &compartment,
            &compiled,
            vec![Extern::Func(func)],
            "identity",
        )
        .unwrap();

        let inner = compartment.lock();
        let data = inner.instances.get(instance.0).unwrap();
        let stored: PrimaryMap<crate::FuncIndex, Func> = data.functions.clone();
        drop(inner);
        assert_eq!(stored.values().next().copied(), Some(func));
    }
}
