// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The evaluator behind [`crate::Func::invoke`].
//!
//! Executes the lowered form produced by [`crate::compile_module`]. All guest
//! faults are explicit here: bounds checks, division checks, conversion
//! checks, and stack budgets turn into [`Trap`]s packaged as [`Exception`]
//! values, so no host-level signal handling is involved.
//!
//! The evaluator runs while holding the compartment mutex and releases it
//! only around calls into host functions, so guest execution, instantiation,
//! and collection are serialized per compartment.

use std::sync::Arc;
use std::sync::MutexGuard;

use anyhow::{anyhow, ensure};
use smallvec::SmallVec;

use crate::compartment::{Compartment, CompartmentInner};
use crate::compile::{BlockSig, CompiledModule, Op, TryTableCatch};
use crate::func::{CallConvention, Func, FuncKind};
use crate::indices::{DefinedFuncIndex, MemoryIndex, TagIndex};
use crate::instance::Instance;
use crate::memory::Memory;
use crate::table::ensure_same_compartment;
use crate::tag::Tag;
use crate::trap::{CallStack, Exception, Frame, Trap};
use crate::values::{Ref, Val};

/// Stand-in for the guard region a native runtime reserves: beyond this many
/// nested guest frames the call traps with `StackOverflow`.
const MAX_CALL_DEPTH: usize = 256;
/// Budget for the value stack of a single guest call.
const MAX_VALUE_STACK: usize = 1 << 20;

/// Entry point: type-checks `args` and runs `func` to completion.
pub(crate) fn invoke_func(
    compartment: &Compartment,
    func: Func,
    args: &[Val],
) -> crate::Result<Vec<Val>> {
    let (ty, convention, c_host) = {
        let inner = compartment.lock();
        let data = inner
            .funcs
            .get(func.0)
            .ok_or_else(|| anyhow!("function is not a live object of this compartment"))?;
        let (convention, c_host) = match &data.kind {
            FuncKind::Wasm { .. } => (CallConvention::Wasm, None),
            FuncKind::Host(host) => (host.convention, Some(host.clone())),
        };
        (data.ty, convention, c_host)
    };

    ensure!(
        args.len() == ty.params().len(),
        "expected {} arguments, got {}",
        ty.params().len(),
        args.len()
    );
    for (index, (arg, param)) in args.iter().zip(ty.params().elems()).enumerate() {
        ensure!(
            arg.matches(*param),
            "argument {index} of type {} does not match parameter type {param}",
            arg.ty(),
        );
        match *arg {
            Val::FuncRef(f) => ensure_same_compartment(compartment, &Ref::Func(f))?,
            Val::AnyRef(r) => ensure_same_compartment(compartment, &Ref::Any(r))?,
            _ => {}
        }
    }

    // `c` convention callees are assumed trap-free and run outside the trap
    // catching machinery: a failure is a host error, not an `Exception`.
    if convention == CallConvention::C {
        let host = c_host.expect("`c` convention implies a host function");
        return (host.callee)(compartment, args)
            .map_err(|e| anyhow!("`c` convention host function failed: {e}"));
    }

    compartment.begin_guest_call();
    let mut vm = Vm {
        compartment,
        inner: Some(compartment.lock()),
        frames: Vec::new(),
    };
    let result = vm.call(func, args);
    drop(vm);
    compartment.end_guest_call();

    result.map_err(Exception::into_error)
}

#[derive(Clone, Copy)]
struct FrameEntry {
    func: Func,
    pc: usize,
}

struct Label {
    /// Jump target: the matching `end` (or the `loop` op itself).
    target: u32,
    is_loop: bool,
    sig: BlockSig,
    stack_base: usize,
    kind: LabelKind,
}

enum LabelKind {
    Plain,
    Try {
        catches: Box<[(Option<TagIndex>, u32)]>,
        delegate: Option<u32>,
    },
    /// A catch block currently handling `caught`.
    Catch(Box<Exception>),
    TryTable {
        catches: Box<[TryTableCatch]>,
    },
}

enum Step {
    Next,
    Jump(usize),
    Ret,
}

enum DispatchOut {
    /// Resume at a handler.
    Resume(usize),
    /// The handler was the function-level label: return.
    Ret,
}

struct Vm<'a> {
    compartment: &'a Compartment,
    inner: Option<MutexGuard<'a, CompartmentInner>>,
    frames: Vec<FrameEntry>,
}

// ===== impl Vm =====

impl<'a> Vm<'a> {
    fn inner(&mut self) -> &mut CompartmentInner {
        self.inner.as_mut().expect("compartment lock is held")
    }

    fn capture_stack(&mut self) -> CallStack {
        let entries: SmallVec<[FrameEntry; 8]> = self.frames.iter().rev().copied().collect();
        let inner = self.inner();
        let frames = entries
            .iter()
            .map(|entry| {
                let description = inner.funcs.get(entry.func.0).and_then(|data| {
                    let FuncKind::Wasm {
                        instance,
                        def_index,
                    } = data.kind
                    else {
                        return None;
                    };
                    let instance = inner.instances.get(instance.0)?;
                    let module = &instance.compiled.module;
                    let func_index = module.func_index(def_index);
                    module.names.functions.get(&func_index).cloned()
                });
                Frame::new(entry.pc, description)
            })
            .collect();
        CallStack::new(frames)
    }

    fn raise(&mut self, trap: Trap) -> Exception {
        Exception::from_trap(trap, self.capture_stack())
    }

    fn call(&mut self, func: Func, args: &[Val]) -> Result<Vec<Val>, Exception> {
        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(self.raise(Trap::StackOverflow));
        }

        let data = match self.inner().funcs.get(func.0) {
            Some(data) => data,
            None => return Err(self.raise(Trap::NullReference)),
        };
        match &data.kind {
            FuncKind::Host(host) => {
                let host = host.clone();
                self.frames.push(FrameEntry { func, pc: 0 });

                // Host code may call back into the runtime; release the
                // compartment for the duration of the call.
                self.inner = None;
                let result = (host.callee)(self.compartment, args);
                self.inner = Some(self.compartment.lock());

                let result = match result {
                    Ok(values) => {
                        if values.len() != host.ty.results().len()
                            || values
                                .iter()
                                .zip(host.ty.results().elems())
                                .any(|(v, ty)| !v.matches(*ty))
                        {
                            Err(self.raise(Trap::BadSignature))
                        } else {
                            Ok(values)
                        }
                    }
                    Err(mut exception) => {
                        let stack = self.capture_stack();
                        exception.set_call_stack_if_empty(stack);
                        Err(exception)
                    }
                };
                self.frames.pop();
                result
            }
            FuncKind::Wasm {
                instance,
                def_index,
            } => {
                let instance = *instance;
                let def_index = *def_index;
                let compiled = match self.inner().instances.get(instance.0) {
                    Some(data) => data.compiled.clone(),
                    None => return Err(self.raise(Trap::NullReference)),
                };
                self.frames.push(FrameEntry { func, pc: 0 });
                let result = self.run(instance, &compiled, def_index, args);
                self.frames.pop();
                result
            }
        }
    }

    fn run(
        &mut self,
        instance: Instance,
        compiled: &Arc<CompiledModule>,
        def_index: DefinedFuncIndex,
        args: &[Val],
    ) -> Result<Vec<Val>, Exception> {
        let module = &compiled.module;
        let code = &compiled.code[def_index];
        let func_type = module.func_type(module.func_index(def_index));
        let result_arity = func_type.results().len();

        let mut locals: Vec<Val> = Vec::with_capacity(args.len() + code.locals.len());
        locals.extend_from_slice(args);
        for ty in code.locals.iter() {
            debug_assert!(Val::default_for(*ty).is_some());
            locals.push(Val::default_for(*ty).unwrap_or(Val::I32(0)));
        }

        // The first memory, cached per frame; modules have at most one.
        let frame_memory: Option<Memory> = self
            .inner()
            .instances
            .get(instance.0)
            .and_then(|data| data.memories.get(MemoryIndex::from_u32(0)).copied());

        let ops = &code.ops;
        let mut stack: Vec<Val> = Vec::new();
        let mut labels: Vec<Label> = Vec::new();
        let mut pc: usize = 0;

        loop {
            if stack.len() > MAX_VALUE_STACK {
                return Err(self.raise(Trap::StackOverflow));
            }
            if let Some(frame) = self.frames.last_mut() {
                frame.pc = pc;
            }
            let Some(op) = ops.get(pc) else {
                // Validated bodies end with `end`; running off the end means
                // the body returned at its final `end`.
                return Err(self.raise(Trap::UnreachableCodeReached));
            };

            let step = self.step(
                op,
                instance,
                frame_memory,
                &mut locals,
                &mut stack,
                &mut labels,
                pc,
            );

            match step {
                Ok(Step::Next) => pc += 1,
                Ok(Step::Jump(target)) => pc = target,
                Ok(Step::Ret) => {
                    let results = stack.split_off(stack.len().saturating_sub(result_arity));
                    return Ok(results);
                }
                Err(exception) => {
                    match self.dispatch_exception(
                        exception,
                        instance,
                        &mut stack,
                        &mut labels,
                    )? {
                        DispatchOut::Resume(target) => pc = target,
                        DispatchOut::Ret => {
                            let results =
                                stack.split_off(stack.len().saturating_sub(result_arity));
                            return Ok(results);
                        }
                    }
                }
            }
        }
    }

    /// Routes `exception` to the innermost eligible handler of the current
    /// frame, or propagates it. Traps are never catchable.
    fn dispatch_exception(
        &mut self,
        exception: Exception,
        instance: Instance,
        stack: &mut Vec<Val>,
        labels: &mut Vec<Label>,
    ) -> Result<DispatchOut, Exception> {
        if exception.is_trap() {
            return Err(exception);
        }

        loop {
            let Some(label) = labels.last() else {
                return Err(exception);
            };

            match &label.kind {
                LabelKind::Try { catches, delegate } => {
                    if let Some(depth) = *delegate {
                        // `delegate` forwards the exception to the handler of
                        // an outer label, skipping everything in between.
                        labels.pop();
                        let keep = labels.len().saturating_sub(depth as usize);
                        labels.truncate(keep);
                        continue;
                    }

                    let mut handler = None;
                    for (tag_index, handler_pc) in catches.iter() {
                        match tag_index {
                            Some(tag_index) => {
                                let tag = self.resolve_tag(instance, *tag_index);
                                if tag.is_some() && exception.tag() == tag {
                                    handler = Some((*handler_pc, true));
                                    break;
                                }
                            }
                            None => {
                                handler = Some((*handler_pc, false));
                                break;
                            }
                        }
                    }

                    if let Some((handler_pc, bind_arguments)) = handler {
                        let label = labels.last_mut().expect("label still present");
                        stack.truncate(label.stack_base);
                        if bind_arguments {
                            stack.extend_from_slice(exception.arguments());
                        }
                        label.kind = LabelKind::Catch(Box::new(exception));
                        return Ok(DispatchOut::Resume(handler_pc as usize + 1));
                    }
                    labels.pop();
                }
                LabelKind::TryTable { catches } => {
                    let mut handler = None;
                    for catch in catches.iter() {
                        match catch.tag {
                            Some(tag_index) => {
                                let tag = self.resolve_tag(instance, tag_index);
                                if tag.is_some() && exception.tag() == tag {
                                    handler = Some((catch.label, true));
                                    break;
                                }
                            }
                            None => {
                                handler = Some((catch.label, false));
                                break;
                            }
                        }
                    }

                    // Catch labels are resolved in the context enclosing the
                    // `try_table` block.
                    labels.pop();
                    if let Some((depth, bind_arguments)) = handler {
                        let values: SmallVec<[Val; 4]> = if bind_arguments {
                            exception.arguments().iter().copied().collect()
                        } else {
                            SmallVec::new()
                        };
                        return Ok(match branch_with(depth, labels, stack, &values) {
                            Some(target) => DispatchOut::Resume(target),
                            None => DispatchOut::Ret,
                        });
                    }
                }
                LabelKind::Plain | LabelKind::Catch(_) => {
                    labels.pop();
                }
            }
        }
    }

    fn resolve_tag(&mut self, instance: Instance, tag_index: TagIndex) -> Option<Tag> {
        self.inner()
            .instances
            .get(instance.0)
            .and_then(|data| data.tags.get(tag_index).copied())
    }

    #[expect(clippy::too_many_arguments, reason = "per-frame state is explicit")]
    #[expect(clippy::too_many_lines, reason = "the operator dispatch")]
    fn step(
        &mut self,
        op: &Op,
        instance: Instance,
        frame_memory: Option<Memory>,
        locals: &mut [Val],
        stack: &mut Vec<Val>,
        labels: &mut Vec<Label>,
        pc: usize,
    ) -> Result<Step, Exception> {
        match *op {
            Op::Unreachable => return Err(self.raise(Trap::UnreachableCodeReached)),
            Op::Nop => {}

            Op::Block { sig, end } => labels.push(Label {
                target: end,
                is_loop: false,
                sig,
                stack_base: stack.len().saturating_sub(sig.params as usize),
                kind: LabelKind::Plain,
            }),
            Op::Loop { sig } => labels.push(Label {
                target: pc as u32,
                is_loop: true,
                sig,
                stack_base: stack.len().saturating_sub(sig.params as usize),
                kind: LabelKind::Plain,
            }),
            Op::If { sig, else_, end } => {
                let condition = self.pop_i32(stack)?;
                if condition != 0 {
                    labels.push(Label {
                        target: end,
                        is_loop: false,
                        sig,
                        stack_base: stack.len().saturating_sub(sig.params as usize),
                        kind: LabelKind::Plain,
                    });
                } else if else_ != end {
                    // Enter the else branch, skipping the `else` op.
                    labels.push(Label {
                        target: end,
                        is_loop: false,
                        sig,
                        stack_base: stack.len().saturating_sub(sig.params as usize),
                        kind: LabelKind::Plain,
                    });
                    return Ok(Step::Jump(else_ as usize + 1));
                } else {
                    // No else branch: skip the block entirely; the params
                    // remain on the stack as its results.
                    return Ok(Step::Jump(end as usize + 1));
                }
            }
            // The then-branch finished: jump to the `end`, which pops the
            // label.
            Op::Else { end } => return Ok(Step::Jump(end as usize)),
            Op::End => {
                if labels.pop().is_none() {
                    return Ok(Step::Ret);
                }
            }
            Op::Br { depth } => {
                return Ok(match branch(depth, labels, stack) {
                    Some(target) => Step::Jump(target),
                    None => Step::Ret,
                });
            }
            Op::BrIf { depth } => {
                let condition = self.pop_i32(stack)?;
                if condition != 0 {
                    return Ok(match branch(depth, labels, stack) {
                        Some(target) => Step::Jump(target),
                        None => Step::Ret,
                    });
                }
            }
            Op::BrTable {
                ref targets,
                default,
            } => {
                let index = self.pop_i32(stack)? as u32 as usize;
                let depth = targets.get(index).copied().unwrap_or(default);
                return Ok(match branch(depth, labels, stack) {
                    Some(target) => Step::Jump(target),
                    None => Step::Ret,
                });
            }
            Op::Return => return Ok(Step::Ret),

            Op::Call { func } => {
                let callee = match self
                    .inner()
                    .instances
                    .get(instance.0)
                    .and_then(|data| data.functions.get(func).copied())
                {
                    Some(callee) => callee,
                    None => return Err(self.raise(Trap::NullReference)),
                };
                self.call_into(callee, stack)?;
            }
            Op::CallIndirect { ty, table } => {
                let index = self.pop_i32(stack)? as u32 as u64;
                let table = match self
                    .inner()
                    .instances
                    .get(instance.0)
                    .and_then(|data| data.tables.get(table).copied())
                {
                    Some(table) => table,
                    None => return Err(self.raise(Trap::TableOutOfBounds)),
                };
                let element = {
                    let data = match self.inner().tables.get(table.0) {
                        Some(data) => data,
                        None => return Err(self.raise(Trap::TableOutOfBounds)),
                    };
                    match data.get(index) {
                        Ok(element) => element,
                        Err(trap) => return Err(self.raise(trap)),
                    }
                };
                let callee = match element {
                    Ref::Func(Some(callee)) => callee,
                    Ref::Func(None) | Ref::Any(None) => {
                        return Err(self.raise(Trap::IndirectCallToNull))
                    }
                    Ref::Any(Some(_)) => return Err(self.raise(Trap::BadSignature)),
                };
                let callee_ty = match self.inner().funcs.get(callee.0) {
                    Some(data) => data.ty,
                    None => return Err(self.raise(Trap::IndirectCallToNull)),
                };
                // Function types are interned: the signature check is an
                // identity comparison of type encodings.
                if callee_ty.encoding() != ty.encoding() {
                    return Err(self.raise(Trap::BadSignature));
                }
                self.call_into(callee, stack)?;
            }

            Op::Try { sig, end, ref catches, delegate } => labels.push(Label {
                target: end,
                is_loop: false,
                sig,
                stack_base: stack.len().saturating_sub(sig.params as usize),
                kind: LabelKind::Try {
                    catches: catches.clone(),
                    delegate,
                },
            }),
            // The try body finished without throwing: jump to the `end`.
            Op::Catch { end } | Op::CatchAll { end } => return Ok(Step::Jump(end as usize)),
            Op::Delegate => {
                labels.pop();
            }
            Op::Rethrow { depth } => {
                let index = match labels.len().checked_sub(depth as usize + 1) {
                    Some(index) => index,
                    None => return Err(self.raise(Trap::UnreachableCodeReached)),
                };
                match labels.get(index).map(|label| &label.kind) {
                    Some(LabelKind::Catch(caught)) => return Err((**caught).clone()),
                    _ => return Err(self.raise(Trap::UnreachableCodeReached)),
                }
            }
            Op::Throw { tag } => {
                let tag = match self.resolve_tag(instance, tag) {
                    Some(tag) => tag,
                    None => return Err(self.raise(Trap::NullReference)),
                };
                let param_count = match self.inner().tags.get(tag.0) {
                    Some(data) => data.ty().params.len(),
                    None => return Err(self.raise(Trap::NullReference)),
                };
                let arguments = stack.split_off(stack.len().saturating_sub(param_count));
                let call_stack = self.capture_stack();
                return Err(Exception::new(tag, arguments, call_stack));
            }
            Op::TryTable { sig, end, ref catches } => labels.push(Label {
                target: end,
                is_loop: false,
                sig,
                stack_base: stack.len().saturating_sub(sig.params as usize),
                kind: LabelKind::TryTable {
                    catches: catches.clone(),
                },
            }),

            Op::Drop => {
                self.pop(stack)?;
            }
            Op::Select => {
                let condition = self.pop_i32(stack)?;
                let b = self.pop(stack)?;
                let a = self.pop(stack)?;
                stack.push(if condition != 0 { a } else { b });
            }

            Op::LocalGet(index) => {
                let value = match locals.get(index as usize) {
                    Some(value) => *value,
                    None => return Err(self.raise(Trap::UnreachableCodeReached)),
                };
                stack.push(value);
            }
            Op::LocalSet(index) => {
                let value = self.pop(stack)?;
                match locals.get_mut(index as usize) {
                    Some(slot) => *slot = value,
                    None => return Err(self.raise(Trap::UnreachableCodeReached)),
                }
            }
            Op::LocalTee(index) => {
                let value = match stack.last() {
                    Some(value) => *value,
                    None => return Err(self.raise(Trap::UnreachableCodeReached)),
                };
                match locals.get_mut(index as usize) {
                    Some(slot) => *slot = value,
                    None => return Err(self.raise(Trap::UnreachableCodeReached)),
                }
            }
            Op::GlobalGet(index) => {
                let value = match self.resolve_global(instance, index) {
                    Some((_, value)) => value,
                    None => return Err(self.raise(Trap::NullReference)),
                };
                stack.push(value);
            }
            Op::GlobalSet(index) => {
                let value = self.pop(stack)?;
                let global = match self
                    .inner()
                    .instances
                    .get(instance.0)
                    .and_then(|data| data.globals.get(index).copied())
                {
                    Some(global) => global,
                    None => return Err(self.raise(Trap::NullReference)),
                };
                match self.inner().globals.get_mut(global.0) {
                    Some(data) => data.set(value),
                    None => return Err(self.raise(Trap::NullReference)),
                }
            }

            Op::TableGet(index) => {
                let element_index = self.pop_i32(stack)? as u32 as u64;
                let table = self.resolve_table_handle(instance, index)?;
                let element = match self.inner().tables.get(table.0) {
                    Some(data) => data.get(element_index),
                    None => Err(Trap::TableOutOfBounds),
                };
                match element {
                    Ok(element) => stack.push(element.into()),
                    Err(trap) => return Err(self.raise(trap)),
                }
            }
            Op::TableSet(index) => {
                let value = self.pop_ref(stack)?;
                let element_index = self.pop_i32(stack)? as u32 as u64;
                let table = self.resolve_table_handle(instance, index)?;
                let result = match self.inner().tables.get_mut(table.0) {
                    Some(data) => data.set(element_index, value),
                    None => Err(Trap::TableOutOfBounds),
                };
                if let Err(trap) = result {
                    return Err(self.raise(trap));
                }
            }
            Op::TableSize(index) => {
                let table = self.resolve_table_handle(instance, index)?;
                let size = match self.inner().tables.get(table.0) {
                    Some(data) => data.size(),
                    None => return Err(self.raise(Trap::TableOutOfBounds)),
                };
                stack.push(Val::I32(size as u32 as i32));
            }
            Op::TableGrow(index) => {
                let delta = self.pop_i32(stack)? as u32 as u64;
                let init = self.pop_ref(stack)?;
                let table = self.resolve_table_handle(instance, index)?;
                let old = match self.inner().tables.get_mut(table.0) {
                    Some(data) => data.grow(delta, init),
                    None => None,
                };
                stack.push(Val::I32(old.map_or(-1i32, |old| old as u32 as i32)));
            }
            Op::TableFill(index) => {
                let len = self.pop_i32(stack)? as u32 as u64;
                let value = self.pop_ref(stack)?;
                let dst = self.pop_i32(stack)? as u32 as u64;
                let table = self.resolve_table_handle(instance, index)?;
                let result = match self.inner().tables.get_mut(table.0) {
                    Some(data) => data.fill(dst, value, len),
                    None => Err(Trap::TableOutOfBounds),
                };
                if let Err(trap) = result {
                    return Err(self.raise(trap));
                }
            }

            Op::I32Load(offset) => {
                let bytes = self.load_bytes::<4>(frame_memory, stack, offset)?;
                stack.push(Val::I32(i32::from_le_bytes(bytes)));
            }
            Op::I64Load(offset) => {
                let bytes = self.load_bytes::<8>(frame_memory, stack, offset)?;
                stack.push(Val::I64(i64::from_le_bytes(bytes)));
            }
            Op::F32Load(offset) => {
                let bytes = self.load_bytes::<4>(frame_memory, stack, offset)?;
                stack.push(Val::F32(u32::from_le_bytes(bytes)));
            }
            Op::F64Load(offset) => {
                let bytes = self.load_bytes::<8>(frame_memory, stack, offset)?;
                stack.push(Val::F64(u64::from_le_bytes(bytes)));
            }
            Op::I32Load8S(offset) => {
                let bytes = self.load_bytes::<1>(frame_memory, stack, offset)?;
                stack.push(Val::I32(i32::from(bytes[0] as i8)));
            }
            Op::I32Load8U(offset) => {
                let bytes = self.load_bytes::<1>(frame_memory, stack, offset)?;
                stack.push(Val::I32(i32::from(bytes[0])));
            }
            Op::I32Load16S(offset) => {
                let bytes = self.load_bytes::<2>(frame_memory, stack, offset)?;
                stack.push(Val::I32(i32::from(i16::from_le_bytes(bytes))));
            }
            Op::I32Load16U(offset) => {
                let bytes = self.load_bytes::<2>(frame_memory, stack, offset)?;
                stack.push(Val::I32(i32::from(u16::from_le_bytes(bytes))));
            }
            Op::I64Load8S(offset) => {
                let bytes = self.load_bytes::<1>(frame_memory, stack, offset)?;
                stack.push(Val::I64(i64::from(bytes[0] as i8)));
            }
            Op::I64Load8U(offset) => {
                let bytes = self.load_bytes::<1>(frame_memory, stack, offset)?;
                stack.push(Val::I64(i64::from(bytes[0])));
            }
            Op::I64Load16S(offset) => {
                let bytes = self.load_bytes::<2>(frame_memory, stack, offset)?;
                stack.push(Val::I64(i64::from(i16::from_le_bytes(bytes))));
            }
            Op::I64Load16U(offset) => {
                let bytes = self.load_bytes::<2>(frame_memory, stack, offset)?;
                stack.push(Val::I64(i64::from(u16::from_le_bytes(bytes))));
            }
            Op::I64Load32S(offset) => {
                let bytes = self.load_bytes::<4>(frame_memory, stack, offset)?;
                stack.push(Val::I64(i64::from(i32::from_le_bytes(bytes))));
            }
            Op::I64Load32U(offset) => {
                let bytes = self.load_bytes::<4>(frame_memory, stack, offset)?;
                stack.push(Val::I64(i64::from(u32::from_le_bytes(bytes))));
            }
            Op::I32Store(offset) => {
                let value = self.pop_i32(stack)?;
                self.store_bytes(frame_memory, stack, offset, value.to_le_bytes())?;
            }
            Op::I64Store(offset) => {
                let value = self.pop_i64(stack)?;
                self.store_bytes(frame_memory, stack, offset, value.to_le_bytes())?;
            }
            Op::F32Store(offset) => {
                let value = self.pop_f32_bits(stack)?;
                self.store_bytes(frame_memory, stack, offset, value.to_le_bytes())?;
            }
            Op::F64Store(offset) => {
                let value = self.pop_f64_bits(stack)?;
                self.store_bytes(frame_memory, stack, offset, value.to_le_bytes())?;
            }
            Op::I32Store8(offset) => {
                let value = self.pop_i32(stack)?;
                self.store_bytes(frame_memory, stack, offset, [value as u8])?;
            }
            Op::I32Store16(offset) => {
                let value = self.pop_i32(stack)?;
                self.store_bytes(frame_memory, stack, offset, (value as u16).to_le_bytes())?;
            }
            Op::I64Store8(offset) => {
                let value = self.pop_i64(stack)?;
                self.store_bytes(frame_memory, stack, offset, [value as u8])?;
            }
            Op::I64Store16(offset) => {
                let value = self.pop_i64(stack)?;
                self.store_bytes(frame_memory, stack, offset, (value as u16).to_le_bytes())?;
            }
            Op::I64Store32(offset) => {
                let value = self.pop_i64(stack)?;
                self.store_bytes(frame_memory, stack, offset, (value as u32).to_le_bytes())?;
            }
            Op::MemorySize => {
                let memory = match frame_memory {
                    Some(memory) => memory,
                    None => return Err(self.raise(Trap::MemoryOutOfBounds)),
                };
                let pages = match self.inner().memories.get(memory.0) {
                    Some(data) => data.size(),
                    None => return Err(self.raise(Trap::MemoryOutOfBounds)),
                };
                stack.push(Val::I32(pages as u32 as i32));
            }
            Op::MemoryGrow => {
                let delta = self.pop_i32(stack)? as u32 as u64;
                let memory = match frame_memory {
                    Some(memory) => memory,
                    None => return Err(self.raise(Trap::MemoryOutOfBounds)),
                };
                let old = match self.inner().memories.get_mut(memory.0) {
                    Some(data) => data.grow(delta),
                    None => None,
                };
                stack.push(Val::I32(old.map_or(-1i32, |old| old as u32 as i32)));
            }

            Op::I32Const(value) => stack.push(Val::I32(value)),
            Op::I64Const(value) => stack.push(Val::I64(value)),
            Op::F32Const(bits) => stack.push(Val::F32(bits)),
            Op::F64Const(bits) => stack.push(Val::F64(bits)),

            Op::RefNull(ty) => stack.push(Ref::null(ty).into()),
            Op::RefIsNull => {
                let value = self.pop_ref(stack)?;
                stack.push(Val::I32(i32::from(value.is_null())));
            }
            Op::RefFunc(index) => {
                let func = match self
                    .inner()
                    .instances
                    .get(instance.0)
                    .and_then(|data| data.functions.get(index).copied())
                {
                    Some(func) => func,
                    None => return Err(self.raise(Trap::NullReference)),
                };
                stack.push(Val::FuncRef(Some(func)));
            }

            Op::I32Eqz => {
                let a = self.pop_i32(stack)?;
                stack.push(Val::I32(i32::from(a == 0)));
            }
            Op::I32Eq => self.cmp_i32(stack, |a, b| a == b)?,
            Op::I32Ne => self.cmp_i32(stack, |a, b| a != b)?,
            Op::I32LtS => self.cmp_i32(stack, |a, b| a < b)?,
            Op::I32LtU => self.cmp_i32(stack, |a, b| (a as u32) < (b as u32))?,
            Op::I32GtS => self.cmp_i32(stack, |a, b| a > b)?,
            Op::I32GtU => self.cmp_i32(stack, |a, b| (a as u32) > (b as u32))?,
            Op::I32LeS => self.cmp_i32(stack, |a, b| a <= b)?,
            Op::I32LeU => self.cmp_i32(stack, |a, b| (a as u32) <= (b as u32))?,
            Op::I32GeS => self.cmp_i32(stack, |a, b| a >= b)?,
            Op::I32GeU => self.cmp_i32(stack, |a, b| (a as u32) >= (b as u32))?,
            Op::I64Eqz => {
                let a = self.pop_i64(stack)?;
                stack.push(Val::I32(i32::from(a == 0)));
            }
            Op::I64Eq => self.cmp_i64(stack, |a, b| a == b)?,
            Op::I64Ne => self.cmp_i64(stack, |a, b| a != b)?,
            Op::I64LtS => self.cmp_i64(stack, |a, b| a < b)?,
            Op::I64LtU => self.cmp_i64(stack, |a, b| (a as u64) < (b as u64))?,
            Op::I64GtS => self.cmp_i64(stack, |a, b| a > b)?,
            Op::I64GtU => self.cmp_i64(stack, |a, b| (a as u64) > (b as u64))?,
            Op::I64LeS => self.cmp_i64(stack, |a, b| a <= b)?,
            Op::I64LeU => self.cmp_i64(stack, |a, b| (a as u64) <= (b as u64))?,
            Op::I64GeS => self.cmp_i64(stack, |a, b| a >= b)?,
            Op::I64GeU => self.cmp_i64(stack, |a, b| (a as u64) >= (b as u64))?,
            Op::F32Eq => self.cmp_f32(stack, |a, b| a == b)?,
            Op::F32Ne => self.cmp_f32(stack, |a, b| a != b)?,
            Op::F32Lt => self.cmp_f32(stack, |a, b| a < b)?,
            Op::F32Gt => self.cmp_f32(stack, |a, b| a > b)?,
            Op::F32Le => self.cmp_f32(stack, |a, b| a <= b)?,
            Op::F32Ge => self.cmp_f32(stack, |a, b| a >= b)?,
            Op::F64Eq => self.cmp_f64(stack, |a, b| a == b)?,
            Op::F64Ne => self.cmp_f64(stack, |a, b| a != b)?,
            Op::F64Lt => self.cmp_f64(stack, |a, b| a < b)?,
            Op::F64Gt => self.cmp_f64(stack, |a, b| a > b)?,
            Op::F64Le => self.cmp_f64(stack, |a, b| a <= b)?,
            Op::F64Ge => self.cmp_f64(stack, |a, b| a >= b)?,

            Op::I32Clz => self.unop_i32(stack, |a| a.leading_zeros() as i32)?,
            Op::I32Ctz => self.unop_i32(stack, |a| a.trailing_zeros() as i32)?,
            Op::I32Popcnt => self.unop_i32(stack, |a| a.count_ones() as i32)?,
            Op::I32Add => self.binop_i32(stack, i32::wrapping_add)?,
            Op::I32Sub => self.binop_i32(stack, i32::wrapping_sub)?,
            Op::I32Mul => self.binop_i32(stack, i32::wrapping_mul)?,
            Op::I32DivS => self.binop_i32_trap(stack, |a, b| {
                if b == 0 {
                    Err(Trap::IntegerDivisionByZero)
                } else {
                    a.checked_div(b).ok_or(Trap::IntegerOverflow)
                }
            })?,
            Op::I32DivU => self.binop_i32_trap(stack, |a, b| {
                if b == 0 {
                    Err(Trap::IntegerDivisionByZero)
                } else {
                    Ok(((a as u32) / (b as u32)) as i32)
                }
            })?,
            Op::I32RemS => self.binop_i32_trap(stack, |a, b| {
                if b == 0 {
                    Err(Trap::IntegerDivisionByZero)
                } else {
                    Ok(a.wrapping_rem(b))
                }
            })?,
            Op::I32RemU => self.binop_i32_trap(stack, |a, b| {
                if b == 0 {
                    Err(Trap::IntegerDivisionByZero)
                } else {
                    Ok(((a as u32) % (b as u32)) as i32)
                }
            })?,
            Op::I32And => self.binop_i32(stack, |a, b| a & b)?,
            Op::I32Or => self.binop_i32(stack, |a, b| a | b)?,
            Op::I32Xor => self.binop_i32(stack, |a, b| a ^ b)?,
            Op::I32Shl => self.binop_i32(stack, |a, b| a.wrapping_shl(b as u32))?,
            Op::I32ShrS => self.binop_i32(stack, |a, b| a.wrapping_shr(b as u32))?,
            Op::I32ShrU => self.binop_i32(stack, |a, b| ((a as u32).wrapping_shr(b as u32)) as i32)?,
            Op::I32Rotl => self.binop_i32(stack, |a, b| a.rotate_left(b as u32))?,
            Op::I32Rotr => self.binop_i32(stack, |a, b| a.rotate_right(b as u32))?,
            Op::I64Clz => self.unop_i64(stack, |a| i64::from(a.leading_zeros()))?,
            Op::I64Ctz => self.unop_i64(stack, |a| i64::from(a.trailing_zeros()))?,
            Op::I64Popcnt => self.unop_i64(stack, |a| i64::from(a.count_ones()))?,
            Op::I64Add => self.binop_i64(stack, i64::wrapping_add)?,
            Op::I64Sub => self.binop_i64(stack, i64::wrapping_sub)?,
            Op::I64Mul => self.binop_i64(stack, i64::wrapping_mul)?,
            Op::I64DivS => self.binop_i64_trap(stack, |a, b| {
                if b == 0 {
                    Err(Trap::IntegerDivisionByZero)
                } else {
                    a.checked_div(b).ok_or(Trap::IntegerOverflow)
                }
            })?,
            Op::I64DivU => self.binop_i64_trap(stack, |a, b| {
                if b == 0 {
                    Err(Trap::IntegerDivisionByZero)
                } else {
                    Ok(((a as u64) / (b as u64)) as i64)
                }
            })?,
            Op::I64RemS => self.binop_i64_trap(stack, |a, b| {
                if b == 0 {
                    Err(Trap::IntegerDivisionByZero)
                } else {
                    Ok(a.wrapping_rem(b))
                }
            })?,
            Op::I64RemU => self.binop_i64_trap(stack, |a, b| {
                if b == 0 {
                    Err(Trap::IntegerDivisionByZero)
                } else {
                    Ok(((a as u64) % (b as u64)) as i64)
                }
            })?,
            Op::I64And => self.binop_i64(stack, |a, b| a & b)?,
            Op::I64Or => self.binop_i64(stack, |a, b| a | b)?,
            Op::I64Xor => self.binop_i64(stack, |a, b| a ^ b)?,
            Op::I64Shl => self.binop_i64(stack, |a, b| a.wrapping_shl(b as u32))?,
            Op::I64ShrS => self.binop_i64(stack, |a, b| a.wrapping_shr(b as u32))?,
            Op::I64ShrU => self.binop_i64(stack, |a, b| ((a as u64).wrapping_shr(b as u32)) as i64)?,
            Op::I64Rotl => self.binop_i64(stack, |a, b| a.rotate_left(b as u32))?,
            Op::I64Rotr => self.binop_i64(stack, |a, b| a.rotate_right(b as u32))?,

            Op::F32Abs => self.unop_f32(stack, f32::abs)?,
            Op::F32Neg => self.unop_f32(stack, |a| -a)?,
            Op::F32Ceil => self.unop_f32(stack, f32::ceil)?,
            Op::F32Floor => self.unop_f32(stack, f32::floor)?,
            Op::F32Trunc => self.unop_f32(stack, f32::trunc)?,
            Op::F32Nearest => self.unop_f32(stack, f32::round_ties_even)?,
            Op::F32Sqrt => self.unop_f32(stack, f32::sqrt)?,
            Op::F32Add => self.binop_f32(stack, |a, b| a + b)?,
            Op::F32Sub => self.binop_f32(stack, |a, b| a - b)?,
            Op::F32Mul => self.binop_f32(stack, |a, b| a * b)?,
            Op::F32Div => self.binop_f32(stack, |a, b| a / b)?,
            Op::F32Min => self.binop_f32(stack, wasm_fmin_32)?,
            Op::F32Max => self.binop_f32(stack, wasm_fmax_32)?,
            Op::F32Copysign => self.binop_f32(stack, f32::copysign)?,
            Op::F64Abs => self.unop_f64(stack, f64::abs)?,
            Op::F64Neg => self.unop_f64(stack, |a| -a)?,
            Op::F64Ceil => self.unop_f64(stack, f64::ceil)?,
            Op::F64Floor => self.unop_f64(stack, f64::floor)?,
            Op::F64Trunc => self.unop_f64(stack, f64::trunc)?,
            Op::F64Nearest => self.unop_f64(stack, f64::round_ties_even)?,
            Op::F64Sqrt => self.unop_f64(stack, f64::sqrt)?,
            Op::F64Add => self.binop_f64(stack, |a, b| a + b)?,
            Op::F64Sub => self.binop_f64(stack, |a, b| a - b)?,
            Op::F64Mul => self.binop_f64(stack, |a, b| a * b)?,
            Op::F64Div => self.binop_f64(stack, |a, b| a / b)?,
            Op::F64Min => self.binop_f64(stack, wasm_fmin_64)?,
            Op::F64Max => self.binop_f64(stack, wasm_fmax_64)?,
            Op::F64Copysign => self.binop_f64(stack, f64::copysign)?,

            Op::I32WrapI64 => {
                let a = self.pop_i64(stack)?;
                stack.push(Val::I32(a as i32));
            }
            Op::I32TruncF32S => {
                let a = self.pop_f32(stack)?;
                let v = trunc_to_i32(f64::from(a)).map_err(|t| self.raise(t))?;
                stack.push(Val::I32(v));
            }
            Op::I32TruncF32U => {
                let a = self.pop_f32(stack)?;
                let v = trunc_to_u32(f64::from(a)).map_err(|t| self.raise(t))?;
                stack.push(Val::I32(v as i32));
            }
            Op::I32TruncF64S => {
                let a = self.pop_f64(stack)?;
                let v = trunc_to_i32(a).map_err(|t| self.raise(t))?;
                stack.push(Val::I32(v));
            }
            Op::I32TruncF64U => {
                let a = self.pop_f64(stack)?;
                let v = trunc_to_u32(a).map_err(|t| self.raise(t))?;
                stack.push(Val::I32(v as i32));
            }
            Op::I64ExtendI32S => {
                let a = self.pop_i32(stack)?;
                stack.push(Val::I64(i64::from(a)));
            }
            Op::I64ExtendI32U => {
                let a = self.pop_i32(stack)?;
                stack.push(Val::I64(i64::from(a as u32)));
            }
            Op::I64TruncF32S => {
                let a = self.pop_f32(stack)?;
                let v = trunc_to_i64(f64::from(a)).map_err(|t| self.raise(t))?;
                stack.push(Val::I64(v));
            }
            Op::I64TruncF32U => {
                let a = self.pop_f32(stack)?;
                let v = trunc_to_u64(f64::from(a)).map_err(|t| self.raise(t))?;
                stack.push(Val::I64(v as i64));
            }
            Op::I64TruncF64S => {
                let a = self.pop_f64(stack)?;
                let v = trunc_to_i64(a).map_err(|t| self.raise(t))?;
                stack.push(Val::I64(v));
            }
            Op::I64TruncF64U => {
                let a = self.pop_f64(stack)?;
                let v = trunc_to_u64(a).map_err(|t| self.raise(t))?;
                stack.push(Val::I64(v as i64));
            }
            Op::F32ConvertI32S => {
                let a = self.pop_i32(stack)?;
                stack.push(Val::F32((a as f32).to_bits()));
            }
            Op::F32ConvertI32U => {
                let a = self.pop_i32(stack)?;
                stack.push(Val::F32((a as u32 as f32).to_bits()));
            }
            Op::F32ConvertI64S => {
                let a = self.pop_i64(stack)?;
                stack.push(Val::F32((a as f32).to_bits()));
            }
            Op::F32ConvertI64U => {
                let a = self.pop_i64(stack)?;
                stack.push(Val::F32((a as u64 as f32).to_bits()));
            }
            Op::F32DemoteF64 => {
                let a = self.pop_f64(stack)?;
                stack.push(Val::F32((a as f32).to_bits()));
            }
            Op::F64ConvertI32S => {
                let a = self.pop_i32(stack)?;
                stack.push(Val::F64(f64::from(a).to_bits()));
            }
            Op::F64ConvertI32U => {
                let a = self.pop_i32(stack)?;
                stack.push(Val::F64(f64::from(a as u32).to_bits()));
            }
            Op::F64ConvertI64S => {
                let a = self.pop_i64(stack)?;
                stack.push(Val::F64((a as f64).to_bits()));
            }
            Op::F64ConvertI64U => {
                let a = self.pop_i64(stack)?;
                stack.push(Val::F64((a as u64 as f64).to_bits()));
            }
            Op::F64PromoteF32 => {
                let a = self.pop_f32(stack)?;
                stack.push(Val::F64(f64::from(a).to_bits()));
            }
            Op::I32ReinterpretF32 => {
                let a = self.pop_f32_bits(stack)?;
                stack.push(Val::I32(a as i32));
            }
            Op::I64ReinterpretF64 => {
                let a = self.pop_f64_bits(stack)?;
                stack.push(Val::I64(a as i64));
            }
            Op::F32ReinterpretI32 => {
                let a = self.pop_i32(stack)?;
                stack.push(Val::F32(a as u32));
            }
            Op::F64ReinterpretI64 => {
                let a = self.pop_i64(stack)?;
                stack.push(Val::F64(a as u64));
            }

            Op::I32Extend8S => self.unop_i32(stack, |a| i32::from(a as i8))?,
            Op::I32Extend16S => self.unop_i32(stack, |a| i32::from(a as i16))?,
            Op::I64Extend8S => self.unop_i64(stack, |a| i64::from(a as i8))?,
            Op::I64Extend16S => self.unop_i64(stack, |a| i64::from(a as i16))?,
            Op::I64Extend32S => self.unop_i64(stack, |a| i64::from(a as i32))?,

            Op::I32TruncSatF32S => {
                let a = self.pop_f32(stack)?;
                stack.push(Val::I32(a as i32));
            }
            Op::I32TruncSatF32U => {
                let a = self.pop_f32(stack)?;
                stack.push(Val::I32(a as u32 as i32));
            }
            Op::I32TruncSatF64S => {
                let a = self.pop_f64(stack)?;
                stack.push(Val::I32(a as i32));
            }
            Op::I32TruncSatF64U => {
                let a = self.pop_f64(stack)?;
                stack.push(Val::I32(a as u32 as i32));
            }
            Op::I64TruncSatF32S => {
                let a = self.pop_f32(stack)?;
                stack.push(Val::I64(a as i64));
            }
            Op::I64TruncSatF32U => {
                let a = self.pop_f32(stack)?;
                stack.push(Val::I64(a as u64 as i64));
            }
            Op::I64TruncSatF64S => {
                let a = self.pop_f64(stack)?;
                stack.push(Val::I64(a as i64));
            }
            Op::I64TruncSatF64U => {
                let a = self.pop_f64(stack)?;
                stack.push(Val::I64(a as u64 as i64));
            }
        }
        Ok(Step::Next)
    }

    /// Pops the callee's arguments, performs the call, and pushes its
    /// results.
    fn call_into(&mut self, callee: Func, stack: &mut Vec<Val>) -> Result<(), Exception> {
        let param_count = match self.inner().funcs.get(callee.0) {
            Some(data) => data.ty.params().len(),
            None => return Err(self.raise(Trap::NullReference)),
        };
        let args = stack.split_off(stack.len().saturating_sub(param_count));
        let results = self.call(callee, &args)?;
        stack.extend(results);
        Ok(())
    }

    fn resolve_table_handle(
        &mut self,
        instance: Instance,
        index: crate::indices::TableIndex,
    ) -> Result<crate::Table, Exception> {
        match self
            .inner()
            .instances
            .get(instance.0)
            .and_then(|data| data.tables.get(index).copied())
        {
            Some(table) => Ok(table),
            None => Err(self.raise(Trap::TableOutOfBounds)),
        }
    }

    fn resolve_global(
        &mut self,
        instance: Instance,
        index: crate::indices::GlobalIndex,
    ) -> Option<(crate::Global, Val)> {
        let global = self
            .inner()
            .instances
            .get(instance.0)
            .and_then(|data| data.globals.get(index).copied())?;
        let value = self.inner().globals.get(global.0)?.get();
        Some((global, value))
    }

    fn load_bytes<const N: usize>(
        &mut self,
        memory: Option<Memory>,
        stack: &mut Vec<Val>,
        offset: u64,
    ) -> Result<[u8; N], Exception> {
        let base = self.pop_i32(stack)? as u32;
        let memory = match memory {
            Some(memory) => memory,
            None => return Err(self.raise(Trap::MemoryOutOfBounds)),
        };
        let addr = match u64::from(base).checked_add(offset) {
            Some(addr) => addr,
            None => return Err(self.raise(Trap::MemoryOutOfBounds)),
        };
        let slice = match self.inner().memories.get(memory.0) {
            Some(data) => data.slice(addr, N),
            None => Err(Trap::MemoryOutOfBounds),
        };
        match slice {
            Ok(slice) => {
                let mut bytes = [0; N];
                bytes.copy_from_slice(slice);
                Ok(bytes)
            }
            Err(trap) => Err(self.raise(trap)),
        }
    }

    fn store_bytes<const N: usize>(
        &mut self,
        memory: Option<Memory>,
        stack: &mut Vec<Val>,
        offset: u64,
        bytes: [u8; N],
    ) -> Result<(), Exception> {
        let base = self.pop_i32(stack)? as u32;
        let memory = match memory {
            Some(memory) => memory,
            None => return Err(self.raise(Trap::MemoryOutOfBounds)),
        };
        let addr = match u64::from(base).checked_add(offset) {
            Some(addr) => addr,
            None => return Err(self.raise(Trap::MemoryOutOfBounds)),
        };
        let result = match self.inner().memories.get_mut(memory.0) {
            Some(data) => data.slice_mut(addr, N).map(|slice| {
                slice.copy_from_slice(&bytes);
            }),
            None => Err(Trap::MemoryOutOfBounds),
        };
        result.map_err(|trap| self.raise(trap))
    }

    // Value-stack helpers. Validated bodies never pop the wrong type; IR
    // built by hand might, which surfaces as an `unreachable` trap instead
    // of corrupting state.

    fn pop(&mut self, stack: &mut Vec<Val>) -> Result<Val, Exception> {
        match stack.pop() {
            Some(value) => Ok(value),
            None => Err(self.raise(Trap::UnreachableCodeReached)),
        }
    }

    fn pop_i32(&mut self, stack: &mut Vec<Val>) -> Result<i32, Exception> {
        match stack.pop() {
            Some(Val::I32(value)) => Ok(value),
            _ => Err(self.raise(Trap::UnreachableCodeReached)),
        }
    }

    fn pop_i64(&mut self, stack: &mut Vec<Val>) -> Result<i64, Exception> {
        match stack.pop() {
            Some(Val::I64(value)) => Ok(value),
            _ => Err(self.raise(Trap::UnreachableCodeReached)),
        }
    }

    fn pop_f32_bits(&mut self, stack: &mut Vec<Val>) -> Result<u32, Exception> {
        match stack.pop() {
            Some(Val::F32(bits)) => Ok(bits),
            _ => Err(self.raise(Trap::UnreachableCodeReached)),
        }
    }

    fn pop_f64_bits(&mut self, stack: &mut Vec<Val>) -> Result<u64, Exception> {
        match stack.pop() {
            Some(Val::F64(bits)) => Ok(bits),
            _ => Err(self.raise(Trap::UnreachableCodeReached)),
        }
    }

    fn pop_f32(&mut self, stack: &mut Vec<Val>) -> Result<f32, Exception> {
        self.pop_f32_bits(stack).map(f32::from_bits)
    }

    fn pop_f64(&mut self, stack: &mut Vec<Val>) -> Result<f64, Exception> {
        self.pop_f64_bits(stack).map(f64::from_bits)
    }

    fn pop_ref(&mut self, stack: &mut Vec<Val>) -> Result<Ref, Exception> {
        match stack.pop() {
            Some(Val::FuncRef(f)) => Ok(Ref::Func(f)),
            Some(Val::AnyRef(r)) => Ok(Ref::Any(r)),
            _ => Err(self.raise(Trap::UnreachableCodeReached)),
        }
    }

    fn binop_i32(
        &mut self,
        stack: &mut Vec<Val>,
        f: impl FnOnce(i32, i32) -> i32,
    ) -> Result<(), Exception> {
        let b = self.pop_i32(stack)?;
        let a = self.pop_i32(stack)?;
        stack.push(Val::I32(f(a, b)));
        Ok(())
    }

    fn binop_i32_trap(
        &mut self,
        stack: &mut Vec<Val>,
        f: impl FnOnce(i32, i32) -> Result<i32, Trap>,
    ) -> Result<(), Exception> {
        let b = self.pop_i32(stack)?;
        let a = self.pop_i32(stack)?;
        match f(a, b) {
            Ok(value) => {
                stack.push(Val::I32(value));
                Ok(())
            }
            Err(trap) => Err(self.raise(trap)),
        }
    }

    fn binop_i64(
        &mut self,
        stack: &mut Vec<Val>,
        f: impl FnOnce(i64, i64) -> i64,
    ) -> Result<(), Exception> {
        let b = self.pop_i64(stack)?;
        let a = self.pop_i64(stack)?;
        stack.push(Val::I64(f(a, b)));
        Ok(())
    }

    fn binop_i64_trap(
        &mut self,
        stack: &mut Vec<Val>,
        f: impl FnOnce(i64, i64) -> Result<i64, Trap>,
    ) -> Result<(), Exception> {
        let b = self.pop_i64(stack)?;
        let a = self.pop_i64(stack)?;
        match f(a, b) {
            Ok(value) => {
                stack.push(Val::I64(value));
                Ok(())
            }
            Err(trap) => Err(self.raise(trap)),
        }
    }

    fn binop_f32(
        &mut self,
        stack: &mut Vec<Val>,
        f: impl FnOnce(f32, f32) -> f32,
    ) -> Result<(), Exception> {
        let b = self.pop_f32(stack)?;
        let a = self.pop_f32(stack)?;
        stack.push(Val::F32(f(a, b).to_bits()));
        Ok(())
    }

    fn binop_f64(
        &mut self,
        stack: &mut Vec<Val>,
        f: impl FnOnce(f64, f64) -> f64,
    ) -> Result<(), Exception> {
        let b = self.pop_f64(stack)?;
        let a = self.pop_f64(stack)?;
        stack.push(Val::F64(f(a, b).to_bits()));
        Ok(())
    }

    fn unop_i32(
        &mut self,
        stack: &mut Vec<Val>,
        f: impl FnOnce(i32) -> i32,
    ) -> Result<(), Exception> {
        let a = self.pop_i32(stack)?;
        stack.push(Val::I32(f(a)));
        Ok(())
    }

    fn unop_i64(
        &mut self,
        stack: &mut Vec<Val>,
        f: impl FnOnce(i64) -> i64,
    ) -> Result<(), Exception> {
        let a = self.pop_i64(stack)?;
        stack.push(Val::I64(f(a)));
        Ok(())
    }

    fn unop_f32(
        &mut self,
        stack: &mut Vec<Val>,
        f: impl FnOnce(f32) -> f32,
    ) -> Result<(), Exception> {
        let a = self.pop_f32(stack)?;
        stack.push(Val::F32(f(a).to_bits()));
        Ok(())
    }

    fn unop_f64(
        &mut self,
        stack: &mut Vec<Val>,
        f: impl FnOnce(f64) -> f64,
    ) -> Result<(), Exception> {
        let a = self.pop_f64(stack)?;
        stack.push(Val::F64(f(a).to_bits()));
        Ok(())
    }

    fn cmp_i32(
        &mut self,
        stack: &mut Vec<Val>,
        f: impl FnOnce(i32, i32) -> bool,
    ) -> Result<(), Exception> {
        let b = self.pop_i32(stack)?;
        let a = self.pop_i32(stack)?;
        stack.push(Val::I32(i32::from(f(a, b))));
        Ok(())
    }

    fn cmp_i64(
        &mut self,
        stack: &mut Vec<Val>,
        f: impl FnOnce(i64, i64) -> bool,
    ) -> Result<(), Exception> {
        let b = self.pop_i64(stack)?;
        let a = self.pop_i64(stack)?;
        stack.push(Val::I32(i32::from(f(a, b))));
        Ok(())
    }

    fn cmp_f32(
        &mut self,
        stack: &mut Vec<Val>,
        f: impl FnOnce(f32, f32) -> bool,
    ) -> Result<(), Exception> {
        let b = self.pop_f32(stack)?;
        let a = self.pop_f32(stack)?;
        stack.push(Val::I32(i32::from(f(a, b))));
        Ok(())
    }

    fn cmp_f64(
        &mut self,
        stack: &mut Vec<Val>,
        f: impl FnOnce(f64, f64) -> bool,
    ) -> Result<(), Exception> {
        let b = self.pop_f64(stack)?;
        let a = self.pop_f64(stack)?;
        stack.push(Val::I32(i32::from(f(a, b))));
        Ok(())
    }
}

/// Transfers control to the label `depth` levels up, carrying its branch
/// arity of values from the stack. `None` means the branch targeted the
/// function-level label, i.e. a return.
fn branch(depth: u32, labels: &mut Vec<Label>, stack: &mut Vec<Val>) -> Option<usize> {
    let depth = depth as usize;
    if depth >= labels.len() {
        return None;
    }
    let index = labels.len() - 1 - depth;
    let label = &labels[index];
    let arity = if label.is_loop {
        label.sig.params
    } else {
        label.sig.results
    } as usize;
    let kept = stack.split_off(stack.len().saturating_sub(arity));
    stack.truncate(label.stack_base);
    stack.extend(kept);

    let target = if label.is_loop {
        // Jump back to the `loop` op, which pushes the label afresh.
        label.target as usize
    } else {
        label.target as usize + 1
    };
    labels.truncate(index);
    Some(target)
}

/// Branch used by `try_table` catch dispatch: carries `values` to the target
/// label instead of values from the stack.
fn branch_with(
    depth: u32,
    labels: &mut Vec<Label>,
    stack: &mut Vec<Val>,
    values: &[Val],
) -> Option<usize> {
    let depth = depth as usize;
    if depth >= labels.len() {
        stack.extend_from_slice(values);
        return None;
    }
    let index = labels.len() - 1 - depth;
    let label = &labels[index];
    stack.truncate(label.stack_base);
    stack.extend_from_slice(values);
    let target = if label.is_loop {
        label.target as usize
    } else {
        label.target as usize + 1
    };
    labels.truncate(index);
    Some(target)
}

fn wasm_fmin_32(a: f32, b: f32) -> f32 {
    if a.is_nan() || b.is_nan() {
        f32::NAN
    } else if a == b {
        if a.is_sign_negative() {
            a
        } else {
            b
        }
    } else if a < b {
        a
    } else {
        b
    }
}

fn wasm_fmax_32(a: f32, b: f32) -> f32 {
    if a.is_nan() || b.is_nan() {
        f32::NAN
    } else if a == b {
        if a.is_sign_negative() {
            b
        } else {
            a
        }
    } else if a > b {
        a
    } else {
        b
    }
}

fn wasm_fmin_64(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else if a == b {
        if a.is_sign_negative() {
            a
        } else {
            b
        }
    } else if a < b {
        a
    } else {
        b
    }
}

fn wasm_fmax_64(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else if a == b {
        if a.is_sign_negative() {
            b
        } else {
            a
        }
    } else if a > b {
        a
    } else {
        b
    }
}

fn trunc_to_i32(value: f64) -> Result<i32, Trap> {
    if value.is_nan() {
        return Err(Trap::BadConversionToInteger);
    }
    let value = value.trunc();
    if value >= 2_147_483_648.0 || value < -2_147_483_648.0 {
        return Err(Trap::IntegerOverflow);
    }
    Ok(value as i32)
}

fn trunc_to_u32(value: f64) -> Result<u32, Trap> {
    if value.is_nan() {
        return Err(Trap::BadConversionToInteger);
    }
    let value = value.trunc();
    if value >= 4_294_967_296.0 || value <= -1.0 {
        return Err(Trap::IntegerOverflow);
    }
    Ok(value as u32)
}

fn trunc_to_i64(value: f64) -> Result<i64, Trap> {
    if value.is_nan() {
        return Err(Trap::BadConversionToInteger);
    }
    let value = value.trunc();
    if value >= 9_223_372_036_854_775_808.0 || value < -9_223_372_036_854_775_808.0 {
        return Err(Trap::IntegerOverflow);
    }
    Ok(value as i64)
}

fn trunc_to_u64(value: f64) -> Result<u64, Trap> {
    if value.is_nan() {
        return Err(Trap::BadConversionToInteger);
    }
    let value = value.trunc();
    if value >= 18_446_744_073_709_551_616.0 || value <= -1.0 {
        return Err(Trap::IntegerOverflow);
    }
    Ok(value as u64)
}
