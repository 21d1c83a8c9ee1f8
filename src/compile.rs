// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The code generator: lowers validated function bodies into an executable
//! form.
//!
//! The output is a [`CompiledModule`], opaque to the rest of the core. Each
//! body becomes a flat vector of [`Op`]s whose structured-control operators
//! carry resolved jump targets, so the evaluator never has to scan for a
//! matching `end` at run time.

use cranelift_entity::PrimaryMap;
use wasmparser::{BinaryReader, ConstExpr, Operator};

use crate::indices::{DefinedFuncIndex, FuncIndex, GlobalIndex, TableIndex, TagIndex};
use crate::module::Module;
use crate::types::{FuncType, ValType};

/// A failure to lower a function body.
#[derive(onlyerror::Error, Debug)]
pub enum CompileError {
    /// The body uses an operator outside the supported feature set.
    #[error("unsupported operator `{0}`")]
    UnsupportedOperator(String),
    /// The body bytes do not decode. Validated modules never hit this; IR
    /// built by hand can.
    #[error("malformed function body: {0}")]
    MalformedBody(String),
}

/// A module lowered to executable form, together with the IR it came from.
#[derive(Debug)]
pub struct CompiledModule {
    pub module: Module,
    pub(crate) code: PrimaryMap<DefinedFuncIndex, CodeBody>,
}

#[derive(Debug)]
pub(crate) struct CodeBody {
    /// Declared locals, excluding parameters.
    pub locals: Box<[ValType]>,
    pub ops: Box<[Op]>,
}

/// Parameter and result arity of a block.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct BlockSig {
    pub params: u32,
    pub results: u32,
}

/// One catch clause of a `try_table`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TryTableCatch {
    /// `None` is catch_all.
    pub tag: Option<TagIndex>,
    pub label: u32,
}

const UNPATCHED: u32 = u32::MAX;

/// A lowered operator. Jump targets are op indices within the body.
#[derive(Debug, Clone)]
pub(crate) enum Op {
    Unreachable,
    Nop,
    Block { sig: BlockSig, end: u32 },
    Loop { sig: BlockSig },
    If { sig: BlockSig, else_: u32, end: u32 },
    Else { end: u32 },
    End,
    Br { depth: u32 },
    BrIf { depth: u32 },
    BrTable { targets: Box<[u32]>, default: u32 },
    Return,
    Call { func: FuncIndex },
    CallIndirect { ty: FuncType, table: TableIndex },

    Try { sig: BlockSig, end: u32, catches: Box<[(Option<TagIndex>, u32)]>, delegate: Option<u32> },
    Catch { end: u32 },
    CatchAll { end: u32 },
    Delegate,
    Rethrow { depth: u32 },
    Throw { tag: TagIndex },
    TryTable { sig: BlockSig, end: u32, catches: Box<[TryTableCatch]> },

    Drop,
    Select,

    LocalGet(u32),
    LocalSet(u32),
    LocalTee(u32),
    GlobalGet(GlobalIndex),
    GlobalSet(GlobalIndex),

    TableGet(TableIndex),
    TableSet(TableIndex),
    TableSize(TableIndex),
    TableGrow(TableIndex),
    TableFill(TableIndex),

    I32Load(u64),
    I64Load(u64),
    F32Load(u64),
    F64Load(u64),
    I32Load8S(u64),
    I32Load8U(u64),
    I32Load16S(u64),
    I32Load16U(u64),
    I64Load8S(u64),
    I64Load8U(u64),
    I64Load16S(u64),
    I64Load16U(u64),
    I64Load32S(u64),
    I64Load32U(u64),
    I32Store(u64),
    I64Store(u64),
    F32Store(u64),
    F64Store(u64),
    I32Store8(u64),
    I32Store16(u64),
    I64Store8(u64),
    I64Store16(u64),
    I64Store32(u64),
    MemorySize,
    MemoryGrow,

    I32Const(i32),
    I64Const(i64),
    F32Const(u32),
    F64Const(u64),

    RefNull(ValType),
    RefIsNull,
    RefFunc(FuncIndex),

    I32Eqz,
    I32Eq,
    I32Ne,
    I32LtS,
    I32LtU,
    I32GtS,
    I32GtU,
    I32LeS,
    I32LeU,
    I32GeS,
    I32GeU,
    I64Eqz,
    I64Eq,
    I64Ne,
    I64LtS,
    I64LtU,
    I64GtS,
    I64GtU,
    I64LeS,
    I64LeU,
    I64GeS,
    I64GeU,
    F32Eq,
    F32Ne,
    F32Lt,
    F32Gt,
    F32Le,
    F32Ge,
    F64Eq,
    F64Ne,
    F64Lt,
    F64Gt,
    F64Le,
    F64Ge,

    I32Clz,
    I32Ctz,
    I32Popcnt,
    I32Add,
    I32Sub,
    I32Mul,
    I32DivS,
    I32DivU,
    I32RemS,
    I32RemU,
    I32And,
    I32Or,
    I32Xor,
    I32Shl,
    I32ShrS,
    I32ShrU,
    I32Rotl,
    I32Rotr,
    I64Clz,
    I64Ctz,
    I64Popcnt,
    I64Add,
    I64Sub,
    I64Mul,
    I64DivS,
    I64DivU,
    I64RemS,
    I64RemU,
    I64And,
    I64Or,
    I64Xor,
    I64Shl,
    I64ShrS,
    I64ShrU,
    I64Rotl,
    I64Rotr,

    F32Abs,
    F32Neg,
    F32Ceil,
    F32Floor,
    F32Trunc,
    F32Nearest,
    F32Sqrt,
    F32Add,
    F32Sub,
    F32Mul,
    F32Div,
    F32Min,
    F32Max,
    F32Copysign,
    F64Abs,
    F64Neg,
    F64Ceil,
    F64Floor,
    F64Trunc,
    F64Nearest,
    F64Sqrt,
    F64Add,
    F64Sub,
    F64Mul,
    F64Div,
    F64Min,
    F64Max,
    F64Copysign,

    I32WrapI64,
    I32TruncF32S,
    I32TruncF32U,
    I32TruncF64S,
    I32TruncF64U,
    I64ExtendI32S,
    I64ExtendI32U,
    I64TruncF32S,
    I64TruncF32U,
    I64TruncF64S,
    I64TruncF64U,
    F32ConvertI32S,
    F32ConvertI32U,
    F32ConvertI64S,
    F32ConvertI64U,
    F32DemoteF64,
    F64ConvertI32S,
    F64ConvertI32U,
    F64ConvertI64S,
    F64ConvertI64U,
    F64PromoteF32,
    I32ReinterpretF32,
    I64ReinterpretF64,
    F32ReinterpretI32,
    F64ReinterpretI64,

    I32Extend8S,
    I32Extend16S,
    I64Extend8S,
    I64Extend16S,
    I64Extend32S,

    I32TruncSatF32S,
    I32TruncSatF32U,
    I32TruncSatF64S,
    I32TruncSatF64U,
    I64TruncSatF32S,
    I64TruncSatF32U,
    I64TruncSatF64S,
    I64TruncSatF64U,
}

/// Lowers every function body of `module`, consuming the IR into a
/// [`CompiledModule`].
pub fn compile_module(module: Module) -> Result<CompiledModule, CompileError> {
    let mut code = PrimaryMap::with_capacity(module.function_bodies.len());
    for (defined_index, body) in module.function_bodies.iter() {
        let lowered = lower_body(&module, &body.bytes, body.offset).map_err(|error| {
            tracing::debug!(
                "lowering function {} failed: {error}",
                module.func_index(defined_index).as_u32()
            );
            error
        })?;
        code.push(CodeBody {
            locals: body.locals.clone().into_boxed_slice(),
            ops: lowered,
        });
    }

    tracing::trace!("compiled {} function bodies", code.len());
    Ok(CompiledModule { module, code })
}

enum FrameKind {
    Block,
    Loop,
    If { else_index: Option<usize> },
    Try { catches: Vec<(Option<TagIndex>, u32)> },
    TryTable,
}

struct ControlFrame {
    kind: FrameKind,
    op_index: usize,
}

fn block_sig(module: &Module, blockty: wasmparser::BlockType) -> BlockSig {
    match blockty {
        wasmparser::BlockType::Empty => BlockSig {
            params: 0,
            results: 0,
        },
        wasmparser::BlockType::Type(_) => BlockSig {
            params: 0,
            results: 1,
        },
        wasmparser::BlockType::FuncType(index) => {
            let ty = module.types[crate::indices::TypeIndex::from_u32(index)];
            BlockSig {
                params: ty.params().len() as u32,
                results: ty.results().len() as u32,
            }
        }
    }
}

fn lower_body(module: &Module, bytes: &[u8], offset: usize) -> Result<Box<[Op]>, CompileError> {
    let mut ops: Vec<Op> = Vec::new();
    let mut control: Vec<ControlFrame> = Vec::new();

    let mut reader = ConstExpr::new(BinaryReader::new(bytes, offset)).get_operators_reader();
    while !reader.eof() {
        let op = reader
            .read()
            .map_err(|e| CompileError::MalformedBody(e.message().to_string()))?;
        let pc = ops.len();

        match op {
            Operator::Block { blockty } => {
                control.push(ControlFrame {
                    kind: FrameKind::Block,
                    op_index: pc,
                });
                ops.push(Op::Block {
                    sig: block_sig(module, blockty),
                    end: UNPATCHED,
                });
            }
            Operator::Loop { blockty } => {
                control.push(ControlFrame {
                    kind: FrameKind::Loop,
                    op_index: pc,
                });
                ops.push(Op::Loop {
                    sig: block_sig(module, blockty),
                });
            }
            Operator::If { blockty } => {
                control.push(ControlFrame {
                    kind: FrameKind::If { else_index: None },
                    op_index: pc,
                });
                ops.push(Op::If {
                    sig: block_sig(module, blockty),
                    else_: UNPATCHED,
                    end: UNPATCHED,
                });
            }
            Operator::Else => {
                let frame = control
                    .last_mut()
                    .ok_or_else(|| CompileError::MalformedBody("else outside if".into()))?;
                let FrameKind::If { else_index } = &mut frame.kind else {
                    return Err(CompileError::MalformedBody("else outside if".into()));
                };
                *else_index = Some(pc);
                let Op::If { else_, .. } = &mut ops[frame.op_index] else {
                    unreachable!()
                };
                *else_ = pc as u32;
                ops.push(Op::Else { end: UNPATCHED });
            }
            Operator::Try { blockty } => {
                control.push(ControlFrame {
                    kind: FrameKind::Try {
                        catches: Vec::new(),
                    },
                    op_index: pc,
                });
                ops.push(Op::Try {
                    sig: block_sig(module, blockty),
                    end: UNPATCHED,
                    catches: Box::new([]),
                    delegate: None,
                });
            }
            Operator::Catch { tag_index } => {
                let frame = control
                    .last_mut()
                    .ok_or_else(|| CompileError::MalformedBody("catch outside try".into()))?;
                let FrameKind::Try { catches } = &mut frame.kind else {
                    return Err(CompileError::MalformedBody("catch outside try".into()));
                };
                catches.push((Some(TagIndex::from_u32(tag_index)), pc as u32));
                ops.push(Op::Catch { end: UNPATCHED });
            }
            Operator::CatchAll => {
                let frame = control
                    .last_mut()
                    .ok_or_else(|| CompileError::MalformedBody("catch_all outside try".into()))?;
                let FrameKind::Try { catches } = &mut frame.kind else {
                    return Err(CompileError::MalformedBody("catch_all outside try".into()));
                };
                catches.push((None, pc as u32));
                ops.push(Op::CatchAll { end: UNPATCHED });
            }
            Operator::Delegate { relative_depth } => {
                // `delegate` terminates its `try` block.
                let frame = control
                    .pop()
                    .ok_or_else(|| CompileError::MalformedBody("delegate outside try".into()))?;
                let FrameKind::Try { catches } = frame.kind else {
                    return Err(CompileError::MalformedBody("delegate outside try".into()));
                };
                if !catches.is_empty() {
                    return Err(CompileError::MalformedBody(
                        "delegate on a try with catch handlers".into(),
                    ));
                }
                let Op::Try { end, delegate, .. } = &mut ops[frame.op_index] else {
                    unreachable!()
                };
                *end = pc as u32;
                *delegate = Some(relative_depth);
                ops.push(Op::Delegate);
            }
            Operator::TryTable { try_table } => {
                let mut catches = Vec::with_capacity(try_table.catches.len());
                for catch in &try_table.catches {
                    match *catch {
                        wasmparser::Catch::One { tag, label } => catches.push(TryTableCatch {
                            tag: Some(TagIndex::from_u32(tag)),
                            label,
                        }),
                        wasmparser::Catch::All { label } => {
                            catches.push(TryTableCatch { tag: None, label })
                        }
                        wasmparser::Catch::OneRef { .. } | wasmparser::Catch::AllRef { .. } => {
                            return Err(CompileError::UnsupportedOperator("catch_ref".into()))
                        }
                    }
                }
                control.push(ControlFrame {
                    kind: FrameKind::TryTable,
                    op_index: pc,
                });
                ops.push(Op::TryTable {
                    sig: block_sig(module, try_table.ty),
                    end: UNPATCHED,
                    catches: catches.into_boxed_slice(),
                });
            }
            Operator::End => {
                if let Some(frame) = control.pop() {
                    let end = pc as u32;
                    match frame.kind {
                        FrameKind::Block => {
                            let Op::Block { end: slot, .. } = &mut ops[frame.op_index] else {
                                unreachable!()
                            };
                            *slot = end;
                        }
                        FrameKind::Loop => {}
                        FrameKind::If { else_index } => {
                            let Op::If {
                                else_: else_slot,
                                end: end_slot,
                                ..
                            } = &mut ops[frame.op_index]
                            else {
                                unreachable!()
                            };
                            *end_slot = end;
                            if else_index.is_none() {
                                *else_slot = end;
                            }
                            if let Some(else_index) = else_index {
                                let Op::Else { end: slot } = &mut ops[else_index] else {
                                    unreachable!()
                                };
                                *slot = end;
                            }
                        }
                        FrameKind::Try { catches } => {
                            for (_, handler) in &catches {
                                match &mut ops[*handler as usize] {
                                    Op::Catch { end: slot } | Op::CatchAll { end: slot } => {
                                        *slot = end
                                    }
                                    _ => unreachable!(),
                                }
                            }
                            let Op::Try {
                                end: slot,
                                catches: catches_slot,
                                ..
                            } = &mut ops[frame.op_index]
                            else {
                                unreachable!()
                            };
                            *slot = end;
                            *catches_slot = catches.into_boxed_slice();
                        }
                        FrameKind::TryTable => {
                            let Op::TryTable { end: slot, .. } = &mut ops[frame.op_index] else {
                                unreachable!()
                            };
                            *slot = end;
                        }
                    }
                }
                ops.push(Op::End);
            }
            Operator::Br { relative_depth } => ops.push(Op::Br {
                depth: relative_depth,
            }),
            Operator::BrIf { relative_depth } => ops.push(Op::BrIf {
                depth: relative_depth,
            }),
            Operator::BrTable { targets } => {
                let default = targets.default();
                let targets = targets
                    .targets()
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| CompileError::MalformedBody(e.message().to_string()))?;
                ops.push(Op::BrTable {
                    targets: targets.into_boxed_slice(),
                    default,
                });
            }
            Operator::Return => ops.push(Op::Return),
            Operator::Call { function_index } => ops.push(Op::Call {
                func: FuncIndex::from_u32(function_index),
            }),
            Operator::CallIndirect {
                type_index,
                table_index,
            } => ops.push(Op::CallIndirect {
                ty: module.types[crate::indices::TypeIndex::from_u32(type_index)],
                table: TableIndex::from_u32(table_index),
            }),
            Operator::Throw { tag_index } => ops.push(Op::Throw {
                tag: TagIndex::from_u32(tag_index),
            }),
            Operator::Rethrow { relative_depth } => ops.push(Op::Rethrow {
                depth: relative_depth,
            }),

            op => {
                let lowered = lower_simple(&op)
                    .ok_or_else(|| CompileError::UnsupportedOperator(format!("{op:?}")))?;
                ops.push(lowered);
            }
        }
    }

    if !control.is_empty() {
        return Err(CompileError::MalformedBody(
            "unterminated block structure".into(),
        ));
    }
    Ok(ops.into_boxed_slice())
}

/// Lowers the operators that translate 1:1 without control-flow bookkeeping.
fn lower_simple(op: &Operator<'_>) -> Option<Op> {
    use Operator as O;

    Some(match *op {
        O::Unreachable => Op::Unreachable,
        O::Nop => Op::Nop,
        O::Drop => Op::Drop,
        O::Select => Op::Select,
        O::TypedSelect { .. } => Op::Select,

        O::LocalGet { local_index } => Op::LocalGet(local_index),
        O::LocalSet { local_index } => Op::LocalSet(local_index),
        O::LocalTee { local_index } => Op::LocalTee(local_index),
        O::GlobalGet { global_index } => Op::GlobalGet(GlobalIndex::from_u32(global_index)),
        O::GlobalSet { global_index } => Op::GlobalSet(GlobalIndex::from_u32(global_index)),

        O::TableGet { table } => Op::TableGet(TableIndex::from_u32(table)),
        O::TableSet { table } => Op::TableSet(TableIndex::from_u32(table)),
        O::TableSize { table } => Op::TableSize(TableIndex::from_u32(table)),
        O::TableGrow { table } => Op::TableGrow(TableIndex::from_u32(table)),
        O::TableFill { table } => Op::TableFill(TableIndex::from_u32(table)),

        O::I32Load { memarg } => Op::I32Load(memarg.offset),
        O::I64Load { memarg } => Op::I64Load(memarg.offset),
        O::F32Load { memarg } => Op::F32Load(memarg.offset),
        O::F64Load { memarg } => Op::F64Load(memarg.offset),
        O::I32Load8S { memarg } => Op::I32Load8S(memarg.offset),
        O::I32Load8U { memarg } => Op::I32Load8U(memarg.offset),
        O::I32Load16S { memarg } => Op::I32Load16S(memarg.offset),
        O::I32Load16U { memarg } => Op::I32Load16U(memarg.offset),
        O::I64Load8S { memarg } => Op::I64Load8S(memarg.offset),
        O::I64Load8U { memarg } => Op::I64Load8U(memarg.offset),
        O::I64Load16S { memarg } => Op::I64Load16S(memarg.offset),
        O::I64Load16U { memarg } => Op::I64Load16U(memarg.offset),
        O::I64Load32S { memarg } => Op::I64Load32S(memarg.offset),
        O::I64Load32U { memarg } => Op::I64Load32U(memarg.offset),
        O::I32Store { memarg } => Op::I32Store(memarg.offset),
        O::I64Store { memarg } => Op::I64Store(memarg.offset),
        O::F32Store { memarg } => Op::F32Store(memarg.offset),
        O::F64Store { memarg } => Op::F64Store(memarg.offset),
        O::I32Store8 { memarg } => Op::I32Store8(memarg.offset),
        O::I32Store16 { memarg } => Op::I32Store16(memarg.offset),
        O::I64Store8 { memarg } => Op::I64Store8(memarg.offset),
        O::I64Store16 { memarg } => Op::I64Store16(memarg.offset),
        O::I64Store32 { memarg } => Op::I64Store32(memarg.offset),
        O::MemorySize { .. } => Op::MemorySize,
        O::MemoryGrow { .. } => Op::MemoryGrow,

        O::I32Const { value } => Op::I32Const(value),
        O::I64Const { value } => Op::I64Const(value),
        O::F32Const { value } => Op::F32Const(value.bits()),
        O::F64Const { value } => Op::F64Const(value.bits()),

        O::RefNull { hty } => Op::RefNull(match hty {
            wasmparser::HeapType::Abstract {
                ty: wasmparser::AbstractHeapType::Func,
                ..
            } => ValType::AnyFunc,
            _ => ValType::AnyRef,
        }),
        O::RefIsNull => Op::RefIsNull,
        O::RefFunc { function_index } => Op::RefFunc(FuncIndex::from_u32(function_index)),

        O::I32Eqz => Op::I32Eqz,
        O::I32Eq => Op::I32Eq,
        O::I32Ne => Op::I32Ne,
        O::I32LtS => Op::I32LtS,
        O::I32LtU => Op::I32LtU,
        O::I32GtS => Op::I32GtS,
        O::I32GtU => Op::I32GtU,
        O::I32LeS => Op::I32LeS,
        O::I32LeU => Op::I32LeU,
        O::I32GeS => Op::I32GeS,
        O::I32GeU => Op::I32GeU,
        O::I64Eqz => Op::I64Eqz,
        O::I64Eq => Op::I64Eq,
        O::I64Ne => Op::I64Ne,
        O::I64LtS => Op::I64LtS,
        O::I64LtU => Op::I64LtU,
        O::I64GtS => Op::I64GtS,
        O::I64GtU => Op::I64GtU,
        O::I64LeS => Op::I64LeS,
        O::I64LeU => Op::I64LeU,
        O::I64GeS => Op::I64GeS,
        O::I64GeU => Op::I64GeU,
        O::F32Eq => Op::F32Eq,
        O::F32Ne => Op::F32Ne,
        O::F32Lt => Op::F32Lt,
        O::F32Gt => Op::F32Gt,
        O::F32Le => Op::F32Le,
        O::F32Ge => Op::F32Ge,
        O::F64Eq => Op::F64Eq,
        O::F64Ne => Op::F64Ne,
        O::F64Lt => Op::F64Lt,
        O::F64Gt => Op::F64Gt,
        O::F64Le => Op::F64Le,
        O::F64Ge => Op::F64Ge,

        O::I32Clz => Op::I32Clz,
        O::I32Ctz => Op::I32Ctz,
        O::I32Popcnt => Op::I32Popcnt,
        O::I32Add => Op::I32Add,
        O::I32Sub => Op::I32Sub,
        O::I32Mul => Op::I32Mul,
        O::I32DivS => Op::I32DivS,
        O::I32DivU => Op::I32DivU,
        O::I32RemS => Op::I32RemS,
        O::I32RemU => Op::I32RemU,
        O::I32And => Op::I32And,
        O::I32Or => Op::I32Or,
        O::I32Xor => Op::I32Xor,
        O::I32Shl => Op::I32Shl,
        O::I32ShrS => Op::I32ShrS,
        O::I32ShrU => Op::I32ShrU,
        O::I32Rotl => Op::I32Rotl,
        O::I32Rotr => Op::I32Rotr,
        O::I64Clz => Op::I64Clz,
        O::I64Ctz => Op::I64Ctz,
        O::I64Popcnt => Op::I64Popcnt,
        O::I64Add => Op::I64Add,
        O::I64Sub => Op::I64Sub,
        O::I64Mul => Op::I64Mul,
        O::I64DivS => Op::I64DivS,
        O::I64DivU => Op::I64DivU,
        O::I64RemS => Op::I64RemS,
        O::I64RemU => Op::I64RemU,
        O::I64And => Op::I64And,
        O::I64Or => Op::I64Or,
        O::I64Xor => Op::I64Xor,
        O::I64Shl => Op::I64Shl,
        O::I64ShrS => Op::I64ShrS,
        O::I64ShrU => Op::I64ShrU,
        O::I64Rotl => Op::I64Rotl,
        O::I64Rotr => Op::I64Rotr,

        O::F32Abs => Op::F32Abs,
        O::F32Neg => Op::F32Neg,
        O::F32Ceil => Op::F32Ceil,
        O::F32Floor => Op::F32Floor,
        O::F32Trunc => Op::F32Trunc,
        O::F32Nearest => Op::F32Nearest,
        O::F32Sqrt => Op::F32Sqrt,
        O::F32Add => Op::F32Add,
        O::F32Sub => Op::F32Sub,
        O::F32Mul => Op::F32Mul,
        O::F32Div => Op::F32Div,
        O::F32Min => Op::F32Min,
        O::F32Max => Op::F32Max,
        O::F32Copysign => Op::F32Copysign,
        O::F64Abs => Op::F64Abs,
        O::F64Neg => Op::F64Neg,
        O::F64Ceil => Op::F64Ceil,
        O::F64Floor => Op::F64Floor,
        O::F64Trunc => Op::F64Trunc,
        O::F64Nearest => Op::F64Nearest,
        O::F64Sqrt => Op::F64Sqrt,
        O::F64Add => Op::F64Add,
        O::F64Sub => Op::F64Sub,
        O::F64Mul => Op::F64Mul,
        O::F64Div => Op::F64Div,
        O::F64Min => Op::F64Min,
        O::F64Max => Op::F64Max,
        O::F64Copysign => Op::F64Copysign,

        O::I32WrapI64 => Op::I32WrapI64,
        O::I32TruncF32S => Op::I32TruncF32S,
        O::I32TruncF32U => Op::I32TruncF32U,
        O::I32TruncF64S => Op::I32TruncF64S,
        O::I32TruncF64U => Op::I32TruncF64U,
        O::I64ExtendI32S => Op::I64ExtendI32S,
        O::I64ExtendI32U => Op::I64ExtendI32U,
        O::I64TruncF32S => Op::I64TruncF32S,
        O::I64TruncF32U => Op::I64TruncF32U,
        O::I64TruncF64S => Op::I64TruncF64S,
        O::I64TruncF64U => Op::I64TruncF64U,
        O::F32ConvertI32S => Op::F32ConvertI32S,
        O::F32ConvertI32U => Op::F32ConvertI32U,
        O::F32ConvertI64S => Op::F32ConvertI64S,
        O::F32ConvertI64U => Op::F32ConvertI64U,
        O::F32DemoteF64 => Op::F32DemoteF64,
        O::F64ConvertI32S => Op::F64ConvertI32S,
        O::F64ConvertI32U => Op::F64ConvertI32U,
        O::F64ConvertI64S => Op::F64ConvertI64S,
        O::F64ConvertI64U => Op::F64ConvertI64U,
        O::F64PromoteF32 => Op::F64PromoteF32,
        O::I32ReinterpretF32 => Op::I32ReinterpretF32,
        O::I64ReinterpretF64 => Op::I64ReinterpretF64,
        O::F32ReinterpretI32 => Op::F32ReinterpretI32,
        O::F64ReinterpretI64 => Op::F64ReinterpretI64,

        O::I32Extend8S => Op::I32Extend8S,
        O::I32Extend16S => Op::I32Extend16S,
        O::I64Extend8S => Op::I64Extend8S,
        O::I64Extend16S => Op::I64Extend16S,
        O::I64Extend32S => Op::I64Extend32S,

        O::I32TruncSatF32S => Op::I32TruncSatF32S,
        O::I32TruncSatF32U => Op::I32TruncSatF32U,
        O::I32TruncSatF64S => Op::I32TruncSatF64S,
        O::I32TruncSatF64U => Op::I32TruncSatF64U,
        O::I64TruncSatF32S => Op::I64TruncSatF32S,
        O::I64TruncSatF32U => Op::I64TruncSatF32U,
        O::I64TruncSatF64S => Op::I64TruncSatF64S,
        O::I64TruncSatF64U => Op::I64TruncSatF64U,

        _ => return None,
    })
}
