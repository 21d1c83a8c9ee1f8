// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use anyhow::{bail, Context};
use cranelift_entity::PrimaryMap;
use smallvec::SmallVec;

use crate::func::Func;
use crate::indices::{FuncIndex, GlobalIndex};
use crate::values::Val;
use crate::ValType;

/// A validated constant expression: the initializer form used by globals and
/// by element and data segment offsets.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstExpr {
    ops: Box<[ConstOp]>,
}

/// One operator of a constant expression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstOp {
    I32Const(i32),
    I64Const(i64),
    F32Const(u32),
    F64Const(u64),
    GlobalGet(GlobalIndex),
    RefNull(ValType),
    RefFunc(FuncIndex),
    I32Add,
    I32Sub,
    I32Mul,
    I64Add,
    I64Sub,
    I64Mul,
}

// ===== impl ConstExpr =====

impl ConstExpr {
    pub fn new(ops: impl IntoIterator<Item = ConstOp>) -> Self {
        Self {
            ops: ops.into_iter().collect(),
        }
    }

    /// Convenience constructor for the common single-constant form.
    pub fn i32_const(value: i32) -> Self {
        Self::new([ConstOp::I32Const(value)])
    }

    pub fn ops(&self) -> impl Iterator<Item = ConstOp> + '_ {
        self.ops.iter().copied()
    }

    /// Translates a `wasmparser` const expression.
    pub(crate) fn from_wasmparser(expr: &wasmparser::ConstExpr<'_>) -> crate::Result<Self> {
        use wasmparser::Operator;

        let mut ops = SmallVec::<[ConstOp; 2]>::new();
        let mut reader = expr.get_operators_reader();
        loop {
            let op = reader.read()?;
            ops.push(match op {
                Operator::End => break,
                Operator::I32Const { value } => ConstOp::I32Const(value),
                Operator::I64Const { value } => ConstOp::I64Const(value),
                Operator::F32Const { value } => ConstOp::F32Const(value.bits()),
                Operator::F64Const { value } => ConstOp::F64Const(value.bits()),
                Operator::GlobalGet { global_index } => {
                    ConstOp::GlobalGet(GlobalIndex::from_u32(global_index))
                }
                Operator::RefNull { hty } => ConstOp::RefNull(match hty {
                    wasmparser::HeapType::Abstract {
                        ty: wasmparser::AbstractHeapType::Func,
                        ..
                    } => ValType::AnyFunc,
                    _ => ValType::AnyRef,
                }),
                Operator::RefFunc { function_index } => {
                    ConstOp::RefFunc(FuncIndex::from_u32(function_index))
                }
                Operator::I32Add => ConstOp::I32Add,
                Operator::I32Sub => ConstOp::I32Sub,
                Operator::I32Mul => ConstOp::I32Mul,
                Operator::I64Add => ConstOp::I64Add,
                Operator::I64Sub => ConstOp::I64Sub,
                Operator::I64Mul => ConstOp::I64Mul,
                op => bail!("unsupported operator in constant expression: {op:?}"),
            });
        }

        Ok(Self {
            ops: ops.into_vec().into_boxed_slice(),
        })
    }

    /// The static result type of this expression, without evaluating it.
    ///
    /// Returns `None` for malformed expressions; validated expressions always
    /// have exactly one result.
    pub(crate) fn result_type(
        &self,
        global_type_of: impl Fn(GlobalIndex) -> Option<ValType>,
    ) -> Option<ValType> {
        let mut stack = SmallVec::<[ValType; 2]>::new();
        for op in self.ops() {
            match op {
                ConstOp::I32Const(_) => stack.push(ValType::I32),
                ConstOp::I64Const(_) => stack.push(ValType::I64),
                ConstOp::F32Const(_) => stack.push(ValType::F32),
                ConstOp::F64Const(_) => stack.push(ValType::F64),
                ConstOp::GlobalGet(index) => stack.push(global_type_of(index)?),
                ConstOp::RefNull(_) => stack.push(ValType::NullRef),
                ConstOp::RefFunc(_) => stack.push(ValType::AnyFunc),
                ConstOp::I32Add | ConstOp::I32Sub | ConstOp::I32Mul => {
                    let (a, b) = (stack.pop()?, stack.pop()?);
                    if a != ValType::I32 || b != ValType::I32 {
                        return None;
                    }
                    stack.push(ValType::I32);
                }
                ConstOp::I64Add | ConstOp::I64Sub | ConstOp::I64Mul => {
                    let (a, b) = (stack.pop()?, stack.pop()?);
                    if a != ValType::I64 || b != ValType::I64 {
                        return None;
                    }
                    stack.push(ValType::I64);
                }
            }
        }
        if stack.len() == 1 {
            Some(stack[0])
        } else {
            None
        }
    }

    /// Iterates the global indices this expression reads.
    pub(crate) fn referenced_globals(&self) -> impl Iterator<Item = GlobalIndex> + '_ {
        self.ops().filter_map(|op| match op {
            ConstOp::GlobalGet(index) => Some(index),
            _ => None,
        })
    }

    /// Iterates the function indices this expression takes references to.
    pub(crate) fn referenced_funcs(&self) -> impl Iterator<Item = FuncIndex> + '_ {
        self.ops().filter_map(|op| match op {
            ConstOp::RefFunc(index) => Some(index),
            _ => None,
        })
    }
}

/// The environment a constant expression is evaluated against during
/// instantiation: the global values and function instances resolved so far.
pub(crate) struct ConstEvalContext<'a> {
    pub globals: &'a PrimaryMap<GlobalIndex, Val>,
    pub funcs: &'a PrimaryMap<FuncIndex, Option<Func>>,
}

/// Simple interpreter for constant expressions.
#[derive(Debug, Default)]
pub struct ConstExprEvaluator {
    stack: SmallVec<[Val; 2]>,
}

// ===== impl ConstExprEvaluator =====

impl ConstExprEvaluator {
    /// Evaluate `expr`, returning its result value.
    ///
    /// Initializer expressions are required by validation to produce exactly
    /// one result; anything else is an error.
    pub(crate) fn eval(
        &mut self,
        ctx: &ConstEvalContext<'_>,
        expr: &ConstExpr,
    ) -> crate::Result<Val> {
        for op in expr.ops() {
            match op {
                ConstOp::I32Const(value) => self.push(Val::I32(value)),
                ConstOp::I64Const(value) => self.push(Val::I64(value)),
                ConstOp::F32Const(value) => self.push(Val::F32(value)),
                ConstOp::F64Const(value) => self.push(Val::F64(value)),
                ConstOp::GlobalGet(index) => {
                    let value = ctx
                        .globals
                        .get(index)
                        .copied()
                        .context("initializer references a global that is not yet initialized")?;
                    self.push(value);
                }
                ConstOp::RefNull(ValType::AnyFunc) => self.push(Val::FuncRef(None)),
                ConstOp::RefNull(_) => self.push(Val::AnyRef(None)),
                ConstOp::RefFunc(index) => {
                    let func = ctx
                        .funcs
                        .get(index)
                        .copied()
                        .flatten()
                        .context("initializer references a function that is not yet allocated")?;
                    self.push(Val::FuncRef(Some(func)));
                }
                ConstOp::I32Add => self.binop_i32(i32::wrapping_add)?,
                ConstOp::I32Sub => self.binop_i32(i32::wrapping_sub)?,
                ConstOp::I32Mul => self.binop_i32(i32::wrapping_mul)?,
                ConstOp::I64Add => self.binop_i64(i64::wrapping_add)?,
                ConstOp::I64Sub => self.binop_i64(i64::wrapping_sub)?,
                ConstOp::I64Mul => self.binop_i64(i64::wrapping_mul)?,
            }
        }

        if self.stack.len() == 1 {
            Ok(self.stack.pop().unwrap())
        } else {
            let len = self.stack.len();
            // Clear the stack so the evaluator can be reused after a failure.
            self.stack.clear();
            bail!("constant expression produced {len} results, expected exactly 1")
        }
    }

    fn push(&mut self, val: Val) {
        self.stack.push(val);
    }

    fn pop(&mut self) -> crate::Result<Val> {
        self.stack.pop().context("pop from empty stack")
    }

    fn binop_i32(&mut self, f: impl Fn(i32, i32) -> i32) -> crate::Result<()> {
        let b = self.pop()?;
        let a = self.pop()?;
        match (a, b) {
            (Val::I32(a), Val::I32(b)) => {
                self.push(Val::I32(f(a, b)));
                Ok(())
            }
            _ => bail!("type error in constant expression"),
        }
    }

    fn binop_i64(&mut self, f: impl Fn(i64, i64) -> i64) -> crate::Result<()> {
        let b = self.pop()?;
        let a = self.pop()?;
        match (a, b) {
            (Val::I64(a), Val::I64(b)) => {
                self.push(Val::I64(f(a, b)));
                Ok(())
            }
            _ => bail!("type error in constant expression"),
        }
    }
}
