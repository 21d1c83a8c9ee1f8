use crate::func::Func;
use crate::utils::enum_accessors;
use crate::{Extern, ValType};

/// Possible runtime values that a WebAssembly module can either consume or
/// produce.
///
/// Note that we inline the `enum Ref { ... }` variants into `enum Val { ... }`
/// here as a size optimization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Val {
    /// A 32-bit integer.
    I32(i32),

    /// A 64-bit integer.
    I64(i64),

    /// A 32-bit float.
    ///
    /// Note that the raw bits of the float are stored here, and you can use
    /// `f32::from_bits` to create an `f32` value.
    F32(u32),

    /// A 64-bit float.
    ///
    /// Note that the raw bits of the float are stored here, and you can use
    /// `f64::from_bits` to create an `f64` value.
    F64(u64),

    /// A 128-bit number.
    V128(u128),

    /// A function reference.
    FuncRef(Option<Func>),

    /// A reference to any runtime object.
    AnyRef(Option<Extern>),
}

/// A reference value: either null or a live referee belonging to the current
/// compartment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Ref {
    /// A first-class reference to a WebAssembly function.
    ///
    /// The host, or the Wasm guest, can invoke this function. The guest can
    /// create non-null function references via the `ref.func` instruction, or
    /// null references via the `ref.null func` instruction.
    Func(Option<Func>),

    /// A reference to any runtime object of the compartment.
    ///
    /// These references are opaque to the Wasm itself; the guest can only
    /// pass them around and place them into globals and tables.
    Any(Option<Extern>),
}

// ===== impl Val =====

impl Val {
    /// Returns the null function reference value, a subtype of all
    /// references.
    #[inline]
    pub const fn null_ref() -> Val {
        Val::FuncRef(None)
    }

    /// Returns the default value for the given type, if any exists.
    pub fn default_for(ty: ValType) -> Option<Val> {
        match ty {
            ValType::I32 => Some(Val::I32(0)),
            ValType::I64 => Some(Val::I64(0)),
            ValType::F32 => Some(Val::F32(0)),
            ValType::F64 => Some(Val::F64(0)),
            ValType::V128 => Some(Val::V128(0)),
            ValType::AnyFunc | ValType::NullRef => Some(Val::FuncRef(None)),
            ValType::AnyRef => Some(Val::AnyRef(None)),
            ValType::Any | ValType::None => None,
        }
    }

    /// Returns the most precise [`ValType`] describing this value.
    #[inline]
    pub fn ty(&self) -> ValType {
        match self {
            Val::I32(_) => ValType::I32,
            Val::I64(_) => ValType::I64,
            Val::F32(_) => ValType::F32,
            Val::F64(_) => ValType::F64,
            Val::V128(_) => ValType::V128,
            Val::FuncRef(None) | Val::AnyRef(None) => ValType::NullRef,
            Val::FuncRef(Some(_)) => ValType::AnyFunc,
            Val::AnyRef(Some(_)) => ValType::AnyRef,
        }
    }

    /// Whether this value may inhabit a slot of type `ty`.
    #[inline]
    pub fn matches(&self, ty: ValType) -> bool {
        ValType::is_subtype(self.ty(), ty)
    }

    enum_accessors! {
        v
        (I32(i32) is_i32 i32 unwrap_i32 *v)
        (I64(i64) is_i64 i64 unwrap_i64 *v)
        (F32(u32) is_f32 f32_bits unwrap_f32_bits *v)
        (F64(u64) is_f64 f64_bits unwrap_f64_bits *v)
        (V128(u128) is_v128 v128 unwrap_v128 *v)
        (FuncRef(Option<Func>) is_func_ref func_ref unwrap_func_ref *v)
    }
}

impl From<i32> for Val {
    #[inline]
    fn from(val: i32) -> Val {
        Val::I32(val)
    }
}

impl From<i64> for Val {
    #[inline]
    fn from(val: i64) -> Val {
        Val::I64(val)
    }
}

impl From<f32> for Val {
    #[inline]
    fn from(val: f32) -> Val {
        Val::F32(val.to_bits())
    }
}

impl From<f64> for Val {
    #[inline]
    fn from(val: f64) -> Val {
        Val::F64(val.to_bits())
    }
}

impl From<Ref> for Val {
    #[inline]
    fn from(val: Ref) -> Val {
        match val {
            Ref::Func(f) => Val::FuncRef(f),
            Ref::Any(r) => Val::AnyRef(r),
        }
    }
}

impl From<Func> for Val {
    #[inline]
    fn from(val: Func) -> Val {
        Val::FuncRef(Some(val))
    }
}

// ===== impl Ref =====

impl From<Func> for Ref {
    #[inline]
    fn from(f: Func) -> Ref {
        Ref::Func(Some(f))
    }
}

impl From<Option<Func>> for Ref {
    #[inline]
    fn from(f: Option<Func>) -> Ref {
        Ref::Func(f)
    }
}

impl Ref {
    /// Create a null reference inhabiting the given reference type.
    #[inline]
    pub fn null(ty: ValType) -> Self {
        match ty {
            ValType::AnyFunc | ValType::NullRef => Ref::Func(None),
            ValType::AnyRef => Ref::Any(None),
            ty => unreachable!("not a reference type: {ty:?}"),
        }
    }

    /// Is this a null reference?
    #[inline]
    pub fn is_null(&self) -> bool {
        match self {
            Ref::Func(None) | Ref::Any(None) => true,
            Ref::Func(Some(_)) | Ref::Any(Some(_)) => false,
        }
    }

    /// Is this a non-null reference?
    #[inline]
    pub fn is_non_null(&self) -> bool {
        !self.is_null()
    }

    /// Returns the most precise [`ValType`] describing this reference.
    #[inline]
    pub fn ty(&self) -> ValType {
        match self {
            Ref::Func(None) | Ref::Any(None) => ValType::NullRef,
            Ref::Func(Some(_)) => ValType::AnyFunc,
            Ref::Any(Some(_)) => ValType::AnyRef,
        }
    }

    /// Whether this reference may be stored into a slot of type `ty`.
    #[inline]
    pub fn matches(&self, ty: ValType) -> bool {
        ValType::is_subtype(self.ty(), ty)
    }
}
