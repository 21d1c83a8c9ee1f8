// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;
use core::hash::{Hash, Hasher};
use core::ops::Deref;

use crate::type_registry::{self, FuncTypeData, TypeTupleData};
use crate::utils::enum_accessors;

/// The type of a WebAssembly operand.
///
/// `Any` is the top of the lattice and `None` the bottom; neither ever
/// appears at the wire boundary, they exist only as type-checker internals.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValType {
    I32,
    I64,
    F32,
    F64,
    V128,
    /// A reference to any runtime object.
    AnyRef,
    /// A reference to a function.
    AnyFunc,
    /// The type of null references, subtype of both `AnyRef` and `AnyFunc`.
    NullRef,
    /// Top type.
    Any,
    /// Bottom type.
    None,
}

// ===== impl ValType =====

impl ValType {
    /// Is this one of the reference types `{anyref, anyfunc, nullref}`?
    #[inline]
    pub fn is_reference(self) -> bool {
        matches!(self, ValType::AnyRef | ValType::AnyFunc | ValType::NullRef)
    }

    /// The width of a value of this type in bytes.
    ///
    /// References are stored as pointers.
    ///
    /// # Panics
    ///
    /// Panics on the type-checker internal types `Any` and `None`, which have
    /// no runtime representation.
    pub fn byte_width(self) -> u8 {
        match self {
            ValType::I32 | ValType::F32 => 4,
            ValType::I64 | ValType::F64 => 8,
            ValType::V128 => 16,
            ValType::AnyRef | ValType::AnyFunc | ValType::NullRef => {
                debug_assert!(size_of::<usize>() >= 8);
                8
            }
            ValType::Any | ValType::None => unreachable!("`any` and `none` have no byte width"),
        }
    }

    /// The width of a value of this type in bits.
    pub fn bit_width(self) -> u8 {
        self.byte_width() * 8
    }

    /// Returns whether `sub` may be used wherever `sup` is expected.
    pub fn is_subtype(sub: ValType, sup: ValType) -> bool {
        if sub == sup {
            true
        } else {
            match sup {
                ValType::Any => true,
                ValType::AnyRef => matches!(sub, ValType::AnyFunc | ValType::NullRef),
                ValType::AnyFunc => sub == ValType::NullRef,
                _ => false,
            }
        }
    }

    /// Returns the least type that includes all values that are an instance
    /// of `a` OR `b`.
    pub fn join(a: ValType, b: ValType) -> ValType {
        if a == b {
            a
        } else if a.is_reference() && b.is_reference() {
            // a \ b    anyref  anyfunc  nullref
            // anyref   anyref  anyref   anyref
            // anyfunc  anyref  anyfunc  anyfunc
            // nullref  anyref  anyfunc  nullref
            if a == ValType::NullRef {
                b
            } else if b == ValType::NullRef {
                a
            } else {
                // a != b and neither is nullref, so one is anyref.
                ValType::AnyRef
            }
        } else {
            ValType::Any
        }
    }

    /// Returns the greatest type that includes only values that are an
    /// instance of both `a` AND `b`.
    pub fn meet(a: ValType, b: ValType) -> ValType {
        if a == b {
            a
        } else if a.is_reference() && b.is_reference() {
            // a \ b    anyref   anyfunc  nullref
            // anyref   anyref   anyfunc  nullref
            // anyfunc  anyfunc  anyfunc  nullref
            // nullref  nullref  nullref  nullref
            if a == ValType::NullRef || b == ValType::NullRef {
                ValType::NullRef
            } else if a == ValType::AnyRef {
                b
            } else {
                debug_assert_eq!(b, ValType::AnyRef);
                a
            }
        } else {
            ValType::None
        }
    }
}

impl fmt::Display for ValType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let str = match self {
            ValType::I32 => "i32",
            ValType::I64 => "i64",
            ValType::F32 => "f32",
            ValType::F64 => "f64",
            ValType::V128 => "v128",
            ValType::AnyRef => "anyref",
            ValType::AnyFunc => "anyfunc",
            ValType::NullRef => "nullref",
            ValType::Any => "any",
            ValType::None => "none",
        };
        f.write_str(str)
    }
}

/// An ordered, immutable sequence of value types.
///
/// Tuples are interned for the lifetime of the process: two tuples with the
/// same elements are the same tuple, equality is pointer equality and the
/// hash is computed once at interning time.
#[derive(Clone, Copy)]
pub struct TypeTuple(pub(crate) &'static TypeTupleData);

// ===== impl TypeTuple =====

impl TypeTuple {
    /// Interns the given element sequence, returning the canonical handle.
    pub fn new(elems: impl IntoIterator<Item = ValType>) -> Self {
        type_registry::intern_tuple(elems.into_iter().collect())
    }

    /// The empty tuple.
    pub fn empty() -> Self {
        Self::new([])
    }

    pub fn elems(&self) -> &'static [ValType] {
        &self.0.elems
    }

    pub fn len(&self) -> usize {
        self.0.elems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.elems.is_empty()
    }
}

impl Deref for TypeTuple {
    type Target = [ValType];

    fn deref(&self) -> &Self::Target {
        &self.0.elems
    }
}

impl PartialEq for TypeTuple {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        core::ptr::eq(self.0, other.0)
    }
}

impl Eq for TypeTuple {}

impl Hash for TypeTuple {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash);
    }
}

impl fmt::Debug for TypeTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.elems()).finish()
    }
}

impl fmt::Display for TypeTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.len() == 1 {
            write!(f, "{}", self.elems()[0])
        } else {
            write!(f, "(")?;
            for (index, elem) in self.elems().iter().enumerate() {
                if index != 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{elem}")?;
            }
            write!(f, ")")
        }
    }
}

impl FromIterator<ValType> for TypeTuple {
    fn from_iter<T: IntoIterator<Item = ValType>>(iter: T) -> Self {
        Self::new(iter)
    }
}

/// The type of a WebAssembly function: a result tuple and a parameter tuple.
///
/// Function types are interned like [`TypeTuple`]s; comparison is by
/// identity. A function type can be re-encoded into a pointer-sized opaque
/// [`FuncTypeEncoding`] for use as a table element tag at indirect call
/// sites.
#[derive(Clone, Copy)]
pub struct FuncType(pub(crate) &'static FuncTypeData);

/// A [`FuncType`] represented as an abstract pointer-sized value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct FuncTypeEncoding(pub(crate) usize);

// ===== impl FuncType =====

impl FuncType {
    pub fn new(results: TypeTuple, params: TypeTuple) -> Self {
        type_registry::intern_func_type(results, params)
    }

    pub fn results(&self) -> TypeTuple {
        self.0.results
    }

    pub fn params(&self) -> TypeTuple {
        self.0.params
    }

    /// Re-encodes this type as a pointer-sized opaque value.
    pub fn encoding(&self) -> FuncTypeEncoding {
        FuncTypeEncoding(core::ptr::from_ref(self.0) as usize)
    }

    /// Recovers a function type from its encoding.
    ///
    /// Returns `None` if `encoding` was not produced by [`Self::encoding`].
    pub fn from_encoding(encoding: FuncTypeEncoding) -> Option<Self> {
        type_registry::func_type_by_encoding(encoding)
    }
}

impl PartialEq for FuncType {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        core::ptr::eq(self.0, other.0)
    }
}

impl Eq for FuncType {}

impl Hash for FuncType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash);
    }
}

impl fmt::Debug for FuncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FuncType({self})")
    }
}

impl fmt::Display for FuncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.params(), self.results())
    }
}

/// A range of expected sizes for a size-constrained type.
///
/// `max == u64::MAX` means the maximum size is unbounded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SizeConstraints {
    pub min: u64,
    pub max: u64,
}

// ===== impl SizeConstraints =====

impl SizeConstraints {
    pub const UNBOUNDED: u64 = u64::MAX;

    pub fn new(min: u64, max: Option<u64>) -> Self {
        Self {
            min,
            max: max.unwrap_or(Self::UNBOUNDED),
        }
    }

    pub fn is_bounded(&self) -> bool {
        self.max != Self::UNBOUNDED
    }

    /// `sub` is a subset of `sup` iff every size admitted by `sub` is also
    /// admitted by `sup`.
    pub fn is_subset(sub: SizeConstraints, sup: SizeConstraints) -> bool {
        sub.min >= sup.min && sub.max <= sup.max
    }
}

impl fmt::Display for SizeConstraints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.max == Self::UNBOUNDED {
            write!(f, "{}..", self.min)
        } else {
            write!(f, "{}..{}", self.min, self.max)
        }
    }
}

/// The type of a table: an element reference type, a sharing flag, and size
/// constraints in units of elements.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TableType {
    pub element_type: ValType,
    pub shared: bool,
    pub size: SizeConstraints,
}

// ===== impl TableType =====

impl TableType {
    pub fn new(element_type: ValType, shared: bool, size: SizeConstraints) -> Self {
        debug_assert!(element_type.is_reference());
        Self {
            element_type,
            shared,
            size,
        }
    }

    pub fn is_subtype(sub: TableType, sup: TableType) -> bool {
        sub.element_type == sup.element_type
            && sub.shared == sup.shared
            && SizeConstraints::is_subset(sub.size, sup.size)
    }
}

impl fmt::Display for TableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.shared {
            write!(f, "{} shared {}", self.size, self.element_type)
        } else {
            write!(f, "{} {}", self.size, self.element_type)
        }
    }
}

/// The type of a linear memory: a sharing flag and size constraints in units
/// of 64 KiB pages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryType {
    pub shared: bool,
    pub size: SizeConstraints,
}

// ===== impl MemoryType =====

impl MemoryType {
    pub fn new(shared: bool, size: SizeConstraints) -> Self {
        Self { shared, size }
    }

    pub fn is_subtype(sub: MemoryType, sup: MemoryType) -> bool {
        sub.shared == sup.shared && SizeConstraints::is_subset(sub.size, sup.size)
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.shared {
            write!(f, "{} shared", self.size)
        } else {
            write!(f, "{}", self.size)
        }
    }
}

/// Whether a global may be mutated after initialization.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mutability {
    Const,
    Var,
}

/// The type of a global: a value type and a mutability flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GlobalType {
    pub content: ValType,
    pub mutability: Mutability,
}

// ===== impl GlobalType =====

impl GlobalType {
    pub fn new(content: ValType, mutability: Mutability) -> Self {
        Self {
            content,
            mutability,
        }
    }

    pub fn is_mutable(&self) -> bool {
        self.mutability == Mutability::Var
    }

    /// Mutable globals are invariant in their content type; immutable globals
    /// are covariant.
    pub fn is_subtype(sub: GlobalType, sup: GlobalType) -> bool {
        sub.mutability == sup.mutability
            && if sup.is_mutable() {
                sub.content == sup.content
            } else {
                ValType::is_subtype(sub.content, sup.content)
            }
    }
}

impl fmt::Display for GlobalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mutability {
            Mutability::Var => write!(f, "global {}", self.content),
            Mutability::Const => write!(f, "immutable {}", self.content),
        }
    }
}

/// The type of an exception tag: the parameter tuple carried by exceptions
/// thrown with it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TagType {
    pub params: TypeTuple,
}

// ===== impl TagType =====

impl TagType {
    pub fn new(params: TypeTuple) -> Self {
        Self { params }
    }
}

impl fmt::Display for TagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.params)
    }
}

/// The type of any importable or exportable object.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ExternType {
    Func(FuncType),
    Table(TableType),
    Memory(MemoryType),
    Global(GlobalType),
    Tag(TagType),
}

// ===== impl ExternType =====

impl ExternType {
    enum_accessors! {
        e
        (Func(FuncType) is_func func unwrap_func *e)
        (Table(TableType) is_table table unwrap_table *e)
        (Memory(MemoryType) is_memory memory unwrap_memory *e)
        (Global(GlobalType) is_global global unwrap_global *e)
        (Tag(TagType) is_tag tag unwrap_tag *e)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ExternType::Func(_) => "function",
            ExternType::Table(_) => "table",
            ExternType::Memory(_) => "memory",
            ExternType::Global(_) => "global",
            ExternType::Tag(_) => "tag",
        }
    }

    /// Subtyping over object types.
    ///
    /// Function and tag types are only subtypes of themselves; tables,
    /// memories and globals follow their component rules.
    pub fn is_subtype(sub: &ExternType, sup: &ExternType) -> bool {
        match (sub, sup) {
            (ExternType::Func(a), ExternType::Func(b)) => a == b,
            (ExternType::Table(a), ExternType::Table(b)) => TableType::is_subtype(*a, *b),
            (ExternType::Memory(a), ExternType::Memory(b)) => MemoryType::is_subtype(*a, *b),
            (ExternType::Global(a), ExternType::Global(b)) => GlobalType::is_subtype(*a, *b),
            (ExternType::Tag(a), ExternType::Tag(b)) => a.params == b.params,
            _ => false,
        }
    }
}

impl fmt::Display for ExternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExternType::Func(ty) => write!(f, "{ty}"),
            ExternType::Table(ty) => write!(f, "{ty}"),
            ExternType::Memory(ty) => write!(f, "{ty}"),
            ExternType::Global(ty) => write!(f, "{ty}"),
            ExternType::Tag(ty) => write!(f, "{ty}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ValType; 10] = [
        ValType::I32,
        ValType::I64,
        ValType::F32,
        ValType::F64,
        ValType::V128,
        ValType::AnyRef,
        ValType::AnyFunc,
        ValType::NullRef,
        ValType::Any,
        ValType::None,
    ];

    #[test]
    fn join_and_meet_bound_their_operands() {
        for a in ALL {
            for b in ALL {
                let join = ValType::join(a, b);
                assert!(ValType::is_subtype(a, join), "{a} </: join({a},{b})");
                assert!(ValType::is_subtype(b, join), "{b} </: join({a},{b})");

                let meet = ValType::meet(a, b);
                assert!(ValType::is_subtype(meet, a), "meet({a},{b}) </: {a}");
                assert!(ValType::is_subtype(meet, b), "meet({a},{b}) </: {b}");
            }
        }
    }

    #[test]
    fn join_and_meet_are_commutative() {
        for a in ALL {
            for b in ALL {
                assert_eq!(ValType::join(a, b), ValType::join(b, a));
                assert_eq!(ValType::meet(a, b), ValType::meet(b, a));
            }
        }
    }

    #[test]
    fn reference_lattice() {
        assert!(ValType::is_subtype(ValType::NullRef, ValType::AnyFunc));
        assert!(ValType::is_subtype(ValType::NullRef, ValType::AnyRef));
        assert!(ValType::is_subtype(ValType::AnyFunc, ValType::AnyRef));
        assert!(!ValType::is_subtype(ValType::AnyRef, ValType::AnyFunc));
        assert_eq!(
            ValType::join(ValType::AnyFunc, ValType::AnyRef),
            ValType::AnyRef
        );
        assert_eq!(
            ValType::meet(ValType::AnyFunc, ValType::AnyRef),
            ValType::AnyFunc
        );
        assert_eq!(
            ValType::join(ValType::I32, ValType::AnyFunc),
            ValType::Any
        );
        assert_eq!(ValType::meet(ValType::I32, ValType::F64), ValType::None);
    }

    #[test]
    fn byte_widths() {
        assert_eq!(ValType::I32.byte_width(), 4);
        assert_eq!(ValType::F32.byte_width(), 4);
        assert_eq!(ValType::I64.byte_width(), 8);
        assert_eq!(ValType::F64.byte_width(), 8);
        assert_eq!(ValType::V128.byte_width(), 16);
        assert!(ValType::AnyRef.byte_width() >= 8);
        assert_eq!(ValType::I32.bit_width(), 32);
    }

    #[test]
    fn size_constraints_subset() {
        let any = SizeConstraints::new(0, None);
        assert!(SizeConstraints::is_subset(SizeConstraints::new(3, Some(7)), any));
        assert!(SizeConstraints::is_subset(any, any));
        assert!(!SizeConstraints::is_subset(any, SizeConstraints::new(1, None)));
        assert!(!SizeConstraints::is_subset(
            SizeConstraints::new(0, Some(8)),
            SizeConstraints::new(0, Some(4)),
        ));
    }

    #[test]
    fn global_subtyping() {
        let imm_i32 = GlobalType::new(ValType::I32, Mutability::Const);
        let mut_i32 = GlobalType::new(ValType::I32, Mutability::Var);
        assert!(!GlobalType::is_subtype(imm_i32, mut_i32));
        assert!(!GlobalType::is_subtype(mut_i32, imm_i32));

        // Immutable globals are covariant, mutable globals invariant.
        let imm_nullref = GlobalType::new(ValType::NullRef, Mutability::Const);
        let imm_anyref = GlobalType::new(ValType::AnyRef, Mutability::Const);
        assert!(GlobalType::is_subtype(imm_nullref, imm_anyref));
        let mut_nullref = GlobalType::new(ValType::NullRef, Mutability::Var);
        let mut_anyref = GlobalType::new(ValType::AnyRef, Mutability::Var);
        assert!(!GlobalType::is_subtype(mut_nullref, mut_anyref));
    }

    #[test]
    fn display_formats() {
        assert_eq!(TypeTuple::empty().to_string(), "()");
        assert_eq!(TypeTuple::new([ValType::I32]).to_string(), "i32");
        assert_eq!(
            TypeTuple::new([ValType::I32, ValType::I64]).to_string(),
            "(i32, i64)"
        );
        let ty = FuncType::new(
            TypeTuple::new([ValType::F32]),
            TypeTuple::new([ValType::I32, ValType::I64]),
        );
        assert_eq!(ty.to_string(), "(i32, i64)->f32");
        assert_eq!(SizeConstraints::new(1, None).to_string(), "1..");
        assert_eq!(SizeConstraints::new(0, Some(16)).to_string(), "0..16");
        assert_eq!(
            GlobalType::new(ValType::I32, Mutability::Const).to_string(),
            "immutable i32"
        );
    }
}
