// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Process-global interning of composite types.
//!
//! Interned records live for the lifetime of the process and are never torn
//! down; handles are therefore `'static` and equality on them is pointer
//! equality. Insertion is idempotent: interning the same content twice, from
//! any thread, returns the same record.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, OnceLock};

use hashbrown::HashMap;

use crate::types::{FuncType, FuncTypeEncoding, TypeTuple, ValType};

pub(crate) struct TypeTupleData {
    pub hash: u64,
    pub elems: Box<[ValType]>,
}

pub(crate) struct FuncTypeData {
    pub hash: u64,
    pub results: TypeTuple,
    pub params: TypeTuple,
}

#[derive(Default)]
struct TypeRegistry {
    tuples: HashMap<Box<[ValType]>, &'static TypeTupleData>,
    func_types: HashMap<(TypeTuple, TypeTuple), &'static FuncTypeData>,
    by_encoding: HashMap<usize, FuncType>,
}

fn registry() -> &'static Mutex<TypeRegistry> {
    static REGISTRY: OnceLock<Mutex<TypeRegistry>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(TypeRegistry::default()))
}

fn lock() -> std::sync::MutexGuard<'static, TypeRegistry> {
    registry().lock().unwrap_or_else(|e| e.into_inner())
}

pub(crate) fn intern_tuple(elems: Vec<ValType>) -> TypeTuple {
    let mut registry = lock();
    if let Some(data) = registry.tuples.get(elems.as_slice()) {
        return TypeTuple(data);
    }

    let elems = elems.into_boxed_slice();
    let mut hasher = DefaultHasher::new();
    elems.hash(&mut hasher);
    let data: &'static TypeTupleData = Box::leak(Box::new(TypeTupleData {
        hash: hasher.finish(),
        elems: elems.clone(),
    }));
    registry.tuples.insert(elems, data);
    TypeTuple(data)
}

pub(crate) fn intern_func_type(results: TypeTuple, params: TypeTuple) -> FuncType {
    let mut registry = lock();
    if let Some(data) = registry.func_types.get(&(results, params)) {
        return FuncType(data);
    }

    let mut hasher = DefaultHasher::new();
    (results, params).hash(&mut hasher);
    let data: &'static FuncTypeData = Box::leak(Box::new(FuncTypeData {
        hash: hasher.finish(),
        results,
        params,
    }));
    registry.func_types.insert((results, params), data);

    let func_type = FuncType(data);
    registry
        .by_encoding
        .insert(func_type.encoding().0, func_type);
    func_type
}

pub(crate) fn func_type_by_encoding(encoding: FuncTypeEncoding) -> Option<FuncType> {
    lock().by_encoding.get(&encoding.0).copied()
}

#[cfg(test)]
mod tests {
    use crate::types::{FuncType, TypeTuple, ValType};

    #[test]
    fn interning_is_idempotent() {
        let a = TypeTuple::new([ValType::I32, ValType::I64]);
        let b = TypeTuple::new([ValType::I32, ValType::I64]);
        assert_eq!(a, b);
        assert!(core::ptr::eq(a.0, b.0));

        let c = TypeTuple::new([ValType::I64, ValType::I32]);
        assert_ne!(a, c);
    }

    #[test]
    fn identity_matches_sequence_equality() {
        let a = TypeTuple::new([ValType::F32]);
        let b = TypeTuple::new([ValType::F32]);
        assert_eq!(a.elems(), b.elems());
        assert_eq!(a, b);
        assert_eq!(a.0.hash, b.0.hash);
    }

    #[test]
    fn func_type_encoding_round_trips() {
        let ty = FuncType::new(TypeTuple::empty(), TypeTuple::new([ValType::I32]));
        let encoding = ty.encoding();
        assert_eq!(FuncType::from_encoding(encoding), Some(ty));
    }

    #[test]
    fn interning_across_threads() {
        let handles: Vec<_> = (0..2)
            .map(|_| std::thread::spawn(|| TypeTuple::new([ValType::I32, ValType::I64])))
            .collect();
        let tuples: Vec<TypeTuple> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(tuples[0], tuples[1]);
        assert!(core::ptr::eq(tuples[0].0, tuples[1].0));
    }
}
