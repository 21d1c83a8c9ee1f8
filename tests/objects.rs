// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use wasmcell::{
    Compartment, Exception, Extern, GlobalType, MemoryType, Mutability, Ref, SizeConstraints,
    TableType, TagType, Trap, TypeTuple, Val, ValType,
};

#[test]
fn memory_size_stays_within_constraints() {
    let compartment = Compartment::new();
    let memory = compartment
        .create_memory(MemoryType::new(false, SizeConstraints::new(1, Some(3))))
        .unwrap();

    assert_eq!(memory.size(&compartment), 1);
    assert_eq!(memory.grow(&compartment, 1).unwrap(), 1);
    assert_eq!(memory.grow(&compartment, 1).unwrap(), 2);
    assert_eq!(memory.size(&compartment), 3);

    // Growth beyond the max fails and changes nothing.
    assert!(memory.grow(&compartment, 1).is_err());
    assert_eq!(memory.size(&compartment), 3);
}

#[test]
fn unbounded_constraints_accept_any_size() {
    let any = SizeConstraints::new(0, None);
    assert!(SizeConstraints::is_subset(SizeConstraints::new(0, Some(0)), any));
    assert!(SizeConstraints::is_subset(
        SizeConstraints::new(u64::MAX, Some(u64::MAX)),
        any
    ));

    let compartment = Compartment::new();
    let memory = compartment
        .create_memory(MemoryType::new(false, any))
        .unwrap();
    assert_eq!(memory.size(&compartment), 0);
    assert_eq!(memory.grow(&compartment, 4).unwrap(), 0);
}

#[test]
fn memory_access_is_bounds_checked() {
    let compartment = Compartment::new();
    let memory = compartment
        .create_memory(MemoryType::new(false, SizeConstraints::new(1, Some(1))))
        .unwrap();

    memory.write(&compartment, 0xfffc, &[1, 2, 3, 4]).unwrap();
    let mut buffer = [0u8; 4];
    memory.read(&compartment, 0xfffc, &mut buffer).unwrap();
    assert_eq!(buffer, [1, 2, 3, 4]);

    // One byte past the end: the write traps and mutates nothing.
    let error = memory.write(&compartment, 0xfffd, &[0; 4]).unwrap_err();
    let exception = error.downcast::<Exception>().unwrap();
    assert_eq!(exception.trap(), Some(Trap::MemoryOutOfBounds));

    memory.read(&compartment, 0xfffc, &mut buffer).unwrap();
    assert_eq!(buffer, [1, 2, 3, 4]);

    // A trapped access leaves the memory live and usable.
    memory.write(&compartment, 0, &[9]).unwrap();
}

#[test]
fn anyfunc_table_rejects_non_function_referees() {
    let compartment = Compartment::new();
    let table = compartment
        .create_table(TableType::new(
            ValType::AnyFunc,
            false,
            SizeConstraints::new(2, Some(2)),
        ))
        .unwrap();

    // A non-function object is a valid anyref referee, but not an anyfunc.
    let memory = compartment
        .create_memory(MemoryType::new(false, SizeConstraints::new(0, Some(1))))
        .unwrap();
    let error = table
        .set(&compartment, 0, Ref::Any(Some(Extern::Memory(memory))))
        .unwrap_err();
    assert!(error.to_string().contains("does not match"));

    // Null inhabits every reference type.
    table.set(&compartment, 0, Ref::Func(None)).unwrap();

    // The same referee is fine in an anyref table.
    let anyref_table = compartment
        .create_table(TableType::new(
            ValType::AnyRef,
            false,
            SizeConstraints::new(1, Some(1)),
        ))
        .unwrap();
    anyref_table
        .set(&compartment, 0, Ref::Any(Some(Extern::Memory(memory))))
        .unwrap();
}

#[test]
fn table_bounds_and_growth() {
    let compartment = Compartment::new();
    let table = compartment
        .create_table(TableType::new(
            ValType::AnyFunc,
            false,
            SizeConstraints::new(1, Some(2)),
        ))
        .unwrap();

    let error = table.get(&compartment, 1).unwrap_err();
    assert_eq!(
        error.downcast::<Exception>().unwrap().trap(),
        Some(Trap::TableOutOfBounds)
    );

    assert_eq!(table.grow(&compartment, 1).unwrap(), 1);
    assert!(table.get(&compartment, 1).unwrap().is_null());
    assert!(table.grow(&compartment, 1).is_err());
}

#[test]
fn immutable_globals_cannot_be_set() {
    let compartment = Compartment::new();
    let global = compartment
        .create_global(
            GlobalType::new(ValType::I64, Mutability::Const),
            Val::I64(5),
        )
        .unwrap();
    assert!(global.set(&compartment, Val::I64(6)).is_err());
    assert_eq!(global.get(&compartment).unwrap(), Val::I64(5));

    let mutable = compartment
        .create_global(GlobalType::new(ValType::I64, Mutability::Var), Val::I64(5))
        .unwrap();
    mutable.set(&compartment, Val::I64(6)).unwrap();
    assert_eq!(mutable.get(&compartment).unwrap(), Val::I64(6));

    // Value types are checked on set.
    assert!(mutable.set(&compartment, Val::I32(6)).is_err());
}

#[test]
fn tags_compare_by_identity() {
    let compartment = Compartment::new();
    let ty = TagType::new(TypeTuple::new([ValType::I32]));
    let a = compartment.create_tag(ty).unwrap();
    let b = compartment.create_tag(ty).unwrap();

    assert_eq!(a, a);
    assert_ne!(a, b, "structurally equal tags are still distinct");
    assert_eq!(a.ty(&compartment).params, b.ty(&compartment).params);
}

/// Two threads grow the same shared memory; exactly one observes each
/// intermediate size and the final size reflects both grows.
#[test]
fn shared_memory_growth_is_atomic() {
    let compartment = Compartment::new();
    let memory = compartment
        .create_memory(MemoryType::new(true, SizeConstraints::new(1, Some(8))))
        .unwrap();

    let mut observed = std::thread::scope(|scope| {
        let a = scope.spawn(|| memory.grow(&compartment, 1).unwrap());
        let b = scope.spawn(|| memory.grow(&compartment, 1).unwrap());
        vec![a.join().unwrap(), b.join().unwrap()]
    });
    observed.sort_unstable();

    assert_eq!(observed, vec![1, 2]);
    assert_eq!(memory.size(&compartment), 3);
}
