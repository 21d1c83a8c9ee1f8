// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::sync::Arc;

use wasmcell::{
    compile_module, instantiate_module, load_binary_module, validate_module, Compartment,
    CompiledModule, FeatureSpec, Val,
};

fn compile(wat: &str) -> Arc<CompiledModule> {
    let bytes = wat::parse_str(wat).unwrap();
    let module = load_binary_module(&bytes, FeatureSpec::default()).unwrap();
    validate_module(&module).unwrap();
    Arc::new(compile_module(module).unwrap())
}

#[test]
fn fib() {
    let compiled = compile(
        r#"
        (module
          (func $fib (export "fib") (param i32) (result i32)
            (if (result i32) (i32.lt_s (local.get 0) (i32.const 2))
              (then (local.get 0))
              (else (i32.add
                (call $fib (i32.sub (local.get 0) (i32.const 1)))
                (call $fib (i32.sub (local.get 0) (i32.const 2))))))))
        "#,
    );

    let compartment = Compartment::new();
    let instance = instantiate_module(&compartment, &compiled, Vec::new(), "fib").unwrap();

    let func = instance.func(&compartment, "fib").unwrap();
    let results = func.invoke(&compartment, &[Val::I32(8)]).unwrap();
    assert_eq!(results, vec![Val::I32(21)]);
}

#[test]
fn loops_and_locals() {
    let compiled = compile(
        r#"
        (module
          (func (export "sum") (param i32) (result i32)
            (local $acc i32)
            (local $i i32)
            (block $done
              (loop $top
                (br_if $done (i32.gt_s (local.get $i) (local.get 0)))
                (local.set $acc (i32.add (local.get $acc) (local.get $i)))
                (local.set $i (i32.add (local.get $i) (i32.const 1)))
                (br $top)))
            (local.get $acc)))
        "#,
    );

    let compartment = Compartment::new();
    let instance = instantiate_module(&compartment, &compiled, Vec::new(), "sum").unwrap();
    let func = instance.func(&compartment, "sum").unwrap();

    let results = func.invoke(&compartment, &[Val::I32(10)]).unwrap();
    assert_eq!(results, vec![Val::I32(55)]);
}

#[test]
fn memory_and_data_segment() {
    let compiled = compile(
        r#"
        (module
          (memory (export "mem") 1 2)
          (data (i32.const 16) "\2a\00\00\00")
          (func (export "peek") (param i32) (result i32)
            (i32.load (local.get 0)))
          (func (export "poke") (param i32 i32)
            (i32.store (local.get 0) (local.get 1))))
        "#,
    );

    let compartment = Compartment::new();
    let instance = instantiate_module(&compartment, &compiled, Vec::new(), "memory").unwrap();

    let peek = instance.func(&compartment, "peek").unwrap();
    let poke = instance.func(&compartment, "poke").unwrap();

    assert_eq!(
        peek.invoke(&compartment, &[Val::I32(16)]).unwrap(),
        vec![Val::I32(42)]
    );

    poke.invoke(&compartment, &[Val::I32(100), Val::I32(7)])
        .unwrap();
    assert_eq!(
        peek.invoke(&compartment, &[Val::I32(100)]).unwrap(),
        vec![Val::I32(7)]
    );

    // The host sees the same bytes through the exported memory.
    let memory = instance.memory(&compartment, "mem").unwrap();
    let mut buffer = [0u8; 4];
    memory.read(&compartment, 16, &mut buffer).unwrap();
    assert_eq!(i32::from_le_bytes(buffer), 42);
}

#[test]
fn indirect_calls_through_element_segment() {
    let compiled = compile(
        r#"
        (module
          (type $binop (func (param i32 i32) (result i32)))
          (table 2 funcref)
          (elem (i32.const 0) $add $mul)
          (func $add (type $binop) (i32.add (local.get 0) (local.get 1)))
          (func $mul (type $binop) (i32.mul (local.get 0) (local.get 1)))
          (func (export "dispatch") (param i32 i32 i32) (result i32)
            (call_indirect (type $binop) (local.get 1) (local.get 2) (local.get 0))))
        "#,
    );

    let compartment = Compartment::new();
    let instance = instantiate_module(&compartment, &compiled, Vec::new(), "dispatch").unwrap();
    let dispatch = instance.func(&compartment, "dispatch").unwrap();

    assert_eq!(
        dispatch
            .invoke(&compartment, &[Val::I32(0), Val::I32(3), Val::I32(4)])
            .unwrap(),
        vec![Val::I32(7)]
    );
    assert_eq!(
        dispatch
            .invoke(&compartment, &[Val::I32(1), Val::I32(3), Val::I32(4)])
            .unwrap(),
        vec![Val::I32(12)]
    );
}

#[test]
fn multi_value_results() {
    let compiled = compile(
        r#"
        (module
          (func (export "divmod") (param i32 i32) (result i32 i32)
            (i32.div_u (local.get 0) (local.get 1))
            (i32.rem_u (local.get 0) (local.get 1))))
        "#,
    );

    let compartment = Compartment::new();
    let instance = instantiate_module(&compartment, &compiled, Vec::new(), "divmod").unwrap();
    let divmod = instance.func(&compartment, "divmod").unwrap();

    assert_eq!(
        divmod
            .invoke(&compartment, &[Val::I32(17), Val::I32(5)])
            .unwrap(),
        vec![Val::I32(3), Val::I32(2)]
    );
}
