// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::sync::Arc;

use wasmcell::{
    catch_runtime_exceptions, compile_module, instantiate_module, load_binary_module,
    validate_module, CallConvention, Compartment, CompiledModule, Exception, Extern, FeatureSpec,
    Func, FuncType, Module, Trap, TypeTuple, Val, ValType,
};

fn compile(wat: &str) -> Arc<CompiledModule> {
    let bytes = wat::parse_str(wat).unwrap();
    let module = load_binary_module(&bytes, FeatureSpec::default()).unwrap();
    validate_module(&module).unwrap();
    Arc::new(compile_module(module).unwrap())
}

fn trap_of(error: anyhow::Error) -> Trap {
    error
        .downcast::<Exception>()
        .expect("error should be a runtime exception")
        .trap()
        .expect("exception should be a trap")
}

#[test]
fn arithmetic_traps() {
    let compiled = compile(
        r#"
        (module
          (func (export "div") (param i32 i32) (result i32)
            (i32.div_s (local.get 0) (local.get 1)))
          (func (export "trunc") (param f64) (result i32)
            (i32.trunc_f64_s (local.get 0))))
        "#,
    );

    let compartment = Compartment::new();
    let instance = instantiate_module(&compartment, &compiled, Vec::new(), "traps").unwrap();

    let div = instance.func(&compartment, "div").unwrap();
    assert_eq!(
        trap_of(div.invoke(&compartment, &[Val::I32(1), Val::I32(0)]).unwrap_err()),
        Trap::IntegerDivisionByZero
    );
    assert_eq!(
        trap_of(
            div.invoke(&compartment, &[Val::I32(i32::MIN), Val::I32(-1)])
                .unwrap_err()
        ),
        Trap::IntegerOverflow
    );
    assert_eq!(
        div.invoke(&compartment, &[Val::I32(-9), Val::I32(3)]).unwrap(),
        vec![Val::I32(-3)]
    );

    let trunc = instance.func(&compartment, "trunc").unwrap();
    assert_eq!(
        trap_of(trunc.invoke(&compartment, &[Val::F64(f64::NAN.to_bits())]).unwrap_err()),
        Trap::BadConversionToInteger
    );
    assert_eq!(
        trap_of(trunc.invoke(&compartment, &[Val::from(1e300f64)]).unwrap_err()),
        Trap::IntegerOverflow
    );
}

#[test]
fn guest_memory_access_traps_without_corrupting_state() {
    let compiled = compile(
        r#"
        (module
          (memory 1 1)
          (func (export "load") (param i32) (result i32)
            (i32.load (local.get 0))))
        "#,
    );

    let compartment = Compartment::new();
    let instance = instantiate_module(&compartment, &compiled, Vec::new(), "oob").unwrap();
    let load = instance.func(&compartment, "load").unwrap();

    assert_eq!(
        trap_of(load.invoke(&compartment, &[Val::I32(0x10000)]).unwrap_err()),
        Trap::MemoryOutOfBounds
    );

    // The trap did not poison the instance.
    assert_eq!(
        load.invoke(&compartment, &[Val::I32(0)]).unwrap(),
        vec![Val::I32(0)]
    );
}

#[test]
fn call_stacks_carry_function_names() {
    let compiled = compile(
        r#"
        (module
          (func $inner (export "inner") (unreachable))
          (func $outer (export "outer") (call $inner)))
        "#,
    );

    let compartment = Compartment::new();
    let instance = instantiate_module(&compartment, &compiled, Vec::new(), "stacks").unwrap();
    let outer = instance.func(&compartment, "outer").unwrap();

    let exception = outer
        .invoke(&compartment, &[])
        .unwrap_err()
        .downcast::<Exception>()
        .unwrap();
    assert_eq!(exception.trap(), Some(Trap::UnreachableCodeReached));

    let frames = exception.call_stack().frames();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].description(), "inner");
    assert_eq!(frames[1].description(), "outer");
}

#[test]
fn unknown_frames_render_as_unknown_function() {
    let compiled = compile(
        r#"
        (module
          (import "env" "f" (func $f))
          (func (export "go") (call $f)))
        "#,
    );

    let compartment = Compartment::new();
    let host = Func::wrap_host(
        &compartment,
        FuncType::new(TypeTuple::empty(), TypeTuple::empty()),
        CallConvention::Intrinsic,
        |_, _| {
            Err(Exception::from_trap(
                Trap::UnreachableCodeReached,
                wasmcell::CallStack::default(),
            ))
        },
    )
    .unwrap();
    let instance = instantiate_module(
        &compartment,
        &compiled,
        vec![Extern::Func(host)],
        "unknown",
    )
    .unwrap();

    let exception = instance
        .func(&compartment, "go")
        .unwrap()
        .invoke(&compartment, &[])
        .unwrap_err()
        .downcast::<Exception>()
        .unwrap();
    // The host frame has no symbol data.
    assert_eq!(
        exception.call_stack().frames()[0].description(),
        "<unknown function>"
    );
    assert_eq!(exception.call_stack().frames()[1].description(), "go");
}

#[test]
fn catch_runtime_exceptions_delivers_exactly_once() {
    let compartment = Compartment::new();
    let mut deliveries = 0;

    // A thunk that returns normally: no delivery.
    let value = catch_runtime_exceptions(|| Ok(17), |_| deliveries += 1).unwrap();
    assert_eq!(value, Some(17));
    assert_eq!(deliveries, 0);

    // A thunk that traps: one delivery, no value.
    let compiled = compile(r#"(module (func (export "boom") (unreachable)))"#);
    let instance = instantiate_module(&compartment, &compiled, Vec::new(), "boom").unwrap();
    let boom = instance.func(&compartment, "boom").unwrap();

    let value = catch_runtime_exceptions(
        || boom.invoke(&compartment, &[]),
        |_| deliveries += 1,
    )
    .unwrap();
    assert_eq!(value, None);
    assert_eq!(deliveries, 1);

    // A non-runtime error propagates unchanged, without delivery.
    let result: wasmcell::Result<Option<()>> =
        catch_runtime_exceptions(|| Err(anyhow::anyhow!("plain error")), |_| deliveries += 1);
    assert!(result.is_err());
    assert_eq!(deliveries, 1);
}

#[test]
fn guest_throw_is_caught_by_matching_tag() {
    let compiled = compile(
        r#"
        (module
          (tag $e (param i32))
          (tag $other)
          (func (export "catcher") (param i32) (result i32)
            (block $h (result i32)
              (try_table (result i32) (catch $e $h)
                (if (i32.eqz (local.get 0))
                  (then (throw $e (i32.const 42))))
                (i32.const 7)))))
        "#,
    );

    let compartment = Compartment::new();
    let instance = instantiate_module(&compartment, &compiled, Vec::new(), "eh").unwrap();
    let catcher = instance.func(&compartment, "catcher").unwrap();

    // Throwing rebinds the tag's parameters at the catch site.
    assert_eq!(
        catcher.invoke(&compartment, &[Val::I32(0)]).unwrap(),
        vec![Val::I32(42)]
    );
    // Not throwing falls through the try body.
    assert_eq!(
        catcher.invoke(&compartment, &[Val::I32(1)]).unwrap(),
        vec![Val::I32(7)]
    );
}

#[test]
fn uncaught_guest_throw_reaches_the_host() {
    let compiled = compile(
        r#"
        (module
          (tag $e (export "e") (param i32 i32))
          (func (export "throw") (throw $e (i32.const 1) (i32.const 2))))
        "#,
    );

    let compartment = Compartment::new();
    let instance = instantiate_module(&compartment, &compiled, Vec::new(), "throw").unwrap();
    let tag = instance.tag(&compartment, "e").unwrap();

    let exception = instance
        .func(&compartment, "throw")
        .unwrap()
        .invoke(&compartment, &[])
        .unwrap_err()
        .downcast::<Exception>()
        .unwrap();
    assert!(!exception.is_trap());
    assert_eq!(exception.tag(), Some(tag));
    assert_eq!(exception.arguments(), &[Val::I32(1), Val::I32(2)]);
}

/// The legacy `try`/`catch` form, exercised through a hand-built body since
/// the text front end prefers `try_table`.
#[test]
fn legacy_try_catch_rebinds_parameters() {
    let mut module = Module::default();
    let ty = FuncType::new(
        TypeTuple::new([ValType::I32]),
        TypeTuple::empty(),
    );
    let signature = module.types.push(ty);
    module
        .tags
        .push(wasmcell::TagType::new(TypeTuple::new([ValType::I32])));
    module
        .functions
        .push(wasmcell::FunctionDef { signature });
    module.function_bodies.push(wasmcell::FunctionBody {
        locals: Vec::new(),
        // try (result i32) ; i32.const 7 ; throw 0 ; catch 0 ; end ; end
        bytes: vec![0x06, 0x7f, 0x41, 0x07, 0x08, 0x00, 0x07, 0x00, 0x0b, 0x0b],
        offset: 0,
    });
    module.exports.insert(
        "go".to_string(),
        wasmcell::EntityIndex::Function(wasmcell::FuncIndex::from_u32(0)),
    );
    validate_module(&module).unwrap();
    let compiled = Arc::new(compile_module(module).unwrap());

    let compartment = Compartment::new();
    let instance = instantiate_module(&compartment, &compiled, Vec::new(), "legacy").unwrap();
    let go = instance.func(&compartment, "go").unwrap();

    // The thrown i32 is rebound as the catch block's stack contents.
    assert_eq!(go.invoke(&compartment, &[]).unwrap(), vec![Val::I32(7)]);
}

#[test]
fn runaway_recursion_traps_with_stack_overflow() {
    let compiled = compile(
        r#"
        (module
          (func $spin (export "spin") (call $spin)))
        "#,
    );

    let compartment = Compartment::new();
    let instance = instantiate_module(&compartment, &compiled, Vec::new(), "spin").unwrap();
    let spin = instance.func(&compartment, "spin").unwrap();

    assert_eq!(
        trap_of(spin.invoke(&compartment, &[]).unwrap_err()),
        Trap::StackOverflow
    );
}
