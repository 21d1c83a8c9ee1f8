// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::sync::Arc;

use wasmcell::{
    catch_runtime_exceptions, compile_module, instantiate_module, link_module, load_binary_module,
    validate_module, Compartment, CompiledModule, Extern, FeatureSpec, GlobalType,
    InstantiationError, Mutability, StubResolver, Trap, Val, ValType,
};

fn compile(wat: &str) -> Arc<CompiledModule> {
    let bytes = wat::parse_str(wat).unwrap();
    let module = load_binary_module(&bytes, FeatureSpec::default()).unwrap();
    validate_module(&module).unwrap();
    Arc::new(compile_module(module).unwrap())
}

#[test]
fn empty_module() {
    let compiled = compile("(module)");
    let compartment = Compartment::new();

    let instance = instantiate_module(&compartment, &compiled, Vec::new(), "empty").unwrap();
    assert!(instance.export(&compartment, "x").is_none());
}

/// The fuzz path: stub out every import and instantiate; a start function
/// containing `unreachable` raises exactly one trap, the compartment stays
/// usable, and collection releases the instance once it is dropped.
#[test]
fn stub_instantiate_with_trapping_start() {
    let compiled = compile(
        r#"
        (module
          (import "env" "f" (func))
          (import "env" "mem" (memory 1))
          (func $start unreachable)
          (start $start))
        "#,
    );

    let compartment = Compartment::new();
    let mut resolver = StubResolver::new(&compartment);
    let link_result = link_module(&compiled.module, &compartment, &mut resolver);
    assert!(link_result.is_success());

    let mut deliveries = 0;
    let outcome = catch_runtime_exceptions(
        || instantiate_module(&compartment, &compiled, link_result.resolved_imports, "fuzz"),
        |exception| {
            deliveries += 1;
            assert_eq!(exception.trap(), Some(Trap::UnreachableCodeReached));
        },
    )
    .unwrap();
    assert_eq!(deliveries, 1);
    assert!(outcome.is_none());

    // The instance was published before the start function ran, so it is
    // still rooted; the compartment is intact and usable.
    let before = compartment.live_object_count();
    assert!(before > 0);
    let again = instantiate_module(&compartment, &compile("(module)"), Vec::new(), "again");
    assert!(again.is_ok());

    // Nothing is rooted besides the instances and the stub objects, so after
    // the collection the count is unchanged; unrooting would shrink it. This
    // mirrors the fuzz driver's collect-after-run step.
    compartment.collect_garbage().unwrap();
    assert_eq!(
        compartment.live_object_count(),
        before + 1 // the extra empty instance
    );
}

#[test]
fn element_segment_out_of_bounds_rolls_back() {
    let compiled = compile(
        r#"
        (module
          (table 1 1 funcref)
          (func $f)
          (elem (i32.const 2) $f))
        "#,
    );

    let compartment = Compartment::new();
    let before = compartment.live_object_count();

    let error =
        instantiate_module(&compartment, &compiled, Vec::new(), "oob").unwrap_err();
    assert!(matches!(
        error.downcast_ref::<InstantiationError>(),
        Some(InstantiationError::ElementSegmentOutOfBounds(0))
    ));

    // The table allocated before the failing segment copy is gone.
    assert_eq!(compartment.live_object_count(), before);
}

#[test]
fn immutable_global_initializer_cross_import() {
    let compiled = compile(
        r#"
        (module
          (import "env" "g" (global i32))
          (global $h i32 (i32.add (global.get 0) (i32.const 1)))
          (func (export "h") (result i32) (global.get $h)))
        "#,
    );

    let compartment = Compartment::new();
    let g = compartment
        .create_global(
            GlobalType::new(ValType::I32, Mutability::Const),
            Val::I32(7),
        )
        .unwrap();

    let instance = instantiate_module(
        &compartment,
        &compiled,
        vec![Extern::Global(g)],
        "cross-import",
    )
    .unwrap();

    let h = instance.func(&compartment, "h").unwrap();
    assert_eq!(h.invoke(&compartment, &[]).unwrap(), vec![Val::I32(8)]);
}

#[test]
fn import_type_mismatch_fails_before_any_side_effect() {
    let compiled = compile(
        r#"
        (module
          (import "env" "g" (global (mut i32)))
          (memory 1))
        "#,
    );

    let compartment = Compartment::new();
    let immutable = compartment
        .create_global(
            GlobalType::new(ValType::I32, Mutability::Const),
            Val::I32(7),
        )
        .unwrap();
    let before = compartment.live_object_count();

    let error = instantiate_module(
        &compartment,
        &compiled,
        vec![Extern::Global(immutable)],
        "mismatch",
    )
    .unwrap_err();
    assert!(matches!(
        error.downcast_ref::<InstantiationError>(),
        Some(InstantiationError::ImportTypeMismatch(0))
    ));
    assert_eq!(compartment.live_object_count(), before);
}

#[test]
fn start_function_observes_initialized_state() {
    // The start function reads memory initialized by a data segment and
    // publishes the value through a mutable global.
    let compiled = compile(
        r#"
        (module
          (memory 1)
          (data (i32.const 0) "\07\00\00\00")
          (global $seen (export "seen") (mut i32) (i32.const 0))
          (func $start (global.set $seen (i32.load (i32.const 0))))
          (start $start))
        "#,
    );

    let compartment = Compartment::new();
    let instance = instantiate_module(&compartment, &compiled, Vec::new(), "start").unwrap();

    let seen = instance.global(&compartment, "seen").unwrap();
    assert_eq!(seen.get(&compartment).unwrap(), Val::I32(7));
}

#[test]
fn segment_into_imported_table() {
    let compiled = compile(
        r#"
        (module
          (import "env" "t" (table 2 funcref))
          (func $f (result i32) (i32.const 9))
          (elem (i32.const 1) $f))
        "#,
    );

    let compartment = Compartment::new();
    let table = compartment
        .create_table(wasmcell::TableType::new(
            ValType::AnyFunc,
            false,
            wasmcell::SizeConstraints::new(2, None),
        ))
        .unwrap();

    instantiate_module(
        &compartment,
        &compiled,
        vec![Extern::Table(table)],
        "elem-import",
    )
    .unwrap();

    // The imported table now holds the defined function at index 1.
    let element = table.get(&compartment, 1).unwrap();
    let func = match element {
        wasmcell::Ref::Func(Some(func)) => func,
        other => panic!("expected a function element, got {other:?}"),
    };
    assert_eq!(func.invoke(&compartment, &[]).unwrap(), vec![Val::I32(9)]);
}
