// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::sync::Arc;

use wasmcell::{
    compile_module, instantiate_module, load_binary_module, validate_module, Compartment,
    CompiledModule, Extern, FeatureSpec, MemoryType, SizeConstraints, Val,
};

fn compile(wat: &str) -> Arc<CompiledModule> {
    let bytes = wat::parse_str(wat).unwrap();
    let module = load_binary_module(&bytes, FeatureSpec::default()).unwrap();
    validate_module(&module).unwrap();
    Arc::new(compile_module(module).unwrap())
}

#[test]
fn released_instances_are_collected() {
    let compiled = compile(
        r#"
        (module
          (memory 1)
          (table 1 funcref)
          (global (mut i32) (i32.const 0))
          (func (export "f")))
        "#,
    );

    let compartment = Compartment::new();
    let baseline = compartment.live_object_count();

    let instance = instantiate_module(&compartment, &compiled, Vec::new(), "gc").unwrap();
    assert!(compartment.live_object_count() > baseline);

    // Rooted: collection frees nothing.
    compartment.collect_garbage().unwrap();
    assert!(compartment.live_object_count() > baseline);

    instance.release(&compartment).unwrap();
    compartment.collect_garbage().unwrap();
    assert_eq!(compartment.live_object_count(), baseline);
}

/// Table -> function -> instance -> table is a cycle; the tracing collector
/// still reclaims it once the instance is released.
#[test]
fn cycles_are_collected() {
    let compiled = compile(
        r#"
        (module
          (table 1 funcref)
          (func $f)
          (elem (i32.const 0) $f))
        "#,
    );

    let compartment = Compartment::new();
    let baseline = compartment.live_object_count();

    let instance = instantiate_module(&compartment, &compiled, Vec::new(), "cycle").unwrap();
    instance.release(&compartment).unwrap();
    compartment.collect_garbage().unwrap();
    assert_eq!(compartment.live_object_count(), baseline);
}

#[test]
fn reachable_objects_survive_collection() {
    let compartment = Compartment::new();
    let memory = compartment
        .create_memory(MemoryType::new(false, SizeConstraints::new(1, Some(1))))
        .unwrap();
    memory.write(&compartment, 0, &[42]).unwrap();

    compartment.collect_garbage().unwrap();

    // The handle the host still holds is a root: the memory survived with
    // its contents intact.
    let mut buffer = [0u8];
    memory.read(&compartment, 0, &mut buffer).unwrap();
    assert_eq!(buffer, [42]);

    // Once released, the next collection reclaims it.
    compartment.release(Extern::Memory(memory)).unwrap();
    compartment.collect_garbage().unwrap();
    assert_eq!(compartment.live_object_count(), 0);
}

/// Handles that outlive their object go stale; using one is an error, never
/// a use of freed state.
#[test]
fn stale_handles_are_detected_after_collection() {
    let compiled = compile(
        r#"
        (module
          (memory 1)
          (data (i32.const 0) "\2b")
          (func (export "peek") (result i32) (i32.load8_u (i32.const 0))))
        "#,
    );

    let compartment = Compartment::new();
    let instance = instantiate_module(&compartment, &compiled, Vec::new(), "keep").unwrap();
    let peek = instance.func(&compartment, "peek").unwrap();
    assert_eq!(peek.invoke(&compartment, &[]).unwrap(), vec![Val::I32(43)]);

    instance.release(&compartment).unwrap();
    compartment.collect_garbage().unwrap();

    // The function was reachable only through the released instance.
    assert!(peek.invoke(&compartment, &[]).is_err());
}
