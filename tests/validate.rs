// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use wasmcell::{load_binary_module, validate_module, FeatureSpec, Module};

fn decode_with(wat: &str, feature_spec: FeatureSpec) -> Module {
    let bytes = wat::parse_str(wat).unwrap();
    load_binary_module(&bytes, feature_spec).unwrap()
}

#[test]
fn validation_is_idempotent() {
    let module = decode_with(
        r#"(module (func (export "f") (result i32) (i32.const 1)))"#,
        FeatureSpec::default(),
    );
    assert!(validate_module(&module).is_ok());
    assert!(validate_module(&module).is_ok());
}

#[test]
fn locals_cap_is_enforced() {
    let module = decode_with(
        r#"(module (func (local i32 i32 i32 i32)))"#,
        FeatureSpec {
            max_locals: 8,
            ..FeatureSpec::default()
        },
    );
    assert!(validate_module(&module).is_ok());

    let module = decode_with(
        r#"(module (func (param i32 i32) (local i32 i32 i32)))"#,
        FeatureSpec {
            max_locals: 4,
            ..FeatureSpec::default()
        },
    );
    let error = validate_module(&module).unwrap_err();
    assert!(error.message.contains("locals"));
}

#[test]
fn label_nesting_cap_is_enforced() {
    let module = decode_with(
        r#"(module (func (block (block (block (block))))))"#,
        FeatureSpec {
            max_labels_per_function: 2,
            ..FeatureSpec::default()
        },
    );
    let error = validate_module(&module).unwrap_err();
    assert!(error.message.contains("labels"));
}

#[test]
fn duplicate_imports_are_rejected() {
    // Binary Wasm allows duplicate import pairs; the IR does not.
    let module = decode_with(
        r#"
        (module
          (import "env" "x" (func))
          (import "env" "x" (global i32)))
        "#,
        FeatureSpec::default(),
    );
    let error = validate_module(&module).unwrap_err();
    assert!(error.message.contains("duplicate import"));
}

#[test]
fn start_function_signature_is_checked() {
    // Built directly: the decoder's validator would reject this earlier.
    let mut module = Module::default();
    let ty = wasmcell::FuncType::new(
        wasmcell::TypeTuple::new([wasmcell::ValType::I32]),
        wasmcell::TypeTuple::empty(),
    );
    let signature = module.types.push(ty);
    module.functions.push(wasmcell::FunctionDef { signature });
    module.function_bodies.push(wasmcell::FunctionBody {
        locals: Vec::new(),
        bytes: vec![0x41, 0x00, 0x0b], // i32.const 0 ; end
        offset: 0,
    });
    module.start = Some(wasmcell::FuncIndex::from_u32(0));

    let error = validate_module(&module).unwrap_err();
    assert!(error.message.contains("start function"));
}

#[test]
fn global_initializers_may_only_read_imported_immutable_globals() {
    let mut module = Module::default();
    module.globals.push(wasmcell::GlobalType::new(
        wasmcell::ValType::I32,
        wasmcell::Mutability::Var,
    ));
    module.num_imported_globals = 1;
    module.imports.push(wasmcell::Import {
        module: "env".into(),
        name: "g".into(),
        ty: wasmcell::ExternType::Global(wasmcell::GlobalType::new(
            wasmcell::ValType::I32,
            wasmcell::Mutability::Var,
        )),
    });
    module.globals.push(wasmcell::GlobalType::new(
        wasmcell::ValType::I32,
        wasmcell::Mutability::Const,
    ));
    module
        .global_initializers
        .push(wasmcell::ConstExpr::new([wasmcell::ConstOp::GlobalGet(
            wasmcell::GlobalIndex::from_u32(0),
        )]));

    let error = validate_module(&module).unwrap_err();
    assert!(error.message.contains("mutable global"));
}
