// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use hashbrown::HashMap;

use wasmcell::{
    link_module, load_binary_module, Compartment, Extern, ExternType, FeatureSpec, GlobalType,
    LinkErrorCause, Module, Mutability, ResolveError, Resolver, StubResolver, Val, ValType,
};

fn decode(wat: &str) -> Module {
    let bytes = wat::parse_str(wat).unwrap();
    load_binary_module(&bytes, FeatureSpec::default()).unwrap()
}

/// A resolver over a fixed table of definitions.
#[derive(Default)]
struct MapResolver {
    definitions: HashMap<(String, String), Extern>,
}

impl MapResolver {
    fn define(&mut self, module: &str, name: &str, object: impl Into<Extern>) {
        self.definitions
            .insert((module.to_string(), name.to_string()), object.into());
    }
}

impl Resolver for MapResolver {
    fn resolve(
        &mut self,
        module: &str,
        name: &str,
        _ty: &ExternType,
    ) -> Result<Extern, ResolveError> {
        self.definitions
            .get(&(module.to_string(), name.to_string()))
            .copied()
            .ok_or(ResolveError::NotFound)
    }
}

#[test]
fn missing_import_is_reported() {
    let module = decode(r#"(module (import "env" "f" (func)))"#);
    let compartment = Compartment::new();
    let mut resolver = MapResolver::default();

    let result = link_module(&module, &compartment, &mut resolver);
    assert!(!result.is_success());
    assert_eq!(result.missing_imports.len(), 1);
    assert_eq!(result.missing_imports[0].module, "env");
    assert_eq!(result.missing_imports[0].name, "f");
    assert_eq!(result.missing_imports[0].cause, LinkErrorCause::Missing);
}

#[test]
fn global_mutability_must_match_exactly() {
    let immutable_request = decode(r#"(module (import "env" "g" (global i32)))"#);
    let mutable_request = decode(r#"(module (import "env" "g" (global (mut i32))))"#);

    let compartment = Compartment::new();
    let immutable = compartment
        .create_global(
            GlobalType::new(ValType::I32, Mutability::Const),
            Val::I32(1),
        )
        .unwrap();
    let mutable = compartment
        .create_global(GlobalType::new(ValType::I32, Mutability::Var), Val::I32(1))
        .unwrap();

    // A mutable global must not match an immutable request, and vice versa.
    let mut resolver = MapResolver::default();
    resolver.define("env", "g", mutable);
    let result = link_module(&immutable_request, &compartment, &mut resolver);
    assert_eq!(
        result.missing_imports[0].cause,
        LinkErrorCause::TypeMismatch
    );

    let mut resolver = MapResolver::default();
    resolver.define("env", "g", immutable);
    let result = link_module(&mutable_request, &compartment, &mut resolver);
    assert_eq!(
        result.missing_imports[0].cause,
        LinkErrorCause::TypeMismatch
    );

    let mut resolver = MapResolver::default();
    resolver.define("env", "g", immutable);
    assert!(link_module(&immutable_request, &compartment, &mut resolver).is_success());
}

#[test]
fn memory_size_constraints_use_subset_matching() {
    // The import wants at least 2 pages and at most 4.
    let module = decode(r#"(module (import "env" "mem" (memory 2 4)))"#);
    let compartment = Compartment::new();

    let too_small = compartment
        .create_memory(wasmcell::MemoryType::new(
            false,
            wasmcell::SizeConstraints::new(1, Some(4)),
        ))
        .unwrap();
    let unbounded = compartment
        .create_memory(wasmcell::MemoryType::new(
            false,
            wasmcell::SizeConstraints::new(2, None),
        ))
        .unwrap();
    let fits = compartment
        .create_memory(wasmcell::MemoryType::new(
            false,
            wasmcell::SizeConstraints::new(3, Some(3)),
        ))
        .unwrap();

    for (memory, expected) in [(too_small, false), (unbounded, false), (fits, true)] {
        let mut resolver = MapResolver::default();
        resolver.define("env", "mem", memory);
        let result = link_module(&module, &compartment, &mut resolver);
        assert_eq!(result.is_success(), expected);
    }
}

#[test]
fn objects_from_another_compartment_are_rejected() {
    let module = decode(r#"(module (import "env" "g" (global i32)))"#);

    let compartment = Compartment::new();
    let foreign = Compartment::new();
    let global = foreign
        .create_global(
            GlobalType::new(ValType::I32, Mutability::Const),
            Val::I32(1),
        )
        .unwrap();

    let mut resolver = MapResolver::default();
    resolver.define("env", "g", global);
    let result = link_module(&module, &compartment, &mut resolver);
    assert_eq!(
        result.missing_imports[0].cause,
        LinkErrorCause::CompartmentMismatch
    );
}

#[test]
fn stub_resolver_satisfies_any_request() {
    let module = decode(
        r#"
        (module
          (import "a" "f" (func (param i32) (result i64)))
          (import "b" "t" (table 4 funcref))
          (import "c" "m" (memory 1))
          (import "d" "g" (global (mut f64)))
          (import "e" "e" (tag (param i32 i32))))
        "#,
    );

    let compartment = Compartment::new();
    let mut resolver = StubResolver::new(&compartment);
    let result = link_module(&module, &compartment, &mut resolver);
    assert!(result.is_success());
    assert_eq!(result.resolved_imports.len(), 5);

    // The stub function traps when called.
    let func = *result.resolved_imports[0].get_func().unwrap();
    let error = func.invoke(&compartment, &[Val::I32(0)]).unwrap_err();
    let exception = error.downcast::<wasmcell::Exception>().unwrap();
    assert_eq!(exception.trap(), Some(wasmcell::Trap::UnreachableCodeReached));
}

#[test]
fn linking_is_pure() {
    let module = decode(
        r#"
        (module
          (import "env" "f" (func))
          (import "env" "missing" (func)))
        "#,
    );
    let compartment = Compartment::new();
    let func = wasmcell::Func::wrap_host(
        &compartment,
        wasmcell::FuncType::new(wasmcell::TypeTuple::empty(), wasmcell::TypeTuple::empty()),
        wasmcell::CallConvention::Intrinsic,
        |_, _| Ok(vec![]),
    )
    .unwrap();

    let mut resolver = MapResolver::default();
    resolver.define("env", "f", func);

    let first = link_module(&module, &compartment, &mut resolver);
    let second = link_module(&module, &compartment, &mut resolver);
    assert_eq!(first.is_success(), second.is_success());
    assert_eq!(first.resolved_imports, second.resolved_imports);
    assert_eq!(
        first.missing_imports.len(),
        second.missing_imports.len()
    );
}
