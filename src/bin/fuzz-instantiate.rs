// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Reference fuzz driver: decode, validate, link against stub imports, and
//! instantiate a module from a file.
//!
//! Exit status is 0 for every terminating outcome on well- or malformed
//! Wasm (decode failure, validation failure, link failure, trap, or clean
//! instantiate); non-zero only for a missing argument or an unreadable
//! file.

use std::process::ExitCode;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use wasmcell::{
    catch_runtime_exceptions, compile_module, instantiate_module, link_module, load_binary_module,
    validate_module, Compartment, FeatureSpec, StubResolver,
};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let Some(input) = args.next() else {
        eprintln!("usage: fuzz-instantiate <in.wasm>");
        return ExitCode::from(2);
    };

    let bytes = match std::fs::read(&input) {
        Ok(bytes) => bytes,
        Err(error) => {
            eprintln!("failed to read `{input}`: {error}");
            return ExitCode::FAILURE;
        }
    };

    fuzz_instantiate(&bytes);
    ExitCode::SUCCESS
}

fn fuzz_instantiate(bytes: &[u8]) {
    let feature_spec = FeatureSpec {
        max_labels_per_function: 65536,
        max_locals: 1024,
        ..FeatureSpec::default()
    };

    let module = match load_binary_module(bytes, feature_spec) {
        Ok(module) => module,
        Err(error) => {
            tracing::debug!("decode failed: {error}");
            return;
        }
    };
    if let Err(error) = validate_module(&module) {
        tracing::debug!("validation failed: {error}");
        return;
    }
    let compiled = match compile_module(module) {
        Ok(compiled) => Arc::new(compiled),
        Err(error) => {
            tracing::debug!("compilation failed: {error}");
            return;
        }
    };

    let compartment = Compartment::new();
    let mut resolver = StubResolver::new(&compartment);
    let link_result = link_module(&compiled.module, &compartment, &mut resolver);
    if !link_result.is_success() {
        for missing in &link_result.missing_imports {
            tracing::debug!(
                "unresolved import `{}::{}`: {}",
                missing.module,
                missing.name,
                missing.cause
            );
        }
        return;
    }

    let outcome = catch_runtime_exceptions(
        || instantiate_module(&compartment, &compiled, link_result.resolved_imports, "fuzz"),
        |exception| tracing::debug!("instantiation raised: {exception}"),
    );
    match outcome {
        Ok(Some(instance)) => {
            let _ = instance.release(&compartment);
        }
        Ok(None) => {}
        Err(error) => tracing::debug!("instantiation failed: {error}"),
    }

    if let Err(error) = compartment.collect_garbage() {
        tracing::debug!("collection failed: {error}");
    }
}
