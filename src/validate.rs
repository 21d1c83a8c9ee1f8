// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! IR-level validation.
//!
//! Function bodies are type-checked against the structured-stack rules by
//! the decoder (`wasmparser` does that work); this pass enforces the
//! invariants the IR itself must satisfy, whether the module came from the
//! decoder or was built directly: index ranges, name uniqueness, constant
//! initializer discipline, segment/container type consistency, and the
//! [`crate::FeatureSpec`] caps.

use core::fmt;

use hashbrown::HashSet;
use wasmparser::{BinaryReader, ConstExpr, Operator};

use crate::indices::GlobalIndex;
use crate::module::{EntityIndex, Module, SegmentElements};
use crate::types::ValType;

/// A position within a text file: a count of newlines, tabs, and other
/// characters preceding it.
///
/// The column rule is `column = tabs * tab_spacing + characters + 1`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextFileLocus {
    pub newlines: u32,
    pub tabs: u32,
    pub characters: u32,
}

// ===== impl TextFileLocus =====

impl TextFileLocus {
    /// The 1-based line number.
    pub fn line(&self) -> u32 {
        self.newlines + 1
    }

    /// The 1-based column, rendering each tab as `tab_spacing` columns.
    pub fn column(&self, tab_spacing: u32) -> u32 {
        self.tabs * tab_spacing + self.characters + 1
    }

    /// Advances the locus across `text`.
    pub fn advance(&mut self, text: &str) {
        for ch in text.chars() {
            match ch {
                '\n' => {
                    self.newlines += 1;
                    self.tabs = 0;
                    self.characters = 0;
                }
                '\t' => self.tabs += 1,
                _ => self.characters += 1,
            }
        }
    }
}

impl fmt::Display for TextFileLocus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line(), self.column(4))
    }
}

/// A structured diagnostic produced by [`validate_module`].
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
    /// Byte offset in the original binary, when known.
    pub offset: usize,
    /// Text position, populated by text front ends; zero for binary input.
    pub locus: TextFileLocus,
}

// ===== impl ValidationError =====

impl ValidationError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            offset: 0,
            locus: TextFileLocus::default(),
        }
    }

    fn with_offset(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
            locus: TextFileLocus::default(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.locus != TextFileLocus::default() {
            write!(f, "{}: {}", self.locus, self.message)
        } else {
            write!(f, "{} (at offset {:#x})", self.message, self.offset)
        }
    }
}

impl std::error::Error for ValidationError {}

/// Walks the IR once and verifies it is well-formed.
///
/// Validation is pure: validating the same module twice gives the same
/// result.
pub fn validate_module(module: &Module) -> Result<(), ValidationError> {
    let spec = &module.feature_spec;

    // Entity counts must be consistent with the import counts.
    if (module.functions.len() as u64) < u64::from(module.num_imported_functions)
        || module.function_bodies.len() as u64
            != module.functions.len() as u64 - u64::from(module.num_imported_functions)
    {
        return Err(ValidationError::new(
            "function body count does not match the defined function count",
        ));
    }
    if module.global_initializers.len() as u64
        != module.globals.len() as u64 - u64::from(module.num_imported_globals)
    {
        return Err(ValidationError::new(
            "global initializer count does not match the defined global count",
        ));
    }

    // Every type index in range.
    for (index, def) in module.functions.iter() {
        if module.types.get(def.signature).is_none() {
            return Err(ValidationError::new(format!(
                "function {} references out-of-range type {:?}",
                index.as_u32(),
                def.signature
            )));
        }
    }

    // Import requests are unique per (module, name) pair.
    let mut seen = HashSet::new();
    for import in &module.imports {
        if !seen.insert((import.module.as_str(), import.name.as_str())) {
            return Err(ValidationError::new(format!(
                "duplicate import `{}::{}`",
                import.module, import.name
            )));
        }
    }

    // Export targets in range. (Export names are unique by construction.)
    for (name, entity) in &module.exports {
        let in_range = match *entity {
            EntityIndex::Function(i) => module.functions.get(i).is_some(),
            EntityIndex::Table(i) => module.tables.get(i).is_some(),
            EntityIndex::Memory(i) => module.memories.get(i).is_some(),
            EntityIndex::Global(i) => module.globals.get(i).is_some(),
            EntityIndex::Tag(i) => module.tags.get(i).is_some(),
        };
        if !in_range {
            return Err(ValidationError::new(format!(
                "export `{name}` references an out-of-range index"
            )));
        }
    }

    // Size constraints are sane and under the feature caps.
    for (_, ty) in module.memories.iter() {
        if ty.size.min > ty.size.max || ty.size.min > spec.max_memory_pages {
            return Err(ValidationError::new(format!(
                "invalid memory type `{ty}`"
            )));
        }
    }
    for (_, ty) in module.tables.iter() {
        if !ty.element_type.is_reference()
            || ty.size.min > ty.size.max
            || ty.size.min > spec.max_table_elems
        {
            return Err(ValidationError::new(format!("invalid table type `{ty}`")));
        }
    }

    // The start function takes no parameters and returns no results.
    if let Some(start) = module.start {
        let Some(def) = module.functions.get(start) else {
            return Err(ValidationError::new(
                "start function index is out of range",
            ));
        };
        let ty = module.types[def.signature];
        if !ty.params().is_empty() || !ty.results().is_empty() {
            return Err(ValidationError::new(format!(
                "start function must have type ()->(), found {ty}"
            )));
        }
    }

    // Global initializers are constant expressions over imported immutable
    // globals (and references to imported functions).
    for (defined_index, init) in module.global_initializers.iter() {
        let global_index = module.global_index(defined_index);
        let ty = module.globals[global_index];

        for referenced in init.referenced_globals() {
            check_initializer_global(module, referenced)?;
        }
        for func in init.referenced_funcs() {
            if !module.is_imported_func(func) {
                return Err(ValidationError::new(
                    "global initializer takes a reference to a non-imported function",
                ));
            }
        }

        let result = init
            .result_type(|g| module.globals.get(g).map(|ty| ty.content))
            .ok_or_else(|| ValidationError::new("malformed global initializer"))?;
        if !ValType::is_subtype(result, ty.content) {
            return Err(ValidationError::new(format!(
                "global initializer of type {result} does not match `{ty}`"
            )));
        }
    }

    // Segments: containers in range, i32 offsets, element types consistent.
    for (index, segment) in module.element_segments.iter().enumerate() {
        let Some(table_ty) = module.tables.get(segment.table_index).copied() else {
            return Err(ValidationError::new(format!(
                "element segment {index} references an out-of-range table"
            )));
        };
        check_segment_offset(module, &segment.offset)?;
        match &segment.elements {
            SegmentElements::Functions(funcs) => {
                if !ValType::is_subtype(ValType::AnyFunc, table_ty.element_type) {
                    return Err(ValidationError::new(format!(
                        "element segment {index} holds functions but the table holds {}",
                        table_ty.element_type
                    )));
                }
                for func in funcs.iter() {
                    if module.functions.get(*func).is_none() {
                        return Err(ValidationError::new(format!(
                            "element segment {index} references an out-of-range function"
                        )));
                    }
                }
            }
            SegmentElements::Expressions(exprs) => {
                for expr in exprs.iter() {
                    for referenced in expr.referenced_globals() {
                        check_initializer_global(module, referenced)?;
                    }
                    for func in expr.referenced_funcs() {
                        if module.functions.get(func).is_none() {
                            return Err(ValidationError::new(format!(
                                "element segment {index} references an out-of-range function"
                            )));
                        }
                    }
                    let result = expr
                        .result_type(|g| module.globals.get(g).map(|ty| ty.content))
                        .ok_or_else(|| {
                            ValidationError::new(format!("malformed element in segment {index}"))
                        })?;
                    if !ValType::is_subtype(result, table_ty.element_type) {
                        return Err(ValidationError::new(format!(
                            "element of type {result} does not match table element type {}",
                            table_ty.element_type
                        )));
                    }
                }
            }
        }
    }
    for (index, segment) in module.data_segments.iter().enumerate() {
        if module.memories.get(segment.memory_index).is_none() {
            return Err(ValidationError::new(format!(
                "data segment {index} references an out-of-range memory"
            )));
        }
        check_segment_offset(module, &segment.offset)?;
    }

    // Per-body caps: locals and label nesting.
    for (defined_index, body) in module.function_bodies.iter() {
        let func_index = module.func_index(defined_index);
        let params = module.func_type(func_index).params().len();
        if params + body.locals.len() > spec.max_locals {
            return Err(ValidationError::with_offset(
                format!(
                    "function {} declares more than {} locals",
                    func_index.as_u32(),
                    spec.max_locals
                ),
                body.offset,
            ));
        }

        let mut depth = 0usize;
        let mut reader =
            ConstExpr::new(BinaryReader::new(&body.bytes, body.offset)).get_operators_reader();
        while !reader.eof() {
            let op = reader.read().map_err(|e| {
                ValidationError::with_offset(
                    format!("malformed function body: {}", e.message()),
                    e.offset(),
                )
            })?;
            match op {
                Operator::Block { .. }
                | Operator::Loop { .. }
                | Operator::If { .. }
                | Operator::Try { .. }
                | Operator::TryTable { .. } => {
                    depth += 1;
                    if depth > spec.max_labels_per_function {
                        return Err(ValidationError::with_offset(
                            format!(
                                "function {} nests deeper than {} labels",
                                func_index.as_u32(),
                                spec.max_labels_per_function
                            ),
                            body.offset,
                        ));
                    }
                }
                Operator::End => depth = depth.saturating_sub(1),
                _ => {}
            }
        }
    }

    Ok(())
}

fn check_initializer_global(
    module: &Module,
    index: GlobalIndex,
) -> Result<(), ValidationError> {
    if !module.is_imported_global(index) {
        return Err(ValidationError::new(
            "initializer references a non-imported global",
        ));
    }
    match module.globals.get(index) {
        Some(ty) if !ty.is_mutable() => Ok(()),
        Some(_) => Err(ValidationError::new(
            "initializer references a mutable global",
        )),
        None => Err(ValidationError::new(
            "initializer references an out-of-range global",
        )),
    }
}

fn check_segment_offset(
    module: &Module,
    offset: &crate::ConstExpr,
) -> Result<(), ValidationError> {
    for referenced in offset.referenced_globals() {
        check_initializer_global(module, referenced)?;
    }
    if offset.referenced_funcs().next().is_some() {
        return Err(ValidationError::new(
            "segment offset takes a function reference",
        ));
    }
    let result = offset
        .result_type(|g| module.globals.get(g).map(|ty| ty.content))
        .ok_or_else(|| ValidationError::new("malformed segment offset"))?;
    if result != ValType::I32 {
        return Err(ValidationError::new(format!(
            "segment offset must be i32, found {result}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_rule() {
        let mut locus = TextFileLocus::default();
        locus.advance("\t\tlet x");
        assert_eq!(locus.newlines, 0);
        assert_eq!(locus.tabs, 2);
        assert_eq!(locus.characters, 5);
        assert_eq!(locus.column(4), 2 * 4 + 5 + 1);
        assert_eq!(locus.line(), 1);

        locus.advance("\nfoo");
        assert_eq!(locus.line(), 2);
        assert_eq!(locus.column(4), 4);
    }
}
