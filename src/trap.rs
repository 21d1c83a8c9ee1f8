// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Structured delivery of guest faults to the host.
//!
//! Traps and guest-thrown exceptions are *values*, not host panics: anything
//! abnormal that happens while guest code is running is packaged as an
//! [`Exception`] and surfaced through the `Result` returned by the call into
//! the guest. [`catch_runtime_exceptions`] is the scoped frame host code
//! installs around such calls.

use core::fmt;

use crate::tag::Tag;
use crate::values::Val;

/// A WebAssembly-level fault that aborts the current guest call.
#[derive(onlyerror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trap {
    /// The call stack space reserved for the guest was exhausted.
    #[error("call stack exhausted")]
    StackOverflow,
    /// An out-of-bounds memory access.
    #[error("out of bounds memory access")]
    MemoryOutOfBounds,
    /// Out-of-bounds access to a table.
    #[error("out of bounds table access")]
    TableOutOfBounds,
    /// Indirect call to a null table entry.
    #[error("indirect call to a null table entry")]
    IndirectCallToNull,
    /// Signature mismatch on indirect call.
    #[error("indirect call signature mismatch")]
    BadSignature,
    /// An integer arithmetic operation caused an overflow.
    #[error("integer overflow")]
    IntegerOverflow,
    /// An integer division by zero.
    #[error("integer division by zero")]
    IntegerDivisionByZero,
    /// Failed float-to-int conversion.
    #[error("invalid conversion to integer")]
    BadConversionToInteger,
    /// Code that was supposed to have been unreachable was reached.
    #[error("unreachable code executed")]
    UnreachableCodeReached,
    /// A null reference was dereferenced.
    #[error("null reference")]
    NullReference,
}

/// One frame of a captured call stack.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// The instruction offset within the frame's function.
    pub ip: usize,
    description: Option<String>,
}

// ===== impl Frame =====

impl Frame {
    pub(crate) fn new(ip: usize, description: Option<String>) -> Self {
        Self { ip, description }
    }

    /// A human-readable description of the frame's function.
    pub fn description(&self) -> &str {
        self.description.as_deref().unwrap_or("<unknown function>")
    }
}

/// The guest call stack captured when an exception was raised, innermost
/// frame first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallStack {
    frames: Vec<Frame>,
}

// ===== impl CallStack =====

impl CallStack {
    pub(crate) fn new(frames: Vec<Frame>) -> Self {
        Self { frames }
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl fmt::Display for CallStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for frame in &self.frames {
            writeln!(f, "  at {} (+{})", frame.description(), frame.ip)?;
        }
        Ok(())
    }
}

/// The structured value delivered to the host when a guest call faults or
/// throws.
///
/// Traps carry a [`Trap`] and no tag; guest- or host-thrown exceptions carry
/// the [`Tag`] they were thrown with plus the argument values bound at the
/// throw site. Tags compare by identity, so a `catch` matches exactly the
/// throws performed with the same tag instance.
#[derive(Debug, Clone)]
pub struct Exception {
    tag: Option<Tag>,
    trap: Option<Trap>,
    arguments: Vec<Val>,
    call_stack: CallStack,
}

// ===== impl Exception =====

impl Exception {
    /// Packages a trap.
    pub fn from_trap(trap: Trap, call_stack: CallStack) -> Self {
        Self {
            tag: None,
            trap: Some(trap),
            arguments: Vec::new(),
            call_stack,
        }
    }

    /// Packages a user exception thrown with `tag`.
    pub fn new(tag: Tag, arguments: Vec<Val>, call_stack: CallStack) -> Self {
        Self {
            tag: Some(tag),
            trap: None,
            arguments,
            call_stack,
        }
    }

    /// The tag this exception was thrown with, `None` for traps.
    pub fn tag(&self) -> Option<Tag> {
        self.tag
    }

    /// The trap kind, `None` for user exceptions.
    pub fn trap(&self) -> Option<Trap> {
        self.trap
    }

    pub fn is_trap(&self) -> bool {
        self.trap.is_some()
    }

    /// The argument values bound at the throw site.
    pub fn arguments(&self) -> &[Val] {
        &self.arguments
    }

    pub fn call_stack(&self) -> &CallStack {
        &self.call_stack
    }

    pub(crate) fn set_call_stack_if_empty(&mut self, call_stack: CallStack) {
        if self.call_stack.is_empty() {
            self.call_stack = call_stack;
        }
    }

    /// Converts this exception into an error for propagation through
    /// `crate::Result`; [`catch_runtime_exceptions`] recovers it by
    /// downcasting.
    pub fn into_error(self) -> anyhow::Error {
        anyhow::Error::new(self)
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.trap {
            Some(trap) => write!(f, "trap: {trap}")?,
            None => write!(f, "unhandled exception with {} arguments", self.arguments.len())?,
        }
        if !self.call_stack.is_empty() {
            write!(f, "\n{}", self.call_stack)?;
        }
        Ok(())
    }
}

impl std::error::Error for Exception {}

/// Runs `thunk`, delivering any runtime [`Exception`] it raises to `handler`.
///
/// Exactly one of the following happens: `thunk` returns normally and its
/// value is returned as `Ok(Some(..))`, or `handler` is invoked once with the
/// exception and `Ok(None)` is returned. Errors that are not runtime
/// exceptions (host API misuse, resource exhaustion) propagate unchanged.
pub fn catch_runtime_exceptions<T>(
    thunk: impl FnOnce() -> crate::Result<T>,
    handler: impl FnOnce(Exception),
) -> crate::Result<Option<T>> {
    match thunk() {
        Ok(value) => Ok(Some(value)),
        Err(error) => match error.downcast::<Exception>() {
            Ok(exception) => {
                handler(exception);
                Ok(None)
            }
            Err(error) => Err(error),
        },
    }
}
