//! Scripting engine boundary for the scriba document server.
//!
//! The server core never talks to a concrete script runtime directly. It goes
//! through four object-safe traits that model the full lifecycle of a script:
//!
//! - [`ScriptEngine`] hands out fresh compile contexts.
//! - [`Compiler`] collects global-name declarations and then compiles source
//!   into an immutable [`Program`]. Every global a script might touch must be
//!   declared *before* compilation; names cannot be added to a compiled
//!   program afterwards.
//! - [`Program`] is the shared, immutable compilation result. It can stamp
//!   out any number of independent [`Instance`]s.
//! - [`Instance`] is a mutable execution copy with its own global-binding
//!   table. Instances are borrowed for exactly one request at a time and can
//!   be reset and reused.
//!
//! The crate also ships a conforming backend: [`Interpreter`], a small
//! deterministic tree-walking interpreter for the template statement
//! language. Any other runtime that implements the traits can be dropped in
//! behind the same cache and pipeline.

mod error;
mod interp;
mod value;

pub use error::{BindError, CompileError, ExecError};
pub use interp::Interpreter;
pub use value::{NativeFn, Value};

use std::sync::Arc;

/// A script runtime capable of compiling and executing programs.
pub trait ScriptEngine: Send + Sync {
    /// Open a fresh compile context.
    fn compiler(&self) -> Box<dyn Compiler>;
}

/// A single-use compile context.
///
/// Declare every global name the program may reference or have bound onto it,
/// then consume the context with [`Compiler::compile`].
pub trait Compiler: Send {
    /// Pre-declare a global name. Declaring the same name twice is a no-op.
    fn declare_global(&mut self, name: &str);

    /// Compile `source` into an immutable program.
    fn compile(self: Box<Self>, source: &[u8]) -> Result<Arc<dyn Program>, CompileError>;
}

/// An immutable compiled program. Cheap to share, never executed directly.
pub trait Program: Send + Sync {
    /// Create an independent execution instance with an empty binding table.
    fn new_instance(&self) -> Box<dyn Instance>;
}

/// A mutable execution copy of a compiled program.
pub trait Instance: Send {
    /// Bind a value to a global name declared at compile time.
    ///
    /// Binding an undeclared name fails; the set of bindable names is fixed
    /// when the program is compiled.
    fn bind_global(&mut self, name: &str, value: Value) -> Result<(), BindError>;

    /// Execute the program top to bottom.
    ///
    /// [`ExecError::Aborted`] is a deliberate in-script short-circuit, not a
    /// failure; callers treat it as a successful early exit.
    fn run(&mut self) -> Result<(), ExecError>;

    /// Clear every global binding back to null.
    ///
    /// Called before an instance is returned to a reuse pool so that no state
    /// leaks from one request into the next.
    fn reset(&mut self);
}
