//! Restricted embedded interpreter for notebook cells.
//!
//! Provides:
//! - A Python-flavoured cell language (lexer, parser, AST)
//! - `Interpreter` - executes programs against a persistent `Namespace`
//! - `last_call_assignment` - static scan used by the session guard
//! - `Runtime` - output streams, cancellation checkpoints and credentials

pub mod ast;
mod builtins;
pub mod error;
pub mod interp;
pub mod lexer;
mod ops;
pub mod parser;
pub mod runtime;
pub mod scan;
pub mod value;

pub use error::{Cancelled, ExecError, ExecResult, ScriptError};
pub use interp::{Interpreter, MAX_CALL_DEPTH, Namespace};
pub use parser::parse;
pub use runtime::{Control, NeverCancel, NullStream, OutputStream, Runtime, StdStream, Streams};
pub use scan::last_call_assignment;
pub use value::{Args, NativeObject, Value};
