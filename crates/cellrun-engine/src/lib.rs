//! Sequential cell execution engine.
//!
//! One dedicated worker thread owns the interpreter, its namespace and the
//! session guard. Requests are queued from any thread and resolved strictly
//! in submission order, each with exactly one completion event.
//!
//! Provides:
//! - `Engine` - enqueue, stop, credentials, status and shutdown
//! - `EngineConfig` - poll interval, echo, constructor name, session settings
//! - `StopError` - why an interrupt could not be delivered

mod cancel;
mod capture;
mod completion;
pub mod config;
mod engine;
mod queue;
mod worker;

pub use cancel::{Delivery, StopError};
pub use completion::{CANCELLED_MESSAGE, Completion};
pub use config::EngineConfig;
pub use engine::{Engine, EngineError, EngineStatus};
