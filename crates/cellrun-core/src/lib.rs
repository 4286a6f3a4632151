//! Core abstractions for the cellrun execution engine.
//!
//! This crate provides the fundamental building blocks:
//! - `ExecutionRequest` - One cell of code queued for the worker
//! - `Event` - Output and completion events streamed back to clients
//! - `EventSink` - Where a request's events are delivered
//! - `CredentialStore` - Process-wide credential side channel

pub mod credentials;
pub mod event;
pub mod request;
pub mod sink;

pub use credentials::CredentialStore;
pub use event::{Channel, CompletionEvent, CompletionStatus, Event, OutputEvent, SessionStatus};
pub use request::ExecutionRequest;
pub use sink::EventSink;
