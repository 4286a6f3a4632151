//! Automation sessions and the session-singleton guard.
//!
//! Provides:
//! - `BrowserSession` - the session object cell code constructs
//! - `SessionFactory` - how the `Session(...)` builtin builds sessions
//! - `SessionGuard` - rejects a second live session before its cell runs

pub mod browser;
pub mod guard;

pub use browser::{BrowserSession, SessionConfig, SessionFactory, SimulatedSessionFactory, install};
pub use guard::{GuardDecision, GuardRejection, SessionGuard};
