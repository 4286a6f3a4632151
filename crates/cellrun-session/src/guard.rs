//! Session-singleton guard.
//!
//! Before a cell runs, its syntax tree is scanned for the last assignment
//! whose value calls the session constructor. If one exists and the
//! session adopted from an earlier cell is still started, the cell is
//! rejected without running.

use cellrun_core::SessionStatus;
use cellrun_script::{Namespace, ScriptError, Value, ast::Program, last_call_assignment};
use thiserror::Error;
use tracing::{debug, warn};

/// Why a cell was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardRejection {
    #[error(
        "Another session instance is already running. Please stop it before starting a new one, or restart the notebook."
    )]
    AlreadyRunning,
    #[error("Could not verify last session status, rejecting new instance. {0}")]
    Unverifiable(String),
}

/// Outcome of inspecting a cell that was not rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// The cell constructs no session.
    Skip,
    /// The cell may run; on success the session bound to `var` is adopted.
    Proceed { var: String },
}

/// Tracks the most recently adopted session.
pub struct SessionGuard {
    constructor: String,
    tracked: Option<Value>,
}

impl SessionGuard {
    #[must_use]
    pub fn new(constructor: impl Into<String>) -> Self {
        Self {
            constructor: constructor.into(),
            tracked: None,
        }
    }

    #[must_use]
    pub fn constructor(&self) -> &str {
        &self.constructor
    }

    #[must_use]
    pub const fn tracked(&self) -> Option<&Value> {
        self.tracked.as_ref()
    }

    /// Decide whether `program` may run.
    ///
    /// # Errors
    /// Returns a rejection if the cell constructs a session while the
    /// tracked one is started, or if the tracked one cannot be probed.
    pub fn inspect(&self, program: &Program) -> Result<GuardDecision, GuardRejection> {
        let Some(var) = last_call_assignment(program, &self.constructor) else {
            return Ok(GuardDecision::Skip);
        };
        if let Some(handle) = &self.tracked {
            match probe(handle) {
                Ok(true) => {
                    warn!(%var, "rejecting cell: a session is already running");
                    return Err(GuardRejection::AlreadyRunning);
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(%var, error = %err, "rejecting cell: session status unknown");
                    return Err(GuardRejection::Unverifiable(err.to_string()));
                }
            }
        }
        debug!(%var, "session constructor found");
        Ok(GuardDecision::Proceed { var })
    }

    /// After a successful cell, track whatever `var` is bound to. A
    /// variable bound to `None` clears the tracked session.
    ///
    /// Returns whether a value was adopted.
    pub fn adopt(&mut self, var: &str, namespace: &Namespace) -> bool {
        match namespace.get(var) {
            Some(Value::None) => {
                debug!(%var, "session variable is None; nothing tracked");
                self.tracked = None;
                false
            }
            Some(value) => {
                debug!(%var, "tracking session");
                self.tracked = Some(value.clone());
                true
            }
            None => false,
        }
    }

    /// Liveness of the tracked session. Probe failures count as stopped.
    #[must_use]
    pub fn session_status(&self) -> SessionStatus {
        SessionStatus::from_live(
            self.tracked
                .as_ref()
                .is_some_and(|handle| probe(handle).unwrap_or(false)),
        )
    }
}

/// Read the `started` attribute of a tracked handle.
fn probe(handle: &Value) -> Result<bool, ScriptError> {
    let started = match handle {
        Value::Object(obj) => obj.get_attr("started"),
        Value::Module(module) => module.attrs.get("started").cloned(),
        _ => None,
    };
    started
        .map(|value| value.is_truthy())
        .ok_or_else(|| ScriptError::attribute_error(&handle.type_name(), "started"))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cellrun_script::{Interpreter, Runtime, Streams, parse};

    use super::*;
    use crate::browser::{SessionConfig, SimulatedSessionFactory, install};

    fn setup() -> (Interpreter, SessionGuard) {
        let mut interp = Interpreter::new(Runtime::detached());
        interp.runtime_mut().swap_streams(Streams::null());
        install(
            &mut interp,
            "Session",
            Arc::new(SimulatedSessionFactory::new(SessionConfig::default())),
        );
        (interp, SessionGuard::new("Session"))
    }

    /// Inspect, run and adopt like the worker does.
    fn run_cell(
        interp: &mut Interpreter,
        guard: &mut SessionGuard,
        src: &str,
    ) -> Result<GuardDecision, GuardRejection> {
        let program = parse(src).unwrap();
        let decision = guard.inspect(&program)?;
        interp.exec(&program).unwrap();
        if let GuardDecision::Proceed { var } = &decision {
            guard.adopt(var, interp.namespace());
        }
        Ok(decision)
    }

    #[test]
    fn test_cells_without_constructor_skip() {
        let (mut interp, mut guard) = setup();
        assert_eq!(run_cell(&mut interp, &mut guard, "x = 1"), Ok(GuardDecision::Skip));
        assert!(guard.tracked().is_none());
        assert_eq!(guard.session_status(), SessionStatus::Stopped);
    }

    #[test]
    fn test_second_started_session_is_rejected() {
        let (mut interp, mut guard) = setup();
        let first = run_cell(&mut interp, &mut guard, "s = Session()\ns.start()");
        assert_eq!(first, Ok(GuardDecision::Proceed { var: "s".into() }));
        assert_eq!(guard.session_status(), SessionStatus::Started);

        let second = run_cell(&mut interp, &mut guard, "t = Session()");
        assert_eq!(second, Err(GuardRejection::AlreadyRunning));
        assert!(!interp.namespace().contains("t"));
    }

    #[test]
    fn test_stopped_session_allows_a_new_one() {
        let (mut interp, mut guard) = setup();
        run_cell(&mut interp, &mut guard, "s = Session()\ns.start()").unwrap();
        run_cell(&mut interp, &mut guard, "s.stop()").unwrap();
        assert_eq!(guard.session_status(), SessionStatus::Stopped);
        let again = run_cell(&mut interp, &mut guard, "s2 = Session()\ns2.start()");
        assert_eq!(again, Ok(GuardDecision::Proceed { var: "s2".into() }));
    }

    #[test]
    fn test_unstarted_session_does_not_block() {
        let (mut interp, mut guard) = setup();
        run_cell(&mut interp, &mut guard, "s = Session()").unwrap();
        assert_eq!(guard.session_status(), SessionStatus::Stopped);
        assert!(run_cell(&mut interp, &mut guard, "s = Session()").is_ok());
    }

    #[test]
    fn test_unprobeable_handle_is_rejected() {
        let (mut interp, mut guard) = setup();
        // A user-defined constructor shadows the builtin and returns an int.
        run_cell(
            &mut interp,
            &mut guard,
            "def Session():\n    return 5\ns = Session()",
        )
        .unwrap();
        let rejected = run_cell(&mut interp, &mut guard, "t = Session()");
        assert_eq!(
            rejected,
            Err(GuardRejection::Unverifiable(
                "AttributeError: 'int' object has no attribute 'started'".into()
            ))
        );
        assert_eq!(guard.session_status(), SessionStatus::Stopped);
    }

    #[test]
    fn test_unbound_variable_is_not_adopted() {
        let (mut interp, mut guard) = setup();
        let program = parse("if False:\n    s = Session()").unwrap();
        let decision = guard.inspect(&program).unwrap();
        interp.exec(&program).unwrap();
        let GuardDecision::Proceed { var } = decision else {
            panic!("expected proceed");
        };
        assert!(!guard.adopt(&var, interp.namespace()));
        assert!(guard.tracked().is_none());
    }

    #[test]
    fn test_session_rebound_to_none_is_forgotten() {
        let (mut interp, mut guard) = setup();
        run_cell(&mut interp, &mut guard, "s = Session()\ns.start()").unwrap();
        assert!(guard.tracked().is_some());

        let cleared = run_cell(&mut interp, &mut guard, "s = Session()\ns = None");
        assert!(cleared.is_err());

        run_cell(&mut interp, &mut guard, "s.stop()").unwrap();
        run_cell(&mut interp, &mut guard, "s = Session()\ns = None").unwrap();
        assert!(guard.tracked().is_none());
        assert_eq!(guard.session_status(), SessionStatus::Stopped);

        let next = run_cell(&mut interp, &mut guard, "t = Session()");
        assert_eq!(next, Ok(GuardDecision::Proceed { var: "t".into() }));
    }

    #[test]
    fn test_rejection_messages() {
        assert_eq!(
            GuardRejection::Unverifiable("boom".into()).to_string(),
            "Could not verify last session status, rejecting new instance. boom"
        );
        assert!(
            GuardRejection::AlreadyRunning
                .to_string()
                .starts_with("Another session instance is already running.")
        );
    }
}
