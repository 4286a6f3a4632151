//! Per-request completion state machine.
//!
//! `Running -> {Completed, Failed, Aborted}`. The first transition wins;
//! a request is reported exactly once.

use cellrun_core::{CompletionEvent, CompletionStatus, SessionStatus};
use cellrun_script::ExecError;

/// Diagnostic emitted when an execution observes a cancellation.
pub const CANCELLED_MESSAGE: &str = "Cell execution cancelled (interrupted)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    status: Option<CompletionStatus>,
}

impl Completion {
    /// A fresh, running request.
    #[must_use]
    pub const fn start() -> Self {
        Self { status: None }
    }

    /// Resolve the request. Later transitions are ignored.
    pub fn finish(&mut self, status: CompletionStatus) {
        if let Some(current) = self.status {
            tracing::debug!(?current, ignored = ?status, "request already resolved");
            return;
        }
        self.status = Some(status);
    }

    /// Resolve from the result of running the code.
    pub fn finish_with(&mut self, result: &Result<(), ExecError>) {
        self.finish(match result {
            Ok(()) => CompletionStatus::Completed,
            Err(ExecError::Cancelled) => CompletionStatus::Aborted,
            Err(ExecError::Script(_)) => CompletionStatus::Failed,
        })
    }

    /// Status so far; a request that never resolved counts as completed.
    #[must_use]
    pub fn status(&self) -> CompletionStatus {
        self.status.unwrap_or(CompletionStatus::Completed)
    }

    /// Build the terminal event.
    #[must_use]
    pub fn into_event(self, cell_id: Option<String>, session_status: SessionStatus) -> CompletionEvent {
        let completion_status = self.status();
        CompletionEvent {
            cell_id,
            success: completion_status == CompletionStatus::Completed,
            completion_status,
            session_status,
        }
    }
}
