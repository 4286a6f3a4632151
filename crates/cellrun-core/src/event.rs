//! Events emitted while a cell executes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Output channel of a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Stdout,
    Stderr,
}

impl Channel {
    /// Wire name of the channel.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    /// Code returned without raising.
    Completed,
    /// Code raised, failed to parse, or was rejected by the session guard.
    Failed,
    /// A cancellation was observed mid-execution.
    Aborted,
}

impl CompletionStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }
}

/// Liveness of the tracked automation session at the time an event is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Started,
    Stopped,
}

impl SessionStatus {
    #[must_use]
    pub const fn from_live(live: bool) -> Self {
        if live { Self::Started } else { Self::Stopped }
    }
}

/// A single write on one of the output channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputEvent {
    pub channel: Channel,
    pub data: String,
    pub cell_id: Option<String>,
    /// `true` for writes made by the cell itself, `false` for engine diagnostics.
    pub success: bool,
    /// Debug chain attached to protocol errors.
    pub traceback: Option<String>,
}

impl OutputEvent {
    /// A write captured from running code.
    #[must_use]
    pub fn captured(channel: Channel, data: impl Into<String>, cell_id: Option<String>) -> Self {
        Self {
            channel,
            data: data.into(),
            cell_id,
            success: true,
            traceback: None,
        }
    }

    /// A diagnostic written to stderr by the engine on behalf of a cell.
    #[must_use]
    pub fn diagnostic(data: impl Into<String>, cell_id: Option<String>) -> Self {
        Self {
            channel: Channel::Stderr,
            data: data.into(),
            cell_id,
            success: false,
            traceback: None,
        }
    }

    /// Attach a traceback.
    #[must_use]
    pub fn with_traceback(mut self, traceback: impl Into<String>) -> Self {
        self.traceback = Some(traceback.into());
        self
    }
}

/// Terminal event of one execution. Exactly one is emitted per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionEvent {
    pub cell_id: Option<String>,
    pub success: bool,
    pub completion_status: CompletionStatus,
    pub session_status: SessionStatus,
}

/// Anything the engine sends back for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Output(OutputEvent),
    Completion(CompletionEvent),
}

impl Event {
    /// Cell id the event is tagged with.
    #[must_use]
    pub fn cell_id(&self) -> Option<&str> {
        match self {
            Self::Output(out) => out.cell_id.as_deref(),
            Self::Completion(done) => done.cell_id.as_deref(),
        }
    }

    #[must_use]
    pub const fn is_completion(&self) -> bool {
        matches!(self, Self::Completion(_))
    }
}

impl From<OutputEvent> for Event {
    fn from(event: OutputEvent) -> Self {
        Self::Output(event)
    }
}

impl From<CompletionEvent> for Event {
    fn from(event: CompletionEvent) -> Self {
        Self::Completion(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&CompletionStatus::Aborted).unwrap(),
            "\"aborted\""
        );
        assert_eq!(
            serde_json::to_string(&SessionStatus::Started).unwrap(),
            "\"started\""
        );
        assert_eq!(Channel::Stderr.to_string(), "stderr");
    }

    #[test]
    fn test_diagnostic_is_unsuccessful_stderr() {
        let event = OutputEvent::diagnostic("boom\n", Some("c1".into()));
        assert_eq!(event.channel, Channel::Stderr);
        assert!(!event.success);
        assert_eq!(Event::from(event).cell_id(), Some("c1"));
    }
}
