//! Execution requests.

use std::{fmt, sync::Arc};

use crate::EventSink;

/// One cell of code queued for sequential execution.
///
/// Immutable once built; the worker resolves requests strictly in
/// submission order.
#[derive(Clone)]
pub struct ExecutionRequest {
    cell_id: Option<String>,
    code: String,
    sink: Arc<dyn EventSink>,
}

impl ExecutionRequest {
    /// Create a request from already-joined code text.
    #[must_use]
    pub fn new(cell_id: Option<String>, code: impl Into<String>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            cell_id,
            code: code.into(),
            sink,
        }
    }

    /// Create a request from accumulated line fragments, joined with `\n`.
    #[must_use]
    pub fn from_lines<I, S>(cell_id: Option<String>, lines: I, sink: Arc<dyn EventSink>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let code = lines
            .into_iter()
            .map(|line| line.as_ref().to_owned())
            .collect::<Vec<_>>()
            .join("\n");
        Self::new(cell_id, code, sink)
    }

    #[must_use]
    pub fn cell_id(&self) -> Option<&str> {
        self.cell_id.as_deref()
    }

    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Sink receiving this request's events.
    #[must_use]
    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }
}

impl fmt::Debug for ExecutionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionRequest")
            .field("cell_id", &self.cell_id)
            .field("code_len", &self.code.len())
            .finish_non_exhaustive()
    }
}
