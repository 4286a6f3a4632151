//! Per-connection command dispatch.

use std::sync::Arc;

use cellrun_core::{Event, EventSink, ExecutionRequest, OutputEvent};
use cellrun_engine::Engine;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::{ClientCommand, ProtocolError};

/// State of one client connection: its current cell id and the code
/// buffer being collected.
pub struct Connection {
    id: Uuid,
    engine: Arc<Engine>,
    events: mpsc::UnboundedSender<Event>,
    cell_id: Option<String>,
    buffer: Option<Vec<String>>,
}

impl Connection {
    /// `events` receives everything emitted for this connection: output
    /// and completions of its requests, and reports of malformed frames.
    #[must_use]
    pub fn new(engine: Arc<Engine>, events: mpsc::UnboundedSender<Event>) -> Self {
        Self {
            id: Uuid::new_v4(),
            engine,
            events,
            cell_id: None,
            buffer: None,
        }
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Cell id attached to the next request.
    #[must_use]
    pub fn cell_id(&self) -> Option<&str> {
        self.cell_id.as_deref()
    }

    #[must_use]
    pub const fn is_collecting(&self) -> bool {
        self.buffer.is_some()
    }

    /// Handle one text frame.
    pub fn handle_text(&mut self, text: &str) {
        match ClientCommand::parse(text) {
            Ok(cmd) => self.dispatch(cmd),
            Err(err) => self.report(&err),
        }
    }

    /// Handle one binary frame as UTF-8 text.
    pub fn handle_binary(&mut self, data: Vec<u8>) {
        match String::from_utf8(data) {
            Ok(text) => self.handle_text(&text),
            Err(err) => self.report(&ProtocolError::from(err)),
        }
    }

    /// Apply one decoded command.
    pub fn dispatch(&mut self, cmd: ClientCommand) {
        match cmd {
            ClientCommand::CellId { cell_id } => {
                tracing::debug!(connection = %self.id, %cell_id, "cell id set");
                self.cell_id = Some(cell_id);
            }
            ClientCommand::CellCodeStart => {
                if let Some(stale) = self.buffer.replace(Vec::new()) {
                    tracing::debug!(
                        connection = %self.id,
                        lines = stale.len(),
                        "discarding unflushed code buffer"
                    );
                }
            }
            ClientCommand::CellCodeLine { line } => {
                if let Some(buffer) = &mut self.buffer {
                    buffer.push(line);
                }
            }
            ClientCommand::CellCodeEnd => {
                if let Some(lines) = self.buffer.take() {
                    let sink: Arc<dyn EventSink> = Arc::new(self.events.clone());
                    let request = ExecutionRequest::from_lines(self.cell_id.clone(), lines, sink);
                    if let Some(seq) = self.engine.enqueue(request) {
                        tracing::info!(connection = %self.id, seq, "cell submitted");
                    }
                }
            }
            ClientCommand::StopExecution => {
                if let Err(e) = self.engine.stop() {
                    tracing::warn!(connection = %self.id, "Failed to stop execution: {e}");
                }
            }
            ClientCommand::UpdateApiKey { data } => self.engine.set_credential(data),
            ClientCommand::Unknown => {}
        }
    }

    fn report(&self, err: &ProtocolError) {
        tracing::warn!(connection = %self.id, "Invalid client frame: {err}");
        let event = OutputEvent::diagnostic(err.to_string(), self.cell_id.clone())
            .with_traceback(err.traceback());
        self.events.emit(event.into());
    }
}
