//! Wire protocol for client-server communication.
//!
//! Inbound frames are JSON objects discriminated by `cmd`; outbound frames
//! are JSON objects discriminated by `type`.

use std::error::Error as _;

use cellrun_core::{Channel, CompletionStatus, Event, SessionStatus};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A frame the client sent that could not be decoded.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),
    #[error("binary frame is not valid UTF-8")]
    NotUtf8(#[from] std::string::FromUtf8Error),
}

impl ProtocolError {
    /// Debug rendering of the error and every source below it.
    #[must_use]
    pub fn traceback(&self) -> String {
        let mut chain = format!("{self:?}");
        let mut source = self.source();
        while let Some(err) = source {
            chain.push_str(&format!("\ncaused by: {err:?}"));
            source = err.source();
        }
        chain
    }
}

/// Command from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "cmd", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientCommand {
    /// Set the cell id attached to subsequent requests.
    CellId {
        #[serde(rename = "cellId", default, deserialize_with = "any_as_text")]
        cell_id: String,
    },
    /// Start collecting code lines, discarding any unflushed buffer.
    CellCodeStart,
    /// Append one line to the buffer.
    CellCodeLine {
        #[serde(default)]
        line: String,
    },
    /// Flush the buffer as one execution request.
    CellCodeEnd,
    /// Interrupt the running execution.
    StopExecution,
    /// Set the process-wide credential.
    UpdateApiKey {
        #[serde(default, deserialize_with = "any_as_text")]
        data: String,
    },
    /// Anything else; ignored.
    #[serde(other)]
    Unknown,
}

impl ClientCommand {
    /// Decode one text frame.
    ///
    /// Objects without a string `cmd` decode as [`ClientCommand::Unknown`].
    ///
    /// # Errors
    /// Returns an error for invalid JSON, non-object frames and fields of
    /// the wrong type.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        let Some(object) = value.as_object() else {
            return Err(ProtocolError::NotAnObject(json_kind(&value)));
        };
        if !object.get("cmd").is_some_and(Value::is_string) {
            return Ok(Self::Unknown);
        }
        Ok(Self::deserialize(value)?)
    }
}

/// Strings verbatim, other scalars as JSON text, null as empty.
fn any_as_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Message from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// A write to stdout.
    Stdout {
        data: String,
        cell_id: Option<String>,
        success: bool,
    },
    /// A write to stderr or a diagnostic.
    Stderr {
        data: String,
        cell_id: Option<String>,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        traceback: Option<String>,
    },
    /// Terminal event of one request.
    CellEnd {
        cell_id: Option<String>,
        success: bool,
        completion_status: CompletionStatus,
        session_status: SessionStatus,
    },
}

impl From<Event> for ServerMessage {
    fn from(event: Event) -> Self {
        match event {
            Event::Output(out) => match out.channel {
                Channel::Stdout => Self::Stdout {
                    data: out.data,
                    cell_id: out.cell_id,
                    success: out.success,
                },
                Channel::Stderr => Self::Stderr {
                    data: out.data,
                    cell_id: out.cell_id,
                    success: out.success,
                    traceback: out.traceback,
                },
            },
            Event::Completion(done) => Self::CellEnd {
                cell_id: done.cell_id,
                success: done.success,
                completion_status: done.completion_status,
                session_status: done.session_status,
            },
        }
    }
}
