//! Services the interpreter needs from its host: output streams,
//! cancellation checkpoints and credentials.

use std::{
    io::{self, Write},
    sync::Arc,
    time::Duration,
};

use cellrun_core::{Channel, CredentialStore};

use crate::error::{Cancelled, ExecResult};

/// Destination for text written by cell code.
pub trait OutputStream {
    fn write(&mut self, text: &str);

    fn flush(&mut self) {}
}

/// The real process stdout or stderr.
#[derive(Debug, Clone, Copy)]
pub struct StdStream {
    channel: Channel,
}

impl StdStream {
    #[must_use]
    pub const fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

impl OutputStream for StdStream {
    fn write(&mut self, text: &str) {
        // Output is best-effort; a closed terminal must not fail the cell.
        let _ = match self.channel {
            Channel::Stdout => {
                let mut out = io::stdout().lock();
                out.write_all(text.as_bytes()).and_then(|()| out.flush())
            }
            Channel::Stderr => {
                let mut err = io::stderr().lock();
                err.write_all(text.as_bytes()).and_then(|()| err.flush())
            }
        };
    }

    fn flush(&mut self) {
        let _ = match self.channel {
            Channel::Stdout => io::stdout().flush(),
            Channel::Stderr => io::stderr().flush(),
        };
    }
}

/// Stream that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStream;

impl OutputStream for NullStream {
    fn write(&mut self, _text: &str) {}
}

/// The pair of streams cell code writes to.
pub struct Streams {
    pub stdout: Box<dyn OutputStream>,
    pub stderr: Box<dyn OutputStream>,
}

impl Streams {
    /// Streams writing to the process stdout and stderr.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            stdout: Box::new(StdStream::new(Channel::Stdout)),
            stderr: Box::new(StdStream::new(Channel::Stderr)),
        }
    }

    /// Streams discarding all output.
    #[must_use]
    pub fn null() -> Self {
        Self {
            stdout: Box::new(NullStream),
            stderr: Box::new(NullStream),
        }
    }

    pub fn get_mut(&mut self, channel: Channel) -> &mut dyn OutputStream {
        match channel {
            Channel::Stdout => self.stdout.as_mut(),
            Channel::Stderr => self.stderr.as_mut(),
        }
    }
}

impl Default for Streams {
    fn default() -> Self {
        Self::standard()
    }
}

/// Cooperative cancellation, polled by the interpreter.
///
/// `checkpoint` consumes a pending interrupt. `sleep` must wake early and
/// return `Err(Cancelled)` when one arrives.
pub trait Control: Send + Sync {
    /// # Errors
    /// Returns `Cancelled` if an interrupt is pending.
    fn checkpoint(&self) -> Result<(), Cancelled>;

    /// # Errors
    /// Returns `Cancelled` if an interrupt arrives before `duration` elapses.
    fn sleep(&self, duration: Duration) -> Result<(), Cancelled>;
}

/// Control that is never interrupted.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverCancel;

impl Control for NeverCancel {
    fn checkpoint(&self) -> Result<(), Cancelled> {
        Ok(())
    }

    fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        std::thread::sleep(duration);
        Ok(())
    }
}

/// Host services handed to native functions and objects.
pub struct Runtime {
    streams: Streams,
    control: Arc<dyn Control>,
    credentials: Arc<CredentialStore>,
}

impl Runtime {
    #[must_use]
    pub fn new(control: Arc<dyn Control>, credentials: Arc<CredentialStore>) -> Self {
        Self {
            streams: Streams::standard(),
            control,
            credentials,
        }
    }

    /// Runtime with no cancellation and a private credential store.
    #[must_use]
    pub fn detached() -> Self {
        Self::new(Arc::new(NeverCancel), Arc::new(CredentialStore::new()))
    }

    /// Replace the output streams, returning the previous ones.
    pub fn swap_streams(&mut self, streams: Streams) -> Streams {
        std::mem::replace(&mut self.streams, streams)
    }

    pub fn write(&mut self, channel: Channel, text: &str) {
        if !text.is_empty() {
            self.streams.get_mut(channel).write(text);
        }
    }

    pub fn flush(&mut self, channel: Channel) {
        self.streams.get_mut(channel).flush();
    }

    /// # Errors
    /// Returns `ExecError::Cancelled` if an interrupt is pending.
    pub fn checkpoint(&self) -> ExecResult<()> {
        Ok(self.control.checkpoint()?)
    }

    /// Interruptible sleep.
    ///
    /// # Errors
    /// Returns `ExecError::Cancelled` if interrupted.
    pub fn sleep(&self, duration: Duration) -> ExecResult<()> {
        self.control.checkpoint()?;
        Ok(self.control.sleep(duration)?)
    }

    #[must_use]
    pub fn getenv(&self, name: &str) -> Option<String> {
        self.credentials.get(name)
    }

    #[must_use]
    pub const fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }
}
