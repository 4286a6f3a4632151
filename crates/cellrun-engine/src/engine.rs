//! The engine handle shared by every connection.

use std::{
    io,
    sync::{Arc, Mutex, PoisonError},
    thread::{self, JoinHandle},
};

use cellrun_core::{CredentialStore, ExecutionRequest, SessionStatus};
use cellrun_session::SessionFactory;
use serde::Serialize;
use thiserror::Error;

use crate::{
    cancel::{CancelSignal, Delivery, StopError},
    config::EngineConfig,
    queue::{self, QueueSender},
    worker::{Worker, WorkerState, refuse},
};

/// Name of the execution worker thread.
const WORKER_THREAD_NAME: &str = "cellrun-worker";

/// Stack reserved for the worker; deep cell recursion runs on it.
const WORKER_STACK_SIZE: usize = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to spawn execution worker: {0}")]
    Spawn(#[from] io::Error),
}

/// Snapshot reported by health checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    pub busy: bool,
    pub queued: usize,
    pub worker_alive: bool,
}

/// Queue, worker thread and interrupt signal of one process.
pub struct Engine {
    queue: QueueSender,
    signal: Arc<CancelSignal>,
    state: Arc<WorkerState>,
    credentials: Arc<CredentialStore>,
    config: EngineConfig,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Spawn the worker thread and return the shared handle.
    ///
    /// # Errors
    /// Returns an error if the worker thread cannot be spawned.
    pub fn start(
        config: EngineConfig,
        factory: Arc<dyn SessionFactory>,
        credentials: Arc<CredentialStore>,
    ) -> Result<Arc<Self>, EngineError> {
        let (queue, receiver) = queue::channel();
        let signal = CancelSignal::shared();
        let state = Arc::new(WorkerState::default());

        // Attach before the thread exists so an early stop() sees a worker.
        let attachment = signal.attach();
        let handle = {
            let config = config.clone();
            let credentials = Arc::clone(&credentials);
            let signal = Arc::clone(&signal);
            let state = Arc::clone(&state);
            thread::Builder::new()
                .name(WORKER_THREAD_NAME.to_owned())
                .stack_size(WORKER_STACK_SIZE)
                .spawn(move || {
                    let worker = Worker::new(&config, factory, credentials, &signal, attachment);
                    worker.run(&receiver, &state, &config);
                })?
        };
        tracing::info!(
            poll_interval = ?config.poll_interval,
            constructor = %config.session_constructor,
            "engine started"
        );

        Ok(Arc::new(Self {
            queue,
            signal,
            state,
            credentials,
            config,
            handle: Mutex::new(Some(handle)),
        }))
    }

    /// Queue a request without blocking. Returns its sequence number.
    ///
    /// If the worker is gone the request is resolved at once as failed.
    pub fn enqueue(&self, request: ExecutionRequest) -> Option<u64> {
        if self.state.is_shutting_down() || !self.state.is_alive() {
            tracing::warn!("request refused: worker is not running");
            refuse(&request, SessionStatus::Stopped);
            return None;
        }
        match self.queue.push(request) {
            Ok(seq) => {
                tracing::debug!(seq, "request queued");
                Some(seq)
            }
            Err(queue::QueueClosed(request)) => {
                tracing::warn!("request refused: queue closed");
                refuse(&request, SessionStatus::Stopped);
                None
            }
        }
    }

    /// Interrupt the running execution. Idle stops do nothing.
    ///
    /// # Errors
    /// Returns [`StopError::WorkerGone`] if no worker is running.
    ///
    /// # Panics
    /// Panics if more than one worker is attached to the interrupt signal.
    pub fn stop(&self) -> Result<Delivery, StopError> {
        if !self.state.is_alive() {
            return Err(StopError::WorkerGone);
        }
        match self.signal.deliver() {
            Ok(delivery) => {
                tracing::info!(?delivery, "stop requested");
                Ok(delivery)
            }
            Err(StopError::AmbiguousDelivery(n)) => {
                tracing::error!(attached = n, "interrupt target is ambiguous");
                panic!("{}", StopError::AmbiguousDelivery(n));
            }
            Err(err) => Err(err),
        }
    }

    /// Store the process-wide credential under the configured name.
    pub fn set_credential(&self, value: impl Into<String>) {
        self.credentials.set(self.config.credential_var(), value);
        tracing::info!(var = self.config.credential_var(), "credential updated");
    }

    #[must_use]
    pub const fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            busy: self.state.is_busy(),
            queued: self.queue.len(),
            worker_alive: self.state.is_alive(),
        }
    }

    /// Stop the worker and wait for it to exit.
    ///
    /// A running execution is interrupted; requests still queued are
    /// resolved as failed.
    pub fn shutdown(&self) {
        self.state.begin_shutdown();
        if self.signal.close() {
            tracing::info!("interrupted running execution for shutdown");
        }
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            tracing::error!("execution worker panicked");
        }
        tracing::info!("engine shut down");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.state.begin_shutdown();
        self.signal.close();
    }
}

#[cfg(test)]
mod tests {
    use cellrun_session::SimulatedSessionFactory;

    use super::*;

    fn engine() -> Arc<Engine> {
        let config = EngineConfig {
            echo_output: false,
            poll_interval: std::time::Duration::from_millis(10),
            ..EngineConfig::default()
        };
        Engine::start(
            config,
            Arc::new(SimulatedSessionFactory::default()),
            Arc::new(CredentialStore::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_fresh_engine_status() {
        let engine = engine();
        let status = engine.status();
        assert!(status.worker_alive);
        assert!(!status.busy);
        assert_eq!(status.queued, 0);
        assert_eq!(
            serde_json::to_value(status).unwrap(),
            serde_json::json!({"busy": false, "queued": 0, "worker_alive": true})
        );
        engine.shutdown();
    }

    #[test]
    #[should_panic(expected = "interrupt delivery is ambiguous")]
    fn test_second_attachment_is_fatal() {
        let engine = engine();
        let _extra = engine.signal.attach();
        let _ = engine.stop();
    }

    #[test]
    fn test_set_credential_uses_configured_name() {
        let engine = engine();
        engine.set_credential("k-1");
        assert_eq!(
            engine.credentials().get(engine.config().credential_var()),
            Some("k-1".to_owned())
        );
        engine.shutdown();
    }
}
