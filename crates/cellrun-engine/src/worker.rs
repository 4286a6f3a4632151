//! The single execution worker.
//!
//! Owns the interpreter, its persistent namespace and the session guard.
//! None of these ever leave the worker thread.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use cellrun_core::{
    CompletionStatus, CredentialStore, ExecutionRequest, OutputEvent, SessionStatus,
};
use cellrun_script::{Control, ExecError, Interpreter, Runtime, parse};
use cellrun_session::{GuardDecision, SessionFactory, SessionGuard};

use crate::{
    cancel::{Attachment, CancelSignal, StopError},
    capture::CaptureGuard,
    completion::{CANCELLED_MESSAGE, Completion},
    config::EngineConfig,
    queue::{Next, QueueReceiver, QueuedRequest},
};

/// Flags shared between the engine handle and the worker thread.
#[derive(Debug)]
pub(crate) struct WorkerState {
    busy: AtomicBool,
    shutting_down: AtomicBool,
    alive: AtomicBool,
}

impl Default for WorkerState {
    fn default() -> Self {
        Self {
            busy: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            alive: AtomicBool::new(true),
        }
    }
}

impl WorkerState {
    fn mark_busy(&self) {
        self.busy.store(true, Ordering::SeqCst);
    }

    fn mark_idle(&self) {
        self.busy.store(false, Ordering::SeqCst);
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

/// Clears the alive flag however the worker thread exits.
struct AliveGuard(Arc<WorkerState>);

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.0.busy.store(false, Ordering::SeqCst);
        self.0.alive.store(false, Ordering::SeqCst);
    }
}

pub(crate) struct Worker {
    interp: Interpreter,
    guard: SessionGuard,
    attachment: Attachment,
    echo_output: bool,
}

impl Worker {
    /// Build the worker. Must run on the worker thread.
    pub fn new(
        config: &EngineConfig,
        factory: Arc<dyn SessionFactory>,
        credentials: Arc<CredentialStore>,
        signal: &Arc<CancelSignal>,
        attachment: Attachment,
    ) -> Self {
        let control: Arc<dyn Control> = Arc::clone(signal) as Arc<dyn Control>;
        let mut interp = Interpreter::new(Runtime::new(control, credentials));
        cellrun_session::install(&mut interp, &config.session_constructor, factory);
        Self {
            interp,
            guard: SessionGuard::new(config.session_constructor.clone()),
            attachment,
            echo_output: config.echo_output,
        }
    }

    /// Consume the queue until it closes or shutdown is requested.
    pub fn run(mut self, queue: &QueueReceiver, state: &Arc<WorkerState>, config: &EngineConfig) {
        let _alive = AliveGuard(Arc::clone(state));
        tracing::info!("execution worker started");
        while !state.is_shutting_down() {
            match queue.next(config.poll_interval) {
                Next::Ready(QueuedRequest { seq, request }) if state.is_shutting_down() => {
                    tracing::info!(seq, "refusing request dequeued during shutdown");
                    refuse(&request, self.guard.session_status());
                }
                Next::Ready(item) => {
                    state.mark_busy();
                    self.process(item);
                    state.mark_idle();
                }
                Next::Idle => {}
                Next::Closed => break,
            }
        }
        let session_status = self.guard.session_status();
        for QueuedRequest { seq, request } in queue.close() {
            tracing::info!(seq, "dropping queued request on shutdown");
            refuse(&request, session_status);
        }
        tracing::info!("execution worker stopped");
    }

    fn process(&mut self, item: QueuedRequest) {
        let QueuedRequest { seq, request } = item;
        let cell_id = request.cell_id().map(str::to_owned);
        let span = tracing::info_span!("cell", seq, cell_id = cell_id.as_deref().unwrap_or(""));
        let _enter = span.enter();
        tracing::debug!(bytes = request.code().len(), "request dequeued");

        let mut completion = Completion::start();
        self.attachment.begin_execution();
        self.execute(&request, &mut completion);
        self.attachment.end_execution();

        let event = completion.into_event(cell_id, self.guard.session_status());
        tracing::info!(
            status = event.completion_status.as_str(),
            session = ?event.session_status,
            "request completed"
        );
        request.sink().emit(event.into());
    }

    fn execute(&mut self, request: &ExecutionRequest, completion: &mut Completion) {
        let diagnostic = |message: String| {
            request.sink().emit(
                OutputEvent::diagnostic(message, request.cell_id().map(str::to_owned)).into(),
            );
        };

        let program = match parse(request.code()) {
            Ok(program) => program,
            Err(err) => {
                tracing::debug!("syntax error: {err}");
                diagnostic(format!("{err}\n"));
                completion.finish(CompletionStatus::Failed);
                return;
            }
        };

        let decision = match self.guard.inspect(&program) {
            Ok(decision) => decision,
            Err(rejection) => {
                diagnostic(format!("{rejection}\n"));
                completion.finish(CompletionStatus::Failed);
                return;
            }
        };

        let result = {
            let mut capture = CaptureGuard::attach(&mut self.interp, request, self.echo_output);
            capture.interpreter().exec(&program)
        };

        completion.finish_with(&result);
        match result {
            Ok(()) => {
                if let GuardDecision::Proceed { var } = decision {
                    self.guard.adopt(&var, self.interp.namespace());
                }
            }
            Err(ExecError::Cancelled) => {
                tracing::info!("execution interrupted");
                diagnostic(format!("{CANCELLED_MESSAGE}\n"));
            }
            Err(ExecError::Script(err)) => {
                tracing::warn!(line = ?self.interp.error_line(), "cell raised {err}");
                diagnostic(format!("{err}\n"));
            }
        }
    }
}

/// Resolve a request that will never run.
pub(crate) fn refuse(request: &ExecutionRequest, session_status: SessionStatus) {
    let cell_id = request.cell_id().map(str::to_owned);
    let sink = request.sink();
    let message = format!("{}\n", StopError::WorkerGone);
    sink.emit(OutputEvent::diagnostic(message, cell_id.clone()).into());
    let mut completion = Completion::start();
    completion.finish(CompletionStatus::Failed);
    sink.emit(completion.into_event(cell_id, session_status).into());
}
