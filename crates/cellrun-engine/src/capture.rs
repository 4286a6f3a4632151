//! Output capture scoped to one execution.

use std::sync::Arc;

use cellrun_core::{Channel, EventSink, ExecutionRequest, OutputEvent};
use cellrun_script::{Interpreter, OutputStream, StdStream, Streams};

/// Forwards every write as an output event, optionally echoing it.
struct CapturingStream {
    channel: Channel,
    cell_id: Option<String>,
    sink: Arc<dyn EventSink>,
    echo: Option<StdStream>,
}

impl OutputStream for CapturingStream {
    fn write(&mut self, text: &str) {
        if let Some(echo) = &mut self.echo {
            echo.write(text);
        }
        self.sink.emit(
            OutputEvent::captured(self.channel, text, self.cell_id.clone()).into(),
        );
    }

    fn flush(&mut self) {
        if let Some(echo) = &mut self.echo {
            echo.flush();
        }
    }
}

/// Installs capturing streams on an interpreter and restores the previous
/// ones when dropped, on every exit path.
pub(crate) struct CaptureGuard<'a> {
    interp: &'a mut Interpreter,
    saved: Option<Streams>,
}

impl<'a> CaptureGuard<'a> {
    pub fn attach(interp: &'a mut Interpreter, request: &ExecutionRequest, echo: bool) -> Self {
        let stream = |channel| -> Box<dyn OutputStream> {
            Box::new(CapturingStream {
                channel,
                cell_id: request.cell_id().map(str::to_owned),
                sink: Arc::clone(request.sink()),
                echo: echo.then(|| StdStream::new(channel)),
            })
        };
        let saved = interp.runtime_mut().swap_streams(Streams {
            stdout: stream(Channel::Stdout),
            stderr: stream(Channel::Stderr),
        });
        Self {
            interp,
            saved: Some(saved),
        }
    }

    pub fn interpreter(&mut self) -> &mut Interpreter {
        self.interp
    }
}

impl Drop for CaptureGuard<'_> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            self.interp.runtime_mut().swap_streams(saved);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use cellrun_core::Event;
    use cellrun_script::Runtime;

    use super::*;

    #[test]
    fn test_writes_become_events_until_detached() {
        let mut interp = Interpreter::new(Runtime::detached());
        interp.runtime_mut().swap_streams(Streams::null());
        let (tx, rx) = mpsc::channel::<Event>();
        let request = ExecutionRequest::new(Some("c7".into()), "", Arc::new(tx));

        {
            let mut capture = CaptureGuard::attach(&mut interp, &request, false);
            capture
                .interpreter()
                .run("import sys\nprint('a')\nprint('b', file=sys.stderr)")
                .unwrap();
        }
        interp.run("print('after')").unwrap();

        let events: Vec<Event> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                Event::from(OutputEvent::captured(Channel::Stdout, "a\n", Some("c7".into()))),
                Event::from(OutputEvent::captured(Channel::Stderr, "b\n", Some("c7".into()))),
            ]
        );
    }

    #[test]
    fn test_streams_restored_after_error() {
        let mut interp = Interpreter::new(Runtime::detached());
        interp.runtime_mut().swap_streams(Streams::null());
        let (tx, rx) = mpsc::channel::<Event>();
        let request = ExecutionRequest::new(None, "", Arc::new(tx));

        {
            let mut capture = CaptureGuard::attach(&mut interp, &request, false);
            assert!(capture.interpreter().run("print('x')\nraise ValueError").is_err());
        }
        interp.run("print('quiet')").unwrap();
        assert_eq!(rx.try_iter().count(), 1);
    }
}
