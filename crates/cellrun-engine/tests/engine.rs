//! End-to-end behaviour of the engine: ordering, capture, guard,
//! cancellation and shutdown.

use std::{
    sync::{
        Arc,
        mpsc::{self, Receiver},
    },
    time::{Duration, Instant},
};

use cellrun_core::{
    Channel, CompletionEvent, CompletionStatus, CredentialStore, Event, ExecutionRequest,
    OutputEvent, SessionStatus,
};
use cellrun_engine::{CANCELLED_MESSAGE, Delivery, Engine, EngineConfig, StopError};
use cellrun_session::{SessionConfig, SimulatedSessionFactory};

const WAIT: Duration = Duration::from_secs(10);

fn config() -> EngineConfig {
    EngineConfig {
        poll_interval: Duration::from_millis(10),
        echo_output: false,
        session: SessionConfig {
            act_latency: Duration::ZERO,
            ..SessionConfig::default()
        },
        ..EngineConfig::default()
    }
}

fn start(config: EngineConfig) -> Arc<Engine> {
    let factory = Arc::new(SimulatedSessionFactory::new(config.session.clone()));
    Engine::start(config, factory, Arc::new(CredentialStore::new())).unwrap()
}

fn submit(engine: &Engine, cell_id: &str, code: &str) -> Receiver<Event> {
    let (tx, rx) = mpsc::channel();
    engine.enqueue(ExecutionRequest::new(Some(cell_id.into()), code, Arc::new(tx)));
    rx
}

/// Collect events up to and including the completion.
fn drain(rx: &Receiver<Event>) -> (Vec<OutputEvent>, CompletionEvent) {
    let mut outputs = Vec::new();
    loop {
        match rx.recv_timeout(WAIT).expect("request never completed") {
            Event::Output(out) => outputs.push(out),
            Event::Completion(done) => return (outputs, done),
        }
    }
}

/// Block until the next output event carries `data`.
fn wait_for_output(rx: &Receiver<Event>, data: &str) {
    loop {
        match rx.recv_timeout(WAIT).expect("output never arrived") {
            Event::Output(out) if out.data == data => return,
            Event::Output(_) => {}
            Event::Completion(done) => panic!("completed before {data:?}: {done:?}"),
        }
    }
}

fn run(engine: &Engine, code: &str) -> (Vec<OutputEvent>, CompletionEvent) {
    drain(&submit(engine, "cell", code))
}

#[test]
fn test_print_is_captured_then_completed() {
    let engine = start(config());
    let (outputs, done) = drain(&submit(&engine, "a1", "print('hi')"));

    assert_eq!(
        outputs,
        vec![OutputEvent::captured(Channel::Stdout, "hi\n", Some("a1".into()))]
    );
    assert_eq!(
        done,
        CompletionEvent {
            cell_id: Some("a1".into()),
            success: true,
            completion_status: CompletionStatus::Completed,
            session_status: SessionStatus::Stopped,
        }
    );
    engine.shutdown();
}

#[test]
fn test_raised_error_is_one_diagnostic() {
    let engine = start(config());
    let (outputs, done) = drain(&submit(&engine, "b1", "raise ValueError('x')"));

    assert_eq!(
        outputs,
        vec![OutputEvent::diagnostic("ValueError: x\n", Some("b1".into()))]
    );
    assert!(!done.success);
    assert_eq!(done.completion_status, CompletionStatus::Failed);
    engine.shutdown();
}

#[test]
fn test_second_live_session_is_rejected() {
    let engine = start(config());
    let (outputs, done) = run(&engine, "s = Session()\ns.start()");
    assert_eq!(outputs[0].channel, Channel::Stderr);
    assert!(outputs[0].success);
    assert_eq!(done.completion_status, CompletionStatus::Completed);
    assert_eq!(done.session_status, SessionStatus::Started);

    let (outputs, done) = run(&engine, "s2 = Session()");
    assert_eq!(outputs.len(), 1);
    assert!(!outputs[0].success);
    assert!(
        outputs[0]
            .data
            .starts_with("Another session instance is already running.")
    );
    assert!(!done.success);
    assert_eq!(done.completion_status, CompletionStatus::Failed);
    assert_eq!(done.session_status, SessionStatus::Started);

    // The rejected cell never ran.
    let (outputs, _) = run(&engine, "print(s2)");
    assert_eq!(outputs[0].data, "NameError: name 's2' is not defined\n");

    // Once stopped, a new session is allowed.
    let (_, done) = run(&engine, "s.stop()");
    assert_eq!(done.session_status, SessionStatus::Stopped);
    let (_, done) = run(&engine, "s3 = Session()");
    assert_eq!(done.completion_status, CompletionStatus::Completed);
    assert_eq!(done.session_status, SessionStatus::Stopped);
    engine.shutdown();
}

#[test]
fn test_requests_resolve_in_submission_order() {
    let engine = start(config());
    let (tx, rx) = mpsc::channel();
    for i in 0..5 {
        engine.enqueue(ExecutionRequest::new(
            Some(format!("c{i}")),
            format!("print({i})"),
            Arc::new(tx.clone()),
        ));
    }
    drop(tx);

    let events: Vec<Event> = rx.iter().collect();
    assert_eq!(events.len(), 10);
    for (i, pair) in events.chunks(2).enumerate() {
        let expected_id = format!("c{i}");
        assert!(matches!(&pair[0], Event::Output(out) if out.data == format!("{i}\n")));
        assert!(pair[1].is_completion());
        assert_eq!(pair[1].cell_id(), Some(expected_id.as_str()));
    }
    engine.shutdown();
}

#[test]
fn test_namespace_persists_between_cells() {
    let engine = start(config());
    run(&engine, "def double(a):\n    return a * 2\ncount = 20");
    let (outputs, _) = run(&engine, "count += 1\nprint(double(count))");
    assert_eq!(outputs[0].data, "42\n");
    engine.shutdown();
}

#[test]
fn test_failed_cell_keeps_earlier_assignments() {
    let engine = start(config());
    let (_, done) = run(&engine, "partial = 1\nboom()\npartial = 2");
    assert_eq!(done.completion_status, CompletionStatus::Failed);
    let (outputs, _) = run(&engine, "print(partial)");
    assert_eq!(outputs[0].data, "1\n");
    engine.shutdown();
}

#[test]
fn test_syntax_error_fails_without_running() {
    let engine = start(config());
    let (outputs, done) = run(&engine, "print('never')\nprint(");
    assert_eq!(outputs.len(), 1);
    assert!(outputs[0].data.starts_with("SyntaxError"));
    assert!(outputs[0].data.ends_with('\n'));
    assert_eq!(done.completion_status, CompletionStatus::Failed);
    engine.shutdown();
}

#[test]
fn test_stderr_writes_are_successful_output() {
    let engine = start(config());
    let (outputs, done) = run(&engine, "import sys\nprint('warn', file=sys.stderr)");
    assert_eq!(
        outputs,
        vec![OutputEvent::captured(Channel::Stderr, "warn\n", Some("cell".into()))]
    );
    assert!(done.success);
    engine.shutdown();
}

#[test]
fn test_stop_aborts_a_sleeping_cell() {
    let engine = start(config());
    let rx = submit(&engine, "long", "marker = 1\nprint('before')\nsleep(30)\nmarker = 2");
    wait_for_output(&rx, "before\n");

    let started = Instant::now();
    assert_eq!(engine.stop(), Ok(Delivery::Delivered));
    let (outputs, done) = drain(&rx);
    assert!(started.elapsed() < Duration::from_secs(5));

    assert_eq!(
        outputs,
        vec![OutputEvent::diagnostic(
            format!("{CANCELLED_MESSAGE}\n"),
            Some("long".into())
        )]
    );
    assert!(!done.success);
    assert_eq!(done.completion_status, CompletionStatus::Aborted);

    let (outputs, _) = run(&engine, "print(marker)");
    assert_eq!(outputs[0].data, "1\n");
    engine.shutdown();
}

#[test]
fn test_stop_interrupts_a_busy_loop() {
    let engine = start(config());
    let rx = submit(&engine, "spin", "print('go')\nwhile True:\n    pass");
    wait_for_output(&rx, "go\n");
    assert_eq!(engine.stop(), Ok(Delivery::Delivered));
    let (_, done) = drain(&rx);
    assert_eq!(done.completion_status, CompletionStatus::Aborted);
    engine.shutdown();
}

#[test]
fn test_idle_stop_does_nothing() {
    let engine = start(config());
    assert_eq!(engine.stop(), Ok(Delivery::Idle));
    let (outputs, done) = run(&engine, "print('fine')");
    assert_eq!(outputs[0].data, "fine\n");
    assert_eq!(done.completion_status, CompletionStatus::Completed);
    engine.shutdown();
}

#[test]
fn test_stop_leaves_queued_requests_alone() {
    let engine = start(config());
    let first = submit(&engine, "first", "print('before')\nsleep(30)");
    let second = submit(&engine, "second", "print('after')");
    wait_for_output(&first, "before\n");
    engine.stop().unwrap();

    let (_, done) = drain(&first);
    assert_eq!(done.completion_status, CompletionStatus::Aborted);
    let (outputs, done) = drain(&second);
    assert_eq!(outputs[0].data, "after\n");
    assert_eq!(done.completion_status, CompletionStatus::Completed);
    engine.shutdown();
}

#[test]
fn test_repeated_stops_coalesce() {
    let engine = start(config());
    let rx = submit(&engine, "long", "print('before')\nsleep(30)");
    wait_for_output(&rx, "before\n");
    engine.stop().unwrap();
    engine.stop().unwrap();
    let (outputs, done) = drain(&rx);
    assert_eq!(outputs.len(), 1);
    assert_eq!(done.completion_status, CompletionStatus::Aborted);

    let (_, done) = run(&engine, "sleep(0.01)\nx = 1");
    assert_eq!(done.completion_status, CompletionStatus::Completed);
    engine.shutdown();
}

#[test]
fn test_shutdown_refuses_further_work() {
    let engine = start(config());
    engine.shutdown();

    assert!(!engine.status().worker_alive);
    assert_eq!(engine.stop(), Err(StopError::WorkerGone));

    let (outputs, done) = run(&engine, "print('late')");
    assert_eq!(
        outputs,
        vec![OutputEvent::diagnostic(
            "execution worker is not running\n",
            Some("cell".into())
        )]
    );
    assert_eq!(done.completion_status, CompletionStatus::Failed);
}

#[test]
fn test_shutdown_interrupts_running_cell_and_fails_queued_ones() {
    let engine = start(config());
    let (tx, rx) = mpsc::channel();
    for (cell_id, code) in [
        ("running", "print('before')\nsleep(30)"),
        ("queued-1", "print('never')"),
        ("queued-2", "print('never')"),
    ] {
        engine.enqueue(ExecutionRequest::new(Some(cell_id.into()), code, Arc::new(tx.clone())));
    }
    wait_for_output(&rx, "before\n");

    let started = Instant::now();
    engine.shutdown();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!engine.status().worker_alive);

    let events: Vec<Event> = rx.try_iter().collect();
    let refused = |cell_id: &str| {
        [
            Event::from(OutputEvent::diagnostic(
                "execution worker is not running\n",
                Some(cell_id.into()),
            )),
            Event::from(CompletionEvent {
                cell_id: Some(cell_id.into()),
                success: false,
                completion_status: CompletionStatus::Failed,
                session_status: SessionStatus::Stopped,
            }),
        ]
    };
    let mut expected = vec![
        Event::from(OutputEvent::diagnostic(
            format!("{CANCELLED_MESSAGE}\n"),
            Some("running".into()),
        )),
        Event::from(CompletionEvent {
            cell_id: Some("running".into()),
            success: false,
            completion_status: CompletionStatus::Aborted,
            session_status: SessionStatus::Stopped,
        }),
    ];
    expected.extend(refused("queued-1"));
    expected.extend(refused("queued-2"));
    assert_eq!(events, expected);
}

#[test]
fn test_deeply_nested_cell_fails_without_killing_the_worker() {
    let engine = start(config());
    let depth = 50_000;
    let code = format!("x = {}1{}", "(".repeat(depth), ")".repeat(depth));
    let (outputs, done) = run(&engine, &code);
    assert_eq!(outputs.len(), 1);
    assert!(
        outputs[0]
            .data
            .starts_with("SyntaxError: too many nested parentheses"),
        "{}",
        outputs[0].data
    );
    assert_eq!(done.completion_status, CompletionStatus::Failed);

    let (outputs, done) = run(&engine, "print('still here')");
    assert_eq!(outputs[0].data, "still here\n");
    assert_eq!(done.completion_status, CompletionStatus::Completed);
    assert!(engine.status().worker_alive);
    engine.shutdown();
}

#[test]
fn test_credential_side_channel() {
    let mut config = config();
    config.session.require_credential = true;
    config.session.credential_var = "CELLRUN_TEST_SIDE_CHANNEL_KEY".into();
    let engine = start(config);

    let (outputs, done) = run(&engine, "s = Session()");
    assert!(outputs[0].data.starts_with("AuthenticationError"));
    assert_eq!(done.completion_status, CompletionStatus::Failed);

    engine.set_credential("secret");
    let (outputs, done) = run(
        &engine,
        "s = Session()\nprint(getenv('CELLRUN_TEST_SIDE_CHANNEL_KEY'))",
    );
    assert_eq!(outputs[0].data, "secret\n");
    assert_eq!(done.completion_status, CompletionStatus::Completed);
    engine.shutdown();
}
