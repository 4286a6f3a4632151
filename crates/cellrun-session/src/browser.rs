//! The automation session exposed to cell code.

use std::{cell::Cell, collections::HashMap, sync::Arc, time::Duration};

use cellrun_core::Channel;
use cellrun_script::{
    Args, ExecError, ExecResult, Interpreter, NativeObject, Runtime, ScriptError, Value,
};
use tracing::{debug, info};

/// Module under which the constructor is also importable.
pub const AUTOMATION_MODULE: &str = "automation";

/// Session construction settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Refuse to construct a session unless a credential is available.
    pub require_credential: bool,
    /// Simulated latency of one `act` call.
    pub act_latency: Duration,
    /// Credential name checked when `require_credential` is set.
    pub credential_var: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            require_credential: false,
            act_latency: Duration::from_millis(50),
            credential_var: "SESSION_API_KEY".to_owned(),
        }
    }
}

/// Builds session values for the constructor builtin.
///
/// Runs on the worker thread; the returned value never leaves it.
pub trait SessionFactory: Send + Sync {
    /// # Errors
    /// Returns whatever construction raises in cell code.
    fn create(&self, args: Args, rt: &mut Runtime) -> ExecResult<Value>;
}

/// Factory producing in-process [`BrowserSession`]s.
#[derive(Debug, Clone, Default)]
pub struct SimulatedSessionFactory {
    config: SessionConfig,
}

impl SimulatedSessionFactory {
    #[must_use]
    pub const fn new(config: SessionConfig) -> Self {
        Self { config }
    }
}

impl SessionFactory for SimulatedSessionFactory {
    fn create(&self, mut args: Args, rt: &mut Runtime) -> ExecResult<Value> {
        let starting_page = match args.take(0, "starting_page") {
            None | Some(Value::None) => None,
            Some(Value::Str(page)) => Some(page.to_string()),
            Some(other) => {
                return Err(ScriptError::type_error(format!(
                    "starting_page must be a str, not {}",
                    other.type_name()
                ))
                .into());
            }
        };
        let headless = args.take(1, "headless").is_none_or(|v| v.is_truthy());
        args.check("Session", 2)?;

        let var = &self.config.credential_var;
        if self.config.require_credential && !rt.credentials().is_set(var) {
            return Err(ScriptError::new(
                "AuthenticationError",
                format!("no credential found in {var}; send UPDATE_API_KEY or set it in the environment"),
            )
            .into());
        }

        debug!(?starting_page, headless, "session constructed");
        Ok(Value::object(BrowserSession {
            starting_page,
            headless,
            started: Cell::new(false),
            act_latency: self.config.act_latency,
        }))
    }
}

/// Register the session constructor as a builtin and in the
/// `automation` module.
pub fn install(interp: &mut Interpreter, constructor: &str, factory: Arc<dyn SessionFactory>) {
    let ctor = Value::native(constructor, move |rt, args| factory.create(args, rt));
    interp.define_builtin(constructor, ctor.clone());
    interp.define_module(
        AUTOMATION_MODULE,
        HashMap::from([(constructor.to_owned(), ctor)]),
    );
}

/// An automation session. Liveness is its `started` attribute.
pub struct BrowserSession {
    starting_page: Option<String>,
    headless: bool,
    started: Cell<bool>,
    act_latency: Duration,
}

impl BrowserSession {
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started.get()
    }

    fn page(&self) -> &str {
        self.starting_page.as_deref().unwrap_or("about:blank")
    }

    fn start(&self, rt: &mut Runtime) -> ExecResult<Value> {
        if self.started.get() {
            return Err(ScriptError::runtime_error("session is already started").into());
        }
        rt.write(Channel::Stderr, &format!("Starting session on {}\n", self.page()));
        self.started.set(true);
        info!(page = self.page(), headless = self.headless, "automation session started");
        Ok(Value::None)
    }

    fn stop(&self, rt: &mut Runtime) -> Value {
        if self.started.replace(false) {
            rt.write(Channel::Stderr, "Stopping session\n");
            info!("automation session stopped");
        }
        Value::None
    }

    fn act(&self, mut args: Args, rt: &mut Runtime) -> ExecResult<Value> {
        let prompt = args.take(0, "prompt");
        args.check("act", 1)?;
        let Some(Value::Str(prompt)) = prompt else {
            return Err(ScriptError::type_error("act() requires a str prompt").into());
        };
        if !self.started.get() {
            return Err(
                ScriptError::runtime_error("session is not started; call start() first").into(),
            );
        }
        rt.write(Channel::Stderr, &format!("Acting: {prompt}\n"));
        rt.sleep(self.act_latency)?;
        Ok(Value::str(format!("done: {prompt}")))
    }
}

impl NativeObject for BrowserSession {
    fn type_name(&self) -> &str {
        "Session"
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        match name {
            "started" => Some(Value::Bool(self.started.get())),
            "headless" => Some(Value::Bool(self.headless)),
            "starting_page" => Some(
                self.starting_page
                    .as_deref()
                    .map_or(Value::None, Value::from),
            ),
            _ => None,
        }
    }

    fn methods(&self) -> &[&'static str] {
        &["start", "stop", "act"]
    }

    fn call_method(&self, name: &str, args: Args, rt: &mut Runtime) -> ExecResult<Value> {
        match name {
            "start" => {
                args.check("start", 0)?;
                self.start(rt)
            }
            "stop" => {
                args.check("stop", 0)?;
                Ok(self.stop(rt))
            }
            "act" => self.act(args, rt),
            _ => Err(ExecError::from(ScriptError::attribute_error(
                self.type_name(),
                name,
            ))),
        }
    }

    fn repr(&self) -> String {
        format!(
            "<Session page='{}' started={}>",
            self.page(),
            if self.started.get() { "True" } else { "False" }
        )
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use cellrun_core::CredentialStore;
    use cellrun_script::{NeverCancel, OutputStream, Streams};

    use super::*;

    #[derive(Clone, Default)]
    struct Capture(Rc<RefCell<String>>);

    impl OutputStream for Capture {
        fn write(&mut self, text: &str) {
            self.0.borrow_mut().push_str(text);
        }
    }

    fn interpreter(config: SessionConfig, credentials: Arc<CredentialStore>) -> (Interpreter, Capture) {
        let mut interp = Interpreter::new(Runtime::new(Arc::new(NeverCancel), credentials));
        let stderr = Capture::default();
        interp.runtime_mut().swap_streams(Streams {
            stdout: Box::new(cellrun_script::NullStream),
            stderr: Box::new(stderr.clone()),
        });
        let config = SessionConfig {
            act_latency: Duration::ZERO,
            ..config
        };
        install(&mut interp, "Session", Arc::new(SimulatedSessionFactory::new(config)));
        (interp, stderr)
    }

    #[test]
    fn test_lifecycle() {
        let (mut interp, stderr) =
            interpreter(SessionConfig::default(), Arc::new(CredentialStore::new()));
        interp
            .run("s = Session(starting_page='https://example.com')\nbefore = s.started\ns.start()\nr = s.act('click')")
            .unwrap();
        let ns = interp.namespace();
        assert_eq!(ns.get("before"), Some(&Value::Bool(false)));
        assert_eq!(ns.get("r"), Some(&Value::str("done: click")));
        assert!(stderr.0.borrow().starts_with("Starting session on https://example.com\n"));

        let err = interp.run("s.start()").unwrap_err();
        assert_eq!(err.to_string(), "RuntimeError: session is already started");

        interp.run("s.stop()\ns.stop()\nafter = s.started").unwrap();
        assert_eq!(interp.namespace().get("after"), Some(&Value::Bool(false)));
    }

    #[test]
    fn test_act_requires_started_session() {
        let (mut interp, _) =
            interpreter(SessionConfig::default(), Arc::new(CredentialStore::new()));
        let err = interp.run("Session().act('go')").unwrap_err();
        assert!(err.to_string().starts_with("RuntimeError: session is not started"));
    }

    #[test]
    fn test_importable_from_automation_module() {
        let (mut interp, _) =
            interpreter(SessionConfig::default(), Arc::new(CredentialStore::new()));
        interp
            .run("from automation import Session as S\nx = S(headless=False)\nh = x.headless")
            .unwrap();
        assert_eq!(interp.namespace().get("h"), Some(&Value::Bool(false)));
    }

    #[test]
    fn test_required_credential() {
        let credentials = Arc::new(CredentialStore::new());
        let config = SessionConfig {
            require_credential: true,
            credential_var: "CELLRUN_SESSION_TEST_KEY_UNSET".to_owned(),
            ..SessionConfig::default()
        };
        let (mut interp, _) = interpreter(config, Arc::clone(&credentials));
        let err = interp.run("s = Session()").unwrap_err();
        assert!(err.to_string().starts_with("AuthenticationError:"));

        credentials.set("CELLRUN_SESSION_TEST_KEY_UNSET", "secret");
        interp.run("s = Session()").unwrap();
    }
}
