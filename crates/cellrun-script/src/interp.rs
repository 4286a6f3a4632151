//! Tree-walking interpreter over a persistent global namespace.
//!
//! Every statement, loop iteration and call passes a cancellation
//! checkpoint, so a pending interrupt unwinds the program promptly and
//! leaves whatever the executed prefix assigned in place.

use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
    rc::Rc,
};

use tracing::{debug, trace};

use crate::{
    ast::{BinOp, Const, Expr, FPart, LogicalOp, Program, Stmt, StmtKind, Target},
    builtins,
    error::{ExecResult, ScriptError},
    ops,
    parser::parse,
    runtime::Runtime,
    value::{Args, BoundMethod, Dict, Function, Module, Value},
};

/// Nested user-function calls allowed before `RecursionError`.
pub const MAX_CALL_DEPTH: usize = 200;

/// Global variables shared by every program run on one interpreter.
#[derive(Default)]
pub struct Namespace {
    vars: HashMap<String, Value>,
}

impl Namespace {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.vars.remove(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

struct Frame {
    locals: HashMap<String, Value>,
    globals: HashSet<String>,
}

enum Flow {
    Next,
    Break,
    Continue,
    Return(Value),
}

pub struct Interpreter {
    globals: Namespace,
    builtins: HashMap<String, Value>,
    modules: HashMap<String, Rc<Module>>,
    runtime: Runtime,
    frames: Vec<Frame>,
    error_line: Option<usize>,
}

impl Interpreter {
    #[must_use]
    pub fn new(runtime: Runtime) -> Self {
        let mut builtins = HashMap::new();
        builtins::install(&mut builtins);
        Self {
            globals: Namespace::new(),
            builtins,
            modules: builtins::standard_modules(),
            runtime,
            frames: Vec::new(),
            error_line: None,
        }
    }

    #[must_use]
    pub const fn namespace(&self) -> &Namespace {
        &self.globals
    }

    pub const fn namespace_mut(&mut self) -> &mut Namespace {
        &mut self.globals
    }

    #[must_use]
    pub const fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub const fn runtime_mut(&mut self) -> &mut Runtime {
        &mut self.runtime
    }

    /// Bind a name in the builtin scope, visible unless shadowed.
    pub fn define_builtin(&mut self, name: impl Into<String>, value: Value) {
        self.builtins.insert(name.into(), value);
    }

    /// Register an importable module.
    pub fn define_module(&mut self, name: impl Into<String>, attrs: HashMap<String, Value>) {
        let name = name.into();
        debug!(module = %name, "registering module");
        self.modules.insert(
            name.clone(),
            Rc::new(Module { name, attrs }),
        );
    }

    /// Line of the innermost statement that raised during the last `exec`.
    #[must_use]
    pub const fn error_line(&self) -> Option<usize> {
        self.error_line
    }

    /// Run a parsed program against the global namespace.
    ///
    /// # Errors
    /// Returns the first uncaught error, or `ExecError::Cancelled` if an
    /// interrupt was observed.
    pub fn exec(&mut self, program: &Program) -> ExecResult<()> {
        trace!(statements = program.body.len(), "executing program");
        self.error_line = None;
        self.frames.clear();
        let result = self.exec_block(&program.body).map(|_| ());
        self.frames.clear();
        result
    }

    /// Parse and run `src`.
    ///
    /// # Errors
    /// Returns syntax errors as well as anything `exec` returns.
    pub fn run(&mut self, src: &str) -> ExecResult<()> {
        let program = parse(src)?;
        self.exec(&program)
    }

    /// Call a callable value.
    ///
    /// # Errors
    /// Returns whatever the callee raises.
    pub fn call(&mut self, func: Value, args: Args) -> ExecResult<Value> {
        self.runtime.checkpoint()?;
        match func {
            Value::Function(f) => self.call_function(&f, args),
            Value::Native(f) => f.call(&mut self.runtime, args),
            Value::BoundMethod(m) => match &m.receiver {
                Value::Object(obj) => obj.call_method(&m.name, args, &mut self.runtime),
                receiver => builtins::call_method(receiver, &m.name, args, &mut self.runtime),
            },
            Value::ExceptionType(kind) => {
                args.check(&kind, usize::MAX)?;
                let message = match args.positional.as_slice() {
                    [] => String::new(),
                    [one] => one.to_display(),
                    many => format!(
                        "({})",
                        many.iter().map(Value::repr).collect::<Vec<_>>().join(", ")
                    ),
                };
                Ok(Value::Exception(Rc::new(ScriptError::new(
                    kind.as_ref(),
                    message,
                ))))
            }
            other => Err(ScriptError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))
            .into()),
        }
    }

    fn exec_block(&mut self, body: &[Stmt]) -> ExecResult<Flow> {
        for stmt in body {
            match self.exec_stmt(stmt) {
                Ok(Flow::Next) => {}
                Ok(flow) => return Ok(flow),
                Err(err) => {
                    if self.error_line.is_none() && !err.is_cancelled() {
                        self.error_line = Some(stmt.line);
                    }
                    return Err(err);
                }
            }
        }
        Ok(Flow::Next)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> ExecResult<Flow> {
        self.runtime.checkpoint()?;
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
            }
            StmtKind::AnnAssign { target, value, .. } => {
                if let Some(value) = value {
                    let value = self.eval(value)?;
                    self.assign(target, value)?;
                }
            }
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value)?,
            StmtKind::If { test, body, orelse } => {
                let branch = if self.eval(test)?.is_truthy() {
                    body
                } else {
                    orelse
                };
                return self.exec_block(branch);
            }
            StmtKind::While { test, body } => loop {
                self.runtime.checkpoint()?;
                if !self.eval(test)?.is_truthy() {
                    break;
                }
                match self.exec_block(body)? {
                    Flow::Break => break,
                    Flow::Return(value) => return Ok(Flow::Return(value)),
                    Flow::Next | Flow::Continue => {}
                }
            },
            StmtKind::For { target, iter, body } => {
                let iterable = self.eval(iter)?;
                for item in ops::iterate(&iterable)? {
                    self.runtime.checkpoint()?;
                    self.set_var(target, item);
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Next | Flow::Continue => {}
                    }
                }
            }
            StmtKind::FunctionDef(def) => {
                let defaults = def
                    .params
                    .iter()
                    .filter_map(|p| p.default.as_ref())
                    .map(|expr| self.eval(expr))
                    .collect::<ExecResult<Vec<_>>>()?;
                let func = Value::Function(Rc::new(Function {
                    def: Rc::clone(def),
                    defaults,
                }));
                self.set_var(&def.name, func);
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Raise(value) => return Err(self.raise(value.as_ref())?.into()),
            StmtKind::Assert { test, msg } => {
                if !self.eval(test)?.is_truthy() {
                    let message = match msg {
                        Some(expr) => self.eval(expr)?.to_display(),
                        None => String::new(),
                    };
                    return Err(ScriptError::new("AssertionError", message).into());
                }
            }
            StmtKind::Global(names) => {
                if let Some(frame) = self.frames.last_mut() {
                    frame.globals.extend(names.iter().cloned());
                }
            }
            StmtKind::Import(aliases) => {
                for alias in aliases {
                    let module = self.module(&alias.name)?;
                    self.set_var(alias.binding(), Value::Module(module));
                }
            }
            StmtKind::ImportFrom { module, names } => {
                let module = self.module(module)?;
                for alias in names {
                    let value = module.attrs.get(&alias.name).cloned().ok_or_else(|| {
                        ScriptError::new(
                            "ImportError",
                            format!("cannot import name '{}' from '{}'", alias.name, module.name),
                        )
                    })?;
                    self.set_var(alias.binding(), value);
                }
            }
            StmtKind::Pass => {}
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
        }
        Ok(Flow::Next)
    }

    fn raise(&mut self, value: Option<&Expr>) -> ExecResult<ScriptError> {
        let Some(expr) = value else {
            return Ok(ScriptError::runtime_error("No active exception to reraise"));
        };
        Ok(match self.eval(expr)? {
            Value::Exception(err) => (*err).clone(),
            Value::ExceptionType(kind) => ScriptError::new(kind.as_ref(), ""),
            _ => ScriptError::type_error("exceptions must derive from BaseException"),
        })
    }

    fn module(&self, name: &str) -> Result<Rc<Module>, ScriptError> {
        self.modules.get(name).cloned().ok_or_else(|| {
            ScriptError::new("ModuleNotFoundError", format!("No module named '{name}'"))
        })
    }

    fn lookup(&self, name: &str) -> Result<Value, ScriptError> {
        if let Some(frame) = self.frames.last()
            && !frame.globals.contains(name)
            && let Some(value) = frame.locals.get(name)
        {
            return Ok(value.clone());
        }
        self.globals
            .get(name)
            .or_else(|| self.builtins.get(name))
            .cloned()
            .ok_or_else(|| ScriptError::name_error(name))
    }

    fn set_var(&mut self, name: &str, value: Value) {
        match self.frames.last_mut() {
            Some(frame) if !frame.globals.contains(name) => {
                frame.locals.insert(name.to_owned(), value);
            }
            _ => self.globals.set(name, value),
        }
    }

    fn assign(&mut self, target: &Target, value: Value) -> ExecResult<()> {
        match target {
            Target::Name(name) => self.set_var(name, value),
            Target::Subscript {
                value: container,
                index,
            } => {
                let container = self.eval(container)?;
                let index = self.eval(index)?;
                ops::set_item(&container, &index, value)?;
            }
            Target::Attribute { value: object, attr } => {
                let object = self.eval(object)?;
                set_attr(&object, attr, value)?;
            }
        }
        Ok(())
    }

    fn aug_assign(&mut self, target: &Target, op: BinOp, rhs: &Expr) -> ExecResult<()> {
        match target {
            Target::Name(name) => {
                let current = self.lookup(name)?;
                let rhs = self.eval(rhs)?;
                let result = combine(op, current, &rhs)?;
                self.set_var(name, result);
            }
            Target::Subscript {
                value: container,
                index,
            } => {
                let container = self.eval(container)?;
                let index = self.eval(index)?;
                let current = ops::get_item(&container, &index)?;
                let rhs = self.eval(rhs)?;
                let result = combine(op, current, &rhs)?;
                ops::set_item(&container, &index, result)?;
            }
            Target::Attribute { value: object, attr } => {
                let object = self.eval(object)?;
                let current = get_attr(&object, attr)?;
                let rhs = self.eval(rhs)?;
                let result = combine(op, current, &rhs)?;
                set_attr(&object, attr, result)?;
            }
        }
        Ok(())
    }

    fn eval(&mut self, expr: &Expr) -> ExecResult<Value> {
        Ok(match expr {
            Expr::Name(name) => self.lookup(name)?,
            Expr::Const(c) => match c {
                Const::None => Value::None,
                Const::Bool(b) => Value::Bool(*b),
                Const::Int(i) => Value::Int(*i),
                Const::Float(f) => Value::Float(*f),
                Const::Str(s) => Value::Str(Rc::clone(s)),
            },
            Expr::FString(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FPart::Lit(text) => out.push_str(text),
                        FPart::Expr {
                            expr,
                            conversion,
                            spec,
                        } => {
                            let value = self.eval(expr)?;
                            let value = match conversion {
                                Some('r') => Value::str(value.repr()),
                                Some(_) => Value::str(value.to_display()),
                                None => value,
                            };
                            out.push_str(&builtins::format_value(
                                &value,
                                spec.as_deref().unwrap_or(""),
                            )?);
                        }
                    }
                }
                Value::from(out)
            }
            Expr::List(items) => {
                let items = items
                    .iter()
                    .map(|item| self.eval(item))
                    .collect::<ExecResult<Vec<_>>>()?;
                Value::list(items)
            }
            Expr::Dict(pairs) => {
                let mut dict = Dict::new();
                for (key, value) in pairs {
                    let key = self.eval(key)?;
                    let value = self.eval(value)?;
                    dict.insert(key, value)?;
                }
                Value::Dict(Rc::new(RefCell::new(dict)))
            }
            Expr::Unary { op, operand } => {
                let operand = self.eval(operand)?;
                ops::unary(*op, &operand)?
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                ops::binary(*op, &left, &right)?
            }
            Expr::Logical { op, left, right } => {
                let left = self.eval(left)?;
                match (op, left.is_truthy()) {
                    (LogicalOp::And, false) | (LogicalOp::Or, true) => left,
                    _ => self.eval(right)?,
                }
            }
            Expr::Compare { left, rest } => {
                let mut left = self.eval(left)?;
                for (op, right) in rest {
                    let right = self.eval(right)?;
                    if !ops::compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Value::Bool(true)
            }
            Expr::IfExp { test, body, orelse } => {
                if self.eval(test)?.is_truthy() {
                    self.eval(body)?
                } else {
                    self.eval(orelse)?
                }
            }
            Expr::Call { func, args, kwargs } => {
                let func = self.eval(func)?;
                let positional = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<ExecResult<Vec<_>>>()?;
                let mut keywords = Vec::with_capacity(kwargs.len());
                for (name, expr) in kwargs {
                    keywords.push((name.clone(), self.eval(expr)?));
                }
                self.call(
                    func,
                    Args {
                        positional,
                        keywords,
                    },
                )?
            }
            Expr::Attribute { value, attr } => {
                let value = self.eval(value)?;
                get_attr(&value, attr)?
            }
            Expr::Subscript { value, index } => {
                let value = self.eval(value)?;
                let index = self.eval(index)?;
                ops::get_item(&value, &index)?
            }
        })
    }

    fn call_function(&mut self, func: &Function, args: Args) -> ExecResult<Value> {
        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(
                ScriptError::new("RecursionError", "maximum recursion depth exceeded").into(),
            );
        }
        let locals = bind_arguments(func, args)?;
        self.frames.push(Frame {
            locals,
            globals: HashSet::new(),
        });
        let result = self.exec_block(&func.def.body);
        self.frames.pop();
        match result? {
            Flow::Return(value) => Ok(value),
            Flow::Next | Flow::Break | Flow::Continue => Ok(Value::None),
        }
    }
}

fn combine(op: BinOp, current: Value, rhs: &Value) -> Result<Value, ScriptError> {
    if op == BinOp::Add
        && let Some(result) = ops::add_in_place(&current, rhs)
    {
        return result.map(|()| current);
    }
    ops::binary(op, &current, rhs)
}

fn get_attr(value: &Value, attr: &str) -> Result<Value, ScriptError> {
    let bound = || {
        Value::BoundMethod(Rc::new(BoundMethod {
            receiver: value.clone(),
            name: attr.to_owned(),
        }))
    };
    match value {
        Value::Module(module) => module.attrs.get(attr).cloned().ok_or_else(|| {
            ScriptError::new(
                "AttributeError",
                format!("module '{}' has no attribute '{attr}'", module.name),
            )
        }),
        Value::Object(obj) => {
            if let Some(found) = obj.get_attr(attr) {
                Ok(found)
            } else if obj.methods().iter().any(|m| *m == attr) {
                Ok(bound())
            } else {
                Err(ScriptError::attribute_error(obj.type_name(), attr))
            }
        }
        Value::Exception(err) if attr == "args" => {
            Ok(Value::list(vec![Value::str(&err.message)]))
        }
        _ if builtins::has_method(value, attr) => Ok(bound()),
        _ => Err(ScriptError::attribute_error(&value.type_name(), attr)),
    }
}

fn set_attr(object: &Value, attr: &str, value: Value) -> Result<(), ScriptError> {
    match object {
        Value::Object(obj) => obj.set_attr(attr, value),
        other => Err(ScriptError::attribute_error(&other.type_name(), attr)),
    }
}

fn bind_arguments(func: &Function, args: Args) -> Result<HashMap<String, Value>, ScriptError> {
    let name = &func.def.name;
    let params = &func.def.params;
    let Args {
        positional,
        keywords,
    } = args;

    if positional.len() > params.len() {
        let given = positional.len();
        return Err(ScriptError::type_error(format!(
            "{name}() takes {} positional argument{} but {given} {} given",
            params.len(),
            if params.len() == 1 { "" } else { "s" },
            if given == 1 { "was" } else { "were" },
        )));
    }

    let mut slots: Vec<Option<Value>> = vec![None; params.len()];
    for (slot, value) in slots.iter_mut().zip(positional) {
        *slot = Some(value);
    }
    for (keyword, value) in keywords {
        let Some(idx) = params.iter().position(|p| p.name == keyword) else {
            return Err(ScriptError::type_error(format!(
                "{name}() got an unexpected keyword argument '{keyword}'"
            )));
        };
        if slots[idx].is_some() {
            return Err(ScriptError::type_error(format!(
                "{name}() got multiple values for argument '{keyword}'"
            )));
        }
        slots[idx] = Some(value);
    }

    let first_default = params.len() - func.defaults.len();
    let mut locals = HashMap::with_capacity(params.len());
    let mut missing = Vec::new();
    for (idx, (param, slot)) in params.iter().zip(slots).enumerate() {
        let value = match slot {
            Some(value) => value,
            None if idx >= first_default => func.defaults[idx - first_default].clone(),
            None => {
                missing.push(format!("'{}'", param.name));
                continue;
            }
        };
        locals.insert(param.name.clone(), value);
    }

    if let Some((last, rest)) = missing.split_last() {
        let listed = if rest.is_empty() {
            last.clone()
        } else {
            format!("{} and {last}", rest.join(", "))
        };
        return Err(ScriptError::type_error(format!(
            "{name}() missing {} required positional argument{}: {listed}",
            missing.len(),
            if missing.len() == 1 { "" } else { "s" },
        )));
    }
    Ok(locals)
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use cellrun_core::CredentialStore;

    use super::*;
    use crate::{
        error::{Cancelled, ExecError},
        runtime::{Control, NeverCancel, OutputStream, Streams},
    };

    #[derive(Clone, Default)]
    struct Capture(Rc<RefCell<String>>);

    impl OutputStream for Capture {
        fn write(&mut self, text: &str) {
            self.0.borrow_mut().push_str(text);
        }
    }

    struct Harness {
        interp: Interpreter,
        stdout: Capture,
        stderr: Capture,
    }

    impl Harness {
        fn with_control(control: Arc<dyn Control>) -> Self {
            let mut interp =
                Interpreter::new(Runtime::new(control, Arc::new(CredentialStore::new())));
            let (stdout, stderr) = (Capture::default(), Capture::default());
            interp.runtime_mut().swap_streams(Streams {
                stdout: Box::new(stdout.clone()),
                stderr: Box::new(stderr.clone()),
            });
            Self {
                interp,
                stdout,
                stderr,
            }
        }

        fn new() -> Self {
            Self::with_control(Arc::new(NeverCancel))
        }

        fn run(&mut self, src: &str) -> ExecResult<()> {
            self.interp.run(src)
        }

        fn stdout(&self) -> String {
            self.stdout.0.borrow().clone()
        }

        fn global(&self, name: &str) -> Option<Value> {
            self.interp.namespace().get(name).cloned()
        }
    }

    /// Interrupts once `budget` checkpoints have passed.
    struct CancelAfter(AtomicUsize);

    impl Control for CancelAfter {
        fn checkpoint(&self) -> Result<(), Cancelled> {
            let left = self.0.load(Ordering::SeqCst);
            if left == 0 {
                return Err(Cancelled);
            }
            self.0.store(left - 1, Ordering::SeqCst);
            Ok(())
        }

        fn sleep(&self, _duration: Duration) -> Result<(), Cancelled> {
            self.checkpoint()
        }
    }

    #[test]
    fn test_print_writes_one_chunk() {
        let mut h = Harness::new();
        h.run("print('hi')").unwrap();
        assert_eq!(h.stdout(), "hi\n");
        h.run("print(1, 2.5, None, [1, 'a'], sep='-', end='!')").unwrap();
        assert_eq!(h.stdout(), "hi\n1-2.5-None-[1, 'a']!");
    }

    #[test]
    fn test_print_to_stderr() {
        let mut h = Harness::new();
        h.run("import sys\nprint('oops', file=sys.stderr)\nsys.stdout.write('x')")
            .unwrap();
        assert_eq!(h.stderr.0.borrow().as_str(), "oops\n");
        assert_eq!(h.stdout(), "x");
    }

    #[test]
    fn test_namespace_persists_between_runs() {
        let mut h = Harness::new();
        h.run("x = 41").unwrap();
        h.run("x += 1\ndef double(n):\n    return n * 2").unwrap();
        h.run("print(double(x))").unwrap();
        assert_eq!(h.stdout(), "84\n");
    }

    #[test]
    fn test_partial_effects_survive_errors() {
        let mut h = Harness::new();
        let err = h
            .run("a = 1\nraise ValueError('boom')\nb = 2")
            .unwrap_err();
        assert_eq!(err.to_string(), "ValueError: boom");
        assert_eq!(h.interp.error_line(), Some(2));
        assert_eq!(h.global("a"), Some(Value::Int(1)));
        assert_eq!(h.global("b"), None);
    }

    #[test]
    fn test_error_line_is_innermost_statement() {
        let mut h = Harness::new();
        let src = "def f():\n    x = 1\n    return x / 0\n\nf()";
        let err = h.run(src).unwrap_err();
        assert_eq!(err.to_string(), "ZeroDivisionError: division by zero");
        assert_eq!(h.interp.error_line(), Some(3));
    }

    #[test]
    fn test_name_error() {
        let mut h = Harness::new();
        let err = h.run("print(missing)").unwrap_err();
        assert_eq!(err.to_string(), "NameError: name 'missing' is not defined");
    }

    #[test]
    fn test_control_flow() {
        let mut h = Harness::new();
        let src = "\
total = 0
for i in range(10):
    if i % 2 == 0:
        continue
    if i > 7:
        break
    total += i
n = 0
while True:
    n += 1
    if n >= 3:
        break
print(total, n)
";
        h.run(src).unwrap();
        assert_eq!(h.stdout(), "16 3\n");
    }

    #[test]
    fn test_functions_defaults_and_keywords() {
        let mut h = Harness::new();
        let src = "\
def greet(name, greeting='hello', punct='!'):
    return f'{greeting}, {name}{punct}'
print(greet('ana'))
print(greet('bo', punct='?'))
";
        h.run(src).unwrap();
        assert_eq!(h.stdout(), "hello, ana!\nhello, bo?\n");

        let err = h.run("greet()").unwrap_err();
        assert_eq!(
            err.to_string(),
            "TypeError: greet() missing 1 required positional argument: 'name'"
        );
        let err = h.run("greet('a', colour='red')").unwrap_err();
        assert_eq!(
            err.to_string(),
            "TypeError: greet() got an unexpected keyword argument 'colour'"
        );
    }

    #[test]
    fn test_recursion_and_globals() {
        let mut h = Harness::new();
        let src = "\
calls = 0
def fib(n):
    global calls
    calls += 1
    if n < 2:
        return n
    return fib(n - 1) + fib(n - 2)
print(fib(10), calls)
";
        h.run(src).unwrap();
        assert_eq!(h.stdout(), "55 177\n");
    }

    #[test]
    fn test_recursion_limit() {
        let handle = std::thread::Builder::new()
            .stack_size(64 * 1024 * 1024)
            .spawn(|| {
                let mut h = Harness::new();
                let err = h.run("def f(n):\n    return f(n + 1)\nf(0)").unwrap_err();
                err.to_string()
            })
            .unwrap();
        assert_eq!(
            handle.join().unwrap(),
            "RecursionError: maximum recursion depth exceeded"
        );
    }

    #[test]
    fn test_fstring_formatting() {
        let mut h = Harness::new();
        h.run("x = 3.14159\nname = 'cell'\nprint(f'{name!r}: {x:.2f} {{ok}} {len(name):>3}')")
            .unwrap();
        assert_eq!(h.stdout(), "'cell': 3.14 {ok}   4\n");
    }

    #[test]
    fn test_containers() {
        let mut h = Harness::new();
        let src = "\
xs = [3, 1, 2]
alias = xs
xs += [4]
xs.append(0)
d = {'a': 1}
d['b'] = 2
print(sorted(alias), len(d), d.get('c', 'none'), 'a' in d, xs[-1])
print(', '.join(['x', 'y']), 'Hello'.upper(), sum(xs), max(xs), min(1, -1))
";
        h.run(src).unwrap();
        assert_eq!(
            h.stdout(),
            "[0, 1, 2, 3, 4] 2 none True 0\nx, y HELLO 10 4 -1\n"
        );
    }

    #[test]
    fn test_assert_and_raise_forms() {
        let mut h = Harness::new();
        let err = h.run("assert 1 == 2, 'math'").unwrap_err();
        assert_eq!(err.to_string(), "AssertionError: math");
        let err = h.run("raise RuntimeError").unwrap_err();
        assert_eq!(err.to_string(), "RuntimeError: ");
        let err = h.run("raise 5").unwrap_err();
        assert_eq!(
            err.to_string(),
            "TypeError: exceptions must derive from BaseException"
        );
    }

    #[test]
    fn test_imports() {
        let mut h = Harness::new();
        h.run("from time import sleep as nap\nimport os\nnap(0)\nos.getenv('X')")
            .unwrap();
        let err = h.run("import numpy").unwrap_err();
        assert_eq!(err.to_string(), "ModuleNotFoundError: No module named 'numpy'");
        let err = h.run("from os import path").unwrap_err();
        assert_eq!(
            err.to_string(),
            "ImportError: cannot import name 'path' from 'os'"
        );
    }

    #[test]
    fn test_defined_modules_and_builtins() {
        let mut h = Harness::new();
        h.interp.define_builtin("answer", Value::Int(42));
        h.interp.define_module(
            "extras",
            HashMap::from([("greeting".to_owned(), Value::str("hey"))]),
        );
        h.run("from extras import greeting\nprint(greeting, answer)")
            .unwrap();
        assert_eq!(h.stdout(), "hey 42\n");
    }

    #[test]
    fn test_infinite_loop_is_cancellable() {
        let mut h = Harness::with_control(Arc::new(CancelAfter(AtomicUsize::new(1000))));
        let err = h.run("n = 0\nwhile True:\n    n += 1").unwrap_err();
        assert_eq!(err, ExecError::Cancelled);
        assert_eq!(h.interp.error_line(), None);
        assert!(matches!(h.global("n"), Some(Value::Int(n)) if n > 0));
    }

    #[test]
    fn test_cancelled_sleep_stops_before_next_statement() {
        let mut h = Harness::with_control(Arc::new(CancelAfter(AtomicUsize::new(3))));
        let err = h.run("print('before')\nsleep(30)\nprint('after')").unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(h.stdout(), "before\n");
    }
}
