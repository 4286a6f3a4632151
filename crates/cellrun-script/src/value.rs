//! Runtime values.

use std::{cell::RefCell, collections::HashMap, fmt, rc::Rc};

use cellrun_core::Channel;

use crate::{
    ast::FunctionDef,
    error::{ExecResult, ScriptError},
    runtime::Runtime,
};

/// Nesting beyond this renders as `...` and compares unequal.
const MAX_NESTING: usize = 32;

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Dict(Rc<RefCell<Dict>>),
    Range(Range),
    Function(Rc<Function>),
    Native(Rc<NativeFunction>),
    BoundMethod(Rc<BoundMethod>),
    ExceptionType(Rc<str>),
    Exception(Rc<ScriptError>),
    Object(Rc<dyn NativeObject>),
    Module(Rc<Module>),
    Stream(Channel),
}

/// Host-provided object, such as an automation session.
pub trait NativeObject {
    fn type_name(&self) -> &str;

    /// Data attribute lookup. `None` means "no such attribute".
    fn get_attr(&self, name: &str) -> Option<Value>;

    /// Names callable through [`NativeObject::call_method`].
    fn methods(&self) -> &[&'static str] {
        &[]
    }

    /// # Errors
    /// Returns whatever the method raises.
    fn call_method(&self, name: &str, args: Args, rt: &mut Runtime) -> ExecResult<Value> {
        let _ = (args, rt);
        Err(ScriptError::attribute_error(self.type_name(), name).into())
    }

    /// # Errors
    /// Returns `AttributeError` unless the object accepts the assignment.
    fn set_attr(&self, name: &str, value: Value) -> Result<(), ScriptError> {
        let _ = value;
        Err(ScriptError::attribute_error(self.type_name(), name))
    }

    fn repr(&self) -> String {
        format!("<{} object>", self.type_name())
    }
}

/// User-defined function.
pub struct Function {
    pub def: Rc<FunctionDef>,
    /// Defaults evaluated at definition time, aligned to the trailing params.
    pub defaults: Vec<Value>,
}

type NativeFn = dyn Fn(&mut Runtime, Args) -> ExecResult<Value>;

/// Function implemented by the host.
pub struct NativeFunction {
    pub name: String,
    func: Box<NativeFn>,
}

impl NativeFunction {
    /// # Errors
    /// Returns whatever the function raises.
    pub fn call(&self, rt: &mut Runtime, args: Args) -> ExecResult<Value> {
        (self.func)(rt, args)
    }
}

pub struct BoundMethod {
    pub receiver: Value,
    pub name: String,
}

pub struct Module {
    pub name: String,
    pub attrs: HashMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl Range {
    #[must_use]
    pub fn len(&self) -> usize {
        let (start, stop, step) = (
            i128::from(self.start),
            i128::from(self.stop),
            i128::from(self.step),
        );
        let n = if step > 0 {
            (stop - start + step - 1) / step
        } else {
            (start - stop - step - 1) / -step
        };
        usize::try_from(n.max(0)).unwrap_or(usize::MAX)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<i64> {
        if index >= self.len() {
            return None;
        }
        let offset = i64::try_from(index).ok()?.checked_mul(self.step)?;
        self.start.checked_add(offset)
    }

    #[must_use]
    pub fn contains(&self, n: i64) -> bool {
        let in_bounds = if self.step > 0 {
            n >= self.start && n < self.stop
        } else {
            n <= self.start && n > self.stop
        };
        in_bounds && (i128::from(n) - i128::from(self.start)) % i128::from(self.step) == 0
    }

    pub fn iter(self) -> impl Iterator<Item = i64> {
        (0..self.len()).map_while(move |i| self.get(i))
    }
}

/// Insertion-ordered mapping.
#[derive(Default, Clone)]
pub struct Dict {
    entries: Vec<(Value, Value)>,
}

impl Dict {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &Value) -> Option<Value> {
        self.entries
            .iter()
            .find(|(k, _)| values_equal(k, key))
            .map(|(_, v)| v.clone())
    }

    /// # Errors
    /// Returns `TypeError` for unhashable keys.
    pub fn insert(&mut self, key: Value, value: Value) -> Result<(), ScriptError> {
        check_hashable(&key)?;
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| values_equal(k, &key)) {
            slot.1 = value;
        } else {
            self.entries.push((key, value));
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        let idx = self.entries.iter().position(|(k, _)| values_equal(k, key))?;
        Some(self.entries.remove(idx).1)
    }

    #[must_use]
    pub fn contains(&self, key: &Value) -> bool {
        self.entries.iter().any(|(k, _)| values_equal(k, key))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Value, Value)> {
        self.entries.iter()
    }
}

/// Call arguments.
#[derive(Default)]
pub struct Args {
    pub positional: Vec<Value>,
    pub keywords: Vec<(String, Value)>,
}

impl Args {
    #[must_use]
    pub const fn new(positional: Vec<Value>) -> Self {
        Self {
            positional,
            keywords: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_keyword(mut self, name: impl Into<String>, value: Value) -> Self {
        self.keywords.push((name.into(), value));
        self
    }

    /// Remove and return a keyword argument.
    pub fn take_keyword(&mut self, name: &str) -> Option<Value> {
        let idx = self.keywords.iter().position(|(k, _)| k == name)?;
        Some(self.keywords.remove(idx).1)
    }

    /// Argument by keyword, falling back to position.
    pub fn take(&mut self, index: usize, name: &str) -> Option<Value> {
        self.take_keyword(name)
            .or_else(|| self.positional.get(index).cloned())
    }

    /// Reject extra positional or leftover keyword arguments.
    ///
    /// # Errors
    /// Returns `TypeError` naming the offending argument.
    pub fn check(&self, fname: &str, max_positional: usize) -> Result<(), ScriptError> {
        if self.positional.len() > max_positional {
            return Err(ScriptError::type_error(format!(
                "{fname}() takes at most {max_positional} positional argument{} ({} given)",
                if max_positional == 1 { "" } else { "s" },
                self.positional.len()
            )));
        }
        if let Some((name, _)) = self.keywords.first() {
            return Err(ScriptError::type_error(format!(
                "{fname}() got an unexpected keyword argument '{name}'"
            )));
        }
        Ok(())
    }
}

impl Value {
    #[must_use]
    pub fn str(s: impl AsRef<str>) -> Self {
        Self::Str(Rc::from(s.as_ref()))
    }

    #[must_use]
    pub fn list(items: Vec<Self>) -> Self {
        Self::List(Rc::new(RefCell::new(items)))
    }

    #[must_use]
    pub fn object(obj: impl NativeObject + 'static) -> Self {
        Self::Object(Rc::new(obj))
    }

    /// Wrap a host closure as a callable value.
    #[must_use]
    pub fn native<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&mut Runtime, Args) -> ExecResult<Self> + 'static,
    {
        Self::Native(Rc::new(NativeFunction {
            name: name.into(),
            func: Box::new(func),
        }))
    }

    #[must_use]
    pub fn module(name: impl Into<String>, attrs: HashMap<String, Self>) -> Self {
        Self::Module(Rc::new(Module {
            name: name.into(),
            attrs,
        }))
    }

    #[must_use]
    pub fn type_name(&self) -> String {
        match self {
            Self::None => "NoneType".into(),
            Self::Bool(_) => "bool".into(),
            Self::Int(_) => "int".into(),
            Self::Float(_) => "float".into(),
            Self::Str(_) => "str".into(),
            Self::List(_) => "list".into(),
            Self::Dict(_) => "dict".into(),
            Self::Range(_) => "range".into(),
            Self::Function(_) => "function".into(),
            Self::Native(_) => "builtin_function_or_method".into(),
            Self::BoundMethod(_) => "method".into(),
            Self::ExceptionType(_) => "type".into(),
            Self::Exception(err) => err.kind.clone(),
            Self::Object(obj) => obj.type_name().to_owned(),
            Self::Module(_) => "module".into(),
            Self::Stream(_) => "TextIOWrapper".into(),
        }
    }

    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::List(items) => !items.borrow().is_empty(),
            Self::Dict(dict) => !dict.borrow().is_empty(),
            Self::Range(r) => !r.is_empty(),
            _ => true,
        }
    }

    /// `str(value)`
    #[must_use]
    pub fn to_display(&self) -> String {
        match self {
            Self::Str(s) => s.to_string(),
            Self::Exception(err) => err.message.clone(),
            _ => self.repr(),
        }
    }

    /// `repr(value)`
    #[must_use]
    pub fn repr(&self) -> String {
        let mut out = String::new();
        write_repr(self, &mut out, 0);
        out
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        values_equal(self, other)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::str(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(Rc::from(s))
    }
}

/// Python-style float formatting.
#[must_use]
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "nan".into();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf".into() } else { "-inf".into() };
    }
    let magnitude = f.abs();
    if magnitude != 0.0 && !(1e-4..1e16).contains(&magnitude) {
        return format!("{f:e}");
    }
    if f.fract() == 0.0 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

fn quote_str(s: &str, out: &mut String) {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
}

fn write_repr(value: &Value, out: &mut String, depth: usize) {
    match value {
        Value::None => out.push_str("None"),
        Value::Bool(true) => out.push_str("True"),
        Value::Bool(false) => out.push_str("False"),
        Value::Int(i) => out.push_str(&i.to_string()),
        Value::Float(f) => out.push_str(&format_float(*f)),
        Value::Str(s) => quote_str(s, out),
        Value::List(items) => {
            if depth >= MAX_NESTING {
                out.push_str("[...]");
                return;
            }
            out.push('[');
            for (i, item) in items.borrow().iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_repr(item, out, depth + 1);
            }
            out.push(']');
        }
        Value::Dict(dict) => {
            if depth >= MAX_NESTING {
                out.push_str("{...}");
                return;
            }
            out.push('{');
            for (i, (k, v)) in dict.borrow().iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_repr(k, out, depth + 1);
                out.push_str(": ");
                write_repr(v, out, depth + 1);
            }
            out.push('}');
        }
        Value::Range(r) => {
            if r.step == 1 {
                out.push_str(&format!("range({}, {})", r.start, r.stop));
            } else {
                out.push_str(&format!("range({}, {}, {})", r.start, r.stop, r.step));
            }
        }
        Value::Function(f) => out.push_str(&format!("<function {}>", f.def.name)),
        Value::Native(f) => out.push_str(&format!("<built-in function {}>", f.name)),
        Value::BoundMethod(m) => out.push_str(&format!(
            "<bound method {} of {}>",
            m.name,
            m.receiver.type_name()
        )),
        Value::ExceptionType(kind) => out.push_str(&format!("<class '{kind}'>")),
        Value::Exception(err) => {
            out.push_str(&err.kind);
            out.push('(');
            if !err.message.is_empty() {
                quote_str(&err.message, out);
            }
            out.push(')');
        }
        Value::Object(obj) => out.push_str(&obj.repr()),
        Value::Module(m) => out.push_str(&format!("<module '{}'>", m.name)),
        Value::Stream(channel) => out.push_str(&format!("<{channel}>")),
    }
}

/// Numeric view: bools and ints widen to `Int`, floats stay `Float`.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    pub(crate) const fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Self::Int(*b as i64)),
            Value::Int(i) => Some(Self::Int(*i)),
            Value::Float(f) => Some(Self::Float(*f)),
            _ => None,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub(crate) const fn as_f64(self) -> f64 {
        match self {
            Self::Int(i) => i as f64,
            Self::Float(f) => f,
        }
    }
}

/// `a == b`
#[must_use]
pub fn values_equal(a: &Value, b: &Value) -> bool {
    equal_at(a, b, 0)
}

fn equal_at(a: &Value, b: &Value, depth: usize) -> bool {
    if depth > MAX_NESTING {
        return false;
    }
    if let (Some(x), Some(y)) = (Num::of(a), Num::of(b)) {
        return match (x, y) {
            (Num::Int(x), Num::Int(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        };
    }
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::List(x), Value::List(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(p, q)| equal_at(p, q, depth + 1))
        }
        (Value::Dict(x), Value::Dict(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len()
                && x.iter().all(|(k, v)| {
                    y.iter()
                        .find(|(k2, _)| equal_at(k, k2, depth + 1))
                        .is_some_and(|(_, v2)| equal_at(v, v2, depth + 1))
                })
        }
        (Value::Range(x), Value::Range(y)) => x == y,
        (Value::Stream(x), Value::Stream(y)) => x == y,
        (Value::ExceptionType(x), Value::ExceptionType(y)) => x == y,
        _ => is_same(a, b),
    }
}

/// `a is b`
#[must_use]
pub fn is_same(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => Rc::ptr_eq(x, y) || x == y,
        (Value::List(x), Value::List(y)) => Rc::ptr_eq(x, y),
        (Value::Dict(x), Value::Dict(y)) => Rc::ptr_eq(x, y),
        (Value::Function(x), Value::Function(y)) => Rc::ptr_eq(x, y),
        (Value::Native(x), Value::Native(y)) => Rc::ptr_eq(x, y),
        (Value::BoundMethod(x), Value::BoundMethod(y)) => Rc::ptr_eq(x, y),
        (Value::Exception(x), Value::Exception(y)) => Rc::ptr_eq(x, y),
        (Value::Object(x), Value::Object(y)) => std::ptr::addr_eq(Rc::as_ptr(x), Rc::as_ptr(y)),
        (Value::Module(x), Value::Module(y)) => Rc::ptr_eq(x, y),
        (Value::ExceptionType(x), Value::ExceptionType(y)) => x == y,
        (Value::Stream(x), Value::Stream(y)) => x == y,
        _ => false,
    }
}

/// # Errors
/// Returns `TypeError` for mutable containers.
pub fn check_hashable(value: &Value) -> Result<(), ScriptError> {
    match value {
        Value::List(_) | Value::Dict(_) => Err(ScriptError::type_error(format!(
            "unhashable type: '{}'",
            value.type_name()
        ))),
        _ => Ok(()),
    }
}
