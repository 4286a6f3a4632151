//! Builtin functions, modules and methods on builtin types.

use std::{
    collections::HashMap,
    rc::Rc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use cellrun_core::Channel;

use crate::{
    ast::{BinOp, CmpOp},
    error::{ExecResult, ScriptError},
    ops,
    runtime::Runtime,
    value::{Args, Dict, Module, Num, Range, Value, format_float},
};

const EXCEPTION_TYPES: &[&str] = &[
    "Exception",
    "ValueError",
    "TypeError",
    "RuntimeError",
    "KeyError",
    "IndexError",
    "NameError",
    "ZeroDivisionError",
    "AttributeError",
    "AssertionError",
];

const STR_METHODS: &[&str] = &[
    "upper", "lower", "strip", "lstrip", "rstrip", "split", "join", "startswith", "endswith",
    "replace", "find",
];
const LIST_METHODS: &[&str] = &["append", "pop", "extend", "insert"];
const DICT_METHODS: &[&str] = &["get", "keys", "values", "items", "pop"];
const STREAM_METHODS: &[&str] = &["write", "flush"];

type Builtin = fn(&mut Runtime, Args) -> ExecResult<Value>;

const FUNCTIONS: &[(&str, Builtin)] = &[
    ("print", print),
    ("len", len),
    ("str", str),
    ("repr", repr),
    ("int", int),
    ("float", float),
    ("bool", bool),
    ("list", list),
    ("range", range),
    ("abs", abs),
    ("min", min),
    ("max", max),
    ("sum", sum),
    ("sorted", sorted),
    ("sleep", sleep),
    ("getenv", getenv),
];

/// Populate the builtin scope.
pub(crate) fn install(scope: &mut HashMap<String, Value>) {
    for &(name, func) in FUNCTIONS {
        scope.insert(name.to_owned(), Value::native(name, func));
    }
    for &kind in EXCEPTION_TYPES {
        scope.insert(kind.to_owned(), Value::ExceptionType(Rc::from(kind)));
    }
}

/// The importable standard modules.
pub(crate) fn standard_modules() -> HashMap<String, Rc<Module>> {
    let module = |name: &str, attrs: Vec<(&str, Value)>| {
        let attrs = attrs
            .into_iter()
            .map(|(k, v)| (k.to_owned(), v))
            .collect();
        (
            name.to_owned(),
            Rc::new(Module {
                name: name.to_owned(),
                attrs,
            }),
        )
    };
    HashMap::from([
        module(
            "sys",
            vec![
                ("stdout", Value::Stream(Channel::Stdout)),
                ("stderr", Value::Stream(Channel::Stderr)),
            ],
        ),
        module(
            "time",
            vec![
                ("sleep", Value::native("sleep", sleep)),
                ("time", Value::native("time", time)),
            ],
        ),
        module("os", vec![("getenv", Value::native("getenv", getenv))]),
    ])
}

fn arity(args: &Args, fname: &str, min: usize, max: usize) -> Result<(), ScriptError> {
    args.check(fname, max)?;
    let given = args.positional.len();
    if given < min {
        let expected = if min == max {
            format!("exactly {min}")
        } else {
            format!("at least {min}")
        };
        return Err(ScriptError::type_error(format!(
            "{fname}() takes {expected} argument{} ({given} given)",
            if min == 1 { "" } else { "s" }
        )));
    }
    Ok(())
}

fn expect_str<'a>(value: &'a Value, fname: &str) -> Result<&'a str, ScriptError> {
    match value {
        Value::Str(s) => Ok(s),
        other => Err(ScriptError::type_error(format!(
            "{fname}() argument must be str, not {}",
            other.type_name()
        ))),
    }
}

fn expect_int(value: &Value, fname: &str) -> Result<i64, ScriptError> {
    match value {
        Value::Int(i) => Ok(*i),
        Value::Bool(b) => Ok(i64::from(*b)),
        other => Err(ScriptError::type_error(format!(
            "'{}' object cannot be interpreted as an integer in {fname}()",
            other.type_name()
        ))),
    }
}

fn optional_text(value: Option<Value>, default: &str, name: &str) -> Result<String, ScriptError> {
    match value {
        None | Some(Value::None) => Ok(default.to_owned()),
        Some(Value::Str(s)) => Ok(s.to_string()),
        Some(other) => Err(ScriptError::type_error(format!(
            "{name} must be None or a string, not {}",
            other.type_name()
        ))),
    }
}

fn print(rt: &mut Runtime, mut args: Args) -> ExecResult<Value> {
    let sep = optional_text(args.take_keyword("sep"), " ", "sep")?;
    let end = optional_text(args.take_keyword("end"), "\n", "end")?;
    let channel = match args.take_keyword("file") {
        None | Some(Value::None) => Channel::Stdout,
        Some(Value::Stream(channel)) => channel,
        Some(other) => {
            return Err(ScriptError::type_error(format!(
                "print() file must be a stream, not {}",
                other.type_name()
            ))
            .into());
        }
    };
    let flush = args.take_keyword("flush").is_some_and(|v| v.is_truthy());
    args.check("print", usize::MAX)?;

    let mut text = args
        .positional
        .iter()
        .map(Value::to_display)
        .collect::<Vec<_>>()
        .join(&sep);
    text.push_str(&end);
    rt.write(channel, &text);
    if flush {
        rt.flush(channel);
    }
    Ok(Value::None)
}

fn len(_: &mut Runtime, args: Args) -> ExecResult<Value> {
    arity(&args, "len", 1, 1)?;
    let n = ops::len(&args.positional[0])?;
    Ok(Value::Int(i64::try_from(n).unwrap_or(i64::MAX)))
}

fn str(_: &mut Runtime, args: Args) -> ExecResult<Value> {
    arity(&args, "str", 0, 1)?;
    Ok(args
        .positional
        .first()
        .map_or_else(|| Value::str(""), |v| Value::str(v.to_display())))
}

fn repr(_: &mut Runtime, args: Args) -> ExecResult<Value> {
    arity(&args, "repr", 1, 1)?;
    Ok(Value::str(args.positional[0].repr()))
}

fn int(_: &mut Runtime, args: Args) -> ExecResult<Value> {
    arity(&args, "int", 0, 1)?;
    let Some(value) = args.positional.first() else {
        return Ok(Value::Int(0));
    };
    match value {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::Float(f) => {
            if !f.is_finite() {
                return Err(ScriptError::value_error(format!(
                    "cannot convert float {} to integer",
                    format_float(*f)
                ))
                .into());
            }
            #[allow(clippy::cast_possible_truncation)]
            Ok(Value::Int(f.trunc() as i64))
        }
        Value::Str(s) => s
            .trim()
            .replace('_', "")
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| {
                ScriptError::value_error(format!(
                    "invalid literal for int() with base 10: {}",
                    value.repr()
                ))
                .into()
            }),
        other => Err(ScriptError::type_error(format!(
            "int() argument must be a string or a number, not '{}'",
            other.type_name()
        ))
        .into()),
    }
}

fn float(_: &mut Runtime, args: Args) -> ExecResult<Value> {
    arity(&args, "float", 0, 1)?;
    let Some(value) = args.positional.first() else {
        return Ok(Value::Float(0.0));
    };
    if let Some(n) = Num::of(value) {
        return Ok(Value::Float(n.as_f64()));
    }
    match value {
        Value::Str(s) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
            ScriptError::value_error(format!(
                "could not convert string to float: {}",
                value.repr()
            ))
            .into()
        }),
        other => Err(ScriptError::type_error(format!(
            "float() argument must be a string or a number, not '{}'",
            other.type_name()
        ))
        .into()),
    }
}

fn bool(_: &mut Runtime, args: Args) -> ExecResult<Value> {
    arity(&args, "bool", 0, 1)?;
    Ok(Value::Bool(
        args.positional.first().is_some_and(Value::is_truthy),
    ))
}

fn list(_: &mut Runtime, args: Args) -> ExecResult<Value> {
    arity(&args, "list", 0, 1)?;
    match args.positional.first() {
        None => Ok(Value::list(Vec::new())),
        Some(iterable) => Ok(Value::list(ops::iterate(iterable)?.collect())),
    }
}

fn range(_: &mut Runtime, args: Args) -> ExecResult<Value> {
    arity(&args, "range", 1, 3)?;
    let ints = args
        .positional
        .iter()
        .map(|v| expect_int(v, "range"))
        .collect::<Result<Vec<_>, _>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => unreachable!("arity checked"),
    };
    if step == 0 {
        return Err(ScriptError::value_error("range() arg 3 must not be zero").into());
    }
    Ok(Value::Range(Range { start, stop, step }))
}

fn abs(_: &mut Runtime, args: Args) -> ExecResult<Value> {
    arity(&args, "abs", 1, 1)?;
    match Num::of(&args.positional[0]) {
        Some(Num::Int(i)) => Ok(Value::Int(i.checked_abs().ok_or_else(ScriptError::overflow)?)),
        Some(Num::Float(f)) => Ok(Value::Float(f.abs())),
        None => Err(ScriptError::type_error(format!(
            "bad operand type for abs(): '{}'",
            args.positional[0].type_name()
        ))
        .into()),
    }
}

fn extreme(args: Args, fname: &str, keep: std::cmp::Ordering) -> ExecResult<Value> {
    arity(&args, fname, 1, usize::MAX)?;
    let items: Vec<Value> = if args.positional.len() == 1 {
        ops::iterate(&args.positional[0])?.collect()
    } else {
        args.positional
    };
    let mut iter = items.into_iter();
    let Some(mut best) = iter.next() else {
        return Err(ScriptError::value_error(format!("{fname}() arg is an empty sequence")).into());
    };
    for item in iter {
        if ops::order(CmpOp::Lt, &item, &best)? == keep {
            best = item;
        }
    }
    Ok(best)
}

fn min(_: &mut Runtime, args: Args) -> ExecResult<Value> {
    extreme(args, "min", std::cmp::Ordering::Less)
}

fn max(_: &mut Runtime, args: Args) -> ExecResult<Value> {
    extreme(args, "max", std::cmp::Ordering::Greater)
}

fn sum(_: &mut Runtime, mut args: Args) -> ExecResult<Value> {
    let start = args.take(1, "start").unwrap_or(Value::Int(0));
    arity(&args, "sum", 1, 2)?;
    let mut total = start;
    for item in ops::iterate(&args.positional[0])? {
        total = ops::binary(BinOp::Add, &total, &item)?;
    }
    Ok(total)
}

fn sorted(_: &mut Runtime, mut args: Args) -> ExecResult<Value> {
    let reverse = args.take_keyword("reverse").is_some_and(|v| v.is_truthy());
    arity(&args, "sorted", 1, 1)?;
    let mut items: Vec<Value> = ops::iterate(&args.positional[0])?.collect();
    let mut failure = None;
    items.sort_by(|a, b| {
        let (a, b) = if reverse { (b, a) } else { (a, b) };
        ops::order(CmpOp::Lt, a, b).unwrap_or_else(|err| {
            failure.get_or_insert(err);
            std::cmp::Ordering::Equal
        })
    });
    match failure {
        Some(err) => Err(err.into()),
        None => Ok(Value::list(items)),
    }
}

fn sleep(rt: &mut Runtime, args: Args) -> ExecResult<Value> {
    arity(&args, "sleep", 1, 1)?;
    let seconds = match Num::of(&args.positional[0]) {
        Some(n) => n.as_f64(),
        None => {
            return Err(ScriptError::type_error(format!(
                "'{}' object cannot be interpreted as a number",
                args.positional[0].type_name()
            ))
            .into());
        }
    };
    if seconds < 0.0 {
        return Err(ScriptError::value_error("sleep length must be non-negative").into());
    }
    let duration = Duration::try_from_secs_f64(seconds)
        .map_err(|_| ScriptError::overflow())?;
    rt.sleep(duration)?;
    Ok(Value::None)
}

fn time(_: &mut Runtime, args: Args) -> ExecResult<Value> {
    arity(&args, "time", 0, 0)?;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    Ok(Value::Float(now.as_secs_f64()))
}

fn getenv(rt: &mut Runtime, mut args: Args) -> ExecResult<Value> {
    let default = args.take(1, "default").unwrap_or(Value::None);
    arity(&args, "getenv", 1, 2)?;
    let name = expect_str(&args.positional[0], "getenv")?;
    Ok(rt.getenv(name).map_or(default, Value::from))
}

/// Whether `receiver` has a builtin method called `name`.
pub(crate) fn has_method(receiver: &Value, name: &str) -> bool {
    let table = match receiver {
        Value::Str(_) => STR_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::Stream(_) => STREAM_METHODS,
        _ => return false,
    };
    table.contains(&name)
}

pub(crate) fn call_method(
    receiver: &Value,
    name: &str,
    args: Args,
    rt: &mut Runtime,
) -> ExecResult<Value> {
    match receiver {
        Value::Str(s) => str_method(s, name, args),
        Value::List(items) => list_method(items, name, args),
        Value::Dict(dict) => dict_method(dict, name, args),
        Value::Stream(channel) => stream_method(*channel, name, args, rt),
        other => Err(ScriptError::attribute_error(&other.type_name(), name).into()),
    }
}

fn str_method(s: &str, name: &str, args: Args) -> ExecResult<Value> {
    let arg_str = |i: usize| -> Result<&str, ScriptError> { expect_str(&args.positional[i], name) };
    let value = match name {
        "upper" => {
            arity(&args, name, 0, 0)?;
            Value::str(s.to_uppercase())
        }
        "lower" => {
            arity(&args, name, 0, 0)?;
            Value::str(s.to_lowercase())
        }
        "strip" | "lstrip" | "rstrip" => {
            arity(&args, name, 0, 1)?;
            let chars: Option<Vec<char>> = match args.positional.first() {
                None | Some(Value::None) => None,
                Some(_) => Some(arg_str(0)?.chars().collect()),
            };
            let pred = |c: char| chars.as_ref().map_or_else(|| c.is_whitespace(), |set| set.contains(&c));
            let out = match name {
                "strip" => s.trim_matches(pred),
                "lstrip" => s.trim_start_matches(pred),
                _ => s.trim_end_matches(pred),
            };
            Value::str(out)
        }
        "split" => {
            arity(&args, name, 0, 1)?;
            let parts: Vec<Value> = match args.positional.first() {
                None | Some(Value::None) => s.split_whitespace().map(Value::str).collect(),
                Some(_) => {
                    let sep = arg_str(0)?;
                    if sep.is_empty() {
                        return Err(ScriptError::value_error("empty separator").into());
                    }
                    s.split(sep).map(Value::str).collect()
                }
            };
            Value::list(parts)
        }
        "join" => {
            arity(&args, name, 1, 1)?;
            let mut parts = Vec::new();
            for item in ops::iterate(&args.positional[0])? {
                match item {
                    Value::Str(part) => parts.push(part.to_string()),
                    other => {
                        return Err(ScriptError::type_error(format!(
                            "sequence item {}: expected str instance, {} found",
                            parts.len(),
                            other.type_name()
                        ))
                        .into());
                    }
                }
            }
            Value::str(parts.join(s))
        }
        "startswith" => {
            arity(&args, name, 1, 1)?;
            Value::Bool(s.starts_with(arg_str(0)?))
        }
        "endswith" => {
            arity(&args, name, 1, 1)?;
            Value::Bool(s.ends_with(arg_str(0)?))
        }
        "replace" => {
            arity(&args, name, 2, 2)?;
            Value::str(s.replace(arg_str(0)?, arg_str(1)?))
        }
        "find" => {
            arity(&args, name, 1, 1)?;
            let idx = s
                .find(arg_str(0)?)
                .map_or(-1, |byte| i64::try_from(s[..byte].chars().count()).unwrap_or(-1));
            Value::Int(idx)
        }
        _ => return Err(ScriptError::attribute_error("str", name).into()),
    };
    Ok(value)
}

fn list_method(
    items: &Rc<std::cell::RefCell<Vec<Value>>>,
    name: &str,
    mut args: Args,
) -> ExecResult<Value> {
    match name {
        "append" => {
            arity(&args, name, 1, 1)?;
            let item = args.positional.remove(0);
            items.borrow_mut().push(item);
            Ok(Value::None)
        }
        "extend" => {
            arity(&args, name, 1, 1)?;
            let extra: Vec<Value> = ops::iterate(&args.positional[0])?.collect();
            items.borrow_mut().extend(extra);
            Ok(Value::None)
        }
        "insert" => {
            arity(&args, name, 2, 2)?;
            let len = i64::try_from(items.borrow().len()).unwrap_or(i64::MAX);
            let at = expect_int(&args.positional[0], name)?;
            let at = if at < 0 { (at + len).max(0) } else { at.min(len) };
            let item = args.positional.remove(1);
            items
                .borrow_mut()
                .insert(usize::try_from(at).unwrap_or(0), item);
            Ok(Value::None)
        }
        "pop" => {
            arity(&args, name, 0, 1)?;
            let mut items = items.borrow_mut();
            if items.is_empty() {
                return Err(ScriptError::new("IndexError", "pop from empty list").into());
            }
            let len = i64::try_from(items.len()).unwrap_or(i64::MAX);
            let at = match args.positional.first() {
                None => len - 1,
                Some(v) => expect_int(v, name)?,
            };
            let at = if at < 0 { at + len } else { at };
            if !(0..len).contains(&at) {
                return Err(ScriptError::new("IndexError", "pop index out of range").into());
            }
            Ok(items.remove(usize::try_from(at).unwrap_or(0)))
        }
        _ => Err(ScriptError::attribute_error("list", name).into()),
    }
}

fn dict_method(
    dict: &Rc<std::cell::RefCell<Dict>>,
    name: &str,
    args: Args,
) -> ExecResult<Value> {
    match name {
        "get" => {
            arity(&args, name, 1, 2)?;
            let default = args.positional.get(1).cloned().unwrap_or(Value::None);
            Ok(dict.borrow().get(&args.positional[0]).unwrap_or(default))
        }
        "keys" => {
            arity(&args, name, 0, 0)?;
            Ok(Value::list(dict.borrow().keys().cloned().collect()))
        }
        "values" => {
            arity(&args, name, 0, 0)?;
            Ok(Value::list(dict.borrow().values().cloned().collect()))
        }
        "items" => {
            arity(&args, name, 0, 0)?;
            Ok(Value::list(
                dict.borrow()
                    .iter()
                    .map(|(k, v)| Value::list(vec![k.clone(), v.clone()]))
                    .collect(),
            ))
        }
        "pop" => {
            arity(&args, name, 1, 2)?;
            let key = &args.positional[0];
            let removed = dict.borrow_mut().remove(key);
            match (removed, args.positional.get(1)) {
                (Some(value), _) => Ok(value),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(ScriptError::new("KeyError", key.repr()).into()),
            }
        }
        _ => Err(ScriptError::attribute_error("dict", name).into()),
    }
}

fn stream_method(channel: Channel, name: &str, args: Args, rt: &mut Runtime) -> ExecResult<Value> {
    match name {
        "write" => {
            arity(&args, name, 1, 1)?;
            let text = expect_str(&args.positional[0], name)?;
            rt.write(channel, text);
            Ok(Value::Int(
                i64::try_from(text.chars().count()).unwrap_or(i64::MAX),
            ))
        }
        "flush" => {
            arity(&args, name, 0, 0)?;
            rt.flush(channel);
            Ok(Value::None)
        }
        _ => Err(ScriptError::attribute_error("TextIOWrapper", name).into()),
    }
}

/// Render `value` under an f-string format spec such as `>8`, `.2f` or `05d`.
pub(crate) fn format_value(value: &Value, spec: &str) -> Result<String, ScriptError> {
    if spec.is_empty() {
        return Ok(value.to_display());
    }
    let invalid = || ScriptError::value_error(format!("Invalid format specifier '{spec}'"));
    let chars: Vec<char> = spec.chars().collect();
    let mut pos = 0;

    let (mut fill, mut align) = (' ', None);
    if chars.len() >= 2 && matches!(chars[1], '<' | '>' | '^') {
        fill = chars[0];
        align = Some(chars[1]);
        pos = 2;
    } else if matches!(chars[0], '<' | '>' | '^') {
        align = Some(chars[0]);
        pos = 1;
    }
    if align.is_none() && chars.get(pos) == Some(&'0') {
        fill = '0';
        align = Some('=');
        pos += 1;
    }
    let digits = |pos: &mut usize| {
        let start = *pos;
        while chars.get(*pos).is_some_and(char::is_ascii_digit) {
            *pos += 1;
        }
        chars[start..*pos].iter().collect::<String>().parse::<usize>().ok()
    };
    let width = digits(&mut pos);
    let precision = if chars.get(pos) == Some(&'.') {
        pos += 1;
        Some(digits(&mut pos).ok_or_else(invalid)?)
    } else {
        None
    };
    let kind = chars.get(pos).copied();
    if kind.is_some() {
        pos += 1;
    }
    if pos != chars.len() {
        return Err(invalid());
    }

    let number = Num::of(value);
    let body = match (kind, number) {
        (Some('f'), Some(n)) => format!("{:.*}", precision.unwrap_or(6), n.as_f64()),
        (Some('%'), Some(n)) => format!("{:.*}%", precision.unwrap_or(6), n.as_f64() * 100.0),
        (Some('d'), Some(Num::Int(i))) => i.to_string(),
        (None, Some(n)) if precision.is_some() => {
            format!("{:.*}", precision.unwrap_or(6), n.as_f64())
        }
        (None | Some('s'), _) => {
            let text = value.to_display();
            match precision {
                Some(p) => text.chars().take(p).collect(),
                None => text,
            }
        }
        (Some(code), _) => {
            return Err(ScriptError::value_error(format!(
                "Unknown format code '{code}' for object of type '{}'",
                value.type_name()
            )));
        }
    };

    let len = body.chars().count();
    let Some(width) = width.filter(|w| *w > len) else {
        return Ok(body);
    };
    let pad = width - len;
    let align = align.unwrap_or(if number.is_some() { '>' } else { '<' });
    let fill_str = |n: usize| std::iter::repeat_n(fill, n).collect::<String>();
    Ok(match align {
        '<' => format!("{body}{}", fill_str(pad)),
        '^' => format!("{}{body}{}", fill_str(pad / 2), fill_str(pad - pad / 2)),
        '=' => match body.strip_prefix('-') {
            Some(rest) => format!("-{}{rest}", fill_str(pad)),
            None => format!("{}{body}", fill_str(pad)),
        },
        _ => format!("{}{body}", fill_str(pad)),
    })
}
