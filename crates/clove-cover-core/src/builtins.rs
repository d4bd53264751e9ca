use std::sync::Arc;

use crate::ast::{Key, NativeFn, Value};
use crate::env::Env;
use crate::error::CoverError;
use crate::eval::Evaluator;
use im::{HashMap, HashSet, Vector};

fn define(
    env: &mut Env,
    name: &str,
    func: impl Fn(&Evaluator, &[Value]) -> Result<Value, CoverError> + Send + Sync + 'static,
) {
    env.set(name, Value::Func(Arc::new(NativeFn::new(name, func))));
}

fn arity_err(name: &str, expected: &str, got: usize) -> CoverError {
    CoverError::arity(format!(
        "{} expects {} argument(s), got {}",
        name, expected, got
    ))
}

fn type_err(name: &str, expected: &str, got: &Value) -> CoverError {
    CoverError::runtime(format!(
        "{} expects {}, got {}",
        name,
        expected,
        got.type_name()
    ))
}

pub fn install(env: &mut Env) {
    install_arithmetic(env);
    install_comparison(env);
    install_collections(env);
    install_higher_order(env);
    install_misc(env);
}

#[derive(Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn of(name: &str, value: &Value) -> Result<Num, CoverError> {
        match value {
            Value::Int(n) => Ok(Num::Int(*n)),
            Value::Float(n) => Ok(Num::Float(*n)),
            other => Err(type_err(name, "a number", other)),
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::Int(n) => n as f64,
            Num::Float(n) => n,
        }
    }

    fn into_value(self) -> Value {
        match self {
            Num::Int(n) => Value::Int(n),
            Num::Float(n) => Value::Float(n),
        }
    }
}

fn arith(
    name: &'static str,
    lhs: Num,
    rhs: Num,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Num, CoverError> {
    match (lhs, rhs) {
        (Num::Int(a), Num::Int(b)) => int_op(a, b)
            .map(Num::Int)
            .ok_or_else(|| CoverError::runtime(format!("integer overflow in {}", name))),
        (a, b) => Ok(Num::Float(float_op(a.as_f64(), b.as_f64()))),
    }
}

fn fold_numbers(
    name: &'static str,
    identity: i64,
    args: &[Value],
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, CoverError> {
    let mut acc = Num::Int(identity);
    for arg in args {
        acc = arith(name, acc, Num::of(name, arg)?, int_op, float_op)?;
    }
    Ok(acc.into_value())
}

fn divide(lhs: Num, rhs: Num) -> Result<Num, CoverError> {
    match (lhs, rhs) {
        (_, Num::Int(0)) => Err(CoverError::runtime("Divide by zero")),
        (Num::Int(a), Num::Int(b)) if a % b == 0 => Ok(Num::Int(a / b)),
        (a, b) => Ok(Num::Float(a.as_f64() / b.as_f64())),
    }
}

fn install_arithmetic(env: &mut Env) {
    define(env, "+", |_, args| {
        fold_numbers("+", 0, args, i64::checked_add, |a, b| a + b)
    });
    define(env, "*", |_, args| {
        fold_numbers("*", 1, args, i64::checked_mul, |a, b| a * b)
    });
    define(env, "-", |_, args| match args {
        [] => Err(arity_err("-", "at least 1", 0)),
        [only] => arith("-", Num::Int(0), Num::of("-", only)?, i64::checked_sub, |a, b| a - b)
            .map(Num::into_value),
        [first, rest @ ..] => {
            let mut acc = Num::of("-", first)?;
            for arg in rest {
                acc = arith("-", acc, Num::of("-", arg)?, i64::checked_sub, |a, b| a - b)?;
            }
            Ok(acc.into_value())
        }
    });
    define(env, "/", |_, args| match args {
        [] => Err(arity_err("/", "at least 1", 0)),
        [only] => divide(Num::Int(1), Num::of("/", only)?).map(Num::into_value),
        [first, rest @ ..] => {
            let mut acc = Num::of("/", first)?;
            for arg in rest {
                acc = divide(acc, Num::of("/", arg)?)?;
            }
            Ok(acc.into_value())
        }
    });
    define(env, "mod", |_, args| match args {
        [a, b] => match (Num::of("mod", a)?, Num::of("mod", b)?) {
            (_, Num::Int(0)) => Err(CoverError::runtime("Divide by zero")),
            (Num::Int(a), Num::Int(b)) => Ok(Value::Int(a.rem_euclid(b))),
            (a, b) => Ok(Value::Float(a.as_f64().rem_euclid(b.as_f64()))),
        },
        _ => Err(arity_err("mod", "2", args.len())),
    });
    define(env, "inc", |_, args| match args {
        [n] => arith("inc", Num::of("inc", n)?, Num::Int(1), i64::checked_add, |a, b| a + b)
            .map(Num::into_value),
        _ => Err(arity_err("inc", "1", args.len())),
    });
    define(env, "dec", |_, args| match args {
        [n] => arith("dec", Num::of("dec", n)?, Num::Int(1), i64::checked_sub, |a, b| a - b)
            .map(Num::into_value),
        _ => Err(arity_err("dec", "1", args.len())),
    });
}

fn compare_chain(
    name: &'static str,
    args: &[Value],
    holds: fn(f64, f64) -> bool,
) -> Result<Value, CoverError> {
    if args.is_empty() {
        return Err(arity_err(name, "at least 1", 0));
    }
    let nums = args
        .iter()
        .map(|arg| Num::of(name, arg).map(Num::as_f64))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Value::Bool(nums.windows(2).all(|pair| holds(pair[0], pair[1]))))
}

fn install_comparison(env: &mut Env) {
    define(env, "=", |_, args| {
        Ok(Value::Bool(args.windows(2).all(|pair| pair[0] == pair[1])))
    });
    define(env, "not=", |_, args| {
        Ok(Value::Bool(!args.windows(2).all(|pair| pair[0] == pair[1])))
    });
    define(env, "<", |_, args| compare_chain("<", args, |a, b| a < b));
    define(env, ">", |_, args| compare_chain(">", args, |a, b| a > b));
    define(env, "<=", |_, args| compare_chain("<=", args, |a, b| a <= b));
    define(env, ">=", |_, args| compare_chain(">=", args, |a, b| a >= b));
}

fn to_key(name: &str, value: &Value) -> Result<Key, CoverError> {
    Key::from_value(value).ok_or_else(|| type_err(name, "a hashable key", value))
}

/// Elements of anything sequential; `nil` is the empty sequence.
pub fn seq_items(name: &str, value: &Value) -> Result<Vector<Value>, CoverError> {
    match value {
        Value::Nil => Ok(Vector::new()),
        Value::List(items) | Value::Vector(items) => Ok(items.clone()),
        Value::Set(set) => Ok(set.iter().map(Key::to_value).collect()),
        Value::Map(map) => Ok(map
            .iter()
            .map(|(k, v)| Value::Vector(Vector::from(vec![k.to_value(), v.clone()])))
            .collect()),
        Value::String(s) => Ok(s.chars().map(|c| Value::String(c.to_string())).collect()),
        other => Err(type_err(name, "a collection", other)),
    }
}

/// Keyed access shared by `get`, keyword calls and collection calls.
pub fn lookup(coll: &Value, key: &Value) -> Option<Value> {
    match (coll, key) {
        (Value::Map(map), key) => Key::from_value(key).and_then(|k| map.get(&k).cloned()),
        (Value::Record(record), Value::Keyword(field)) => record.field(field).cloned(),
        (Value::Vector(items), Value::Int(idx)) => {
            usize::try_from(*idx).ok().and_then(|idx| items.get(idx).cloned())
        }
        (Value::Set(set), key) => Key::from_value(key)
            .filter(|k| set.contains(k))
            .map(|_| key.clone()),
        _ => None,
    }
}

fn conj_one(coll: Value, item: Value) -> Result<Value, CoverError> {
    match coll {
        Value::Nil => Ok(Value::List(Vector::from(vec![item]))),
        Value::Vector(mut items) => {
            items.push_back(item);
            Ok(Value::Vector(items))
        }
        Value::List(mut items) => {
            items.push_front(item);
            Ok(Value::List(items))
        }
        Value::Set(mut set) => {
            set.insert(to_key("conj", &item)?);
            Ok(Value::Set(set))
        }
        Value::Map(mut map) => match item.as_seq().map(|pair| (pair.get(0), pair.get(1), pair.len())) {
            Some((Some(k), Some(v), 2)) => {
                map.insert(to_key("conj", k)?, v.clone());
                Ok(Value::Map(map))
            }
            _ => Err(CoverError::runtime(
                "conj on a map expects [key value] entries",
            )),
        },
        other => Err(type_err("conj", "a collection", &other)),
    }
}

fn assoc_one(coll: Value, key: &Value, value: Value) -> Result<Value, CoverError> {
    match coll {
        Value::Nil => Ok(Value::Map(HashMap::unit(to_key("assoc", key)?, value))),
        Value::Map(mut map) => {
            map.insert(to_key("assoc", key)?, value);
            Ok(Value::Map(map))
        }
        Value::Vector(mut items) => match key {
            Value::Int(idx) if (*idx as usize) < items.len() && *idx >= 0 => {
                items.set(*idx as usize, value);
                Ok(Value::Vector(items))
            }
            Value::Int(idx) if *idx as usize == items.len() => {
                items.push_back(value);
                Ok(Value::Vector(items))
            }
            _ => Err(CoverError::runtime(format!("assoc index {} out of bounds", key))),
        },
        other => Err(type_err("assoc", "a map or vector", &other)),
    }
}

fn install_collections(env: &mut Env) {
    define(env, "list", |_, args| Ok(Value::List(args.iter().cloned().collect())));
    define(env, "vector", |_, args| Ok(Value::Vector(args.iter().cloned().collect())));
    define(env, "hash-map", |_, args| {
        if args.len() % 2 != 0 {
            return Err(CoverError::runtime("hash-map expects an even number of arguments"));
        }
        let mut map = HashMap::new();
        for pair in args.chunks(2) {
            map.insert(to_key("hash-map", &pair[0])?, pair[1].clone());
        }
        Ok(Value::Map(map))
    });
    define(env, "hash-set", |_, args| {
        let mut set = HashSet::new();
        for arg in args {
            set.insert(to_key("hash-set", arg)?);
        }
        Ok(Value::Set(set))
    });
    define(env, "get", |_, args| match args {
        [coll, key] => Ok(lookup(coll, key).unwrap_or(Value::Nil)),
        [coll, key, default] => Ok(lookup(coll, key).unwrap_or_else(|| default.clone())),
        _ => Err(arity_err("get", "2 or 3", args.len())),
    });
    define(env, "assoc", |_, args| match args {
        [coll, kvs @ ..] if !kvs.is_empty() && kvs.len() % 2 == 0 => {
            let mut acc = coll.clone();
            for pair in kvs.chunks(2) {
                acc = assoc_one(acc, &pair[0], pair[1].clone())?;
            }
            Ok(acc)
        }
        _ => Err(arity_err("assoc", "a collection and key/value pairs", args.len())),
    });
    define(env, "conj", |_, args| match args {
        [coll, items @ ..] => {
            let mut acc = coll.clone();
            for item in items {
                acc = conj_one(acc, item.clone())?;
            }
            Ok(acc)
        }
        [] => Ok(Value::Vector(Vector::new())),
    });
    define(env, "cons", |_, args| match args {
        [item, coll] => {
            let mut items = seq_items("cons", coll)?;
            items.push_front(item.clone());
            Ok(Value::List(items))
        }
        _ => Err(arity_err("cons", "2", args.len())),
    });
    define(env, "first", |_, args| match args {
        [coll] => Ok(seq_items("first", coll)?.head().cloned().unwrap_or(Value::Nil)),
        _ => Err(arity_err("first", "1", args.len())),
    });
    define(env, "rest", |_, args| match args {
        [coll] => {
            let items = seq_items("rest", coll)?;
            Ok(Value::List(items.skip(1.min(items.len()))))
        }
        _ => Err(arity_err("rest", "1", args.len())),
    });
    define(env, "nth", |_, args| {
        let (coll, idx, default) = match args {
            [coll, idx] => (coll, idx, None),
            [coll, idx, default] => (coll, idx, Some(default)),
            _ => return Err(arity_err("nth", "2 or 3", args.len())),
        };
        let Value::Int(idx) = idx else {
            return Err(type_err("nth", "an integer index", idx));
        };
        let items = seq_items("nth", coll)?;
        match (usize::try_from(*idx).ok().and_then(|i| items.get(i)), default) {
            (Some(value), _) => Ok(value.clone()),
            (None, Some(default)) => Ok(default.clone()),
            (None, None) => Err(CoverError::runtime(format!(
                "nth index {} out of bounds for {} item(s)",
                idx,
                items.len()
            ))),
        }
    });
    define(env, "count", |_, args| match args {
        [Value::String(s)] => Ok(Value::Int(s.chars().count() as i64)),
        [coll] => Ok(Value::Int(seq_items("count", coll)?.len() as i64)),
        _ => Err(arity_err("count", "1", args.len())),
    });
    define(env, "empty?", |_, args| match args {
        [coll] => Ok(Value::Bool(seq_items("empty?", coll)?.is_empty())),
        _ => Err(arity_err("empty?", "1", args.len())),
    });
    define(env, "contains?", |_, args| match args {
        [Value::Vector(items), Value::Int(idx)] => {
            Ok(Value::Bool(*idx >= 0 && (*idx as usize) < items.len()))
        }
        [Value::Map(map), key] => Ok(Value::Bool(
            Key::from_value(key).is_some_and(|k| map.contains_key(&k)),
        )),
        [Value::Set(set), key] => Ok(Value::Bool(
            Key::from_value(key).is_some_and(|k| set.contains(&k)),
        )),
        [Value::Record(record), Value::Keyword(field)] => {
            Ok(Value::Bool(record.field(field).is_some()))
        }
        [_, _] => Ok(Value::Bool(false)),
        _ => Err(arity_err("contains?", "2", args.len())),
    });
}

fn install_higher_order(env: &mut Env) {
    define(env, "map", |ev, args| match args {
        [f, colls @ ..] if !colls.is_empty() => {
            let seqs = colls
                .iter()
                .map(|coll| seq_items("map", coll))
                .collect::<Result<Vec<_>, _>>()?;
            let len = seqs.iter().map(Vector::len).min().unwrap_or(0);
            let mut out = Vector::new();
            for idx in 0..len {
                let call_args: Vec<Value> = seqs.iter().map(|seq| seq[idx].clone()).collect();
                out.push_back(ev.apply(f, &call_args)?);
            }
            Ok(Value::List(out))
        }
        _ => Err(arity_err("map", "a function and at least one collection", args.len())),
    });
    define(env, "filter", |ev, args| match args {
        [pred, coll] => {
            let mut out = Vector::new();
            for item in seq_items("filter", coll)? {
                if ev.apply(pred, std::slice::from_ref(&item))?.truthy() {
                    out.push_back(item);
                }
            }
            Ok(Value::List(out))
        }
        _ => Err(arity_err("filter", "2", args.len())),
    });
    define(env, "reduce", |ev, args| {
        let (f, init, coll) = match args {
            [f, coll] => (f, None, coll),
            [f, init, coll] => (f, Some(init.clone()), coll),
            _ => return Err(arity_err("reduce", "2 or 3", args.len())),
        };
        let mut items = seq_items("reduce", coll)?;
        let mut acc = match init {
            Some(init) => init,
            None => match items.pop_front() {
                Some(first) => first,
                None => return ev.apply(f, &[]),
            },
        };
        for item in items {
            acc = ev.apply(f, &[acc, item])?;
        }
        Ok(acc)
    });
    define(env, "apply", |ev, args| match args {
        [f, middle @ .., last] => {
            let mut call_args = middle.to_vec();
            call_args.extend(seq_items("apply", last)?);
            ev.apply(f, &call_args)
        }
        _ => Err(arity_err("apply", "a function and a collection", args.len())),
    });
    define(env, "identity", |_, args| match args {
        [value] => Ok(value.clone()),
        _ => Err(arity_err("identity", "1", args.len())),
    });
}

const EX_MESSAGE: &str = "message";
const EX_DATA: &str = "data";

/// Thrown-value shape produced by `ex-info`: `{:message msg :data data}`.
pub fn ex_info(message: impl Into<String>, data: Value) -> Value {
    let mut map = HashMap::new();
    map.insert(Key::Keyword(EX_MESSAGE.into()), Value::String(message.into()));
    map.insert(Key::Keyword(EX_DATA.into()), data);
    Value::Map(map)
}

pub fn is_ex_info(value: &Value) -> bool {
    matches!(value, Value::Map(map)
        if map.contains_key(&Key::Keyword(EX_MESSAGE.into()))
            && map.contains_key(&Key::Keyword(EX_DATA.into())))
}

fn install_misc(env: &mut Env) {
    define(env, "str", |_, args| {
        Ok(Value::String(
            args.iter().map(Value::to_display_string).collect(),
        ))
    });
    define(env, "println", |_, args| {
        let line: Vec<String> = args.iter().map(Value::to_display_string).collect();
        println!("{}", line.join(" "));
        Ok(Value::Nil)
    });
    define(env, "not", |_, args| match args {
        [value] => Ok(Value::Bool(!value.truthy())),
        _ => Err(arity_err("not", "1", args.len())),
    });
    define(env, "nil?", |_, args| match args {
        [value] => Ok(Value::Bool(matches!(value, Value::Nil))),
        _ => Err(arity_err("nil?", "1", args.len())),
    });
    define(env, "ex-info", |_, args| match args {
        [Value::String(msg), data] => Ok(ex_info(msg.clone(), data.clone())),
        [other, _] => Err(type_err("ex-info", "a message string", other)),
        _ => Err(arity_err("ex-info", "2", args.len())),
    });
    define(env, "ex-message", |_, args| match args {
        [value] if is_ex_info(value) => {
            Ok(lookup(value, &Value::Keyword(EX_MESSAGE.into())).unwrap_or(Value::Nil))
        }
        [Value::String(msg)] => Ok(Value::String(msg.clone())),
        [_] => Ok(Value::Nil),
        _ => Err(arity_err("ex-message", "1", args.len())),
    });
    define(env, "ex-data", |_, args| match args {
        [value] if is_ex_info(value) => {
            Ok(lookup(value, &Value::Keyword(EX_DATA.into())).unwrap_or(Value::Nil))
        }
        [_] => Ok(Value::Nil),
        _ => Err(arity_err("ex-data", "1", args.len())),
    });
}

fn int_arg(method: &str, args: &[Value], idx: usize) -> Result<usize, CoverError> {
    match args.get(idx) {
        Some(Value::Int(n)) if *n >= 0 => Ok(*n as usize),
        Some(other) => Err(type_err(method, "a non-negative integer", other)),
        None => Err(arity_err(method, &format!("at least {}", idx + 1), args.len())),
    }
}

fn str_arg<'a>(method: &str, args: &'a [Value]) -> Result<&'a str, CoverError> {
    match args {
        [Value::String(s)] => Ok(s.as_str()),
        [other] => Err(type_err(method, "a string", other)),
        _ => Err(arity_err(method, "1", args.len())),
    }
}

/// Methods reachable through `(. target method args...)`.
pub fn call_method(target: &Value, method: &str, args: &[Value]) -> Result<Value, CoverError> {
    match target {
        Value::Record(record) => {
            let field = method.strip_prefix('-').unwrap_or(method);
            match (record.field(field), args) {
                (Some(value), []) => Ok(value.clone()),
                (Some(_), _) => Err(arity_err(method, "0", args.len())),
                (None, _) => Err(CoverError::runtime(format!(
                    "{} has no field {}",
                    record.ty.name, field
                ))),
            }
        }
        Value::String(s) => string_method(s, method, args),
        Value::List(items) | Value::Vector(items) => match (method, args) {
            ("size", []) => Ok(Value::Int(items.len() as i64)),
            ("get", [_]) => {
                let idx = int_arg(method, args, 0)?;
                items.get(idx).cloned().ok_or_else(|| {
                    CoverError::runtime(format!("index {} out of bounds", idx))
                })
            }
            _ => Err(no_method(target, method)),
        },
        Value::Map(map) => match (method, args) {
            ("size", []) => Ok(Value::Int(map.len() as i64)),
            ("get", [key]) => Ok(lookup(target, key).unwrap_or(Value::Nil)),
            ("containsKey", [key]) => Ok(Value::Bool(
                Key::from_value(key).is_some_and(|k| map.contains_key(&k)),
            )),
            _ => Err(no_method(target, method)),
        },
        _ => Err(no_method(target, method)),
    }
}

fn no_method(target: &Value, method: &str) -> CoverError {
    CoverError::runtime(format!(
        "No method {} for {}",
        method,
        target.type_name()
    ))
}

fn string_method(s: &str, method: &str, args: &[Value]) -> Result<Value, CoverError> {
    let value = match method {
        "length" => Value::Int(s.chars().count() as i64),
        "toUpperCase" => Value::String(s.to_uppercase()),
        "toLowerCase" => Value::String(s.to_lowercase()),
        "trim" => Value::String(s.trim().to_string()),
        "substring" => {
            let chars: Vec<char> = s.chars().collect();
            let start = int_arg(method, args, 0)?;
            let end = if args.len() > 1 {
                int_arg(method, args, 1)?
            } else {
                chars.len()
            };
            if start > end || end > chars.len() {
                return Err(CoverError::runtime(format!(
                    "substring range {}..{} out of bounds for length {}",
                    start,
                    end,
                    chars.len()
                )));
            }
            Value::String(chars[start..end].iter().collect())
        }
        "indexOf" => {
            let needle = str_arg(method, args)?;
            let idx = s
                .find(needle)
                .map(|byte_idx| s[..byte_idx].chars().count() as i64)
                .unwrap_or(-1);
            Value::Int(idx)
        }
        "startsWith" => Value::Bool(s.starts_with(str_arg(method, args)?)),
        "endsWith" => Value::Bool(s.ends_with(str_arg(method, args)?)),
        "contains" => Value::Bool(s.contains(str_arg(method, args)?)),
        _ => return Err(no_method(&Value::String(s.to_string()), method)),
    };
    Ok(value)
}
