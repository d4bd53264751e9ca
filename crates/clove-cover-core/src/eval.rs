use std::sync::{Arc, RwLock};

use crate::ast::{
    form_to_value, Form, FormKind, Key, Lambda, LambdaClause, NativeFn, Record, RecordType, Span,
    Value,
};
use crate::builtins;
use crate::env::{child_of, new_ref, read_env, write_env, Env, EnvRef};
use crate::error::CoverError;
use crate::normalize::{rule_for, Normalizer};
use crate::reader::read_str;
use im::{HashMap, HashSet, Vector};

pub const DEFAULT_NS: &str = "user";

/// Tree-walking evaluator for instrumented and plain forms.
pub struct Evaluator {
    global: EnvRef,
    current_ns: RwLock<String>,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

fn span_runtime_error(span: Option<Span>, msg: impl Into<String>) -> CoverError {
    CoverError::runtime(msg).with_opt_span(span)
}

fn to_key(value: &Value) -> Result<Key, CoverError> {
    Key::from_value(value).ok_or_else(|| {
        CoverError::runtime(format!(
            "{} cannot be used as a map key or set member",
            value.type_name()
        ))
    })
}

impl Evaluator {
    pub fn new() -> Self {
        let global = new_ref(Env::default());
        builtins::install(&mut write_env(&global));
        Self {
            global,
            current_ns: RwLock::new(DEFAULT_NS.to_string()),
        }
    }

    pub fn global_env(&self) -> EnvRef {
        self.global.clone()
    }

    pub fn define(&self, name: &str, value: Value) {
        write_env(&self.global).set(name, value);
    }

    pub fn lookup_global(&self, name: &str) -> Option<Value> {
        read_env(&self.global).get(name)
    }

    /// Namespace named by the most recent `ns` form.
    pub fn current_ns(&self) -> String {
        match self.current_ns.read() {
            Ok(ns) => ns.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn eval_top(&self, form: &Form) -> Result<Value, CoverError> {
        self.eval(form, self.global.clone())
    }

    /// Reads and evaluates every form of `source`, returning the last value.
    pub fn eval_source(&self, source: &str) -> Result<Value, CoverError> {
        let (forms, _) = read_str(source)?;
        let mut last = Value::Nil;
        for form in &forms {
            last = self.eval_top(form)?;
        }
        Ok(last)
    }

    pub fn eval(&self, form: &Form, env: EnvRef) -> Result<Value, CoverError> {
        let result = match &form.kind {
            FormKind::Symbol(name) => self.resolve(name, &env),
            FormKind::Keyword(k) => Ok(Value::Keyword(k.clone())),
            FormKind::Int(n) => Ok(Value::Int(*n)),
            FormKind::Float(n) => Ok(Value::Float(*n)),
            FormKind::String(s) => Ok(Value::String(s.clone())),
            FormKind::Bool(b) => Ok(Value::Bool(*b)),
            FormKind::Nil => Ok(Value::Nil),
            FormKind::Vector(items) => self.eval_args(items, &env).map(Vector::from).map(Value::Vector),
            FormKind::Set(items) => self.eval_set(items, &env),
            FormKind::Map(entries) => self.eval_map(entries, &env),
            FormKind::Tagged { tag, form } => self
                .eval(form, env)
                .map(|value| Value::Tagged(tag.clone(), Box::new(value))),
            FormKind::List(items) if items.is_empty() => Ok(Value::List(Vector::new())),
            FormKind::List(items) => self.eval_list(form, items, env),
        };
        result.map_err(|err| err.with_opt_span(form.span))
    }

    pub fn eval_do(&self, forms: &[Form], env: EnvRef) -> Result<Value, CoverError> {
        let mut last = Value::Nil;
        for form in forms {
            last = self.eval(form, env.clone())?;
        }
        Ok(last)
    }

    fn eval_args(&self, forms: &[Form], env: &EnvRef) -> Result<Vec<Value>, CoverError> {
        forms.iter().map(|form| self.eval(form, env.clone())).collect()
    }

    fn eval_set(&self, items: &[Form], env: &EnvRef) -> Result<Value, CoverError> {
        let mut set = HashSet::new();
        for item in items {
            set.insert(to_key(&self.eval(item, env.clone())?)?);
        }
        Ok(Value::Set(set))
    }

    fn eval_map(&self, entries: &[(Form, Form)], env: &EnvRef) -> Result<Value, CoverError> {
        let mut map = HashMap::new();
        for (k, v) in entries {
            let key = to_key(&self.eval(k, env.clone())?)?;
            let value = self.eval(v, env.clone())?;
            map.insert(key, value);
        }
        Ok(Value::Map(map))
    }

    fn resolve(&self, name: &str, env: &EnvRef) -> Result<Value, CoverError> {
        read_env(env)
            .get(name)
            .ok_or_else(|| CoverError::unbound_symbol(format!("Unable to resolve symbol: {}", name)))
    }

    fn eval_list(&self, form: &Form, items: &[Form], env: EnvRef) -> Result<Value, CoverError> {
        if let Some(sym) = items[0].as_symbol() {
            if let Some(value) = self.try_eval_special_form(sym, items, env.clone(), form.span)? {
                return Ok(value);
            }
            // Uninstrumented sources still contain sugar the wrapper would have expanded.
            if rule_for(sym).is_some() {
                if let Some(expanded) = Normalizer::new().expand_once(form)? {
                    return self.eval(&expanded, env);
                }
            }
        }
        let f = self.eval(&items[0], env.clone())?;
        let args = self.eval_args(&items[1..], &env)?;
        self.apply(&f, &args)
    }

    fn try_eval_special_form(
        &self,
        sym: &str,
        items: &[Form],
        env: EnvRef,
        span: Option<Span>,
    ) -> Result<Option<Value>, CoverError> {
        let rest = &items[1..];
        let value = match sym {
            "quote" => self.eval_quote(rest, span)?,
            "if" => self.eval_if(rest, env, span)?,
            "do" => self.eval_do(rest, env)?,
            "def" => self.eval_def(rest, env, span)?,
            "let" | "let*" => self.eval_let(sym, rest, env, span)?,
            "fn" | "fn*" => self.eval_fn(rest, env, span)?,
            "loop" | "loop*" => self.eval_loop(sym, rest, env, span)?,
            "recur" => {
                let values = self.eval_args(rest, &env)?;
                return Err(CoverError::RecurSignal { values });
            }
            "throw" => self.eval_throw(rest, env, span)?,
            "try" => self.eval_try(rest, env, span)?,
            "catch" | "finally" => {
                return Err(span_runtime_error(
                    span,
                    format!("{} is only allowed inside try", sym),
                ))
            }
            "new" => self.eval_new(rest, env, span)?,
            "." => self.eval_member(rest, env, span)?,
            "ns" => self.eval_ns(rest, span)?,
            "import" => Value::Nil,
            "defrecord" => self.eval_defrecord(rest, span)?,
            _ => return Ok(None),
        };
        Ok(Some(value))
    }

    fn eval_quote(&self, rest: &[Form], span: Option<Span>) -> Result<Value, CoverError> {
        match rest {
            [form] => form_to_value(form),
            _ => Err(span_runtime_error(span, "quote expects one argument")),
        }
    }

    fn eval_if(&self, rest: &[Form], env: EnvRef, span: Option<Span>) -> Result<Value, CoverError> {
        if rest.len() < 2 || rest.len() > 3 {
            return Err(span_runtime_error(span, "if expects 2 or 3 arguments"));
        }
        let test = self.eval(&rest[0], env.clone())?;
        if test.truthy() {
            self.eval(&rest[1], env)
        } else if let Some(else_form) = rest.get(2) {
            self.eval(else_form, env)
        } else {
            Ok(Value::Nil)
        }
    }

    fn eval_def(&self, rest: &[Form], env: EnvRef, span: Option<Span>) -> Result<Value, CoverError> {
        let Some(name) = rest.first().and_then(Form::as_symbol) else {
            return Err(span_runtime_error(span, "def requires a symbol name"));
        };
        let value = match &rest[1..] {
            [] => Value::Nil,
            [init] | [Form { kind: FormKind::String(_), .. }, init] => self.eval(init, env)?,
            _ => return Err(span_runtime_error(span, "def expects at most a docstring and an initializer")),
        };
        self.define(name, value.clone());
        Ok(value)
    }

    fn binding_pairs<'f>(
        &self,
        what: &str,
        rest: &'f [Form],
        span: Option<Span>,
    ) -> Result<(Vec<(&'f str, &'f Form)>, &'f [Form]), CoverError> {
        let Some(FormKind::Vector(items)) = rest.first().map(|f| &f.kind) else {
            return Err(span_runtime_error(span, format!("{} requires a binding vector", what)));
        };
        if items.len() % 2 != 0 {
            return Err(span_runtime_error(
                span,
                format!("{} requires an even number of forms in the binding vector", what),
            ));
        }
        let mut pairs = Vec::with_capacity(items.len() / 2);
        for pair in items.chunks(2) {
            let Some(name) = pair[0].as_symbol() else {
                return Err(span_runtime_error(
                    pair[0].span.or(span),
                    format!("{} binding names must be symbols", what),
                ));
            };
            pairs.push((name, &pair[1]));
        }
        Ok((pairs, &rest[1..]))
    }

    fn eval_let(
        &self,
        what: &str,
        rest: &[Form],
        env: EnvRef,
        span: Option<Span>,
    ) -> Result<Value, CoverError> {
        let (bindings, body) = self.binding_pairs(what, rest, span)?;
        let scope = child_of(&env);
        for (name, init) in bindings {
            let value = self.eval(init, scope.clone())?;
            write_env(&scope).set(name, value);
        }
        self.eval_do(body, scope)
    }

    fn eval_loop(
        &self,
        what: &str,
        rest: &[Form],
        env: EnvRef,
        span: Option<Span>,
    ) -> Result<Value, CoverError> {
        let (bindings, body) = self.binding_pairs(what, rest, span)?;
        let mut scope = child_of(&env);
        for (name, init) in &bindings {
            let value = self.eval(init, scope.clone())?;
            write_env(&scope).set(name, value);
        }
        loop {
            match self.eval_do(body, scope.clone()) {
                Err(CoverError::RecurSignal { values }) => {
                    if values.len() != bindings.len() {
                        return Err(CoverError::arity(format!(
                            "recur expected {} argument(s), got {}",
                            bindings.len(),
                            values.len()
                        ))
                        .with_opt_span(span));
                    }
                    scope = child_of(&env);
                    let mut frame = write_env(&scope);
                    for ((name, _), value) in bindings.iter().zip(values) {
                        frame.set(name, value);
                    }
                }
                other => return other,
            }
        }
    }

    fn eval_fn(&self, rest: &[Form], env: EnvRef, span: Option<Span>) -> Result<Value, CoverError> {
        let (name, groups) = match rest.first().and_then(Form::as_symbol) {
            Some(name) => (Some(name.to_string()), &rest[1..]),
            None => (None, rest),
        };
        let clauses = match groups.first().map(|f| &f.kind) {
            None => return Err(span_runtime_error(span, "fn requires a parameter vector")),
            Some(FormKind::Vector(params)) => vec![parse_clause(params, &groups[1..], span)?],
            Some(_) => groups
                .iter()
                .map(|group| match group.as_list().map(|items| items.split_first()) {
                    Some(Some((Form { kind: FormKind::Vector(params), .. }, body))) => {
                        parse_clause(params, body, group.span.or(span))
                    }
                    _ => Err(span_runtime_error(
                        group.span.or(span),
                        "fn overloads must start with a parameter vector",
                    )),
                })
                .collect::<Result<Vec<_>, _>>()?,
        };
        Ok(Value::Lambda(Arc::new(Lambda { name, clauses, env })))
    }

    fn eval_throw(&self, rest: &[Form], env: EnvRef, span: Option<Span>) -> Result<Value, CoverError> {
        let [arg] = rest else {
            return Err(span_runtime_error(span, "throw expects one argument"));
        };
        let value = self.eval(arg, env)?;
        Err(CoverError::Thrown(value, Default::default()))
    }

    fn eval_try(&self, rest: &[Form], env: EnvRef, span: Option<Span>) -> Result<Value, CoverError> {
        let split = rest
            .iter()
            .position(|f| matches!(f.head_symbol(), Some("catch" | "finally")))
            .unwrap_or(rest.len());
        let (body, clauses) = rest.split_at(split);
        let mut catches = Vec::new();
        let mut finally = None;
        for (idx, clause) in clauses.iter().enumerate() {
            match clause.head_symbol() {
                Some("catch") if finally.is_none() => catches.push(clause),
                Some("finally") if idx + 1 == clauses.len() => finally = clause.as_list(),
                _ => {
                    return Err(span_runtime_error(
                        clause.span.or(span),
                        "try expects body forms, then catch clauses, then at most one finally",
                    ))
                }
            }
        }
        let result = match self.eval_do(body, env.clone()) {
            Err(err) if !err.is_recur_signal() => self.handle_catch(&catches, err, &env),
            other => other,
        };
        if let Some(finally) = finally {
            self.eval_do(&finally[1..], env)?;
        }
        result
    }

    fn handle_catch(
        &self,
        catches: &[&Form],
        err: CoverError,
        env: &EnvRef,
    ) -> Result<Value, CoverError> {
        for clause in catches {
            let items = clause.as_list().unwrap_or_default();
            let (matcher, binding, body) = match items {
                [_, ty, Form { kind: FormKind::Symbol(name), .. }, body @ ..]
                    if is_catch_type(ty) =>
                {
                    (Some(ty), name, body)
                }
                [_, Form { kind: FormKind::Symbol(name), .. }, body @ ..] => (None, name, body),
                _ => {
                    return Err(span_runtime_error(
                        clause.span,
                        "catch expects an optional type, a binding symbol and a body",
                    ))
                }
            };
            if matcher.is_some_and(|ty| !catch_matches(ty, &err)) {
                continue;
            }
            let scope = child_of(env);
            write_env(&scope).set(binding, error_value(&err));
            return self.eval_do(body, scope);
        }
        Err(err)
    }

    fn eval_new(&self, rest: &[Form], env: EnvRef, span: Option<Span>) -> Result<Value, CoverError> {
        let Some(type_form) = rest.first() else {
            return Err(span_runtime_error(span, "new requires a type"));
        };
        let ty = match self.eval(type_form, env.clone())? {
            Value::RecordType(ty) => ty,
            other => {
                return Err(span_runtime_error(
                    span,
                    format!("{} is not a constructible type", other),
                ))
            }
        };
        let args = self.eval_args(&rest[1..], &env)?;
        construct_record(&ty, args)
    }

    fn eval_member(&self, rest: &[Form], env: EnvRef, span: Option<Span>) -> Result<Value, CoverError> {
        let (Some(target), Some(selector)) = (rest.first(), rest.get(1)) else {
            return Err(span_runtime_error(span, "member access requires a target and a selector"));
        };
        let (method, arg_forms) = match &selector.kind {
            FormKind::Symbol(method) => (method.as_str(), &rest[2..]),
            FormKind::List(call) if rest.len() == 2 => match call.split_first() {
                Some((Form { kind: FormKind::Symbol(method), .. }, args)) => (method.as_str(), args),
                _ => return Err(span_runtime_error(span, "member call must start with a method name")),
            },
            _ => {
                return Err(span_runtime_error(
                    span,
                    "member selector must be a symbol or a method call",
                ))
            }
        };
        let target = self.eval(target, env.clone())?;
        let args = self.eval_args(arg_forms, &env)?;
        builtins::call_method(&target, method, &args)
    }

    fn eval_ns(&self, rest: &[Form], span: Option<Span>) -> Result<Value, CoverError> {
        let Some(name) = rest.first().and_then(Form::as_symbol) else {
            return Err(span_runtime_error(span, "ns requires a namespace symbol"));
        };
        match self.current_ns.write() {
            Ok(mut ns) => *ns = name.to_string(),
            Err(poisoned) => *poisoned.into_inner() = name.to_string(),
        }
        Ok(Value::Nil)
    }

    fn eval_defrecord(&self, rest: &[Form], span: Option<Span>) -> Result<Value, CoverError> {
        let (Some(name), Some(Form { kind: FormKind::Vector(field_forms), .. })) =
            (rest.first().and_then(Form::as_symbol), rest.get(1))
        else {
            return Err(span_runtime_error(span, "defrecord requires a name and a field vector"));
        };
        let fields = field_forms
            .iter()
            .map(|field| {
                field.as_symbol().map(str::to_string).ok_or_else(|| {
                    span_runtime_error(field.span.or(span), "record fields must be symbols")
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let ty = Arc::new(RecordType {
            name: name.to_string(),
            fields,
        });
        let ctor_ty = ty.clone();
        let ctor = NativeFn::new(format!("->{}", name), move |_, args| {
            construct_record(&ctor_ty, args.to_vec())
        });
        self.define(&format!("->{}", name), Value::Func(Arc::new(ctor)));
        self.define(name, Value::RecordType(ty.clone()));
        Ok(Value::RecordType(ty))
    }

    pub fn apply(&self, f: &Value, args: &[Value]) -> Result<Value, CoverError> {
        match f {
            Value::Func(native) => (native.func)(self, args),
            Value::Lambda(lambda) => self.apply_lambda(lambda, args),
            Value::Keyword(_) => match args {
                [target] => Ok(builtins::lookup(target, f).unwrap_or(Value::Nil)),
                [target, default] => Ok(builtins::lookup(target, f).unwrap_or_else(|| default.clone())),
                _ => Err(CoverError::arity(format!(
                    "wrong number of args ({}) passed to keyword {}",
                    args.len(),
                    f
                ))),
            },
            Value::Map(_) | Value::Set(_) | Value::Vector(_) | Value::Record(_) => match args {
                [key] => Ok(builtins::lookup(f, key).unwrap_or(Value::Nil)),
                _ => Err(CoverError::arity(format!(
                    "wrong number of args ({}) passed to {}",
                    args.len(),
                    f.type_name()
                ))),
            },
            other => Err(CoverError::runtime(format!(
                "{} is not callable",
                other.type_name()
            ))),
        }
    }

    fn apply_lambda(&self, lambda: &Arc<Lambda>, args: &[Value]) -> Result<Value, CoverError> {
        let name = lambda.name.as_deref().unwrap_or("fn");
        let Some(clause) = lambda.clauses.iter().find(|c| c.accepts(args.len())) else {
            return Err(CoverError::arity(format!(
                "wrong number of args ({}) passed to {}",
                args.len(),
                name
            )));
        };
        let mut bound = bind_params(clause, args.to_vec());
        loop {
            let scope = child_of(&lambda.env);
            {
                let mut frame = write_env(&scope);
                if let Some(self_name) = &lambda.name {
                    frame.set(self_name, Value::Lambda(lambda.clone()));
                }
                for (param, value) in bound {
                    frame.set(&param, value);
                }
            }
            match self.eval_do(&clause.body, scope) {
                Err(CoverError::RecurSignal { values }) => {
                    let expected = clause.params.len() + usize::from(clause.rest.is_some());
                    if values.len() != expected {
                        return Err(CoverError::arity(format!(
                            "recur expected {} argument(s) for {}, got {}",
                            expected,
                            name,
                            values.len()
                        )));
                    }
                    bound = clause
                        .params
                        .iter()
                        .chain(clause.rest.iter())
                        .cloned()
                        .zip(values)
                        .collect();
                }
                other => return other,
            }
        }
    }
}

fn parse_clause(params: &[Form], body: &[Form], span: Option<Span>) -> Result<LambdaClause, CoverError> {
    let mut names = Vec::with_capacity(params.len());
    let mut rest = None;
    let mut iter = params.iter();
    while let Some(param) = iter.next() {
        match param.as_symbol() {
            Some("&") => {
                let Some(rest_name) = iter.next().and_then(Form::as_symbol) else {
                    return Err(span_runtime_error(span, "& must be followed by a rest parameter"));
                };
                rest = Some(rest_name.to_string());
                if iter.next().is_some() {
                    return Err(span_runtime_error(span, "only one parameter may follow &"));
                }
            }
            Some(name) => names.push(name.to_string()),
            None => return Err(span_runtime_error(param.span.or(span), "parameters must be symbols")),
        }
    }
    Ok(LambdaClause {
        params: names,
        rest,
        body: body.to_vec(),
    })
}

fn bind_params(clause: &LambdaClause, mut args: Vec<Value>) -> Vec<(String, Value)> {
    let extra = args.split_off(clause.params.len());
    let mut bound: Vec<(String, Value)> = clause.params.iter().cloned().zip(args).collect();
    if let Some(rest) = &clause.rest {
        let rest_value = if extra.is_empty() {
            Value::Nil
        } else {
            Value::List(Vector::from(extra))
        };
        bound.push((rest.clone(), rest_value));
    }
    bound
}

fn construct_record(ty: &Arc<RecordType>, args: Vec<Value>) -> Result<Value, CoverError> {
    if args.len() != ty.fields.len() {
        return Err(CoverError::arity(format!(
            "{} expects {} field value(s), got {}",
            ty.name,
            ty.fields.len(),
            args.len()
        )));
    }
    Ok(Value::Record(Arc::new(Record {
        ty: ty.clone(),
        values: args,
    })))
}

fn is_catch_type(form: &Form) -> bool {
    match &form.kind {
        FormKind::Keyword(k) => k == "default",
        FormKind::Symbol(s) => s.chars().next().is_some_and(char::is_uppercase),
        _ => false,
    }
}

fn catch_matches(ty: &Form, err: &CoverError) -> bool {
    let name = match &ty.kind {
        FormKind::Symbol(s) => s.as_str(),
        _ => return true,
    };
    match name {
        "Throwable" | "Exception" | "Error" | "RuntimeException" => true,
        "ExceptionInfo" => matches!(err, CoverError::Thrown(value, _) if builtins::is_ex_info(value)),
        record => matches!(err, CoverError::Thrown(Value::Record(r), _) if r.ty.name == record),
    }
}

/// Value bound by a catch clause.
fn error_value(err: &CoverError) -> Value {
    match err {
        CoverError::Thrown(value, _) => value.clone(),
        other => builtins::ex_info(other.to_string(), Value::Nil),
    }
}
