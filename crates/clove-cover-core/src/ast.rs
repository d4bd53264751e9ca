use std::fmt;
use std::sync::Arc;

use crate::env::EnvRef;
use crate::error::CoverError;
use crate::eval::Evaluator;
use crate::form_to_string::escape_string_fragment;
use crate::meta::MetaId;
use im::{HashMap, HashSet, Vector};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Span {
    pub line: usize,
    pub col: usize,
    pub index: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Form {
    pub kind: FormKind,
    pub span: Option<Span>,
    pub meta: Option<MetaId>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FormKind {
    Symbol(String),
    Keyword(String),
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
    Nil,
    List(Vec<Form>),
    Vector(Vec<Form>),
    Map(Vec<(Form, Form)>),
    Set(Vec<Form>),
    Tagged { tag: String, form: Box<Form> },
}

impl Form {
    pub fn new(kind: FormKind, span: Span) -> Self {
        Self {
            kind,
            span: Some(span),
            meta: None,
        }
    }

    /// A form produced by a rewrite rather than the reader.
    pub fn synthetic(kind: FormKind) -> Self {
        Self {
            kind,
            span: None,
            meta: None,
        }
    }

    pub fn symbol(name: impl Into<String>) -> Self {
        Self::synthetic(FormKind::Symbol(name.into()))
    }

    pub fn list(items: Vec<Form>) -> Self {
        Self::synthetic(FormKind::List(items))
    }

    pub fn vector(items: Vec<Form>) -> Self {
        Self::synthetic(FormKind::Vector(items))
    }

    pub fn nil() -> Self {
        Self::synthetic(FormKind::Nil)
    }

    /// Rebuilds this form around a new kind, keeping its span and metadata.
    pub fn with_kind(&self, kind: FormKind) -> Self {
        Self {
            kind,
            span: self.span,
            meta: self.meta,
        }
    }

    pub fn with_meta(mut self, meta: Option<MetaId>) -> Self {
        self.meta = meta;
        self
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match &self.kind {
            FormKind::Symbol(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Form]> {
        match &self.kind {
            FormKind::List(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    /// Leading symbol of a non-empty list.
    pub fn head_symbol(&self) -> Option<&str> {
        self.as_list()
            .and_then(|items| items.first())
            .and_then(Form::as_symbol)
    }

    /// Equality on shape and content only; spans and metadata are ignored.
    pub fn structurally_eq(&self, other: &Form) -> bool {
        fn all_eq(lhs: &[Form], rhs: &[Form]) -> bool {
            lhs.len() == rhs.len() && lhs.iter().zip(rhs).all(|(a, b)| a.structurally_eq(b))
        }
        match (&self.kind, &other.kind) {
            (FormKind::List(a), FormKind::List(b))
            | (FormKind::Vector(a), FormKind::Vector(b))
            | (FormKind::Set(a), FormKind::Set(b)) => all_eq(a, b),
            (FormKind::Map(a), FormKind::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|((ka, va), (kb, vb))| ka.structurally_eq(kb) && va.structurally_eq(vb))
            }
            (FormKind::Tagged { tag: ta, form: fa }, FormKind::Tagged { tag: tb, form: fb }) => {
                ta == tb && fa.structurally_eq(fb)
            }
            (a, b) => a == b,
        }
    }
}

impl FormKind {
    /// Symbols and collections can carry metadata; other atoms cannot.
    pub fn supports_meta(&self) -> bool {
        matches!(
            self,
            FormKind::Symbol(_)
                | FormKind::List(_)
                | FormKind::Vector(_)
                | FormKind::Map(_)
                | FormKind::Set(_)
        )
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            FormKind::Symbol(_) => "symbol",
            FormKind::Keyword(_) => "keyword",
            FormKind::Int(_) => "int",
            FormKind::Float(_) => "float",
            FormKind::String(_) => "string",
            FormKind::Bool(_) => "bool",
            FormKind::Nil => "nil",
            FormKind::List(_) => "list",
            FormKind::Vector(_) => "vector",
            FormKind::Map(_) => "map",
            FormKind::Set(_) => "set",
            FormKind::Tagged { .. } => "tagged literal",
        }
    }
}

/// Hashable subset of values usable as map keys and set members.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    Nil,
    Bool(bool),
    Int(i64),
    String(String),
    Keyword(String),
    Symbol(String),
}

impl Key {
    pub fn from_value(value: &Value) -> Option<Key> {
        match value {
            Value::Nil => Some(Key::Nil),
            Value::Bool(b) => Some(Key::Bool(*b)),
            Value::Int(n) => Some(Key::Int(*n)),
            Value::String(s) => Some(Key::String(s.clone())),
            Value::Keyword(k) => Some(Key::Keyword(k.clone())),
            Value::Symbol(s) => Some(Key::Symbol(s.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Key::Nil => Value::Nil,
            Key::Bool(b) => Value::Bool(*b),
            Key::Int(n) => Value::Int(*n),
            Key::String(s) => Value::String(s.clone()),
            Key::Keyword(k) => Value::Keyword(k.clone()),
            Key::Symbol(s) => Value::Symbol(s.clone()),
        }
    }
}

pub type NativeImpl =
    dyn Fn(&Evaluator, &[Value]) -> Result<Value, CoverError> + Send + Sync + 'static;

pub struct NativeFn {
    pub name: String,
    pub func: Box<NativeImpl>,
}

impl NativeFn {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Evaluator, &[Value]) -> Result<Value, CoverError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Box::new(func),
        }
    }
}

#[derive(Clone, Debug)]
pub struct LambdaClause {
    pub params: Vec<String>,
    pub rest: Option<String>,
    pub body: Vec<Form>,
}

impl LambdaClause {
    pub fn accepts(&self, argc: usize) -> bool {
        if self.rest.is_some() {
            argc >= self.params.len()
        } else {
            argc == self.params.len()
        }
    }
}

pub struct Lambda {
    pub name: Option<String>,
    pub clauses: Vec<LambdaClause>,
    pub env: EnvRef,
}

#[derive(Debug)]
pub struct RecordType {
    pub name: String,
    pub fields: Vec<String>,
}

#[derive(Debug)]
pub struct Record {
    pub ty: Arc<RecordType>,
    pub values: Vec<Value>,
}

impl Record {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.ty
            .fields
            .iter()
            .position(|field| field == name)
            .and_then(|idx| self.values.get(idx))
    }
}

#[derive(Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Keyword(String),
    Symbol(String),
    List(Vector<Value>),
    Vector(Vector<Value>),
    Map(HashMap<Key, Value>),
    Set(HashSet<Key>),
    Func(Arc<NativeFn>),
    Lambda(Arc<Lambda>),
    RecordType(Arc<RecordType>),
    Record(Arc<Record>),
    Tagged(String, Box<Value>),
}

impl Value {
    pub fn truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Keyword(_) => "keyword",
            Value::Symbol(_) => "symbol",
            Value::List(_) => "list",
            Value::Vector(_) => "vector",
            Value::Map(_) => "map",
            Value::Set(_) => "set",
            Value::Func(_) | Value::Lambda(_) => "fn",
            Value::RecordType(_) => "record type",
            Value::Record(_) => "record",
            Value::Tagged(..) => "tagged",
        }
    }

    /// Elements of a list or vector.
    pub fn as_seq(&self) -> Option<&Vector<Value>> {
        match self {
            Value::List(items) | Value::Vector(items) => Some(items),
            _ => None,
        }
    }

    /// Rendering used by `str` and `println`: strings are unquoted.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Nil => String::new(),
            other => other.to_string(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b))
            | (Value::Keyword(a), Value::Keyword(b))
            | (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (
                Value::List(a) | Value::Vector(a),
                Value::List(b) | Value::Vector(b),
            ) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Set(a), Value::Set(b)) => a == b,
            (Value::Func(a), Value::Func(b)) => Arc::ptr_eq(a, b),
            (Value::Lambda(a), Value::Lambda(b)) => Arc::ptr_eq(a, b),
            (Value::RecordType(a), Value::RecordType(b)) => Arc::ptr_eq(a, b),
            (Value::Record(a), Value::Record(b)) => {
                a.ty.name == b.ty.name && a.values == b.values
            }
            (Value::Tagged(ta, va), Value::Tagged(tb, vb)) => ta == tb && va == vb,
            _ => false,
        }
    }
}

fn join_values<'a>(items: impl Iterator<Item = &'a Value>) -> String {
    items.map(|v| v.to_string()).collect::<Vec<_>>().join(" ")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{:?}", n),
            Value::String(s) => write!(f, "\"{}\"", escape_string_fragment(s)),
            Value::Keyword(k) => write!(f, ":{}", k),
            Value::Symbol(s) => write!(f, "{}", s),
            Value::List(items) => write!(f, "({})", join_values(items.iter())),
            Value::Vector(items) => write!(f, "[{}]", join_values(items.iter())),
            Value::Map(map) => {
                let mut entries: Vec<String> = map
                    .iter()
                    .map(|(k, v)| format!("{} {}", k.to_value(), v))
                    .collect();
                entries.sort();
                write!(f, "{{{}}}", entries.join(", "))
            }
            Value::Set(set) => {
                let mut items: Vec<String> = set.iter().map(|k| k.to_value().to_string()).collect();
                items.sort();
                write!(f, "#{{{}}}", items.join(" "))
            }
            Value::Func(native) => write!(f, "#<builtin {}>", native.name),
            Value::Lambda(lambda) => match &lambda.name {
                Some(name) => write!(f, "#<fn {}>", name),
                None => write!(f, "#<fn>"),
            },
            Value::RecordType(ty) => write!(f, "{}", ty.name),
            Value::Record(record) => {
                let fields: Vec<String> = record
                    .ty
                    .fields
                    .iter()
                    .zip(&record.values)
                    .map(|(name, value)| format!(":{} {}", name, value))
                    .collect();
                write!(f, "#{}{{{}}}", record.ty.name, fields.join(", "))
            }
            Value::Tagged(tag, value) => write!(f, "#{} {}", tag, value),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

/// Converts quoted code into data.
pub fn form_to_value(form: &Form) -> Result<Value, CoverError> {
    let value = match &form.kind {
        FormKind::Symbol(s) => Value::Symbol(s.clone()),
        FormKind::Keyword(k) => Value::Keyword(k.clone()),
        FormKind::Int(n) => Value::Int(*n),
        FormKind::Float(n) => Value::Float(*n),
        FormKind::String(s) => Value::String(s.clone()),
        FormKind::Bool(b) => Value::Bool(*b),
        FormKind::Nil => Value::Nil,
        FormKind::List(items) => Value::List(
            items
                .iter()
                .map(form_to_value)
                .collect::<Result<Vector<_>, _>>()?,
        ),
        FormKind::Vector(items) => Value::Vector(
            items
                .iter()
                .map(form_to_value)
                .collect::<Result<Vector<_>, _>>()?,
        ),
        FormKind::Map(entries) => {
            let mut map = HashMap::new();
            for (k, v) in entries {
                let key = value_to_key(form_to_value(k)?, k)?;
                map.insert(key, form_to_value(v)?);
            }
            Value::Map(map)
        }
        FormKind::Set(items) => {
            let mut set = HashSet::new();
            for item in items {
                set.insert(value_to_key(form_to_value(item)?, item)?);
            }
            Value::Set(set)
        }
        FormKind::Tagged { tag, form } => Value::Tagged(tag.clone(), Box::new(form_to_value(form)?)),
    };
    Ok(value)
}

fn value_to_key(value: Value, form: &Form) -> Result<Key, CoverError> {
    Key::from_value(&value).ok_or_else(|| {
        let err = CoverError::runtime(format!(
            "{} cannot be used as a map key or set member",
            value.type_name()
        ));
        match form.span {
            Some(span) => err.with_span(span),
            None => err,
        }
    })
}
