use std::fmt;

use crate::ast::{Span, Value};
use thiserror::Error;

pub const ERROR_TAG: &str = "\x1b[31m[ERROR]\x1b[0m";
pub const WARN_TAG: &str = "\x1b[33m[WARN]\x1b[0m";

#[derive(Clone, Debug, Default)]
pub struct ErrorContext {
    pub span: Option<Span>,
    pub module: Option<String>,
    /// Printed text of the form being processed when the error surfaced.
    pub form: Option<String>,
}

impl ErrorContext {
    fn set_span(&mut self, span: Span) {
        if self.span.is_none() {
            self.span = Some(span);
        }
    }

    fn set_module(&mut self, module: Option<String>) {
        if self.module.is_none() {
            self.module = module;
        }
    }

    fn set_form(&mut self, form: String) {
        if self.form.is_none() {
            self.form = Some(form);
        }
    }
}

#[derive(Clone, Debug)]
pub struct ErrorData {
    pub message: String,
    pub context: ErrorContext,
}

impl ErrorData {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }
}

impl fmt::Display for ErrorData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[derive(Error, Debug, Clone)]
pub enum CoverError {
    #[error("Invalid module identifier: {0}")]
    InvalidModule(ErrorData),

    #[error("Parse error: {0}")]
    Parse(ErrorData),

    #[error("Instrumentation failed: {0}")]
    Wrap(ErrorData),

    #[error("Unclassified form: {0}")]
    Unclassified(ErrorData),

    #[error("Evaluation failed: {message}")]
    Eval {
        message: String,
        original: String,
        rewritten: String,
        context: ErrorContext,
    },

    #[error("Unbound symbol: {0}")]
    UnboundSymbol(ErrorData),

    #[error("Arity mismatch: {0}")]
    Arity(ErrorData),

    #[error("Runtime error: {0}")]
    Runtime(ErrorData),

    #[error("Thrown: {0}")]
    Thrown(Value, ErrorContext),

    #[error("I/O error: {0}")]
    Io(ErrorData),

    #[error("Config error: {0}")]
    Config(ErrorData),

    #[error("internal recur signal")]
    RecurSignal { values: Vec<Value> },
}

impl CoverError {
    pub fn invalid_module(message: impl Into<String>) -> Self {
        CoverError::InvalidModule(ErrorData::new(message))
    }

    pub fn parse(message: impl Into<String>) -> Self {
        CoverError::Parse(ErrorData::new(message))
    }

    pub fn wrap(message: impl Into<String>) -> Self {
        CoverError::Wrap(ErrorData::new(message))
    }

    pub fn unclassified(message: impl Into<String>) -> Self {
        CoverError::Unclassified(ErrorData::new(message))
    }

    pub fn eval(cause: &CoverError, original: String, rewritten: String) -> Self {
        CoverError::Eval {
            message: cause.to_string(),
            original,
            rewritten,
            context: cause.context_ref().cloned().unwrap_or_default(),
        }
    }

    pub fn unbound_symbol(message: impl Into<String>) -> Self {
        CoverError::UnboundSymbol(ErrorData::new(message))
    }

    pub fn arity(message: impl Into<String>) -> Self {
        CoverError::Arity(ErrorData::new(message))
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        CoverError::Runtime(ErrorData::new(message))
    }

    pub fn io(message: impl Into<String>) -> Self {
        CoverError::Io(ErrorData::new(message))
    }

    pub fn config(message: impl Into<String>) -> Self {
        CoverError::Config(ErrorData::new(message))
    }

    pub fn with_span(mut self, span: Span) -> Self {
        if let Some(ctx) = self.context_mut() {
            ctx.set_span(span);
        }
        self
    }

    pub fn with_opt_span(self, span: Option<Span>) -> Self {
        match span {
            Some(span) => self.with_span(span),
            None => self,
        }
    }

    pub fn with_module(mut self, module: Option<String>) -> Self {
        if let Some(ctx) = self.context_mut() {
            ctx.set_module(module);
        }
        self
    }

    pub fn with_form(mut self, form: impl Into<String>) -> Self {
        if let Some(ctx) = self.context_mut() {
            ctx.set_form(form.into());
        }
        self
    }

    pub fn span(&self) -> Option<Span> {
        self.context_ref().and_then(|ctx| ctx.span)
    }

    pub fn module(&self) -> Option<&str> {
        self.context_ref().and_then(|ctx| ctx.module.as_deref())
    }

    pub fn form(&self) -> Option<&str> {
        self.context_ref().and_then(|ctx| ctx.form.as_deref())
    }

    pub fn is_recur_signal(&self) -> bool {
        matches!(self, CoverError::RecurSignal { .. })
    }

    fn context_ref(&self) -> Option<&ErrorContext> {
        match self {
            CoverError::InvalidModule(data)
            | CoverError::Parse(data)
            | CoverError::Wrap(data)
            | CoverError::Unclassified(data)
            | CoverError::UnboundSymbol(data)
            | CoverError::Arity(data)
            | CoverError::Runtime(data)
            | CoverError::Io(data)
            | CoverError::Config(data) => Some(&data.context),
            CoverError::Eval { context, .. } | CoverError::Thrown(_, context) => Some(context),
            CoverError::RecurSignal { .. } => None,
        }
    }

    fn context_mut(&mut self) -> Option<&mut ErrorContext> {
        match self {
            CoverError::InvalidModule(data)
            | CoverError::Parse(data)
            | CoverError::Wrap(data)
            | CoverError::Unclassified(data)
            | CoverError::UnboundSymbol(data)
            | CoverError::Arity(data)
            | CoverError::Runtime(data)
            | CoverError::Io(data)
            | CoverError::Config(data) => Some(&mut data.context),
            CoverError::Eval { context, .. } | CoverError::Thrown(_, context) => Some(context),
            CoverError::RecurSignal { .. } => None,
        }
    }
}

impl From<std::io::Error> for CoverError {
    fn from(err: std::io::Error) -> Self {
        CoverError::io(err.to_string())
    }
}

pub fn format_error(err: &CoverError) -> Vec<String> {
    let mut lines = vec![format!("{} {}", ERROR_TAG, err)];
    if let Some(location) = format_error_location(err.module(), err.span()) {
        lines.push(format!("  at {}", location));
    }
    match err {
        CoverError::Eval {
            original,
            rewritten,
            ..
        } => {
            lines.push(format!("  original:  {}", original));
            lines.push(format!("  rewritten: {}", rewritten));
        }
        _ => {
            if let Some(form) = err.form() {
                lines.push(format!("  form: {}", form));
            }
        }
    }
    lines
}

fn format_error_location(module: Option<&str>, span: Option<Span>) -> Option<String> {
    let name = module.unwrap_or("unknown");
    match span {
        Some(span) => Some(format!("{}:{}:{}", name, span.line, span.col)),
        None => module.map(|m| m.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_is_set_once() {
        let err = CoverError::wrap("bad overload")
            .with_span(Span { line: 3, col: 1, index: 10 })
            .with_span(Span { line: 9, col: 1, index: 90 })
            .with_module(Some("app.core".into()))
            .with_form("(fn (x))");
        assert_eq!(err.span().map(|s| s.line), Some(3));
        assert_eq!(err.module(), Some("app.core"));
        let lines = format_error(&err);
        assert!(lines[1].contains("app.core:3:1"), "{:?}", lines);
        assert!(lines[2].contains("(fn (x))"), "{:?}", lines);
    }

    #[test]
    fn eval_error_reports_both_texts() {
        let cause = CoverError::unbound_symbol("y");
        let err = CoverError::eval(&cause, "(f y)".into(), "(capture 1 0 (f y))".into());
        let lines = format_error(&err);
        assert!(lines.iter().any(|l| l.contains("original:  (f y)")));
        assert!(lines.iter().any(|l| l.contains("rewritten: (capture 1 0 (f y))")));
    }
}
