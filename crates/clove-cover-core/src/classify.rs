use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::ast::{Form, FormKind};
use crate::probe::CAPTURE_SYM;
use once_cell::sync::Lazy;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Label {
    Stop,
    Atomic,
    Structural,
    Binding,
    Definition,
    ConstructorCall,
    MemberAccess,
    Function,
    Compound,
    Default,
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Label::Stop => "stop",
            Label::Atomic => "atomic",
            Label::Structural => "structural",
            Label::Binding => "binding",
            Label::Definition => "definition",
            Label::ConstructorCall => "constructor-call",
            Label::MemberAccess => "member-access",
            Label::Function => "function",
            Label::Compound => "compound",
            Label::Default => "default",
        };
        f.write_str(name)
    }
}

/// Heads of forms that are never descended into or wrapped.
static STOP_SYMBOLS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "quote",
        "loop",
        "loop*",
        "recur",
        "import",
        "catch",
        "finally",
        "ns",
        "defrecord",
        CAPTURE_SYM,
    ]
    .into_iter()
    .collect()
});

static LIST_KINDS: Lazy<HashMap<&'static str, Label>> = Lazy::new(|| {
    HashMap::from([
        ("let", Label::Binding),
        ("let*", Label::Binding),
        ("def", Label::Definition),
        ("new", Label::ConstructorCall),
        (".", Label::MemberAccess),
        ("fn", Label::Function),
        ("fn*", Label::Function),
    ])
});

/// Special-form heads: syntax rather than values, so never probed themselves.
static SPECIAL_HEADS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| ["if", "do", "throw", "try"].into_iter().collect());

pub fn is_stop_symbol(sym: &str) -> bool {
    STOP_SYMBOLS.contains(sym)
}

pub fn is_special_head(sym: &str) -> bool {
    SPECIAL_HEADS.contains(sym)
}

pub fn classify(form: &Form) -> Label {
    if form.head_symbol().is_some_and(is_stop_symbol) {
        return Label::Stop;
    }
    match &form.kind {
        FormKind::Symbol(_)
        | FormKind::Keyword(_)
        | FormKind::Int(_)
        | FormKind::Float(_)
        | FormKind::String(_)
        | FormKind::Bool(_)
        | FormKind::Nil => Label::Atomic,
        FormKind::Vector(_) | FormKind::Map(_) | FormKind::Set(_) => Label::Structural,
        FormKind::List(items) if !items.is_empty() => form
            .head_symbol()
            .and_then(|head| LIST_KINDS.get(head).copied())
            .unwrap_or(Label::Compound),
        _ => Label::Default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::read_str;

    fn label_of(src: &str) -> Label {
        let (forms, _) = read_str(src).expect("read");
        classify(&forms[0])
    }

    #[test]
    fn labels_follow_priority_order() {
        let cases = [
            ("'x", Label::Stop),
            ("(loop [i 0] (recur i))", Label::Stop),
            ("(finally (close))", Label::Stop),
            ("(clove.cover::capture 1 0 x)", Label::Stop),
            ("x", Label::Atomic),
            (":k", Label::Atomic),
            ("nil", Label::Atomic),
            ("\"s\"", Label::Atomic),
            ("[1 2]", Label::Structural),
            ("{:a 1}", Label::Structural),
            ("#{1}", Label::Structural),
            ("(let [a 1] a)", Label::Binding),
            ("(def a 1)", Label::Definition),
            ("(new Point 1 2)", Label::ConstructorCall),
            ("(. s length)", Label::MemberAccess),
            ("(fn [x] x)", Label::Function),
            ("(fn* ([x] x))", Label::Function),
            ("(+ 1 2)", Label::Compound),
            ("((fn [x] x) 1)", Label::Compound),
            ("(when a b)", Label::Compound),
            ("()", Label::Default),
            ("#inst \"2020\"", Label::Default),
        ];
        for (src, expected) in cases {
            assert_eq!(label_of(src), expected, "{}", src);
        }
    }

    #[test]
    fn classification_is_deterministic() {
        let (a, _) = read_str("(let [x (f 1)] (g x))").unwrap();
        let (b, _) = read_str("(let [x (f 1)]\n  (g x))").unwrap();
        assert_eq!(classify(&a[0]), classify(&b[0]));
        assert_eq!(classify(&a[0]), classify(&a[0]));
    }
}
