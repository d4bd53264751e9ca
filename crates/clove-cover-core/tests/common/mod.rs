#![allow(dead_code)]

use clove_cover_core::ast::{Form, FormKind};
use clove_cover_core::classify::{is_special_head, is_stop_symbol};
use clove_cover_core::error::CoverError;
use clove_cover_core::form_to_string::form_to_string;
use clove_cover_core::meta::MetaTable;
use clove_cover_core::probe::{capture_call, Probe, CAPTURE_SYM};
use clove_cover_core::reader::read_str;
use clove_cover_core::wrap::Wrapper;

/// Records `(line, source text)` per probe and numbers calls sequentially.
#[derive(Debug, Default)]
pub struct RecordingProbe {
    pub calls: Vec<(String, Option<usize>)>,
}

impl Probe for RecordingProbe {
    fn probe(&mut self, table: &MetaTable, line: Option<usize>, form: Form) -> Form {
        let source = table.original_of(&form).unwrap_or(&form);
        let id = self.calls.len();
        self.calls.push((form_to_string(source), line));
        capture_call(line, id, form)
    }
}

pub fn try_wrap_source(
    source: &str,
    strict: bool,
) -> Result<(Vec<Form>, RecordingProbe), CoverError> {
    let (forms, mut table) = read_str(source)?;
    let mut probe = RecordingProbe::default();
    let mut wrapped = Vec::with_capacity(forms.len());
    for form in forms {
        wrapped.push(
            Wrapper::new(&mut probe, &mut table)
                .strict(strict)
                .wrap(None, form)?,
        );
    }
    Ok((wrapped, probe))
}

pub fn wrap_source(source: &str) -> (Vec<Form>, RecordingProbe) {
    try_wrap_source(source, false).unwrap_or_else(|e| panic!("failed to wrap {}: {}", source, e))
}

pub fn wrap_one(source: &str) -> Form {
    let (mut forms, _) = wrap_source(source);
    assert_eq!(forms.len(), 1, "expected one form in {}", source);
    forms.remove(0)
}

pub fn parse_one(source: &str) -> Form {
    let (mut forms, _) = read_str(source).unwrap_or_else(|e| panic!("failed to parse: {}", e));
    forms.remove(0)
}

/// Line and wrapped form of a probe call.
pub fn capture_parts(form: &Form) -> Option<(Option<usize>, &Form)> {
    match form.as_list()? {
        [head, line, _id, inner] if head.as_symbol() == Some(CAPTURE_SYM) => {
            let line = match line.kind {
                FormKind::Int(n) => Some(n as usize),
                _ => None,
            };
            Some((line, inner))
        }
        _ => None,
    }
}

pub fn count_captures(form: &Form) -> usize {
    let own = usize::from(capture_parts(form).is_some());
    let children: usize = match &form.kind {
        FormKind::List(items) | FormKind::Vector(items) | FormKind::Set(items) => {
            items.iter().map(count_captures).sum()
        }
        FormKind::Map(entries) => entries
            .iter()
            .map(|(k, v)| count_captures(k) + count_captures(v))
            .sum(),
        FormKind::Tagged { form, .. } => count_captures(form),
        _ => 0,
    };
    own + children
}

/// Asserts that every leaf and compound reachable outside stop forms sits
/// directly inside exactly one probe call.
pub fn assert_probed_once(form: &Form) {
    check(form, false, &form_to_string(form));
}

fn check(form: &Form, wrapped: bool, ctx: &str) {
    if let Some((_, inner)) = capture_parts(form) {
        assert!(!wrapped, "probe call wraps a probe call in {}", ctx);
        assert!(
            capture_parts(inner).is_none(),
            "double probe around {} in {}",
            form_to_string(inner),
            ctx
        );
        return check(inner, true, ctx);
    }
    match &form.kind {
        FormKind::Vector(items) | FormKind::Set(items) => {
            assert!(!wrapped, "container probed: {}", form_to_string(form));
            items.iter().for_each(|item| check(item, false, ctx));
        }
        FormKind::Map(entries) => {
            assert!(!wrapped, "container probed: {}", form_to_string(form));
            for (k, v) in entries {
                check(k, false, ctx);
                check(v, false, ctx);
            }
        }
        FormKind::List(items) if !items.is_empty() => check_list(form, items, wrapped, ctx),
        FormKind::List(_) | FormKind::Tagged { .. } => {}
        _ => assert!(wrapped, "leaf {} not probed in {}", form_to_string(form), ctx),
    }
}

fn check_list(form: &Form, items: &[Form], wrapped: bool, ctx: &str) {
    let head = items[0].as_symbol();
    if head.is_some_and(is_stop_symbol) {
        return;
    }
    assert!(wrapped, "compound {} not probed in {}", form_to_string(form), ctx);
    let each = |forms: &[Form]| forms.iter().for_each(|f| check(f, false, ctx));
    match head {
        Some("let" | "let*") => {
            if let FormKind::Vector(bindings) = &items[1].kind {
                bindings.iter().skip(1).step_by(2).for_each(|v| check(v, false, ctx));
            }
            each(&items[2..]);
        }
        Some("def") => match &items[2..] {
            [init] | [_, init] => check(init, false, ctx),
            _ => {}
        },
        Some("new") => each(&items[2..]),
        Some(".") => match &items[2].kind {
            FormKind::List(call) if items.len() == 3 => each(&call[1..]),
            _ => each(&items[3..]),
        },
        Some("fn" | "fn*") => {
            let start = if items[1].as_symbol().is_some() { 2 } else { 1 };
            match &items[start].kind {
                FormKind::Vector(_) => each(&items[start + 1..]),
                _ => {
                    for group in &items[start..] {
                        each(&group.as_list().expect("overload")[1..]);
                    }
                }
            }
        }
        Some(special) if is_special_head(special) => each(&items[1..]),
        _ => each(items),
    }
}
