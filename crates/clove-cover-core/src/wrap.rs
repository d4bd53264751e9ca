//! Recursive probe insertion.
//!
//! [`Wrapper::wrap`] dispatches on [`classify`] and rebuilds the form with
//! every reachable leaf and compound result wrapped in exactly one probe
//! call. Every replacement goes through the metadata propagator so probes
//! report the line of the source form they stand for.

use crate::ast::{Form, FormKind};
use crate::classify::{classify, is_special_head, Label};
use crate::driver::current_module;
use crate::error::CoverError;
use crate::form_to_string::form_to_string;
use crate::meta::{merge_provenance, propagate_line, MetaTable};
use crate::normalize::Normalizer;
use crate::probe::Probe;
use tracing::{trace, warn};

/// Upper bound on consecutive desugaring steps applied to one form.
pub const MAX_EXPANSIONS: usize = 64;

pub struct Wrapper<'a> {
    probe: &'a mut dyn Probe,
    table: &'a mut MetaTable,
    normalizer: Normalizer,
    strict: bool,
}

impl<'a> Wrapper<'a> {
    pub fn new(probe: &'a mut dyn Probe, table: &'a mut MetaTable) -> Self {
        Self {
            probe,
            table,
            normalizer: Normalizer::new(),
            strict: false,
        }
    }

    /// Reject unclassified forms instead of passing them through.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn wrap(&mut self, hint: Option<usize>, form: Form) -> Result<Form, CoverError> {
        let line = self.table.line_of(&form).or(hint);
        let label = classify(&form);
        trace!(%label, ?line, "wrapping form");
        match label {
            Label::Stop => Ok(form),
            Label::Atomic => {
                let probed = self.probe.probe(self.table, line, form.clone());
                Ok(self.finish(line, &form, probed))
            }
            Label::Structural => self.wrap_structural(line, form),
            Label::Binding => self.wrap_binding(line, form),
            Label::Definition => self.wrap_definition(line, form),
            Label::ConstructorCall => self.wrap_constructor(line, form),
            Label::MemberAccess => self.wrap_member_access(line, form),
            Label::Function => self.wrap_function(line, form),
            Label::Compound => self.wrap_compound(line, form),
            Label::Default => self.pass_unclassified(form),
        }
    }

    fn wrap_all(&mut self, line: Option<usize>, forms: &[Form]) -> Result<Vec<Form>, CoverError> {
        forms
            .iter()
            .map(|form| self.wrap(line, form.clone()))
            .collect()
    }

    /// Line and provenance for a replacement of `original`.
    fn finish(&mut self, line: Option<usize>, original: &Form, rewritten: Form) -> Form {
        let rewritten = propagate_line(self.table, line, rewritten);
        merge_provenance(self.table, original, rewritten)
    }

    /// Finishes a rebuilt form and wraps it in a probe call.
    fn emit(&mut self, line: Option<usize>, original: &Form, rebuilt: Form) -> Form {
        let rebuilt = self.finish(line, original, rebuilt);
        let probed = self.probe.probe(self.table, line, rebuilt);
        self.finish(line, original, probed)
    }

    fn fail(&self, form: &Form, msg: impl Into<String>) -> CoverError {
        CoverError::wrap(msg)
            .with_opt_span(form.span)
            .with_form(form_to_string(form))
    }

    fn wrap_structural(&mut self, line: Option<usize>, form: Form) -> Result<Form, CoverError> {
        let kind = match &form.kind {
            FormKind::Vector(items) => FormKind::Vector(self.wrap_all(line, items)?),
            FormKind::Set(items) => FormKind::Set(self.wrap_all(line, items)?),
            FormKind::Map(entries) => FormKind::Map(
                entries
                    .iter()
                    .map(|(k, v)| Ok((self.wrap(line, k.clone())?, self.wrap(line, v.clone())?)))
                    .collect::<Result<Vec<_>, CoverError>>()?,
            ),
            _ => return Ok(form),
        };
        let rebuilt = form.with_kind(kind);
        Ok(self.finish(line, &form, rebuilt))
    }

    fn wrap_binding(&mut self, line: Option<usize>, form: Form) -> Result<Form, CoverError> {
        let items = form.as_list().unwrap_or_default();
        let head = &items[0];
        let Some(bindings_form) = items.get(1) else {
            return Err(self.fail(&form, format!("{} requires a binding vector", form_head(&form))));
        };
        let FormKind::Vector(bindings) = &bindings_form.kind else {
            return Err(self.fail(
                &form,
                format!("{} bindings must be a vector", form_head(&form)),
            ));
        };
        if bindings.len() % 2 != 0 {
            return Err(self.fail(
                &form,
                format!(
                    "{} requires an even number of forms in the binding vector",
                    form_head(&form)
                ),
            ));
        }
        let mut wrapped_bindings = Vec::with_capacity(bindings.len());
        for pair in bindings.chunks(2) {
            wrapped_bindings.push(pair[0].clone());
            wrapped_bindings.push(self.wrap(line, pair[1].clone())?);
        }
        let bindings_out = bindings_form.with_kind(FormKind::Vector(wrapped_bindings));
        let bindings_out = self.finish(line, bindings_form, bindings_out);
        let mut out = vec![head.clone(), bindings_out];
        out.extend(self.wrap_all(line, &items[2..])?);
        let rebuilt = form.with_kind(FormKind::List(out));
        Ok(self.emit(line, &form, rebuilt))
    }

    fn wrap_definition(&mut self, line: Option<usize>, form: Form) -> Result<Form, CoverError> {
        let items = form.as_list().unwrap_or_default();
        let Some(name) = items.get(1).filter(|name| name.as_symbol().is_some()) else {
            return Err(self.fail(&form, "def requires a symbol name"));
        };
        let mut out = vec![items[0].clone(), name.clone()];
        match &items[2..] {
            [] => {}
            [init] => out.push(self.wrap(line, init.clone())?),
            [doc @ Form { kind: FormKind::String(_), .. }, init] => {
                out.push(doc.clone());
                out.push(self.wrap(line, init.clone())?);
            }
            _ => {
                return Err(self.fail(
                    &form,
                    "def expects a name, an optional docstring and an initializer",
                ))
            }
        }
        let rebuilt = form.with_kind(FormKind::List(out));
        Ok(self.emit(line, &form, rebuilt))
    }

    fn wrap_constructor(&mut self, line: Option<usize>, form: Form) -> Result<Form, CoverError> {
        let items = form.as_list().unwrap_or_default();
        if items.len() < 2 {
            return Err(self.fail(&form, "new requires a type"));
        }
        let mut out = vec![items[0].clone(), items[1].clone()];
        out.extend(self.wrap_all(line, &items[2..])?);
        let rebuilt = form.with_kind(FormKind::List(out));
        Ok(self.emit(line, &form, rebuilt))
    }

    fn wrap_member_access(&mut self, line: Option<usize>, form: Form) -> Result<Form, CoverError> {
        let items = form.as_list().unwrap_or_default();
        let (Some(target), Some(selector)) = (items.get(1), items.get(2)) else {
            return Err(self.fail(&form, "member access requires a target and a selector"));
        };
        let mut out = vec![items[0].clone(), target.clone()];
        match &selector.kind {
            FormKind::List(call) if items.len() == 3 => {
                let Some((method, args)) = call.split_first().filter(|(m, _)| m.as_symbol().is_some())
                else {
                    return Err(self.fail(&form, "member call must start with a method name"));
                };
                let mut call_out = vec![method.clone()];
                call_out.extend(self.wrap_all(line, args)?);
                let call_out = selector.with_kind(FormKind::List(call_out));
                out.push(self.finish(line, selector, call_out));
            }
            FormKind::Symbol(_) => {
                out.push(selector.clone());
                out.extend(self.wrap_all(line, &items[3..])?);
            }
            _ => {
                return Err(self.fail(
                    &form,
                    "member selector must be a symbol or a method call",
                ))
            }
        }
        let rebuilt = form.with_kind(FormKind::List(out));
        Ok(self.emit(line, &form, rebuilt))
    }

    fn wrap_function(&mut self, line: Option<usize>, form: Form) -> Result<Form, CoverError> {
        let items = form.as_list().unwrap_or_default();
        let mut out = vec![items[0].clone()];
        let mut idx = 1;
        if let Some(name) = items.get(1).filter(|f| f.as_symbol().is_some()) {
            out.push(name.clone());
            idx = 2;
        }
        let groups = &items[idx..];
        match groups.first().map(|f| &f.kind) {
            None => {
                return Err(self.fail(&form, "fn requires a parameter vector or overloads"));
            }
            Some(FormKind::Vector(_)) => {
                out.push(groups[0].clone());
                out.extend(self.wrap_all(line, &groups[1..])?);
            }
            Some(_) => {
                for group in groups {
                    out.push(self.wrap_overload(line, &form, group)?);
                }
            }
        }
        let rebuilt = form.with_kind(FormKind::List(out));
        Ok(self.emit(line, &form, rebuilt))
    }

    fn wrap_overload(
        &mut self,
        hint: Option<usize>,
        enclosing: &Form,
        group: &Form,
    ) -> Result<Form, CoverError> {
        let params_ok = matches!(
            group.as_list().and_then(|items| items.first()).map(|f| &f.kind),
            Some(FormKind::Vector(_))
        );
        if !params_ok {
            return Err(CoverError::wrap(format!(
                "malformed overload {} in {}: expected ([params] body...)",
                form_to_string(group),
                form_to_string(enclosing)
            ))
            .with_opt_span(group.span.or(enclosing.span))
            .with_form(form_to_string(enclosing)));
        }
        let items = group.as_list().unwrap_or_default();
        let line = self.table.line_of(group).or(hint);
        let mut out = vec![items[0].clone()];
        out.extend(self.wrap_all(line, &items[1..])?);
        let rebuilt = group.with_kind(FormKind::List(out));
        Ok(self.finish(line, group, rebuilt))
    }

    fn wrap_compound(&mut self, line: Option<usize>, form: Form) -> Result<Form, CoverError> {
        let mut current = form.clone();
        let mut steps = 0;
        while let Some(expanded) = self.normalizer.expand_once(&current)? {
            steps += 1;
            if steps > MAX_EXPANSIONS {
                return Err(self.fail(
                    &form,
                    format!("desugaring did not settle after {} steps", MAX_EXPANSIONS),
                ));
            }
            let expanded = propagate_line(self.table, line, expanded);
            current = merge_provenance(self.table, &form, expanded);
            if classify(&current) != Label::Compound {
                let wrapped = self.wrap(line, current)?;
                return Ok(merge_provenance(self.table, &form, wrapped));
            }
        }
        let items = current.as_list().unwrap_or_default();
        let mut out = Vec::with_capacity(items.len());
        for (idx, item) in items.iter().enumerate() {
            if idx == 0 && item.as_symbol().is_some_and(is_special_head) {
                out.push(item.clone());
            } else {
                out.push(self.wrap(line, item.clone())?);
            }
        }
        let rebuilt = current.with_kind(FormKind::List(out));
        Ok(self.emit(line, &form, rebuilt))
    }

    fn pass_unclassified(&mut self, form: Form) -> Result<Form, CoverError> {
        let text = form_to_string(&form);
        if self.strict {
            return Err(CoverError::unclassified(format!(
                "{} matches no known category",
                form.kind.type_name()
            ))
            .with_opt_span(form.span)
            .with_form(text));
        }
        warn!(
            module = current_module().as_deref().unwrap_or("unknown"),
            form = %text,
            "form matches no known category; coverage for it is skipped"
        );
        Ok(form)
    }
}

fn form_head(form: &Form) -> &str {
    form.head_symbol().unwrap_or("form")
}
