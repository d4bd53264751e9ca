//! Desugaring of compound forms the classifier does not recognize.
//!
//! Expansion is table driven: each [`Rule`] matches on the head symbol and
//! rewrites one form into core forms. The wrapper applies rules repeatedly
//! until the result is recognized or no rule matches.

use crate::ast::{Form, FormKind};
use crate::error::CoverError;
use crate::form_to_string::form_to_string;

#[derive(Clone, Copy, Debug)]
enum Head {
    Exact(&'static str),
    /// `(.method target args...)`
    MethodCall,
    /// `(Type. args...)`
    Constructor,
}

impl Head {
    fn matches(&self, sym: &str) -> bool {
        match self {
            Head::Exact(name) => *name == sym,
            Head::MethodCall => sym.len() > 1 && sym.starts_with('.') && !sym.starts_with(".."),
            Head::Constructor => sym.len() > 1 && sym.ends_with('.') && !sym.starts_with('.'),
        }
    }
}

type Expander = fn(&mut Normalizer, &Form, &[Form]) -> Result<Form, CoverError>;

pub struct Rule {
    pub name: &'static str,
    head: Head,
    expand: Expander,
}

static RULES: &[Rule] = &[
    Rule { name: "defn", head: Head::Exact("defn"), expand: expand_defn },
    Rule { name: "defn-", head: Head::Exact("defn-"), expand: expand_defn },
    Rule { name: "when", head: Head::Exact("when"), expand: expand_when },
    Rule { name: "when-not", head: Head::Exact("when-not"), expand: expand_when_not },
    Rule { name: "if-not", head: Head::Exact("if-not"), expand: expand_if_not },
    Rule { name: "cond", head: Head::Exact("cond"), expand: expand_cond },
    Rule { name: "and", head: Head::Exact("and"), expand: expand_and },
    Rule { name: "or", head: Head::Exact("or"), expand: expand_or },
    Rule { name: "->", head: Head::Exact("->"), expand: expand_thread_first },
    Rule { name: "->>", head: Head::Exact("->>"), expand: expand_thread_last },
    Rule { name: "if-let", head: Head::Exact("if-let"), expand: expand_if_let },
    Rule { name: "when-let", head: Head::Exact("when-let"), expand: expand_when_let },
    Rule { name: "comment", head: Head::Exact("comment"), expand: expand_comment },
    Rule { name: ".method", head: Head::MethodCall, expand: expand_method_call },
    Rule { name: "Type.", head: Head::Constructor, expand: expand_constructor },
];

pub fn rule_for(sym: &str) -> Option<&'static Rule> {
    RULES.iter().find(|rule| rule.head.matches(sym))
}

#[derive(Debug, Default)]
pub struct Normalizer {
    gensym_counter: usize,
}

impl Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// One expansion step; `None` when no rule applies to `form`.
    pub fn expand_once(&mut self, form: &Form) -> Result<Option<Form>, CoverError> {
        let Some(items) = form.as_list() else {
            return Ok(None);
        };
        let Some(rule) = form.head_symbol().and_then(rule_for) else {
            return Ok(None);
        };
        (rule.expand)(self, form, &items[1..]).map(Some)
    }

    fn gensym(&mut self, base: &str) -> Form {
        let id = self.gensym_counter;
        self.gensym_counter += 1;
        Form::symbol(format!("{}__{}__auto", base, id))
    }
}

fn sugar_error(form: &Form, msg: impl Into<String>) -> CoverError {
    CoverError::wrap(msg)
        .with_opt_span(form.span)
        .with_form(form_to_string(form))
}

fn list_with(head: &str, rest: impl IntoIterator<Item = Form>) -> Form {
    let mut items = vec![Form::symbol(head)];
    items.extend(rest);
    Form::list(items)
}

fn do_block(body: &[Form]) -> Form {
    match body {
        [single] => single.clone(),
        _ => list_with("do", body.iter().cloned()),
    }
}

fn expand_defn(_: &mut Normalizer, form: &Form, args: &[Form]) -> Result<Form, CoverError> {
    let Some(name) = args.first().filter(|f| f.as_symbol().is_some()) else {
        return Err(sugar_error(form, "defn requires a symbol name"));
    };
    let (doc, rest) = match &args[1..] {
        [doc @ Form { kind: FormKind::String(_), .. }, tail @ ..] if !tail.is_empty() => {
            (Some(doc.clone()), tail)
        }
        rest => (None, rest),
    };
    if rest.is_empty() {
        return Err(sugar_error(form, "defn requires a parameter vector or overloads"));
    }
    let mut fn_items = vec![Form::symbol("fn"), name.clone()];
    fn_items.extend(rest.iter().cloned());
    let mut def_items = vec![Form::symbol("def"), name.clone()];
    def_items.extend(doc);
    def_items.push(Form::list(fn_items));
    Ok(Form::list(def_items))
}

fn expand_when(_: &mut Normalizer, form: &Form, args: &[Form]) -> Result<Form, CoverError> {
    let Some((test, body)) = args.split_first() else {
        return Err(sugar_error(form, "when requires a test"));
    };
    Ok(list_with("if", [test.clone(), do_block(body)]))
}

fn expand_when_not(_: &mut Normalizer, form: &Form, args: &[Form]) -> Result<Form, CoverError> {
    let Some((test, body)) = args.split_first() else {
        return Err(sugar_error(form, "when-not requires a test"));
    };
    Ok(list_with("if", [test.clone(), Form::nil(), do_block(body)]))
}

fn expand_if_not(_: &mut Normalizer, form: &Form, args: &[Form]) -> Result<Form, CoverError> {
    match args {
        [test, then] => Ok(list_with("if", [test.clone(), Form::nil(), then.clone()])),
        [test, then, otherwise] => Ok(list_with(
            "if",
            [test.clone(), otherwise.clone(), then.clone()],
        )),
        _ => Err(sugar_error(form, "if-not expects 2 or 3 arguments")),
    }
}

fn expand_cond(_: &mut Normalizer, form: &Form, args: &[Form]) -> Result<Form, CoverError> {
    if args.len() % 2 != 0 {
        return Err(sugar_error(form, "cond requires an even number of forms"));
    }
    match args {
        [] => Ok(Form::nil()),
        [test, expr] => Ok(list_with("if", [test.clone(), expr.clone()])),
        [test, expr, rest @ ..] => Ok(list_with(
            "if",
            [test.clone(), expr.clone(), list_with("cond", rest.iter().cloned())],
        )),
        _ => unreachable!("odd clause counts are rejected above"),
    }
}

fn expand_and(norm: &mut Normalizer, _: &Form, args: &[Form]) -> Result<Form, CoverError> {
    match args {
        [] => Ok(Form::synthetic(FormKind::Bool(true))),
        [single] => Ok(single.clone()),
        [first, rest @ ..] => {
            let tmp = norm.gensym("and");
            let next = list_with("and", rest.iter().cloned());
            Ok(list_with(
                "let",
                [
                    Form::vector(vec![tmp.clone(), first.clone()]),
                    list_with("if", [tmp.clone(), next, tmp]),
                ],
            ))
        }
    }
}

fn expand_or(norm: &mut Normalizer, _: &Form, args: &[Form]) -> Result<Form, CoverError> {
    match args {
        [] => Ok(Form::nil()),
        [single] => Ok(single.clone()),
        [first, rest @ ..] => {
            let tmp = norm.gensym("or");
            let next = list_with("or", rest.iter().cloned());
            Ok(list_with(
                "let",
                [
                    Form::vector(vec![tmp.clone(), first.clone()]),
                    list_with("if", [tmp.clone(), tmp, next]),
                ],
            ))
        }
    }
}

fn thread(form: &Form, args: &[Form], last: bool) -> Result<Form, CoverError> {
    let Some((seed, steps)) = args.split_first() else {
        return Err(sugar_error(form, "threading requires an initial expression"));
    };
    let mut acc = seed.clone();
    for step in steps {
        acc = match step.as_list() {
            Some([head, rest @ ..]) => {
                let mut items = vec![head.clone()];
                if last {
                    items.extend(rest.iter().cloned());
                    items.push(acc);
                } else {
                    items.push(acc);
                    items.extend(rest.iter().cloned());
                }
                step.with_kind(FormKind::List(items))
            }
            _ => Form::list(vec![step.clone(), acc]),
        };
    }
    Ok(acc)
}

fn expand_thread_first(_: &mut Normalizer, form: &Form, args: &[Form]) -> Result<Form, CoverError> {
    thread(form, args, false)
}

fn expand_thread_last(_: &mut Normalizer, form: &Form, args: &[Form]) -> Result<Form, CoverError> {
    thread(form, args, true)
}

fn single_binding<'a>(form: &Form, args: &'a [Form], what: &str) -> Result<(&'a Form, &'a Form), CoverError> {
    match args.first().map(|f| &f.kind) {
        Some(FormKind::Vector(pair)) if pair.len() == 2 => Ok((&pair[0], &pair[1])),
        _ => Err(sugar_error(
            form,
            format!("{} requires a binding vector with exactly one binding", what),
        )),
    }
}

fn expand_if_let(norm: &mut Normalizer, form: &Form, args: &[Form]) -> Result<Form, CoverError> {
    if !(2..=3).contains(&args.len()) {
        return Err(sugar_error(form, "if-let expects a binding vector, then and optional else"));
    }
    let (target, expr) = single_binding(form, args, "if-let")?;
    let tmp = norm.gensym("if-let");
    let then = list_with(
        "let",
        [Form::vector(vec![target.clone(), tmp.clone()]), args[1].clone()],
    );
    let mut branch = vec![Form::symbol("if"), tmp.clone(), then];
    branch.extend(args.get(2).cloned());
    Ok(list_with(
        "let",
        [Form::vector(vec![tmp, expr.clone()]), Form::list(branch)],
    ))
}

fn expand_when_let(norm: &mut Normalizer, form: &Form, args: &[Form]) -> Result<Form, CoverError> {
    let (target, expr) = single_binding(form, args, "when-let")?;
    let tmp = norm.gensym("when-let");
    let mut inner = vec![Form::symbol("let"), Form::vector(vec![target.clone(), tmp.clone()])];
    inner.extend(args[1..].iter().cloned());
    Ok(list_with(
        "let",
        [
            Form::vector(vec![tmp.clone(), expr.clone()]),
            list_with("if", [tmp, Form::list(inner)]),
        ],
    ))
}

fn expand_comment(_: &mut Normalizer, _: &Form, _: &[Form]) -> Result<Form, CoverError> {
    Ok(Form::nil())
}

fn expand_method_call(_: &mut Normalizer, form: &Form, args: &[Form]) -> Result<Form, CoverError> {
    let method = form.head_symbol().unwrap_or_default().trim_start_matches('.');
    let Some((target, rest)) = args.split_first() else {
        return Err(sugar_error(form, format!(".{} requires a target", method)));
    };
    let call = list_with(method, rest.iter().cloned());
    Ok(list_with(".", [target.clone(), call]))
}

fn expand_constructor(_: &mut Normalizer, form: &Form, args: &[Form]) -> Result<Form, CoverError> {
    let ty = form.head_symbol().unwrap_or_default().trim_end_matches('.');
    Ok(list_with("new", std::iter::once(Form::symbol(ty)).chain(args.iter().cloned())))
}
