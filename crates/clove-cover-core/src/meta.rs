//! Out-of-band metadata for forms.
//!
//! Forms only hold a [`MetaId`]; the records live in a [`MetaTable`] owned by
//! the module pass. Rewrites never mutate a record in place: a changed record
//! is appended and the rewritten form points at the new id, so the reader's
//! view of a form stays intact for diagnostics.

use std::collections::BTreeMap;

use crate::ast::{Form, FormKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MetaId(u32);

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetaRecord {
    pub line: Option<usize>,
    pub attrs: BTreeMap<String, Form>,
    /// Form as it was before the rewrite that produced the owner.
    pub original: Option<Form>,
}

impl MetaRecord {
    pub fn with_line(line: usize) -> Self {
        Self {
            line: Some(line),
            ..Self::default()
        }
    }

    fn is_empty(&self) -> bool {
        self.line.is_none() && self.attrs.is_empty() && self.original.is_none()
    }
}

#[derive(Debug, Default)]
pub struct MetaTable {
    records: Vec<MetaRecord>,
}

impl MetaTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: MetaRecord) -> MetaId {
        let id = MetaId(self.records.len() as u32);
        self.records.push(record);
        id
    }

    pub fn get(&self, id: MetaId) -> Option<&MetaRecord> {
        self.records.get(id.0 as usize)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn record_of(&self, form: &Form) -> Option<&MetaRecord> {
        form.meta.and_then(|id| self.get(id))
    }

    /// The line recorded on the form itself, ignoring any enclosing hint.
    pub fn line_of(&self, form: &Form) -> Option<usize> {
        self.record_of(form).and_then(|record| record.line)
    }

    pub fn original_of(&self, form: &Form) -> Option<&Form> {
        self.record_of(form).and_then(|record| record.original.as_ref())
    }

    pub fn attrs_of(&self, form: &Form) -> Option<&BTreeMap<String, Form>> {
        self.record_of(form).map(|record| &record.attrs)
    }

    pub fn attr_of(&self, form: &Form, key: &str) -> Option<&Form> {
        self.attrs_of(form).and_then(|attrs| attrs.get(key))
    }

    fn attach(&mut self, form: Form, record: MetaRecord) -> Form {
        if record.is_empty() {
            return form.with_meta(None);
        }
        let id = self.insert(record);
        form.with_meta(Some(id))
    }
}

/// Records the most specific known line on every metadata-capable sub-form.
///
/// A form's own line wins over `hint` and becomes the hint for its children.
pub fn propagate_line(table: &mut MetaTable, hint: Option<usize>, form: Form) -> Form {
    let line = table.line_of(&form).or(hint);
    let Form { kind, span, meta } = form;
    let kind = match kind {
        FormKind::List(items) => FormKind::List(propagate_all(table, line, items)),
        FormKind::Vector(items) => FormKind::Vector(propagate_all(table, line, items)),
        FormKind::Set(items) => FormKind::Set(propagate_all(table, line, items)),
        FormKind::Map(entries) => FormKind::Map(
            entries
                .into_iter()
                .map(|(k, v)| (propagate_line(table, line, k), propagate_line(table, line, v)))
                .collect(),
        ),
        FormKind::Tagged { tag, form } => FormKind::Tagged {
            tag,
            form: Box::new(propagate_line(table, line, *form)),
        },
        other => other,
    };
    set_line(table, Form { kind, span, meta }, line)
}

fn propagate_all(table: &mut MetaTable, line: Option<usize>, items: Vec<Form>) -> Vec<Form> {
    items
        .into_iter()
        .map(|item| propagate_line(table, line, item))
        .collect()
}

fn set_line(table: &mut MetaTable, form: Form, line: Option<usize>) -> Form {
    if !form.kind.supports_meta() {
        return form;
    }
    let current = table.record_of(&form).cloned().unwrap_or_default();
    if current.line == line {
        return form;
    }
    let record = MetaRecord { line, ..current };
    table.attach(form, record)
}

/// Layers the original form's metadata onto its replacement.
///
/// Attributes from `original` win over those of `rewritten`, except the line:
/// the recomputed line of the replacement is kept, falling back to the
/// original's own line. The earliest known pre-rewrite form is attached as
/// provenance.
pub fn merge_provenance(table: &mut MetaTable, original: &Form, rewritten: Form) -> Form {
    if !rewritten.kind.supports_meta() {
        return rewritten;
    }
    let base = table.record_of(&rewritten).cloned().unwrap_or_default();
    let source = table.record_of(original).cloned().unwrap_or_default();
    let mut attrs = base.attrs;
    attrs.extend(source.attrs);
    let record = MetaRecord {
        line: base.line.or(source.line),
        attrs,
        original: Some(source.original.unwrap_or_else(|| original.clone())),
    };
    table.attach(rewritten, record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Span;

    fn sym_at(table: &mut MetaTable, name: &str, line: Option<usize>) -> Form {
        let form = Form::symbol(name);
        match line {
            Some(line) => {
                let id = table.insert(MetaRecord::with_line(line));
                form.with_meta(Some(id))
            }
            None => form,
        }
    }

    #[test]
    fn children_inherit_the_nearest_line() {
        let mut table = MetaTable::new();
        let inner = sym_at(&mut table, "x", None);
        let tagged = sym_at(&mut table, "y", Some(9));
        let list = Form::list(vec![inner, tagged]);
        let out = propagate_line(&mut table, Some(4), list);
        let items = out.as_list().unwrap();
        assert_eq!(table.line_of(&out), Some(4));
        assert_eq!(table.line_of(&items[0]), Some(4));
        assert_eq!(table.line_of(&items[1]), Some(9));
    }

    #[test]
    fn atoms_without_metadata_pass_through() {
        let mut table = MetaTable::new();
        let num = Form::new(FormKind::Int(1), Span { line: 3, col: 1, index: 0 });
        let out = propagate_line(&mut table, Some(7), num.clone());
        assert_eq!(out, num);
        assert!(table.is_empty());
    }

    #[test]
    fn unknown_line_leaves_no_record() {
        let mut table = MetaTable::new();
        let out = propagate_line(&mut table, None, Form::list(vec![Form::symbol("f")]));
        assert!(out.meta.is_none());
        assert!(table.line_of(&out).is_none());
    }

    #[test]
    fn merge_keeps_original_attrs_and_recomputed_line() {
        let mut table = MetaTable::new();
        let mut attrs = BTreeMap::new();
        attrs.insert("doc".to_string(), Form::synthetic(FormKind::String("orig".into())));
        let orig_id = table.insert(MetaRecord {
            line: Some(2),
            attrs,
            original: None,
        });
        let original = Form::list(vec![Form::symbol("when")]).with_meta(Some(orig_id));

        let mut rw_attrs = BTreeMap::new();
        rw_attrs.insert("doc".to_string(), Form::synthetic(FormKind::String("new".into())));
        rw_attrs.insert("extra".to_string(), Form::nil());
        let rw_id = table.insert(MetaRecord {
            line: Some(5),
            attrs: rw_attrs,
            original: None,
        });
        let rewritten = Form::list(vec![Form::symbol("if")]).with_meta(Some(rw_id));

        let merged = merge_provenance(&mut table, &original, rewritten);
        let record = table.record_of(&merged).unwrap();
        assert_eq!(record.line, Some(5));
        assert_eq!(
            record.attrs.get("doc").map(|f| &f.kind),
            Some(&FormKind::String("orig".into()))
        );
        assert!(table.attrs_of(&merged).is_some_and(|attrs| attrs.contains_key("extra")));
        assert_eq!(record.original.as_ref().and_then(Form::head_symbol), Some("when"));
    }

    #[test]
    fn merge_falls_back_to_original_line_and_earliest_original() {
        let mut table = MetaTable::new();
        let first = Form::list(vec![Form::symbol("cond")]);
        let first_id = table.insert(MetaRecord::with_line(11));
        let first = first.with_meta(Some(first_id));
        let step = merge_provenance(&mut table, &first, Form::list(vec![Form::symbol("if")]));
        let last = merge_provenance(&mut table, &step, Form::list(vec![Form::symbol("let")]));
        assert_eq!(table.line_of(&last), Some(11));
        assert_eq!(
            table.original_of(&last).and_then(Form::head_symbol),
            Some("cond")
        );
    }
}
