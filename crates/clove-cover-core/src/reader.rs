use std::collections::BTreeMap;

use crate::ast::{Form, FormKind, Span};
use crate::error::CoverError;
use crate::form_to_string::form_to_string;
use crate::meta::{MetaRecord, MetaTable};

#[derive(Clone, Debug)]
pub struct ReaderOptions {
    pub source_name: Option<String>,
    pub start_line: usize,
    pub start_col: usize,
}

impl ReaderOptions {
    pub fn with_source_name(mut self, name: Option<String>) -> Self {
        self.source_name = name;
        self
    }
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            source_name: None,
            start_line: 1,
            start_col: 1,
        }
    }
}

/// Reads Clove source one top-level form at a time.
///
/// Every metadata-capable form gets a record in the caller's [`MetaTable`]
/// carrying its starting line plus any `^` reader metadata.
pub struct Reader {
    chars: Vec<char>,
    index: usize,
    line: usize,
    col: usize,
    pub options: ReaderOptions,
}

impl Reader {
    pub fn new(source: &str) -> Self {
        Self::new_with_options(source, ReaderOptions::default())
    }

    pub fn new_with_options(source: &str, mut options: ReaderOptions) -> Self {
        if options.start_line == 0 {
            options.start_line = 1;
        }
        if options.start_col == 0 {
            options.start_col = 1;
        }
        Self {
            chars: source.chars().collect(),
            index: 0,
            line: options.start_line,
            col: options.start_col,
            options,
        }
    }

    /// Next top-level form, or `None` once only whitespace and comments remain.
    pub fn read_next(&mut self, table: &mut MetaTable) -> Result<Option<Form>, CoverError> {
        self.skip_ws_and_comments();
        while self.at_discard() {
            self.skip_discarded(table)?;
        }
        if self.eof() {
            return Ok(None);
        }
        self.read_form(table).map(Some)
    }

    pub fn read_all(&mut self, table: &mut MetaTable) -> Result<Vec<Form>, CoverError> {
        let mut forms = Vec::new();
        while let Some(form) = self.read_next(table)? {
            forms.push(form);
        }
        Ok(forms)
    }

    fn read_form(&mut self, table: &mut MetaTable) -> Result<Form, CoverError> {
        self.skip_ws_and_comments();
        if self.eof() {
            return self.parse_err("unexpected end of input");
        }
        let span = self.current_span();
        let form = match self.current_char() {
            '\'' => self.read_quote_form(span, table)?,
            '^' => return self.read_meta_form(span, table),
            '(' => self.read_seq(span, ')', "list", table).map(|items| {
                Form::new(FormKind::List(items), span)
            })?,
            '[' => self.read_seq(span, ']', "vector", table).map(|items| {
                Form::new(FormKind::Vector(items), span)
            })?,
            '{' => self.read_map(span, table)?,
            '#' => return self.read_dispatch(span, table),
            '"' => self.read_string(span)?,
            ':' => self.read_keyword(span)?,
            ch if ch == ')' || ch == ']' || ch == '}' => {
                return self.parse_err(format!("unexpected closing delimiter '{}'", ch))
            }
            _ => self.read_atom(span)?,
        };
        Ok(attach_line(table, form))
    }

    fn read_seq(
        &mut self,
        start: Span,
        close: char,
        what: &str,
        table: &mut MetaTable,
    ) -> Result<Vec<Form>, CoverError> {
        self.advance(); // opening delimiter
        let mut items = Vec::new();
        self.skip_ws_and_comments();
        while !self.eof() && self.current_char() != close {
            if self.at_discard() {
                self.skip_discarded(table)?;
                continue;
            }
            items.push(self.read_form(table)?);
            self.skip_ws_and_comments();
        }
        if self.eof() {
            return self.parse_err_at(start, format!("unterminated {}", what));
        }
        self.advance(); // closing delimiter
        Ok(items)
    }

    fn read_map(&mut self, start: Span, table: &mut MetaTable) -> Result<Form, CoverError> {
        let items = self.read_seq(start, '}', "map", table)?;
        if items.len() % 2 != 0 {
            return self.parse_err_at(start, "map literal must contain an even number of forms");
        }
        let mut entries = Vec::with_capacity(items.len() / 2);
        let mut iter = items.into_iter();
        while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
            entries.push((k, v));
        }
        Ok(Form::new(FormKind::Map(entries), start))
    }

    fn read_dispatch(&mut self, start: Span, table: &mut MetaTable) -> Result<Form, CoverError> {
        self.advance(); // consume '#'
        if self.eof() {
            return self.parse_err("expected dispatch character after #");
        }
        match self.current_char() {
            '{' => {
                let items = self.read_seq(start, '}', "set", table)?;
                return Ok(attach_line(table, Form::new(FormKind::Set(items), start)));
            }
            '_' => {
                self.advance(); // consume '_'
                self.read_form(table)?; // read and discard
                return self.read_form(table);
            }
            _ => {}
        }
        let mut tag = String::new();
        while !self.eof() && !is_delimiter(self.current_char()) {
            tag.push(self.current_char());
            self.advance();
        }
        if tag.is_empty() {
            return self.parse_err("expected tag name after #");
        }
        let inner = self.read_form(table)?;
        Ok(Form::new(
            FormKind::Tagged {
                tag,
                form: Box::new(inner),
            },
            start,
        ))
    }

    fn read_quote_form(&mut self, start: Span, table: &mut MetaTable) -> Result<Form, CoverError> {
        self.advance(); // '\''
        let quoted = self.read_form(table)?;
        let quote_symbol = attach_line(table, Form::new(FormKind::Symbol("quote".into()), start));
        Ok(Form::new(FormKind::List(vec![quote_symbol, quoted]), start))
    }

    fn read_meta_form(&mut self, start: Span, table: &mut MetaTable) -> Result<Form, CoverError> {
        self.advance(); // '^'
        let meta_form = self.read_form(table)?;
        let attrs = match &meta_form.kind {
            FormKind::Map(entries) => entries
                .iter()
                .map(|(k, v)| (attr_key(k), v.clone()))
                .collect::<BTreeMap<_, _>>(),
            FormKind::Keyword(k) => {
                BTreeMap::from([(k.clone(), Form::new(FormKind::Bool(true), start))])
            }
            FormKind::Symbol(_) | FormKind::String(_) => {
                BTreeMap::from([("tag".to_string(), meta_form.clone())])
            }
            _ => return self.parse_err_at(start, "metadata must be a map, keyword, symbol or string"),
        };
        let target = self.read_form(table)?;
        if !target.kind.supports_meta() {
            return self.parse_err_at(
                start,
                format!("metadata cannot be applied to a {}", target.kind.type_name()),
            );
        }
        let mut record = table.record_of(&target).cloned().unwrap_or_default();
        record.attrs.extend(attrs);
        let id = table.insert(record);
        Ok(target.with_meta(Some(id)))
    }

    fn read_string(&mut self, start: Span) -> Result<Form, CoverError> {
        self.advance(); // "
        let mut buf = String::new();
        while !self.eof() {
            let ch = self.current_char();
            match ch {
                '"' => {
                    self.advance();
                    return Ok(Form::new(FormKind::String(buf), start));
                }
                '\\' => {
                    self.advance();
                    if self.eof() {
                        return self.parse_err("unterminated escape");
                    }
                    let real = match self.current_char() {
                        'n' => '\n',
                        'r' => '\r',
                        't' => '\t',
                        '0' => '\0',
                        other => other,
                    };
                    buf.push(real);
                    self.advance();
                }
                _ => {
                    buf.push(ch);
                    self.advance();
                }
            }
        }
        self.parse_err_at(start, "unterminated string")
    }

    fn read_keyword(&mut self, start: Span) -> Result<Form, CoverError> {
        self.advance(); // :
        let mut buf = String::new();
        while !self.eof() && !is_delimiter(self.current_char()) {
            buf.push(self.current_char());
            self.advance();
        }
        if buf.is_empty() {
            return self.parse_err_at(start, "keyword must have a name");
        }
        Ok(Form::new(FormKind::Keyword(buf), start))
    }

    fn read_atom(&mut self, start: Span) -> Result<Form, CoverError> {
        let mut buf = String::new();
        while !self.eof() && !is_delimiter(self.current_char()) {
            buf.push(self.current_char());
            self.advance();
        }
        let kind = match buf.as_str() {
            "nil" => FormKind::Nil,
            "true" => FormKind::Bool(true),
            "false" => FormKind::Bool(false),
            _ => match parse_number(&buf) {
                Some(kind) => kind,
                None => {
                    if buf.starts_with(|c: char| c.is_ascii_digit()) {
                        return self.parse_err_at(start, format!("invalid number: {}", buf));
                    }
                    FormKind::Symbol(buf)
                }
            },
        };
        Ok(Form::new(kind, start))
    }

    fn at_discard(&self) -> bool {
        self.chars.get(self.index) == Some(&'#') && self.chars.get(self.index + 1) == Some(&'_')
    }

    /// Consumes `#_` and the form after it, plus trailing whitespace.
    fn skip_discarded(&mut self, table: &mut MetaTable) -> Result<(), CoverError> {
        self.advance();
        self.advance();
        self.read_form(table)?;
        self.skip_ws_and_comments();
        Ok(())
    }

    fn skip_ws_and_comments(&mut self) {
        while !self.eof() {
            let ch = self.current_char();
            if is_ws_or_comma(ch) {
                self.advance();
            } else if ch == ';' {
                while !self.eof() && self.current_char() != '\n' {
                    self.advance();
                }
            } else {
                break;
            }
        }
    }

    fn advance(&mut self) {
        if let Some(&ch) = self.chars.get(self.index) {
            self.index += 1;
            if ch == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
    }

    fn current_char(&self) -> char {
        self.chars[self.index]
    }

    fn current_span(&self) -> Span {
        Span {
            line: self.line,
            col: self.col,
            index: self.index,
        }
    }

    pub fn eof(&self) -> bool {
        self.index >= self.chars.len()
    }

    fn parse_err<T>(&self, msg: impl Into<String>) -> Result<T, CoverError> {
        self.parse_err_at(self.current_span(), msg)
    }

    fn parse_err_at<T>(&self, span: Span, msg: impl Into<String>) -> Result<T, CoverError> {
        let file_label = self.options.source_name.as_deref().unwrap_or("unknown");
        let formatted = format!("{}:{}:{} {}", file_label, span.line, span.col, msg.into());
        Err(CoverError::parse(formatted).with_span(span))
    }
}

/// Reads a whole source string into forms and the metadata they refer to.
pub fn read_str(source: &str) -> Result<(Vec<Form>, MetaTable), CoverError> {
    let mut table = MetaTable::new();
    let forms = Reader::new(source).read_all(&mut table)?;
    Ok((forms, table))
}

fn attach_line(table: &mut MetaTable, form: Form) -> Form {
    match form.span {
        Some(span) if form.kind.supports_meta() && form.meta.is_none() => {
            let id = table.insert(MetaRecord::with_line(span.line));
            form.with_meta(Some(id))
        }
        _ => form,
    }
}

fn attr_key(form: &Form) -> String {
    match &form.kind {
        FormKind::Keyword(k) => k.clone(),
        _ => form_to_string(form),
    }
}

fn parse_number(token: &str) -> Option<FormKind> {
    let digits = token.strip_prefix(['-', '+']).unwrap_or(token);
    if !digits.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    let normalized: String = token.chars().filter(|c| *c != '_').collect();
    if let Ok(n) = normalized.parse::<i64>() {
        return Some(FormKind::Int(n));
    }
    normalized.parse::<f64>().ok().map(FormKind::Float)
}

fn is_ws_or_comma(ch: char) -> bool {
    ch.is_whitespace() || ch == ','
}

fn is_delimiter(ch: char) -> bool {
    is_ws_or_comma(ch) || matches!(ch, '(' | ')' | '[' | ']' | '{' | '}' | '"' | ';')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_are_recorded_on_capable_forms() {
        let (forms, table) = read_str("(foo\n  bar\n  12)").expect("read");
        let items = forms[0].as_list().unwrap();
        assert_eq!(table.line_of(&forms[0]), Some(1));
        assert_eq!(table.line_of(&items[1]), Some(2));
        assert_eq!(table.line_of(&items[2]), None);
        assert_eq!(items[2].span.map(|s| s.line), Some(3));
    }

    #[test]
    fn reads_one_form_at_a_time() {
        let mut table = MetaTable::new();
        let mut reader = Reader::new("(def a 1) ; trailing\n(def b 2)\n");
        let first = reader.read_next(&mut table).unwrap().unwrap();
        assert_eq!(first.as_list().map(|items| items.len()), Some(3));
        assert!(reader.read_next(&mut table).unwrap().is_some());
        assert!(reader.read_next(&mut table).unwrap().is_none());
    }

    #[test]
    fn reader_metadata_is_stored_in_the_table() {
        let (forms, table) = read_str("^{:doc \"adds\"} (f 1) ^:private x").expect("read");
        assert_eq!(
            table.attr_of(&forms[0], "doc").map(|f| &f.kind),
            Some(&FormKind::String("adds".into()))
        );
        assert_eq!(table.line_of(&forms[0]), Some(1));
        assert_eq!(
            table.attr_of(&forms[1], "private").map(|f| &f.kind),
            Some(&FormKind::Bool(true))
        );
    }

    #[test]
    fn metadata_on_atoms_is_rejected() {
        let err = read_str("^:flag 42").expect_err("metadata on int");
        assert!(err.to_string().contains("cannot be applied to a int"), "{}", err);
    }

    #[test]
    fn literals_and_dispatch() {
        let (forms, _) = read_str("-3 2.5 :k \"s\" nil true #{1} #_ skipped #uuid \"u\"").unwrap();
        let kinds: Vec<&FormKind> = forms.iter().map(|f| &f.kind).collect();
        assert_eq!(kinds[0], &FormKind::Int(-3));
        assert_eq!(kinds[1], &FormKind::Float(2.5));
        assert_eq!(kinds[2], &FormKind::Keyword("k".into()));
        assert_eq!(kinds[3], &FormKind::String("s".into()));
        assert_eq!(kinds[4], &FormKind::Nil);
        assert_eq!(kinds[5], &FormKind::Bool(true));
        assert!(matches!(kinds[6], FormKind::Set(items) if items.len() == 1));
        assert!(matches!(kinds[7], FormKind::Tagged { tag, .. } if tag == "uuid"));
        assert_eq!(forms.len(), 8);
    }

    #[test]
    fn discarded_forms_leave_no_trace() {
        let (forms, _) = read_str("(f #_ (g) x #_ y) #_ z").unwrap();
        assert_eq!(forms.len(), 1);
        assert_eq!(form_to_string(&forms[0]), "(f x)");
    }

    #[test]
    fn unterminated_list_reports_position() {
        let err = Reader::new_with_options(
            "\n  (foo [1 2]",
            ReaderOptions::default().with_source_name(Some("app/core.clv".into())),
        )
        .read_all(&mut MetaTable::new())
        .expect_err("unterminated");
        assert!(err.to_string().contains("app/core.clv:2:3 unterminated list"), "{}", err);
    }
}
