use crate::ast::{Form, FormKind};

pub fn escape_string_fragment(text: &str) -> String {
    let escaped = format!("{:?}", text);
    escaped[1..escaped.len() - 1].to_string()
}

/// Render a form back into reader syntax.
pub fn form_to_string(form: &Form) -> String {
    match &form.kind {
        FormKind::Symbol(s) => s.clone(),
        FormKind::Keyword(k) => format!(":{}", k),
        FormKind::Int(n) => n.to_string(),
        FormKind::Float(n) => format!("{:?}", n),
        FormKind::String(s) => format!("\"{}\"", escape_string_fragment(s)),
        FormKind::Bool(b) => b.to_string(),
        FormKind::Nil => "nil".into(),
        FormKind::List(items) => format!("({})", join_forms(items)),
        FormKind::Vector(items) => format!("[{}]", join_forms(items)),
        FormKind::Set(items) => format!("#{{{}}}", join_forms(items)),
        FormKind::Map(entries) => {
            let parts: Vec<String> = entries
                .iter()
                .map(|(k, v)| format!("{} {}", form_to_string(k), form_to_string(v)))
                .collect();
            format!("{{{}}}", parts.join(" "))
        }
        FormKind::Tagged { tag, form } => format!("#{} {}", tag, form_to_string(form)),
    }
}

pub fn forms_to_string(forms: &[Form]) -> String {
    let mut out = String::new();
    for form in forms {
        out.push_str(&form_to_string(form));
        out.push('\n');
    }
    out
}

fn join_forms(items: &[Form]) -> String {
    items
        .iter()
        .map(form_to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::read_str;

    #[test]
    fn prints_reader_syntax() {
        let (forms, _) = read_str(r#"(def m {:a [1 2.5 "x\n"] :b #{nil}}) 'sym #inst "2020""#)
            .expect("read");
        let printed: Vec<String> = forms.iter().map(form_to_string).collect();
        assert_eq!(
            printed,
            vec![
                r#"(def m {:a [1 2.5 "x\n"] :b #{nil}})"#.to_string(),
                "(quote sym)".to_string(),
                r#"#inst "2020""#.to_string(),
            ]
        );
    }
}
