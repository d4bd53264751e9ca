use std::fs;
use std::path::Path;

use clove_cover_core::apply_project_config;
use clove_cover_core::ast::Value;
use clove_cover_core::driver::{current_module, Driver};
use clove_cover_core::error::{format_error, CoverError};
use clove_cover_core::options::CoverOptions;
use clove_cover_core::probe::{lock_store, CAPTURE_SYM};
use tempfile::tempdir;

fn write_module(root: &Path, relative: &str, source: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(path, source).expect("write module");
}

fn options_for(root: &Path) -> CoverOptions {
    CoverOptions::default()
        .with_source_root(root)
        .with_strict(false)
        .with_dump_dir(None)
}

#[test]
fn instruments_module_from_source_root() {
    let dir = tempdir().expect("tempdir");
    write_module(
        dir.path(),
        "app/string_utils.clv",
        "(ns app.string-utils)\n(defn shout [s] (str (.toUpperCase s) \"!\"))\n(shout \"hi\")\n",
    );
    let driver = Driver::new(options_for(dir.path()));
    let output = driver.instrument_module("app.string-utils").expect("instrument");
    assert_eq!(output.module, "app.string-utils");
    assert_eq!(output.forms.len(), 3);
    assert_eq!(output.values[2], Value::String("HI!".into()));
    assert_eq!(
        output.path.as_deref(),
        Some(dir.path().join("app").join("string_utils.clv").as_path())
    );
    assert_eq!(driver.evaluator().current_ns(), "app.string-utils");
    let store = driver.store();
    let store = lock_store(&store);
    assert!(store.module_sites("app.string-utils").count() > 0);
    assert!(store.sites().iter().all(|site| site.line.is_some()));
    assert_eq!(current_module(), None);
}

#[test]
fn later_roots_are_searched_in_order() {
    let dir = tempdir().expect("tempdir");
    write_module(&dir.path().join("second"), "lib.clv", "(def where :second)");
    let mut options = options_for(&dir.path().join("first"));
    options.source_roots.push(dir.path().join("second"));
    let driver = Driver::new(options);
    let output = driver.instrument_module("lib").expect("instrument");
    assert_eq!(output.values, vec![Value::Keyword("second".into())]);
}

#[test]
fn writes_debug_dump_keyed_by_module() {
    let dir = tempdir().expect("tempdir");
    write_module(dir.path(), "app/core.clv", "(def a (+ 1 2))\n(inc a)");
    let dump = dir.path().join("dump");
    let driver = Driver::new(options_for(dir.path()).with_dump_dir(Some(dump.clone())));
    driver.instrument_module("app.core").expect("instrument");
    let text = fs::read_to_string(dump.join("app.core.clv")).expect("dump written");
    assert_eq!(text.lines().count(), 2);
    assert!(text.contains(CAPTURE_SYM));
    assert!(text.starts_with(&format!("({} 1 4 (def a", CAPTURE_SYM)), "{}", text);
}

#[test]
fn invalid_module_is_rejected_before_reading() {
    let driver = Driver::new(options_for(Path::new("/nonexistent")));
    for id in ["", "1app", "app..core", "app/core"] {
        let err = driver.instrument_module(id).expect_err(id);
        assert!(matches!(err, CoverError::InvalidModule(_)), "{}: {}", id, err);
    }
    let err = driver.instrument_source("bad id", "(+ 1 2)").expect_err("invalid");
    assert!(matches!(err, CoverError::InvalidModule(_)));
    assert!(lock_store(&driver.store()).sites().is_empty());
}

#[test]
fn missing_module_reports_searched_roots() {
    let dir = tempdir().expect("tempdir");
    let driver = Driver::new(options_for(dir.path()));
    let err = driver.instrument_module("app.missing").expect_err("missing");
    assert!(matches!(err, CoverError::Io(_)));
    assert!(err.to_string().contains("missing.clv"), "{}", err);
    assert_eq!(err.module(), Some("app.missing"));
}

#[test]
fn evaluation_failure_carries_original_and_rewritten_text() {
    let driver = Driver::new(options_for(Path::new(".")));
    let err = driver
        .instrument_source("app.core", "(def a 1)\n(+ a undefined-thing)")
        .expect_err("eval failure");
    let CoverError::Eval {
        original,
        rewritten,
        message,
        ..
    } = &err
    else {
        panic!("expected eval error, got {:?}", err);
    };
    assert_eq!(original, "(+ a undefined-thing)");
    assert!(rewritten.contains(CAPTURE_SYM), "{}", rewritten);
    assert!(message.contains("undefined-thing"), "{}", message);
    assert_eq!(err.module(), Some("app.core"));
    assert_eq!(err.span().map(|span| span.line), Some(2));
    let lines = format_error(&err);
    assert!(lines.iter().any(|line| line.contains("original:")));
    assert!(lines.iter().any(|line| line.contains("rewritten:")));
}

#[test]
fn wrap_failure_stops_the_module() {
    let driver = Driver::new(options_for(Path::new(".")));
    let err = driver
        .instrument_source("app.core", "(def a 1)\n(let [x] x)\n(def b 2)")
        .expect_err("wrap failure");
    assert!(matches!(err, CoverError::Wrap(_)), "{:?}", err);
    assert_eq!(err.form(), Some("(let [x] x)"));
    assert_eq!(err.span().map(|span| span.line), Some(2));
    assert_eq!(driver.evaluator().lookup_global("a"), Some(Value::Int(1)));
    assert_eq!(driver.evaluator().lookup_global("b"), None);
}

#[test]
fn parse_failure_names_the_module() {
    let driver = Driver::new(options_for(Path::new(".")));
    let err = driver
        .instrument_source("app.core", "(def a 1)\n(def b")
        .expect_err("parse failure");
    assert!(matches!(err, CoverError::Parse(_)));
    assert!(err.to_string().contains("app/core.clv:2:1"), "{}", err);
    assert_eq!(err.module(), Some("app.core"));
}

#[test]
fn strict_mode_rejects_unclassified_forms() {
    let driver = Driver::new(options_for(Path::new(".")).with_strict(true));
    let err = driver
        .instrument_source("app.core", "(list ())")
        .expect_err("strict");
    assert!(matches!(err, CoverError::Unclassified(_)));

    let lenient = Driver::new(options_for(Path::new(".")));
    let output = lenient.instrument_source("app.core", "(list ())").expect("lenient");
    assert_eq!(output.values, vec![Value::List(vec![Value::List(Default::default())].into())]);
}

#[test]
fn top_level_recur_is_an_error() {
    let driver = Driver::new(options_for(Path::new(".")));
    let err = driver.instrument_source("app.core", "(recur 1)").expect_err("recur");
    assert!(err.to_string().contains("recur is only allowed"), "{}", err);
}

#[test]
fn project_config_overrides_roots() {
    let dir = tempdir().expect("tempdir");
    fs::write(
        dir.path().join("clove-cover.toml"),
        "[source]\nroots = [\"lib\"]\n\n[instrument]\nstrict = true\n",
    )
    .expect("write config");
    write_module(&dir.path().join("lib"), "util.clv", "(def v 1)");
    let mut options = options_for(Path::new("."));
    assert!(apply_project_config(&mut options, dir.path()).expect("config"));
    assert!(options.strict);
    let driver = Driver::new(options);
    assert_eq!(
        driver.instrument_module("util").expect("instrument").values,
        vec![Value::Int(1)]
    );
}
