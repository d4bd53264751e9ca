mod common;

use clove_cover_core::ast::FormKind;
use clove_cover_core::error::CoverError;
use clove_cover_core::form_to_string::form_to_string;
use common::{
    assert_probed_once, capture_parts, count_captures, parse_one, try_wrap_source, wrap_one,
    wrap_source,
};
use pretty_assertions::assert_eq;

#[test]
fn every_leaf_and_compound_is_probed_once() {
    let sources = [
        "(defn f [x] (when (> x 1) (+ x 1)))",
        "(let [a 1 b (inc a)] [a b {:k b} #{a}])",
        "(fn ([] 0) ([x] (* x 2)))",
        "(fn named [x & more] (apply + x more))",
        "(. s (substring 1 (inc 1)))",
        "(. s charAt (dec 2))",
        "(new Point 1 (inc 2))",
        "(-> x (f 1) g)",
        "(->> xs (map inc) (filter odd?))",
        "(cond (< a 1) :lo (> a 9) :hi :else :mid)",
        "(and a (or b c))",
        "(if-let [v (f)] (g v) :none)",
        "(try (f) (catch Exception e e) (finally (g)))",
        "(do (println \"x\") (throw (ex-info \"boom\" {})))",
        "(.toUpperCase (str a \"b\"))",
        "(Point. 1 2)",
        "((fn [x] x) 1)",
    ];
    for src in sources {
        let wrapped = wrap_one(src);
        assert_probed_once(&wrapped);
    }
}

#[test]
fn probe_count_matches_registered_sites() {
    let (forms, probe) = wrap_source("(def x (+ 1 2))\n(let [y x] (inc y))");
    let total: usize = forms.iter().map(count_captures).sum();
    assert_eq!(total, probe.calls.len());
}

#[test]
fn stop_forms_are_returned_unchanged() {
    for src in [
        "'(a b c)",
        "(quote (f x))",
        "(loop [i 0] (if (< i 3) (recur (inc i)) i))",
        "(recur (inc i))",
        "(import java.util.Date)",
        "(ns app.core (:require [app.util :as u]))",
        "(defrecord Point [x y])",
        "(clove.cover::capture 1 0 x)",
    ] {
        let (forms, probe) = wrap_source(src);
        assert!(forms[0].structurally_eq(&parse_one(src)), "{}", src);
        assert!(probe.calls.is_empty(), "{}", src);
    }
}

#[test]
fn structural_containers_are_not_probed_themselves() {
    let wrapped = wrap_one("[1 {:a 2} #{3}]");
    assert!(capture_parts(&wrapped).is_none());
    let FormKind::Vector(items) = &wrapped.kind else {
        panic!("expected vector, got {}", form_to_string(&wrapped));
    };
    assert!(capture_parts(&items[0]).is_some());
    assert!(capture_parts(&items[1]).is_none());
    assert_eq!(count_captures(&wrapped), 4);
}

#[test]
fn probes_report_own_line_or_inherited_hint() {
    let (_, probe) = wrap_source("(def a\n  (+ 1\n     2))");
    assert_eq!(
        probe.calls,
        vec![
            ("+".to_string(), Some(2)),
            ("1".to_string(), Some(2)),
            ("2".to_string(), Some(2)),
            ("(+ 1 2)".to_string(), Some(2)),
            ("(def a (+ 1 2))".to_string(), Some(1)),
        ]
    );
}

#[test]
fn desugared_forms_keep_source_provenance_and_lines() {
    let (_, probe) = wrap_source("(when ready\n  (launch))");
    assert!(probe.calls.contains(&("ready".to_string(), Some(1))));
    assert!(probe.calls.contains(&("launch".to_string(), Some(2))));
    assert!(probe.calls.contains(&("(launch)".to_string(), Some(2))));
    // The outermost probe wraps the rewritten `if`, registered as the `when` it came from.
    let outer = probe.calls.last().expect("probe");
    assert_eq!(outer, &("(when ready (launch))".to_string(), Some(1)));
}

#[test]
fn overload_parameter_vectors_are_untouched() {
    let src = "(fn f ([] 0) ([x & xs] (count xs)))";
    let wrapped = wrap_one(src);
    let (_, inner) = capture_parts(&wrapped).expect("fn probed");
    let items = inner.as_list().expect("fn list");
    let original = parse_one(src);
    let original_items = original.as_list().expect("fn list");
    assert!(items[1].structurally_eq(&original_items[1]));
    for idx in [2, 3] {
        let params = &items[idx].as_list().expect("overload")[0];
        let expected = &original_items[idx].as_list().expect("overload")[0];
        assert!(params.structurally_eq(expected));
    }
}

#[test]
fn member_access_leaves_target_and_selector_alone() {
    let wrapped = wrap_one("(. obj (method a))");
    let (_, inner) = capture_parts(&wrapped).expect("member access probed");
    let items = inner.as_list().expect("list");
    assert_eq!(items[1].as_symbol(), Some("obj"));
    let call = items[2].as_list().expect("call");
    assert_eq!(call[0].as_symbol(), Some("method"));
    assert!(capture_parts(&call[1]).is_some());
}

#[test]
fn malformed_overload_names_group_and_enclosing_form() {
    let err = try_wrap_source("\n(fn ([x] x) (y))", false).expect_err("malformed");
    let CoverError::Wrap(data) = &err else {
        panic!("expected wrap error, got {:?}", err);
    };
    assert!(data.message.contains("(y)"), "{}", data.message);
    assert_eq!(err.form(), Some("(fn ([x] x) (y))"));
    assert_eq!(err.span().map(|span| span.line), Some(2));
}

#[test]
fn malformed_bindings_and_definitions_fail() {
    for src in [
        "(let [a] a)",
        "(let a 1)",
        "(def)",
        "(def 1 2)",
        "(new)",
        "(. obj)",
        "(fn)",
        "(cond a)",
    ] {
        let err = try_wrap_source(src, false).expect_err(src);
        assert!(matches!(err, CoverError::Wrap(_)), "{}: {:?}", src, err);
        assert!(err.form().is_some(), "{}", src);
    }
}

#[test]
fn unclassified_forms_pass_through_or_fail_in_strict_mode() {
    let (forms, probe) = wrap_source("()");
    assert!(matches!(&forms[0].kind, FormKind::List(items) if items.is_empty()));
    assert!(probe.calls.is_empty());

    let (forms, _) = wrap_source("(f #inst \"2020\")");
    let (_, inner) = capture_parts(&forms[0]).expect("call probed");
    let tagged = &inner.as_list().expect("call")[1];
    assert!(matches!(tagged.kind, FormKind::Tagged { .. }));

    let err = try_wrap_source("(f ())", true).expect_err("strict");
    assert!(matches!(err, CoverError::Unclassified(_)));
}

#[test]
fn already_instrumented_output_is_not_reinstrumented() {
    let once = wrap_one("(+ 1 2)");
    let text = form_to_string(&once);
    let (twice, probe) = wrap_source(&text);
    assert!(twice[0].structurally_eq(&once));
    assert!(probe.calls.is_empty());
}
