use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::tempdir;

fn run(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_clove-cover"))
        .current_dir(dir)
        .args(args)
        .env_remove("CLOVE_COVER_STRICT")
        .env_remove("CLOVE_COVER_DUMP")
        .output()
        .expect("run clove-cover")
}

#[test]
fn writes_json_report_for_module() {
    let dir = tempdir().expect("tempdir");
    fs::create_dir_all(dir.path().join("src/app")).expect("mkdir");
    fs::write(
        dir.path().join("src/app/core.clv"),
        "(defn pick [x] (if x :yes :no))\n(pick true)\n",
    )
    .expect("write module");

    let output = run(dir.path(), &["--no-config", "--out", "cov.json", "app.core"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("app.core: "), "{}", stdout);

    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("cov.json")).expect("report"))
            .expect("valid json");
    let sites = report["sites"].as_array().expect("sites");
    let hits = report["hits"].as_array().expect("hits");
    assert_eq!(sites.len(), hits.len());
    assert!(sites.iter().all(|site| site["module"] == "app.core"));
    let no_branch = sites
        .iter()
        .position(|site| site["form"] == ":no")
        .expect(":no site");
    assert_eq!(hits[no_branch], 0);
}

#[test]
fn src_flag_overrides_project_config() {
    let dir = tempdir().expect("tempdir");
    fs::write(dir.path().join("clove-cover.toml"), "[source]\nroots = [\"missing\"]\n")
        .expect("write config");
    fs::create_dir_all(dir.path().join("lib")).expect("mkdir");
    fs::write(dir.path().join("lib/util.clv"), "(def v (inc 1))").expect("write module");

    let output = run(dir.path(), &["--src", "lib", "util"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
}

#[test]
fn failures_exit_with_error_tag() {
    let dir = tempdir().expect("tempdir");
    let output = run(dir.path(), &["--no-config", "app.missing"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("[ERROR]"), "{}", stderr);
    assert!(stderr.contains("app/missing.clv") || stderr.contains("app\\missing.clv"));

    let output = run(dir.path(), &[]);
    assert_eq!(output.status.code(), Some(1));
}
