//! CLI integration tests: grammar loading, rendering, failure modes.

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::Builder;

fn write_temp(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
    let mut file = Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("create temp file");
    file.write_all(contents.as_bytes()).expect("write temp file");
    file
}

fn paren_grammar_json() -> String {
    serde_json::to_string(&trellis_lr::testing::paren_spec()).expect("serialize grammar")
}

#[test]
fn renders_treeviz_for_a_document() {
    let grammar = write_temp(".json", &paren_grammar_json());
    let doc = write_temp(".txt", "(())");
    Command::cargo_bin("trellis")
        .expect("binary builds")
        .arg(grammar.path())
        .arg(doc.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Document 0..4"))
        .stdout(predicate::str::contains("Paren 1..3"));
}

#[test]
fn renders_json_output() {
    let grammar = write_temp(".json", &paren_grammar_json());
    let doc = write_temp(".txt", "(hello)");
    Command::cargo_bin("trellis")
        .expect("binary builds")
        .arg(grammar.path())
        .arg(doc.path())
        .args(["--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"type\": \"Text\""));
}

#[test]
fn accepts_yaml_grammars() {
    let yaml = serde_yaml::to_string(&trellis_lr::testing::paren_spec()).expect("yaml");
    let grammar = write_temp(".yaml", &yaml);
    let doc = write_temp(".txt", "()");
    Command::cargo_bin("trellis")
        .expect("binary builds")
        .arg(grammar.path())
        .arg(doc.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Paren 0..2"));
}

#[test]
fn rejects_a_bad_table_with_exit_code_2() {
    let mut spec = trellis_lr::testing::paren_spec();
    spec.format = 99;
    let grammar = write_temp(".json", &serde_json::to_string(&spec).expect("serialize"));
    let doc = write_temp(".txt", "()");
    Command::cargo_bin("trellis")
        .expect("binary builds")
        .arg(grammar.path())
        .arg(doc.path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unsupported table format"));
}

#[test]
fn malformed_documents_still_render_a_tree() {
    let grammar = write_temp(".json", &paren_grammar_json());
    let doc = write_temp(".txt", "(()");
    Command::cargo_bin("trellis")
        .expect("binary builds")
        .arg(grammar.path())
        .arg(doc.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Document 0..3"));
}

#[test]
fn unknown_dialect_fails_cleanly() {
    let grammar = write_temp(".json", &paren_grammar_json());
    let doc = write_temp(".txt", "()");
    Command::cargo_bin("trellis")
        .expect("binary builds")
        .arg(grammar.path())
        .arg(doc.path())
        .args(["--dialect", "nonesuch"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("no dialect"));
}
