//! End-to-end tests of the `logicdb` binary over its line protocol

use std::{
    io::Write,
    process::{Command, Stdio},
};

use tempfile::NamedTempFile;

/// Runs the binary with the script on stdin and returns stdout
fn run_stdin(script: &str, args: &[&str]) -> String {
    let mut child = Command::new(env!("CARGO_BIN_EXE_logicdb"))
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn logicdb");
    child
        .stdin
        .take()
        .expect("stdin is piped")
        .write_all(script.as_bytes())
        .expect("failed to write script");
    let output = child.wait_with_output().expect("failed to wait for logicdb");
    assert!(output.status.success());
    String::from_utf8(output.stdout).expect("stdout is utf-8")
}

/// Runs the binary on a script file and returns stdout
fn run_file(script: &str, args: &[&str]) -> String {
    let mut file = NamedTempFile::new().expect("failed to create script file");
    file.write_all(script.as_bytes()).expect("failed to write script");
    let output = Command::new(env!("CARGO_BIN_EXE_logicdb"))
        .args(args)
        .arg(file.path())
        .stderr(Stdio::null())
        .output()
        .expect("failed to run logicdb");
    assert!(output.status.success());
    String::from_utf8(output.stdout).expect("stdout is utf-8")
}

const SCRIPT: &str = "\
CREATE TABLE t (a INTEGER PRIMARY KEY, b TEXT);
INSERT INTO t VALUES (1, 'x'), (2, 'y');

SELECT a, b
FROM t
ORDER BY a DESC;

SELECT * FROM missing;

INSERT INTO t VALUES (1, 'z');

SELECT count(*) FROM t
";

#[test]
fn test_script_over_stdin() {
    assert_eq!(
        run_stdin(SCRIPT, &[]),
        "\n2\ty\n1\tx\n\nError: no such table: missing\n\n\
         Error: constraint failed: duplicate primary key 1 in table t\n\n2\n\n"
    );
}

#[test]
fn test_script_file_matches_stdin() {
    assert_eq!(run_file(SCRIPT, &[]), run_stdin(SCRIPT, &[]));
}

#[test]
fn test_blank_lines_and_empty_blocks() {
    // Runs of blank lines produce nothing; a block of only `;` answers with
    // an empty response
    assert_eq!(run_stdin("\n\n;\n\n\nSELECT 1\n\n\n", &[]), "\n1\n\n");
    assert_eq!(run_stdin("", &[]), "");
}

#[test]
fn test_syntax_error() {
    let out = run_stdin("SELEC 1\n\nSELECT 'still running'\n", &[]);
    let mut responses = out.split("\n\n");
    assert!(responses.next().is_some_and(|r| r.starts_with("Error: syntax error")));
    assert_eq!(responses.next(), Some("still running"));
}

#[test]
fn test_output_flags() {
    let script = "SELECT 1 / 0, NULL, 2.5, 1 < 2\n";
    assert_eq!(run_stdin(script, &[]), "NULL\tNULL\t2.500\t1\n\n");
    assert_eq!(
        run_stdin(script, &["--null-text", "none", "--real-precision", "1"]),
        "none\tnone\t2.5\t1\n\n"
    );
    assert_eq!(
        run_stdin("SELECT 0.1 + 0.2\n", &["--shortest-reals"]),
        "0.30000000000000004\n\n"
    );
    assert_eq!(
        run_stdin(script, &["--division-by-zero", "error"]),
        "Error: division by zero\n\n"
    );
}

#[test]
fn test_nulls_order_flag() {
    let script = "\
CREATE TABLE t (a INTEGER);
INSERT INTO t VALUES (2), (NULL), (1)

SELECT a FROM t ORDER BY a
";
    assert_eq!(run_stdin(script, &[]), "\nNULL\n1\n2\n\n");
    assert_eq!(run_stdin(script, &["--nulls", "last"]), "\n1\n2\nNULL\n\n");
}

#[test]
fn test_deep_nesting_keeps_running() {
    let script = format!(
        "SELECT {}1{}\n\nSELECT {}TRUE\n\nSELECT 2\n",
        "(".repeat(5000),
        ")".repeat(5000),
        "NOT ".repeat(100_000),
    );
    assert_eq!(
        run_stdin(&script, &[]),
        "Error: nesting exceeds maximum depth of 128\n\n\
         Error: nesting exceeds maximum depth of 128\n\n2\n\n"
    );
}
