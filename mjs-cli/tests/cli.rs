use assert_cmd::Command;
use std::io::Write;
use std::time::Duration;

fn mjs() -> Command {
  let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("mjs");
  cmd.timeout(Duration::from_secs(5));
  cmd
}

fn stdout_of(output: &std::process::Output) -> String {
  String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr_of(output: &std::process::Output) -> String {
  String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn runs_stdin_and_prints_the_result() {
  let assert = mjs()
    .write_stdin("let f = function(a, b) { return a * b; };\nf(6, 7)")
    .assert()
    .success()
    .code(0);
  assert_eq!(stdout_of(assert.get_output()), "42\n");
  assert!(assert.get_output().stderr.is_empty());
}

#[test]
fn eval_flag_runs_code_and_print_goes_to_stdout() {
  let assert = mjs()
    .arg("-e")
    .arg("print('hello', 1 + 1); 'done'")
    .assert()
    .success();
  assert_eq!(stdout_of(assert.get_output()), "hello 2\ndone\n");
}

#[test]
fn runs_a_file() {
  let mut file = tempfile::NamedTempFile::new().unwrap();
  write!(file, "let s = 0;\nfor (let i = 1; i <= 10; i++) {{ s += i; }}\ns").unwrap();
  let assert = mjs().arg(file.path()).assert().success();
  assert_eq!(stdout_of(assert.get_output()), "55\n");
}

#[test]
fn errors_go_to_stderr_with_a_stack_trace() {
  let mut file = tempfile::NamedTempFile::new().unwrap();
  write!(file, "let f = function() {{\n  die('bad');\n}};\nf();").unwrap();
  let name = file.path().display().to_string();
  let assert = mjs().arg(file.path()).assert().failure().code(1);
  let stderr = stderr_of(assert.get_output());
  assert!(stderr.starts_with("TYPE_ERROR: bad\n"), "{stderr}");
  assert!(stderr.contains(&format!("  at {name}:2\n")), "{stderr}");
  assert!(stderr.contains(&format!("  at {name}:4")), "{stderr}");
  assert!(assert.get_output().stdout.is_empty());
}

#[test]
fn syntax_errors_fail() {
  let assert = mjs().arg("-e").arg("let = 1").assert().failure().code(1);
  assert_eq!(
    stderr_of(assert.get_output()),
    "SYNTAX_ERROR: parse error at line 1: [= 1]\n"
  );
}

#[test]
fn missing_file_fails() {
  let dir = tempfile::tempdir().unwrap();
  let assert = mjs()
    .arg(dir.path().join("absent.js"))
    .assert()
    .failure()
    .code(1);
  assert!(stderr_of(assert.get_output()).starts_with("failed to read file \""));
}

#[test]
fn disasm_lists_bytecode_without_running() {
  let assert = mjs()
    .arg("--disasm")
    .arg("-e")
    .arg("die('not run'); 1 + 2")
    .assert()
    .success();
  let out = stdout_of(assert.get_output());
  assert!(out.starts_with("0\tBCODE_HDR  [<eval>] size:"), "{out}");
  assert!(out.contains("PUSH_STR  \"not run\""), "{out}");
  assert!(out.contains("EXPR  +"), "{out}");
}

#[test]
fn options_are_read_from_json() {
  let mut opts = tempfile::NamedTempFile::new().unwrap();
  write!(opts, r#"{{"placeholder_width": 0, "string_heap_size": 16}}"#).unwrap();
  let assert = mjs()
    .arg("--options")
    .arg(opts.path())
    .arg("-e")
    .arg("let a = []; for (let i = 0; i < 50; i++) { a.push('entry ' + i.toString()); } a[49]")
    .assert()
    .success();
  assert_eq!(stdout_of(assert.get_output()), "entry 49\n");

  let mut bad = tempfile::NamedTempFile::new().unwrap();
  write!(bad, "{{\"placeholder_width\": \"wide\"}}").unwrap();
  let assert = mjs()
    .arg("--options")
    .arg(bad.path())
    .arg("-e")
    .arg("1")
    .assert()
    .failure()
    .code(1);
  assert!(stderr_of(assert.get_output()).starts_with("invalid options in "));
}

#[test]
fn trace_logs_to_stderr() {
  let assert = mjs()
    .env("RUST_LOG", "mjs_vm=debug")
    .arg("--trace")
    .arg("-e")
    .arg("gc(true); 1")
    .assert()
    .success();
  assert_eq!(stdout_of(assert.get_output()), "1\n");
  assert!(stderr_of(assert.get_output()).contains("collected"));
}
