use mjs_vm::{ErrorKind, Value, Vm, VmError, VmOptions};
use std::io::Write;

#[test]
fn stack_trace_lists_innermost_frame_first() -> Result<(), VmError> {
  let mut vm = Vm::new(VmOptions::default())?;
  let src = "let f = function() {\n  die('boom');\n};\nf();\n";
  let err = vm.exec_named("a.js", src).unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Type);
  assert_eq!(err.to_string(), "boom");
  let lines: Vec<u32> = vm.stack_frames().iter().map(|f| f.line).collect();
  assert_eq!(lines, vec![2, 4]);
  assert!(vm.stack_frames().iter().all(|f| &*f.source == "a.js"));
  assert_eq!(vm.stack_trace(), "  at a.js:2\n  at a.js:4");
  assert_eq!(vm.last_error(), Some(&err));

  vm.exec("1")?;
  assert!(vm.last_error().is_none());
  assert!(vm.stack_frames().is_empty());
  Ok(())
}

#[test]
fn frames_span_units_and_native_reentry() -> Result<(), VmError> {
  let mut vm = Vm::new(VmOptions::default())?;
  vm.exec_named("lib.js", "let inner = function(x) {\n  return x.y.z;\n};")?;
  let err = vm
    .exec_named(
      "main.js",
      "let outer = function() {\n  return inner.apply(undefined, [{}]);\n};\n\nouter();",
    )
    .unwrap_err();
  assert_eq!(err.to_string(), "cannot look up [z] in undefined");
  let frames: Vec<(String, u32)> = vm
    .stack_frames()
    .iter()
    .map(|f| (f.source.to_string(), f.line))
    .collect();
  assert_eq!(
    frames,
    vec![
      ("lib.js".to_string(), 2),
      ("main.js".to_string(), 2),
      ("main.js".to_string(), 5),
    ]
  );
  Ok(())
}

#[test]
fn syntax_errors_quote_the_source() -> Result<(), VmError> {
  let mut vm = Vm::new(VmOptions::default())?;
  let err = vm.exec("let = 1").unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Syntax);
  assert_eq!(err.to_string(), "parse error at line 1: [= 1]");
  let err = vm.exec("switch (1) {}").unwrap_err();
  assert_eq!(err.to_string(), "[switch] is not implemented");
  Ok(())
}

#[test]
fn runtime_type_errors() -> Result<(), VmError> {
  let mut vm = Vm::new(VmOptions::default())?;
  let cases = [
    ("let n = 1; n()", "calling non-callable"),
    ("undefined.x", "cannot look up [x] in undefined"),
    ("let s = 'str'; s.slice('a')", "beginSlice should be a number, string given"),
    ("'abc'.indexOf()", "missing argument searchValue"),
    ("let z = null; z++", "implicit type conversion is prohibited"),
    ("let w = 'q'; w += 1", "implicit type conversion is prohibited"),
    ("die('custom message')", "custom message"),
  ];
  for (src, msg) in cases {
    let err = vm.exec(src).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Type, "{src}");
    assert_eq!(err.to_string(), msg, "{src}");
  }
  Ok(())
}

#[test]
fn files_run_and_load_once() -> Result<(), VmError> {
  let mut vm = Vm::new(VmOptions::default())?;
  vm.exec("let counter = 0;")?;
  let mut file = tempfile::NamedTempFile::new().unwrap();
  writeln!(file, "counter += 1;").unwrap();
  let path = file.path().to_path_buf();

  vm.load_file(&path)?;
  vm.load_file(&path)?;
  assert_eq!(vm.global("counter").unwrap().as_number(), Some(1.0));
  vm.exec_file(&path)?;
  assert_eq!(vm.global("counter").unwrap().as_number(), Some(2.0));
  vm.exec(&format!("load('{}')", path.display()))?;
  assert_eq!(vm.global("counter").unwrap().as_number(), Some(2.0));

  let err = vm.exec_file(path.with_extension("missing")).unwrap_err();
  assert_eq!(err.kind(), ErrorKind::FileRead);
  assert!(err.to_string().starts_with("failed to read file \""));
  Ok(())
}

fn stop(vm: &mut Vm, _this: Value, _args: &[Value]) -> Result<Value, VmError> {
  vm.interrupt_handle().interrupt();
  Ok(Value::UNDEFINED)
}

#[test]
fn interrupt_ends_execution_silently() -> Result<(), VmError> {
  let mut vm = Vm::new(VmOptions::default())?;
  vm.register_native("stop", stop)?;
  let v = vm.exec("let reached = 0; stop(); reached = 1; reached")?;
  assert!(v.is_undefined());
  assert_eq!(vm.global("reached").unwrap().as_number(), Some(0.0));
  assert!(vm.last_error().is_none());
  assert!(!vm.interrupt_handle().is_interrupted());
  assert_eq!(vm.exec("reached = 2")?.as_number(), Some(2.0));
  Ok(())
}

#[test]
fn interrupt_from_another_thread_stops_a_loop() -> Result<(), VmError> {
  use std::sync::atomic::AtomicBool;
  use std::sync::Arc;

  let flag = Arc::new(AtomicBool::new(false));
  let mut vm = Vm::new(VmOptions {
    interrupt_flag: Some(flag.clone()),
    ..VmOptions::default()
  })?;
  let handle = vm.interrupt_handle();
  let stopper = std::thread::spawn(move || {
    std::thread::sleep(std::time::Duration::from_millis(50));
    handle.interrupt();
  });
  assert!(vm.exec("while (true) {}")?.is_undefined());
  stopper.join().unwrap();
  assert_eq!(vm.stack_depths(), Vm::new(VmOptions::default())?.stack_depths());
  Ok(())
}
