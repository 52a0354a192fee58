use mjs_vm::{ErrorKind, StackDepths, Vm, VmError, VmOptions};

fn num(vm: &mut Vm, src: &str) -> Result<f64, VmError> {
  let v = vm.exec(src)?;
  Ok(v.as_number().expect("expected a number"))
}

#[test]
fn program_value_is_the_last_statement() -> Result<(), VmError> {
  let mut vm = Vm::new(VmOptions::default())?;
  assert_eq!(num(&mut vm, "1; 2; 3")?, 3.0);
  assert!(vm.exec("")?.is_undefined());
  assert!(vm.exec(";;")?.is_undefined());
  assert!(vm.exec("let x = 1")?.as_number() == Some(1.0));
  assert!(vm.exec("let y")?.is_undefined());
  Ok(())
}

#[test]
fn if_else_chains() -> Result<(), VmError> {
  let mut vm = Vm::new(VmOptions::default())?;
  let src = "let f = function(n) { if (n < 0) { return -1; } else if (n === 0) { return 0; } else { return 1; } };";
  vm.exec(src)?;
  assert_eq!(num(&mut vm, "f(-5)")?, -1.0);
  assert_eq!(num(&mut vm, "f(0)")?, 0.0);
  assert_eq!(num(&mut vm, "f(9)")?, 1.0);
  assert_eq!(num(&mut vm, "let r = 0; if (r === 0) r = 5; else r = 6; r")?, 5.0);
  assert!(vm.exec("if (false) 1;")?.is_undefined());
  Ok(())
}

#[test]
fn while_and_for_loops() -> Result<(), VmError> {
  let mut vm = Vm::new(VmOptions::default())?;
  assert_eq!(
    num(&mut vm, "let i = 0; let sum = 0; while (i < 5) { sum += i; i++; } sum")?,
    10.0
  );
  assert_eq!(
    num(
      &mut vm,
      "let s = 0; for (let j = 0; j < 10; j++) { if (j === 3) continue; if (j === 6) break; s += j; } s"
    )?,
    12.0
  );
  assert_eq!(
    num(&mut vm, "let k = 0; for (;;) { k++; if (k > 7) break; } k")?,
    8.0
  );
  assert_eq!(
    num(
      &mut vm,
      "let n = 0; for (let a = 0; a < 3; a++) { for (let b = 0; b < 3; b++) { if (b === 1) break; n++; } } n"
    )?,
    3.0
  );
  assert_eq!(vm.stack_depths(), Vm::new(VmOptions::default())?.stack_depths());
  Ok(())
}

#[test]
fn for_in_walks_keys_and_indices() -> Result<(), VmError> {
  let mut vm = Vm::new(VmOptions::default())?;
  let v = vm.exec("let o = {a: 1, b: 2, c: 3}; let s = ''; for (let k in o) { s += k; } s")?;
  assert_eq!(vm.string_lossy(v).unwrap(), "abc");
  assert_eq!(
    num(&mut vm, "let t = 0; for (let k in o) { t += o[k]; } t")?,
    6.0
  );
  assert_eq!(
    num(&mut vm, "let arr = [5, 6, 7]; let u = 0; for (let i in arr) { u += i; } u")?,
    3.0
  );
  assert_eq!(
    num(&mut vm, "let w = 0; for (let k in o) { if (k === 'b') break; w++; } w")?,
    1.0
  );
  assert!(vm.exec("for (let k in {}) { die('empty'); }")?.is_undefined());
  let err = vm.exec("for (let k in 5) {}").unwrap_err();
  assert_eq!(err.to_string(), "can't iterate over non-object value");
  Ok(())
}

#[test]
fn block_scopes_shadow_and_unwind() -> Result<(), VmError> {
  let mut vm = Vm::new(VmOptions::default())?;
  assert_eq!(num(&mut vm, "let v = 1; { let v = 2; v = 3; } v")?, 1.0);
  let err = vm.exec("{ let inner = 1; } inner").unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Reference);
  assert_eq!(err.to_string(), "[inner] is not defined");
  Ok(())
}

#[test]
fn misplaced_break_is_a_syntax_error() -> Result<(), VmError> {
  let mut vm = Vm::new(VmOptions::default())?;
  let err = vm.exec("break").unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Syntax);
  assert_eq!(err.to_string(), "misplaced 'break'");
  let err = vm
    .exec("let g = function() { continue; }; while (true) { g(); }")
    .unwrap_err();
  assert_eq!(err.to_string(), "misplaced 'continue'");
  Ok(())
}

#[test]
fn objects_and_arrays() -> Result<(), VmError> {
  let mut vm = Vm::new(VmOptions::default())?;
  assert_eq!(num(&mut vm, "let o = {x: 1, y: {z: 2}}; o.y.z")?, 2.0);
  assert!(vm.exec("o.missing")?.is_undefined());
  assert_eq!(num(&mut vm, "o['new'] = 4; o.new")?, 4.0);
  assert_eq!(num(&mut vm, "o[1] = 9; o['1']")?, 9.0);
  assert_eq!(num(&mut vm, "let a = [1, 2, 3]; a.push(4, 5)")?, 5.0);
  assert_eq!(num(&mut vm, "a[4]")?, 5.0);
  assert_eq!(num(&mut vm, "a[8] = 1; a.length")?, 9.0);
  assert!(vm.exec("a[6]")?.is_undefined());
  assert_eq!(num(&mut vm, "let p = {__p: {inherited: 7}}; p.inherited")?, 7.0);
  let err = vm.exec("let q = 1; q.foo").unwrap_err();
  assert_eq!(err.to_string(), "cannot look up [foo] in number");
  let err = vm.exec("q.foo = 1").unwrap_err();
  assert_eq!(err.to_string(), "unsupported object type");
  Ok(())
}

#[test]
fn array_buffers_and_views() -> Result<(), VmError> {
  let mut vm = Vm::new(VmOptions::default())?;
  vm.exec("let b = ArrayBuffer(8); let d = DataView(b, 2, 4); d[0] = 255; d[3] = 7;")?;
  assert_eq!(num(&mut vm, "b.byteLength")?, 8.0);
  assert_eq!(num(&mut vm, "d.length")?, 4.0);
  assert_eq!(num(&mut vm, "d.byteLength")?, 8.0);
  assert_eq!(num(&mut vm, "b[2] + d.buffer[5]")?, 262.0);
  let b = vm.global("b").unwrap();
  assert_eq!(vm.buffer_bytes(b)?, vec![0, 0, 255, 0, 0, 7, 0, 0]);
  let err = vm.exec("d[4] = 1").unwrap_err();
  assert_eq!(err.to_string(), "index 4 is out of range");
  let err = vm.exec("d[0] = 256").unwrap_err();
  assert_eq!(err.to_string(), "only number 0 .. 255 can be assigned");
  let err = vm.exec("DataView(b, 9)").unwrap_err();
  assert_eq!(err.to_string(), "byteOffset is out of range");
  Ok(())
}

#[test]
fn print_writes_display_forms() -> Result<(), VmError> {
  use std::cell::RefCell;
  use std::io::Write;
  use std::rc::Rc;

  #[derive(Clone, Default)]
  struct Shared(Rc<RefCell<Vec<u8>>>);

  impl Write for Shared {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
      self.0.borrow_mut().extend_from_slice(buf);
      Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
      Ok(())
    }
  }

  let out = Shared::default();
  let mut vm = Vm::new(VmOptions::default())?;
  vm.set_output(Box::new(out.clone()));
  vm.exec("print(1, 'two', [3], {}, null, undefined, true, 0.25, 1 / 0, 'a\\tb')")?;
  let text = String::from_utf8(out.0.borrow().clone()).unwrap();
  assert_eq!(
    text,
    "1 two <array> <object> null undefined true 0.250000 NaN a\\x09b\n"
  );
  Ok(())
}

#[test]
fn stack_depths_are_restored_after_errors() -> Result<(), VmError> {
  let mut vm = Vm::new(VmOptions::default())?;
  let before = vm.stack_depths();
  assert!(vm
    .exec("let f = function(a) { while (true) { { let z = a.b.c; } } }; f({})")
    .is_err());
  assert_eq!(vm.stack_depths(), before);
  assert_eq!(
    before,
    StackDepths {
      data: 0,
      call: 0,
      args: 0,
      scopes: 1,
      loops: 0,
    }
  );
  Ok(())
}
