use mjs_vm::{
  ErrorKind, FfiArg, FfiHost, FfiSignature, NativeAddr, StringKind, Vm, VmError, VmOptions,
};
use std::sync::Arc;

#[test]
fn top_level_return_yields_the_value() -> Result<(), VmError> {
  let mut vm = Vm::new(VmOptions::default())?;
  let v = vm.exec("let x = 1; let y = 2; return x + y;")?;
  assert_eq!(v.as_number(), Some(3.0));
  Ok(())
}

#[test]
fn short_concatenations_stay_inline() -> Result<(), VmError> {
  let mut vm = Vm::new(VmOptions::default())?;
  let v = vm.exec("let a = 'ab' + 'cd'; return a;")?;
  assert_eq!(v.string_kind(), Some(StringKind::Inline));
  assert_eq!(vm.string_lossy(v).unwrap(), "abcd");
  Ok(())
}

#[test]
fn every_string_length_survives_a_full_collection() -> Result<(), VmError> {
  let mut vm = Vm::new(VmOptions::default())?;
  let cases = [
    (0, StringKind::Inline),
    (1, StringKind::Inline),
    (4, StringKind::Inline),
    (5, StringKind::Inline5),
    (6, StringKind::Owned),
    (1000, StringKind::Owned),
  ];
  let mut roots = Vec::new();
  for (len, kind) in cases {
    let bytes: Vec<u8> = (0..len).map(|i| b'a' + (i % 26) as u8).collect();
    vm.new_string("garbage between the survivors")?;
    let v = vm.new_string(&bytes)?;
    assert_eq!(v.string_kind(), Some(kind), "length {len}");
    assert_eq!(&*vm.get_string(v).unwrap(), &bytes[..]);
    roots.push((vm.own(v), bytes));
  }
  vm.gc(true);
  for (id, bytes) in &roots {
    let v = vm.root_value(*id).unwrap();
    assert_eq!(&*vm.get_string(v).unwrap(), &bytes[..]);
  }
  Ok(())
}

#[test]
fn dropped_objects_return_the_arena_to_its_baseline() -> Result<(), VmError> {
  let mut vm = Vm::new(VmOptions::default())?;
  vm.gc(true);
  let before = vm.heap_stats();
  vm.exec("let keep = []; keep = 0;")?;
  vm.gc(true);
  let baseline = vm.heap_stats();
  assert!(baseline.objects.live >= before.objects.live);

  vm.exec("for (let i = 0; i < 1000; i++) { keep = {value: i}; }")?;
  let peak = vm.heap_stats();
  vm.exec("keep = 0;")?;
  vm.gc(true);
  let after = vm.heap_stats();
  assert_eq!(after.objects.live, baseline.objects.live);
  assert_eq!(after.properties.live, baseline.properties.live);
  assert!(after.objects.blocks <= peak.objects.blocks);
  assert!(after.objects.blocks <= baseline.objects.blocks + 1);
  Ok(())
}

#[test]
fn errors_deep_in_calls_restore_every_stack() -> Result<(), VmError> {
  let mut vm = Vm::new(VmOptions::default())?;
  vm.exec(
    "let c = function() { for (let i = 0; i < 3; i++) { { die('boom'); } } };
     let b = function() { while (true) { return c(); } };
     let a = function() { return b(); };",
  )?;
  let before = vm.stack_depths();
  let err = vm.exec("a()").unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Type);
  assert!(err.to_string().contains("boom"));
  assert_eq!(vm.stack_depths(), before);
  assert_eq!(vm.stack_frames().len(), 4);
  Ok(())
}

#[test]
fn long_forward_jumps_with_narrow_placeholders() -> Result<(), VmError> {
  let mut body = String::new();
  for i in 0..200 {
    body.push_str(&format!("s += {i}; "));
  }
  let src = format!("let s = 0; if (s === 0) {{ {body} }} else {{ s = -1; }} s");
  let want: f64 = (0..200).map(|i| i as f64).sum();
  for width in 0..=2 {
    let mut vm = Vm::new(VmOptions {
      placeholder_width: width,
      ..VmOptions::default()
    })?;
    assert_eq!(vm.exec(&src)?.as_number(), Some(want), "width {width}");
  }
  Ok(())
}

struct DoubleHost;

impl FfiHost for DoubleHost {
  fn resolve(&self, name: &str) -> Option<NativeAddr> {
    (name == "f").then_some(NativeAddr(1))
  }

  fn call(
    &self,
    _vm: &mut Vm,
    _target: NativeAddr,
    _sig: &FfiSignature,
    args: &[FfiArg],
  ) -> Result<FfiArg, VmError> {
    match args {
      [FfiArg::Word(a), FfiArg::Double(b)] => Ok(FfiArg::Double(*a as f64 + b)),
      _ => panic!("marshaled arguments do not match the signature: {args:?}"),
    }
  }
}

#[test]
fn ffi_arguments_are_checked_before_the_native_call() -> Result<(), VmError> {
  let mut vm = Vm::new(VmOptions::default())?;
  vm.set_ffi_host(Arc::new(DoubleHost));
  vm.exec("let f = ffi('double f(int, double)');")?;
  assert_eq!(vm.exec("f(2, 0.5)")?.as_number(), Some(2.5));
  let err = vm.exec("f(1.5, 2.5)").unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Type);
  Ok(())
}
