use mjs_vm::{compile, disassemble, Vm, VmError, VmOptions};

fn offset_of(listing: &str, suffix: &str) -> usize {
  let line = listing
    .lines()
    .find(|l| l.ends_with(suffix))
    .unwrap_or_else(|| panic!("no instruction ending with {suffix:?} in\n{listing}"));
  line.split('\t').next().unwrap().parse().unwrap()
}

#[test]
fn listing_covers_every_loaded_unit() -> Result<(), VmError> {
  let mut vm = Vm::new(VmOptions::default())?;
  vm.exec_named("one.js", "let x = 1;\nlet y = x + 41;\ny")?;
  vm.exec_named("two.js", "2")?;
  let listing = vm.disassemble();
  assert!(listing.contains("BCODE_HDR  [one.js] size:"));
  assert!(listing.contains("BCODE_HDR  [two.js] size:"));
  assert!(listing.contains("EXPR  +"));

  let at = offset_of(&listing, "PUSH_INT  41");
  assert_eq!(vm.line_for_offset(at), Some(2));
  assert_eq!(vm.filename_for_offset(at).as_deref(), Some("one.js"));
  let at = offset_of(&listing, "PUSH_INT  1");
  assert_eq!(vm.line_for_offset(at), Some(1));
  let at = offset_of(&listing, "PUSH_INT  2");
  assert_eq!(vm.filename_for_offset(at).as_deref(), Some("two.js"));
  assert_eq!(vm.line_for_offset(usize::MAX), None);
  Ok(())
}

#[test]
fn standalone_units_disassemble_from_zero() -> Result<(), VmError> {
  let unit = compile("f.js", "let f = function(a) { return a; };", 1)?;
  let listing = disassemble(&unit);
  assert!(listing.starts_with("0\tBCODE_HDR  [f.js] size:"));
  assert!(listing.contains("SET_ARG  [a] 0"));
  assert!(listing.contains("PUSH_FUNC"));
  assert!(listing.contains("RETURN"));
  Ok(())
}

#[test]
fn placeholder_width_is_validated_and_does_not_change_results() -> Result<(), VmError> {
  let src = "let n = 0; for (let i = 0; i < 10; i++) { if (i % 2 === 0) continue; n += i; } n";
  assert!(compile("w.js", src, 5).is_err());
  for width in [0, 4] {
    let mut vm = Vm::new(VmOptions {
      placeholder_width: width,
      ..VmOptions::default()
    })?;
    assert_eq!(vm.exec(src)?.as_number(), Some(25.0));
  }
  Ok(())
}
