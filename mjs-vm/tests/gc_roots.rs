use mjs_vm::{PersistentRoot, Value, Vm, VmError, VmOptions};

#[test]
fn unreachable_objects_are_freed() -> Result<(), VmError> {
  let mut vm = Vm::new(VmOptions::default())?;
  vm.gc(true);
  let live_before = vm.heap_stats().objects.live;
  for _ in 0..3 {
    vm.new_object();
  }
  assert_eq!(vm.heap_stats().objects.live, live_before + 3);
  let stats = vm.gc(false);
  assert_eq!(stats.objects_freed, 3);
  assert_eq!(vm.heap_stats().objects.live, live_before);
  Ok(())
}

#[test]
fn properties_of_dead_objects_are_freed() -> Result<(), VmError> {
  let mut vm = Vm::new(VmOptions::default())?;
  vm.gc(true);
  let obj = vm.new_object();
  vm.set(obj, "a", Value::number(1.0))?;
  vm.set(obj, "b", Value::number(2.0))?;
  let stats = vm.gc(false);
  assert_eq!(stats.objects_freed, 1);
  assert_eq!(stats.properties_freed, 2);
  Ok(())
}

#[test]
fn owned_values_survive_compaction() -> Result<(), VmError> {
  let mut vm = Vm::new(VmOptions::default())?;
  vm.gc(true);
  vm.new_string("this string is garbage")?;
  let kept = vm.new_string("this string is kept alive")?;
  let id = vm.own(kept);
  let obj = vm.new_object();
  let name = vm.new_string("a long enough value")?;
  vm.set(obj, "name", name)?;
  let obj_root = vm.own(obj);
  assert_eq!(vm.root_count(), 2);

  let stats = vm.gc(true);
  assert!(stats.string_bytes_reclaimed > 0);
  assert_eq!(stats.objects_freed, 0);

  let kept = vm.root_value(id).unwrap();
  assert_eq!(vm.string_lossy(kept).unwrap(), "this string is kept alive");
  let obj = vm.root_value(obj_root).unwrap();
  let name = vm.get(obj, "name")?;
  assert_eq!(vm.string_lossy(name).unwrap(), "a long enough value");

  assert!(vm.disown(id));
  assert!(!vm.disown(id));
  assert!(vm.disown(obj_root));
  assert_eq!(vm.root_count(), 0);
  assert_eq!(vm.gc(false).objects_freed, 1);
  Ok(())
}

#[test]
fn persistent_root_releases_on_drop() -> Result<(), VmError> {
  let mut vm = Vm::new(VmOptions::default())?;
  vm.gc(true);
  let arr = vm.new_array(Vec::new());
  {
    let mut root = PersistentRoot::new(&mut vm, arr);
    assert_eq!(root.vm().root_count(), 1);
    assert_eq!(root.vm_mut().gc(false).objects_freed, 0);
    assert_eq!(root.get(), arr);
  }
  assert_eq!(vm.root_count(), 0);
  assert_eq!(vm.gc(false).objects_freed, 1);
  Ok(())
}

#[test]
fn scripts_keep_reachable_strings_across_collections() -> Result<(), VmError> {
  let mut vm = Vm::new(VmOptions::default())?;
  let src = "
    let arr = [];
    let junk = '';
    for (let i = 0; i < 200; i++) {
      arr.push('item ' + i.toString());
      junk = 'discarded value ' + i.toString();
    }
    gc(true);
    arr[0] + '|' + arr[199]
  ";
  let v = vm.exec(src)?;
  assert_eq!(vm.string_lossy(v).unwrap(), "item 0|item 199");
  assert_eq!(vm.array_len(vm.global("arr").unwrap())?, 200);
  let last = vm.array_get(vm.global("arr").unwrap(), 150)?;
  assert_eq!(vm.string_lossy(last).unwrap(), "item 150");
  Ok(())
}

#[test]
fn full_collection_shrinks_the_string_heap() -> Result<(), VmError> {
  let mut vm = Vm::new(VmOptions {
    string_slack: 64,
    ..VmOptions::default()
  })?;
  vm.exec("let s = ''; for (let i = 0; i < 300; i++) { s = 'temporary ' + i.toString(); }")?;
  vm.exec("s = 0;")?;
  let grown = vm.heap_stats().string_capacity;
  vm.gc(true);
  let stats = vm.heap_stats();
  assert!(stats.string_capacity <= grown);
  assert!(stats.string_capacity <= stats.string_bytes + 64);
  Ok(())
}
