use mjs_vm::{ErrorKind, Value, Vm, VmError, VmOptions};

fn num(vm: &mut Vm, src: &str) -> Result<f64, VmError> {
  let v = vm.exec(src)?;
  Ok(v.as_number().expect("expected a number"))
}

#[test]
fn recursion_runs_without_growing_the_host_stack() -> Result<(), VmError> {
  let mut vm = Vm::new(VmOptions::default())?;
  vm.exec("let fib = function(n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); };")?;
  assert_eq!(num(&mut vm, "fib(15)")?, 610.0);
  vm.exec("let depth = function(n) { if (n === 0) return 0; return 1 + depth(n - 1); };")?;
  assert_eq!(num(&mut vm, "depth(5000)")?, 5000.0);
  Ok(())
}

#[test]
fn missing_arguments_are_undefined_and_extra_ones_ignored() -> Result<(), VmError> {
  let mut vm = Vm::new(VmOptions::default())?;
  vm.exec("let f = function(a, b) { return typeof b; };")?;
  let v = vm.exec("f(1)")?;
  assert_eq!(vm.string_lossy(v).unwrap(), "undefined");
  let v = vm.exec("f(1, 2, 3)")?;
  assert_eq!(vm.string_lossy(v).unwrap(), "number");
  assert!(vm.exec("let g = function() {}; g()")?.is_undefined());
  assert!(vm.exec("let h = function() { return; }; h()")?.is_undefined());
  Ok(())
}

#[test]
fn named_function_expressions_bind_their_name() -> Result<(), VmError> {
  let mut vm = Vm::new(VmOptions::default())?;
  vm.exec("function twice(x) { return x * 2; }")?;
  assert_eq!(num(&mut vm, "twice(21)")?, 42.0);
  assert!(vm.global("twice").unwrap().is_function());
  Ok(())
}

#[test]
fn methods_receive_this() -> Result<(), VmError> {
  let mut vm = Vm::new(VmOptions::default())?;
  vm.exec("let o = {n: 5, get: function() { return this.n; }};")?;
  assert_eq!(num(&mut vm, "o.get()")?, 5.0);
  assert_eq!(num(&mut vm, "o['get']()")?, 5.0);
  assert!(vm.exec("let free = o.get; typeof this")?.is_string());
  let err = vm.exec("free()").unwrap_err();
  assert_eq!(err.to_string(), "cannot look up [n] in undefined");
  Ok(())
}

#[test]
fn apply_passes_this_and_arguments() -> Result<(), VmError> {
  let mut vm = Vm::new(VmOptions::default())?;
  vm.exec("let add = function(a, b) { return this.base + a + b; };")?;
  assert_eq!(num(&mut vm, "add.apply({base: 100}, [1, 2])")?, 103.0);
  let err = vm.exec("add.apply({base: 1}, 5)").unwrap_err();
  assert_eq!(err.to_string(), "apply: arguments should be an array");
  Ok(())
}

#[test]
fn functions_see_the_callers_scopes() -> Result<(), VmError> {
  let mut vm = Vm::new(VmOptions::default())?;
  vm.exec("let counter = 0; let bump = function() { counter++; return counter; };")?;
  assert_eq!(num(&mut vm, "bump(); bump(); bump()")?, 3.0);
  assert_eq!(num(&mut vm, "for (let i = 0; i < 4; i++) { bump(); } counter")?, 7.0);
  Ok(())
}

#[test]
fn returning_from_inside_loops_unwinds_them() -> Result<(), VmError> {
  let mut vm = Vm::new(VmOptions::default())?;
  vm.exec(
    "let find = function(arr, x) { for (let i = 0; i < arr.length; i++) { if (arr[i] === x) { return i; } } return -1; };",
  )?;
  assert_eq!(num(&mut vm, "find([4, 5, 6], 6)")?, 2.0);
  assert_eq!(num(&mut vm, "find([4, 5, 6], 9)")?, -1.0);
  assert_eq!(num(&mut vm, "let hits = 0; while (hits < 3) { hits += 1 + find([1], 1); } hits")?, 3.0);
  assert_eq!(vm.stack_depths().loops, 0);
  Ok(())
}

fn native_sum(_vm: &mut Vm, _this: Value, args: &[Value]) -> Result<Value, VmError> {
  let mut total = 0.0;
  for v in args {
    total += v
      .as_number()
      .ok_or_else(|| VmError::type_error("sum: numbers expected"))?;
  }
  Ok(Value::number(total))
}

fn native_call_twice(vm: &mut Vm, _this: Value, args: &[Value]) -> Result<Value, VmError> {
  let f = args.first().copied().unwrap_or(Value::UNDEFINED);
  let a = vm.call(f, Value::UNDEFINED, &[Value::number(1.0)])?;
  let b = vm.call(f, Value::UNDEFINED, &[a])?;
  Ok(b)
}

#[test]
fn natives_are_callable_from_scripts_and_call_back() -> Result<(), VmError> {
  let mut vm = Vm::new(VmOptions::default())?;
  vm.register_native("sum", native_sum)?;
  vm.register_native("twice", native_call_twice)?;
  assert_eq!(num(&mut vm, "sum(1, 2, 3.5)")?, 6.5);
  assert_eq!(num(&mut vm, "twice(function(x) { return x * 10; })")?, 100.0);
  let err = vm.exec("sum(1, 'x')").unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Type);
  assert_eq!(err.to_string(), "sum: numbers expected");
  Ok(())
}

#[test]
fn embedder_calls_and_applies_script_functions() -> Result<(), VmError> {
  let mut vm = Vm::new(VmOptions::default())?;
  vm.exec("let mul = function(a, b) { return a * b; };")?;
  let mul = vm.global("mul").unwrap();
  let v = vm.call(mul, Value::UNDEFINED, &[Value::number(6.0), Value::number(7.0)])?;
  assert_eq!(v.as_number(), Some(42.0));
  let args = vm.new_array(vec![Value::number(3.0), Value::number(3.0)]);
  assert_eq!(vm.apply(mul, Value::UNDEFINED, args)?.as_number(), Some(9.0));
  let err = vm.call(Value::number(1.0), Value::UNDEFINED, &[]).unwrap_err();
  assert_eq!(err.to_string(), "calling non-callable");
  assert_eq!(vm.last_error(), Some(&err));
  Ok(())
}

fn native_stack_args(vm: &mut Vm, _this: Value, args: &[Value]) -> Result<Value, VmError> {
  if vm.stack_depths().data <= args.len() {
    return Err(VmError::type_error("arguments are not on the data stack"));
  }
  native_sum(vm, Value::UNDEFINED, args)
}

#[test]
fn embedder_calls_pass_natives_the_stacked_arguments() -> Result<(), VmError> {
  let mut vm = Vm::new(VmOptions::default())?;
  let sum = vm.register_native("sum", native_stack_args)?;
  let before = vm.stack_depths();
  let args = [Value::number(1.0), Value::number(2.0), Value::number(4.0)];
  assert_eq!(vm.call(sum, Value::UNDEFINED, &args)?.as_number(), Some(7.0));
  assert_eq!(vm.stack_depths(), before);
  assert_eq!(num(&mut vm, "sum(1, 2, 4)")?, 7.0);
  let list = vm.new_array(args.to_vec());
  assert_eq!(vm.apply(sum, Value::UNDEFINED, list)?.as_number(), Some(7.0));
  assert_eq!(vm.stack_depths(), before);
  Ok(())
}
