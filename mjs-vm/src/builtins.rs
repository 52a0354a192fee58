//! Global functions installed in every VM, plus the hidden natives that back builtin methods such
//! as `"abc".slice` and `f.apply`.

use crate::error::VmError;
use crate::ops::normalize_idx;
use crate::value::Unpacked;
use crate::value::Value;
use crate::vm::Vm;
use memchr::memmem;
use std::io::Write;

/// Values returned by property lookups that resolve to builtin methods.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Builtins {
  pub apply: Value,
  pub push: Value,
  pub char_code_at: Value,
  pub index_of: Value,
  pub slice: Value,
  pub to_string: Value,
}

impl Default for Builtins {
  fn default() -> Self {
    Builtins {
      apply: Value::UNDEFINED,
      push: Value::UNDEFINED,
      char_code_at: Value::UNDEFINED,
      index_of: Value::UNDEFINED,
      slice: Value::UNDEFINED,
      to_string: Value::UNDEFINED,
    }
  }
}

pub(crate) fn install(vm: &mut Vm) -> Result<(), VmError> {
  let globals: [(&'static str, crate::vm::NativeFn); 8] = [
    ("print", print),
    ("die", die),
    ("gc", gc),
    ("ffi", ffi),
    ("ffi_cb_free", ffi_cb_free),
    ("ArrayBuffer", array_buffer),
    ("DataView", data_view),
    ("load", load),
  ];
  for (name, func) in globals {
    let v = vm.add_native(name, func);
    vm.set_global_static(name, v)?;
  }
  vm.builtins = Builtins {
    apply: vm.add_native("apply", apply),
    push: vm.add_native("push", push),
    char_code_at: vm.add_native("charCodeAt", char_code_at),
    index_of: vm.add_native("indexOf", index_of),
    slice: vm.add_native("slice", slice),
    to_string: vm.add_native("toString", to_string),
  };
  Ok(())
}

fn arg(args: &[Value], i: usize) -> Value {
  args.get(i).copied().unwrap_or(Value::UNDEFINED)
}

fn string_arg(vm: &Vm, args: &[Value], i: usize, fn_name: &str) -> Result<String, VmError> {
  let v = arg(args, i);
  vm.string_lossy(v).ok_or_else(|| {
    VmError::type_error(format!(
      "{fn_name}: string expected, {} given",
      v.type_name()
    ))
  })
}

fn print(vm: &mut Vm, _this: Value, args: &[Value]) -> Result<Value, VmError> {
  let line = args
    .iter()
    .map(|&v| vm.display(v))
    .collect::<Vec<_>>()
    .join(" ");
  writeln!(vm.output, "{line}")
    .and_then(|_| vm.output.flush())
    .map_err(|err| VmError::internal(format!("print: {err}")))?;
  Ok(Value::UNDEFINED)
}

fn die(vm: &mut Vm, _this: Value, args: &[Value]) -> Result<Value, VmError> {
  let msg = vm.to_string_bytes(arg(args, 0))?;
  Err(VmError::type_error(String::from_utf8_lossy(&msg)))
}

fn gc(vm: &mut Vm, _this: Value, args: &[Value]) -> Result<Value, VmError> {
  let full = vm.truthy(arg(args, 0));
  vm.gc(full);
  Ok(Value::UNDEFINED)
}

fn ffi(vm: &mut Vm, _this: Value, args: &[Value]) -> Result<Value, VmError> {
  let text = string_arg(vm, args, 0, "ffi")?;
  vm.ffi_resolve(&text)
}

fn ffi_cb_free(vm: &mut Vm, _this: Value, args: &[Value]) -> Result<Value, VmError> {
  let removed = vm.callbacks.remove(arg(args, 0), arg(args, 1));
  Ok(Value::number(removed as u8 as f64))
}

fn size_arg(args: &[Value], i: usize, what: &str) -> Result<Option<usize>, VmError> {
  match arg(args, i).unpack() {
    Unpacked::Undefined => Ok(None),
    Unpacked::Number(n) if n >= 0.0 && n.fract() == 0.0 => Ok(Some(n as usize)),
    _ => Err(VmError::type_error(format!(
      "{what} should be a non-negative integer"
    ))),
  }
}

fn array_buffer(vm: &mut Vm, _this: Value, args: &[Value]) -> Result<Value, VmError> {
  let len = size_arg(args, 0, "length")?.unwrap_or(0);
  Ok(vm.heap.new_array_buffer(vec![0; len]))
}

fn data_view(vm: &mut Vm, _this: Value, args: &[Value]) -> Result<Value, VmError> {
  let buf = arg(args, 0);
  let Unpacked::ArrayBuffer(id) = buf.unpack() else {
    return Err(VmError::type_error(format!(
      "DataView: array_buf expected, {} given",
      buf.type_name()
    )));
  };
  let size = vm.heap.buffer(id)?.len();
  let offset = size_arg(args, 1, "byteOffset")?.unwrap_or(0);
  if offset > size {
    return Err(VmError::type_error("byteOffset is out of range"));
  }
  let len = size_arg(args, 2, "byteLength")?.unwrap_or(size - offset);
  if len > size - offset {
    return Err(VmError::type_error("byteLength is out of range"));
  }
  Ok(vm.heap.new_data_view(id, offset, len))
}

fn load(vm: &mut Vm, _this: Value, args: &[Value]) -> Result<Value, VmError> {
  let path = string_arg(vm, args, 0, "load")?;
  vm.load_file(path)
}

fn apply(vm: &mut Vm, this: Value, args: &[Value]) -> Result<Value, VmError> {
  let items = match arg(args, 1).unpack() {
    Unpacked::Array(id) => vm.heap.array(id)?.clone(),
    Unpacked::Undefined => Vec::new(),
    _ => return Err(VmError::type_error("apply: arguments should be an array")),
  };
  vm.call_value(this, arg(args, 0), &items)
}

fn push(vm: &mut Vm, this: Value, args: &[Value]) -> Result<Value, VmError> {
  let Unpacked::Array(id) = this.unpack() else {
    return Err(VmError::type_error("push: this should be an array"));
  };
  let items = vm.heap.array_mut(id)?;
  items.extend_from_slice(args);
  Ok(Value::number(items.len() as f64))
}

fn this_bytes(vm: &Vm, this: Value) -> Result<Vec<u8>, VmError> {
  vm.heap.str(this).map(|s| s.to_vec()).ok_or_else(|| {
    VmError::type_error(format!(
      "this should be a string, {} given",
      this.type_name()
    ))
  })
}

/// Integer argument `i`; `None` when it is absent and `required` is false.
fn index_arg(args: &[Value], i: usize, name: &str, required: bool) -> Result<Option<i64>, VmError> {
  match args.get(i) {
    None if required => Err(VmError::type_error(format!("missing argument {name}"))),
    None => Ok(None),
    Some(v) => match v.as_number() {
      Some(n) => Ok(Some(n as i64)),
      None => Err(VmError::type_error(format!(
        "{name} should be a number, {} given",
        v.type_name()
      ))),
    },
  }
}

fn char_code_at(vm: &mut Vm, this: Value, args: &[Value]) -> Result<Value, VmError> {
  let s = this_bytes(vm, this)?;
  let idx = index_arg(args, 0, "index", true)?.unwrap_or(0);
  let at = if idx < 0 { s.len() as i64 + idx } else { idx };
  Ok(
    usize::try_from(at)
      .ok()
      .and_then(|i| s.get(i))
      .map(|&b| Value::number(b as f64))
      .unwrap_or(Value::UNDEFINED),
  )
}

fn index_of(vm: &mut Vm, this: Value, args: &[Value]) -> Result<Value, VmError> {
  let s = this_bytes(vm, this)?;
  let needle = match args.first() {
    None => return Err(VmError::type_error("missing argument searchValue")),
    Some(&v) => vm.heap.str(v).map(|n| n.to_vec()).ok_or_else(|| {
      VmError::type_error(format!(
        "searchValue should be a string, {} given",
        v.type_name()
      ))
    })?,
  };
  let from = index_arg(args, 1, "fromIndex", false)?
    .unwrap_or(0)
    .clamp(0, s.len() as i64) as usize;
  let found = memmem::find(&s[from..], &needle).map(|p| (p + from) as f64);
  Ok(Value::number(found.unwrap_or(-1.0)))
}

fn slice(vm: &mut Vm, this: Value, args: &[Value]) -> Result<Value, VmError> {
  let s = this_bytes(vm, this)?;
  let begin = normalize_idx(index_arg(args, 0, "beginSlice", true)?.unwrap_or(0), s.len());
  let end = match index_arg(args, 1, "endSlice", false)? {
    Some(end) => normalize_idx(end, s.len()),
    None => s.len(),
  };
  let end = end.max(begin);
  vm.heap.alloc_string(&s[begin..end])
}

fn to_string(vm: &mut Vm, this: Value, _args: &[Value]) -> Result<Value, VmError> {
  let bytes = vm.to_string_bytes(this)?;
  vm.heap.alloc_string(&bytes)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::vm::VmOptions;

  fn vm() -> Vm {
    Vm::new(VmOptions::default()).unwrap()
  }

  #[test]
  fn slice_clamps_and_counts_from_the_end() {
    let mut vm = vm();
    let s = vm.new_string("hello world").unwrap();
    let a = slice(&mut vm, s, &[Value::number(-5.0)]).unwrap();
    assert_eq!(vm.string_lossy(a).unwrap(), "world");
    let b = slice(&mut vm, s, &[Value::number(3.0), Value::number(1.0)]).unwrap();
    assert_eq!(vm.string_lossy(b).unwrap(), "");
    let err = slice(&mut vm, s, &[]).unwrap_err();
    assert_eq!(err.to_string(), "missing argument beginSlice");
  }

  #[test]
  fn index_of_searches_from_an_offset() {
    let mut vm = vm();
    let s = vm.new_string("abcabc").unwrap();
    let needle = vm.new_string("bc").unwrap();
    let first = index_of(&mut vm, s, &[needle]).unwrap();
    assert_eq!(first.as_number(), Some(1.0));
    let second = index_of(&mut vm, s, &[needle, Value::number(2.0)]).unwrap();
    assert_eq!(second.as_number(), Some(4.0));
    let none = index_of(&mut vm, s, &[needle, Value::number(99.0)]).unwrap();
    assert_eq!(none.as_number(), Some(-1.0));
  }

  #[test]
  fn string_methods_require_a_string_receiver() {
    let mut vm = vm();
    let err = char_code_at(&mut vm, Value::number(1.0), &[Value::number(0.0)]).unwrap_err();
    assert_eq!(err.to_string(), "this should be a string, number given");
  }
}
