use crate::bcode::Bytecode;
use crate::builtins;
use crate::builtins::Builtins;
use crate::compile::compile;
use crate::disasm;
use crate::error::VmError;
use crate::ffi::CallbackRegistry;
use crate::ffi::FfiHost;
use crate::handle::NativeId;
use crate::handle::ObjectId;
use crate::handle::RootId;
use crate::heap::prop_holder;
use crate::heap::Heap;
use crate::heap::HeapStats;
use crate::interrupt::InterruptHandle;
use crate::root::RootRegistry;
use crate::source::format_stack_trace;
use crate::source::StackFrame;
use crate::string::StrRef;
use crate::value::Unpacked;
use crate::value::Value;
use serde::Deserialize;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// A Rust function callable from scripts.
///
/// # GC / rooting expectations
///
/// `this` and `args` are rooted by the caller for the duration of the call. Collections only run
/// between instructions, so a native that runs no script code sees stable values. A native that
/// calls back into the VM ([`Vm::call`], [`Vm::exec`], ...) may trigger a collection that moves
/// owned strings; values it needs afterwards must be pinned with [`Vm::own`] or re-read from a
/// rooted location.
pub type NativeFn = fn(&mut Vm, Value, &[Value]) -> Result<Value, VmError>;

/// Construction-time knobs.
///
/// Deserializable so hosts can load them from a config file; missing fields take their defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VmOptions {
  pub object_cells_per_block: usize,
  /// Free object cells below which an allocation requests a collection.
  pub object_reserve: usize,
  pub property_cells_per_block: usize,
  pub property_reserve: usize,
  pub ffi_sig_cells_per_block: usize,
  pub ffi_sig_reserve: usize,
  /// Initial size in bytes of the owned-string heap.
  pub string_heap_size: usize,
  /// Occupancy of the string heap above which an allocation requests a collection.
  pub string_gc_ratio: f64,
  /// Spare bytes kept in the string heap after a full collection.
  pub string_slack: usize,
  /// Bytes reserved for each forward jump operand while compiling (0..=4).
  pub placeholder_width: usize,
  /// Optional shared interrupt flag to observe for cooperative cancellation.
  ///
  /// If provided, the VM uses this flag for its [`InterruptHandle`], so hosts can stop execution
  /// by setting the flag to `true`.
  #[serde(skip)]
  pub interrupt_flag: Option<Arc<AtomicBool>>,
}

impl Default for VmOptions {
  fn default() -> Self {
    Self {
      object_cells_per_block: 20,
      object_reserve: 2,
      property_cells_per_block: 20,
      property_reserve: 2,
      ffi_sig_cells_per_block: 10,
      ffi_sig_reserve: 1,
      string_heap_size: 256,
      string_gc_ratio: 0.9,
      string_slack: 500,
      placeholder_width: 1,
      interrupt_flag: None,
    }
  }
}

/// Saved caller state. `ret` is the global offset of the `CALL` to resume after, or `None` for
/// the frame an embedder-level execution starts in.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CallFrame {
  pub prev_this: Value,
  pub ret: Option<usize>,
  pub scopes: usize,
  pub loops: usize,
  /// Data stack slot holding the callee, overwritten with the return value.
  pub retval_idx: usize,
}

/// Pending call between `ARGS` and `CALL`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ArgFrame {
  pub this: Value,
  pub func_pos: usize,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct LoopFrame {
  pub scopes: usize,
  pub brk: usize,
  pub cont: usize,
}

pub(crate) struct NativeEntry {
  pub name: String,
  pub func: NativeFn,
}

/// Sizes of the VM's internal stacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StackDepths {
  pub data: usize,
  pub call: usize,
  pub args: usize,
  pub scopes: usize,
  pub loops: usize,
}

/// An interpreter instance: heap, compiled code, stacks and globals.
pub struct Vm {
  pub(crate) options: VmOptions,
  pub(crate) heap: Heap,
  pub(crate) bcode: Bytecode,
  pub(crate) stack: Vec<Value>,
  pub(crate) call_stack: Vec<CallFrame>,
  pub(crate) arg_stack: Vec<ArgFrame>,
  /// `scopes[0]` is the global object.
  pub(crate) scopes: Vec<Value>,
  pub(crate) loops: Vec<LoopFrame>,
  pub(crate) this_obj: Value,
  pub(crate) last_getprop_obj: Value,
  pub(crate) roots: RootRegistry,
  pub(crate) natives: Vec<NativeEntry>,
  pub(crate) builtins: Builtins,
  pub(crate) callbacks: CallbackRegistry,
  pub(crate) ffi_host: Option<Arc<dyn FfiHost>>,
  /// Collections are skipped while non-zero.
  pub(crate) inhibit_gc: u32,
  /// Nesting of executions currently on the Rust stack.
  pub(crate) depth: usize,
  /// Offset of the instruction that raised the last error.
  pub(crate) cur_offset: usize,
  pub(crate) stack_trace: Vec<StackFrame>,
  pub(crate) interrupt: InterruptHandle,
  pub(crate) output: Box<dyn Write>,
  last_error: Option<VmError>,
}

impl Vm {
  pub fn new(options: VmOptions) -> Result<Vm, VmError> {
    let heap = Heap::new(&options);
    let interrupt = InterruptHandle::new(options.interrupt_flag.clone());
    let mut vm = Vm {
      options,
      heap,
      bcode: Bytecode::default(),
      stack: Vec::new(),
      call_stack: Vec::new(),
      arg_stack: Vec::new(),
      scopes: Vec::new(),
      loops: Vec::new(),
      this_obj: Value::UNDEFINED,
      last_getprop_obj: Value::UNDEFINED,
      roots: RootRegistry::default(),
      natives: Vec::new(),
      builtins: Builtins::default(),
      callbacks: CallbackRegistry::default(),
      ffi_host: None,
      inhibit_gc: 0,
      depth: 0,
      cur_offset: 0,
      stack_trace: Vec::new(),
      interrupt,
      output: Box::new(std::io::stdout()),
      last_error: None,
    };
    let global = vm.heap.new_object();
    vm.scopes.push(global);
    builtins::install(&mut vm)?;
    Ok(vm)
  }

  pub fn options(&self) -> &VmOptions {
    &self.options
  }

  /// Where `print` writes. Defaults to stdout.
  pub fn set_output(&mut self, output: Box<dyn Write>) {
    self.output = output;
  }

  pub fn set_ffi_host(&mut self, host: Arc<dyn FfiHost>) {
    self.ffi_host = Some(host);
  }

  pub fn interrupt_handle(&self) -> InterruptHandle {
    self.interrupt.clone()
  }

  /// Runs `f` as an embedder-level entry point. The outermost entry resets and then records the
  /// last error and stack trace; nested entries (from natives) leave them to the outermost one.
  pub(crate) fn guarded(
    &mut self,
    f: impl FnOnce(&mut Vm) -> Result<Value, VmError>,
  ) -> Result<Value, VmError> {
    let outermost = self.depth == 0;
    if outermost {
      self.last_error = None;
      self.stack_trace.clear();
    }
    let res = f(self);
    if outermost {
      if let Err(err) = &res {
        tracing::debug!(
          target: "mjs_vm::exec",
          kind = %err.kind(),
          error = %err,
          frames = self.stack_trace.len(),
          "uncaught error"
        );
        self.last_error = Some(err.clone());
      }
    }
    res
  }

  /// Compiles and runs `source` as `<stdin>`.
  pub fn exec(&mut self, source: &str) -> Result<Value, VmError> {
    self.exec_named("<stdin>", source)
  }

  pub fn exec_named(&mut self, filename: &str, source: &str) -> Result<Value, VmError> {
    self.guarded(|vm| vm.exec_source(filename, source))
  }

  pub fn exec_file(&mut self, path: impl AsRef<Path>) -> Result<Value, VmError> {
    let path = path.as_ref();
    self.guarded(|vm| vm.run_file(path, false))
  }

  /// Like [`Vm::exec_file`], but does nothing if the most recent run of the same file succeeded.
  pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<Value, VmError> {
    let path = path.as_ref();
    self.guarded(|vm| vm.run_file(path, true))
  }

  fn run_file(&mut self, path: &Path, skip_loaded: bool) -> Result<Value, VmError> {
    let filename = path.display().to_string();
    if skip_loaded {
      let done = self
        .bcode
        .find_by_filename(&filename)
        .map(|i| self.bcode.parts()[i].exec_result == Some(true))
        .unwrap_or(false);
      if done {
        return Ok(Value::UNDEFINED);
      }
    }
    let source = std::fs::read_to_string(path)
      .map_err(|err| VmError::FileRead(format!("failed to read file \"{filename}\": {err}")))?;
    self.exec_source(&filename, &source)
  }

  fn exec_source(&mut self, filename: &str, source: &str) -> Result<Value, VmError> {
    let unit = compile(filename, source, self.options.placeholder_width)?;
    let index = self.bcode.commit(unit)?;
    let start = self.bcode.parts()[index].start;
    let this = self.this_obj;
    let res = self.execute(start, this, Value::UNDEFINED, &[]);
    if let Some(part) = self.bcode.part_mut(index) {
      part.exec_result = Some(res.is_ok());
    }
    res
  }

  /// Calls any callable value.
  pub fn call(&mut self, func: Value, this: Value, args: &[Value]) -> Result<Value, VmError> {
    self.guarded(|vm| vm.call_value(func, this, args))
  }

  /// Calls `func` with the elements of `args`, which must be an array or `undefined`.
  pub fn apply(&mut self, func: Value, this: Value, args: Value) -> Result<Value, VmError> {
    let items = match args.unpack() {
      Unpacked::Array(id) => self.heap.array(id)?.clone(),
      Unpacked::Undefined => Vec::new(),
      _ => return Err(VmError::type_error("apply: arguments should be an array")),
    };
    self.call(func, this, &items)
  }

  pub(crate) fn add_native(&mut self, name: &str, func: NativeFn) -> Value {
    self.natives.push(NativeEntry {
      name: name.to_string(),
      func,
    });
    Value::native(NativeId((self.natives.len() - 1) as u32))
  }

  pub(crate) fn native(&self, id: NativeId) -> Result<&NativeEntry, VmError> {
    self
      .natives
      .get(id.0 as usize)
      .ok_or_else(|| VmError::internal(format!("unknown native function #{}", id.0)))
  }

  /// Registers `func` and binds it to the global `name`.
  pub fn register_native(&mut self, name: &str, func: NativeFn) -> Result<Value, VmError> {
    let v = self.add_native(name, func);
    self.set_global(name, v)?;
    Ok(v)
  }

  pub fn global_object(&self) -> Value {
    self.scopes.first().copied().unwrap_or(Value::UNDEFINED)
  }

  fn global_id(&self) -> Result<ObjectId, VmError> {
    prop_holder(self.global_object()).ok_or_else(|| VmError::internal("global scope is missing"))
  }

  pub fn set_global(&mut self, name: &str, value: Value) -> Result<(), VmError> {
    let global = self.global_id()?;
    let key = self.heap.alloc_string(name.as_bytes())?;
    self.heap.set(global, key, value)
  }

  pub(crate) fn set_global_static(&mut self, name: &'static str, value: Value) -> Result<(), VmError> {
    let global = self.global_id()?;
    let key = self.heap.strings.foreign(name.as_bytes())?;
    self.heap.set(global, key, value)
  }

  pub fn global(&self, name: &str) -> Option<Value> {
    let global = self.global_id().ok()?;
    self.heap.get_own_bytes(global, name.as_bytes()).ok().flatten()
  }

  /// Pins `value` as a GC root until [`Vm::disown`]. String offsets in the root are kept current
  /// across collections; read them back with [`Vm::root_value`].
  pub fn own(&mut self, value: Value) -> RootId {
    self.roots.add(value)
  }

  /// Releases a root. Returns whether it was live.
  pub fn disown(&mut self, id: RootId) -> bool {
    self.roots.remove(id)
  }

  pub fn root_value(&self, id: RootId) -> Option<Value> {
    self.roots.get(id)
  }

  pub fn set_root(&mut self, id: RootId, value: Value) -> bool {
    self.roots.set(id, value)
  }

  pub fn root_count(&self) -> usize {
    self.roots.len()
  }

  pub fn new_string(&mut self, bytes: impl AsRef<[u8]>) -> Result<Value, VmError> {
    self.heap.alloc_string(bytes.as_ref())
  }

  /// A string referencing `bytes` without copying them.
  pub fn new_foreign_string(&mut self, bytes: &'static [u8]) -> Result<Value, VmError> {
    self.heap.strings.foreign(bytes)
  }

  pub fn new_object(&mut self) -> Value {
    self.heap.new_object()
  }

  pub fn new_array(&mut self, items: Vec<Value>) -> Value {
    self.heap.new_array(items)
  }

  pub fn new_array_buffer(&mut self, bytes: Vec<u8>) -> Value {
    self.heap.new_array_buffer(bytes)
  }

  /// Bytes of a string value.
  pub fn get_string(&self, v: Value) -> Option<StrRef<'_>> {
    self.heap.str(v)
  }

  pub fn string_lossy(&self, v: Value) -> Option<String> {
    self
      .heap
      .str(v)
      .map(|s| String::from_utf8_lossy(&s).into_owned())
  }

  fn holder(&self, obj: Value) -> Result<ObjectId, VmError> {
    prop_holder(obj).ok_or_else(|| {
      VmError::type_error(format!("{} cannot hold properties", obj.type_name()))
    })
  }

  /// Property lookup through the `__p` chain; `undefined` when missing.
  pub fn get(&self, obj: Value, name: &str) -> Result<Value, VmError> {
    let id = self.holder(obj)?;
    Ok(self.heap.get(id, name.as_bytes())?.unwrap_or(Value::UNDEFINED))
  }

  pub fn get_own(&self, obj: Value, name: &str) -> Result<Option<Value>, VmError> {
    let id = self.holder(obj)?;
    self.heap.get_own_bytes(id, name.as_bytes())
  }

  pub fn set(&mut self, obj: Value, name: &str, value: Value) -> Result<(), VmError> {
    let id = self.holder(obj)?;
    let key = self.heap.alloc_string(name.as_bytes())?;
    self.heap.set(id, key, value)
  }

  pub fn del(&mut self, obj: Value, name: &str) -> Result<bool, VmError> {
    let id = self.holder(obj)?;
    let key = self.heap.alloc_string(name.as_bytes())?;
    self.heap.del(id, key)
  }

  /// Own property names in insertion order.
  pub fn keys(&self, obj: Value) -> Result<Vec<Value>, VmError> {
    let id = self.holder(obj)?;
    self.heap.keys(id)
  }

  fn array_id(&self, arr: Value) -> Result<ObjectId, VmError> {
    match arr.unpack() {
      Unpacked::Array(id) => Ok(id),
      _ => Err(VmError::type_error(format!(
        "array expected, {} given",
        arr.type_name()
      ))),
    }
  }

  pub fn array_len(&self, arr: Value) -> Result<usize, VmError> {
    Ok(self.heap.array(self.array_id(arr)?)?.len())
  }

  pub fn array_get(&self, arr: Value, index: usize) -> Result<Value, VmError> {
    let items = self.heap.array(self.array_id(arr)?)?;
    Ok(items.get(index).copied().unwrap_or(Value::UNDEFINED))
  }

  pub fn array_set(&mut self, arr: Value, index: usize, value: Value) -> Result<(), VmError> {
    let id = self.array_id(arr)?;
    self.heap.array_set(id, index, value)
  }

  pub fn array_push(&mut self, arr: Value, value: Value) -> Result<(), VmError> {
    let id = self.array_id(arr)?;
    self.heap.array_mut(id)?.push(value);
    Ok(())
  }

  /// Contents of an array buffer or the window of a data view.
  pub fn buffer_bytes(&self, v: Value) -> Result<Vec<u8>, VmError> {
    match v.unpack() {
      Unpacked::ArrayBuffer(id) => Ok(self.heap.buffer(id)?.clone()),
      Unpacked::DataView(id) => {
        let (buffer, offset, len) = self.heap.view(id)?;
        let bytes = self.heap.buffer(buffer)?;
        Ok(bytes.get(offset..offset + len).unwrap_or_default().to_vec())
      }
      _ => Err(VmError::type_error(format!(
        "array_buf expected, {} given",
        v.type_name()
      ))),
    }
  }

  pub fn heap_stats(&self) -> HeapStats {
    HeapStats {
      callbacks: self.callbacks.len(),
      ..self.heap.stats()
    }
  }

  pub fn stack_depths(&self) -> StackDepths {
    StackDepths {
      data: self.stack.len(),
      call: self.call_stack.len(),
      args: self.arg_stack.len(),
      scopes: self.scopes.len(),
      loops: self.loops.len(),
    }
  }

  pub fn line_for_offset(&self, offset: usize) -> Option<u32> {
    self.bcode.line_for_offset(offset)
  }

  pub fn filename_for_offset(&self, offset: usize) -> Option<Arc<str>> {
    self.bcode.filename_for_offset(offset)
  }

  /// Listing of every committed part, with global offsets.
  pub fn disassemble(&self) -> String {
    let mut out = String::new();
    for part in self.bcode.parts() {
      disasm::write_unit(&mut out, &part.data, part.start);
    }
    out
  }

  /// Error of the last top-level invocation, if it failed.
  pub fn last_error(&self) -> Option<&VmError> {
    self.last_error.as_ref()
  }

  pub fn stack_frames(&self) -> &[StackFrame] {
    &self.stack_trace
  }

  pub fn stack_trace(&self) -> String {
    format_stack_trace(&self.stack_trace)
  }
}

/// Tears the instance down with one last full collection, after dropping every root and callback
/// registration.
impl Drop for Vm {
  fn drop(&mut self) {
    self.callbacks.clear();
    self.roots = RootRegistry::default();
    self.stack.clear();
    self.call_stack.clear();
    self.arg_stack.clear();
    self.scopes.clear();
    self.loops.clear();
    self.this_obj = Value::UNDEFINED;
    self.last_getprop_obj = Value::UNDEFINED;
    let stats = self.gc(true);
    tracing::debug!(
      target: "mjs_vm::gc",
      objects_freed = stats.objects_freed,
      "vm destroyed"
    );
  }
}
