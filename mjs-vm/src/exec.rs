//! The bytecode dispatch loop.
//!
//! Execution is iterative: calls between compiled functions push a [`CallFrame`] and move the
//! cursor, so script recursion never grows the Rust stack. Only natives that call back into the
//! VM nest [`Vm::execute`].

use crate::bcode::Bytecode;
use crate::error::VmError;
use crate::heap::prop_holder;
use crate::opcode::ExprOp;
use crate::opcode::Op;
use crate::source::StackFrame;
use crate::value::Unpacked;
use crate::value::Value;
use crate::varint;
use crate::vm::ArgFrame;
use crate::vm::CallFrame;
use crate::vm::LoopFrame;
use crate::vm::StackDepths;
use crate::vm::Vm;
use std::sync::Arc;

/// Read position inside one committed part.
struct Cursor {
  data: Arc<[u8]>,
  /// Global offset of `data[0]`.
  base: usize,
  code_start: usize,
  pc: usize,
}

impl Cursor {
  fn load(bcode: &Bytecode, offset: usize) -> Result<Cursor, VmError> {
    let part = bcode.part(offset)?;
    Ok(Cursor {
      data: part.data.clone(),
      base: part.start,
      code_start: part.code_start,
      pc: offset - part.start,
    })
  }

  fn at(&self) -> usize {
    self.base + self.pc
  }

  fn jump_to(&mut self, bcode: &Bytecode, offset: usize) -> Result<(), VmError> {
    if offset >= self.base && offset < self.base + self.data.len() {
      self.pc = offset - self.base;
    } else {
      *self = Cursor::load(bcode, offset)?;
    }
    Ok(())
  }

  /// Forward jump relative to the current position.
  fn skip(&mut self, dist: usize) {
    self.pc += dist;
  }

  fn truncated(&self) -> VmError {
    VmError::internal(format!("truncated instruction at {}", self.at()))
  }

  fn byte(&mut self) -> Result<u8, VmError> {
    let b = *self.data.get(self.pc).ok_or_else(|| self.truncated())?;
    self.pc += 1;
    Ok(b)
  }

  fn varint(&mut self) -> Result<u64, VmError> {
    let (v, len) = self
      .data
      .get(self.pc..)
      .and_then(varint::decode)
      .ok_or_else(|| self.truncated())?;
    self.pc += len;
    Ok(v)
  }

  fn usize(&mut self) -> Result<usize, VmError> {
    let v = self.varint()?;
    usize::try_from(v).map_err(|_| self.truncated())
  }

  fn take(&mut self, len: usize) -> Result<&[u8], VmError> {
    let start = self.pc;
    let end = start.checked_add(len).ok_or_else(|| self.truncated())?;
    if end > self.data.len() {
      return Err(self.truncated());
    }
    self.pc = end;
    Ok(&self.data[start..end])
  }

  fn f64(&mut self) -> Result<f64, VmError> {
    let bytes: [u8; 8] = self
      .take(8)?
      .try_into()
      .map_err(|_| VmError::internal("truncated number"))?;
    Ok(f64::from_le_bytes(bytes))
  }
}

enum Flow {
  Next,
  Done(Value),
}

/// Stack sizes and `this` at the start of an execution, restored when it ends.
struct Snapshot {
  depths: StackDepths,
  this: Value,
}

impl Vm {
  pub(crate) fn pop(&mut self) -> Result<Value, VmError> {
    self
      .stack
      .pop()
      .ok_or_else(|| VmError::internal("stack underflow"))
  }

  fn peek(&self, depth: usize) -> Result<Value, VmError> {
    self
      .stack
      .len()
      .checked_sub(depth + 1)
      .map(|i| self.stack[i])
      .ok_or_else(|| VmError::internal("stack underflow"))
  }

  fn top_mut(&mut self) -> Result<&mut Value, VmError> {
    self
      .stack
      .last_mut()
      .ok_or_else(|| VmError::internal("stack underflow"))
  }

  fn snapshot(&self) -> Snapshot {
    Snapshot {
      depths: self.stack_depths(),
      this: self.this_obj,
    }
  }

  fn restore(&mut self, saved: &Snapshot) {
    self.stack.truncate(saved.depths.data);
    self.call_stack.truncate(saved.depths.call);
    self.arg_stack.truncate(saved.depths.args);
    self.scopes.truncate(saved.depths.scopes);
    self.loops.truncate(saved.depths.loops);
    self.this_obj = saved.this;
  }

  /// Appends the failing instruction and the call sites above `saved`, innermost first.
  fn record_trace(&mut self, saved: &Snapshot) {
    let mut offsets = vec![self.cur_offset];
    offsets.extend(
      self.call_stack[saved.depths.call.min(self.call_stack.len())..]
        .iter()
        .rev()
        .filter_map(|f| f.ret),
    );
    for off in offsets {
      if let (Some(source), Some(line)) = (
        self.bcode.filename_for_offset(off),
        self.bcode.line_for_offset(off),
      ) {
        self.stack_trace.push(StackFrame { source, line });
      }
    }
  }

  /// Runs code at global offset `start` in a fresh frame. `slot` is the initial return value and
  /// `args` are visible to `SET_ARG`. All stacks are restored on return.
  pub(crate) fn execute(
    &mut self,
    start: usize,
    this: Value,
    slot: Value,
    args: &[Value],
  ) -> Result<Value, VmError> {
    let saved = self.snapshot();
    self.depth += 1;
    let retval_idx = self.stack.len();
    self.stack.push(slot);
    self.stack.extend_from_slice(args);
    self.call_stack.push(CallFrame {
      prev_this: self.this_obj,
      ret: None,
      scopes: self.scopes.len(),
      loops: self.loops.len(),
      retval_idx,
    });
    self.this_obj = this;
    let res = self.run(start);
    self.depth -= 1;
    match res {
      Ok(v) => {
        self.restore(&saved);
        Ok(v)
      }
      Err(VmError::Exit) => {
        self.restore(&saved);
        if self.depth == 0 {
          tracing::debug!(target: "mjs_vm::exec", "interrupted");
          self.interrupt.clear();
          Ok(Value::UNDEFINED)
        } else {
          Err(VmError::Exit)
        }
      }
      Err(err) => {
        self.record_trace(&saved);
        self.restore(&saved);
        Err(err)
      }
    }
  }

  fn run(&mut self, start: usize) -> Result<Value, VmError> {
    let mut cur = Cursor::load(&self.bcode, start)?;
    let mut prev = Op::Nop;
    loop {
      if self.interrupt.is_interrupted() {
        return Err(VmError::Exit);
      }
      self.maybe_gc();
      let at = cur.at();
      match self.fetch_and_step(&mut cur, &mut prev, at) {
        Ok(Flow::Next) => {}
        Ok(Flow::Done(v)) => return Ok(v),
        Err(err) => {
          if !matches!(err, VmError::Exit) {
            self.cur_offset = at;
          }
          return Err(err);
        }
      }
    }
  }

  fn fetch_and_step(
    &mut self,
    cur: &mut Cursor,
    prev: &mut Op,
    at: usize,
  ) -> Result<Flow, VmError> {
    let byte = cur.byte()?;
    let op = Op::from_u8(byte)
      .ok_or_else(|| VmError::internal(format!("unknown opcode {byte} at {at}")))?;
    let flow = self.step(op, *prev, at, cur)?;
    *prev = op;
    Ok(flow)
  }

  fn loop_base(&self) -> usize {
    self.call_stack.last().map(|f| f.loops).unwrap_or(0)
  }

  /// Innermost scope that declares `name`.
  pub(crate) fn find_scope(&self, name: Value) -> Result<Value, VmError> {
    for &scope in self.scopes.iter().rev() {
      let Some(id) = prop_holder(scope) else {
        continue;
      };
      if self.heap.get_own(id, name)?.is_some() {
        return Ok(scope);
      }
    }
    let name = self
      .heap
      .str(name)
      .map(|s| String::from_utf8_lossy(&s).into_owned())
      .unwrap_or_default();
    Err(VmError::reference(format!("[{name}] is not defined")))
  }

  fn step(&mut self, op: Op, prev: Op, at: usize, cur: &mut Cursor) -> Result<Flow, VmError> {
    match op {
      Op::Nop => {}
      Op::Drop => {
        self.pop()?;
      }
      Op::Dup => {
        let v = self.peek(0)?;
        self.stack.push(v);
      }
      Op::Dup2 => {
        let a = self.peek(1)?;
        let b = self.peek(0)?;
        self.stack.extend([a, b]);
      }
      Op::Swap => {
        let len = self.stack.len();
        if len < 2 {
          return Err(VmError::internal("stack underflow"));
        }
        self.stack.swap(len - 1, len - 2);
      }
      Op::Jmp => {
        let dist = cur.usize()?;
        cur.skip(dist);
      }
      Op::JmpTrue | Op::JmpFalse => {
        let dist = cur.usize()?;
        let v = self.pop()?;
        if self.truthy(v) == (op == Op::JmpTrue) {
          self.stack.push(Value::UNDEFINED);
          cur.skip(dist);
        }
      }
      Op::JmpNeutralTrue | Op::JmpNeutralFalse => {
        let dist = cur.usize()?;
        let v = self.peek(0)?;
        if self.truthy(v) == (op == Op::JmpNeutralTrue) {
          cur.skip(dist);
        }
      }
      Op::FindScope => {
        let name = self.peek(0)?;
        let scope = self.find_scope(name)?;
        self.stack.push(scope);
      }
      Op::PushScope => {
        let scope = *self
          .scopes
          .last()
          .ok_or_else(|| VmError::internal("scopes underflow"))?;
        self.stack.push(scope);
      }
      Op::PushStr => {
        let len = cur.usize()?;
        let bytes = cur.take(len)?;
        let v = self.heap.alloc_string(bytes)?;
        self.stack.push(v);
      }
      Op::PushTrue => self.stack.push(Value::TRUE),
      Op::PushFalse => self.stack.push(Value::FALSE),
      Op::PushNull => self.stack.push(Value::NULL),
      Op::PushUndef => self.stack.push(Value::UNDEFINED),
      Op::PushInt => {
        let n = cur.varint()?;
        self.stack.push(Value::number(n as f64));
      }
      Op::PushDbl => {
        let n = cur.f64()?;
        self.stack.push(Value::number(n));
      }
      Op::PushObj => {
        let v = self.heap.new_object();
        self.stack.push(v);
      }
      Op::PushArray => {
        let v = self.heap.new_array(Vec::new());
        self.stack.push(v);
      }
      Op::PushFunc => {
        let n = cur.usize()?;
        let target = at
          .checked_sub(n)
          .ok_or_else(|| VmError::internal(format!("function offset underflow at {at}")))?;
        self.stack.push(Value::function(target as u64)?);
      }
      Op::PushThis => self.stack.push(self.this_obj),
      Op::Get => {
        let obj = self.pop()?;
        let key = self.pop()?;
        let v = self.get_prop(obj, key)?;
        self.stack.push(v);
        self.last_getprop_obj = if prev == Op::FindScope {
          Value::UNDEFINED
        } else {
          obj
        };
      }
      Op::Create => {
        let obj = self.pop()?;
        let key = self.pop()?;
        let id = prop_holder(obj)
          .ok_or_else(|| VmError::type_error(format!("cannot declare in {}", obj.type_name())))?;
        if self.heap.get_own(id, key)?.is_none() {
          self.heap.set(id, key, Value::UNDEFINED)?;
        }
      }
      Op::Expr => {
        let b = cur.byte()?;
        let expr = ExprOp::from_u8(b)
          .ok_or_else(|| VmError::internal(format!("unknown operator {b} at {at}")))?;
        self.expr_op(expr)?;
      }
      Op::Append => {
        let v = self.pop()?;
        let arr = self.pop()?;
        match arr.unpack() {
          Unpacked::Array(id) => self.heap.array_mut(id)?.push(v),
          _ => return Err(VmError::type_error("append to non-array")),
        }
      }
      Op::SetArg => {
        let n = cur.usize()?;
        let len = cur.usize()?;
        let name = self.heap.alloc_string(cur.take(len)?)?;
        let frame = self
          .call_stack
          .last()
          .ok_or_else(|| VmError::internal("argument outside of a call"))?;
        let v = self
          .stack
          .get(frame.retval_idx + 1 + n)
          .copied()
          .unwrap_or(Value::UNDEFINED);
        let scope = *self
          .scopes
          .last()
          .ok_or_else(|| VmError::internal("scopes underflow"))?;
        self.set_prop(scope, name, v)?;
      }
      Op::NewScope => {
        let scope = self.heap.new_object();
        self.scopes.push(scope);
      }
      Op::DelScope => {
        if self.scopes.len() <= 1 {
          return Err(VmError::internal("scopes underflow"));
        }
        self.scopes.pop();
      }
      Op::Args => {
        if prev != Op::Get {
          self.last_getprop_obj = Value::UNDEFINED;
        }
        let func_pos = self
          .stack
          .len()
          .checked_sub(1)
          .ok_or_else(|| VmError::internal("stack underflow"))?;
        self.arg_stack.push(ArgFrame {
          this: self.last_getprop_obj,
          func_pos,
        });
        self.last_getprop_obj = Value::UNDEFINED;
      }
      Op::Call => self.call_op(at, cur)?,
      Op::Return => {
        let frame = self
          .call_stack
          .pop()
          .ok_or_else(|| VmError::internal("cannot return"))?;
        self.this_obj = frame.prev_this;
        self.scopes.truncate(frame.scopes);
        self.loops.truncate(frame.loops);
        self.stack.truncate(frame.retval_idx + 1);
        match frame.ret {
          Some(call) => cur.jump_to(&self.bcode, call + 1)?,
          None => return Ok(Flow::Done(self.pop()?)),
        }
      }
      Op::SetRetVal => {
        let v = self.pop()?;
        let idx = self
          .call_stack
          .last()
          .map(|f| f.retval_idx)
          .ok_or_else(|| VmError::internal("cannot return"))?;
        let slot = self
          .stack
          .get_mut(idx)
          .ok_or_else(|| VmError::internal("cannot return"))?;
        *slot = v;
      }
      Op::Loop => {
        let b = cur.usize()?;
        let brk = cur.at() + b;
        let c = cur.usize()?;
        let cont = cur.at() + c;
        self.loops.push(LoopFrame {
          scopes: self.scopes.len(),
          brk,
          cont,
        });
      }
      Op::Break | Op::Continue => {
        if self.loops.len() <= self.loop_base() {
          let word = if op == Op::Break { "break" } else { "continue" };
          return Err(VmError::syntax(format!("misplaced '{word}'")));
        }
        let frame = if op == Op::Break {
          self.loops.pop()
        } else {
          self.loops.last().copied()
        };
        let frame = frame.ok_or_else(|| VmError::internal("loops underflow"))?;
        self.scopes.truncate(frame.scopes);
        let target = if op == Op::Break { frame.brk } else { frame.cont };
        cur.jump_to(&self.bcode, target)?;
      }
      Op::Exit => return Ok(Flow::Done(self.pop()?)),
      Op::BcodeHeader => cur.pc = cur.code_start,
      Op::ForInNext => self.for_in_next()?,
    }
    Ok(Flow::Next)
  }

  fn call_op(&mut self, at: usize, cur: &mut Cursor) -> Result<(), VmError> {
    let af = self
      .arg_stack
      .pop()
      .ok_or_else(|| VmError::internal("call without arguments frame"))?;
    let func = *self
      .stack
      .get(af.func_pos)
      .ok_or_else(|| VmError::internal("stack underflow"))?;
    let frame = CallFrame {
      prev_this: self.this_obj,
      ret: Some(at),
      scopes: self.scopes.len(),
      loops: self.loops.len(),
      retval_idx: af.func_pos,
    };
    match func.unpack() {
      Unpacked::Function(off) => {
        self.call_stack.push(frame);
        self.this_obj = af.this;
        self.stack[af.func_pos] = Value::UNDEFINED;
        cur.jump_to(&self.bcode, off as usize)?;
      }
      Unpacked::Native(_) | Unpacked::FfiSig(_) => {
        let args = self.stack[af.func_pos + 1..].to_vec();
        self.call_stack.push(frame);
        self.this_obj = af.this;
        let res = self.call_host(func, af.this, &args);
        if let Some(frame) = self.call_stack.pop() {
          self.this_obj = frame.prev_this;
        }
        let v = res?;
        self.stack.truncate(af.func_pos + 1);
        self.stack[af.func_pos] = v;
      }
      _ => return Err(VmError::type_error("calling non-callable")),
    }
    Ok(())
  }

  /// Stack: `[name, obj, iter]`. Binds the next key to `name` and advances `iter`, or sets
  /// `iter` to `undefined` when the walk is over.
  fn for_in_next(&mut self) -> Result<(), VmError> {
    let iter = self.peek(0)?;
    let obj = self.peek(1)?;
    let name = self.peek(2)?;
    let idx = iter.as_number().map(|n| n as usize).unwrap_or(0);
    let next = match self.iter_key(obj, idx)? {
      Some(key) => {
        let scope = self.find_scope(name)?;
        self.set_prop(scope, name, key)?;
        Value::number((idx + 1) as f64)
      }
      None => Value::UNDEFINED,
    };
    *self.top_mut()? = next;
    Ok(())
  }

  /// Calls `func` with `this`. Compiled functions run in a nested execution; natives and FFI
  /// signatures are invoked directly with their arguments rooted on the data stack.
  pub(crate) fn call_value(
    &mut self,
    func: Value,
    this: Value,
    args: &[Value],
  ) -> Result<Value, VmError> {
    match func.unpack() {
      Unpacked::Function(off) => self.execute(off as usize, this, Value::UNDEFINED, args),
      Unpacked::Native(_) | Unpacked::FfiSig(_) => {
        let base = self.stack.len();
        self.stack.push(func);
        self.stack.extend_from_slice(args);
        let args = self.stack[base + 1..].to_vec();
        let prev = std::mem::replace(&mut self.this_obj, this);
        let res = self.call_host(func, this, &args);
        self.this_obj = prev;
        self.stack.truncate(base);
        res
      }
      _ => Err(VmError::type_error("calling non-callable")),
    }
  }

  fn call_host(&mut self, func: Value, this: Value, args: &[Value]) -> Result<Value, VmError> {
    match func.unpack() {
      Unpacked::Native(id) => {
        let f = self.native(id)?.func;
        f(self, this, args)
      }
      Unpacked::FfiSig(id) => self.ffi_call(id, args),
      _ => Err(VmError::type_error("calling non-callable")),
    }
  }
}
