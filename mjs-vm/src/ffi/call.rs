use super::CType;
use super::FfiArg;
use super::FfiSignature;
use crate::error::VmError;
use crate::handle::CallbackId;
use crate::handle::SigId;
use crate::value::Unpacked;
use crate::value::Value;
use crate::vm::Vm;

fn not_a(i: usize, what: &str) -> VmError {
  VmError::type_error(format!("actual arg #{i} is not {what}"))
}

impl Vm {
  /// Parses `text`, resolves its symbol through the host and returns a callable signature value.
  pub(crate) fn ffi_resolve(&mut self, text: &str) -> Result<Value, VmError> {
    let mut sig = FfiSignature::parse(text)
      .map_err(|err| err.prepend(format!("bad ffi signature: \"{text}\"")))?;
    let host = self
      .ffi_host
      .clone()
      .ok_or_else(|| VmError::type_error("resolver is not set"))?;
    let target = host
      .resolve(&sig.name)
      .ok_or_else(|| VmError::type_error(format!("dlsym('{}') failed", sig.name)))?;
    sig.target = Some(target);
    if let Some(cb) = &sig.callback {
      sig.trampoline = host.callback_trampoline(cb);
    }
    tracing::debug!(target: "mjs_vm::ffi", signature = %sig, addr = target.0, "resolved");
    Ok(self.heap.new_sig(sig))
  }

  fn marshal(&self, sig: &FfiSignature, i: usize, ty: CType, v: Value) -> Result<FfiArg, VmError> {
    Ok(match ty {
      CType::Int => match v.unpack() {
        Unpacked::Number(n) if n.fract() == 0.0 => FfiArg::Word(n as i64 as usize),
        Unpacked::Boolean(b) => FfiArg::Word(b as usize),
        _ => return Err(not_a(i, "an int")),
      },
      CType::Bool => match v.unpack() {
        Unpacked::Number(n) => FfiArg::Bool(n != 0.0),
        Unpacked::Boolean(b) => FfiArg::Bool(b),
        _ => return Err(not_a(i, "a bool")),
      },
      CType::Double => FfiArg::Double(v.as_number().ok_or_else(|| not_a(i, "a number"))?),
      CType::Float => FfiArg::Float(v.as_number().ok_or_else(|| not_a(i, "a number"))? as f32),
      CType::CharPtr => match self.heap.str(v) {
        Some(s) => FfiArg::Str(s.to_vec()),
        None if v.is_null() => FfiArg::Ptr(0),
        None => return Err(not_a(i, "a string")),
      },
      CType::VoidPtr => match (self.heap.str(v), v.as_foreign()) {
        (Some(s), _) => FfiArg::Str(s.to_vec()),
        (None, Some(p)) => FfiArg::Ptr(p),
        (None, None) if v.is_null() => FfiArg::Ptr(0),
        (None, None) => return Err(not_a(i, "a pointer")),
      },
      CType::MgStrPtr => FfiArg::Str(
        self
          .heap
          .str(v)
          .ok_or_else(|| not_a(i, "a string"))?
          .to_vec(),
      ),
      CType::Callback => {
        if !v.is_function() {
          return Err(not_a(i, "a function"));
        }
        let tramp = sig
          .trampoline
          .ok_or_else(|| VmError::type_error("no trampoline for callback"))?;
        FfiArg::Ptr(tramp.0)
      }
      // Filled in by `register_callbacks` once every argument has been accepted.
      CType::Userdata => {
        if sig.callback.is_none() {
          return Err(VmError::internal("userdata without a callback"));
        }
        FfiArg::Word(0)
      }
      CType::Void | CType::MgStr => {
        return Err(VmError::internal(format!(
          "invalid arg type \"{}\"",
          ty.as_str()
        )))
      }
    })
  }

  fn unmarshal(&mut self, ty: CType, arg: &FfiArg) -> Result<Value, VmError> {
    Ok(match (ty, arg) {
      (CType::Void, _) => Value::UNDEFINED,
      (CType::Int, FfiArg::Word(w)) => Value::number(*w as isize as f64),
      (CType::Bool, FfiArg::Bool(b)) => Value::boolean(*b),
      (CType::Bool, FfiArg::Word(w)) => Value::boolean(*w != 0),
      (CType::Double, FfiArg::Double(d)) => Value::number(*d),
      (CType::Float, FfiArg::Float(f)) => Value::number(*f as f64),
      (CType::CharPtr | CType::MgStrPtr, FfiArg::Str(bytes)) => self.heap.alloc_string(bytes)?,
      (CType::CharPtr | CType::VoidPtr, FfiArg::Ptr(0)) => Value::NULL,
      (CType::VoidPtr, FfiArg::Ptr(p)) => Value::foreign(*p)?,
      _ => {
        return Err(VmError::type_error(format!(
          "{} expected, {arg:?} given",
          ty.as_str()
        )))
      }
    })
  }

  /// Registers the `(callback, userdata)` pair of an accepted call and passes its id as the
  /// userdata word. Nothing is registered for a call that is rejected.
  fn register_callbacks(
    &mut self,
    sig: &FfiSignature,
    args: &[Value],
    marshaled: &mut [FfiArg],
  ) {
    let Some(cb_sig) = sig.callback.as_deref() else {
      return;
    };
    let func = sig
      .callback_index()
      .and_then(|j| args.get(j).copied())
      .unwrap_or(Value::UNDEFINED);
    for ((&ty, &v), slot) in sig.args.iter().zip(args).zip(marshaled) {
      if ty == CType::Userdata {
        let id = self.callbacks.register(func, v, cb_sig);
        *slot = FfiArg::Word(id.to_word());
      }
    }
  }

  /// Calls a resolved signature with script arguments.
  pub(crate) fn ffi_call(&mut self, id: SigId, args: &[Value]) -> Result<Value, VmError> {
    let sig = self.heap.sig(id)?.clone();
    let context = "failed to call FFIed function";
    if args.len() != sig.args.len() {
      return Err(
        VmError::type_error(format!(
          "{}: expected {} args, got {}",
          sig.name,
          sig.args.len(),
          args.len()
        ))
        .prepend(context),
      );
    }
    let mut marshaled = Vec::with_capacity(args.len());
    for (i, (&ty, &v)) in sig.args.iter().zip(args).enumerate() {
      marshaled.push(
        self
          .marshal(&sig, i, ty, v)
          .map_err(|err| err.prepend(context))?,
      );
    }
    let host = self
      .ffi_host
      .clone()
      .ok_or_else(|| VmError::type_error("resolver is not set"))?;
    let target = sig
      .target
      .ok_or_else(|| VmError::internal(format!("{} is not resolved", sig.name)))?;
    self.register_callbacks(&sig, args, &mut marshaled);
    tracing::trace!(target: "mjs_vm::ffi", name = %sig.name, args = marshaled.len(), "call");
    self.inhibit_gc += 1;
    let res = host.call(self, target, &sig, &marshaled);
    self.inhibit_gc -= 1;
    self.unmarshal(sig.ret, &res?)
  }

  /// Runs the script function registered under `id` on behalf of a native trampoline.
  ///
  /// `args` follow the callback signature; the `userdata` position is replaced by the value
  /// registered with the function. The function's result is marshaled per the callback's return
  /// type, with `void` callbacks yielding `Word(0)`.
  pub fn invoke_callback(&mut self, id: CallbackId, args: &[FfiArg]) -> Result<FfiArg, VmError> {
    let (func, userdata, sig) = {
      let entry = self
        .callbacks
        .get(id)
        .ok_or_else(|| VmError::bad_args(format!("unknown callback #{}", id.to_word())))?;
      (entry.func, entry.userdata, entry.sig.clone())
    };
    if args.len() != sig.args.len() {
      return Err(VmError::bad_args(format!(
        "callback expects {} args, got {}",
        sig.args.len(),
        args.len()
      )));
    }
    let mut values = Vec::with_capacity(args.len());
    for (&ty, arg) in sig.args.iter().zip(args) {
      let v = match ty {
        CType::Userdata => userdata,
        _ => self.unmarshal(ty, arg)?,
      };
      values.push(v);
    }
    let ret = self.guarded(|vm| vm.call_value(func, Value::UNDEFINED, &values))?;
    match sig.ret {
      CType::Void => Ok(FfiArg::Word(0)),
      ty => self.marshal(&sig, 0, ty, ret),
    }
  }
}
