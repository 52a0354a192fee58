//! Foreign-function interface.
//!
//! The engine parses signatures, checks and marshals arguments into category-tagged
//! [`FfiArg`]s, and converts results back into values. Everything that touches the native
//! calling convention is delegated to the embedder through [`FfiHost`]: resolving symbol names,
//! performing the call, supplying trampolines for callbacks and, for foreign pointers indexed
//! from scripts, reading and writing single bytes.

mod call;
mod sig;

pub use sig::CType;
pub use sig::FfiSignature;
pub use sig::NativeAddr;
pub use sig::MAX_ARGS;

use crate::error::VmError;
use crate::handle::CallbackId;
use crate::value::Value;
use crate::vm::Vm;

/// One marshaled argument or return value.
#[derive(Debug, Clone, PartialEq)]
pub enum FfiArg {
  /// `int`, and the registration token passed for `userdata`.
  Word(usize),
  Bool(bool),
  Double(f64),
  Float(f32),
  /// `void *`, a callback trampoline, or a null `char *`.
  Ptr(usize),
  /// `char *` (NUL-terminated) and `struct mg_str *` contents.
  Str(Vec<u8>),
}

/// Native-call capability supplied by the embedder.
pub trait FfiHost: Send + Sync {
  /// Maps a symbol name to a callable address.
  fn resolve(&self, name: &str) -> Option<NativeAddr>;

  /// Address of a native trampoline able to invoke script callbacks of this shape. The
  /// trampoline receives the registration token as its `userdata` argument and forwards to
  /// [`Vm::invoke_callback`].
  fn callback_trampoline(&self, _sig: &FfiSignature) -> Option<NativeAddr> {
    None
  }

  /// Performs the call. `args` already match `sig.args` category by category.
  fn call(
    &self,
    vm: &mut Vm,
    target: NativeAddr,
    sig: &FfiSignature,
    args: &[FfiArg],
  ) -> Result<FfiArg, VmError>;

  fn read_byte(&self, addr: usize) -> Result<u8, VmError> {
    Err(VmError::type_error(format!(
      "cannot read foreign memory at {addr:#x}"
    )))
  }

  fn write_byte(&self, addr: usize, _byte: u8) -> Result<(), VmError> {
    Err(VmError::type_error(format!(
      "cannot write foreign memory at {addr:#x}"
    )))
  }
}

pub(crate) struct CallbackEntry {
  pub func: Value,
  pub userdata: Value,
  pub sig: FfiSignature,
}

/// Live callback registrations. Each entry keeps its function and userdata alive.
#[derive(Default)]
pub(crate) struct CallbackRegistry {
  entries: Vec<Option<CallbackEntry>>,
}

impl CallbackRegistry {
  /// Registers `(func, userdata)`, reusing an identical registration.
  pub fn register(&mut self, func: Value, userdata: Value, sig: &FfiSignature) -> CallbackId {
    if let Some(i) = self.position(func, userdata) {
      return CallbackId(i as u32);
    }
    let entry = Some(CallbackEntry {
      func,
      userdata,
      sig: sig.clone(),
    });
    match self.entries.iter().position(Option::is_none) {
      Some(i) => {
        self.entries[i] = entry;
        CallbackId(i as u32)
      }
      None => {
        self.entries.push(entry);
        CallbackId((self.entries.len() - 1) as u32)
      }
    }
  }

  fn position(&self, func: Value, userdata: Value) -> Option<usize> {
    self.entries.iter().position(|e| {
      e.as_ref()
        .is_some_and(|e| e.func == func && e.userdata == userdata)
    })
  }

  pub fn remove(&mut self, func: Value, userdata: Value) -> bool {
    match self.position(func, userdata) {
      Some(i) => {
        self.entries[i] = None;
        true
      }
      None => false,
    }
  }

  pub fn get(&self, id: CallbackId) -> Option<&CallbackEntry> {
    self.entries.get(id.0 as usize)?.as_ref()
  }

  pub fn len(&self) -> usize {
    self.entries.iter().flatten().count()
  }

  pub fn clear(&mut self) {
    self.entries.clear();
  }

  pub fn values_mut(&mut self) -> impl Iterator<Item = &mut Value> {
    self
      .entries
      .iter_mut()
      .flatten()
      .flat_map(|e| [&mut e.func, &mut e.userdata])
  }
}
