//! An embeddable engine for a restricted subset of JavaScript.
//!
//! Source is compiled in a single pass to a compact bytecode and run on a stack machine. Values
//! are NaN-boxed into 64 bits; objects, properties and FFI signatures live in block arenas and
//! owned strings in a compacting byte heap, all reclaimed by a mark-sweep collector that runs
//! between instructions.
//!
//! ```
//! use mjs_vm::{Vm, VmOptions};
//!
//! let mut vm = Vm::new(VmOptions::default())?;
//! let v = vm.exec("let f = function(a, b) { return a * b; }; f(6, 7)")?;
//! assert_eq!(v.as_number(), Some(42.0));
//! # Ok::<(), mjs_vm::VmError>(())
//! ```
//!
//! There are no implicit conversions: `1 + "1"` is a type error, and `==` is rejected in favour
//! of `===`. Native code is reachable through [`Vm::register_native`] and, for C-like
//! prototypes, through the `ffi()` builtin backed by an embedder-supplied [`FfiHost`].

mod arena;
mod bcode;
mod buf;
mod builtins;
mod compile;
mod disasm;
mod emit;
mod error;
mod exec;
mod ffi;
mod gc;
mod handle;
mod heap;
mod interrupt;
mod lex;
mod opcode;
mod ops;
mod root;
mod source;
mod string;
mod token;
mod value;
mod varint;
mod vm;

pub use arena::ArenaStats;
pub use compile::compile;
pub use disasm::disassemble;
pub use error::ErrorKind;
pub use error::VmError;
pub use ffi::CType;
pub use ffi::FfiArg;
pub use ffi::FfiHost;
pub use ffi::FfiSignature;
pub use ffi::NativeAddr;
pub use ffi::MAX_ARGS;
pub use gc::GcStats;
pub use handle::CallbackId;
pub use handle::NativeId;
pub use handle::ObjectId;
pub use handle::RootId;
pub use handle::SigId;
pub use heap::HeapStats;
pub use interrupt::InterruptHandle;
pub use opcode::ExprOp;
pub use opcode::Op;
pub use root::PersistentRoot;
pub use source::format_stack_trace;
pub use source::StackFrame;
pub use string::StrRef;
pub use value::InlineStr;
pub use value::StrRepr;
pub use value::StringKind;
pub use value::Unpacked;
pub use value::Value;
pub use value::ValueError;
pub use value::MAX_INLINE_STRING;
pub use vm::NativeFn;
pub use vm::StackDepths;
pub use vm::Vm;
pub use vm::VmOptions;
