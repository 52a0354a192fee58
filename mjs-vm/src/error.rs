use crate::value::ValueError;
use std::fmt;

/// Errors produced by the compiler, the VM and the embedder API.
///
/// Every message-bearing variant carries the full human-readable message; contexts added on the
/// way out (see [`VmError::prepend`]) are concatenated in front of the innermost cause.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VmError {
  /// Rejected source text, or a `break`/`continue` with no enclosing loop.
  #[error("{0}")]
  Syntax(String),

  /// Lookup of an undeclared variable.
  #[error("{0}")]
  Reference(String),

  /// An operation applied to a value of the wrong kind.
  #[error("{0}")]
  Type(String),

  #[error("{0}")]
  OutOfMemory(String),

  /// A broken engine invariant: stack underflow, unknown opcode, stale handle.
  #[error("{0}")]
  Internal(String),

  /// An embedder-supplied source file could not be read.
  #[error("{0}")]
  FileRead(String),

  /// A malformed embedder API call.
  #[error("{0}")]
  BadArgs(String),

  /// A recognized construct the engine deliberately does not implement.
  #[error("{0}")]
  NotImplemented(String),

  /// Silent early termination requested by the embedder. Never reported as a script error.
  #[error("execution terminated")]
  Exit,
}

/// Discriminant of a [`VmError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
  Syntax,
  Reference,
  Type,
  OutOfMemory,
  Internal,
  FileRead,
  BadArgs,
  NotImplemented,
  Exit,
}

impl ErrorKind {
  pub fn as_str(self) -> &'static str {
    match self {
      ErrorKind::Syntax => "SYNTAX_ERROR",
      ErrorKind::Reference => "REFERENCE_ERROR",
      ErrorKind::Type => "TYPE_ERROR",
      ErrorKind::OutOfMemory => "OUT_OF_MEMORY",
      ErrorKind::Internal => "INTERNAL_ERROR",
      ErrorKind::FileRead => "FILE_READ_ERROR",
      ErrorKind::BadArgs => "BAD_ARGUMENTS",
      ErrorKind::NotImplemented => "NOT_IMPLEMENTED",
      ErrorKind::Exit => "EXIT",
    }
  }
}

impl fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl VmError {
  pub fn syntax(msg: impl Into<String>) -> Self {
    VmError::Syntax(msg.into())
  }

  pub fn reference(msg: impl Into<String>) -> Self {
    VmError::Reference(msg.into())
  }

  pub fn type_error(msg: impl Into<String>) -> Self {
    VmError::Type(msg.into())
  }

  pub fn internal(msg: impl Into<String>) -> Self {
    VmError::Internal(msg.into())
  }

  pub fn bad_args(msg: impl Into<String>) -> Self {
    VmError::BadArgs(msg.into())
  }

  pub fn not_implemented(msg: impl Into<String>) -> Self {
    VmError::NotImplemented(msg.into())
  }

  pub fn kind(&self) -> ErrorKind {
    match self {
      VmError::Syntax(_) => ErrorKind::Syntax,
      VmError::Reference(_) => ErrorKind::Reference,
      VmError::Type(_) => ErrorKind::Type,
      VmError::OutOfMemory(_) => ErrorKind::OutOfMemory,
      VmError::Internal(_) => ErrorKind::Internal,
      VmError::FileRead(_) => ErrorKind::FileRead,
      VmError::BadArgs(_) => ErrorKind::BadArgs,
      VmError::NotImplemented(_) => ErrorKind::NotImplemented,
      VmError::Exit => ErrorKind::Exit,
    }
  }

  /// The message without the kind, empty for [`VmError::Exit`].
  pub fn message(&self) -> &str {
    match self {
      VmError::Syntax(m)
      | VmError::Reference(m)
      | VmError::Type(m)
      | VmError::OutOfMemory(m)
      | VmError::Internal(m)
      | VmError::FileRead(m)
      | VmError::BadArgs(m)
      | VmError::NotImplemented(m) => m,
      VmError::Exit => "",
    }
  }

  /// Wraps the message as `"{context}: {message}"`, keeping the kind.
  pub fn prepend(self, context: impl fmt::Display) -> Self {
    let wrap = |m: String| format!("{context}: {m}");
    match self {
      VmError::Syntax(m) => VmError::Syntax(wrap(m)),
      VmError::Reference(m) => VmError::Reference(wrap(m)),
      VmError::Type(m) => VmError::Type(wrap(m)),
      VmError::OutOfMemory(m) => VmError::OutOfMemory(wrap(m)),
      VmError::Internal(m) => VmError::Internal(wrap(m)),
      VmError::FileRead(m) => VmError::FileRead(wrap(m)),
      VmError::BadArgs(m) => VmError::BadArgs(wrap(m)),
      VmError::NotImplemented(m) => VmError::NotImplemented(wrap(m)),
      VmError::Exit => VmError::Exit,
    }
  }
}

impl From<ValueError> for VmError {
  fn from(err: ValueError) -> Self {
    VmError::Internal(err.to_string())
  }
}
