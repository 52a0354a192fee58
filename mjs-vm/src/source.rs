use std::fmt::Display;
use std::sync::Arc;

/// One location of a stack trace: the file a bytecode offset was compiled from and its line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
  pub source: Arc<str>,
  pub line: u32,
}

impl Display for StackFrame {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "  at {}:{}", self.source, self.line)
  }
}

/// Renders frames innermost first, one per line.
pub fn format_stack_trace(frames: &[StackFrame]) -> String {
  let mut out = String::new();
  for (i, frame) in frames.iter().enumerate() {
    if i > 0 {
      out.push('\n');
    }
    out.push_str(&frame.to_string());
  }
  out
}
