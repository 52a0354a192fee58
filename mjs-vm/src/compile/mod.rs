//! Single-pass compiler: a recursive-descent parser that writes bytecode as it goes.
//!
//! Every statement leaves exactly one value on the data stack; statement lists drop all but the
//! last, which becomes the value of the enclosing block or program.

mod expr;
mod stmt;

use crate::bcode;
use crate::emit::Emitter;
use crate::emit::MAX_PLACEHOLDER_WIDTH;
use crate::error::VmError;
use crate::lex::Lexer;
use crate::opcode::Op;
use crate::token::Loc;
use crate::token::Token;
use crate::token::TT;

/// Deepest nesting of blocks and binary operators the parser accepts.
pub const MAX_DEPTH: usize = 512;

/// Number of source characters quoted in a syntax error.
const ERROR_CONTEXT_CHARS: usize = 10;

pub(crate) struct Compiler<'a> {
  lexer: Lexer<'a>,
  tok: Token,
  prev: TT,
  emit: Emitter,
  depth: usize,
  /// Set while parsing the operand of a prefix `++`/`--`, which must stay a reference.
  update_target: bool,
}

impl<'a> Compiler<'a> {
  fn new(source: &'a str, width: usize) -> Self {
    Self {
      lexer: Lexer::new(source),
      tok: Token {
        typ: TT::EOF,
        loc: Loc(0, 0),
        line: 1,
      },
      prev: TT::EOF,
      emit: Emitter::new(width),
      depth: 0,
      update_target: false,
    }
  }

  fn next(&mut self) {
    self.prev = self.tok.typ;
    self.tok = self.lexer.next_token();
    self.emit.set_line(self.tok.line);
  }

  fn text(&self) -> &'a str {
    let src = self.lexer.source();
    src.get(self.tok.loc.0..self.tok.loc.1).unwrap_or_default()
  }

  fn error(&self) -> VmError {
    let src = self.lexer.source();
    let context: String = src
      .get(self.tok.loc.0..)
      .unwrap_or_default()
      .chars()
      .take(ERROR_CONTEXT_CHARS)
      .collect();
    VmError::syntax(format!(
      "parse error at line {}: [{}]",
      self.tok.line, context
    ))
  }

  fn expect(&mut self, typ: TT) -> Result<(), VmError> {
    if self.tok.typ != typ {
      return Err(self.error());
    }
    self.next();
    Ok(())
  }

  fn enter(&mut self) -> Result<(), VmError> {
    self.depth += 1;
    if self.depth > MAX_DEPTH {
      return Err(VmError::syntax("parser stack overflow"));
    }
    Ok(())
  }

  fn leave(&mut self) {
    self.depth -= 1;
  }

  fn program(&mut self) -> Result<(), VmError> {
    self.next();
    self.statement_list(TT::EOF)?;
    if self.tok.typ != TT::EOF {
      return Err(self.error());
    }
    self.emit.op(Op::Exit);
    Ok(())
  }
}

/// Compiles `source` into a self-contained bytecode unit.
///
/// `width` is the number of bytes reserved for each forward jump before its distance is known.
pub fn compile(filename: &str, source: &str, width: usize) -> Result<Vec<u8>, VmError> {
  if width > MAX_PLACEHOLDER_WIDTH {
    return Err(VmError::bad_args(format!(
      "placeholder width {width} is out of range 0..={MAX_PLACEHOLDER_WIDTH}"
    )));
  }
  let mut compiler = Compiler::new(source, width);
  compiler.program()?;
  let (code, lines) = compiler.emit.finish();
  let unit = bcode::assemble(filename, &code, &lines)?;
  tracing::debug!(
    target: "mjs_vm::compile",
    filename,
    code_len = code.len(),
    lines = lines.len(),
    "compiled"
  );
  Ok(unit)
}
