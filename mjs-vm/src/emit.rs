//! Bytecode output buffer for the single-pass compiler.
//!
//! Code is normally appended, but the cursor can be moved back to insert code in front of
//! already-emitted instructions (the `for` increment clause is emitted ahead of the condition it
//! textually follows). Forward jumps reserve a fixed-width placeholder that is patched once the
//! target is known; a distance that does not fit is spliced in, and everything recorded at or
//! after the splice point moves up by the same amount.

use crate::buf::ByteBuf;
use crate::error::VmError;
use crate::opcode::ExprOp;
use crate::opcode::Op;
use crate::varint;

/// Largest placeholder width the compiler accepts.
pub const MAX_PLACEHOLDER_WIDTH: usize = 4;

/// Result of patching a placeholder: the operand grew by `diff` bytes at `at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Patch {
  at: usize,
  diff: usize,
}

impl Patch {
  /// Where a position recorded before the patch ended up.
  pub fn moved(self, pos: usize) -> usize {
    if pos >= self.at {
      pos + self.diff
    } else {
      pos
    }
  }
}

pub(crate) struct Emitter {
  code: ByteBuf,
  cursor: usize,
  /// `(code offset, line)`, sorted by offset. An entry covers code up to the next one.
  lines: Vec<(usize, u32)>,
  line: u32,
  width: usize,
}

impl Emitter {
  pub fn new(width: usize) -> Self {
    Self {
      code: ByteBuf::with_size(64),
      cursor: 0,
      lines: Vec::new(),
      line: 1,
      width,
    }
  }

  pub fn pos(&self) -> usize {
    self.cursor
  }

  pub fn set_pos(&mut self, pos: usize) {
    debug_assert!(pos <= self.code.len());
    self.cursor = pos;
  }

  pub fn set_line(&mut self, line: u32) {
    self.line = line;
  }

  fn line_at(&self, pos: usize) -> Option<u32> {
    let i = self.lines.partition_point(|&(off, _)| off <= pos);
    (i > 0).then(|| self.lines[i - 1].1)
  }

  fn shift_lines(&mut self, from: usize, by: usize) {
    for entry in self.lines.iter_mut().filter(|(off, _)| *off >= from) {
      entry.0 += by;
    }
  }

  /// Writes at the cursor and advances it.
  pub fn bytes(&mut self, bytes: &[u8]) {
    if bytes.is_empty() {
      return;
    }
    let at = self.cursor;
    let len = bytes.len();
    let inserting = at < self.code.len();
    let covering = self.line_at(at);
    if inserting {
      self.code.insert(at, bytes);
      self.shift_lines(at, len);
    } else {
      self.code.append(bytes);
    }
    if covering != Some(self.line) {
      let i = self.lines.partition_point(|&(off, _)| off < at);
      match self.lines.get_mut(i) {
        Some(entry) if entry.0 == at && !inserting => entry.1 = self.line,
        _ => self.lines.insert(i, (at, self.line)),
      }
      // Code that followed the insertion point keeps its own line.
      if let (true, Some(prev)) = (inserting, covering) {
        let j = self.lines.partition_point(|&(off, _)| off <= at + len);
        if self.lines.get(j.wrapping_sub(1)).map(|e| e.0) != Some(at + len) {
          self.lines.insert(j, (at + len, prev));
        }
      }
    }
    self.cursor += len;
  }

  pub fn op(&mut self, op: Op) {
    self.bytes(&[op as u8]);
  }

  pub fn expr(&mut self, op: ExprOp) {
    self.bytes(&[Op::Expr as u8, op as u8]);
  }

  pub fn varint(&mut self, v: u64) {
    let mut out = Vec::with_capacity(varint::llen(v));
    varint::encode(v, &mut out);
    self.bytes(&out);
  }

  /// Length-prefixed string operand.
  pub fn str(&mut self, s: &[u8]) {
    self.varint(s.len() as u64);
    self.bytes(s);
  }

  pub fn f64(&mut self, v: f64) {
    self.bytes(&v.to_le_bytes());
  }

  /// Emits `op` followed by a placeholder, returning the placeholder position.
  pub fn jump(&mut self, op: Op) -> usize {
    self.op(op);
    self.placeholder()
  }

  pub fn placeholder(&mut self) -> usize {
    let at = self.cursor;
    self.bytes(&[0u8; MAX_PLACEHOLDER_WIDTH][..self.width]);
    at
  }

  /// Encodes the distance from the end of the placeholder at `at` to `target`.
  pub fn patch(&mut self, at: usize, target: usize) -> Result<Patch, VmError> {
    let end = at + self.width;
    let dist = target
      .checked_sub(end)
      .ok_or_else(|| VmError::internal(format!("backward patch at {at} to {target}")))?;
    let width = varint::llen(dist as u64).max(self.width);
    let mut out = Vec::with_capacity(width);
    varint::encode_padded(dist as u64, width, &mut out);
    self.code.splice(at..end, &out);
    let diff = width - self.width;
    if diff > 0 {
      if self.cursor >= end {
        self.cursor += diff;
      }
      self.shift_lines(end, diff);
    }
    Ok(Patch { at: end, diff })
  }

  pub fn finish(self) -> (Vec<u8>, Vec<(usize, u32)>) {
    (self.code.into_vec(), self.lines)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn narrow_placeholder_splices_and_moves_positions() {
    let mut e = Emitter::new(0);
    let at = e.jump(Op::Jmp);
    let after = e.pos();
    for _ in 0..200 {
      e.op(Op::Nop);
    }
    let target = e.pos();
    let p = e.patch(at, target).unwrap();
    assert_eq!(p.moved(after), after + 2);
    assert_eq!(e.pos(), target + 2);
    let (code, _) = e.finish();
    assert_eq!(varint::decode(&code[1..]), Some((200, 2)));
  }

  #[test]
  fn wide_placeholder_is_padded() {
    let mut e = Emitter::new(3);
    let at = e.jump(Op::JmpFalse);
    e.op(Op::Drop);
    let target = e.pos();
    let p = e.patch(at, target).unwrap();
    assert_eq!(p.moved(0), 0);
    let (code, _) = e.finish();
    assert_eq!(&code[..5], &[Op::JmpFalse as u8, 0x81, 0x80, 0x00, Op::Drop as u8]);
  }

  #[test]
  fn inserted_code_keeps_following_lines() {
    let mut e = Emitter::new(1);
    e.op(Op::PushUndef);
    e.set_line(3);
    let mark = e.pos();
    e.op(Op::PushTrue);
    e.set_pos(mark);
    e.set_line(5);
    e.op(Op::Drop);
    e.set_pos(3);
    let (code, lines) = e.finish();
    assert_eq!(code, vec![Op::PushUndef as u8, Op::Drop as u8, Op::PushTrue as u8]);
    assert_eq!(lines, vec![(0, 1), (1, 5), (2, 3)]);
  }
}
