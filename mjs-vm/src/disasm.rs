//! Human-readable bytecode listings.

use crate::bcode;
use crate::opcode::ExprOp;
use crate::opcode::Op;
use crate::varint;
use std::fmt::Write;

struct Reader<'a> {
  data: &'a [u8],
  pos: usize,
}

impl<'a> Reader<'a> {
  fn byte(&mut self) -> Option<u8> {
    let b = *self.data.get(self.pos)?;
    self.pos += 1;
    Some(b)
  }

  fn varint(&mut self) -> Option<usize> {
    let (v, len) = varint::decode(self.data.get(self.pos..)?)?;
    self.pos += len;
    usize::try_from(v).ok()
  }

  fn bytes(&mut self, len: usize) -> Option<&'a [u8]> {
    let out = self.data.get(self.pos..self.pos.checked_add(len)?)?;
    self.pos += len;
    Some(out)
  }
}

fn quote(out: &mut String, s: &[u8]) {
  out.push('"');
  for &b in s {
    match b {
      b'"' => out.push_str("\\\""),
      b'\\' => out.push_str("\\\\"),
      b'\n' => out.push_str("\\n"),
      0x20..=0x7e => out.push(b as char),
      _ => {
        let _ = write!(out, "\\x{b:02x}");
      }
    }
  }
  out.push('"');
}

/// Writes the operands of the instruction at `at`. Returns `None` if they are truncated.
fn operands(out: &mut String, op: Op, r: &mut Reader, base: usize, at: usize) -> Option<()> {
  match op {
    _ if op.is_jump() => {
      let dist = r.varint()?;
      let _ = write!(out, "  {}", base + r.pos + dist);
    }
    Op::Loop => {
      let b = r.varint()?;
      let brk = base + r.pos + b;
      let c = r.varint()?;
      let cont = base + r.pos + c;
      let _ = write!(out, "  B:{brk} C:{cont}");
    }
    Op::Expr => {
      let b = r.byte()?;
      match ExprOp::from_u8(b) {
        Some(e) => {
          let _ = write!(out, "  {}", e.symbol());
        }
        None => {
          let _ = write!(out, "  ??? ({b})");
        }
      }
    }
    Op::PushStr => {
      let len = r.varint()?;
      out.push_str("  ");
      quote(out, r.bytes(len)?);
    }
    Op::PushInt => {
      let _ = write!(out, "  {}", r.varint()?);
    }
    Op::PushDbl => {
      let bytes: [u8; 8] = r.bytes(8)?.try_into().ok()?;
      let _ = write!(out, "  {}", f64::from_le_bytes(bytes));
    }
    Op::PushFunc => {
      let n = r.varint()?;
      let _ = write!(out, "  {}", (base + at).checked_sub(n)?);
    }
    Op::SetArg => {
      let n = r.varint()?;
      let len = r.varint()?;
      let name = r.bytes(len)?;
      let _ = write!(out, "  [{}] {n}", String::from_utf8_lossy(name));
    }
    _ => {}
  }
  Some(())
}

/// Appends a listing of the unit `unit`, whose first byte sits at global offset `base`.
pub(crate) fn write_unit(out: &mut String, unit: &[u8], base: usize) {
  let Some((total, code_start, map_start)) = bcode::read_header(unit) else {
    let _ = writeln!(out, "{base}\t???  malformed header");
    return;
  };
  let name = unit
    .get(bcode::HEADER_LEN..code_start - 1)
    .map(String::from_utf8_lossy)
    .unwrap_or_default();
  let _ = writeln!(
    out,
    "{base}\t{}  [{name}] size:{total} code:{code_start} map:{map_start}",
    Op::BcodeHeader.name()
  );

  let mut r = Reader {
    data: &unit[..map_start],
    pos: code_start,
  };
  while r.pos < map_start {
    let at = r.pos;
    let Some(byte) = r.byte() else {
      break;
    };
    let Some(op) = Op::from_u8(byte) else {
      let _ = writeln!(out, "{}\t???  ({byte})", base + at);
      continue;
    };
    let _ = write!(out, "{}\t{}", base + at, op.name());
    let complete = operands(out, op, &mut r, base, at).is_some();
    out.push('\n');
    if !complete {
      break;
    }
  }
}

/// Listing of a compiled unit as returned by [`crate::compile`], with offsets relative to its
/// first byte.
pub fn disassemble(unit: &[u8]) -> String {
  let mut out = String::new();
  write_unit(&mut out, unit, 0);
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::compile::compile;

  #[test]
  fn lists_header_and_operands() {
    let unit = compile("t.js", "let s = 'a\\n'; if (s) 1.5;", 1).unwrap();
    let text = disassemble(&unit);
    let first = text.lines().next().unwrap();
    assert!(first.starts_with("0\tBCODE_HDR  [t.js] size:"));
    assert!(text.contains("PUSH_STR  \"a\\n\""));
    assert!(text.contains("PUSH_DBL  1.5"));
    assert!(text.contains("EXPR  ="));
    assert!(text.lines().last().unwrap().ends_with("EXIT"));
  }

  #[test]
  fn jump_targets_are_absolute() {
    let unit = compile("t.js", "if (true) 1;", 1).unwrap();
    let text = disassemble(&unit);
    let line = text.lines().find(|l| l.contains("JMP_FALSE")).unwrap();
    let target: usize = line.rsplit(' ').next().unwrap().parse().unwrap();
    let exit = text.lines().find(|l| l.ends_with("EXIT")).unwrap();
    let exit_at: usize = exit.split('\t').next().unwrap().parse().unwrap();
    assert_eq!(target, exit_at);
  }
}
