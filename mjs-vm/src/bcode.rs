//! Compiled units and the global bytecode address space.
//!
//! A unit is self-describing:
//!
//! ```text
//! [BCODE_HDR] [total: u32] [code: u32] [map: u32] filename \0 code... EXIT [map]
//! ```
//!
//! The three header words are little-endian offsets relative to the start of the unit. The map
//! is a varint byte length followed by `(offset delta, line)` varint pairs, offsets counted from
//! the code start. Committed units are laid end to end; a function value holds an offset into
//! this shared space.

use crate::error::VmError;
use crate::opcode::Op;
use crate::varint;
use std::sync::Arc;

pub(crate) const HEADER_LEN: usize = 1 + 3 * 4;

/// One committed unit.
#[derive(Debug, Clone)]
pub(crate) struct Part {
  /// Global offset of the unit's first byte.
  pub start: usize,
  pub data: Arc<[u8]>,
  pub filename: Arc<str>,
  /// Unit-relative offset of the first instruction.
  pub code_start: usize,
  /// `(unit-relative offset, line)`, sorted by offset.
  pub lines: Vec<(usize, u32)>,
  /// Whether the last execution of the top-level code succeeded.
  pub exec_result: Option<bool>,
}

impl Part {
  pub fn end(&self) -> usize {
    self.start + self.data.len()
  }

  fn line_at(&self, rel: usize) -> u32 {
    let i = self.lines.partition_point(|&(off, _)| off <= rel);
    if i == 0 {
      1
    } else {
      self.lines[i - 1].1
    }
  }
}

fn header_word(data: &[u8], i: usize) -> Option<usize> {
  let at = 1 + 4 * i;
  let bytes: [u8; 4] = data.get(at..at + 4)?.try_into().ok()?;
  Some(u32::from_le_bytes(bytes) as usize)
}

/// `(total, code, map)` of a unit header, if the header is well formed.
pub(crate) fn read_header(data: &[u8]) -> Option<(usize, usize, usize)> {
  if data.first() != Some(&(Op::BcodeHeader as u8)) {
    return None;
  }
  let total = header_word(data, 0)?;
  let code = header_word(data, 1)?;
  let map = header_word(data, 2)?;
  (total == data.len() && HEADER_LEN < code && code <= map && map <= total)
    .then_some((total, code, map))
}

fn encode_u32(v: usize, out: &mut Vec<u8>) -> Result<(), VmError> {
  let v = u32::try_from(v).map_err(|_| VmError::internal("bytecode unit is too large"))?;
  out.extend_from_slice(&v.to_le_bytes());
  Ok(())
}

/// Wraps compiled code in a unit. `code` must already end with `EXIT`.
pub(crate) fn assemble(
  filename: &str,
  code: &[u8],
  lines: &[(usize, u32)],
) -> Result<Vec<u8>, VmError> {
  let mut map = Vec::new();
  let mut prev = 0usize;
  for &(off, line) in lines {
    varint::encode((off - prev) as u64, &mut map);
    varint::encode(line as u64, &mut map);
    prev = off;
  }
  let mut map_section = Vec::with_capacity(map.len() + 4);
  varint::encode(map.len() as u64, &mut map_section);
  map_section.extend_from_slice(&map);

  let name = filename.replace('\0', "");
  let code_start = HEADER_LEN + name.len() + 1;
  let map_start = code_start + code.len();
  let total = map_start + map_section.len();

  let mut out = Vec::with_capacity(total);
  out.push(Op::BcodeHeader as u8);
  encode_u32(total, &mut out)?;
  encode_u32(code_start, &mut out)?;
  encode_u32(map_start, &mut out)?;
  out.extend_from_slice(name.as_bytes());
  out.push(0);
  out.extend_from_slice(code);
  out.extend_from_slice(&map_section);
  Ok(out)
}

fn decode_map(section: &[u8], code_start: usize) -> Option<Vec<(usize, u32)>> {
  let (len, llen) = varint::decode(section)?;
  let mut rest = section.get(llen..llen + usize::try_from(len).ok()?)?;
  let mut lines = Vec::new();
  let mut off = code_start;
  while !rest.is_empty() {
    let (delta, a) = varint::decode(rest)?;
    let (line, b) = varint::decode(&rest[a..])?;
    off += usize::try_from(delta).ok()?;
    lines.push((off, u32::try_from(line).ok()?));
    rest = &rest[a + b..];
  }
  Some(lines)
}

#[derive(Debug, Default)]
pub(crate) struct Bytecode {
  parts: Vec<Part>,
  len: usize,
}

impl Bytecode {
  /// Validates a unit and appends it to the address space, returning the part index.
  pub fn commit(&mut self, data: Vec<u8>) -> Result<usize, VmError> {
    let malformed = || VmError::internal("malformed bytecode header");
    let (_, code_start, map_start) = read_header(&data).ok_or_else(malformed)?;
    let name = &data[HEADER_LEN..code_start - 1];
    if data[code_start - 1] != 0 || name.contains(&0) {
      return Err(malformed());
    }
    let filename: Arc<str> = String::from_utf8_lossy(name).into();
    let lines = decode_map(&data[map_start..], code_start).ok_or_else(malformed)?;
    let start = self.len;
    self.len += data.len();
    self.parts.push(Part {
      start,
      data: data.into(),
      filename,
      code_start,
      lines,
      exec_result: None,
    });
    tracing::debug!(
      target: "mjs_vm::compile",
      start,
      len = self.len - start,
      filename = %self.parts[self.parts.len() - 1].filename,
      "committed part"
    );
    Ok(self.parts.len() - 1)
  }

  pub fn parts(&self) -> &[Part] {
    &self.parts
  }

  pub fn part_mut(&mut self, index: usize) -> Option<&mut Part> {
    self.parts.get_mut(index)
  }

  pub fn part_index(&self, offset: usize) -> Option<usize> {
    let i = self.parts.partition_point(|p| p.start <= offset);
    (i > 0 && offset < self.parts[i - 1].end()).then(|| i - 1)
  }

  pub fn part(&self, offset: usize) -> Result<&Part, VmError> {
    self
      .part_index(offset)
      .map(|i| &self.parts[i])
      .ok_or_else(|| VmError::internal(format!("bytecode offset {offset} is out of range")))
  }

  pub fn line_for_offset(&self, offset: usize) -> Option<u32> {
    let part = &self.parts[self.part_index(offset)?];
    Some(part.line_at(offset - part.start))
  }

  pub fn filename_for_offset(&self, offset: usize) -> Option<Arc<str>> {
    Some(self.parts[self.part_index(offset)?].filename.clone())
  }

  /// The most recent part compiled from `filename`.
  pub fn find_by_filename(&self, filename: &str) -> Option<usize> {
    self.parts.iter().rposition(|p| &*p.filename == filename)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parts_share_one_address_space() {
    let mut bcode = Bytecode::default();
    let code = [Op::PushUndef as u8, Op::Drop as u8, Op::Exit as u8];
    let a = assemble("a.js", &code, &[(0, 1), (1, 4)]).unwrap();
    let a_len = a.len();
    let b = assemble("b.js", &code, &[(0, 7)]).unwrap();
    bcode.commit(a).unwrap();
    bcode.commit(b).unwrap();

    let a_code = HEADER_LEN + "a.js".len() + 1;
    assert_eq!(bcode.line_for_offset(a_code), Some(1));
    assert_eq!(bcode.line_for_offset(a_code + 2), Some(4));
    assert_eq!(bcode.line_for_offset(0), Some(1));
    assert_eq!(bcode.filename_for_offset(a_len).as_deref(), Some("b.js"));
    assert_eq!(bcode.line_for_offset(a_len + HEADER_LEN + 5), Some(7));
    assert_eq!(bcode.line_for_offset(usize::MAX), None);
  }

  #[test]
  fn corrupt_header_is_rejected() {
    let mut unit = assemble("x", &[Op::Exit as u8], &[]).unwrap();
    unit[1] ^= 1;
    let err = Bytecode::default().commit(unit).unwrap_err();
    assert_eq!(err.to_string(), "malformed bytecode header");
  }
}
