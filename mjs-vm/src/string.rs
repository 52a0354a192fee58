//! String storage.
//!
//! Strings of up to five bytes live inside the [`Value`]. Longer strings are either *owned*,
//! stored as a record (`varint length`, bytes, NUL) in a flat heap buffer that the collector
//! compacts, or *foreign*, borrowed from the embedder for the lifetime of the program and
//! referenced through a deduplicated table.

use crate::buf::ByteBuf;
use crate::error::VmError;
use crate::value::InlineStr;
use crate::value::StrRepr;
use crate::value::Unpacked;
use crate::value::Value;
use crate::varint;
use ahash::HashMap;
use ahash::HashMapExt;
use std::ops::Deref;

/// Borrowed view of a string value's bytes.
#[derive(Clone, Copy)]
pub enum StrRef<'a> {
  Inline(InlineStr),
  Heap(&'a [u8]),
}

impl Deref for StrRef<'_> {
  type Target = [u8];

  fn deref(&self) -> &[u8] {
    match self {
      StrRef::Inline(s) => s.as_bytes(),
      StrRef::Heap(b) => b,
    }
  }
}

impl std::fmt::Debug for StrRef<'_> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{:?}", String::from_utf8_lossy(self))
  }
}

pub(crate) struct StringHeap {
  buf: ByteBuf,
  gc_ratio: f64,
  foreign: Vec<&'static [u8]>,
  foreign_index: HashMap<(usize, usize), u64>,
}

/// Old-to-new offsets of every owned string that survived a compaction, sorted by old offset.
pub(crate) struct Relocation {
  moves: Vec<(u64, u64)>,
  pub reclaimed: usize,
}

impl Relocation {
  pub fn apply(&self, v: &mut Value) {
    let Unpacked::Str(StrRepr::Owned(old)) = v.unpack() else {
      return;
    };
    if let Ok(i) = self.moves.binary_search_by_key(&old, |&(from, _)| from) {
      let new = self.moves[i].1;
      if new != old {
        if let Ok(moved) = Value::owned_string(new) {
          *v = moved;
        }
      }
    }
  }
}

impl StringHeap {
  pub fn new(size: usize, gc_ratio: f64) -> Self {
    Self {
      buf: ByteBuf::with_size(size),
      gc_ratio,
      foreign: Vec::new(),
      foreign_index: HashMap::new(),
    }
  }

  pub fn len(&self) -> usize {
    self.buf.len()
  }

  pub fn size(&self) -> usize {
    self.buf.size()
  }

  /// Whether occupancy crossed the collection threshold.
  pub fn over_threshold(&self) -> bool {
    self.buf.len() as f64 > self.buf.size() as f64 * self.gc_ratio
  }

  /// Copies `bytes` into a new string value, inline when short enough.
  pub fn alloc(&mut self, bytes: &[u8]) -> Result<Value, VmError> {
    if let Some(v) = Value::inline_string(bytes) {
      return Ok(v);
    }
    let mut record = Vec::with_capacity(bytes.len() + 6);
    varint::encode(bytes.len() as u64, &mut record);
    record.extend_from_slice(bytes);
    record.push(0);
    let at = self.buf.append(&record);
    Ok(Value::owned_string(at as u64)?)
  }

  /// References embedder bytes without copying them. The same slice always yields the same value.
  pub fn foreign(&mut self, bytes: &'static [u8]) -> Result<Value, VmError> {
    if let Some(v) = Value::inline_string(bytes) {
      return Ok(v);
    }
    let key = (bytes.as_ptr() as usize, bytes.len());
    if let Some(&idx) = self.foreign_index.get(&key) {
      return Ok(Value::foreign_string(idx)?);
    }
    let idx = self.foreign.len() as u64;
    let v = Value::foreign_string(idx)?;
    self.foreign.push(bytes);
    self.foreign_index.insert(key, idx);
    Ok(v)
  }

  fn owned(&self, at: u64) -> Option<&[u8]> {
    let at = usize::try_from(at).ok()?;
    let (len, llen) = varint::decode(self.buf.get(at..)?)?;
    let start = at + llen;
    self.buf.get(start..start + usize::try_from(len).ok()?)
  }

  /// Bytes of a string value, or `None` for every other kind of value.
  pub fn get(&self, v: Value) -> Option<StrRef<'_>> {
    match v.unpack() {
      Unpacked::Str(StrRepr::Inline(s)) => Some(StrRef::Inline(s)),
      Unpacked::Str(StrRepr::Owned(at)) => {
        let bytes = self.owned(at);
        debug_assert!(bytes.is_some(), "owned string offset {at} is out of bounds");
        Some(StrRef::Heap(bytes.unwrap_or_default()))
      }
      Unpacked::Str(StrRepr::Foreign(idx)) => {
        let bytes = usize::try_from(idx).ok().and_then(|i| self.foreign.get(i));
        Some(StrRef::Heap(bytes.copied().unwrap_or_default()))
      }
      _ => None,
    }
  }

  /// Slides every record whose offset is in `live` down over the dead ones and truncates the
  /// buffer after the last survivor.
  pub fn compact(&mut self, mut live: Vec<u64>) -> Relocation {
    live.sort_unstable();
    live.dedup();
    let before = self.buf.len();
    let mut moves = Vec::with_capacity(live.len());
    let mut dest = 0usize;
    for at in live {
      let Ok(at_usize) = usize::try_from(at) else {
        continue;
      };
      let Some((len, llen)) = self.buf.get(at_usize..).and_then(varint::decode) else {
        continue;
      };
      let record = llen + len as usize + 1;
      if at_usize != dest {
        self.buf.move_within(at_usize..at_usize + record, dest);
      }
      moves.push((at, dest as u64));
      dest += record;
    }
    self.buf.truncate(dest);
    Relocation {
      moves,
      reclaimed: before - dest,
    }
  }

  pub fn trim(&mut self, slack: usize) {
    self.buf.trim(slack);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn compaction_slides_survivors_and_rewrites_referents() {
    let mut heap = StringHeap::new(64, 0.9);
    let dead = heap.alloc(b"dead string").unwrap();
    let mut live = heap.alloc(b"live string").unwrap();
    let Unpacked::Str(StrRepr::Owned(live_at)) = live.unpack() else {
      panic!("expected an owned string");
    };
    assert_ne!(dead, live);
    let relocation = heap.compact(vec![live_at, live_at]);
    relocation.apply(&mut live);
    assert_eq!(&*heap.get(live).unwrap(), b"live string");
    assert_eq!(heap.len(), 1 + 11 + 1);
    assert_eq!(relocation.reclaimed, 13);
  }

  #[test]
  fn foreign_strings_are_deduplicated() {
    static TEXT: &[u8] = b"a foreign string";
    let mut heap = StringHeap::new(16, 0.9);
    let a = heap.foreign(TEXT).unwrap();
    let b = heap.foreign(TEXT).unwrap();
    assert_eq!(a, b);
    assert_eq!(&*heap.get(a).unwrap(), TEXT);
    assert_eq!(heap.len(), 0);
  }
}
