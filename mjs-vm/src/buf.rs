use std::ops::Deref;
use std::ops::DerefMut;
use std::ops::Range;

/// Growth factor applied when an append does not fit.
const GROWTH_NUM: usize = 3;
const GROWTH_DEN: usize = 2;

/// A growable byte buffer with an explicit reserved size.
///
/// The reserved size is tracked separately from the backing vector's capacity so that callers
/// can reason about occupancy (the string heap triggers a collection at a fixed ratio of
/// `len / size`) independently of how the allocator rounds requests.
#[derive(Debug, Default, Clone)]
pub struct ByteBuf {
  data: Vec<u8>,
  size: usize,
}

impl ByteBuf {
  pub fn with_size(size: usize) -> Self {
    Self {
      data: Vec::with_capacity(size),
      size,
    }
  }

  /// Reserved size in bytes.
  pub fn size(&self) -> usize {
    self.size
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  fn grow_for(&mut self, extra: usize) {
    let needed = self.data.len() + extra;
    if needed <= self.size {
      return;
    }
    let mut new_size = self.size.max(16);
    while new_size < needed {
      new_size = new_size * GROWTH_NUM / GROWTH_DEN + 1;
    }
    self.data.reserve_exact(new_size - self.data.len());
    self.size = new_size;
  }

  /// Sets the reserved size, never below the current length.
  pub fn resize(&mut self, new_size: usize) {
    let new_size = new_size.max(self.data.len());
    if new_size > self.data.capacity() {
      self.data.reserve_exact(new_size - self.data.len());
    } else {
      self.data.shrink_to(new_size);
    }
    self.size = new_size;
  }

  /// Shrinks the reserved size to the current length plus `slack`.
  pub fn trim(&mut self, slack: usize) {
    let target = self.data.len() + slack;
    if target < self.size {
      self.resize(target);
    }
  }

  /// Appends bytes, returning the offset they were written at.
  pub fn append(&mut self, bytes: &[u8]) -> usize {
    self.grow_for(bytes.len());
    let at = self.data.len();
    self.data.extend_from_slice(bytes);
    at
  }

  /// Inserts bytes at `at`, moving the tail up.
  pub fn insert(&mut self, at: usize, bytes: &[u8]) {
    self.grow_for(bytes.len());
    self.data.splice(at..at, bytes.iter().copied());
  }

  /// Replaces `range` with `bytes`, which may be longer or shorter.
  pub fn splice(&mut self, range: Range<usize>, bytes: &[u8]) {
    let removed = range.end - range.start;
    if bytes.len() > removed {
      self.grow_for(bytes.len() - removed);
    }
    self.data.splice(range, bytes.iter().copied());
  }

  pub fn truncate(&mut self, len: usize) {
    self.data.truncate(len);
  }

  /// Moves `src` so it starts at `dest`; the ranges may overlap.
  pub fn move_within(&mut self, src: Range<usize>, dest: usize) {
    self.data.copy_within(src, dest);
  }

  pub fn into_vec(self) -> Vec<u8> {
    self.data
  }
}

impl Deref for ByteBuf {
  type Target = [u8];

  fn deref(&self) -> &[u8] {
    &self.data
  }
}

impl DerefMut for ByteBuf {
  fn deref_mut(&mut self) -> &mut [u8] {
    &mut self.data
  }
}
