use crate::handle::CellId;

/// Occupancy snapshot of one arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArenaStats {
  /// Blocks currently held.
  pub blocks: usize,
  /// Cells holding a live struct.
  pub live: usize,
  /// Cells on the free list.
  pub free: usize,
}

/// Result of one sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepStats {
  pub freed: usize,
  pub released_blocks: usize,
}

#[inline]
fn is_marked(marks: &[u64], index: usize) -> bool {
  marks[index / 64] & (1u64 << (index % 64)) != 0
}

struct Block<T> {
  cells: Box<[Option<T>]>,
  used: usize,
}

impl<T> Block<T> {
  fn new(cells: usize) -> Self {
    Self {
      cells: (0..cells).map(|_| None).collect(),
      used: 0,
    }
  }
}

/// Fixed-size-cell allocator for one managed struct kind.
///
/// Cells are grouped in blocks of `cells_per_block`. A cell's global index is
/// `block * cells_per_block + offset`; generations and mark bits are indexed the same way and
/// outlive released blocks, so a handle into a released block is still recognized as stale.
/// Block 0 is never released.
pub(crate) struct Arena<T> {
  name: &'static str,
  cells_per_block: usize,
  reserve: usize,
  blocks: Vec<Option<Block<T>>>,
  generations: Vec<u16>,
  marks: Vec<u64>,
  free: Vec<u32>,
}

impl<T> Arena<T> {
  pub fn new(name: &'static str, cells_per_block: usize, reserve: usize) -> Self {
    let mut arena = Self {
      name,
      cells_per_block: cells_per_block.max(1),
      reserve,
      blocks: Vec::new(),
      generations: Vec::new(),
      marks: Vec::new(),
      free: Vec::new(),
    };
    arena.add_block();
    arena
  }

  fn add_block(&mut self) {
    let block_idx = match self.blocks.iter().position(Option::is_none) {
      Some(vacant) => {
        self.blocks[vacant] = Some(Block::new(self.cells_per_block));
        vacant
      }
      None => {
        self.blocks.push(Some(Block::new(self.cells_per_block)));
        self.blocks.len() - 1
      }
    };
    let slots = self.blocks.len() * self.cells_per_block;
    if self.generations.len() < slots {
      self.generations.resize(slots, 0);
      self.marks.resize(slots.div_ceil(64), 0);
    }
    let start = block_idx * self.cells_per_block;
    // Reverse so that pops hand out ascending indices.
    self
      .free
      .extend((start..start + self.cells_per_block).rev().map(|i| i as u32));
    tracing::trace!(target: "mjs_vm::gc", arena = self.name, block = block_idx, "block added");
  }

  #[inline]
  fn locate(&self, index: u32) -> (usize, usize) {
    let index = index as usize;
    (index / self.cells_per_block, index % self.cells_per_block)
  }

  /// Claims a cell. The flag reports that the free list dropped below the reserve and a
  /// collection should run at the next safe point.
  pub fn alloc(&mut self, value: T) -> (CellId, bool) {
    if self.free.is_empty() {
      self.add_block();
    }
    let index = match self.free.pop() {
      Some(index) => index,
      None => unreachable!("a fresh block always refills the free list"),
    };
    let (b, c) = self.locate(index);
    let block = match self.blocks[b].as_mut() {
      Some(block) => block,
      None => unreachable!("free list only holds indices of present blocks"),
    };
    debug_assert!(block.cells[c].is_none());
    block.cells[c] = Some(value);
    block.used += 1;
    let id = CellId::from_parts(index, self.generations[index as usize]);
    (id, self.below_reserve())
  }

  fn slot(&self, id: CellId) -> Option<(usize, usize)> {
    let index = id.index();
    if *self.generations.get(index as usize)? != id.generation() {
      return None;
    }
    let (b, c) = self.locate(index);
    let block = self.blocks.get(b)?.as_ref()?;
    block.cells[c].as_ref()?;
    Some((b, c))
  }

  pub fn get(&self, id: CellId) -> Option<&T> {
    let (b, c) = self.slot(id)?;
    self.blocks[b].as_ref()?.cells[c].as_ref()
  }

  pub fn get_mut(&mut self, id: CellId) -> Option<&mut T> {
    let (b, c) = self.slot(id)?;
    self.blocks[b].as_mut()?.cells[c].as_mut()
  }

  /// Sets the mark bit. Returns `true` only the first time a live cell is marked.
  pub fn mark(&mut self, id: CellId) -> bool {
    if self.slot(id).is_none() {
      return false;
    }
    let index = id.index() as usize;
    let (word, bit) = (index / 64, 1u64 << (index % 64));
    if self.marks[word] & bit != 0 {
      return false;
    }
    self.marks[word] |= bit;
    true
  }

  /// Frees every unmarked cell, releases emptied blocks other than block 0, clears all marks
  /// and rebuilds the free list.
  pub fn sweep(&mut self) -> SweepStats {
    let mut stats = SweepStats::default();
    for b in 0..self.blocks.len() {
      let Some(block) = self.blocks[b].as_mut() else {
        continue;
      };
      let base = b * self.cells_per_block;
      for c in 0..self.cells_per_block {
        let index = base + c;
        if block.cells[c].is_some() && !is_marked(&self.marks, index) {
          // Dropping the value runs its teardown.
          block.cells[c] = None;
          block.used -= 1;
          self.generations[index] = self.generations[index].wrapping_add(1);
          stats.freed += 1;
        }
      }
      if block.used == 0 && b != 0 {
        self.blocks[b] = None;
        stats.released_blocks += 1;
      }
    }
    self.marks.iter_mut().for_each(|w| *w = 0);

    self.free.clear();
    for b in (0..self.blocks.len()).rev() {
      let Some(block) = self.blocks[b].as_ref() else {
        continue;
      };
      let base = b * self.cells_per_block;
      for c in (0..self.cells_per_block).rev() {
        if block.cells[c].is_none() {
          self.free.push((base + c) as u32);
        }
      }
    }
    while matches!(self.blocks.last(), Some(None)) {
      self.blocks.pop();
    }
    stats
  }

  /// Visits every live cell.
  pub fn for_each_mut(&mut self, mut f: impl FnMut(CellId, &mut T)) {
    let cells_per_block = self.cells_per_block;
    for (b, block) in self.blocks.iter_mut().enumerate() {
      let Some(block) = block.as_mut() else {
        continue;
      };
      for (c, cell) in block.cells.iter_mut().enumerate() {
        if let Some(value) = cell.as_mut() {
          let index = b * cells_per_block + c;
          f(
            CellId::from_parts(index as u32, self.generations[index]),
            value,
          );
        }
      }
    }
  }

  pub fn stats(&self) -> ArenaStats {
    let blocks = self.blocks.iter().filter(|b| b.is_some()).count();
    let live = self
      .blocks
      .iter()
      .flatten()
      .map(|b| b.used)
      .sum();
    ArenaStats {
      blocks,
      live,
      free: self.free.len(),
    }
  }

  fn below_reserve(&self) -> bool {
    self.free.len() < self.reserve
  }

  #[cfg(test)]
  fn marked_count(&self) -> usize {
    (0..self.generations.len())
      .filter(|&i| is_marked(&self.marks, i))
      .count()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn stale_handles_are_rejected_after_sweep() {
    let mut arena: Arena<u32> = Arena::new("test", 4, 0);
    let (a, _) = arena.alloc(1);
    let (b, _) = arena.alloc(2);
    assert!(arena.mark(b));
    assert!(!arena.mark(b));
    let stats = arena.sweep();
    assert_eq!(stats.freed, 1);
    assert_eq!(arena.get(a), None);
    assert_eq!(arena.get(b), Some(&2));
    assert_eq!(arena.marked_count(), 0);

    let (c, _) = arena.alloc(3);
    assert_eq!(c.index(), a.index());
    assert_ne!(c.generation(), a.generation());
    assert_eq!(arena.get(a), None);
  }

  #[test]
  fn empty_blocks_other_than_the_first_are_released() {
    let mut arena: Arena<u32> = Arena::new("test", 2, 0);
    let ids: Vec<_> = (0..6).map(|i| arena.alloc(i).0).collect();
    assert_eq!(arena.stats().blocks, 3);
    arena.mark(ids[0]);
    let stats = arena.sweep();
    assert_eq!(stats.freed, 5);
    assert_eq!(stats.released_blocks, 2);
    assert_eq!(arena.stats(), ArenaStats { blocks: 1, live: 1, free: 1 });
    // A handle into a released block stays stale when the block comes back.
    let again: Vec<_> = (0..3).map(|i| arena.alloc(i).0).collect();
    assert!(again.iter().all(|id| *id != ids[3]));
    assert_eq!(arena.get(ids[3]), None);
  }

  #[test]
  fn reserve_signals_collection() {
    let mut arena: Arena<u8> = Arena::new("test", 4, 2);
    assert!(!arena.alloc(0).1);
    assert!(!arena.alloc(0).1);
    assert!(arena.alloc(0).1);
  }
}
