use std::fmt;

/// Identifier of a cell inside one of the GC arenas.
///
/// A `CellId` packs a 32-bit slot index with a 16-bit generation so that it fits in the 48-bit
/// payload of a boxed [`crate::Value`]. The generation is bumped every time the slot is freed,
/// which lets arenas reject handles that outlived their cell.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellId(u64);

impl CellId {
  pub(crate) const PAYLOAD_BITS: u32 = 48;

  #[inline]
  pub(crate) fn from_parts(index: u32, generation: u16) -> Self {
    Self((index as u64) | ((generation as u64) << 32))
  }

  #[inline]
  pub(crate) fn from_payload(payload: u64) -> Self {
    debug_assert!(payload >> Self::PAYLOAD_BITS == 0);
    Self(payload)
  }

  #[inline]
  pub(crate) fn payload(self) -> u64 {
    self.0
  }

  #[inline]
  pub fn index(self) -> u32 {
    self.0 as u32
  }

  #[inline]
  pub fn generation(self) -> u16 {
    (self.0 >> 32) as u16
  }
}

impl fmt::Debug for CellId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CellId")
      .field("index", &self.index())
      .field("generation", &self.generation())
      .finish()
  }
}

/// Handle to an object-arena cell (plain objects, arrays, array buffers and their views).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ObjectId(pub(crate) CellId);

/// Handle to a property-arena cell.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct PropertyId(pub(crate) CellId);

/// Handle to a parsed foreign-function signature.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct SigId(pub(crate) CellId);

/// Index of a Rust function registered with [`crate::Vm::register_native`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NativeId(pub(crate) u32);

/// Identifier of an embedder-pinned root. See [`crate::Vm::own`].
///
/// Carries a generation like arena handles, so releasing the same root twice is a no-op instead
/// of freeing whichever root reused the slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct RootId(pub(crate) CellId);

/// Token identifying a live foreign-function callback registration.
///
/// This is the value the native side receives in place of the `userdata` argument; it hands the
/// token back to [`crate::Vm::invoke_callback`] to run the script function.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct CallbackId(pub(crate) u32);

impl CallbackId {
  pub fn to_word(self) -> usize {
    self.0 as usize
  }

  pub fn from_word(word: usize) -> Self {
    Self(word as u32)
  }
}
