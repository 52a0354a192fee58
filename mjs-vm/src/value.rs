//! Boxed value encoding.
//!
//! A [`Value`] is a single `u64`. Any bit pattern outside the reserved NaN space is an IEEE-754
//! double. Inside the reserved space (all exponent bits set and a non-zero 4-bit tag nibble just
//! below the exponent) the sign bit and the nibble select a tag and the low 48 bits carry the
//! payload: a cell handle, a bytecode offset, a pointer, a string heap offset, or up to five
//! inline string bytes.
//!
//! All bit manipulation lives here. The rest of the crate inspects values through
//! [`Value::unpack`] and builds them through the constructors below.

use crate::handle::CellId;
use crate::handle::NativeId;
use crate::handle::ObjectId;
use crate::handle::SigId;
use std::fmt;

const EXP_MASK: u64 = 0x7FF0_0000_0000_0000;
const NIBBLE_MASK: u64 = 0x000F_0000_0000_0000;
const TAG_MASK: u64 = 0xFFFF_0000_0000_0000;
const PAYLOAD_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;
const TAG_SHIFT: u32 = 48;

const fn make_tag(sign: u64, nibble: u64) -> u64 {
  (sign << 63) | EXP_MASK | (nibble << TAG_SHIFT)
}

const TAG_OBJECT: u64 = make_tag(1, 0x1);
const TAG_FOREIGN: u64 = make_tag(1, 0x2);
const TAG_UNDEFINED: u64 = make_tag(1, 0x3);
const TAG_BOOLEAN: u64 = make_tag(1, 0x4);
const TAG_NAN: u64 = make_tag(1, 0x5);
const TAG_STRING_INLINE: u64 = make_tag(1, 0x6);
const TAG_STRING_5: u64 = make_tag(1, 0x7);
const TAG_STRING_OWNED: u64 = make_tag(1, 0x8);
const TAG_STRING_FOREIGN: u64 = make_tag(1, 0x9);
const TAG_NATIVE: u64 = make_tag(1, 0xA);
// 0xB is left unassigned.
const TAG_ARRAY: u64 = make_tag(1, 0xC);
const TAG_FUNCTION: u64 = make_tag(1, 0xD);
const TAG_FFI_SIG: u64 = make_tag(1, 0xE);
const TAG_NULL: u64 = make_tag(1, 0xF);
const TAG_ARRAY_BUF: u64 = make_tag(0, 0x1);
const TAG_ARRAY_BUF_VIEW: u64 = make_tag(0, 0x2);

/// Longest string stored directly inside the value.
pub const MAX_INLINE_STRING: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
  #[error("pointer {0:#x} is not a canonical 48-bit address")]
  NonCanonicalPointer(usize),
  #[error("payload {0:#x} does not fit in 48 bits")]
  PayloadOverflow(u64),
  #[error("bit pattern {0:#018x} carries an unknown tag")]
  UnknownTag(u64),
}

/// Which of the four string representations a string value uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringKind {
  /// Zero to four bytes, length stored in the payload.
  Inline,
  /// Exactly five bytes filling the payload.
  Inline5,
  /// Varint-length-prefixed bytes inside the owned-string heap.
  Owned,
  /// Externally owned bytes, referenced through the foreign-string table.
  Foreign,
}

/// Short string bytes stored inside a value.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct InlineStr {
  len: u8,
  bytes: [u8; MAX_INLINE_STRING],
}

impl InlineStr {
  pub fn as_bytes(&self) -> &[u8] {
    &self.bytes[..self.len as usize]
  }
}

impl fmt::Debug for InlineStr {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:?}", String::from_utf8_lossy(self.as_bytes()))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrRepr {
  Inline(InlineStr),
  /// Offset of the string record in the owned-string heap.
  Owned(u64),
  /// Index into the foreign-string table.
  Foreign(u64),
}

/// Decoded form of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Unpacked {
  /// Any double, including the engine NaN (reported as `f64::NAN`).
  Number(f64),
  Boolean(bool),
  Null,
  Undefined,
  Str(StrRepr),
  Object(ObjectId),
  Array(ObjectId),
  ArrayBuffer(ObjectId),
  DataView(ObjectId),
  /// Compiled function: global bytecode offset of its prologue.
  Function(u64),
  Native(NativeId),
  FfiSig(SigId),
  Foreign(usize),
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Value(u64);

impl Value {
  pub const UNDEFINED: Value = Value(TAG_UNDEFINED);
  pub const NULL: Value = Value(TAG_NULL);
  pub const TRUE: Value = Value(TAG_BOOLEAN | 1);
  pub const FALSE: Value = Value(TAG_BOOLEAN);
  /// The engine NaN. Every NaN produced by arithmetic is normalized to this value.
  pub const NAN: Value = Value(TAG_NAN);
  pub const EMPTY_STRING: Value = Value(TAG_STRING_INLINE);

  #[inline]
  fn tagged(tag: u64, payload: u64) -> Value {
    debug_assert!(payload & !PAYLOAD_MASK == 0);
    Value(tag | payload)
  }

  #[inline]
  fn is_tagged(bits: u64) -> bool {
    bits & EXP_MASK == EXP_MASK && bits & NIBBLE_MASK != 0
  }

  #[inline]
  fn tag(self) -> Option<u64> {
    Self::is_tagged(self.0).then_some(self.0 & TAG_MASK)
  }

  #[inline]
  fn payload(self) -> u64 {
    self.0 & PAYLOAD_MASK
  }

  pub fn number(n: f64) -> Value {
    if n.is_nan() {
      return Value::NAN;
    }
    let bits = n.to_bits();
    debug_assert!(!Self::is_tagged(bits));
    Value(bits)
  }

  pub fn boolean(b: bool) -> Value {
    if b {
      Value::TRUE
    } else {
      Value::FALSE
    }
  }

  pub(crate) fn object(id: ObjectId) -> Value {
    Self::tagged(TAG_OBJECT, id.0.payload())
  }

  pub(crate) fn array(id: ObjectId) -> Value {
    Self::tagged(TAG_ARRAY, id.0.payload())
  }

  pub(crate) fn array_buffer(id: ObjectId) -> Value {
    Self::tagged(TAG_ARRAY_BUF, id.0.payload())
  }

  pub(crate) fn data_view(id: ObjectId) -> Value {
    Self::tagged(TAG_ARRAY_BUF_VIEW, id.0.payload())
  }

  pub(crate) fn ffi_sig(id: SigId) -> Value {
    Self::tagged(TAG_FFI_SIG, id.0.payload())
  }

  pub(crate) fn native(id: NativeId) -> Value {
    Self::tagged(TAG_NATIVE, id.0 as u64)
  }

  /// A compiled function starting at the given global bytecode offset.
  pub fn function(offset: u64) -> Result<Value, ValueError> {
    if offset & !PAYLOAD_MASK != 0 {
      return Err(ValueError::PayloadOverflow(offset));
    }
    Ok(Self::tagged(TAG_FUNCTION, offset))
  }

  /// A foreign pointer. Rejects addresses whose upper 16 bits are not a sign extension of bit 47.
  pub fn foreign(addr: usize) -> Result<Value, ValueError> {
    let wide = addr as u64;
    let upper = wide >> 47;
    if upper != 0 && upper != (u64::MAX >> 47) {
      return Err(ValueError::NonCanonicalPointer(addr));
    }
    Ok(Self::tagged(TAG_FOREIGN, wide & PAYLOAD_MASK))
  }

  /// Packs up to [`MAX_INLINE_STRING`] bytes into the value itself.
  pub(crate) fn inline_string(bytes: &[u8]) -> Option<Value> {
    match bytes.len() {
      len @ 0..=4 => {
        let mut payload = len as u64;
        for (i, b) in bytes.iter().enumerate() {
          payload |= (*b as u64) << (8 * (i + 1));
        }
        Some(Self::tagged(TAG_STRING_INLINE, payload))
      }
      MAX_INLINE_STRING => {
        let mut payload = 0u64;
        for (i, b) in bytes.iter().enumerate() {
          payload |= (*b as u64) << (8 * i);
        }
        Some(Self::tagged(TAG_STRING_5, payload))
      }
      _ => None,
    }
  }

  pub(crate) fn owned_string(offset: u64) -> Result<Value, ValueError> {
    if offset & !PAYLOAD_MASK != 0 {
      return Err(ValueError::PayloadOverflow(offset));
    }
    Ok(Self::tagged(TAG_STRING_OWNED, offset))
  }

  pub(crate) fn foreign_string(index: u64) -> Result<Value, ValueError> {
    if index & !PAYLOAD_MASK != 0 {
      return Err(ValueError::PayloadOverflow(index));
    }
    Ok(Self::tagged(TAG_STRING_FOREIGN, index))
  }

  pub fn to_bits(self) -> u64 {
    self.0
  }

  /// Reinterprets raw bits, rejecting reserved patterns that carry no known tag.
  pub fn from_bits(bits: u64) -> Result<Value, ValueError> {
    let v = Value(bits);
    if v.try_unpack().is_none() {
      return Err(ValueError::UnknownTag(bits));
    }
    Ok(v)
  }

  fn try_unpack(self) -> Option<Unpacked> {
    let Some(tag) = self.tag() else {
      return Some(Unpacked::Number(f64::from_bits(self.0)));
    };
    let payload = self.payload();
    let cell = || CellId::from_payload(payload);
    Some(match tag {
      TAG_NAN => Unpacked::Number(f64::NAN),
      TAG_UNDEFINED => Unpacked::Undefined,
      TAG_NULL => Unpacked::Null,
      TAG_BOOLEAN => Unpacked::Boolean(payload & 1 != 0),
      TAG_OBJECT => Unpacked::Object(ObjectId(cell())),
      TAG_ARRAY => Unpacked::Array(ObjectId(cell())),
      TAG_ARRAY_BUF => Unpacked::ArrayBuffer(ObjectId(cell())),
      TAG_ARRAY_BUF_VIEW => Unpacked::DataView(ObjectId(cell())),
      TAG_FFI_SIG => Unpacked::FfiSig(SigId(cell())),
      TAG_NATIVE => Unpacked::Native(NativeId(payload as u32)),
      TAG_FUNCTION => Unpacked::Function(payload),
      TAG_FOREIGN => Unpacked::Foreign((((payload << 16) as i64) >> 16) as u64 as usize),
      TAG_STRING_INLINE => {
        let len = (payload & 0xFF) as u8;
        let mut bytes = [0u8; MAX_INLINE_STRING];
        for (i, b) in bytes.iter_mut().enumerate().take(len as usize) {
          *b = (payload >> (8 * (i + 1))) as u8;
        }
        Unpacked::Str(StrRepr::Inline(InlineStr { len, bytes }))
      }
      TAG_STRING_5 => {
        let mut bytes = [0u8; MAX_INLINE_STRING];
        for (i, b) in bytes.iter_mut().enumerate() {
          *b = (payload >> (8 * i)) as u8;
        }
        Unpacked::Str(StrRepr::Inline(InlineStr {
          len: MAX_INLINE_STRING as u8,
          bytes,
        }))
      }
      TAG_STRING_OWNED => Unpacked::Str(StrRepr::Owned(payload)),
      TAG_STRING_FOREIGN => Unpacked::Str(StrRepr::Foreign(payload)),
      _ => return None,
    })
  }

  /// Decodes the value. Values are only ever built by this module, so every value decodes.
  #[inline]
  pub fn unpack(self) -> Unpacked {
    self.try_unpack().unwrap_or(Unpacked::Undefined)
  }

  pub fn is_number(self) -> bool {
    self.tag().map_or(true, |t| t == TAG_NAN)
  }

  pub fn is_nan(self) -> bool {
    self.0 == TAG_NAN
  }

  pub fn is_undefined(self) -> bool {
    self.0 == TAG_UNDEFINED
  }

  pub fn is_null(self) -> bool {
    self.0 == TAG_NULL
  }

  pub fn is_boolean(self) -> bool {
    self.tag() == Some(TAG_BOOLEAN)
  }

  pub fn is_string(self) -> bool {
    self.string_kind().is_some()
  }

  pub fn is_object(self) -> bool {
    self.tag() == Some(TAG_OBJECT)
  }

  pub fn is_array(self) -> bool {
    self.tag() == Some(TAG_ARRAY)
  }

  pub fn is_foreign(self) -> bool {
    self.tag() == Some(TAG_FOREIGN)
  }

  pub fn is_function(self) -> bool {
    self.tag() == Some(TAG_FUNCTION)
  }

  /// Whether a call through this value can succeed: compiled, native or FFI functions.
  pub fn is_callable(self) -> bool {
    matches!(
      self.tag(),
      Some(TAG_FUNCTION) | Some(TAG_NATIVE) | Some(TAG_FFI_SIG)
    )
  }

  pub fn string_kind(self) -> Option<StringKind> {
    match self.tag()? {
      TAG_STRING_INLINE => Some(StringKind::Inline),
      TAG_STRING_5 => Some(StringKind::Inline5),
      TAG_STRING_OWNED => Some(StringKind::Owned),
      TAG_STRING_FOREIGN => Some(StringKind::Foreign),
      _ => None,
    }
  }

  /// Numeric content, or `None` for non-numbers.
  pub fn as_number(self) -> Option<f64> {
    match self.unpack() {
      Unpacked::Number(n) => Some(n),
      _ => None,
    }
  }

  pub fn as_bool(self) -> Option<bool> {
    match self.unpack() {
      Unpacked::Boolean(b) => Some(b),
      _ => None,
    }
  }

  pub fn as_foreign(self) -> Option<usize> {
    match self.unpack() {
      Unpacked::Foreign(p) => Some(p),
      _ => None,
    }
  }

  /// The numeric view used by arithmetic: non-numbers read as NaN.
  pub(crate) fn to_f64_lossy(self) -> f64 {
    self.as_number().unwrap_or(f64::NAN)
  }

  /// Name reported by the `typeof` operator.
  pub fn type_name(self) -> &'static str {
    match self.unpack() {
      Unpacked::Number(_) => "number",
      Unpacked::Boolean(_) => "boolean",
      Unpacked::Null => "null",
      Unpacked::Undefined => "undefined",
      Unpacked::Str(_) => "string",
      Unpacked::Object(_) => "object",
      Unpacked::ArrayBuffer(_) => "array_buf",
      Unpacked::DataView(_) => "data_view",
      Unpacked::Array(_) => "array",
      Unpacked::Function(_) | Unpacked::Native(_) | Unpacked::FfiSig(_) => "function",
      Unpacked::Foreign(_) => "foreign_ptr",
    }
  }
}

impl Default for Value {
  fn default() -> Self {
    Value::UNDEFINED
  }
}

impl From<f64> for Value {
  fn from(n: f64) -> Self {
    Value::number(n)
  }
}

impl From<bool> for Value {
  fn from(b: bool) -> Self {
    Value::boolean(b)
  }
}

impl fmt::Debug for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.unpack() {
      Unpacked::Number(n) => write!(f, "Number({n})"),
      other => write!(f, "{other:?}"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn reserved_space_does_not_swallow_infinities() {
    assert!(Value::number(f64::INFINITY).is_number());
    assert!(Value::number(f64::NEG_INFINITY).is_number());
    assert_eq!(
      Value::number(f64::NEG_INFINITY).unpack(),
      Unpacked::Number(f64::NEG_INFINITY)
    );
  }

  #[test]
  fn every_nan_is_normalized() {
    let quiet = f64::from_bits(0x7FF8_0000_0000_0001);
    let negative = f64::from_bits(0xFFF8_0000_0000_0000);
    assert_eq!(Value::number(quiet), Value::NAN);
    assert_eq!(Value::number(negative), Value::NAN);
    assert_eq!(Value::number(0.0 / 0.0), Value::NAN);
    assert!(Value::NAN.is_number());
  }

  #[test]
  fn foreign_pointers_sign_extend() {
    if usize::BITS == 64 {
      let high = 0xFFFF_8000_0000_1234u64 as usize;
      let v = Value::foreign(high).unwrap();
      assert_eq!(v.unpack(), Unpacked::Foreign(high));
      assert_eq!(
        Value::foreign(0x0001_0000_0000_0000u64 as usize),
        Err(ValueError::NonCanonicalPointer(0x0001_0000_0000_0000u64 as usize))
      );
    }
    let v = Value::foreign(0xDEAD_BEEF).unwrap();
    assert_eq!(v.unpack(), Unpacked::Foreign(0xDEAD_BEEF));
  }

  #[test]
  fn inline_string_boundaries() {
    assert_eq!(
      Value::inline_string(b"").unwrap().string_kind(),
      Some(StringKind::Inline)
    );
    assert_eq!(
      Value::inline_string(b"abcd").unwrap().string_kind(),
      Some(StringKind::Inline)
    );
    assert_eq!(
      Value::inline_string(b"abcde").unwrap().string_kind(),
      Some(StringKind::Inline5)
    );
    assert!(Value::inline_string(b"abcdef").is_none());
    match Value::inline_string(b"ab\0d").unwrap().unpack() {
      Unpacked::Str(StrRepr::Inline(s)) => assert_eq!(s.as_bytes(), b"ab\0d"),
      other => panic!("unexpected {other:?}"),
    }
  }

  #[test]
  fn unknown_reserved_patterns_are_rejected() {
    assert_eq!(
      Value::from_bits(make_tag(1, 0xB)),
      Err(ValueError::UnknownTag(make_tag(1, 0xB)))
    );
    assert_eq!(
      Value::from_bits(make_tag(0, 0x8)),
      Err(ValueError::UnknownTag(make_tag(0, 0x8)))
    );
    assert!(Value::from_bits(1.5f64.to_bits()).is_ok());
  }
}
