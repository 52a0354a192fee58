//! Little-endian base-128 integers used for bytecode operands, string lengths and the line map.

/// Number of bytes the canonical encoding of `v` occupies.
pub fn llen(mut v: u64) -> usize {
  let mut n = 1;
  while v >= 0x80 {
    v >>= 7;
    n += 1;
  }
  n
}

/// Appends the canonical encoding of `v`.
pub fn encode(v: u64, out: &mut Vec<u8>) {
  encode_padded(v, llen(v), out);
}

/// Appends `v` encoded in exactly `width` bytes. `width` must be at least `llen(v)`; the extra
/// bytes are zero groups with the continuation bit set, which decode to the same number.
pub fn encode_padded(mut v: u64, width: usize, out: &mut Vec<u8>) {
  debug_assert!(width >= llen(v));
  for i in 0..width {
    let mut b = (v & 0x7F) as u8;
    v >>= 7;
    if i + 1 < width {
      b |= 0x80;
    }
    out.push(b);
  }
}

/// Decodes a number at the start of `buf`, returning it with the count of bytes consumed.
pub fn decode(buf: &[u8]) -> Option<(u64, usize)> {
  let mut v = 0u64;
  for (i, &b) in buf.iter().enumerate() {
    if i >= 10 {
      return None;
    }
    v |= ((b & 0x7F) as u64) << (7 * i);
    if b & 0x80 == 0 {
      return Some((v, i + 1));
    }
  }
  None
}
