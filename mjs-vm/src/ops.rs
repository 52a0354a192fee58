//! Value semantics shared by the dispatch loop and the builtins: truthiness, conversions,
//! equality, arithmetic and property access.

use crate::error::VmError;
use crate::opcode::ExprOp;
use crate::value::Unpacked;
use crate::value::Value;
use crate::vm::Vm;
use std::fmt::Write;

/// Integers below this magnitude are exact in a double and print without an exponent.
const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

/// Largest array index. Keys beyond it are ordinary named properties.
pub(crate) const MAX_ARRAY_INDEX: usize = u32::MAX as usize - 1;

/// Number formatting used by string conversion and display.
pub(crate) fn format_number(n: f64) -> String {
  if n.is_nan() {
    "NaN".to_string()
  } else if n.is_infinite() {
    if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
  } else if n.abs() >= MAX_EXACT_INT {
    // Shortest round-trip mantissa with a C-style signed exponent: `1e+19`.
    let sci = format!("{n:e}");
    match sci.split_once('e') {
      Some((mantissa, exp)) if !exp.starts_with('-') => format!("{mantissa}e+{exp}"),
      _ => sci,
    }
  } else if n.fract() == 0.0 {
    format!("{}", n as i64)
  } else {
    format!("{n:.6}")
  }
}

/// Index named by a property key: an integral number or a string of digits, in
/// `0..=MAX_ARRAY_INDEX`.
pub(crate) fn key_index(key: Value, name: &[u8]) -> Option<usize> {
  if let Some(n) = key.as_number() {
    return (n >= 0.0 && n.fract() == 0.0 && n <= MAX_ARRAY_INDEX as f64).then_some(n as usize);
  }
  if name.is_empty() || !name.iter().all(u8::is_ascii_digit) {
    return None;
  }
  let idx: usize = std::str::from_utf8(name).ok()?.parse().ok()?;
  (idx <= MAX_ARRAY_INDEX).then_some(idx)
}

/// Clamps a possibly negative index into `0..=size`; negative values count from the end.
pub(crate) fn normalize_idx(idx: i64, size: usize) -> usize {
  let size = size as i64;
  let idx = if idx < 0 { (size + idx).max(0) } else { idx };
  idx.min(size) as usize
}

fn arith(op: ExprOp, a: f64, b: f64) -> f64 {
  use ExprOp::*;
  if a.is_nan() || b.is_nan() {
    return f64::NAN;
  }
  match op {
    Add => a + b,
    Sub => a - b,
    Mul => a * b,
    Div => {
      if b == 0.0 {
        f64::NAN
      } else {
        a / b
      }
    }
    Rem => {
      let b = b.trunc();
      if b == 0.0 {
        return f64::NAN;
      }
      let r = (a.abs() as i64 % b.abs() as i64) as f64;
      if a < 0.0 {
        -r
      } else {
        r
      }
    }
    BitAnd => ((a as i64) & (b as i64)) as f64,
    BitOr => ((a as i64) | (b as i64)) as f64,
    BitXor => ((a as i64) ^ (b as i64)) as f64,
    Shl => (a as i64).wrapping_shl(b as i64 as u32) as f64,
    Shr => (a as i64).wrapping_shr(b as i64 as u32) as f64,
    Ushr => ((a as i64 as u32).wrapping_shr(b as i64 as u32)) as f64,
    _ => f64::NAN,
  }
}

fn is_numeric(v: Value) -> bool {
  v.is_number() || v.is_foreign()
}

fn byte_value(key: Value, value: Value) -> Result<(usize, u8), VmError> {
  let idx = key
    .as_number()
    .filter(|n| *n >= 0.0 && n.fract() == 0.0)
    .ok_or_else(|| VmError::type_error("index must be a number"))?;
  let byte = value
    .as_number()
    .filter(|n| (0.0..=255.0).contains(n) && n.fract() == 0.0)
    .ok_or_else(|| VmError::type_error("only number 0 .. 255 can be assigned"))?;
  Ok((idx as usize, byte as u8))
}

impl Vm {
  pub(crate) fn truthy(&self, v: Value) -> bool {
    match v.unpack() {
      Unpacked::Boolean(b) => b,
      Unpacked::Number(n) => n != 0.0 && !n.is_nan(),
      Unpacked::Str(_) => self.heap.str(v).is_some_and(|s| !s.is_empty()),
      Unpacked::Foreign(p) => p != 0,
      Unpacked::Null | Unpacked::Undefined => false,
      Unpacked::Object(_)
      | Unpacked::Array(_)
      | Unpacked::ArrayBuffer(_)
      | Unpacked::DataView(_)
      | Unpacked::Function(_)
      | Unpacked::Native(_)
      | Unpacked::FfiSig(_) => true,
    }
  }

  /// String conversion used for property keys and `toString`.
  pub(crate) fn to_string_bytes(&self, v: Value) -> Result<Vec<u8>, VmError> {
    Ok(match v.unpack() {
      Unpacked::Str(_) => self.heap.str(v).map(|s| s.to_vec()).unwrap_or_default(),
      Unpacked::Number(n) => format_number(n).into_bytes(),
      Unpacked::Boolean(b) => if b { "true" } else { "false" }.into(),
      Unpacked::Null => b"null".to_vec(),
      Unpacked::Undefined => b"undefined".to_vec(),
      Unpacked::Foreign(_) => self.display(v).into_bytes(),
      _ => {
        return Err(VmError::type_error(format!(
          "cannot convert {} to string",
          v.type_name()
        )))
      }
    })
  }

  /// Human-readable rendering, as printed by `print` and the command-line runner.
  pub fn display(&self, v: Value) -> String {
    let mut out = String::new();
    match v.unpack() {
      Unpacked::Number(n) => out.push_str(&format_number(n)),
      Unpacked::Boolean(b) => out.push_str(if b { "true" } else { "false" }),
      Unpacked::Null => out.push_str("null"),
      Unpacked::Undefined => out.push_str("undefined"),
      Unpacked::Str(_) => {
        for &b in self.heap.str(v).as_deref().unwrap_or_default() {
          if (0x20..0x7f).contains(&b) {
            out.push(b as char);
          } else {
            let _ = write!(out, "\\x{b:02x}");
          }
        }
      }
      Unpacked::Array(_) => out.push_str("<array>"),
      Unpacked::Object(_) => out.push_str("<object>"),
      Unpacked::ArrayBuffer(_) => out.push_str("<array_buf>"),
      Unpacked::DataView(_) => out.push_str("<data_view>"),
      Unpacked::Foreign(p) => {
        let _ = write!(out, "<foreign_ptr@{p:x}>");
      }
      Unpacked::Function(off) => {
        let _ = write!(out, "<function@{off}>");
      }
      Unpacked::Native(id) => {
        let name = self.native(id).map(|n| n.name.as_str()).unwrap_or("?");
        let _ = write!(out, "<native {name}>");
      }
      Unpacked::FfiSig(id) => match self.heap.sig(id) {
        Ok(sig) => {
          let _ = write!(out, "<ffi {sig}>");
        }
        Err(_) => out.push_str("<ffi>"),
      },
    }
    out
  }

  /// `===`: identical values, equal numbers, or strings with equal bytes. A null foreign
  /// pointer equals `null`.
  pub(crate) fn strict_equal(&self, a: Value, b: Value) -> bool {
    match (a.unpack(), b.unpack()) {
      (Unpacked::Number(x), Unpacked::Number(y)) => x == y,
      (Unpacked::Str(_), Unpacked::Str(_)) => match (self.heap.str(a), self.heap.str(b)) {
        (Some(x), Some(y)) => *x == *y,
        _ => false,
      },
      (Unpacked::Foreign(0), Unpacked::Null) | (Unpacked::Null, Unpacked::Foreign(0)) => true,
      _ => a == b,
    }
  }

  /// Binary arithmetic, bitwise and string concatenation. No implicit conversions: operands must
  /// both be numbers (foreign pointers allow `+`/`-` offsets) or, for `+`, both strings.
  pub(crate) fn do_op(&mut self, op: ExprOp, a: Value, b: Value) -> Result<Value, VmError> {
    if is_numeric(a) && is_numeric(b) {
      return match (a.as_foreign(), b.as_foreign()) {
        (Some(pa), Some(pb)) => {
          if op != ExprOp::Sub {
            return Err(VmError::type_error("invalid operands"));
          }
          Ok(Value::number((pa as isize).wrapping_sub(pb as isize) as f64))
        }
        (Some(p), None) | (None, Some(p)) => {
          let n = if a.is_foreign() { b } else { a }.to_f64_lossy() as i64 as isize;
          let addr = match op {
            ExprOp::Add => (p as isize).wrapping_add(n),
            ExprOp::Sub if a.is_foreign() => (p as isize).wrapping_sub(n),
            _ => return Err(VmError::type_error("invalid operands")),
          };
          Ok(Value::foreign(addr as usize)?)
        }
        (None, None) => Ok(Value::number(arith(
          op,
          a.to_f64_lossy(),
          b.to_f64_lossy(),
        ))),
      };
    }
    if op == ExprOp::Add && a.is_string() && b.is_string() {
      let mut bytes = self.heap.str(a).map(|s| s.to_vec()).unwrap_or_default();
      bytes.extend_from_slice(self.heap.str(b).as_deref().unwrap_or_default());
      return self.heap.alloc_string(&bytes);
    }
    Err(VmError::type_error("implicit type conversion is prohibited"))
  }

  pub(crate) fn unary(&mut self, op: ExprOp, v: Value) -> Result<Value, VmError> {
    Ok(match op {
      ExprOp::Not => Value::boolean(!self.truthy(v)),
      ExprOp::Neg => Value::number(-v.to_f64_lossy()),
      ExprOp::Pos => v,
      ExprOp::BitNot => Value::number(!(v.to_f64_lossy() as i64) as f64),
      ExprOp::Typeof => self.heap.strings.foreign(v.type_name().as_bytes())?,
      _ => {
        return Err(VmError::internal(format!(
          "{} is not a unary operator",
          op.symbol()
        )))
      }
    })
  }

  /// Property key as a string value, converting numbers and other primitives.
  pub(crate) fn key_value(&mut self, key: Value) -> Result<Value, VmError> {
    if key.is_string() {
      return Ok(key);
    }
    let bytes = self.to_string_bytes(key)?;
    self.heap.alloc_string(&bytes)
  }

  fn builtin_prop(&self, obj: Value, key: Value, name: &[u8]) -> Result<Option<Value>, VmError> {
    if let Some(s) = self.heap.str(obj) {
      return Ok(match name {
        b"length" => Some(Value::number(s.len() as f64)),
        b"at" | b"charCodeAt" => Some(self.builtins.char_code_at),
        b"indexOf" => Some(self.builtins.index_of),
        b"slice" => Some(self.builtins.slice),
        _ => match key_index(key, name) {
          Some(i) if i < s.len() => Some(
            Value::inline_string(&s[i..i + 1])
              .ok_or_else(|| VmError::internal("one-byte string is not inline"))?,
          ),
          Some(_) => Some(Value::UNDEFINED),
          None => None,
        },
      });
    }
    if name == b"apply" {
      return Ok(Some(self.builtins.apply));
    }
    Ok(match obj.unpack() {
      Unpacked::Number(_) if name == b"toString" => Some(self.builtins.to_string),
      Unpacked::Array(id) => match name {
        b"push" => Some(self.builtins.push),
        b"length" => Some(Value::number(self.heap.array(id)?.len() as f64)),
        _ => None,
      },
      Unpacked::Foreign(p) => {
        let idx =
          key_index(key, name).ok_or_else(|| VmError::type_error("index must be a number"))?;
        let host = self
          .ffi_host
          .as_ref()
          .ok_or_else(|| VmError::type_error("resolver is not set"))?;
        Some(Value::number(host.read_byte(p.wrapping_add(idx))? as f64))
      }
      Unpacked::ArrayBuffer(id) => {
        let bytes = self.heap.buffer(id)?;
        match name {
          b"byteLength" => Some(Value::number(bytes.len() as f64)),
          _ => key_index(key, name).map(|i| {
            bytes
              .get(i)
              .map(|&b| Value::number(b as f64))
              .unwrap_or(Value::UNDEFINED)
          }),
        }
      }
      Unpacked::DataView(id) => {
        let (buffer, offset, len) = self.heap.view(id)?;
        match name {
          b"byteLength" => Some(Value::number(self.heap.buffer(buffer)?.len() as f64)),
          b"length" => Some(Value::number(len as f64)),
          b"buffer" => Some(Value::array_buffer(buffer)),
          _ => match key_index(key, name) {
            Some(i) if i < len => {
              let bytes = self.heap.buffer(buffer)?;
              Some(Value::number(bytes.get(offset + i).copied().unwrap_or(0) as f64))
            }
            Some(_) => Some(Value::UNDEFINED),
            None => None,
          },
        }
      }
      _ => None,
    })
  }

  /// `obj[key]`. Builtin properties win over own properties.
  pub(crate) fn get_prop(&self, obj: Value, key: Value) -> Result<Value, VmError> {
    let name = self.to_string_bytes(key)?;
    if let Some(v) = self.builtin_prop(obj, key, &name)? {
      return Ok(v);
    }
    match obj.unpack() {
      Unpacked::Object(id) => Ok(self.heap.get(id, &name)?.unwrap_or(Value::UNDEFINED)),
      Unpacked::Array(id) => match key_index(key, &name) {
        Some(i) => Ok(self.heap.array(id)?.get(i).copied().unwrap_or(Value::UNDEFINED)),
        None => Ok(self.heap.get(id, &name)?.unwrap_or(Value::UNDEFINED)),
      },
      Unpacked::ArrayBuffer(_) | Unpacked::DataView(_) => Ok(Value::UNDEFINED),
      _ => Err(VmError::type_error(format!(
        "cannot look up [{}] in {}",
        String::from_utf8_lossy(&name),
        obj.type_name()
      ))),
    }
  }

  /// `obj[key] = value`.
  pub(crate) fn set_prop(&mut self, obj: Value, key: Value, value: Value) -> Result<(), VmError> {
    match obj.unpack() {
      Unpacked::Object(id) => {
        let key = self.key_value(key)?;
        self.heap.set(id, key, value)
      }
      Unpacked::Array(id) => {
        let name = self.to_string_bytes(key)?;
        match key_index(key, &name) {
          Some(i) => self.heap.array_set(id, i, value),
          None => {
            let key = self.key_value(key)?;
            self.heap.set(id, key, value)
          }
        }
      }
      Unpacked::ArrayBuffer(id) => {
        let (idx, byte) = byte_value(key, value)?;
        let bytes = self.heap.buffer_mut(id)?;
        let slot = bytes
          .get_mut(idx)
          .ok_or_else(|| VmError::type_error(format!("index {idx} is out of range")))?;
        *slot = byte;
        Ok(())
      }
      Unpacked::DataView(id) => {
        let (idx, byte) = byte_value(key, value)?;
        let (buffer, offset, len) = self.heap.view(id)?;
        if idx >= len {
          return Err(VmError::type_error(format!("index {idx} is out of range")));
        }
        let bytes = self.heap.buffer_mut(buffer)?;
        let slot = bytes
          .get_mut(offset + idx)
          .ok_or_else(|| VmError::type_error(format!("index {idx} is out of range")))?;
        *slot = byte;
        Ok(())
      }
      Unpacked::Foreign(p) => {
        let (idx, byte) = byte_value(key, value)?;
        let host = self
          .ffi_host
          .as_ref()
          .ok_or_else(|| VmError::type_error("resolver is not set"))?;
        host.write_byte(p.wrapping_add(idx), byte)
      }
      _ => Err(VmError::type_error("unsupported object type")),
    }
  }

  /// `EXPR` instruction on the data stack.
  pub(crate) fn expr_op(&mut self, op: ExprOp) -> Result<(), VmError> {
    use ExprOp::*;
    match op {
      Add | Sub | Mul | Div | Rem | Shl | Shr | Ushr | BitAnd | BitOr | BitXor => {
        let b = self.pop()?;
        let a = self.pop()?;
        let v = self.do_op(op, a, b)?;
        self.stack.push(v);
      }
      Lt | Le | Gt | Ge => {
        let b = self.pop()?.to_f64_lossy();
        let a = self.pop()?.to_f64_lossy();
        let res = match op {
          Lt => a < b,
          Le => a <= b,
          Gt => a > b,
          _ => a >= b,
        };
        self.stack.push(Value::boolean(res));
      }
      Eq => return Err(VmError::not_implemented("Use ===, not ==")),
      Ne => return Err(VmError::not_implemented("Use !==, not !=")),
      StrictEq | StrictNe => {
        let b = self.pop()?;
        let a = self.pop()?;
        let eq = self.strict_equal(a, b);
        self.stack.push(Value::boolean(eq == (op == StrictEq)));
      }
      Not | BitNot | Neg | Pos | Typeof => {
        let v = self.pop()?;
        let res = self.unary(op, v)?;
        self.stack.push(res);
      }
      Assign => {
        let val = self.pop()?;
        let obj = self.pop()?;
        let key = self.pop()?;
        self.set_prop(obj, key, val)?;
        self.stack.push(val);
      }
      AddAssign | SubAssign | MulAssign | DivAssign | RemAssign | ShlAssign | ShrAssign
      | UshrAssign | BitAndAssign | BitOrAssign | BitXorAssign => {
        let val = self.pop()?;
        let obj = self.pop()?;
        let key = self.pop()?;
        if !matches!(obj.unpack(), Unpacked::Object(_) | Unpacked::Array(_)) {
          return Err(VmError::type_error("invalid operand"));
        }
        let base = op
          .compound_base()
          .ok_or_else(|| VmError::internal("compound assignment without an operator"))?;
        let cur = self.get_prop(obj, key)?;
        let res = self.do_op(base, cur, val)?;
        self.set_prop(obj, key, res)?;
        self.stack.push(res);
      }
      PreInc | PreDec | PostInc | PostDec => {
        let obj = self.pop()?;
        let key = self.pop()?;
        let (base, sym) = match op {
          PreInc | PostInc => (Add, "++"),
          _ => (Sub, "--"),
        };
        if !matches!(obj.unpack(), Unpacked::Object(_) | Unpacked::Array(_)) {
          return Err(VmError::type_error(format!("invalid operand for {sym}")));
        }
        let old = self.get_prop(obj, key)?;
        let new = self.do_op(base, old, Value::number(1.0))?;
        self.set_prop(obj, key, new)?;
        self
          .stack
          .push(if matches!(op, PreInc | PreDec) { new } else { old });
      }
    }
    Ok(())
  }

  /// Next key of a `for-in` walk: the `n`th own property name of an object, or index `n` of an
  /// array.
  pub(crate) fn iter_key(&self, obj: Value, n: usize) -> Result<Option<Value>, VmError> {
    match obj.unpack() {
      Unpacked::Object(id) => self.heap.nth_key(id, n),
      Unpacked::Array(id) => {
        let len = self.heap.array(id)?.len();
        Ok((n < len).then(|| Value::number(n as f64)))
      }
      _ => Err(VmError::type_error("can't iterate over non-object value")),
    }
  }
}
