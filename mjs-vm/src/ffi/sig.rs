//! Textual foreign-function signatures.
//!
//! A signature reads like a C prototype restricted to a handful of value categories:
//!
//! ```text
//! int sum(int, double)
//! void timer_set(int, void (*)(userdata, int), userdata)
//! ```
//!
//! Callbacks are written as `ret (*)(args)` and must be paired with exactly one `userdata`
//! argument, which the native side receives as an opaque registration token.

use crate::error::VmError;
use std::fmt;

/// Maximum number of arguments of a function or callback.
pub const MAX_ARGS: usize = 6;

/// Value categories understood by the marshaler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CType {
  Void,
  Userdata,
  Int,
  Bool,
  Double,
  Float,
  CharPtr,
  VoidPtr,
  MgStr,
  MgStrPtr,
  Callback,
}

impl CType {
  fn parse(text: &str) -> Option<CType> {
    let mut norm = String::with_capacity(text.len());
    for word in text.split_whitespace() {
      if !norm.is_empty() && !word.starts_with('*') {
        norm.push(' ');
      }
      norm.push_str(word);
    }
    Some(match norm.as_str() {
      "void" => CType::Void,
      "userdata" => CType::Userdata,
      "int" => CType::Int,
      "bool" => CType::Bool,
      "double" => CType::Double,
      "float" => CType::Float,
      "char*" => CType::CharPtr,
      "void*" => CType::VoidPtr,
      "struct mg_str" => CType::MgStr,
      "struct mg_str*" => CType::MgStrPtr,
      _ => return None,
    })
  }

  pub fn as_str(self) -> &'static str {
    match self {
      CType::Void => "void",
      CType::Userdata => "userdata",
      CType::Int => "int",
      CType::Bool => "bool",
      CType::Double => "double",
      CType::Float => "float",
      CType::CharPtr => "char *",
      CType::VoidPtr => "void *",
      CType::MgStr => "struct mg_str",
      CType::MgStrPtr => "struct mg_str *",
      CType::Callback => "callback",
    }
  }
}

/// Address of a native function, as handed out by [`crate::FfiHost::resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeAddr(pub usize);

/// A parsed and validated signature.
#[derive(Debug, Clone, PartialEq)]
pub struct FfiSignature {
  /// Symbol name. Empty for callback signatures.
  pub name: String,
  pub ret: CType,
  pub args: Vec<CType>,
  /// Signature of the callback argument, if one is declared.
  pub callback: Option<Box<FfiSignature>>,
  pub(crate) target: Option<NativeAddr>,
  pub(crate) trampoline: Option<NativeAddr>,
}

impl FfiSignature {
  /// Parses and validates a function signature. Errors carry the bare reason; the caller adds
  /// the `bad ffi signature` context.
  pub fn parse(text: &str) -> Result<FfiSignature, VmError> {
    let sig = parse_sig(text.trim(), false)?;
    sig.validate(false)?;
    Ok(sig)
  }

  /// Index of the `userdata` argument.
  pub fn userdata_index(&self) -> Option<usize> {
    self.args.iter().position(|a| *a == CType::Userdata)
  }

  pub fn callback_index(&self) -> Option<usize> {
    self.args.iter().position(|a| *a == CType::Callback)
  }

  fn validate(&self, is_callback: bool) -> Result<(), VmError> {
    let ret_ok = match self.ret {
      CType::Void | CType::Int | CType::Bool | CType::Double | CType::Float | CType::VoidPtr => true,
      CType::CharPtr => !is_callback,
      _ => false,
    };
    if !ret_ok {
      return Err(VmError::type_error("invalid return value type"));
    }

    let mut userdata: Option<usize> = None;
    for (i, arg) in self.args.iter().enumerate() {
      match arg {
        CType::Userdata => {
          if let Some(first) = userdata {
            return Err(VmError::type_error(format!(
              "more than one userdata arg: #{first} and #{i}"
            )));
          }
          userdata = Some(i);
        }
        CType::Callback if is_callback => {
          return Err(VmError::type_error("callback can't take another callback"));
        }
        CType::Int
        | CType::Bool
        | CType::Double
        | CType::Float
        | CType::CharPtr
        | CType::VoidPtr
        | CType::MgStrPtr
        | CType::Callback => {}
        CType::Void | CType::MgStr => {
          return Err(VmError::type_error(format!(
            "invalid arg type \"{}\"",
            arg.as_str()
          )));
        }
      }
    }

    if is_callback {
      if userdata.is_none() {
        return Err(VmError::type_error("no userdata arg"));
      }
    } else {
      if self.callback_index().is_some() != userdata.is_some() {
        return Err(VmError::type_error(
          "callback and userdata should be either both present or both absent",
        ));
      }
      if let Some(cb) = &self.callback {
        cb.validate(true)?;
      }
    }
    Ok(())
  }
}

impl fmt::Display for FfiSignature {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}(", self.ret.as_str(), self.name)?;
    for (i, arg) in self.args.iter().enumerate() {
      if i > 0 {
        f.write_str(", ")?;
      }
      match (arg, &self.callback) {
        (CType::Callback, Some(cb)) => write!(f, "{} (*)({})", cb.ret.as_str(), ArgList(&cb.args))?,
        _ => f.write_str(arg.as_str())?,
      }
    }
    f.write_str(")")
  }
}

struct ArgList<'a>(&'a [CType]);

impl fmt::Display for ArgList<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, arg) in self.0.iter().enumerate() {
      if i > 0 {
        f.write_str(", ")?;
      }
      f.write_str(arg.as_str())?;
    }
    Ok(())
  }
}

/// Byte index of the `)` matching the `(` at `open`.
fn matching_paren(s: &str, open: usize) -> Option<usize> {
  let mut depth = 0usize;
  for (i, c) in s.char_indices().skip_while(|&(i, _)| i < open) {
    match c {
      '(' => depth += 1,
      ')' => {
        depth -= 1;
        if depth == 0 {
          return Some(i);
        }
      }
      _ => {}
    }
  }
  None
}

fn parse_ret(text: &str) -> Result<CType, VmError> {
  CType::parse(text)
    .ok_or_else(|| VmError::type_error(format!("failed to parse val type \"{}\"", text.trim())))
}

fn parse_sig(s: &str, is_callback: bool) -> Result<FfiSignature, VmError> {
  let open = s
    .find('(')
    .ok_or_else(|| VmError::type_error("missing argument list"))?;
  let close = matching_paren(s, open).ok_or_else(|| VmError::type_error("unbalanced parens"))?;

  let (name, ret, args_open) = if s[open + 1..].trim_start().starts_with('*') {
    // `ret (*name)(args)`.
    let inner = s[open + 1..close].trim_start();
    let name = inner[1..].trim().to_string();
    let args_open = s[close + 1..]
      .find('(')
      .map(|i| close + 1 + i)
      .ok_or_else(|| VmError::type_error("missing argument list"))?;
    (name, parse_ret(&s[..open])?, args_open)
  } else {
    if is_callback {
      return Err(VmError::type_error(format!(
        "failed to parse val type \"{}\"",
        s.trim()
      )));
    }
    let head = s[..open].trim_end();
    let name_start = head
      .rfind(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
      .map_or(0, |i| i + 1);
    let name = &head[name_start..];
    if name.is_empty() {
      return Err(VmError::type_error("missing function name"));
    }
    (name.to_string(), parse_ret(&head[..name_start])?, open)
  };

  let args_close =
    matching_paren(s, args_open).ok_or_else(|| VmError::type_error("unbalanced parens"))?;
  let args_text = &s[args_open + 1..args_close];

  let mut args = Vec::new();
  let mut callback = None;
  let mut depth = 0usize;
  let mut start = 0usize;
  let mut pieces = Vec::new();
  for (i, c) in args_text.char_indices() {
    match c {
      '(' => depth += 1,
      ')' => depth = depth.saturating_sub(1),
      ',' if depth == 0 => {
        pieces.push(&args_text[start..i]);
        start = i + 1;
      }
      _ => {}
    }
  }
  pieces.push(&args_text[start..]);

  let only_void = pieces.len() == 1 && CType::parse(pieces[0]) == Some(CType::Void);
  let blank = pieces.len() == 1 && pieces[0].trim().is_empty();
  if !only_void && !blank {
    for piece in pieces {
      if piece.contains('(') {
        if callback.is_some() {
          return Err(VmError::type_error("only one callback is allowed"));
        }
        callback = Some(Box::new(parse_sig(piece.trim(), true)?));
        args.push(CType::Callback);
      } else {
        args.push(
          CType::parse(piece).ok_or_else(|| {
            VmError::type_error(format!("failed to parse val type \"{}\"", piece.trim()))
          })?,
        );
      }
      if args.len() > MAX_ARGS {
        return Err(VmError::type_error(if is_callback {
          "too many callback args"
        } else {
          "too many args"
        }));
      }
    }
  }

  Ok(FfiSignature {
    name,
    ret,
    args,
    callback,
    target: None,
    trampoline: None,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_plain_and_callback_signatures() {
    let sig = FfiSignature::parse("double f(int, double)").unwrap();
    assert_eq!(sig.name, "f");
    assert_eq!(sig.ret, CType::Double);
    assert_eq!(sig.args, vec![CType::Int, CType::Double]);

    let sig = FfiSignature::parse("void set_timer(int,void(*)(userdata, int),userdata)").unwrap();
    assert_eq!(sig.args, vec![CType::Int, CType::Callback, CType::Userdata]);
    let cb = sig.callback.as_deref().unwrap();
    assert_eq!(cb.ret, CType::Void);
    assert_eq!(cb.args, vec![CType::Userdata, CType::Int]);

    let sig = FfiSignature::parse("char *  getenv(char*)").unwrap();
    assert_eq!(sig.ret, CType::CharPtr);
    assert_eq!(sig.args, vec![CType::CharPtr]);

    let sig = FfiSignature::parse("int rand(void)").unwrap();
    assert!(sig.args.is_empty());
  }

  #[test]
  fn rejects_invalid_signatures() {
    let msg = |s: &str| FfiSignature::parse(s).unwrap_err().to_string();
    assert_eq!(msg("long f(int)"), "failed to parse val type \"long\"");
    assert_eq!(msg("struct mg_str f(int)"), "invalid return value type");
    assert_eq!(
      msg("void f(userdata, userdata)"),
      "more than one userdata arg: #0 and #1"
    );
    assert_eq!(
      msg("void f(void (*)(userdata))"),
      "callback and userdata should be either both present or both absent"
    );
    assert_eq!(msg("void f(void (*)(int), userdata)"), "no userdata arg");
    assert_eq!(
      msg("void f(void (*)(userdata), void (*)(userdata), userdata)"),
      "only one callback is allowed"
    );
    assert_eq!(msg("void f(int, int, int, int, int, int, int)"), "too many args");
    assert_eq!(
      msg("void f(char * (*)(userdata), userdata)"),
      "invalid return value type"
    );
  }
}
