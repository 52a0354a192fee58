use super::Compiler;
use crate::error::VmError;
use crate::lex::unescape;
use crate::opcode::ExprOp;
use crate::opcode::Op;
use crate::token::KEYWORDS;
use crate::token::TT;

#[derive(Clone, Copy)]
enum Binary {
  Expr(ExprOp),
  /// Short-circuit `&&`.
  And,
  /// Short-circuit `||`.
  Or,
}

/// Binary precedence levels, loosest first.
const LEVELS: usize = 10;

fn binary_op(level: usize, typ: TT) -> Option<Binary> {
  use ExprOp::*;
  let op = match (level, typ) {
    (0, TT::BarBar) => return Some(Binary::Or),
    (1, TT::AmpersandAmpersand) => return Some(Binary::And),
    (2, TT::Bar) => BitOr,
    (3, TT::Caret) => BitXor,
    (4, TT::Ampersand) => BitAnd,
    (5, TT::EqualsEquals) => Eq,
    (5, TT::ExclamationEquals) => Ne,
    (5, TT::EqualsEqualsEquals) => StrictEq,
    (5, TT::ExclamationEqualsEquals) => StrictNe,
    (6, TT::ChevronLeft) => Lt,
    (6, TT::ChevronLeftEquals) => Le,
    (6, TT::ChevronRight) => Gt,
    (6, TT::ChevronRightEquals) => Ge,
    (7, TT::ChevronLeftChevronLeft) => Shl,
    (7, TT::ChevronRightChevronRight) => Shr,
    (7, TT::ChevronRightChevronRightChevronRight) => Ushr,
    (8, TT::Plus) => Add,
    (8, TT::Hyphen) => Sub,
    (9, TT::Asterisk) => Mul,
    (9, TT::Slash) => Div,
    (9, TT::Percent) => Rem,
    _ => return None,
  };
  Some(Binary::Expr(op))
}

fn assign_op(typ: TT) -> Option<ExprOp> {
  Some(match typ {
    TT::Equals => ExprOp::Assign,
    TT::PlusEquals => ExprOp::AddAssign,
    TT::HyphenEquals => ExprOp::SubAssign,
    TT::AsteriskEquals => ExprOp::MulAssign,
    TT::SlashEquals => ExprOp::DivAssign,
    TT::PercentEquals => ExprOp::RemAssign,
    TT::ChevronLeftChevronLeftEquals => ExprOp::ShlAssign,
    TT::ChevronRightChevronRightEquals => ExprOp::ShrAssign,
    TT::ChevronRightChevronRightChevronRightEquals => ExprOp::UshrAssign,
    TT::AmpersandEquals => ExprOp::BitAndAssign,
    TT::BarEquals => ExprOp::BitOrAssign,
    TT::CaretEquals => ExprOp::BitXorAssign,
    _ => return None,
  })
}

fn unary_op(typ: TT) -> Option<ExprOp> {
  Some(match typ {
    TT::Exclamation => ExprOp::Not,
    TT::Tilde => ExprOp::BitNot,
    TT::PlusPlus => ExprOp::PreInc,
    TT::HyphenHyphen => ExprOp::PreDec,
    TT::KeywordTypeof => ExprOp::Typeof,
    TT::Hyphen => ExprOp::Neg,
    TT::Plus => ExprOp::Pos,
    _ => return None,
  })
}

impl<'a> Compiler<'a> {
  /// One assignment expression. Commas are handled by the callers that allow them.
  pub(super) fn expr(&mut self) -> Result<(), VmError> {
    let saved = std::mem::replace(&mut self.update_target, false);
    let res = self.assignment();
    self.update_target = saved;
    res
  }

  fn assignment(&mut self) -> Result<(), VmError> {
    self.enter()?;
    self.ternary()?;
    if let Some(op) = assign_op(self.tok.typ) {
      self.next();
      self.assignment()?;
      self.emit.expr(op);
    }
    self.leave();
    Ok(())
  }

  fn ternary(&mut self) -> Result<(), VmError> {
    self.binary(0)?;
    if self.tok.typ != TT::Question {
      return Ok(());
    }
    self.next();
    let off_if = self.emit.jump(Op::JmpFalse);
    self.ternary()?;
    let off_else = self.emit.jump(Op::Jmp);
    let off_endif = self.emit.pos();
    self.emit.op(Op::Drop);
    self.expect(TT::Colon)?;
    self.ternary()?;
    let patch = self.emit.patch(off_else, self.emit.pos())?;
    self.emit.patch(off_if, patch.moved(off_endif))?;
    Ok(())
  }

  fn operand(&mut self, level: usize) -> Result<(), VmError> {
    if level + 1 < LEVELS {
      self.binary(level + 1)
    } else {
      self.unary()
    }
  }

  fn binary(&mut self, level: usize) -> Result<(), VmError> {
    self.enter()?;
    self.operand(level)?;
    while let Some(op) = binary_op(level, self.tok.typ) {
      self.next();
      match op {
        Binary::Expr(op) => {
          self.operand(level)?;
          self.emit.expr(op);
        }
        Binary::And | Binary::Or => {
          let jump = match op {
            Binary::And => Op::JmpNeutralFalse,
            _ => Op::JmpNeutralTrue,
          };
          let at = self.emit.jump(jump);
          self.emit.op(Op::Drop);
          self.binary(level)?;
          self.emit.patch(at, self.emit.pos())?;
        }
      }
    }
    self.leave();
    Ok(())
  }

  fn unary(&mut self) -> Result<(), VmError> {
    let Some(op) = unary_op(self.tok.typ) else {
      return self.postfix();
    };
    self.enter()?;
    self.next();
    let saved = std::mem::replace(
      &mut self.update_target,
      matches!(op, ExprOp::PreInc | ExprOp::PreDec),
    );
    let res = self.unary();
    self.update_target = saved;
    res?;
    self.emit.expr(op);
    self.leave();
    Ok(())
  }

  fn postfix(&mut self) -> Result<(), VmError> {
    self.call_dot_mem()?;
    let op = match self.tok.typ {
      TT::PlusPlus => ExprOp::PostInc,
      TT::HyphenHyphen => ExprOp::PostDec,
      _ => return Ok(()),
    };
    self.next();
    self.emit.expr(op);
    Ok(())
  }

  /// Emits `GET` unless the reference just pushed is about to be assigned or updated.
  fn maybe_get(&mut self) {
    let typ = self.tok.typ;
    let continues = matches!(
      typ,
      TT::Dot | TT::BracketOpen | TT::ParenthesisOpen
    );
    if typ.is_assignment() || typ.is_update() || (self.update_target && !continues) {
      return;
    }
    self.emit.op(Op::Get);
  }

  fn call_dot_mem(&mut self) -> Result<(), VmError> {
    self.literal()?;
    loop {
      match self.tok.typ {
        TT::Dot => {
          self.next();
          let name = self.property_name().ok_or_else(|| self.error())?;
          self.emit.op(Op::PushStr);
          self.emit.str(name.as_bytes());
          self.emit.op(Op::Swap);
          self.next();
          self.maybe_get();
        }
        TT::BracketOpen => {
          self.next();
          self.expr()?;
          self.emit.op(Op::Swap);
          self.expect(TT::BracketClose)?;
          self.maybe_get();
        }
        TT::ParenthesisOpen => {
          self.next();
          self.emit.op(Op::Args);
          while self.tok.typ != TT::ParenthesisClose {
            self.expr()?;
            match self.tok.typ {
              TT::Comma => self.next(),
              TT::ParenthesisClose => {}
              _ => return Err(self.error()),
            }
          }
          self.emit.op(Op::Call);
          self.expect(TT::ParenthesisClose)?;
        }
        _ => return Ok(()),
      }
    }
  }

  /// Identifiers and reserved words are both valid after `.` and as object literal keys.
  fn property_name(&self) -> Option<&'a str> {
    let text = self.text();
    (self.tok.typ == TT::Identifier || KEYWORDS.contains_key(text)).then_some(text)
  }

  fn literal(&mut self) -> Result<(), VmError> {
    match self.tok.typ {
      TT::BraceOpen => return self.object_literal(),
      TT::BracketOpen => return self.array_literal(),
      TT::KeywordFunction => return self.function(),
      TT::ParenthesisOpen => {
        self.next();
        self.expr()?;
        return self.expect(TT::ParenthesisClose);
      }
      TT::KeywordThis => self.emit.op(Op::PushThis),
      TT::LiteralTrue => self.emit.op(Op::PushTrue),
      TT::LiteralFalse => self.emit.op(Op::PushFalse),
      TT::LiteralNull => self.emit.op(Op::PushNull),
      TT::LiteralUndefined => self.emit.op(Op::PushUndef),
      TT::LiteralNumber | TT::LiteralNumberHex => self.number()?,
      TT::LiteralString => {
        let bytes = self.string_value();
        self.emit.op(Op::PushStr);
        self.emit.str(&bytes);
      }
      TT::Identifier => {
        let name = self.text();
        self.emit.op(Op::PushStr);
        self.emit.str(name.as_bytes());
        self.emit.op(Op::FindScope);
        self.next();
        self.maybe_get();
        return Ok(());
      }
      _ => return Err(self.error()),
    }
    self.next();
    Ok(())
  }

  fn string_value(&self) -> Vec<u8> {
    let raw = self.text().as_bytes();
    unescape(&raw[1..raw.len() - 1])
  }

  fn number(&mut self) -> Result<(), VmError> {
    let text = self.text();
    let value = if self.tok.typ == TT::LiteralNumberHex {
      u64::from_str_radix(&text[2..], 16).map(|v| v as f64).ok()
    } else {
      text.parse::<f64>().ok()
    };
    let value = value.ok_or_else(|| self.error())?;
    if value.is_finite() && value.fract() == 0.0 && value >= 0.0 && value < (1u64 << 63) as f64 {
      self.emit.op(Op::PushInt);
      self.emit.varint(value as u64);
    } else {
      self.emit.op(Op::PushDbl);
      self.emit.f64(value);
    }
    Ok(())
  }

  fn object_literal(&mut self) -> Result<(), VmError> {
    self.next();
    self.emit.op(Op::PushObj);
    while self.tok.typ != TT::BraceClose {
      let key = match self.tok.typ {
        TT::LiteralString => self.string_value(),
        TT::LiteralNumber => self.text().as_bytes().to_vec(),
        _ => self
          .property_name()
          .ok_or_else(|| self.error())?
          .as_bytes()
          .to_vec(),
      };
      self.emit.op(Op::Dup);
      self.emit.op(Op::PushStr);
      self.emit.str(&key);
      self.emit.op(Op::Swap);
      self.next();
      self.expect(TT::Colon)?;
      self.expr()?;
      self.emit.expr(ExprOp::Assign);
      self.emit.op(Op::Drop);
      match self.tok.typ {
        TT::Comma => self.next(),
        TT::BraceClose => {}
        _ => return Err(self.error()),
      }
    }
    self.next();
    Ok(())
  }

  fn array_literal(&mut self) -> Result<(), VmError> {
    self.next();
    self.emit.op(Op::PushArray);
    while self.tok.typ != TT::BracketClose {
      self.emit.op(Op::Dup);
      self.expr()?;
      self.emit.op(Op::Append);
      match self.tok.typ {
        TT::Comma => self.next(),
        TT::BracketClose => {}
        _ => return Err(self.error()),
      }
    }
    self.next();
    Ok(())
  }

  /// `function [name](args) { body }`. The body is jumped over; the value is a reference to
  /// its prologue, which binds the arguments in a fresh scope.
  fn function(&mut self) -> Result<(), VmError> {
    self.next();
    let name = match self.tok.typ {
      TT::Identifier => {
        let name = self.text();
        self.next();
        Some(name)
      }
      _ => None,
    };
    if let Some(name) = name {
      self.emit.op(Op::PushStr);
      self.emit.str(name.as_bytes());
      self.emit.op(Op::PushScope);
      self.emit.op(Op::Create);
      self.emit.op(Op::PushStr);
      self.emit.str(name.as_bytes());
      self.emit.op(Op::FindScope);
    }

    let off = self.emit.jump(Op::Jmp);
    let mut prologue = self.emit.pos();
    self.expect(TT::ParenthesisOpen)?;
    self.emit.op(Op::NewScope);
    let mut index = 0u64;
    while self.tok.typ != TT::ParenthesisClose {
      if self.tok.typ != TT::Identifier {
        return Err(self.error());
      }
      let arg = self.text();
      self.emit.op(Op::SetArg);
      self.emit.varint(index);
      self.emit.str(arg.as_bytes());
      index += 1;
      self.next();
      match self.tok.typ {
        TT::Comma => self.next(),
        TT::ParenthesisClose => {}
        _ => return Err(self.error()),
      }
    }
    self.expect(TT::ParenthesisClose)?;
    self.block(false)?;
    self.emit.op(Op::Return);

    let patch = self.emit.patch(off, self.emit.pos())?;
    prologue = patch.moved(prologue);
    let at = self.emit.pos();
    self.emit.op(Op::PushFunc);
    self.emit.varint((at - prologue) as u64);
    if name.is_some() {
      self.emit.expr(ExprOp::Assign);
    }
    Ok(())
  }
}
