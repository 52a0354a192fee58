use super::Compiler;
use crate::error::VmError;
use crate::opcode::ExprOp;
use crate::opcode::Op;
use crate::token::TT;

impl<'a> Compiler<'a> {
  /// Parses statements up to `end` (not consumed), dropping every value but the last.
  pub(super) fn statement_list(&mut self, end: TT) -> Result<(), VmError> {
    let mut any = false;
    while self.tok.typ != TT::EOF && self.tok.typ != end {
      if self.tok.typ == TT::Semicolon {
        self.next();
        continue;
      }
      if any {
        self.emit.op(Op::Drop);
      }
      self.statement()?;
      any = true;
    }
    if !any {
      self.emit.op(Op::PushUndef);
    }
    Ok(())
  }

  pub(super) fn block(&mut self, scoped: bool) -> Result<(), VmError> {
    self.enter()?;
    self.expect(TT::BraceOpen)?;
    if scoped {
      self.emit.op(Op::NewScope);
    }
    self.statement_list(TT::BraceClose)?;
    self.expect(TT::BraceClose)?;
    if scoped {
      self.emit.op(Op::DelScope);
    }
    self.leave();
    Ok(())
  }

  fn block_or_statement(&mut self) -> Result<(), VmError> {
    if self.tok.typ == TT::BraceOpen {
      self.block(true)
    } else {
      self.statement()
    }
  }

  /// Loop bodies share the loop's scope.
  fn loop_body(&mut self) -> Result<(), VmError> {
    if self.tok.typ == TT::BraceOpen {
      self.enter()?;
      self.next();
      self.statement_list(TT::BraceClose)?;
      self.expect(TT::BraceClose)?;
      self.leave();
      Ok(())
    } else {
      self.statement()
    }
  }

  fn statement(&mut self) -> Result<(), VmError> {
    match self.tok.typ {
      TT::Semicolon => {
        self.emit.op(Op::PushUndef);
        self.next();
      }
      TT::KeywordLet => self.let_declaration()?,
      TT::BraceOpen => self.block(true)?,
      TT::KeywordReturn => self.return_statement()?,
      TT::KeywordFor => self.for_statement()?,
      TT::KeywordWhile => self.while_statement()?,
      TT::KeywordIf => self.if_statement()?,
      TT::KeywordBreak => {
        self.emit.op(Op::PushUndef);
        self.emit.op(Op::Break);
        self.next();
      }
      TT::KeywordContinue => {
        self.emit.op(Op::Continue);
        self.next();
      }
      TT::KeywordCase
      | TT::KeywordCatch
      | TT::KeywordDelete
      | TT::KeywordDo
      | TT::KeywordInstanceof
      | TT::KeywordNew
      | TT::KeywordSwitch
      | TT::KeywordThrow
      | TT::KeywordTry
      | TT::KeywordVar
      | TT::KeywordVoid
      | TT::KeywordWith => {
        return Err(VmError::syntax(format!(
          "[{}] is not implemented",
          self.text()
        )));
      }
      _ => loop {
        self.expr()?;
        if self.tok.typ != TT::Comma {
          break;
        }
        self.emit.op(Op::Drop);
        self.next();
      },
    }
    Ok(())
  }

  pub(super) fn let_declaration(&mut self) -> Result<(), VmError> {
    self.expect(TT::KeywordLet)?;
    loop {
      if self.tok.typ != TT::Identifier {
        return Err(self.error());
      }
      let name = self.text().as_bytes();
      self.emit.op(Op::PushStr);
      self.emit.str(name);
      self.emit.op(Op::PushScope);
      self.emit.op(Op::Create);
      self.next();
      if self.tok.typ == TT::Equals {
        self.next();
        self.emit.op(Op::PushStr);
        self.emit.str(name);
        self.emit.op(Op::FindScope);
        self.expr()?;
        self.emit.expr(ExprOp::Assign);
      } else {
        self.emit.op(Op::PushUndef);
      }
      if self.tok.typ != TT::Comma {
        return Ok(());
      }
      self.emit.op(Op::Drop);
      self.next();
    }
  }

  fn return_statement(&mut self) -> Result<(), VmError> {
    self.next();
    if matches!(self.tok.typ, TT::Semicolon | TT::BraceClose | TT::EOF) {
      self.emit.op(Op::PushUndef);
    } else {
      self.expr()?;
    }
    self.emit.op(Op::SetRetVal);
    self.emit.op(Op::Return);
    Ok(())
  }

  fn if_statement(&mut self) -> Result<(), VmError> {
    self.next();
    self.expect(TT::ParenthesisOpen)?;
    self.expr()?;
    let off_if = self.emit.jump(Op::JmpFalse);
    self.expect(TT::ParenthesisClose)?;
    self.block_or_statement()?;

    if self.tok.typ == TT::Semicolon {
      // `if (a) b; else c;`
      let saved = (self.lexer.checkpoint(), self.tok, self.prev);
      self.next();
      if self.tok.typ != TT::KeywordElse {
        self.lexer.apply_checkpoint(saved.0);
        self.tok = saved.1;
        self.prev = saved.2;
        self.emit.set_line(self.tok.line);
      }
    }

    let off_endif = if self.tok.typ == TT::KeywordElse {
      self.next();
      let off_else = self.emit.jump(Op::Jmp);
      let off_endif = self.emit.pos();
      self.emit.op(Op::Drop);
      self.block_or_statement()?;
      let patch = self.emit.patch(off_else, self.emit.pos())?;
      patch.moved(off_endif)
    } else {
      self.emit.pos()
    };
    self.emit.patch(off_if, off_endif)?;
    Ok(())
  }

  fn while_statement(&mut self) -> Result<(), VmError> {
    self.next();
    self.expect(TT::ParenthesisOpen)?;
    self.emit.op(Op::NewScope);
    self.emit.op(Op::Loop);
    let off_b = self.emit.placeholder();
    // Continue re-evaluates the condition, which starts right after the operands.
    self.emit.varint(0);

    self.expr()?;
    self.expect(TT::ParenthesisClose)?;
    let off_cond_end = self.emit.jump(Op::JmpFalse);
    self.loop_body()?;
    self.emit.op(Op::Drop);
    self.emit.op(Op::Continue);

    self.emit.patch(off_cond_end, self.emit.pos())?;
    self.emit.op(Op::Break);
    self.emit.patch(off_b, self.emit.pos())?;
    self.emit.op(Op::DelScope);
    Ok(())
  }

  /// Looks ahead for `[let] name in`.
  fn is_for_in(&mut self) -> bool {
    let saved = (self.lexer.checkpoint(), self.tok, self.prev);
    if self.tok.typ == TT::KeywordLet {
      self.next();
    }
    let mut found = false;
    if self.tok.typ == TT::Identifier {
      self.next();
      found = self.tok.typ == TT::KeywordIn;
    }
    self.lexer.apply_checkpoint(saved.0);
    self.tok = saved.1;
    self.prev = saved.2;
    self.emit.set_line(self.tok.line);
    found
  }

  fn for_statement(&mut self) -> Result<(), VmError> {
    self.next();
    self.expect(TT::ParenthesisOpen)?;
    if self.is_for_in() {
      return self.for_in();
    }

    self.emit.op(Op::NewScope);
    self.emit.op(Op::Loop);
    let off_b = self.emit.placeholder();
    let off_c = self.emit.placeholder();

    match self.tok.typ {
      TT::Semicolon => self.emit.op(Op::PushUndef),
      TT::KeywordLet => self.let_declaration()?,
      _ => self.expr()?,
    }
    self.expect(TT::Semicolon)?;
    self.emit.op(Op::Drop);

    let off_init_end = self.emit.jump(Op::Jmp);
    let mut off_incr_begin = self.emit.pos();
    let mut off_cond_begin = self.emit.pos();

    if self.tok.typ == TT::Semicolon {
      self.emit.op(Op::PushTrue);
    } else {
      self.expr()?;
    }
    self.expect(TT::Semicolon)?;

    // The increment runs before the condition on every iteration but the first, so it is
    // emitted in front of it.
    let cond_end = self.emit.pos();
    self.emit.set_pos(off_incr_begin);
    if self.tok.typ == TT::ParenthesisClose {
      self.emit.op(Op::PushUndef);
    } else {
      self.expr()?;
    }
    self.expect(TT::ParenthesisClose)?;
    self.emit.op(Op::Drop);
    let incr_size = self.emit.pos() - off_incr_begin;
    off_cond_begin += incr_size;
    self.emit.set_pos(cond_end + incr_size);

    let off_cond_end = self.emit.jump(Op::JmpFalse);
    self.loop_body()?;
    self.emit.op(Op::Drop);
    self.emit.op(Op::Continue);

    self.emit.patch(off_cond_end, self.emit.pos())?;
    let patch = self.emit.patch(off_init_end, off_cond_begin)?;
    off_incr_begin = patch.moved(off_incr_begin);
    self.emit.patch(off_c, off_incr_begin)?;
    self.emit.op(Op::Break);
    // With empty placeholders B and C share a position; B must be written last so it lands
    // in front.
    self.emit.patch(off_b, self.emit.pos())?;
    self.emit.op(Op::DelScope);
    Ok(())
  }

  fn for_in(&mut self) -> Result<(), VmError> {
    self.emit.op(Op::NewScope);
    if self.tok.typ == TT::KeywordLet {
      self.next();
      let name = self.text().as_bytes();
      self.emit.op(Op::PushStr);
      self.emit.str(name);
      self.emit.op(Op::PushScope);
      self.emit.op(Op::Create);
    }
    let name = self.text().as_bytes();
    self.emit.op(Op::PushStr);
    self.emit.str(name);
    self.expect(TT::Identifier)?;
    self.expect(TT::KeywordIn)?;
    self.expr()?;
    self.expect(TT::ParenthesisClose)?;
    // Iterator state.
    self.emit.op(Op::PushUndef);

    self.emit.op(Op::Loop);
    let off_b = self.emit.placeholder();
    self.emit.varint(0);

    self.emit.op(Op::ForInNext);
    self.emit.op(Op::Dup);
    let off_check_end = self.emit.jump(Op::JmpFalse);
    self.loop_body()?;
    self.emit.op(Op::Drop);
    self.emit.op(Op::Continue);

    self.emit.patch(off_check_end, self.emit.pos())?;
    self.emit.op(Op::Break);
    self.emit.patch(off_b, self.emit.pos())?;
    // Name, object, iterator and the break value.
    for _ in 0..4 {
      self.emit.op(Op::Drop);
    }
    self.emit.op(Op::PushUndef);
    self.emit.op(Op::DelScope);
    Ok(())
  }
}
