//! Instruction set.
//!
//! Operands follow the opcode byte. Jump distances and integers are varints; jumps are relative
//! to the end of their operand. `LOOP` carries two distances: the break target relative to the
//! end of the first operand and the continue target relative to the end of the second.

macro_rules! opcodes {
  ($($name:ident = $byte:literal => $text:literal,)*) => {
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
    #[repr(u8)]
    pub enum Op {
      $($name = $byte,)*
    }

    impl Op {
      pub fn from_u8(b: u8) -> Option<Op> {
        match b {
          $($byte => Some(Op::$name),)*
          _ => None,
        }
      }

      pub fn name(self) -> &'static str {
        match self {
          $(Op::$name => $text,)*
        }
      }
    }
  };
}

opcodes! {
  Nop = 0 => "NOP",
  Drop = 1 => "DROP",
  Dup = 2 => "DUP",
  Dup2 = 3 => "2DUP",
  Swap = 4 => "SWAP",
  Jmp = 5 => "JMP",
  JmpTrue = 6 => "JMP_TRUE",
  JmpNeutralTrue = 7 => "JMP_NEUTRAL_TRUE",
  JmpFalse = 8 => "JMP_FALSE",
  JmpNeutralFalse = 9 => "JMP_NEUTRAL_FALSE",
  FindScope = 10 => "FIND_SCOPE",
  PushScope = 11 => "PUSH_SCOPE",
  PushStr = 12 => "PUSH_STR",
  PushTrue = 13 => "PUSH_TRUE",
  PushFalse = 14 => "PUSH_FALSE",
  PushInt = 15 => "PUSH_INT",
  PushDbl = 16 => "PUSH_DBL",
  PushNull = 17 => "PUSH_NULL",
  PushUndef = 18 => "PUSH_UNDEF",
  PushObj = 19 => "PUSH_OBJ",
  PushArray = 20 => "PUSH_ARRAY",
  PushFunc = 21 => "PUSH_FUNC",
  PushThis = 22 => "PUSH_THIS",
  Get = 23 => "GET",
  Create = 24 => "CREATE",
  Expr = 25 => "EXPR",
  Append = 26 => "APPEND",
  SetArg = 27 => "SET_ARG",
  NewScope = 28 => "NEW_SCOPE",
  DelScope = 29 => "DEL_SCOPE",
  Call = 30 => "CALL",
  Return = 31 => "RETURN",
  Loop = 32 => "LOOP",
  Break = 33 => "BREAK",
  Continue = 34 => "CONTINUE",
  SetRetVal = 35 => "SETRETVAL",
  Exit = 36 => "EXIT",
  BcodeHeader = 37 => "BCODE_HDR",
  Args = 38 => "ARGS",
  ForInNext = 39 => "FOR_IN_NEXT",
}

impl Op {
  /// Jumps with a single relative operand.
  pub fn is_jump(self) -> bool {
    matches!(
      self,
      Op::Jmp | Op::JmpTrue | Op::JmpFalse | Op::JmpNeutralTrue | Op::JmpNeutralFalse
    )
  }
}

macro_rules! expr_ops {
  ($($name:ident = $byte:literal => $text:literal,)*) => {
    /// Operator carried by an `EXPR` instruction.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
    #[repr(u8)]
    pub enum ExprOp {
      $($name = $byte,)*
    }

    impl ExprOp {
      pub fn from_u8(b: u8) -> Option<ExprOp> {
        match b {
          $($byte => Some(ExprOp::$name),)*
          _ => None,
        }
      }

      pub fn symbol(self) -> &'static str {
        match self {
          $(ExprOp::$name => $text,)*
        }
      }
    }
  };
}

expr_ops! {
  Add = 0 => "+",
  Sub = 1 => "-",
  Mul = 2 => "*",
  Div = 3 => "/",
  Rem = 4 => "%",
  Shl = 5 => "<<",
  Shr = 6 => ">>",
  Ushr = 7 => ">>>",
  BitAnd = 8 => "&",
  BitOr = 9 => "|",
  BitXor = 10 => "^",
  Lt = 11 => "<",
  Le = 12 => "<=",
  Gt = 13 => ">",
  Ge = 14 => ">=",
  Eq = 15 => "==",
  Ne = 16 => "!=",
  StrictEq = 17 => "===",
  StrictNe = 18 => "!==",
  Not = 19 => "!",
  BitNot = 20 => "~",
  Neg = 21 => "unary -",
  Pos = 22 => "unary +",
  Typeof = 23 => "typeof",
  Assign = 24 => "=",
  AddAssign = 25 => "+=",
  SubAssign = 26 => "-=",
  MulAssign = 27 => "*=",
  DivAssign = 28 => "/=",
  RemAssign = 29 => "%=",
  ShlAssign = 30 => "<<=",
  ShrAssign = 31 => ">>=",
  UshrAssign = 32 => ">>>=",
  BitAndAssign = 33 => "&=",
  BitOrAssign = 34 => "|=",
  BitXorAssign = 35 => "^=",
  PreInc = 36 => "++",
  PreDec = 37 => "--",
  PostInc = 38 => "postfix ++",
  PostDec = 39 => "postfix --",
}

impl ExprOp {
  /// The binary operator a compound assignment applies.
  pub fn compound_base(self) -> Option<ExprOp> {
    Some(match self {
      ExprOp::AddAssign => ExprOp::Add,
      ExprOp::SubAssign => ExprOp::Sub,
      ExprOp::MulAssign => ExprOp::Mul,
      ExprOp::DivAssign => ExprOp::Div,
      ExprOp::RemAssign => ExprOp::Rem,
      ExprOp::ShlAssign => ExprOp::Shl,
      ExprOp::ShrAssign => ExprOp::Shr,
      ExprOp::UshrAssign => ExprOp::Ushr,
      ExprOp::BitAndAssign => ExprOp::BitAnd,
      ExprOp::BitOrAssign => ExprOp::BitOr,
      ExprOp::BitXorAssign => ExprOp::BitXor,
      _ => return None,
    })
  }
}
