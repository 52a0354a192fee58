use ahash::HashMap;
use ahash::HashMapExt;
use once_cell::sync::Lazy;

/// Byte range `[start, end)` in the source text.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Loc(pub usize, pub usize);

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum TT {
  EOF,
  // Unlexable input, including unterminated strings. Always a syntax error once parsed.
  Invalid,

  Ampersand,
  AmpersandAmpersand,
  AmpersandEquals,
  Asterisk,
  AsteriskEquals,
  Bar,
  BarBar,
  BarEquals,
  BraceClose,
  BraceOpen,
  BracketClose,
  BracketOpen,
  Caret,
  CaretEquals,
  ChevronLeft,
  ChevronLeftChevronLeft,
  ChevronLeftChevronLeftEquals,
  ChevronLeftEquals,
  ChevronRight,
  ChevronRightChevronRight,
  ChevronRightChevronRightChevronRight,
  ChevronRightChevronRightChevronRightEquals,
  ChevronRightChevronRightEquals,
  ChevronRightEquals,
  Colon,
  Comma,
  Dot,
  Equals,
  EqualsEquals,
  EqualsEqualsEquals,
  Exclamation,
  ExclamationEquals,
  ExclamationEqualsEquals,
  Hyphen,
  HyphenEquals,
  HyphenHyphen,
  ParenthesisClose,
  ParenthesisOpen,
  Percent,
  PercentEquals,
  Plus,
  PlusEquals,
  PlusPlus,
  Question,
  Semicolon,
  Slash,
  SlashEquals,
  Tilde,

  Identifier,
  LiteralFalse,
  LiteralNull,
  LiteralNumber,
  LiteralNumberHex,
  LiteralString,
  LiteralTrue,
  LiteralUndefined,

  KeywordBreak,
  KeywordCase,
  KeywordCatch,
  KeywordContinue,
  KeywordDebugger,
  KeywordDefault,
  KeywordDelete,
  KeywordDo,
  KeywordElse,
  KeywordFinally,
  KeywordFor,
  KeywordFunction,
  KeywordIf,
  KeywordIn,
  KeywordInstanceof,
  KeywordLet,
  KeywordNew,
  KeywordReturn,
  KeywordSwitch,
  KeywordThis,
  KeywordThrow,
  KeywordTry,
  KeywordTypeof,
  KeywordVar,
  KeywordVoid,
  KeywordWhile,
  KeywordWith,
  KeywordYield,
}

impl TT {
  /// Assignment operators, including compound forms.
  pub fn is_assignment(self) -> bool {
    matches!(
      self,
      TT::Equals
        | TT::PlusEquals
        | TT::HyphenEquals
        | TT::AsteriskEquals
        | TT::SlashEquals
        | TT::PercentEquals
        | TT::ChevronLeftChevronLeftEquals
        | TT::ChevronRightChevronRightEquals
        | TT::ChevronRightChevronRightChevronRightEquals
        | TT::AmpersandEquals
        | TT::BarEquals
        | TT::CaretEquals
    )
  }

  pub fn is_update(self) -> bool {
    matches!(self, TT::PlusPlus | TT::HyphenHyphen)
  }
}

#[derive(Copy, Clone, Debug)]
pub struct Token {
  pub typ: TT,
  pub loc: Loc,
  /// 1-based line of the first byte.
  pub line: u32,
}

pub static KEYWORDS: Lazy<HashMap<&'static str, TT>> = Lazy::new(|| {
  let mut map = HashMap::<&'static str, TT>::new();
  map.insert("break", TT::KeywordBreak);
  map.insert("case", TT::KeywordCase);
  map.insert("catch", TT::KeywordCatch);
  map.insert("continue", TT::KeywordContinue);
  map.insert("debugger", TT::KeywordDebugger);
  map.insert("default", TT::KeywordDefault);
  map.insert("delete", TT::KeywordDelete);
  map.insert("do", TT::KeywordDo);
  map.insert("else", TT::KeywordElse);
  map.insert("false", TT::LiteralFalse);
  map.insert("finally", TT::KeywordFinally);
  map.insert("for", TT::KeywordFor);
  map.insert("function", TT::KeywordFunction);
  map.insert("if", TT::KeywordIf);
  map.insert("in", TT::KeywordIn);
  map.insert("instanceof", TT::KeywordInstanceof);
  map.insert("let", TT::KeywordLet);
  map.insert("new", TT::KeywordNew);
  map.insert("null", TT::LiteralNull);
  map.insert("return", TT::KeywordReturn);
  map.insert("switch", TT::KeywordSwitch);
  map.insert("this", TT::KeywordThis);
  map.insert("throw", TT::KeywordThrow);
  map.insert("true", TT::LiteralTrue);
  map.insert("try", TT::KeywordTry);
  map.insert("typeof", TT::KeywordTypeof);
  map.insert("undefined", TT::LiteralUndefined);
  map.insert("var", TT::KeywordVar);
  map.insert("void", TT::KeywordVoid);
  map.insert("while", TT::KeywordWhile);
  map.insert("with", TT::KeywordWith);
  map.insert("yield", TT::KeywordYield);
  map
});
