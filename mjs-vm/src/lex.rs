use crate::token::Loc;
use crate::token::Token;
use crate::token::KEYWORDS;
use crate::token::TT;
use aho_corasick::AhoCorasick;
use aho_corasick::AhoCorasickBuilder;
use aho_corasick::AhoCorasickKind;
use aho_corasick::Anchored;
use aho_corasick::Input;
use aho_corasick::MatchKind;
use aho_corasick::StartKind;
use memchr::memchr;
use memchr::memchr2;
use memchr::memchr_iter;
use memchr::memmem;
use once_cell::sync::Lazy;

struct PatternMatcher {
  patterns: Vec<TT>,
  matcher: Option<AhoCorasick>,
}

impl PatternMatcher {
  fn new(patterns: &[(TT, &str)]) -> Self {
    let matcher = AhoCorasickBuilder::new()
      .start_kind(StartKind::Anchored)
      .kind(Some(AhoCorasickKind::DFA))
      .match_kind(MatchKind::LeftmostLongest)
      .build(patterns.iter().map(|(_, s)| s.as_bytes()))
      .ok();
    debug_assert!(matcher.is_some(), "punctuator automaton failed to build");
    PatternMatcher {
      patterns: patterns.iter().map(|(tt, _)| *tt).collect(),
      matcher,
    }
  }

  /// Longest pattern at the start of `input`, with its length.
  fn find(&self, input: &[u8]) -> Option<(TT, usize)> {
    self
      .matcher
      .as_ref()?
      .find(Input::new(input).anchored(Anchored::Yes))
      .map(|m| (self.patterns[m.pattern().as_usize()], m.end()))
  }
}

static PUNCTUATORS: Lazy<PatternMatcher> = Lazy::new(|| {
  PatternMatcher::new(&[
    (TT::Ampersand, "&"),
    (TT::AmpersandAmpersand, "&&"),
    (TT::AmpersandEquals, "&="),
    (TT::Asterisk, "*"),
    (TT::AsteriskEquals, "*="),
    (TT::Bar, "|"),
    (TT::BarBar, "||"),
    (TT::BarEquals, "|="),
    (TT::BraceClose, "}"),
    (TT::BraceOpen, "{"),
    (TT::BracketClose, "]"),
    (TT::BracketOpen, "["),
    (TT::Caret, "^"),
    (TT::CaretEquals, "^="),
    (TT::ChevronLeft, "<"),
    (TT::ChevronLeftChevronLeft, "<<"),
    (TT::ChevronLeftChevronLeftEquals, "<<="),
    (TT::ChevronLeftEquals, "<="),
    (TT::ChevronRight, ">"),
    (TT::ChevronRightChevronRight, ">>"),
    (TT::ChevronRightChevronRightChevronRight, ">>>"),
    (TT::ChevronRightChevronRightChevronRightEquals, ">>>="),
    (TT::ChevronRightChevronRightEquals, ">>="),
    (TT::ChevronRightEquals, ">="),
    (TT::Colon, ":"),
    (TT::Comma, ","),
    (TT::Dot, "."),
    (TT::Equals, "="),
    (TT::EqualsEquals, "=="),
    (TT::EqualsEqualsEquals, "==="),
    (TT::Exclamation, "!"),
    (TT::ExclamationEquals, "!="),
    (TT::ExclamationEqualsEquals, "!=="),
    (TT::Hyphen, "-"),
    (TT::HyphenEquals, "-="),
    (TT::HyphenHyphen, "--"),
    (TT::ParenthesisClose, ")"),
    (TT::ParenthesisOpen, "("),
    (TT::Percent, "%"),
    (TT::PercentEquals, "%="),
    (TT::Plus, "+"),
    (TT::PlusEquals, "+="),
    (TT::PlusPlus, "++"),
    (TT::Question, "?"),
    (TT::Semicolon, ";"),
    (TT::Slash, "/"),
    (TT::SlashEquals, "/="),
    (TT::Tilde, "~"),
  ])
});

fn is_id_start(c: u8) -> bool {
  c.is_ascii_alphabetic() || c == b'_' || c == b'$'
}

fn is_id_continue(c: u8) -> bool {
  is_id_start(c) || c.is_ascii_digit()
}

#[derive(Copy, Clone)]
pub struct LexerCheckpoint {
  next: usize,
  line: u32,
}

pub struct Lexer<'a> {
  source: &'a str,
  next: usize,
  line: u32,
}

impl<'a> Lexer<'a> {
  pub fn new(source: &'a str) -> Lexer<'a> {
    Lexer {
      source,
      next: 0,
      line: 1,
    }
  }

  pub fn source(&self) -> &'a str {
    self.source
  }

  fn bytes(&self) -> &'a [u8] {
    &self.source.as_bytes()[self.next..]
  }

  pub fn checkpoint(&self) -> LexerCheckpoint {
    LexerCheckpoint {
      next: self.next,
      line: self.line,
    }
  }

  pub fn apply_checkpoint(&mut self, checkpoint: LexerCheckpoint) {
    self.next = checkpoint.next;
    self.line = checkpoint.line;
  }

  fn advance(&mut self, n: usize) {
    let end = (self.next + n).min(self.source.len());
    self.line += memchr_iter(b'\n', &self.source.as_bytes()[self.next..end]).count() as u32;
    self.next = end;
  }

  fn skip_insignificant(&mut self) {
    loop {
      let rest = self.bytes();
      let ws = rest
        .iter()
        .take_while(|c| c.is_ascii_whitespace())
        .count();
      if ws > 0 {
        self.advance(ws);
        continue;
      }
      if rest.starts_with(b"//") {
        self.advance(memchr(b'\n', rest).unwrap_or(rest.len()));
        continue;
      }
      if rest.starts_with(b"/*") {
        let len = memmem::find(&rest[2..], b"*/").map_or(rest.len(), |i| i + 4);
        self.advance(len);
        continue;
      }
      break;
    }
  }

  fn number_len(rest: &[u8]) -> (TT, usize) {
    if rest.len() > 2 && rest[0] == b'0' && (rest[1] | 0x20) == b'x' && rest[2].is_ascii_hexdigit()
    {
      let digits = rest[2..].iter().take_while(|c| c.is_ascii_hexdigit()).count();
      return (TT::LiteralNumberHex, 2 + digits);
    }
    let digits = |from: usize| rest[from..].iter().take_while(|c| c.is_ascii_digit()).count();
    let mut len = digits(0);
    if rest.get(len) == Some(&b'.') {
      len += 1 + digits(len + 1);
    }
    if matches!(rest.get(len), Some(b'e' | b'E')) {
      let mut exp = len + 1;
      if matches!(rest.get(exp), Some(b'+' | b'-')) {
        exp += 1;
      }
      let n = digits(exp);
      if n > 0 {
        len = exp + n;
      }
    }
    (TT::LiteralNumber, len)
  }

  /// Length of a quoted string including both quotes, or `None` if it never closes.
  fn string_len(rest: &[u8]) -> Option<usize> {
    let quote = rest[0];
    let mut i = 1;
    loop {
      i += memchr2(quote, b'\\', &rest[i..])?;
      if rest[i] == quote {
        return Some(i + 1);
      }
      i += 2;
      if i > rest.len() {
        return None;
      }
    }
  }

  pub fn next_token(&mut self) -> Token {
    self.skip_insignificant();
    let start = self.next;
    let line = self.line;
    let rest = self.bytes();
    let (typ, len) = match rest.first() {
      None => (TT::EOF, 0),
      Some(&c) if is_id_start(c) => {
        let len = rest.iter().take_while(|c| is_id_continue(**c)).count();
        let word = &self.source[start..start + len];
        (KEYWORDS.get(word).copied().unwrap_or(TT::Identifier), len)
      }
      Some(&c) if c.is_ascii_digit() => Self::number_len(rest),
      Some(b'.') if rest.get(1).is_some_and(|c| c.is_ascii_digit()) => Self::number_len(rest),
      Some(b'"' | b'\'') => match Self::string_len(rest) {
        Some(len) => (TT::LiteralString, len),
        None => (TT::Invalid, rest.len()),
      },
      Some(_) => PUNCTUATORS.find(rest).unwrap_or_else(|| {
        let width = self.source[start..].chars().next().map_or(1, char::len_utf8);
        (TT::Invalid, width)
      }),
    };
    self.advance(len);
    Token {
      typ,
      loc: Loc(start, start + len),
      line,
    }
  }
}

/// Decodes backslash escapes of a string literal body.
pub fn unescape(raw: &[u8]) -> Vec<u8> {
  let mut out = Vec::with_capacity(raw.len());
  let mut i = 0;
  while i < raw.len() {
    let Some(pos) = memchr(b'\\', &raw[i..]) else {
      out.extend_from_slice(&raw[i..]);
      break;
    };
    out.extend_from_slice(&raw[i..i + pos]);
    i += pos + 1;
    let Some(&c) = raw.get(i) else {
      out.push(b'\\');
      break;
    };
    i += 1;
    let hex = |from: usize, n: usize| -> Option<u32> {
      let digits = raw.get(from..from + n)?;
      u32::from_str_radix(std::str::from_utf8(digits).ok()?, 16).ok()
    };
    match c {
      b'n' => out.push(b'\n'),
      b't' => out.push(b'\t'),
      b'r' => out.push(b'\r'),
      b'b' => out.push(0x08),
      b'f' => out.push(0x0C),
      b'v' => out.push(0x0B),
      b'0' => out.push(0),
      b'\\' | b'\'' | b'"' => out.push(c),
      b'x' => match hex(i, 2) {
        Some(v) => {
          out.push(v as u8);
          i += 2;
        }
        None => out.extend_from_slice(b"\\x"),
      },
      b'u' => match hex(i, 4).and_then(char::from_u32) {
        Some(ch) => {
          let mut buf = [0u8; 4];
          out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
          i += 4;
        }
        None => out.extend_from_slice(b"\\u"),
      },
      other => {
        out.push(b'\\');
        out.push(other);
      }
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  fn types(src: &str) -> Vec<TT> {
    let mut lexer = Lexer::new(src);
    let mut out = Vec::new();
    loop {
      let t = lexer.next_token();
      out.push(t.typ);
      if t.typ == TT::EOF {
        return out;
      }
    }
  }

  #[test]
  fn longest_punctuator_wins() {
    assert_eq!(
      types("a >>>= b !== c"),
      vec![
        TT::Identifier,
        TT::ChevronRightChevronRightChevronRightEquals,
        TT::Identifier,
        TT::ExclamationEqualsEquals,
        TT::Identifier,
        TT::EOF,
      ]
    );
  }

  #[test]
  fn comments_advance_line_numbers() {
    let mut lexer = Lexer::new("// one\n/* two\nthree */ let x = 0x1F;\n'unterminated");
    let t = lexer.next_token();
    assert_eq!((t.typ, t.line), (TT::KeywordLet, 3));
    assert_eq!(lexer.next_token().typ, TT::Identifier);
    assert_eq!(lexer.next_token().typ, TT::Equals);
    let n = lexer.next_token();
    assert_eq!(n.typ, TT::LiteralNumberHex);
    assert_eq!(&lexer.source()[n.loc.0..n.loc.1], "0x1F");
    assert_eq!(lexer.next_token().typ, TT::Semicolon);
    let s = lexer.next_token();
    assert_eq!((s.typ, s.line), (TT::Invalid, 4));
  }

  #[test]
  fn numbers_with_fraction_and_exponent() {
    let mut lexer = Lexer::new("1.5e3 2.x");
    assert_eq!(lexer.next_token().loc, Loc(0, 5));
    let t = lexer.next_token();
    assert_eq!((t.typ, t.loc), (TT::LiteralNumber, Loc(6, 8)));
    assert_eq!(lexer.next_token().typ, TT::Identifier);
  }

  #[test]
  fn escapes() {
    assert_eq!(
      unescape(br"a\n\x41\u00e9\q\\"),
      b"a\nA\xc3\xa9\\q\\".to_vec()
    );
    assert_eq!(unescape(br"tail\"), b"tail\\".to_vec());
  }
}
