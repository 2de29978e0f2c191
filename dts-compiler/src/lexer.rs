//! Lexical analysis of device tree sources.
//!
//! The [`Lexer`] turns source text into a lazy stream of [`Token`]s. Whitespace and comments are
//! discarded; every other character either starts a token or is reported as a [`LexError`].

use std::fmt;

use nom::{
    branch::alt,
    bytes::complete::{tag, take_till, take_until, take_while, take_while_m_n},
    character::complete::{alphanumeric0, anychar, char, digit1, multispace0, multispace1, satisfy},
    combinator::{map, map_opt, peek, recognize, value},
    error::{ErrorKind, ParseError},
    sequence::{delimited, pair, preceded, terminated},
    Slice,
};
use nom_locate::LocatedSpan;
use thiserror::Error;

use crate::{error::Position, source::SourceId, tree::Reference};

pub(crate) type Span<'s> = LocatedSpan<&'s str>;

type IResult<'s, T> = nom::IResult<Span<'s>, T, Failure<'s>>;

/// A lexical token together with the position of its first character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// Node or property name.
    Ident(String),
    /// Label definition, without the trailing colon.
    Label(String),
    Ref(Reference),
    /// String literal with escapes already decoded.
    Str(String),
    Num(u64),
    Char(char),
    Bytes(Vec<u8>),
    Symbol(Symbol),
    Directive(Directive),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Symbol {
    LBrace,
    RBrace,
    LParen,
    RParen,
    LAngle,
    RAngle,
    Semicolon,
    Comma,
    Equals,
    Slash,
    Colon,
    Question,
    Plus,
    Minus,
    Star,
    Percent,
    Caret,
    Ampersand,
    Pipe,
    Tilde,
    Bang,
    Shl,
    Shr,
    Le,
    Ge,
    EqEq,
    Ne,
    AndAnd,
    OrOr,
}

impl Symbol {
    fn from_char(c: char) -> Option<Self> {
        Some(match c {
            '{' => Symbol::LBrace,
            '}' => Symbol::RBrace,
            '(' => Symbol::LParen,
            ')' => Symbol::RParen,
            '<' => Symbol::LAngle,
            '>' => Symbol::RAngle,
            ';' => Symbol::Semicolon,
            ',' => Symbol::Comma,
            '=' => Symbol::Equals,
            '/' => Symbol::Slash,
            ':' => Symbol::Colon,
            '?' => Symbol::Question,
            '+' => Symbol::Plus,
            '-' => Symbol::Minus,
            '*' => Symbol::Star,
            '%' => Symbol::Percent,
            '^' => Symbol::Caret,
            '&' => Symbol::Ampersand,
            '|' => Symbol::Pipe,
            '~' => Symbol::Tilde,
            '!' => Symbol::Bang,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Symbol::LBrace => "{",
            Symbol::RBrace => "}",
            Symbol::LParen => "(",
            Symbol::RParen => ")",
            Symbol::LAngle => "<",
            Symbol::RAngle => ">",
            Symbol::Semicolon => ";",
            Symbol::Comma => ",",
            Symbol::Equals => "=",
            Symbol::Slash => "/",
            Symbol::Colon => ":",
            Symbol::Question => "?",
            Symbol::Plus => "+",
            Symbol::Minus => "-",
            Symbol::Star => "*",
            Symbol::Percent => "%",
            Symbol::Caret => "^",
            Symbol::Ampersand => "&",
            Symbol::Pipe => "|",
            Symbol::Tilde => "~",
            Symbol::Bang => "!",
            Symbol::Shl => "<<",
            Symbol::Shr => ">>",
            Symbol::Le => "<=",
            Symbol::Ge => ">=",
            Symbol::EqEq => "==",
            Symbol::Ne => "!=",
            Symbol::AndAnd => "&&",
            Symbol::OrOr => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Directive {
    Version,
    MemReserve,
    Include,
    Bits,
    DeleteNode,
    DeleteProperty,
    OmitIfNoRef,
}

impl Directive {
    pub fn as_str(self) -> &'static str {
        match self {
            Directive::Version => "/dts-v1/",
            Directive::MemReserve => "/memreserve/",
            Directive::Include => "/include/",
            Directive::Bits => "/bits/",
            Directive::DeleteNode => "/delete-node/",
            Directive::DeleteProperty => "/delete-property/",
            Directive::OmitIfNoRef => "/omit-if-no-ref/",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Ident(name) => write!(f, "`{name}`"),
            TokenKind::Label(name) => write!(f, "label `{name}:`"),
            TokenKind::Ref(reference) => write!(f, "reference `{reference}`"),
            TokenKind::Str(s) => write!(f, "string \"{}\"", s.escape_debug()),
            TokenKind::Num(n) => write!(f, "integer {n}"),
            TokenKind::Char(c) => write!(f, "character '{}'", c.escape_debug()),
            TokenKind::Bytes(_) => f.write_str("byte string"),
            TokenKind::Symbol(s) => write!(f, "`{}`", s.as_str()),
            TokenKind::Directive(d) => write!(f, "`{}`", d.as_str()),
        }
    }
}

/// Fatal error raised while scanning source text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}")]
pub struct LexError {
    pub kind: LexErrorKind,
    pub position: Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LexErrorKind {
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("unterminated block comment")]
    UnterminatedComment,
    #[error("invalid escape sequence")]
    InvalidEscape,
    #[error("invalid numeric literal")]
    InvalidNumericLiteral,
    #[error("unterminated character literal")]
    UnterminatedCharLiteral,
    #[error("unexpected character")]
    UnexpectedCharacter,
}

/// Lazy token stream over one source text.
///
/// Scanning stops at the first error, which is yielded once; afterwards the iterator is exhausted.
#[derive(Debug, Clone)]
pub struct Lexer<'s> {
    text: &'s str,
    rest: Span<'s>,
    source: SourceId,
    finished: bool,
    cursor: LineCursor,
}

/// Last reported position, so columns are counted from there instead of from the line start.
#[derive(Debug, Clone, Copy)]
struct LineCursor {
    line: u32,
    offset: usize,
    column: u32,
}

impl Default for LineCursor {
    fn default() -> Self {
        Self {
            line: 0,
            offset: 0,
            column: 1,
        }
    }
}

impl<'s> Lexer<'s> {
    pub fn new(text: &'s str, source: SourceId) -> Self {
        Self {
            text,
            rest: Span::new(text),
            source,
            finished: false,
            cursor: LineCursor::default(),
        }
    }

    /// Creates a lexer that continues scanning `text` at `offset`.
    ///
    /// `offset` must be a value previously returned by [`Lexer::offset`] for the same text.
    pub fn resume(text: &'s str, source: SourceId, offset: usize) -> Self {
        Self {
            text,
            rest: Span::new(text).slice(offset.min(text.len())..),
            source,
            finished: false,
            cursor: LineCursor::default(),
        }
    }

    /// Byte offset of the first character not yet consumed.
    pub fn offset(&self) -> usize {
        self.rest.location_offset()
    }

    /// Position of the start of `span`. Spans must be passed in non-decreasing order for the
    /// column count to stay linear in the line length.
    fn span_position(&mut self, span: Span) -> Position {
        let line = span.location_line();
        let offset = span.location_offset();

        if self.cursor.line != line || offset < self.cursor.offset {
            let line_start = self.text[..offset].rfind('\n').map_or(0, |i| i + 1);
            self.cursor = LineCursor {
                line,
                offset: line_start,
                column: 1,
            };
        }

        let advanced = self.text[self.cursor.offset..offset].chars().count() as u32;
        self.cursor.offset = offset;
        self.cursor.column += advanced;

        Position::new(self.source, line, self.cursor.column)
    }
}

impl Iterator for Lexer<'_> {
    type Item = Result<Token, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let scanned = skip(self.rest).and_then(|(start, ())| {
            if start.fragment().is_empty() {
                return Ok((start, None));
            }
            let (rest, kind) = token(start)?;
            Ok((rest, Some((start, kind))))
        });

        match scanned {
            Ok((rest, Some((start, kind)))) => {
                self.rest = rest;
                Some(Ok(Token {
                    kind,
                    position: self.span_position(start),
                }))
            }
            Ok((rest, None)) => {
                self.rest = rest;
                self.finished = true;
                None
            }
            Err(nom::Err::Error(e) | nom::Err::Failure(e)) => {
                self.finished = true;
                Some(Err(LexError {
                    kind: e.kind.unwrap_or(LexErrorKind::UnexpectedCharacter),
                    position: self.span_position(e.input),
                }))
            }
            Err(nom::Err::Incomplete(_)) => {
                self.finished = true;
                let rest = self.rest;
                Some(Err(LexError {
                    kind: LexErrorKind::UnexpectedCharacter,
                    position: self.span_position(rest),
                }))
            }
        }
    }
}

/// Scan a single token. Ordering is important here!
fn token(input: Span) -> IResult<TokenKind> {
    alt((
        map(directive, TokenKind::Directive),
        map(string_literal, TokenKind::Str),
        map(char_literal, TokenKind::Char),
        map(byte_string, TokenKind::Bytes),
        map(reference, TokenKind::Ref),
        map(number, TokenKind::Num),
        map(symbol, TokenKind::Symbol),
        word,
    ))(input)
}

/// Parse a directive keyword.
///
/// Both the Devicetree-style `/include/` and the C-style `#include` spellings are recognized.
fn directive(input: Span) -> IResult<Directive> {
    let cpp_include = terminated(tag("#include"), peek(alt((multispace1, tag("\"")))));

    alt((
        value(Directive::Version, tag("/dts-v1/")),
        value(Directive::MemReserve, tag("/memreserve/")),
        value(Directive::Include, tag("/include/")),
        value(Directive::Include, cpp_include),
        value(Directive::Bits, tag("/bits/")),
        value(Directive::DeleteNode, tag("/delete-node/")),
        value(Directive::DeleteProperty, tag("/delete-property/")),
        value(Directive::OmitIfNoRef, tag("/omit-if-no-ref/")),
    ))(input)
}

/// Parse a string literal, decoding its escape sequences.
fn string_literal(input: Span) -> IResult<String> {
    let (mut rest, _) = char('"')(input)?;
    let mut decoded = String::new();

    loop {
        match rest.fragment().chars().next() {
            None => return fatal(input, LexErrorKind::UnterminatedString),
            Some('"') => return Ok((rest.slice(1..), decoded)),
            Some('\\') => {
                let (after, c) = escape(rest)?;
                decoded.push(c);
                rest = after;
            }
            Some(c) => {
                decoded.push(c);
                rest = rest.slice(c.len_utf8()..);
            }
        }
    }
}

/// Parse a character literal such as `'a'` or `'\n'`.
fn char_literal(input: Span) -> IResult<char> {
    let (body, _) = char('\'')(input)?;

    let (rest, c) = match body.fragment().chars().next() {
        Some('\\') => escape(body)?,
        Some(c) if c != '\'' && c != '\n' => (body.slice(c.len_utf8()..), c),
        _ => return fatal(input, LexErrorKind::UnterminatedCharLiteral),
    };

    let close: IResult<char> = char('\'')(rest);
    match close {
        Ok((rest, _)) => Ok((rest, c)),
        Err(_) => fatal(input, LexErrorKind::UnterminatedCharLiteral),
    }
}

/// Decode the escape sequence starting at the backslash in `input`.
///
/// Escaped values are limited to ASCII.
fn escape(input: Span) -> IResult<char> {
    let body = input.slice(1..);

    let Some(c) = body.fragment().chars().next() else {
        return fatal(input, LexErrorKind::UnterminatedString);
    };

    let simple = match c {
        'n' => Some('\n'),
        't' => Some('\t'),
        'r' => Some('\r'),
        'a' => Some('\x07'),
        'b' => Some('\x08'),
        'f' => Some('\x0c'),
        'v' => Some('\x0b'),
        '\\' | '"' | '\'' => Some(c),
        _ => None,
    };
    if let Some(c) = simple {
        return Ok((body.slice(1..), c));
    }

    let numeric: IResult<(Span, u32)> = match c {
        'x' => map(
            take_while_m_n(1, 2, |c: char| c.is_ascii_hexdigit()),
            |digits: Span| (digits, 16),
        )(body.slice(1..)),
        '0'..='7' => map(
            take_while_m_n(1, 3, |c: char| c.is_digit(8)),
            |digits: Span| (digits, 8),
        )(body),
        _ => return fatal(input, LexErrorKind::InvalidEscape),
    };

    let Ok((rest, (digits, radix))) = numeric else {
        return fatal(input, LexErrorKind::InvalidEscape);
    };

    match u32::from_str_radix(digits.fragment(), radix) {
        Ok(code) if code < 0x80 => Ok((rest, char::from(code as u8))),
        _ => fatal(input, LexErrorKind::InvalidEscape),
    }
}

/// Parse a byte string such as `[de ad be ef]` or `[deadbeef]`.
fn byte_string(input: Span) -> IResult<Vec<u8>> {
    let (rest, content) = preceded(
        char('['),
        take_while(|c: char| c.is_ascii_hexdigit() || c.is_ascii_whitespace()),
    )(input)?;

    let close: IResult<char> = char(']')(rest);
    let Ok((rest, _)) = close else {
        return fatal(rest, LexErrorKind::InvalidNumericLiteral);
    };

    let digits: Vec<u8> = content
        .fragment()
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    if digits.len() % 2 != 0 {
        return fatal(input, LexErrorKind::InvalidNumericLiteral);
    }

    let bytes = digits
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|s| u8::from_str_radix(s, 16).ok())
        })
        .collect::<Option<Vec<u8>>>();

    match bytes {
        Some(bytes) => Ok((rest, bytes)),
        None => fatal(input, LexErrorKind::InvalidNumericLiteral),
    }
}

/// Parse a node reference, either by label (`&uart0`) or by path (`&{/soc/uart@1000}`).
fn reference(input: Span) -> IResult<Reference> {
    let by_path = map(delimited(char('{'), node_path, char('}')), |path: Span| {
        Reference::Path(path.fragment().to_string())
    });
    let by_label = map(label_name, |label: Span| {
        Reference::Label(label.fragment().to_string())
    });

    preceded(char('&'), alt((by_path, by_label)))(input)
}

/// Parse an integer literal.
///
/// The whole alphanumeric run is taken so that malformed literals such as `0xZZ` or `09` are
/// reported instead of being split into several tokens.
fn number(input: Span) -> IResult<u64> {
    let (rest, literal) = recognize(pair(digit1, alphanumeric0))(input)?;

    match parse_integer(literal.fragment()) {
        Some(n) => Ok((rest, n)),
        None => fatal(input, LexErrorKind::InvalidNumericLiteral),
    }
}

/// Parse a punctuation or operator symbol.
fn symbol(input: Span) -> IResult<Symbol> {
    alt((
        value(Symbol::Shl, tag("<<")),
        value(Symbol::Shr, tag(">>")),
        value(Symbol::Le, tag("<=")),
        value(Symbol::Ge, tag(">=")),
        value(Symbol::EqEq, tag("==")),
        value(Symbol::Ne, tag("!=")),
        value(Symbol::AndAnd, tag("&&")),
        value(Symbol::OrOr, tag("||")),
        map_opt(anychar, Symbol::from_char),
    ))(input)
}

/// Parse an identifier, or a label definition when it is directly followed by a colon.
fn word(input: Span) -> IResult<TokenKind> {
    let (rest, name) = recognize(pair(satisfy(is_name_start), take_while(is_name_char)))(input)?;
    let name = *name.fragment();

    let colon: IResult<char> = char(':')(rest);
    match colon {
        Ok((after, _)) if is_label(name) => Ok((after, TokenKind::Label(name.to_string()))),
        _ => Ok((rest, TokenKind::Ident(name.to_string()))),
    }
}

/// Converts the text of an integer literal in C notation to its value.
pub(crate) fn parse_integer(literal: &str) -> Option<u64> {
    let digits = literal.trim_end_matches(['u', 'U', 'l', 'L']);

    let (digits, radix) = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        (hex, 16)
    } else if digits.len() > 1 && digits.starts_with('0') {
        (&digits[1..], 8)
    } else {
        (digits, 10)
    };

    u64::from_str_radix(digits, radix).ok()
}

/* === Low-level syntax parsers === */

/// Consume whitespace and comments.
fn skip(input: Span) -> IResult<()> {
    let mut input = input;

    loop {
        let (rest, _) = multispace0(input)?;
        let comment: IResult<()> = alt((line_comment, block_comment))(rest);
        match comment {
            Ok((after, ())) => input = after,
            Err(nom::Err::Error(_)) => return Ok((rest, ())),
            Err(e) => return Err(e),
        }
    }
}

/// Parse a single line comment, stopping before the newline.
fn line_comment(input: Span) -> IResult<()> {
    value((), pair(tag("//"), take_till(|c: char| c == '\n')))(input)
}

/// Parse a block comment.
fn block_comment(input: Span) -> IResult<()> {
    let (body, _) = tag("/*")(input)?;

    let end: IResult<Span> = take_until("*/")(body);
    match end {
        Ok((rest, _)) => Ok((rest.slice(2..), ())),
        Err(_) => fatal(input, LexErrorKind::UnterminatedComment),
    }
}

/// Recognize a label name.
fn label_name(input: Span) -> IResult<Span> {
    recognize(pair(
        satisfy(|c| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}

/// Recognize an absolute node path.
fn node_path(input: Span) -> IResult<Span> {
    recognize(pair(char('/'), take_while(|c: char| c == '/' || is_name_char(c))))(input)
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '#'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || ",._+?#@-".contains(c)
}

fn is_label(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/* === Error plumbing === */

/// nom error carrying the lexical error kind, if the failure is a fatal one.
#[derive(Debug)]
pub(crate) struct Failure<'s> {
    input: Span<'s>,
    kind: Option<LexErrorKind>,
}

impl<'s> ParseError<Span<'s>> for Failure<'s> {
    fn from_error_kind(input: Span<'s>, _: ErrorKind) -> Self {
        Self { input, kind: None }
    }

    fn append(_: Span<'s>, _: ErrorKind, other: Self) -> Self {
        other
    }
}

fn fatal<T>(input: Span, kind: LexErrorKind) -> IResult<T> {
    Err(nom::Err::Failure(Failure {
        input,
        kind: Some(kind),
    }))
}

/* === Unit Tests === */

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        Lexer::new(input, SourceId::default())
            .map(|token| token.unwrap().kind)
            .collect()
    }

    fn first(input: &str) -> TokenKind {
        kinds(dbg!(input)).remove(0)
    }

    fn error(input: &str) -> LexError {
        Lexer::new(input, SourceId::default())
            .find_map(Result::err)
            .expect("input should not lex")
    }

    #[test]
    fn numbers() {
        for (input, expected) in [
            ("0", 0),
            ("1", 1),
            ("25", 25),
            ("0x1", 0x1),
            ("0x1f", 0x1f),
            ("0X1F", 0x1f),
            ("0x0010", 0x10),
            ("017", 0o17),
            ("10U", 10),
            ("0x10UL", 0x10),
            ("18446744073709551615", u64::MAX),
        ] {
            assert_eq!(first(input), TokenKind::Num(expected));
        }
    }

    #[test]
    fn invalid_numbers() {
        for input in ["0x", "0xZZ", "09", "12ab", "18446744073709551616"] {
            assert_eq!(
                error(dbg!(input)).kind,
                LexErrorKind::InvalidNumericLiteral
            );
        }
    }

    #[test]
    fn strings() {
        for (input, expected) in [
            (r#""word""#, "word"),
            (r#""more words""#, "more words"),
            ("\"words with\nnewline\"", "words with\nnewline"),
            (
                r#""words with nested \"quotes\"""#,
                r#"words with nested "quotes""#,
            ),
            (
                r#""words with escaped \\ delimiters""#,
                r#"words with escaped \ delimiters"#,
            ),
            (r#""tab\tnew\nline""#, "tab\tnew\nline"),
            (r#""\x41\x7""#, "A\x07"),
            (r#""\101\0""#, "A\0"),
            (r#""\a\b\f\v\r\'""#, "\x07\x08\x0c\x0b\r'"),
            (r#""""#, ""),
        ] {
            assert_eq!(first(input), TokenKind::Str(expected.into()));
        }
    }

    #[test]
    fn invalid_strings() {
        for (input, expected) in [
            (r#""no end"#, LexErrorKind::UnterminatedString),
            (r#""trailing \"#, LexErrorKind::UnterminatedString),
            (r#""\q""#, LexErrorKind::InvalidEscape),
            (r#""\xg0""#, LexErrorKind::InvalidEscape),
            (r#""\xff""#, LexErrorKind::InvalidEscape),
            (r#""\377""#, LexErrorKind::InvalidEscape),
        ] {
            assert_eq!(error(dbg!(input)).kind, expected);
        }
    }

    #[test]
    fn characters() {
        for (input, expected) in [("'a'", 'a'), ("'\\n'", '\n'), ("'\\''", '\''), ("'\\x20'", ' ')] {
            assert_eq!(first(input), TokenKind::Char(expected));
        }

        for input in ["'a", "''", "'ab'"] {
            assert_eq!(
                error(dbg!(input)).kind,
                LexErrorKind::UnterminatedCharLiteral
            );
        }
    }

    #[test]
    fn byte_strings() {
        for (input, expected) in [
            ("[00 11 2233]", vec![0x00, 0x11, 0x22, 0x33]),
            ("[deadBEEF]", vec![0xde, 0xad, 0xbe, 0xef]),
            ("[ ]", vec![]),
        ] {
            assert_eq!(first(input), TokenKind::Bytes(expected));
        }

        for input in ["[123]", "[12 zz]"] {
            assert_eq!(
                error(dbg!(input)).kind,
                LexErrorKind::InvalidNumericLiteral
            );
        }
    }

    #[test]
    fn symbols() {
        for input in [
            "{", "}", "(", ")", "<", ">", ";", ",", "=", "/", ":", "?", "+", "-", "*", "%", "^",
            "&", "|", "~", "!", "<<", ">>", "<=", ">=", "==", "!=", "&&", "||",
        ] {
            match first(input) {
                TokenKind::Symbol(s) => assert_eq!(s.as_str(), input),
                other => panic!("{input} lexed as {other:?}"),
            }
        }
    }

    #[test]
    fn identifiers() {
        for input in [
            "cpus",
            "L2_0",
            "l2-cache",
            "cpu@0",
            "ethernet@0,0",
            "ti,pmic-shutdown-controller",
            "#address-cells",
            "ibm,ppc-interrupt-server#s",
            "a-very-very-long-name-which-should-not-fail",
        ] {
            assert_eq!(first(input), TokenKind::Ident(input.into()));
        }
    }

    #[test]
    fn labels_and_references() {
        assert_eq!(
            kinds("L2: L2_1: l2-cache"),
            vec![
                TokenKind::Label("L2".into()),
                TokenKind::Label("L2_1".into()),
                TokenKind::Ident("l2-cache".into()),
            ]
        );

        for (input, expected) in [
            ("&mpic", Reference::Label("mpic".into())),
            ("&{/cpus/cpu@0}", Reference::Path("/cpus/cpu@0".into())),
            ("&{/}", Reference::Path("/".into())),
        ] {
            assert_eq!(first(input), TokenKind::Ref(expected));
        }

        // Labels start with a letter or an underscore.
        assert_eq!(
            kinds("&2"),
            vec![TokenKind::Symbol(Symbol::Ampersand), TokenKind::Num(2)]
        );
    }

    #[test]
    fn directives() {
        for (input, expected) in [
            ("/dts-v1/", Directive::Version),
            ("/bits/", Directive::Bits),
            ("/delete-node/", Directive::DeleteNode),
            ("/delete-property/", Directive::DeleteProperty),
            ("/omit-if-no-ref/", Directive::OmitIfNoRef),
            ("/memreserve/", Directive::MemReserve),
            ("/include/", Directive::Include),
            ("#include \"a.dtsi\"", Directive::Include),
            ("#include\"a.dtsi\"", Directive::Include),
        ] {
            assert_eq!(first(input), TokenKind::Directive(expected));
        }

        assert_eq!(first("#includes"), TokenKind::Ident("#includes".into()));
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("// line\n/* block\n comment */ a /**/; // trailing"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Symbol(Symbol::Semicolon)
            ]
        );

        assert_eq!(
            error("a; /* never closed").kind,
            LexErrorKind::UnterminatedComment
        );
    }

    #[test]
    fn unexpected_characters() {
        for input in ["$", "a = `b`;", "\u{e9}"] {
            assert_eq!(error(dbg!(input)).kind, LexErrorKind::UnexpectedCharacter);
        }
    }

    #[test]
    fn positions() {
        let tokens: Vec<_> = Lexer::new("/ {\n\tmodel = \"x\";\n};", SourceId::default())
            .map(|t| {
                let t = t.unwrap();
                (t.position.line, t.position.column)
            })
            .collect();

        assert_eq!(
            tokens,
            vec![(1, 1), (1, 3), (2, 2), (2, 8), (2, 10), (2, 13), (3, 1), (3, 2)]
        );

        let e = error("/ {\n  x = \"open");
        assert_eq!((e.position.line, e.position.column), (2, 7));
    }

    #[test]
    fn columns_on_long_lines() {
        let count = 50_000;
        let text = format!("/* é */ {}\n  z", "ab ".repeat(count));

        let columns: Vec<_> = Lexer::new(&text, SourceId::default())
            .map(|t| {
                let t = t.unwrap();
                (t.position.line, t.position.column)
            })
            .collect();

        assert_eq!(columns.len(), count + 1);
        for (k, &column) in columns[..count].iter().enumerate() {
            assert_eq!(column, (1, 9 + 3 * k as u32));
        }
        assert_eq!(columns[count], (2, 3));
    }

    #[test]
    fn errors_end_the_stream() {
        let mut lexer = Lexer::new("a $ b", SourceId::default());
        assert!(matches!(lexer.next(), Some(Ok(_))));
        assert!(matches!(lexer.next(), Some(Err(_))));
        assert_eq!(lexer.next(), None);
    }

    #[test]
    fn resume_from_checkpoint() {
        let text = "a {\n  b = <1>;\n};";
        let mut lexer = Lexer::new(text, SourceId::default());
        lexer.by_ref().take(3).for_each(drop);

        let checkpoint = lexer.offset();
        let expected: Vec<_> = lexer.collect();
        let resumed: Vec<_> = Lexer::resume(text, SourceId::default(), checkpoint).collect();

        assert_eq!(resumed, expected);
        assert_eq!(resumed[0].as_ref().unwrap().position.line, 2);
    }
}
