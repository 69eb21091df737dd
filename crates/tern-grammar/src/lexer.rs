//! Module for the lexer implementation.

use logos::Logos;

use crate::Span;

/// Represents a lexer error.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Error {
    /// An unexpected token was encountered.
    #[default]
    #[error("an unexpected token was encountered")]
    UnexpectedToken,
}

/// The result type for the lexer.
pub type LexerResult<T> = Result<T, Error>;

/// Represents a token for supported escape sequences within string and bytes
/// literals.
///
/// Escape sequences are not validated by the main lexer; the literal text is
/// re-lexed with this token type when the literal's value is decoded.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum EscapeToken {
    /// Valid single character escape sequences.
    #[token(r"\a")]
    #[token(r"\b")]
    #[token(r"\f")]
    #[token(r"\n")]
    #[token(r"\r")]
    #[token(r"\t")]
    #[token(r"\v")]
    #[token(r"\\")]
    #[token(r"\'")]
    #[token(r#"\""#)]
    #[token(r"\?")]
    #[token(r"\`")]
    Valid,

    /// Valid octal escape sequence.
    #[regex(r"\\[0-7][0-7][0-7]")]
    ValidOctal,

    /// Invalid octal escape sequence.
    #[regex(r"\\[0-9]")]
    InvalidOctal,

    /// Valid hex escape sequence.
    #[regex(r"\\x[0-9a-fA-F][0-9a-fA-F]")]
    ValidHex,

    /// Invalid hex escape sequence.
    #[token(r"\x")]
    InvalidHex,

    /// Valid unicode escape sequence.
    #[regex(r"(\\u[0-9a-fA-F]{4})|(\\U[0-9a-fA-F]{8})")]
    ValidUnicode,

    /// Invalid short unicode escape sequence.
    #[token(r"\u")]
    InvalidShortUnicode,

    /// Invalid unicode escape sequence.
    #[token(r"\U")]
    InvalidUnicode,

    /// An unknown escape sequence.
    #[regex(r"\\.", priority = 0)]
    Unknown,

    /// Normal text.
    #[regex(r"[^\\]+")]
    Text,
}

/// Represents a Tern token.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
#[logos(error = Error)]
#[logos(subpattern exp = r"[eE][+-]?[0-9]+")]
#[logos(subpattern prefix = r"([rR][bB]?|[bB][rR]?)")]
pub enum Token {
    /// Contiguous whitespace.
    #[regex(r"[ \t\r\n]+")]
    Whitespace,

    /// A comment.
    #[regex(r"//[^\n]*", allow_greedy = true)]
    Comment,

    /// A literal double.
    #[regex(r"[0-9]*\.[0-9]+(?&exp)?")]
    #[regex(r"[0-9]+(?&exp)")]
    Double,

    /// A literal signed integer.
    #[regex(r"[0-9]+")]
    #[regex(r"0[xX][0-9a-fA-F]+")]
    Integer,

    /// A literal unsigned integer.
    #[regex(r"[0-9]+[uU]")]
    #[regex(r"0[xX][0-9a-fA-F]+[uU]")]
    UnsignedInteger,

    /// A string or bytes literal, including any `r`/`b` prefix.
    #[regex(r#"(?&prefix)?"([^"\\\n]|\\[^\n])*""#)]
    #[regex(r#"(?&prefix)?'([^'\\\n]|\\[^\n])*'"#)]
    StringLiteral,

    /// An unterminated string or bytes literal.
    #[regex(r#"(?&prefix)?"([^"\\\n]|\\[^\n])*"#)]
    #[regex(r#"(?&prefix)?'([^'\\\n]|\\[^\n])*"#)]
    UnterminatedString,

    /// The `true` keyword.
    #[token("true")]
    TrueKeyword,
    /// The `false` keyword.
    #[token("false")]
    FalseKeyword,
    /// The `null` keyword.
    #[token("null")]
    NullKeyword,
    /// The `in` operator keyword.
    #[token("in")]
    InKeyword,

    /// A word reserved for future use.
    ///
    /// Reserved words may not be used as identifiers or function names.
    #[token("as")]
    #[token("break")]
    #[token("const")]
    #[token("continue")]
    #[token("else")]
    #[token("for")]
    #[token("function")]
    #[token("if")]
    #[token("import")]
    #[token("let")]
    #[token("loop")]
    #[token("package")]
    #[token("namespace")]
    #[token("return")]
    #[token("var")]
    #[token("void")]
    #[token("while")]
    ReservedKeyword,

    /// An identifier.
    #[regex(r"[_a-zA-Z][_a-zA-Z0-9]*")]
    Ident,

    /// The `(` symbol.
    #[token("(")]
    OpenParen,
    /// The `)` symbol.
    #[token(")")]
    CloseParen,
    /// The `[` symbol.
    #[token("[")]
    OpenBracket,
    /// The `]` symbol.
    #[token("]")]
    CloseBracket,
    /// The `{` symbol.
    #[token("{")]
    OpenBrace,
    /// The `}` symbol.
    #[token("}")]
    CloseBrace,
    /// The `.` symbol.
    #[token(".")]
    Dot,
    /// The `,` symbol.
    #[token(",")]
    Comma,
    /// The `?` symbol.
    #[token("?")]
    QuestionMark,
    /// The `:` symbol.
    #[token(":")]
    Colon,
    /// The `+` symbol.
    #[token("+")]
    Plus,
    /// The `-` symbol.
    #[token("-")]
    Minus,
    /// The `*` symbol.
    #[token("*")]
    Asterisk,
    /// The `/` symbol.
    #[token("/")]
    Slash,
    /// The `%` symbol.
    #[token("%")]
    Percent,
    /// The `!` symbol.
    #[token("!")]
    Exclamation,
    /// The `||` symbol.
    #[token("||")]
    LogicalOr,
    /// The `&&` symbol.
    #[token("&&")]
    LogicalAnd,
    /// The `==` symbol.
    #[token("==")]
    Equal,
    /// The `!=` symbol.
    #[token("!=")]
    NotEqual,
    /// The `<=` symbol.
    #[token("<=")]
    LessEqual,
    /// The `>=` symbol.
    #[token(">=")]
    GreaterEqual,
    /// The `<` symbol.
    #[token("<")]
    Less,
    /// The `>` symbol.
    #[token(">")]
    Greater,
}

impl Token {
    /// Describes the token for use in diagnostics.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Whitespace => "whitespace",
            Self::Comment => "comment",
            Self::Double => "double literal",
            Self::Integer => "integer literal",
            Self::UnsignedInteger => "unsigned integer literal",
            Self::StringLiteral => "string literal",
            Self::UnterminatedString => "unterminated string",
            Self::TrueKeyword => "`true` keyword",
            Self::FalseKeyword => "`false` keyword",
            Self::NullKeyword => "`null` keyword",
            Self::InKeyword => "`in` keyword",
            Self::ReservedKeyword => "reserved word",
            Self::Ident => "identifier",
            Self::OpenParen => "`(` symbol",
            Self::CloseParen => "`)` symbol",
            Self::OpenBracket => "`[` symbol",
            Self::CloseBracket => "`]` symbol",
            Self::OpenBrace => "`{` symbol",
            Self::CloseBrace => "`}` symbol",
            Self::Dot => "`.` symbol",
            Self::Comma => "`,` symbol",
            Self::QuestionMark => "`?` symbol",
            Self::Colon => "`:` symbol",
            Self::Plus => "`+` symbol",
            Self::Minus => "`-` symbol",
            Self::Asterisk => "`*` symbol",
            Self::Slash => "`/` symbol",
            Self::Percent => "`%` symbol",
            Self::Exclamation => "`!` symbol",
            Self::LogicalOr => "`||` symbol",
            Self::LogicalAnd => "`&&` symbol",
            Self::Equal => "`==` symbol",
            Self::NotEqual => "`!=` symbol",
            Self::LessEqual => "`<=` symbol",
            Self::GreaterEqual => "`>=` symbol",
            Self::Less => "`<` symbol",
            Self::Greater => "`>` symbol",
        }
    }

    /// Determines if the token is trivia that the parser skips over.
    pub fn is_trivia(&self) -> bool {
        matches!(self, Self::Whitespace | Self::Comment)
    }
}

/// Implements a Tern lexer.
///
/// A lexer produces a stream of tokens from a Tern source string.
pub struct Lexer<'a> {
    /// The inner lexer.
    lexer: logos::Lexer<'a, Token>,
    /// The stored peeked result [see `peek`][Self::peek].
    peeked: Option<Option<(LexerResult<Token>, Span)>>,
}

impl<'a> Lexer<'a> {
    /// Creates a new lexer for the given source string.
    pub fn new(source: &'a str) -> Self {
        Self {
            lexer: Token::lexer(source),
            peeked: None,
        }
    }

    /// Gets the source string of the given span.
    pub fn source(&self, span: Span) -> &'a str {
        &self.lexer.source()[span.start()..span.end()]
    }

    /// Gets the length of the source.
    pub fn source_len(&self) -> usize {
        self.lexer.source().len()
    }

    /// Gets the current span of the lexer.
    pub fn span(&self) -> Span {
        self.lexer.span().into()
    }

    /// Peeks at the next token.
    pub fn peek(&mut self) -> Option<(LexerResult<Token>, Span)> {
        *self.peeked.get_or_insert_with(|| {
            self.lexer.next().map(|r| (r, self.lexer.span().into()))
        })
    }
}

impl Iterator for Lexer<'_> {
    type Item = (LexerResult<Token>, Span);

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(peeked) = self.peeked.take() {
            peeked
        } else {
            self.lexer.next().map(|r| (r, self.lexer.span().into()))
        }
    }
}

/// Represents the decoded value of a string or bytes literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// The literal decoded to text.
    Text(String),
    /// The literal decoded to bytes.
    Bytes(Vec<u8>),
}

/// Represents an error decoding a string or bytes literal.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct DecodeError {
    /// The decode error message.
    pub message: String,
    /// The byte offset of the offending escape within the literal token.
    pub offset: usize,
}

/// Decodes the value of a string or bytes literal token.
///
/// The given text must be the full token slice, including any `r`/`b` prefix
/// and the surrounding quotes.
pub fn decode_literal(text: &str) -> Result<Decoded, DecodeError> {
    let mut raw = false;
    let mut bytes = false;
    let mut rest = text;
    loop {
        match rest.as_bytes().first() {
            Some(b'r' | b'R') if !raw => {
                raw = true;
                rest = &rest[1..];
            }
            Some(b'b' | b'B') if !bytes => {
                bytes = true;
                rest = &rest[1..];
            }
            _ => break,
        }
    }

    let prefix_len = text.len() - rest.len();
    debug_assert!(rest.len() >= 2, "literal should include its quotes");
    let inner = &rest[1..rest.len() - 1];

    if raw {
        return Ok(if bytes {
            Decoded::Bytes(inner.as_bytes().to_vec())
        } else {
            Decoded::Text(inner.to_string())
        });
    }

    let mut out = Vec::with_capacity(inner.len());
    let mut lexer = EscapeToken::lexer(inner);
    while let Some(token) = lexer.next() {
        let slice = lexer.slice();
        // The escape token set matches any input, so the lexer cannot error
        let token = token.expect("escape lexer should match all input");
        let offset = prefix_len + 1 + lexer.span().start;
        match token {
            EscapeToken::Valid => {
                let c = match slice.as_bytes()[1] {
                    b'a' => 0x07,
                    b'b' => 0x08,
                    b'f' => 0x0c,
                    b'n' => b'\n',
                    b'r' => b'\r',
                    b't' => b'\t',
                    b'v' => 0x0b,
                    c => c,
                };
                out.push(c);
            }
            EscapeToken::ValidOctal => {
                let value = u32::from_str_radix(&slice[1..], 8).expect("octal should parse");
                if bytes {
                    out.push(value as u8);
                } else {
                    push_char(&mut out, value, offset)?;
                }
            }
            EscapeToken::ValidHex => {
                let value = u32::from_str_radix(&slice[2..], 16).expect("hex should parse");
                if bytes {
                    out.push(value as u8);
                } else {
                    push_char(&mut out, value, offset)?;
                }
            }
            EscapeToken::ValidUnicode => {
                if bytes {
                    return Err(DecodeError {
                        message: "unicode escapes are not supported in bytes literals"
                            .to_string(),
                        offset,
                    });
                }

                let value = u32::from_str_radix(&slice[2..], 16).expect("unicode should parse");
                push_char(&mut out, value, offset)?;
            }
            EscapeToken::InvalidOctal => {
                return Err(DecodeError {
                    message: "octal escapes must have exactly three digits".to_string(),
                    offset,
                });
            }
            EscapeToken::InvalidHex => {
                return Err(DecodeError {
                    message: "hex escapes must have exactly two digits".to_string(),
                    offset,
                });
            }
            EscapeToken::InvalidShortUnicode => {
                return Err(DecodeError {
                    message: "unicode escapes must have exactly four hex digits".to_string(),
                    offset,
                });
            }
            EscapeToken::InvalidUnicode => {
                return Err(DecodeError {
                    message: "unicode escapes must have exactly eight hex digits".to_string(),
                    offset,
                });
            }
            EscapeToken::Unknown => {
                return Err(DecodeError {
                    message: format!("unknown escape sequence `{slice}`"),
                    offset,
                });
            }
            EscapeToken::Text => {
                out.extend_from_slice(slice.as_bytes());
            }
        }
    }

    if bytes {
        Ok(Decoded::Bytes(out))
    } else {
        // Individual pieces are valid UTF-8, so the whole is as well
        Ok(Decoded::Text(
            String::from_utf8(out).expect("decoded text should be UTF-8"),
        ))
    }
}

/// Pushes a decoded code point onto the output as UTF-8.
fn push_char(out: &mut Vec<u8>, value: u32, offset: usize) -> Result<(), DecodeError> {
    let c = char::from_u32(value).ok_or_else(|| DecodeError {
        message: format!("invalid code point U+{value:04X} in escape sequence"),
        offset,
    })?;
    let mut buf = [0; 4];
    out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
    Ok(())
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    fn tokens(source: &str) -> Vec<(LexerResult<Token>, std::ops::Range<usize>)> {
        Lexer::new(source)
            .map(|(t, s)| (t, s.start()..s.end()))
            .collect()
    }

    #[test]
    fn lexes_numeric_literals() {
        use Token::*;
        assert_eq!(
            tokens("1 25u 0x1F 1.5 .5 2e10 1e-3"),
            &[
                (Ok(Integer), 0..1),
                (Ok(Whitespace), 1..2),
                (Ok(UnsignedInteger), 2..5),
                (Ok(Whitespace), 5..6),
                (Ok(Integer), 6..10),
                (Ok(Whitespace), 10..11),
                (Ok(Double), 11..14),
                (Ok(Whitespace), 14..15),
                (Ok(Double), 15..17),
                (Ok(Whitespace), 17..18),
                (Ok(Double), 18..22),
                (Ok(Whitespace), 22..23),
                (Ok(Double), 23..27),
            ],
        );
    }

    #[test]
    fn lexes_strings_with_prefixes() {
        use Token::*;
        assert_eq!(
            tokens(r#""hi" 'there' r"\d+" b'\x00' rb"raw""#),
            &[
                (Ok(StringLiteral), 0..4),
                (Ok(Whitespace), 4..5),
                (Ok(StringLiteral), 5..12),
                (Ok(Whitespace), 12..13),
                (Ok(StringLiteral), 13..19),
                (Ok(Whitespace), 19..20),
                (Ok(StringLiteral), 20..27),
                (Ok(Whitespace), 27..28),
                (Ok(StringLiteral), 28..35),
            ],
        );
    }

    #[test]
    fn lexes_operators() {
        use Token::*;
        assert_eq!(
            tokens("a && b || !c == d"),
            &[
                (Ok(Ident), 0..1),
                (Ok(Whitespace), 1..2),
                (Ok(LogicalAnd), 2..4),
                (Ok(Whitespace), 4..5),
                (Ok(Ident), 5..6),
                (Ok(Whitespace), 6..7),
                (Ok(LogicalOr), 7..9),
                (Ok(Whitespace), 9..10),
                (Ok(Exclamation), 10..11),
                (Ok(Ident), 11..12),
                (Ok(Whitespace), 12..13),
                (Ok(Equal), 13..15),
                (Ok(Whitespace), 15..16),
                (Ok(Ident), 16..17),
            ],
        );
    }

    #[test]
    fn reports_unterminated_strings() {
        use Token::*;
        assert_eq!(
            tokens("'oops"),
            &[(Ok(UnterminatedString), 0..5)],
        );
    }

    #[test]
    fn decodes_escape_sequences() {
        assert_eq!(
            decode_literal(r#""a\nb\x41é""#),
            Ok(Decoded::Text("a\nbA\u{e9}".to_string())),
        );
        assert_eq!(
            decode_literal(r"'\101\''"),
            Ok(Decoded::Text("A'".to_string())),
        );
        assert_eq!(
            decode_literal(r#"b'\xff\x00a'"#),
            Ok(Decoded::Bytes(vec![0xff, 0x00, b'a'])),
        );
        assert_eq!(
            decode_literal(r#"r"\d+""#),
            Ok(Decoded::Text(r"\d+".to_string())),
        );
    }

    #[test]
    fn rejects_invalid_escapes() {
        let err = decode_literal(r#""\q""#).unwrap_err();
        assert_eq!(err.message, r"unknown escape sequence `\q`");
        assert_eq!(err.offset, 1);

        let err = decode_literal(r#"b"\u0041""#).unwrap_err();
        assert_eq!(
            err.message,
            "unicode escapes are not supported in bytes literals"
        );
    }
}
