use crate::source::Span;
use logos::Logos;
use std::fmt;
use std::num::{ParseFloatError, ParseIntError};

impl From<ParseIntError> for LexerErrorKind {
    fn from(err: ParseIntError) -> Self {
        LexerErrorKind::InvalidNumberFormat(err.to_string())
    }
}

impl From<ParseFloatError> for LexerErrorKind {
    fn from(err: ParseFloatError) -> Self {
        LexerErrorKind::InvalidNumberFormat(err.to_string())
    }
}

/// Raw token kinds. Atom classification (nil, booleans, special-form
/// keywords, symbols) happens in the reader; the lexer only separates
/// numbers, strings and punctuation from generic atoms.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")] // Skip whitespace
#[logos(skip r";[^\n\r]*")] // Skip comments
#[logos(error = LexerErrorKind)]
pub enum TokenKind {
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("'")]
    Quote,
    #[regex(r"-?[0-9]+", |lex| lex.slice().parse(), priority = 5)]
    Integer(i64),
    #[regex(r"-?[0-9]+\.[0-9]*", |lex| lex.slice().parse(), priority = 6)]
    #[regex(r"-?\.[0-9]+", |lex| lex.slice().parse(), priority = 6)]
    #[regex(r"-?[0-9]+(\.[0-9]+)?[eE][-+]?[0-9]+", |lex| lex.slice().parse(), priority = 6)]
    Float(f64),
    #[token("\"", string_lexer)]
    Str(String),
    // Any run of characters that are not delimiters. Backtick and comma are
    // reserved delimiters and match nothing, so they surface as InvalidToken.
    #[regex(r#"[^ \t\r\n()';,`"]+"#, |lex| lex.slice().to_string(), priority = 1)]
    Atom(String),
}

#[derive(Logos, Debug, PartialEq, Clone)]
enum StringContext {
    #[token("\"")]
    Quote,
    #[regex(r#"\\[ntr\\"]"#)]
    EscapedChar,
    #[regex(r#"\\[^ntr\\"]"#)]
    UnknownEscapedChar,
    #[regex(r#"[^"\\]+"#)]
    Content,
}

fn string_lexer(lex: &mut logos::Lexer<TokenKind>) -> Result<String, LexerErrorKind> {
    let mut result = String::new();
    let mut string_lexer = lex.clone().morph::<StringContext>();
    while let Some(Ok(token)) = string_lexer.next() {
        match token {
            StringContext::Quote => {
                *lex = string_lexer.morph();
                return Ok(result);
            }
            StringContext::EscapedChar => {
                result.push(match string_lexer.slice().chars().nth(1) {
                    Some('"') => '"',
                    Some('n') => '\n',
                    Some('r') => '\r',
                    Some('t') => '\t',
                    Some(c) => c, // '\\'
                    None => continue,
                })
            }
            StringContext::UnknownEscapedChar => {
                // An unknown escape passes through verbatim: "\x" -> '\' 'x'
                result.push('\\');
                if let Some(c) = string_lexer.slice().chars().nth(1) {
                    result.push(c);
                }
            }
            StringContext::Content => result.push_str(string_lexer.slice()),
        }
    }
    Err(LexerErrorKind::UnterminatedString)
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::LParen => write!(f, "("),
            TokenKind::RParen => write!(f, ")"),
            TokenKind::Quote => write!(f, "'"),
            TokenKind::Integer(n) => write!(f, "{}", n),
            TokenKind::Float(n) => write!(f, "{:?}", n),
            TokenKind::Str(s) => write!(f, "\"{}\"", s),
            TokenKind::Atom(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Default, Debug, Clone, PartialEq)]
pub enum LexerErrorKind {
    UnterminatedString,
    InvalidNumberFormat(String),
    #[default]
    InvalidToken,
}

impl fmt::Display for LexerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexerErrorKind::UnterminatedString => write!(f, "Unterminated string literal"),
            LexerErrorKind::InvalidNumberFormat(s) => write!(f, "Invalid number format: {}", s),
            LexerErrorKind::InvalidToken => write!(f, "Invalid token"),
        }
    }
}

/// A lexer failure together with the byte span it covers.
#[derive(Debug, Clone, PartialEq)]
pub struct LexerError {
    pub error: LexerErrorKind,
    pub span: Span,
}

impl fmt::Display for LexerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for LexerError {}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

/// Tokenize a whole input eagerly (tests and benchmarks; the reader pulls
/// tokens lazily so it can report the unused remainder).
pub fn tokenize(input: &str) -> Result<Vec<Token>, LexerError> {
    let mut lexer = TokenKind::lexer(input);
    let mut tokens = Vec::new();
    while let Some(result) = lexer.next() {
        let span = Span::new(lexer.span().start, lexer.span().end);
        match result {
            Ok(kind) => tokens.push(Token { kind, span }),
            Err(error) => return Err(LexerError { error, span }),
        }
    }
    Ok(tokens)
}
