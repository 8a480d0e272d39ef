use crate::lexer::{LexerError, Token, TokenKind};
use crate::source::Span;
use crate::types::{list_from_vec, SpecialForm, Value};
use logos::Logos;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    UnexpectedToken { found: Token, expected: String },
    UnexpectedEof(String),
    LexerError(LexerError),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::UnexpectedToken { found, expected } => {
                write!(
                    f,
                    "Parse error: unexpected token '{}', expected {}",
                    found.kind, expected
                )
            }
            ParseError::UnexpectedEof(expected) => {
                write!(f, "Parse error: unexpected end of input, expected {}", expected)
            }
            ParseError::LexerError(lex_err) => write!(f, "Parse error: {}", lex_err),
        }
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ParseError::LexerError(lex_err) => Some(lex_err),
            _ => None,
        }
    }
}

impl From<LexerError> for ParseError {
    fn from(err: LexerError) -> Self {
        ParseError::LexerError(err)
    }
}

type ParseResult<T> = Result<T, ParseError>;

/// The reader. Pulls tokens lazily so that everything after the first
/// complete form is left untouched and can be handed back as the residual
/// suffix.
pub struct Parser<'a> {
    input: &'a str,
    lexer: logos::Lexer<'a, TokenKind>,
    peeked: Option<Token>,
    consumed: usize,
}

impl<'a> Parser<'a> {
    pub fn new(input: &'a str) -> Self {
        Parser {
            input,
            lexer: TokenKind::lexer(input),
            peeked: None,
            consumed: 0,
        }
    }

    fn peek_token(&mut self) -> ParseResult<Option<&Token>> {
        if self.peeked.is_none() {
            match self.lexer.next() {
                None => {}
                Some(result) => {
                    let span = Span::new(self.lexer.span().start, self.lexer.span().end);
                    match result {
                        Ok(kind) => self.peeked = Some(Token { kind, span }),
                        Err(error) => {
                            return Err(ParseError::LexerError(LexerError { error, span }));
                        }
                    }
                }
            }
        }
        Ok(self.peeked.as_ref())
    }

    fn next_token(&mut self) -> ParseResult<Option<Token>> {
        self.peek_token()?;
        let token = self.peeked.take();
        if let Some(token) = &token {
            self.consumed = token.span.end;
        }
        Ok(token)
    }

    /// True once no further token remains (trailing whitespace and
    /// comments count as nothing).
    pub fn at_eof(&mut self) -> ParseResult<bool> {
        Ok(self.peek_token()?.is_none())
    }

    /// The lexically unused remainder of the input.
    pub fn rest(&self) -> &'a str {
        let start = match &self.peeked {
            Some(token) => token.span.start,
            None => self.consumed,
        };
        &self.input[start.min(self.input.len())..]
    }

    /// Parses a single expression.
    pub fn parse_expr(&mut self) -> ParseResult<Value> {
        match self.next_token()? {
            None => Err(ParseError::UnexpectedEof("an expression".to_string())),
            Some(token) => match token.kind {
                TokenKind::LParen => self.parse_list(),
                TokenKind::Quote => self.parse_quote(),
                TokenKind::RParen => Err(ParseError::UnexpectedToken {
                    found: token,
                    expected: "an expression".to_string(),
                }),
                TokenKind::Integer(n) => Ok(Value::Integer(n)),
                TokenKind::Float(n) => Ok(Value::Float(n)),
                TokenKind::Str(s) => Ok(Value::Str(s)),
                TokenKind::Atom(lexeme) => Ok(classify_atom(lexeme)),
            },
        }
    }

    /// Parses the elements of `(...)` after the opening parenthesis, then
    /// applies the dotted-method rewrites to the finished list.
    fn parse_list(&mut self) -> ParseResult<Value> {
        let mut elements = Vec::new();
        loop {
            match self.peek_token()? {
                Some(Token {
                    kind: TokenKind::RParen,
                    ..
                }) => {
                    self.next_token()?;
                    return Ok(list_from_vec(rewrite_dotted(elements)));
                }
                Some(_) => elements.push(self.parse_expr()?),
                None => return Err(ParseError::UnexpectedEof("')'".to_string())),
            }
        }
    }

    /// `'x` reads as `(quote x)`.
    fn parse_quote(&mut self) -> ParseResult<Value> {
        let quoted = self.parse_expr()?;
        Ok(list_from_vec(vec![
            Value::Builtin(SpecialForm::Quote),
            quoted,
        ]))
    }
}

/// Atoms resolve in order: nil, booleans (case-insensitive), special-form
/// keywords, symbols. Numbers were already split off by the lexer.
fn classify_atom(lexeme: String) -> Value {
    if lexeme == "nil" {
        return Value::Nil;
    }
    if lexeme.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if lexeme.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    match SpecialForm::from_keyword(&lexeme) {
        Some(form) => Value::Builtin(form),
        None => Value::Symbol(lexeme),
    }
}

/// The dotted-method sugar, applied to a just-read list when its head is a
/// Symbol. A bare `.` or `.-` head is only rewritten for lists of length
/// three or more, so the variadic marker in parameter lists stays a Symbol.
fn rewrite_dotted(mut elements: Vec<Value>) -> Vec<Value> {
    let name = match elements.first() {
        Some(Value::Symbol(name)) => name.clone(),
        _ => return elements,
    };
    if name == "." {
        if elements.len() >= 3 {
            elements[0] = Value::Builtin(SpecialForm::Dot);
        }
    } else if name == ".-" {
        if elements.len() >= 3 {
            elements[0] = Value::Builtin(SpecialForm::DotField);
        }
    } else if let Some(field) = name.strip_prefix(".-") {
        elements[0] = Value::Symbol(field.to_string());
        elements.insert(0, Value::Builtin(SpecialForm::DotField));
    } else if let Some(method) = name.strip_prefix('.') {
        elements[0] = Value::Symbol(method.to_string());
        elements.insert(0, Value::Builtin(SpecialForm::Dot));
    }
    elements
}

/// Reads one form and returns it with the unused remainder of the input.
pub fn read_form(input: &str) -> ParseResult<(Value, &str)> {
    let mut parser = Parser::new(input);
    let value = parser.parse_expr()?;
    Ok((value, parser.rest()))
}

/// Reads exactly one form; trailing tokens are an error.
pub fn parse_str(input: &str) -> ParseResult<Value> {
    let mut parser = Parser::new(input);
    let value = parser.parse_expr()?;
    match parser.peek_token()? {
        Some(token) => Err(ParseError::UnexpectedToken {
            found: token.clone(),
            expected: "end of input".to_string(),
        }),
        None => Ok(value),
    }
}

/// Reads every form in the input (files, REPL lines, `load`).
pub fn parse_program(input: &str) -> ParseResult<Vec<Value>> {
    let mut parser = Parser::new(input);
    let mut forms = Vec::new();
    while !parser.at_eof()? {
        forms.push(parser.parse_expr()?);
    }
    Ok(forms)
}
