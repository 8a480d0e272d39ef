use crate::parser::ParseError;
use ariadne::{Label, Report, ReportKind, Source};

impl ParseError {
    /// Renders the error as a labeled report against the offending source.
    /// `source_id` names the origin ("REPL" or a file path).
    pub fn pretty_print(&self, source_id: &str, input: &str) {
        let report = match self {
            ParseError::UnexpectedToken { found, expected } => {
                Report::build(ReportKind::Error, (source_id, found.span.to_range()))
                    .with_message(format!("Unexpected token: {}", found.kind))
                    .with_label(
                        Label::new((source_id, found.span.to_range()))
                            .with_message(format!("Expected {expected}")),
                    )
            }
            ParseError::UnexpectedEof(expected) => {
                let idx = input.len();
                Report::build(ReportKind::Error, (source_id, idx..=idx))
                    .with_message("Unexpected end of input")
                    .with_label(Label::new((source_id, idx..=idx)).with_message(expected))
            }
            ParseError::LexerError(lex_err) => {
                Report::build(ReportKind::Error, (source_id, lex_err.span.to_range()))
                    .with_message("Lexer error")
                    .with_label(
                        Label::new((source_id, lex_err.span.to_range()))
                            .with_message(lex_err.error.to_string()),
                    )
            }
        };
        if report
            .finish()
            .eprint((source_id, Source::from(input)))
            .is_err()
        {
            // Fall back to the plain rendering when stderr is closed
            eprintln!("{}", self);
        }
    }
}
