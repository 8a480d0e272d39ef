use klisp::{eval, parse_program, Environment, Value};
use rustyline::error::ReadlineError;
use rustyline::highlight::MatchingBracketHighlighter;
use rustyline::validate::MatchingBracketValidator;
use rustyline::{Cmd, Editor, EventHandler, KeyCode, KeyEvent, Modifiers};
use rustyline::{Completer, Helper, Highlighter, Hinter, Validator};
use std::cell::RefCell;
use std::process::ExitCode;
use std::rc::Rc;

const HISTORY_FILE: &str = ".klisp_history";

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("--version" | "-V") => {
            println!("klisp {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        Some("repl") | None => match repl() {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("Readline error: {err}");
                ExitCode::FAILURE
            }
        },
        Some("run") => run(&args[1..]),
        Some(other) => {
            eprintln!("klisp: unknown command '{}'", other);
            usage();
            ExitCode::from(2)
        }
    }
}

fn usage() {
    eprintln!("usage: klisp [--version | repl | run [FILE] [-e|--eval EXPR]]");
}

// --- run ---

fn run(args: &[String]) -> ExitCode {
    let mut file: Option<String> = None;
    let mut exprs: Vec<String> = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-e" | "--eval" => match iter.next() {
                Some(expr) => exprs.push(expr.clone()),
                None => {
                    eprintln!("klisp: '{}' expects an expression", arg);
                    usage();
                    return ExitCode::from(2);
                }
            },
            _ if file.is_none() => file = Some(arg.clone()),
            other => {
                eprintln!("klisp: unexpected argument '{}'", other);
                usage();
                return ExitCode::from(2);
            }
        }
    }

    let env = Environment::new_global();
    if let Some(path) = &file {
        let source = match std::fs::read_to_string(path) {
            Ok(source) => source,
            Err(err) => {
                eprintln!("Runtime error: {}: {}", path, err);
                return ExitCode::FAILURE;
            }
        };
        if let Some(code) = eval_source(path, &source, &env, false) {
            return code;
        }
    }
    for expr in &exprs {
        if let Some(code) = eval_source("command line", expr, &env, true) {
            return code;
        }
    }
    ExitCode::SUCCESS
}

/// Evaluates every form in `source`; returns a failure code on the first
/// error. `print_last` echoes the final value (used for -e expressions).
fn eval_source(
    source_id: &str,
    source: &str,
    env: &Rc<RefCell<Environment>>,
    print_last: bool,
) -> Option<ExitCode> {
    let forms = match parse_program(source) {
        Ok(forms) => forms,
        Err(parse_err) => {
            parse_err.pretty_print(source_id, source);
            return Some(ExitCode::FAILURE);
        }
    };
    let mut last = Value::Nil;
    for form in forms {
        match eval(&form, env) {
            Ok(value) => last = value,
            Err(eval_err) => {
                eprintln!("{}", eval_err);
                return Some(ExitCode::FAILURE);
            }
        }
    }
    if print_last {
        println!("{}", last.show());
    }
    None
}

// --- repl ---

#[derive(Completer, Helper, Highlighter, Hinter, Validator)]
struct InputValidator {
    #[rustyline(Validator)]
    brackets: MatchingBracketValidator,
    #[rustyline(Highlighter)]
    highlighter: MatchingBracketHighlighter,
}

fn repl() -> rustyline::Result<()> {
    println!("klisp {}", env!("CARGO_PKG_VERSION"));
    println!("Type 'exit' or press Ctrl-D to quit.");

    let env = Environment::new_global();
    let helper = InputValidator {
        brackets: MatchingBracketValidator::new(),
        highlighter: MatchingBracketHighlighter::new(),
    };
    let mut rl = Editor::new()?;
    rl.set_helper(Some(helper));
    rl.bind_sequence(
        KeyEvent(KeyCode::Char('s'), Modifiers::CTRL),
        EventHandler::Simple(Cmd::Newline),
    );
    if rl.load_history(HISTORY_FILE).is_err() {
        println!("No previous history.");
    }

    loop {
        match rl.readline("klisp> ") {
            Ok(line) => {
                rl.add_history_entry(line.as_str())?;
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if trimmed.eq_ignore_ascii_case("exit") {
                    break;
                }

                match parse_program(trimmed) {
                    Ok(forms) => {
                        for form in forms {
                            match eval(&form, &env) {
                                Ok(value) => println!("{}", value.show()),
                                Err(eval_err) => {
                                    // Report and keep the session alive
                                    eprintln!("{}", eval_err);
                                    break;
                                }
                            }
                        }
                    }
                    Err(parse_err) => parse_err.pretty_print("REPL", trimmed),
                }
            }
            Err(ReadlineError::Interrupted) => {
                // Ctrl-C
                println!("Interrupted. Type 'exit' or Ctrl-D to quit.");
            }
            Err(ReadlineError::Eof) => {
                // Ctrl-D
                println!("\nExiting.");
                break;
            }
            Err(err) => {
                eprintln!("Readline error: {:?}", err);
                break;
            }
        }
    }
    rl.save_history(HISTORY_FILE)
}
