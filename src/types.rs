use crate::environment::Environment;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// The reified primitives of the language. The reader produces these
/// directly from the keyword table, so symbols never resolve to them
/// through the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialForm {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    Gt,
    Lt,
    Concat,
    If,
    Set,
    Print,
    Read,
    Lambda,
    Do,
    Load,
    Raise,
    Macro,
    ExpandMacro,
    Quote,
    Def,
    Symbol,
    Car,
    Cdr,
    Cons,
    TypeOf,
    Eval,
    // Produced only by the reader's dotted-method rewrites, never by the
    // keyword table.
    Dot,
    DotField,
}

impl SpecialForm {
    pub fn from_keyword(name: &str) -> Option<SpecialForm> {
        let form = match name {
            "+" => SpecialForm::Add,
            "-" => SpecialForm::Sub,
            "*" => SpecialForm::Mul,
            "/" => SpecialForm::Div,
            "%" => SpecialForm::Mod,
            "^" => SpecialForm::Pow,
            "=" => SpecialForm::Eq,
            ">" => SpecialForm::Gt,
            "<" => SpecialForm::Lt,
            "++" => SpecialForm::Concat,
            "if" => SpecialForm::If,
            "set!" => SpecialForm::Set,
            "print" => SpecialForm::Print,
            "read" => SpecialForm::Read,
            "lambda" => SpecialForm::Lambda,
            "do" => SpecialForm::Do,
            "load" => SpecialForm::Load,
            "raise" => SpecialForm::Raise,
            "macro" => SpecialForm::Macro,
            "expand-macro" => SpecialForm::ExpandMacro,
            "quote" => SpecialForm::Quote,
            "def" => SpecialForm::Def,
            "symbol" => SpecialForm::Symbol,
            "car" => SpecialForm::Car,
            "cdr" => SpecialForm::Cdr,
            "cons" => SpecialForm::Cons,
            "type-of" => SpecialForm::TypeOf,
            "eval" => SpecialForm::Eval,
            _ => return None,
        };
        Some(form)
    }

    pub fn keyword(self) -> &'static str {
        match self {
            SpecialForm::Add => "+",
            SpecialForm::Sub => "-",
            SpecialForm::Mul => "*",
            SpecialForm::Div => "/",
            SpecialForm::Mod => "%",
            SpecialForm::Pow => "^",
            SpecialForm::Eq => "=",
            SpecialForm::Gt => ">",
            SpecialForm::Lt => "<",
            SpecialForm::Concat => "++",
            SpecialForm::If => "if",
            SpecialForm::Set => "set!",
            SpecialForm::Print => "print",
            SpecialForm::Read => "read",
            SpecialForm::Lambda => "lambda",
            SpecialForm::Do => "do",
            SpecialForm::Load => "load",
            SpecialForm::Raise => "raise",
            SpecialForm::Macro => "macro",
            SpecialForm::ExpandMacro => "expand-macro",
            SpecialForm::Quote => "quote",
            SpecialForm::Def => "def",
            SpecialForm::Symbol => "symbol",
            SpecialForm::Car => "car",
            SpecialForm::Cdr => "cdr",
            SpecialForm::Cons => "cons",
            SpecialForm::TypeOf => "type-of",
            SpecialForm::Eval => "eval",
            SpecialForm::Dot => ".",
            SpecialForm::DotField => ".-",
        }
    }
}

impl fmt::Display for SpecialForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.keyword())
    }
}

/// A closure: parameter names, an optional variadic rest name, a single
/// body form and the environment it was created in. The environment is
/// held by reference so mutations through `set!` stay observable.
#[derive(Clone)]
pub struct Lambda {
    pub params: Vec<String>,
    pub variadic: Option<String>,
    pub body: Value,
    pub env: Rc<RefCell<Environment>>,
}

impl fmt::Debug for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lambda")
            .field("params", &self.params)
            .field("variadic", &self.variadic)
            .field("body", &self.body)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Lambda {
    fn eq(&self, other: &Self) -> bool {
        self.params == other.params
            && self.variadic == other.variadic
            && self.body == other.body
            && Rc::ptr_eq(&self.env, &other.env)
    }
}

/// A macro is a lambda without a captured environment: expansion happens
/// at the call site by literal substitution.
#[derive(Debug, Clone, PartialEq)]
pub struct Macro {
    pub params: Vec<String>,
    pub variadic: Option<String>,
    pub body: Value,
}

/// A run-time value. Code and data share this representation; lists are
/// Nil-terminated chains of Cons cells.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Symbol(String),
    Nil,
    Cons(Rc<Value>, Rc<Value>),
    Builtin(SpecialForm),
    Lambda(Rc<Lambda>),
    Macro(Rc<Macro>),
}

/// Build a single pair.
pub fn cons(car: Value, cdr: Value) -> Value {
    Value::Cons(Rc::new(car), Rc::new(cdr))
}

/// Build a proper list, right to left.
pub fn list_from_vec(items: Vec<Value>) -> Value {
    items
        .into_iter()
        .rev()
        .fold(Value::Nil, |tail, item| cons(item, tail))
}

/// Flatten a cons spine into a vector. Returns None for improper lists.
pub fn list_to_vec(value: &Value) -> Option<Vec<Value>> {
    let mut items = Vec::new();
    let mut current = value;
    loop {
        match current {
            Value::Nil => return Some(items),
            Value::Cons(head, tail) => {
                items.push((**head).clone());
                current = tail;
            }
            _ => return None,
        }
    }
}

impl Value {
    /// `Bool false` and Nil are false; every other value is true.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Bool(false) | Value::Nil)
    }

    /// The degenerate `(())` form the evaluator short-circuits to Nil.
    pub fn is_empty_list(&self) -> bool {
        matches!(self, Value::Cons(head, tail)
            if **head == Value::Nil && **tail == Value::Nil)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Bool(_) => "boolean",
            Value::Symbol(_) => "symbol",
            Value::Nil => "nil",
            Value::Cons(_, _) => "list",
            Value::Builtin(_) => "builtin",
            Value::Lambda(_) => "lambda",
            Value::Macro(_) => "macro",
        }
    }

    /// The REPL-facing form: identical to `Display` except strings keep
    /// their quotes and escapes.
    pub fn show(&self) -> String {
        match self {
            Value::Str(s) => format!("\"{}\"", escape_string(s)),
            other => other.to_string(),
        }
    }
}

fn escape_string(s: &str) -> String {
    s.chars().fold(String::new(), |mut acc, char| {
        match char {
            '"' => acc.push_str("\\\""),
            '\\' => acc.push_str("\\\\"),
            '\n' => acc.push_str("\\n"),
            '\r' => acc.push_str("\\r"),
            '\t' => acc.push_str("\\t"),
            c => acc.push(c),
        }
        acc
    })
}

fn write_params(
    f: &mut fmt::Formatter<'_>,
    keyword: &str,
    params: &[String],
    variadic: &Option<String>,
) -> fmt::Result {
    write!(f, "({}", keyword)?;
    for param in params {
        write!(f, " {}", param)?;
    }
    if let Some(rest) = variadic {
        write!(f, " . {}", rest)?;
    }
    write!(f, ")")
}

// The canonical printing form: strings print their text unquoted, proper
// lists as (e1 e2 ... en), improper tails with a dot.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{:?}", n),
            Value::Str(s) => write!(f, "{}", s),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Symbol(s) => write!(f, "{}", s),
            Value::Nil => write!(f, "nil"),
            Value::Cons(head, tail) => {
                write!(f, "({}", head)?;
                let mut current: &Value = tail;
                loop {
                    match current {
                        Value::Cons(head, tail) => {
                            write!(f, " {}", head)?;
                            current = tail;
                        }
                        Value::Nil => break,
                        improper => {
                            write!(f, " . {}", improper)?;
                            break;
                        }
                    }
                }
                write!(f, ")")
            }
            Value::Builtin(form) => write!(f, "{}", form),
            Value::Lambda(lambda) => {
                write_params(f, "lambda", &lambda.params, &lambda.variadic)
            }
            Value::Macro(mac) => write_params(f, "macro", &mac.params, &mac.variadic),
        }
    }
}
