use crate::environment::{EnvError, Environment};
use crate::expander::expand;
use crate::io::IoAdapter;
use crate::parser::{parse_program, read_form, ParseError};
use crate::trampoline::Trampoline;
use crate::types::{cons, list_from_vec, list_to_vec, Lambda, Macro, SpecialForm, Value};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

// --- Runtime Error ---

/// Failures of the running program itself: I/O, zero division, `raise`.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeError {
    DivisionByZero,
    ModuloByZero,
    Io(String),
    Raised(String),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::DivisionByZero => write!(f, "Division by zero"),
            RuntimeError::ModuloByZero => write!(f, "Modulo by zero"),
            RuntimeError::Io(msg) => write!(f, "{}", msg),
            RuntimeError::Raised(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for RuntimeError {}

// --- Evaluation Error ---

#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    EnvError(EnvError),           // set! on an unbound name
    ParseError(ParseError),       // re-entrant reads: (read), (load ...)
    UndefinedSymbol(String),
    NotCallable(Value),           // callee is neither Builtin nor Lambda
    NotASymbol(Value),            // def/set! on a non-symbol
    InvalidArguments(String),     // arity or argument type mismatch
    InvalidSpecialForm(String),   // malformed special form
    Runtime(RuntimeError),
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::EnvError(env_err) => write!(f, "Eval error: {}", env_err),
            EvalError::ParseError(parse_err) => write!(f, "{}", parse_err),
            EvalError::UndefinedSymbol(name) => {
                write!(f, "Eval error: Undefined symbol: {}", name)
            }
            EvalError::NotCallable(value) => {
                write!(f, "Eval error: not callable: {}", value)
            }
            EvalError::NotASymbol(value) => {
                write!(f, "Eval error: expected a symbol, got: {}", value)
            }
            EvalError::InvalidArguments(msg) => write!(f, "Eval error: {}", msg),
            EvalError::InvalidSpecialForm(msg) => write!(f, "Eval error: {}", msg),
            EvalError::Runtime(runtime_err) => write!(f, "Runtime error: {}", runtime_err),
        }
    }
}

impl std::error::Error for EvalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EvalError::EnvError(env_err) => Some(env_err),
            EvalError::ParseError(parse_err) => Some(parse_err),
            EvalError::Runtime(runtime_err) => Some(runtime_err),
            _ => None,
        }
    }
}

impl From<EnvError> for EvalError {
    fn from(err: EnvError) -> Self {
        EvalError::EnvError(err)
    }
}

impl From<ParseError> for EvalError {
    fn from(err: ParseError) -> Self {
        EvalError::ParseError(err)
    }
}

impl From<RuntimeError> for EvalError {
    fn from(err: RuntimeError) -> Self {
        EvalError::Runtime(err)
    }
}

pub type EvalResult<T = Value> = Result<T, EvalError>;

// --- Public entry ---

/// Expands `form` to its macro fixed point, then drives the trampoline
/// until a concrete value is produced.
pub fn eval(form: &Value, env: &Rc<RefCell<Environment>>) -> EvalResult {
    let expanded = expand(form, env)?;
    eval_t(expanded, env.clone())?.run()
}

/// Non-tail evaluation: runs a private trampoline to completion.
fn eval_to_value(form: Value, env: Rc<RefCell<Environment>>) -> EvalResult {
    eval_t(form, env)?.run()
}

/// One evaluation step. Tail positions come back as `Trampoline::More`
/// so the caller's driver resumes them with an unwound host stack.
fn eval_t(form: Value, env: Rc<RefCell<Environment>>) -> EvalResult<Trampoline> {
    match form {
        Value::Integer(_)
        | Value::Float(_)
        | Value::Str(_)
        | Value::Bool(_)
        | Value::Nil
        | Value::Builtin(_)
        | Value::Lambda(_)
        | Value::Macro(_) => Ok(Trampoline::Done(form)),

        Value::Symbol(name) => match env.borrow().get(&name) {
            Some(value) => Ok(Trampoline::Done(value)),
            None => Err(EvalError::UndefinedSymbol(name)),
        },

        Value::Cons(head, tail) => {
            if *head == Value::Nil && *tail == Value::Nil {
                return Ok(Trampoline::Done(Value::Nil));
            }

            // A macro bound after the entry-point expansion pass (e.g. by an
            // earlier form of the same `do`) is still expandable here; the
            // expansion continues in tail position.
            if let Value::Symbol(name) = &*head {
                if matches!(env.borrow().get(name), Some(Value::Macro(_))) {
                    let call = Value::Cons(head.clone(), tail.clone());
                    let expanded = expand(&call, &env)?;
                    return Ok(Trampoline::defer(move || eval_t(expanded, env)));
                }
            }

            let callee = eval_to_value((*head).clone(), env.clone())?;
            let args = list_to_vec(&tail).ok_or_else(|| {
                EvalError::InvalidArguments("improper argument list in call".to_string())
            })?;
            match callee {
                Value::Builtin(builtin) => apply_builtin(builtin, args, env),
                Value::Lambda(lambda) => apply_lambda(lambda, args, env),
                other => Err(EvalError::NotCallable(other)),
            }
        }
    }
}

// --- Lambda application ---

fn apply_lambda(
    lambda: Rc<Lambda>,
    args: Vec<Value>,
    env: Rc<RefCell<Environment>>,
) -> EvalResult<Trampoline> {
    let fixed = lambda.params.len();
    if lambda.variadic.is_some() {
        if args.len() < fixed {
            return Err(EvalError::InvalidArguments(format!(
                "lambda expects at least {} arguments, got {}",
                fixed,
                args.len()
            )));
        }
    } else if args.len() != fixed {
        return Err(EvalError::InvalidArguments(format!(
            "lambda expects {} arguments, got {}",
            fixed,
            args.len()
        )));
    }

    // Arguments evaluate eagerly in the caller's environment; bindings
    // land in a child of the captured one.
    let call_env = Environment::new_enclosed(lambda.env.clone());
    for (param, expr) in lambda.params.iter().zip(&args) {
        let value = eval_to_value(expr.clone(), env.clone())?;
        call_env.borrow_mut().define(param.clone(), value);
    }
    if let Some(rest_name) = &lambda.variadic {
        let mut rest = Vec::with_capacity(args.len() - fixed);
        for expr in &args[fixed..] {
            rest.push(eval_to_value(expr.clone(), env.clone())?);
        }
        call_env
            .borrow_mut()
            .define(rest_name.clone(), list_from_vec(rest));
    }

    // The body is deferred, never evaluated on this stack frame
    let body = lambda.body.clone();
    Ok(Trampoline::defer(move || eval_t(body, call_env)))
}

// --- Builtin dispatch ---

fn apply_builtin(
    builtin: SpecialForm,
    args: Vec<Value>,
    env: Rc<RefCell<Environment>>,
) -> EvalResult<Trampoline> {
    match builtin {
        SpecialForm::Add => {
            let mut acc = Num::Int(0);
            for value in eval_args(args, &env)? {
                acc = acc.add(Num::from_value(&value, "+")?);
            }
            Ok(Trampoline::Done(acc.into_value()))
        }
        SpecialForm::Mul => {
            let mut acc = Num::Int(1);
            for value in eval_args(args, &env)? {
                acc = acc.mul(Num::from_value(&value, "*")?);
            }
            Ok(Trampoline::Done(acc.into_value()))
        }
        SpecialForm::Sub => {
            let nums = eval_nums(args, &env, "-")?;
            match nums.split_first() {
                None => Err(EvalError::InvalidArguments(
                    "'-' expects at least 1 argument".to_string(),
                )),
                Some((first, [])) => Ok(Trampoline::Done(first.neg().into_value())),
                Some((first, rest)) => {
                    let mut acc = *first;
                    for num in rest {
                        acc = acc.sub(*num);
                    }
                    Ok(Trampoline::Done(acc.into_value()))
                }
            }
        }
        SpecialForm::Div => {
            let nums = eval_nums(args, &env, "/")?;
            match nums.split_first() {
                None => Err(EvalError::InvalidArguments(
                    "'/' expects at least 1 argument".to_string(),
                )),
                Some((first, [])) => {
                    if first.is_zero() {
                        Err(EvalError::Runtime(RuntimeError::DivisionByZero))
                    } else {
                        Ok(Trampoline::Done(Value::Float(1.0 / first.as_f64())))
                    }
                }
                Some((first, rest)) => {
                    let mut acc = first.as_f64();
                    for num in rest {
                        if num.is_zero() {
                            return Err(EvalError::Runtime(RuntimeError::DivisionByZero));
                        }
                        acc /= num.as_f64();
                    }
                    Ok(Trampoline::Done(Value::Float(acc)))
                }
            }
        }
        SpecialForm::Mod => {
            let [a, b] = exactly(eval_args(args, &env)?, "%")?;
            match (a, b) {
                (Value::Integer(_), Value::Integer(0)) => {
                    Err(EvalError::Runtime(RuntimeError::ModuloByZero))
                }
                (Value::Integer(a), Value::Integer(b)) => {
                    Ok(Trampoline::Done(Value::Integer(a.wrapping_rem(b))))
                }
                (a, b) => Err(EvalError::InvalidArguments(format!(
                    "'%' expects two integers, got {} and {}",
                    a.type_name(),
                    b.type_name()
                ))),
            }
        }
        SpecialForm::Pow => {
            let [a, b] = exactly(eval_args(args, &env)?, "^")?;
            let base = Num::from_value(&a, "^")?;
            let exponent = Num::from_value(&b, "^")?;
            Ok(Trampoline::Done(Value::Float(
                base.as_f64().powf(exponent.as_f64()),
            )))
        }
        SpecialForm::Eq => {
            let values = eval_args(args, &env)?;
            if values.len() < 2 {
                return Err(EvalError::InvalidArguments(
                    "'=' expects at least 2 arguments".to_string(),
                ));
            }
            let equal = values.windows(2).all(|pair| poly_eq(&pair[0], &pair[1]));
            Ok(Trampoline::Done(Value::Bool(equal)))
        }
        SpecialForm::Gt => compare_chain(args, env, ">", |left, right| left > right),
        SpecialForm::Lt => compare_chain(args, env, "<", |left, right| left < right),
        SpecialForm::Concat => {
            let mut out = String::new();
            for value in eval_args(args, &env)? {
                out.push_str(&value.to_string());
            }
            Ok(Trampoline::Done(Value::Str(out)))
        }
        SpecialForm::Quote => {
            let [form] = exactly(args, "quote")?;
            Ok(Trampoline::Done(form))
        }
        SpecialForm::If => match args.as_slice() {
            [condition, consequent] => {
                if eval_to_value(condition.clone(), env.clone())?.is_truthy() {
                    let consequent = consequent.clone();
                    Ok(Trampoline::defer(move || eval_t(consequent, env)))
                } else {
                    Ok(Trampoline::Done(Value::Nil))
                }
            }
            [condition, consequent, alternative] => {
                let chosen = if eval_to_value(condition.clone(), env.clone())?.is_truthy() {
                    consequent.clone()
                } else {
                    alternative.clone()
                };
                Ok(Trampoline::defer(move || eval_t(chosen, env)))
            }
            _ => Err(EvalError::InvalidSpecialForm(
                "'if' expects a condition, a consequent and an optional alternative".to_string(),
            )),
        },
        SpecialForm::Do => match args.split_last() {
            None => Err(EvalError::InvalidSpecialForm(
                "'do' expects at least one form".to_string(),
            )),
            Some((last, init)) => {
                for form in init {
                    eval_to_value(form.clone(), env.clone())?;
                }
                let last = last.clone();
                Ok(Trampoline::defer(move || eval_t(last, env)))
            }
        },
        SpecialForm::Def => match args.as_slice() {
            [name_form, expr] => {
                let name = match name_form {
                    Value::Symbol(name) => name.clone(),
                    other => return Err(EvalError::NotASymbol(other.clone())),
                };
                let value = eval_to_value(expr.clone(), env.clone())?;
                env.borrow_mut().define(name, value.clone());
                Ok(Trampoline::Done(value))
            }
            _ => Err(EvalError::InvalidSpecialForm(
                "'def' expects a name and an expression".to_string(),
            )),
        },
        SpecialForm::Set => match args.as_slice() {
            [name_form, expr] => {
                let name = match name_form {
                    Value::Symbol(name) => name.clone(),
                    other => return Err(EvalError::NotASymbol(other.clone())),
                };
                let value = eval_to_value(expr.clone(), env.clone())?;
                env.borrow_mut().assign(&name, value.clone())?;
                Ok(Trampoline::Done(value))
            }
            _ => Err(EvalError::InvalidSpecialForm(
                "'set!' expects a name and an expression".to_string(),
            )),
        },
        SpecialForm::Lambda => match args.as_slice() {
            [params_form, body] => {
                let (params, variadic) = parse_params(params_form)?;
                Ok(Trampoline::Done(Value::Lambda(Rc::new(Lambda {
                    params,
                    variadic,
                    body: body.clone(),
                    env: env.clone(),
                }))))
            }
            _ => Err(EvalError::InvalidSpecialForm(
                "'lambda' expects a parameter list and a body".to_string(),
            )),
        },
        SpecialForm::Macro => match args.as_slice() {
            [params_form, body] => {
                let (params, variadic) = parse_params(params_form)?;
                Ok(Trampoline::Done(Value::Macro(Rc::new(Macro {
                    params,
                    variadic,
                    body: body.clone(),
                }))))
            }
            _ => Err(EvalError::InvalidSpecialForm(
                "'macro' expects a parameter list and a body".to_string(),
            )),
        },
        SpecialForm::ExpandMacro => {
            let [form] = exactly(args, "expand-macro")?;
            Ok(Trampoline::Done(expand(&form, &env)?))
        }
        SpecialForm::Eval => {
            let [form] = exactly(args, "eval")?;
            let value = eval_to_value(form, env.clone())?;
            Ok(Trampoline::Done(eval(&value, &env)?))
        }
        SpecialForm::Raise => {
            let [form] = exactly(args, "raise")?;
            let value = eval_to_value(form, env)?;
            Err(EvalError::Runtime(RuntimeError::Raised(value.to_string())))
        }
        SpecialForm::Car => {
            let [value] = exactly(eval_args(args, &env)?, "car")?;
            match value {
                Value::Cons(head, _) => Ok(Trampoline::Done((*head).clone())),
                other => Err(EvalError::InvalidArguments(format!(
                    "'car' expects a pair, got {}",
                    other.type_name()
                ))),
            }
        }
        SpecialForm::Cdr => {
            let [value] = exactly(eval_args(args, &env)?, "cdr")?;
            match value {
                Value::Cons(_, tail) => Ok(Trampoline::Done((*tail).clone())),
                other => Err(EvalError::InvalidArguments(format!(
                    "'cdr' expects a pair, got {}",
                    other.type_name()
                ))),
            }
        }
        SpecialForm::Cons => {
            let [car, cdr] = exactly(eval_args(args, &env)?, "cons")?;
            Ok(Trampoline::Done(cons(car, cdr)))
        }
        SpecialForm::TypeOf => {
            let [value] = exactly(eval_args(args, &env)?, "type-of")?;
            Ok(Trampoline::Done(Value::Str(value.type_name().to_string())))
        }
        SpecialForm::Symbol => {
            let [value] = exactly(eval_args(args, &env)?, "symbol")?;
            match value {
                Value::Str(name) if !name.is_empty() => {
                    Ok(Trampoline::Done(Value::Symbol(name)))
                }
                Value::Str(_) => Err(EvalError::InvalidArguments(
                    "'symbol' expects a non-empty string".to_string(),
                )),
                other => Err(EvalError::InvalidArguments(format!(
                    "'symbol' expects a string, got {}",
                    other.type_name()
                ))),
            }
        }
        SpecialForm::Print => {
            let [form] = exactly(args, "print")?;
            let value = eval_to_value(form, env.clone())?;
            let io = lookup_io(&env)?;
            io.println(&value.to_string())?;
            Ok(Trampoline::Done(value))
        }
        SpecialForm::Read => {
            if !args.is_empty() {
                return Err(EvalError::InvalidArguments(
                    "'read' expects no arguments".to_string(),
                ));
            }
            let io = lookup_io(&env)?;
            let line = io.read_line()?;
            let (value, _rest) = read_form(&line)?;
            Ok(Trampoline::Done(value))
        }
        SpecialForm::Load => {
            let [form] = exactly(args, "load")?;
            let path = match eval_to_value(form, env.clone())? {
                Value::Str(path) => path,
                other => {
                    return Err(EvalError::InvalidArguments(format!(
                        "'load' expects a string path, got {}",
                        other.type_name()
                    )))
                }
            };
            let io = lookup_io(&env)?;
            let source = io.read_file(&path)?;
            let mut last = Value::Nil;
            for form in parse_program(&source)? {
                last = eval(&form, &env)?;
            }
            Ok(Trampoline::Done(last))
        }
        SpecialForm::Dot | SpecialForm::DotField => Err(EvalError::InvalidSpecialForm(
            "host interop is not available in this build".to_string(),
        )),
    }
}

// --- Helpers ---

fn lookup_io(env: &Rc<RefCell<Environment>>) -> EvalResult<Rc<dyn IoAdapter>> {
    env.borrow().lookup_io().ok_or_else(|| {
        EvalError::Runtime(RuntimeError::Io("no IO adapter configured".to_string()))
    })
}

fn eval_args(args: Vec<Value>, env: &Rc<RefCell<Environment>>) -> EvalResult<Vec<Value>> {
    args.into_iter()
        .map(|arg| eval_to_value(arg, env.clone()))
        .collect()
}

fn eval_nums(
    args: Vec<Value>,
    env: &Rc<RefCell<Environment>>,
    operator: &str,
) -> EvalResult<Vec<Num>> {
    eval_args(args, env)?
        .iter()
        .map(|value| Num::from_value(value, operator))
        .collect()
}

fn exactly<const N: usize>(args: Vec<Value>, name: &str) -> EvalResult<[Value; N]> {
    let len = args.len();
    args.try_into().map_err(|_| {
        EvalError::InvalidArguments(format!(
            "'{}' expects exactly {} arguments, got {}",
            name, N, len
        ))
    })
}

/// A numeric operand. Integer arithmetic wraps in two's complement; a
/// single Float operand moves the whole reduction to doubles.
#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn from_value(value: &Value, operator: &str) -> EvalResult<Num> {
        match value {
            Value::Integer(n) => Ok(Num::Int(*n)),
            Value::Float(n) => Ok(Num::Float(*n)),
            other => Err(EvalError::InvalidArguments(format!(
                "'{}' expects numeric arguments, got {}",
                operator,
                other.type_name()
            ))),
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::Int(n) => n as f64,
            Num::Float(n) => n,
        }
    }

    fn is_zero(self) -> bool {
        match self {
            Num::Int(n) => n == 0,
            Num::Float(n) => n == 0.0,
        }
    }

    fn into_value(self) -> Value {
        match self {
            Num::Int(n) => Value::Integer(n),
            Num::Float(n) => Value::Float(n),
        }
    }

    fn add(self, other: Num) -> Num {
        match (self, other) {
            (Num::Int(a), Num::Int(b)) => Num::Int(a.wrapping_add(b)),
            (a, b) => Num::Float(a.as_f64() + b.as_f64()),
        }
    }

    fn sub(self, other: Num) -> Num {
        match (self, other) {
            (Num::Int(a), Num::Int(b)) => Num::Int(a.wrapping_sub(b)),
            (a, b) => Num::Float(a.as_f64() - b.as_f64()),
        }
    }

    fn mul(self, other: Num) -> Num {
        match (self, other) {
            (Num::Int(a), Num::Int(b)) => Num::Int(a.wrapping_mul(b)),
            (a, b) => Num::Float(a.as_f64() * b.as_f64()),
        }
    }

    fn neg(self) -> Num {
        match self {
            Num::Int(n) => Num::Int(n.wrapping_neg()),
            Num::Float(n) => Num::Float(-n),
        }
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(n) => Some(*n as f64),
        Value::Float(n) => Some(*n),
        _ => None,
    }
}

/// Polymorphic equality: numbers compare as doubles across variants,
/// strings by text, booleans and nil by identity; any other pairing is
/// unequal.
fn poly_eq(a: &Value, b: &Value) -> bool {
    if let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) {
        return x == y;
    }
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Nil, Value::Nil) => true,
        _ => false,
    }
}

fn compare_chain(
    args: Vec<Value>,
    env: Rc<RefCell<Environment>>,
    operator: &str,
    compare: fn(f64, f64) -> bool,
) -> EvalResult<Trampoline> {
    let values = eval_args(args, &env)?;
    if values.len() < 2 {
        return Err(EvalError::InvalidArguments(format!(
            "'{}' expects at least 2 arguments",
            operator
        )));
    }
    let mut nums = Vec::with_capacity(values.len());
    for value in &values {
        nums.push(Num::from_value(value, operator)?.as_f64());
    }
    let ordered = nums.windows(2).all(|pair| compare(pair[0], pair[1]));
    Ok(Trampoline::Done(Value::Bool(ordered)))
}

/// Parameter lists are Nil or a proper list of symbols, optionally
/// terminated by `. rest` with exactly one trailing symbol.
fn parse_params(form: &Value) -> EvalResult<(Vec<String>, Option<String>)> {
    let mut params = Vec::new();
    let mut current = form;
    loop {
        match current {
            Value::Nil => return Ok((params, None)),
            Value::Cons(head, tail) => match &**head {
                Value::Symbol(name) if name == "." => {
                    return match &**tail {
                        Value::Cons(rest, end) => match (&**rest, &**end) {
                            (Value::Symbol(rest_name), Value::Nil) => {
                                Ok((params, Some(rest_name.clone())))
                            }
                            _ => Err(bad_params()),
                        },
                        _ => Err(bad_params()),
                    };
                }
                Value::Symbol(name) => {
                    params.push(name.clone());
                    current = tail;
                }
                _ => return Err(bad_params()),
            },
            _ => return Err(bad_params()),
        }
    }
}

fn bad_params() -> EvalError {
    EvalError::InvalidSpecialForm(
        "parameter list must be a list of symbols, optionally ending in '. rest'".to_string(),
    )
}

// --- Unit Tests ---
#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::StringIo;
    use crate::parser::parse_str;

    fn test_env() -> Rc<RefCell<Environment>> {
        Environment::with_io(Rc::new(StringIo::new()))
    }

    fn eval_str_in(input: &str, env: &Rc<RefCell<Environment>>) -> EvalResult {
        match parse_str(input) {
            Ok(form) => eval(&form, env),
            Err(e) => panic!("Parsing failed for input '{}': {}", input, e),
        }
    }

    fn assert_eval(input: &str, expected: Value) {
        let env = test_env();
        match eval_str_in(input, &env) {
            Ok(value) => assert_eq!(value, expected, "Input: '{}'", input),
            Err(e) => panic!("Evaluation failed for input '{}': {}", input, e),
        }
    }

    fn assert_eval_error(input: &str, expected_error_variant: &EvalError) {
        let env = test_env();
        match eval_str_in(input, &env) {
            Ok(value) => panic!(
                "Expected evaluation to fail for input '{}', but got: {:?}",
                input, value
            ),
            Err(e) => {
                assert_eq!(
                    std::mem::discriminant(&e),
                    std::mem::discriminant(expected_error_variant),
                    "Input: '{}', Expected error variant like {:?}, got: {:?}",
                    input,
                    expected_error_variant,
                    e
                );
            }
        }
    }

    fn int_list(items: &[i64]) -> Value {
        list_from_vec(items.iter().map(|&n| Value::Integer(n)).collect())
    }

    fn runtime_error() -> EvalError {
        EvalError::Runtime(RuntimeError::Raised(String::new()))
    }

    fn invalid_arguments() -> EvalError {
        EvalError::InvalidArguments(String::new())
    }

    #[test]
    fn test_eval_self_evaluating() {
        assert_eval("123", Value::Integer(123));
        assert_eval("-4.5", Value::Float(-4.5));
        assert_eval("true", Value::Bool(true));
        assert_eval("false", Value::Bool(false));
        assert_eval(r#""hello""#, Value::Str("hello".to_string()));
        assert_eval("nil", Value::Nil);
        assert_eval("()", Value::Nil);
        assert_eval("+", Value::Builtin(SpecialForm::Add));
    }

    #[test]
    fn test_eval_empty_list_head() {
        // (()) is Cons(Nil, Nil) and short-circuits to Nil
        assert_eval("(())", Value::Nil);
    }

    #[test]
    fn test_eval_symbol_lookup() {
        let env = test_env();
        env.borrow_mut()
            .define("x".to_string(), Value::Integer(100));
        match eval_str_in("x", &env) {
            Ok(value) => assert_eq!(value, Value::Integer(100)),
            Err(e) => panic!("lookup failed: {}", e),
        }
        assert_eval_error("y", &EvalError::UndefinedSymbol(String::new()));
    }

    #[test]
    fn test_eval_quote() {
        assert_eval("'1", Value::Integer(1));
        assert_eval("'a", Value::Symbol("a".to_string()));
        assert_eval("'()", Value::Nil);
        assert_eval("'(1 2 3)", int_list(&[1, 2, 3]));
        assert_eval("(quote (1 2))", int_list(&[1, 2]));
        assert_eval_error("(quote a b)", &invalid_arguments());
        assert_eval_error("(quote)", &invalid_arguments());
    }

    #[test]
    fn test_eval_if() {
        assert_eval("(if true 1 2)", Value::Integer(1));
        assert_eval("(if false 1 2)", Value::Integer(2));
        assert_eval("(if true 1)", Value::Integer(1));
        assert_eval("(if false 1)", Value::Nil);
        // Only false and nil are falsey
        assert_eval("(if 0 1 2)", Value::Integer(1));
        assert_eval("(if \"\" 1 2)", Value::Integer(1));
        assert_eval("(if nil 1 2)", Value::Integer(2));
        assert_eval("(if () 1 2)", Value::Integer(2));
    }

    #[test]
    fn test_eval_if_lazy_branches() {
        // The untaken branch must not evaluate
        assert_eval("(if true 'good unbound-variable)", Value::Symbol("good".to_string()));
        assert_eval("(if false unbound-variable 'good)", Value::Symbol("good".to_string()));
    }

    #[test]
    fn test_eval_if_arity() {
        let arity_error = EvalError::InvalidSpecialForm(String::new());
        assert_eval_error("(if)", &arity_error);
        assert_eval_error("(if true)", &arity_error);
        assert_eval_error("(if true 1 2 3)", &arity_error);
    }

    #[test]
    fn test_eval_addition() {
        assert_eval("(+ 1 2 3 4 5 6 7 8 9 10)", Value::Integer(55));
        assert_eval("(+)", Value::Integer(0));
        assert_eval("(+ 5)", Value::Integer(5));
        assert_eval("(+ 1 (* 2 3))", Value::Integer(7));
    }

    #[test]
    fn test_eval_float_promotion() {
        assert_eval("(+ 1 2.5 3 4.5 5)", Value::Float(16.0));
        assert_eval("(* 2 2.5)", Value::Float(5.0));
        assert_eval("(- 1 0.5)", Value::Float(0.5));
        // All-integer reductions stay integers
        assert_eval("(* 2 3 4)", Value::Integer(24));
        assert_eval("(- 10 3 2)", Value::Integer(5));
    }

    #[test]
    fn test_eval_subtraction() {
        assert_eval("(- 10 3)", Value::Integer(7));
        assert_eval("(- 5)", Value::Integer(-5));
        assert_eval("(- 2.5)", Value::Float(-2.5));
        assert_eval_error("(-)", &invalid_arguments());
    }

    #[test]
    fn test_eval_multiplication() {
        assert_eval("(*)", Value::Integer(1));
        assert_eval("(* 2 3)", Value::Integer(6));
    }

    #[test]
    fn test_eval_integer_wrap() {
        let env = test_env();
        env.borrow_mut()
            .define("big".to_string(), Value::Integer(i64::MAX));
        assert_eq!(
            eval_str_in("(+ big 1)", &env).unwrap(),
            Value::Integer(i64::MIN)
        );
    }

    #[test]
    fn test_eval_division() {
        assert_eval("(/ 10 2)", Value::Float(5.0));
        assert_eval("(/ 10 4)", Value::Float(2.5));
        assert_eval("(/ 20 2 5)", Value::Float(2.0));
        assert_eval("(/ 5)", Value::Float(0.2));
        assert_eval_error("(/)", &invalid_arguments());
        assert_eval_error("(/ 1 0)", &runtime_error());
        assert_eval_error("(/ 0)", &runtime_error());
        assert_eval_error("(/ 1 0.0)", &runtime_error());
    }

    #[test]
    fn test_eval_modulo() {
        assert_eval("(% 10 3)", Value::Integer(1));
        assert_eval("(% -7 2)", Value::Integer(-1));
        assert_eval_error("(% 1 0)", &runtime_error());
        assert_eval_error("(% 1.5 2)", &invalid_arguments());
        assert_eval_error("(% 1)", &invalid_arguments());
    }

    #[test]
    fn test_eval_pow() {
        assert_eval("(^ 2 10)", Value::Float(1024.0));
        assert_eval("(^ 4 0.5)", Value::Float(2.0));
        assert_eval_error("(^ 2)", &invalid_arguments());
        assert_eval_error("(^ 2 \"x\")", &invalid_arguments());
    }

    #[test]
    fn test_eval_equality() {
        assert_eval("(= 5 5)", Value::Bool(true));
        assert_eval("(= 5 5 5 5)", Value::Bool(true));
        assert_eval("(= 5 6)", Value::Bool(false));
        assert_eval("(= 5 5 6)", Value::Bool(false));
        // Numeric equality crosses variants
        assert_eval("(= 1 1.0)", Value::Bool(true));
        assert_eval("(= \"a\" \"a\")", Value::Bool(true));
        assert_eval("(= \"a\" \"b\")", Value::Bool(false));
        assert_eval("(= true true)", Value::Bool(true));
        assert_eval("(= nil nil)", Value::Bool(true));
        // Mixed kinds are unequal, not an error
        assert_eval("(= 1 \"1\")", Value::Bool(false));
        assert_eval("(= 'a 'a)", Value::Bool(false));
        assert_eval_error("(= 1)", &invalid_arguments());
    }

    #[test]
    fn test_eval_comparisons() {
        assert_eval("(< 4 5 6)", Value::Bool(true));
        assert_eval("(< 5 5 6)", Value::Bool(false));
        assert_eval("(> 6 5 4)", Value::Bool(true));
        assert_eval("(> 6 5 5)", Value::Bool(false));
        assert_eval("(< 1 1.5 2)", Value::Bool(true));
        assert_eval_error("(< 1)", &invalid_arguments());
        assert_eval_error("(< 1 'a)", &invalid_arguments());
    }

    #[test]
    fn test_eval_concat() {
        assert_eval("(++ \"answer: \" 42)", Value::Str("answer: 42".to_string()));
        assert_eval("(++ \"a\" \"b\" \"c\")", Value::Str("abc".to_string()));
        assert_eval("(++ 1 2.5 true nil)", Value::Str("12.5truenil".to_string()));
        assert_eval("(++ \"l=\" '(1 2))", Value::Str("l=(1 2)".to_string()));
        assert_eval("(++)", Value::Str(String::new()));
    }

    #[test]
    fn test_eval_def_and_set() {
        let env = test_env();
        assert_eq!(
            eval_str_in("(def x 10)", &env).unwrap(),
            Value::Integer(10)
        );
        assert_eq!(eval_str_in("x", &env).unwrap(), Value::Integer(10));
        assert_eq!(
            eval_str_in("(set! x 20)", &env).unwrap(),
            Value::Integer(20)
        );
        assert_eq!(eval_str_in("x", &env).unwrap(), Value::Integer(20));

        assert_eval_error("(set! missing 1)", &EvalError::EnvError(
            EnvError::UndefinedVariable(String::new()),
        ));
        assert_eval_error("(def 1 2)", &EvalError::NotASymbol(Value::Nil));
        assert_eval_error("(set! 1 2)", &EvalError::NotASymbol(Value::Nil));
    }

    #[test]
    fn test_eval_lambda_application() {
        assert_eval("((lambda (x) (* x x)) 7)", Value::Integer(49));
        assert_eval("((lambda () 42))", Value::Integer(42));
        assert_eval(
            "(do (def add (lambda (a b) (+ a b))) (add 1 2))",
            Value::Integer(3),
        );
    }

    #[test]
    fn test_eval_lambda_arity_errors() {
        assert_eval_error("((lambda (x) x))", &invalid_arguments());
        assert_eval_error("((lambda (x) x) 1 2)", &invalid_arguments());
        assert_eval_error("((lambda (a . rest) a))", &invalid_arguments());
    }

    #[test]
    fn test_eval_lambda_variadic() {
        assert_eval("((lambda (a . rest) rest) 1 2 3)", int_list(&[2, 3]));
        assert_eval("((lambda (a . rest) rest) 1)", Value::Nil);
        assert_eval("((lambda (. rest) rest) 1 2)", int_list(&[1, 2]));
    }

    #[test]
    fn test_eval_lambda_param_shape_errors() {
        let shape_error = EvalError::InvalidSpecialForm(String::new());
        assert_eval_error("(lambda (1) 1)", &shape_error);
        assert_eval_error("(lambda (a . ) a)", &shape_error);
        assert_eval_error("(lambda (a . b c) a)", &shape_error);
        assert_eval_error("(lambda 5 1)", &shape_error);
        assert_eval_error("(lambda)", &shape_error);
    }

    #[test]
    fn test_eval_closure_captures_by_reference() {
        assert_eval(
            "(do (def x 10) (def g (lambda () x)) (set! x 20) (g))",
            Value::Integer(20),
        );
    }

    #[test]
    fn test_eval_closure_mutates_captured_binding() {
        let env = test_env();
        eval_str_in(
            "(def counter (do (def n 0) (lambda () (do (set! n (+ n 1)) n))))",
            &env,
        )
        .unwrap();
        assert_eq!(eval_str_in("(counter)", &env).unwrap(), Value::Integer(1));
        assert_eq!(eval_str_in("(counter)", &env).unwrap(), Value::Integer(2));
    }

    #[test]
    fn test_eval_factorial() {
        assert_eval(
            "(do (def f (lambda (n acc) (if (= n 0) acc (f (- n 1) (* n acc))))) (f 10 1))",
            Value::Integer(3628800),
        );
    }

    #[test]
    fn test_eval_deep_tail_recursion() {
        assert_eval(
            "(do (def c (lambda (n) (if (= n 0) 0 (c (- n 1))))) (c 5000))",
            Value::Integer(0),
        );
    }

    #[test]
    fn test_eval_deep_tail_recursion_through_do() {
        // Tail position of `do` inside the lambda body must also defer
        assert_eval(
            "(do (def c (lambda (n) (do 1 (if (= n 0) 0 (c (- n 1)))))) (c 10000))",
            Value::Integer(0),
        );
    }

    #[test]
    fn test_eval_macro_defined_and_used_in_one_form() {
        assert_eval(
            "(do (def unless (macro (c t e) (if c e t))) (unless false 1 2))",
            Value::Integer(1),
        );
        assert_eval(
            "(do (def unless (macro (c t e) (if c e t))) (unless true 1 2))",
            Value::Integer(2),
        );
    }

    #[test]
    fn test_eval_macro_across_forms() {
        let env = test_env();
        eval_str_in("(def twice (macro (e) (+ e e)))", &env).unwrap();
        assert_eq!(
            eval_str_in("(twice (+ 1 2))", &env).unwrap(),
            Value::Integer(6)
        );
    }

    #[test]
    fn test_eval_expand_macro() {
        let env = test_env();
        eval_str_in("(def unless (macro (c t e) (if c e t)))", &env).unwrap();
        // The argument is expanded, not evaluated
        let once = eval_str_in("(expand-macro (unless false 1 2))", &env).unwrap();
        assert_eq!(once, parse_str("(if false 2 1)").unwrap());
        // Macro-free output is a fixed point: expanding again changes nothing
        let again = expand(&once, &env).unwrap();
        assert_eq!(again, once);
    }

    #[test]
    fn test_eval_first_class_macro_value_is_not_callable() {
        assert_eval_error(
            "((macro (x) x) 1)",
            &EvalError::NotCallable(Value::Nil),
        );
    }

    #[test]
    fn test_eval_eval_builtin() {
        assert_eval("(eval '(+ 1 2))", Value::Integer(3));
        assert_eval(
            "(do (def x 42) (eval (symbol \"x\")))",
            Value::Integer(42),
        );
        assert_eval("(eval (cons + (cons 1 (cons 2 ()))))", Value::Integer(3));
    }

    #[test]
    fn test_eval_symbol_builtin() {
        assert_eval("(symbol \"abc\")", Value::Symbol("abc".to_string()));
        assert_eval_error("(symbol \"\")", &invalid_arguments());
        assert_eval_error("(symbol 5)", &invalid_arguments());
    }

    #[test]
    fn test_eval_raise() {
        let env = test_env();
        let err = eval_str_in("(raise \"boom\")", &env).unwrap_err();
        assert_eq!(
            err,
            EvalError::Runtime(RuntimeError::Raised("boom".to_string()))
        );
        assert_eq!(err.to_string(), "Runtime error: boom");

        let err = eval_str_in("(raise '(bad input))", &env).unwrap_err();
        assert_eq!(
            err,
            EvalError::Runtime(RuntimeError::Raised("(bad input)".to_string()))
        );
    }

    #[test]
    fn test_eval_list_primitives() {
        assert_eval("(car '(1 2 3))", Value::Integer(1));
        assert_eval("(cdr '(1 2 3))", int_list(&[2, 3]));
        assert_eval("(cdr '(1))", Value::Nil);
        assert_eval("(cons 1 '(2 3))", int_list(&[1, 2, 3]));
        assert_eval(
            "(cons 1 2)",
            cons(Value::Integer(1), Value::Integer(2)),
        );

        assert_eval_error("(car '())", &invalid_arguments());
        assert_eval_error("(car 5)", &invalid_arguments());
        assert_eval_error("(cdr nil)", &invalid_arguments());
        assert_eval_error("(cons 1)", &invalid_arguments());
        assert_eval_error("(cons 1 2 3)", &invalid_arguments());
    }

    #[test]
    fn test_eval_type_of() {
        assert_eval("(type-of 1)", Value::Str("integer".to_string()));
        assert_eval("(type-of 1.5)", Value::Str("float".to_string()));
        assert_eval("(type-of \"s\")", Value::Str("string".to_string()));
        assert_eval("(type-of true)", Value::Str("boolean".to_string()));
        assert_eval("(type-of 'a)", Value::Str("symbol".to_string()));
        assert_eval("(type-of nil)", Value::Str("nil".to_string()));
        assert_eval("(type-of '(1 2 3))", Value::Str("list".to_string()));
        assert_eval("(type-of +)", Value::Str("builtin".to_string()));
        assert_eval("(type-of (lambda (x) x))", Value::Str("lambda".to_string()));
        assert_eval("(type-of (macro (x) x))", Value::Str("macro".to_string()));
    }

    #[test]
    fn test_eval_not_callable() {
        assert_eval_error("(1 2 3)", &EvalError::NotCallable(Value::Nil));
        assert_eval_error("(\"hello\" 1)", &EvalError::NotCallable(Value::Nil));
        assert_eval_error("(nil 1)", &EvalError::NotCallable(Value::Nil));
    }

    #[test]
    fn test_eval_print_writes_to_adapter() {
        let io = Rc::new(StringIo::new());
        let env = Environment::with_io(io.clone());
        let result = eval_str_in("(print (+ 1 2))", &env).unwrap();
        assert_eq!(result, Value::Integer(3));
        assert_eq!(io.output(), "3\n");

        // Strings print unquoted
        eval_str_in("(print \"hi\")", &env).unwrap();
        assert_eq!(io.output(), "3\nhi\n");
    }

    #[test]
    fn test_eval_read_parses_one_form() {
        let io = Rc::new(StringIo::with_input(["(+ 1 2)"]));
        let env = Environment::with_io(io);
        let value = eval_str_in("(read)", &env).unwrap();
        // The form is returned unevaluated
        assert_eq!(value, parse_str("(+ 1 2)").unwrap());
    }

    #[test]
    fn test_eval_read_at_eof_is_runtime_error() {
        let env = Environment::with_io(Rc::new(StringIo::new()));
        let err = eval_str_in("(read)", &env).unwrap_err();
        assert!(matches!(err, EvalError::Runtime(RuntimeError::Io(_))));
    }

    #[test]
    fn test_eval_load_runs_file_forms() {
        let io = Rc::new(StringIo::new());
        io.add_file(
            "lib.lisp",
            "(def inc (macro (x) (+ x 1)))\n(def ten (inc 9))\nten",
        );
        let env = Environment::with_io(io);
        let value = eval_str_in("(load \"lib.lisp\")", &env).unwrap();
        assert_eq!(value, Value::Integer(10));
        // Definitions land in the calling environment
        assert_eq!(eval_str_in("(inc ten)", &env).unwrap(), Value::Integer(11));
    }

    #[test]
    fn test_eval_load_missing_file() {
        let env = test_env();
        let err = eval_str_in("(load \"nope.lisp\")", &env).unwrap_err();
        assert!(matches!(err, EvalError::Runtime(RuntimeError::Io(_))));
    }

    #[test]
    fn test_eval_dotted_interop_is_unavailable() {
        let shape_error = EvalError::InvalidSpecialForm(String::new());
        assert_eval_error("(.length \"abc\")", &shape_error);
        assert_eval_error("(.-size obj)", &shape_error);
    }

    #[test]
    fn test_quote_identity_round_trip() {
        for input in ["42", "true", "nil", "(1 2 3)", "foo", "(a (b) c)"] {
            let quoted = format!("'{}", input);
            let env = test_env();
            let value = eval_str_in(&quoted, &env).unwrap();
            assert_eq!(value, parse_str(input).unwrap(), "Input: '{}'", input);
        }
    }

    #[test]
    fn test_printing_round_trip() {
        for input in ["42", "-7", "true", "false", "nil", "(1 2 3)", "foo", "16.0"] {
            let value = parse_str(input).unwrap();
            assert_eq!(
                parse_str(&value.to_string()).unwrap(),
                value,
                "Input: '{}'",
                input
            );
        }
    }

    #[test]
    fn test_error_prefixes() {
        let env = test_env();
        let eval_err = eval_str_in("unbound", &env).unwrap_err();
        assert!(eval_err.to_string().starts_with("Eval error: "));

        let runtime_err = eval_str_in("(/ 1 0)", &env).unwrap_err();
        assert_eq!(runtime_err.to_string(), "Runtime error: Division by zero");

        let undefined = eval_str_in("(set! ghost 1)", &env).unwrap_err();
        assert_eq!(
            undefined.to_string(),
            "Eval error: Undefined variable: ghost"
        );
    }
}
