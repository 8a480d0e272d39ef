use crate::environment::Environment;
use crate::evaluator::{EvalError, EvalResult};
use crate::types::{cons, list_from_vec, list_to_vec, Macro, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Expands every macro use in `form` until no macro remains, using the
/// call-site environment for lookups. Non-list forms and the empty list
/// pass through unchanged.
pub fn expand(form: &Value, env: &Rc<RefCell<Environment>>) -> EvalResult<Value> {
    let (head, tail) = match form {
        Value::Cons(head, tail) if !form.is_empty_list() => (head, tail),
        _ => return Ok(form.clone()),
    };

    if let Value::Symbol(name) = &**head {
        let binding = env.borrow().get(name);
        if let Some(Value::Macro(mac)) = binding {
            let args = list_to_vec(tail).ok_or_else(|| {
                EvalError::InvalidArguments(format!(
                    "improper argument list in use of macro '{}'",
                    name
                ))
            })?;
            let substituted = apply_macro(&mac, &args)?;
            // Re-expand so macros expanding to macro uses reach a fixed point
            return expand(&substituted, env);
        }
    }

    let head = expand(head, env)?;
    let tail = expand(tail, env)?;
    Ok(cons(head, tail))
}

/// Substitutes the unevaluated argument forms into the macro body.
/// Substitution is literal: no renaming, no hygiene.
fn apply_macro(mac: &Macro, args: &[Value]) -> EvalResult<Value> {
    let fixed = mac.params.len();
    if mac.variadic.is_some() {
        if args.len() < fixed {
            return Err(EvalError::InvalidArguments(format!(
                "macro expects at least {} arguments, got {}",
                fixed,
                args.len()
            )));
        }
    } else if args.len() != fixed {
        return Err(EvalError::InvalidArguments(format!(
            "macro expects {} arguments, got {}",
            fixed,
            args.len()
        )));
    }

    let mut bindings = HashMap::new();
    for (param, arg) in mac.params.iter().zip(args) {
        bindings.insert(param.clone(), arg.clone());
    }
    if let Some(rest) = &mac.variadic {
        bindings.insert(rest.clone(), list_from_vec(args[fixed..].to_vec()));
    }
    Ok(substitute(&mac.body, &bindings))
}

fn substitute(body: &Value, bindings: &HashMap<String, Value>) -> Value {
    match body {
        Value::Symbol(name) => bindings
            .get(name)
            .cloned()
            .unwrap_or_else(|| body.clone()),
        Value::Cons(head, tail) => cons(substitute(head, bindings), substitute(tail, bindings)),
        _ => body.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_str;

    fn parsed(input: &str) -> Value {
        parse_str(input).unwrap_or_else(|e| panic!("bad test input '{}': {}", input, e))
    }

    fn macro_value(params: &[&str], variadic: Option<&str>, body: &str) -> Value {
        Value::Macro(Rc::new(Macro {
            params: params.iter().map(|p| p.to_string()).collect(),
            variadic: variadic.map(|v| v.to_string()),
            body: parsed(body),
        }))
    }

    fn env_with(name: &str, value: Value) -> Rc<RefCell<Environment>> {
        let env = Environment::new();
        env.borrow_mut().define(name.to_string(), value);
        env
    }

    #[test]
    fn test_non_list_forms_pass_through() {
        let env = Environment::new();
        for input in ["1", "2.5", "\"s\"", "true", "nil", "x", "+"] {
            let form = parsed(input);
            assert_eq!(expand(&form, &env).unwrap(), form, "Input: '{}'", input);
        }
    }

    #[test]
    fn test_macro_use_is_substituted() {
        let env = env_with("unless", macro_value(&["c", "t", "e"], None, "(if c e t)"));
        let expanded = expand(&parsed("(unless false 1 2)"), &env).unwrap();
        assert_eq!(expanded, parsed("(if false 2 1)"));
    }

    #[test]
    fn test_arguments_are_spliced_unevaluated() {
        let env = env_with("twice", macro_value(&["e"], None, "(+ e e)"));
        let expanded = expand(&parsed("(twice (f x))"), &env).unwrap();
        assert_eq!(expanded, parsed("(+ (f x) (f x))"));
    }

    #[test]
    fn test_nested_macro_uses_expand() {
        let env = env_with("twice", macro_value(&["e"], None, "(+ e e)"));
        let expanded = expand(&parsed("(list 1 (twice 2))"), &env).unwrap();
        assert_eq!(expanded, parsed("(list 1 (+ 2 2))"));
    }

    #[test]
    fn test_expansion_reaches_fixed_point() {
        // outer expands to a use of inner, which must expand in turn
        let env = env_with("inner", macro_value(&["x"], None, "(+ x 1)"));
        env.borrow_mut().define(
            "outer".to_string(),
            macro_value(&["x"], None, "(inner x)"),
        );
        let expanded = expand(&parsed("(outer 41)"), &env).unwrap();
        assert_eq!(expanded, parsed("(+ 41 1)"));
    }

    #[test]
    fn test_expansion_is_idempotent_on_macro_free_output() {
        let env = env_with("unless", macro_value(&["c", "t", "e"], None, "(if c e t)"));
        let once = expand(&parsed("(unless a b c)"), &env).unwrap();
        let twice = expand(&once, &env).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_variadic_macro_binds_rest_as_list() {
        let env = env_with("when*", macro_value(&["c"], Some("body"), "(if c (do-all body) nil)"));
        let expanded = expand(&parsed("(when* t 1 2 3)"), &env).unwrap();
        assert_eq!(expanded, parsed("(if t (do-all (1 2 3)) nil)"));
    }

    #[test]
    fn test_variadic_macro_accepts_exact_minimum() {
        let env = env_with("w", macro_value(&["c"], Some("body"), "(pair c body)"));
        let expanded = expand(&parsed("(w 1)"), &env).unwrap();
        assert_eq!(expanded, parsed("(pair 1 ())"));
    }

    #[test]
    fn test_macro_arity_mismatch() {
        let env = env_with("unless", macro_value(&["c", "t", "e"], None, "(if c e t)"));
        let err = expand(&parsed("(unless 1 2)"), &env).unwrap_err();
        assert!(matches!(err, EvalError::InvalidArguments(_)));

        let venv = env_with("w", macro_value(&["a", "b"], Some("rest"), "a"));
        let err = expand(&parsed("(w 1)"), &venv).unwrap_err();
        assert!(matches!(err, EvalError::InvalidArguments(_)));
    }

    #[test]
    fn test_substitution_is_not_hygienic() {
        // A call-site x is captured by the macro's own binding of x
        let env = env_with("bind-x", macro_value(&["e"], None, "(do (def x 1) e)"));
        let expanded = expand(&parsed("(bind-x (+ x 1))"), &env).unwrap();
        assert_eq!(expanded, parsed("(do (def x 1) (+ x 1))"));
    }

    #[test]
    fn test_unbound_head_is_left_alone() {
        let env = Environment::new();
        let form = parsed("(unless false 1 2)");
        assert_eq!(expand(&form, &env).unwrap(), form);
    }

    #[test]
    fn test_shadowed_macro_name_is_not_expanded() {
        let env = env_with("m", macro_value(&["x"], None, "(+ x 1)"));
        let inner = Environment::new_enclosed(env);
        inner
            .borrow_mut()
            .define("m".to_string(), Value::Integer(7));
        let form = parsed("(m 1)");
        assert_eq!(expand(&form, &inner).unwrap(), form);
    }
}
