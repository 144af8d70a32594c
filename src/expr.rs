//! Action Expression Parser & Evaluator
//!
//! Parses the `path` / `path:expr` strings carried by action attributes and
//! computes the value an action writes back. Everything here is pure: no store
//! access, no tree access, and no input can make it fail. Anything that is not
//! a recognized keyword or literal degrades to the raw string.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Number, Value};

lazy_static! {
    /// `push` or `push(source)`
    static ref PUSH_RE: Regex = Regex::new(r"^push(?:\((.*)\))?$").unwrap();
}

/// Separator between the path and the expression of an action.
pub const EXPR_SEPARATOR: char = ':';

/// A parsed action: the store path it targets and the optional expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionExpr {
    pub path: String,
    pub expr: Option<String>,
}

/// The `push` / `push(source)` action form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushForm {
    pub source: Option<String>,
}

/// Split an action string on its first separator.
pub fn parse_expr(raw: &str) -> ActionExpr {
    match raw.split_once(EXPR_SEPARATOR) {
        Some((path, expr)) => ActionExpr {
            path: path.trim().to_string(),
            expr: Some(expr.trim().to_string()),
        },
        None => ActionExpr {
            path: raw.trim().to_string(),
            expr: None,
        },
    }
}

/// Recognize the push form; any other expression is `None`.
pub fn parse_push(expr: &str) -> Option<PushForm> {
    let caps = PUSH_RE.captures(expr.trim())?;
    let source = caps
        .get(1)
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty());
    Some(PushForm { source })
}

/// Compute the value an action writes, given the value currently stored.
pub fn evaluate(expr: Option<&str>, current: Option<&Value>) -> Option<Value> {
    let expr = match expr {
        Some(e) => e,
        None => return current.cloned(),
    };

    match expr {
        "increment" => Some(number_value(to_number(current) + 1.0)),
        "decrement" => Some(number_value(to_number(current) - 1.0)),
        "toggle" => Some(Value::Bool(!truthy(current))),
        "true" => Some(Value::Bool(true)),
        "false" => Some(Value::Bool(false)),
        "null" => Some(Value::Null),
        _ => Some(parse_literal(expr)),
    }
}

/// Number, then structured literal, then the raw string itself.
fn parse_literal(expr: &str) -> Value {
    if let Some(n) = parse_number(expr) {
        return number_value(n);
    }

    if expr.starts_with('{') || expr.starts_with('[') || expr.starts_with('"') {
        if let Ok(value) = serde_json::from_str::<Value>(expr) {
            return value;
        }
    }

    Value::String(expr.to_string())
}

fn parse_number(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    // Rust accepts "inf" and "NaN", which are not storable as JSON numbers.
    s.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Numeric coercion; anything non-numeric becomes 0.
fn to_number(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::Bool(true)) => 1.0,
        Some(Value::String(s)) => parse_number(s).unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Integral results are stored as integers so `5 + 1` reads back as `6`.
fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n >= i64::MIN as f64 && n <= i64::MAX as f64 {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Truthiness of a stored value; absent and null are falsy.
pub fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

/// Display form used for text content, control values and attributes.
pub fn display_string(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e15 => {
                format!("{}", f as i64)
            }
            _ => n.to_string(),
        },
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_expr() {
        assert_eq!(
            parse_expr(" count : increment "),
            ActionExpr {
                path: "count".to_string(),
                expr: Some("increment".to_string()),
            }
        );
        assert_eq!(
            parse_expr(" count "),
            ActionExpr {
                path: "count".to_string(),
                expr: None,
            }
        );
    }

    #[test]
    fn test_evaluate_keywords_and_literals() {
        assert_eq!(evaluate(Some("increment"), Some(&json!(5))), Some(json!(6)));
        assert_eq!(evaluate(Some("increment"), None), Some(json!(1)));
        assert_eq!(evaluate(Some("decrement"), Some(&json!(0))), Some(json!(-1)));
        assert_eq!(evaluate(Some("toggle"), Some(&json!(true))), Some(json!(false)));
        assert_eq!(evaluate(Some("42"), Some(&json!(0))), Some(json!(42)));
        assert_eq!(evaluate(Some("true"), Some(&json!(0))), Some(json!(true)));
        assert_eq!(evaluate(Some("null"), Some(&json!(0))), Some(Value::Null));
        assert_eq!(evaluate(None, Some(&json!(7))), Some(json!(7)));
        assert_eq!(evaluate(None, None), None);
        assert_eq!(evaluate(Some("hello"), Some(&json!(""))), Some(json!("hello")));
    }

    #[test]
    fn test_parse_push() {
        assert_eq!(parse_push("push"), Some(PushForm { source: None }));
        assert_eq!(parse_push("push()"), Some(PushForm { source: None }));
        assert_eq!(
            parse_push("push( draft )"),
            Some(PushForm {
                source: Some("draft".to_string())
            })
        );
        assert_eq!(parse_push("increment"), None);
        assert_eq!(parse_push("pushy"), None);
    }

    #[test]
    fn test_parse_expr_splits_on_first_separator() {
        let parsed = parse_expr("filter:\"a:b\"");
        assert_eq!(parsed.path, "filter");
        assert_eq!(parsed.expr.as_deref(), Some("\"a:b\""));
    }

    #[test]
    fn test_literal_fallbacks() {
        assert_eq!(evaluate(Some("[1, 2]"), None), Some(json!([1, 2])));
        assert_eq!(evaluate(Some("{\"a\": 1}"), None), Some(json!({"a": 1})));
        assert_eq!(evaluate(Some("\"quoted\""), None), Some(json!("quoted")));
        // Unbalanced literal falls back to its raw text.
        assert_eq!(evaluate(Some("{oops"), None), Some(json!("{oops")));
        assert_eq!(evaluate(Some("2.5"), None), Some(json!(2.5)));
        assert_eq!(evaluate(Some("NaN"), None), Some(json!("NaN")));
    }

    #[test]
    fn test_numeric_coercion() {
        assert_eq!(evaluate(Some("increment"), Some(&json!("4"))), Some(json!(5)));
        assert_eq!(evaluate(Some("increment"), Some(&json!("abc"))), Some(json!(1)));
        assert_eq!(evaluate(Some("increment"), Some(&json!(1.5))), Some(json!(2.5)));
        assert_eq!(evaluate(Some("decrement"), Some(&json!(true))), Some(json!(0)));
    }

    #[test]
    fn test_truthiness() {
        assert!(!truthy(None));
        assert!(!truthy(Some(&json!(null))));
        assert!(!truthy(Some(&json!(0))));
        assert!(!truthy(Some(&json!(""))));
        assert!(truthy(Some(&json!("x"))));
        assert!(truthy(Some(&json!({}))));
        assert_eq!(evaluate(Some("toggle"), None), Some(json!(true)));
    }

    #[test]
    fn test_display_string() {
        assert_eq!(display_string(None), "");
        assert_eq!(display_string(Some(&json!(null))), "");
        assert_eq!(display_string(Some(&json!(3))), "3");
        assert_eq!(display_string(Some(&json!(3.0))), "3");
        assert_eq!(display_string(Some(&json!(0.25))), "0.25");
        assert_eq!(display_string(Some(&json!(false))), "false");
        assert_eq!(display_string(Some(&json!("hi"))), "hi");
        assert_eq!(display_string(Some(&json!([1]))), "[1]");
    }
}
