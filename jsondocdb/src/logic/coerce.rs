// Coercion rules shared by the logic operators.
//
// Every operator goes through these helpers instead of ad-hoc matching so
// that truthiness, numeric conversion and equality behave the same everywhere.

use serde_json::{Number, Value};

/// Largest integer an f64 represents exactly (2^53).
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Truthiness: null, false, 0, "", [] and {} are false; everything else is true.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Numeric view of a value. Numeric-looking strings parse, booleans count as
/// 1 and 0. Null, containers and other strings have no numeric view.
pub fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                trimmed.parse::<f64>().ok().filter(|f| f.is_finite())
            }
        }
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// String form used by `cat` and by string-coercing equality.
pub fn to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Turn an arithmetic result back into a JSON value. Integral results come
/// back as integers; non-finite results become null.
pub fn number_value(f: f64) -> Value {
    if !f.is_finite() {
        return Value::Null;
    }
    if f.fract() == 0.0 && f.abs() < MAX_EXACT_INTEGER {
        return Value::from(f as i64);
    }
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

/// Structural equality where numbers compare by numeric value, so `1` and
/// `1.0` are equal.
pub fn json_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => numbers_equal(x, y),
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| json_equals(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).map(|w| json_equals(v, w)).unwrap_or(false))
        }
        _ => false,
    }
}

fn numbers_equal(x: &Number, y: &Number) -> bool {
    match (x.as_i64(), y.as_i64()) {
        (Some(l), Some(r)) => l == r,
        _ => x.as_f64() == y.as_f64(),
    }
}

/// `==`: string comparison if either side is a string, truthiness comparison
/// if either side is a boolean, structural equality otherwise.
pub fn loose_equals(a: &Value, b: &Value) -> bool {
    if a.is_string() || b.is_string() {
        return to_text(a) == to_text(b);
    }
    if a.is_boolean() || b.is_boolean() {
        return is_truthy(a) == is_truthy(b);
    }
    json_equals(a, b)
}

/// `===`: same JSON type and equal value.
pub fn strict_equals(a: &Value, b: &Value) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b) && json_equals(a, b)
}

/// `<` on two operands. Numeric comparison when either side is a number;
/// strings compare lexically and booleans as false < true. Anything else,
/// including a failed numeric conversion, is not less.
pub fn less(a: &Value, b: &Value) -> bool {
    if a.is_number() || b.is_number() {
        return match (to_number(a), to_number(b)) {
            (Some(x), Some(y)) => x < y,
            _ => false,
        };
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => x < y,
        (Value::Bool(x), Value::Bool(y)) => !*x && *y,
        _ => false,
    }
}

pub fn less_or_equal(a: &Value, b: &Value) -> bool {
    less(a, b) || loose_equals(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truthiness() {
        let falsy_values = [
            json!(null),
            json!(false),
            json!(0),
            json!(0.0),
            json!(""),
            json!([]),
            json!({}),
        ];
        for falsy in falsy_values {
            assert!(!is_truthy(&falsy), "{falsy} should be falsy");
        }
        for truthy in [json!(true), json!(-1), json!("0"), json!([0]), json!({"a": null})] {
            assert!(is_truthy(&truthy), "{truthy} should be truthy");
        }
    }

    #[test]
    fn test_to_number() {
        assert_eq!(to_number(&json!(" 2.5 ")), Some(2.5));
        assert_eq!(to_number(&json!("12")), Some(12.0));
        assert_eq!(to_number(&json!(true)), Some(1.0));
        assert_eq!(to_number(&json!("abc")), None);
        assert_eq!(to_number(&json!("")), None);
        assert_eq!(to_number(&json!(null)), None);
        assert_eq!(to_number(&json!([1])), None);
    }

    #[test]
    fn test_number_value_keeps_integers() {
        assert_eq!(number_value(3.0), json!(3));
        assert_eq!(number_value(-0.5), json!(-0.5));
        assert_eq!(number_value(f64::INFINITY), Value::Null);
        assert_eq!(number_value(f64::NAN), Value::Null);
    }

    #[test]
    fn test_loose_equals() {
        assert!(loose_equals(&json!(1), &json!("1")));
        assert!(loose_equals(&json!(1), &json!(1.0)));
        assert!(loose_equals(&json!(true), &json!(5)));
        assert!(loose_equals(&json!(false), &json!(null)));
        assert!(loose_equals(&json!(null), &json!(null)));
        assert!(loose_equals(&json!([1, 2]), &json!([1.0, 2])));
        assert!(!loose_equals(&json!("a"), &json!("b")));
        assert!(!loose_equals(&json!(0), &json!(null)));
    }

    #[test]
    fn test_strict_equals() {
        assert!(strict_equals(&json!(1), &json!(1)));
        assert!(strict_equals(&json!(2), &json!(2.0)));
        assert!(!strict_equals(&json!(1), &json!("1")));
        assert!(!strict_equals(&json!(true), &json!(1)));
        assert!(strict_equals(&json!({"a": [1]}), &json!({"a": [1]})));
    }

    #[test]
    fn test_less() {
        assert!(less(&json!(1), &json!(2)));
        assert!(less(&json!("1"), &json!(2)));
        assert!(!less(&json!("x"), &json!(2)));
        assert!(!less(&json!(null), &json!(2)));
        assert!(less(&json!("apple"), &json!("banana")));
        assert!(less(&json!(false), &json!(true)));
        assert!(!less(&json!([1]), &json!([2])));
        assert!(less_or_equal(&json!(2), &json!("2")));
    }
}
