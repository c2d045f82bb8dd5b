//! Value helpers
//!
//! Binding values are plain `serde_json::Value`s. Keypath segments past the
//! first one navigate into JSON objects and arrays.

pub use serde_json::Value;

/// Truthiness used by negation, `If`, and boolean expression operators.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Value::String(s) => !s.is_empty() && s != "false",
        Value::Array(a) => !a.is_empty(),
        Value::Object(_) => true,
    }
}

/// Text form used when a value is written into the response.
pub fn to_display_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 && n.is_f64() => format!("{}", f as i64),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

/// Builds a JSON number, preferring the integer representation.
pub fn number(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < 9.0e15 {
        Value::from(f as i64)
    } else {
        serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Null => Some(0.0),
        _ => None,
    }
}

/// Reads one key from a JSON value. Arrays accept numeric keys and `count`.
pub fn get_key(value: &Value, key: &str) -> Option<Value> {
    match value {
        Value::Object(map) => map.get(key).cloned(),
        Value::Array(items) => {
            if key == "count" || key == "length" {
                Some(Value::from(items.len()))
            } else {
                key.parse::<usize>().ok().and_then(|i| items.get(i).cloned())
            }
        }
        Value::String(s) if key == "length" => Some(Value::from(s.chars().count())),
        _ => None,
    }
}

/// Writes one key into a JSON value. Returns false when the value cannot
/// hold the key.
pub fn set_key(target: &mut Value, key: &str, new_value: Value) -> bool {
    match target {
        Value::Object(map) => {
            map.insert(key.to_string(), new_value);
            true
        }
        Value::Array(items) => match key.parse::<usize>() {
            Ok(i) if i < items.len() => {
                items[i] = new_value;
                true
            }
            _ => false,
        },
        Value::Null => {
            let mut map = serde_json::Map::new();
            map.insert(key.to_string(), new_value);
            *target = Value::Object(map);
            true
        }
        _ => false,
    }
}

/// Strict-ish equality used by `==` in expressions: numbers compare by value.
pub fn loose_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => {
            as_f64(a).is_some() && as_f64(a) == as_f64(b)
        }
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&Value::Null));
        assert!(!is_truthy(&json!(0)));
        assert!(is_truthy(&json!(2)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!("false")));
        assert!(is_truthy(&json!("yes")));
        assert!(!is_truthy(&json!([])));
    }

    #[test]
    fn test_display() {
        assert_eq!(to_display_string(&json!(5)), "5");
        assert_eq!(to_display_string(&json!(5.0)), "5");
        assert_eq!(to_display_string(&json!(2.5)), "2.5");
        assert_eq!(to_display_string(&Value::Null), "");
        assert_eq!(to_display_string(&json!("a")), "a");
    }

    #[test]
    fn test_keys() {
        let mut v = json!({"user": {"name": "Ada"}, "items": [1, 2, 3]});
        assert_eq!(get_key(&v["user"], "name"), Some(json!("Ada")));
        assert_eq!(get_key(&v["items"], "count"), Some(json!(3)));
        assert_eq!(get_key(&v["items"], "1"), Some(json!(2)));
        assert!(set_key(&mut v["user"], "name", json!("Grace")));
        assert_eq!(v["user"]["name"], json!("Grace"));
        assert!(!set_key(&mut v["items"], "9", json!(0)));
        let mut empty = Value::Null;
        assert!(set_key(&mut empty, "a", json!(1)));
        assert_eq!(empty, json!({"a": 1}));
    }

    #[test]
    fn test_number_prefers_integers() {
        assert_eq!(number(3.0), json!(3));
        assert_eq!(number(0.5), json!(0.5));
        assert!(loose_equals(&json!(1), &json!(1.0)));
        assert!(loose_equals(&json!("1"), &json!(1)));
    }
}
