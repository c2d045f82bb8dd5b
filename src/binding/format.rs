use std::sync::Arc;

use crate::value::{as_f64, is_truthy, number, to_display_string, Value};

/// Converts a bound value to display text and submitted text back.
pub trait Formatter: Send + Sync {
    fn format(&self, value: &Value) -> Result<String, String>;

    fn parse(&self, text: &str) -> Result<Value, String>;
}

struct IntegerFormatter;

impl Formatter for IntegerFormatter {
    fn format(&self, value: &Value) -> Result<String, String> {
        match value {
            Value::Null => Ok(String::new()),
            other => as_f64(other)
                .map(|f| format!("{}", f.trunc() as i64))
                .ok_or_else(|| format!("{} is not a number", other)),
        }
    }

    fn parse(&self, text: &str) -> Result<Value, String> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Value::Null);
        }
        text.parse::<i64>()
            .map(Value::from)
            .map_err(|_| format!("'{}' is not an integer", text))
    }
}

struct DecimalFormatter {
    places: usize,
}

impl Formatter for DecimalFormatter {
    fn format(&self, value: &Value) -> Result<String, String> {
        match value {
            Value::Null => Ok(String::new()),
            other => as_f64(other)
                .map(|f| format!("{:.*}", self.places, f))
                .ok_or_else(|| format!("{} is not a number", other)),
        }
    }

    fn parse(&self, text: &str) -> Result<Value, String> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Value::Null);
        }
        text.parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(number)
            .ok_or_else(|| format!("'{}' is not a number", text))
    }
}

struct BooleanFormatter;

impl Formatter for BooleanFormatter {
    fn format(&self, value: &Value) -> Result<String, String> {
        Ok(if is_truthy(value) { "true" } else { "false" }.to_string())
    }

    fn parse(&self, text: &str) -> Result<Value, String> {
        match text.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(Value::Bool(true)),
            "false" | "no" | "off" | "0" | "" => Ok(Value::Bool(false)),
            other => Err(format!("'{}' is not a boolean", other)),
        }
    }
}

struct TrimmedFormatter;

impl Formatter for TrimmedFormatter {
    fn format(&self, value: &Value) -> Result<String, String> {
        Ok(to_display_string(value).trim().to_string())
    }

    fn parse(&self, text: &str) -> Result<Value, String> {
        match text.trim() {
            "" => Ok(Value::Null),
            trimmed => Ok(Value::String(trimmed.to_string())),
        }
    }
}

struct UppercaseFormatter;

impl Formatter for UppercaseFormatter {
    fn format(&self, value: &Value) -> Result<String, String> {
        Ok(to_display_string(value).to_uppercase())
    }

    fn parse(&self, text: &str) -> Result<Value, String> {
        Ok(Value::String(text.to_uppercase()))
    }
}

/// Formatters every application registers.
pub fn builtin_formatters() -> Vec<(&'static str, Arc<dyn Formatter>)> {
    vec![
        ("integer", Arc::new(IntegerFormatter) as Arc<dyn Formatter>),
        ("decimal", Arc::new(DecimalFormatter { places: 2 })),
        ("boolean", Arc::new(BooleanFormatter)),
        ("trimmed", Arc::new(TrimmedFormatter)),
        ("uppercase", Arc::new(UppercaseFormatter)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn formatter(name: &str) -> Arc<dyn Formatter> {
        builtin_formatters()
            .into_iter()
            .find(|(n, _)| *n == name)
            .map(|(_, f)| f)
            .unwrap()
    }

    #[test]
    fn test_integer() {
        let f = formatter("integer");
        assert_eq!(f.format(&json!(12)).unwrap(), "12");
        assert_eq!(f.parse(" 42 ").unwrap(), json!(42));
        assert!(f.parse("4x").is_err());
        assert_eq!(f.parse("").unwrap(), Value::Null);
    }

    #[test]
    fn test_decimal() {
        let f = formatter("decimal");
        assert_eq!(f.format(&json!(2.5)).unwrap(), "2.50");
        assert_eq!(f.parse("3").unwrap(), json!(3));
        assert!(f.parse("abc").is_err());
    }

    #[test]
    fn test_boolean_and_text() {
        assert_eq!(formatter("boolean").parse("Yes").unwrap(), json!(true));
        assert!(formatter("boolean").parse("maybe").is_err());
        assert_eq!(formatter("trimmed").parse("  a ").unwrap(), json!("a"));
        assert_eq!(formatter("uppercase").format(&json!("ab")).unwrap(), "AB");
    }
}
