//! Format Hints
//!
//! Parses the dataset's answer-shape hints (`int`, `float`, `list[{product:str,
//! revenue:float}]`, ...) and checks draft answers against them.

use std::fmt;

use serde_json::{Map, Number, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum FormatHint {
    Int,
    Float,
    Str,
    Bool,
    List(Box<FormatHint>),
    Object(Vec<(String, FormatHint)>),
    /// Empty or unrecognized hint: any non-null answer.
    Any,
}

impl fmt::Display for FormatHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatHint::Int => write!(f, "int"),
            FormatHint::Float => write!(f, "float"),
            FormatHint::Str => write!(f, "str"),
            FormatHint::Bool => write!(f, "bool"),
            FormatHint::Any => write!(f, "any"),
            FormatHint::List(inner) => write!(f, "list[{}]", inner),
            FormatHint::Object(fields) => {
                write!(f, "{{")?;
                for (i, (name, hint)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}:{}", name, hint)?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Split on commas that are not nested inside brackets or braces.
fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '[' | '{' => depth += 1,
            ']' | '}' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

impl FormatHint {
    /// Parse a hint. Never fails; anything unrecognized becomes `Any`.
    pub fn parse(hint: &str) -> Self {
        Self::parse_inner(hint).unwrap_or(FormatHint::Any)
    }

    fn parse_inner(hint: &str) -> Option<Self> {
        let hint = hint.trim();
        let lower = hint.to_ascii_lowercase();
        match lower.as_str() {
            "int" | "integer" => return Some(FormatHint::Int),
            "float" | "number" => return Some(FormatHint::Float),
            "str" | "string" => return Some(FormatHint::Str),
            "bool" | "boolean" => return Some(FormatHint::Bool),
            _ => {}
        }

        if lower.starts_with("list[") && hint.ends_with(']') {
            let inner = Self::parse_inner(&hint[5..hint.len() - 1])?;
            return Some(FormatHint::List(Box::new(inner)));
        }

        if hint.starts_with('{') && hint.ends_with('}') {
            let body = &hint[1..hint.len() - 1];
            let mut fields = Vec::new();
            for part in split_top_level(body) {
                let (name, field_hint) = part.split_once(':')?;
                let name = name.trim().trim_matches(|c| c == '"' || c == '\'');
                if name.is_empty() {
                    return None;
                }
                fields.push((name.to_string(), Self::parse_inner(field_hint)?));
            }
            return Some(FormatHint::Object(fields));
        }

        None
    }

    /// Check that `value` has this shape.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        self.check_at(value, "final_answer")
    }

    fn check_at(&self, value: &Value, path: &str) -> Result<(), String> {
        let ok = match self {
            FormatHint::Int => as_integer(value).is_some(),
            FormatHint::Float => value.is_number(),
            FormatHint::Str => value.is_string(),
            FormatHint::Bool => value.is_boolean(),
            FormatHint::Any => !value.is_null(),
            FormatHint::List(inner) => {
                let Some(items) = value.as_array() else {
                    return Err(mismatch(path, self, value));
                };
                for (i, item) in items.iter().enumerate() {
                    inner.check_at(item, &format!("{}[{}]", path, i))?;
                }
                true
            }
            FormatHint::Object(fields) => {
                let Some(object) = value.as_object() else {
                    return Err(mismatch(path, self, value));
                };
                for (name, hint) in fields {
                    let field_path = format!("{}.{}", path, name);
                    let field = object
                        .get(name)
                        .ok_or_else(|| format!("{} is missing", field_path))?;
                    hint.check_at(field, &field_path)?;
                }
                true
            }
        };
        if ok {
            Ok(())
        } else {
            Err(mismatch(path, self, value))
        }
    }

    /// Canonical form of an answer that already passed `check`:
    /// integral floats become integers where an int is expected.
    pub fn normalize(&self, value: &Value) -> Value {
        match (self, value) {
            (FormatHint::Int, v) => as_integer(v).map(Value::from).unwrap_or_else(|| v.clone()),
            (FormatHint::List(inner), Value::Array(items)) => {
                Value::Array(items.iter().map(|item| inner.normalize(item)).collect())
            }
            (FormatHint::Object(fields), Value::Object(object)) => {
                let mut out = Map::new();
                for (key, v) in object {
                    let normalized = match fields.iter().find(|(name, _)| name == key) {
                        Some((_, hint)) => hint.normalize(v),
                        None => v.clone(),
                    };
                    out.insert(key.clone(), normalized);
                }
                Value::Object(out)
            }
            _ => value.clone(),
        }
    }
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| integral_float(n)),
        _ => None,
    }
}

fn integral_float(n: &Number) -> Option<i64> {
    let f = n.as_f64()?;
    (f.fract() == 0.0 && f.abs() < i64::MAX as f64).then_some(f as i64)
}

fn mismatch(path: &str, expected: &FormatHint, value: &Value) -> String {
    let shown: String = value.to_string().chars().take(60).collect();
    format!("{} should be {} but was {}", path, expected, shown)
}
