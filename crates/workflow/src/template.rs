//! `${key}` argument templating against the shared chain context.
//!
//! A string that is exactly `${key}` is replaced by the context value with
//! its JSON type intact. Placeholders embedded in longer strings are
//! interpolated with the value's string form. Keys may use dots to reach
//! into objects and arrays (`${scan.resources.0.id}`).

use serde_json::{Map, Value};

/// Resolve every placeholder in `arguments`.
///
/// Returns the list of unresolved keys on failure so the caller can skip
/// the step instead of running it with holes in its input.
pub fn resolve_arguments(
    arguments: &Value,
    context: &Map<String, Value>,
) -> Result<Value, Vec<String>> {
    let mut missing = Vec::new();
    let resolved = resolve_value(arguments, context, &mut missing);
    if missing.is_empty() {
        Ok(resolved)
    } else {
        missing.dedup();
        Err(missing)
    }
}

/// Look up a dotted key path in the context.
pub fn lookup<'a>(context: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = context.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn resolve_value(value: &Value, context: &Map<String, Value>, missing: &mut Vec<String>) -> Value {
    match value {
        Value::String(s) => resolve_string(s, context, missing),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| resolve_value(v, context, missing))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_value(v, context, missing)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn resolve_string(s: &str, context: &Map<String, Value>, missing: &mut Vec<String>) -> Value {
    if let Some(key) = whole_placeholder(s) {
        return match lookup(context, key) {
            Some(v) => v.clone(),
            None => {
                missing.push(key.to_string());
                Value::String(s.to_string())
            }
        };
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start + 2..].find('}') else {
            break;
        };
        let key = &rest[start + 2..start + 2 + len];
        out.push_str(&rest[..start]);
        match lookup(context, key) {
            Some(Value::String(v)) => out.push_str(v),
            Some(v) => out.push_str(&v.to_string()),
            None => {
                missing.push(key.to_string());
                out.push_str(&rest[start..start + 3 + len]);
            }
        }
        rest = &rest[start + 3 + len..];
    }
    out.push_str(rest);
    Value::String(out)
}

fn whole_placeholder(s: &str) -> Option<&str> {
    let key = s.strip_prefix("${")?.strip_suffix('}')?;
    (!key.is_empty() && !key.contains('}') && !key.contains("${")).then_some(key)
}
