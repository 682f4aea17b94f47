//! Byte-stable JSON for signing and hashing.
//!
//! Signer and verifier must agree on the exact byte sequence, so both call
//! [`to_canonical_json`]: object keys sorted lexicographically, no
//! insignificant whitespace, UTF-8. Map iteration order of the underlying
//! JSON library is deliberately not trusted.

use serde::Serialize;
use serde_json::Value;

/// Serialize `value` to its canonical JSON byte form.
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    let mut out = String::new();
    write_value(&value, &mut out);
    Ok(out)
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Value::String handles JSON escaping for the key.
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_value(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_are_sorted_recursively() {
        let value = json!({
            "b": 2,
            "a": {"z": null, "m": [1, {"y": true, "x": false}]},
            "c": "text"
        });
        assert_eq!(
            to_canonical_json(&value).unwrap(),
            r#"{"a":{"m":[1,{"x":false,"y":true}],"z":null},"b":2,"c":"text"}"#
        );
    }

    #[test]
    fn no_insignificant_whitespace() {
        let value = json!({"outer": {"inner": [1, 2, 3]}});
        let canonical = to_canonical_json(&value).unwrap();
        assert!(!canonical.contains(' '));
        assert!(!canonical.contains('\n'));
    }

    #[test]
    fn strings_are_escaped() {
        let value = json!({"k": "a\"b\\c"});
        assert_eq!(to_canonical_json(&value).unwrap(), r#"{"k":"a\"b\\c"}"#);
    }

    #[test]
    fn stable_across_field_declaration_order() {
        #[derive(serde::Serialize)]
        struct Forward {
            alpha: u32,
            beta: u32,
        }
        #[derive(serde::Serialize)]
        struct Reverse {
            beta: u32,
            alpha: u32,
        }
        let a = to_canonical_json(&Forward { alpha: 1, beta: 2 }).unwrap();
        let b = to_canonical_json(&Reverse { beta: 2, alpha: 1 }).unwrap();
        assert_eq!(a, b);
    }
}
