//! Encoding of generic value trees as XML elements.
//!
//! The mapping follows the conventions of quick-xml's serde support, so that
//! documents written here decode back into the same serde types:
//! - object keys become child elements, keys starting with `@` attributes,
//!   `$text`/`$value` the element text
//! - arrays repeat the element once per item
//! - `null` writes nothing

use quick_xml::escape::escape;
use serde_json::Value;

/// Whether `value` would produce no elements at all
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.iter().all(is_empty_value),
        _ => false,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Append `value` as element(s) named `name` to `out`.
///
/// `extra_attrs` is spliced verbatim into the opening tag of each top-level
/// element (namespace declarations, for instance) and must start with a space.
pub fn write_element(out: &mut Vec<u8>, name: &str, extra_attrs: &str, value: &Value) {
    match value {
        Value::Null => {}
        Value::Array(items) => {
            for item in items {
                write_element(out, name, extra_attrs, item);
            }
        }
        Value::Object(map) => {
            out.push(b'<');
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(extra_attrs.as_bytes());
            for (key, attr) in map.iter().filter(|(key, _)| key.starts_with('@')) {
                if let Some(text) = scalar_text(attr) {
                    out.push(b' ');
                    out.extend_from_slice(key[1..].as_bytes());
                    out.extend_from_slice(b"=\"");
                    out.extend_from_slice(escape(text.as_str()).as_bytes());
                    out.push(b'"');
                }
            }
            out.push(b'>');
            for (key, child) in map.iter().filter(|(key, _)| !key.starts_with('@')) {
                if key == "$text" || key == "$value" {
                    if let Some(text) = scalar_text(child) {
                        out.extend_from_slice(escape(text.as_str()).as_bytes());
                    }
                } else {
                    write_element(out, key, "", child);
                }
            }
            write_end(out, name);
        }
        scalar => {
            out.push(b'<');
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(extra_attrs.as_bytes());
            out.push(b'>');
            if let Some(text) = scalar_text(scalar) {
                out.extend_from_slice(escape(text.as_str()).as_bytes());
            }
            write_end(out, name);
        }
    }
}

fn write_end(out: &mut Vec<u8>, name: &str) {
    out.extend_from_slice(b"</");
    out.extend_from_slice(name.as_bytes());
    out.push(b'>');
}
