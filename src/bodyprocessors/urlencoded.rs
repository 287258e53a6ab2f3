//! `application/x-www-form-urlencoded` decoding.

use crate::variables::{Variable, VariableStore};
use percent_encoding::percent_decode_str;

/// Decode one urlencoded component: `+` becomes a space, then percent
/// sequences are decoded. Invalid sequences are kept as written.
pub fn decode_component(input: &str) -> String {
    let spaced = input.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

/// Whether a `%` is not followed by two hex digits.
pub fn has_invalid_encoding(input: &str) -> bool {
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes.len() > i + 2
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !valid {
                return true;
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    false
}

/// Split a query or form body into decoded `(key, value)` pairs.
///
/// A pair without `=` has an empty value. Empty segments are skipped.
pub fn parse_query(input: &str, separator: &str) -> Vec<(String, String)> {
    let separator = if separator.is_empty() { "&" } else { separator };
    input
        .split(separator)
        .filter(|segment| !segment.is_empty())
        .map(|segment| match segment.split_once('=') {
            Some((k, v)) => (decode_component(k), decode_component(v)),
            None => (decode_component(segment), String::new()),
        })
        .collect()
}

/// Decode a form body into `REQUEST_BODY` and `ARGS_POST`.
pub(crate) fn process(body: &[u8], separator: &str, store: &mut VariableStore) {
    let text = String::from_utf8_lossy(body);
    if has_invalid_encoding(&text) {
        store.set_scalar(Variable::UrlencodedError, "1");
    }
    for (key, value) in parse_query(&text, separator) {
        store.add(Variable::ArgsPost, &key, value);
    }
    store.set_scalar(Variable::RequestBody, text.into_owned());
}
