//! Lenient readers for model-supplied tool arguments.
//!
//! Models are inconsistent about types (`"5"` vs `5`), so numeric readers
//! accept both.

use serde_json::Value;

/// A trimmed, non-empty string argument.
pub(crate) fn str_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// An integer argument given as a number (rounded) or numeric string.
pub(crate) fn int_arg(args: &Value, key: &str) -> Option<i64> {
    match args.get(key)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.round() as i64)),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.round() as i64),
        _ => None,
    }
}

/// Cut `text` to `max` characters, appending `suffix` when anything was cut.
pub(crate) fn truncate_chars(text: &str, max: usize, suffix: &str) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}{}", &text[..idx], suffix),
        None => text.to_string(),
    }
}
