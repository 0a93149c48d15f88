//! Rich-text fields are arrays of segments, each segment `[text, annotations?]`.

use serde_json::{Value, json};

/// A single unannotated segment.
pub fn text(s: &str) -> Value {
    json!([[s]])
}

/// Concatenated text of every segment. Non rich-text values yield "".
pub fn plain(value: &Value) -> String {
    let Some(segments) = value.as_array() else {
        return String::new();
    };
    segments
        .iter()
        .filter_map(|segment| segment.get(0).and_then(Value::as_str))
        .collect()
}

/// First segment text of a rich-text field, as used for single-value
/// properties such as `source` or `link`.
pub fn first_segment(value: &Value) -> Option<&str> {
    value.get(0)?.get(0)?.as_str()
}
