//! Shared utility functions used across multiple modules.

/// Normalize optional text by trimming whitespace and removing empties.
///
/// Returns `None` when the input is `None` or the trimmed value is empty.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Check if a string starts with `http://` or `https://`.
pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Truncate text to at most 180 characters for error summaries.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(180).collect()
}

/// Namespace of a cache key: everything before the first `:` or `/`.
///
/// Keys without a separator are their own namespace.
pub fn key_namespace(key: &str) -> &str {
    key.split([':', '/'])
        .find(|segment| !segment.is_empty())
        .unwrap_or(key)
}
