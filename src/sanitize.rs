//! Cache key derivation
//!
//! Turns a display title into something usable as a base file name.

/// Characters that never reach a cache file name
pub const FORBIDDEN_CHARS: &[char] = &[
    '#', '%', '&', '{', '}', '\\', '<', '>', '*', '?', '/', '$', '!', '\'', '"', ':', '@', '+',
    '`', '|', '=',
];

/// Map an arbitrary title to a filesystem-safe base name
///
/// Every forbidden character becomes a single space, then surrounding
/// whitespace is trimmed. Distinct titles may collapse to the same name.
pub fn sanitize_name(title: &str) -> String {
    let replaced: String = title
        .chars()
        .map(|c| if FORBIDDEN_CHARS.contains(&c) { ' ' } else { c })
        .collect();

    replaced.trim().to_string()
}
