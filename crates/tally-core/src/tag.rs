//! Tag extraction from free-text descriptions.
//!
//! Tags are never stored separately; they are derived from a record's
//! description each time they are needed. A tag is a `#` followed by one or
//! more tag characters (letters, digits, `-`, `_`, `/`, `.`), lowercased.
//! Trailing `.` and `/` are treated as punctuation and dropped.

use std::collections::BTreeSet;

/// Bucket used for records whose description carries no tags.
pub const UNTAGGED: &str = "#untagged";

fn is_tag_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '-' | '_' | '/' | '.')
}

/// Returns the unique tags found in `description`, sorted.
pub fn parse_tags(description: &str) -> Vec<String> {
    let mut tags = BTreeSet::new();
    let mut chars = description.chars().peekable();
    let mut prev: Option<char> = None;

    while let Some(c) = chars.next() {
        let starts_tag = c == '#' && !prev.is_some_and(is_tag_char);
        prev = Some(c);
        if !starts_tag {
            continue;
        }

        let mut body = String::new();
        while let Some(&next) = chars.peek() {
            if !is_tag_char(next) {
                break;
            }
            body.push(next);
            prev = Some(next);
            chars.next();
        }

        let body = body.trim_end_matches(['.', '/']);
        if !body.is_empty() {
            tags.insert(format!("#{}", body.to_lowercase()));
        }
    }

    tags.into_iter().collect()
}

/// Returns the tag-combination key for `description`.
///
/// The key is the sorted set of tags joined by single spaces, or [`UNTAGGED`]
/// when the description has none. Statistics are bucketed by this key.
pub fn tag_key(description: &str) -> String {
    let tags = parse_tags(description);
    if tags.is_empty() {
        UNTAGGED.to_string()
    } else {
        tags.join(" ")
    }
}
