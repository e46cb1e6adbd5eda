//! Topic-exchange binding patterns.

/// Returns `true` if `routing_key` matches the topic `pattern`.
///
/// Both are split on `.`. In the pattern, `*` matches exactly one segment
/// and `#` matches zero or more segments; any other segment must match
/// literally.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    matches_from(&pattern, &key)
}

fn matches_from(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| matches_from(rest, &key[skip..])),
        Some((&segment, rest)) => match key.split_first() {
            Some((&word, key_rest)) if segment == "*" || segment == word => {
                matches_from(rest, key_rest)
            }
            _ => false,
        },
    }
}
