/// Safely returns a prefix of the string with at most `max_chars` characters.
/// This respects UTF-8 character boundaries.
pub fn prefix_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Safely returns a suffix of the string with at most `max_chars` characters.
/// This respects UTF-8 character boundaries.
pub fn suffix_chars(s: &str, max_chars: usize) -> &str {
    let char_count = s.chars().count();
    if char_count <= max_chars {
        return s;
    }
    match s.char_indices().nth(char_count - max_chars) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

/// First four and last four characters with the middle elided.
/// Used for credential previews; the full value never leaves the server.
pub fn mask_secret(s: &str) -> String {
    format!("{}...{}", prefix_chars(s, 4), suffix_chars(s, 4))
}

/// Returns the tail of `s` starting at byte offset `from`, provided the
/// offset lands on a character boundary. None means the caller's offset is
/// stale or bogus and the full string should be sent instead.
pub fn tail_on_boundary(s: &str, from: usize) -> Option<&str> {
    if from <= s.len() && s.is_char_boundary(from) {
        Some(&s[from..])
    } else {
        None
    }
}
