//! Small string helpers shared by the relay and the chat channel.

/// Truncate a string to at most `max_chars` characters, appending "..." if truncated.
///
/// Multi-byte UTF-8 characters (emoji, CJK) are kept whole; truncation happens on
/// character boundaries, never byte indices.
///
/// ```ignore
/// use larkrelay::util::truncate_with_ellipsis;
///
/// assert_eq!(truncate_with_ellipsis("hello world", 5), "hello...");
/// assert_eq!(truncate_with_ellipsis("鸭鸭你好", 2), "鸭鸭...");
/// ```
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => {
            let truncated = &s[..idx];
            format!("{}...", truncated.trim_end())
        }
        None => s.to_string(),
    }
}

/// Length of `s` in characters, the unit used for thread size budgets.
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Remove `@_user_N` placeholder tokens injected by Feishu for mentions in group chats.
pub fn strip_at_placeholders(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find("@_user_") {
        result.push_str(&rest[..pos]);
        let after = &rest[pos + "@_user_".len()..];
        let digits = after.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits == 0 {
            result.push_str("@_user_");
            rest = after;
            continue;
        }
        let after = &after[digits..];
        rest = after.strip_prefix(' ').unwrap_or(after);
    }
    result.push_str(rest);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_ascii_and_cjk() {
        assert_eq!(truncate_with_ellipsis("hello", 10), "hello");
        assert_eq!(truncate_with_ellipsis("hello world", 5), "hello...");
        assert_eq!(truncate_with_ellipsis("鸭鸭你好", 2), "鸭鸭...");
        assert_eq!(truncate_with_ellipsis("", 3), "");
    }

    #[test]
    fn char_len_counts_characters_not_bytes() {
        assert_eq!(char_len("abc"), 3);
        assert_eq!(char_len("鸭鸭"), 2);
    }

    #[test]
    fn strip_at_placeholders_removes_mention_tokens() {
        assert_eq!(strip_at_placeholders("@_user_1 hello"), "hello");
        assert_eq!(strip_at_placeholders("hi @_user_12 there"), "hi there");
        assert_eq!(strip_at_placeholders("@_user_1"), "");
    }

    #[test]
    fn strip_at_placeholders_keeps_unrelated_at_signs() {
        assert_eq!(strip_at_placeholders("mail me@x.com"), "mail me@x.com");
        assert_eq!(strip_at_placeholders("@_user_ alone"), "@_user_ alone");
    }
}
