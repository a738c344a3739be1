use std::borrow::Cow;

/// Ellipsis appended by [`ellipsize`]
const ELLIPSIS: &str = "...";

/// Truncates a string to at most `max_chars` characters.
///
/// Cuts on a char boundary, so multi-byte text never splits mid-codepoint.
/// Returns `Cow::Borrowed` when the string already fits (the common case for
/// short field values like dates and wave labels).
///
/// # Examples
///
/// ```
/// use release_tracker::util::truncate_chars;
///
/// assert_eq!(truncate_chars("Short", 10), "Short");
/// assert_eq!(truncate_chars("Hello World", 5), "Hello");
/// assert_eq!(truncate_chars("héllo", 2), "hé");
/// ```
pub fn truncate_chars(s: &str, max_chars: usize) -> Cow<'_, str> {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => Cow::Owned(s[..byte_idx].to_string()),
        None => Cow::Borrowed(s),
    }
}

/// Truncates for terminal display, appending "..." when text was cut.
///
/// The result is at most `max_chars` characters including the ellipsis.
/// Widths of 3 or fewer cut without an ellipsis.
pub fn ellipsize(s: &str, max_chars: usize) -> Cow<'_, str> {
    let ellipsis_len = ELLIPSIS.len();
    if s.chars().count() <= max_chars {
        return Cow::Borrowed(s);
    }
    if max_chars <= ellipsis_len {
        return truncate_chars(s, max_chars);
    }
    let head = truncate_chars(s, max_chars - ellipsis_len);
    Cow::Owned(format!("{}{}", head.trim_end(), ELLIPSIS))
}

/// Collapses runs of whitespace (including newlines and NBSP) into single
/// spaces and trims both ends.
pub fn collapse_whitespace(s: &str) -> Cow<'_, str> {
    let needs_work = s.starts_with(char::is_whitespace)
        || s.ends_with(char::is_whitespace)
        || s.chars()
            .zip(s.chars().skip(1))
            .any(|(a, b)| a.is_whitespace() && b.is_whitespace())
        || s.chars().any(|c| c.is_whitespace() && c != ' ');

    if !needs_work {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    for word in s.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    Cow::Owned(out)
}
