//! Rendering keyword lines

/// Wrap a value in double quotes, escaping backslashes and quotes
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Quote only values that would not survive re-parsing as a single chunk
pub fn quote_if_needed(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || c == '"' || c == '\'' || c == '\\');

    if needs_quotes {
        quote(value)
    } else {
        value.to_string()
    }
}

/// Render `prefix + key=value` pairs separated by single spaces
pub fn format_keywords<'a, I>(pairs: I, prefix: &str) -> String
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    pairs
        .into_iter()
        .map(|(key, value)| format!("{prefix}{key}={}", quote_if_needed(value)))
        .collect::<Vec<_>>()
        .join(" ")
}
