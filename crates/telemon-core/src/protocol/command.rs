//! Command line parsing
//!
//! Splitting follows shell conventions: whitespace separates chunks unless it
//! is inside single or double quotes, quotes are removed from the resulting
//! chunk, and inside double quotes a backslash escapes the next character.
//! Parsing never fails. A blank line or one with an unterminated quote gives a
//! command without a name, which every dispatcher treats as a no-op.

use core::mem;

use indexmap::IndexMap;

/// One parsed protocol line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
    name: Option<String>,
    chunks: Vec<String>,
    kwargs: IndexMap<String, String>,
    line: String,
    /// Byte offset in `line` where each chunk begins
    starts: Vec<usize>,
}

impl Command {
    /// Parse a raw line
    pub fn parse(line: &str) -> Self {
        let (chunks, starts) = match split_chunks(line) {
            Some((chunks, starts)) if !chunks.is_empty() => (chunks, starts),
            _ => return Self::default(),
        };

        // The name chunk never contributes a keyword
        let kwargs = chunks[1..]
            .iter()
            .filter_map(|chunk| split_keyword(chunk))
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();

        Self {
            name: Some(chunks[0].clone()),
            chunks,
            kwargs,
            line: line.to_string(),
            starts,
        }
    }

    /// Command name, absent for blank or malformed lines
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// True when the line carried nothing to dispatch
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
    }

    /// All chunks, `chunks()[0]` being the name
    pub fn chunks(&self) -> &[String] {
        &self.chunks
    }

    pub fn chunk(&self, index: usize) -> Option<&str> {
        self.chunks.get(index).map(String::as_str)
    }

    /// Chunks from `start` on, joined by single spaces
    pub fn rest(&self, start: usize) -> String {
        self.chunks.get(start..).map(|c| c.join(" ")).unwrap_or_default()
    }

    /// The line as received from chunk `start` on, quotes intact
    pub fn raw_rest(&self, start: usize) -> String {
        self.starts
            .get(start)
            .map(|&offset| self.line[offset..].trim_end().to_string())
            .unwrap_or_default()
    }

    pub fn kwargs(&self) -> &IndexMap<String, String> {
        &self.kwargs
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.kwargs.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.kwargs.contains_key(key)
    }

    pub fn into_kwargs(self) -> IndexMap<String, String> {
        self.kwargs
    }
}

impl From<&str> for Command {
    fn from(line: &str) -> Self {
        Self::parse(line)
    }
}

/// Split a line into unquoted chunks and their start offsets; `None` on an
/// unterminated quote
fn split_chunks(line: &str) -> Option<(Vec<String>, Vec<usize>)> {
    let mut chunks = Vec::new();
    let mut starts = Vec::new();
    let mut current = String::new();
    let mut in_chunk = false;
    let mut quote: Option<char> = None;
    let mut chars = line.char_indices();

    while let Some((offset, c)) = chars.next() {
        match quote {
            Some(q) if c == q => quote = None,
            Some('"') if c == '\\' => current.push(chars.next()?.1),
            Some(_) => current.push(c),
            None if c.is_whitespace() => {
                if in_chunk {
                    chunks.push(mem::take(&mut current));
                    in_chunk = false;
                }
            }
            None => {
                if !in_chunk {
                    starts.push(offset);
                    in_chunk = true;
                }
                if c == '"' || c == '\'' {
                    quote = Some(c);
                } else {
                    current.push(c);
                }
            }
        }
    }

    if quote.is_some() {
        return None;
    }
    if in_chunk {
        chunks.push(current);
    }
    Some((chunks, starts))
}

/// Split `key=value`; keys must be non-empty and free of whitespace
fn split_keyword(chunk: &str) -> Option<(&str, &str)> {
    let (key, value) = chunk.split_once('=')?;
    if key.is_empty() || key.chars().any(char::is_whitespace) {
        return None;
    }
    Some((key, value))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_command() {
        let cmd = Command::parse("send hw OP1 1");
        assert_eq!(cmd.name(), Some("send"));
        assert_eq!(cmd.chunks(), &["send", "hw", "OP1", "1"]);
        assert!(cmd.kwargs().is_empty());
        assert_eq!(cmd.rest(2), "OP1 1");
    }

    #[test]
    fn test_keywords_are_also_chunks() {
        let cmd = Command::parse("id name=ccd1 role=producer");
        assert_eq!(cmd.get("name"), Some("ccd1"));
        assert_eq!(cmd.get("role"), Some("producer"));
        assert_eq!(cmd.chunk(1), Some("name=ccd1"));
        assert_eq!(cmd.chunks().len(), 3);
    }

    #[test]
    fn test_quoted_value_keeps_spaces() {
        let cmd = Command::parse(r#"status state="taking flat" temp=20.5"#);
        assert_eq!(cmd.get("state"), Some("taking flat"));
        assert_eq!(cmd.chunk(1), Some("state=taking flat"));
        assert_eq!(cmd.get("temp"), Some("20.5"));
    }

    #[test]
    fn test_escaped_quote_inside_double_quotes() {
        let cmd = Command::parse(r#"message text="say \"hi\"""#);
        assert_eq!(cmd.get("text"), Some(r#"say "hi""#));
    }

    #[test]
    fn test_keyword_order_preserved() {
        let cmd = Command::parse("status z=1 a=2 m=3");
        let keys: Vec<_> = cmd.kwargs().keys().map(String::as_str).collect();
        assert_eq!(keys, ["z", "a", "m"]);
    }

    #[test]
    fn test_blank_and_malformed_lines_have_no_name() {
        assert!(Command::parse("").is_empty());
        assert!(Command::parse("   \t ").is_empty());
        assert!(Command::parse(r#"status state="unterminated"#).is_empty());
    }

    #[test]
    fn test_empty_key_is_positional() {
        let cmd = Command::parse("set =5 interval=10");
        assert_eq!(cmd.kwargs().len(), 1);
        assert_eq!(cmd.get("interval"), Some("10"));
        assert_eq!(cmd.chunk(1), Some("=5"));
    }

    #[test]
    fn test_name_chunk_never_becomes_keyword() {
        let cmd = Command::parse("a=b c=d");
        assert_eq!(cmd.name(), Some("a=b"));
        assert!(!cmd.contains("a"));
        assert!(cmd.contains("c"));
    }

    #[test]
    fn test_rest_past_end_is_empty() {
        let cmd = Command::parse("send");
        assert_eq!(cmd.rest(2), "");
        assert_eq!(cmd.raw_rest(2), "");
    }

    #[test]
    fn test_raw_rest_keeps_quotes_and_spacing() {
        let cmd = Command::parse(r#"  send dome set_keywords object="M 31"  note='a b'  "#);
        assert_eq!(cmd.rest(2), "set_keywords object=M 31 note=a b");
        assert_eq!(cmd.raw_rest(2), r#"set_keywords object="M 31"  note='a b'"#);
        assert_eq!(cmd.raw_rest(3), r#"object="M 31"  note='a b'"#);
    }
}
