//! Request body decoding
//!
//! Existing clients match on the exact text of JSON decoding failures, which
//! follows Python's `json` module (`Expecting value: line 1 column 1 (char 0)`).
//! serde_json decodes the body; when it refuses, the body is rescanned with
//! Python's decoding rules to find the message and position clients expect.

use serde_json::error::Category;
use serde_json::Value;

/// A body that is not valid JSON
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}: line {line} column {column} (char {offset})")]
pub struct ParseError {
    pub message: String,
    /// 1-based line
    pub line: usize,
    /// 1-based column, counted in characters
    pub column: usize,
    /// 0-based character offset into the body
    pub offset: usize,
}

impl ParseError {
    fn at(message: impl Into<String>, text: &str, byte_pos: usize) -> Self {
        let mut pos = byte_pos.min(text.len());
        while !text.is_char_boundary(pos) {
            pos -= 1;
        }
        let before = &text[..pos];
        let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
        Self {
            message: message.into(),
            line: before.matches('\n').count() + 1,
            column: before[line_start..].chars().count() + 1,
            offset: before.chars().count(),
        }
    }
}

/// Decode a raw request body into a JSON value
pub fn parse_body(body: &[u8]) -> Result<Value, ParseError> {
    let text = match std::str::from_utf8(body) {
        Ok(text) => text,
        Err(err) => {
            let valid = &body[..err.valid_up_to()];
            // The prefix is valid UTF-8 by construction.
            let prefix = String::from_utf8_lossy(valid);
            return Err(ParseError::at("Invalid UTF-8 byte", &prefix, prefix.len()));
        }
    };

    let err = match serde_json::from_str(text) {
        Ok(value) => return Ok(value),
        Err(err) => err,
    };

    Scanner::new(text).check()?;

    // Lone surrogate escapes decode in Python but have no Rust `char`.
    if let Some(repaired) = replace_lone_surrogates(text) {
        if let Ok(value) = serde_json::from_str(&repaired) {
            return Ok(value);
        }
    }

    Err(residual_error(&err, text))
}

const INVALID_UNICODE_ESCAPE: &str = "Invalid \\uXXXX escape";
const EXPECTING_PROPERTY_NAME: &str = "Expecting property name enclosed in double quotes";

#[derive(Debug, Clone, Copy)]
enum Container {
    Object,
    Array,
}

/// Walks a body the way Python's `json` decoder does and reports the first
/// place it gives up.
///
/// Structural characters are ASCII, so the walk works on bytes; positions are
/// converted to characters when the error is built.
struct Scanner<'a> {
    text: &'a str,
    bytes: &'a [u8],
}

impl<'a> Scanner<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            bytes: text.as_bytes(),
        }
    }

    fn fail(&self, message: &str, pos: usize) -> ParseError {
        ParseError::at(message, self.text, pos)
    }

    fn byte(&self, pos: usize) -> Option<u8> {
        self.bytes.get(pos).copied()
    }

    fn skip_whitespace(&self, mut pos: usize) -> usize {
        while matches!(self.byte(pos), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            pos += 1;
        }
        pos
    }

    fn is_digit(&self, pos: usize) -> bool {
        self.byte(pos).is_some_and(|b| b.is_ascii_digit())
    }

    fn check(&self) -> Result<(), ParseError> {
        let mut open: Vec<Container> = Vec::new();
        let mut pos = self.skip_whitespace(0);

        'value: loop {
            pos = match self.byte(pos) {
                Some(b'"') => self.string(pos)?,
                Some(b'{') => {
                    let first = self.skip_whitespace(pos + 1);
                    if self.byte(first) == Some(b'}') {
                        first + 1
                    } else {
                        open.push(Container::Object);
                        pos = self.member(first)?;
                        continue 'value;
                    }
                }
                Some(b'[') => {
                    let first = self.skip_whitespace(pos + 1);
                    if self.byte(first) == Some(b']') {
                        first + 1
                    } else {
                        open.push(Container::Array);
                        pos = first;
                        continue 'value;
                    }
                }
                _ => self
                    .literal(pos)
                    .ok_or_else(|| self.fail("Expecting value", pos))?,
            };

            // A value just ended: close containers until one wants another value.
            loop {
                let container = match open.last() {
                    Some(&container) => container,
                    None => {
                        let end = self.skip_whitespace(pos);
                        if end != self.bytes.len() {
                            return Err(self.fail("Extra data", end));
                        }
                        return Ok(());
                    }
                };

                pos = self.skip_whitespace(pos);
                let close = match container {
                    Container::Object => b'}',
                    Container::Array => b']',
                };
                match self.byte(pos) {
                    Some(b) if b == close => {
                        open.pop();
                        pos += 1;
                    }
                    Some(b',') => {
                        let next = self.skip_whitespace(pos + 1);
                        pos = match container {
                            Container::Object => self.member(next)?,
                            Container::Array => next,
                        };
                        continue 'value;
                    }
                    _ => return Err(self.fail("Expecting ',' delimiter", pos)),
                }
            }
        }
    }

    /// Read `"key" :` starting at `pos`; returns where the member's value starts
    fn member(&self, pos: usize) -> Result<usize, ParseError> {
        if self.byte(pos) != Some(b'"') {
            return Err(self.fail(EXPECTING_PROPERTY_NAME, pos));
        }
        let colon = self.skip_whitespace(self.string(pos)?);
        if self.byte(colon) != Some(b':') {
            return Err(self.fail("Expecting ':' delimiter", colon));
        }
        Ok(self.skip_whitespace(colon + 1))
    }

    /// Read a string whose opening quote is at `begin`; returns the position
    /// after the closing quote
    fn string(&self, begin: usize) -> Result<usize, ParseError> {
        let mut pos = begin + 1;
        loop {
            match self.byte(pos) {
                None => return Err(self.fail("Unterminated string starting at", begin)),
                Some(b'"') => return Ok(pos + 1),
                Some(b'\\') => pos = self.escape(begin, pos)?,
                Some(b) if b <= 0x1f => return Err(self.fail("Invalid control character at", pos)),
                Some(_) => pos += 1,
            }
        }
    }

    /// Read the escape whose backslash is at `backslash`
    fn escape(&self, begin: usize, backslash: usize) -> Result<usize, ParseError> {
        let marker = backslash + 1;
        match self.byte(marker) {
            None => Err(self.fail("Unterminated string starting at", begin)),
            Some(b'"' | b'\\' | b'/' | b'b' | b'f' | b'n' | b'r' | b't') => Ok(marker + 1),
            Some(b'u') => {
                let end = marker + 5;
                // The string still needs its closing quote after the digits.
                if end >= self.bytes.len() {
                    return Err(self.fail(INVALID_UNICODE_ESCAPE, marker));
                }
                let code = hex4(&self.bytes[marker + 1..end])
                    .ok_or_else(|| self.fail(INVALID_UNICODE_ESCAPE, marker))?;

                // A high surrogate pairs with a directly following `\u` escape.
                if is_high_surrogate(code)
                    && end + 6 < self.bytes.len()
                    && self.bytes[end..end + 2] == *b"\\u"
                {
                    let low = hex4(&self.bytes[end + 2..end + 6])
                        .ok_or_else(|| self.fail(INVALID_UNICODE_ESCAPE, end + 1))?;
                    if is_low_surrogate(low) {
                        return Ok(end + 6);
                    }
                }
                Ok(end)
            }
            Some(_) => Err(self.fail("Invalid \\escape", backslash)),
        }
    }

    /// End of the literal or number starting at `start`, if there is one
    fn literal(&self, start: usize) -> Option<usize> {
        let rest = self.bytes.get(start..)?;
        for word in ["null", "true", "false"] {
            if rest.starts_with(word.as_bytes()) {
                return Some(start + word.len());
            }
        }
        self.number(start)
    }

    /// Longest number prefix at `start`. Like Python, anything after it is
    /// left for the caller: `01` is the number `0` followed by a stray `1`.
    fn number(&self, start: usize) -> Option<usize> {
        let mut pos = start;
        if self.byte(pos) == Some(b'-') {
            pos += 1;
        }
        match self.byte(pos) {
            Some(b'1'..=b'9') => {
                pos += 1;
                while self.is_digit(pos) {
                    pos += 1;
                }
            }
            Some(b'0') => pos += 1,
            _ => return None,
        }

        if self.byte(pos) == Some(b'.') && self.is_digit(pos + 1) {
            pos += 2;
            while self.is_digit(pos) {
                pos += 1;
            }
        }

        if matches!(self.byte(pos), Some(b'e' | b'E')) {
            let mut exponent = pos + 1;
            if matches!(self.byte(exponent), Some(b'+' | b'-')) {
                exponent += 1;
            }
            let digits = exponent;
            while self.is_digit(exponent) {
                exponent += 1;
            }
            if exponent > digits {
                pos = exponent;
            }
        }

        Some(pos)
    }
}

fn hex4(digits: &[u8]) -> Option<u32> {
    let digits = std::str::from_utf8(digits).ok()?;
    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(digits, 16).ok()
}

fn is_high_surrogate(code: u32) -> bool {
    (0xd800..0xdc00).contains(&code)
}

fn is_low_surrogate(code: u32) -> bool {
    (0xdc00..0xe000).contains(&code)
}

/// Rewrite unpaired surrogate escapes as `\ufffd`; `None` when there are none.
///
/// Only called on text that already scans as valid JSON, so every backslash
/// starts a complete escape inside a string.
fn replace_lone_surrogates(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let escape_at = |pos: usize| {
        (bytes.get(pos..pos + 2) == Some(&b"\\u"[..]))
            .then(|| bytes.get(pos + 2..pos + 6).and_then(hex4))
            .flatten()
    };

    let mut out = String::with_capacity(text.len());
    let mut copied = 0;
    let mut replaced = false;
    let mut pos = 0;
    while pos < bytes.len() {
        if bytes[pos] != b'\\' {
            pos += 1;
            continue;
        }
        let Some(code) = escape_at(pos) else {
            // Two-character escape such as `\\` or `\"`.
            pos += 2;
            continue;
        };
        if is_high_surrogate(code) && escape_at(pos + 6).is_some_and(is_low_surrogate) {
            pos += 12;
        } else if is_high_surrogate(code) || is_low_surrogate(code) {
            out.push_str(&text[copied..pos]);
            out.push_str("\\ufffd");
            replaced = true;
            pos += 6;
            copied = pos;
        } else {
            pos += 6;
        }
    }

    replaced.then(|| {
        out.push_str(&text[copied..]);
        out
    })
}

/// A refusal serde_json makes on text that otherwise scans as valid, such as
/// nesting past its recursion limit or a number outside `f64` range.
fn residual_error(err: &serde_json::Error, text: &str) -> ParseError {
    let detail = err.to_string();
    let suffix = format!(" at line {} column {}", err.line(), err.column());
    let reason = detail.strip_suffix(&suffix).unwrap_or(&detail);

    let message = match (err.classify(), reason) {
        (_, "recursion limit exceeded") => "Maximum nesting depth exceeded".to_string(),
        (Category::Eof, _) => "Expecting value".to_string(),
        (_, other) => capitalize(other),
    };
    ParseError::at(message, text, error_position(err, text))
}

/// Byte index of the character serde_json stopped at
fn error_position(err: &serde_json::Error, text: &str) -> usize {
    let line_start = text
        .split_inclusive('\n')
        .take(err.line().saturating_sub(1))
        .map(str::len)
        .sum::<usize>();
    line_start + err.column().saturating_sub(1)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(body: &str) -> String {
        parse_body(body.as_bytes()).unwrap_err().to_string()
    }

    #[test]
    fn test_valid_object() {
        let value = parse_body(br#"{"size": 2, "query": {"match_all": {}}}"#).unwrap();
        assert_eq!(value, json!({"size": 2, "query": {"match_all": {}}}));
    }

    #[test]
    fn test_garbage_first_character() {
        assert_eq!(
            message("}not valid JSON{"),
            "Expecting value: line 1 column 1 (char 0)"
        );
    }

    #[test]
    fn test_empty_body() {
        assert_eq!(message(""), "Expecting value: line 1 column 1 (char 0)");
    }

    #[test]
    fn test_decoder_messages() {
        // (body, message, char offset) as Python's json.loads reports them
        let cases = [
            // end of input inside a container
            ("[", "Expecting value", 1),
            ("[42", "Expecting ',' delimiter", 3),
            ("[42,", "Expecting value", 4),
            ("[\"", "Unterminated string starting at", 1),
            ("[\"spam", "Unterminated string starting at", 1),
            ("[\"spam\"", "Expecting ',' delimiter", 7),
            ("[\"spam\",", "Expecting value", 8),
            ("{", EXPECTING_PROPERTY_NAME, 1),
            ("{\"", "Unterminated string starting at", 1),
            ("{\"spam\"", "Expecting ':' delimiter", 7),
            ("{\"spam\":", "Expecting value", 8),
            ("{\"spam\":42", "Expecting ',' delimiter", 10),
            ("{\"spam\":42,", EXPECTING_PROPERTY_NAME, 11),
            ("{\"a\": \"b\",", EXPECTING_PROPERTY_NAME, 10),
            ("\"spam", "Unterminated string starting at", 0),
            // trailing commas
            ("[1,]", "Expecting value", 3),
            ("[42,]", "Expecting value", 4),
            ("[\"spam\",]", "Expecting value", 8),
            ("{\"a\":1,}", EXPECTING_PROPERTY_NAME, 7),
            ("{\"spam\":42,}", EXPECTING_PROPERTY_NAME, 11),
            // unexpected characters
            ("[,", "Expecting value", 1),
            ("{\"spam\":[}", "Expecting value", 9),
            ("[42:", "Expecting ',' delimiter", 3),
            ("[42 \"spam\"", "Expecting ',' delimiter", 4),
            ("{\"spam\":[42}", "Expecting ',' delimiter", 11),
            ("[\"]", "Unterminated string starting at", 1),
            ("[\"spam\":", "Expecting ',' delimiter", 7),
            ("{:", EXPECTING_PROPERTY_NAME, 1),
            ("{,", EXPECTING_PROPERTY_NAME, 1),
            ("{42", EXPECTING_PROPERTY_NAME, 1),
            ("[{]", EXPECTING_PROPERTY_NAME, 2),
            ("{\"spam\",", "Expecting ':' delimiter", 7),
            ("{\"spam\"}", "Expecting ':' delimiter", 7),
            ("[{\"spam\"]", "Expecting ':' delimiter", 8),
            ("{\"spam\":}", "Expecting value", 8),
            ("[{\"spam\":]", "Expecting value", 9),
            ("{\"spam\":42 \"ham\"", "Expecting ',' delimiter", 11),
            ("[{\"spam\":42]", "Expecting ',' delimiter", 11),
            // misspelt literals point at the start of the value
            ("{\"a\": tru}", "Expecting value", 6),
            ("{\"a\": nul}", "Expecting value", 6),
            ("[-]", "Expecting value", 1),
            // numbers end at the longest valid prefix
            ("{\"a\": 01}", "Expecting ',' delimiter", 7),
            ("{\"a\": 1.}", "Expecting ',' delimiter", 7),
            ("{\"a\": 1e}", "Expecting ',' delimiter", 7),
            ("[1.5e+]", "Expecting ',' delimiter", 4),
            // escapes and control characters
            ("{\"a\":\"x\\q\"}", "Invalid \\escape", 7),
            ("{\"a\":\"\\u00zz\"}", INVALID_UNICODE_ESCAPE, 7),
            ("\"\\u12\"", INVALID_UNICODE_ESCAPE, 2),
            ("[\"\\ud800\\uzzzz\"]", INVALID_UNICODE_ESCAPE, 9),
            ("\"a\tb\"", "Invalid control character at", 2),
            // extra data after a complete value
            ("[]]", "Extra data", 2),
            ("{}}", "Extra data", 2),
            ("[],[]", "Extra data", 2),
            ("42,\"spam\"", "Extra data", 2),
            ("\"spam\",42", "Extra data", 6),
            ("01", "Extra data", 1),
        ];

        for (body, expected, offset) in cases {
            let err = parse_body(body.as_bytes()).unwrap_err();
            assert_eq!(
                err.to_string(),
                format!("{expected}: line 1 column {} (char {offset})", offset + 1),
                "{body}"
            );
        }
    }

    #[test]
    fn test_extra_data() {
        assert_eq!(message("{}x"), "Extra data: line 1 column 3 (char 2)");
        assert_eq!(message("{} \n x"), "Extra data: line 2 column 2 (char 5)");
    }

    #[test]
    fn test_unquoted_key() {
        assert_eq!(
            message("{size: 1}"),
            "Expecting property name enclosed in double quotes: line 1 column 2 (char 1)"
        );
    }

    #[test]
    fn test_missing_colon() {
        assert_eq!(
            message(r#"{"size" 1}"#),
            "Expecting ':' delimiter: line 1 column 9 (char 8)"
        );
    }

    #[test]
    fn test_missing_comma() {
        assert_eq!(
            message(r#"{"size": 1 "from": 2}"#),
            "Expecting ',' delimiter: line 1 column 12 (char 11)"
        );
    }

    #[test]
    fn test_unterminated_string() {
        assert_eq!(
            message(r#"{"query": "abc"#),
            "Unterminated string starting at: line 1 column 11 (char 10)"
        );
        assert_eq!(
            message(r#"{"query": "abc\"#),
            "Unterminated string starting at: line 1 column 11 (char 10)"
        );
    }

    #[test]
    fn test_position_on_second_line() {
        assert_eq!(
            message("{\n  \"size\": ]\n}"),
            "Expecting value: line 2 column 11 (char 12)"
        );
        assert_eq!(
            message("{\n\"a\": tru}"),
            "Expecting value: line 2 column 6 (char 7)"
        );
    }

    #[test]
    fn test_offsets_count_characters_not_bytes() {
        assert_eq!(
            message(r#"{"q": "ø", x}"#),
            "Expecting property name enclosed in double quotes: line 1 column 12 (char 11)"
        );
    }

    #[test]
    fn test_lone_surrogate_is_accepted() {
        let value = parse_body(br#"{"a":"\ud800"}"#).unwrap();
        assert_eq!(value, json!({"a": "\u{fffd}"}));

        let value = parse_body(br#"["x\udc00y", "\\ud800"]"#).unwrap();
        assert_eq!(value, json!(["x\u{fffd}y", "\\ud800"]));
    }

    #[test]
    fn test_surrogate_pair_is_decoded() {
        let value = parse_body(br#"{"a":"\ud83d\ude00"}"#).unwrap();
        assert_eq!(value, json!({"a": "\u{1f600}"}));
    }

    #[test]
    fn test_deep_nesting_is_refused() {
        let body = format!("{}{}", "[".repeat(200), "]".repeat(200));
        let err = parse_body(body.as_bytes()).unwrap_err();
        assert_eq!(err.message, "Maximum nesting depth exceeded");
    }

    #[test]
    fn test_invalid_utf8() {
        let err = parse_body(b"{\"a\": \"\xff\"}").unwrap_err();
        assert_eq!(err.message, "Invalid UTF-8 byte");
        assert_eq!(err.offset, 7);
    }
}
