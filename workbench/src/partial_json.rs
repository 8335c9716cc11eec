//! Tolerant parsing of JSON documents that are still streaming in
//!
//! [`parse_partial`] accepts any prefix of a valid JSON document and returns the
//! value that prefix already determines:
//!
//! - array elements are kept only once they are complete, so a list never ends
//!   in a half-written object
//! - object members are kept when their value is complete, or when the value is
//!   a container still being filled (so a nested array keeps growing)
//! - unfinished strings, numbers and literals are dropped
//!
//! Text before the first `{` or `[` (e.g. a code fence) is skipped. Input that
//! cannot be the prefix of valid JSON, or nests deeper than [`MAX_DEPTH`],
//! yields `None`.

use serde_json::{Map, Value};

/// Deepest container nesting accepted, matching serde_json's recursion limit
pub const MAX_DEPTH: usize = 128;

/// Parse a possibly truncated JSON document
pub fn parse_partial(text: &str) -> Option<Value> {
    let start = text.find(|c: char| c == '{' || c == '[')?;
    let mut parser = Parser {
        text: &text[start..],
        pos: 0,
        depth: 0,
    };
    let parsed = parser.value().ok()?;
    parsed.value
}

/// Elements stored under `array_key`, or the document itself when it is a
/// top-level array
pub fn artifact_array(document: &Value, array_key: &str) -> Option<Vec<Value>> {
    match document {
        Value::Object(map) => map.get(array_key)?.as_array().cloned(),
        Value::Array(items) => Some(items.clone()),
        _ => None,
    }
}

struct Parsed {
    value: Option<Value>,
    complete: bool,
}

impl Parsed {
    fn complete(value: Value) -> Self {
        Self {
            value: Some(value),
            complete: true,
        }
    }

    fn partial(value: Option<Value>) -> Self {
        Self {
            value,
            complete: false,
        }
    }
}

/// Input is not a prefix of any valid JSON document
struct Malformed;

struct Parser<'a> {
    text: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<u8> {
        self.text.as_bytes().get(self.pos).copied()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\n' | b'\r' | b'\t')) {
            self.pos += 1;
        }
    }

    fn value(&mut self) -> Result<Parsed, Malformed> {
        self.skip_whitespace();
        match self.peek() {
            None => Ok(Parsed::partial(None)),
            Some(open @ (b'{' | b'[')) => {
                if self.depth >= MAX_DEPTH {
                    return Err(Malformed);
                }
                self.depth += 1;
                let parsed = if open == b'{' { self.object() } else { self.array() };
                self.depth -= 1;
                parsed
            }
            Some(b'"') => self.string().map(|(s, complete)| Parsed {
                value: Some(Value::String(s)),
                complete,
            }),
            Some(b't') => self.literal("true", Value::Bool(true)),
            Some(b'f') => self.literal("false", Value::Bool(false)),
            Some(b'n') => self.literal("null", Value::Null),
            Some(b'-' | b'0'..=b'9') => self.number(),
            Some(_) => Err(Malformed),
        }
    }

    fn object(&mut self) -> Result<Parsed, Malformed> {
        self.pos += 1;
        let mut map = Map::new();

        loop {
            self.skip_whitespace();
            match self.peek() {
                None => return Ok(Parsed::partial(Some(Value::Object(map)))),
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(Parsed::complete(Value::Object(map)));
                }
                Some(b'"') => {}
                Some(_) => return Err(Malformed),
            }

            let (key, key_complete) = self.string()?;
            if !key_complete {
                return Ok(Parsed::partial(Some(Value::Object(map))));
            }

            self.skip_whitespace();
            match self.peek() {
                None => return Ok(Parsed::partial(Some(Value::Object(map)))),
                Some(b':') => self.pos += 1,
                Some(_) => return Err(Malformed),
            }

            let member = self.value()?;
            if !member.complete {
                if let Some(value @ (Value::Object(_) | Value::Array(_))) = member.value {
                    map.insert(key, value);
                }
                return Ok(Parsed::partial(Some(Value::Object(map))));
            }
            if let Some(value) = member.value {
                map.insert(key, value);
            }

            self.skip_whitespace();
            match self.peek() {
                None => return Ok(Parsed::partial(Some(Value::Object(map)))),
                Some(b',') => self.pos += 1,
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(Parsed::complete(Value::Object(map)));
                }
                Some(_) => return Err(Malformed),
            }
        }
    }

    fn array(&mut self) -> Result<Parsed, Malformed> {
        self.pos += 1;
        let mut items = Vec::new();

        loop {
            self.skip_whitespace();
            match self.peek() {
                None => return Ok(Parsed::partial(Some(Value::Array(items)))),
                Some(b']') => {
                    self.pos += 1;
                    return Ok(Parsed::complete(Value::Array(items)));
                }
                Some(_) => {}
            }

            let element = self.value()?;
            if !element.complete {
                return Ok(Parsed::partial(Some(Value::Array(items))));
            }
            if let Some(value) = element.value {
                items.push(value);
            }

            self.skip_whitespace();
            match self.peek() {
                None => return Ok(Parsed::partial(Some(Value::Array(items)))),
                Some(b',') => self.pos += 1,
                Some(b']') => {
                    self.pos += 1;
                    return Ok(Parsed::complete(Value::Array(items)));
                }
                Some(_) => return Err(Malformed),
            }
        }
    }

    /// Returns the decoded text and whether the closing quote was seen
    fn string(&mut self) -> Result<(String, bool), Malformed> {
        self.pos += 1;
        let mut out = String::new();

        loop {
            let rest = &self.text[self.pos..];
            let Some(offset) = rest.find(|c: char| c == '"' || c == '\\') else {
                out.push_str(rest);
                self.pos = self.text.len();
                return Ok((out, false));
            };
            out.push_str(&rest[..offset]);
            self.pos += offset;

            if self.peek() == Some(b'"') {
                self.pos += 1;
                return Ok((out, true));
            }

            // Backslash escape
            self.pos += 1;
            let Some(escape) = self.peek() else {
                return Ok((out, false));
            };
            self.pos += 1;
            match escape {
                b'"' => out.push('"'),
                b'\\' => out.push('\\'),
                b'/' => out.push('/'),
                b'b' => out.push('\u{8}'),
                b'f' => out.push('\u{c}'),
                b'n' => out.push('\n'),
                b'r' => out.push('\r'),
                b't' => out.push('\t'),
                b'u' => match self.unicode_escape()? {
                    Some(c) => out.push(c),
                    None => return Ok((out, false)),
                },
                _ => return Err(Malformed),
            }
        }
    }

    /// Decode the hex digits after `\u`, pairing surrogates. `None` when the
    /// input ends inside the escape.
    fn unicode_escape(&mut self) -> Result<Option<char>, Malformed> {
        let Some(high) = self.hex4()? else {
            return Ok(None);
        };
        if !(0xD800..0xDC00).contains(&high) {
            return Ok(Some(char::from_u32(high).unwrap_or(char::REPLACEMENT_CHARACTER)));
        }

        let rest = &self.text.as_bytes()[self.pos..];
        if rest.len() < 2 {
            return Ok(None);
        }
        if rest[0] != b'\\' || rest[1] != b'u' {
            return Ok(Some(char::REPLACEMENT_CHARACTER));
        }
        self.pos += 2;
        let Some(low) = self.hex4()? else {
            return Ok(None);
        };
        if !(0xDC00..0xE000).contains(&low) {
            return Ok(Some(char::REPLACEMENT_CHARACTER));
        }
        let code = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
        Ok(Some(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER)))
    }

    fn hex4(&mut self) -> Result<Option<u32>, Malformed> {
        let rest = &self.text.as_bytes()[self.pos..];
        let digits = &rest[..rest.len().min(4)];
        if !digits.iter().all(u8::is_ascii_hexdigit) {
            return Err(Malformed);
        }
        if digits.len() < 4 {
            self.pos = self.text.len();
            return Ok(None);
        }
        let hex = std::str::from_utf8(digits).map_err(|_| Malformed)?;
        let code = u32::from_str_radix(hex, 16).map_err(|_| Malformed)?;
        self.pos += 4;
        Ok(Some(code))
    }

    fn literal(&mut self, word: &str, value: Value) -> Result<Parsed, Malformed> {
        let rest = &self.text[self.pos..];
        if rest.starts_with(word) {
            self.pos += word.len();
            return Ok(Parsed::complete(value));
        }
        if word.starts_with(rest) {
            self.pos = self.text.len();
            return Ok(Parsed::partial(None));
        }
        Err(Malformed)
    }

    fn number(&mut self) -> Result<Parsed, Malformed> {
        let start = self.pos;
        while matches!(
            self.peek(),
            Some(b'-' | b'+' | b'.' | b'e' | b'E' | b'0'..=b'9')
        ) {
            self.pos += 1;
        }
        // A number running into the end of input may still grow
        if self.at_end() {
            return Ok(Parsed::partial(None));
        }
        let number: serde_json::Number = self.text[start..self.pos].parse().map_err(|_| Malformed)?;
        Ok(Parsed::complete(Value::Number(number)))
    }
}
