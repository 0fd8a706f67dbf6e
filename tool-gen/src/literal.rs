//! Decoding of tool output into structured values.
//!
//! Tools print their result as a literal expression (`120`, `'text'`,
//! `[1, 2]`, `{'a': True}`). This module parses that text into a
//! [`serde_json::Value`] without evaluating anything: only numbers, quoted
//! strings, lists, tuples, sets, mappings, booleans and null are accepted.

use serde_json::{Map, Number, Value};

use crate::error::LiteralError;

const MAX_DEPTH: usize = 128;

/// Parse `text` as a single literal value.
pub fn parse_literal(text: &str) -> Result<Value, LiteralError> {
    let mut parser = Parser { text, pos: 0 };
    parser.skip_ws();
    let value = parser.value(0)?;
    parser.skip_ws();
    if parser.pos < text.len() {
        return Err(LiteralError::TrailingInput(parser.pos));
    }
    Ok(value)
}

/// Parse `text` as a literal, falling back to the raw (trimmed) text.
///
/// The error is returned alongside so callers can report the degradation.
pub fn decode_or_raw(text: &str) -> (Value, Option<LiteralError>) {
    match parse_literal(text) {
        Ok(value) => (value, None),
        Err(e) => (Value::String(text.trim().to_string()), Some(e)),
    }
}

struct Parser<'a> {
    text: &'a str,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if !c.is_whitespace() {
                break;
            }
            self.pos += c.len_utf8();
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), LiteralError> {
        match self.bump() {
            Some(c) if c == expected => Ok(()),
            Some(found) => Err(LiteralError::UnexpectedChar {
                found,
                offset: self.pos - found.len_utf8(),
            }),
            None => Err(LiteralError::UnexpectedEnd),
        }
    }

    fn value(&mut self, depth: usize) -> Result<Value, LiteralError> {
        if depth > MAX_DEPTH {
            return Err(LiteralError::TooDeep);
        }
        match self.peek() {
            None => Err(LiteralError::UnexpectedEnd),
            Some('\'' | '"') => self.string().map(Value::String),
            Some('[') => {
                self.bump();
                self.sequence(']', depth).map(Value::Array)
            }
            Some('(') => self.tuple(depth),
            Some('{') => self.mapping_or_set(depth),
            Some(c) if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => self.number(),
            Some(c) if c.is_alphabetic() || c == '_' => self.keyword(),
            Some(found) => Err(LiteralError::UnexpectedChar {
                found,
                offset: self.pos,
            }),
        }
    }

    /// Comma-separated values up to `close`; the opener is already consumed.
    fn sequence(&mut self, close: char, depth: usize) -> Result<Vec<Value>, LiteralError> {
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(close) {
                self.bump();
                return Ok(items);
            }
            items.push(self.value(depth + 1)?);
            self.skip_ws();
            match self.bump() {
                Some(',') => continue,
                Some(c) if c == close => return Ok(items),
                Some(found) => {
                    return Err(LiteralError::UnexpectedChar {
                        found,
                        offset: self.pos - found.len_utf8(),
                    });
                }
                None => return Err(LiteralError::UnexpectedEnd),
            }
        }
    }

    /// `(x)` is just `x`; `()`, `(x,)` and `(x, y)` are tuples.
    fn tuple(&mut self, depth: usize) -> Result<Value, LiteralError> {
        self.expect('(')?;
        self.skip_ws();
        if self.peek() == Some(')') {
            self.bump();
            return Ok(Value::Array(Vec::new()));
        }
        let first = self.value(depth + 1)?;
        self.skip_ws();
        match self.bump() {
            Some(')') => Ok(first),
            Some(',') => {
                let mut items = vec![first];
                items.extend(self.sequence(')', depth)?);
                Ok(Value::Array(items))
            }
            Some(found) => Err(LiteralError::UnexpectedChar {
                found,
                offset: self.pos - found.len_utf8(),
            }),
            None => Err(LiteralError::UnexpectedEnd),
        }
    }

    fn mapping_or_set(&mut self, depth: usize) -> Result<Value, LiteralError> {
        self.expect('{')?;
        self.skip_ws();
        if self.peek() == Some('}') {
            self.bump();
            return Ok(Value::Object(Map::new()));
        }

        let first = self.value(depth + 1)?;
        self.skip_ws();
        if self.peek() != Some(':') {
            // A set literal.
            let mut items = vec![first];
            match self.bump() {
                Some('}') => return Ok(Value::Array(items)),
                Some(',') => {
                    items.extend(self.sequence('}', depth)?);
                    return Ok(Value::Array(items));
                }
                Some(found) => {
                    return Err(LiteralError::UnexpectedChar {
                        found,
                        offset: self.pos - found.len_utf8(),
                    });
                }
                None => return Err(LiteralError::UnexpectedEnd),
            }
        }

        let mut map = Map::new();
        let mut key = first;
        loop {
            self.expect(':')?;
            self.skip_ws();
            let value = self.value(depth + 1)?;
            map.insert(key_string(key), value);
            self.skip_ws();
            match self.bump() {
                Some('}') => return Ok(Value::Object(map)),
                Some(',') => {
                    self.skip_ws();
                    if self.peek() == Some('}') {
                        self.bump();
                        return Ok(Value::Object(map));
                    }
                    key = self.value(depth + 1)?;
                    self.skip_ws();
                }
                Some(found) => {
                    return Err(LiteralError::UnexpectedChar {
                        found,
                        offset: self.pos - found.len_utf8(),
                    });
                }
                None => return Err(LiteralError::UnexpectedEnd),
            }
        }
    }

    fn string(&mut self) -> Result<String, LiteralError> {
        let quote = self.bump().ok_or(LiteralError::UnexpectedEnd)?;
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(LiteralError::UnexpectedEnd),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => out.push(self.escape()?),
                Some(c) => out.push(c),
            }
        }
    }

    fn escape(&mut self) -> Result<char, LiteralError> {
        let c = self.bump().ok_or(LiteralError::UnexpectedEnd)?;
        Ok(match c {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            '0' => '\0',
            '\\' | '\'' | '"' => c,
            'x' => self.hex_escape(2)?,
            'u' => self.hex_escape(4)?,
            'U' => self.hex_escape(8)?,
            other => {
                return Err(LiteralError::Invalid {
                    kind: "escape",
                    text: format!("\\{other}"),
                });
            }
        })
    }

    fn hex_escape(&mut self, digits: usize) -> Result<char, LiteralError> {
        let start = self.pos;
        for _ in 0..digits {
            match self.bump() {
                Some(c) if c.is_ascii_hexdigit() => {}
                Some(_) | None => {
                    return Err(LiteralError::Invalid {
                        kind: "escape",
                        text: self.text[start..self.pos].to_string(),
                    });
                }
            }
        }
        let hex = &self.text[start..self.pos];
        u32::from_str_radix(hex, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| LiteralError::Invalid {
                kind: "escape",
                text: hex.to_string(),
            })
    }

    fn number(&mut self) -> Result<Value, LiteralError> {
        let start = self.pos;
        if matches!(self.peek(), Some('-' | '+')) {
            self.bump();
        }
        let mut is_float = false;
        while let Some(c) = self.peek() {
            match c {
                '0'..='9' | '_' => {}
                '.' => is_float = true,
                'e' | 'E' => {
                    is_float = true;
                    self.bump();
                    if matches!(self.peek(), Some('-' | '+')) {
                        self.bump();
                    }
                    continue;
                }
                _ => break,
            }
            self.bump();
        }

        let raw = &self.text[start..self.pos];
        let cleaned: String = raw.chars().filter(|c| *c != '_' && *c != '+').collect();
        let invalid = || LiteralError::Invalid {
            kind: "number",
            text: raw.to_string(),
        };

        if !is_float {
            if let Ok(n) = cleaned.parse::<i64>() {
                return Ok(Value::Number(n.into()));
            }
            if let Ok(n) = cleaned.parse::<u64>() {
                return Ok(Value::Number(n.into()));
            }
        }
        cleaned
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(invalid)
    }

    fn keyword(&mut self) -> Result<Value, LiteralError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !(c.is_alphanumeric() || c == '_') {
                break;
            }
            self.bump();
        }
        match &self.text[start..self.pos] {
            "True" | "true" => Ok(Value::Bool(true)),
            "False" | "false" => Ok(Value::Bool(false)),
            "None" | "null" => Ok(Value::Null),
            other => Err(LiteralError::NotALiteral(other.to_string())),
        }
    }
}

fn key_string(key: Value) -> String {
    match key {
        Value::String(s) => s,
        other => other.to_string(),
    }
}
