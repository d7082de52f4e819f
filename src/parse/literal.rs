//! Permissive parser for Python-literal-style objects.
//!
//! Judge and extractor models often answer with `{'score': 'YES'}`,
//! `True`/`False`/`None`, tuples, or trailing commas. This accepts that
//! subset and maps it onto `serde_json::Value`:
//! - dicts with string, number, bool or None keys (keys are stringified)
//! - lists and tuples (both become arrays)
//! - single- or double-quoted strings with the usual escapes, adjacent
//!   literals concatenated
//! - ints and floats, `True`, `False`, `None`

use serde_json::{Map, Number, Value};

/// Deepest container nesting accepted, matching `serde_json`'s limit.
const MAX_DEPTH: usize = 128;

/// Parse `src` as a single literal. Trailing garbage is a failure.
pub fn parse(src: &str) -> Option<Value> {
    let mut cursor = Cursor {
        src,
        pos: 0,
        depth: 0,
    };
    let value = cursor.value()?;
    cursor.skip_ws();
    if cursor.pos == src.len() {
        Some(value)
    } else {
        None
    }
}

struct Cursor<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
}

impl Cursor<'_> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn value(&mut self) -> Option<Value> {
        self.skip_ws();
        match self.peek()? {
            c @ ('{' | '[' | '(') => self.nested(c),
            '\'' | '"' => self.strings().map(Value::String),
            c if c == '-' || c == '+' || c == '.' || c.is_ascii_digit() => self.number(),
            c if c.is_alphabetic() => self.keyword(),
            _ => None,
        }
    }

    fn nested(&mut self, open: char) -> Option<Value> {
        if self.depth >= MAX_DEPTH {
            return None;
        }
        self.depth += 1;
        let value = match open {
            '{' => self.dict(),
            '[' => self.sequence('[', ']').map(Value::Array),
            _ => self.tuple(),
        };
        self.depth -= 1;
        value
    }

    fn dict(&mut self) -> Option<Value> {
        self.bump();
        let mut map = Map::new();
        loop {
            self.skip_ws();
            if self.eat('}') {
                return Some(Value::Object(map));
            }
            let key = match self.value()? {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(true) => "True".to_string(),
                Value::Bool(false) => "False".to_string(),
                Value::Null => "None".to_string(),
                _ => return None,
            };
            self.skip_ws();
            if !self.eat(':') {
                return None;
            }
            let value = self.value()?;
            map.insert(key, value);
            self.skip_ws();
            if self.eat(',') {
                continue;
            }
            self.skip_ws();
            return self.eat('}').then_some(Value::Object(map));
        }
    }

    fn sequence(&mut self, open: char, close: char) -> Option<Vec<Value>> {
        if !self.eat(open) {
            return None;
        }
        self.items(close, Vec::new())
    }

    /// Remaining items up to `close`, after an opening bracket or a comma.
    fn items(&mut self, close: char, mut items: Vec<Value>) -> Option<Vec<Value>> {
        loop {
            self.skip_ws();
            if self.eat(close) {
                return Some(items);
            }
            items.push(self.value()?);
            self.skip_ws();
            if self.eat(',') {
                continue;
            }
            self.skip_ws();
            return self.eat(close).then_some(items);
        }
    }

    /// `(x)` is a parenthesized value, `(x,)` and `(x, y)` are tuples.
    fn tuple(&mut self) -> Option<Value> {
        self.bump();
        self.skip_ws();
        if self.eat(')') {
            return Some(Value::Array(Vec::new()));
        }
        let first = self.value()?;
        self.skip_ws();
        if self.eat(')') {
            return Some(first);
        }
        if !self.eat(',') {
            return None;
        }
        self.items(')', vec![first]).map(Value::Array)
    }

    fn strings(&mut self) -> Option<String> {
        let mut out = self.string()?;
        loop {
            let save = self.pos;
            self.skip_ws();
            match self.peek() {
                Some('\'' | '"') => out.push_str(&self.string()?),
                _ => {
                    self.pos = save;
                    return Some(out);
                }
            }
        }
    }

    fn string(&mut self) -> Option<String> {
        let quote = self.bump()?;
        let mut out = String::new();
        loop {
            match self.bump()? {
                c if c == quote => return Some(out),
                '\n' => return None,
                '\\' => match self.bump()? {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    '0' => out.push('\0'),
                    '\n' => {}
                    'x' => out.push(self.hex_escape(2)?),
                    'u' => out.push(self.hex_escape(4)?),
                    c @ ('\\' | '\'' | '"') => out.push(c),
                    other => {
                        out.push('\\');
                        out.push(other);
                    }
                },
                c => out.push(c),
            }
        }
    }

    fn hex_escape(&mut self, digits: usize) -> Option<char> {
        let end = self.pos.checked_add(digits)?;
        let hex = self.src.get(self.pos..end)?;
        let code = u32::from_str_radix(hex, 16).ok()?;
        self.pos = end;
        char::from_u32(code)
    }

    fn number(&mut self) -> Option<Value> {
        let start = self.pos;
        if matches!(self.peek(), Some('-' | '+')) {
            self.bump();
        }
        let mut is_float = false;
        while let Some(c) = self.peek() {
            match c {
                '0'..='9' => {}
                '.' | 'e' | 'E' => is_float = true,
                '-' | '+' if matches!(self.src[..self.pos].chars().last(), Some('e' | 'E')) => {}
                _ => break,
            }
            self.bump();
        }
        let text = self.src[start..self.pos].trim_start_matches('+');
        if !is_float {
            if let Ok(n) = text.parse::<i64>() {
                return Some(Value::Number(n.into()));
            }
        }
        let f = text.parse::<f64>().ok()?;
        Number::from_f64(f).map(Value::Number)
    }

    fn keyword(&mut self) -> Option<Value> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            self.bump();
        }
        match &self.src[start..self.pos] {
            "True" => Some(Value::Bool(true)),
            "False" => Some(Value::Bool(false)),
            "None" => Some(Value::Null),
            _ => None,
        }
    }
}
