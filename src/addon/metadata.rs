//! `bl_info` extraction.
//!
//! The block is located with a regex and then read by a small parser for
//! Python literals (strings, numbers, booleans, `None`, tuples, lists and
//! dicts). Anything the parser does not understand means "no metadata";
//! errors never escape this module.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::version::LooseVersion;

#[allow(clippy::expect_used)]
static BL_INFO_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bbl_info\s*=\s*\{").expect("bl_info pattern compiles"));

/// Metadata declared by an addon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonInfo {
    /// Display name.
    pub name: String,
    /// Addon version.
    pub version: LooseVersion,
    /// Minimum supported Blender version.
    pub blender_version_min: Option<LooseVersion>,
    /// Short description.
    pub description: Option<String>,
}

impl AddonInfo {
    /// Parses the `bl_info` block of a Python source.
    #[must_use]
    pub fn parse(source: &str) -> Option<Self> {
        let (start, _) = block_span(source)?;
        let mut parser = Parser::new(source, start);
        let PyValue::Dict(entries) = parser.value().ok()? else {
            return None;
        };
        Self::from_entries(&entries)
    }

    /// Reads and parses a Python file. Unreadable files have no metadata.
    #[must_use]
    pub fn from_file(path: &Path) -> Option<Self> {
        let bytes = std::fs::read(path).ok()?;
        Self::parse(&String::from_utf8_lossy(&bytes))
    }

    fn from_entries(entries: &[(PyValue, PyValue)]) -> Option<Self> {
        // First occurrence of a key wins.
        let get = |key: &str| {
            entries
                .iter()
                .find(|(k, _)| matches!(k, PyValue::Str(s) if s == key))
                .map(|(_, v)| v)
        };

        let name = match get("name")? {
            PyValue::Str(s) if !s.trim().is_empty() => s.trim().to_string(),
            _ => return None,
        };
        let version = get("version").and_then(PyValue::as_version)?;
        let blender_version_min = get("blender").and_then(PyValue::as_version);
        let description = match get("description") {
            Some(PyValue::Str(s)) => Some(s.clone()),
            _ => None,
        };

        Some(Self {
            name,
            version,
            blender_version_min,
            description,
        })
    }
}

/// Returns the byte span of the `{...}` literal assigned to `bl_info`.
#[must_use]
pub fn block_span(source: &str) -> Option<(usize, usize)> {
    let m = BL_INFO_START.find(source)?;
    let open = m.end() - 1;
    let mut parser = Parser::new(source, open);
    parser.value().ok()?;
    Some((open, parser.pos))
}

/// Returns the full `bl_info = {...}` statement text.
#[must_use]
pub fn info_block(source: &str) -> Option<&str> {
    let m = BL_INFO_START.find(source)?;
    let (_, end) = block_span(source)?;
    source.get(m.start()..end)
}

#[derive(Debug, Clone, PartialEq)]
enum PyValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    None,
    Seq(Vec<PyValue>),
    Dict(Vec<(PyValue, PyValue)>),
}

impl PyValue {
    fn as_version(&self) -> Option<LooseVersion> {
        match self {
            Self::Seq(items) => {
                let parts = items
                    .iter()
                    .map(|item| match item {
                        Self::Int(n) => u64::try_from(*n).ok(),
                        _ => None,
                    })
                    .collect::<Option<Vec<_>>>()?;
                LooseVersion::from_release(&parts)
            }
            Self::Str(s) => LooseVersion::parse(s),
            Self::Int(n) => LooseVersion::from_release(&[u64::try_from(*n).ok()?]),
            _ => None,
        }
    }
}

type ParseResult<T> = Result<T, String>;

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str, pos: usize) -> Self {
        Self { src, pos }
    }

    fn peek(&self) -> Option<char> {
        self.src.get(self.pos..)?.chars().next()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.src.get(self.pos..)?.chars().nth(offset)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn rest_starts_with(&self, s: &str) -> bool {
        self.src.get(self.pos..).is_some_and(|rest| rest.starts_with(s))
    }

    fn skip_trivia(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
            } else if c == '#' {
                while let Some(c) = self.bump() {
                    if c == '\n' {
                        break;
                    }
                }
            } else if c == '\\' && matches!(self.peek_at(1), Some('\n' | '\r')) {
                self.bump();
                self.bump();
            } else {
                break;
            }
        }
    }

    fn expect(&mut self, wanted: char) -> ParseResult<()> {
        self.skip_trivia();
        match self.bump() {
            Some(c) if c == wanted => Ok(()),
            other => Err(format!("expected '{}', found {:?}", wanted, other)),
        }
    }

    fn value(&mut self) -> ParseResult<PyValue> {
        self.skip_trivia();
        match self.peek() {
            Some('{') => self.dict(),
            Some('[') => self.sequence('[', ']').map(|(items, _)| PyValue::Seq(items)),
            Some('(') => self.paren(),
            Some(c) if c == '"' || c == '\'' || self.at_string_prefix() => self.strings(),
            Some(c) if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => self.number(),
            Some(c) if c.is_alphabetic() || c == '_' => self.keyword(),
            other => Err(format!("unexpected {:?}", other)),
        }
    }

    fn dict(&mut self) -> ParseResult<PyValue> {
        self.expect('{')?;
        let mut entries = Vec::new();
        loop {
            self.skip_trivia();
            if self.peek() == Some('}') {
                self.bump();
                return Ok(PyValue::Dict(entries));
            }
            let key = self.value()?;
            self.expect(':')?;
            let value = self.value()?;
            entries.push((key, value));
            self.skip_trivia();
            match self.bump() {
                Some(',') => {}
                Some('}') => return Ok(PyValue::Dict(entries)),
                other => return Err(format!("expected ',' or '}}', found {:?}", other)),
            }
        }
    }

    /// Parses a bracketed sequence. The flag reports a trailing comma.
    fn sequence(&mut self, open: char, close: char) -> ParseResult<(Vec<PyValue>, bool)> {
        self.expect(open)?;
        let mut items = Vec::new();
        let mut trailing_comma = false;
        loop {
            self.skip_trivia();
            if self.peek() == Some(close) {
                self.bump();
                return Ok((items, trailing_comma));
            }
            items.push(self.value()?);
            trailing_comma = false;
            self.skip_trivia();
            match self.bump() {
                Some(',') => trailing_comma = true,
                Some(c) if c == close => return Ok((items, false)),
                other => return Err(format!("expected ',' or '{}', found {:?}", close, other)),
            }
        }
    }

    fn paren(&mut self) -> ParseResult<PyValue> {
        let (mut items, trailing_comma) = self.sequence('(', ')')?;
        // `(x)` is just x; `(x,)` and `(x, y)` are tuples.
        if items.len() == 1 && !trailing_comma {
            return Ok(items.remove(0));
        }
        Ok(PyValue::Seq(items))
    }

    fn at_string_prefix(&self) -> bool {
        let mut offset = 0;
        while let Some(c) = self.peek_at(offset) {
            match c.to_ascii_lowercase() {
                'r' | 'b' | 'u' | 'f' if offset < 2 => offset += 1,
                '"' | '\'' => return offset > 0,
                _ => return false,
            }
        }
        false
    }

    /// Parses one or more adjacent string literals and concatenates them.
    fn strings(&mut self) -> ParseResult<PyValue> {
        let mut out = self.string()?;
        loop {
            self.skip_trivia();
            match self.peek() {
                Some('"' | '\'') => out.push_str(&self.string()?),
                Some(_) if self.at_string_prefix() => out.push_str(&self.string()?),
                _ => return Ok(PyValue::Str(out)),
            }
        }
    }

    fn string(&mut self) -> ParseResult<String> {
        let mut raw = false;
        while let Some(c) = self.peek() {
            match c.to_ascii_lowercase() {
                'r' => {
                    raw = true;
                    self.bump();
                }
                'b' | 'u' | 'f' => {
                    self.bump();
                }
                _ => break,
            }
        }

        let quote = self.bump().ok_or("unterminated string")?;
        let triple = self.peek() == Some(quote) && self.peek_at(1) == Some(quote);
        if triple {
            self.bump();
            self.bump();
        }
        let closing: String = std::iter::repeat_n(quote, if triple { 3 } else { 1 }).collect();

        let mut out = String::new();
        loop {
            if self.rest_starts_with(&closing) {
                for _ in 0..closing.len() {
                    self.bump();
                }
                return Ok(out);
            }
            let c = self.bump().ok_or("unterminated string")?;
            match c {
                '\n' if !triple => return Err("newline in string".to_string()),
                '\\' if raw => {
                    out.push('\\');
                    if let Some(next) = self.bump() {
                        out.push(next);
                    }
                }
                '\\' => self.escape(&mut out)?,
                _ => out.push(c),
            }
        }
    }

    fn escape(&mut self, out: &mut String) -> ParseResult<()> {
        let c = self.bump().ok_or("unterminated escape")?;
        match c {
            '\n' => {}
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            '\\' | '\'' | '"' => out.push(c),
            'x' => out.push(self.hex_char(2)?),
            'u' => out.push(self.hex_char(4)?),
            'U' => out.push(self.hex_char(8)?),
            other => {
                out.push('\\');
                out.push(other);
            }
        }
        Ok(())
    }

    fn hex_char(&mut self, digits: usize) -> ParseResult<char> {
        let start = self.pos;
        for _ in 0..digits {
            match self.bump() {
                Some(c) if c.is_ascii_hexdigit() => {}
                _ => return Err("bad hex escape".to_string()),
            }
        }
        let code = u32::from_str_radix(&self.src[start..self.pos], 16).map_err(|e| e.to_string())?;
        char::from_u32(code).ok_or_else(|| "invalid code point".to_string())
    }

    fn number(&mut self) -> ParseResult<PyValue> {
        let start = self.pos;
        if matches!(self.peek(), Some('-' | '+')) {
            self.bump();
            self.skip_trivia();
        }
        let digits_start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                self.bump();
            } else {
                break;
            }
        }
        let negative = self.src[start..digits_start].contains('-');
        let text: String = self.src[digits_start..self.pos]
            .chars()
            .filter(|&c| c != '_')
            .collect();
        if text.is_empty() {
            return Err("empty number".to_string());
        }

        let lower = text.to_ascii_lowercase();
        let int = if let Some(hex) = lower.strip_prefix("0x") {
            i64::from_str_radix(hex, 16).ok()
        } else if let Some(oct) = lower.strip_prefix("0o") {
            i64::from_str_radix(oct, 8).ok()
        } else if let Some(bin) = lower.strip_prefix("0b") {
            i64::from_str_radix(bin, 2).ok()
        } else {
            lower.parse::<i64>().ok()
        };
        if let Some(n) = int {
            return Ok(PyValue::Int(if negative { -n } else { n }));
        }
        let float: f64 = lower.parse().map_err(|_| format!("bad number {}", text))?;
        Ok(PyValue::Float(if negative { -float } else { float }))
    }

    fn keyword(&mut self) -> ParseResult<PyValue> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                self.bump();
            } else {
                break;
            }
        }
        match &self.src[start..self.pos] {
            "True" => Ok(PyValue::Bool(true)),
            "False" => Ok(PyValue::Bool(false)),
            "None" => Ok(PyValue::None),
            other => Err(format!("unsupported expression {}", other)),
        }
    }
}
