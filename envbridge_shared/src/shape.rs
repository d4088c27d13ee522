//! Shape descriptor parsing.
//!
//! The description handshake carries channel constructor arguments as short
//! strings. The accepted grammar is deliberately tiny: integer literals,
//! flat tuple literals, and `dtype("<code>")` markers. Anything outside the
//! grammar is rejected as a protocol error rather than evaluated.

use std::fmt;

use crate::dtype::Dtype;
use crate::error::{BridgeError, Result};

/// One parsed constructor argument.
#[derive(Debug, Clone, PartialEq)]
pub enum ShapeArg {
    Int(i64),
    Tuple(Vec<i64>),
    Dtype(Dtype),
}

/// Parses a comma-separated argument list; a trailing comma is allowed.
pub fn parse_args(descriptor: &str) -> Result<Vec<ShapeArg>> {
    let mut cursor = Cursor::new(descriptor);
    let mut args = Vec::new();
    loop {
        cursor.skip_ws();
        if cursor.at_end() {
            break;
        }
        args.push(cursor.parse_expr()?);
        cursor.skip_ws();
        match cursor.bump() {
            Some(b',') => continue,
            None => break,
            Some(other) => return Err(cursor.unexpected(other)),
        }
    }
    if args.is_empty() {
        return Err(BridgeError::Protocol(format!(
            "empty shape descriptor {descriptor:?}"
        )));
    }
    Ok(args)
}

/// Formats dimensions the way Python renders tuples: `(2,)`, `(2, 3)`.
pub fn format_tuple<T: fmt::Display>(items: &[T]) -> String {
    match items {
        [only] => format!("({only},)"),
        _ => {
            let inner: Vec<String> = items.iter().map(T::to_string).collect();
            format!("({})", inner.join(", "))
        }
    }
}

struct Cursor<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek();
        if b.is_some() {
            self.pos += 1;
        }
        b
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ') | Some(b'\t')) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, want: u8) -> Result<()> {
        match self.bump() {
            Some(got) if got == want => Ok(()),
            Some(got) => Err(self.unexpected(got)),
            None => Err(self.truncated()),
        }
    }

    fn unexpected(&self, byte: u8) -> BridgeError {
        BridgeError::Protocol(format!(
            "unexpected {:?} at offset {} in shape descriptor {:?}",
            byte as char,
            self.pos - 1,
            self.src
        ))
    }

    fn truncated(&self) -> BridgeError {
        BridgeError::Protocol(format!("truncated shape descriptor {:?}", self.src))
    }

    fn parse_expr(&mut self) -> Result<ShapeArg> {
        self.skip_ws();
        match self.peek() {
            Some(b'(') => self.parse_tuple(),
            Some(b'0'..=b'9') => Ok(ShapeArg::Int(self.parse_int()?)),
            Some(b'd') => self.parse_dtype(),
            Some(other) => {
                self.pos += 1;
                Err(self.unexpected(other))
            }
            None => Err(self.truncated()),
        }
    }

    fn parse_int(&mut self) -> Result<i64> {
        let start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        self.src[start..self.pos]
            .parse()
            .map_err(|_| BridgeError::Protocol(format!("oversized integer in {:?}", self.src)))
    }

    fn parse_tuple(&mut self) -> Result<ShapeArg> {
        self.expect(b'(')?;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                Some(b')') => {
                    self.pos += 1;
                    break;
                }
                Some(b'0'..=b'9') => items.push(self.parse_int()?),
                Some(other) => {
                    self.pos += 1;
                    return Err(self.unexpected(other));
                }
                None => return Err(self.truncated()),
            }
            self.skip_ws();
            match self.peek() {
                Some(b',') => {
                    self.pos += 1;
                }
                Some(b')') => {
                    self.pos += 1;
                    break;
                }
                Some(other) => {
                    self.pos += 1;
                    return Err(self.unexpected(other));
                }
                None => return Err(self.truncated()),
            }
        }
        Ok(ShapeArg::Tuple(items))
    }

    fn parse_dtype(&mut self) -> Result<ShapeArg> {
        for want in *b"dtype" {
            self.expect(want)?;
        }
        self.expect(b'(')?;
        self.skip_ws();
        self.expect(b'"')?;
        let start = self.pos;
        while !matches!(self.peek(), Some(b'"') | None) {
            self.pos += 1;
        }
        let code = &self.src[start..self.pos];
        self.expect(b'"')?;
        self.skip_ws();
        self.expect(b')')?;
        Ok(ShapeArg::Dtype(Dtype::parse(code)?))
    }
}
