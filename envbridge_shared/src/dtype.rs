//! Element types for memory-mapped array channels.
//!
//! Codes follow the numpy convention the description handshake carries: an
//! optional byte-order prefix (`<`, `>`, `|`, `=`), a kind letter (`u`, `i`,
//! `f`), and the element width in bytes. Malformed codes are protocol
//! errors, never panics.

use bytes::{Buf, BufMut};

use crate::error::{BridgeError, Result};

/// Scalar kind of an array element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtypeKind {
    Uint,
    Int,
    Float,
}

impl DtypeKind {
    fn letter(self) -> char {
        match self {
            Self::Uint => 'u',
            Self::Int => 'i',
            Self::Float => 'f',
        }
    }
}

/// Byte order of a multi-byte element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    fn native() -> Self {
        if cfg!(target_endian = "little") {
            Self::Little
        } else {
            Self::Big
        }
    }
}

/// Parsed element type: kind, width in bytes, byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dtype {
    kind: DtypeKind,
    size: usize,
    endian: Endian,
}

impl Dtype {
    pub fn new(kind: DtypeKind, size: usize, endian: Endian) -> Result<Self> {
        let valid = match kind {
            DtypeKind::Uint | DtypeKind::Int => matches!(size, 1 | 2 | 4 | 8),
            DtypeKind::Float => matches!(size, 4 | 8),
        };
        if !valid {
            return Err(BridgeError::Protocol(format!(
                "invalid dtype width {size} for kind {}",
                kind.letter()
            )));
        }
        Ok(Self { kind, size, endian })
    }

    /// Native-endian unsigned byte, numpy `|u1`.
    pub fn uint8() -> Self {
        Self {
            kind: DtypeKind::Uint,
            size: 1,
            endian: Endian::native(),
        }
    }

    /// Native-endian 64-bit signed integer.
    pub fn int64() -> Self {
        Self {
            kind: DtypeKind::Int,
            size: 8,
            endian: Endian::native(),
        }
    }

    pub fn kind(&self) -> DtypeKind {
        self.kind
    }

    pub fn element_size(&self) -> usize {
        self.size
    }

    /// Parses a numpy-style code such as `<u2`, `>i8`, `|u1`, or `f4`.
    pub fn parse(code: &str) -> Result<Self> {
        let bad = || BridgeError::Protocol(format!("malformed dtype code {code:?}"));
        let mut chars = code.chars().peekable();
        let endian = match chars.peek() {
            Some('<') => {
                chars.next();
                Some(Endian::Little)
            }
            Some('>') => {
                chars.next();
                Some(Endian::Big)
            }
            Some('|') | Some('=') => {
                chars.next();
                None
            }
            _ => None,
        };
        let kind = match chars.next() {
            Some('u') => DtypeKind::Uint,
            Some('i') => DtypeKind::Int,
            Some('f') => DtypeKind::Float,
            _ => return Err(bad()),
        };
        let digits: String = chars.collect();
        if digits.is_empty() {
            return Err(bad());
        }
        let size: usize = digits.parse().map_err(|_| bad())?;
        if code.starts_with('|') && size != 1 {
            return Err(bad());
        }
        Self::new(kind, size, endian.unwrap_or_else(Endian::native))
    }

    /// Canonical code: `|u1` for single-byte elements, explicit `<`/`>`
    /// otherwise.
    pub fn code(&self) -> String {
        if self.size == 1 {
            format!("|{}1", self.kind.letter())
        } else {
            let order = match self.endian {
                Endian::Little => '<',
                Endian::Big => '>',
            };
            format!("{order}{}{}", self.kind.letter(), self.size)
        }
    }

    /// Encodes logical integers into this dtype's byte representation.
    pub fn encode_ints(&self, values: &[i64]) -> Result<Vec<u8>> {
        if self.kind == DtypeKind::Float {
            return Err(BridgeError::Protocol(format!(
                "dtype {} does not hold integers",
                self.code()
            )));
        }
        let mut out = Vec::with_capacity(values.len() * self.size);
        for &v in values {
            match (self.kind, self.endian) {
                (DtypeKind::Uint, Endian::Little) => out.put_uint_le(v as u64, self.size),
                (DtypeKind::Uint, Endian::Big) => out.put_uint(v as u64, self.size),
                (DtypeKind::Int, Endian::Little) => out.put_int_le(v, self.size),
                (DtypeKind::Int, Endian::Big) => out.put_int(v, self.size),
                (DtypeKind::Float, _) => unreachable!(),
            }
        }
        Ok(out)
    }

    /// Decodes this dtype's byte representation into logical integers.
    pub fn decode_ints(&self, bytes: &[u8]) -> Result<Vec<i64>> {
        if self.kind == DtypeKind::Float {
            return Err(BridgeError::Protocol(format!(
                "dtype {} does not hold integers",
                self.code()
            )));
        }
        if bytes.len() % self.size != 0 {
            return Err(BridgeError::Protocol(format!(
                "byte length {} is not a multiple of element width {}",
                bytes.len(),
                self.size
            )));
        }
        let mut buf = bytes;
        let mut out = Vec::with_capacity(bytes.len() / self.size);
        while buf.has_remaining() {
            let v = match (self.kind, self.endian) {
                (DtypeKind::Uint, Endian::Little) => buf.get_uint_le(self.size) as i64,
                (DtypeKind::Uint, Endian::Big) => buf.get_uint(self.size) as i64,
                (DtypeKind::Int, Endian::Little) => buf.get_int_le(self.size),
                (DtypeKind::Int, Endian::Big) => buf.get_int(self.size),
                (DtypeKind::Float, _) => unreachable!(),
            };
            out.push(v);
        }
        Ok(out)
    }
}
