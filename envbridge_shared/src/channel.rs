//! Typed channels and their codecs.
//!
//! A channel is a named endpoint with a declared kind, a dirty flag, and a
//! kind-specific value representation. Scalar kinds travel over the socket
//! as JSON; `np` kinds live in a shared memory map and the socket carries
//! only a presence marker.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::Path;

use memmap2::MmapMut;
use serde_json::{Number, Value as Json};

use crate::dtype::Dtype;
use crate::error::{BridgeError, Result};
use crate::shape::{self, ShapeArg};
use crate::wire::ChannelDesc;

/// Externally visible channel value.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Vector form of `int_fold` channels and integer `np` arrays.
    IntVec(Vec<i64>),
    /// Raw contents of an `np` channel.
    Bytes(Vec<u8>),
}

impl ChannelValue {
    fn kind_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Bool(_) => "bool",
            Self::IntVec(_) => "int vector",
            Self::Bytes(_) => "bytes",
        }
    }
}

/// Packed-integer state: a vector of bounded components folded into one
/// integer with mixed-radix strides.
#[derive(Debug)]
pub struct IntFold {
    folds: Vec<i64>,
    value: Option<i64>,
}

impl IntFold {
    fn parse(&self, components: &[i64]) -> Result<i64> {
        if components.len() != self.folds.len() {
            return Err(BridgeError::Protocol(format!(
                "fold vector has {} components, channel holds {}",
                components.len(),
                self.folds.len()
            )));
        }
        let mut folded = 0i64;
        let mut stride = 1i64;
        for (&v, &fold) in components.iter().zip(&self.folds) {
            folded += v.rem_euclid(fold) * stride;
            stride *= fold;
        }
        Ok(folded)
    }

    fn unparse(&self, value: i64) -> Vec<i64> {
        let mut stride = 1i64;
        self.folds
            .iter()
            .map(|&fold| {
                let component = (value / stride).rem_euclid(fold);
                stride *= fold;
                component
            })
            .collect()
    }
}

/// Dense array state backed by a shared memory map.
#[derive(Debug)]
pub struct NpArray {
    shape: Vec<usize>,
    dtype: Dtype,
    byte_len: usize,
    map: Option<MmapMut>,
}

impl NpArray {
    fn bind(&mut self, path: &Path) -> Result<()> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        file.set_len(self.byte_len as u64)?;
        // Safety: both sides size the file before mapping and never truncate
        // it while the map is alive.
        let map = unsafe { MmapMut::map_mut(&file)? };
        self.map = Some(map);
        Ok(())
    }

    fn copy_from(&mut self, bytes: &[u8]) -> Result<()> {
        let map = self
            .map
            .as_mut()
            .ok_or_else(|| BridgeError::Protocol("array channel is not mapped".to_string()))?;
        if bytes.len() != map.len() {
            return Err(BridgeError::Protocol(format!(
                "array payload is {} bytes, channel holds {}",
                bytes.len(),
                map.len()
            )));
        }
        map.copy_from_slice(bytes);
        Ok(())
    }
}

/// Per-kind channel state.
#[derive(Debug)]
pub enum ChannelKind {
    Int(Option<i64>),
    Float(Option<f64>),
    Bool(Option<bool>),
    IntFold(IntFold),
    Np(NpArray),
}

/// A named typed endpoint shared by both processes.
#[derive(Debug)]
pub struct Channel {
    kind: ChannelKind,
    dirty: bool,
    annotations: BTreeMap<String, String>,
}

impl Channel {
    fn with_kind(kind: ChannelKind) -> Self {
        Self {
            kind,
            dirty: false,
            annotations: BTreeMap::new(),
        }
    }

    /// Signed integer scalar.
    pub fn int() -> Self {
        Self::with_kind(ChannelKind::Int(None))
    }

    /// Floating-point scalar.
    pub fn float() -> Self {
        Self::with_kind(ChannelKind::Float(None))
    }

    /// Boolean scalar.
    pub fn bool() -> Self {
        Self::with_kind(ChannelKind::Bool(None))
    }

    /// Packed vector of small non-negative integers, each bounded by the
    /// matching fold.
    pub fn int_fold(folds: Vec<i64>) -> Result<Self> {
        if folds.is_empty() || folds.iter().any(|&f| f < 1) {
            return Err(BridgeError::Protocol(format!(
                "invalid fold vector {folds:?}"
            )));
        }
        Ok(Self::with_kind(ChannelKind::IntFold(IntFold {
            folds,
            value: None,
        })))
    }

    /// Dense array with a shape and element dtype, backed by a memory map
    /// once bound.
    pub fn np(shape: Vec<usize>, dtype: Dtype) -> Result<Self> {
        let elements = shape
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .filter(|&n| n > 0)
            .ok_or_else(|| BridgeError::Protocol(format!("invalid array shape {shape:?}")))?;
        let byte_len = elements
            .checked_mul(dtype.element_size())
            .ok_or_else(|| BridgeError::Protocol(format!("invalid array shape {shape:?}")))?;
        Ok(Self::with_kind(ChannelKind::Np(NpArray {
            shape,
            dtype,
            byte_len,
            map: None,
        })))
    }

    /// Reconstructs a channel from a description triple.
    pub fn make(
        kind: &str,
        descriptor: Option<&str>,
        annotations: &BTreeMap<String, String>,
    ) -> Result<Self> {
        let mut channel = match (kind, descriptor) {
            ("int", None) => Self::int(),
            ("float", None) => Self::float(),
            ("bool", None) => Self::bool(),
            ("int_fold", Some(descriptor)) => match shape::parse_args(descriptor)?.as_slice() {
                [ShapeArg::Tuple(folds)] => Self::int_fold(folds.clone())?,
                _ => return Err(bad_descriptor(kind, descriptor)),
            },
            ("np", Some(descriptor)) => match shape::parse_args(descriptor)?.as_slice() {
                [ShapeArg::Tuple(dims), ShapeArg::Dtype(dtype)] => {
                    let shape = dims
                        .iter()
                        .map(|&d| usize::try_from(d))
                        .collect::<std::result::Result<Vec<_>, _>>()
                        .map_err(|_| bad_descriptor(kind, descriptor))?;
                    Self::np(shape, *dtype)?
                }
                _ => return Err(bad_descriptor(kind, descriptor)),
            },
            ("int", Some(_)) | ("float", Some(_)) | ("bool", Some(_)) => {
                return Err(BridgeError::Protocol(format!(
                    "scalar channel kind {kind} carries a shape descriptor"
                )))
            }
            ("int_fold", None) | ("np", None) => {
                return Err(BridgeError::Protocol(format!(
                    "channel kind {kind} requires a shape descriptor"
                )))
            }
            (other, _) => {
                return Err(BridgeError::Protocol(format!(
                    "unknown channel kind {other:?}"
                )))
            }
        };
        for (key, value) in annotations {
            channel.annotate(key, value);
        }
        Ok(channel)
    }

    /// Kind tag used in channel descriptions.
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            ChannelKind::Int(_) => "int",
            ChannelKind::Float(_) => "float",
            ChannelKind::Bool(_) => "bool",
            ChannelKind::IntFold(_) => "int_fold",
            ChannelKind::Np(_) => "np",
        }
    }

    /// Constructor arguments in descriptor form; `None` for scalar kinds.
    pub fn shape_descriptor(&self) -> Option<String> {
        match &self.kind {
            ChannelKind::Int(_) | ChannelKind::Float(_) | ChannelKind::Bool(_) => None,
            ChannelKind::IntFold(fold) => Some(format!("{},", shape::format_tuple(&fold.folds))),
            ChannelKind::Np(array) => Some(format!(
                "{}, dtype(\"{}\")",
                shape::format_tuple(&array.shape),
                array.dtype.code()
            )),
        }
    }

    /// Description triple for the handshake.
    pub fn describe(&self) -> ChannelDesc {
        ChannelDesc(
            self.kind_name().to_string(),
            self.shape_descriptor(),
            self.annotations.clone(),
        )
    }

    pub fn annotate(&mut self, key: impl ToString, value: impl ToString) {
        self.annotations.insert(key.to_string(), value.to_string());
    }

    pub fn annotations(&self) -> &BTreeMap<String, String> {
        &self.annotations
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// True once an `np` channel has a live memory map.
    pub fn is_mapped(&self) -> bool {
        matches!(&self.kind, ChannelKind::Np(array) if array.map.is_some())
    }

    /// Element dtype of an `np` channel.
    pub fn dtype(&self) -> Option<Dtype> {
        match &self.kind {
            ChannelKind::Np(array) => Some(array.dtype),
            _ => None,
        }
    }

    /// Shape of an `np` channel.
    pub fn np_shape(&self) -> Option<&[usize]> {
        match &self.kind {
            ChannelKind::Np(array) => Some(&array.shape),
            _ => None,
        }
    }

    /// Borrowed view of an `np` channel's mapped region.
    pub fn np_bytes(&self) -> Option<&[u8]> {
        match &self.kind {
            ChannelKind::Np(array) => array.map.as_deref(),
            _ => None,
        }
    }

    /// Opens the backing file under the rendezvous directory. A no-op for
    /// every kind except `np`, which sizes and maps the file.
    pub fn bind_backing(&mut self, path: &Path) -> Result<()> {
        match &mut self.kind {
            ChannelKind::Np(array) => array.bind(path),
            _ => Ok(()),
        }
    }

    /// Coerces `value` into the internal representation and marks the
    /// channel dirty.
    pub fn set_value(&mut self, value: ChannelValue) -> Result<()> {
        let kind_name = self.kind_name();
        match (&mut self.kind, value) {
            (ChannelKind::Int(slot), ChannelValue::Int(v)) => *slot = Some(v),
            (ChannelKind::Int(slot), ChannelValue::Float(v)) => *slot = Some(v as i64),
            (ChannelKind::Float(slot), ChannelValue::Float(v)) => *slot = Some(v),
            (ChannelKind::Float(slot), ChannelValue::Int(v)) => *slot = Some(v as f64),
            (ChannelKind::Bool(slot), ChannelValue::Bool(v)) => *slot = Some(v),
            (ChannelKind::IntFold(fold), ChannelValue::IntVec(components)) => {
                fold.value = Some(fold.parse(&components)?);
            }
            (ChannelKind::Np(array), ChannelValue::Bytes(bytes)) => array.copy_from(&bytes)?,
            (ChannelKind::Np(array), ChannelValue::IntVec(values)) => {
                let bytes = array.dtype.encode_ints(&values)?;
                array.copy_from(&bytes)?;
            }
            (_, other) => {
                return Err(BridgeError::Protocol(format!(
                    "cannot store {} in {kind_name} channel",
                    other.kind_name()
                )))
            }
        }
        self.dirty = true;
        Ok(())
    }

    /// Externally visible value; `None` until first write (scalar and fold
    /// kinds) or until the backing map is bound (`np`).
    pub fn value(&self) -> Option<ChannelValue> {
        match &self.kind {
            ChannelKind::Int(v) => v.map(ChannelValue::Int),
            ChannelKind::Float(v) => v.map(ChannelValue::Float),
            ChannelKind::Bool(v) => v.map(ChannelValue::Bool),
            ChannelKind::IntFold(fold) => fold
                .value
                .map(|folded| ChannelValue::IntVec(fold.unparse(folded))),
            ChannelKind::Np(array) => array
                .map
                .as_ref()
                .map(|map| ChannelValue::Bytes(map.to_vec())),
        }
    }

    /// On-wire payload. `np` channels serialize a bare presence marker; the
    /// data travels through the memory map.
    pub fn serialize(&self) -> Result<Json> {
        let unset = || BridgeError::Protocol("serialized a channel that was never set".to_string());
        match &self.kind {
            ChannelKind::Int(v) => Ok(Json::from(v.ok_or_else(unset)?)),
            ChannelKind::Float(v) => {
                let v = v.ok_or_else(unset)?;
                let number = Number::from_f64(v).ok_or_else(|| {
                    BridgeError::Protocol(format!("non-finite float {v} is not serializable"))
                })?;
                Ok(Json::Number(number))
            }
            ChannelKind::Bool(v) => Ok(Json::Bool(v.ok_or_else(unset)?)),
            ChannelKind::IntFold(fold) => Ok(Json::from(fold.value.ok_or_else(unset)?)),
            ChannelKind::Np(_) => Ok(Json::Bool(true)),
        }
    }

    /// Applies an incoming payload and clears the dirty flag.
    pub fn deserialize(&mut self, payload: &Json) -> Result<()> {
        match &mut self.kind {
            ChannelKind::Int(slot) => *slot = Some(json_int(payload)?),
            ChannelKind::Float(slot) => {
                *slot = Some(payload.as_f64().ok_or_else(|| type_error("number", payload))?);
            }
            ChannelKind::Bool(slot) => {
                *slot = Some(payload.as_bool().ok_or_else(|| type_error("bool", payload))?);
            }
            ChannelKind::IntFold(fold) => fold.value = Some(json_int(payload)?),
            ChannelKind::Np(_) => {}
        }
        self.dirty = false;
        Ok(())
    }
}

fn bad_descriptor(kind: &str, descriptor: &str) -> BridgeError {
    BridgeError::Protocol(format!(
        "descriptor {descriptor:?} does not fit channel kind {kind}"
    ))
}

fn type_error(want: &str, payload: &Json) -> BridgeError {
    BridgeError::Protocol(format!("expected {want} payload, got {payload}"))
}

fn json_int(payload: &Json) -> Result<i64> {
    payload
        .as_i64()
        .or_else(|| payload.as_f64().map(|f| f as i64))
        .ok_or_else(|| type_error("integer", payload))
}
