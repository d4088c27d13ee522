//! Action/observation space descriptions and their channel mapping.
//!
//! A space says what an agent may send or observe; a channel is how it
//! travels. The mapping is lossless through the description handshake:
//! every wrapped channel carries enough annotations to rebuild the space on
//! the other side.

use crate::channel::Channel;
use crate::dtype::Dtype;
use crate::error::{BridgeError, Result};
use crate::shape::{self, ShapeArg};

/// Gym-style space description.
#[derive(Debug, Clone, PartialEq)]
pub enum Space {
    /// `n` distinct actions encoded as a single integer.
    Discrete { n: i64 },
    /// `n` independent bits.
    MultiBinary { n: i64 },
    /// A vector of `shape` discrete components.
    MultiDiscrete { shape: i64 },
    /// A dense array with an element dtype.
    Box {
        shape: Vec<usize>,
        dtype: Option<Dtype>,
    },
}

/// Widest MultiBinary space that still folds into one integer.
const FOLD_LIMIT: i64 = 64;

/// Builds the channel that carries values of `space`.
pub fn channel_for(space: &Space) -> Result<Channel> {
    match space {
        Space::Discrete { n } => {
            let mut channel = Channel::int();
            channel.annotate("n", n);
            channel.annotate("type", "Discrete");
            Ok(channel)
        }
        Space::MultiBinary { n } => {
            if *n < 1 {
                return Err(BridgeError::Protocol(format!("invalid bit count {n}")));
            }
            let mut channel = if *n < FOLD_LIMIT {
                Channel::int_fold(vec![2; *n as usize])?
            } else {
                Channel::np(vec![*n as usize], Dtype::uint8())?
            };
            channel.annotate("n", n);
            channel.annotate("type", "MultiBinary");
            Ok(channel)
        }
        Space::MultiDiscrete { shape } => {
            if *shape < 1 {
                return Err(BridgeError::Protocol(format!("invalid shape {shape}")));
            }
            let mut channel = Channel::np(vec![*shape as usize], Dtype::int64())?;
            channel.annotate("shape", shape);
            channel.annotate("type", "MultiDiscrete");
            Ok(channel)
        }
        Space::Box { shape, dtype } => {
            let mut channel = Channel::np(shape.clone(), (*dtype).unwrap_or_else(Dtype::uint8))?;
            channel.annotate("type", "Box");
            channel.annotate("shape", shape::format_tuple(shape));
            Ok(channel)
        }
    }
}

/// Rebuilds the space behind a channel from its annotations.
pub fn space_for(channel: &Channel) -> Result<Space> {
    let annotation = |key: &str| {
        channel.annotations().get(key).ok_or_else(|| {
            BridgeError::Protocol(format!("channel carries no {key:?} annotation"))
        })
    };
    let numeric = |key: &str| -> Result<i64> {
        let text = annotation(key)?;
        text.parse()
            .map_err(|_| BridgeError::Protocol(format!("bad {key:?} annotation {text:?}")))
    };

    match annotation("type")?.as_str() {
        "Discrete" => Ok(Space::Discrete { n: numeric("n")? }),
        "MultiBinary" => Ok(Space::MultiBinary { n: numeric("n")? }),
        "MultiDiscrete" => Ok(Space::MultiDiscrete {
            shape: numeric("shape")?,
        }),
        "Box" => {
            let text = annotation("shape")?;
            let dims = match shape::parse_args(text)?.as_slice() {
                [ShapeArg::Tuple(dims)] => dims
                    .iter()
                    .map(|&d| usize::try_from(d))
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|_| {
                        BridgeError::Protocol(format!("bad \"shape\" annotation {text:?}"))
                    })?,
                _ => {
                    return Err(BridgeError::Protocol(format!(
                        "bad \"shape\" annotation {text:?}"
                    )))
                }
            };
            Ok(Space::Box {
                shape: dims,
                dtype: channel.dtype(),
            })
        }
        other => Err(BridgeError::Protocol(format!(
            "unknown space type {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(space: &Space) -> Space {
        space_for(&channel_for(space).unwrap()).unwrap()
    }

    #[test]
    fn discrete_round_trips() {
        let space = Space::Discrete { n: 8 };
        let channel = channel_for(&space).unwrap();
        assert_eq!(channel.kind_name(), "int");
        assert_eq!(channel.annotations().get("n").unwrap(), "8");
        assert_eq!(round_trip(&space), space);
    }

    #[test]
    fn narrow_multibinary_folds() {
        let space = Space::MultiBinary { n: 3 };
        let channel = channel_for(&space).unwrap();
        assert_eq!(channel.kind_name(), "int_fold");
        assert_eq!(round_trip(&space), space);
    }

    #[test]
    fn wide_multibinary_maps() {
        let space = Space::MultiBinary { n: 64 };
        let channel = channel_for(&space).unwrap();
        assert_eq!(channel.kind_name(), "np");
        assert_eq!(channel.np_shape(), Some([64].as_slice()));
        assert_eq!(round_trip(&space), space);
    }

    #[test]
    fn multidiscrete_uses_wide_integers() {
        let space = Space::MultiDiscrete { shape: 4 };
        let channel = channel_for(&space).unwrap();
        assert_eq!(channel.dtype(), Some(Dtype::int64()));
        assert_eq!(round_trip(&space), space);
    }

    #[test]
    fn box_keeps_shape_and_dtype() {
        let space = Space::Box {
            shape: vec![84, 84, 3],
            dtype: Some(Dtype::uint8()),
        };
        let channel = channel_for(&space).unwrap();
        assert_eq!(channel.annotations().get("shape").unwrap(), "(84, 84, 3)");
        assert_eq!(round_trip(&space), space);
    }

    #[test]
    fn box_without_dtype_falls_back_to_bytes() {
        let space = Space::Box {
            shape: vec![2],
            dtype: None,
        };
        let channel = channel_for(&space).unwrap();
        assert_eq!(channel.dtype(), Some(Dtype::uint8()));
    }

    #[test]
    fn unannotated_channel_has_no_space() {
        assert!(space_for(&Channel::int()).is_err());
    }
}
