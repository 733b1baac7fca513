//! Errors which can happen in various parts of the library.

use lyon::tessellation::TessellationError;
use thiserror::Error;

use crate::io::message::ChannelError;

/// The tile payload could not be decoded. Fatal for the tile, there is never a partial result.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("tile payload is not a valid vector tile: {0}")]
    Protobuf(String),
    #[error("geometry of feature {feature} in layer {layer} is truncated")]
    TruncatedGeometry { layer: String, feature: usize },
    #[error("unknown geometry command {command} in feature {feature} of layer {layer}")]
    UnknownCommand {
        layer: String,
        feature: usize,
        command: u32,
    },
    #[error("feature {feature} in layer {layer} has an odd number of tags")]
    OddTagCount { layer: String, feature: usize },
    #[error("tag index {index} of feature {feature} in layer {layer} is out of range")]
    TagOutOfRange {
        layer: String,
        feature: usize,
        index: u32,
    },
    #[error("geometry of feature {feature} in layer {layer} leaves the coordinate range")]
    CoordinateOverflow { layer: String, feature: usize },
}

/// A bucket could not be built or updated. The tile keeps its previous buckets.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("resource request {action} failed: {source}")]
    Channel {
        action: &'static str,
        #[source]
        source: ChannelError,
    },
    #[error("image {image} requested by family {family} could not be resolved")]
    UnresolvedImage { family: String, image: String },
    #[error("build was cancelled")]
    Cancelled,
    #[error("tessellation failed: {0}")]
    Tessellation(String),
    #[error("layout of family {0} changed, the bucket must be rebuilt")]
    LayoutChanged(String),
}

impl From<TessellationError> for BuildError {
    fn from(e: TessellationError) -> Self {
        BuildError::Tessellation(format!("{e:?}"))
    }
}

/// An atlas entry is not available yet. The draw of one layer at one tile is skipped for the
/// current frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("image {image} for layer {layer} is not loaded yet")]
pub struct MissingAssetWarning {
    pub layer: String,
    pub image: String,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}
