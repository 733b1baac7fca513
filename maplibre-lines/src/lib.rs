//! # maplibre-lines
//!
//! Turns vector tiles into GPU-ready buckets and draws their line layers.
//!
//! Tiles are decoded with [`vector::decode_tile`], style layers are grouped into families which
//! share tessellated geometry, and [`vector::BucketBuilder`] produces one bucket per family. A
//! paint change only regenerates the paint buffers of a bucket, the layout buffers produced by the
//! build are reused as they are. [`render::LineRenderer`] selects the line program of each layer
//! and issues one draw call per buffer group and visible tile.
//!
//! ### Example
//!
//! ```no_run
//! # async fn example(payload: Vec<u8>, style_json: &str) -> Result<(), maplibre_lines::error::Error> {
//! use std::sync::Arc;
//!
//! use maplibre_lines::{
//!     coords::{WorldTileCoords, ZoomLevel},
//!     io::channel,
//!     settings::PipelineSettings,
//!     style::StyleLayerSet,
//!     vector::{decode_tile, BucketBuilder, LayerFamilyGrouper},
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! let style = StyleLayerSet::from_json(style_json).expect("invalid style");
//! let families = LayerFamilyGrouper::global().group(&style);
//! let (channel, _endpoint) = channel();
//! let builder = BucketBuilder::new(Arc::new(channel), PipelineSettings::default());
//!
//! let tile = decode_tile(&payload)?;
//! let coords = WorldTileCoords::from((0, 0, ZoomLevel::default()));
//! let buckets = builder
//!     .build(coords, &tile, &families, &CancellationToken::new())
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod coords;
pub mod error;
pub mod io;
pub mod render;
pub mod settings;
pub mod style;
pub mod tessellation;
pub mod vector;
