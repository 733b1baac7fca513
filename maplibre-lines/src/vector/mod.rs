//! Vector tile decoding and bucketing.

pub mod bucket;
pub mod builder;
pub mod decoder;
pub mod encoder;
pub mod family;
pub mod tile_store;
pub mod worker;

pub use bucket::{Bucket, TileBuckets};
pub use builder::BucketBuilder;
pub use decoder::{decode_tile, DecodedTile};
pub use family::{LayerFamily, LayerFamilyGrouper};
pub use tile_store::{JobOutcome, TileStore};
pub use worker::TileWorker;
