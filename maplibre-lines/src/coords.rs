//! Provides utilities related to coordinates.

use std::{
    fmt,
    fmt::{Display, Formatter},
};

use cgmath::{Matrix4, Vector3};
use serde::{Deserialize, Serialize};

/// Default extent of a vector tile layer, in tile units.
pub const EXTENT_UINT: u32 = 4096;
pub const EXTENT: f64 = EXTENT_UINT as f64;
/// Size of a tile on screen, in pixels, when the camera zoom equals the tile zoom.
pub const TILE_SIZE: f64 = 512.0;

#[derive(
    Ord, PartialOrd, Eq, PartialEq, Hash, Copy, Clone, Debug, Default, Serialize, Deserialize,
)]
pub struct ZoomLevel(u8);

impl ZoomLevel {
    pub const fn new(z: u8) -> Self {
        ZoomLevel(z)
    }
}

impl Display for ZoomLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u8> for ZoomLevel {
    fn from(zoom_level: u8) -> Self {
        ZoomLevel(zoom_level)
    }
}

impl From<ZoomLevel> for u8 {
    fn from(val: ZoomLevel) -> Self {
        val.0
    }
}

/// `Zoom` is an exponential scale that defines the zoom of the camera on the map.
#[derive(Copy, Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct Zoom(f64);

impl Zoom {
    pub fn new(zoom: f64) -> Self {
        Zoom(zoom)
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    pub fn scale_delta(&self, zoom: &Zoom) -> f64 {
        2.0_f64.powf(zoom.0 - self.0)
    }
}

impl From<ZoomLevel> for Zoom {
    fn from(zoom_level: ZoomLevel) -> Self {
        Zoom(zoom_level.0 as f64)
    }
}

impl Display for Zoom {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", (self.0 * 100.0).round() / 100.0)
    }
}

/// Identifies a tile in the world. `x` is the column, `y` the row and `z` the zoom level of the
/// data. `tile_zoom` is the zoom level the tile is displayed at, which is larger than `z` for
/// overscaled tiles.
///
/// # Coordinate System Origin
///
/// The origin of the coordinate system is in the upper-left corner.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct WorldTileCoords {
    pub x: i32,
    pub y: i32,
    pub z: ZoomLevel,
    pub tile_zoom: ZoomLevel,
}

impl WorldTileCoords {
    pub fn overscaled(x: i32, y: i32, z: ZoomLevel, tile_zoom: ZoomLevel) -> Self {
        Self {
            x,
            y,
            z,
            tile_zoom,
        }
    }

    /// Model matrix which places this tile's [`EXTENT`] units in world pixels at `zoom`.
    pub fn transform_for_zoom(&self, zoom: Zoom) -> Matrix4<f64> {
        /*
           For tile.z = zoom:
               => scale = 512
           If tile.z < zoom:
               => scale > 512
           If tile.z > zoom:
               => scale < 512
        */
        let tile_scale = TILE_SIZE * Zoom::from(self.z).scale_delta(&zoom);

        let translate = Matrix4::from_translation(Vector3::new(
            self.x as f64 * tile_scale,
            self.y as f64 * tile_scale,
            0.0,
        ));

        // Divide by EXTENT to normalize tile
        let normalize_and_scale =
            Matrix4::from_nonuniform_scale(tile_scale / EXTENT, tile_scale / EXTENT, 1.0);
        translate * normalize_and_scale
    }

    /// Converts a length in screen pixels into tile units at the given camera zoom.
    pub fn pixels_to_tile_units(&self, pixel_value: f64, zoom: Zoom) -> f64 {
        pixel_value * (EXTENT / (TILE_SIZE * Zoom::from(self.tile_zoom).scale_delta(&zoom)))
    }

    /// Returns unique stencil reference values for neighbouring tiles. Tiles from arbitrary `z`
    /// can lie next to each other, because tiles from different levels are mixed based on
    /// availability.
    pub fn stencil_reference_value(&self) -> u8 {
        const CASES: u8 = 4;
        // zoom levels above 63 share reference values with lower ones
        let base = u8::from(self.z).wrapping_mul(CASES);
        let case = match (self.x % 2 == 0, self.y % 2 == 0) {
            (true, true) => 0,
            (true, false) => 1,
            (false, true) => 2,
            (false, false) => 3,
        };
        base.wrapping_add(case)
    }
}

impl From<(i32, i32, ZoomLevel)> for WorldTileCoords {
    fn from(tuple: (i32, i32, ZoomLevel)) -> Self {
        WorldTileCoords {
            x: tuple.0,
            y: tuple.1,
            z: tuple.2,
            tile_zoom: tuple.2,
        }
    }
}

impl Display for WorldTileCoords {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "WT(x={x},y={y},z={z},tz={tile_zoom})",
            x = self.x,
            y = self.y,
            z = self.z,
            tile_zoom = self.tile_zoom
        )
    }
}
