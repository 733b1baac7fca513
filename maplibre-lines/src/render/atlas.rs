//! Addressing contracts of the dash and sprite atlases.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Position of a dash pattern in the shared dash texture. `y` and `height` are normalized to the
/// texture height, `width` is the length of one pattern repetition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DashEntry {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

pub trait DashAtlas {
    /// Returns the entry for `dasharray`, allocating it if necessary. `None` if the atlas is full.
    fn get_dash(&mut self, dasharray: &[f32], round_cap: bool) -> Option<DashEntry>;

    /// Width of the dash texture in pixels.
    fn width(&self) -> f32;
}

/// Position of an image in the sprite texture. `tl` and `br` are normalized texture coordinates,
/// `size` is the image size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImagePosition {
    pub tl: [f32; 2],
    pub br: [f32; 2],
    pub size: [f32; 2],
}

pub trait SpriteAtlas {
    /// Returns `None` while the image is not loaded.
    fn get_position(&self, name: &str, repeating: bool) -> Option<ImagePosition>;
}

impl SpriteAtlas for HashMap<String, ImagePosition> {
    fn get_position(&self, name: &str, _repeating: bool) -> Option<ImagePosition> {
        self.get(name).copied()
    }
}

const ROUND_CAP_RADIUS: u32 = 7;

/// Row allocator for signed distance field dash patterns.
///
/// Every distinct dash array gets its own rows. Round patterns take `2 * 7 + 1` rows so the
/// shader can sample the rounded ends, butt patterns a single row.
#[derive(Debug)]
pub struct LineAtlas {
    width: u32,
    height: u32,
    next_row: u32,
    entries: HashMap<(Vec<u32>, bool), DashEntry>,
}

impl LineAtlas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            next_row: 0,
            entries: HashMap::new(),
        }
    }
}

impl Default for LineAtlas {
    fn default() -> Self {
        Self::new(256, 512)
    }
}

impl DashAtlas for LineAtlas {
    fn get_dash(&mut self, dasharray: &[f32], round_cap: bool) -> Option<DashEntry> {
        let key = (
            dasharray.iter().map(|d| d.to_bits()).collect::<Vec<_>>(),
            round_cap,
        );
        if let Some(entry) = self.entries.get(&key) {
            return Some(*entry);
        }

        let n = if round_cap { ROUND_CAP_RADIUS } else { 0 };
        let rows = 2 * n + 1;
        if self.next_row + rows > self.height {
            log::warn!("line atlas out of space");
            return None;
        }

        let entry = DashEntry {
            x: 0.0,
            y: (self.next_row + n) as f32 / self.height as f32 + 0.5 / self.height as f32,
            width: dasharray.iter().sum(),
            height: (2 * n) as f32 / self.height as f32,
        };
        self.next_row += rows;
        self.entries.insert(key, entry);
        Some(entry)
    }

    fn width(&self) -> f32 {
        self.width as f32
    }
}
