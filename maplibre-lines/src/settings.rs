//! Settings for the bucketing pipeline and the line renderer.

use serde::{Deserialize, Serialize};

/// Largest vertex count of one buffer group, bounded by the `u16` index format.
pub const MAX_VERTICES_PER_GROUP: usize = u16::MAX as usize;
pub const MIN_VERTICES_PER_GROUP: usize = 64;

/// Provides configuration for building buckets.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// A new buffer group is started once the current one would exceed this many vertices.
    pub max_vertices_per_group: usize,
    /// Tolerance of the polygon fill tessellation, in tile units.
    pub fill_tolerance: f32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_vertices_per_group: MAX_VERTICES_PER_GROUP,
            fill_tolerance: 0.02,
        }
    }
}

impl PipelineSettings {
    /// Vertex limit actually used, never above what `u16` indices can address and large enough
    /// to hold the smallest line piece.
    pub fn vertex_limit(&self) -> usize {
        self.max_vertices_per_group
            .clamp(MIN_VERTICES_PER_GROUP, MAX_VERTICES_PER_GROUP)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineRendererSettings {
    pub device_pixel_ratio: f32,
    /// Lines are composited in paint order, so this stays `false`.
    pub depth_write: bool,
}

impl Default for LineRendererSettings {
    fn default() -> Self {
        Self {
            device_pixel_ratio: 1.0,
            depth_write: false,
        }
    }
}

/// Both settings as read from a JSON file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub pipeline: PipelineSettings,
    pub renderer: LineRendererSettings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{ "renderer": { "device_pixel_ratio": 2.0 } }"#).unwrap();

        assert_eq!(settings.renderer.device_pixel_ratio, 2.0);
        assert!(!settings.renderer.depth_write);
        assert_eq!(settings.pipeline, PipelineSettings::default());
    }

    #[test]
    fn vertex_limit_is_bounded_by_index_format() {
        let settings = PipelineSettings {
            max_vertices_per_group: 1 << 20,
            ..Default::default()
        };
        assert_eq!(settings.vertex_limit(), 65535);
    }
}
