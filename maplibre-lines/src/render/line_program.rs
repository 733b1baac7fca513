//! Selection of the line shader variant of a layer and its uniforms.

use cgmath::Matrix2;

use crate::{
    coords::{WorldTileCoords, Zoom},
    error::MissingAssetWarning,
    render::{
        atlas::{DashAtlas, DashEntry, ImagePosition, SpriteAtlas},
        pass::{LinePass, UniformValue},
        transform::Transform,
    },
    style::paint::{CrossFaded, EvaluatedLinePaint},
};

pub const SOLID_PROGRAM: &str = "line";
pub const DASHED_PROGRAM: &str = "linesdfpattern";
pub const PATTERNED_PROGRAM: &str = "linepattern";

/// Uniforms every line variant uses. Computed once per layer and frame.
#[derive(Debug, Clone, PartialEq)]
pub struct SharedLineUniforms {
    pub antialiasing_matrix: [[f32; 2]; 2],
    pub blur: f32,
    pub antialiasing: f32,
    pub line_width: f32,
    pub opacity: f32,
    pub offset: f32,
    pub gap_width: f32,
    pub extra: f32,
}

impl SharedLineUniforms {
    pub fn new(paint: &EvaluatedLinePaint, transform: &Transform, device_pixel_ratio: f32) -> Self {
        // half a device pixel of blur on each edge
        let antialiasing = 0.5 / device_pixel_ratio;
        let matrix: Matrix2<f64> = transform.antialiasing_matrix();
        let matrix: [[f64; 2]; 2] = matrix.into();

        Self {
            antialiasing_matrix: matrix.map(|column| column.map(|v| v as f32)),
            blur: paint.blur + antialiasing,
            antialiasing,
            line_width: paint.width / 2.0,
            opacity: paint.opacity,
            offset: -paint.offset,
            gap_width: paint.gap_width / 2.0,
            extra: transform.line_extra() as f32,
        }
    }

    pub fn apply(&self, pass: &mut impl LinePass) {
        pass.set_uniform(
            "u_antialiasingmatrix",
            UniformValue::Mat2(self.antialiasing_matrix),
        );
        pass.set_uniform("u_blur", UniformValue::Float(self.blur));
        pass.set_uniform("u_antialiasing", UniformValue::Float(self.antialiasing));
        pass.set_uniform("u_linewidth", UniformValue::Float(self.line_width));
        pass.set_uniform("u_opacity", UniformValue::Float(self.opacity));
        pass.set_uniform("u_offset", UniformValue::Float(self.offset));
        pass.set_uniform("u_gapwidth", UniformValue::Float(self.gap_width));
        pass.set_uniform("u_extra", UniformValue::Float(self.extra));
    }
}

/// Dash entries of both sides of the cross-fade.
#[derive(Debug, Clone, PartialEq)]
pub struct DashUniforms {
    pub color: [f32; 4],
    pub from: DashEntry,
    pub to: DashEntry,
    /// Pixel length of one repetition of each side.
    pub width_a: f32,
    pub width_b: f32,
    pub mix: f32,
    pub sdf_gamma: f32,
}

/// Sprite positions of both sides of the cross-fade.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternUniforms {
    pub from: ImagePosition,
    pub to: ImagePosition,
    pub from_scale: f32,
    pub to_scale: f32,
}

/// The shader variant of one line layer.
#[derive(Debug, Clone, PartialEq)]
pub enum LineProgram {
    Solid { color: [f32; 4] },
    Dashed(DashUniforms),
    /// `None` if the pattern differs per feature, the images are then read from the paint
    /// buffers.
    Patterned {
        images: Option<PatternUniforms>,
        fade: f32,
    },
}

impl LineProgram {
    /// Selects the variant for `paint`. A dash array takes precedence over a pattern.
    pub fn select<D, S>(
        layer_id: &str,
        paint: &EvaluatedLinePaint,
        round_cap: bool,
        dashes: &mut D,
        sprites: &S,
        device_pixel_ratio: f32,
    ) -> Result<Self, MissingAssetWarning>
    where
        D: DashAtlas + ?Sized,
        S: SpriteAtlas + ?Sized,
    {
        if let Some(dasharray) = paint.dasharray.as_ref().filter(|d| !d.from.is_empty()) {
            return Self::dashed(layer_id, paint, dasharray, round_cap, dashes, device_pixel_ratio);
        }

        if paint.pattern_data_driven {
            return Ok(LineProgram::Patterned {
                images: None,
                fade: paint.pattern.as_ref().map_or(1.0, |p| p.t),
            });
        }

        if let Some(pattern) = paint.pattern.as_ref().filter(|p| !p.from.is_empty()) {
            let position = |name: &str| {
                sprites
                    .get_position(name, true)
                    .ok_or_else(|| MissingAssetWarning {
                        layer: layer_id.to_string(),
                        image: name.to_string(),
                    })
            };
            return Ok(LineProgram::Patterned {
                images: Some(PatternUniforms {
                    from: position(&pattern.from)?,
                    to: position(&pattern.to)?,
                    from_scale: pattern.from_scale,
                    to_scale: pattern.to_scale,
                }),
                fade: pattern.t,
            });
        }

        Ok(LineProgram::Solid { color: paint.color })
    }

    fn dashed<D: DashAtlas + ?Sized>(
        layer_id: &str,
        paint: &EvaluatedLinePaint,
        dasharray: &CrossFaded<Vec<f32>>,
        round_cap: bool,
        dashes: &mut D,
        device_pixel_ratio: f32,
    ) -> Result<Self, MissingAssetWarning> {
        let mut entry = |array: &[f32]| {
            dashes
                .get_dash(array, round_cap)
                .ok_or_else(|| MissingAssetWarning {
                    layer: layer_id.to_string(),
                    image: format!("dash {array:?}"),
                })
        };
        let from = entry(&dasharray.from)?;
        let to = entry(&dasharray.to)?;

        let width_a = from.width * dasharray.from_scale;
        let width_b = to.width * dasharray.to_scale;
        let sdf_gamma =
            dashes.width() / (width_a.min(width_b) * 256.0 * device_pixel_ratio) / 2.0;

        Ok(LineProgram::Dashed(DashUniforms {
            color: paint.color,
            from,
            to,
            width_a,
            width_b,
            mix: dasharray.t,
            sdf_gamma,
        }))
    }

    pub fn name(&self) -> &'static str {
        match self {
            LineProgram::Solid { .. } => SOLID_PROGRAM,
            LineProgram::Dashed(_) => DASHED_PROGRAM,
            LineProgram::Patterned { .. } => PATTERNED_PROGRAM,
        }
    }

    /// Sets the variant uniforms which are the same for every tile.
    pub fn apply(&self, pass: &mut impl LinePass) {
        match self {
            LineProgram::Solid { color } => {
                pass.set_uniform("u_color", UniformValue::Vec4(*color));
            }
            LineProgram::Dashed(dash) => {
                pass.set_uniform("u_color", UniformValue::Vec4(dash.color));
                pass.set_uniform("u_tex_y_a", UniformValue::Float(dash.from.y));
                pass.set_uniform("u_tex_y_b", UniformValue::Float(dash.to.y));
                pass.set_uniform("u_mix", UniformValue::Float(dash.mix));
                pass.set_uniform("u_sdfgamma", UniformValue::Float(dash.sdf_gamma));
                pass.set_uniform("u_image", UniformValue::Int(0));
            }
            LineProgram::Patterned { images, fade } => {
                if let Some(images) = images {
                    pass.set_uniform("u_pattern_tl_a", UniformValue::Vec2(images.from.tl));
                    pass.set_uniform("u_pattern_br_a", UniformValue::Vec2(images.from.br));
                    pass.set_uniform("u_pattern_tl_b", UniformValue::Vec2(images.to.tl));
                    pass.set_uniform("u_pattern_br_b", UniformValue::Vec2(images.to.br));
                }
                pass.set_uniform("u_fade", UniformValue::Float(*fade));
                pass.set_uniform("u_image", UniformValue::Int(0));
            }
        }
    }

    /// Sets the variant uniforms which depend on the zoom of the tile.
    pub fn apply_tile(&self, pass: &mut impl LinePass, coords: &WorldTileCoords, zoom: Zoom) {
        let tile_units = |pixels: f32| coords.pixels_to_tile_units(pixels as f64, zoom) as f32;

        match self {
            LineProgram::Solid { .. } => {}
            LineProgram::Dashed(dash) => {
                pass.set_uniform(
                    "u_patternscale_a",
                    UniformValue::Vec2([1.0 / tile_units(dash.width_a), -dash.from.height / 2.0]),
                );
                pass.set_uniform(
                    "u_patternscale_b",
                    UniformValue::Vec2([1.0 / tile_units(dash.width_b), -dash.to.height / 2.0]),
                );
            }
            LineProgram::Patterned { images, .. } => {
                let Some(images) = images else {
                    return;
                };
                pass.set_uniform(
                    "u_pattern_size_a",
                    UniformValue::Vec2([
                        tile_units(images.from.size[0] * images.from_scale),
                        images.from.size[1],
                    ]),
                );
                pass.set_uniform(
                    "u_pattern_size_b",
                    UniformValue::Vec2([
                        tile_units(images.to.size[0] * images.to_scale),
                        images.to.size[1],
                    ]),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use cgmath::Deg;
    use serde_json::json;

    use super::*;
    use crate::{
        coords::ZoomLevel,
        render::{atlas::LineAtlas, pass::CommandRecorder},
        style::layer::{LineLayout, LinePaint, StyleLayer},
    };

    fn evaluated(paint: serde_json::Value) -> EvaluatedLinePaint {
        let paint: LinePaint = serde_json::from_value(paint).unwrap();
        EvaluatedLinePaint::at_rest(&StyleLayer::line(
            "layer",
            "roads",
            LineLayout::default(),
            paint,
        ))
        .unwrap()
    }

    fn sprites() -> HashMap<String, ImagePosition> {
        HashMap::from([
            (
                "a".to_string(),
                ImagePosition {
                    tl: [0.0, 0.0],
                    br: [0.5, 0.25],
                    size: [16.0, 8.0],
                },
            ),
            (
                "b".to_string(),
                ImagePosition {
                    tl: [0.5, 0.0],
                    br: [1.0, 0.5],
                    size: [16.0, 12.0],
                },
            ),
        ])
    }

    fn select(paint: &EvaluatedLinePaint) -> Result<LineProgram, MissingAssetWarning> {
        LineProgram::select("layer", paint, false, &mut LineAtlas::default(), &sprites(), 1.0)
    }

    #[test]
    fn dash_array_selects_dashed_variant() {
        let paint = evaluated(json!({"line-dasharray": [2, 1]}));
        assert_eq!(select(&paint).unwrap().name(), DASHED_PROGRAM);

        // a pattern which is set but empty does not change the selection
        let mut paint = evaluated(json!({"line-dasharray": [2, 1], "line-pattern": "a"}));
        assert_eq!(select(&paint).unwrap().name(), DASHED_PROGRAM);
        paint.pattern = Some(CrossFaded::constant(String::new()));
        assert_eq!(select(&paint).unwrap().name(), DASHED_PROGRAM);
    }

    #[test]
    fn pattern_and_solid_variants() {
        let paint = evaluated(json!({"line-pattern": "a"}));
        assert_eq!(select(&paint).unwrap().name(), PATTERNED_PROGRAM);

        let paint = evaluated(json!({"line-color": "red"}));
        assert_eq!(
            select(&paint).unwrap(),
            LineProgram::Solid {
                color: [1.0, 0.0, 0.0, 1.0]
            }
        );
    }

    #[test]
    fn missing_sprite_is_a_warning() {
        let paint = evaluated(json!({"line-pattern": "unknown"}));
        assert_eq!(
            select(&paint),
            Err(MissingAssetWarning {
                layer: "layer".to_string(),
                image: "unknown".to_string(),
            })
        );
    }

    #[test]
    fn data_driven_pattern_uses_attributes() {
        let paint = evaluated(json!({"line-pattern": ["get", "kind"]}));
        assert_eq!(
            select(&paint).unwrap(),
            LineProgram::Patterned {
                images: None,
                fade: 1.0
            }
        );
    }

    #[test]
    fn sdf_gamma_follows_the_narrower_side() {
        let mut paint = evaluated(json!({}));
        paint.dasharray = Some(CrossFaded {
            from: vec![2.0, 1.0],
            to: vec![4.0, 2.0],
            from_scale: 1.0,
            to_scale: 0.5,
            t: 0.25,
        });
        let mut atlas = LineAtlas::default();
        let program =
            LineProgram::select("layer", &paint, false, &mut atlas, &sprites(), 2.0).unwrap();

        let LineProgram::Dashed(dash) = &program else {
            panic!("expected dashed variant");
        };
        assert_eq!(dash.width_a, 3.0);
        assert_eq!(dash.width_b, 3.0);
        assert_eq!(dash.sdf_gamma, 256.0 / (3.0 * 256.0 * 2.0) / 2.0);

        let mut recorder = CommandRecorder::new();
        program.apply(&mut recorder);
        assert_eq!(recorder.uniform("u_mix"), Some(UniformValue::Float(0.25)));
        assert_eq!(recorder.uniform("u_tex_y_a"), Some(UniformValue::Float(dash.from.y)));
    }

    #[test]
    fn pattern_sizes_use_their_own_side() {
        let mut paint = evaluated(json!({}));
        paint.pattern = Some(CrossFaded {
            from: "a".to_string(),
            to: "b".to_string(),
            from_scale: 1.0,
            to_scale: 1.0,
            t: 0.5,
        });
        let program = select(&paint).unwrap();

        let coords = WorldTileCoords::from((0, 0, ZoomLevel::from(0)));
        let mut recorder = CommandRecorder::new();
        program.apply_tile(&mut recorder, &coords, Zoom::new(0.0));

        let Some(UniformValue::Vec2(a)) = recorder.uniform("u_pattern_size_a") else {
            panic!("u_pattern_size_a not set");
        };
        let Some(UniformValue::Vec2(b)) = recorder.uniform("u_pattern_size_b") else {
            panic!("u_pattern_size_b not set");
        };
        // 512 pixels span the 4096 units of a tile at its own zoom
        assert_eq!(a, [128.0, 8.0]);
        assert_eq!(b, [128.0, 12.0]);
    }

    #[test]
    fn shared_uniforms_follow_device_pixel_ratio() {
        let paint = evaluated(json!({
            "line-width": 4,
            "line-blur": 1,
            "line-offset": 2,
            "line-gap-width": 6,
        }));
        let mut transform = Transform::new(800.0, 600.0);

        let uniforms = SharedLineUniforms::new(&paint, &transform, 2.0);
        assert_eq!(uniforms.blur, 1.25);
        assert_eq!(uniforms.antialiasing, 0.25);

        let sharp = SharedLineUniforms::new(&evaluated(json!({})), &transform, 1.0);
        assert_eq!(sharp.blur, 0.5);
        assert_eq!(uniforms.line_width, 2.0);
        assert_eq!(uniforms.gap_width, 3.0);
        assert_eq!(uniforms.offset, -2.0);
        assert_eq!(uniforms.extra, 0.0);
        assert_eq!(uniforms.antialiasing_matrix, [[1.0, 0.0], [0.0, 1.0]]);

        transform.set_pitch(Deg(45.0));
        assert!(SharedLineUniforms::new(&paint, &transform, 2.0).extra > 0.0);
    }
}
