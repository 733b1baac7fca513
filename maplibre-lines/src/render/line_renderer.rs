//! Draws line layers for the visible tiles.

use std::{collections::HashMap, sync::Arc};

use crate::{
    coords::WorldTileCoords,
    render::{
        atlas::{DashAtlas, SpriteAtlas},
        line_program::{LineProgram, SharedLineUniforms},
        pass::{LinePass, UniformValue},
        transform::Transform,
    },
    settings::LineRendererSettings,
    style::{
        layer::{LineCap, StyleLayer},
        paint::EvaluatedLinePaint,
    },
    vector::{bucket::ProgramOptions, tile_store::TileStore, TileBuckets},
};

/// Provides the buckets of a tile to the renderer.
pub trait BucketSource {
    fn tile_buckets(&self, coords: &WorldTileCoords) -> Option<&TileBuckets>;
}

impl BucketSource for TileStore {
    fn tile_buckets(&self, coords: &WorldTileCoords) -> Option<&TileBuckets> {
        self.get(coords).map(Arc::as_ref)
    }
}

impl BucketSource for HashMap<WorldTileCoords, TileBuckets> {
    fn tile_buckets(&self, coords: &WorldTileCoords) -> Option<&TileBuckets> {
        self.get(coords)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPhase {
    Opaque,
    Translucent,
}

/// State of the frame which is being drawn.
#[derive(Debug, Clone, Copy)]
pub struct LineFrame<'a> {
    pub phase: RenderPhase,
    pub transform: &'a Transform,
    /// Visible tiles in draw order.
    pub visible: &'a [WorldTileCoords],
}

/// Draws the line layers of a style, one layer at a time.
pub struct LineRenderer<D, S> {
    settings: LineRendererSettings,
    dashes: D,
    sprites: S,
}

impl<D: DashAtlas, S: SpriteAtlas> LineRenderer<D, S> {
    pub fn new(settings: LineRendererSettings, dashes: D, sprites: S) -> Self {
        Self {
            settings,
            dashes,
            sprites,
        }
    }

    pub fn settings(&self) -> &LineRendererSettings {
        &self.settings
    }

    pub fn sprites_mut(&mut self) -> &mut S {
        &mut self.sprites
    }

    /// Draws `layer` with its resting paint.
    pub fn draw_style_layer(
        &mut self,
        pass: &mut impl LinePass,
        frame: &LineFrame,
        layer: &StyleLayer,
        source: &impl BucketSource,
    ) -> usize {
        match EvaluatedLinePaint::at_rest(layer) {
            Some(paint) => self.draw_layer(pass, frame, layer, &paint, source),
            None => 0,
        }
    }

    /// Draws `layer` with `paint` for every visible tile. Returns the number of draw calls.
    pub fn draw_layer(
        &mut self,
        pass: &mut impl LinePass,
        frame: &LineFrame,
        layer: &StyleLayer,
        paint: &EvaluatedLinePaint,
        source: &impl BucketSource,
    ) -> usize {
        if frame.phase == RenderPhase::Opaque || paint.width <= 0.0 {
            return 0;
        }

        let round_cap = layer
            .line_layout()
            .map_or(false, |layout| layout.line_cap == LineCap::Round);
        let device_pixel_ratio = self.settings.device_pixel_ratio;
        let program = match LineProgram::select(
            &layer.id,
            paint,
            round_cap,
            &mut self.dashes,
            &self.sprites,
            device_pixel_ratio,
        ) {
            Ok(program) => program,
            Err(warning) => {
                tracing::debug!("skipping layer {}: {warning}", layer.id);
                return 0;
            }
        };
        let shared = SharedLineUniforms::new(paint, frame.transform, device_pixel_ratio);

        pass.set_depth_mask(self.settings.depth_write);

        let transform = frame.transform;
        let mut bound: Option<&ProgramOptions> = None;
        let mut draws = 0;

        for coords in frame.visible {
            let Some((bucket, layer_index)) = source
                .tile_buckets(coords)
                .and_then(|tile| tile.bucket_for_layer(&layer.id))
            else {
                continue;
            };
            let Some(groups) = bucket.line_groups() else {
                continue;
            };

            let Some(options) = bucket.program_options.get(layer_index) else {
                tracing::warn!(
                    "bucket at {coords} has no program options for layer {}",
                    layer.id
                );
                continue;
            };
            if bound != Some(options) {
                pass.set_program(program.name(), options);
                shared.apply(pass);
                program.apply(pass);
                bound = Some(options);
            }

            let matrix = transform.translate_pos_matrix(
                transform.calculate_pos_matrix(coords),
                coords,
                paint.translate,
                paint.translate_anchor,
            );
            let matrix: [[f64; 4]; 4] = matrix.into();
            pass.set_uniform(
                "u_matrix",
                UniformValue::Mat4(matrix.map(|column| column.map(|v| v as f32))),
            );
            let ratio = 1.0 / coords.pixels_to_tile_units(1.0, transform.zoom);
            pass.set_uniform("u_ratio", UniformValue::Float(ratio as f32));
            program.apply_tile(pass, coords, transform.zoom);

            pass.set_stencil_reference(coords.stencil_reference_value());

            for group in groups {
                pass.bind_buffers(group, layer_index);
                pass.draw_indexed(0..group.index_count());
                draws += 1;
            }
            tracing::trace!(
                "drew {} groups of layer {} at {coords}",
                groups.len(),
                layer.id
            );
        }

        draws
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use bytemuck::Zeroable;
    use cgmath::{Point2, SquareMatrix};
    use serde_json::json;

    use super::*;
    use crate::{
        coords::{ZoomLevel, Zoom},
        render::{
            atlas::{ImagePosition, LineAtlas},
            line_program::{DASHED_PROGRAM, SOLID_PROGRAM},
            pass::{CommandRecorder, DrawCommand},
        },
        style::layer::{LineLayout, LinePaint},
        tessellation::{line::LineLayoutVertex, LayoutGroup},
        vector::{
            bucket::{Bucket, BucketBuffers, BufferGroup, LinePaintVertex},
            decoder::PropertyData,
        },
    };

    fn layer(paint: serde_json::Value) -> StyleLayer {
        StyleLayer::line(
            "roads",
            "roads",
            LineLayout::default(),
            serde_json::from_value::<LinePaint>(paint).unwrap(),
        )
    }

    fn tile(coords: WorldTileCoords, groups: usize) -> TileBuckets {
        let layout = Arc::new(LayoutGroup {
            vertices: vec![LineLayoutVertex::zeroed(); 4],
            indices: vec![0, 1, 2, 1, 2, 3],
            features: vec![],
        });
        TileBuckets {
            coords,
            buckets: vec![Bucket {
                source_layer: "roads".to_string(),
                layout: layer(json!({})).layout.unwrap(),
                layer_ids: vec!["roads".to_string()],
                program_options: vec![ProgramOptions::default()],
                buffers: BucketBuffers::Line(
                    (0..groups)
                        .map(|_| BufferGroup {
                            layout: layout.clone(),
                            paint: vec![vec![LinePaintVertex::default(); 4]],
                        })
                        .collect(),
                ),
                pattern_positions: HashMap::new(),
            }],
            property_data: PropertyData::default(),
        }
    }

    fn transform() -> Transform {
        let mut transform = Transform::new(800.0, 600.0);
        transform.zoom = Zoom::new(1.0);
        transform.center = Point2::new(512.0, 512.0);
        transform
    }

    fn renderer() -> LineRenderer<LineAtlas, HashMap<String, ImagePosition>> {
        LineRenderer::new(
            LineRendererSettings::default(),
            LineAtlas::default(),
            HashMap::new(),
        )
    }

    #[test]
    fn one_draw_per_buffer_group_with_stencil_and_no_depth() {
        let a = WorldTileCoords::from((0, 0, ZoomLevel::from(1)));
        let b = WorldTileCoords::from((1, 0, ZoomLevel::from(1)));
        let missing = WorldTileCoords::from((0, 1, ZoomLevel::from(1)));
        let source = HashMap::from([(a, tile(a, 2)), (b, tile(b, 1))]);
        let transform = transform();
        let frame = LineFrame {
            phase: RenderPhase::Translucent,
            transform: &transform,
            visible: &[a, missing, b],
        };

        let mut recorder = CommandRecorder::new();
        let draws = renderer().draw_style_layer(&mut recorder, &frame, &layer(json!({})), &source);

        assert_eq!(draws, 3);
        assert_eq!(recorder.draw_calls(), 3);
        assert_eq!(recorder.programs(), vec![SOLID_PROGRAM]);
        assert!(recorder
            .commands
            .contains(&DrawCommand::SetDepthMask(false)));
        let stencils: Vec<_> = recorder
            .commands
            .iter()
            .filter_map(|command| match command {
                DrawCommand::SetStencilReference(reference) => Some(*reference),
                _ => None,
            })
            .collect();
        assert_eq!(
            stencils,
            vec![a.stencil_reference_value(), b.stencil_reference_value()]
        );
        assert!(recorder
            .commands
            .contains(&DrawCommand::DrawIndexed(0..6)));
    }

    #[test]
    fn bucket_without_program_options_is_not_drawn() {
        let a = WorldTileCoords::from((0, 0, ZoomLevel::from(1)));
        let b = WorldTileCoords::from((1, 0, ZoomLevel::from(1)));
        let mut broken = tile(a, 1);
        broken.buckets[0].program_options.clear();
        let source = HashMap::from([(a, broken), (b, tile(b, 1))]);
        let transform = transform();
        let frame = LineFrame {
            phase: RenderPhase::Translucent,
            transform: &transform,
            visible: &[a, b],
        };

        let mut recorder = CommandRecorder::new();
        let draws = renderer().draw_style_layer(&mut recorder, &frame, &layer(json!({})), &source);

        assert_eq!(draws, 1);
        assert_eq!(recorder.draw_calls(), 1);
        let first_program = recorder
            .commands
            .iter()
            .position(|command| matches!(command, DrawCommand::SetProgram { .. }));
        let first_bind = recorder
            .commands
            .iter()
            .position(|command| matches!(command, DrawCommand::BindBuffers { .. }));
        assert!(first_program.unwrap() < first_bind.unwrap());
    }

    #[test]
    fn opaque_pass_and_zero_width_draw_nothing() {
        let a = WorldTileCoords::from((0, 0, ZoomLevel::from(1)));
        let source = HashMap::from([(a, tile(a, 1))]);
        let transform = transform();
        let mut recorder = CommandRecorder::new();

        let opaque = LineFrame {
            phase: RenderPhase::Opaque,
            transform: &transform,
            visible: &[a],
        };
        assert_eq!(
            renderer().draw_style_layer(&mut recorder, &opaque, &layer(json!({})), &source),
            0
        );

        let translucent = LineFrame {
            phase: RenderPhase::Translucent,
            ..opaque
        };
        assert_eq!(
            renderer().draw_style_layer(
                &mut recorder,
                &translucent,
                &layer(json!({"line-width": 0})),
                &source
            ),
            0
        );
        assert!(recorder.commands.is_empty());
    }

    #[test]
    fn missing_pattern_skips_the_layer() {
        let a = WorldTileCoords::from((0, 0, ZoomLevel::from(1)));
        let source = HashMap::from([(a, tile(a, 1))]);
        let transform = transform();
        let frame = LineFrame {
            phase: RenderPhase::Translucent,
            transform: &transform,
            visible: &[a],
        };
        let mut renderer = renderer();
        let mut recorder = CommandRecorder::new();

        let pattern = layer(json!({"line-pattern": "rail"}));
        assert_eq!(
            renderer.draw_style_layer(&mut recorder, &frame, &pattern, &source),
            0
        );

        renderer.sprites_mut().insert(
            "rail".to_string(),
            ImagePosition {
                tl: [0.0, 0.0],
                br: [1.0, 1.0],
                size: [8.0, 8.0],
            },
        );
        assert_eq!(
            renderer.draw_style_layer(&mut recorder, &frame, &pattern, &source),
            1
        );
    }

    #[test]
    fn uniforms_of_a_dashed_layer() {
        let a = WorldTileCoords::from((0, 0, ZoomLevel::from(1)));
        let source = HashMap::from([(a, tile(a, 1))]);
        let transform = transform();
        let frame = LineFrame {
            phase: RenderPhase::Translucent,
            transform: &transform,
            visible: &[a],
        };
        let mut recorder = CommandRecorder::new();

        renderer().draw_style_layer(
            &mut recorder,
            &frame,
            &layer(json!({"line-width": 4, "line-dasharray": [2, 2]})),
            &source,
        );

        assert_eq!(recorder.programs(), vec![DASHED_PROGRAM]);
        assert_eq!(
            recorder.uniform("u_linewidth"),
            Some(UniformValue::Float(2.0))
        );
        // 512 pixels per 4096 units at the tile's own zoom
        assert_eq!(recorder.uniform("u_ratio"), Some(UniformValue::Float(0.125)));
        assert!(recorder.uniform("u_patternscale_a").is_some());
        assert!(recorder.uniform("u_sdfgamma").is_some());

        let Some(UniformValue::Mat4(matrix)) = recorder.uniform("u_matrix") else {
            panic!("u_matrix not set");
        };
        let expected: [[f64; 4]; 4] = transform.calculate_pos_matrix(&a).into();
        assert_eq!(matrix, expected.map(|c| c.map(|v| v as f32)));
        assert!(cgmath::Matrix4::from(matrix).invert().is_some());
    }
}
