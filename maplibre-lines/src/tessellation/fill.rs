//! Polygon fill tessellation.

use bytemuck_derive::{Pod, Zeroable};
use cgmath::Point2;
use lyon::{
    geom,
    path::Path,
    tessellation::{
        BuffersBuilder, FillOptions, FillRule, FillTessellator, FillVertex, FillVertexConstructor,
        TessellationError, VertexBuffers,
    },
};

use crate::tessellation::LayoutBuffers;

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Pod, Zeroable)]
pub struct FillLayoutVertex {
    pub pos: [i16; 2],
}

/// Constructor for fill vertices.
pub struct VertexConstructor {}

impl FillVertexConstructor<FillLayoutVertex> for VertexConstructor {
    fn new_vertex(&mut self, vertex: FillVertex) -> FillLayoutVertex {
        let position = vertex.position();
        FillLayoutVertex {
            pos: [position.x.round() as i16, position.y.round() as i16],
        }
    }
}

/// Tessellates polygon features. All rings of a feature form one path, holes are cut out by the
/// non-zero fill rule because their winding is opposite to the outer ring.
pub struct FillTessellation {
    tessellator: FillTessellator,
    options: FillOptions,
}

impl FillTessellation {
    pub fn new(tolerance: f32) -> Self {
        Self {
            tessellator: FillTessellator::new(),
            options: FillOptions::tolerance(tolerance).with_fill_rule(FillRule::NonZero),
        }
    }

    /// Returns the number of vertices added. A polygon which does not fit into a single buffer
    /// group is skipped.
    pub fn add_feature(
        &mut self,
        buffers: &mut LayoutBuffers<FillLayoutVertex>,
        feature: usize,
        rings: &[Vec<Point2<i32>>],
    ) -> Result<usize, TessellationError> {
        let mut builder = Path::builder();
        let mut any = false;
        for ring in rings {
            // Rings repeat their first point at the end.
            let points = match ring.split_last() {
                Some((last, rest)) if rest.first() == Some(last) => rest,
                _ => ring.as_slice(),
            };
            let Some((first, rest)) = points.split_first() else {
                continue;
            };
            if rest.len() < 2 {
                continue;
            }

            builder.begin(geom::point(first.x as f32, first.y as f32));
            for p in rest {
                builder.line_to(geom::point(p.x as f32, p.y as f32));
            }
            builder.end(true);
            any = true;
        }
        if !any {
            return Ok(0);
        }
        let path: Path = builder.build();

        let mut buffer: VertexBuffers<FillLayoutVertex, u32> = VertexBuffers::new();
        self.tessellator.tessellate_path(
            &path,
            &self.options,
            &mut BuffersBuilder::new(&mut buffer, VertexConstructor {}),
        )?;

        let count = buffer.vertices.len();
        if !buffers.append(feature, buffer.vertices, &buffer.indices) {
            tracing::warn!("polygon of feature {feature} exceeds the vertex limit, skipped");
            return Ok(0);
        }
        Ok(count)
    }
}
