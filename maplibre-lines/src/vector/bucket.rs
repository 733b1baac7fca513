//! Buckets are the GPU-ready representation of one layer family within one tile.

use std::{collections::HashMap, sync::Arc};

use bytemuck::Pod;
use bytemuck_derive::{Pod, Zeroable};

use crate::{
    coords::WorldTileCoords,
    render::atlas::ImagePosition,
    style::{
        layer::LayerLayout,
        paint::{FillPaintProperty, LinePaintProperty, ResolvedFillPaint, ResolvedLinePaint},
    },
    tessellation::{fill::FillLayoutVertex, line::LineLayoutVertex, LayoutGroup},
    vector::decoder::PropertyData,
};

/// A vertex type which can be bound as a vertex buffer.
pub trait GpuVertex: Pod {
    const ATTRIBUTES: &'static [wgpu::VertexAttribute];

    fn buffer_layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Self>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: Self::ATTRIBUTES,
        }
    }
}

impl GpuVertex for LineLayoutVertex {
    const ATTRIBUTES: &'static [wgpu::VertexAttribute] = &wgpu::vertex_attr_array![
        // position and flags
        0 => Sint16x2,
        // extrude, direction and line distance
        1 => Uint8x4,
    ];
}

impl GpuVertex for FillLayoutVertex {
    const ATTRIBUTES: &'static [wgpu::VertexAttribute] = &wgpu::vertex_attr_array![0 => Sint16x2];
}

/// Paint attributes of one line layer for one vertex.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable, Default)]
pub struct LinePaintVertex {
    /// Premultiplied RGBA.
    pub color: [f32; 4],
    pub width: f32,
    pub opacity: f32,
    pub blur: f32,
    pub offset: f32,
    pub gap_width: f32,
    /// Top-left and bottom-right texture coordinates of the pattern image.
    pub pattern_from: [f32; 4],
    pub pattern_to: [f32; 4],
    /// Pixel size of the pattern image.
    pub pattern_size: [f32; 2],
}

impl GpuVertex for LinePaintVertex {
    const ATTRIBUTES: &'static [wgpu::VertexAttribute] = &wgpu::vertex_attr_array![
        2 => Float32x4,
        3 => Float32,
        4 => Float32,
        5 => Float32,
        6 => Float32,
        7 => Float32,
        8 => Float32x4,
        9 => Float32x4,
        10 => Float32x2,
    ];
}

/// Paint attributes of one fill layer for one vertex.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable, Default)]
pub struct FillPaintVertex {
    pub color: [f32; 4],
    pub opacity: f32,
}

impl GpuVertex for FillPaintVertex {
    const ATTRIBUTES: &'static [wgpu::VertexAttribute] =
        &wgpu::vertex_attr_array![2 => Float32x4, 3 => Float32];
}

/// Shader defines of one layer. A paint property which is the same for every feature is bound
/// as a uniform, all others are read from the paint buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ProgramOptions {
    defines: Vec<String>,
}

impl ProgramOptions {
    fn from_uniform_properties<'a>(names: impl Iterator<Item = &'a str>) -> Self {
        let mut defines: Vec<String> = names.map(|name| format!("HAS_UNIFORM_u_{name}")).collect();
        defines.sort();
        defines.dedup();
        Self { defines }
    }

    pub fn for_line(paint: &ResolvedLinePaint) -> Self {
        Self::from_uniform_properties(
            LinePaintProperty::ALL
                .into_iter()
                .filter(|property| !paint.is_data_driven(*property))
                .map(LinePaintProperty::attribute_name),
        )
    }

    pub fn for_fill(paint: &ResolvedFillPaint) -> Self {
        Self::from_uniform_properties(
            FillPaintProperty::ALL
                .into_iter()
                .filter(|property| !paint.is_data_driven(*property))
                .map(FillPaintProperty::attribute_name),
        )
    }

    /// Sorted defines.
    pub fn defines(&self) -> &[String] {
        &self.defines
    }

    pub fn has_uniform(&self, attribute: &str) -> bool {
        self.defines
            .iter()
            .any(|define| define.strip_prefix("HAS_UNIFORM_u_") == Some(attribute))
    }

    /// Stable key for caching compiled shader variants.
    pub fn cache_key(&self) -> String {
        self.defines.join("/")
    }
}

/// Geometry of one buffer group together with one paint buffer per layer of the family.
#[derive(Debug, Clone)]
pub struct BufferGroup<L, P> {
    /// Shared by every bucket derived from the same build.
    pub layout: Arc<LayoutGroup<L>>,
    /// In family order, each parallel to `layout.vertices`.
    pub paint: Vec<Vec<P>>,
}

impl<L: Pod, P: Pod> BufferGroup<L, P> {
    pub fn vertex_count(&self) -> usize {
        self.layout.vertices.len()
    }

    pub fn index_count(&self) -> u32 {
        self.layout.indices.len() as u32
    }

    pub fn paint_bytes(&self, layer_index: usize) -> Option<&[u8]> {
        self.paint
            .get(layer_index)
            .map(|paint| bytemuck::cast_slice(paint.as_slice()))
    }
}

pub type LineBufferGroup = BufferGroup<LineLayoutVertex, LinePaintVertex>;
pub type FillBufferGroup = BufferGroup<FillLayoutVertex, FillPaintVertex>;

#[derive(Debug, Clone)]
pub enum BucketBuffers {
    Line(Vec<LineBufferGroup>),
    Fill(Vec<FillBufferGroup>),
}

/// Buffers of one layer family within one tile.
#[derive(Debug, Clone)]
pub struct Bucket {
    pub source_layer: String,
    pub layout: LayerLayout,
    /// Layer ids in family order.
    pub layer_ids: Vec<String>,
    /// Parallel to `layer_ids`.
    pub program_options: Vec<ProgramOptions>,
    pub buffers: BucketBuffers,
    /// Images resolved for the patterns of this bucket.
    pub pattern_positions: HashMap<String, ImagePosition>,
}

impl Bucket {
    pub fn layer_index(&self, layer_id: &str) -> Option<usize> {
        self.layer_ids.iter().position(|id| id == layer_id)
    }

    pub fn line_groups(&self) -> Option<&[LineBufferGroup]> {
        match &self.buffers {
            BucketBuffers::Line(groups) if !groups.is_empty() => Some(groups),
            _ => None,
        }
    }

    pub fn fill_groups(&self) -> Option<&[FillBufferGroup]> {
        match &self.buffers {
            BucketBuffers::Fill(groups) if !groups.is_empty() => Some(groups),
            _ => None,
        }
    }

    pub fn group_count(&self) -> usize {
        match &self.buffers {
            BucketBuffers::Line(groups) => groups.len(),
            BucketBuffers::Fill(groups) => groups.len(),
        }
    }

    pub fn vertex_count(&self) -> usize {
        match &self.buffers {
            BucketBuffers::Line(groups) => groups.iter().map(|g| g.vertex_count()).sum(),
            BucketBuffers::Fill(groups) => groups.iter().map(|g| g.vertex_count()).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.vertex_count() == 0
    }
}

/// Every bucket of one tile together with the feature properties they were built from.
#[derive(Debug, Clone)]
pub struct TileBuckets {
    pub coords: WorldTileCoords,
    pub buckets: Vec<Bucket>,
    pub property_data: PropertyData,
}

impl TileBuckets {
    /// The bucket which holds the buffers of `layer_id` and the index of the layer within it.
    pub fn bucket_for_layer(&self, layer_id: &str) -> Option<(&Bucket, usize)> {
        self.buckets
            .iter()
            .find_map(|bucket| bucket.layer_index(layer_id).map(|index| (bucket, index)))
    }

    pub fn bucket(&self, source_layer: &str, layout: &LayerLayout) -> Option<&Bucket> {
        self.buckets
            .iter()
            .find(|bucket| bucket.source_layer == source_layer && bucket.layout == *layout)
    }
}
