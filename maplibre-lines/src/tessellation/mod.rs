//! Tessellation for lines and polygons is implemented here.

use bytemuck::Pod;

pub mod fill;
pub mod line;

/// Vertex buffers index data type.
pub type IndexDataType = u16; // Must match INDEX_FORMAT

pub const INDEX_FORMAT: wgpu::IndexFormat = wgpu::IndexFormat::Uint16;

/// Vertices of one feature within a [`LayoutGroup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureRange {
    /// Index of the feature within its source layer.
    pub feature: usize,
    pub start: u32,
    pub end: u32,
}

impl FeatureRange {
    pub fn len(&self) -> usize {
        (self.end - self.start) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Geometry of one buffer group. Indices address `vertices` of the same group only.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutGroup<V> {
    pub vertices: Vec<V>,
    pub indices: Vec<IndexDataType>,
    /// Contiguous and in feature order, together covering every vertex.
    pub features: Vec<FeatureRange>,
}

impl<V> Default for LayoutGroup<V> {
    fn default() -> Self {
        Self {
            vertices: Vec::new(),
            indices: Vec::new(),
            features: Vec::new(),
        }
    }
}

impl<V: Pod> LayoutGroup<V> {
    /// Index bytes padded with zeroed indices to `wgpu::COPY_BUFFER_ALIGNMENT`. Only the first
    /// `indices.len()` indices are drawn.
    pub fn aligned_index_bytes(&self) -> Vec<u8> {
        let align = wgpu::COPY_BUFFER_ALIGNMENT;
        let stride = std::mem::size_of::<IndexDataType>() as wgpu::BufferAddress;
        let unpadded_bytes = self.indices.len() as wgpu::BufferAddress * stride;
        let padding_bytes = (align - unpadded_bytes % align) % align;

        let mut bytes = bytemuck::cast_slice(&self.indices).to_vec();
        bytes.resize(bytes.len() + padding_bytes as usize, 0);
        bytes
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }
}

/// Collects tessellated pieces into buffer groups, starting a new group whenever a piece would
/// push the current one over the vertex limit.
#[derive(Debug)]
pub struct LayoutBuffers<V> {
    limit: usize,
    groups: Vec<LayoutGroup<V>>,
}

impl<V> LayoutBuffers<V> {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            groups: Vec::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn vertex_count(&self) -> usize {
        self.groups.iter().map(|group| group.vertices.len()).sum()
    }

    /// Appends a piece of `feature`. `indices` are relative to the first vertex of the piece.
    /// Returns `false` and drops the piece if it alone exceeds the limit.
    pub fn append(&mut self, feature: usize, vertices: Vec<V>, indices: &[u32]) -> bool {
        if vertices.is_empty() {
            return true;
        }
        if vertices.len() > self.limit {
            return false;
        }

        let fits = self
            .groups
            .last()
            .map_or(false, |group| group.vertices.len() + vertices.len() <= self.limit);
        if !fits {
            self.groups.push(LayoutGroup::default());
        }
        let Some(group) = self.groups.last_mut() else {
            return false;
        };

        let base = group.vertices.len() as u32;
        let end = base + vertices.len() as u32;
        group.vertices.extend(vertices);
        group
            .indices
            .extend(indices.iter().map(|i| (base + i) as IndexDataType));

        match group.features.last_mut() {
            Some(range) if range.feature == feature && range.end == base => range.end = end,
            _ => group.features.push(FeatureRange {
                feature,
                start: base,
                end,
            }),
        }
        true
    }

    pub fn finish(self) -> Vec<LayoutGroup<V>> {
        self.groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pieces_of_one_feature_share_a_range() {
        let mut buffers = LayoutBuffers::<u32>::new(8);
        assert!(buffers.append(0, vec![0, 0, 0], &[0, 1, 2]));
        assert!(buffers.append(0, vec![0, 0, 0], &[0, 1, 2]));
        assert!(buffers.append(1, vec![0, 0, 0], &[0, 1, 2]));

        let groups = buffers.finish();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].indices, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(
            groups[0].features,
            vec![FeatureRange {
                feature: 0,
                start: 0,
                end: 6
            }]
        );
        assert_eq!(groups[1].indices, vec![0, 1, 2]);
    }

    #[test]
    fn oversized_piece_is_rejected() {
        let mut buffers = LayoutBuffers::<u32>::new(2);
        assert!(!buffers.append(0, vec![0, 0, 0], &[0, 1, 2]));
        assert_eq!(buffers.vertex_count(), 0);
    }

    #[test]
    fn index_bytes_are_padded() {
        let group = LayoutGroup::<u32> {
            vertices: vec![0; 3],
            indices: vec![0, 1, 2],
            features: vec![],
        };

        let bytes = group.aligned_index_bytes();
        assert_eq!(bytes.len() as u64 % wgpu::COPY_BUFFER_ALIGNMENT, 0);
        assert_eq!(&bytes[..6], bytemuck::cast_slice::<u16, u8>(&[0, 1, 2]));
    }
}
