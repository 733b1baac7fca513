//! Extrusion tessellator for lines.
//!
//! Every line point becomes two vertices which are extruded along the normal of the line in the
//! vertex shader, so the line width can change without tessellating again. Consecutive vertices
//! form a triangle strip.

use bytemuck_derive::{Pod, Zeroable};
use cgmath::{InnerSpace, Point2, Vector2};

use crate::{
    coords::{EXTENT, TILE_SIZE},
    style::layer::{LineCap, LineJoin, LineLayout},
    tessellation::LayoutBuffers,
};

/// The extrude vector is stored as a signed byte scaled by this factor.
pub const EXTRUDE_SCALE: f64 = 63.0;

/// Line distances are stored with half a tile unit precision in 14 bits.
pub const LINE_DISTANCE_SCALE: f64 = 0.5;
const LINE_DISTANCE_BUFFER_BITS: u32 = 15;
pub const MAX_LINE_DISTANCE: f64 =
    (1u32 << (LINE_DISTANCE_BUFFER_BITS - 1)) as f64 / LINE_DISTANCE_SCALE;

/// Distance in pixels at which a sharp corner is cut off before the join.
const SHARP_CORNER_OFFSET: f64 = 15.0;
/// cos(75° / 2)
const COS_HALF_SHARP_CORNER: f64 = 0.793_353_340_291_235_2;

/// Upper bound of vertices which a single line point can produce.
const MAX_VERTICES_PER_POINT: usize = 25;

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Pod, Zeroable)]
pub struct LineLayoutVertex {
    /// Position shifted left by one. The lowest bits carry the round and up flags.
    pub pos: [i16; 2],
    /// Extrude x and y biased by 128, direction and line distance.
    pub data: [u8; 4],
}

impl LineLayoutVertex {
    fn new(
        point: Vector2<f64>,
        extrude: Vector2<f64>,
        round: bool,
        up: bool,
        dir: f64,
        linesofar: f64,
    ) -> Self {
        let x = point.x.clamp(-16384.0, 16383.0) as i16;
        let y = point.y.clamp(-16384.0, 16383.0) as i16;
        let linesofar = (linesofar * LINE_DISTANCE_SCALE) as u32;
        let dir = if dir == 0.0 {
            0
        } else if dir < 0.0 {
            -1
        } else {
            1
        };

        Self {
            pos: [(x << 1) | round as i16, (y << 1) | up as i16],
            data: [
                ((EXTRUDE_SCALE * extrude.x).round() + 128.0) as u8,
                ((EXTRUDE_SCALE * extrude.y).round() + 128.0) as u8,
                ((dir + 1) as u8) | (((linesofar & 0x3f) as u8) << 2),
                (linesofar >> 6) as u8,
            ],
        }
    }

    pub fn position(&self) -> Point2<i16> {
        Point2::new(self.pos[0] >> 1, self.pos[1] >> 1)
    }

    pub fn is_round(&self) -> bool {
        self.pos[0] & 1 == 1
    }

    pub fn is_up(&self) -> bool {
        self.pos[1] & 1 == 1
    }

    /// Extrude vector in units of the half line width.
    pub fn extrude(&self) -> Vector2<f64> {
        Vector2::new(
            (self.data[0] as f64 - 128.0) / EXTRUDE_SCALE,
            (self.data[1] as f64 - 128.0) / EXTRUDE_SCALE,
        )
    }

    /// Direction of a cap vertex along the line, `-1`, `0` or `1`.
    pub fn direction(&self) -> i8 {
        (self.data[2] & 0x3) as i8 - 1
    }

    pub fn line_distance(&self) -> f64 {
        (((self.data[3] as u32) << 6) | (self.data[2] >> 2) as u32) as f64 / LINE_DISTANCE_SCALE
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum JoinKind {
    Miter,
    Bevel,
    FlipBevel,
    FakeRound,
    Round,
    Butt,
    Square,
}

impl From<LineJoin> for JoinKind {
    fn from(join: LineJoin) -> Self {
        match join {
            LineJoin::Bevel => JoinKind::Bevel,
            LineJoin::Round => JoinKind::Round,
            LineJoin::Miter => JoinKind::Miter,
        }
    }
}

impl From<LineCap> for JoinKind {
    fn from(cap: LineCap) -> Self {
        match cap {
            LineCap::Butt => JoinKind::Butt,
            LineCap::Round => JoinKind::Round,
            LineCap::Square => JoinKind::Square,
        }
    }
}

fn perp(v: Vector2<f64>) -> Vector2<f64> {
    Vector2::new(-v.y, v.x)
}

fn cross(a: Vector2<f64>, b: Vector2<f64>) -> f64 {
    a.x * b.y - a.y * b.x
}

fn round(v: Vector2<f64>) -> Vector2<f64> {
    Vector2::new(v.x.round(), v.y.round())
}

/// Output of one tessellated line. Indices are relative to the first vertex.
#[derive(Default)]
struct LinePiece {
    vertices: Vec<LineLayoutVertex>,
    indices: Vec<u32>,
    e1: Option<u32>,
    e2: Option<u32>,
    distance: f64,
}

impl LinePiece {
    fn push_vertex(&mut self, vertex: LineLayoutVertex) {
        let e3 = self.vertices.len() as u32;
        self.vertices.push(vertex);
        if let (Some(e1), Some(e2)) = (self.e1, self.e2) {
            self.indices.extend([e1, e2, e3]);
        }
        self.e1 = self.e2;
        self.e2 = Some(e3);
    }

    fn add_current_vertex(
        &mut self,
        current: Vector2<f64>,
        normal: Vector2<f64>,
        end_left: f64,
        end_right: f64,
        round: bool,
    ) {
        let mut extrude = normal;
        if end_left != 0.0 {
            extrude -= perp(normal) * end_left;
        }
        self.push_vertex(LineLayoutVertex::new(
            current,
            extrude,
            round,
            false,
            end_left,
            self.distance,
        ));

        let mut extrude = -normal;
        if end_right != 0.0 {
            extrude -= perp(normal) * end_right;
        }
        self.push_vertex(LineLayoutVertex::new(
            current,
            extrude,
            round,
            true,
            -end_right,
            self.distance,
        ));

        // Restart the distance before it overflows the packed representation.
        if self.distance > MAX_LINE_DISTANCE / 2.0 {
            self.distance = 0.0;
            self.add_current_vertex(current, normal, end_left, end_right, round);
        }
    }

    fn add_pie_slice_vertex(
        &mut self,
        current: Vector2<f64>,
        extrude: Vector2<f64>,
        line_turns_left: bool,
    ) {
        let extrude = if line_turns_left { -extrude } else { extrude };
        let e3 = self.vertices.len() as u32;
        self.vertices.push(LineLayoutVertex::new(
            current,
            extrude,
            false,
            line_turns_left,
            0.0,
            self.distance,
        ));
        if let (Some(e1), Some(e2)) = (self.e1, self.e2) {
            self.indices.extend([e1, e2, e3]);
        }
        if line_turns_left {
            self.e2 = Some(e3);
        } else {
            self.e1 = Some(e3);
        }
    }
}

/// Tessellates the lines of features with one layout.
pub struct LineTessellator<'a> {
    layout: &'a LineLayout,
    /// `2^(tile_zoom - z)` for overscaled tiles.
    overscaling: f64,
}

impl<'a> LineTessellator<'a> {
    pub fn new(layout: &'a LineLayout, overscaling: f64) -> Self {
        Self {
            layout,
            overscaling: overscaling.max(1.0),
        }
    }

    /// Tessellates every line of `feature` into `buffers`. Polygon rings are treated as closed
    /// lines. Returns the number of vertices added.
    pub fn add_feature(
        &self,
        buffers: &mut LayoutBuffers<LineLayoutVertex>,
        feature: usize,
        lines: &[Vec<Point2<i32>>],
        polygon: bool,
    ) -> usize {
        let before = buffers.vertex_count();

        for line in lines {
            let points: Vec<Vector2<f64>> = line
                .iter()
                .map(|p| Vector2::new(p.x as f64, p.y as f64))
                .collect();
            let closed = polygon || (points.len() > 2 && points.first() == points.last());

            let piece = self.tessellate(&points, closed, 0.0);
            if piece.vertices.len() <= buffers.limit() {
                buffers.append(feature, piece.vertices, &piece.indices);
                continue;
            }

            // Too long for a single buffer group, split into overlapping open pieces.
            let chunk = (buffers.limit().saturating_sub(16) / MAX_VERTICES_PER_POINT).max(2);
            let mut distance = 0.0;
            let mut start = 0;
            while start + 1 < points.len() {
                let end = (start + chunk).min(points.len());
                let piece = self.tessellate(&points[start..end], false, distance);
                distance = piece.distance;
                if !buffers.append(feature, piece.vertices, &piece.indices) {
                    tracing::warn!("line piece of feature {feature} exceeds the vertex limit");
                }
                start = end - 1;
            }
        }

        buffers.vertex_count() - before
    }

    fn tessellate(&self, vertices: &[Vector2<f64>], closed: bool, start_distance: f64) -> LinePiece {
        let mut piece = LinePiece {
            distance: start_distance,
            ..Default::default()
        };

        let mut len = vertices.len();
        // If the line has duplicate vertices at the ends, adjust start/length to remove them.
        while len >= 2 && vertices[len - 1] == vertices[len - 2] {
            len -= 1;
        }
        let mut first = 0;
        while first + 1 < len && vertices[first] == vertices[first + 1] {
            first += 1;
        }

        // Ignore invalid geometry.
        if len < if closed { 3 } else { 2 } || len - first < 2 {
            return piece;
        }

        let join = self.layout.line_join;
        let miter_limit = if join == LineJoin::Bevel {
            1.05
        } else {
            self.layout.line_miter_limit as f64
        };
        let round_limit = self.layout.line_round_limit as f64;
        let sharp_corner_offset = SHARP_CORNER_OFFSET * (EXTENT / (TILE_SIZE * self.overscaling));

        let begin_cap = JoinKind::from(self.layout.line_cap);
        let end_cap = if closed {
            JoinKind::Butt
        } else {
            JoinKind::from(self.layout.line_cap)
        };

        let first_vertex = vertices[first];
        let mut start_of_line = true;
        let mut current_vertex: Option<Vector2<f64>> = None;
        let mut prev_vertex: Option<Vector2<f64>> = None;
        let mut prev_normal: Option<Vector2<f64>> = None;
        let mut next_normal: Option<Vector2<f64>> = None;

        if closed {
            // The last point equals the first one, so the segment into the first point starts
            // at the second to last point.
            let last = vertices[len - 2];
            current_vertex = Some(last);
            next_normal = Some(perp((first_vertex - last).normalize()));
        }

        for i in first..len {
            let next_vertex = if closed && i == len - 1 {
                Some(vertices[first + 1])
            } else if i + 1 < len {
                Some(vertices[i + 1])
            } else {
                None
            };

            // If two consecutive vertices exist, skip the current one.
            if next_vertex == Some(vertices[i]) {
                continue;
            }

            if next_normal.is_some() {
                prev_normal = next_normal;
            }
            if current_vertex.is_some() {
                prev_vertex = current_vertex;
            }

            let current = vertices[i];
            current_vertex = Some(current);

            // Calculate the normal towards the next vertex in this line. In case there is no next
            // vertex, pretend that the line is continuing straight, meaning that we are just using
            // the previous normal.
            next_normal = match next_vertex {
                Some(next) => Some(perp((next - current).normalize())),
                None => prev_normal,
            };
            let (Some(prev_n), Some(next_n)) = (prev_normal.or(next_normal), next_normal) else {
                continue;
            };
            prev_normal = Some(prev_n);

            // The join normal is the average of the normals of the two segments.
            let mut join_normal = prev_n + next_n;
            if join_normal.x != 0.0 || join_normal.y != 0.0 {
                join_normal = join_normal.normalize();
            }

            let cos_half_angle = join_normal.dot(next_n);
            let miter_length = if cos_half_angle != 0.0 {
                1.0 / cos_half_angle
            } else {
                f64::INFINITY
            };

            let is_sharp_corner = cos_half_angle < COS_HALF_SHARP_CORNER
                && prev_vertex.is_some()
                && next_vertex.is_some();

            if is_sharp_corner && i > first {
                if let Some(prev) = prev_vertex {
                    let prev_segment_length = (current - prev).magnitude();
                    if prev_segment_length > 2.0 * sharp_corner_offset {
                        let new_prev = current
                            - round((current - prev) * (sharp_corner_offset / prev_segment_length));
                        piece.distance += (new_prev - prev).magnitude();
                        piece.add_current_vertex(new_prev, prev_n, 0.0, 0.0, false);
                        prev_vertex = Some(new_prev);
                    }
                }
            }

            let middle_vertex = prev_vertex.is_some() && next_vertex.is_some();
            let mut current_join = if middle_vertex {
                JoinKind::from(join)
            } else if next_vertex.is_some() {
                begin_cap
            } else {
                end_cap
            };

            if middle_vertex && current_join == JoinKind::Round {
                if miter_length < round_limit {
                    current_join = JoinKind::Miter;
                } else if miter_length <= 2.0 {
                    current_join = JoinKind::FakeRound;
                }
            }

            if current_join == JoinKind::Miter && miter_length > miter_limit {
                current_join = JoinKind::Bevel;
            }

            if current_join == JoinKind::Bevel {
                // The maximum extrude length is 128 / 63 = 2 times the width of the line,
                // so if miter_length >= 2 we need to draw a different type of bevel here.
                if miter_length > 2.0 {
                    current_join = JoinKind::FlipBevel;
                }
                // If the miter length is really small and the line bevel wouldn't be visible,
                // just draw a miter join to save a triangle.
                if miter_length < miter_limit {
                    current_join = JoinKind::Miter;
                }
            }

            if let Some(prev) = prev_vertex {
                piece.distance += (current - prev).magnitude();
            }

            match current_join {
                JoinKind::Miter => {
                    piece.add_current_vertex(current, join_normal * miter_length, 0.0, 0.0, false);
                }
                JoinKind::FlipBevel => {
                    // Miter is too big, flip the direction to make a beveled join.
                    let flipped = if miter_length > 100.0 {
                        // Almost parallel lines.
                        -next_n
                    } else {
                        let direction = if cross(prev_n, next_n) > 0.0 { -1.0 } else { 1.0 };
                        let bevel_length = miter_length * (prev_n + next_n).magnitude()
                            / (prev_n - next_n).magnitude();
                        perp(join_normal) * (bevel_length * direction)
                    };
                    piece.add_current_vertex(current, flipped, 0.0, 0.0, false);
                    piece.add_current_vertex(current, -flipped, 0.0, 0.0, false);
                }
                JoinKind::Bevel | JoinKind::FakeRound => {
                    let line_turns_left = cross(prev_n, next_n) > 0.0;
                    let offset = -(miter_length * miter_length - 1.0).sqrt();
                    let (offset_a, offset_b) = if line_turns_left {
                        (offset, 0.0)
                    } else {
                        (0.0, offset)
                    };

                    // Close previous segment with a bevel.
                    if !start_of_line {
                        piece.add_current_vertex(current, prev_n, offset_a, offset_b, false);
                    }

                    if current_join == JoinKind::FakeRound {
                        // Approximate the round join with triangles fanning around the join
                        // point, their count grows with the angle of the join.
                        let n = ((0.5 - (cos_half_angle - 0.5)) * 8.0).floor().max(0.0) as u32;
                        for m in 0..n {
                            let t = (m + 1) as f64 / (n + 1) as f64;
                            let approx = (next_n * t + prev_n).normalize();
                            piece.add_pie_slice_vertex(current, approx, line_turns_left);
                        }
                        piece.add_pie_slice_vertex(current, join_normal, line_turns_left);
                        for k in (0..n).rev() {
                            let t = (k + 1) as f64 / (n + 1) as f64;
                            let approx = (prev_n * t + next_n).normalize();
                            piece.add_pie_slice_vertex(current, approx, line_turns_left);
                        }
                    }

                    // Start next segment.
                    if next_vertex.is_some() {
                        piece.add_current_vertex(current, next_n, -offset_a, -offset_b, false);
                    }
                }
                JoinKind::Butt => {
                    if !start_of_line {
                        piece.add_current_vertex(current, prev_n, 0.0, 0.0, false);
                    }
                    if next_vertex.is_some() {
                        piece.add_current_vertex(current, next_n, 0.0, 0.0, false);
                    }
                }
                JoinKind::Square => {
                    if !start_of_line {
                        // Close previous segment with a square cap.
                        piece.add_current_vertex(current, prev_n, 1.0, 1.0, false);
                        // The segment is done. Unset vertices to disconnect segments.
                        piece.e1 = None;
                        piece.e2 = None;
                    }
                    if next_vertex.is_some() {
                        piece.add_current_vertex(current, next_n, -1.0, -1.0, false);
                    }
                }
                JoinKind::Round => {
                    if !start_of_line {
                        // Close previous segment with butt, then add a round cap.
                        piece.add_current_vertex(current, prev_n, 0.0, 0.0, false);
                        piece.add_current_vertex(current, prev_n, 1.0, 1.0, true);
                        piece.e1 = None;
                        piece.e2 = None;
                    }
                    if next_vertex.is_some() {
                        piece.add_current_vertex(current, next_n, -1.0, -1.0, true);
                        piece.add_current_vertex(current, next_n, 0.0, 0.0, false);
                    }
                }
            }

            if is_sharp_corner && i < len - 1 {
                if let Some(next) = next_vertex {
                    let next_segment_length = (current - next).magnitude();
                    if next_segment_length > 2.0 * sharp_corner_offset {
                        let new_current = current
                            + round((next - current) * (sharp_corner_offset / next_segment_length));
                        piece.distance += (new_current - current).magnitude();
                        piece.add_current_vertex(new_current, next_n, 0.0, 0.0, false);
                        current_vertex = Some(new_current);
                    }
                }
            }

            start_of_line = false;
        }

        piece
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tessellation::LayoutGroup;

    fn tessellate(layout: LineLayout, points: &[(i32, i32)]) -> LayoutGroup<LineLayoutVertex> {
        let mut buffers = LayoutBuffers::new(65535);
        let line: Vec<_> = points.iter().map(|&(x, y)| Point2::new(x, y)).collect();
        LineTessellator::new(&layout, 1.0).add_feature(&mut buffers, 0, &[line], false);
        buffers.finish().pop().unwrap_or_default()
    }

    fn assert_valid(group: &LayoutGroup<LineLayoutVertex>) {
        assert_eq!(group.indices.len() % 3, 0);
        assert!(group
            .indices
            .iter()
            .all(|&i| (i as usize) < group.vertices.len()));
    }

    #[test]
    fn single_segment_has_four_vertices() {
        let group = tessellate(LineLayout::default(), &[(0, 0), (100, 0)]);

        assert_eq!(group.vertices.len(), 4);
        assert_eq!(group.indices, vec![0, 1, 2, 1, 2, 3]);
        assert!(!group.vertices[0].is_up());
        assert!(group.vertices[1].is_up());
        assert_eq!(group.vertices[2].position(), Point2::new(100, 0));
        assert_eq!(group.vertices[3].line_distance(), 100.0);
    }

    #[test]
    fn straight_line_has_two_vertices_per_point() {
        let group = tessellate(
            LineLayout::default(),
            &[(0, 0), (10, 0), (20, 0), (30, 0)],
        );

        assert_eq!(group.vertices.len(), 8);
        assert_eq!(group.indices.len(), 18);
        assert_valid(&group);
    }

    #[test]
    fn duplicate_points_are_removed() {
        let group = tessellate(
            LineLayout::default(),
            &[(0, 0), (0, 0), (10, 0), (10, 0), (10, 0)],
        );
        assert_eq!(group.vertices.len(), 4);
    }

    #[test]
    fn degenerate_lines_are_ignored() {
        let group = tessellate(LineLayout::default(), &[(5, 5), (5, 5)]);
        assert!(group.vertices.is_empty());
    }

    #[test]
    fn bevel_join_adds_vertices() {
        let corner = [(0, 0), (100, 0), (100, 100)];
        let miter = tessellate(LineLayout::default(), &corner);
        let bevel = tessellate(
            LineLayout {
                line_join: LineJoin::Bevel,
                ..Default::default()
            },
            &corner,
        );

        assert_eq!(miter.vertices.len(), 6);
        assert_eq!(bevel.vertices.len(), 8);
        assert_valid(&bevel);
    }

    #[test]
    fn miter_above_limit_falls_back_to_bevel() {
        let corner = [(0, 0), (100, 0), (100, 100)];
        let group = tessellate(
            LineLayout {
                line_miter_limit: 1.2,
                ..Default::default()
            },
            &corner,
        );
        assert_eq!(group.vertices.len(), 8);
    }

    #[test]
    fn round_caps_are_flagged() {
        let group = tessellate(
            LineLayout {
                line_cap: LineCap::Round,
                ..Default::default()
            },
            &[(0, 0), (100, 0)],
        );

        assert_eq!(group.vertices.len(), 8);
        assert!(group.vertices[0].is_round());
        assert_eq!(group.vertices[0].direction(), -1);
        assert_eq!(group.vertices[6].direction(), 1);
        assert!(group.vertices[6].is_round());
        assert_valid(&group);
    }

    #[test]
    fn square_caps_extend_along_the_line() {
        let group = tessellate(
            LineLayout {
                line_cap: LineCap::Square,
                ..Default::default()
            },
            &[(0, 0), (100, 0)],
        );

        assert_eq!(group.vertices.len(), 4);
        // Normal (0, 1) shifted backwards by one half width.
        assert_eq!(group.vertices[0].extrude(), Vector2::new(-1.0, 1.0));
        assert_eq!(group.vertices[2].extrude(), Vector2::new(1.0, 1.0));
    }

    #[test]
    fn closed_rings_use_butt_ends() {
        let ring = [(0, 0), (100, 0), (100, 100), (0, 100), (0, 0)];
        let group = tessellate(
            LineLayout {
                line_cap: LineCap::Round,
                ..Default::default()
            },
            &ring,
        );

        assert!(group.vertices.iter().all(|v| !v.is_round()));
        assert_valid(&group);
    }

    #[test]
    fn long_lines_are_split_across_groups() {
        let mut buffers = LayoutBuffers::new(64);
        let line: Vec<_> = (0..100).map(|i| Point2::new(i * 10, (i % 2) * 10)).collect();
        let layout = LineLayout::default();
        let added = LineTessellator::new(&layout, 1.0).add_feature(&mut buffers, 3, &[line], false);

        let groups = buffers.finish();
        assert!(groups.len() > 1);
        assert_eq!(
            groups.iter().map(|g| g.vertices.len()).sum::<usize>(),
            added
        );
        for group in &groups {
            assert!(group.vertices.len() <= 64);
            assert!(group.features.iter().all(|range| range.feature == 3));
            assert_valid(group);
        }
    }
}
