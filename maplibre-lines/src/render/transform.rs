//! Camera transform of the map view.

use cgmath::{Deg, Matrix2, Matrix4, Point2, Rad, Vector3};

use crate::{
    coords::{WorldTileCoords, Zoom},
    style::layer::TranslateAnchor,
};

#[rustfmt::skip]
pub const OPENGL_TO_WGPU_MATRIX: Matrix4<f64> = Matrix4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
);

/// Distance of the camera to the center of the viewport, in viewport heights.
pub const DEFAULT_ALTITUDE: f64 = 1.5;

const MAX_PITCH: Deg<f64> = Deg(60.0);

/// The view of the map for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    pub width: f64,
    pub height: f64,
    pub zoom: Zoom,
    /// Center of the viewport in world pixels at `zoom`.
    pub center: Point2<f64>,
    pitch: Rad<f64>,
    bearing: Rad<f64>,
    pub altitude: f64,
}

impl Transform {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            zoom: Zoom::default(),
            center: Point2::new(0.0, 0.0),
            pitch: Rad(0.0),
            bearing: Rad(0.0),
            altitude: DEFAULT_ALTITUDE,
        }
    }

    pub fn pitch(&self) -> Rad<f64> {
        self.pitch
    }

    /// Sets the pitch, clamped to `[0°, 60°]`.
    pub fn set_pitch<P: Into<Rad<f64>>>(&mut self, pitch: P) {
        let max: Rad<f64> = MAX_PITCH.into();
        self.pitch = Rad(pitch.into().0.clamp(0.0, max.0));
    }

    pub fn bearing(&self) -> Rad<f64> {
        self.bearing
    }

    pub fn set_bearing<P: Into<Rad<f64>>>(&mut self, bearing: P) {
        self.bearing = bearing.into();
    }

    /// Rotation of the map, the negated bearing.
    pub fn angle(&self) -> f64 {
        -self.bearing.0
    }

    pub fn fovy(&self) -> Rad<f64> {
        Rad(2.0 * (0.5 / self.altitude).atan())
    }

    pub fn camera_to_center_distance(&self) -> f64 {
        0.5 / (self.fovy().0 / 2.0).tan() * self.height
    }

    pub fn view_projection(&self) -> Matrix4<f64> {
        let half_fov = self.fovy().0 / 2.0;
        let distance = self.camera_to_center_distance();
        let ground_angle = std::f64::consts::FRAC_PI_2 + self.pitch.0;
        let top_half_surface_distance =
            half_fov.sin() * distance / (std::f64::consts::PI - ground_angle - half_fov).sin();

        // Calculate z distance of the farthest fragment that should be rendered.
        let furthest_distance =
            (std::f64::consts::FRAC_PI_2 - self.pitch.0).cos() * top_half_surface_distance + distance;
        let far_z = furthest_distance * 1.01;
        let near_z = self.height / 50.0;

        OPENGL_TO_WGPU_MATRIX
            * cgmath::perspective(self.fovy(), self.width / self.height, near_z, far_z)
            * Matrix4::from_nonuniform_scale(1.0, -1.0, 1.0)
            * Matrix4::from_translation(Vector3::new(0.0, 0.0, -distance))
            * Matrix4::from_angle_x(self.pitch)
            * Matrix4::from_angle_z(Rad(self.angle()))
            * Matrix4::from_translation(Vector3::new(-self.center.x, -self.center.y, 0.0))
    }

    /// Projects the tile units of `coords` into clip space.
    pub fn calculate_pos_matrix(&self, coords: &WorldTileCoords) -> Matrix4<f64> {
        self.view_projection() * coords.transform_for_zoom(self.zoom)
    }

    /// Applies a translation given in pixels to a position matrix. With the `viewport` anchor the
    /// translation is fixed to the screen and does not rotate with the map.
    pub fn translate_pos_matrix(
        &self,
        matrix: Matrix4<f64>,
        coords: &WorldTileCoords,
        translate: [f32; 2],
        anchor: TranslateAnchor,
    ) -> Matrix4<f64> {
        if translate[0] == 0.0 && translate[1] == 0.0 {
            return matrix;
        }

        let (mut x, mut y) = (translate[0] as f64, translate[1] as f64);
        if anchor == TranslateAnchor::Viewport {
            let angle = -self.angle();
            let (sin, cos) = angle.sin_cos();
            (x, y) = (x * cos - y * sin, x * sin + y * cos);
        }

        matrix
            * Matrix4::from_translation(Vector3::new(
                coords.pixels_to_tile_units(x, self.zoom),
                coords.pixels_to_tile_units(y, self.zoom),
                0.0,
            ))
    }

    /// Scales the y axis by `cos(pitch)` and rotates by the map angle.
    pub fn antialiasing_matrix(&self) -> Matrix2<f64> {
        Matrix2::new(1.0, 0.0, 0.0, self.pitch.0.cos()) * Matrix2::from_angle(Rad(self.angle()))
    }

    /// Relative difference between the distance a pixel spans at the top edge of the viewport and
    /// at its center. Zero without pitch.
    pub fn line_extra(&self) -> f64 {
        let top_edge_length =
            (self.height * self.height / 4.0 * (1.0 + self.altitude * self.altitude)).sqrt();
        let x = self.height / 2.0 * self.pitch.0.tan();
        (top_edge_length + x) / top_edge_length - 1.0
    }
}
