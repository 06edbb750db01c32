/// Camera and projection utilities
use nalgebra::{Matrix4, Point3, Rotation3, Unit, Vector3, Vector4};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bounds::Aabb;
use crate::picking::Ray;

/// Closest the eye may get to the focal point.
pub const MIN_DISTANCE: f32 = 1e-4;

/// Projection mode for rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectionMode {
    Orthographic,
    Perspective,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CameraError {
    #[error("degenerate camera: {0}")]
    Degenerate(String),
}

/// Camera configuration for 3D rendering
///
/// Eye, focal point and up vector are private so the view can never
/// collapse: the eye stays at least [`MIN_DISTANCE`] from the focal point
/// and `up` stays orthogonal to the view direction.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    position: Point3<f32>,
    target: Point3<f32>,
    up: Vector3<f32>,
    /// Vertical field of view in radians.
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
    pub mode: ProjectionMode,
    /// Center and radius of the last fitted bounds; clip planes follow it.
    subject: Option<(Point3<f32>, f32)>,
}

/// Serializable copy of the camera parameters carried by every frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraSnapshot {
    pub position: [f32; 3],
    pub focal_point: [f32; 3],
    pub up: [f32; 3],
    pub fov: f32,
    pub mode: ProjectionMode,
}

impl Camera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            position: Point3::new(0.0, 0.0, 5.0),
            target: Point3::new(0.0, 0.0, 0.0),
            up: Vector3::new(0.0, 1.0, 0.0),
            fov: std::f32::consts::PI / 4.0, // 45 degrees
            aspect: width.max(1) as f32 / height.max(1) as f32,
            near: 0.1,
            far: 100.0,
            mode: ProjectionMode::Perspective,
            subject: None,
        }
    }

    pub fn position(&self) -> Point3<f32> {
        self.position
    }

    pub fn target(&self) -> Point3<f32> {
        self.target
    }

    pub fn up(&self) -> Vector3<f32> {
        self.up
    }

    pub fn distance(&self) -> f32 {
        (self.target - self.position).norm()
    }

    /// Unit vector from the eye towards the focal point.
    pub fn forward(&self) -> Vector3<f32> {
        (self.target - self.position).normalize()
    }

    pub fn right(&self) -> Vector3<f32> {
        self.forward().cross(&self.up).normalize()
    }

    /// Place the camera, rejecting coincident eye/target or an up vector
    /// parallel to the view direction.
    pub fn set_view(
        &mut self,
        position: Point3<f32>,
        target: Point3<f32>,
        up: Vector3<f32>,
    ) -> Result<(), CameraError> {
        let offset = target - position;
        if !offset.iter().chain(up.iter()).all(|c| c.is_finite()) {
            return Err(CameraError::Degenerate("non-finite view parameters".to_string()));
        }
        if offset.norm() < MIN_DISTANCE {
            return Err(CameraError::Degenerate(
                "focal point coincides with the eye position".to_string(),
            ));
        }
        let forward = offset.normalize();
        let up = (up - forward * up.dot(&forward))
            .try_normalize(1e-6)
            .ok_or_else(|| {
                CameraError::Degenerate("up vector is parallel to the view direction".to_string())
            })?;

        self.position = position;
        self.target = target;
        self.up = up;
        self.update_clip_planes();
        Ok(())
    }

    /// Create the view matrix (camera transformation)
    pub fn view_matrix(&self) -> Matrix4<f32> {
        Matrix4::look_at_rh(&self.position, &self.target, &self.up)
    }

    /// Create the projection matrix
    pub fn projection_matrix(&self) -> Matrix4<f32> {
        match self.mode {
            ProjectionMode::Perspective => {
                Matrix4::new_perspective(self.aspect, self.fov, self.near, self.far)
            }
            ProjectionMode::Orthographic => {
                let height = self.distance();
                let width = height * self.aspect;
                Matrix4::new_orthographic(
                    -width / 2.0,
                    width / 2.0,
                    -height / 2.0,
                    height / 2.0,
                    self.near,
                    self.far,
                )
            }
        }
    }

    /// Project a 3D point to 2D screen space
    ///
    /// Returns `(x, y, depth)` with depth in normalized device units, or `None`
    /// when the point is behind the eye or outside the view volume.
    pub fn project_to_screen(
        &self,
        point: &Point3<f32>,
        model_matrix: &Matrix4<f32>,
        width: u32,
        height: u32,
    ) -> Option<(f32, f32, f32)> {
        let mvp = self.projection_matrix() * self.view_matrix() * model_matrix;
        project_with(&mvp, point, width, height)
    }

    /// Move the camera so `bounds` fills the view. `margin` scales the
    /// distance: 1.0 is a tight fit, larger values leave room around it.
    ///
    /// The viewing direction and up vector are kept.
    pub fn fit_to_bounds(&mut self, bounds: &Aabb, margin: f32) {
        let radius = match bounds.radius() {
            r if r > 1e-6 => r,
            _ => 0.5,
        };
        let margin = if margin.is_finite() && margin > 0.0 { margin } else { 1.0 };

        let distance = match self.mode {
            ProjectionMode::Perspective => {
                let half_v = self.fov / 2.0;
                let half_h = (half_v.tan() * self.aspect).atan();
                radius / half_v.min(half_h).sin()
            }
            ProjectionMode::Orthographic => 2.0 * radius / self.aspect.min(1.0),
        } * margin;

        let forward = self.forward();
        self.target = bounds.center();
        self.position = self.target - forward * distance.max(MIN_DISTANCE);
        self.subject = Some((bounds.center(), radius));
        self.update_clip_planes();
    }

    /// Keep the fitted subject between the near and far planes from the
    /// current eye position.
    fn update_clip_planes(&mut self) {
        let Some((center, radius)) = self.subject else {
            return;
        };
        let distance = (center - self.position).norm().max(self.distance());
        let reach = radius * 1.5;
        self.near = (distance - reach).max(distance * 0.001).max(MIN_DISTANCE * 0.1);
        self.far = distance + reach;
    }

    /// Rotate the eye around the focal point: `yaw` about the up vector,
    /// `pitch` about the camera's right axis (radians).
    pub fn orbit(&mut self, yaw: f32, pitch: f32) {
        if !(yaw.is_finite() && pitch.is_finite()) {
            return;
        }
        let offset = self.position - self.target;
        let yaw_rot = Rotation3::from_axis_angle(&Unit::new_normalize(self.up), -yaw);
        let offset = yaw_rot * offset;

        let right = Unit::new_normalize((-offset).cross(&self.up));
        let pitch_rot = Rotation3::from_axis_angle(&right, pitch);
        let offset = pitch_rot * offset;
        let up = pitch_rot * self.up;

        // Re-orthogonalize against accumulated rounding.
        let forward = (-offset).normalize();
        if let Some(up) = (up - forward * up.dot(&forward)).try_normalize(1e-6) {
            self.up = up;
            self.position = self.target + offset;
            self.update_clip_planes();
        }
    }

    /// Translate eye and focal point in the view plane. `dx`/`dy` are
    /// fractions of the current eye distance.
    pub fn pan(&mut self, dx: f32, dy: f32) {
        if !(dx.is_finite() && dy.is_finite()) {
            return;
        }
        let shift = (self.right() * dx + self.up * dy) * self.distance();
        self.position += shift;
        self.target += shift;
        self.update_clip_planes();
    }

    /// Dolly towards the focal point; `factor > 1` moves closer.
    pub fn zoom(&mut self, factor: f32) {
        if !(factor.is_finite() && factor > 0.0) {
            return;
        }
        let distance = (self.distance() / factor).max(MIN_DISTANCE);
        self.position = self.target - self.forward() * distance;
        self.update_clip_planes();
    }

    /// Ray from the eye through pixel `(x, y)` of a `width` x `height` frame.
    pub fn ray_through(&self, x: f32, y: f32, width: u32, height: u32) -> Option<Ray> {
        let ndc_x = 2.0 * x / width.max(1) as f32 - 1.0;
        let ndc_y = 1.0 - 2.0 * y / height.max(1) as f32;
        let inverse = (self.projection_matrix() * self.view_matrix()).try_inverse()?;

        let near = inverse.transform_point(&Point3::new(ndc_x, ndc_y, -1.0));
        let far = inverse.transform_point(&Point3::new(ndc_x, ndc_y, 1.0));
        let direction = (far - near).try_normalize(1e-9)?;
        Some(Ray::new(near, direction))
    }

    pub fn snapshot(&self) -> CameraSnapshot {
        CameraSnapshot {
            position: self.position.into(),
            focal_point: self.target.into(),
            up: self.up.into(),
            fov: self.fov,
            mode: self.mode,
        }
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(800, 600)
    }
}

/// Project through a precomputed model-view-projection matrix.
pub fn project_with(
    mvp: &Matrix4<f32>,
    point: &Point3<f32>,
    width: u32,
    height: u32,
) -> Option<(f32, f32, f32)> {
    let (x, y, depth) = project_unclipped(mvp, point, width, height)?;

    // Clip test
    let inside_x = (0.0..=width as f32).contains(&x);
    let inside_y = (0.0..=height as f32).contains(&y);
    if !inside_x || !inside_y || !(-1.0..=1.0).contains(&depth) {
        return None;
    }
    Some((x, y, depth))
}

/// Like [`project_with`] but only rejects points behind the eye; screen
/// coordinates may fall outside the frame and depth outside `[-1, 1]`.
pub fn project_unclipped(
    mvp: &Matrix4<f32>,
    point: &Point3<f32>,
    width: u32,
    height: u32,
) -> Option<(f32, f32, f32)> {
    let clip: Vector4<f32> = mvp * point.to_homogeneous();

    // Behind (or on) the eye plane.
    if clip.w <= 1e-6 {
        return None;
    }

    let ndc_x = clip.x / clip.w;
    let ndc_y = clip.y / clip.w;
    let depth = clip.z / clip.w;

    // Convert to screen space
    let screen_x = (ndc_x + 1.0) * 0.5 * width as f32;
    let screen_y = (1.0 - ndc_y) * 0.5 * height as f32;

    Some((screen_x, screen_y, depth))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_creation() {
        let camera = Camera::new(800, 600);
        assert_eq!(camera.mode, ProjectionMode::Perspective);
        assert!((camera.aspect - 800.0 / 600.0).abs() < 1e-6);
    }

    #[test]
    fn test_view_matrix() {
        let camera = Camera::new(800, 600);
        let view = camera.view_matrix();
        // View matrix should be non-zero
        assert!(view.norm() > 0.0);
    }

    #[test]
    fn test_set_view_rejects_degenerate() {
        let mut camera = Camera::default();
        let p = Point3::new(1.0, 1.0, 1.0);
        assert!(camera.set_view(p, p, Vector3::y()).is_err());
        assert!(camera
            .set_view(Point3::new(0.0, 5.0, 0.0), Point3::origin(), Vector3::y())
            .is_err());
        assert!(camera
            .set_view(Point3::new(0.0, 0.0, 3.0), Point3::origin(), Vector3::new(0.0, 1.0, 1.0))
            .is_ok());
        assert!(camera.up().dot(&camera.forward()).abs() < 1e-6);
    }

    #[test]
    fn test_fit_to_bounds_shows_every_corner() {
        let mut camera = Camera::new(120, 40);
        let bounds = Aabb::new(Point3::new(-1.0, -2.0, -0.5), Point3::new(3.0, 1.0, 0.5));
        camera.fit_to_bounds(&bounds, 1.0);

        assert!((camera.target() - bounds.center()).norm() < 1e-5);
        for corner in bounds.corners() {
            assert!(
                camera
                    .project_to_screen(&corner, &Matrix4::identity(), 120, 40)
                    .is_some(),
                "corner {:?} is outside the view",
                corner
            );
        }
    }

    #[test]
    fn test_zoom_never_reaches_target() {
        let mut camera = Camera::default();
        for _ in 0..100 {
            camera.zoom(1000.0);
        }
        assert!(camera.distance() >= MIN_DISTANCE * 0.99);
        camera.zoom(0.0);
        camera.zoom(f32::NAN);
        assert!(camera.distance() > 0.0);
    }

    #[test]
    fn test_zoom_out_keeps_fitted_bounds_in_depth_range() {
        let mut camera = Camera::new(80, 48);
        let bounds = Aabb::new(Point3::new(-1.0, -1.0, -1.0), Point3::new(1.0, 1.0, 1.0));
        camera.fit_to_bounds(&bounds, 1.1);

        for factor in [0.25, 0.1, 4.0, 40.0] {
            camera.zoom(factor);
            assert!(camera.near > 0.0 && camera.near < camera.far);
            let center = camera.project_to_screen(&Point3::origin(), &Matrix4::identity(), 80, 48);
            assert!(center.is_some(), "center clipped after zoom {}", factor);
        }
    }

    #[test]
    fn test_partly_offscreen_point_projects_unclipped() {
        let mut camera = Camera::new(100, 100);
        let bounds = Aabb::new(Point3::new(-1.0, -1.0, -1.0), Point3::new(1.0, 1.0, 1.0));
        camera.fit_to_bounds(&bounds, 1.0);
        camera.zoom(10.0);

        let mvp = camera.projection_matrix() * camera.view_matrix();
        // In front of the eye, well outside the top-right of the frame.
        let corner = Point3::new(1.0, 1.0, -1.0);
        assert!(project_with(&mvp, &corner, 100, 100).is_none());
        let (x, y, _) = project_unclipped(&mvp, &corner, 100, 100).unwrap();
        assert!(x > 100.0 && y < 0.0);
    }

    #[test]
    fn test_orbit_keeps_distance_and_up() {
        let mut camera = Camera::default();
        let before = camera.distance();
        camera.orbit(0.7, 0.4);
        camera.orbit(-0.2, 1.3);
        assert!((camera.distance() - before).abs() < 1e-4);
        assert!(camera.up().dot(&camera.forward()).abs() < 1e-4);
        assert!((camera.target() - Point3::origin()).norm() < 1e-6);
    }

    #[test]
    fn test_pan_moves_both_points() {
        let mut camera = Camera::default();
        camera.pan(0.1, 0.0);
        assert!((camera.target().x - 0.5).abs() < 1e-5);
        assert!((camera.distance() - 5.0).abs() < 1e-5);
    }

    #[test]
    fn test_center_ray_hits_focal_axis() {
        let camera = Camera::new(100, 100);
        let ray = camera.ray_through(50.0, 50.0, 100, 100).unwrap();
        assert!((ray.direction - Vector3::new(0.0, 0.0, -1.0)).norm() < 1e-4);
    }

    #[test]
    fn test_points_behind_eye_are_clipped() {
        let camera = Camera::default();
        let behind = Point3::new(0.0, 0.0, 10.0);
        assert!(camera
            .project_to_screen(&behind, &Matrix4::identity(), 100, 100)
            .is_none());
    }
}
