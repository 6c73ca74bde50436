//! Cameras and the per-frame view snapshot used for culling.
//!
//! # Example
//!
//! ```ignore
//! use thicket_render::*;
//! use glam::Vec3;
//!
//! let mut camera = Camera::perspective(60.0, 16.0 / 9.0, 0.1, 500.0);
//! camera.look_at(Vec3::new(0.0, 5.0, 10.0), Vec3::ZERO, Vec3::Y);
//!
//! let view = CullingView::from_camera(&mut camera, CameraKind::Game);
//! ```

use glam::{Mat4, Vec3};

/// Projection mode for a camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProjectionMode {
    Orthographic {
        left: f32,
        right: f32,
        bottom: f32,
        top: f32,
        near: f32,
        far: f32,
    },
    Perspective {
        fov_y_radians: f32,
        aspect_ratio: f32,
        near: f32,
        far: f32,
    },
}

/// A camera with cached view and projection matrices.
pub struct Camera {
    position: Vec3,
    target: Vec3,
    up: Vec3,
    projection: ProjectionMode,
    view_matrix: Mat4,
    projection_matrix: Mat4,
    view_projection_matrix: Mat4,
    /// Set when position/target/up/projection change
    dirty: bool,
}

impl Camera {
    fn with_projection(projection: ProjectionMode) -> Self {
        let mut camera = Self {
            position: Vec3::new(0.0, 5.0, 10.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            projection,
            view_matrix: Mat4::IDENTITY,
            projection_matrix: Mat4::IDENTITY,
            view_projection_matrix: Mat4::IDENTITY,
            dirty: true,
        };

        camera.update_matrices();
        camera
    }

    /// Create an orthographic camera centered on its view axis.
    pub fn orthographic(width: f32, height: f32, near: f32, far: f32) -> Self {
        Self::with_projection(ProjectionMode::Orthographic {
            left: -width / 2.0,
            right: width / 2.0,
            bottom: -height / 2.0,
            top: height / 2.0,
            near,
            far,
        })
    }

    /// Create a perspective camera.
    ///
    /// # Arguments
    ///
    /// * `fov_y_degrees` - Vertical field of view in degrees
    /// * `aspect_ratio` - Aspect ratio (width / height)
    /// * `near` - Near clip plane
    /// * `far` - Far clip plane
    pub fn perspective(fov_y_degrees: f32, aspect_ratio: f32, near: f32, far: f32) -> Self {
        Self::with_projection(ProjectionMode::Perspective {
            fov_y_radians: fov_y_degrees.to_radians(),
            aspect_ratio,
            near,
            far,
        })
    }

    /// Set the camera to look at a target from a position.
    pub fn look_at(&mut self, eye: Vec3, target: Vec3, up: Vec3) {
        self.position = eye;
        self.target = target;
        self.up = up;
        self.dirty = true;
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.dirty = true;
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// Normalized vector from position to target.
    pub fn forward(&self) -> Vec3 {
        (self.target - self.position).normalize()
    }

    pub fn set_projection(&mut self, projection: ProjectionMode) {
        self.projection = projection;
        self.dirty = true;
    }

    pub fn projection(&self) -> ProjectionMode {
        self.projection
    }

    /// Update the aspect ratio (only affects perspective cameras).
    pub fn set_aspect_ratio(&mut self, aspect_ratio: f32) {
        if let ProjectionMode::Perspective {
            fov_y_radians,
            near,
            far,
            ..
        } = self.projection
        {
            self.projection = ProjectionMode::Perspective {
                fov_y_radians,
                aspect_ratio,
                near,
                far,
            };
            self.dirty = true;
        }
    }

    pub fn view_matrix(&mut self) -> Mat4 {
        if self.dirty {
            self.update_matrices();
        }
        self.view_matrix
    }

    pub fn projection_matrix(&mut self) -> Mat4 {
        if self.dirty {
            self.update_matrices();
        }
        self.projection_matrix
    }

    /// Projection times view.
    pub fn view_projection_matrix(&mut self) -> Mat4 {
        if self.dirty {
            self.update_matrices();
        }
        self.view_projection_matrix
    }

    fn update_matrices(&mut self) {
        self.view_matrix = Mat4::look_at_rh(self.position, self.target, self.up);

        // wgpu clip space: depth in [0, 1], 0 at the near plane
        self.projection_matrix = match self.projection {
            ProjectionMode::Orthographic {
                left,
                right,
                bottom,
                top,
                near,
                far,
            } => Mat4::orthographic_rh(left, right, bottom, top, near, far),
            ProjectionMode::Perspective {
                fov_y_radians,
                aspect_ratio,
                near,
                far,
            } => Mat4::perspective_rh(fov_y_radians, aspect_ratio, near, far),
        };

        self.view_projection_matrix = self.projection_matrix * self.view_matrix;
        self.dirty = false;
    }
}

/// What a camera renders for. Occlusion culling only runs for [`CameraKind::Game`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CameraKind {
    /// The main view of the running application.
    #[default]
    Game,
    /// An editor scene view.
    SceneView,
    /// Asset or material previews.
    Preview,
    /// Reflection probes and other offscreen captures.
    Reflection,
}

impl CameraKind {
    pub fn is_primary(&self) -> bool {
        matches!(self, CameraKind::Game)
    }
}

/// Immutable per-frame snapshot of a camera, as consumed by culling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CullingView {
    pub view_projection: Mat4,
    /// World-space camera position
    pub position: Vec3,
    pub kind: CameraKind,
}

impl CullingView {
    pub fn new(view_projection: Mat4, position: Vec3, kind: CameraKind) -> Self {
        Self {
            view_projection,
            position,
            kind,
        }
    }

    pub fn from_camera(camera: &mut Camera, kind: CameraKind) -> Self {
        Self::new(camera.view_projection_matrix(), camera.position(), kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn test_perspective_camera() {
        let mut camera = Camera::perspective(60.0, 16.0 / 9.0, 0.1, 100.0);
        camera.look_at(Vec3::new(0.0, 5.0, 10.0), Vec3::ZERO, Vec3::Y);

        let view_proj = camera.view_projection_matrix();
        assert!(!view_proj.is_nan());
    }

    #[test]
    fn test_depth_range_is_zero_to_one() {
        let mut camera = Camera::perspective(60.0, 1.0, 1.0, 100.0);
        camera.look_at(Vec3::ZERO, Vec3::new(0.0, 0.0, -1.0), Vec3::Y);
        let vp = camera.view_projection_matrix();

        let near = vp * Vec4::new(0.0, 0.0, -1.0, 1.0);
        let far = vp * Vec4::new(0.0, 0.0, -100.0, 1.0);
        assert!((near.z / near.w).abs() < 1e-5);
        assert!((far.z / far.w - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_aspect_ratio_marks_dirty() {
        let mut camera = Camera::perspective(60.0, 1.0, 0.1, 100.0);
        let before = camera.projection_matrix();
        camera.set_aspect_ratio(2.0);
        assert_ne!(camera.projection_matrix(), before);
    }

    #[test]
    fn test_culling_view_from_camera() {
        let mut camera = Camera::orthographic(800.0, 600.0, 0.1, 100.0);
        camera.look_at(Vec3::new(0.0, 0.0, 1.0), Vec3::ZERO, Vec3::Y);

        let view = CullingView::from_camera(&mut camera, CameraKind::SceneView);
        assert_eq!(view.position, Vec3::new(0.0, 0.0, 1.0));
        assert!(!view.kind.is_primary());
        assert_eq!(view.view_projection, camera.view_projection_matrix());
    }
}
