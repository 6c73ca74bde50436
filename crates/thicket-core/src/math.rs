//! Math types for the instancing pipeline.
//!
//! Re-exports the SIMD-accelerated [`glam`] types and adds [`Aabb`], the
//! axis-aligned box used for placement volumes and mesh bounds.
//!
//! [`glam`]: https://docs.rs/glam

pub mod fast {
    pub use glam::*;
}

pub use fast::*;

/// An axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn from_center_extents(center: Vec3, extents: Vec3) -> Self {
        Self {
            min: center - extents,
            max: center + extents,
        }
    }

    /// A cube of side `size` centered on the origin.
    pub fn cube(size: f32) -> Self {
        Self::from_center_extents(Vec3::ZERO, Vec3::splat(size * 0.5))
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Half the size along each axis.
    pub fn extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// Grow the box to include `point`.
    pub fn encapsulate(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let (min, max) = (self.min, self.max);
        [
            Vec3::new(min.x, min.y, min.z),
            Vec3::new(max.x, min.y, min.z),
            Vec3::new(min.x, max.y, min.z),
            Vec3::new(max.x, max.y, min.z),
            Vec3::new(min.x, min.y, max.z),
            Vec3::new(max.x, min.y, max.z),
            Vec3::new(min.x, max.y, max.z),
            Vec3::new(max.x, max.y, max.z),
        ]
    }

    /// The box enclosing all eight corners after transformation.
    pub fn transformed(&self, matrix: &Mat4) -> Self {
        let corners = self.corners();
        let first = matrix.transform_point3(corners[0]);
        let mut result = Self::new(first, first);
        for corner in &corners[1..] {
            result.encapsulate(matrix.transform_point3(*corner));
        }
        result
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::from_center_extents(Vec3::ZERO, Vec3::splat(0.5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center_extents() {
        let aabb = Aabb::new(Vec3::new(-10.0, 0.0, 2.0), Vec3::new(10.0, 4.0, 6.0));
        assert_eq!(aabb.center(), Vec3::new(0.0, 2.0, 4.0));
        assert_eq!(aabb.extents(), Vec3::new(10.0, 2.0, 2.0));
        assert_eq!(Aabb::from_center_extents(aabb.center(), aabb.extents()), aabb);
    }

    #[test]
    fn test_contains_point() {
        let aabb = Aabb::cube(2.0);
        assert!(aabb.contains_point(Vec3::ZERO));
        assert!(aabb.contains_point(Vec3::ONE));
        assert!(!aabb.contains_point(Vec3::new(1.01, 0.0, 0.0)));
    }

    #[test]
    fn test_transformed_translation() {
        let aabb = Aabb::cube(2.0);
        let moved = aabb.transformed(&Mat4::from_translation(Vec3::new(5.0, 0.0, 0.0)));
        assert_eq!(moved.center(), Vec3::new(5.0, 0.0, 0.0));
        assert_eq!(moved.extents(), Vec3::ONE);
    }

    #[test]
    fn test_transformed_rotation_grows() {
        let aabb = Aabb::cube(2.0);
        let rotated = aabb.transformed(&Mat4::from_rotation_y(std::f32::consts::FRAC_PI_4));
        assert!(rotated.extents().x > 1.4);
        assert!((rotated.extents().y - 1.0).abs() < 1e-5);
    }
}
