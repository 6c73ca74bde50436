//! Per-instance frustum and Hi-Z occlusion culling.
//!
//! The cull kernel tests every instance's world-space bounds and appends the
//! indices of survivors to the visible-index buffer through an atomic
//! counter. The counter is then copied into the instance count of the
//! indirect arguments, so no result ever travels back to the host.
//!
//! [`is_instance_visible`] is the CPU mirror of the kernel.

use bitflags::bitflags;
use glam::{Mat4, Vec2, Vec3, Vec4};
use thicket_core::math::Aabb;

bitflags! {
    /// Culling stages enabled for one dispatch.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CullingFlags: u32 {
        const FRUSTUM = 1 << 0;
        const HI_Z = 1 << 1;
    }
}

/// Culling toggles of an instance set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CullingSettings {
    pub frustum: bool,
    /// Only honored while the pipeline publishes a pyramid
    pub hi_z: bool,
}

impl Default for CullingSettings {
    fn default() -> Self {
        Self {
            frustum: true,
            hi_z: false,
        }
    }
}

impl CullingSettings {
    /// Both stages off: every instance is visible.
    pub const DISABLED: Self = Self {
        frustum: false,
        hi_z: false,
    };

    pub fn flags(&self) -> CullingFlags {
        let mut flags = CullingFlags::empty();
        flags.set(CullingFlags::FRUSTUM, self.frustum);
        flags.set(CullingFlags::HI_Z, self.hi_z);
        flags
    }
}

/// Uniform block of the cull kernel (`instance_cull.wgsl`).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CullingUniforms {
    pub view_projection: [[f32; 4]; 4],
    pub local_to_world: [[f32; 4]; 4],
    pub world_to_local: [[f32; 4]; 4],
    /// Left, right, bottom, top, near, far; normalized, pointing inwards
    pub frustum_planes: [[f32; 4]; 6],
    pub camera_position: [f32; 4],
    pub mesh_center: [f32; 4],
    pub mesh_extents: [f32; 4],
    pub instance_count: u32,
    /// [`CullingFlags`] bits
    pub flags: u32,
    /// Side of Hi-Z level 0, zero without a pyramid
    pub hi_z_size: u32,
    pub hi_z_levels: u32,
}

static_assertions::const_assert_eq!(std::mem::size_of::<CullingUniforms>(), 352);

/// Inputs of one cull dispatch.
#[derive(Debug, Clone, Copy)]
pub struct CullingParams {
    pub view_projection: Mat4,
    pub camera_position: Vec3,
    pub local_to_world: Mat4,
    pub mesh_bounds: Aabb,
    pub instance_count: u32,
    pub flags: CullingFlags,
    /// (size, level count) of the pyramid to test against
    pub hi_z: Option<(u32, u32)>,
}

impl CullingParams {
    pub fn uniforms(&self) -> CullingUniforms {
        let mut flags = self.flags;
        let (hi_z_size, hi_z_levels) = match self.hi_z {
            Some((size, levels)) if size > 0 && levels > 0 => (size, levels),
            _ => {
                flags.remove(CullingFlags::HI_Z);
                (0, 0)
            }
        };

        let center = self.mesh_bounds.center();
        let extents = self.mesh_bounds.extents();

        CullingUniforms {
            view_projection: self.view_projection.to_cols_array_2d(),
            local_to_world: self.local_to_world.to_cols_array_2d(),
            world_to_local: self.local_to_world.inverse().to_cols_array_2d(),
            frustum_planes: extract_frustum_planes(&self.view_projection),
            camera_position: self.camera_position.extend(1.0).to_array(),
            mesh_center: center.extend(0.0).to_array(),
            mesh_extents: extents.extend(0.0).to_array(),
            instance_count: self.instance_count,
            flags: flags.bits(),
            hi_z_size,
            hi_z_levels,
        }
    }
}

/// Frustum planes of a view-projection matrix with a 0..1 depth range.
pub fn extract_frustum_planes(view_projection: &Mat4) -> [[f32; 4]; 6] {
    let r0 = view_projection.row(0);
    let r1 = view_projection.row(1);
    let r2 = view_projection.row(2);
    let r3 = view_projection.row(3);

    let planes = [r3 + r0, r3 - r0, r3 + r1, r3 - r1, r2, r3 - r2];
    planes.map(|plane| {
        let length = plane.truncate().length();
        if length > 0.0 {
            (plane / length).to_array()
        } else {
            plane.to_array()
        }
    })
}

/// Source of conservative (farthest) depth for the Hi-Z test.
pub trait HiZLookup {
    /// Depth stored at texel `(x, y)` of `level`.
    fn load(&self, level: u32, x: u32, y: u32) -> f32;
}

/// World-space bounds of one instance.
pub fn instance_world_bounds(uniforms: &CullingUniforms, instance: &Mat4) -> Aabb {
    let local_to_world = Mat4::from_cols_array_2d(&uniforms.local_to_world);
    let model = local_to_world * *instance;
    let center = Vec4::from_array(uniforms.mesh_center).truncate();
    let extents = Vec4::from_array(uniforms.mesh_extents).truncate();

    let world_center = model.transform_point3(center);
    let world_extents = model.x_axis.truncate().abs() * extents.x
        + model.y_axis.truncate().abs() * extents.y
        + model.z_axis.truncate().abs() * extents.z;
    Aabb::from_center_extents(world_center, world_extents)
}

/// Whether a box lies at least partly inside all frustum planes.
pub fn intersects_frustum(planes: &[[f32; 4]; 6], bounds: &Aabb) -> bool {
    let center = bounds.center();
    let extents = bounds.extents();
    planes.iter().all(|plane| {
        let normal = Vec3::new(plane[0], plane[1], plane[2]);
        let distance = normal.dot(center) + plane[3];
        let radius = normal.abs().dot(extents);
        distance + radius >= 0.0
    })
}

/// Whether any part of `bounds` may be nearer than the occluders recorded in the pyramid.
pub fn passes_hi_z(uniforms: &CullingUniforms, bounds: &Aabb, hi_z: &dyn HiZLookup) -> bool {
    let camera = Vec4::from_array(uniforms.camera_position).truncate();
    if bounds.contains_point(camera) {
        return true;
    }

    let view_projection = Mat4::from_cols_array_2d(&uniforms.view_projection);
    let mut ndc_min = Vec2::splat(f32::MAX);
    let mut ndc_max = Vec2::splat(f32::MIN);
    let mut nearest_depth = f32::MAX;

    for corner in bounds.corners() {
        let clip = view_projection * corner.extend(1.0);
        if clip.w <= 1e-5 {
            // Straddles the camera plane
            return true;
        }
        let ndc = clip.truncate() / clip.w;
        ndc_min = ndc_min.min(ndc.truncate());
        ndc_max = ndc_max.max(ndc.truncate());
        nearest_depth = nearest_depth.min(ndc.z);
    }

    let ndc_min = ndc_min.clamp(Vec2::NEG_ONE, Vec2::ONE);
    let ndc_max = ndc_max.clamp(Vec2::NEG_ONE, Vec2::ONE);
    let uv_min = Vec2::new(ndc_min.x * 0.5 + 0.5, 0.5 - ndc_max.y * 0.5);
    let uv_max = Vec2::new(ndc_max.x * 0.5 + 0.5, 0.5 - ndc_min.y * 0.5);

    let size = uniforms.hi_z_size as f32;
    let footprint = (uv_max - uv_min) * size;
    let max_level = uniforms.hi_z_levels.saturating_sub(1);
    let level = (footprint.max_element().max(1.0).log2().ceil() as u32).min(max_level);

    let level_size = (uniforms.hi_z_size >> level).max(1);
    let last = level_size - 1;
    let to_texel = |uv: f32| ((uv * level_size as f32) as u32).min(last);
    let (x0, y0) = (to_texel(uv_min.x), to_texel(uv_min.y));
    let (x1, y1) = (to_texel(uv_max.x), to_texel(uv_max.y));

    // The coarsest level can still leave a footprint wider than 2x2
    if x1 - x0 > 1 || y1 - y0 > 1 {
        return true;
    }

    let occluder_depth = hi_z
        .load(level, x0, y0)
        .max(hi_z.load(level, x1, y0))
        .max(hi_z.load(level, x0, y1))
        .max(hi_z.load(level, x1, y1));

    nearest_depth <= occluder_depth
}

/// Visibility of one instance, as the cull kernel decides it.
pub fn is_instance_visible(
    uniforms: &CullingUniforms,
    instance: &Mat4,
    hi_z: Option<&dyn HiZLookup>,
) -> bool {
    let flags = CullingFlags::from_bits_truncate(uniforms.flags);
    if flags.is_empty() {
        return true;
    }

    let bounds = instance_world_bounds(uniforms, instance);

    if flags.contains(CullingFlags::FRUSTUM) && !intersects_frustum(&uniforms.frustum_planes, &bounds)
    {
        return false;
    }

    match hi_z {
        Some(hi_z) if flags.contains(CullingFlags::HI_Z) => passes_hi_z(uniforms, &bounds, hi_z),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ConstantDepth(f32);

    impl HiZLookup for ConstantDepth {
        fn load(&self, _level: u32, _x: u32, _y: u32) -> f32 {
            self.0
        }
    }

    fn view_projection() -> Mat4 {
        let projection = Mat4::perspective_rh(60f32.to_radians(), 1.0, 0.1, 100.0);
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO, Vec3::Y);
        projection * view
    }

    fn params(flags: CullingFlags) -> CullingParams {
        CullingParams {
            view_projection: view_projection(),
            camera_position: Vec3::new(0.0, 0.0, 10.0),
            local_to_world: Mat4::IDENTITY,
            mesh_bounds: Aabb::default(),
            instance_count: 1,
            flags,
            hi_z: Some((64, 4)),
        }
    }

    #[test]
    fn test_frustum_planes_contain_origin() {
        let planes = extract_frustum_planes(&view_projection());
        let origin = Aabb::from_center_extents(Vec3::ZERO, Vec3::splat(0.1));
        assert!(intersects_frustum(&planes, &origin));

        let behind = Aabb::from_center_extents(Vec3::new(0.0, 0.0, 20.0), Vec3::splat(0.1));
        assert!(!intersects_frustum(&planes, &behind));

        let far_left = Aabb::from_center_extents(Vec3::new(-500.0, 0.0, 0.0), Vec3::splat(1.0));
        assert!(!intersects_frustum(&planes, &far_left));
    }

    #[test]
    fn test_disabled_flags_pass_everything() {
        let uniforms = params(CullingFlags::empty()).uniforms();
        let behind = Mat4::from_translation(Vec3::new(0.0, 0.0, 50.0));
        assert!(is_instance_visible(&uniforms, &behind, None));
    }

    #[test]
    fn test_frustum_rejects_outside_instance() {
        let uniforms = params(CullingFlags::FRUSTUM).uniforms();
        assert!(is_instance_visible(&uniforms, &Mat4::IDENTITY, None));

        let behind = Mat4::from_translation(Vec3::new(0.0, 0.0, 50.0));
        assert!(!is_instance_visible(&uniforms, &behind, None));
    }

    #[test]
    fn test_frustum_uses_set_transform() {
        let mut params = params(CullingFlags::FRUSTUM);
        params.local_to_world = Mat4::from_translation(Vec3::new(0.0, 0.0, 40.0));
        let uniforms = params.uniforms();
        assert!(!is_instance_visible(&uniforms, &Mat4::IDENTITY, None));
    }

    #[test]
    fn test_hi_z_occludes_behind_near_wall() {
        let uniforms = params(CullingFlags::HI_Z).uniforms();
        let near_wall = ConstantDepth(0.5);
        // A box at the origin is much deeper than 0.5 in this projection
        assert!(!is_instance_visible(&uniforms, &Mat4::IDENTITY, Some(&near_wall)));

        let empty = ConstantDepth(1.0);
        assert!(is_instance_visible(&uniforms, &Mat4::IDENTITY, Some(&empty)));
    }

    #[test]
    fn test_hi_z_keeps_instance_containing_camera() {
        let uniforms = params(CullingFlags::HI_Z).uniforms();
        let around_camera = Mat4::from_scale_rotation_translation(
            Vec3::splat(4.0),
            glam::Quat::IDENTITY,
            Vec3::new(0.0, 0.0, 10.0),
        );
        assert!(is_instance_visible(&uniforms, &around_camera, Some(&ConstantDepth(0.0))));
    }

    #[test]
    fn test_hi_z_flag_dropped_without_pyramid() {
        let mut params = params(CullingFlags::FRUSTUM | CullingFlags::HI_Z);
        params.hi_z = None;
        let uniforms = params.uniforms();
        assert_eq!(uniforms.flags, CullingFlags::FRUSTUM.bits());
        assert_eq!(uniforms.hi_z_size, 0);
    }

    #[test]
    fn test_settings_flags() {
        assert_eq!(CullingSettings::DISABLED.flags(), CullingFlags::empty());
        assert_eq!(
            CullingSettings {
                frustum: true,
                hi_z: true
            }
            .flags(),
            CullingFlags::FRUSTUM | CullingFlags::HI_Z
        );
    }
}
