//! Procedural instance placement.
//!
//! The position kernel writes one local-space transform per instance. Each
//! instance draws its translation, uniform scale and three Euler angles from
//! a hash of `(seed, index)`, so the same parameters always reproduce the
//! same layout and positions stay stable until a parameter changes.
//!
//! [`place_instance`] is the CPU mirror of the kernel.

use std::fmt;

use glam::{Mat3, Mat4, Vec2, Vec3};
use thicket_core::math::Aabb;
use thicket_test_utils::GpuBuffer;

use crate::commands::{CommandList, GpuCommand, INSTANCE_WORKGROUP_SIZE, workgroup_count};

/// Size of one transform in the positions buffer.
pub const TRANSFORM_STRIDE: u64 = std::mem::size_of::<[[f32; 4]; 4]>() as u64;

/// Parameters of the volume placement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacementParams {
    /// Translations are drawn inside this box, in the set's local space
    pub volume: Aabb,
    pub seed: u32,
    /// Uniform scale range (min, max)
    pub size_range: Vec2,
    /// Rotation ranges in degrees (min, max), one per axis
    pub rotation_x: Vec2,
    pub rotation_y: Vec2,
    pub rotation_z: Vec2,
}

impl Default for PlacementParams {
    fn default() -> Self {
        Self {
            volume: Aabb::cube(20.0),
            seed: 0,
            size_range: Vec2::ONE,
            rotation_x: Vec2::ZERO,
            rotation_y: Vec2::ZERO,
            rotation_z: Vec2::ZERO,
        }
    }
}

impl PlacementParams {
    pub fn new(volume: Aabb) -> Self {
        Self {
            volume,
            ..Default::default()
        }
    }

    pub fn with_seed(mut self, seed: u32) -> Self {
        self.seed = seed;
        self
    }

    /// Use the magnitude of a signed seed.
    pub fn with_signed_seed(mut self, seed: i32) -> Self {
        self.seed = seed.unsigned_abs();
        self
    }

    pub fn with_size_range(mut self, min: f32, max: f32) -> Self {
        self.size_range = Vec2::new(min, max);
        self
    }

    pub fn with_rotation_ranges(mut self, x: Vec2, y: Vec2, z: Vec2) -> Self {
        self.rotation_x = x;
        self.rotation_y = y;
        self.rotation_z = z;
        self
    }

    /// Kernel uniforms for these parameters.
    pub fn uniforms(&self, mesh_bounds: &Aabb, instance_count: u32) -> PlacementUniforms {
        let min = self.volume.min;
        let max = self.volume.max;
        let center = mesh_bounds.center();
        let extents = mesh_bounds.extents();

        PlacementUniforms {
            min_bound: [min.x, min.y, min.z, self.size_range.x],
            max_bound: [max.x, max.y, max.z, self.size_range.y],
            rotation_x: [self.rotation_x.x, self.rotation_x.y, 0.0, 0.0],
            rotation_y: [self.rotation_y.x, self.rotation_y.y, 0.0, 0.0],
            rotation_z: [self.rotation_z.x, self.rotation_z.y, 0.0, 0.0],
            mesh_center: [center.x, center.y, center.z, 0.0],
            mesh_extents: [extents.x, extents.y, extents.z, 0.0],
            seed: self.seed,
            instance_count,
            _padding: [0; 2],
        }
    }
}

/// Uniform block of the position kernel (`instance_position.wgsl`).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PlacementUniforms {
    /// xyz = volume min, w = minimum scale
    pub min_bound: [f32; 4],
    /// xyz = volume max, w = maximum scale
    pub max_bound: [f32; 4],
    pub rotation_x: [f32; 4],
    pub rotation_y: [f32; 4],
    pub rotation_z: [f32; 4],
    pub mesh_center: [f32; 4],
    pub mesh_extents: [f32; 4],
    pub seed: u32,
    pub instance_count: u32,
    pub _padding: [u32; 2],
}

static_assertions::const_assert_eq!(std::mem::size_of::<PlacementUniforms>(), 128);

/// PCG hash, matching `pcg_hash` in the position kernel.
pub const fn pcg_hash(input: u32) -> u32 {
    let state = input.wrapping_mul(747_796_405).wrapping_add(2_891_336_453);
    let word = ((state >> ((state >> 28) + 4)) ^ state).wrapping_mul(277_803_737);
    (word >> 22) ^ word
}

/// Sequential random numbers for one instance.
struct InstanceRng {
    state: u32,
}

impl InstanceRng {
    fn new(seed: u32, index: u32) -> Self {
        Self {
            state: pcg_hash(seed.wrapping_add(pcg_hash(index))),
        }
    }

    /// Uniform float in [0, 1) with 24 bits of precision.
    fn next_unit(&mut self) -> f32 {
        self.state = pcg_hash(self.state);
        (self.state >> 8) as f32 / 16_777_216.0
    }

    fn next_range(&mut self, min: f32, max: f32) -> f32 {
        let t = self.next_unit();
        min + (max - min) * t
    }
}

/// Transform of instance `index`, as the position kernel computes it.
///
/// The sampled point is where the center of the mesh bounds lands, after
/// scaling and rotation about the mesh origin.
pub fn place_instance(uniforms: &PlacementUniforms, index: u32) -> Mat4 {
    let mut rng = InstanceRng::new(uniforms.seed, index);
    let min = uniforms.min_bound;
    let max = uniforms.max_bound;

    let point = Vec3::new(
        rng.next_range(min[0], max[0]),
        rng.next_range(min[1], max[1]),
        rng.next_range(min[2], max[2]),
    );
    let scale = rng.next_range(min[3], max[3]);
    let rx = rng.next_range(uniforms.rotation_x[0], uniforms.rotation_x[1]);
    let ry = rng.next_range(uniforms.rotation_y[0], uniforms.rotation_y[1]);
    let rz = rng.next_range(uniforms.rotation_z[0], uniforms.rotation_z[1]);

    let rotation = Mat3::from_rotation_y(ry.to_radians())
        * Mat3::from_rotation_x(rx.to_radians())
        * Mat3::from_rotation_z(rz.to_radians());
    let center = Vec3::from_slice(&uniforms.mesh_center[..3]);
    let translation = point - rotation * (center * scale);

    let mut linear = rotation;
    linear.x_axis *= scale;
    linear.y_axis *= scale;
    linear.z_axis *= scale;

    Mat4::from_cols(
        linear.x_axis.extend(0.0),
        linear.y_axis.extend(0.0),
        linear.z_axis.extend(0.0),
        translation.extend(1.0),
    )
}

/// Produces the per-instance transforms of a set.
pub trait PositionStrategy: fmt::Debug + Send + Sync {
    /// Record the work that fills `positions` with `instance_count` transforms.
    fn record(
        &self,
        mesh_bounds: &Aabb,
        instance_count: u32,
        positions: &GpuBuffer,
        commands: &mut CommandList,
    );

    /// Local-space box the instances are placed in, if known.
    fn placement_volume(&self) -> Option<Aabb> {
        None
    }
}

/// Random placement inside an axis-aligned volume.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VolumePlacement {
    pub params: PlacementParams,
}

impl VolumePlacement {
    pub fn new(params: PlacementParams) -> Self {
        Self { params }
    }
}

impl PositionStrategy for VolumePlacement {
    fn record(
        &self,
        mesh_bounds: &Aabb,
        instance_count: u32,
        positions: &GpuBuffer,
        commands: &mut CommandList,
    ) {
        commands.push(GpuCommand::GeneratePositions {
            uniforms: self.params.uniforms(mesh_bounds, instance_count),
            positions: positions.clone(),
            workgroups: workgroup_count(instance_count, INSTANCE_WORKGROUP_SIZE),
        });
    }

    fn placement_volume(&self) -> Option<Aabb> {
        Some(self.params.volume)
    }
}

/// Computes the world-space bounds handed to the draw.
pub trait BoundsStrategy: fmt::Debug + Send + Sync {
    fn world_bounds(&self, local_to_world: &Mat4) -> Aabb;
}

/// A local-space box carried through the set's transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeBounds(pub Aabb);

impl BoundsStrategy for VolumeBounds {
    fn world_bounds(&self, local_to_world: &Mat4) -> Aabb {
        self.0.transformed(local_to_world)
    }
}

/// World-space bounds that ignore the set's transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedBounds(pub Aabb);

impl Default for FixedBounds {
    fn default() -> Self {
        Self(Aabb::cube(100.0))
    }
}

impl BoundsStrategy for FixedBounds {
    fn world_bounds(&self, _local_to_world: &Mat4) -> Aabb {
        self.0
    }
}
