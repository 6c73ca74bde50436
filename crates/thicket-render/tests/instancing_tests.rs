//! End-to-end instancing tests replayed on the CPU reference executor.

#![cfg(feature = "mock")]

use std::collections::HashSet;
use std::sync::Arc;

use glam::{Mat4, Vec3, Vec4};
use thicket_render::generator::TRANSFORM_STRIDE;
use thicket_render::*;
use thicket_test_utils::{GpuBuffer, MockRenderContext, RenderContext};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("thicket_render=debug")
        .with_test_writer()
        .try_init();
}

struct Harness {
    mock: MockRenderContext,
    executor: SoftwareExecutor,
    pipeline: IndirectDrawPipeline,
    commands: CommandList,
}

impl Harness {
    fn new() -> Self {
        init_logging();
        Self {
            mock: MockRenderContext::new(),
            executor: SoftwareExecutor::new(),
            pipeline: IndirectDrawPipeline::default(),
            commands: CommandList::new(),
        }
    }

    fn cube(&self) -> Arc<InstanceMesh> {
        Arc::new(InstanceMesh::cube(&self.mock, 1.0))
    }

    fn flush(&mut self) {
        let commands = self.commands.take();
        self.executor.flush(&self.mock, &commands);
    }

    fn enable(&mut self, set: &SharedInstanceSet) {
        self.pipeline.enable_set(&self.mock, set, &mut self.commands);
        self.flush();
    }

    /// Record one frame of the shared pass without flushing it.
    fn record(&mut self, index: u64, view: &CullingView, depth: Option<&DepthTexture>) -> FrameReport {
        self.pipeline.prepare(index);
        if let Some(depth) = depth {
            self.pipeline
                .before_opaque(&self.mock, view, depth, &mut self.commands);
        }
        self.pipeline
            .before_transparent(&self.mock, view, &mut self.commands)
    }

    /// Run one frame of the shared pass and flush it.
    fn frame(&mut self, index: u64, view: &CullingView, depth: Option<&DepthTexture>) -> FrameReport {
        let report = self.record(index, view, depth);
        self.flush();
        report
    }
}

/// Camera at the origin looking down -Z.
fn forward_view() -> (Camera, CullingView) {
    let mut camera = Camera::perspective(60.0, 1.0, 0.1, 100.0);
    camera.look_at(Vec3::ZERO, Vec3::new(0.0, 0.0, -1.0), Vec3::Y);
    let view = CullingView::from_camera(&mut camera, CameraKind::Game);
    (camera, view)
}

/// Camera at the origin looking down +Z.
fn backward_view() -> CullingView {
    let mut camera = Camera::perspective(60.0, 1.0, 0.1, 100.0);
    camera.look_at(Vec3::ZERO, Vec3::Z, Vec3::Y);
    CullingView::from_camera(&mut camera, CameraKind::Game)
}

fn buffer_handles(set: &SharedInstanceSet) -> [GpuBuffer; 4] {
    let guard = set.lock();
    let buffers = guard.buffers().expect("buffers");
    [
        buffers.positions().clone(),
        buffers.visible().clone(),
        buffers.counter().clone(),
        buffers.args().buffer().clone(),
    ]
}

fn transforms(mock: &MockRenderContext, set: &SharedInstanceSet) -> Vec<Mat4> {
    let guard = set.lock();
    let buffers = guard.buffers().expect("set has buffers");
    let bytes = mock.buffer_data(buffers.positions()).expect("mock buffer");
    bytes
        .chunks_exact(TRANSFORM_STRIDE as usize)
        .map(|chunk| Mat4::from_cols_array(&bytemuck::pod_read_unaligned::<[f32; 16]>(chunk)))
        .collect()
}

fn args(mock: &MockRenderContext, set: &SharedInstanceSet) -> DrawIndexedIndirect {
    let guard = set.lock();
    let buffers = guard.buffers().expect("set has buffers");
    let bytes = mock.buffer_data(buffers.args().buffer()).expect("mock buffer");
    DrawIndexedIndirect::from_bytes(&bytes).expect("args record")
}

fn grass(harness: &Harness, label: &str, count: u32, volume: Aabb) -> InstanceSetDescriptor {
    InstanceSetDescriptor::new(label)
        .with_mesh(harness.cube())
        .with_material(MaterialSource::FromShader(ShaderAsset::unlit()))
        .with_instance_count(count)
        .with_placement(PlacementParams::new(volume).with_seed(42))
        .with_draw_by_self(false)
}

#[test]
fn test_placement_is_deterministic() {
    let mut harness = Harness::new();
    let volume = Aabb::cube(50.0);

    let a = share(RenderableInstanceSet::new(grass(&harness, "A", 1000, volume)));
    let b = share(RenderableInstanceSet::new(grass(&harness, "B", 1000, volume)));
    let c = share(RenderableInstanceSet::new(
        grass(&harness, "C", 1000, volume).with_placement(PlacementParams::new(volume).with_seed(43)),
    ));
    harness.enable(&a);
    harness.enable(&b);
    harness.enable(&c);

    let first = transforms(&harness.mock, &a);
    assert_eq!(first.len(), 1000);
    assert_eq!(first, transforms(&harness.mock, &b));
    assert_ne!(first, transforms(&harness.mock, &c));
}

#[test]
fn test_thousand_distinct_transforms_inside_volume() {
    let mut harness = Harness::new();
    let volume = Aabb::new(Vec3::new(-10.0, 0.0, -10.0), Vec3::new(10.0, 2.0, 10.0));
    let set = share(RenderableInstanceSet::new(grass(&harness, "Scatter", 1000, volume)));
    harness.enable(&set);

    let slack = Aabb::new(volume.min - Vec3::splat(1e-3), volume.max + Vec3::splat(1e-3));
    let mut seen = HashSet::new();
    for transform in transforms(&harness.mock, &set) {
        let translation = transform.w_axis.truncate();
        assert!(slack.contains_point(translation), "{translation} escaped the volume");
        assert!(seen.insert(translation.to_array().map(f32::to_bits)));
    }
    assert_eq!(seen.len(), 1000);
}

#[test]
fn test_culling_disabled_draws_every_instance() {
    let mut harness = Harness::new();
    let set = share(RenderableInstanceSet::new(
        grass(&harness, "All", 500, Aabb::cube(10.0)).with_culling(CullingSettings::DISABLED),
    ));
    harness.enable(&set);

    let (_, view) = forward_view();
    let report = harness.frame(0, &view, None);
    assert_eq!(report.drawn, 1);
    assert_eq!(report.dispatched_instances, 500);

    assert_eq!(args(&harness.mock, &set).instance_count, 500);
    let draw = &harness.executor.draws()[0];
    assert_eq!(draw.args.instance_count, 500);
    assert_eq!(draw.visible, (0..500).collect::<Vec<_>>());
    assert_eq!(draw.debug_path, ["Draw Indirect Render", "All"]);
    assert!(harness.executor.debug_groups_balanced());
}

#[test]
fn test_frustum_culls_instances_behind_camera() {
    let mut harness = Harness::new();
    let behind = Aabb::new(Vec3::new(-5.0, -5.0, 20.0), Vec3::new(5.0, 5.0, 30.0));
    let ahead = Aabb::new(Vec3::new(-5.0, -5.0, -30.0), Vec3::new(5.0, 5.0, -20.0));
    let hidden = share(RenderableInstanceSet::new(grass(&harness, "Behind", 64, behind)));
    let shown = share(RenderableInstanceSet::new(grass(&harness, "Ahead", 64, ahead)));
    harness.enable(&hidden);
    harness.enable(&shown);

    let (_, view) = forward_view();
    harness.frame(0, &view, None);

    assert_eq!(args(&harness.mock, &hidden).instance_count, 0);
    assert_eq!(args(&harness.mock, &shown).instance_count, 64);
}

#[test]
fn test_hi_z_base_size_for_1080p() {
    let mut harness = Harness::new();
    let set = share(RenderableInstanceSet::new(
        grass(&harness, "Occluded", 64, Aabb::cube(10.0)).with_culling(CullingSettings {
            frustum: true,
            hi_z: true,
        }),
    ));
    harness.enable(&set);

    let depth = DepthTexture::new(&harness.mock, 1920, 1080, DEFAULT_DEPTH_FORMAT);
    let (_, view) = forward_view();
    harness.frame(0, &view, Some(&depth));

    let builder = harness.pipeline.hi_z_builder();
    assert_eq!(builder.size(), 1024);
    // 1024 down to 8, plus level 0
    assert_eq!(builder.mip_level_count(), 8);
    let hi_z = harness.pipeline.globals().active_hi_z().expect("published pyramid");
    assert_eq!(hi_z.size, 1024);
}

#[test]
fn test_hi_z_culls_instances_behind_wall() {
    let mut harness = Harness::new();
    let (mut camera, view) = forward_view();

    // A full-screen wall 5 units in front of the camera
    let clip = camera.view_projection_matrix() * Vec4::new(0.0, 0.0, -5.0, 1.0);
    let wall_depth = clip.z / clip.w;
    let depth = DepthTexture::new(&harness.mock, 256, 256, DEFAULT_DEPTH_FORMAT);
    harness
        .executor
        .upload_depth(depth.texture(), vec![wall_depth; 256 * 256]);

    let hi_z = CullingSettings {
        frustum: true,
        hi_z: true,
    };
    let far = Aabb::new(Vec3::new(-5.0, -5.0, -40.0), Vec3::new(5.0, 5.0, -30.0));
    let near = Aabb::new(Vec3::new(-1.0, -1.0, -4.0), Vec3::new(1.0, 1.0, -3.0));
    let occluded = share(RenderableInstanceSet::new(
        grass(&harness, "Behind Wall", 64, far).with_culling(hi_z),
    ));
    let in_front = share(RenderableInstanceSet::new(
        grass(&harness, "In Front", 64, near).with_culling(hi_z),
    ));
    let frustum_only = share(RenderableInstanceSet::new(grass(&harness, "Frustum Only", 64, far)));
    harness.enable(&occluded);
    harness.enable(&in_front);
    harness.enable(&frustum_only);

    harness.frame(0, &view, Some(&depth));

    assert_eq!(args(&harness.mock, &occluded).instance_count, 0);
    assert_eq!(args(&harness.mock, &in_front).instance_count, 64);
    assert_eq!(args(&harness.mock, &frustum_only).instance_count, 64);

    // Without the global toggle the wall no longer hides anything
    harness.pipeline.set_hi_z_culling(false);
    harness.frame(1, &view, Some(&depth));
    assert_eq!(args(&harness.mock, &occluded).instance_count, 64);
}

#[test]
fn test_hi_z_skipped_for_scene_view() {
    let mut harness = Harness::new();
    let set = share(RenderableInstanceSet::new(
        grass(&harness, "Editor", 16, Aabb::cube(4.0)).with_culling(CullingSettings {
            frustum: false,
            hi_z: true,
        }),
    ));
    harness.enable(&set);

    let depth = DepthTexture::new(&harness.mock, 640, 480, DEFAULT_DEPTH_FORMAT);
    let (_, game) = forward_view();
    let scene = CullingView {
        kind: CameraKind::SceneView,
        ..game
    };
    harness.frame(0, &scene, Some(&depth));

    assert!(harness.pipeline.globals().hi_z.is_none());
    assert_eq!(harness.mock.count_texture_creates(), 1);
    assert_eq!(args(&harness.mock, &set).instance_count, 16);
}

#[test]
fn test_resize_releases_each_buffer_once() {
    let mut harness = Harness::new();
    let set = share(RenderableInstanceSet::new(
        grass(&harness, "Resized", 500, Aabb::cube(10.0)).with_culling(CullingSettings::DISABLED),
    ));
    harness.enable(&set);

    let (_, view) = forward_view();
    harness.frame(0, &view, None);

    let old = buffer_handles(&set);

    set.lock().set_instance_count(2000);
    assert_eq!(set.lock().state(), InstanceSetState::Dirty);
    harness.frame(1, &view, None);

    for buffer in &old {
        assert_eq!(harness.mock.buffer_destroy_count(buffer), 1);
    }
    assert_eq!(harness.mock.writes_after_destroy(), 0);

    let guard = set.lock();
    assert_eq!(guard.state(), InstanceSetState::Ready);
    assert_eq!(guard.buffers().map(|b| b.capacity()), Some(2000));
    drop(guard);
    assert_eq!(args(&harness.mock, &set).instance_count, 2000);
    assert_eq!(transforms(&harness.mock, &set).len(), 2000);
}

#[test]
fn test_args_record_survives_frames() {
    let mut harness = Harness::new();
    let set = share(RenderableInstanceSet::new(
        grass(&harness, "Stable", 128, Aabb::cube(10.0)).with_culling(CullingSettings::DISABLED),
    ));
    harness.enable(&set);
    let written = set.lock().buffers().expect("buffers").args().args();
    assert_eq!(written, DrawIndexedIndirect::new(36, 128, 0, 0, 0));

    let (_, view) = forward_view();
    harness.frame(0, &view, None);
    let host_writes = harness.mock.count_buffer_writes();

    for frame in 1..4 {
        harness.frame(frame, &view, None);
        let current = args(&harness.mock, &set);
        assert_eq!(current.index_count, 36);
        assert_eq!(current.first_index, 0);
        assert_eq!(current.base_vertex, 0);
        assert_eq!(current.instance_count, 128);
    }
    // Steady-state frames only touch the record on the device
    assert_eq!(harness.mock.count_buffer_writes(), host_writes);
}

#[test]
fn test_registering_twice_and_unregistering_twice() {
    let mut harness = Harness::new();
    let set = share(RenderableInstanceSet::new(grass(&harness, "A", 32, Aabb::cube(5.0))));

    harness.enable(&set);
    harness.enable(&set);
    assert_eq!(harness.pipeline.registry().len(), 1);

    let positions = set.lock().buffers().expect("buffers").positions().clone();
    harness.pipeline.disable_set(&set, &mut harness.commands);
    harness.pipeline.disable_set(&set, &mut harness.commands);
    harness.flush();

    assert!(harness.pipeline.registry().is_empty());
    assert_eq!(set.lock().state(), InstanceSetState::Released);
    assert_eq!(harness.mock.buffer_destroy_count(&positions), 1);

    let (_, view) = forward_view();
    let report = harness.frame(0, &view, None);
    assert_eq!(report, FrameReport::default());
    assert!(harness.executor.draws().is_empty());
}

#[test]
fn test_self_drawn_set_skipped_by_shared_pass() {
    let mut harness = Harness::new();
    let shared = share(RenderableInstanceSet::new(
        grass(&harness, "Shared", 16, Aabb::cube(4.0)).with_culling(CullingSettings::DISABLED),
    ));
    let own = share(RenderableInstanceSet::new(
        grass(&harness, "Own", 16, Aabb::cube(4.0))
            .with_culling(CullingSettings::DISABLED)
            .with_draw_by_self(true),
    ));
    harness.enable(&shared);
    harness.enable(&own);

    let (_, view) = forward_view();
    let report = harness.frame(0, &view, None);
    assert_eq!(report.drawn, 1);
    assert_eq!(report.self_scheduled, 1);

    let outcome = harness
        .pipeline
        .draw_self(&harness.mock, &own, &view, &mut harness.commands);
    assert_eq!(outcome, DrawOutcome::Drawn { instance_count: 16 });
    let outcome = harness
        .pipeline
        .draw_self(&harness.mock, &shared, &view, &mut harness.commands);
    assert_eq!(outcome, DrawOutcome::Skipped(SkipReason::NotSelfDrawn));
    harness.flush();

    let labels: Vec<_> = harness
        .executor
        .draws()
        .iter()
        .map(|draw| draw.label.as_str())
        .collect();
    assert_eq!(labels, ["Shared", "Own"]);
}

#[test]
fn test_missing_material_skips_without_recording() {
    let mut harness = Harness::new();
    let set = share(RenderableInstanceSet::new(
        InstanceSetDescriptor::new("Bare")
            .with_mesh(harness.cube())
            .with_instance_count(64)
            .with_draw_by_self(false),
    ));
    harness.enable(&set);

    let (_, view) = forward_view();
    harness.pipeline.prepare(0);
    let report = harness
        .pipeline
        .before_transparent(&harness.mock, &view, &mut harness.commands);

    let id = set.lock().id();
    assert_eq!(report.skipped, vec![(id, SkipReason::MissingMaterial)]);
    assert_eq!(
        harness
            .commands
            .count(|c| matches!(c, GpuCommand::CullInstances { .. } | GpuCommand::DrawIndexedIndirect(_))),
        0
    );
}

#[test]
fn test_destroyed_shared_material_skips() {
    let mut harness = Harness::new();
    let material = InstancedMaterial::new("Shared Unlit", ShaderAsset::unlit());
    let set = share(RenderableInstanceSet::new(
        grass(&harness, "Borrowed", 32, Aabb::cube(4.0))
            .with_material(MaterialSource::Shared(material.clone())),
    ));
    harness.enable(&set);

    material.destroy();
    let (_, view) = forward_view();
    let report = harness.frame(0, &view, None);
    assert_eq!(report.drawn, 0);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].1, SkipReason::MissingMaterial);
}

#[test]
fn test_pipeline_release_frees_everything() {
    let mut harness = Harness::new();
    let set = share(RenderableInstanceSet::new(
        grass(&harness, "Temporary", 64, Aabb::cube(8.0)).with_culling(CullingSettings {
            frustum: true,
            hi_z: true,
        }),
    ));
    harness.enable(&set);

    let depth = DepthTexture::new(&harness.mock, 512, 512, DEFAULT_DEPTH_FORMAT);
    let (_, view) = forward_view();
    harness.frame(0, &view, Some(&depth));

    harness.pipeline.release(&mut harness.commands);
    harness.flush();

    assert!(harness.pipeline.registry().is_empty());
    assert!(harness.pipeline.hi_z_builder().pyramid().is_none());
    assert_eq!(harness.pipeline.hi_z_builder().scratch().cached_label_count(), 0);
    assert_eq!(set.lock().state(), InstanceSetState::Released);
    // Only the depth texture is left
    assert_eq!(harness.mock.live_texture_count(), 1);
}

#[test]
fn test_disable_before_flush_outlives_recorded_frame() {
    let mut harness = Harness::new();
    let set = share(RenderableInstanceSet::new(
        grass(&harness, "Disabled Mid Frame", 64, Aabb::cube(4.0)).with_culling(CullingSettings::DISABLED),
    ));
    harness.enable(&set);
    let handles = buffer_handles(&set);

    let (_, view) = forward_view();
    harness.record(0, &view, None);
    harness.pipeline.disable_set(&set, &mut harness.commands);

    // Nothing is destroyed until the recorded cull and draw have run
    for buffer in &handles {
        assert_eq!(harness.mock.buffer_destroy_count(buffer), 0);
    }
    harness.flush();

    assert_eq!(harness.mock.writes_after_destroy(), 0);
    for buffer in &handles {
        assert_eq!(harness.mock.buffer_destroy_count(buffer), 1);
    }
    assert_eq!(harness.executor.draws().len(), 1);
    assert_eq!(harness.executor.draws()[0].args.instance_count, 64);
    assert!(harness.pipeline.registry().is_empty());
}

#[test]
fn test_resize_before_first_flush() {
    let mut harness = Harness::new();
    let set = share(RenderableInstanceSet::new(
        grass(&harness, "Grown Early", 500, Aabb::cube(10.0)).with_culling(CullingSettings::DISABLED),
    ));
    // Positions for 500 instances are recorded but not flushed
    harness
        .pipeline
        .enable_set(&harness.mock, &set, &mut harness.commands);
    let old = buffer_handles(&set);

    set.lock().set_instance_count(2000);
    let (_, view) = forward_view();
    harness.frame(0, &view, None);

    assert_eq!(harness.mock.writes_after_destroy(), 0);
    for buffer in &old {
        assert_eq!(harness.mock.buffer_destroy_count(buffer), 1);
    }
    assert_eq!(transforms(&harness.mock, &set).len(), 2000);
    assert_eq!(args(&harness.mock, &set).instance_count, 2000);
}

#[test]
fn test_invalidate_resources_recreates_buffers() {
    let mut harness = Harness::new();
    let set = share(RenderableInstanceSet::new(
        grass(&harness, "Invalidated", 256, Aabb::cube(10.0)).with_culling(CullingSettings::DISABLED),
    ));
    harness.enable(&set);
    let (_, view) = forward_view();
    harness.frame(0, &view, None);

    let old = buffer_handles(&set);
    let before = transforms(&harness.mock, &set);

    set.lock().invalidate_resources();
    assert_eq!(set.lock().state(), InstanceSetState::Dirty);
    harness.frame(1, &view, None);
    harness.frame(2, &view, None);

    for buffer in &old {
        assert_eq!(harness.mock.buffer_destroy_count(buffer), 1);
    }
    assert_eq!(harness.mock.writes_after_destroy(), 0);

    let new = buffer_handles(&set);
    assert_ne!(new[0].mock_id(), old[0].mock_id());
    assert_eq!(set.lock().state(), InstanceSetState::Ready);
    assert_eq!(set.lock().buffers().map(|b| b.capacity()), Some(256));
    // Same seed, same transforms
    assert_eq!(transforms(&harness.mock, &set), before);
    assert_eq!(args(&harness.mock, &set).instance_count, 256);
}

#[test]
fn test_culling_camera_overrides_main_view() {
    let mut harness = Harness::new();
    let ahead = Aabb::new(Vec3::new(-5.0, -5.0, -30.0), Vec3::new(5.0, 5.0, -20.0));
    let set = share(RenderableInstanceSet::new(
        grass(&harness, "Own Camera", 64, ahead).with_culling_camera(backward_view()),
    ));
    harness.enable(&set);

    // The set culls against a camera facing away from its instances
    let (_, main) = forward_view();
    harness.frame(0, &main, None);
    assert_eq!(args(&harness.mock, &set).instance_count, 0);

    // Without its own camera the set falls back to the main view
    set.lock().set_culling_camera(None);
    harness.frame(1, &main, None);
    assert_eq!(args(&harness.mock, &set).instance_count, 64);

    set.lock().set_culling_camera(Some(backward_view()));
    harness.frame(2, &main, None);
    assert_eq!(args(&harness.mock, &set).instance_count, 0);
}

#[test]
fn test_mesh_change_recomputes_draw_args() {
    let mut harness = Harness::new();
    let set = share(RenderableInstanceSet::new(
        grass(&harness, "Swapped", 32, Aabb::cube(4.0)).with_culling(CullingSettings::DISABLED),
    ));
    harness.enable(&set);
    let (_, view) = forward_view();
    harness.frame(0, &view, None);
    assert_eq!(args(&harness.mock, &set), DrawIndexedIndirect::new(36, 32, 0, 0, 0));

    let buffer = |label: &'static str| {
        harness.mock.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: 256,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::INDEX,
            mapped_at_creation: false,
        })
    };
    let two_parts = Arc::new(InstanceMesh::from_parts(
        "Two Parts",
        buffer("vertices"),
        buffer("indices"),
        wgpu::IndexFormat::Uint32,
        VertexFormat::PositionNormal,
        vec![
            SubMesh {
                index_start: 0,
                index_count: 6,
                base_vertex: 0,
            },
            SubMesh {
                index_start: 6,
                index_count: 12,
                base_vertex: 4,
            },
        ],
        Aabb::cube(1.0),
    ));

    {
        let mut guard = set.lock();
        guard.set_mesh(Some(two_parts.clone()));
        guard.set_sub_mesh_index(7);
        assert_eq!(guard.state(), InstanceSetState::Dirty);
    }
    harness.frame(1, &view, None);

    let guard = set.lock();
    assert_eq!(guard.state(), InstanceSetState::Ready);
    // Out of range indices land on the last sub-mesh
    assert_eq!(guard.sub_mesh_index(), 1);
    drop(guard);
    assert_eq!(args(&harness.mock, &set), DrawIndexedIndirect::new(12, 32, 6, 4, 0));
    let last = harness.executor.draws().last().expect("draw");
    assert_eq!(last.mesh, two_parts.id());

    set.lock().set_sub_mesh_index(0);
    harness.frame(2, &view, None);
    assert_eq!(args(&harness.mock, &set), DrawIndexedIndirect::new(6, 32, 0, 0, 0));
}

#[test]
fn test_placement_change_regenerates_positions() {
    let mut harness = Harness::new();
    let set = share(RenderableInstanceSet::new(
        grass(&harness, "Moved", 128, Aabb::cube(10.0)).with_culling(CullingSettings::DISABLED),
    ));
    harness.enable(&set);
    let (_, view) = forward_view();
    harness.frame(0, &view, None);
    let before = transforms(&harness.mock, &set);

    let generates = |commands: &CommandList| {
        commands.count(|c| matches!(c, GpuCommand::GeneratePositions { .. }))
    };

    // Unchanged frames leave the transforms alone
    harness.record(1, &view, None);
    assert_eq!(generates(&harness.commands), 0);
    harness.flush();
    assert_eq!(transforms(&harness.mock, &set), before);

    let volume = Aabb::new(Vec3::new(100.0, 0.0, 100.0), Vec3::new(110.0, 1.0, 110.0));
    set.lock().set_placement(PlacementParams::new(volume).with_seed(7));
    assert_eq!(set.lock().state(), InstanceSetState::Dirty);

    harness.record(2, &view, None);
    assert_eq!(generates(&harness.commands), 1);
    harness.flush();

    let after = transforms(&harness.mock, &set);
    assert_eq!(after.len(), 128);
    assert_ne!(after, before);
    let slack = Aabb::new(volume.min - Vec3::splat(1e-3), volume.max + Vec3::splat(1e-3));
    for transform in &after {
        assert!(slack.contains_point(transform.w_axis.truncate()));
    }
}
