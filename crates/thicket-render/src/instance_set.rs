//! A procedurally placed, GPU-culled set of mesh instances.
//!
//! [`RenderableInstanceSet`] owns the three per-set buffers (transforms,
//! compacted visible indices with their counter, indirect arguments) and
//! records the per-frame sequence:
//!
//! 1. regenerate transforms if a placement input changed,
//! 2. reset the visible counter,
//! 3. cull,
//! 4. copy the visible count into the indirect arguments,
//! 5. draw indirect.
//!
//! All of it is recorded into one [`CommandList`], so submission order alone
//! guarantees each step sees the previous one's results.
//!
//! # State machine
//!
//! ```text
//! Uninitialized --enable--> Ready <--update-- Dirty
//!                             |  \--mutator--> ^
//!                             \--release--> Released
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bitflags::bitflags;
use glam::Mat4;
use thicket_core::math::Aabb;
use thicket_core::profiling::profile_function;
use thicket_test_utils::{GpuBuffer, RenderContext};
use tracing::{debug, info, trace, warn};

use crate::camera::CullingView;
use crate::commands::{
    CommandList, DrawUniforms, GpuCommand, INSTANCE_WORKGROUP_SIZE, IndirectDraw, workgroup_count,
};
use crate::culling::{CullingFlags, CullingParams, CullingSettings};
use crate::frame::FrameGlobals;
use crate::generator::{
    BoundsStrategy, FixedBounds, PlacementParams, PositionStrategy, TRANSFORM_STRIDE,
    VolumePlacement,
};
use crate::indirect::{DrawIndexedIndirect, INSTANCE_COUNT_OFFSET, IndirectArgsBuffer};
use crate::material::{InstancedMaterial, MaterialSource};
use crate::mesh::InstanceMesh;
use crate::registry::RendererRegistry;

/// Smallest supported instance count.
pub const MIN_INSTANCE_COUNT: u32 = 8;
/// Largest supported instance count.
pub const MAX_INSTANCE_COUNT: u32 = 20_000;

/// Size of one visible index.
const VISIBLE_INDEX_STRIDE: u64 = std::mem::size_of::<u32>() as u64;

/// Clamp a requested instance count to the supported range.
pub fn clamp_instance_count(count: u32) -> u32 {
    count.clamp(MIN_INSTANCE_COUNT, MAX_INSTANCE_COUNT)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceSetId(u64);

impl InstanceSetId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for InstanceSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceSetState {
    Uninitialized,
    Ready,
    Dirty,
    Released,
}

bitflags! {
    /// What the next update has to redo.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DirtyFlags: u32 {
        /// Instance count changed; buffers are reallocated
        const CAPACITY = 1 << 0;
        /// Placement inputs or mesh bounds changed; transforms are regenerated
        const PLACEMENT = 1 << 1;
        /// Mesh or sub-mesh changed; the argument record is rewritten
        const ARGS = 1 << 2;
        const MATERIAL = 1 << 3;
        /// Buffers are stale and must be recreated
        const RESOURCES = 1 << 4;
    }
}

/// Why a frame's draw was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    MissingMesh,
    MissingMaterial,
    NoInstances,
    InvalidDrawArgs,
    Released,
    Uninitialized,
    /// Asked to self-draw a set the shared pass draws
    NotSelfDrawn,
}

/// Result of one frame's draw step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrawOutcome {
    /// Culling and the indirect draw were recorded for up to `instance_count` instances.
    Drawn { instance_count: u32 },
    Skipped(SkipReason),
}

impl DrawOutcome {
    pub fn is_drawn(&self) -> bool {
        matches!(self, DrawOutcome::Drawn { .. })
    }
}

/// Authoring-side configuration of an instance set.
#[derive(Debug, Clone)]
pub struct InstanceSetDescriptor {
    pub label: String,
    pub mesh: Option<Arc<InstanceMesh>>,
    pub sub_mesh_index: u32,
    pub material: Option<MaterialSource>,
    pub instance_count: u32,
    pub placement: PlacementParams,
    pub culling: CullingSettings,
    /// Draw from [`RenderableInstanceSet::draw_self`] instead of the shared pass
    pub draw_by_self: bool,
    pub local_to_world: Mat4,
    /// Camera to cull against; the frame's main camera when `None`
    pub culling_camera: Option<CullingView>,
}

impl Default for InstanceSetDescriptor {
    fn default() -> Self {
        Self {
            label: "Instance Set".to_string(),
            mesh: None,
            sub_mesh_index: 0,
            material: None,
            instance_count: MIN_INSTANCE_COUNT,
            placement: PlacementParams::default(),
            culling: CullingSettings::default(),
            draw_by_self: true,
            local_to_world: Mat4::IDENTITY,
            culling_camera: None,
        }
    }
}

impl InstanceSetDescriptor {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    pub fn with_mesh(mut self, mesh: Arc<InstanceMesh>) -> Self {
        self.mesh = Some(mesh);
        self
    }

    pub fn with_sub_mesh_index(mut self, index: u32) -> Self {
        self.sub_mesh_index = index;
        self
    }

    pub fn with_material(mut self, material: MaterialSource) -> Self {
        self.material = Some(material);
        self
    }

    /// Requested count, clamped to `[MIN_INSTANCE_COUNT, MAX_INSTANCE_COUNT]`.
    pub fn with_instance_count(mut self, count: u32) -> Self {
        self.instance_count = clamp_instance_count(count);
        self
    }

    pub fn with_placement(mut self, placement: PlacementParams) -> Self {
        self.placement = placement;
        self
    }

    pub fn with_culling(mut self, culling: CullingSettings) -> Self {
        self.culling = culling;
        self
    }

    pub fn with_draw_by_self(mut self, draw_by_self: bool) -> Self {
        self.draw_by_self = draw_by_self;
        self
    }

    pub fn with_local_to_world(mut self, local_to_world: Mat4) -> Self {
        self.local_to_world = local_to_world;
        self
    }

    pub fn with_culling_camera(mut self, view: CullingView) -> Self {
        self.culling_camera = Some(view);
        self
    }
}

/// The per-set GPU buffers. Always allocated and released together.
#[derive(Debug)]
pub struct InstanceBuffers {
    positions: GpuBuffer,
    visible: GpuBuffer,
    counter: GpuBuffer,
    args: IndirectArgsBuffer,
    capacity: u32,
}

impl InstanceBuffers {
    pub fn allocate(ctx: &dyn RenderContext, label: &str, capacity: u32) -> Self {
        let capacity_bytes = capacity as u64;

        let positions_label = format!("{label} Positions");
        let positions = ctx.create_buffer(&wgpu::BufferDescriptor {
            label: Some(positions_label.as_str()),
            size: capacity_bytes * TRANSFORM_STRIDE,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let visible_label = format!("{label} Visible Ids");
        let visible = ctx.create_buffer(&wgpu::BufferDescriptor {
            label: Some(visible_label.as_str()),
            size: capacity_bytes * VISIBLE_INDEX_STRIDE,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });

        let counter_label = format!("{label} Visible Count");
        let counter = ctx.create_buffer(&wgpu::BufferDescriptor {
            label: Some(counter_label.as_str()),
            size: VISIBLE_INDEX_STRIDE,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let args = IndirectArgsBuffer::new(ctx, &format!("{label} Draw Args"));

        Self {
            positions,
            visible,
            counter,
            args,
            capacity,
        }
    }

    pub fn positions(&self) -> &GpuBuffer {
        &self.positions
    }

    pub fn visible(&self) -> &GpuBuffer {
        &self.visible
    }

    pub fn counter(&self) -> &GpuBuffer {
        &self.counter
    }

    pub fn args(&self) -> &IndirectArgsBuffer {
        &self.args
    }

    /// Number of instances the buffers hold.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Destroy every buffer after the commands already in `commands`.
    pub fn retire(self, commands: &mut CommandList) {
        commands.retire_buffer(self.visible);
        commands.retire_buffer(self.counter);
        commands.retire_buffer(self.positions);
        self.args.retire(commands);
    }
}

/// One renderable set of procedurally placed instances.
pub struct RenderableInstanceSet {
    id: InstanceSetId,
    label: String,
    state: InstanceSetState,
    dirty: DirtyFlags,

    mesh: Option<Arc<InstanceMesh>>,
    sub_mesh_index: u32,
    material_source: Option<MaterialSource>,
    /// Material instantiated from a shader; owned and destroyed by this set
    owned_material: Option<Arc<InstancedMaterial>>,
    instance_count: u32,

    position_strategy: Arc<dyn PositionStrategy>,
    bounds_strategy: Option<Arc<dyn BoundsStrategy>>,
    culling: CullingSettings,
    draw_by_self: bool,
    local_to_world: Mat4,
    culling_camera: Option<CullingView>,

    buffers: Option<InstanceBuffers>,
    registry: Option<Weak<RendererRegistry>>,
}

impl fmt::Debug for RenderableInstanceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderableInstanceSet")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("state", &self.state)
            .field("dirty", &self.dirty)
            .field("instance_count", &self.instance_count)
            .field("draw_by_self", &self.draw_by_self)
            .finish_non_exhaustive()
    }
}

impl RenderableInstanceSet {
    pub fn new(descriptor: InstanceSetDescriptor) -> Self {
        Self {
            id: InstanceSetId::next(),
            label: descriptor.label,
            state: InstanceSetState::Uninitialized,
            dirty: DirtyFlags::all(),
            mesh: descriptor.mesh,
            sub_mesh_index: descriptor.sub_mesh_index,
            material_source: descriptor.material,
            owned_material: None,
            instance_count: clamp_instance_count(descriptor.instance_count),
            position_strategy: Arc::new(VolumePlacement::new(descriptor.placement)),
            bounds_strategy: None,
            culling: descriptor.culling,
            draw_by_self: descriptor.draw_by_self,
            local_to_world: descriptor.local_to_world,
            culling_camera: descriptor.culling_camera,
            buffers: None,
            registry: None,
        }
    }

    pub fn id(&self) -> InstanceSetId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> InstanceSetState {
        self.state
    }

    pub fn dirty_flags(&self) -> DirtyFlags {
        self.dirty
    }

    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }

    pub fn mesh(&self) -> Option<&Arc<InstanceMesh>> {
        self.mesh.as_ref()
    }

    pub fn sub_mesh_index(&self) -> u32 {
        self.sub_mesh_index
    }

    pub fn culling(&self) -> CullingSettings {
        self.culling
    }

    pub fn draw_by_self(&self) -> bool {
        self.draw_by_self
    }

    pub fn local_to_world(&self) -> Mat4 {
        self.local_to_world
    }

    pub fn culling_camera(&self) -> Option<&CullingView> {
        self.culling_camera.as_ref()
    }

    pub fn buffers(&self) -> Option<&InstanceBuffers> {
        self.buffers.as_ref()
    }

    pub fn is_registered(&self) -> bool {
        self.registry.as_ref().is_some_and(|weak| weak.strong_count() > 0)
    }

    /// The material draws use, if one is available.
    pub fn material(&self) -> Option<Arc<InstancedMaterial>> {
        let material = match self.material_source.as_ref()? {
            MaterialSource::Shared(material) => material.clone(),
            MaterialSource::FromShader(_) => self.owned_material.clone()?,
        };
        (!material.is_destroyed()).then_some(material)
    }

    /// Whether this set owns (and will destroy) its material.
    pub fn owns_material(&self) -> bool {
        self.owned_material.is_some()
    }

    fn mark_dirty(&mut self, flags: DirtyFlags) {
        self.dirty |= flags;
        if self.state == InstanceSetState::Ready {
            self.state = InstanceSetState::Dirty;
        }
    }

    /// Change the instance count. The count is clamped to the supported range.
    pub fn set_instance_count(&mut self, count: u32) {
        let clamped = clamp_instance_count(count);
        if clamped != count {
            warn!(set = %self.label, requested = count, clamped, "Instance count out of range");
        }
        if clamped == self.instance_count {
            return;
        }
        self.instance_count = clamped;
        self.mark_dirty(DirtyFlags::CAPACITY | DirtyFlags::PLACEMENT | DirtyFlags::ARGS);
    }

    pub fn set_mesh(&mut self, mesh: Option<Arc<InstanceMesh>>) {
        let unchanged = match (&self.mesh, &mesh) {
            (Some(current), Some(new)) => Arc::ptr_eq(current, new),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            return;
        }
        self.mesh = mesh;
        // Mesh bounds feed placement
        self.mark_dirty(DirtyFlags::ARGS | DirtyFlags::PLACEMENT);
    }

    pub fn set_sub_mesh_index(&mut self, index: u32) {
        if index == self.sub_mesh_index {
            return;
        }
        self.sub_mesh_index = index;
        self.mark_dirty(DirtyFlags::ARGS);
    }

    /// Place instances randomly inside a volume.
    pub fn set_placement(&mut self, params: PlacementParams) {
        self.set_position_strategy(Arc::new(VolumePlacement::new(params)));
    }

    pub fn set_position_strategy(&mut self, strategy: Arc<dyn PositionStrategy>) {
        self.position_strategy = strategy;
        self.mark_dirty(DirtyFlags::PLACEMENT);
    }

    /// Override how draw bounds are computed; `None` derives them from placement.
    pub fn set_bounds_strategy(&mut self, strategy: Option<Arc<dyn BoundsStrategy>>) {
        self.bounds_strategy = strategy;
    }

    pub fn set_material(&mut self, material: Option<MaterialSource>) {
        self.material_source = material;
        self.mark_dirty(DirtyFlags::MATERIAL);
    }

    pub fn set_local_to_world(&mut self, local_to_world: Mat4) {
        self.local_to_world = local_to_world;
    }

    pub fn set_culling(&mut self, culling: CullingSettings) {
        self.culling = culling;
    }

    pub fn set_draw_by_self(&mut self, draw_by_self: bool) {
        self.draw_by_self = draw_by_self;
    }

    pub fn set_culling_camera(&mut self, view: Option<CullingView>) {
        self.culling_camera = view;
    }

    /// Treat the buffers as stale; the next update recreates them.
    pub fn invalidate_resources(&mut self) {
        if self.buffers.is_some() {
            debug!(set = %self.label, "Instance buffers invalidated");
            self.mark_dirty(DirtyFlags::RESOURCES);
        }
    }

    pub(crate) fn attach_registry(&mut self, registry: Weak<RendererRegistry>) {
        self.registry = Some(registry);
    }

    pub(crate) fn detach_registry(&mut self) {
        self.registry = None;
    }

    /// Allocate buffers and generate transforms.
    ///
    /// Enabling a released set brings it back with fresh buffers.
    pub fn enable(&mut self, ctx: &dyn RenderContext, commands: &mut CommandList) {
        match self.state {
            InstanceSetState::Uninitialized | InstanceSetState::Released => {
                self.dirty = DirtyFlags::all();
                self.state = InstanceSetState::Dirty;
                self.update(ctx, commands);
            }
            InstanceSetState::Dirty => self.update(ctx, commands),
            InstanceSetState::Ready => {}
        }
    }

    /// Bring a dirty set back to `Ready`.
    ///
    /// Buffers are replaced as a whole before anything referencing them is
    /// recorded. Old buffers are retired into `commands`, so work recorded
    /// against them earlier still runs before they are destroyed.
    pub fn update(&mut self, ctx: &dyn RenderContext, commands: &mut CommandList) {
        profile_function!();

        if self.state != InstanceSetState::Dirty {
            return;
        }
        let dirty = std::mem::take(&mut self.dirty);

        if dirty.contains(DirtyFlags::MATERIAL) {
            self.refresh_material();
        }

        let mut regenerate = dirty.contains(DirtyFlags::PLACEMENT);
        let mut rewrite_args = dirty.contains(DirtyFlags::ARGS);

        let needs_buffers = self
            .buffers
            .as_ref()
            .is_none_or(|buffers| buffers.capacity() != self.instance_count)
            || dirty.contains(DirtyFlags::RESOURCES);
        if needs_buffers {
            if let Some(old) = self.buffers.take() {
                info!(
                    set = %self.label,
                    old_capacity = old.capacity(),
                    new_capacity = self.instance_count,
                    "Reallocating instance buffers"
                );
                old.retire(commands);
            } else {
                info!(set = %self.label, capacity = self.instance_count, "Allocating instance buffers");
            }
            self.buffers = Some(InstanceBuffers::allocate(ctx, &self.label, self.instance_count));
            regenerate = true;
            rewrite_args = true;
        }

        if rewrite_args {
            let args = self.compute_args();
            if let Some(buffers) = self.buffers.as_mut() {
                buffers.args.write(ctx, args);
            }
        }

        if regenerate && let Some(buffers) = self.buffers.as_ref() {
            let mesh_bounds = self.mesh.as_ref().map(|mesh| mesh.bounds()).unwrap_or_default();
            commands.push_debug_group(format!("{} Positions", self.label));
            self.position_strategy.record(
                &mesh_bounds,
                self.instance_count,
                buffers.positions(),
                commands,
            );
            commands.pop_debug_group();
        }

        self.state = InstanceSetState::Ready;
    }

    /// Indirect arguments for the current mesh and sub-mesh.
    fn compute_args(&mut self) -> DrawIndexedIndirect {
        let Some(mesh) = self.mesh.as_ref() else {
            return DrawIndexedIndirect::default();
        };

        let count = mesh.sub_mesh_count();
        if count == 0 {
            warn!(set = %self.label, mesh = mesh.label(), "Mesh has no sub-meshes");
            return DrawIndexedIndirect::default();
        }

        let clamped = self.sub_mesh_index.min(count - 1);
        if clamped != self.sub_mesh_index {
            warn!(
                set = %self.label,
                requested = self.sub_mesh_index,
                clamped,
                "Sub-mesh index out of range"
            );
            self.sub_mesh_index = clamped;
        }

        mesh.sub_mesh(clamped)
            .map(|sub_mesh| DrawIndexedIndirect::for_sub_mesh(sub_mesh, self.instance_count))
            .unwrap_or_default()
    }

    fn refresh_material(&mut self) {
        match &self.material_source {
            Some(MaterialSource::FromShader(shader)) => {
                let reusable = self
                    .owned_material
                    .as_ref()
                    .is_some_and(|owned| owned.shader().id() == shader.id() && !owned.is_destroyed());
                if reusable {
                    return;
                }
                if let Some(old) = self.owned_material.take() {
                    old.destroy();
                }
                let material = InstancedMaterial::from_shader(shader.clone());
                debug!(set = %self.label, material = material.label(), "Created material from shader");
                self.owned_material = Some(material);
            }
            Some(MaterialSource::Shared(_)) | None => {
                if let Some(old) = self.owned_material.take() {
                    old.destroy();
                }
            }
        }
    }

    /// Check the draw preconditions.
    pub fn precondition(&self) -> Result<(), SkipReason> {
        match self.state {
            InstanceSetState::Released => return Err(SkipReason::Released),
            InstanceSetState::Uninitialized => return Err(SkipReason::Uninitialized),
            InstanceSetState::Ready | InstanceSetState::Dirty => {}
        }
        if self.mesh.is_none() {
            return Err(SkipReason::MissingMesh);
        }
        if self.instance_count == 0 {
            return Err(SkipReason::NoInstances);
        }
        if self.material().is_none() {
            return Err(SkipReason::MissingMaterial);
        }
        match &self.buffers {
            Some(buffers) if buffers.args().is_valid() => Ok(()),
            _ => Err(SkipReason::InvalidDrawArgs),
        }
    }

    /// Record this frame's cull and draw.
    ///
    /// Pending changes are applied first. An incomplete configuration skips
    /// the frame without recording anything.
    pub fn render(
        &mut self,
        ctx: &dyn RenderContext,
        main_view: &CullingView,
        globals: &FrameGlobals,
        commands: &mut CommandList,
    ) -> DrawOutcome {
        profile_function!();

        self.update(ctx, commands);

        if let Err(reason) = self.precondition() {
            trace!(set = %self.label, ?reason, "Skipping instanced draw");
            return DrawOutcome::Skipped(reason);
        }

        let (Some(buffers), Some(mesh), Some(material)) =
            (self.buffers.as_ref(), self.mesh.clone(), self.material())
        else {
            return DrawOutcome::Skipped(SkipReason::InvalidDrawArgs);
        };

        let view = self.culling_camera.unwrap_or(*main_view);
        let hi_z = if self.culling.hi_z && view.kind.is_primary() {
            globals.active_hi_z()
        } else {
            None
        };
        let mut flags = self.culling.flags();
        if hi_z.is_none() {
            flags.remove(CullingFlags::HI_Z);
        }

        let culling = CullingParams {
            view_projection: view.view_projection,
            camera_position: view.position,
            local_to_world: self.local_to_world,
            mesh_bounds: mesh.bounds(),
            instance_count: self.instance_count,
            flags,
            hi_z: hi_z.map(|state| (state.size, state.mip_level_count)),
        };

        commands.push_debug_group(self.label.clone());
        commands.push(GpuCommand::ClearBuffer {
            buffer: buffers.counter().clone(),
        });
        commands.push(GpuCommand::CullInstances {
            uniforms: culling.uniforms(),
            positions: buffers.positions().clone(),
            visible: buffers.visible().clone(),
            counter: buffers.counter().clone(),
            hi_z: hi_z.map(|state| state.texture.clone()),
            workgroups: workgroup_count(self.instance_count, INSTANCE_WORKGROUP_SIZE),
        });
        commands.push(GpuCommand::CopyBuffer {
            source: buffers.counter().clone(),
            source_offset: 0,
            destination: buffers.args().buffer().clone(),
            destination_offset: INSTANCE_COUNT_OFFSET,
            size: VISIBLE_INDEX_STRIDE,
        });
        commands.push(GpuCommand::DrawIndexedIndirect(IndirectDraw {
            label: self.label.clone(),
            material,
            mesh,
            uniforms: DrawUniforms {
                view_projection: main_view.view_projection.to_cols_array_2d(),
                local_to_world: self.local_to_world.to_cols_array_2d(),
                world_to_local: self.local_to_world.inverse().to_cols_array_2d(),
                hi_z_enabled: globals.hi_z_enabled as u32,
                _padding: [0; 3],
            },
            positions: buffers.positions().clone(),
            visible: buffers.visible().clone(),
            args: buffers.args().buffer().clone(),
        }));
        commands.pop_debug_group();

        debug!(
            set = %self.label,
            instances = self.instance_count,
            ?flags,
            "Recorded instanced cull and draw"
        );
        DrawOutcome::Drawn {
            instance_count: self.instance_count,
        }
    }

    /// Cull and draw a self-scheduled set outside the shared pass.
    pub fn draw_self(
        &mut self,
        ctx: &dyn RenderContext,
        main_view: &CullingView,
        globals: &FrameGlobals,
        commands: &mut CommandList,
    ) -> DrawOutcome {
        if !self.draw_by_self {
            return DrawOutcome::Skipped(SkipReason::NotSelfDrawn);
        }
        self.render(ctx, main_view, globals, commands)
    }

    /// World-space bounds of the whole set.
    ///
    /// Host-facing only, e.g. for scene queries or editor picking. Culling
    /// tests each instance's own bounds and never reads this value.
    pub fn world_bounds(&self) -> Aabb {
        if let Some(strategy) = &self.bounds_strategy {
            return strategy.world_bounds(&self.local_to_world);
        }
        match self.position_strategy.placement_volume() {
            Some(volume) => volume.transformed(&self.local_to_world),
            None => FixedBounds::default().world_bounds(&self.local_to_world),
        }
    }

    /// Retire every buffer, unregister, and destroy an owned material.
    ///
    /// Buffers are destroyed when `commands` is flushed, after anything
    /// already recorded against them. Calling this again is a no-op.
    pub fn release(&mut self, commands: &mut CommandList) {
        if self.state == InstanceSetState::Released {
            return;
        }

        if let Some(registry) = self.registry.take().and_then(|weak| weak.upgrade()) {
            registry.unregister_id(self.id);
        }
        if let Some(buffers) = self.buffers.take() {
            info!(set = %self.label, capacity = buffers.capacity(), "Releasing instance buffers");
            buffers.retire(commands);
        }
        if let Some(material) = self.owned_material.take() {
            material.destroy();
        }

        self.dirty = DirtyFlags::empty();
        self.state = InstanceSetState::Released;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_instance_count() {
        assert_eq!(clamp_instance_count(0), MIN_INSTANCE_COUNT);
        assert_eq!(clamp_instance_count(500), 500);
        assert_eq!(clamp_instance_count(1_000_000), MAX_INSTANCE_COUNT);
    }

    #[test]
    fn test_descriptor_defaults() {
        let descriptor = InstanceSetDescriptor::new("Grass").with_instance_count(3);
        assert_eq!(descriptor.instance_count, MIN_INSTANCE_COUNT);
        assert!(descriptor.draw_by_self);
        assert!(descriptor.mesh.is_none());
    }

    #[test]
    fn test_new_set_is_uninitialized() {
        let set = RenderableInstanceSet::new(InstanceSetDescriptor::default());
        assert_eq!(set.state(), InstanceSetState::Uninitialized);
        assert_eq!(set.precondition(), Err(SkipReason::Uninitialized));
        assert!(!set.is_registered());
    }

    #[test]
    fn test_mutators_before_enable_stay_uninitialized() {
        let mut set = RenderableInstanceSet::new(InstanceSetDescriptor::default());
        set.set_instance_count(100);
        assert_eq!(set.state(), InstanceSetState::Uninitialized);
        assert_eq!(set.instance_count(), 100);
    }

    #[test]
    fn test_default_world_bounds_follow_placement() {
        let volume = Aabb::cube(20.0);
        let set = RenderableInstanceSet::new(
            InstanceSetDescriptor::default()
                .with_placement(PlacementParams::new(volume))
                .with_local_to_world(Mat4::from_translation(glam::Vec3::X * 100.0)),
        );
        let bounds = set.world_bounds();
        assert_eq!(bounds.center(), glam::Vec3::X * 100.0);
        assert_eq!(bounds.size(), volume.size());
    }

    #[test]
    fn test_shared_material_is_not_owned() {
        let shader = crate::material::ShaderAsset::unlit();
        let material = InstancedMaterial::new("Shared", shader);
        let set = RenderableInstanceSet::new(
            InstanceSetDescriptor::default().with_material(MaterialSource::Shared(material.clone())),
        );
        assert!(!set.owns_material());
        assert_eq!(set.material().map(|m| m.id()), Some(material.id()));
    }

    #[cfg(feature = "mock")]
    mod mock {
        use super::super::*;
        use thicket_test_utils::MockRenderContext;

        use crate::material::ShaderAsset;
        use crate::mesh::SubMesh;

        fn two_part_mesh(ctx: &MockRenderContext) -> Arc<InstanceMesh> {
            let vertex_buffer = ctx.create_buffer(&wgpu::BufferDescriptor {
                label: Some("vertices"),
                size: 24 * 8,
                usage: wgpu::BufferUsages::VERTEX,
                mapped_at_creation: false,
            });
            let index_buffer = ctx.create_buffer(&wgpu::BufferDescriptor {
                label: Some("indices"),
                size: 4 * 12,
                usage: wgpu::BufferUsages::INDEX,
                mapped_at_creation: false,
            });
            Arc::new(InstanceMesh::from_parts(
                "Two Parts",
                vertex_buffer,
                index_buffer,
                wgpu::IndexFormat::Uint32,
                crate::mesh::VertexFormat::PositionNormal,
                vec![
                    SubMesh {
                        index_start: 0,
                        index_count: 6,
                        base_vertex: 0,
                    },
                    SubMesh {
                        index_start: 6,
                        index_count: 6,
                        base_vertex: 4,
                    },
                ],
                Aabb::default(),
            ))
        }

        #[test]
        fn test_sub_mesh_index_clamped_to_last() {
            let ctx = MockRenderContext::new();
            let mesh = two_part_mesh(&ctx);
            let mut set = RenderableInstanceSet::new(
                InstanceSetDescriptor::default()
                    .with_mesh(mesh)
                    .with_sub_mesh_index(5)
                    .with_material(MaterialSource::FromShader(ShaderAsset::unlit())),
            );
            let mut commands = CommandList::new();
            set.enable(&ctx, &mut commands);

            assert_eq!(set.sub_mesh_index(), 1);
            let args = set.buffers().map(|b| b.args().args()).unwrap_or_default();
            assert_eq!(args, DrawIndexedIndirect::new(6, MIN_INSTANCE_COUNT, 6, 4, 0));
        }

        #[test]
        fn test_shader_material_recreated_on_shader_change() {
            let ctx = MockRenderContext::new();
            let mut set = RenderableInstanceSet::new(
                InstanceSetDescriptor::default()
                    .with_mesh(two_part_mesh(&ctx))
                    .with_material(MaterialSource::FromShader(ShaderAsset::unlit())),
            );
            let mut commands = CommandList::new();
            set.enable(&ctx, &mut commands);
            let first = set.material().expect("owned material");
            assert!(set.owns_material());

            let other = ShaderAsset::new("Other", "// other");
            set.set_material(Some(MaterialSource::FromShader(other.clone())));
            set.update(&ctx, &mut commands);

            assert!(first.is_destroyed());
            let second = set.material().expect("recreated material");
            assert_eq!(second.shader().id(), other.id());
        }
    }
}
