use crate::features::GpuFeatures;
use std::sync::Arc;

/// Errors raised while creating a [`GraphicsContext`].
#[derive(Debug, thiserror::Error)]
pub enum GraphicsError {
    #[error("no suitable GPU adapter found")]
    NoAdapter(#[source] wgpu::RequestAdapterError),
    #[error("failed to create device")]
    DeviceRequest(#[source] wgpu::RequestDeviceError),
    #[error("required GPU features are not supported by adapter `{adapter}`: {missing:?}")]
    MissingFeatures {
        adapter: String,
        missing: GpuFeatures,
    },
}

/// A shared graphics context.
///
/// # Ownership Pattern
///
/// ```rust,no_run
/// use thicket_render::GraphicsContext;
///
/// let ctx = GraphicsContext::new_owned_sync().expect("no GPU"); // Arc<Self>
/// let ctx2 = ctx.clone(); // Cheap clone (Arc)
/// ```
pub struct GraphicsContext {
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    /// The GPU features that were enabled on this context.
    enabled_features: GpuFeatures,
}

impl GraphicsContext {
    /// Creates a new graphics context with default settings.
    pub async fn new_owned() -> Result<Arc<Self>, GraphicsError> {
        Self::new_owned_with_descriptor(GraphicsContextDescriptor::default()).await
    }

    /// Creates a new graphics context synchronously.
    ///
    /// This blocks the current thread until the context is created.
    pub fn new_owned_sync() -> Result<Arc<Self>, GraphicsError> {
        pollster::block_on(Self::new_owned())
    }

    /// Creates a new graphics context with a custom descriptor.
    pub async fn new_owned_with_descriptor(
        descriptor: GraphicsContextDescriptor,
    ) -> Result<Arc<Self>, GraphicsError> {
        let context = Self::create_context_internal(descriptor).await?;
        Ok(Arc::new(context))
    }

    async fn create_context_internal(
        descriptor: GraphicsContextDescriptor,
    ) -> Result<Self, GraphicsError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: descriptor.backends,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: descriptor.power_preference,
                compatible_surface: None,
                force_fallback_adapter: descriptor.force_fallback_adapter,
            })
            .await
            .map_err(GraphicsError::NoAdapter)?;

        let supported = GpuFeatures::from_wgpu(adapter.features());
        if let Some(missing) = descriptor
            .required_gpu_features
            .check_against(supported)
            .missing()
        {
            return Err(GraphicsError::MissingFeatures {
                adapter: adapter.get_info().name,
                missing,
            });
        }

        let available_requested = descriptor.requested_gpu_features & supported;
        let unavailable_requested = descriptor.requested_gpu_features - available_requested;
        if !unavailable_requested.is_empty() {
            tracing::warn!(
                "Some requested GPU features are not available: {:?}",
                unavailable_requested
            );
        }

        let enabled_features = descriptor.required_gpu_features | available_requested;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                required_features: enabled_features.to_wgpu(),
                required_limits: descriptor.limits.clone(),
                label: descriptor.label,
                ..Default::default()
            })
            .await
            .map_err(GraphicsError::DeviceRequest)?;

        tracing::info!(
            "Created graphics context on `{}` with features: {:?}",
            adapter.get_info().name,
            enabled_features
        );

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            enabled_features,
        })
    }

    /// Get device info
    pub fn info(&self) -> wgpu::AdapterInfo {
        self.adapter.get_info()
    }

    /// Get device limits
    pub fn limits(&self) -> wgpu::Limits {
        self.device.limits()
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Get the enabled GPU features.
    pub fn gpu_features(&self) -> GpuFeatures {
        self.enabled_features
    }

    /// Check if a specific GPU feature is enabled.
    pub fn has_feature(&self, feature: GpuFeatures) -> bool {
        self.enabled_features.contains(feature)
    }

    /// Alignment required for dynamic uniform offsets.
    pub fn min_uniform_buffer_offset_alignment(&self) -> u32 {
        self.device.limits().min_uniform_buffer_offset_alignment
    }

    pub fn max_texture_dimension_2d(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }
}

/// Descriptor for configuring graphics context creation.
pub struct GraphicsContextDescriptor {
    /// GPU backends to use
    pub backends: wgpu::Backends,
    /// Power preference for adapter selection
    pub power_preference: wgpu::PowerPreference,
    /// Whether to force fallback adapter
    pub force_fallback_adapter: bool,
    /// Required GPU features (context creation fails if not available).
    pub required_gpu_features: GpuFeatures,
    /// Requested GPU features (best-effort, logs warning if unavailable).
    pub requested_gpu_features: GpuFeatures,
    /// Required device limits
    pub limits: wgpu::Limits,
    /// Optional label for debugging
    pub label: Option<&'static str>,
}

impl Default for GraphicsContextDescriptor {
    fn default() -> Self {
        Self {
            backends: wgpu::Backends::all(),
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            required_gpu_features: GpuFeatures::empty(),
            requested_gpu_features: GpuFeatures::empty(),
            limits: wgpu::Limits::default(),
            label: None,
        }
    }
}

impl GraphicsContextDescriptor {
    /// Create a new descriptor with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set required GPU features.
    pub fn require_features(mut self, features: GpuFeatures) -> Self {
        self.required_gpu_features = features;
        self
    }

    /// Set requested GPU features (best-effort, warns if unavailable).
    pub fn request_features(mut self, features: GpuFeatures) -> Self {
        self.requested_gpu_features = features;
        self
    }

    /// Set the power preference.
    pub fn power_preference(mut self, preference: wgpu::PowerPreference) -> Self {
        self.power_preference = preference;
        self
    }

    /// Set the backends to use.
    pub fn backends(mut self, backends: wgpu::Backends) -> Self {
        self.backends = backends;
        self
    }

    /// Use the software fallback adapter, when one is available.
    pub fn force_fallback_adapter(mut self, force: bool) -> Self {
        self.force_fallback_adapter = force;
        self
    }

    /// Set the device limits.
    pub fn limits(mut self, limits: wgpu::Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the debug label.
    pub fn label(mut self, label: &'static str) -> Self {
        self.label = Some(label);
        self
    }
}
