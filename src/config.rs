//! Frame graph configuration and TOML graph descriptions.
//!
//! A graph description lists resources, stages and links in one file:
//!
//! ```toml
//! [config]
//! back_buffer_count = 3
//! async_compute = true
//!
//! [[resource]]
//! name = "backbuffer"
//! kind = "texture"
//! origin = "back-buffer"
//!
//! [[resource]]
//! name = "gbuffer"
//! kind = "texture"
//!
//! [[stage]]
//! name = "geometry"
//! kind = "graphics"
//! width = 1280
//! height = 720
//! [[stage.usage]]
//! resource = "gbuffer"
//! binding = "color-attachment"
//! clear = { color = [0.0, 0.0, 0.0, 1.0] }
//!
//! [[stage]]
//! name = "shading"
//! kind = "graphics"
//! width = 1280
//! height = 720
//! [[stage.usage]]
//! resource = "gbuffer"
//! binding = "combined-sampler"
//! [[stage.usage]]
//! resource = "backbuffer"
//! binding = "color-attachment"
//!
//! [[link]]
//! from = "geometry"
//! to = "shading"
//! resource = "gbuffer"
//! ```
//!
//! [`FrameGraph::from_description`](crate::FrameGraph::from_description)
//! turns a [`GraphDescription`] into a ready-to-build frame graph.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{FrameGraphError, FrameGraphResult};
use crate::graph::{DrawType, RenderStageDescriptor, ResourceUsage};
use crate::resource::ResourceOrigin;
use crate::types::{BindingType, ClearValue, Extent2d, QueueKind, ResourceKind, StageKind};

/// Runtime configuration of a [`FrameGraph`](crate::FrameGraph).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FrameGraphConfig {
    /// Frames that may be in flight on the GPU at once.
    pub back_buffer_count: usize,
    /// How long frame pacing may block before giving up.
    pub fence_timeout_ms: u64,
    /// Run compute stages on the async compute queue. When `false`, they
    /// are moved to the graphics queue at build time.
    pub async_compute: bool,
}

impl Default for FrameGraphConfig {
    fn default() -> Self {
        Self {
            back_buffer_count: 3,
            fence_timeout_ms: 5000,
            async_compute: true,
        }
    }
}

impl FrameGraphConfig {
    pub fn with_back_buffer_count(mut self, back_buffer_count: usize) -> Self {
        self.back_buffer_count = back_buffer_count;
        self
    }

    pub fn with_fence_timeout_ms(mut self, fence_timeout_ms: u64) -> Self {
        self.fence_timeout_ms = fence_timeout_ms;
        self
    }

    pub fn with_async_compute(mut self, async_compute: bool) -> Self {
        self.async_compute = async_compute;
        self
    }

    pub fn fence_timeout(&self) -> Duration {
        Duration::from_millis(self.fence_timeout_ms)
    }

    /// Check that every value is usable.
    pub fn validate(&self) -> FrameGraphResult<()> {
        if self.back_buffer_count == 0 {
            return Err(FrameGraphError::InvalidParameter(
                "back_buffer_count must be at least 1".into(),
            ));
        }
        if self.fence_timeout_ms == 0 {
            return Err(FrameGraphError::InvalidParameter(
                "fence_timeout_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Origin of a described resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OriginDescription {
    #[default]
    Internal,
    External,
    /// External and rotating with the swapchain.
    BackBuffer,
}

impl From<OriginDescription> for ResourceOrigin {
    fn from(origin: OriginDescription) -> Self {
        match origin {
            OriginDescription::Internal => ResourceOrigin::Internal,
            OriginDescription::External => ResourceOrigin::External {
                back_buffer_bound: false,
            },
            OriginDescription::BackBuffer => ResourceOrigin::External {
                back_buffer_bound: true,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResourceDescription {
    pub name: String,
    pub kind: ResourceKind,
    #[serde(default = "default_subresources")]
    pub subresources: u32,
    #[serde(default)]
    pub origin: OriginDescription,
}

fn default_subresources() -> u32 {
    1
}

/// Draw call of a described graphics stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DrawDescription {
    IndexedIndirect,
    #[default]
    FullScreenTriangle,
    FullScreenQuad,
}

/// Clear value of a described attachment usage.
///
/// `color` clears a color attachment; `depth` (and optionally `stencil`)
/// clears a depth-stencil attachment.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
pub struct ClearDescription {
    pub color: Option<[f32; 4]>,
    pub depth: Option<f32>,
    pub stencil: Option<u32>,
}

impl ClearDescription {
    fn to_clear_value(self) -> Result<ClearValue, String> {
        match (self.color, self.depth) {
            (Some(_), Some(_)) => Err("a clear sets either color or depth, not both".into()),
            (Some([r, g, b, a]), None) => Ok(ClearValue::color(r, g, b, a)),
            (None, Some(depth)) => Ok(ClearValue::DepthStencil {
                depth,
                stencil: self.stencil.unwrap_or(0),
            }),
            (None, None) => Ok(ClearValue::None),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UsageDescription {
    pub resource: String,
    pub binding: BindingType,
    pub clear: Option<ClearDescription>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StageDescription {
    pub name: String,
    pub kind: StageKind,
    /// Overrides the kind's default queue.
    pub queue: Option<QueueKind>,
    /// Program key; defaults to the stage name.
    pub program: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    // Graphics
    #[serde(default)]
    pub draw: DrawDescription,
    pub max_draw_count: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,

    // Compute
    pub work_groups: Option<[u32; 3]>,

    // Ray tracing
    pub dimensions: Option<[u32; 3]>,

    #[serde(default)]
    pub usage: Vec<UsageDescription>,
}

fn default_enabled() -> bool {
    true
}

impl StageDescription {
    /// Convert into a stage descriptor.
    pub fn to_descriptor(&self) -> FrameGraphResult<RenderStageDescriptor> {
        let invalid = |reason: String| {
            FrameGraphError::Config(format!("stage '{}': {reason}", self.name))
        };

        let mut descriptor = match self.kind {
            StageKind::Graphics => {
                let (Some(width), Some(height)) = (self.width, self.height) else {
                    return Err(invalid("graphics stages need width and height".into()));
                };
                let draw = match self.draw {
                    DrawDescription::IndexedIndirect => {
                        let max_draw_count = self.max_draw_count.ok_or_else(|| {
                            invalid("indexed-indirect draws need max_draw_count".into())
                        })?;
                        DrawType::IndexedIndirect { max_draw_count }
                    }
                    DrawDescription::FullScreenTriangle => DrawType::FullScreenTriangle,
                    DrawDescription::FullScreenQuad => DrawType::FullScreenQuad,
                };
                RenderStageDescriptor::graphics(&self.name, draw, Extent2d::new(width, height))
            }
            StageKind::Compute => {
                let work_groups = self
                    .work_groups
                    .ok_or_else(|| invalid("compute stages need work_groups".into()))?;
                RenderStageDescriptor::compute(&self.name, work_groups)
            }
            StageKind::RayTracing => {
                let dimensions = self
                    .dimensions
                    .ok_or_else(|| invalid("ray tracing stages need dimensions".into()))?;
                RenderStageDescriptor::ray_tracing(&self.name, dimensions)
            }
        };

        if let Some(queue) = self.queue {
            descriptor = descriptor.with_queue(queue);
        }
        if let Some(program) = &self.program {
            descriptor = descriptor.with_program(program);
        }
        for usage in &self.usage {
            let clear = usage
                .clear
                .unwrap_or_default()
                .to_clear_value()
                .map_err(|reason| invalid(format!("usage of '{}': {reason}", usage.resource)))?;
            let resource_usage =
                ResourceUsage::new(&usage.resource, usage.binding).with_clear(clear);
            descriptor = descriptor.with_usage(resource_usage);
        }
        Ok(descriptor)
    }
}

/// Producer to consumer link between the usages of one resource.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LinkDescription {
    pub from: String,
    pub to: String,
    pub resource: String,
}

/// A whole frame graph loaded from TOML.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GraphDescription {
    #[serde(default)]
    pub config: FrameGraphConfig,
    #[serde(default)]
    pub resource: Vec<ResourceDescription>,
    #[serde(default)]
    pub stage: Vec<StageDescription>,
    #[serde(default)]
    pub link: Vec<LinkDescription>,
}

impl GraphDescription {
    /// Parse a description from TOML text.
    pub fn from_toml_str(content: &str) -> FrameGraphResult<Self> {
        toml::from_str(content).map_err(|e| {
            FrameGraphError::Config(format!("failed to parse graph description: {e}"))
        })
    }
}

/// Load a graph description from a TOML file.
pub fn load_graph_description(path: &Path) -> FrameGraphResult<GraphDescription> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| FrameGraphError::Config(format!("failed to read {}: {e}", path.display())))?;
    let description = toml::from_str::<GraphDescription>(&content)
        .map_err(|e| FrameGraphError::Config(format!("failed to parse {}: {e}", path.display())))?;

    log::info!(
        "Loaded graph description {} ({} resources, {} stages, {} links)",
        path.display(),
        description.resource.len(),
        description.stage.len(),
        description.link.len()
    );
    Ok(description)
}
