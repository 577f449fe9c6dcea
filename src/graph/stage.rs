//! Render stage descriptors.
//!
//! A render stage is one unit of GPU work. Its pipeline kind is a tagged
//! variant carrying the kind-specific parameters, so the executor can match
//! on it exhaustively:
//!
//! | Kind | Parameters | Recorded as |
//! |------|------------|-------------|
//! | [`PipelineKind::Graphics`] | draw type, render extent | render pass + draw |
//! | [`PipelineKind::Compute`] | work group counts | dispatch |
//! | [`PipelineKind::RayTracing`] | ray dimensions | trace rays |

use crate::types::{BindingType, Extent2d, QueueKind, StageKind, StageParameters};

use super::usage::ResourceUsage;

/// Draw call issued by a graphics stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrawType {
    /// Scene geometry: index buffer plus indirect argument buffer usages.
    IndexedIndirect { max_draw_count: u32 },
    /// Three vertices generated in the vertex shader.
    FullScreenTriangle,
    /// Four vertices as a triangle strip.
    FullScreenQuad,
}

impl DrawType {
    /// Vertex count of a fixed full-screen draw.
    pub fn fixed_vertex_count(self) -> Option<u32> {
        match self {
            Self::IndexedIndirect { .. } => None,
            Self::FullScreenTriangle => Some(3),
            Self::FullScreenQuad => Some(4),
        }
    }
}

/// Pipeline kind of a stage together with its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    Graphics { draw: DrawType, extent: Extent2d },
    Compute { work_groups: [u32; 3] },
    RayTracing { dimensions: [u32; 3] },
}

impl PipelineKind {
    pub fn kind(&self) -> StageKind {
        match self {
            Self::Graphics { .. } => StageKind::Graphics,
            Self::Compute { .. } => StageKind::Compute,
            Self::RayTracing { .. } => StageKind::RayTracing,
        }
    }

    /// Whether the current parameters produce no GPU work at all.
    pub fn is_empty_dispatch(&self) -> bool {
        match self {
            Self::Graphics { extent, .. } => extent.is_empty(),
            Self::Compute { work_groups } => work_groups.contains(&0),
            Self::RayTracing { dimensions } => dimensions.contains(&0),
        }
    }

    /// Apply new runtime parameters.
    ///
    /// Fails if `parameters` belong to a different pipeline kind.
    pub fn apply(&mut self, parameters: StageParameters) -> Result<(), String> {
        match (self, parameters) {
            (Self::Graphics { extent, .. }, StageParameters::Extent { width, height }) => {
                *extent = Extent2d::new(width, height);
            }
            (Self::Compute { work_groups }, StageParameters::WorkGroups { x, y, z }) => {
                *work_groups = [x, y, z];
            }
            (
                Self::RayTracing { dimensions },
                StageParameters::Rays {
                    width,
                    height,
                    depth,
                },
            ) => {
                *dimensions = [width, height, depth];
            }
            (kind, parameters) => {
                return Err(format!(
                    "{:?} parameters do not apply to a {:?} stage",
                    parameters,
                    kind.kind()
                ));
            }
        }
        Ok(())
    }
}

/// Declarative description of one render stage.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderStageDescriptor {
    pub name: String,
    pub pipeline: PipelineKind,
    /// Queue the stage is submitted to.
    pub queue: QueueKind,
    /// Opaque program key handed to the device when creating the pipeline state.
    pub program: String,
    /// Usages in binding order.
    pub usages: Vec<ResourceUsage>,
}

impl RenderStageDescriptor {
    fn new(name: impl Into<String>, pipeline: PipelineKind, queue: QueueKind) -> Self {
        let name = name.into();
        Self {
            program: name.clone(),
            name,
            pipeline,
            queue,
            usages: Vec::new(),
        }
    }

    /// A graphics stage on the graphics queue.
    pub fn graphics(name: impl Into<String>, draw: DrawType, extent: Extent2d) -> Self {
        Self::new(
            name,
            PipelineKind::Graphics { draw, extent },
            QueueKind::Graphics,
        )
    }

    /// A compute stage on the async compute queue.
    pub fn compute(name: impl Into<String>, work_groups: [u32; 3]) -> Self {
        Self::new(
            name,
            PipelineKind::Compute { work_groups },
            QueueKind::Compute,
        )
    }

    /// A ray tracing stage on the graphics queue.
    pub fn ray_tracing(name: impl Into<String>, dimensions: [u32; 3]) -> Self {
        Self::new(
            name,
            PipelineKind::RayTracing { dimensions },
            QueueKind::Graphics,
        )
    }

    pub fn with_queue(mut self, queue: QueueKind) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_usage(mut self, usage: ResourceUsage) -> Self {
        self.usages.push(usage);
        self
    }

    /// Shorthand for `with_usage(ResourceUsage::new(resource, binding))`.
    pub fn uses(self, resource: impl Into<String>, binding: BindingType) -> Self {
        self.with_usage(ResourceUsage::new(resource, binding))
    }

    pub fn kind(&self) -> StageKind {
        self.pipeline.kind()
    }

    /// Index of the first usage of `resource`.
    pub fn find_usage(&self, resource: &str) -> Option<usize> {
        self.usages.iter().position(|u| u.resource == resource)
    }

    /// Index of the first usage bound as `binding`.
    pub fn find_binding(&self, binding: BindingType) -> Option<usize> {
        self.usages.iter().position(|u| u.binding == binding)
    }
}
