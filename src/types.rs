//! Common value types shared by every part of the frame graph.

use std::fmt;

use bitflags::bitflags;
use serde::Deserialize;

/// Hardware queue a command list is submitted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueKind {
    /// Graphics (direct) queue. Also the presentation queue.
    Graphics,
    /// Asynchronous compute queue.
    Compute,
}

impl QueueKind {
    /// All queues, in index order.
    pub const ALL: [QueueKind; 2] = [QueueKind::Graphics, QueueKind::Compute];

    /// Dense index for per-queue tables.
    pub fn index(self) -> usize {
        match self {
            Self::Graphics => 0,
            Self::Compute => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Graphics => "graphics",
            Self::Compute => "compute",
        }
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Type of a logical GPU resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Texture,
    Buffer,
    AccelerationStructure,
}

/// The GPU-visible role a resource plays in one usage.
///
/// Two consecutive usages of a resource need a barrier exactly when their
/// binding types or queues differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BindingType {
    /// Sampled texture, optionally combined with a sampler.
    CombinedSampler,
    /// Read-only unordered access view.
    UnorderedAccessRead,
    /// Write-only unordered access view.
    UnorderedAccessWrite,
    /// Read-write unordered access view.
    UnorderedAccessReadWrite,
    /// Constant (uniform) buffer.
    ConstantBuffer,
    /// Color render target.
    ColorAttachment,
    /// Depth/stencil render target.
    DepthStencilAttachment,
    /// Ray tracing acceleration structure.
    AccelerationStructure,
    /// Presentable back buffer. Terminal for the frame.
    Present,
    /// Index buffer of an indexed draw.
    IndexBuffer,
    /// Indirect argument buffer of an indirect draw.
    IndirectArgument,
    /// Contents undefined. Fresh engine-managed handles start here.
    #[serde(skip)]
    Unbound,
}

impl BindingType {
    /// Color or depth-stencil attachment.
    pub fn is_attachment(self) -> bool {
        matches!(self, Self::ColorAttachment | Self::DepthStencilAttachment)
    }

    /// Consumed by the draw call itself rather than through a descriptor.
    pub fn is_draw_resource(self) -> bool {
        matches!(self, Self::IndexBuffer | Self::IndirectArgument)
    }

    /// Bound through the stage's descriptor set.
    pub fn is_descriptor_bound(self) -> bool {
        matches!(
            self,
            Self::CombinedSampler
                | Self::UnorderedAccessRead
                | Self::UnorderedAccessWrite
                | Self::UnorderedAccessReadWrite
                | Self::ConstantBuffer
                | Self::AccelerationStructure
        )
    }

    /// Whether the GPU may write the resource through this binding.
    pub fn is_writable(self) -> bool {
        matches!(
            self,
            Self::UnorderedAccessWrite
                | Self::UnorderedAccessReadWrite
                | Self::ColorAttachment
                | Self::DepthStencilAttachment
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::CombinedSampler => "combined-sampler",
            Self::UnorderedAccessRead => "uav-read",
            Self::UnorderedAccessWrite => "uav-write",
            Self::UnorderedAccessReadWrite => "uav-read-write",
            Self::ConstantBuffer => "constant-buffer",
            Self::ColorAttachment => "color-attachment",
            Self::DepthStencilAttachment => "depth-stencil-attachment",
            Self::AccelerationStructure => "acceleration-structure",
            Self::Present => "present",
            Self::IndexBuffer => "index-buffer",
            Self::IndirectArgument => "indirect-argument",
            Self::Unbound => "unbound",
        }
    }
}

impl fmt::Display for BindingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pipeline kind of a render stage, without its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageKind {
    Graphics,
    Compute,
    RayTracing,
}

bitflags! {
    /// Pipeline stages a barrier waits on or blocks.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct PipelineStageMask: u32 {
        const DRAW_INDIRECT = 1 << 0;
        const VERTEX_INPUT = 1 << 1;
        const VERTEX_SHADER = 1 << 2;
        const FRAGMENT_SHADER = 1 << 3;
        const EARLY_FRAGMENT_TESTS = 1 << 4;
        const LATE_FRAGMENT_TESTS = 1 << 5;
        const COLOR_ATTACHMENT_OUTPUT = 1 << 6;
        const COMPUTE_SHADER = 1 << 7;
        const RAY_TRACING_SHADER = 1 << 8;
        const BOTTOM_OF_PIPE = 1 << 9;
        const TOP_OF_PIPE = 1 << 10;
    }
}

impl PipelineStageMask {
    /// Stages that touch a resource bound as `binding` in a stage of `kind`.
    pub fn for_binding(binding: BindingType, kind: StageKind) -> Self {
        match binding {
            BindingType::ColorAttachment => Self::COLOR_ATTACHMENT_OUTPUT,
            BindingType::DepthStencilAttachment => {
                Self::EARLY_FRAGMENT_TESTS | Self::LATE_FRAGMENT_TESTS
            }
            BindingType::IndexBuffer => Self::VERTEX_INPUT,
            BindingType::IndirectArgument => Self::DRAW_INDIRECT,
            BindingType::Present => Self::BOTTOM_OF_PIPE,
            BindingType::Unbound => Self::TOP_OF_PIPE,
            _ => match kind {
                StageKind::Graphics => Self::VERTEX_SHADER | Self::FRAGMENT_SHADER,
                StageKind::Compute => Self::COMPUTE_SHADER,
                StageKind::RayTracing => Self::RAY_TRACING_SHADER,
            },
        }
    }
}

/// Opaque concrete GPU object supplied by the device collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GpuHandle(u64);

impl GpuHandle {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Clear value for an attachment at the start of a render pass.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ClearValue {
    /// Load existing contents.
    #[default]
    None,
    /// Clear color attachment with RGBA values.
    Color { r: f32, g: f32, b: f32, a: f32 },
    /// Clear depth and stencil.
    DepthStencil { depth: f32, stencil: u32 },
}

impl ClearValue {
    pub fn color(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self::Color { r, g, b, a }
    }

    pub fn depth(depth: f32) -> Self {
        Self::DepthStencil { depth, stencil: 0 }
    }
}

/// Width and height of a graphics stage's render area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent2d {
    pub width: u32,
    pub height: u32,
}

impl Extent2d {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Runtime parameters of a render stage that may change every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageParameters {
    /// Render area of a graphics stage.
    Extent { width: u32, height: u32 },
    /// Work group counts of a compute stage.
    WorkGroups { x: u32, y: u32, z: u32 },
    /// Ray dispatch dimensions of a ray tracing stage.
    Rays { width: u32, height: u32, depth: u32 },
}
