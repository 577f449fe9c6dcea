//! Graphics device collaborator interface.
//!
//! The frame graph never talks to a graphics API directly. Everything it needs
//! from the GPU goes through [`GraphicsDevice`]: creating and destroying the
//! command, descriptor, render pass, pipeline and fence objects it owns,
//! recording [`GpuCommand`]s into command lists, and submitting those lists
//! with timeline fence waits and signals.
//!
//! # Object Ownership
//!
//! | Object | Owner | Lifetime |
//! |--------|-------|----------|
//! | Command allocator / list | [`FrameScheduler`](crate::scheduler::FrameScheduler) | Until rebuild or shutdown |
//! | Descriptor set / render pass | [`StageBindings`](crate::resource::StageBindings) | Replaced copy-on-write, released after the in-flight window |
//! | Pipeline state | [`StageBindings`](crate::resource::StageBindings) | Until rebuild or shutdown |
//! | Fence | [`FrameScheduler`](crate::scheduler::FrameScheduler) | Until shutdown |
//!
//! Handles are plain `Copy` newtypes; each handle is owned by exactly one table
//! and destroyed through the device by that table.

pub mod dummy;

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::types::{
    BindingType, ClearValue, Extent2d, GpuHandle, PipelineStageMask, QueueKind, StageKind,
};

pub use dummy::{DeviceCall, DummyDevice, Submission};

/// Kind of device object, used in error reports and bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceObjectKind {
    CommandAllocator,
    CommandList,
    DescriptorSet,
    RenderPass,
    PipelineState,
    Fence,
}

impl fmt::Display for DeviceObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CommandAllocator => "command allocator",
            Self::CommandList => "command list",
            Self::DescriptorSet => "descriptor set",
            Self::RenderPass => "render pass",
            Self::PipelineState => "pipeline state",
            Self::Fence => "fence",
        };
        f.write_str(name)
    }
}

/// Errors reported by a [`GraphicsDevice`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("failed to create {object}: {reason}")]
    CreationFailed {
        object: DeviceObjectKind,
        reason: String,
    },
    #[error("invalid {0} handle")]
    InvalidHandle(DeviceObjectKind),
    #[error("command list is not in the recording state")]
    NotRecording,
    #[error("device lost")]
    DeviceLost,
}

pub type DeviceResult<T> = Result<T, DeviceError>;

/// Handle to a command allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandAllocatorHandle(pub(crate) u64);

/// Handle to a command list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandListHandle(pub(crate) u64);

/// Handle to a descriptor set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorSetHandle(pub(crate) u64);

/// Handle to a render pass object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderPassHandle(pub(crate) u64);

/// Handle to a pipeline state object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineStateHandle(pub(crate) u64);

/// Handle to a timeline fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FenceHandle(pub(crate) u64);

macro_rules! impl_raw_handle {
    ($($handle:ident),* $(,)?) => {
        $(
            impl $handle {
                /// Wrap a raw device value.
                pub const fn from_raw(raw: u64) -> Self {
                    Self(raw)
                }

                /// The raw device value.
                pub const fn raw(self) -> u64 {
                    self.0
                }
            }
        )*
    };
}

impl_raw_handle!(
    CommandAllocatorHandle,
    CommandListHandle,
    DescriptorSetHandle,
    RenderPassHandle,
    PipelineStateHandle,
    FenceHandle,
);

/// One entry of a descriptor set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorBinding {
    /// Position of the usage inside its stage.
    pub slot: u32,
    pub binding: BindingType,
    /// One handle per subresource.
    pub resources: Vec<GpuHandle>,
    pub sampler: Option<GpuHandle>,
}

/// Everything needed to create a descriptor set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorSetDescriptor {
    pub label: String,
    pub bindings: Vec<DescriptorBinding>,
}

/// One attachment of a render pass with its folded layouts.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPassAttachment {
    pub resource: GpuHandle,
    pub binding: BindingType,
    /// Binding the attachment is in when the pass begins.
    pub initial: BindingType,
    /// Binding the attachment is left in when the pass ends.
    pub final_binding: BindingType,
    pub clear: ClearValue,
}

/// Everything needed to create a render pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPassDescriptor {
    pub label: String,
    pub attachments: Vec<RenderPassAttachment>,
}

/// Everything needed to create a pipeline state object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineStateDescriptor {
    pub label: String,
    pub kind: StageKind,
    /// Opaque program key resolved by the device (shaders, fixed-function state).
    pub program: String,
}

/// Half of a barrier that a command list records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarrierKind {
    /// State change within one queue.
    Transition,
    /// Source half of a queue ownership transfer.
    Release,
    /// Destination half of a queue ownership transfer.
    Acquire,
}

/// A single resource barrier as seen by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BarrierDescriptor {
    pub resource: GpuHandle,
    pub kind: BarrierKind,
    pub before: BindingType,
    pub after: BindingType,
    pub src_queue: QueueKind,
    pub dst_queue: QueueKind,
    pub src_stages: PipelineStageMask,
    pub dst_stages: PipelineStageMask,
}

/// Commands the executor records into a command list.
#[derive(Debug, Clone, PartialEq)]
pub enum GpuCommand {
    BeginRenderPass {
        render_pass: RenderPassHandle,
        extent: Extent2d,
    },
    SetViewport(Extent2d),
    SetScissor(Extent2d),
    BindPipeline(PipelineStateHandle),
    BindDescriptorSet(DescriptorSetHandle),
    DrawIndexedIndirect {
        index_buffer: GpuHandle,
        indirect_buffer: GpuHandle,
        max_draw_count: u32,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    EndRenderPass,
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    TraceRays {
        width: u32,
        height: u32,
        depth: u32,
    },
    /// One multi-barrier call.
    Barriers(Vec<BarrierDescriptor>),
}

/// Fence value a submission waits for before executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FenceWait {
    pub fence: FenceHandle,
    pub value: u64,
}

/// Fence value a submission signals when it completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FenceSignal {
    pub fence: FenceHandle,
    pub value: u64,
}

/// The graphics device collaborator.
///
/// Implementations are expected to be internally synchronized; all methods
/// take `&self`.
pub trait GraphicsDevice: Send + Sync {
    /// Human-readable device name for logs.
    fn name(&self) -> &str;

    fn create_command_allocator(&self, queue: QueueKind) -> DeviceResult<CommandAllocatorHandle>;
    fn destroy_command_allocator(&self, allocator: CommandAllocatorHandle);

    fn create_command_list(
        &self,
        queue: QueueKind,
        allocator: CommandAllocatorHandle,
    ) -> DeviceResult<CommandListHandle>;
    fn destroy_command_list(&self, list: CommandListHandle);

    fn create_descriptor_set(
        &self,
        descriptor: &DescriptorSetDescriptor,
    ) -> DeviceResult<DescriptorSetHandle>;
    fn destroy_descriptor_set(&self, set: DescriptorSetHandle);

    fn create_render_pass(&self, descriptor: &RenderPassDescriptor)
        -> DeviceResult<RenderPassHandle>;
    fn destroy_render_pass(&self, render_pass: RenderPassHandle);

    fn create_pipeline_state(
        &self,
        descriptor: &PipelineStateDescriptor,
    ) -> DeviceResult<PipelineStateHandle>;
    fn destroy_pipeline_state(&self, pipeline: PipelineStateHandle);

    fn create_fence(&self, initial_value: u64) -> DeviceResult<FenceHandle>;
    fn destroy_fence(&self, fence: FenceHandle);

    /// Last value the GPU has signaled on `fence`.
    fn completed_fence_value(&self, fence: FenceHandle) -> u64;

    /// Block until `fence` reaches `value`.
    ///
    /// Returns `Ok(false)` if `timeout` elapsed first.
    fn wait_for_fence(&self, fence: FenceHandle, value: u64, timeout: Duration)
        -> DeviceResult<bool>;

    /// Reset an allocator, invalidating everything recorded from it.
    fn reset_command_allocator(&self, allocator: CommandAllocatorHandle) -> DeviceResult<()>;

    /// Put `list` in the recording state, backed by `allocator`.
    fn begin_command_list(
        &self,
        list: CommandListHandle,
        allocator: CommandAllocatorHandle,
    ) -> DeviceResult<()>;

    /// Append one command to a recording list.
    fn record(&self, list: CommandListHandle, command: GpuCommand) -> DeviceResult<()>;

    /// Close a recording list.
    fn end_command_list(&self, list: CommandListHandle) -> DeviceResult<()>;

    /// Submit one closed list to `queue`.
    fn execute_command_lists(
        &self,
        queue: QueueKind,
        list: CommandListHandle,
        wait: Option<FenceWait>,
        signal: FenceSignal,
    ) -> DeviceResult<()>;
}

static_assertions::assert_obj_safe!(GraphicsDevice);
