//! Dummy device for testing and development.
//!
//! This device doesn't talk to a GPU. It hands out increasing handle values,
//! keeps the commands recorded into each list, and logs every call so tests
//! can assert on exactly what the frame graph asked the device to do.
//!
//! By default submitted work completes immediately: executing a list sets the
//! signal fence to its value. [`DummyDevice::set_auto_complete`] turns that off
//! to simulate a GPU that falls behind.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use parking_lot::Mutex;

use crate::types::QueueKind;

use super::{
    CommandAllocatorHandle, CommandListHandle, DescriptorSetDescriptor, DescriptorSetHandle,
    DeviceError, DeviceObjectKind, DeviceResult, FenceHandle, FenceSignal, FenceWait, GpuCommand,
    GraphicsDevice, PipelineStateDescriptor, PipelineStateHandle, RenderPassDescriptor,
    RenderPassHandle,
};

/// A call made on the dummy device.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    Create {
        object: DeviceObjectKind,
        raw: u64,
    },
    Destroy {
        object: DeviceObjectKind,
        raw: u64,
    },
    ResetAllocator(CommandAllocatorHandle),
    WaitFence {
        fence: FenceHandle,
        value: u64,
    },
    Execute {
        queue: QueueKind,
        list: CommandListHandle,
    },
}

/// A list as it was when it got submitted.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub queue: QueueKind,
    pub list: CommandListHandle,
    pub commands: Vec<GpuCommand>,
    pub wait: Option<FenceWait>,
    pub signal: FenceSignal,
}

#[derive(Debug, Default)]
struct RecordedList {
    commands: Vec<GpuCommand>,
    recording: bool,
}

#[derive(Debug, Default)]
struct DummyState {
    next_raw: u64,
    calls: Vec<DeviceCall>,
    live: HashSet<(DeviceObjectKind, u64)>,
    lists: HashMap<CommandListHandle, RecordedList>,
    fences: HashMap<FenceHandle, u64>,
    submissions: Vec<Submission>,
    descriptor_sets: HashMap<DescriptorSetHandle, DescriptorSetDescriptor>,
    render_passes: HashMap<RenderPassHandle, RenderPassDescriptor>,
    manual_completion: bool,
    fail_creation: Option<DeviceObjectKind>,
}

impl DummyState {
    fn create(&mut self, object: DeviceObjectKind) -> DeviceResult<u64> {
        if self.fail_creation == Some(object) {
            return Err(DeviceError::CreationFailed {
                object,
                reason: "injected failure".into(),
            });
        }
        self.next_raw += 1;
        let raw = self.next_raw;
        self.live.insert((object, raw));
        self.calls.push(DeviceCall::Create { object, raw });
        Ok(raw)
    }

    fn destroy(&mut self, object: DeviceObjectKind, raw: u64) {
        if !self.live.remove(&(object, raw)) {
            log::warn!("DummyDevice: destroying unknown {} {}", object, raw);
        }
        self.calls.push(DeviceCall::Destroy { object, raw });
    }
}

/// Dummy graphics device.
#[derive(Debug, Default)]
pub struct DummyDevice {
    state: Mutex<DummyState>,
}

impl DummyDevice {
    /// Create a new dummy device.
    pub fn new() -> Self {
        Self::default()
    }

    /// When `false`, submissions no longer signal their fences until
    /// [`complete_all`](Self::complete_all) is called.
    pub fn set_auto_complete(&self, auto_complete: bool) {
        self.state.lock().manual_completion = !auto_complete;
    }

    /// Make every following creation of `object` fail.
    pub fn fail_creation_of(&self, object: Option<DeviceObjectKind>) {
        self.state.lock().fail_creation = object;
    }

    /// Signal every submitted fence value.
    pub fn complete_all(&self) {
        let mut state = self.state.lock();
        let targets: Vec<(FenceHandle, u64)> = state
            .submissions
            .iter()
            .map(|s| (s.signal.fence, s.signal.value))
            .collect();
        for (fence, value) in targets {
            if let Some(completed) = state.fences.get_mut(&fence) {
                *completed = (*completed).max(value);
            }
        }
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<DeviceCall> {
        self.state.lock().calls.clone()
    }

    /// Every submission made so far, in order.
    pub fn submissions(&self) -> Vec<Submission> {
        self.state.lock().submissions.clone()
    }

    /// Fence waits issued so far, in order.
    pub fn fence_waits(&self) -> Vec<(FenceHandle, u64)> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                DeviceCall::WaitFence { fence, value } => Some((*fence, *value)),
                _ => None,
            })
            .collect()
    }

    /// Forget recorded calls and submissions, keeping live objects.
    pub fn clear_log(&self) {
        let mut state = self.state.lock();
        state.calls.clear();
        state.submissions.clear();
    }

    /// Number of live objects of `object` kind.
    pub fn live_count(&self, object: DeviceObjectKind) -> usize {
        self.state
            .lock()
            .live
            .iter()
            .filter(|(kind, _)| *kind == object)
            .count()
    }

    /// Commands currently recorded into `list`.
    pub fn recorded(&self, list: CommandListHandle) -> Vec<GpuCommand> {
        self.state
            .lock()
            .lists
            .get(&list)
            .map(|recorded| recorded.commands.clone())
            .unwrap_or_default()
    }

    /// The descriptor a live descriptor set was created from.
    pub fn descriptor_set(&self, set: DescriptorSetHandle) -> Option<DescriptorSetDescriptor> {
        self.state.lock().descriptor_sets.get(&set).cloned()
    }

    /// The descriptor a live render pass was created from.
    pub fn render_pass(&self, render_pass: RenderPassHandle) -> Option<RenderPassDescriptor> {
        self.state.lock().render_passes.get(&render_pass).cloned()
    }
}

impl GraphicsDevice for DummyDevice {
    fn name(&self) -> &str {
        "Dummy"
    }

    fn create_command_allocator(&self, queue: QueueKind) -> DeviceResult<CommandAllocatorHandle> {
        let raw = self.state.lock().create(DeviceObjectKind::CommandAllocator)?;
        log::trace!("DummyDevice: command allocator {} on {} queue", raw, queue);
        Ok(CommandAllocatorHandle(raw))
    }

    fn destroy_command_allocator(&self, allocator: CommandAllocatorHandle) {
        self.state
            .lock()
            .destroy(DeviceObjectKind::CommandAllocator, allocator.0);
    }

    fn create_command_list(
        &self,
        queue: QueueKind,
        _allocator: CommandAllocatorHandle,
    ) -> DeviceResult<CommandListHandle> {
        let mut state = self.state.lock();
        let raw = state.create(DeviceObjectKind::CommandList)?;
        state
            .lists
            .insert(CommandListHandle(raw), RecordedList::default());
        log::trace!("DummyDevice: command list {} on {} queue", raw, queue);
        Ok(CommandListHandle(raw))
    }

    fn destroy_command_list(&self, list: CommandListHandle) {
        let mut state = self.state.lock();
        state.lists.remove(&list);
        state.destroy(DeviceObjectKind::CommandList, list.0);
    }

    fn create_descriptor_set(
        &self,
        descriptor: &DescriptorSetDescriptor,
    ) -> DeviceResult<DescriptorSetHandle> {
        let mut state = self.state.lock();
        let raw = state.create(DeviceObjectKind::DescriptorSet)?;
        state
            .descriptor_sets
            .insert(DescriptorSetHandle(raw), descriptor.clone());
        log::trace!(
            "DummyDevice: descriptor set {} '{}' ({} bindings)",
            raw,
            descriptor.label,
            descriptor.bindings.len()
        );
        Ok(DescriptorSetHandle(raw))
    }

    fn destroy_descriptor_set(&self, set: DescriptorSetHandle) {
        let mut state = self.state.lock();
        state.descriptor_sets.remove(&set);
        state.destroy(DeviceObjectKind::DescriptorSet, set.0);
    }

    fn create_render_pass(
        &self,
        descriptor: &RenderPassDescriptor,
    ) -> DeviceResult<RenderPassHandle> {
        let mut state = self.state.lock();
        let raw = state.create(DeviceObjectKind::RenderPass)?;
        state
            .render_passes
            .insert(RenderPassHandle(raw), descriptor.clone());
        log::trace!(
            "DummyDevice: render pass {} '{}' ({} attachments)",
            raw,
            descriptor.label,
            descriptor.attachments.len()
        );
        Ok(RenderPassHandle(raw))
    }

    fn destroy_render_pass(&self, render_pass: RenderPassHandle) {
        let mut state = self.state.lock();
        state.render_passes.remove(&render_pass);
        state.destroy(DeviceObjectKind::RenderPass, render_pass.0);
    }

    fn create_pipeline_state(
        &self,
        descriptor: &PipelineStateDescriptor,
    ) -> DeviceResult<PipelineStateHandle> {
        let raw = self.state.lock().create(DeviceObjectKind::PipelineState)?;
        log::trace!(
            "DummyDevice: pipeline state {} '{}' ({:?})",
            raw,
            descriptor.label,
            descriptor.kind
        );
        Ok(PipelineStateHandle(raw))
    }

    fn destroy_pipeline_state(&self, pipeline: PipelineStateHandle) {
        self.state
            .lock()
            .destroy(DeviceObjectKind::PipelineState, pipeline.0);
    }

    fn create_fence(&self, initial_value: u64) -> DeviceResult<FenceHandle> {
        let mut state = self.state.lock();
        let raw = state.create(DeviceObjectKind::Fence)?;
        state.fences.insert(FenceHandle(raw), initial_value);
        Ok(FenceHandle(raw))
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        let mut state = self.state.lock();
        state.fences.remove(&fence);
        state.destroy(DeviceObjectKind::Fence, fence.0);
    }

    fn completed_fence_value(&self, fence: FenceHandle) -> u64 {
        self.state.lock().fences.get(&fence).copied().unwrap_or(0)
    }

    fn wait_for_fence(
        &self,
        fence: FenceHandle,
        value: u64,
        timeout: Duration,
    ) -> DeviceResult<bool> {
        let start = std::time::Instant::now();
        self.state
            .lock()
            .calls
            .push(DeviceCall::WaitFence { fence, value });

        loop {
            {
                let state = self.state.lock();
                let completed = state
                    .fences
                    .get(&fence)
                    .copied()
                    .ok_or(DeviceError::InvalidHandle(DeviceObjectKind::Fence))?;
                if completed >= value {
                    return Ok(true);
                }
            }
            if start.elapsed() >= timeout {
                return Ok(false);
            }
            std::thread::yield_now();
        }
    }

    fn reset_command_allocator(&self, allocator: CommandAllocatorHandle) -> DeviceResult<()> {
        self.state
            .lock()
            .calls
            .push(DeviceCall::ResetAllocator(allocator));
        Ok(())
    }

    fn begin_command_list(
        &self,
        list: CommandListHandle,
        _allocator: CommandAllocatorHandle,
    ) -> DeviceResult<()> {
        let mut state = self.state.lock();
        let recorded = state
            .lists
            .get_mut(&list)
            .ok_or(DeviceError::InvalidHandle(DeviceObjectKind::CommandList))?;
        recorded.commands.clear();
        recorded.recording = true;
        Ok(())
    }

    fn record(&self, list: CommandListHandle, command: GpuCommand) -> DeviceResult<()> {
        let mut state = self.state.lock();
        let recorded = state
            .lists
            .get_mut(&list)
            .ok_or(DeviceError::InvalidHandle(DeviceObjectKind::CommandList))?;
        if !recorded.recording {
            return Err(DeviceError::NotRecording);
        }
        recorded.commands.push(command);
        Ok(())
    }

    fn end_command_list(&self, list: CommandListHandle) -> DeviceResult<()> {
        let mut state = self.state.lock();
        let recorded = state
            .lists
            .get_mut(&list)
            .ok_or(DeviceError::InvalidHandle(DeviceObjectKind::CommandList))?;
        if !recorded.recording {
            return Err(DeviceError::NotRecording);
        }
        recorded.recording = false;
        Ok(())
    }

    fn execute_command_lists(
        &self,
        queue: QueueKind,
        list: CommandListHandle,
        wait: Option<FenceWait>,
        signal: FenceSignal,
    ) -> DeviceResult<()> {
        let mut state = self.state.lock();
        let commands = match state.lists.get(&list) {
            Some(recorded) if recorded.recording => return Err(DeviceError::NotRecording),
            Some(recorded) => recorded.commands.clone(),
            None => return Err(DeviceError::InvalidHandle(DeviceObjectKind::CommandList)),
        };

        log::trace!(
            "DummyDevice: execute list {} on {} queue ({} commands, wait {:?}, signal {})",
            list.0,
            queue,
            commands.len(),
            wait.map(|w| w.value),
            signal.value
        );

        state.calls.push(DeviceCall::Execute { queue, list });
        state.submissions.push(Submission {
            queue,
            list,
            commands,
            wait,
            signal,
        });

        if !state.manual_completion {
            let completed = state
                .fences
                .get_mut(&signal.fence)
                .ok_or(DeviceError::InvalidHandle(DeviceObjectKind::Fence))?;
            *completed = (*completed).max(signal.value);
        }

        Ok(())
    }
}

static_assertions::assert_impl_all!(DummyDevice: Send, Sync);
