//! Barriers and synchronization stages.

use crate::error::{FrameGraphError, FrameGraphResult};
use crate::resource::ResourceHandle;
use crate::types::{BindingType, PipelineStageMask, QueueKind};

/// Binding and owning queue of a resource between two usages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceState {
    pub binding: BindingType,
    pub queue: QueueKind,
}

impl ResourceState {
    pub const fn new(binding: BindingType, queue: QueueKind) -> Self {
        Self { binding, queue }
    }

    /// State of a back-buffer bound resource outside of a frame.
    pub const PRESENT: Self = Self::new(BindingType::Present, QueueKind::Graphics);
}

/// One resource state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Barrier {
    pub resource: ResourceHandle,
    pub before: ResourceState,
    pub after: ResourceState,
    pub src_stages: PipelineStageMask,
    pub dst_stages: PipelineStageMask,
}

impl Barrier {
    /// Whether the transition moves the resource to another queue.
    pub fn is_cross_queue(&self) -> bool {
        self.before.queue != self.after.queue
    }

    /// Same binding on the same queue: nothing to do.
    pub fn is_no_op(&self) -> bool {
        self.before == self.after
    }

    pub fn key(&self) -> BatchKey {
        BatchKey {
            src_queue: self.before.queue,
            dst_queue: self.after.queue,
            src_stages: self.src_stages,
            dst_stages: self.dst_stages,
        }
    }
}

/// Barriers sharing a key are issued in a single device call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatchKey {
    pub src_queue: QueueKind,
    pub dst_queue: QueueKind,
    pub src_stages: PipelineStageMask,
    pub dst_stages: PipelineStageMask,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarrierBatch {
    pub key: BatchKey,
    pub barriers: Vec<Barrier>,
}

/// Group barriers by [`BatchKey`], keeping first-seen order.
pub fn batch_barriers(barriers: impl IntoIterator<Item = Barrier>) -> Vec<BarrierBatch> {
    let mut batches = Vec::new();
    for barrier in barriers {
        insert_batched(&mut batches, barrier);
    }
    batches
}

fn insert_batched(batches: &mut Vec<BarrierBatch>, barrier: Barrier) {
    let key = barrier.key();
    match batches.iter_mut().find(|b| b.key == key) {
        Some(batch) => batch.barriers.push(barrier),
        None => batches.push(BarrierBatch {
            key,
            barriers: vec![barrier],
        }),
    }
}

/// A pipeline slot that only moves resources between states.
///
/// Every barrier of a stage ends on the same destination queue: the queue of
/// the render stage that follows it. Cross-queue barriers are split at record
/// time into a release on the source queue and an acquire on the destination.
///
/// A stage may also carry handover releases: the source half of ownership
/// transfers whose acquire is recorded later, at the head of the render stage
/// that first uses the resource. Only the stage at the head of the frame
/// holds them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynchronizationStageDescriptor {
    index: usize,
    destination: QueueKind,
    batches: Vec<BarrierBatch>,
    releases: Vec<BarrierBatch>,
}

impl SynchronizationStageDescriptor {
    pub(crate) fn new(index: usize, destination: QueueKind) -> Self {
        Self {
            index,
            destination,
            batches: Vec::new(),
            releases: Vec::new(),
        }
    }

    /// Add a barrier, batching it with earlier barriers of the same key.
    pub(crate) fn push(&mut self, barrier: Barrier, name: &str) -> FrameGraphResult<()> {
        if barrier.is_no_op() {
            return Err(FrameGraphError::no_op_barrier(
                name,
                barrier.after.binding,
                barrier.after.queue,
            ));
        }
        if barrier.after.queue != self.destination {
            return Err(FrameGraphError::SynchronizationGeneration(format!(
                "barrier for '{}' targets the {} queue in a synchronization stage for the {} queue",
                name, barrier.after.queue, self.destination
            )));
        }

        insert_batched(&mut self.batches, barrier);
        Ok(())
    }

    /// Add the release half of a transfer acquired by a later render stage.
    pub(crate) fn push_release(&mut self, barrier: Barrier, name: &str) -> FrameGraphResult<()> {
        if !barrier.is_cross_queue() {
            return Err(FrameGraphError::SynchronizationGeneration(format!(
                "handover of '{}' stays on the {} queue",
                name, barrier.before.queue
            )));
        }
        insert_batched(&mut self.releases, barrier);
        Ok(())
    }

    /// Position among the synchronization stages of the plan.
    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn set_index(&mut self, index: usize) {
        self.index = index;
    }

    pub fn destination_queue(&self) -> QueueKind {
        self.destination
    }

    pub fn batches(&self) -> &[BarrierBatch] {
        &self.batches
    }

    pub fn barriers(&self) -> impl Iterator<Item = &Barrier> {
        self.batches.iter().flat_map(|b| b.barriers.iter())
    }

    pub fn barrier_count(&self) -> usize {
        self.batches.iter().map(|b| b.barriers.len()).sum()
    }

    /// Handover releases, batched like [`batches`](Self::batches).
    pub fn releases(&self) -> &[BarrierBatch] {
        &self.releases
    }

    pub fn release_count(&self) -> usize {
        self.releases.iter().map(|b| b.barriers.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty() && self.releases.is_empty()
    }

    /// Queues that release resources in this stage, other than the
    /// destination. The destination waits on the first one that releases
    /// something it acquires.
    pub fn source_queues(&self) -> Vec<QueueKind> {
        let mut queues = Vec::new();
        for batch in self.batches.iter().chain(&self.releases) {
            let src = batch.key.src_queue;
            if src != self.destination && !queues.contains(&src) {
                queues.push(src);
            }
        }
        queues
    }

    /// Whether the destination queue records anything.
    pub fn has_destination_work(&self) -> bool {
        !self.batches.is_empty()
            || self
                .releases
                .iter()
                .any(|b| b.key.src_queue == self.destination)
    }

    /// Every queue this stage records on, source queues first.
    pub fn queues(&self) -> Vec<QueueKind> {
        let mut queues = self.source_queues();
        if self.has_destination_work() {
            queues.push(self.destination);
        }
        queues
    }
}
