//! Frame scheduling with bounded frames in flight.
//!
//! [`FrameScheduler`] owns the per-frame command objects and one timeline
//! fence per queue. It paces the CPU so that at most `back_buffer_count`
//! frames are queued on the GPU, and submits recorded lists with the fence
//! waits and signals that order them.
//!
//! # Frame Slots
//!
//! ```text
//! back_buffer_count = 3
//!
//! Slot 0: [Frame 0] ──► [Frame 3] ──► [Frame 6] ──►
//! Slot 1: [Frame 1] ──► [Frame 4] ──► [Frame 7] ──►
//! Slot 2: [Frame 2] ──► [Frame 5] ──► [Frame 8] ──►
//! ```
//!
//! Every slot holds one [`CommandSet`] per pipeline entry. Before frame `F`
//! reuses slot `F mod N`, [`begin_frame`](FrameScheduler::begin_frame) blocks
//! on the fence values frame `F - N` left behind. Once they are reached that
//! frame, and every frame before it, is retired.
//!
//! # Fence Values
//!
//! | Submission | Waits on | Signals |
//! |------------|----------|---------|
//! | any list | own queue, previous value | own queue, previous value + 1 |
//! | list with [`wait_for`](crate::executor::RecordedList::wait_for) | other queue, latest value | own queue, previous value + 1 |
//!
//! Queues execute their submissions in order, so a cross-queue wait does not
//! weaken same-queue ordering. A value of 0 means nothing was submitted and
//! is never waited on.
//!
//! # Shutdown
//!
//! ```text
//! wait_idle()   every queue reaches its last signaled value
//! destroy()     command objects and fences are destroyed
//! ```

use std::time::Duration;

use crate::device::{FenceHandle, FenceSignal, FenceWait, GraphicsDevice};
use crate::error::{FrameGraphError, FrameGraphResult};
use crate::executor::{CommandSet, RecordedList};
use crate::sync::PipelinePlan;
use crate::types::QueueKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueueTimeline {
    fence: FenceHandle,
    last_signaled: u64,
}

#[derive(Debug, Default)]
struct FrameSlot {
    commands: Vec<CommandSet>,
    /// Latest value of every queue when the slot's frame finished submitting.
    signaled: Vec<(QueueKind, u64)>,
    frame_index: Option<u64>,
}

/// Manages frames in flight and multi-queue submission.
///
/// Not thread-safe; owned by the thread that renders.
#[derive(Debug)]
pub struct FrameScheduler {
    back_buffer_count: usize,
    fence_timeout: Duration,
    /// Indexed by [`QueueKind::index`]. Empty once destroyed.
    timelines: Vec<QueueTimeline>,
    slots: Vec<FrameSlot>,
    last_frame: Option<u64>,
    retired_frame: Option<u64>,
    frame_count: u64,
}

impl FrameScheduler {
    /// Create a scheduler and its per-queue fences.
    ///
    /// # Panics
    ///
    /// Panics if `back_buffer_count` is 0.
    pub fn new(
        device: &dyn GraphicsDevice,
        back_buffer_count: usize,
        fence_timeout: Duration,
    ) -> FrameGraphResult<Self> {
        assert!(back_buffer_count > 0, "back_buffer_count must be at least 1");

        let mut timelines = Vec::with_capacity(QueueKind::ALL.len());
        for _ in QueueKind::ALL {
            match device.create_fence(0) {
                Ok(fence) => timelines.push(QueueTimeline {
                    fence,
                    last_signaled: 0,
                }),
                Err(err) => {
                    for timeline in timelines {
                        device.destroy_fence(timeline.fence);
                    }
                    return Err(err.into());
                }
            }
        }

        Ok(Self {
            back_buffer_count,
            fence_timeout,
            timelines,
            slots: (0..back_buffer_count).map(|_| FrameSlot::default()).collect(),
            last_frame: None,
            retired_frame: None,
            frame_count: 0,
        })
    }

    /// Create command objects for every pipeline entry in every slot.
    ///
    /// Command objects of a previous plan are destroyed first; the GPU must
    /// not be using them.
    pub fn allocate(
        &mut self,
        device: &dyn GraphicsDevice,
        plan: &PipelinePlan,
    ) -> FrameGraphResult<()> {
        self.release_command_sets(device);

        for slot_index in 0..self.slots.len() {
            for stage in plan.stages() {
                match CommandSet::create(device, &stage.queues()) {
                    Ok(set) => self.slots[slot_index].commands.push(set),
                    Err(err) => {
                        log::error!("Failed to allocate command objects: {}", err);
                        self.release_command_sets(device);
                        return Err(err);
                    }
                }
            }
        }

        log::debug!(
            "Allocated command objects for {} pipeline entries x {} slots",
            plan.len(),
            self.slots.len()
        );
        Ok(())
    }

    /// Start frame `frame_index`, returning its slot.
    ///
    /// Blocks until the frame that last used the slot has retired. Frame
    /// indices must increase from call to call.
    pub fn begin_frame(
        &mut self,
        device: &dyn GraphicsDevice,
        frame_index: u64,
    ) -> FrameGraphResult<usize> {
        if let Some(last) = self.last_frame {
            if frame_index <= last {
                return Err(FrameGraphError::InvalidParameter(format!(
                    "frame index {frame_index} does not follow frame {last}"
                )));
            }
        }

        let slot_index = (frame_index % self.back_buffer_count as u64) as usize;
        let slot = &self.slots[slot_index];
        if let Some(previous) = slot.frame_index {
            for &(queue, value) in &slot.signaled {
                self.wait(device, queue, value)?;
            }
            self.retired_frame = Some(self.retired_frame.map_or(previous, |r| r.max(previous)));
        }

        log::trace!("Begin frame {} (slot {})", frame_index, slot_index);
        Ok(slot_index)
    }

    /// Command objects of pipeline entry `entry` in `slot`.
    pub fn command_set(&self, slot: usize, entry: usize) -> Option<&CommandSet> {
        self.slots.get(slot).and_then(|s| s.commands.get(entry))
    }

    /// Submit the lists of a frame in order and close the frame.
    pub fn submit_frame(
        &mut self,
        device: &dyn GraphicsDevice,
        slot: usize,
        frame_index: u64,
        lists: &[RecordedList],
    ) -> FrameGraphResult<()> {
        for recorded in lists {
            let own = self.timeline(recorded.queue)?;
            let waited = match recorded.wait_for {
                Some(other) if other != recorded.queue => self.timeline(other)?,
                _ => own,
            };
            let wait = (waited.last_signaled > 0).then_some(FenceWait {
                fence: waited.fence,
                value: waited.last_signaled,
            });
            let signal = FenceSignal {
                fence: own.fence,
                value: own.last_signaled + 1,
            };

            device.execute_command_lists(recorded.queue, recorded.list, wait, signal)?;
            self.timelines[recorded.queue.index()].last_signaled = signal.value;

            log::trace!(
                "Submitted list {} on {} queue (wait {:?}, signal {})",
                recorded.list.raw(),
                recorded.queue,
                wait.map(|w| w.value),
                signal.value
            );
        }

        let signaled = QueueKind::ALL
            .iter()
            .map(|&queue| (queue, self.last_signaled(queue)))
            .filter(|&(_, value)| value > 0)
            .collect();
        let frame_slot = self.slots.get_mut(slot).ok_or_else(|| {
            FrameGraphError::InvalidParameter(format!("frame slot {slot} out of range"))
        })?;
        frame_slot.signaled = signaled;
        frame_slot.frame_index = Some(frame_index);

        self.last_frame = Some(frame_index);
        self.frame_count += 1;

        log::trace!(
            "End frame {} (slot {}, {} lists)",
            frame_index,
            slot,
            lists.len()
        );
        Ok(())
    }

    /// Block until every queue has finished all submitted work.
    pub fn wait_idle(&mut self, device: &dyn GraphicsDevice) -> FrameGraphResult<()> {
        log::trace!("Waiting for GPU idle");
        for queue in QueueKind::ALL {
            let value = self.last_signaled(queue);
            self.wait(device, queue, value)?;
        }
        self.retired_frame = self.last_frame;
        log::trace!("GPU idle");
        Ok(())
    }

    fn wait(
        &self,
        device: &dyn GraphicsDevice,
        queue: QueueKind,
        value: u64,
    ) -> FrameGraphResult<()> {
        if value == 0 {
            return Ok(());
        }
        let timeline = self.timeline(queue)?;
        if device.wait_for_fence(timeline.fence, value, self.fence_timeout)? {
            return Ok(());
        }

        log::error!(
            "Timed out after {:?} waiting for {} fence value {} (completed {})",
            self.fence_timeout,
            queue,
            value,
            device.completed_fence_value(timeline.fence)
        );
        Err(FrameGraphError::FenceWaitTimeout {
            queue,
            value,
            timeout: self.fence_timeout,
        })
    }

    fn timeline(&self, queue: QueueKind) -> FrameGraphResult<QueueTimeline> {
        self.timelines
            .get(queue.index())
            .copied()
            .ok_or(FrameGraphError::NotBuilt)
    }

    /// Destroy every command set. The GPU must not be using them.
    pub fn release_command_sets(&mut self, device: &dyn GraphicsDevice) {
        for slot in &mut self.slots {
            for mut set in slot.commands.drain(..) {
                set.destroy(device);
            }
        }
    }

    /// Destroy command objects and fences. The GPU must be idle.
    pub fn destroy(&mut self, device: &dyn GraphicsDevice) {
        self.release_command_sets(device);
        for timeline in self.timelines.drain(..) {
            device.destroy_fence(timeline.fence);
        }
    }

    pub fn back_buffer_count(&self) -> usize {
        self.back_buffer_count
    }

    pub fn fence_timeout(&self) -> Duration {
        self.fence_timeout
    }

    /// Frames submitted so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Index of the most recently submitted frame.
    pub fn last_frame(&self) -> Option<u64> {
        self.last_frame
    }

    /// Most recent frame known to have finished on the GPU.
    pub fn retired_frame(&self) -> Option<u64> {
        self.retired_frame
    }

    /// Last fence value submitted on `queue`, 0 if none.
    pub fn last_signaled(&self, queue: QueueKind) -> u64 {
        self.timelines
            .get(queue.index())
            .map_or(0, |t| t.last_signaled)
    }

    /// Timeline fence of `queue`, `None` once destroyed.
    pub fn fence(&self, queue: QueueKind) -> Option<FenceHandle> {
        self.timelines.get(queue.index()).map(|t| t.fence)
    }
}
