//! Synchronization planning.
//!
//! [`plan`] walks the ordered render stages and derives, for every resource,
//! the state transitions its usages require. The result is a
//! [`PipelinePlan`]: a flat list of [`PipelineStage`]s where every render
//! stage may be preceded by a synchronization stage holding the barriers that
//! must complete before it runs.
//!
//! ```text
//! [Sync 0] Render 0  [Sync 1] Render 1  [Sync 2] Render 2  [Sync 3]
//!                                                           trailing
//! ```
//!
//! Synchronization stages that end up empty are removed and the remaining
//! ones renumbered, so the plan above usually shrinks to something like
//! `Render 0, Sync 0, Render 1, Render 2`.
//!
//! # Resource State Machine
//!
//! Each resource carries a `(binding, queue)` state through the frame. Moving
//! to the next usage only costs something when that state changes:
//!
//! | Change | Result |
//! |--------|--------|
//! | none | nothing |
//! | binding and/or queue, consumer is not an attachment | barrier |
//! | binding, consumer is an attachment on the same queue | folded into the render pass initial layout |
//! | queue, consumer is an attachment | barrier, no folding |
//!
//! After an attachment usage the render pass final layout is set to the
//! binding of the next usage, so that transition is folded too. If the next
//! usage runs on another queue, a queue-only barrier follows.
//!
//! The state at the end of the frame loops back to the first usage of the
//! next frame. Back-buffer bound resources always end the frame in `Present`
//! on the graphics queue, if necessary through a barrier in the trailing
//! synchronization stage. Loop-back transitions are recorded at the head of
//! the first render stage using the resource ("entry barriers"). When the
//! loop-back moves the resource to another queue, the queue it rests on
//! releases it in the synchronization stage at the head of the frame, after
//! presentation and before anything else of the frame runs there.
//!
//! Engine-managed handles start out `Unbound`. The first frame rendering into
//! such a slot skips the handover and transitions from `Unbound` straight
//! into the state each [`EntryState`] names.

mod barrier;

use std::collections::HashMap;

use crate::compiler::StageOrder;
use crate::error::{FrameGraphError, FrameGraphResult};
use crate::graph::{StageGraph, StageHandle};
use crate::resource::{ResourceHandle, ResourceRegistry};
use crate::types::{BindingType, ClearValue, PipelineStageMask, QueueKind, StageKind};

pub use barrier::{
    batch_barriers, Barrier, BarrierBatch, BatchKey, ResourceState,
    SynchronizationStageDescriptor,
};

/// Folded layouts of one render pass attachment.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentPlan {
    /// Index of the usage in the stage descriptor.
    pub usage: usize,
    pub resource: ResourceHandle,
    pub binding: BindingType,
    /// Layout the render pass transitions from when it begins.
    pub initial: BindingType,
    /// Layout the render pass leaves the attachment in when it ends.
    pub final_binding: BindingType,
    pub clear: ClearValue,
}

/// State a resource must be in when the first stage using it begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryState {
    pub resource: ResourceHandle,
    pub state: ResourceState,
    /// Stages of the first usage that wait on the transition.
    pub stages: PipelineStageMask,
}

/// A render stage as placed in the plan.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderStagePlan {
    pub stage: StageHandle,
    pub name: String,
    pub kind: StageKind,
    pub queue: QueueKind,
    pub weight: u32,
    pub attachments: Vec<AttachmentPlan>,
    /// Transitions from the previous frame's final state, recorded before the
    /// stage's own work.
    pub entry_barriers: Vec<Barrier>,
    /// Resources whose first usage in the frame is this stage.
    pub entry_states: Vec<EntryState>,
}

impl RenderStagePlan {
    /// Queue this stage has to wait for because an entry barrier takes a
    /// resource over from it.
    pub fn entry_wait_queue(&self) -> Option<QueueKind> {
        self.entry_barriers
            .iter()
            .find(|b| b.is_cross_queue())
            .map(|b| b.before.queue)
    }

    /// Whether skipping this stage would leave a resource in the wrong state.
    pub fn owes_transitions(&self) -> bool {
        !self.entry_barriers.is_empty()
            || self.attachments.iter().any(|a| a.initial != a.final_binding)
    }
}

/// One slot of the flattened execution plan.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineStage {
    Render(RenderStagePlan),
    Synchronization(SynchronizationStageDescriptor),
}

impl PipelineStage {
    /// Queues that receive a command list from this entry, in submission order.
    pub fn queues(&self) -> Vec<QueueKind> {
        match self {
            Self::Render(render) => vec![render.queue],
            Self::Synchronization(sync) => sync.queues(),
        }
    }

    pub fn as_render(&self) -> Option<&RenderStagePlan> {
        match self {
            Self::Render(render) => Some(render),
            Self::Synchronization(_) => None,
        }
    }

    pub fn as_synchronization(&self) -> Option<&SynchronizationStageDescriptor> {
        match self {
            Self::Render(_) => None,
            Self::Synchronization(sync) => Some(sync),
        }
    }
}

/// Result of planning: ordered render and synchronization stages.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelinePlan {
    stages: Vec<PipelineStage>,
    resting: Vec<(ResourceHandle, ResourceState)>,
    order: StageOrder,
}

impl PipelinePlan {
    pub fn stages(&self) -> &[PipelineStage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stage order the plan was built from.
    pub fn order(&self) -> &StageOrder {
        &self.order
    }

    pub fn render_stages(&self) -> impl Iterator<Item = &RenderStagePlan> {
        self.stages.iter().filter_map(PipelineStage::as_render)
    }

    pub fn synchronization_stages(&self) -> impl Iterator<Item = &SynchronizationStageDescriptor> {
        self.stages.iter().filter_map(PipelineStage::as_synchronization)
    }

    pub fn render_stage(&self, stage: StageHandle) -> Option<&RenderStagePlan> {
        self.render_stages().find(|r| r.stage == stage)
    }

    pub fn render_stage_count(&self) -> usize {
        self.render_stages().count()
    }

    pub fn sync_stage_count(&self) -> usize {
        self.synchronization_stages().count()
    }

    /// Standalone barriers across all synchronization stages.
    pub fn barrier_count(&self) -> usize {
        self.synchronization_stages()
            .map(SynchronizationStageDescriptor::barrier_count)
            .sum()
    }

    /// Handover releases paired with cross-queue entry barriers.
    pub fn release_count(&self) -> usize {
        self.synchronization_stages()
            .map(SynchronizationStageDescriptor::release_count)
            .sum()
    }

    /// Frame loop-back transitions recorded inside render stages.
    pub fn entry_barrier_count(&self) -> usize {
        self.render_stages().map(|r| r.entry_barriers.len()).sum()
    }

    /// State a resource is in between frames, and must be in before frame 0.
    pub fn resting_state(&self, resource: ResourceHandle) -> Option<ResourceState> {
        self.resting
            .iter()
            .find(|(handle, _)| *handle == resource)
            .map(|&(_, state)| state)
    }

    /// Every resource some planned stage uses.
    pub fn resources(&self) -> impl Iterator<Item = ResourceHandle> + '_ {
        self.resting.iter().map(|&(handle, _)| handle)
    }
}

#[derive(Debug, Clone, Copy)]
struct Occurrence {
    position: usize,
    usage: usize,
    binding: BindingType,
    queue: QueueKind,
    kind: StageKind,
    clear: ClearValue,
}

impl Occurrence {
    fn state(&self) -> ResourceState {
        ResourceState::new(self.binding, self.queue)
    }

    fn stages(&self) -> PipelineStageMask {
        PipelineStageMask::for_binding(self.binding, self.kind)
    }
}

struct PlanBuilder {
    render: Vec<RenderStagePlan>,
    /// One per render stage plus the trailing one.
    sync: Vec<SynchronizationStageDescriptor>,
}

impl PlanBuilder {
    fn emit(
        &mut self,
        occurrence: usize,
        position: usize,
        barrier: Barrier,
        name: &str,
    ) -> FrameGraphResult<()> {
        if occurrence > 0 {
            return self.sync[position].push(barrier, name);
        }
        if barrier.is_no_op() {
            return Err(FrameGraphError::no_op_barrier(
                name,
                barrier.after.binding,
                barrier.after.queue,
            ));
        }
        if barrier.is_cross_queue() {
            // Released by the resting queue before the frame touches it
            self.sync[0].push_release(barrier, name)?;
        }
        self.render[position].entry_barriers.push(barrier);
        Ok(())
    }
}

/// Derive the pipeline plan for `order`.
pub fn plan(
    graph: &StageGraph,
    registry: &ResourceRegistry,
    order: &StageOrder,
) -> FrameGraphResult<PipelinePlan> {
    let mut builder = PlanBuilder {
        render: Vec::with_capacity(order.len()),
        sync: Vec::with_capacity(order.len() + 1),
    };

    // Usages grouped by resource, in first-seen order
    let mut resources: Vec<(ResourceHandle, Vec<Occurrence>)> = Vec::new();
    let mut slots: HashMap<ResourceHandle, usize> = HashMap::new();

    for (position, (handle, weight)) in order.iter().enumerate() {
        let stage = graph.stage(handle);
        let queue = order.queue(position);
        let kind = stage.kind();

        builder.sync.push(SynchronizationStageDescriptor::new(position, queue));
        builder.render.push(RenderStagePlan {
            stage: handle,
            name: stage.name.clone(),
            kind,
            queue,
            weight,
            attachments: Vec::new(),
            entry_barriers: Vec::new(),
            entry_states: Vec::new(),
        });

        let referrer = format!("stage '{}'", stage.name);
        for (usage_index, usage) in stage.usages.iter().enumerate() {
            let resource = registry.resolve(&usage.resource, &referrer)?;
            let slot = *slots.entry(resource).or_insert_with(|| {
                resources.push((resource, Vec::new()));
                resources.len() - 1
            });
            let occurrences = &mut resources[slot].1;
            if occurrences.last().map(|o| o.position) == Some(position) {
                // Repeated usage with the same binding
                continue;
            }
            occurrences.push(Occurrence {
                position,
                usage: usage_index,
                binding: usage.binding,
                queue,
                kind,
                clear: usage.clear,
            });
        }
    }
    builder
        .sync
        .push(SynchronizationStageDescriptor::new(order.len(), QueueKind::Graphics));

    let mut resting = Vec::with_capacity(resources.len());
    for (resource, occurrences) in &resources {
        let entry = registry.resource(*resource);
        let state = walk_resource(
            &mut builder,
            *resource,
            entry.name(),
            entry.is_back_buffer_bound(),
            occurrences,
        )?;
        resting.push((*resource, state));
    }

    let PlanBuilder { render, sync } = builder;
    let mut sync = sync.into_iter();
    let mut stages = Vec::with_capacity(render.len() * 2 + 1);
    for render_stage in render {
        if let Some(before) = sync.next() {
            stages.push(PipelineStage::Synchronization(before));
        }
        stages.push(PipelineStage::Render(render_stage));
    }
    stages.extend(sync.map(PipelineStage::Synchronization));

    let removed = remove_empty_synchronization_stages(&mut stages);

    let plan = PipelinePlan {
        stages,
        resting,
        order: order.clone(),
    };

    let folded = plan
        .render_stages()
        .flat_map(|r| r.attachments.iter())
        .filter(|a| a.initial != a.binding || a.final_binding != a.binding)
        .count();
    log::info!(
        "Planned {} render stages, {} synchronization stages, {} barriers \
         ({} entry, {} handover releases, {} folded attachments, {} empty stages removed)",
        plan.render_stage_count(),
        plan.sync_stage_count(),
        plan.barrier_count(),
        plan.entry_barrier_count(),
        plan.release_count(),
        folded,
        removed
    );

    Ok(plan)
}

/// Walk one resource through its usages, returning its resting state.
fn walk_resource(
    builder: &mut PlanBuilder,
    resource: ResourceHandle,
    name: &str,
    back_buffer: bool,
    occurrences: &[Occurrence],
) -> FrameGraphResult<ResourceState> {
    let (first, last) = match (occurrences.first(), occurrences.last()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => {
            return Err(FrameGraphError::SynchronizationGeneration(format!(
                "resource '{name}' has no usages to plan"
            )))
        }
    };

    // State at frame start, which is also the state at frame end
    let resting = if back_buffer {
        ResourceState::PRESENT
    } else if last.binding.is_attachment() {
        ResourceState::new(first.binding, last.queue)
    } else {
        last.state()
    };
    let mut state = resting;
    let mut touched = if back_buffer {
        PipelineStageMask::BOTTOM_OF_PIPE
    } else {
        last.stages()
    };

    for (i, occurrence) in occurrences.iter().enumerate() {
        let target = occurrence.state();
        let dst_stages = occurrence.stages();

        if occurrence.binding.is_attachment() {
            let initial = if state.queue == occurrence.queue {
                state.binding
            } else {
                let barrier = Barrier {
                    resource,
                    before: state,
                    after: target,
                    src_stages: touched,
                    dst_stages,
                };
                builder.emit(i, occurrence.position, barrier, name)?;
                occurrence.binding
            };

            if i == 0 {
                builder.render[occurrence.position].entry_states.push(EntryState {
                    resource,
                    state: ResourceState::new(initial, occurrence.queue),
                    stages: dst_stages,
                });
            }

            let next = match occurrences.get(i + 1) {
                Some(next) => next.state(),
                None if back_buffer => ResourceState::PRESENT,
                None => first.state(),
            };
            builder.render[occurrence.position]
                .attachments
                .push(AttachmentPlan {
                    usage: occurrence.usage,
                    resource,
                    binding: occurrence.binding,
                    initial,
                    final_binding: next.binding,
                    clear: occurrence.clear,
                });
            state = ResourceState::new(next.binding, occurrence.queue);
        } else {
            if i == 0 {
                builder.render[occurrence.position].entry_states.push(EntryState {
                    resource,
                    state: target,
                    stages: dst_stages,
                });
            }
            if state == target {
                touched = dst_stages;
                continue;
            }
            let barrier = Barrier {
                resource,
                before: state,
                after: target,
                src_stages: touched,
                dst_stages,
            };
            builder.emit(i, occurrence.position, barrier, name)?;
            state = target;
        }
        touched = dst_stages;
    }

    if back_buffer && state != ResourceState::PRESENT {
        let trailing = builder.sync.len() - 1;
        builder.sync[trailing].push(
            Barrier {
                resource,
                before: state,
                after: ResourceState::PRESENT,
                src_stages: touched,
                dst_stages: PipelineStageMask::BOTTOM_OF_PIPE,
            },
            name,
        )?;
        state = ResourceState::PRESENT;
    }

    if state != resting {
        return Err(FrameGraphError::SynchronizationGeneration(format!(
            "resource '{}' ends the frame as {} on {} but starts it as {} on {}",
            name, state.binding, state.queue, resting.binding, resting.queue
        )));
    }

    Ok(resting)
}

/// Drop empty synchronization stages and renumber the rest.
///
/// Returns the number of stages removed.
pub fn remove_empty_synchronization_stages(stages: &mut Vec<PipelineStage>) -> usize {
    let before = stages.len();
    stages.retain(|stage| {
        !matches!(stage, PipelineStage::Synchronization(sync) if sync.is_empty())
    });

    let mut index = 0;
    for stage in stages.iter_mut() {
        if let PipelineStage::Synchronization(sync) = stage {
            sync.set_index(index);
            index += 1;
        }
    }
    before - stages.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::build_order;
    use crate::graph::{DrawType, RenderStageDescriptor, ResourceUsage};
    use crate::resource::ResourceOrigin;
    use crate::types::{Extent2d, ResourceKind};
    use rstest::rstest;

    fn stage_for(name: &str, binding: BindingType, queue: QueueKind) -> RenderStageDescriptor {
        let graphics = binding.is_attachment()
            || binding.is_draw_resource()
            || binding == BindingType::Present;
        if graphics {
            let extent = Extent2d::new(8, 8);
            RenderStageDescriptor::graphics(name, DrawType::FullScreenTriangle, extent)
        } else {
            RenderStageDescriptor::compute(name, [1, 1, 1]).with_queue(queue)
        }
    }

    fn build(
        graph: &StageGraph,
        registry: &ResourceRegistry,
    ) -> FrameGraphResult<PipelinePlan> {
        let order = build_order(graph, registry, true)?;
        plan(graph, registry, &order)
    }

    fn registry_with(name: &str, origin: ResourceOrigin) -> ResourceRegistry {
        let mut registry = ResourceRegistry::new(3);
        registry
            .declare(name, ResourceKind::Texture, 1, origin)
            .unwrap();
        registry
    }

    /// Producer and consumer stage sharing resource `r`.
    fn pair(
        producer: (BindingType, QueueKind),
        consumer: (BindingType, QueueKind),
    ) -> PipelinePlan {
        let registry = registry_with("r", ResourceOrigin::Internal);
        let mut graph = StageGraph::new();
        graph
            .add_stage(stage_for("P", producer.0, producer.1).uses("r", producer.0))
            .unwrap();
        graph
            .add_stage(stage_for("C", consumer.0, consumer.1).uses("r", consumer.0))
            .unwrap();
        graph.link_resource("P", "C", "r").unwrap();
        build(&graph, &registry).unwrap()
    }

    const G: QueueKind = QueueKind::Graphics;
    const C: QueueKind = QueueKind::Compute;

    const UAV_WRITE: BindingType = BindingType::UnorderedAccessWrite;
    const SAMPLER: BindingType = BindingType::CombinedSampler;
    const CBV: BindingType = BindingType::ConstantBuffer;
    const COLOR: BindingType = BindingType::ColorAttachment;
    const DEPTH: BindingType = BindingType::DepthStencilAttachment;

    /// `(barriers, handover releases, synchronization stages)` per pair.
    #[rstest]
    #[case::uav_to_sampler((UAV_WRITE, G), (SAMPLER, G), (1, 0, 1))]
    #[case::read_after_read((SAMPLER, G), (SAMPLER, G), (0, 0, 0))]
    #[case::same_binding_cross_queue((CBV, G), (CBV, C), (1, 1, 2))]
    #[case::uav_cross_queue((UAV_WRITE, C), (CBV, G), (1, 1, 2))]
    #[case::attachment_then_sampler((COLOR, G), (SAMPLER, G), (0, 0, 0))]
    #[case::uav_then_attachment((UAV_WRITE, G), (COLOR, G), (0, 0, 0))]
    #[case::attachment_across_queues((UAV_WRITE, C), (COLOR, G), (1, 1, 2))]
    #[case::depth_then_compute_read((DEPTH, G), (SAMPLER, C), (1, 1, 2))]
    fn test_binding_matrix(
        #[case] producer: (BindingType, QueueKind),
        #[case] consumer: (BindingType, QueueKind),
        #[case] expected: (usize, usize, usize),
    ) {
        let plan = pair(producer, consumer);
        let (barriers, releases, sync_stages) = expected;
        assert_eq!(plan.barrier_count(), barriers);
        assert_eq!(plan.release_count(), releases);
        assert_eq!(plan.sync_stage_count(), sync_stages);
        assert_eq!(plan.render_stage_count(), 2);

        // Every cross-queue entry barrier has its release half
        let crossing_entries = plan
            .render_stages()
            .flat_map(|r| r.entry_barriers.iter())
            .filter(|b| b.is_cross_queue())
            .count();
        assert_eq!(crossing_entries, releases);
    }

    #[test]
    fn test_geometry_then_shading_single_barrier() {
        let plan = pair(
            (BindingType::UnorderedAccessWrite, G),
            (BindingType::CombinedSampler, G),
        );

        let sync: Vec<_> = plan.synchronization_stages().collect();
        assert_eq!(sync.len(), 1);
        assert_eq!(sync[0].index(), 0);
        let barrier = sync[0].barriers().next().unwrap();
        assert_eq!(barrier.before.binding, BindingType::UnorderedAccessWrite);
        assert_eq!(barrier.after.binding, BindingType::CombinedSampler);
        assert!(!barrier.is_cross_queue());

        // Render P, Sync 0, Render C
        assert!(plan.stages()[0].as_render().is_some());
        assert!(plan.stages()[1].as_synchronization().is_some());
        assert!(plan.stages()[2].as_render().is_some());
    }

    #[test]
    fn test_cross_queue_stage_lists_compute_first() {
        let plan = pair(
            (BindingType::UnorderedAccessWrite, C),
            (BindingType::ConstantBuffer, G),
        );

        let sync = plan.synchronization_stages().last().unwrap();
        assert_eq!(sync.queues(), vec![C, G]);
        assert_eq!(sync.destination_queue(), G);

        // Frame loop-back: graphics hands the buffer over at the head of the
        // frame and the compute stage takes it back first
        let head = plan.stages()[0].as_synchronization().unwrap();
        assert_eq!(head.queues(), vec![G]);
        let release = &head.releases()[0].barriers[0];
        assert_eq!(release.before, ResourceState::new(BindingType::ConstantBuffer, G));
        assert_eq!(release.after, ResourceState::new(BindingType::UnorderedAccessWrite, C));

        let producer = plan.render_stages().next().unwrap();
        assert_eq!(producer.entry_wait_queue(), Some(G));
        assert_eq!(producer.entry_barriers, vec![*release]);
    }

    #[test]
    fn test_first_users_name_entry_states() {
        let plan = pair(
            (BindingType::ColorAttachment, G),
            (BindingType::CombinedSampler, C),
        );
        let stages: Vec<_> = plan.render_stages().collect();

        // The render pass begins from the layout the cross-queue entry
        // barrier leaves the texture in
        assert_eq!(
            stages[0].entry_states,
            vec![EntryState {
                resource: ResourceHandle::new(0),
                state: ResourceState::new(BindingType::ColorAttachment, G),
                stages: PipelineStageMask::COLOR_ATTACHMENT_OUTPUT,
            }]
        );
        assert!(stages[1].entry_states.is_empty());
        assert_eq!(plan.resources().collect::<Vec<_>>(), vec![ResourceHandle::new(0)]);
    }

    #[test]
    fn test_attachment_folds_layouts() {
        let plan = pair(
            (BindingType::ColorAttachment, G),
            (BindingType::CombinedSampler, G),
        );
        let producer = plan.render_stages().next().unwrap();
        assert_eq!(
            producer.attachments,
            vec![AttachmentPlan {
                usage: 0,
                resource: ResourceHandle::new(0),
                binding: BindingType::ColorAttachment,
                initial: BindingType::CombinedSampler,
                final_binding: BindingType::CombinedSampler,
                clear: ClearValue::None,
            }]
        );
        assert!(producer.entry_barriers.is_empty());
        assert!(!producer.owes_transitions());
    }

    #[test]
    fn test_back_buffer_single_attachment_presents() {
        let registry = registry_with(
            "swapchain",
            ResourceOrigin::External {
                back_buffer_bound: true,
            },
        );
        let mut graph = StageGraph::new();
        graph
            .add_stage(
                RenderStageDescriptor::graphics("ui", DrawType::FullScreenQuad, Extent2d::new(8, 8))
                    .with_usage(
                        ResourceUsage::new("swapchain", BindingType::ColorAttachment)
                            .with_clear(ClearValue::color(0.0, 0.0, 0.0, 1.0)),
                    ),
            )
            .unwrap();

        let plan = build(&graph, &registry).unwrap();
        assert_eq!(plan.barrier_count(), 0);
        assert_eq!(plan.entry_barrier_count(), 0);
        assert_eq!(plan.sync_stage_count(), 0);

        let attachment = &plan.render_stages().next().unwrap().attachments[0];
        assert_eq!(attachment.initial, BindingType::Present);
        assert_eq!(attachment.final_binding, BindingType::Present);
        assert_eq!(
            plan.resting_state(ResourceHandle::new(0)),
            Some(ResourceState::PRESENT)
        );
    }

    #[test]
    fn test_back_buffer_written_by_compute_needs_trailing_barrier() {
        let registry = registry_with(
            "swapchain",
            ResourceOrigin::External {
                back_buffer_bound: true,
            },
        );
        let mut graph = StageGraph::new();
        graph
            .add_stage(
                RenderStageDescriptor::compute("blit", [8, 8, 1])
                    .uses("swapchain", BindingType::UnorderedAccessWrite),
            )
            .unwrap();

        let plan = build(&graph, &registry).unwrap();
        let stages = plan.stages();
        assert_eq!(stages.len(), 3);

        let trailing = stages[2].as_synchronization().unwrap();
        let barrier = trailing.barriers().next().unwrap();
        assert_eq!(barrier.before.queue, C);
        assert_eq!(barrier.after, ResourceState::PRESENT);
        assert_eq!(trailing.queues(), vec![C, G]);

        // After presentation graphics hands the image back to compute
        let head = stages[0].as_synchronization().unwrap();
        assert_eq!(head.release_count(), 1);
        assert_eq!(head.queues(), vec![G]);

        let render = stages[1].as_render().unwrap();
        assert_eq!(render.entry_barriers[0].before, ResourceState::PRESENT);
        assert_eq!(render.entry_wait_queue(), Some(G));
    }

    #[test]
    fn test_three_readers_share_one_barrier() {
        let registry = registry_with("t", ResourceOrigin::Internal);
        let mut graph = StageGraph::new();
        graph
            .add_stage(stage_for("W", UAV_WRITE, G).uses("t", UAV_WRITE))
            .unwrap();
        for name in ["R0", "R1", "R2"] {
            graph
                .add_stage(stage_for(name, SAMPLER, G).uses("t", SAMPLER))
                .unwrap();
            graph.link_resource("W", name, "t").unwrap();
        }

        let plan = build(&graph, &registry).unwrap();
        assert_eq!(plan.barrier_count(), 1);
        assert_eq!(plan.render_stage_count(), 4);
    }

    #[test]
    fn test_barriers_with_same_key_are_batched() {
        let mut registry = ResourceRegistry::new(2);
        for name in ["a", "b"] {
            registry
                .declare(name, ResourceKind::Texture, 1, ResourceOrigin::Internal)
                .unwrap();
        }
        let mut graph = StageGraph::new();
        graph
            .add_stage(
                stage_for("W", BindingType::UnorderedAccessWrite, G)
                    .uses("a", BindingType::UnorderedAccessWrite)
                    .uses("b", BindingType::UnorderedAccessWrite),
            )
            .unwrap();
        graph
            .add_stage(
                stage_for("R", BindingType::CombinedSampler, G)
                    .uses("a", BindingType::CombinedSampler)
                    .uses("b", BindingType::CombinedSampler),
            )
            .unwrap();
        graph.link_resource("W", "R", "a").unwrap();
        graph.link_resource("W", "R", "b").unwrap();

        let plan = build(&graph, &registry).unwrap();
        let sync = plan.synchronization_stages().next().unwrap();
        assert_eq!(sync.batches().len(), 1);
        assert_eq!(sync.barrier_count(), 2);
    }

    #[test]
    fn test_plan_is_idempotent() {
        let registry = registry_with("r", ResourceOrigin::Internal);
        let mut graph = StageGraph::new();
        graph
            .add_stage(stage_for("P", UAV_WRITE, C).uses("r", UAV_WRITE))
            .unwrap();
        graph
            .add_stage(stage_for("Q", CBV, G).uses("r", CBV))
            .unwrap();
        graph.link_resource("P", "Q", "r").unwrap();

        let first = build(&graph, &registry).unwrap();
        let second = build(&graph, &registry).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.barrier_count(), second.barrier_count());
    }

    #[test]
    fn test_remove_empty_stages_renumbers() {
        let mut nonempty = SynchronizationStageDescriptor::new(2, G);
        nonempty
            .push(
                Barrier {
                    resource: ResourceHandle::new(0),
                    before: ResourceState::new(BindingType::UnorderedAccessWrite, G),
                    after: ResourceState::new(BindingType::CombinedSampler, G),
                    src_stages: PipelineStageMask::COMPUTE_SHADER,
                    dst_stages: PipelineStageMask::FRAGMENT_SHADER,
                },
                "t",
            )
            .unwrap();

        let mut stages = vec![
            PipelineStage::Synchronization(SynchronizationStageDescriptor::new(0, G)),
            PipelineStage::Synchronization(SynchronizationStageDescriptor::new(1, G)),
            PipelineStage::Synchronization(nonempty),
        ];
        let removed = remove_empty_synchronization_stages(&mut stages);

        assert_eq!(removed, 2);
        assert_eq!(stages.len(), 1);
        assert_eq!(stages[0].as_synchronization().unwrap().index(), 0);
    }

    #[test]
    fn test_unused_resources_have_no_resting_state() {
        let mut registry = registry_with("r", ResourceOrigin::Internal);
        let unused = registry
            .declare("unused", ResourceKind::Buffer, 1, ResourceOrigin::Internal)
            .unwrap();
        let mut graph = StageGraph::new();
        graph
            .add_stage(stage_for("P", CBV, G).uses("r", CBV))
            .unwrap();

        let plan = build(&graph, &registry).unwrap();
        assert_eq!(plan.resting_state(unused), None);
        assert_eq!(
            plan.resting_state(ResourceHandle::new(0)),
            Some(ResourceState::new(BindingType::ConstantBuffer, G))
        );
    }
}
