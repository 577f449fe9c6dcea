//! Pipeline stage recording.
//!
//! One function per pipeline slot kind, plus [`record_pipeline_stage`] which
//! dispatches on the [`PipelineStage`] tag. Recording never submits anything;
//! it returns the finished lists in the order they must be submitted and
//! leaves fence values to the [`FrameScheduler`](crate::scheduler::FrameScheduler).
//!
//! # Render Stages
//!
//! ```text
//! reset allocator, begin list
//! entry barriers (frame loop-back)
//! graphics:     begin render pass, viewport, scissor, pipeline, descriptors,
//!               draw, end render pass
//! compute:      pipeline, descriptors, dispatch
//! ray tracing:  pipeline, descriptors, trace rays
//! end list
//! ```
//!
//! A stage that is inactive this frame, or whose parameters describe no work
//! (zero extent, work groups or rays), records nothing. If it owes state
//! transitions to later stages, a list holding only those transitions is
//! recorded instead.
//!
//! Resources whose handles are still unbound in this back buffer slot skip
//! their entry barrier. The stage transitions them from `Unbound` into the
//! entry state instead, on its own queue, since no other queue owns them yet.
//!
//! # Synchronization Stages
//!
//! Each source queue gets a list of release barriers; the destination queue
//! gets one list holding same-queue transitions and the matching acquires.
//! Source lists come first and the destination list waits on them. Handover
//! releases are recorded on their source queue as well, minus those of
//! unbound slots.

use crate::device::{
    BarrierDescriptor, BarrierKind, CommandAllocatorHandle, CommandListHandle, DeviceError,
    DeviceObjectKind, GpuCommand, GraphicsDevice,
};
use crate::error::{FrameGraphError, FrameGraphResult};
use crate::graph::{DrawType, PipelineKind, RenderStageDescriptor, StageGraph};
use crate::resource::{ResourceHandle, ResourceRegistry, StageBindings, StageObjects};
use crate::sync::{
    batch_barriers, Barrier, BarrierBatch, EntryState, PipelineStage, RenderStagePlan,
    SynchronizationStageDescriptor,
};
use crate::types::{BindingType, GpuHandle, PipelineStageMask, QueueKind, StageKind};

/// Allocator and list pair for one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueCommands {
    pub queue: QueueKind,
    pub allocator: CommandAllocatorHandle,
    pub list: CommandListHandle,
}

/// Command objects for one pipeline slot in one frame slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSet {
    lists: Vec<QueueCommands>,
}

impl CommandSet {
    /// Create one allocator and list per queue.
    ///
    /// Objects created before a failure are destroyed again.
    pub fn create(device: &dyn GraphicsDevice, queues: &[QueueKind]) -> FrameGraphResult<Self> {
        let mut set = Self::default();
        for &queue in queues {
            let allocator = match device.create_command_allocator(queue) {
                Ok(allocator) => allocator,
                Err(err) => {
                    set.destroy(device);
                    return Err(err.into());
                }
            };
            let list = match device.create_command_list(queue, allocator) {
                Ok(list) => list,
                Err(err) => {
                    device.destroy_command_allocator(allocator);
                    set.destroy(device);
                    return Err(err.into());
                }
            };
            set.lists.push(QueueCommands {
                queue,
                allocator,
                list,
            });
        }
        Ok(set)
    }

    pub fn get(&self, queue: QueueKind) -> Option<&QueueCommands> {
        self.lists.iter().find(|c| c.queue == queue)
    }

    pub fn queues(&self) -> impl Iterator<Item = QueueKind> + '_ {
        self.lists.iter().map(|c| c.queue)
    }

    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    pub fn destroy(&mut self, device: &dyn GraphicsDevice) {
        for commands in self.lists.drain(..) {
            device.destroy_command_list(commands.list);
            device.destroy_command_allocator(commands.allocator);
        }
    }

    fn require(&self, queue: QueueKind) -> FrameGraphResult<&QueueCommands> {
        self.get(queue)
            .ok_or(FrameGraphError::Device(DeviceError::InvalidHandle(
                DeviceObjectKind::CommandList,
            )))
    }
}

/// A finished command list, ready for submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedList {
    pub queue: QueueKind,
    pub list: CommandListHandle,
    /// Other queue whose latest work must complete before this list runs.
    pub wait_for: Option<QueueKind>,
}

/// Everything recording reads.
#[derive(Clone, Copy)]
pub struct RecordContext<'a> {
    pub device: &'a dyn GraphicsDevice,
    pub graph: &'a StageGraph,
    pub registry: &'a ResourceRegistry,
    pub bindings: &'a StageBindings,
    pub back_buffer_index: usize,
}

impl RecordContext<'_> {
    fn begin(&self, commands: &QueueCommands) -> FrameGraphResult<()> {
        self.device.reset_command_allocator(commands.allocator)?;
        self.device
            .begin_command_list(commands.list, commands.allocator)?;
        Ok(())
    }

    fn record(&self, commands: &QueueCommands, command: GpuCommand) -> FrameGraphResult<()> {
        self.device.record(commands.list, command)?;
        Ok(())
    }

    fn end(&self, commands: &QueueCommands) -> FrameGraphResult<()> {
        self.device.end_command_list(commands.list)?;
        Ok(())
    }

    /// Record one multi-barrier call per batch.
    fn record_batches<'b>(
        &self,
        commands: &QueueCommands,
        batches: impl IntoIterator<Item = &'b BarrierBatch>,
        kind: impl Fn(&BarrierBatch) -> BarrierKind,
    ) -> FrameGraphResult<()> {
        for batch in batches {
            let barrier_kind = kind(batch);
            let mut descriptors = Vec::with_capacity(batch.barriers.len());
            for barrier in &batch.barriers {
                self.describe(barrier, barrier_kind, &mut descriptors)?;
            }
            self.record(commands, GpuCommand::Barriers(descriptors))?;
        }
        Ok(())
    }

    fn describe(
        &self,
        barrier: &Barrier,
        kind: BarrierKind,
        out: &mut Vec<BarrierDescriptor>,
    ) -> FrameGraphResult<()> {
        let resource = self.registry.resource(barrier.resource);
        for &handle in resource.require_handles(self.back_buffer_index)? {
            out.push(BarrierDescriptor {
                resource: handle,
                kind,
                before: barrier.before.binding,
                after: barrier.after.binding,
                src_queue: barrier.before.queue,
                dst_queue: barrier.after.queue,
                src_stages: barrier.src_stages,
                dst_stages: barrier.dst_stages,
            });
        }
        Ok(())
    }

    fn is_unbound(&self, resource: ResourceHandle) -> bool {
        self.registry
            .resource(resource)
            .is_unbound(self.back_buffer_index)
    }

    /// Handover releases of `sync`, without those of unbound slots.
    fn live_releases(&self, sync: &SynchronizationStageDescriptor) -> Vec<BarrierBatch> {
        sync.releases()
            .iter()
            .filter_map(|batch| {
                let barriers: Vec<Barrier> = batch
                    .barriers
                    .iter()
                    .filter(|b| !self.is_unbound(b.resource))
                    .copied()
                    .collect();
                (!barriers.is_empty()).then_some(BarrierBatch {
                    key: batch.key,
                    barriers,
                })
            })
            .collect()
    }

    /// Move unbound resources into the state their first usage expects.
    fn record_unbound_transitions(
        &self,
        commands: &QueueCommands,
        entries: &[&EntryState],
    ) -> FrameGraphResult<()> {
        let mut descriptors = Vec::with_capacity(entries.len());
        for entry in entries {
            let resource = self.registry.resource(entry.resource);
            for &handle in resource.require_handles(self.back_buffer_index)? {
                descriptors.push(BarrierDescriptor {
                    resource: handle,
                    kind: BarrierKind::Transition,
                    before: BindingType::Unbound,
                    after: entry.state.binding,
                    src_queue: entry.state.queue,
                    dst_queue: entry.state.queue,
                    src_stages: PipelineStageMask::TOP_OF_PIPE,
                    dst_stages: entry.stages,
                });
            }
        }
        self.record(commands, GpuCommand::Barriers(descriptors))
    }

    fn draw_resource(
        &self,
        stage: &RenderStageDescriptor,
        binding: BindingType,
    ) -> FrameGraphResult<GpuHandle> {
        let usage = stage
            .find_binding(binding)
            .map(|index| &stage.usages[index])
            .ok_or_else(|| FrameGraphError::InvalidStage {
                stage: stage.name.clone(),
                reason: format!("missing {binding} usage"),
            })?;
        let resource = self.registry.lookup(&usage.resource)?;
        resource
            .require_handles(self.back_buffer_index)?
            .first()
            .copied()
            .ok_or_else(|| FrameGraphError::UnbackedResource(usage.resource.clone()))
    }
}

/// Record any pipeline slot.
pub fn record_pipeline_stage(
    ctx: &RecordContext<'_>,
    stage: &PipelineStage,
    commands: &CommandSet,
) -> FrameGraphResult<Vec<RecordedList>> {
    match stage {
        PipelineStage::Render(render) => {
            Ok(record_render_stage(ctx, render, commands)?.into_iter().collect())
        }
        PipelineStage::Synchronization(sync) => record_synchronization_stage(ctx, sync, commands),
    }
}

/// Record a render stage. Returns `None` if the stage does no work this frame.
pub fn record_render_stage(
    ctx: &RecordContext<'_>,
    render: &RenderStagePlan,
    commands: &CommandSet,
) -> FrameGraphResult<Option<RecordedList>> {
    let stage = ctx.graph.stage(render.stage);
    let skipped = !ctx.graph.is_active(render.stage) || stage.pipeline.is_empty_dispatch();
    let unbound: Vec<&EntryState> = render
        .entry_states
        .iter()
        .filter(|entry| ctx.is_unbound(entry.resource))
        .collect();
    if skipped && !render.owes_transitions() && unbound.is_empty() {
        log::trace!("Skipping stage '{}'", render.name);
        return Ok(None);
    }

    let queue_commands = commands.require(render.queue)?;
    ctx.begin(queue_commands)?;

    let entry_barriers: Vec<Barrier> = render
        .entry_barriers
        .iter()
        .filter(|b| !ctx.is_unbound(b.resource))
        .copied()
        .collect();
    if !entry_barriers.is_empty() {
        let batches = batch_barriers(entry_barriers.iter().copied());
        ctx.record_batches(queue_commands, &batches, |batch| {
            if batch.key.src_queue == batch.key.dst_queue {
                BarrierKind::Transition
            } else {
                BarrierKind::Acquire
            }
        })?;
    }
    if !unbound.is_empty() {
        ctx.record_unbound_transitions(queue_commands, &unbound)?;
    }

    if skipped {
        record_folded_transitions(ctx, render, queue_commands)?;
        log::trace!("Stage '{}' skipped, recorded its transitions only", render.name);
    } else {
        let objects = ctx.bindings.objects(render.stage).ok_or_else(|| {
            FrameGraphError::InvalidStage {
                stage: render.name.clone(),
                reason: "device objects have not been created".into(),
            }
        })?;
        record_work(ctx, render, stage, objects, queue_commands)?;
    }

    ctx.end(queue_commands)?;
    Ok(Some(RecordedList {
        queue: render.queue,
        list: queue_commands.list,
        wait_for: entry_barriers
            .iter()
            .find(|b| b.is_cross_queue())
            .map(|b| b.before.queue),
    }))
}

fn record_work(
    ctx: &RecordContext<'_>,
    render: &RenderStagePlan,
    stage: &RenderStageDescriptor,
    objects: &StageObjects,
    commands: &QueueCommands,
) -> FrameGraphResult<()> {
    let bb = ctx.back_buffer_index;
    let pipeline = objects.pipeline().ok_or_else(|| FrameGraphError::InvalidStage {
        stage: render.name.clone(),
        reason: "pipeline state has not been created".into(),
    })?;
    let descriptors = objects.descriptor_set(bb);

    match stage.pipeline {
        PipelineKind::Graphics { draw, extent } => {
            let render_pass = objects.render_pass(bb).ok_or_else(|| {
                FrameGraphError::InvalidStage {
                    stage: render.name.clone(),
                    reason: format!("no render pass for back buffer {bb}"),
                }
            })?;

            ctx.record(
                commands,
                GpuCommand::BeginRenderPass {
                    render_pass,
                    extent,
                },
            )?;
            ctx.record(commands, GpuCommand::SetViewport(extent))?;
            ctx.record(commands, GpuCommand::SetScissor(extent))?;
            ctx.record(commands, GpuCommand::BindPipeline(pipeline))?;
            if let Some(set) = descriptors {
                ctx.record(commands, GpuCommand::BindDescriptorSet(set))?;
            }

            let command = match draw {
                DrawType::IndexedIndirect { max_draw_count } => GpuCommand::DrawIndexedIndirect {
                    index_buffer: ctx.draw_resource(stage, BindingType::IndexBuffer)?,
                    indirect_buffer: ctx.draw_resource(stage, BindingType::IndirectArgument)?,
                    max_draw_count,
                },
                fixed => GpuCommand::Draw {
                    vertex_count: fixed.fixed_vertex_count().unwrap_or(0),
                    instance_count: 1,
                },
            };
            ctx.record(commands, command)?;
            ctx.record(commands, GpuCommand::EndRenderPass)?;
        }
        PipelineKind::Compute {
            work_groups: [x, y, z],
        } => {
            ctx.record(commands, GpuCommand::BindPipeline(pipeline))?;
            if let Some(set) = descriptors {
                ctx.record(commands, GpuCommand::BindDescriptorSet(set))?;
            }
            ctx.record(commands, GpuCommand::Dispatch { x, y, z })?;
        }
        PipelineKind::RayTracing {
            dimensions: [width, height, depth],
        } => {
            ctx.record(commands, GpuCommand::BindPipeline(pipeline))?;
            if let Some(set) = descriptors {
                ctx.record(commands, GpuCommand::BindDescriptorSet(set))?;
            }
            ctx.record(
                commands,
                GpuCommand::TraceRays {
                    width,
                    height,
                    depth,
                },
            )?;
        }
    }

    log::trace!(
        "Recorded stage '{}' for back buffer {} on {} queue",
        render.name,
        bb,
        render.queue
    );
    Ok(())
}

/// Layout changes a skipped render pass would have made.
fn record_folded_transitions(
    ctx: &RecordContext<'_>,
    render: &RenderStagePlan,
    commands: &QueueCommands,
) -> FrameGraphResult<()> {
    let mut descriptors = Vec::new();
    for attachment in render
        .attachments
        .iter()
        .filter(|a| a.initial != a.final_binding)
    {
        let resource = ctx.registry.resource(attachment.resource);
        for &handle in resource.require_handles(ctx.back_buffer_index)? {
            descriptors.push(BarrierDescriptor {
                resource: handle,
                kind: BarrierKind::Transition,
                before: attachment.initial,
                after: attachment.final_binding,
                src_queue: render.queue,
                dst_queue: render.queue,
                src_stages: PipelineStageMask::for_binding(attachment.initial, StageKind::Graphics),
                dst_stages: PipelineStageMask::for_binding(
                    attachment.final_binding,
                    StageKind::Graphics,
                ),
            });
        }
    }
    if !descriptors.is_empty() {
        ctx.record(commands, GpuCommand::Barriers(descriptors))?;
    }
    Ok(())
}

/// Record a synchronization stage, one list per queue it touches.
pub fn record_synchronization_stage(
    ctx: &RecordContext<'_>,
    sync: &SynchronizationStageDescriptor,
    commands: &CommandSet,
) -> FrameGraphResult<Vec<RecordedList>> {
    let destination = sync.destination_queue();
    let releases = ctx.live_releases(sync);
    let releases_on = |queue: QueueKind| releases.iter().filter(move |b| b.key.src_queue == queue);
    let mut lists = Vec::new();

    for source in sync.source_queues() {
        let transfers = sync.batches().iter().filter(|b| b.key.src_queue == source);
        if transfers.clone().next().is_none() && releases_on(source).next().is_none() {
            continue;
        }
        let queue_commands = commands.require(source)?;
        ctx.begin(queue_commands)?;
        ctx.record_batches(
            queue_commands,
            transfers.chain(releases_on(source)),
            |_| BarrierKind::Release,
        )?;
        ctx.end(queue_commands)?;
        lists.push(RecordedList {
            queue: source,
            list: queue_commands.list,
            wait_for: None,
        });
    }

    if !sync.batches().is_empty() || releases_on(destination).next().is_some() {
        let queue_commands = commands.require(destination)?;
        ctx.begin(queue_commands)?;
        ctx.record_batches(queue_commands, sync.batches(), |batch| {
            if batch.key.src_queue == destination {
                BarrierKind::Transition
            } else {
                BarrierKind::Acquire
            }
        })?;
        ctx.record_batches(queue_commands, releases_on(destination), |_| {
            BarrierKind::Release
        })?;
        ctx.end(queue_commands)?;
        lists.push(RecordedList {
            queue: destination,
            list: queue_commands.list,
            wait_for: sync
                .batches()
                .iter()
                .map(|b| b.key.src_queue)
                .find(|&queue| queue != destination),
        });
    }

    log::trace!(
        "Recorded synchronization stage {} ({} barriers, {} releases, {} lists)",
        sync.index(),
        sync.barrier_count(),
        releases.iter().map(|b| b.barriers.len()).sum::<usize>(),
        lists.len()
    );
    Ok(lists)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::build_order;
    use crate::device::DummyDevice;
    use crate::graph::RenderStageDescriptor;
    use crate::resource::{ResourceHandles, ResourceOrigin};
    use crate::sync::{plan, PipelinePlan};
    use crate::types::{Extent2d, ResourceKind};

    struct Fixture {
        device: DummyDevice,
        registry: ResourceRegistry,
        graph: StageGraph,
        plan: PipelinePlan,
        bindings: StageBindings,
    }

    impl Fixture {
        /// Resources already went through a frame.
        fn new(graph: StageGraph, resources: &[(&str, ResourceKind)]) -> Self {
            let mut f = Self::first_frame(graph, resources);
            let handles: Vec<_> = f.registry.iter().map(|(handle, _)| handle).collect();
            for handle in handles {
                f.registry.mark_initialized(handle, 0);
            }
            f
        }

        /// Resources with fresh handles.
        fn first_frame(graph: StageGraph, resources: &[(&str, ResourceKind)]) -> Self {
            let device = DummyDevice::new();
            let mut registry = ResourceRegistry::new(1);
            for (i, (name, kind)) in resources.iter().enumerate() {
                let handles = ResourceHandles::single(GpuHandle::new(100 + i as u64));
                registry
                    .declare(name, *kind, 1, ResourceOrigin::Internal)
                    .unwrap();
                registry.update(name, handles, None).unwrap();
            }
            let order = build_order(&graph, &registry, true).unwrap();
            let plan = plan(&graph, &registry, &order).unwrap();
            let mut bindings = StageBindings::new(1);
            bindings.prepare(&plan, &graph, &registry).unwrap();
            bindings
                .flush(&device, &plan, &graph, &registry, None)
                .unwrap();
            Self {
                device,
                registry,
                graph,
                plan,
                bindings,
            }
        }

        fn ctx(&self) -> RecordContext<'_> {
            RecordContext {
                device: &self.device,
                graph: &self.graph,
                registry: &self.registry,
                bindings: &self.bindings,
                back_buffer_index: 0,
            }
        }

        fn record(&self, index: usize) -> Vec<RecordedList> {
            let stage = &self.plan.stages()[index];
            let commands = CommandSet::create(&self.device, &stage.queues()).unwrap();
            record_pipeline_stage(&self.ctx(), stage, &commands).unwrap()
        }
    }

    #[test]
    fn test_record_fullscreen_graphics_stage() {
        let mut graph = StageGraph::new();
        graph
            .add_stage(
                RenderStageDescriptor::graphics(
                    "post",
                    DrawType::FullScreenTriangle,
                    Extent2d::new(64, 32),
                )
                .uses("params", BindingType::ConstantBuffer)
                .uses("target", BindingType::ColorAttachment),
            )
            .unwrap();
        let f = Fixture::new(
            graph,
            &[("params", ResourceKind::Buffer), ("target", ResourceKind::Texture)],
        );

        let lists = f.record(0);
        assert_eq!(lists.len(), 1);
        assert_eq!(lists[0].queue, QueueKind::Graphics);
        assert_eq!(lists[0].wait_for, None);

        let commands = f.device.recorded(lists[0].list);
        let extent = Extent2d::new(64, 32);
        assert!(matches!(
            commands[0],
            GpuCommand::BeginRenderPass { extent: e, .. } if e == extent
        ));
        assert_eq!(commands[1], GpuCommand::SetViewport(extent));
        assert_eq!(commands[2], GpuCommand::SetScissor(extent));
        assert!(matches!(commands[3], GpuCommand::BindPipeline(_)));
        assert!(matches!(commands[4], GpuCommand::BindDescriptorSet(_)));
        assert_eq!(
            commands[5],
            GpuCommand::Draw {
                vertex_count: 3,
                instance_count: 1
            }
        );
        assert_eq!(commands[6], GpuCommand::EndRenderPass);
        assert_eq!(commands.len(), 7);
    }

    #[test]
    fn test_record_indexed_indirect_uses_draw_resources() {
        let mut graph = StageGraph::new();
        graph
            .add_stage(
                RenderStageDescriptor::graphics(
                    "scene",
                    DrawType::IndexedIndirect { max_draw_count: 128 },
                    Extent2d::new(8, 8),
                )
                .uses("indices", BindingType::IndexBuffer)
                .uses("args", BindingType::IndirectArgument),
            )
            .unwrap();
        let f = Fixture::new(
            graph,
            &[("indices", ResourceKind::Buffer), ("args", ResourceKind::Buffer)],
        );

        let lists = f.record(0);
        let commands = f.device.recorded(lists[0].list);
        assert!(commands.contains(&GpuCommand::DrawIndexedIndirect {
            index_buffer: GpuHandle::new(100),
            indirect_buffer: GpuHandle::new(101),
            max_draw_count: 128,
        }));
        // No descriptor-bound usages, no descriptor set
        assert!(!commands
            .iter()
            .any(|c| matches!(c, GpuCommand::BindDescriptorSet(_))));
    }

    #[test]
    fn test_record_compute_and_ray_tracing() {
        let mut graph = StageGraph::new();
        graph
            .add_stage(
                RenderStageDescriptor::compute("cull", [4, 2, 1])
                    .uses("draws", BindingType::UnorderedAccessWrite),
            )
            .unwrap();
        graph
            .add_stage(
                RenderStageDescriptor::ray_tracing("shadows", [1920, 1080, 1])
                    .uses("tlas", BindingType::AccelerationStructure),
            )
            .unwrap();
        let f = Fixture::new(
            graph,
            &[
                ("draws", ResourceKind::Buffer),
                ("tlas", ResourceKind::AccelerationStructure),
            ],
        );

        let cull = f.record(0);
        assert_eq!(cull[0].queue, QueueKind::Compute);
        let commands = f.device.recorded(cull[0].list);
        assert_eq!(
            commands.last(),
            Some(&GpuCommand::Dispatch { x: 4, y: 2, z: 1 })
        );

        let shadows = f.record(1);
        let commands = f.device.recorded(shadows[0].list);
        assert_eq!(
            commands.last(),
            Some(&GpuCommand::TraceRays {
                width: 1920,
                height: 1080,
                depth: 1
            })
        );
    }

    #[test]
    fn test_inactive_stage_records_nothing() {
        let mut graph = StageGraph::new();
        let stage = graph
            .add_stage(
                RenderStageDescriptor::compute("idle", [1, 1, 1])
                    .uses("b", BindingType::ConstantBuffer),
            )
            .unwrap();
        let mut f = Fixture::new(graph, &[("b", ResourceKind::Buffer)]);
        f.graph.set_active(stage, false);

        assert!(f.record(0).is_empty());
    }

    #[test]
    fn test_empty_dispatch_records_nothing() {
        let mut graph = StageGraph::new();
        graph
            .add_stage(RenderStageDescriptor::compute("empty", [0, 1, 1]))
            .unwrap();
        let f = Fixture::new(graph, &[]);

        assert!(f.record(0).is_empty());
    }

    #[test]
    fn test_skipped_stage_still_records_owed_transitions() {
        // The blit writes the texture the UI pass samples, so the blit's
        // entry barrier must happen even when it is skipped
        let mut graph = StageGraph::new();
        let blit = graph
            .add_stage(
                RenderStageDescriptor::compute("blit", [1, 1, 1])
                    .with_queue(QueueKind::Graphics)
                    .uses("t", BindingType::UnorderedAccessWrite),
            )
            .unwrap();
        graph
            .add_stage(
                RenderStageDescriptor::compute("ui", [1, 1, 1])
                    .with_queue(QueueKind::Graphics)
                    .uses("t", BindingType::CombinedSampler),
            )
            .unwrap();
        graph.link_resource("blit", "ui", "t").unwrap();
        let mut f = Fixture::new(graph, &[("t", ResourceKind::Texture)]);
        f.graph.set_active(blit, false);

        let lists = f.record(0);
        assert_eq!(lists.len(), 1);
        let commands = f.device.recorded(lists[0].list);
        assert_eq!(commands.len(), 1);
        assert!(matches!(&commands[0], GpuCommand::Barriers(b) if b.len() == 1));
    }

    fn particles() -> StageGraph {
        let mut graph = StageGraph::new();
        graph
            .add_stage(
                RenderStageDescriptor::compute("simulate", [1, 1, 1])
                    .uses("particles", BindingType::UnorderedAccessWrite),
            )
            .unwrap();
        graph
            .add_stage(
                RenderStageDescriptor::graphics(
                    "draw",
                    DrawType::FullScreenQuad,
                    Extent2d::new(4, 4),
                )
                .uses("particles", BindingType::ConstantBuffer),
            )
            .unwrap();
        graph.link_resource("simulate", "draw", "particles").unwrap();
        graph
    }

    fn barriers(commands: &[GpuCommand]) -> Vec<BarrierDescriptor> {
        commands
            .iter()
            .filter_map(|command| match command {
                GpuCommand::Barriers(barriers) => Some(barriers.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    #[test]
    fn test_handover_released_at_frame_head() {
        let f = Fixture::new(particles(), &[("particles", ResourceKind::Buffer)]);

        // Sync 0, Render simulate, Sync 1, Render draw
        let head = f.record(0);
        assert_eq!(head.len(), 1);
        assert_eq!(head[0].queue, QueueKind::Graphics);
        let release = barriers(&f.device.recorded(head[0].list));
        assert_eq!(release.len(), 1);
        assert_eq!(release[0].kind, BarrierKind::Release);
        assert_eq!(release[0].src_queue, QueueKind::Graphics);
        assert_eq!(release[0].dst_queue, QueueKind::Compute);

        let simulate = f.record(1);
        assert_eq!(simulate[0].wait_for, Some(QueueKind::Graphics));
        let acquire = barriers(&f.device.recorded(simulate[0].list));
        assert_eq!(acquire.len(), 1);
        assert_eq!(acquire[0].kind, BarrierKind::Acquire);
        assert_eq!(
            (acquire[0].before, acquire[0].after),
            (release[0].before, release[0].after)
        );
    }

    #[test]
    fn test_unbound_slot_transitions_without_handover() {
        let f = Fixture::first_frame(particles(), &[("particles", ResourceKind::Buffer)]);

        // Nothing owns the buffer yet, so there is nothing to release
        assert!(f.record(0).is_empty());

        let simulate = f.record(1);
        assert_eq!(simulate[0].wait_for, None);
        let entry = barriers(&f.device.recorded(simulate[0].list));
        assert_eq!(
            entry,
            vec![BarrierDescriptor {
                resource: GpuHandle::new(100),
                kind: BarrierKind::Transition,
                before: BindingType::Unbound,
                after: BindingType::UnorderedAccessWrite,
                src_queue: QueueKind::Compute,
                dst_queue: QueueKind::Compute,
                src_stages: PipelineStageMask::TOP_OF_PIPE,
                dst_stages: PipelineStageMask::COMPUTE_SHADER,
            }]
        );
    }

    #[test]
    fn test_skipped_stage_still_leaves_unbound_state() {
        let mut graph = StageGraph::new();
        let idle = graph
            .add_stage(
                RenderStageDescriptor::compute("idle", [1, 1, 1])
                    .uses("b", BindingType::ConstantBuffer),
            )
            .unwrap();
        let mut f = Fixture::first_frame(graph, &[("b", ResourceKind::Buffer)]);
        f.graph.set_active(idle, false);

        let lists = f.record(0);
        assert_eq!(lists.len(), 1);
        let commands = f.device.recorded(lists[0].list);
        assert_eq!(commands.len(), 1);
        assert_eq!(barriers(&commands)[0].before, BindingType::Unbound);
    }

    #[test]
    fn test_cross_queue_sync_stage_source_list_first() {
        let f = Fixture::new(particles(), &[("particles", ResourceKind::Buffer)]);

        // Sync 0, Render simulate, Sync 1, Render draw
        let lists = f.record(2);
        assert_eq!(lists.len(), 2);
        assert_eq!(lists[0].queue, QueueKind::Compute);
        assert_eq!(lists[0].wait_for, None);
        assert_eq!(lists[1].queue, QueueKind::Graphics);
        assert_eq!(lists[1].wait_for, Some(QueueKind::Compute));

        let release = f.device.recorded(lists[0].list);
        let acquire = f.device.recorded(lists[1].list);
        match (&release[0], &acquire[0]) {
            (GpuCommand::Barriers(release), GpuCommand::Barriers(acquire)) => {
                assert_eq!(release[0].kind, BarrierKind::Release);
                assert_eq!(acquire[0].kind, BarrierKind::Acquire);
                assert_eq!(release[0].before, BindingType::UnorderedAccessWrite);
                assert_eq!(acquire[0].after, BindingType::ConstantBuffer);
                assert_eq!(acquire[0].resource, GpuHandle::new(100));
            }
            other => panic!("expected barrier commands, got {other:?}"),
        }
    }
}
