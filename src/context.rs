//! The frame graph context.
//!
//! [`FrameGraph`] owns the resource registry, the stage graph, the compiled
//! plan, per-stage device objects and the frame scheduler. It is the only
//! type most callers touch.
//!
//! # Lifecycle
//!
//! ```text
//! declare_resource / add_stage / link      topology edits (graph is dirty)
//!            │
//!            ▼
//!         build()                          order, plan, allocate
//!            │
//!            ▼
//!   ┌──► render(frame, back_buffer)        pace, flush, record, submit
//!   │        │
//!   └────────┘   update_resource / set_stage_active / parameters
//!            │
//!            ▼
//!       shutdown()                         wait idle, destroy everything
//! ```
//!
//! A topology edit after `build()` makes [`render`](FrameGraph::render) fail
//! with [`FrameGraphError::NotBuilt`] until the graph is built again.

use std::path::Path;
use std::sync::Arc;

use crate::compiler::build_order;
use crate::config::{load_graph_description, FrameGraphConfig, GraphDescription};
use crate::device::GraphicsDevice;
use crate::error::{FrameGraphError, FrameGraphResult};
use crate::executor::{record_pipeline_stage, RecordContext};
use crate::graph::{RenderStageDescriptor, StageGraph, StageHandle, UsageRef};
use crate::resource::{
    ResourceHandle, ResourceHandles, ResourceOrigin, ResourceRegistry, StageBindings,
};
use crate::scheduler::FrameScheduler;
use crate::sync::{self, PipelinePlan};
use crate::types::{GpuHandle, ResourceKind, StageParameters};

#[derive(Debug)]
struct BuiltPlan {
    plan: PipelinePlan,
    graph_revision: u64,
    registry_revision: u64,
}

/// Render graph compiler and per-frame executor.
///
/// # Example
///
/// ```ignore
/// let mut frame_graph = FrameGraph::new(device, FrameGraphConfig::default())?;
/// frame_graph.declare_resource("gbuffer", ResourceKind::Texture, 1, ResourceOrigin::Internal)?;
/// frame_graph.add_stage(geometry)?;
/// frame_graph.add_stage(shading)?;
/// frame_graph.link("geometry", "shading", "gbuffer")?;
/// frame_graph.build()?;
///
/// for frame in 0.. {
///     frame_graph.render(frame, swapchain.acquire()?)?;
/// }
/// ```
pub struct FrameGraph<D: GraphicsDevice> {
    device: Arc<D>,
    config: FrameGraphConfig,
    registry: ResourceRegistry,
    graph: StageGraph,
    bindings: StageBindings,
    scheduler: FrameScheduler,
    built: Option<BuiltPlan>,
    released: Vec<GpuHandle>,
    shut_down: bool,
}

impl<D: GraphicsDevice> FrameGraph<D> {
    /// Create an empty frame graph.
    pub fn new(device: Arc<D>, config: FrameGraphConfig) -> FrameGraphResult<Self> {
        config.validate()?;
        let scheduler =
            FrameScheduler::new(device.as_ref(), config.back_buffer_count, config.fence_timeout())?;

        log::info!(
            "Creating frame graph on '{}' ({} back buffers, async compute {})",
            device.name(),
            config.back_buffer_count,
            if config.async_compute { "on" } else { "off" }
        );

        Ok(Self {
            registry: ResourceRegistry::new(config.back_buffer_count),
            graph: StageGraph::new(),
            bindings: StageBindings::new(config.back_buffer_count),
            scheduler,
            built: None,
            released: Vec::new(),
            shut_down: false,
            device,
            config,
        })
    }

    /// Create a frame graph holding every resource, stage and link of
    /// `description`. The graph still has to be built.
    pub fn from_description(
        device: Arc<D>,
        description: &GraphDescription,
    ) -> FrameGraphResult<Self> {
        let mut frame_graph = Self::new(device, description.config.clone())?;

        for resource in &description.resource {
            frame_graph.declare_resource(
                &resource.name,
                resource.kind,
                resource.subresources,
                resource.origin.into(),
            )?;
        }
        for stage in &description.stage {
            let handle = frame_graph.add_stage(stage.to_descriptor()?)?;
            if !stage.enabled {
                frame_graph.graph.set_enabled(handle, false);
            }
        }
        for link in &description.link {
            frame_graph.link(&link.from, &link.to, &link.resource)?;
        }

        Ok(frame_graph)
    }

    /// Load a TOML graph description and create a frame graph from it.
    pub fn load(device: Arc<D>, path: &Path) -> FrameGraphResult<Self> {
        let description = load_graph_description(path)?;
        Self::from_description(device, &description)
    }

    // --- Topology ---

    /// Declare a resource. Changing an existing declaration requires a rebuild.
    pub fn declare_resource(
        &mut self,
        name: &str,
        kind: ResourceKind,
        subresource_count: u32,
        origin: ResourceOrigin,
    ) -> FrameGraphResult<ResourceHandle> {
        self.registry.declare(name, kind, subresource_count, origin)
    }

    pub fn add_stage(
        &mut self,
        descriptor: RenderStageDescriptor,
    ) -> FrameGraphResult<StageHandle> {
        log::debug!("Adding stage '{}' ({:?})", descriptor.name, descriptor.kind());
        self.graph.add_stage(descriptor)
    }

    /// Link the first usages of `resource` in `producer` and `consumer`.
    pub fn link(&mut self, producer: &str, consumer: &str, resource: &str) -> FrameGraphResult<()> {
        self.graph.link_resource(producer, consumer, resource)
    }

    /// Link two specific usages.
    pub fn link_usages(&mut self, producer: UsageRef, consumer: UsageRef) -> FrameGraphResult<()> {
        self.graph.link(producer, consumer)
    }

    /// Include or exclude a stage from the plan. Requires a rebuild.
    pub fn set_stage_enabled(&mut self, stage: &str, enabled: bool) -> FrameGraphResult<()> {
        let handle = self.graph.handle(stage)?;
        self.graph.set_enabled(handle, enabled);
        Ok(())
    }

    // --- Per-frame state ---

    /// Skip or resume a stage from the next frame on. No rebuild needed.
    pub fn set_stage_active(&mut self, stage: &str, active: bool) -> FrameGraphResult<()> {
        let handle = self.graph.handle(stage)?;
        self.graph.set_active(handle, active);
        Ok(())
    }

    pub fn update_render_stage_parameters(
        &mut self,
        stage: &str,
        parameters: StageParameters,
    ) -> FrameGraphResult<()> {
        let handle = self.graph.handle(stage)?;
        self.graph.update_parameters(handle, parameters)
    }

    /// Replace a resource's concrete handles.
    ///
    /// Returns `false` if the handles are unchanged. Dependent descriptor
    /// sets and render passes are rewritten before the next frame records;
    /// the replaced handles come back from
    /// [`take_released_handles`](Self::take_released_handles) once no frame
    /// in flight references them.
    pub fn update_resource(
        &mut self,
        name: &str,
        handles: ResourceHandles,
    ) -> FrameGraphResult<bool> {
        self.registry
            .update(name, handles, self.scheduler.last_frame())
    }

    // --- Build ---

    /// Whether a build is needed before the next frame.
    pub fn is_dirty(&self) -> bool {
        match &self.built {
            Some(built) => {
                built.graph_revision != self.graph.revision()
                    || built.registry_revision != self.registry.revision()
            }
            None => true,
        }
    }

    /// Order the stages, plan synchronization and allocate command objects.
    ///
    /// Rebuilding waits for the GPU to go idle and destroys every object of
    /// the previous plan first. On error no plan is kept and rendering is
    /// refused until a build succeeds.
    pub fn build(&mut self) -> FrameGraphResult<()> {
        if self.shut_down {
            return Err(FrameGraphError::NotBuilt);
        }
        let device = self.device.as_ref();

        if self.built.take().is_some() {
            log::debug!("Topology changed, rebuilding frame graph");
            self.scheduler.wait_idle(device)?;
            self.bindings.destroy_all(device);
            self.scheduler.release_command_sets(device);
        }

        let order = build_order(&self.graph, &self.registry, self.config.async_compute)?;
        let plan = sync::plan(&self.graph, &self.registry, &order)?;
        // Resting states may have changed, start every slot over
        self.registry.reset_initialization();
        self.bindings.prepare(&plan, &self.graph, &self.registry)?;
        // Everything is rewritten on the first frame anyway
        self.registry.take_dirty();
        self.scheduler.allocate(device, &plan)?;

        log::info!(
            "Built frame graph: {} render stages, {} synchronization stages, {} barriers",
            plan.render_stage_count(),
            plan.sync_stage_count(),
            plan.barrier_count() + plan.entry_barrier_count()
        );

        self.built = Some(BuiltPlan {
            plan,
            graph_revision: self.graph.revision(),
            registry_revision: self.registry.revision(),
        });
        Ok(())
    }

    // --- Frames ---

    /// Rewrite descriptor sets and render passes of every stage using a
    /// resource updated since the last frame.
    ///
    /// Returns the number of stages rewritten. Called by
    /// [`render`](Self::render); never runs while a frame is being recorded.
    pub fn flush_dirty(&mut self) -> FrameGraphResult<usize> {
        let Some(built) = &self.built else {
            return Err(FrameGraphError::NotBuilt);
        };

        for resource in self.registry.take_dirty() {
            if self.bindings.mark_dirty(resource) == 0 {
                log::warn!(
                    "Resource '{}' was updated but no stage in the plan uses it",
                    self.registry.resource(resource).name()
                );
            }
        }
        if !self.bindings.has_dirty() {
            return Ok(0);
        }

        self.bindings.flush(
            self.device.as_ref(),
            &built.plan,
            &self.graph,
            &self.registry,
            self.scheduler.last_frame(),
        )
    }

    /// Record and submit frame `frame_index` into back buffer
    /// `back_buffer_index`.
    ///
    /// Blocks while `back_buffer_count` frames are still in flight. Any error
    /// is fatal: the frame graph should be shut down and recreated.
    pub fn render(&mut self, frame_index: u64, back_buffer_index: usize) -> FrameGraphResult<()> {
        if self.shut_down || self.is_dirty() {
            return Err(FrameGraphError::NotBuilt);
        }
        if back_buffer_index >= self.config.back_buffer_count {
            return Err(FrameGraphError::InvalidParameter(format!(
                "back buffer index {} out of range ({} back buffers)",
                back_buffer_index, self.config.back_buffer_count
            )));
        }

        let result = self.render_frame(frame_index, back_buffer_index);
        if let Err(err) = &result {
            log::error!("Frame {} failed: {}", frame_index, err);
        }
        result
    }

    fn render_frame(&mut self, frame_index: u64, back_buffer_index: usize) -> FrameGraphResult<()> {
        let slot = self
            .scheduler
            .begin_frame(self.device.as_ref(), frame_index)?;

        let retired = self.scheduler.retired_frame();
        self.bindings
            .release_retired(self.device.as_ref(), retired);
        self.released.extend(self.registry.release_retired(retired));

        self.flush_dirty()?;

        let device = self.device.as_ref();
        let Some(built) = &self.built else {
            return Err(FrameGraphError::NotBuilt);
        };
        let ctx = RecordContext {
            device,
            graph: &self.graph,
            registry: &self.registry,
            bindings: &self.bindings,
            back_buffer_index,
        };

        let mut lists = Vec::new();
        for (entry, stage) in built.plan.stages().iter().enumerate() {
            let commands = self
                .scheduler
                .command_set(slot, entry)
                .ok_or(FrameGraphError::NotBuilt)?;
            lists.extend(record_pipeline_stage(&ctx, stage, commands)?);
        }

        log::trace!(
            "Recorded frame {} into back buffer {} ({} lists)",
            frame_index,
            back_buffer_index,
            lists.len()
        );
        self.scheduler
            .submit_frame(device, slot, frame_index, &lists)?;

        let used: Vec<ResourceHandle> = built.plan.resources().collect();
        for resource in used {
            self.registry.mark_initialized(resource, back_buffer_index);
        }
        Ok(())
    }

    /// Block until the GPU has finished every submitted frame.
    pub fn wait_idle(&mut self) -> FrameGraphResult<()> {
        if self.shut_down {
            return Ok(());
        }
        self.scheduler.wait_idle(self.device.as_ref())?;
        let retired = self.scheduler.retired_frame();
        self.bindings.release_retired(self.device.as_ref(), retired);
        self.released.extend(self.registry.release_retired(retired));
        Ok(())
    }

    /// Wait for the GPU and destroy every device object.
    ///
    /// Replaced resource handles not yet taken are still available from
    /// [`take_released_handles`](Self::take_released_handles) afterwards.
    pub fn shutdown(&mut self) -> FrameGraphResult<()> {
        if self.shut_down {
            return Ok(());
        }
        log::info!("Shutting down frame graph");

        let device = self.device.as_ref();
        self.scheduler.wait_idle(device)?;
        self.bindings.destroy_all(device);
        self.scheduler.destroy(device);
        self.released.extend(self.registry.release_all());
        self.built = None;
        self.shut_down = true;
        Ok(())
    }

    /// Replaced concrete handles that no frame references any more.
    ///
    /// The caller owns them and is responsible for destroying them.
    pub fn take_released_handles(&mut self) -> Vec<GpuHandle> {
        std::mem::take(&mut self.released)
    }

    // --- Accessors ---

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    pub fn config(&self) -> &FrameGraphConfig {
        &self.config
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    /// The current plan, if the graph has been built.
    pub fn plan(&self) -> Option<&PipelinePlan> {
        self.built.as_ref().map(|built| &built.plan)
    }

    pub fn bindings(&self) -> &StageBindings {
        &self.bindings
    }

    pub fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }
}

impl<D: GraphicsDevice> Drop for FrameGraph<D> {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            log::error!("Frame graph shutdown failed: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceObjectKind, DummyDevice};
    use crate::graph::DrawType;
    use crate::types::{BindingType, Extent2d};

    fn frame_graph(back_buffers: usize) -> FrameGraph<DummyDevice> {
        let config = FrameGraphConfig::default()
            .with_back_buffer_count(back_buffers)
            .with_fence_timeout_ms(50);
        FrameGraph::new(Arc::new(DummyDevice::new()), config).unwrap()
    }

    fn add_presenting_stage(frame_graph: &mut FrameGraph<DummyDevice>) {
        frame_graph
            .declare_resource(
                "backbuffer",
                ResourceKind::Texture,
                1,
                ResourceOrigin::External {
                    back_buffer_bound: true,
                },
            )
            .unwrap();
        frame_graph
            .add_stage(
                RenderStageDescriptor::graphics(
                    "present",
                    DrawType::FullScreenTriangle,
                    Extent2d::new(4, 4),
                )
                .uses("backbuffer", BindingType::ColorAttachment),
            )
            .unwrap();
        let count = frame_graph.config().back_buffer_count as u64;
        frame_graph
            .update_resource(
                "backbuffer",
                ResourceHandles::per_slot((0..count).map(|i| GpuHandle::new(100 + i))),
            )
            .unwrap();
    }

    #[test]
    fn test_new_validates_config() {
        let config = FrameGraphConfig::default().with_back_buffer_count(0);
        let result = FrameGraph::new(Arc::new(DummyDevice::new()), config);
        assert!(matches!(result, Err(FrameGraphError::InvalidParameter(_))));
    }

    #[test]
    fn test_render_before_build_refused() {
        let mut frame_graph = frame_graph(2);
        add_presenting_stage(&mut frame_graph);
        assert_eq!(frame_graph.render(0, 0), Err(FrameGraphError::NotBuilt));
    }

    #[test]
    fn test_topology_edit_requires_rebuild() {
        let mut frame_graph = frame_graph(2);
        add_presenting_stage(&mut frame_graph);
        frame_graph.build().unwrap();
        frame_graph.render(0, 0).unwrap();

        frame_graph
            .add_stage(RenderStageDescriptor::compute("extra", [1, 1, 1]))
            .unwrap();
        assert!(frame_graph.is_dirty());
        assert_eq!(frame_graph.render(1, 1), Err(FrameGraphError::NotBuilt));

        frame_graph.build().unwrap();
        frame_graph.render(1, 1).unwrap();
    }

    #[test]
    fn test_activity_does_not_require_rebuild() {
        let mut frame_graph = frame_graph(2);
        add_presenting_stage(&mut frame_graph);
        frame_graph.build().unwrap();

        frame_graph.set_stage_active("present", false).unwrap();
        assert!(!frame_graph.is_dirty());
        frame_graph.render(0, 0).unwrap();
        assert!(frame_graph.device().submissions().is_empty());
    }

    #[test]
    fn test_back_buffer_index_out_of_range() {
        let mut frame_graph = frame_graph(2);
        add_presenting_stage(&mut frame_graph);
        frame_graph.build().unwrap();
        assert!(matches!(
            frame_graph.render(0, 2),
            Err(FrameGraphError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_unknown_stage_name() {
        let mut frame_graph = frame_graph(2);
        assert_eq!(
            frame_graph.set_stage_active("missing", false),
            Err(FrameGraphError::UnknownStage("missing".into()))
        );
    }

    #[test]
    fn test_internal_slots_leave_unbound_once() {
        use crate::device::GpuCommand;

        let mut frame_graph = frame_graph(2);
        let scratch = frame_graph
            .declare_resource("scratch", ResourceKind::Buffer, 1, ResourceOrigin::Internal)
            .unwrap();
        frame_graph
            .update_resource(
                "scratch",
                ResourceHandles::per_slot([GpuHandle::new(7), GpuHandle::new(8)]),
            )
            .unwrap();
        frame_graph
            .add_stage(
                RenderStageDescriptor::compute("fill", [1, 1, 1])
                    .uses("scratch", BindingType::UnorderedAccessWrite),
            )
            .unwrap();
        frame_graph.build().unwrap();

        let starts_unbound = |frame_graph: &FrameGraph<DummyDevice>, frame: usize| {
            let submissions = frame_graph.device().submissions();
            matches!(
                submissions[frame].commands.first(),
                Some(GpuCommand::Barriers(b)) if b[0].before == BindingType::Unbound
            )
        };

        frame_graph.render(0, 0).unwrap();
        assert!(!frame_graph.registry().resource(scratch).is_unbound(0));
        assert!(frame_graph.registry().resource(scratch).is_unbound(1));
        frame_graph.render(1, 1).unwrap();
        frame_graph.render(2, 0).unwrap();
        assert!(starts_unbound(&frame_graph, 0));
        assert!(starts_unbound(&frame_graph, 1));
        assert!(!starts_unbound(&frame_graph, 2));

        frame_graph.build().unwrap();
        assert!(frame_graph.registry().resource(scratch).is_unbound(0));
    }

    #[test]
    fn test_rebuild_destroys_old_objects() {
        let mut frame_graph = frame_graph(2);
        add_presenting_stage(&mut frame_graph);
        frame_graph.build().unwrap();
        frame_graph.render(0, 0).unwrap();

        let device = Arc::clone(frame_graph.device());
        assert_eq!(device.live_count(DeviceObjectKind::CommandList), 2);
        assert_eq!(device.live_count(DeviceObjectKind::RenderPass), 2);

        frame_graph.set_stage_enabled("present", false).unwrap();
        frame_graph.build().unwrap();
        assert_eq!(device.live_count(DeviceObjectKind::CommandList), 0);
        assert_eq!(device.live_count(DeviceObjectKind::RenderPass), 0);
        assert_eq!(device.live_count(DeviceObjectKind::PipelineState), 0);
    }

    #[test]
    fn test_shutdown_destroys_everything() {
        let mut frame_graph = frame_graph(3);
        add_presenting_stage(&mut frame_graph);
        frame_graph.build().unwrap();
        for frame in 0..4 {
            frame_graph.render(frame, (frame % 3) as usize).unwrap();
        }

        let device = Arc::clone(frame_graph.device());
        frame_graph.shutdown().unwrap();
        assert!(frame_graph.is_shut_down());
        for kind in [
            DeviceObjectKind::CommandAllocator,
            DeviceObjectKind::CommandList,
            DeviceObjectKind::DescriptorSet,
            DeviceObjectKind::RenderPass,
            DeviceObjectKind::PipelineState,
            DeviceObjectKind::Fence,
        ] {
            assert_eq!(device.live_count(kind), 0, "{kind} left alive");
        }
        assert_eq!(frame_graph.render(4, 1), Err(FrameGraphError::NotBuilt));
    }

    #[test]
    fn test_drop_shuts_down() {
        let device = Arc::new(DummyDevice::new());
        {
            let mut frame_graph =
                FrameGraph::new(Arc::clone(&device), FrameGraphConfig::default()).unwrap();
            add_presenting_stage(&mut frame_graph);
            frame_graph.build().unwrap();
            frame_graph.render(0, 0).unwrap();
        }
        assert_eq!(device.live_count(DeviceObjectKind::Fence), 0);
        assert_eq!(device.live_count(DeviceObjectKind::CommandList), 0);
    }
}
