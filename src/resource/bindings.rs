//! Per-stage device objects: pipeline states, descriptor sets and render passes.
//!
//! Descriptor sets and render passes reference concrete resource handles, so
//! they are rebuilt whenever one of those resources is updated. Rebuilding is
//! copy-on-write: a new object is created from scratch, swapped in, and the
//! old one is parked until every frame that may have recorded with it has
//! retired.
//!
//! | Object | Per | Created | Replaced |
//! |--------|-----|---------|----------|
//! | Pipeline state | stage | first flush | never (rebuild only) |
//! | Descriptor set | stage × back buffer | flush, if the stage has descriptor-bound usages | resource update |
//! | Render pass | stage × back buffer | flush, graphics stages only | resource update |

use std::collections::HashMap;

use crate::device::{
    DescriptorBinding, DescriptorSetDescriptor, DescriptorSetHandle, GraphicsDevice,
    PipelineStateDescriptor, PipelineStateHandle, RenderPassAttachment, RenderPassDescriptor,
    RenderPassHandle,
};
use crate::error::{FrameGraphError, FrameGraphResult};
use crate::graph::{RenderStageDescriptor, StageGraph, StageHandle};
use crate::sync::{PipelinePlan, RenderStagePlan};
use crate::types::{BindingType, StageKind};

use super::{DeferredRelease, ResourceHandle, ResourceRegistry};

/// Device objects owned by one render stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageObjects {
    pipeline: Option<PipelineStateHandle>,
    descriptor_sets: Vec<Option<DescriptorSetHandle>>,
    render_passes: Vec<Option<RenderPassHandle>>,
    dirty: bool,
}

impl StageObjects {
    fn new(back_buffer_count: usize) -> Self {
        Self {
            pipeline: None,
            descriptor_sets: vec![None; back_buffer_count],
            render_passes: vec![None; back_buffer_count],
            dirty: true,
        }
    }

    pub fn pipeline(&self) -> Option<PipelineStateHandle> {
        self.pipeline
    }

    pub fn descriptor_set(&self, back_buffer_index: usize) -> Option<DescriptorSetHandle> {
        self.descriptor_sets.get(back_buffer_index).copied().flatten()
    }

    pub fn render_pass(&self, back_buffer_index: usize) -> Option<RenderPassHandle> {
        self.render_passes.get(back_buffer_index).copied().flatten()
    }

    /// Whether the objects must be rebuilt before the next frame.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplacedObject {
    DescriptorSet(DescriptorSetHandle),
    RenderPass(RenderPassHandle),
}

impl ReplacedObject {
    fn destroy(self, device: &dyn GraphicsDevice) {
        match self {
            Self::DescriptorSet(set) => device.destroy_descriptor_set(set),
            Self::RenderPass(render_pass) => device.destroy_render_pass(render_pass),
        }
    }
}

/// Device objects of every render stage in the current plan.
#[derive(Debug)]
pub struct StageBindings {
    back_buffer_count: usize,
    stages: HashMap<StageHandle, StageObjects>,
    dependents: HashMap<ResourceHandle, Vec<StageHandle>>,
    replaced: DeferredRelease<ReplacedObject>,
}

impl StageBindings {
    pub fn new(back_buffer_count: usize) -> Self {
        Self {
            back_buffer_count,
            stages: HashMap::new(),
            dependents: HashMap::new(),
            replaced: DeferredRelease::new(),
        }
    }

    /// Register the render stages of a fresh plan, all marked dirty.
    ///
    /// Objects of a previous plan must have been destroyed with
    /// [`destroy_all`](Self::destroy_all) first.
    pub fn prepare(
        &mut self,
        plan: &PipelinePlan,
        graph: &StageGraph,
        registry: &ResourceRegistry,
    ) -> FrameGraphResult<()> {
        self.stages.clear();
        self.dependents.clear();

        for render in plan.render_stages() {
            let stage = graph.stage(render.stage);
            for usage in &stage.usages {
                let referrer = format!("stage '{}'", stage.name);
                let resource = registry.resolve(&usage.resource, &referrer)?;
                let dependents = self.dependents.entry(resource).or_default();
                if !dependents.contains(&render.stage) {
                    dependents.push(render.stage);
                }
            }
            self.stages
                .insert(render.stage, StageObjects::new(self.back_buffer_count));
        }
        Ok(())
    }

    /// Mark every stage using `resource` dirty. Returns the number of stages.
    pub fn mark_dirty(&mut self, resource: ResourceHandle) -> usize {
        let Some(dependents) = self.dependents.get(&resource) else {
            return 0;
        };
        for stage in dependents {
            if let Some(objects) = self.stages.get_mut(stage) {
                objects.dirty = true;
            }
        }
        dependents.len()
    }

    pub fn has_dirty(&self) -> bool {
        self.stages.values().any(StageObjects::is_dirty)
    }

    pub fn objects(&self, stage: StageHandle) -> Option<&StageObjects> {
        self.stages.get(&stage)
    }

    /// Rebuild the objects of every dirty stage.
    ///
    /// `last_user` is the most recent frame that may still record with the
    /// objects being replaced. Returns the number of stages rebuilt.
    pub fn flush(
        &mut self,
        device: &dyn GraphicsDevice,
        plan: &PipelinePlan,
        graph: &StageGraph,
        registry: &ResourceRegistry,
        last_user: Option<u64>,
    ) -> FrameGraphResult<usize> {
        let mut flushed = 0;
        for render in plan.render_stages() {
            let Some(objects) = self.stages.get_mut(&render.stage) else {
                return Err(FrameGraphError::UnknownStage(render.name.clone()));
            };
            if !objects.dirty {
                continue;
            }
            let stage = graph.stage(render.stage);

            if objects.pipeline.is_none() {
                let pipeline = device.create_pipeline_state(&PipelineStateDescriptor {
                    label: stage.name.clone(),
                    kind: render.kind,
                    program: stage.program.clone(),
                })?;
                objects.pipeline = Some(pipeline);
            }

            let (sets, passes) =
                create_slot_objects(device, stage, render, registry, self.back_buffer_count)?;

            let old_sets = std::mem::replace(&mut objects.descriptor_sets, sets);
            let old_passes = std::mem::replace(&mut objects.render_passes, passes);
            objects.dirty = false;

            for set in old_sets.into_iter().flatten() {
                self.replaced
                    .defer(last_user, ReplacedObject::DescriptorSet(set));
            }
            for pass in old_passes.into_iter().flatten() {
                self.replaced
                    .defer(last_user, ReplacedObject::RenderPass(pass));
            }

            log::debug!(
                "Rebuilt descriptor sets and render passes of stage '{}'",
                stage.name
            );
            flushed += 1;
        }
        Ok(flushed)
    }

    /// Destroy replaced objects no frame after `retired` can reference.
    pub fn release_retired(&mut self, device: &dyn GraphicsDevice, retired: Option<u64>) -> usize {
        let released = self.replaced.drain_retired(retired);
        let count = released.len();
        for object in released {
            object.destroy(device);
        }
        count
    }

    /// Objects waiting for their last user frame to retire.
    pub fn pending_release_count(&self) -> usize {
        self.replaced.pending_count()
    }

    /// Destroy every object, current and replaced. The GPU must be idle.
    pub fn destroy_all(&mut self, device: &dyn GraphicsDevice) {
        for object in self.replaced.drain_all() {
            object.destroy(device);
        }
        for (_, objects) in self.stages.drain() {
            for set in objects.descriptor_sets.into_iter().flatten() {
                device.destroy_descriptor_set(set);
            }
            for pass in objects.render_passes.into_iter().flatten() {
                device.destroy_render_pass(pass);
            }
            if let Some(pipeline) = objects.pipeline {
                device.destroy_pipeline_state(pipeline);
            }
        }
        self.dependents.clear();
    }
}

type SlotObjects = (Vec<Option<DescriptorSetHandle>>, Vec<Option<RenderPassHandle>>);

/// Create descriptor sets and render passes for every back buffer slot.
///
/// Nothing is left alive on failure.
fn create_slot_objects(
    device: &dyn GraphicsDevice,
    stage: &RenderStageDescriptor,
    render: &RenderStagePlan,
    registry: &ResourceRegistry,
    back_buffer_count: usize,
) -> FrameGraphResult<SlotObjects> {
    let mut sets = Vec::with_capacity(back_buffer_count);
    let mut passes = Vec::with_capacity(back_buffer_count);

    let result = (0..back_buffer_count).try_for_each(|back_buffer_index| {
        let set = match descriptor_set_descriptor(stage, registry, back_buffer_index)? {
            Some(descriptor) => Some(device.create_descriptor_set(&descriptor)?),
            None => None,
        };
        sets.push(set);

        let pass = if render.kind == StageKind::Graphics {
            let descriptor = render_pass_descriptor(render, registry, back_buffer_index)?;
            Some(device.create_render_pass(&descriptor)?)
        } else {
            None
        };
        passes.push(pass);
        Ok::<_, FrameGraphError>(())
    });

    if let Err(err) = result {
        for set in sets.into_iter().flatten() {
            device.destroy_descriptor_set(set);
        }
        for pass in passes.into_iter().flatten() {
            device.destroy_render_pass(pass);
        }
        return Err(err);
    }
    Ok((sets, passes))
}

fn descriptor_set_descriptor(
    stage: &RenderStageDescriptor,
    registry: &ResourceRegistry,
    back_buffer_index: usize,
) -> FrameGraphResult<Option<DescriptorSetDescriptor>> {
    let mut bindings = Vec::new();
    for usage in stage
        .usages
        .iter()
        .filter(|u| u.binding.is_descriptor_bound())
    {
        let resource = registry.lookup(&usage.resource)?;
        let handles = resource.require_handles(back_buffer_index)?;
        let sampler = if usage.binding == BindingType::CombinedSampler {
            resource.handles().and_then(|h| h.sampler())
        } else {
            None
        };
        bindings.push(DescriptorBinding {
            slot: bindings.len() as u32,
            binding: usage.binding,
            resources: handles.to_vec(),
            sampler,
        });
    }

    if bindings.is_empty() {
        return Ok(None);
    }
    Ok(Some(DescriptorSetDescriptor {
        label: format!("{} [{}]", stage.name, back_buffer_index),
        bindings,
    }))
}

fn render_pass_descriptor(
    render: &RenderStagePlan,
    registry: &ResourceRegistry,
    back_buffer_index: usize,
) -> FrameGraphResult<RenderPassDescriptor> {
    let mut attachments = Vec::with_capacity(render.attachments.len());
    for attachment in &render.attachments {
        let resource = registry.resource(attachment.resource);
        // Attachments render into the first subresource
        let handle = resource
            .require_handles(back_buffer_index)?
            .first()
            .copied()
            .ok_or_else(|| FrameGraphError::UnbackedResource(resource.name().to_string()))?;
        attachments.push(RenderPassAttachment {
            resource: handle,
            binding: attachment.binding,
            initial: attachment.initial,
            final_binding: attachment.final_binding,
            clear: attachment.clear,
        });
    }
    Ok(RenderPassDescriptor {
        label: format!("{} [{}]", render.name, back_buffer_index),
        attachments,
    })
}
