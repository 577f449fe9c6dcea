//! Render stage graph.
//!
//! The [`StageGraph`] is an arena of [`RenderStageDescriptor`]s plus the
//! explicit producer → consumer [`UsageLink`]s between their resource usages.
//! It is purely declarative: ordering is done by the
//! [`compiler`](crate::compiler), barrier placement by the
//! [`sync`](crate::sync) planner.
//!
//! # Architecture
//!
//! | Layer | Type | Purpose |
//! |-------|------|---------|
//! | Context | [`FrameGraph`](crate::FrameGraph) | Owns everything, drives rebuilds and frames |
//! | Schedule | [`FrameScheduler`](crate::scheduler::FrameScheduler) | Frames in flight, submission |
//! | Plan | [`PipelinePlan`](crate::sync::PipelinePlan) | Ordered render + synchronization stages |
//! | **Graph** | [`StageGraph`] | Stages and usage links (this module) |
//!
//! # Topology and Activity
//!
//! Adding stages, linking usages and enabling/disabling stages are topology
//! edits: they bump [`StageGraph::revision`] and require a rebuild. Changing a
//! stage's runtime parameters or its per-frame activity does not.
//!
//! # Example
//!
//! ```ignore
//! use redlilium_framegraph::graph::{RenderStageDescriptor, StageGraph};
//! use redlilium_framegraph::types::BindingType;
//!
//! let mut graph = StageGraph::new();
//! graph.add_stage(RenderStageDescriptor::compute("cull", [64, 1, 1])
//!     .uses("draws", BindingType::UnorderedAccessWrite))?;
//! graph.add_stage(RenderStageDescriptor::graphics("scene", draw, extent)
//!     .uses("draws", BindingType::IndirectArgument))?;
//! graph.link_resource("cull", "scene", "draws")?;
//! ```

mod stage;
mod usage;

use std::collections::HashMap;

use crate::error::{FrameGraphError, FrameGraphResult};
use crate::types::StageParameters;

pub use stage::{DrawType, PipelineKind, RenderStageDescriptor};
pub use usage::{ResourceUsage, UsageLink, UsageRef};

/// Handle to a stage in a [`StageGraph`].
///
/// `StageHandle` is `Copy` and cheap to pass around. It is only valid within
/// the graph that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageHandle(u32);

impl StageHandle {
    pub(crate) fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
struct StageEntry {
    descriptor: RenderStageDescriptor,
    enabled: bool,
    active: bool,
}

/// Arena of render stages and the links between their usages.
#[derive(Debug, Default)]
pub struct StageGraph {
    stages: Vec<StageEntry>,
    by_name: HashMap<String, StageHandle>,
    links: Vec<UsageLink>,
    revision: u64,
}

impl StageGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a stage. Stage names must be unique.
    pub fn add_stage(
        &mut self,
        descriptor: RenderStageDescriptor,
    ) -> FrameGraphResult<StageHandle> {
        if self.by_name.contains_key(&descriptor.name) {
            return Err(FrameGraphError::InvalidStage {
                stage: descriptor.name,
                reason: "a stage with this name already exists".into(),
            });
        }

        let handle = StageHandle::new(self.stages.len() as u32);
        self.by_name.insert(descriptor.name.clone(), handle);
        self.stages.push(StageEntry {
            descriptor,
            enabled: true,
            active: true,
        });
        self.revision += 1;
        Ok(handle)
    }

    /// Find a stage by name.
    pub fn find(&self, name: &str) -> Option<StageHandle> {
        self.by_name.get(name).copied()
    }

    /// Find a stage by name, failing with [`FrameGraphError::UnknownStage`].
    pub fn handle(&self, name: &str) -> FrameGraphResult<StageHandle> {
        self.find(name)
            .ok_or_else(|| FrameGraphError::UnknownStage(name.to_string()))
    }

    /// Get a stage descriptor.
    ///
    /// # Panics
    ///
    /// Panics if the handle did not come from this graph.
    pub fn stage(&self, handle: StageHandle) -> &RenderStageDescriptor {
        &self.stages[handle.index()].descriptor
    }

    /// All stages in declaration order.
    pub fn stages(&self) -> impl Iterator<Item = (StageHandle, &RenderStageDescriptor)> {
        self.stages
            .iter()
            .enumerate()
            .map(|(i, e)| (StageHandle::new(i as u32), &e.descriptor))
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Link the `producer` usage to the `consumer` usage.
    ///
    /// Both usages must exist, name the same resource and belong to
    /// different stages. Linking twice is a no-op.
    pub fn link(&mut self, producer: UsageRef, consumer: UsageRef) -> FrameGraphResult<()> {
        let producer_usage = self.usage(producer)?;
        let consumer_usage = self.usage(consumer)?;
        let consumer_stage = &self.stage(consumer.stage).name;

        if producer.stage == consumer.stage {
            return Err(FrameGraphError::InvalidStage {
                stage: consumer_stage.clone(),
                reason: "a stage cannot consume its own output".into(),
            });
        }
        if producer_usage.resource != consumer_usage.resource {
            return Err(FrameGraphError::binding(
                consumer_stage.clone(),
                consumer_usage.resource.clone(),
                format!(
                    "linked to a usage of a different resource '{}'",
                    producer_usage.resource
                ),
            ));
        }

        let link = UsageLink { producer, consumer };
        if !self.links.contains(&link) {
            self.links.push(link);
            self.revision += 1;
        }
        Ok(())
    }

    /// Link the first usages of `resource` in two stages, by name.
    pub fn link_resource(
        &mut self,
        producer: &str,
        consumer: &str,
        resource: &str,
    ) -> FrameGraphResult<()> {
        let producer = self.usage_of(producer, resource)?;
        let consumer = self.usage_of(consumer, resource)?;
        self.link(producer, consumer)
    }

    fn usage_of(&self, stage: &str, resource: &str) -> FrameGraphResult<UsageRef> {
        let handle = self.handle(stage)?;
        self.stage(handle)
            .find_usage(resource)
            .map(|usage| UsageRef::new(handle, usage))
            .ok_or_else(|| FrameGraphError::UnresolvedResource {
                resource: resource.to_string(),
                referrer: format!("link from stage '{stage}'"),
            })
    }

    fn usage(&self, usage: UsageRef) -> FrameGraphResult<&ResourceUsage> {
        let entry = self
            .stages
            .get(usage.stage.index())
            .ok_or_else(|| FrameGraphError::UnknownStage(format!("#{}", usage.stage.index())))?;
        entry
            .descriptor
            .usages
            .get(usage.usage)
            .ok_or_else(|| FrameGraphError::InvalidStage {
                stage: entry.descriptor.name.clone(),
                reason: format!("no usage at index {}", usage.usage),
            })
    }

    /// All links in insertion order.
    pub fn links(&self) -> &[UsageLink] {
        &self.links
    }

    /// Links whose both ends belong to enabled stages.
    pub fn active_links(&self) -> impl Iterator<Item = &UsageLink> {
        self.links
            .iter()
            .filter(|l| self.is_enabled(l.producer.stage) && self.is_enabled(l.consumer.stage))
    }

    /// Whether `usage` reads something an enabled earlier stage produced.
    pub fn is_read(&self, usage: UsageRef) -> bool {
        self.active_links().any(|l| l.consumer == usage)
    }

    /// Whether `usage` produces something an enabled later stage reads.
    pub fn is_write(&self, usage: UsageRef) -> bool {
        self.active_links().any(|l| l.producer == usage)
    }

    /// Stages producing any input of `handle`, among enabled stages.
    pub fn producers(&self, handle: StageHandle) -> impl Iterator<Item = StageHandle> + '_ {
        self.active_links()
            .filter(move |l| l.consumer.stage == handle)
            .map(|l| l.producer.stage)
    }

    /// Enable or disable a stage. Disabled stages are left out of the plan.
    pub fn set_enabled(&mut self, handle: StageHandle, enabled: bool) {
        let entry = &mut self.stages[handle.index()];
        if entry.enabled != enabled {
            entry.enabled = enabled;
            self.revision += 1;
        }
    }

    pub fn is_enabled(&self, handle: StageHandle) -> bool {
        self.stages[handle.index()].enabled
    }

    /// Skip or resume a stage at render time without a rebuild.
    pub fn set_active(&mut self, handle: StageHandle, active: bool) {
        self.stages[handle.index()].active = active;
    }

    pub fn is_active(&self, handle: StageHandle) -> bool {
        self.stages[handle.index()].active
    }

    /// Replace a stage's runtime parameters.
    pub fn update_parameters(
        &mut self,
        handle: StageHandle,
        parameters: StageParameters,
    ) -> FrameGraphResult<()> {
        let descriptor = &mut self.stages[handle.index()].descriptor;
        descriptor
            .pipeline
            .apply(parameters)
            .map_err(|reason| FrameGraphError::InvalidParameter(format!(
                "stage '{}': {reason}",
                descriptor.name
            )))
    }

    /// Incremented on every topology edit.
    pub fn revision(&self) -> u64 {
        self.revision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BindingType, Extent2d};

    fn two_stage_graph() -> (StageGraph, StageHandle, StageHandle) {
        let mut graph = StageGraph::new();
        let a = graph
            .add_stage(
                RenderStageDescriptor::compute("A", [1, 1, 1])
                    .uses("t", BindingType::UnorderedAccessWrite),
            )
            .unwrap();
        let b = graph
            .add_stage(
                RenderStageDescriptor::graphics(
                    "B",
                    DrawType::FullScreenTriangle,
                    Extent2d::new(8, 8),
                )
                .uses("t", BindingType::CombinedSampler),
            )
            .unwrap();
        (graph, a, b)
    }

    #[test]
    fn test_add_stage() {
        let (graph, a, b) = two_stage_graph();
        assert_eq!(graph.stage_count(), 2);
        assert_eq!(graph.stage(a).name, "A");
        assert_eq!(graph.find("B"), Some(b));
        assert!(graph.is_enabled(a));
        assert!(graph.is_active(b));
    }

    #[test]
    fn test_duplicate_stage_name_rejected() {
        let (mut graph, _, _) = two_stage_graph();
        let result = graph.add_stage(RenderStageDescriptor::compute("A", [1, 1, 1]));
        assert!(matches!(result, Err(FrameGraphError::InvalidStage { .. })));
    }

    #[test]
    fn test_link_derives_direction() {
        let (mut graph, a, b) = two_stage_graph();
        graph.link_resource("A", "B", "t").unwrap();

        let produced = UsageRef::new(a, 0);
        let consumed = UsageRef::new(b, 0);
        assert!(graph.is_write(produced));
        assert!(!graph.is_read(produced));
        assert!(graph.is_read(consumed));
        assert!(!graph.is_write(consumed));
        assert_eq!(graph.producers(b).collect::<Vec<_>>(), vec![a]);
    }

    #[test]
    fn test_link_is_idempotent() {
        let (mut graph, _, _) = two_stage_graph();
        graph.link_resource("A", "B", "t").unwrap();
        let revision = graph.revision();
        graph.link_resource("A", "B", "t").unwrap();
        assert_eq!(graph.links().len(), 1);
        assert_eq!(graph.revision(), revision);
    }

    #[test]
    fn test_link_different_resources_rejected() {
        let (mut graph, a, _) = two_stage_graph();
        let c = graph
            .add_stage(
                RenderStageDescriptor::compute("C", [1, 1, 1])
                    .uses("other", BindingType::ConstantBuffer),
            )
            .unwrap();
        let result = graph.link(UsageRef::new(a, 0), UsageRef::new(c, 0));
        assert!(matches!(
            result,
            Err(FrameGraphError::InvalidBindingTransition { .. })
        ));
    }

    #[test]
    fn test_self_link_rejected() {
        let (mut graph, a, _) = two_stage_graph();
        let result = graph.link(UsageRef::new(a, 0), UsageRef::new(a, 0));
        assert!(matches!(result, Err(FrameGraphError::InvalidStage { .. })));
    }

    #[test]
    fn test_link_unknown_usage() {
        let (mut graph, _, _) = two_stage_graph();
        let result = graph.link_resource("A", "B", "missing");
        assert!(matches!(
            result,
            Err(FrameGraphError::UnresolvedResource { .. })
        ));
        let result = graph.link_resource("A", "Z", "t");
        assert_eq!(result, Err(FrameGraphError::UnknownStage("Z".into())));
    }

    #[test]
    fn test_disabled_stage_links_ignored() {
        let (mut graph, a, b) = two_stage_graph();
        graph.link_resource("A", "B", "t").unwrap();
        let revision = graph.revision();

        graph.set_enabled(a, false);
        assert!(graph.revision() > revision);
        assert_eq!(graph.producers(b).count(), 0);
        assert!(!graph.is_read(UsageRef::new(b, 0)));
    }

    #[test]
    fn test_activity_is_not_topology() {
        let (mut graph, a, _) = two_stage_graph();
        let revision = graph.revision();
        graph.set_active(a, false);
        assert!(!graph.is_active(a));
        assert_eq!(graph.revision(), revision);
    }

    #[test]
    fn test_update_parameters() {
        let (mut graph, a, b) = two_stage_graph();
        graph
            .update_parameters(b, StageParameters::Extent { width: 640, height: 480 })
            .unwrap();
        assert_eq!(
            graph.stage(b).pipeline,
            PipelineKind::Graphics {
                draw: DrawType::FullScreenTriangle,
                extent: Extent2d::new(640, 480),
            }
        );

        let result = graph.update_parameters(a, StageParameters::Extent { width: 1, height: 1 });
        assert!(matches!(result, Err(FrameGraphError::InvalidParameter(_))));
    }
}
