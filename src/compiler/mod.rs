//! Stage graph ordering.
//!
//! This module turns the enabled stages of a [`StageGraph`] into a linear
//! execution order ([`StageOrder`]).
//!
//! # Weights
//!
//! Every stage gets a weight from its upstream producers:
//!
//! ```text
//! weight(stage) = 0                                  no producers
//! weight(stage) = 1 + max(weight(p) for producer p)  otherwise
//! ```
//!
//! A consumer therefore always weighs more than any of its producers, and
//! ordering stages by weight (ties keep declaration order) yields a valid
//! topological order. Stages that share a weight have no dependency on each
//! other and are free to overlap on separate queues.
//!
//! If computing a weight needs that same weight, directly or through other
//! stages, the graph has a cycle and [`build_order`] fails with
//! [`FrameGraphError::GraphCycle`]. No partial order is produced.
//!
//! # Validation
//!
//! Before ordering, every enabled stage is checked:
//!
//! - every usage names a declared resource
//! - attachments only appear in graphics stages on the graphics queue
//! - draw resources (index / indirect buffers) only appear in graphics stages
//!   and never alongside a writable usage of the same resource
//! - a resource appears only once per stage, or with identical bindings
//! - indexed indirect draws have both an index and an indirect argument usage
//!
//! # Example
//!
//! ```ignore
//! let order = build_order(&graph, &registry, true)?;
//! for (stage, weight) in order.iter() {
//!     println!("{} (weight {})", graph.stage(stage).name, weight);
//! }
//! ```

use crate::error::{FrameGraphError, FrameGraphResult};
use crate::graph::{DrawType, PipelineKind, RenderStageDescriptor, StageGraph, StageHandle};
use crate::resource::ResourceRegistry;
use crate::types::{BindingType, QueueKind, StageKind};

/// Enabled stages in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageOrder {
    stages: Vec<StageHandle>,
    weights: Vec<u32>,
    queues: Vec<QueueKind>,
}

impl StageOrder {
    /// Stage handles in execution order.
    pub fn stages(&self) -> &[StageHandle] {
        &self.stages
    }

    /// Weight of the stage at `position`.
    pub fn weight(&self, position: usize) -> u32 {
        self.weights[position]
    }

    /// Queue the stage at `position` is submitted to.
    pub fn queue(&self, position: usize) -> QueueKind {
        self.queues[position]
    }

    /// `(stage, weight)` pairs in execution order.
    pub fn iter(&self) -> impl Iterator<Item = (StageHandle, u32)> + '_ {
        self.stages.iter().copied().zip(self.weights.iter().copied())
    }

    /// Position of `stage` in the order, if it is enabled.
    pub fn position(&self, stage: StageHandle) -> Option<usize> {
        self.stages.iter().position(|&s| s == stage)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    Unvisited,
    InProgress,
    Done(u32),
}

/// Validate the enabled stages and order them by weight.
///
/// When `async_compute` is `false`, stages declared on the compute queue are
/// moved to the graphics queue.
pub fn build_order(
    graph: &StageGraph,
    registry: &ResourceRegistry,
    async_compute: bool,
) -> FrameGraphResult<StageOrder> {
    let enabled: Vec<StageHandle> = graph
        .stages()
        .map(|(handle, _)| handle)
        .filter(|&handle| graph.is_enabled(handle))
        .collect();

    for &handle in &enabled {
        validate_stage(graph.stage(handle), registry, async_compute)?;
    }

    let mut producers: Vec<Vec<StageHandle>> = vec![Vec::new(); graph.stage_count()];
    for link in graph.active_links() {
        let list = &mut producers[link.consumer.stage.index()];
        if !list.contains(&link.producer.stage) {
            list.push(link.producer.stage);
        }
    }

    let mut visits = vec![Visit::Unvisited; graph.stage_count()];
    for &handle in &enabled {
        weight_of(graph, handle, &producers, &mut visits)?;
    }

    let mut weighted: Vec<(StageHandle, u32)> = enabled
        .iter()
        .map(|&handle| match visits[handle.index()] {
            Visit::Done(weight) => Ok((handle, weight)),
            _ => Err(FrameGraphError::GraphCycle {
                stage: graph.stage(handle).name.clone(),
            }),
        })
        .collect::<FrameGraphResult<_>>()?;

    // Stable: ties keep declaration order
    weighted.sort_by_key(|&(_, weight)| weight);

    let queues = weighted
        .iter()
        .map(|&(handle, _)| effective_queue(graph.stage(handle), async_compute))
        .collect();
    let order = StageOrder {
        stages: weighted.iter().map(|&(h, _)| h).collect(),
        weights: weighted.iter().map(|&(_, w)| w).collect(),
        queues,
    };

    log::debug!(
        "Ordered {} stages (max weight {})",
        order.len(),
        order.weights.last().copied().unwrap_or(0)
    );
    Ok(order)
}

fn weight_of(
    graph: &StageGraph,
    handle: StageHandle,
    producers: &[Vec<StageHandle>],
    visits: &mut [Visit],
) -> FrameGraphResult<u32> {
    match visits[handle.index()] {
        Visit::Done(weight) => return Ok(weight),
        Visit::InProgress => {
            return Err(FrameGraphError::GraphCycle {
                stage: graph.stage(handle).name.clone(),
            });
        }
        Visit::Unvisited => {}
    }

    visits[handle.index()] = Visit::InProgress;

    let mut weight = 0;
    for &producer in &producers[handle.index()] {
        weight = weight.max(weight_of(graph, producer, producers, visits)? + 1);
    }

    visits[handle.index()] = Visit::Done(weight);
    Ok(weight)
}

/// Queue a stage actually runs on.
pub(crate) fn effective_queue(stage: &RenderStageDescriptor, async_compute: bool) -> QueueKind {
    match stage.queue {
        QueueKind::Compute if !async_compute => QueueKind::Graphics,
        queue => queue,
    }
}

fn validate_stage(
    stage: &RenderStageDescriptor,
    registry: &ResourceRegistry,
    async_compute: bool,
) -> FrameGraphResult<()> {
    let queue = effective_queue(stage, async_compute);
    let kind = stage.kind();

    if kind == StageKind::Graphics && queue != QueueKind::Graphics {
        return Err(FrameGraphError::InvalidStage {
            stage: stage.name.clone(),
            reason: format!("graphics stages cannot run on the {queue} queue"),
        });
    }

    for (index, usage) in stage.usages.iter().enumerate() {
        let handle = registry.resolve(&usage.resource, &format!("stage '{}'", stage.name))?;
        let resource = registry.resource(handle);

        if usage.binding == BindingType::Unbound {
            return Err(FrameGraphError::binding(
                &stage.name,
                &usage.resource,
                "unbound is not a binding a stage can request",
            ));
        }
        let graphics_only = kind != StageKind::Graphics || queue != QueueKind::Graphics;
        if usage.binding.is_attachment() && graphics_only {
            return Err(FrameGraphError::binding(
                &stage.name,
                &usage.resource,
                format!("{} requires a graphics stage on the graphics queue", usage.binding),
            ));
        }
        if usage.binding.is_draw_resource() && kind != StageKind::Graphics {
            return Err(FrameGraphError::binding(
                &stage.name,
                &usage.resource,
                format!("{} is only consumed by graphics draws", usage.binding),
            ));
        }
        if usage.binding == BindingType::Present && !resource.is_back_buffer_bound() {
            return Err(FrameGraphError::binding(
                &stage.name,
                &usage.resource,
                "only back-buffer bound resources can be presented",
            ));
        }

        for other in &stage.usages[index + 1..] {
            if other.resource != usage.resource || other.binding == usage.binding {
                continue;
            }
            let draw_vs_write = (usage.binding.is_draw_resource() && other.binding.is_writable())
                || (other.binding.is_draw_resource() && usage.binding.is_writable());
            let reason = if draw_vs_write {
                format!(
                    "used both as draw resource and as writable {} in the same stage",
                    if usage.binding.is_writable() {
                        usage.binding
                    } else {
                        other.binding
                    }
                )
            } else {
                format!(
                    "bound as both {} and {} in the same stage",
                    usage.binding, other.binding
                )
            };
            return Err(FrameGraphError::binding(&stage.name, &usage.resource, reason));
        }
    }

    if let PipelineKind::Graphics {
        draw: DrawType::IndexedIndirect { .. },
        ..
    } = stage.pipeline
    {
        let has_index = stage.find_binding(BindingType::IndexBuffer).is_some();
        let has_indirect = stage.find_binding(BindingType::IndirectArgument).is_some();
        if !has_index || !has_indirect {
            return Err(FrameGraphError::InvalidStage {
                stage: stage.name.clone(),
                reason: "indexed indirect draws need an index buffer and an indirect argument usage"
                    .into(),
            });
        }
    }

    Ok(())
}
