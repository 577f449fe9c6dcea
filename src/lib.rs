//! # RedLilium Frame Graph
//!
//! Render graph compiler and multi-queue frame executor for RedLilium.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`ResourceRegistry`] - Named logical resources and their per-back-buffer handles
//! - [`StageGraph`] - Declarative graphics, compute and ray tracing stages
//! - [`compiler`] - Dependency ordering of enabled stages
//! - [`sync`] - Automatic barrier placement, folding and batching
//! - [`executor`] - Command recording for render and synchronization stages
//! - [`FrameScheduler`] - Bounded frames in flight and fence-ordered submission
//! - [`FrameGraph`] - The context object tying everything together
//!
//! The crate never calls a graphics API. Everything GPU-facing goes through
//! the [`GraphicsDevice`] trait; [`DummyDevice`] records calls for tests.
//!
//! ## Example
//!
//! ```ignore
//! use redlilium_framegraph::{FrameGraph, FrameGraphConfig, RenderStageDescriptor};
//!
//! let mut frame_graph = FrameGraph::new(device, FrameGraphConfig::default())?;
//! frame_graph.add_stage(RenderStageDescriptor::compute("cull", [64, 1, 1])
//!     .uses("draws", BindingType::UnorderedAccessWrite))?;
//! frame_graph.add_stage(RenderStageDescriptor::graphics("scene", draw, extent)
//!     .uses("draws", BindingType::IndirectArgument))?;
//! frame_graph.link("cull", "scene", "draws")?;
//! frame_graph.build()?;
//! frame_graph.render(frame_index, back_buffer_index)?;
//! ```

pub mod compiler;
pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod executor;
pub mod graph;
pub mod resource;
pub mod scheduler;
pub mod sync;
pub mod types;

// Re-export main types for convenience
pub use config::{load_graph_description, FrameGraphConfig, GraphDescription};
pub use context::FrameGraph;
pub use device::{DeviceError, DummyDevice, GraphicsDevice};
pub use error::{FrameGraphError, FrameGraphResult};
pub use graph::{DrawType, RenderStageDescriptor, ResourceUsage, StageGraph, StageHandle};
pub use resource::{ResourceHandle, ResourceHandles, ResourceOrigin, ResourceRegistry};
pub use scheduler::FrameScheduler;
pub use sync::{PipelinePlan, PipelineStage, SynchronizationStageDescriptor};
pub use types::{
    BindingType, ClearValue, Extent2d, GpuHandle, QueueKind, ResourceKind, StageKind,
    StageParameters,
};

/// Frame graph library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
