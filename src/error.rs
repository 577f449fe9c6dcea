//! Frame graph error types.
//!
//! Build-time errors ([`FrameGraphError::GraphCycle`],
//! [`FrameGraphError::UnresolvedResource`], [`FrameGraphError::InvalidBindingTransition`],
//! [`FrameGraphError::SynchronizationGeneration`]) are returned by
//! [`FrameGraph::build`](crate::FrameGraph::build) before any frame is rendered.
//! Runtime errors ([`FrameGraphError::DeviceObjectCreation`],
//! [`FrameGraphError::FenceWaitTimeout`], [`FrameGraphError::Device`]) are fatal:
//! the caller is expected to tear down and recreate the whole frame graph.

use std::time::Duration;

use thiserror::Error;

use crate::device::{DeviceError, DeviceObjectKind};
use crate::types::{BindingType, QueueKind};

/// Errors produced while building or rendering a frame graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameGraphError {
    /// Two or more stages depend on each other.
    #[error("render stage graph contains a cycle through stage '{stage}'")]
    GraphCycle { stage: String },

    /// A stage references a resource the registry does not know.
    #[error("unresolved resource '{resource}' referenced by {referrer}")]
    UnresolvedResource { resource: String, referrer: String },

    /// A binding combination cannot be represented.
    #[error("invalid binding of resource '{resource}' in stage '{stage}': {reason}")]
    InvalidBindingTransition {
        stage: String,
        resource: String,
        reason: String,
    },

    /// Internal invariant violation while folding or merging barriers.
    #[error("synchronization generation failed: {0}")]
    SynchronizationGeneration(String),

    /// The device failed to create an object the frame graph needs.
    #[error("failed to create {object}: {reason}")]
    DeviceObjectCreation {
        object: DeviceObjectKind,
        reason: String,
    },

    /// Frame pacing wait exceeded its deadline.
    #[error("timed out after {timeout:?} waiting for {queue} fence value {value}")]
    FenceWaitTimeout {
        queue: QueueKind,
        value: u64,
        timeout: Duration,
    },

    /// Any other device failure during recording or submission.
    #[error("device error: {0}")]
    Device(DeviceError),

    /// A stage name or handle is not part of the graph.
    #[error("unknown render stage '{0}'")]
    UnknownStage(String),

    /// A stage declaration is internally inconsistent.
    #[error("invalid render stage '{stage}': {reason}")]
    InvalidStage { stage: String, reason: String },

    /// A resource has been declared but never given concrete handles.
    #[error("resource '{0}' has no concrete handles")]
    UnbackedResource(String),

    /// A parameter passed to the frame graph is out of range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Rendering was requested before a successful build.
    #[error("frame graph has not been built or its topology changed since the last build")]
    NotBuilt,

    /// A graph description could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),
}

impl FrameGraphError {
    /// Shorthand for [`FrameGraphError::InvalidBindingTransition`].
    pub(crate) fn binding(
        stage: impl Into<String>,
        resource: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidBindingTransition {
            stage: stage.into(),
            resource: resource.into(),
            reason: reason.into(),
        }
    }

    /// Describes a barrier that should never have reached a synchronization stage.
    pub(crate) fn no_op_barrier(resource: &str, binding: BindingType, queue: QueueKind) -> Self {
        Self::SynchronizationGeneration(format!(
            "no-op barrier for '{resource}' ({binding} on {queue})"
        ))
    }

    /// Whether this error can only occur while building the graph.
    pub fn is_build_error(&self) -> bool {
        matches!(
            self,
            Self::GraphCycle { .. }
                | Self::UnresolvedResource { .. }
                | Self::InvalidBindingTransition { .. }
                | Self::SynchronizationGeneration(_)
                | Self::UnknownStage(_)
                | Self::InvalidStage { .. }
                | Self::Config(_)
        )
    }
}

impl From<DeviceError> for FrameGraphError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::CreationFailed { object, reason } => {
                Self::DeviceObjectCreation { object, reason }
            }
            other => Self::Device(other),
        }
    }
}

/// Result alias used throughout the crate.
pub type FrameGraphResult<T> = Result<T, FrameGraphError>;
