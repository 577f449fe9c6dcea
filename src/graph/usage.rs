//! Resource usage declarations.
//!
//! A [`ResourceUsage`] names a resource and the [`BindingType`] it is bound as
//! inside one stage. Usages do not declare whether they read or write; that is
//! derived from the [`UsageLink`]s the graph holds. A usage with an incoming
//! link reads what an earlier stage produced, a usage with an outgoing link
//! produces something a later stage reads, and a usage may be both.

use crate::types::{BindingType, ClearValue};

use super::StageHandle;

/// How one stage uses one resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceUsage {
    /// Registry name of the resource.
    pub resource: String,
    pub binding: BindingType,
    /// Clear applied when the usage is an attachment.
    pub clear: ClearValue,
}

impl ResourceUsage {
    pub fn new(resource: impl Into<String>, binding: BindingType) -> Self {
        Self {
            resource: resource.into(),
            binding,
            clear: ClearValue::None,
        }
    }

    pub fn with_clear(mut self, clear: ClearValue) -> Self {
        self.clear = clear;
        self
    }
}

/// Reference to the `usage`-th usage of `stage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UsageRef {
    pub stage: StageHandle,
    pub usage: usize,
}

impl UsageRef {
    pub fn new(stage: StageHandle, usage: usize) -> Self {
        Self { stage, usage }
    }
}

/// Producer to consumer edge between two usages of the same resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UsageLink {
    pub producer: UsageRef,
    pub consumer: UsageRef,
}
