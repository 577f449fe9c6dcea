//! Resource registry.
//!
//! The [`ResourceRegistry`] owns every named logical resource the frame graph
//! knows about, together with its concrete per-back-buffer-slot GPU handles.
//! Stages refer to resources by name; the registry resolves those names to
//! dense [`ResourceHandle`]s at build time so that the planner and executor
//! never store names or pointers.
//!
//! # Internal and External Resources
//!
//! | Origin | Concrete handle slots |
//! |--------|-----------------------|
//! | [`ResourceOrigin::Internal`] | exactly `back_buffer_count` |
//! | [`ResourceOrigin::External`] not back-buffer bound | 1 or `back_buffer_count` |
//! | [`ResourceOrigin::External`] back-buffer bound | exactly `back_buffer_count` |
//!
//! # Updates
//!
//! [`ResourceRegistry::update`] swaps the concrete handles and queues the
//! resource as dirty. Dirty resources are picked up by
//! [`StageBindings::flush`](crate::resource::StageBindings::flush) between
//! frames, which rewrites dependent descriptor sets copy-on-write. Replaced
//! concrete handles are parked until every frame that could reference them
//! has retired and are then handed back through
//! [`ResourceRegistry::release_retired`].
//!
//! # Initialization
//!
//! Engine-managed handles hold undefined contents until the first frame that
//! renders into their slot transitions them out of
//! [`BindingType::Unbound`](crate::types::BindingType::Unbound). The registry
//! remembers which slots have been through that first frame. New handles, a
//! new shape or a rebuilt plan start every slot over. External resources are
//! handed over already in their resting state and are never unbound.

mod bindings;
mod deferred;

use std::collections::HashMap;

use crate::error::{FrameGraphError, FrameGraphResult};
use crate::types::{GpuHandle, ResourceKind};

pub use bindings::{StageBindings, StageObjects};
pub use deferred::DeferredRelease;

/// Handle to a resource in a [`ResourceRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceHandle(u32);

impl ResourceHandle {
    /// Create a new resource handle.
    pub(crate) fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get the resource index.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Who creates a resource's concrete handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceOrigin {
    /// Engine-managed: one concrete handle set per back buffer slot.
    Internal,
    /// Supplied by a collaborator.
    External {
        /// Rotates with the swapchain and ends every frame in `Present`.
        back_buffer_bound: bool,
    },
}

/// Concrete handles for one resource, indexed `[slot][subresource]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceHandles {
    slots: Vec<Vec<GpuHandle>>,
    sampler: Option<GpuHandle>,
}

impl ResourceHandles {
    pub fn new(slots: Vec<Vec<GpuHandle>>) -> Self {
        Self {
            slots,
            sampler: None,
        }
    }

    /// One slot with one subresource.
    pub fn single(handle: GpuHandle) -> Self {
        Self::new(vec![vec![handle]])
    }

    /// One single-subresource handle per slot.
    pub fn per_slot(handles: impl IntoIterator<Item = GpuHandle>) -> Self {
        Self::new(handles.into_iter().map(|h| vec![h]).collect())
    }

    /// Attach a sampler used by combined-sampler bindings.
    pub fn with_sampler(mut self, sampler: GpuHandle) -> Self {
        self.sampler = Some(sampler);
        self
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn sampler(&self) -> Option<GpuHandle> {
        self.sampler
    }

    fn all(&self) -> impl Iterator<Item = GpuHandle> + '_ {
        self.slots.iter().flatten().copied()
    }
}

/// A named logical GPU resource.
#[derive(Debug, Clone)]
pub struct Resource {
    name: String,
    kind: ResourceKind,
    subresource_count: u32,
    origin: ResourceOrigin,
    handles: Option<ResourceHandles>,
    /// One flag per handle slot.
    initialized: Vec<bool>,
}

impl Resource {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn subresource_count(&self) -> u32 {
        self.subresource_count
    }

    pub fn origin(&self) -> ResourceOrigin {
        self.origin
    }

    pub fn is_internal(&self) -> bool {
        self.origin == ResourceOrigin::Internal
    }

    pub fn is_back_buffer_bound(&self) -> bool {
        matches!(
            self.origin,
            ResourceOrigin::External {
                back_buffer_bound: true
            }
        )
    }

    /// Whether concrete handles have been supplied.
    pub fn is_backed(&self) -> bool {
        self.handles.is_some()
    }

    pub fn handles(&self) -> Option<&ResourceHandles> {
        self.handles.as_ref()
    }

    /// Concrete subresource handles used while rendering into `back_buffer_index`.
    ///
    /// Single-slot external resources are shared by every back buffer.
    pub fn handles_for(&self, back_buffer_index: usize) -> Option<&[GpuHandle]> {
        let handles = self.handles.as_ref()?;
        handles
            .slots
            .get(Self::slot_index(handles, back_buffer_index))
            .map(Vec::as_slice)
    }

    /// Like [`handles_for`](Self::handles_for) but fails when unbacked.
    pub(crate) fn require_handles(
        &self,
        back_buffer_index: usize,
    ) -> FrameGraphResult<&[GpuHandle]> {
        self.handles_for(back_buffer_index)
            .ok_or_else(|| FrameGraphError::UnbackedResource(self.name.clone()))
    }

    /// Whether the handles used with `back_buffer_index` have never been
    /// through a frame and still hold undefined contents.
    pub fn is_unbound(&self, back_buffer_index: usize) -> bool {
        if !self.is_internal() {
            return false;
        }
        let Some(handles) = &self.handles else {
            return true;
        };
        let slot = Self::slot_index(handles, back_buffer_index);
        !self.initialized.get(slot).copied().unwrap_or(false)
    }

    fn slot_index(handles: &ResourceHandles, back_buffer_index: usize) -> usize {
        if handles.slots.len() == 1 {
            0
        } else {
            back_buffer_index
        }
    }

    fn valid_slot_counts(&self, back_buffer_count: usize) -> &'static str {
        match self.origin {
            ResourceOrigin::Internal
            | ResourceOrigin::External {
                back_buffer_bound: true,
            } if back_buffer_count > 1 => "exactly back_buffer_count",
            ResourceOrigin::External {
                back_buffer_bound: false,
            } => "1 or back_buffer_count",
            _ => "exactly 1",
        }
    }

    fn accepts_slot_count(&self, slots: usize, back_buffer_count: usize) -> bool {
        match self.origin {
            ResourceOrigin::Internal
            | ResourceOrigin::External {
                back_buffer_bound: true,
            } => slots == back_buffer_count,
            ResourceOrigin::External {
                back_buffer_bound: false,
            } => slots == 1 || slots == back_buffer_count,
        }
    }
}

/// Owner of all named resources.
#[derive(Debug)]
pub struct ResourceRegistry {
    back_buffer_count: usize,
    resources: Vec<Resource>,
    by_name: HashMap<String, ResourceHandle>,
    dirty: Vec<ResourceHandle>,
    retired: DeferredRelease<GpuHandle>,
    revision: u64,
}

impl ResourceRegistry {
    /// Create an empty registry.
    ///
    /// # Panics
    ///
    /// Panics if `back_buffer_count` is 0.
    pub fn new(back_buffer_count: usize) -> Self {
        assert!(back_buffer_count > 0, "back_buffer_count must be at least 1");

        Self {
            back_buffer_count,
            resources: Vec::new(),
            by_name: HashMap::new(),
            dirty: Vec::new(),
            retired: DeferredRelease::new(),
            revision: 0,
        }
    }

    pub fn back_buffer_count(&self) -> usize {
        self.back_buffer_count
    }

    /// Declare a resource.
    ///
    /// Declaring an existing name with the same shape returns its handle.
    /// Declaring it with a different shape drops its concrete handles and
    /// counts as a topology change.
    pub fn declare(
        &mut self,
        name: &str,
        kind: ResourceKind,
        subresource_count: u32,
        origin: ResourceOrigin,
    ) -> FrameGraphResult<ResourceHandle> {
        if subresource_count == 0 {
            return Err(FrameGraphError::InvalidParameter(format!(
                "resource '{name}' must have at least one subresource"
            )));
        }

        if let Some(&handle) = self.by_name.get(name) {
            let resource = &mut self.resources[handle.index()];
            if resource.kind == kind
                && resource.subresource_count == subresource_count
                && resource.origin == origin
            {
                return Ok(handle);
            }

            log::debug!("Redeclaring resource '{}' with a new shape", name);
            resource.kind = kind;
            resource.subresource_count = subresource_count;
            resource.origin = origin;
            resource.initialized.clear();
            if let Some(old) = resource.handles.take() {
                for h in old.all() {
                    // Nothing can render with an undeclared shape, so the old
                    // handles are only waiting on frames already submitted.
                    self.retired.defer(None, h);
                }
            }
            self.revision += 1;
            return Ok(handle);
        }

        let handle = ResourceHandle::new(self.resources.len() as u32);
        self.resources.push(Resource {
            name: name.to_string(),
            kind,
            subresource_count,
            origin,
            handles: None,
            initialized: Vec::new(),
        });
        self.by_name.insert(name.to_string(), handle);
        self.revision += 1;

        log::trace!("Declared resource '{}' ({:?}, {:?})", name, kind, origin);
        Ok(handle)
    }

    /// Replace a resource's concrete handles.
    ///
    /// `last_user` is the most recent frame that may still reference the old
    /// handles. Returns `false` when `handles` equals the current handles, in
    /// which case nothing is marked dirty.
    pub fn update(
        &mut self,
        name: &str,
        handles: ResourceHandles,
        last_user: Option<u64>,
    ) -> FrameGraphResult<bool> {
        let handle = self.resolve(name, "update")?;
        let back_buffer_count = self.back_buffer_count;
        let resource = &mut self.resources[handle.index()];

        if !resource.accepts_slot_count(handles.slot_count(), back_buffer_count) {
            return Err(FrameGraphError::InvalidParameter(format!(
                "resource '{}' needs {} handle slots, got {}",
                name,
                resource.valid_slot_counts(back_buffer_count),
                handles.slot_count()
            )));
        }
        if let Some(slot) = handles
            .slots
            .iter()
            .find(|slot| slot.len() != resource.subresource_count as usize)
        {
            return Err(FrameGraphError::InvalidParameter(format!(
                "resource '{}' has {} subresources, got {} handles",
                name,
                resource.subresource_count,
                slot.len()
            )));
        }

        if resource.handles.as_ref() == Some(&handles) {
            return Ok(false);
        }

        resource.initialized = vec![false; handles.slot_count()];
        if let Some(old) = resource.handles.replace(handles) {
            for h in old.all() {
                self.retired.defer(last_user, h);
            }
        }
        if !self.dirty.contains(&handle) {
            self.dirty.push(handle);
        }

        log::debug!("Updated concrete handles of '{}'", name);
        Ok(true)
    }

    /// Record that the handles used with `back_buffer_index` went through a
    /// frame and now hold the planned resting state.
    pub(crate) fn mark_initialized(&mut self, handle: ResourceHandle, back_buffer_index: usize) {
        let resource = &mut self.resources[handle.index()];
        let Some(handles) = &resource.handles else {
            return;
        };
        let slot = Resource::slot_index(handles, back_buffer_index);
        if let Some(flag) = resource.initialized.get_mut(slot) {
            *flag = true;
        }
    }

    /// Forget every initialized slot, as after a rebuild changed the states
    /// resources rest in.
    pub fn reset_initialization(&mut self) {
        for resource in &mut self.resources {
            resource.initialized.iter_mut().for_each(|flag| *flag = false);
        }
    }

    /// Look up a resource by name.
    pub fn lookup(&self, name: &str) -> FrameGraphResult<&Resource> {
        let handle = self.resolve(name, "lookup")?;
        Ok(&self.resources[handle.index()])
    }

    /// Resolve a name to a handle, naming `referrer` in the error.
    pub fn resolve(&self, name: &str, referrer: &str) -> FrameGraphResult<ResourceHandle> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| FrameGraphError::UnresolvedResource {
                resource: name.to_string(),
                referrer: referrer.to_string(),
            })
    }

    /// Get a resource by handle.
    ///
    /// # Panics
    ///
    /// Panics if the handle did not come from this registry.
    pub fn resource(&self, handle: ResourceHandle) -> &Resource {
        &self.resources[handle.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (ResourceHandle, &Resource)> {
        self.resources
            .iter()
            .enumerate()
            .map(|(i, r)| (ResourceHandle::new(i as u32), r))
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Take the resources updated since the last call.
    pub fn take_dirty(&mut self) -> Vec<ResourceHandle> {
        std::mem::take(&mut self.dirty)
    }

    pub fn has_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Replaced concrete handles no retired frame can still reference.
    pub fn release_retired(&mut self, retired: Option<u64>) -> Vec<GpuHandle> {
        self.retired.drain_retired(retired)
    }

    /// Every replaced handle, regardless of frame. Only valid when idle.
    pub fn release_all(&mut self) -> Vec<GpuHandle> {
        self.retired.drain_all()
    }

    /// Incremented whenever a declaration changes the graph topology.
    pub fn revision(&self) -> u64 {
        self.revision
    }
}
