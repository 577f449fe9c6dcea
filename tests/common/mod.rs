//! Common utilities for frame graph integration tests.
//!
//! Every test drives a [`FrameGraph`] over a recording [`DummyDevice`] and
//! asserts on the calls and submissions the device saw.

#![allow(dead_code)]

use std::sync::Arc;

use redlilium_framegraph::device::Submission;
use redlilium_framegraph::{
    BindingType, DrawType, DummyDevice, Extent2d, FrameGraph, FrameGraphConfig, GpuHandle,
    QueueKind, RenderStageDescriptor, ResourceHandles, ResourceKind, ResourceOrigin,
};

pub const EXTENT: Extent2d = Extent2d::new(1280, 720);

/// Route `log` output through the test harness.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Frame graph over a fresh dummy device with a short fence timeout.
pub fn frame_graph(back_buffer_count: usize) -> (Arc<DummyDevice>, FrameGraph<DummyDevice>) {
    init_logging();
    let device = Arc::new(DummyDevice::new());
    let config = FrameGraphConfig::default()
        .with_back_buffer_count(back_buffer_count)
        .with_fence_timeout_ms(20);
    let frame_graph = FrameGraph::new(Arc::clone(&device), config).expect("frame graph");
    (device, frame_graph)
}

/// One single-subresource handle per back buffer, numbered from `base`.
pub fn per_slot_handles(count: usize, base: u64) -> ResourceHandles {
    ResourceHandles::per_slot((0..count as u64).map(|i| GpuHandle::new(base + i)))
}

/// Declare an internal resource and back it with handles from `base`.
pub fn internal_resource(
    frame_graph: &mut FrameGraph<DummyDevice>,
    name: &str,
    kind: ResourceKind,
    base: u64,
) {
    let count = frame_graph.config().back_buffer_count;
    frame_graph
        .declare_resource(name, kind, 1, ResourceOrigin::Internal)
        .expect("declare");
    frame_graph
        .update_resource(name, per_slot_handles(count, base))
        .expect("update");
}

/// Declare the swapchain image and back it with handles from `base`.
pub fn back_buffer(frame_graph: &mut FrameGraph<DummyDevice>, name: &str, base: u64) {
    let count = frame_graph.config().back_buffer_count;
    frame_graph
        .declare_resource(
            name,
            ResourceKind::Texture,
            1,
            ResourceOrigin::External {
                back_buffer_bound: true,
            },
        )
        .expect("declare");
    frame_graph
        .update_resource(name, per_slot_handles(count, base))
        .expect("update");
}

/// Full-screen graphics stage.
pub fn fullscreen(name: &str) -> RenderStageDescriptor {
    RenderStageDescriptor::graphics(name, DrawType::FullScreenTriangle, EXTENT)
}

/// Compute stage on the async compute queue.
pub fn async_compute(name: &str) -> RenderStageDescriptor {
    RenderStageDescriptor::compute(name, [16, 16, 1])
}

/// Scenario with a compute producer and a graphics consumer of buffer `B`.
pub fn compute_then_draw(frame_graph: &mut FrameGraph<DummyDevice>) {
    internal_resource(frame_graph, "B", ResourceKind::Buffer, 100);
    frame_graph
        .add_stage(async_compute("Compute").uses("B", BindingType::UnorderedAccessWrite))
        .expect("add Compute");
    frame_graph
        .add_stage(fullscreen("Draw").uses("B", BindingType::ConstantBuffer))
        .expect("add Draw");
    frame_graph.link("Compute", "Draw", "B").expect("link");
}

/// Render frames `frames`, rotating through back buffers.
pub fn render_frames(frame_graph: &mut FrameGraph<DummyDevice>, frames: std::ops::Range<u64>) {
    let count = frame_graph.config().back_buffer_count as u64;
    for frame in frames {
        frame_graph
            .render(frame, (frame % count) as usize)
            .unwrap_or_else(|e| panic!("frame {frame} failed: {e}"));
    }
}

/// Submissions made to `queue`, in order.
pub fn submissions_on(device: &DummyDevice, queue: QueueKind) -> Vec<Submission> {
    device
        .submissions()
        .into_iter()
        .filter(|s| s.queue == queue)
        .collect()
}
