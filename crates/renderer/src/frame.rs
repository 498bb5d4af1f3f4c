//! Per-frame types shared by the presentation engine and the orchestrator.

use std::sync::Arc;

use ash::vk;
use renderer_rhi::DeviceContext;

use crate::error::{ConstructionContext, RenderResult};
use crate::sync::{Fence, Semaphore};

/// Synchronization objects for one of the `MAX_FRAMES_IN_FLIGHT` frame slots.
///
/// Slots are independent of the presentable images and are reused cyclically.
pub struct FrameSlot<D: DeviceContext> {
    /// Signaled when the acquired image is ready to be rendered to.
    pub image_available: Semaphore<D>,
    /// Signaled when the slot's submission finishes; presentation waits on it.
    pub render_finished: Semaphore<D>,
    /// Signaled when the slot's submission completes on the GPU. Created signaled.
    pub in_flight: Fence<D>,
}

impl<D: DeviceContext> FrameSlot<D> {
    /// Creates both semaphores and the signaled in-flight fence.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Construction`](crate::RenderError::Construction)
    /// naming the object that failed; objects created before it are released.
    pub fn new(device: &Arc<D>) -> RenderResult<Self> {
        Ok(Self {
            image_available: Semaphore::new(Arc::clone(device))
                .creating("image-available semaphore")?,
            render_finished: Semaphore::new(Arc::clone(device))
                .creating("render-finished semaphore")?,
            in_flight: Fence::new(Arc::clone(device), true).creating("in-flight fence")?,
        })
    }
}

/// State of the begin/end frame protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FrameState {
    #[default]
    Idle,
    FrameInProgress {
        image_index: u32,
        command_buffer: vk::CommandBuffer,
        render_pass_open: bool,
    },
}

impl FrameState {
    #[inline]
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::FrameInProgress { .. })
    }
}

/// Handed to recording code for the duration of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameContext {
    /// Primary command buffer bound to the acquired image, already recording.
    pub command_buffer: vk::CommandBuffer,
    /// Frame index in `0..MAX_FRAMES_IN_FLIGHT`, for per-frame resource arrays.
    pub frame_index: usize,
    /// Index of the acquired presentable image.
    pub image_index: u32,
}
