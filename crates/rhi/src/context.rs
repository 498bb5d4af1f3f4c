//! The device-side contract consumed by the presentation core.
//!
//! [`DeviceContext`] is the seam between the swapchain/frame lifecycle code and
//! the Vulkan device. Everything the presentation core needs from the device
//! (surface queries, object creation and destruction, queue submission and
//! presentation, command recording) goes through this trait, so the core can
//! be driven by [`Device`](crate::device::Device) in the application and by a
//! recording fake in tests.
//!
//! Handles are plain `ash::vk` handles. Ownership of every handle returned by a
//! `create_*` method passes to the caller, which must hand it back to the
//! matching `destroy_*` method exactly once.

use std::fmt;

use ash::vk;
use tracing::debug;

use crate::error::RhiResult;
use crate::physical_device::QueueFamilyIndices;

/// Surface support details for the device/surface pair.
///
/// Contains information about what the surface supports for swapchain creation.
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    /// Surface capabilities (min/max image count, extents, transforms, etc.)
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats (format and color space combinations)
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes (FIFO, MAILBOX, IMMEDIATE, etc.)
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    /// Queries surface support for a physical device and surface.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the queries fail.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };

        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };

        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        debug!(
            "Surface support: {} formats, {} present modes, image count: {}-{}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            if capabilities.max_image_count == 0 {
                "unbounded".to_string()
            } else {
                capabilities.max_image_count.to_string()
            }
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// Returns true if at least one format and one present mode are available.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Parameters for creating a swapchain.
///
/// Sharing mode, composite alpha and clipping are device policy and are not
/// part of the description.
#[derive(Debug, Clone, Copy)]
pub struct SwapchainDesc {
    /// Number of images requested from the presentation engine.
    pub min_image_count: u32,
    /// Color format and color space of the images.
    pub surface_format: vk::SurfaceFormatKHR,
    /// Image extent.
    pub extent: vk::Extent2D,
    /// Presentation mode.
    pub present_mode: vk::PresentModeKHR,
    /// Transform applied on presentation.
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    /// Swapchain being replaced, or null.
    pub old_swapchain: vk::SwapchainKHR,
}

/// A single-subpass render pass with one color and one depth attachment.
///
/// Attachment 0 is the color attachment and attachment 1 the depth attachment.
/// The device wires both into subpass 0 together with `dependency`.
#[derive(Debug, Clone, Copy)]
pub struct RenderPassDesc {
    /// Color attachment (attachment 0).
    pub color: vk::AttachmentDescription,
    /// Depth attachment (attachment 1).
    pub depth: vk::AttachmentDescription,
    /// Dependency from `VK_SUBPASS_EXTERNAL` into subpass 0.
    pub dependency: vk::SubpassDependency,
}

/// One graphics-queue submission gated on a single wait semaphore.
#[derive(Debug, Clone, Copy)]
pub struct FrameSubmission<'a> {
    /// Command buffers to execute.
    pub command_buffers: &'a [vk::CommandBuffer],
    /// Semaphore waited on before `wait_stage`.
    pub wait_semaphore: vk::Semaphore,
    /// Pipeline stage that waits on `wait_semaphore`.
    pub wait_stage: vk::PipelineStageFlags,
    /// Semaphore signaled once the command buffers complete.
    pub signal_semaphore: vk::Semaphore,
}

/// Arguments for beginning a render pass instance.
#[derive(Clone, Copy)]
pub struct RenderPassBegin<'a> {
    /// Render pass to begin.
    pub render_pass: vk::RenderPass,
    /// Framebuffer bound to the render pass.
    pub framebuffer: vk::Framebuffer,
    /// Render area, anchored at the origin.
    pub extent: vk::Extent2D,
    /// One clear value per attachment.
    pub clear_values: &'a [vk::ClearValue],
}

// `vk::ClearValue` is a union without a `Debug` impl.
impl fmt::Debug for RenderPassBegin<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderPassBegin")
            .field("render_pass", &self.render_pass)
            .field("framebuffer", &self.framebuffer)
            .field("extent", &self.extent)
            .field("clear_values", &self.clear_values.len())
            .finish()
    }
}

/// Device operations required by the presentation core.
///
/// Methods returning [`RhiResult`] report driver failures as errors. The two
/// presentation entry points, [`acquire_next_image`](Self::acquire_next_image)
/// and [`queue_present`](Self::queue_present), return the raw `vk::Result` so
/// the caller can classify suboptimal and out-of-date statuses itself.
pub trait DeviceContext {
    /// Queries capabilities, formats and present modes of the window surface.
    fn surface_support(&self) -> RhiResult<SurfaceSupport>;

    /// Returns the graphics and present queue families of the device.
    fn queue_families(&self) -> QueueFamilyIndices;

    /// Returns the first candidate usable as an optimal-tiling depth attachment.
    fn find_supported_depth_format(&self, candidates: &[vk::Format]) -> RhiResult<vk::Format>;

    /// Blocks until all queues on the device are idle.
    fn wait_idle(&self) -> RhiResult<()>;

    /// Creates a swapchain for the window surface.
    fn create_swapchain(&self, desc: &SwapchainDesc) -> RhiResult<vk::SwapchainKHR>;

    /// Returns the images owned by `swapchain`.
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RhiResult<Vec<vk::Image>>;

    /// Destroys a swapchain.
    ///
    /// # Safety
    ///
    /// No pending GPU work may reference the swapchain or its images.
    unsafe fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);

    /// Acquires the next presentable image, signaling `semaphore` when it is ready.
    ///
    /// Returns `(image_index, suboptimal)`.
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout: u64,
        semaphore: vk::Semaphore,
    ) -> Result<(u32, bool), vk::Result>;

    /// Queues `image_index` for presentation once `wait_semaphore` is signaled.
    ///
    /// Returns `true` if the swapchain is suboptimal.
    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<bool, vk::Result>;

    /// Creates a 2D view over a single-mip, single-layer image.
    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> RhiResult<vk::ImageView>;

    /// Destroys an image view.
    ///
    /// # Safety
    ///
    /// No pending GPU work or live framebuffer may reference the view.
    unsafe fn destroy_image_view(&self, view: vk::ImageView);

    /// Creates a device-local depth image with its backing memory bound.
    fn create_depth_image(&self, extent: vk::Extent2D, format: vk::Format)
    -> RhiResult<vk::Image>;

    /// Destroys a depth image and releases its backing memory.
    ///
    /// # Safety
    ///
    /// The image must come from [`create_depth_image`](Self::create_depth_image)
    /// and no pending GPU work may reference it.
    unsafe fn destroy_depth_image(&self, image: vk::Image);

    /// Creates the render pass described by `desc`.
    fn create_render_pass(&self, desc: &RenderPassDesc) -> RhiResult<vk::RenderPass>;

    /// Destroys a render pass.
    ///
    /// # Safety
    ///
    /// No pending GPU work may reference the render pass.
    unsafe fn destroy_render_pass(&self, render_pass: vk::RenderPass);

    /// Creates a single-layer framebuffer binding `attachments` to `render_pass`.
    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> RhiResult<vk::Framebuffer>;

    /// Destroys a framebuffer.
    ///
    /// # Safety
    ///
    /// No pending GPU work may reference the framebuffer.
    unsafe fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    /// Creates a binary semaphore.
    fn create_semaphore(&self) -> RhiResult<vk::Semaphore>;

    /// Destroys a semaphore.
    ///
    /// # Safety
    ///
    /// No pending queue operation may wait on or signal the semaphore.
    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    /// Creates a fence, optionally in the signaled state.
    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence>;

    /// Destroys a fence.
    ///
    /// # Safety
    ///
    /// No pending queue submission may signal the fence.
    unsafe fn destroy_fence(&self, fence: vk::Fence);

    /// Blocks until `fence` is signaled or `timeout` nanoseconds elapse.
    fn wait_for_fence(&self, fence: vk::Fence, timeout: u64) -> RhiResult<()>;

    /// Returns `fence` to the unsignaled state.
    fn reset_fence(&self, fence: vk::Fence) -> RhiResult<()>;

    /// Submits work to the graphics queue, signaling `fence` on completion.
    ///
    /// # Safety
    ///
    /// The command buffers must be fully recorded, `fence` must be unsignaled
    /// and not referenced by another pending submission.
    unsafe fn queue_submit(
        &self,
        submission: &FrameSubmission<'_>,
        fence: vk::Fence,
    ) -> RhiResult<()>;

    /// Allocates `count` primary command buffers from the device command pool.
    fn allocate_command_buffers(&self, count: u32) -> RhiResult<Vec<vk::CommandBuffer>>;

    /// Returns command buffers to the device command pool.
    ///
    /// # Safety
    ///
    /// None of the command buffers may be pending execution.
    unsafe fn free_command_buffers(&self, command_buffers: &[vk::CommandBuffer]);

    /// Begins recording, implicitly resetting the command buffer.
    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()>;

    /// Ends recording.
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()>;

    /// Records the start of a render pass instance with inline subpass contents.
    fn cmd_begin_render_pass(&self, command_buffer: vk::CommandBuffer, begin: &RenderPassBegin<'_>);

    /// Records the end of the current render pass instance.
    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer);

    /// Records a full-extent viewport (depth 0..1) and scissor.
    fn cmd_set_viewport_and_scissor(&self, command_buffer: vk::CommandBuffer, extent: vk::Extent2D);
}
