//! The presentation engine.
//!
//! A [`PresentationEngine`] is one generation of the presentable image chain:
//! the swapchain and its color views, one depth image per presentable image,
//! the render pass, one framebuffer per image, and the frame-slot
//! synchronization objects. A generation is never resized in place; the
//! orchestrator builds a new one from the old one and drops the old one.
//!
//! # Frame synchronization
//!
//! ```text
//! acquire:  wait slot.in_flight ─► acquire image (signals slot.image_available)
//! submit:   wait image marker ─► marker = slot.in_flight ─► reset slot.in_flight
//!           ─► submit (waits image_available, signals render_finished + in_flight)
//!           ─► present (waits render_finished) ─► slot = (slot + 1) % MAX_FRAMES_IN_FLIGHT
//! ```

use std::fmt;
use std::sync::Arc;

use ash::vk;
use renderer_rhi::{DeviceContext, FrameSubmission, RenderPassDesc, RhiError, SwapchainDesc};
use tracing::{debug, info, trace};

use crate::MAX_FRAMES_IN_FLIGHT;
use crate::error::{ConstructionContext, RenderError, RenderResult, SurfaceStatus};
use crate::frame::FrameSlot;
use crate::surface_config::{PresentModeChoice, SurfaceConfig, SurfaceFormatChoice};

/// Depth formats tried in order.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Color and depth formats of a generation's attachments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentFormats {
    pub color: vk::Format,
    pub depth: vk::Format,
}

impl fmt::Display for AttachmentFormats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "color {:?} / depth {:?}", self.color, self.depth)
    }
}

/// Describes the single-subpass render pass every generation uses.
///
/// Color is cleared, stored and left presentable; depth is cleared and
/// discarded. The external dependency makes this frame's color and depth
/// writes wait for the previous use of the attachments.
pub fn render_pass_desc(color_format: vk::Format, depth_format: vk::Format) -> RenderPassDesc {
    let color = vk::AttachmentDescription::default()
        .format(color_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);

    let depth = vk::AttachmentDescription::default()
        .format(depth_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::DONT_CARE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

    let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
    let dependency = vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(stages)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(stages)
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        );

    RenderPassDesc {
        color,
        depth,
        dependency,
    }
}

/// One generation of the swapchain and everything sized or formatted after it.
pub struct PresentationEngine<D: DeviceContext> {
    device: Arc<D>,
    swapchain: vk::SwapchainKHR,
    surface_format: SurfaceFormatChoice,
    present_mode: PresentModeChoice,
    extent: vk::Extent2D,
    depth_format: vk::Format,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    depth_images: Vec<vk::Image>,
    depth_image_views: Vec<vk::ImageView>,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    frame_slots: Vec<FrameSlot<D>>,
    /// Fence of the slot that last submitted against each image.
    images_in_flight: Vec<Option<vk::Fence>>,
    current_slot: usize,
}

impl<D: DeviceContext> PresentationEngine<D> {
    /// Builds a generation for `extent`.
    ///
    /// When `previous` is given its swapchain is handed to the driver as the
    /// old swapchain; the caller drops `previous` afterwards.
    ///
    /// # Errors
    ///
    /// Any creation failure is returned as [`RenderError::Construction`]; the
    /// objects created before the failure are destroyed.
    pub fn new(
        device: Arc<D>,
        extent: vk::Extent2D,
        previous: Option<&PresentationEngine<D>>,
    ) -> RenderResult<Self> {
        let support = device.surface_support().creating("surface support query")?;
        let config = SurfaceConfig::select(&support, extent)?;
        let depth_format = device
            .find_supported_depth_format(&DEPTH_FORMAT_CANDIDATES)
            .creating("depth format")?;

        let mut engine = Self {
            device,
            swapchain: vk::SwapchainKHR::null(),
            surface_format: config.surface_format,
            present_mode: config.present_mode,
            extent: config.extent,
            depth_format,
            images: Vec::new(),
            image_views: Vec::new(),
            depth_images: Vec::new(),
            depth_image_views: Vec::new(),
            render_pass: vk::RenderPass::null(),
            framebuffers: Vec::new(),
            frame_slots: Vec::with_capacity(MAX_FRAMES_IN_FLIGHT),
            images_in_flight: Vec::new(),
            current_slot: 0,
        };

        let old_swapchain = previous.map_or(vk::SwapchainKHR::null(), |p| p.swapchain);
        engine.create_swapchain(&config, old_swapchain)?;
        engine.create_image_views()?;
        engine.create_depth_resources()?;
        engine.create_render_pass()?;
        engine.create_framebuffers()?;
        engine.create_sync_objects()?;

        info!(
            "Presentation engine created: {} images, {}x{}, {:?}, {:?}, depth {:?}",
            engine.images.len(),
            engine.extent.width,
            engine.extent.height,
            engine.color_format(),
            engine.present_mode,
            engine.depth_format
        );

        Ok(engine)
    }

    fn create_swapchain(
        &mut self,
        config: &SurfaceConfig,
        old_swapchain: vk::SwapchainKHR,
    ) -> RenderResult<()> {
        let desc = SwapchainDesc {
            min_image_count: config.image_count,
            surface_format: config.surface_format.surface_format(),
            extent: config.extent,
            present_mode: config.present_mode.present_mode(),
            pre_transform: config.pre_transform,
            old_swapchain,
        };

        self.swapchain = self.device.create_swapchain(&desc).creating("swapchain")?;
        self.images = self
            .device
            .swapchain_images(self.swapchain)
            .creating("swapchain images")?;
        self.images_in_flight = vec![None; self.images.len()];

        debug!("Swapchain created with {} images", self.images.len());
        Ok(())
    }

    fn create_image_views(&mut self) -> RenderResult<()> {
        let format = self.color_format();
        self.image_views.reserve(self.images.len());

        for &image in &self.images {
            let view = self
                .device
                .create_image_view(image, format, vk::ImageAspectFlags::COLOR)
                .creating("swapchain image view")?;
            self.image_views.push(view);
        }
        Ok(())
    }

    fn create_depth_resources(&mut self) -> RenderResult<()> {
        self.depth_images.reserve(self.images.len());
        self.depth_image_views.reserve(self.images.len());

        for _ in 0..self.images.len() {
            let image = self
                .device
                .create_depth_image(self.extent, self.depth_format)
                .creating("depth image")?;
            self.depth_images.push(image);

            let view = self
                .device
                .create_image_view(image, self.depth_format, vk::ImageAspectFlags::DEPTH)
                .creating("depth image view")?;
            self.depth_image_views.push(view);
        }
        Ok(())
    }

    fn create_render_pass(&mut self) -> RenderResult<()> {
        let desc = render_pass_desc(self.color_format(), self.depth_format);
        self.render_pass = self
            .device
            .create_render_pass(&desc)
            .creating("render pass")?;
        Ok(())
    }

    fn create_framebuffers(&mut self) -> RenderResult<()> {
        self.framebuffers.reserve(self.images.len());

        for (&color, &depth) in self.image_views.iter().zip(&self.depth_image_views) {
            let framebuffer = self
                .device
                .create_framebuffer(self.render_pass, &[color, depth], self.extent)
                .creating("framebuffer")?;
            self.framebuffers.push(framebuffer);
        }
        Ok(())
    }

    fn create_sync_objects(&mut self) -> RenderResult<()> {
        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            self.frame_slots.push(FrameSlot::new(&self.device)?);
        }
        Ok(())
    }

    /// Waits for the current slot's fence, then acquires the next image.
    ///
    /// # Errors
    ///
    /// [`RenderError::SurfaceOutOfDate`] when the swapchain must be recreated;
    /// [`RenderError::Device`] for any other failure.
    pub fn acquire_next_image(&mut self) -> RenderResult<(u32, SurfaceStatus)> {
        let slot = &self.frame_slots[self.current_slot];
        slot.in_flight.wait(u64::MAX)?;

        let (image_index, suboptimal) = self
            .device
            .acquire_next_image(self.swapchain, u64::MAX, slot.image_available.handle())
            .map_err(RenderError::from)?;
        self.check_image_index(image_index)?;

        trace!(
            "Acquired image {} on slot {} (suboptimal: {})",
            image_index, self.current_slot, suboptimal
        );
        Ok((image_index, SurfaceStatus::from_suboptimal(suboptimal)))
    }

    /// Blocks until no earlier submission still targets `image_index`.
    ///
    /// # Errors
    ///
    /// Fails if the index is out of range or the wait fails.
    pub fn wait_for_image(&self, image_index: u32) -> RenderResult<()> {
        self.check_image_index(image_index)?;
        if let Some(fence) = self.images_in_flight[image_index as usize] {
            self.device.wait_for_fence(fence, u64::MAX)?;
        }
        Ok(())
    }

    /// Submits `command_buffers` for `image_index` on the current slot and presents it.
    ///
    /// The slot advances even when presentation reports an out-of-date surface.
    ///
    /// # Errors
    ///
    /// [`RenderError::SurfaceOutOfDate`] when presentation found the surface
    /// stale; [`RenderError::Device`] for any other failure.
    pub fn submit_command_buffers(
        &mut self,
        command_buffers: &[vk::CommandBuffer],
        image_index: u32,
    ) -> RenderResult<SurfaceStatus> {
        self.wait_for_image(image_index)?;

        let slot = &self.frame_slots[self.current_slot];
        self.images_in_flight[image_index as usize] = Some(slot.in_flight.handle());
        slot.in_flight.reset()?;

        let submission = FrameSubmission {
            command_buffers,
            wait_semaphore: slot.image_available.handle(),
            wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            signal_semaphore: slot.render_finished.handle(),
        };
        // SAFETY: the buffers were fully recorded by the caller and the fence
        // was just reset after its previous submission completed.
        unsafe {
            self.device
                .queue_submit(&submission, slot.in_flight.handle())?
        };

        let presented = self.device.queue_present(
            self.swapchain,
            image_index,
            slot.render_finished.handle(),
        );
        self.current_slot = (self.current_slot + 1) % MAX_FRAMES_IN_FLIGHT;

        presented
            .map(SurfaceStatus::from_suboptimal)
            .map_err(RenderError::from)
    }

    /// Returns true if both generations use the same color and depth formats.
    pub fn compare_formats(&self, other: &Self) -> bool {
        self.formats() == other.formats()
    }

    fn check_image_index(&self, image_index: u32) -> RenderResult<()> {
        if (image_index as usize) < self.images.len() {
            Ok(())
        } else {
            Err(RhiError::SwapchainError(format!(
                "image index {} out of range for {} images",
                image_index,
                self.images.len()
            ))
            .into())
        }
    }

    /// Color and depth attachment formats.
    #[inline]
    pub fn formats(&self) -> AttachmentFormats {
        AttachmentFormats {
            color: self.color_format(),
            depth: self.depth_format,
        }
    }

    /// Raw swapchain handle.
    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    #[inline]
    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    #[inline]
    pub fn framebuffer(&self, index: usize) -> vk::Framebuffer {
        self.framebuffers[index]
    }

    #[inline]
    pub fn image_view(&self, index: usize) -> vk::ImageView {
        self.image_views[index]
    }

    #[inline]
    pub fn depth_image_view(&self, index: usize) -> vk::ImageView {
        self.depth_image_views[index]
    }

    /// Number of presentable images.
    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Number of depth images; always equal to [`image_count`](Self::image_count).
    #[inline]
    pub fn depth_image_count(&self) -> usize {
        self.depth_images.len()
    }

    /// Number of framebuffers; always equal to [`image_count`](Self::image_count).
    #[inline]
    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }

    #[inline]
    pub fn surface_format(&self) -> SurfaceFormatChoice {
        self.surface_format
    }

    #[inline]
    pub fn color_format(&self) -> vk::Format {
        self.surface_format.surface_format().format
    }

    #[inline]
    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn present_mode(&self) -> PresentModeChoice {
        self.present_mode
    }

    /// Width over height of the swapchain extent.
    #[inline]
    pub fn aspect_ratio(&self) -> f32 {
        self.extent.width as f32 / self.extent.height as f32
    }

    /// Slot the next acquire will use.
    #[inline]
    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    /// Fence of the slot that last submitted against `image_index`, if any.
    #[inline]
    pub fn image_in_flight(&self, image_index: usize) -> Option<vk::Fence> {
        self.images_in_flight.get(image_index).copied().flatten()
    }

    /// In-flight fence of `slot`.
    #[inline]
    pub fn slot_fence(&self, slot: usize) -> vk::Fence {
        self.frame_slots[slot].in_flight.handle()
    }
}

impl<D: DeviceContext> Drop for PresentationEngine<D> {
    fn drop(&mut self) {
        let device = self.device.as_ref();

        // SAFETY: the owner waits for the device to go idle before dropping a
        // generation; a null render pass or swapchain was never created.
        unsafe {
            for &framebuffer in &self.framebuffers {
                device.destroy_framebuffer(framebuffer);
            }
            if self.render_pass != vk::RenderPass::null() {
                device.destroy_render_pass(self.render_pass);
            }
            for &view in &self.depth_image_views {
                device.destroy_image_view(view);
            }
            for &image in &self.depth_images {
                device.destroy_depth_image(image);
            }
            for &view in &self.image_views {
                device.destroy_image_view(view);
            }
            if self.swapchain != vk::SwapchainKHR::null() {
                device.destroy_swapchain(self.swapchain);
            }
        }
        // Frame slots release their semaphores and fence when the fields drop.

        debug!("Presentation engine destroyed");
    }
}
