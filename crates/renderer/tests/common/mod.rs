//! Recording test doubles for the device and the window.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};

use ash::vk::{self, Handle};
use renderer_platform::SurfaceProvider;
use renderer_rhi::{
    DeviceContext, FrameSubmission, Instance, QueueFamilyIndices, RenderPassBegin, RenderPassDesc,
    RhiError, RhiResult, Surface, SurfaceSupport, SwapchainDesc,
};

/// A device call observed by [`FakeDevice`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    WaitIdle,
    CreateSwapchain {
        swapchain: vk::SwapchainKHR,
        old_swapchain: vk::SwapchainKHR,
        image_count: u32,
        extent: vk::Extent2D,
    },
    WaitForFence(vk::Fence),
    ResetFence(vk::Fence),
    Acquire {
        semaphore: vk::Semaphore,
    },
    Submit {
        command_buffers: Vec<vk::CommandBuffer>,
        wait_semaphore: vk::Semaphore,
        signal_semaphore: vk::Semaphore,
        fence: vk::Fence,
    },
    Present {
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    },
    AllocateCommandBuffers(u32),
    FreeCommandBuffers(usize),
    BeginCommandBuffer(vk::CommandBuffer),
    EndCommandBuffer(vk::CommandBuffer),
    BeginRenderPass {
        command_buffer: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
        clear_depth: f32,
    },
    SetViewportAndScissor(vk::Extent2D),
    EndRenderPass(vk::CommandBuffer),
    Destroy(&'static str),
}

/// Device double that mints fake handles and records every call.
pub struct FakeDevice {
    pub support: RefCell<SurfaceSupport>,
    pub depth_formats: RefCell<Vec<vk::Format>>,
    /// Scripted acquire results; when empty, images are handed out round-robin.
    pub acquire_results: RefCell<VecDeque<Result<(u32, bool), vk::Result>>>,
    /// Scripted present results; when empty, presentation succeeds.
    pub present_results: RefCell<VecDeque<Result<bool, vk::Result>>>,
    /// Fail the n-th (zero-based) creation of the named object kind.
    pub fail_creation: RefCell<Option<(&'static str, usize)>>,
    pub calls: RefCell<Vec<Call>>,
    next_handle: Cell<u64>,
    next_image: Cell<u32>,
    created: RefCell<HashMap<&'static str, usize>>,
    live: RefCell<HashMap<u64, &'static str>>,
    swapchain_images: RefCell<HashMap<vk::SwapchainKHR, u32>>,
}

impl FakeDevice {
    pub fn new(support: SurfaceSupport) -> Self {
        Self {
            support: RefCell::new(support),
            depth_formats: RefCell::new(vec![vk::Format::D32_SFLOAT]),
            acquire_results: RefCell::new(VecDeque::new()),
            present_results: RefCell::new(VecDeque::new()),
            fail_creation: RefCell::new(None),
            calls: RefCell::new(Vec::new()),
            next_handle: Cell::new(0x1000),
            next_image: Cell::new(0),
            created: RefCell::new(HashMap::new()),
            live: RefCell::new(HashMap::new()),
            swapchain_images: RefCell::new(HashMap::new()),
        }
    }

    /// Surface with FIFO only, BGRA8 sRGB, images `min..=max`, and an
    /// application-defined extent between 1x1 and 4096x4096.
    pub fn with_image_counts(min: u32, max: u32) -> Self {
        Self::new(support(min, max, vec![srgb_format()]))
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    /// Number of live objects of the given kind.
    pub fn live_count(&self, kind: &str) -> usize {
        self.live.borrow().values().filter(|&&k| k == kind).count()
    }

    pub fn live_total(&self) -> usize {
        self.live.borrow().len()
    }

    pub fn count_calls(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.borrow().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }

    fn mint<H: Handle + Copy>(&self, kind: &'static str) -> RhiResult<H> {
        let nth = {
            let mut created = self.created.borrow_mut();
            let counter = created.entry(kind).or_insert(0);
            let nth = *counter;
            *counter += 1;
            nth
        };
        if *self.fail_creation.borrow() == Some((kind, nth)) {
            return Err(RhiError::VulkanError(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        }

        let raw = self.next_handle.get();
        self.next_handle.set(raw + 1);
        self.live.borrow_mut().insert(raw, kind);
        Ok(H::from_raw(raw))
    }

    fn release<H: Handle + Copy>(&self, kind: &'static str, handle: H) {
        let raw = handle.as_raw();
        let removed = self.live.borrow_mut().remove(&raw);
        assert_eq!(removed, Some(kind), "destroyed unknown {kind} {raw:#x}");
        self.record(Call::Destroy(kind));
    }
}

pub fn srgb_format() -> vk::SurfaceFormatKHR {
    vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_SRGB,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    }
}

pub fn unorm_format() -> vk::SurfaceFormatKHR {
    vk::SurfaceFormatKHR {
        format: vk::Format::R8G8B8A8_UNORM,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    }
}

pub fn support(min: u32, max: u32, formats: Vec<vk::SurfaceFormatKHR>) -> SurfaceSupport {
    SurfaceSupport {
        capabilities: vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        },
        formats,
        present_modes: vec![vk::PresentModeKHR::FIFO],
    }
}

pub fn extent(width: u32, height: u32) -> vk::Extent2D {
    vk::Extent2D { width, height }
}

impl DeviceContext for FakeDevice {
    fn surface_support(&self) -> RhiResult<SurfaceSupport> {
        Ok(self.support.borrow().clone())
    }

    fn queue_families(&self) -> QueueFamilyIndices {
        QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(0),
        }
    }

    fn find_supported_depth_format(&self, candidates: &[vk::Format]) -> RhiResult<vk::Format> {
        let supported = self.depth_formats.borrow();
        candidates
            .iter()
            .copied()
            .find(|f| supported.contains(f))
            .ok_or_else(|| RhiError::UnsupportedFormat(candidates.to_vec()))
    }

    fn wait_idle(&self) -> RhiResult<()> {
        self.record(Call::WaitIdle);
        Ok(())
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> RhiResult<vk::SwapchainKHR> {
        let swapchain: vk::SwapchainKHR = self.mint("swapchain")?;
        self.swapchain_images
            .borrow_mut()
            .insert(swapchain, desc.min_image_count);
        self.record(Call::CreateSwapchain {
            swapchain,
            old_swapchain: desc.old_swapchain,
            image_count: desc.min_image_count,
            extent: desc.extent,
        });
        Ok(swapchain)
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RhiResult<Vec<vk::Image>> {
        let count = self
            .swapchain_images
            .borrow()
            .get(&swapchain)
            .copied()
            .unwrap_or(0);
        // Presentable images belong to the swapchain, so they are not tracked as live.
        Ok((0..count)
            .map(|i| vk::Image::from_raw(swapchain.as_raw() << 8 | u64::from(i)))
            .collect())
    }

    unsafe fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        self.release("swapchain", swapchain);
    }

    fn acquire_next_image(
        &self,
        _swapchain: vk::SwapchainKHR,
        _timeout: u64,
        semaphore: vk::Semaphore,
    ) -> Result<(u32, bool), vk::Result> {
        self.record(Call::Acquire { semaphore });
        if let Some(result) = self.acquire_results.borrow_mut().pop_front() {
            return result;
        }
        let count = self.support.borrow().capabilities.min_image_count + 1;
        let count = match self.support.borrow().capabilities.max_image_count {
            0 => count,
            max => count.min(max),
        };
        let index = self.next_image.get() % count;
        self.next_image.set(index + 1);
        Ok((index, false))
    }

    fn queue_present(
        &self,
        _swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<bool, vk::Result> {
        self.record(Call::Present {
            image_index,
            wait_semaphore,
        });
        self.present_results
            .borrow_mut()
            .pop_front()
            .unwrap_or(Ok(false))
    }

    fn create_image_view(
        &self,
        _image: vk::Image,
        _format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> RhiResult<vk::ImageView> {
        if aspect == vk::ImageAspectFlags::DEPTH {
            self.mint("depth view")
        } else {
            self.mint("color view")
        }
    }

    unsafe fn destroy_image_view(&self, view: vk::ImageView) {
        let kind = self
            .live
            .borrow()
            .get(&view.as_raw())
            .copied()
            .unwrap_or("image view");
        self.release(kind, view);
    }

    fn create_depth_image(
        &self,
        _extent: vk::Extent2D,
        _format: vk::Format,
    ) -> RhiResult<vk::Image> {
        self.mint("depth image")
    }

    unsafe fn destroy_depth_image(&self, image: vk::Image) {
        self.release("depth image", image);
    }

    fn create_render_pass(&self, _desc: &RenderPassDesc) -> RhiResult<vk::RenderPass> {
        self.mint("render pass")
    }

    unsafe fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.release("render pass", render_pass);
    }

    fn create_framebuffer(
        &self,
        _render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        _extent: vk::Extent2D,
    ) -> RhiResult<vk::Framebuffer> {
        assert_eq!(attachments.len(), 2, "framebuffer needs color and depth");
        self.mint("framebuffer")
    }

    unsafe fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.release("framebuffer", framebuffer);
    }

    fn create_semaphore(&self) -> RhiResult<vk::Semaphore> {
        self.mint("semaphore")
    }

    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.release("semaphore", semaphore);
    }

    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence> {
        assert!(signaled, "frame fences start signaled");
        self.mint("fence")
    }

    unsafe fn destroy_fence(&self, fence: vk::Fence) {
        self.release("fence", fence);
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout: u64) -> RhiResult<()> {
        self.record(Call::WaitForFence(fence));
        Ok(())
    }

    fn reset_fence(&self, fence: vk::Fence) -> RhiResult<()> {
        self.record(Call::ResetFence(fence));
        Ok(())
    }

    unsafe fn queue_submit(
        &self,
        submission: &FrameSubmission<'_>,
        fence: vk::Fence,
    ) -> RhiResult<()> {
        assert_eq!(
            submission.wait_stage,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        );
        self.record(Call::Submit {
            command_buffers: submission.command_buffers.to_vec(),
            wait_semaphore: submission.wait_semaphore,
            signal_semaphore: submission.signal_semaphore,
            fence,
        });
        Ok(())
    }

    fn allocate_command_buffers(&self, count: u32) -> RhiResult<Vec<vk::CommandBuffer>> {
        self.record(Call::AllocateCommandBuffers(count));
        (0..count).map(|_| self.mint("command buffer")).collect()
    }

    unsafe fn free_command_buffers(&self, command_buffers: &[vk::CommandBuffer]) {
        for &cb in command_buffers {
            let removed = self.live.borrow_mut().remove(&cb.as_raw());
            assert_eq!(removed, Some("command buffer"));
        }
        self.record(Call::FreeCommandBuffers(command_buffers.len()));
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()> {
        self.record(Call::BeginCommandBuffer(command_buffer));
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()> {
        self.record(Call::EndCommandBuffer(command_buffer));
        Ok(())
    }

    fn cmd_begin_render_pass(&self, command_buffer: vk::CommandBuffer, begin: &RenderPassBegin<'_>) {
        assert_eq!(begin.clear_values.len(), 2);
        // SAFETY: the orchestrator writes `color` into slot 0 and `depth_stencil` into slot 1.
        let (clear_color, clear_depth) = unsafe {
            (
                begin.clear_values[0].color.float32,
                begin.clear_values[1].depth_stencil.depth,
            )
        };
        self.record(Call::BeginRenderPass {
            command_buffer,
            render_pass: begin.render_pass,
            framebuffer: begin.framebuffer,
            extent: begin.extent,
            clear_color,
            clear_depth,
        });
    }

    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        self.record(Call::EndRenderPass(command_buffer));
    }

    fn cmd_set_viewport_and_scissor(&self, _command_buffer: vk::CommandBuffer, extent: vk::Extent2D) {
        self.record(Call::SetViewportAndScissor(extent));
    }
}

/// Window double with a scripted sequence of drawable sizes.
pub struct FakeSurface {
    pub extent: vk::Extent2D,
    /// Extents adopted one per `wait_events` call.
    pub pending_extents: VecDeque<vk::Extent2D>,
    pub resized: bool,
    pub close_requested: bool,
    pub wait_calls: usize,
    pub poll_calls: usize,
}

impl FakeSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            extent: extent(width, height),
            pending_extents: VecDeque::new(),
            resized: false,
            close_requested: false,
            wait_calls: 0,
            poll_calls: 0,
        }
    }
}

impl SurfaceProvider for FakeSurface {
    fn drawable_extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn poll_events(&mut self) {
        self.poll_calls += 1;
    }

    fn wait_events(&mut self) {
        self.wait_calls += 1;
        match self.pending_extents.pop_front() {
            Some(next) => self.extent = next,
            None => self.close_requested = true,
        }
    }

    fn was_resized(&self) -> bool {
        self.resized
    }

    fn clear_resized_flag(&mut self) {
        self.resized = false;
    }

    fn should_close(&self) -> bool {
        self.close_requested
    }

    fn create_surface(&self, _instance: &Instance) -> RhiResult<Surface> {
        Err(RhiError::SurfaceError("fake surface has no window".into()))
    }
}
