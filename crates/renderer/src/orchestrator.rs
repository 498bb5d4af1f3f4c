//! The frame orchestrator.
//!
//! [`FrameOrchestrator`] is the per-tick entry point for application code. It
//! owns the current [`PresentationEngine`] generation and one command buffer
//! per presentable image, runs the begin/end frame protocol, and rebuilds the
//! presentation engine when the surface goes stale or the window is resized.
//!
//! ```text
//! Idle ──begin_frame──► FrameInProgress ──end_frame──► Idle
//!   ▲                        │  begin_render_pass / end_render_pass
//!   └─ out of date: recreate, no frame this tick
//! ```

use std::sync::Arc;

use ash::vk;
use renderer_core::EngineConfig;
use renderer_platform::SurfaceProvider;
use renderer_rhi::{DeviceContext, RenderPassBegin, RhiError};
use tracing::{debug, error, info, trace};

use crate::MAX_FRAMES_IN_FLIGHT;
use crate::error::{ConstructionContext, ProtocolViolation, RenderError, RenderResult, SurfaceStatus};
use crate::frame::{FrameContext, FrameState};
use crate::presentation::PresentationEngine;

/// Drives frames on top of the current presentation engine generation.
pub struct FrameOrchestrator<D: DeviceContext, S: SurfaceProvider> {
    // Field order matters: the engine must drop before the device and surface.
    engine: PresentationEngine<D>,
    command_buffers: Vec<vk::CommandBuffer>,
    state: FrameState,
    frame_index: usize,
    clear_values: [vk::ClearValue; 2],
    device: Arc<D>,
    surface: S,
}

impl<D: DeviceContext, S: SurfaceProvider> FrameOrchestrator<D, S> {
    /// Builds the first generation for the surface's current drawable size.
    ///
    /// Blocks while the window is minimized.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Construction`] if any GPU object cannot be
    /// created, or if the window is closed before it ever has a drawable area.
    pub fn new(device: Arc<D>, mut surface: S, config: &EngineConfig) -> RenderResult<Self> {
        let extent = wait_for_drawable(&mut surface).ok_or_else(|| RenderError::Construction {
            what: "swapchain",
            source: RhiError::SurfaceError("window closed while minimized".into()),
        })?;
        let engine = PresentationEngine::new(Arc::clone(&device), extent, None)?;
        let command_buffers = device
            .allocate_command_buffers(engine.image_count() as u32)
            .creating("command buffers")?;

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: config.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: config.clear_depth,
                    stencil: 0,
                },
            },
        ];

        info!(
            "Frame orchestrator ready: {} command buffers, {} frames in flight",
            command_buffers.len(),
            MAX_FRAMES_IN_FLIGHT
        );

        Ok(Self {
            engine,
            command_buffers,
            state: FrameState::Idle,
            frame_index: 0,
            clear_values,
            device,
            surface,
        })
    }

    /// Starts a frame.
    ///
    /// Returns `Ok(None)` when the swapchain was out of date; it has been
    /// recreated and the caller should skip rendering this tick.
    ///
    /// # Errors
    ///
    /// Fails if a frame is already in progress, or on any unrecoverable
    /// device error.
    pub fn begin_frame(&mut self) -> RenderResult<Option<FrameContext>> {
        if self.state.is_in_progress() {
            return Err(ProtocolViolation::FrameAlreadyInProgress.into());
        }

        let image_index = match self.engine.acquire_next_image() {
            Ok((image_index, status)) => {
                if status == SurfaceStatus::Suboptimal {
                    trace!("Acquired image from suboptimal swapchain");
                }
                image_index
            }
            Err(RenderError::SurfaceOutOfDate) => {
                debug!("Swapchain out of date on acquire");
                self.recreate()?;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        // The command buffer is tied to the image, so its previous submission
        // must finish before it is re-recorded.
        self.engine.wait_for_image(image_index)?;
        let command_buffer = self.command_buffer_for(image_index)?;
        self.device.begin_command_buffer(command_buffer)?;

        self.state = FrameState::FrameInProgress {
            image_index,
            command_buffer,
            render_pass_open: false,
        };

        Ok(Some(FrameContext {
            command_buffer,
            frame_index: self.frame_index,
            image_index,
        }))
    }

    /// Finishes recording, submits, presents and advances the frame index.
    ///
    /// Recreates the swapchain when presentation reports it stale or the
    /// window was resized.
    ///
    /// # Errors
    ///
    /// Fails outside a frame, with a render pass still open, on format drift
    /// after recreation, or on any unrecoverable device error.
    pub fn end_frame(&mut self) -> RenderResult<()> {
        let FrameState::FrameInProgress {
            image_index,
            command_buffer,
            render_pass_open,
        } = self.state
        else {
            return Err(ProtocolViolation::NoFrameInProgress.into());
        };
        if render_pass_open {
            return Err(ProtocolViolation::RenderPassStillOpen.into());
        }

        self.device.end_command_buffer(command_buffer)?;
        self.state = FrameState::Idle;

        let stale = match self
            .engine
            .submit_command_buffers(&[command_buffer], image_index)
        {
            Ok(SurfaceStatus::Optimal) => false,
            Ok(SurfaceStatus::Suboptimal) | Err(RenderError::SurfaceOutOfDate) => true,
            Err(e) => return Err(e),
        };

        self.frame_index = (self.frame_index + 1) % MAX_FRAMES_IN_FLIGHT;

        let resized = self.surface.was_resized();
        if stale || resized {
            debug!(
                "Recreating swapchain after present (stale: {}, resized: {})",
                stale, resized
            );
            self.recreate()?;
        }

        Ok(())
    }

    /// Begins the render pass on the frame's framebuffer, clearing color and
    /// depth, and sets a full-extent viewport and scissor.
    ///
    /// # Errors
    ///
    /// Fails outside a frame, for a context from another frame, or when a
    /// render pass is already open.
    pub fn begin_render_pass(&mut self, ctx: &FrameContext) -> RenderResult<()> {
        let (image_index, command_buffer, open) = self.active_frame(ctx)?;
        if open {
            return Err(ProtocolViolation::RenderPassAlreadyOpen.into());
        }

        let extent = self.engine.extent();
        let begin = RenderPassBegin {
            render_pass: self.engine.render_pass(),
            framebuffer: self.engine.framebuffer(image_index as usize),
            extent,
            clear_values: &self.clear_values,
        };
        self.device.cmd_begin_render_pass(command_buffer, &begin);
        self.device.cmd_set_viewport_and_scissor(command_buffer, extent);

        self.set_render_pass_open(true);
        Ok(())
    }

    /// Ends the render pass opened by [`begin_render_pass`](Self::begin_render_pass).
    ///
    /// # Errors
    ///
    /// Fails outside a frame, for a context from another frame, or when no
    /// render pass is open.
    pub fn end_render_pass(&mut self, ctx: &FrameContext) -> RenderResult<()> {
        let (_, command_buffer, open) = self.active_frame(ctx)?;
        if !open {
            return Err(ProtocolViolation::NoRenderPassOpen.into());
        }

        self.device.cmd_end_render_pass(command_buffer);
        self.set_render_pass_open(false);
        Ok(())
    }

    /// Command buffer of the frame in progress.
    ///
    /// # Errors
    ///
    /// Fails when no frame is in progress.
    pub fn current_command_buffer(&self) -> RenderResult<vk::CommandBuffer> {
        match self.state {
            FrameState::FrameInProgress { command_buffer, .. } => Ok(command_buffer),
            FrameState::Idle => Err(ProtocolViolation::NoFrameInProgress.into()),
        }
    }

    /// Returns true between `begin_frame` and `end_frame`.
    #[inline]
    pub fn is_frame_in_progress(&self) -> bool {
        self.state.is_in_progress()
    }

    /// Index in `0..MAX_FRAMES_IN_FLIGHT` for per-frame application resources.
    #[inline]
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    #[inline]
    pub fn aspect_ratio(&self) -> f32 {
        self.engine.aspect_ratio()
    }

    /// Render pass that pipelines must be built against.
    #[inline]
    pub fn render_pass(&self) -> vk::RenderPass {
        self.engine.render_pass()
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.engine.extent()
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.engine.image_count()
    }

    #[inline]
    pub fn command_buffer_count(&self) -> usize {
        self.command_buffers.len()
    }

    /// Current presentation engine generation.
    #[inline]
    pub fn engine(&self) -> &PresentationEngine<D> {
        &self.engine
    }

    #[inline]
    pub fn surface(&self) -> &S {
        &self.surface
    }

    #[inline]
    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    /// Replaces the presentation engine with a generation sized to the drawable.
    ///
    /// Blocks on window events while the drawable has no area, then waits for
    /// the device to go idle before anything is destroyed.
    ///
    /// # Errors
    ///
    /// [`RenderError::FormatDrift`] if the new generation's formats differ;
    /// a protocol violation while a frame is in progress; construction and
    /// device errors otherwise.
    pub fn recreate(&mut self) -> RenderResult<()> {
        if self.state.is_in_progress() {
            return Err(ProtocolViolation::FrameAlreadyInProgress.into());
        }

        let Some(extent) = wait_for_drawable(&mut self.surface) else {
            debug!("Window closed while minimized, skipping recreation");
            return Ok(());
        };
        self.surface.clear_resized_flag();

        self.device.wait_idle()?;

        let next = PresentationEngine::new(Arc::clone(&self.device), extent, Some(&self.engine))?;
        let previous = std::mem::replace(&mut self.engine, next);
        let compatible = previous.compare_formats(&self.engine);
        let previous_formats = previous.formats();
        drop(previous);

        if self.command_buffers.len() != self.engine.image_count() {
            debug!(
                "Image count changed {} -> {}, reallocating command buffers",
                self.command_buffers.len(),
                self.engine.image_count()
            );
            // SAFETY: the device is idle, so none of the buffers are pending.
            unsafe { self.device.free_command_buffers(&self.command_buffers) };
            self.command_buffers.clear();
            self.command_buffers = self
                .device
                .allocate_command_buffers(self.engine.image_count() as u32)
                .creating("command buffers")?;
        }

        if !compatible {
            return Err(RenderError::FormatDrift {
                previous: previous_formats,
                current: self.engine.formats(),
            });
        }

        info!(
            "Swapchain recreated at {}x{}",
            self.engine.extent().width,
            self.engine.extent().height
        );
        Ok(())
    }

    fn command_buffer_for(&self, image_index: u32) -> RenderResult<vk::CommandBuffer> {
        self.command_buffers
            .get(image_index as usize)
            .copied()
            .ok_or_else(|| {
                RenderError::Device(RhiError::SwapchainError(format!(
                    "no command buffer for image {image_index}"
                )))
            })
    }

    fn active_frame(&self, ctx: &FrameContext) -> RenderResult<(u32, vk::CommandBuffer, bool)> {
        let FrameState::FrameInProgress {
            image_index,
            command_buffer,
            render_pass_open,
        } = self.state
        else {
            return Err(ProtocolViolation::NoFrameInProgress.into());
        };
        if ctx.command_buffer != command_buffer || ctx.image_index != image_index {
            return Err(ProtocolViolation::ForeignFrameContext.into());
        }
        Ok((image_index, command_buffer, render_pass_open))
    }

    fn set_render_pass_open(&mut self, open: bool) {
        if let FrameState::FrameInProgress {
            render_pass_open, ..
        } = &mut self.state
        {
            *render_pass_open = open;
        }
    }
}

/// Returns the drawable extent, blocking on window events while it has no area.
///
/// Returns `None` if the window is closed before the drawable regains an area.
fn wait_for_drawable<S: SurfaceProvider>(surface: &mut S) -> Option<vk::Extent2D> {
    if surface.is_minimized() {
        debug!("Drawable has no area, waiting for window events");
    }
    while surface.is_minimized() {
        if surface.should_close() {
            return None;
        }
        surface.wait_events();
    }
    Some(surface.drawable_extent())
}

impl<D: DeviceContext, S: SurfaceProvider> Drop for FrameOrchestrator<D, S> {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle during drop: {}", e);
        }
        // SAFETY: the device is idle.
        unsafe { self.device.free_command_buffers(&self.command_buffers) };
        debug!("Frame orchestrator destroyed");
    }
}
