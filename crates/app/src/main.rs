//! Vulkan Renderer - Main Entry Point
//!
//! Opens a window and clears it every frame through the frame orchestrator,
//! recreating the swapchain as the window is resized or minimized.

use anyhow::{Context, Result};
use tracing::{debug, info, trace};

use renderer_core::{EngineConfig, FrameTimer};
use renderer_platform::{SurfaceProvider, Window};
use renderer_renderer::FrameOrchestrator;
use renderer_rhi::{Device, Instance};

fn main() -> Result<()> {
    renderer_core::init_logging();
    info!("Starting Vulkan Renderer");

    let config = EngineConfig::from_env().context("invalid configuration")?;
    debug!("Configuration: {:?}", config);

    let window = Window::new(&config).context("failed to create window")?;
    let instance = Instance::new(c"Vulkan Renderer", window.raw_display_handle()?, config.validation)
        .context("failed to create Vulkan instance")?;
    let surface = window
        .create_surface(&instance)
        .context("failed to create surface")?;
    let device = Device::new(instance, surface).context("failed to create device")?;

    let mut orchestrator = FrameOrchestrator::new(device, window, &config)
        .context("failed to create frame orchestrator")?;
    info!("Initialization complete, entering main loop");

    let mut timer = FrameTimer::new();
    loop {
        orchestrator.surface_mut().poll_events();
        if orchestrator.surface().should_close() {
            info!("Close requested, shutting down");
            break;
        }

        let Some(frame) = orchestrator.begin_frame()? else {
            continue;
        };
        orchestrator.begin_render_pass(&frame)?;
        orchestrator.end_render_pass(&frame)?;
        orchestrator.end_frame()?;

        let (delta, fps) = timer.tick();
        trace!("Frame time {:?}", delta);
        if let Some(fps) = fps {
            debug!(
                "{:.1} fps, {} frames, aspect {:.3}",
                fps,
                timer.total_frames(),
                orchestrator.aspect_ratio()
            );
        }
    }

    info!(
        "Rendered {} frames in {:.1}s",
        timer.total_frames(),
        timer.elapsed().as_secs_f64()
    );
    Ok(())
}
