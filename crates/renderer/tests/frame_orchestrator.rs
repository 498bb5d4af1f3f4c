mod common;

use std::sync::Arc;

use ash::vk;
use renderer_core::EngineConfig;
use renderer_platform::SurfaceProvider;
use renderer_renderer::{
    FrameContext, FrameOrchestrator, MAX_FRAMES_IN_FLIGHT, ProtocolViolation, RenderError,
};

use common::{Call, FakeDevice, FakeSurface, extent, unorm_format};

type Orchestrator = FrameOrchestrator<FakeDevice, FakeSurface>;

fn orchestrator(device: &Arc<FakeDevice>) -> Orchestrator {
    FrameOrchestrator::new(
        Arc::clone(device),
        FakeSurface::new(800, 600),
        &EngineConfig::default(),
    )
    .unwrap()
}

/// Runs one frame that opens and closes the render pass.
fn run_frame(orchestrator: &mut Orchestrator) -> FrameContext {
    let ctx = orchestrator.begin_frame().unwrap().expect("frame should start");
    orchestrator.begin_render_pass(&ctx).unwrap();
    orchestrator.end_render_pass(&ctx).unwrap();
    orchestrator.end_frame().unwrap();
    ctx
}

fn swapchains_created(device: &FakeDevice) -> usize {
    device.count_calls(|c| matches!(c, Call::CreateSwapchain { .. }))
}

fn protocol_error<T: std::fmt::Debug>(result: Result<T, RenderError>) -> ProtocolViolation {
    match result {
        Err(RenderError::Protocol(violation)) => violation,
        other => panic!("expected a protocol violation, got {other:?}"),
    }
}

#[test]
fn test_construction_allocates_one_command_buffer_per_image() {
    let device = Arc::new(FakeDevice::with_image_counts(2, 3));
    let orchestrator = orchestrator(&device);

    assert_eq!(orchestrator.image_count(), 3);
    assert_eq!(orchestrator.command_buffer_count(), 3);
    assert_eq!(device.live_count("command buffer"), 3);
    assert_eq!(orchestrator.extent(), extent(800, 600));
    assert_eq!(orchestrator.frame_index(), 0);
    assert!(!orchestrator.is_frame_in_progress());
    assert_ne!(orchestrator.render_pass(), vk::RenderPass::null());
}

#[test]
fn test_successful_frame_advances_frame_index() {
    let device = Arc::new(FakeDevice::with_image_counts(2, 3));
    let mut orchestrator = orchestrator(&device);

    let ctx = run_frame(&mut orchestrator);

    assert_eq!(ctx.frame_index, 0);
    assert_eq!(orchestrator.frame_index(), 1);
    assert!(!orchestrator.is_frame_in_progress());
    assert_eq!(swapchains_created(&device), 1);
}

#[test]
fn test_frame_index_and_slots_cycle() {
    let device = Arc::new(FakeDevice::with_image_counts(2, 3));
    let mut orchestrator = orchestrator(&device);

    for frame in 0..6 {
        let ctx = orchestrator.begin_frame().unwrap().unwrap();
        let slot = orchestrator.engine().current_slot();
        assert_eq!(ctx.frame_index, frame % MAX_FRAMES_IN_FLIGHT);
        assert_eq!(slot, frame % MAX_FRAMES_IN_FLIGHT);

        orchestrator.end_frame().unwrap();

        let fence = orchestrator.engine().slot_fence(slot);
        assert_eq!(
            orchestrator.engine().image_in_flight(ctx.image_index as usize),
            Some(fence)
        );
        assert_eq!(orchestrator.frame_index(), (frame + 1) % MAX_FRAMES_IN_FLIGHT);
    }
}

#[test]
fn test_command_buffer_follows_image() {
    let device = Arc::new(FakeDevice::with_image_counts(2, 3));
    let mut orchestrator = orchestrator(&device);

    let contexts: Vec<FrameContext> = (0..4).map(|_| run_frame(&mut orchestrator)).collect();

    assert_eq!(contexts[0].image_index, contexts[3].image_index);
    assert_eq!(contexts[0].command_buffer, contexts[3].command_buffer);
    assert_ne!(contexts[0].command_buffer, contexts[1].command_buffer);
    assert_ne!(contexts[1].command_buffer, contexts[2].command_buffer);
}

#[test]
fn test_begin_frame_waits_for_image_before_recording() {
    let device = Arc::new(FakeDevice::with_image_counts(2, 3));
    let mut orchestrator = orchestrator(&device);
    let first = run_frame(&mut orchestrator);
    let marker = orchestrator
        .engine()
        .image_in_flight(first.image_index as usize)
        .unwrap();

    // The next frame runs on the other slot but lands on the same image.
    device
        .acquire_results
        .borrow_mut()
        .push_back(Ok((first.image_index, false)));
    device.clear_calls();
    let ctx = orchestrator.begin_frame().unwrap().unwrap();
    assert_ne!(orchestrator.engine().slot_fence(1), marker);

    let calls = device.calls();
    let waited = calls
        .iter()
        .position(|c| *c == Call::WaitForFence(marker))
        .unwrap();
    let began = calls
        .iter()
        .position(|c| *c == Call::BeginCommandBuffer(ctx.command_buffer))
        .unwrap();
    assert!(waited < began);
}

#[test]
fn test_begin_frame_twice_is_rejected() {
    let device = Arc::new(FakeDevice::with_image_counts(2, 3));
    let mut orchestrator = orchestrator(&device);
    orchestrator.begin_frame().unwrap().unwrap();

    assert_eq!(
        protocol_error(orchestrator.begin_frame()),
        ProtocolViolation::FrameAlreadyInProgress
    );
    assert!(orchestrator.is_frame_in_progress());
}

#[test]
fn test_calls_outside_a_frame_are_rejected() {
    let device = Arc::new(FakeDevice::with_image_counts(2, 3));
    let mut orchestrator = orchestrator(&device);
    let ctx = FrameContext {
        command_buffer: vk::CommandBuffer::null(),
        frame_index: 0,
        image_index: 0,
    };

    assert_eq!(
        protocol_error(orchestrator.end_frame()),
        ProtocolViolation::NoFrameInProgress
    );
    assert_eq!(
        protocol_error(orchestrator.begin_render_pass(&ctx)),
        ProtocolViolation::NoFrameInProgress
    );
    assert_eq!(
        protocol_error(orchestrator.end_render_pass(&ctx)),
        ProtocolViolation::NoFrameInProgress
    );
    assert_eq!(
        protocol_error(orchestrator.current_command_buffer()),
        ProtocolViolation::NoFrameInProgress
    );
    assert_eq!(orchestrator.frame_index(), 0);
}

#[test]
fn test_render_pass_nesting_is_enforced() {
    let device = Arc::new(FakeDevice::with_image_counts(2, 3));
    let mut orchestrator = orchestrator(&device);
    let ctx = orchestrator.begin_frame().unwrap().unwrap();

    assert_eq!(
        protocol_error(orchestrator.end_render_pass(&ctx)),
        ProtocolViolation::NoRenderPassOpen
    );

    orchestrator.begin_render_pass(&ctx).unwrap();
    assert_eq!(
        protocol_error(orchestrator.begin_render_pass(&ctx)),
        ProtocolViolation::RenderPassAlreadyOpen
    );
    assert_eq!(
        protocol_error(orchestrator.end_frame()),
        ProtocolViolation::RenderPassStillOpen
    );

    orchestrator.end_render_pass(&ctx).unwrap();
    orchestrator.end_frame().unwrap();
    assert_eq!(device.count_calls(|c| matches!(c, Call::BeginRenderPass { .. })), 1);
    assert_eq!(device.count_calls(|c| matches!(c, Call::EndRenderPass(_))), 1);
}

#[test]
fn test_foreign_context_is_rejected() {
    let device = Arc::new(FakeDevice::with_image_counts(2, 3));
    let mut orchestrator = orchestrator(&device);
    let stale = run_frame(&mut orchestrator);
    let current = orchestrator.begin_frame().unwrap().unwrap();
    assert_ne!(stale.image_index, current.image_index);

    assert_eq!(
        protocol_error(orchestrator.begin_render_pass(&stale)),
        ProtocolViolation::ForeignFrameContext
    );
    orchestrator.begin_render_pass(&current).unwrap();
}

#[test]
fn test_render_pass_clears_with_configured_values() {
    let device = Arc::new(FakeDevice::with_image_counts(2, 3));
    let mut orchestrator = orchestrator(&device);
    let config = EngineConfig::default();
    let ctx = orchestrator.begin_frame().unwrap().unwrap();
    device.clear_calls();

    orchestrator.begin_render_pass(&ctx).unwrap();

    let expected = Call::BeginRenderPass {
        command_buffer: ctx.command_buffer,
        render_pass: orchestrator.render_pass(),
        framebuffer: orchestrator.engine().framebuffer(ctx.image_index as usize),
        extent: extent(800, 600),
        clear_color: config.clear_color,
        clear_depth: config.clear_depth,
    };
    assert_eq!(
        device.calls(),
        vec![expected, Call::SetViewportAndScissor(extent(800, 600))]
    );
    assert_eq!(orchestrator.current_command_buffer().unwrap(), ctx.command_buffer);
}

#[test]
fn test_resize_recreates_with_old_swapchain() {
    let device = Arc::new(FakeDevice::with_image_counts(2, 3));
    let mut orchestrator = orchestrator(&device);
    let old = orchestrator.engine().handle();
    orchestrator.surface_mut().extent = extent(1024, 768);
    orchestrator.surface_mut().resized = true;
    device.clear_calls();

    run_frame(&mut orchestrator);

    let calls = device.calls();
    let idle = calls.iter().position(|c| *c == Call::WaitIdle).unwrap();
    let created = calls
        .iter()
        .position(|c| matches!(c, Call::CreateSwapchain { old_swapchain, .. } if *old_swapchain == old))
        .unwrap();
    assert!(idle < created);
    assert!(!orchestrator.surface().was_resized());
    assert_ne!(orchestrator.engine().handle(), old);
    assert_eq!(orchestrator.extent(), extent(1024, 768));
    assert_eq!(orchestrator.frame_index(), 1);
}

#[test]
fn test_out_of_date_acquire_skips_frame_and_recreates() {
    let device = Arc::new(FakeDevice::with_image_counts(2, 3));
    let mut orchestrator = orchestrator(&device);
    device
        .acquire_results
        .borrow_mut()
        .push_back(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));

    assert_eq!(orchestrator.begin_frame().unwrap(), None);

    assert!(!orchestrator.is_frame_in_progress());
    assert_eq!(swapchains_created(&device), 2);
    assert_eq!(orchestrator.frame_index(), 0);
    run_frame(&mut orchestrator);
}

#[test]
fn test_suboptimal_acquire_still_renders() {
    let device = Arc::new(FakeDevice::with_image_counts(2, 3));
    let mut orchestrator = orchestrator(&device);
    device.acquire_results.borrow_mut().push_back(Ok((1, true)));

    let ctx = orchestrator.begin_frame().unwrap().unwrap();

    assert_eq!(ctx.image_index, 1);
    assert_eq!(swapchains_created(&device), 1);
}

#[test]
fn test_stale_present_recreates_and_advances() {
    for result in [Ok(true), Err(vk::Result::ERROR_OUT_OF_DATE_KHR)] {
        let device = Arc::new(FakeDevice::with_image_counts(2, 3));
        let mut orchestrator = orchestrator(&device);
        device.present_results.borrow_mut().push_back(result);

        run_frame(&mut orchestrator);

        assert_eq!(swapchains_created(&device), 2, "present result {result:?}");
        assert_eq!(orchestrator.frame_index(), 1);
    }
}

#[test]
fn test_device_loss_is_fatal() {
    let device = Arc::new(FakeDevice::with_image_counts(2, 3));
    let mut orchestrator = orchestrator(&device);
    device
        .acquire_results
        .borrow_mut()
        .push_back(Err(vk::Result::ERROR_DEVICE_LOST));

    let err = orchestrator.begin_frame().unwrap_err();

    assert!(!err.is_recoverable());
    assert!(!orchestrator.is_frame_in_progress());
    assert_eq!(swapchains_created(&device), 1);
}

#[test]
fn test_minimized_window_blocks_until_restored() {
    let device = Arc::new(FakeDevice::with_image_counts(2, 3));
    let mut orchestrator = orchestrator(&device);
    {
        let surface = orchestrator.surface_mut();
        surface.extent = extent(0, 0);
        surface.resized = true;
        surface.pending_extents = [extent(0, 0), extent(1024, 768)].into();
    }

    run_frame(&mut orchestrator);

    assert_eq!(orchestrator.surface().wait_calls, 2);
    assert_eq!(swapchains_created(&device), 2);
    assert_eq!(orchestrator.extent(), extent(1024, 768));
    assert!(!orchestrator.surface().should_close());
}

#[test]
fn test_closing_while_minimized_skips_recreation() {
    let device = Arc::new(FakeDevice::with_image_counts(2, 3));
    let mut orchestrator = orchestrator(&device);
    orchestrator.surface_mut().extent = extent(0, 0);
    orchestrator.surface_mut().resized = true;

    run_frame(&mut orchestrator);

    assert!(orchestrator.surface().should_close());
    assert_eq!(orchestrator.surface().wait_calls, 1);
    assert_eq!(swapchains_created(&device), 1);
    assert_eq!(orchestrator.extent(), extent(800, 600));
}

#[test]
fn test_construction_waits_for_drawable() {
    let device = Arc::new(FakeDevice::with_image_counts(2, 3));
    let mut surface = FakeSurface::new(0, 0);
    surface.pending_extents.push_back(extent(640, 480));

    let orchestrator =
        FrameOrchestrator::new(Arc::clone(&device), surface, &EngineConfig::default()).unwrap();

    assert_eq!(orchestrator.surface().wait_calls, 1);
    assert_eq!(orchestrator.extent(), extent(640, 480));
}

#[test]
fn test_construction_fails_when_closed_while_minimized() {
    let device = Arc::new(FakeDevice::with_image_counts(2, 3));
    device.support.borrow_mut().capabilities.current_extent = extent(0, 0);
    let surface = FakeSurface::new(0, 0);

    let result = FrameOrchestrator::new(Arc::clone(&device), surface, &EngineConfig::default());

    match result {
        Err(RenderError::Construction { what, .. }) => assert_eq!(what, "swapchain"),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("construction should fail without a drawable area"),
    }
    assert_eq!(swapchains_created(&device), 0);
    assert_eq!(device.live_total(), 0);
}

#[test]
fn test_image_count_change_reallocates_command_buffers() {
    let device = Arc::new(FakeDevice::with_image_counts(1, 0));
    let mut orchestrator = orchestrator(&device);
    assert_eq!(orchestrator.command_buffer_count(), 2);

    device.support.borrow_mut().capabilities.min_image_count = 2;
    orchestrator.surface_mut().resized = true;
    device.clear_calls();
    run_frame(&mut orchestrator);

    let calls = device.calls();
    let freed = calls
        .iter()
        .position(|c| *c == Call::FreeCommandBuffers(2))
        .unwrap();
    let allocated = calls
        .iter()
        .position(|c| *c == Call::AllocateCommandBuffers(3))
        .unwrap();
    assert!(freed < allocated);
    assert_eq!(orchestrator.image_count(), 3);
    assert_eq!(orchestrator.command_buffer_count(), 3);
    assert_eq!(device.live_count("command buffer"), 3);
}

#[test]
fn test_same_image_count_keeps_command_buffers() {
    let device = Arc::new(FakeDevice::with_image_counts(2, 3));
    let mut orchestrator = orchestrator(&device);
    orchestrator.surface_mut().resized = true;
    device.clear_calls();

    run_frame(&mut orchestrator);

    assert_eq!(device.count_calls(|c| matches!(c, Call::FreeCommandBuffers(_))), 0);
    assert_eq!(device.count_calls(|c| matches!(c, Call::AllocateCommandBuffers(_))), 0);
}

#[test]
fn test_format_drift_is_reported() {
    let device = Arc::new(FakeDevice::with_image_counts(2, 3));
    let mut orchestrator = orchestrator(&device);
    device.support.borrow_mut().formats = vec![unorm_format()];
    orchestrator.surface_mut().resized = true;

    let ctx = orchestrator.begin_frame().unwrap().unwrap();
    orchestrator.begin_render_pass(&ctx).unwrap();
    orchestrator.end_render_pass(&ctx).unwrap();

    match orchestrator.end_frame() {
        Err(RenderError::FormatDrift { previous, current }) => {
            assert_eq!(previous.color, vk::Format::B8G8R8A8_SRGB);
            assert_eq!(current.color, vk::Format::R8G8B8A8_UNORM);
            assert_eq!(previous.depth, current.depth);
        }
        other => panic!("expected format drift, got {other:?}"),
    }
}

#[test]
fn test_recreate_during_frame_is_rejected() {
    let device = Arc::new(FakeDevice::with_image_counts(2, 3));
    let mut orchestrator = orchestrator(&device);
    orchestrator.begin_frame().unwrap().unwrap();

    assert_eq!(
        protocol_error(orchestrator.recreate()),
        ProtocolViolation::FrameAlreadyInProgress
    );
    assert_eq!(swapchains_created(&device), 1);
}

#[test]
fn test_drop_releases_everything() {
    let device = Arc::new(FakeDevice::with_image_counts(2, 3));
    let mut orchestrator = orchestrator(&device);
    orchestrator.surface_mut().resized = true;
    run_frame(&mut orchestrator);
    run_frame(&mut orchestrator);
    device.clear_calls();

    drop(orchestrator);

    assert_eq!(device.live_total(), 0);
    assert_eq!(device.calls()[0], Call::WaitIdle);
}
