//! The window-side contract consumed by the presentation core.

use ash::vk;
use renderer_rhi::{Instance, RhiResult, Surface};

/// A window that can be presented to.
///
/// Events are delivered only while the owner pumps them through
/// [`poll_events`](Self::poll_events) or [`wait_events`](Self::wait_events);
/// size, resize and close state reflect the last pump.
pub trait SurfaceProvider {
    /// Current drawable size in pixels. Zero in either dimension while minimized.
    fn drawable_extent(&self) -> vk::Extent2D;

    /// Processes pending events without blocking.
    fn poll_events(&mut self);

    /// Blocks until at least one event arrives, then processes pending events.
    fn wait_events(&mut self);

    /// Returns true if the drawable was resized since the flag was last cleared.
    fn was_resized(&self) -> bool;

    /// Clears the resize flag.
    fn clear_resized_flag(&mut self);

    /// Returns true once the user asked the window to close.
    fn should_close(&self) -> bool;

    /// Creates a Vulkan surface for this window.
    ///
    /// # Errors
    ///
    /// Returns an error if the window handles are unavailable or surface
    /// creation fails.
    fn create_surface(&self, instance: &Instance) -> RhiResult<Surface>;

    /// Returns true if the drawable has no area.
    fn is_minimized(&self) -> bool {
        let extent = self.drawable_extent();
        extent.width == 0 || extent.height == 0
    }
}
