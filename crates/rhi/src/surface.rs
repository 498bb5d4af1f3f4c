//! Window surface ownership.
//!
//! A [`Surface`] is created from the raw display/window handles of whatever
//! window the platform layer owns, and destroys itself on drop. The instance
//! used to create it must outlive it; [`Device`](crate::device::Device) takes
//! ownership of both and drops the surface before the instance.

use std::ffi::{CStr, c_char};

use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use tracing::{debug, info};

use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;

/// RAII wrapper for a `vk::SurfaceKHR`.
pub struct Surface {
    handle: vk::SurfaceKHR,
    loader: ash::khr::surface::Instance,
}

impl Surface {
    /// Creates a surface for the given raw window.
    ///
    /// # Safety
    ///
    /// `display` and `window` must describe a live window that outlives the
    /// returned surface.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::SurfaceError`] if the platform surface cannot be created.
    pub unsafe fn new(
        instance: &Instance,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> RhiResult<Self> {
        let handle = unsafe {
            ash_window::create_surface(instance.entry(), instance.handle(), display, window, None)
        }
        .map_err(|e| RhiError::SurfaceError(format!("failed to create surface: {e}")))?;

        let loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());

        info!("Vulkan surface created");

        Ok(Self { handle, loader })
    }

    /// Returns the raw surface handle.
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Returns the `VK_KHR_surface` loader.
    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: the handle was created by ash_window against the loader's
        // instance and is destroyed exactly once, here.
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
        debug!("Vulkan surface destroyed");
    }
}

/// Returns the instance extensions needed to present to windows on `display`.
///
/// # Errors
///
/// Returns [`RhiError::SurfaceError`] if the display kind is not supported.
pub fn required_extensions(display: RawDisplayHandle) -> RhiResult<Vec<*const c_char>> {
    let extensions = ash_window::enumerate_required_extensions(display)
        .map_err(|e| RhiError::SurfaceError(format!("unsupported display: {e}")))?;

    debug!(
        "Surface extensions: {:?}",
        extensions
            .iter()
            // SAFETY: ash_window returns pointers to static, nul-terminated names.
            .map(|&ext| unsafe { CStr::from_ptr(ext) })
            .collect::<Vec<_>>()
    );

    Ok(extensions.to_vec())
}
