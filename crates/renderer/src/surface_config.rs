//! Swapchain configuration selection.
//!
//! Each choice is made from an explicit priority list over what the surface
//! reports, and the outcome records which rule produced it.

use ash::vk;
use renderer_rhi::{RhiError, SurfaceSupport};
use tracing::{debug, warn};

use crate::error::{ConstructionContext, RenderResult};

/// The color format the engine asks for first.
pub const PREFERRED_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// How the color format was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceFormatChoice {
    /// [`PREFERRED_SURFACE_FORMAT`] is supported.
    Preferred(vk::SurfaceFormatKHR),
    /// The first format the surface reported.
    FirstAvailable(vk::SurfaceFormatKHR),
}

impl SurfaceFormatChoice {
    /// Picks a format from the surface's list. Returns `None` if the list is empty.
    pub fn choose(formats: &[vk::SurfaceFormatKHR]) -> Option<Self> {
        if formats.contains(&PREFERRED_SURFACE_FORMAT) {
            return Some(Self::Preferred(PREFERRED_SURFACE_FORMAT));
        }
        formats.first().copied().map(Self::FirstAvailable)
    }

    /// The selected format and color space.
    #[inline]
    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        match *self {
            Self::Preferred(format) | Self::FirstAvailable(format) => format,
        }
    }
}

/// Presentation modes the engine knows how to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentModeChoice {
    /// Low-latency triple buffering without tearing.
    Mailbox,
    /// Vsync'd queue; every implementation supports it.
    Fifo,
}

impl PresentModeChoice {
    /// Preference order, best first.
    pub const PRIORITY: [Self; 2] = [Self::Mailbox, Self::Fifo];

    /// Returns the first mode in [`PRIORITY`](Self::PRIORITY) the surface supports.
    ///
    /// Falls back to FIFO, which is always available.
    pub fn choose(available: &[vk::PresentModeKHR]) -> Self {
        Self::PRIORITY
            .into_iter()
            .find(|choice| available.contains(&choice.present_mode()))
            .unwrap_or(Self::Fifo)
    }

    /// The Vulkan present mode for this choice.
    #[inline]
    pub fn present_mode(self) -> vk::PresentModeKHR {
        match self {
            Self::Mailbox => vk::PresentModeKHR::MAILBOX,
            Self::Fifo => vk::PresentModeKHR::FIFO,
        }
    }
}

/// Picks the swapchain extent.
///
/// Uses the surface's current extent unless it is the `u32::MAX` sentinel, in
/// which case `requested` is clamped into the surface's bounds.
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, requested: vk::Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: requested.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: requested.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more image than the minimum, capped by the maximum (0 means unbounded).
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

/// Everything selected from the surface before a swapchain is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceConfig {
    pub surface_format: SurfaceFormatChoice,
    pub present_mode: PresentModeChoice,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl SurfaceConfig {
    /// Selects a configuration for `support`, targeting `requested` when the
    /// surface leaves the extent to the application.
    ///
    /// # Errors
    ///
    /// Fails if the surface reports no formats.
    pub fn select(support: &SurfaceSupport, requested: vk::Extent2D) -> RenderResult<Self> {
        let surface_format = SurfaceFormatChoice::choose(&support.formats)
            .ok_or_else(|| RhiError::SwapchainError("surface reports no formats".into()))
            .creating("surface configuration")?;

        if let SurfaceFormatChoice::FirstAvailable(format) = surface_format {
            warn!(
                "Preferred surface format unavailable, using {:?} / {:?}",
                format.format, format.color_space
            );
        }

        let present_mode = PresentModeChoice::choose(&support.present_modes);
        let capabilities = &support.capabilities;
        let extent = choose_extent(capabilities, requested);
        let image_count = choose_image_count(capabilities);

        debug!(
            "Surface config: {:?}, {:?}, {}x{}, {} images (min {}, max {})",
            surface_format.surface_format().format,
            present_mode,
            extent.width,
            extent.height,
            image_count,
            capabilities.min_image_count,
            capabilities.max_image_count
        );

        Ok(Self {
            surface_format,
            present_mode,
            extent,
            image_count,
            pre_transform: capabilities.current_transform,
        })
    }
}
