//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! This crate provides the device side of the renderer using the `ash` crate:
//! - Instance creation with optional validation
//! - Physical device selection
//! - Surface ownership
//! - The [`DeviceContext`](context::DeviceContext) trait consumed by the
//!   presentation core, and its Vulkan implementation [`Device`](device::Device)

mod error;

pub mod context;
pub mod device;
pub mod instance;
pub mod physical_device;
pub mod surface;

pub use context::{
    DeviceContext, FrameSubmission, RenderPassBegin, RenderPassDesc, SurfaceSupport, SwapchainDesc,
};
pub use device::Device;
pub use instance::Instance;
pub use physical_device::QueueFamilyIndices;
pub use surface::Surface;
pub use error::{RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;
