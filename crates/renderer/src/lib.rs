//! Swapchain and frame lifecycle.
//!
//! This crate is the presentation core of the renderer:
//! - [`PresentationEngine`]: one generation of the swapchain, its depth
//!   buffers, render pass, framebuffers and frame-slot synchronization
//! - [`FrameOrchestrator`]: the begin/end frame protocol, command buffer
//!   ownership and swapchain recreation on resize or staleness
//!
//! Both are generic over [`DeviceContext`](renderer_rhi::DeviceContext) and
//! [`SurfaceProvider`](renderer_platform::SurfaceProvider), so they run
//! unchanged against the Vulkan device or a test double.

mod error;
pub mod frame;
pub mod orchestrator;
pub mod presentation;
pub mod surface_config;
pub mod sync;

pub use error::{ProtocolViolation, RenderError, RenderResult, SurfaceStatus};
pub use frame::{FrameContext, FrameSlot, FrameState};
pub use orchestrator::FrameOrchestrator;
pub use presentation::{AttachmentFormats, DEPTH_FORMAT_CANDIDATES, PresentationEngine};
pub use surface_config::{PresentModeChoice, SurfaceConfig, SurfaceFormatChoice};
pub use sync::{Fence, Semaphore};

/// Maximum number of frames that can be in flight simultaneously.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;
