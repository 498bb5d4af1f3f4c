//! Error types for the presentation core.

use ash::vk;
use renderer_rhi::RhiError;
use thiserror::Error;

use crate::presentation::AttachmentFormats;

/// Result type alias for presentation core operations.
pub type RenderResult<T> = std::result::Result<T, RenderError>;

/// Errors produced by the presentation engine and the frame orchestrator.
#[derive(Debug, Error)]
pub enum RenderError {
    /// A GPU object could not be created. There is no degraded mode.
    #[error("failed to create {what}: {source}")]
    Construction {
        what: &'static str,
        #[source]
        source: RhiError,
    },

    /// The surface no longer matches the swapchain; it must be recreated.
    #[error("presentation surface is out of date")]
    SurfaceOutOfDate,

    /// A frame-scoped operation was called in the wrong frame state.
    #[error("frame protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    /// Recreation produced attachments in a different format.
    #[error("attachment formats changed from {previous} to {current}")]
    FormatDrift {
        previous: AttachmentFormats,
        current: AttachmentFormats,
    },

    /// Any other device failure.
    #[error(transparent)]
    Device(#[from] RhiError),
}

impl RenderError {
    /// Returns true for errors the orchestrator handles by recreating the swapchain.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::SurfaceOutOfDate)
    }
}

impl From<vk::Result> for RenderError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_DATE_KHR => Self::SurfaceOutOfDate,
            other => Self::Device(RhiError::from(other)),
        }
    }
}

/// Misuse of the begin/end frame and render pass protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("begin_frame called while a frame is already in progress")]
    FrameAlreadyInProgress,
    #[error("operation requires a frame in progress")]
    NoFrameInProgress,
    #[error("a render pass is already open")]
    RenderPassAlreadyOpen,
    #[error("no render pass is open")]
    NoRenderPassOpen,
    #[error("end_frame called with a render pass still open")]
    RenderPassStillOpen,
    #[error("frame context does not belong to the current frame")]
    ForeignFrameContext,
}

/// Whether the surface still matches the swapchain exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceStatus {
    Optimal,
    /// Still presentable, but recreation is recommended.
    Suboptimal,
}

impl SurfaceStatus {
    #[inline]
    pub(crate) fn from_suboptimal(suboptimal: bool) -> Self {
        if suboptimal {
            Self::Suboptimal
        } else {
            Self::Optimal
        }
    }
}

/// Attaches the name of the object being created to a device error.
pub(crate) trait ConstructionContext<T> {
    fn creating(self, what: &'static str) -> RenderResult<T>;
}

impl<T> ConstructionContext<T> for Result<T, RhiError> {
    fn creating(self, what: &'static str) -> RenderResult<T> {
        self.map_err(|source| RenderError::Construction { what, source })
    }
}
