//! Owned synchronization objects.
//!
//! [`Semaphore`] and [`Fence`] hold a device reference and destroy their
//! handle on drop, so a frame slot that fails halfway through construction
//! releases exactly what it created.

use std::sync::Arc;

use ash::vk;
use renderer_rhi::{DeviceContext, RhiResult};
use tracing::trace;

/// Binary semaphore for GPU-to-GPU ordering between queue operations.
pub struct Semaphore<D: DeviceContext> {
    device: Arc<D>,
    semaphore: vk::Semaphore,
}

impl<D: DeviceContext> Semaphore<D> {
    /// Creates an unsignaled semaphore.
    ///
    /// # Errors
    ///
    /// Returns an error if semaphore creation fails.
    pub fn new(device: Arc<D>) -> RhiResult<Self> {
        let semaphore = device.create_semaphore()?;
        trace!("Created semaphore");
        Ok(Self { device, semaphore })
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl<D: DeviceContext> Drop for Semaphore<D> {
    fn drop(&mut self) {
        // SAFETY: the owner waits for the device to go idle before dropping.
        unsafe { self.device.destroy_semaphore(self.semaphore) };
    }
}

/// Fence the host waits on for GPU completion.
pub struct Fence<D: DeviceContext> {
    device: Arc<D>,
    fence: vk::Fence,
}

impl<D: DeviceContext> Fence<D> {
    /// Creates a fence, signaled if `signaled` is true.
    ///
    /// # Errors
    ///
    /// Returns an error if fence creation fails.
    pub fn new(device: Arc<D>, signaled: bool) -> RhiResult<Self> {
        let fence = device.create_fence(signaled)?;
        trace!(
            "Created fence ({})",
            if signaled { "signaled" } else { "unsignaled" }
        );
        Ok(Self { device, fence })
    }

    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Blocks until the fence is signaled or `timeout` nanoseconds elapse.
    ///
    /// # Errors
    ///
    /// Returns an error on timeout or device loss.
    pub fn wait(&self, timeout: u64) -> RhiResult<()> {
        self.device.wait_for_fence(self.fence, timeout)
    }

    /// Returns the fence to the unsignaled state.
    ///
    /// # Errors
    ///
    /// Returns an error if the reset fails.
    pub fn reset(&self) -> RhiResult<()> {
        self.device.reset_fence(self.fence)
    }
}

impl<D: DeviceContext> Drop for Fence<D> {
    fn drop(&mut self) {
        // SAFETY: the owner waits for the device to go idle before dropping,
        // so no pending submission signals this fence.
        unsafe { self.device.destroy_fence(self.fence) };
    }
}
