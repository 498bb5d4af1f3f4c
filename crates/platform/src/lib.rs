//! Platform abstraction layer for the Vulkan renderer.
//!
//! This crate provides:
//! - The [`SurfaceProvider`] trait the presentation core reads window state through
//! - A winit-backed [`Window`] with an explicitly pumped event loop

mod surface_provider;
mod window;

pub use surface_provider::SurfaceProvider;
pub use window::Window;
