//! Window management using winit.
//!
//! The event loop is driven explicitly through `pump_app_events` instead of
//! `run_app`, so the render loop owns control flow and can block on event
//! delivery while the window is minimized.

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::window::{Window as WinitWindow, WindowAttributes, WindowId};

use renderer_core::{EngineConfig, Error, Result};
use renderer_rhi::{Instance, RhiError, RhiResult, Surface};

use crate::surface_provider::SurfaceProvider;

/// Window state updated by winit callbacks.
struct WindowState {
    attributes: WindowAttributes,
    window: Option<Arc<WinitWindow>>,
    size: PhysicalSize<u32>,
    resized: bool,
    close_requested: bool,
    creation_error: Option<String>,
}

impl WindowState {
    fn handle_event(&mut self, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                tracing::info!("Close requested");
                self.close_requested = true;
            }
            WindowEvent::Resized(size) => {
                tracing::debug!("Window resized: {}x{}", size.width, size.height);
                self.size = size;
                self.resized = true;
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(KeyCode::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                tracing::info!("Escape pressed, closing");
                self.close_requested = true;
            }
            _ => {}
        }
    }
}

impl ApplicationHandler for WindowState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        match event_loop.create_window(self.attributes.clone()) {
            Ok(window) => {
                self.size = window.inner_size();
                tracing::info!("Window created: {}x{}", self.size.width, self.size.height);
                self.window = Some(Arc::new(window));
            }
            Err(e) => self.creation_error = Some(e.to_string()),
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        self.handle_event(event);
    }
}

/// A winit window with its own event loop.
pub struct Window {
    event_loop: EventLoop<()>,
    state: WindowState,
}

impl Window {
    /// Creates the event loop and a resizable window described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Window`] if the event loop or window cannot be created.
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let mut event_loop = EventLoop::new().map_err(|e| Error::Window(e.to_string()))?;

        let attributes = WindowAttributes::default()
            .with_title(config.title.clone())
            .with_inner_size(PhysicalSize::new(config.width, config.height))
            .with_resizable(true);

        let mut state = WindowState {
            attributes,
            window: None,
            size: PhysicalSize::new(config.width, config.height),
            resized: false,
            close_requested: false,
            creation_error: None,
        };

        // The window is created from the first `resumed` callback.
        while state.window.is_none() {
            if let PumpStatus::Exit(code) =
                event_loop.pump_app_events(Some(Duration::ZERO), &mut state)
            {
                return Err(Error::Window(format!(
                    "event loop exited with code {code} before the window was created"
                )));
            }
            if let Some(e) = state.creation_error.take() {
                return Err(Error::Window(e));
            }
        }

        Ok(Self { event_loop, state })
    }

    /// Returns the underlying winit window.
    pub fn inner(&self) -> Option<&WinitWindow> {
        self.state.window.as_deref()
    }

    /// Returns the raw display handle used to pick instance extensions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Window`] if the display handle is unavailable.
    pub fn raw_display_handle(&self) -> Result<raw_window_handle::RawDisplayHandle> {
        self.event_loop
            .display_handle()
            .map(|handle| handle.as_raw())
            .map_err(|e| Error::Window(format!("failed to get display handle: {e}")))
    }

    fn pump(&mut self, timeout: Option<Duration>) {
        if let PumpStatus::Exit(code) = self.event_loop.pump_app_events(timeout, &mut self.state) {
            tracing::info!("Event loop exited with code {}", code);
            self.state.close_requested = true;
        }
    }
}

impl SurfaceProvider for Window {
    fn drawable_extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.state.size.width,
            height: self.state.size.height,
        }
    }

    fn poll_events(&mut self) {
        self.pump(Some(Duration::ZERO));
    }

    fn wait_events(&mut self) {
        self.pump(None);
    }

    fn was_resized(&self) -> bool {
        self.state.resized
    }

    fn clear_resized_flag(&mut self) {
        self.state.resized = false;
    }

    fn should_close(&self) -> bool {
        self.state.close_requested
    }

    fn create_surface(&self, instance: &Instance) -> RhiResult<Surface> {
        let window = self
            .state
            .window
            .as_ref()
            .ok_or_else(|| RhiError::SurfaceError("window not created".into()))?;

        let display_handle = window
            .display_handle()
            .map_err(|e| RhiError::SurfaceError(format!("failed to get display handle: {e}")))?;
        let window_handle = window
            .window_handle()
            .map_err(|e| RhiError::SurfaceError(format!("failed to get window handle: {e}")))?;

        // SAFETY: the handles come from a window owned by `self`; the caller
        // keeps this window alive for as long as the returned surface.
        unsafe { Surface::new(instance, display_handle.as_raw(), window_handle.as_raw()) }
    }
}
