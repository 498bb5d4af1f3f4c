//! Engine configuration: window, clear values and validation.

use crate::error::{Error, Result};

/// Environment variable overriding the initial window width.
pub const WIDTH_VAR: &str = "RENDERER_WIDTH";
/// Environment variable overriding the initial window height.
pub const HEIGHT_VAR: &str = "RENDERER_HEIGHT";
/// Environment variable toggling Vulkan validation layers (`1`/`0`/`true`/`false`).
pub const VALIDATION_VAR: &str = "RENDERER_VALIDATION";

/// Startup configuration for the window and the frame orchestrator.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    /// Window title.
    pub title: String,
    /// Initial drawable width in pixels.
    pub width: u32,
    /// Initial drawable height in pixels.
    pub height: u32,
    /// RGBA color the render pass clears the color attachment to.
    pub clear_color: [f32; 4],
    /// Value the render pass clears the depth attachment to.
    pub clear_depth: f32,
    /// Enable Vulkan validation layers.
    pub validation: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan Renderer".to_string(),
            width: 1280,
            height: 720,
            clear_color: [0.01, 0.1, 0.1, 1.0],
            clear_depth: 1.0,
            validation: cfg!(debug_assertions),
        }
    }
}

impl EngineConfig {
    /// Builds the default configuration, then applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if an override is present but malformed.
    pub fn from_env() -> Result<Self> {
        Self::default().with_overrides(|name| std::env::var(name).ok())
    }

    /// Applies overrides looked up through `lookup`.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(WIDTH_VAR) {
            self.width = parse_dimension(WIDTH_VAR, &value)?;
        }
        if let Some(value) = lookup(HEIGHT_VAR) {
            self.height = parse_dimension(HEIGHT_VAR, &value)?;
        }
        if let Some(value) = lookup(VALIDATION_VAR) {
            self.validation = parse_flag(VALIDATION_VAR, &value)?;
        }
        Ok(self)
    }
}

fn parse_dimension(name: &str, value: &str) -> Result<u32> {
    match value.trim().parse::<u32>() {
        Ok(0) => Err(Error::Config(format!("{name} must be greater than 0"))),
        Ok(v) => Ok(v),
        Err(e) => Err(Error::Config(format!("{name}={value:?}: {e}"))),
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" => Ok(true),
        "0" | "false" | "off" => Ok(false),
        _ => Err(Error::Config(format!(
            "{name}={value:?}: expected 1/0/true/false"
        ))),
    }
}
