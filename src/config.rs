use std::path::PathBuf;

use glam::Vec4;

use crate::{AshError, Result};

pub const MIN_FRAMES_IN_FLIGHT: usize = 2;
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

/// Renderer configuration
#[derive(Clone, Debug)]
pub struct RendererConfig {
    /// Number of frame slots the CPU may record ahead of the GPU (2 or 3)
    pub frames_in_flight: usize,
    /// Upper bound for each per-kind texture array (albedo, normal, height)
    pub max_textures_per_kind: u32,
    /// Object capacity of the per-frame storage buffers before the first growth
    pub initial_object_capacity: usize,
    /// rgb = ambient colour, a = intensity
    pub ambient_light_color: Vec4,
    pub clear_color: [f32; 4],
    /// Persist the Vulkan pipeline cache here between runs
    pub pipeline_cache_path: Option<PathBuf>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: MIN_FRAMES_IN_FLIGHT,
            max_textures_per_kind: 64,
            initial_object_capacity: 16,
            ambient_light_color: Vec4::new(1.0, 1.0, 1.0, 0.25),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            pipeline_cache_path: None,
        }
    }
}

impl RendererConfig {
    pub fn with_frames_in_flight(mut self, frames_in_flight: usize) -> Self {
        self.frames_in_flight = frames_in_flight;
        self
    }

    pub fn with_initial_object_capacity(mut self, capacity: usize) -> Self {
        self.initial_object_capacity = capacity;
        self
    }

    pub fn with_max_textures_per_kind(mut self, max: u32) -> Self {
        self.max_textures_per_kind = max;
        self
    }

    pub fn with_pipeline_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.pipeline_cache_path = Some(path.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_FRAMES_IN_FLIGHT..=MAX_FRAMES_IN_FLIGHT).contains(&self.frames_in_flight) {
            return Err(AshError::Configuration(format!(
                "frames_in_flight must be between {MIN_FRAMES_IN_FLIGHT} and {MAX_FRAMES_IN_FLIGHT}, got {}",
                self.frames_in_flight
            )));
        }
        if self.max_textures_per_kind == 0 {
            return Err(AshError::configuration(
                "max_textures_per_kind must be at least 1",
            ));
        }
        Ok(())
    }
}
