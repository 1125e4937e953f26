//! Configuration for dataset processing and rendering.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Settings for an external tool driven through scripts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSettings {
    /// Path to the tool executable.
    pub executable_path: PathBuf,
    /// Flags passed before the script path.
    pub fixed_flags: Vec<String>,
    /// Directory holding the tool scripts.
    pub scripts_dir: PathBuf,
    /// Output lines known to be benign.
    pub harmless_warnings: Vec<String>,
}

impl ToolSettings {
    /// Default settings for Blender in background mode.
    pub fn blender() -> Self {
        Self {
            executable_path: PathBuf::from("blender"),
            fixed_flags: vec![
                "--factory-startup".to_string(),
                "--background".to_string(),
                "--python".to_string(),
            ],
            scripts_dir: PathBuf::from("scripts"),
            harmless_warnings: vec![
                "Failed to set 44100hz, got 48000hz instead".to_string(),
                "Failed to set 48000hz, got 44100hz instead".to_string(),
            ],
        }
    }

    /// Sets the executable path.
    #[must_use]
    pub fn with_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.executable_path = path.into();
        self
    }

    /// Sets the scripts directory.
    #[must_use]
    pub fn with_scripts_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.scripts_dir = path.into();
        self
    }

    /// Sets the flags passed before the script path.
    #[must_use]
    pub fn with_fixed_flags(mut self, flags: Vec<String>) -> Self {
        self.fixed_flags = flags;
        self
    }
}

/// Settings for the focal-surface renderer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FocalSettings {
    /// Initial focal length (meters).
    pub focal_length: f32,
    /// Lower bound for the focal length.
    pub min_focal_length: f32,
    /// Upper bound for the focal length.
    pub max_focal_length: f32,
    /// Largest angle (degrees) between viewing rays still blended together.
    pub max_blend_angle: f32,
}

impl Default for FocalSettings {
    fn default() -> Self {
        Self {
            focal_length: 1.0,
            min_focal_length: 0.1,
            max_focal_length: 20.0,
            max_blend_angle: 60.0,
        }
    }
}

/// Global settings for colibri.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Blender, used for mesh conversion, simplification and UV projection.
    pub blender: ToolSettings,

    /// Whether parsed camera setups are centered at the origin.
    pub reposition_around_center: bool,

    /// Maximum width or height of texture array layers.
    pub preview_max_resolution: u32,

    /// Width and height of each depth map layer.
    pub depth_map_resolution: u32,

    /// Pixel step between vertices of meshes rebuilt from depth.
    pub depth_mesh_grid_step: u32,

    /// Width and height of the baked global texture map.
    pub texture_map_resolution: u32,

    /// Focal-surface rendering.
    pub focal: FocalSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            blender: ToolSettings::blender(),
            reposition_around_center: true,
            preview_max_resolution: 512,
            depth_map_resolution: 256,
            depth_mesh_grid_step: 8,
            texture_map_resolution: 2048,
            focal: FocalSettings::default(),
        }
    }
}

impl Settings {
    /// Creates settings with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the Blender tool settings.
    #[must_use]
    pub fn with_blender(mut self, blender: ToolSettings) -> Self {
        self.blender = blender;
        self
    }

    /// Sets whether parsed setups are recentered.
    #[must_use]
    pub fn with_reposition_around_center(mut self, reposition: bool) -> Self {
        self.reposition_around_center = reposition;
        self
    }

    /// Sets the maximum texture array layer resolution.
    #[must_use]
    pub fn with_preview_max_resolution(mut self, resolution: u32) -> Self {
        self.preview_max_resolution = resolution.max(1);
        self
    }

    /// Sets the depth map resolution.
    #[must_use]
    pub fn with_depth_map_resolution(mut self, resolution: u32) -> Self {
        self.depth_map_resolution = resolution.max(2);
        self
    }

    /// Sets the grid step of meshes rebuilt from depth.
    #[must_use]
    pub fn with_depth_mesh_grid_step(mut self, step: u32) -> Self {
        self.depth_mesh_grid_step = step.max(1);
        self
    }

    /// Reads settings from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Writes settings to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
