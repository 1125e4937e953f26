//! Parameters of the view-dependent blending computation.
//!
//! The blending itself runs on the GPU: for every output pixel it weights the
//! source cameras by how close their viewing rays are to the viewer's, and
//! discards cameras beyond the maximum blend angle. This module owns the
//! parameter blocks uploaded to it.

use colibri_core::{CameraSetup, FocalSettings};

/// GPU representation of the global blending parameters.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BlendingUniforms {
    /// Current focal length, in meters.
    pub focal_length: f32,
    /// Largest angle between a source ray and the viewer ray that still
    /// contributes, in radians.
    pub max_blend_angle: f32,
    /// Number of entries in the source camera buffer.
    pub source_camera_count: u32,
    pub _padding: f32,
}

impl Default for BlendingUniforms {
    fn default() -> Self {
        let settings = FocalSettings::default();
        Self {
            focal_length: settings.focal_length,
            max_blend_angle: settings.max_blend_angle.to_radians(),
            source_camera_count: 0,
            _padding: 0.0,
        }
    }
}

/// GPU representation of one source camera.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SourceCameraUniform {
    /// Camera position in world space.
    pub position: [f32; 3],
    /// 1.0 for omnidirectional cameras, 0.0 otherwise.
    pub is_omnidirectional: f32,
    /// Viewing direction in world space.
    pub forward: [f32; 3],
    pub _padding: f32,
}

/// The blending parameters of one render session.
#[derive(Debug, Clone, Default)]
pub struct BlendingMaterial {
    uniforms: BlendingUniforms,
    cameras: Vec<SourceCameraUniform>,
}

impl BlendingMaterial {
    /// Creates the parameters for every camera of `setup`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(setup: &CameraSetup, settings: &FocalSettings) -> Self {
        let cameras: Vec<SourceCameraUniform> = setup
            .cameras()
            .iter()
            .map(|camera| SourceCameraUniform {
                position: camera.position.to_array(),
                is_omnidirectional: if camera.is_omnidirectional() { 1.0 } else { 0.0 },
                forward: camera.forward().to_array(),
                _padding: 0.0,
            })
            .collect();
        Self {
            uniforms: BlendingUniforms {
                focal_length: settings.focal_length,
                max_blend_angle: settings.max_blend_angle.clamp(0.0, 180.0).to_radians(),
                source_camera_count: cameras.len() as u32,
                _padding: 0.0,
            },
            cameras,
        }
    }

    /// Global parameters.
    pub fn uniforms(&self) -> &BlendingUniforms {
        &self.uniforms
    }

    /// Mutable global parameters.
    pub fn uniforms_mut(&mut self) -> &mut BlendingUniforms {
        &mut self.uniforms
    }

    /// Per-camera parameters, in camera order.
    pub fn cameras(&self) -> &[SourceCameraUniform] {
        &self.cameras
    }

    /// Bytes of the global parameter block.
    pub fn uniform_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(&self.uniforms)
    }

    /// Bytes of the source camera buffer.
    pub fn camera_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.cameras)
    }
}
