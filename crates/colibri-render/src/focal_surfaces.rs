//! Focal surfaces: per-camera proxies placed at a tunable focal distance.
//!
//! Each source camera gets one surface, a quad for perspective cameras and a
//! sphere for omnidirectional ones, onto which its image is reprojected. When
//! the global focal length changes, every surface moves along its camera's
//! viewing direction and is rescaled so that it keeps covering the camera's
//! field of view. Objects at the focal distance then appear in focus.

use colibri_core::{
    field_of_view_to_focal_length, CameraModel, ColibriError, FocalSettings, Result, Transform,
    Vec3,
};

use crate::blending::BlendingUniforms;

/// Information captured on a surface when it is created.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FocalSurface {
    /// Whether the source camera is omnidirectional.
    pub is_omnidirectional: bool,
    /// Focal length at which the initial scale covers the field of view.
    pub initial_focal_length: f32,
    /// Local position when stored.
    pub initial_position: Vec3,
    /// Local scale when stored.
    pub initial_scale: Vec3,
}

impl FocalSurface {
    /// Initial focal length of a camera's surface: 1 for omnidirectional
    /// cameras, otherwise the focal length matching the horizontal field of
    /// view on a unit-width sensor.
    pub fn initial_focal_length(camera: &CameraModel) -> f32 {
        match camera.projection.field_of_view() {
            Some(field_of_view) => field_of_view_to_focal_length(field_of_view.x, 1.0),
            None => 1.0,
        }
    }

    /// Transform of a newly created surface: at the camera, with the camera's
    /// orientation, scaled to a unit-width quad of the image's aspect ratio or
    /// to a unit sphere.
    pub fn initial_transform(camera: &CameraModel) -> Transform {
        let scale = if camera.is_omnidirectional() {
            Vec3::ONE
        } else {
            Vec3::new(1.0, 1.0 / camera.aspect_ratio(), 1.0)
        };
        Transform::from_translation_rotation(camera.position, camera.rotation).with_scale(scale)
    }

    /// Captures the surface information of one camera.
    pub fn capture(camera: &CameraModel, transform: &Transform) -> Self {
        Self {
            is_omnidirectional: camera.is_omnidirectional(),
            initial_focal_length: Self::initial_focal_length(camera),
            initial_position: transform.translation,
            initial_scale: transform.scale,
        }
    }

    /// Writes the position and scale for `focal_length` into `transform`.
    /// The rotation is left untouched.
    pub fn apply(&self, focal_length: f32, transform: &mut Transform) {
        let ratio = focal_length / self.initial_focal_length;
        let mut position = self.initial_position;
        if !self.is_omnidirectional {
            position += focal_length * transform.forward();
        }
        transform.translation = position;
        transform.scale = ratio * self.initial_scale;
    }
}

/// The focal length and the surfaces it drives.
#[derive(Debug, Clone)]
pub struct FocalSurfaces {
    focal_length: f32,
    min_focal_length: f32,
    max_focal_length: f32,
    surfaces: Option<Vec<FocalSurface>>,
}

impl Default for FocalSurfaces {
    fn default() -> Self {
        Self::new(&FocalSettings::default())
    }
}

impl FocalSurfaces {
    /// Creates the helper with the focal length and bounds of `settings`.
    pub fn new(settings: &FocalSettings) -> Self {
        let min_focal_length = settings.min_focal_length.max(f32::EPSILON);
        let max_focal_length = settings.max_focal_length.max(min_focal_length);
        Self {
            focal_length: settings
                .focal_length
                .clamp(min_focal_length, max_focal_length),
            min_focal_length,
            max_focal_length,
            surfaces: None,
        }
    }

    /// Current focal length, in meters.
    pub fn focal_length(&self) -> f32 {
        self.focal_length
    }

    /// Allowed focal length range.
    pub fn focal_bounds(&self) -> (f32, f32) {
        (self.min_focal_length, self.max_focal_length)
    }

    /// Sets the focal length, clamped to the bounds.
    ///
    /// Returns true if the value changed.
    pub fn set_focal_length(&mut self, focal_length: f32) -> bool {
        if !focal_length.is_finite() {
            return false;
        }
        let clamped = focal_length.clamp(self.min_focal_length, self.max_focal_length);
        if clamped == self.focal_length {
            return false;
        }
        self.focal_length = clamped;
        true
    }

    /// Returns true between a store and a teardown.
    pub fn is_stored(&self) -> bool {
        self.surfaces.is_some()
    }

    /// Stored surface information, in camera order.
    pub fn surfaces(&self) -> &[FocalSurface] {
        self.surfaces.as_deref().unwrap_or_default()
    }

    /// Captures the initial state of every camera's surface.
    ///
    /// Must be called once per render session; storing again before
    /// [`teardown`](Self::teardown) is an error.
    pub fn store_information_on_focal_surfaces(
        &mut self,
        cameras: &[CameraModel],
        transforms: &[Transform],
    ) -> Result<()> {
        if self.surfaces.is_some() {
            return Err(ColibriError::AlreadyStored);
        }
        if cameras.len() != transforms.len() {
            return Err(ColibriError::SizeMismatch {
                expected: cameras.len(),
                actual: transforms.len(),
            });
        }
        self.surfaces = Some(
            cameras
                .iter()
                .zip(transforms)
                .map(|(camera, transform)| FocalSurface::capture(camera, transform))
                .collect(),
        );
        log::debug!("stored {} focal surfaces", cameras.len());
        Ok(())
    }

    /// Moves and rescales every surface for the current focal length.
    pub fn update_focal_surface_transforms(&self, transforms: &mut [Transform]) -> Result<()> {
        let surfaces = self.surfaces.as_ref().ok_or(ColibriError::NotStored)?;
        if surfaces.len() != transforms.len() {
            return Err(ColibriError::SizeMismatch {
                expected: surfaces.len(),
                actual: transforms.len(),
            });
        }
        for (surface, transform) in surfaces.iter().zip(transforms) {
            surface.apply(self.focal_length, transform);
        }
        Ok(())
    }

    /// Writes the current focal length into the blending parameters.
    pub fn send_focal_length_to_blending_material(&self, uniforms: &mut BlendingUniforms) {
        uniforms.focal_length = self.focal_length;
    }

    /// Forgets the stored surfaces.
    pub fn teardown(&mut self) {
        self.surfaces = None;
    }
}
