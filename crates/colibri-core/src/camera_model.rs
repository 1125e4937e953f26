//! A single calibrated source camera.

use std::f32::consts::{PI, TAU};

use glam::{Quat, UVec2, Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::{ColibriError, Result};

/// Converts a focal length into a field of view, in degrees.
///
/// `size` is the sensor extent along the same axis, in the focal length's unit
/// (pixels for pixel focal lengths).
pub fn focal_length_to_field_of_view(focal_length: f32, size: f32) -> f32 {
    (2.0 * (size / (2.0 * focal_length)).atan()).to_degrees()
}

/// Converts a field of view in degrees into a focal length for the given sensor extent.
pub fn field_of_view_to_focal_length(field_of_view_degrees: f32, size: f32) -> f32 {
    size * 0.5 / (field_of_view_degrees.to_radians() * 0.5).tan()
}

/// Tangents of half the horizontal and vertical field of view, in degrees.
fn half_angle_tangents(field_of_view: Vec2) -> Vec2 {
    Vec2::new(
        (field_of_view.x.to_radians() * 0.5).tan(),
        (field_of_view.y.to_radians() * 0.5).tan(),
    )
}

/// How a camera projects the scene onto its image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Projection {
    /// Pinhole camera with a horizontal and vertical field of view, in degrees.
    Perspective { field_of_view: Vec2 },
    /// Full spherical capture.
    Omnidirectional,
}

impl Projection {
    /// Returns true for omnidirectional cameras.
    pub fn is_omnidirectional(&self) -> bool {
        matches!(self, Projection::Omnidirectional)
    }

    /// Returns the field of view for perspective cameras.
    pub fn field_of_view(&self) -> Option<Vec2> {
        match self {
            Projection::Perspective { field_of_view } => Some(*field_of_view),
            Projection::Omnidirectional => None,
        }
    }
}

/// A calibrated camera: pose, intrinsics and the image it captured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraModel {
    /// Index of this camera within its setup.
    pub reference_index: usize,
    /// File name of the color image, relative to the dataset's image directory.
    pub image_name: String,
    /// Image size in pixels.
    pub pixel_resolution: UVec2,
    /// Camera position in world space.
    pub position: Vec3,
    /// Camera orientation (unit quaternion).
    pub rotation: Quat,
    /// Projection model.
    pub projection: Projection,
}

impl CameraModel {
    /// Creates a perspective camera at the origin.
    pub fn perspective(
        reference_index: usize,
        image_name: impl Into<String>,
        pixel_resolution: UVec2,
        field_of_view: Vec2,
    ) -> Self {
        Self {
            reference_index,
            image_name: image_name.into(),
            pixel_resolution,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            projection: Projection::Perspective { field_of_view },
        }
    }

    /// Creates an omnidirectional camera at the origin.
    pub fn omnidirectional(
        reference_index: usize,
        image_name: impl Into<String>,
        pixel_resolution: UVec2,
    ) -> Self {
        Self {
            reference_index,
            image_name: image_name.into(),
            pixel_resolution,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            projection: Projection::Omnidirectional,
        }
    }

    /// Sets the camera pose.
    #[must_use]
    pub fn with_pose(mut self, position: Vec3, rotation: Quat) -> Self {
        self.position = position;
        self.rotation = rotation;
        self
    }

    /// Returns true for omnidirectional cameras.
    pub fn is_omnidirectional(&self) -> bool {
        self.projection.is_omnidirectional()
    }

    /// Viewing direction in world space.
    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::Z
    }

    /// Up direction in world space.
    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }

    /// Right direction in world space.
    pub fn right(&self) -> Vec3 {
        self.rotation * Vec3::X
    }

    /// Width over height of the image.
    #[allow(clippy::cast_precision_loss)]
    pub fn aspect_ratio(&self) -> f32 {
        self.pixel_resolution.x as f32 / self.pixel_resolution.y.max(1) as f32
    }

    /// Focal length for a sensor of the given width.
    ///
    /// Omnidirectional cameras have no finite focal length and report `None`.
    pub fn focal_length_for_sensor(&self, sensor_width: f32) -> Option<f32> {
        self.projection
            .field_of_view()
            .map(|fov| field_of_view_to_focal_length(fov.x, sensor_width))
    }

    /// Projects a world-space point into normalized image coordinates.
    ///
    /// `u` grows to the right and `v` grows upward, both in `[0, 1]`.
    /// Omnidirectional cameras use an equirectangular mapping centered on the
    /// forward axis. Returns `None` for points outside a perspective camera's
    /// frustum or at the camera center.
    pub fn project(&self, world: Vec3) -> Option<Vec2> {
        let uv = self.project_unbounded(world)?;
        (uv.cmpge(Vec2::ZERO).all() && uv.cmple(Vec2::ONE).all()).then_some(uv)
    }

    /// Like [`project`](Self::project), but perspective coordinates are not
    /// limited to the image; only points behind the camera are rejected.
    pub fn project_unbounded(&self, world: Vec3) -> Option<Vec2> {
        let local = self.rotation.inverse() * (world - self.position);
        match self.projection {
            Projection::Perspective { field_of_view } => {
                if local.z <= f32::EPSILON {
                    return None;
                }
                let half = half_angle_tangents(field_of_view);
                let ndc = Vec2::new(local.x / local.z / half.x, local.y / local.z / half.y);
                Some(ndc * 0.5 + Vec2::splat(0.5))
            }
            Projection::Omnidirectional => {
                let dir = local.try_normalize()?;
                let longitude = dir.x.atan2(dir.z);
                let latitude = dir.y.clamp(-1.0, 1.0).asin();
                Some(Vec2::new(0.5 + longitude / TAU, 0.5 + latitude / PI))
            }
        }
    }

    /// World-space unit direction of the viewing ray through normalized image
    /// coordinates `uv`; the inverse of [`project`](Self::project).
    pub fn ray_direction(&self, uv: Vec2) -> Vec3 {
        let local = match self.projection {
            Projection::Perspective { field_of_view } => {
                let half = half_angle_tangents(field_of_view);
                let ndc = uv * 2.0 - Vec2::ONE;
                Vec3::new(ndc.x * half.x, ndc.y * half.y, 1.0).normalize()
            }
            Projection::Omnidirectional => {
                let longitude = (uv.x - 0.5) * TAU;
                let latitude = (uv.y - 0.5) * PI;
                Vec3::new(
                    latitude.cos() * longitude.sin(),
                    latitude.sin(),
                    latitude.cos() * longitude.cos(),
                )
            }
        };
        self.rotation * local
    }

    /// Normalized coordinates of the center of pixel `(column, row)` in an image
    /// of `size` pixels, with row 0 at the top.
    #[allow(clippy::cast_precision_loss)]
    pub fn pixel_to_uv(column: u32, row: u32, size: UVec2) -> Vec2 {
        Vec2::new(
            (column as f32 + 0.5) / size.x as f32,
            1.0 - (row as f32 + 0.5) / size.y as f32,
        )
    }

    /// Checks the model's invariants.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| ColibriError::InvalidCameraModel {
            index: self.reference_index,
            reason: reason.to_string(),
        };

        if self.pixel_resolution.x == 0 || self.pixel_resolution.y == 0 {
            return Err(invalid("pixel resolution must be at least 1x1"));
        }
        if !self.position.is_finite() {
            return Err(invalid("position is not finite"));
        }
        if !self.rotation.is_finite() || (self.rotation.length() - 1.0).abs() > 1e-3 {
            return Err(invalid("rotation is not a unit quaternion"));
        }
        if let Projection::Perspective { field_of_view } = self.projection {
            let valid = |angle: f32| angle.is_finite() && angle > 0.0 && angle < 180.0;
            if !valid(field_of_view.x) || !valid(field_of_view.y) {
                return Err(invalid("field of view must lie strictly between 0 and 180 degrees"));
            }
        }
        Ok(())
    }
}
