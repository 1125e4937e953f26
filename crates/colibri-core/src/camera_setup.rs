//! Ordered collection of camera models and the setup-description file.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use glam::{Quat, UVec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::camera_model::{CameraModel, Projection};
use crate::error::{ColibriError, Result};

/// Current version of the setup-description file format.
pub const CAMERA_SETUP_VERSION: u32 = 1;

/// The camera setup of one dataset.
///
/// Cameras are kept in reference-index order. The order carries no meaning
/// beyond stable iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraSetup {
    version: u32,
    repositioned: bool,
    cameras: Vec<CameraModel>,
}

impl Default for CameraSetup {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraSetup {
    /// Creates an empty setup.
    pub fn new() -> Self {
        Self {
            version: CAMERA_SETUP_VERSION,
            repositioned: false,
            cameras: Vec::new(),
        }
    }

    /// Builds a setup from existing camera models, checking their invariants.
    pub fn from_cameras(cameras: Vec<CameraModel>) -> Result<Self> {
        let mut setup = Self::new();
        setup.cameras = cameras;
        setup.validate()?;
        Ok(setup)
    }

    /// Removes all cameras and clears the repositioning state.
    pub fn reset(&mut self) {
        self.cameras.clear();
        self.repositioned = false;
    }

    /// Adds a camera and assigns it the next reference index.
    pub fn add_camera_model(
        &mut self,
        image_name: impl Into<String>,
        pixel_resolution: UVec2,
        position: Vec3,
        rotation: Quat,
        projection: Projection,
    ) -> &mut CameraModel {
        let reference_index = self
            .cameras
            .last()
            .map_or(0, |camera| camera.reference_index + 1);
        self.cameras.push(CameraModel {
            reference_index,
            image_name: image_name.into(),
            pixel_resolution,
            position,
            rotation,
            projection,
        });
        let last = self.cameras.len() - 1;
        &mut self.cameras[last]
    }

    /// Returns the camera models.
    pub fn cameras(&self) -> &[CameraModel] {
        &self.cameras
    }

    /// Returns the camera with the given reference index.
    pub fn camera(&self, reference_index: usize) -> Option<&CameraModel> {
        self.cameras
            .iter()
            .find(|camera| camera.reference_index == reference_index)
    }

    /// Returns the number of cameras.
    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    /// Returns true if the setup has no cameras.
    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }

    /// Returns whether the setup has been centered at the origin.
    pub fn is_repositioned(&self) -> bool {
        self.repositioned
    }

    /// Mean of all camera positions.
    #[allow(clippy::cast_precision_loss)]
    pub fn center(&self) -> Vec3 {
        if self.cameras.is_empty() {
            return Vec3::ZERO;
        }
        let sum: Vec3 = self.cameras.iter().map(|camera| camera.position).sum();
        sum / self.cameras.len() as f32
    }

    /// Axis-aligned bounds of the camera positions.
    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        let first = self.cameras.first()?.position;
        Some(self.cameras.iter().fold((first, first), |(min, max), camera| {
            (min.min(camera.position), max.max(camera.position))
        }))
    }

    /// Subtracts the mean camera position from every camera.
    ///
    /// May only be applied once per setup.
    pub fn reposition_around_center(&mut self) -> Result<Vec3> {
        if self.repositioned {
            return Err(ColibriError::AlreadyRepositioned);
        }
        let center = self.center();
        for camera in &mut self.cameras {
            camera.position -= center;
        }
        self.repositioned = true;
        log::debug!("repositioned {} cameras around {center}", self.cameras.len());
        Ok(center)
    }

    /// Checks every camera and the uniqueness of reference indices.
    pub fn validate(&self) -> Result<()> {
        if self.version != CAMERA_SETUP_VERSION {
            return Err(ColibriError::UnsupportedSetupVersion(self.version));
        }
        let mut seen = HashSet::with_capacity(self.cameras.len());
        for camera in &self.cameras {
            camera.validate()?;
            if !seen.insert(camera.reference_index) {
                return Err(ColibriError::DuplicateReferenceIndex(camera.reference_index));
            }
        }
        Ok(())
    }

    /// Serializes the setup to the description format.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses a setup from the description format.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut setup: Self = serde_json::from_str(json)?;
        setup.validate()?;
        setup.cameras.sort_by_key(|camera| camera.reference_index);
        Ok(setup)
    }

    /// Writes the setup-description file.
    ///
    /// The file is written next to its destination first and renamed into place.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, json)?;
        if let Err(e) = fs::rename(&staging, path) {
            let _ = fs::remove_file(&staging);
            return Err(e.into());
        }
        log::info!("saved camera setup ({} cameras) to {}", self.len(), path.display());
        Ok(())
    }

    /// Reads a setup-description file.
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec2;
    use proptest::prelude::*;

    fn perspective() -> Projection {
        Projection::Perspective {
            field_of_view: Vec2::new(60.0, 45.0),
        }
    }

    fn sample_setup() -> CameraSetup {
        let mut setup = CameraSetup::new();
        setup.add_camera_model(
            "frame_0.jpg",
            UVec2::new(640, 480),
            Vec3::new(1.0, 2.0, 3.0),
            Quat::from_rotation_y(0.3),
            perspective(),
        );
        setup.add_camera_model(
            "pano.jpg",
            UVec2::new(2048, 1024),
            Vec3::new(-0.125, 0.5, 7.75),
            Quat::IDENTITY,
            Projection::Omnidirectional,
        );
        setup
    }

    #[test]
    fn test_reference_indices_are_sequential() {
        let setup = sample_setup();
        let indices: Vec<usize> = setup.cameras().iter().map(|c| c.reference_index).collect();
        assert_eq!(indices, vec![0, 1]);
        assert_eq!(setup.camera(1).unwrap().image_name, "pano.jpg");
    }

    #[test]
    fn test_reposition_once() {
        let mut setup = sample_setup();
        let center = setup.reposition_around_center().unwrap();
        assert!((center - Vec3::new(0.4375, 1.25, 5.375)).length() < 1e-6);
        assert!(setup.center().length() < 1e-6);
        assert!(matches!(
            setup.reposition_around_center(),
            Err(ColibriError::AlreadyRepositioned)
        ));
    }

    #[test]
    fn test_json_roundtrip() {
        let mut setup = sample_setup();
        setup.reposition_around_center().unwrap();
        let json = setup.to_json().unwrap();
        let parsed = CameraSetup::from_json(&json).unwrap();
        assert_eq!(parsed, setup);
        assert_eq!(parsed.to_json().unwrap(), json);
    }

    #[test]
    fn test_duplicate_reference_index_rejected() {
        let mut cameras = sample_setup().cameras().to_vec();
        cameras[1].reference_index = 0;
        assert!(matches!(
            CameraSetup::from_cameras(cameras),
            Err(ColibriError::DuplicateReferenceIndex(0))
        ));
    }

    #[test]
    fn test_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("camera_setup.json");
        let setup = sample_setup();
        setup.save(&path).unwrap();
        assert!(!path.with_extension("json.tmp").exists());
        assert_eq!(CameraSetup::load(&path).unwrap(), setup);
    }

    #[test]
    fn test_bounds() {
        let setup = sample_setup();
        let (min, max) = setup.bounds().unwrap();
        assert_eq!(min, Vec3::new(-0.125, 0.5, 3.0));
        assert_eq!(max, Vec3::new(1.0, 2.0, 7.75));
        assert!(CameraSetup::new().bounds().is_none());
    }

    proptest! {
        #[test]
        fn prop_repositioned_mean_is_zero(
            positions in prop::collection::vec(
                (-100.0f32..100.0, -100.0f32..100.0, -100.0f32..100.0),
                1..32,
            )
        ) {
            let mut setup = CameraSetup::new();
            for (x, y, z) in positions {
                setup.add_camera_model(
                    "img.png",
                    UVec2::ONE,
                    Vec3::new(x, y, z),
                    Quat::IDENTITY,
                    Projection::Omnidirectional,
                );
            }
            setup.reposition_around_center().unwrap();
            prop_assert!(setup.center().length() < 1e-3);
        }
    }
}
