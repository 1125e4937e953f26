//! A render session over one processed dataset.

use colibri_core::{
    Artifact, ArtifactKind, ArtifactRegistry, CameraModel, CameraSetup, ColibriError,
    FocalSettings, Mat4, Result, Transform,
};

use crate::blending::BlendingMaterial;
use crate::focal_surfaces::{FocalSurface, FocalSurfaces};

/// Stage name reported when a session is refused.
const NAME: &str = "render";

/// Focal surfaces and blending parameters for one dataset.
///
/// A session only starts once the artifacts it reads are ready. It holds a
/// copy of the camera list and artifact handles, so processing may continue
/// to own the setup while the session is alive.
#[derive(Debug, Clone)]
pub struct RenderSession {
    cameras: Vec<CameraModel>,
    artifacts: Vec<Artifact>,
    focal: FocalSurfaces,
    transforms: Vec<Transform>,
    material: BlendingMaterial,
}

impl RenderSession {
    /// Starts a session.
    ///
    /// Fails with a dependency error naming the first artifact of `required`
    /// that is not ready.
    pub fn begin(
        setup: &CameraSetup,
        artifacts: &ArtifactRegistry,
        required: &[ArtifactKind],
        settings: &FocalSettings,
    ) -> Result<Self> {
        if let Some(&missing) = required.iter().find(|&&kind| !artifacts.is_ready(kind)) {
            return Err(ColibriError::DependencyNotSatisfied {
                stage: NAME,
                missing,
            });
        }
        if setup.is_empty() {
            return Err(ColibriError::EmptyCameraSetup);
        }

        let cameras = setup.cameras().to_vec();
        let transforms: Vec<Transform> = cameras.iter().map(FocalSurface::initial_transform).collect();
        let mut focal = FocalSurfaces::new(settings);
        focal.store_information_on_focal_surfaces(&cameras, &transforms)?;

        let mut session = Self {
            artifacts: required
                .iter()
                .filter_map(|&kind| artifacts.get(kind).cloned())
                .collect(),
            material: BlendingMaterial::new(setup, settings),
            cameras,
            focal,
            transforms,
        };
        session.refresh()?;
        log::info!(
            "render session started with {} cameras at focal length {}",
            session.cameras.len(),
            session.focal.focal_length()
        );
        Ok(session)
    }

    fn refresh(&mut self) -> Result<()> {
        self.focal
            .update_focal_surface_transforms(&mut self.transforms)?;
        self.focal
            .send_focal_length_to_blending_material(self.material.uniforms_mut());
        Ok(())
    }

    /// Source cameras, in setup order.
    pub fn cameras(&self) -> &[CameraModel] {
        &self.cameras
    }

    /// A required artifact.
    pub fn artifact(&self, kind: ArtifactKind) -> Option<&Artifact> {
        self.artifacts.iter().find(|artifact| artifact.kind == kind)
    }

    /// Current focal length.
    pub fn focal_length(&self) -> f32 {
        self.focal.focal_length()
    }

    /// The focal surface helper.
    pub fn focal_surfaces(&self) -> &FocalSurfaces {
        &self.focal
    }

    /// Current focal surface transforms, in camera order.
    pub fn transforms(&self) -> &[Transform] {
        &self.transforms
    }

    /// Model matrices of the focal surfaces, in camera order.
    pub fn surface_matrices(&self) -> Vec<Mat4> {
        self.transforms.iter().map(Transform::to_matrix).collect()
    }

    /// Current blending parameters.
    pub fn material(&self) -> &BlendingMaterial {
        &self.material
    }

    /// Sets the focal length, clamped to its bounds.
    ///
    /// Surfaces and blending parameters are only updated when the value
    /// changes. Returns true in that case.
    pub fn set_focal_length(&mut self, focal_length: f32) -> Result<bool> {
        if !self.focal.set_focal_length(focal_length) {
            return Ok(false);
        }
        self.refresh()?;
        Ok(true)
    }

    /// Ends the session.
    pub fn end(mut self) {
        self.focal.teardown();
        log::info!("render session ended");
    }
}
