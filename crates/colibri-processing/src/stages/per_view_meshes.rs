//! One proxy mesh per source camera.

use std::path::PathBuf;

use colibri_core::data_handler::create_or_clear_directory;
use colibri_core::{
    Artifact, ArtifactKind, ArtifactSummary, CameraModel, ColibriError, DataHandler, Projection,
    Result, Vec2,
};

use super::{output_directory, per_camera_file_name, texture_array_layout};
use crate::mesh::TriangleMesh;
use crate::stage::{Stage, StageContext, StagePoll};

const NAME: &str = "per_view_meshes";

const SPHERE_LONGITUDE_SEGMENTS: u32 = 48;
const SPHERE_LATITUDE_SEGMENTS: u32 = 24;

/// Writes `processing/per_view_meshes/camera_NNNN.obj` for every camera, in
/// the camera's local frame: a quad at unit distance spanning the field of
/// view for perspective cameras, a unit sphere for omnidirectional ones.
///
/// Texture coordinates address the camera's layer of the color texture array.
#[derive(Debug, Default)]
pub struct PerViewMeshesStage {
    next: Option<usize>,
    paths: Vec<PathBuf>,
    summary: ArtifactSummary,
}

impl PerViewMeshesStage {
    /// Creates the stage.
    pub fn new() -> Self {
        Self::default()
    }
}

/// The proxy mesh of one camera, in its local frame.
pub fn view_mesh(camera: &CameraModel) -> TriangleMesh {
    match camera.projection {
        Projection::Perspective { field_of_view } => {
            let half_extent = Vec2::new(
                (field_of_view.x.to_radians() * 0.5).tan(),
                (field_of_view.y.to_radians() * 0.5).tan(),
            );
            TriangleMesh::quad(half_extent, 1.0)
        }
        Projection::Omnidirectional => TriangleMesh::uv_sphere(
            1.0,
            SPHERE_LONGITUDE_SEGMENTS,
            SPHERE_LATITUDE_SEGMENTS,
        ),
    }
}

impl Stage for PerViewMeshesStage {
    fn name(&self) -> &'static str {
        NAME
    }

    fn kind(&self) -> ArtifactKind {
        ArtifactKind::PerViewMeshes
    }

    fn dependencies(&self) -> &'static [ArtifactKind] {
        &[ArtifactKind::ColorTextureArray]
    }

    fn output_paths(&self, data: &DataHandler) -> Vec<PathBuf> {
        vec![output_directory(data, self.kind())]
    }

    fn begin(&mut self, ctx: &StageContext<'_>) -> Result<()> {
        let colors = ctx.dependency(NAME, ArtifactKind::ColorTextureArray)?;
        texture_array_layout(NAME, colors, ctx.setup.len())?;
        create_or_clear_directory(&output_directory(ctx.data, self.kind()))?;
        self.next = Some(0);
        self.paths.clear();
        self.summary = ArtifactSummary {
            face_count: Some(0),
            vertex_count: Some(0),
            resolution: None,
        };
        Ok(())
    }

    fn poll(&mut self, ctx: &StageContext<'_>) -> Result<StagePoll> {
        let next = self.next.ok_or(ColibriError::StageFailed {
            stage: NAME,
            reason: "polled before begin".to_string(),
        })?;
        let cameras = ctx.setup.cameras();

        if let Some(camera) = cameras.get(next) {
            let mesh = view_mesh(camera);
            let path = output_directory(ctx.data, ArtifactKind::PerViewMeshes)
                .join(per_camera_file_name(camera.reference_index, "obj"));
            mesh.write_obj(&path)?;
            add_to_summary(&mut self.summary, &mesh);
            self.paths.push(path);
            self.next = Some(next + 1);
            ctx.progress.fraction((next + 1) as f32 / cameras.len() as f32);
            return Ok(StagePoll::Pending);
        }

        self.next = None;
        Ok(StagePoll::Complete(Artifact::ready(
            ArtifactKind::PerViewMeshes,
            std::mem::take(&mut self.paths),
            self.summary,
        )))
    }

    fn cancel(&mut self) {
        self.next = None;
        self.paths.clear();
    }
}

/// Adds a mesh's counts to a running total.
pub(crate) fn add_to_summary(summary: &mut ArtifactSummary, mesh: &TriangleMesh) {
    let counts = mesh.summary();
    summary.face_count = Some(summary.face_count.unwrap_or(0) + counts.face_count.unwrap_or(0));
    summary.vertex_count =
        Some(summary.vertex_count.unwrap_or(0) + counts.vertex_count.unwrap_or(0));
}
