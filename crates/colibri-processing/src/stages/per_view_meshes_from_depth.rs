//! Per-camera meshes rebuilt from the depth texture array.

use std::path::PathBuf;

use colibri_core::data_handler::create_or_clear_directory;
use colibri_core::{
    Artifact, ArtifactKind, ArtifactSummary, CameraModel, ColibriError, DataHandler, Result,
    UVec2, UVec3, Vec2, Vec3,
};

use super::depth_texture_array::{decode_depth, load_depth_image, DepthImage};
use super::per_view_meshes::add_to_summary;
use super::{artifact_file, output_directory, per_camera_file_name, texture_array_layout};
use crate::mesh::TriangleMesh;
use crate::stage::{Stage, StageContext, StagePoll};

const NAME: &str = "per_view_meshes_depth";

/// Triangles whose corner depths differ by more than this ratio span a depth
/// discontinuity and are dropped.
const MAX_DEPTH_RATIO: f32 = 1.1;

/// Writes `processing/per_view_meshes_depth/camera_NNNN.obj` for every
/// camera: a grid sampled every `grid_step` pixels of the camera's depth layer,
/// unprojected into the camera's local frame. Texture coordinates are the
/// samples' image coordinates.
#[derive(Debug)]
pub struct PerViewMeshesFromDepthStage {
    grid_step: u32,
    build: Option<Build>,
}

#[derive(Debug)]
struct Build {
    depth: DepthImage,
    layer: UVec2,
    next: usize,
    paths: Vec<PathBuf>,
    summary: ArtifactSummary,
}

impl PerViewMeshesFromDepthStage {
    /// Creates the stage.
    pub fn new(grid_step: u32) -> Self {
        Self {
            grid_step: grid_step.max(1),
            build: None,
        }
    }
}

/// Grid coordinates sampled along one axis, always including the last pixel.
fn grid_samples(size: u32, step: u32) -> Vec<u32> {
    let mut samples: Vec<u32> = (0..size).step_by(step.max(1) as usize).collect();
    if samples.last() != Some(&(size - 1)) {
        samples.push(size - 1);
    }
    samples
}

/// Builds the mesh of one camera from its depth layer.
///
/// `depth_at(x, y)` returns the distance stored at a pixel of the layer.
pub fn mesh_from_depth(
    camera: &CameraModel,
    layer: UVec2,
    grid_step: u32,
    depth_at: impl Fn(u32, u32) -> Option<f32>,
) -> TriangleMesh {
    let columns = grid_samples(layer.x, grid_step);
    let rows = grid_samples(layer.y, grid_step);
    let local_rotation = camera.rotation.inverse();

    let mut mesh = TriangleMesh::new();
    let mut grid: Vec<Option<(u32, f32)>> = Vec::with_capacity(columns.len() * rows.len());
    for &y in &rows {
        for &x in &columns {
            let sample = depth_at(x, y).map(|distance| {
                let uv = CameraModel::pixel_to_uv(x, y, layer);
                let direction: Vec3 = local_rotation * camera.ray_direction(uv);
                mesh.vertices.push(direction * distance);
                mesh.uvs.push(uv);
                ((mesh.vertices.len() - 1) as u32, distance)
            });
            grid.push(sample);
        }
    }

    let stride = columns.len();
    let mut push_triangle = |corners: [Option<(u32, f32)>; 3]| {
        let [Some(a), Some(b), Some(c)] = corners else {
            return;
        };
        let near = a.1.min(b.1).min(c.1);
        let far = a.1.max(b.1).max(c.1);
        if far <= near * MAX_DEPTH_RATIO {
            mesh.faces.push(UVec3::new(a.0, b.0, c.0));
        }
    };
    for row in 0..rows.len().saturating_sub(1) {
        for column in 0..stride - 1 {
            let top_left = grid[row * stride + column];
            let top_right = grid[row * stride + column + 1];
            let bottom_left = grid[(row + 1) * stride + column];
            let bottom_right = grid[(row + 1) * stride + column + 1];
            push_triangle([top_left, bottom_left, bottom_right]);
            push_triangle([top_left, bottom_right, top_right]);
        }
    }
    mesh
}

impl Stage for PerViewMeshesFromDepthStage {
    fn name(&self) -> &'static str {
        NAME
    }

    fn kind(&self) -> ArtifactKind {
        ArtifactKind::PerViewMeshesFromDepth
    }

    fn dependencies(&self) -> &'static [ArtifactKind] {
        &[ArtifactKind::DepthTextureArray]
    }

    fn output_paths(&self, data: &DataHandler) -> Vec<PathBuf> {
        vec![output_directory(data, self.kind())]
    }

    fn begin(&mut self, ctx: &StageContext<'_>) -> Result<()> {
        let artifact = ctx.dependency(NAME, ArtifactKind::DepthTextureArray)?;
        let layout = texture_array_layout(NAME, artifact, ctx.setup.len())?;
        let depth = load_depth_image(&artifact_file(NAME, artifact)?)?;
        if depth.width() != layout.x || depth.height() != layout.y * layout.z {
            return Err(ColibriError::StageFailed {
                stage: NAME,
                reason: "depth texture array does not match its recorded size".to_string(),
            });
        }
        create_or_clear_directory(&output_directory(ctx.data, self.kind()))?;
        self.build = Some(Build {
            depth,
            layer: layout.truncate(),
            next: 0,
            paths: Vec::new(),
            summary: ArtifactSummary {
                face_count: Some(0),
                vertex_count: Some(0),
                resolution: None,
            },
        });
        Ok(())
    }

    fn poll(&mut self, ctx: &StageContext<'_>) -> Result<StagePoll> {
        let build = self.build.as_mut().ok_or(ColibriError::StageFailed {
            stage: NAME,
            reason: "polled before begin".to_string(),
        })?;
        let cameras = ctx.setup.cameras();

        if let Some(camera) = cameras.get(build.next) {
            let row_offset = build.next as u32 * build.layer.y;
            let depth = &build.depth;
            let mesh = mesh_from_depth(camera, build.layer, self.grid_step, |x, y| {
                decode_depth(depth.get_pixel(x, row_offset + y)[0])
            });
            let path = output_directory(ctx.data, ArtifactKind::PerViewMeshesFromDepth)
                .join(per_camera_file_name(camera.reference_index, "obj"));
            mesh.write_obj(&path)?;
            add_to_summary(&mut build.summary, &mesh);
            build.paths.push(path);
            build.next += 1;
            ctx.progress.fraction(build.next as f32 / cameras.len() as f32);
            return Ok(StagePoll::Pending);
        }

        let artifact = Artifact::ready(
            ArtifactKind::PerViewMeshesFromDepth,
            std::mem::take(&mut build.paths),
            build.summary,
        );
        self.build = None;
        Ok(StagePoll::Complete(artifact))
    }

    fn cancel(&mut self) {
        self.build = None;
    }
}
