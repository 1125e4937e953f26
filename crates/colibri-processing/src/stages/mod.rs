//! The processing stages, one per artifact kind.
//!
//! Every stage writes below the dataset's `processing/` directory and fully
//! overwrites its previous output on each run.

mod color_texture_array;
mod depth_texture_array;
mod global_mesh;
mod global_texture_map;
mod per_view_meshes;
mod per_view_meshes_from_depth;
mod raster;

pub use color_texture_array::ColorTextureArrayStage;
pub use depth_texture_array::{DepthTextureArrayStage, DEPTH_UNITS_PER_METER};
pub use global_mesh::GlobalMeshStage;
pub use global_texture_map::GlobalTextureMapStage;
pub use per_view_meshes::PerViewMeshesStage;
pub use per_view_meshes_from_depth::PerViewMeshesFromDepthStage;

use std::path::PathBuf;

use colibri_core::{Artifact, ArtifactKind, ColibriError, DataHandler, Result, UVec2, UVec3, Vec2};

/// Path of a single-file stage output.
fn output_file(data: &DataHandler, kind: ArtifactKind, extension: &str) -> PathBuf {
    data.processing_directory()
        .join(format!("{}.{extension}", kind.as_str()))
}

/// Directory of a multi-file stage output.
fn output_directory(data: &DataHandler, kind: ArtifactKind) -> PathBuf {
    data.processing_directory().join(kind.as_str())
}

/// Name of the per-camera file in a multi-file output.
fn per_camera_file_name(reference_index: usize, extension: &str) -> String {
    format!("camera_{reference_index:04}.{extension}")
}

/// Texel containing normalized coordinates `uv` (v up) in an image of `size`.
fn uv_to_texel(uv: Vec2, size: UVec2) -> UVec2 {
    let x = (uv.x * size.x as f32).floor().clamp(0.0, (size.x - 1) as f32);
    let y = ((1.0 - uv.y) * size.y as f32)
        .floor()
        .clamp(0.0, (size.y - 1) as f32);
    UVec2::new(x as u32, y as u32)
}

/// Layer size and count of a texture-array artifact, checked against the
/// number of cameras.
fn texture_array_layout(
    stage: &'static str,
    artifact: &Artifact,
    camera_count: usize,
) -> Result<UVec3> {
    let resolution = artifact.summary.resolution.ok_or(ColibriError::StageFailed {
        stage,
        reason: format!("artifact '{}' has no resolution", artifact.kind),
    })?;
    if resolution.z as usize != camera_count {
        return Err(ColibriError::StageFailed {
            stage,
            reason: format!(
                "artifact '{}' has {} layers but the setup has {camera_count} cameras",
                artifact.kind, resolution.z
            ),
        });
    }
    Ok(resolution)
}

/// First file of an artifact.
fn artifact_file(stage: &'static str, artifact: &Artifact) -> Result<PathBuf> {
    artifact
        .paths
        .first()
        .cloned()
        .ok_or(ColibriError::StageFailed {
            stage,
            reason: format!("artifact '{}' has no files", artifact.kind),
        })
}
