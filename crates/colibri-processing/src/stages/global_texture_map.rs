//! Bakes the source images onto the global mesh's texture coordinates.

use std::path::PathBuf;

use colibri_core::{
    Artifact, ArtifactKind, ArtifactSummary, CameraModel, ColibriError, DataHandler, Result,
    UVec2, UVec3, Vec2, Vec3,
};
use image::{Rgb, RgbImage, Rgba, RgbaImage};

use super::depth_texture_array::{decode_depth, load_depth_image, DepthImage};
use super::raster::{rasterize_triangle, uv_to_pixel};
use super::{artifact_file, output_file, texture_array_layout, uv_to_texel};
use crate::mesh::TriangleMesh;
use crate::stage::{ensure_parent, Stage, StageContext, StagePoll};

const NAME: &str = "global_texture_map";

const FACES_PER_POLL: usize = 4096;

/// Relative slack when comparing a point's distance with the stored depth.
const VISIBILITY_TOLERANCE: f32 = 0.02;
/// Absolute slack, in meters.
const VISIBILITY_MARGIN: f32 = 0.01;

/// Colors every texel of `processing/global_texture_map.png` covered by the
/// global mesh's UV layout with the source camera that sees the surface point
/// most frontally. Occluded cameras are skipped using the depth texture array.
/// Uncovered texels stay transparent.
#[derive(Debug)]
pub struct GlobalTextureMapStage {
    resolution: u32,
    build: Option<Build>,
}

#[derive(Debug)]
struct Build {
    mesh: TriangleMesh,
    colors: RgbImage,
    color_layer: UVec2,
    depth: DepthImage,
    depth_layer: UVec2,
    texture: RgbaImage,
    next_face: usize,
}

struct Views<'a> {
    cameras: &'a [CameraModel],
    colors: &'a RgbImage,
    color_layer: UVec2,
    depth: &'a DepthImage,
    depth_layer: UVec2,
}

impl Views<'_> {
    /// The camera that sees `point` most frontally, with the point's image
    /// coordinates in that camera.
    fn best_view(&self, point: Vec3, normal: Vec3) -> Option<(usize, Vec2)> {
        let mut best = None;
        let mut best_score = 0.0;
        for (layer, camera) in self.cameras.iter().enumerate() {
            let Some(uv) = camera.project(point) else {
                continue;
            };
            let to_camera = camera.position - point;
            let distance = to_camera.length();
            if distance <= f32::EPSILON {
                continue;
            }
            let score = normal.dot(to_camera / distance).abs();
            if score <= best_score {
                continue;
            }
            let texel = uv_to_texel(uv, self.depth_layer);
            let stored = self
                .depth
                .get_pixel(texel.x, layer as u32 * self.depth_layer.y + texel.y)[0];
            let visible = decode_depth(stored).is_some_and(|surface| {
                distance <= surface * (1.0 + VISIBILITY_TOLERANCE) + VISIBILITY_MARGIN
            });
            if visible {
                best = Some((layer, uv));
                best_score = score;
            }
        }
        best
    }

    fn color(&self, layer: usize, uv: Vec2) -> Rgb<u8> {
        let texel = uv_to_texel(uv, self.color_layer);
        *self
            .colors
            .get_pixel(texel.x, layer as u32 * self.color_layer.y + texel.y)
    }
}

impl GlobalTextureMapStage {
    /// Creates the stage with a square texture of `resolution` pixels.
    pub fn new(resolution: u32) -> Self {
        Self {
            resolution: resolution.max(1),
            build: None,
        }
    }
}

fn bake_face(views: &Views<'_>, mesh: &TriangleMesh, face: UVec3, texture: &mut RgbaImage) {
    let corners = mesh.triangle(face);
    let Some(normal) = (corners[1] - corners[0])
        .cross(corners[2] - corners[0])
        .try_normalize()
    else {
        return;
    };
    let size = UVec2::new(texture.width(), texture.height());
    let points = [face.x, face.y, face.z].map(|i| uv_to_pixel(mesh.uvs[i as usize], size));
    rasterize_triangle(points, size, |x, y, weights| {
        let point = corners[0] * weights.x + corners[1] * weights.y + corners[2] * weights.z;
        if let Some((layer, uv)) = views.best_view(point, normal) {
            let Rgb([r, g, b]) = views.color(layer, uv);
            texture.put_pixel(x, y, Rgba([r, g, b, u8::MAX]));
        }
    });
}

impl Stage for GlobalTextureMapStage {
    fn name(&self) -> &'static str {
        NAME
    }

    fn kind(&self) -> ArtifactKind {
        ArtifactKind::GlobalTextureMap
    }

    fn dependencies(&self) -> &'static [ArtifactKind] {
        &[
            ArtifactKind::GlobalMesh,
            ArtifactKind::ColorTextureArray,
            ArtifactKind::DepthTextureArray,
        ]
    }

    fn output_paths(&self, data: &DataHandler) -> Vec<PathBuf> {
        vec![output_file(data, self.kind(), "png")]
    }

    fn begin(&mut self, ctx: &StageContext<'_>) -> Result<()> {
        let camera_count = ctx.setup.len();
        let mesh_artifact = ctx.dependency(NAME, ArtifactKind::GlobalMesh)?;
        let color_artifact = ctx.dependency(NAME, ArtifactKind::ColorTextureArray)?;
        let depth_artifact = ctx.dependency(NAME, ArtifactKind::DepthTextureArray)?;
        let color_layout = texture_array_layout(NAME, color_artifact, camera_count)?;
        let depth_layout = texture_array_layout(NAME, depth_artifact, camera_count)?;

        let mesh = TriangleMesh::read_obj(&artifact_file(NAME, mesh_artifact)?)?;
        if !mesh.has_uvs() {
            return Err(ColibriError::StageFailed {
                stage: NAME,
                reason: "the global mesh has no texture coordinates".to_string(),
            });
        }
        let colors = image::open(artifact_file(NAME, color_artifact)?)?.to_rgb8();
        let depth = load_depth_image(&artifact_file(NAME, depth_artifact)?)?;
        let color_layer = color_layout.truncate();
        let depth_layer = depth_layout.truncate();
        if colors.height() != color_layer.y * color_layout.z
            || depth.height() != depth_layer.y * depth_layout.z
        {
            return Err(ColibriError::StageFailed {
                stage: NAME,
                reason: "texture array files do not match their recorded size".to_string(),
            });
        }

        self.build = Some(Build {
            mesh,
            colors,
            color_layer,
            depth,
            depth_layer,
            texture: RgbaImage::new(self.resolution, self.resolution),
            next_face: 0,
        });
        Ok(())
    }

    fn poll(&mut self, ctx: &StageContext<'_>) -> Result<StagePoll> {
        let build = self.build.as_mut().ok_or(ColibriError::StageFailed {
            stage: NAME,
            reason: "polled before begin".to_string(),
        })?;
        let face_count = build.mesh.faces.len();

        if build.next_face < face_count {
            let end = (build.next_face + FACES_PER_POLL).min(face_count);
            let views = Views {
                cameras: ctx.setup.cameras(),
                colors: &build.colors,
                color_layer: build.color_layer,
                depth: &build.depth,
                depth_layer: build.depth_layer,
            };
            for &face in &build.mesh.faces[build.next_face..end] {
                bake_face(&views, &build.mesh, face, &mut build.texture);
            }
            build.next_face = end;
            ctx.progress.fraction(end as f32 / face_count as f32);
            return Ok(StagePoll::Pending);
        }

        let path = output_file(ctx.data, ArtifactKind::GlobalTextureMap, "png");
        ensure_parent(&path)?;
        build.texture.save(&path)?;
        let summary = ArtifactSummary {
            resolution: Some(UVec3::new(self.resolution, self.resolution, 1)),
            ..Default::default()
        };
        self.build = None;
        Ok(StagePoll::Complete(Artifact::ready(
            ArtifactKind::GlobalTextureMap,
            vec![path],
            summary,
        )))
    }

    fn cancel(&mut self) {
        self.build = None;
    }
}
