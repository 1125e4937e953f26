//! Depth maps of the global mesh as seen from each source camera.

use std::path::{Path, PathBuf};

use colibri_core::{
    Artifact, ArtifactKind, ArtifactSummary, CameraModel, ColibriError, DataHandler, Result,
    UVec2, UVec3, Vec2, Vec3,
};
use image::{ImageBuffer, Luma};

use super::raster::{rasterize_triangle, uv_to_pixel};
use super::{artifact_file, output_file};
use crate::mesh::TriangleMesh;
use crate::stage::{ensure_parent, Stage, StageContext, StagePoll};

const NAME: &str = "depth_texture_array";

/// Stored depth units per meter. A stored value of zero means no surface.
pub const DEPTH_UNITS_PER_METER: f32 = 1000.0;

/// A 16-bit grayscale image holding stacked depth layers.
pub type DepthImage = ImageBuffer<Luma<u16>, Vec<u16>>;

/// Encodes a distance along the viewing ray, in meters.
pub fn encode_depth(distance: f32) -> u16 {
    if !distance.is_finite() || distance <= 0.0 {
        return 0;
    }
    (distance * DEPTH_UNITS_PER_METER)
        .round()
        .clamp(1.0, f32::from(u16::MAX)) as u16
}

/// Decodes a stored depth value; `None` where no surface was seen.
pub fn decode_depth(value: u16) -> Option<f32> {
    (value != 0).then(|| f32::from(value) / DEPTH_UNITS_PER_METER)
}

/// Loads a depth texture array.
pub fn load_depth_image(path: &Path) -> Result<DepthImage> {
    Ok(image::open(path)?.into_luma16())
}

/// Ray-casts the global mesh from every camera into
/// `processing/depth_texture_array.png`: square layers stacked vertically,
/// each pixel holding the distance from the camera center to the nearest
/// surface along the pixel's ray.
///
/// One camera is rendered per poll.
#[derive(Debug)]
pub struct DepthTextureArrayStage {
    resolution: u32,
    build: Option<Build>,
}

#[derive(Debug)]
struct Build {
    mesh: TriangleMesh,
    canvas: DepthImage,
    next: usize,
}

impl DepthTextureArrayStage {
    /// Creates the stage with square layers of `resolution` pixels.
    pub fn new(resolution: u32) -> Self {
        Self {
            resolution: resolution.max(2),
            build: None,
        }
    }
}

/// Distance in front of a perspective camera where triangles are clipped.
const NEAR_PLANE: f32 = 1e-3;

/// Clips a triangle to the half space in front of a perspective camera's near
/// plane. Returns a convex polygon with zero, three or four corners.
fn clip_to_near_plane(camera: &CameraModel, corners: [Vec3; 3]) -> Vec<Vec3> {
    if camera.is_omnidirectional() {
        return corners.to_vec();
    }
    let forward = camera.forward();
    let signed = corners.map(|corner| forward.dot(corner - camera.position) - NEAR_PLANE);
    let mut polygon = Vec::with_capacity(4);
    for i in 0..3 {
        let j = (i + 1) % 3;
        let (a, b) = (corners[i], corners[j]);
        let (da, db) = (signed[i], signed[j]);
        if da >= 0.0 {
            polygon.push(a);
        }
        if (da >= 0.0) != (db >= 0.0) {
            polygon.push(a + (b - a) * (da / (da - db)));
        }
    }
    polygon
}

/// Distance to the nearest surface along every pixel ray of one camera.
///
/// Rows run top to bottom. Pixels without a surface hold infinity.
pub fn render_depth(camera: &CameraModel, mesh: &TriangleMesh, size: UVec2) -> Vec<f32> {
    let mut depth = vec![f32::INFINITY; (size.x * size.y) as usize];
    for &face in &mesh.faces {
        let corners = mesh.triangle(face);
        let normal = (corners[1] - corners[0]).cross(corners[2] - corners[0]);
        if normal.length_squared() < 1e-12 {
            continue;
        }
        let clipped = clip_to_near_plane(camera, corners);
        let Some(uvs) = clipped
            .iter()
            .map(|&corner| camera.project_unbounded(corner))
            .collect::<Option<Vec<Vec2>>>()
        else {
            continue;
        };
        if uvs.len() < 3 {
            continue;
        }
        if camera.is_omnidirectional() {
            let min = uvs.iter().fold(f32::INFINITY, |m, uv| m.min(uv.x));
            let max = uvs.iter().fold(f32::NEG_INFINITY, |m, uv| m.max(uv.x));
            // Triangles across the longitude seam would wrap around the image.
            if max - min > 0.5 {
                continue;
            }
        }
        // Clipping keeps the polygon in the triangle's plane.
        let plane_distance = normal.dot(corners[0] - camera.position);
        let points: Vec<Vec2> = uvs.iter().map(|&uv| uv_to_pixel(uv, size)).collect();
        for k in 1..points.len() - 1 {
            let fan = [points[0], points[k], points[k + 1]];
            rasterize_triangle(fan, size, |x, y, _| {
                let direction = camera.ray_direction(CameraModel::pixel_to_uv(x, y, size));
                let denominator = normal.dot(direction);
                if denominator.abs() < 1e-9 {
                    return;
                }
                let t = plane_distance / denominator;
                let nearest = &mut depth[(y * size.x + x) as usize];
                if t > 0.0 && t < *nearest {
                    *nearest = t;
                }
            });
        }
    }
    depth
}

impl Stage for DepthTextureArrayStage {
    fn name(&self) -> &'static str {
        NAME
    }

    fn kind(&self) -> ArtifactKind {
        ArtifactKind::DepthTextureArray
    }

    fn dependencies(&self) -> &'static [ArtifactKind] {
        &[ArtifactKind::GlobalMesh]
    }

    fn output_paths(&self, data: &DataHandler) -> Vec<PathBuf> {
        vec![output_file(data, self.kind(), "png")]
    }

    fn begin(&mut self, ctx: &StageContext<'_>) -> Result<()> {
        let global_mesh = ctx.dependency(NAME, ArtifactKind::GlobalMesh)?;
        let mesh = TriangleMesh::read_obj(&artifact_file(NAME, global_mesh)?)?;
        if ctx.setup.is_empty() {
            return Err(ColibriError::EmptyCameraSetup);
        }
        log::info!(
            "rendering {} depth layers of {}px from {} triangles",
            ctx.setup.len(),
            self.resolution,
            mesh.face_count()
        );
        self.build = Some(Build {
            mesh,
            canvas: DepthImage::new(self.resolution, self.resolution * ctx.setup.len() as u32),
            next: 0,
        });
        Ok(())
    }

    fn poll(&mut self, ctx: &StageContext<'_>) -> Result<StagePoll> {
        let build = self.build.as_mut().ok_or(ColibriError::StageFailed {
            stage: NAME,
            reason: "polled before begin".to_string(),
        })?;
        let cameras = ctx.setup.cameras();
        let size = UVec2::splat(self.resolution);

        if let Some(camera) = cameras.get(build.next) {
            let depth = render_depth(camera, &build.mesh, size);
            let row_offset = size.y * build.next as u32;
            for (index, distance) in depth.iter().enumerate() {
                let (x, y) = (index as u32 % size.x, index as u32 / size.x);
                build
                    .canvas
                    .put_pixel(x, row_offset + y, Luma([encode_depth(*distance)]));
            }
            build.next += 1;
            ctx.progress.fraction(build.next as f32 / cameras.len() as f32);
            return Ok(StagePoll::Pending);
        }

        let path = output_file(ctx.data, ArtifactKind::DepthTextureArray, "png");
        ensure_parent(&path)?;
        build.canvas.save(&path)?;
        let summary = ArtifactSummary {
            resolution: Some(UVec3::new(size.x, size.y, cameras.len() as u32)),
            ..Default::default()
        };
        self.build = None;
        Ok(StagePoll::Complete(Artifact::ready(
            ArtifactKind::DepthTextureArray,
            vec![path],
            summary,
        )))
    }

    fn cancel(&mut self) {
        self.build = None;
    }
}
