//! Triangle meshes exchanged between stages.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use colibri_core::{ArtifactSummary, ColibriError, Result, Vec2, Vec3};
use glam::UVec3;

/// An indexed triangle mesh with optional per-vertex texture coordinates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriangleMesh {
    /// Vertex positions.
    pub vertices: Vec<Vec3>,
    /// Texture coordinates, either empty or one per vertex.
    pub uvs: Vec<Vec2>,
    /// Triangles as vertex indices.
    pub faces: Vec<UVec3>,
}

impl TriangleMesh {
    /// Creates an empty mesh.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of triangles.
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Returns true if every vertex has a texture coordinate.
    pub fn has_uvs(&self) -> bool {
        !self.vertices.is_empty() && self.uvs.len() == self.vertices.len()
    }

    /// Face and vertex counts.
    pub fn summary(&self) -> ArtifactSummary {
        ArtifactSummary {
            face_count: Some(self.faces.len() as u64),
            vertex_count: Some(self.vertices.len() as u64),
            resolution: None,
        }
    }

    /// Positions of the three corners of a triangle.
    pub fn triangle(&self, face: UVec3) -> [Vec3; 3] {
        [
            self.vertices[face.x as usize],
            self.vertices[face.y as usize],
            self.vertices[face.z as usize],
        ]
    }

    /// Loads an OBJ file, triangulating polygons and merging all objects.
    #[allow(clippy::cast_possible_truncation)]
    pub fn read_obj(path: &Path) -> Result<Self> {
        let (models, _materials) = tobj::load_obj(
            path,
            &tobj::LoadOptions {
                triangulate: true,
                single_index: true,
                ..Default::default()
            },
        )
        .map_err(|e| ColibriError::MeshFormat {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut mesh = Self::new();
        for model in models {
            let source = model.mesh;
            let offset = mesh.vertices.len() as u32;
            let count = source.positions.len() / 3;
            mesh.vertices.extend(
                source
                    .positions
                    .chunks_exact(3)
                    .map(|p| Vec3::new(p[0], p[1], p[2])),
            );
            if source.texcoords.len() / 2 == count {
                mesh.uvs
                    .extend(source.texcoords.chunks_exact(2).map(|t| Vec2::new(t[0], t[1])));
            }
            mesh.faces.extend(
                source
                    .indices
                    .chunks_exact(3)
                    .map(|f| UVec3::new(f[0] + offset, f[1] + offset, f[2] + offset)),
            );
        }
        if mesh.uvs.len() != mesh.vertices.len() {
            mesh.uvs.clear();
        }
        Ok(mesh)
    }

    /// Writes the mesh as OBJ, with texture coordinates when present.
    pub fn write_obj(&self, path: &Path) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        for v in &self.vertices {
            writeln!(out, "v {} {} {}", v.x, v.y, v.z)?;
        }
        let with_uvs = self.has_uvs();
        if with_uvs {
            for t in &self.uvs {
                writeln!(out, "vt {} {}", t.x, t.y)?;
            }
        }
        for f in &self.faces {
            let (a, b, c) = (f.x + 1, f.y + 1, f.z + 1);
            if with_uvs {
                writeln!(out, "f {a}/{a} {b}/{b} {c}/{c}")?;
            } else {
                writeln!(out, "f {a} {b} {c}")?;
            }
        }
        out.flush()?;
        Ok(())
    }

    /// A camera-facing quad in the XY plane at `z = distance`, spanning
    /// `half_extent` on each side, with texture coordinates covering `[0, 1]`.
    pub fn quad(half_extent: Vec2, distance: f32) -> Self {
        let corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];
        Self {
            vertices: corners
                .iter()
                .map(|&(x, y)| Vec3::new(x * half_extent.x, y * half_extent.y, distance))
                .collect(),
            uvs: corners
                .iter()
                .map(|&(x, y)| Vec2::new((x + 1.0) * 0.5, (y + 1.0) * 0.5))
                .collect(),
            faces: vec![UVec3::new(0, 2, 1), UVec3::new(0, 3, 2)],
        }
    }

    /// A UV sphere with equirectangular texture coordinates, longitude zero
    /// facing +Z.
    #[allow(clippy::cast_precision_loss)]
    pub fn uv_sphere(radius: f32, longitude_segments: u32, latitude_segments: u32) -> Self {
        use std::f32::consts::{PI, TAU};

        let columns = longitude_segments.max(3);
        let rows = latitude_segments.max(2);
        let mut mesh = Self::new();
        for row in 0..=rows {
            let v = row as f32 / rows as f32;
            let latitude = (v - 0.5) * PI;
            for column in 0..=columns {
                let u = column as f32 / columns as f32;
                let longitude = (u - 0.5) * TAU;
                mesh.vertices.push(
                    Vec3::new(
                        latitude.cos() * longitude.sin(),
                        latitude.sin(),
                        latitude.cos() * longitude.cos(),
                    ) * radius,
                );
                mesh.uvs.push(Vec2::new(u, v));
            }
        }
        let stride = columns + 1;
        for row in 0..rows {
            for column in 0..columns {
                let a = row * stride + column;
                let b = a + 1;
                let c = a + stride;
                let d = c + 1;
                mesh.faces.push(UVec3::new(a, b, d));
                mesh.faces.push(UVec3::new(a, d, c));
            }
        }
        mesh
    }
}

/// Element counts from a PLY header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlySummary {
    /// Number of vertices.
    pub vertex_count: u64,
    /// Number of faces.
    pub face_count: u64,
}

/// Reads the vertex and face counts of a PLY file from its header.
pub fn summarize_ply(path: &Path) -> Result<PlySummary> {
    let parser = ply_rs::parser::Parser::<ply_rs::ply::DefaultElement>::new();
    let mut reader = BufReader::new(File::open(path)?);
    let header = parser
        .read_header(&mut reader)
        .map_err(|e| ColibriError::MeshFormat {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    let count = |name: &str| header.elements.get(name).map_or(0, |e| e.count as u64);
    Ok(PlySummary {
        vertex_count: count("vertex"),
        face_count: count("face"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_obj_write_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quad.obj");
        let quad = TriangleMesh::quad(Vec2::new(0.5, 0.25), 1.0);
        quad.write_obj(&path).unwrap();

        let loaded = TriangleMesh::read_obj(&path).unwrap();
        assert_eq!(loaded.face_count(), 2);
        assert_eq!(loaded.vertices.len(), 4);
        assert!(loaded.has_uvs());
        // Vertex order may change on load.
        for v in &loaded.vertices {
            assert!(quad.vertices.iter().any(|q| (*q - *v).length() < 1e-6));
        }
    }

    #[test]
    fn test_read_obj_triangulates_polygons() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("square.obj");
        std::fs::write(&path, "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nf 1 2 3 4\n").unwrap();
        let mesh = TriangleMesh::read_obj(&path).unwrap();
        assert_eq!(mesh.face_count(), 2);
        assert!(!mesh.has_uvs());
        assert_eq!(mesh.summary().vertex_count, Some(4));
    }

    #[test]
    fn test_read_obj_missing_file() {
        let err = TriangleMesh::read_obj(Path::new("/nonexistent/mesh.obj")).unwrap_err();
        assert!(matches!(err, ColibriError::MeshFormat { .. }));
    }

    #[test]
    fn test_uv_sphere() {
        let sphere = TriangleMesh::uv_sphere(2.0, 16, 8);
        assert_eq!(sphere.face_count(), 16 * 8 * 2);
        assert!(sphere
            .vertices
            .iter()
            .all(|v| (v.length() - 2.0).abs() < 1e-5));
    }

    #[test]
    fn test_summarize_ply() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mesh.ply");
        std::fs::write(
            &path,
            "ply\nformat ascii 1.0\nelement vertex 3\nproperty float x\nproperty float y\n\
             property float z\nelement face 1\nproperty list uchar int vertex_indices\nend_header\n\
             0 0 0\n1 0 0\n0 1 0\n3 0 1 2\n",
        )
        .unwrap();
        let summary = summarize_ply(&path).unwrap();
        assert_eq!(summary.vertex_count, 3);
        assert_eq!(summary.face_count, 1);
    }
}
