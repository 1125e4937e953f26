//! Processing artifacts and their readiness.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use glam::UVec3;
use serde::{Deserialize, Serialize};

/// The kinds of output produced by the processing stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ArtifactKind {
    /// Source color images stacked into one texture array.
    ColorTextureArray,
    /// One proxy mesh per source camera.
    PerViewMeshes,
    /// Simplified, UV-mapped global mesh.
    GlobalMesh,
    /// Depth maps of the global mesh, one layer per camera.
    DepthTextureArray,
    /// Texture map baked onto the global mesh.
    GlobalTextureMap,
    /// Per-camera meshes rebuilt from the depth texture array.
    PerViewMeshesFromDepth,
}

impl ArtifactKind {
    /// All kinds, in pipeline order.
    pub const ALL: [ArtifactKind; 6] = [
        ArtifactKind::ColorTextureArray,
        ArtifactKind::PerViewMeshes,
        ArtifactKind::GlobalMesh,
        ArtifactKind::DepthTextureArray,
        ArtifactKind::GlobalTextureMap,
        ArtifactKind::PerViewMeshesFromDepth,
    ];

    /// Short identifier used in logs and file names.
    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::ColorTextureArray => "color_texture_array",
            ArtifactKind::PerViewMeshes => "per_view_meshes",
            ArtifactKind::GlobalMesh => "global_mesh",
            ArtifactKind::DepthTextureArray => "depth_texture_array",
            ArtifactKind::GlobalTextureMap => "global_texture_map",
            ArtifactKind::PerViewMeshesFromDepth => "per_view_meshes_depth",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Size information recorded when an artifact is produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSummary {
    /// Total face count for mesh artifacts.
    pub face_count: Option<u64>,
    /// Total vertex count for mesh artifacts.
    pub vertex_count: Option<u64>,
    /// Width, height and layer count for texture artifacts.
    pub resolution: Option<UVec3>,
}

/// Readiness of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ArtifactState {
    /// Never produced, or its producing stage did not succeed.
    #[default]
    Empty,
    /// Produced by a stage that completed without fatal error.
    Ready,
    /// Was ready, but an upstream input has since changed.
    Invalidated,
}

/// An artifact: where it lives, how big it is and whether it can be used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Which stage output this is.
    pub kind: ArtifactKind,
    /// Files making up the artifact.
    pub paths: Vec<PathBuf>,
    /// Size information.
    pub summary: ArtifactSummary,
    /// Readiness.
    pub state: ArtifactState,
}

impl Artifact {
    /// Creates an empty, not-ready artifact.
    pub fn empty(kind: ArtifactKind) -> Self {
        Self {
            kind,
            paths: Vec::new(),
            summary: ArtifactSummary::default(),
            state: ArtifactState::Empty,
        }
    }

    /// Creates a ready artifact.
    pub fn ready(kind: ArtifactKind, paths: Vec<PathBuf>, summary: ArtifactSummary) -> Self {
        Self {
            kind,
            paths,
            summary,
            state: ArtifactState::Ready,
        }
    }

    /// Returns true if the artifact can be consumed.
    pub fn is_ready(&self) -> bool {
        self.state == ArtifactState::Ready
    }
}

/// Artifacts of one dataset, keyed by kind.
#[derive(Debug, Clone, Default)]
pub struct ArtifactRegistry {
    artifacts: HashMap<ArtifactKind, Artifact>,
}

impl ArtifactRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets an artifact by kind.
    pub fn get(&self, kind: ArtifactKind) -> Option<&Artifact> {
        self.artifacts.get(&kind)
    }

    /// Returns true if the artifact of the given kind is ready.
    pub fn is_ready(&self, kind: ArtifactKind) -> bool {
        self.artifacts.get(&kind).is_some_and(Artifact::is_ready)
    }

    /// Returns the state of an artifact; unknown kinds are empty.
    pub fn state(&self, kind: ArtifactKind) -> ArtifactState {
        self.artifacts
            .get(&kind)
            .map_or(ArtifactState::Empty, |artifact| artifact.state)
    }

    /// Registers an empty artifact for a scheduled stage, keeping any existing entry.
    pub fn schedule(&mut self, kind: ArtifactKind) {
        self.artifacts
            .entry(kind)
            .or_insert_with(|| Artifact::empty(kind));
    }

    /// Stores a produced artifact.
    pub fn insert(&mut self, artifact: Artifact) {
        self.artifacts.insert(artifact.kind, artifact);
    }

    /// Marks an artifact as no longer usable, keeping its files and summary.
    pub fn invalidate(&mut self, kind: ArtifactKind) -> bool {
        match self.artifacts.get_mut(&kind) {
            Some(artifact) if artifact.state == ArtifactState::Ready => {
                artifact.state = ArtifactState::Invalidated;
                true
            }
            _ => false,
        }
    }

    /// Resets an artifact to empty.
    pub fn clear(&mut self, kind: ArtifactKind) {
        self.artifacts.insert(kind, Artifact::empty(kind));
    }

    /// Returns an iterator over all artifacts.
    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_is_not_ready() {
        let mut registry = ArtifactRegistry::new();
        registry.schedule(ArtifactKind::GlobalMesh);
        assert_eq!(registry.state(ArtifactKind::GlobalMesh), ArtifactState::Empty);
        assert!(!registry.is_ready(ArtifactKind::GlobalMesh));
    }

    #[test]
    fn test_invalidate_keeps_files() {
        let mut registry = ArtifactRegistry::new();
        let summary = ArtifactSummary {
            face_count: Some(12),
            ..Default::default()
        };
        registry.insert(Artifact::ready(
            ArtifactKind::GlobalMesh,
            vec![PathBuf::from("global_mesh.obj")],
            summary,
        ));
        assert!(registry.is_ready(ArtifactKind::GlobalMesh));

        assert!(registry.invalidate(ArtifactKind::GlobalMesh));
        let artifact = registry.get(ArtifactKind::GlobalMesh).unwrap();
        assert_eq!(artifact.state, ArtifactState::Invalidated);
        assert_eq!(artifact.paths.len(), 1);
        assert_eq!(artifact.summary.face_count, Some(12));

        // Only ready artifacts can be invalidated.
        assert!(!registry.invalidate(ArtifactKind::GlobalMesh));
        assert!(!registry.invalidate(ArtifactKind::DepthTextureArray));
    }

    #[test]
    fn test_kind_names_are_unique() {
        let mut names: Vec<&str> = ArtifactKind::ALL.iter().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), ArtifactKind::ALL.len());
    }
}
