//! Error types for colibri-rs.

use std::path::PathBuf;

use thiserror::Error;

use crate::artifact::ArtifactKind;

/// The main error type for colibri-rs operations.
#[derive(Error, Debug)]
pub enum ColibriError {
    /// The dataset has no source color images.
    #[error("no source color images found in '{0}'")]
    NoSourceImages(PathBuf),

    /// No pose file could be matched with a color image.
    #[error("no usable pose found in '{0}' (no pose file matches an image name)")]
    NoUsablePoses(PathBuf),

    /// A pose or intrinsics file could not be interpreted.
    #[error("malformed pose file '{path}': {reason}")]
    MalformedPose { path: PathBuf, reason: String },

    /// A camera model violates one of its invariants.
    #[error("invalid camera model {index}: {reason}")]
    InvalidCameraModel { index: usize, reason: String },

    /// Two camera models share a reference index.
    #[error("duplicate camera reference index {0}")]
    DuplicateReferenceIndex(usize),

    /// The setup-description file uses an unknown format version.
    #[error("unsupported camera setup version {0}")]
    UnsupportedSetupVersion(u32),

    /// An operation needs at least one camera.
    #[error("the camera setup has no cameras")]
    EmptyCameraSetup,

    /// Repositioning was requested on a setup that is already centered.
    #[error("camera setup has already been repositioned around its center")]
    AlreadyRepositioned,

    /// A stage was scheduled before its upstream artifacts were ready.
    #[error("stage '{stage}' cannot start: upstream artifact '{missing}' is not ready")]
    DependencyNotSatisfied {
        stage: &'static str,
        missing: ArtifactKind,
    },

    /// A stage declares a dependency that no earlier stage produces.
    #[error("stage '{stage}' depends on '{missing}', which no earlier stage produces")]
    InvalidPipelineWiring {
        stage: &'static str,
        missing: ArtifactKind,
    },

    /// Two stages produce the same artifact kind.
    #[error("artifact '{0}' is produced by more than one stage")]
    DuplicateStage(ArtifactKind),

    /// No stage produces the requested artifact kind.
    #[error("no stage produces artifact '{0}'")]
    StageNotFound(ArtifactKind),

    /// A pipeline run is already active for this dataset.
    #[error("a processing run is already in progress")]
    RunInProgress,

    /// An external tool exited with a failure or printed an error line.
    #[error("external tool '{tool}' failed running '{script}': {reason}")]
    ToolFailed {
        tool: String,
        script: String,
        reason: String,
        last_line: Option<String>,
    },

    /// An external tool could not be launched.
    #[error("failed to launch external tool '{tool}': {source}")]
    ToolLaunch {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// A mesh file could not be read.
    #[error("failed to read mesh '{path}': {reason}")]
    MeshFormat { path: PathBuf, reason: String },

    /// A stage could not produce its output.
    #[error("stage '{stage}' failed: {reason}")]
    StageFailed { stage: &'static str, reason: String },

    /// Writing the dataset layout failed; the original images were restored.
    #[error("failed to persist camera setup to '{path}': {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Relocated source images could not be moved back into place.
    #[error("failed to restore source images: they remain at '{relocated}' ({source})")]
    RestoreFailed {
        relocated: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Focal-surface information was stored twice without a teardown.
    #[error("focal surface information is already stored; tear down first")]
    AlreadyStored,

    /// Focal surfaces were updated before their information was stored.
    #[error("focal surface information has not been stored")]
    NotStored,

    /// Data size mismatch.
    #[error("data size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Image decoding or encoding error.
    #[error("image error: {0}")]
    ImageError(#[from] image::ImageError),
}

/// A specialized Result type for colibri-rs operations.
pub type Result<T> = std::result::Result<T, ColibriError>;
