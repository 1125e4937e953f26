//! Stage trait and related types.
//!
//! A [`Stage`] produces exactly one [`ArtifactKind`] from the camera setup, the
//! dataset and the artifacts of the stages it depends on. Stages are driven
//! cooperatively: [`Stage::begin`] starts the work and [`Stage::poll`] advances
//! it by one short step.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use colibri_core::{
    Artifact, ArtifactKind, ArtifactRegistry, CameraSetup, ColibriError, DataHandler,
    ProgressSink, Result,
};

/// Everything a stage may read while running.
pub struct StageContext<'a> {
    /// The dataset's cameras.
    pub setup: &'a CameraSetup,
    /// The dataset's paths.
    pub data: &'a DataHandler,
    /// Artifacts produced so far.
    pub artifacts: &'a ArtifactRegistry,
    /// Progress events for this stage.
    pub progress: &'a ProgressSink,
}

impl StageContext<'_> {
    /// Returns the ready artifact of the given kind.
    ///
    /// The orchestrator only runs a stage when its dependencies are ready, so
    /// a missing artifact is reported as a dependency error.
    pub fn dependency(&self, stage: &'static str, kind: ArtifactKind) -> Result<&Artifact> {
        self.artifacts
            .get(kind)
            .filter(|artifact| artifact.is_ready())
            .ok_or(ColibriError::DependencyNotSatisfied {
                stage,
                missing: kind,
            })
    }
}

/// Result of advancing a stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StagePoll {
    /// More work remains.
    Pending,
    /// The stage finished and produced its artifact.
    Complete(Artifact),
}

/// Lifecycle of a stage within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StageState {
    /// Not started in the current run.
    #[default]
    NotStarted,
    /// Running.
    Running,
    /// Finished; its artifact is ready.
    Succeeded,
    /// Stopped with an error; its artifact is not ready.
    Failed,
    /// Stopped on request; its artifact is not ready.
    Canceled,
}

impl StageState {
    /// Returns true for states a stage cannot leave within a run.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StageState::Succeeded | StageState::Failed | StageState::Canceled
        )
    }
}

/// One unit of the processing pipeline.
pub trait Stage: Send {
    /// Name used in logs, progress events and errors.
    fn name(&self) -> &'static str;

    /// The artifact this stage produces.
    fn kind(&self) -> ArtifactKind;

    /// Artifacts that must be ready before this stage may start.
    fn dependencies(&self) -> &'static [ArtifactKind];

    /// Files this stage writes, removed if it fails or is canceled.
    fn output_paths(&self, data: &DataHandler) -> Vec<PathBuf>;

    /// Starts the work. Called once per run, before any [`poll`](Self::poll).
    fn begin(&mut self, ctx: &StageContext<'_>) -> Result<()>;

    /// Advances the work by one step.
    fn poll(&mut self, ctx: &StageContext<'_>) -> Result<StagePoll>;

    /// Stops the work, terminating any subprocess. Must be idempotent.
    fn cancel(&mut self);
}

/// Removes files and directories, ignoring those that do not exist.
pub fn discard_outputs(paths: &[PathBuf]) {
    for path in paths {
        let removed = if path.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        match removed {
            Ok(()) => log::warn!("discarded partial output {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("failed to discard {}: {e}", path.display()),
        }
    }
}

/// Creates the parent directory of an output path.
pub fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}
