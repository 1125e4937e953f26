//! colibri-rs: image-based rendering from calibrated multi-camera datasets.
//!
//! A dataset is a directory of color images and per-frame camera poses. It is
//! parsed into a [`CameraSetup`], processed into render-ready artifacts
//! (texture arrays, per-view meshes, a simplified global mesh, depth maps and
//! a baked texture), then rendered by blending the source images on focal
//! surfaces placed at a tunable focal distance.
//!
//! # Quick Start
//!
//! ```no_run
//! use colibri::*;
//!
//! fn main() -> Result<()> {
//!     init_logging();
//!
//!     let mut dataset = DatasetContext::open("captures/room", Settings::default())?;
//!     dataset.parse_camera_setup()?;
//!
//!     let report = dataset.run_processing(&ArtifactKind::ALL)?;
//!     if !report.is_success() {
//!         eprintln!("processing stopped: {:?}", report.outcome);
//!         return Ok(());
//!     }
//!
//!     let mut session = dataset.begin_render(&[
//!         ArtifactKind::ColorTextureArray,
//!         ArtifactKind::PerViewMeshes,
//!     ])?;
//!     session.set_focal_length(2.5)?;
//!     Ok(())
//! }
//! ```
//!
//! # Frame loop integration
//!
//! [`DatasetContext::start_processing`] returns a progress channel and
//! [`DatasetContext::tick`] advances the run by one short step, so a render
//! loop can keep drawing while external tools run. Cancellation goes through
//! [`DatasetContext::cancel_token`].

mod context;

pub use context::DatasetContext;

// Re-export core types
pub use colibri_core::{
    error::{ColibriError, Result},
    Artifact, ArtifactKind, ArtifactRegistry, ArtifactState, ArtifactSummary, CameraModel,
    CameraSetup, CancelToken, DataHandler, DatasetStatus, FocalSettings, ProgressEvent,
    ProgressKind, ProgressSink, Projection, Quat, Settings, ToolSettings, Transform, UVec2, UVec3,
    Vec2, Vec3,
};

// Re-export processing types
pub use colibri_processing::{
    BlenderConnector, ExternalTool, ParsedDataset, Pipeline, PoseImageMatch, RunOutcome,
    RunReport, RunStatus, ScannerAppParser, Stage, StageFailure, StageState,
};

// Re-export render types
pub use colibri_render::{
    BlendingMaterial, BlendingUniforms, FocalSurface, FocalSurfaces, RenderSession,
};

/// Initializes logging from the `RUST_LOG` environment variable.
///
/// Calling it more than once has no effect.
pub fn init_logging() {
    if env_logger::try_init().is_ok() {
        log::info!("colibri-rs {} logging initialized", env!("CARGO_PKG_VERSION"));
    }
}
