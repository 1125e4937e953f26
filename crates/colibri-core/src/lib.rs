//! Core data model for colibri-rs.
//!
//! This crate provides the types shared by the processing and rendering crates:
//! - [`CameraModel`] and [`CameraSetup`] for calibrated multi-camera datasets
//! - Pose and intrinsics conversion from AR-tracking exports ([`pose`])
//! - [`DataHandler`] for the dataset directory layout
//! - [`Artifact`]s produced by processing stages, and their readiness
//! - Progress events, cancellation and configuration

// Documentation lints - internal functions don't need exhaustive panic/error docs
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
// Builder patterns return Self which doesn't need must_use
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]

pub mod artifact;
pub mod camera_model;
pub mod camera_setup;
pub mod data_handler;
pub mod error;
pub mod options;
pub mod pose;
pub mod progress;
pub mod transform;

pub use artifact::{Artifact, ArtifactKind, ArtifactRegistry, ArtifactState, ArtifactSummary};
pub use camera_model::{
    field_of_view_to_focal_length, focal_length_to_field_of_view, CameraModel, Projection,
};
pub use camera_setup::CameraSetup;
pub use data_handler::{DataHandler, DatasetStatus};
pub use error::{ColibriError, Result};
pub use options::{FocalSettings, Settings, ToolSettings};
pub use pose::PoseRecord;
pub use progress::{CancelToken, ProgressEvent, ProgressKind, ProgressSink};
pub use transform::Transform;

// Re-export glam types for convenience
pub use glam::{Mat4, Quat, UVec2, UVec3, Vec2, Vec3, Vec4};
