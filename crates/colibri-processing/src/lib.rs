//! Dataset processing for colibri-rs.
//!
//! This crate turns a captured dataset into render-ready artifacts:
//! - Parsing scanner-app exports into a [`CameraSetup`](colibri_core::CameraSetup) ([`dataset`])
//! - Launching external tools and streaming their output ([`tool`], [`blender`])
//! - The processing stages, one per artifact kind ([`stages`])
//! - The [`Pipeline`] that runs stages in dependency order

// Image and mesh code intentionally uses casts for indices, pixels, and coordinates
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
// Documentation lints - internal functions don't need exhaustive panic/error docs
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]

pub mod blender;
pub mod dataset;
pub mod mesh;
pub mod pipeline;
pub mod stage;
pub mod stages;
pub mod tool;

pub use blender::{BlenderConnector, BlenderScript};
pub use dataset::{persist_camera_setup, ParsedDataset, PoseImageMatch, ScannerAppParser};
pub use mesh::TriangleMesh;
pub use pipeline::{Pipeline, RunOutcome, RunReport, RunStatus, StageFailure};
pub use stage::{Stage, StageContext, StagePoll, StageState};
pub use tool::{
    run_to_completion, CommandPoll, CommandReport, ExternalTool, RunningCommand, ToolRunOutcome,
};
