//! Rendering helpers for colibri-rs.
//!
//! This crate provides the CPU side of focal-surface blending:
//! - Focal surfaces placed and scaled from the global focal length
//! - Blending parameter blocks uploaded to the GPU
//! - Render sessions gated on processing artifacts

// Documentation lints - internal functions don't need exhaustive panic/error docs
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]

pub mod blending;
pub mod focal_surfaces;
pub mod session;

pub use blending::{BlendingMaterial, BlendingUniforms, SourceCameraUniform};
pub use focal_surfaces::{FocalSurface, FocalSurfaces};
pub use session::RenderSession;
