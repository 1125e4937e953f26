//! Dataset parsing and persistence.

mod persist;
mod scanner_app;

pub use persist::{persist_camera_setup, relocated_images_path, RELOCATED_IMAGES_DIR};
pub use scanner_app::{ParsedDataset, PoseImageMatch, ScannerAppParser};
