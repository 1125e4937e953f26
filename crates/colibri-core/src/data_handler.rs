//! Dataset directory layout and source-data status.
//!
//! ```text
//! <root>/
//!   images/                 source color images
//!   optimized_poses/        one pose file per frame
//!   camera_setup.json       setup description
//!   reconstruction/         reconstructed input mesh
//!   processing/             stage outputs
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// File name of the setup description in the dataset root.
pub const CAMERA_SETUP_FILE_NAME: &str = "camera_setup.json";
/// File name of the reconstruction input mesh.
pub const RECONSTRUCTION_MESH_FILE_NAME: &str = "meshed-delaunay.ply";

const COLOR_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];
const POSE_EXTENSIONS: [&str; 1] = ["json"];

/// Counts of what a dataset directory currently contains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DatasetStatus {
    /// Number of color images in the image directory.
    pub source_color_count: usize,
    /// Number of pose files.
    pub pose_file_count: usize,
    /// Whether a setup-description file exists.
    pub has_camera_setup: bool,
    /// Whether the reconstruction mesh exists.
    pub has_reconstruction_mesh: bool,
}

impl DatasetStatus {
    /// Returns true if processing may start.
    pub fn has_source_images(&self) -> bool {
        self.source_color_count > 0
    }
}

/// Resolves the paths of one dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataHandler {
    data_directory: PathBuf,
}

impl DataHandler {
    /// Creates a handler rooted at the given directory.
    pub fn new(data_directory: impl Into<PathBuf>) -> Self {
        Self {
            data_directory: data_directory.into(),
        }
    }

    /// Dataset root.
    pub fn data_directory(&self) -> &Path {
        &self.data_directory
    }

    /// Directory of the source color images.
    pub fn color_directory(&self) -> PathBuf {
        self.data_directory.join("images")
    }

    /// Directory of the per-frame pose files.
    pub fn poses_directory(&self) -> PathBuf {
        self.data_directory.join("optimized_poses")
    }

    /// Path of the setup-description file.
    pub fn camera_setup_path(&self) -> PathBuf {
        self.data_directory.join(CAMERA_SETUP_FILE_NAME)
    }

    /// Path of the reconstruction input mesh.
    pub fn reconstruction_mesh_path(&self) -> PathBuf {
        self.data_directory
            .join("reconstruction")
            .join(RECONSTRUCTION_MESH_FILE_NAME)
    }

    /// Directory where stages write their outputs.
    pub fn processing_directory(&self) -> PathBuf {
        self.data_directory.join("processing")
    }

    /// Path of a color image by file name.
    pub fn color_image_path(&self, image_name: &str) -> PathBuf {
        self.color_directory().join(image_name)
    }

    /// Color image files, sorted by name.
    pub fn color_image_files(&self) -> Result<Vec<PathBuf>> {
        files_by_extension(&self.color_directory(), &COLOR_EXTENSIONS)
    }

    /// Pose files, sorted by name.
    pub fn pose_files(&self) -> Result<Vec<PathBuf>> {
        files_by_extension(&self.poses_directory(), &POSE_EXTENSIONS)
    }

    /// Inspects the dataset directory.
    pub fn check_status_of_source_data(&self) -> Result<DatasetStatus> {
        let status = DatasetStatus {
            source_color_count: self.color_image_files()?.len(),
            pose_file_count: self.pose_files()?.len(),
            has_camera_setup: self.camera_setup_path().is_file(),
            has_reconstruction_mesh: self.reconstruction_mesh_path().is_file(),
        };
        log::debug!("dataset {}: {status:?}", self.data_directory.display());
        Ok(status)
    }
}

/// Lists the files of a directory with one of the given extensions.
///
/// A missing directory yields an empty list.
pub fn files_by_extension(directory: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let matches = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| extensions.iter().any(|e| ext.eq_ignore_ascii_case(e)));
        if matches && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Creates a directory, removing any previous content.
pub fn create_or_clear_directory(directory: &Path) -> io::Result<()> {
    if directory.exists() {
        fs::remove_dir_all(directory)?;
    }
    fs::create_dir_all(directory)
}
