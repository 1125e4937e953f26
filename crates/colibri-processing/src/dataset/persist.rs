//! Writing a parsed setup into the dataset's standard layout.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use colibri_core::{CameraSetup, ColibriError, DataHandler, Result};

/// Name of the sibling directory holding the images while the layout is written.
pub const RELOCATED_IMAGES_DIR: &str = "images.relocated";

/// Path the color images are moved to during persistence.
pub fn relocated_images_path(data: &DataHandler) -> PathBuf {
    data.data_directory().join(RELOCATED_IMAGES_DIR)
}

/// Writes the setup-description file and the standard directory layout.
///
/// The color-image directory is moved aside first and always moved back, even
/// when writing fails. If it cannot be moved back, the error names the
/// directory where the images remain.
pub fn persist_camera_setup(data: &DataHandler, setup: &CameraSetup) -> Result<()> {
    let images = data.color_directory();
    let relocated = relocated_images_path(data);
    if relocated.exists() {
        return Err(ColibriError::Persistence {
            path: relocated.clone(),
            source: io::Error::new(
                io::ErrorKind::AlreadyExists,
                "a previous relocation was not restored",
            ),
        });
    }

    let moved = images.is_dir();
    if moved {
        fs::rename(&images, &relocated).map_err(|source| ColibriError::Persistence {
            path: images.clone(),
            source,
        })?;
        log::debug!("relocated {} to {}", images.display(), relocated.display());
    }

    let written = write_layout(data, setup);

    if moved {
        restore_images(&images, &relocated)
            .map_err(|source| ColibriError::RestoreFailed {
                relocated: relocated.clone(),
                source,
            })?;
    }

    match written {
        Err(ColibriError::IoError(source)) => Err(ColibriError::Persistence {
            path: data.camera_setup_path(),
            source,
        }),
        other => other,
    }
}

fn write_layout(data: &DataHandler, setup: &CameraSetup) -> Result<()> {
    fs::create_dir_all(data.color_directory())?;
    fs::create_dir_all(data.processing_directory())?;
    setup.save(&data.camera_setup_path())
}

fn restore_images(images: &Path, relocated: &Path) -> io::Result<()> {
    // Only an empty placeholder may be replaced.
    if images.is_dir() {
        fs::remove_dir(images)?;
    }
    fs::rename(relocated, images)?;
    log::debug!("restored {}", images.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use colibri_core::{Projection, Quat, UVec2, Vec2, Vec3};

    fn setup() -> CameraSetup {
        let mut setup = CameraSetup::new();
        setup.add_camera_model(
            "a.jpg",
            UVec2::new(4, 3),
            Vec3::new(1.0, 0.0, 0.0),
            Quat::IDENTITY,
            Projection::Perspective {
                field_of_view: Vec2::new(60.0, 45.0),
            },
        );
        setup
    }

    fn dataset_with_image() -> (tempfile::TempDir, DataHandler) {
        let dir = tempfile::tempdir().unwrap();
        let data = DataHandler::new(dir.path());
        fs::create_dir_all(data.color_directory()).unwrap();
        fs::write(data.color_image_path("a.jpg"), b"pixels").unwrap();
        (dir, data)
    }

    #[test]
    fn test_persist_writes_setup_and_keeps_images() {
        let (_dir, data) = dataset_with_image();
        let setup = setup();
        persist_camera_setup(&data, &setup).unwrap();

        assert_eq!(CameraSetup::load(&data.camera_setup_path()).unwrap(), setup);
        assert_eq!(fs::read(data.color_image_path("a.jpg")).unwrap(), b"pixels");
        assert!(data.processing_directory().is_dir());
        assert!(!relocated_images_path(&data).exists());
    }

    #[test]
    fn test_failed_write_restores_images() {
        let (_dir, data) = dataset_with_image();
        // A directory in place of the setup file makes the final rename fail.
        fs::create_dir_all(data.camera_setup_path().join("blocker")).unwrap();

        let err = persist_camera_setup(&data, &setup()).unwrap_err();
        assert!(matches!(err, ColibriError::Persistence { .. }), "{err:?}");
        assert_eq!(fs::read(data.color_image_path("a.jpg")).unwrap(), b"pixels");
        assert!(!relocated_images_path(&data).exists());
    }

    #[test]
    fn test_stale_relocation_is_refused() {
        let (_dir, data) = dataset_with_image();
        fs::create_dir_all(relocated_images_path(&data)).unwrap();

        let err = persist_camera_setup(&data, &setup()).unwrap_err();
        assert!(matches!(err, ColibriError::Persistence { .. }));
        assert!(data.color_image_path("a.jpg").is_file());
    }
}
