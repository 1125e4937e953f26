//! Parses datasets exported by mobile AR scanning apps.
//!
//! Each frame has a JSON pose file in `optimized_poses/` holding a row-major
//! camera-to-world matrix and the pinhole intrinsics, plus a color image in
//! `images/` whose name contains the pose file's stem.

use std::path::{Path, PathBuf};

use colibri_core::{
    CameraSetup, ColibriError, DataHandler, PoseRecord, Projection, Result, UVec2,
};

/// The color images whose names contain a pose file's stem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoseImageMatch {
    /// The pose file.
    pub pose_file: PathBuf,
    /// Matching image names, sorted. The first is used for the camera.
    pub images: Vec<String>,
}

impl PoseImageMatch {
    /// Image assigned to the camera.
    pub fn assigned_image(&self) -> Option<&str> {
        self.images.first().map(String::as_str)
    }

    /// Returns true when more than one image contains the stem.
    pub fn is_ambiguous(&self) -> bool {
        self.images.len() > 1
    }
}

/// Result of parsing a dataset.
#[derive(Debug, Clone)]
pub struct ParsedDataset {
    /// One camera per usable pose.
    pub setup: CameraSetup,
    /// Per usable pose, the images that matched it.
    pub matches: Vec<PoseImageMatch>,
}

impl ParsedDataset {
    /// Matches where the pose stem appears in several image names.
    pub fn ambiguous_matches(&self) -> impl Iterator<Item = &PoseImageMatch> {
        self.matches.iter().filter(|m| m.is_ambiguous())
    }
}

/// Builds a [`CameraSetup`] from a scanner-app export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScannerAppParser {
    /// Center the setup on the mean camera position after parsing.
    pub reposition_around_center: bool,
}

impl Default for ScannerAppParser {
    fn default() -> Self {
        Self {
            reposition_around_center: true,
        }
    }
}

/// Text before the first `.json` in a pose file name.
fn pose_stem(pose_file: &Path) -> String {
    let name = pose_file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.find(".json") {
        Some(end) => name[..end].to_string(),
        None => name,
    }
}

impl ScannerAppParser {
    /// Creates a parser.
    pub fn new(reposition_around_center: bool) -> Self {
        Self {
            reposition_around_center,
        }
    }

    /// Parses the dataset into a camera setup.
    ///
    /// A pose is usable when at least one image name contains its stem.
    /// Substring matching is kept as is: a stem may match several images, in
    /// which case the first in sorted order is used and the match is reported
    /// as ambiguous. Any malformed pose file aborts the parse.
    pub fn parse(&self, data: &DataHandler) -> Result<ParsedDataset> {
        let image_names: Vec<String> = data
            .color_image_files()?
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        if image_names.is_empty() {
            return Err(ColibriError::NoSourceImages(data.color_directory()));
        }

        let mut matches = Vec::new();
        for pose_file in data.pose_files()? {
            let stem = pose_stem(&pose_file);
            if stem.is_empty() {
                continue;
            }
            let images: Vec<String> = image_names
                .iter()
                .filter(|name| name.contains(stem.as_str()))
                .cloned()
                .collect();
            if images.is_empty() {
                log::debug!("no image matches pose file {}", pose_file.display());
                continue;
            }
            if images.len() > 1 {
                log::warn!(
                    "pose '{stem}' matches {} images ({}); using '{}'",
                    images.len(),
                    images.join(", "),
                    images[0]
                );
            }
            matches.push(PoseImageMatch { pose_file, images });
        }
        if matches.is_empty() {
            return Err(ColibriError::NoUsablePoses(data.poses_directory()));
        }

        let first_image = data.color_image_path(matches[0].images[0].as_str());
        let (width, height) = image::image_dimensions(&first_image)?;
        let pixel_resolution = UVec2::new(width, height);

        let mut setup = CameraSetup::new();
        for pose_match in &matches {
            let record = PoseRecord::load(&pose_match.pose_file)?;
            let (position, rotation) = record.camera_pose();
            let field_of_view = record.field_of_view(pixel_resolution);
            let camera = setup.add_camera_model(
                pose_match.images[0].clone(),
                pixel_resolution,
                position,
                rotation,
                Projection::Perspective { field_of_view },
            );
            camera.validate()?;
        }

        if self.reposition_around_center {
            let center = setup.reposition_around_center()?;
            log::info!("centered {} cameras, offset {center}", setup.len());
        }
        log::info!(
            "parsed {} cameras from {} ({} ambiguous matches)",
            setup.len(),
            data.data_directory().display(),
            matches.iter().filter(|m| m.is_ambiguous()).count()
        );
        Ok(ParsedDataset { setup, matches })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use colibri_core::Vec3;

    /// Writes a pose file: 90 degrees about Y, given translation, fx=fy=500.
    fn write_pose(dir: &Path, name: &str, translation: [f32; 3]) {
        let [tx, ty, tz] = translation;
        let json = format!(
            r#"{{
                "cameraPoseARFrame": [0, 0, 1, {tx}, 0, 1, 0, {ty}, -1, 0, 0, {tz}, 0, 0, 0, 1],
                "intrinsics": [500, 0, 320, 0, 500, 240, 0, 0, 1]
            }}"#
        );
        fs::write(dir.join(name), json).unwrap();
    }

    fn write_image(dir: &Path, name: &str) {
        image::RgbImage::new(8, 6).save(dir.join(name)).unwrap();
    }

    fn dataset() -> (tempfile::TempDir, DataHandler) {
        let dir = tempfile::tempdir().unwrap();
        let data = DataHandler::new(dir.path());
        fs::create_dir_all(data.color_directory()).unwrap();
        fs::create_dir_all(data.poses_directory()).unwrap();
        (dir, data)
    }

    #[test]
    fn test_pose_stem() {
        assert_eq!(pose_stem(Path::new("/p/frame_0001.json")), "frame_0001");
        assert_eq!(pose_stem(Path::new("frame_0001.json.json")), "frame_0001");
    }

    #[test]
    fn test_parse_substring_matching() {
        let (_dir, data) = dataset();
        write_pose(&data.poses_directory(), "frame_0001.json", [1.0, 2.0, 3.0]);
        write_pose(&data.poses_directory(), "frame_0002.json", [3.0, 2.0, 1.0]);
        write_pose(&data.poses_directory(), "frame_0003.json", [0.0, 0.0, 0.0]);
        write_image(&data.color_directory(), "frame_0001.jpg");
        write_image(&data.color_directory(), "frame_0001_copy.jpg");
        write_image(&data.color_directory(), "frame_0002.jpg");

        let parsed = ScannerAppParser::new(false).parse(&data).unwrap();
        // frame_0003 has no image and is skipped.
        assert_eq!(parsed.setup.len(), 2);
        assert_eq!(parsed.matches.len(), 2);

        let first = &parsed.matches[0];
        assert_eq!(first.images, vec!["frame_0001.jpg", "frame_0001_copy.jpg"]);
        assert!(first.is_ambiguous());
        assert_eq!(first.assigned_image(), Some("frame_0001.jpg"));
        assert_eq!(parsed.ambiguous_matches().count(), 1);

        let cameras = parsed.setup.cameras();
        assert_eq!(cameras[0].image_name, "frame_0001.jpg");
        assert_eq!(cameras[1].image_name, "frame_0002.jpg");
        assert_eq!(cameras[0].reference_index, 0);
        assert_eq!(cameras[1].reference_index, 1);
        assert_eq!(cameras[0].pixel_resolution, UVec2::new(8, 6));
        assert!((cameras[0].position - Vec3::new(1.0, 2.0, -3.0)).length() < 1e-5);

        // 8 px wide image with a 500 px focal length.
        let fov = cameras[0].projection.field_of_view().unwrap();
        assert!((fov.x - colibri_core::focal_length_to_field_of_view(500.0, 8.0)).abs() < 1e-4);
    }

    #[test]
    fn test_parse_repositions_around_mean() {
        let (_dir, data) = dataset();
        write_pose(&data.poses_directory(), "a.json", [1.0, 0.0, 0.0]);
        write_pose(&data.poses_directory(), "b.json", [3.0, 4.0, 2.0]);
        write_image(&data.color_directory(), "a.png");
        write_image(&data.color_directory(), "b.png");

        let parsed = ScannerAppParser::default().parse(&data).unwrap();
        assert!(parsed.setup.is_repositioned());
        assert!(parsed.setup.center().length() < 1e-5);
        assert!((parsed.setup.cameras()[0].position - Vec3::new(-1.0, -2.0, 1.0)).length() < 1e-5);
    }

    #[test]
    fn test_parse_errors() {
        let (_dir, data) = dataset();
        let err = ScannerAppParser::default().parse(&data).unwrap_err();
        assert!(matches!(err, ColibriError::NoSourceImages(_)));

        write_image(&data.color_directory(), "unrelated.jpg");
        write_pose(&data.poses_directory(), "frame_0001.json", [0.0; 3]);
        let err = ScannerAppParser::default().parse(&data).unwrap_err();
        assert!(matches!(err, ColibriError::NoUsablePoses(_)));

        write_image(&data.color_directory(), "frame_0001.jpg");
        fs::write(data.poses_directory().join("frame_0001.json"), "{\"intrinsics\": []}").unwrap();
        let err = ScannerAppParser::default().parse(&data).unwrap_err();
        assert!(matches!(err, ColibriError::MalformedPose { .. }));
    }
}
