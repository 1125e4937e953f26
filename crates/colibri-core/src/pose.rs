//! Conversion of AR-tracking poses and intrinsics into the rendering convention.
//!
//! Pose files store a row-major 4x4 camera-to-world matrix in the tracker's
//! right-handed convention and a row-major 3x3 intrinsics matrix. The renderer
//! uses a left-handed convention, so the translation's z component and the
//! rotation's x and w components change sign.

use std::path::Path;

use glam::{Quat, UVec2, Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::camera_model::focal_length_to_field_of_view;
use crate::error::{ColibriError, Result};

/// One frame's pose and intrinsics as exported by the scanning app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseRecord {
    /// Row-major camera-to-world matrix.
    #[serde(rename = "cameraPoseARFrame")]
    pub camera_pose_ar_frame: Vec<f32>,
    /// Row-major intrinsics matrix: fx, _, cx, _, fy, cy, _, _, scale.
    pub intrinsics: Vec<f32>,
}

impl PoseRecord {
    /// Parses a pose record and checks its array sizes.
    pub fn from_json(json: &str, path: &Path) -> Result<Self> {
        let record: Self = serde_json::from_str(json).map_err(|e| ColibriError::MalformedPose {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        record.validate(path)?;
        Ok(record)
    }

    /// Reads a pose record from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json, path)
    }

    fn validate(&self, path: &Path) -> Result<()> {
        let malformed = |reason: String| ColibriError::MalformedPose {
            path: path.to_path_buf(),
            reason,
        };
        if self.camera_pose_ar_frame.len() != 16 {
            return Err(malformed(format!(
                "cameraPoseARFrame has {} values, expected 16",
                self.camera_pose_ar_frame.len()
            )));
        }
        if self.intrinsics.len() != 9 {
            return Err(malformed(format!(
                "intrinsics has {} values, expected 9",
                self.intrinsics.len()
            )));
        }
        if self
            .camera_pose_ar_frame
            .iter()
            .chain(&self.intrinsics)
            .any(|v| !v.is_finite())
        {
            return Err(malformed("non-finite value".to_string()));
        }
        if self.intrinsics[8] == 0.0 || self.intrinsics[0] == 0.0 || self.intrinsics[4] == 0.0 {
            return Err(malformed("focal lengths and scale must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Returns the pose matrix as rows.
    pub fn pose_rows(&self) -> [[f32; 4]; 4] {
        let m = &self.camera_pose_ar_frame;
        [
            [m[0], m[1], m[2], m[3]],
            [m[4], m[5], m[6], m[7]],
            [m[8], m[9], m[10], m[11]],
            [m[12], m[13], m[14], m[15]],
        ]
    }

    /// Camera position and rotation in the rendering convention.
    pub fn camera_pose(&self) -> (Vec3, Quat) {
        let rows = self.pose_rows();
        let position = Vec3::new(rows[0][3], rows[1][3], rows[2][3]);
        let rotation = quaternion_from_rotation_rows(&rows);
        to_engine_convention(position, rotation)
    }

    /// Focal lengths in pixels, after dividing by the intrinsics scale.
    pub fn focal_lengths(&self) -> Vec2 {
        let scale = self.intrinsics[8];
        Vec2::new(self.intrinsics[0] / scale, self.intrinsics[4] / scale)
    }

    /// Horizontal and vertical field of view, in degrees, for the given image size.
    #[allow(clippy::cast_precision_loss)]
    pub fn field_of_view(&self, pixel_resolution: UVec2) -> Vec2 {
        let focal = self.focal_lengths();
        Vec2::new(
            focal_length_to_field_of_view(focal.x, pixel_resolution.x as f32),
            focal_length_to_field_of_view(focal.y, pixel_resolution.y as f32),
        )
    }
}

fn sign(value: f32) -> f32 {
    if value >= 0.0 {
        1.0
    } else {
        -1.0
    }
}

/// Extracts a rotation from the upper 3x3 block of a row-major matrix.
///
/// Each component magnitude comes from the diagonal; signs are copied from the
/// antisymmetric part with `w` kept non-negative.
pub fn quaternion_from_rotation_rows(m: &[[f32; 4]; 4]) -> Quat {
    let w = (1.0 + m[0][0] + m[1][1] + m[2][2]).max(0.0).sqrt() / 2.0;
    let x = (1.0 + m[0][0] - m[1][1] - m[2][2]).max(0.0).sqrt() / 2.0;
    let y = (1.0 - m[0][0] + m[1][1] - m[2][2]).max(0.0).sqrt() / 2.0;
    let z = (1.0 - m[0][0] - m[1][1] + m[2][2]).max(0.0).sqrt() / 2.0;
    let x = x * sign(x * (m[2][1] - m[1][2]));
    let y = y * sign(y * (m[0][2] - m[2][0]));
    let z = z * sign(z * (m[1][0] - m[0][1]));
    Quat::from_xyzw(x, y, z, w)
}

/// Flips a pose between the tracker and rendering handedness.
///
/// Negates the z translation and the x and w quaternion components. Applying
/// it twice returns the input.
pub fn to_engine_convention(position: Vec3, rotation: Quat) -> (Vec3, Quat) {
    let [x, y, z, w] = rotation.to_array();
    (
        Vec3::new(position.x, position.y, -position.z),
        Quat::from_xyzw(-x, y, z, -w),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_1_SQRT_2;

    fn record(pose: [f32; 16]) -> PoseRecord {
        PoseRecord {
            camera_pose_ar_frame: pose.to_vec(),
            intrinsics: vec![1500.0, 0.0, 960.0, 0.0, 1500.0, 720.0, 0.0, 0.0, 1.0],
        }
    }

    #[test]
    fn test_known_pose_pair() {
        // 90 degrees about +Y, translated to (1, 2, 3).
        let rec = record([
            0.0, 0.0, 1.0, 1.0, //
            0.0, 1.0, 0.0, 2.0, //
            -1.0, 0.0, 0.0, 3.0, //
            0.0, 0.0, 0.0, 1.0,
        ]);
        let (position, rotation) = rec.camera_pose();
        assert_eq!(position, Vec3::new(1.0, 2.0, -3.0));
        let expected = Quat::from_xyzw(0.0, FRAC_1_SQRT_2, 0.0, -FRAC_1_SQRT_2);
        assert!((Vec3::from(rotation.xyz()) - Vec3::from(expected.xyz())).length() < 1e-6);
        assert!((rotation.w - expected.w).abs() < 1e-6);
    }

    #[test]
    fn test_extraction_matches_glam() {
        let q = Quat::from_euler(glam::EulerRot::YXZ, 0.4, -0.2, 1.1);
        let m = glam::Mat3::from_quat(q);
        let rows = [
            [m.x_axis.x, m.y_axis.x, m.z_axis.x, 0.0],
            [m.x_axis.y, m.y_axis.y, m.z_axis.y, 0.0],
            [m.x_axis.z, m.y_axis.z, m.z_axis.z, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ];
        let extracted = quaternion_from_rotation_rows(&rows);
        // q and -q are the same rotation.
        assert!(extracted.dot(q).abs() > 1.0 - 1e-5);
    }

    #[test]
    fn test_flip_flip_identity() {
        let position = Vec3::new(0.5, -1.5, 2.25);
        let rotation = Quat::from_xyzw(0.1, 0.2, 0.3, 0.9).normalize();
        let once = to_engine_convention(position, rotation);
        assert_ne!(once.0, position);
        let twice = to_engine_convention(once.0, once.1);
        assert_eq!(twice.0, position);
        assert_eq!(twice.1, rotation);
    }

    #[test]
    fn test_field_of_view_from_intrinsics() {
        let mut rec = record([0.0; 16]);
        rec.intrinsics = vec![1000.0, 0.0, 500.0, 0.0, 500.0, 250.0, 0.0, 0.0, 2.0];
        // 500 px focal over 1000 px width, 250 px focal over 500 px height.
        let fov = rec.field_of_view(UVec2::new(1000, 500));
        assert!((fov.x - 90.0).abs() < 1e-4);
        assert!((fov.y - 90.0).abs() < 1e-4);
    }

    #[test]
    fn test_malformed_pose() {
        let path = Path::new("frame_0001.json");
        let err = PoseRecord::from_json(r#"{"cameraPoseARFrame":[1,2],"intrinsics":[]}"#, path)
            .unwrap_err();
        assert!(matches!(err, ColibriError::MalformedPose { .. }));
        let err = PoseRecord::from_json("not json", path).unwrap_err();
        assert!(matches!(err, ColibriError::MalformedPose { .. }));
    }
}
