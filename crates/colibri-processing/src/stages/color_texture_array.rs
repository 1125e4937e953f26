//! Stacks the source color images into one texture array.

use std::path::PathBuf;

use colibri_core::{
    Artifact, ArtifactKind, ArtifactSummary, ColibriError, DataHandler, Result, UVec2, UVec3,
};
use image::imageops::{self, FilterType};
use image::RgbImage;

use super::output_file;
use crate::stage::{ensure_parent, Stage, StageContext, StagePoll};

const NAME: &str = "color_texture_array";

/// Resizes every camera's image to a common layer size and stacks the layers
/// vertically into `processing/color_texture_array.png`, layer `i` holding
/// the camera at position `i` of the setup.
///
/// One image is processed per poll.
#[derive(Debug)]
pub struct ColorTextureArrayStage {
    max_resolution: u32,
    build: Option<Build>,
}

#[derive(Debug)]
struct Build {
    canvas: RgbImage,
    layer_size: UVec2,
    next: usize,
}

impl ColorTextureArrayStage {
    /// Creates the stage. Layers are at most `max_resolution` wide and high.
    pub fn new(max_resolution: u32) -> Self {
        Self {
            max_resolution: max_resolution.max(1),
            build: None,
        }
    }
}

/// Scales a resolution down so that its largest side is at most `max`.
pub(crate) fn fit_resolution(resolution: UVec2, max: u32) -> UVec2 {
    let largest = resolution.x.max(resolution.y);
    if largest <= max {
        return resolution.max(UVec2::ONE);
    }
    let scale = f64::from(max) / f64::from(largest);
    UVec2::new(
        ((f64::from(resolution.x) * scale).round() as u32).max(1),
        ((f64::from(resolution.y) * scale).round() as u32).max(1),
    )
}

impl Stage for ColorTextureArrayStage {
    fn name(&self) -> &'static str {
        NAME
    }

    fn kind(&self) -> ArtifactKind {
        ArtifactKind::ColorTextureArray
    }

    fn dependencies(&self) -> &'static [ArtifactKind] {
        &[]
    }

    fn output_paths(&self, data: &DataHandler) -> Vec<PathBuf> {
        vec![output_file(data, self.kind(), "png")]
    }

    fn begin(&mut self, ctx: &StageContext<'_>) -> Result<()> {
        let first = ctx
            .setup
            .cameras()
            .first()
            .ok_or(ColibriError::EmptyCameraSetup)?;
        let layer_size = fit_resolution(first.pixel_resolution, self.max_resolution);
        let layers = ctx.setup.len() as u32;
        log::info!(
            "building color texture array: {} layers of {}x{}",
            layers,
            layer_size.x,
            layer_size.y
        );
        self.build = Some(Build {
            canvas: RgbImage::new(layer_size.x, layer_size.y * layers),
            layer_size,
            next: 0,
        });
        Ok(())
    }

    fn poll(&mut self, ctx: &StageContext<'_>) -> Result<StagePoll> {
        let build = self.build.as_mut().ok_or(ColibriError::StageFailed {
            stage: NAME,
            reason: "polled before begin".to_string(),
        })?;
        let cameras = ctx.setup.cameras();

        if let Some(camera) = cameras.get(build.next) {
            let path = ctx.data.color_image_path(&camera.image_name);
            let source = image::open(&path)?.to_rgb8();
            let layer = imageops::resize(
                &source,
                build.layer_size.x,
                build.layer_size.y,
                FilterType::Triangle,
            );
            let offset = i64::from(build.layer_size.y) * build.next as i64;
            imageops::replace(&mut build.canvas, &layer, 0, offset);
            build.next += 1;
            ctx.progress.message(format!("Added {}", camera.image_name));
            ctx.progress.fraction(build.next as f32 / cameras.len() as f32);
            return Ok(StagePoll::Pending);
        }

        let path = output_file(ctx.data, ArtifactKind::ColorTextureArray, "png");
        ensure_parent(&path)?;
        build.canvas.save(&path)?;
        let summary = ArtifactSummary {
            resolution: Some(UVec3::new(
                build.layer_size.x,
                build.layer_size.y,
                cameras.len() as u32,
            )),
            ..Default::default()
        };
        self.build = None;
        Ok(StagePoll::Complete(Artifact::ready(
            ArtifactKind::ColorTextureArray,
            vec![path],
            summary,
        )))
    }

    fn cancel(&mut self) {
        self.build = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_resolution() {
        assert_eq!(fit_resolution(UVec2::new(100, 50), 512), UVec2::new(100, 50));
        assert_eq!(fit_resolution(UVec2::new(1920, 1440), 512), UVec2::new(512, 384));
        assert_eq!(fit_resolution(UVec2::new(10, 1000), 100), UVec2::new(1, 100));
    }
}
