//! Converts, simplifies and unwraps the reconstruction mesh with Blender.

use std::path::PathBuf;

use colibri_core::data_handler::create_or_clear_directory;
use colibri_core::{Artifact, ArtifactKind, ColibriError, DataHandler, Result, ToolSettings};

use super::output_directory;
use crate::blender::{BlenderConnector, BlenderScript};
use crate::mesh::{summarize_ply, TriangleMesh};
use crate::stage::{Stage, StageContext, StagePoll};
use crate::tool::{CommandPoll, RunningCommand};

const NAME: &str = "global_mesh";

/// Final mesh file inside the stage's output directory.
pub const GLOBAL_MESH_FILE_NAME: &str = "global_mesh.obj";

const STEPS: [BlenderScript; 3] = [
    BlenderScript::ConvertPlyToObj,
    BlenderScript::SimplifyObj,
    BlenderScript::SmartUvProjectObj,
];

/// Produces `processing/global_mesh/global_mesh.obj` from the dataset's
/// reconstruction mesh in three Blender passes: PLY to OBJ conversion,
/// simplification and Smart UV projection.
///
/// Each pass runs as a subprocess that is polled without blocking.
#[derive(Debug)]
pub struct GlobalMeshStage {
    blender: BlenderConnector,
    step: usize,
    command: Option<RunningCommand>,
    face_count: Option<u64>,
}

impl GlobalMeshStage {
    /// Creates the stage.
    pub fn new(blender: &ToolSettings) -> Self {
        Self {
            blender: BlenderConnector::new(blender),
            step: 0,
            command: None,
            face_count: None,
        }
    }

    fn step_paths(data: &DataHandler, step: usize) -> (PathBuf, PathBuf) {
        let directory = output_directory(data, ArtifactKind::GlobalMesh);
        let converted = directory.join("converted.obj");
        let simplified = directory.join("simplified.obj");
        match step {
            0 => (data.reconstruction_mesh_path(), converted),
            1 => (converted, simplified),
            _ => (simplified, directory.join(GLOBAL_MESH_FILE_NAME)),
        }
    }

    fn start_step(&mut self, ctx: &StageContext<'_>) -> Result<()> {
        let script = STEPS[self.step];
        let (input, output) = Self::step_paths(ctx.data, self.step);
        ctx.progress.message(script.label());
        self.command = Some(self.blender.run(script, &[&input, &output])?);
        Ok(())
    }
}

impl Stage for GlobalMeshStage {
    fn name(&self) -> &'static str {
        NAME
    }

    fn kind(&self) -> ArtifactKind {
        ArtifactKind::GlobalMesh
    }

    fn dependencies(&self) -> &'static [ArtifactKind] {
        &[]
    }

    fn output_paths(&self, data: &DataHandler) -> Vec<PathBuf> {
        vec![output_directory(data, self.kind())]
    }

    fn begin(&mut self, ctx: &StageContext<'_>) -> Result<()> {
        let input = ctx.data.reconstruction_mesh_path();
        if !input.is_file() {
            return Err(ColibriError::StageFailed {
                stage: NAME,
                reason: format!("reconstruction mesh not found at {}", input.display()),
            });
        }
        let summary = summarize_ply(&input)?;
        log::info!(
            "reconstruction mesh: {} vertices, {} faces",
            summary.vertex_count,
            summary.face_count
        );
        create_or_clear_directory(&output_directory(ctx.data, self.kind()))?;
        self.step = 0;
        self.face_count = None;
        self.start_step(ctx)
    }

    fn poll(&mut self, ctx: &StageContext<'_>) -> Result<StagePoll> {
        let command = self.command.as_mut().ok_or(ColibriError::StageFailed {
            stage: NAME,
            reason: "polled before begin".to_string(),
        })?;
        let CommandPoll::Finished(report) = command.poll(ctx.progress)? else {
            return Ok(StagePoll::Pending);
        };
        self.command = None;
        if report.face_count.is_some() {
            self.face_count = report.face_count;
        }
        ctx.progress
            .fraction((self.step + 1) as f32 / STEPS.len() as f32);

        self.step += 1;
        if self.step < STEPS.len() {
            self.start_step(ctx)?;
            return Ok(StagePoll::Pending);
        }

        let (_, output) = Self::step_paths(ctx.data, STEPS.len() - 1);
        let mesh = TriangleMesh::read_obj(&output)?;
        if let Some(reported) = self.face_count {
            if reported != mesh.face_count() as u64 {
                log::debug!(
                    "Blender reported {reported} faces, the exported mesh has {}",
                    mesh.face_count()
                );
            }
        }
        if !mesh.has_uvs() {
            ctx.progress
                .warning("global mesh was exported without texture coordinates");
        }
        Ok(StagePoll::Complete(Artifact::ready(
            ArtifactKind::GlobalMesh,
            vec![output],
            mesh.summary(),
        )))
    }

    fn cancel(&mut self) {
        if let Some(mut command) = self.command.take() {
            if let Err(e) = command.cancel() {
                log::warn!("failed to stop {}: {e}", command.script());
            }
        }
    }
}
