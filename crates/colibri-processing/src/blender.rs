//! Blender scripts used by the mesh stages.

use std::path::Path;

use colibri_core::{Result, ToolSettings};

use crate::tool::{ExternalTool, RunningCommand};

/// Scripts shipped in the `scripts/` directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlenderScript {
    /// Imports a PLY mesh, rotates it into the renderer's axes and exports OBJ.
    ConvertPlyToObj,
    /// Reports the face count of an OBJ mesh.
    CheckObjMeshInfo,
    /// Dissolves near-planar faces and triangulates.
    SimplifyObj,
    /// Unwraps texture coordinates with Smart UV Project.
    SmartUvProjectObj,
}

impl BlenderScript {
    /// File name inside the scripts directory.
    pub fn file_name(self) -> &'static str {
        match self {
            BlenderScript::ConvertPlyToObj => "convert_ply_to_obj.py",
            BlenderScript::CheckObjMeshInfo => "check_obj_mesh_info.py",
            BlenderScript::SimplifyObj => "simplify_obj.py",
            BlenderScript::SmartUvProjectObj => "smart_uv_project_obj.py",
        }
    }

    /// Short description for progress reporting.
    pub fn label(self) -> &'static str {
        match self {
            BlenderScript::ConvertPlyToObj => "Convert .ply to .obj",
            BlenderScript::CheckObjMeshInfo => "Check .obj mesh information",
            BlenderScript::SimplifyObj => "Simplify .obj",
            BlenderScript::SmartUvProjectObj => "Smart UV project .obj",
        }
    }
}

/// Launches Blender in background mode on the bundled scripts.
///
/// Every call stops on the first error line.
#[derive(Debug, Clone)]
pub struct BlenderConnector {
    tool: ExternalTool,
}

impl BlenderConnector {
    /// Creates a connector from the Blender tool settings.
    pub fn new(settings: &ToolSettings) -> Self {
        Self {
            tool: ExternalTool::new("blender", settings),
        }
    }

    /// The underlying tool.
    pub fn tool(&self) -> &ExternalTool {
        &self.tool
    }

    /// Starts a script with the given path arguments.
    pub fn run(&self, script: BlenderScript, args: &[&Path]) -> Result<RunningCommand> {
        log::info!("Blender: {}", script.label());
        self.tool.spawn(script.file_name(), args, true)
    }

    /// Converts a PLY mesh to OBJ. The script reports the face count.
    pub fn convert_ply_to_obj(&self, input: &Path, output: &Path) -> Result<RunningCommand> {
        self.run(BlenderScript::ConvertPlyToObj, &[input, output])
    }

    /// Reports the face count of an OBJ mesh.
    pub fn check_obj_mesh_info(&self, input: &Path) -> Result<RunningCommand> {
        self.run(BlenderScript::CheckObjMeshInfo, &[input])
    }

    /// Simplifies an OBJ mesh. The script reports the new face count.
    pub fn simplify_obj(&self, input: &Path, output: &Path) -> Result<RunningCommand> {
        self.run(BlenderScript::SimplifyObj, &[input, output])
    }

    /// Adds texture coordinates to an OBJ mesh.
    pub fn smart_uv_project_obj(&self, input: &Path, output: &Path) -> Result<RunningCommand> {
        self.run(BlenderScript::SmartUvProjectObj, &[input, output])
    }
}
