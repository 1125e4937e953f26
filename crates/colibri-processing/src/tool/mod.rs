//! Launching external tools as scripted subprocesses.
//!
//! A tool invocation has the form
//! `<launcher> <tool-exe> <fixed-flags> <script-path> -- <scripts-dir> <args...>`,
//! with every path individually quoted. Output is read line by line without
//! blocking the caller, see [`RunningCommand`].

mod command;

pub use command::{run_to_completion, CommandPoll, CommandReport, RunningCommand, ToolRunOutcome};

use std::path::{Path, PathBuf};
use std::process::Command;

use colibri_core::ToolSettings;

/// Prefix of the line tool scripts print to report a mesh face count.
pub const FACE_COUNT_PREFIX: &str = "FACE_COUNT_OUTPUT:";

/// Which output stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

/// How an output line is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineClass {
    /// A known benign diagnostic; ignored.
    Harmless,
    /// The line indicates a failure.
    Error,
    /// Anything else; forwarded as progress text.
    Progress,
}

/// Classifies one line of tool output.
///
/// Lines containing a harmless-warning pattern are ignored. Lines on standard
/// error, and lines starting with `error`, indicate failure.
pub fn classify_line(line: &str, stream: OutputStream, harmless_warnings: &[String]) -> LineClass {
    if harmless_warnings
        .iter()
        .any(|pattern| !pattern.is_empty() && line.contains(pattern.as_str()))
    {
        return LineClass::Harmless;
    }
    let starts_with_error = line
        .trim_start()
        .get(..5)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("error"));
    if stream == OutputStream::Stderr || starts_with_error {
        LineClass::Error
    } else {
        LineClass::Progress
    }
}

/// Parses a `FACE_COUNT_OUTPUT:<n>` line.
pub fn parse_face_count(line: &str) -> Option<u64> {
    line.trim()
        .strip_prefix(FACE_COUNT_PREFIX)
        .and_then(|count| count.trim().parse().ok())
}

/// Quotes a path or argument for the platform shell.
pub fn quote_path(arg: &str) -> String {
    if cfg!(windows) {
        format!("\"{}\"", arg.replace('"', "\"\""))
    } else {
        let mut quoted = String::with_capacity(arg.len() + 2);
        quoted.push('"');
        for c in arg.chars() {
            if matches!(c, '"' | '\\' | '$' | '`') {
                quoted.push('\\');
            }
            quoted.push(c);
        }
        quoted.push('"');
        quoted
    }
}

/// An external executable that runs scripts from a scripts directory.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalTool {
    id: String,
    executable: PathBuf,
    fixed_flags: Vec<String>,
    scripts_dir: PathBuf,
    harmless_warnings: Vec<String>,
}

impl ExternalTool {
    /// Creates a tool from its settings.
    pub fn new(id: impl Into<String>, settings: &ToolSettings) -> Self {
        Self {
            id: id.into(),
            executable: settings.executable_path.clone(),
            fixed_flags: settings.fixed_flags.clone(),
            scripts_dir: settings.scripts_dir.clone(),
            harmless_warnings: settings.harmless_warnings.clone(),
        }
    }

    /// Identifier used in logs and errors.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Directory holding the tool scripts.
    pub fn scripts_dir(&self) -> &Path {
        &self.scripts_dir
    }

    /// Known benign output lines.
    pub fn harmless_warnings(&self) -> &[String] {
        &self.harmless_warnings
    }

    /// Formats the tool command line for a script and its arguments.
    pub fn format_command(&self, script_name: &str, args: &[&Path]) -> String {
        let mut parts = Vec::with_capacity(self.fixed_flags.len() + args.len() + 4);
        parts.push(quote_path(&self.executable.to_string_lossy()));
        parts.extend(self.fixed_flags.iter().cloned());
        parts.push(quote_path(
            &self.scripts_dir.join(script_name).to_string_lossy(),
        ));
        parts.push("--".to_string());
        parts.push(quote_path(&self.scripts_dir.to_string_lossy()));
        parts.extend(args.iter().map(|arg| quote_path(&arg.to_string_lossy())));
        parts.join(" ")
    }

    /// Wraps a command line in the platform shell.
    ///
    /// On Unix the shell replaces itself with the tool, so terminating the
    /// child process terminates the tool.
    pub fn launcher_command(command_line: &str) -> Command {
        if cfg!(windows) {
            let mut command = Command::new("cmd");
            command.arg("/C").arg(format!("CALL {command_line}"));
            command
        } else {
            let mut command = Command::new("sh");
            command.arg("-c").arg(format!("exec {command_line}"));
            command
        }
    }

    /// Launches a script.
    ///
    /// Returns as soon as the process is started; output is collected through
    /// [`RunningCommand::poll`].
    pub fn spawn(
        &self,
        script_name: &str,
        args: &[&Path],
        stop_on_error: bool,
    ) -> colibri_core::Result<RunningCommand> {
        let command_line = self.format_command(script_name, args);
        log::info!("[{}] {command_line}", self.id);
        RunningCommand::spawn(
            Self::launcher_command(&command_line),
            self.id.clone(),
            script_name.to_string(),
            self.harmless_warnings.clone(),
            stop_on_error,
        )
    }
}
