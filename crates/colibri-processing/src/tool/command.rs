//! A running tool subprocess, polled cooperatively.

use std::fmt;
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use colibri_core::{CancelToken, ColibriError, ProgressSink, Result};
use crossbeam_channel::{Receiver, Sender, TryRecvError};

use super::{classify_line, parse_face_count, LineClass, OutputStream};

/// Upper bound on lines handled per poll, so one poll stays short.
const MAX_LINES_PER_POLL: usize = 256;

/// Information collected from a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandReport {
    /// Face count reported by the script, if any.
    pub face_count: Option<u64>,
    /// Last line forwarded as progress.
    pub last_line: Option<String>,
    /// Last line classified as an error.
    pub last_error_line: Option<String>,
    /// Exit code of the process.
    pub exit_code: Option<i32>,
}

/// Result of polling a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandPoll {
    /// The process is still running.
    Pending,
    /// The process exited successfully.
    Finished(CommandReport),
}

/// Outcome of [`run_to_completion`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolRunOutcome {
    /// The process exited successfully.
    Completed(CommandReport),
    /// The process was terminated on request.
    Canceled,
}

/// A subprocess whose output is read by background threads.
///
/// [`poll`](Self::poll) never blocks on the process: it handles the lines read
/// so far and returns. Dropping a command that has not finished terminates it.
pub struct RunningCommand {
    tool: String,
    script: String,
    child: Child,
    lines: Receiver<(OutputStream, String)>,
    readers: Vec<JoinHandle<()>>,
    harmless_warnings: Vec<String>,
    stop_on_error: bool,
    report: CommandReport,
    done: bool,
}

impl fmt::Debug for RunningCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunningCommand")
            .field("tool", &self.tool)
            .field("script", &self.script)
            .field("report", &self.report)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

fn spawn_reader<R>(reader: R, stream: OutputStream, sender: Sender<(OutputStream, String)>) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        let mut buffer = Vec::new();
        loop {
            buffer.clear();
            match reader.read_until(b'\n', &mut buffer) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buffer)
                        .trim_end_matches(['\r', '\n'])
                        .to_string();
                    if sender.send((stream, line)).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

impl RunningCommand {
    /// Starts the process with piped output.
    pub fn spawn(
        mut command: Command,
        tool: String,
        script: String,
        harmless_warnings: Vec<String>,
        stop_on_error: bool,
    ) -> Result<Self> {
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ColibriError::ToolLaunch {
                tool: tool.clone(),
                source,
            })?;

        let (sender, lines) = crossbeam_channel::unbounded();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, OutputStream::Stdout, sender.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, OutputStream::Stderr, sender));
        }

        Ok(Self {
            tool,
            script,
            child,
            lines,
            readers,
            harmless_warnings,
            stop_on_error,
            report: CommandReport::default(),
            done: false,
        })
    }

    /// Name of the script being run.
    pub fn script(&self) -> &str {
        &self.script
    }

    /// Information collected so far.
    pub fn report(&self) -> &CommandReport {
        &self.report
    }

    /// Handles the output available so far.
    ///
    /// Returns an error if the process exits with a failure status, or prints an
    /// error line while `stop_on_error` is set; in the latter case the process is
    /// terminated first.
    pub fn poll(&mut self, sink: &ProgressSink) -> Result<CommandPoll> {
        if self.done {
            return Ok(CommandPoll::Finished(self.report.clone()));
        }
        for _ in 0..MAX_LINES_PER_POLL {
            match self.lines.try_recv() {
                Ok((stream, line)) => self.handle_line(stream, line, sink)?,
                Err(TryRecvError::Empty) => return Ok(CommandPoll::Pending),
                Err(TryRecvError::Disconnected) => return self.finish(),
            }
        }
        Ok(CommandPoll::Pending)
    }

    fn handle_line(&mut self, stream: OutputStream, line: String, sink: &ProgressSink) -> Result<()> {
        if line.trim().is_empty() {
            return Ok(());
        }
        match classify_line(&line, stream, &self.harmless_warnings) {
            LineClass::Harmless => {
                log::debug!("[{}] ignored: {line}", self.tool);
            }
            LineClass::Error if self.stop_on_error => {
                log::error!("[{}] {line}", self.tool);
                self.report.last_error_line = Some(line.clone());
                self.terminate()?;
                return Err(self.failure(format!("error output: {line}")));
            }
            LineClass::Error => {
                log::warn!("[{}] {line}", self.tool);
                sink.warning(line.clone());
                self.report.last_error_line = Some(line);
            }
            LineClass::Progress => {
                log::debug!("[{}] {line}", self.tool);
                if let Some(count) = parse_face_count(&line) {
                    self.report.face_count = Some(count);
                }
                sink.message(line.clone());
                self.report.last_line = Some(line);
            }
        }
        Ok(())
    }

    /// Called once both output pipes have closed; the process may still run.
    fn finish(&mut self) -> Result<CommandPoll> {
        let Some(status) = self.child.try_wait()? else {
            return Ok(CommandPoll::Pending);
        };
        self.join_readers();
        self.done = true;
        self.report.exit_code = status.code();
        if status.success() {
            Ok(CommandPoll::Finished(self.report.clone()))
        } else {
            Err(self.failure(describe_status(status)))
        }
    }

    fn failure(&self, reason: String) -> ColibriError {
        ColibriError::ToolFailed {
            tool: self.tool.clone(),
            script: self.script.clone(),
            reason,
            last_line: self
                .report
                .last_error_line
                .clone()
                .or_else(|| self.report.last_line.clone()),
        }
    }

    fn terminate(&mut self) -> Result<()> {
        if self.done {
            return Ok(());
        }
        // Killing an already exited child reports InvalidInput; waiting below
        // reaps it either way.
        let _ = self.child.kill();
        self.child.wait()?;
        self.done = true;
        // Grandchildren may still hold the pipes open; the readers stop on
        // their own once the pipes close or the receiver is dropped.
        self.readers.clear();
        Ok(())
    }

    /// Terminates the process and waits until it has exited.
    pub fn cancel(&mut self) -> Result<()> {
        if !self.done {
            log::info!("[{}] canceling '{}'", self.tool, self.script);
        }
        self.terminate()
    }

    /// Returns true once the process has exited and been reaped.
    pub fn is_terminated(&mut self) -> bool {
        self.done || matches!(self.child.try_wait(), Ok(Some(_)))
    }

    fn join_readers(&mut self) {
        for reader in self.readers.drain(..) {
            let _ = reader.join();
        }
    }
}

impl Drop for RunningCommand {
    fn drop(&mut self) {
        if !self.done {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

fn describe_status(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exited with status {code}"),
        None => "terminated by a signal".to_string(),
    }
}

/// Polls a command until it exits or `cancel` is set.
///
/// For callers without a frame loop; sleeps briefly between polls.
pub fn run_to_completion(
    mut command: RunningCommand,
    sink: &ProgressSink,
    cancel: &CancelToken,
) -> Result<ToolRunOutcome> {
    loop {
        if cancel.is_canceled() {
            command.cancel()?;
            return Ok(ToolRunOutcome::Canceled);
        }
        match command.poll(sink)? {
            CommandPoll::Finished(report) => return Ok(ToolRunOutcome::Completed(report)),
            CommandPoll::Pending => thread::sleep(Duration::from_millis(5)),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use colibri_core::ProgressKind;

    fn shell(script: &str, stop_on_error: bool) -> RunningCommand {
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        RunningCommand::spawn(
            command,
            "sh".into(),
            "inline".into(),
            vec!["Failed to set 44100hz, got 48000hz instead".into()],
            stop_on_error,
        )
        .unwrap()
    }

    #[test]
    fn test_success_with_harmless_warning() {
        let command = shell(
            "echo 'Importing mesh.'; \
             echo 'Failed to set 44100hz, got 48000hz instead' 1>&2; \
             echo 'FACE_COUNT_OUTPUT:42'; exit 0",
            true,
        );
        let (sink, receiver) = ProgressSink::channel();
        let outcome = run_to_completion(command, &sink, &CancelToken::new()).unwrap();
        let ToolRunOutcome::Completed(report) = outcome else {
            panic!("expected completion");
        };
        assert_eq!(report.face_count, Some(42));
        assert_eq!(report.exit_code, Some(0));
        assert!(report.last_error_line.is_none());

        let messages: Vec<_> = receiver
            .try_iter()
            .filter_map(|e| match e.kind {
                ProgressKind::Message(m) => Some(m),
                _ => None,
            })
            .collect();
        assert!(messages.contains(&"Importing mesh.".to_string()));
        assert!(!messages.iter().any(|m| m.contains("44100hz")));
    }

    #[test]
    fn test_nonzero_exit_fails() {
        let command = shell("echo 'working'; exit 3", true);
        let err = run_to_completion(command, &ProgressSink::disconnected(), &CancelToken::new())
            .unwrap_err();
        match err {
            ColibriError::ToolFailed { reason, last_line, .. } => {
                assert!(reason.contains('3'));
                assert_eq!(last_line.as_deref(), Some("working"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_error_line_stops_process() {
        let command = shell("echo 'Error: bad mesh'; sleep 30; exit 0", true);
        let err = run_to_completion(command, &ProgressSink::disconnected(), &CancelToken::new())
            .unwrap_err();
        match err {
            ColibriError::ToolFailed { last_line, .. } => {
                assert_eq!(last_line.as_deref(), Some("Error: bad mesh"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_error_line_forwarded_without_stop_on_error() {
        let command = shell("echo 'oops' 1>&2; exit 0", false);
        let (sink, receiver) = ProgressSink::channel();
        let outcome = run_to_completion(command, &sink, &CancelToken::new()).unwrap();
        let ToolRunOutcome::Completed(report) = outcome else {
            panic!("expected completion");
        };
        assert_eq!(report.last_error_line.as_deref(), Some("oops"));
        assert!(receiver
            .try_iter()
            .any(|e| e.kind == ProgressKind::Warning("oops".into())));
    }

    #[test]
    fn test_poll_does_not_wait_after_output_closes() {
        let mut command = shell("exec >&- 2>&-; sleep 2", true);
        let sink = ProgressSink::disconnected();
        let started = std::time::Instant::now();
        // Give the shell time to close its output.
        thread::sleep(Duration::from_millis(300));
        for _ in 0..5 {
            assert_eq!(command.poll(&sink).unwrap(), CommandPoll::Pending);
        }
        assert!(started.elapsed() < Duration::from_millis(1500));
        assert!(!command.is_terminated());

        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        loop {
            if let CommandPoll::Finished(report) = command.poll(&sink).unwrap() {
                assert_eq!(report.exit_code, Some(0));
                break;
            }
            assert!(std::time::Instant::now() < deadline);
            thread::sleep(Duration::from_millis(20));
        }
        assert!(command.is_terminated());
    }

    #[test]
    fn test_cancel_terminates_process() {
        let mut command = shell("echo started; sleep 30", true);
        assert!(!command.is_terminated());
        command.cancel().unwrap();
        assert!(command.is_terminated());
    }

    #[test]
    fn test_run_to_completion_honors_cancel() {
        let command = shell("sleep 30", true);
        let cancel = CancelToken::new();
        cancel.cancel();
        let outcome = run_to_completion(command, &ProgressSink::disconnected(), &cancel).unwrap();
        assert_eq!(outcome, ToolRunOutcome::Canceled);
    }
}
