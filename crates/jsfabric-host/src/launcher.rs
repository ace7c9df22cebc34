//! Child engine process launcher.
//!
//! Builds the start specification for one child from a
//! [`ProcessConfiguration`] plus a bootstrap script, spawns it with all
//! standard streams piped, and hands its exit status to a background reaper
//! task so a terminated child never lingers as a zombie and the caller never
//! blocks on its exit.

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use jsfabric_core::ProcessConfiguration;
use jsfabric_core::escape_command_line_arg;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Environment variable the child engine searches for modules.
pub const MODULE_SEARCH_PATH_VAR: &str = "NODE_PATH";

/// Separator between entries of a path-list environment variable.
#[cfg(windows)]
pub const PATH_LIST_SEPARATOR: &str = ";";
#[cfg(not(windows))]
pub const PATH_LIST_SEPARATOR: &str = ":";

/// Everything needed to start one child engine process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessStartSpec {
    /// Interpreter executable.
    pub program: PathBuf,
    /// Arguments as a single Windows-convention command line:
    /// `<flags> -e "<escaped script>" -- --parentPid <pid> --port <port>`.
    pub command_line: String,
    /// The same arguments as an unescaped vector, for spawn primitives that
    /// pass argv through untouched.
    pub args: Vec<String>,
    /// Working directory of the child, inherited when `None`.
    pub working_directory: Option<PathBuf>,
    /// Variables overlaid on the inherited environment.
    pub environment: BTreeMap<String, OsString>,
    /// Port the child was told to bind.
    pub port: u16,
}

impl ProcessStartSpec {
    /// Build the start specification for `script` under `config`.
    pub fn new(script: &str, config: &ProcessConfiguration) -> Self {
        Self::with_inherited_search_path(
            script,
            config,
            std::env::var_os(MODULE_SEARCH_PATH_VAR),
        )
    }

    fn with_inherited_search_path(
        script: &str,
        config: &ProcessConfiguration,
        inherited_search_path: Option<OsString>,
    ) -> Self {
        let parent_pid = std::process::id().to_string();
        let port = config.port.to_string();
        let flags = config
            .interpreter_flags
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty());

        let mut command_line = String::new();
        if let Some(flags) = flags {
            command_line.push_str(flags);
            command_line.push(' ');
        }
        command_line.push_str(&format!(
            "-e \"{}\" -- --parentPid {parent_pid} --port {port}",
            escape_command_line_arg(script)
        ));

        let mut args: Vec<String> = flags
            .map(|f| f.split_whitespace().map(str::to_owned).collect())
            .unwrap_or_default();
        args.extend([
            "-e".to_owned(),
            script.to_owned(),
            "--".to_owned(),
            "--parentPid".to_owned(),
            parent_pid,
            "--port".to_owned(),
            port,
        ]);

        let mut environment: BTreeMap<String, OsString> = config
            .environment_variables
            .iter()
            .filter_map(|(name, value)| {
                value
                    .as_ref()
                    .map(|value| (name.clone(), OsString::from(value)))
            })
            .collect();

        if let Some(dir) = &config.working_directory {
            let existing = environment
                .get(MODULE_SEARCH_PATH_VAR)
                .cloned()
                .or(inherited_search_path);
            environment.insert(
                MODULE_SEARCH_PATH_VAR.to_owned(),
                module_search_path(existing.as_deref(), dir),
            );
        }

        Self {
            program: config.executable.clone(),
            command_line,
            args,
            working_directory: config.working_directory.clone(),
            environment,
            port: config.port,
        }
    }

    /// Turn the specification into a ready-to-spawn command.
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);

        #[cfg(windows)]
        cmd.raw_arg(&self.command_line);
        #[cfg(not(windows))]
        cmd.args(&self.args);

        if let Some(dir) = &self.working_directory {
            cmd.current_dir(dir);
        }
        cmd.envs(&self.environment)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

/// Append `<working_directory>/node_modules` to an existing module search
/// path, or start a new one.
pub fn module_search_path(existing: Option<&OsStr>, working_directory: &Path) -> OsString {
    let modules = working_directory.join("node_modules");
    let mut value = OsString::new();
    if let Some(existing) = existing.filter(|e| !e.is_empty()) {
        value.push(existing);
        value.push(PATH_LIST_SEPARATOR);
    }
    value.push(modules.as_os_str());
    value
}

/// Errors from launching a child engine process.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error(
        "Failed to start {program} process. To resolve this:\n\n\
         [1] Ensure that Node.js is installed and can be found in one of the PATH directories.\n    \
         Current PATH environment variable is: {path}\n    \
         Make sure the executable is in one of those directories, or update your PATH.\n\n\
         [2] See the underlying error for further details of the cause."
    )]
    Spawn {
        program: String,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] jsfabric_core::Error),
}

/// What the reaper recorded once it was done with the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reaped {
    Exited(ExitStatus),
    /// Waiting on the child failed; its status is unknown.
    Lost,
}

/// A running child engine process.
///
/// The child itself is owned by a reaper task that records its exit status
/// as soon as it terminates. Dropping this handle without calling
/// [`terminate`](Self::terminate) still kills the child.
#[derive(Debug)]
pub struct LaunchedProcess {
    pid: u32,
    port: u16,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    kill_tx: Option<oneshot::Sender<()>>,
    exit_rx: watch::Receiver<Option<Reaped>>,
    reaper: Option<JoinHandle<()>>,
}

impl LaunchedProcess {
    /// OS process id of the child.
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// Port the child was told to bind.
    pub const fn port(&self) -> u16 {
        self.port
    }

    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.stderr.take()
    }

    /// Exit status, once the reaper has observed it.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        match *self.exit_rx.borrow() {
            Some(Reaped::Exited(status)) => Some(status),
            Some(Reaped::Lost) | None => None,
        }
    }

    /// Whether the reaper is done with the child.
    ///
    /// Also true when the exit status could not be reclaimed, in which case
    /// [`exit_status`](Self::exit_status) stays `None`.
    pub fn has_exited(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }

    /// Wait until the child exits.
    ///
    /// Returns `None` if the exit status could not be reclaimed.
    pub async fn wait_for_exit(&self) -> Option<ExitStatus> {
        let mut exit_rx = self.exit_rx.clone();
        let reaped = exit_rx.wait_for(Option::is_some).await.ok().and_then(|r| *r);
        match reaped {
            Some(Reaped::Exited(status)) => Some(status),
            Some(Reaped::Lost) | None => None,
        }
    }

    /// Forward the child's stdout and stderr into the log, line by line.
    ///
    /// Streams already taken by the caller are left alone.
    pub fn forward_output(&mut self) {
        let pid = self.pid;
        if let Some(stdout) = self.stdout.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(pid, "stdout: {}", line);
                }
                debug!(pid, "stdout reader finished");
            });
        }
        if let Some(stderr) = self.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(pid, "stderr: {}", line);
                }
                debug!(pid, "stderr reader finished");
            });
        }
    }

    /// Kill the child and wait up to `timeout` for its exit to be reclaimed.
    ///
    /// Calling this more than once is a no-op.
    pub async fn terminate(&mut self, timeout: Duration) {
        let Some(kill_tx) = self.kill_tx.take() else {
            return;
        };
        debug!(pid = self.pid, "Terminating child process");

        self.stdin.take();
        // The reaper is gone already if the child exited on its own.
        let _ = kill_tx.send(());

        if let Some(reaper) = self.reaper.take() {
            match tokio::time::timeout(timeout, reaper).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(pid = self.pid, error = %e, "Reaper task failed"),
                Err(_) => warn!(
                    pid = self.pid,
                    "Timed out waiting for child process to exit"
                ),
            }
        }
    }
}

/// Start the process described by `spec`.
///
/// Must be called from within a Tokio runtime.
pub fn launch(spec: &ProcessStartSpec) -> Result<LaunchedProcess, LaunchError> {
    info!(
        program = %spec.program.display(),
        port = spec.port,
        working_dir = ?spec.working_directory,
        "Spawning child engine process"
    );

    let mut child = spec
        .to_command()
        .spawn()
        .map_err(|source| LaunchError::Spawn {
            program: spec.program.display().to_string(),
            path: std::env::var("PATH").unwrap_or_default(),
            source,
        })?;

    let pid = child.id().unwrap_or_default();
    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let (kill_tx, kill_rx) = oneshot::channel();
    let (exit_tx, exit_rx) = watch::channel(None);
    let reaper = spawn_reaper(child, pid, kill_rx, exit_tx);

    info!(pid, port = spec.port, "Child engine process started");

    Ok(LaunchedProcess {
        pid,
        port: spec.port,
        stdin,
        stdout,
        stderr,
        kill_tx: Some(kill_tx),
        exit_rx,
        reaper: Some(reaper),
    })
}

/// Build the start specification for `script` under `config` and launch it.
pub fn launch_process(
    script: &str,
    config: &ProcessConfiguration,
) -> Result<LaunchedProcess, LaunchError> {
    launch(&ProcessStartSpec::new(script, config))
}

/// Launch `count` children, each with its own per-member configuration.
///
/// On failure the children already started are dropped, which kills them.
pub fn launch_members(
    script: &str,
    config: &ProcessConfiguration,
    count: usize,
) -> Result<Vec<LaunchedProcess>, LaunchError> {
    (0..count)
        .map(|index| launch_process(script, &config.for_member(index)?))
        .collect()
}

fn spawn_reaper(
    mut child: Child,
    pid: u32,
    kill_rx: oneshot::Receiver<()>,
    exit_tx: watch::Sender<Option<Reaped>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        // A dropped sender counts as a kill request.
        let (status, killed) = tokio::select! {
            status = child.wait() => (status, false),
            _ = kill_rx => {
                if let Err(e) = child.start_kill() {
                    debug!(pid, error = %e, "Child process already gone");
                }
                (child.wait().await, true)
            }
        };

        record_exit(&exit_tx, pid, status, killed);
    })
}

fn record_exit(
    exit_tx: &watch::Sender<Option<Reaped>>,
    pid: u32,
    status: std::io::Result<ExitStatus>,
    killed: bool,
) {
    let reaped = match status {
        Ok(status) => {
            if killed || status.success() {
                info!(pid, %status, "Child process exited");
            } else {
                warn!(pid, %status, "Child process exited unexpectedly");
            }
            Reaped::Exited(status)
        }
        Err(e) => {
            warn!(pid, error = %e, "Failed to reclaim child process exit status");
            Reaped::Lost
        }
    };
    exit_tx.send_replace(Some(reaped));
}

#[cfg(test)]
#[allow(clippy::panic, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config_in(dir: &str) -> ProcessConfiguration {
        ProcessConfiguration {
            working_directory: Some(PathBuf::from(dir)),
            ..ProcessConfiguration::default()
        }
    }

    #[test]
    fn search_path_is_appended_to_existing_value() {
        let value = module_search_path(Some(OsStr::new("/a")), Path::new("/proj"));
        let mut expected = OsString::from("/a");
        expected.push(PATH_LIST_SEPARATOR);
        expected.push(Path::new("/proj").join("node_modules"));
        assert_eq!(value, expected);
    }

    #[test]
    fn search_path_without_existing_value() {
        let value = module_search_path(None, Path::new("/proj"));
        assert_eq!(value, Path::new("/proj").join("node_modules").into_os_string());

        let value = module_search_path(Some(OsStr::new("")), Path::new("/proj"));
        assert_eq!(value, Path::new("/proj").join("node_modules").into_os_string());
    }

    #[test]
    fn command_line_has_fixed_shape() {
        let config = ProcessConfiguration {
            interpreter_flags: Some("--inspect".to_string()),
            port: 8123,
            ..ProcessConfiguration::default()
        };
        let spec = ProcessStartSpec::with_inherited_search_path("run(\"x\\\")", &config, None);

        let pid = std::process::id();
        assert_eq!(spec.program, PathBuf::from("node"));
        assert_eq!(
            spec.command_line,
            format!("--inspect -e \"run(\\\"x\\\\\\\")\" -- --parentPid {pid} --port 8123")
        );
        assert_eq!(
            spec.args,
            vec![
                "--inspect".to_string(),
                "-e".to_string(),
                "run(\"x\\\")".to_string(),
                "--".to_string(),
                "--parentPid".to_string(),
                pid.to_string(),
                "--port".to_string(),
                "8123".to_string(),
            ]
        );
    }

    #[test]
    fn missing_flags_leave_no_leading_space() {
        let spec = ProcessStartSpec::with_inherited_search_path(
            "1",
            &ProcessConfiguration::default(),
            None,
        );
        assert!(spec.command_line.starts_with("-e \"1\" -- --parentPid "));
        assert_eq!(spec.args[0], "-e");
    }

    #[test]
    fn multiple_flags_become_separate_args() {
        let config = ProcessConfiguration {
            interpreter_flags: Some(" --inspect  --max-old-space-size=512 ".to_string()),
            ..ProcessConfiguration::default()
        };
        let spec = ProcessStartSpec::with_inherited_search_path("1", &config, None);
        assert_eq!(&spec.args[..3], ["--inspect", "--max-old-space-size=512", "-e"]);
        assert!(spec.command_line.starts_with("--inspect  --max-old-space-size=512 -e "));
    }

    #[test]
    fn null_environment_values_are_skipped() {
        let mut config = ProcessConfiguration::default();
        config
            .environment_variables
            .insert("NODE_ENV".to_string(), Some("production".to_string()));
        config.environment_variables.insert("UNSET".to_string(), None);

        let spec = ProcessStartSpec::with_inherited_search_path("1", &config, None);
        assert_eq!(spec.environment.get("NODE_ENV"), Some(&OsString::from("production")));
        assert!(!spec.environment.contains_key("UNSET"));
        assert!(!spec.environment.contains_key(MODULE_SEARCH_PATH_VAR));
        assert!(spec.working_directory.is_none());
    }

    #[test]
    fn working_directory_extends_inherited_search_path() {
        let spec = ProcessStartSpec::with_inherited_search_path(
            "1",
            &config_in("/proj"),
            Some(OsString::from("/a")),
        );
        assert_eq!(spec.working_directory, Some(PathBuf::from("/proj")));
        assert_eq!(
            spec.environment.get(MODULE_SEARCH_PATH_VAR),
            Some(&module_search_path(Some(OsStr::new("/a")), Path::new("/proj")))
        );
    }

    #[test]
    fn configured_search_path_is_extended_not_replaced() {
        let mut config = config_in("/proj");
        config
            .environment_variables
            .insert(MODULE_SEARCH_PATH_VAR.to_string(), Some("/custom".to_string()));

        let spec = ProcessStartSpec::with_inherited_search_path(
            "1",
            &config,
            Some(OsString::from("/inherited")),
        );
        assert_eq!(
            spec.environment.get(MODULE_SEARCH_PATH_VAR),
            Some(&module_search_path(Some(OsStr::new("/custom")), Path::new("/proj")))
        );
    }

    fn detached_process(exit_rx: watch::Receiver<Option<Reaped>>) -> LaunchedProcess {
        LaunchedProcess {
            pid: 0,
            port: 0,
            stdin: None,
            stdout: None,
            stderr: None,
            kill_tx: None,
            exit_rx,
            reaper: None,
        }
    }

    #[tokio::test]
    async fn failed_wait_still_marks_process_exited() {
        let (exit_tx, exit_rx) = watch::channel(None);
        let process = detached_process(exit_rx);
        assert!(!process.has_exited());

        record_exit(&exit_tx, 42, Err(std::io::Error::other("wait failed")), false);

        assert!(process.has_exited());
        assert_eq!(process.exit_status(), None);
        let waited = tokio::time::timeout(Duration::from_secs(1), process.wait_for_exit())
            .await
            .unwrap();
        assert_eq!(waited, None);
    }

    #[tokio::test]
    async fn missing_executable_reports_remediation() {
        let config = ProcessConfiguration {
            executable: PathBuf::from("jsfabric-no-such-interpreter"),
            ..ProcessConfiguration::default()
        };

        let err = launch_process("1", &config).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Failed to start jsfabric-no-such-interpreter process"));
        assert!(message.contains("Ensure that Node.js is installed"));
        assert!(message.contains("Current PATH environment variable is"));
        assert!(message.ends_with("further details of the cause."));

        let LaunchError::Spawn { source, .. } = err else {
            panic!("expected a spawn failure, got {err:?}");
        };
        assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
    }
}
