//! Build process executor

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::errors::PipelineError;
use crate::filesys::dir::Dir;
use crate::models::build::BuildOutcome;
use crate::models::deployment::LogStatus;
use crate::workers::publisher::LogPublisher;

/// How long to wait for output readers once the build process is gone
const READER_GRACE: Duration = Duration::from_secs(5);

/// Build command configuration
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Shell command line to run
    pub command: String,

    /// Directory the command runs in, created if missing
    pub working_dir: PathBuf,

    /// Shell used to interpret the command
    pub shell: String,

    /// Status attached to stderr lines
    pub stderr_status: LogStatus,

    /// Kill the build after this long. `None` waits forever.
    pub timeout: Option<Duration>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            command: "npm install && npm run build".to_string(),
            working_dir: PathBuf::from("output"),
            shell: "sh".to_string(),
            stderr_status: LogStatus::Failed,
            timeout: None,
        }
    }
}

/// Runs the build command and streams its output to the log publisher
pub struct ProcessExecutor {
    options: BuildOptions,
}

impl ProcessExecutor {
    pub fn new(options: BuildOptions) -> Self {
        Self { options }
    }

    /// Run the build to completion.
    ///
    /// A process that starts and exits yields `Ok` whatever its exit code; the
    /// caller decides what a failed outcome means. Spawn errors and timeouts
    /// are returned as errors. A failure event is published in every failing case.
    pub async fn run(&self, publisher: &LogPublisher) -> Result<BuildOutcome, PipelineError> {
        let working_dir = Dir::new(&self.options.working_dir);
        working_dir.create().await?;

        info!(
            "Running build command `{}` in {}",
            self.options.command,
            working_dir.path().display()
        );

        let mut command = Command::new(&self.options.shell);
        command
            .arg("-c")
            .arg(&self.options.command)
            .current_dir(working_dir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // The shell leads its own group so its children can be killed with it
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!("Process error: {}", e);
                publisher.publish(format!("Process error: {}", e), LogStatus::Failed);
                return Err(PipelineError::Spawn(e));
            }
        };
        let mut group = ProcessGroup::new(child.id());

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(forward(stdout, publisher.clone(), OutputStream::Stdout, LogStatus::Info));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(forward(
                stderr,
                publisher.clone(),
                OutputStream::Stderr,
                self.options.stderr_status,
            ));
        }

        let status = match self.options.timeout {
            None => child.wait().await,
            Some(limit) => {
                let waited = tokio::time::timeout(limit, child.wait()).await;
                match waited {
                    Ok(status) => status,
                    Err(_) => {
                        error!("Build timed out after {:?}, killing it", limit);
                        group.kill();
                        if let Err(e) = child.kill().await {
                            warn!("Failed to kill build process: {}", e);
                        }
                        join_readers(readers).await;
                        publisher.publish(
                            format!("Build timed out after {:?}", limit),
                            LogStatus::Failed,
                        );
                        return Err(PipelineError::BuildTimeout(limit));
                    }
                }
            }
        };

        // Background leftovers of the build would hold the output pipes open
        group.kill();

        // Every output line is queued before the outcome is reported
        join_readers(readers).await;

        let status = match status {
            Ok(status) => status,
            Err(e) => {
                error!("Process error: {}", e);
                publisher.publish(format!("Process error: {}", e), LogStatus::Failed);
                return Err(PipelineError::IoError(e));
            }
        };

        let outcome = BuildOutcome::from_exit_code(status.code());
        if outcome.succeeded {
            info!("Build process exited successfully");
        } else {
            let code = outcome
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "none (terminated by signal)".to_string());
            error!("Build process exited with code {}", code);
            publisher.publish(format!("Build failed with exit code {}", code), LogStatus::Failed);
        }

        Ok(outcome)
    }
}

/// Process group of a running build, killed as a whole on timeout, on exit
/// of the shell and when the build future is dropped. Signalled at most once.
struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn new(pgid: Option<u32>) -> Self {
        Self { pgid }
    }

    #[cfg(unix)]
    fn kill(&mut self) {
        let Some(pgid) = self.pgid.take().and_then(|id| libc::pid_t::try_from(id).ok()) else {
            return;
        };
        // SAFETY: killpg only sends a signal; an empty group yields ESRCH
        let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
        if rc == 0 {
            debug!("Killed build process group {}", pgid);
        } else {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                warn!("Failed to kill build process group {}: {}", pgid, err);
            }
        }
    }

    #[cfg(not(unix))]
    fn kill(&mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

#[derive(Debug, Clone, Copy)]
enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    fn prefix(&self) -> &'static str {
        match self {
            OutputStream::Stdout => "Build output",
            OutputStream::Stderr => "Build error",
        }
    }
}

/// Forward each output line, trimmed, to the publisher
fn forward<R>(
    reader: R,
    publisher: LogPublisher,
    stream: OutputStream,
    status: LogStatus,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match stream {
                        OutputStream::Stdout => info!("{}", line),
                        OutputStream::Stderr => warn!("{}", line),
                    }
                    publisher.publish(format!("{}: {}", stream.prefix(), line), status);
                }
                Err(e) => {
                    warn!("Failed to read build {:?}: {}", stream, e);
                    break;
                }
            }
        }

        debug!("Build {:?} closed", stream);
    })
}

async fn join_readers(readers: Vec<JoinHandle<()>>) {
    for mut reader in readers {
        match tokio::time::timeout(READER_GRACE, &mut reader).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Output reader failed: {}", e),
            Err(_) => {
                // A leftover grandchild can keep the pipe open
                warn!("Output reader still open after {:?}, detaching", READER_GRACE);
                reader.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::recording_publisher;

    fn options(command: &str, dir: &std::path::Path) -> BuildOptions {
        BuildOptions {
            command: command.to_string(),
            working_dir: dir.to_path_buf(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_successful_build_streams_output() {
        let dir = tempfile::tempdir().unwrap();
        let (publisher, worker, transport) = recording_publisher();

        let executor = ProcessExecutor::new(options(
            "echo '  hello  '; echo; echo careful >&2; exit 0",
            dir.path(),
        ));
        let outcome = executor.run(&publisher).await.unwrap();
        worker.shutdown().await;

        assert_eq!(outcome, BuildOutcome { exit_code: Some(0), succeeded: true });
        assert_eq!(
            transport.logs_with_status(LogStatus::Info).await,
            vec!["Build output: hello"]
        );
        assert_eq!(
            transport.logs_with_status(LogStatus::Failed).await,
            vec!["Build error: careful"]
        );
    }

    #[tokio::test]
    async fn test_non_zero_exit_reports_code() {
        let dir = tempfile::tempdir().unwrap();
        let (publisher, worker, transport) = recording_publisher();

        let outcome = ProcessExecutor::new(options("exit 2", dir.path()))
            .run(&publisher)
            .await
            .unwrap();
        worker.shutdown().await;

        assert_eq!(outcome, BuildOutcome { exit_code: Some(2), succeeded: false });
        assert_eq!(
            transport.logs_with_status(LogStatus::Failed).await,
            vec!["Build failed with exit code 2"]
        );
    }

    #[tokio::test]
    async fn test_runs_in_created_working_dir() {
        let root = tempfile::tempdir().unwrap();
        let work = root.path().join("output");
        let (publisher, worker, _transport) = recording_publisher();

        let outcome = ProcessExecutor::new(options("touch built.txt", &work))
            .run(&publisher)
            .await
            .unwrap();
        worker.shutdown().await;

        assert!(outcome.succeeded);
        assert!(work.join("built.txt").is_file());
    }

    #[tokio::test]
    async fn test_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let (publisher, worker, transport) = recording_publisher();

        let executor = ProcessExecutor::new(BuildOptions {
            shell: "/nonexistent/shell".to_string(),
            ..options("exit 0", dir.path())
        });
        let result = executor.run(&publisher).await;
        worker.shutdown().await;

        assert!(matches!(result, Err(PipelineError::Spawn(_))));
        let failed = transport.logs_with_status(LogStatus::Failed).await;
        assert_eq!(failed.len(), 1);
        assert!(failed[0].starts_with("Process error:"));
    }

    #[tokio::test]
    async fn test_stderr_status_is_configurable() {
        let dir = tempfile::tempdir().unwrap();
        let (publisher, worker, transport) = recording_publisher();

        let executor = ProcessExecutor::new(BuildOptions {
            stderr_status: LogStatus::Info,
            ..options("echo 'npm WARN deprecated' >&2", dir.path())
        });
        executor.run(&publisher).await.unwrap();
        worker.shutdown().await;

        assert!(transport.logs_with_status(LogStatus::Failed).await.is_empty());
        assert_eq!(
            transport.logs_with_status(LogStatus::Info).await,
            vec!["Build error: npm WARN deprecated"]
        );
    }

    #[tokio::test]
    async fn test_timeout_kills_build() {
        let dir = tempfile::tempdir().unwrap();
        let (publisher, worker, _transport) = recording_publisher();

        let executor = ProcessExecutor::new(BuildOptions {
            timeout: Some(Duration::from_millis(200)),
            ..options("exec sleep 30", dir.path())
        });
        let started = std::time::Instant::now();
        let result = executor.run(&publisher).await;
        worker.shutdown().await;

        assert!(matches!(result, Err(PipelineError::BuildTimeout(_))));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_shell_children() {
        let dir = tempfile::tempdir().unwrap();
        let (publisher, worker, transport) = recording_publisher();

        // The shell forks sleep instead of exec-ing it
        let executor = ProcessExecutor::new(BuildOptions {
            timeout: Some(Duration::from_millis(200)),
            ..options("sleep 30; true", dir.path())
        });
        let started = std::time::Instant::now();
        let result = executor.run(&publisher).await;
        worker.shutdown().await;

        assert!(matches!(result, Err(PipelineError::BuildTimeout(_))));
        assert!(started.elapsed() < READER_GRACE);
        assert_eq!(
            transport.logs_with_status(LogStatus::Failed).await,
            vec!["Build timed out after 200ms"]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_background_leftovers_do_not_hold_output() {
        let dir = tempfile::tempdir().unwrap();
        let (publisher, worker, _transport) = recording_publisher();

        let executor = ProcessExecutor::new(options("sleep 30 & echo done", dir.path()));
        let started = std::time::Instant::now();
        let outcome = executor.run(&publisher).await.unwrap();
        worker.shutdown().await;

        assert!(outcome.succeeded);
        assert!(started.elapsed() < READER_GRACE);
    }
}
