use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Exit code reported if the process was terminated by a signal.
const SIGNAL_EXIT_CODE: i32 = -1001;

/// Everything needed to run one executable.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub id: u64,
    pub executable: String,
    pub args: Vec<String>,
    /// Written to stdin, stdin is closed after it. `None` attaches no stdin at all.
    pub stdin: Option<Vec<u8>>,
    pub current_dir: PathBuf,
    /// Run through the platform shell instead of directly.
    pub shell: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The os refused to start the executable.
    #[error("failed to spawn process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("failed to collect process output: {0}")]
    Wait(#[source] std::io::Error),
    /// The process ran and exited unsuccessfully.
    #[error("process exited with code {exit_code}: {stderr}")]
    Exited { exit_code: i32, stderr: String },
}

/// Runs invocations, resolving to the collected stdout on success.
pub trait Executor: Clone + Send + Sync + 'static {
    fn execute(
        &self,
        invocation: Invocation,
    ) -> impl Future<Output = Result<Vec<u8>, ProcessError>> + Send;
}

/// Runs invocations as child processes of the server.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExecutor;

impl Executor for ProcessExecutor {
    fn execute(
        &self,
        invocation: Invocation,
    ) -> impl Future<Output = Result<Vec<u8>, ProcessError>> + Send {
        process(invocation)
    }
}

fn command(invocation: &Invocation) -> Command {
    if !invocation.shell {
        let mut command = Command::new(&invocation.executable);
        command.args(&invocation.args);
        return command;
    }

    // Arguments are joined unquoted, the shell sees them as written.
    let mut line = invocation.executable.clone();
    for arg in &invocation.args {
        line.push(' ');
        line.push_str(arg);
    }
    #[cfg(windows)]
    let mut command = {
        let mut command = Command::new("cmd");
        command.arg("/C");
        command
    };
    #[cfg(not(windows))]
    let mut command = {
        let mut command = Command::new("sh");
        command.arg("-c");
        command
    };
    command.arg(line);
    command
}

async fn process(invocation: Invocation) -> Result<Vec<u8>, ProcessError> {
    let id = invocation.id;
    let mut command = command(&invocation);
    command
        .current_dir(&invocation.current_dir)
        .stdin(if invocation.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let start = Instant::now();
    let mut child = command.spawn().map_err(ProcessError::Spawn)?;

    // Feed stdin concurrently, a child filling its stdout pipe would block otherwise.
    let writer = match (invocation.stdin, child.stdin.take()) {
        (Some(payload), Some(mut pipe)) => Some(tokio::spawn(async move {
            if let Err(e) = pipe.write_all(&payload).await {
                log::debug!(id; "stdin not fully consumed: {e}");
            }
        })),
        _ => None,
    };

    let out = child.wait_with_output().await.map_err(ProcessError::Wait)?;
    if let Some(writer) = writer {
        if let Err(e) = writer.await {
            log::debug!(id; "stdin writer failed: {e}");
        }
    }
    let time_taken = start.elapsed();

    let exit_code = out.status.code().unwrap_or(SIGNAL_EXIT_CODE);
    log::debug!(id, exit_code, time_taken:debug; "process finished");
    log::trace!(id; "stdout: {}", String::from_utf8_lossy(&out.stdout).trim());
    log::trace!(id; "stderr: {}", String::from_utf8_lossy(&out.stderr).trim());

    if out.status.success() {
        Ok(out.stdout)
    } else {
        Err(ProcessError::Exited {
            exit_code,
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        })
    }
}
