//! Child process execution with an optional timeout and full output capture.

use std::io::{ErrorKind, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CapturedOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
}

impl CapturedOutput {
    /// stdout followed by stderr, decoded lossily.
    pub fn combined(&self) -> String {
        let mut out = String::from_utf8_lossy(&self.stdout).into_owned();
        out.push_str(&String::from_utf8_lossy(&self.stderr));
        out
    }
}

/// How long to keep draining pipes after a timeout kill. Descendants that left
/// the process group can hold the pipes open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Run a command to completion, draining stdout/stderr on reader threads so a
/// chatty child cannot block on a full pipe. The child's stdin is closed.
///
/// On Unix the child leads its own process group. When `timeout` elapses the
/// whole group is killed and `timed_out` is set; output collected within
/// [`DRAIN_GRACE`] of the kill is returned and may be incomplete.
/// Spawn failures are returned as errors.
#[instrument(skip_all, fields(timeout_ms = timeout.map(|t| t.as_millis() as u64)))]
pub fn run_captured(mut cmd: Command, timeout: Option<Duration>) -> Result<CapturedOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_reader = StreamReader::spawn(stdout);
    let stderr_reader = StreamReader::spawn(stderr);

    let mut timed_out = false;
    let status = match timeout {
        Some(limit) => match child.wait_timeout(limit).context("wait for command")? {
            Some(status) => status,
            None => {
                warn!(timeout_ms = limit.as_millis() as u64, "command timed out, killing");
                timed_out = true;
                kill_group(&mut child);
                child.wait().context("wait command after kill")?
            }
        },
        None => child.wait().context("wait for command")?,
    };

    let grace = timed_out.then_some(DRAIN_GRACE);
    let stdout = stdout_reader.finish(grace).context("collect stdout")?;
    let stderr = stderr_reader.finish(grace).context("collect stderr")?;

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CapturedOutput {
        status,
        stdout,
        stderr,
        timed_out,
    })
}

#[cfg(unix)]
fn kill_group(child: &mut Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let pgid = Pid::from_raw(child.id() as i32);
    if let Err(err) = killpg(pgid, Signal::SIGKILL) {
        warn!(err = %err, "failed to kill process group, killing child only");
        if let Err(err) = child.kill() {
            warn!(err = %err, "failed to kill command");
        }
    }
}

#[cfg(not(unix))]
fn kill_group(child: &mut Child) {
    if let Err(err) = child.kill() {
        warn!(err = %err, "failed to kill command");
    }
}

/// Pipe drained on its own thread into a shared buffer.
struct StreamReader {
    buf: Arc<Mutex<Vec<u8>>>,
    done: mpsc::Receiver<Result<()>>,
}

impl StreamReader {
    fn spawn<R: Read + Send + 'static>(mut reader: R) -> Self {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buf);
        let (tx, done) = mpsc::channel();
        thread::spawn(move || {
            // The receiver is gone when the caller stopped waiting.
            let _ = tx.send(pump(&mut reader, &sink));
        });
        Self { buf, done }
    }

    /// Wait for end of stream, or at most `grace` when given, and return
    /// what was read.
    fn finish(self, grace: Option<Duration>) -> Result<Vec<u8>> {
        match grace {
            None => self
                .done
                .recv()
                .map_err(|_| anyhow!("output reader thread panicked"))??,
            Some(grace) => match self.done.recv_timeout(grace) {
                Ok(result) => result?,
                Err(RecvTimeoutError::Timeout) => {
                    warn!("output pipe still open after kill, returning partial output");
                }
                Err(RecvTimeoutError::Disconnected) => bail!("output reader thread panicked"),
            },
        }
        let buf = self
            .buf
            .lock()
            .map_err(|_| anyhow!("output buffer poisoned"))?;
        Ok(buf.clone())
    }
}

fn pump<R: Read>(reader: &mut R, sink: &Mutex<Vec<u8>>) -> Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err).context("read output"),
        };
        sink.lock()
            .map_err(|_| anyhow!("output buffer poisoned"))?
            .extend_from_slice(&chunk[..n]);
    }
}
