// SPDX-License-Identifier: Apache-2.0

//! Bounded execution of external tools.
//!
//! Every external process is run in its own process group so that a timeout
//! or cancellation can terminate the whole tree (e.g. a `sh -c` wrapper and
//! the tool it started) and reclaim the slot.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const PIPE_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Exit code; `None` when the process was terminated by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    Exited(ProcessOutput),
    TimedOut(ProcessOutput),
    Cancelled(ProcessOutput),
}

/// Drains one output pipe on its own thread. The bytes read so far stay
/// available even if the pipe never closes.
struct PipeReader {
    buf: Arc<Mutex<Vec<u8>>>,
    closed: mpsc::Receiver<()>,
}

impl PipeReader {
    fn spawn<R: Read + Send + 'static>(mut stream: R) -> Self {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let (tx, closed) = mpsc::channel();
        let sink = Arc::clone(&buf);
        std::thread::spawn(move || {
            let mut chunk = [0u8; 8192];
            loop {
                match stream.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => sink
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .extend_from_slice(&chunk[..n]),
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
            let _ = tx.send(());
        });
        PipeReader { buf, closed }
    }

    /// Waits until `deadline` for the writer side to close.
    fn wait_closed(&self, deadline: Instant) -> bool {
        let timeout = deadline.saturating_duration_since(Instant::now());
        !matches!(
            self.closed.recv_timeout(timeout),
            Err(mpsc::RecvTimeoutError::Timeout)
        )
    }

    fn contents(&self) -> String {
        let buf = self.buf.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&buf).into_owned()
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    unsafe {
        libc::kill(-(pgid as libc::pid_t), libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}

fn kill_tree(child: &mut Child) {
    // The child leads its own process group, see `run_with_timeout`.
    kill_group(child.id());
    let _ = child.kill();
}

/// Waits for the pipes to close. A descendant that inherited them and
/// outlives the child gets `PIPE_GRACE` to finish before its process group
/// is killed.
fn await_pipes(pgid: u32, readers: &[&PipeReader]) {
    let deadline = Instant::now() + PIPE_GRACE;
    if !readers.iter().all(|r| r.wait_closed(deadline)) {
        log::warn!(
            "Process group {} still holds output pipes after exit; killing",
            pgid
        );
        kill_group(pgid);
        let deadline = Instant::now() + PIPE_GRACE;
        for r in readers {
            r.wait_closed(deadline);
        }
    }
}

/// Runs `command` to completion, killing it after `timeout` or as soon as
/// `cancel` is raised. Output is captured verbatim in every case.
pub fn run_with_timeout(
    command: &mut Command,
    timeout: Duration,
    cancel: &AtomicBool,
) -> std::io::Result<RunOutcome> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let start = Instant::now();
    let mut child = command.spawn()?;
    let pgid = child.id();
    let stdout_reader = child.stdout.take().map(PipeReader::spawn);
    let stderr_reader = child.stderr.take().map(PipeReader::spawn);

    enum Ending {
        Exited(Option<i32>),
        TimedOut,
        Cancelled,
    }

    let ending = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Ending::Exited(status.code()),
            Ok(None) => {}
            Err(e) => {
                kill_tree(&mut child);
                let _ = child.wait();
                return Err(e);
            }
        }
        if start.elapsed() >= timeout {
            log::warn!("Process {} exceeded {:?}; killing", child.id(), timeout);
            kill_tree(&mut child);
            break Ending::TimedOut;
        }
        if cancel.load(Ordering::SeqCst) {
            log::warn!("Cancelling process {}", child.id());
            kill_tree(&mut child);
            break Ending::Cancelled;
        }
        std::thread::sleep(POLL_INTERVAL);
    };

    let status = match ending {
        Ending::Exited(code) => code,
        _ => child.wait()?.code(),
    };
    let readers: Vec<&PipeReader> = stdout_reader.iter().chain(stderr_reader.iter()).collect();
    await_pipes(pgid, &readers);
    let output = ProcessOutput {
        status,
        stdout: stdout_reader.as_ref().map(PipeReader::contents).unwrap_or_default(),
        stderr: stderr_reader.as_ref().map(PipeReader::contents).unwrap_or_default(),
        elapsed: start.elapsed(),
    };
    Ok(match ending {
        Ending::Exited(_) => RunOutcome::Exited(output),
        Ending::TimedOut => RunOutcome::TimedOut(output),
        Ending::Cancelled => RunOutcome::Cancelled(output),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        command
    }

    #[test]
    fn test_captures_output_and_status() {
        let cancel = AtomicBool::new(false);
        let outcome = run_with_timeout(
            &mut sh("echo out; echo err 1>&2; exit 3"),
            Duration::from_secs(10),
            &cancel,
        )
        .unwrap();
        match outcome {
            RunOutcome::Exited(output) => {
                assert_eq!(output.status, Some(3));
                assert_eq!(output.stdout, "out\n");
                assert_eq!(output.stderr, "err\n");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_timeout_kills_process_tree() {
        let cancel = AtomicBool::new(false);
        let start = Instant::now();
        let outcome = run_with_timeout(
            &mut sh("sleep 30; echo never"),
            Duration::from_millis(200),
            &cancel,
        )
        .unwrap();
        assert!(matches!(outcome, RunOutcome::TimedOut(_)));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_background_descendant_does_not_hold_up_exit() {
        let cancel = AtomicBool::new(false);
        let start = Instant::now();
        let outcome = run_with_timeout(
            &mut sh("(sleep 30 &); echo done"),
            Duration::from_secs(60),
            &cancel,
        )
        .unwrap();
        match outcome {
            RunOutcome::Exited(output) => {
                assert_eq!(output.status, Some(0));
                assert_eq!(output.stdout, "done\n");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_raised_cancel_flag_stops_process() {
        let cancel = AtomicBool::new(true);
        let outcome = run_with_timeout(&mut sh("sleep 30"), Duration::from_secs(60), &cancel)
            .unwrap();
        assert!(matches!(outcome, RunOutcome::Cancelled(_)));
    }
}
