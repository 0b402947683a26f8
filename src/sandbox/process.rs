// src/sandbox/process.rs

//! Supervised execution of external commands
//!
//! Children start in their own process group with a cleared environment and
//! the fixed umask. Output is drained on reader threads while the runner
//! polls for exit, so a cancellation can reach the whole process group
//! (configure scripts and make fork deeply). Given a log file, the readers
//! copy output into it as it arrives, so an interrupted command still leaves
//! everything it printed.

use super::{CancelToken, SandboxEnv, UMASK};
use nix::sys::signal::{Signal, killpg};
use nix::sys::stat::{Mode, umask};
use nix::unistd::Pid;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// How long a cancelled process group gets to exit after SIGTERM
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Captured result of a finished process
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Exit code, or `None` if the process was killed by a signal
    pub code: Option<i32>,
    pub signal: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    fn from_status(status: ExitStatus, stdout: Vec<u8>, stderr: Vec<u8>) -> Self {
        Self {
            code: status.code(),
            signal: status.signal(),
            stdout,
            stderr,
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Short description of how the process ended
    pub fn describe_exit(&self) -> String {
        match (self.code, self.signal) {
            (Some(code), _) => format!("exit status {}", code),
            (None, Some(sig)) => format!("killed by signal {}", sig),
            (None, None) => "unknown exit status".to_string(),
        }
    }

    /// Last `lines` lines of stderr, for error messages
    pub fn stderr_tail(&self, lines: usize) -> String {
        let stderr = String::from_utf8_lossy(&self.stderr);
        let all: Vec<&str> = stderr.lines().collect();
        let start = all.len().saturating_sub(lines);
        all[start..].join("\n")
    }
}

/// How a supervised process ended
#[derive(Debug)]
pub enum ProcessExit {
    Finished(ProcessOutput),
    /// The cancel token fired; the process group was terminated
    Cancelled,
}

/// Runs external commands under a [`SandboxEnv`]
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    cancel: CancelToken,
    poll_interval: Duration,
}

impl ProcessRunner {
    pub fn new(cancel: CancelToken) -> Self {
        Self {
            cancel,
            poll_interval: Duration::from_millis(100),
        }
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Run `program` with `args` in `cwd` and wait for it to exit
    pub fn run<S: AsRef<str>>(
        &self,
        program: &str,
        args: &[S],
        cwd: &Path,
        env: &SandboxEnv,
    ) -> io::Result<ProcessExit> {
        self.run_logged(program, args, cwd, env, None)
    }

    /// Like [`run`](Self::run), also streaming stdout and stderr into `log`
    pub fn run_logged<S: AsRef<str>>(
        &self,
        program: &str,
        args: &[S],
        cwd: &Path,
        env: &SandboxEnv,
        log: Option<File>,
    ) -> io::Result<ProcessExit> {
        if self.cancel.is_cancelled() {
            return Ok(ProcessExit::Cancelled);
        }

        let mut cmd = Command::new(program);
        cmd.args(args.iter().map(AsRef::as_ref))
            .current_dir(cwd)
            .env_clear()
            .envs(env.vars())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);

        // SAFETY: umask is async-signal-safe and touches no shared state.
        unsafe {
            cmd.pre_exec(|| {
                umask(Mode::from_bits_truncate(UMASK as nix::libc::mode_t));
                Ok(())
            });
        }

        debug!("Spawning {} in {}", program, cwd.display());
        let mut child = cmd.spawn()?;

        let log = log.map(|file| Arc::new(Mutex::new(file)));
        let stdout = spawn_reader(child.stdout.take(), log.clone());
        let stderr = spawn_reader(child.stderr.take(), log);

        let status = loop {
            if let Some(status) = child.wait_timeout(self.poll_interval)? {
                break Some(status);
            }
            if self.cancel.is_cancelled() {
                terminate_group(&mut child)?;
                break None;
            }
        };

        let stdout = join_reader(stdout);
        let stderr = join_reader(stderr);

        Ok(match status {
            Some(status) => ProcessExit::Finished(ProcessOutput::from_status(status, stdout, stderr)),
            None => ProcessExit::Cancelled,
        })
    }
}

type SharedLog = Arc<Mutex<File>>;

fn spawn_reader<R: Read + Send + 'static>(
    pipe: Option<R>,
    log: Option<SharedLog>,
) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buffer = Vec::new();
            let mut chunk = [0u8; 8192];
            loop {
                // Read errors truncate the capture; the exit status still decides success.
                let n = match pipe.read(&mut chunk) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                buffer.extend_from_slice(&chunk[..n]);
                if let Some(log) = &log {
                    let mut file = log.lock().unwrap_or_else(PoisonError::into_inner);
                    if let Err(e) = file.write_all(&chunk[..n]) {
                        debug!("Stage log write failed: {}", e);
                    }
                }
            }
            buffer
        })
    })
}

fn join_reader(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

/// SIGTERM the child's process group, escalating to SIGKILL
fn terminate_group(child: &mut Child) -> io::Result<()> {
    let pgid = Pid::from_raw(child.id() as i32);
    warn!("Interrupt received, terminating process group {}", pgid);

    if let Err(e) = killpg(pgid, Signal::SIGTERM) {
        debug!("SIGTERM to process group {} failed: {}", pgid, e);
    }
    if child.wait_timeout(TERMINATE_GRACE)?.is_none() {
        if let Err(e) = killpg(pgid, Signal::SIGKILL) {
            debug!("SIGKILL to process group {} failed: {}", pgid, e);
        }
        child.wait()?;
    }
    Ok(())
}
