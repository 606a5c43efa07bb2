use std::{
    io,
    path::PathBuf,
    process::{Child, Command, Stdio},
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use crate::{
    error::SpawnError,
    process_log::{SharedProcessLog, create_session_log_file, start_log_reader},
};

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use self::unix as platform;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use self::windows as platform;

pub use platform::find_client_binary;

const TERMINATE_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildExit {
    pub code: Option<i32>,
}

impl std::fmt::Display for ChildExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code: {code}"),
            None => write!(f, "terminated by signal"),
        }
    }
}

/// One running external process.
pub trait ProcessHandle: Send {
    /// Non-blocking. `Ok(Some(_))` once the process has exited.
    fn poll_exited(&mut self) -> io::Result<Option<ChildExit>>;

    /// Requests a graceful exit, waits up to `bound`, then kills.
    fn terminate_and_wait(&mut self, bound: Duration) -> ChildExit;
}

pub struct LaunchRequest<'a> {
    /// Used to name the session log.
    pub session_name: &'a str,
    pub argv: &'a [String],
}

pub trait ProcessLauncher: Send + Sync {
    fn spawn(&self, request: &LaunchRequest<'_>) -> Result<Box<dyn ProcessHandle>, SpawnError>;
}

pub struct ChildProcess {
    child: Child,
}

impl ChildProcess {
    pub fn new(child: Child) -> Self {
        Self { child }
    }

    fn reap(&mut self) -> ChildExit {
        match self.child.wait() {
            Ok(status) => {
                log::info!("[terminate] child reaped: {status}");
                ChildExit {
                    code: status.code(),
                }
            }
            Err(error) => {
                log::warn!("[terminate] child wait error: {error}");
                ChildExit { code: None }
            }
        }
    }

    /// Waits up to `bound` for a requested exit, then kills. Without a
    /// delivered request there is nothing to wait for.
    fn await_exit_or_kill(&mut self, requested: bool, bound: Duration) -> ChildExit {
        let process_id = self.child.id();
        let bound = if requested { bound } else { Duration::ZERO };
        let deadline = Instant::now() + bound;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    log::info!("[terminate] child exited gracefully (status={status})");
                    return ChildExit {
                        code: status.code(),
                    };
                }
                Ok(None) => {}
                Err(error) => {
                    log::warn!("[terminate] poll failed for pid={process_id}: {error}");
                    break;
                }
            }
            if Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(TERMINATE_POLL_INTERVAL);
        }

        if requested {
            log::warn!("[terminate] graceful shutdown timed out for pid={process_id}, killing");
        }
        if let Err(error) = self.child.kill() {
            log::warn!("[terminate] kill failed for pid={process_id}: {error}");
        }
        self.reap()
    }
}

impl ProcessHandle for ChildProcess {
    fn poll_exited(&mut self) -> io::Result<Option<ChildExit>> {
        self.child
            .try_wait()
            .map(|status| status.map(|status| ChildExit { code: status.code() }))
    }

    fn terminate_and_wait(&mut self, bound: Duration) -> ChildExit {
        let process_id = self.child.id();

        if let Ok(Some(status)) = self.child.try_wait() {
            log::info!("[terminate] child {process_id} already exited: {status}");
            return ChildExit {
                code: status.code(),
            };
        }

        let requested = platform::terminate_process(process_id);
        if requested {
            log::info!("[terminate] sent termination request to pid={process_id}");
        } else {
            log::warn!("[terminate] termination request failed for pid={process_id}");
        }
        self.await_exit_or_kill(requested, bound)
    }
}

/// Spawns the tunnel client directly (no shell) and drains its output into
/// the shared process log.
pub struct ClientLauncher {
    process_log: SharedProcessLog,
    logs_directory: Option<PathBuf>,
}

impl ClientLauncher {
    pub fn new(process_log: SharedProcessLog, logs_directory: Option<PathBuf>) -> Self {
        Self {
            process_log,
            logs_directory,
        }
    }
}

impl Default for ClientLauncher {
    fn default() -> Self {
        Self::new(Arc::new(Mutex::new(Default::default())), None)
    }
}

impl ProcessLauncher for ClientLauncher {
    fn spawn(&self, request: &LaunchRequest<'_>) -> Result<Box<dyn ProcessHandle>, SpawnError> {
        let spawn_error = |source: io::Error| SpawnError {
            argv: request.argv.to_vec(),
            source,
        };

        let (program, arguments) = request.argv.split_first().ok_or_else(|| {
            spawn_error(io::Error::new(
                io::ErrorKind::InvalidInput,
                "empty command line",
            ))
        })?;

        log::info!("[connect] spawning: {}", request.argv.join(" "));
        let mut command = Command::new(program);
        command
            .args(arguments)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        platform::configure_command(&mut command);

        let mut child = command.spawn().map_err(spawn_error)?;
        log::info!("[connect] child started (pid={})", child.id());

        self.process_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reset();
        let log_file = self
            .logs_directory
            .as_deref()
            .and_then(|directory| create_session_log_file(directory, request.session_name));
        if let Some(stderr) = child.stderr.take() {
            start_log_reader(stderr, "stderr", self.process_log.clone(), log_file.clone());
        } else {
            log::warn!("[log_reader] no stderr pipe from child");
        }
        if let Some(stdout) = child.stdout.take() {
            start_log_reader(stdout, "stdout", self.process_log.clone(), log_file);
        }

        Ok(Box::new(ChildProcess::new(child)))
    }
}

pub fn run_silent_with_output(program: &str, arguments: &[&str]) -> (bool, String) {
    log::debug!("[cmd] {} {}", program, arguments.join(" "));
    let mut command = Command::new(program);
    command
        .args(arguments)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    platform::configure_command(&mut command);

    match command.output() {
        Ok(output) => {
            let success = output.status.success();
            let stdout = String::from_utf8_lossy(&output.stdout).to_string();
            if !success {
                log::debug!(
                    "[cmd] FAILED (exit {}): {} {}\n  stderr: {}",
                    output.status.code().unwrap_or(-1),
                    program,
                    arguments.join(" "),
                    String::from_utf8_lossy(&output.stderr).trim(),
                );
            }
            (success, stdout)
        }
        Err(error) => {
            log::debug!("[cmd] spawn error for {}: {}", program, error);
            (false, error.to_string())
        }
    }
}

pub fn run_silent(program: &str, arguments: &[&str]) -> bool {
    run_silent_with_output(program, arguments).0
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sleeping_child() -> ChildProcess {
        ChildProcess::new(
            Command::new("sh")
                .args(["-c", "sleep 30"])
                .stdin(Stdio::null())
                .spawn()
                .unwrap(),
        )
    }

    #[test]
    fn undelivered_request_kills_without_waiting_for_the_bound() {
        let mut child = sleeping_child();

        let started = Instant::now();
        let exit = child.await_exit_or_kill(false, Duration::from_secs(10));

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(exit.code, None);
    }

    #[test]
    fn delivered_request_waits_for_the_bound_before_killing() {
        let mut child = sleeping_child();

        let started = Instant::now();
        let exit = child.await_exit_or_kill(true, Duration::from_millis(300));

        assert!(started.elapsed() >= Duration::from_millis(300));
        assert_eq!(exit.code, None);
    }
}
