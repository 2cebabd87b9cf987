use crate::error::ProcessError;
use log::debug;
use std::io::Read;
use std::path::Path;
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Default upper bound for a single external command
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

const POLL_STEP: Duration = Duration::from_millis(5);

/// Runs external commands for the enricher
///
/// Arguments are always passed as a vector; nothing is interpreted by a shell.
/// Implementations return the trimmed standard output of a successful run.
#[cfg_attr(test, mockall::automock)]
pub trait ProcessInvoker {
    /// Run `program` with `args` in `cwd`
    ///
    /// # Errors
    ///
    /// Spawn failures, timeouts, non-zero exits and empty output are all
    /// reported as `ProcessError`.
    fn run(&self, program: &str, args: &[String], cwd: &Path) -> Result<String, ProcessError>;
}

/// Convert a path into a subprocess argument
///
/// Rejects paths that are not UTF-8, contain NUL bytes, or could be mistaken
/// for an option.
pub fn path_argument(path: &Path) -> Result<String, ProcessError> {
    let text = path.to_str().ok_or_else(|| {
        ProcessError::InvalidArgument(format!("non UTF-8 path: {}", path.display()))
    })?;
    if text.is_empty() {
        return Err(ProcessError::InvalidArgument("empty path".to_string()));
    }
    if text.contains('\0') {
        return Err(ProcessError::InvalidArgument(format!(
            "path contains NUL: {}",
            path.display()
        )));
    }
    if text.starts_with('-') {
        return Err(ProcessError::InvalidArgument(format!(
            "path looks like an option: {}",
            text
        )));
    }
    Ok(text.to_string())
}

/// Invoker backed by real child processes with a hard timeout
///
/// The child's stdout is switched to non-blocking mode so the deadline is
/// checked while output is still being produced; a child that outlives the
/// deadline is killed.
#[derive(Debug, Clone)]
pub struct SystemProcessInvoker {
    timeout: Duration,
}

impl Default for SystemProcessInvoker {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_TIMEOUT)
    }
}

impl SystemProcessInvoker {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn set_nonblocking(stdout: &ChildStdout) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let fd = stdout.as_raw_fd();
            unsafe {
                let flags = libc::fcntl(fd, libc::F_GETFL);
                if flags >= 0 {
                    libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = stdout;
        }
    }

    fn abandon(child: &mut Child) {
        let _ = child.kill();
        let _ = child.wait();
    }

    /// Drain stdout until EOF or the deadline
    fn read_output(
        &self,
        child: &mut Child,
        stdout: &mut ChildStdout,
        deadline: Instant,
    ) -> Result<Vec<u8>, ProcessError> {
        let mut output = Vec::new();
        let mut buf = [0u8; 4096];

        loop {
            match stdout.read(&mut buf) {
                Ok(0) => return Ok(output),
                Ok(n) => {
                    output.extend_from_slice(&buf[..n]);
                    continue;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    Self::abandon(child);
                    return Err(ProcessError::IoError(e));
                }
            }

            if Instant::now() >= deadline {
                Self::abandon(child);
                return Err(ProcessError::Timeout(self.timeout));
            }
            thread::sleep(POLL_STEP);
        }
    }

    fn wait_for_exit(
        &self,
        child: &mut Child,
        deadline: Instant,
    ) -> Result<ExitStatus, ProcessError> {
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                Self::abandon(child);
                return Err(ProcessError::Timeout(self.timeout));
            }
            thread::sleep(POLL_STEP);
        }
    }
}

impl ProcessInvoker for SystemProcessInvoker {
    fn run(&self, program: &str, args: &[String], cwd: &Path) -> Result<String, ProcessError> {
        if !cwd.is_absolute() {
            return Err(ProcessError::InvalidArgument(format!(
                "working directory must be absolute: {}",
                cwd.display()
            )));
        }
        if let Some(bad) = args.iter().find(|arg| arg.contains('\0')) {
            return Err(ProcessError::InvalidArgument(format!(
                "argument contains NUL: {:?}",
                bad
            )));
        }

        debug!(
            target: "logwatch::enricher",
            "Running command program={} args={:?} cwd={}",
            program,
            args,
            cwd.display()
        );

        let mut child = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| ProcessError::SpawnFailed(format!("{}: {}", program, e)))?;

        let deadline = Instant::now() + self.timeout;
        let mut stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                Self::abandon(&mut child);
                return Err(ProcessError::SpawnFailed(format!(
                    "{}: no stdout available",
                    program
                )));
            }
        };
        Self::set_nonblocking(&stdout);

        let output = self.read_output(&mut child, &mut stdout, deadline)?;
        let status = self.wait_for_exit(&mut child, deadline)?;

        if !status.success() {
            return Err(ProcessError::NonZeroExit(status.to_string()));
        }

        let text = String::from_utf8_lossy(&output).trim().to_string();
        if text.is_empty() {
            return Err(ProcessError::EmptyOutput);
        }
        Ok(text)
    }
}
