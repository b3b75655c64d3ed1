//! Isolation for the untrusted first-load pass.
//!
//! The first `dlopen` of an unknown plugin can crash or corrupt the process,
//! so the cold scan runs it in a child. The runner is a seam: production uses
//! [`ForkRunner`], tests and single-shot tools use [`InlineRunner`].

use crate::error::{DriverError, DriverResult};
use log::error;

/// Runs a scan job in isolation.
pub trait SubprocessRunner: Send + Sync {
    fn run(&self, job: &(dyn Fn() -> DriverResult<()> + Sync)) -> DriverResult<()>;
}

/// Forks and runs the job in the child process.
#[derive(Debug, Default)]
pub struct ForkRunner;

impl SubprocessRunner for ForkRunner {
    fn run(&self, job: &(dyn Fn() -> DriverResult<()> + Sync)) -> DriverResult<()> {
        // SAFETY: the child only runs the job and exits; it never returns
        // into the caller's stack.
        let pid = unsafe { libc::fork() };
        if pid < 0 {
            return Err(DriverError::Fault(format!(
                "fork failed: {}",
                std::io::Error::last_os_error()
            )));
        }

        if pid == 0 {
            let code = match job() {
                Ok(()) => 0,
                Err(err) => {
                    error!("scan subprocess failed: {}", err);
                    1
                }
            };
            unsafe { libc::_exit(code) };
        }

        let mut status: libc::c_int = 0;
        loop {
            let ret = unsafe { libc::waitpid(pid, &mut status, 0) };
            if ret >= 0 {
                break;
            }
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(DriverError::Fault(format!("waitpid failed: {}", err)));
        }

        if libc::WIFSIGNALED(status) {
            return Err(DriverError::Fault(format!(
                "scan subprocess killed by signal {}",
                libc::WTERMSIG(status)
            )));
        }

        match libc::WEXITSTATUS(status) {
            0 => Ok(()),
            code => Err(DriverError::Fault(format!(
                "scan subprocess exited with status {}",
                code
            ))),
        }
    }
}

/// Runs the job in the calling process.
#[derive(Debug, Default)]
pub struct InlineRunner;

impl SubprocessRunner for InlineRunner {
    fn run(&self, job: &(dyn Fn() -> DriverResult<()> + Sync)) -> DriverResult<()> {
        job()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn inline_runner_propagates_job_result() {
        let runner = InlineRunner;
        assert!(runner.run(&|| Ok(())).is_ok());
        let err = runner
            .run(&|| Err(DriverError::Fault("boom".to_string())))
            .unwrap_err();
        assert!(matches!(err, DriverError::Fault(_)));
    }

    #[test]
    fn fork_runner_executes_job_in_child() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("marker");

        let runner = ForkRunner;
        runner
            .run(&|| {
                std::fs::write(&marker, b"scanned")?;
                Ok(())
            })
            .unwrap();

        assert_eq!(std::fs::read(&marker).unwrap(), b"scanned");
    }

    #[test]
    fn fork_runner_reports_child_failure_as_fault() {
        let runner = ForkRunner;
        let err = runner
            .run(&|| Err(DriverError::Invalid("bad plugin".to_string())))
            .unwrap_err();
        assert!(matches!(err, DriverError::Fault(_)));
    }
}
