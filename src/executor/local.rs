// Local command execution without SSH

use std::future::Future;
use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tokio::runtime::{Builder, Handle};
use tokio_util::sync::CancellationToken;

use super::{CommandResult, Connection, ExecError};

/// Local connection for executing commands on the control node
pub struct LocalConnection {
    host_name: String,
}

impl LocalConnection {
    /// Create a new local connection
    pub fn new(host_name: impl Into<String>) -> Self {
        LocalConnection {
            host_name: host_name.into(),
        }
    }

    fn exec_err(&self, message: String) -> ExecError {
        ExecError::Exec {
            host: self.host_name.clone(),
            message,
        }
    }

    async fn exec_async(
        &self,
        cmd: &str,
        cancel: &CancellationToken,
    ) -> Result<CommandResult, ExecError> {
        let child = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.exec_err(format!("Failed to spawn local command: {}", e)))?;

        // Dropping the child on cancellation kills it
        let output = tokio::select! {
            output = child.wait_with_output() => output
                .map_err(|e| self.exec_err(format!("Failed to wait for command: {}", e)))?,
            _ = cancel.cancelled() => {
                return Err(ExecError::Cancelled {
                    host: self.host_name.clone(),
                });
            }
        };

        Ok(CommandResult {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

/// Drive `future` to completion from a worker thread, on the run's runtime
/// when there is one
fn block_on<F: Future>(future: F) -> std::io::Result<F::Output> {
    match Handle::try_current() {
        Ok(handle) => Ok(handle.block_on(future)),
        Err(_) => Ok(Builder::new_current_thread()
            .enable_all()
            .build()?
            .block_on(future)),
    }
}

impl Connection for LocalConnection {
    fn exec(&self, cmd: &str, cancel: &CancellationToken) -> Result<CommandResult, ExecError> {
        block_on(self.exec_async(cmd, cancel))
            .map_err(|e| self.exec_err(format!("Failed to start runtime: {}", e)))?
    }

    fn upload_file(&self, local_path: &Path, remote_path: &str) -> Result<(), ExecError> {
        std::fs::copy(local_path, remote_path)
            .map(|_| ())
            .map_err(|e| ExecError::Transfer {
                host: self.host_name.clone(),
                message: format!("Failed to copy {}: {}", local_path.display(), e),
            })
    }

    fn host_name(&self) -> &str {
        &self.host_name
    }
}
