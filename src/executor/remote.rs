// Remote execution of the run's command on one host

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Connection, ExecError, LocalConnection, RemoteTask, SshConnection, SshOptions};
use super::{TaskSpec, WorkItem};
use crate::inventory::Host;
use crate::output::artifact::write_host_output;

/// Connects to a host, stages the optional file, runs the command and
/// persists its standard output to `out_dir/host`.
#[derive(Debug, Clone, Default)]
pub struct RemoteExecutor {
    options: SshOptions,
}

impl RemoteExecutor {
    pub fn new(options: SshOptions) -> Self {
        RemoteExecutor { options }
    }

    fn connect(
        &self,
        host: &Host,
        spec: &TaskSpec,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn Connection>, ExecError> {
        if host.is_local() {
            return Ok(Box::new(LocalConnection::new(host.name.clone())));
        }
        let options = self.options.bounded_by(spec.timeout);
        Ok(Box::new(SshConnection::connect(host, &options, cancel)?))
    }
}

fn check_cancelled(item: &WorkItem, cancel: &CancellationToken) -> Result<(), ExecError> {
    if cancel.is_cancelled() {
        return Err(ExecError::Cancelled {
            host: item.to_string(),
        });
    }
    Ok(())
}

impl RemoteTask for RemoteExecutor {
    fn execute(
        &self,
        item: &WorkItem,
        spec: &TaskSpec,
        cancel: &CancellationToken,
    ) -> Result<String, ExecError> {
        let host = Host::parse(item.as_str());
        let conn = self.connect(&host, spec, cancel)?;

        if let (Some(file), Some(remote_path)) = (spec.file.as_deref(), spec.staged_path()) {
            check_cancelled(item, cancel)?;
            conn.upload_file(file, &remote_path)?;
            debug!(host = %item, path = %remote_path, "staged file");
        }

        check_cancelled(item, cancel)?;
        let result = conn.exec(&spec.command, cancel)?;
        if !result.success() {
            warn!(host = %item, exit_code = result.exit_code, "command exited non-zero");
        }
        if !result.stderr.is_empty() {
            debug!(host = %item, stderr = %result.stderr.trim_end(), "command stderr");
        }

        // Once the deadline has claimed this host, leave its output file alone
        check_cancelled(item, cancel)?;
        write_host_output(&spec.out_dir, conn.host_name(), &result.stdout).map_err(|source| {
            ExecError::Persist {
                host: item.to_string(),
                source,
            }
        })?;

        Ok(result.stdout)
    }
}
