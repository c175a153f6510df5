// Executor module - running one command on many hosts

use std::path::Path;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub mod dispatcher;
pub mod local;
pub mod outcome;
pub mod remote;
pub mod runner;
pub mod ssh;
pub mod task;

pub use dispatcher::{BoundedDispatcher, Dispatch};
pub use local::LocalConnection;
pub use outcome::{Completion, Outcome, OutcomeSlot};
pub use remote::RemoteExecutor;
pub use runner::TaskRunner;
pub use ssh::{CommandResult, SshConnection, SshOptions};
pub use task::{TaskSpec, WorkItem, DEFAULT_REMOTE_DIR};

/// Errors a single host can produce. These never abort a run; the runner
/// turns them into [`Outcome::ConnectionFailure`].
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Unable to connect to {host}: {message}")]
    Connect { host: String, message: String },

    #[error("Authentication failed for {user}@{host}")]
    Auth { host: String, user: String },

    #[error("Failed to stage file on {host}: {message}")]
    Transfer { host: String, message: String },

    #[error("Failed to execute command on {host}: {message}")]
    Exec { host: String, message: String },

    #[error("Failed to write output for {host}: {source}")]
    Persist {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Task for {host} was cancelled")]
    Cancelled { host: String },
}

/// The per-host work the dispatcher fans out.
///
/// Implementations block; each call runs on its own worker thread. They
/// should check `cancel` at I/O boundaries and return early once it fires.
pub trait RemoteTask: Send + Sync + 'static {
    fn execute(
        &self,
        item: &WorkItem,
        spec: &TaskSpec,
        cancel: &CancellationToken,
    ) -> Result<String, ExecError>;
}

impl<F> RemoteTask for F
where
    F: Fn(&WorkItem, &TaskSpec, &CancellationToken) -> Result<String, ExecError>
        + Send
        + Sync
        + 'static,
{
    fn execute(
        &self,
        item: &WorkItem,
        spec: &TaskSpec,
        cancel: &CancellationToken,
    ) -> Result<String, ExecError> {
        self(item, spec, cancel)
    }
}

/// Common trait for all connection types (SSH, local)
pub trait Connection {
    /// Execute a command and capture its output, giving up once `cancel` fires
    fn exec(&self, cmd: &str, cancel: &CancellationToken) -> Result<CommandResult, ExecError>;

    /// Copy a local file to `remote_path` on the target
    fn upload_file(&self, local_path: &Path, remote_path: &str) -> Result<(), ExecError>;

    /// Get the host name for this connection
    fn host_name(&self) -> &str;
}
