// fanout - run one command on many hosts at once
//
// Hosts are dispatched over a bounded number of slots; every host gets a
// deadline, and a host that misses it is abandoned instead of holding up the
// rest of the run.

pub mod executor;
pub mod inventory;
pub mod output;

pub use executor::{
    BoundedDispatcher, Completion, Dispatch, ExecError, Outcome, RemoteExecutor, RemoteTask,
    SshOptions, TaskRunner, TaskSpec, WorkItem,
};
pub use inventory::{Host, Inventory};
pub use output::{FanoutError, OutputFormat, OutputWriter, RunRecap};

/// Version of the fanout tool
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
