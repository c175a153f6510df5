// SSH connections to target hosts

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use ssh2::Session;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Connection, ExecError};
use crate::inventory::Host;

/// How long the read loop sleeps when the channel has nothing to offer
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Connection settings shared by every host of a run
#[derive(Debug, Clone)]
pub struct SshOptions {
    pub default_user: Option<String>,
    pub default_port: u16,
    pub private_key_path: Option<PathBuf>,
    pub connect_timeout: Duration,
}

impl SshOptions {
    pub fn new() -> Self {
        SshOptions {
            default_user: None,
            default_port: 22,
            private_key_path: None,
            connect_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_default_user(mut self, user: impl Into<String>) -> Self {
        self.default_user = Some(user.into());
        self
    }

    pub fn with_default_port(mut self, port: u16) -> Self {
        self.default_port = port;
        self
    }

    pub fn with_private_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.private_key_path = Some(path.into());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// These options with the connect timeout capped at `deadline`, so an
    /// abandoned connect never outlives the host's own deadline
    pub fn bounded_by(&self, deadline: Duration) -> Self {
        let mut options = self.clone();
        options.connect_timeout = self.connect_timeout.min(deadline);
        options
    }

    /// User for `host`: the one in the host list, else the configured
    /// default, else `$USER`, else root
    pub fn user_for(&self, host: &Host) -> String {
        host.user
            .clone()
            .or_else(|| self.default_user.clone())
            .or_else(|| std::env::var("USER").ok())
            .unwrap_or_else(|| "root".to_string())
    }

    fn key_paths(&self) -> Vec<PathBuf> {
        let home = std::env::var("HOME").ok().map(PathBuf::from);
        self.private_key_path
            .iter()
            .cloned()
            .chain(
                [
                    home.as_ref().map(|h| h.join(".ssh/id_ed25519")),
                    home.as_ref().map(|h| h.join(".ssh/id_rsa")),
                ]
                .into_iter()
                .flatten(),
            )
            .collect()
    }
}

impl Default for SshOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// An authenticated SSH session to one host
pub struct SshConnection {
    session: Session,
    host_name: String,
}

impl SshConnection {
    /// Connect and authenticate. Trust must already be established: only the
    /// SSH agent and key files are tried.
    pub fn connect(
        host: &Host,
        options: &SshOptions,
        cancel: &CancellationToken,
    ) -> Result<Self, ExecError> {
        let port = host.port.unwrap_or(options.default_port);
        let connect_err = |message: String| ExecError::Connect {
            host: host.name.clone(),
            message,
        };

        let address = (host.address.as_str(), port)
            .to_socket_addrs()
            .map_err(|e| connect_err(format!("Failed to resolve {}: {}", host.address, e)))?
            .next()
            .ok_or_else(|| connect_err(format!("No address found for {}", host.address)))?;

        let tcp = TcpStream::connect_timeout(&address, options.connect_timeout)
            .map_err(|e| connect_err(format!("Connection failed: {}", e)))?;

        if cancel.is_cancelled() {
            return Err(ExecError::Cancelled {
                host: host.name.clone(),
            });
        }

        let mut session =
            Session::new().map_err(|e| connect_err(format!("Failed to create SSH session: {}", e)))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(options.connect_timeout.as_millis().clamp(1, u32::MAX as u128) as u32);
        session
            .handshake()
            .map_err(|e| connect_err(format!("SSH handshake failed: {}", e)))?;

        let user = options.user_for(host);
        if !authenticate(&session, &user, options) {
            return Err(ExecError::Auth {
                host: host.name.clone(),
                user,
            });
        }

        // The connect timeout only bounds the handshake; the command itself is
        // bounded by the run's deadline and cancellation.
        session.set_timeout(0);

        debug!(host = %host.name, %user, "ssh session established");
        Ok(SshConnection {
            session,
            host_name: host.name.clone(),
        })
    }

    fn exec_err(&self, message: String) -> ExecError {
        ExecError::Exec {
            host: self.host_name.clone(),
            message,
        }
    }

    fn transfer_err(&self, message: String) -> ExecError {
        ExecError::Transfer {
            host: self.host_name.clone(),
            message,
        }
    }
}

fn authenticate(session: &Session, user: &str, options: &SshOptions) -> bool {
    // Agent first
    if let Ok(mut agent) = session.agent() {
        if agent.connect().is_ok() {
            agent.list_identities().ok();
            for identity in agent.identities().unwrap_or_default() {
                if agent.userauth(user, &identity).is_ok() {
                    return true;
                }
            }
        }
    }

    options.key_paths().iter().any(|key_path| {
        key_path.exists()
            && session
                .userauth_pubkey_file(user, None, key_path, None)
                .is_ok()
    })
}

/// Fold one non-blocking read into `out`, reporting whether bytes arrived.
/// `WouldBlock` just means nothing yet; any other error ends the command.
fn take_read(read: std::io::Result<usize>, buf: &[u8], out: &mut Vec<u8>) -> std::io::Result<bool> {
    match read {
        Ok(n) => {
            out.extend_from_slice(&buf[..n]);
            Ok(n > 0)
        }
        Err(ref e) if e.kind() == ErrorKind::WouldBlock => Ok(false),
        Err(e) => Err(e),
    }
}

impl Connection for SshConnection {
    fn exec(&self, cmd: &str, cancel: &CancellationToken) -> Result<CommandResult, ExecError> {
        let mut channel = self
            .session
            .channel_session()
            .map_err(|e| self.exec_err(format!("Failed to open channel: {}", e)))?;

        channel
            .exec(cmd)
            .map_err(|e| self.exec_err(format!("Failed to start command: {}", e)))?;

        // Non-blocking reads so the token is observed while the command runs
        self.session.set_blocking(false);

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut buf = [0u8; 4096];

        let mut pump = || -> Result<bool, ExecError> {
            loop {
                if cancel.is_cancelled() {
                    return Ok(true);
                }

                let read = channel.read(&mut buf);
                let out_activity = take_read(read, &buf, &mut stdout).map_err(|e| {
                    self.exec_err(format!("Failed to read command output: {}", e))
                })?;

                let read = channel.stderr().read(&mut buf);
                let err_activity = take_read(read, &buf, &mut stderr).map_err(|e| {
                    self.exec_err(format!("Failed to read command errors: {}", e))
                })?;

                if channel.eof() {
                    return Ok(false);
                }

                if !out_activity && !err_activity {
                    std::thread::sleep(POLL_INTERVAL);
                }
            }
        };
        let pumped = pump();

        self.session.set_blocking(true);

        if pumped? {
            channel.close().ok();
            return Err(ExecError::Cancelled {
                host: self.host_name.clone(),
            });
        }

        channel.wait_close().ok();
        let exit_code = channel.exit_status().unwrap_or(-1);

        Ok(CommandResult {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code,
        })
    }

    fn upload_file(&self, local_path: &Path, remote_path: &str) -> Result<(), ExecError> {
        let content = std::fs::read(local_path).map_err(|e| {
            self.transfer_err(format!(
                "Failed to read local file {}: {}",
                local_path.display(),
                e
            ))
        })?;

        let sftp = self
            .session
            .sftp()
            .map_err(|e| self.transfer_err(format!("Failed to open SFTP: {}", e)))?;

        let mut remote_file = sftp
            .create(Path::new(remote_path))
            .map_err(|e| self.transfer_err(format!("Failed to create {}: {}", remote_path, e)))?;

        remote_file
            .write_all(&content)
            .map_err(|e| self.transfer_err(format!("Failed to write {}: {}", remote_path, e)))?;

        Ok(())
    }

    fn host_name(&self) -> &str {
        &self.host_name
    }
}

/// Result of executing a command
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}
