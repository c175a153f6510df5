// Inventory module for host lists

use std::path::Path;

use tracing::debug;

use crate::executor::WorkItem;
use crate::output::errors::FanoutError;

/// A single host from the host list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    /// The entry exactly as written; also the output file name
    pub name: String,
    pub address: String,
    pub port: Option<u16>,
    pub user: Option<String>,
}

impl Host {
    /// Parse `[user@]address[:port]`.
    ///
    /// IPv6 literals may be written bare (`::1`) or bracketed
    /// (`[::1]:2222`). Anything that does not parse as a port is kept as part
    /// of the address.
    pub fn parse(entry: &str) -> Self {
        let name = entry.trim().to_string();

        let (user, rest) = match name.rsplit_once('@') {
            Some((user, rest)) if !user.is_empty() => (Some(user.to_string()), rest),
            _ => (None, name.as_str()),
        };

        let (address, port) = if let Some(bracketed) = rest.strip_prefix('[') {
            match bracketed.split_once(']') {
                Some((addr, tail)) => {
                    let port = tail.strip_prefix(':').and_then(|p| p.parse().ok());
                    (addr.to_string(), port)
                }
                None => (rest.to_string(), None),
            }
        } else {
            match rest.rsplit_once(':') {
                // A second colon means a bare IPv6 literal
                Some((addr, port)) if !addr.contains(':') => match port.parse() {
                    Ok(port) => (addr.to_string(), Some(port)),
                    Err(_) => (rest.to_string(), None),
                },
                _ => (rest.to_string(), None),
            }
        };

        Host {
            name,
            address,
            port,
            user,
        }
    }

    /// Check if this host should run on the control node instead of over SSH
    pub fn is_local(&self) -> bool {
        matches!(self.address.as_str(), "localhost" | "127.0.0.1" | "::1")
    }
}

/// Ordered host list for one run
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    hosts: Vec<Host>,
}

impl Inventory {
    pub fn new() -> Self {
        Inventory { hosts: Vec::new() }
    }

    /// Load a newline-separated host list.
    ///
    /// Blank lines and `#` comments are skipped. Order and duplicates are
    /// kept as written.
    pub fn from_file(path: &Path) -> Result<Self, FanoutError> {
        let content = std::fs::read_to_string(path).map_err(|e| FanoutError::Io {
            message: format!("Failed to read host list: {}", e),
            path: Some(path.to_path_buf()),
        })?;

        let inv = Self::parse(&content);
        if inv.is_empty() {
            return Err(FanoutError::Inventory {
                message: format!("No hosts found in {}", path.display()),
                suggestion: Some("Put one host per line; lines starting with # are ignored".to_string()),
            });
        }

        debug!(path = %path.display(), hosts = inv.len(), "loaded host list");
        Ok(inv)
    }

    /// Parse host list content
    pub fn parse(content: &str) -> Self {
        let mut inv = Inventory::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            inv.add_host(Host::parse(line));
        }
        inv
    }

    /// Build a host list from a comma-separated `--hosts` flag
    pub fn from_cli_hosts(hosts_str: &str) -> Result<Self, FanoutError> {
        let mut inv = Inventory::new();
        for host_str in hosts_str.split(',') {
            let host_str = host_str.trim();
            if host_str.is_empty() {
                continue;
            }
            inv.add_host(Host::parse(host_str));
        }

        if inv.is_empty() {
            return Err(FanoutError::Inventory {
                message: "No hosts given".to_string(),
                suggestion: Some("Pass --hosts a,b,c or --hostlist <FILE>".to_string()),
            });
        }
        Ok(inv)
    }

    pub fn add_host(&mut self, host: Host) {
        self.hosts.push(host);
    }

    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Work items in host list order
    pub fn work_items(&self) -> Vec<WorkItem> {
        self.hosts.iter().map(|h| WorkItem::new(&h.name)).collect()
    }
}
