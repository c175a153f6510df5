// Human-readable error messages for fanout

use std::fmt;
use std::io::IsTerminal;
use std::path::PathBuf;

use colored::*;

/// Initialize color output based on TTY detection and NO_COLOR environment variable
fn should_use_colors() -> bool {
    // https://no-color.org/
    if std::env::var("NO_COLOR").is_ok() {
        return false;
    }

    // Errors are written to stderr
    std::io::stderr().is_terminal()
}

/// Fatal errors: anything that stops a run before or outside of dispatch.
///
/// Per-host problems never surface here; they become an
/// [`Outcome`](crate::executor::Outcome) for that host instead.
#[derive(Debug)]
pub enum FanoutError {
    /// Invalid run configuration (zero timeout, zero concurrency, no work)
    Config {
        message: String,
        suggestion: Option<String>,
    },

    /// Host list could not be read or is empty
    Inventory {
        message: String,
        suggestion: Option<String>,
    },

    /// I/O errors on the control node
    Io {
        message: String,
        path: Option<PathBuf>,
    },
}

impl FanoutError {
    pub fn config(message: impl Into<String>, suggestion: Option<&str>) -> Self {
        FanoutError::Config {
            message: message.into(),
            suggestion: suggestion.map(str::to_string),
        }
    }
}

impl std::error::Error for FanoutError {}

impl fmt::Display for FanoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !should_use_colors() {
            colored::control::set_override(false);
        }

        match self {
            FanoutError::Config {
                message,
                suggestion,
            } => {
                writeln!(f, "{}: {}", "CONFIG ERROR".red().bold(), message)?;
                write_hint(f, suggestion.as_deref())
            }

            FanoutError::Inventory {
                message,
                suggestion,
            } => {
                writeln!(f, "{}: {}", "INVENTORY ERROR".red().bold(), message)?;
                write_hint(f, suggestion.as_deref())
            }

            FanoutError::Io { message, path } => {
                writeln!(f, "{}: {}", "I/O ERROR".red().bold(), message)?;
                if let Some(path) = path {
                    writeln!(f, "  {} {}", "Path:".dimmed(), path.display())?;
                }
                Ok(())
            }
        }
    }
}

fn write_hint(f: &mut fmt::Formatter<'_>, suggestion: Option<&str>) -> fmt::Result {
    if let Some(suggestion) = suggestion {
        writeln!(f)?;
        writeln!(f, "{}: {}", "Hint".yellow().bold(), suggestion)?;
    }
    Ok(())
}

/// Suggest a fix for a failure message reported by a host
pub fn suggest_fix(message: &str) -> Option<&'static str> {
    let message = message.to_lowercase();
    if message.contains("connection refused") {
        Some("Ensure SSH service is running on the target host")
    } else if message.contains("timed out") || message.contains("timeout") {
        Some("Check network connectivity and firewall rules")
    } else if message.contains("authentication") {
        Some("Verify the SSH key is loaded in the agent or pass --private-key")
    } else if message.contains("resolve") {
        Some("Check the host name in the host list")
    } else {
        None
    }
}
