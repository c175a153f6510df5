// Output module for fanout

use std::path::Path;

pub mod artifact;
pub mod errors;
pub mod json_output;
pub mod terminal;

pub use artifact::*;
pub use errors::*;
pub use json_output::*;
pub use terminal::*;

use crate::executor::Completion;

/// Output format for fanout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable text output with colors
    #[default]
    Text,
    /// Machine-readable JSON output (NDJSON format)
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(()),
        }
    }
}

/// Unified output writer supporting both text and JSON formats
pub enum OutputWriter {
    Text(TerminalOutput),
    Json(JsonOutput),
}

impl OutputWriter {
    pub fn new(format: OutputFormat, verbose: bool, quiet: bool) -> Self {
        match format {
            OutputFormat::Text => OutputWriter::Text(TerminalOutput::new(verbose, quiet)),
            OutputFormat::Json => OutputWriter::Json(JsonOutput::new(verbose, quiet)),
        }
    }

    pub fn print_dispatch_header(&mut self, command: &str, hosts: usize, capacity: usize, out_dir: &Path) {
        match self {
            OutputWriter::Text(output) => output.print_dispatch_header(command, hosts, capacity, out_dir),
            OutputWriter::Json(output) => output.print_dispatch_header(command, hosts, capacity, out_dir),
        }
    }

    pub fn print_completion(&self, completion: &Completion) {
        match self {
            OutputWriter::Text(output) => output.print_completion(completion),
            OutputWriter::Json(output) => output.print_completion(completion),
        }
    }

    pub fn print_recap(&self, recap: &RunRecap) {
        match self {
            OutputWriter::Text(output) => output.print_recap(recap),
            OutputWriter::Json(output) => output.print_recap(recap),
        }
    }
}
