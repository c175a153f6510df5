// JSON output for structured logging

use std::path::Path;

use serde_json::{json, Value};

use super::terminal::RunRecap;
use crate::executor::Completion;

/// JSON output manager for machine-readable logging (NDJSON, one event per line)
pub struct JsonOutput {
    verbose: bool,
    quiet: bool,
}

impl JsonOutput {
    pub fn new(verbose: bool, quiet: bool) -> Self {
        JsonOutput { verbose, quiet }
    }

    pub fn dispatch_start_event(command: &str, hosts: usize, capacity: usize, out_dir: &Path) -> Value {
        json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "event": "dispatch_start",
            "command": command,
            "hosts_count": hosts,
            "capacity": capacity,
            "out_dir": out_dir.display().to_string(),
        })
    }

    /// Event for one host. Captured output is only included in verbose mode;
    /// it is already in the host's output file.
    pub fn host_complete_event(&self, completion: &Completion) -> Value {
        let mut event = json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "event": "host_complete",
            "index": completion.index,
            "host": completion.item,
            "duration_ms": completion.elapsed.as_millis() as u64,
            "result": completion.outcome,
        });

        if !self.verbose {
            if let Some(result) = event.get_mut("result").and_then(Value::as_object_mut) {
                result.remove("text");
            }
        }

        event
    }

    pub fn recap_event(recap: &RunRecap) -> Value {
        json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "event": "recap",
            "ok": recap.ok,
            "failed": recap.failed,
            "timeout": recap.timed_out,
            "duration_ms": recap.total_duration.as_millis() as u64,
        })
    }

    pub fn print_dispatch_header(&self, command: &str, hosts: usize, capacity: usize, out_dir: &Path) {
        if self.quiet {
            return;
        }
        self.emit_json(&Self::dispatch_start_event(command, hosts, capacity, out_dir));
    }

    pub fn print_completion(&self, completion: &Completion) {
        // Timeouts and failures are reported even in quiet mode
        if self.quiet && completion.outcome.is_success() {
            return;
        }
        self.emit_json(&self.host_complete_event(completion));
    }

    pub fn print_recap(&self, recap: &RunRecap) {
        if self.quiet {
            return;
        }
        self.emit_json(&Self::recap_event(recap));
    }

    fn emit_json(&self, event: &Value) {
        println!("{}", event);
    }
}
