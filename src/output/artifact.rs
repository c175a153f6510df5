// One output file per host

use std::path::{Path, PathBuf};

/// File name used for a host's output.
///
/// Host entries are used verbatim except for path separators, so an entry
/// can never escape the output directory.
pub fn artifact_name(host: &str) -> String {
    let name: String = host
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    match name.as_str() {
        "" | "." | ".." => format!("_{}", name),
        _ => name,
    }
}

/// Path of the output file for `host` under `out_dir`
pub fn artifact_path(out_dir: &Path, host: &str) -> PathBuf {
    out_dir.join(artifact_name(host))
}

/// Write `text` to `out_dir/host`, creating `out_dir` if needed.
///
/// Directory creation tolerates other hosts creating it at the same moment.
/// The write is not atomic: a reader can observe a partially written file.
pub fn write_host_output(out_dir: &Path, host: &str, text: &str) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(out_dir)?;
    let path = artifact_path(out_dir, host);
    std::fs::write(&path, text)?;
    Ok(path)
}
