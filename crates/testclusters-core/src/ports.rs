//! Port files written by the server once its sockets are bound.

use std::path::Path;

use crate::error::{IoContext, Result};
use crate::paths::WorkingPaths;

/// Bound addresses listed in a port file, one per line, trimmed.
pub fn read_ports_file(path: &Path) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(path).io_context("read ports file", path)?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Whether the server has published both its http and transport ports.
#[must_use]
pub fn ports_files_exist(paths: &WorkingPaths) -> bool {
    paths.http_ports_file.exists() && paths.transport_ports_file.exists()
}

/// Delete both port files so stale addresses are never read after a stop.
/// Missing files are fine; any other failure is returned.
pub fn delete_ports_files(paths: &WorkingPaths) -> Result<()> {
    for file in [&paths.http_ports_file, &paths.transport_ports_file] {
        match std::fs::remove_file(file) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                return Err(crate::Error::io("delete ports file", file, e));
            }
            _ => {}
        }
    }
    Ok(())
}
