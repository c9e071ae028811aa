//! Working directory preparation.
//!
//! The extracted distribution is shared by every node built from it and is
//! never written to. Each node gets its own `distro/` tree whose files are
//! hard links into the extraction, so the per-node cost is proportional to
//! the number of files rather than their size.

use std::path::{Path, PathBuf};

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{IoContext, Result};
use crate::paths::WorkingPaths;

/// Remove `path` whether it is a file or a directory; absent is fine.
pub fn remove_path(path: &Path) -> Result<()> {
    let result = match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => Err(e),
    };
    result.io_context("delete", path)
}

/// Mirror `source` into `destination` with hard links.
///
/// `source` is expected to contain a single wrapper directory (as archives
/// do); that first path component is stripped. `destination` is deleted
/// first so repeated calls converge on the same tree.
pub fn link_tree(source: &Path, destination: &Path) -> Result<()> {
    remove_path(destination)?;
    std::fs::create_dir_all(destination).io_context("create directory", destination)?;

    let mut linked = 0usize;
    for entry in WalkDir::new(source).min_depth(2).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().map_or_else(|| source.to_path_buf(), Path::to_path_buf);
            let io = e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("filesystem loop"));
            crate::Error::io("walk", path, io)
        })?;
        let relative = strip_wrapper(source, entry.path());
        let target = destination.join(&relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).io_context("create directory", &target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).io_context("create directory", parent)?;
            }
            std::fs::hard_link(entry.path(), &target).io_context("create hard link", &target)?;
            linked += 1;
        }
    }
    debug!(
        source = %source.display(),
        destination = %destination.display(),
        linked,
        "Linked distribution files"
    );
    Ok(())
}

/// Path of `entry` below `source`, without the wrapper directory.
fn strip_wrapper(source: &Path, entry: &Path) -> PathBuf {
    let relative = entry.strip_prefix(source).unwrap_or(entry);
    relative.components().skip(1).collect()
}

/// Build the node's working directory from an extracted distribution.
///
/// On the first start of a node the whole working directory is wiped.
/// Restarts keep data and logs but always relink the distribution and
/// recreate the config directory from scratch.
pub fn prepare(extracted: &Path, paths: &WorkingPaths, first_start: bool) -> Result<()> {
    if first_start {
        info!(path = %paths.working_dir.display(), "Cleaning working directory");
        remove_path(&paths.working_dir)?;
    }
    link_tree(extracted, &paths.distro_dir)?;

    let config_dir = paths.config_dir();
    remove_path(config_dir)?;
    std::fs::create_dir_all(config_dir).io_context("create directory", config_dir)?;
    for dir in paths.runtime_dirs() {
        std::fs::create_dir_all(dir).io_context("create directory", dir)?;
    }
    Ok(())
}

/// Copy a directory tree (used to install modules into `distro/modules`).
pub fn copy_tree(source: &Path, destination: &Path) -> Result<()> {
    for entry in WalkDir::new(source).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().map_or_else(|| source.to_path_buf(), Path::to_path_buf);
            let io = e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("filesystem loop"));
            crate::Error::io("walk", path, io)
        })?;
        let relative = entry.path().strip_prefix(source).unwrap_or(entry.path());
        let target = destination.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).io_context("create directory", &target)?;
        } else {
            std::fs::copy(entry.path(), &target).io_context("copy", entry.path())?;
        }
    }
    Ok(())
}
