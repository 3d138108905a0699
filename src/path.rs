// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for external files that need to be
//! interacted with, or managed in some way.

use git2::Repository;
use std::path::{Component, Path, PathBuf};

/// Name of the configuration file expected at the top-level of a home-files
/// repository.
pub const CONFIG_FILE_NAME: &str = "homefiles.toml";

/// Determine absolute path to user's home directory.
///
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or(NoWayHome)
}

/// Determine absolute path to user's XDG configuration directory.
///
/// Uses `$XDG_CONFIG_HOME`, falling back to `$HOME/.config`. Does not check if
/// the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
        .ok_or(NoWayHome)
}

/// Locate top-level of home-files repository starting from `start`.
///
/// Walks upward through parent directories until a non-bare Git repository is
/// found. When no repository can be found, `start` itself is assumed to be the
/// top-level so that plain directory trees can still be installed.
pub fn discover_repo_root(start: impl AsRef<Path>) -> PathBuf {
    Repository::discover(start.as_ref())
        .ok()
        .and_then(|repo| repo.workdir().map(Path::to_path_buf))
        .unwrap_or_else(|| start.as_ref().to_path_buf())
}

/// Lexically resolve `.` and `..` components of a path.
///
/// Does not touch the file system, so symlinks along the path are left as-is.
/// Used to compare symlink destinations without requiring them to exist.
pub fn normalize(path: impl AsRef<Path>) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.as_ref().components() {
        match component {
            Component::CurDir => continue,
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }

    out
}

/// Resolve destination of symlink at `link` relative to its parent directory.
///
/// Symlinks store their destination verbatim, so relative destinations are
/// joined onto the directory holding the link before normalization.
pub fn resolve_link_dest(link: impl AsRef<Path>, dest: impl AsRef<Path>) -> PathBuf {
    let dest = dest.as_ref();
    if dest.is_absolute() {
        return normalize(dest);
    }

    let parent = link.as_ref().parent().unwrap_or_else(|| Path::new(""));
    normalize(parent.join(dest))
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;
