// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Link deployment logic.
//!
//! Apply a [`LinkPlan`] to the file system. Deployment is conservative: it
//! creates what is missing, and leaves anything it cannot prove to be safe to
//! replace alone, reporting it instead.
//!
//! # Skeleton Files
//!
//! New user accounts are usually seeded with copies of skeleton files, e.g.,
//! `/etc/skel/.bashrc`. Such a copy was never edited by the user, so it can be
//! replaced by a symlink without losing anything. Any other regular file is
//! treated as user data and is never removed.
//!
//! The skeleton directory mirrors the home directory, so the counterpart of a
//! target is found through its path relative to home. Targets outside of home
//! have no counterpart.

use crate::{
    link::plan::{EntryKind, LinkPlan, PlanEntry},
    path::{normalize, resolve_link_dest},
};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Knobs for a single deployment.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeployOptions {
    /// Compute outcomes without touching the file system.
    pub dry_run: bool,

    /// Replace symlinks that point somewhere else.
    pub force: bool,
}

/// Result of applying one plan entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Symlink was missing, and got created.
    Created,

    /// Symlink already points at its source.
    Unchanged,

    /// Directory was missing, and got created.
    DirectoryCreated,

    /// Directory already exists.
    DirectoryExists,

    /// Unmodified skeleton copy got replaced by a symlink.
    SkeletonReplaced,

    /// Symlink pointing elsewhere got replaced.
    Replaced { previous: PathBuf },

    /// Symlink points elsewhere, and was left alone.
    Misdirected { actual: PathBuf },

    /// Something that is not ours occupies the target.
    Conflict { reason: String },
}

impl Outcome {
    /// Check if outcome modified, or would modify, the file system.
    pub fn is_change(&self) -> bool {
        matches!(
            self,
            Self::Created | Self::DirectoryCreated | Self::SkeletonReplaced | Self::Replaced { .. }
        )
    }

    /// Check if outcome needs the user's attention.
    pub fn is_problem(&self) -> bool {
        matches!(self, Self::Misdirected { .. } | Self::Conflict { .. })
    }
}

impl Display for Outcome {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Created => write!(fmt, "created"),
            Self::Unchanged => write!(fmt, "unchanged"),
            Self::DirectoryCreated => write!(fmt, "directory created"),
            Self::DirectoryExists => write!(fmt, "directory exists"),
            Self::SkeletonReplaced => write!(fmt, "replaced skeleton copy"),
            Self::Replaced { previous } => write!(fmt, "replaced link to {:?}", previous.display()),
            Self::Misdirected { actual } => write!(fmt, "points to {:?}", actual.display()),
            Self::Conflict { reason } => write!(fmt, "conflict: {reason}"),
        }
    }
}

/// Outcome of one plan entry together with its paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub source: PathBuf,
    pub target: PathBuf,
    pub outcome: Outcome,
}

/// Report of a whole deployment.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeployReport {
    actions: Vec<Action>,
}

impl DeployReport {
    /// Iterate through actions in deployment order.
    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter()
    }

    /// Find action taken on target.
    pub fn find_target(&self, target: impl AsRef<Path>) -> Option<&Action> {
        self.actions
            .iter()
            .find(|action| action.target == target.as_ref())
    }

    /// Iterate through actions that changed something.
    pub fn changes(&self) -> impl Iterator<Item = &Action> {
        self.actions().filter(|action| action.outcome.is_change())
    }

    /// Iterate through actions that need attention.
    pub fn problems(&self) -> impl Iterator<Item = &Action> {
        self.actions().filter(|action| action.outcome.is_problem())
    }

    /// Check that nothing needs attention.
    pub fn is_clean(&self) -> bool {
        self.problems().next().is_none()
    }

    fn record(&mut self, entry: &PlanEntry, outcome: Outcome) {
        self.actions.push(Action {
            source: entry.source.clone(),
            target: entry.target.clone(),
            outcome,
        });
    }
}

/// Locations a deployment is anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeployContext<'loc> {
    /// Canonical top-level of repository holding the link sources.
    pub root: &'loc Path,

    /// Home directory mirrored by the skeleton directory.
    pub home: &'loc Path,

    /// Skeleton directory, e.g., `/etc/skel`.
    pub skeleton_dir: &'loc Path,
}

impl DeployContext<'_> {
    fn skeleton_counterpart(&self, target: &Path) -> Option<PathBuf> {
        target
            .strip_prefix(self.home)
            .ok()
            .filter(|relative| !relative.as_os_str().is_empty())
            .map(|relative| self.skeleton_dir.join(relative))
    }
}

/// Apply link plans.
pub trait Deployment {
    /// Apply plan, and report outcome of each entry.
    fn deploy(
        &self,
        plan: &LinkPlan,
        context: DeployContext<'_>,
        options: DeployOptions,
    ) -> Result<DeployReport>;
}

/// Deploy link plans through the local file system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SymlinkDeployer;

impl SymlinkDeployer {
    /// Construct new symlink deployer.
    pub fn new() -> Self {
        Self
    }

    fn deploy_directory(
        &self,
        entry: &PlanEntry,
        context: DeployContext<'_>,
        options: DeployOptions,
    ) -> Result<Outcome> {
        let target = entry.target.as_path();
        let meta = match fs::symlink_metadata(target) {
            Ok(meta) => meta,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                if !options.dry_run {
                    mkdirp::mkdirp(target).map_err(|err| io_error(err, target))?;
                }
                return Ok(Outcome::DirectoryCreated);
            }
            Err(err) => return Err(io_error(err, target)),
        };

        // INVARIANT: Never deploy through a symlink that leads back into the
        // repository.
        if meta.file_type().is_symlink() {
            if let Ok(real) = fs::canonicalize(target) {
                if real.starts_with(context.root) {
                    return Ok(Outcome::Conflict {
                        reason: format!("symlink into the repository at {:?}", real.display()),
                    });
                }
            }
        }

        match fs::metadata(target) {
            Ok(meta) if meta.is_dir() => Ok(Outcome::DirectoryExists),
            _ => Ok(Outcome::Conflict {
                reason: "not a directory".into(),
            }),
        }
    }

    fn deploy_symlink(
        &self,
        entry: &PlanEntry,
        context: DeployContext<'_>,
        options: DeployOptions,
    ) -> Result<Outcome> {
        let target = entry.target.as_path();
        let meta = match fs::symlink_metadata(target) {
            Ok(meta) => meta,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                self.link(entry, options)?;
                return Ok(Outcome::Created);
            }
            Err(err) => return Err(io_error(err, target)),
        };

        if meta.file_type().is_symlink() {
            let dest = fs::read_link(target).map_err(|err| io_error(err, target))?;
            if resolve_link_dest(target, &dest) == normalize(&entry.source) {
                return Ok(Outcome::Unchanged);
            }

            if !options.force {
                return Ok(Outcome::Misdirected { actual: dest });
            }

            self.unlink(target, options)?;
            self.link(entry, options)?;
            return Ok(Outcome::Replaced { previous: dest });
        }

        if meta.is_file() {
            let skeleton = context.skeleton_counterpart(target);
            if skeleton.map_or(Ok(false), |skeleton| is_skeleton_copy(target, skeleton))? {
                self.unlink(target, options)?;
                self.link(entry, options)?;
                return Ok(Outcome::SkeletonReplaced);
            }

            return Ok(Outcome::Conflict {
                reason: "regular file with local modifications".into(),
            });
        }

        let reason = if meta.is_dir() {
            "directory in the way"
        } else {
            "special file in the way"
        };
        Ok(Outcome::Conflict {
            reason: reason.into(),
        })
    }

    fn link(&self, entry: &PlanEntry, options: DeployOptions) -> Result<()> {
        if options.dry_run {
            return Ok(());
        }

        make_symlink(&entry.source, &entry.target).map_err(|err| io_error(err, &entry.target))
    }

    fn unlink(&self, target: &Path, options: DeployOptions) -> Result<()> {
        if options.dry_run {
            return Ok(());
        }

        fs::remove_file(target).map_err(|err| io_error(err, target))
    }
}

impl Deployment for SymlinkDeployer {
    #[instrument(skip(self, plan), level = "debug")]
    fn deploy(
        &self,
        plan: &LinkPlan,
        context: DeployContext<'_>,
        options: DeployOptions,
    ) -> Result<DeployReport> {
        let mut report = DeployReport::default();
        let mut blocked: Vec<PathBuf> = Vec::new();

        for entry in plan.iter() {
            // INVARIANT: Nothing gets deployed beneath a conflicting directory.
            if blocked.iter().any(|dir| entry.target.starts_with(dir)) {
                debug!("skip {:?}, parent is blocked", entry.target.display());
                continue;
            }

            let outcome = match entry.kind {
                EntryKind::Directory => self.deploy_directory(entry, context, options)?,
                EntryKind::Symlink => self.deploy_symlink(entry, context, options)?,
            };

            match &outcome {
                Outcome::Unchanged | Outcome::DirectoryExists => {
                    debug!("{:?}: {outcome}", entry.target.display())
                }
                Outcome::Misdirected { .. } => {
                    warn!("{:?}: {outcome}", entry.target.display())
                }
                Outcome::Conflict { .. } => {
                    warn!("{:?}: {outcome}", entry.target.display());
                    if entry.kind == EntryKind::Directory {
                        blocked.push(entry.target.clone());
                    }
                }
                _ => info!("{:?}: {outcome}", entry.target.display()),
            }

            report.record(entry, outcome);
        }

        Ok(report)
    }
}

fn is_skeleton_copy(target: &Path, skeleton: PathBuf) -> Result<bool> {
    let skeleton = match fs::read(&skeleton) {
        Ok(data) => data,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(io_error(err, &skeleton)),
    };
    let current = fs::read(target).map_err(|err| io_error(err, target))?;

    Ok(current == skeleton)
}

#[cfg(unix)]
fn make_symlink(source: &Path, target: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(source, target)
}

#[cfg(windows)]
fn make_symlink(source: &Path, target: &Path) -> std::io::Result<()> {
    if source.is_dir() {
        std::os::windows::fs::symlink_dir(source, target)
    } else {
        std::os::windows::fs::symlink_file(source, target)
    }
}

fn io_error(source: std::io::Error, path: impl Into<PathBuf>) -> DeployError {
    DeployError::Io {
        source,
        path: path.into(),
    }
}

/// Deployment error types.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// File system operation on target failed.
    #[error("failed to deploy {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
type Result<T, E = DeployError> = std::result::Result<T, E>;
