// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Symlink auditing.
//!
//! Files get renamed or deleted in the repository over time, leaving behind
//! symlinks that no longer lead anywhere useful. The audit scans every
//! directory a plan deploys into, one level deep, and reports:
//!
//! - __stale__ links that point into the repository, but are not part of the
//!   current plan,
//! - __broken__ links that point outside the repository to nothing,
//! - __misdirected__ links that sit at a planned target, but point elsewhere.
//!
//! Only stale links are ever pruned. Broken and misdirected links may belong
//! to something else entirely.

use crate::{
    link::plan::{EntryKind, LinkPlan},
    path::{normalize, resolve_link_dest},
};

use std::{
    collections::BTreeSet,
    fmt::{Display, Formatter, Result as FmtResult},
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument};

/// Kind of problem found on a symlink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finding {
    /// Destination is outside of the repository, and does not exist.
    Broken { dest: PathBuf },

    /// Destination is inside of the repository, but not planned.
    Stale { dest: PathBuf },

    /// Planned target points somewhere other than its source.
    Misdirected { expected: PathBuf, actual: PathBuf },
}

impl Display for Finding {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Broken { dest } => write!(fmt, "broken link to {:?}", dest.display()),
            Self::Stale { dest } => write!(fmt, "stale link to {:?}", dest.display()),
            Self::Misdirected { expected, actual } => write!(
                fmt,
                "points to {:?} instead of {:?}",
                actual.display(),
                expected.display()
            ),
        }
    }
}

/// Symlink paired with its finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub link: PathBuf,
    pub finding: Finding,
}

/// Audit symlinks around a deployed plan.
#[derive(Debug, Clone)]
pub struct Auditor<'plan> {
    root: PathBuf,
    plan: &'plan LinkPlan,
}

impl<'plan> Auditor<'plan> {
    /// Construct new auditor for repository at `root`.
    pub fn new(root: impl AsRef<Path>, plan: &'plan LinkPlan) -> Self {
        Self {
            root: normalize(root),
            plan,
        }
    }

    /// Scan every planned directory for suspicious symlinks.
    ///
    /// # Errors
    ///
    /// - Return [`AuditError::Io`] if a planned directory cannot be read.
    #[instrument(skip(self), level = "debug")]
    pub fn audit(&self) -> Result<Vec<AuditEntry>> {
        let dirs = self
            .plan
            .directories()
            .map(|entry| entry.target.clone())
            .collect::<BTreeSet<_>>();

        let mut entries = Vec::new();
        for dir in dirs {
            // INVARIANT: Never audit the repository itself through a symlink.
            if fs::canonicalize(&dir).is_ok_and(|real| real.starts_with(&self.root)) {
                debug!("skip {:?}, leads into repository", dir.display());
                continue;
            }

            let listing = match fs::read_dir(&dir) {
                Ok(listing) => listing,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(io_error(err, &dir)),
            };

            for dir_entry in listing {
                let dir_entry = dir_entry.map_err(|err| io_error(err, &dir))?;
                let link = dir_entry.path();
                let is_symlink = dir_entry
                    .file_type()
                    .map_err(|err| io_error(err, &link))?
                    .is_symlink();
                if !is_symlink {
                    continue;
                }

                if let Some(finding) = self.inspect(&link)? {
                    debug!("{:?}: {finding}", link.display());
                    entries.push(AuditEntry { link, finding });
                }
            }
        }

        Ok(entries)
    }

    /// Remove stale symlinks, returning the ones removed.
    ///
    /// # Errors
    ///
    /// - Return [`AuditError::Io`] if audit or removal fails.
    #[instrument(skip(self), level = "debug")]
    pub fn prune(&self) -> Result<Vec<AuditEntry>> {
        let mut pruned = Vec::new();
        for entry in self.audit()? {
            if !matches!(entry.finding, Finding::Stale { .. }) {
                continue;
            }

            info!("prune {:?}: {}", entry.link.display(), entry.finding);
            fs::remove_file(&entry.link).map_err(|err| io_error(err, &entry.link))?;
            pruned.push(entry);
        }

        Ok(pruned)
    }

    fn inspect(&self, link: &Path) -> Result<Option<Finding>> {
        let dest = fs::read_link(link).map_err(|err| io_error(err, link))?;
        let resolved = resolve_link_dest(link, &dest);

        if let Some(planned) = self.plan.find_target(link) {
            if planned.kind == EntryKind::Symlink && resolved != normalize(&planned.source) {
                return Ok(Some(Finding::Misdirected {
                    expected: planned.source.clone(),
                    actual: dest,
                }));
            }

            return Ok(None);
        }

        if resolved.starts_with(&self.root) {
            return Ok(Some(Finding::Stale { dest }));
        }

        // INVARIANT: Follows the link, so a dangling destination errors out.
        if fs::metadata(link).is_err() {
            return Ok(Some(Finding::Broken { dest }));
        }

        Ok(None)
    }
}

fn io_error(source: std::io::Error, path: impl Into<PathBuf>) -> AuditError {
    AuditError::Io {
        source,
        path: path.into(),
    }
}

/// Symlink audit error types.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// Directory or symlink cannot be inspected.
    #[error("failed to inspect {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
type Result<T, E = AuditError> = std::result::Result<T, E>;
