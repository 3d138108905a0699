// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Link planning.
//!
//! Before anything touches the user's home directory, every link rule is
//! expanded into a __link plan__. A link plan is an ordered listing of
//! directories to create, and symlinks to establish. Directories always come
//! before their children, so applying a plan from front to back never needs
//! to look ahead.
//!
//! # Ignore Patterns
//!
//! Paths excluded from deployment are written with gitignore syntax. Global
//! patterns from the settings section apply to every link rule, while each
//! link rule can add patterns of its own. Patterns are always matched relative
//! to the source directory of the link rule being expanded. An ignored
//! directory removes its entire subtree from the plan.
//!
//! # Prefixes
//!
//! A link rule may declare a prefix for top-level entries. The prefix is only
//! applied to the first component of each path, so `dotfiles/vim/vimrc` with
//! prefix "." is linked to `~/.vim/vimrc`.

use crate::config::{LinkRule, Settings};

use ignore::{
    gitignore::{Gitignore, GitignoreBuilder},
    WalkBuilder,
};
use std::{
    collections::HashMap,
    ffi::OsString,
    path::{Component, Path, PathBuf},
};
use tracing::{debug, instrument, warn};

/// Kind of plan entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Create directory at target.
    Directory,

    /// Symlink target to source.
    Symlink,
}

/// Single step of a link plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanEntry {
    /// What to do at the target.
    pub kind: EntryKind,

    /// Absolute path of source in repository.
    pub source: PathBuf,

    /// Absolute path of target.
    pub target: PathBuf,

    /// Path of target relative to the destination directory of its link rule.
    pub relative: PathBuf,
}

/// Ordered listing of directories to create, and symlinks to establish.
#[derive(Debug, Default, Clone)]
pub struct LinkPlan {
    entries: Vec<PlanEntry>,
    index: HashMap<PathBuf, usize>,
}

impl LinkPlan {
    /// Construct new empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append entry to plan.
    ///
    /// Directory entries sharing a target are merged, because multiple link
    /// rules may deploy into the same directory.
    ///
    /// # Errors
    ///
    /// - Return [`PlanError::DuplicateTarget`] if target is already claimed
    ///   by a different source.
    pub fn push(&mut self, entry: PlanEntry) -> Result<()> {
        if let Some(existing) = self.index.get(&entry.target).map(|idx| &self.entries[*idx]) {
            if existing.kind == EntryKind::Directory && entry.kind == EntryKind::Directory {
                return Ok(());
            }

            return Err(PlanError::DuplicateTarget {
                target: entry.target,
                first: existing.source.clone(),
                second: entry.source,
            });
        }

        self.index.insert(entry.target.clone(), self.entries.len());
        self.entries.push(entry);

        Ok(())
    }

    /// Find plan entry that deploys to target path.
    pub fn find_target(&self, target: impl AsRef<Path>) -> Option<&PlanEntry> {
        self.index
            .get(target.as_ref())
            .map(|idx| &self.entries[*idx])
    }

    /// Iterate through entries in deployment order.
    pub fn iter(&self) -> impl Iterator<Item = &PlanEntry> {
        self.entries.iter()
    }

    /// Iterate through directory entries only.
    pub fn directories(&self) -> impl Iterator<Item = &PlanEntry> {
        self.iter().filter(|entry| entry.kind == EntryKind::Directory)
    }

    /// Iterate through symlink entries only.
    pub fn symlinks(&self) -> impl Iterator<Item = &PlanEntry> {
        self.iter().filter(|entry| entry.kind == EntryKind::Symlink)
    }

    /// Number of entries in plan.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if plan has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Filter paths out of a link plan.
pub trait PathFilter: Send + Sync + 'static {
    /// Check if path should be left out of the plan.
    fn is_excluded(&self, path: &Path, is_dir: bool) -> bool;
}

/// Path filter using gitignore semantics.
#[derive(Debug, Clone)]
pub struct GitignoreFilter {
    matcher: Gitignore,
}

impl GitignoreFilter {
    /// Construct new gitignore filter rooted at `root`.
    ///
    /// # Errors
    ///
    /// - Return [`PlanError::Pattern`] if any pattern is malformed.
    pub fn new(
        root: impl AsRef<Path>,
        patterns: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Result<Self> {
        let mut builder = GitignoreBuilder::new(root.as_ref());
        for pattern in patterns {
            builder
                .add_line(None, pattern.as_ref())
                .map_err(|err| PlanError::Pattern {
                    source: err,
                    pattern: pattern.as_ref().to_string(),
                })?;
        }
        let matcher = builder.build()?;

        Ok(Self { matcher })
    }
}

impl PathFilter for GitignoreFilter {
    fn is_excluded(&self, path: &Path, is_dir: bool) -> bool {
        self.matcher.matched(path, is_dir).is_ignore()
    }
}

/// Expand link rules into a link plan.
#[derive(Debug, Clone)]
pub struct LinkPlanner<'cfg> {
    root: PathBuf,
    settings: &'cfg Settings,
}

impl<'cfg> LinkPlanner<'cfg> {
    /// Construct new planner for repository at `root`.
    pub fn new(root: impl Into<PathBuf>, settings: &'cfg Settings) -> Self {
        Self {
            root: root.into(),
            settings,
        }
    }

    /// Expand every link rule into one plan.
    ///
    /// Link rules whose source directory does not exist are skipped with a
    /// warning.
    ///
    /// # Errors
    ///
    /// - Return [`PlanError::Pattern`] if any ignore pattern is malformed.
    /// - Return [`PlanError::Walk`] if source tree cannot be traversed.
    /// - Return [`PlanError::DuplicateTarget`] if two sources share a target.
    #[instrument(skip(self, rules), level = "debug")]
    pub fn plan<'r>(&self, rules: impl IntoIterator<Item = &'r LinkRule>) -> Result<LinkPlan> {
        let mut plan = LinkPlan::new();
        for rule in rules {
            self.expand_rule(rule, &mut plan)?;
        }

        debug!("planned {} entries", plan.len());
        Ok(plan)
    }

    fn expand_rule(&self, rule: &LinkRule, plan: &mut LinkPlan) -> Result<()> {
        let source = self.root.join(&rule.source);
        if !source.is_dir() {
            warn!("skip missing link source {:?}", source.display());
            return Ok(());
        }

        let filter = GitignoreFilter::new(
            &source,
            self.settings.ignore.iter().chain(rule.ignore.iter()),
        )?;

        let walk = WalkBuilder::new(&source)
            .standard_filters(false)
            .hidden(false)
            .follow_links(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .filter_entry(move |entry| {
                // INVARIANT: Never filter out the source directory itself.
                if entry.depth() == 0 {
                    return true;
                }

                let is_dir = entry.file_type().is_some_and(|kind| kind.is_dir());
                !filter.is_excluded(entry.path(), is_dir)
            })
            .build();

        for entry in walk {
            let entry = entry?;
            let kind = match entry.file_type() {
                Some(kind) if kind.is_dir() => EntryKind::Directory,
                Some(_) => EntryKind::Symlink,
                None => continue,
            };

            // INVARIANT: Walked entries always live under their source.
            let Ok(relative) = entry.path().strip_prefix(&source) else {
                continue;
            };
            let relative = apply_prefix(relative, rule.prefix.as_deref());
            let target = if relative.as_os_str().is_empty() {
                rule.target.clone()
            } else {
                rule.target.join(&relative)
            };

            debug!("plan {:?} -> {:?}", target.display(), entry.path().display());
            plan.push(PlanEntry {
                kind,
                source: entry.path().to_path_buf(),
                target,
                relative,
            })?;
        }

        Ok(())
    }
}

fn apply_prefix(relative: &Path, prefix: Option<&str>) -> PathBuf {
    let Some(prefix) = prefix else {
        return relative.to_path_buf();
    };

    let mut components = relative.components();
    let mut out = PathBuf::new();
    if let Some(Component::Normal(first)) = components.next() {
        let mut name = OsString::from(prefix);
        name.push(first);
        out.push(name);
    }
    out.extend(components);

    out
}

/// Link planning error types.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// Ignore pattern cannot be parsed.
    #[error("invalid ignore pattern {pattern:?}")]
    Pattern {
        #[source]
        source: ignore::Error,
        pattern: String,
    },

    /// Source tree cannot be walked.
    #[error(transparent)]
    Walk(#[from] ignore::Error),

    /// Two different sources want the same target.
    #[error(
        "target {:?} claimed by both {:?} and {:?}",
        target.display(),
        first.display(),
        second.display()
    )]
    DuplicateTarget {
        target: PathBuf,
        first: PathBuf,
        second: PathBuf,
    },
}

/// Friendly result alias :3
type Result<T, E = PlanError> = std::result::Result<T, E>;
