// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Signature gated updates.
//!
//! Updating a home-files repository is a fast-forward of the current branch
//! to its remote counterpart, with one extra gate: every incoming commit must
//! be signed by a pinned key. If a single commit fails verification, nothing
//! is modified. Merges are never performed, because a merge commit made
//! locally would itself be unsigned, and a diverged history needs a human to
//! look at it anyway.
//!
//! # Update Pipeline
//!
//! 1. Refuse bare repositories, detached heads, and dirty work trees.
//! 2. Fetch the tracked branch from the configured remote.
//! 3. Collect incoming commits, i.e., `HEAD..<remote>/<branch>`.
//! 4. Verify every incoming commit through [`CommitVerifier`].
//! 5. Require a fast-forward.
//! 6. Check out the fetched tree, and move the branch reference.

pub mod verify;

use crate::{
    config::UpdateSettings,
    update::verify::{CommitVerdict, CommitVerifier, GpgVerifier, SignatureVerifier, Verdict},
};

use auth_git2::{GitAuthenticator, Prompter};
use git2::{
    build::CheckoutBuilder, Config, FetchOptions, Oid, RemoteCallbacks, Repository, Sort,
    StatusOptions,
};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Password, Text};
use std::{path::Path, time};
use tracing::{debug, info, instrument, warn};

/// Knobs for a single update.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Fetch and verify, but do not move the branch.
    pub dry_run: bool,
}

/// Final state of an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateStatus {
    /// Nothing incoming.
    UpToDate,

    /// Incoming commits were verified, but not applied.
    Verified { from: Oid, to: Oid, commits: usize },

    /// Incoming commits were verified, and applied.
    Updated { from: Oid, to: Oid, commits: usize },
}

/// Update home-files repository from its remote.
pub struct Updater<V = GpgVerifier>
where
    V: SignatureVerifier,
{
    repository: Repository,
    settings: UpdateSettings,
    verifier: V,
}

impl Updater {
    /// Open repository at `root`, verifying through gpg.
    ///
    /// # Errors
    ///
    /// - Return [`UpdateError::Git2`] if repository cannot be opened.
    pub fn open(root: impl AsRef<Path>, settings: UpdateSettings) -> Result<Self> {
        Self::with_verifier(root, settings, GpgVerifier::from_env())
    }
}

impl<V> Updater<V>
where
    V: SignatureVerifier,
{
    /// Open repository at `root` with custom signature verifier.
    ///
    /// # Errors
    ///
    /// - Return [`UpdateError::Git2`] if repository cannot be opened.
    /// - Return [`UpdateError::Bare`] if repository has no work tree.
    pub fn with_verifier(
        root: impl AsRef<Path>,
        settings: UpdateSettings,
        verifier: V,
    ) -> Result<Self> {
        let repository = Repository::open(root.as_ref())?;
        if repository.is_bare() {
            return Err(UpdateError::Bare);
        }

        Ok(Self {
            repository,
            settings,
            verifier,
        })
    }

    /// Fetch, verify, and fast-forward.
    ///
    /// Progress of the fetch is drawn on `bar`.
    ///
    /// # Errors
    ///
    /// - Return [`UpdateError::Detached`] if HEAD is not on a branch.
    /// - Return [`UpdateError::BranchMismatch`] if configured branch is not
    ///   the checked out branch.
    /// - Return [`UpdateError::Dirty`] if tracked files have modifications.
    /// - Return [`UpdateError::NoPinnedKeys`] if no fingerprint is pinned.
    /// - Return [`UpdateError::Untrusted`] if any incoming commit fails
    ///   verification.
    /// - Return [`UpdateError::Diverged`] if fast-forward is impossible.
    /// - Return [`UpdateError::Git2`] if libgit2 operations fail.
    #[instrument(skip(self, bar), level = "debug")]
    pub fn update(&self, options: UpdateOptions, bar: ProgressBar) -> Result<UpdateStatus> {
        let branch = self.current_branch()?;
        if !options.dry_run {
            self.ensure_clean()?;
        }

        let fetched = self.fetch(&branch, bar)?;
        let head = self.head_commit()?;
        let incoming = self.incoming(head, fetched)?;
        if incoming.is_empty() {
            info!("already up to date");
            return Ok(UpdateStatus::UpToDate);
        }

        info!("verify {} incoming commits", incoming.len());
        self.verify_incoming(&incoming)?;

        let annotated = self.repository.find_annotated_commit(fetched)?;
        let (analysis, _) = self.repository.merge_analysis(&[&annotated])?;
        if !analysis.is_fast_forward() {
            return Err(UpdateError::Diverged {
                local: head.to_string(),
                remote: fetched.to_string(),
            });
        }

        if options.dry_run {
            return Ok(UpdateStatus::Verified {
                from: head,
                to: fetched,
                commits: incoming.len(),
            });
        }

        self.fast_forward(fetched)?;
        info!("updated {head} -> {fetched}");

        Ok(UpdateStatus::Updated {
            from: head,
            to: fetched,
            commits: incoming.len(),
        })
    }

    /// Verify signatures of arbitrary revisions.
    ///
    /// Does not fail on untrusted commits, callers decide what to do with each
    /// [`CommitVerdict`].
    ///
    /// # Errors
    ///
    /// - Return [`UpdateError::Git2`] if a revision cannot be resolved.
    /// - Return [`UpdateError::Verify`] if verifier cannot be run.
    pub fn verify_revisions(
        &self,
        revisions: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Result<Vec<CommitVerdict>> {
        let verifier = CommitVerifier::new(
            &self.repository,
            &self.verifier,
            &self.settings.fingerprints,
        );

        let mut verdicts = Vec::new();
        for revision in revisions {
            let commit = self
                .repository
                .revparse_single(revision.as_ref())?
                .peel_to_commit()?;
            verdicts.push(verifier.verify_commit(commit.id())?);
        }

        Ok(verdicts)
    }

    fn current_branch(&self) -> Result<String> {
        let head = self.repository.head()?;
        if !head.is_branch() {
            return Err(UpdateError::Detached);
        }

        let checked_out = head
            .shorthand()
            .map(ToString::to_string)
            .ok_or(UpdateError::Detached)?;

        // INVARIANT: Only ever move the branch that is checked out.
        match &self.settings.branch {
            Some(configured) if *configured != checked_out => Err(UpdateError::BranchMismatch {
                configured: configured.clone(),
                checked_out,
            }),
            _ => Ok(checked_out),
        }
    }

    fn head_commit(&self) -> Result<Oid> {
        Ok(self.repository.head()?.peel_to_commit()?.id())
    }

    fn ensure_clean(&self) -> Result<()> {
        if self.repository.head_detached()? {
            return Err(UpdateError::Detached);
        }

        let mut opts = StatusOptions::new();
        opts.include_untracked(false).include_ignored(false);
        let statuses = self.repository.statuses(Some(&mut opts))?;
        let dirty = statuses
            .iter()
            .filter(|entry| !entry.status().is_empty())
            .count();
        if dirty > 0 {
            return Err(UpdateError::Dirty(dirty));
        }

        Ok(())
    }

    #[instrument(skip(self, bar), level = "debug")]
    fn fetch(&self, branch: &str, bar: ProgressBar) -> Result<Oid> {
        let remote_name = self.settings.remote.as_str();
        let mut remote = self.repository.find_remote(remote_name)?;
        let url = remote.url().unwrap_or(remote_name).to_string();

        let style = ProgressStyle::with_template(
            "{elapsed_precise:.green}  {msg:<50}  [{wide_bar:.yellow/blue}]",
        )?
        .progress_chars("-Cco.");
        bar.set_style(style);
        bar.set_message(url.clone());
        bar.enable_steady_tick(time::Duration::from_millis(100));

        let prompter = IndicatifPrompter::new(bar);
        let authenticator = GitAuthenticator::default().set_prompter(prompter.clone());
        let config = Config::open_default()?;

        let mut throttle = time::Instant::now();
        let mut rc = RemoteCallbacks::new();
        rc.credentials(authenticator.credentials(&config));
        rc.transfer_progress(|progress| {
            let stats = progress.to_owned();
            if throttle.elapsed() > time::Duration::from_millis(10) {
                throttle = time::Instant::now();
                prompter.bar.set_length(stats.total_objects() as u64);
                prompter.bar.set_position(stats.received_objects() as u64);
            }
            true
        });

        let mut fo = FetchOptions::new();
        fo.remote_callbacks(rc);

        let tracking = format!("refs/remotes/{remote_name}/{branch}");
        let refspec = format!("+refs/heads/{branch}:{tracking}");
        info!("fetch {branch} from {url}");
        remote.fetch(&[refspec.as_str()], Some(&mut fo), None)?;
        prompter.bar.finish_and_clear();

        self.repository
            .find_reference(&tracking)?
            .target()
            .ok_or(UpdateError::MissingRemoteRef(tracking))
    }

    fn incoming(&self, head: Oid, fetched: Oid) -> Result<Vec<Oid>> {
        let mut walk = self.repository.revwalk()?;
        walk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)?;
        walk.push(fetched)?;
        walk.hide(head)?;

        Ok(walk.collect::<Result<Vec<_>, git2::Error>>()?)
    }

    fn verify_incoming(&self, incoming: &[Oid]) -> Result<()> {
        if self.settings.fingerprints.is_empty() {
            return Err(UpdateError::NoPinnedKeys);
        }

        let verifier = CommitVerifier::new(
            &self.repository,
            &self.verifier,
            &self.settings.fingerprints,
        );
        for commit in incoming {
            let result = verifier.verify_commit(*commit)?;
            if !result.trusted {
                warn!("reject commit {commit}: {}", result.verdict);
                return Err(UpdateError::Untrusted {
                    commit: commit.to_string(),
                    verdict: result.verdict,
                });
            }
            debug!("accept commit {commit}: {}", result.verdict);
        }

        Ok(())
    }

    fn fast_forward(&self, target: Oid) -> Result<()> {
        let commit = self.repository.find_commit(target)?;
        let mut checkout = CheckoutBuilder::new();
        checkout.safe();
        self.repository
            .checkout_tree(commit.as_object(), Some(&mut checkout))?;

        let mut head = self.repository.head()?;
        head.set_target(target, &format!("homefiles: fast-forward to {target}"))?;

        Ok(())
    }
}

/// Git2 authentication prompter for progress bar.
#[derive(Debug, Clone)]
pub struct IndicatifPrompter {
    pub(crate) bar: ProgressBar,
}

impl IndicatifPrompter {
    /// Construct new progress bar authenticator.
    pub fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }
}

impl Prompter for IndicatifPrompter {
    #[instrument(skip(self, url, _config), level = "debug")]
    fn prompt_username_password(
        &mut self,
        url: &str,
        _config: &git2::Config,
    ) -> Option<(String, String)> {
        info!("authentication required at {url}");
        self.bar.suspend(|| -> Option<(String, String)> {
            let username = Text::new("username").prompt().ok()?;
            let password = Password::new("password")
                .without_confirmation()
                .prompt()
                .ok()?;
            Some((username, password))
        })
    }

    #[instrument(skip(self, username, url, _config), level = "debug")]
    fn prompt_password(
        &mut self,
        username: &str,
        url: &str,
        _config: &git2::Config,
    ) -> Option<String> {
        info!("authentication required at {url} for user {username}");
        self.bar.suspend(|| {
            Password::new("password")
                .without_confirmation()
                .prompt()
                .ok()
        })
    }

    #[instrument(skip(self, ssh_key_path, _config), level = "debug")]
    fn prompt_ssh_key_passphrase(
        &mut self,
        ssh_key_path: &Path,
        _config: &git2::Config,
    ) -> Option<String> {
        info!(
            "authentication required with ssh key at {}",
            ssh_key_path.display()
        );
        self.bar.suspend(|| {
            Password::new("passphrase")
                .without_confirmation()
                .prompt()
                .ok()
        })
    }
}

/// Update error types.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    /// Repository has no work tree to update.
    #[error("cannot update a bare repository")]
    Bare,

    /// HEAD does not point at a branch.
    #[error("HEAD is detached, check out a branch first")]
    Detached,

    /// Configured branch is not the checked out branch.
    #[error("configured branch {configured:?} is not checked out, currently on {checked_out:?}")]
    BranchMismatch {
        configured: String,
        checked_out: String,
    },

    /// Tracked files have local modifications.
    #[error("{0} tracked files have local modifications")]
    Dirty(usize),

    /// No key is trusted to sign updates.
    #[error("no key fingerprint pinned in [update] fingerprints, refusing to update")]
    NoPinnedKeys,

    /// Incoming commit failed verification.
    #[error("commit {commit} is not trusted: {verdict}")]
    Untrusted { commit: String, verdict: Verdict },

    /// Local and remote histories diverged.
    #[error("local {local} and remote {remote} diverged, fast-forward impossible")]
    Diverged { local: String, remote: String },

    /// Fetched branch has no tracking reference.
    #[error("fetch did not produce {0}")]
    MissingRemoteRef(String),

    /// Signature verification cannot be performed.
    #[error(transparent)]
    Verify(#[from] crate::update::verify::VerifyError),

    /// Style template cannot be set for progress bars.
    #[error(transparent)]
    IndicatifStyleTemplate(#[from] indicatif::style::TemplateError),

    /// Operations from libgit2 fail.
    #[error(transparent)]
    Git2(#[from] git2::Error),
}

/// Friendly result alias :3
type Result<T, E = UpdateError> = std::result::Result<T, E>;
