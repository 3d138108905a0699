// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use anyhow::Result;
use homefiles::{
    config::{HomefilesConfig, LinkRule, Settings},
    link::{
        audit::Finding,
        deploy::{DeployOptions, Outcome, SymlinkDeployer},
    },
    Linker,
};
use pretty_assertions::assert_eq;
use std::{fs, path::Path};
use tempfile::TempDir;

struct Layout {
    _dir: TempDir,
    repo: std::path::PathBuf,
    home: std::path::PathBuf,
    skel: std::path::PathBuf,
}

fn layout() -> Result<Layout> {
    let dir = tempfile::tempdir()?;
    let root = dir.path().canonicalize()?;
    let repo = root.join("repo");
    let home = root.join("home");
    let skel = root.join("skel");

    fs::create_dir_all(repo.join("dotfiles/vim/colors"))?;
    fs::create_dir_all(repo.join("bin"))?;
    fs::create_dir_all(&home)?;
    fs::create_dir_all(&skel)?;
    fs::write(repo.join("dotfiles/bashrc"), "# managed bashrc\n")?;
    fs::write(repo.join("dotfiles/vimrc"), "set nocompatible\n")?;
    fs::write(repo.join("dotfiles/vimrc.swp"), "junk")?;
    fs::write(repo.join("dotfiles/vim/colors/dark.vim"), "hi Normal\n")?;
    fs::write(repo.join("bin/hello"), "#!/bin/sh\necho hello\n")?;
    fs::write(skel.join(".bashrc"), "# distro bashrc\n")?;

    Ok(Layout {
        _dir: dir,
        repo,
        home,
        skel,
    })
}

fn config(layout: &Layout) -> HomefilesConfig {
    HomefilesConfig {
        settings: Settings {
            skeleton_dir: layout.skel.clone(),
            ..Settings::default()
        },
        links: vec![
            LinkRule::new("dotfiles", &layout.home).with_prefix("."),
            LinkRule::new("bin", layout.home.join("bin")),
        ],
        ..HomefilesConfig::default()
    }
}

fn linker(layout: &Layout, config: HomefilesConfig) -> Result<Linker> {
    Ok(Linker::new(&layout.repo, config, SymlinkDeployer::new())?.with_home(&layout.home))
}

fn assert_links_to(link: impl AsRef<Path>, source: impl AsRef<Path>) -> Result<()> {
    assert_eq!(fs::read_link(link.as_ref())?, source.as_ref());
    Ok(())
}

#[test]
fn install_links_every_source_file() -> Result<()> {
    let layout = layout()?;
    fs::write(layout.home.join(".bashrc"), "# distro bashrc\n")?;

    let linker = linker(&layout, config(&layout))?;
    let report = linker.install(DeployOptions::default())?;
    assert!(report.is_clean());

    assert_links_to(layout.home.join(".vimrc"), layout.repo.join("dotfiles/vimrc"))?;
    assert_links_to(
        layout.home.join(".vim/colors/dark.vim"),
        layout.repo.join("dotfiles/vim/colors/dark.vim"),
    )?;
    assert_links_to(layout.home.join("bin/hello"), layout.repo.join("bin/hello"))?;
    assert_links_to(layout.home.join(".bashrc"), layout.repo.join("dotfiles/bashrc"))?;
    assert!(fs::symlink_metadata(layout.home.join(".vim")).is_ok_and(|meta| meta.is_dir()));
    assert!(fs::symlink_metadata(layout.home.join(".vimrc.swp")).is_err());

    assert_eq!(
        report
            .find_target(layout.home.join(".bashrc"))
            .map(|action| action.outcome.clone()),
        Some(Outcome::SkeletonReplaced)
    );

    Ok(())
}

#[test]
fn second_install_changes_nothing() -> Result<()> {
    let layout = layout()?;
    let linker = linker(&layout, config(&layout))?;
    linker.install(DeployOptions::default())?;

    let report = linker.install(DeployOptions::default())?;
    assert_eq!(report.changes().count(), 0);
    assert!(report.is_clean());
    assert!(report.actions().all(|action| matches!(
        action.outcome,
        Outcome::Unchanged | Outcome::DirectoryExists
    )));

    Ok(())
}

#[test]
fn install_reads_repository_config() -> Result<()> {
    let layout = layout()?;
    let toml = format!(
        r#"
        [settings]
        skeleton_dir = "{}"

        [[link]]
        source = "bin"
        target = "{}"
        "#,
        layout.skel.display(),
        layout.home.join("bin").display()
    );
    fs::write(layout.repo.join("homefiles.toml"), toml)?;

    let linker = Linker::open(&layout.repo)?;
    linker.install(DeployOptions::default())?;

    assert_links_to(layout.home.join("bin/hello"), layout.repo.join("bin/hello"))?;
    assert!(fs::symlink_metadata(layout.home.join(".vimrc")).is_err());

    Ok(())
}

#[test]
fn audit_finds_and_prunes_stale_links() -> Result<()> {
    let layout = layout()?;
    let linker = linker(&layout, config(&layout))?;
    linker.install(DeployOptions::default())?;
    assert!(linker.audit()?.is_empty());

    fs::remove_file(layout.repo.join("dotfiles/vimrc"))?;
    let findings = linker.audit()?;
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].link, layout.home.join(".vimrc"));
    assert!(matches!(findings[0].finding, Finding::Stale { .. }));

    let pruned = linker.prune()?;
    assert_eq!(pruned.len(), 1);
    assert!(fs::symlink_metadata(layout.home.join(".vimrc")).is_err());
    assert!(linker.audit()?.is_empty());

    Ok(())
}

#[test]
fn user_files_survive_forced_install() -> Result<()> {
    let layout = layout()?;
    fs::write(layout.home.join(".vimrc"), "\" my own vimrc\n")?;

    let linker = linker(&layout, config(&layout))?;
    let options = DeployOptions {
        dry_run: false,
        force: true,
    };
    let report = linker.install(options)?;

    assert_eq!(report.problems().count(), 1);
    assert_eq!(
        fs::read_to_string(layout.home.join(".vimrc"))?,
        "\" my own vimrc\n"
    );
    assert_links_to(layout.home.join("bin/hello"), layout.repo.join("bin/hello"))?;

    Ok(())
}

#[cfg(unix)]
#[test]
fn forced_install_never_writes_into_repository() -> Result<()> {
    let layout = layout()?;
    let vim = layout.repo.join("dotfiles/vim");
    fs::write(vim.join("real.vim"), "hi Comment\n")?;
    std::os::unix::fs::symlink("real.vim", vim.join("alias.vim"))?;
    std::os::unix::fs::symlink(&vim, layout.home.join(".vim"))?;

    let linker = linker(&layout, config(&layout))?;
    let options = DeployOptions {
        dry_run: false,
        force: true,
    };
    let report = linker.install(options)?;

    assert!(matches!(
        report
            .find_target(layout.home.join(".vim"))
            .map(|action| &action.outcome),
        Some(Outcome::Conflict { .. })
    ));
    assert!(report.find_target(layout.home.join(".vim/alias.vim")).is_none());
    assert!(report.find_target(layout.home.join(".vim/colors")).is_none());
    assert_links_to(vim.join("alias.vim"), "real.vim")?;
    assert_eq!(fs::read_to_string(vim.join("alias.vim"))?, "hi Comment\n");
    assert_eq!(fs::read_to_string(vim.join("colors/dark.vim"))?, "hi Normal\n");
    assert_links_to(layout.home.join(".vimrc"), layout.repo.join("dotfiles/vimrc"))?;

    Ok(())
}

#[test]
fn skeleton_copy_under_config_dir_gets_replaced() -> Result<()> {
    let layout = layout()?;
    fs::create_dir_all(layout.repo.join("xdgconfig"))?;
    fs::create_dir_all(layout.skel.join(".config"))?;
    fs::create_dir_all(layout.home.join(".config"))?;
    fs::write(layout.repo.join("xdgconfig/foo.conf"), "answer = 42\n")?;
    fs::write(layout.skel.join(".config/foo.conf"), "answer = 0\n")?;
    fs::write(layout.home.join(".config/foo.conf"), "answer = 0\n")?;

    let mut config = config(&layout);
    config.links = vec![LinkRule::new("xdgconfig", layout.home.join(".config"))];
    let report = linker(&layout, config)?.install(DeployOptions::default())?;

    assert!(report.is_clean());
    assert_eq!(
        report
            .find_target(layout.home.join(".config/foo.conf"))
            .map(|action| action.outcome.clone()),
        Some(Outcome::SkeletonReplaced)
    );
    assert_links_to(
        layout.home.join(".config/foo.conf"),
        layout.repo.join("xdgconfig/foo.conf"),
    )?;

    Ok(())
}
