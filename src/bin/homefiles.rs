// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use homefiles::{
    link::deploy::{DeployOptions, Outcome},
    path::discover_repo_root,
    update::{UpdateOptions, UpdateStatus},
    HomefilesConfig, Linker, Updater,
};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use indicatif::ProgressBar;
use std::{env, path::PathBuf, process::exit};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "homefiles [options] <command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to home-files repository.
    #[arg(short = 'C', long = "repo", global = true, value_name = "path")]
    pub repo: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    async fn run(self) -> Result<()> {
        let root = match self.repo {
            Some(root) => root,
            None => discover_repo_root(env::current_dir()?),
        };

        match self.command {
            Command::Install(opts) => run_install(root, opts),
            Command::Check(opts) => run_check(root, opts),
            Command::Update(opts) => run_update(root, opts).await,
            Command::Verify(opts) => run_verify(root, opts),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Symlink repository files into place.
    #[command(override_usage = "homefiles install [options]")]
    Install(InstallOptions),

    /// Report stale, broken, and misdirected symlinks.
    #[command(override_usage = "homefiles check [options]")]
    Check(CheckOptions),

    /// Pull signed commits from remote, then install.
    #[command(override_usage = "homefiles update [options]")]
    Update(UpdateArgs),

    /// Verify commit signatures against pinned keys.
    #[command(override_usage = "homefiles verify [<revision>]...")]
    Verify(VerifyOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct InstallOptions {
    /// Show what would be done without touching anything.
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Replace symlinks that point somewhere else.
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct CheckOptions {
    /// Remove stale symlinks that point into the repository.
    #[arg(short, long)]
    pub prune: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct UpdateArgs {
    /// Fetch and verify without moving the branch.
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Do not install after updating.
    #[arg(long)]
    pub no_install: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct VerifyOptions {
    /// Revisions to verify.
    #[arg(value_name = "revision", default_value = "HEAD")]
    pub revisions: Vec<String>,
}

#[tokio::main]
async fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run().await {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

async fn run() -> Result<()> {
    Cli::parse().run().await
}

fn run_install(root: PathBuf, opts: InstallOptions) -> Result<()> {
    let linker = Linker::open(root)?;
    let options = DeployOptions {
        dry_run: opts.dry_run,
        force: opts.force,
    };
    let report = linker.install(options)?;

    let changes = report.changes().count();
    let problems = report.problems().count();
    if opts.dry_run {
        info!("{changes} changes would be made");
    } else {
        info!("{changes} changes made");
    }

    if problems > 0 {
        if report
            .problems()
            .any(|action| matches!(action.outcome, Outcome::Misdirected { .. }))
        {
            warn!("rerun with --force to replace misdirected symlinks");
        }
        bail!("{problems} targets need attention");
    }

    Ok(())
}

fn run_check(root: PathBuf, opts: CheckOptions) -> Result<()> {
    let linker = Linker::open(root)?;
    if opts.prune {
        let pruned = linker.prune()?;
        info!("pruned {} stale symlinks", pruned.len());
    }

    let findings = linker.audit()?;
    for entry in &findings {
        warn!("{:?}: {}", entry.link.display(), entry.finding);
    }

    if !findings.is_empty() {
        bail!("{} suspicious symlinks found", findings.len());
    }

    info!("all symlinks in order");
    Ok(())
}

async fn run_update(root: PathBuf, opts: UpdateArgs) -> Result<()> {
    let config = HomefilesConfig::load(&root)?;
    let options = UpdateOptions {
        dry_run: opts.dry_run,
    };

    let update_root = root.clone();
    let settings = config.update.clone();
    let status = tokio::task::spawn_blocking(move || -> Result<UpdateStatus> {
        let updater = Updater::open(update_root, settings)?;
        Ok(updater.update(options, ProgressBar::new(0))?)
    })
    .await??;

    match status {
        UpdateStatus::UpToDate => {}
        UpdateStatus::Verified { from, to, commits } => {
            info!("{commits} signed commits ready to apply: {from}..{to}");
            return Ok(());
        }
        UpdateStatus::Updated { commits, .. } => info!("applied {commits} signed commits"),
    }

    if opts.no_install || opts.dry_run {
        return Ok(());
    }

    run_install(
        root,
        InstallOptions {
            dry_run: false,
            force: false,
        },
    )
}

fn run_verify(root: PathBuf, opts: VerifyOptions) -> Result<()> {
    let config = HomefilesConfig::load(&root)?;
    let updater = Updater::open(&root, config.update)?;

    let mut untrusted = 0;
    for result in updater.verify_revisions(&opts.revisions)? {
        if result.trusted {
            info!("{}: {}", result.commit, result.verdict);
        } else {
            warn!("{}: {} (untrusted)", result.commit, result.verdict);
            untrusted += 1;
        }
    }

    if untrusted > 0 {
        bail!("{untrusted} commits are not signed by a pinned key");
    }

    Ok(())
}
