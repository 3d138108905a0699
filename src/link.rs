// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Home-files link management.
//!
//! A home-files repository keeps configuration files in a handful of source
//! trees, e.g., `dotfiles/`, `bin/`, `xdgconfig/`. Each source tree is mapped
//! onto a destination directory by a __link rule__. Installing the repository
//! means mirroring the directory structure of each source tree at its
//! destination, and symlinking every file back into the repository. Because
//! the destination only holds symlinks, editing a file in the home directory
//! edits the repository, and pulling the repository updates the home
//! directory.
//!
//! # Install Pipeline
//!
//! 1. Expand link rules into a [`LinkPlan`] through [`LinkPlanner`].
//! 2. Apply the plan through a [`Deployment`], which yields a
//!    [`DeployReport`].
//! 3. Audit the destinations for stale, broken, or misdirected symlinks
//!    through [`Auditor`].
//!
//! # See Also
//!
//! 1. [`HomefilesConfig`]
//! 2. [`plan`]
//! 3. [`deploy`]

pub mod audit;
pub mod deploy;
pub mod plan;

use crate::{
    config::HomefilesConfig,
    link::{
        audit::{AuditEntry, Auditor},
        deploy::{DeployContext, DeployOptions, DeployReport, Deployment, SymlinkDeployer},
        plan::{LinkPlan, LinkPlanner},
    },
    path::home_dir,
};

use std::path::{Path, PathBuf};
use tracing::{info, instrument};

/// Links source trees of a home-files repository into place.
#[derive(Debug)]
pub struct Linker<D = SymlinkDeployer>
where
    D: Deployment,
{
    root: PathBuf,
    home: PathBuf,
    config: HomefilesConfig,
    deployer: D,
}

impl Linker {
    /// Open repository at `root` with its own configuration.
    ///
    /// # Errors
    ///
    /// - Return [`LinkError::Root`] if `root` cannot be resolved.
    /// - Return [`LinkError::Config`] if configuration cannot be loaded.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let config = HomefilesConfig::load(root.as_ref())?;
        Self::new(root, config, SymlinkDeployer::new())
    }
}

impl<D> Linker<D>
where
    D: Deployment,
{
    /// Construct new linker.
    ///
    /// # Errors
    ///
    /// - Return [`LinkError::Root`] if `root` cannot be resolved.
    /// - Return [`LinkError::NoWayHome`] if home directory cannot be determined.
    pub fn new(root: impl AsRef<Path>, config: HomefilesConfig, deployer: D) -> Result<Self> {
        let root = root
            .as_ref()
            .canonicalize()
            .map_err(|err| LinkError::Root {
                source: err,
                root: root.as_ref().to_path_buf(),
            })?;
        let home = home_dir()?;

        Ok(Self {
            root,
            home,
            config,
            deployer,
        })
    }

    /// Use `home` as the home directory mirrored by the skeleton directory.
    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = home.into();
        self
    }

    /// Absolute path to top-level of repository.
    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    /// Configuration in use.
    pub fn config(&self) -> &HomefilesConfig {
        &self.config
    }

    /// Expand link rules into a plan.
    ///
    /// # Errors
    ///
    /// - Return [`LinkError::Plan`] if planning fails.
    pub fn plan(&self) -> Result<LinkPlan> {
        Ok(LinkPlanner::new(&self.root, &self.config.settings).plan(&self.config.links)?)
    }

    /// Install every link rule.
    ///
    /// # Errors
    ///
    /// - Return [`LinkError::Plan`] if planning fails.
    /// - Return [`LinkError::Deploy`] if deployment fails.
    #[instrument(skip(self), level = "debug")]
    pub fn install(&self, options: DeployOptions) -> Result<DeployReport> {
        info!("install from {:?}", self.root.display());
        let plan = self.plan()?;
        let context = DeployContext {
            root: &self.root,
            home: &self.home,
            skeleton_dir: &self.config.settings.skeleton_dir,
        };
        let report = self.deployer.deploy(&plan, context, options)?;

        Ok(report)
    }

    /// Report stale, broken, and misdirected symlinks.
    ///
    /// # Errors
    ///
    /// - Return [`LinkError::Plan`] if planning fails.
    /// - Return [`LinkError::Audit`] if destinations cannot be scanned.
    pub fn audit(&self) -> Result<Vec<AuditEntry>> {
        let plan = self.plan()?;
        Ok(Auditor::new(&self.root, &plan).audit()?)
    }

    /// Remove stale symlinks, returning the ones removed.
    ///
    /// # Errors
    ///
    /// - Return [`LinkError::Plan`] if planning fails.
    /// - Return [`LinkError::Audit`] if destinations cannot be scanned.
    pub fn prune(&self) -> Result<Vec<AuditEntry>> {
        let plan = self.plan()?;
        Ok(Auditor::new(&self.root, &plan).prune()?)
    }
}

/// Link management error types.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Repository root cannot be resolved.
    #[error("failed to resolve repository at {:?}", root.display())]
    Root {
        #[source]
        source: std::io::Error,
        root: PathBuf,
    },

    /// Home directory cannot be determined.
    #[error(transparent)]
    NoWayHome(#[from] crate::path::NoWayHome),

    /// Configuration cannot be loaded.
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    /// Link rules cannot be expanded.
    #[error(transparent)]
    Plan(#[from] crate::link::plan::PlanError),

    /// Plan cannot be applied.
    #[error(transparent)]
    Deploy(#[from] crate::link::deploy::DeployError),

    /// Destinations cannot be scanned.
    #[error(transparent)]
    Audit(#[from] crate::link::audit::AuditError),
}

/// Friendly result alias :3
type Result<T, E = LinkError> = std::result::Result<T, E>;
