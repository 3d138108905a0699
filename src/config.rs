// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the `homefiles.toml` file that sits at the top-level
//! of a home-files repository. The file describes which source trees of the
//! repository get linked where, which paths never get linked, and which
//! OpenPGP keys are trusted to sign incoming updates.
//!
//! # General Layout
//!
//! ```toml
//! [settings]
//! skeleton_dir = "/etc/skel"
//! ignore = [".git", "*.swp"]
//!
//! [[link]]
//! source = "dotfiles"
//! target = "~"
//! prefix = "."
//!
//! [[link]]
//! source = "bin"
//! target = "~/bin"
//!
//! [update]
//! remote = "origin"
//! branch = "master"
//! fingerprints = ["0123456789ABCDEF0123456789ABCDEF01234567"]
//! ```
//!
//! When the repository does not provide a configuration file, a built-in
//! layout is used instead. See [`HomefilesConfig::builtin`].

use crate::path::{self, NoWayHome, CONFIG_FILE_NAME};

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::read_to_string,
    io::ErrorKind,
    path::{Component, Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, info};

/// Home-files configuration layout.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct HomefilesConfig {
    /// Settings shared by every link rule.
    #[serde(default)]
    pub settings: Settings,

    /// Listing of source trees to link.
    #[serde(rename = "link", default)]
    pub links: Vec<LinkRule>,

    /// Settings for signed updates.
    #[serde(default)]
    pub update: UpdateSettings,
}

impl HomefilesConfig {
    /// Load configuration of repository at `root`.
    ///
    /// Falls back to [`HomefilesConfig::builtin`] when the repository does not
    /// contain a configuration file.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if configuration file exists but cannot
    ///   be read.
    /// - Return [`ConfigError::Deserialize`] if configuration is malformed.
    /// - Return [`ConfigError::NoWayHome`] if built-in layout is needed, but
    ///   home directory cannot be determined.
    pub fn load(root: impl AsRef<Path>) -> Result<Self> {
        let config_path = root.as_ref().join(CONFIG_FILE_NAME);
        match read_to_string(&config_path) {
            Ok(data) => {
                debug!("load configuration from {:?}", config_path.display());
                data.parse()
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!("no {CONFIG_FILE_NAME} found, using built-in layout");
                Self::builtin()
            }
            Err(err) => Err(ConfigError::Read {
                source: err,
                config_path,
            }),
        }
    }

    /// Built-in layout of a home-files repository.
    ///
    /// - `dotfiles/` is linked into the home directory with a "." prefix.
    /// - `bin/` is linked into `~/bin`.
    /// - `xdgconfig/` is linked into the XDG configuration directory.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::NoWayHome`] if home directory cannot be
    ///   determined.
    pub fn builtin() -> Result<Self> {
        let home = path::home_dir()?;
        Ok(Self {
            settings: Settings::default(),
            links: vec![
                LinkRule::new("dotfiles", &home).with_prefix("."),
                LinkRule::new("bin", home.join("bin")),
                LinkRule::new("xdgconfig", path::config_dir()?),
            ],
            update: UpdateSettings::default(),
        })
    }
}

impl FromStr for HomefilesConfig {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut config: HomefilesConfig =
            toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on every destination path.
        config.settings.skeleton_dir = expand_path(&config.settings.skeleton_dir)?;
        for rule in config.links.iter_mut() {
            let escapes = rule
                .source
                .components()
                .any(|part| !matches!(part, Component::Normal(_) | Component::CurDir));
            if escapes {
                return Err(ConfigError::EscapingSource(rule.source.clone()));
            }
            rule.target = expand_path(&rule.target)?;
        }

        Ok(config)
    }
}

impl Display for HomefilesConfig {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Settings shared by every link rule.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Directory holding skeleton files of new user accounts.
    ///
    /// A regular file that is byte-identical to its skeleton counterpart is
    /// considered unmodified, and can be replaced by a symlink.
    pub skeleton_dir: PathBuf,

    /// Gitignore-style patterns excluded from every link rule.
    pub ignore: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            skeleton_dir: PathBuf::from("/etc/skel"),
            ignore: [".git", "*.pyc", "__pycache__/", "*.swp", "*~"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// Mapping of a source tree in the repository to a destination directory.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct LinkRule {
    /// Source directory relative to top-level of repository, without `..`.
    pub source: PathBuf,

    /// Destination directory.
    pub target: PathBuf,

    /// Prefix prepended to top-level entry names, e.g., "." for dotfiles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    /// Gitignore-style patterns excluded from this rule only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore: Vec<String>,
}

impl LinkRule {
    /// Construct new link rule.
    pub fn new(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            prefix: None,
            ignore: Vec::new(),
        }
    }

    /// Set prefix of top-level entry names.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Add rule specific ignore patterns.
    pub fn with_ignore(mut self, patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.ignore.extend(patterns.into_iter().map(Into::into));
        self
    }
}

/// Settings for signed updates.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpdateSettings {
    /// Name of remote to fetch from.
    pub remote: String,

    /// Branch to fetch, defaults to the currently checked out branch.
    ///
    /// Updates are refused when this names any branch other than the one
    /// checked out.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    /// Pinned fingerprints of keys trusted to sign incoming commits.
    pub fingerprints: Vec<Fingerprint>,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            remote: "origin".into(),
            branch: None,
            fingerprints: Vec::new(),
        }
    }
}

/// OpenPGP key fingerprint.
///
/// Stored as uppercase hexadecimal without whitespace. Only full length
/// fingerprints are accepted, i.e., 40 digits for v4 keys, and 64 digits for
/// v5 and v6 keys. Short key IDs are trivially forgeable.
#[derive(Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Check if hexadecimal string names this fingerprint.
    pub fn matches(&self, hex: impl AsRef<str>) -> bool {
        self.0.eq_ignore_ascii_case(hex.as_ref().trim())
    }

    /// Treat fingerprint as string slice.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl FromStr for Fingerprint {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let trimmed = data.trim();
        let hex: String = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed)
            .chars()
            .filter(|ch| !ch.is_whitespace())
            .map(|ch| ch.to_ascii_uppercase())
            .collect();

        let valid_len = matches!(hex.len(), 40 | 64);
        if !valid_len || !hex.chars().all(|ch| ch.is_ascii_hexdigit()) {
            return Err(ConfigError::InvalidFingerprint(data.to_string()));
        }

        Ok(Self(hex))
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = ConfigError;

    fn try_from(data: String) -> Result<Self, Self::Error> {
        data.parse()
    }
}

impl From<Fingerprint> for String {
    fn from(fingerprint: Fingerprint) -> Self {
        fingerprint.0
    }
}

impl Display for Fingerprint {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_str())
    }
}

fn expand_path(path: &Path) -> Result<PathBuf> {
    Ok(PathBuf::from(
        shellexpand::full(path.to_string_lossy().as_ref())
            .map_err(ConfigError::ShellExpansion)?
            .into_owned(),
    ))
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read configuration at {:?}", config_path.display())]
    Read {
        #[source]
        source: std::io::Error,
        config_path: PathBuf,
    },

    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Link rule source escapes the repository.
    #[error("link source {:?} must stay inside the repository", .0.display())]
    EscapingSource(PathBuf),

    /// Fingerprint is not a full length hexadecimal OpenPGP fingerprint.
    #[error("invalid key fingerprint {0:?}")]
    InvalidFingerprint(String),

    /// Built-in layout needs a home directory.
    #[error(transparent)]
    NoWayHome(#[from] NoWayHome),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
