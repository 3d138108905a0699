// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Home-files management.
//!
//! Keep dotfiles in a Git repository, symlink them into the home directory,
//! and only ever pull updates that were signed by a pinned OpenPGP key.
//!
//! # See Also
//!
//! 1. [`link`] for installation and symlink auditing.
//! 2. [`update`] for signature gated updates.
//! 3. [`config`] for the `homefiles.toml` layout.

pub mod config;
pub mod link;
pub mod path;
pub mod update;

pub use config::{Fingerprint, HomefilesConfig, LinkRule};
pub use link::Linker;
pub use update::Updater;
