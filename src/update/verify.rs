// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Commit signature verification.
//!
//! Every commit pulled into a home-files repository ends up executing as
//! shell configuration the next time a terminal opens. Thus, no commit is
//! accepted unless it carries a valid OpenPGP signature from a key whose
//! fingerprint has been pinned in the configuration.
//!
//! # GnuPG Status Protocol
//!
//! Signatures are checked by the `gpg` binary. Its human readable output is
//! localized and unstable, so verdicts are derived from the machine readable
//! status lines that `gpg --status-fd` emits instead, e.g.:
//!
//! ```text
//! [GNUPG:] GOODSIG 89ABCDEF01234567 John Doe <john@doe.com>
//! [GNUPG:] VALIDSIG <signer fpr> 2025-01-01 ... 00 <primary fpr>
//! ```
//!
//! The exit status of `gpg` is never trusted on its own.
//!
//! # See Also
//!
//! - [GnuPG DETAILS](https://github.com/gpg/gnupg/blob/master/doc/DETAILS)

use crate::config::Fingerprint;

use git2::{ErrorCode, Oid, Repository};
use std::{
    env,
    ffi::OsString,
    fmt::{Display, Formatter, Result as FmtResult},
    io::{ErrorKind, Write},
    process::{Command, Stdio},
};
use tracing::{debug, instrument};

/// Environment variable overriding the gpg program to run.
pub const GPG_PROGRAM_VAR: &str = "HOMEFILES_GPG";

/// Verdict on a single signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Signature is valid.
    Good {
        /// Fingerprint of the (sub)key that made the signature.
        signer: String,

        /// Fingerprint of the primary key, if reported.
        primary: Option<String>,
    },

    /// Signature does not match the signed data.
    Bad { key_id: String },

    /// Public key needed to check the signature is not available.
    MissingKey { key_id: String },

    /// Signature or signing key has expired.
    Expired { key_id: String },

    /// Signing key has been revoked.
    Revoked { key_id: String },

    /// Commit carries no signature at all.
    Unsigned,

    /// Signature could not be checked.
    Error(String),
}

impl Verdict {
    /// Check if signature was made by one of the pinned keys.
    ///
    /// Either the signing subkey, or its primary key, may be pinned.
    pub fn is_trusted_by(&self, pinned: &[Fingerprint]) -> bool {
        let Self::Good { signer, primary } = self else {
            return false;
        };

        pinned.iter().any(|fingerprint| {
            fingerprint.matches(signer)
                || primary
                    .as_deref()
                    .is_some_and(|primary| fingerprint.matches(primary))
        })
    }
}

impl Display for Verdict {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Good { signer, .. } => write!(fmt, "good signature from {signer}"),
            Self::Bad { key_id } => write!(fmt, "bad signature from {key_id}"),
            Self::MissingKey { key_id } => write!(fmt, "missing public key {key_id}"),
            Self::Expired { key_id } => write!(fmt, "expired signature or key {key_id}"),
            Self::Revoked { key_id } => write!(fmt, "revoked key {key_id}"),
            Self::Unsigned => write!(fmt, "no signature"),
            Self::Error(reason) => write!(fmt, "cannot check signature: {reason}"),
        }
    }
}

/// Derive verdict from gpg status output.
///
/// Failure statuses always win over success statuses, so a stream that
/// reports both a good and a bad signature is never considered good.
pub fn parse_gpg_status(status: &str) -> Verdict {
    let mut good = false;
    let mut valid: Option<(String, Option<String>)> = None;
    let mut failure: Option<Verdict> = None;

    for line in status.lines() {
        let mut fields = line.split_whitespace();
        if fields.next() != Some("[GNUPG:]") {
            continue;
        }

        let Some(keyword) = fields.next() else {
            continue;
        };
        let args = fields.collect::<Vec<_>>();
        let key_id = args.first().map(|id| id.to_string()).unwrap_or_default();

        let verdict = match keyword {
            "GOODSIG" => {
                good = true;
                continue;
            }
            "VALIDSIG" => {
                if let Some(signer) = args.first() {
                    valid = Some((signer.to_string(), args.get(9).map(|fpr| fpr.to_string())));
                }
                continue;
            }
            "BADSIG" => Verdict::Bad { key_id },
            "REVKEYSIG" => Verdict::Revoked { key_id },
            "EXPSIG" | "EXPKEYSIG" => Verdict::Expired { key_id },
            "NO_PUBKEY" => Verdict::MissingKey { key_id },
            // INVARIANT: Return code 9 of ERRSIG means missing public key.
            "ERRSIG" if args.get(5) == Some(&"9") => Verdict::MissingKey { key_id },
            "ERRSIG" => Verdict::Error(format!("gpg cannot check signature from {key_id}")),
            _ => continue,
        };

        // INVARIANT: Keep the first failure, later ones tend to be follow-ups.
        failure.get_or_insert(verdict);
    }

    if let Some(failure) = failure {
        return failure;
    }

    match (good, valid) {
        (true, Some((signer, primary))) => Verdict::Good { signer, primary },
        (true, None) => Verdict::Error("gpg reported no signer fingerprint".into()),
        (false, _) => Verdict::Error("gpg reported no signature status".into()),
    }
}

/// Check detached signatures.
pub trait SignatureVerifier {
    /// Check signature over signed data.
    fn verify(&self, signature: &[u8], signed_data: &[u8]) -> Result<Verdict>;
}

/// Signature verification through the gpg binary.
#[derive(Debug, Clone)]
pub struct GpgVerifier {
    program: OsString,
}

impl GpgVerifier {
    /// Construct new verifier running `program`.
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Construct new verifier from environment.
    ///
    /// Uses program named by [`GPG_PROGRAM_VAR`], or "gpg" otherwise.
    pub fn from_env() -> Self {
        Self::new(env::var_os(GPG_PROGRAM_VAR).unwrap_or_else(|| "gpg".into()))
    }
}

impl Default for GpgVerifier {
    fn default() -> Self {
        Self::from_env()
    }
}

impl SignatureVerifier for GpgVerifier {
    #[instrument(skip(self, signature, signed_data), level = "debug")]
    fn verify(&self, signature: &[u8], signed_data: &[u8]) -> Result<Verdict> {
        let mut sigfile = tempfile::NamedTempFile::new().map_err(VerifyError::TempFile)?;
        sigfile
            .write_all(signature)
            .map_err(VerifyError::TempFile)?;

        let mut child = Command::new(&self.program)
            .args(["--batch", "--no-tty", "--status-fd", "1", "--verify"])
            .arg(sigfile.path())
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| match err.kind() {
                ErrorKind::NotFound => VerifyError::GpgMissing(self.program.clone()),
                _ => VerifyError::Syscall(err),
            })?;

        // INVARIANT: Close stdin once written so gpg sees end of data.
        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(signed_data) {
                // INVARIANT: gpg quits early on signatures it cannot parse.
                Err(err) if err.kind() == ErrorKind::BrokenPipe => {
                    debug!("gpg stopped reading signed data early")
                }
                result => result?,
            }
        }
        let output = child.wait_with_output()?;

        let status = String::from_utf8_lossy(&output.stdout);
        debug!("gpg exited with {}:\n{status}", output.status);

        Ok(parse_gpg_status(&status))
    }
}

/// Verdict on a single commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitVerdict {
    pub commit: Oid,
    pub verdict: Verdict,
    pub trusted: bool,
}

/// Check commit signatures against pinned fingerprints.
pub struct CommitVerifier<'repo, V>
where
    V: SignatureVerifier,
{
    repository: &'repo Repository,
    verifier: &'repo V,
    pinned: &'repo [Fingerprint],
}

impl<'repo, V> CommitVerifier<'repo, V>
where
    V: SignatureVerifier,
{
    /// Construct new commit verifier.
    pub fn new(
        repository: &'repo Repository,
        verifier: &'repo V,
        pinned: &'repo [Fingerprint],
    ) -> Self {
        Self {
            repository,
            verifier,
            pinned,
        }
    }

    /// Verify signature of one commit.
    ///
    /// # Errors
    ///
    /// - Return [`VerifyError::Git2`] if commit cannot be read.
    /// - Return [`VerifyError::Syscall`] if verifier cannot be run.
    pub fn verify_commit(&self, commit: Oid) -> Result<CommitVerdict> {
        let verdict = match self.repository.extract_signature(&commit, None) {
            Ok((signature, signed_data)) => self.verifier.verify(&signature, &signed_data)?,
            Err(err) if err.code() == ErrorCode::NotFound => Verdict::Unsigned,
            Err(err) => return Err(err.into()),
        };
        let trusted = verdict.is_trusted_by(self.pinned);
        debug!("commit {commit}: {verdict} (trusted: {trusted})");

        Ok(CommitVerdict {
            commit,
            verdict,
            trusted,
        })
    }
}

/// Signature verification error types.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// The gpg binary cannot be found.
    #[error("cannot find gpg program {0:?}")]
    GpgMissing(OsString),

    /// Signature cannot be staged for gpg.
    #[error("failed to write signature to temporary file")]
    TempFile(#[source] std::io::Error),

    /// Communication with gpg failed.
    #[error(transparent)]
    Syscall(#[from] std::io::Error),

    /// Operations from libgit2 fail.
    #[error(transparent)]
    Git2(#[from] git2::Error),
}

/// Friendly result alias :3
pub type Result<T, E = VerifyError> = std::result::Result<T, E>;
