//! FreeBSD release tags
//!
//! Base archives are stored and fetched per release tag such as
//! `14.1-RELEASE`, `15.0-RC2` or `14.2-RELEASE-p3`.

use crate::error::{Error, Result};
use std::fmt;

/// Release channel of a tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseKind {
    /// -RELEASE official release
    Release,
    /// -RC release candidate
    Rc(u8),
    /// -BETA pre-release
    Beta(u8),
}

impl fmt::Display for ReleaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleaseKind::Release => write!(f, "RELEASE"),
            ReleaseKind::Rc(n) => write!(f, "RC{}", n),
            ReleaseKind::Beta(n) => write!(f, "BETA{}", n),
        }
    }
}

/// A parsed release tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseTag {
    pub major: u8,
    pub minor: u8,
    /// Patch level (from -pX suffix)
    pub patch: Option<u8>,
    pub kind: ReleaseKind,
}

impl ReleaseTag {
    /// Parse a release tag
    ///
    /// Accepts `14.1-RELEASE`, `14.1-RELEASE-p2`, `15.0-RC2`, `15.0-BETA1`.
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('-').collect();

        if parts.len() < 2 || parts.len() > 3 {
            return Err(Error::InvalidVersion(format!(
                "'{}' is not a release tag (expected e.g. 14.1-RELEASE)",
                s
            )));
        }

        let (major, minor) = parts[0]
            .split_once('.')
            .ok_or_else(|| Error::InvalidVersion(format!("Invalid version number: {}", parts[0])))?;

        let major = major
            .parse::<u8>()
            .map_err(|_| Error::InvalidVersion(format!("Invalid major version: {}", major)))?;
        let minor = minor
            .parse::<u8>()
            .map_err(|_| Error::InvalidVersion(format!("Invalid minor version: {}", minor)))?;

        let numbered = |prefix: &str| -> Result<u8> {
            parts[1]
                .strip_prefix(prefix)
                .and_then(|n| n.parse::<u8>().ok())
                .ok_or_else(|| Error::InvalidVersion(format!("Invalid {} number in {}", prefix, s)))
        };

        let kind = match parts[1] {
            "RELEASE" => ReleaseKind::Release,
            p if p.starts_with("RC") => ReleaseKind::Rc(numbered("RC")?),
            p if p.starts_with("BETA") => ReleaseKind::Beta(numbered("BETA")?),
            other => {
                return Err(Error::InvalidVersion(format!(
                    "Unknown release type: {}",
                    other
                )));
            }
        };

        let patch = match parts.get(2) {
            None => None,
            Some(p) => Some(
                p.strip_prefix('p')
                    .and_then(|n| n.parse::<u8>().ok())
                    .ok_or_else(|| Error::InvalidVersion(format!("Invalid patch level: {}", p)))?,
            ),
        };

        Ok(ReleaseTag {
            major,
            minor,
            patch,
            kind,
        })
    }

    /// Derive the release from a download URL
    ///
    /// The archive's parent directory names the release, e.g.
    /// `https://download.freebsd.org/releases/amd64/14.1-RELEASE/base.txz`.
    pub fn from_url(url: &str) -> Result<Self> {
        let path = url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(url);
        let path = path.split(['?', '#']).next().unwrap_or(path);

        let mut segments = path.rsplit('/').filter(|s| !s.is_empty());
        let _archive = segments.next();
        let dir = segments
            .next()
            .ok_or_else(|| Error::InvalidVersion(format!("No release directory in URL {}", url)))?;

        Self::parse(dir)
    }
}

impl fmt::Display for ReleaseTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}-{}", self.major, self.minor, self.kind)?;
        if let Some(patch) = self.patch {
            write!(f, "-p{}", patch)?;
        }
        Ok(())
    }
}

/// Check that a version label is usable as a single path component
pub fn check_label(version: &str) -> Result<()> {
    if version.is_empty() || version.trim() != version {
        return Err(Error::Validation(format!(
            "version '{}' must be non-empty without surrounding whitespace",
            version
        )));
    }
    if version == "." || version == ".." || version.contains(['/', '\0']) {
        return Err(Error::Validation(format!(
            "version '{}' is not a valid directory name",
            version
        )));
    }
    Ok(())
}
