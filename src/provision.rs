//! Base system archive store
//!
//! Provides:
//! - Locating `{base_dir}/{version}/{archive}.txz` for new jails
//! - Listing downloaded versions
//! - Fetching archives from a FreeBSD mirror or an explicit URL
//! - Extracting `.txz` archives into a jail root

use crate::error::{Error, Result, cleanup_failure};
use crate::manifest::{JailconfConfig, RetryConfig};
use crate::release::{ReleaseTag, check_label};
use crate::supply::{download_file, fetch_text, parse_manifest, sha256_file};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use tar::Archive;
use xz2::read::XzDecoder;

/// Supported FreeBSD architectures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    Amd64,
    Arm64,
    I386,
}

impl Arch {
    /// Get architecture from current system
    pub fn current() -> Result<Self> {
        let arch = std::env::consts::ARCH;
        match arch {
            "x86_64" => Ok(Arch::Amd64),
            "aarch64" => Ok(Arch::Arm64),
            "x86" => Ok(Arch::I386),
            _ => Err(Error::Validation(format!(
                "Unsupported architecture: {}",
                arch
            ))),
        }
    }

    /// Get FreeBSD architecture name
    pub fn freebsd_name(&self) -> &'static str {
        match self {
            Arch::Amd64 => "amd64",
            Arch::Arm64 => "arm64",
            Arch::I386 => "i386",
        }
    }
}

/// A downloaded base archive
#[derive(Debug, Clone, Serialize)]
pub struct BaseArchive {
    pub version: String,
    pub path: PathBuf,
    pub size: u64,
}

/// Where a fetch takes its archive from
#[derive(Debug, Clone)]
pub enum FetchSource {
    /// Explicit archive URL; the release is read from its parent directory
    Url(String),
    /// Release on the configured mirror
    Release(ReleaseTag),
}

/// Result of a fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Downloaded { version: String, path: PathBuf },
    AlreadyPresent { version: String, path: PathBuf },
}

/// Store of base archives, one directory per version
pub struct BaseStore {
    /// Base URL for FreeBSD mirror
    mirror_url: String,
    /// Directory holding `{version}/{archive}.txz`
    base_dir: PathBuf,
    /// Distribution set name (e.g. "base")
    archive: String,
    /// Retry configuration for network operations
    retry_config: RetryConfig,
}

impl BaseStore {
    pub fn new(
        mirror_url: impl Into<String>,
        base_dir: impl Into<PathBuf>,
        archive: impl Into<String>,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            mirror_url: mirror_url.into(),
            base_dir: base_dir.into(),
            archive: archive.into(),
            retry_config,
        }
    }

    /// Create the store from config
    pub fn from_config(config: &JailconfConfig) -> Self {
        Self::new(
            config.fetch.mirror_url.clone(),
            config.paths.base_dir.clone(),
            config.fetch.archive.clone(),
            config.fetch.retry.clone(),
        )
    }

    fn file_name(&self) -> String {
        format!("{}.txz", self.archive)
    }

    /// Path where the archive for a version lives
    pub fn archive_path(&self, version: &str) -> PathBuf {
        self.base_dir.join(version).join(self.file_name())
    }

    /// Path of an archive that must already be present
    pub fn require(&self, version: &str) -> Result<PathBuf> {
        check_label(version)?;
        let path = self.archive_path(version);
        if path.is_file() {
            Ok(path)
        } else {
            Err(Error::BaseArchiveNotFound {
                version: version.to_string(),
                path,
            })
        }
    }

    /// List downloaded archives sorted by version
    pub fn list(&self) -> Result<Vec<BaseArchive>> {
        let mut bases = Vec::new();

        if !self.base_dir.exists() {
            return Ok(bases);
        }

        for entry in fs::read_dir(&self.base_dir)? {
            let entry = entry?;
            let archive = entry.path().join(self.file_name());

            if let Ok(meta) = fs::metadata(&archive)
                && meta.is_file()
                && let Some(version) = entry.file_name().to_str()
            {
                bases.push(BaseArchive {
                    version: version.to_string(),
                    path: archive,
                    size: meta.len(),
                });
            }
        }

        bases.sort_by(|a, b| a.version.cmp(&b.version));
        Ok(bases)
    }

    /// Get URL for a release archive
    pub fn archive_url(&self, arch: Arch, release: &ReleaseTag) -> String {
        format!(
            "{}/{}/{}/{}",
            self.mirror_url.trim_end_matches('/'),
            arch.freebsd_name(),
            release,
            self.file_name()
        )
    }

    /// Get URL for release MANIFEST
    pub fn manifest_url(&self, arch: Arch, release: &ReleaseTag) -> String {
        format!(
            "{}/{}/{}/MANIFEST",
            self.mirror_url.trim_end_matches('/'),
            arch.freebsd_name(),
            release
        )
    }

    /// Fetch an archive into the store
    ///
    /// The version directory is created only once the server has answered
    /// with success; the archive appears under its final name only when the
    /// download (and checksum, if any) is complete.
    pub fn fetch(
        &self,
        source: &FetchSource,
        sha256: Option<&str>,
        force: bool,
    ) -> Result<FetchOutcome> {
        let (release, url) = match source {
            FetchSource::Url(url) => (ReleaseTag::from_url(url)?, url.clone()),
            FetchSource::Release(release) => {
                (release.clone(), self.archive_url(Arch::current()?, release))
            }
        };
        let version = release.to_string();
        let dest = self.archive_path(&version);

        if dest.exists() && !force {
            if let Some(expected) = sha256 {
                let actual = sha256_file(&dest)?;
                if !actual.eq_ignore_ascii_case(expected) {
                    return Err(Error::ChecksumMismatch {
                        file: dest.display().to_string(),
                        expected: expected.to_string(),
                        actual,
                    });
                }
            }
            tracing::info!(version = %version, path = %dest.display(), "base archive already present");
            return Ok(FetchOutcome::AlreadyPresent {
                version,
                path: dest,
            });
        }

        let expected = match (sha256, source) {
            (Some(sum), _) => Some(sum.to_string()),
            (None, FetchSource::Release(release)) => self.mirror_checksum(release),
            (None, FetchSource::Url(_)) => None,
        };

        let version_dir = self.base_dir.join(&version);
        let dir_existed = version_dir.exists();
        let partial = version_dir.join(format!(".{}.part", self.file_name()));

        let result = download_file(&url, &partial, expected.as_deref(), &self.retry_config)
            .and_then(|_| fs::rename(&partial, &dest).map_err(Error::fs("rename", &partial)));

        if let Err(e) = result {
            let mut failures: Vec<String> =
                cleanup_failure(&partial, fs::remove_file(&partial)).into_iter().collect();
            if !dir_existed {
                // Left in place when something else landed in it
                match fs::remove_dir(&version_dir) {
                    Err(rm) if rm.kind() == io::ErrorKind::DirectoryNotEmpty => {}
                    removed => failures.extend(cleanup_failure(&version_dir, removed)),
                }
            }
            return Err(e.with_cleanup_failures(failures));
        }

        tracing::info!(version = %version, path = %dest.display(), "base archive downloaded");
        Ok(FetchOutcome::Downloaded {
            version,
            path: dest,
        })
    }

    /// Checksum for the archive from the mirror's MANIFEST, if available
    fn mirror_checksum(&self, release: &ReleaseTag) -> Option<String> {
        let url = self.manifest_url(Arch::current().ok()?, release);
        match fetch_text(&url, &self.retry_config) {
            Ok(content) => parse_manifest(&content).remove(&self.archive),
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "MANIFEST unavailable, skipping checksum");
                None
            }
        }
    }
}

/// Extract a .txz (tar.xz) archive
pub fn extract_txz(archive_path: &Path, dest: &Path, preserve_ownerships: bool) -> Result<()> {
    let file = File::open(archive_path).map_err(|e| {
        Error::ExtractionFailed(format!(
            "Failed to open archive {}: {}",
            archive_path.display(),
            e
        ))
    })?;

    let reader = BufReader::new(file);
    let xz = XzDecoder::new(reader);
    let mut archive = Archive::new(xz);

    archive.set_preserve_permissions(true);
    archive.set_preserve_ownerships(preserve_ownerships);

    archive.unpack(dest).map_err(|e| {
        Error::ExtractionFailed(format!(
            "Failed to extract {}: {}",
            archive_path.display(),
            e
        ))
    })?;

    Ok(())
}
