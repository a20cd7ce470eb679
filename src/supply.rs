//! HTTP fetching for base archives
//!
//! Transport errors are retried with exponential backoff; an HTTP status
//! error is the server's answer and fails at once. Nothing is written
//! locally until a success status has arrived.

use crate::error::{Error, Result, cleanup_failure};
use crate::manifest::RetryConfig;
use chrono_machines::{BackoffStrategy, ExponentialBackoff};
use rand::rng;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

const CHUNK: usize = 64 * 1024;

type Response = ureq::http::Response<ureq::Body>;

fn backoff(config: &RetryConfig) -> ExponentialBackoff {
    ExponentialBackoff::new()
        .base_delay_ms(config.base_delay_ms)
        .max_delay_ms(config.max_delay_ms)
        .multiplier(config.multiplier)
        .max_attempts(config.max_attempts)
        .jitter_factor(config.jitter_factor)
}

fn is_retryable(err: &ureq::Error) -> bool {
    !matches!(err, ureq::Error::StatusCode(_))
}

/// GET with retries on transport failures
fn get(url: &str, config: &RetryConfig) -> Result<Response> {
    let strategy = backoff(config);
    let mut rng = rng();
    let mut attempt: u8 = 0;

    loop {
        attempt += 1;
        let err = match ureq::get(url).call() {
            Ok(response) => return Ok(response),
            Err(err) => err,
        };

        match strategy.delay(attempt, &mut rng) {
            Some(delay_ms) if is_retryable(&err) => {
                tracing::warn!(url, attempt, delay_ms, error = %err, "request failed, retrying");
                thread::sleep(Duration::from_millis(delay_ms));
            }
            _ => {
                let reason = match err {
                    ureq::Error::StatusCode(code) => format!("{} returned HTTP {}", url, code),
                    other => format!("{} unreachable after {} attempts: {}", url, attempt, other),
                };
                return Err(Error::DownloadFailed(reason));
            }
        }
    }
}

/// Progress lines every 10% of a known size
struct Progress {
    total: Option<u64>,
    done: u64,
    reported: u64,
}

impl Progress {
    fn new(total: Option<u64>) -> Self {
        Self {
            total: total.filter(|t| *t > 0),
            done: 0,
            reported: 0,
        }
    }

    fn advance(&mut self, n: usize) {
        self.done += n as u64;
        if let Some(total) = self.total {
            let percent = self.done * 100 / total;
            if percent >= self.reported + 10 {
                eprintln!("  {:>3}%  {} / {} bytes", percent, self.done, total);
                self.reported = percent;
            }
        }
    }
}

/// Download `url` into `dest`, verifying `expected_sha256` when given
///
/// The parent of `dest` is created only after a success status. `dest` is
/// removed again if the transfer or the checksum fails.
pub fn download_file(
    url: &str,
    dest: &Path,
    expected_sha256: Option<&str>,
    retry_config: &RetryConfig,
) -> Result<u64> {
    eprintln!("Fetching {}", url);
    let response = get(url, retry_config)?;

    let size: Option<u64> = response
        .headers()
        .get("Content-Length")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok());
    if let Some(size) = size {
        eprintln!("  {:.1} MB", size as f64 / 1_048_576.0);
    }

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(Error::fs("create", parent))?;
    }

    let mut body = response.into_body().into_reader();
    write_body(&mut body, dest, size, expected_sha256).map_err(|e| {
        let removed = fs::remove_file(dest);
        e.with_cleanup_failures(cleanup_failure(dest, removed).into_iter().collect())
    })
}

fn write_body(
    body: &mut impl Read,
    dest: &Path,
    size: Option<u64>,
    expected_sha256: Option<&str>,
) -> Result<u64> {
    let mut file = File::create(dest).map_err(Error::fs("create", dest))?;
    let mut hasher = Sha256::new();
    let mut progress = Progress::new(size);
    let mut chunk = vec![0u8; CHUNK];

    loop {
        let n = body
            .read(&mut chunk)
            .map_err(|e| Error::DownloadFailed(format!("transfer interrupted: {}", e)))?;
        if n == 0 {
            break;
        }
        file.write_all(&chunk[..n])?;
        hasher.update(&chunk[..n]);
        progress.advance(n);
    }
    file.sync_all()?;

    if let Some(expected) = expected_sha256 {
        let actual = hex::encode(hasher.finalize());
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(Error::ChecksumMismatch {
                file: dest.display().to_string(),
                expected: expected.to_string(),
                actual,
            });
        }
        tracing::debug!(file = %dest.display(), "checksum verified");
    }

    Ok(progress.done)
}

/// SHA256 of a file, hex encoded
pub fn sha256_file(path: &Path) -> Result<String> {
    let file = File::open(path).map_err(|e| Error::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut chunk = vec![0u8; CHUNK];
    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        hasher.update(&chunk[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Fetch a small text document such as a release MANIFEST
pub fn fetch_text(url: &str, retry_config: &RetryConfig) -> Result<String> {
    get(url, retry_config)?
        .into_body()
        .read_to_string()
        .map_err(|e| Error::DownloadFailed(format!("reading {}: {}", url, e)))
}

/// Parse a release MANIFEST into distribution set -> sha256
///
/// Lines look like `base.txz<TAB>sha256<TAB>size<TAB>...`.
pub fn parse_manifest(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split('\t');
            let set = fields.next()?.trim_end_matches(".txz");
            let sum = fields.next()?;
            Some((set.to_string(), sum.to_string()))
        })
        .collect()
}
