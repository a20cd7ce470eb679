//! Host collaborators used by jail create/delete
//!
//! Archive extraction, file-flag clearing and operator confirmation go
//! through the `Host` trait so lifecycle code can run against a fake.

use crate::error::{Error, Result};
use crate::provision::extract_txz;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::process::Command;

/// Side effects the lifecycle needs from the host
pub trait Host {
    /// Unpack a base archive into an existing directory
    fn extract(&self, archive: &Path, dest: &Path) -> Result<()>;

    /// Clear immutable flags below `path` so it can be removed
    fn clear_flags(&self, path: &Path) -> Result<()>;

    /// Ask the operator a yes/no question
    fn confirm(&self, question: &str) -> Result<bool>;
}

/// The real FreeBSD host
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHost;

impl Host for SystemHost {
    fn extract(&self, archive: &Path, dest: &Path) -> Result<()> {
        eprintln!("Extracting {} to {}...", archive.display(), dest.display());
        extract_txz(archive, dest, true)
    }

    fn clear_flags(&self, path: &Path) -> Result<()> {
        let output = Command::new("chflags")
            .args(["-R", "noschg,nouchg"])
            .arg(path)
            .output()
            .map_err(|e| Error::FlagClearFailed(format!("failed to run chflags: {}", e)))?;

        if !output.status.success() {
            return Err(Error::FlagClearFailed(format!(
                "chflags on {} failed: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    fn confirm(&self, question: &str) -> Result<bool> {
        print!("{} [y/N]: ", question);
        io::stdout().flush()?;

        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        Ok(is_yes(&answer))
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
