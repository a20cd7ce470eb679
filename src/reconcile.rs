//! Rendered config vs on-disk config
//!
//! Comparison is byte-for-byte with no normalisation. A file that exists but
//! cannot be read is an error, never "absent".

use crate::error::{Error, Result};
use crate::jail::JailRecord;
use crate::template::Template;
use std::fs;
use std::io;
use std::path::Path;

/// Render a template for a jail
pub fn render(template: &Template, record: &JailRecord) -> Result<Vec<u8>> {
    template.render(&record.context())
}

/// Compare rendered bytes with the file at `path`
pub fn compare(rendered: &[u8], path: &Path) -> Result<bool> {
    let existing = fs::read(path).map_err(|e| Error::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(existing == rendered)
}

/// State of a jail's config file relative to its render
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistingConfig {
    Absent,
    Matches,
    Drifted,
}

/// Inspect the config file at `path`
pub fn inspect(rendered: &[u8], path: &Path) -> Result<ExistingConfig> {
    match fs::symlink_metadata(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ExistingConfig::Absent),
        Err(e) => {
            return Err(Error::ConfigRead {
                path: path.to_path_buf(),
                source: e,
            });
        }
        Ok(_) => {}
    }

    if compare(rendered, path)? {
        Ok(ExistingConfig::Matches)
    } else {
        Ok(ExistingConfig::Drifted)
    }
}

/// Create policy: `Ok(true)` when the jail is already in place
///
/// A matching file means nothing to do; a differing file is never
/// overwritten.
pub fn check_create(record: &JailRecord, rendered: &[u8]) -> Result<bool> {
    match inspect(rendered, &record.conf_path)? {
        ExistingConfig::Absent => Ok(false),
        ExistingConfig::Matches => Ok(true),
        ExistingConfig::Drifted => Err(Error::ConfigDrift {
            name: record.name.clone(),
            path: record.conf_path.clone(),
        }),
    }
}

/// Delete policy: the file must still be exactly what would be rendered
pub fn check_delete(record: &JailRecord, rendered: &[u8]) -> Result<()> {
    if compare(rendered, &record.conf_path)? {
        Ok(())
    } else {
        Err(Error::ConfigDrift {
            name: record.name.clone(),
            path: record.conf_path.clone(),
        })
    }
}
