//! Host bootstrap for `jailconf init`
//!
//! The fragment directory must already exist (FreeBSD ships
//! `/etc/jail.conf.d`). The main `jail.conf` gets an `.include` line for it,
//! and the root and base directories are created.

use crate::error::{Error, Result};
use crate::manifest::JailconfConfig;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const MAIN_CONF_HEADER: &str = "# FreeBSD jail configuration\n\n";

/// What happened to the main jail.conf
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncludeChange {
    /// File did not exist and was written with the include line
    Created,
    /// Include line appended to an existing file
    Appended,
    /// Include line already present
    Present,
}

#[derive(Debug, Clone)]
pub struct InitReport {
    pub conf_dir: PathBuf,
    pub main_conf: PathBuf,
    pub include: IncludeChange,
    pub created_dirs: Vec<PathBuf>,
}

/// The `.include` directive for a fragment directory
pub fn include_line(conf_dir: &Path) -> String {
    format!(".include \"{}/*.conf\";", conf_dir.display())
}

/// Prepare the host for managed jails
pub fn init(config: &JailconfConfig) -> Result<InitReport> {
    let paths = &config.paths;

    if !paths.conf_dir.is_dir() {
        return Err(Error::DirectoryMissing(paths.conf_dir.clone()));
    }

    let include = ensure_include(&paths.main_conf, &include_line(&paths.conf_dir))?;

    let mut created_dirs = Vec::new();
    for dir in [&paths.root_dir, &paths.base_dir] {
        if !dir.is_dir() {
            fs::create_dir_all(dir)?;
            tracing::info!(dir = %dir.display(), "created directory");
            created_dirs.push(dir.clone());
        }
    }

    Ok(InitReport {
        conf_dir: paths.conf_dir.clone(),
        main_conf: paths.main_conf.clone(),
        include,
        created_dirs,
    })
}

/// Make sure `main_conf` contains `line`, creating the file if needed
fn ensure_include(main_conf: &Path, line: &str) -> Result<IncludeChange> {
    let content = match fs::read_to_string(main_conf) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            fs::write(main_conf, format!("{}{}\n", MAIN_CONF_HEADER, line))?;
            tracing::info!(path = %main_conf.display(), "created main jail.conf");
            return Ok(IncludeChange::Created);
        }
        Err(e) => {
            return Err(Error::ConfigRead {
                path: main_conf.to_path_buf(),
                source: e,
            });
        }
    };

    if content.lines().any(|l| l.trim() == line) {
        return Ok(IncludeChange::Present);
    }

    let mut file = OpenOptions::new().append(true).open(main_conf)?;
    write!(file, "\n{}\n", line)?;
    tracing::info!(path = %main_conf.display(), "appended include directive");
    Ok(IncludeChange::Appended)
}
