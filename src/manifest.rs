//! Configuration file parsing for jailconf
//!
//! Parses `jailconf.toml` using serde. Every field has a default, so a host
//! without a config file runs with the stock FreeBSD layout.

use crate::error::{Error, Result};
use crate::network::AddressPlan;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

/// Config file consulted when `--config` is not given
pub const DEFAULT_CONFIG_PATH: &str = "/usr/local/etc/jailconf.toml";

/// Load configuration from a file
pub fn load(path: &Path) -> Result<JailconfConfig> {
    let content = fs::read_to_string(path).map_err(|e| Error::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config: JailconfConfig = toml::from_str(&content)?;
    config.validate()?;

    Ok(config)
}

/// Load the explicit config file, or the default one if it exists
///
/// An explicitly named file must exist; a missing default file falls back
/// to built-in defaults.
pub fn load_or_default(explicit: Option<&Path>) -> Result<JailconfConfig> {
    match explicit {
        Some(path) => load(path),
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_PATH);
            if default_path.exists() {
                load(default_path)
            } else {
                tracing::debug!("no config at {}, using defaults", DEFAULT_CONFIG_PATH);
                let config = JailconfConfig::default();
                config.validate()?;
                Ok(config)
            }
        }
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct JailconfConfig {
    /// Filesystem layout
    #[serde(default)]
    pub paths: PathsConfig,

    /// Address plan for VNET jails
    #[serde(default)]
    pub network: NetworkConfig,

    /// Base archive downloads
    #[serde(default)]
    pub fetch: FetchConfig,
}

impl JailconfConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        for (key, path) in [
            ("paths.conf_dir", &self.paths.conf_dir),
            ("paths.root_dir", &self.paths.root_dir),
            ("paths.base_dir", &self.paths.base_dir),
            ("paths.main_conf", &self.paths.main_conf),
        ] {
            if !path.is_absolute() {
                return Err(Error::ConfigValidation(format!(
                    "{} must be an absolute path, got '{}'",
                    key,
                    path.display()
                )));
            }
        }

        if self.paths.conf_dir == self.paths.root_dir {
            return Err(Error::ConfigValidation(
                "paths.conf_dir and paths.root_dir must differ".into(),
            ));
        }

        if self.fetch.archive.is_empty() {
            return Err(Error::ConfigValidation("fetch.archive must not be empty".into()));
        }

        // Building the plan checks subnet, gateway, bridge and prefix
        AddressPlan::from_config(&self.network)?;

        Ok(())
    }

    /// Address plan for this host
    pub fn address_plan(&self) -> Result<AddressPlan> {
        AddressPlan::from_config(&self.network)
    }
}

/// How a jail root directory is named under `root_dir`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RootLayout {
    /// `{root_dir}/{name}`
    #[default]
    Name,
    /// `{root_dir}/{slot}-{name}`
    SlotName,
}

/// Filesystem layout
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathsConfig {
    /// Directory of per-jail fragments included by the main jail.conf
    #[serde(default = "default_conf_dir")]
    pub conf_dir: PathBuf,

    /// Directory holding jail root filesystems
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// Directory holding base archives as `{version}/base.txz`
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// Main jail.conf that must include `conf_dir`
    #[serde(default = "default_main_conf")]
    pub main_conf: PathBuf,

    /// Custom jail.conf template (built-in template if unset)
    pub template: Option<PathBuf>,

    /// Naming scheme for jail roots
    #[serde(default)]
    pub root_layout: RootLayout,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            conf_dir: default_conf_dir(),
            root_dir: default_root_dir(),
            base_dir: default_base_dir(),
            main_conf: default_main_conf(),
            template: None,
            root_layout: RootLayout::default(),
        }
    }
}

fn default_conf_dir() -> PathBuf {
    PathBuf::from("/etc/jail.conf.d")
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("/var/jails")
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("/var/db/jailconf/base")
}

fn default_main_conf() -> PathBuf {
    PathBuf::from("/etc/jail.conf")
}

/// Address plan for VNET jails
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkConfig {
    /// Subnet jails are numbered into (e.g., "192.168.2.0/24")
    #[serde(default = "default_subnet")]
    pub subnet: String,

    /// Added to the slot to get the host part of the address
    #[serde(default = "default_offset")]
    pub offset: u32,

    /// Default route for jails (first usable address if unset)
    pub gateway: Option<Ipv4Addr>,

    /// Host bridge the epair `a` side joins
    #[serde(default = "default_bridge")]
    pub bridge: String,

    /// Epair name prefix; the slot is appended
    #[serde(default = "default_interface_prefix")]
    pub interface_prefix: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            subnet: default_subnet(),
            offset: default_offset(),
            gateway: None,
            bridge: default_bridge(),
            interface_prefix: default_interface_prefix(),
        }
    }
}

fn default_subnet() -> String {
    "192.168.2.0/24".into()
}

fn default_offset() -> u32 {
    10
}

fn default_bridge() -> String {
    "bridge0".into()
}

fn default_interface_prefix() -> String {
    "epair".into()
}

/// Base archive downloads
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetchConfig {
    /// FreeBSD mirror URL
    #[serde(default = "default_mirror_url")]
    pub mirror_url: String,

    /// Distribution set extracted into new jails
    #[serde(default = "default_archive")]
    pub archive: String,

    /// Retry/backoff configuration for HTTP operations
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            mirror_url: default_mirror_url(),
            archive: default_archive(),
            retry: RetryConfig::default(),
        }
    }
}

fn default_mirror_url() -> String {
    "https://download.freebsd.org/releases".into()
}

fn default_archive() -> String {
    "base".into()
}

// Retry configuration defaults
fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_attempts() -> u8 {
    5
}

fn default_jitter_factor() -> f64 {
    0.25
}

/// Retry/backoff configuration for HTTP operations
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Base delay in milliseconds before first retry
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds between retries
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Maximum number of retry attempts
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u8,

    /// Jitter factor (0.0-1.0) to randomize delays
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            max_attempts: default_max_attempts(),
            jitter_factor: default_jitter_factor(),
        }
    }
}
