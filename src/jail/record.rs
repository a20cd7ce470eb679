//! Jail records and the filesystem layout they live in
//!
//! A record is rebuilt on every invocation from a name and a slot; the
//! network identity and both paths are derived, never stored.

use crate::error::{Error, Result};
use crate::manifest::{JailconfConfig, RootLayout};
use crate::network::{AddressPlan, NetworkIdentity};
use crate::slot::{ConfDir, ConfName};
use crate::template::{RenderContext, is_identifier};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Template fields every record provides
pub const BUILTIN_FIELDS: &[&str] = &[
    "name",
    "slot",
    "interface",
    "host_iface",
    "jail_iface",
    "ip_addr",
    "ip_cidr",
    "prefix_len",
    "gateway",
    "bridge",
    "root",
    "version",
];

/// Check a jail name
///
/// jail(8) treats dots as hierarchy separators, so they are rejected along
/// with anything outside `[A-Za-z0-9_-]`.
pub fn validate_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| Error::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("name must not be empty"));
    }
    if name.starts_with('-') {
        return Err(invalid("name must not start with '-'"));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(invalid(&format!("character '{}' is not allowed", c)));
    }
    Ok(())
}

/// Check extra template fields supplied by the user
pub fn validate_extra(name: &str, extra: &BTreeMap<String, String>) -> Result<()> {
    for key in extra.keys() {
        if !is_identifier(key) {
            return Err(Error::Validation(format!(
                "jail '{}': field name '{}' is not an identifier",
                name, key
            )));
        }
        if BUILTIN_FIELDS.contains(&key.as_str()) {
            return Err(Error::Validation(format!(
                "jail '{}': field '{}' is derived and cannot be overridden",
                name, key
            )));
        }
    }
    Ok(())
}

/// One jail as seen by this invocation
#[derive(Debug, Clone, Serialize)]
pub struct JailRecord {
    pub name: String,
    pub slot: u32,
    pub identity: NetworkIdentity,
    /// Base system version; unknown when rebuilt from a filename
    pub version: Option<String>,
    pub extra: BTreeMap<String, String>,
    pub conf_path: PathBuf,
    pub root_path: PathBuf,
}

impl JailRecord {
    /// Template fields for this record
    pub fn context(&self) -> RenderContext {
        let id = &self.identity;
        let mut ctx = RenderContext::new(&self.name);

        for (key, value) in &self.extra {
            ctx.insert(key, value);
        }

        ctx.insert("name", &self.name);
        ctx.insert("slot", self.slot.to_string());
        ctx.insert("interface", id.epair.base());
        ctx.insert("host_iface", id.epair.host_side());
        ctx.insert("jail_iface", id.epair.jail_side());
        ctx.insert("ip_addr", id.ip_addr.to_string());
        ctx.insert("ip_cidr", id.ip_cidr());
        ctx.insert("prefix_len", id.prefix_len.to_string());
        ctx.insert("gateway", id.gateway.to_string());
        ctx.insert("bridge", &id.bridge);
        ctx.insert("root", self.root_path.display().to_string());
        if let Some(version) = &self.version {
            ctx.insert("version", version);
        }

        ctx
    }
}

/// Where jails live on this host and how they are addressed
#[derive(Debug, Clone)]
pub struct JailLayout {
    conf_dir: ConfDir,
    root_dir: PathBuf,
    root_layout: RootLayout,
    plan: AddressPlan,
}

impl JailLayout {
    pub fn new(
        conf_dir: impl Into<PathBuf>,
        root_dir: impl Into<PathBuf>,
        root_layout: RootLayout,
        plan: AddressPlan,
    ) -> Self {
        Self {
            conf_dir: ConfDir::new(conf_dir),
            root_dir: root_dir.into(),
            root_layout,
            plan,
        }
    }

    pub fn from_config(config: &JailconfConfig) -> Result<Self> {
        Ok(Self::new(
            config.paths.conf_dir.clone(),
            config.paths.root_dir.clone(),
            config.paths.root_layout,
            config.address_plan()?,
        ))
    }

    pub fn conf_dir(&self) -> &ConfDir {
        &self.conf_dir
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn plan(&self) -> &AddressPlan {
        &self.plan
    }

    /// Root directory for a jail
    pub fn root_path(&self, slot: u32, name: &str) -> PathBuf {
        match self.root_layout {
            RootLayout::Name => self.root_dir.join(name),
            RootLayout::SlotName => self.root_dir.join(format!("{}-{}", slot, name)),
        }
    }

    /// Build a record, deriving its network identity and paths
    pub fn record(
        &self,
        name: &str,
        slot: u32,
        version: Option<String>,
        extra: BTreeMap<String, String>,
    ) -> Result<JailRecord> {
        validate_name(name)?;
        validate_extra(name, &extra)?;
        if let Some(v) = &version
            && v.trim().is_empty()
        {
            return Err(Error::Validation(format!(
                "jail '{}': version must not be empty",
                name
            )));
        }

        let identity = self.plan.derive(slot)?;

        Ok(JailRecord {
            name: name.to_string(),
            slot,
            identity,
            version,
            extra,
            conf_path: self.conf_dir.path().join(ConfName::filename(slot, name)),
            root_path: self.root_path(slot, name),
        })
    }
}
