//! Epair naming for VNET jails
//!
//! Epairs are virtual Ethernet pairs used to connect VNET jails to bridges.
//! One end stays on the host (and is added to a bridge), the other is moved
//! into the jail. Names are derived from the jail slot so the rendered
//! jail.conf can create and destroy the pair itself.

use crate::error::{Error, Result};
use serde::Serialize;

/// Interface names are limited to IFNAMSIZ - 1 bytes on FreeBSD
const MAX_IFNAME_LEN: usize = 15;

/// An epair interface pair named after a slot (`epair3a` / `epair3b`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EpairName {
    /// Pair name without side suffix (e.g., "epair3")
    base: String,
}

impl EpairName {
    /// Name the pair for a slot
    pub fn for_slot(prefix: &str, slot: u32) -> Result<Self> {
        let base = format!("{}{}", prefix, slot);
        // Room for the a/b suffix
        if base.len() + 1 > MAX_IFNAME_LEN {
            return Err(Error::InvalidSlot {
                slot,
                reason: format!(
                    "interface name '{}b' exceeds {} characters",
                    base, MAX_IFNAME_LEN
                ),
            });
        }
        Ok(Self { base })
    }

    /// Check that a prefix can start an interface name
    pub fn validate_prefix(prefix: &str) -> Result<()> {
        let valid = prefix
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic())
            && prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !prefix.ends_with(|c: char| c.is_ascii_digit());

        if !valid {
            return Err(Error::ConfigValidation(format!(
                "Invalid interface prefix '{}': use letters, digits and '_' and do not end in a digit",
                prefix
            )));
        }
        Ok(())
    }

    /// Pair name without side suffix
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Host-side interface name
    pub fn host_side(&self) -> String {
        format!("{}a", self.base)
    }

    /// Jail-side interface name
    pub fn jail_side(&self) -> String {
        format!("{}b", self.base)
    }
}
