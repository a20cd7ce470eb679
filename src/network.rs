//! Network identity for VNET jails
//!
//! Provides:
//! - Address plan (subnet, slot offset, gateway, bridge)
//! - Slot to IPv4 address derivation
//! - Epair interface naming per slot

pub mod epair;

pub use epair::EpairName;

use crate::error::{Error, Result};
use crate::manifest::NetworkConfig;
use ipnet::Ipv4Net;
use serde::Serialize;
use std::net::Ipv4Addr;

/// Everything network-related a jail derives from its slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkIdentity {
    /// Slot the identity was derived from
    pub slot: u32,
    /// Jail address
    pub ip_addr: Ipv4Addr,
    /// Subnet prefix length
    pub prefix_len: u8,
    /// Default route inside the jail
    pub gateway: Ipv4Addr,
    /// Interface pair connecting the jail to the bridge
    pub epair: EpairName,
    /// Host bridge the `a` side joins
    pub bridge: String,
}

impl NetworkIdentity {
    /// Address with prefix length, e.g. `192.168.2.11/24`
    pub fn ip_cidr(&self) -> String {
        format!("{}/{}", self.ip_addr, self.prefix_len)
    }
}

/// Maps slots onto addresses and interface names
#[derive(Debug, Clone)]
pub struct AddressPlan {
    subnet: Ipv4Net,
    offset: u32,
    gateway: Ipv4Addr,
    bridge: String,
    interface_prefix: String,
}

impl AddressPlan {
    /// Create an address plan
    ///
    /// The gateway defaults to the first usable address of the subnet.
    pub fn new(
        subnet: Ipv4Net,
        offset: u32,
        gateway: Option<Ipv4Addr>,
        bridge: impl Into<String>,
        interface_prefix: impl Into<String>,
    ) -> Result<Self> {
        let subnet = subnet.trunc();
        if subnet.prefix_len() > 30 {
            return Err(Error::ConfigValidation(format!(
                "Subnet {} is too small for jail addresses",
                subnet
            )));
        }

        let gateway = match gateway {
            Some(gw) => gw,
            None => subnet
                .hosts()
                .next()
                .ok_or_else(|| Error::ConfigValidation(format!("Subnet {} has no hosts", subnet)))?,
        };
        if !subnet.contains(&gateway)
            || gateway == subnet.network()
            || gateway == subnet.broadcast()
        {
            return Err(Error::ConfigValidation(format!(
                "Gateway {} is not a usable address in subnet {}",
                gateway, subnet
            )));
        }

        let interface_prefix = interface_prefix.into();
        EpairName::validate_prefix(&interface_prefix)?;

        let bridge = bridge.into();
        if bridge.is_empty() {
            return Err(Error::ConfigValidation("Bridge name must not be empty".into()));
        }

        Ok(Self {
            subnet,
            offset,
            gateway,
            bridge,
            interface_prefix,
        })
    }

    /// Build the plan from the `[network]` config section
    pub fn from_config(config: &NetworkConfig) -> Result<Self> {
        let subnet: Ipv4Net = config.subnet.parse().map_err(|e| {
            Error::ConfigValidation(format!("Invalid subnet '{}': {}", config.subnet, e))
        })?;
        Self::new(
            subnet,
            config.offset,
            config.gateway,
            config.bridge.clone(),
            config.interface_prefix.clone(),
        )
    }

    /// Number of usable host addresses in the subnet
    fn host_capacity(&self) -> u32 {
        let host_bits = 32 - u32::from(self.subnet.prefix_len());
        let hosts = (1u64 << host_bits) - 2;
        u32::try_from(hosts).unwrap_or(u32::MAX)
    }

    /// Highest slot whose address still fits in the subnet
    pub fn max_slot(&self) -> u32 {
        self.host_capacity().saturating_sub(self.offset)
    }

    /// Slot whose address would be the gateway, if the gateway sits in the jail range
    ///
    /// Allocation skips this slot; declaring it explicitly is an invalid slot.
    pub fn gateway_slot(&self) -> Option<u32> {
        let host = u32::from(self.gateway) - u32::from(self.subnet.network());
        let slot = host.checked_sub(self.offset)?;
        (slot >= 1 && slot <= self.max_slot()).then_some(slot)
    }

    /// Derive the network identity for a slot
    ///
    /// Distinct slots always produce distinct addresses and interface names.
    pub fn derive(&self, slot: u32) -> Result<NetworkIdentity> {
        if slot == 0 {
            return Err(Error::InvalidSlot {
                slot,
                reason: "slots start at 1".into(),
            });
        }

        if slot > self.max_slot() {
            return Err(Error::InvalidSlot {
                slot,
                reason: format!(
                    "highest slot for {} with offset {} is {}",
                    self.subnet,
                    self.offset,
                    self.max_slot()
                ),
            });
        }
        if self.gateway_slot() == Some(slot) {
            return Err(Error::InvalidSlot {
                slot,
                reason: format!("address {} is the gateway", self.gateway),
            });
        }

        let ip_addr = Ipv4Addr::from(u32::from(self.subnet.network()) + slot + self.offset);

        let epair = EpairName::for_slot(&self.interface_prefix, slot)?;

        Ok(NetworkIdentity {
            slot,
            ip_addr,
            prefix_len: self.subnet.prefix_len(),
            gateway: self.gateway,
            epair,
            bridge: self.bridge.clone(),
        })
    }
}
