//! Live-feed subscriber filters.
//!
//! Each subscriber carries one compiled [`Filter`]; every parsed packet
//! is evaluated against every subscriber, and failing any predicate
//! drops the packet for that subscriber only.

use crate::model::PacketType;
use crate::operators::parse_dev_addr_prefix;
use serde::{Deserialize, Serialize};

/// Which pipeline a subscriber listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    #[default]
    Gateway,
    Chirpstack,
}

/// Device-ownership filter mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ownership {
    Owned,
    Foreign,
}

/// A parsed DevAddr prefix, e.g. "26000000/7".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DevAddrPrefix {
    pub prefix: u32,
    pub mask: u32,
}

impl DevAddrPrefix {
    pub fn parse(s: &str) -> Option<Self> {
        let (prefix, bits) = parse_dev_addr_prefix(s).ok()?;
        let mask = match bits {
            0 => 0,
            b if b >= 32 => u32::MAX,
            b => u32::MAX << (32 - b),
        };
        Some(Self { prefix, mask })
    }

    pub fn contains(&self, dev_addr: &str) -> bool {
        match u32::from_str_radix(dev_addr, 16) {
            Ok(addr) => addr & self.mask == self.prefix,
            Err(_) => false,
        }
    }
}

/// The fields a filter can see for one packet. Built by the broadcaster
/// from the packet plus its metadata caches.
#[derive(Debug, Clone)]
pub struct FilterTarget<'a> {
    pub gateway_id: &'a str,
    pub gateway_name: Option<&'a str>,
    pub gateway_alias: Option<&'a str>,
    pub gateway_group: Option<&'a str>,
    pub packet_type: PacketType,
    pub rssi: i32,
    pub dev_addr: Option<&'a str>,
    pub dev_eui: Option<&'a str>,
    pub join_eui: Option<&'a str>,
    pub operator: &'a str,
}

/// Compiled subscriber filter; `None` fields are pass-through.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub gateway_id: Option<String>,
    pub gateway_ids: Option<Vec<String>>,
    pub packet_types: Option<Vec<PacketType>>,
    pub rssi_min: Option<i32>,
    pub rssi_max: Option<i32>,
    pub ownership: Option<Ownership>,
    pub prefixes: Vec<DevAddrPrefix>,
    pub search: Option<String>,
    pub source: SourceMode,
}

impl Filter {
    pub fn matches(&self, target: &FilterTarget<'_>) -> bool {
        if let Some(gateway_id) = &self.gateway_id {
            if target.gateway_id != gateway_id {
                return false;
            }
        }

        if let Some(gateway_ids) = &self.gateway_ids {
            if !gateway_ids.iter().any(|id| id == target.gateway_id) {
                return false;
            }
        }

        if let Some(types) = &self.packet_types {
            if !types.contains(&target.packet_type) {
                return false;
            }
        }

        // RSSI bounds only make sense for received frames.
        if target.packet_type.is_uplink() {
            if let Some(min) = self.rssi_min {
                if target.rssi < min {
                    return false;
                }
            }
            if let Some(max) = self.rssi_max {
                if target.rssi > max {
                    return false;
                }
            }
        }

        if !self.matches_ownership(target) {
            return false;
        }

        if let Some(search) = &self.search {
            if !self.matches_search(target, search) {
                return false;
            }
        }

        true
    }

    /// Ownership applies to packets with a DevAddr; everything else
    /// passes through.
    fn matches_ownership(&self, target: &FilterTarget<'_>) -> bool {
        let mode = match self.ownership {
            Some(mode) => mode,
            None => return true,
        };
        let dev_addr = match target.dev_addr {
            Some(addr) => addr,
            None => return true,
        };
        let owned = self.prefixes.iter().any(|p| p.contains(dev_addr));
        match mode {
            Ownership::Owned => owned,
            Ownership::Foreign => !owned,
        }
    }

    /// Case-insensitive substring search over the whitelisted text
    /// fields.
    fn matches_search(&self, target: &FilterTarget<'_>, search: &str) -> bool {
        let needle = search.to_lowercase();
        let mut haystacks: Vec<&str> = vec![target.gateway_id, target.operator];
        haystacks.extend(target.gateway_name);
        haystacks.extend(target.gateway_alias);
        haystacks.extend(target.gateway_group);
        haystacks.extend(target.dev_addr);
        haystacks.extend(target.dev_eui);
        haystacks.extend(target.join_eui);
        haystacks
            .iter()
            .any(|hay| hay.to_lowercase().contains(&needle))
    }
}
