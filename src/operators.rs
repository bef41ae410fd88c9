//! Operator resolution by DevAddr NetID prefix and JoinEUI prefix.
//!
//! The rule set merges a built-in table of well-known NetID allocations
//! with user-supplied custom prefixes (from config and the
//! `custom_operators` table). Matching is longest-prefix within priority;
//! reloads swap the whole snapshot atomically so in-flight matches keep
//! the previous rules.

use crate::error::AnalyzerError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const UNKNOWN_OPERATOR: &str = "Unknown";
pub const PRIVATE_OPERATOR: &str = "Private";

/// Default priority for custom rules; built-ins sit at 0.
pub const CUSTOM_RULE_PRIORITY: i32 = 100;

/// A single DevAddr prefix rule. `mask` is a contiguous high-bit mask of
/// `bits` bits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorRule {
    pub prefix: u32,
    pub mask: u32,
    pub bits: u8,
    pub name: String,
    pub priority: i32,
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinEuiRule {
    pub prefix: u64,
    pub mask: u64,
    pub bits: u8,
    pub name: String,
}

/// Custom operator entry as supplied by config or the database. Entries
/// without prefixes are color-only: they attach a color to rules that
/// share their name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomOperator {
    pub prefixes: Vec<String>,
    pub name: String,
    pub priority: Option<i32>,
    pub color: Option<String>,
    /// Informational device count shown by dashboards; not used in
    /// matching.
    pub known_devices: Option<i64>,
}

fn mask_for_bits_u32(bits: u8) -> u32 {
    match bits {
        0 => 0,
        b if b >= 32 => u32::MAX,
        b => u32::MAX << (32 - b),
    }
}

fn mask_for_bits_u64(bits: u8) -> u64 {
    match bits {
        0 => 0,
        b if b >= 64 => u64::MAX,
        b => u64::MAX << (64 - b),
    }
}

/// Parse "26000000/7" into a DevAddr rule prefix. The prefix part is
/// big-endian hex, at most 8 digits.
pub fn parse_dev_addr_prefix(s: &str) -> Result<(u32, u8), AnalyzerError> {
    let (hex_part, bits_part) = s
        .split_once('/')
        .ok_or_else(|| AnalyzerError::Config(format!("prefix missing /bits: {}", s)))?;
    let bits: u8 = bits_part
        .parse()
        .map_err(|_| AnalyzerError::Config(format!("invalid prefix bits: {}", s)))?;
    if bits > 32 || hex_part.len() > 8 {
        return Err(AnalyzerError::Config(format!("invalid DevAddr prefix: {}", s)));
    }
    let padded = format!("{:0<8}", hex_part);
    let prefix = u32::from_str_radix(&padded, 16)
        .map_err(|_| AnalyzerError::Config(format!("invalid prefix hex: {}", s)))?;
    Ok((prefix & mask_for_bits_u32(bits), bits))
}

fn parse_join_eui_prefix(s: &str) -> Result<(u64, u8), AnalyzerError> {
    let (hex_part, bits_part) = s
        .split_once('/')
        .ok_or_else(|| AnalyzerError::Config(format!("prefix missing /bits: {}", s)))?;
    let bits: u8 = bits_part
        .parse()
        .map_err(|_| AnalyzerError::Config(format!("invalid prefix bits: {}", s)))?;
    if bits > 64 || hex_part.len() > 16 {
        return Err(AnalyzerError::Config(format!("invalid JoinEUI prefix: {}", s)));
    }
    let padded = format!("{:0<16}", hex_part);
    let prefix = u64::from_str_radix(&padded, 16)
        .map_err(|_| AnalyzerError::Config(format!("invalid prefix hex: {}", s)))?;
    Ok((prefix & mask_for_bits_u64(bits), bits))
}

/// Well-known NetID allocations rendered as DevAddr prefixes.
const BUILTIN_NETID_TABLE: &[(&str, &str)] = &[
    ("00000000/7", "Experimental"),
    ("02000000/7", "Experimental"),
    ("04000000/7", "Actility"),
    ("08000000/7", "Swisscom"),
    ("0E000000/7", "Senet"),
    ("10000000/7", "Everynet"),
    ("12000000/7", "Loriot"),
    ("1E000000/7", "Orange"),
    ("26000000/7", "The Things Network"),
    ("54000000/7", "KPN"),
    ("78000000/7", "Helium"),
];

/// JoinEUI blocks of known join servers / manufacturers.
const BUILTIN_JOIN_EUI_TABLE: &[(&str, &str)] = &[
    ("70B3D57ED0000000/40", "The Things Network"),
    ("6081F90000000000/24", "Helium"),
    ("6081F80000000000/24", "Helium"),
];

/// Immutable rule snapshot. Rules are pre-sorted by descending priority,
/// then descending prefix length; ties keep insertion order.
#[derive(Debug, Default)]
pub struct RuleSet {
    dev_addr_rules: Vec<OperatorRule>,
    join_eui_rules: Vec<JoinEuiRule>,
}

impl RuleSet {
    pub fn build(custom: &[CustomOperator]) -> Result<Self, AnalyzerError> {
        let mut dev_addr_rules = Vec::new();

        for (prefix, name) in BUILTIN_NETID_TABLE {
            let (prefix, bits) = parse_dev_addr_prefix(prefix)?;
            dev_addr_rules.push(OperatorRule {
                prefix,
                mask: mask_for_bits_u32(bits),
                bits,
                name: name.to_string(),
                priority: 0,
                color: None,
            });
        }

        for entry in custom {
            for prefix_str in &entry.prefixes {
                let (prefix, bits) = parse_dev_addr_prefix(prefix_str)?;
                dev_addr_rules.push(OperatorRule {
                    prefix,
                    mask: mask_for_bits_u32(bits),
                    bits,
                    name: entry.name.clone(),
                    priority: entry.priority.unwrap_or(CUSTOM_RULE_PRIORITY),
                    color: entry.color.clone(),
                });
            }
        }

        // Color-only entries decorate existing rules of the same name.
        for entry in custom.iter().filter(|e| e.prefixes.is_empty()) {
            if let Some(color) = &entry.color {
                for rule in dev_addr_rules.iter_mut().filter(|r| r.name == entry.name) {
                    rule.color = Some(color.clone());
                }
            }
        }

        // More specific first within equal priority; stable sort keeps
        // insertion order on full ties.
        dev_addr_rules.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| b.bits.cmp(&a.bits))
        });

        let mut join_eui_rules = Vec::new();
        for (prefix, name) in BUILTIN_JOIN_EUI_TABLE {
            let (prefix, bits) = parse_join_eui_prefix(prefix)?;
            join_eui_rules.push(JoinEuiRule {
                prefix,
                mask: mask_for_bits_u64(bits),
                bits,
                name: name.to_string(),
            });
        }
        join_eui_rules.sort_by(|a, b| b.bits.cmp(&a.bits));

        Ok(Self {
            dev_addr_rules,
            join_eui_rules,
        })
    }

    pub fn match_dev_addr(&self, dev_addr: &str) -> String {
        let addr = match u32::from_str_radix(dev_addr, 16) {
            Ok(v) => v,
            Err(_) => return UNKNOWN_OPERATOR.to_string(),
        };
        self.dev_addr_rules
            .iter()
            .find(|r| addr & r.mask == r.prefix)
            .map(|r| r.name.clone())
            .unwrap_or_else(|| UNKNOWN_OPERATOR.to_string())
    }

    pub fn match_join_eui(&self, join_eui: &str) -> String {
        let eui = match u64::from_str_radix(join_eui, 16) {
            Ok(v) => v,
            Err(_) => return UNKNOWN_OPERATOR.to_string(),
        };
        if let Some(rule) = self.join_eui_rules.iter().find(|r| eui & r.mask == r.prefix) {
            return rule.name.clone();
        }
        if eui
            .to_be_bytes()
            .iter()
            .all(|b| (0x20..=0x7E).contains(b))
        {
            return PRIVATE_OPERATOR.to_string();
        }
        UNKNOWN_OPERATOR.to_string()
    }

    pub fn dev_addr_rules(&self) -> &[OperatorRule] {
        &self.dev_addr_rules
    }
}

/// Shared matcher handle. Reads clone the current `Arc` snapshot; reload
/// replaces it in one store.
pub struct OperatorMatcher {
    rules: RwLock<Arc<RuleSet>>,
}

impl OperatorMatcher {
    pub fn new(custom: &[CustomOperator]) -> Result<Self, AnalyzerError> {
        Ok(Self {
            rules: RwLock::new(Arc::new(RuleSet::build(custom)?)),
        })
    }

    pub fn snapshot(&self) -> Arc<RuleSet> {
        self.rules.read().clone()
    }

    pub fn reload(&self, custom: &[CustomOperator]) -> Result<(), AnalyzerError> {
        let next = Arc::new(RuleSet::build(custom)?);
        *self.rules.write() = next;
        Ok(())
    }

    pub fn match_dev_addr(&self, dev_addr: &str) -> String {
        self.snapshot().match_dev_addr(dev_addr)
    }

    pub fn match_join_eui(&self, join_eui: &str) -> String {
        self.snapshot().match_join_eui(join_eui)
    }
}
