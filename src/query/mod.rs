//! Read layer: every query is a pure function of `(pool, parameters)`.
//!
//! "No rows" is an empty result; only connectivity errors surface to the
//! caller. All SQL is parameterized; the parameter-bag queries build on
//! `sqlx::QueryBuilder`.

pub mod chirpstack;
pub mod devices;
pub mod gateways;
pub mod packets;
pub mod timeseries;

use crate::operators::parse_dev_addr_prefix;
use crate::store::{HideRule, HideRuleType};
use chrono::{DateTime, Duration, Utc};
use sqlx::{Postgres, QueryBuilder};

/// Inclusive-start, exclusive-end query window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn last_hours(hours: i64) -> Self {
        let end = Utc::now();
        Self {
            start: end - Duration::hours(hours),
            end,
        }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn duration_us(&self) -> i64 {
        self.duration().num_microseconds().unwrap_or(i64::MAX)
    }
}

/// Append hide-rule predicates to a packet query.
///
/// DevAddr rules in "prefix/bits" form use `dev_addr_uint32` mask
/// arithmetic; plain prefixes fall back to a text prefix match, as do
/// JoinEUI rules.
pub(crate) fn push_hide_rules(builder: &mut QueryBuilder<'_, Postgres>, rules: &[HideRule]) {
    for rule in rules {
        match rule.rule_type {
            HideRuleType::DevAddr => {
                if rule.prefix.contains('/') {
                    if let Ok((prefix, bits)) = parse_dev_addr_prefix(&rule.prefix) {
                        let mask: u32 = match bits {
                            0 => 0,
                            b if b >= 32 => u32::MAX,
                            b => u32::MAX << (32 - b),
                        };
                        builder
                            .push(" AND NOT (dev_addr IS NOT NULL AND (dev_addr_uint32(dev_addr) & ")
                            .push_bind(mask as i64)
                            .push(") = ")
                            .push_bind(prefix as i64)
                            .push(")");
                    }
                } else {
                    builder
                        .push(" AND (dev_addr IS NULL OR dev_addr NOT ILIKE ")
                        .push_bind(format!("{}%", rule.prefix))
                        .push(")");
                }
            }
            HideRuleType::JoinEui => {
                builder
                    .push(" AND (join_eui IS NULL OR join_eui NOT ILIKE ")
                    .push_bind(format!("{}%", rule.prefix))
                    .push(")");
            }
        }
    }
}
