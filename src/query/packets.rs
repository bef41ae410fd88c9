//! Recent-packet listing and join activity.

use crate::error::AnalyzerError;
use crate::model::PacketType;
use crate::query::{push_hide_rules, TimeRange};
use crate::store::HideRule;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

pub const DEFAULT_LIMIT: i64 = 100;
pub const MAX_LIMIT: i64 = 1000;

/// Parameter bag for the recent-packets listing. Unknown combinations
/// degrade to the bare `WHERE 1=1` scan.
#[derive(Debug, Clone, Default)]
pub struct RecentPacketsParams {
    pub gateway_id: Option<String>,
    pub gateway_ids: Option<Vec<String>>,
    pub packet_types: Option<Vec<PacketType>>,
    pub operator: Option<String>,
    pub dev_addr: Option<String>,
    pub dev_eui: Option<String>,
    pub join_eui: Option<String>,
    pub rssi_min: Option<i32>,
    pub rssi_max: Option<i32>,
    pub search: Option<String>,
    pub range: Option<TimeRange>,
    pub before: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PacketRow {
    pub timestamp: DateTime<Utc>,
    pub gateway_id: String,
    pub border_gateway_id: Option<String>,
    pub packet_type: String,
    pub dev_addr: Option<String>,
    pub join_eui: Option<String>,
    pub dev_eui: Option<String>,
    pub operator: String,
    pub frequency: i64,
    pub spreading_factor: Option<i16>,
    pub bandwidth: i32,
    pub rssi: i32,
    pub snr: f32,
    pub payload_size: i32,
    pub airtime_us: i64,
    pub f_cnt: Option<i64>,
    pub f_port: Option<i16>,
    pub confirmed: Option<bool>,
    pub session_id: Option<String>,
}

pub(crate) fn build_recent_packets_query<'a>(
    params: &'a RecentPacketsParams,
    hide_rules: &'a [HideRule],
) -> QueryBuilder<'a, Postgres> {
    let mut builder: QueryBuilder<'a, Postgres> = QueryBuilder::new(
        "SELECT timestamp, gateway_id, border_gateway_id, packet_type, \
         dev_addr, join_eui, dev_eui, operator, frequency, spreading_factor, \
         bandwidth, rssi, snr, payload_size, airtime_us, f_cnt, f_port, \
         confirmed, session_id FROM packets WHERE 1=1",
    );

    if let Some(range) = &params.range {
        builder.push(" AND timestamp >= ").push_bind(range.start);
        builder.push(" AND timestamp < ").push_bind(range.end);
    }
    if let Some(before) = &params.before {
        builder.push(" AND timestamp < ").push_bind(*before);
    }
    if let Some(gateway_id) = &params.gateway_id {
        builder.push(" AND gateway_id = ").push_bind(gateway_id);
    }
    if let Some(gateway_ids) = &params.gateway_ids {
        builder
            .push(" AND gateway_id = ANY(")
            .push_bind(gateway_ids)
            .push(")");
    }
    if let Some(packet_types) = &params.packet_types {
        let names: Vec<String> = packet_types
            .iter()
            .map(|t| t.as_str().to_string())
            .collect();
        builder
            .push(" AND packet_type = ANY(")
            .push_bind(names)
            .push(")");
    }
    if let Some(operator) = &params.operator {
        builder.push(" AND operator = ").push_bind(operator);
    }
    if let Some(dev_addr) = &params.dev_addr {
        builder.push(" AND dev_addr = ").push_bind(dev_addr);
    }
    if let Some(dev_eui) = &params.dev_eui {
        builder.push(" AND dev_eui = ").push_bind(dev_eui);
    }
    if let Some(join_eui) = &params.join_eui {
        builder.push(" AND join_eui = ").push_bind(join_eui);
    }
    if let Some(rssi_min) = params.rssi_min {
        builder
            .push(" AND (packet_type NOT IN ('data', 'join_request') OR rssi >= ")
            .push_bind(rssi_min)
            .push(")");
    }
    if let Some(rssi_max) = params.rssi_max {
        builder
            .push(" AND (packet_type NOT IN ('data', 'join_request') OR rssi <= ")
            .push_bind(rssi_max)
            .push(")");
    }
    if let Some(search) = &params.search {
        let pattern = format!("%{}%", search);
        builder.push(" AND (gateway_id ILIKE ").push_bind(pattern.clone());
        builder.push(" OR operator ILIKE ").push_bind(pattern.clone());
        builder.push(" OR dev_addr ILIKE ").push_bind(pattern.clone());
        builder.push(" OR dev_eui ILIKE ").push_bind(pattern.clone());
        builder.push(" OR join_eui ILIKE ").push_bind(pattern);
        builder.push(")");
    }

    push_hide_rules(&mut builder, hide_rules);

    let limit = params
        .limit
        .unwrap_or(DEFAULT_LIMIT)
        .clamp(1, MAX_LIMIT);
    builder.push(" ORDER BY timestamp DESC LIMIT ").push_bind(limit);

    builder
}

/// Most recent packets matching the parameter bag, newest first.
pub async fn recent_packets(
    pool: &PgPool,
    params: &RecentPacketsParams,
    hide_rules: &[HideRule],
) -> Result<Vec<PacketRow>, AnalyzerError> {
    let mut builder = build_recent_packets_query(params, hide_rules);
    let rows = builder
        .build_query_as::<PacketRow>()
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

#[derive(Debug, Clone, Serialize)]
pub struct JoinActivityEntry {
    pub join_eui: String,
    pub operator: Option<String>,
    pub join_count: i64,
    pub device_count: i64,
    pub last_seen: DateTime<Utc>,
}

/// Join-request activity grouped by JoinEUI.
pub async fn join_activity(
    pool: &PgPool,
    gateway_id: Option<&str>,
    range: TimeRange,
) -> Result<Vec<JoinActivityEntry>, AnalyzerError> {
    let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(
        "SELECT join_eui, MAX(operator) AS operator, \
         COUNT(*)::BIGINT AS join_count, \
         COUNT(DISTINCT dev_eui)::BIGINT AS device_count, \
         MAX(timestamp) AS last_seen \
         FROM packets \
         WHERE packet_type = 'join_request' AND join_eui IS NOT NULL \
         AND timestamp >= ",
    );
    builder.push_bind(range.start);
    builder.push(" AND timestamp < ");
    builder.push_bind(range.end);
    if let Some(gateway_id) = gateway_id {
        builder.push(" AND gateway_id = ").push_bind(gateway_id);
    }
    builder.push(" GROUP BY join_eui ORDER BY join_count DESC LIMIT 100");

    let rows = builder.build().fetch_all(pool).await?;
    rows.iter()
        .map(|row| {
            Ok(JoinActivityEntry {
                join_eui: row.try_get("join_eui")?,
                operator: row.try_get("operator")?,
                join_count: row.try_get("join_count")?,
                device_count: row.try_get("device_count")?,
                last_seen: row.try_get("last_seen")?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::HideRuleType;

    #[test]
    fn test_empty_params_fall_back_to_where_1_1() {
        let params = RecentPacketsParams::default();
        let builder = build_recent_packets_query(&params, &[]);
        let sql = builder.sql();
        assert!(sql.contains("WHERE 1=1 ORDER BY timestamp DESC LIMIT"));
    }

    #[test]
    fn test_all_predicates_present() {
        let params = RecentPacketsParams {
            gateway_id: Some("gw".to_string()),
            gateway_ids: Some(vec!["a".to_string(), "b".to_string()]),
            packet_types: Some(vec![PacketType::Data]),
            operator: Some("The Things Network".to_string()),
            dev_addr: Some("26011AAB".to_string()),
            dev_eui: Some("0004A30B001C0530".to_string()),
            join_eui: Some("70B3D57ED0000001".to_string()),
            rssi_min: Some(-120),
            rssi_max: Some(-30),
            search: Some("rooftop".to_string()),
            range: Some(TimeRange::last_hours(24)),
            before: None,
            limit: Some(50),
        };
        let builder = build_recent_packets_query(&params, &[]);
        let sql = builder.sql();
        for fragment in [
            "timestamp >=",
            "gateway_id =",
            "gateway_id = ANY(",
            "packet_type = ANY(",
            "operator =",
            "dev_addr =",
            "dev_eui =",
            "join_eui =",
            "rssi >=",
            "rssi <=",
            "gateway_id ILIKE",
            "ORDER BY timestamp DESC LIMIT",
        ] {
            assert!(sql.contains(fragment), "missing {:?} in {}", fragment, sql);
        }
    }

    #[test]
    fn test_limit_is_clamped() {
        let params = RecentPacketsParams {
            limit: Some(1_000_000),
            ..Default::default()
        };
        // The clamp happens before binding; the SQL text stays stable.
        let builder = build_recent_packets_query(&params, &[]);
        assert!(builder.sql().ends_with("LIMIT $1"));
    }

    #[test]
    fn test_hide_rules_reach_the_query() {
        let rules = vec![HideRule {
            rule_type: HideRuleType::JoinEui,
            prefix: "70B3D5".to_string(),
            description: None,
        }];
        let params = RecentPacketsParams::default();
        let builder = build_recent_packets_query(&params, &rules);
        assert!(builder.sql().contains("join_eui NOT ILIKE"));
    }
}
