//! Gateway-level read queries.

use crate::error::AnalyzerError;
use crate::query::TimeRange;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Row};

/// Gateways with fewer packets than this in the window are hidden from
/// the list.
pub const MIN_VISIBLE_PACKETS: i64 = 10;

#[derive(Debug, Clone, Serialize)]
pub struct GatewayListEntry {
    pub gateway_id: String,
    pub name: Option<String>,
    pub alias: Option<String>,
    pub group_name: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub packet_count: i64,
    pub airtime_us: i64,
    pub unique_devices: i64,
}

/// Gateway list with windowed activity.
///
/// Packet and airtime counts come from the hourly aggregate; distinct
/// device counts are recomputed from raw packets because `unique_devices`
/// is not summable across hours.
pub async fn gateway_list(
    pool: &PgPool,
    range: TimeRange,
) -> Result<Vec<GatewayListEntry>, AnalyzerError> {
    let rows = sqlx::query(
        r#"SELECT g.gateway_id, g.name, g.alias, g.group_name,
                  g.first_seen, g.last_seen, g.latitude, g.longitude,
                  COALESCE(h.packet_count, 0) AS packet_count,
                  COALESCE(h.airtime_us, 0) AS airtime_us,
                  COALESCE(d.unique_devices, 0) AS unique_devices
           FROM gateways g
           LEFT JOIN (
               SELECT gateway_id,
                      SUM(packet_count)::BIGINT AS packet_count,
                      SUM(airtime_us)::BIGINT AS airtime_us
               FROM packets_hourly
               WHERE bucket >= $1 AND bucket < $2
               GROUP BY gateway_id
           ) h USING (gateway_id)
           LEFT JOIN (
               SELECT gateway_id,
                      COUNT(DISTINCT dev_addr)::BIGINT AS unique_devices
               FROM packets
               WHERE timestamp >= $1 AND timestamp < $2 AND dev_addr IS NOT NULL
               GROUP BY gateway_id
           ) d USING (gateway_id)
           WHERE COALESCE(h.packet_count, 0) >= $3
           ORDER BY packet_count DESC"#,
    )
    .bind(range.start)
    .bind(range.end)
    .bind(MIN_VISIBLE_PACKETS)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(GatewayListEntry {
                gateway_id: row.try_get("gateway_id")?,
                name: row.try_get("name")?,
                alias: row.try_get("alias")?,
                group_name: row.try_get("group_name")?,
                first_seen: row.try_get("first_seen")?,
                last_seen: row.try_get("last_seen")?,
                latitude: row.try_get("latitude")?,
                longitude: row.try_get("longitude")?,
                packet_count: row.try_get("packet_count")?,
                airtime_us: row.try_get("airtime_us")?,
                unique_devices: row.try_get("unique_devices")?,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceNode {
    pub dev_addr: String,
    pub packet_count: i64,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OperatorNode {
    pub operator: String,
    pub packet_count: i64,
    pub airtime_us: i64,
    pub devices: Vec<DeviceNode>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayTree {
    pub gateway_id: String,
    pub operators: Vec<OperatorNode>,
}

/// Per-gateway tree: operators with their windowed totals and the
/// devices heard under each.
pub async fn gateway_tree(
    pool: &PgPool,
    gateway_id: &str,
    range: TimeRange,
) -> Result<GatewayTree, AnalyzerError> {
    let operator_rows = sqlx::query(
        r#"SELECT operator,
                  COUNT(*)::BIGINT AS packet_count,
                  COALESCE(SUM(airtime_us), 0)::BIGINT AS airtime_us
           FROM packets
           WHERE gateway_id = $1 AND timestamp >= $2 AND timestamp < $3
           GROUP BY operator
           ORDER BY packet_count DESC"#,
    )
    .bind(gateway_id)
    .bind(range.start)
    .bind(range.end)
    .fetch_all(pool)
    .await?;

    let device_rows = sqlx::query(
        r#"SELECT operator, dev_addr,
                  COUNT(*)::BIGINT AS packet_count,
                  MAX(timestamp) AS last_seen
           FROM packets
           WHERE gateway_id = $1 AND timestamp >= $2 AND timestamp < $3
                 AND dev_addr IS NOT NULL
           GROUP BY operator, dev_addr
           ORDER BY packet_count DESC"#,
    )
    .bind(gateway_id)
    .bind(range.start)
    .bind(range.end)
    .fetch_all(pool)
    .await?;

    let mut operators = Vec::with_capacity(operator_rows.len());
    for row in &operator_rows {
        let operator: String = row.try_get("operator")?;
        let mut devices = Vec::new();
        for device_row in &device_rows {
            let device_operator: String = device_row.try_get("operator")?;
            if device_operator == operator {
                devices.push(DeviceNode {
                    dev_addr: device_row.try_get("dev_addr")?,
                    packet_count: device_row.try_get("packet_count")?,
                    last_seen: device_row.try_get("last_seen")?,
                });
            }
        }
        operators.push(OperatorNode {
            operator,
            packet_count: row.try_get("packet_count")?,
            airtime_us: row.try_get("airtime_us")?,
            devices,
        });
    }

    Ok(GatewayTree {
        gateway_id: gateway_id.to_string(),
        operators,
    })
}
