//! ChirpStack-scoped mirrors of the read layer, keyed on DevEUI.

use crate::error::AnalyzerError;
use crate::query::TimeRange;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Postgres, QueryBuilder};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CsDeviceRow {
    pub dev_eui: String,
    pub dev_addr: Option<String>,
    pub device_name: String,
    pub application_id: String,
    pub application_name: Option<String>,
    pub last_seen: DateTime<Utc>,
    pub packet_count: i64,
}

/// Devices seen on the application bus, most recently active first.
pub async fn cs_device_list(
    pool: &PgPool,
    application_id: Option<&str>,
    limit: i64,
) -> Result<Vec<CsDeviceRow>, AnalyzerError> {
    let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(
        "SELECT dev_eui, dev_addr, device_name, application_id, \
         application_name, last_seen, packet_count FROM cs_devices WHERE 1=1",
    );
    if let Some(application_id) = application_id {
        builder
            .push(" AND application_id = ")
            .push_bind(application_id);
    }
    builder
        .push(" ORDER BY last_seen DESC LIMIT ")
        .push_bind(limit.clamp(1, 1000));

    let rows = builder
        .build_query_as::<CsDeviceRow>()
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// One device's metadata row, or `None` when it was never seen.
pub async fn cs_device_profile(
    pool: &PgPool,
    dev_eui: &str,
) -> Result<Option<CsDeviceRow>, AnalyzerError> {
    let row = sqlx::query_as::<_, CsDeviceRow>(
        "SELECT dev_eui, dev_addr, device_name, application_id, \
         application_name, last_seen, packet_count \
         FROM cs_devices WHERE dev_eui = $1",
    )
    .bind(dev_eui)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CsPacketRow {
    pub timestamp: DateTime<Utc>,
    pub dev_eui: String,
    pub dev_addr: Option<String>,
    pub device_name: String,
    pub application_id: String,
    pub operator: String,
    pub packet_type: String,
    pub tx_status: Option<String>,
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
}

#[derive(Debug, Clone, Default)]
pub struct CsRecentParams {
    pub dev_eui: Option<String>,
    pub application_id: Option<String>,
    pub search: Option<String>,
    pub range: Option<TimeRange>,
    pub limit: Option<i64>,
}

pub(crate) fn build_cs_recent_query(params: &CsRecentParams) -> QueryBuilder<'_, Postgres> {
    let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(
        "SELECT timestamp, dev_eui, dev_addr, device_name, application_id, \
         operator, packet_type, tx_status, frequency, spreading_factor, \
         bandwidth, rssi, snr, payload_size, airtime_us, f_cnt, f_port, \
         confirmed FROM cs_packets WHERE 1=1",
    );

    if let Some(range) = &params.range {
        builder.push(" AND timestamp >= ").push_bind(range.start);
        builder.push(" AND timestamp < ").push_bind(range.end);
    }
    if let Some(dev_eui) = &params.dev_eui {
        builder.push(" AND dev_eui = ").push_bind(dev_eui);
    }
    if let Some(application_id) = &params.application_id {
        builder
            .push(" AND application_id = ")
            .push_bind(application_id);
    }
    if let Some(search) = &params.search {
        let pattern = format!("%{}%", search);
        builder.push(" AND (dev_eui ILIKE ").push_bind(pattern.clone());
        builder.push(" OR device_name ILIKE ").push_bind(pattern.clone());
        builder.push(" OR dev_addr ILIKE ").push_bind(pattern.clone());
        builder.push(" OR operator ILIKE ").push_bind(pattern);
        builder.push(")");
    }

    let limit = params.limit.unwrap_or(100).clamp(1, 1000);
    builder.push(" ORDER BY timestamp DESC LIMIT ").push_bind(limit);

    builder
}

/// Recent application-bus packets, newest first.
pub async fn cs_recent_packets(
    pool: &PgPool,
    params: &CsRecentParams,
) -> Result<Vec<CsPacketRow>, AnalyzerError> {
    let mut builder = build_cs_recent_query(params);
    let rows = builder
        .build_query_as::<CsPacketRow>()
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// A device's timeline on the application bus.
pub async fn cs_device_timeline(
    pool: &PgPool,
    dev_eui: &str,
    range: TimeRange,
    limit: i64,
) -> Result<Vec<CsPacketRow>, AnalyzerError> {
    let params = CsRecentParams {
        dev_eui: Some(dev_eui.to_string()),
        range: Some(range),
        limit: Some(limit),
        ..Default::default()
    };
    cs_recent_packets(pool, &params).await
}
