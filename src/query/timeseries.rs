//! Bucketed time series, distributions and duty-cycle accounting.

use crate::error::AnalyzerError;
use crate::model::PacketType;
use crate::query::TimeRange;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    FiveMinutes,
    QuarterHour,
    Hour,
    Day,
}

impl Bucket {
    pub fn as_interval(&self) -> &'static str {
        match self {
            Bucket::FiveMinutes => "5 minutes",
            Bucket::QuarterHour => "15 minutes",
            Bucket::Hour => "1 hour",
            Bucket::Day => "1 day",
        }
    }

    /// Hour-aligned buckets can be served from the hourly aggregate.
    pub fn hour_aligned(&self) -> bool {
        matches!(self, Bucket::Hour | Bucket::Day)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    PacketCount,
    AirtimeUs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBy {
    Operator,
    PacketType,
    Gateway,
}

#[derive(Debug, Clone)]
pub struct TimeSeriesParams {
    pub range: TimeRange,
    pub bucket: Bucket,
    pub metric: Metric,
    pub gateway_id: Option<String>,
    pub operator: Option<String>,
    pub packet_type: Option<PacketType>,
    pub dev_addr: Option<String>,
    pub group_by: Option<GroupBy>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub value: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

/// The hourly aggregate serves hour-aligned buckets with no device
/// filter; everything else reads raw packets.
pub fn uses_hourly_aggregate(params: &TimeSeriesParams) -> bool {
    params.bucket.hour_aligned() && params.dev_addr.is_none()
}

pub async fn time_series(
    pool: &PgPool,
    params: &TimeSeriesParams,
) -> Result<Vec<SeriesPoint>, AnalyzerError> {
    let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new("SELECT time_bucket('");
    builder.push(params.bucket.as_interval());

    let from_aggregate = uses_hourly_aggregate(params);
    if from_aggregate {
        builder.push("', bucket) AS ts, ");
    } else {
        builder.push("', timestamp) AS ts, ");
    }

    let group_column = params.group_by.map(|group| match group {
        GroupBy::Operator => "operator",
        GroupBy::PacketType => "packet_type",
        GroupBy::Gateway => "gateway_id",
    });
    if let Some(column) = group_column {
        builder.push(column).push(" AS grp, ");
    }

    match (from_aggregate, params.metric) {
        (true, Metric::PacketCount) => builder.push("SUM(packet_count)::BIGINT AS value"),
        (true, Metric::AirtimeUs) => builder.push("SUM(airtime_us)::BIGINT AS value"),
        (false, Metric::PacketCount) => builder.push("COUNT(*)::BIGINT AS value"),
        (false, Metric::AirtimeUs) => builder.push("COALESCE(SUM(airtime_us), 0)::BIGINT AS value"),
    };

    if from_aggregate {
        builder.push(" FROM packets_hourly WHERE bucket >= ");
        builder.push_bind(params.range.start);
        builder.push(" AND bucket < ");
        builder.push_bind(params.range.end);
    } else {
        builder.push(" FROM packets WHERE timestamp >= ");
        builder.push_bind(params.range.start);
        builder.push(" AND timestamp < ");
        builder.push_bind(params.range.end);
    }

    if let Some(gateway_id) = &params.gateway_id {
        builder.push(" AND gateway_id = ").push_bind(gateway_id);
    }
    if let Some(operator) = &params.operator {
        builder.push(" AND operator = ").push_bind(operator);
    }
    if let Some(packet_type) = params.packet_type {
        builder
            .push(" AND packet_type = ")
            .push_bind(packet_type.as_str());
    }
    if let Some(dev_addr) = &params.dev_addr {
        builder.push(" AND dev_addr = ").push_bind(dev_addr);
    }

    builder.push(" GROUP BY ts");
    if group_column.is_some() {
        builder.push(", grp");
    }
    builder.push(" ORDER BY ts");

    let rows = builder.build().fetch_all(pool).await?;
    rows.iter()
        .map(|row| {
            Ok(SeriesPoint {
                timestamp: row.try_get("ts")?,
                value: row.try_get("value")?,
                group: if group_column.is_some() {
                    Some(row.try_get("grp")?)
                } else {
                    None
                },
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Frequency,
    SpreadingFactor,
}

#[derive(Debug, Clone, Serialize)]
pub struct DistributionEntry {
    pub key: i64,
    pub packet_count: i64,
    pub airtime_us: i64,
}

/// The channel/SF aggregate serves windows of at least an hour with no
/// device filter.
pub fn uses_channel_sf_aggregate(range: &TimeRange, dev_addr: Option<&str>) -> bool {
    range.duration() >= Duration::hours(1) && dev_addr.is_none()
}

/// Packet counts and airtime grouped by frequency or spreading factor.
pub async fn distribution(
    pool: &PgPool,
    dimension: Dimension,
    gateway_id: Option<&str>,
    dev_addr: Option<&str>,
    range: TimeRange,
) -> Result<Vec<DistributionEntry>, AnalyzerError> {
    let mut builder: QueryBuilder<'_, Postgres>;

    if uses_channel_sf_aggregate(&range, dev_addr) {
        builder = QueryBuilder::new("SELECT ");
        builder.push(match dimension {
            Dimension::Frequency => "frequency::BIGINT",
            Dimension::SpreadingFactor => "spreading_factor::BIGINT",
        });
        builder.push(
            " AS key, SUM(packet_count)::BIGINT AS packet_count, \
             SUM(airtime_us)::BIGINT AS airtime_us \
             FROM packets_channel_sf_hourly WHERE bucket >= ",
        );
        builder.push_bind(range.start);
        builder.push(" AND bucket < ");
        builder.push_bind(range.end);
    } else {
        builder = QueryBuilder::new("SELECT ");
        builder.push(match dimension {
            Dimension::Frequency => "frequency::BIGINT",
            Dimension::SpreadingFactor => "COALESCE(spreading_factor, 0)::BIGINT",
        });
        builder.push(
            " AS key, COUNT(*)::BIGINT AS packet_count, \
             COALESCE(SUM(airtime_us), 0)::BIGINT AS airtime_us \
             FROM packets WHERE timestamp >= ",
        );
        builder.push_bind(range.start);
        builder.push(" AND timestamp < ");
        builder.push_bind(range.end);
        if let Some(dev_addr) = dev_addr {
            builder.push(" AND dev_addr = ").push_bind(dev_addr);
        }
    }

    if let Some(gateway_id) = gateway_id {
        builder.push(" AND gateway_id = ").push_bind(gateway_id);
    }
    builder.push(" GROUP BY key ORDER BY key");

    let rows = builder.build().fetch_all(pool).await?;
    rows.iter()
        .map(|row| {
            Ok(DistributionEntry {
                key: row.try_get("key")?,
                packet_count: row.try_get("packet_count")?,
                airtime_us: row.try_get("airtime_us")?,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DutyCycle {
    pub rx_airtime_percent: f64,
    pub tx_duty_cycle_percent: f64,
}

/// Percentages from per-gateway airtime sums. With several gateways the
/// percentages are averaged, not summed.
pub fn duty_cycle_from_sums(per_gateway: &[(i64, i64)], window_us: i64) -> DutyCycle {
    if per_gateway.is_empty() || window_us <= 0 {
        return DutyCycle {
            rx_airtime_percent: 0.0,
            tx_duty_cycle_percent: 0.0,
        };
    }

    let n = per_gateway.len() as f64;
    let rx: f64 = per_gateway
        .iter()
        .map(|(rx, _)| *rx as f64 / window_us as f64 * 100.0)
        .sum::<f64>()
        / n;
    let tx: f64 = per_gateway
        .iter()
        .map(|(_, tx)| *tx as f64 / window_us as f64 * 100.0)
        .sum::<f64>()
        / n;

    DutyCycle {
        rx_airtime_percent: rx,
        tx_duty_cycle_percent: tx,
    }
}

/// RX/TX duty cycle for one gateway, or averaged across all gateways
/// when none is specified.
pub async fn duty_cycle(
    pool: &PgPool,
    gateway_id: Option<&str>,
    range: TimeRange,
) -> Result<DutyCycle, AnalyzerError> {
    let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(
        "SELECT gateway_id, \
         COALESCE(SUM(airtime_us) FILTER (WHERE packet_type IN ('data', 'join_request')), 0)::BIGINT AS rx_us, \
         COALESCE(SUM(airtime_us) FILTER (WHERE packet_type = 'downlink'), 0)::BIGINT AS tx_us \
         FROM packets WHERE timestamp >= ",
    );
    builder.push_bind(range.start);
    builder.push(" AND timestamp < ");
    builder.push_bind(range.end);
    if let Some(gateway_id) = gateway_id {
        builder.push(" AND gateway_id = ").push_bind(gateway_id);
    }
    builder.push(" GROUP BY gateway_id");

    let rows = builder.build().fetch_all(pool).await?;
    let sums: Vec<(i64, i64)> = rows
        .iter()
        .map(|row| Ok((row.try_get("rx_us")?, row.try_get("tx_us")?)))
        .collect::<Result<_, AnalyzerError>>()?;

    Ok(duty_cycle_from_sums(&sums, range.duration_us()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(bucket: Bucket, dev_addr: Option<&str>) -> TimeSeriesParams {
        TimeSeriesParams {
            range: TimeRange::last_hours(24),
            bucket,
            metric: Metric::PacketCount,
            gateway_id: None,
            operator: None,
            packet_type: None,
            dev_addr: dev_addr.map(String::from),
            group_by: None,
        }
    }

    #[test]
    fn test_aggregate_source_selection() {
        assert!(uses_hourly_aggregate(&params(Bucket::Hour, None)));
        assert!(uses_hourly_aggregate(&params(Bucket::Day, None)));
        assert!(!uses_hourly_aggregate(&params(Bucket::FiveMinutes, None)));
        // A device filter always forces raw packets.
        assert!(!uses_hourly_aggregate(&params(Bucket::Hour, Some("26011AAB"))));
    }

    #[test]
    fn test_channel_sf_source_selection() {
        let day = TimeRange::last_hours(24);
        let short = TimeRange::last_hours(0);
        assert!(uses_channel_sf_aggregate(&day, None));
        assert!(!uses_channel_sf_aggregate(&day, Some("26011AAB")));
        assert!(!uses_channel_sf_aggregate(&short, None));
    }

    #[test]
    fn test_duty_cycle_single_gateway() {
        // 1 hour window, 36 s of RX, 3.6 s of TX.
        let window_us = 3600 * 1_000_000i64;
        let duty = duty_cycle_from_sums(&[(36_000_000, 3_600_000)], window_us);
        assert!((duty.rx_airtime_percent - 1.0).abs() < 1e-9);
        assert!((duty.tx_duty_cycle_percent - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_duty_cycle_averages_across_gateways() {
        let window_us = 100 * 1_000_000i64;
        // 2% and 4% RX across two gateways -> 3% average, never 6%.
        let duty = duty_cycle_from_sums(&[(2_000_000, 0), (4_000_000, 0)], window_us);
        assert!((duty.rx_airtime_percent - 3.0).abs() < 1e-9);
        assert_eq!(duty.tx_duty_cycle_percent, 0.0);
    }

    #[test]
    fn test_duty_cycle_degenerate_inputs() {
        let duty = duty_cycle_from_sums(&[], 1_000_000);
        assert_eq!(duty.rx_airtime_percent, 0.0);
        let duty = duty_cycle_from_sums(&[(1, 1)], 0);
        assert_eq!(duty.tx_duty_cycle_percent, 0.0);
    }

    #[test]
    fn test_bucket_intervals() {
        assert_eq!(Bucket::FiveMinutes.as_interval(), "5 minutes");
        assert_eq!(Bucket::Hour.as_interval(), "1 hour");
        assert!(Bucket::Day.hour_aligned());
        assert!(!Bucket::QuarterHour.hour_aligned());
    }
}
