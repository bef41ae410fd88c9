//! Per-device read queries: profile, loss, transmission intervals.

use crate::error::AnalyzerError;
use crate::query::TimeRange;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Row};

#[derive(Debug, Clone, Serialize)]
pub struct DeviceProfile {
    pub dev_addr: String,
    pub operator: Option<String>,
    pub dev_eui: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub packet_count: i64,
    pub gateway_count: i64,
    pub session_count: i64,
}

/// Windowed profile for one DevAddr; `None` when the device was not
/// heard at all.
pub async fn device_profile(
    pool: &PgPool,
    dev_addr: &str,
    range: TimeRange,
) -> Result<Option<DeviceProfile>, AnalyzerError> {
    let row = sqlx::query(
        r#"SELECT COUNT(*)::BIGINT AS packet_count,
                  MIN(timestamp) AS first_seen,
                  MAX(timestamp) AS last_seen,
                  COUNT(DISTINCT gateway_id)::BIGINT AS gateway_count,
                  COUNT(DISTINCT session_id)::BIGINT AS session_count,
                  MAX(operator) AS operator,
                  MAX(dev_eui) AS dev_eui
           FROM packets
           WHERE dev_addr = $1 AND packet_type = 'data'
                 AND timestamp >= $2 AND timestamp < $3"#,
    )
    .bind(dev_addr)
    .bind(range.start)
    .bind(range.end)
    .fetch_one(pool)
    .await?;

    let packet_count: i64 = row.try_get("packet_count")?;
    if packet_count == 0 {
        return Ok(None);
    }

    Ok(Some(DeviceProfile {
        dev_addr: dev_addr.to_string(),
        operator: row.try_get("operator")?,
        dev_eui: row.try_get("dev_eui")?,
        first_seen: row.try_get("first_seen")?,
        last_seen: row.try_get("last_seen")?,
        packet_count,
        gateway_count: row.try_get("gateway_count")?,
        session_count: row.try_get("session_count")?,
    }))
}

/// One uplink observation for loss computation, in timestamp order.
#[derive(Debug, Clone)]
pub struct LossPoint {
    pub session_id: Option<String>,
    pub f_cnt: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LossStats {
    pub received: i64,
    pub missed: i64,
    pub loss_percent: f64,
}

/// Frame-counter gap loss over a timestamp-ordered uplink sequence.
///
/// Counters advance independently per session; a gap of `g` frames adds
/// `g` to `missed`, counter resets (gap < 0) start a new run.
pub fn compute_loss(points: &[LossPoint]) -> LossStats {
    use std::collections::HashMap;

    let mut last_f_cnt: HashMap<Option<&str>, i64> = HashMap::new();
    let mut missed: i64 = 0;

    for point in points {
        let key = point.session_id.as_deref();
        if let Some(prev) = last_f_cnt.get(&key) {
            let gap = point.f_cnt - prev - 1;
            if gap > 0 {
                missed += gap;
            }
        }
        last_f_cnt.insert(key, point.f_cnt);
    }

    let received = points.len() as i64;
    let total = received + missed;
    let loss_percent = if total > 0 {
        missed as f64 / total as f64 * 100.0
    } else {
        0.0
    };

    LossStats {
        received,
        missed,
        loss_percent,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayLoss {
    pub gateway_id: String,
    #[serde(flatten)]
    pub stats: LossStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceLossReport {
    pub overall: LossStats,
    pub per_gateway: Vec<GatewayLoss>,
}

/// Packet loss for one device, overall and per gateway.
///
/// The overall view deduplicates multi-gateway receptions by
/// `(session_id, f_cnt)`; the per-gateway view uses each gateway's own
/// reception sequence.
pub async fn device_loss(
    pool: &PgPool,
    dev_addr: &str,
    range: TimeRange,
) -> Result<DeviceLossReport, AnalyzerError> {
    let overall_rows = sqlx::query(
        r#"SELECT session_id, f_cnt
           FROM packets
           WHERE dev_addr = $1 AND packet_type = 'data' AND f_cnt IS NOT NULL
                 AND timestamp >= $2 AND timestamp < $3
           GROUP BY session_id, f_cnt
           ORDER BY MIN(timestamp)"#,
    )
    .bind(dev_addr)
    .bind(range.start)
    .bind(range.end)
    .fetch_all(pool)
    .await?;

    let overall_points: Vec<LossPoint> = overall_rows
        .iter()
        .map(|row| {
            Ok(LossPoint {
                session_id: row.try_get("session_id")?,
                f_cnt: row.try_get("f_cnt")?,
            })
        })
        .collect::<Result<_, AnalyzerError>>()?;

    let gateway_rows = sqlx::query(
        r#"SELECT gateway_id, session_id, f_cnt
           FROM packets
           WHERE dev_addr = $1 AND packet_type = 'data' AND f_cnt IS NOT NULL
                 AND timestamp >= $2 AND timestamp < $3
           ORDER BY gateway_id, timestamp"#,
    )
    .bind(dev_addr)
    .bind(range.start)
    .bind(range.end)
    .fetch_all(pool)
    .await?;

    let mut per_gateway = Vec::new();
    let mut current_gateway: Option<String> = None;
    let mut current_points: Vec<LossPoint> = Vec::new();
    for row in &gateway_rows {
        let gateway_id: String = row.try_get("gateway_id")?;
        if current_gateway.as_deref() != Some(gateway_id.as_str()) {
            if let Some(gateway) = current_gateway.take() {
                per_gateway.push(GatewayLoss {
                    gateway_id: gateway,
                    stats: compute_loss(&current_points),
                });
            }
            current_gateway = Some(gateway_id);
            current_points.clear();
        }
        current_points.push(LossPoint {
            session_id: row.try_get("session_id")?,
            f_cnt: row.try_get("f_cnt")?,
        });
    }
    if let Some(gateway) = current_gateway {
        per_gateway.push(GatewayLoss {
            gateway_id: gateway,
            stats: compute_loss(&current_points),
        });
    }

    Ok(DeviceLossReport {
        overall: compute_loss(&overall_points),
        per_gateway,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IntervalStats {
    pub count: i64,
    pub avg_seconds: f64,
    pub median_seconds: f64,
    pub min_seconds: f64,
    pub max_seconds: f64,
}

/// Statistics over the gaps between consecutive transmissions. `None`
/// with fewer than two observations.
pub fn compute_intervals(timestamps: &[DateTime<Utc>]) -> Option<IntervalStats> {
    if timestamps.len() < 2 {
        return None;
    }

    let mut gaps: Vec<f64> = timestamps
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).num_milliseconds() as f64 / 1000.0)
        .collect();
    gaps.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let count = gaps.len() as i64;
    let sum: f64 = gaps.iter().sum();
    let median = if gaps.len() % 2 == 0 {
        (gaps[gaps.len() / 2 - 1] + gaps[gaps.len() / 2]) / 2.0
    } else {
        gaps[gaps.len() / 2]
    };

    Some(IntervalStats {
        count,
        avg_seconds: sum / count as f64,
        median_seconds: median,
        min_seconds: gaps[0],
        max_seconds: gaps[gaps.len() - 1],
    })
}

/// Transmission-interval statistics for one device, deduplicated by
/// frame.
pub async fn device_intervals(
    pool: &PgPool,
    dev_addr: &str,
    range: TimeRange,
) -> Result<Option<IntervalStats>, AnalyzerError> {
    let rows = sqlx::query(
        r#"SELECT MIN(timestamp) AS first_seen
           FROM packets
           WHERE dev_addr = $1 AND packet_type = 'data' AND f_cnt IS NOT NULL
                 AND timestamp >= $2 AND timestamp < $3
           GROUP BY session_id, f_cnt
           ORDER BY first_seen"#,
    )
    .bind(dev_addr)
    .bind(range.start)
    .bind(range.end)
    .fetch_all(pool)
    .await?;

    let timestamps: Vec<DateTime<Utc>> = rows
        .iter()
        .map(|row| row.try_get("first_seen"))
        .collect::<Result<_, _>>()?;

    Ok(compute_intervals(&timestamps))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn points(f_cnts: &[i64]) -> Vec<LossPoint> {
        f_cnts
            .iter()
            .map(|&f_cnt| LossPoint {
                session_id: Some("s1".to_string()),
                f_cnt,
            })
            .collect()
    }

    #[test]
    fn test_loss_reference_sequence() {
        // FCnts [5, 6, 8, 9, 12]: gaps of 1 and 2 -> 3 missed of 8 total.
        let stats = compute_loss(&points(&[5, 6, 8, 9, 12]));
        assert_eq!(stats.received, 5);
        assert_eq!(stats.missed, 3);
        assert!((stats.loss_percent - 37.5).abs() < 1e-9);
    }

    #[test]
    fn test_loss_perfect_sequence() {
        let stats = compute_loss(&points(&[0, 1, 2, 3, 4]));
        assert_eq!(stats.missed, 0);
        assert_eq!(stats.loss_percent, 0.0);
    }

    #[test]
    fn test_loss_counter_reset_not_counted() {
        // A reset (new session without rejoin visibility) must not count
        // a huge negative or positive gap.
        let stats = compute_loss(&points(&[100, 101, 0, 1, 2]));
        assert_eq!(stats.received, 5);
        assert_eq!(stats.missed, 0);
    }

    #[test]
    fn test_loss_sessions_tracked_independently() {
        let mut mixed = Vec::new();
        // Interleaved sessions, each gapless.
        for i in 0..5 {
            mixed.push(LossPoint {
                session_id: Some("a".to_string()),
                f_cnt: i,
            });
            mixed.push(LossPoint {
                session_id: Some("b".to_string()),
                f_cnt: i + 100,
            });
        }
        let stats = compute_loss(&mixed);
        assert_eq!(stats.received, 10);
        assert_eq!(stats.missed, 0);
    }

    #[test]
    fn test_loss_empty() {
        let stats = compute_loss(&[]);
        assert_eq!(stats.received, 0);
        assert_eq!(stats.loss_percent, 0.0);
    }

    #[test]
    fn test_intervals() {
        let base = Utc::now();
        let timestamps: Vec<_> = [0i64, 60, 120, 300]
            .iter()
            .map(|&s| base + Duration::seconds(s))
            .collect();
        let stats = compute_intervals(&timestamps).unwrap();
        assert_eq!(stats.count, 3);
        assert!((stats.avg_seconds - 100.0).abs() < 1e-9);
        assert_eq!(stats.median_seconds, 60.0);
        assert_eq!(stats.min_seconds, 60.0);
        assert_eq!(stats.max_seconds, 180.0);

        assert!(compute_intervals(&timestamps[..1]).is_none());
        assert!(compute_intervals(&[]).is_none());
    }
}
