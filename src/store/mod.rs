//! TimescaleDB-backed store: schema management, metadata upserts and the
//! multi-row stream inserts used by the batched writer.

pub mod writer;

use crate::error::AnalyzerError;
use crate::model::{CsDeviceUpsert, CsPacket, GatewayUpsert, ParsedPacket};
use crate::operators::CustomOperator;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_CONNECTIONS: u32 = 10;

/// Hide rule consumed by readers: suppress packets by DevAddr or JoinEUI
/// prefix.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct HideRule {
    #[serde(rename = "type")]
    pub rule_type: HideRuleType,
    pub prefix: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HideRuleType {
    DevAddr,
    JoinEui,
}

/// Plain tables, the hypertable conversions and the SQL helper.
const SCHEMA_STATEMENTS: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS packets (
        timestamp        TIMESTAMPTZ NOT NULL,
        gateway_id       TEXT NOT NULL,
        border_gateway_id TEXT,
        packet_type      TEXT NOT NULL,
        dev_addr         TEXT,
        join_eui         TEXT,
        dev_eui          TEXT,
        operator         TEXT NOT NULL,
        frequency        BIGINT NOT NULL,
        spreading_factor SMALLINT,
        bandwidth        INTEGER NOT NULL,
        rssi             INTEGER NOT NULL,
        snr              REAL NOT NULL,
        payload_size     INTEGER NOT NULL,
        airtime_us       BIGINT NOT NULL,
        f_cnt            BIGINT,
        f_port           SMALLINT,
        confirmed        BOOLEAN,
        session_id       TEXT
    )"#,
    "SELECT create_hypertable('packets', 'timestamp', if_not_exists => TRUE)",
    "CREATE INDEX IF NOT EXISTS idx_packets_gateway_time ON packets (gateway_id, timestamp DESC)",
    "CREATE INDEX IF NOT EXISTS idx_packets_dev_addr_time ON packets (dev_addr, timestamp DESC) WHERE dev_addr IS NOT NULL",
    "CREATE INDEX IF NOT EXISTS idx_packets_type_time ON packets (packet_type, timestamp DESC)",
    r#"CREATE TABLE IF NOT EXISTS cs_packets (
        timestamp        TIMESTAMPTZ NOT NULL,
        dev_eui          TEXT NOT NULL,
        dev_addr         TEXT,
        device_name      TEXT NOT NULL,
        application_id   TEXT NOT NULL,
        operator         TEXT NOT NULL,
        packet_type      TEXT NOT NULL,
        tx_status        TEXT,
        frequency        BIGINT NOT NULL,
        spreading_factor SMALLINT,
        bandwidth        INTEGER NOT NULL,
        rssi             INTEGER NOT NULL,
        snr              REAL NOT NULL,
        payload_size     INTEGER NOT NULL,
        airtime_us       BIGINT NOT NULL,
        f_cnt            BIGINT,
        f_port           SMALLINT,
        confirmed        BOOLEAN
    )"#,
    "SELECT create_hypertable('cs_packets', 'timestamp', if_not_exists => TRUE)",
    "CREATE INDEX IF NOT EXISTS idx_cs_packets_dev_eui_time ON cs_packets (dev_eui, timestamp DESC)",
    r#"CREATE TABLE IF NOT EXISTS gateways (
        gateway_id TEXT PRIMARY KEY,
        name       TEXT,
        alias      TEXT,
        group_name TEXT,
        first_seen TIMESTAMPTZ NOT NULL DEFAULT now(),
        last_seen  TIMESTAMPTZ NOT NULL DEFAULT now(),
        latitude   DOUBLE PRECISION,
        longitude  DOUBLE PRECISION
    )"#,
    r#"CREATE TABLE IF NOT EXISTS cs_devices (
        dev_eui          TEXT PRIMARY KEY,
        dev_addr         TEXT,
        device_name      TEXT NOT NULL DEFAULT '',
        application_id   TEXT NOT NULL DEFAULT '',
        application_name TEXT,
        last_seen        TIMESTAMPTZ NOT NULL DEFAULT now(),
        packet_count     BIGINT NOT NULL DEFAULT 0
    )"#,
    r#"CREATE TABLE IF NOT EXISTS custom_operators (
        id       SERIAL PRIMARY KEY,
        prefix   TEXT NOT NULL,
        name     TEXT NOT NULL,
        priority INTEGER NOT NULL DEFAULT 100,
        color    TEXT
    )"#,
    r#"CREATE TABLE IF NOT EXISTS hide_rules (
        id          SERIAL PRIMARY KEY,
        rule_type   TEXT NOT NULL,
        prefix      TEXT NOT NULL,
        description TEXT
    )"#,
    // Big-endian hex DevAddr to its numeric value, for prefix arithmetic
    // inside SQL.
    r#"CREATE OR REPLACE FUNCTION dev_addr_uint32(addr TEXT) RETURNS BIGINT AS $$
        SELECT ('x' || lpad(addr, 8, '0'))::bit(32)::bigint
    $$ LANGUAGE SQL IMMUTABLE"#,
];

/// Continuous aggregates cannot run inside a transaction and may be
/// rejected by plain PostgreSQL; failures are logged and non-fatal.
const AGGREGATE_STATEMENTS: &[&str] = &[
    r#"CREATE MATERIALIZED VIEW IF NOT EXISTS packets_hourly
        WITH (timescaledb.continuous) AS
        SELECT time_bucket(INTERVAL '1 hour', timestamp) AS bucket,
               gateway_id,
               operator,
               packet_type,
               COUNT(*) AS packet_count,
               SUM(airtime_us) AS airtime_us,
               COUNT(DISTINCT dev_addr) AS unique_devices
        FROM packets
        GROUP BY bucket, gateway_id, operator, packet_type
        WITH NO DATA"#,
    r#"CREATE MATERIALIZED VIEW IF NOT EXISTS packets_channel_sf_hourly
        WITH (timescaledb.continuous) AS
        SELECT time_bucket(INTERVAL '1 hour', timestamp) AS bucket,
               gateway_id,
               frequency,
               COALESCE(spreading_factor, 0) AS spreading_factor,
               COUNT(*) AS packet_count,
               SUM(airtime_us) AS airtime_us
        FROM packets
        GROUP BY bucket, gateway_id, frequency, COALESCE(spreading_factor, 0)
        WITH NO DATA"#,
    r#"SELECT add_continuous_aggregate_policy('packets_hourly',
        start_offset => INTERVAL '3 days',
        end_offset => INTERVAL '5 minutes',
        schedule_interval => INTERVAL '2 minutes',
        if_not_exists => TRUE)"#,
    r#"SELECT add_continuous_aggregate_policy('packets_channel_sf_hourly',
        start_offset => INTERVAL '3 days',
        end_offset => INTERVAL '5 minutes',
        schedule_interval => INTERVAL '2 minutes',
        if_not_exists => TRUE)"#,
    "SELECT add_retention_policy('packets', INTERVAL '8 days', if_not_exists => TRUE)",
    "SELECT add_retention_policy('cs_packets', INTERVAL '8 days', if_not_exists => TRUE)",
    "SELECT add_retention_policy('packets_hourly', INTERVAL '8 days', if_not_exists => TRUE)",
    "SELECT add_retention_policy('packets_channel_sf_hourly', INTERVAL '8 days', if_not_exists => TRUE)",
];

#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub async fn connect(url: &str) -> Result<Self, AnalyzerError> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(CONNECT_TIMEOUT)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables, hypertables, aggregates and policies. Idempotent.
    pub async fn init_schema(&self) -> Result<(), AnalyzerError> {
        for statement in SCHEMA_STATEMENTS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        for statement in AGGREGATE_STATEMENTS {
            if let Err(e) = sqlx::query(statement).execute(&self.pool).await {
                warn!("aggregate/policy statement failed (continuing): {}", e);
            }
        }
        info!("store schema initialized");
        Ok(())
    }

    /// Multi-row insert for the gateway packet stream.
    pub async fn insert_packets(&self, batch: &[ParsedPacket]) -> Result<(), AnalyzerError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut timestamps = Vec::with_capacity(batch.len());
        let mut gateway_ids = Vec::with_capacity(batch.len());
        let mut border_gateway_ids = Vec::with_capacity(batch.len());
        let mut packet_types = Vec::with_capacity(batch.len());
        let mut dev_addrs = Vec::with_capacity(batch.len());
        let mut join_euis = Vec::with_capacity(batch.len());
        let mut dev_euis = Vec::with_capacity(batch.len());
        let mut operators = Vec::with_capacity(batch.len());
        let mut frequencies = Vec::with_capacity(batch.len());
        let mut spreading_factors = Vec::with_capacity(batch.len());
        let mut bandwidths = Vec::with_capacity(batch.len());
        let mut rssis = Vec::with_capacity(batch.len());
        let mut snrs = Vec::with_capacity(batch.len());
        let mut payload_sizes = Vec::with_capacity(batch.len());
        let mut airtimes = Vec::with_capacity(batch.len());
        let mut f_cnts = Vec::with_capacity(batch.len());
        let mut f_ports = Vec::with_capacity(batch.len());
        let mut confirmeds = Vec::with_capacity(batch.len());
        let mut session_ids = Vec::with_capacity(batch.len());

        for p in batch {
            timestamps.push(p.timestamp);
            gateway_ids.push(p.gateway_id.clone());
            border_gateway_ids.push(p.border_gateway_id.clone());
            packet_types.push(p.packet_type.as_str().to_string());
            dev_addrs.push(p.dev_addr.clone());
            join_euis.push(p.join_eui.clone());
            dev_euis.push(p.dev_eui.clone());
            operators.push(p.operator.clone());
            frequencies.push(p.frequency as i64);
            spreading_factors.push(p.spreading_factor.map(|sf| sf as i16));
            bandwidths.push(p.bandwidth as i32);
            rssis.push(p.rssi);
            snrs.push(p.snr);
            payload_sizes.push(p.payload_size as i32);
            airtimes.push(p.airtime_us);
            f_cnts.push(p.f_cnt.map(|c| c as i64));
            f_ports.push(p.f_port.map(|p| p as i16));
            confirmeds.push(p.confirmed);
            session_ids.push(p.session_id.clone());
        }

        sqlx::query(
            r#"INSERT INTO packets (
                timestamp, gateway_id, border_gateway_id, packet_type,
                dev_addr, join_eui, dev_eui, operator, frequency,
                spreading_factor, bandwidth, rssi, snr, payload_size,
                airtime_us, f_cnt, f_port, confirmed, session_id
            )
            SELECT * FROM UNNEST(
                $1::timestamptz[], $2::text[], $3::text[], $4::text[],
                $5::text[], $6::text[], $7::text[], $8::text[], $9::int8[],
                $10::int2[], $11::int4[], $12::int4[], $13::float4[], $14::int4[],
                $15::int8[], $16::int8[], $17::int2[], $18::bool[], $19::text[]
            )"#,
        )
        .bind(&timestamps)
        .bind(&gateway_ids)
        .bind(&border_gateway_ids)
        .bind(&packet_types)
        .bind(&dev_addrs)
        .bind(&join_euis)
        .bind(&dev_euis)
        .bind(&operators)
        .bind(&frequencies)
        .bind(&spreading_factors)
        .bind(&bandwidths)
        .bind(&rssis)
        .bind(&snrs)
        .bind(&payload_sizes)
        .bind(&airtimes)
        .bind(&f_cnts)
        .bind(&f_ports)
        .bind(&confirmeds)
        .bind(&session_ids)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Multi-row insert for the application packet stream.
    pub async fn insert_cs_packets(&self, batch: &[CsPacket]) -> Result<(), AnalyzerError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut timestamps = Vec::with_capacity(batch.len());
        let mut dev_euis = Vec::with_capacity(batch.len());
        let mut dev_addrs = Vec::with_capacity(batch.len());
        let mut device_names = Vec::with_capacity(batch.len());
        let mut application_ids = Vec::with_capacity(batch.len());
        let mut operators = Vec::with_capacity(batch.len());
        let mut packet_types = Vec::with_capacity(batch.len());
        let mut tx_statuses = Vec::with_capacity(batch.len());
        let mut frequencies = Vec::with_capacity(batch.len());
        let mut spreading_factors = Vec::with_capacity(batch.len());
        let mut bandwidths = Vec::with_capacity(batch.len());
        let mut rssis = Vec::with_capacity(batch.len());
        let mut snrs = Vec::with_capacity(batch.len());
        let mut payload_sizes = Vec::with_capacity(batch.len());
        let mut airtimes = Vec::with_capacity(batch.len());
        let mut f_cnts = Vec::with_capacity(batch.len());
        let mut f_ports = Vec::with_capacity(batch.len());
        let mut confirmeds = Vec::with_capacity(batch.len());

        for p in batch {
            timestamps.push(p.timestamp);
            dev_euis.push(p.dev_eui.clone());
            dev_addrs.push(p.dev_addr.clone());
            device_names.push(p.device_name.clone());
            application_ids.push(p.application_id.clone());
            operators.push(p.operator.clone());
            packet_types.push(p.packet_type.as_str().to_string());
            tx_statuses.push(p.tx_status.clone());
            frequencies.push(p.frequency as i64);
            spreading_factors.push(p.spreading_factor.map(|sf| sf as i16));
            bandwidths.push(p.bandwidth as i32);
            rssis.push(p.rssi);
            snrs.push(p.snr);
            payload_sizes.push(p.payload_size as i32);
            airtimes.push(p.airtime_us);
            f_cnts.push(p.f_cnt.map(|c| c as i64));
            f_ports.push(p.f_port.map(|p| p as i16));
            confirmeds.push(p.confirmed);
        }

        sqlx::query(
            r#"INSERT INTO cs_packets (
                timestamp, dev_eui, dev_addr, device_name, application_id,
                operator, packet_type, tx_status, frequency,
                spreading_factor, bandwidth, rssi, snr, payload_size,
                airtime_us, f_cnt, f_port, confirmed
            )
            SELECT * FROM UNNEST(
                $1::timestamptz[], $2::text[], $3::text[], $4::text[], $5::text[],
                $6::text[], $7::text[], $8::text[], $9::int8[],
                $10::int2[], $11::int4[], $12::int4[], $13::float4[], $14::int4[],
                $15::int8[], $16::int8[], $17::int2[], $18::bool[]
            )"#,
        )
        .bind(&timestamps)
        .bind(&dev_euis)
        .bind(&dev_addrs)
        .bind(&device_names)
        .bind(&application_ids)
        .bind(&operators)
        .bind(&packet_types)
        .bind(&tx_statuses)
        .bind(&frequencies)
        .bind(&spreading_factors)
        .bind(&bandwidths)
        .bind(&rssis)
        .bind(&snrs)
        .bind(&payload_sizes)
        .bind(&airtimes)
        .bind(&f_cnts)
        .bind(&f_ports)
        .bind(&confirmeds)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Create a gateway on first sighting; preserve any field not
    /// provided and bump `last_seen`.
    pub async fn upsert_gateway(&self, upsert: &GatewayUpsert) -> Result<(), AnalyzerError> {
        sqlx::query(
            r#"INSERT INTO gateways (gateway_id, name, alias, group_name, latitude, longitude)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (gateway_id) DO UPDATE SET
                name = COALESCE(EXCLUDED.name, gateways.name),
                alias = COALESCE(EXCLUDED.alias, gateways.alias),
                group_name = COALESCE(EXCLUDED.group_name, gateways.group_name),
                latitude = COALESCE(EXCLUDED.latitude, gateways.latitude),
                longitude = COALESCE(EXCLUDED.longitude, gateways.longitude),
                last_seen = now()"#,
        )
        .bind(&upsert.gateway_id)
        .bind(&upsert.name)
        .bind(&upsert.alias)
        .bind(&upsert.group_name)
        .bind(upsert.location.map(|l| l.latitude))
        .bind(upsert.location.map(|l| l.longitude))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Same semantics for ChirpStack devices; `packet_count` increments
    /// on every call.
    pub async fn upsert_cs_device(&self, upsert: &CsDeviceUpsert) -> Result<(), AnalyzerError> {
        sqlx::query(
            r#"INSERT INTO cs_devices (
                dev_eui, dev_addr, device_name, application_id,
                application_name, last_seen, packet_count
            )
            VALUES ($1, $2, $3, $4, $5, $6, 1)
            ON CONFLICT (dev_eui) DO UPDATE SET
                dev_addr = COALESCE(EXCLUDED.dev_addr, cs_devices.dev_addr),
                device_name = CASE WHEN EXCLUDED.device_name <> ''
                    THEN EXCLUDED.device_name ELSE cs_devices.device_name END,
                application_id = CASE WHEN EXCLUDED.application_id <> ''
                    THEN EXCLUDED.application_id ELSE cs_devices.application_id END,
                application_name = COALESCE(EXCLUDED.application_name, cs_devices.application_name),
                last_seen = EXCLUDED.last_seen,
                packet_count = cs_devices.packet_count + 1"#,
        )
        .bind(&upsert.dev_eui)
        .bind(&upsert.dev_addr)
        .bind(&upsert.device_name)
        .bind(&upsert.application_id)
        .bind(&upsert.application_name)
        .bind(upsert.last_seen)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Bulk gateway upsert, the contract used by the external CSV seed
    /// loader.
    pub async fn seed_gateways(&self, rows: &[GatewayUpsert]) -> Result<usize, AnalyzerError> {
        for row in rows {
            self.upsert_gateway(row).await?;
        }
        Ok(rows.len())
    }

    /// Custom operators persisted in the database, merged with config
    /// rules at startup and on reload.
    pub async fn load_custom_operators(&self) -> Result<Vec<CustomOperator>, AnalyzerError> {
        let rows = sqlx::query(
            "SELECT prefix, name, priority, color FROM custom_operators ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(CustomOperator {
                    prefixes: vec![row.try_get::<String, _>("prefix")?],
                    name: row.try_get("name")?,
                    priority: Some(row.try_get::<i32, _>("priority")?),
                    color: row.try_get("color")?,
                    known_devices: None,
                })
            })
            .collect()
    }

    /// Hide rules persisted in the database.
    pub async fn load_hide_rules(&self) -> Result<Vec<HideRule>, AnalyzerError> {
        let rows =
            sqlx::query("SELECT rule_type, prefix, description FROM hide_rules ORDER BY id")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let rule_type = match row.try_get::<String, _>("rule_type").ok()?.as_str() {
                    "dev_addr" => HideRuleType::DevAddr,
                    "join_eui" => HideRuleType::JoinEui,
                    _ => return None,
                };
                Some(HideRule {
                    rule_type,
                    prefix: row.try_get("prefix").ok()?,
                    description: row.try_get("description").ok()?,
                })
            })
            .collect())
    }
}
