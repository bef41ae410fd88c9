use crate::error::AnalyzerError;
use crate::operators::CustomOperator;
use crate::store::HideRule;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::net::SocketAddr;
use std::path::Path;

/// Wire format of the gateway-bridge event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadFormat {
    #[default]
    Protobuf,
    Json,
}

impl std::str::FromStr for PayloadFormat {
    type Err = AnalyzerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "protobuf" => Ok(PayloadFormat::Protobuf),
            "json" => Ok(PayloadFormat::Json),
            other => Err(AnalyzerError::Config(format!(
                "invalid MQTT payload format: {}",
                other
            ))),
        }
    }
}

/// One MQTT broker connection.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub server: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic: String,
    pub format: PayloadFormat,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Primary broker.
    pub mqtt: BrokerSettings,
    /// Additional brokers, same credentials and topic shape.
    pub mqtt_servers: Vec<BrokerSettings>,
    pub postgres_url: String,
    /// Listen address consumed by the external HTTP/WS layer.
    pub api_bind: SocketAddr,
    pub operators: Vec<CustomOperator>,
    pub hide_rules: Vec<HideRule>,
}

/// JSON shape of one `operators[]` entry; `prefix` may be a single
/// string, a list, or absent (color-only entry).
#[derive(Debug, Deserialize)]
struct OperatorEntry {
    #[serde(default)]
    prefix: Option<PrefixField>,
    name: String,
    #[serde(default)]
    priority: Option<i32>,
    #[serde(default)]
    known_devices: Option<i64>,
    #[serde(default)]
    color: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PrefixField {
    One(String),
    Many(Vec<String>),
}

impl From<OperatorEntry> for CustomOperator {
    fn from(entry: OperatorEntry) -> Self {
        let prefixes = match entry.prefix {
            Some(PrefixField::One(prefix)) => vec![prefix],
            Some(PrefixField::Many(prefixes)) => prefixes,
            None => Vec::new(),
        };
        CustomOperator {
            prefixes,
            name: entry.name,
            priority: entry.priority,
            color: entry.color,
            known_devices: entry.known_devices,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (for development)
        dotenvy::dotenv().ok();

        let format: PayloadFormat = env::var("ANALYZER_MQTT_FORMAT")
            .unwrap_or_else(|_| "protobuf".to_string())
            .parse()?;

        let mqtt = BrokerSettings {
            server: env::var("ANALYZER_MQTT_SERVER")
                .unwrap_or_else(|_| "mqtt://localhost:1883".to_string()),
            username: env::var("ANALYZER_MQTT_USERNAME").ok(),
            password: env::var("ANALYZER_MQTT_PASSWORD").ok(),
            topic: env::var("ANALYZER_MQTT_TOPIC").unwrap_or_else(|_| "#".to_string()),
            format,
        };

        // Extra brokers share the primary's credentials, topic and
        // format; refinement beyond that is a deployment concern.
        let mqtt_servers = env::var("ANALYZER_MQTT_SERVERS")
            .ok()
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|server| BrokerSettings {
                        server: server.to_string(),
                        ..mqtt.clone()
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let postgres_url =
            env::var("ANALYZER_POSTGRES_URL").context("ANALYZER_POSTGRES_URL must be set")?;

        let api_bind = parse_env(
            "ANALYZER_API_BIND",
            "0.0.0.0:8080".parse().context("Invalid default bind address")?,
        )?;

        let operators = match env::var("ANALYZER_OPERATORS_FILE") {
            Ok(path) => load_operators_file(Path::new(&path))?,
            Err(_) => Vec::new(),
        };

        let hide_rules = match env::var("ANALYZER_HIDE_RULES_FILE") {
            Ok(path) => load_hide_rules_file(Path::new(&path))?,
            Err(_) => Vec::new(),
        };

        Ok(Config {
            mqtt,
            mqtt_servers,
            postgres_url,
            api_bind,
            operators,
            hide_rules,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.postgres_url.is_empty() {
            return Err(AnalyzerError::Config("postgres URL is empty".to_string()).into());
        }

        for broker in std::iter::once(&self.mqtt).chain(self.mqtt_servers.iter()) {
            if broker.server.is_empty() {
                return Err(
                    AnalyzerError::Config("MQTT broker URL is empty".to_string()).into(),
                );
            }
            if broker.topic.is_empty() {
                return Err(AnalyzerError::Config(format!(
                    "MQTT topic for {} is empty",
                    broker.server
                ))
                .into());
            }
        }

        // Surface bad operator prefixes at startup rather than on the
        // first reload.
        crate::operators::RuleSet::build(&self.operators)?;

        Ok(())
    }
}

fn load_operators_file(path: &Path) -> Result<Vec<CustomOperator>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read operators file {:?}", path))?;
    let entries: Vec<OperatorEntry> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse operators file {:?}", path))?;
    Ok(entries.into_iter().map(CustomOperator::from).collect())
}

fn load_hide_rules_file(path: &Path) -> Result<Vec<HideRule>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read hide rules file {:?}", path))?;
    let rules: Vec<HideRule> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse hide rules file {:?}", path))?;
    Ok(rules)
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    env::var(key)
        .ok()
        .map(|s| {
            s.parse()
                .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", key, e))
        })
        .transpose()
        .map(|opt| opt.unwrap_or(default))
}
