use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Packet classification for the gateway-side stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketType {
    Data,
    JoinRequest,
    Downlink,
    TxAck,
}

impl PacketType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PacketType::Data => "data",
            PacketType::JoinRequest => "join_request",
            PacketType::Downlink => "downlink",
            PacketType::TxAck => "tx_ack",
        }
    }

    /// Uplinks are the only rows with meaningful RSSI/SNR.
    pub fn is_uplink(&self) -> bool {
        matches!(self, PacketType::Data | PacketType::JoinRequest)
    }
}

impl std::str::FromStr for PacketType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "data" => Ok(PacketType::Data),
            "join_request" => Ok(PacketType::JoinRequest),
            "downlink" => Ok(PacketType::Downlink),
            "tx_ack" => Ok(PacketType::TxAck),
            other => Err(format!("unknown packet type: {}", other)),
        }
    }
}

/// The canonical record emitted by the gateway pipeline.
///
/// Field presence follows the packet type: `dev_addr` for data/downlink,
/// `join_eui`/`dev_eui` for join requests, correlation id in `f_cnt` and
/// status name in `operator` for tx acks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedPacket {
    pub timestamp: DateTime<Utc>,

    /// Receiving gateway; for relayed packets this is the relay id and
    /// `border_gateway_id` holds the forwarding gateway.
    pub gateway_id: String,
    pub border_gateway_id: Option<String>,

    pub packet_type: PacketType,

    pub dev_addr: Option<String>,
    pub join_eui: Option<String>,
    pub dev_eui: Option<String>,

    /// Resolved operator name, "Unknown" on lookup miss, "Private" for
    /// printable-ASCII JoinEUIs, or the tx-ack status name.
    pub operator: String,

    pub frequency: u64,
    pub spreading_factor: Option<u8>,
    pub bandwidth: u32,
    pub rssi: i32,
    pub snr: f32,
    pub payload_size: u32,
    pub airtime_us: i64,

    pub f_cnt: Option<u32>,
    pub f_port: Option<u8>,
    pub confirmed: Option<bool>,

    /// Opaque token linking post-join packets to their join event.
    pub session_id: Option<String>,
}

/// Application-sourced shadow of an uplink, keyed on DevEUI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsPacket {
    pub timestamp: DateTime<Utc>,

    pub dev_eui: String,
    pub dev_addr: Option<String>,
    pub device_name: String,
    pub application_id: String,

    /// Application name when known, application id otherwise.
    pub operator: String,

    pub packet_type: PacketType,
    pub tx_status: Option<String>,

    pub frequency: u64,
    pub spreading_factor: Option<u8>,
    pub bandwidth: u32,
    pub rssi: i32,
    pub snr: f32,
    pub payload_size: u32,
    pub airtime_us: i64,

    pub f_cnt: Option<u32>,
    pub f_port: Option<u8>,
    pub confirmed: Option<bool>,
}

/// Subscriber-bound wire form of a freshly parsed packet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivePacket {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub gateway_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub border_gateway_id: Option<String>,
    #[serde(rename = "type")]
    pub packet_type: PacketType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dev_addr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dev_eui: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub join_eui: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    pub operator: String,
    /// "SF{sf}BW{bw_khz}", empty when the modulation is unknown.
    pub data_rate: String,
    /// MHz.
    pub frequency: f64,
    pub snr: f32,
    pub rssi: i32,
    pub payload_size: u32,
    pub airtime_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub f_cnt: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub f_port: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

fn data_rate_string(sf: Option<u8>, bandwidth: u32) -> String {
    match sf {
        Some(sf) => format!("SF{}BW{}", sf, bandwidth / 1000),
        None => String::new(),
    }
}

impl LivePacket {
    pub fn from_packet(p: &ParsedPacket, gateway_name: Option<String>) -> Self {
        Self {
            timestamp: p.timestamp.timestamp_millis(),
            gateway_id: p.gateway_id.clone(),
            gateway_name,
            border_gateway_id: p.border_gateway_id.clone(),
            packet_type: p.packet_type,
            dev_addr: p.dev_addr.clone(),
            dev_eui: p.dev_eui.clone(),
            join_eui: p.join_eui.clone(),
            device_name: None,
            operator: p.operator.clone(),
            data_rate: data_rate_string(p.spreading_factor, p.bandwidth),
            frequency: p.frequency as f64 / 1_000_000.0,
            snr: p.snr,
            rssi: p.rssi,
            payload_size: p.payload_size,
            airtime_ms: p.airtime_us as f64 / 1000.0,
            f_cnt: p.f_cnt,
            f_port: p.f_port,
            confirmed: p.confirmed,
            tx_status: match p.packet_type {
                PacketType::TxAck => Some(p.operator.clone()),
                _ => None,
            },
            source: None,
        }
    }

    pub fn from_cs_packet(p: &CsPacket) -> Self {
        Self {
            timestamp: p.timestamp.timestamp_millis(),
            gateway_id: String::new(),
            gateway_name: None,
            border_gateway_id: None,
            packet_type: p.packet_type,
            dev_addr: p.dev_addr.clone(),
            dev_eui: Some(p.dev_eui.clone()),
            join_eui: None,
            device_name: Some(p.device_name.clone()),
            operator: p.operator.clone(),
            data_rate: data_rate_string(p.spreading_factor, p.bandwidth),
            frequency: p.frequency as f64 / 1_000_000.0,
            snr: p.snr,
            rssi: p.rssi,
            payload_size: p.payload_size,
            airtime_ms: p.airtime_us as f64 / 1000.0,
            f_cnt: p.f_cnt,
            f_port: p.f_port,
            confirmed: p.confirmed,
            tx_status: p.tx_status.clone(),
            source: Some("chirpstack".to_string()),
        }
    }
}
