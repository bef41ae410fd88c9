//! Gateway-bridge event decoding.
//!
//! The ChirpStack gateway bridge publishes one `gw.UplinkFrame`,
//! `gw.DownlinkFrame` or `gw.DownlinkTxAck` per message, protobuf by
//! default with an optional JSON marshaler. Both forms carry the same
//! fields; the decoders here extract only what the analyzer uses.

use crate::error::AnalyzerError;
use crate::ingest::wire::{WireReader, WireValue};
use crate::model::GatewayLocation;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

/// Uplink frame as received by a gateway.
#[derive(Debug, Clone, Default)]
pub struct GatewayUplink {
    /// From rx-info; the dispatcher falls back to the topic gateway id
    /// when empty.
    pub gateway_id: String,
    pub phy_payload: Vec<u8>,
    pub frequency: u64,
    pub spreading_factor: Option<u8>,
    pub bandwidth: u32,
    /// Coding-rate offset 1..=4.
    pub code_rate: u32,
    pub rssi: i32,
    pub snr: f32,
    pub time: Option<DateTime<Utc>>,
    pub location: Option<GatewayLocation>,
    /// Helium-style metadata name, when present.
    pub gateway_name: Option<String>,
    /// Metadata `relay_id`; when set the packet is attributed to the
    /// relay and this gateway becomes the border gateway.
    pub relay_id: Option<String>,
}

/// Downlink command dispatched to a gateway. The gateway id comes from
/// the topic.
#[derive(Debug, Clone, Default)]
pub struct GatewayDownlink {
    pub gateway_id: String,
    pub phy_payload: Vec<u8>,
    pub frequency: u64,
    pub spreading_factor: Option<u8>,
    pub bandwidth: u32,
    pub code_rate: u32,
}

/// TX acknowledgement for a previously dispatched downlink.
#[derive(Debug, Clone, Default)]
pub struct GatewayTxAck {
    pub gateway_id: String,
    pub downlink_id: u32,
    pub status: String,
}

/// Map the `TxAckStatus` enum value to its display name.
pub fn tx_ack_status_name(code: u64) -> &'static str {
    match code {
        0 => "Ignored",
        1 => "OK",
        2 => "TooLate",
        3 => "TooEarly",
        4 => "CollisionPacket",
        5 => "CollisionBeacon",
        6 => "TxFreq",
        7 => "TxPower",
        8 => "GpsUnlocked",
        9 => "QueueFull",
        10 => "InternalError",
        11 => "DutyCycleOverflow",
        _ => "Unknown",
    }
}

/// Map a JSON `SCREAMING_SNAKE` status string to the same display names.
pub fn tx_ack_status_from_str(status: &str) -> String {
    if status == "OK" {
        return "OK".to_string();
    }
    status
        .split('_')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Protobuf wire decoding. Field numbers follow ChirpStack v4 gw.proto.
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct LoraModulation {
    bandwidth: u32,
    spreading_factor: Option<u8>,
    code_rate: u32,
}

fn decode_lora_modulation(buf: &[u8]) -> Result<LoraModulation, AnalyzerError> {
    let mut out = LoraModulation {
        code_rate: 1,
        ..Default::default()
    };
    let mut reader = WireReader::new(buf);
    while let Some((field, value)) = reader.next_field()? {
        match field {
            1 => out.bandwidth = value.as_u64() as u32,
            2 => out.spreading_factor = u8::try_from(value.as_u64()).ok(),
            3 => {
                let cr = crate::airtime::coding_rate_value(value.as_str());
                out.code_rate = cr;
            }
            4 => {
                let code = value.as_u64() as u32;
                if (1..=4).contains(&code) {
                    out.code_rate = code;
                }
            }
            _ => {}
        }
    }
    Ok(out)
}

// Modulation { oneof parameters { lora = 3 } }
fn decode_modulation(buf: &[u8]) -> Result<LoraModulation, AnalyzerError> {
    let mut reader = WireReader::new(buf);
    while let Some((field, value)) = reader.next_field()? {
        if field == 3 {
            return decode_lora_modulation(value.as_bytes());
        }
    }
    Ok(LoraModulation {
        code_rate: 1,
        ..Default::default()
    })
}

// UplinkTxInfo / DownlinkTxInfo: frequency = 1, modulation = 2 / 3.
fn decode_tx_info(
    buf: &[u8],
    modulation_field: u32,
) -> Result<(u64, LoraModulation), AnalyzerError> {
    let mut frequency = 0u64;
    let mut modulation = LoraModulation {
        code_rate: 1,
        ..Default::default()
    };
    let mut reader = WireReader::new(buf);
    while let Some((field, value)) = reader.next_field()? {
        if field == 1 {
            frequency = value.as_u64();
        } else if field == modulation_field {
            modulation = decode_modulation(value.as_bytes())?;
        }
    }
    Ok((frequency, modulation))
}

// common.Location: latitude = 1, longitude = 2 (doubles).
fn decode_location(buf: &[u8]) -> Result<Option<GatewayLocation>, AnalyzerError> {
    let mut latitude = 0.0;
    let mut longitude = 0.0;
    let mut reader = WireReader::new(buf);
    while let Some((field, value)) = reader.next_field()? {
        match field {
            1 => latitude = value.as_f64(),
            2 => longitude = value.as_f64(),
            _ => {}
        }
    }
    if latitude == 0.0 && longitude == 0.0 {
        return Ok(None);
    }
    Ok(Some(GatewayLocation {
        latitude,
        longitude,
    }))
}

// google.protobuf.Timestamp: seconds = 1, nanos = 2.
fn decode_timestamp(buf: &[u8]) -> Result<Option<DateTime<Utc>>, AnalyzerError> {
    let mut seconds = 0i64;
    let mut nanos = 0u32;
    let mut reader = WireReader::new(buf);
    while let Some((field, value)) = reader.next_field()? {
        match field {
            1 => seconds = value.as_u64() as i64,
            2 => nanos = value.as_u64() as u32,
            _ => {}
        }
    }
    Ok(Utc.timestamp_opt(seconds, nanos).single())
}

// google.protobuf.Struct string/number values, flattened to strings.
fn decode_metadata(buf: &[u8]) -> Result<Vec<(String, String)>, AnalyzerError> {
    let mut entries = Vec::new();
    let mut reader = WireReader::new(buf);
    while let Some((field, value)) = reader.next_field()? {
        if field != 1 {
            continue;
        }
        // Map entry: key = 1, value = 2 (Value message).
        let mut key = String::new();
        let mut val = String::new();
        let mut entry_reader = WireReader::new(value.as_bytes());
        while let Some((entry_field, entry_value)) = entry_reader.next_field()? {
            match entry_field {
                1 => key = entry_value.as_str().to_string(),
                2 => {
                    let mut value_reader = WireReader::new(entry_value.as_bytes());
                    while let Some((value_field, inner)) = value_reader.next_field()? {
                        match value_field {
                            2 => val = format!("{}", inner.as_f64()),
                            3 => val = inner.as_str().to_string(),
                            4 => val = (inner.as_u64() != 0).to_string(),
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }
        if !key.is_empty() {
            entries.push((key, val));
        }
    }
    Ok(entries)
}

#[derive(Debug, Default)]
struct RxInfo {
    gateway_id: String,
    rssi: i32,
    snr: f32,
    time: Option<DateTime<Utc>>,
    location: Option<GatewayLocation>,
    metadata: Vec<(String, String)>,
}

// UplinkRxInfo: gateway_id = 1, gw_time = 3, rssi = 5, snr = 6,
// location = 11, metadata = 13.
fn decode_rx_info(buf: &[u8]) -> Result<RxInfo, AnalyzerError> {
    let mut out = RxInfo::default();
    let mut reader = WireReader::new(buf);
    while let Some((field, value)) = reader.next_field()? {
        match field {
            1 => out.gateway_id = value.as_str().to_string(),
            3 => out.time = decode_timestamp(value.as_bytes())?,
            5 => out.rssi = value.as_i32(),
            6 => out.snr = value.as_f32(),
            11 => out.location = decode_location(value.as_bytes())?,
            13 => out.metadata = decode_metadata(value.as_bytes())?,
            _ => {}
        }
    }
    Ok(out)
}

fn metadata_lookup<'a>(metadata: &'a [(String, String)], key: &str) -> Option<&'a str> {
    metadata
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
        .filter(|v| !v.is_empty())
}

fn apply_rx_metadata(uplink: &mut GatewayUplink, rx: RxInfo) {
    uplink.gateway_id = rx.gateway_id;
    uplink.rssi = rx.rssi;
    uplink.snr = rx.snr;
    uplink.time = rx.time;

    // Location precedence: the Location field, then Helium metadata keys.
    uplink.location = rx.location.or_else(|| {
        let lat = metadata_lookup(&rx.metadata, "gateway_lat")?.parse().ok()?;
        let lon = metadata_lookup(&rx.metadata, "gateway_long")?.parse().ok()?;
        Some(GatewayLocation {
            latitude: lat,
            longitude: lon,
        })
    });
    uplink.gateway_name = metadata_lookup(&rx.metadata, "gateway_name").map(String::from);
    uplink.relay_id = metadata_lookup(&rx.metadata, "relay_id").map(String::from);
}

/// Decode a protobuf `gw.UplinkFrame`.
pub fn decode_uplink_protobuf(payload: &[u8]) -> Result<GatewayUplink, AnalyzerError> {
    let mut uplink = GatewayUplink {
        code_rate: 1,
        ..Default::default()
    };

    let mut reader = WireReader::new(payload);
    while let Some((field, value)) = reader.next_field()? {
        match field {
            1 => uplink.phy_payload = value.as_bytes().to_vec(),
            4 => {
                let (frequency, modulation) = decode_tx_info(value.as_bytes(), 2)?;
                uplink.frequency = frequency;
                uplink.bandwidth = modulation.bandwidth;
                uplink.spreading_factor = modulation.spreading_factor;
                uplink.code_rate = modulation.code_rate;
            }
            5 => {
                let rx = decode_rx_info(value.as_bytes())?;
                apply_rx_metadata(&mut uplink, rx);
            }
            _ => {}
        }
    }

    if uplink.phy_payload.is_empty() {
        return Err(AnalyzerError::Decode("uplink frame without PHYPayload".to_string()));
    }
    Ok(uplink)
}

/// Decode a protobuf `gw.DownlinkFrame`; the first item carries the
/// frame that will be transmitted.
pub fn decode_downlink_protobuf(payload: &[u8]) -> Result<GatewayDownlink, AnalyzerError> {
    let mut downlink = GatewayDownlink {
        code_rate: 1,
        ..Default::default()
    };
    let mut saw_item = false;

    let mut reader = WireReader::new(payload);
    while let Some((field, value)) = reader.next_field()? {
        match field {
            3 if !saw_item => {
                saw_item = true;
                let mut item_reader = WireReader::new(value.as_bytes());
                while let Some((item_field, item_value)) = item_reader.next_field()? {
                    match item_field {
                        1 => downlink.phy_payload = item_value.as_bytes().to_vec(),
                        3 => {
                            let (frequency, modulation) =
                                decode_tx_info(item_value.as_bytes(), 3)?;
                            downlink.frequency = frequency;
                            downlink.bandwidth = modulation.bandwidth;
                            downlink.spreading_factor = modulation.spreading_factor;
                            downlink.code_rate = modulation.code_rate;
                        }
                        _ => {}
                    }
                }
            }
            5 => downlink.gateway_id = value.as_str().to_string(),
            _ => {}
        }
    }

    if !saw_item {
        return Err(AnalyzerError::Decode("downlink frame without items".to_string()));
    }
    Ok(downlink)
}

/// Decode a protobuf `gw.DownlinkTxAck`.
pub fn decode_tx_ack_protobuf(payload: &[u8]) -> Result<GatewayTxAck, AnalyzerError> {
    let mut ack = GatewayTxAck::default();
    let mut reader = WireReader::new(payload);
    while let Some((field, value)) = reader.next_field()? {
        match field {
            3 if ack.status.is_empty() => {
                let mut item_reader = WireReader::new(value.as_bytes());
                while let Some((item_field, item_value)) = item_reader.next_field()? {
                    if item_field == 1 {
                        ack.status = tx_ack_status_name(item_value.as_u64()).to_string();
                    }
                }
            }
            4 => ack.downlink_id = value.as_u64() as u32,
            5 => ack.gateway_id = value.as_str().to_string(),
            _ => {}
        }
    }
    if ack.status.is_empty() {
        ack.status = tx_ack_status_name(0).to_string();
    }
    Ok(ack)
}

// ---------------------------------------------------------------------------
// JSON fallback with identical field semantics.
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonUplinkFrame {
    #[serde(default)]
    phy_payload: Option<String>,
    #[serde(default)]
    tx_info: Option<JsonTxInfo>,
    #[serde(default)]
    rx_info: Option<JsonRxInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonTxInfo {
    #[serde(default)]
    frequency: Option<serde_json::Value>,
    #[serde(default)]
    modulation: Option<JsonModulation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonModulation {
    #[serde(default)]
    lora: Option<JsonLoraModulation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonLoraModulation {
    #[serde(default)]
    bandwidth: Option<u32>,
    #[serde(default)]
    spreading_factor: Option<u8>,
    #[serde(default)]
    code_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonRxInfo {
    #[serde(default)]
    gateway_id: Option<String>,
    #[serde(default)]
    rssi: Option<i32>,
    #[serde(default)]
    snr: Option<f32>,
    #[serde(default)]
    gw_time: Option<String>,
    #[serde(default)]
    location: Option<JsonLocation>,
    #[serde(default)]
    metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct JsonLocation {
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonDownlinkFrame {
    #[serde(default)]
    gateway_id: Option<String>,
    #[serde(default)]
    items: Vec<JsonDownlinkItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonDownlinkItem {
    #[serde(default)]
    phy_payload: Option<String>,
    #[serde(default)]
    tx_info: Option<JsonTxInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonTxAck {
    #[serde(default)]
    gateway_id: Option<String>,
    #[serde(default)]
    downlink_id: Option<u32>,
    #[serde(default)]
    items: Vec<JsonTxAckItem>,
}

#[derive(Debug, Deserialize)]
struct JsonTxAckItem {
    #[serde(default)]
    status: Option<String>,
}

/// Numeric JSON fields occasionally arrive as strings; coerce where
/// trivial, else treat as a decode error upstream.
fn coerce_u64(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn decode_base64_payload(encoded: Option<&str>) -> Result<Vec<u8>, AnalyzerError> {
    let encoded = encoded
        .ok_or_else(|| AnalyzerError::Decode("frame without phyPayload".to_string()))?;
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| AnalyzerError::Decode(format!("invalid base64 PHYPayload: {}", e)))
}

fn apply_json_tx_info(
    tx_info: Option<&JsonTxInfo>,
) -> (u64, Option<u8>, u32, u32) {
    let mut frequency = 0;
    let mut spreading_factor = None;
    let mut bandwidth = 0;
    let mut code_rate = 1;
    if let Some(tx) = tx_info {
        frequency = tx.frequency.as_ref().and_then(coerce_u64).unwrap_or(0);
        if let Some(lora) = tx.modulation.as_ref().and_then(|m| m.lora.as_ref()) {
            bandwidth = lora.bandwidth.unwrap_or(0);
            spreading_factor = lora.spreading_factor;
            code_rate = lora
                .code_rate
                .as_deref()
                .map(crate::airtime::coding_rate_value)
                .unwrap_or(1);
        }
    }
    (frequency, spreading_factor, bandwidth, code_rate)
}

/// Decode a JSON-marshaled `gw.UplinkFrame`.
pub fn decode_uplink_json(payload: &[u8]) -> Result<GatewayUplink, AnalyzerError> {
    let frame: JsonUplinkFrame = serde_json::from_slice(payload)?;

    let (frequency, spreading_factor, bandwidth, code_rate) =
        apply_json_tx_info(frame.tx_info.as_ref());
    let mut uplink = GatewayUplink {
        phy_payload: decode_base64_payload(frame.phy_payload.as_deref())?,
        frequency,
        spreading_factor,
        bandwidth,
        code_rate,
        ..Default::default()
    };

    if let Some(rx) = frame.rx_info {
        uplink.gateway_id = rx.gateway_id.unwrap_or_default();
        uplink.rssi = rx.rssi.unwrap_or(0);
        uplink.snr = rx.snr.unwrap_or(0.0);
        uplink.time = rx
            .gw_time
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc));

        let metadata = rx.metadata.unwrap_or_default();
        let meta_str = |key: &str| -> Option<String> {
            metadata.get(key).and_then(|v| match v {
                serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
        };

        uplink.location = rx
            .location
            .and_then(|loc| match (loc.latitude, loc.longitude) {
                (Some(latitude), Some(longitude)) => Some(GatewayLocation {
                    latitude,
                    longitude,
                }),
                _ => None,
            })
            .or_else(|| {
                let latitude = meta_str("gateway_lat")?.parse().ok()?;
                let longitude = meta_str("gateway_long")?.parse().ok()?;
                Some(GatewayLocation {
                    latitude,
                    longitude,
                })
            });
        uplink.gateway_name = meta_str("gateway_name");
        uplink.relay_id = meta_str("relay_id");
    }

    Ok(uplink)
}

/// Decode a JSON-marshaled `gw.DownlinkFrame`.
pub fn decode_downlink_json(payload: &[u8]) -> Result<GatewayDownlink, AnalyzerError> {
    let frame: JsonDownlinkFrame = serde_json::from_slice(payload)?;
    let item = frame
        .items
        .first()
        .ok_or_else(|| AnalyzerError::Decode("downlink frame without items".to_string()))?;

    let (frequency, spreading_factor, bandwidth, code_rate) =
        apply_json_tx_info(item.tx_info.as_ref());
    Ok(GatewayDownlink {
        gateway_id: frame.gateway_id.unwrap_or_default(),
        phy_payload: decode_base64_payload(item.phy_payload.as_deref())?,
        frequency,
        spreading_factor,
        bandwidth,
        code_rate,
    })
}

/// Decode a JSON-marshaled `gw.DownlinkTxAck`.
pub fn decode_tx_ack_json(payload: &[u8]) -> Result<GatewayTxAck, AnalyzerError> {
    let ack: JsonTxAck = serde_json::from_slice(payload)?;
    let status = ack
        .items
        .first()
        .and_then(|item| item.status.as_deref())
        .map(tx_ack_status_from_str)
        .unwrap_or_else(|| tx_ack_status_name(0).to_string());

    Ok(GatewayTxAck {
        gateway_id: ack.gateway_id.unwrap_or_default(),
        downlink_id: ack.downlink_id.unwrap_or(0),
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::wire::encode;

    fn sample_phy_payload() -> Vec<u8> {
        // Unconfirmed data up, DevAddr 26011AAB, FCnt 1, FPort 1, 2-byte
        // payload, for a 16-byte PHYPayload total.
        let mut buf = vec![0x40, 0xAB, 0x1A, 0x01, 0x26, 0x00, 0x01, 0x00, 0x01];
        buf.extend_from_slice(&[0x11, 0x22, 0x33]);
        buf.extend_from_slice(&[0; 4]);
        buf
    }

    fn encode_lora_modulation(bandwidth: u32, sf: u8, code_rate: u32) -> Vec<u8> {
        let mut lora = Vec::new();
        encode::field_varint(&mut lora, 1, bandwidth as u64);
        encode::field_varint(&mut lora, 2, sf as u64);
        encode::field_varint(&mut lora, 4, code_rate as u64);
        let mut modulation = Vec::new();
        encode::field_bytes(&mut modulation, 3, &lora);
        modulation
    }

    fn encode_uplink(
        gateway_id: &str,
        rssi: i32,
        snr: f32,
        metadata: &[(&str, &str)],
    ) -> Vec<u8> {
        let mut tx_info = Vec::new();
        encode::field_varint(&mut tx_info, 1, 868_100_000);
        encode::field_bytes(&mut tx_info, 2, &encode_lora_modulation(125_000, 7, 1));

        let mut rx_info = Vec::new();
        encode::field_str(&mut rx_info, 1, gateway_id);
        encode::field_int32(&mut rx_info, 5, rssi);
        encode::field_float(&mut rx_info, 6, snr);

        if !metadata.is_empty() {
            let mut meta = Vec::new();
            for (key, value) in metadata {
                let mut value_msg = Vec::new();
                encode::field_str(&mut value_msg, 3, value);
                let mut entry = Vec::new();
                encode::field_str(&mut entry, 1, key);
                encode::field_bytes(&mut entry, 2, &value_msg);
                encode::field_bytes(&mut meta, 1, &entry);
            }
            encode::field_bytes(&mut rx_info, 13, &meta);
        }

        let mut frame = Vec::new();
        encode::field_bytes(&mut frame, 1, &sample_phy_payload());
        encode::field_bytes(&mut frame, 4, &tx_info);
        encode::field_bytes(&mut frame, 5, &rx_info);
        frame
    }

    #[test]
    fn test_decode_uplink_protobuf() {
        let frame = encode_uplink("a84041ffff1ec39d", -97, 8.5, &[]);
        let uplink = decode_uplink_protobuf(&frame).unwrap();

        assert_eq!(uplink.gateway_id, "a84041ffff1ec39d");
        assert_eq!(uplink.frequency, 868_100_000);
        assert_eq!(uplink.spreading_factor, Some(7));
        assert_eq!(uplink.bandwidth, 125_000);
        assert_eq!(uplink.code_rate, 1);
        assert_eq!(uplink.rssi, -97);
        assert_eq!(uplink.snr, 8.5);
        assert_eq!(uplink.phy_payload.len(), 16);
        assert!(uplink.relay_id.is_none());
    }

    #[test]
    fn test_decode_uplink_helium_metadata() {
        let frame = encode_uplink(
            "helium-hotspot",
            -120,
            -3.2,
            &[
                ("gateway_lat", "52.3702"),
                ("gateway_long", "4.8952"),
                ("gateway_name", "fancy-hotspot-name"),
            ],
        );
        let uplink = decode_uplink_protobuf(&frame).unwrap();

        let location = uplink.location.unwrap();
        assert!((location.latitude - 52.3702).abs() < 1e-9);
        assert!((location.longitude - 4.8952).abs() < 1e-9);
        assert_eq!(uplink.gateway_name.as_deref(), Some("fancy-hotspot-name"));
    }

    #[test]
    fn test_decode_uplink_relay_metadata() {
        let frame = encode_uplink("BBBB", -80, 5.0, &[("relay_id", "AAAA")]);
        let uplink = decode_uplink_protobuf(&frame).unwrap();
        assert_eq!(uplink.gateway_id, "BBBB");
        assert_eq!(uplink.relay_id.as_deref(), Some("AAAA"));
    }

    #[test]
    fn test_decode_uplink_json_equivalence() {
        let protobuf_frame = encode_uplink("a84041ffff1ec39d", -97, 8.5, &[]);
        let from_protobuf = decode_uplink_protobuf(&protobuf_frame).unwrap();

        let json = serde_json::json!({
            "phyPayload": base64::engine::general_purpose::STANDARD.encode(sample_phy_payload()),
            "txInfo": {
                "frequency": 868100000u64,
                "modulation": {"lora": {"bandwidth": 125000, "spreadingFactor": 7, "codeRate": "CR_4_5"}}
            },
            "rxInfo": {"gatewayId": "a84041ffff1ec39d", "rssi": -97, "snr": 8.5}
        });
        let from_json = decode_uplink_json(json.to_string().as_bytes()).unwrap();

        assert_eq!(from_protobuf.gateway_id, from_json.gateway_id);
        assert_eq!(from_protobuf.phy_payload, from_json.phy_payload);
        assert_eq!(from_protobuf.frequency, from_json.frequency);
        assert_eq!(from_protobuf.spreading_factor, from_json.spreading_factor);
        assert_eq!(from_protobuf.bandwidth, from_json.bandwidth);
        assert_eq!(from_protobuf.code_rate, from_json.code_rate);
        assert_eq!(from_protobuf.rssi, from_json.rssi);
        assert_eq!(from_protobuf.snr, from_json.snr);
    }

    #[test]
    fn test_decode_uplink_json_string_frequency() {
        let json = serde_json::json!({
            "phyPayload": base64::engine::general_purpose::STANDARD.encode(sample_phy_payload()),
            "txInfo": {"frequency": "868100000"},
            "rxInfo": {"gatewayId": "gw"}
        });
        let uplink = decode_uplink_json(json.to_string().as_bytes()).unwrap();
        assert_eq!(uplink.frequency, 868_100_000);
        assert_eq!(uplink.spreading_factor, None);
    }

    #[test]
    fn test_decode_downlink_protobuf() {
        let mut tx_info = Vec::new();
        encode::field_varint(&mut tx_info, 1, 869_525_000);
        encode::field_bytes(&mut tx_info, 3, &encode_lora_modulation(125_000, 9, 1));

        let mut item = Vec::new();
        encode::field_bytes(&mut item, 1, &[0x60, 1, 2, 3, 4, 0, 7, 0, 0, 0, 0, 0]);
        encode::field_bytes(&mut item, 3, &tx_info);

        let mut frame = Vec::new();
        encode::field_varint(&mut frame, 1, 42);
        encode::field_bytes(&mut frame, 3, &item);
        encode::field_str(&mut frame, 5, "a84041ffff1ec39d");

        let downlink = decode_downlink_protobuf(&frame).unwrap();
        assert_eq!(downlink.gateway_id, "a84041ffff1ec39d");
        assert_eq!(downlink.frequency, 869_525_000);
        assert_eq!(downlink.spreading_factor, Some(9));
        assert_eq!(downlink.phy_payload.len(), 12);
    }

    #[test]
    fn test_decode_tx_ack_protobuf() {
        let mut item = Vec::new();
        encode::field_varint(&mut item, 1, 4); // COLLISION_PACKET

        let mut frame = Vec::new();
        encode::field_bytes(&mut frame, 3, &item);
        encode::field_varint(&mut frame, 4, 42);
        encode::field_str(&mut frame, 5, "a84041ffff1ec39d");

        let ack = decode_tx_ack_protobuf(&frame).unwrap();
        assert_eq!(ack.gateway_id, "a84041ffff1ec39d");
        assert_eq!(ack.downlink_id, 42);
        assert_eq!(ack.status, "CollisionPacket");
    }

    #[test]
    fn test_decode_tx_ack_json() {
        let json = serde_json::json!({
            "gatewayId": "a84041ffff1ec39d",
            "downlinkId": 42,
            "items": [{"status": "DUTY_CYCLE_OVERFLOW"}]
        });
        let ack = decode_tx_ack_json(json.to_string().as_bytes()).unwrap();
        assert_eq!(ack.downlink_id, 42);
        assert_eq!(ack.status, "DutyCycleOverflow");
    }

    #[test]
    fn test_tx_ack_status_names() {
        assert_eq!(tx_ack_status_name(1), "OK");
        assert_eq!(tx_ack_status_name(11), "DutyCycleOverflow");
        assert_eq!(tx_ack_status_name(99), "Unknown");
        assert_eq!(tx_ack_status_from_str("OK"), "OK");
        assert_eq!(tx_ack_status_from_str("TOO_LATE"), "TooLate");
    }

    #[test]
    fn test_decode_uplink_missing_payload_fails() {
        let mut rx_info = Vec::new();
        encode::field_str(&mut rx_info, 1, "gw");
        let mut frame = Vec::new();
        encode::field_bytes(&mut frame, 5, &rx_info);
        assert!(decode_uplink_protobuf(&frame).is_err());

        let json = serde_json::json!({"rxInfo": {"gatewayId": "gw"}});
        assert!(decode_uplink_json(json.to_string().as_bytes()).is_err());
    }
}
