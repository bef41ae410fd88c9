//! ChirpStack application-bus event decoding.
//!
//! Application events are always JSON. Uplinks shadow the gateway stream
//! keyed on DevEUI; txack/ack/command events track the downlink side.

use crate::error::AnalyzerError;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Application uplink event.
#[derive(Debug, Clone, Default)]
pub struct AppUplink {
    pub dev_eui: String,
    pub device_name: String,
    pub application_id: String,
    pub application_name: Option<String>,
    pub dev_addr: Option<String>,
    pub time: Option<DateTime<Utc>>,
    pub f_cnt: Option<u32>,
    pub f_port: Option<u8>,
    pub confirmed: Option<bool>,
    pub payload_size: u32,
    pub frequency: u64,
    pub spreading_factor: Option<u8>,
    pub bandwidth: u32,
    pub rssi: i32,
    pub snr: f32,
}

/// Downlink command enqueued for a device.
#[derive(Debug, Clone, Default)]
pub struct AppDownlink {
    pub dev_eui: String,
    pub application_id: String,
    pub f_port: Option<u8>,
    pub confirmed: Option<bool>,
    pub payload_size: u32,
}

/// Gateway-confirmed transmission of a queued downlink.
#[derive(Debug, Clone, Default)]
pub struct AppTxAck {
    pub dev_eui: String,
    pub device_name: String,
    pub application_id: String,
    pub application_name: Option<String>,
    pub time: Option<DateTime<Utc>>,
    pub f_cnt_down: Option<u32>,
}

/// Device acknowledgement of a confirmed downlink.
#[derive(Debug, Clone, Default)]
pub struct AppAck {
    pub dev_eui: String,
    pub device_name: String,
    pub application_id: String,
    pub application_name: Option<String>,
    pub time: Option<DateTime<Utc>>,
    pub acknowledged: bool,
    pub f_cnt_down: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceInfo {
    dev_eui: String,
    #[serde(default)]
    device_name: Option<String>,
    application_id: String,
    #[serde(default)]
    application_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UplinkEvent {
    #[serde(default)]
    time: Option<String>,
    device_info: DeviceInfo,
    #[serde(default)]
    dev_addr: Option<String>,
    #[serde(default)]
    f_cnt: Option<u32>,
    #[serde(default)]
    f_port: Option<u8>,
    #[serde(default)]
    confirmed: Option<bool>,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    rx_info: Vec<UplinkRxInfo>,
    #[serde(default)]
    tx_info: Option<UplinkTxInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UplinkRxInfo {
    #[serde(default)]
    rssi: Option<i32>,
    #[serde(default)]
    snr: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UplinkTxInfo {
    #[serde(default)]
    frequency: Option<u64>,
    #[serde(default)]
    modulation: Option<Modulation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Modulation {
    #[serde(default)]
    lora: Option<LoraModulation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoraModulation {
    #[serde(default)]
    bandwidth: Option<u32>,
    #[serde(default)]
    spreading_factor: Option<u8>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TxAckEvent {
    #[serde(default)]
    time: Option<String>,
    device_info: DeviceInfo,
    #[serde(default)]
    f_cnt_down: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AckEvent {
    #[serde(default)]
    time: Option<String>,
    device_info: DeviceInfo,
    #[serde(default)]
    acknowledged: bool,
    #[serde(default)]
    f_cnt_down: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownlinkCommand {
    #[serde(default)]
    dev_eui: Option<String>,
    #[serde(default)]
    f_port: Option<u8>,
    #[serde(default)]
    confirmed: Option<bool>,
    #[serde(default)]
    data: Option<String>,
}

fn parse_time(time: Option<&str>) -> Option<DateTime<Utc>> {
    time.and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn payload_len(data: Option<&str>) -> u32 {
    data.and_then(|d| {
        base64::engine::general_purpose::STANDARD
            .decode(d)
            .ok()
    })
    .map(|bytes| bytes.len() as u32)
    .unwrap_or(0)
}

pub fn decode_app_uplink(payload: &[u8]) -> Result<AppUplink, AnalyzerError> {
    let event: UplinkEvent = serde_json::from_slice(payload)?;

    let (frequency, spreading_factor, bandwidth) = match &event.tx_info {
        Some(tx) => {
            let lora = tx.modulation.as_ref().and_then(|m| m.lora.as_ref());
            (
                tx.frequency.unwrap_or(0),
                lora.and_then(|l| l.spreading_factor),
                lora.and_then(|l| l.bandwidth).unwrap_or(0),
            )
        }
        None => (0, None, 0),
    };

    Ok(AppUplink {
        dev_eui: event.device_info.dev_eui,
        device_name: event.device_info.device_name.unwrap_or_default(),
        application_id: event.device_info.application_id,
        application_name: event.device_info.application_name,
        dev_addr: event.dev_addr.map(|a| a.to_uppercase()),
        time: parse_time(event.time.as_deref()),
        f_cnt: event.f_cnt,
        f_port: event.f_port,
        confirmed: event.confirmed,
        payload_size: payload_len(event.data.as_deref()),
        frequency,
        spreading_factor,
        bandwidth,
        rssi: event.rx_info.first().and_then(|rx| rx.rssi).unwrap_or(0),
        snr: event.rx_info.first().and_then(|rx| rx.snr).unwrap_or(0.0),
    })
}

pub fn decode_app_tx_ack(payload: &[u8]) -> Result<AppTxAck, AnalyzerError> {
    let event: TxAckEvent = serde_json::from_slice(payload)?;
    Ok(AppTxAck {
        dev_eui: event.device_info.dev_eui,
        device_name: event.device_info.device_name.unwrap_or_default(),
        application_id: event.device_info.application_id,
        application_name: event.device_info.application_name,
        time: parse_time(event.time.as_deref()),
        f_cnt_down: event.f_cnt_down,
    })
}

pub fn decode_app_ack(payload: &[u8]) -> Result<AppAck, AnalyzerError> {
    let event: AckEvent = serde_json::from_slice(payload)?;
    Ok(AppAck {
        dev_eui: event.device_info.dev_eui,
        device_name: event.device_info.device_name.unwrap_or_default(),
        application_id: event.device_info.application_id,
        application_name: event.device_info.application_name,
        time: parse_time(event.time.as_deref()),
        acknowledged: event.acknowledged,
        f_cnt_down: event.f_cnt_down,
    })
}

/// Downlink commands carry no deviceInfo block; the topic supplies the
/// application id and DevEUI.
pub fn decode_app_downlink(
    payload: &[u8],
    topic_application_id: &str,
    topic_dev_eui: &str,
) -> Result<AppDownlink, AnalyzerError> {
    let command: DownlinkCommand = serde_json::from_slice(payload)?;
    Ok(AppDownlink {
        dev_eui: command
            .dev_eui
            .unwrap_or_else(|| topic_dev_eui.to_string()),
        application_id: topic_application_id.to_string(),
        f_port: command.f_port,
        confirmed: command.confirmed,
        payload_size: payload_len(command.data.as_deref()),
    })
}
