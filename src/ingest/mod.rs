//! MQTT ingestion: topic classification and event decoding.

pub mod application;
pub mod gateway;
pub mod mqtt;
pub mod wire;

use application::{AppAck, AppDownlink, AppTxAck, AppUplink};
use gateway::{GatewayDownlink, GatewayTxAck, GatewayUplink};

/// A decoded bus event, ready for the pipeline worker.
#[derive(Debug, Clone)]
pub enum Event {
    GatewayUplink(GatewayUplink),
    GatewayDownlink(GatewayDownlink),
    GatewayTxAck(GatewayTxAck),
    AppUplink(AppUplink),
    AppDownlink(AppDownlink),
    AppTxAck(AppTxAck),
    AppAck(AppAck),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayEventKind {
    Up,
    Down,
    Ack,
    Stats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEventKind {
    Up,
    TxAck,
    Ack,
    CommandDown,
}

/// Topic shape of an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicKind {
    /// `<region>/gateway/{id}/event/{up|down|ack|stats}` (region prefix
    /// optional).
    Gateway {
        gateway_id: String,
        kind: GatewayEventKind,
    },
    /// `application/{appId}/device/{devEui}/event/{up|txack|ack}` or
    /// `application/{appId}/device/{devEui}/command/down`.
    Application {
        application_id: String,
        dev_eui: String,
        kind: AppEventKind,
    },
    Unknown,
}

/// Classify a topic by shape. Unknown shapes are dropped by the caller.
pub fn classify_topic(topic: &str) -> TopicKind {
    let segments: Vec<&str> = topic.split('/').collect();

    for i in 0..segments.len() {
        if segments[i] == "gateway" && i + 3 < segments.len() && segments[i + 2] == "event" {
            let kind = match segments[i + 3] {
                "up" => GatewayEventKind::Up,
                "down" => GatewayEventKind::Down,
                "ack" => GatewayEventKind::Ack,
                "stats" => GatewayEventKind::Stats,
                _ => return TopicKind::Unknown,
            };
            return TopicKind::Gateway {
                gateway_id: segments[i + 1].to_string(),
                kind,
            };
        }

        if segments[i] == "application" && i + 5 < segments.len() && segments[i + 2] == "device" {
            let kind = match (segments[i + 4], segments[i + 5]) {
                ("event", "up") => AppEventKind::Up,
                ("event", "txack") => AppEventKind::TxAck,
                ("event", "ack") => AppEventKind::Ack,
                ("command", "down") => AppEventKind::CommandDown,
                _ => return TopicKind::Unknown,
            };
            return TopicKind::Application {
                application_id: segments[i + 1].to_string(),
                dev_eui: segments[i + 3].to_string(),
                kind,
            };
        }
    }

    TopicKind::Unknown
}
