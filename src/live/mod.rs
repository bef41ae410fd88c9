//! Real-time broadcaster.
//!
//! Subscribers register a compiled filter and receive serialized live
//! packets through a bounded channel. Delivery is best-effort and
//! at-most-once per connection: a full or closed sink drops the
//! subscriber silently. The broadcaster also owns the in-memory gateway
//! and ChirpStack device metadata caches, rebuilt by writer upserts.

pub mod filter;

pub use filter::{DevAddrPrefix, Filter, FilterTarget, Ownership, SourceMode};

use crate::model::{CsDeviceUpsert, CsPacket, GatewayUpsert, LivePacket, PacketType, ParsedPacket};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Per-subscriber sink depth; a slow consumer overflows and is dropped.
pub const SUBSCRIBER_BUFFER: usize = 256;

#[derive(Debug, Clone, Default)]
pub struct GatewayMeta {
    pub name: Option<String>,
    pub alias: Option<String>,
    pub group_name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CsDeviceMeta {
    pub device_name: String,
    pub application_name: Option<String>,
    pub dev_addr: Option<String>,
}

struct Subscriber {
    filter: Filter,
    sink: mpsc::Sender<String>,
}

pub struct Broadcaster {
    subscribers: Mutex<HashMap<u64, Arc<Subscriber>>>,
    next_id: AtomicU64,
    gateways: DashMap<String, GatewayMeta>,
    devices: DashMap<String, CsDeviceMeta>,
    /// Reverse DevAddr -> DevEUI index for routing gateway downlinks to
    /// ChirpStack subscribers.
    dev_addr_index: DashMap<String, String>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            gateways: DashMap::new(),
            devices: DashMap::new(),
            dev_addr_index: DashMap::new(),
        }
    }

    /// Register a subscriber; the returned receiver yields serialized
    /// live packets.
    pub fn subscribe(&self, filter: Filter) -> (u64, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .insert(id, Arc::new(Subscriber { filter, sink: tx }));
        (id, rx)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().remove(&id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Snapshot the membership so sends happen outside the lock.
    fn snapshot(&self) -> Vec<(u64, Arc<Subscriber>)> {
        self.subscribers
            .lock()
            .iter()
            .map(|(id, sub)| (*id, sub.clone()))
            .collect()
    }

    fn drop_subscribers(&self, ids: &[u64]) {
        if ids.is_empty() {
            return;
        }
        let mut subscribers = self.subscribers.lock();
        for id in ids {
            subscribers.remove(id);
            debug!("dropped live subscriber {}", id);
        }
    }

    /// Fan a gateway-pipeline packet out to matching subscribers.
    pub fn publish_packet(&self, packet: &ParsedPacket) {
        let meta = self
            .gateways
            .get(packet.gateway_id.as_str())
            .map(|entry| entry.value().clone())
            .unwrap_or_default();

        let target = FilterTarget {
            gateway_id: &packet.gateway_id,
            gateway_name: meta.name.as_deref(),
            gateway_alias: meta.alias.as_deref(),
            gateway_group: meta.group_name.as_deref(),
            packet_type: packet.packet_type,
            rssi: packet.rssi,
            dev_addr: packet.dev_addr.as_deref(),
            dev_eui: packet.dev_eui.as_deref(),
            join_eui: packet.join_eui.as_deref(),
            operator: &packet.operator,
        };

        let gateway_name = meta.name.clone().or_else(|| meta.alias.clone());
        let mut gateway_payload: Option<String> = None;
        let mut cs_payload: Option<Option<String>> = None;
        let mut dead = Vec::new();

        for (id, sub) in self.snapshot() {
            match sub.filter.source {
                SourceMode::Gateway => {
                    if !sub.filter.matches(&target) {
                        continue;
                    }
                    let payload = gateway_payload.get_or_insert_with(|| {
                        let live = LivePacket::from_packet(packet, gateway_name.clone());
                        serde_json::to_string(&live).unwrap_or_default()
                    });
                    if sub.sink.try_send(payload.clone()).is_err() {
                        dead.push(id);
                    }
                }
                SourceMode::Chirpstack => {
                    // ChirpStack subscribers see gateway downlinks whose
                    // DevAddr maps to a known device.
                    let payload = cs_payload
                        .get_or_insert_with(|| self.cs_mirror_payload(packet, &gateway_name));
                    let payload = match payload {
                        Some(p) => p,
                        None => continue,
                    };
                    if !sub.filter.matches(&target) {
                        continue;
                    }
                    if sub.sink.try_send(payload.clone()).is_err() {
                        dead.push(id);
                    }
                }
            }
        }

        self.drop_subscribers(&dead);
    }

    /// Serialized ChirpStack-flavored mirror of a gateway downlink, or
    /// `None` when the DevAddr is unknown to the device cache.
    fn cs_mirror_payload(
        &self,
        packet: &ParsedPacket,
        gateway_name: &Option<String>,
    ) -> Option<String> {
        if packet.packet_type != PacketType::Downlink {
            return None;
        }
        let dev_addr = packet.dev_addr.as_deref()?;
        let dev_eui = self
            .dev_addr_index
            .get(dev_addr)
            .map(|entry| entry.value().clone())?;
        let meta = self
            .devices
            .get(dev_eui.as_str())
            .map(|entry| entry.value().clone())
            .unwrap_or_default();

        let mut live = LivePacket::from_packet(packet, gateway_name.clone());
        live.dev_eui = Some(dev_eui);
        live.device_name = Some(meta.device_name);
        live.source = Some("chirpstack".to_string());
        serde_json::to_string(&live).ok()
    }

    /// Fan an application-bus packet out to ChirpStack subscribers.
    pub fn publish_cs_packet(&self, packet: &CsPacket) {
        let target = FilterTarget {
            gateway_id: "",
            gateway_name: None,
            gateway_alias: None,
            gateway_group: None,
            packet_type: packet.packet_type,
            rssi: packet.rssi,
            dev_addr: packet.dev_addr.as_deref(),
            dev_eui: Some(&packet.dev_eui),
            join_eui: None,
            operator: &packet.operator,
        };

        let mut payload: Option<String> = None;
        let mut dead = Vec::new();

        for (id, sub) in self.snapshot() {
            if sub.filter.source != SourceMode::Chirpstack {
                continue;
            }
            if !sub.filter.matches(&target) {
                continue;
            }
            let payload = payload.get_or_insert_with(|| {
                serde_json::to_string(&LivePacket::from_cs_packet(packet)).unwrap_or_default()
            });
            if sub.sink.try_send(payload.clone()).is_err() {
                dead.push(id);
            }
        }

        self.drop_subscribers(&dead);
    }

    /// Refresh the gateway cache from an upsert; absent fields keep
    /// their cached value.
    pub fn update_gateway(&self, upsert: &GatewayUpsert) {
        let mut entry = self
            .gateways
            .entry(upsert.gateway_id.clone())
            .or_default();
        if let Some(name) = &upsert.name {
            entry.name = Some(name.clone());
        }
        if let Some(alias) = &upsert.alias {
            entry.alias = Some(alias.clone());
        }
        if let Some(group) = &upsert.group_name {
            entry.group_name = Some(group.clone());
        }
    }

    /// Refresh the device cache and the reverse DevAddr index.
    pub fn update_cs_device(&self, upsert: &CsDeviceUpsert) {
        let mut entry = self.devices.entry(upsert.dev_eui.clone()).or_default();
        if !upsert.device_name.is_empty() {
            entry.device_name = upsert.device_name.clone();
        }
        if let Some(name) = &upsert.application_name {
            entry.application_name = Some(name.clone());
        }
        if let Some(dev_addr) = &upsert.dev_addr {
            entry.dev_addr = Some(dev_addr.clone());
            self.dev_addr_index
                .insert(dev_addr.clone(), upsert.dev_eui.clone());
        }
    }

    pub fn gateway_meta(&self, gateway_id: &str) -> Option<GatewayMeta> {
        self.gateways
            .get(gateway_id)
            .map(|entry| entry.value().clone())
    }

    pub fn resolve_dev_addr(&self, dev_addr: &str) -> Option<String> {
        self.dev_addr_index
            .get(dev_addr)
            .map(|entry| entry.value().clone())
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn data_packet(gateway_id: &str, dev_addr: &str, rssi: i32) -> ParsedPacket {
        ParsedPacket {
            timestamp: Utc::now(),
            gateway_id: gateway_id.to_string(),
            border_gateway_id: None,
            packet_type: PacketType::Data,
            dev_addr: Some(dev_addr.to_string()),
            join_eui: None,
            dev_eui: None,
            operator: "The Things Network".to_string(),
            frequency: 868_100_000,
            spreading_factor: Some(7),
            bandwidth: 125_000,
            rssi,
            snr: 8.5,
            payload_size: 16,
            airtime_us: 51_456,
            f_cnt: Some(1),
            f_port: Some(1),
            confirmed: Some(false),
            session_id: None,
        }
    }

    #[test]
    fn test_subscribe_receive_unsubscribe() {
        let broadcaster = Broadcaster::new();
        let (id, mut rx) = broadcaster.subscribe(Filter::default());
        assert_eq!(broadcaster.subscriber_count(), 1);

        broadcaster.publish_packet(&data_packet("gw", "26011AAB", -50));
        let payload = rx.try_recv().unwrap();
        let json: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(json["type"], "data");
        assert_eq!(json["dev_addr"], "26011AAB");

        broadcaster.unsubscribe(id);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn test_filtering_is_per_subscriber() {
        let broadcaster = Broadcaster::new();
        let (_, mut all_rx) = broadcaster.subscribe(Filter::default());
        let (_, mut strong_rx) = broadcaster.subscribe(Filter {
            rssi_min: Some(-60),
            ..Default::default()
        });

        broadcaster.publish_packet(&data_packet("gw", "26011AAB", -90));
        assert!(all_rx.try_recv().is_ok());
        assert!(strong_rx.try_recv().is_err());
    }

    #[test]
    fn test_spec_live_filter_scenario() {
        // types=[data], rssi_min=-100, owned 26000000/7.
        let broadcaster = Broadcaster::new();
        let (_, mut rx) = broadcaster.subscribe(Filter {
            packet_types: Some(vec![PacketType::Data]),
            rssi_min: Some(-100),
            ownership: Some(Ownership::Owned),
            prefixes: vec![DevAddrPrefix::parse("26000000/7").unwrap()],
            ..Default::default()
        });

        broadcaster.publish_packet(&data_packet("gw", "26011AAB", -97));
        assert!(rx.try_recv().is_ok(), "matching packet should arrive");

        broadcaster.publish_packet(&data_packet("gw", "26011AAB", -110));
        assert!(rx.try_recv().is_err(), "weak signal filtered");

        broadcaster.publish_packet(&data_packet("gw", "78000001", -50));
        assert!(rx.try_recv().is_err(), "foreign DevAddr filtered");
    }

    #[test]
    fn test_gateway_cache_enriches_live_packets() {
        let broadcaster = Broadcaster::new();
        broadcaster.update_gateway(&GatewayUpsert {
            gateway_id: "gw".to_string(),
            name: Some("rooftop".to_string()),
            ..Default::default()
        });

        let (_, mut rx) = broadcaster.subscribe(Filter {
            search: Some("rooftop".to_string()),
            ..Default::default()
        });
        broadcaster.publish_packet(&data_packet("gw", "26011AAB", -50));

        let payload = rx.try_recv().unwrap();
        let json: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(json["gateway_name"], "rooftop");
    }

    #[test]
    fn test_cache_update_preserves_absent_fields() {
        let broadcaster = Broadcaster::new();
        broadcaster.update_gateway(&GatewayUpsert {
            gateway_id: "gw".to_string(),
            name: Some("rooftop".to_string()),
            alias: Some("alpha".to_string()),
            ..Default::default()
        });
        // A bare sighting must not erase the name.
        broadcaster.update_gateway(&GatewayUpsert::sighting("gw"));

        let meta = broadcaster.gateway_meta("gw").unwrap();
        assert_eq!(meta.name.as_deref(), Some("rooftop"));
        assert_eq!(meta.alias.as_deref(), Some("alpha"));
    }

    #[test]
    fn test_downlink_cross_stream_to_chirpstack_subscribers() {
        let broadcaster = Broadcaster::new();
        broadcaster.update_cs_device(&CsDeviceUpsert {
            dev_eui: "a8404181a1bc27bd".to_string(),
            dev_addr: Some("00BC1297".to_string()),
            device_name: "office-sensor".to_string(),
            application_id: "app-id".to_string(),
            application_name: Some("Sensors".to_string()),
            last_seen: Utc::now(),
        });

        let (_, mut cs_rx) = broadcaster.subscribe(Filter {
            source: SourceMode::Chirpstack,
            ..Default::default()
        });
        let (_, mut gw_rx) = broadcaster.subscribe(Filter::default());

        let mut downlink = data_packet("gw", "00BC1297", 0);
        downlink.packet_type = PacketType::Downlink;
        broadcaster.publish_packet(&downlink);

        // Gateway subscribers get the raw downlink.
        assert!(gw_rx.try_recv().is_ok());

        assert_eq!(
            broadcaster.resolve_dev_addr("00BC1297").as_deref(),
            Some("a8404181a1bc27bd")
        );

        // ChirpStack subscribers get the device-resolved mirror.
        let payload = cs_rx.try_recv().unwrap();
        let json: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(json["dev_eui"], "a8404181a1bc27bd");
        assert_eq!(json["device_name"], "office-sensor");
        assert_eq!(json["source"], "chirpstack");

        // A data uplink is not mirrored to ChirpStack subscribers.
        broadcaster.publish_packet(&data_packet("gw", "00BC1297", -50));
        assert!(cs_rx.try_recv().is_err());
    }

    #[test]
    fn test_cs_packets_only_reach_chirpstack_subscribers() {
        let broadcaster = Broadcaster::new();
        let (_, mut gw_rx) = broadcaster.subscribe(Filter::default());
        let (_, mut cs_rx) = broadcaster.subscribe(Filter {
            source: SourceMode::Chirpstack,
            ..Default::default()
        });

        let packet = CsPacket {
            timestamp: Utc::now(),
            dev_eui: "a8404181a1bc27bd".to_string(),
            dev_addr: Some("00BC1297".to_string()),
            device_name: "office-sensor".to_string(),
            application_id: "app-id".to_string(),
            operator: "Sensors".to_string(),
            packet_type: PacketType::Data,
            tx_status: None,
            frequency: 868_300_000,
            spreading_factor: Some(7),
            bandwidth: 125_000,
            rssi: -36,
            snr: 10.5,
            payload_size: 3,
            airtime_us: 46_336,
            f_cnt: Some(10),
            f_port: Some(1),
            confirmed: Some(false),
        };
        broadcaster.publish_cs_packet(&packet);

        assert!(gw_rx.try_recv().is_err());
        let payload = cs_rx.try_recv().unwrap();
        let json: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(json["source"], "chirpstack");
        assert_eq!(json["device_name"], "office-sensor");
    }

    #[tokio::test]
    async fn test_full_sink_drops_subscriber() {
        let broadcaster = Broadcaster::new();
        let (_, rx) = broadcaster.subscribe(Filter::default());

        // Never drained: overflow the bounded sink.
        for _ in 0..=SUBSCRIBER_BUFFER {
            broadcaster.publish_packet(&data_packet("gw", "26011AAB", -50));
        }
        assert_eq!(broadcaster.subscriber_count(), 0);
        drop(rx);

        // Closed receivers are dropped on the next publish attempt.
        let (_, rx2) = broadcaster.subscribe(Filter::default());
        drop(rx2);
        broadcaster.publish_packet(&data_packet("gw", "26011AAB", -50));
        assert_eq!(broadcaster.subscriber_count(), 0);
    }
}
