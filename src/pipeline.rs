//! Pipeline worker: single consumer of the decoded-event channel.
//!
//! Runs PHY parsing, airtime computation, operator matching and session
//! stamping, then hands finished rows to the batched writer and the
//! broadcaster. Decode problems drop the single event; enrichment
//! misses degrade to nulls and never stall the stream.

use crate::airtime::airtime_us;
use crate::ingest::application::{AppAck, AppDownlink, AppTxAck, AppUplink};
use crate::ingest::gateway::{GatewayDownlink, GatewayTxAck, GatewayUplink};
use crate::ingest::Event;
use crate::live::Broadcaster;
use crate::model::{CsDeviceUpsert, CsPacket, GatewayUpsert, PacketType, ParsedPacket};
use crate::operators::OperatorMatcher;
use crate::phy::{parse_phy, MType};
use crate::session::SessionTracker;
use crate::store::writer::StoreCommand;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

pub struct Pipeline {
    operators: Arc<OperatorMatcher>,
    sessions: SessionTracker,
    broadcaster: Arc<Broadcaster>,
    store_tx: mpsc::Sender<StoreCommand>,
}

impl Pipeline {
    pub fn new(
        operators: Arc<OperatorMatcher>,
        broadcaster: Arc<Broadcaster>,
        store_tx: mpsc::Sender<StoreCommand>,
    ) -> Self {
        Self {
            operators,
            sessions: SessionTracker::default(),
            broadcaster,
            store_tx,
        }
    }

    /// Consume events until the channel closes.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<Event>) {
        info!("pipeline worker started");
        let mut sweep = tokio::time::interval(SESSION_SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = event_rx.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
                _ = sweep.tick() => {
                    let evicted = self.sessions.sweep(Utc::now());
                    if evicted > 0 {
                        debug!("session sweeper evicted {} entries", evicted);
                    }
                }
            }
        }
        info!("pipeline worker stopped");
    }

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::GatewayUplink(uplink) => self.handle_gateway_uplink(uplink).await,
            Event::GatewayDownlink(downlink) => self.handle_gateway_downlink(downlink).await,
            Event::GatewayTxAck(ack) => self.handle_gateway_tx_ack(ack).await,
            Event::AppUplink(uplink) => self.handle_app_uplink(uplink).await,
            Event::AppDownlink(downlink) => self.handle_app_downlink(downlink).await,
            Event::AppTxAck(ack) => self.handle_app_tx_ack(ack).await,
            Event::AppAck(ack) => self.handle_app_ack(ack).await,
        }
    }

    async fn handle_gateway_uplink(&mut self, uplink: GatewayUplink) {
        let frame = match parse_phy(&uplink.phy_payload) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("dropping uplink from {}: {}", uplink.gateway_id, e);
                return;
            }
        };

        let timestamp = uplink.time.unwrap_or_else(Utc::now);
        let payload_size = uplink.phy_payload.len() as u32;
        let airtime = airtime_us(
            uplink.spreading_factor,
            uplink.bandwidth,
            payload_size as usize,
            uplink.code_rate,
        );

        let (packet_type, operator, session_id, dev_eui) = match frame.mtype {
            MType::JoinRequest => {
                let join_eui = frame.join_eui.clone().unwrap_or_default();
                let dev_eui = frame.dev_eui.clone().unwrap_or_default();
                let operator = self.operators.match_join_eui(&join_eui);
                let session_id =
                    self.sessions
                        .track_join(&dev_eui, &join_eui, &operator, timestamp);
                (
                    PacketType::JoinRequest,
                    operator,
                    Some(session_id),
                    frame.dev_eui.clone(),
                )
            }
            t if t.is_data() => {
                let dev_addr = frame.dev_addr.clone().unwrap_or_default();
                let operator = self.operators.match_dev_addr(&dev_addr);
                // Only true uplinks bind sessions; a relayed data-down
                // frame on the up topic passes through unstamped.
                let stamped = if matches!(
                    t,
                    MType::UnconfirmedDataUp | MType::ConfirmedDataUp
                ) {
                    self.sessions.stamp_uplink(&dev_addr, &operator, timestamp)
                } else {
                    None
                };
                match stamped {
                    Some((session_id, dev_eui)) => {
                        (PacketType::Data, operator, Some(session_id), Some(dev_eui))
                    }
                    None => (PacketType::Data, operator, None, None),
                }
            }
            other => {
                debug!("ignoring {:?} frame from {}", other, uplink.gateway_id);
                return;
            }
        };

        // Relayed packets are attributed to the relay; the physical
        // receiver becomes the border gateway.
        let (gateway_id, border_gateway_id) = match &uplink.relay_id {
            Some(relay_id) => (relay_id.clone(), Some(uplink.gateway_id.clone())),
            None => (uplink.gateway_id.clone(), None),
        };

        let packet = ParsedPacket {
            timestamp,
            gateway_id,
            border_gateway_id,
            packet_type,
            dev_addr: frame.dev_addr,
            join_eui: frame.join_eui,
            dev_eui,
            operator,
            frequency: uplink.frequency,
            spreading_factor: uplink.spreading_factor,
            bandwidth: uplink.bandwidth,
            rssi: uplink.rssi,
            snr: uplink.snr,
            payload_size,
            airtime_us: airtime,
            f_cnt: frame.f_cnt,
            f_port: frame.f_port,
            confirmed: frame.confirmed,
            session_id,
        };

        // The physical receiver carries the name and location metadata.
        let receiver_upsert = GatewayUpsert {
            gateway_id: uplink.gateway_id.clone(),
            name: uplink.gateway_name.clone(),
            alias: None,
            group_name: None,
            location: uplink.location,
        };
        self.send_store(StoreCommand::UpsertGateway(receiver_upsert))
            .await;
        if let Some(relay_id) = &uplink.relay_id {
            self.send_store(StoreCommand::UpsertGateway(GatewayUpsert::sighting(
                relay_id.clone(),
            )))
            .await;
        }

        self.broadcaster.publish_packet(&packet);
        self.send_store(StoreCommand::Packet(packet)).await;
    }

    async fn handle_gateway_downlink(&mut self, downlink: GatewayDownlink) {
        let frame = match parse_phy(&downlink.phy_payload) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("dropping downlink for {}: {}", downlink.gateway_id, e);
                return;
            }
        };

        let payload_size = downlink.phy_payload.len() as u32;
        let operator = match &frame.dev_addr {
            Some(dev_addr) => self.operators.match_dev_addr(dev_addr),
            None => crate::operators::UNKNOWN_OPERATOR.to_string(),
        };

        let packet = ParsedPacket {
            timestamp: Utc::now(),
            gateway_id: downlink.gateway_id.clone(),
            border_gateway_id: None,
            packet_type: PacketType::Downlink,
            dev_addr: frame.dev_addr,
            join_eui: None,
            dev_eui: None,
            operator,
            frequency: downlink.frequency,
            spreading_factor: downlink.spreading_factor,
            bandwidth: downlink.bandwidth,
            rssi: 0,
            snr: 0.0,
            payload_size,
            airtime_us: airtime_us(
                downlink.spreading_factor,
                downlink.bandwidth,
                payload_size as usize,
                downlink.code_rate,
            ),
            f_cnt: frame.f_cnt,
            f_port: frame.f_port,
            confirmed: frame.confirmed,
            session_id: None,
        };

        self.send_store(StoreCommand::UpsertGateway(GatewayUpsert::sighting(
            downlink.gateway_id,
        )))
        .await;
        self.broadcaster.publish_packet(&packet);
        self.send_store(StoreCommand::Packet(packet)).await;
    }

    async fn handle_gateway_tx_ack(&mut self, ack: GatewayTxAck) {
        let packet = ParsedPacket {
            timestamp: Utc::now(),
            gateway_id: ack.gateway_id.clone(),
            border_gateway_id: None,
            packet_type: PacketType::TxAck,
            dev_addr: None,
            join_eui: None,
            dev_eui: None,
            // The status name rides in the operator column.
            operator: ack.status,
            frequency: 0,
            spreading_factor: None,
            bandwidth: 0,
            rssi: 0,
            snr: 0.0,
            payload_size: 0,
            airtime_us: 0,
            // The downlink correlation id rides in f_cnt.
            f_cnt: Some(ack.downlink_id),
            f_port: None,
            confirmed: None,
            session_id: None,
        };

        self.send_store(StoreCommand::UpsertGateway(GatewayUpsert::sighting(
            ack.gateway_id,
        )))
        .await;
        self.broadcaster.publish_packet(&packet);
        self.send_store(StoreCommand::Packet(packet)).await;
    }

    async fn handle_app_uplink(&mut self, uplink: AppUplink) {
        let timestamp = uplink.time.unwrap_or_else(Utc::now);
        let operator = uplink
            .application_name
            .clone()
            .unwrap_or_else(|| uplink.application_id.clone());

        let packet = CsPacket {
            timestamp,
            dev_eui: uplink.dev_eui.clone(),
            dev_addr: uplink.dev_addr.clone(),
            device_name: uplink.device_name.clone(),
            application_id: uplink.application_id.clone(),
            operator,
            packet_type: PacketType::Data,
            tx_status: None,
            frequency: uplink.frequency,
            spreading_factor: uplink.spreading_factor,
            bandwidth: uplink.bandwidth,
            rssi: uplink.rssi,
            snr: uplink.snr,
            payload_size: uplink.payload_size,
            airtime_us: airtime_us(
                uplink.spreading_factor,
                uplink.bandwidth,
                uplink.payload_size as usize,
                1,
            ),
            f_cnt: uplink.f_cnt,
            f_port: uplink.f_port,
            confirmed: uplink.confirmed,
        };

        self.send_store(StoreCommand::UpsertCsDevice(CsDeviceUpsert {
            dev_eui: uplink.dev_eui,
            dev_addr: uplink.dev_addr,
            device_name: uplink.device_name,
            application_id: uplink.application_id,
            application_name: uplink.application_name,
            last_seen: timestamp,
        }))
        .await;
        self.broadcaster.publish_cs_packet(&packet);
        self.send_store(StoreCommand::CsPacket(packet)).await;
    }

    async fn handle_app_downlink(&mut self, downlink: AppDownlink) {
        let timestamp = Utc::now();
        let packet = CsPacket {
            timestamp,
            dev_eui: downlink.dev_eui.clone(),
            dev_addr: None,
            device_name: String::new(),
            application_id: downlink.application_id.clone(),
            operator: downlink.application_id.clone(),
            packet_type: PacketType::Downlink,
            tx_status: None,
            frequency: 0,
            spreading_factor: None,
            bandwidth: 0,
            rssi: 0,
            snr: 0.0,
            payload_size: downlink.payload_size,
            airtime_us: 0,
            f_cnt: None,
            f_port: downlink.f_port,
            confirmed: downlink.confirmed,
        };

        self.send_store(StoreCommand::UpsertCsDevice(CsDeviceUpsert {
            dev_eui: downlink.dev_eui,
            dev_addr: None,
            device_name: String::new(),
            application_id: downlink.application_id,
            application_name: None,
            last_seen: timestamp,
        }))
        .await;
        self.broadcaster.publish_cs_packet(&packet);
        self.send_store(StoreCommand::CsPacket(packet)).await;
    }

    async fn handle_app_tx_ack(&mut self, ack: AppTxAck) {
        let timestamp = ack.time.unwrap_or_else(Utc::now);
        let operator = ack
            .application_name
            .clone()
            .unwrap_or_else(|| ack.application_id.clone());

        let packet = CsPacket {
            timestamp,
            dev_eui: ack.dev_eui.clone(),
            dev_addr: None,
            device_name: ack.device_name.clone(),
            application_id: ack.application_id.clone(),
            operator,
            packet_type: PacketType::TxAck,
            tx_status: Some("OK".to_string()),
            frequency: 0,
            spreading_factor: None,
            bandwidth: 0,
            rssi: 0,
            snr: 0.0,
            payload_size: 0,
            airtime_us: 0,
            f_cnt: ack.f_cnt_down,
            f_port: None,
            confirmed: None,
        };

        self.send_store(StoreCommand::UpsertCsDevice(CsDeviceUpsert {
            dev_eui: ack.dev_eui,
            dev_addr: None,
            device_name: ack.device_name,
            application_id: ack.application_id,
            application_name: ack.application_name,
            last_seen: timestamp,
        }))
        .await;
        self.broadcaster.publish_cs_packet(&packet);
        self.send_store(StoreCommand::CsPacket(packet)).await;
    }

    async fn handle_app_ack(&mut self, ack: AppAck) {
        let timestamp = ack.time.unwrap_or_else(Utc::now);
        let operator = ack
            .application_name
            .clone()
            .unwrap_or_else(|| ack.application_id.clone());
        let status = if ack.acknowledged { "ACK" } else { "NACK" };

        let packet = CsPacket {
            timestamp,
            dev_eui: ack.dev_eui.clone(),
            dev_addr: None,
            device_name: ack.device_name.clone(),
            application_id: ack.application_id.clone(),
            operator,
            packet_type: PacketType::TxAck,
            tx_status: Some(status.to_string()),
            frequency: 0,
            spreading_factor: None,
            bandwidth: 0,
            rssi: 0,
            snr: 0.0,
            payload_size: 0,
            airtime_us: 0,
            f_cnt: ack.f_cnt_down,
            f_port: None,
            confirmed: None,
        };

        self.send_store(StoreCommand::UpsertCsDevice(CsDeviceUpsert {
            dev_eui: ack.dev_eui,
            dev_addr: None,
            device_name: ack.device_name,
            application_id: ack.application_id,
            application_name: ack.application_name,
            last_seen: timestamp,
        }))
        .await;
        self.broadcaster.publish_cs_packet(&packet);
        self.send_store(StoreCommand::CsPacket(packet)).await;
    }

    async fn send_store(&self, command: StoreCommand) {
        // A closed writer means the process is shutting down; rows in
        // flight are lost by design at that point.
        let _ = self.store_tx.send(command).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::Filter;
    use crate::operators::OperatorMatcher;

    fn test_uplink(phy_payload: Vec<u8>) -> GatewayUplink {
        GatewayUplink {
            gateway_id: "a84041ffff1ec39d".to_string(),
            phy_payload,
            frequency: 868_100_000,
            spreading_factor: Some(7),
            bandwidth: 125_000,
            code_rate: 1,
            rssi: -97,
            snr: 8.5,
            time: None,
            location: None,
            gateway_name: None,
            relay_id: None,
        }
    }

    fn data_up_phy(dev_addr: [u8; 4]) -> Vec<u8> {
        // 16-byte unconfirmed data up.
        let mut buf = vec![0x40];
        buf.extend_from_slice(&dev_addr);
        buf.push(0x00);
        buf.extend_from_slice(&7u16.to_le_bytes());
        buf.push(0x01);
        buf.extend_from_slice(&[0xAA, 0xBB, 0xCC]);
        buf.extend_from_slice(&[0; 4]);
        buf
    }

    fn join_request_phy() -> Vec<u8> {
        let mut buf = vec![0x00];
        buf.extend_from_slice(&[0x01, 0x00, 0x00, 0xD0, 0x7E, 0xD5, 0xB3, 0x70]); // JoinEUI
        buf.extend_from_slice(&[0x30, 0x05, 0x1C, 0x00, 0x0B, 0xA3, 0x04, 0x00]); // DevEUI
        buf.extend_from_slice(&[0x12, 0x34, 0, 0, 0, 0]);
        buf
    }

    struct Harness {
        pipeline_events: mpsc::Sender<Event>,
        store_rx: mpsc::Receiver<StoreCommand>,
        broadcaster: Arc<Broadcaster>,
        handle: tokio::task::JoinHandle<()>,
    }

    fn spawn_pipeline() -> Harness {
        let operators = Arc::new(OperatorMatcher::new(&[]).unwrap());
        let broadcaster = Arc::new(Broadcaster::new());
        let (store_tx, store_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(64);
        let pipeline = Pipeline::new(operators, broadcaster.clone(), store_tx);
        let handle = tokio::spawn(pipeline.run(event_rx));
        Harness {
            pipeline_events: event_tx,
            store_rx,
            broadcaster,
            handle,
        }
    }

    async fn drain_store(store_rx: &mut mpsc::Receiver<StoreCommand>) -> Vec<StoreCommand> {
        let mut commands = Vec::new();
        while let Some(command) = store_rx.recv().await {
            commands.push(command);
        }
        commands
    }

    fn packets(commands: &[StoreCommand]) -> Vec<&ParsedPacket> {
        commands
            .iter()
            .filter_map(|c| match c {
                StoreCommand::Packet(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_uplink_enrichment_end_to_end() {
        let mut harness = spawn_pipeline();
        let (_, mut live_rx) = harness.broadcaster.subscribe(Filter::default());

        harness
            .pipeline_events
            .send(Event::GatewayUplink(test_uplink(data_up_phy([
                0xAB, 0x1A, 0x01, 0x26,
            ]))))
            .await
            .unwrap();
        drop(harness.pipeline_events);
        harness.handle.await.unwrap();

        let commands = {
            let mut commands = Vec::new();
            while let Some(c) = harness.store_rx.recv().await {
                commands.push(c);
            }
            commands
        };

        let stored = packets(&commands);
        assert_eq!(stored.len(), 1);
        let packet = stored[0];
        assert_eq!(packet.packet_type, PacketType::Data);
        assert_eq!(packet.dev_addr.as_deref(), Some("26011AAB"));
        assert_eq!(packet.operator, "The Things Network");
        assert_eq!(packet.confirmed, Some(false));
        assert_eq!(packet.payload_size, 16);
        // SF7/125 kHz, 16 bytes, CR 4/5.
        assert!((packet.airtime_us - 51_456).abs() <= 1);

        // The gateway upsert precedes the row.
        assert!(matches!(&commands[0], StoreCommand::UpsertGateway(u) if u.gateway_id == "a84041ffff1ec39d"));

        // The live feed carries the same packet.
        let live = live_rx.recv().await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&live).unwrap();
        assert_eq!(json["operator"], "The Things Network");
        assert_eq!(json["data_rate"], "SF7BW125");
    }

    #[tokio::test]
    async fn test_join_then_uplink_backfills_session() {
        let mut harness = spawn_pipeline();

        harness
            .pipeline_events
            .send(Event::GatewayUplink(test_uplink(join_request_phy())))
            .await
            .unwrap();
        harness
            .pipeline_events
            .send(Event::GatewayUplink(test_uplink(data_up_phy([
                0xAB, 0x1A, 0x01, 0x26,
            ]))))
            .await
            .unwrap();
        drop(harness.pipeline_events);
        harness.handle.await.unwrap();

        let commands = drain_store(&mut harness.store_rx).await;
        let stored = packets(&commands);
        assert_eq!(stored.len(), 2);

        let join = stored[0];
        assert_eq!(join.packet_type, PacketType::JoinRequest);
        assert_eq!(join.join_eui.as_deref(), Some("70B3D57ED0000001"));
        assert_eq!(join.dev_addr, None);
        assert_eq!(join.operator, "The Things Network");
        assert!(join.session_id.is_some());

        let data = stored[1];
        assert_eq!(data.session_id, join.session_id);
        assert_eq!(data.dev_eui.as_deref(), Some("0004A30B001C0530"));
    }

    #[tokio::test]
    async fn test_relay_attribution_and_border_upsert() {
        let mut harness = spawn_pipeline();

        let mut uplink = test_uplink(data_up_phy([0xAB, 0x1A, 0x01, 0x26]));
        uplink.gateway_id = "BBBB".to_string();
        uplink.relay_id = Some("AAAA".to_string());
        harness
            .pipeline_events
            .send(Event::GatewayUplink(uplink))
            .await
            .unwrap();
        drop(harness.pipeline_events);
        harness.handle.await.unwrap();

        let commands = drain_store(&mut harness.store_rx).await;
        let stored = packets(&commands);
        assert_eq!(stored[0].gateway_id, "AAAA");
        assert_eq!(stored[0].border_gateway_id.as_deref(), Some("BBBB"));

        // Both the relay and the forwarding gateway are upserted.
        let upserted: Vec<_> = commands
            .iter()
            .filter_map(|c| match c {
                StoreCommand::UpsertGateway(u) => Some(u.gateway_id.as_str()),
                _ => None,
            })
            .collect();
        assert!(upserted.contains(&"AAAA"));
        assert!(upserted.contains(&"BBBB"));
    }

    #[tokio::test]
    async fn test_tx_ack_row_shape() {
        let mut harness = spawn_pipeline();

        harness
            .pipeline_events
            .send(Event::GatewayTxAck(GatewayTxAck {
                gateway_id: "gw".to_string(),
                downlink_id: 42,
                status: "CollisionPacket".to_string(),
            }))
            .await
            .unwrap();
        drop(harness.pipeline_events);
        harness.handle.await.unwrap();

        let commands = drain_store(&mut harness.store_rx).await;
        let stored = packets(&commands);
        let packet = stored[0];
        assert_eq!(packet.packet_type, PacketType::TxAck);
        assert_eq!(packet.f_cnt, Some(42));
        assert_eq!(packet.operator, "CollisionPacket");
        assert_eq!(packet.rssi, 0);
        assert_eq!(packet.snr, 0.0);
        assert_eq!(packet.airtime_us, 0);
    }

    #[tokio::test]
    async fn test_malformed_phy_dropped_silently() {
        let mut harness = spawn_pipeline();

        harness
            .pipeline_events
            .send(Event::GatewayUplink(test_uplink(vec![0x40, 0x01])))
            .await
            .unwrap();
        drop(harness.pipeline_events);
        harness.handle.await.unwrap();

        let commands = drain_store(&mut harness.store_rx).await;
        assert!(packets(&commands).is_empty());
    }

    #[tokio::test]
    async fn test_app_uplink_produces_cs_packet_and_upsert() {
        let mut harness = spawn_pipeline();

        harness
            .pipeline_events
            .send(Event::AppUplink(AppUplink {
                dev_eui: "a8404181a1bc27bd".to_string(),
                device_name: "office-sensor".to_string(),
                application_id: "app-id".to_string(),
                application_name: Some("Sensors".to_string()),
                dev_addr: Some("00BC1297".to_string()),
                time: None,
                f_cnt: Some(10),
                f_port: Some(1),
                confirmed: Some(false),
                payload_size: 3,
                frequency: 868_300_000,
                spreading_factor: Some(7),
                bandwidth: 125_000,
                rssi: -36,
                snr: 10.5,
            }))
            .await
            .unwrap();
        drop(harness.pipeline_events);
        harness.handle.await.unwrap();

        let commands = drain_store(&mut harness.store_rx).await;
        let upsert = commands
            .iter()
            .find_map(|c| match c {
                StoreCommand::UpsertCsDevice(u) => Some(u),
                _ => None,
            })
            .expect("device upsert");
        assert_eq!(upsert.dev_addr.as_deref(), Some("00BC1297"));

        let cs = commands
            .iter()
            .find_map(|c| match c {
                StoreCommand::CsPacket(p) => Some(p),
                _ => None,
            })
            .expect("cs packet");
        assert_eq!(cs.operator, "Sensors");
        assert_eq!(cs.packet_type, PacketType::Data);
        assert!(cs.airtime_us > 0);
    }

    #[tokio::test]
    async fn test_app_ack_status_mapping() {
        let mut harness = spawn_pipeline();

        harness
            .pipeline_events
            .send(Event::AppAck(AppAck {
                dev_eui: "a8404181a1bc27bd".to_string(),
                device_name: "office-sensor".to_string(),
                application_id: "app-id".to_string(),
                application_name: None,
                time: None,
                acknowledged: false,
                f_cnt_down: Some(7),
            }))
            .await
            .unwrap();
        drop(harness.pipeline_events);
        harness.handle.await.unwrap();

        let commands = drain_store(&mut harness.store_rx).await;
        let cs = commands
            .iter()
            .find_map(|c| match c {
                StoreCommand::CsPacket(p) => Some(p),
                _ => None,
            })
            .unwrap();
        assert_eq!(cs.packet_type, PacketType::TxAck);
        assert_eq!(cs.tx_status.as_deref(), Some("NACK"));
        assert_eq!(cs.f_cnt, Some(7));
    }
}
