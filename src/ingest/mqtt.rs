//! MQTT consumer: one auto-reconnecting client per configured broker,
//! with topic dispatch into the pipeline channel.

use crate::config::{BrokerSettings, PayloadFormat};
use crate::error::AnalyzerError;
use crate::ingest::{
    application, classify_topic, gateway, AppEventKind, Event, GatewayEventKind, TopicKind,
};
use anyhow::{Context, Result};
use rumqttc::{AsyncClient, Event as MqttEvent, Incoming, MqttOptions, QoS, Transport};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const MAX_MQTT_PACKET_SIZE: usize = 256 * 1024; // 256KB
pub const MQTT_KEEP_ALIVE: u64 = 30; // 30 seconds
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Classify and decode one inbound message.
///
/// Returns `Ok(None)` for topics the analyzer ignores (unknown shapes,
/// gateway stats); decode failures surface as errors and drop only the
/// single message.
pub fn dispatch(
    topic: &str,
    payload: &[u8],
    format: PayloadFormat,
) -> Result<Option<Event>, AnalyzerError> {
    match classify_topic(topic) {
        TopicKind::Gateway { gateway_id, kind } => {
            let event = match kind {
                GatewayEventKind::Up => {
                    let mut uplink = match format {
                        PayloadFormat::Protobuf => gateway::decode_uplink_protobuf(payload)?,
                        PayloadFormat::Json => gateway::decode_uplink_json(payload)?,
                    };
                    if uplink.gateway_id.is_empty() {
                        uplink.gateway_id = gateway_id;
                    }
                    Event::GatewayUplink(uplink)
                }
                GatewayEventKind::Down => {
                    let mut downlink = match format {
                        PayloadFormat::Protobuf => gateway::decode_downlink_protobuf(payload)?,
                        PayloadFormat::Json => gateway::decode_downlink_json(payload)?,
                    };
                    // The gateway id comes from the topic for downlinks.
                    downlink.gateway_id = gateway_id;
                    Event::GatewayDownlink(downlink)
                }
                GatewayEventKind::Ack => {
                    let mut ack = match format {
                        PayloadFormat::Protobuf => gateway::decode_tx_ack_protobuf(payload)?,
                        PayloadFormat::Json => gateway::decode_tx_ack_json(payload)?,
                    };
                    ack.gateway_id = gateway_id;
                    Event::GatewayTxAck(ack)
                }
                GatewayEventKind::Stats => return Ok(None),
            };
            Ok(Some(event))
        }
        TopicKind::Application {
            application_id,
            dev_eui,
            kind,
        } => {
            let event = match kind {
                AppEventKind::Up => Event::AppUplink(application::decode_app_uplink(payload)?),
                AppEventKind::TxAck => {
                    Event::AppTxAck(application::decode_app_tx_ack(payload)?)
                }
                AppEventKind::Ack => Event::AppAck(application::decode_app_ack(payload)?),
                AppEventKind::CommandDown => Event::AppDownlink(
                    application::decode_app_downlink(payload, &application_id, &dev_eui)?,
                ),
            };
            Ok(Some(event))
        }
        TopicKind::Unknown => Ok(None),
    }
}

/// MQTT consumer that feeds the pipeline channel from every configured
/// broker.
pub struct MqttConsumer {
    brokers: Vec<BrokerSettings>,
    event_tx: mpsc::Sender<Event>,
    shutdown: CancellationToken,
}

impl MqttConsumer {
    pub fn new(
        brokers: Vec<BrokerSettings>,
        event_tx: mpsc::Sender<Event>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            brokers,
            event_tx,
            shutdown,
        }
    }

    /// Start one client task per broker and wait on all of them. Returns
    /// once the shutdown token fires and every client has stopped;
    /// dropping the held event sender then lets the pipeline drain.
    pub async fn start(self) -> Result<()> {
        if self.brokers.is_empty() {
            return Err(AnalyzerError::Mqtt("no MQTT brokers configured".to_string()).into());
        }

        let mut tasks = Vec::new();
        for (index, broker) in self.brokers.into_iter().enumerate() {
            let tx = self.event_tx.clone();
            let shutdown = self.shutdown.clone();
            let name = if index == 0 {
                "primary".to_string()
            } else {
                format!("extra-{}", index)
            };
            tasks.push(tokio::spawn(async move {
                Self::run_client(broker, name, tx, shutdown).await
            }));
        }

        info!("Started {} MQTT client(s)", tasks.len());

        for task in tasks {
            if let Err(e) = task.await {
                error!("MQTT task failed: {}", e);
            }
        }

        Ok(())
    }

    /// Run a single MQTT client connection with fixed-delay reconnect
    /// until shutdown.
    async fn run_client(
        broker: BrokerSettings,
        name: String,
        event_tx: mpsc::Sender<Event>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("{} MQTT client stopping", name);
                    return Ok(());
                }
                result = Self::connect_and_run(&broker, &name, event_tx.clone()) => {
                    match result {
                        Ok(_) => {
                            info!("{} MQTT client disconnected gracefully", name);
                            return Ok(());
                        }
                        Err(e) => {
                            error!("{} MQTT client error: {}", name, e);
                        }
                    }
                }
            }

            warn!(
                "{} MQTT client disconnected, reconnecting in {:?}",
                name, RECONNECT_DELAY
            );
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            }
        }
    }

    /// Connect to an MQTT broker and process messages until the
    /// connection drops.
    async fn connect_and_run(
        broker: &BrokerSettings,
        name: &str,
        event_tx: mpsc::Sender<Event>,
    ) -> Result<()> {
        let broker_url = &broker.server;
        let use_tls = broker_url.starts_with("mqtts://") || broker_url.starts_with("ssl://");

        let broker_str = broker_url
            .trim_start_matches("mqtts://")
            .trim_start_matches("mqtt://")
            .trim_start_matches("ssl://");

        let (host, port) = if let Some((h, p)) = broker_str.split_once(':') {
            (h.to_string(), p.parse::<u16>()?)
        } else {
            (broker_str.to_string(), if use_tls { 8883 } else { 1883 })
        };

        info!(
            "Connecting to {} MQTT broker at {}:{} (TLS: {})",
            name, host, port, use_tls
        );

        let client_id = format!("lorawan-analyzer-{}-{}", name, uuid::Uuid::new_v4());
        let mut mqttoptions = MqttOptions::new(&client_id, host.clone(), port);

        mqttoptions.set_keep_alive(Duration::from_secs(MQTT_KEEP_ALIVE));
        mqttoptions.set_max_packet_size(MAX_MQTT_PACKET_SIZE, MAX_MQTT_PACKET_SIZE);

        if let (Some(username), Some(password)) = (&broker.username, &broker.password) {
            mqttoptions.set_credentials(username, password);
        }

        if use_tls {
            mqttoptions.set_transport(Transport::tls_with_default_config());
            info!("{} MQTT: TLS configured with system certificates", name);
        }

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);

        client
            .subscribe(&broker.topic, QoS::AtMostOnce)
            .await
            .context("Failed to subscribe to topic")?;

        info!("{} MQTT: Subscribed to topic: {}", name, broker.topic);

        loop {
            match eventloop.poll().await {
                Ok(MqttEvent::Incoming(Incoming::Publish(publish))) => {
                    match dispatch(&publish.topic, &publish.payload, broker.format) {
                        Ok(Some(event)) => {
                            debug!("{} MQTT: decoded event on '{}'", name, publish.topic);
                            if event_tx.send(event).await.is_err() {
                                // Pipeline shut down; stop this client.
                                return Ok(());
                            }
                        }
                        Ok(None) => {
                            debug!("{} MQTT: ignoring topic '{}'", name, publish.topic);
                        }
                        Err(e) => {
                            let preview = String::from_utf8_lossy(&publish.payload);
                            let preview = if preview.len() > 200 {
                                format!("{}...", &preview[..200])
                            } else {
                                preview.to_string()
                            };
                            warn!(
                                "{} MQTT: failed to decode message on '{}': {} | Payload: {}",
                                name, publish.topic, e, preview
                            );
                        }
                    }
                }
                Ok(MqttEvent::Incoming(Incoming::ConnAck(_))) => {
                    info!("{} MQTT: Connected successfully", name);
                }
                Ok(MqttEvent::Incoming(Incoming::SubAck(_))) => {
                    info!("{} MQTT: Subscription acknowledged", name);
                }
                Ok(MqttEvent::Incoming(Incoming::Disconnect)) => {
                    warn!("{} MQTT: Disconnected by broker", name);
                    return Err(AnalyzerError::Mqtt("disconnected by broker".into()).into());
                }
                Ok(_) => {
                    // Other events (PingResp, PubAck, etc.)
                }
                Err(e) => {
                    error!("{} MQTT: Connection error: {}", name, e);
                    return Err(e.into());
                }
            }
        }
    }
}
