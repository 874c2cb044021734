//! MQTT transport for the remote log queue.
//!
//! The queue itself lives in `inkcal_core::logging`; this module owns the
//! broker session and pushes formatted lines at it, QoS 0 and fire-and-
//! forget. A publish failure downgrades back to buffering instead of
//! blocking the refresh cycle.

use embassy_net::{Stack, tcp::TcpSocket};
use embassy_time::{Duration, Timer, WithTimeout};
use inkcal_core::config::Config;
use inkcal_core::logging::{LogLevel, RemoteLogger};
use inkcal_core::retry::RetryPlan;
use log::warn;
use rust_mqtt::client::client::MqttClient;
use rust_mqtt::client::client_config::{ClientConfig, MqttVersion};
use rust_mqtt::packet::v5::publish_packet::QualityOfService;
use rust_mqtt::packet::v5::reason_codes::ReasonCode;
use rust_mqtt::utils::rng_generator::CountingRng;

use super::net;

const SOCKET_BUF: usize = 1_024;
const MQTT_BUF: usize = 512;
const CONNECT_TIMEOUT_SECS: u64 = 10;
const RETRY_PAUSE_SECS: u64 = 2;

/// Socket and session buffers, kept by the caller so the link can borrow
/// them for the whole cycle.
pub(super) struct LinkBuffers {
    rx: [u8; SOCKET_BUF],
    tx: [u8; SOCKET_BUF],
    mqtt_rx: [u8; MQTT_BUF],
    mqtt_tx: [u8; MQTT_BUF],
}

impl LinkBuffers {
    pub(super) const fn new() -> Self {
        Self {
            rx: [0; SOCKET_BUF],
            tx: [0; SOCKET_BUF],
            mqtt_rx: [0; MQTT_BUF],
            mqtt_tx: [0; MQTT_BUF],
        }
    }
}

#[derive(Debug)]
pub(super) enum LinkError {
    Resolve(net::ResolveError),
    /// TCP connect attempts exhausted.
    Connect,
    /// Broker handshake attempts exhausted.
    Handshake(ReasonCode),
}

/// A live broker session publishing to one topic.
pub(super) struct MqttLink<'a> {
    client: MqttClient<'a, TcpSocket<'a>, 5, CountingRng>,
    topic: &'a str,
}

/// Connects the TCP socket and performs the MQTT handshake, both bounded
/// by the configured retry count.
pub(super) async fn connect<'a>(
    stack: Stack<'a>,
    config: &'a Config,
    bufs: &'a mut LinkBuffers,
) -> Result<MqttLink<'a>, LinkError> {
    let addr = net::resolve(stack, &config.mqtt_broker)
        .await
        .map_err(LinkError::Resolve)?;

    let mut socket = TcpSocket::new(stack, &mut bufs.rx, &mut bufs.tx);
    socket.set_timeout(Some(Duration::from_secs(CONNECT_TIMEOUT_SECS)));

    let mut connected = false;
    for attempt in RetryPlan::new(config.mqtt_retries) {
        match socket
            .connect((addr, config.mqtt_port))
            .with_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .await
        {
            Ok(Ok(())) => {
                connected = true;
                break;
            }
            Ok(Err(err)) => warn!("mqtt tcp connect #{attempt} failed: {err:?}"),
            Err(_) => warn!("mqtt tcp connect #{attempt} timed out"),
        }
        Timer::after_secs(RETRY_PAUSE_SECS).await;
    }
    if !connected {
        return Err(LinkError::Connect);
    }

    let mut session_config = ClientConfig::new(MqttVersion::MQTTv5, CountingRng(20_000));
    session_config.add_client_id(config.mqtt_client_id.as_str());
    session_config.max_packet_size = MQTT_BUF as u32;

    let mut client = MqttClient::new(
        socket,
        &mut bufs.mqtt_tx,
        MQTT_BUF,
        &mut bufs.mqtt_rx,
        MQTT_BUF,
        session_config,
    );

    let mut last = ReasonCode::UnspecifiedError;
    for attempt in RetryPlan::new(config.mqtt_retries) {
        match client.connect_to_broker().await {
            Ok(()) => {
                return Ok(MqttLink {
                    client,
                    topic: config.mqtt_topic.as_str(),
                });
            }
            Err(code) => {
                warn!("mqtt handshake #{attempt} failed: {code:?}");
                last = code;
                Timer::after_secs(RETRY_PAUSE_SECS).await;
            }
        }
    }
    Err(LinkError::Handshake(last))
}

impl MqttLink<'_> {
    async fn publish(&mut self, line: &str) -> Result<(), ReasonCode> {
        self.client
            .send_message(self.topic, line.as_bytes(), QualityOfService::QoS0, false)
            .await
    }

    /// Polite DISCONNECT before the radio goes down.
    pub(super) async fn shutdown(mut self) {
        let _ = self.client.disconnect().await;
    }
}

/// Pushes the buffered backlog to the broker in FIFO order, then switches
/// the logger to direct publication. Lines are popped only after the
/// broker accepts them; on failure the remainder stays queued and the
/// caller should drop the session.
pub(super) async fn drain_backlog(
    logger: &mut RemoteLogger,
    link: &mut MqttLink<'_>,
) -> Result<(), ReasonCode> {
    if logger.dropped() > 0 {
        warn!("{} queued log lines were dropped before connect", logger.dropped());
    }
    while let Some(line) = logger.peek_queued().cloned() {
        link.publish(&line).await?;
        logger.pop_queued();
    }
    logger.mark_connected();
    Ok(())
}

/// Records one log line and publishes it immediately when a broker session
/// exists. A failed publish downgrades the logger back to buffering.
pub(super) async fn emit(
    logger: &mut RemoteLogger,
    link: &mut Option<MqttLink<'_>>,
    level: LogLevel,
    timestamp: &str,
    msg: &str,
) {
    let Some(line) = logger.log(level, timestamp, msg) else {
        return;
    };
    if let Some(session) = link {
        if let Err(code) = session.publish(&line).await {
            warn!("mqtt publish failed: {code:?}");
            logger.mark_disconnected();
            *link = None;
        }
    }
}
