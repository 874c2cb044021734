//! One-shot SNTP query against the configured server.

use embassy_net::Stack;
use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_time::{Duration, WithTimeout};
use inkcal_core::ntp;
use log::debug;

use super::net::{self, ResolveError};

const NTP_PORT: u16 = 123;
const LOCAL_PORT: u16 = 55_123;
const REPLY_TIMEOUT_SECS: u64 = 5;

#[derive(Debug)]
pub(super) enum TimeError {
    Resolve(ResolveError),
    Socket,
    /// No reply within the deadline.
    Timeout,
    Protocol(ntp::NtpError),
}

/// Asks `host` for the current time. Returns Unix seconds, UTC; the
/// caller applies the configured zone offset.
pub(super) async fn fetch_unix_time(stack: Stack<'_>, host: &str) -> Result<i64, TimeError> {
    let addr = net::resolve(stack, host).await.map_err(TimeError::Resolve)?;
    debug!("ntp server {host} at {addr}");

    let mut rx_meta = [PacketMetadata::EMPTY; 2];
    let mut tx_meta = [PacketMetadata::EMPTY; 2];
    let mut rx_buf = [0u8; 128];
    let mut tx_buf = [0u8; 128];
    let mut socket = UdpSocket::new(stack, &mut rx_meta, &mut rx_buf, &mut tx_meta, &mut tx_buf);
    socket.bind(LOCAL_PORT).map_err(|_| TimeError::Socket)?;

    let request = ntp::build_request();
    socket
        .send_to(&request, (addr, NTP_PORT))
        .await
        .map_err(|_| TimeError::Socket)?;

    let mut reply = [0u8; ntp::PACKET_LEN];
    let (len, _meta) = socket
        .recv_from(&mut reply)
        .with_timeout(Duration::from_secs(REPLY_TIMEOUT_SECS))
        .await
        .map_err(|_| TimeError::Timeout)?
        .map_err(|_| TimeError::Socket)?;

    ntp::parse_reply(&reply[..len]).map_err(TimeError::Protocol)
}
