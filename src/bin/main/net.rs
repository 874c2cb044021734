//! Wi-Fi station bring-up and name resolution.

use embassy_net::{IpAddress, Stack, dns::DnsQueryType};
use embassy_time::{Duration, Timer, WithTimeout};
use esp_radio::wifi::{ClientConfig, ModeConfig, WifiController};
use inkcal_core::retry::RetryPlan;
use log::{debug, info, warn};

const CONNECT_TIMEOUT_SECS: u64 = 15;
const DHCP_TIMEOUT_SECS: u64 = 15;
const RETRY_PAUSE_SECS: u64 = 2;

#[derive(Debug)]
pub(super) enum NetError {
    /// The client mode configuration was rejected.
    Config(esp_radio::wifi::WifiError),
    /// Every connection attempt failed.
    Exhausted,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum ResolveError {
    Lookup,
    NoRecords,
}

/// Joins the configured access point and waits for a DHCP lease. Each
/// attempt covers association plus DHCP; `retries` extra attempts follow
/// the first.
pub(super) async fn connect(
    controller: &mut WifiController<'_>,
    stack: Stack<'_>,
    ssid: &str,
    password: &str,
    retries: u32,
) -> Result<(), NetError> {
    let client_config = ClientConfig::default()
        .with_ssid(ssid.into())
        .with_password(password.into());
    controller
        .set_config(&ModeConfig::Client(client_config))
        .map_err(NetError::Config)?;

    info!("connecting to wifi ssid {ssid}");
    for attempt in RetryPlan::new(retries) {
        debug!("connection attempt #{attempt}");

        if !controller.is_started().unwrap_or(false) {
            if let Err(err) = controller.start_async().await {
                warn!("wifi start failed: {err:?}");
                Timer::after_secs(RETRY_PAUSE_SECS).await;
                continue;
            }
        }

        match controller
            .connect_async()
            .with_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!("wifi connect failed: {err:?}");
                let _ = controller.disconnect_async().await;
                Timer::after_secs(RETRY_PAUSE_SECS).await;
                continue;
            }
            Err(_) => {
                warn!("wifi association timed out");
                let _ = controller.disconnect_async().await;
                continue;
            }
        }

        match stack
            .wait_config_up()
            .with_timeout(Duration::from_secs(DHCP_TIMEOUT_SECS))
            .await
        {
            Ok(()) => {
                if let Some(config) = stack.config_v4() {
                    info!("wifi connected, ip {}", config.address);
                }
                return Ok(());
            }
            Err(_) => {
                warn!("dhcp timeout; forcing reconnect");
                let _ = controller.disconnect_async().await;
            }
        }
    }
    Err(NetError::Exhausted)
}

/// Resolves a host name to its first A record. Dotted-quad literals skip
/// the query entirely.
pub(super) async fn resolve(stack: Stack<'_>, host: &str) -> Result<IpAddress, ResolveError> {
    if let Ok(addr) = host.parse::<core::net::Ipv4Addr>() {
        return Ok(IpAddress::Ipv4(addr));
    }
    let addrs = stack
        .dns_query(host, DnsQueryType::A)
        .await
        .map_err(|err| {
            warn!("dns lookup for {host} failed: {err:?}");
            ResolveError::Lookup
        })?;
    addrs.first().copied().ok_or(ResolveError::NoRecords)
}
