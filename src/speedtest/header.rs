//! The `testStart` header: server identity, ISP and the local WAN interface.
//!
//! Interface details come from the live Linux network stack. Anything that
//! cannot be read is left out of the header rather than failing the run.

use crate::settings::Settings;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, UdpSocket};
use std::time::Duration;
use tracing::{debug, warn};

const PROC_NET_ROUTE: &str = "/proc/net/route";
const PROC_NET_DEV: &str = "/proc/net/dev";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRunHeader {
    pub timestamp: DateTime<Utc>,
    pub isp: String,
    pub server: ServerInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<InterfaceInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub country: String,
    pub host: String,
    pub location: String,
    pub id: u32,
    pub ip: String,
    pub port: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_addr: Option<String>,
    pub is_vpn: bool,
    pub external_ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<InterfaceStats>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceStats {
    #[serde(rename = "rxbytes")]
    pub rx_bytes: u64,
    #[serde(rename = "rxpackets")]
    pub rx_packets: u64,
    #[serde(rename = "rxerrors")]
    pub rx_errors: u64,
    #[serde(rename = "rxdropped")]
    pub rx_dropped: u64,
    #[serde(rename = "rxfifo")]
    pub rx_fifo: u64,
    #[serde(rename = "rxframe")]
    pub rx_frame: u64,
    #[serde(rename = "rxcompressed")]
    pub rx_compressed: u64,
    #[serde(rename = "rxmulticast")]
    pub rx_multicast: u64,
    #[serde(rename = "txbytes")]
    pub tx_bytes: u64,
    #[serde(rename = "txpackets")]
    pub tx_packets: u64,
    #[serde(rename = "txerrors")]
    pub tx_errors: u64,
    #[serde(rename = "txdropped")]
    pub tx_dropped: u64,
    #[serde(rename = "txfifo")]
    pub tx_fifo: u64,
    #[serde(rename = "txcolls")]
    pub tx_colls: u64,
    #[serde(rename = "txcarrier")]
    pub tx_carrier: u64,
    #[serde(rename = "txcompressed")]
    pub tx_compressed: u64,
}

/// Client details reported by the server's `/meta` endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    #[serde(default, alias = "clientIp")]
    pub ip: String,
    #[serde(default, alias = "asOrganization")]
    pub isp: String,
    #[serde(default)]
    pub asn: Option<u32>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub colo: Option<String>,
}

/// Looks up the client's public address and ISP. Failures yield empty info.
pub async fn fetch_client_info(settings: &Settings) -> ClientInfo {
    let lookup = async {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        client
            .get(settings.meta_url())
            .send()
            .await?
            .error_for_status()?
            .json::<ClientInfo>()
            .await
    };

    match lookup.await {
        Ok(info) => info,
        Err(e) => {
            warn!("ISP lookup failed: {}", e);
            ClientInfo::default()
        }
    }
}

pub fn server_info(settings: &Settings, client: &ClientInfo) -> ServerInfo {
    let url = reqwest::Url::parse(&settings.server_url).ok();
    let host = url
        .as_ref()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default();
    let port = url
        .as_ref()
        .and_then(|u| u.port_or_known_default())
        .map(|p| p.to_string())
        .unwrap_or_default();

    ServerInfo {
        name: settings.server_name.clone(),
        country: client.country.clone().unwrap_or_default(),
        location: client.colo.clone().unwrap_or_default(),
        id: settings.server_id,
        ip: host.clone(),
        host,
        port,
    }
}

pub fn build_header(settings: &Settings, client: &ClientInfo) -> TestRunHeader {
    let interface = wan_interface().map(|name| {
        let stats = interface_stats(&name);
        if let Some(stats) = &stats {
            debug!(interface = %name, rx_bytes = stats.rx_bytes, tx_bytes = stats.tx_bytes, "interface counters");
        }
        InterfaceInfo {
            mac_addr: mac_address(&name),
            is_vpn: is_tunnel(&name),
            external_ip: client.ip.clone(),
            internal_ip: local_ip().map(|ip| ip.to_string()),
            stats,
            name,
        }
    });

    TestRunHeader {
        timestamp: Utc::now(),
        isp: client.isp.clone(),
        server: server_info(settings, client),
        interface,
    }
}

/// Name of the interface carrying the default route.
pub fn wan_interface() -> Option<String> {
    let routes = fs::read_to_string(PROC_NET_ROUTE)
        .map_err(|e| debug!("cannot read {}: {}", PROC_NET_ROUTE, e))
        .ok()?;
    parse_default_route(&routes)
}

pub fn interface_stats(name: &str) -> Option<InterfaceStats> {
    let dev = fs::read_to_string(PROC_NET_DEV)
        .map_err(|e| debug!("cannot read {}: {}", PROC_NET_DEV, e))
        .ok()?;
    parse_net_dev(&dev, name)
}

fn mac_address(name: &str) -> Option<String> {
    let addr = fs::read_to_string(format!("/sys/class/net/{}/address", name)).ok()?;
    let addr = addr.trim();
    (!addr.is_empty() && addr != "00:00:00:00:00:00").then(|| addr.to_string())
}

fn is_tunnel(name: &str) -> bool {
    ["tun", "tap", "wg", "ppp", "utun"]
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

/// Source address the kernel would pick for outbound traffic. Connecting a
/// UDP socket only consults the routing table; nothing is sent.
fn local_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("1.1.1.1:80").ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}

fn parse_default_route(routes: &str) -> Option<String> {
    routes.lines().skip(1).find_map(|line| {
        let mut fields = line.split_whitespace();
        let iface = fields.next()?;
        let destination = fields.next()?;
        (destination == "00000000").then(|| iface.to_string())
    })
}

fn parse_net_dev(dev: &str, name: &str) -> Option<InterfaceStats> {
    let line = dev.lines().skip(2).find_map(|line| {
        let (iface, counters) = line.split_once(':')?;
        (iface.trim() == name).then_some(counters)
    })?;

    let values: Vec<u64> = line
        .split_whitespace()
        .map(|v| v.parse().unwrap_or(0))
        .collect();
    if values.len() < 16 {
        return None;
    }

    Some(InterfaceStats {
        rx_bytes: values[0],
        rx_packets: values[1],
        rx_errors: values[2],
        rx_dropped: values[3],
        rx_fifo: values[4],
        rx_frame: values[5],
        rx_compressed: values[6],
        rx_multicast: values[7],
        tx_bytes: values[8],
        tx_packets: values[9],
        tx_errors: values[10],
        tx_dropped: values[11],
        tx_fifo: values[12],
        tx_colls: values[13],
        tx_carrier: values[14],
        tx_compressed: values[15],
    })
}
