//! 基于 `wpa_cli` 的 HAL 实现
//!
//! 每个调用执行一次 `wpa_cli -i <iface> <COMMAND ...>`，回复以 `FAIL` 开头视为失败。
//! 需要对 wpa_supplicant 控制套接字的访问权限（通常为 root 或 netdev 组）。

use std::process::Command;
use std::sync::{LazyLock, Mutex};

use log::{debug, info, warn};
use regex::Regex;
use tokio::task::JoinHandle;

use super::{
    ConnectRequest, DeviceConfig, HalError, HalEvent, HalEventSink, HalGroupConfig, HalNetwork,
    P2pHal, parse_peer_info, spawn_monitor,
};
use crate::service::SupplicantService;
use crate::types::{GroupOwnerBand, MacAddress, PeerDevice, WpsMethod};

static FREQUENCY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(\d{4})\b").unwrap());

const CHANNELS_2G: [u32; 11] = [
    2412, 2417, 2422, 2427, 2432, 2437, 2442, 2447, 2452, 2457, 2462,
];
const CHANNELS_5G: [u32; 9] = [5180, 5200, 5220, 5240, 5745, 5765, 5785, 5805, 5825];

pub struct WpaCliHal {
    interface: String,
    event_sink: Option<HalEventSink>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl WpaCliHal {
    /// `interface` 为 P2P 控制接口，如 `p2p-dev-wlan0`
    pub fn new(interface: &str) -> Self {
        Self {
            interface: interface.to_string(),
            event_sink: None,
            monitor: Mutex::new(None),
        }
    }

    pub fn with_event_sink(mut self, sink: HalEventSink) -> Self {
        self.event_sink = Some(sink);
        self
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    fn request(&self, args: &[&str]) -> Result<String, HalError> {
        self.request_on(&self.interface, args)
    }

    fn request_on(&self, interface: &str, args: &[&str]) -> Result<String, HalError> {
        let command = args.join(" ");
        debug!("wpa_cli -i {} {}", interface, command);

        let output = Command::new("wpa_cli")
            .args(["-i", interface])
            .args(args)
            .output()
            .map_err(|e| HalError::CommandFailed(format!("wpa_cli: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            if stdout.contains("Failed to connect") || stderr.contains("Failed to connect") {
                return Err(HalError::NotConnected);
            }
            return Err(HalError::CommandFailed(format!("{command}: {}", stderr.trim())));
        }

        let reply = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if reply.starts_with("FAIL") || reply.starts_with("UNKNOWN COMMAND") {
            return Err(HalError::Rejected { command, reply });
        }
        Ok(reply)
    }

    fn request_ok(&self, args: &[&str]) -> Result<(), HalError> {
        self.request(args).map(|_| ())
    }

    fn set_network(&self, network_id: i32, field: &str, value: &str) -> Result<(), HalError> {
        self.request_ok(&["SET_NETWORK", &network_id.to_string(), field, value])
    }

    fn get_network(&self, network_id: i32, field: &str) -> Result<String, HalError> {
        self.request(&["GET_NETWORK", &network_id.to_string(), field])
    }

    fn emit(&self, event: HalEvent) {
        if let Some(sink) = &self.event_sink {
            sink(event);
        }
    }
}

fn wps_arg(method: WpsMethod) -> &'static str {
    match method {
        WpsMethod::Pbc => "pbc",
        WpsMethod::Display => "display",
        WpsMethod::Keypad => "keypad",
        WpsMethod::Label => "label",
    }
}

/// `P2P_CONNECT` 参数列表
fn connect_args(request: &ConnectRequest) -> Vec<String> {
    let mut args = vec!["P2P_CONNECT".to_string(), request.peer.to_string()];
    match request.wps.method {
        WpsMethod::Pbc => args.push("pbc".into()),
        WpsMethod::Display if request.wps.pin.is_empty() => args.push("pin".into()),
        method => {
            args.push(request.wps.pin.clone());
            args.push(wps_arg(method).into());
        }
    }
    if request.join {
        args.push("join".into());
    } else {
        args.push(format!("go_intent={}", request.go_intent));
    }
    match (request.persistent, request.network_id) {
        (true, Some(id)) => args.push(format!("persistent={id}")),
        (true, None) => args.push("persistent".into()),
        (false, _) => {}
    }
    if let Some(freq) = request.frequency {
        args.push(format!("freq={freq}"));
    }
    args
}

/// 解析 `LIST_NETWORKS`：跳过表头，制表符分隔 `id ssid bssid flags`
pub(crate) fn parse_networks(reply: &str) -> Vec<HalNetwork> {
    reply
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut cols = line.split('\t');
            let network_id = cols.next()?.trim().parse().ok()?;
            let ssid = cols.next().unwrap_or_default().to_string();
            let bssid = cols.next().and_then(|b| b.parse().ok());
            let flags = cols.next().unwrap_or_default().to_string();
            Some(HalNetwork {
                network_id,
                ssid,
                bssid,
                flags,
            })
        })
        .collect()
}

fn unquote(value: &str) -> String {
    value.trim().trim_matches('"').to_string()
}

impl P2pHal for WpaCliHal {
    fn start_p2p(&self) -> Result<(), HalError> {
        let reply = self.request(&["PING"])?;
        if reply != "PONG" {
            return Err(HalError::Parse(format!("unexpected PING reply: {reply}")));
        }
        info!("wpa_supplicant reachable on {}", self.interface);

        let sink = self.event_sink.clone();
        match (sink, tokio::runtime::Handle::try_current()) {
            (Some(sink), Ok(_)) => {
                let handle = spawn_monitor(&self.interface, sink);
                if let Ok(mut monitor) = self.monitor.lock() {
                    if let Some(old) = monitor.replace(handle) {
                        old.abort();
                    }
                }
            }
            (Some(_), Err(_)) => {
                warn!("No tokio runtime, event monitor not started");
                self.emit(HalEvent::SupplicantConnected);
            }
            (None, _) => warn!("No event sink configured, supplicant events will be lost"),
        }
        Ok(())
    }

    fn stop_p2p(&self) -> Result<(), HalError> {
        for command in ["P2P_STOP_FIND", "P2P_FLUSH"] {
            if let Err(e) = self.request(&[command]) {
                warn!("{} failed while stopping P2P: {}", command, e);
            }
        }
        if let Ok(mut monitor) = self.monitor.lock()
            && let Some(handle) = monitor.take()
        {
            handle.abort();
        }
        self.emit(HalEvent::SupplicantTerminating);
        Ok(())
    }

    fn device_address(&self) -> Result<MacAddress, HalError> {
        let reply = self.request(&["STATUS"])?;
        reply
            .lines()
            .find_map(|line| line.strip_prefix("p2p_device_address="))
            .or_else(|| reply.lines().find_map(|line| line.strip_prefix("address=")))
            .ok_or_else(|| HalError::Parse("no address in STATUS".into()))?
            .parse()
            .map_err(|e| HalError::Parse(format!("{e}")))
    }

    fn set_device_config(&self, config: &DeviceConfig) -> Result<(), HalError> {
        self.set_device_name(&config.device_name)?;
        if !config.primary_device_type.is_empty() {
            self.request_ok(&["SET", "device_type", &config.primary_device_type])?;
        }
        if !config.config_methods.is_empty() {
            self.request_ok(&["SET", "config_methods", &config.config_methods])?;
        }
        let reconnect = if config.persistent_reconnect { "1" } else { "0" };
        self.request_ok(&["SET", "persistent_reconnect", reconnect])?;
        // 服务发现响应由 supplicant 根据本地服务表自动处理
        self.request_ok(&["P2P_SERV_DISC_EXTERNAL", "0"])
    }

    fn set_device_name(&self, name: &str) -> Result<(), HalError> {
        self.request_ok(&["SET", "device_name", name])?;
        self.request_ok(&["SET", "p2p_ssid_postfix", &format!("-{name}")])
    }

    fn peer_info(&self, peer: MacAddress) -> Result<PeerDevice, HalError> {
        let reply = self.request(&["P2P_PEER", &peer.to_string()])?;
        Ok(parse_peer_info(peer, &reply))
    }

    fn find(&self, timeout_secs: u32) -> Result<(), HalError> {
        if timeout_secs == 0 {
            self.request_ok(&["P2P_FIND"])
        } else {
            self.request_ok(&["P2P_FIND", &timeout_secs.to_string()])
        }
    }

    fn stop_find(&self) -> Result<(), HalError> {
        self.request_ok(&["P2P_STOP_FIND"])
    }

    fn set_ext_listen(
        &self,
        enable: bool,
        period_ms: u32,
        interval_ms: u32,
    ) -> Result<(), HalError> {
        if enable {
            self.request_ok(&[
                "P2P_EXT_LISTEN",
                &period_ms.to_string(),
                &interval_ms.to_string(),
            ])
        } else {
            self.request_ok(&["P2P_EXT_LISTEN"])
        }
    }

    fn connect(&self, request: &ConnectRequest) -> Result<Option<String>, HalError> {
        let args = connect_args(request);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let reply = self.request(&args)?;
        Ok((reply != "OK").then_some(reply))
    }

    fn cancel_connect(&self) -> Result<(), HalError> {
        self.request_ok(&["P2P_CANCEL"])
    }

    fn provision_discovery(&self, peer: MacAddress, method: WpsMethod) -> Result<(), HalError> {
        self.request_ok(&["P2P_PROV_DISC", &peer.to_string(), wps_arg(method)])
    }

    fn group_add(
        &self,
        persistent: bool,
        network_id: Option<i32>,
        frequency: Option<u32>,
    ) -> Result<(), HalError> {
        let mut args = vec!["P2P_GROUP_ADD".to_string()];
        match (persistent, network_id) {
            (_, Some(id)) => args.push(format!("persistent={id}")),
            (true, None) => args.push("persistent".into()),
            (false, None) => {}
        }
        if let Some(freq) = frequency {
            args.push(format!("freq={freq}"));
        }
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.request_ok(&args)
    }

    fn remove_group(&self, interface: &str) -> Result<(), HalError> {
        self.request_ok(&["P2P_GROUP_REMOVE", interface])
    }

    fn invite(
        &self,
        interface: &str,
        go_address: MacAddress,
        peer: MacAddress,
    ) -> Result<(), HalError> {
        self.request_ok(&[
            "P2P_INVITE",
            &format!("group={interface}"),
            &format!("peer={peer}"),
            &format!("go_dev_addr={go_address}"),
        ])
    }

    fn reinvoke(&self, network_id: i32, peer: MacAddress) -> Result<(), HalError> {
        self.request_ok(&[
            "P2P_INVITE",
            &format!("persistent={network_id}"),
            &format!("peer={peer}"),
        ])
    }

    fn wps_pbc(&self, interface: &str) -> Result<(), HalError> {
        self.request_on(interface, &["WPS_PBC"]).map(|_| ())
    }

    fn wps_pin(&self, interface: &str, pin: &str) -> Result<(), HalError> {
        self.request_on(interface, &["WPS_PIN", "any", pin])
            .map(|_| ())
    }

    fn add_network(&self) -> Result<i32, HalError> {
        let reply = self.request(&["ADD_NETWORK"])?;
        reply
            .parse()
            .map_err(|_| HalError::Parse(format!("ADD_NETWORK reply: {reply}")))
    }

    fn remove_network(&self, network_id: i32) -> Result<(), HalError> {
        self.request_ok(&["REMOVE_NETWORK", &network_id.to_string()])
    }

    fn list_networks(&self) -> Result<Vec<HalNetwork>, HalError> {
        Ok(parse_networks(&self.request(&["LIST_NETWORKS"])?))
    }

    fn get_group_config(&self, network_id: i32) -> Result<HalGroupConfig, HalError> {
        let ssid = unquote(&self.get_network(network_id, "ssid")?);
        // psk 可能被 supplicant 隐藏为 '*'
        let passphrase = self
            .get_network(network_id, "psk")
            .map(|p| unquote(&p))
            .unwrap_or_default();
        let disabled = self.get_network(network_id, "disabled").unwrap_or_default();
        Ok(HalGroupConfig {
            ssid,
            passphrase,
            persistent: disabled == "2",
        })
    }

    fn set_group_config(&self, network_id: i32, config: &HalGroupConfig) -> Result<(), HalError> {
        self.set_network(network_id, "ssid", &format!("\"{}\"", config.ssid))?;
        if !config.passphrase.is_empty() {
            self.set_network(network_id, "psk", &format!("\"{}\"", config.passphrase))?;
        }
        self.set_network(network_id, "mode", "3")?;
        if config.persistent {
            self.set_network(network_id, "disabled", "2")?;
        }
        Ok(())
    }

    fn save_config(&self) -> Result<(), HalError> {
        self.request_ok(&["SAVE_CONFIG"])
    }

    fn frequencies_by_band(&self, band: GroupOwnerBand) -> Result<Vec<u32>, HalError> {
        let in_band = |f: &u32| match band {
            GroupOwnerBand::Band2G => (2400..2500).contains(f),
            GroupOwnerBand::Band5G => (4900..5900).contains(f),
            GroupOwnerBand::Auto => true,
        };
        let reported: Vec<u32> = match self.request(&["GET_CAPABILITY", "freq"]) {
            Ok(reply) => FREQUENCY
                .captures_iter(&reply)
                .filter_map(|c| c.get(1)?.as_str().parse().ok())
                .filter(in_band)
                .collect(),
            Err(e) => {
                debug!("GET_CAPABILITY freq unavailable: {}", e);
                Vec::new()
            }
        };
        if !reported.is_empty() {
            return Ok(reported);
        }
        Ok(CHANNELS_2G
            .iter()
            .chain(CHANNELS_5G.iter())
            .copied()
            .filter(in_band)
            .collect())
    }

    fn service_add(&self, service: &SupplicantService) -> Result<(), HalError> {
        let args = service.add_args();
        let mut argv = vec!["P2P_SERVICE_ADD"];
        argv.extend(args.split(' '));
        self.request_ok(&argv)
    }

    fn service_del(&self, service: &SupplicantService) -> Result<(), HalError> {
        let args = service.del_args();
        let mut argv = vec!["P2P_SERVICE_DEL"];
        argv.extend(args.split(' '));
        self.request_ok(&argv)
    }

    fn serv_disc_req(&self, peer: MacAddress, tlvs_hex: &str) -> Result<String, HalError> {
        let target = if peer.is_zero() {
            "00:00:00:00:00:00".to_string()
        } else {
            peer.to_string()
        };
        self.request(&["P2P_SERV_DISC_REQ", &target, tlvs_hex])
    }

    fn serv_disc_cancel_req(&self, query_id: &str) -> Result<(), HalError> {
        self.request_ok(&["P2P_SERV_DISC_CANCEL_REQ", query_id])
    }
}
