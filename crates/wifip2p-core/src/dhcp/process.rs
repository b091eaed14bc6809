//! 基于系统命令的 DHCP 实现
//!
//! - 客户端: `dhclient`
//! - 服务器: `dnsmasq`（前台运行，由本进程持有）
//! - 地址与路由: `ip`

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::time::Duration;

use log::{debug, info, warn};

use super::{DhcpError, DhcpResult, DhcpResultSink, DhcpServerConfig, DhcpService};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Default)]
pub struct ProcessDhcp {
    servers: Mutex<HashMap<String, Child>>,
}

impl ProcessDhcp {
    pub fn new() -> Self {
        Self::default()
    }
}

fn run(program: &str, args: &[&str]) -> Result<String, DhcpError> {
    debug!("{} {}", program, args.join(" "));
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| DhcpError::CommandFailed(format!("{program}: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(DhcpError::CommandFailed(format!(
            "{program} {}: {}",
            args.join(" "),
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// 从 `ip -o addr show` 输出中取第一个 IPv4 地址和前缀长度
pub fn parse_inet(output: &str) -> Option<(Ipv4Addr, u8)> {
    output.lines().find_map(|line| {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let pos = parts.iter().position(|&s| s == "inet")?;
        let (ip, prefix) = parts.get(pos + 1)?.split_once('/')?;
        Some((ip.parse().ok()?, prefix.parse().ok()?))
    })
}

/// 从 `ip route show dev <iface>` 输出中取默认网关
pub fn parse_gateway(output: &str) -> Option<Ipv4Addr> {
    output.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("default via ")?;
        rest.split_whitespace().next()?.parse().ok()
    })
}

pub fn prefix_to_mask(prefix_len: u8) -> Ipv4Addr {
    let bits = match prefix_len {
        0 => 0,
        p if p >= 32 => u32::MAX,
        p => u32::MAX << (32 - u32::from(p)),
    };
    Ipv4Addr::from(bits)
}

fn network_of(address: Ipv4Addr, prefix_len: u8) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(address) & u32::from(prefix_to_mask(prefix_len)))
}

fn interface_address(interface: &str) -> Option<(Ipv4Addr, u8)> {
    run("ip", &["-o", "-4", "addr", "show", interface])
        .ok()
        .and_then(|out| parse_inet(&out))
}

/// 客户端拿到地址后推断服务器地址：优先默认网关，否则取子网第一个主机
fn client_result(interface: &str, address: Ipv4Addr, prefix_len: u8) -> DhcpResult {
    let server_address = run("ip", &["route", "show", "dev", interface])
        .ok()
        .and_then(|out| parse_gateway(&out))
        .unwrap_or_else(|| {
            Ipv4Addr::from(u32::from(network_of(address, prefix_len)) + 1)
        });
    DhcpResult {
        server_address,
        client_address: address,
        subnet_mask: prefix_to_mask(prefix_len),
    }
}

impl DhcpService for ProcessDhcp {
    fn start_client(&self, interface: &str) -> Result<(), DhcpError> {
        info!("Starting DHCP client on {}", interface);
        run("dhclient", &["-nw", interface]).map(|_| ())
    }

    fn stop_client(&self, interface: &str) -> Result<(), DhcpError> {
        info!("Stopping DHCP client on {}", interface);
        run("dhclient", &["-r", interface]).map(|_| ())
    }

    fn start_server(
        &self,
        interface: &str,
        config: &DhcpServerConfig,
    ) -> Result<Ipv4Addr, DhcpError> {
        let mut servers = self
            .servers
            .lock()
            .map_err(|_| DhcpError::CommandFailed("server table poisoned".into()))?;
        if servers.contains_key(interface) {
            return Err(DhcpError::AlreadyRunning(interface.to_string()));
        }

        let cidr = format!("{}/{}", config.address, config.prefix_len);
        if let Err(e) = run("ip", &["addr", "add", &cidr, "dev", interface]) {
            // 地址已存在时 ip 返回错误，忽略
            debug!("ip addr add: {}", e);
        }
        run("ip", &["link", "set", interface, "up"])?;

        let child = Command::new("dnsmasq")
            .args([
                "--keep-in-foreground",
                "--no-resolv",
                "--no-hosts",
                "--bind-interfaces",
                "--except-interface=lo",
                &format!("--interface={interface}"),
                &format!(
                    "--dhcp-range={},{},{}",
                    config.range_start, config.range_end, config.lease_time
                ),
                &format!("--pid-file=/run/wifip2p-dnsmasq-{interface}.pid"),
            ])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| DhcpError::CommandFailed(format!("dnsmasq: {e}")))?;

        info!(
            "DHCP server started on {} ({}), pid {}",
            interface,
            cidr,
            child.id()
        );
        servers.insert(interface.to_string(), child);
        Ok(config.address)
    }

    fn stop_server(&self, interface: &str) -> Result<(), DhcpError> {
        let child = self
            .servers
            .lock()
            .map_err(|_| DhcpError::CommandFailed("server table poisoned".into()))?
            .remove(interface);
        if let Some(mut child) = child {
            if let Err(e) = child.kill() {
                warn!("Failed to stop dnsmasq on {}: {}", interface, e);
            }
            let _ = child.wait();
            info!("DHCP server on {} stopped", interface);
        }
        Ok(())
    }

    fn get_result(
        &self,
        interface: &str,
        sink: DhcpResultSink,
        timeout: Duration,
    ) -> Result<(), DhcpError> {
        let interface = interface.to_string();
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return Err(DhcpError::CommandFailed("no async runtime".into()));
        };
        handle.spawn(async move {
            let deadline = tokio::time::Instant::now() + timeout;
            loop {
                let iface = interface.clone();
                let found = tokio::task::spawn_blocking(move || interface_address(&iface))
                    .await
                    .ok()
                    .flatten();
                if let Some((address, prefix_len)) = found {
                    let iface = interface.clone();
                    let result = tokio::task::spawn_blocking(move || {
                        client_result(&iface, address, prefix_len)
                    })
                    .await;
                    match result {
                        Ok(result) => sink.on_success(0, &interface, result),
                        Err(e) => sink.on_failed(-1, &interface, &e.to_string()),
                    }
                    return;
                }
                if tokio::time::Instant::now() >= deadline {
                    sink.on_failed(-1, &interface, "timeout waiting for address");
                    return;
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        });
        Ok(())
    }

    fn add_route(
        &self,
        interface: &str,
        address: Ipv4Addr,
        prefix_len: u8,
    ) -> Result<(), DhcpError> {
        let network = format!("{}/{}", network_of(address, prefix_len), prefix_len);
        run("ip", &["route", "replace", &network, "dev", interface]).map(|_| ())
    }
}

impl Drop for ProcessDhcp {
    fn drop(&mut self) {
        if let Ok(servers) = self.servers.get_mut() {
            for (interface, child) in servers.iter_mut() {
                debug!("Killing dnsmasq on {}", interface);
                let _ = child.kill();
                let _ = child.wait();
            }
        }
    }
}
