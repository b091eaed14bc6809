//! DHCP 桥接
//!
//! 组建立后，GO 启动 DHCP 服务器，GC 启动 DHCP 客户端并等待结果。
//! 结果通过 [`DhcpResultSink`] 回调投递，状态机把它转换成消息重新入队。

mod process;

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use process::{ProcessDhcp, parse_gateway, parse_inet, prefix_to_mask};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DhcpError {
    #[error("Failed to run {0}")]
    CommandFailed(String),

    #[error("No IPv4 address on {0}")]
    NoAddress(String),

    #[error("DHCP server already running on {0}")]
    AlreadyRunning(String),
}

/// DHCP 成功结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DhcpResult {
    pub server_address: Ipv4Addr,
    pub client_address: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
}

/// 回调内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhcpOutcome {
    Success {
        status: i32,
        interface: String,
        result: DhcpResult,
    },
    Failure {
        status: i32,
        interface: String,
        reason: String,
    },
}

/// DHCP 结果通知目标，可在任意线程调用
#[derive(Clone)]
pub struct DhcpResultSink {
    notify: Arc<dyn Fn(DhcpOutcome) + Send + Sync>,
}

impl DhcpResultSink {
    pub fn new(notify: impl Fn(DhcpOutcome) + Send + Sync + 'static) -> Self {
        Self {
            notify: Arc::new(notify),
        }
    }

    pub fn on_success(&self, status: i32, interface: &str, result: DhcpResult) {
        (self.notify)(DhcpOutcome::Success {
            status,
            interface: interface.to_string(),
            result,
        });
    }

    pub fn on_failed(&self, status: i32, interface: &str, reason: &str) {
        (self.notify)(DhcpOutcome::Failure {
            status,
            interface: interface.to_string(),
            reason: reason.to_string(),
        });
    }
}

impl std::fmt::Debug for DhcpResultSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhcpResultSink").finish_non_exhaustive()
    }
}

/// GO 侧 DHCP 服务器参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DhcpServerConfig {
    pub address: Ipv4Addr,
    pub prefix_len: u8,
    pub range_start: Ipv4Addr,
    pub range_end: Ipv4Addr,
    pub lease_time: String,
}

impl Default for DhcpServerConfig {
    fn default() -> Self {
        Self {
            address: Ipv4Addr::new(192, 168, 49, 1),
            prefix_len: 24,
            range_start: Ipv4Addr::new(192, 168, 49, 2),
            range_end: Ipv4Addr::new(192, 168, 49, 254),
            lease_time: "1h".to_string(),
        }
    }
}

/// DHCP 客户端 / 服务器边界
pub trait DhcpService: Send {
    fn start_client(&self, interface: &str) -> Result<(), DhcpError>;
    fn stop_client(&self, interface: &str) -> Result<(), DhcpError>;

    /// 启动服务器，返回 GO 在组接口上的地址
    fn start_server(&self, interface: &str, config: &DhcpServerConfig)
    -> Result<Ipv4Addr, DhcpError>;
    fn stop_server(&self, interface: &str) -> Result<(), DhcpError>;

    /// 登记结果等待；结果（或超时失败）在 `timeout` 内经 `sink` 投递
    fn get_result(
        &self,
        interface: &str,
        sink: DhcpResultSink,
        timeout: Duration,
    ) -> Result<(), DhcpError>;

    /// 为组子网安装路由
    fn add_route(&self, interface: &str, address: Ipv4Addr, prefix_len: u8)
    -> Result<(), DhcpError>;
}
