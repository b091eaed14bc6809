//! 驱动 / wpa_supplicant 边界
//!
//! 状态机只通过 [`P2pHal`] 访问底层；调用在工作任务中同步执行，
//! 异步事件（监视器输出）经 [`HalEventSink`] 投递回消息队列。
//!
//! - **event**: wpa_supplicant 事件行解析为 [`HalEvent`]
//! - **wpa_cli**: 基于 `wpa_cli` 命令的实现
//! - **monitor**: 读取 `wpa_cli` 交互输出的后台任务

mod event;
mod monitor;
mod wpa_cli;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::service::SupplicantService;
use crate::types::{GroupOwnerBand, MacAddress, PeerDevice, WpsInfo, WpsMethod};

pub use event::{HalEvent, parse_event, parse_peer_info};
pub use monitor::spawn_monitor;
pub use wpa_cli::WpaCliHal;

/// HAL 调用错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HalError {
    #[error("Failed to run command: {0}")]
    CommandFailed(String),

    #[error("Supplicant rejected '{command}': {reply}")]
    Rejected { command: String, reply: String },

    #[error("Supplicant not connected")]
    NotConnected,

    #[error("Failed to parse reply: {0}")]
    Parse(String),
}

/// HAL 异步事件的投递目标
pub type HalEventSink = Arc<dyn Fn(HalEvent) + Send + Sync>;

/// `LIST_NETWORKS` 中的一行
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HalNetwork {
    pub network_id: i32,
    pub ssid: String,
    pub bssid: Option<MacAddress>,
    pub flags: String,
}

impl HalNetwork {
    pub fn is_persistent(&self) -> bool {
        self.flags.contains("[P2P-PERSISTENT]")
    }
}

/// 单个网络的组配置
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HalGroupConfig {
    pub ssid: String,
    pub passphrase: String,
    /// 作为持久组（`disabled=2`）
    pub persistent: bool,
}

/// 本机设备参数
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceConfig {
    pub device_name: String,
    pub primary_device_type: String,
    /// wps config methods，如 `push_button keypad display`
    pub config_methods: String,
    pub persistent_reconnect: bool,
}

/// `P2P_CONNECT` 参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub peer: MacAddress,
    pub wps: WpsInfo,
    pub go_intent: i32,
    /// 加入已存在的组
    pub join: bool,
    pub persistent: bool,
    pub network_id: Option<i32>,
    pub frequency: Option<u32>,
}

impl ConnectRequest {
    pub fn new(peer: MacAddress, wps: WpsInfo, go_intent: i32) -> Self {
        Self {
            peer,
            wps,
            go_intent,
            join: false,
            persistent: true,
            network_id: None,
            frequency: None,
        }
    }
}

/// 底层 P2P 接口
pub trait P2pHal: Send {
    /// 开始 P2P；就绪通过 [`HalEvent::SupplicantConnected`] 异步通知
    fn start_p2p(&self) -> Result<(), HalError>;
    /// 停止 P2P；完成通过 [`HalEvent::SupplicantTerminating`] 异步通知
    fn stop_p2p(&self) -> Result<(), HalError>;

    fn device_address(&self) -> Result<MacAddress, HalError>;
    fn set_device_config(&self, config: &DeviceConfig) -> Result<(), HalError>;
    fn set_device_name(&self, name: &str) -> Result<(), HalError>;
    fn peer_info(&self, peer: MacAddress) -> Result<PeerDevice, HalError>;

    fn find(&self, timeout_secs: u32) -> Result<(), HalError>;
    fn stop_find(&self) -> Result<(), HalError>;
    fn set_ext_listen(&self, enable: bool, period_ms: u32, interval_ms: u32)
    -> Result<(), HalError>;

    /// 返回值为 supplicant 生成的 PIN（仅 display 模式）
    fn connect(&self, request: &ConnectRequest) -> Result<Option<String>, HalError>;
    fn cancel_connect(&self) -> Result<(), HalError>;
    fn provision_discovery(&self, peer: MacAddress, method: WpsMethod) -> Result<(), HalError>;

    fn group_add(
        &self,
        persistent: bool,
        network_id: Option<i32>,
        frequency: Option<u32>,
    ) -> Result<(), HalError>;
    fn remove_group(&self, interface: &str) -> Result<(), HalError>;
    fn invite(&self, interface: &str, go_address: MacAddress, peer: MacAddress)
    -> Result<(), HalError>;
    fn reinvoke(&self, network_id: i32, peer: MacAddress) -> Result<(), HalError>;
    fn wps_pbc(&self, interface: &str) -> Result<(), HalError>;
    fn wps_pin(&self, interface: &str, pin: &str) -> Result<(), HalError>;

    fn add_network(&self) -> Result<i32, HalError>;
    fn remove_network(&self, network_id: i32) -> Result<(), HalError>;
    fn list_networks(&self) -> Result<Vec<HalNetwork>, HalError>;
    fn get_group_config(&self, network_id: i32) -> Result<HalGroupConfig, HalError>;
    fn set_group_config(&self, network_id: i32, config: &HalGroupConfig) -> Result<(), HalError>;
    fn save_config(&self) -> Result<(), HalError>;
    fn frequencies_by_band(&self, band: GroupOwnerBand) -> Result<Vec<u32>, HalError>;

    fn service_add(&self, service: &SupplicantService) -> Result<(), HalError>;
    fn service_del(&self, service: &SupplicantService) -> Result<(), HalError>;
    /// 返回查询 ID，用于取消
    fn serv_disc_req(&self, peer: MacAddress, tlvs_hex: &str) -> Result<String, HalError>;
    fn serv_disc_cancel_req(&self, query_id: &str) -> Result<(), HalError>;
}
