//! 连接请求与连接状态

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

pub const MIN_GROUP_OWNER_INTENT: i32 = 0;
pub const MAX_GROUP_OWNER_INTENT: i32 = 15;
pub const DEFAULT_GROUP_OWNER_INTENT: i32 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WpsMethod {
    #[default]
    Pbc,
    Display,
    Keypad,
    Label,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WpsInfo {
    pub method: WpsMethod,
    #[serde(default)]
    pub pin: String,
}

impl WpsInfo {
    pub fn pbc() -> Self {
        Self::default()
    }

    pub fn with_pin(method: WpsMethod, pin: impl Into<String>) -> Self {
        Self {
            method,
            pin: pin.into(),
        }
    }
}

/// 组频段偏好
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GroupOwnerBand {
    #[default]
    Auto,
    Band2G,
    Band5G,
}

/// 一次连接尝试的参数，连接成功或失败后清除
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    pub device_address: String,
    #[serde(default)]
    pub group_name: String,
    #[serde(default)]
    pub passphrase: String,
    pub group_owner_intent: i32,
    #[serde(default)]
    pub wps: WpsInfo,
    /// 已有持久组的网络 ID（用于 reinvoke）
    #[serde(default)]
    pub network_id: Option<i32>,
    #[serde(default)]
    pub band: GroupOwnerBand,
    /// 作为 GC 加入组后是否启动 DHCP 客户端
    #[serde(default = "default_needs_dhcp")]
    pub needs_dhcp: bool,
}

fn default_needs_dhcp() -> bool {
    true
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            device_address: String::new(),
            group_name: String::new(),
            passphrase: String::new(),
            group_owner_intent: DEFAULT_GROUP_OWNER_INTENT,
            wps: WpsInfo::default(),
            network_id: None,
            band: GroupOwnerBand::Auto,
            needs_dhcp: true,
        }
    }
}

impl ConnectionConfig {
    pub fn new(device_address: impl Into<String>) -> Self {
        Self {
            device_address: device_address.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum P2pConnectState {
    #[default]
    Disconnected,
    Connected,
}

/// 对外暴露的唯一连接状态，每次相关切换都会整体覆盖并持久化
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub connect_state: P2pConnectState,
    pub is_group_owner: bool,
    pub group_owner_address: Option<Ipv4Addr>,
}

impl ConnectionInfo {
    pub fn disconnected() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.connect_state == P2pConnectState::Connected
    }
}
