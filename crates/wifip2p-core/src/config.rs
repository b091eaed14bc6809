//! 应用配置和持久化
//!
//! 设备名、P2P 接口、超时、DHCP 参数等设置的存储和读取。

use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dhcp::DhcpServerConfig;
use crate::logging::LogLevel;
use crate::types::{DEFAULT_GROUP_OWNER_INTENT, GroupOwnerBand};

/// 应用设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// 设备名称（对端扫描时显示）
    pub device_name: String,
    /// P2P 控制接口，如 p2p-dev-wlan0
    pub p2p_interface: String,
    /// WPS 主设备类型
    pub primary_device_type: String,
    /// 支持的 WPS 配置方法
    pub config_methods: String,
    /// 作为 GC 加入组后是否运行 DHCP 客户端
    pub needs_dhcp: bool,
    pub discovery_timeout_secs: u64,
    pub group_formation_timeout_secs: u64,
    pub dhcp_timeout_secs: u64,
    pub go_intent: i32,
    pub preferred_band: GroupOwnerBand,
    pub persistent_reconnect: bool,
    /// 自建组的 SSID 前缀
    pub group_name_prefix: String,
    /// GO 侧 DHCP 服务器
    pub dhcp_server: DhcpServerConfig,
    pub log_level: LogLevel,
    /// 持久组与连接状态的存储文件
    pub state_file: PathBuf,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            device_name: get_default_device_name(),
            p2p_interface: "p2p-dev-wlan0".to_string(),
            primary_device_type: "10-0050F204-5".to_string(),
            config_methods: "push_button keypad display".to_string(),
            needs_dhcp: true,
            discovery_timeout_secs: 120,
            group_formation_timeout_secs: 60,
            dhcp_timeout_secs: 30,
            go_intent: DEFAULT_GROUP_OWNER_INTENT,
            preferred_band: GroupOwnerBand::Auto,
            persistent_reconnect: true,
            group_name_prefix: "DIRECT-".to_string(),
            dhcp_server: DhcpServerConfig::default(),
            log_level: LogLevel::Debug,
            state_file: Self::config_dir().join("state.toml"),
        }
    }
}

impl AppSettings {
    fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("wifip2p")
    }

    /// 获取配置文件路径
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("settings.toml")
    }

    /// 加载设置（如果文件不存在则使用默认值）
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(settings) => {
                        debug!("Loaded settings from {:?}", path);
                        return settings;
                    }
                    Err(e) => {
                        log::warn!("Failed to parse settings: {}, using defaults", e);
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read settings file: {}, using defaults", e);
                }
            }
        }
        Self::default()
    }

    /// 保存设置
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        debug!("Saved settings to {:?}", path);
        Ok(())
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }

    pub fn group_formation_timeout(&self) -> Duration {
        Duration::from_secs(self.group_formation_timeout_secs)
    }

    pub fn dhcp_timeout(&self) -> Duration {
        Duration::from_secs(self.dhcp_timeout_secs)
    }
}

/// 获取默认设备名称（主机名）
fn get_default_device_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "wifip2p".to_string())
}
