//! 对端设备

use serde::{Deserialize, Serialize};

use super::MacAddress;

/// 设备能力位 (P2P Capability attribute, Device Capability Bitmap)
pub mod device_capability {
    pub const SERVICE_DISCOVERY: u8 = 0x01;
    pub const CLIENT_DISCOVERABILITY: u8 = 0x02;
    pub const CONCURRENT_OPERATION: u8 = 0x04;
    pub const INFRASTRUCTURE_MANAGED: u8 = 0x08;
    pub const DEVICE_LIMIT: u8 = 0x10;
    pub const INVITATION_PROCEDURE: u8 = 0x20;
}

/// 组能力位 (Group Capability Bitmap)
pub mod group_capability {
    pub const GROUP_OWNER: u8 = 0x01;
    pub const PERSISTENT_GROUP: u8 = 0x02;
    pub const GROUP_LIMIT: u8 = 0x04;
    pub const INTRA_BSS_DISTRIBUTION: u8 = 0x08;
    pub const CROSS_CONNECTION: u8 = 0x10;
    pub const PERSISTENT_RECONNECT: u8 = 0x20;
    pub const GROUP_FORMATION: u8 = 0x40;
}

/// WPS 配置方法位
pub mod wps_config_method {
    pub const DISPLAY: u16 = 0x0008;
    pub const PUSHBUTTON: u16 = 0x0080;
    pub const KEYPAD: u16 = 0x0100;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum P2pDeviceStatus {
    Connected,
    Invited,
    Failed,
    #[default]
    Available,
    Unavailable,
}

/// 对端设备信息
///
/// 相等性只比较设备地址。地址为全零表示 "无效设备"，
/// [`DeviceManager::get_device`](crate::manager::DeviceManager::get_device) 找不到时返回它。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerDevice {
    pub device_name: String,
    pub device_address: MacAddress,
    pub primary_device_type: String,
    pub secondary_device_type: String,
    pub wps_config_methods: u16,
    pub device_capabilities: u8,
    pub group_capabilities: u8,
    pub status: P2pDeviceStatus,
}

impl PartialEq for PeerDevice {
    fn eq(&self, other: &Self) -> bool {
        self.device_address == other.device_address
    }
}

impl Eq for PeerDevice {}

impl PeerDevice {
    pub fn new(device_address: MacAddress, device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            device_address,
            ..Default::default()
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.device_address.is_zero()
    }

    pub fn is_group_owner(&self) -> bool {
        self.group_capabilities & group_capability::GROUP_OWNER != 0
    }

    /// 作为 GO 时客户端数量已达上限
    pub fn is_group_limit(&self) -> bool {
        self.group_capabilities & group_capability::GROUP_LIMIT != 0
    }

    pub fn is_device_limit(&self) -> bool {
        self.device_capabilities & device_capability::DEVICE_LIMIT != 0
    }

    pub fn is_inviteable(&self) -> bool {
        self.device_capabilities & device_capability::INVITATION_PROCEDURE != 0
    }

    pub fn is_service_discovery_supported(&self) -> bool {
        self.device_capabilities & device_capability::SERVICE_DISCOVERY != 0
    }

    pub fn supports_pbc(&self) -> bool {
        self.wps_config_methods & wps_config_method::PUSHBUTTON != 0
    }

    pub fn supports_display(&self) -> bool {
        self.wps_config_methods & wps_config_method::DISPLAY != 0
    }

    pub fn supports_keypad(&self) -> bool {
        self.wps_config_methods & wps_config_method::KEYPAD != 0
    }

    /// 用新发现的信息刷新本条记录，连接状态保持不变
    pub fn refresh_from(&mut self, found: &PeerDevice) {
        if !found.device_name.is_empty() {
            self.device_name.clone_from(&found.device_name);
        }
        if !found.primary_device_type.is_empty() {
            self.primary_device_type
                .clone_from(&found.primary_device_type);
        }
        if !found.secondary_device_type.is_empty() {
            self.secondary_device_type
                .clone_from(&found.secondary_device_type);
        }
        self.wps_config_methods = found.wps_config_methods;
        self.device_capabilities = found.device_capabilities;
        self.group_capabilities = found.group_capabilities;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(last: u8) -> MacAddress {
        MacAddress::new([0x02, 0, 0, 0, 0, last])
    }

    #[test]
    fn test_equality_by_address() {
        let a = PeerDevice::new(mac(1), "phone");
        let mut b = PeerDevice::new(mac(1), "renamed");
        b.status = P2pDeviceStatus::Connected;
        assert_eq!(a, b);
        assert_ne!(a, PeerDevice::new(mac(2), "phone"));
    }

    #[test]
    fn test_capabilities() {
        let mut dev = PeerDevice::new(mac(1), "tv");
        assert!(!dev.is_group_owner());
        dev.group_capabilities = group_capability::GROUP_OWNER | group_capability::GROUP_LIMIT;
        dev.device_capabilities = device_capability::INVITATION_PROCEDURE;
        assert!(dev.is_group_owner());
        assert!(dev.is_group_limit());
        assert!(dev.is_inviteable());
        assert!(!dev.is_device_limit());
    }

    #[test]
    fn test_refresh_keeps_status() {
        let mut known = PeerDevice::new(mac(1), "old");
        known.status = P2pDeviceStatus::Invited;
        let mut found = PeerDevice::new(mac(1), "new");
        found.wps_config_methods = wps_config_method::PUSHBUTTON;
        known.refresh_from(&found);
        assert_eq!(known.device_name, "new");
        assert!(known.supports_pbc());
        assert_eq!(known.status, P2pDeviceStatus::Invited);
    }

    #[test]
    fn test_default_is_invalid() {
        assert!(!PeerDevice::default().is_valid());
    }
}
