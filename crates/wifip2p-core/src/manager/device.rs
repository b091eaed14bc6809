//! 对端设备表

use std::collections::BTreeMap;

use crate::types::{MacAddress, P2pDeviceStatus, PeerDevice};

/// 已发现的对端设备，以及本机设备
#[derive(Debug, Default)]
pub struct DeviceManager {
    this_device: PeerDevice,
    devices: BTreeMap<MacAddress, PeerDevice>,
}

impl DeviceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn this_device(&self) -> &PeerDevice {
        &self.this_device
    }

    pub fn this_device_mut(&mut self) -> &mut PeerDevice {
        &mut self.this_device
    }

    pub fn set_this_device(&mut self, device: PeerDevice) {
        self.this_device = device;
    }

    /// 插入或刷新；返回是否为新设备
    pub fn add_device(&mut self, device: PeerDevice) -> bool {
        if !device.is_valid() {
            return false;
        }
        match self.devices.get_mut(&device.device_address) {
            Some(known) => {
                known.refresh_from(&device);
                false
            }
            None => {
                self.devices.insert(device.device_address, device);
                true
            }
        }
    }

    pub fn remove_device(&mut self, address: MacAddress) -> bool {
        self.devices.remove(&address).is_some()
    }

    /// 找不到时返回无效设备，调用方用 [`PeerDevice::is_valid`] 判断
    pub fn get_device(&self, address: MacAddress) -> PeerDevice {
        self.devices.get(&address).cloned().unwrap_or_default()
    }

    pub fn update_device_status(&mut self, address: MacAddress, status: P2pDeviceStatus) -> bool {
        match self.devices.get_mut(&address) {
            Some(device) if device.status != status => {
                device.status = status;
                true
            }
            _ => false,
        }
    }

    /// 所有非 Connected 设备改为指定状态
    pub fn update_all_unconnected(&mut self, status: P2pDeviceStatus) {
        for device in self.devices.values_mut() {
            if device.status != P2pDeviceStatus::Connected {
                device.status = status;
            }
        }
    }

    /// 副本，不暴露内部表
    pub fn devices(&self) -> Vec<PeerDevice> {
        self.devices.values().cloned().collect()
    }

    /// 清空；返回表是否发生了变化
    pub fn clear_all(&mut self) -> bool {
        let changed = !self.devices.is_empty();
        self.devices.clear();
        changed
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
