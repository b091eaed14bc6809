//! 设备 / 组 / 服务管理
//!
//! 三张表都只由状态机工作任务持有和修改，外部读者只拿到副本。

mod device;
mod group;
mod service;

pub use device::DeviceManager;
pub use group::GroupManager;
pub use service::ServiceManager;

use crate::types::{
    ConnectionConfig, MAX_GROUP_NAME_LENGTH, MAX_GROUP_OWNER_INTENT, MIN_GROUP_OWNER_INTENT,
    MacAddress, P2pConfigErrCode,
};

/// 校验连接参数，成功时返回解析后的对端地址
///
/// 检查顺序固定：地址为空、地址格式、未知对端、GO intent、组名长度。
pub fn check_config_usable(
    config: &ConnectionConfig,
    devices: &DeviceManager,
) -> Result<MacAddress, P2pConfigErrCode> {
    if config.device_address.is_empty() {
        return Err(P2pConfigErrCode::MacEmpty);
    }
    let address: MacAddress = config
        .device_address
        .parse()
        .map_err(|_| P2pConfigErrCode::ErrMacFormat)?;
    if !devices.get_device(address).is_valid() {
        return Err(P2pConfigErrCode::MacNotFound);
    }
    if !(MIN_GROUP_OWNER_INTENT..=MAX_GROUP_OWNER_INTENT).contains(&config.group_owner_intent) {
        return Err(P2pConfigErrCode::ErrIntent);
    }
    if config.group_name.len() > MAX_GROUP_NAME_LENGTH {
        return Err(P2pConfigErrCode::ErrSizeNwName);
    }
    Ok(address)
}
