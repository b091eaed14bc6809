//! 数据模型：设备、组、连接参数、错误码

mod connection;
mod device;
mod error;
mod group;
mod mac;

pub use connection::{
    ConnectionConfig, ConnectionInfo, DEFAULT_GROUP_OWNER_INTENT, GroupOwnerBand,
    MAX_GROUP_OWNER_INTENT, MIN_GROUP_OWNER_INTENT, P2pConnectState, WpsInfo, WpsMethod,
};
pub use device::{
    P2pDeviceStatus, PeerDevice, device_capability, group_capability, wps_config_method,
};
pub use error::{ErrCode, P2pAction, P2pConfigErrCode};
pub use group::{
    GroupInfo, MAX_GROUP_NAME_LENGTH, MIN_GROUP_NAME_LENGTH, TEMPORARY_NET_ID,
    generate_passphrase, is_usable_group_name, is_usable_passphrase, make_group_name,
};
pub use mac::{MacAddress, MacParseError};
