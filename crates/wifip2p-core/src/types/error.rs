//! 错误码
//!
//! - [`P2pConfigErrCode`]: 连接参数校验错误，在任何状态切换之前同步返回
//! - [`ErrCode`]: action-result 回调携带的结果码

use serde::{Deserialize, Serialize};

/// 连接参数校验错误（按检查顺序排列）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum P2pConfigErrCode {
    #[error("Device address is empty")]
    MacEmpty,

    #[error("Device address is malformed")]
    ErrMacFormat,

    #[error("Device address is not a known peer")]
    MacNotFound,

    #[error("Group owner intent out of range")]
    ErrIntent,

    #[error("Group name is too long")]
    ErrSizeNwName,
}

/// 对外回调的结果码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrCode {
    Success,
    Failed,
    /// P2P 未开启
    NotOpened,
    /// 当前状态不接受该操作
    Busy,
    InvalidParam,
    NotSupported,
    /// 用户或对端拒绝
    Rejected,
    Config(P2pConfigErrCode),
}

impl ErrCode {
    pub fn is_success(self) -> bool {
        self == ErrCode::Success
    }
}

impl From<P2pConfigErrCode> for ErrCode {
    fn from(code: P2pConfigErrCode) -> Self {
        ErrCode::Config(code)
    }
}

/// action-result 回调对应的操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum P2pAction {
    Enable,
    Disable,
    DiscoverPeers,
    StopDiscoverPeers,
    DiscoverServices,
    StopDiscoverServices,
    RequestService,
    PutLocalService,
    DeleteLocalService,
    Connect,
    CancelConnect,
    CreateGroup,
    RemoveGroup,
    DeleteGroup,
    Invite,
    SetDeviceName,
    StartListen,
    StopListen,
}
