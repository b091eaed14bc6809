//! 状态机消息
//!
//! 每种入站消息都是一个带类型字段的变体：API 命令、HAL 事件、DHCP 结果、
//! 用户回复、定时器到期以及只读查询。

use std::fmt;

use tokio::sync::oneshot;

use crate::dhcp::DhcpOutcome;
use crate::hal::HalEvent;
use crate::service::{ServiceInfo, ServiceRequest, ServiceResponse};
use crate::types::{ConnectionConfig, ConnectionInfo, ErrCode, GroupInfo, PeerDevice};

use super::P2pState;

/// 一次性回复槽
///
/// 处理函数只拿到消息的可变引用，回复时从槽中取出发送端。
pub struct Reply<T>(Option<oneshot::Sender<T>>);

impl<T> Reply<T> {
    pub fn channel() -> (Self, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        (Self(Some(tx)), rx)
    }

    /// 不需要回复
    pub fn none() -> Self {
        Self(None)
    }

    /// 只有第一次调用生效；接收端已关闭时忽略
    pub fn send(&mut self, value: T) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(value);
        }
    }
}

impl<T> fmt::Debug for Reply<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_some() {
            f.write_str("Reply(pending)")
        } else {
            f.write_str("Reply(none)")
        }
    }
}

/// 只读查询，回复的都是副本
#[derive(Debug)]
pub enum Query {
    Devices(Reply<Vec<PeerDevice>>),
    Groups(Reply<Vec<GroupInfo>>),
    Connection(Reply<(ConnectionInfo, Option<GroupInfo>)>),
    ThisDevice(Reply<PeerDevice>),
    Services(Reply<Vec<ServiceResponse>>),
    EnableState(Reply<bool>),
    State(Reply<P2pState>),
}

#[derive(Debug)]
pub enum P2pMessage {
    Enable,
    Disable,
    DiscoverPeers,
    StopDiscoverPeers,
    DiscoverServices,
    StopDiscoverServices,
    AddServiceRequest(ServiceRequest),
    RemoveServiceRequest(ServiceRequest),
    ClearServiceRequests,
    PutLocalService(ServiceInfo),
    DeleteLocalService(ServiceInfo),
    /// 校验结果在任何切换之前经 `reply` 返回
    Connect {
        config: ConnectionConfig,
        reply: Reply<ErrCode>,
    },
    CancelConnect,
    CreateGroup(ConnectionConfig),
    RemoveGroup,
    DeleteGroup(i32),
    /// 本机为 GO 时邀请对端加入当前组
    Invite(String),
    SetDeviceName(String),
    StartListen {
        period_ms: u32,
        interval_ms: u32,
    },
    StopListen,

    UserAccept,
    UserReject,
    /// 用户输入的 PIN
    UserConfirm(String),

    Hal(HalEvent),
    Dhcp(DhcpOutcome),

    /// GO 侧 DHCP 服务器就绪，或 GC 不需要 DHCP
    GroupReady,
    DiscoveryTimeout,
    GroupFormationTimeout,
    DhcpTimeout,
    /// Enabling / Disabling 的保护超时
    StateGuardTimeout,

    Query(Query),
}

impl From<HalEvent> for P2pMessage {
    fn from(event: HalEvent) -> Self {
        P2pMessage::Hal(event)
    }
}

impl From<DhcpOutcome> for P2pMessage {
    fn from(outcome: DhcpOutcome) -> Self {
        P2pMessage::Dhcp(outcome)
    }
}

impl From<Query> for P2pMessage {
    fn from(query: Query) -> Self {
        P2pMessage::Query(query)
    }
}

/// 定时器名
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKey {
    Discovery,
    GroupFormation,
    Dhcp,
    StateGuard,
}
