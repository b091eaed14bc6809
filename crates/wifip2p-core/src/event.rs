//! 对外事件
//!
//! 状态机把状态变化推送给所有订阅者（daemon 的 IPC 连接、测试等）。
//! 事件只携带副本，不会引用状态机内部的表。

use std::collections::BTreeMap;

use log::trace;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::service::ServiceType;
use crate::types::{ConnectionInfo, ErrCode, GroupInfo, P2pAction, PeerDevice};

/// 需要用户决定的请求
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromptKind {
    /// 对端发起 GO 协商
    Negotiation,
    /// 对端邀请本机加入组
    Invitation,
    /// 本机为 GO 时对端请求加入
    JoinRequest,
    /// 在本机显示 PIN，由对端输入
    ShowPin,
    /// 输入对端显示的 PIN
    EnterPin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum P2pEvent {
    EnableStateChanged {
        enabled: bool,
    },
    PeersChanged {
        devices: Vec<PeerDevice>,
    },
    ServicesChanged,
    ConnectionChanged {
        info: ConnectionInfo,
        group: Option<GroupInfo>,
    },
    ThisDeviceChanged {
        device: PeerDevice,
    },
    DiscoveryChanged {
        active: bool,
    },
    PersistentGroupsChanged {
        groups: Vec<GroupInfo>,
    },
    ActionResult {
        action: P2pAction,
        code: ErrCode,
    },
    /// 任意协议的原始响应
    ServiceAvailable {
        protocol: ServiceType,
        data: Vec<u8>,
        source: PeerDevice,
    },
    DnsSdServiceAvailable {
        instance_name: String,
        registration_type: String,
        source: PeerDevice,
    },
    DnsSdTxtRecordAvailable {
        full_domain_name: String,
        txt_record: BTreeMap<String, String>,
        source: PeerDevice,
    },
    UpnpServiceAvailable {
        unique_service_names: Vec<String>,
        source: PeerDevice,
    },
    /// 回复通过 `UserAccept` / `UserReject` / `UserConfirm` 消息送回状态机
    UserPrompt {
        kind: PromptKind,
        peer: PeerDevice,
        pin: Option<String>,
    },
}

/// 事件广播器
///
/// 没有订阅者时事件直接丢弃；落后太多的订阅者会收到 `Lagged`。
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<P2pEvent>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<P2pEvent> {
        self.tx.subscribe()
    }

    pub fn send(&self, event: P2pEvent) {
        trace!("Broadcast {:?}", event);
        let _ = self.tx.send(event);
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
