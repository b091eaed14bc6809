//! 状态机的外部句柄
//!
//! 句柄只负责把命令和查询入队；结果通过事件订阅或一次性回复返回。

use std::sync::Arc;

use log::warn;
use tokio::sync::broadcast;

use super::{P2pMessage, P2pState, Query, Reply};
use crate::event::{EventBroadcaster, P2pEvent};
use crate::hal::{HalEvent, HalEventSink};
use crate::hsm::MessageSender;
use crate::service::{ServiceInfo, ServiceRequest, ServiceResponse};
use crate::types::{ConnectionConfig, ConnectionInfo, ErrCode, GroupInfo, PeerDevice};

/// HAL 事件投递到状态机队列
pub fn hal_event_sink(sender: &MessageSender<P2pMessage>) -> HalEventSink {
    let sender = sender.clone();
    Arc::new(move |event: HalEvent| {
        if !sender.send(event) {
            warn!("State machine gone, supplicant event dropped");
        }
    })
}

#[derive(Debug, Clone)]
pub struct P2pHandle {
    sender: MessageSender<P2pMessage>,
    events: EventBroadcaster,
}

impl P2pHandle {
    pub fn new(sender: MessageSender<P2pMessage>, events: EventBroadcaster) -> Self {
        Self { sender, events }
    }

    /// 入队任意消息；状态机已退出时返回 false
    pub fn send(&self, msg: impl Into<P2pMessage>) -> bool {
        self.sender.send(msg)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<P2pEvent> {
        self.events.subscribe()
    }

    pub fn enable(&self) -> bool {
        self.send(P2pMessage::Enable)
    }

    pub fn disable(&self) -> bool {
        self.send(P2pMessage::Disable)
    }

    pub fn discover_peers(&self) -> bool {
        self.send(P2pMessage::DiscoverPeers)
    }

    pub fn stop_discover_peers(&self) -> bool {
        self.send(P2pMessage::StopDiscoverPeers)
    }

    pub fn discover_services(&self) -> bool {
        self.send(P2pMessage::DiscoverServices)
    }

    pub fn stop_discover_services(&self) -> bool {
        self.send(P2pMessage::StopDiscoverServices)
    }

    pub fn add_service_request(&self, request: ServiceRequest) -> bool {
        self.send(P2pMessage::AddServiceRequest(request))
    }

    pub fn remove_service_request(&self, request: ServiceRequest) -> bool {
        self.send(P2pMessage::RemoveServiceRequest(request))
    }

    pub fn clear_service_requests(&self) -> bool {
        self.send(P2pMessage::ClearServiceRequests)
    }

    pub fn put_local_service(&self, info: ServiceInfo) -> bool {
        self.send(P2pMessage::PutLocalService(info))
    }

    pub fn delete_local_service(&self, info: ServiceInfo) -> bool {
        self.send(P2pMessage::DeleteLocalService(info))
    }

    /// 发起连接，返回参数校验结果
    ///
    /// 校验通过只表示连接已开始，最终结果以 `ActionResult` 事件为准。
    pub async fn connect(&self, config: ConnectionConfig) -> ErrCode {
        let (reply, rx) = Reply::channel();
        if !self.send(P2pMessage::Connect { config, reply }) {
            return ErrCode::NotOpened;
        }
        rx.await.unwrap_or(ErrCode::Failed)
    }

    pub fn cancel_connect(&self) -> bool {
        self.send(P2pMessage::CancelConnect)
    }

    pub fn create_group(&self, config: ConnectionConfig) -> bool {
        self.send(P2pMessage::CreateGroup(config))
    }

    pub fn remove_group(&self) -> bool {
        self.send(P2pMessage::RemoveGroup)
    }

    pub fn delete_group(&self, network_id: i32) -> bool {
        self.send(P2pMessage::DeleteGroup(network_id))
    }

    pub fn invite(&self, device_address: impl Into<String>) -> bool {
        self.send(P2pMessage::Invite(device_address.into()))
    }

    pub fn set_device_name(&self, name: impl Into<String>) -> bool {
        self.send(P2pMessage::SetDeviceName(name.into()))
    }

    pub fn start_listen(&self, period_ms: u32, interval_ms: u32) -> bool {
        self.send(P2pMessage::StartListen {
            period_ms,
            interval_ms,
        })
    }

    pub fn stop_listen(&self) -> bool {
        self.send(P2pMessage::StopListen)
    }

    pub fn accept(&self) -> bool {
        self.send(P2pMessage::UserAccept)
    }

    pub fn reject(&self) -> bool {
        self.send(P2pMessage::UserReject)
    }

    pub fn confirm_pin(&self, pin: impl Into<String>) -> bool {
        self.send(P2pMessage::UserConfirm(pin.into()))
    }

    // ------------------------------------------------------------------
    // 查询
    // ------------------------------------------------------------------

    /// 发送查询并等待回复；状态机已退出时返回 `None`
    pub async fn query<T>(&self, make: impl FnOnce(Reply<T>) -> Query) -> Option<T> {
        let (reply, rx) = Reply::channel();
        if !self.send(make(reply)) {
            return None;
        }
        rx.await.ok()
    }

    pub async fn devices(&self) -> Option<Vec<PeerDevice>> {
        self.query(Query::Devices).await
    }

    pub async fn groups(&self) -> Option<Vec<GroupInfo>> {
        self.query(Query::Groups).await
    }

    pub async fn connection(&self) -> Option<(ConnectionInfo, Option<GroupInfo>)> {
        self.query(Query::Connection).await
    }

    pub async fn this_device(&self) -> Option<PeerDevice> {
        self.query(Query::ThisDevice).await
    }

    pub async fn services(&self) -> Option<Vec<ServiceResponse>> {
        self.query(Query::Services).await
    }

    pub async fn is_enabled(&self) -> Option<bool> {
        self.query(Query::EnableState).await
    }

    pub async fn state(&self) -> Option<P2pState> {
        self.query(Query::State).await
    }
}
