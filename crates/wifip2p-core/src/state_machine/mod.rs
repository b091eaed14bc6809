//! P2P 状态机
//!
//! 状态树:
//!
//! ```text
//! Default
//! ├── Disabled (初始)
//! ├── Enabling
//! ├── Disabling
//! └── Enabled
//!     ├── Idle
//!     ├── GroupJoin
//!     ├── GroupOperating
//!     ├── Inviting
//!     │   ├── InvitationRequest
//!     │   └── InvitationReceived
//!     └── GroupFormation
//!         ├── GroupNegotiation
//!         ├── AuthorizingNegotiationRequest
//!         ├── ProvisionDiscovery
//!         └── GroupFormed
//! ```
//!
//! 所有处理函数都在工作任务中串行执行。HAL 事件、DHCP 回调、定时器和 API
//! 调用都先转换成 [`P2pMessage`] 入队，再由工作任务分发。
//!
//! 各状态的处理函数按子树拆分在 `lifecycle`、`formation`、`inviting`、
//! `operating` 中。

mod formation;
mod handle;
mod inviting;
mod lifecycle;
mod message;
mod operating;

#[cfg(test)]
mod tests;

pub use handle::{P2pHandle, hal_event_sink};
pub use message::{P2pMessage, Query, Reply, TimerKey};

use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::AppSettings;
use crate::dhcp::{DhcpResultSink, DhcpService};
use crate::event::{EventBroadcaster, P2pEvent, PromptKind};
use crate::hal::P2pHal;
use crate::hsm::{HsmError, MessageSender, Outcome, StateHandler, StateMachine, Timers};
use crate::manager::{DeviceManager, GroupManager, ServiceManager};
use crate::store::P2pStore;
use crate::types::{
    ConnectionConfig, ConnectionInfo, ErrCode, MacAddress, P2pAction, P2pDeviceStatus,
    PeerDevice, WpsInfo,
};

/// Enabling / Disabling 的最长等待
pub const STATE_GUARD_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum P2pState {
    Default,
    Disabled,
    Enabling,
    Enabled,
    Disabling,
    Idle,
    GroupJoin,
    GroupOperating,
    Inviting,
    InvitationRequest,
    InvitationReceived,
    GroupFormation,
    GroupNegotiation,
    AuthorizingNegotiationRequest,
    ProvisionDiscovery,
    GroupFormed,
}

/// 注册顺序即父状态先于子状态
const STATE_TREE: [(P2pState, Option<P2pState>); 16] = [
    (P2pState::Default, None),
    (P2pState::Disabled, Some(P2pState::Default)),
    (P2pState::Enabling, Some(P2pState::Default)),
    (P2pState::Enabled, Some(P2pState::Default)),
    (P2pState::Disabling, Some(P2pState::Default)),
    (P2pState::Idle, Some(P2pState::Enabled)),
    (P2pState::GroupJoin, Some(P2pState::Enabled)),
    (P2pState::GroupOperating, Some(P2pState::Enabled)),
    (P2pState::Inviting, Some(P2pState::Enabled)),
    (P2pState::InvitationRequest, Some(P2pState::Inviting)),
    (P2pState::InvitationReceived, Some(P2pState::Inviting)),
    (P2pState::GroupFormation, Some(P2pState::Enabled)),
    (P2pState::GroupNegotiation, Some(P2pState::GroupFormation)),
    (
        P2pState::AuthorizingNegotiationRequest,
        Some(P2pState::GroupFormation),
    ),
    (P2pState::ProvisionDiscovery, Some(P2pState::GroupFormation)),
    (P2pState::GroupFormed, Some(P2pState::GroupFormation)),
];

/// 状态机使用的外部实现
pub struct Backends {
    pub hal: Box<dyn P2pHal>,
    pub dhcp: Box<dyn DhcpService>,
    pub store: Box<dyn P2pStore>,
}

/// 对端发起、等待用户回复的请求
#[derive(Debug, Clone)]
pub(crate) struct PeerRequest {
    pub peer: PeerDevice,
    pub wps: WpsInfo,
    /// 邀请中的持久组网络 ID
    pub persistent_id: Option<i32>,
    pub go_address: Option<MacAddress>,
    pub frequency: Option<u32>,
}

impl PeerRequest {
    pub fn new(peer: PeerDevice, wps: WpsInfo) -> Self {
        Self {
            peer,
            wps,
            persistent_id: None,
            go_address: None,
            frequency: None,
        }
    }
}

/// 状态行为与全部运行数据
///
/// 三个管理器只在这里持有，处理函数拿到的是 `&mut self`，不会被保存到别处。
pub struct P2pStateMachine {
    settings: AppSettings,
    hal: Box<dyn P2pHal>,
    dhcp: Box<dyn DhcpService>,
    store: Box<dyn P2pStore>,
    events: EventBroadcaster,
    sender: MessageSender<P2pMessage>,
    timers: Timers<TimerKey, P2pMessage>,

    devices: DeviceManager,
    groups: GroupManager,
    services: ServiceManager,
    connection: ConnectionInfo,

    /// 当前连接尝试的参数，成功或失败后清除
    saved_config: Option<ConnectionConfig>,
    /// 为本次连接临时加入设备表的对端，失败时删除
    speculative_peer: Option<MacAddress>,
    pending: Option<PeerRequest>,
    /// 正在运行 DHCP 客户端的接口
    dhcp_client: Option<String>,
    discovering: bool,
    enabled: bool,
    leaf: P2pState,
}

impl P2pStateMachine {
    pub fn new(
        settings: AppSettings,
        backends: Backends,
        sender: MessageSender<P2pMessage>,
        events: EventBroadcaster,
    ) -> Self {
        let groups = match backends.store.load_groups() {
            Ok(groups) => {
                info!("Loaded {} persistent group(s)", groups.len());
                groups
            }
            Err(e) => {
                warn!("Failed to load persistent groups: {}", e);
                Vec::new()
            }
        };
        if let Ok(previous) = backends.store.load_connection()
            && previous.is_connected()
        {
            info!("Previous session ended while connected, resetting connection state");
        }

        let mut machine = Self {
            settings,
            hal: backends.hal,
            dhcp: backends.dhcp,
            store: backends.store,
            events,
            timers: Timers::new(sender.clone()),
            sender,
            devices: DeviceManager::new(),
            groups: GroupManager::with_groups(groups),
            services: ServiceManager::new(),
            connection: ConnectionInfo::disconnected(),
            saved_config: None,
            speculative_peer: None,
            pending: None,
            dhcp_client: None,
            discovering: false,
            enabled: false,
            leaf: P2pState::Default,
        };
        machine.save_connection();
        machine
    }

    /// 注册状态树，设置初始状态并启动
    pub fn build(
        settings: AppSettings,
        backends: Backends,
        sender: MessageSender<P2pMessage>,
        receiver: mpsc::UnboundedReceiver<P2pMessage>,
        events: EventBroadcaster,
    ) -> Result<StateMachine<Self>, HsmError> {
        let handler = Self::new(settings, backends, sender, events);
        let mut machine = StateMachine::new("P2pStateMachine", handler, receiver);
        for (state, parent) in STATE_TREE {
            machine.add_state(state, parent)?;
        }
        machine.set_first_state(P2pState::Disabled)?;
        machine.start()?;
        Ok(machine)
    }

    /// 构建状态机并在 tokio 任务中运行
    ///
    /// `sender` 必须与 `receiver` 属于同一队列，HAL 的事件回调也应使用它。
    pub fn spawn(
        settings: AppSettings,
        backends: Backends,
        sender: MessageSender<P2pMessage>,
        receiver: mpsc::UnboundedReceiver<P2pMessage>,
        events: EventBroadcaster,
    ) -> Result<(P2pHandle, JoinHandle<()>), HsmError> {
        let handle = P2pHandle::new(sender.clone(), events.clone());
        let machine = Self::build(settings, backends, sender, receiver, events)?;
        Ok((handle, tokio::spawn(machine.run())))
    }

    pub fn devices(&self) -> &DeviceManager {
        &self.devices
    }

    pub fn groups(&self) -> &GroupManager {
        &self.groups
    }

    pub fn services(&self) -> &ServiceManager {
        &self.services
    }

    pub fn connection_info(&self) -> ConnectionInfo {
        self.connection
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    // ------------------------------------------------------------------
    // 广播
    // ------------------------------------------------------------------

    fn broadcast(&self, event: P2pEvent) {
        self.events.send(event);
    }

    fn action_result(&self, action: P2pAction, code: ErrCode) {
        if !code.is_success() {
            debug!("{:?} finished with {:?}", action, code);
        }
        self.broadcast(P2pEvent::ActionResult { action, code });
    }

    fn broadcast_peers(&self) {
        self.broadcast(P2pEvent::PeersChanged {
            devices: self.devices.devices(),
        });
    }

    fn broadcast_connection(&self) {
        self.broadcast(P2pEvent::ConnectionChanged {
            info: self.connection,
            group: self.groups.current_group().cloned(),
        });
    }

    fn broadcast_this_device(&self) {
        self.broadcast(P2pEvent::ThisDeviceChanged {
            device: self.devices.this_device().clone(),
        });
    }

    fn broadcast_groups(&self) {
        self.broadcast(P2pEvent::PersistentGroupsChanged {
            groups: self.groups.groups(),
        });
    }

    fn prompt(&self, kind: PromptKind, peer: &PeerDevice, pin: Option<String>) {
        info!("Asking user: {:?} from {}", kind, peer.device_address);
        self.broadcast(P2pEvent::UserPrompt {
            kind,
            peer: peer.clone(),
            pin,
        });
    }

    // ------------------------------------------------------------------
    // 持久化
    // ------------------------------------------------------------------

    fn set_connection(&mut self, info: ConnectionInfo) {
        self.connection = info;
        self.save_connection();
    }

    fn save_connection(&self) {
        if let Err(e) = self.store.save_connection(&self.connection) {
            warn!("Failed to persist connection info: {}", e);
        }
    }

    fn stash_groups(&self) {
        if let Err(e) = self.store.save_groups(self.groups.groups_ref()) {
            warn!("Failed to persist groups: {}", e);
        }
    }

    /// 与 HAL 的网络列表对齐
    ///
    /// 缺少 BSSID 的持久网络无法重新调用，先从 HAL 删除；删除失败只记录日志。
    fn update_persistent_groups(&mut self) {
        let networks = match self.hal.list_networks() {
            Ok(networks) => networks,
            Err(e) => {
                warn!("Failed to list networks: {}", e);
                return;
            }
        };

        let mut usable = Vec::with_capacity(networks.len());
        for network in networks {
            if network.is_persistent() && network.bssid.is_none() {
                info!("Removing stale network {}", network.network_id);
                if let Err(e) = self.hal.remove_network(network.network_id) {
                    warn!("Failed to remove network {}: {}", network.network_id, e);
                }
                continue;
            }
            usable.push(network);
        }

        let this_address = self.devices.this_device().device_address;
        if self.groups.reconcile(&usable, this_address) {
            debug!("Persistent groups changed: {} group(s)", self.groups.groups_ref().len());
            self.stash_groups();
            self.broadcast_groups();
        }
    }

    // ------------------------------------------------------------------
    // 连接失败与清理
    // ------------------------------------------------------------------

    /// 组建立失败或超时
    ///
    /// 重置连接状态，删除临时加入的对端，重新开始发现。
    fn deal_group_creation_failed(&mut self) {
        warn!("Group creation failed");
        self.set_connection(ConnectionInfo::disconnected());
        self.groups.set_current_group(None);

        if let Some(peer) = self.speculative_peer.take() {
            debug!("Removing speculative peer {}", peer);
            self.devices.remove_device(peer);
        }
        self.devices
            .update_all_unconnected(P2pDeviceStatus::Available);
        if let Some(config) = self.saved_config.take() {
            if let Ok(peer) = config.device_address.parse::<MacAddress>() {
                self.devices
                    .update_device_status(peer, P2pDeviceStatus::Failed);
            }
            self.action_result(P2pAction::Connect, ErrCode::Failed);
        }
        self.pending = None;

        self.broadcast_connection();
        self.broadcast_peers();
        self.start_discovery();
    }

    /// 对端不在表中时用 HAL 查询的信息临时加入
    fn ensure_peer(&mut self, peer: &PeerDevice) -> PeerDevice {
        let known = self.devices.get_device(peer.device_address);
        if known.is_valid() {
            return known;
        }
        let device = self
            .hal
            .peer_info(peer.device_address)
            .ok()
            .filter(PeerDevice::is_valid)
            .unwrap_or_else(|| peer.clone());
        if self.devices.add_device(device.clone()) {
            debug!("Speculatively added peer {}", device.device_address);
            self.speculative_peer = Some(device.device_address);
            self.broadcast_peers();
        }
        device
    }

    fn start_discovery(&mut self) -> ErrCode {
        let timeout = self.settings.discovery_timeout();
        let secs = u32::try_from(timeout.as_secs()).unwrap_or(u32::MAX);
        match self.hal.find(secs) {
            Ok(()) => {
                self.timers
                    .start(TimerKey::Discovery, P2pMessage::DiscoveryTimeout, timeout);
                self.set_discovering(true);
                ErrCode::Success
            }
            Err(e) => {
                warn!("Failed to start discovery: {}", e);
                ErrCode::Failed
            }
        }
    }

    fn set_discovering(&mut self, active: bool) {
        if self.discovering != active {
            self.discovering = active;
            self.broadcast(P2pEvent::DiscoveryChanged { active });
        }
    }

    /// DHCP 结果回调：结果作为消息重新入队
    fn dhcp_sink(&self) -> DhcpResultSink {
        let sender = self.sender.clone();
        DhcpResultSink::new(move |outcome| {
            if !sender.send(outcome) {
                warn!("State machine gone, DHCP result dropped");
            }
        })
    }
}

impl StateHandler for P2pStateMachine {
    type State = P2pState;
    type Message = P2pMessage;

    fn enter(&mut self, state: P2pState) {
        self.leaf = state;
        match state {
            P2pState::Disabled => self.enter_disabled(),
            P2pState::Enabling | P2pState::Disabling => self.timers.start(
                TimerKey::StateGuard,
                P2pMessage::StateGuardTimeout,
                STATE_GUARD_TIMEOUT,
            ),
            P2pState::Enabled => self.enter_enabled(),
            P2pState::GroupFormation | P2pState::Inviting => self.timers.start(
                TimerKey::GroupFormation,
                P2pMessage::GroupFormationTimeout,
                self.settings.group_formation_timeout(),
            ),
            P2pState::AuthorizingNegotiationRequest => self.enter_authorizing(),
            P2pState::InvitationReceived => self.enter_invitation_received(),
            P2pState::GroupFormed => self.enter_group_formed(),
            P2pState::GroupOperating => self.enter_group_operating(),
            P2pState::GroupJoin => self.enter_group_join(),
            _ => {}
        }
    }

    fn exit(&mut self, state: P2pState) {
        match state {
            P2pState::Enabling | P2pState::Disabling => {
                self.timers.stop(TimerKey::StateGuard);
            }
            P2pState::Enabled => self.exit_enabled(),
            P2pState::GroupFormation | P2pState::Inviting => {
                self.timers.stop(TimerKey::GroupFormation);
            }
            P2pState::GroupFormed => {
                self.timers.stop(TimerKey::Dhcp);
            }
            P2pState::AuthorizingNegotiationRequest
            | P2pState::ProvisionDiscovery
            | P2pState::InvitationReceived
            | P2pState::GroupJoin => self.pending = None,
            _ => {}
        }
    }

    fn process(&mut self, state: P2pState, msg: &mut P2pMessage) -> Outcome<P2pState> {
        match state {
            P2pState::Default => self.process_default(msg),
            P2pState::Disabled => self.process_disabled(msg),
            P2pState::Enabling => self.process_enabling(msg),
            P2pState::Enabled => self.process_enabled(msg),
            P2pState::Disabling => self.process_disabling(msg),
            P2pState::Idle => self.process_idle(msg),
            P2pState::GroupJoin => self.process_group_join(msg),
            P2pState::GroupOperating => self.process_group_operating(msg),
            P2pState::Inviting => self.process_inviting(msg),
            P2pState::InvitationRequest => self.process_invitation_request(msg),
            P2pState::InvitationReceived => self.process_invitation_received(msg),
            P2pState::GroupFormation => self.process_group_formation(msg),
            P2pState::GroupNegotiation => self.process_group_negotiation(msg),
            P2pState::AuthorizingNegotiationRequest => self.process_authorizing(msg),
            P2pState::ProvisionDiscovery => self.process_provision_discovery(msg),
            P2pState::GroupFormed => self.process_group_formed(msg),
        }
    }
}
