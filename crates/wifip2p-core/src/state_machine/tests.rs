use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;

use super::*;
use crate::dhcp::{DhcpError, DhcpResult, DhcpServerConfig};
use crate::hal::{ConnectRequest, DeviceConfig, HalError, HalEvent, HalGroupConfig, HalNetwork};
use crate::hsm;
use crate::service::{ServiceType, SupplicantService};
use crate::store::MemoryStore;
use crate::types::{
    GroupInfo, GroupOwnerBand, P2pConfigErrCode, P2pConnectState, TEMPORARY_NET_ID, WpsMethod,
    device_capability, group_capability,
};

const GROUP_IFACE: &str = "p2p-wlan0-0";

fn mac(last: u8) -> MacAddress {
    MacAddress::new([0x02, 0, 0, 0, 0, last])
}

fn this_address() -> MacAddress {
    mac(0x01)
}

// ============================================================================
// Mock HAL
// ============================================================================

#[derive(Default)]
struct HalState {
    calls: Vec<String>,
    networks: Vec<HalNetwork>,
    peers: HashMap<MacAddress, PeerDevice>,
    connect_pin: Option<String>,
    next_network_id: i32,
    /// 以这些前缀开头的调用返回错误
    failing: Vec<String>,
}

#[derive(Clone, Default)]
struct MockHal {
    state: Arc<Mutex<HalState>>,
}

impl MockHal {
    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn called(&self, prefix: &str) -> bool {
        self.calls().iter().any(|c| c.starts_with(prefix))
    }

    fn fail_on(&self, prefix: &str) {
        self.state.lock().unwrap().failing.push(prefix.to_string());
    }

    /// 记录调用，命中 `fail_on` 前缀时返回错误
    fn outcome(&self, call: String) -> Result<(), HalError> {
        let mut state = self.state.lock().unwrap();
        let fails = state.failing.iter().any(|p| call.starts_with(p.as_str()));
        state.calls.push(call.clone());
        if fails {
            Err(HalError::Rejected {
                command: call,
                reply: "FAIL".into(),
            })
        } else {
            Ok(())
        }
    }

    fn set_networks(&self, networks: Vec<HalNetwork>) {
        self.state.lock().unwrap().networks = networks;
    }

    fn set_connect_pin(&self, pin: &str) {
        self.state.lock().unwrap().connect_pin = Some(pin.to_string());
    }

    fn add_peer_info(&self, device: PeerDevice) {
        self.state
            .lock()
            .unwrap()
            .peers
            .insert(device.device_address, device);
    }
}

impl P2pHal for MockHal {
    fn start_p2p(&self) -> Result<(), HalError> {
        self.record("start_p2p".into());
        Ok(())
    }

    fn stop_p2p(&self) -> Result<(), HalError> {
        self.record("stop_p2p".into());
        Ok(())
    }

    fn device_address(&self) -> Result<MacAddress, HalError> {
        Ok(this_address())
    }

    fn set_device_config(&self, config: &DeviceConfig) -> Result<(), HalError> {
        self.record(format!("set_device_config {}", config.device_name));
        Ok(())
    }

    fn set_device_name(&self, name: &str) -> Result<(), HalError> {
        self.record(format!("set_device_name {name}"));
        Ok(())
    }

    fn peer_info(&self, peer: MacAddress) -> Result<PeerDevice, HalError> {
        self.state
            .lock()
            .unwrap()
            .peers
            .get(&peer)
            .cloned()
            .ok_or_else(|| HalError::Parse("unknown peer".into()))
    }

    fn find(&self, timeout_secs: u32) -> Result<(), HalError> {
        self.record(format!("find {timeout_secs}"));
        Ok(())
    }

    fn stop_find(&self) -> Result<(), HalError> {
        self.record("stop_find".into());
        Ok(())
    }

    fn set_ext_listen(&self, enable: bool, period_ms: u32, interval_ms: u32) -> Result<(), HalError> {
        self.record(format!("ext_listen {enable} {period_ms} {interval_ms}"));
        Ok(())
    }

    fn connect(&self, request: &ConnectRequest) -> Result<Option<String>, HalError> {
        self.record(format!(
            "connect {} {:?} join={}",
            request.peer, request.wps.method, request.join
        ));
        Ok(self.state.lock().unwrap().connect_pin.clone())
    }

    fn cancel_connect(&self) -> Result<(), HalError> {
        self.record("cancel_connect".into());
        Ok(())
    }

    fn provision_discovery(&self, peer: MacAddress, method: WpsMethod) -> Result<(), HalError> {
        self.record(format!("provision_discovery {peer} {method:?}"));
        Ok(())
    }

    fn group_add(
        &self,
        persistent: bool,
        network_id: Option<i32>,
        frequency: Option<u32>,
    ) -> Result<(), HalError> {
        self.record(format!("group_add {persistent} {network_id:?} {frequency:?}"));
        Ok(())
    }

    fn remove_group(&self, interface: &str) -> Result<(), HalError> {
        self.record(format!("remove_group {interface}"));
        Ok(())
    }

    fn invite(&self, interface: &str, go_address: MacAddress, peer: MacAddress) -> Result<(), HalError> {
        self.record(format!("invite {interface} {go_address} {peer}"));
        Ok(())
    }

    fn reinvoke(&self, network_id: i32, peer: MacAddress) -> Result<(), HalError> {
        self.record(format!("reinvoke {network_id} {peer}"));
        Ok(())
    }

    fn wps_pbc(&self, interface: &str) -> Result<(), HalError> {
        self.record(format!("wps_pbc {interface}"));
        Ok(())
    }

    fn wps_pin(&self, interface: &str, pin: &str) -> Result<(), HalError> {
        self.record(format!("wps_pin {interface} {pin}"));
        Ok(())
    }

    fn add_network(&self) -> Result<i32, HalError> {
        let mut state = self.state.lock().unwrap();
        state.next_network_id += 1;
        let id = state.next_network_id;
        state.calls.push(format!("add_network {id}"));
        Ok(id)
    }

    fn remove_network(&self, network_id: i32) -> Result<(), HalError> {
        let mut state = self.state.lock().unwrap();
        state.networks.retain(|n| n.network_id != network_id);
        state.calls.push(format!("remove_network {network_id}"));
        Ok(())
    }

    fn list_networks(&self) -> Result<Vec<HalNetwork>, HalError> {
        Ok(self.state.lock().unwrap().networks.clone())
    }

    fn get_group_config(&self, _network_id: i32) -> Result<HalGroupConfig, HalError> {
        Ok(HalGroupConfig::default())
    }

    fn set_group_config(&self, network_id: i32, config: &HalGroupConfig) -> Result<(), HalError> {
        self.outcome(format!("set_group_config {network_id} {}", config.ssid))
    }

    fn save_config(&self) -> Result<(), HalError> {
        self.record("save_config".into());
        Ok(())
    }

    fn frequencies_by_band(&self, _band: GroupOwnerBand) -> Result<Vec<u32>, HalError> {
        Ok(vec![5180, 5200])
    }

    fn service_add(&self, service: &SupplicantService) -> Result<(), HalError> {
        self.outcome(format!("service_add {}", service.add_args()))
    }

    fn service_del(&self, service: &SupplicantService) -> Result<(), HalError> {
        self.outcome(format!("service_del {}", service.del_args()))
    }

    fn serv_disc_req(&self, peer: MacAddress, tlvs_hex: &str) -> Result<String, HalError> {
        self.record(format!("serv_disc_req {peer} {tlvs_hex}"));
        Ok("1a2b".into())
    }

    fn serv_disc_cancel_req(&self, query_id: &str) -> Result<(), HalError> {
        self.record(format!("serv_disc_cancel_req {query_id}"));
        Ok(())
    }
}

// ============================================================================
// Mock DHCP
// ============================================================================

#[derive(Default)]
struct DhcpState {
    calls: Vec<String>,
    /// get_result 立即投递的结果
    client_result: Option<Result<DhcpResult, String>>,
}

#[derive(Clone, Default)]
struct MockDhcp {
    state: Arc<Mutex<DhcpState>>,
}

impl MockDhcp {
    fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn called(&self, prefix: &str) -> bool {
        self.calls().iter().any(|c| c.starts_with(prefix))
    }

    fn answer_with(&self, result: Result<DhcpResult, String>) {
        self.state.lock().unwrap().client_result = Some(result);
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }
}

impl DhcpService for MockDhcp {
    fn start_client(&self, interface: &str) -> Result<(), DhcpError> {
        self.record(format!("start_client {interface}"));
        Ok(())
    }

    fn stop_client(&self, interface: &str) -> Result<(), DhcpError> {
        self.record(format!("stop_client {interface}"));
        Ok(())
    }

    fn start_server(&self, interface: &str, config: &DhcpServerConfig) -> Result<Ipv4Addr, DhcpError> {
        self.record(format!("start_server {interface}"));
        Ok(config.address)
    }

    fn stop_server(&self, interface: &str) -> Result<(), DhcpError> {
        self.record(format!("stop_server {interface}"));
        Ok(())
    }

    fn get_result(
        &self,
        interface: &str,
        sink: DhcpResultSink,
        _timeout: Duration,
    ) -> Result<(), DhcpError> {
        self.record(format!("get_result {interface}"));
        let result = self.state.lock().unwrap().client_result.clone();
        match result {
            Some(Ok(result)) => sink.on_success(0, interface, result),
            Some(Err(reason)) => sink.on_failed(1, interface, &reason),
            None => {}
        }
        Ok(())
    }

    fn add_route(&self, interface: &str, address: Ipv4Addr, prefix_len: u8) -> Result<(), DhcpError> {
        self.record(format!("add_route {interface} {address}/{prefix_len}"));
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    machine: StateMachine<P2pStateMachine>,
    hal: MockHal,
    dhcp: MockDhcp,
    store: MemoryStore,
    events: broadcast::Receiver<P2pEvent>,
}

impl Harness {
    fn new() -> Self {
        Self::with(MockHal::default(), MemoryStore::new())
    }

    fn with(hal: MockHal, store: MemoryStore) -> Self {
        Self::with_settings(hal, store, settings())
    }

    fn with_settings(hal: MockHal, store: MemoryStore, settings: AppSettings) -> Self {
        let dhcp = MockDhcp::default();
        let (sender, receiver) = hsm::channel();
        let events = EventBroadcaster::new(1024);
        let subscriber = events.subscribe();
        let backends = Backends {
            hal: Box::new(hal.clone()),
            dhcp: Box::new(dhcp.clone()),
            store: Box::new(store.clone()),
        };
        let machine = P2pStateMachine::build(settings, backends, sender, receiver, events).unwrap();
        Self {
            machine,
            hal,
            dhcp,
            store,
            events: subscriber,
        }
    }

    /// 分发消息并处理由此产生的内部消息
    fn send(&mut self, msg: impl Into<P2pMessage>) {
        self.machine.dispatch(msg.into());
        self.machine.process_pending();
    }

    fn state(&self) -> P2pState {
        self.machine.current_state().unwrap()
    }

    fn sm(&self) -> &P2pStateMachine {
        self.machine.handler()
    }

    fn enabled() -> Self {
        let mut h = Self::new();
        h.enable();
        h
    }

    fn enable(&mut self) {
        self.send(P2pMessage::Enable);
        self.send(HalEvent::SupplicantConnected);
        assert_eq!(self.state(), P2pState::Idle);
        self.drain();
    }

    fn drain(&mut self) -> Vec<P2pEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    fn found(&mut self, device: PeerDevice) {
        self.send(HalEvent::DeviceFound(device));
    }

    fn connect(&mut self, config: ConnectionConfig) -> ErrCode {
        let (reply, mut rx) = Reply::channel();
        self.send(P2pMessage::Connect { config, reply });
        rx.try_recv().unwrap()
    }
}

fn settings() -> AppSettings {
    AppSettings {
        device_name: "test-host".into(),
        ..Default::default()
    }
}

fn action_results(events: &[P2pEvent]) -> Vec<(P2pAction, ErrCode)> {
    events
        .iter()
        .filter_map(|e| match e {
            P2pEvent::ActionResult { action, code } => Some((*action, *code)),
            _ => None,
        })
        .collect()
}

fn prompts(events: &[P2pEvent]) -> Vec<PromptKind> {
    events
        .iter()
        .filter_map(|e| match e {
            P2pEvent::UserPrompt { kind, .. } => Some(*kind),
            _ => None,
        })
        .collect()
}

fn client_group(owner: MacAddress) -> GroupInfo {
    GroupInfo {
        network_id: TEMPORARY_NET_ID,
        group_name: "DIRECT-xy-tv".into(),
        owner: PeerDevice::new(owner, ""),
        interface: GROUP_IFACE.into(),
        frequency: 2437,
        is_group_owner: false,
        is_persistent: false,
        ..Default::default()
    }
}

fn owner_group() -> GroupInfo {
    GroupInfo {
        network_id: TEMPORARY_NET_ID,
        group_name: "DIRECT-ab".into(),
        owner: PeerDevice::new(this_address(), ""),
        interface: GROUP_IFACE.into(),
        frequency: 2437,
        is_group_owner: true,
        is_persistent: false,
        ..Default::default()
    }
}

fn lease() -> DhcpResult {
    DhcpResult {
        server_address: Ipv4Addr::new(192, 168, 49, 1),
        client_address: Ipv4Addr::new(192, 168, 49, 23),
        subnet_mask: Ipv4Addr::new(255, 255, 255, 0),
    }
}

// ============================================================================
// 开关
// ============================================================================

/// 验证初始为 Disabled，且命令返回 NotOpened
#[test]
fn test_disabled_rejects_commands() {
    let mut h = Harness::new();
    assert_eq!(h.state(), P2pState::Disabled);

    h.send(P2pMessage::DiscoverPeers);
    let code = h.connect(ConnectionConfig::new(mac(9).to_string()));
    assert_eq!(code, ErrCode::NotOpened);

    let results = action_results(&h.drain());
    assert!(results.contains(&(P2pAction::DiscoverPeers, ErrCode::NotOpened)));
    assert!(results.contains(&(P2pAction::Connect, ErrCode::NotOpened)));
    assert!(!h.hal.called("find"));
}

/// 验证开启流程：Disabled -> Enabling -> Idle
#[test]
fn test_enable_flow() {
    let mut h = Harness::new();
    h.send(P2pMessage::Enable);
    assert_eq!(h.state(), P2pState::Enabling);
    assert!(h.hal.called("start_p2p"));

    h.send(HalEvent::SupplicantConnected);
    assert_eq!(h.state(), P2pState::Idle);
    assert!(h.machine.is_in(P2pState::Enabled));
    assert!(h.hal.called("set_device_config test-host"));
    assert_eq!(h.sm().devices().this_device().device_address, this_address());

    let events = h.drain();
    assert!(events.contains(&P2pEvent::EnableStateChanged { enabled: true }));
    assert!(action_results(&events).contains(&(P2pAction::Enable, ErrCode::Success)));
}

/// 验证 supplicant 未就绪时保护超时回到 Disabled
#[test]
fn test_enable_guard_timeout() {
    let mut h = Harness::new();
    h.send(P2pMessage::Enable);
    h.send(P2pMessage::StateGuardTimeout);
    assert_eq!(h.state(), P2pState::Disabled);
    assert!(action_results(&h.drain()).contains(&(P2pAction::Enable, ErrCode::Failed)));
}

/// 验证关闭流程并清空设备表
#[test]
fn test_disable_flow() {
    let mut h = Harness::enabled();
    h.found(PeerDevice::new(mac(2), "phone"));
    assert_eq!(h.sm().devices().len(), 1);

    h.send(P2pMessage::Disable);
    assert_eq!(h.state(), P2pState::Disabling);
    assert!(h.hal.called("stop_p2p"));
    assert!(h.sm().devices().is_empty());

    h.send(HalEvent::SupplicantTerminating);
    assert_eq!(h.state(), P2pState::Disabled);
    let events = h.drain();
    assert!(events.contains(&P2pEvent::EnableStateChanged { enabled: false }));
}

/// 验证查询在任何状态下都由根状态回答
#[test]
fn test_queries() {
    let mut h = Harness::new();
    let (reply, mut rx) = Reply::channel();
    h.send(Query::State(reply));
    assert_eq!(rx.try_recv().unwrap(), P2pState::Disabled);

    h.enable();
    let (reply, mut rx) = Reply::channel();
    h.send(Query::EnableState(reply));
    assert!(rx.try_recv().unwrap());

    let (reply, mut rx) = Reply::channel();
    h.send(Query::Connection(reply));
    let (info, group) = rx.try_recv().unwrap();
    assert!(!info.is_connected());
    assert!(group.is_none());
}

// ============================================================================
// 发现
// ============================================================================

/// 验证发现开始、对端增删以及忽略本机地址
#[test]
fn test_discovery_tracks_peers() {
    let mut h = Harness::enabled();
    h.send(P2pMessage::DiscoverPeers);
    assert!(h.hal.called("find 120"));

    h.found(PeerDevice::new(mac(2), "phone"));
    h.found(PeerDevice::new(mac(2), "phone-renamed"));
    h.found(PeerDevice::new(this_address(), "me"));
    assert_eq!(h.sm().devices().len(), 1);
    assert_eq!(h.sm().devices().get_device(mac(2)).device_name, "phone-renamed");

    h.send(HalEvent::DeviceLost(mac(2)));
    assert!(h.sm().devices().is_empty());

    let events = h.drain();
    assert!(events.contains(&P2pEvent::DiscoveryChanged { active: true }));

    h.send(P2pMessage::DiscoveryTimeout);
    assert!(h.drain().contains(&P2pEvent::DiscoveryChanged { active: false }));
}

/// 验证服务发现响应解析并广播 UPnP 事件
#[test]
fn test_service_discovery_response() {
    let mut h = Harness::enabled();
    h.found(PeerDevice::new(mac(2), "printer"));
    h.send(P2pMessage::DiscoverServices);
    assert!(h.hal.called("serv_disc_req 00:00:00:00:00:00 02000000"));
    h.drain();

    // len=13, upnp, tid=1, success, [0x10]"uuid:1234"
    h.send(HalEvent::ServDiscResponse {
        peer: mac(2),
        update_indicator: 1,
        tlvs: "0d0002010010757569643a31323334".into(),
    });
    let events = h.drain();
    assert!(events.iter().any(|e| matches!(
        e,
        P2pEvent::UpnpServiceAvailable { unique_service_names, source }
            if unique_service_names == &["uuid:1234"] && source.device_name == "printer"
    )));
    assert!(events.contains(&P2pEvent::ServicesChanged));
    assert_eq!(h.sm().services().responses().len(), 1);
    assert_eq!(h.sm().services().responses()[0].protocol, ServiceType::Upnp);

    // 畸形 blob 整体丢弃
    h.send(HalEvent::ServDiscResponse {
        peer: mac(2),
        update_indicator: 2,
        tlvs: "0900020100".into(),
    });
    assert_eq!(h.sm().services().responses().len(), 1);

    h.send(HalEvent::DeviceLost(mac(2)));
    assert!(h.sm().services().responses().is_empty());
}

// ============================================================================
// 连接
// ============================================================================

/// 验证 GO intent 越界时同步返回 ErrIntent，且不调用 HAL
#[test]
fn test_connect_rejects_bad_intent() {
    let mut h = Harness::enabled();
    h.found(PeerDevice::new(mac(2), "phone"));

    let mut config = ConnectionConfig::new(mac(2).to_string());
    config.group_owner_intent = 16;
    assert_eq!(h.connect(config), ErrCode::Config(P2pConfigErrCode::ErrIntent));
    assert_eq!(h.state(), P2pState::Idle);
    assert!(!h.hal.called("connect"));
    assert!(!h.hal.called("provision_discovery"));

    assert_eq!(
        h.connect(ConnectionConfig::new(mac(3).to_string())),
        ErrCode::Config(P2pConfigErrCode::MacNotFound)
    );
}

/// 验证对端为 GO 且有共有持久组时直接重新加入该组
#[test]
fn test_connect_rejoins_persistent_group() {
    let peer = mac(2);
    let hal = MockHal::default();
    hal.set_networks(vec![HalNetwork {
        network_id: 3,
        ssid: "DIRECT-xy-tv".into(),
        bssid: Some(peer),
        flags: "[P2P-PERSISTENT]".into(),
    }]);
    let store = MemoryStore::with_groups(vec![GroupInfo {
        network_id: 3,
        group_name: "DIRECT-xy-tv".into(),
        owner: PeerDevice::new(peer, "tv"),
        is_group_owner: false,
        is_persistent: true,
        ..Default::default()
    }]);
    let mut h = Harness::with(hal, store);
    h.enable();

    let mut tv = PeerDevice::new(peer, "tv");
    tv.group_capabilities = group_capability::GROUP_OWNER | group_capability::PERSISTENT_GROUP;
    h.found(tv);

    assert_eq!(h.connect(ConnectionConfig::new(peer.to_string())), ErrCode::Success);
    assert!(h.hal.called("group_add true Some(3) None"));
    assert!(!h.hal.called("connect"));
    assert_eq!(h.state(), P2pState::GroupNegotiation);
}

/// 验证对端可被邀请时重新调用本机为 GO 的持久组
#[test]
fn test_connect_reinvokes_as_owner() {
    let peer = mac(2);
    let hal = MockHal::default();
    hal.set_networks(vec![HalNetwork {
        network_id: 4,
        ssid: "DIRECT-ab".into(),
        bssid: Some(this_address()),
        flags: "[P2P-PERSISTENT]".into(),
    }]);
    let mut group = GroupInfo {
        network_id: 4,
        group_name: "DIRECT-ab".into(),
        owner: PeerDevice::new(this_address(), "me"),
        is_group_owner: true,
        is_persistent: true,
        ..Default::default()
    };
    group.add_client(PeerDevice::new(peer, "phone"));
    let mut h = Harness::with(hal, MemoryStore::with_groups(vec![group]));
    h.enable();

    let mut phone = PeerDevice::new(peer, "phone");
    phone.device_capabilities = device_capability::INVITATION_PROCEDURE;
    h.found(phone);

    assert_eq!(h.connect(ConnectionConfig::new(peer.to_string())), ErrCode::Success);
    assert!(h.hal.called(&format!("reinvoke 4 {peer}")));
    assert_eq!(h.state(), P2pState::InvitationRequest);

    // 对端不认识该组，退回到普通协商
    h.send(HalEvent::InvitationResult { status: 8 });
    assert!(h.hal.called(&format!("connect {peer} Pbc join=false")));
    assert_eq!(h.state(), P2pState::GroupNegotiation);
}

/// 验证对端为 GO 但组已满时不重新加入，改为重新邀请
#[test]
fn test_connect_skips_rejoin_when_group_full() {
    let peer = mac(2);
    let hal = MockHal::default();
    hal.set_networks(vec![HalNetwork {
        network_id: 3,
        ssid: "DIRECT-xy-tv".into(),
        bssid: Some(peer),
        flags: "[P2P-PERSISTENT]".into(),
    }]);
    let store = MemoryStore::with_groups(vec![GroupInfo {
        network_id: 3,
        group_name: "DIRECT-xy-tv".into(),
        owner: PeerDevice::new(peer, "tv"),
        is_group_owner: false,
        is_persistent: true,
        ..Default::default()
    }]);
    let mut h = Harness::with(hal, store);
    h.enable();

    let mut tv = PeerDevice::new(peer, "tv");
    tv.group_capabilities = group_capability::GROUP_OWNER
        | group_capability::PERSISTENT_GROUP
        | group_capability::GROUP_LIMIT;
    tv.device_capabilities = device_capability::INVITATION_PROCEDURE;
    h.found(tv);

    assert_eq!(h.connect(ConnectionConfig::new(peer.to_string())), ErrCode::Success);
    assert!(!h.hal.called("group_add"));
    assert!(h.hal.called(&format!("reinvoke 3 {peer}")));
    assert_eq!(h.state(), P2pState::InvitationRequest);
}

/// 验证对端设备数已满时不重新邀请，直接走 GO 协商
#[test]
fn test_connect_skips_reinvoke_when_device_limit() {
    let peer = mac(2);
    let hal = MockHal::default();
    hal.set_networks(vec![HalNetwork {
        network_id: 4,
        ssid: "DIRECT-ab".into(),
        bssid: Some(this_address()),
        flags: "[P2P-PERSISTENT]".into(),
    }]);
    let mut group = GroupInfo {
        network_id: 4,
        group_name: "DIRECT-ab".into(),
        owner: PeerDevice::new(this_address(), "me"),
        is_group_owner: true,
        is_persistent: true,
        ..Default::default()
    };
    group.add_client(PeerDevice::new(peer, "phone"));
    let mut h = Harness::with(hal, MemoryStore::with_groups(vec![group]));
    h.enable();

    let mut phone = PeerDevice::new(peer, "phone");
    phone.device_capabilities =
        device_capability::INVITATION_PROCEDURE | device_capability::DEVICE_LIMIT;
    h.found(phone);

    assert_eq!(h.connect(ConnectionConfig::new(peer.to_string())), ErrCode::Success);
    assert!(!h.hal.called("reinvoke"));
    assert!(h.hal.called(&format!("connect {peer} Pbc join=false")));
    assert_eq!(h.state(), P2pState::GroupNegotiation);
}

/// 验证作为 GC 的完整连接流程，DHCP 成功后进入 GroupOperating
#[test]
fn test_connect_as_client_full_flow() {
    let peer = mac(2);
    let mut h = Harness::enabled();
    h.dhcp.answer_with(Ok(lease()));
    h.found(PeerDevice::new(peer, "tv"));

    assert_eq!(h.connect(ConnectionConfig::new(peer.to_string())), ErrCode::Success);
    assert_eq!(h.state(), P2pState::GroupNegotiation);
    assert!(h.hal.called(&format!("connect {peer} Pbc join=false")));
    assert_eq!(
        h.sm().devices().get_device(peer).status,
        P2pDeviceStatus::Invited
    );

    h.send(HalEvent::GoNegSuccess);
    h.send(HalEvent::GroupFormationSuccess);
    assert_eq!(h.state(), P2pState::GroupNegotiation);

    h.send(HalEvent::GroupStarted(client_group(peer)));
    assert_eq!(h.state(), P2pState::GroupOperating);
    assert!(h.dhcp.called("start_client p2p-wlan0-0"));
    assert!(h.dhcp.called("add_route p2p-wlan0-0 192.168.49.23/24"));

    let info = h.sm().connection_info();
    assert_eq!(info.connect_state, P2pConnectState::Connected);
    assert!(!info.is_group_owner);
    assert_eq!(info.group_owner_address, Some(Ipv4Addr::new(192, 168, 49, 1)));
    assert_eq!(
        h.sm().devices().get_device(peer).status,
        P2pDeviceStatus::Connected
    );
    assert_eq!(h.store.load_connection().unwrap(), info);
    assert!(action_results(&h.drain()).contains(&(P2pAction::Connect, ErrCode::Success)));

    // 组被对端移除
    h.send(HalEvent::GroupRemoved {
        interface: GROUP_IFACE.into(),
        is_group_owner: false,
        reason: "GO_ENDING_SESSION".into(),
    });
    assert_eq!(h.state(), P2pState::Idle);
    assert!(h.dhcp.called("stop_client p2p-wlan0-0"));
    assert!(!h.sm().connection_info().is_connected());
    assert_eq!(
        h.sm().devices().get_device(peer).status,
        P2pDeviceStatus::Available
    );
}

/// 验证对端是 GO 时先做 PD，收到 PBC 响应后以 join 方式连接
#[test]
fn test_connect_to_group_owner_uses_provision_discovery() {
    let peer = mac(2);
    let mut h = Harness::enabled();
    let mut tv = PeerDevice::new(peer, "tv");
    tv.group_capabilities = group_capability::GROUP_OWNER;
    h.found(tv);

    assert_eq!(h.connect(ConnectionConfig::new(peer.to_string())), ErrCode::Success);
    assert!(h.hal.called(&format!("provision_discovery {peer} Pbc")));
    assert_eq!(h.state(), P2pState::ProvisionDiscovery);

    h.send(HalEvent::ProvDiscPbcResponse(peer));
    assert!(h.hal.called(&format!("connect {peer} Pbc join=true")));
    assert_eq!(h.state(), P2pState::GroupNegotiation);
}

/// 验证组建立超时：取消连接、对端标记为 Failed、重新开始发现
#[test]
fn test_group_formation_timeout() {
    let peer = mac(2);
    let mut h = Harness::enabled();
    h.found(PeerDevice::new(peer, "tv"));
    h.connect(ConnectionConfig::new(peer.to_string()));
    h.drain();

    h.send(P2pMessage::GroupFormationTimeout);
    assert_eq!(h.state(), P2pState::Idle);
    assert!(h.hal.called("cancel_connect"));
    assert!(h.hal.called("find"));
    assert_eq!(
        h.sm().devices().get_device(peer).status,
        P2pDeviceStatus::Failed
    );
    assert!(action_results(&h.drain()).contains(&(P2pAction::Connect, ErrCode::Failed)));
}

/// 验证 GroupFormed 中 DHCP 失败：拆除组、回到 Idle、删除临时对端
#[test]
fn test_dhcp_failure_tears_down_group() {
    let peer = mac(7);
    let mut h = Harness::enabled();
    h.dhcp.answer_with(Err("no lease".into()));

    h.hal.add_peer_info(PeerDevice::new(peer, "cam"));

    // 未知对端发起协商，临时加入设备表
    h.send(HalEvent::GoNegRequest {
        peer,
        passwd_id: 4,
    });
    assert_eq!(h.state(), P2pState::AuthorizingNegotiationRequest);
    assert_eq!(h.sm().devices().get_device(peer).device_name, "cam");
    assert_eq!(prompts(&h.drain()), [PromptKind::Negotiation]);

    h.send(P2pMessage::UserAccept);
    assert_eq!(h.state(), P2pState::GroupNegotiation);

    h.send(HalEvent::GroupStarted(client_group(peer)));
    assert_eq!(h.state(), P2pState::Idle);
    assert!(h.hal.called("remove_group p2p-wlan0-0"));
    assert!(h.dhcp.called("stop_client p2p-wlan0-0"));
    assert!(!h.sm().connection_info().is_connected());
    assert!(h.sm().groups().current_group().is_none());
    assert!(!h.sm().devices().get_device(peer).is_valid());
}

/// 验证对端协商请求被拒绝
#[test]
fn test_reject_negotiation_request() {
    let peer = mac(7);
    let mut h = Harness::enabled();
    h.send(HalEvent::GoNegRequest {
        peer,
        passwd_id: 5,
    });
    assert_eq!(prompts(&h.drain()), [PromptKind::EnterPin]);

    // keypad 没有 PIN 时 accept 继续等待
    h.send(P2pMessage::UserAccept);
    assert_eq!(h.state(), P2pState::AuthorizingNegotiationRequest);

    h.send(P2pMessage::UserReject);
    assert_eq!(h.state(), P2pState::Idle);
    assert!(!h.hal.called("connect"));
    assert!(action_results(&h.drain()).contains(&(P2pAction::Connect, ErrCode::Rejected)));
}

/// 验证 keypad 方式输入 PIN 后带 PIN 连接
#[test]
fn test_confirm_pin_connects() {
    let peer = mac(7);
    let mut h = Harness::enabled();
    h.send(HalEvent::ProvDiscEnterPin(PeerDevice::new(peer, "cam")));
    h.send(P2pMessage::UserConfirm("12345670".into()));
    assert!(h.hal.called(&format!("connect {peer} Keypad join=false")));
    assert_eq!(h.state(), P2pState::GroupNegotiation);
}

/// 验证 display 方式由 supplicant 生成 PIN 并提示用户显示
#[test]
fn test_display_pin_prompted() {
    let peer = mac(7);
    let mut h = Harness::enabled();
    h.hal.set_connect_pin("87654321");
    h.send(HalEvent::GoNegRequest {
        peer,
        passwd_id: 1,
    });
    assert_eq!(prompts(&h.drain()), [PromptKind::Negotiation]);

    h.send(P2pMessage::UserAccept);
    assert!(h.hal.called(&format!("connect {peer} Display join=false")));
    let events = h.drain();
    assert!(events.iter().any(|e| matches!(
        e,
        P2pEvent::UserPrompt { kind: PromptKind::ShowPin, pin: Some(pin), .. } if pin == "87654321"
    )));
}

// ============================================================================
// GO
// ============================================================================

/// 验证自建组：GO 启动 DHCP 服务器，客户端加入与离开
#[test]
fn test_create_group_as_owner() {
    let client = mac(5);
    let mut h = Harness::enabled();
    h.found(PeerDevice::new(client, "laptop"));

    h.send(P2pMessage::CreateGroup(ConnectionConfig::default()));
    assert!(h.hal.called("group_add true None None"));
    assert_eq!(h.state(), P2pState::GroupNegotiation);

    h.send(HalEvent::GroupStarted(owner_group()));
    assert_eq!(h.state(), P2pState::GroupOperating);
    assert!(h.dhcp.called("start_server p2p-wlan0-0"));
    let info = h.sm().connection_info();
    assert!(info.is_connected());
    assert!(info.is_group_owner);
    assert_eq!(info.group_owner_address, Some(Ipv4Addr::new(192, 168, 49, 1)));

    h.send(HalEvent::StaAuthorized(client));
    let group = h.sm().groups().current_group().unwrap();
    assert!(group.contains_client(client));
    assert_eq!(
        h.sm().devices().get_device(client).status,
        P2pDeviceStatus::Connected
    );

    h.send(HalEvent::StaDeauthorized(client));
    assert!(h.sm().groups().current_group().unwrap().clients.is_empty());

    h.send(P2pMessage::RemoveGroup);
    assert!(h.hal.called("remove_group p2p-wlan0-0"));
    h.send(HalEvent::GroupRemoved {
        interface: GROUP_IFACE.into(),
        is_group_owner: true,
        reason: "REQUESTED".into(),
    });
    assert_eq!(h.state(), P2pState::Idle);
    assert!(h.dhcp.called("stop_server p2p-wlan0-0"));
}

/// 验证带名称的自建组先配置网络再启动
#[test]
fn test_create_named_group() {
    let mut h = Harness::enabled();
    let config = ConnectionConfig {
        group_name: "kitchen".into(),
        passphrase: "secret-pass".into(),
        ..Default::default()
    };
    h.send(P2pMessage::CreateGroup(config));
    let calls = h.hal.calls();
    assert!(calls.contains(&"add_network 1".to_string()));
    assert!(calls.iter().any(|c| c.starts_with("set_group_config 1 DIRECT-") && c.ends_with("-kitchen")));
    assert!(h.hal.called("group_add true Some(1) None"));

    // 口令太短
    let mut h = Harness::enabled();
    h.send(P2pMessage::CreateGroup(ConnectionConfig {
        group_name: "kitchen".into(),
        passphrase: "short".into(),
        ..Default::default()
    }));
    assert!(!h.hal.called("add_network"));
    assert!(action_results(&h.drain()).contains(&(P2pAction::CreateGroup, ErrCode::InvalidParam)));
}

/// 验证网络配置失败时删除刚添加的网络并报告失败
#[test]
fn test_create_named_group_cleans_up_on_config_failure() {
    let hal = MockHal::default();
    hal.fail_on("set_group_config");
    let mut h = Harness::with(hal, MemoryStore::new());
    h.enable();
    h.drain();

    h.send(P2pMessage::CreateGroup(ConnectionConfig {
        group_name: "kitchen".into(),
        passphrase: "secret-pass".into(),
        ..Default::default()
    }));
    assert!(h.hal.called("remove_network 1"));
    assert!(!h.hal.called("group_add"));
    assert!(action_results(&h.drain()).contains(&(P2pAction::CreateGroup, ErrCode::Failed)));
}

/// 验证 GO 收到 PD 请求后询问用户并执行 WPS
#[test]
fn test_owner_accepts_join_request() {
    let joiner = mac(6);
    let mut h = Harness::enabled();
    h.send(P2pMessage::CreateGroup(ConnectionConfig::default()));
    h.send(HalEvent::GroupStarted(owner_group()));
    h.drain();

    h.send(HalEvent::ProvDiscPbcRequest(PeerDevice::new(joiner, "tablet")));
    assert_eq!(h.state(), P2pState::GroupJoin);
    assert_eq!(prompts(&h.drain()), [PromptKind::JoinRequest]);

    h.send(P2pMessage::UserAccept);
    assert!(h.hal.called("wps_pbc p2p-wlan0-0"));
    assert_eq!(h.state(), P2pState::GroupOperating);
}

// ============================================================================
// 邀请
// ============================================================================

/// 验证拒绝邀请时删除临时对端
#[test]
fn test_reject_invitation() {
    let inviter = mac(8);
    let mut h = Harness::enabled();
    h.send(HalEvent::InvitationReceived {
        source: inviter,
        go_address: Some(inviter),
        bssid: None,
        persistent_id: None,
        frequency: None,
    });
    assert_eq!(h.state(), P2pState::InvitationReceived);
    assert!(h.sm().devices().get_device(inviter).is_valid());
    assert_eq!(prompts(&h.drain()), [PromptKind::Invitation]);

    h.send(P2pMessage::UserReject);
    assert_eq!(h.state(), P2pState::Idle);
    assert!(!h.sm().devices().get_device(inviter).is_valid());
    assert!(action_results(&h.drain()).contains(&(P2pAction::Invite, ErrCode::Rejected)));
}

/// 验证接受持久组邀请时重新启动该组
#[test]
fn test_accept_persistent_invitation() {
    let inviter = mac(8);
    let mut h = Harness::enabled();
    h.send(HalEvent::InvitationReceived {
        source: inviter,
        go_address: Some(inviter),
        bssid: None,
        persistent_id: Some(2),
        frequency: Some(2412),
    });
    h.send(P2pMessage::UserAccept);
    assert!(h.hal.called("group_add true Some(2) Some(2412)"));
    assert_eq!(h.state(), P2pState::InvitationReceived);

    h.send(HalEvent::GroupStarted(client_group(inviter)));
    assert_eq!(h.state(), P2pState::GroupFormed);
}

// ============================================================================
// 其他命令
// ============================================================================

/// 验证删除持久组同步 HAL 和存储
#[test]
fn test_delete_group() {
    let hal = MockHal::default();
    hal.set_networks(vec![HalNetwork {
        network_id: 3,
        ssid: "DIRECT-xy-tv".into(),
        bssid: Some(mac(2)),
        flags: "[P2P-PERSISTENT]".into(),
    }]);
    let store = MemoryStore::new();
    let mut h = Harness::with(hal, store);
    h.enable();
    assert_eq!(h.sm().groups().groups_ref().len(), 1);
    assert_eq!(h.store.load_groups().unwrap().len(), 1);

    h.send(P2pMessage::DeleteGroup(3));
    assert!(h.hal.called("remove_network 3"));
    assert!(h.sm().groups().groups_ref().is_empty());
    assert!(h.store.load_groups().unwrap().is_empty());
}

/// 验证缺少 BSSID 的持久网络在开启时被清理
#[test]
fn test_stale_networks_removed_on_enable() {
    let hal = MockHal::default();
    hal.set_networks(vec![HalNetwork {
        network_id: 9,
        ssid: "DIRECT-zz".into(),
        bssid: None,
        flags: "[DISABLED][P2P-PERSISTENT]".into(),
    }]);
    let mut h = Harness::with(hal, MemoryStore::new());
    h.enable();
    assert!(h.hal.called("remove_network 9"));
    assert!(h.sm().groups().groups_ref().is_empty());
}

/// 验证设备名和本地服务命令
#[test]
fn test_device_name_and_local_service() {
    let mut h = Harness::enabled();
    h.send(P2pMessage::SetDeviceName(String::new()));
    h.send(P2pMessage::SetDeviceName("living-room".into()));
    assert!(h.hal.called("set_device_name living-room"));
    assert_eq!(h.sm().devices().this_device().device_name, "living-room");

    let info = crate::service::ServiceInfo::upnp("1234", "urn:schemas-upnp-org:device:Printer:1", &[]);
    h.send(P2pMessage::PutLocalService(info.clone()));
    h.send(P2pMessage::PutLocalService(info.clone()));
    assert!(h.hal.called("service_add upnp 10 uuid:1234"));
    assert_eq!(h.sm().services().local_services().len(), 1);

    h.send(P2pMessage::DeleteLocalService(info));
    assert!(h.hal.called("service_del upnp 10 uuid:1234"));

    let results = action_results(&h.drain());
    assert!(results.contains(&(P2pAction::SetDeviceName, ErrCode::InvalidParam)));
    assert!(results.contains(&(P2pAction::SetDeviceName, ErrCode::Success)));
    assert!(results.contains(&(P2pAction::PutLocalService, ErrCode::InvalidParam)));
    assert!(results.contains(&(P2pAction::DeleteLocalService, ErrCode::Success)));
}

/// 验证本地服务部分登记失败时回滚已登记条目，回滚失败不影响结果
#[test]
fn test_local_service_rolls_back_partial_add() {
    let hal = MockHal::default();
    hal.fail_on("service_add upnp 10 uuid:1234::upnp:rootdevice");
    hal.fail_on("service_del");
    let mut h = Harness::with(hal, MemoryStore::new());
    h.enable();
    h.drain();

    let info = crate::service::ServiceInfo::upnp("1234", "urn:schemas-upnp-org:device:Printer:1", &[]);
    h.send(P2pMessage::PutLocalService(info));

    let calls = h.hal.calls();
    let adds = calls.iter().filter(|c| c.starts_with("service_add")).count();
    assert_eq!(adds, 2);
    assert!(calls.contains(&"service_del upnp 10 uuid:1234".to_string()));
    assert!(h.sm().services().local_services().is_empty());
    assert!(action_results(&h.drain()).contains(&(P2pAction::PutLocalService, ErrCode::Failed)));
}

/// 验证忙碌时的命令返回 Busy
#[test]
fn test_busy_while_forming() {
    let peer = mac(2);
    let mut h = Harness::enabled();
    h.found(PeerDevice::new(peer, "tv"));
    h.connect(ConnectionConfig::new(peer.to_string()));
    h.drain();

    assert_eq!(h.connect(ConnectionConfig::new(peer.to_string())), ErrCode::Busy);
    h.send(P2pMessage::CreateGroup(ConnectionConfig::default()));
    assert!(action_results(&h.drain()).contains(&(P2pAction::CreateGroup, ErrCode::Busy)));

    h.send(P2pMessage::CancelConnect);
    assert_eq!(h.state(), P2pState::Idle);
}

/// 验证定时器在运行时中到期后推动状态
#[tokio::test]
async fn test_formation_timer_fires() {
    let peer = mac(2);
    let fast = AppSettings {
        group_formation_timeout_secs: 0,
        ..settings()
    };
    let mut h = Harness::with_settings(MockHal::default(), MemoryStore::new(), fast);
    h.enable();
    h.found(PeerDevice::new(peer, "tv"));
    h.connect(ConnectionConfig::new(peer.to_string()));
    assert_eq!(h.state(), P2pState::GroupNegotiation);

    tokio::time::sleep(Duration::from_millis(20)).await;
    h.machine.process_pending();
    assert_eq!(h.state(), P2pState::Idle);
    assert!(h.hal.called("cancel_connect"));
}
