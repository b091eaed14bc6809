//! Idle 与组建立
//!
//! Idle 接受本机的连接 / 建组命令和对端发起的请求；GroupFormation 子树
//! 负责协商、授权、PD 以及组建立后的 DHCP。整个子树共用一个建立超时。

use log::{debug, info, warn};

use super::{P2pMessage, P2pState, P2pStateMachine, PeerRequest, TimerKey};
use crate::dhcp::{DhcpOutcome, DhcpResult};
use crate::event::PromptKind;
use crate::hal::{ConnectRequest, HalError, HalEvent, HalGroupConfig};
use crate::hsm::Outcome;
use crate::manager::check_config_usable;
use crate::types::{
    ConnectionConfig, ConnectionInfo, ErrCode, GroupInfo, GroupOwnerBand, MacAddress, P2pAction,
    P2pConnectState, P2pDeviceStatus, PeerDevice, WpsInfo, WpsMethod, generate_passphrase,
    is_usable_group_name, is_usable_passphrase, make_group_name,
};

/// GO 协商请求中的 device password ID 对应的 WPS 方式
pub(super) fn wps_method_from_passwd_id(passwd_id: u16) -> WpsMethod {
    match passwd_id {
        0 => WpsMethod::Label,
        1 => WpsMethod::Display,
        5 => WpsMethod::Keypad,
        _ => WpsMethod::Pbc,
    }
}

fn hal_code(result: Result<(), HalError>, what: &str) -> ErrCode {
    match result {
        Ok(()) => ErrCode::Success,
        Err(e) => {
            warn!("Failed to {}: {}", what, e);
            ErrCode::Failed
        }
    }
}

impl P2pStateMachine {
    /// 已知设备，不在表中时返回只带地址的记录
    pub(super) fn known_peer(&self, address: MacAddress) -> PeerDevice {
        let device = self.devices.get_device(address);
        if device.is_valid() {
            device
        } else {
            PeerDevice::new(address, "")
        }
    }

    pub(super) fn preferred_frequency(&self, band: GroupOwnerBand) -> Option<u32> {
        if band == GroupOwnerBand::Auto {
            return None;
        }
        match self.hal.frequencies_by_band(band) {
            Ok(frequencies) => frequencies.first().copied(),
            Err(e) => {
                warn!("Failed to query {:?} frequencies: {}", band, e);
                None
            }
        }
    }

    /// 发出 `P2P_CONNECT`；supplicant 生成的 PIN 交给用户显示
    pub(super) fn connect_peer(
        &mut self,
        config: &ConnectionConfig,
        peer: &PeerDevice,
        join: bool,
    ) -> Result<(), HalError> {
        let mut request = ConnectRequest::new(
            peer.device_address,
            config.wps.clone(),
            config.group_owner_intent,
        );
        request.join = join;
        request.network_id = config.network_id.filter(|id| *id >= 0);
        request.frequency = self.preferred_frequency(config.band);

        debug!(
            "Connecting to {} ({:?}, join={})",
            peer.device_address, config.wps.method, join
        );
        if let Some(pin) = self.hal.connect(&request)? {
            self.prompt(PromptKind::ShowPin, peer, Some(pin));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Idle
    // ------------------------------------------------------------------

    pub(super) fn process_idle(&mut self, msg: &mut P2pMessage) -> Outcome<P2pState> {
        match msg {
            P2pMessage::Connect { config, reply } => {
                let peer = match check_config_usable(config, &self.devices) {
                    Ok(peer) => peer,
                    Err(code) => {
                        warn!("Rejecting connect to '{}': {}", config.device_address, code);
                        reply.send(code.into());
                        self.action_result(P2pAction::Connect, code.into());
                        return Outcome::Handled;
                    }
                };
                reply.send(ErrCode::Success);
                self.start_connect(config.clone(), peer)
            }
            P2pMessage::CreateGroup(config) => {
                let config = config.clone();
                let code = self.create_group(&config);
                self.action_result(P2pAction::CreateGroup, code);
                if code.is_success() {
                    Outcome::Transition(P2pState::GroupNegotiation)
                } else {
                    Outcome::Handled
                }
            }
            P2pMessage::Hal(HalEvent::GoNegRequest { peer, passwd_id }) => {
                let device = self.ensure_peer(&PeerDevice::new(*peer, ""));
                let method = wps_method_from_passwd_id(*passwd_id);
                info!("GO negotiation request from {} ({:?})", peer, method);
                self.pending = Some(PeerRequest::new(
                    device,
                    WpsInfo {
                        method,
                        pin: String::new(),
                    },
                ));
                Outcome::Transition(P2pState::AuthorizingNegotiationRequest)
            }
            P2pMessage::Hal(HalEvent::InvitationReceived {
                source,
                go_address,
                bssid,
                persistent_id,
                frequency,
            }) => {
                let device = self.ensure_peer(&PeerDevice::new(*source, ""));
                info!("Invitation from {} (persistent={:?})", source, persistent_id);
                let mut request = PeerRequest::new(device, WpsInfo::pbc());
                request.persistent_id = *persistent_id;
                request.go_address = go_address.or(*bssid);
                request.frequency = *frequency;
                self.pending = Some(request);
                Outcome::Transition(P2pState::InvitationReceived)
            }
            P2pMessage::Hal(HalEvent::ProvDiscPbcRequest(peer)) => {
                let device = self.ensure_peer(peer);
                self.pending = Some(PeerRequest::new(device, WpsInfo::pbc()));
                Outcome::Transition(P2pState::AuthorizingNegotiationRequest)
            }
            P2pMessage::Hal(HalEvent::ProvDiscEnterPin(peer)) => {
                let device = self.ensure_peer(peer);
                self.pending = Some(PeerRequest::new(
                    device,
                    WpsInfo::with_pin(WpsMethod::Keypad, ""),
                ));
                Outcome::Transition(P2pState::AuthorizingNegotiationRequest)
            }
            P2pMessage::Hal(HalEvent::ProvDiscShowPin { peer, pin }) => {
                let device = self.ensure_peer(peer);
                self.pending = Some(PeerRequest::new(
                    device,
                    WpsInfo::with_pin(WpsMethod::Display, pin.clone()),
                ));
                Outcome::Transition(P2pState::AuthorizingNegotiationRequest)
            }
            P2pMessage::Hal(HalEvent::GroupStarted(group)) => {
                let group = std::mem::take(group);
                self.on_group_started(group);
                Outcome::Transition(P2pState::GroupFormed)
            }
            _ => Outcome::NotHandled,
        }
    }

    fn start_connect(&mut self, config: ConnectionConfig, address: MacAddress) -> Outcome<P2pState> {
        self.timers.stop(TimerKey::Discovery);
        self.set_discovering(false);

        self.saved_config = Some(config.clone());
        self.devices
            .update_device_status(address, P2pDeviceStatus::Invited);
        self.broadcast_peers();

        let peer = self.devices.get_device(address);
        if let Some(next) = self.reawaken_persistent_group(&config, &peer) {
            return Outcome::Transition(next);
        }

        if peer.is_group_owner() {
            info!("{} is a group owner, starting provision discovery", address);
            match self.hal.provision_discovery(address, config.wps.method) {
                Ok(()) => Outcome::Transition(P2pState::ProvisionDiscovery),
                Err(e) => {
                    warn!("Provision discovery failed: {}", e);
                    self.deal_group_creation_failed();
                    Outcome::Handled
                }
            }
        } else {
            match self.connect_peer(&config, &peer, false) {
                Ok(()) => Outcome::Transition(P2pState::GroupNegotiation),
                Err(e) => {
                    warn!("Connect failed: {}", e);
                    self.deal_group_creation_failed();
                    Outcome::Handled
                }
            }
        }
    }

    /// 尝试重新调用与对端共有的持久组
    ///
    /// 依次尝试：以客户端身份加入对端为 GO 的组、以 GO 身份重新邀请、
    /// 以客户端身份重新邀请。都不可用时返回 `None`。
    fn reawaken_persistent_group(
        &mut self,
        config: &ConnectionConfig,
        peer: &PeerDevice,
    ) -> Option<P2pState> {
        let address = peer.device_address;
        let (owned_by_peer, with_client) = match config.network_id.filter(|id| *id >= 0) {
            Some(id) => match self.groups.get_group(id) {
                Some(group) if group.is_group_owner => (None, Some(id)),
                Some(_) => (Some(id), None),
                None => (None, None),
            },
            None => (
                self.groups.network_id_owned_by(address),
                self.groups.network_id_with_client(address),
            ),
        };
        if owned_by_peer.is_none() && with_client.is_none() {
            return None;
        }

        if peer.is_group_owner()
            && !peer.is_group_limit()
            && let Some(id) = owned_by_peer
        {
            let frequency = self.preferred_frequency(config.band);
            match self.hal.group_add(true, Some(id), frequency) {
                Ok(()) => {
                    info!("Rejoining persistent group {} owned by {}", id, address);
                    return Some(P2pState::GroupNegotiation);
                }
                Err(e) => warn!("Failed to rejoin persistent group {}: {}", id, e),
            }
        }

        if peer.is_inviteable() && !peer.is_device_limit() {
            for id in [with_client, owned_by_peer].into_iter().flatten() {
                match self.hal.reinvoke(id, address) {
                    Ok(()) => {
                        info!("Reinvoking persistent group {} with {}", id, address);
                        return Some(P2pState::InvitationRequest);
                    }
                    Err(e) => {
                        warn!("Reinvoke of group {} failed: {}", id, e);
                        self.update_persistent_groups();
                    }
                }
            }
        }
        None
    }

    fn create_group(&mut self, config: &ConnectionConfig) -> ErrCode {
        let frequency = self.preferred_frequency(config.band);

        if let Some(id) = config.network_id.filter(|id| *id >= 0) {
            return hal_code(self.hal.group_add(true, Some(id), frequency), "start group");
        }

        if config.group_name.is_empty() && config.passphrase.is_empty() {
            return hal_code(self.hal.group_add(true, None, frequency), "start group");
        }

        let ssid = make_group_name(&self.settings.group_name_prefix, &config.group_name);
        let passphrase = if config.passphrase.is_empty() {
            generate_passphrase()
        } else {
            config.passphrase.clone()
        };
        if !is_usable_group_name(&ssid) || !is_usable_passphrase(&passphrase) {
            warn!("Unusable group name or passphrase for '{}'", ssid);
            return ErrCode::InvalidParam;
        }

        let network_id = match self.hal.add_network() {
            Ok(id) => id,
            Err(e) => {
                warn!("Failed to add network: {}", e);
                return ErrCode::Failed;
            }
        };
        let group_config = HalGroupConfig {
            ssid,
            passphrase,
            persistent: true,
        };
        if let Err(e) = self.hal.set_group_config(network_id, &group_config) {
            warn!("Failed to configure network {}: {}", network_id, e);
            if let Err(e) = self.hal.remove_network(network_id) {
                warn!("Failed to remove network {}: {}", network_id, e);
            }
            return ErrCode::Failed;
        }
        info!("Starting group '{}' on network {}", group_config.ssid, network_id);
        hal_code(
            self.hal.group_add(true, Some(network_id), frequency),
            "start group",
        )
    }

    /// 组已在 HAL 中建立：记录当前组并更新设备状态和持久组表
    pub(super) fn on_group_started(&mut self, mut group: GroupInfo) {
        info!(
            "Group started on {} (owner={}, persistent={})",
            group.interface, group.is_group_owner, group.is_persistent
        );
        self.timers.stop(TimerKey::Discovery);
        self.set_discovering(false);

        if group.is_group_owner {
            group.owner = self.devices.this_device().clone();
        } else {
            let owner = group.owner_address();
            let known = self.devices.get_device(owner);
            if known.is_valid() {
                group.owner = known;
            }
            self.devices
                .update_device_status(owner, P2pDeviceStatus::Connected);
        }

        if group.is_persistent {
            self.update_persistent_groups();
            let stored_id = self
                .groups
                .groups_ref()
                .iter()
                .find(|g| g.group_name == group.group_name)
                .map(|g| g.network_id);
            if let Some(id) = stored_id {
                group.network_id = id;
                let mut stored = group.clone();
                stored.interface.clear();
                if let Some(previous) = self.groups.get_group(id) {
                    for client in &previous.clients {
                        stored.add_client(client.clone());
                    }
                }
                self.groups.add_group(stored);
                self.stash_groups();
                self.broadcast_groups();
            }
        }

        self.set_connection(ConnectionInfo {
            connect_state: P2pConnectState::Connected,
            is_group_owner: group.is_group_owner,
            group_owner_address: None,
        });
        self.groups.set_current_group(Some(group));
    }

    // ------------------------------------------------------------------
    // GroupFormation
    // ------------------------------------------------------------------

    pub(super) fn process_group_formation(&mut self, msg: &mut P2pMessage) -> Outcome<P2pState> {
        match msg {
            P2pMessage::GroupFormationTimeout => {
                warn!("Group formation timed out");
                if let Err(e) = self.hal.cancel_connect() {
                    warn!("Failed to cancel connect: {}", e);
                }
                self.deal_group_creation_failed();
                Outcome::Transition(P2pState::Idle)
            }
            P2pMessage::CancelConnect => {
                let code = hal_code(self.hal.cancel_connect(), "cancel connect");
                self.deal_group_creation_failed();
                self.action_result(P2pAction::CancelConnect, code);
                Outcome::Transition(P2pState::Idle)
            }
            P2pMessage::Hal(HalEvent::GoNegFailure { status }) => {
                warn!("GO negotiation failed (status={})", status);
                self.deal_group_creation_failed();
                Outcome::Transition(P2pState::Idle)
            }
            P2pMessage::Hal(HalEvent::GroupFormationFailure { reason }) => {
                warn!("Group formation failed: {}", reason);
                self.deal_group_creation_failed();
                Outcome::Transition(P2pState::Idle)
            }
            P2pMessage::Hal(HalEvent::ProvDiscFailure { peer, status }) => {
                warn!("Provision discovery with {} failed (status={})", peer, status);
                self.deal_group_creation_failed();
                Outcome::Transition(P2pState::Idle)
            }
            P2pMessage::Hal(HalEvent::GroupStarted(group)) => {
                let group = std::mem::take(group);
                self.on_group_started(group);
                Outcome::Transition(P2pState::GroupFormed)
            }
            P2pMessage::Hal(HalEvent::GroupRemoved { interface, reason, .. }) => {
                warn!("Group {} removed during formation: {}", interface, reason);
                self.teardown_group(false);
                self.deal_group_creation_failed();
                Outcome::Transition(P2pState::Idle)
            }
            _ => Outcome::NotHandled,
        }
    }

    pub(super) fn process_group_negotiation(&mut self, msg: &mut P2pMessage) -> Outcome<P2pState> {
        match msg {
            P2pMessage::Hal(HalEvent::GoNegSuccess) => {
                debug!("GO negotiation succeeded");
                Outcome::Handled
            }
            P2pMessage::Hal(HalEvent::GroupFormationSuccess) => {
                debug!("Group formation succeeded, waiting for group start");
                Outcome::Handled
            }
            _ => Outcome::NotHandled,
        }
    }

    // ------------------------------------------------------------------
    // ProvisionDiscovery
    // ------------------------------------------------------------------

    pub(super) fn process_provision_discovery(
        &mut self,
        msg: &mut P2pMessage,
    ) -> Outcome<P2pState> {
        let Some(mut config) = self.saved_config.clone() else {
            return Outcome::NotHandled;
        };
        let Ok(address) = config.device_address.parse::<MacAddress>() else {
            return Outcome::NotHandled;
        };

        match msg {
            P2pMessage::Hal(HalEvent::ProvDiscPbcResponse(peer)) if *peer == address => {
                config.wps = WpsInfo::pbc();
                self.join_after_provision(config, address)
            }
            P2pMessage::Hal(HalEvent::ProvDiscEnterPin(peer)) if peer.device_address == address => {
                if config.wps.pin.is_empty() {
                    let device = self.known_peer(address);
                    self.pending = Some(PeerRequest::new(
                        device.clone(),
                        WpsInfo::with_pin(WpsMethod::Keypad, ""),
                    ));
                    self.prompt(PromptKind::EnterPin, &device, None);
                    return Outcome::Handled;
                }
                config.wps.method = WpsMethod::Keypad;
                self.join_after_provision(config, address)
            }
            P2pMessage::Hal(HalEvent::ProvDiscShowPin { peer, pin }) if peer.device_address == address => {
                config.wps = WpsInfo::with_pin(WpsMethod::Display, pin.clone());
                let device = self.known_peer(address);
                self.prompt(PromptKind::ShowPin, &device, Some(pin.clone()));
                self.join_after_provision(config, address)
            }
            P2pMessage::UserConfirm(pin) if self.pending.is_some() => {
                self.pending = None;
                config.wps = WpsInfo::with_pin(WpsMethod::Keypad, pin.clone());
                self.join_after_provision(config, address)
            }
            P2pMessage::UserReject => {
                info!("User rejected provisioning with {}", address);
                self.deal_group_creation_failed();
                Outcome::Transition(P2pState::Idle)
            }
            _ => Outcome::NotHandled,
        }
    }

    fn join_after_provision(
        &mut self,
        config: ConnectionConfig,
        address: MacAddress,
    ) -> Outcome<P2pState> {
        let peer = self.known_peer(address);
        match self.connect_peer(&config, &peer, true) {
            Ok(()) => {
                self.saved_config = Some(config);
                Outcome::Transition(P2pState::GroupNegotiation)
            }
            Err(e) => {
                warn!("Join of {} failed: {}", address, e);
                self.deal_group_creation_failed();
                Outcome::Transition(P2pState::Idle)
            }
        }
    }

    // ------------------------------------------------------------------
    // AuthorizingNegotiationRequest
    // ------------------------------------------------------------------

    pub(super) fn enter_authorizing(&mut self) {
        let Some(request) = self.pending.clone() else {
            return;
        };
        match request.wps.method {
            WpsMethod::Keypad => self.prompt(PromptKind::EnterPin, &request.peer, None),
            WpsMethod::Display if !request.wps.pin.is_empty() => {
                self.prompt(PromptKind::ShowPin, &request.peer, Some(request.wps.pin));
            }
            _ => self.prompt(PromptKind::Negotiation, &request.peer, None),
        }
    }

    pub(super) fn process_authorizing(&mut self, msg: &mut P2pMessage) -> Outcome<P2pState> {
        match msg {
            P2pMessage::UserAccept => {
                let needs_pin = self
                    .pending
                    .as_ref()
                    .is_some_and(|r| r.wps.method == WpsMethod::Keypad && r.wps.pin.is_empty());
                if needs_pin {
                    debug!("Waiting for PIN before accepting");
                    return Outcome::Handled;
                }
                self.accept_negotiation(None)
            }
            P2pMessage::UserConfirm(pin) => {
                let pin = std::mem::take(pin);
                self.accept_negotiation(Some(pin))
            }
            P2pMessage::UserReject => {
                if let Some(request) = &self.pending {
                    info!("User rejected request from {}", request.peer.device_address);
                }
                self.action_result(P2pAction::Connect, ErrCode::Rejected);
                self.deal_group_creation_failed();
                Outcome::Transition(P2pState::Idle)
            }
            _ => Outcome::NotHandled,
        }
    }

    fn accept_negotiation(&mut self, pin: Option<String>) -> Outcome<P2pState> {
        let Some(mut request) = self.pending.take() else {
            return Outcome::Transition(P2pState::Idle);
        };
        if let Some(pin) = pin {
            if request.wps.method == WpsMethod::Pbc {
                request.wps.method = WpsMethod::Keypad;
            }
            request.wps.pin = pin;
        }

        let address = request.peer.device_address;
        let config = ConnectionConfig {
            device_address: address.to_string(),
            group_owner_intent: self.settings.go_intent,
            wps: request.wps,
            band: self.settings.preferred_band,
            needs_dhcp: self.settings.needs_dhcp,
            ..Default::default()
        };
        self.devices
            .update_device_status(address, P2pDeviceStatus::Invited);
        self.broadcast_peers();

        let result = self.connect_peer(&config, &request.peer, false);
        self.saved_config = Some(config);
        match result {
            Ok(()) => Outcome::Transition(P2pState::GroupNegotiation),
            Err(e) => {
                warn!("Failed to accept request from {}: {}", address, e);
                self.deal_group_creation_failed();
                Outcome::Transition(P2pState::Idle)
            }
        }
    }

    // ------------------------------------------------------------------
    // GroupFormed
    // ------------------------------------------------------------------

    pub(super) fn enter_group_formed(&mut self) {
        let Some(group) = self.groups.current_group() else {
            warn!("Entered GroupFormed without a group");
            self.sender.send(P2pMessage::DhcpTimeout);
            return;
        };
        let interface = group.interface.clone();

        if group.is_group_owner {
            match self.dhcp.start_server(&interface, &self.settings.dhcp_server) {
                Ok(address) => {
                    info!("DHCP server on {} at {}", interface, address);
                    if let Some(group) = self.groups.current_group_mut() {
                        group.go_ip_address = Some(address);
                    }
                    let mut info = self.connection;
                    info.group_owner_address = Some(address);
                    self.set_connection(info);
                    if let Err(e) =
                        self.dhcp
                            .add_route(&interface, address, self.settings.dhcp_server.prefix_len)
                    {
                        warn!("Failed to add route on {}: {}", interface, e);
                    }
                    self.sender.send(P2pMessage::GroupReady);
                }
                Err(e) => self.dhcp_sink().on_failed(-1, &interface, &e.to_string()),
            }
            return;
        }

        let needs_dhcp = self
            .saved_config
            .as_ref()
            .map_or(self.settings.needs_dhcp, |c| c.needs_dhcp);
        if !needs_dhcp {
            self.sender.send(P2pMessage::GroupReady);
            return;
        }

        if let Err(e) = self.dhcp.start_client(&interface) {
            self.dhcp_sink().on_failed(-1, &interface, &e.to_string());
            return;
        }
        self.dhcp_client = Some(interface.clone());
        let timeout = self.settings.dhcp_timeout();
        self.timers
            .start(TimerKey::Dhcp, P2pMessage::DhcpTimeout, timeout);
        if let Err(e) = self.dhcp.get_result(&interface, self.dhcp_sink(), timeout) {
            self.dhcp_sink().on_failed(-1, &interface, &e.to_string());
        }
    }

    fn is_group_interface(&self, interface: &str) -> bool {
        self.groups
            .current_group()
            .is_some_and(|g| g.interface == interface)
    }

    pub(super) fn process_group_formed(&mut self, msg: &mut P2pMessage) -> Outcome<P2pState> {
        match msg {
            P2pMessage::GroupReady => Outcome::Transition(P2pState::GroupOperating),
            P2pMessage::Dhcp(DhcpOutcome::Success {
                interface, result, ..
            }) => {
                if !self.is_group_interface(interface) {
                    debug!("Ignoring DHCP result for {}", interface);
                    return Outcome::Handled;
                }
                self.timers.stop(TimerKey::Dhcp);
                let interface = interface.clone();
                self.apply_dhcp_result(&interface, *result);
                Outcome::Transition(P2pState::GroupOperating)
            }
            P2pMessage::Dhcp(DhcpOutcome::Failure {
                interface, reason, ..
            }) => {
                if !self.is_group_interface(interface) {
                    debug!("Ignoring DHCP failure for {}", interface);
                    return Outcome::Handled;
                }
                warn!("DHCP failed on {}: {}", interface, reason);
                self.fail_group_formed()
            }
            P2pMessage::DhcpTimeout => {
                warn!("DHCP timed out");
                self.fail_group_formed()
            }
            P2pMessage::GroupFormationTimeout => {
                warn!("Group setup timed out");
                self.fail_group_formed()
            }
            P2pMessage::Hal(HalEvent::StaAuthorized(address)) => {
                self.client_joined(*address);
                Outcome::Handled
            }
            P2pMessage::Hal(HalEvent::GroupStarted(_)) => {
                debug!("Duplicate group start ignored");
                Outcome::Handled
            }
            _ => Outcome::NotHandled,
        }
    }

    fn apply_dhcp_result(&mut self, interface: &str, result: DhcpResult) {
        info!(
            "DHCP on {}: {} via {}",
            interface, result.client_address, result.server_address
        );
        if let Some(group) = self.groups.current_group_mut() {
            group.go_ip_address = Some(result.server_address);
        }
        let mut info = self.connection;
        info.group_owner_address = Some(result.server_address);
        self.set_connection(info);

        let prefix_len = u8::try_from(u32::from(result.subnet_mask).count_ones()).unwrap_or(24);
        if let Err(e) = self
            .dhcp
            .add_route(interface, result.client_address, prefix_len)
        {
            warn!("Failed to add route on {}: {}", interface, e);
        }
    }

    /// 组已建立但地址配置失败：拆除组并按建立失败处理
    fn fail_group_formed(&mut self) -> Outcome<P2pState> {
        self.teardown_group(true);
        self.deal_group_creation_failed();
        Outcome::Transition(P2pState::Idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passwd_id_mapping() {
        assert_eq!(wps_method_from_passwd_id(0), WpsMethod::Label);
        assert_eq!(wps_method_from_passwd_id(1), WpsMethod::Display);
        assert_eq!(wps_method_from_passwd_id(4), WpsMethod::Pbc);
        assert_eq!(wps_method_from_passwd_id(5), WpsMethod::Keypad);
        assert_eq!(wps_method_from_passwd_id(7), WpsMethod::Pbc);
    }
}
