//! GroupOperating / GroupJoin 以及组拆除

use log::{debug, info, warn};

use super::formation::wps_method_from_passwd_id;
use super::{P2pMessage, P2pState, P2pStateMachine, PeerRequest};
use crate::event::PromptKind;
use crate::hal::HalEvent;
use crate::hsm::Outcome;
use crate::manager::check_config_usable;
use crate::types::{
    ConnectionInfo, ErrCode, MacAddress, P2pAction, P2pDeviceStatus, WpsInfo, WpsMethod,
};

impl P2pStateMachine {
    fn is_group_owner(&self) -> bool {
        self.groups
            .current_group()
            .is_some_and(|g| g.is_group_owner)
    }

    pub(super) fn enter_group_operating(&mut self) {
        if self.saved_config.take().is_some() {
            self.action_result(P2pAction::Connect, ErrCode::Success);
        }
        self.speculative_peer = None;
        if let Some(group) = self.groups.current_group() {
            info!(
                "Group {} operating ({})",
                group.group_name,
                if group.is_group_owner { "GO" } else { "client" }
            );
        }
        self.broadcast_connection();
        self.broadcast_peers();
    }

    pub(super) fn process_group_operating(&mut self, msg: &mut P2pMessage) -> Outcome<P2pState> {
        match msg {
            P2pMessage::Hal(HalEvent::GroupRemoved {
                interface, reason, ..
            }) => {
                if !self.is_current_interface(interface) {
                    debug!("Ignoring removal of unknown group {}", interface);
                    return Outcome::Handled;
                }
                info!("Group {} removed: {}", interface, reason);
                self.on_group_removed();
                Outcome::Transition(P2pState::Idle)
            }
            P2pMessage::Hal(HalEvent::StaAuthorized(address)) => {
                self.client_joined(*address);
                Outcome::Handled
            }
            P2pMessage::Hal(HalEvent::StaDeauthorized(address)) => {
                self.client_left(*address);
                Outcome::Handled
            }
            P2pMessage::Hal(HalEvent::ProvDiscPbcRequest(peer)) if self.is_group_owner() => {
                let device = self.known_peer(peer.device_address);
                self.pending = Some(PeerRequest::new(device, WpsInfo::pbc()));
                Outcome::Transition(P2pState::GroupJoin)
            }
            P2pMessage::Hal(HalEvent::ProvDiscEnterPin(peer)) if self.is_group_owner() => {
                let device = self.known_peer(peer.device_address);
                self.pending = Some(PeerRequest::new(
                    device,
                    WpsInfo::with_pin(WpsMethod::Keypad, ""),
                ));
                Outcome::Transition(P2pState::GroupJoin)
            }
            P2pMessage::Hal(HalEvent::ProvDiscShowPin { peer, pin }) if self.is_group_owner() => {
                let device = self.known_peer(peer.device_address);
                self.pending = Some(PeerRequest::new(
                    device,
                    WpsInfo::with_pin(WpsMethod::Display, pin.clone()),
                ));
                Outcome::Transition(P2pState::GroupJoin)
            }
            P2pMessage::Hal(HalEvent::GoNegRequest { peer, passwd_id }) if self.is_group_owner() => {
                let device = self.known_peer(*peer);
                let wps = WpsInfo {
                    method: wps_method_from_passwd_id(*passwd_id),
                    pin: String::new(),
                };
                self.pending = Some(PeerRequest::new(device, wps));
                Outcome::Transition(P2pState::GroupJoin)
            }
            P2pMessage::Connect { config, reply } if self.is_group_owner() => {
                let code = match check_config_usable(config, &self.devices) {
                    Ok(_) => ErrCode::Success,
                    Err(code) => code.into(),
                };
                reply.send(code);
                let code = if code.is_success() {
                    self.invite_peer(&config.device_address)
                } else {
                    code
                };
                self.action_result(P2pAction::Connect, code);
                Outcome::Handled
            }
            P2pMessage::Invite(address) => {
                let code = self.invite_peer(address);
                self.action_result(P2pAction::Invite, code);
                Outcome::Handled
            }
            _ => Outcome::NotHandled,
        }
    }

    // ------------------------------------------------------------------
    // GroupJoin
    // ------------------------------------------------------------------

    pub(super) fn enter_group_join(&mut self) {
        let Some(request) = self.pending.clone() else {
            return;
        };
        match request.wps.method {
            WpsMethod::Keypad => self.prompt(PromptKind::EnterPin, &request.peer, None),
            WpsMethod::Display if !request.wps.pin.is_empty() => {
                self.prompt(PromptKind::ShowPin, &request.peer, Some(request.wps.pin));
            }
            _ => self.prompt(PromptKind::JoinRequest, &request.peer, None),
        }
    }

    pub(super) fn process_group_join(&mut self, msg: &mut P2pMessage) -> Outcome<P2pState> {
        match msg {
            P2pMessage::UserAccept => {
                let needs_pin = self
                    .pending
                    .as_ref()
                    .is_some_and(|r| r.wps.method == WpsMethod::Keypad && r.wps.pin.is_empty());
                if needs_pin {
                    debug!("Waiting for PIN before accepting join");
                    return Outcome::Handled;
                }
                self.accept_join(None)
            }
            P2pMessage::UserConfirm(pin) => {
                let pin = std::mem::take(pin);
                self.accept_join(Some(pin))
            }
            P2pMessage::UserReject => {
                if let Some(request) = &self.pending {
                    info!("User rejected join from {}", request.peer.device_address);
                }
                Outcome::Transition(P2pState::GroupOperating)
            }
            P2pMessage::Hal(HalEvent::GroupRemoved { interface, .. }) => {
                if !self.is_current_interface(interface) {
                    return Outcome::Handled;
                }
                self.on_group_removed();
                Outcome::Transition(P2pState::Idle)
            }
            P2pMessage::Hal(HalEvent::StaAuthorized(address)) => {
                self.client_joined(*address);
                Outcome::Transition(P2pState::GroupOperating)
            }
            P2pMessage::Hal(HalEvent::StaDeauthorized(address)) => {
                self.client_left(*address);
                Outcome::Handled
            }
            _ => Outcome::NotHandled,
        }
    }

    fn accept_join(&mut self, pin: Option<String>) -> Outcome<P2pState> {
        let Some(request) = self.pending.take() else {
            return Outcome::Transition(P2pState::GroupOperating);
        };
        let Some(interface) = self.groups.current_group().map(|g| g.interface.clone()) else {
            return Outcome::Transition(P2pState::Idle);
        };

        let pin = pin.unwrap_or(request.wps.pin);
        let result = match request.wps.method {
            WpsMethod::Pbc if pin.is_empty() => self.hal.wps_pbc(&interface),
            _ => self.hal.wps_pin(&interface, &pin),
        };
        match result {
            Ok(()) => info!(
                "Accepted join from {} on {}",
                request.peer.device_address, interface
            ),
            Err(e) => warn!(
                "Failed to authorize {} on {}: {}",
                request.peer.device_address, interface, e
            ),
        }
        Outcome::Transition(P2pState::GroupOperating)
    }

    // ------------------------------------------------------------------
    // 客户端与组拆除
    // ------------------------------------------------------------------

    fn is_current_interface(&self, interface: &str) -> bool {
        self.groups
            .current_group()
            .is_some_and(|g| g.interface == interface)
    }

    /// 客户端完成认证；持久组同时记录该客户端，供以后重新邀请
    pub(super) fn client_joined(&mut self, address: MacAddress) {
        let device = self.known_peer(address);
        let Some(group) = self.groups.current_group_mut() else {
            return;
        };
        if !group.is_group_owner {
            return;
        }
        info!("Client {} joined {}", address, group.interface);
        group.add_client(device.clone());
        let network_id = group.network_id;
        let persistent = group.is_persistent;

        if persistent
            && let Some(mut stored) = self.groups.get_group(network_id).cloned()
            && !stored.contains_client(address)
        {
            stored.add_client(device);
            self.groups.add_group(stored);
            self.stash_groups();
            self.broadcast_groups();
        }

        self.devices
            .update_device_status(address, P2pDeviceStatus::Connected);
        self.broadcast_peers();
        self.broadcast_connection();
    }

    pub(super) fn client_left(&mut self, address: MacAddress) {
        let removed = self
            .groups
            .current_group_mut()
            .is_some_and(|g| g.remove_client(address));
        if !removed {
            return;
        }
        info!("Client {} left", address);
        self.devices
            .update_device_status(address, P2pDeviceStatus::Available);
        self.broadcast_peers();
        self.broadcast_connection();
    }

    fn on_group_removed(&mut self) {
        self.teardown_group(false);
        self.update_persistent_groups();
        self.broadcast_connection();
        self.broadcast_peers();
    }

    /// 停止 DHCP，可选地让 HAL 删除组，然后清除当前组和连接状态
    pub(super) fn teardown_group(&mut self, remove_from_hal: bool) {
        let Some(group) = self.groups.current_group().cloned() else {
            if self.connection.is_connected() {
                self.set_connection(ConnectionInfo::disconnected());
            }
            return;
        };
        let interface = group.interface.as_str();

        if group.is_group_owner
            && let Err(e) = self.dhcp.stop_server(interface)
        {
            warn!("Failed to stop DHCP server on {}: {}", interface, e);
        }
        if let Some(client) = self.dhcp_client.take()
            && let Err(e) = self.dhcp.stop_client(&client)
        {
            warn!("Failed to stop DHCP client on {}: {}", client, e);
        }
        if remove_from_hal {
            match self.hal.remove_group(interface) {
                Ok(()) => info!("Removed group {}", interface),
                Err(e) => warn!("Failed to remove group {}: {}", interface, e),
            }
        }

        let peers = group
            .clients
            .iter()
            .map(|c| c.device_address)
            .chain((!group.is_group_owner).then(|| group.owner_address()));
        for address in peers.collect::<Vec<_>>() {
            self.devices
                .update_device_status(address, P2pDeviceStatus::Available);
        }

        self.groups.set_current_group(None);
        self.set_connection(ConnectionInfo::disconnected());
    }
}

