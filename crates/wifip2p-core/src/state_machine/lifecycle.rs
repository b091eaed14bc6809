//! Default / Disabled / Enabling / Enabled / Disabling
//!
//! Enabled 负责所有与连接阶段无关的命令：发现、服务发现、本地服务、
//! 设备名、监听、删除持久组。

use log::{debug, info, warn};

use super::{P2pMessage, P2pState, P2pStateMachine, Query, TimerKey};
use crate::event::P2pEvent;
use crate::hal::{DeviceConfig, HalEvent};
use crate::hsm::Outcome;
use crate::manager::check_config_usable;
use crate::service::dnssd::DNS_TYPE_PTR;
use crate::service::{ParsedService, ServiceInfo, ServiceResponse};
use crate::types::{ErrCode, MacAddress, P2pAction, P2pDeviceStatus, PeerDevice};

/// 命令消息对应的 action；非命令返回 `None`
fn command_action(msg: &P2pMessage) -> Option<P2pAction> {
    let action = match msg {
        P2pMessage::Enable => P2pAction::Enable,
        P2pMessage::Disable => P2pAction::Disable,
        P2pMessage::DiscoverPeers => P2pAction::DiscoverPeers,
        P2pMessage::StopDiscoverPeers => P2pAction::StopDiscoverPeers,
        P2pMessage::DiscoverServices => P2pAction::DiscoverServices,
        P2pMessage::StopDiscoverServices => P2pAction::StopDiscoverServices,
        P2pMessage::AddServiceRequest(_)
        | P2pMessage::RemoveServiceRequest(_)
        | P2pMessage::ClearServiceRequests => P2pAction::RequestService,
        P2pMessage::PutLocalService(_) => P2pAction::PutLocalService,
        P2pMessage::DeleteLocalService(_) => P2pAction::DeleteLocalService,
        P2pMessage::Connect { .. } => P2pAction::Connect,
        P2pMessage::CancelConnect => P2pAction::CancelConnect,
        P2pMessage::CreateGroup(_) => P2pAction::CreateGroup,
        P2pMessage::RemoveGroup => P2pAction::RemoveGroup,
        P2pMessage::DeleteGroup(_) => P2pAction::DeleteGroup,
        P2pMessage::Invite(_) => P2pAction::Invite,
        P2pMessage::SetDeviceName(_) => P2pAction::SetDeviceName,
        P2pMessage::StartListen { .. } => P2pAction::StartListen,
        P2pMessage::StopListen => P2pAction::StopListen,
        _ => return None,
    };
    Some(action)
}

impl P2pStateMachine {
    // ------------------------------------------------------------------
    // Default
    // ------------------------------------------------------------------

    pub(super) fn process_default(&mut self, msg: &mut P2pMessage) -> Outcome<P2pState> {
        if let P2pMessage::Query(query) = msg {
            self.answer(query);
            return Outcome::Handled;
        }
        if let P2pMessage::Connect { reply, .. } = msg {
            reply.send(ErrCode::NotOpened);
        }
        match command_action(msg) {
            Some(action) => {
                self.action_result(action, ErrCode::NotOpened);
                Outcome::Handled
            }
            None => Outcome::NotHandled,
        }
    }

    fn answer(&self, query: &mut Query) {
        match query {
            Query::Devices(reply) => reply.send(self.devices.devices()),
            Query::Groups(reply) => reply.send(self.groups.groups()),
            Query::Connection(reply) => {
                reply.send((self.connection, self.groups.current_group().cloned()));
            }
            Query::ThisDevice(reply) => reply.send(self.devices.this_device().clone()),
            Query::Services(reply) => reply.send(self.services.responses()),
            Query::EnableState(reply) => reply.send(self.enabled),
            Query::State(reply) => reply.send(self.leaf),
        }
    }

    // ------------------------------------------------------------------
    // Disabled / Enabling / Disabling
    // ------------------------------------------------------------------

    pub(super) fn enter_disabled(&mut self) {
        self.enabled = false;
        self.broadcast(P2pEvent::EnableStateChanged { enabled: false });
    }

    pub(super) fn process_disabled(&mut self, msg: &mut P2pMessage) -> Outcome<P2pState> {
        match msg {
            P2pMessage::Enable => match self.hal.start_p2p() {
                Ok(()) => Outcome::Transition(P2pState::Enabling),
                Err(e) => {
                    warn!("Failed to start P2P: {}", e);
                    self.action_result(P2pAction::Enable, ErrCode::Failed);
                    Outcome::Handled
                }
            },
            P2pMessage::Disable => {
                self.action_result(P2pAction::Disable, ErrCode::Success);
                Outcome::Handled
            }
            _ => Outcome::NotHandled,
        }
    }

    pub(super) fn process_enabling(&mut self, msg: &mut P2pMessage) -> Outcome<P2pState> {
        match msg {
            P2pMessage::Hal(HalEvent::SupplicantConnected) => {
                info!("wpa_supplicant connected, P2P enabled");
                self.action_result(P2pAction::Enable, ErrCode::Success);
                Outcome::Transition(P2pState::Idle)
            }
            P2pMessage::Hal(HalEvent::SupplicantTerminating) | P2pMessage::StateGuardTimeout => {
                warn!("P2P failed to come up");
                self.action_result(P2pAction::Enable, ErrCode::Failed);
                Outcome::Transition(P2pState::Disabled)
            }
            P2pMessage::Enable => {
                self.action_result(P2pAction::Enable, ErrCode::Busy);
                Outcome::Handled
            }
            P2pMessage::Disable => {
                if let Err(e) = self.hal.stop_p2p() {
                    warn!("Failed to stop P2P: {}", e);
                }
                Outcome::Transition(P2pState::Disabling)
            }
            _ => Outcome::NotHandled,
        }
    }

    pub(super) fn process_disabling(&mut self, msg: &mut P2pMessage) -> Outcome<P2pState> {
        match msg {
            P2pMessage::Hal(HalEvent::SupplicantTerminating) => {
                self.action_result(P2pAction::Disable, ErrCode::Success);
                Outcome::Transition(P2pState::Disabled)
            }
            P2pMessage::StateGuardTimeout => {
                warn!("No terminate event from supplicant, assuming P2P is down");
                self.action_result(P2pAction::Disable, ErrCode::Success);
                Outcome::Transition(P2pState::Disabled)
            }
            P2pMessage::Enable | P2pMessage::Disable => {
                let action = command_action(msg).unwrap_or(P2pAction::Disable);
                self.action_result(action, ErrCode::Busy);
                Outcome::Handled
            }
            _ => Outcome::NotHandled,
        }
    }

    // ------------------------------------------------------------------
    // Enabled
    // ------------------------------------------------------------------

    pub(super) fn enter_enabled(&mut self) {
        self.enabled = true;

        let address = self.hal.device_address().unwrap_or_else(|e| {
            warn!("Failed to read device address: {}", e);
            MacAddress::ZERO
        });
        let mut this = PeerDevice::new(address, self.settings.device_name.clone());
        this.primary_device_type
            .clone_from(&self.settings.primary_device_type);
        this.status = P2pDeviceStatus::Available;
        self.devices.set_this_device(this);

        let config = DeviceConfig {
            device_name: self.settings.device_name.clone(),
            primary_device_type: self.settings.primary_device_type.clone(),
            config_methods: self.settings.config_methods.clone(),
            persistent_reconnect: self.settings.persistent_reconnect,
        };
        if let Err(e) = self.hal.set_device_config(&config) {
            warn!("Failed to apply device config: {}", e);
        }

        self.update_persistent_groups();

        // supplicant 重启后本地服务需要重新登记
        for info in self.services.local_services() {
            for entry in &info.entries {
                if let Err(e) = self.hal.service_add(entry) {
                    warn!("Failed to restore local service: {}", e);
                }
            }
        }

        self.broadcast(P2pEvent::EnableStateChanged { enabled: true });
        self.broadcast_this_device();
        self.broadcast_groups();
    }

    pub(super) fn exit_enabled(&mut self) {
        self.enabled = false;
        self.timers.stop(TimerKey::Discovery);
        self.set_discovering(false);
        self.services.set_query_id(None);
        self.services.clear_responses();
        if self.devices.clear_all() {
            self.broadcast_peers();
        }
        self.pending = None;
        self.saved_config = None;
        self.speculative_peer = None;
        if self.connection.is_connected() || self.groups.current_group().is_some() {
            self.teardown_group(false);
            self.broadcast_connection();
        }
    }

    pub(super) fn process_enabled(&mut self, msg: &mut P2pMessage) -> Outcome<P2pState> {
        match msg {
            P2pMessage::Enable => self.action_result(P2pAction::Enable, ErrCode::Success),
            P2pMessage::Disable => {
                self.teardown_group(true);
                return match self.hal.stop_p2p() {
                    Ok(()) => Outcome::Transition(P2pState::Disabling),
                    Err(e) => {
                        warn!("Failed to stop P2P cleanly: {}", e);
                        self.action_result(P2pAction::Disable, ErrCode::Success);
                        Outcome::Transition(P2pState::Disabled)
                    }
                };
            }
            P2pMessage::Hal(HalEvent::SupplicantTerminating) => {
                warn!("wpa_supplicant terminated unexpectedly");
                return Outcome::Transition(P2pState::Disabled);
            }

            P2pMessage::DiscoverPeers => {
                let code = self.start_discovery();
                self.action_result(P2pAction::DiscoverPeers, code);
            }
            P2pMessage::StopDiscoverPeers => {
                let code = match self.hal.stop_find() {
                    Ok(()) => ErrCode::Success,
                    Err(e) => {
                        warn!("Failed to stop discovery: {}", e);
                        ErrCode::Failed
                    }
                };
                self.timers.stop(TimerKey::Discovery);
                self.set_discovering(false);
                self.action_result(P2pAction::StopDiscoverPeers, code);
            }
            P2pMessage::DiscoveryTimeout | P2pMessage::Hal(HalEvent::FindStopped) => {
                debug!("Discovery finished");
                self.timers.stop(TimerKey::Discovery);
                self.set_discovering(false);
            }
            P2pMessage::Hal(HalEvent::DeviceFound(device)) => {
                if device.device_address == self.devices.this_device().device_address {
                    return Outcome::Handled;
                }
                if self.devices.add_device(device.clone()) {
                    debug!("Found peer {} ({})", device.device_address, device.device_name);
                }
                self.broadcast_peers();
            }
            P2pMessage::Hal(HalEvent::DeviceLost(address)) => {
                if self.devices.remove_device(*address) {
                    debug!("Lost peer {}", address);
                    if self.services.remove_peer(*address) {
                        self.broadcast(P2pEvent::ServicesChanged);
                    }
                    self.broadcast_peers();
                }
            }

            P2pMessage::DiscoverServices => {
                let code = self.discover_services();
                self.action_result(P2pAction::DiscoverServices, code);
            }
            P2pMessage::StopDiscoverServices => {
                self.cancel_service_query();
                self.action_result(P2pAction::StopDiscoverServices, ErrCode::Success);
            }
            P2pMessage::AddServiceRequest(request) => {
                let code = if self.services.add_request(request.clone()) {
                    ErrCode::Success
                } else {
                    ErrCode::InvalidParam
                };
                self.action_result(P2pAction::RequestService, code);
            }
            P2pMessage::RemoveServiceRequest(request) => {
                let code = if self.services.remove_request(request) {
                    ErrCode::Success
                } else {
                    ErrCode::InvalidParam
                };
                self.action_result(P2pAction::RequestService, code);
            }
            P2pMessage::ClearServiceRequests => {
                self.services.clear_requests();
                self.action_result(P2pAction::RequestService, ErrCode::Success);
            }
            P2pMessage::PutLocalService(info) => {
                let code = self.put_local_service(info.clone());
                self.action_result(P2pAction::PutLocalService, code);
            }
            P2pMessage::DeleteLocalService(info) => {
                let code = self.delete_local_service(info);
                self.action_result(P2pAction::DeleteLocalService, code);
            }
            P2pMessage::Hal(HalEvent::ServDiscResponse { peer, tlvs, .. }) => {
                let tlvs = std::mem::take(tlvs);
                self.handle_service_response(*peer, &tlvs);
            }

            P2pMessage::SetDeviceName(name) => {
                let code = self.set_device_name(name);
                self.action_result(P2pAction::SetDeviceName, code);
            }
            P2pMessage::StartListen {
                period_ms,
                interval_ms,
            } => {
                let code = match self.hal.set_ext_listen(true, *period_ms, *interval_ms) {
                    Ok(()) => ErrCode::Success,
                    Err(e) => {
                        warn!("Failed to start listen: {}", e);
                        ErrCode::Failed
                    }
                };
                self.action_result(P2pAction::StartListen, code);
            }
            P2pMessage::StopListen => {
                let code = match self.hal.set_ext_listen(false, 0, 0) {
                    Ok(()) => ErrCode::Success,
                    Err(e) => {
                        warn!("Failed to stop listen: {}", e);
                        ErrCode::Failed
                    }
                };
                self.action_result(P2pAction::StopListen, code);
            }
            P2pMessage::DeleteGroup(network_id) => {
                let code = self.delete_group(*network_id);
                self.action_result(P2pAction::DeleteGroup, code);
            }
            P2pMessage::RemoveGroup => {
                let code = self.remove_current_group();
                self.action_result(P2pAction::RemoveGroup, code);
            }

            // 以下命令在当前阶段不可执行
            P2pMessage::Connect { config, reply } => {
                let code = match check_config_usable(config, &self.devices) {
                    Err(code) => ErrCode::Config(code),
                    Ok(_) => ErrCode::Busy,
                };
                reply.send(code);
                self.action_result(P2pAction::Connect, code);
            }
            P2pMessage::CreateGroup(_) | P2pMessage::Invite(_) => {
                let action = command_action(msg).unwrap_or(P2pAction::CreateGroup);
                self.action_result(action, ErrCode::Busy);
            }
            P2pMessage::CancelConnect => {
                self.action_result(P2pAction::CancelConnect, ErrCode::Failed);
            }

            P2pMessage::UserAccept | P2pMessage::UserReject | P2pMessage::UserConfirm(_) => {
                debug!("No pending request for user answer {:?}", msg);
            }
            P2pMessage::Dhcp(_)
            | P2pMessage::GroupReady
            | P2pMessage::DhcpTimeout
            | P2pMessage::GroupFormationTimeout
            | P2pMessage::StateGuardTimeout => {
                debug!("Ignoring stale {:?}", msg);
            }
            P2pMessage::Hal(event) => {
                debug!("Ignoring supplicant event {:?}", event);
            }
            P2pMessage::Query(_) => return Outcome::NotHandled,
        }
        Outcome::Handled
    }

    // ------------------------------------------------------------------
    // 服务发现
    // ------------------------------------------------------------------

    fn discover_services(&mut self) -> ErrCode {
        self.cancel_service_query();
        if !self.discovering {
            self.start_discovery();
        }
        let tlvs = match self.services.request_tlvs_hex() {
            Ok(tlvs) => tlvs,
            Err(e) => {
                warn!("Failed to encode service requests: {}", e);
                return ErrCode::InvalidParam;
            }
        };
        match self.hal.serv_disc_req(MacAddress::ZERO, &tlvs) {
            Ok(id) => {
                debug!("Service discovery query {} started", id);
                self.services.set_query_id(Some(id));
                ErrCode::Success
            }
            Err(e) => {
                warn!("Failed to start service discovery: {}", e);
                ErrCode::Failed
            }
        }
    }

    /// 取消进行中的查询
    fn cancel_service_query(&mut self) {
        if let Some(id) = self.services.take_query_id()
            && let Err(e) = self.hal.serv_disc_cancel_req(&id)
        {
            warn!("Failed to cancel service query {}: {}", id, e);
        }
    }

    /// 解析对端的服务发现响应
    ///
    /// 整个 blob 或单个响应解析失败时丢弃，不修改任何表。
    fn handle_service_response(&mut self, peer: MacAddress, tlvs: &str) {
        let responses = match ServiceResponse::parse_hex(peer, tlvs) {
            Ok(responses) => responses,
            Err(e) => {
                warn!("Discarding malformed service response from {}: {}", peer, e);
                return;
            }
        };

        let source = {
            let known = self.devices.get_device(peer);
            if known.is_valid() {
                known
            } else {
                PeerDevice::new(peer, "")
            }
        };

        let mut changed = false;
        for response in responses {
            let parsed = match response.decode() {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(
                        "Discarding {:?} response from {}: {}",
                        response.protocol, peer, e
                    );
                    continue;
                }
            };
            if !self.services.add_response(response.clone()) {
                continue;
            }
            changed = true;

            self.broadcast(P2pEvent::ServiceAvailable {
                protocol: response.protocol,
                data: response.data,
                source: source.clone(),
            });
            match parsed {
                ParsedService::DnsSd(dns) if dns.dns_type == DNS_TYPE_PTR => {
                    self.broadcast(P2pEvent::DnsSdServiceAvailable {
                        registration_type: dns.registration_type().to_string(),
                        instance_name: dns.instance_name.unwrap_or_default(),
                        source: source.clone(),
                    });
                }
                ParsedService::DnsSd(dns) => {
                    self.broadcast(P2pEvent::DnsSdTxtRecordAvailable {
                        full_domain_name: dns.query_name,
                        txt_record: dns.txt_record,
                        source: source.clone(),
                    });
                }
                ParsedService::Upnp(upnp) => {
                    self.broadcast(P2pEvent::UpnpServiceAvailable {
                        unique_service_names: upnp.unique_service_names,
                        source: source.clone(),
                    });
                }
                ParsedService::Generic => {}
            }
        }
        if changed {
            self.broadcast(P2pEvent::ServicesChanged);
        }
    }

    fn put_local_service(&mut self, info: ServiceInfo) -> ErrCode {
        if self.services.local_services().contains(&info) {
            return ErrCode::InvalidParam;
        }
        for (index, entry) in info.entries.iter().enumerate() {
            if let Err(e) = self.hal.service_add(entry) {
                warn!("Failed to add local service: {}", e);
                for added in &info.entries[..index] {
                    if let Err(e) = self.hal.service_del(added) {
                        warn!("Failed to roll back local service: {}", e);
                    }
                }
                return ErrCode::Failed;
            }
        }
        self.services.add_local_service(info);
        ErrCode::Success
    }

    fn delete_local_service(&mut self, info: &ServiceInfo) -> ErrCode {
        if !self.services.remove_local_service(info) {
            return ErrCode::InvalidParam;
        }
        let mut code = ErrCode::Success;
        for entry in &info.entries {
            if let Err(e) = self.hal.service_del(entry) {
                warn!("Failed to delete local service: {}", e);
                code = ErrCode::Failed;
            }
        }
        code
    }

    // ------------------------------------------------------------------
    // 其他命令
    // ------------------------------------------------------------------

    fn set_device_name(&mut self, name: &str) -> ErrCode {
        if name.is_empty() {
            return ErrCode::InvalidParam;
        }
        if let Err(e) = self.hal.set_device_name(name) {
            warn!("Failed to set device name: {}", e);
            return ErrCode::Failed;
        }
        info!("Device name set to {}", name);
        self.settings.device_name = name.to_string();
        self.devices.this_device_mut().device_name = name.to_string();
        self.broadcast_this_device();
        ErrCode::Success
    }

    fn delete_group(&mut self, network_id: i32) -> ErrCode {
        let hal_result = self.hal.remove_network(network_id);
        if let Err(e) = &hal_result {
            warn!("Failed to remove network {}: {}", network_id, e);
        }
        if let Err(e) = self.hal.save_config() {
            warn!("Failed to save supplicant config: {}", e);
        }
        let removed = self.groups.remove_group(network_id).is_some();
        if removed {
            info!("Deleted persistent group {}", network_id);
            self.stash_groups();
            self.broadcast_groups();
        }
        if removed || hal_result.is_ok() {
            ErrCode::Success
        } else {
            ErrCode::Failed
        }
    }

    /// 请求 HAL 删除当前组；完成通过 `P2P-GROUP-REMOVED` 事件通知
    fn remove_current_group(&mut self) -> ErrCode {
        let Some(interface) = self.groups.current_group().map(|g| g.interface.clone()) else {
            return ErrCode::Failed;
        };
        match self.hal.remove_group(&interface) {
            Ok(()) => ErrCode::Success,
            Err(e) => {
                warn!("Failed to remove group {}: {}", interface, e);
                ErrCode::Failed
            }
        }
    }
}
