//! Inviting：重新调用持久组的邀请，以及对端发来的邀请

use log::{debug, info, warn};

use super::{P2pMessage, P2pState, P2pStateMachine};
use crate::event::PromptKind;
use crate::hal::HalEvent;
use crate::hsm::Outcome;
use crate::types::{ConnectionConfig, ErrCode, MacAddress, P2pAction, P2pDeviceStatus, WpsInfo};

/// 邀请结果：对端不认识该持久组
const INVITATION_UNKNOWN_GROUP: i32 = 8;

impl P2pStateMachine {
    pub(super) fn process_inviting(&mut self, msg: &mut P2pMessage) -> Outcome<P2pState> {
        match msg {
            P2pMessage::GroupFormationTimeout => {
                warn!("Invitation timed out");
                self.deal_group_creation_failed();
                Outcome::Transition(P2pState::Idle)
            }
            P2pMessage::CancelConnect => {
                self.deal_group_creation_failed();
                self.action_result(P2pAction::CancelConnect, ErrCode::Success);
                Outcome::Transition(P2pState::Idle)
            }
            P2pMessage::Hal(HalEvent::GroupStarted(group)) => {
                let group = std::mem::take(group);
                self.on_group_started(group);
                Outcome::Transition(P2pState::GroupFormed)
            }
            P2pMessage::Hal(
                HalEvent::GoNegFailure { .. }
                | HalEvent::GroupFormationFailure { .. }
                | HalEvent::ProvDiscFailure { .. },
            ) => {
                warn!("Group setup failed while inviting: {:?}", msg);
                self.deal_group_creation_failed();
                Outcome::Transition(P2pState::Idle)
            }
            _ => Outcome::NotHandled,
        }
    }

    // ------------------------------------------------------------------
    // InvitationRequest
    // ------------------------------------------------------------------

    pub(super) fn process_invitation_request(
        &mut self,
        msg: &mut P2pMessage,
    ) -> Outcome<P2pState> {
        let P2pMessage::Hal(HalEvent::InvitationResult { status }) = msg else {
            return Outcome::NotHandled;
        };
        if *status == 0 {
            debug!("Invitation accepted, waiting for group start");
            return Outcome::Handled;
        }

        warn!("Invitation failed (status={})", status);
        if *status == INVITATION_UNKNOWN_GROUP {
            self.update_persistent_groups();
        }

        // 退回到普通协商
        let Some(mut config) = self.saved_config.clone() else {
            self.deal_group_creation_failed();
            return Outcome::Transition(P2pState::Idle);
        };
        let Ok(address) = config.device_address.parse::<MacAddress>() else {
            self.deal_group_creation_failed();
            return Outcome::Transition(P2pState::Idle);
        };
        config.network_id = None;
        let peer = self.known_peer(address);
        match self.connect_peer(&config, &peer, false) {
            Ok(()) => {
                info!("Falling back to GO negotiation with {}", address);
                self.saved_config = Some(config);
                Outcome::Transition(P2pState::GroupNegotiation)
            }
            Err(e) => {
                warn!("Fallback connect to {} failed: {}", address, e);
                self.deal_group_creation_failed();
                Outcome::Transition(P2pState::Idle)
            }
        }
    }

    // ------------------------------------------------------------------
    // InvitationReceived
    // ------------------------------------------------------------------

    pub(super) fn enter_invitation_received(&mut self) {
        if let Some(request) = &self.pending {
            self.prompt(PromptKind::Invitation, &request.peer, None);
        }
    }

    pub(super) fn process_invitation_received(
        &mut self,
        msg: &mut P2pMessage,
    ) -> Outcome<P2pState> {
        match msg {
            P2pMessage::UserAccept => self.accept_invitation(),
            P2pMessage::UserReject => {
                if let Some(request) = &self.pending {
                    info!("User rejected invitation from {}", request.peer.device_address);
                }
                self.action_result(P2pAction::Invite, ErrCode::Rejected);
                if let Some(peer) = self.speculative_peer.take() {
                    self.devices.remove_device(peer);
                    self.broadcast_peers();
                }
                Outcome::Transition(P2pState::Idle)
            }
            _ => Outcome::NotHandled,
        }
    }

    fn accept_invitation(&mut self) -> Outcome<P2pState> {
        let Some(request) = self.pending.take() else {
            return Outcome::Transition(P2pState::Idle);
        };

        if let Some(id) = request.persistent_id.filter(|id| *id >= 0) {
            return match self.hal.group_add(true, Some(id), request.frequency) {
                Ok(()) => {
                    info!("Rejoining persistent group {} on invitation", id);
                    Outcome::Handled
                }
                Err(e) => {
                    warn!("Failed to start persistent group {}: {}", id, e);
                    self.deal_group_creation_failed();
                    Outcome::Transition(P2pState::Idle)
                }
            };
        }

        let go_address = request.go_address.unwrap_or(request.peer.device_address);
        let target = if go_address == request.peer.device_address {
            request.peer.clone()
        } else {
            self.known_peer(go_address)
        };
        let config = ConnectionConfig {
            device_address: target.device_address.to_string(),
            group_owner_intent: self.settings.go_intent,
            wps: WpsInfo::pbc(),
            band: self.settings.preferred_band,
            needs_dhcp: self.settings.needs_dhcp,
            ..Default::default()
        };
        let result = self.connect_peer(&config, &target, true);
        self.saved_config = Some(config);
        match result {
            Ok(()) => Outcome::Transition(P2pState::GroupNegotiation),
            Err(e) => {
                warn!("Failed to join group of {}: {}", go_address, e);
                self.deal_group_creation_failed();
                Outcome::Transition(P2pState::Idle)
            }
        }
    }

    /// 本机为 GO 时邀请对端加入当前组
    pub(super) fn invite_peer(&mut self, address: &str) -> ErrCode {
        let Ok(peer) = address.parse::<MacAddress>() else {
            return ErrCode::InvalidParam;
        };
        let Some(group) = self.groups.current_group() else {
            return ErrCode::Failed;
        };
        if !group.is_group_owner {
            return ErrCode::NotSupported;
        }
        let interface = group.interface.clone();
        let go_address = self.devices.this_device().device_address;
        match self.hal.invite(&interface, go_address, peer) {
            Ok(()) => {
                info!("Invited {} to {}", peer, interface);
                if self
                    .devices
                    .update_device_status(peer, P2pDeviceStatus::Invited)
                {
                    self.broadcast_peers();
                }
                ErrCode::Success
            }
            Err(e) => {
                warn!("Failed to invite {}: {}", peer, e);
                ErrCode::Failed
            }
        }
    }
}
