//! wpa_supplicant 事件解析
//!
//! 事件行形如:
//!
//! ```text
//! <3>P2P-DEVICE-FOUND 02:00:00:00:01:00 p2p_dev_addr=02:00:00:00:01:00 name='Phone' config_methods=0x188 dev_capab=0x25 group_capab=0x0
//! P2P-GROUP-STARTED p2p-wlan0-0 GO ssid="DIRECT-xy" freq=2437 passphrase="12345678" go_dev_addr=02:00:00:00:01:00 [PERSISTENT]
//! ```

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::types::{GroupInfo, MacAddress, PeerDevice, TEMPORARY_NET_ID};

static KEY_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(\w+)=(?:'([^']*)'|"([^"]*)"|(\S+))"#).unwrap());

static PRIORITY_PREFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^<\d+>").unwrap());

#[derive(Debug, Clone, PartialEq)]
pub enum HalEvent {
    /// 控制接口就绪
    SupplicantConnected,
    SupplicantTerminating,
    DeviceFound(PeerDevice),
    DeviceLost(MacAddress),
    GoNegRequest {
        peer: MacAddress,
        passwd_id: u16,
    },
    GoNegSuccess,
    GoNegFailure {
        status: i32,
    },
    GroupFormationSuccess,
    GroupFormationFailure {
        reason: String,
    },
    GroupStarted(GroupInfo),
    GroupRemoved {
        interface: String,
        is_group_owner: bool,
        reason: String,
    },
    InvitationReceived {
        source: MacAddress,
        go_address: Option<MacAddress>,
        bssid: Option<MacAddress>,
        persistent_id: Option<i32>,
        frequency: Option<u32>,
    },
    InvitationResult {
        status: i32,
    },
    ProvDiscPbcRequest(PeerDevice),
    ProvDiscPbcResponse(MacAddress),
    ProvDiscEnterPin(PeerDevice),
    ProvDiscShowPin {
        peer: PeerDevice,
        pin: String,
    },
    ProvDiscFailure {
        peer: MacAddress,
        status: i32,
    },
    FindStopped,
    ServDiscResponse {
        peer: MacAddress,
        update_indicator: u16,
        tlvs: String,
    },
    StaAuthorized(MacAddress),
    StaDeauthorized(MacAddress),
}

struct EventLine<'a> {
    positional: Vec<&'a str>,
    fields: HashMap<String, String>,
    raw: &'a str,
}

impl<'a> EventLine<'a> {
    fn parse(body: &'a str) -> Self {
        let positional = body
            .split_whitespace()
            .take_while(|token| !token.contains('='))
            .collect();
        let fields = KEY_VALUE
            .captures_iter(body)
            .filter_map(|caps| {
                let key = caps.get(1)?.as_str().to_string();
                let value = caps.get(2).or(caps.get(3)).or(caps.get(4))?;
                Some((key, value.as_str().to_string()))
            })
            .collect();
        Self {
            positional,
            fields,
            raw: body,
        }
    }

    fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    fn mac(&self, key: &str) -> Option<MacAddress> {
        self.field(key)?.parse().ok()
    }

    fn int<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.field(key)?.parse().ok()
    }

    fn positional_mac(&self, index: usize) -> Option<MacAddress> {
        self.positional.get(index)?.parse().ok()
    }

    /// 优先 `p2p_dev_addr=`，否则第一个位置参数
    fn device_address(&self) -> Option<MacAddress> {
        self.mac("p2p_dev_addr").or_else(|| self.positional_mac(1))
    }

    fn peer_device(&self) -> Option<PeerDevice> {
        let address = self.device_address()?;
        Some(device_from_fields(address, &self.fields))
    }
}

fn parse_hex<T: TryFrom<u32>>(value: Option<&str>) -> T
where
    T: Default,
{
    value
        .and_then(|v| u32::from_str_radix(v.trim_start_matches("0x"), 16).ok())
        .and_then(|v| T::try_from(v).ok())
        .unwrap_or_default()
}

fn device_from_fields(address: MacAddress, fields: &HashMap<String, String>) -> PeerDevice {
    let get = |key: &str| fields.get(key).map(String::as_str);
    PeerDevice {
        device_name: get("name")
            .or(get("device_name"))
            .unwrap_or_default()
            .to_string(),
        device_address: address,
        primary_device_type: get("pri_dev_type").unwrap_or_default().to_string(),
        secondary_device_type: get("sec_dev_type").unwrap_or_default().to_string(),
        wps_config_methods: parse_hex(get("config_methods")),
        device_capabilities: parse_hex(get("dev_capab")),
        group_capabilities: parse_hex(get("group_capab")),
        ..Default::default()
    }
}

/// 解析一行事件；不关心的事件返回 `None`
pub fn parse_event(line: &str) -> Option<HalEvent> {
    let line = PRIORITY_PREFIX.replace(line.trim(), "");
    let line: &str = &line;
    let name = line.split_whitespace().next()?;
    let ev = EventLine::parse(line);

    let event = match name {
        "P2P-DEVICE-FOUND" => HalEvent::DeviceFound(ev.peer_device()?),
        "P2P-DEVICE-LOST" => HalEvent::DeviceLost(ev.device_address()?),
        "P2P-GO-NEG-REQUEST" => HalEvent::GoNegRequest {
            peer: ev.positional_mac(1)?,
            passwd_id: ev.int("dev_passwd_id").unwrap_or_default(),
        },
        "P2P-GO-NEG-SUCCESS" => HalEvent::GoNegSuccess,
        "P2P-GO-NEG-FAILURE" => HalEvent::GoNegFailure {
            status: ev.int("status").unwrap_or(-1),
        },
        "P2P-GROUP-FORMATION-SUCCESS" => HalEvent::GroupFormationSuccess,
        "P2P-GROUP-FORMATION-FAILURE" => HalEvent::GroupFormationFailure {
            reason: ev.field("reason").unwrap_or_default().to_string(),
        },
        "P2P-GROUP-STARTED" => HalEvent::GroupStarted(group_started(&ev)?),
        "P2P-GROUP-REMOVED" => HalEvent::GroupRemoved {
            interface: (*ev.positional.get(1)?).to_string(),
            is_group_owner: ev.positional.get(2) == Some(&"GO"),
            reason: ev.field("reason").unwrap_or_default().to_string(),
        },
        "P2P-INVITATION-RECEIVED" => HalEvent::InvitationReceived {
            source: ev.mac("sa")?,
            go_address: ev.mac("go_dev_addr"),
            bssid: ev.mac("bssid"),
            persistent_id: ev.int("persistent"),
            frequency: ev.int("freq"),
        },
        "P2P-INVITATION-RESULT" => HalEvent::InvitationResult {
            status: ev.int("status").unwrap_or(-1),
        },
        "P2P-PROV-DISC-PBC-REQ" => HalEvent::ProvDiscPbcRequest(ev.peer_device()?),
        "P2P-PROV-DISC-PBC-RESP" => HalEvent::ProvDiscPbcResponse(ev.positional_mac(1)?),
        "P2P-PROV-DISC-ENTER-PIN" => HalEvent::ProvDiscEnterPin(ev.peer_device()?),
        "P2P-PROV-DISC-SHOW-PIN" => HalEvent::ProvDiscShowPin {
            peer: ev.peer_device()?,
            pin: (*ev.positional.get(2)?).to_string(),
        },
        "P2P-PROV-DISC-FAILURE" => HalEvent::ProvDiscFailure {
            peer: ev.device_address()?,
            status: ev.int("status").unwrap_or(-1),
        },
        "P2P-FIND-STOPPED" => HalEvent::FindStopped,
        "P2P-SERV-DISC-RESP" => HalEvent::ServDiscResponse {
            peer: ev.positional_mac(1)?,
            update_indicator: ev.positional.get(2)?.parse().ok()?,
            tlvs: (*ev.positional.get(3)?).to_string(),
        },
        "AP-STA-CONNECTED" => HalEvent::StaAuthorized(ev.device_address()?),
        "AP-STA-DISCONNECTED" => HalEvent::StaDeauthorized(ev.device_address()?),
        "CTRL-EVENT-TERMINATING" => HalEvent::SupplicantTerminating,
        _ => return None,
    };
    Some(event)
}

fn group_started(ev: &EventLine<'_>) -> Option<GroupInfo> {
    let interface = (*ev.positional.get(1)?).to_string();
    let is_group_owner = ev.positional.get(2) == Some(&"GO");
    let go_address = ev.mac("go_dev_addr").unwrap_or(MacAddress::ZERO);
    Some(GroupInfo {
        network_id: TEMPORARY_NET_ID,
        group_name: ev.field("ssid").unwrap_or_default().to_string(),
        passphrase: ev.field("passphrase").unwrap_or_default().to_string(),
        owner: PeerDevice::new(go_address, ""),
        clients: Vec::new(),
        interface,
        frequency: ev.int("freq").unwrap_or_default(),
        go_ip_address: None,
        is_group_owner,
        is_persistent: ev.raw.contains("[PERSISTENT]"),
    })
}

/// 解析 `P2P_PEER <addr>` 的输出
pub fn parse_peer_info(address: MacAddress, reply: &str) -> PeerDevice {
    let fields: HashMap<String, String> = reply
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();
    device_from_fields(address, &fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(s: &str) -> MacAddress {
        s.parse().unwrap()
    }

    #[test]
    fn test_device_found() {
        let line = "<3>P2P-DEVICE-FOUND 02:00:00:00:01:00 p2p_dev_addr=02:00:00:00:01:01 \
                    pri_dev_type=10-0050F204-5 name='My Phone' config_methods=0x188 \
                    dev_capab=0x25 group_capab=0x1 new=1";
        let Some(HalEvent::DeviceFound(dev)) = parse_event(line) else {
            panic!("not a device-found event");
        };
        assert_eq!(dev.device_address, mac("02:00:00:00:01:01"));
        assert_eq!(dev.device_name, "My Phone");
        assert_eq!(dev.primary_device_type, "10-0050F204-5");
        assert_eq!(dev.wps_config_methods, 0x188);
        assert_eq!(dev.device_capabilities, 0x25);
        assert!(dev.is_group_owner());
        assert!(dev.supports_pbc());
    }

    #[test]
    fn test_group_started() {
        let line = r#"P2P-GROUP-STARTED p2p-wlan0-0 client ssid="DIRECT-3F Test" freq=2437 psk=0123 go_dev_addr=02:40:61:c2:f3:b7 [PERSISTENT]"#;
        let Some(HalEvent::GroupStarted(group)) = parse_event(line) else {
            panic!("not a group-started event");
        };
        assert_eq!(group.interface, "p2p-wlan0-0");
        assert!(!group.is_group_owner);
        assert_eq!(group.group_name, "DIRECT-3F Test");
        assert_eq!(group.frequency, 2437);
        assert_eq!(group.owner_address(), mac("02:40:61:c2:f3:b7"));
        assert!(group.is_persistent);
    }

    #[test]
    fn test_group_removed_and_invitation() {
        assert_eq!(
            parse_event("P2P-GROUP-REMOVED p2p-wlan0-0 GO reason=REQUESTED"),
            Some(HalEvent::GroupRemoved {
                interface: "p2p-wlan0-0".into(),
                is_group_owner: true,
                reason: "REQUESTED".into(),
            })
        );
        assert_eq!(
            parse_event(
                "P2P-INVITATION-RECEIVED sa=02:00:00:00:00:02 go_dev_addr=02:00:00:00:00:02 \
                 bssid=02:00:00:00:00:03 persistent=1 freq=5180"
            ),
            Some(HalEvent::InvitationReceived {
                source: mac("02:00:00:00:00:02"),
                go_address: Some(mac("02:00:00:00:00:02")),
                bssid: Some(mac("02:00:00:00:00:03")),
                persistent_id: Some(1),
                frequency: Some(5180),
            })
        );
    }

    #[test]
    fn test_prov_disc_and_go_neg() {
        assert_eq!(
            parse_event("P2P-GO-NEG-REQUEST 02:00:00:00:00:02 dev_passwd_id=4 go_intent=7"),
            Some(HalEvent::GoNegRequest {
                peer: mac("02:00:00:00:00:02"),
                passwd_id: 4,
            })
        );
        let Some(HalEvent::ProvDiscShowPin { peer, pin }) = parse_event(
            "P2P-PROV-DISC-SHOW-PIN 02:00:00:00:00:02 12345670 p2p_dev_addr=02:00:00:00:00:02",
        ) else {
            panic!("not a show-pin event");
        };
        assert_eq!(peer.device_address, mac("02:00:00:00:00:02"));
        assert_eq!(pin, "12345670");
        assert_eq!(
            parse_event("P2P-PROV-DISC-PBC-RESP 02:00:00:00:00:02"),
            Some(HalEvent::ProvDiscPbcResponse(mac("02:00:00:00:00:02")))
        );
    }

    #[test]
    fn test_serv_disc_resp_and_sta() {
        assert_eq!(
            parse_event("P2P-SERV-DISC-RESP 02:00:00:00:00:02 5 0300000101"),
            Some(HalEvent::ServDiscResponse {
                peer: mac("02:00:00:00:00:02"),
                update_indicator: 5,
                tlvs: "0300000101".into(),
            })
        );
        assert_eq!(
            parse_event("AP-STA-CONNECTED 02:00:00:00:00:09 p2p_dev_addr=02:00:00:00:00:02"),
            Some(HalEvent::StaAuthorized(mac("02:00:00:00:00:02")))
        );
    }

    #[test]
    fn test_unknown_and_malformed() {
        assert_eq!(parse_event("CTRL-EVENT-SCAN-STARTED"), None);
        assert_eq!(parse_event("P2P-DEVICE-LOST p2p_dev_addr=zz"), None);
        assert_eq!(parse_event(""), None);
    }

    #[test]
    fn test_peer_info() {
        let reply = "02:00:00:00:00:02\npri_dev_type=1-0050F204-1\ndevice_name=Printer\n\
                     config_methods=0x80\ndev_capab=0x21\ngroup_capab=0x0\n";
        let dev = parse_peer_info(mac("02:00:00:00:00:02"), reply);
        assert_eq!(dev.device_name, "Printer");
        assert!(dev.is_inviteable());
        assert!(dev.is_service_discovery_supported());
    }
}
