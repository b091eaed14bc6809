//! P2P 组信息

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

use super::{MacAddress, PeerDevice};

pub const MIN_GROUP_NAME_LENGTH: usize = 9;
pub const MAX_GROUP_NAME_LENGTH: usize = 32;

/// 非持久组的网络 ID
pub const TEMPORARY_NET_ID: i32 = -1;

/// 组名（SSID）是否可用
pub fn is_usable_group_name(name: &str) -> bool {
    !name.is_empty() && (MIN_GROUP_NAME_LENGTH..=MAX_GROUP_NAME_LENGTH).contains(&name.len())
}

/// WPA2 口令长度 8..=63
pub fn is_usable_passphrase(passphrase: &str) -> bool {
    (8..=63).contains(&passphrase.len())
}

const NAME_CHARS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

fn random_chars(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| char::from(NAME_CHARS[rng.gen_range(0..NAME_CHARS.len())]))
        .collect()
}

/// 生成组名：`DIRECT-` 后跟两个随机字符，再接用户给的后缀
///
/// 已经以 `prefix` 开头的名字原样返回。
pub fn make_group_name(prefix: &str, name: &str) -> String {
    if name.starts_with(prefix) {
        return name.to_string();
    }
    if name.is_empty() {
        return format!("{prefix}{}", random_chars(2));
    }
    let mut full = format!("{prefix}{}-{name}", random_chars(2));
    while full.len() > MAX_GROUP_NAME_LENGTH {
        full.pop();
    }
    full
}

pub fn generate_passphrase() -> String {
    random_chars(8)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupInfo {
    pub network_id: i32,
    pub group_name: String,
    #[serde(default)]
    pub passphrase: String,
    pub owner: PeerDevice,
    #[serde(default)]
    pub clients: Vec<PeerDevice>,
    #[serde(default)]
    pub interface: String,
    #[serde(default)]
    pub frequency: u32,
    #[serde(default)]
    pub go_ip_address: Option<Ipv4Addr>,
    /// 本设备是否为 GO
    #[serde(default)]
    pub is_group_owner: bool,
    pub is_persistent: bool,
}

impl GroupInfo {
    pub fn owner_address(&self) -> MacAddress {
        self.owner.device_address
    }

    pub fn add_client(&mut self, device: PeerDevice) {
        if let Some(existing) = self.clients.iter_mut().find(|c| **c == device) {
            *existing = device;
        } else {
            self.clients.push(device);
        }
    }

    pub fn remove_client(&mut self, address: MacAddress) -> bool {
        let before = self.clients.len();
        self.clients.retain(|c| c.device_address != address);
        self.clients.len() != before
    }

    pub fn contains_client(&self, address: MacAddress) -> bool {
        self.clients.iter().any(|c| c.device_address == address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_name_bounds() {
        assert!(!is_usable_group_name(""));
        assert!(!is_usable_group_name("DIRECT-x"));
        assert!(is_usable_group_name("DIRECT-xy"));
        assert!(is_usable_group_name(&"a".repeat(MAX_GROUP_NAME_LENGTH)));
        assert!(!is_usable_group_name(&"a".repeat(MAX_GROUP_NAME_LENGTH + 1)));
    }

    #[test]
    fn test_group_name_length_property() {
        for len in 0..=40 {
            let name = "n".repeat(len);
            assert_eq!(
                is_usable_group_name(&name),
                (MIN_GROUP_NAME_LENGTH..=MAX_GROUP_NAME_LENGTH).contains(&len),
                "len={len}"
            );
        }
    }

    #[test]
    fn test_make_group_name() {
        assert_eq!(make_group_name("DIRECT-", "DIRECT-ab-tv"), "DIRECT-ab-tv");

        let named = make_group_name("DIRECT-", "tv");
        assert!(named.starts_with("DIRECT-"));
        assert!(named.ends_with("-tv"));
        assert_eq!(named.len(), "DIRECT-".len() + 2 + 3);

        let long = make_group_name("DIRECT-", &"x".repeat(40));
        assert_eq!(long.len(), MAX_GROUP_NAME_LENGTH);

        assert!(is_usable_group_name(&make_group_name("DIRECT-", "")));
        assert!(is_usable_passphrase(&generate_passphrase()));
    }

    #[test]
    fn test_random_chars_cover_alphabet() {
        let chars = random_chars(5000);
        assert_eq!(chars.len(), 5000);
        assert!(chars.bytes().all(|b| NAME_CHARS.contains(&b)));
        assert!(NAME_CHARS.iter().all(|b| chars.as_bytes().contains(b)));
    }

    #[test]
    fn test_clients_are_unique() {
        let mut group = GroupInfo::default();
        let peer = PeerDevice::new(MacAddress::new([2, 0, 0, 0, 0, 1]), "a");
        group.add_client(peer.clone());
        group.add_client(peer.clone());
        assert_eq!(group.clients.len(), 1);
        assert!(group.contains_client(peer.device_address));
        assert!(group.remove_client(peer.device_address));
        assert!(!group.remove_client(peer.device_address));
    }
}
