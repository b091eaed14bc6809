//! 持久组表与当前组

use crate::hal::HalNetwork;
use crate::types::{GroupInfo, MacAddress, PeerDevice};

#[derive(Debug, Default)]
pub struct GroupManager {
    groups: Vec<GroupInfo>,
    current: Option<GroupInfo>,
}

impl GroupManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从存储恢复
    pub fn with_groups(groups: Vec<GroupInfo>) -> Self {
        Self {
            groups,
            current: None,
        }
    }

    /// 按网络 ID 插入或替换
    pub fn add_group(&mut self, group: GroupInfo) {
        match self
            .groups
            .iter_mut()
            .find(|g| g.network_id == group.network_id)
        {
            Some(existing) => *existing = group,
            None => self.groups.push(group),
        }
    }

    pub fn remove_group(&mut self, network_id: i32) -> Option<GroupInfo> {
        let index = self.groups.iter().position(|g| g.network_id == network_id)?;
        Some(self.groups.remove(index))
    }

    pub fn get_group(&self, network_id: i32) -> Option<&GroupInfo> {
        self.groups.iter().find(|g| g.network_id == network_id)
    }

    pub fn groups(&self) -> Vec<GroupInfo> {
        self.groups.clone()
    }

    pub fn groups_ref(&self) -> &[GroupInfo] {
        &self.groups
    }

    pub fn current_group(&self) -> Option<&GroupInfo> {
        self.current.as_ref()
    }

    pub fn current_group_mut(&mut self) -> Option<&mut GroupInfo> {
        self.current.as_mut()
    }

    pub fn set_current_group(&mut self, group: Option<GroupInfo>) {
        self.current = group;
    }

    /// 对端曾作为 GO 的持久组
    pub fn network_id_owned_by(&self, peer: MacAddress) -> Option<i32> {
        self.groups
            .iter()
            .find(|g| !g.is_group_owner && g.owner_address() == peer)
            .map(|g| g.network_id)
    }

    /// 本机为 GO 且对端曾是客户端的持久组
    pub fn network_id_with_client(&self, peer: MacAddress) -> Option<i32> {
        self.groups
            .iter()
            .find(|g| g.is_group_owner && g.contains_client(peer))
            .map(|g| g.network_id)
    }

    /// 与 HAL 网络列表按网络 ID 对齐
    ///
    /// HAL 中不存在的组被删除，HAL 中新出现的持久网络被加入。返回是否有变化。
    pub fn reconcile(&mut self, networks: &[HalNetwork], this_address: MacAddress) -> bool {
        let persistent: Vec<&HalNetwork> = networks.iter().filter(|n| n.is_persistent()).collect();

        let before = self.groups.len();
        self.groups
            .retain(|g| persistent.iter().any(|n| n.network_id == g.network_id));
        let mut changed = self.groups.len() != before;

        for network in persistent {
            if self.get_group(network.network_id).is_some() {
                continue;
            }
            let owner_address = network.bssid.unwrap_or(MacAddress::ZERO);
            self.groups.push(GroupInfo {
                network_id: network.network_id,
                group_name: network.ssid.clone(),
                owner: PeerDevice::new(owner_address, ""),
                is_group_owner: !this_address.is_zero() && owner_address == this_address,
                is_persistent: true,
                ..Default::default()
            });
            changed = true;
        }
        changed
    }
}
