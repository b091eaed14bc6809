//! 服务发现状态：本地服务、待发请求、对端响应

use std::collections::BTreeMap;

use crate::service::{CodecError, ServiceInfo, ServiceRequest, ServiceResponse, ServiceType};
use crate::types::MacAddress;

#[derive(Debug, Default)]
pub struct ServiceManager {
    local_services: Vec<ServiceInfo>,
    requests: Vec<ServiceRequest>,
    responses: BTreeMap<(MacAddress, ServiceType), Vec<ServiceResponse>>,
    /// wpa_supplicant 返回的进行中查询 ID
    query_id: Option<String>,
    next_transaction_id: u8,
}

impl ServiceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_local_service(&mut self, info: ServiceInfo) -> bool {
        if self.local_services.contains(&info) {
            return false;
        }
        self.local_services.push(info);
        true
    }

    pub fn remove_local_service(&mut self, info: &ServiceInfo) -> bool {
        let before = self.local_services.len();
        self.local_services.retain(|s| s != info);
        self.local_services.len() != before
    }

    pub fn local_services(&self) -> &[ServiceInfo] {
        &self.local_services
    }

    /// 加入请求并分配事务 ID（从 1 开始，回绕时跳过 0）
    ///
    /// 重复或无法编码成 TLV 的请求被拒绝。
    pub fn add_request(&mut self, mut request: ServiceRequest) -> bool {
        if request.to_tlv().is_err() {
            return false;
        }
        if self
            .requests
            .iter()
            .any(|r| r.protocol == request.protocol && r.query == request.query)
        {
            return false;
        }
        self.next_transaction_id = self.next_transaction_id.wrapping_add(1).max(1);
        request.transaction_id = self.next_transaction_id;
        self.requests.push(request);
        true
    }

    pub fn remove_request(&mut self, request: &ServiceRequest) -> bool {
        let before = self.requests.len();
        self.requests
            .retain(|r| !(r.protocol == request.protocol && r.query == request.query));
        self.requests.len() != before
    }

    pub fn requests(&self) -> &[ServiceRequest] {
        &self.requests
    }

    pub fn clear_requests(&mut self) {
        self.requests.clear();
    }

    /// 所有待发请求拼成的十六进制 TLV；没有请求时查询全部服务
    pub fn request_tlvs_hex(&self) -> Result<String, CodecError> {
        if self.requests.is_empty() {
            return ServiceRequest::all().to_hex();
        }
        self.requests.iter().map(ServiceRequest::to_hex).collect()
    }

    /// 记录响应；返回是否为新的响应
    pub fn add_response(&mut self, response: ServiceResponse) -> bool {
        let entry = self
            .responses
            .entry((response.source, response.protocol))
            .or_default();
        if entry.iter().any(|r| r.data == response.data) {
            return false;
        }
        entry.push(response);
        true
    }

    pub fn responses(&self) -> Vec<ServiceResponse> {
        self.responses.values().flatten().cloned().collect()
    }

    pub fn remove_peer(&mut self, peer: MacAddress) -> bool {
        let before = self.responses.len();
        self.responses.retain(|(source, _), _| *source != peer);
        self.responses.len() != before
    }

    pub fn clear_responses(&mut self) {
        self.responses.clear();
    }

    pub fn set_query_id(&mut self, id: Option<String>) {
        self.query_id = id;
    }

    /// 取出进行中的查询 ID，用于取消
    pub fn take_query_id(&mut self) -> Option<String> {
        self.query_id.take()
    }
}
