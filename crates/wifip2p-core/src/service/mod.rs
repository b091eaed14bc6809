//! 服务发现 (Service Discovery)
//!
//! - **txt_record**: DNS-SD TXT 记录
//! - **dnssd**: Bonjour PTR/TXT 查询构造与响应解析
//! - **upnp**: UPnP 查询构造与响应解析
//!
//! 本模块还负责 wpa_supplicant 使用的 TLV 帧格式:
//!
//! ```text
//! 请求: [len lo][len hi][protocol][transaction id][query...]
//! 响应: [len lo][len hi][protocol][transaction id][status][data...]
//! ```
//!
//! `len` 为小端序，不包含自身的两个字节。

pub mod dnssd;
mod reader;
pub mod txt_record;
pub mod upnp;

use serde::{Deserialize, Serialize};

use crate::types::MacAddress;
use dnssd::DnsSdResponse;
use reader::ByteReader;
use txt_record::TxtRecord;
use upnp::UpnpResponse;

/// 编解码错误；解析失败时整个响应被丢弃
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("Truncated data: need {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("Empty payload")]
    Empty,

    #[error("Unknown compression pointer 0x{0:02x}")]
    UnknownPointer(u8),

    #[error("PTR instance name is not longer than the query name")]
    InstanceNameTooShort,

    #[error("Unsupported DNS type {0}")]
    UnsupportedDnsType(u16),

    #[error("Empty label in DNS name {0:?}")]
    EmptyLabel(String),

    #[error("Field too long: {0} bytes")]
    TooLong(usize),

    #[error("Unknown service protocol {0}")]
    UnknownProtocol(u8),

    #[error("Unknown service status {0}")]
    UnknownStatus(u8),

    #[error("Invalid TLV length {0}")]
    InvalidLength(u16),

    #[error("Invalid hex: {0}")]
    Hex(String),
}

impl From<hex::FromHexError> for CodecError {
    fn from(e: hex::FromHexError) -> Self {
        CodecError::Hex(e.to_string())
    }
}

/// 服务发现协议类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ServiceType {
    All,
    Bonjour,
    Upnp,
    WsDiscovery,
    VendorSpecific,
}

impl ServiceType {
    pub fn as_u8(self) -> u8 {
        match self {
            ServiceType::All => 0,
            ServiceType::Bonjour => 1,
            ServiceType::Upnp => 2,
            ServiceType::WsDiscovery => 3,
            ServiceType::VendorSpecific => 255,
        }
    }
}

impl TryFrom<u8> for ServiceType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ServiceType::All),
            1 => Ok(ServiceType::Bonjour),
            2 => Ok(ServiceType::Upnp),
            3 => Ok(ServiceType::WsDiscovery),
            255 => Ok(ServiceType::VendorSpecific),
            other => Err(CodecError::UnknownProtocol(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceStatus {
    Success,
    ProtocolNotAvailable,
    InfoNotAvailable,
    BadRequest,
}

impl TryFrom<u8> for ServiceStatus {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ServiceStatus::Success),
            1 => Ok(ServiceStatus::ProtocolNotAvailable),
            2 => Ok(ServiceStatus::InfoNotAvailable),
            3 => Ok(ServiceStatus::BadRequest),
            other => Err(CodecError::UnknownStatus(other)),
        }
    }
}

/// 服务发现请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRequest {
    pub protocol: ServiceType,
    pub transaction_id: u8,
    pub query: Vec<u8>,
}

impl ServiceRequest {
    pub fn new(protocol: ServiceType, query: Vec<u8>) -> Self {
        Self {
            protocol,
            transaction_id: 0,
            query,
        }
    }

    /// 查询所有协议的全部服务
    pub fn all() -> Self {
        Self::new(ServiceType::All, Vec::new())
    }

    /// Bonjour PTR 查询；`None` 查询全部 Bonjour 服务
    pub fn dns_sd(service_type: Option<&str>) -> Result<Self, CodecError> {
        let query = match service_type {
            Some(t) => dnssd::build_request(
                &dnssd::service_type_name(t),
                dnssd::DNS_TYPE_PTR,
                dnssd::VERSION_1,
            )?,
            None => Vec::new(),
        };
        Ok(Self::new(ServiceType::Bonjour, query))
    }

    /// Bonjour TXT 查询
    pub fn dns_sd_txt(instance_name: &str, service_type: &str) -> Result<Self, CodecError> {
        let name = format!("{instance_name}.{}", dnssd::service_type_name(service_type));
        let query = dnssd::build_request(&name, dnssd::DNS_TYPE_TXT, dnssd::VERSION_1)?;
        Ok(Self::new(ServiceType::Bonjour, query))
    }

    pub fn upnp(search_target: &str) -> Self {
        Self::new(ServiceType::Upnp, upnp::build_request(search_target))
    }

    /// 查询过长、长度字段放不下时返回 [`CodecError::TooLong`]
    pub fn to_tlv(&self) -> Result<Vec<u8>, CodecError> {
        let len = u16::try_from(self.query.len() + 2)
            .map_err(|_| CodecError::TooLong(self.query.len()))?;
        let mut out = Vec::with_capacity(self.query.len() + 4);
        out.extend_from_slice(&len.to_le_bytes());
        out.push(self.protocol.as_u8());
        out.push(self.transaction_id);
        out.extend_from_slice(&self.query);
        Ok(out)
    }

    /// `P2P_SERV_DISC_REQ` 使用的十六进制 TLV
    pub fn to_hex(&self) -> Result<String, CodecError> {
        self.to_tlv().map(hex::encode)
    }
}

/// 对端返回的服务发现响应（一个 TLV）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceResponse {
    pub protocol: ServiceType,
    pub status: ServiceStatus,
    pub transaction_id: u8,
    pub source: MacAddress,
    pub data: Vec<u8>,
}

/// 按协议解析后的响应内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedService {
    Generic,
    DnsSd(DnsSdResponse),
    Upnp(UpnpResponse),
}

impl ServiceResponse {
    /// 解析一个响应 blob 中的全部 TLV；任何一个畸形 TLV 都会使整个 blob 失败
    pub fn parse_tlvs(source: MacAddress, blob: &[u8]) -> Result<Vec<Self>, CodecError> {
        let mut reader = ByteReader::new(blob);
        let mut responses = Vec::new();
        while reader.remaining() > 0 {
            let len = reader.u16_le()?;
            if len < 3 {
                return Err(CodecError::InvalidLength(len));
            }
            let body = reader.take(usize::from(len))?;
            responses.push(Self {
                protocol: ServiceType::try_from(body[0])?,
                transaction_id: body[1],
                status: ServiceStatus::try_from(body[2])?,
                source,
                data: body[3..].to_vec(),
            });
        }
        Ok(responses)
    }

    pub fn parse_hex(source: MacAddress, tlvs_hex: &str) -> Result<Vec<Self>, CodecError> {
        let blob = hex::decode(tlvs_hex.trim())?;
        Self::parse_tlvs(source, &blob)
    }

    /// 按协议解析负载；非成功状态或空负载视为通用响应
    pub fn decode(&self) -> Result<ParsedService, CodecError> {
        if self.status != ServiceStatus::Success || self.data.is_empty() {
            return Ok(ParsedService::Generic);
        }
        match self.protocol {
            ServiceType::Bonjour => DnsSdResponse::parse(&self.data).map(ParsedService::DnsSd),
            ServiceType::Upnp => UpnpResponse::parse(&self.data).map(ParsedService::Upnp),
            _ => Ok(ParsedService::Generic),
        }
    }
}

/// 一条提交给 wpa_supplicant 的本地服务
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SupplicantService {
    Bonjour { query: Vec<u8>, response: Vec<u8> },
    Upnp { version: u8, usn: String },
}

impl SupplicantService {
    /// `P2P_SERVICE_ADD` 参数
    pub fn add_args(&self) -> String {
        match self {
            SupplicantService::Bonjour { query, response } => {
                format!("bonjour {} {}", hex::encode(query), hex::encode(response))
            }
            SupplicantService::Upnp { version, usn } => format!("upnp {version:x} {usn}"),
        }
    }

    /// `P2P_SERVICE_DEL` 参数
    pub fn del_args(&self) -> String {
        match self {
            SupplicantService::Bonjour { query, .. } => format!("bonjour {}", hex::encode(query)),
            SupplicantService::Upnp { version, usn } => format!("upnp {version:x} {usn}"),
        }
    }
}

/// 本机对外通告的服务
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub protocol: ServiceType,
    pub entries: Vec<SupplicantService>,
}

impl ServiceInfo {
    /// Bonjour 服务：一条 PTR 记录加一条 TXT 记录
    pub fn dns_sd(
        instance_name: &str,
        service_type: &str,
        txt: &TxtRecord,
    ) -> Result<Self, CodecError> {
        let ptr = SupplicantService::Bonjour {
            query: dnssd::build_request(
                &dnssd::service_type_name(service_type),
                dnssd::DNS_TYPE_PTR,
                dnssd::VERSION_1,
            )?,
            response: dnssd::build_ptr_rdata(instance_name)?,
        };
        let txt = SupplicantService::Bonjour {
            query: dnssd::build_request(
                &format!("{instance_name}.{}", dnssd::service_type_name(service_type)),
                dnssd::DNS_TYPE_TXT,
                dnssd::VERSION_1,
            )?,
            response: dnssd::build_txt_rdata(txt),
        };
        Ok(Self {
            protocol: ServiceType::Bonjour,
            entries: vec![ptr, txt],
        })
    }

    pub fn upnp(uuid: &str, device_type: &str, services: &[String]) -> Self {
        let entries = upnp::unique_service_names(uuid, device_type, services)
            .into_iter()
            .map(|usn| SupplicantService::Upnp {
                version: upnp::VERSION_1_0,
                usn,
            })
            .collect();
        Self {
            protocol: ServiceType::Upnp,
            entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> MacAddress {
        MacAddress::new([0x02, 0x11, 0x22, 0x33, 0x44, 0x55])
    }

    #[test]
    fn test_request_tlv() {
        let mut req = ServiceRequest::upnp("ssdp:all");
        req.transaction_id = 7;
        assert_eq!(req.to_tlv().unwrap(), b"\x0b\x00\x02\x07\x10ssdp:all");
        assert_eq!(ServiceRequest::all().to_hex().unwrap(), "02000000");
    }

    #[test]
    fn test_request_tlv_rejects_oversized_query() {
        let req = ServiceRequest::new(ServiceType::VendorSpecific, vec![0; usize::from(u16::MAX)]);
        assert_eq!(req.to_tlv(), Err(CodecError::TooLong(usize::from(u16::MAX))));

        let fits = ServiceRequest::new(ServiceType::VendorSpecific, vec![0; usize::from(u16::MAX) - 2]);
        assert_eq!(&fits.to_tlv().unwrap()[..2], &[0xff, 0xff]);
    }

    #[test]
    fn test_dns_sd_request_query() {
        let req = ServiceRequest::dns_sd(Some("_ipp._tcp")).unwrap();
        assert_eq!(req.protocol, ServiceType::Bonjour);
        assert_eq!(req.query, b"\x04_ipp\xc0\x0c\x00\x0c\x01");
        assert!(ServiceRequest::dns_sd(None).unwrap().query.is_empty());
    }

    #[test]
    fn test_parse_multiple_tlvs() {
        let ptr = dnssd::build_ptr_service_query("MyPrinter", "_ipp._tcp", None).unwrap();
        let mut blob = Vec::new();
        blob.extend_from_slice(&u16::try_from(ptr.len() + 3).unwrap().to_le_bytes());
        blob.extend_from_slice(&[1, 3, 0]);
        blob.extend_from_slice(&ptr);
        blob.extend_from_slice(&[0x03, 0x00, 0x02, 0x04, 0x01]);

        let responses = ServiceResponse::parse_tlvs(peer(), &blob).unwrap();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].transaction_id, 3);
        assert_eq!(responses[1].status, ServiceStatus::ProtocolNotAvailable);

        match responses[0].decode().unwrap() {
            ParsedService::DnsSd(resp) => {
                assert_eq!(resp.instance_name.as_deref(), Some("MyPrinter"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(responses[1].decode().unwrap(), ParsedService::Generic);
    }

    #[test]
    fn test_malformed_tlv_fails_whole_blob() {
        let blob = [0x03, 0x00, 0x01, 0x01, 0x00, 0x09, 0x00, 0x01];
        assert!(ServiceResponse::parse_tlvs(peer(), &blob).is_err());
        assert!(ServiceResponse::parse_tlvs(peer(), &[0x02, 0x00, 0x01, 0x01]).is_err());
        assert!(ServiceResponse::parse_hex(peer(), "zz").is_err());
    }

    #[test]
    fn test_local_dns_sd_service_args() {
        let mut txt = TxtRecord::new();
        txt.set("txtvers", "1").unwrap();
        let info = ServiceInfo::dns_sd("MyPrinter", "_ipp._tcp", &txt).unwrap();
        assert_eq!(info.entries.len(), 2);
        assert_eq!(
            info.entries[0].add_args(),
            "bonjour 045f697070c00c000c01 094d795072696e746572c027"
        );
        assert_eq!(info.entries[0].del_args(), "bonjour 045f697070c00c000c01");
    }

    #[test]
    fn test_local_upnp_service_args() {
        let info = ServiceInfo::upnp("1234", "urn:schemas-upnp-org:device:Printer:1", &[]);
        assert_eq!(info.entries[0].add_args(), "upnp 10 uuid:1234");
        assert_eq!(info.entries.len(), 3);
    }
}
