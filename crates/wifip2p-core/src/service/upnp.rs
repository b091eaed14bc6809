//! UPnP 服务发现编解码
//!
//! 响应: `[version]` + 以 `,` 分隔的 USN 列表，可选 `';' [len][service name]` 后缀。

use super::CodecError;
use super::dnssd::SERVICE_NAME_SEPARATOR;
use super::reader::ByteReader;

/// UPnP 1.0
pub const VERSION_1_0: u8 = 0x10;

/// 查询: `[0x10][search target]`，如 `ssdp:all` 或 `urn:schemas-upnp-org:device:MediaRenderer:1`
pub fn build_request(search_target: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(search_target.len() + 1);
    out.push(VERSION_1_0);
    out.extend_from_slice(search_target.as_bytes());
    out
}

/// 本地 UPnP 服务的 USN 列表
pub fn unique_service_names(uuid: &str, device_type: &str, services: &[String]) -> Vec<String> {
    let mut names = vec![
        format!("uuid:{uuid}"),
        format!("uuid:{uuid}::upnp:rootdevice"),
        format!("uuid:{uuid}::{device_type}"),
    ];
    names.extend(services.iter().map(|s| format!("uuid:{uuid}::{s}")));
    names
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpnpResponse {
    pub version: u8,
    pub unique_service_names: Vec<String>,
    pub service_name: Option<String>,
}

impl UpnpResponse {
    pub fn parse(data: &[u8]) -> Result<Self, CodecError> {
        let (&version, rest) = data.split_first().ok_or(CodecError::Empty)?;

        let (list, suffix) = match rest.iter().position(|&b| b == SERVICE_NAME_SEPARATOR) {
            Some(i) => (&rest[..i], Some(&rest[i + 1..])),
            None => (rest, None),
        };

        let unique_service_names = if list.is_empty() {
            Vec::new()
        } else {
            String::from_utf8_lossy(list)
                .split(',')
                .map(str::to_string)
                .collect()
        };

        let service_name = match suffix {
            Some(bytes) => Some(ByteReader::new(bytes).length_prefixed()?),
            None => None,
        };

        Ok(Self {
            version,
            unique_service_names,
            service_name,
        })
    }
}
