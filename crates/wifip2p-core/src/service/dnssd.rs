//! DNS-SD (Bonjour) 服务发现编解码
//!
//! 请求格式: `[压缩 DNS 名][type u16 BE][version]`
//!
//! 压缩规则固定：后缀 `_tcp.local.` / `local.` / `_udp.local.` 分别写为
//! 指针 `0xc00c` / `0xc011` / `0xc01c`，其余标签写成 `[len][label]`，
//! 没有命中压缩时以 `0x00` 结尾。
//!
//! 响应数据在请求之后追加：
//! - PTR: `[len][instance] 0xc027`，其中 `0x27` 指向刚解析出的查询名
//! - TXT: TXT 记录原始字节，空记录写一个 `0x00`
//!
//! 两者都可以再跟一个 `';' [len][service name]` 后缀。

use std::collections::BTreeMap;

use super::CodecError;
use super::reader::ByteReader;
use super::txt_record::{TxtRecord, split_entry};

pub const DNS_TYPE_PTR: u16 = 12;
pub const DNS_TYPE_TXT: u16 = 16;
pub const VERSION_1: u8 = 0x01;

/// 服务名后缀分隔符
pub const SERVICE_NAME_SEPARATOR: u8 = b';';

const COMPRESSION_FLAG: u8 = 0xc0;

/// 固定压缩指针表
const COMPRESSED_SUFFIXES: [(&str, u8); 3] = [
    ("_tcp.local.", 0x0c),
    ("local.", 0x11),
    ("_udp.local.", 0x1c),
];

/// 指向查询名的指针
const QUERY_NAME_POINTER: u8 = 0x27;

fn ensure_trailing_dot(name: &str) -> String {
    if name.ends_with('.') {
        name.to_string()
    } else {
        format!("{name}.")
    }
}

/// 写入压缩后的 DNS 名
pub fn compress_dns_name(name: &str, out: &mut Vec<u8>) -> Result<(), CodecError> {
    let name = ensure_trailing_dot(name);
    let mut rest = name.as_str();
    loop {
        if rest.is_empty() {
            out.push(0x00);
            return Ok(());
        }
        if let Some((_, ptr)) = COMPRESSED_SUFFIXES.iter().find(|(s, _)| *s == rest) {
            out.extend_from_slice(&[COMPRESSION_FLAG, *ptr]);
            return Ok(());
        }
        let (label, tail) = rest.split_once('.').unwrap_or((rest, ""));
        if label.is_empty() {
            return Err(CodecError::EmptyLabel(name.clone()));
        }
        push_length_prefixed(out, label.as_bytes())?;
        rest = tail;
    }
}

fn push_length_prefixed(out: &mut Vec<u8>, bytes: &[u8]) -> Result<(), CodecError> {
    let len = u8::try_from(bytes.len()).map_err(|_| CodecError::TooLong(bytes.len()))?;
    out.push(len);
    out.extend_from_slice(bytes);
    Ok(())
}

fn push_service_name(out: &mut Vec<u8>, service_name: Option<&str>) -> Result<(), CodecError> {
    if let Some(name) = service_name {
        out.push(SERVICE_NAME_SEPARATOR);
        push_length_prefixed(out, name.as_bytes())?;
    }
    Ok(())
}

/// 构造查询：压缩名 + 类型 + 版本
pub fn build_request(dns_name: &str, dns_type: u16, version: u8) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    compress_dns_name(dns_name, &mut out)?;
    out.extend_from_slice(&dns_type.to_be_bytes());
    out.push(version);
    Ok(out)
}

/// PTR 记录的 rdata: `[len][instance] 0xc027`
pub fn build_ptr_rdata(instance_name: &str) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    push_length_prefixed(&mut out, instance_name.as_bytes())?;
    out.extend_from_slice(&[COMPRESSION_FLAG, QUERY_NAME_POINTER]);
    Ok(out)
}

/// TXT 记录的 rdata，空记录为单个 `0x00`
pub fn build_txt_rdata(txt: &TxtRecord) -> Vec<u8> {
    if txt.is_empty() {
        vec![0x00]
    } else {
        txt.as_bytes().to_vec()
    }
}

/// 服务类型的 PTR 查询名，如 `_ipp._tcp` -> `_ipp._tcp.local.`
pub fn service_type_name(service_type: &str) -> String {
    format!("{}.local.", service_type.trim_end_matches('.'))
}

/// 完整的 PTR 记录: 查询 + `[len][instance] 0xc027` + 可选服务名
pub fn build_ptr_service_query(
    instance_name: &str,
    service_type: &str,
    service_name: Option<&str>,
) -> Result<Vec<u8>, CodecError> {
    let mut out = build_request(&service_type_name(service_type), DNS_TYPE_PTR, VERSION_1)?;
    out.extend(build_ptr_rdata(instance_name)?);
    push_service_name(&mut out, service_name)?;
    Ok(out)
}

/// 完整的 TXT 记录: 查询 + TXT 数据 + 可选服务名
///
/// TXT 非空且带服务名时，在 `';'` 前补一个 `0x00` 结束 TXT 条目。
pub fn build_txt_service_query(
    instance_name: &str,
    service_type: &str,
    txt: &TxtRecord,
    service_name: Option<&str>,
) -> Result<Vec<u8>, CodecError> {
    let query = format!("{instance_name}.{}", service_type_name(service_type));
    let mut out = build_request(&query, DNS_TYPE_TXT, VERSION_1)?;
    out.extend(build_txt_rdata(txt));
    if !txt.is_empty() && service_name.is_some() {
        out.push(0x00);
    }
    push_service_name(&mut out, service_name)?;
    Ok(out)
}

/// 解析后的 DNS-SD 响应
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DnsSdResponse {
    pub query_name: String,
    pub dns_type: u16,
    pub version: u8,
    /// PTR 响应的实例名
    pub instance_name: Option<String>,
    /// TXT 响应的键值
    pub txt_record: BTreeMap<String, String>,
    pub service_name: Option<String>,
}

impl DnsSdResponse {
    /// 解析响应数据；越界的长度字节返回错误，不读出边界
    pub fn parse(data: &[u8]) -> Result<Self, CodecError> {
        let mut reader = ByteReader::new(data);
        let query_name = fetch_dns_name(&mut reader, None)?;
        let dns_type = reader.u16_be()?;
        let version = reader.u8()?;

        let mut response = Self {
            query_name,
            dns_type,
            version,
            ..Default::default()
        };

        match dns_type {
            DNS_TYPE_PTR => {
                let full = fetch_dns_name(&mut reader, Some(response.query_name.as_str()))?;
                response.instance_name = Some(instance_from(&full, &response.query_name)?);
            }
            DNS_TYPE_TXT => {
                response.txt_record = read_txt_entries(&mut reader)?;
            }
            other => return Err(CodecError::UnsupportedDnsType(other)),
        }

        if reader.peek() == Some(SERVICE_NAME_SEPARATOR) {
            reader.u8()?;
            response.service_name = Some(reader.length_prefixed()?);
        }
        Ok(response)
    }

    /// 去掉 `.local.` 后的服务类型
    pub fn registration_type(&self) -> &str {
        let name = self.query_name.as_str();
        let name = match self.dns_type {
            DNS_TYPE_TXT => name.split_once('.').map_or(name, |(_, rest)| rest),
            _ => name,
        };
        name.strip_suffix(".local.").unwrap_or(name)
    }
}

/// 读取（可能被压缩的）DNS 名
///
/// `query_name` 给出时，指针 `0x27` 解析为它。
fn fetch_dns_name(reader: &mut ByteReader<'_>, query_name: Option<&str>) -> Result<String, CodecError> {
    let mut name = String::new();
    loop {
        let len = reader.u8()?;
        if len == 0x00 {
            return Ok(name);
        }
        if len & COMPRESSION_FLAG == COMPRESSION_FLAG {
            let ptr = reader.u8()?;
            let suffix = COMPRESSED_SUFFIXES
                .iter()
                .find(|(_, p)| *p == ptr)
                .map(|(s, _)| *s)
                .or(query_name.filter(|_| ptr == QUERY_NAME_POINTER))
                .ok_or(CodecError::UnknownPointer(ptr))?;
            name.push_str(suffix);
            return Ok(name);
        }
        let label = reader.take(usize::from(len))?;
        name.push_str(&String::from_utf8_lossy(label));
        name.push('.');
    }
}

fn instance_from(full: &str, query_name: &str) -> Result<String, CodecError> {
    if full.len() <= query_name.len() {
        return Err(CodecError::InstanceNameTooShort);
    }
    let cut = full.len() - query_name.len();
    let prefix = full
        .get(..cut)
        .ok_or(CodecError::InstanceNameTooShort)?;
    Ok(prefix.strip_suffix('.').unwrap_or(prefix).to_string())
}

/// TXT 条目直到 `0x00` 或数据结束
fn read_txt_entries(reader: &mut ByteReader<'_>) -> Result<BTreeMap<String, String>, CodecError> {
    let mut entries = BTreeMap::new();
    while let Some(len) = reader.peek() {
        reader.u8()?;
        if len == 0 {
            break;
        }
        let bytes = reader.take(usize::from(len))?;
        let (key, value) = split_entry(bytes);
        entries.insert(key, value);
    }
    Ok(entries)
}
