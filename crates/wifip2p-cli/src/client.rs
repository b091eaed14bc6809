//! IPC Client - 与守护进程通信

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};

pub fn socket_path() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join("wifip2p.sock")
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcRequest {
    Status,
    Enable,
    Disable,
    Discover,
    StopDiscover,
    Peers,
    Connect {
        address: String,
        pin: Option<String>,
        go_intent: Option<i32>,
        network_id: Option<i32>,
    },
    Cancel,
    CreateGroup {
        name: String,
        passphrase: String,
        /// `Auto` / `Band2G` / `Band5G`
        band: String,
    },
    RemoveGroup,
    DeleteGroup {
        network_id: i32,
    },
    Groups,
    Invite {
        address: String,
    },
    SetName {
        name: String,
    },
    DiscoverServices {
        service_type: Option<String>,
    },
    StopDiscoverServices,
    Services,
    AddDnssd {
        instance: String,
        service_type: String,
        txt: BTreeMap<String, String>,
    },
    AddUpnp {
        uuid: String,
        device_type: String,
        services: Vec<String>,
    },
    Accept,
    Reject,
    Confirm {
        pin: String,
    },
    Events,
}

/// 守护进程响应，只解析 CLI 需要显示的字段
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcResponse {
    Ok {
        message: String,
    },
    Error {
        message: String,
    },
    Status {
        enabled: bool,
        state: String,
        this_device: Option<DeviceInfo>,
        connection: ConnectionSummary,
        group: Option<GroupSummary>,
    },
    Peers {
        devices: Vec<DeviceInfo>,
    },
    Groups {
        groups: Vec<GroupSummary>,
    },
    Services {
        services: Vec<ServiceSummary>,
    },
    Event {
        event: serde_json::Value,
    },
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub device_name: String,
    pub device_address: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSummary {
    pub connect_state: String,
    pub is_group_owner: bool,
    pub group_owner_address: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GroupSummary {
    pub network_id: i32,
    pub group_name: String,
    pub owner: DeviceInfo,
    #[serde(default)]
    pub clients: Vec<DeviceInfo>,
    #[serde(default)]
    pub interface: String,
    pub is_persistent: bool,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSummary {
    pub protocol: String,
    pub status: String,
    pub source: String,
    pub data: Vec<u8>,
}

async fn connect() -> Result<(BufReader<OwnedReadHalf>, OwnedWriteHalf)> {
    let path = socket_path();

    let stream = match UnixStream::connect(&path).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("❌ 无法连接到守护进程: {}", e);
            eprintln!("   请确保 wifip2p-daemon 正在运行");
            eprintln!("   运行: cargo xtask dev 或 systemctl start wifip2p");
            return Err(e.into());
        }
    };

    let (reader, writer) = stream.into_split();
    Ok((BufReader::new(reader), writer))
}

async fn write_request(writer: &mut OwnedWriteHalf, request: &IpcRequest) -> Result<()> {
    let json = serde_json::to_string(request)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    Ok(())
}

async fn read_response(reader: &mut BufReader<OwnedReadHalf>) -> Result<IpcResponse> {
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        bail!("daemon closed the connection");
    }
    Ok(serde_json::from_str(&line)?)
}

pub async fn send_request(request: IpcRequest) -> Result<IpcResponse> {
    let (mut reader, mut writer) = connect().await?;

    write_request(&mut writer, &request).await?;
    let response = read_response(&mut reader).await?;

    match &response {
        IpcResponse::Ok { message } => println!("✅ {}", message),
        IpcResponse::Error { message } => eprintln!("❌ {}", message),
        _ => {}
    }

    Ok(response)
}

/// 订阅事件并逐个交给 `on_event`，直到守护进程断开
pub async fn stream_events(mut on_event: impl FnMut(&serde_json::Value)) -> Result<()> {
    let (mut reader, mut writer) = connect().await?;
    write_request(&mut writer, &IpcRequest::Events).await?;

    loop {
        match read_response(&mut reader).await? {
            IpcResponse::Event { event } => on_event(&event),
            IpcResponse::Error { message } => bail!(message),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_json_matches_daemon() {
        let json = serde_json::to_string(&IpcRequest::DeleteGroup { network_id: 3 }).unwrap();
        assert_eq!(json, r#"{"type":"delete_group","network_id":3}"#);
    }

    #[test]
    fn test_parse_peers_response() {
        let json = r#"{"type":"peers","devices":[{"deviceName":"Phone",
            "deviceAddress":"02:00:00:00:00:10","primaryDeviceType":"",
            "secondaryDeviceType":"","wpsConfigMethods":392,"deviceCapabilities":37,
            "groupCapabilities":0,"status":"Available"}]}"#;
        let IpcResponse::Peers { devices } = serde_json::from_str(json).unwrap() else {
            panic!("expected peers");
        };
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].device_name, "Phone");
        assert_eq!(devices[0].status, "Available");
    }
}
