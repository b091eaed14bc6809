//! IPC Server - Unix Domain Socket 通信
//!
//! 每行一个 JSON 请求，每行一个 JSON 响应。`events` 请求之后该连接
//! 持续推送事件，直到客户端断开。

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use wifip2p_core::service::txt_record::TxtRecord;
use wifip2p_core::{
    ConnectionConfig, ConnectionInfo, ErrCode, GroupInfo, GroupOwnerBand, P2pAction, P2pEvent,
    P2pHandle, PeerDevice, ServiceInfo, ServiceRequest, ServiceResponse, WpsInfo, WpsMethod,
};

/// 等待 action-result 的上限，需覆盖启用/关闭的保护超时
const ACTION_TIMEOUT: Duration = Duration::from_secs(15);

pub fn socket_path() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join("wifip2p.sock")
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
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
        /// 给出时使用 keypad PIN，否则 PBC
        #[serde(default)]
        pin: Option<String>,
        #[serde(default)]
        go_intent: Option<i32>,
        /// 重新调用的持久组
        #[serde(default)]
        network_id: Option<i32>,
    },
    Cancel,
    CreateGroup {
        #[serde(default)]
        name: String,
        #[serde(default)]
        passphrase: String,
        #[serde(default)]
        band: GroupOwnerBand,
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
        /// 如 `_ipp._tcp`；为空时查询全部服务
        #[serde(default)]
        service_type: Option<String>,
    },
    StopDiscoverServices,
    Services,
    AddDnssd {
        instance: String,
        service_type: String,
        #[serde(default)]
        txt: BTreeMap<String, String>,
    },
    AddUpnp {
        uuid: String,
        device_type: String,
        #[serde(default)]
        services: Vec<String>,
    },
    Accept,
    Reject,
    Confirm {
        pin: String,
    },
    Events,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
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
        this_device: Option<PeerDevice>,
        connection: ConnectionInfo,
        group: Option<GroupInfo>,
    },
    Peers {
        devices: Vec<PeerDevice>,
    },
    Groups {
        groups: Vec<GroupInfo>,
    },
    Services {
        services: Vec<ServiceResponse>,
    },
    Event {
        event: P2pEvent,
    },
}

impl IpcResponse {
    fn ok(message: impl Into<String>) -> Self {
        IpcResponse::Ok {
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        IpcResponse::Error {
            message: message.into(),
        }
    }
}

fn stopped() -> IpcResponse {
    IpcResponse::error("P2P state machine is not running")
}

pub async fn run_ipc_server(handle: P2pHandle) -> Result<()> {
    let path = socket_path();

    // 删除旧的 socket 文件
    let _ = std::fs::remove_file(&path);

    let listener = UnixListener::bind(&path)?;
    tracing::info!("IPC server listening on {:?}", path);

    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let handle = handle.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, handle).await {
                        tracing::debug!("IPC client closed: {}", e);
                    }
                });
            }
            Err(e) => {
                tracing::warn!("Failed to accept IPC connection: {}", e);
            }
        }
    }
}

async fn write_response<W>(writer: &mut W, response: &IpcResponse) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(serde_json::to_string(response)?.as_bytes())
        .await?;
    writer.write_all(b"\n").await?;
    Ok(())
}

async fn handle_client(stream: UnixStream, handle: P2pHandle) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let request: IpcRequest = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(e) => {
                write_response(&mut writer, &IpcResponse::error(format!("Invalid request: {e}")))
                    .await?;
                line.clear();
                continue;
            }
        };
        line.clear();

        tracing::debug!("IPC request: {:?}", request);

        if request == IpcRequest::Events {
            let mut events = handle.subscribe();
            write_response(&mut writer, &IpcResponse::ok("Streaming events")).await?;
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(event) => {
                            write_response(&mut writer, &IpcResponse::Event { event }).await?;
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!("IPC event stream lagged by {} events", n);
                        }
                        Err(broadcast::error::RecvError::Closed) => return Ok(()),
                    },
                    read = reader.read_line(&mut line) => {
                        if read? == 0 {
                            return Ok(());
                        }
                        line.clear();
                    }
                }
            }
        }

        let response = dispatch(&handle, request).await;
        write_response(&mut writer, &response).await?;
    }

    Ok(())
}

/// 发送命令并等待对应的 action-result 事件
async fn run_action(
    handle: &P2pHandle,
    action: P2pAction,
    send: impl FnOnce(&P2pHandle) -> bool,
) -> IpcResponse {
    let mut events = handle.subscribe();
    if !send(handle) {
        return stopped();
    }

    let result = tokio::time::timeout(ACTION_TIMEOUT, async {
        loop {
            match events.recv().await {
                Ok(P2pEvent::ActionResult { action: a, code }) if a == action => {
                    return Some(code);
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await;

    match result {
        Ok(Some(code)) => code_response(action, code),
        Ok(None) => stopped(),
        Err(_) => IpcResponse::error(format!("{action:?} timed out")),
    }
}

fn code_response(action: P2pAction, code: ErrCode) -> IpcResponse {
    if code.is_success() {
        IpcResponse::ok(format!("{action:?} succeeded"))
    } else {
        IpcResponse::error(format!("{action:?} failed: {code:?}"))
    }
}

fn connect_config(
    address: String,
    pin: Option<String>,
    go_intent: Option<i32>,
    network_id: Option<i32>,
) -> ConnectionConfig {
    let mut config = ConnectionConfig::new(address);
    if let Some(pin) = pin {
        config.wps = WpsInfo::with_pin(WpsMethod::Keypad, pin);
    }
    if let Some(intent) = go_intent {
        config.group_owner_intent = intent;
    }
    config.network_id = network_id;
    config
}

async fn dispatch(handle: &P2pHandle, request: IpcRequest) -> IpcResponse {
    match request {
        IpcRequest::Status => status(handle).await,
        IpcRequest::Enable => run_action(handle, P2pAction::Enable, P2pHandle::enable).await,
        IpcRequest::Disable => run_action(handle, P2pAction::Disable, P2pHandle::disable).await,
        IpcRequest::Discover => {
            run_action(handle, P2pAction::DiscoverPeers, P2pHandle::discover_peers).await
        }
        IpcRequest::StopDiscover => {
            run_action(
                handle,
                P2pAction::StopDiscoverPeers,
                P2pHandle::stop_discover_peers,
            )
            .await
        }
        IpcRequest::Peers => match handle.devices().await {
            Some(devices) => IpcResponse::Peers { devices },
            None => stopped(),
        },
        IpcRequest::Connect {
            address,
            pin,
            go_intent,
            network_id,
        } => {
            let config = connect_config(address, pin, go_intent, network_id);
            let target = config.device_address.clone();
            match handle.connect(config).await {
                ErrCode::Success => IpcResponse::ok(format!("Connecting to {target}")),
                code => code_response(P2pAction::Connect, code),
            }
        }
        IpcRequest::Cancel => {
            run_action(handle, P2pAction::CancelConnect, P2pHandle::cancel_connect).await
        }
        IpcRequest::CreateGroup {
            name,
            passphrase,
            band,
        } => {
            let config = ConnectionConfig {
                group_name: name,
                passphrase,
                band,
                ..ConnectionConfig::default()
            };
            run_action(handle, P2pAction::CreateGroup, |h| h.create_group(config)).await
        }
        IpcRequest::RemoveGroup => {
            run_action(handle, P2pAction::RemoveGroup, P2pHandle::remove_group).await
        }
        IpcRequest::DeleteGroup { network_id } => {
            run_action(handle, P2pAction::DeleteGroup, |h| h.delete_group(network_id)).await
        }
        IpcRequest::Groups => match handle.groups().await {
            Some(groups) => IpcResponse::Groups { groups },
            None => stopped(),
        },
        IpcRequest::Invite { address } => {
            run_action(handle, P2pAction::Invite, |h| h.invite(address)).await
        }
        IpcRequest::SetName { name } => {
            run_action(handle, P2pAction::SetDeviceName, |h| h.set_device_name(name)).await
        }
        IpcRequest::DiscoverServices { service_type } => {
            if let Some(service_type) = service_type {
                let request = match ServiceRequest::dns_sd(Some(&service_type)) {
                    Ok(request) => request,
                    Err(e) => return IpcResponse::error(format!("Invalid service type: {e}")),
                };
                // 重复的请求会被拒绝，这里不关心
                handle.add_service_request(request);
            }
            run_action(
                handle,
                P2pAction::DiscoverServices,
                P2pHandle::discover_services,
            )
            .await
        }
        IpcRequest::StopDiscoverServices => {
            run_action(
                handle,
                P2pAction::StopDiscoverServices,
                P2pHandle::stop_discover_services,
            )
            .await
        }
        IpcRequest::Services => match handle.services().await {
            Some(services) => IpcResponse::Services { services },
            None => stopped(),
        },
        IpcRequest::AddDnssd {
            instance,
            service_type,
            txt,
        } => {
            let mut record = TxtRecord::new();
            for (key, value) in &txt {
                if let Err(e) = record.set(key, value) {
                    return IpcResponse::error(e.to_string());
                }
            }
            match ServiceInfo::dns_sd(&instance, &service_type, &record) {
                Ok(info) => {
                    run_action(handle, P2pAction::PutLocalService, |h| {
                        h.put_local_service(info)
                    })
                    .await
                }
                Err(e) => IpcResponse::error(format!("Invalid service: {e}")),
            }
        }
        IpcRequest::AddUpnp {
            uuid,
            device_type,
            services,
        } => {
            let info = ServiceInfo::upnp(&uuid, &device_type, &services);
            run_action(handle, P2pAction::PutLocalService, |h| {
                h.put_local_service(info)
            })
            .await
        }
        IpcRequest::Accept => reply(handle.accept(), "Accepted"),
        IpcRequest::Reject => reply(handle.reject(), "Rejected"),
        IpcRequest::Confirm { pin } => reply(handle.confirm_pin(pin), "PIN sent"),
        IpcRequest::Events => IpcResponse::error("Events must be requested on their own"),
    }
}

fn reply(sent: bool, message: &str) -> IpcResponse {
    if sent {
        IpcResponse::ok(message)
    } else {
        stopped()
    }
}

async fn status(handle: &P2pHandle) -> IpcResponse {
    let (Some(enabled), Some(state), Some((connection, group))) = (
        handle.is_enabled().await,
        handle.state().await,
        handle.connection().await,
    ) else {
        return stopped();
    };
    IpcResponse::Status {
        enabled,
        state: format!("{state:?}"),
        this_device: handle.this_device().await,
        connection,
        group,
    }
}
