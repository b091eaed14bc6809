//! WiFi P2P CLI
//!
//! 命令行客户端，通过 Unix Socket 与守护进程通信

mod client;

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};

use client::{IpcRequest, IpcResponse};

#[derive(Parser)]
#[command(name = "wifip2p", version, about = "Wi-Fi Direct 控制工具")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Band {
    Auto,
    #[value(name = "2g")]
    Band2G,
    #[value(name = "5g")]
    Band5G,
}

impl Band {
    fn as_wire(self) -> &'static str {
        match self {
            Band::Auto => "Auto",
            Band::Band2G => "Band2G",
            Band::Band5G => "Band5G",
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// 查看当前状态
    Status,
    /// 开启 P2P
    Enable,
    /// 关闭 P2P
    Disable,
    /// 扫描附近设备
    Scan {
        /// 等待时间 (秒)，之后列出发现的设备
        #[arg(short, long, default_value = "10")]
        wait: u64,
    },
    /// 停止扫描
    StopScan,
    /// 列出已发现的设备
    Peers,
    /// 连接设备
    Connect {
        /// 对端设备地址
        address: String,
        /// 使用 keypad PIN 代替按钮配对
        #[arg(long)]
        pin: Option<String>,
        /// GO 意愿 (0-15)
        #[arg(long)]
        go_intent: Option<i32>,
        /// 重新调用的持久组网络 ID
        #[arg(long)]
        network_id: Option<i32>,
    },
    /// 取消正在进行的连接
    Cancel,
    /// 作为 GO 创建组
    CreateGroup {
        #[arg(long, default_value = "")]
        name: String,
        #[arg(long, default_value = "")]
        passphrase: String,
        #[arg(long, value_enum, default_value = "auto")]
        band: Band,
    },
    /// 离开当前组
    RemoveGroup,
    /// 删除持久组
    DeleteGroup { network_id: i32 },
    /// 列出持久组
    Groups,
    /// 邀请设备加入当前组
    Invite { address: String },
    /// 设置设备名称
    SetName { name: String },
    /// 发现服务
    Services {
        /// 服务类型，如 _ipp._tcp；不指定则查询全部
        #[arg(short = 't', long = "type")]
        service_type: Option<String>,
        /// 等待时间 (秒)
        #[arg(short, long, default_value = "10")]
        wait: u64,
    },
    /// 停止服务发现
    StopServices,
    /// 通告 Bonjour 服务
    AdvertiseDnssd {
        instance: String,
        service_type: String,
        /// TXT 条目 key=value，可重复
        #[arg(long = "txt")]
        txt: Vec<String>,
    },
    /// 通告 UPnP 服务
    AdvertiseUpnp {
        uuid: String,
        device_type: String,
        /// 服务 URN，可重复
        #[arg(long = "service")]
        services: Vec<String>,
    },
    /// 接受对端请求
    Accept,
    /// 拒绝对端请求
    Reject,
    /// 提交 PIN
    Confirm { pin: String },
    /// 持续输出事件
    Events,
}

fn parse_txt(entries: &[String]) -> Result<BTreeMap<String, String>> {
    entries
        .iter()
        .map(|entry| {
            let (key, value) = entry.split_once('=').unwrap_or((entry.as_str(), ""));
            if key.is_empty() {
                return Err(anyhow!("Invalid TXT entry: {entry:?}"));
            }
            Ok((key.to_string(), value.to_string()))
        })
        .collect()
}

fn print_devices(devices: &[client::DeviceInfo]) {
    if devices.is_empty() {
        println!("   未发现设备");
    }
    for (i, dev) in devices.iter().enumerate() {
        println!(
            "   [{}] {} ({}) {}",
            i, dev.device_name, dev.device_address, dev.status
        );
    }
}

async fn list_peers() -> Result<()> {
    if let IpcResponse::Peers { devices } = client::send_request(IpcRequest::Peers).await? {
        print_devices(&devices);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Status => {
            let resp = client::send_request(IpcRequest::Status).await?;
            if let IpcResponse::Status {
                enabled,
                state,
                this_device,
                connection,
                group,
            } = resp
            {
                println!("P2P: {}", if enabled { "开启" } else { "关闭" });
                println!("状态: {}", state);
                if let Some(dev) = this_device {
                    println!("本机: {} ({})", dev.device_name, dev.device_address);
                }
                println!(
                    "连接: {}{}",
                    connection.connect_state,
                    if connection.is_group_owner { " (GO)" } else { "" }
                );
                if let Some(addr) = connection.group_owner_address {
                    println!("GO 地址: {}", addr);
                }
                if let Some(group) = group {
                    println!("组: {} on {}", group.group_name, group.interface);
                    for client in &group.clients {
                        println!("   客户端: {} ({})", client.device_name, client.device_address);
                    }
                }
            }
        }
        Commands::Enable => {
            client::send_request(IpcRequest::Enable).await?;
        }
        Commands::Disable => {
            client::send_request(IpcRequest::Disable).await?;
        }
        Commands::Scan { wait } => {
            println!("🔍 扫描设备 ({}s)...", wait);
            if let IpcResponse::Ok { .. } = client::send_request(IpcRequest::Discover).await? {
                tokio::time::sleep(Duration::from_secs(wait)).await;
                list_peers().await?;
            }
        }
        Commands::StopScan => {
            client::send_request(IpcRequest::StopDiscover).await?;
        }
        Commands::Peers => list_peers().await?,
        Commands::Connect {
            address,
            pin,
            go_intent,
            network_id,
        } => {
            println!("🔗 连接: {}", address);
            client::send_request(IpcRequest::Connect {
                address,
                pin,
                go_intent,
                network_id,
            })
            .await?;
        }
        Commands::Cancel => {
            client::send_request(IpcRequest::Cancel).await?;
        }
        Commands::CreateGroup {
            name,
            passphrase,
            band,
        } => {
            client::send_request(IpcRequest::CreateGroup {
                name,
                passphrase,
                band: band.as_wire().to_string(),
            })
            .await?;
        }
        Commands::RemoveGroup => {
            client::send_request(IpcRequest::RemoveGroup).await?;
        }
        Commands::DeleteGroup { network_id } => {
            client::send_request(IpcRequest::DeleteGroup { network_id }).await?;
        }
        Commands::Groups => {
            if let IpcResponse::Groups { groups } = client::send_request(IpcRequest::Groups).await?
            {
                if groups.is_empty() {
                    println!("   没有持久组");
                }
                for group in &groups {
                    println!(
                        "   [{}] {} owner={} clients={}{}",
                        group.network_id,
                        group.group_name,
                        group.owner.device_address,
                        group.clients.len(),
                        if group.is_persistent { "" } else { " (temporary)" }
                    );
                }
            }
        }
        Commands::Invite { address } => {
            client::send_request(IpcRequest::Invite { address }).await?;
        }
        Commands::SetName { name } => {
            client::send_request(IpcRequest::SetName { name }).await?;
        }
        Commands::Services { service_type, wait } => {
            println!("🔍 发现服务 ({}s)...", wait);
            let resp = client::send_request(IpcRequest::DiscoverServices { service_type }).await?;
            if let IpcResponse::Ok { .. } = resp {
                tokio::time::sleep(Duration::from_secs(wait)).await;
                if let IpcResponse::Services { services } =
                    client::send_request(IpcRequest::Services).await?
                {
                    if services.is_empty() {
                        println!("   未发现服务");
                    }
                    for svc in &services {
                        println!(
                            "   {} {} from {} ({} bytes)",
                            svc.protocol,
                            svc.status,
                            svc.source,
                            svc.data.len()
                        );
                    }
                }
            }
        }
        Commands::StopServices => {
            client::send_request(IpcRequest::StopDiscoverServices).await?;
        }
        Commands::AdvertiseDnssd {
            instance,
            service_type,
            txt,
        } => {
            client::send_request(IpcRequest::AddDnssd {
                instance,
                service_type,
                txt: parse_txt(&txt)?,
            })
            .await?;
        }
        Commands::AdvertiseUpnp {
            uuid,
            device_type,
            services,
        } => {
            client::send_request(IpcRequest::AddUpnp {
                uuid,
                device_type,
                services,
            })
            .await?;
        }
        Commands::Accept => {
            client::send_request(IpcRequest::Accept).await?;
        }
        Commands::Reject => {
            client::send_request(IpcRequest::Reject).await?;
        }
        Commands::Confirm { pin } => {
            client::send_request(IpcRequest::Confirm { pin }).await?;
        }
        Commands::Events => {
            println!("📡 等待事件 (Ctrl-C 退出)");
            client::stream_events(|event| println!("{}", event)).await?;
        }
    }

    Ok(())
}
