//! WiFi P2P Core Library
//!
//! Wi-Fi Direct 控制面的核心实现：层次状态机驱动的连接流程，对端设备、
//! 组和服务发现的管理，以及服务发现协议的编解码。
//!
//! # 模块
//!
//! - **hsm**: 通用层次状态机和消息队列、定时器
//! - **state_machine**: P2P 状态机，所有流程的串行执行点
//! - **manager**: 对端设备、持久组、服务请求的表
//! - **service**: DNS-SD / UPnP / TXT 记录编解码
//! - **hal**: wpa_supplicant 抽象和 `wpa_cli` 实现
//! - **dhcp**: GO 侧 DHCP 服务器和 GC 侧 DHCP 客户端
//! - **store**: 持久组和连接状态的持久化
//!
//! # 使用示例
//!
//! ```ignore
//! use wifip2p_core::{AppSettings, Backends, EventBroadcaster, P2pStateMachine, hsm};
//!
//! let settings = AppSettings::load();
//! let (sender, receiver) = hsm::channel();
//! let backends = Backends {
//!     hal: Box::new(WpaCliHal::new(&settings.p2p_interface)
//!         .with_event_sink(hal_event_sink(&sender))),
//!     dhcp: Box::new(ProcessDhcp::new()),
//!     store: Box::new(FileStore::new(&settings.state_file)),
//! };
//! let (handle, worker) =
//!     P2pStateMachine::spawn(settings, backends, sender, receiver, EventBroadcaster::default())?;
//!
//! handle.enable();
//! handle.discover_peers();
//! let peers = handle.devices().await;
//! ```

pub mod config;
pub mod dhcp;
pub mod event;
pub mod hal;
pub mod hsm;
pub mod logging;
pub mod manager;
pub mod service;
pub mod state_machine;
pub mod store;
pub mod types;

pub use config::AppSettings;
pub use event::{EventBroadcaster, P2pEvent, PromptKind};
pub use logging::LogLevel;

// State machine re-exports
pub use state_machine::{
    Backends, P2pHandle, P2pMessage, P2pState, P2pStateMachine, Query, hal_event_sink,
};

// Backend re-exports
pub use dhcp::{DhcpService, ProcessDhcp};
pub use hal::{HalEvent, P2pHal, WpaCliHal};
pub use store::{FileStore, MemoryStore, P2pStore};

// Service re-exports
pub use service::{ServiceInfo, ServiceRequest, ServiceResponse, ServiceType};

pub use types::{
    ConnectionConfig, ConnectionInfo, ErrCode, GroupInfo, GroupOwnerBand, MacAddress, P2pAction,
    P2pConfigErrCode, P2pDeviceStatus, PeerDevice, WpsInfo, WpsMethod,
};
