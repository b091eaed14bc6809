//! WiFi P2P Daemon
//!
//! 后台守护进程，负责：
//! - 运行 P2P 状态机工作任务
//! - 通过 wpa_cli 监视 wpa_supplicant 事件
//! - 通过 Unix Socket 与 CLI 通信

mod ipc;
mod service;

use anyhow::Result;
use tracing_subscriber::EnvFilter;
use wifip2p_core::AppSettings;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = AppSettings::load();

    // 桥接 log crate（wifip2p-core 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(settings.log_level.filter_directive())),
        )
        .try_init();

    tracing::info!("WiFi P2P daemon starting...");

    let mut service = service::P2pService::start(settings)?;
    let handle = service.handle();
    handle.enable();

    let mut ipc_handle = tokio::spawn(ipc::run_ipc_server(handle));

    tokio::select! {
        res = &mut ipc_handle => {
            tracing::error!("IPC server exited: {:?}", res);
        }
        res = service.wait() => {
            tracing::error!("State machine exited: {:?}", res);
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl-C, shutting down");
        }
    }

    ipc_handle.abort();
    service.shutdown().await;
    let _ = std::fs::remove_file(ipc::socket_path());

    Ok(())
}
