//! Core Service - 状态机工作任务与后端装配

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use wifip2p_core::state_machine::STATE_GUARD_TIMEOUT;
use wifip2p_core::{
    AppSettings, Backends, EventBroadcaster, FileStore, P2pEvent, P2pHandle, P2pStateMachine,
    ProcessDhcp, WpaCliHal, hal_event_sink, hsm,
};

/// 运行中的 P2P 服务
pub struct P2pService {
    handle: P2pHandle,
    worker: JoinHandle<()>,
}

impl P2pService {
    /// 用 `wpa_cli` HAL、进程 DHCP 和文件存储启动状态机
    pub fn start(settings: AppSettings) -> Result<Self> {
        tracing::info!(
            "Core service starting on {} as '{}'",
            settings.p2p_interface,
            settings.device_name
        );

        let (sender, receiver) = hsm::channel();
        let hal = WpaCliHal::new(&settings.p2p_interface).with_event_sink(hal_event_sink(&sender));
        let backends = Backends {
            hal: Box::new(hal),
            dhcp: Box::new(ProcessDhcp::new()),
            store: Box::new(FileStore::new(settings.state_file.clone())),
        };

        let (handle, worker) = P2pStateMachine::spawn(
            settings,
            backends,
            sender,
            receiver,
            EventBroadcaster::default(),
        )
        .context("Failed to build P2P state machine")?;

        Ok(Self { handle, worker })
    }

    pub fn handle(&self) -> P2pHandle {
        self.handle.clone()
    }

    /// 等待工作任务退出
    pub async fn wait(&mut self) -> Result<()> {
        (&mut self.worker).await.context("State machine worker failed")
    }

    /// 先尝试关闭 P2P，再停止工作任务
    pub async fn shutdown(self) {
        if self.handle.is_enabled().await == Some(true) {
            let mut events = self.handle.subscribe();
            self.handle.disable();
            let disabled = tokio::time::timeout(STATE_GUARD_TIMEOUT, async {
                while let Ok(event) = events.recv().await {
                    if matches!(event, P2pEvent::EnableStateChanged { enabled: false }) {
                        return;
                    }
                }
            })
            .await;
            if disabled.is_err() {
                tracing::warn!("P2P did not stop within {:?}", STATE_GUARD_TIMEOUT);
            }
        }
        self.worker.abort();
        tracing::info!("Core service stopped");
    }
}
