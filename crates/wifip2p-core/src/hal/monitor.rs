//! wpa_supplicant 事件监视器
//!
//! 以交互模式运行 `wpa_cli -i <iface>`，逐行读取未经请求的事件，
//! 解析后交给 [`HalEventSink`]。进程退出视为 supplicant 终止。

use std::process::Stdio;

use log::{debug, error, info, warn};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;

use super::{HalEvent, HalEventSink, parse_event};

pub fn spawn_monitor(interface: &str, sink: HalEventSink) -> JoinHandle<()> {
    let interface = interface.to_string();
    tokio::spawn(async move {
        let mut child = match Command::new("wpa_cli")
            .args(["-i", &interface])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                error!("Failed to spawn wpa_cli monitor: {}", e);
                sink(HalEvent::SupplicantTerminating);
                return;
            }
        };

        let Some(stdout) = child.stdout.take() else {
            error!("wpa_cli monitor has no stdout");
            sink(HalEvent::SupplicantTerminating);
            return;
        };
        // stdin 保持打开，否则 wpa_cli 读到 EOF 后退出
        let _stdin = child.stdin.take();

        info!("Event monitor attached to {}", interface);
        sink(HalEvent::SupplicantConnected);

        forward_events(BufReader::new(stdout), &sink).await;
        sink(HalEvent::SupplicantTerminating);
    })
}

/// 读到 EOF 或 `CTRL-EVENT-TERMINATING` 为止；返回转发的事件数
pub(crate) async fn forward_events<R>(reader: R, sink: &HalEventSink) -> usize
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut forwarded = 0;
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let Some(event) = parse_event(&line) else {
                    continue;
                };
                debug!("Supplicant event: {:?}", event);
                if event == HalEvent::SupplicantTerminating {
                    info!("wpa_supplicant is terminating");
                    return forwarded;
                }
                sink(event);
                forwarded += 1;
            }
            Ok(None) => {
                warn!("wpa_cli monitor closed");
                return forwarded;
            }
            Err(e) => {
                warn!("Failed to read supplicant events: {}", e);
                return forwarded;
            }
        }
    }
}
