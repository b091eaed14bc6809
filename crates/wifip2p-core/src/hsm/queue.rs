//! 消息队列与定时器
//!
//! HAL 事件、DHCP 回调和 API 调用都通过 [`MessageSender`] 入队，
//! 发送端只负责入队，不会接触状态机内部数据。

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// 创建状态机消息队列
pub fn channel<M>() -> (MessageSender<M>, mpsc::UnboundedReceiver<M>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MessageSender { tx }, rx)
}

/// 可克隆、线程安全的消息发送端
#[derive(Debug)]
pub struct MessageSender<M> {
    tx: mpsc::UnboundedSender<M>,
}

impl<M> Clone for MessageSender<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<M: Send + 'static> MessageSender<M> {
    /// 入队一条消息；工作线程已退出时返回 false
    pub fn send(&self, msg: impl Into<M>) -> bool {
        self.tx.send(msg.into()).is_ok()
    }

    /// 延迟入队
    ///
    /// 需要 tokio 运行时；没有运行时时不调度，返回空句柄。
    pub fn send_delayed(&self, msg: M, delay: Duration) -> TimerHandle {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime, delayed message not scheduled");
            return TimerHandle(None);
        };
        let tx = self.tx.clone();
        TimerHandle(Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(msg);
        })))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// 延迟消息句柄
#[derive(Debug)]
pub struct TimerHandle(Option<JoinHandle<()>>);

impl TimerHandle {
    pub fn cancel(self) {
        if let Some(handle) = self.0 {
            handle.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.0.as_ref().is_some_and(|h| !h.is_finished())
    }
}

/// 具名定时器集合：同名定时器重新启动时会取消旧的
pub struct Timers<K, M> {
    sender: MessageSender<M>,
    active: HashMap<K, TimerHandle>,
}

impl<K: Copy + Eq + Hash + Debug, M: Send + 'static> Timers<K, M> {
    pub fn new(sender: MessageSender<M>) -> Self {
        Self {
            sender,
            active: HashMap::new(),
        }
    }

    pub fn start(&mut self, key: K, msg: M, delay: Duration) {
        self.stop(key);
        debug!("Timer {:?} started ({:?})", key, delay);
        let handle = self.sender.send_delayed(msg, delay);
        self.active.insert(key, handle);
    }

    /// 停止定时器，返回是否有正在等待的定时器被取消
    pub fn stop(&mut self, key: K) -> bool {
        match self.active.remove(&key) {
            Some(handle) => {
                let pending = handle.is_pending();
                handle.cancel();
                if pending {
                    debug!("Timer {:?} cancelled", key);
                }
                pending
            }
            None => false,
        }
    }

    pub fn is_active(&self, key: K) -> bool {
        self.active.get(&key).is_some_and(TimerHandle::is_pending)
    }

    pub fn stop_all(&mut self) {
        for (_, handle) in self.active.drain() {
            handle.cancel();
        }
    }
}
