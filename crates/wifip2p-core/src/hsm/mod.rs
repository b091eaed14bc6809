//! 通用分层状态机 (HSM)
//!
//! 状态组织成一棵树：每个状态注册时声明父状态（根状态的父为 `None`）。
//!
//! # 消息分发
//!
//! 消息先交给当前叶子状态处理；返回 [`Outcome::NotHandled`] 时冒泡到父状态，
//! 直到根状态。根状态也不处理的消息会被丢弃并记录日志。
//!
//! # 状态切换
//!
//! 处理函数返回 [`Outcome::Transition`] 请求切换。状态机先从旧叶子向上依次
//! `exit`，直到（不含）公共祖先，再从公共祖先向下依次 `enter` 到新叶子。
//!
//! 所有处理函数在同一个工作上下文中严格串行执行，这是保护管理器数据的唯一手段。

mod queue;

pub use queue::{MessageSender, TimerHandle, Timers, channel};

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use log::{debug, info, warn};
use tokio::sync::mpsc;

/// 状态机错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HsmError {
    #[error("State {0} is already registered")]
    DuplicateState(String),

    #[error("Parent {parent} of state {state} is not registered")]
    UnknownParent { state: String, parent: String },

    #[error("State {0} is not registered")]
    UnknownState(String),

    #[error("No initial state set")]
    NoInitialState,

    #[error("State machine already started")]
    AlreadyStarted,
}

/// 单个状态对一条消息的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome<S> {
    /// 已处理，停止冒泡
    Handled,
    /// 未处理，交给父状态
    NotHandled,
    /// 已处理，并切换到目标叶子状态
    Transition(S),
}

/// 状态行为表
///
/// 具体状态机实现该 trait，按 `(state, message)` 分派到各自的处理函数。
pub trait StateHandler {
    type State: Copy + Eq + Hash + Debug;
    type Message: Debug;

    fn enter(&mut self, state: Self::State);

    fn exit(&mut self, state: Self::State);

    fn process(&mut self, state: Self::State, msg: &mut Self::Message) -> Outcome<Self::State>;
}

/// 状态树：父子关系 + 初始状态 + 当前叶子
#[derive(Debug, Clone)]
pub struct StateTree<S> {
    parents: HashMap<S, Option<S>>,
    first: Option<S>,
    current: Option<S>,
}

impl<S> Default for StateTree<S> {
    fn default() -> Self {
        Self {
            parents: HashMap::new(),
            first: None,
            current: None,
        }
    }
}

impl<S: Copy + Eq + Hash + Debug> StateTree<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册状态及其父状态，父状态必须先注册
    pub fn add_state(&mut self, state: S, parent: Option<S>) -> Result<(), HsmError> {
        if self.parents.contains_key(&state) {
            return Err(HsmError::DuplicateState(format!("{state:?}")));
        }
        if let Some(p) = parent
            && !self.parents.contains_key(&p)
        {
            return Err(HsmError::UnknownParent {
                state: format!("{state:?}"),
                parent: format!("{p:?}"),
            });
        }
        self.parents.insert(state, parent);
        Ok(())
    }

    pub fn set_first_state(&mut self, state: S) -> Result<(), HsmError> {
        if !self.contains(state) {
            return Err(HsmError::UnknownState(format!("{state:?}")));
        }
        self.first = Some(state);
        Ok(())
    }

    pub fn contains(&self, state: S) -> bool {
        self.parents.contains_key(&state)
    }

    pub fn parent(&self, state: S) -> Option<S> {
        self.parents.get(&state).copied().flatten()
    }

    pub fn current(&self) -> Option<S> {
        self.current
    }

    /// 从 `state` 到根的路径（含 `state` 本身）
    pub fn path_to_root(&self, state: S) -> Vec<S> {
        let mut path = vec![state];
        let mut cursor = self.parent(state);
        while let Some(s) = cursor {
            path.push(s);
            cursor = self.parent(s);
        }
        path
    }

    /// 当前叶子是否为 `state` 或其后代
    pub fn is_in(&self, state: S) -> bool {
        self.current
            .is_some_and(|c| self.path_to_root(c).contains(&state))
    }
}

/// 分层状态机
///
/// 拥有状态树、行为表和消息队列的接收端。
pub struct StateMachine<H: StateHandler> {
    name: String,
    tree: StateTree<H::State>,
    handler: H,
    receiver: mpsc::UnboundedReceiver<H::Message>,
}

impl<H: StateHandler> StateMachine<H> {
    pub fn new(
        name: impl Into<String>,
        handler: H,
        receiver: mpsc::UnboundedReceiver<H::Message>,
    ) -> Self {
        Self {
            name: name.into(),
            tree: StateTree::new(),
            handler,
            receiver,
        }
    }

    pub fn add_state(&mut self, state: H::State, parent: Option<H::State>) -> Result<(), HsmError> {
        self.tree.add_state(state, parent)
    }

    pub fn set_first_state(&mut self, state: H::State) -> Result<(), HsmError> {
        self.tree.set_first_state(state)
    }

    /// 进入初始状态：从根到初始叶子依次 `enter`
    pub fn start(&mut self) -> Result<(), HsmError> {
        if self.tree.current.is_some() {
            return Err(HsmError::AlreadyStarted);
        }
        let first = self.tree.first.ok_or(HsmError::NoInitialState)?;

        info!("[{}] starting in {:?}", self.name, first);
        let mut path = self.tree.path_to_root(first);
        path.reverse();
        self.tree.current = Some(first);
        for state in path {
            debug!("[{}] enter {:?}", self.name, state);
            self.handler.enter(state);
        }
        Ok(())
    }

    pub fn current_state(&self) -> Option<H::State> {
        self.tree.current()
    }

    pub fn is_in(&self, state: H::State) -> bool {
        self.tree.is_in(state)
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// 处理一条消息：当前叶子 -> 父状态 -> ... -> 根
    pub fn dispatch(&mut self, mut msg: H::Message) {
        let Some(current) = self.tree.current else {
            warn!("[{}] not started, dropping {:?}", self.name, msg);
            return;
        };

        let mut cursor = Some(current);
        while let Some(state) = cursor {
            match self.handler.process(state, &mut msg) {
                Outcome::Handled => return,
                Outcome::Transition(target) => {
                    self.transition_to(target);
                    return;
                }
                Outcome::NotHandled => cursor = self.tree.parent(state),
            }
        }

        warn!(
            "[{}] {:?} not handled in {:?}, dropped",
            self.name, msg, current
        );
    }

    fn transition_to(&mut self, target: H::State) {
        let Some(current) = self.tree.current else {
            return;
        };
        if !self.tree.contains(target) {
            warn!("[{}] unknown target state {:?}", self.name, target);
            return;
        }

        let old_path = self.tree.path_to_root(current);
        let new_path = self.tree.path_to_root(target);
        let common = old_path.iter().copied().find(|s| new_path.contains(s));

        debug!(
            "[{}] transition {:?} -> {:?} (common ancestor {:?})",
            self.name, current, target, common
        );

        for state in old_path.iter().copied().take_while(|s| Some(*s) != common) {
            debug!("[{}] exit {:?}", self.name, state);
            self.handler.exit(state);
        }

        self.tree.current = Some(target);

        let to_enter: Vec<_> = new_path
            .iter()
            .copied()
            .take_while(|s| Some(*s) != common)
            .collect();
        for state in to_enter.into_iter().rev() {
            debug!("[{}] enter {:?}", self.name, state);
            self.handler.enter(state);
        }
    }

    /// 处理队列中已有的全部消息（不等待），返回处理条数
    pub fn process_pending(&mut self) -> usize {
        let mut count = 0;
        while let Ok(msg) = self.receiver.try_recv() {
            self.dispatch(msg);
            count += 1;
        }
        count
    }

    /// 工作循环：按 FIFO 顺序消费消息，直到所有发送端关闭
    pub async fn run(mut self) {
        while let Some(msg) = self.receiver.recv().await {
            self.dispatch(msg);
        }
        info!("[{}] message queue closed, worker exiting", self.name);
    }
}
