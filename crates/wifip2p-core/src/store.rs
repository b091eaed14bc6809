//! 持久组与连接状态的存储

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::types::{ConnectionInfo, GroupInfo};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse store: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize store: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Store lock poisoned")]
    Poisoned,
}

/// 状态机使用的存储接口
pub trait P2pStore: Send {
    fn load_groups(&self) -> Result<Vec<GroupInfo>, StoreError>;
    fn save_groups(&self, groups: &[GroupInfo]) -> Result<(), StoreError>;
    fn load_connection(&self) -> Result<ConnectionInfo, StoreError>;
    fn save_connection(&self, info: &ConnectionInfo) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    connection: ConnectionInfo,
    #[serde(default)]
    groups: Vec<GroupInfo>,
}

/// TOML 文件存储
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<StoreDocument, StoreError> {
        if !self.path.exists() {
            return Ok(StoreDocument::default());
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(toml::from_str(&content)?)
    }

    fn write(&self, doc: &StoreDocument) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, toml::to_string_pretty(doc)?)?;
        debug!("Saved P2P state to {:?}", self.path);
        Ok(())
    }
}

impl P2pStore for FileStore {
    fn load_groups(&self) -> Result<Vec<GroupInfo>, StoreError> {
        Ok(self.read()?.groups)
    }

    fn save_groups(&self, groups: &[GroupInfo]) -> Result<(), StoreError> {
        let mut doc = self.read()?;
        doc.groups = groups.to_vec();
        self.write(&doc)
    }

    fn load_connection(&self) -> Result<ConnectionInfo, StoreError> {
        Ok(self.read()?.connection)
    }

    fn save_connection(&self, info: &ConnectionInfo) -> Result<(), StoreError> {
        let mut doc = self.read()?;
        doc.connection = *info;
        self.write(&doc)
    }
}

/// 内存存储，克隆之间共享内容
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<StoreDocument>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_groups(groups: Vec<GroupInfo>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreDocument {
                groups,
                ..Default::default()
            })),
        }
    }
}

impl P2pStore for MemoryStore {
    fn load_groups(&self) -> Result<Vec<GroupInfo>, StoreError> {
        Ok(self.inner.lock().map_err(|_| StoreError::Poisoned)?.groups.clone())
    }

    fn save_groups(&self, groups: &[GroupInfo]) -> Result<(), StoreError> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)?.groups = groups.to_vec();
        Ok(())
    }

    fn load_connection(&self) -> Result<ConnectionInfo, StoreError> {
        Ok(self.inner.lock().map_err(|_| StoreError::Poisoned)?.connection)
    }

    fn save_connection(&self, info: &ConnectionInfo) -> Result<(), StoreError> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)?.connection = *info;
        Ok(())
    }
}
