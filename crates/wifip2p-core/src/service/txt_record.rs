//! DNS-SD TXT 记录
//!
//! 数据布局: 连续的 `[len][key]['=' value]` 块，`len` 为单字节长度前缀。
//! 值为空时整个 `=value` 部分省略。键比较不区分大小写。

use std::fmt;

/// 单条 `key=value` 的最大长度（不含长度前缀）
pub const MAX_ENTRY_LENGTH: usize = 255;

/// 整条记录编码后的长度上限（不含）
pub const MAX_RECORD_LENGTH: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TxtRecordError {
    #[error("TXT key must be non-empty and must not contain '=': {0:?}")]
    InvalidKey(String),

    #[error("TXT entry too long: key+value is {0} bytes")]
    EntryTooLong(usize),

    #[error("TXT record too long: would be {0} bytes")]
    RecordTooLong(usize),
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct TxtRecord {
    data: Vec<u8>,
}

impl TxtRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// 直接包装已编码的数据（例如从对端收到的）
    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 设置键值；同名键会在原位置被替换，保持顺序
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), TxtRecordError> {
        if key.is_empty() || key.contains('=') {
            return Err(TxtRecordError::InvalidKey(key.to_string()));
        }
        let combined = key.len() + value.len();
        if combined >= MAX_ENTRY_LENGTH {
            return Err(TxtRecordError::EntryTooLong(combined));
        }

        let entry_len = if value.is_empty() {
            key.len()
        } else {
            key.len() + 1 + value.len()
        };
        let replaced = self
            .entries()
            .find(|entry| key_matches(entry, key))
            .map_or(0, |entry| entry.len() + 1);
        let total = self.data.len() - replaced + entry_len + 1;
        if total >= MAX_RECORD_LENGTH {
            return Err(TxtRecordError::RecordTooLong(total));
        }

        let ordinal = self.remove(key).unwrap_or_else(|| self.key_count());
        let offset = self.entry_offset(ordinal);

        let mut block = Vec::with_capacity(entry_len + 1);
        // combined < 255，加上 '=' 最多 255
        block.push(entry_len as u8);
        block.extend_from_slice(key.as_bytes());
        if !value.is_empty() {
            block.push(b'=');
            block.extend_from_slice(value.as_bytes());
        }
        self.data.splice(offset..offset, block);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries()
            .find(|entry| key_matches(entry, key))
            .map(|entry| split_entry(entry).1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries().any(|entry| key_matches(entry, key))
    }

    /// 删除键，返回其序号；不存在时返回 `None`
    pub fn remove(&mut self, key: &str) -> Option<usize> {
        let mut offset = 0;
        let mut found = None;
        for (ordinal, entry) in self.entries().enumerate() {
            let block_len = entry.len() + 1;
            if key_matches(entry, key) {
                found = Some((ordinal, offset, block_len));
                break;
            }
            offset += block_len;
        }
        let (ordinal, offset, block_len) = found?;
        self.data.drain(offset..offset + block_len);
        Some(ordinal)
    }

    pub fn key_count(&self) -> usize {
        self.entries().count()
    }

    /// 按顺序解码所有条目
    pub fn iter(&self) -> impl Iterator<Item = (String, String)> + '_ {
        self.entries().map(split_entry)
    }

    /// 第 `ordinal` 个条目的字节偏移；超过条目数时为末尾
    fn entry_offset(&self, ordinal: usize) -> usize {
        self.entries()
            .take(ordinal)
            .map(|entry| entry.len() + 1)
            .sum()
    }

    /// 按长度前缀遍历；遇到越界的长度即停止
    fn entries(&self) -> impl Iterator<Item = &[u8]> + '_ {
        let mut pos = 0;
        std::iter::from_fn(move || {
            let len = usize::from(*self.data.get(pos)?);
            let entry = self.data.get(pos + 1..pos + 1 + len)?;
            pos += len + 1;
            Some(entry)
        })
    }
}

/// 拆分 `key=value`，没有 `=` 时值为空
pub(crate) fn split_entry(entry: &[u8]) -> (String, String) {
    match entry.iter().position(|&b| b == b'=') {
        Some(i) => (
            String::from_utf8_lossy(&entry[..i]).into_owned(),
            String::from_utf8_lossy(&entry[i + 1..]).into_owned(),
        ),
        None => (String::from_utf8_lossy(entry).into_owned(), String::new()),
    }
}

fn key_matches(entry: &[u8], key: &str) -> bool {
    let entry_key = match entry.iter().position(|&b| b == b'=') {
        Some(i) => &entry[..i],
        None => entry,
    };
    entry_key.eq_ignore_ascii_case(key.as_bytes())
}

impl fmt::Debug for TxtRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_layout() {
        let mut txt = TxtRecord::new();
        txt.set("txtvers", "1").unwrap();
        txt.set("flag", "").unwrap();
        assert_eq!(txt.as_bytes(), b"\x09txtvers=1\x04flag");
        assert_eq!(txt.key_count(), 2);
        assert_eq!(txt.get("flag").as_deref(), Some(""));
    }

    #[test]
    fn test_rejects_bad_keys() {
        let mut txt = TxtRecord::new();
        assert_eq!(
            txt.set("a=b", "c"),
            Err(TxtRecordError::InvalidKey("a=b".into()))
        );
        assert!(txt.set("", "c").is_err());
        assert!(txt.is_empty());
    }

    #[test]
    fn test_length_limit() {
        let mut txt = TxtRecord::new();
        let key = "k".repeat(100);
        assert_eq!(
            txt.set(&key, &"v".repeat(155)),
            Err(TxtRecordError::EntryTooLong(255))
        );
        assert!(txt.is_empty());
    }

    /// 验证整条记录达到 255 字节时拒绝写入，且不改变已有数据
    #[test]
    fn test_record_length_limit() {
        let mut txt = TxtRecord::new();
        txt.set("a", &"x".repeat(120)).unwrap();
        txt.set("b", &"y".repeat(120)).unwrap();
        assert_eq!(txt.as_bytes().len(), 246);

        assert_eq!(
            txt.set("c", "123456"),
            Err(TxtRecordError::RecordTooLong(255))
        );
        assert_eq!(txt.key_count(), 2);
        assert_eq!(txt.as_bytes().len(), 246);

        // 替换同名键时只计算差值
        txt.set("B", &"z".repeat(120)).unwrap();
        assert_eq!(txt.as_bytes().len(), 246);
        assert!(txt.set("c", "12345").is_ok());
        assert_eq!(txt.as_bytes().len(), 254);
    }

    #[test]
    fn test_replace_keeps_ordinal() {
        let mut txt = TxtRecord::new();
        txt.set("a", "1").unwrap();
        txt.set("b", "2").unwrap();
        txt.set("c", "3").unwrap();

        txt.set("B", "two").unwrap();
        txt.set("B", "again").unwrap();

        let keys: Vec<String> = txt.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["a", "B", "c"]);
        assert_eq!(txt.get("b").as_deref(), Some("again"));
        assert_eq!(txt.key_count(), 3);
    }

    #[test]
    fn test_remove_returns_ordinal() {
        let mut txt = TxtRecord::new();
        txt.set("a", "1").unwrap();
        txt.set("b", "2").unwrap();
        assert_eq!(txt.remove("B"), Some(1));
        assert_eq!(txt.remove("b"), None);
        assert_eq!(txt.remove("A"), Some(0));
        assert!(txt.is_empty());
    }

    #[test]
    fn test_set_then_read_back() {
        let pairs = [
            ("path", "/queue"),
            ("rp", "printers/lobby"),
            ("note", ""),
            ("UUID", "1b3b0f64-9b8c-4a4c-9e33-ffffffffffff"),
        ];
        for (key, value) in pairs {
            let mut txt = TxtRecord::new();
            txt.set("first", "x").unwrap();
            txt.set(key, value).unwrap();
            txt.set(key, value).unwrap();

            let decoded = TxtRecord::from_bytes(txt.as_bytes().to_vec());
            let got: Vec<(String, String)> = decoded.iter().collect();
            assert_eq!(got[1], (key.to_string(), value.to_string()));
            assert_eq!(got.len(), 2);
        }
    }

    #[test]
    fn test_truncated_bytes_stop_iteration() {
        let txt = TxtRecord::from_bytes(b"\x03a=1\x09short".to_vec());
        assert_eq!(txt.key_count(), 1);
    }
}
