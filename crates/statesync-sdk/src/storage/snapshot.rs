//! 本地快照
//!
//! 快照是某一时刻本地存储的全部内容。匹配保留命名空间的键（内部簿记用）
//! 永远不会进入快照，也永远不会被 apply 写回。

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::storage::LocalStore;

/// 默认保留键模式：以 `__` 开头且以 `__` 结尾（远端文档禁止此类键名）
pub const DEFAULT_RESERVED_PATTERN: &str = r"^__.*__$";

/// 保留键判定器
#[derive(Debug, Clone)]
pub struct ReservedKeys {
    pattern: Regex,
}

impl ReservedKeys {
    pub fn new(pattern: &str) -> Result<Self> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }

    pub fn is_reserved(&self, key: &str) -> bool {
        self.pattern.is_match(key)
    }

    pub fn as_str(&self) -> &str {
        self.pattern.as_str()
    }

    /// 从存储中删除所有保留键，返回删除的数量
    ///
    /// 调用方必须传入未被拦截的原始存储，否则清理本身会触发推送。
    pub async fn purge(&self, store: &dyn LocalStore) -> Result<usize> {
        let bad: Vec<String> = store
            .keys()
            .await?
            .into_iter()
            .filter(|k| self.is_reserved(k))
            .collect();

        for key in &bad {
            store.remove(key).await?;
        }

        if !bad.is_empty() {
            info!("已清理 {} 个保留命名空间的本地键", bad.len());
        }
        Ok(bad.len())
    }
}

/// 本地快照：键 → 字符串值
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalSnapshot(BTreeMap<String, String>);

impl LocalSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// 采集当前本地存储（跳过保留键）
    pub async fn collect(store: &dyn LocalStore, reserved: &ReservedKeys) -> Result<Self> {
        let mut out = BTreeMap::new();
        for key in store.keys().await? {
            if reserved.is_reserved(&key) {
                continue;
            }
            if let Some(value) = store.get(&key).await? {
                out.insert(key, value);
            }
        }
        debug!("采集本地快照: {} 个键", out.len());
        Ok(Self(out))
    }

    /// 以快照整体替换存储内容（先清空，再逐键写入）
    ///
    /// 这是整体替换而非合并：本地独有的键会被丢弃。保留键不会写回。
    pub async fn apply_to(&self, store: &dyn LocalStore, reserved: &ReservedKeys) -> Result<()> {
        store.clear().await?;
        for (key, value) in &self.0 {
            if reserved.is_reserved(key) {
                debug!("apply 跳过保留键: {}", key);
                continue;
            }
            store.set(key, value).await?;
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        self.0.insert(key.into(), value.into());
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 序列化后的 JSON 字节数
    pub fn encoded_len(&self) -> usize {
        serde_json::to_string(&self.0).map(|s| s.len()).unwrap_or(0)
    }
}

impl From<BTreeMap<String, String>> for LocalSnapshot {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for LocalSnapshot {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
