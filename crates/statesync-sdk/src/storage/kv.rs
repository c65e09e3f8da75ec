//! KV 存储模块 - 基于 sled 的本地状态存储
//!
//! 本模块提供：
//! - `LocalStore` 的持久化实现
//! - 打开数据库时的锁重试（上一个实例可能刚释放锁）
//! - 存储统计

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use sled::{Db, Tree};

use crate::error::{Result, StateSyncError};
use crate::storage::LocalStore;

/// 本地状态所在的 Tree 名称
pub const LOCAL_STATE_TREE: &str = "local_state";

/// KV 存储统计
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct KvStats {
    pub key_count: u64,
    /// 键值字节数之和
    pub payload_bytes: u64,
}

/// 基于 sled 的本地存储
#[derive(Debug, Clone)]
pub struct SledLocalStore {
    db: Arc<Db>,
    tree: Tree,
}

impl SledLocalStore {
    /// 在 `base_path/kv` 下打开（或创建）本地存储
    pub async fn open(base_path: &Path) -> Result<Self> {
        let kv_path = base_path.join("kv");

        tokio::fs::create_dir_all(&kv_path)
            .await
            .map_err(|e| StateSyncError::IO(format!("创建 KV 存储目录失败: {}", e)))?;

        // 同一进程内旧实例可能刚释放文件锁，重试多次带退避
        const MAX_OPEN_RETRIES: u32 = 8;
        const RETRY_DELAY_MS: u64 = 300;
        let mut db_opt: Option<Db> = None;
        let mut last_err: Option<sled::Error> = None;
        for attempt in 0..MAX_OPEN_RETRIES {
            match sled::open(&kv_path) {
                Ok(d) => {
                    db_opt = Some(d);
                    break;
                }
                Err(e) => {
                    let msg = format!("{}", e);
                    last_err = Some(e);
                    let is_lock = msg.contains("could not acquire lock")
                        || msg.contains("Resource temporarily unavailable")
                        || msg.contains("WouldBlock");
                    if is_lock && attempt + 1 < MAX_OPEN_RETRIES {
                        let delay_ms = RETRY_DELAY_MS * (1 << attempt);
                        tokio::time::sleep(tokio::time::Duration::from_millis(delay_ms)).await;
                    } else {
                        break;
                    }
                }
            }
        }
        let db = db_opt.ok_or_else(|| {
            StateSyncError::KvStore(
                last_err
                    .map(|e| format!("打开 sled 数据库失败: {}", e))
                    .unwrap_or_else(|| "打开 sled 数据库失败".to_string()),
            )
        })?;

        let tree = db
            .open_tree(LOCAL_STATE_TREE)
            .map_err(|e| StateSyncError::KvStore(format!("打开本地状态 Tree 失败: {}", e)))?;

        tracing::info!("本地 KV 存储已打开: {}", kv_path.display());

        Ok(Self {
            db: Arc::new(db),
            tree,
        })
    }

    /// 将脏数据刷到磁盘
    pub async fn flush(&self) -> Result<()> {
        self.db
            .flush_async()
            .await
            .map_err(|e| StateSyncError::KvStore(format!("刷盘失败: {}", e)))?;
        Ok(())
    }

    /// 获取统计信息
    pub fn get_stats(&self) -> Result<KvStats> {
        let mut stats = KvStats::default();
        for item in self.tree.iter() {
            let (key, value) =
                item.map_err(|e| StateSyncError::KvStore(format!("遍历键值对失败: {}", e)))?;
            stats.key_count += 1;
            stats.payload_bytes += (key.len() + value.len()) as u64;
        }
        Ok(stats)
    }
}

#[async_trait]
impl LocalStore for SledLocalStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let result = self
            .tree
            .get(key)
            .map_err(|e| StateSyncError::KvStore(format!("获取键值对失败: {}", e)))?;

        match result {
            Some(bytes) => {
                let value = String::from_utf8(bytes.to_vec())
                    .map_err(|e| StateSyncError::Serialization(format!("值不是合法 UTF-8: {}", e)))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.tree
            .insert(key, value.as_bytes())
            .map_err(|e| StateSyncError::KvStore(format!("设置键值对失败: {}", e)))?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.tree
            .remove(key)
            .map_err(|e| StateSyncError::KvStore(format!("删除键值对失败: {}", e)))?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.tree
            .clear()
            .map_err(|e| StateSyncError::KvStore(format!("清空本地状态失败: {}", e)))?;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for key in self.tree.iter().keys() {
            let key = key.map_err(|e| StateSyncError::KvStore(format!("遍历键失败: {}", e)))?;
            match String::from_utf8(key.to_vec()) {
                Ok(k) => keys.push(k),
                Err(_) => tracing::warn!("跳过非 UTF-8 键"),
            }
        }
        Ok(keys)
    }
}
