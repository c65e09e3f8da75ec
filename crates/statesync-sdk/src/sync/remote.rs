//! 远端同步适配器
//!
//! 职责边界：
//! - **RemoteStore**：外部能力，按 (collection, id) 读文档、合并写文档、提供服务端时间戳。
//! - **RemoteSyncAdapter**：只做「快照 ↔ 远端记录」的推送与拉取，不含任何门控策略。
//!
//! 远端文档形如 `{ "state": { k: v, ... }, "updated_at": <服务端时间> }`，
//! 合并写只触碰这两个字段，文档上其他顶层字段原样保留。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::{Result, StateSyncError};
use crate::storage::LocalSnapshot;

/// 文档中快照字段名
pub const STATE_FIELD: &str = "state";
/// 文档中更新时间字段名
pub const UPDATED_AT_FIELD: &str = "updated_at";

/// 远端原始文档
pub type RemoteDocument = Map<String, Value>;

/// 写入用时间戳
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimestampValue {
    /// 由服务端在写入时赋值
    ServerAssigned,
    At(DateTime<Utc>),
}

/// 合并写入的局部记录
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRecordPatch {
    pub state: LocalSnapshot,
    pub updated_at: TimestampValue,
}

/// 解析后的远端记录
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRecord {
    pub state: LocalSnapshot,
    pub updated_at: Option<DateTime<Utc>>,
    /// `state` 序列化后的字节数
    pub state_size_bytes: usize,
}

/// 拉取结果；「无记录」与「空快照」是两回事
#[derive(Debug, Clone, PartialEq)]
pub enum PullResult {
    Found(LocalSnapshot),
    NoRecord,
}

/// 远端记录摘要（诊断用，只读）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSummary {
    pub size_bytes: usize,
    pub updated_at: Option<DateTime<Utc>>,
}

/// 远端文档存储能力
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<RemoteDocument>>;

    async fn set_merged(&self, collection: &str, id: &str, patch: RemoteRecordPatch) -> Result<()>;

    /// 写入时使用的时间戳，默认交给服务端赋值
    fn server_timestamp(&self) -> TimestampValue {
        TimestampValue::ServerAssigned
    }
}

/// 远端同步适配器
#[derive(Clone)]
pub struct RemoteSyncAdapter {
    remote: Arc<dyn RemoteStore>,
    collection: String,
}

impl RemoteSyncAdapter {
    pub fn new(remote: Arc<dyn RemoteStore>, collection: impl Into<String>) -> Self {
        Self {
            remote,
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// 推送快照到身份对应的远端记录（合并写）
    ///
    /// 返回推送的字节数。调用方不能假设送达，失败时本地数据仍在，下次调度自然重试。
    pub async fn push(&self, identity_id: &str, snapshot: &LocalSnapshot) -> Result<usize> {
        let bytes = snapshot.encoded_len();
        let patch = RemoteRecordPatch {
            state: snapshot.clone(),
            updated_at: self.remote.server_timestamp(),
        };

        debug!(
            "推送快照: collection={}, id={}, keys={}, bytes={}",
            self.collection,
            identity_id,
            snapshot.len(),
            bytes
        );

        self.remote
            .set_merged(&self.collection, identity_id, patch)
            .await
            .map_err(|e| StateSyncError::Push(e.to_string()))?;

        Ok(bytes)
    }

    /// 拉取身份对应的远端记录
    pub async fn pull(&self, identity_id: &str) -> Result<PullResult> {
        match self.fetch_record(identity_id).await? {
            Some(record) => {
                info!("拉取到远端快照: id={}, keys={}", identity_id, record.state.len());
                Ok(PullResult::Found(record.state))
            }
            None => {
                info!("远端尚无记录: id={}", identity_id);
                Ok(PullResult::NoRecord)
            }
        }
    }

    /// 远端记录摘要；无记录时返回 None
    pub async fn summary(&self, identity_id: &str) -> Result<Option<RemoteSummary>> {
        Ok(self
            .fetch_record(identity_id)
            .await?
            .map(|record| RemoteSummary {
                size_bytes: record.state_size_bytes,
                updated_at: record.updated_at,
            }))
    }

    async fn fetch_record(&self, identity_id: &str) -> Result<Option<RemoteRecord>> {
        let doc = self
            .remote
            .get(&self.collection, identity_id)
            .await
            .map_err(|e| StateSyncError::Pull(e.to_string()))?;

        doc.map(|d| parse_record(&d)).transpose()
    }
}

/// 解析远端文档
///
/// - 缺少 `state` 视为空快照
/// - `state` 不是对象视为数据格式错误
/// - 非字符串的值被跳过
fn parse_record(doc: &RemoteDocument) -> Result<RemoteRecord> {
    let mut state = LocalSnapshot::new();
    let mut state_size_bytes = 2; // "{}"

    match doc.get(STATE_FIELD) {
        None | Some(Value::Null) => {}
        Some(Value::Object(map)) => {
            state_size_bytes = serde_json::to_string(map)?.len();
            for (key, value) in map {
                match value {
                    Value::String(s) => state.insert(key.clone(), s.clone()),
                    other => warn!("跳过非字符串的远端值: key={}, type={}", key, value_kind(other)),
                }
            }
        }
        Some(other) => {
            return Err(StateSyncError::Pull(format!(
                "远端 {} 字段格式错误: {}",
                STATE_FIELD,
                value_kind(other)
            )));
        }
    }

    let updated_at = doc
        .get(UPDATED_AT_FIELD)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    Ok(RemoteRecord {
        state,
        updated_at,
        state_size_bytes,
    })
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// 内存远端存储
///
/// 合并写只替换 `state` 与 `updated_at`，其他顶层字段保留；
/// `ServerAssigned` 时间戳在写入时取当前时间。
#[derive(Debug, Default)]
pub struct MemoryRemoteStore {
    documents: RwLock<HashMap<(String, String), RemoteDocument>>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 直接放入一份文档（初始化远端数据）
    pub fn insert_document(&self, collection: &str, id: &str, doc: RemoteDocument) {
        self.documents
            .write()
            .insert((collection.to_string(), id.to_string()), doc);
    }

    pub fn document(&self, collection: &str, id: &str) -> Option<RemoteDocument> {
        self.documents
            .read()
            .get(&(collection.to_string(), id.to_string()))
            .cloned()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<RemoteDocument>> {
        Ok(self.document(collection, id))
    }

    async fn set_merged(&self, collection: &str, id: &str, patch: RemoteRecordPatch) -> Result<()> {
        let state = serde_json::to_value(&patch.state)?;
        let updated_at = match patch.updated_at {
            TimestampValue::ServerAssigned => Utc::now(),
            TimestampValue::At(at) => at,
        };

        let mut documents = self.documents.write();
        let doc = documents
            .entry((collection.to_string(), id.to_string()))
            .or_default();
        doc.insert(STATE_FIELD.to_string(), state);
        doc.insert(UPDATED_AT_FIELD.to_string(), Value::String(updated_at.to_rfc3339()));
        Ok(())
    }
}
