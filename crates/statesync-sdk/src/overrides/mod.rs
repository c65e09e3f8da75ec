//! 字段覆盖值
//!
//! 宿主应用自己不持久化的 UI 字段，由这里捕获进一个 `OverrideBag`，
//! 作为本地存储里的一条记录参与同步；拉取之后再回放到 UI 上。

pub mod capture;
pub mod replay;

pub use capture::OverrideCapture;
pub use replay::{OverrideReplayer, ReplayConfig, ReplayReport};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::storage::LocalStore;
use crate::ui::{FieldKind, UiEventKind};

/// 覆盖值：文本或复选框状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OverrideValue {
    Text(String),
    Flag(bool),
}

impl OverrideValue {
    /// 按字段类型转换：复选框取真值（非空文本为 true），文本框取字符串形式
    pub fn coerce_to(&self, kind: FieldKind) -> OverrideValue {
        match (kind, self) {
            (FieldKind::Checkbox, OverrideValue::Text(text)) => OverrideValue::Flag(!text.is_empty()),
            (FieldKind::Text, OverrideValue::Flag(flag)) => OverrideValue::Text(flag.to_string()),
            _ => self.clone(),
        }
    }
}

impl From<&str> for OverrideValue {
    fn from(value: &str) -> Self {
        OverrideValue::Text(value.to_string())
    }
}

impl From<String> for OverrideValue {
    fn from(value: String) -> Self {
        OverrideValue::Text(value)
    }
}

impl From<bool> for OverrideValue {
    fn from(value: bool) -> Self {
        OverrideValue::Flag(value)
    }
}

/// 稳定标识 → 覆盖值
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OverrideBag(BTreeMap<String, OverrideValue>);

impl OverrideBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&OverrideValue> {
        self.0.get(key)
    }

    /// 写入（新值完全覆盖旧值）
    pub fn upsert(&mut self, key: impl Into<String>, value: OverrideValue) {
        self.0.insert(key.into(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OverrideValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// 从本地存储读取
    ///
    /// 没有记录时返回空；记录损坏时记录告警并从空开始，不让一条坏数据卡住捕获。
    pub async fn load(store: &dyn LocalStore, key: &str) -> Result<Self> {
        match store.get(key).await? {
            None => Ok(Self::new()),
            Some(raw) => match Self::from_json(&raw) {
                Ok(bag) => Ok(bag),
                Err(e) => {
                    warn!("覆盖值记录已损坏，重新开始: key={}, error={}", key, e);
                    Ok(Self::new())
                }
            },
        }
    }
}

/// 一次 UI 字段事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldEvent {
    pub event: UiEventKind,
    pub element_id: Option<String>,
    pub name: Option<String>,
    /// 声明式 data 属性（如 `data-field`）
    pub data_field: Option<String>,
    /// 当前值（文本字段为 value，复选框为 checked）
    pub value: OverrideValue,
}

impl FieldEvent {
    pub fn new(event: UiEventKind, value: impl Into<OverrideValue>) -> Self {
        Self {
            event,
            element_id: None,
            name: None,
            data_field: None,
            value: value.into(),
        }
    }

    pub fn with_element_id(mut self, id: impl Into<String>) -> Self {
        self.element_id = Some(id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_data_field(mut self, field: impl Into<String>) -> Self {
        self.data_field = Some(field.into());
        self
    }

    /// 字段的稳定标识：元素 id，其次 name，再次 data 属性；都没有则不可捕获
    pub fn stable_key(&self) -> Option<&str> {
        [&self.element_id, &self.name, &self.data_field]
            .into_iter()
            .filter_map(|candidate| candidate.as_deref())
            .map(str::trim)
            .find(|candidate| !candidate.is_empty())
    }
}
