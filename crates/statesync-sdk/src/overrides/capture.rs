//! 覆盖值捕获
//!
//! 每个 input / change / blur 事件都把字段当前值写进 `OverrideBag`，
//! 再经由拦截存储落盘，于是捕获和普通本地写入共用同一条同步流水线。

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Result, StateSyncError};
use crate::events::{now_millis, EventManager, SyncEvent};
use crate::overrides::{FieldEvent, OverrideBag, OverrideValue};
use crate::storage::{InterceptedStore, LocalStore};
use crate::sync_state::SyncStateManager;

pub struct OverrideCapture {
    /// 以捕获延迟提示构造的拦截存储
    store: InterceptedStore,
    overrides_key: String,
    state: SyncStateManager,
    events: Arc<EventManager>,
    /// 读-改-写串行化，同一字段的事件按到达顺序覆盖
    capture_lock: tokio::sync::Mutex<()>,
}

impl OverrideCapture {
    pub fn new(
        store: InterceptedStore,
        overrides_key: impl Into<String>,
        state: SyncStateManager,
        events: Arc<EventManager>,
    ) -> Self {
        Self {
            store,
            overrides_key: overrides_key.into(),
            state,
            events,
            capture_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn overrides_key(&self) -> &str {
        &self.overrides_key
    }

    /// 捕获一次字段事件，返回被捕获字段的稳定标识
    ///
    /// 没有稳定标识的字段返回 `None`。失败只记录日志和事件，不会传回宿主的事件处理。
    pub async fn capture(&self, event: &FieldEvent) -> Option<String> {
        let key = match event.stable_key() {
            Some(key) => key.to_string(),
            None => {
                debug!("字段没有稳定标识，跳过捕获: {:?}", event.event);
                return None;
            }
        };

        match self.upsert(&key, &event.value).await {
            Ok(()) => {
                self.state.record_capture();
                self.events.emit(SyncEvent::OverrideCaptured {
                    field_key: key.clone(),
                    timestamp: now_millis(),
                });
                debug!("已捕获覆盖值: key={}", key);
                Some(key)
            }
            Err(e) => {
                warn!("捕获覆盖值失败，跳过本次: key={}, error={}", key, e);
                self.events.emit(SyncEvent::CaptureFailed {
                    error: e.to_string(),
                    timestamp: now_millis(),
                });
                None
            }
        }
    }

    /// 当前的覆盖值集合
    pub async fn current_bag(&self) -> Result<OverrideBag> {
        OverrideBag::load(&self.store, &self.overrides_key).await
    }

    async fn upsert(&self, key: &str, value: &OverrideValue) -> Result<()> {
        let _guard = self.capture_lock.lock().await;

        let mut bag = OverrideBag::load(&self.store, &self.overrides_key).await?;
        bag.upsert(key, value.clone());
        let encoded = bag
            .to_json()
            .map_err(|e| StateSyncError::Capture(format!("覆盖值序列化失败: {}", e)))?;
        self.store.set(&self.overrides_key, &encoded).await
    }
}
