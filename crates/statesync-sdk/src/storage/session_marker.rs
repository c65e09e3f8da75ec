//! 会话级「首次拉取已应用」标记
//!
//! 标记写在会话存储里：同一会话内脚本重新进入（页面重载）仍然可见，
//! 会话彻底结束后消失。用来保证一个会话最多触发一次重载。

use std::sync::Arc;

use crate::error::Result;
use crate::storage::LocalStore;

/// 会话存储中标记的 key
pub const FIRST_PULL_APPLIED_KEY: &str = "statesync_cloud_applied";

#[derive(Clone)]
pub struct SessionMarker {
    store: Arc<dyn LocalStore>,
}

impl SessionMarker {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }

    pub async fn is_first_pull_applied(&self) -> Result<bool> {
        Ok(self.store.get(FIRST_PULL_APPLIED_KEY).await?.is_some())
    }

    /// 标记首次拉取已应用；返回标记之前是否已经存在
    pub async fn mark_first_pull_applied(&self) -> Result<bool> {
        let existed = self.is_first_pull_applied().await?;
        if !existed {
            self.store.set(FIRST_PULL_APPLIED_KEY, "1").await?;
        }
        Ok(existed)
    }
}
