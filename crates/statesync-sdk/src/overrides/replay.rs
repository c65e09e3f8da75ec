//! 覆盖值回放
//!
//! 页面加载后分两次回放（一次较早、一次较晚），兼容异步渲染出来的组件。
//! 每个字段：写值 → 派发 input、change → 移除焦点，每一步单独捕获失败。
//! 值按字段类型转换后再写入。当前 UI 上不存在的字段跳过，不会从集合里删除。

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, StateSyncError};
use crate::events::{now_millis, EventManager, SyncEvent};
use crate::overrides::{OverrideBag, OverrideValue};
use crate::storage::LocalStore;
use crate::ui::{FieldRef, UiEventKind, UiSurface};

/// 回放时机
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// 第一次回放延迟（毫秒）
    pub early_delay_ms: u64,
    /// 第二次回放延迟（毫秒，从加载时算起）
    pub late_delay_ms: u64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            early_delay_ms: 400,
            late_delay_ms: 1200,
        }
    }
}

/// 一轮回放的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub applied: usize,
    pub skipped: usize,
}

pub struct OverrideReplayer {
    store: Arc<dyn LocalStore>,
    overrides_key: String,
    ui: Arc<dyn UiSurface>,
    events: Arc<EventManager>,
    config: ReplayConfig,
}

impl OverrideReplayer {
    pub fn new(
        store: Arc<dyn LocalStore>,
        overrides_key: impl Into<String>,
        ui: Arc<dyn UiSurface>,
        events: Arc<EventManager>,
        config: ReplayConfig,
    ) -> Self {
        Self {
            store,
            overrides_key: overrides_key.into(),
            ui,
            events,
            config,
        }
    }

    /// 立即回放一轮
    pub async fn replay(&self) -> Result<ReplayReport> {
        let bag = OverrideBag::load(self.store.as_ref(), &self.overrides_key).await?;
        let mut report = ReplayReport::default();

        for (key, value) in bag.iter() {
            let field = match self.ui.find_field(key) {
                Some(field) => field,
                None => {
                    debug!("UI 上暂无该字段，跳过回放: key={}", key);
                    report.skipped += 1;
                    continue;
                }
            };

            if self.apply_field(&field, value) {
                report.applied += 1;
            } else {
                report.skipped += 1;
            }
        }

        self.events.emit(SyncEvent::OverridesReplayed {
            applied: report.applied,
            skipped: report.skipped,
            timestamp: now_millis(),
        });
        if !bag.is_empty() {
            info!("覆盖值回放完成: applied={}, skipped={}", report.applied, report.skipped);
        }
        Ok(report)
    }

    /// 按配置的两个延迟各回放一轮（后台任务）
    pub fn replay_soon(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| StateSyncError::Runtime(format!("没有可用的 tokio 运行时: {}", e)))?;
        let me = Arc::clone(self);
        let early = Duration::from_millis(self.config.early_delay_ms);
        let late = Duration::from_millis(self.config.late_delay_ms.saturating_sub(self.config.early_delay_ms));

        Ok(runtime.spawn(async move {
            tokio::time::sleep(early).await;
            if let Err(e) = me.replay().await {
                warn!("第一次回放失败: {}", e);
            }
            tokio::time::sleep(late).await;
            if let Err(e) = me.replay().await {
                warn!("第二次回放失败: {}", e);
            }
        }))
    }

    /// 写值成功即算已回放；后续通知与失焦的失败只记录
    fn apply_field(&self, field: &FieldRef, value: &OverrideValue) -> bool {
        let written = match self.ui.write_field(field, &value.coerce_to(field.kind)) {
            Ok(()) => true,
            Err(e) => {
                warn!("回放写值失败: key={}, error={}", field.key, e);
                false
            }
        };
        for kind in [UiEventKind::Input, UiEventKind::Change] {
            if let Err(e) = self.ui.dispatch(field, kind) {
                warn!("回放派发 {:?} 失败: key={}, error={}", kind, field.key, e);
            }
        }
        if let Err(e) = self.ui.blur(field) {
            warn!("回放失焦失败: key={}, error={}", field.key, e);
        }
        written
    }
}
