//! 内置生命周期 Hook
//!
//! - `OverrideReplayHook`：界面加载后两次回放覆盖值
//! - `FlushOnHideHook`：界面隐藏时立即执行待触发的推送（仍受门控约束）

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::Result;
use crate::lifecycle::LifecycleHook;
use crate::overrides::OverrideReplayer;
use crate::sync::{FlushOutcome, FlushTrigger, SyncScheduler};

pub struct OverrideReplayHook {
    replayer: Arc<OverrideReplayer>,
    running: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl OverrideReplayHook {
    pub fn new(replayer: Arc<OverrideReplayer>) -> Self {
        Self {
            replayer,
            running: parking_lot::Mutex::new(None),
        }
    }
}

#[async_trait]
impl LifecycleHook for OverrideReplayHook {
    async fn on_ui_loaded(&self) -> Result<()> {
        let handle = self.replayer.replay_soon()?;
        // 重复的加载通知以最新一次为准
        if let Some(previous) = self.running.lock().replace(handle) {
            previous.abort();
        }
        debug!("[Replay Hook] 已安排覆盖值回放");
        Ok(())
    }

    async fn on_ui_hidden(&self) -> Result<()> {
        Ok(())
    }
}

impl Drop for OverrideReplayHook {
    fn drop(&mut self) {
        if let Some(handle) = self.running.get_mut().take() {
            handle.abort();
        }
    }
}

pub struct FlushOnHideHook {
    scheduler: Arc<SyncScheduler>,
}

impl FlushOnHideHook {
    pub fn new(scheduler: Arc<SyncScheduler>) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl LifecycleHook for FlushOnHideHook {
    async fn on_ui_loaded(&self) -> Result<()> {
        Ok(())
    }

    async fn on_ui_hidden(&self) -> Result<()> {
        if !self.scheduler.has_pending() {
            return Ok(());
        }
        info!("[Flush Hook] 界面隐藏，立即推送待触发的变更");
        if let FlushOutcome::Skipped = self.scheduler.flush_now(FlushTrigger::Scheduled).await? {
            debug!("[Flush Hook] 门控未就绪或自动保存关闭，跳过");
        }
        Ok(())
    }
}
