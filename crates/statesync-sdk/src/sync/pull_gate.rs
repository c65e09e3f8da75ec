//! 拉取门控（状态机）
//!
//! ```text
//! Uninitialized ──pull──▶ Pulling ──found──▶ Applying ──▶ Ready
//!                            │
//!                            └──no record──────────────▶ Ready
//! ```
//!
//! 门控决定两件事：
//! - 自动保存是否被允许（只有 Ready 才允许）
//! - 一次成功的拉取是否应该触发整页重载（每个会话只有第一次完成的应用会重载）
//!
//! 拉取失败绝不能进入 Ready：那会让自动保存把未对齐的（空的或过期的）本地快照
//! 覆盖到真实的远端数据上。已就绪时的刷新只有在本地存储尚未被改动（读取远端
//! 或解析失败）时才保持 Ready；进入 Applying 之后的任何失败都回到 Uninitialized。

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::error::{Result, StateSyncError};
use crate::events::{now_millis, EventManager, SyncEvent};
use crate::storage::{LocalStore, ReservedKeys, SessionMarker};
use crate::sync::remote::{PullResult, RemoteSyncAdapter};
use crate::sync::scheduler::SyncScheduler;
use crate::sync_state::{GatePhase, OperationStatus, SyncStateManager};
use crate::ui::UiSurface;

/// 一次拉取的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    /// 远端快照已整体写入本地
    Applied {
        key_count: usize,
        /// 是否请求了整页重载
        reload_requested: bool,
    },
    /// 远端尚无记录，直接标记首次拉取完成
    NoRemoteRecord,
}

impl PullOutcome {
    pub fn reload_requested(&self) -> bool {
        matches!(self, PullOutcome::Applied { reload_requested: true, .. })
    }
}

pub struct PullGate {
    state: SyncStateManager,
    adapter: RemoteSyncAdapter,
    /// 未拦截的原始存储：apply 自己造成的写入不能触发推送
    store: Arc<dyn LocalStore>,
    reserved: ReservedKeys,
    marker: SessionMarker,
    scheduler: Arc<SyncScheduler>,
    ui: Arc<dyn UiSurface>,
    events: Arc<EventManager>,
    /// 拉取串行化
    pull_lock: tokio::sync::Mutex<()>,
}

impl PullGate {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: SyncStateManager,
        adapter: RemoteSyncAdapter,
        store: Arc<dyn LocalStore>,
        reserved: ReservedKeys,
        marker: SessionMarker,
        scheduler: Arc<SyncScheduler>,
        ui: Arc<dyn UiSurface>,
        events: Arc<EventManager>,
    ) -> Self {
        Self {
            state,
            adapter,
            store,
            reserved,
            marker,
            scheduler,
            ui,
            events,
            pull_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// 从会话存储恢复「首次拉取已完成」标记（同一会话内重新进入时）
    pub async fn restore_marker(&self) -> Result<bool> {
        let applied = self.marker.is_first_pull_applied().await?;
        self.state.set_first_pull_completed(applied);
        Ok(applied)
    }

    /// 拉取远端快照并整体替换本地
    ///
    /// `should_reload_if_first` 为 true 且这是本会话第一次完成应用时，请求宿主重载；
    /// 之后的每次拉取都静默应用。
    pub async fn pull(&self, should_reload_if_first: bool) -> Result<PullOutcome> {
        let _guard = self.pull_lock.lock().await;

        let identity_id = self.state.identity_id().ok_or(StateSyncError::NotSignedIn)?;
        let previous_phase = self.state.phase();

        self.state.set_phase(GatePhase::Pulling);
        self.state.set_pull_status(OperationStatus::Pending);
        self.events.emit(SyncEvent::PullStarted {
            timestamp: now_millis(),
        });
        info!("开始拉取远端快照: id={}", identity_id);

        match self.pull_and_apply(&identity_id, should_reload_if_first).await {
            Ok(outcome) => {
                self.state.set_phase(GatePhase::Ready);
                self.state.record_pull_success();
                let (record_found, key_count) = match outcome {
                    PullOutcome::Applied { key_count, .. } => (true, key_count),
                    PullOutcome::NoRemoteRecord => (false, 0),
                };
                self.events.emit(SyncEvent::PullSucceeded {
                    record_found,
                    key_count,
                    timestamp: now_millis(),
                });
                info!("✅ 拉取完成，门控就绪: {:?}", outcome);
                Ok(outcome)
            }
            Err(e) => {
                // 本地存储可能已被清空或只写了一部分
                let local_touched = self.state.phase() == GatePhase::Applying;
                let fallback = if previous_phase == GatePhase::Ready && !local_touched {
                    GatePhase::Ready
                } else {
                    GatePhase::Uninitialized
                };
                self.state.set_phase(fallback);
                if fallback == GatePhase::Uninitialized {
                    self.scheduler.cancel_pending();
                }
                self.state.record_pull_failure(e.to_string());
                self.events.emit(SyncEvent::PullFailed {
                    error: e.to_string(),
                    timestamp: now_millis(),
                });
                error!("拉取失败，门控保持 {}: {}", fallback, e);
                Err(e)
            }
        }
    }

    async fn pull_and_apply(&self, identity_id: &str, should_reload_if_first: bool) -> Result<PullOutcome> {
        let snapshot = match self.adapter.pull(identity_id).await? {
            PullResult::Found(snapshot) => snapshot,
            PullResult::NoRecord => {
                self.marker.mark_first_pull_applied().await?;
                self.state.set_first_pull_completed(true);
                return Ok(PullOutcome::NoRemoteRecord);
            }
        };

        self.state.set_phase(GatePhase::Applying);
        // 待触发的推送携带的是即将被覆盖的本地状态
        self.scheduler.cancel_pending();
        snapshot.apply_to(self.store.as_ref(), &self.reserved).await?;

        let already_applied = self.marker.mark_first_pull_applied().await?;
        self.state.set_first_pull_completed(true);

        let reload_requested = should_reload_if_first && !already_applied;
        if reload_requested {
            self.events.emit(SyncEvent::ReloadRequested {
                timestamp: now_millis(),
            });
            if let Err(e) = self.ui.request_reload() {
                warn!("请求重载失败: {}", e);
            }
        }

        Ok(PullOutcome::Applied {
            key_count: snapshot.len(),
            reload_requested,
        })
    }
}
