//! 同步调度器
//!
//! 把密集的本地变更合并成一次延迟推送（纯防抖：窗口内只有最后一次调度生效）。
//!
//! 并发约束：
//! - 任意时刻最多一个待触发的定时器，新的调度会取消旧的
//! - 任意时刻最多一个进行中的推送；定时器触发时若已有推送在执行，则排队等待，
//!   不会并发推送（两个并发推送会交错写入半截快照）
//! - 推送的快照在真正执行时采集，而不是在调度时采集

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{Result, StateSyncError};
use crate::events::{now_millis, EventManager, SyncEvent};
use crate::storage::{LocalSnapshot, LocalStore, MutationObserver, ReservedKeys};
use crate::sync::remote::RemoteSyncAdapter;
use crate::sync::retry_policy::{PushRetryPolicy, SyncFailureReason};
use crate::sync_state::{OperationStatus, SyncStateManager};

/// 调度配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// 未指定延迟时的默认防抖（毫秒）
    pub default_delay_ms: u64,
    /// 防抖下限（毫秒）
    pub min_delay_ms: u64,
    /// 本地存储变更使用的延迟提示（毫秒）
    pub mutation_hint_ms: u64,
    /// 字段覆盖值捕获使用的延迟提示（毫秒）
    pub capture_hint_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_delay_ms: 1200,
            min_delay_ms: 300,
            mutation_hint_ms: 800,
            capture_hint_ms: 600,
        }
    }
}

impl SchedulerConfig {
    pub fn mutation_hint(&self) -> Duration {
        Duration::from_millis(self.mutation_hint_ms)
    }

    pub fn capture_hint(&self) -> Duration {
        Duration::from_millis(self.capture_hint_ms)
    }

    /// 实际延迟：未指定用默认值，且不低于下限
    pub fn effective_delay(&self, hint: Option<Duration>) -> Duration {
        let requested = hint.unwrap_or(Duration::from_millis(self.default_delay_ms));
        requested.max(Duration::from_millis(self.min_delay_ms))
    }
}

/// 推送由谁触发
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// 防抖定时器或重试定时器
    Scheduled,
    /// 宿主显式请求
    Manual,
}

/// 一次推送的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    Pushed { key_count: usize, bytes: usize },
    /// 门控未就绪、已登出或自动保存关闭，本次不推送
    Skipped,
}

pub struct SyncScheduler {
    me: Weak<SyncScheduler>,
    config: SchedulerConfig,
    retry: PushRetryPolicy,
    state: SyncStateManager,
    /// 未拦截的原始存储，只用来采集快照
    store: Arc<dyn LocalStore>,
    reserved: ReservedKeys,
    adapter: RemoteSyncAdapter,
    events: Arc<EventManager>,
    /// 待触发的定时器
    pending: parking_lot::Mutex<Option<JoinHandle<()>>>,
    /// 推送串行化
    push_lock: tokio::sync::Mutex<()>,
    /// 已有推送在排队等锁（它会在执行时采集最新快照，无需再排一个）
    flush_queued: AtomicBool,
    /// 连续失败次数
    failed_attempts: AtomicU32,
}

impl SyncScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SchedulerConfig,
        retry: PushRetryPolicy,
        state: SyncStateManager,
        store: Arc<dyn LocalStore>,
        reserved: ReservedKeys,
        adapter: RemoteSyncAdapter,
        events: Arc<EventManager>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            config,
            retry,
            state,
            store,
            reserved,
            adapter,
            events,
            pending: parking_lot::Mutex::new(None),
            push_lock: tokio::sync::Mutex::new(()),
            flush_queued: AtomicBool::new(false),
            failed_attempts: AtomicU32::new(0),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// 记录一次推送意图
    ///
    /// 门控未就绪（无身份或首次拉取未完成）或自动保存关闭时是空操作，返回 `Ok(false)`。
    pub fn schedule(&self, hint: Option<Duration>) -> Result<bool> {
        if !self.state.autosave_enabled() {
            debug!("自动保存已关闭，忽略调度");
            return Ok(false);
        }
        if !self.state.is_ready() {
            debug!("门控未就绪，忽略调度: phase={}", self.state.phase());
            return Ok(false);
        }

        // 新的本地变更开启新一轮重试计数
        self.failed_attempts.store(0, Ordering::SeqCst);
        let delay = self.config.effective_delay(hint);
        self.arm(delay)?;
        debug!("已调度推送: delay={}ms", delay.as_millis());
        Ok(true)
    }

    /// 是否有待触发的定时器
    pub fn has_pending(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// 取消待触发的定时器（不影响进行中的推送）
    pub fn cancel_pending(&self) {
        if let Some(handle) = self.pending.lock().take() {
            handle.abort();
            debug!("已取消待触发的推送");
        }
    }

    /// 立即推送：取消待触发的定时器，然后（排队）执行一次推送
    pub async fn flush_now(&self, trigger: FlushTrigger) -> Result<FlushOutcome> {
        self.cancel_pending();
        self.run_flush(trigger).await
    }

    fn arm(&self, delay: Duration) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| StateSyncError::Runtime(format!("没有可用的 tokio 运行时: {}", e)))?;
        let me = self
            .me
            .upgrade()
            .ok_or_else(|| StateSyncError::Runtime("调度器已释放".to_string()))?;

        // 定时器只负责等待；到点后把推送交给独立任务，取消定时器不会打断进行中的推送
        let timer = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            me.enqueue_flush();
        });

        if let Some(previous) = self.pending.lock().replace(timer) {
            previous.abort();
        }
        Ok(())
    }

    fn enqueue_flush(self: Arc<Self>) {
        if self.flush_queued.swap(true, Ordering::SeqCst) {
            debug!("已有排队中的推送，合并本次触发");
            return;
        }
        tokio::spawn(async move {
            // 失败已在 run_flush 内记录，这里不再向外传播
            let _ = self.run_flush(FlushTrigger::Scheduled).await;
        });
    }

    async fn run_flush(&self, trigger: FlushTrigger) -> Result<FlushOutcome> {
        let _guard = self.push_lock.lock().await;
        self.flush_queued.store(false, Ordering::SeqCst);

        if trigger == FlushTrigger::Scheduled && !self.state.autosave_enabled() {
            debug!("自动保存已关闭，跳过推送");
            return Ok(FlushOutcome::Skipped);
        }
        if !self.state.is_ready() {
            debug!("门控未就绪，跳过推送");
            return match trigger {
                FlushTrigger::Scheduled => Ok(FlushOutcome::Skipped),
                FlushTrigger::Manual => Err(StateSyncError::NotReady("首次拉取尚未完成".to_string())),
            };
        }
        let identity_id = match self.state.identity_id() {
            Some(id) => id,
            None => return Ok(FlushOutcome::Skipped),
        };

        let snapshot = match LocalSnapshot::collect(self.store.as_ref(), &self.reserved).await {
            Ok(s) => s,
            Err(e) => {
                error!("采集本地快照失败: {}", e);
                self.handle_push_failure(e.to_string(), &e);
                return Err(e);
            }
        };

        let key_count = snapshot.len();
        self.state.set_push_status(OperationStatus::Pending);
        self.events.emit(SyncEvent::PushStarted {
            key_count,
            timestamp: now_millis(),
        });

        match self.adapter.push(&identity_id, &snapshot).await {
            Ok(bytes) => {
                self.failed_attempts.store(0, Ordering::SeqCst);
                self.state.record_push_success(bytes);
                self.events.emit(SyncEvent::PushSucceeded {
                    key_count,
                    bytes,
                    timestamp: now_millis(),
                });
                info!("✅ 推送完成: keys={}, bytes={}", key_count, bytes);
                Ok(FlushOutcome::Pushed { key_count, bytes })
            }
            Err(e) => {
                self.handle_push_failure(e.to_string(), &e);
                Err(e)
            }
        }
    }

    fn handle_push_failure(&self, message: String, error: &StateSyncError) {
        let attempt = self.failed_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let reason = SyncFailureReason::classify(error);

        let retry_scheduled = match self.retry.next_delay(attempt, &reason) {
            Some(delay) => match self.arm(delay) {
                Ok(()) => {
                    warn!(
                        "⚠️ 推送失败，{}ms 后第 {} 次重试: {}",
                        delay.as_millis(),
                        attempt,
                        message
                    );
                    true
                }
                Err(e) => {
                    warn!("⚠️ 推送失败且无法安排重试: {} ({})", message, e);
                    false
                }
            },
            None => {
                warn!("⚠️ 推送失败，等待下一次本地编辑: {} (attempt={})", message, attempt);
                false
            }
        };

        self.state.record_push_failure(message.clone(), retry_scheduled);
        self.events.emit(SyncEvent::PushFailed {
            error: message,
            retry_scheduled,
            timestamp: now_millis(),
        });
    }
}

impl MutationObserver for SyncScheduler {
    fn on_local_mutation(&self, hint: Duration) -> Result<()> {
        self.schedule(Some(hint)).map(|_| ())
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.get_mut().take() {
            handle.abort();
        }
    }
}
