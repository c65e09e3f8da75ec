//! SDK 主接口
//!
//! `StateSyncSDK` 把各层组装起来，并向宿主暴露一组很小的操作面：
//! 显式推送 / 拉取、自动保存开关、远端摘要、字段捕获、生命周期通知、登录登出。

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::error::{Result, StateSyncError};
use crate::events::{now_millis, EventManager, EventStats, SyncEvent};
use crate::identity::{Credentials, Identity, IdentityProvider};
use crate::lifecycle::{FlushOnHideHook, LifecycleHook, LifecycleManager, OverrideReplayHook};
use crate::overrides::{FieldEvent, OverrideCapture, OverrideReplayer, ReplayConfig};
use crate::session::SessionController;
use crate::storage::snapshot::DEFAULT_RESERVED_PATTERN;
use crate::storage::{InterceptedStore, LocalStore, MemoryLocalStore, ReservedKeys, SessionMarker, SledLocalStore};
use crate::sync::{
    FlushOutcome, FlushTrigger, PullGate, PullOutcome, PushRetryPolicy, RemoteStore, RemoteSummary,
    RemoteSyncAdapter, SchedulerConfig, SyncScheduler,
};
use crate::sync_state::{SyncState, SyncStateManager};
use crate::ui::UiSurface;

/// SDK 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateSyncConfig {
    /// 数据存储目录（默认本地存储放在 `<data_dir>/kv`）
    pub data_dir: PathBuf,
    /// 远端集合名
    pub collection: String,
    /// 覆盖值集合在本地存储中的 key
    pub overrides_key: String,
    /// 保留键正则（内部簿记用，不参与同步）
    pub reserved_key_pattern: String,
    /// 启动时清理本地的保留键
    pub purge_reserved_on_start: bool,
    /// 防抖调度
    pub scheduler: SchedulerConfig,
    /// 覆盖值回放时机
    pub replay: ReplayConfig,
    /// 推送失败重试
    pub retry: PushRetryPolicy,
    /// 事件配置
    pub event_config: EventConfig,
    /// 调试模式
    pub debug_mode: bool,
}

/// 事件配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    /// 事件缓冲区大小
    pub buffer_size: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self { buffer_size: 1000 }
    }
}

impl Default for StateSyncConfig {
    fn default() -> Self {
        Self {
            data_dir: get_default_data_dir(),
            collection: "app_state".to_string(),
            overrides_key: "form_overrides".to_string(),
            reserved_key_pattern: DEFAULT_RESERVED_PATTERN.to_string(),
            purge_reserved_on_start: true,
            scheduler: SchedulerConfig::default(),
            replay: ReplayConfig::default(),
            retry: PushRetryPolicy::default(),
            event_config: EventConfig::default(),
            debug_mode: false,
        }
    }
}

/// 获取默认数据目录 ~/.statesync/
fn get_default_data_dir() -> PathBuf {
    if let Some(home_dir) = std::env::var("HOME").ok().map(PathBuf::from) {
        home_dir.join(".statesync")
    } else if let Some(home_dir) = std::env::var("USERPROFILE").ok().map(PathBuf::from) {
        // Windows 支持
        home_dir.join(".statesync")
    } else {
        PathBuf::from("./statesync_data")
    }
}

impl StateSyncConfig {
    pub fn builder() -> StateSyncConfigBuilder {
        StateSyncConfigBuilder::new()
    }

    /// 从 JSON 文本加载，缺省字段取默认值
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| StateSyncError::Config(format!("配置解析失败: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(StateSyncError::Config("数据目录不能为空".to_string()));
        }
        if self.collection.trim().is_empty() {
            return Err(StateSyncError::Config("远端集合名不能为空".to_string()));
        }
        if self.overrides_key.trim().is_empty() {
            return Err(StateSyncError::Config("覆盖值 key 不能为空".to_string()));
        }

        let reserved = ReservedKeys::new(&self.reserved_key_pattern)
            .map_err(|e| StateSyncError::Config(format!("保留键正则无效: {}", e)))?;
        if reserved.is_reserved(&self.overrides_key) {
            return Err(StateSyncError::Config(format!(
                "覆盖值 key 落在保留命名空间内，永远不会被同步: {}",
                self.overrides_key
            )));
        }

        if self.scheduler.min_delay_ms > self.scheduler.default_delay_ms {
            return Err(StateSyncError::Config(format!(
                "防抖下限 {}ms 大于默认延迟 {}ms",
                self.scheduler.min_delay_ms, self.scheduler.default_delay_ms
            )));
        }
        if self.replay.early_delay_ms > self.replay.late_delay_ms {
            return Err(StateSyncError::Config("第一次回放延迟不能晚于第二次".to_string()));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(StateSyncError::Config("重试抖动因子必须在 0.0-1.0 之间".to_string()));
        }

        Ok(())
    }
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct StateSyncConfigBuilder {
    config: StateSyncConfig,
}

impl StateSyncConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.data_dir = path.as_ref().to_path_buf();
        self
    }

    pub fn collection<S: Into<String>>(mut self, collection: S) -> Self {
        self.config.collection = collection.into();
        self
    }

    pub fn overrides_key<S: Into<String>>(mut self, key: S) -> Self {
        self.config.overrides_key = key.into();
        self
    }

    pub fn reserved_key_pattern<S: Into<String>>(mut self, pattern: S) -> Self {
        self.config.reserved_key_pattern = pattern.into();
        self
    }

    pub fn purge_reserved_on_start(mut self, enabled: bool) -> Self {
        self.config.purge_reserved_on_start = enabled;
        self
    }

    pub fn scheduler_config(mut self, config: SchedulerConfig) -> Self {
        self.config.scheduler = config;
        self
    }

    pub fn replay_config(mut self, config: ReplayConfig) -> Self {
        self.config.replay = config;
        self
    }

    pub fn retry_policy(mut self, policy: PushRetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn event_config(mut self, config: EventConfig) -> Self {
        self.config.event_config = config;
        self
    }

    pub fn debug_mode(mut self, enabled: bool) -> Self {
        self.config.debug_mode = enabled;
        self
    }

    pub fn build(self) -> StateSyncConfig {
        self.config
    }
}

/// 宿主提供的外部能力
#[derive(Clone)]
pub struct Capabilities {
    pub identity: Arc<dyn IdentityProvider>,
    pub remote: Arc<dyn RemoteStore>,
    pub ui: Arc<dyn UiSurface>,
    /// 本地存储；未提供时在 `data_dir` 下打开 sled
    pub local_store: Option<Arc<dyn LocalStore>>,
    /// 会话存储（同一会话内重新进入仍可见）；未提供时使用进程内存
    pub session_store: Option<Arc<dyn LocalStore>>,
}

impl Capabilities {
    pub fn new(identity: Arc<dyn IdentityProvider>, remote: Arc<dyn RemoteStore>, ui: Arc<dyn UiSurface>) -> Self {
        Self {
            identity,
            remote,
            ui,
            local_store: None,
            session_store: None,
        }
    }

    pub fn with_local_store(mut self, store: Arc<dyn LocalStore>) -> Self {
        self.local_store = Some(store);
        self
    }

    pub fn with_session_store(mut self, store: Arc<dyn LocalStore>) -> Self {
        self.session_store = Some(store);
        self
    }
}

/// 同步引擎主接口
///
/// 分层：
/// - 存储层：原始本地存储 + 拦截存储
/// - 同步层：远端适配器、防抖调度、拉取门控
/// - 覆盖值层：捕获 / 回放
/// - 会话层：登录登出与门控 UI
pub struct StateSyncSDK {
    config: StateSyncConfig,
    state: SyncStateManager,
    event_manager: Arc<EventManager>,
    /// 宿主写入用的拦截存储
    local_store: InterceptedStore,
    adapter: RemoteSyncAdapter,
    scheduler: Arc<SyncScheduler>,
    capture: OverrideCapture,
    replayer: Arc<OverrideReplayer>,
    session: Arc<SessionController>,
    lifecycle_manager: tokio::sync::RwLock<LifecycleManager>,
    shutting_down: AtomicBool,
}

impl StateSyncSDK {
    /// 初始化引擎
    ///
    /// 初始化顺序：
    /// 1. 本地存储（清理保留键）→ 2. 事件层 → 3. 同步层 → 4. 覆盖值层 → 5. 会话层 → 6. 生命周期 Hook
    pub async fn initialize(config: StateSyncConfig, capabilities: Capabilities) -> Result<Arc<Self>> {
        info!(
            "正在初始化 {} {}...",
            crate::version::SDK_NAME,
            crate::version::SDK_VERSION
        );
        config.validate()?;

        // === 第1层：本地存储 ===
        let reserved = ReservedKeys::new(&config.reserved_key_pattern)?;
        let raw_store: Arc<dyn LocalStore> = match capabilities.local_store {
            Some(store) => store,
            None => Arc::new(SledLocalStore::open(&config.data_dir).await?),
        };
        if config.purge_reserved_on_start {
            reserved.purge(raw_store.as_ref()).await?;
        }
        let session_store: Arc<dyn LocalStore> = match capabilities.session_store {
            Some(store) => store,
            None => Arc::new(MemoryLocalStore::new()),
        };

        // === 第2层：事件与状态 ===
        let event_manager = Arc::new(EventManager::new(config.event_config.buffer_size));
        let state = SyncStateManager::new();

        // === 第3层：同步 ===
        let adapter = RemoteSyncAdapter::new(capabilities.remote, config.collection.clone());
        let scheduler = SyncScheduler::new(
            config.scheduler.clone(),
            config.retry.clone(),
            state.clone(),
            raw_store.clone(),
            reserved.clone(),
            adapter.clone(),
            event_manager.clone(),
        );
        let local_store = InterceptedStore::new(raw_store.clone(), scheduler.clone(), config.scheduler.mutation_hint());
        let gate = Arc::new(PullGate::new(
            state.clone(),
            adapter.clone(),
            raw_store.clone(),
            reserved,
            SessionMarker::new(session_store),
            scheduler.clone(),
            capabilities.ui.clone(),
            event_manager.clone(),
        ));
        if gate.restore_marker().await? {
            info!("本会话已完成过首次拉取，后续拉取不再重载");
        }

        // === 第4层：覆盖值 ===
        let capture = OverrideCapture::new(
            InterceptedStore::new(raw_store.clone(), scheduler.clone(), config.scheduler.capture_hint()),
            config.overrides_key.clone(),
            state.clone(),
            event_manager.clone(),
        );
        let replayer = Arc::new(OverrideReplayer::new(
            raw_store,
            config.overrides_key.clone(),
            capabilities.ui.clone(),
            event_manager.clone(),
            config.replay.clone(),
        ));

        // === 第5层：会话 ===
        let session = SessionController::new(
            state.clone(),
            capabilities.identity,
            gate,
            scheduler.clone(),
            capabilities.ui,
            event_manager.clone(),
        );

        // === 第6层：生命周期 ===
        let mut lifecycle_manager = LifecycleManager::new();
        lifecycle_manager.register_hook(Arc::new(OverrideReplayHook::new(replayer.clone())));
        lifecycle_manager.register_hook(Arc::new(FlushOnHideHook::new(scheduler.clone())));

        if config.debug_mode {
            state.log_state();
        }
        info!("✅ StateSyncSDK 初始化完成: collection={}", config.collection);

        Ok(Arc::new(Self {
            config,
            state,
            event_manager,
            local_store,
            adapter,
            scheduler,
            capture,
            replayer,
            session,
            lifecycle_manager: tokio::sync::RwLock::new(lifecycle_manager),
            shutting_down: AtomicBool::new(false),
        }))
    }

    pub fn config(&self) -> &StateSyncConfig {
        &self.config
    }

    /// 开始监听会话变化
    pub fn start(&self) -> Result<()> {
        self.session.start()
    }

    /// 宿主写入本地存储用的句柄；每次 set / remove / clear 都会调度推送
    pub fn local_store(&self) -> InterceptedStore {
        self.local_store.clone()
    }

    /// 立即推送本地快照
    ///
    /// 首次拉取完成之前调用返回 `NotReady`；不受自动保存开关影响。
    pub async fn request_push(&self) -> Result<FlushOutcome> {
        self.scheduler.flush_now(FlushTrigger::Manual).await
    }

    /// 显式拉取
    ///
    /// `should_reload_if_first` 为 true 且本会话尚未应用过远端快照时请求重载；
    /// 静默应用时重新回放覆盖值。
    pub async fn request_pull(&self, should_reload_if_first: bool) -> Result<PullOutcome> {
        let outcome = self.session.refresh(should_reload_if_first).await?;
        if let PullOutcome::Applied {
            reload_requested: false,
            ..
        } = outcome
        {
            if let Err(e) = self.replayer.replay_soon() {
                warn!("安排覆盖值回放失败: {}", e);
            }
        }
        Ok(outcome)
    }

    pub fn set_autosave_enabled(&self, enabled: bool) {
        self.state.set_autosave_enabled(enabled);
        if !enabled {
            self.scheduler.cancel_pending();
        }
        self.event_manager.emit(SyncEvent::AutosaveToggled {
            enabled,
            timestamp: now_millis(),
        });
        info!("自动保存已{}", if enabled { "开启" } else { "关闭" });
    }

    /// 远端记录摘要（诊断用，只读）；远端无记录时返回 `None`
    pub async fn inspect_remote_summary(&self) -> Result<Option<RemoteSummary>> {
        let identity_id = self.state.identity_id().ok_or(StateSyncError::NotSignedIn)?;
        self.adapter.summary(&identity_id).await
    }

    /// 捕获一次字段事件；返回被捕获字段的稳定标识
    pub async fn capture_field(&self, event: &FieldEvent) -> Option<String> {
        self.capture.capture(event).await
    }

    /// 宿主界面加载完成
    pub async fn notify_ui_loaded(&self) -> Result<()> {
        self.lifecycle_manager.read().await.notify_ui_loaded().await
    }

    /// 宿主界面被隐藏
    pub async fn notify_ui_hidden(&self) -> Result<()> {
        self.lifecycle_manager.read().await.notify_ui_hidden().await
    }

    /// 注册额外的生命周期 Hook
    pub async fn register_lifecycle_hook(&self, hook: Arc<dyn LifecycleHook>) {
        self.lifecycle_manager.write().await.register_hook(hook);
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Identity> {
        self.session.sign_in(&Credentials::new(email, password)).await
    }

    /// 注册；邮箱已被注册时回退为登录
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<Identity> {
        self.session.sign_up(&Credentials::new(email, password)).await
    }

    pub async fn sign_out(&self) -> Result<()> {
        self.session.sign_out().await
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.event_manager.subscribe()
    }

    pub fn event_stats(&self) -> EventStats {
        self.event_manager.get_stats()
    }

    /// 当前同步状态快照
    pub fn sync_state(&self) -> SyncState {
        self.state.get_state()
    }

    pub fn sync_summary(&self) -> String {
        self.state.get_summary()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// 关闭：停止会话监听，尽力推送待触发的变更
    pub async fn shutdown(&self) -> Result<()> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("正在关闭 StateSyncSDK...");

        self.session.stop();
        if self.scheduler.has_pending() {
            if let Err(e) = self.scheduler.flush_now(FlushTrigger::Scheduled).await {
                warn!("关闭前推送失败（本地数据仍在）: {}", e);
            }
        }
        self.scheduler.cancel_pending();

        info!("StateSyncSDK 关闭完成");
        Ok(())
    }
}
