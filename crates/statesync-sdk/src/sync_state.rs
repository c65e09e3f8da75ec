//! 同步状态管理
//!
//! 进程内唯一的一份 `SyncState`，由 `SyncStateManager` 持有并在各组件间共享：
//! - 拉取门控阶段（Uninitialized → Pulling → Applying → Ready）
//! - 首次拉取是否完成、门控 UI 是否已显示
//! - 当前会话与身份
//! - 推送 / 拉取的状态信号与统计

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::identity::Identity;

/// 拉取门控阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatePhase {
    /// 未绑定身份，或已绑定但尚未尝试拉取
    Uninitialized,
    /// 拉取请求进行中
    Pulling,
    /// 正在把拉取到的快照写入本地
    Applying,
    /// 允许自动保存
    Ready,
}

impl std::fmt::Display for GatePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatePhase::Uninitialized => write!(f, "未初始化"),
            GatePhase::Pulling => write!(f, "拉取中"),
            GatePhase::Applying => write!(f, "应用中"),
            GatePhase::Ready => write!(f, "就绪"),
        }
    }
}

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    SignedOut,
    Authenticating,
    SignedIn,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::SignedOut => write!(f, "未登录"),
            SessionStatus::Authenticating => write!(f, "认证中"),
            SessionStatus::SignedIn => write!(f, "已登录"),
        }
    }
}

/// 单个操作（推送/拉取）对宿主可见的状态信号
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationStatus {
    Idle,
    Pending,
    Succeeded {
        /// UTC 毫秒时间戳
        at: i64,
    },
    Failed {
        error: String,
        /// 是否已安排重试；false 表示要等下一次本地编辑
        retry_scheduled: bool,
        at: i64,
    },
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationStatus::Idle => write!(f, "空闲"),
            OperationStatus::Pending => write!(f, "进行中"),
            OperationStatus::Succeeded { .. } => write!(f, "成功"),
            OperationStatus::Failed {
                error,
                retry_scheduled,
                ..
            } => {
                if *retry_scheduled {
                    write!(f, "失败（将重试）: {}", error)
                } else {
                    write!(f, "失败: {}", error)
                }
            }
        }
    }
}

/// 统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncStats {
    pub pushes_succeeded: u64,
    pub pushes_failed: u64,
    pub pulls_succeeded: u64,
    pub pulls_failed: u64,
    pub bytes_pushed: u64,
    pub overrides_captured: u64,
    /// 最后一次成功推送时间（UTC毫秒时间戳）
    pub last_push_at: Option<i64>,
    /// 最后一次成功拉取时间（UTC毫秒时间戳）
    pub last_pull_at: Option<i64>,
}

/// 同步状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncState {
    pub phase: GatePhase,
    /// 本会话是否已完成过一次拉取应用（跨重载保留）
    pub first_pull_completed: bool,
    /// 本次登录周期内门控 UI 是否已显示
    pub ui_revealed: bool,
    pub session: SessionStatus,
    pub identity: Option<Identity>,
    pub autosave_enabled: bool,
    pub push_status: OperationStatus,
    pub pull_status: OperationStatus,
    pub stats: SyncStats,
    pub sdk_version: String,
}

impl SyncState {
    pub fn new() -> Self {
        Self {
            phase: GatePhase::Uninitialized,
            first_pull_completed: false,
            ui_revealed: false,
            session: SessionStatus::SignedOut,
            identity: None,
            autosave_enabled: true,
            push_status: OperationStatus::Idle,
            pull_status: OperationStatus::Idle,
            stats: SyncStats::default(),
            sdk_version: crate::version::SDK_VERSION.to_string(),
        }
    }

    /// 自动保存是否被门控允许：已绑定身份且本进程已完成一次拉取
    pub fn is_ready(&self) -> bool {
        self.phase == GatePhase::Ready && self.identity.is_some()
    }

    /// 生成状态摘要（用于日志打印）
    pub fn summary(&self) -> String {
        let identity = self
            .identity
            .as_ref()
            .map(|i| format!("身份: {} ({})", i.id, i.display_label.as_deref().unwrap_or("-")))
            .unwrap_or_else(|| "身份: 未绑定".to_string());

        format!(
            "【同步状态】\n\
             会话: {}\n\
             {}\n\
             门控: {}（首次拉取{}）\n\
             自动保存: {}\n\
             推送: {}\n\
             拉取: {}\n\
             统计: 推送成功{}次/失败{}次，拉取成功{}次/失败{}次，已推送{}字节\n\
             SDK版本: {}",
            self.session,
            identity,
            self.phase,
            if self.first_pull_completed { "已完成" } else { "未完成" },
            if self.autosave_enabled { "开启" } else { "关闭" },
            self.push_status,
            self.pull_status,
            self.stats.pushes_succeeded,
            self.stats.pushes_failed,
            self.stats.pulls_succeeded,
            self.stats.pulls_failed,
            self.stats.bytes_pushed,
            self.sdk_version,
        )
    }
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new()
    }
}

/// 同步状态管理器（线程安全）
///
/// 读写都是同步的，拦截器通知路径上也可以直接判断门控。
#[derive(Debug, Clone, Default)]
pub struct SyncStateManager {
    state: Arc<RwLock<SyncState>>,
}

impl SyncStateManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.state.read().is_ready()
    }

    pub fn phase(&self) -> GatePhase {
        self.state.read().phase
    }

    pub fn set_phase(&self, phase: GatePhase) {
        let mut state = self.state.write();
        if state.phase != phase {
            tracing::debug!("门控阶段: {} → {}", state.phase, phase);
            state.phase = phase;
        }
    }

    pub fn identity(&self) -> Option<Identity> {
        self.state.read().identity.clone()
    }

    pub fn identity_id(&self) -> Option<String> {
        self.state.read().identity.as_ref().map(|i| i.id.clone())
    }

    /// 绑定身份（登录成功）
    pub fn bind_identity(&self, identity: Identity) {
        let mut state = self.state.write();
        let changed = state.identity.as_ref().map(|i| i.id != identity.id).unwrap_or(true);
        if changed {
            // 新身份必须重新走一次首次拉取，并重新显示一次门控 UI
            state.phase = GatePhase::Uninitialized;
            state.ui_revealed = false;
        }
        state.identity = Some(identity);
        state.session = SessionStatus::SignedIn;
    }

    /// 解绑身份（登出）；不清除 `first_pull_completed`
    pub fn unbind_identity(&self) {
        let mut state = self.state.write();
        state.identity = None;
        state.session = SessionStatus::SignedOut;
        state.phase = GatePhase::Uninitialized;
        state.ui_revealed = false;
    }

    pub fn session(&self) -> SessionStatus {
        self.state.read().session
    }

    pub fn set_session(&self, session: SessionStatus) {
        self.state.write().session = session;
    }

    pub fn first_pull_completed(&self) -> bool {
        self.state.read().first_pull_completed
    }

    pub fn set_first_pull_completed(&self, completed: bool) {
        self.state.write().first_pull_completed = completed;
    }

    /// 标记门控 UI 已显示；返回 true 表示这是本次登录周期内的第一次
    pub fn try_mark_revealed(&self) -> bool {
        let mut state = self.state.write();
        if state.ui_revealed {
            return false;
        }
        state.ui_revealed = true;
        true
    }

    pub fn autosave_enabled(&self) -> bool {
        self.state.read().autosave_enabled
    }

    pub fn set_autosave_enabled(&self, enabled: bool) {
        self.state.write().autosave_enabled = enabled;
    }

    pub fn set_push_status(&self, status: OperationStatus) {
        self.state.write().push_status = status;
    }

    pub fn set_pull_status(&self, status: OperationStatus) {
        self.state.write().pull_status = status;
    }

    /// 记录一次成功推送
    pub fn record_push_success(&self, bytes: usize) {
        let now = Utc::now().timestamp_millis();
        let mut state = self.state.write();
        state.stats.pushes_succeeded += 1;
        state.stats.bytes_pushed += bytes as u64;
        state.stats.last_push_at = Some(now);
        state.push_status = OperationStatus::Succeeded { at: now };
    }

    /// 记录一次失败推送
    pub fn record_push_failure(&self, error: String, retry_scheduled: bool) {
        let mut state = self.state.write();
        state.stats.pushes_failed += 1;
        state.push_status = OperationStatus::Failed {
            error,
            retry_scheduled,
            at: Utc::now().timestamp_millis(),
        };
    }

    pub fn record_pull_success(&self) {
        let now = Utc::now().timestamp_millis();
        let mut state = self.state.write();
        state.stats.pulls_succeeded += 1;
        state.stats.last_pull_at = Some(now);
        state.pull_status = OperationStatus::Succeeded { at: now };
    }

    pub fn record_pull_failure(&self, error: String) {
        let mut state = self.state.write();
        state.stats.pulls_failed += 1;
        state.pull_status = OperationStatus::Failed {
            error,
            retry_scheduled: false,
            at: Utc::now().timestamp_millis(),
        };
    }

    pub fn record_capture(&self) {
        self.state.write().stats.overrides_captured += 1;
    }

    /// 获取当前状态快照
    pub fn get_state(&self) -> SyncState {
        self.state.read().clone()
    }

    /// 获取状态摘要
    pub fn get_summary(&self) -> String {
        self.state.read().summary()
    }

    /// 打印状态到日志
    pub fn log_state(&self) {
        let summary = self.get_summary();
        tracing::info!("\n{}", summary);
    }
}
