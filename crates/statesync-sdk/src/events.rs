//! 事件系统模块 - 向宿主广播同步引擎的状态变化
//!
//! 功能包括：
//! - 会话与认证事件
//! - 拉取 / 推送的开始、成功、失败
//! - 字段覆盖值的捕获与回放
//! - 门控 UI 的显示与隐藏
//! - 事件广播和订阅机制

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// 当前时间（UTC 毫秒）
pub fn now_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// 同步引擎事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncEvent {
    /// 会话状态变更
    SessionChanged {
        signed_in: bool,
        identity_id: Option<String>,
        timestamp: u64,
    },
    /// 认证成功（门控 UI 已显示）
    AuthSucceeded {
        display_label: Option<String>,
        timestamp: u64,
    },
    /// 登录/注册失败
    AuthFailed { error: String, timestamp: u64 },
    PullStarted { timestamp: u64 },
    /// 拉取完成；`record_found` 为 false 表示远端尚无记录
    PullSucceeded {
        record_found: bool,
        key_count: usize,
        timestamp: u64,
    },
    PullFailed { error: String, timestamp: u64 },
    /// 本会话首次应用远端快照，请求宿主重载
    ReloadRequested { timestamp: u64 },
    PushStarted { key_count: usize, timestamp: u64 },
    PushSucceeded {
        key_count: usize,
        bytes: usize,
        timestamp: u64,
    },
    /// 推送失败；`retry_scheduled` 表示是否已安排退避重试
    PushFailed {
        error: String,
        retry_scheduled: bool,
        timestamp: u64,
    },
    OverrideCaptured { field_key: String, timestamp: u64 },
    CaptureFailed { error: String, timestamp: u64 },
    /// 一轮回放完成
    OverridesReplayed {
        applied: usize,
        skipped: usize,
        timestamp: u64,
    },
    UiRevealed { timestamp: u64 },
    UiHidden { timestamp: u64 },
    AutosaveToggled { enabled: bool, timestamp: u64 },
}

impl SyncEvent {
    /// 事件类型名
    pub fn event_type(&self) -> &'static str {
        match self {
            SyncEvent::SessionChanged { .. } => "session_changed",
            SyncEvent::AuthSucceeded { .. } => "auth_succeeded",
            SyncEvent::AuthFailed { .. } => "auth_failed",
            SyncEvent::PullStarted { .. } => "pull_started",
            SyncEvent::PullSucceeded { .. } => "pull_succeeded",
            SyncEvent::PullFailed { .. } => "pull_failed",
            SyncEvent::ReloadRequested { .. } => "reload_requested",
            SyncEvent::PushStarted { .. } => "push_started",
            SyncEvent::PushSucceeded { .. } => "push_succeeded",
            SyncEvent::PushFailed { .. } => "push_failed",
            SyncEvent::OverrideCaptured { .. } => "override_captured",
            SyncEvent::CaptureFailed { .. } => "capture_failed",
            SyncEvent::OverridesReplayed { .. } => "overrides_replayed",
            SyncEvent::UiRevealed { .. } => "ui_revealed",
            SyncEvent::UiHidden { .. } => "ui_hidden",
            SyncEvent::AutosaveToggled { .. } => "autosave_toggled",
        }
    }

    /// 事件时间戳（UTC 毫秒）
    pub fn timestamp(&self) -> u64 {
        match self {
            SyncEvent::SessionChanged { timestamp, .. }
            | SyncEvent::AuthSucceeded { timestamp, .. }
            | SyncEvent::AuthFailed { timestamp, .. }
            | SyncEvent::PullStarted { timestamp }
            | SyncEvent::PullSucceeded { timestamp, .. }
            | SyncEvent::PullFailed { timestamp, .. }
            | SyncEvent::ReloadRequested { timestamp }
            | SyncEvent::PushStarted { timestamp, .. }
            | SyncEvent::PushSucceeded { timestamp, .. }
            | SyncEvent::PushFailed { timestamp, .. }
            | SyncEvent::OverrideCaptured { timestamp, .. }
            | SyncEvent::CaptureFailed { timestamp, .. }
            | SyncEvent::OverridesReplayed { timestamp, .. }
            | SyncEvent::UiRevealed { timestamp }
            | SyncEvent::UiHidden { timestamp }
            | SyncEvent::AutosaveToggled { timestamp, .. } => *timestamp,
        }
    }

    /// 是否是失败类事件
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            SyncEvent::AuthFailed { .. }
                | SyncEvent::PullFailed { .. }
                | SyncEvent::PushFailed { .. }
                | SyncEvent::CaptureFailed { .. }
        )
    }
}

/// 事件统计信息
#[derive(Debug, Clone, Default)]
pub struct EventStats {
    /// 总事件数
    pub total_events: u64,
    /// 按类型分组的事件数
    pub events_by_type: HashMap<String, u64>,
    /// 最后事件时间
    pub last_event_time: Option<u64>,
}

/// 事件管理器
#[derive(Debug)]
pub struct EventManager {
    /// 广播发送器
    sender: broadcast::Sender<SyncEvent>,
    /// 事件统计
    stats: Arc<parking_lot::RwLock<EventStats>>,
}

impl EventManager {
    /// 创建新的事件管理器
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));

        Self {
            sender,
            stats: Arc::new(parking_lot::RwLock::new(EventStats::default())),
        }
    }

    /// 发布事件
    ///
    /// 同步方法：拦截器通知等同步路径也能直接发事件。
    pub fn emit(&self, event: SyncEvent) {
        debug!("Emitting event: {}", event.event_type());

        {
            let mut stats = self.stats.write();
            stats.total_events += 1;
            *stats
                .events_by_type
                .entry(event.event_type().to_string())
                .or_insert(0) += 1;
            stats.last_event_time = Some(event.timestamp());
        }

        // 无订阅者时 send 会失败，属正常场景（无 UI 的宿主），仅打 debug
        if let Err(e) = self.sender.send(event) {
            debug!("Failed to broadcast event (no active receivers): {}", e);
        }
    }

    /// 订阅事件
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// 获取统计信息
    pub fn get_stats(&self) -> EventStats {
        self.stats.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_reaches_subscriber_and_counts() {
        let manager = EventManager::new(16);
        let mut rx = manager.subscribe();

        manager.emit(SyncEvent::PullStarted { timestamp: 1 });
        manager.emit(SyncEvent::PullFailed {
            error: "offline".to_string(),
            timestamp: 2,
        });

        assert_eq!(rx.recv().await.unwrap(), SyncEvent::PullStarted { timestamp: 1 });
        let failed = rx.recv().await.unwrap();
        assert!(failed.is_failure());

        let stats = manager.get_stats();
        assert_eq!(stats.total_events, 2);
        assert_eq!(stats.events_by_type.get("pull_failed"), Some(&1));
        assert_eq!(stats.last_event_time, Some(2));
    }

    #[test]
    fn test_emit_without_subscribers_is_fine() {
        let manager = EventManager::new(4);
        manager.emit(SyncEvent::UiRevealed { timestamp: 7 });
        assert_eq!(manager.get_stats().total_events, 1);
    }
}
