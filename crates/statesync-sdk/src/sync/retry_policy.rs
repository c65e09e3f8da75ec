use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::StateSyncError;

/// 同步失败原因分类
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncFailureReason {
    /// 远端不可达 - 可重试
    RemoteUnavailable,
    /// 未登录 - 不重试，等下次登录
    NotSignedIn,
    /// 数据无法序列化 - 不重试
    Serialization,
    /// 本地存储错误 - 不重试
    LocalStore,
    /// 未知错误
    Unknown(String),
}

impl SyncFailureReason {
    /// 根据错误分类
    pub fn classify(error: &StateSyncError) -> Self {
        match error {
            StateSyncError::Push(_) | StateSyncError::Pull(_) | StateSyncError::Remote(_) => {
                SyncFailureReason::RemoteUnavailable
            }
            StateSyncError::NotSignedIn | StateSyncError::Auth(_) => SyncFailureReason::NotSignedIn,
            StateSyncError::Serialization(_) => SyncFailureReason::Serialization,
            StateSyncError::KvStore(_) | StateSyncError::IO(_) => SyncFailureReason::LocalStore,
            other => SyncFailureReason::Unknown(other.to_string()),
        }
    }

    /// 判断是否可以重试
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncFailureReason::RemoteUnavailable => true,
            SyncFailureReason::NotSignedIn => false,
            SyncFailureReason::Serialization => false,
            SyncFailureReason::LocalStore => false,
            SyncFailureReason::Unknown(_) => true, // 保守策略：未知错误可重试
        }
    }
}

/// 推送重试策略
///
/// 推送失败后在有限次数内按指数退避重新调度；任何新的本地变更都会顶替待执行的重试。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRetryPolicy {
    /// 最大重试次数（0 表示不主动重试，只等下一次本地编辑）
    pub max_retries: u32,
    /// 基础延迟（毫秒）
    pub base_delay_ms: u64,
    /// 最大延迟（毫秒）
    pub max_delay_ms: u64,
    /// 指数退避因子
    pub backoff_factor: f64,
    /// 随机抖动因子 (0.0-1.0)
    pub jitter_factor: f64,
}

impl Default for PushRetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_factor: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl PushRetryPolicy {
    /// 不做主动重试
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// 检查是否应该重试（`attempt` 为已经失败的次数，从 1 开始）
    pub fn should_retry(&self, attempt: u32, reason: &SyncFailureReason) -> bool {
        attempt <= self.max_retries && reason.is_retryable()
    }

    /// 计算第 `attempt` 次失败后的重试延迟
    pub fn next_delay(&self, attempt: u32, reason: &SyncFailureReason) -> Option<Duration> {
        if !self.should_retry(attempt, reason) {
            return None;
        }

        // 基础延迟 = base_delay * (backoff_factor ^ (attempt - 1))
        let exp = attempt.saturating_sub(1) as f64;
        let base_delay = self.base_delay_ms as f64 * self.backoff_factor.powf(exp);
        let capped_delay = base_delay.min(self.max_delay_ms as f64);

        let jitter = capped_delay * self.jitter_factor * (rand::random::<f64>() - 0.5);
        let final_delay = (capped_delay + jitter).max(0.0);

        Some(Duration::from_millis(final_delay as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_classification() {
        let remote = SyncFailureReason::classify(&StateSyncError::Push("timeout".to_string()));
        assert_eq!(remote, SyncFailureReason::RemoteUnavailable);
        assert!(remote.is_retryable());

        let signed_out = SyncFailureReason::classify(&StateSyncError::NotSignedIn);
        assert!(!signed_out.is_retryable());
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = PushRetryPolicy {
            jitter_factor: 0.0,
            max_delay_ms: 3000,
            ..PushRetryPolicy::default()
        };
        let reason = SyncFailureReason::RemoteUnavailable;

        assert_eq!(policy.next_delay(1, &reason), Some(Duration::from_millis(1000)));
        assert_eq!(policy.next_delay(2, &reason), Some(Duration::from_millis(2000)));
        assert_eq!(policy.next_delay(3, &reason), Some(Duration::from_millis(3000)));
        assert_eq!(policy.next_delay(4, &reason), None, "超过最大次数");
    }

    #[test]
    fn test_disabled_policy_never_retries() {
        let policy = PushRetryPolicy::disabled();
        assert!(policy
            .next_delay(1, &SyncFailureReason::RemoteUnavailable)
            .is_none());
    }
}
