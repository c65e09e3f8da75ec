//! UI 生命周期管理
//!
//! 宿主在界面加载完成、界面被隐藏（切到后台、关闭标签页前）时通知引擎，
//! 由这里统一分发给各模块。

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::Result;

/// 生命周期回调 Hook
#[async_trait]
pub trait LifecycleHook: Send + Sync {
    /// 界面加载完成
    async fn on_ui_loaded(&self) -> Result<()>;

    /// 界面被隐藏
    async fn on_ui_hidden(&self) -> Result<()>;
}

#[derive(Clone, Copy, Debug)]
enum LifecycleEvent {
    UiLoaded,
    UiHidden,
}

impl std::fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleEvent::UiLoaded => write!(f, "界面加载"),
            LifecycleEvent::UiHidden => write!(f, "界面隐藏"),
        }
    }
}

/// 生命周期管理器
pub struct LifecycleManager {
    hooks: Vec<Arc<dyn LifecycleHook>>,
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }

    pub fn register_hook(&mut self, hook: Arc<dyn LifecycleHook>) {
        self.hooks.push(hook);
        info!("✅ 生命周期 Hook 已注册: 当前共 {} 个", self.hooks.len());
    }

    /// 通知所有 Hook：界面加载完成
    ///
    /// 按注册顺序执行，某个 Hook 失败会记录错误但继续执行其他 Hook
    pub async fn notify_ui_loaded(&self) -> Result<()> {
        self.notify(LifecycleEvent::UiLoaded).await
    }

    /// 通知所有 Hook：界面被隐藏
    pub async fn notify_ui_hidden(&self) -> Result<()> {
        self.notify(LifecycleEvent::UiHidden).await
    }

    async fn notify(&self, event: LifecycleEvent) -> Result<()> {
        info!("🔄 通知所有模块：{}", event);

        let mut errors = Vec::new();
        for (index, hook) in self.hooks.iter().enumerate() {
            let result = match event {
                LifecycleEvent::UiLoaded => hook.on_ui_loaded().await,
                LifecycleEvent::UiHidden => hook.on_ui_hidden().await,
            };
            if let Err(e) = result {
                warn!("⚠️ Hook #{} {}处理失败: {}", index, event, e);
                errors.push(e);
            }
        }

        // 返回第一个错误，但所有模块都已尝试执行
        if let Some(first) = errors.into_iter().next() {
            return Err(first);
        }

        info!("✅ 所有模块{}处理完成", event);
        Ok(())
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

mod replay_hook;
pub use replay_hook::{FlushOnHideHook, OverrideReplayHook};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StateSyncError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHook {
        loaded: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl LifecycleHook for CountingHook {
        async fn on_ui_loaded(&self) -> Result<()> {
            self.loaded.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(StateSyncError::Ui("boom".to_string()));
            }
            Ok(())
        }

        async fn on_ui_hidden(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failing_hook_does_not_stop_others() {
        let failing = Arc::new(CountingHook {
            loaded: AtomicUsize::new(0),
            fail: true,
        });
        let healthy = Arc::new(CountingHook {
            loaded: AtomicUsize::new(0),
            fail: false,
        });

        let mut manager = LifecycleManager::new();
        manager.register_hook(failing.clone());
        manager.register_hook(healthy.clone());
        assert_eq!(manager.hook_count(), 2);

        assert!(manager.notify_ui_loaded().await.is_err());
        assert_eq!(failing.loaded.load(Ordering::SeqCst), 1);
        assert_eq!(healthy.loaded.load(Ordering::SeqCst), 1);
        assert!(manager.notify_ui_hidden().await.is_ok());
    }
}
