//! 本地存储变更拦截器
//!
//! 包装一个 `LocalStore`，对外暴露同样的接口；`set` / `remove` / `clear`
//! 完成后（无论成功与否）都会通知观察者，让每一次本地写入都成为隐式的同步触发。
//! 底层操作的错误原样返回；通知失败只记录日志，不回滚已经发生的写入。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::error::Result;
use crate::storage::LocalStore;

/// 本地变更观察者（通常是同步调度器）
pub trait MutationObserver: Send + Sync {
    /// 本地存储发生了变更，`hint` 为期望的防抖延迟
    fn on_local_mutation(&self, hint: Duration) -> Result<()>;
}

/// 带变更通知的本地存储
#[derive(Clone)]
pub struct InterceptedStore {
    inner: Arc<dyn LocalStore>,
    observer: Arc<dyn MutationObserver>,
    hint: Duration,
}

impl InterceptedStore {
    pub fn new(inner: Arc<dyn LocalStore>, observer: Arc<dyn MutationObserver>, hint: Duration) -> Self {
        Self {
            inner,
            observer,
            hint,
        }
    }

    /// 未被拦截的原始存储（apply 与保留键清理专用）
    pub fn raw(&self) -> &Arc<dyn LocalStore> {
        &self.inner
    }

    fn notify(&self, op: &str) {
        if let Err(e) = self.observer.on_local_mutation(self.hint) {
            warn!("本地变更通知失败（{} 已生效）: {}", op, e);
        }
    }
}

#[async_trait]
impl LocalStore for InterceptedStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let result = self.inner.set(key, value).await;
        self.notify("set");
        result
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let result = self.inner.remove(key).await;
        self.notify("remove");
        result
    }

    async fn clear(&self) -> Result<()> {
        let result = self.inner.clear().await;
        self.notify("clear");
        result
    }

    async fn keys(&self) -> Result<Vec<String>> {
        self.inner.keys().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StateSyncError;
    use crate::storage::MemoryLocalStore;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingObserver {
        hints: Mutex<Vec<Duration>>,
        fail: bool,
    }

    impl MutationObserver for RecordingObserver {
        fn on_local_mutation(&self, hint: Duration) -> Result<()> {
            self.hints.lock().push(hint);
            if self.fail {
                return Err(StateSyncError::Runtime("observer down".to_string()));
            }
            Ok(())
        }
    }

    struct FailingStore;

    #[async_trait]
    impl LocalStore for FailingStore {
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            Ok(None)
        }
        async fn set(&self, _key: &str, _value: &str) -> Result<()> {
            Err(StateSyncError::KvStore("quota exceeded".to_string()))
        }
        async fn remove(&self, _key: &str) -> Result<()> {
            Ok(())
        }
        async fn clear(&self) -> Result<()> {
            Ok(())
        }
        async fn keys(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_every_mutation_notifies() {
        let observer = Arc::new(RecordingObserver::default());
        let store = InterceptedStore::new(
            Arc::new(MemoryLocalStore::new()),
            observer.clone(),
            Duration::from_millis(800),
        );

        store.set("a", "1").await.unwrap();
        store.remove("a").await.unwrap();
        store.clear().await.unwrap();
        let _ = store.get("a").await.unwrap();
        let _ = store.keys().await.unwrap();

        let hints = observer.hints.lock();
        assert_eq!(hints.len(), 3);
        assert!(hints.iter().all(|h| *h == Duration::from_millis(800)));
    }

    #[tokio::test]
    async fn test_failed_write_still_notifies_and_propagates() {
        let observer = Arc::new(RecordingObserver::default());
        let store = InterceptedStore::new(Arc::new(FailingStore), observer.clone(), Duration::from_millis(800));

        let err = store.set("a", "1").await.unwrap_err();
        assert!(matches!(err, StateSyncError::KvStore(_)));
        assert_eq!(observer.hints.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_failing_observer_does_not_roll_back() {
        let observer = Arc::new(RecordingObserver {
            fail: true,
            ..Default::default()
        });
        let inner = Arc::new(MemoryLocalStore::new());
        let store = InterceptedStore::new(inner.clone(), observer, Duration::from_millis(800));

        store.set("kept", "yes").await.unwrap();
        assert_eq!(inner.get("kept").await.unwrap().as_deref(), Some("yes"));
    }
}
