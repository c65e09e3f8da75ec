//! 会话控制器
//!
//! ```text
//! SignedOut ──sign_in/sign_up──▶ Authenticating ──ok──▶ SignedIn
//!     ▲                                │                   │
//!     └────────────失败────────────────┘                   │
//!     └──────────────────────sign_out / 会话失效───────────┘
//! ```
//!
//! 进入 SignedIn 时驱动首次拉取，就绪后每个登录周期只显示一次门控 UI；
//! 进入 SignedOut 时重置显示标记、取消待推送，但本会话的首次拉取标记保留。

use std::sync::{Arc, Weak};

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{AuthError, AuthErrorCode, Result, StateSyncError};
use crate::events::{now_millis, EventManager, SyncEvent};
use crate::identity::{Credentials, Identity, IdentityProvider};
use crate::sync::{PullGate, PullOutcome, SyncScheduler};
use crate::sync_state::{GatePhase, SessionStatus, SyncStateManager};
use crate::ui::UiSurface;

pub struct SessionController {
    me: Weak<SessionController>,
    state: SyncStateManager,
    provider: Arc<dyn IdentityProvider>,
    gate: Arc<PullGate>,
    scheduler: Arc<SyncScheduler>,
    ui: Arc<dyn UiSurface>,
    events: Arc<EventManager>,
    /// 会话切换串行化（显式登录与会话通知可能同时到达）
    transition_lock: tokio::sync::Mutex<()>,
    listener: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl SessionController {
    pub fn new(
        state: SyncStateManager,
        provider: Arc<dyn IdentityProvider>,
        gate: Arc<PullGate>,
        scheduler: Arc<SyncScheduler>,
        ui: Arc<dyn UiSurface>,
        events: Arc<EventManager>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            state,
            provider,
            gate,
            scheduler,
            ui,
            events,
            transition_lock: tokio::sync::Mutex::new(()),
            listener: parking_lot::Mutex::new(None),
        })
    }

    /// 开始监听身份提供方的会话变化
    ///
    /// 启动时先按当前身份处理一次（同一会话内重新进入时身份往往已经存在）。
    pub fn start(&self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| StateSyncError::Runtime(format!("没有可用的 tokio 运行时: {}", e)))?;

        let mut listener = self.listener.lock();
        if listener.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            debug!("会话监听已在运行");
            return Ok(());
        }

        let mut rx = self.provider.subscribe();
        let initial = self.provider.current();
        let me = self.me.clone();

        *listener = Some(runtime.spawn(async move {
            if let Some(controller) = me.upgrade() {
                controller.handle_notification(initial).await;
            }

            loop {
                let identity = match rx.recv().await {
                    Ok(identity) => identity,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("会话通知积压，跳过 {} 条，按当前身份重新同步", skipped);
                        match me.upgrade() {
                            Some(controller) => controller.provider.current(),
                            None => break,
                        }
                    }
                    Err(RecvError::Closed) => {
                        debug!("身份提供方已关闭会话通知");
                        break;
                    }
                };

                match me.upgrade() {
                    Some(controller) => controller.handle_notification(identity).await,
                    None => break,
                }
            }
        }));

        info!("✅ 会话监听已启动");
        Ok(())
    }

    /// 停止监听
    pub fn stop(&self) {
        if let Some(handle) = self.listener.lock().take() {
            handle.abort();
            info!("会话监听已停止");
        }
    }

    async fn handle_notification(&self, identity: Option<Identity>) {
        if let Err(e) = self.on_session_changed(identity).await {
            warn!("处理会话变化失败: {}", e);
        }
    }

    /// 处理一次会话变化；`None` 表示已登出
    ///
    /// 登录时返回首次拉取的错误（已记录到状态和事件中）。
    pub async fn on_session_changed(&self, identity: Option<Identity>) -> Result<()> {
        let _guard = self.transition_lock.lock().await;
        match identity {
            Some(identity) => self.enter_signed_in(identity).await,
            None => {
                self.enter_signed_out();
                Ok(())
            }
        }
    }

    async fn enter_signed_in(&self, identity: Identity) -> Result<()> {
        let same_identity = self.state.identity_id().as_deref() == Some(identity.id.as_str());
        if same_identity && self.state.phase() != GatePhase::Uninitialized {
            // 重复通知：只刷新标签
            self.state.bind_identity(identity);
            return Ok(());
        }

        info!("会话开始: id={}", identity.id);
        let identity_id = identity.id.clone();
        self.state.bind_identity(identity);
        self.events.emit(SyncEvent::SessionChanged {
            signed_in: true,
            identity_id: Some(identity_id),
            timestamp: now_millis(),
        });

        self.gate.pull(true).await?;
        self.reveal_once();
        Ok(())
    }

    fn enter_signed_out(&self) {
        if self.state.session() == SessionStatus::SignedOut && self.state.identity().is_none() {
            debug!("已是登出状态，忽略");
            return;
        }

        info!("会话结束");
        self.scheduler.cancel_pending();
        self.state.unbind_identity();

        if let Err(e) = self.ui.set_gated_visible(false) {
            warn!("隐藏门控区域失败: {}", e);
        }
        if let Err(e) = self.ui.set_identity_label(None) {
            warn!("清空身份标签失败: {}", e);
        }

        self.events.emit(SyncEvent::SessionChanged {
            signed_in: false,
            identity_id: None,
            timestamp: now_millis(),
        });
        self.events.emit(SyncEvent::UiHidden {
            timestamp: now_millis(),
        });
    }

    /// 宿主显式拉取；成功后若本登录周期还没显示门控 UI 则显示
    pub async fn refresh(&self, should_reload_if_first: bool) -> Result<PullOutcome> {
        let _guard = self.transition_lock.lock().await;
        let outcome = self.gate.pull(should_reload_if_first).await?;
        self.reveal_once();
        Ok(outcome)
    }

    /// 门控就绪后显示 UI；每个登录周期只显示一次
    fn reveal_once(&self) {
        if !self.state.is_ready() || !self.state.try_mark_revealed() {
            return;
        }

        let label = self.state.identity().and_then(|i| i.display_label);

        if let Err(e) = self.ui.set_gated_visible(true) {
            warn!("显示门控区域失败: {}", e);
        }
        if let Some(label) = &label {
            if let Err(e) = self.ui.set_identity_label(Some(&format!("Signed in as {}", label))) {
                warn!("更新身份标签失败: {}", e);
            }
        }

        self.events.emit(SyncEvent::AuthSucceeded {
            display_label: label,
            timestamp: now_millis(),
        });
        self.events.emit(SyncEvent::UiRevealed {
            timestamp: now_millis(),
        });
        info!("✅ 门控 UI 已显示");
    }

    /// 邮箱密码登录
    pub async fn sign_in(&self, credentials: &Credentials) -> Result<Identity> {
        self.authenticate(credentials, false).await
    }

    /// 注册；邮箱已被注册时回退为登录
    pub async fn sign_up(&self, credentials: &Credentials) -> Result<Identity> {
        self.authenticate(credentials, true).await
    }

    pub async fn sign_out(&self) -> Result<()> {
        self.provider.sign_out().await.map_err(|e| {
            error!("登出失败: {}", e);
            StateSyncError::Auth(e)
        })?;
        self.on_session_changed(None).await
    }

    async fn authenticate(&self, credentials: &Credentials, sign_up: bool) -> Result<Identity> {
        if credentials.email.is_empty() || credentials.password.is_empty() {
            return Err(self.auth_failed(AuthError::new(
                AuthErrorCode::InvalidCredentials,
                "email and password are required",
            )));
        }

        let previous = self.state.session();
        self.state.set_session(SessionStatus::Authenticating);

        let result = if sign_up {
            match self.provider.sign_up(credentials).await {
                Err(e) if e.code == AuthErrorCode::EmailAlreadyInUse => {
                    info!("邮箱已注册，改为登录: {}", credentials.email);
                    self.provider.sign_in(credentials).await
                }
                other => other,
            }
        } else {
            self.provider.sign_in(credentials).await
        };

        match result {
            Ok(identity) => {
                if let Err(e) = self.on_session_changed(Some(identity.clone())).await {
                    // 认证本身成功；首次拉取失败已记录，下次触发时重试
                    warn!("登录成功但首次拉取失败: {}", e);
                }
                Ok(identity)
            }
            Err(e) => {
                self.state.set_session(previous);
                Err(self.auth_failed(e))
            }
        }
    }

    fn auth_failed(&self, error: AuthError) -> StateSyncError {
        warn!("认证失败: {}", error);
        self.events.emit(SyncEvent::AuthFailed {
            error: error.to_string(),
            timestamp: now_millis(),
        });
        StateSyncError::Auth(error)
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(handle) = self.listener.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{InterceptedStore, LocalStore, MemoryLocalStore, SessionMarker};
    use crate::sync::{PushRetryPolicy, RemoteSyncAdapter, SchedulerConfig};
    use crate::test_support::{reserved_keys, state_doc, MockIdentityProvider, RecordingRemoteStore, RecordingUi};
    use std::time::Duration;

    struct Harness {
        raw: Arc<MemoryLocalStore>,
        remote: Arc<RecordingRemoteStore>,
        ui: Arc<RecordingUi>,
        provider: Arc<MockIdentityProvider>,
        state: SyncStateManager,
        events: Arc<EventManager>,
        store: InterceptedStore,
        controller: Arc<SessionController>,
    }

    fn harness() -> Harness {
        let raw = Arc::new(MemoryLocalStore::new());
        let remote = Arc::new(RecordingRemoteStore::new());
        let ui = Arc::new(RecordingUi::new());
        let provider = Arc::new(MockIdentityProvider::new());
        provider.add_account("a@b.c", "secret", "u1");
        let state = SyncStateManager::new();
        let events = Arc::new(EventManager::new(64));
        let adapter = RemoteSyncAdapter::new(remote.clone(), "app_state");
        let config = SchedulerConfig::default();
        let scheduler = SyncScheduler::new(
            config.clone(),
            PushRetryPolicy::disabled(),
            state.clone(),
            raw.clone(),
            reserved_keys(),
            adapter.clone(),
            events.clone(),
        );
        let store = InterceptedStore::new(raw.clone(), scheduler.clone(), config.mutation_hint());
        let gate = Arc::new(PullGate::new(
            state.clone(),
            adapter,
            raw.clone(),
            reserved_keys(),
            SessionMarker::new(Arc::new(MemoryLocalStore::new())),
            scheduler.clone(),
            ui.clone(),
            events.clone(),
        ));
        let controller = SessionController::new(
            state.clone(),
            provider.clone(),
            gate,
            scheduler,
            ui.clone(),
            events.clone(),
        );
        Harness {
            raw,
            remote,
            ui,
            provider,
            state,
            events,
            store,
            controller,
        }
    }

    fn creds() -> Credentials {
        Credentials::new(" a@b.c ", "secret")
    }

    #[tokio::test(start_paused = true)]
    async fn test_sign_in_pulls_then_reveals_once() {
        let h = harness();
        h.remote.insert_document("app_state", "u1", state_doc(&[("a", "1")]));
        h.raw.set("b", "2").await.unwrap();

        let identity = h.controller.sign_in(&creds()).await.unwrap();
        assert_eq!(identity.id, "u1");

        assert!(h.state.is_ready());
        assert_eq!(h.raw.entries().len(), 1);
        assert_eq!(h.ui.reload_count(), 1);
        assert_eq!(h.ui.reveal_count(), 1);
        assert_eq!(h.ui.identity_label().as_deref(), Some("Signed in as a@b.c"));

        // 重复通知不会再次拉取或显示
        h.controller.on_session_changed(Some(identity)).await.unwrap();
        assert_eq!(h.ui.reveal_count(), 1);
        assert_eq!(h.remote.get_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sign_out_resets_reveal_guard_but_keeps_first_pull() {
        let h = harness();
        h.controller.sign_in(&creds()).await.unwrap();
        assert!(h.state.first_pull_completed());

        h.controller.sign_out().await.unwrap();
        let state = h.state.get_state();
        assert_eq!(state.session, SessionStatus::SignedOut);
        assert!(!state.ui_revealed);
        assert!(state.first_pull_completed);
        assert_eq!(h.ui.gated_visible(), Some(false));
        assert_eq!(h.ui.identity_label(), None);

        // 登出后本地写入不推送
        h.store.set("k", "v").await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(h.remote.pushes().is_empty());

        // 再次登录重新显示
        h.controller.sign_in(&creds()).await.unwrap();
        assert_eq!(h.ui.reveal_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switching_identity_reveals_again_with_new_label() {
        let h = harness();
        h.controller.sign_in(&creds()).await.unwrap();
        assert_eq!(h.ui.reveal_count(), 1);

        // 未经登出直接换成另一个身份
        h.controller
            .on_session_changed(Some(Identity::new("u2").with_label("c@d.e")))
            .await
            .unwrap();
        assert!(h.state.is_ready());
        assert_eq!(h.state.identity_id().as_deref(), Some("u2"));
        assert_eq!(h.ui.reveal_count(), 2);
        assert_eq!(h.ui.identity_label().as_deref(), Some("Signed in as c@d.e"));
    }

    #[tokio::test]
    async fn test_failed_sign_in_leaves_state_untouched() {
        let h = harness();
        let mut rx = h.events.subscribe();
        let before = h.state.get_state();

        let err = h
            .controller
            .sign_in(&Credentials::new("a@b.c", "wrong"))
            .await
            .unwrap_err();
        assert_eq!(err.auth_code(), Some(AuthErrorCode::InvalidCredentials));

        let after = h.state.get_state();
        assert_eq!(after.session, before.session);
        assert_eq!(after.phase, before.phase);
        assert!(after.identity.is_none());
        assert!(matches!(rx.try_recv(), Ok(SyncEvent::AuthFailed { .. })));
        assert_eq!(h.ui.reveal_count(), 0);
    }

    #[tokio::test]
    async fn test_sign_up_falls_back_to_sign_in() {
        let h = harness();
        let identity = h.controller.sign_up(&creds()).await.unwrap();
        assert_eq!(identity.id, "u1", "已注册邮箱回退为登录");
        assert!(h.state.is_ready());

        let fresh = h
            .controller
            .sign_up(&Credentials::new("new@b.c", "pw"))
            .await
            .unwrap();
        assert_ne!(fresh.id, "u1");
        assert_eq!(h.state.identity_id(), Some(fresh.id));
    }

    #[tokio::test]
    async fn test_pull_failure_on_sign_in_keeps_ui_gated() {
        let h = harness();
        h.remote.set_fail_gets(true);

        h.controller.sign_in(&creds()).await.unwrap();
        assert_eq!(h.state.phase(), GatePhase::Uninitialized);
        assert_eq!(h.ui.reveal_count(), 0);

        // 同一身份的下一次通知重试拉取
        h.remote.set_fail_gets(false);
        h.controller
            .on_session_changed(h.provider.current())
            .await
            .unwrap();
        assert!(h.state.is_ready());
        assert_eq!(h.ui.reveal_count(), 1);
    }

    #[tokio::test]
    async fn test_listener_follows_provider_sessions() {
        let h = harness();
        h.controller.start().unwrap();

        h.provider.set_current(Some(Identity::new("u9").with_label("x@y.z")));
        for _ in 0..50 {
            if h.state.is_ready() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(h.state.is_ready());
        assert_eq!(h.state.identity_id().as_deref(), Some("u9"));

        h.provider.set_current(None);
        for _ in 0..50 {
            if h.state.session() == SessionStatus::SignedOut {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(h.state.session(), SessionStatus::SignedOut);
        h.controller.stop();
    }
}
