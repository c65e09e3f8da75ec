//! 测试替身：可注入故障的远端存储、记录调用的 UI、内存身份提供方

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::{AuthError, AuthErrorCode, Result, StateSyncError};
use crate::identity::{Credentials, Identity, IdentityProvider};
use crate::overrides::OverrideValue;
use crate::storage::snapshot::DEFAULT_RESERVED_PATTERN;
use crate::storage::{LocalSnapshot, LocalStore, MemoryLocalStore, ReservedKeys};
use crate::sync::remote::{MemoryRemoteStore, RemoteDocument, RemoteRecordPatch, RemoteStore};
use crate::ui::{FieldKind, FieldRef, UiEventKind, UiSurface};

pub fn reserved_keys() -> ReservedKeys {
    ReservedKeys::new(DEFAULT_RESERVED_PATTERN).unwrap()
}

/// `{ "state": { .. } }` 形式的远端文档
pub fn state_doc(entries: &[(&str, &str)]) -> RemoteDocument {
    let state: serde_json::Map<String, Value> = entries
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect();
    let mut doc = RemoteDocument::new();
    doc.insert("state".to_string(), Value::Object(state));
    doc
}

/// 记录每次成功推送的远端存储
#[derive(Default)]
pub struct RecordingRemoteStore {
    inner: MemoryRemoteStore,
    pushes: Mutex<Vec<(String, LocalSnapshot)>>,
    push_delay: Mutex<Duration>,
    failing_pushes: AtomicU32,
    fail_gets: AtomicBool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    get_calls: AtomicUsize,
}

impl RecordingRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_document(&self, collection: &str, id: &str, doc: RemoteDocument) {
        self.inner.insert_document(collection, id, doc);
    }

    pub fn document(&self, collection: &str, id: &str) -> Option<RemoteDocument> {
        self.inner.document(collection, id)
    }

    /// 成功推送的 (身份, 快照)，按完成顺序
    pub fn pushes(&self) -> Vec<(String, LocalSnapshot)> {
        self.pushes.lock().clone()
    }

    pub fn set_push_delay(&self, delay: Duration) {
        *self.push_delay.lock() = delay;
    }

    /// 接下来的 `count` 次推送失败
    pub fn fail_next_pushes(&self, count: u32) {
        self.failing_pushes.store(count, Ordering::SeqCst);
    }

    pub fn set_fail_gets(&self, fail: bool) {
        self.fail_gets.store(fail, Ordering::SeqCst);
    }

    /// 观察到的最大并发推送数
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn get_count(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    async fn do_push(&self, collection: &str, id: &str, patch: RemoteRecordPatch) -> Result<()> {
        let delay = *self.push_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let should_fail = self
            .failing_pushes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(StateSyncError::Remote("injected push failure".to_string()));
        }

        let snapshot = patch.state.clone();
        self.inner.set_merged(collection, id, patch).await?;
        self.pushes.lock().push((id.to_string(), snapshot));
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for RecordingRemoteStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<RemoteDocument>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(StateSyncError::Remote("injected pull failure".to_string()));
        }
        self.inner.get(collection, id).await
    }

    async fn set_merged(&self, collection: &str, id: &str, patch: RemoteRecordPatch) -> Result<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let result = self.do_push(collection, id, patch).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// UI 调用记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiCall {
    Write(FieldRef, OverrideValue),
    Dispatch(FieldRef, UiEventKind),
    Blur(FieldRef),
    SetGatedVisible(bool),
    SetIdentityLabel(Option<String>),
    RequestReload,
}

impl UiCall {
    pub fn field(&self) -> Option<&str> {
        match self {
            UiCall::Write(f, _) | UiCall::Dispatch(f, _) | UiCall::Blur(f) => Some(&f.key),
            _ => None,
        }
    }
}

/// 可以让写入失败的本地存储
#[derive(Default)]
pub struct FlakyLocalStore {
    inner: MemoryLocalStore,
    fail_sets: AtomicBool,
}

impl FlakyLocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_sets(&self, fail: bool) {
        self.fail_sets.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

#[async_trait]
impl LocalStore for FlakyLocalStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        if self.fail_sets.load(Ordering::SeqCst) {
            return Err(StateSyncError::KvStore(format!("set {} rejected", key)));
        }
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.inner.remove(key).await
    }

    async fn clear(&self) -> Result<()> {
        self.inner.clear().await
    }

    async fn keys(&self) -> Result<Vec<String>> {
        self.inner.keys().await
    }
}

/// 记录所有调用的 UI
#[derive(Default)]
pub struct RecordingUi {
    fields: Mutex<HashMap<String, FieldKind>>,
    values: Mutex<HashMap<String, OverrideValue>>,
    calls: Mutex<Vec<UiCall>>,
    failing_dispatch: Mutex<Option<UiEventKind>>,
}

impl RecordingUi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_field(&self, key: &str, kind: FieldKind) {
        self.fields.lock().insert(key.to_string(), kind);
    }

    /// 之后该类型的派发都会失败（调用仍被记录）
    pub fn fail_dispatch(&self, kind: UiEventKind) {
        *self.failing_dispatch.lock() = Some(kind);
    }

    pub fn value_of(&self, key: &str) -> Option<OverrideValue> {
        self.values.lock().get(key).cloned()
    }

    pub fn calls(&self) -> Vec<UiCall> {
        self.calls.lock().clone()
    }

    pub fn reload_count(&self) -> usize {
        self.count(|c| matches!(c, UiCall::RequestReload))
    }

    pub fn reveal_count(&self) -> usize {
        self.count(|c| matches!(c, UiCall::SetGatedVisible(true)))
    }

    /// 最近一次门控区域可见性
    pub fn gated_visible(&self) -> Option<bool> {
        self.calls.lock().iter().rev().find_map(|c| match c {
            UiCall::SetGatedVisible(v) => Some(*v),
            _ => None,
        })
    }

    /// 最近一次身份标签
    pub fn identity_label(&self) -> Option<String> {
        self.calls
            .lock()
            .iter()
            .rev()
            .find_map(|c| match c {
                UiCall::SetIdentityLabel(label) => Some(label.clone()),
                _ => None,
            })
            .flatten()
    }

    fn count(&self, pred: impl Fn(&UiCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: UiCall) {
        self.calls.lock().push(call);
    }
}

impl UiSurface for RecordingUi {
    fn find_field(&self, key: &str) -> Option<FieldRef> {
        self.fields.lock().get(key).map(|kind| FieldRef {
            key: key.to_string(),
            kind: *kind,
        })
    }

    fn write_field(&self, field: &FieldRef, value: &OverrideValue) -> Result<()> {
        self.values.lock().insert(field.key.clone(), value.clone());
        self.record(UiCall::Write(field.clone(), value.clone()));
        Ok(())
    }

    fn dispatch(&self, field: &FieldRef, kind: UiEventKind) -> Result<()> {
        self.record(UiCall::Dispatch(field.clone(), kind));
        if *self.failing_dispatch.lock() == Some(kind) {
            return Err(StateSyncError::Ui(format!("dispatch {:?} rejected", kind)));
        }
        Ok(())
    }

    fn blur(&self, field: &FieldRef) -> Result<()> {
        self.record(UiCall::Blur(field.clone()));
        Ok(())
    }

    fn set_gated_visible(&self, visible: bool) -> Result<()> {
        self.record(UiCall::SetGatedVisible(visible));
        Ok(())
    }

    fn set_identity_label(&self, label: Option<&str>) -> Result<()> {
        self.record(UiCall::SetIdentityLabel(label.map(str::to_string)));
        Ok(())
    }

    fn request_reload(&self) -> Result<()> {
        self.record(UiCall::RequestReload);
        Ok(())
    }
}

/// 内存身份提供方
pub struct MockIdentityProvider {
    current: Mutex<Option<Identity>>,
    accounts: Mutex<HashMap<String, (String, Identity)>>,
    unavailable: AtomicBool,
    sender: broadcast::Sender<Option<Identity>>,
}

impl Default for MockIdentityProvider {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self {
            current: Mutex::new(None),
            accounts: Mutex::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
            sender,
        }
    }
}

impl MockIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_account(&self, email: &str, password: &str, id: &str) {
        self.accounts.lock().insert(
            email.to_string(),
            (password.to_string(), Identity::new(id).with_label(email)),
        );
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// 模拟外部会话变化（如另一处登录或令牌过期）
    pub fn set_current(&self, identity: Option<Identity>) {
        *self.current.lock() = identity.clone();
        let _ = self.sender.send(identity);
    }

    fn check_available(&self) -> std::result::Result<(), AuthError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AuthError::new(AuthErrorCode::Unavailable, "identity service offline"));
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityProvider for MockIdentityProvider {
    fn current(&self) -> Option<Identity> {
        self.current.lock().clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<Option<Identity>> {
        self.sender.subscribe()
    }

    async fn sign_in(&self, credentials: &Credentials) -> std::result::Result<Identity, AuthError> {
        self.check_available()?;
        let identity = match self.accounts.lock().get(&credentials.email) {
            Some((password, identity)) if *password == credentials.password => identity.clone(),
            _ => return Err(AuthError::new(AuthErrorCode::InvalidCredentials, "wrong email or password")),
        };
        self.set_current(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_up(&self, credentials: &Credentials) -> std::result::Result<Identity, AuthError> {
        self.check_available()?;
        if self.accounts.lock().contains_key(&credentials.email) {
            return Err(AuthError::new(AuthErrorCode::EmailAlreadyInUse, "email already in use"));
        }
        let id = format!("uid-{}", self.accounts.lock().len() + 1);
        self.add_account(&credentials.email, &credentials.password, &id);
        let identity = Identity::new(id).with_label(credentials.email.clone());
        self.set_current(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_out(&self) -> std::result::Result<(), AuthError> {
        self.check_available()?;
        self.set_current(None);
        Ok(())
    }
}
