//! StateSync SDK - 本地键值存储与远端单文档的最终一致同步引擎
//!
//! 本 SDK 提供：
//! - 🔗 本地存储变更拦截：每一次写入都成为隐式的同步触发
//! - ⏱️ 防抖推送：密集变更合并为一次推送，推送严格串行
//! - 🚧 首次拉取门控：新登录的客户端绝不会用空的本地快照覆盖远端数据
//! - 📝 字段覆盖值：捕获宿主自己不持久化的 UI 字段，拉取后回放
//! - ⚙️ 事件系统：推送 / 拉取 / 会话状态统一广播
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use statesync_sdk::{Capabilities, LocalStore, StateSyncConfig, StateSyncSDK};
//! # use statesync_sdk::{IdentityProvider, RemoteStore, UiSurface};
//! # async fn run(
//! #     identity: Arc<dyn IdentityProvider>,
//! #     remote: Arc<dyn RemoteStore>,
//! #     ui: Arc<dyn UiSurface>,
//! # ) -> statesync_sdk::Result<()> {
//! let config = StateSyncConfig::builder()
//!     .data_dir("/path/to/data")
//!     .collection("app_state")
//!     .build();
//!
//! let sdk = StateSyncSDK::initialize(config, Capabilities::new(identity, remote, ui)).await?;
//! sdk.start()?;
//!
//! // 登录后自动拉取；就绪之后的本地写入会被防抖推送
//! sdk.sign_in("someone@example.com", "password").await?;
//! sdk.local_store().set("theme", "dark").await?;
//!
//! sdk.shutdown().await?;
//! # Ok(())
//! # }
//! ```

// 导出核心模块
pub mod error;
pub mod events;
pub mod identity;
pub mod lifecycle;
pub mod overrides;
pub mod sdk;
pub mod session;
pub mod storage;
pub mod sync;
pub mod sync_state;
pub mod ui;
pub mod version;

#[cfg(test)]
mod test_support;

// 重新导出核心类型，方便使用
pub use error::{AuthError, AuthErrorCode, Result, StateSyncError};
pub use events::{EventManager, EventStats, SyncEvent};
pub use identity::{Credentials, Identity, IdentityProvider};
pub use lifecycle::{LifecycleHook, LifecycleManager};
pub use overrides::{FieldEvent, OverrideBag, OverrideValue, ReplayConfig};
pub use sdk::{Capabilities, EventConfig, StateSyncConfig, StateSyncConfigBuilder, StateSyncSDK};
pub use session::SessionController;
pub use storage::{InterceptedStore, LocalSnapshot, LocalStore, MemoryLocalStore, ReservedKeys, SledLocalStore};
pub use sync::{
    FlushOutcome, MemoryRemoteStore, PullOutcome, PushRetryPolicy, RemoteDocument, RemoteRecordPatch, RemoteStore,
    RemoteSummary, SchedulerConfig, TimestampValue,
};
pub use sync_state::{GatePhase, OperationStatus, SessionStatus, SyncState, SyncStateManager};
pub use ui::{FieldKind, FieldRef, UiEventKind, UiSurface};
pub use version::SDK_VERSION;
