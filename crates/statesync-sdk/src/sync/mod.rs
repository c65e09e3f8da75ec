//! 同步模块
//!
//! - `remote`: 快照与远端记录之间的推送 / 拉取
//! - `pull_gate`: 首次拉取门控，决定是否允许自动保存、是否需要重载
//! - `scheduler`: 防抖推送调度，保证推送串行
//! - `retry_policy`: 推送失败的分类与有限次退避重试

pub mod pull_gate;
pub mod remote;
pub mod retry_policy;
pub mod scheduler;

pub use pull_gate::{PullGate, PullOutcome};
pub use remote::{
    MemoryRemoteStore, PullResult, RemoteDocument, RemoteRecord, RemoteRecordPatch, RemoteStore, RemoteSummary,
    RemoteSyncAdapter, TimestampValue,
};
pub use retry_policy::{PushRetryPolicy, SyncFailureReason};
pub use scheduler::{FlushOutcome, FlushTrigger, SchedulerConfig, SyncScheduler};
