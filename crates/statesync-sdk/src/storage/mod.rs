//! 本地存储模块
//!
//! 本模块提供：
//! - `LocalStore` 能力抽象（get / set / remove / clear / keys）
//! - 基于 sled 的持久化实现与内存实现
//! - 快照采集与保留键过滤
//! - 变更拦截器（每次写入都触发同步调度）
//! - 会话级「首次拉取已完成」标记

pub mod interceptor;
pub mod kv;
pub mod memory;
pub mod session_marker;
pub mod snapshot;

pub use interceptor::{InterceptedStore, MutationObserver};
pub use kv::SledLocalStore;
pub use memory::MemoryLocalStore;
pub use session_marker::SessionMarker;
pub use snapshot::{LocalSnapshot, ReservedKeys};

use crate::error::Result;
use async_trait::async_trait;

/// 客户端本地键值存储
///
/// 键和值都是字符串。`set` / `remove` / `clear` 是可被拦截的三个变更操作。
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    async fn clear(&self) -> Result<()>;

    /// 当前所有键（顺序不保证）
    async fn keys(&self) -> Result<Vec<String>>;
}
