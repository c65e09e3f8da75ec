//! SDK 版本元信息

/// SDK semver，来自 Cargo.toml
///
/// 禁止手写版本号，必须用 `env!("CARGO_PKG_VERSION")` 与 Cargo.toml 保持同步。
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// 包名，用于日志与状态摘要
pub const SDK_NAME: &str = env!("CARGO_PKG_NAME");
