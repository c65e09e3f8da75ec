//! 身份提供方能力
//!
//! 同步引擎不实现认证，只消费一个能给出稳定身份标识、并在会话变化时发出通知的能力。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::AuthError;

/// 已认证的身份
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// 稳定的身份 ID（远端记录按它隔离）
    pub id: String,
    /// 展示用标签（通常是邮箱）
    pub display_label: Option<String>,
}

impl Identity {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self {
            id: id.into(),
            display_label: None,
        }
    }

    pub fn with_label<S: Into<String>>(mut self, label: S) -> Self {
        self.display_label = Some(label.into());
        self
    }
}

/// 登录凭据
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    /// 邮箱去掉首尾空白，密码原样保留
    pub fn new(email: &str, password: &str) -> Self {
        Self {
            email: email.trim().to_string(),
            password: password.to_string(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"***")
            .finish()
    }
}

/// 身份提供方
///
/// `subscribe` 返回的通道在每次会话变化时推送最新身份（`None` 表示已登出）。
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// 当前已绑定的身份
    fn current(&self) -> Option<Identity>;

    /// 订阅会话变化
    fn subscribe(&self) -> broadcast::Receiver<Option<Identity>>;

    async fn sign_in(&self, credentials: &Credentials) -> std::result::Result<Identity, AuthError>;

    async fn sign_up(&self, credentials: &Credentials) -> std::result::Result<Identity, AuthError>;

    async fn sign_out(&self) -> std::result::Result<(), AuthError>;
}
