use std::fmt;

/// 认证失败的分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AuthErrorCode {
    /// 邮箱已被注册（注册时可回退到登录）
    EmailAlreadyInUse,
    /// 账号或密码错误
    InvalidCredentials,
    /// 身份服务不可用
    Unavailable,
    /// 其他错误
    Other,
}

impl fmt::Display for AuthErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthErrorCode::EmailAlreadyInUse => write!(f, "email-already-in-use"),
            AuthErrorCode::InvalidCredentials => write!(f, "invalid-credentials"),
            AuthErrorCode::Unavailable => write!(f, "unavailable"),
            AuthErrorCode::Other => write!(f, "other"),
        }
    }
}

/// 身份服务返回的错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("[{code}] {message}")]
pub struct AuthError {
    pub code: AuthErrorCode,
    pub message: String,
}

impl AuthError {
    pub fn new<S: Into<String>>(code: AuthErrorCode, message: S) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateSyncError {
    /// 登录/注册被拒绝
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),
    /// 拉取远端快照失败（不可达或数据格式错误）
    #[error("Pull failed: {0}")]
    Pull(String),
    /// 推送本地快照失败
    #[error("Push failed: {0}")]
    Push(String),
    /// 字段覆盖值捕获失败
    #[error("Capture failed: {0}")]
    Capture(String),
    #[error("KV store error: {0}")]
    KvStore(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("IO error: {0}")]
    IO(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Remote store error: {0}")]
    Remote(String),
    #[error("UI error: {0}")]
    Ui(String),
    #[error("Runtime error: {0}")]
    Runtime(String),
    #[error("Not signed in")]
    NotSignedIn,
    /// 首次拉取尚未完成，禁止自动保存
    #[error("Not ready: {0}")]
    NotReady(String),
}

impl From<serde_json::Error> for StateSyncError {
    fn from(error: serde_json::Error) -> Self {
        StateSyncError::Serialization(error.to_string())
    }
}

impl From<std::io::Error> for StateSyncError {
    fn from(error: std::io::Error) -> Self {
        StateSyncError::IO(error.to_string())
    }
}

impl From<sled::Error> for StateSyncError {
    fn from(error: sled::Error) -> Self {
        StateSyncError::KvStore(error.to_string())
    }
}

impl From<regex::Error> for StateSyncError {
    fn from(error: regex::Error) -> Self {
        StateSyncError::Config(format!("保留键正则无效: {}", error))
    }
}

impl StateSyncError {
    /// 获取认证错误码（如果这是一个认证错误）
    pub fn auth_code(&self) -> Option<AuthErrorCode> {
        match self {
            StateSyncError::Auth(e) => Some(e.code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, StateSyncError>;
