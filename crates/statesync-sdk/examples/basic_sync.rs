//! 基础同步演示
//!
//! 用内存远端存储和控制台 UI 走一遍：登录 → 首次拉取 → 本地写入 → 防抖推送 → 登出

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use statesync_sdk::{
    AuthError, AuthErrorCode, Capabilities, Credentials, FieldEvent, FieldKind, FieldRef, Identity, IdentityProvider,
    LocalStore, MemoryLocalStore, MemoryRemoteStore, OverrideValue, StateSyncConfig, StateSyncSDK, UiEventKind,
    UiSurface,
};
use tokio::sync::broadcast;
use tokio::time::sleep;

/// 只有一个账号的身份提供方
struct DemoIdentity {
    current: Mutex<Option<Identity>>,
    sender: broadcast::Sender<Option<Identity>>,
}

impl DemoIdentity {
    fn new() -> Self {
        let (sender, _) = broadcast::channel(8);
        Self {
            current: Mutex::new(None),
            sender,
        }
    }

    fn switch(&self, identity: Option<Identity>) {
        *self.current.lock() = identity.clone();
        let _ = self.sender.send(identity);
    }
}

#[async_trait]
impl IdentityProvider for DemoIdentity {
    fn current(&self) -> Option<Identity> {
        self.current.lock().clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<Option<Identity>> {
        self.sender.subscribe()
    }

    async fn sign_in(&self, credentials: &Credentials) -> Result<Identity, AuthError> {
        if credentials.password != "demo" {
            return Err(AuthError::new(AuthErrorCode::InvalidCredentials, "wrong password"));
        }
        let identity = Identity::new("demo-user").with_label(credentials.email.clone());
        self.switch(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_up(&self, credentials: &Credentials) -> Result<Identity, AuthError> {
        self.sign_in(credentials).await
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.switch(None);
        Ok(())
    }
}

/// 把所有 UI 操作打印到控制台
#[derive(Default)]
struct ConsoleUi {
    fields: Mutex<HashMap<String, FieldKind>>,
}

impl UiSurface for ConsoleUi {
    fn find_field(&self, key: &str) -> Option<FieldRef> {
        self.fields.lock().get(key).map(|kind| FieldRef {
            key: key.to_string(),
            kind: *kind,
        })
    }

    fn write_field(&self, field: &FieldRef, value: &OverrideValue) -> statesync_sdk::Result<()> {
        println!("  [ui] {} ← {:?}", field.key, value);
        Ok(())
    }

    fn dispatch(&self, _field: &FieldRef, _kind: UiEventKind) -> statesync_sdk::Result<()> {
        Ok(())
    }

    fn blur(&self, _field: &FieldRef) -> statesync_sdk::Result<()> {
        Ok(())
    }

    fn set_gated_visible(&self, visible: bool) -> statesync_sdk::Result<()> {
        println!("  [ui] 门控区域 {}", if visible { "显示" } else { "隐藏" });
        Ok(())
    }

    fn set_identity_label(&self, label: Option<&str>) -> statesync_sdk::Result<()> {
        println!("  [ui] 身份标签: {}", label.unwrap_or("-"));
        Ok(())
    }

    fn request_reload(&self) -> statesync_sdk::Result<()> {
        println!("  [ui] 请求重载页面");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("\n🚀 状态同步演示\n");

    let remote = Arc::new(MemoryRemoteStore::new());
    let ui = Arc::new(ConsoleUi::default());
    ui.fields.lock().insert("nickname".to_string(), FieldKind::Text);

    let config = StateSyncConfig::builder()
        .data_dir("/tmp/statesync_demo")
        .debug_mode(true)
        .build();
    let capabilities = Capabilities::new(Arc::new(DemoIdentity::new()), remote.clone(), ui)
        .with_local_store(Arc::new(MemoryLocalStore::new()));

    let sdk = StateSyncSDK::initialize(config, capabilities).await?;
    sdk.start()?;

    let mut events = sdk.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            println!("  [event] {}", event.event_type());
        }
    });

    // 登录之前的写入只留在本地
    sdk.local_store().set("theme", "light").await?;

    println!("\n🔐 登录...");
    sdk.sign_in("demo@example.com", "demo").await?;

    println!("\n✏️ 本地写入与字段捕获...");
    sdk.local_store().set("theme", "dark").await?;
    sdk.capture_field(&FieldEvent::new(UiEventKind::Input, "neo").with_element_id("nickname"))
        .await;
    sleep(Duration::from_secs(2)).await;

    if let Some(summary) = sdk.inspect_remote_summary().await? {
        println!("\n☁️ 远端记录: {} 字节, 更新于 {:?}", summary.size_bytes, summary.updated_at);
    }

    println!("\n🔄 模拟页面重新加载...");
    sdk.notify_ui_loaded().await?;
    sleep(Duration::from_secs(2)).await;

    println!("\n{}", sdk.sync_summary());

    sdk.sign_out().await?;
    sdk.shutdown().await?;
    println!("\n✅ 演示结束");
    Ok(())
}
