//! UI 能力抽象
//!
//! 引擎本身不渲染界面，只通过这个能力读写字段、派发通知、控制门控区域。

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::overrides::OverrideValue;

/// 字段的值类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    /// 文本类输入（value）
    Text,
    /// 复选框（checked）
    Checkbox,
}

/// 字段通知类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UiEventKind {
    Input,
    Change,
    Blur,
}

/// UI 上找到的字段
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    /// 查找时使用的稳定标识
    pub key: String,
    pub kind: FieldKind,
}

/// 宿主 UI 表面
///
/// UI 是单线程的，所有方法都是同步的。每个方法的失败都由调用方捕获并记录，
/// 不会传回宿主自己的事件处理。
pub trait UiSurface: Send + Sync {
    /// 按稳定标识查找字段：先按元素 id，再按 name
    fn find_field(&self, key: &str) -> Option<FieldRef>;

    /// 写入字段（文本写 value，复选框写 checked）
    fn write_field(&self, field: &FieldRef, value: &OverrideValue) -> Result<()>;

    /// 派发 input / change 通知，让宿主逻辑感知合成的更新
    fn dispatch(&self, field: &FieldRef, kind: UiEventKind) -> Result<()>;

    /// 移除焦点
    fn blur(&self, field: &FieldRef) -> Result<()>;

    /// 显示（true）或隐藏（false）门控区域；显示时同时隐藏登录面板
    fn set_gated_visible(&self, visible: bool) -> Result<()>;

    /// 更新「当前登录身份」标签，`None` 表示清空
    fn set_identity_label(&self, label: Option<&str>) -> Result<()>;

    /// 请求整页重载
    fn request_reload(&self) -> Result<()>;
}
