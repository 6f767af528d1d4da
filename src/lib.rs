//! # 提示词输入框附件编排 — 库入口
//!
//! ## 架构总览
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │             渲染层（任意 UI / 宿主进程）                  │
//! │                                                          │
//! │  文件选择 ── 粘贴 ── 删除 ── 说明文字 ── 发送             │
//! │       │  (同步手势回调 + watch 快照订阅)                  │
//! └───────┼──────────────────────────────────────────────────┘
//!         ↕ ComposerService / JSON 命令 (Result<T, AppError>)
//! ┌───────┼──────────────────────────────────────────────────┐
//! │       ↕            核心 (Rust)                           │
//! │                                                          │
//! │  ┌─ error ────── AppError (统一错误类型)                  │
//! │  │                                                       │
//! │  ├─ settings ─── 配置文件 (JSON) 读写                     │
//! │  │                                                       │
//! │  └─ composer ─── 附件 Store + 接入流水线                  │
//! │      ├─ input          文件选择 / 粘贴过滤 / 系统剪贴板   │
//! │      ├─ decoder        内联 / 句柄 / 缩略图预览           │
//! │      ├─ uploader       模拟上传 + 退避重试                │
//! │      └─ resources      预览句柄登记与释放                 │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 模块职责
//!
//! | 模块 | 职责 |
//! |------|------|
//! | [`error`] | 统一错误类型 `AppError` |
//! | [`settings`] | `ComposerConfig` 的加载（失败回退默认值）与保存 |
//! | [`composer`] | 附件状态、接入流水线、编排器与命令层 |

pub mod composer;
pub mod error;
pub mod settings;
