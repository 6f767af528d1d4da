//! # 附件编排模块（composer）
//!
//! ## 设计思路
//!
//! 该模块将“输入手势 → 占位附件 → 解码预览 → 上传 → 终态”按职责拆分为多个子模块，
//! 避免单文件膨胀与耦合。
//!
//! - `commands`：仅做 JSON 命令入参/出参适配（薄封装）
//! - `service`：编排器，持有 Store / 注册表 / 任务句柄
//! - `pipeline`：单个附件的接入流水线（读取 → 上传 → 完成）
//! - `input`：文件选择、粘贴过滤、系统剪贴板读取
//! - `decoder` / `thumbnail`：预览解码策略
//! - `uploader`：上传协作者与重试退避
//! - `store` / `resources`：附件状态与预览句柄生命周期
//! - `config/error/model`：配置、错误、数据模型
//!
//! ## 新同事快速上手
//!
//! ```text
//! 渲染层手势 / JSON 命令
//!    ↓
//! commands.rs（参数适配）
//!    ↓
//! service.rs（容量截断、启动任务、删除与清空）
//!    ↓
//! pipeline.rs（每个附件一个 tokio 任务）
//!    ├─ decoder.rs（内联 / 句柄 / 缩略图）
//!    └─ uploader.rs（上传 + 重试）
//!    ↓
//! store.rs 发布快照（watch）→ 渲染层重绘
//! ```
//!
//! ## 状态机
//!
//! 附件状态只会前进：`queued → reading → uploading → done`，
//! 上传重试耗尽时以 `failed` 结束；解码失败直接以无预览的 `done` 结束。

pub mod commands;
mod config;
mod decoder;
mod error;
mod input;
mod model;
mod pipeline;
mod resources;
mod service;
mod store;
mod thumbnail;
mod uploader;

pub use config::{ComposerConfig, DEFAULT_PLACEHOLDER, PreviewMode};
pub use decoder::{
    DecodedPreview, InlineDecoder, ObjectUrlDecoder, PreviewDecoder, ThumbnailDecoder, build_data_url,
    data_url_mime, decoder_for,
};
pub use error::IngestError;
pub use input::{ClipboardEntry, PasteOutcome, filter_paste, read_system_clipboard};
pub use model::{
    Attachment, AttachmentId, AttachmentStatus, AttachmentView, MediaBlob, MediaKind, Preview, infer_kind,
    sniff_mime,
};
pub use pipeline::{PipelineOutcome, UploadCompleteHook};
pub use resources::PreviewRegistry;
pub use service::{
    ComposerService, ComposerServiceBuilder, ComposerSnapshot, PasteReport, Submission, SubmittedAttachment,
};
pub use store::StoreSnapshot;
pub use uploader::{SimulatedUploader, Uploader};
