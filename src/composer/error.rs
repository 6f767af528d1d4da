//! # 错误模型模块
//!
//! ## 设计思路
//!
//! 使用单一错误枚举承载附件链路中的所有错误来源（读取 / 解码 / 上传 / 输入）。
//! 流水线内部在本地消化这些错误（降级为终态），不会越过编排器边界；
//! 仅构造、文件读取与系统剪贴板等同步入口会把它上转为 `AppError`。

/// 附件处理统一错误类型。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestError {
    #[error("解码错误：{0}")]
    Decode(String),

    #[error("格式错误：{0}")]
    InvalidFormat(String),

    #[error("资源限制：{0}")]
    ResourceLimit(String),

    #[error("文件错误：{0}")]
    FileSystem(String),

    #[error("剪贴板错误：{0}")]
    Clipboard(String),

    #[error("上传错误：{0}")]
    Upload(String),

    #[error("已取消：{0}")]
    Cancelled(String),
}

impl IngestError {
    /// 稳定错误码，供渲染层或日志聚合使用。
    pub fn code(&self) -> &'static str {
        match self {
            Self::Decode(_) => "E_DECODE",
            Self::InvalidFormat(_) => "E_INVALID_FORMAT",
            Self::ResourceLimit(_) => "E_RESOURCE_LIMIT",
            Self::FileSystem(_) => "E_FILE_SYSTEM",
            Self::Clipboard(_) => "E_CLIPBOARD",
            Self::Upload(_) => "E_UPLOAD",
            Self::Cancelled(_) => "E_CANCELLED",
        }
    }

    /// 错误发生的阶段。
    pub fn stage(&self) -> &'static str {
        match self {
            Self::FileSystem(_) => "read",
            Self::Decode(_) | Self::InvalidFormat(_) | Self::ResourceLimit(_) => "decode",
            Self::Upload(_) | Self::Cancelled(_) => "upload",
            Self::Clipboard(_) => "input",
        }
    }
}
