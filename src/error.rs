//! 统一错误类型模块
//!
//! # 设计思路
//!
//! 流水线内部的错误只会降级为附件终态；真正需要返回给调用方的只有少数同步入口：
//! 编排器构造、配置加载、系统剪贴板读取与命令解析。
//! 这些入口统一返回 `Result<T, AppError>`。
//!
//! # 实现思路
//!
//! - 使用 `thiserror` 派生可读错误消息。
//! - 为 `IngestError` / `io::Error` / `serde_json::Error` 提供 `From` 转换，无需手动 map。
//! - 实现 `Serialize` 将错误序列化为字符串，满足命令层的 JSON 输出。

use serde::Serialize;

use crate::composer::IngestError;

/// 应用级统一错误类型
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// 附件链路错误（读取 / 解码 / 剪贴板 / 配置校验）
    #[error("{0}")]
    Ingest(#[from] IngestError),

    /// 文件系统 I/O 错误
    #[error("文件系统错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 编解码失败
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// 设置文件不可用
    #[error("设置错误: {0}")]
    Settings(String),

    /// 缺少异步运行时
    #[error("运行时错误: {0}")]
    Runtime(String),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Ingest(err) => err.code(),
            Self::Io(_) => "E_IO",
            Self::Json(_) => "E_JSON",
            Self::Settings(_) => "E_SETTINGS",
            Self::Runtime(_) => "E_RUNTIME",
        }
    }
}

/// 将错误序列化为人类可读的字符串。
impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
