//! # 命令层
//!
//! ## 设计思路
//!
//! 命令层仅做参数接收与结果返回，不承载业务逻辑。
//! 渲染层（或任意宿主）以 JSON 发送 [`ComposerCommand`]，
//! 所有实际处理交由 [`ComposerService`]，保持命令函数薄、稳定、易测试。

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::model::AttachmentId;
use super::service::{ComposerService, ComposerSnapshot, PasteReport, Submission};
use crate::error::AppError;

/// 渲染层发来的命令。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ComposerCommand {
    SelectPaths { paths: Vec<PathBuf> },
    PasteClipboard,
    Delete { id: AttachmentId },
    ToggleCaptionEdit { id: AttachmentId },
    SetCaption { id: AttachmentId, text: String },
    ClearAll,
    SetPrompt { text: String },
    Snapshot,
    Send,
    /// 等待所有流水线结束后返回快照。
    WaitIdle,
}

/// 命令执行结果。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum CommandReply {
    Accepted { accepted: usize },
    Paste(PasteReport),
    Applied { applied: bool },
    Cleared { removed: usize },
    Snapshot(ComposerSnapshot),
    Submission(Submission),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandError {
    pub code: &'static str,
    pub message: String,
}

impl From<AppError> for CommandError {
    fn from(error: AppError) -> Self {
        Self {
            code: error.code(),
            message: error.to_string(),
        }
    }
}

/// 解析一行 JSON 命令。
pub fn parse_command(line: &str) -> Result<ComposerCommand, AppError> {
    Ok(serde_json::from_str(line.trim())?)
}

/// 执行单条命令。
pub async fn dispatch(service: &ComposerService, command: ComposerCommand) -> Result<CommandReply, CommandError> {
    let reply = match command {
        ComposerCommand::SelectPaths { paths } => CommandReply::Accepted {
            accepted: service.select_paths(&paths),
        },
        ComposerCommand::PasteClipboard => CommandReply::Paste(
            service
                .paste_from_system_clipboard()
                .await
                .map_err(CommandError::from)?,
        ),
        ComposerCommand::Delete { id } => CommandReply::Applied {
            applied: service.delete(id),
        },
        ComposerCommand::ToggleCaptionEdit { id } => CommandReply::Applied {
            applied: service.toggle_caption_edit(id),
        },
        ComposerCommand::SetCaption { id, text } => CommandReply::Applied {
            applied: service.set_caption(id, text),
        },
        ComposerCommand::ClearAll => CommandReply::Cleared {
            removed: service.clear_all(),
        },
        ComposerCommand::SetPrompt { text } => {
            service.set_prompt(text);
            CommandReply::Applied { applied: true }
        }
        ComposerCommand::Snapshot => CommandReply::Snapshot(service.snapshot()),
        ComposerCommand::Send => CommandReply::Submission(service.send()),
        ComposerCommand::WaitIdle => {
            service.wait_idle().await;
            CommandReply::Snapshot(service.snapshot())
        }
    };
    Ok(reply)
}
