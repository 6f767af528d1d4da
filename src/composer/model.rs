//! # 附件数据模型
//!
//! ## 设计思路
//!
//! 将“外部输入”与“受管附件”解耦：
//! - `MediaBlob` 表示用户提供的原始字节（不可变，克隆廉价）
//! - `Attachment` 表示进入 Store 之后、带有生命周期状态的附件
//! - `AttachmentView` 表示渲染层可直接序列化的只读视图
//!
//! 类型推断集中在 [`infer_kind`]，避免在流水线中四处散落 MIME 判断。

use std::fmt;
use std::path::Path;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::IngestError;

/// 附件唯一标识。
///
/// 由 Store 内部单调递增计数器分配，删除后也不会复用。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttachmentId(pub(crate) u64);

impl fmt::Display for AttachmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "att-{}", self.0)
    }
}

/// 附件媒体类别。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    File,
}

/// 附件生命周期状态。
///
/// 合法路径：`Queued → Reading → Uploading → Done`，
/// 读取失败时 `Reading → Done`（无预览），上传最终失败时 `Uploading → Failed`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentStatus {
    Queued,
    Reading,
    Uploading,
    Done,
    Failed,
}

impl AttachmentStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Reading => 1,
            Self::Uploading => 2,
            Self::Done | Self::Failed => 3,
        }
    }

    /// 终态之后不再发生任何状态迁移（除非被移出 Store）。
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// 只允许向前迁移；同级重复设置视为非法。
    pub fn can_transition_to(self, next: AttachmentStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Reading => "reading",
            Self::Uploading => "uploading",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

/// 用户提供的原始媒体数据。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaBlob {
    pub name: String,
    /// 平台声明的 MIME 类型；剪贴板或文件选择器可能不提供。
    pub declared_type: Option<String>,
    pub bytes: Bytes,
}

impl MediaBlob {
    pub fn new(
        name: impl Into<String>,
        declared_type: Option<&str>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        let declared_type = declared_type
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        Self {
            name: name.into(),
            declared_type,
            bytes: bytes.into(),
        }
    }

    /// 从本地路径读取文件作为候选数据。
    ///
    /// 声明类型优先取文件签名，其次按扩展名猜测；两者都无法判断时留空，
    /// 交由流水线在预览阶段再做一次推断。
    pub fn from_path(path: impl AsRef<Path>, max_file_size: u64) -> Result<Self, IngestError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(IngestError::FileSystem(format!("文件不存在：{}", path.display())));
        }

        let metadata = std::fs::metadata(path)
            .map_err(|e| IngestError::FileSystem(format!("无法读取文件信息：{}", e)))?;

        if !metadata.is_file() {
            return Err(IngestError::FileSystem(format!("不是普通文件：{}", path.display())));
        }

        if metadata.len() > max_file_size {
            return Err(IngestError::ResourceLimit(format!(
                "文件过大：{:.2} MB（限制：{:.2} MB）",
                metadata.len() as f64 / 1024.0 / 1024.0,
                max_file_size as f64 / 1024.0 / 1024.0
            )));
        }

        let bytes = std::fs::read(path)
            .map_err(|e| IngestError::FileSystem(format!("无法读取文件：{}", e)))?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());

        let declared = sniff_mime(&bytes).or_else(|| mime_from_extension(path));

        Ok(Self::new(name, declared, bytes))
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// 可渲染的预览表示。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preview {
    /// 内联 `data:` URL，纯内存值，无需释放。
    DataUrl(String),
    /// `blob:` 句柄，占用 `PreviewRegistry` 中的条目，必须恰好释放一次。
    ObjectUrl(String),
}

impl Preview {
    pub fn as_str(&self) -> &str {
        match self {
            Self::DataUrl(url) | Self::ObjectUrl(url) => url,
        }
    }

    pub fn is_handle(&self) -> bool {
        matches!(self, Self::ObjectUrl(_))
    }
}

/// Store 中的一个附件。
///
/// Store 只对外提供克隆，修改必须经由 `AttachmentStore` 的操作完成。
#[derive(Debug, Clone)]
pub struct Attachment {
    pub id: AttachmentId,
    pub blob: MediaBlob,
    pub kind: MediaKind,
    pub preview: Option<Preview>,
    pub status: AttachmentStatus,
    pub caption: String,
    pub editing_caption: bool,
}

impl Attachment {
    pub(crate) fn placeholder(id: AttachmentId, blob: MediaBlob) -> Self {
        let kind = infer_kind(blob.declared_type.as_deref(), None);
        Self {
            id,
            blob,
            kind,
            preview: None,
            status: AttachmentStatus::Queued,
            caption: String::new(),
            editing_caption: false,
        }
    }
}

/// 渲染层只读视图。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachmentView {
    pub id: AttachmentId,
    pub name: String,
    pub kind: MediaKind,
    pub status: AttachmentStatus,
    pub preview: Option<String>,
    pub caption: String,
    pub editing_caption: bool,
    pub size: usize,
}

impl From<&Attachment> for AttachmentView {
    fn from(item: &Attachment) -> Self {
        Self {
            id: item.id,
            name: item.blob.name.clone(),
            kind: item.kind,
            status: item.status,
            preview: item.preview.as_ref().map(|p| p.as_str().to_string()),
            caption: item.caption.clone(),
            editing_caption: item.editing_caption,
            size: item.blob.len(),
        }
    }
}

fn kind_of_mime(mime: &str) -> Option<MediaKind> {
    let mime = mime.trim().to_ascii_lowercase();
    if mime.starts_with("video") {
        Some(MediaKind::Video)
    } else if mime.starts_with("image") {
        Some(MediaKind::Image)
    } else {
        None
    }
}

/// 推断附件类别。
///
/// 声明类型优先；声明缺失或无法判断（非 image/video）时，回退到解码阶段得到的签名。
pub fn infer_kind(declared_type: Option<&str>, decoded_signature: Option<&str>) -> MediaKind {
    declared_type
        .and_then(kind_of_mime)
        .or_else(|| decoded_signature.and_then(kind_of_mime))
        .unwrap_or(MediaKind::File)
}

/// 通过文件头签名识别 MIME。
pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    infer::get(bytes).map(|kind| kind.mime_type())
}

fn mime_from_extension(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        _ => return None,
    };
    Some(mime)
}
