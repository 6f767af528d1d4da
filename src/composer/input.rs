//! # 输入适配模块
//!
//! ## 设计思路
//!
//! 把两种用户手势归一为同一份候选列表：
//! - **文件选择**：整份选择结果原样转发，不按类型过滤（容量截断由 Store 负责，类型推断由流水线负责）
//! - **粘贴**：只保留声明类型以 `image` / `video` 开头的文件条目；
//!   至少有一项符合时视为“已消费”（调用方应阻止平台默认粘贴行为）
//!
//! ## 实现思路
//!
//! - 粘贴条目由渲染层转换为 [`ClipboardEntry`] 后交给 [`filter_paste`]。
//! - 另外提供直接读取系统剪贴板的入口（`arboard`），图片会被编码为 PNG 候选。
//! - 读取本地路径时，单个文件失败只记录警告，不影响其他文件。

use std::borrow::Cow;
use std::io::Cursor;
use std::path::Path;

use image::{DynamicImage, ImageFormat, RgbaImage};

use super::model::MediaBlob;
use super::IngestError;

/// 剪贴板中的单个条目。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClipboardEntry {
    /// 文件类条目（截图、复制的图片/视频文件等）。
    File(MediaBlob),
    /// 纯文本条目，不会成为附件。
    Text(String),
}

/// 粘贴手势的处理结果。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PasteOutcome {
    /// 为 `true` 时调用方应阻止平台默认的粘贴行为。
    pub consumed: bool,
    pub candidates: Vec<MediaBlob>,
}

fn is_pasteable_media(blob: &MediaBlob) -> bool {
    blob.declared_type
        .as_deref()
        .map(|t| {
            let t = t.trim().to_ascii_lowercase();
            t.starts_with("image") || t.starts_with("video")
        })
        .unwrap_or(false)
}

/// 文件选择手势：原样转发。
pub fn from_file_selection(files: Vec<MediaBlob>) -> Vec<MediaBlob> {
    files
}

/// 粘贴手势：筛选出图片/视频文件条目。
pub fn filter_paste(entries: Vec<ClipboardEntry>) -> PasteOutcome {
    let candidates: Vec<MediaBlob> = entries
        .into_iter()
        .filter_map(|entry| match entry {
            ClipboardEntry::File(blob) if is_pasteable_media(&blob) => Some(blob),
            ClipboardEntry::File(blob) => {
                log::debug!("⏭️ 忽略非媒体粘贴条目 - {} ({:?})", blob.name, blob.declared_type);
                None
            }
            ClipboardEntry::Text(_) => None,
        })
        .collect();

    PasteOutcome {
        consumed: !candidates.is_empty(),
        candidates,
    }
}

/// 按本地路径读取文件选择结果，读取失败的路径被跳过。
pub fn read_paths<P: AsRef<Path>>(paths: &[P], max_file_size: u64) -> Vec<MediaBlob> {
    paths
        .iter()
        .filter_map(|path| match MediaBlob::from_path(path, max_file_size) {
            Ok(blob) => Some(blob),
            Err(err) => {
                log::warn!("⚠️ 跳过无法读取的文件 {}：{}", path.as_ref().display(), err);
                None
            }
        })
        .collect()
}

/// 将 RGBA 像素编码为 PNG 候选。
pub(crate) fn rgba_to_png_blob(width: usize, height: usize, bytes: Cow<'_, [u8]>) -> Result<MediaBlob, IngestError> {
    let image = RgbaImage::from_raw(width as u32, height as u32, bytes.into_owned())
        .ok_or_else(|| IngestError::Clipboard("创建图像缓冲区失败".to_string()))?;

    let mut cursor = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(image)
        .write_to(&mut cursor, ImageFormat::Png)
        .map_err(|e| IngestError::Clipboard(format!("剪贴板图片编码失败：{}", e)))?;

    Ok(MediaBlob::new("clipboard.png", Some("image/png"), cursor.into_inner()))
}

fn read_system_clipboard_sync() -> Result<Vec<ClipboardEntry>, IngestError> {
    let mut clipboard = arboard::Clipboard::new()
        .map_err(|e| IngestError::Clipboard(format!("无法访问剪贴板：{}", e)))?;

    let mut entries = Vec::new();

    match clipboard.get_image() {
        Ok(image_data) => {
            log::debug!("📋 剪贴板图片 {}x{}", image_data.width, image_data.height);
            entries.push(ClipboardEntry::File(rgba_to_png_blob(
                image_data.width,
                image_data.height,
                image_data.bytes,
            )?));
        }
        Err(err) => log::debug!("剪贴板中没有图片：{}", err),
    }

    if let Ok(text) = clipboard.get_text() {
        entries.push(ClipboardEntry::Text(text));
    }

    Ok(entries)
}

/// 读取系统剪贴板并转换为粘贴条目。
///
/// 剪贴板访问是阻塞调用，放在阻塞线程中执行。
pub async fn read_system_clipboard() -> Result<Vec<ClipboardEntry>, IngestError> {
    tokio::task::spawn_blocking(read_system_clipboard_sync)
        .await
        .map_err(|e| IngestError::Clipboard(format!("线程执行失败：{}", e)))?
}
