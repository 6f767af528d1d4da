//! # 预览解码模块
//!
//! ## 设计思路
//!
//! 解码是流水线中唯一允许失败的外部操作：把原始字节转换为可渲染的预览表示。
//! 通过 [`PreviewDecoder`] trait 抽象，使编排器只负责“排序与等待”，
//! 具体策略（内联 / 句柄 / 缩略图）按配置注入，测试也可以替换为可控实现。
//!
//! ## 实现思路
//!
//! - 所有实现都会先做体积校验，尽早失败。
//! - CPU 密集部分（Base64 编码、图片解码缩放）放到 `spawn_blocking`，避免阻塞 async 运行时。
//! - 解码结果附带文件签名（MIME），供 `infer_kind` 在声明类型缺失时兜底。

use std::sync::Arc;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;

use super::model::{MediaBlob, MediaKind, Preview, infer_kind, sniff_mime};
use super::resources::PreviewRegistry;
use super::thumbnail::{ThumbnailLimits, render_thumbnail_png};
use super::{ComposerConfig, IngestError, PreviewMode};

const FALLBACK_MIME: &str = "application/octet-stream";

/// 解码阶段输出。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPreview {
    pub preview: Preview,
    /// 从内容识别出的 MIME；无法识别时为 `None`。
    pub signature: Option<String>,
}

/// 把原始字节转换为预览表示的外部协作者。
#[async_trait]
pub trait PreviewDecoder: Send + Sync {
    async fn decode(&self, blob: &MediaBlob) -> Result<DecodedPreview, IngestError>;
}

/// 按配置选择默认解码器。
pub fn decoder_for(config: &ComposerConfig, registry: Arc<PreviewRegistry>) -> Arc<dyn PreviewDecoder> {
    match config.preview_mode {
        PreviewMode::Inline => Arc::new(InlineDecoder::new(config.max_file_size)),
        PreviewMode::ObjectUrl => Arc::new(ObjectUrlDecoder::new(registry, config.max_file_size)),
        PreviewMode::Thumbnail => Arc::new(ThumbnailDecoder::new(
            config.max_file_size,
            ThumbnailLimits {
                max_dimension: config.thumbnail_max_dimension,
                max_decoded_pixels: config.max_decoded_pixels,
            },
        )),
    }
}

fn validate_blob_size(blob: &MediaBlob, max_file_size: u64) -> Result<(), IngestError> {
    if blob.is_empty() {
        return Err(IngestError::Decode(format!("文件内容为空：{}", blob.name)));
    }

    if blob.len() as u64 > max_file_size {
        return Err(IngestError::ResourceLimit(format!(
            "文件过大：{:.2} MB（限制：{:.2} MB）",
            blob.len() as f64 / 1024.0 / 1024.0,
            max_file_size as f64 / 1024.0 / 1024.0
        )));
    }

    Ok(())
}

/// 声明类型优先，其次是文件签名。
fn effective_mime<'a>(blob: &'a MediaBlob, signature: Option<&'a str>) -> &'a str {
    blob.declared_type
        .as_deref()
        .or(signature)
        .unwrap_or(FALLBACK_MIME)
}

/// 构造 `data:<mime>;base64,<payload>`。
pub fn build_data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, general_purpose::STANDARD.encode(bytes))
}

/// 从 `data:` URL 中取出 MIME 部分。
pub fn data_url_mime(url: &str) -> Option<&str> {
    let rest = url.strip_prefix("data:")?;
    let end = rest.find([';', ','])?;
    let mime = &rest[..end];
    (!mime.is_empty()).then_some(mime)
}

async fn encode_inline(bytes: Bytes, mime: String) -> Result<String, IngestError> {
    tokio::task::spawn_blocking(move || build_data_url(&mime, &bytes))
        .await
        .map_err(|e| IngestError::Decode(format!("编码线程执行失败：{}", e)))
}

/// 整个文件编码为内联 `data:` URL。
pub struct InlineDecoder {
    max_file_size: u64,
}

impl InlineDecoder {
    pub fn new(max_file_size: u64) -> Self {
        Self { max_file_size }
    }
}

#[async_trait]
impl PreviewDecoder for InlineDecoder {
    async fn decode(&self, blob: &MediaBlob) -> Result<DecodedPreview, IngestError> {
        validate_blob_size(blob, self.max_file_size)?;

        let sniffed = sniff_mime(&blob.bytes);
        let mime = effective_mime(blob, sniffed).to_string();
        let url = encode_inline(blob.bytes.clone(), mime).await?;

        let signature = sniffed
            .map(str::to_string)
            .or_else(|| data_url_mime(&url).filter(|m| *m != FALLBACK_MIME).map(str::to_string));

        Ok(DecodedPreview {
            preview: Preview::DataUrl(url),
            signature,
        })
    }
}

/// 将原始字节登记到注册表，返回 `blob:` 句柄。
pub struct ObjectUrlDecoder {
    registry: Arc<PreviewRegistry>,
    max_file_size: u64,
}

impl ObjectUrlDecoder {
    pub fn new(registry: Arc<PreviewRegistry>, max_file_size: u64) -> Self {
        Self {
            registry,
            max_file_size,
        }
    }
}

#[async_trait]
impl PreviewDecoder for ObjectUrlDecoder {
    async fn decode(&self, blob: &MediaBlob) -> Result<DecodedPreview, IngestError> {
        validate_blob_size(blob, self.max_file_size)?;
        tokio::task::yield_now().await;

        // 登记之后不再有挂起点：句柄一旦创建就一定能交到流水线手里
        let sniffed = sniff_mime(&blob.bytes);
        let mime = effective_mime(blob, sniffed);
        let preview = self.registry.register(blob.bytes.clone(), mime);

        Ok(DecodedPreview {
            preview,
            signature: sniffed.map(str::to_string),
        })
    }
}

/// 图片生成 PNG 缩略图，其他类型回退为内联。
pub struct ThumbnailDecoder {
    inline: InlineDecoder,
    limits: ThumbnailLimits,
}

impl ThumbnailDecoder {
    pub(crate) fn new(max_file_size: u64, limits: ThumbnailLimits) -> Self {
        Self {
            inline: InlineDecoder::new(max_file_size),
            limits,
        }
    }
}

#[async_trait]
impl PreviewDecoder for ThumbnailDecoder {
    async fn decode(&self, blob: &MediaBlob) -> Result<DecodedPreview, IngestError> {
        let sniffed = sniff_mime(&blob.bytes);
        let is_vector = effective_mime(blob, sniffed).starts_with("image/svg");

        if is_vector || infer_kind(blob.declared_type.as_deref(), sniffed) != MediaKind::Image {
            return self.inline.decode(blob).await;
        }

        validate_blob_size(blob, self.inline.max_file_size)?;

        let bytes = blob.bytes.clone();
        let limits = self.limits;
        let png = tokio::task::spawn_blocking(move || render_thumbnail_png(&bytes, limits))
            .await
            .map_err(|e| IngestError::Decode(format!("缩略图线程执行失败：{}", e)))??;

        Ok(DecodedPreview {
            preview: Preview::DataUrl(build_data_url("image/png", &png)),
            signature: sniffed.map(str::to_string),
        })
    }
}
