//! # 配置模块
//!
//! ## 设计思路
//!
//! 将所有“可调策略”集中到 `ComposerConfig`，在编排器构造时一次性注入，运行期间不可变。
//! 预览策略（inline / object-url / thumbnail）作为高层语义，映射到不同的解码器实现。
//!
//! ## 实现思路
//!
//! - `Default` 提供与原组件一致的默认值（最多 5 个附件）。
//! - `PreviewMode` 负责策略字符串解析与反向输出。
//! - `validate` 在构造阶段拦截无意义的取值，避免运行期出现奇怪行为。

use serde::{Deserialize, Serialize};

use super::IngestError;

pub const DEFAULT_PLACEHOLDER: &str = "Write a prompt or paste media...";

/// 预览生成策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PreviewMode {
    /// 整个文件编码为 `data:` URL。
    Inline,
    /// 注册为 `blob:` 句柄，删除时必须释放。
    ObjectUrl,
    /// 图片降采样为 PNG 缩略图；非图片回退为 inline。
    Thumbnail,
}

impl PreviewMode {
    /// 从外部字符串解析策略。
    ///
    /// # 示例
    /// ```rust
    /// use media_composer::composer::PreviewMode;
    ///
    /// let mode = PreviewMode::from_str("thumbnail")?;
    /// assert_eq!(mode.as_str(), "thumbnail");
    /// # Ok::<(), media_composer::composer::IngestError>(())
    /// ```
    pub fn from_str(mode: &str) -> Result<Self, IngestError> {
        match mode.trim().to_lowercase().as_str() {
            "inline" => Ok(Self::Inline),
            "object-url" | "object_url" => Ok(Self::ObjectUrl),
            "thumbnail" => Ok(Self::Thumbnail),
            other => Err(IngestError::InvalidFormat(format!(
                "未知预览策略：{}（可选：inline / object-url / thumbnail）",
                other
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inline => "inline",
            Self::ObjectUrl => "object-url",
            Self::Thumbnail => "thumbnail",
        }
    }
}

/// 编排器配置。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposerConfig {
    /// Store 容量上限，超出部分在追加时直接截断。
    pub max_files: usize,
    /// 输入框占位文本。
    pub placeholder: String,
    /// 单个附件允许的最大体积（字节）。
    pub max_file_size: u64,
    pub preview_mode: PreviewMode,
    /// 缩略图单边最大值（像素）。
    pub thumbnail_max_dimension: u32,
    /// 缩略图解码前允许的像素上限（`width * height`）。
    pub max_decoded_pixels: u64,
    /// 模拟上传的最小延迟（毫秒）。
    pub upload_latency_min_ms: u64,
    /// 模拟上传的随机附加延迟上限（毫秒）。
    pub upload_latency_jitter_ms: u64,
    /// 上传失败后的最大重试次数（不含首次尝试）。
    pub upload_retries: u32,
    pub upload_retry_delay_ms: u64,
    pub upload_retry_max_delay_ms: u64,
    /// 删除时是否中止仍在运行的流水线任务。
    ///
    /// 关闭时沿用“消失即取消”：进行中的读取/上传照常跑完，结果被丢弃。
    pub cancel_in_flight_on_delete: bool,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            max_files: 5,
            placeholder: DEFAULT_PLACEHOLDER.to_string(),
            max_file_size: 50 * 1024 * 1024,
            preview_mode: PreviewMode::Inline,
            thumbnail_max_dimension: 320,
            max_decoded_pixels: 40_000_000,
            upload_latency_min_ms: 800,
            upload_latency_jitter_ms: 1_200,
            upload_retries: 2,
            upload_retry_delay_ms: 200,
            upload_retry_max_delay_ms: 2_000,
            cancel_in_flight_on_delete: false,
        }
    }
}

impl ComposerConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.max_files == 0 {
            return Err(IngestError::InvalidFormat("max_files 必须大于 0".to_string()));
        }
        if self.max_file_size == 0 {
            return Err(IngestError::InvalidFormat("max_file_size 必须大于 0".to_string()));
        }
        if !(16..=4096).contains(&self.thumbnail_max_dimension) {
            return Err(IngestError::InvalidFormat(
                "thumbnail_max_dimension 必须在 16~4096 像素之间".to_string(),
            ));
        }
        if self.max_decoded_pixels == 0 {
            return Err(IngestError::InvalidFormat("max_decoded_pixels 必须大于 0".to_string()));
        }
        if self.upload_retry_delay_ms > self.upload_retry_max_delay_ms {
            return Err(IngestError::InvalidFormat(
                "upload_retry_delay_ms 不能大于 upload_retry_max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }
}
