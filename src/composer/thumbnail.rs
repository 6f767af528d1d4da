//! # 缩略图流水线
//!
//! ## 设计思路
//!
//! 将“字节 → 图像 → 缩略图 PNG”的过程集中管理，并在关键节点增加资源上限控制。
//! 优先读取头部尺寸，再进行完整解码，降低恶意输入触发高内存开销的风险。
//!
//! ## 实现思路
//!
//! 1. 猜测格式并读取 header 尺寸
//! 2. 按像素上限快速拒绝
//! 3. 完整解码
//! 4. 超出单边上限时降采样（`fast_image_resize`，失败回退 `image::resize_exact`）
//! 5. 编码为 PNG

use std::io::Cursor;

use fast_image_resize as fr;
use image::{DynamicImage, GenericImageView, ImageBuffer, ImageFormat, Rgba};

use super::IngestError;

/// 缩略图生成参数。
#[derive(Debug, Clone, Copy)]
pub(crate) struct ThumbnailLimits {
    pub(crate) max_dimension: u32,
    pub(crate) max_decoded_pixels: u64,
}

/// 将图片字节解码并生成 PNG 缩略图。
pub(crate) fn render_thumbnail_png(bytes: &[u8], limits: ThumbnailLimits) -> Result<Vec<u8>, IngestError> {
    let (header_width, header_height) = inspect_dimensions(bytes)?;
    validate_pixel_limits(limits, header_width, header_height)?;

    let decoded = image::load_from_memory(bytes)
        .map_err(|e| IngestError::Decode(format!("图片解码失败：{}", e)))?;

    let (width, height) = decoded.dimensions();
    validate_pixel_limits(limits, width, height)?;

    let thumbnail = downscale(decoded, limits.max_dimension);
    let (out_width, out_height) = thumbnail.dimensions();

    let mut cursor = Cursor::new(Vec::new());
    thumbnail
        .write_to(&mut cursor, ImageFormat::Png)
        .map_err(|e| IngestError::Decode(format!("缩略图编码失败：{}", e)))?;

    log::debug!(
        "🖼️ 缩略图生成完成 - 原始尺寸: {}x{} 输出尺寸: {}x{}",
        width,
        height,
        out_width,
        out_height
    );

    Ok(cursor.into_inner())
}

fn inspect_dimensions(bytes: &[u8]) -> Result<(u32, u32), IngestError> {
    let reader = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| IngestError::InvalidFormat(format!("无法识别图片格式：{}", e)))?;

    reader
        .into_dimensions()
        .map_err(|e| IngestError::Decode(format!("无法读取图片尺寸：{}", e)))
}

fn validate_pixel_limits(limits: ThumbnailLimits, width: u32, height: u32) -> Result<(), IngestError> {
    let pixels = (width as u64)
        .checked_mul(height as u64)
        .ok_or_else(|| IngestError::ResourceLimit("图片像素数溢出".to_string()))?;

    if pixels > limits.max_decoded_pixels {
        return Err(IngestError::ResourceLimit(format!(
            "图片像素过大：{} 像素（限制：{} 像素）",
            pixels, limits.max_decoded_pixels
        )));
    }

    Ok(())
}

/// 计算保持宽高比的目标尺寸；无需缩放时返回 `None`。
pub(crate) fn target_dimensions(width: u32, height: u32, max_dimension: u32) -> Option<(u32, u32)> {
    if width <= max_dimension && height <= max_dimension {
        return None;
    }

    let scale = (max_dimension as f64 / width as f64).min(max_dimension as f64 / height as f64);
    let target_width = ((width as f64 * scale).floor() as u32).max(1);
    let target_height = ((height as f64 * scale).floor() as u32).max(1);
    Some((target_width, target_height))
}

fn downscale(image: DynamicImage, max_dimension: u32) -> DynamicImage {
    let (width, height) = image.dimensions();
    let Some((target_width, target_height)) = target_dimensions(width, height, max_dimension) else {
        return image;
    };

    match resize_with_fast_image_resize(&image, target_width, target_height) {
        Ok(resized) => resized,
        Err(err) => {
            log::warn!("⚠️ fast_image_resize 降采样失败，回退 image::resize_exact：{}", err);
            image.resize_exact(target_width, target_height, image::imageops::FilterType::Triangle)
        }
    }
}

fn resize_with_fast_image_resize(
    image: &DynamicImage,
    target_width: u32,
    target_height: u32,
) -> Result<DynamicImage, IngestError> {
    let src = image.to_rgba8();
    let (src_width, src_height) = src.dimensions();

    let src_image = fr::images::Image::from_vec_u8(src_width, src_height, src.into_raw(), fr::PixelType::U8x4)
        .map_err(|e| IngestError::Decode(format!("构建源图像缓冲失败：{}", e)))?;

    let mut dst_image = fr::images::Image::new(target_width, target_height, fr::PixelType::U8x4);

    let mut resizer = fr::Resizer::new();
    let options = fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear));

    resizer
        .resize(&src_image, &mut dst_image, Some(&options))
        .map_err(|e| IngestError::Decode(format!("fast_image_resize 执行失败：{}", e)))?;

    let rgba = ImageBuffer::<Rgba<u8>, Vec<u8>>::from_raw(target_width, target_height, dst_image.into_vec())
        .ok_or_else(|| IngestError::Decode("fast_image_resize 输出缓冲长度异常".to_string()))?;

    Ok(DynamicImage::ImageRgba8(rgba))
}
