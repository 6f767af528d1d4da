//! 编排器配置文件的读写。
//!
//! 配置以 JSON 保存；缺失字段使用默认值，文件缺失或损坏时回退到默认配置。

use std::fs;
use std::path::Path;

use crate::composer::ComposerConfig;
use crate::error::AppError;

/// 读取配置，任何失败都回退为默认值（并记录日志）。
pub fn load_config_from_path(path: &Path) -> ComposerConfig {
    match try_load_config(path) {
        Ok(Some(config)) => {
            log::info!("⚙️ 已加载配置 {}", path.display());
            config
        }
        Ok(None) => {
            log::info!("⚙️ 配置文件不存在，使用默认配置：{}", path.display());
            ComposerConfig::default()
        }
        Err(err) => {
            log::warn!("⚠️ 配置文件不可用，使用默认配置：{}", err);
            ComposerConfig::default()
        }
    }
}

/// 严格读取配置：文件不存在返回 `None`，内容非法或校验失败返回错误。
pub fn try_load_config(path: &Path) -> Result<Option<ComposerConfig>, AppError> {
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path)?;
    let config = serde_json::from_str::<ComposerConfig>(&content)
        .map_err(|e| AppError::Settings(format!("解析配置文件失败: {}", e)))?;
    config.validate()?;

    Ok(Some(config))
}

pub fn save_config_to_path(path: &Path, config: &ComposerConfig) -> Result<(), AppError> {
    config.validate()?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| AppError::Settings(format!("创建配置目录失败: {}", e)))?;
    }

    let content = serde_json::to_string_pretty(config)?;
    fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composer::PreviewMode;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("media-composer-settings-{}", std::process::id()))
            .join(name)
    }

    #[test]
    fn missing_file_yields_default() {
        let path = temp_path("missing.json");
        assert!(try_load_config(&path).expect("no error").is_none());
        assert_eq!(load_config_from_path(&path), ComposerConfig::default());
    }

    #[test]
    fn save_then_load_preserves_values() {
        let path = temp_path("roundtrip/config.json");
        let config = ComposerConfig {
            max_files: 3,
            preview_mode: PreviewMode::ObjectUrl,
            ..ComposerConfig::default()
        };

        save_config_to_path(&path, &config).expect("save");
        assert_eq!(load_config_from_path(&path), config);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let path = temp_path("partial.json");
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(&path, r#"{"max_files": 2, "preview_mode": "thumbnail"}"#).expect("write");

        let config = load_config_from_path(&path);
        assert_eq!(config.max_files, 2);
        assert_eq!(config.preview_mode, PreviewMode::Thumbnail);
        assert_eq!(config.upload_retries, ComposerConfig::default().upload_retries);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn corrupt_or_invalid_file_falls_back() {
        let path = temp_path("corrupt.json");
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");

        fs::write(&path, "{ not json").expect("write");
        assert!(matches!(try_load_config(&path), Err(AppError::Settings(_))));
        assert_eq!(load_config_from_path(&path), ComposerConfig::default());

        fs::write(&path, r#"{"max_files": 0}"#).expect("write");
        assert!(matches!(try_load_config(&path), Err(AppError::Ingest(_))));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn saving_invalid_config_is_rejected() {
        let config = ComposerConfig {
            max_files: 0,
            ..ComposerConfig::default()
        };
        assert!(save_config_to_path(&temp_path("never.json"), &config).is_err());
    }
}
