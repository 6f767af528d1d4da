//! # 附件编排 — 命令行入口
//!
//! 本文件仅负责日志初始化、配置加载与宿主循环。
//! 业务逻辑分布在各子模块中，详见 `lib.rs` 架构文档。
//!
//! - 传入的文件作为一次“文件选择”手势，等待全部流水线结束后输出提交内容。
//! - `--stdin` 时按行读取 JSON 命令（见 `composer::commands`），每行输出一条 JSON 结果。

use std::path::PathBuf;

use clap::Parser;
use media_composer::composer::commands::{self, CommandError};
use media_composer::composer::ComposerService;
use media_composer::settings;
use tokio::io::{AsyncBufReadExt, BufReader};

/// 附件编排器：接入媒体文件，生成预览并模拟上传。
#[derive(Parser, Debug)]
#[command(name = "media-composer", version, about)]
struct CliArgs {
    /// JSON 配置文件路径；缺省时使用内置默认值。
    #[arg(long)]
    config: Option<PathBuf>,

    /// 提交时附带的提示词。
    #[arg(long)]
    prompt: Option<String>,

    /// 从标准输入按行读取 JSON 命令。
    #[arg(long)]
    stdin: bool,

    /// 作为一次文件选择接入的文件。
    files: Vec<PathBuf>,
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{}", line),
        Err(err) => log::error!("❌ 输出序列化失败: {err}"),
    }
}

async fn run_command_loop(service: &ComposerService) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                log::warn!("读取标准输入失败: {err}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let result = match commands::parse_command(&line) {
            Ok(command) => commands::dispatch(service, command).await,
            Err(err) => Err(CommandError::from(err)),
        };
        match result {
            Ok(reply) => print_json(&reply),
            Err(err) => print_json(&serde_json::json!({ "error": err })),
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = CliArgs::parse();

    let config = args
        .config
        .as_deref()
        .map(settings::load_config_from_path)
        .unwrap_or_default();

    let service = match ComposerService::builder(config)
        .on_upload_complete(|blob, preview| {
            log::info!("✅ 上传完成: {} ({} bytes, 预览 {} 字符)", blob.name, blob.len(), preview.as_str().len());
        })
        .build()
    {
        Ok(service) => service,
        Err(err) => {
            log::error!("编排器初始化失败: {err}");
            std::process::exit(1);
        }
    };

    if let Some(prompt) = args.prompt {
        service.set_prompt(prompt);
    }

    if !args.files.is_empty() {
        service.select_paths(&args.files);
    }

    if args.stdin {
        run_command_loop(&service).await;
    }

    service.wait_idle().await;
    print_json(&service.send());
    service.shutdown();
}
