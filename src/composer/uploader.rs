//! # 上传模块
//!
//! ## 设计思路
//!
//! 上传是可插拔的外部协作者：编排器只负责排序、等待与重试，不关心具体传输。
//! 默认实现 [`SimulatedUploader`] 仅模拟网络延迟（800ms + 随机 0~1200ms）。
//!
//! ## 实现思路
//!
//! 随机延迟来自进程内共享的 xorshift 状态（[`jitter_up_to`]），重试退避也复用它。

use std::hash::BuildHasher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::model::MediaBlob;
use super::{ComposerConfig, IngestError};

/// 上传外部协作者。
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, blob: &MediaBlob) -> Result<(), IngestError>;
}

/// 只等待一段随机延迟的模拟上传。
pub struct SimulatedUploader {
    min_latency: Duration,
    jitter: Duration,
}

impl SimulatedUploader {
    pub fn new(min_latency: Duration, jitter: Duration) -> Self {
        Self { min_latency, jitter }
    }

    pub fn from_config(config: &ComposerConfig) -> Self {
        Self::new(
            Duration::from_millis(config.upload_latency_min_ms),
            Duration::from_millis(config.upload_latency_jitter_ms),
        )
    }

    fn latency(&self) -> Duration {
        self.min_latency + jitter_up_to(self.jitter)
    }
}

#[async_trait]
impl Uploader for SimulatedUploader {
    async fn upload(&self, blob: &MediaBlob) -> Result<(), IngestError> {
        let latency = self.latency();
        log::debug!("📤 模拟上传 - {} ({} bytes, {}ms)", blob.name, blob.len(), latency.as_millis());
        tokio::time::sleep(latency).await;
        Ok(())
    }
}

static RANDOM_STATE: AtomicU64 = AtomicU64::new(0);

fn fresh_seed() -> u64 {
    std::collections::hash_map::RandomState::new().hash_one(std::process::id()) | 1
}

fn xorshift(mut x: u64) -> u64 {
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x
}

fn random_u64() -> u64 {
    let seed = fresh_seed();
    let advance = |state: u64| xorshift(if state == 0 { seed } else { state });
    let previous = RANDOM_STATE
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |state| Some(advance(state)))
        .unwrap_or_else(|state| state);
    advance(previous)
}

/// `[0, bound]` 内的随机时长，毫秒粒度。
pub(crate) fn jitter_up_to(bound: Duration) -> Duration {
    let bound_ms = u64::try_from(bound.as_millis()).unwrap_or(u64::MAX);
    if bound_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(random_u64() % bound_ms.saturating_add(1))
}
