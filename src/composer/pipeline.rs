//! # 单附件接入流水线
//!
//! ## 设计思路
//!
//! 每个附件对应一个独立的异步任务，按固定顺序推进：
//!
//! ```text
//! Queued ─→ Reading ─┬─(解码成功)─→ Uploading ─┬─(上传成功)─→ Done + 完成通知
//!                    │                        └─(重试耗尽)─→ Failed
//!                    └─(解码失败)─→ Done（无预览）
//! ```
//!
//! ## 实现思路
//!
//! - 只有解码与上传两个挂起点；其余都是对 Store 的同步原子操作。
//! - 每一步修改前都以 Store 的返回值判断附件是否仍存在（“消失即取消”）：
//!   已删除的附件其结果被静默丢弃，绝不会被“复活”，也不会报错。
//! - 解码得到的预览若因附件已删除而无法写入 Store，由流水线自行释放，避免句柄泄漏。
//! - 完成通知只在 `Uploading → Done` 真正生效时触发，因此每个附件至多一次。

use std::sync::Arc;
use std::time::Duration;

use super::decoder::PreviewDecoder;
use super::model::{AttachmentId, AttachmentStatus, MediaBlob, Preview, infer_kind};
use super::resources::PreviewRegistry;
use super::store::{AttachmentPatch, AttachmentStore, UpdateOutcome};
use super::uploader::{Uploader, jitter_up_to};
use super::ComposerConfig;

/// 上传完成通知：`(原始数据, 预览表示)`。
pub type UploadCompleteHook = Arc<dyn Fn(&MediaBlob, &Preview) + Send + Sync>;

/// 上传重试策略。
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub(crate) retries: u32,
    pub(crate) base: Duration,
    pub(crate) ceiling: Duration,
}

impl RetryPolicy {
    pub(crate) fn from_config(config: &ComposerConfig) -> Self {
        Self {
            retries: config.upload_retries,
            base: Duration::from_millis(config.upload_retry_delay_ms),
            ceiling: Duration::from_millis(config.upload_retry_max_delay_ms),
        }
    }

    /// 第 `attempt` 次失败后的等待（`attempt` 从 1 开始）。
    ///
    /// 从 `base` 起逐次翻倍，封顶于 `ceiling`（不低于 `base`），再加上至多三分之一的随机抖动。
    pub(crate) fn delay_for(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(8);
        let step = self
            .base
            .saturating_mul(1 << doublings)
            .min(self.ceiling.max(self.base));
        step + jitter_up_to(step / 3)
    }
}

/// 流水线共享的协作者。
pub(crate) struct PipelineContext {
    pub(crate) store: Arc<AttachmentStore>,
    pub(crate) registry: Arc<PreviewRegistry>,
    pub(crate) decoder: Arc<dyn PreviewDecoder>,
    pub(crate) uploader: Arc<dyn Uploader>,
    pub(crate) on_upload_complete: Option<UploadCompleteHook>,
    pub(crate) retry: RetryPolicy,
}

/// 单条流水线的最终结局。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    Completed,
    /// 解码失败，附件以无预览的 `Done` 结束。
    DecodeFailed,
    /// 上传重试耗尽，附件以 `Failed` 结束。
    UploadFailed,
    /// 附件在处理途中被删除，结果被丢弃。
    Discarded,
}

impl PipelineContext {
    fn apply(&self, id: AttachmentId, patch: AttachmentPatch) -> bool {
        self.store.update(id, patch) == UpdateOutcome::Applied
    }

    /// 驱动一个附件走完整个生命周期。
    pub(crate) async fn run(&self, id: AttachmentId) -> PipelineOutcome {
        let Some(attachment) = self.store.get(id) else {
            return PipelineOutcome::Discarded;
        };
        let blob = attachment.blob;

        if !self.apply(id, AttachmentPatch::status(AttachmentStatus::Reading)) {
            return PipelineOutcome::Discarded;
        }
        log::debug!("📖 {} 开始读取 - {} ({} bytes)", id, blob.name, blob.len());

        let decoded = match self.decoder.decode(&blob).await {
            Ok(decoded) => decoded,
            Err(err) => {
                log::warn!("⚠️ {} 预览生成失败，降级为无预览：{}", id, err);
                let patch = AttachmentPatch::status(AttachmentStatus::Done).with_preview(None);
                return if self.apply(id, patch) {
                    PipelineOutcome::DecodeFailed
                } else {
                    PipelineOutcome::Discarded
                };
            }
        };

        let kind = infer_kind(blob.declared_type.as_deref(), decoded.signature.as_deref());
        let patch = AttachmentPatch::status(AttachmentStatus::Uploading)
            .with_preview(Some(decoded.preview.clone()))
            .with_kind(kind);
        if !self.apply(id, patch) {
            self.registry.release(&decoded.preview);
            log::debug!("⏭️ {} 已删除，丢弃刚生成的预览", id);
            return PipelineOutcome::Discarded;
        }
        log::debug!("📤 {} 预览就绪，开始上传（kind={:?}）", id, kind);

        match self.upload_with_retry(id, &blob).await {
            UploadResult::Uploaded => {}
            UploadResult::Discarded => return PipelineOutcome::Discarded,
            UploadResult::Failed => {
                return if self.apply(id, AttachmentPatch::status(AttachmentStatus::Failed)) {
                    PipelineOutcome::UploadFailed
                } else {
                    PipelineOutcome::Discarded
                };
            }
        }

        if !self.apply(id, AttachmentPatch::status(AttachmentStatus::Done)) {
            log::debug!("⏭️ {} 上传完成时已被删除，跳过完成通知", id);
            return PipelineOutcome::Discarded;
        }

        log::info!("✅ {} 上传完成 - {}", id, blob.name);
        if let Some(hook) = &self.on_upload_complete {
            hook(&blob, &decoded.preview);
        }
        PipelineOutcome::Completed
    }

    async fn upload_with_retry(&self, id: AttachmentId, blob: &MediaBlob) -> UploadResult {
        let total_attempts = self.retry.retries.saturating_add(1);

        for attempt in 1..=total_attempts {
            if !self.store.contains(id) {
                return UploadResult::Discarded;
            }

            match self.uploader.upload(blob).await {
                Ok(()) => return UploadResult::Uploaded,
                Err(err) if attempt < total_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    log::warn!(
                        "🔄 {} 上传失败，{}ms 后重试 {}/{}：{}",
                        id,
                        delay.as_millis(),
                        attempt,
                        self.retry.retries,
                        err
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    log::error!("❌ {} 上传失败（已尝试 {} 次）：{}", id, total_attempts, err);
                }
            }
        }

        UploadResult::Failed
    }
}

enum UploadResult {
    Uploaded,
    Failed,
    Discarded,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composer::decoder::{DecodedPreview, InlineDecoder, ObjectUrlDecoder};
    use crate::composer::model::MediaKind;
    use crate::composer::IngestError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct InstantUploader;

    #[async_trait]
    impl Uploader for InstantUploader {
        async fn upload(&self, _blob: &MediaBlob) -> Result<(), IngestError> {
            Ok(())
        }
    }

    /// 前 `failures` 次失败，之后成功。
    struct FlakyUploader {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Uploader for FlakyUploader {
        async fn upload(&self, _blob: &MediaBlob) -> Result<(), IngestError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(IngestError::Upload(format!("attempt {} refused", call + 1)))
            } else {
                Ok(())
            }
        }
    }

    struct FailingDecoder;

    #[async_trait]
    impl PreviewDecoder for FailingDecoder {
        async fn decode(&self, _blob: &MediaBlob) -> Result<DecodedPreview, IngestError> {
            Err(IngestError::Decode("file read error".into()))
        }
    }

    type Calls = Arc<Mutex<Vec<(String, String)>>>;

    fn context(
        decoder: Arc<dyn PreviewDecoder>,
        uploader: Arc<dyn Uploader>,
        registry: Arc<PreviewRegistry>,
        retries: u32,
    ) -> (PipelineContext, Calls) {
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        let hook: UploadCompleteHook = Arc::new(move |blob: &MediaBlob, preview: &Preview| {
            sink.lock().unwrap().push((blob.name.clone(), preview.as_str().to_string()));
        });

        let ctx = PipelineContext {
            store: Arc::new(AttachmentStore::new(5)),
            registry,
            decoder,
            uploader,
            on_upload_complete: Some(hook),
            retry: RetryPolicy {
                retries,
                base: Duration::from_millis(10),
                ceiling: Duration::from_millis(40),
            },
        };
        (ctx, calls)
    }

    #[tokio::test]
    async fn successful_pipeline_reaches_done_and_notifies_once() {
        let (ctx, calls) = context(
            Arc::new(InlineDecoder::new(1024)),
            Arc::new(InstantUploader),
            Arc::new(PreviewRegistry::new()),
            0,
        );
        let id = ctx.store.append(vec![MediaBlob::new("a.gif", None, b"GIF89a....".to_vec())]).accepted[0];

        assert_eq!(ctx.run(id).await, PipelineOutcome::Completed);

        let item = ctx.store.get(id).expect("still present");
        assert_eq!(item.status, AttachmentStatus::Done);
        assert_eq!(item.kind, MediaKind::Image);
        let preview = item.preview.expect("preview stored");

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], ("a.gif".to_string(), preview.as_str().to_string()));
    }

    #[tokio::test]
    async fn decode_failure_ends_done_without_preview() {
        let (ctx, calls) = context(
            Arc::new(FailingDecoder),
            Arc::new(InstantUploader),
            Arc::new(PreviewRegistry::new()),
            0,
        );
        let id = ctx.store.append(vec![MediaBlob::new("x.png", Some("image/png"), vec![1])]).accepted[0];

        assert_eq!(ctx.run(id).await, PipelineOutcome::DecodeFailed);

        let item = ctx.store.get(id).expect("still present");
        assert_eq!(item.status, AttachmentStatus::Done);
        assert!(item.preview.is_none());
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn upload_is_retried_before_succeeding() {
        let uploader = Arc::new(FlakyUploader {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let (ctx, calls) = context(
            Arc::new(InlineDecoder::new(1024)),
            uploader.clone(),
            Arc::new(PreviewRegistry::new()),
            2,
        );
        let id = ctx.store.append(vec![MediaBlob::new("a.png", Some("image/png"), vec![1])]).accepted[0];

        assert_eq!(ctx.run(id).await, PipelineOutcome::Completed);
        assert_eq!(uploader.calls.load(Ordering::SeqCst), 3);
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_mark_failed_and_keep_preview() {
        let uploader = Arc::new(FlakyUploader {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let (ctx, calls) = context(
            Arc::new(InlineDecoder::new(1024)),
            uploader.clone(),
            Arc::new(PreviewRegistry::new()),
            1,
        );
        let id = ctx.store.append(vec![MediaBlob::new("a.png", Some("image/png"), vec![1])]).accepted[0];

        assert_eq!(ctx.run(id).await, PipelineOutcome::UploadFailed);
        assert_eq!(uploader.calls.load(Ordering::SeqCst), 2);

        let item = ctx.store.get(id).expect("still present");
        assert_eq!(item.status, AttachmentStatus::Failed);
        assert!(item.preview.is_some());
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn removed_before_start_is_discarded() {
        let registry = Arc::new(PreviewRegistry::new());
        let (ctx, calls) = context(
            Arc::new(ObjectUrlDecoder::new(Arc::clone(&registry), 1024)),
            Arc::new(InstantUploader),
            Arc::clone(&registry),
            0,
        );
        let id = ctx.store.append(vec![MediaBlob::new("a.png", Some("image/png"), vec![1])]).accepted[0];
        ctx.store.remove(id);

        assert_eq!(ctx.run(id).await, PipelineOutcome::Discarded);
        assert_eq!(registry.live_count(), 0);
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn retry_delay_doubles_until_the_ceiling() {
        let policy = RetryPolicy {
            retries: 12,
            base: Duration::from_millis(100),
            ceiling: Duration::from_millis(1_000),
        };
        for (attempt, step_ms) in [(1, 100), (2, 200), (3, 400), (4, 800), (5, 1_000), (12, 1_000)] {
            let step = Duration::from_millis(step_ms);
            let delay = policy.delay_for(attempt);
            assert!(delay >= step, "attempt {}: {:?}", attempt, delay);
            assert!(delay <= step + step / 3, "attempt {}: {:?}", attempt, delay);
        }
    }

    #[test]
    fn retry_ceiling_below_base_falls_back_to_base() {
        let policy = RetryPolicy {
            retries: 1,
            base: Duration::from_millis(50),
            ceiling: Duration::from_millis(5),
        };
        let delay = policy.delay_for(3);
        assert!(delay >= Duration::from_millis(50));
        assert!(delay <= Duration::from_millis(66));
    }
}
