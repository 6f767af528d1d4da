//! # 编排器（组合根）
//!
//! ## 设计思路
//!
//! `ComposerService` 把输入适配、附件 Store、接入流水线与资源注册表组装在一起，
//! 对渲染层暴露一组同步手势回调 + 一个响应式快照。
//!
//! 1. 手势 → 输入适配产出候选
//! 2. 候选以占位附件写入 Store（超出容量直接截断）
//! 3. 每个占位附件启动一个独立的流水线任务，任务之间互不串行
//! 4. 删除 / 清空从 Store 移除附件并释放其预览资源
//!
//! ## 实现思路
//!
//! - 构造时捕获当前 tokio 运行时句柄，手势回调本身保持同步。
//! - 任务按附件 id 登记；任务结束（正常完成或被中止）时由 RAII 守卫注销，
//!   因此 `wait_idle` 只需观察“在途任务数”归零，不会拿走任何句柄，
//!   删除（开启 `cancel_in_flight_on_delete` 时）与销毁随时都能中止对应任务。
//! - 销毁（`shutdown` / `Drop`）时中止所有任务、清空 Store 并释放全部剩余句柄。
//! - 错误不会越过本层：流水线失败只会体现为附件的终态。

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Local;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::AbortHandle;

use super::decoder::{PreviewDecoder, decoder_for};
use super::input::{self, ClipboardEntry};
use super::model::{Attachment, AttachmentId, AttachmentStatus, AttachmentView, MediaBlob, MediaKind, Preview};
use super::pipeline::{PipelineContext, PipelineOutcome, RetryPolicy, UploadCompleteHook};
use super::resources::PreviewRegistry;
use super::store::{AttachmentPatch, AttachmentStore, StoreSnapshot, UpdateOutcome};
use super::uploader::{SimulatedUploader, Uploader};
use super::ComposerConfig;
use crate::error::AppError;

/// 渲染层所需的完整状态。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComposerSnapshot {
    pub revision: u64,
    pub attachments: Vec<AttachmentView>,
    pub prompt: String,
    pub placeholder: String,
    pub max_files: usize,
    /// 例如 `2/5 media`。
    pub count_label: String,
}

/// 粘贴手势的处理报告。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PasteReport {
    /// 为 `true` 时渲染层应阻止平台默认的粘贴行为。
    pub consumed: bool,
    pub accepted: usize,
}

/// 提交中的单个附件摘要（不携带预览数据本身）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmittedAttachment {
    pub id: AttachmentId,
    pub name: String,
    pub kind: MediaKind,
    pub status: AttachmentStatus,
    pub caption: String,
    pub has_preview: bool,
}

impl From<&Attachment> for SubmittedAttachment {
    fn from(item: &Attachment) -> Self {
        Self {
            id: item.id,
            name: item.blob.name.clone(),
            kind: item.kind,
            status: item.status,
            caption: item.caption.clone(),
            has_preview: item.preview.is_some(),
        }
    }
}

/// 发送时的提交内容。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub prompt: String,
    pub attachments: Vec<SubmittedAttachment>,
    pub sent_at: String,
}

/// 在途流水线任务登记表。
///
/// `running` 在启动前登记、由任务自己的 [`TaskGuard`] 注销；`in_flight` 始终等于它的大小。
/// 中止句柄在启动之后补登，任务若已结束则不再登记。
struct TaskTracker {
    state: Mutex<TrackerState>,
    in_flight: watch::Sender<usize>,
}

#[derive(Default)]
struct TrackerState {
    running: HashSet<AttachmentId>,
    handles: HashMap<AttachmentId, AbortHandle>,
}

impl TaskTracker {
    fn new() -> Self {
        let (in_flight, _) = watch::channel(0);
        Self {
            state: Mutex::new(TrackerState::default()),
            in_flight,
        }
    }

    fn state(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self, id: AttachmentId) {
        let mut state = self.state();
        state.running.insert(id);
        self.in_flight.send_replace(state.running.len());
    }

    fn register(&self, id: AttachmentId, handle: AbortHandle) {
        let mut state = self.state();
        if state.running.contains(&id) {
            state.handles.insert(id, handle);
        }
    }

    fn finish(&self, id: AttachmentId) {
        let mut state = self.state();
        state.running.remove(&id);
        state.handles.remove(&id);
        self.in_flight.send_replace(state.running.len());
    }

    fn abort(&self, id: AttachmentId) -> bool {
        let handle = self.state().handles.get(&id).cloned();
        match handle {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    fn abort_all(&self) -> usize {
        let handles: Vec<AbortHandle> = self.state().handles.values().cloned().collect();
        for handle in &handles {
            handle.abort();
        }
        handles.len()
    }
}

/// 随任务 future 一起移动；任务完成或被中止（future 被丢弃）时注销登记。
struct TaskGuard {
    tracker: Arc<TaskTracker>,
    id: AttachmentId,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.tracker.finish(self.id);
    }
}

/// 编排器构造器。
pub struct ComposerServiceBuilder {
    config: ComposerConfig,
    registry: Option<Arc<PreviewRegistry>>,
    decoder: Option<Arc<dyn PreviewDecoder>>,
    uploader: Option<Arc<dyn Uploader>>,
    on_upload_complete: Option<UploadCompleteHook>,
}

impl ComposerServiceBuilder {
    /// 共享外部注册表（例如渲染层需要自行解析 `blob:` 句柄时）。
    pub fn registry(mut self, registry: Arc<PreviewRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn decoder(mut self, decoder: Arc<dyn PreviewDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn uploader(mut self, uploader: Arc<dyn Uploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn on_upload_complete<F>(mut self, hook: F) -> Self
    where
        F: Fn(&MediaBlob, &Preview) + Send + Sync + 'static,
    {
        self.on_upload_complete = Some(Arc::new(hook));
        self
    }

    /// 校验配置并组装编排器。
    ///
    /// 必须在 tokio 运行时内调用。
    pub fn build(self) -> Result<ComposerService, AppError> {
        self.config.validate()?;

        let runtime = Handle::try_current()
            .map_err(|e| AppError::Runtime(format!("未找到 tokio 运行时：{}", e)))?;

        let registry = self.registry.unwrap_or_else(|| Arc::new(PreviewRegistry::new()));
        let decoder = self
            .decoder
            .unwrap_or_else(|| decoder_for(&self.config, Arc::clone(&registry)));
        let uploader = self
            .uploader
            .unwrap_or_else(|| Arc::new(SimulatedUploader::from_config(&self.config)));

        let pipeline = Arc::new(PipelineContext {
            store: Arc::new(AttachmentStore::new(self.config.max_files)),
            registry,
            decoder,
            uploader,
            on_upload_complete: self.on_upload_complete,
            retry: RetryPolicy::from_config(&self.config),
        });

        log::info!(
            "🧩 编排器已就绪 - max_files={} preview_mode={} cancel_in_flight={}",
            self.config.max_files,
            self.config.preview_mode.as_str(),
            self.config.cancel_in_flight_on_delete
        );

        Ok(ComposerService {
            config: self.config,
            pipeline,
            runtime,
            tracker: Arc::new(TaskTracker::new()),
            prompt: Mutex::new(String::new()),
            shut_down: AtomicBool::new(false),
        })
    }
}

/// 附件接入与上传编排器。
pub struct ComposerService {
    config: ComposerConfig,
    pipeline: Arc<PipelineContext>,
    runtime: Handle,
    tracker: Arc<TaskTracker>,
    prompt: Mutex<String>,
    shut_down: AtomicBool,
}

impl ComposerService {
    pub fn builder(config: ComposerConfig) -> ComposerServiceBuilder {
        ComposerServiceBuilder {
            config,
            registry: None,
            decoder: None,
            uploader: None,
            on_upload_complete: None,
        }
    }

    /// 使用默认协作者（按配置选择解码器 + 模拟上传）创建编排器。
    ///
    /// # 示例
    /// ```rust,no_run
    /// use media_composer::composer::{ComposerConfig, ComposerService, MediaBlob};
    ///
    /// # async fn demo() -> Result<(), media_composer::error::AppError> {
    /// let service = ComposerService::new(ComposerConfig::default())?;
    /// let accepted = service.select_files(vec![MediaBlob::new("a.png", Some("image/png"), vec![0u8; 16])]);
    /// assert_eq!(accepted, 1);
    /// service.wait_idle().await;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(config: ComposerConfig) -> Result<Self, AppError> {
        Self::builder(config).build()
    }

    fn prompt_guard(&self) -> MutexGuard<'_, String> {
        self.prompt.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn store(&self) -> &AttachmentStore {
        &self.pipeline.store
    }

    pub fn config(&self) -> &ComposerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<PreviewRegistry> {
        &self.pipeline.registry
    }

    /// 写入占位附件并为每个被接受的附件启动流水线，返回接受数量。
    fn ingest(&self, candidates: Vec<MediaBlob>) -> usize {
        if candidates.is_empty() {
            return 0;
        }
        if self.shut_down.load(Ordering::SeqCst) {
            log::warn!("⚠️ 编排器已销毁，忽略 {} 个候选", candidates.len());
            return 0;
        }

        let outcome = self.store().append(candidates);
        if outcome.accepted.is_empty() {
            log::info!("📎 已达到附件上限（{}），本次候选全部丢弃", self.config.max_files);
            return 0;
        }

        for &id in &outcome.accepted {
            self.tracker.begin(id);
            let ctx = Arc::clone(&self.pipeline);
            let guard = TaskGuard {
                tracker: Arc::clone(&self.tracker),
                id,
            };
            let handle = self.runtime.spawn(async move {
                let _guard = guard;
                let outcome: PipelineOutcome = ctx.run(id).await;
                log::debug!("🏁 {} 流水线结束：{:?}", id, outcome);
                outcome
            });
            self.tracker.register(id, handle.abort_handle());
        }

        log::info!(
            "📎 新增附件 {} 个（丢弃 {} 个，当前 {}/{}）",
            outcome.accepted_count(),
            outcome.dropped,
            self.store().len(),
            self.config.max_files
        );
        outcome.accepted_count()
    }

    /// 文件选择手势。
    pub fn select_files(&self, files: Vec<MediaBlob>) -> usize {
        self.ingest(input::from_file_selection(files))
    }

    /// 以本地路径作为文件选择结果。
    pub fn select_paths<P: AsRef<Path>>(&self, paths: &[P]) -> usize {
        self.select_files(input::read_paths(paths, self.config.max_file_size))
    }

    /// 粘贴手势。
    pub fn paste(&self, entries: Vec<ClipboardEntry>) -> PasteReport {
        let outcome = input::filter_paste(entries);
        let accepted = if outcome.consumed {
            self.ingest(outcome.candidates)
        } else {
            0
        };
        PasteReport {
            consumed: outcome.consumed,
            accepted,
        }
    }

    /// 从系统剪贴板粘贴。
    pub async fn paste_from_system_clipboard(&self) -> Result<PasteReport, AppError> {
        let entries = input::read_system_clipboard().await?;
        Ok(self.paste(entries))
    }

    fn release(&self, removed: &Attachment) {
        if let Some(preview) = &removed.preview {
            self.pipeline.registry.release(preview);
        }
    }

    fn abort_task(&self, id: AttachmentId) {
        if self.tracker.abort(id) {
            log::debug!("🛑 已中止 {} 的流水线任务", id);
        }
    }

    /// 删除附件；目标不存在时返回 `false`。
    pub fn delete(&self, id: AttachmentId) -> bool {
        let Some(removed) = self.store().remove(id) else {
            return false;
        };
        self.release(&removed);
        if self.config.cancel_in_flight_on_delete {
            self.abort_task(id);
        }
        log::info!("🗑️ 已删除附件 {}（状态：{}）", id, removed.status.as_str());
        true
    }

    /// 切换说明文字编辑态。
    pub fn toggle_caption_edit(&self, id: AttachmentId) -> bool {
        self.store().update(id, AttachmentPatch::toggle_editing()) == UpdateOutcome::Applied
    }

    /// 更新说明文字。
    pub fn set_caption(&self, id: AttachmentId, text: impl Into<String>) -> bool {
        self.store().update(id, AttachmentPatch::caption(text)) == UpdateOutcome::Applied
    }

    /// 清空全部附件并释放资源，返回移除数量。
    pub fn clear_all(&self) -> usize {
        let removed = self.store().clear();
        for item in &removed {
            self.release(item);
            if self.config.cancel_in_flight_on_delete {
                self.abort_task(item.id);
            }
        }
        if !removed.is_empty() {
            log::info!("🧹 已清空附件 {} 个", removed.len());
        }
        removed.len()
    }

    pub fn set_prompt(&self, text: impl Into<String>) {
        *self.prompt_guard() = text.into();
    }

    pub fn prompt(&self) -> String {
        self.prompt_guard().clone()
    }

    pub fn attachments(&self) -> Vec<Attachment> {
        self.store().list()
    }

    pub fn attachment(&self, id: AttachmentId) -> Option<Attachment> {
        self.store().get(id)
    }

    pub fn snapshot(&self) -> ComposerSnapshot {
        let StoreSnapshot {
            revision,
            attachments,
        } = self.store().snapshot();

        ComposerSnapshot {
            count_label: format!("{}/{} media", attachments.len(), self.config.max_files),
            revision,
            attachments,
            prompt: self.prompt(),
            placeholder: self.config.placeholder.clone(),
            max_files: self.config.max_files,
        }
    }

    /// 订阅 Store 变化。
    pub fn subscribe(&self) -> watch::Receiver<StoreSnapshot> {
        self.store().subscribe()
    }

    /// 渲染层解析 `blob:` 句柄。
    pub fn resolve_preview(&self, url: &str) -> Option<(String, bytes::Bytes)> {
        self.pipeline.registry.resolve(url)
    }

    /// 发送：收集当前提示词与全部附件，不清空状态。
    pub fn send(&self) -> Submission {
        let prompt = self.prompt();
        let attachments: Vec<SubmittedAttachment> =
            self.store().list().iter().map(SubmittedAttachment::from).collect();
        log::info!("📨 Send: {} | Media: {}", prompt, attachments.len());

        Submission {
            prompt,
            attachments,
            sent_at: Local::now().to_rfc3339(),
        }
    }

    /// 在途流水线任务数。
    pub fn in_flight(&self) -> usize {
        *self.tracker.in_flight.borrow()
    }

    /// 等待在途任务数归零（包括等待期间新启动的任务）。
    ///
    /// 等待期间删除、清空或销毁仍可中止任务；被中止的任务同样计为结束。
    pub async fn wait_idle(&self) {
        let mut in_flight = self.tracker.in_flight.subscribe();
        if in_flight.wait_for(|count| *count == 0).await.is_err() {
            log::warn!("⚠️ 任务登记表已关闭，停止等待");
        }
    }

    /// 整体销毁：中止任务、清空附件、释放全部剩余句柄。可重复调用。
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let aborted = self.tracker.abort_all();
        if aborted > 0 {
            log::debug!("🛑 已中止在途流水线任务 {} 个", aborted);
        }
        for item in self.store().clear() {
            self.release(&item);
        }
        let orphaned = self.pipeline.registry.release_all();
        log::info!("👋 编排器已销毁（额外释放孤立句柄 {} 个）", orphaned);
    }
}

impl Drop for ComposerService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
