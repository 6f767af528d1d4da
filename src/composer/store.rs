//! # 附件 Store
//!
//! ## 设计思路
//!
//! Store 是附件集合的唯一数据源。流水线与用户手势都只能通过这里的窄接口修改附件，
//! 不存在对附件字段的外部直接写入。
//!
//! ## 实现思路
//!
//! - 内部状态由 `Mutex` 保护，临界区内不跨越 `.await`，因此所有操作对其他任务是原子的。
//! - 每次成功修改都会发布一份新的 [`StoreSnapshot`]（`tokio::sync::watch`），
//!   渲染层通过订阅获得响应式视图。
//! - 所有操作都是“全函数”：目标不存在时返回 `Missing` / `None`，从不报错，
//!   这正是“消失即取消”策略所依赖的保证。
//! - 容量只在 `append` 时检查，之后不再复核。

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::watch;

use super::model::{
    Attachment, AttachmentId, AttachmentStatus, AttachmentView, MediaBlob, MediaKind, Preview,
};

/// 渲染层可观察的 Store 快照。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreSnapshot {
    /// 每次成功修改递增。
    pub revision: u64,
    pub attachments: Vec<AttachmentView>,
}

/// 追加结果。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendOutcome {
    pub accepted: Vec<AttachmentId>,
    /// 因容量不足被截断的候选数量。
    pub dropped: usize,
}

impl AppendOutcome {
    pub fn accepted_count(&self) -> usize {
        self.accepted.len()
    }
}

/// 单个附件的局部修改。
#[derive(Debug, Clone, Default)]
pub struct AttachmentPatch {
    pub status: Option<AttachmentStatus>,
    /// `Some(None)` 表示清空预览。
    pub preview: Option<Option<Preview>>,
    pub kind: Option<MediaKind>,
    pub caption: Option<String>,
    pub toggle_editing: bool,
}

impl AttachmentPatch {
    pub fn status(status: AttachmentStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn caption(text: impl Into<String>) -> Self {
        Self {
            caption: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn toggle_editing() -> Self {
        Self {
            toggle_editing: true,
            ..Self::default()
        }
    }

    pub fn with_preview(mut self, preview: Option<Preview>) -> Self {
        self.preview = Some(preview);
        self
    }

    pub fn with_kind(mut self, kind: MediaKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

/// `update` 的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// 目标已不在 Store 中（通常是用户已删除）。
    Missing,
    /// 状态迁移非法（倒退或离开终态），整个补丁被丢弃。
    Rejected,
}

struct StoreInner {
    next_id: u64,
    revision: u64,
    items: Vec<Attachment>,
}

/// 有序、容量受限的附件集合。
pub struct AttachmentStore {
    capacity: usize,
    inner: Mutex<StoreInner>,
    snapshot_tx: watch::Sender<StoreSnapshot>,
}

impl AttachmentStore {
    pub fn new(capacity: usize) -> Self {
        let (snapshot_tx, _) = watch::channel(StoreSnapshot::default());
        Self {
            capacity,
            inner: Mutex::new(StoreInner {
                next_id: 0,
                revision: 0,
                items: Vec::new(),
            }),
            snapshot_tx,
        }
    }

    fn inner(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, inner: &mut StoreInner) {
        inner.revision += 1;
        self.snapshot_tx.send_replace(StoreSnapshot {
            revision: inner.revision,
            attachments: inner.items.iter().map(AttachmentView::from).collect(),
        });
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 追加占位附件，最多填满剩余容量；多余的候选直接丢弃，不排队。
    pub fn append(&self, candidates: Vec<MediaBlob>) -> AppendOutcome {
        let mut inner = self.inner();
        let remaining = self.capacity.saturating_sub(inner.items.len());
        let total = candidates.len();

        let mut accepted = Vec::with_capacity(total.min(remaining));
        for blob in candidates.into_iter().take(remaining) {
            inner.next_id += 1;
            let id = AttachmentId(inner.next_id);
            inner.items.push(Attachment::placeholder(id, blob));
            accepted.push(id);
        }

        let dropped = total - accepted.len();
        if dropped > 0 {
            log::debug!("✂️ 超出容量，截断候选 {} 个（容量：{}）", dropped, self.capacity);
        }
        if !accepted.is_empty() {
            self.publish(&mut inner);
        }

        AppendOutcome { accepted, dropped }
    }

    /// 对指定附件应用局部修改；目标不存在时为空操作。
    pub fn update(&self, id: AttachmentId, patch: AttachmentPatch) -> UpdateOutcome {
        let mut inner = self.inner();
        let Some(item) = inner.items.iter_mut().find(|item| item.id == id) else {
            log::debug!("⏭️ 附件 {} 已不存在，丢弃过期修改", id);
            return UpdateOutcome::Missing;
        };

        if let Some(next) = patch.status {
            if !item.status.can_transition_to(next) {
                log::warn!(
                    "⚠️ 拒绝非法状态迁移 - {} {} -> {}",
                    id,
                    item.status.as_str(),
                    next.as_str()
                );
                return UpdateOutcome::Rejected;
            }
            item.status = next;
        }
        if let Some(preview) = patch.preview {
            item.preview = preview;
        }
        if let Some(kind) = patch.kind {
            item.kind = kind;
        }
        if let Some(caption) = patch.caption {
            item.caption = caption;
        }
        if patch.toggle_editing {
            item.editing_caption = !item.editing_caption;
        }

        self.publish(&mut inner);
        UpdateOutcome::Applied
    }

    /// 移除并返回附件，供调用方释放资源。
    pub fn remove(&self, id: AttachmentId) -> Option<Attachment> {
        let mut inner = self.inner();
        let index = inner.items.iter().position(|item| item.id == id)?;
        let removed = inner.items.remove(index);
        self.publish(&mut inner);
        Some(removed)
    }

    /// 移除全部附件，供调用方批量释放资源。
    pub fn clear(&self) -> Vec<Attachment> {
        let mut inner = self.inner();
        if inner.items.is_empty() {
            return Vec::new();
        }
        let removed = std::mem::take(&mut inner.items);
        self.publish(&mut inner);
        removed
    }

    pub fn contains(&self, id: AttachmentId) -> bool {
        self.inner().items.iter().any(|item| item.id == id)
    }

    pub fn get(&self, id: AttachmentId) -> Option<Attachment> {
        self.inner().items.iter().find(|item| item.id == id).cloned()
    }

    pub fn list(&self) -> Vec<Attachment> {
        self.inner().items.clone()
    }

    pub fn len(&self) -> usize {
        self.inner().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StoreSnapshot> {
        self.snapshot_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn blob(name: &str) -> MediaBlob {
        MediaBlob::new(name, Some("image/png"), vec![0u8; 4])
    }

    #[test]
    fn append_truncates_to_remaining_capacity() {
        let store = AttachmentStore::new(3);
        let first = store.append(vec![blob("a"), blob("b")]);
        assert_eq!(first.accepted_count(), 2);
        assert_eq!(first.dropped, 0);

        let second = store.append(vec![blob("c"), blob("d"), blob("e")]);
        assert_eq!(second.accepted_count(), 1);
        assert_eq!(second.dropped, 2);
        assert_eq!(store.len(), 3);

        let third = store.append(vec![blob("f")]);
        assert_eq!(third.accepted_count(), 0);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn placeholders_start_queued_with_declared_kind() {
        let store = AttachmentStore::new(5);
        let outcome = store.append(vec![
            MediaBlob::new("clip.mp4", Some("video/mp4"), vec![1]),
            MediaBlob::new("notes", None, vec![2]),
        ]);

        let video = store.get(outcome.accepted[0]).expect("video placeholder");
        assert_eq!(video.status, AttachmentStatus::Queued);
        assert_eq!(video.kind, MediaKind::Video);
        assert!(video.preview.is_none());
        assert!(video.caption.is_empty());

        let file = store.get(outcome.accepted[1]).expect("file placeholder");
        assert_eq!(file.kind, MediaKind::File);
    }

    #[test]
    fn ids_are_never_reused_after_removal() {
        let store = AttachmentStore::new(1);
        let first = store.append(vec![blob("a")]).accepted[0];
        store.remove(first).expect("remove first");
        let second = store.append(vec![blob("b")]).accepted[0];
        assert_ne!(first, second);
    }

    #[test]
    fn update_on_missing_id_is_noop() {
        let store = AttachmentStore::new(2);
        let id = store.append(vec![blob("a")]).accepted[0];
        store.remove(id);

        let outcome = store.update(id, AttachmentPatch::status(AttachmentStatus::Reading));
        assert_eq!(outcome, UpdateOutcome::Missing);
        assert!(store.is_empty());
        assert!(store.remove(id).is_none());
    }

    #[test]
    fn update_rejects_backward_and_terminal_transitions() {
        let store = AttachmentStore::new(2);
        let id = store.append(vec![blob("a")]).accepted[0];

        assert_eq!(
            store.update(id, AttachmentPatch::status(AttachmentStatus::Uploading)),
            UpdateOutcome::Applied
        );
        assert_eq!(
            store.update(
                id,
                AttachmentPatch::status(AttachmentStatus::Reading).with_kind(MediaKind::Video)
            ),
            UpdateOutcome::Rejected
        );
        let item = store.get(id).expect("still present");
        assert_eq!(item.status, AttachmentStatus::Uploading);
        assert_eq!(item.kind, MediaKind::Image);

        store.update(id, AttachmentPatch::status(AttachmentStatus::Done));
        assert_eq!(
            store.update(id, AttachmentPatch::status(AttachmentStatus::Failed)),
            UpdateOutcome::Rejected
        );
    }

    #[test]
    fn caption_patches_leave_other_items_untouched() {
        let store = AttachmentStore::new(3);
        let ids = store.append(vec![blob("a"), blob("b")]).accepted;
        store.update(ids[1], AttachmentPatch::status(AttachmentStatus::Reading));

        store.update(ids[0], AttachmentPatch::toggle_editing());
        store.update(ids[0], AttachmentPatch::caption("sunset"));

        let a = store.get(ids[0]).expect("a");
        let b = store.get(ids[1]).expect("b");
        assert!(a.editing_caption);
        assert_eq!(a.caption, "sunset");
        assert_eq!(a.status, AttachmentStatus::Queued);
        assert!(!b.editing_caption);
        assert!(b.caption.is_empty());
        assert_eq!(b.status, AttachmentStatus::Reading);
    }

    #[test]
    fn clear_returns_everything_in_order() {
        let store = AttachmentStore::new(4);
        let ids = store.append(vec![blob("a"), blob("b"), blob("c")]).accepted;
        let removed: Vec<_> = store.clear().into_iter().map(|item| item.id).collect();
        assert_eq!(removed, ids);
        assert!(store.is_empty());
        assert!(store.clear().is_empty());
    }

    #[test]
    fn subscribers_observe_each_mutation() {
        let store = AttachmentStore::new(2);
        let mut rx = store.subscribe();
        assert_eq!(rx.borrow_and_update().revision, 0);

        let id = store.append(vec![blob("a")]).accepted[0];
        assert!(rx.has_changed().expect("sender alive"));
        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot.revision, 1);
        assert_eq!(snapshot.attachments.len(), 1);
        assert_eq!(snapshot.attachments[0].id, id);

        store.update(id, AttachmentPatch::caption("x"));
        assert_eq!(store.snapshot().revision, 2);
        assert_eq!(store.snapshot().attachments[0].caption, "x");
    }

    proptest! {
        #[test]
        fn size_never_exceeds_capacity(
            capacity in 1usize..8,
            ops in prop::collection::vec((0usize..6, any::<bool>()), 1..40),
        ) {
            let store = AttachmentStore::new(capacity);
            for (count, remove_first) in ops {
                let before = store.len();
                let outcome = store.append((0..count).map(|i| blob(&i.to_string())).collect());
                prop_assert_eq!(outcome.accepted_count(), count.min(capacity - before));
                prop_assert!(store.len() <= capacity);

                if remove_first {
                    if let Some(first) = store.list().first() {
                        store.remove(first.id);
                    }
                }
            }
        }

        #[test]
        fn status_never_regresses(steps in prop::collection::vec(0usize..5, 1..20)) {
            const ORDER: [AttachmentStatus; 5] = [
                AttachmentStatus::Queued,
                AttachmentStatus::Reading,
                AttachmentStatus::Uploading,
                AttachmentStatus::Done,
                AttachmentStatus::Failed,
            ];
            let level = |s: AttachmentStatus| ORDER.iter().position(|o| *o == s).unwrap_or(0).min(3);

            let store = AttachmentStore::new(1);
            let id = store.append(vec![blob("a")]).accepted[0];

            for step in steps {
                let before = store.get(id).expect("present").status;
                let outcome = store.update(id, AttachmentPatch::status(ORDER[step]));
                let after = store.get(id).expect("present").status;

                prop_assert!(level(after) >= level(before));
                if outcome == UpdateOutcome::Rejected {
                    prop_assert_eq!(after, before);
                }
                if before.is_terminal() {
                    prop_assert_eq!(outcome, UpdateOutcome::Rejected);
                }
            }
        }
    }
}
