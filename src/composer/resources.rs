//! # 预览资源生命周期
//!
//! ## 设计思路
//!
//! 一部分预览并非纯内存值，而是指向注册表条目的句柄（`blob:` URL）。
//! 这类资源在创建时登记，并且必须在以下两种时机之一**恰好释放一次**：
//! 1. 所属附件被删除（单个删除或整体清空）
//! 2. 编排器整体销毁
//!
//! ## 实现思路
//!
//! - 注册表以 URL 为键保存原始字节，渲染层可通过 `resolve` 取回内容。
//! - `release` 对内联预览、未知句柄、重复释放均返回 `false`，不视为错误。
//! - 锁中毒时直接取回内部数据继续工作，保证所有操作不会失败。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;

use super::model::Preview;

const OBJECT_URL_PREFIX: &str = "blob:composer/";

struct RegisteredResource {
    mime: String,
    bytes: Bytes,
}

/// 预览句柄注册表。
#[derive(Default)]
pub struct PreviewRegistry {
    next_handle: AtomicU64,
    live: Mutex<HashMap<String, RegisteredResource>>,
}

impl PreviewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn live(&self) -> MutexGuard<'_, HashMap<String, RegisteredResource>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 登记一段字节并返回对应的 `blob:` 句柄。
    pub fn register(&self, bytes: Bytes, mime: &str) -> Preview {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed) + 1;
        let url = format!("{}{}", OBJECT_URL_PREFIX, handle);

        self.live().insert(
            url.clone(),
            RegisteredResource {
                mime: mime.to_string(),
                bytes,
            },
        );
        log::debug!("🔗 预览句柄已登记 - {} ({})", url, mime);

        Preview::ObjectUrl(url)
    }

    /// 取回句柄对应的 MIME 与字节，供渲染层展示。
    pub fn resolve(&self, url: &str) -> Option<(String, Bytes)> {
        self.live()
            .get(url)
            .map(|res| (res.mime.clone(), res.bytes.clone()))
    }

    /// 释放单个预览。
    ///
    /// 返回是否真的释放了一个仍然存活的句柄。
    pub fn release(&self, preview: &Preview) -> bool {
        let Preview::ObjectUrl(url) = preview else {
            return false;
        };

        let released = self.live().remove(url).is_some();
        if released {
            log::debug!("🧹 预览句柄已释放 - {}", url);
        } else {
            log::debug!("⏭️ 预览句柄已不存在，跳过释放 - {}", url);
        }
        released
    }

    /// 释放全部仍存活的句柄（整体销毁时调用）。
    pub fn release_all(&self) -> usize {
        let mut live = self.live();
        let count = live.len();
        live.clear();
        if count > 0 {
            log::info!("🧹 已释放剩余预览句柄：{} 个", count);
        }
        count
    }

    pub fn live_count(&self) -> usize {
        self.live().len()
    }
}
