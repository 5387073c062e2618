//! 结果累加器
//!
//! 会话内共享、只追加的 ContentRecord 列表；并发分发的完成顺序即追加顺序。
//! 锁中毒时取回内部数据继续使用，已追加的记录不会丢失。

use std::sync::{Mutex, MutexGuard};

use crate::content::{ContentRecord, ContentStatus};

#[derive(Debug, Default)]
pub struct ResultAccumulator {
    records: Mutex<Vec<ContentRecord>>,
}

impl ResultAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ContentRecord>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 追加一条记录，返回追加后的总数
    pub fn append(&self, record: ContentRecord) -> usize {
        let mut records = self.lock();
        records.push(record);
        records.len()
    }

    /// 当前所有记录的快照（按追加顺序）
    pub fn all(&self) -> Vec<ContentRecord> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn count_status(&self, status: ContentStatus) -> usize {
        self.lock().iter().filter(|r| r.status == status).count()
    }

    pub fn into_records(self) -> Vec<ContentRecord> {
        self.records
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
