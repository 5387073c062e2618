//! 异步任务句柄（视频）
//!
//! 提交时创建，只由轮询循环修改（尝试次数、最近状态），进入终态后不再接受轮询结果。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 单次 poll 的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Complete { url: String },
    Failed { reason: String },
}

/// 句柄所处状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Polling,
    Completed(String),
    Failed(String),
    TimedOut,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Polling)
    }
}

/// 已提交任务的句柄
#[derive(Debug, Clone)]
pub struct AsyncJobHandle {
    pub job_id: String,
    /// 轮询地址或后端内部引用
    pub poll_ref: String,
    pub submitted_at: DateTime<Utc>,
    attempts: u32,
    last_status: Option<String>,
    state: JobState,
}

impl AsyncJobHandle {
    pub fn new(job_id: impl Into<String>, poll_ref: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            poll_ref: poll_ref.into(),
            submitted_at: Utc::now(),
            attempts: 0,
            last_status: None,
            state: JobState::Polling,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_status(&self) -> Option<&str> {
        self.last_status.as_deref()
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// 记录一次发起的 poll（在调用后端前计数，保证尝试次数不超过上限）
    pub(crate) fn begin_attempt(&mut self) {
        self.attempts += 1;
    }

    /// 记录 poll 结果；终态之后的结果被忽略，返回是否发生了状态变化
    pub(crate) fn record(&mut self, status: &JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match status {
            JobStatus::Pending => {
                self.last_status = Some("pending".to_string());
                false
            }
            JobStatus::Complete { url } => {
                self.last_status = Some("complete".to_string());
                self.state = JobState::Completed(url.clone());
                true
            }
            JobStatus::Failed { reason } => {
                self.last_status = Some("failed".to_string());
                self.state = JobState::Failed(reason.clone());
                true
            }
        }
    }

    /// 记录一次 poll 出错（传输层错误不改变任务状态，只记下原因）
    pub(crate) fn record_error(&mut self, reason: &str) {
        if !self.is_terminal() {
            self.last_status = Some(format!("error: {reason}"));
        }
    }

    pub(crate) fn mark_timed_out(&mut self) {
        if !self.is_terminal() {
            self.state = JobState::TimedOut;
        }
    }

    pub(crate) fn mark_cancelled(&mut self) {
        if !self.is_terminal() {
            self.state = JobState::Cancelled;
        }
    }

    /// 自提交以来经过的秒数
    pub fn elapsed_secs(&self) -> i64 {
        (Utc::now() - self.submitted_at).num_seconds()
    }
}
