//! Mock 后端（用于测试与离线演示，无需 API）
//!
//! 每个 mock 都统计调用次数；可配置固定失败，视频 mock 按脚本依次返回 poll 状态。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::backends::{
    AsyncBackend, AsyncJobHandle, BackendError, GenerationOutput, GenerationRequest, JobStatus,
    SyncBackend,
};

/// Mock 文本后端：返回固定正文，或根据请求拼一段文案
#[derive(Debug, Default)]
pub struct MockTextBackend {
    body: Option<String>,
    failure: Option<BackendError>,
    calls: AtomicUsize,
}

impl MockTextBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_body(body: impl Into<String>) -> Self {
        Self {
            body: Some(body.into()),
            ..Self::default()
        }
    }

    pub fn failing(err: BackendError) -> Self {
        Self {
            failure: Some(err),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SyncBackend for MockTextBackend {
    fn name(&self) -> &str {
        "mock-text"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        let GenerationRequest::Text(req) = request else {
            return Err(BackendError::Rejected("mock text backend only serves text".to_string()));
        };
        if let Some(body) = &self.body {
            return Ok(GenerationOutput::new(body.clone()));
        }
        let mut body = format!("[{}] {}", req.platform, req.key_message);
        let mut tags = Vec::new();
        if req.include_hashtags {
            let tag = format!("#{}", req.platform);
            body.push(' ');
            body.push_str(&tag);
            tags.push(tag);
        }
        Ok(GenerationOutput {
            payload: body,
            tags,
            ..GenerationOutput::default()
        })
    }
}

/// Mock 图片后端：返回 mock.local 地址
#[derive(Debug, Default)]
pub struct MockImageBackend {
    failure: Option<BackendError>,
    calls: AtomicUsize,
}

impl MockImageBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(err: BackendError) -> Self {
        Self {
            failure: Some(err),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SyncBackend for MockImageBackend {
    fn name(&self) -> &str {
        "mock-image"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput, BackendError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        Ok(GenerationOutput {
            payload: format!("https://mock.local/images/{}-{n}.png", request.platform()),
            caption: Some(request.prompt().to_string()),
            ..GenerationOutput::default()
        })
    }
}

/// Mock 视频后端：poll 按脚本返回，脚本用尽后一直 Pending
#[derive(Debug, Default)]
pub struct MockVideoBackend {
    script: Mutex<VecDeque<Result<JobStatus, BackendError>>>,
    submit_failure: Option<BackendError>,
    submits: AtomicUsize,
    polls: AtomicUsize,
}

impl MockVideoBackend {
    pub fn new(script: Vec<JobStatus>) -> Self {
        Self::with_results(script.into_iter().map(Ok).collect())
    }

    pub fn with_results(script: Vec<Result<JobStatus, BackendError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    /// 前 pending 次 Pending，然后 Complete
    pub fn completing_after(pending: usize, url: &str) -> Self {
        let mut script = vec![JobStatus::Pending; pending];
        script.push(JobStatus::Complete {
            url: url.to_string(),
        });
        Self::new(script)
    }

    pub fn never_completing() -> Self {
        Self::new(Vec::new())
    }

    pub fn failing_submit(err: BackendError) -> Self {
        Self {
            submit_failure: Some(err),
            ..Self::default()
        }
    }

    pub fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AsyncBackend for MockVideoBackend {
    fn name(&self) -> &str {
        "mock-video"
    }

    async fn submit(&self, _request: &GenerationRequest) -> Result<AsyncJobHandle, BackendError> {
        let n = self.submits.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.submit_failure {
            return Err(err.clone());
        }
        let job_id = format!("mock-job-{n}");
        let poll_ref = format!("mock://videos/{job_id}");
        Ok(AsyncJobHandle::new(job_id, poll_ref))
    }

    async fn poll(&self, _handle: &AsyncJobHandle) -> Result<JobStatus, BackendError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or(Ok(JobStatus::Pending))
    }
}
