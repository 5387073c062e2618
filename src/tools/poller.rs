//! 异步任务轮询状态机
//!
//! 固定间隔轮询，尝试次数有硬上限（默认 3s × 40 ≈ 120s）。每次 poll 得到 pending（继续）、
//! complete（结束）或 failed（结束）；达到上限视为超时，以 skipped 降级而非报错。
//! 取消信号会打断等待与在途 poll，之后不再发起任何后端调用。

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::backends::{AsyncBackend, AsyncJobHandle, BackendError, JobState, JobStatus};

/// 轮询策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(3), 40)
    }
}

/// 轮询终态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Completed { url: String, attempts: u32 },
    Failed { reason: String, attempts: u32 },
    TimedOut { attempts: u32 },
    Cancelled { attempts: u32 },
}

impl PollOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            PollOutcome::Completed { attempts, .. }
            | PollOutcome::Failed { attempts, .. }
            | PollOutcome::TimedOut { attempts }
            | PollOutcome::Cancelled { attempts } => *attempts,
        }
    }
}

/// 句柄已处于终态时，直接由其状态得出结果（不再调用后端）
fn terminal_outcome(handle: &AsyncJobHandle) -> Option<PollOutcome> {
    let attempts = handle.attempts();
    match handle.state() {
        JobState::Polling => None,
        JobState::Completed(url) => Some(PollOutcome::Completed {
            url: url.clone(),
            attempts,
        }),
        JobState::Failed(reason) => Some(PollOutcome::Failed {
            reason: reason.clone(),
            attempts,
        }),
        JobState::TimedOut => Some(PollOutcome::TimedOut { attempts }),
        JobState::Cancelled => Some(PollOutcome::Cancelled { attempts }),
    }
}

/// 单个任务的轮询器
pub struct JobPoller<'a> {
    backend: &'a dyn AsyncBackend,
    policy: PollPolicy,
    cancel: &'a CancellationToken,
}

impl<'a> JobPoller<'a> {
    pub fn new(backend: &'a dyn AsyncBackend, policy: PollPolicy, cancel: &'a CancellationToken) -> Self {
        Self {
            backend,
            policy,
            cancel,
        }
    }

    /// 轮询直到终态；对已终态的句柄重复调用是幂等的
    pub async fn run(&self, handle: &mut AsyncJobHandle) -> PollOutcome {
        if let Some(done) = terminal_outcome(handle) {
            return done;
        }

        while handle.attempts() < self.policy.max_attempts {
            let waited = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => false,
                _ = tokio::time::sleep(self.policy.interval) => true,
            };
            if !waited {
                return self.cancelled(handle);
            }

            handle.begin_attempt();
            let polled = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                r = self.backend.poll(handle) => Some(r),
            };
            let Some(result) = polled else {
                return self.cancelled(handle);
            };

            match result {
                Ok(status) => {
                    tracing::debug!(
                        job_id = %handle.job_id,
                        attempt = handle.attempts(),
                        status = ?status,
                        "video job polled"
                    );
                    handle.record(&status);
                }
                // 请求本身被拒或凭据缺失，再轮询也不会好转
                Err(BackendError::Rejected(reason)) | Err(BackendError::MissingCredentials(reason)) => {
                    handle.record(&JobStatus::Failed { reason });
                }
                Err(e) => {
                    tracing::warn!(
                        job_id = %handle.job_id,
                        attempt = handle.attempts(),
                        error = %e,
                        "video poll failed, will retry"
                    );
                    handle.record_error(&e.to_string());
                }
            }

            if let Some(done) = terminal_outcome(handle) {
                return done;
            }
        }

        tracing::warn!(
            job_id = %handle.job_id,
            attempts = handle.attempts(),
            elapsed_secs = handle.elapsed_secs(),
            "video job hit poll cap"
        );
        handle.mark_timed_out();
        PollOutcome::TimedOut {
            attempts: handle.attempts(),
        }
    }

    fn cancelled(&self, handle: &mut AsyncJobHandle) -> PollOutcome {
        tracing::info!(job_id = %handle.job_id, attempts = handle.attempts(), "video poll cancelled");
        handle.mark_cancelled();
        PollOutcome::Cancelled {
            attempts: handle.attempts(),
        }
    }
}
