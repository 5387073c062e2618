//! 进度上报
//!
//! 百分比由 completed / expected 纯函数计算；会话期间单调不减，终止前封顶 99，
//! 终止时恰好上报一次 100。回调自身 panic 会被吞掉并记日志，不影响会话。

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::content::ContentRecord;

/// 单次进度通知
#[derive(Debug, Clone, Serialize)]
pub struct ProgressUpdate {
    pub percent: u8,
    pub message: String,
    /// 本次通知对应的新记录（若有）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<ContentRecord>,
}

pub type ProgressCallback = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

/// round(completed / expected × 100)，限制在 [0, 100]；expected 为 0 时为 0
pub fn percent(completed: usize, expected: usize) -> u8 {
    if expected == 0 {
        return 0;
    }
    let p = (completed as f64 / expected as f64 * 100.0).round();
    p.clamp(0.0, 100.0) as u8
}

/// 会话进度上报器；可在并发分发间共享引用
pub struct ProgressReporter {
    callback: Option<ProgressCallback>,
    last: AtomicU8,
    finished: AtomicBool,
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("last", &self.last.load(Ordering::SeqCst))
            .field("finished", &self.finished.load(Ordering::SeqCst))
            .finish()
    }
}

impl ProgressReporter {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        Self {
            callback: Some(Arc::new(callback)),
            last: AtomicU8::new(0),
            finished: AtomicBool::new(false),
        }
    }

    /// 不接收通知的上报器
    pub fn silent() -> Self {
        Self {
            callback: None,
            last: AtomicU8::new(0),
            finished: AtomicBool::new(false),
        }
    }

    /// 最近一次上报的百分比
    pub fn last_percent(&self) -> u8 {
        self.last.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// 会话中途上报；返回实际上报的百分比（单调、≤ 99）
    pub fn report(
        &self,
        completed: usize,
        expected: usize,
        message: impl Into<String>,
        record: Option<&ContentRecord>,
    ) -> u8 {
        if self.is_finished() {
            return 100;
        }
        let candidate = percent(completed, expected).min(99);
        let previous = self.last.fetch_max(candidate, Ordering::SeqCst);
        let reported = previous.max(candidate);
        self.deliver(ProgressUpdate {
            percent: reported,
            message: message.into(),
            record: record.cloned(),
        });
        reported
    }

    /// 终止上报：100%，只生效一次
    pub fn finish(&self, message: impl Into<String>) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        self.last.store(100, Ordering::SeqCst);
        self.deliver(ProgressUpdate {
            percent: 100,
            message: message.into(),
            record: None,
        });
    }

    fn deliver(&self, update: ProgressUpdate) {
        let Some(callback) = &self.callback else {
            return;
        };
        let percent = update.percent;
        if catch_unwind(AssertUnwindSafe(|| callback(update))).is_err() {
            tracing::warn!(percent, "progress callback panicked; update dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recording() -> (ProgressReporter, Arc<Mutex<Vec<u8>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let reporter = ProgressReporter::new(move |u| sink.lock().unwrap().push(u.percent));
        (reporter, seen)
    }

    #[test]
    fn test_percent_is_pure_and_clamped() {
        assert_eq!(percent(0, 4), 0);
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(2, 3), 67);
        assert_eq!(percent(9, 4), 100);
        assert_eq!(percent(3, 0), 0);
    }

    #[test]
    fn test_monotonic_and_capped_before_finish() {
        let (reporter, seen) = recording();
        reporter.report(2, 4, "half", None);
        reporter.report(1, 4, "late", None);
        reporter.report(8, 4, "over", None);
        assert_eq!(reporter.last_percent(), 99);
        reporter.finish("done");
        reporter.finish("again");
        assert_eq!(*seen.lock().unwrap(), vec![50, 50, 99, 100]);
    }

    #[test]
    fn test_callback_panic_is_swallowed() {
        let reporter = ProgressReporter::new(|u| {
            if u.percent == 25 {
                panic!("ui went away");
            }
        });
        assert_eq!(reporter.report(1, 4, "a", None), 25);
        assert_eq!(reporter.report(2, 4, "b", None), 50);
        reporter.finish("done");
        assert!(reporter.is_finished());
    }

    #[test]
    fn test_report_after_finish_is_ignored() {
        let (reporter, seen) = recording();
        reporter.finish("done");
        reporter.report(1, 2, "stray", None);
        assert_eq!(*seen.lock().unwrap(), vec![100]);
    }
}
