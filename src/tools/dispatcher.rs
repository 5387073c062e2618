//! 工具分发器
//!
//! dispatch(invocation) 总是恰好返回一个 DispatchOutcome：解析定义 → 集中校验输入（失败则不调用任何后端）
//! → 调用映射的后端（同步带超时；视频走 JobPoller）→ 归一化为 ContentRecord 与给模型的文本消息。
//! 后端错误、超时甚至 panic 都在这里被吸收为数据，绝不向 ConversationLoop 传播。
//! 每次分发输出一条结构化审计日志（JSON）。

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::backends::{
    AsyncBackend, BackendError, BackendSet, Capability, GenerationBackend, GenerationOutput,
    GenerationRequest, SyncBackend,
};
use crate::content::{ContentRecord, ContentStatus};
use crate::core::AgentError;
use crate::llm::ToolInvocation;
use crate::tools::{JobPoller, PollOutcome, PollPolicy, ToolRegistry};

/// 给模型的工具结果中正文预览的最大字符数
const MESSAGE_PREVIEW_CHARS: usize = 600;

/// 单次分发的结果
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub invocation_id: String,
    pub tool: String,
    pub record: Option<ContentRecord>,
    /// 返回给模型的工具结果文本（失败时同样存在）
    pub message: String,
    pub is_error: bool,
    /// 是否实际调用了后端（校验失败 / 未知工具 / 预算跳过时为 false）
    pub backend_called: bool,
}

impl DispatchOutcome {
    /// 不调用后端、不产生记录的失败结果
    pub fn rejected(invocation: &ToolInvocation, message: impl Into<String>) -> Self {
        Self {
            invocation_id: invocation.id.clone(),
            tool: invocation.name.clone(),
            record: None,
            message: message.into(),
            is_error: true,
            backend_called: false,
        }
    }

    /// 未执行的调用（预算用尽、重复 id 等），不算错误
    pub fn not_run(invocation: &ToolInvocation, message: impl Into<String>) -> Self {
        Self {
            is_error: false,
            ..Self::rejected(invocation, message)
        }
    }

    fn with_record(invocation: &ToolInvocation, record: ContentRecord, message: String) -> Self {
        let is_error = record.status == ContentStatus::Error;
        Self {
            invocation_id: invocation.id.clone(),
            tool: invocation.name.clone(),
            record: Some(record),
            message,
            is_error,
            backend_called: true,
        }
    }

    fn cancelled(invocation: &ToolInvocation) -> Self {
        Self {
            backend_called: true,
            ..Self::not_run(invocation, format!("{} was cancelled before completion", invocation.name))
        }
    }
}

/// 分发器设置
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub text_timeout: Duration,
    pub image_timeout: Duration,
    /// 视频提交请求的超时（轮询另有 PollPolicy）
    pub video_submit_timeout: Duration,
    pub poll: PollPolicy,
    /// 图片后端失败时是否以占位图降级（缺凭据总是降级）
    pub image_placeholder_on_error: bool,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            text_timeout: Duration::from_secs(60),
            image_timeout: Duration::from_secs(90),
            video_submit_timeout: Duration::from_secs(30),
            poll: PollPolicy::default(),
            image_placeholder_on_error: true,
        }
    }
}

/// 工具分发器：持有注册表、后端集合与超时设置
pub struct ToolDispatcher {
    registry: ToolRegistry,
    backends: BackendSet,
    settings: DispatchSettings,
}

impl ToolDispatcher {
    /// 构建分发器；注册表中引用的每种能力都必须有对应后端，否则为启动期配置错误
    pub fn new(
        registry: ToolRegistry,
        backends: BackendSet,
        settings: DispatchSettings,
    ) -> Result<Self, AgentError> {
        for def in registry.definitions() {
            if backends.get(def.capability).is_none() {
                return Err(AgentError::invalid_tool(
                    &def.name,
                    format!("no backend configured for capability {:?}", def.capability),
                ));
            }
        }
        Ok(Self {
            registry,
            backends,
            settings,
        })
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// 分发一次工具调用；任何失败（含 panic）都转为结果，不会向上传播
    pub async fn dispatch(
        &self,
        invocation: &ToolInvocation,
        cancel: &CancellationToken,
    ) -> DispatchOutcome {
        let start = Instant::now();
        let outcome = match AssertUnwindSafe(self.dispatch_inner(invocation, cancel))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                tracing::error!(tool = %invocation.name, invocation_id = %invocation.id, reason = %reason, "tool panicked");
                DispatchOutcome::rejected(
                    invocation,
                    format!("{} crashed unexpectedly: {reason}", invocation.name),
                )
            }
        };

        let status = match (&outcome.record, outcome.is_error) {
            (Some(r), _) => format!("{:?}", r.status).to_lowercase(),
            (None, true) => "error".to_string(),
            (None, false) => "not_run".to_string(),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": invocation.name,
            "invocation_id": invocation.id,
            "ok": !outcome.is_error,
            "outcome": status,
            "backend_called": outcome.backend_called,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(&invocation.input),
        });
        tracing::info!(audit = %audit.to_string(), "tool");
        outcome
    }

    async fn dispatch_inner(
        &self,
        invocation: &ToolInvocation,
        cancel: &CancellationToken,
    ) -> DispatchOutcome {
        let Some(def) = self.registry.resolve(&invocation.name) else {
            return DispatchOutcome::rejected(invocation, format!("unknown tool: {}", invocation.name));
        };
        if let Err(reason) = def.validate_input(&invocation.input) {
            return DispatchOutcome::rejected(
                invocation,
                format!("invalid input for {}: {reason}", def.name),
            );
        }
        let request = match GenerationRequest::from_input(def.capability, &invocation.input) {
            Ok(r) => r,
            Err(reason) => {
                return DispatchOutcome::rejected(
                    invocation,
                    format!("invalid input for {}: {reason}", def.name),
                )
            }
        };
        let Some(backend) = self.backends.get(def.capability) else {
            return DispatchOutcome::rejected(
                invocation,
                format!("no backend available for {}", def.name),
            );
        };

        match backend {
            GenerationBackend::Sync(b) => {
                self.run_sync(invocation, def.capability, b.as_ref(), &request, cancel)
                    .await
            }
            GenerationBackend::Async(b) => {
                self.run_async(invocation, b.as_ref(), &request, cancel).await
            }
        }
    }

    async fn run_sync(
        &self,
        invocation: &ToolInvocation,
        capability: Capability,
        backend: &dyn SyncBackend,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> DispatchOutcome {
        let limit = match capability {
            Capability::Image => self.settings.image_timeout,
            _ => self.settings.text_timeout,
        };
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            r = tokio::time::timeout(limit, backend.generate(request)) => Some(r),
        };
        let result = match result {
            None => return DispatchOutcome::cancelled(invocation),
            Some(Ok(r)) => r,
            Some(Err(_)) => Err(BackendError::Timeout(limit.as_secs())),
        };

        let output = match result {
            Ok(output) => output,
            Err(e) => match self.degrade(capability, request, &e) {
                Some(placeholder) => placeholder,
                None => {
                    tracing::warn!(tool = %invocation.name, backend = backend.name(), error = %e, "backend call failed");
                    let record = ContentRecord::error(
                        &invocation.id,
                        request.platform(),
                        capability.kind(),
                        e.to_string(),
                    );
                    let message = format!(
                        "Failed to generate {} for {}: {e}",
                        capability.kind(),
                        request.platform()
                    );
                    return DispatchOutcome::with_record(invocation, record, message);
                }
            },
        };

        let message = describe_output(capability, request.platform(), &output);
        let record = ContentRecord::complete(
            &invocation.id,
            request.platform(),
            capability.kind(),
            output.payload,
        )
        .with_caption(output.caption)
        .with_tags(output.tags)
        .with_reason(output.degraded);
        DispatchOutcome::with_record(invocation, record, message)
    }

    async fn run_async(
        &self,
        invocation: &ToolInvocation,
        backend: &dyn AsyncBackend,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> DispatchOutcome {
        let kind = request.capability().kind();
        let platform = request.platform();
        let limit = self.settings.video_submit_timeout;

        let submitted = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            r = tokio::time::timeout(limit, backend.submit(request)) => Some(r),
        };
        let mut handle = match submitted {
            None => return DispatchOutcome::cancelled(invocation),
            Some(Ok(Ok(handle))) => handle,
            Some(Ok(Err(e))) => return self.async_failure(invocation, request, e.to_string()),
            Some(Err(_)) => {
                let e = BackendError::Timeout(limit.as_secs());
                return self.async_failure(invocation, request, e.to_string());
            }
        };
        tracing::info!(tool = %invocation.name, job_id = %handle.job_id, "job submitted, polling");

        let outcome = JobPoller::new(backend, self.settings.poll, cancel)
            .run(&mut handle)
            .await;
        match outcome {
            PollOutcome::Completed { url, attempts } => {
                let message = format!(
                    "Created {kind} for {platform}: {url} (ready after {attempts} status checks)"
                );
                let record = ContentRecord::complete(&invocation.id, platform, kind, url);
                DispatchOutcome::with_record(invocation, record, message)
            }
            PollOutcome::Failed { reason, .. } => self.async_failure(invocation, request, reason),
            PollOutcome::TimedOut { attempts } => {
                let reason = format!(
                    "{kind} job {} still rendering after {attempts} status checks; skipped",
                    handle.job_id
                );
                let record = ContentRecord::skipped(&invocation.id, platform, kind, reason.clone());
                DispatchOutcome::with_record(invocation, record, reason)
            }
            PollOutcome::Cancelled { .. } => DispatchOutcome::cancelled(invocation),
        }
    }

    fn async_failure(
        &self,
        invocation: &ToolInvocation,
        request: &GenerationRequest,
        reason: String,
    ) -> DispatchOutcome {
        let kind = request.capability().kind();
        tracing::warn!(tool = %invocation.name, reason = %reason, "async job failed");
        let message = format!("Failed to generate {kind} for {}: {reason}", request.platform());
        let record = ContentRecord::error(&invocation.id, request.platform(), kind, reason);
        DispatchOutcome::with_record(invocation, record, message)
    }

    /// 降级策略：图片缺凭据总是返回占位图；其它图片错误按 image_placeholder_on_error 决定。文本不降级。
    fn degrade(
        &self,
        capability: Capability,
        request: &GenerationRequest,
        err: &BackendError,
    ) -> Option<GenerationOutput> {
        if capability != Capability::Image {
            return None;
        }
        let always = matches!(err, BackendError::MissingCredentials(_));
        if !always && !self.settings.image_placeholder_on_error {
            return None;
        }
        tracing::info!(error = %err, "image backend degraded to placeholder");
        Some(GenerationOutput {
            payload: placeholder_locator(request.platform(), request.prompt()),
            degraded: Some(format!("placeholder image: {err}")),
            ..GenerationOutput::default()
        })
    }
}

/// 明确标记的占位图地址：placeholder://image/{platform}/{prompt-slug}
pub fn placeholder_locator(platform: &str, prompt: &str) -> String {
    let slug: String = prompt
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join("-");
    let slug: String = slug.chars().take(48).collect();
    let slug = slug.trim_end_matches('-');
    let slug = if slug.is_empty() { "untitled" } else { slug };
    format!("placeholder://image/{platform}/{slug}")
}

fn describe_output(capability: Capability, platform: &str, output: &GenerationOutput) -> String {
    let kind = capability.kind();
    let mut message = match capability {
        Capability::Text => {
            let preview: String = output.payload.chars().take(MESSAGE_PREVIEW_CHARS).collect();
            let ellipsis = if output.payload.chars().count() > MESSAGE_PREVIEW_CHARS {
                "..."
            } else {
                ""
            };
            format!("Created {kind} for {platform}:\n{preview}{ellipsis}")
        }
        _ => format!("Created {kind} for {platform}: {}", output.payload),
    };
    if let Some(note) = &output.degraded {
        message.push_str(&format!(" ({note})"));
    }
    message
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
