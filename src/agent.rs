//! Headless 运行时装配
//!
//! 根据 AppConfig 构建模型传输、后端集合与工具分发器，得到可直接运行会话的 ConversationLoop。
//! provider = "mock" 时全部使用离线 mock；provider = "openai" 时 OPENAI_API_KEY 缺失为启动期配置错误。

use std::sync::Arc;
use std::time::Duration;

use crate::backends::{
    BackendSet, HttpImageBackend, HttpVideoBackend, MockImageBackend, MockTextBackend,
    MockVideoBackend, OpenAiTextBackend,
};
use crate::config::AppConfig;
use crate::core::AgentError;
use crate::llm::{ModelTransport, OpenAiTransport, ScriptedTransport, TransportError};
use crate::session::ConversationLoop;
use crate::tools::{DispatchSettings, PollPolicy, ToolDispatcher, ToolRegistry};

fn env_key(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|k| !k.trim().is_empty())
}

fn is_mock(cfg: &AppConfig) -> bool {
    cfg.llm.provider.eq_ignore_ascii_case("mock")
}

/// 由配置得到分发器设置（超时、轮询节奏、图片降级策略）
pub fn dispatch_settings(cfg: &AppConfig) -> DispatchSettings {
    let video = &cfg.backends.video;
    DispatchSettings {
        text_timeout: Duration::from_secs(cfg.backends.text.timeout_secs),
        image_timeout: Duration::from_secs(cfg.backends.image.timeout_secs),
        video_submit_timeout: Duration::from_secs(video.timeout_secs),
        poll: PollPolicy::new(Duration::from_secs(video.poll_interval_secs), video.max_poll_attempts),
        image_placeholder_on_error: cfg.backends.image.placeholder_on_error,
    }
}

/// 构建后端集合；真实后端缺凭据时仍会创建，调用时返回 MissingCredentials 并按策略降级
pub fn build_backends(cfg: &AppConfig) -> BackendSet {
    if is_mock(cfg) {
        return BackendSet::new()
            .with_text(Arc::new(MockTextBackend::new()))
            .with_image(Arc::new(MockImageBackend::new()))
            .with_video(Arc::new(MockVideoBackend::completing_after(
                2,
                "https://mock.local/videos/teaser.mp4",
            )));
    }

    let openai_key = env_key("OPENAI_API_KEY");
    let text_base = cfg
        .backends
        .text
        .base_url
        .as_deref()
        .or(cfg.llm.base_url.as_deref());
    let image = &cfg.backends.image;
    let video = &cfg.backends.video;
    BackendSet::new()
        .with_text(Arc::new(OpenAiTextBackend::new(
            text_base,
            &cfg.backends.text.model,
            openai_key.as_deref(),
        )))
        .with_image(Arc::new(HttpImageBackend::new(
            &image.base_url,
            &image.model,
            &image.size,
            openai_key,
            image.timeout_secs,
        )))
        .with_video(Arc::new(HttpVideoBackend::new(
            &video.base_url,
            &video.model,
            env_key("VIDEO_API_KEY"),
            video.timeout_secs,
        )))
}

/// 构建模型传输；openai 缺凭据、provider 未知均为配置错误
pub fn build_transport(cfg: &AppConfig) -> Result<Arc<dyn ModelTransport>, AgentError> {
    match cfg.llm.provider.to_ascii_lowercase().as_str() {
        "mock" => Ok(Arc::new(ScriptedTransport::campaign_demo(
            "Demo",
            &["instagram".to_string()],
            false,
        ))),
        "openai" => {
            let transport = OpenAiTransport::from_env(
                cfg.llm.base_url.as_deref(),
                &cfg.llm.model,
                cfg.llm.request_timeout_secs,
            )
            .map_err(|e| match e {
                TransportError::MissingCredentials(var) => {
                    AgentError::ConfigError(format!("{var} is not set; the model transport requires it"))
                }
                other => AgentError::Transport(other),
            })?;
            Ok(Arc::new(transport))
        }
        other => Err(AgentError::ConfigError(format!(
            "unknown llm provider '{other}' (expected openai or mock)"
        ))),
    }
}

/// 用给定传输装配运行时（演示脚本、测试替身等）
pub fn build_runtime_with(
    cfg: &AppConfig,
    transport: Arc<dyn ModelTransport>,
) -> Result<ConversationLoop, AgentError> {
    let registry = ToolRegistry::builtin()?;
    let dispatcher = ToolDispatcher::new(registry, build_backends(cfg), dispatch_settings(cfg))?;
    tracing::info!(
        provider = %cfg.llm.provider,
        model = %cfg.llm.model,
        tools = dispatcher.registry().len(),
        "runtime ready"
    );
    Ok(ConversationLoop::new(transport, Arc::new(dispatcher)))
}

/// 由配置装配运行时；任何配置问题都在首次模型调用前报出
pub fn build_runtime(cfg: &AppConfig) -> Result<ConversationLoop, AgentError> {
    let transport = build_transport(cfg)?;
    build_runtime_with(cfg, transport)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_config() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "mock".to_string();
        cfg
    }

    #[test]
    fn test_mock_runtime_builds() {
        let runtime = build_runtime(&mock_config()).unwrap();
        assert_eq!(runtime.dispatcher().registry().len(), 4);
    }

    #[test]
    fn test_unknown_provider_is_config_error() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "carrier-pigeon".to_string();
        let err = build_runtime(&cfg).err().unwrap();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_dispatch_settings_follow_config() {
        let mut cfg = mock_config();
        cfg.backends.video.poll_interval_secs = 1;
        cfg.backends.video.max_poll_attempts = 7;
        cfg.backends.image.placeholder_on_error = false;
        let settings = dispatch_settings(&cfg);
        assert_eq!(settings.poll, PollPolicy::new(Duration::from_secs(1), 7));
        assert!(!settings.image_placeholder_on_error);
    }
}
