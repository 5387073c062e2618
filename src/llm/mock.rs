//! 脚本化模型传输（用于测试与离线演示，无需 API）
//!
//! 按顺序返回预先排好的回复；脚本用尽后返回自然结束。每次请求的消息快照都会被记录，便于断言。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;

use crate::llm::{
    Message, ModelRequest, ModelResponse, ModelTransport, ToolInvocation, TransportError,
};

/// 一步脚本：正常回复或传输失败
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Respond(ModelResponse),
    Fail(TransportError),
}

/// 脚本化传输
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<ScriptStep>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<ModelResponse>) -> Self {
        Self::from_steps(responses.into_iter().map(ScriptStep::Respond).collect())
    }

    pub fn from_steps(steps: Vec<ScriptStep>) -> Self {
        Self {
            script: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// 离线演示脚本：每个平台生成一条帖子与一张配图，可选一段视频，最后给出总结
    pub fn campaign_demo(brand: &str, platforms: &[String], include_video: bool) -> Self {
        let mut calls = Vec::new();
        for (i, platform) in platforms.iter().enumerate() {
            calls.push(ToolInvocation::new(
                format!("demo_post_{i}"),
                "generate_social_post",
                json!({
                    "platform": platform,
                    "key_message": format!("{brand} is launching something new"),
                    "tone": "friendly",
                    "include_hashtags": true,
                }),
            ));
            calls.push(ToolInvocation::new(
                format!("demo_image_{i}"),
                "generate_image",
                json!({
                    "platform": platform,
                    "prompt": format!("Hero product shot for {brand}, clean studio lighting"),
                }),
            ));
        }
        let mut steps = vec![ModelResponse::tool_use("Drafting posts and visuals.", calls)];
        if include_video {
            if let Some(platform) = platforms.first() {
                steps.push(ModelResponse::tool_use(
                    "Adding a short teaser video.",
                    vec![ToolInvocation::new(
                        "demo_video_0",
                        "generate_video",
                        json!({
                            "platform": platform,
                            "prompt": format!("10 second teaser for {brand}"),
                            "duration_secs": 10,
                        }),
                    )],
                ));
            }
        }
        steps.push(ModelResponse::complete(format!(
            "Campaign for {brand} is ready across {} platform(s).",
            platforms.len()
        )));
        Self::new(steps)
    }

    /// 已收到的请求次数
    pub fn request_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// 第 n 次请求时的对话历史快照（不含 system）
    pub fn request_messages(&self, n: usize) -> Option<Vec<Message>> {
        self.requests.lock().ok().and_then(|r| r.get(n).cloned())
    }
}

#[async_trait]
impl ModelTransport for ScriptedTransport {
    async fn respond(&self, request: ModelRequest<'_>) -> Result<ModelResponse, TransportError> {
        if let Ok(mut reqs) = self.requests.lock() {
            reqs.push(request.messages.to_vec());
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match next {
            Some(ScriptStep::Respond(resp)) => Ok(resp),
            Some(ScriptStep::Fail(err)) => Err(err),
            None => Ok(ModelResponse::complete("")),
        }
    }
}
