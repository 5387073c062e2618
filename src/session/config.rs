//! 会话配置
//!
//! 调用方每次运行创建一个 SessionConfig，循环内只读。两种变体：
//! 营销活动生成（品牌 / 活动参数 + 目标平台）与研究助手（历史对话 + 新的用户消息）。

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::SessionSection;
use crate::llm::Message;
use crate::tools::ToolRegistry;

/// 无工具调用且未结束时追加的继续指令
pub const CONTINUE_PROMPT: &str = "Continue. Use the tools to produce the remaining content items, \
or reply with a short final summary and no tool calls if everything is done.";

/// 营销活动参数
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CampaignBrief {
    pub brand_name: String,
    pub campaign_goal: String,
    #[serde(default)]
    pub audience: Option<String>,
    #[serde(default)]
    pub tone: Option<String>,
    #[serde(default)]
    pub key_messages: Vec<String>,
    /// 是否为首个平台生成一段视频
    #[serde(default)]
    pub include_video: bool,
}

/// 会话变体
#[derive(Debug, Clone)]
pub enum SessionKind {
    Campaign(CampaignBrief),
    /// 研究助手：history 为此前的对话，message 为本轮用户输入
    Research { history: Vec<Message>, message: String },
}

/// 会话配置（不可变输入）
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub kind: SessionKind,
    pub platforms: Vec<String>,
    /// 模型调用轮数上限（与视频轮询次数无关）
    pub max_iterations: usize,
    /// 预期内容条数（进度分母）
    pub expected_items: usize,
    /// 允许超出预期条数的倍数：后端调用总数不超过 ceil(expected_items × tolerance)
    pub tolerance: f64,
    /// 为空表示可用全部工具
    pub allowed_tools: Vec<String>,
    pub max_concurrent_dispatches: usize,
    /// 会话墙钟上限
    pub wall_clock_limit: Option<Duration>,
}

impl SessionConfig {
    /// 营销活动会话：每个平台一条文案 + 一张图，include_video 时再加一段视频
    pub fn campaign(brief: CampaignBrief, platforms: Vec<String>) -> Self {
        let per_platform = 2;
        let video = usize::from(brief.include_video && !platforms.is_empty());
        let expected_items = (platforms.len() * per_platform + video).max(1);
        Self {
            kind: SessionKind::Campaign(brief),
            platforms,
            max_iterations: 12,
            expected_items,
            tolerance: 1.5,
            allowed_tools: Vec::new(),
            max_concurrent_dispatches: 3,
            wall_clock_limit: Some(Duration::from_secs(600)),
        }
    }

    /// 研究助手会话
    pub fn research(history: Vec<Message>, message: impl Into<String>) -> Self {
        Self {
            kind: SessionKind::Research {
                history,
                message: message.into(),
            },
            platforms: Vec::new(),
            max_iterations: 8,
            expected_items: 1,
            tolerance: 3.0,
            allowed_tools: Vec::new(),
            max_concurrent_dispatches: 3,
            wall_clock_limit: Some(Duration::from_secs(300)),
        }
    }

    /// 用配置文件中的 [session] 段覆盖预算类参数
    pub fn with_settings(mut self, settings: &SessionSection) -> Self {
        self.max_iterations = settings.max_iterations;
        self.tolerance = settings.tolerance;
        self.max_concurrent_dispatches = settings.max_concurrent_dispatches;
        self.wall_clock_limit = (settings.wall_clock_secs > 0)
            .then(|| Duration::from_secs(settings.wall_clock_secs));
        self
    }

    pub fn with_max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = n;
        self
    }

    pub fn with_expected_items(mut self, n: usize) -> Self {
        self.expected_items = n;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_allowed_tools(mut self, tools: Vec<String>) -> Self {
        self.allowed_tools = tools;
        self
    }

    pub fn with_wall_clock_limit(mut self, limit: Option<Duration>) -> Self {
        self.wall_clock_limit = limit;
        self
    }

    /// 后端调用槽位上限：ceil(expected_items × max(tolerance, 1))，至少为 1
    pub fn item_cap(&self) -> usize {
        let tolerance = if self.tolerance.is_finite() {
            self.tolerance.max(1.0)
        } else {
            1.0
        };
        ((self.expected_items as f64 * tolerance).ceil() as usize).max(1)
    }

    pub fn system_prompt(&self, registry: &ToolRegistry) -> String {
        let tools = registry
            .tool_descriptions()
            .into_iter()
            .map(|(name, desc)| format!("- {name}: {desc}"))
            .collect::<Vec<_>>()
            .join("\n");
        match &self.kind {
            SessionKind::Campaign(brief) => {
                let mut prompt = format!(
                    "You are the campaign producer for the brand \"{}\".\nCampaign goal: {}\n",
                    brief.brand_name, brief.campaign_goal
                );
                if let Some(audience) = &brief.audience {
                    prompt.push_str(&format!("Audience: {audience}\n"));
                }
                if let Some(tone) = &brief.tone {
                    prompt.push_str(&format!("Brand voice: {tone}\n"));
                }
                if !brief.key_messages.is_empty() {
                    prompt.push_str(&format!("Key messages: {}\n", brief.key_messages.join("; ")));
                }
                prompt.push_str(&format!(
                    "Target platforms: {}\nProduce about {} content items with the tools below. \
Independent items can be requested in the same turn. \
When everything is produced, reply with a short summary and no tool calls.\n\nTools:\n{tools}",
                    self.platforms.join(", "),
                    self.expected_items
                ));
                prompt
            }
            SessionKind::Research { .. } => format!(
                "You are a marketing research assistant. Answer from the conversation so far. \
Only call a tool when the user asks for content to be created.\n\nTools:\n{tools}"
            ),
        }
    }

    /// 初始对话：营销活动为一条 user 消息；研究助手为历史 + 新消息
    pub fn initial_messages(&self) -> Vec<Message> {
        match &self.kind {
            SessionKind::Campaign(brief) => {
                let mut ask = format!(
                    "Create the {} campaign content for: {}.",
                    brief.brand_name,
                    self.platforms.join(", ")
                );
                if brief.include_video {
                    ask.push_str(" Include one short video.");
                }
                vec![Message::user(ask)]
            }
            SessionKind::Research { history, message } => {
                let mut messages = history.clone();
                messages.push(Message::user(message.clone()));
                messages
            }
        }
    }
}
