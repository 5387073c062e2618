//! 内置营销工具集
//!
//! generate_social_post / generate_newsletter_section → 文本后端；generate_image → 图片后端；
//! generate_video → 视频后端（提交 + 轮询）。所有工具都要求 platform。

use crate::backends::Capability;
use crate::core::AgentError;
use crate::tools::{FieldSpec, ToolDefinition, ToolRegistry};

pub const SOCIAL_PLATFORMS: &[&str] = &[
    "instagram",
    "facebook",
    "linkedin",
    "twitter",
    "tiktok",
    "youtube",
    "threads",
];

pub const NEWSLETTER_PLATFORMS: &[&str] = &["newsletter", "email"];

pub const VIDEO_PLATFORMS: &[&str] = &["instagram", "facebook", "linkedin", "twitter", "tiktok", "youtube"];

const TONES: &[&str] = &[
    "professional",
    "friendly",
    "playful",
    "inspirational",
    "urgent",
    "informative",
];

/// 所有内置工具可用的平台（去重）
pub fn supported_platforms() -> Vec<&'static str> {
    let mut all: Vec<&'static str> = SOCIAL_PLATFORMS
        .iter()
        .chain(NEWSLETTER_PLATFORMS.iter())
        .copied()
        .collect();
    all.push("blog");
    all.sort_unstable();
    all.dedup();
    all
}

pub fn social_post_tool() -> ToolDefinition {
    ToolDefinition::new(
        "generate_social_post",
        "Write one ready-to-publish social media post for a single platform.",
        Capability::Text,
    )
    .field(FieldSpec::string("platform", "Target platform").required().one_of(SOCIAL_PLATFORMS))
    .field(FieldSpec::string("key_message", "The core message the post must convey").required())
    .field(
        FieldSpec::string("content_type", "Post format")
            .one_of(&["post", "thread", "story_caption", "ad_copy"]),
    )
    .field(FieldSpec::string("tone", "Voice of the copy").one_of(TONES))
    .field(FieldSpec::integer("max_length", "Maximum characters").range(20, 3000))
    .field(FieldSpec::boolean("include_hashtags", "Append relevant hashtags"))
}

pub fn newsletter_section_tool() -> ToolDefinition {
    ToolDefinition::new(
        "generate_newsletter_section",
        "Write one section of an email newsletter.",
        Capability::Text,
    )
    .field(
        FieldSpec::string("platform", "Delivery channel")
            .required()
            .one_of(NEWSLETTER_PLATFORMS),
    )
    .field(
        FieldSpec::string("content_type", "Which section to write")
            .required()
            .one_of(&["intro", "feature", "call_to_action", "digest"]),
    )
    .field(FieldSpec::string("key_message", "What the section is about").required())
    .field(FieldSpec::string("tone", "Voice of the copy").one_of(TONES))
    .field(FieldSpec::integer("max_length", "Maximum characters").range(50, 5000))
}

pub fn image_tool() -> ToolDefinition {
    let platforms = supported_platforms();
    ToolDefinition::new(
        "generate_image",
        "Create one image for a platform from a natural-language prompt. Returns an image URL.",
        Capability::Image,
    )
    .field(FieldSpec::string("platform", "Where the image will be used").required().one_of(&platforms))
    .field(FieldSpec::string("prompt", "Detailed visual description").required())
    .field(FieldSpec::string("size", "Image size").one_of(&["1024x1024", "1792x1024", "1024x1792"]))
}

pub fn video_tool() -> ToolDefinition {
    ToolDefinition::new(
        "generate_video",
        "Render one short video clip. Slow: may take up to two minutes.",
        Capability::Video,
    )
    .field(FieldSpec::string("platform", "Where the video will be posted").required().one_of(VIDEO_PLATFORMS))
    .field(FieldSpec::string("prompt", "Scene description").required())
    .field(FieldSpec::integer("duration_secs", "Clip length in seconds").range(2, 60))
    .field(FieldSpec::string("aspect", "Aspect ratio").one_of(&["16:9", "9:16", "1:1"]))
}

pub fn builtin_tools() -> Vec<ToolDefinition> {
    vec![
        social_post_tool(),
        newsletter_section_tool(),
        image_tool(),
        video_tool(),
    ]
}

impl ToolRegistry {
    /// 内置工具注册表；定义不合法时返回启动期错误
    pub fn builtin() -> Result<Self, AgentError> {
        let mut registry = ToolRegistry::new();
        for def in builtin_tools() {
            registry.register(def)?;
        }
        Ok(registry)
    }
}
