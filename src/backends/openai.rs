//! 文本生成后端（OpenAI 兼容 Chat Completions）
//!
//! 根据平台、内容类型、语气、长度与话题标签要求拼出提示词，取首条回复作为正文；
//! 超出 max_length 时按字符截断，正文中的 #话题 提取为 tags。

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::backends::{BackendError, GenerationOutput, GenerationRequest, SyncBackend, TextRequest};

const COPYWRITER_PROMPT: &str = "You are a senior social media copywriter. \
Write ready-to-publish copy only: no preamble, no quotes, no explanations.";

/// OpenAI 兼容文本后端；api_key 缺失时每次调用返回 MissingCredentials
pub struct OpenAiTextBackend {
    client: Option<Client<OpenAIConfig>>,
    model: String,
}

impl OpenAiTextBackend {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let client = api_key.filter(|k| !k.trim().is_empty()).map(|key| {
            let config = match base_url {
                Some(url) => OpenAIConfig::new().with_api_base(url).with_api_key(key),
                None => OpenAIConfig::new().with_api_key(key),
            };
            Client::with_config(config)
        });
        Self {
            client,
            model: model.to_string(),
        }
    }

    fn messages(req: &TextRequest) -> Result<Vec<ChatCompletionRequestMessage>, BackendError> {
        let system = ChatCompletionRequestSystemMessageArgs::default()
            .content(COPYWRITER_PROMPT)
            .build()
            .map_err(|e| BackendError::Rejected(e.to_string()))?;
        let user = ChatCompletionRequestUserMessageArgs::default()
            .content(text_prompt(req))
            .build()
            .map_err(|e| BackendError::Rejected(e.to_string()))?;
        Ok(vec![
            ChatCompletionRequestMessage::System(system),
            ChatCompletionRequestMessage::User(user),
        ])
    }
}

/// 生成给文案模型的用户提示
pub fn text_prompt(req: &TextRequest) -> String {
    let mut prompt = format!(
        "Platform: {}\nContent type: {}\nKey message: {}\n",
        req.platform, req.content_type, req.key_message
    );
    if let Some(tone) = &req.tone {
        prompt.push_str(&format!("Tone: {tone}\n"));
    }
    if let Some(max) = req.max_length {
        prompt.push_str(&format!("Maximum length: {max} characters\n"));
    }
    if req.include_hashtags {
        prompt.push_str("End with 3-5 relevant hashtags.\n");
    } else {
        prompt.push_str("Do not use hashtags.\n");
    }
    prompt
}

/// 按字符数截断（不会切断多字节字符）
pub fn truncate_chars(body: &str, max: Option<u32>) -> String {
    match max {
        Some(max) if body.chars().count() > max as usize => {
            body.chars().take(max as usize).collect::<String>().trim_end().to_string()
        }
        _ => body.to_string(),
    }
}

/// 提取正文中的 #话题 标签
pub fn extract_hashtags(body: &str) -> Vec<String> {
    body.split_whitespace()
        .filter(|w| w.starts_with('#') && w.len() > 1)
        .map(|w| w.trim_end_matches(|c: char| c.is_ascii_punctuation() && c != '_').to_string())
        .filter(|w| w.len() > 1)
        .collect()
}

fn map_openai_error(e: OpenAIError) -> BackendError {
    match e {
        OpenAIError::ApiError(api) => BackendError::Rejected(api.message),
        other => BackendError::Unavailable(other.to_string()),
    }
}

#[async_trait]
impl SyncBackend for OpenAiTextBackend {
    fn name(&self) -> &str {
        "openai-text"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput, BackendError> {
        let GenerationRequest::Text(req) = request else {
            return Err(BackendError::Rejected(format!(
                "text backend cannot serve {:?} requests",
                request.capability()
            )));
        };
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| BackendError::MissingCredentials("OPENAI_API_KEY".to_string()))?;

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(Self::messages(req)?)
            .build()
            .map_err(|e| BackendError::Rejected(e.to_string()))?;

        let response = client
            .chat()
            .create(chat_request)
            .await
            .map_err(map_openai_error)?;

        let body = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();
        if body.trim().is_empty() {
            return Err(BackendError::InvalidResponse("empty completion".to_string()));
        }

        let body = truncate_chars(body.trim(), req.max_length);
        let tags = if req.include_hashtags {
            extract_hashtags(&body)
        } else {
            Vec::new()
        };
        Ok(GenerationOutput {
            payload: body,
            tags,
            ..GenerationOutput::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req() -> TextRequest {
        TextRequest {
            platform: "instagram".to_string(),
            content_type: "post".to_string(),
            key_message: "Summer sale".to_string(),
            tone: Some("playful".to_string()),
            max_length: Some(280),
            include_hashtags: true,
        }
    }

    #[test]
    fn test_prompt_mentions_constraints() {
        let p = text_prompt(&req());
        assert!(p.contains("Platform: instagram"));
        assert!(p.contains("Tone: playful"));
        assert!(p.contains("280 characters"));
        assert!(p.contains("hashtags"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("夏日促销开始啦", Some(4)), "夏日促销");
        assert_eq!(truncate_chars("short", Some(100)), "short");
        assert_eq!(truncate_chars("no limit", None), "no limit");
    }

    #[test]
    fn test_extract_hashtags() {
        let tags = extract_hashtags("Big news! #Launch #summer_sale, see you #");
        assert_eq!(tags, vec!["#Launch".to_string(), "#summer_sale".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_key_is_typed_error() {
        let backend = OpenAiTextBackend::new(None, "gpt-4o-mini", None);
        let err = backend
            .generate(&GenerationRequest::Text(req()))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::MissingCredentials(_)));
    }
}
