//! HTTP 媒体后端：图片（同步）与视频（提交 + 轮询）
//!
//! 图片走 OpenAI 兼容的 `/images/generations`；视频走通用的 `/videos` 任务接口：
//! POST 提交返回任务 id，GET `/videos/{id}` 查询状态。非 2xx 统一映射为 BackendError。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

use crate::backends::{
    AsyncBackend, AsyncJobHandle, BackendError, GenerationOutput, GenerationRequest, JobStatus,
    SyncBackend,
};

/// 根据 HTTP 状态码区分「暂时不可用」与「请求被拒」
pub fn error_from_status(status: StatusCode, body: &str) -> BackendError {
    let snippet: String = body.chars().take(200).collect();
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        BackendError::Unavailable(format!("HTTP {status}: {snippet}"))
    } else {
        BackendError::Rejected(format!("HTTP {status}: {snippet}"))
    }
}

fn request_error(e: reqwest::Error, timeout: Duration) -> BackendError {
    if e.is_timeout() {
        BackendError::Timeout(timeout.as_secs())
    } else {
        BackendError::Unavailable(format!("Request failed: {e}"))
    }
}

fn build_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

fn non_empty(key: Option<String>) -> Option<String> {
    key.filter(|k| !k.trim().is_empty())
}

/// 图片后端
pub struct HttpImageBackend {
    client: Client,
    base_url: String,
    model: String,
    default_size: String,
    api_key: Option<String>,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    revised_prompt: Option<String>,
}

impl HttpImageBackend {
    pub fn new(
        base_url: &str,
        model: &str,
        default_size: &str,
        api_key: Option<String>,
        timeout_secs: u64,
    ) -> Self {
        let timeout = Duration::from_secs(timeout_secs);
        Self {
            client: build_client(timeout),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            default_size: default_size.to_string(),
            api_key: non_empty(api_key),
            timeout,
        }
    }
}

#[async_trait]
impl SyncBackend for HttpImageBackend {
    fn name(&self) -> &str {
        "http-image"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput, BackendError> {
        let GenerationRequest::Image(req) = request else {
            return Err(BackendError::Rejected(format!(
                "image backend cannot serve {:?} requests",
                request.capability()
            )));
        };
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| BackendError::MissingCredentials("OPENAI_API_KEY".to_string()))?;

        let size = req.size.as_deref().unwrap_or(&self.default_size);
        let resp = self
            .client
            .post(format!("{}/images/generations", self.base_url))
            .bearer_auth(api_key)
            .json(&json!({
                "model": self.model,
                "prompt": req.prompt,
                "size": size,
                "n": 1,
            }))
            .send()
            .await
            .map_err(|e| request_error(e, self.timeout))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(error_from_status(status, &body));
        }
        let parsed: ImageResponse = resp
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
        let datum = parsed
            .data
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::InvalidResponse("no image returned".to_string()))?;
        let url = datum
            .url
            .ok_or_else(|| BackendError::InvalidResponse("image has no url".to_string()))?;

        Ok(GenerationOutput {
            payload: url,
            caption: datum.revised_prompt,
            ..GenerationOutput::default()
        })
    }
}

/// 视频后端
pub struct HttpVideoBackend {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PollResponse {
    status: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    video_url: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// 将厂商状态字符串映射为 JobStatus；complete 却没有地址视为无效响应
pub fn parse_job_status(
    status: &str,
    url: Option<String>,
    error: Option<String>,
) -> Result<JobStatus, BackendError> {
    match status.to_ascii_lowercase().as_str() {
        "queued" | "pending" | "processing" | "in_progress" | "running" | "submitted" => {
            Ok(JobStatus::Pending)
        }
        "completed" | "complete" | "succeeded" | "success" => url
            .map(|url| JobStatus::Complete { url })
            .ok_or_else(|| BackendError::InvalidResponse("completed job has no url".to_string())),
        "failed" | "error" | "cancelled" | "canceled" | "expired" => Ok(JobStatus::Failed {
            reason: error.unwrap_or_else(|| format!("job {status}")),
        }),
        other => Err(BackendError::InvalidResponse(format!(
            "unknown job status '{other}'"
        ))),
    }
}

impl HttpVideoBackend {
    pub fn new(base_url: &str, model: &str, api_key: Option<String>, timeout_secs: u64) -> Self {
        let timeout = Duration::from_secs(timeout_secs);
        Self {
            client: build_client(timeout),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: non_empty(api_key),
            timeout,
        }
    }

    fn api_key(&self) -> Result<&str, BackendError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| BackendError::MissingCredentials("VIDEO_API_KEY".to_string()))
    }
}

#[async_trait]
impl AsyncBackend for HttpVideoBackend {
    fn name(&self) -> &str {
        "http-video"
    }

    async fn submit(&self, request: &GenerationRequest) -> Result<AsyncJobHandle, BackendError> {
        let GenerationRequest::Video(req) = request else {
            return Err(BackendError::Rejected(format!(
                "video backend cannot serve {:?} requests",
                request.capability()
            )));
        };
        let api_key = self.api_key()?;
        let resp = self
            .client
            .post(format!("{}/videos", self.base_url))
            .bearer_auth(api_key)
            .json(&json!({
                "model": self.model,
                "prompt": req.prompt,
                "duration": req.duration_secs,
                "aspect_ratio": req.aspect.as_deref().unwrap_or("16:9"),
            }))
            .send()
            .await
            .map_err(|e| request_error(e, self.timeout))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(error_from_status(status, &body));
        }
        let parsed: SubmitResponse = resp
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
        let poll_ref = format!("{}/videos/{}", self.base_url, parsed.id);
        tracing::info!(job_id = %parsed.id, "video job submitted");
        Ok(AsyncJobHandle::new(parsed.id, poll_ref))
    }

    async fn poll(&self, handle: &AsyncJobHandle) -> Result<JobStatus, BackendError> {
        let api_key = self.api_key()?;
        let resp = self
            .client
            .get(&handle.poll_ref)
            .bearer_auth(api_key)
            .send()
            .await
            .map_err(|e| request_error(e, self.timeout))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(error_from_status(status, &body));
        }
        let parsed: PollResponse = resp
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
        parse_job_status(&parsed.status, parsed.url.or(parsed.video_url), parsed.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{ImageRequest, VideoRequest};

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            error_from_status(StatusCode::SERVICE_UNAVAILABLE, "down"),
            BackendError::Unavailable(_)
        ));
        assert!(matches!(
            error_from_status(StatusCode::TOO_MANY_REQUESTS, ""),
            BackendError::Unavailable(_)
        ));
        assert!(matches!(
            error_from_status(StatusCode::BAD_REQUEST, "bad prompt"),
            BackendError::Rejected(_)
        ));
    }

    #[test]
    fn test_parse_job_status() {
        assert_eq!(parse_job_status("processing", None, None).unwrap(), JobStatus::Pending);
        assert_eq!(
            parse_job_status("succeeded", Some("https://cdn/v.mp4".to_string()), None).unwrap(),
            JobStatus::Complete {
                url: "https://cdn/v.mp4".to_string()
            }
        );
        assert_eq!(
            parse_job_status("FAILED", None, Some("nsfw".to_string())).unwrap(),
            JobStatus::Failed {
                reason: "nsfw".to_string()
            }
        );
        assert!(parse_job_status("completed", None, None).is_err());
        assert!(parse_job_status("mystery", None, None).is_err());
    }

    #[tokio::test]
    async fn test_image_without_key_makes_no_request() {
        let backend = HttpImageBackend::new("http://127.0.0.1:9", "dall-e-3", "1024x1024", None, 1);
        let err = backend
            .generate(&GenerationRequest::Image(ImageRequest {
                platform: "instagram".to_string(),
                prompt: "sunset".to_string(),
                size: None,
            }))
            .await
            .unwrap_err();
        assert_eq!(err, BackendError::MissingCredentials("OPENAI_API_KEY".to_string()));
    }

    #[tokio::test]
    async fn test_video_without_key() {
        let backend = HttpVideoBackend::new("http://127.0.0.1:9", "video-1", Some(" ".to_string()), 1);
        let err = backend
            .submit(&GenerationRequest::Video(VideoRequest {
                platform: "tiktok".to_string(),
                prompt: "teaser".to_string(),
                duration_secs: 8,
                aspect: None,
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::MissingCredentials(_)));
    }
}
