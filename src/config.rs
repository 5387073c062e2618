//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `CAMPAIGN__*` 覆盖（双下划线表示嵌套，如 `CAMPAIGN__LLM__PROVIDER=mock`）。
//! 凭据不进配置文件：OPENAI_API_KEY / VIDEO_API_KEY 只从环境变量读取。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmSection,
    pub backends: BackendsSection,
    pub session: SessionSection,
}

/// [llm] 段：模型传输
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// openai（OpenAI 兼容接口）/ mock（脚本化离线演示）
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 单次模型请求超时（秒）
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            request_timeout_secs: 60,
        }
    }
}

/// [backends] 段
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct BackendsSection {
    pub text: TextBackendSection,
    pub image: ImageBackendSection,
    pub video: VideoBackendSection,
}

/// [backends.text]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TextBackendSection {
    pub model: String,
    /// 未设置时沿用 [llm].base_url
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for TextBackendSection {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            timeout_secs: 60,
        }
    }
}

/// [backends.image]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImageBackendSection {
    pub base_url: String,
    pub model: String,
    pub size: String,
    pub timeout_secs: u64,
    /// 非凭据类错误是否也降级为占位图（凭据缺失总是降级）
    pub placeholder_on_error: bool,
}

impl Default for ImageBackendSection {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "dall-e-3".to_string(),
            size: "1024x1024".to_string(),
            timeout_secs: 90,
            placeholder_on_error: true,
        }
    }
}

/// [backends.video]：提交超时与轮询节奏
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VideoBackendSection {
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub max_poll_attempts: u32,
}

impl Default for VideoBackendSection {
    fn default() -> Self {
        Self {
            base_url: "https://api.video.example/v1".to_string(),
            model: "veo-3".to_string(),
            timeout_secs: 30,
            poll_interval_secs: 3,
            max_poll_attempts: 40,
        }
    }
}

/// [session] 段：预算类参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub max_iterations: usize,
    pub tolerance: f64,
    pub max_concurrent_dispatches: usize,
    /// 0 表示不限
    pub wall_clock_secs: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            max_iterations: 12,
            tolerance: 1.5,
            max_concurrent_dispatches: 3,
            wall_clock_secs: 600,
        }
    }
}

/// 从 config 目录加载配置，环境变量 CAMPAIGN__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 CAMPAIGN__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("CAMPAIGN")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
