//! campaign-agent 命令行入口
//!
//! 用法：campaign-agent [--video] <brand> <goal> [platform,...]
//! 初始化日志与配置，装配运行时，跑一次营销活动会话，最后把 SessionResult 以 JSON 打印到 stdout。

use std::sync::Arc;

use anyhow::Context;
use campaign_agent::agent::{build_runtime, build_runtime_with};
use campaign_agent::config::load_config;
use campaign_agent::core::ShutdownManager;
use campaign_agent::llm::ScriptedTransport;
use campaign_agent::observability;
use campaign_agent::session::{CampaignBrief, ProgressReporter, SessionConfig};

const USAGE: &str = "usage: campaign-agent [--video] <brand> <goal> [platform,...]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let (flags, positional): (Vec<String>, Vec<String>) =
        std::env::args().skip(1).partition(|a| a.starts_with("--"));
    let include_video = flags.iter().any(|f| f == "--video");
    let mut args = positional.into_iter();
    let brand = args.next().context(USAGE)?;
    let goal = args.next().context(USAGE)?;
    let platforms: Vec<String> = args
        .next()
        .unwrap_or_else(|| "instagram,linkedin".to_string())
        .split(',')
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty())
        .collect();

    let cfg = load_config(None).context("Failed to load configuration")?;

    let runtime = if cfg.llm.provider.eq_ignore_ascii_case("mock") {
        let script = ScriptedTransport::campaign_demo(&brand, &platforms, include_video);
        build_runtime_with(&cfg, Arc::new(script))
    } else {
        build_runtime(&cfg)
    }
    .context("Failed to build runtime")?;

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let brief = CampaignBrief {
        brand_name: brand,
        campaign_goal: goal,
        include_video,
        ..CampaignBrief::default()
    };
    let session = SessionConfig::campaign(brief, platforms).with_settings(&cfg.session);
    let progress = ProgressReporter::new(|update| {
        tracing::info!(percent = update.percent, "{}", update.message);
    });

    let result = runtime
        .run_session(&session, progress, shutdown.session_token())
        .await
        .context("Campaign session failed")?;

    if shutdown.is_shutdown() {
        tracing::warn!("session interrupted by shutdown signal; printing partial results");
    }

    tracing::info!(
        status = ?result.status,
        complete = result.completed().count(),
        degraded = result.degraded().count(),
        "campaign finished"
    );
    println!(
        "{}",
        serde_json::to_string_pretty(&result).context("Failed to serialize result")?
    );
    Ok(())
}
