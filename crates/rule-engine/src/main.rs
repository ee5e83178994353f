//! 规则引擎命令行
//!
//! 用法：`rule-engine <definition.json> [facts.json]`
//!
//! 从 JSON 加载引擎定义，以可选的运行时事实执行一次，并输出触发的事件。

use anyhow::{Context, Result};
use clap::Parser;
use rules_shared::config::AppConfig;
use rules_shared::observability;
use rule_engine::{EngineDefinition, EngineManager, EngineOptions};
use serde_json::{Map, Value, json};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// 规则引擎命令行
///
/// 加载引擎定义并以运行时事实执行一次，输出 JSON 结果。
#[derive(Parser, Debug)]
#[command(name = "rule-engine")]
#[command(version, about = "前向链式规则引擎")]
struct CliArgs {
    /// 引擎定义文件（JSON）
    definition: PathBuf,

    /// 运行时事实文件（JSON 对象）
    facts: Option<PathBuf>,

    /// 覆盖配置中的日志级别
    #[arg(short, long)]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let args = CliArgs::parse();
    dotenvy::dotenv().ok();

    let config = AppConfig::load("rule-engine").unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });

    let mut obs_config = config.observability.clone().with_service_name(&config.service_name);
    if config.is_production() {
        obs_config.json_logs = true;
    }
    if let Some(level) = &args.log_level {
        obs_config.log_level = level.clone();
    }
    let guard = observability::init(&obs_config)?;

    info!(environment = %config.environment, definition = %args.definition.display(), "Starting rule-engine...");

    let definition_json = std::fs::read_to_string(&args.definition)
        .with_context(|| format!("读取引擎定义失败: {}", args.definition.display()))?;
    let definition = EngineDefinition::from_json(&definition_json)?;

    let runtime_facts = match &args.facts {
        Some(path) => Some(load_facts(path)?),
        None => None,
    };

    let manager = EngineManager::new();
    let engine = manager.create_engine_with(&config.service_name, EngineOptions::from(&config.engine));
    definition.apply(&mut engine.write())?;

    let engine = engine.read();
    let result = engine.run(runtime_facts)?;
    info!(
        events = result.events.len(),
        failures = result.failure_events.len(),
        "Run complete"
    );

    let output = json!({
        "events": result.events,
        "failureEvents": result.failure_events,
        "results": result.rule_results.iter().chain(&result.failure_rule_results).collect::<Vec<_>>(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    if let Some(metrics) = guard.render_metrics() {
        info!("metrics snapshot:\n{}", metrics);
    }
    Ok(())
}

fn load_facts(path: &Path) -> Result<Map<String, Value>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("读取运行时事实失败: {}", path.display()))?;

    match serde_json::from_str::<Value>(&json)? {
        Value::Object(map) => Ok(map),
        Value::Null => {
            warn!("运行时事实为空: {}", path.display());
            Ok(Map::new())
        }
        other => anyhow::bail!("运行时事实必须是 JSON 对象，实际为: {}", other),
    }
}
