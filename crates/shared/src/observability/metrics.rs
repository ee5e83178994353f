//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集。
//! 规则引擎只依赖 metrics 门面，是否导出由入口决定。

use anyhow::Result;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use super::ObservabilityConfig;

/// 引擎运行次数
pub const RUNS_TOTAL: &str = "rule_engine_runs_total";
/// 单次运行耗时
pub const RUN_DURATION_SECONDS: &str = "rule_engine_run_duration_seconds";
/// 规则评估次数，按 outcome 区分
pub const RULE_EVALUATIONS_TOTAL: &str = "rule_engine_rule_evaluations_total";
/// 事实缓存命中次数
pub const FACT_CACHE_HITS_TOTAL: &str = "rule_engine_fact_cache_hits_total";

/// Metrics 资源守卫
pub struct MetricsHandle {
    handle: PrometheusHandle,
}

impl MetricsHandle {
    /// 渲染 Prometheus 文本格式
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// 安装全局 Prometheus recorder
pub fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_common_metrics(&config.service_name);

    Ok(MetricsHandle { handle })
}

/// 注册通用指标描述
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(RUNS_TOTAL, "Total number of engine runs");
    metrics::describe_histogram!(RUN_DURATION_SECONDS, "Engine run duration in seconds");
    metrics::describe_counter!(RULE_EVALUATIONS_TOTAL, "Total number of rule evaluations");
    metrics::describe_counter!(FACT_CACHE_HITS_TOTAL, "Total number of fact cache hits");

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 记录一次运行
#[inline]
pub fn record_run(engine: &str, status: &str, duration_secs: f64) {
    metrics::counter!(
        RUNS_TOTAL,
        "engine" => engine.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    metrics::histogram!(RUN_DURATION_SECONDS, "engine" => engine.to_string()).record(duration_secs);
}

/// 记录规则评估
#[inline]
pub fn record_rule_evaluation(passed: bool) {
    let outcome = if passed { "success" } else { "failure" };
    metrics::counter!(RULE_EVALUATIONS_TOTAL, "outcome" => outcome).increment(1);
}

/// 记录事实缓存命中
#[inline]
pub fn record_fact_cache_hit() {
    metrics::counter!(FACT_CACHE_HITS_TOTAL).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_functions_do_not_panic() {
        // 即使没有初始化 recorder，这些函数也不应该 panic
        record_run("default", "completed", 0.01);
        record_rule_evaluation(true);
        record_rule_evaluation(false);
        record_fact_cache_hit();
    }
}
