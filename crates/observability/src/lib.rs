//! # Observability
//!
//! 可观测性模块：Tracing + Prometheus 指标。
//!
//! ## 功能
//!
//! - Tracing 初始化 (JSON/Pretty/Compact 格式)
//! - Prometheus 指标导出
//! - 接入、投递、死信、熔断器指标记录
//!
//! ## 使用示例
//!
//! ```ignore
//! use observability::{init_tracing, init_metrics_only, LogFormat};
//!
//! init_tracing(LogFormat::Json, "info")?;
//! init_metrics_only(9000)?;
//!
//! observability::record_request_accepted();
//! observability::record_dead_letter("retries_exhausted");
//! ```

pub mod metrics;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

// Re-exports
pub use crate::metrics::{
    record_circuit_transition, record_dead_letter, record_delivery, record_dispatch_attempt,
    record_in_flight, record_request_accepted, record_request_rejected, AttemptOutcome,
};

/// 日志格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON 结构化日志
    #[default]
    Json,
    /// 人类可读格式
    Pretty,
    /// 紧凑单行格式
    Compact,
}

/// 初始化 Tracing
///
/// `RUST_LOG` 优先；未设置时使用 `default_level`。
pub fn init_tracing(format: LogFormat, default_level: &str) -> Result<()> {
    init_tracing_with_filter(format, env_filter(default_level))
}

/// 使用固定过滤器初始化 Tracing（忽略 `RUST_LOG`）
pub fn init_tracing_with_filter(format: LogFormat, filter: EnvFilter) -> Result<()> {
    let fmt_layer = match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        LogFormat::Pretty => fmt::layer().pretty().boxed(),
        LogFormat::Compact => fmt::layer().compact().boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .context("Failed to initialize tracing subscriber")
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// 仅初始化 Prometheus 指标（不初始化 Tracing）
///
/// 未安装 recorder 时所有 `record_*` 调用均为空操作。
pub fn init_metrics_only(port: u16) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus recorder")?;

    tracing::info!(port = port, "Prometheus metrics endpoint initialized");
    Ok(())
}
