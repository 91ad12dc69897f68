//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    server_handle: tokio::task::JoinHandle<()>,
}

impl MetricsHandle {
    /// 停止指标 HTTP 服务器
    pub fn stop(self) {
        self.server_handle.abort();
    }
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 与 `/health` 端点。
pub async fn init(service_name: &str, port: u16) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    register_producer_metrics(service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle { server_handle })
}

/// 注册生产者指标描述，出现在 /metrics 端点的 HELP 注释中
fn register_producer_metrics(service_name: &str) {
    metrics::describe_counter!(
        "loadgen_events_sent_total",
        "Total number of events handed to the broker client"
    );
    metrics::describe_counter!(
        "loadgen_events_delivered_total",
        "Total number of events acknowledged by the broker"
    );
    metrics::describe_counter!(
        "loadgen_events_failed_total",
        "Total number of events that failed delivery or submission"
    );
    metrics::describe_histogram!(
        "loadgen_batch_submit_duration_seconds",
        "Time spent generating and submitting one batch"
    );
    metrics::describe_gauge!(
        "loadgen_in_flight",
        "Messages queued in the client but not yet acknowledged"
    );
    metrics::describe_gauge!("loadgen_send_rate", "Overall send rate in events/second");
    metrics::describe_gauge!(
        "loadgen_flush_remaining",
        "Messages still queued after the last flush"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

/// 获取全局 Prometheus handle（用于自定义渲染）
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录一批事件的提交结果
#[inline]
pub fn record_batch(kind: &str, submitted: u64, rejected: u64, duration_secs: f64) {
    metrics::counter!("loadgen_events_sent_total", "kind" => kind.to_string()).increment(submitted);
    if rejected > 0 {
        metrics::counter!(
            "loadgen_events_failed_total",
            "kind" => kind.to_string(),
            "stage" => "submit"
        )
        .increment(rejected);
    }
    metrics::histogram!("loadgen_batch_submit_duration_seconds", "kind" => kind.to_string())
        .record(duration_secs);
}

/// 记录一次投递回调
#[inline]
pub fn record_delivery(success: bool) {
    if success {
        metrics::counter!("loadgen_events_delivered_total").increment(1);
    } else {
        metrics::counter!("loadgen_events_failed_total", "stage" => "delivery").increment(1);
    }
}

/// 更新周期报告中的瞬时量
#[inline]
pub fn set_progress(in_flight: usize, overall_rate: f64) {
    metrics::gauge!("loadgen_in_flight").set(in_flight as f64);
    metrics::gauge!("loadgen_send_rate").set(overall_rate);
}

/// 记录一次 flush 之后仍未投递的消息数
#[inline]
pub fn set_flush_remaining(remaining: usize) {
    metrics::gauge!("loadgen_flush_remaining").set(remaining as f64);
}
