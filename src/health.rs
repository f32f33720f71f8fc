//! # Health and Metrics Endpoints
//!
//! - `GET /health` - liveness plus classifier status and analysis load
//! - `GET /metrics` - per-endpoint request statistics and engine counters

use crate::config::AppConfig;
use crate::device::DeviceManager;
use crate::state::{AppMetrics, AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::process;

/// Overall service health.
///
/// The service reports `"degraded"` while no classifier is loaded: it is
/// up, but every analysis request would be answered with 503.
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();
    let model = state.engine.get_current_model_info().await;

    let status = if model.is_some() { "healthy" } else { "degraded" };

    HttpResponse::Ok().json(json!({
        "status": status,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": error_rate(&metrics),
            "active_analyses": metrics.active_analyses,
            "rejected_analyses": metrics.rejected_analyses
        },
        "memory": get_memory_info(),
        "models": {
            "classifier": {
                "status": if model.is_some() { "loaded" } else { "not_loaded" },
                "available": model.is_some(),
                "configured_path": config.models.classifier_path,
                "info": model
            }
        },
        "devices": DeviceManager::get_device_summary(),
        "system": get_system_status(&config, &metrics)
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();
    let config = state.get_config();

    let mut endpoint_stats: Vec<_> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms(),
                "total_duration_ms": metric.total_duration_ms
            })
        })
        .collect();
    endpoint_stats.sort_by(|a, b| a["endpoint"].as_str().cmp(&b["endpoint"].as_str()));

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": error_rate(&metrics),
            "active_analyses": metrics.active_analyses,
            "rejected_analyses": metrics.rejected_analyses,
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "endpoints": endpoint_stats,
        "analysis": state.engine.get_performance_stats().await,
        "memory": get_memory_info(),
        "performance": config.performance
    }))
}

fn error_rate(metrics: &AppMetrics) -> f64 {
    if metrics.request_count > 0 {
        metrics.error_count as f64 / metrics.request_count as f64
    } else {
        0.0
    }
}

fn get_memory_info() -> serde_json::Value {
    let pid = process::id();

    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            let mut vm_rss = 0;
            let mut vm_size = 0;

            for line in status.lines() {
                let bytes = || {
                    line.split_whitespace()
                        .nth(1)
                        .and_then(|kb| kb.parse::<u64>().ok())
                        .unwrap_or(0)
                        * 1024
                };
                if line.starts_with("VmRSS:") {
                    vm_rss = bytes();
                } else if line.starts_with("VmSize:") {
                    vm_size = bytes();
                }
            }

            return json!({
                "resident_memory_bytes": vm_rss,
                "virtual_memory_bytes": vm_size,
                "available": true
            });
        }
    }

    let _ = pid;
    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": "Memory info not available on this platform"
    })
}

fn get_system_status(config: &AppConfig, metrics: &AppMetrics) -> serde_json::Value {
    let max_analyses = config.performance.max_concurrent_analyses;
    let usage = if max_analyses > 0 {
        metrics.active_analyses as f64 / max_analyses as f64
    } else {
        0.0
    };

    let status = if usage > 0.9 {
        "high_load"
    } else if usage > 0.7 {
        "moderate_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "analysis_slot_usage_percent": (usage * 100.0).round(),
        "max_concurrent_analyses": max_analyses,
        "current_analyses": metrics.active_analyses,
        "load_warnings": if usage > 0.8 {
            vec!["High analysis load - consider increasing max_concurrent_analyses"]
        } else {
            vec![]
        }
    })
}
