use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::process;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();
    let jobs = state.dispatcher.counters();
    let model_loaded = state.engine.is_model_loaded();

    HttpResponse::Ok().json(json!({
        "status": if model_loaded { "healthy" } else { "degraded" },
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
            "error_rate": metrics.error_rate()
        },
        "jobs": {
            "store": state.dispatcher.store_backend(),
            "submitted": jobs.submitted,
            "active": jobs.active,
            "completed": jobs.completed,
            "failed": jobs.failed
        },
        "memory": get_memory_info(),
        "models": {
            "whisper": {
                "model": config.models.whisper_model,
                "loaded_as": state.engine.model_name(),
                "language": state.engine.language(),
                "status": if model_loaded { "loaded" } else { "not_loaded" },
                "available": model_loaded
            }
        }
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoint_stats = Vec::new();
    for (endpoint, metric) in metrics.endpoint_metrics.iter() {
        endpoint_stats.push(json!({
            "endpoint": endpoint,
            "request_count": metric.request_count,
            "error_count": metric.error_count,
            "error_rate": metric.error_rate(),
            "average_duration_ms": metric.average_duration_ms(),
            "total_duration_ms": metric.total_duration_ms
        }));
    }

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": metrics.error_rate(),
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "endpoints": endpoint_stats,
        "jobs": state.dispatcher.counters(),
        "transcription": state.engine.stats(),
        "memory": get_memory_info()
    }))
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        let pid = process::id();
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            let mut vm_rss = 0;
            let mut vm_size = 0;

            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        vm_rss = kb_str.parse::<u64>().unwrap_or(0) * 1024;
                    }
                } else if line.starts_with("VmSize:") {
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        vm_size = kb_str.parse::<u64>().unwrap_or(0) * 1024;
                    }
                }
            }

            return json!({
                "resident_memory_bytes": vm_rss,
                "virtual_memory_bytes": vm_size,
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": format!("Memory info not available (pid {})", process::id())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::test_state;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_health_reports_model_and_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path(), dir.path());
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "healthy");
        assert_eq!(body["models"]["whisper"]["status"], "loaded");
        assert_eq!(body["models"]["whisper"]["language"], "pt");
        assert_eq!(body["jobs"]["store"], "memory");
        assert_eq!(body["jobs"]["submitted"], 0);
    }

    #[actix_web::test]
    async fn test_detailed_metrics_shape() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path(), dir.path());
        state.record_endpoint_request("GET /health", 4, false);

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/metrics", web::get().to(detailed_metrics)),
        )
        .await;

        let req = test::TestRequest::get().uri("/metrics").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["endpoints"].as_array().unwrap().len(), 1);
        assert_eq!(body["jobs"]["active"], 0);
        assert_eq!(body["transcription"]["total_requests"], 0);
    }
}
