//! # Application State Management
//!
//! Shared state handed to every HTTP request handler through
//! `web::Data<AppState>`.
//!
//! ## What lives here:
//! - **config**: the validated configuration, read-only after startup
//! - **metrics**: request counters updated by `MetricsMiddleware`
//! - **dispatcher**: job submission and status lookups
//! - **engine**: the loaded speech model (for readiness reporting)
//! - **results**: the result document and the media root listing
//!
//! ## Arc<RwLock<T>> Pattern
//! Only the metrics change after startup, so only they sit behind a lock.
//! Everything else is wrapped in a plain `Arc`: every worker thread holds a
//! clone of `AppState`, and cloning just bumps reference counts.

use crate::config::AppConfig;
use crate::document::ResultDocument;
use crate::jobs::JobDispatcher;
use crate::transcription::TranscriptionEngine;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,

    /// Constantly updated by the metrics middleware
    pub metrics: Arc<RwLock<AppMetrics>>,

    pub dispatcher: Arc<JobDispatcher>,

    pub engine: Arc<TranscriptionEngine>,

    pub results: Arc<ResultDocument>,

    /// When the server started (never changes, so no lock needed)
    pub start_time: Instant,
}

/// Request metrics collected across all HTTP requests.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of 4xx/5xx responses since server start
    pub error_count: u64,

    /// Key: route pattern with method (e.g. "GET /status/{job_id}/")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Performance metrics for one route.
///
/// ## Derived values:
/// - **Average response time**: total_duration_ms / request_count
/// - **Error rate**: error_count / request_count
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,

    /// Total time spent processing all requests to this endpoint (milliseconds)
    pub total_duration_ms: u64,

    pub error_count: u64,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        dispatcher: Arc<JobDispatcher>,
        engine: Arc<TranscriptionEngine>,
        results: Arc<ResultDocument>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            dispatcher,
            engine,
            results,
            start_time: Instant::now(),
        }
    }

    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    /// Called by the middleware for every request.
    pub fn increment_request_count(&self) {
        self.write_metrics().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.write_metrics().error_count += 1;
    }

    /// Record one request against `endpoint`. The first request to an
    /// endpoint creates its entry.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.write_metrics();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Copy of the metrics, so the lock is not held while serializing a response.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.read_metrics().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    // Counters stay meaningful after a panic in another holder, so poisoning is ignored
    fn read_metrics(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_metrics(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl AppMetrics {
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// 0.0 (no errors) to 1.0 (every request failed).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::jobs::progress::ProgressSettings;
    use crate::jobs::store::MemoryJobStore;
    use crate::pipeline::tests::FakeConverter;
    use crate::pipeline::Pipeline;
    use crate::transcription::engine::tests::engine_with;
    use std::path::Path;
    use std::time::Duration;

    /// State wired to fakes: ffmpeg replaced, model always answers "olá".
    pub(crate) fn test_state(scratch: &Path, media: &Path) -> AppState {
        let mut config = AppConfig::default();
        config.storage.scratch_dir = scratch.to_string_lossy().into_owned();
        config.storage.media_root = media.to_string_lossy().into_owned();
        config.server.max_upload_mb = 1;

        let engine = Arc::new(engine_with("olá", false));
        let results = Arc::new(ResultDocument::new(media, "transcricao"));
        let pipeline = Pipeline::new(
            Arc::new(FakeConverter::default()),
            engine.clone(),
            results.clone(),
            16000,
        );
        let dispatcher = JobDispatcher::new(
            Arc::new(MemoryJobStore::new()),
            Arc::new(pipeline),
            scratch,
            ProgressSettings {
                interval: Duration::from_millis(5),
                ..ProgressSettings::default()
            },
            Duration::from_secs(1),
        );

        AppState::new(config, Arc::new(dispatcher), engine, results)
    }

    #[test]
    fn test_endpoint_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path(), dir.path());

        state.increment_request_count();
        state.increment_request_count();
        state.increment_error_count();
        state.record_endpoint_request("GET /health", 10, false);
        state.record_endpoint_request("GET /health", 30, true);

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.request_count, 2);
        assert_eq!(metrics.error_rate(), 0.5);

        let health = &metrics.endpoint_metrics["GET /health"];
        assert_eq!(health.average_duration_ms(), 20.0);
        assert_eq!(health.error_rate(), 0.5);
        assert_eq!(EndpointMetric::default().average_duration_ms(), 0.0);
    }
}
