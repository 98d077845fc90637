//! Application State
//!
//! Shared state across all handlers.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use parley_config::Settings;
use parley_pipeline::TurnPipeline;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub pipeline: Arc<TurnPipeline>,
    /// Absent when metrics are disabled or the recorder failed to install
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(config: Settings, pipeline: Arc<TurnPipeline>) -> Self {
        Self {
            config: Arc::new(config),
            pipeline,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: Option<PrometheusHandle>) -> Self {
        self.metrics = handle;
        self
    }
}
