//! Prometheus endpoint for run metrics.
//!
//! A run is a finite batch job, so the endpoint only lives as long as the
//! process. The returned [`MetricsHandle`] lets the caller render the final
//! values once the run is over, for runs that finish between scrapes.

use axum::{Extension, Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use snafu::prelude::*;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::{BindEndpointSnafu, MetricsError, PrometheusInitSnafu};

/// Installed recorder.
#[derive(Clone)]
pub struct MetricsHandle {
    handle: PrometheusHandle,
}

impl MetricsHandle {
    /// Current values in the Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Install the Prometheus recorder and serve `/metrics` and `/health` on
/// `addr`. Fails if the address cannot be bound.
pub async fn init(addr: SocketAddr) -> Result<MetricsHandle, MetricsError> {
    let listener = TcpListener::bind(addr)
        .await
        .context(BindEndpointSnafu { addr })?;
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context(PrometheusInitSnafu)?;

    let app = Router::new()
        .route("/metrics", get(render))
        .route("/health", get(|| async { "ok\n" }))
        .layer(Extension(handle.clone()));

    info!("Serving metrics on http://{addr}/metrics");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {e}");
        }
    });

    Ok(MetricsHandle { handle })
}

async fn render(Extension(handle): Extension<PrometheusHandle>) -> String {
    handle.render()
}
