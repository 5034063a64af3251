use std::future::ready;

use axum::routing::get;
use axum::Router;
use splitter_core::health::HealthRegistry;
use splitter_core::metrics::setup_metrics_router;

/// The service's HTTP surface: a root index, a `/health` liveness probe
/// backed by the sync loop's `HealthRegistry`, and a Prometheus `/metrics`
/// scrape target.
pub fn app(liveness: HealthRegistry) -> Router {
    let router = Router::new()
        .route("/", get(index))
        .route("/health", get(move || ready(liveness.get_status())));

    router.merge(setup_metrics_router())
}

pub async fn index() -> &'static str {
    "splitterd"
}
