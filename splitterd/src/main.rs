use std::sync::Arc;
use std::time::Duration;

use envconfig::Envconfig;
use eyre::Result;
use futures::future::{select, Either};
use splitter_core::health::{HealthHandle, HealthRegistry};
use splitter_core::store::PgPodStore;
use splitter_core::{Splitter, SplitterConfig};

mod config;
mod handlers;

use config::Config;

async fn listen(app: axum::Router, bind: String) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, app).await?;

    Ok(())
}

/// Run the sync loop forever on a fixed `delay` cadence, reporting liveness
/// once per tick. `sync` never fails outright (failures are absorbed into a
/// state transition), so this loop has no error path of its own.
async fn sync_loop(splitter: Arc<Splitter<PgPodStore>>, delay: Duration, liveness: HealthHandle) {
    let mut interval = tokio::time::interval(delay);
    loop {
        interval.tick().await;
        splitter.sync().await;
        liveness.report_healthy().await;
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("failed to load configuration from env");
    if let Err(error) = config.validate() {
        panic!("invalid configuration: {error}");
    }

    let store = PgPodStore::new(&config.database_url, config.max_pg_connections)
        .await
        .expect("failed to connect to the pod store");

    let splitter_config = SplitterConfig {
        delay: config.delay.0,
        max_unused_duration: config.max_unused_duration.0,
        full_scan_count_threshold: config.full_scan_count_threshold,
        group_name: config.group_name.clone(),
    };
    let splitter = Arc::new(Splitter::new(Arc::new(store), splitter_config));

    // Allow a couple of missed ticks before declaring the sync loop stalled.
    let liveness_deadline = time::Duration::seconds(config.delay.0.as_secs() as i64 * 3);
    let liveness_registry = HealthRegistry::new("liveness");
    let sync_liveness = liveness_registry
        .register("splitter_sync".to_string(), liveness_deadline)
        .await;

    let sync_loop = Box::pin(sync_loop(splitter, config.delay.0, sync_liveness));

    let app = handlers::app::app(liveness_registry);
    let http_server = Box::pin(listen(app, config.bind()));

    match select(http_server, sync_loop).await {
        Either::Left((listen_result, _)) => match listen_result {
            Ok(_) => {}
            Err(e) => tracing::error!("failed to start splitterd http server, {}", e),
        },
        Either::Right(_) => {
            tracing::error!("splitterd sync loop exited")
        }
    };
}
