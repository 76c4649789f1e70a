use crate::cli::ServeArgs;
use crate::infra::{build_store, AppState, LogNotificationGateway};
use crate::routes::with_broker_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use makler::broker::{BrokerService, FanoutNotifier};
use makler::config::AppConfig;
use makler::error::AppError;
use makler::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    // The sheets backend drives its own runtime, so construction happens on
    // the blocking pool.
    let storage = config.storage.clone();
    let store = tokio::task::spawn_blocking(move || build_store(&storage))
        .await
        .map_err(|err| AppError::Io(std::io::Error::other(err)))??;

    let channel = config.broadcast.valid_channel().map(str::to_string);
    match (&config.broadcast.channel_id, &channel) {
        (Some(raw), None) => warn!(channel = %raw, "configured channel id is not a broadcast channel, public posts disabled"),
        (None, _) => info!("no broadcast channel configured"),
        _ => {}
    }
    if config.admin.admin_ids.is_empty() {
        warn!("no administrator ids configured; moderation endpoints are open");
    }

    let gateway = Arc::new(LogNotificationGateway);
    let notifier = FanoutNotifier::new(gateway, channel);
    let service = Arc::new(BrokerService::new(store, notifier));

    let app = with_broker_routes(service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "lead broker ready");

    axum::serve(listener, app).await?;
    Ok(())
}
