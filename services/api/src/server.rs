use crate::cli::{load_config, ServeArgs};
use crate::infra::{open_store, AppState, BcryptCredentialVerifier};
use crate::routes::build_app;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use registrar::error::AppError;
use registrar::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = load_config(args.database.as_deref())?;

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

    let store = Arc::new(open_store(&config.storage.database)?);
    let verifier = Arc::new(BcryptCredentialVerifier::default());

    let app = build_app(store, verifier, config.workflow.transition_policy)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        database = ?config.storage.database,
        policy = ?config.workflow.transition_policy,
        %addr,
        "registrar service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
