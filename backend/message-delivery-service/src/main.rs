use actix_web::{web, App, HttpServer};
use message_delivery_service::{
    config, db,
    error::AppError,
    log::{MessageLog, RedisStreamLog},
    logging,
    metrics::PipelineMetrics,
    redis_client, routes,
    services::Producer,
    state::AppState,
    store::{MessageStore, PgMessageStore},
    worker::{DeliveryWorker, WorkerHandle},
    SERVICE_NAME,
};
use std::sync::Arc;
use tracing_actix_web::TracingLogger;

#[actix_web::main]
async fn main() -> Result<(), AppError> {
    logging::init_tracing();
    let cfg = config::Config::from_env()?;

    let pool = db::init_pool(&cfg.database_url, &cfg.db)
        .await
        .map_err(|e| AppError::StartServer(format!("db: {e}")))?;

    // The worker blocks on XREADGROUP, so it gets a connection of its own.
    let producer_conn = redis_client::connect(&cfg.redis_url)
        .await
        .map_err(|e| AppError::StartServer(format!("redis: {e}")))?;
    let worker_conn = redis_client::connect(&cfg.redis_url)
        .await
        .map_err(|e| AppError::StartServer(format!("redis: {e}")))?;

    let metrics = PipelineMetrics::new(SERVICE_NAME);

    let producer_log: Arc<dyn MessageLog> = Arc::new(RedisStreamLog::new(
        producer_conn,
        &cfg.worker.stream_key,
    ));
    let worker_log: Arc<dyn MessageLog> = Arc::new(
        RedisStreamLog::new(worker_conn, &cfg.worker.stream_key)
            .with_block_slice(cfg.worker.block_slice()),
    );
    let store: Arc<dyn MessageStore> = Arc::new(PgMessageStore::new(pool));

    let worker = Arc::new(WorkerHandle::spawn(DeliveryWorker::new(
        worker_log,
        store.clone(),
        metrics.clone(),
        cfg.worker.worker_config(),
    )));
    worker
        .ready()
        .await
        .map_err(|e| AppError::StartServer(format!("delivery worker: {e}")))?;

    let state = AppState {
        producer: Producer::new(producer_log, metrics),
        store,
        worker: worker.clone(),
    };

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, stream = %cfg.worker.stream_key, "starting {}", SERVICE_NAME);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .app_data(web::Data::new(state.clone()))
            .configure(routes::configure_routes)
    })
    .bind(&bind_addr)
    .map_err(|e| AppError::StartServer(e.to_string()))?
    .run()
    .await
    .map_err(|e| AppError::StartServer(e.to_string()));

    if let Err(e) = worker.shutdown().await {
        tracing::warn!(error = %e, "delivery worker did not shut down cleanly");
    }

    server
}
