use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use diary_notification_service::{
    db, handlers, logging, metrics,
    store::{PgAdvisorDirectory, PgNotificationStore},
    stream::spawn_sweeper,
    Config, NotificationService, SessionRegistry,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing();

    let config = Config::from_env().context("failed to load configuration")?;
    tracing::info!(env = %config.app.env, "Starting diary notification service");

    let pool = db::init_pool(&config.database)
        .await
        .context("failed to initialize database")?;
    tracing::info!("Successfully connected to database");

    let registry = SessionRegistry::new(config.stream.inactivity_timeout);
    let notification_service = Arc::new(NotificationService::new(
        Arc::new(PgNotificationStore::new(pool.clone())),
        Arc::new(PgAdvisorDirectory::new(pool.clone())),
        registry.clone(),
        config.stream,
    ));

    let shutdown = CancellationToken::new();
    let sweeper = spawn_sweeper(
        registry.clone(),
        config.stream.sweep_interval,
        shutdown.clone(),
    );

    let addr = format!("0.0.0.0:{}", config.app.port);
    tracing::info!("Starting HTTP server on {}", addr);

    let origins = config.app.cors_allow_origins.clone();
    HttpServer::new(move || {
        let cors = origins
            .iter()
            .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
            .allow_any_method()
            .allow_any_header()
            .supports_credentials()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(notification_service.clone()))
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .wrap(metrics::MetricsMiddleware)
            .route("/health", web::get().to(|| async { "OK" }))
            .route("/metrics", web::get().to(metrics::serve_metrics))
            .route(
                "/",
                web::get().to(|| async { "Diary Notification Service v1.0" }),
            )
            .configure(handlers::register_routes)
    })
    .bind(&addr)
    .with_context(|| format!("failed to bind {}", addr))?
    .run()
    .await
    .context("HTTP server error")?;

    shutdown.cancel();
    let closed = registry.close_all().await;
    if let Err(e) = sweeper.await {
        tracing::warn!("Stream sweeper task failed: {}", e);
    }
    pool.close().await;
    tracing::info!(closed_streams = closed, "Diary notification service stopped");

    Ok(())
}
