//! API server initialization

use std::net::SocketAddr;

use anyhow::Result;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use tokio::net::TcpListener;
use tower_http::compression::CompressionLayer;
use tower_http::decompression::RequestDecompressionLayer;

use super::middleware::{self, AllowedOrigins};
use super::routes::{
    annotations, datasets, experiments, health, otlp_collector, traces, views,
};
use crate::app::{CoreApp, Services};
use crate::core::constants::{DEFAULT_BODY_LIMIT, OTLP_BODY_LIMIT};
use crate::data::topics::Publisher;
use crate::domain::observability::SpanBatch;

pub struct ApiServer {
    app: CoreApp,
    allowed_origins: AllowedOrigins,
}

impl ApiServer {
    pub fn new(app: CoreApp) -> Self {
        let allowed_origins = AllowedOrigins::new(&app.config.server.host, app.config.server.port);
        Self {
            app,
            allowed_origins,
        }
    }

    /// Everything served under `/api/v1`
    fn api_routes(services: &Services, ingest_publisher: Publisher<SpanBatch>) -> Router {
        let otlp_routes = otlp_collector::routes(ingest_publisher.clone())
            .layer(RequestDecompressionLayer::new())
            .layer(DefaultBodyLimit::max(OTLP_BODY_LIMIT));

        Router::new()
            .route("/health", get(health::health))
            .nest("/v1", otlp_routes)
            .merge(traces::routes(
                services.ingestor.clone(),
                services.query.clone(),
                ingest_publisher,
            ))
            .merge(annotations::routes(services.annotations.clone()))
            .merge(views::routes(services.views.clone()))
            .merge(datasets::routes(services.exporter.clone()))
            .merge(experiments::routes(services.experiments.clone()))
    }

    /// Returns CoreApp for graceful shutdown
    pub async fn start(self) -> Result<CoreApp> {
        let Self {
            app,
            allowed_origins,
        } = self;

        let shutdown = app.shutdown.clone();
        let addr = SocketAddr::new(app.config.server.host.parse()?, app.config.server.port);
        if middleware::is_all_interfaces(&app.config.server.host) {
            tracing::warn!("Listening on all interfaces; the caller header is trusted as is");
        }

        let router = Router::new()
            .nest(
                "/api/v1",
                Self::api_routes(&app.services, app.ingest_topic.publisher()),
            )
            .fallback(middleware::handle_404)
            .layer(middleware::trace())
            .layer(CompressionLayer::new())
            .layer(middleware::cors(&allowed_origins))
            .layer(DefaultBodyLimit::max(DEFAULT_BODY_LIMIT));

        let listener = TcpListener::bind(addr).await?;
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown.wait())
        .await?;

        Ok(app)
    }
}
