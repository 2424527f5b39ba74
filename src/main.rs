use axum::{http::HeaderValue, Router};
use docs_collab::config::{Config, Timings};
use docs_collab::docs::ApiDoc;
use docs_collab::routes::{create_api_routes, create_ws_routes};
use docs_collab::services::{FsContentStore, MarkdownRenderer};
use docs_collab::ws::{SessionDeps, SessionRegistry};
use std::panic;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() {
    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            // Default to info level, but allow debug for our app
            "docs_collab=debug,tower_http=debug,axum::rejection=trace,info".into()
        }))
        .init();

    info!("Starting server...");

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
        Config::default()
    });

    // Bad timings would leave sessions unable to autosave or sweep
    let timings = match Timings::resolve(&config.raw_timings()) {
        Ok(timings) => timings,
        Err(e) => {
            error!("Invalid timing configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!("Timings: {:?}", timings);

    let registry = SessionRegistry::new(SessionDeps {
        timings,
        store: Arc::new(FsContentStore::new(&config.content_root)),
        renderer: Arc::new(MarkdownRenderer),
    });
    info!("Serving documents from {}", config.content_root);

    let app_routes = Router::new()
        // Mount API routes
        .nest("/api", create_api_routes(registry.clone()))
        // One collaboration socket per document
        .nest("/ws", create_ws_routes(registry.clone()))
        // Mount Swagger UI
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors_layer(&config))
        // Add tracing layer
        .layer(TraceLayer::new_for_http());

    let listener = match tokio::net::TcpListener::bind(config.server_address()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", config.server_address(), e);
            std::process::exit(1);
        }
    };

    info!("🚀 Server running on http://{}", config.server_address());
    info!("📡 WebSocket available at ws://{}/ws/<document>", config.server_address());
    info!("📚 Swagger UI available at http://{}/swagger", config.server_address());

    if let Err(e) = axum::serve(listener, app_routes)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
    }

    // Unsaved edits go to disk before the process exits
    registry.shutdown().await;
    info!("Server stopped");
}

fn cors_layer(config: &Config) -> CorsLayer {
    match &config.cors_origins {
        Some(origins) if !config.is_development() => {
            let allowed: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|origin| origin.trim().parse().ok())
                .collect();
            CorsLayer::new().allow_origin(allowed).allow_methods(Any).allow_headers(Any)
        }
        _ => CorsLayer::permissive(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
