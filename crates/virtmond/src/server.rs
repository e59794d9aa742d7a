//! HTTP endpoint serving the exposition format.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::header;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use prometheus_client::registry::Registry;
use tracing::info;

const INDEX_PAGE: &str = r#"<html>
<head><title>virtmon exporter</title></head>
<body>
<h1>virtmon exporter</h1>
<p><a href="/metrics">Metrics</a></p>
</body>
</html>
"#;

/// Builds the exporter router.
pub fn router(registry: Arc<Registry>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/metrics", get(metrics))
        .with_state(registry)
}

/// Binds the listener and serves scrapes until the process exits.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn serve(addr: SocketAddr, registry: Arc<Registry>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");
    axum::serve(listener, router(registry)).await?;
    Ok(())
}

async fn index() -> Html<&'static str> {
    Html(INDEX_PAGE)
}

async fn metrics(State(registry): State<Arc<Registry>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, virtmon::registry::content_type())],
        virtmon::registry::text_exposition(&registry),
    )
}
