use {
    axum::{Router, extract::State, http::StatusCode, routing::get},
    prometheus::{Encoder, TextEncoder},
    prometheus_metric_storage::StorageRegistry,
    std::{
        net::SocketAddr,
        sync::{Arc, OnceLock},
    },
};

/// The registry all `prometheus_metric_storage::MetricStorage` structs in the
/// process resolve their instances from.
pub fn get_storage_registry() -> &'static StorageRegistry {
    static REGISTRY: OnceLock<StorageRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| StorageRegistry::new(prometheus::Registry::default()))
}

/// Answered by the component that knows whether the service is making
/// progress; wired into the `/liveness` probe.
#[async_trait::async_trait]
pub trait LivenessChecking: Send + Sync {
    async fn is_alive(&self) -> bool;
}

/// Serve `/metrics` and `/liveness` until the process exits.
pub async fn serve(
    liveness: Arc<dyn LivenessChecking>,
    address: SocketAddr,
) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/liveness", get(liveness_handler))
        .with_state(liveness);
    let listener = tokio::net::TcpListener::bind(address).await?;
    tracing::info!(%address, "serving metrics");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn metrics_handler() -> Result<String, StatusCode> {
    let metrics = get_storage_registry().registry().gather();
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&metrics, &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

async fn liveness_handler(State(liveness): State<Arc<dyn LivenessChecking>>) -> StatusCode {
    if liveness.is_alive().await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
