//! `RelayServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use relay_bus::MessageBus;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::bridge::BusBridge;
use crate::config::ServerConfig;
use crate::echo::{DEFAULT_ECHO_TTL, EchoSuppressor};
use crate::health::{self, HealthResponse};
use crate::ingress::{self, Ingress};
use crate::publisher::BusPublisher;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::broadcast::BroadcastManager;
use crate::websocket::connection::new_connection_id;
use crate::websocket::session::{SessionLimits, run_ws_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Connection registry and fan-out.
    pub broadcast: Arc<BroadcastManager>,
    /// Ingress path for `POST /broadcast`.
    pub ingress: Arc<Ingress>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Per-session limits.
    pub limits: SessionLimits,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics_handle: Option<PrometheusHandle>,
}

/// The relay server.
pub struct RelayServer {
    config: ServerConfig,
    bus: Arc<dyn MessageBus>,
    broadcast: Arc<BroadcastManager>,
    echoes: Arc<EchoSuppressor>,
    ingress: Arc<Ingress>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics_handle: Option<PrometheusHandle>,
}

impl RelayServer {
    /// Create a server and start its bus publisher. Must run inside a Tokio runtime.
    pub fn new(
        config: ServerConfig,
        bus: Arc<dyn MessageBus>,
        metrics_handle: Option<PrometheusHandle>,
    ) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let broadcast = Arc::new(BroadcastManager::new());
        let echoes = Arc::new(EchoSuppressor::new(&config.channels, DEFAULT_ECHO_TTL));
        let (publisher, publisher_handle) =
            BusPublisher::spawn(bus.clone(), echoes.clone(), shutdown.token());
        shutdown.track(publisher_handle);
        let ingress = Arc::new(Ingress::new(broadcast.clone(), publisher));

        Self {
            config,
            bus,
            broadcast,
            echoes,
            ingress,
            shutdown,
            start_time: Instant::now(),
            metrics_handle,
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            broadcast: self.broadcast.clone(),
            ingress: self.ingress.clone(),
            shutdown: self.shutdown.clone(),
            limits: SessionLimits::from(&self.config),
            start_time: self.start_time,
            metrics_handle: self.metrics_handle.clone(),
        };

        Router::new()
            .route("/", get(ws_handler))
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/broadcast", post(ingress::broadcast_handler))
            .with_state(state)
            .layer(CorsLayer::permissive())
    }

    /// Subscribe to the configured bus channels and start the bridge task.
    ///
    /// A failed initial subscribe is returned to the caller; later losses
    /// are retried by the bridge itself.
    pub async fn start_bridge(&self) -> relay_bus::Result<()> {
        let bridge = BusBridge::new(
            self.bus.clone(),
            self.config.channels.clone(),
            self.broadcast.clone(),
            self.echoes.clone(),
        );
        let stream = bridge.subscribe().await?;
        self.shutdown
            .track(tokio::spawn(bridge.run(stream, self.shutdown.token())));
        Ok(())
    }

    /// Bind the listener and serve until shutdown.
    ///
    /// Returns the bound address (useful with port `0`).
    pub async fn listen(&self) -> std::io::Result<SocketAddr> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        info!(%addr, backend = self.bus.backend(), "relay server listening");
        self.shutdown.track(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "server error");
            }
        }));
        Ok(addr)
    }

    /// Close every session, stop the bridge, drain the publisher and wait
    /// for all tasks up to the configured timeout.
    pub async fn shutdown_gracefully(&self) {
        info!(connections = self.broadcast.connection_count(), "shutting down");
        self.shutdown
            .graceful_shutdown(self.config.shutdown_timeout)
            .await;
        info!("shutdown complete");
    }

    /// Get the connection registry.
    pub fn broadcast(&self) -> &Arc<BroadcastManager> {
        &self.broadcast
    }

    /// Get the ingress path.
    pub fn ingress(&self) -> &Arc<Ingress> {
        &self.ingress
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET / and GET /ws
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.shutdown.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let connection_id = new_connection_id();
    ws.on_upgrade(move |socket| {
        let close = state.shutdown.child_token();
        state.shutdown.track_session(run_ws_session(
            socket,
            connection_id,
            state.broadcast,
            state.limits,
            close,
        ))
    })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.broadcast.connection_count(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics_handle {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use axum::body::Body;
    use axum::http::{Request, header};
    use futures::StreamExt;
    use relay_bus::{BusMessage, MemoryBus};
    use serde_json::{Value, json};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use crate::websocket::connection::ClientConnection;

    fn make_server(bus: Arc<MemoryBus>) -> RelayServer {
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            ..ServerConfig::default()
        };
        RelayServer::new(config, bus, None)
    }

    fn post_broadcast(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/broadcast")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_owned()))
            .unwrap()
    }

    fn attach_client(server: &RelayServer, id: &str) -> mpsc::Receiver<Arc<String>> {
        let (tx, rx) = mpsc::channel(16);
        let conn = Arc::new(ClientConnection::new(id.into(), tx, CancellationToken::new()));
        assert!(conn.mark_open());
        assert!(server.broadcast().add(conn));
        rx
    }

    async fn body_json(resp: Response) -> Value {
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let server = make_server(Arc::new(MemoryBus::new()));
        let _rx = attach_client(&server, "c1");

        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let parsed = body_json(resp).await;
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 1);
    }

    #[tokio::test]
    async fn broadcast_accepted_and_delivered_locally() {
        let bus = Arc::new(MemoryBus::new());
        let mut sub = bus.subscribe(&["chat.events".to_owned()]).await.unwrap();
        let server = make_server(bus);
        let mut rx_a = attach_client(&server, "a");
        let mut rx_b = attach_client(&server, "b");

        let resp = server
            .router()
            .oneshot(post_broadcast(r#"{"message":{"type":"chat","text":"hi"}}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(body_json(resp).await, json!({"status": "broadcasted"}));

        for rx in [&mut rx_a, &mut rx_b] {
            let frame: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
            assert_eq!(frame["channel"], "chat.events");
            assert_eq!(frame["data"], json!({"type": "chat", "text": "hi"}));
            assert!(frame["ts"].is_string());
            assert!(rx.try_recv().is_err());
        }

        let published = tokio::time::timeout(Duration::from_secs(2), sub.next())
            .await
            .unwrap()
            .unwrap();
        let BusMessage { channel, payload } = published;
        assert_eq!(channel, "chat.events");
        assert_eq!(
            payload,
            relay_bus::BusPayload::Text(json!({"type": "chat", "text": "hi"}).to_string())
        );
    }

    #[tokio::test]
    async fn broadcast_to_ad_hoc_channel() {
        let server = make_server(Arc::new(MemoryBus::new()));
        let mut rx = attach_client(&server, "a");

        let resp = server
            .router()
            .oneshot(post_broadcast(r#"{"channel":"overlay.pins","message":{"productId":7}}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let frame: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["channel"], "overlay.pins");
    }

    #[tokio::test]
    async fn missing_message_rejected_without_broadcast() {
        let server = make_server(Arc::new(MemoryBus::new()));
        let mut rx = attach_client(&server, "a");

        let resp = server
            .router()
            .oneshot(post_broadcast(r#"{"channel":"chat.events"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await, json!({"error": "Missing message"}));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn bus_down_still_accepted_and_delivered() {
        let bus = Arc::new(MemoryBus::new());
        bus.set_available(false);
        let server = make_server(bus);
        let mut rx = attach_client(&server, "a");

        let resp = server
            .router()
            .oneshot(post_broadcast(r#"{"message":{"text":"local only"}}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let frame: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["data"]["text"], "local only");
    }

    #[tokio::test]
    async fn metrics_requires_recorder() {
        let server = make_server(Arc::new(MemoryBus::new()));
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_rendered_with_handle() {
        let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle();
        let server = RelayServer::new(ServerConfig::default(), Arc::new(MemoryBus::new()), Some(handle));
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ws_route_requires_upgrade() {
        let server = make_server(Arc::new(MemoryBus::new()));
        for uri in ["/", "/ws"] {
            let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
            let resp = server.router().oneshot(req).await.unwrap();
            assert!(resp.status().is_client_error(), "{uri} answered {}", resp.status());
        }
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server(Arc::new(MemoryBus::new()));
        let req = Request::builder().uri("/nonexistent").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn start_bridge_fails_when_bus_down() {
        let bus = Arc::new(MemoryBus::new());
        bus.set_available(false);
        let server = make_server(bus);
        assert!(server.start_bridge().await.is_err());
    }

    #[tokio::test]
    async fn listen_binds_ephemeral_port_and_shuts_down() {
        let server = make_server(Arc::new(MemoryBus::new()));
        server.start_bridge().await.unwrap();
        let addr = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);

        tokio::time::timeout(Duration::from_secs(5), server.shutdown_gracefully())
            .await
            .unwrap();
        assert!(server.shutdown().is_shutting_down());
    }
}
