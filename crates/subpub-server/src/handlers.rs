//! HTTP/WebSocket façade over the engine.
//!
//! - `GET /subscribe/:subject` upgrades to a WebSocket that streams every
//!   payload published to `subject` as a binary frame.
//! - `POST /publish/:subject` publishes the request body.
//! - `GET /health` reports the engine state.
//!
//! Engine errors map onto status codes: invalid input is `400`, an engine
//! that is shutting down is `503`.

use crate::config::Config;
use crate::metrics::{self, StreamMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use subpub_core::{Engine, EngineError, EngineState, ErrorKind, HandlerFn, Subscription};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The publish/subscribe engine.
    pub engine: Engine<Bytes>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            engine: Engine::new(),
            config,
        }
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/subscribe/:subject", get(subscribe_handler))
        .route("/publish/:subject", post(publish_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the server until a shutdown signal arrives.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    if config.metrics.enabled {
        match metrics::start_metrics_server(config.metrics.port) {
            Ok(()) => metrics::init_metrics(),
            Err(e) => error!("Failed to start metrics server: {}", e),
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Subpub server listening on {}", addr);

    serve(listener, state, shutdown_signal()).await
}

/// Serve on `listener` until `shutdown` completes, then close the engine.
///
/// The engine is closed before in-flight connections are awaited, so that
/// open subscription streams end instead of holding the server up.
///
/// # Errors
///
/// Returns an error if serving fails.
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let closing = Arc::clone(&state);
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("Shutting down");
            close_engine(&closing).await;
        })
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn close_engine(state: &AppState) {
    let grace = state.config.engine.shutdown_grace();
    match state.engine.close(grace).await {
        Ok(()) => info!("Engine drained"),
        Err(e) => warn!(error = %e, "Engine did not drain within {:?}", grace),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let status = match state.engine.state() {
        EngineState::Open => "ok",
        EngineState::Closing => "closing",
        EngineState::Closed => "closed",
    };
    let stats = state.engine.stats();
    Json(json!({
        "status": status,
        "version": env!("CARGO_PKG_VERSION"),
        "subjects": stats.subjects,
        "subscribers": stats.subscribers,
    }))
}

/// Publish handler.
async fn publish_handler(
    State(state): State<Arc<AppState>>,
    Path(subject): Path<String>,
    body: Bytes,
) -> Response {
    let size = body.len();
    if size > state.config.limits.max_message_size {
        metrics::record_error("message_too_large");
        return (
            StatusCode::PAYLOAD_TOO_LARGE,
            Json(json!({ "error": "message too large" })),
        )
            .into_response();
    }

    match state.engine.publish(&subject, body) {
        Ok(delivered) => {
            metrics::record_publish(size, delivered);
            debug!(subject = %subject, recipients = delivered, "Published");
            Json(json!({ "delivered": delivered })).into_response()
        }
        Err(e) => {
            warn!(subject = %subject, error = %e, "Publish failed");
            error_response(&e)
        }
    }
}

/// Subscribe handler.
///
/// Subscribes before upgrading so that engine errors surface as HTTP status
/// codes instead of an immediately closed socket.
async fn subscribe_handler(
    ws: WebSocketUpgrade,
    Path(subject): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let (tx, deliveries) = mpsc::unbounded_channel::<Bytes>();
    let handler = HandlerFn::arc(move |payload: Bytes| {
        let tx = tx.clone();
        async move {
            // The stream may already be gone; its subscription is cancelled then.
            let _ = tx.send(payload);
        }
    });

    let subscription = match state.engine.subscribe(&subject, handler) {
        Ok(subscription) => subscription,
        Err(e) => {
            warn!(subject = %subject, error = %e, "Subscribe failed");
            return error_response(&e);
        }
    };
    metrics::record_subscription();

    let on_failure = subscription.clone();
    ws.on_failed_upgrade(move |e| {
        warn!(error = %e, "WebSocket upgrade failed");
        on_failure.unsubscribe();
    })
    .on_upgrade(move |socket| stream_subscription(socket, subscription, deliveries))
}

/// Forward deliveries of one subscription to its WebSocket.
async fn stream_subscription(
    socket: WebSocket,
    subscription: Subscription,
    mut deliveries: mpsc::UnboundedReceiver<Bytes>,
) {
    let _metrics_guard = StreamMetricsGuard::new();
    let subject = subscription.subject().to_string();
    let id = subscription.id();
    debug!(subject = %subject, subscription = id, "Stream opened");

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            biased;

            delivery = deliveries.recv() => {
                match delivery {
                    Some(payload) => {
                        let size = payload.len();
                        if let Err(e) = sender.send(Message::Binary(payload.to_vec())).await {
                            error!(subject = %subject, subscription = id, error = %e, "Failed to send message");
                            metrics::record_error("send");
                            break;
                        }
                        metrics::record_delivery(size);
                    }
                    None => {
                        // Engine closed and the worker drained
                        let frame = CloseFrame {
                            code: close_code::AWAY,
                            reason: "server shutting down".into(),
                        };
                        let _ = sender.send(Message::Close(Some(frame))).await;
                        break;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(subject = %subject, subscription = id, "Client closed stream");
                        break;
                    }
                    Some(Ok(_)) => {
                        // Subscription streams are one-way
                    }
                    Some(Err(e)) => {
                        warn!(subject = %subject, subscription = id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                }
            }
        }
    }

    subscription.unsubscribe();
    debug!(subject = %subject, subscription = id, "Stream closed");
}

/// Map an engine error kind onto an HTTP status code.
fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::ForcedShutdown => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(e: &EngineError) -> Response {
    let kind = e.kind();
    metrics::record_error(match kind {
        ErrorKind::InvalidInput => "invalid_input",
        ErrorKind::Unavailable => "unavailable",
        ErrorKind::ForcedShutdown => "forced_shutdown",
    });
    (status_for(kind), Json(json!({ "error": e.to_string() }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio_tungstenite::{connect_async, tungstenite};

    fn test_state() -> Arc<AppState> {
        let mut config = Config::default();
        config.metrics.enabled = false;
        config.limits.max_message_size = 16;
        config.engine.shutdown_grace_ms = 1_000;
        Arc::new(AppState::new(config))
    }

    async fn publish(state: &Arc<AppState>, subject: &str, body: &'static [u8]) -> StatusCode {
        publish_handler(
            State(Arc::clone(state)),
            Path(subject.to_string()),
            Bytes::from_static(body),
        )
        .await
        .status()
    }

    async fn spawn_server(state: Arc<AppState>) -> (SocketAddr, tokio::sync::oneshot::Sender<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(serve(listener, state, async move {
            let _ = stop_rx.await;
        }));
        (addr, stop_tx)
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(ErrorKind::InvalidInput), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(ErrorKind::Unavailable),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_publish_status_codes() {
        let state = test_state();

        // Never subscribed
        assert_eq!(publish(&state, "news", b"hello").await, StatusCode::BAD_REQUEST);

        let handler = HandlerFn::arc(|_payload: Bytes| async move {});
        state.engine.subscribe("news", handler).unwrap();

        assert_eq!(publish(&state, "news", b"hello").await, StatusCode::OK);
        assert_eq!(publish(&state, "news", b"").await, StatusCode::BAD_REQUEST);
        assert_eq!(
            publish(&state, "news", b"this body is longer than sixteen bytes").await,
            StatusCode::PAYLOAD_TOO_LARGE
        );

        state.engine.close(Duration::from_secs(1)).await.unwrap();
        assert_eq!(
            publish(&state, "news", b"hello").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_stream_delivers_in_order() {
        let state = test_state();
        let (addr, _stop) = spawn_server(Arc::clone(&state)).await;

        let (mut ws, _) = connect_async(format!("ws://{}/subscribe/news", addr))
            .await
            .unwrap();
        assert_eq!(state.engine.subscriber_count("news"), 1);

        for i in 0..10 {
            let payload = Bytes::from(format!("msg-{}", i));
            assert_eq!(state.engine.publish("news", payload).unwrap(), 1);
        }

        for i in 0..10 {
            let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            assert_eq!(
                msg,
                tungstenite::Message::Binary(format!("msg-{}", i).into_bytes())
            );
        }
    }

    #[tokio::test]
    async fn test_client_close_unsubscribes() {
        let state = test_state();
        let (addr, _stop) = spawn_server(Arc::clone(&state)).await;

        let (mut ws, _) = connect_async(format!("ws://{}/subscribe/news", addr))
            .await
            .unwrap();
        assert_eq!(state.engine.subscriber_count("news"), 1);

        ws.close(None).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while state.engine.subscriber_count("news") > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("subscription was not cancelled");

        assert_eq!(state.engine.publish("news", Bytes::from("late")), Ok(0));
    }

    #[tokio::test]
    async fn test_shutdown_ends_streams() {
        let state = test_state();
        let (addr, stop) = spawn_server(Arc::clone(&state)).await;

        let (mut ws, _) = connect_async(format!("ws://{}/subscribe/news", addr))
            .await
            .unwrap();
        state.engine.publish("news", Bytes::from("last")).unwrap();

        stop.send(()).unwrap();

        let first = ws.next().await.unwrap().unwrap();
        assert_eq!(first, tungstenite::Message::Binary(b"last".to_vec()));

        let closing = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(matches!(closing, tungstenite::Message::Close(_)));
        assert_ne!(state.engine.state(), EngineState::Open);
    }

    #[tokio::test]
    async fn test_subscribe_rejected_when_closed() {
        let state = test_state();
        state.engine.close(Duration::from_secs(1)).await.unwrap();
        let (addr, _stop) = spawn_server(Arc::clone(&state)).await;

        match connect_async(format!("ws://{}/subscribe/news", addr)).await {
            Err(tungstenite::Error::Http(response)) => {
                assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE.as_u16());
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("subscribe should have been rejected"),
        }
    }
}
