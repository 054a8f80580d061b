//! # Broker Ingress Handler
//!
//! Terminates inbound HTTP event traffic on `POST /{namespace}/{broker}`,
//! decodes and validates the CloudEvent, stamps the arrival time, and
//! forwards it to the decouple sink within a fixed deadline.
//!
//! Response semantics:
//! - 202 event accepted by the decoupling layer
//! - 400 undecodable or malformed event
//! - 404 unknown path shape, or no provisioned topic for the target
//! - 405 any method other than POST
//! - 500 downstream publish failure or timeout
//!
//! Every request whose target key was parsed records exactly one dispatch
//! sample, on every exit path, measured from request arrival.

use crate::config::IngressConfig;
use crate::decouple::{DecoupleSink, SinkError};
use crate::event::{Event, EVENT_ARRIVAL_TIME};
use crate::metrics;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

/// Upper bound on an inbound event body, matching the backend's maximum
/// message size.
const MAX_EVENT_BYTES: usize = 10 * 1024 * 1024;

/// Receives events and hands them to the decouple sink.
///
/// Shared across all in-flight requests; holds no per-request state.
pub struct Handler {
    sink: Arc<dyn DecoupleSink>,
    publish_timeout: Duration,
}

impl Handler {
    #[must_use]
    pub fn new(sink: Arc<dyn DecoupleSink>, publish_timeout: Duration) -> Self {
        Self {
            sink,
            publish_timeout,
        }
    }

    #[must_use]
    pub fn from_config(sink: Arc<dyn DecoupleSink>, config: &IngressConfig) -> Self {
        Self::new(sink, config.publish_timeout)
    }

    /// Builds the router. All paths funnel through [`serve`] so method and
    /// path validation happen in one place, as the response matrix requires.
    #[must_use]
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .fallback(serve)
            .layer(TraceLayer::new_for_http())
            .with_state(self)
    }

    /// Blocks serving inbound events until shutdown. New connections stop on
    /// ctrl-c/SIGTERM; in-flight requests drain, bounded by the publish
    /// deadline.
    pub async fn start(self: Arc<Self>, port: u16) -> Result<(), anyhow::Error> {
        let addr = format!("0.0.0.0:{port}");
        let listener = TcpListener::bind(&addr).await?;
        info!("Broker ingress listening on {}", addr);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        Ok(())
    }

    /// Decode, stamp, and forward one event. Returns the response status,
    /// the diagnostic body, and the event type for metric labels (empty when
    /// decoding never produced an event).
    async fn dispatch(
        &self,
        request: Request,
        namespace: &str,
        broker: &str,
    ) -> (StatusCode, String, String) {
        let (parts, body) = request.into_parts();
        // The body is fully consumed (or the error drops it) on every path.
        let bytes = match axum::body::to_bytes(body, MAX_EVENT_BYTES).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    format!("Failed to read request body: {e}"),
                    String::new(),
                );
            }
        };

        let mut event = match Event::from_http(&parts.headers, &bytes) {
            Ok(event) => event,
            Err(e) => {
                debug!(namespace, broker, error = %e, "Request is not a valid event");
                return (
                    StatusCode::BAD_REQUEST,
                    format!("Failed to convert request to event: {e}"),
                    String::new(),
                );
            }
        };

        event.set_extension(EVENT_ARRIVAL_TIME, &Utc::now().to_rfc3339());
        let event_type = event.ty().to_string();

        // Fixed deadline, independent of the inbound caller's own deadline.
        // Bounds only the downstream publish; the task never outlives it.
        let sent = tokio::time::timeout(
            self.publish_timeout,
            self.sink.send(namespace, broker, &event),
        )
        .await;

        match sent {
            Ok(Ok(())) => (StatusCode::ACCEPTED, String::new(), event_type),
            Ok(Err(e @ SinkError::NotFound { .. })) => {
                debug!(namespace, broker, error = %e, "No decouple target");
                (StatusCode::NOT_FOUND, e.to_string(), event_type)
            }
            Ok(Err(e)) => {
                error!(namespace, broker, error = %e, "Failed to publish to decouple sink");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Error publishing to decouple sink for broker {namespace}/{broker}: {e}"),
                    event_type,
                )
            }
            Err(_) => {
                error!(namespace, broker, "Publish timed out");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!(
                        "Error publishing to decouple sink for broker {namespace}/{broker}: timed out after {:?}",
                        self.publish_timeout
                    ),
                    event_type,
                )
            }
        }
    }
}

async fn serve(State(handler): State<Arc<Handler>>, request: Request) -> Response {
    let start = Instant::now();

    if request.method() != Method::POST {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let path = request.uri().path().to_string();
    let Some((namespace, broker)) = parse_target(&path) else {
        let msg = format!("Malformed request path. want: '/<ns>/<broker>'; got: {path}");
        info!("{}", msg);
        return (StatusCode::NOT_FOUND, msg).into_response();
    };
    let (namespace, broker) = (namespace.to_string(), broker.to_string());

    let (status, body, event_type) = handler.dispatch(request, &namespace, &broker).await;
    metrics::record_event_dispatch(
        &namespace,
        &broker,
        &event_type,
        status.as_u16(),
        start.elapsed(),
    );

    (status, body).into_response()
}

/// Path must be exactly two non-empty segments: `/{namespace}/{broker}`.
fn parse_target(path: &str) -> Option<(&str, &str)> {
    let mut pieces = path.split('/');
    if !pieces.next()?.is_empty() {
        return None;
    }
    let namespace = pieces.next()?;
    let broker = pieces.next()?;
    if pieces.next().is_some() || namespace.is_empty() || broker.is_empty() {
        return None;
    }
    Some((namespace, broker))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
