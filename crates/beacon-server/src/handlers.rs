//! Connection handlers for the Beacon server.
//!
//! This module owns the socket side: it maps a request onto a facility,
//! identity and audience, then relays between the WebSocket and the bus.
//!
//! Two routers are built from one state. [`app`] is the public one and only
//! lets clients reach their own channels. [`api_app`] is the producer API,
//! which can address any identity and is served on a separate listener.

use crate::config::{BusBackend, Config};
use crate::metrics::{self, ConnectionMetricsGuard, Flow};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path, RawQuery, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use beacon_bus::{MemoryBus, MessageBus, RedisBus, SetStore};
use beacon_core::{
    AudienceSpec, ChannelResolver, Identity, PresenceTracker, Publisher,
    SessionError, SubscriptionSession, Target,
};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Header carrying the session id, set by the authenticating proxy.
pub const SESSION_HEADER: &str = "x-session-id";
/// Header carrying the authenticated user id.
pub const USER_HEADER: &str = "x-user-id";
/// Header carrying the user's group id.
pub const GROUP_HEADER: &str = "x-group-id";

/// Shared server state.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Message bus.
    pub bus: Arc<dyn MessageBus>,
    /// Online users per facility.
    pub presence: PresenceTracker,
    /// Channel resolver for the configured prefix.
    pub resolver: ChannelResolver,
}

impl AppState {
    /// Connect to the configured bus and build the state.
    ///
    /// # Errors
    ///
    /// Returns an error if the bus cannot be reached.
    pub async fn connect(config: Config) -> Result<Self> {
        let (bus, store): (Arc<dyn MessageBus>, Arc<dyn SetStore>) = match config.bus.backend {
            BusBackend::Memory => {
                let bus = Arc::new(MemoryBus::new());
                let store: Arc<dyn SetStore> = bus.clone();
                (bus as Arc<dyn MessageBus>, store)
            }
            BusBackend::Redis => {
                let bus = Arc::new(
                    RedisBus::connect(&config.bus.redis_url)
                        .await
                        .with_context(|| format!("Failed to connect to {}", config.bus.redis_url))?,
                );
                let store: Arc<dyn SetStore> = bus.clone();
                (bus as Arc<dyn MessageBus>, store)
            }
        };

        Ok(Self::with_bus(config, bus, store))
    }

    /// Build the state over an existing bus.
    #[must_use]
    pub fn with_bus(config: Config, bus: Arc<dyn MessageBus>, store: Arc<dyn SetStore>) -> Self {
        let presence = PresenceTracker::new(store, config.bus.prefix.clone());
        let resolver = ChannelResolver::new(config.bus.prefix.clone());
        Self {
            config,
            bus,
            presence,
            resolver,
        }
    }
}

/// Build the public router: the WebSocket endpoint and health check.
///
/// The facility is the percent-decoded rest of the path, exactly as the
/// producer API routes see it.
pub fn app(state: Arc<AppState>) -> Router {
    let ws_route = format!("{}*facility", state.config.websocket.url);

    Router::new()
        .route(&ws_route, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Build the producer API router.
pub fn api_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/publish/*facility", post(publish_handler))
        .route("/online/*facility", get(online_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let api_addr = config.api.enabled.then(|| config.api_addr()).transpose()?;
    let state = Arc::new(AppState::connect(config).await?);

    let listener = TcpListener::bind(addr).await?;
    info!("Beacon server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}<facility>",
        addr, state.config.websocket.url
    );
    let public = axum::serve(listener, app(state.clone()));

    let Some(api_addr) = api_addr else {
        info!("Producer API disabled");
        public.await?;
        return Ok(());
    };

    let api_listener = TcpListener::bind(api_addr)
        .await
        .with_context(|| format!("Failed to bind producer API on {api_addr}"))?;
    info!("Producer API listening on {}", api_addr);
    let api = axum::serve(api_listener, api_app(state));

    tokio::try_join!(async { public.await }, async { api.await })?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "bus": state.bus.name(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Read the connection identity from trusted proxy headers.
pub fn identity_from_headers(headers: &HeaderMap) -> Identity {
    let value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_owned)
    };

    Identity {
        session_id: value(SESSION_HEADER),
        user_id: value(USER_HEADER),
        group_id: value(GROUP_HEADER),
    }
}

/// Read audience flags from query keys, e.g. `?subscribe-user&publish-broadcast`.
///
/// Returns `None` when no known flag is present.
pub fn audience_from_query(query: Option<&str>) -> Option<AudienceSpec> {
    let keys = query?
        .split('&')
        .map(|pair| pair.split_once('=').map_or(pair, |(key, _)| key));
    Some(AudienceSpec::from_flags(keys)).filter(|spec| !spec.is_empty())
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(facility): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    let identity = identity_from_headers(&headers);
    let audience = audience_from_query(query.as_deref())
        .unwrap_or(state.config.websocket.default_audience);

    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state, facility, identity, audience))
}

/// Handle a WebSocket connection.
async fn handle_websocket(
    socket: WebSocket,
    state: Arc<AppState>,
    facility: String,
    identity: Identity,
    audience: AudienceSpec,
) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let channels = state.resolver.resolve(&facility, &audience, &identity);
    let mut session =
        match SubscriptionSession::open(state.bus.as_ref(), channels.subscribe.iter().cloned()).await {
            Ok(session) => session,
            Err(e) => {
                error!(facility = %facility, error = %e, "Failed to open subscription");
                metrics::record_error("subscribe");
                return;
            }
        };
    let publisher = Publisher::new(state.bus.clone(), channels.publish);

    match state.presence.connect(&facility, &identity).await {
        Ok(true) => metrics::record_presence("join"),
        Ok(false) => {}
        Err(e) => {
            warn!(facility = %facility, error = %e, "Failed to record presence");
            metrics::record_error("presence");
        }
    }

    debug!(
        facility = %facility,
        subscribe = session.channels().len(),
        publish = publisher.channels().len(),
        "WebSocket connected"
    );

    let (mut sender, mut receiver) = socket.split();
    let heartbeat = state.config.websocket.heartbeat.as_deref();

    loop {
        tokio::select! {
            // Messages from subscribed channels
            inbound = session.read_next(), if session.is_open() => {
                match inbound {
                    Ok(Some(message)) => {
                        metrics::record_message(message.payload_size(), Flow::Outbound);
                        let frame = match message.payload_str() {
                            Some(text) => WsMessage::Text(text.to_owned()),
                            None => WsMessage::Binary(message.payload.to_vec()),
                        };
                        if sender.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(SessionError::ConnectionLost) => {
                        warn!(facility = %facility, "Bus connection lost, closing WebSocket");
                        metrics::record_error("bus");
                        break;
                    }
                    Err(e) => {
                        warn!(facility = %facility, error = %e, "Subscription error");
                        metrics::record_error("bus");
                        break;
                    }
                }
            }

            // Frames from the client
            frame = receiver.next() => {
                let payload = match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        if heartbeat == Some(text.as_str()) {
                            if sender.send(WsMessage::Text(text)).await.is_err() {
                                break;
                            }
                            continue;
                        }
                        Bytes::from(text)
                    }
                    Some(Ok(WsMessage::Binary(data))) => Bytes::from(data),
                    Some(Ok(WsMessage::Ping(data))) => {
                        if sender.send(WsMessage::Pong(data)).await.is_err() {
                            break;
                        }
                        continue;
                    }
                    Some(Ok(WsMessage::Pong(_))) => continue,
                    Some(Ok(WsMessage::Close(_))) => {
                        debug!(facility = %facility, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(facility = %facility, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(facility = %facility, "WebSocket stream ended");
                        break;
                    }
                };

                if publisher.is_empty() {
                    debug!(facility = %facility, "Dropping message, no publish channels");
                    continue;
                }

                metrics::record_message(payload.len(), Flow::Inbound);
                if let Err(e) = publisher.publish(payload).await {
                    warn!(facility = %facility, error = %e, "Publish failed");
                    metrics::record_error("bus");
                    if e.is_connection_lost() {
                        break;
                    }
                }
            }
        }
    }

    session.close();

    match state.presence.disconnect(&facility, &identity).await {
        Ok(true) => metrics::record_presence("leave"),
        Ok(false) => {}
        Err(e) => {
            warn!(facility = %facility, error = %e, "Failed to clear presence");
            metrics::record_error("presence");
        }
    }

    debug!(facility = %facility, "WebSocket disconnected");
}

/// Body of `POST /publish/<facility>`.
#[derive(Debug, Default, Deserialize)]
pub struct PublishRequest {
    /// Publish on the facility broadcast channel.
    #[serde(default)]
    pub broadcast: bool,
    /// User ids to address.
    #[serde(default)]
    pub users: Vec<String>,
    /// Group ids to address.
    #[serde(default)]
    pub groups: Vec<String>,
    /// Session ids to address.
    #[serde(default)]
    pub sessions: Vec<String>,
    /// Payload.
    pub message: String,
}

impl PublishRequest {
    /// The channels this request addresses.
    #[must_use]
    pub fn targets(&self) -> Vec<Target> {
        let broadcast = self.broadcast.then_some(Target::Broadcast);
        broadcast
            .into_iter()
            .chain(self.users.iter().cloned().map(Target::User))
            .chain(self.groups.iter().cloned().map(Target::Group))
            .chain(self.sessions.iter().cloned().map(Target::Session))
            .collect()
    }
}

/// Response of `POST /publish/<facility>`.
#[derive(Debug, Serialize, Deserialize)]
pub struct PublishResponse {
    /// Channels published to.
    pub channels: usize,
    /// Receivers across all channels.
    pub receivers: usize,
}

/// Server-side publish handler.
async fn publish_handler(
    State(state): State<Arc<AppState>>,
    Path(facility): Path<String>,
    Json(request): Json<PublishRequest>,
) -> Response {
    let publisher = match Publisher::for_targets(
        state.bus.clone(),
        &state.resolver,
        &facility,
        &request.targets(),
    ) {
        Ok(publisher) => publisher,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    let size = request.message.len();
    match publisher.publish(request.message.into_bytes()).await {
        Ok(receivers) => {
            metrics::record_message(size, Flow::Api);
            Json(PublishResponse {
                channels: publisher.channels().len(),
                receivers,
            })
            .into_response()
        }
        Err(e) => {
            warn!(facility = %facility, error = %e, "API publish failed");
            metrics::record_error("bus");
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
        }
    }
}

/// Online users handler.
async fn online_handler(
    State(state): State<Arc<AppState>>,
    Path(facility): Path<String>,
) -> Response {
    match state.presence.online_identities(&facility).await {
        Ok(users) => {
            let mut users: Vec<String> = users.into_iter().collect();
            users.sort_unstable();
            Json(users).into_response()
        }
        Err(e) => {
            warn!(facility = %facility, error = %e, "Presence query failed");
            metrics::record_error("presence");
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
        }
    }
}
