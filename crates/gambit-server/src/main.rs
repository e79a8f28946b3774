use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use socket2::{Domain, Protocol, Socket, Type};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use gambit_archive::Archive;
use gambit_gateway::{hub::RoomHub, Gateway};
use gambit_hot::HotStore;
use gambit_session::{keys, Lifecycle, SessionStore};

mod config;
mod pgn;
mod routes;

use config::Config;
use routes::AppState;

/// WS transport cap; the protocol itself rejects frames over 1024 bytes, so
/// anything bigger than this is hostile.
const MAX_WS_MESSAGE_BYTES: usize = 8 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gambit=debug,tower_http=debug".into()),
        )
        .init();

    let config = Arc::new(Config::from_env());

    // Startup order: hot store, archive, hub, router, sweeper. Teardown
    // happens in reverse when main returns.
    let hot = HotStore::new();
    let archive = Arc::new(Archive::open(&PathBuf::from(&config.db_path))?);
    let store = SessionStore::new(hot, archive, config.session.clone());
    let hub = RoomHub::new();
    let gateway = Gateway::new(hub.clone(), Lifecycle::new(store.clone()));

    let state = AppState { gateway, config: config.clone() };

    let cors = build_cors_layer(&config);

    let app = Router::new()
        .route("/games", post(routes::create_game))
        .route("/games/public", get(routes::list_public))
        .route("/games/archive", get(routes::list_archive))
        .route("/games/{id}/join", post(routes::join_game))
        .route("/games/{id}/claim", post(routes::claim_seat))
        .route("/games/{id}/pgn", get(routes::export_pgn))
        .route("/health", get(routes::health))
        .route("/ws", get(ws_upgrade))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let sweeper = tokio::spawn(gambit_session::run_sweeper(
        store.clone(),
        config.session.sweep_interval_ms,
    ));

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("gambit listening on {}", addr);

    // Listener via socket2 so accepted connections inherit TCP_NODELAY;
    // Nagle would add latency to every small WS frame.
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nodelay(true)?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    socket.set_nonblocking(true)?;
    let listener = tokio::net::TcpListener::from_std(socket.into())?;

    let shutdown_hub = hub.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        info!("shutdown signal received, closing peers");
        // Peers get WS close 1001 before the stores go away.
        shutdown_hub.close_all().await;
    })
    .await?;

    sweeper.abort();
    info!("gambit stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => warn!("failed to install SIGTERM handler: {e}"),
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// CORS for the HTTP surface. Empty origin list: allow-all in dev, deny-all
/// in production (same policy the WS upgrade applies by hand).
fn build_cors_layer(config: &Config) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::OPTIONS];
    if config.cors_allowed_origins.is_empty() {
        if config.production {
            CorsLayer::new()
        } else {
            CorsLayer::new()
                .allow_origin(AllowOrigin::any())
                .allow_methods(methods)
                .allow_headers(tower_http::cors::Any)
        }
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_allowed_origins
            .iter()
            .filter_map(|o| match o.parse::<HeaderValue>() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!("ignoring invalid CORS origin: {o}");
                    None
                }
            })
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(methods)
            .allow_headers(tower_http::cors::Any)
            .allow_credentials(false)
    }
}

async fn ws_upgrade(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    if !state.config.origin_allowed(origin) {
        return StatusCode::FORBIDDEN.into_response();
    }

    let ip = addr.ip().to_string().replace(':', "_");
    let decision = state.gateway.lifecycle.store().hot().rate_limit(
        &keys::rate_limit_key("ws", &ip),
        state.config.rate_limit_ws_connect_max,
        state.config.rate_limit_ws_connect_window_secs * 1_000,
        gambit_types::now_ms(),
    );
    if !decision.allowed {
        let secs = decision.retry_after_ms.div_ceil(1_000).max(1);
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, secs.to_string())],
        )
            .into_response();
    }

    let cookies = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let gateway = state.gateway.clone();
    ws.max_message_size(MAX_WS_MESSAGE_BYTES)
        .max_frame_size(MAX_WS_MESSAGE_BYTES)
        .on_upgrade(move |socket| gambit_gateway::handle_connection(gateway, socket, cookies))
}
