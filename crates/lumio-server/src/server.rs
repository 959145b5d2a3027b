//! Router construction and the serving task.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{State, WebSocketUpgrade};
use axum::http::HeaderValue;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{error, info, warn};

use lumio_core::{CommandSender, EventBus, EventKind, ScheduleView, StateStore};
use lumio_lua::PatternStore;

use crate::hub::Hub;
use crate::message::event_message;
use crate::ws;

/// Server section of the agent configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub port: u16,
    pub web_files_dir: PathBuf,
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            web_files_dir: PathBuf::from("./web"),
            allowed_origins: Vec::new(),
        }
    }
}

/// Narrow read interface onto the schedule store for the priming burst.
pub type ScheduleListFn = Arc<dyn Fn() -> Vec<ScheduleView> + Send + Sync>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub hub: Arc<Hub>,
    pub commands: CommandSender,
    pub store: Arc<StateStore>,
    pub patterns: PatternStore,
    pub schedules: ScheduleListFn,
}

/// HTTP + WebSocket front end.
pub struct WebServer {
    config: ServerConfig,
    bus: Arc<EventBus>,
    state: AppState,
}

impl WebServer {
    pub fn new(
        config: ServerConfig,
        bus: Arc<EventBus>,
        store: Arc<StateStore>,
        commands: CommandSender,
        patterns: PatternStore,
        schedules: ScheduleListFn,
    ) -> Self {
        let state = AppState {
            hub: Arc::new(Hub::new()),
            commands,
            store,
            patterns,
            schedules,
        };
        Self { config, bus, state }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let mut events = self.bus.subscribe(&[
            EventKind::Link,
            EventKind::State,
            EventKind::Pattern,
            EventKind::Power,
            EventKind::Color,
            EventKind::Brightness,
            EventKind::PatternList,
            EventKind::PatternCode,
            EventKind::ScheduleList,
        ]);
        let forwarder = {
            let hub = Arc::clone(&self.state.hub);
            let bus = Arc::clone(&self.bus);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        event = events.recv() => {
                            let Some(event) = event else { break };
                            hub.broadcast(&event_message(&event));
                        }
                    }
                }
                bus.unsubscribe(events.id());
            })
        };

        let app = Router::new()
            .route("/ws", get(upgrade))
            .fallback_service(ServeDir::new(&self.config.web_files_dir))
            .layer(cors_layer(&self.config.allowed_origins))
            .with_state(self.state.clone());

        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(%addr, error = %e, "cannot bind web server");
                return;
            }
        };
        info!(%addr, "web server listening");

        let graceful = shutdown.clone();
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { graceful.cancelled().await })
            .await
        {
            error!(error = %e, "web server failed");
        }
        let _ = forwarder.await;
        info!("web server stopped");
    }
}

async fn upgrade(upgrade: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| ws::handle_socket(socket, state))
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.is_empty() {
        warn!("no allowed origins configured, allowing all");
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin, "ignoring unparseable allowed origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.web_files_dir, PathBuf::from("./web"));
        assert!(config.allowed_origins.is_empty());
    }

    #[test]
    fn config_deserializes_partial_json() {
        let config: ServerConfig =
            serde_json::from_str(r#"{"port":9000,"allowedOrigins":["http://localhost:5173"]}"#)
                .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.allowed_origins, vec!["http://localhost:5173"]);
        assert_eq!(config.web_files_dir, PathBuf::from("./web"));
    }
}
