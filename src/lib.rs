use axum::{Router, middleware, routing::get};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{debug, info};

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod views;

use auth::{Auth, AuthConfig};
use config::Settings;
use error::AppError;
use views::Views;

/// Shared state handed to the page handlers
#[derive(Clone)]
pub struct AppState {
    pub auth: Auth,
    pub views: Arc<Views>,
}

/// Builds the route table.
///
/// The identity middleware's login, logout and callback handlers are mounted
/// on its configured routes, `/dashboard` sits behind the session guard and
/// every request passes through `attach_session`.
pub fn build_router(settings: &Settings, auth: Auth) -> Result<Router, AppError> {
    let state = AppState {
        auth: auth.clone(),
        views: Arc::new(Views::new()?),
    };

    let routes = auth.config().routes.clone();

    let app = Router::new()
        .route("/", get(handlers::index))
        .route(
            "/dashboard",
            get(handlers::dashboard).route_layer(middleware::from_fn_with_state(
                auth.clone(),
                auth::requires_auth,
            )),
        )
        .route(&routes.login, auth.login_handler())
        .route(&routes.logout, auth.logout_handler())
        .route(&routes.callback, auth.callback_handler())
        .nest_service("/static", ServeDir::new(&settings.static_dir))
        .layer(middleware::from_fn_with_state(auth, auth::attach_session))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    Ok(app)
}

/// Starts the web server from the process environment
pub async fn start_server(shutdown_rx: tokio::sync::oneshot::Receiver<()>) -> anyhow::Result<u16> {
    start_server_with_config(Settings::from_env()?, shutdown_rx).await
}

/// Starts the web server with custom configuration, returning the bound port
pub async fn start_server_with_config(
    settings: Settings,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> anyhow::Result<u16> {
    let auth = Auth::from_config(AuthConfig::from_settings(&settings)?)?;
    let listener = TcpListener::bind(settings.server_addr()).await?;

    start_server_with_listener(listener, &settings, auth, shutdown_rx).await
}

/// Serves the app on an already bound listener until `shutdown_rx` fires.
///
/// Useful when the port must be known before `base_url` is, as in tests
/// that bind port 0.
pub async fn start_server_with_listener(
    listener: TcpListener,
    settings: &Settings,
    auth: Auth,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> anyhow::Result<u16> {
    let app = build_router(settings, auth)?;
    let addr = listener.local_addr()?;

    info!("listening on {}", addr);
    info!("base URL {}", settings.base_url);
    debug!(
        "Server configuration - host: {}, port: {}, issuer: {}",
        settings.host, settings.port, settings.issuer_base_url
    );

    tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
            info!("shutting down");
        });
        if let Err(e) = server.await {
            tracing::error!("server error: {}", e);
        }
    });

    Ok(addr.port())
}
