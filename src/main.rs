//! Songbuzz Back binary entrypoint wiring REST, WebSocket, and storage layers.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use songbuzz_back::{
    config::SyncConfig,
    services::{catalog::HttpSongCatalog, presence, room_service},
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Arc::new(SyncConfig::load());

    let catalog_url = env::var("SONGBUZZ_CATALOG_URL")
        .unwrap_or_else(|_| "http://localhost:8090".into());
    let catalog = HttpSongCatalog::new(&catalog_url).context("building catalog client")?;

    let (app_state, presence_changes) = AppState::new(config, Arc::new(catalog));

    spawn_room_store(app_state.clone());
    tokio::spawn(presence::run_presence_dispatcher(
        app_state.clone(),
        presence_changes,
    ));
    tokio::spawn(room_service::run_sweeper(app_state.clone()));

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Spawn the MongoDB supervisor, reconnecting in the background and toggling
/// degraded mode when connectivity changes.
#[cfg(feature = "mongo-store")]
fn spawn_room_store(state: songbuzz_back::state::SharedState) {
    use songbuzz_back::dao::{
        room_store::{
            RoomStore,
            mongodb::{MongoConfig, MongoRoomStore},
        },
        storage::StorageError,
    };
    use songbuzz_back::services::storage_supervisor;

    let mongo_uri = env::var("MONGO_URI").unwrap_or_else(|_| "mongodb://localhost:27017".into());
    let mongo_db = env::var("MONGO_DB").ok();

    tokio::spawn(storage_supervisor::run(state, move || {
        let uri = mongo_uri.clone();
        let db = mongo_db.clone();
        async move {
            let config = MongoConfig::from_uri(&uri, db.as_deref())
                .await
                .map_err(StorageError::from)?;
            let store = MongoRoomStore::connect(config)
                .await
                .map_err(StorageError::from)?;
            Ok(Arc::new(store) as Arc<dyn RoomStore>)
        }
    }));
}

/// Install the in-memory store; rooms do not survive a restart.
#[cfg(not(feature = "mongo-store"))]
fn spawn_room_store(state: songbuzz_back::state::SharedState) {
    use songbuzz_back::dao::room_store::memory::MemoryRoomStore;

    tokio::spawn(async move {
        state.install_room_store(Arc::new(MemoryRoomStore::new())).await;
        info!("in-memory room store ready");
    });
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: songbuzz_back::state::SharedState) -> Router<()> {
    songbuzz_back::routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
