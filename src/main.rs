use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use taskdeck_server::api::{self, AppState};
use taskdeck_server::persist::SaveFile;
use taskdeck_server::settings::Settings;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::load().expect("Failed to load settings");

    // ── Boot the Store ─────────────────────────────────────────
    let save_file = SaveFile::open(&settings.save_file)
        .expect("Failed to open save file");

    let mut store = save_file.load_store()
        .expect("Failed to load store from save file");

    // Seed sample data if empty
    let seeded = save_file.ensure_demo_tasks(&mut store)
        .expect("Failed to seed demo tasks");
    if seeded > 0 {
        tracing::info!("seeded {seeded} demo tasks");
    }

    tracing::info!(
        "store loaded: {} tasks, revision {}",
        store.tasks.len(),
        store.revision,
    );

    // ── Shared state + router ──────────────────────────────────
    let state = Arc::new(AppState {
        store: RwLock::new(store),
        save_file,
    });
    let app = api::router(state, &settings.static_dir);

    // ── Start ──────────────────────────────────────────────────
    let addr: SocketAddr = format!("{}:{}", settings.bind_address, settings.port)
        .parse()
        .expect("Invalid bind address");
    tracing::info!("server running on http://{addr}");
    tracing::info!("  tasks:  GET http://{addr}/api/tasks");
    tracing::info!("  health: GET http://{addr}/api/health");

    let listener = tokio::net::TcpListener::bind(addr).await.expect("Failed to bind");
    axum::serve(listener, app).await.expect("Server error");
}
