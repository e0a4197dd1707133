mod db;
mod event;
mod presence;
mod router;
mod routes;
mod services;
mod session;
mod state;

use std::sync::Arc;

use services::message::PgMessageStore;
use services::notify::{WebPushSender, spawn_notify_worker};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();

    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()
        .expect("invalid PORT");

    let pool = db::init_pool(&database_url)
        .await
        .expect("database init failed");

    let store = Arc::new(PgMessageStore::new(pool.clone()));
    let (notify, _notify_worker) = spawn_notify_worker(Arc::new(WebPushSender::new(pool.clone())));
    let state = state::AppState::new(pool, store, notify);

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "corpchat listening");
    axum::serve(listener, app).await.expect("server failed");
}
