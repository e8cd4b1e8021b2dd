use std::env;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;

use storyclust::config::PipelineConfig;
use storyclust::routes::{self, AppState};
use storyclust::services::{db, post_source::PostSourceClient};
use storyclust::workers::{cluster_curate, cluster_sync, event_dispatch, ingest_accounts, ingest_keywords};

#[tokio::main]
async fn main() {
    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool_size: u32 = env::var("DB_POOL_SIZE").ok().and_then(|s| s.parse().ok()).unwrap_or(10);
    let port: u16 = env::var("PORT").ok().and_then(|s| s.parse().ok()).unwrap_or(8080);
    let post_source_base_url = env::var("POST_SOURCE_BASE_URL").expect("POST_SOURCE_BASE_URL must be set");

    let pool = db::connect(&database_url, pool_size).await;
    let config = Arc::new(PipelineConfig::from_env());

    let events = storyclust::events::setup(&pool).await.expect("failed to set up event storage");
    let post_source = PostSourceClient::new(&config.post_source_auth_key, &post_source_base_url);

    tokio::spawn(ingest_accounts::run_ingest_accounts_worker(
        pool.clone(),
        config.clone(),
        post_source.clone(),
        events.clone(),
    ));
    tokio::spawn(ingest_keywords::run_ingest_keywords_worker(
        pool.clone(),
        config.clone(),
        post_source.clone(),
        events.clone(),
    ));
    tokio::spawn(cluster_sync::run_cluster_sync_worker(pool.clone(), config.clone(), events.clone()));
    tokio::spawn(cluster_curate::run_cluster_curate_worker(pool.clone(), config.clone()));
    tokio::spawn(event_dispatch::run_event_dispatch_worker(pool.clone(), config.clone()));

    let state = AppState { pool, config, events };
    let app = routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(SetResponseHeaderLayer::if_not_present(
            axum::http::header::X_CONTENT_TYPE_OPTIONS,
            axum::http::HeaderValue::from_static("nosniff"),
        ));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await.expect("failed to bind listener");
    println!("[storyclust] listening on :{port}");
    axum::serve(listener, app).await.expect("server error");
}
