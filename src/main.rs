//! Binary entrypoint: loads config, sets up logging, opens the store, starts the
//! notification worker and serves the API.

use std::{net::SocketAddr, sync::Arc};

use dotenvy::dotenv;
use tracing::{debug, info};

use vigil::{
    AppState, Database,
    config::ApiConfig,
    email::EmailDispatcher,
    logger::set_logger,
    notify, routes,
    template::TemplateEngine,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1) Load environment (.env is optional)
    dotenv().ok();
    let cfg = ApiConfig::from_env()?;

    // 2) Logging
    set_logger(&cfg).map_err(|e| anyhow::anyhow!("logger setup failed: {e}"))?;

    // 3) Store
    let db = Database::open(&cfg.database_path)?;
    db.migrate()?;
    debug!("Database ready at {}", cfg.database_path);

    // 4) Email transport + templates
    let dispatcher = EmailDispatcher::from_config(&cfg)?;
    let templates = TemplateEngine::new()?;

    let addr: SocketAddr = format!("{}:{}", cfg.listen_addr, cfg.listen_port).parse()?;
    let state = Arc::new(AppState::new(cfg, db, dispatcher, templates));

    // 5) Background notification delivery
    notify::spawn_worker(state.clone());

    // 6) Router + serve
    let app = routes::create_router(state);
    info!("Starting server on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
