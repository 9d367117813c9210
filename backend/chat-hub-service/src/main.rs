use actix_web::{web, App, HttpServer};
use chat_hub_service::{
    config::{self, StorageBackend},
    db, error, logging,
    routes,
    services::{
        memory_store, ChatEventProducer, MessageStore, PgMessageStore, PgUserDirectory,
        UserDirectory,
    },
    state::AppState,
    websocket::ConnectionRegistry,
};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = Arc::new(config::Config::from_env()?);

    let (messages, users): (Arc<dyn MessageStore>, Arc<dyn UserDirectory>) = match cfg.storage {
        StorageBackend::Postgres => {
            let db = db::init_pool(&cfg)
                .await
                .map_err(|e| error::AppError::StartServer(format!("db: {e}")))?;
            (
                Arc::new(PgMessageStore::new(db.clone())),
                Arc::new(PgUserDirectory::new(db)),
            )
        }
        StorageBackend::Memory => {
            tracing::warn!("HUB_STORAGE=memory: messages are not persisted across restarts");
            let (messages, users) =
                memory_store::memory_stores(cfg.memory_seed.as_deref()).await?;
            (messages, users)
        }
    };

    let (registry, _hub) = ConnectionRegistry::start();
    let events = Arc::new(ChatEventProducer::new(registry.clone(), messages, users));

    let state = AppState {
        registry,
        events,
        config: cfg.clone(),
    };

    let ws_addr = format!("0.0.0.0:{}", cfg.ws_port);
    let ws_listener = TcpListener::bind(&ws_addr)
        .await
        .map_err(|e| error::AppError::StartServer(format!("bind websocket: {e}")))?;
    let ws_server = tokio::spawn(routes::wsroute::serve(ws_listener, state.clone()));

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, %ws_addr, "starting chat-hub-service");

    // Operational HTTP surface; actix-web server futures are not Send, so run it here
    let rest_state = state.clone();
    let rest_server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(rest_state.clone()))
            .service(routes::health::health)
            .service(routes::health::prometheus_metrics)
            .service(routes::hub::hub_stats)
            .service(routes::hub::conversation_subscribers)
    })
    .bind(&bind_addr)
    .map_err(|e| error::AppError::StartServer(format!("bind REST: {e}")))?
    .run();

    // Run both servers concurrently
    tokio::select! {
        res = rest_server => {
            res.map_err(|e| error::AppError::StartServer(format!("REST server: {e}")))?;
            Ok(())
        }
        res = ws_server => {
            res.map_err(|e| error::AppError::StartServer(format!("websocket task join: {e}")))?;
            Ok(())
        }
    }
}
