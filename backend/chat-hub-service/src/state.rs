use crate::{config::Config, services::ChatEventProducer, websocket::ConnectionRegistry};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub registry: ConnectionRegistry,
    pub events: Arc<ChatEventProducer>,
    pub config: Arc<Config>,
}
