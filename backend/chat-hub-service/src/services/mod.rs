pub mod chat_events;
pub mod memory_store;
pub mod message_service;
pub mod user_service;

pub use chat_events::ChatEventProducer;
pub use memory_store::{InMemoryMessageStore, InMemoryUserDirectory};
pub use message_service::{MessageStore, PgMessageStore};
pub use user_service::{PgUserDirectory, UserDirectory};
