// Re-export route modules
pub mod health;
pub mod hub;
pub mod wsroute;
