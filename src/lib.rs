pub mod config;
pub mod database;
pub mod event_listener;
pub mod api;
pub mod types;
pub mod services;

pub use config::Config;
pub use database::{Database, MemorySwapStore, SwapStore};
pub use types::*;
