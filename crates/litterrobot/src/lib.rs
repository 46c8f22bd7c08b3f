pub mod account;
pub mod api;
pub mod config;
pub mod engine;
pub mod integrations;
pub mod time;

pub use config::Config;
pub use config::LogLevel;
pub use engine::Engine;
pub use engine::State;
