// Public API for integration tests and potential library usage

pub mod auth;
pub mod config;
pub mod protocol;
pub mod source;
pub mod state;
pub mod store;
pub mod timer;
pub mod types;
pub mod ws;
