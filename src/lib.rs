// Public API for the server binary, the client and integration tests

pub mod api;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod protocol;
pub mod quiz;
pub mod state;
pub mod types;
pub mod ws;

// Background tasks
pub mod broadcast;
