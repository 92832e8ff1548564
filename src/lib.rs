// Live event payloads and parsing
pub mod event;

// Reconciled entity state and change propagation
pub mod state;

// History / list API client
pub mod api;

// Live push channel
pub mod nats;

// Configuration
pub mod config;

// Engine error taxonomy
pub mod error;

pub use error::EngineError;
