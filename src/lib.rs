//! Library crate for scan-console: client-side session state, result
//! reconciliation, history and dashboard logic for a remote scanning service.
pub mod backend;
pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod history;
pub mod logging;
pub mod reconcile;
pub mod render;
pub mod server;
pub mod session;
pub mod stats;
pub mod types;
