pub mod api;
pub mod config;
pub mod directory;
pub mod dispatch;
pub mod error;
pub mod geo;
pub mod hub;
pub mod ingest;
pub mod mediator;
pub mod models;
pub mod observability;
pub mod presence;
pub mod state;
