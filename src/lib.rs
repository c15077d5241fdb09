pub mod access;
pub mod auth;
pub mod config;
pub mod db;
pub mod effects;
pub mod error;
pub mod gating;
pub mod jobs;
pub mod lifecycle;
pub mod models;
pub mod routes;
pub mod schema;
pub mod state;
pub mod utils;
pub mod workers;

pub use routes::create_router;
pub use workers::{default_handlers, Worker};
