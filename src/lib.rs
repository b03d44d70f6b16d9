pub mod appmax;
pub mod auth;
pub mod config;
pub mod db;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod reconcile;
pub mod refund;
pub mod routes;
pub mod store;

pub use routes::{router, AppState};
