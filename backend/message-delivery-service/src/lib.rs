//! Message delivery pipeline.
//!
//! `POST /messages` validates and appends to a Redis stream; a background
//! [`worker::DeliveryWorker`] claims entries through a consumer group, stores
//! each message in PostgreSQL and acknowledges only after the transaction
//! commits.

pub mod config;
pub mod db;
pub mod error;
pub mod log;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod redis_client;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
pub mod worker;

pub const SERVICE_NAME: &str = "message-delivery-service";
