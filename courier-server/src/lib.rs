//! Courier delivery server.
//!
//! Presence, the pending-delivery queue and room membership live in
//! [`realtime::hub::DeliveryHub`]; [`services::delivery::DeliveryRouter`]
//! decides between push and queue for every message, and the WebSocket
//! session plus the REST fallback are thin transports over it.

pub mod app_state;
pub mod auth;
pub mod commands;
pub mod db;
pub mod handlers;
pub mod http;
pub mod middleware;
pub mod openapi;
pub mod realtime;
pub mod routes;
pub mod server;
pub mod services;
pub mod store;
mod tracer;
