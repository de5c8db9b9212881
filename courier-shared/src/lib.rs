#![cfg_attr(not(test), forbid(unsafe_code))]

//! Types shared by the Courier server and its clients.
//!
//! [`models`] holds the persisted message shape and the WebSocket event
//! vocabulary; [`config`] holds server and client configuration loading.

pub mod config;
pub mod models;
